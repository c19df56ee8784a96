//! Custom Resource Definitions (CRDs) read by the admission webhook.
//!
//! - `Config`: the platform's namespaced singleton holding trace settings and
//!   namespace exclusions

mod config;

pub use config::*;
