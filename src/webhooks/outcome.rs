//! Terminal outcomes of an admission request and the seam that records them.

use std::fmt;
use std::time::Duration;

/// How a request left the pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OutcomeTag {
    /// Evaluated, no deny results
    Allow,
    /// Evaluated, at least one deny result
    Deny,
    /// Evaluation or a required store read failed
    Error,
    /// Namespace excluded by configuration
    Skip,
    /// Short-circuited before any outcome was assigned
    #[default]
    Unknown,
}

impl OutcomeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeTag::Allow => "allow",
            OutcomeTag::Deny => "deny",
            OutcomeTag::Error => "error",
            OutcomeTag::Skip => "skip",
            OutcomeTag::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OutcomeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records one outcome per admission request.
///
/// Implementations are shared by every in-flight request and must accept
/// concurrent calls.
pub trait OutcomeReporter: Send + Sync {
    fn report_outcome(&self, outcome: OutcomeTag, elapsed: Duration);
}
