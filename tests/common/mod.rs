//! Shared test fixtures and mocks (used by unit, functional, and proptest).

#![allow(dead_code)]
