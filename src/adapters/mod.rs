//! Readiness-notifier implementations for specific event loops.

pub mod mio;
