//! Bramble REPL - Interactive command-line shell for the Bramble engine
//!
//! This crate provides the REPL around `bramble-core`: dot-command parsing,
//! multi-line JSON markup input and pluggable output notification.

pub mod repl;

// Re-export commonly used types for convenience
pub use repl::{CapturingNotifier, DefaultNotifier, Repl, ReplCommand, ReplNotifier};
