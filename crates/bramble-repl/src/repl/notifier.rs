//! Output notification system for the REPL
//!
//! Provides a trait-based system for handling REPL output, so the console
//! backend can be swapped for a capturing one in tests.

use std::sync::Arc;

use parking_lot::Mutex;

/// Trait for handling REPL output notifications
pub trait ReplNotifier: Send + Sync {
    /// Handle regular output
    fn on_output(&self, content: &str);

    /// Handle error output
    fn on_error(&self, content: &str);

    /// Handle a rendered document with timing information
    fn on_result(&self, output: &str, duration_ms: u64, quiet: bool);
}

/// Default console-based notifier
pub struct DefaultNotifier;

impl DefaultNotifier {
    /// Create a new default notifier
    pub fn new() -> Self {
        Self
    }
}

impl ReplNotifier for DefaultNotifier {
    fn on_output(&self, content: &str) {
        if !content.is_empty() {
            println!("{content}");
        }
    }

    fn on_error(&self, content: &str) {
        eprintln!("{content}");
    }

    fn on_result(&self, output: &str, duration_ms: u64, quiet: bool) {
        if quiet {
            println!("{output}");
        } else {
            println!("{output}\n=> rendered ({duration_ms}ms)");
        }
    }
}

impl Default for DefaultNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Notifier that records everything it is given
#[derive(Default)]
pub struct CapturingNotifier {
    lines: Mutex<Vec<String>>,
}

impl CapturingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, errors prefixed with `error: `
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl ReplNotifier for CapturingNotifier {
    fn on_output(&self, content: &str) {
        self.lines.lock().push(content.to_string());
    }

    fn on_error(&self, content: &str) {
        self.lines.lock().push(format!("error: {content}"));
    }

    fn on_result(&self, output: &str, _duration_ms: u64, _quiet: bool) {
        self.lines.lock().push(output.to_string());
    }
}

impl<T: ReplNotifier + ?Sized> ReplNotifier for Arc<T> {
    fn on_output(&self, content: &str) {
        (**self).on_output(content);
    }

    fn on_error(&self, content: &str) {
        (**self).on_error(content);
    }

    fn on_result(&self, output: &str, duration_ms: u64, quiet: bool) {
        (**self).on_result(output, duration_ms, quiet);
    }
}
