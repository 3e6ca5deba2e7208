//! # Bramble Core
//!
//! Rendering engine for hook-and-changer markup, including:
//! - A document model (the [`Document`] interface and an in-memory [`Tree`])
//! - The markup source model produced by a parser
//! - Values, a small expression runner and the macro calling contract
//! - Change descriptors and composable changers
//! - Enchantments that keep selected regions decorated as content changes
//! - The frame-stack execution engine with structural suspension
//!
//! The engine is single-threaded and cooperative. Hosts (the REPL, tests,
//! an embedding game shell) drive it with [`Engine::render_into`],
//! [`Engine::unblock`], [`Engine::fire_event`] and [`Engine::tick`].

#![warn(clippy::all)]

pub mod changer;
pub mod descriptor;
pub mod document;
pub mod enchantment;
pub mod engine;
pub mod error;
pub mod identifiers;
pub mod macros;
pub mod markup;
pub mod runner;
pub mod scope;
pub mod value;

use std::path::Path;

use serde::{Deserialize, Serialize};

// Re-export commonly used types
pub use changer::{Changer, Command, CommandOutcome, CommandSite};
pub use descriptor::{AppendMode, ChangeDescriptor, DescriptorPatch, EventSpec, LiveSpec, TargetSpec};
pub use document::{Document, DocumentOrder, NodeData, NodeId, Tree};
pub use enchantment::{EnchantEffect, Enchantment, EnchantmentId, EventBinding, Selector};
pub use engine::{BlockState, Engine, Frame, Modification};
pub use error::{ErrorKind, RenderError};
pub use identifiers::{Identifiers, Story, StoryState};
pub use macros::{MacroRegistry, MacroFn};
pub use markup::{Markup, Statement};
pub use runner::{EvalContext, Expr, Identifier};
pub use scope::Scope;
pub use value::{Lambda, LambdaKind, Value};

/// Bramble version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing for Bramble components
///
/// Honours `RUST_LOG`; falls back to `bramble_core=info`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bramble_core=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrambleConfig {
    /// Maximum number of final-iteration frames on the stack
    pub max_recursion_depth: usize,
    /// Scales real elapsed time fed to live loops
    pub speed_multiplier: f64,
    /// Enable debug diagnostics
    pub debug: bool,
    /// Passage rendered first by hosts
    pub start_passage: String,
}

impl Default for BrambleConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: 50,
            speed_multiplier: 1.0,
            debug: false,
            start_passage: "Start".to_string(),
        }
    }
}

impl BrambleConfig {
    /// Load a configuration from a JSON file; missing fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_recursion_depth == 0 {
            return Err(BrambleError::Config(
                "max_recursion_depth must be at least 1".to_string(),
            ));
        }
        if !(self.speed_multiplier.is_finite() && self.speed_multiplier > 0.0) {
            return Err(BrambleError::Config(format!(
                "speed_multiplier must be a positive number, got {}",
                self.speed_multiplier
            )));
        }
        Ok(())
    }
}

/// Error types for Bramble operations outside of a render
#[derive(thiserror::Error, Debug)]
pub enum BrambleError {
    /// I/O error while loading a story or configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON input
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Navigation to a passage the story does not contain
    #[error("Unknown passage: {0}")]
    UnknownPassage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation not allowed in the engine's current state
    #[error("Engine error: {0}")]
    Engine(String),
}

/// Result type for Bramble operations
pub type Result<T> = std::result::Result<T, BrambleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BrambleConfig::default();
        assert_eq!(config.max_recursion_depth, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_json_file_fills_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bramble.json");
        std::fs::write(&path, r#"{ "speed_multiplier": 2.5 }"#).unwrap();

        let config = BrambleConfig::from_json_file(&path).unwrap();
        assert_eq!(config.speed_multiplier, 2.5);
        assert_eq!(config.start_passage, "Start");
    }

    #[test]
    fn test_config_rejects_zero_depth() {
        let config = BrambleConfig {
            max_recursion_depth: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(BrambleError::Config(_))));
    }
}
