//! The macro calling contract.
//!
//! A macro is a function from evaluated arguments to a value. Most macros
//! are pure; the few that return changers or commands are understood by the
//! engine's result dispatch.

mod builtins;

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{error::RenderError, runner::EvalContext, value::Value};

pub type MacroFn =
    Arc<dyn Fn(&mut EvalContext<'_>, Vec<Value>) -> Result<Value, RenderError> + Send + Sync>;

/// Macros by normalised name
#[derive(Clone, Default)]
pub struct MacroRegistry {
    macros: HashMap<String, MacroFn>,
}

impl MacroRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every builtin macro
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtins::register_all(&mut registry);
        registry
    }

    /// Macro names ignore case, hyphens and underscores
    pub fn normalize(name: &str) -> String {
        name.chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect()
    }

    pub fn register<F>(&mut self, name: &str, function: F)
    where
        F: Fn(&mut EvalContext<'_>, Vec<Value>) -> Result<Value, RenderError>
            + Send
            + Sync
            + 'static,
    {
        self.macros.insert(Self::normalize(name), Arc::new(function));
    }

    /// Register the same function under several names
    pub fn register_aliases<F>(&mut self, names: &[&str], function: F)
    where
        F: Fn(&mut EvalContext<'_>, Vec<Value>) -> Result<Value, RenderError>
            + Send
            + Sync
            + 'static,
    {
        let function: MacroFn = Arc::new(function);
        for name in names {
            self.macros.insert(Self::normalize(name), function.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<&MacroFn> {
        self.macros.get(&Self::normalize(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.macros.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for MacroRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacroRegistry")
            .field("macros", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_normalised() {
        assert_eq!(MacroRegistry::normalize("Text-Colour"), "textcolour");
        assert_eq!(MacroRegistry::normalize("go_to"), "goto");

        let registry = MacroRegistry::with_builtins();
        assert!(registry.contains("TEXT_STYLE"));
        assert!(registry.contains("else-if"));
        assert!(!registry.contains("nope"));
    }

    #[test]
    fn test_registering_replaces_existing() {
        let mut registry = MacroRegistry::new();
        registry.register("answer", |_, _| Ok(Value::Number(1.0)));
        registry.register("ANSWER", |_, _| Ok(Value::Number(42.0)));
        assert_eq!(registry.len(), 1);
    }
}
