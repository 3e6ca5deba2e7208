//! Temp-variable scopes.
//!
//! Each frame owns a scope whose parent is the scope of the frame that
//! rendered it. Lookups walk the parent chain; writes always land in the
//! local scope, so a nested frame can shadow an ancestor's binding but never
//! overwrite it.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::value::Value;

struct ScopeInner {
    name: String,
    variables: RwLock<IndexMap<String, Value>>,
    parent: Option<Scope>,
}

/// A shared handle to one level of the temp-variable chain
#[derive(Clone)]
pub struct Scope(Arc<ScopeInner>);

impl Scope {
    /// Create a scope with no parent
    pub fn root(name: impl Into<String>) -> Self {
        Self(Arc::new(ScopeInner {
            name: name.into(),
            variables: RwLock::new(IndexMap::new()),
            parent: None,
        }))
    }

    /// Create a scope chained off this one
    pub fn child(&self, name: impl Into<String>) -> Self {
        Self(Arc::new(ScopeInner {
            name: name.into(),
            variables: RwLock::new(IndexMap::new()),
            parent: Some(self.clone()),
        }))
    }

    /// Debug-facing name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.0.parent.as_ref()
    }

    /// Look a variable up through the parent chain
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if let Some(value) = scope.0.variables.read().get(name) {
                return Some(value.clone());
            }
            current = scope.parent();
        }
        None
    }

    /// Bind a variable in this scope, shadowing any ancestor binding
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.0.variables.write().insert(name.into(), value);
    }

    /// Whether this scope itself (not an ancestor) binds `name`
    pub fn has_own(&self, name: &str) -> bool {
        self.0.variables.read().contains_key(name)
    }

    /// Snapshot of the bindings made directly in this scope
    pub fn own_bindings(&self) -> IndexMap<String, Value> {
        self.0.variables.read().clone()
    }

    /// Number of scopes between this one and the root
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent();
        while let Some(scope) = current {
            depth += 1;
            current = scope.parent();
        }
        depth
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.0.name)
            .field("variables", &self.0.variables.read().keys().collect::<Vec<_>>())
            .field("depth", &self.depth())
            .finish()
    }
}
