//! Read-only identifiers and the story state they are computed from.

use std::{collections::HashMap, path::Path, time::Instant};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    document::Document,
    enchantment::WRAPPER_TAG,
    error::RenderError,
    markup::Markup,
    runner::Identifier,
    value::Value,
    BrambleError,
};

/// Game state the engine queries but never owns
pub trait StoryState {
    /// Visits to the current passage, including this one
    fn visits(&self) -> usize;
    /// Number of passage transitions so far
    fn turns(&self) -> usize;
    fn current(&self) -> Option<&str>;
    fn passage(&self, name: &str) -> Option<&[Markup]>;
    /// Record navigation to `name` and return its source
    fn advance(&mut self, name: &str) -> Result<Vec<Markup>, BrambleError>;
}

fn default_start() -> String {
    "Start".to_string()
}

/// A JSON-loadable collection of passages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Story {
    #[serde(default = "default_start")]
    pub start: String,
    #[serde(default)]
    pub passages: IndexMap<String, Vec<Markup>>,
    #[serde(skip)]
    history: Vec<String>,
    #[serde(skip)]
    visits: HashMap<String, usize>,
}

impl Story {
    pub fn new(start: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            ..Self::default()
        }
    }

    pub fn with_passage(mut self, name: impl Into<String>, source: Vec<Markup>) -> Self {
        self.passages.insert(name.into(), source);
        self
    }

    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let story = Self::from_json_str(&std::fs::read_to_string(path)?)?;
        info!(path = %path.display(), passages = story.passages.len(), "loaded story");
        Ok(story)
    }

    /// Passage names in visit order
    pub fn history(&self) -> &[String] {
        &self.history
    }
}

impl StoryState for Story {
    fn visits(&self) -> usize {
        self.current()
            .and_then(|name| self.visits.get(name))
            .copied()
            .unwrap_or(0)
    }

    fn turns(&self) -> usize {
        self.history.len()
    }

    fn current(&self) -> Option<&str> {
        self.history.last().map(String::as_str)
    }

    fn passage(&self, name: &str) -> Option<&[Markup]> {
        self.passages.get(name).map(Vec::as_slice)
    }

    fn advance(&mut self, name: &str) -> Result<Vec<Markup>, BrambleError> {
        let source = self
            .passages
            .get(name)
            .cloned()
            .ok_or_else(|| BrambleError::UnknownPassage(name.to_string()))?;
        self.history.push(name.to_string());
        *self.visits.entry(name.to_string()).or_insert(0) += 1;
        Ok(source)
    }
}

/// The read-only context threaded into every evaluation
#[derive(Clone, Copy)]
pub struct Identifiers<'a> {
    started: Instant,
    document: &'a dyn Document,
    state: &'a dyn StoryState,
    pos: Option<usize>,
}

impl<'a> Identifiers<'a> {
    pub fn new(
        started: Instant,
        document: &'a dyn Document,
        state: &'a dyn StoryState,
        pos: Option<usize>,
    ) -> Self {
        Self {
            started,
            document,
            state,
            pos,
        }
    }

    /// Milliseconds since the current render began
    pub fn time(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    pub fn visits(&self) -> usize {
        self.state.visits()
    }

    pub fn turns(&self) -> usize {
        self.state.turns()
    }

    /// Interactable regions: event-bound enchantment wrappers
    pub fn exits(&self) -> usize {
        let doc = self.document;
        doc.descendants(doc.root())
            .into_iter()
            .filter(|&node| doc.tag(node) == Some(WRAPPER_TAG) && doc.attr(node, "event").is_some())
            .count()
    }

    pub fn get(&self, identifier: Identifier) -> Result<Value, RenderError> {
        Ok(match identifier {
            Identifier::Time => Value::Number(self.time().floor()),
            Identifier::Visits => Value::Number(self.visits() as f64),
            Identifier::Turns => Value::Number(self.turns() as f64),
            Identifier::Exits => Value::Number(self.exits() as f64),
            Identifier::Pos => {
                let pos = self.pos.ok_or_else(|| {
                    RenderError::evaluation_context("The 'pos' identifier", "code outside of a per-element lambda")
                })?;
                Value::Number(pos as f64)
            }
        })
    }
}
