//! Enchantments: standing bindings between a region selector and a changer.
//!
//! Each refresh wraps every current match in a `tw-enchantment` element and
//! decorates the wrapper; [`Enchantment::disenchant`] unwraps them again.
//! Tearing down and rebuilding on every refresh keeps the decoration
//! correct after any structural change without diffing old and new matches.

use std::{fmt, sync::Arc};

use tracing::{debug, warn};

use crate::{
    changer::Changer,
    descriptor::{AppendMode, ChangeDescriptor},
    document::{Document, NodeId},
    engine::Engine,
    error::RenderError,
    markup::Markup,
    runner,
    scope::Scope,
    value::{Lambda, Value},
};

pub(crate) const WRAPPER_TAG: &str = "tw-enchantment";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnchantmentId(pub usize);

pub type NodePredicate = Arc<dyn Fn(&dyn Document, NodeId) -> bool + Send + Sync>;

/// A query over document regions
#[derive(Clone)]
pub enum Selector {
    /// Hooks with this name
    Name(String),
    /// Elements with this tag
    Tag(String),
    /// Occurrences of this text
    Text(String),
    Predicate(NodePredicate),
    Node(NodeId),
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Name(name) => write!(f, "?{name}"),
            Selector::Tag(tag) => write!(f, "<{tag}>"),
            Selector::Text(text) => write!(f, "{text:?}"),
            Selector::Predicate(_) => write!(f, "<predicate>"),
            Selector::Node(node) => write!(f, "#{}", node.0),
        }
    }
}

impl Selector {
    /// Hook names select hooks, strings select text
    pub fn from_value(value: &Value) -> Result<Selector, RenderError> {
        match value {
            Value::HookName(name) => Ok(Selector::Name(name.clone())),
            Value::String(text) if !text.is_empty() => Ok(Selector::Text(text.clone())),
            other => Err(RenderError::type_mismatch(
                "selecting regions",
                "a hook name or a non-empty string",
                other.type_name(),
            )),
        }
    }

    /// Whether this element selector matches `node`. Text selectors never
    /// match whole nodes.
    pub fn matches(&self, doc: &dyn Document, node: NodeId) -> bool {
        let Some(tag) = doc.tag(node) else {
            return false;
        };
        if tag == WRAPPER_TAG {
            return false;
        }
        match self {
            Selector::Name(name) => tag == "tw-hook" && doc.attr(node, "name") == Some(name.as_str()),
            Selector::Tag(wanted) => tag == wanted.as_str(),
            Selector::Text(_) => false,
            Selector::Predicate(predicate) => predicate(doc, node),
            Selector::Node(wanted) => node == *wanted,
        }
    }

    /// Matching elements below `within`, in document order
    pub fn select(&self, doc: &dyn Document, within: NodeId) -> Vec<NodeId> {
        doc.descendants(within)
            .into_iter()
            .filter(|&node| self.matches(doc, node))
            .collect()
    }

    /// Like [`Selector::select`], but text selectors split matching text
    /// into `tag` elements first
    pub fn resolve(&self, doc: &mut dyn Document, within: NodeId, tag: &str) -> Vec<NodeId> {
        match self {
            Selector::Text(needle) => split_text(doc, within, needle, tag),
            selector => selector.select(doc, within),
        }
    }
}

/// Wrap every occurrence of `needle` below `within` in a new `tag` element
fn split_text(doc: &mut dyn Document, within: NodeId, needle: &str, tag: &str) -> Vec<NodeId> {
    if needle.is_empty() {
        return Vec::new();
    }
    let candidates: Vec<NodeId> = doc
        .descendants(within)
        .into_iter()
        .filter(|&node| doc.text(node).is_some_and(|text| text.contains(needle)))
        .collect();

    let mut created = Vec::new();
    for node in candidates {
        let (Some(parent), Some(text)) = (doc.parent(node), doc.text(node).map(str::to_owned)) else {
            continue;
        };
        let mut cursor = 0;
        for (start, found) in text.match_indices(needle) {
            if start > cursor {
                let before = doc.create_text(&text[cursor..start]);
                doc.insert_before(parent, before, Some(node));
            }
            let element = doc.create_element(tag);
            let inner = doc.create_text(found);
            doc.append_child(element, inner);
            doc.insert_before(parent, element, Some(node));
            created.push(element);
            cursor = start + found.len();
        }
        if cursor < text.len() {
            let rest = doc.create_text(&text[cursor..]);
            doc.insert_before(parent, rest, Some(node));
        }
        doc.detach(node);
    }
    created
}

/// What an enchantment does to each match
#[derive(Debug, Clone)]
pub enum EnchantEffect {
    Fixed(Changer),
    /// A `via` lambda producing a changer per match
    Computed(Lambda),
    /// Wrap only (event-bound enchantments)
    Inert,
}

/// Deferred rendering set up by an event-bound enchantment
#[derive(Debug, Clone)]
pub struct EventBinding {
    pub kind: String,
    pub source: Vec<Markup>,
    pub target: NodeId,
    pub mode: AppendMode,
    pub once: bool,
    pub scope: Scope,
}

#[derive(Debug, Clone)]
pub struct Enchantment {
    pub id: EnchantmentId,
    pub selector: Selector,
    pub effect: EnchantEffect,
    /// Temp scope computed effects are evaluated in
    pub scope: Scope,
    /// Restricts matches to descendants of this region
    pub local_scope: Option<NodeId>,
    /// The enchantment is dropped once this region leaves the document
    pub owner: Option<NodeId>,
    pub event: Option<EventBinding>,
    wrappers: Vec<NodeId>,
}

impl Enchantment {
    /// A new enchantment; the engine assigns its id when registering it
    pub fn new(selector: Selector, effect: EnchantEffect, scope: Scope) -> Self {
        Self {
            id: EnchantmentId(0),
            selector,
            effect,
            scope,
            local_scope: None,
            owner: None,
            event: None,
            wrappers: Vec::new(),
        }
    }

    pub fn within(mut self, region: NodeId) -> Self {
        self.local_scope = Some(region);
        self
    }

    pub fn owned_by(mut self, region: NodeId) -> Self {
        self.owner = Some(region);
        self
    }

    pub fn with_event(mut self, binding: EventBinding) -> Self {
        self.event = Some(binding);
        self
    }

    /// Wrappers created by the last refresh
    pub fn wrappers(&self) -> &[NodeId] {
        &self.wrappers
    }

    /// Whether the regions this enchantment depends on are still attached
    pub fn is_live(&self, doc: &dyn Document) -> bool {
        self.owner.map_or(true, |owner| doc.is_attached(owner))
            && self.local_scope.map_or(true, |region| doc.is_attached(region))
    }

    /// Wrap and decorate every current match
    pub fn enchant_scope(&mut self, engine: &mut Engine) {
        let within = self.local_scope.unwrap_or_else(|| engine.document().root());
        let matches: Vec<NodeId> = match &self.selector {
            Selector::Text(needle) => split_text(engine.document_mut(), within, needle, WRAPPER_TAG),
            selector => {
                let found = selector.select(engine.document(), within);
                found
                    .into_iter()
                    .filter_map(|node| engine.document_mut().wrap(node, WRAPPER_TAG))
                    .collect()
            }
        };

        for (index, &wrapper) in matches.iter().enumerate() {
            let doc = engine.document_mut();
            doc.data_mut(wrapper).enchantment = Some(self.id);
            if let Some(event) = &self.event {
                doc.set_attr(wrapper, "event", &event.kind);
            }

            let changer = match &self.effect {
                EnchantEffect::Inert => continue,
                EnchantEffect::Fixed(changer) => changer.clone(),
                EnchantEffect::Computed(lambda) => {
                    let arg = Value::String(engine.document().text_content(wrapper));
                    let result = engine.evaluate_in(&self.scope, Some(index + 1), |ctx| {
                        runner::call_lambda(lambda, ctx, Some(arg))
                    });
                    match result {
                        Ok(Value::Changer(changer)) => changer,
                        Ok(other) => {
                            warn!(
                                enchantment = self.id.0,
                                position = index + 1,
                                "via lambda produced {} instead of a changer",
                                other.type_name()
                            );
                            continue;
                        }
                        Err(err) => {
                            warn!(enchantment = self.id.0, position = index + 1, %err, "via lambda failed");
                            continue;
                        }
                    }
                }
            };

            let mut descriptor = ChangeDescriptor::new(Some(wrapper), Vec::new());
            match changer.run(&mut descriptor) {
                Ok(()) => descriptor.update(engine.document_mut(), wrapper),
                Err(err) => warn!(enchantment = self.id.0, %err, "enchantment changer failed"),
            }
        }

        debug!(enchantment = self.id.0, matches = matches.len(), "enchanted");
        self.wrappers = matches;
    }

    /// Remove every wrapper this enchantment created
    pub fn disenchant(&mut self, doc: &mut dyn Document) {
        for wrapper in self.wrappers.drain(..).rev() {
            let parent = doc.parent(wrapper);
            doc.unwrap(wrapper);
            if let Some(parent) = parent {
                doc.normalize(parent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Tree;

    #[test]
    fn test_split_text_wraps_each_occurrence() {
        let mut tree = Tree::new();
        let root = tree.root();
        let text = tree.create_text("a cat and a cat");
        tree.append_child(root, text);

        let created = split_text(&mut tree, root, "cat", "tw-pseudo-hook");
        assert_eq!(created.len(), 2);
        assert_eq!(
            tree.to_html(root),
            "<tw-passage>a <tw-pseudo-hook>cat</tw-pseudo-hook> and a <tw-pseudo-hook>cat</tw-pseudo-hook></tw-passage>"
        );
    }

    #[test]
    fn test_selector_ignores_wrappers() {
        let mut tree = Tree::new();
        let root = tree.root();
        let wrapper = tree.create_element(WRAPPER_TAG);
        tree.append_child(root, wrapper);
        assert!(Selector::Tag(WRAPPER_TAG.into()).select(&tree, root).is_empty());
    }

    #[test]
    fn test_selector_from_value() {
        assert!(matches!(
            Selector::from_value(&Value::HookName("door".into())),
            Ok(Selector::Name(name)) if name == "door"
        ));
        assert!(Selector::from_value(&Value::Number(1.0)).is_err());
    }
}
