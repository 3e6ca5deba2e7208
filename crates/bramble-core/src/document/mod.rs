//! The document interface the engine renders into.
//!
//! The engine never assumes a browser DOM. It needs node creation, child
//! replace/append/prepend, attribute and bookkeeping read-write, and a
//! document-order comparison; everything else is derived here as default
//! methods on [`Document`].

mod tree;


use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

pub use tree::Tree;

use crate::{
    changer::Changer,
    enchantment::EnchantmentId,
    markup::{Markup, Statement},
    runner::Expr,
    scope::Scope,
};

/// Opaque handle to a node of a [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Relative position of two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOrder {
    Same,
    /// The first node precedes the second and does not contain it
    Before,
    After,
    /// The first node is an ancestor of the second
    Contains,
    /// The first node is a descendant of the second
    ContainedBy,
    /// The nodes share no root
    Disconnected,
}

/// An expression node's code and queued blockers
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionData {
    pub code: Expr,
    pub blockers: VecDeque<Expr>,
    /// Set while the command this expression ran is suspended
    pub awaiting_resume: bool,
}

/// Engine bookkeeping attached to a node
#[derive(Debug, Clone, Default)]
pub struct NodeData {
    /// Original unrendered source of a hook
    pub source: Option<Vec<Markup>>,
    pub expression: Option<ExpressionData>,
    pub statements: Option<Vec<Statement>>,
    /// Hidden hooks keep their source and are skipped until revealed
    pub hidden: bool,
    /// Temp scope the hook was reached in, for later reveals
    pub scope: Option<Scope>,
    /// Changer attached by a preceding expression
    pub changer: Option<Changer>,
    /// Set on wrappers created by an enchantment
    pub enchantment: Option<EnchantmentId>,
}

pub trait Document {
    fn root(&self) -> NodeId;
    fn create_element(&mut self, tag: &str) -> NodeId;
    fn create_text(&mut self, text: &str) -> NodeId;
    fn parent(&self, node: NodeId) -> Option<NodeId>;
    fn children(&self, node: NodeId) -> &[NodeId];
    /// Element tag, or `None` for text nodes
    fn tag(&self, node: NodeId) -> Option<&str>;
    /// Text of a text node, or `None` for elements
    fn text(&self, node: NodeId) -> Option<&str>;
    fn set_text(&mut self, node: NodeId, text: &str);
    fn attr(&self, node: NodeId, name: &str) -> Option<&str>;
    fn set_attr(&mut self, node: NodeId, name: &str, value: &str);
    fn remove_attr(&mut self, node: NodeId, name: &str);
    fn attrs(&self, node: NodeId) -> Vec<(String, String)>;
    /// Move `child` to the end of `parent`'s children
    fn append_child(&mut self, parent: NodeId, child: NodeId);
    /// Move `child` in front of `reference`, or to the end when `None`
    fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>);
    /// Remove a node (and its subtree) from its parent
    fn detach(&mut self, node: NodeId);
    fn data(&self, node: NodeId) -> &NodeData;
    fn data_mut(&mut self, node: NodeId) -> &mut NodeData;

    /// Whether the node is reachable from the root
    fn is_attached(&self, node: NodeId) -> bool {
        let root = self.root();
        let mut current = Some(node);
        while let Some(id) = current {
            if id == root {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Ancestors of `node`, nearest first
    fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut current = self.parent(node);
        while let Some(id) = current {
            result.push(id);
            current = self.parent(id);
        }
        result
    }

    /// All descendants in document order, excluding `node` itself
    fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            result.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        result
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|&id| id == node)?;
        siblings.get(index + 1).copied()
    }

    fn prepend_child(&mut self, parent: NodeId, child: NodeId) {
        let first = self.children(parent).first().copied();
        self.insert_before(parent, child, first);
    }

    fn clear_children(&mut self, node: NodeId) {
        for child in self.children(node).to_vec() {
            self.detach(child);
        }
    }

    /// Replace `node` with `replacement` in its parent
    fn replace_with(&mut self, node: NodeId, replacement: NodeId) -> bool {
        let Some(parent) = self.parent(node) else {
            return false;
        };
        self.insert_before(parent, replacement, Some(node));
        self.detach(node);
        true
    }

    /// Put `node` inside a new element that takes its place
    fn wrap(&mut self, node: NodeId, tag: &str) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let wrapper = self.create_element(tag);
        self.insert_before(parent, wrapper, Some(node));
        self.append_child(wrapper, node);
        Some(wrapper)
    }

    /// Move a wrapper's children into its place and drop the wrapper
    fn unwrap(&mut self, wrapper: NodeId) {
        let Some(parent) = self.parent(wrapper) else {
            return;
        };
        for child in self.children(wrapper).to_vec() {
            self.insert_before(parent, child, Some(wrapper));
        }
        self.detach(wrapper);
    }

    /// Merge runs of adjacent text children
    fn normalize(&mut self, node: NodeId) {
        let children = self.children(node).to_vec();
        let mut previous: Option<NodeId> = None;
        for child in children {
            match (previous, self.text(child).map(str::to_owned)) {
                (Some(prev), Some(text)) => {
                    let merged = format!("{}{}", self.text(prev).unwrap_or_default(), text);
                    self.set_text(prev, &merged);
                    self.detach(child);
                }
                (None, Some(_)) => previous = Some(child),
                (_, None) => previous = None,
            }
        }
    }

    /// Whether `ancestor` strictly contains `node`
    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.parent(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Position of `a` relative to `b` in document order
    fn compare_order(&self, a: NodeId, b: NodeId) -> DocumentOrder {
        if a == b {
            return DocumentOrder::Same;
        }
        if self.contains(a, b) {
            return DocumentOrder::Contains;
        }
        if self.contains(b, a) {
            return DocumentOrder::ContainedBy;
        }

        let path_to = |node: NodeId| {
            let mut path = self.ancestors(node);
            path.reverse();
            path.push(node);
            path
        };
        let (path_a, path_b) = (path_to(a), path_to(b));
        if path_a.first() != path_b.first() {
            return DocumentOrder::Disconnected;
        }
        let split = path_a
            .iter()
            .zip(&path_b)
            .take_while(|(x, y)| x == y)
            .count();
        let parent = path_a[split - 1];
        let siblings = self.children(parent);
        let index_of = |id: NodeId| siblings.iter().position(|&s| s == id);
        match (index_of(path_a[split]), index_of(path_b[split])) {
            (Some(x), Some(y)) if x < y => DocumentOrder::Before,
            (Some(_), Some(_)) => DocumentOrder::After,
            _ => DocumentOrder::Disconnected,
        }
    }

    /// Every attached hook with this name
    fn find_hooks(&self, name: &str) -> Vec<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .filter(|&id| self.tag(id) == Some("tw-hook") && self.attr(id, "name") == Some(name))
            .collect()
    }

    /// Concatenated text of a subtree
    fn text_content(&self, node: NodeId) -> String {
        if let Some(text) = self.text(node) {
            return text.to_string();
        }
        let mut out = String::new();
        for id in self.descendants(node) {
            if let Some(text) = self.text(id) {
                out.push_str(text);
            }
        }
        out
    }

    /// Deterministic HTML-like serialisation of a subtree
    fn to_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        write_html(self, node, &mut out);
        out
    }
}

const VOID_TAGS: &[&str] = &["br", "hr", "img", "input"];

fn write_html<D: Document + ?Sized>(doc: &D, node: NodeId, out: &mut String) {
    let Some(tag) = doc.tag(node) else {
        out.push_str(&escape(doc.text(node).unwrap_or_default(), false));
        return;
    };
    out.push('<');
    out.push_str(tag);
    for (name, value) in doc.attrs(node) {
        out.push_str(&format!(" {name}=\"{}\"", escape(&value, true)));
    }
    out.push('>');
    if VOID_TAGS.contains(&tag) {
        return;
    }
    for &child in doc.children(node) {
        write_html(doc, child, out);
    }
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
