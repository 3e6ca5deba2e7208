//! The markup source model.
//!
//! This is what a parser hands to the engine: raw, unrendered content. A
//! descriptor materialises markup into document nodes; hooks and expressions
//! keep their source in [`NodeData`](crate::document::NodeData) so the engine
//! can run (or re-run) them later.

use std::collections::VecDeque;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    document::{Document, ExpressionData, NodeId},
    macros::MacroRegistry,
    runner::Expr,
};

/// One piece of raw content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Markup {
    Text {
        text: String,
    },
    /// A named or anonymous hook region
    Hook {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        body: Vec<Markup>,
    },
    /// A macro call or other expression, optionally preceded by queued
    /// blocking sub-computations
    Expression {
        code: Expr,
        #[serde(default)]
        blockers: Vec<Expr>,
    },
    /// Inline statements run for their side effects
    Script {
        statements: Vec<Statement>,
    },
    Element {
        tag: String,
        #[serde(default)]
        attrs: IndexMap<String, String>,
        #[serde(default)]
        body: Vec<Markup>,
    },
    /// Whitespace-collapsing region
    Collapsed {
        body: Vec<Markup>,
    },
    Break,
}

/// A raw side-effect statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Statement {
    /// Bind a temp variable in the current scope
    Set { name: String, value: Expr },
    /// Evaluate and discard
    Eval { expr: Expr },
}

impl Markup {
    pub fn text(text: impl Into<String>) -> Self {
        Markup::Text { text: text.into() }
    }

    pub fn hook(body: Vec<Markup>) -> Self {
        Markup::Hook { name: None, body }
    }

    pub fn named_hook(name: impl Into<String>, body: Vec<Markup>) -> Self {
        Markup::Hook {
            name: Some(name.into()),
            body,
        }
    }

    pub fn expr(code: Expr) -> Self {
        Markup::Expression {
            code,
            blockers: Vec::new(),
        }
    }

    /// An expression whose blockers run, in order, before its main code
    pub fn blocking(blockers: Vec<Expr>, code: Expr) -> Self {
        Markup::Expression { code, blockers }
    }

    pub fn element(tag: impl Into<String>, body: Vec<Markup>) -> Self {
        Markup::Element {
            tag: tag.into(),
            attrs: IndexMap::new(),
            body,
        }
    }

    pub fn collapsed(body: Vec<Markup>) -> Self {
        Markup::Collapsed { body }
    }

    pub fn script(statements: Vec<Statement>) -> Self {
        Markup::Script { statements }
    }
}

/// Create detached document nodes for a run of markup.
///
/// Hook bodies are not materialised; they are stored on the hook and
/// rendered when the engine reaches the hook.
pub fn materialize(doc: &mut dyn Document, source: &[Markup]) -> Vec<NodeId> {
    source.iter().map(|markup| materialize_one(doc, markup)).collect()
}

fn materialize_one(doc: &mut dyn Document, markup: &Markup) -> NodeId {
    match markup {
        Markup::Text { text } => doc.create_text(text),
        Markup::Hook { name, body } => {
            let node = doc.create_element("tw-hook");
            if let Some(name) = name {
                doc.set_attr(node, "name", name);
            }
            doc.data_mut(node).source = Some(body.clone());
            node
        }
        Markup::Expression { code, blockers } => {
            let node = doc.create_element("tw-expression");
            if let Expr::Call { name, .. } = code {
                doc.set_attr(node, "name", &MacroRegistry::normalize(name));
            }
            doc.data_mut(node).expression = Some(ExpressionData {
                code: code.clone(),
                blockers: blockers.iter().cloned().collect::<VecDeque<_>>(),
                awaiting_resume: false,
            });
            node
        }
        Markup::Script { statements } => {
            let node = doc.create_element("tw-script");
            doc.data_mut(node).statements = Some(statements.clone());
            node
        }
        Markup::Element { tag, attrs, body } => {
            let node = doc.create_element(tag);
            for (name, value) in attrs {
                doc.set_attr(node, name, value);
            }
            for child in materialize(doc, body) {
                doc.append_child(node, child);
            }
            node
        }
        Markup::Collapsed { body } => {
            let node = doc.create_element("tw-collapsed");
            for child in materialize(doc, body) {
                doc.append_child(node, child);
            }
            node
        }
        Markup::Break => doc.create_element("br"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Tree;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_markup_from_json() {
        let json = r#"[
            {"type": "text", "text": "Hello "},
            {"type": "hook", "name": "door", "body": [{"type": "text", "text": "shut"}]},
            {"type": "expression", "code": {"op": "call", "name": "print", "args": [{"op": "number", "value": 3}]}},
            {"type": "break"}
        ]"#;
        let markup: Vec<Markup> = serde_json::from_str(json).unwrap();
        assert_eq!(markup.len(), 4);
        assert_eq!(markup[0], Markup::text("Hello "));
        assert_eq!(
            markup[1],
            Markup::named_hook("door", vec![Markup::text("shut")])
        );
        assert_eq!(markup[3], Markup::Break);
    }

    #[test]
    fn test_materialize_keeps_hook_source_unrendered() {
        let mut tree = Tree::new();
        let nodes = materialize(
            &mut tree,
            &[
                Markup::text("a"),
                Markup::named_hook("x", vec![Markup::text("inside")]),
            ],
        );
        assert_eq!(nodes.len(), 2);
        assert_eq!(tree.tag(nodes[1]), Some("tw-hook"));
        assert!(tree.children(nodes[1]).is_empty());
        assert_eq!(
            tree.data(nodes[1]).source,
            Some(vec![Markup::text("inside")])
        );
    }

    #[test]
    fn test_materialize_names_expressions_after_their_macro() {
        let mut tree = Tree::new();
        let nodes = materialize(&mut tree, &[Markup::expr(Expr::call("Go_To", vec![]))]);
        assert_eq!(tree.attr(nodes[0], "name"), Some("goto"));
    }
}
