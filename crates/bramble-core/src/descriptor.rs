//! Change descriptors: the mutable record of one rendering operation.

use std::{fmt, sync::Arc, time::Duration};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    changer::Changer,
    document::{Document, NodeId},
    enchantment::{Enchantment, Selector},
    error::RenderError,
    markup::{self, Markup},
    value::{Lambda, Value},
};

/// How rendered content is placed into its target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendMode {
    #[default]
    Replace,
    Append,
    Prepend,
}

/// An extra region that receives the output instead of the attached hook
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub target: Selector,
    pub mode: AppendMode,
    /// Position among the redirects that produced this list
    pub order: usize,
}

/// Timer-driven re-rendering of the target
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSpec {
    pub delay: Duration,
    /// When present, render once as soon as this returns true
    pub predicate: Option<Lambda>,
}

/// An event listener set up by the changer
#[derive(Debug, Clone)]
pub struct EventSpec {
    /// Regions that receive the event
    pub selector: Selector,
    pub kind: String,
    /// Retire the listener after it fires
    pub once: bool,
    /// Only match inside the descriptor's own target
    pub within_target: bool,
    /// How the deferred content is placed into the target when fired
    pub mode: AppendMode,
    /// Deferred content; the descriptor's source when absent
    pub source: Option<Vec<Markup>>,
}

/// Builds a scoped enchantment for a rendered target
pub type EnchantmentFactory = Arc<dyn Fn(NodeId) -> Enchantment + Send + Sync>;

#[derive(Clone)]
pub struct ChangeDescriptor {
    pub target: Option<NodeId>,
    pub source: Vec<Markup>,
    pub append_mode: AppendMode,
    pub enabled: bool,
    pub additional_targets: Vec<TargetSpec>,
    pub loop_bindings: IndexMap<String, Vec<Value>>,
    pub defer_transition: bool,
    pub transition: Option<String>,
    pub live: Option<LiveSpec>,
    pub event: Option<EventSpec>,
    pub inner_enchantments: Vec<EnchantmentFactory>,
    pub styles: IndexMap<String, String>,
    pub attributes: IndexMap<String, String>,
}

impl Default for ChangeDescriptor {
    fn default() -> Self {
        Self {
            target: None,
            source: Vec::new(),
            append_mode: AppendMode::Replace,
            enabled: true,
            additional_targets: Vec::new(),
            loop_bindings: IndexMap::new(),
            defer_transition: false,
            transition: None,
            live: None,
            event: None,
            inner_enchantments: Vec::new(),
            styles: IndexMap::new(),
            attributes: IndexMap::new(),
        }
    }
}

impl fmt::Debug for ChangeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeDescriptor")
            .field("target", &self.target)
            .field("append_mode", &self.append_mode)
            .field("enabled", &self.enabled)
            .field("additional_targets", &self.additional_targets)
            .field("loop_bindings", &self.loop_bindings)
            .field("transition", &self.transition)
            .field("live", &self.live)
            .field("event", &self.event)
            .field("inner_enchantments", &self.inner_enchantments.len())
            .field("styles", &self.styles)
            .finish_non_exhaustive()
    }
}

impl ChangeDescriptor {
    pub fn new(target: Option<NodeId>, source: Vec<Markup>) -> Self {
        Self {
            target,
            source,
            ..Self::default()
        }
    }

    /// Register a redirect. Duplicates are merged when rendering.
    pub fn add_target(&mut self, target: Selector, mode: AppendMode) {
        let order = self.additional_targets.len();
        self.additional_targets.push(TargetSpec {
            target,
            mode,
            order,
        });
    }

    /// Materialise the source into the target(s) and return the new nodes.
    ///
    /// Consumes the descriptor: each instance renders at most once. A
    /// disabled descriptor hides its target and keeps the source on it.
    pub fn render(self, doc: &mut dyn Document) -> Result<Vec<NodeId>, RenderError> {
        if !self.enabled {
            let target = self.target.ok_or(RenderError::NoTarget)?;
            let data = doc.data_mut(target);
            data.hidden = true;
            data.source = Some(self.source);
            trace!(target = target.0, "descriptor disabled; target hidden");
            return Ok(Vec::new());
        }

        if !self.additional_targets.is_empty() {
            return Ok(self.render_redirected(doc));
        }

        let target = self.target.ok_or(RenderError::NoTarget)?;
        Ok(self.render_into(doc, target, self.append_mode))
    }

    fn render_redirected(&self, doc: &mut dyn Document) -> Vec<NodeId> {
        let mut specs = self.additional_targets.clone();
        specs.sort_by_key(|spec| spec.order);

        let root = doc.root();
        let mut resolved: Vec<(NodeId, AppendMode)> = Vec::new();
        for spec in &specs {
            for node in spec.target.resolve(doc, root, "tw-pseudo-hook") {
                if Some(node) == self.target {
                    continue;
                }
                if !resolved.contains(&(node, spec.mode)) {
                    resolved.push((node, spec.mode));
                }
            }
        }

        if let Some(original) = self.target {
            doc.clear_children(original);
            doc.data_mut(original).hidden = false;
        }
        let mut content = Vec::new();
        for (node, mode) in resolved {
            content.extend(self.render_into(doc, node, mode));
        }
        content
    }

    fn render_into(&self, doc: &mut dyn Document, target: NodeId, mode: AppendMode) -> Vec<NodeId> {
        let nodes = markup::materialize(doc, &self.source);
        doc.data_mut(target).hidden = false;

        let decorated = !self.styles.is_empty()
            || !self.attributes.is_empty()
            || self.transition.is_some();
        match mode {
            AppendMode::Replace => {
                doc.clear_children(target);
                for &node in &nodes {
                    doc.append_child(target, node);
                }
                self.decorate(doc, target);
                nodes
            }
            AppendMode::Append | AppendMode::Prepend => {
                let inserted = if decorated {
                    let container = doc.create_element("tw-transition-container");
                    for &node in &nodes {
                        doc.append_child(container, node);
                    }
                    self.decorate(doc, container);
                    vec![container]
                } else {
                    nodes
                };
                if mode == AppendMode::Append {
                    for &node in &inserted {
                        doc.append_child(target, node);
                    }
                } else {
                    let first = doc.children(target).first().copied();
                    for &node in &inserted {
                        doc.insert_before(target, node, first);
                    }
                }
                inserted
            }
        }
    }

    fn decorate(&self, doc: &mut dyn Document, node: NodeId) {
        if !self.styles.is_empty() {
            let style: Vec<String> = self
                .styles
                .iter()
                .map(|(name, value)| format!("{name}: {value}"))
                .collect();
            doc.set_attr(node, "style", &style.join("; "));
        }
        for (name, value) in &self.attributes {
            doc.set_attr(node, name, value);
        }
        if let Some(transition) = &self.transition {
            doc.set_attr(node, "data-t8n", transition);
        }
        if self.defer_transition {
            doc.set_attr(node, "data-t8n-defer", "true");
        }
    }

    /// Apply only the decoration (styles and attributes) to `node`
    pub fn update(&self, doc: &mut dyn Document, node: NodeId) {
        self.decorate(doc, node);
    }
}

/// A structural edit applied directly onto a descriptor
#[derive(Debug, Clone, Default)]
pub struct DescriptorPatch {
    pub target: Option<NodeId>,
    pub source: Option<Vec<Markup>>,
    pub append_mode: Option<AppendMode>,
    pub enabled: Option<bool>,
    pub transition: Option<String>,
    pub loop_bindings: Option<IndexMap<String, Vec<Value>>>,
    pub styles: Option<IndexMap<String, String>>,
    pub attributes: Option<IndexMap<String, String>>,
    pub live: Option<LiveSpec>,
    pub event: Option<EventSpec>,
}

impl DescriptorPatch {
    pub fn is_empty(&self) -> bool {
        self.target.is_none()
            && self.source.is_none()
            && self.append_mode.is_none()
            && self.enabled.is_none()
            && self.transition.is_none()
            && self.loop_bindings.is_none()
            && self.styles.is_none()
            && self.attributes.is_none()
            && self.live.is_none()
            && self.event.is_none()
    }

    /// Overwrite the descriptor's fields with every field set here
    pub fn apply_to(self, descriptor: &mut ChangeDescriptor) {
        if let Some(target) = self.target {
            descriptor.target = Some(target);
        }
        if let Some(source) = self.source {
            descriptor.source = source;
        }
        if let Some(mode) = self.append_mode {
            descriptor.append_mode = mode;
        }
        if let Some(enabled) = self.enabled {
            descriptor.enabled = enabled;
        }
        if let Some(transition) = self.transition {
            descriptor.transition = Some(transition);
        }
        if let Some(bindings) = self.loop_bindings {
            descriptor.loop_bindings.extend(bindings);
        }
        if let Some(styles) = self.styles {
            descriptor.styles.extend(styles);
        }
        if let Some(attributes) = self.attributes {
            descriptor.attributes.extend(attributes);
        }
        if let Some(live) = self.live {
            descriptor.live = Some(live);
        }
        if let Some(event) = self.event {
            descriptor.event = Some(event);
        }
    }

    /// Wrap this patch as a single-step changer
    pub fn into_changer(self) -> Changer {
        Changer::new("patch", Vec::new(), move |descriptor| {
            self.clone().apply_to(descriptor);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::document::Tree;

    fn hook(tree: &mut Tree, name: &str) -> NodeId {
        let root = tree.root();
        let node = tree.create_element("tw-hook");
        tree.set_attr(node, "name", name);
        tree.append_child(root, node);
        node
    }

    #[test]
    fn test_replace_renders_and_styles_target() {
        let mut tree = Tree::new();
        let target = hook(&mut tree, "a");
        let mut descriptor = ChangeDescriptor::new(Some(target), vec![Markup::text("hi")]);
        descriptor.styles.insert("color".into(), "red".into());
        let nodes = descriptor.render(&mut tree).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(
            tree.to_html(target),
            "<tw-hook name=\"a\" style=\"color: red\">hi</tw-hook>"
        );
    }

    #[test]
    fn test_disabled_descriptor_hides_and_keeps_source() {
        let mut tree = Tree::new();
        let target = hook(&mut tree, "a");
        let mut descriptor = ChangeDescriptor::new(Some(target), vec![Markup::text("secret")]);
        descriptor.enabled = false;
        assert!(descriptor.render(&mut tree).unwrap().is_empty());
        assert!(tree.data(target).hidden);
        assert_eq!(tree.data(target).source, Some(vec![Markup::text("secret")]));
        assert!(tree.children(target).is_empty());
    }

    #[test]
    fn test_decorated_append_uses_transition_container() {
        let mut tree = Tree::new();
        let target = hook(&mut tree, "a");
        let existing = tree.create_text("old ");
        tree.append_child(target, existing);

        let mut descriptor = ChangeDescriptor::new(Some(target), vec![Markup::text("new")]);
        descriptor.append_mode = AppendMode::Append;
        descriptor.transition = Some("dissolve".into());
        descriptor.render(&mut tree).unwrap();
        assert_eq!(
            tree.to_html(target),
            "<tw-hook name=\"a\">old <tw-transition-container data-t8n=\"dissolve\">new</tw-transition-container></tw-hook>"
        );
    }

    #[test]
    fn test_redirect_leaves_original_empty() {
        let mut tree = Tree::new();
        let original = hook(&mut tree, "src");
        let destination = hook(&mut tree, "dest");
        let mut descriptor = ChangeDescriptor::new(Some(original), vec![Markup::text("moved")]);
        descriptor.add_target(Selector::Name("dest".into()), AppendMode::Prepend);
        descriptor.render(&mut tree).unwrap();
        assert_eq!(tree.text_content(original), "");
        assert_eq!(tree.text_content(destination), "moved");
    }

    #[test]
    fn test_duplicate_redirects_are_merged() {
        let mut tree = Tree::new();
        let original = hook(&mut tree, "src");
        let destination = hook(&mut tree, "dest");
        let mut descriptor = ChangeDescriptor::new(Some(original), vec![Markup::text("x")]);
        descriptor.add_target(Selector::Name("dest".into()), AppendMode::Append);
        descriptor.add_target(Selector::Name("dest".into()), AppendMode::Append);
        descriptor.add_target(Selector::Name("dest".into()), AppendMode::Prepend);
        descriptor.render(&mut tree).unwrap();
        assert_eq!(tree.text_content(destination), "xx");
    }

    #[test]
    fn test_missing_target_is_an_error() {
        let mut tree = Tree::new();
        let descriptor = ChangeDescriptor::new(None, vec![Markup::text("lost")]);
        assert_eq!(descriptor.render(&mut tree), Err(RenderError::NoTarget));
    }

    #[test]
    fn test_patch_overrides_fields() {
        let mut descriptor = ChangeDescriptor::default();
        DescriptorPatch {
            append_mode: Some(AppendMode::Prepend),
            enabled: Some(false),
            ..Default::default()
        }
        .apply_to(&mut descriptor);
        assert_eq!(descriptor.append_mode, AppendMode::Prepend);
        assert!(!descriptor.enabled);
    }
}
