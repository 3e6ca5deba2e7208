//! The frame-stack execution engine.
//!
//! Rendering pushes a [`Frame`] per render operation and drains it with
//! [`Engine::execute`]. Suspension is structural: a command that must wait
//! for input marks the top frame blocked and the walk simply stops there.
//! The frame keeps its cursor, so [`Engine::unblock`] resumes exactly where
//! the walk left off.

mod dispatch;
mod live;

#[cfg(test)]
mod tests;

use std::{
    cmp::Ordering,
    collections::VecDeque,
    mem,
    sync::{Arc, LazyLock},
    time::Instant,
};

use regex::Regex;
use tracing::{debug, error, trace, warn};

use crate::{
    changer::{Changer, CommandOutcome, CommandSite},
    descriptor::{AppendMode, ChangeDescriptor, DescriptorPatch},
    document::{Document, DocumentOrder, NodeId},
    enchantment::{EnchantEffect, Enchantment, EnchantmentId, EventBinding},
    error::RenderError,
    identifiers::{Identifiers, StoryState},
    macros::MacroRegistry,
    markup::{Markup, Statement},
    runner::{self, EvalContext, Expr},
    scope::Scope,
    value::Value,
    BrambleConfig, BrambleError,
};

use live::LiveLoop;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Whether a frame is suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockState {
    #[default]
    Free,
    Blocked,
    /// Suspended on an element (a dialog) that is removed on unblock
    BlockedOn(NodeId),
}

/// One in-progress render operation
#[derive(Debug)]
pub struct Frame {
    /// Pending render, taken once materialised
    pub descriptor: Option<ChangeDescriptor>,
    /// Top-level nodes the descriptor produced
    pub content: Vec<NodeId>,
    /// Hooks, expressions and scripts still to visit, in document order
    cursor: VecDeque<NodeId>,
    pub target: Option<NodeId>,
    pub scope: Scope,
    pub collapses: bool,
    pub blocked: BlockState,
    pub blocked_values: VecDeque<Value>,
    pub is_final_iteration: bool,
    pub evaluate_only: Option<String>,
    pub lambda_position: Option<usize>,
    /// Whether the last hook this frame reached was shown
    pub last_hook_shown: Option<bool>,
}

impl Frame {
    fn new(descriptor: Option<ChangeDescriptor>, scope: Scope) -> Self {
        let target = descriptor.as_ref().and_then(|d| d.target);
        Self {
            descriptor,
            content: Vec::new(),
            cursor: VecDeque::new(),
            target,
            scope,
            collapses: false,
            blocked: BlockState::Free,
            blocked_values: VecDeque::new(),
            is_final_iteration: true,
            evaluate_only: None,
            lambda_position: None,
            last_hook_shown: None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked != BlockState::Free
    }

    /// Nodes not yet visited
    pub fn pending(&self) -> usize {
        self.cursor.len()
    }
}

/// How a render call edits its descriptor before rendering
#[derive(Debug, Clone, Default)]
pub enum Modification {
    #[default]
    None,
    /// Run a changer against the descriptor
    Changer(Changer),
    /// Copy fields straight onto the descriptor
    Patch(DescriptorPatch),
}

type Deferred = Box<dyn FnOnce(&mut Engine)>;

pub struct Engine {
    document: Box<dyn Document>,
    stack: Vec<Frame>,
    base_scope: Scope,
    enchantments: Vec<Enchantment>,
    live_loops: Vec<LiveLoop>,
    deferred: VecDeque<Deferred>,
    macros: Arc<MacroRegistry>,
    state: Box<dyn StoryState>,
    config: BrambleConfig,
    render_started: Instant,
    attached: bool,
    next_enchantment: usize,
    next_live_loop: usize,
    pending_navigation: Option<String>,
}

impl Engine {
    pub fn new(document: Box<dyn Document>, state: Box<dyn StoryState>, config: BrambleConfig) -> Self {
        Self::with_macros(document, state, config, Arc::new(MacroRegistry::with_builtins()))
    }

    pub fn with_macros(
        document: Box<dyn Document>,
        state: Box<dyn StoryState>,
        config: BrambleConfig,
        macros: Arc<MacroRegistry>,
    ) -> Self {
        Self {
            document,
            stack: Vec::new(),
            base_scope: Scope::root("passage"),
            enchantments: Vec::new(),
            live_loops: Vec::new(),
            deferred: VecDeque::new(),
            macros,
            state,
            config,
            render_started: Instant::now(),
            attached: true,
            next_enchantment: 0,
            next_live_loop: 0,
            pending_navigation: None,
        }
    }

    pub fn document(&self) -> &dyn Document {
        &*self.document
    }

    pub fn document_mut(&mut self) -> &mut dyn Document {
        &mut *self.document
    }

    pub fn story(&self) -> &dyn StoryState {
        &*self.state
    }

    pub fn config(&self) -> &BrambleConfig {
        &self.config
    }

    pub fn macros(&self) -> &MacroRegistry {
        &self.macros
    }

    pub fn base_scope(&self) -> &Scope {
        &self.base_scope
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.stack
    }

    /// Whether the top frame is suspended
    pub fn is_blocked(&self) -> bool {
        self.stack.last().is_some_and(Frame::is_blocked)
    }

    /// The element the top frame is suspended on, if any
    pub fn blocking_element(&self) -> Option<NodeId> {
        match self.stack.last()?.blocked {
            BlockState::BlockedOn(node) => Some(node),
            _ => None,
        }
    }

    pub fn enchantment_count(&self) -> usize {
        self.enchantments.len()
    }

    pub fn enchantments(&self) -> &[Enchantment] {
        &self.enchantments
    }

    pub fn live_loop_count(&self) -> usize {
        self.live_loops.len()
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Stop all live loops permanently
    pub fn detach(&mut self) {
        debug!(live_loops = self.live_loops.len(), "engine detached");
        self.attached = false;
        self.live_loops.clear();
    }

    fn current_scope(&self) -> &Scope {
        self.stack.last().map_or(&self.base_scope, |frame| &frame.scope)
    }

    /// Render `source` into `target`, returning whether the descriptor ended
    /// up enabled.
    ///
    /// `scope` defaults to a fresh child of the current frame's scope.
    pub fn render_into(
        &mut self,
        source: Vec<Markup>,
        target: Option<NodeId>,
        modification: Modification,
        scope: Option<Scope>,
    ) -> bool {
        let mut descriptor = ChangeDescriptor::new(target, source);
        match modification {
            Modification::None => {}
            Modification::Changer(changer) => {
                if let Err(err) = changer.run(&mut descriptor) {
                    match target {
                        Some(node) => self.render_error(node, &err),
                        None => warn!(%err, "changer failed with no target to report into"),
                    }
                    return false;
                }
            }
            Modification::Patch(patch) => patch.apply_to(&mut descriptor),
        }
        let scope = scope.unwrap_or_else(|| self.current_scope().child("render"));
        self.render_descriptor(descriptor, scope)
    }

    pub(crate) fn render_descriptor(&mut self, mut descriptor: ChangeDescriptor, scope: Scope) -> bool {
        let depth = self.stack.iter().filter(|frame| frame.is_final_iteration).count();
        if depth >= self.config.max_recursion_depth {
            let err = RenderError::RecursionLimit { depth };
            warn!(depth, "recursion limit reached");
            match descriptor.target {
                Some(node) => self.render_error(node, &err),
                None => warn!(%err, "recursion limit reached with no target"),
            }
            return false;
        }

        if let Some(live) = descriptor.live.take() {
            let Some(target) = descriptor.target else {
                warn!("live changer used without a target");
                return false;
            };
            let data = self.document.data_mut(target);
            data.hidden = true;
            data.source = Some(descriptor.source.clone());
            self.start_live_loop(target, live, descriptor, scope);
            return false;
        }

        if let Some(event) = descriptor.event.take() {
            match descriptor.target {
                Some(target) => {
                    let binding = EventBinding {
                        kind: event.kind,
                        source: event.source.unwrap_or_else(|| descriptor.source.clone()),
                        target,
                        mode: event.mode,
                        once: event.once,
                        scope: scope.clone(),
                    };
                    let mut enchantment =
                        Enchantment::new(event.selector, EnchantEffect::Inert, scope.clone())
                            .owned_by(target)
                            .with_event(binding);
                    if event.within_target {
                        enchantment = enchantment.within(target);
                    }
                    self.register_enchantment(enchantment);
                }
                None => warn!("event changer used without a target"),
            }
        }

        if let Some(target) = descriptor.target {
            for factory in mem::take(&mut descriptor.inner_enchantments) {
                self.register_enchantment(factory(target));
            }
        }

        let enabled = descriptor.enabled;
        let was_blocked = self.is_blocked();
        let base = self.stack.len();

        if descriptor.loop_bindings.is_empty() {
            let mut frame = Frame::new(Some(descriptor), scope);
            frame.collapses = self.collapses_at(frame.target);
            debug!(depth = base + 1, target = ?frame.target, "push frame");
            self.stack.push(frame);
        } else {
            self.push_loop_frames(descriptor, scope);
        }

        while self.stack.len() > base && !self.is_blocked() {
            self.execute();
        }

        if self.stack.is_empty() || (!was_blocked && self.is_blocked()) {
            self.update_enchantments();
        }
        if self.stack.is_empty() {
            self.run_pending_navigation();
        }
        enabled
    }

    /// Push one frame per loop index, last index first so the stack
    /// visits them in ascending order
    fn push_loop_frames(&mut self, mut descriptor: ChangeDescriptor, scope: Scope) {
        let bindings = mem::take(&mut descriptor.loop_bindings);
        let count = bindings.values().map(Vec::len).min().unwrap_or(0);
        if descriptor.append_mode == AppendMode::Replace {
            if let Some(target) = descriptor.target {
                self.document.clear_children(target);
            }
            descriptor.append_mode = AppendMode::Append;
        }
        let collapses = self.collapses_at(descriptor.target);
        for index in (0..count).rev() {
            let iteration_scope = scope.child(format!("loop {index}"));
            for (name, values) in &bindings {
                iteration_scope.set(name.clone(), values[index].clone());
            }
            let mut frame = Frame::new(Some(descriptor.clone()), iteration_scope);
            frame.collapses = collapses;
            frame.is_final_iteration = index + 1 == count;
            self.stack.push(frame);
        }
        debug!(iterations = count, depth = self.stack.len(), "pushed loop frames");
    }

    fn collapses_at(&self, target: Option<NodeId>) -> bool {
        let Some(target) = target else {
            return false;
        };
        let doc = self.document();
        doc.tag(target) == Some("tw-collapsed")
            || doc
                .ancestors(target)
                .iter()
                .any(|&node| doc.tag(node) == Some("tw-collapsed"))
    }

    /// Run the top frame until it finishes or blocks
    pub fn execute(&mut self) {
        let Some(index) = self.stack.len().checked_sub(1) else {
            return;
        };

        if let Some(descriptor) = self.stack[index].descriptor.take() {
            match descriptor.render(&mut *self.document) {
                Ok(content) => {
                    let cursor = self.collect_candidates(&content);
                    let frame = &mut self.stack[index];
                    frame.content = content;
                    frame.cursor = cursor;
                }
                Err(err) => {
                    if let Some(target) = self.stack[index].target {
                        self.render_error(target, &err);
                    }
                    self.stack.pop();
                    return;
                }
            }
        }

        loop {
            if self.stack.len() != index + 1 || self.stack[index].is_blocked() {
                return;
            }
            let Some(node) = self.stack[index].cursor.pop_front() else {
                break;
            };
            if !self.reachable(index, node) {
                continue;
            }
            let tag = self.document.tag(node).map(str::to_owned);
            match tag.as_deref() {
                Some("tw-hook") => self.run_hook(index, node),
                Some("tw-expression") => self.run_expression(index, node),
                Some("tw-script") => self.run_script(index, node),
                _ => {}
            }
        }

        self.collapse_whitespace(index);
        let frame = self.stack.pop();
        debug!(depth = index, target = ?frame.and_then(|f| f.target), "pop frame");
    }

    /// Hooks, expressions and scripts below `roots`, not descending into them
    fn collect_candidates(&self, roots: &[NodeId]) -> VecDeque<NodeId> {
        let doc = self.document();
        let mut found = VecDeque::new();
        let mut pending: Vec<NodeId> = roots.iter().rev().copied().collect();
        while let Some(node) = pending.pop() {
            match doc.tag(node) {
                Some("tw-hook" | "tw-expression" | "tw-script") => found.push_back(node),
                Some(_) => pending.extend(doc.children(node).iter().rev().copied()),
                None => {}
            }
        }
        found
    }

    /// Whether `node` is still inside the region the frame rendered into
    fn reachable(&self, index: usize, node: NodeId) -> bool {
        let doc = self.document();
        let target = self.stack[index].target;
        let root = doc.root();
        let mut current = Some(node);
        while let Some(id) = current {
            if id == root || Some(id) == target {
                return true;
            }
            current = doc.parent(id);
        }
        false
    }

    fn collapse_whitespace(&mut self, index: usize) {
        let frame = &self.stack[index];
        let roots: Vec<NodeId> = if frame.collapses {
            frame.content.clone()
        } else {
            frame
                .content
                .iter()
                .flat_map(|&node| {
                    let mut nodes = vec![node];
                    nodes.extend(self.document.descendants(node));
                    nodes
                })
                .filter(|&node| self.document.tag(node) == Some("tw-collapsed"))
                .collect()
        };
        for root in roots {
            let mut texts = vec![root];
            texts.extend(self.document.descendants(root));
            for node in texts {
                let Some(text) = self.document.text(node) else {
                    continue;
                };
                let collapsed = WHITESPACE.replace_all(text, " ").into_owned();
                if collapsed != text {
                    self.document.set_text(node, &collapsed);
                }
            }
        }
    }

    fn run_hook(&mut self, index: usize, node: NodeId) {
        let scope = self.stack[index].scope.clone();
        if self.document.data(node).hidden {
            trace!(node = node.0, "skipping hidden hook");
            self.document.data_mut(node).scope = Some(scope);
            return;
        }
        let source = self.document.data(node).source.clone().unwrap_or_default();
        let modification = match self.document.data_mut(node).changer.take() {
            Some(changer) => Modification::Changer(changer),
            None => Modification::None,
        };
        let name = self.document.attr(node, "name").unwrap_or("hook").to_string();
        let shown = self.render_into(source, Some(node), modification, Some(scope.child(name)));
        self.stack[index].last_hook_shown = Some(shown);
        self.document.data_mut(node).scope = Some(scope);
    }

    fn run_script(&mut self, index: usize, node: NodeId) {
        let statements = self.document.data(node).statements.clone().unwrap_or_default();
        for statement in &statements {
            let result = match statement {
                Statement::Set { name, value } => self.eval_in_frame(index, value).map(|value| {
                    self.stack[index].scope.set(name.clone(), value);
                }),
                Statement::Eval { expr } => self.eval_in_frame(index, expr).map(drop),
            };
            if let Err(err) = result {
                self.render_error(node, &err);
                return;
            }
        }
    }

    fn run_expression(&mut self, index: usize, node: NodeId) {
        let Some(data) = self.document.data(node).expression.clone() else {
            return;
        };

        if data.awaiting_resume {
            if let Some(expression) = self.document.data_mut(node).expression.as_mut() {
                expression.awaiting_resume = false;
            }
            if let Some(value) = self.stack[index].blocked_values.pop_front() {
                trace!(node = node.0, value = %value.describe(), "resumed command discards its result");
            }
            return;
        }

        if let Some(blocker) = data.blockers.front() {
            if let Some(expression) = self.document.data_mut(node).expression.as_mut() {
                expression.blockers.pop_front();
            }
            self.run_blocker(index, node, blocker);
            return;
        }

        trace!(node = node.0, "evaluating expression");
        let result = self.eval_in_frame(index, &data.code);
        self.dispatch(index, node, result);
    }

    /// Run one queued blocker; its value (now or after unblocking) feeds the
    /// frame's blocked-value queue and the node is visited again
    fn run_blocker(&mut self, index: usize, node: NodeId, blocker: &Expr) {
        let value = match self.eval_in_frame(index, blocker) {
            Ok(value) => value,
            Err(err) => {
                self.render_error(node, &err);
                return;
            }
        };
        let Value::Command(command) = value else {
            self.stack[index].blocked_values.push_back(value);
            self.stack[index].cursor.push_front(node);
            return;
        };

        let site = CommandSite {
            node,
            scope: self.stack[index].scope.clone(),
        };
        match command.run(self, &site) {
            Ok(CommandOutcome::Blocked(element)) => {
                self.block(index, element);
                self.stack[index].cursor.push_front(node);
            }
            Ok(CommandOutcome::Value(value)) => {
                self.stack[index].blocked_values.push_back(value);
                self.stack[index].cursor.push_front(node);
            }
            Ok(_) => {
                self.stack[index].cursor.push_front(node);
            }
            Err(err) => self.render_error(node, &err),
        }
    }

    fn block(&mut self, index: usize, element: Option<NodeId>) {
        let state = element.map_or(BlockState::Blocked, BlockState::BlockedOn);
        debug!(depth = index, ?state, "frame blocked");
        self.stack[index].blocked = state;
    }

    /// Evaluate against frame `index`'s scope and queues
    fn eval_in_frame(&mut self, index: usize, expr: &Expr) -> Result<Value, RenderError> {
        let Engine {
            document,
            stack,
            macros,
            state,
            render_started,
            ..
        } = self;
        let frame = &mut stack[index];
        let mut ctx = EvalContext {
            macros: &**macros,
            scope: &frame.scope,
            identifiers: Identifiers::new(*render_started, &**document, &**state, frame.lambda_position),
            blocked_values: &mut frame.blocked_values,
            last_hook_shown: frame.last_hook_shown,
            evaluate_only: frame.evaluate_only.as_deref(),
        };
        let result = runner::evaluate(expr, &mut ctx)?;
        match (&frame.evaluate_only, &result) {
            (Some(reason), Value::Command(command)) => Err(RenderError::evaluation_context(
                &format!("The ({}:) command", command.name()),
                reason,
            )),
            (Some(reason), Value::Changer(_)) => Err(RenderError::evaluation_context("A changer", reason)),
            _ => Ok(result),
        }
    }

    /// Evaluate `expr` against the current frame, or the base scope when
    /// nothing is rendering. Never touches the document.
    pub fn eval(&mut self, expr: &Expr) -> Result<Value, RenderError> {
        match self.stack.len().checked_sub(1) {
            Some(index) => self.eval_in_frame(index, expr),
            None => {
                let scope = self.base_scope.clone();
                self.evaluate_in(&scope, None, |ctx| runner::evaluate(expr, ctx))
            }
        }
    }

    /// Evaluate where only pure values are allowed; commands, changers and
    /// suspensions become errors
    pub fn evaluate_only(&mut self, expr: &Expr, reason: &str) -> Result<Value, RenderError> {
        let mut frame = Frame::new(None, self.current_scope().child(reason));
        frame.evaluate_only = Some(reason.to_string());
        frame.is_final_iteration = false;
        self.stack.push(frame);
        let index = self.stack.len() - 1;
        let result = self.eval_in_frame(index, expr);
        self.stack.pop();
        result
    }

    /// Run `f` in a temporary frame over `scope`, with `pos` available as the
    /// per-element position
    pub fn evaluate_in<F>(&mut self, scope: &Scope, pos: Option<usize>, f: F) -> Result<Value, RenderError>
    where
        F: FnOnce(&mut EvalContext<'_>) -> Result<Value, RenderError>,
    {
        let mut frame = Frame::new(None, scope.clone());
        frame.lambda_position = pos;
        frame.is_final_iteration = false;
        self.stack.push(frame);

        let result = {
            let Engine {
                document,
                stack,
                macros,
                state,
                render_started,
                ..
            } = &mut *self;
            let frame = stack.last_mut().ok_or_else(|| RenderError::impossible("temporary frame vanished"))?;
            let mut ctx = EvalContext {
                macros: &**macros,
                scope: &frame.scope,
                identifiers: Identifiers::new(*render_started, &**document, &**state, frame.lambda_position),
                blocked_values: &mut frame.blocked_values,
                last_hook_shown: None,
                evaluate_only: None,
            };
            f(&mut ctx)
        };
        self.stack.pop();
        result
    }

    /// Like [`Engine::evaluate_in`], but marked evaluate-only
    pub(crate) fn evaluate_only_in<F>(&mut self, scope: &Scope, reason: &str, f: F) -> Result<Value, RenderError>
    where
        F: FnOnce(&mut EvalContext<'_>) -> Result<Value, RenderError>,
    {
        let mut frame = Frame::new(None, scope.clone());
        frame.evaluate_only = Some(reason.to_string());
        frame.is_final_iteration = false;
        self.stack.push(frame);

        let result = {
            let Engine {
                document,
                stack,
                macros,
                state,
                render_started,
                ..
            } = &mut *self;
            let frame = stack.last_mut().ok_or_else(|| RenderError::impossible("temporary frame vanished"))?;
            let mut ctx = EvalContext {
                macros: &**macros,
                scope: &frame.scope,
                identifiers: Identifiers::new(*render_started, &**document, &**state, None),
                blocked_values: &mut frame.blocked_values,
                last_hook_shown: None,
                evaluate_only: frame.evaluate_only.as_deref(),
            };
            f(&mut ctx)
        };
        self.stack.pop();
        result
    }

    /// Pop one value from the top frame's blocked-value queue
    pub fn blocked_value(&mut self) -> Option<Value> {
        self.stack.last_mut()?.blocked_values.pop_front()
    }

    /// Resume the suspended top frame, optionally handing it a value
    pub fn unblock(&mut self, value: Option<Value>) {
        let Some(frame) = self.stack.last_mut() else {
            warn!("unblock called with nothing rendering");
            return;
        };
        let element = match mem::take(&mut frame.blocked) {
            BlockState::BlockedOn(element) => Some(element),
            _ => None,
        };
        if let Some(value) = value {
            frame.blocked_values.push_back(value);
        }
        if let Some(element) = element {
            self.document.detach(element);
        }
        debug!(depth = self.stack.len(), "unblocked");

        while !self.stack.is_empty() && !self.is_blocked() {
            self.execute();
        }
        self.update_enchantments();

        if self.stack.is_empty() {
            self.run_pending_navigation();
            self.run_deferred();
        }
    }

    fn run_deferred(&mut self) {
        while !self.is_blocked() {
            let Some(callback) = self.deferred.pop_front() else {
                break;
            };
            callback(self);
        }
    }

    /// Run `f` now if nothing is suspended, otherwise once the stack drains
    pub fn when_unblocked<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Engine) + 'static,
    {
        if self.is_blocked() {
            trace!(queued = self.deferred.len() + 1, "deferring callback until unblocked");
            self.deferred.push_back(Box::new(f));
        } else {
            f(self);
        }
    }

    /// Like [`Engine::when_unblocked`], but runs `immediate` instead of `f`
    /// when nothing is suspended
    pub fn when_unblocked_or<F, G>(&mut self, f: F, immediate: G)
    where
        F: FnOnce(&mut Engine) + 'static,
        G: FnOnce(&mut Engine),
    {
        if self.is_blocked() {
            self.deferred.push_back(Box::new(f));
        } else {
            immediate(self);
        }
    }

    /// Render a hidden hook's retained source with the scope it was reached in
    pub fn reveal(&mut self, hook: NodeId) -> bool {
        let data = self.document.data(hook);
        if !data.hidden {
            return false;
        }
        let source = data.source.clone().unwrap_or_default();
        let scope = data.scope.clone();
        let name = self.document.attr(hook, "name").unwrap_or("hook").to_string();
        let scope = scope.map(|scope| scope.child(name));
        self.render_into(source, Some(hook), Modification::None, scope)
    }

    /// Register an enchantment; it takes effect on the next update cycle
    pub fn register_enchantment(&mut self, mut enchantment: Enchantment) -> EnchantmentId {
        let id = EnchantmentId(self.next_enchantment);
        self.next_enchantment += 1;
        enchantment.id = id;
        debug!(enchantment = id.0, selector = ?enchantment.selector, "registered enchantment");
        self.enchantments.push(enchantment);
        id
    }

    /// Tear down every enchantment, then re-apply each one to current content
    pub fn update_enchantments(&mut self) {
        let mut enchantments = mem::take(&mut self.enchantments);
        for enchantment in enchantments.iter_mut().rev() {
            enchantment.disenchant(&mut *self.document);
        }
        let before = enchantments.len();
        enchantments.retain(|enchantment| enchantment.is_live(&*self.document));
        if enchantments.len() != before {
            debug!(dropped = before - enchantments.len(), "dropped enchantments of removed regions");
        }
        for enchantment in enchantments.iter_mut() {
            enchantment.enchant_scope(self);
        }
        let registered_meanwhile = mem::replace(&mut self.enchantments, enchantments);
        self.enchantments.extend(registered_meanwhile);
    }

    /// Replace `node` with an error display
    pub fn render_error(&mut self, node: NodeId, err: &RenderError) {
        if err.is_fatal() {
            error!(node = node.0, kind = err.kind().as_str(), %err, "fatal render error");
        } else {
            debug!(node = node.0, kind = err.kind().as_str(), %err, "render error");
        }
        let doc = &mut *self.document;
        let display = doc.create_element("tw-error");
        doc.set_attr(display, "kind", err.kind().as_str());
        let message = doc.create_text(&err.to_string());
        doc.append_child(display, message);
        if !doc.replace_with(node, display) {
            doc.append_child(node, display);
        }
    }

    /// Navigate to a passage: clears the document and renders the passage
    /// at top level. While anything is rendering, navigation waits until the
    /// stack drains.
    pub fn go_to(&mut self, passage: &str) -> Result<(), BrambleError> {
        if !self.stack.is_empty() {
            debug!(passage, "navigation deferred until the render finishes");
            self.pending_navigation = Some(passage.to_string());
            return Ok(());
        }
        let source = self.state.advance(passage)?;
        let root = self.document.root();
        self.document.clear_children(root);
        self.enchantments.clear();
        self.live_loops.clear();
        self.deferred.clear();
        self.base_scope = Scope::root("passage");
        self.render_started = Instant::now();
        debug!(passage, turns = self.state.turns(), "navigating");
        let scope = self.base_scope.clone();
        self.render_into(source, Some(root), Modification::None, Some(scope));
        Ok(())
    }

    fn run_pending_navigation(&mut self) {
        if let Some(passage) = self.pending_navigation.take() {
            if let Err(err) = self.go_to(&passage) {
                warn!(passage, %err, "navigation failed");
            }
        }
    }

    /// Dispatch an event to every event-bound enchantment whose region
    /// contains `node`, outermost first. Returns how many listeners fired.
    pub fn fire_event(&mut self, node: NodeId, kind: &str) -> usize {
        let doc = self.document();
        let mut hits: Vec<(NodeId, usize)> = Vec::new();
        for (position, enchantment) in self.enchantments.iter().enumerate() {
            if enchantment.event.as_ref().map_or(true, |event| event.kind != kind) {
                continue;
            }
            let outermost = enchantment
                .wrappers()
                .iter()
                .copied()
                .filter(|&wrapper| doc.is_attached(wrapper))
                .find(|&wrapper| wrapper == node || doc.contains(wrapper, node));
            if let Some(wrapper) = outermost {
                hits.push((wrapper, position));
            }
        }
        hits.sort_by(|a, b| match doc.compare_order(a.0, b.0) {
            DocumentOrder::Before | DocumentOrder::Contains => Ordering::Less,
            DocumentOrder::Same => a.1.cmp(&b.1),
            _ => Ordering::Greater,
        });

        let mut retired = Vec::new();
        let mut bindings = Vec::with_capacity(hits.len());
        for &(_, position) in &hits {
            let enchantment = &self.enchantments[position];
            if let Some(binding) = enchantment.event.clone() {
                if binding.once {
                    retired.push(enchantment.id);
                }
                bindings.push(binding);
            }
        }
        self.retire_enchantments(&retired);

        debug!(kind, node = node.0, listeners = bindings.len(), "event fired");
        let fired = bindings.len();
        for binding in bindings {
            self.when_unblocked(move |engine| {
                let patch = DescriptorPatch {
                    append_mode: Some(binding.mode),
                    ..Default::default()
                };
                engine.render_into(
                    binding.source,
                    Some(binding.target),
                    Modification::Patch(patch),
                    Some(binding.scope.child(binding.kind)),
                );
            });
        }
        fired
    }

    /// Fire an event at every hook with this name
    pub fn fire_event_on_hook(&mut self, name: &str, kind: &str) -> usize {
        let hooks = self.document.find_hooks(name);
        hooks.into_iter().map(|hook| self.fire_event(hook, kind)).sum()
    }

    fn retire_enchantments(&mut self, ids: &[EnchantmentId]) {
        if ids.is_empty() {
            return;
        }
        let document = &mut *self.document;
        self.enchantments.retain_mut(|enchantment| {
            if ids.contains(&enchantment.id) {
                enchantment.disenchant(document);
                false
            } else {
                true
            }
        });
    }
}
