//! Timed re-rendering of live hooks and (event:) polling.

use std::time::Duration;

use tracing::{debug, trace};

use super::Engine;
use crate::{
    descriptor::{ChangeDescriptor, LiveSpec},
    document::NodeId,
    error::RenderError,
    runner,
    scope::Scope,
    value::{Lambda, Value},
};

/// A hook re-rendered on a timer until stopped
#[derive(Debug)]
pub(crate) struct LiveLoop {
    id: usize,
    target: NodeId,
    template: ChangeDescriptor,
    scope: Scope,
    delay: Duration,
    predicate: Option<Lambda>,
    elapsed: Duration,
}

impl Engine {
    pub(super) fn start_live_loop(
        &mut self,
        target: NodeId,
        live: LiveSpec,
        template: ChangeDescriptor,
        scope: Scope,
    ) {
        let id = self.next_live_loop;
        self.next_live_loop += 1;
        debug!(live_loop = id, target = target.0, delay_ms = live.delay.as_millis() as u64, "live loop started");
        self.live_loops.push(LiveLoop {
            id,
            target,
            template,
            scope,
            delay: live.delay,
            predicate: live.predicate,
            elapsed: Duration::ZERO,
        });
    }

    /// Advance every live loop by `elapsed` (scaled by the configured speed)
    /// and fire the ones that are due. Loops do not advance while the engine
    /// is suspended. Returns how many loops fired.
    pub fn tick(&mut self, elapsed: Duration) -> usize {
        if !self.attached || self.is_blocked() || self.live_loops.is_empty() {
            return 0;
        }
        let multiplier = self.config.speed_multiplier;
        let scaled = if multiplier == 1.0 {
            elapsed
        } else {
            Duration::try_from_secs_f64(elapsed.as_secs_f64() * multiplier).unwrap_or(elapsed)
        };

        let mut due = Vec::new();
        for live in &mut self.live_loops {
            live.elapsed += scaled;
            if live.elapsed >= live.delay {
                live.elapsed = Duration::ZERO;
                due.push(live.id);
            }
        }

        let mut fired = 0;
        for id in due {
            if self.is_blocked() {
                break;
            }
            self.fire_live(id);
            fired += 1;
        }
        fired
    }

    fn fire_live(&mut self, id: usize) {
        let Some(position) = self.live_loops.iter().position(|live| live.id == id) else {
            return;
        };
        let target = self.live_loops[position].target;
        if !self.attached || !self.document.is_attached(target) {
            debug!(live_loop = id, "target detached; live loop stopped");
            self.live_loops.remove(position);
            return;
        }

        let live = &self.live_loops[position];
        let template = live.template.clone();
        let scope = live.scope.clone();

        match live.predicate.clone() {
            Some(predicate) => {
                let result = self.evaluate_only_in(&scope, "an (event:) condition", |ctx| {
                    runner::call_lambda(&predicate, ctx, None)
                });
                match result {
                    Ok(Value::Boolean(false)) => trace!(live_loop = id, "event condition not met"),
                    Ok(Value::Boolean(true)) => {
                        debug!(live_loop = id, "event condition met");
                        self.remove_live_loop(id);
                        self.render_live(target, template, &scope);
                    }
                    Ok(other) => {
                        self.remove_live_loop(id);
                        let err = RenderError::type_mismatch("(event:)", "a boolean", &other.describe());
                        self.render_error(target, &err);
                    }
                    Err(err) => {
                        self.remove_live_loop(id);
                        self.render_error(target, &err);
                    }
                }
            }
            None => {
                self.render_live(target, template, &scope);
                if self.stopped(target) {
                    debug!(live_loop = id, "(stop:) reached; live loop stopped");
                    self.remove_live_loop(id);
                }
            }
        }
    }

    fn render_live(&mut self, target: NodeId, template: ChangeDescriptor, scope: &Scope) {
        self.document.data_mut(target).hidden = false;
        self.render_descriptor(template, scope.child("live"));
    }

    /// Whether the last render of `target` ran a (stop:) command
    fn stopped(&self, target: NodeId) -> bool {
        let doc = self.document();
        doc.descendants(target)
            .into_iter()
            .any(|node| doc.tag(node) == Some("tw-expression") && doc.attr(node, "name") == Some("stop"))
    }

    fn remove_live_loop(&mut self, id: usize) {
        self.live_loops.retain(|live| live.id != id);
    }
}
