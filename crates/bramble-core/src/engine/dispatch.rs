//! What the engine does with an expression's value.

use tracing::error;

use super::{Engine, Modification};
use crate::{
    changer::{Changer, Command, CommandOutcome, CommandSite},
    document::NodeId,
    enchantment::WRAPPER_TAG,
    error::RenderError,
    value::Value,
};

/// The evaluated result of an expression, classified by how it is handled
enum Dispatch {
    Error(RenderError),
    Changer(Changer),
    Boolean(bool),
    Command(Command),
    Print(Value),
}

impl From<Result<Value, RenderError>> for Dispatch {
    fn from(result: Result<Value, RenderError>) -> Self {
        match result {
            Err(err) => Dispatch::Error(err),
            Ok(Value::Changer(changer)) => Dispatch::Changer(changer),
            Ok(Value::Boolean(value)) => Dispatch::Boolean(value),
            Ok(Value::Command(command)) => Dispatch::Command(command),
            Ok(value) => Dispatch::Print(value),
        }
    }
}

impl Engine {
    pub(super) fn dispatch(&mut self, index: usize, node: NodeId, result: Result<Value, RenderError>) {
        match Dispatch::from(result) {
            Dispatch::Error(err) => self.render_error(node, &err),
            Dispatch::Changer(changer) => self.attach_changer(node, changer),
            Dispatch::Boolean(value) => self.apply_boolean(index, node, value),
            Dispatch::Command(command) => self.run_command(index, node, command),
            Dispatch::Print(value) => self.print(node, value),
        }
    }

    /// The hook or expression a changer at `node` attaches to
    fn attachment_target(&self, node: NodeId) -> Option<NodeId> {
        let doc = self.document();
        let mut candidate = doc.next_sibling(node);
        while let Some(id) = candidate {
            match doc.tag(id) {
                Some("tw-hook" | "tw-expression") => return Some(id),
                Some(WRAPPER_TAG) => candidate = doc.children(id).first().copied(),
                Some(_) => return None,
                None => {
                    let blank = doc.text(id).map_or(true, |text| text.trim().is_empty());
                    if !blank {
                        return None;
                    }
                    candidate = doc.next_sibling(id);
                }
            }
        }
        None
    }

    fn attach_changer(&mut self, node: NodeId, changer: Changer) {
        let changer = match self.document.data_mut(node).changer.take() {
            Some(previous) => match previous.combine(&changer) {
                Ok(combined) => combined,
                Err(err) => return self.render_error(node, &err),
            },
            None => changer,
        };
        let Some(target) = self.attachment_target(node) else {
            let err = RenderError::malformed(format!(
                "The changer {changer:?} isn't attached to a hook or a command"
            ));
            return self.render_error(node, &err);
        };
        self.document.data_mut(target).changer = Some(changer);
    }

    fn apply_boolean(&mut self, index: usize, node: NodeId, value: bool) {
        if let Some(changer) = self.document.data_mut(node).changer.take() {
            let err = RenderError::malformed(format!(
                "The changer {changer:?} can't be attached to the boolean {value}"
            ));
            return self.render_error(node, &err);
        }
        let hook = self
            .attachment_target(node)
            .filter(|&target| self.document.tag(target) == Some("tw-hook"));
        match hook {
            Some(hook) => {
                if !value {
                    self.document.data_mut(hook).hidden = true;
                }
                self.stack[index].last_hook_shown = Some(value);
            }
            None => self.print(node, Value::Boolean(value)),
        }
    }

    fn run_command(&mut self, index: usize, node: NodeId, command: Command) {
        let command = match self.document.data_mut(node).changer.take() {
            Some(changer) => match command.attach(changer) {
                Ok(command) => command,
                Err(err) => return self.render_error(node, &err),
            },
            None => command,
        };

        let site = CommandSite {
            node,
            scope: self.stack[index].scope.clone(),
        };
        match command.run(self, &site) {
            Ok(CommandOutcome::Render { source, patch }) => {
                let mut changer = patch.into_changer();
                if let Some(attached) = command.attached() {
                    changer = match changer.combine(attached) {
                        Ok(combined) => combined,
                        Err(err) => return self.render_error(node, &err),
                    };
                }
                self.render_into(source, Some(node), Modification::Changer(changer), None);
            }
            Ok(CommandOutcome::Blocked(element)) => {
                if let Some(expression) = self.document.data_mut(node).expression.as_mut() {
                    expression.awaiting_resume = true;
                }
                self.block(index, element);
                self.stack[index].cursor.push_front(node);
            }
            Ok(CommandOutcome::Value(value)) => self.print(node, value),
            Ok(CommandOutcome::Done) => {}
            Err(err) => self.render_error(node, &err),
        }
    }

    fn print(&mut self, node: NodeId, value: Value) {
        if let Some(changer) = self.document.data_mut(node).changer.take() {
            let err = RenderError::malformed(format!(
                "The changer {changer:?} can't be attached to {}",
                value.describe()
            ));
            return self.render_error(node, &err);
        }
        if matches!(value, Value::Changer(_) | Value::Command(_)) {
            error!(node = node.0, value = %value.describe(), "tried to print a changer or command");
            let err = RenderError::impossible(format!("{} reached the printer", value.describe()));
            return self.render_error(node, &err);
        }
        match value.to_markup() {
            Ok(markup) => {
                self.render_into(markup, Some(node), Modification::None, None);
            }
            Err(err) => self.render_error(node, &err),
        }
    }
}
