//! Changers and commands: the two callable result shapes macros produce.
//!
//! A [`Changer`] is an immutable list of named steps, each of which edits a
//! [`ChangeDescriptor`]. Combining two changers concatenates their steps, so
//! later steps override earlier ones wherever they write the same field.
//! A [`Command`] runs against the engine when its expression is reached.

use std::{fmt, sync::Arc};

use crate::{
    descriptor::{ChangeDescriptor, DescriptorPatch},
    document::NodeId,
    engine::Engine,
    error::RenderError,
    markup::Markup,
    scope::Scope,
    value::Value,
};

pub type ChangerFn = Arc<dyn Fn(&mut ChangeDescriptor) -> Result<(), RenderError> + Send + Sync>;

#[derive(Clone)]
struct ChangerStep {
    name: String,
    params: Vec<Value>,
    /// Sends output to regions other than the attached hook
    redirects: bool,
    /// False for steps that must never be combined with a redirect
    can_redirect_output: bool,
    apply: ChangerFn,
}

/// A composable descriptor transformation
#[derive(Clone)]
pub struct Changer {
    steps: Vec<ChangerStep>,
}

impl Changer {
    pub fn new<F>(name: impl Into<String>, params: Vec<Value>, apply: F) -> Self
    where
        F: Fn(&mut ChangeDescriptor) -> Result<(), RenderError> + Send + Sync + 'static,
    {
        Self {
            steps: vec![ChangerStep {
                name: name.into(),
                params,
                redirects: false,
                can_redirect_output: true,
                apply: Arc::new(apply),
            }],
        }
    }

    /// Mark every step as sending output elsewhere
    pub fn redirecting(mut self) -> Self {
        for step in &mut self.steps {
            step.redirects = true;
        }
        self
    }

    /// Mark every step as incompatible with redirecting changers
    pub fn forbid_redirect(mut self) -> Self {
        for step in &mut self.steps {
            step.can_redirect_output = false;
        }
        self
    }

    pub fn redirects(&self) -> bool {
        self.steps.iter().any(|step| step.redirects)
    }

    pub fn can_redirect_output(&self) -> bool {
        self.steps.iter().all(|step| step.can_redirect_output)
    }

    /// Names of the macros this changer was built from, in order
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name.as_str()).collect()
    }

    /// Compose `self` then `other`.
    ///
    /// Fails when one side redirects output and the other forbids it. The
    /// check looks at the union of both step lists, so it does not depend
    /// on how a longer chain is grouped.
    pub fn combine(&self, other: &Changer) -> Result<Changer, RenderError> {
        let steps: Vec<ChangerStep> = self.steps.iter().chain(&other.steps).cloned().collect();
        let redirecting = steps.iter().find(|step| step.redirects);
        let forbidding = steps.iter().find(|step| !step.can_redirect_output);
        if let (Some(redirect), Some(forbid)) = (redirecting, forbidding) {
            return Err(RenderError::malformed(format!(
                "The ({}:) changer can't be combined with ({}:), which changes where output goes",
                forbid.name, redirect.name
            )));
        }
        Ok(Changer { steps })
    }

    /// Apply every step to the descriptor, stopping at the first failure
    pub fn run(&self, descriptor: &mut ChangeDescriptor) -> Result<(), RenderError> {
        for step in &self.steps {
            (step.apply)(descriptor)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Changer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .steps
            .iter()
            .map(|step| {
                let params: Vec<String> = step.params.iter().map(Value::describe).collect();
                format!("({}: {})", step.name, params.join(", "))
            })
            .collect();
        write!(f, "{}", parts.join("+"))
    }
}

impl PartialEq for Changer {
    fn eq(&self, other: &Self) -> bool {
        self.steps.len() == other.steps.len()
            && self
                .steps
                .iter()
                .zip(&other.steps)
                .all(|(a, b)| a.name == b.name && a.params == b.params)
    }
}

/// Where a command is being run
#[derive(Debug, Clone)]
pub struct CommandSite {
    /// The expression node that produced the command
    pub node: NodeId,
    /// Temp scope of the frame running it
    pub scope: Scope,
}

/// What running a command asks the engine to do next
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    /// Render this source into the expression's own position
    Render {
        source: Vec<Markup>,
        patch: DescriptorPatch,
    },
    /// Suspend the frame, optionally on a blocking element
    Blocked(Option<NodeId>),
    /// Print a value in place
    Value(Value),
    /// Nothing further to render
    Done,
}

pub type CommandFn =
    Arc<dyn Fn(&mut Engine, &CommandSite) -> Result<CommandOutcome, RenderError> + Send + Sync>;

/// A value that performs an action when its expression is reached
#[derive(Clone)]
pub struct Command {
    name: String,
    params: Vec<Value>,
    run: CommandFn,
    attachable: bool,
    attached: Option<Changer>,
}

impl Command {
    pub fn new<F>(name: impl Into<String>, params: Vec<Value>, run: F) -> Self
    where
        F: Fn(&mut Engine, &CommandSite) -> Result<CommandOutcome, RenderError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            params,
            run: Arc::new(run),
            attachable: false,
            attached: None,
        }
    }

    /// Allow changers to be attached to this command
    pub fn attachable(mut self) -> Self {
        self.attachable = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn is_attachable(&self) -> bool {
        self.attachable
    }

    pub fn attached(&self) -> Option<&Changer> {
        self.attached.as_ref()
    }

    /// A copy of this command decorated with `changer`
    pub fn attach(&self, changer: Changer) -> Result<Command, RenderError> {
        if !self.attachable {
            return Err(RenderError::malformed(format!(
                "The ({}:) command can't have changers attached to it",
                self.name
            )));
        }
        let attached = match &self.attached {
            Some(existing) => existing.combine(&changer)?,
            None => changer,
        };
        Ok(Command {
            attached: Some(attached),
            ..self.clone()
        })
    }

    pub fn run(&self, engine: &mut Engine, site: &CommandSite) -> Result<CommandOutcome, RenderError> {
        (self.run)(engine, site)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("attached", &self.attached)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.params == other.params && self.attached == other.attached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::AppendMode;

    fn style(name: &'static str, value: &'static str) -> Changer {
        Changer::new(name, vec![Value::from(value)], move |d| {
            d.styles.insert(name.to_string(), value.to_string());
            Ok(())
        })
    }

    #[test]
    fn test_later_steps_override_earlier_ones() {
        let combined = style("color", "red").combine(&style("color", "blue")).unwrap();
        let mut descriptor = ChangeDescriptor::default();
        combined.run(&mut descriptor).unwrap();
        assert_eq!(descriptor.styles.get("color").map(String::as_str), Some("blue"));
        assert_eq!(combined.names(), vec!["color", "color"]);
    }

    #[test]
    fn test_redirect_and_forbid_cannot_combine() {
        let replace = Changer::new("replace", vec![], |d| {
            d.append_mode = AppendMode::Replace;
            Ok(())
        })
        .redirecting();
        let link = Changer::new("link", vec![], |_| Ok(())).forbid_redirect();
        assert!(matches!(
            replace.combine(&link),
            Err(RenderError::MalformedAttachment { .. })
        ));
        assert!(matches!(
            link.combine(&replace),
            Err(RenderError::MalformedAttachment { .. })
        ));
    }

    #[test]
    fn test_failing_step_stops_the_run() {
        let fail = Changer::new("fail", vec![], |_| Err(RenderError::in_macro("fail", "nope")));
        let combined = fail.combine(&style("color", "red")).unwrap();
        let mut descriptor = ChangeDescriptor::default();
        assert!(combined.run(&mut descriptor).is_err());
        assert!(descriptor.styles.is_empty());
    }

    #[test]
    fn test_non_attachable_command_rejects_changers() {
        let command = Command::new("stop", vec![], |_, _| Ok(CommandOutcome::Done));
        assert!(command.attach(style("color", "red")).is_err());
        let printable = command.attachable().attach(style("color", "red")).unwrap();
        assert_eq!(printable.attached(), Some(&style("color", "red")));
    }
}
