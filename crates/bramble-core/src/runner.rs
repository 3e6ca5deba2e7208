//! A small expression runner.
//!
//! Expressions are the "tokens" a parser produces for a macro call or
//! operator expression. Evaluation never touches the document; it only
//! reads identifiers through [`Identifiers`] and temp variables through the
//! frame's [`Scope`].

use std::collections::VecDeque;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    error::RenderError,
    identifiers::Identifiers,
    macros::MacroRegistry,
    scope::Scope,
    value::{Lambda, Value},
};

/// Read-only computed identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identifier {
    /// Milliseconds since the current render began
    Time,
    /// Visits to the current passage
    Visits,
    /// Passages visited this session
    Turns,
    /// Interactable regions currently in the document
    Exits,
    /// 1-based position of the element being evaluated
    Pos,
}

/// An unevaluated expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    Bool { value: bool },
    Number { value: f64 },
    Str { value: String },
    Temp { name: String },
    Ident { name: Identifier },
    HookRef { name: String },
    Call { name: String, #[serde(default)] args: Vec<Expr> },
    Add { left: Box<Expr>, right: Box<Expr> },
    Is { left: Box<Expr>, right: Box<Expr> },
    IsNot { left: Box<Expr>, right: Box<Expr> },
    Not { operand: Box<Expr> },
    And { left: Box<Expr>, right: Box<Expr> },
    Or { left: Box<Expr>, right: Box<Expr> },
    Gt { left: Box<Expr>, right: Box<Expr> },
    Lt { left: Box<Expr>, right: Box<Expr> },
    Lambda(Lambda),
    /// The next value produced by a completed blocking operation
    BlockedValue,
}

impl Expr {
    pub fn bool(value: bool) -> Self {
        Expr::Bool { value }
    }

    pub fn num(value: f64) -> Self {
        Expr::Number { value }
    }

    pub fn str(value: impl Into<String>) -> Self {
        Expr::Str {
            value: value.into(),
        }
    }

    pub fn temp(name: impl Into<String>) -> Self {
        Expr::Temp { name: name.into() }
    }

    pub fn ident(name: Identifier) -> Self {
        Expr::Ident { name }
    }

    pub fn hook(name: impl Into<String>) -> Self {
        Expr::HookRef { name: name.into() }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            name: name.into(),
            args,
        }
    }

    pub fn plus(left: Expr, right: Expr) -> Self {
        Expr::Add {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn is(left: Expr, right: Expr) -> Self {
        Expr::Is {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn gt(left: Expr, right: Expr) -> Self {
        Expr::Gt {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn lambda(lambda: Lambda) -> Self {
        Expr::Lambda(lambda)
    }
}

/// Everything an expression can see while it is evaluated
pub struct EvalContext<'a> {
    pub macros: &'a MacroRegistry,
    pub scope: &'a Scope,
    pub identifiers: Identifiers<'a>,
    /// The owning frame's queue of values from completed blocking operations
    pub blocked_values: &'a mut VecDeque<Value>,
    /// Whether the most recent hook in the frame was shown
    pub last_hook_shown: Option<bool>,
    /// Set when only pure values may be produced
    pub evaluate_only: Option<&'a str>,
}

impl<'a> EvalContext<'a> {
    /// Borrow this context with a different innermost scope
    pub fn nested<'b>(&'b mut self, scope: &'b Scope) -> EvalContext<'b>
    where
        'a: 'b,
    {
        EvalContext {
            macros: self.macros,
            scope,
            identifiers: self.identifiers,
            blocked_values: &mut *self.blocked_values,
            last_hook_shown: self.last_hook_shown,
            evaluate_only: self.evaluate_only,
        }
    }
}

/// Evaluate an expression to a value
pub fn evaluate(expr: &Expr, ctx: &mut EvalContext<'_>) -> Result<Value, RenderError> {
    match expr {
        Expr::Bool { value } => Ok(Value::Boolean(*value)),
        Expr::Number { value } => Ok(Value::Number(*value)),
        Expr::Str { value } => Ok(Value::String(value.clone())),
        Expr::Temp { name } => ctx
            .scope
            .get(name)
            .ok_or_else(|| RenderError::UnknownVariable { name: name.clone() }),
        Expr::Ident { name } => ctx.identifiers.get(*name),
        Expr::HookRef { name } => Ok(Value::HookName(name.clone())),
        Expr::Call { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, ctx)?);
            }
            let macros = ctx.macros;
            let Some(function) = macros.get(name) else {
                return Err(RenderError::UnknownMacro { name: name.clone() });
            };
            trace!(macro_name = %name, args = values.len(), "calling macro");
            function(ctx, values)
        }
        Expr::Add { left, right } => {
            let left = evaluate(left, ctx)?;
            let right = evaluate(right, ctx)?;
            add(left, right)
        }
        Expr::Is { left, right } => Ok(Value::Boolean(
            evaluate(left, ctx)? == evaluate(right, ctx)?,
        )),
        Expr::IsNot { left, right } => Ok(Value::Boolean(
            evaluate(left, ctx)? != evaluate(right, ctx)?,
        )),
        Expr::Not { operand } => Ok(Value::Boolean(!expect_bool("not", evaluate(operand, ctx)?)?)),
        Expr::And { left, right } => {
            if !expect_bool("and", evaluate(left, ctx)?)? {
                return Ok(Value::Boolean(false));
            }
            Ok(Value::Boolean(expect_bool("and", evaluate(right, ctx)?)?))
        }
        Expr::Or { left, right } => {
            if expect_bool("or", evaluate(left, ctx)?)? {
                return Ok(Value::Boolean(true));
            }
            Ok(Value::Boolean(expect_bool("or", evaluate(right, ctx)?)?))
        }
        Expr::Gt { left, right } => {
            let (l, r) = numbers(">", evaluate(left, ctx)?, evaluate(right, ctx)?)?;
            Ok(Value::Boolean(l > r))
        }
        Expr::Lt { left, right } => {
            let (l, r) = numbers("<", evaluate(left, ctx)?, evaluate(right, ctx)?)?;
            Ok(Value::Boolean(l < r))
        }
        Expr::Lambda(lambda) => Ok(Value::Lambda(lambda.clone())),
        Expr::BlockedValue => {
            if let Some(reason) = ctx.evaluate_only {
                return Err(RenderError::evaluation_context("A suspending operation", reason));
            }
            ctx.blocked_values
                .pop_front()
                .ok_or_else(|| {
                    RenderError::evaluation_context("The blocked value", "a render resumed without a value")
                })
        }
    }
}

/// Run a lambda's body with its parameter bound to `arg`
pub fn call_lambda(
    lambda: &Lambda,
    ctx: &mut EvalContext<'_>,
    arg: Option<Value>,
) -> Result<Value, RenderError> {
    let Some(body) = &lambda.body else {
        return Ok(Value::Boolean(true));
    };
    let scope = ctx.scope.child("lambda");
    if let (Some(param), Some(arg)) = (&lambda.param, arg) {
        scope.set(param.clone(), arg);
    }
    let mut inner = ctx.nested(&scope);
    evaluate(body, &mut inner)
}

fn add(left: Value, right: Value) -> Result<Value, RenderError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
        (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (Value::Datamap(a), Value::Datamap(b)) => {
            let mut merged: IndexMap<String, Value> = a;
            merged.extend(b);
            Ok(Value::Datamap(merged))
        }
        (Value::Changer(a), Value::Changer(b)) => Ok(Value::Changer(a.combine(&b)?)),
        (left, right) => Err(RenderError::type_mismatch(
            "+",
            &format!("a value matching {}", left.type_name()),
            right.type_name(),
        )),
    }
}

fn expect_bool(operation: &str, value: Value) -> Result<bool, RenderError> {
    value
        .as_bool()
        .ok_or_else(|| RenderError::type_mismatch(operation, "a boolean", value.type_name()))
}

fn numbers(operation: &str, left: Value, right: Value) -> Result<(f64, f64), RenderError> {
    match (left.as_number(), right.as_number()) {
        (Some(l), Some(r)) => Ok((l, r)),
        (None, _) => Err(RenderError::type_mismatch(operation, "a number", left.type_name())),
        (_, None) => Err(RenderError::type_mismatch(operation, "a number", right.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{document::Tree, error::ErrorKind, identifiers::Story, value::LambdaKind};

    fn with_ctx<R>(scope: &Scope, f: impl FnOnce(&mut EvalContext<'_>) -> R) -> R {
        let macros = MacroRegistry::with_builtins();
        let tree = Tree::new();
        let story = Story::default();
        let mut queue = VecDeque::new();
        let mut ctx = EvalContext {
            macros: &macros,
            scope,
            identifiers: Identifiers::new(Instant::now(), &tree, &story, None),
            blocked_values: &mut queue,
            last_hook_shown: None,
            evaluate_only: None,
        };
        f(&mut ctx)
    }

    #[test]
    fn test_arithmetic_and_concatenation() {
        let scope = Scope::root("test");
        with_ctx(&scope, |ctx| {
            let sum = evaluate(&Expr::plus(Expr::num(2.0), Expr::num(3.0)), ctx).unwrap();
            assert_eq!(sum, Value::Number(5.0));
            let text = evaluate(&Expr::plus(Expr::str("ab"), Expr::str("cd")), ctx).unwrap();
            assert_eq!(text, Value::String("abcd".into()));
        });
    }

    #[test]
    fn test_mismatched_addition_is_a_type_error() {
        let scope = Scope::root("test");
        with_ctx(&scope, |ctx| {
            let result = evaluate(&Expr::plus(Expr::num(2.0), Expr::str("x")), ctx);
            assert!(matches!(result, Err(RenderError::TypeMismatch { .. })));
        });
    }

    #[test]
    fn test_temp_variable_lookup() {
        let scope = Scope::root("test");
        scope.set("hp", Value::Number(7.0));
        with_ctx(&scope, |ctx| {
            assert_eq!(evaluate(&Expr::temp("hp"), ctx).unwrap(), Value::Number(7.0));
            assert!(matches!(
                evaluate(&Expr::temp("mp"), ctx),
                Err(RenderError::UnknownVariable { .. })
            ));
        });
    }

    #[test]
    fn test_lambda_binds_parameter_in_child_scope() {
        let scope = Scope::root("test");
        let lambda = Lambda {
            kind: LambdaKind::Each,
            param: Some("x".into()),
            body: Some(Box::new(Expr::gt(Expr::temp("x"), Expr::num(2.0)))),
        };
        with_ctx(&scope, |ctx| {
            let result = call_lambda(&lambda, ctx, Some(Value::Number(3.0))).unwrap();
            assert_eq!(result, Value::Boolean(true));
        });
        assert!(!scope.has_own("x"));
    }

    #[test]
    fn test_blocked_value_forbidden_when_evaluating_only() {
        let scope = Scope::root("test");
        with_ctx(&scope, |ctx| {
            ctx.evaluate_only = Some("a link label");
            let result = evaluate(&Expr::BlockedValue, ctx);
            assert!(matches!(result, Err(RenderError::EvaluationContext { .. })));
        });
    }

    #[test]
    fn test_empty_blocked_value_queue_is_a_context_error() {
        let scope = Scope::root("test");
        with_ctx(&scope, |ctx| {
            let err = evaluate(&Expr::BlockedValue, ctx).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::EvaluationContext);
            assert!(!err.is_fatal());
        });
    }

    #[test]
    fn test_unknown_macro() {
        let scope = Scope::root("test");
        with_ctx(&scope, |ctx| {
            let result = evaluate(&Expr::call("frobnicate", vec![]), ctx);
            assert!(matches!(result, Err(RenderError::UnknownMacro { .. })));
        });
    }
}
