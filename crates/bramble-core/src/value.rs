use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    changer::{Changer, Command},
    error::RenderError,
    markup::Markup,
    runner::Expr,
};

/// What a lambda is written for; only affects how macros read it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LambdaKind {
    /// `each _x` / `each _x where ...`
    Each,
    /// `_x via ...`
    Via,
    /// `when ...`
    When,
}

/// An unevaluated expression with an optional parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub kind: LambdaKind,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub body: Option<Box<Expr>>,
}

/// A runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Datamap(IndexMap<String, Value>),
    Changer(Changer),
    Command(Command),
    Lambda(Lambda),
    /// A reference to every hook with this name (`?name`)
    HookName(String),
}

impl Value {
    /// Article-prefixed type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "a boolean",
            Value::Number(_) => "a number",
            Value::String(_) => "a string",
            Value::Array(_) => "an array",
            Value::Datamap(_) => "a datamap",
            Value::Changer(_) => "a changer",
            Value::Command(_) => "a command",
            Value::Lambda(_) => "a lambda",
            Value::HookName(_) => "a hook name",
        }
    }

    /// A short human-readable description, usable for any value
    pub fn describe(&self) -> String {
        match self {
            Value::Changer(changer) => format!("a {changer:?} changer"),
            Value::Command(command) => format!("a ({}:) command", command.name()),
            Value::Lambda(lambda) => match &lambda.param {
                Some(param) => format!("a lambda of _{param}"),
                None => "a lambda".to_string(),
            },
            other => other.to_string(),
        }
    }

    /// Convert a printable value into markup (the printing contract).
    ///
    /// Changers, commands and lambdas have no textual form.
    pub fn to_markup(&self) -> Result<Vec<Markup>, RenderError> {
        match self {
            Value::Boolean(_) | Value::Number(_) | Value::String(_) | Value::HookName(_) => {
                Ok(vec![Markup::text(self.to_string())])
            }
            Value::Array(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    if !item.is_printable() {
                        return Err(RenderError::type_mismatch(
                            "printing an array",
                            "printable items",
                            item.type_name(),
                        ));
                    }
                    parts.push(item.to_string());
                }
                Ok(vec![Markup::text(parts.join(","))])
            }
            Value::Datamap(map) => {
                let mut rows = Vec::with_capacity(map.len());
                for (key, value) in map {
                    let cell = value.to_markup()?;
                    rows.push(Markup::element(
                        "tr",
                        vec![
                            Markup::element("td", vec![Markup::text(key.clone())]),
                            Markup::element("td", cell),
                        ],
                    ));
                }
                Ok(vec![Markup::element("table", rows)])
            }
            Value::Changer(_) | Value::Command(_) | Value::Lambda(_) => Err(
                RenderError::type_mismatch("printing", "a printable value", self.type_name()),
            ),
        }
    }

    pub fn is_printable(&self) -> bool {
        !matches!(self, Value::Changer(_) | Value::Command(_) | Value::Lambda(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(Value::describe).collect();
                write!(f, "{}", parts.join(","))
            }
            Value::Datamap(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.describe()))
                    .collect();
                write!(f, "(dm: {})", parts.join(", "))
            }
            Value::HookName(name) => write!(f, "?{name}"),
            other => write!(f, "{}", other.describe()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
