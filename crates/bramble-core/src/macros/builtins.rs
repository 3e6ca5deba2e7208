//! Builtin macros.
//!
//! Only the calling contract matters to the engine; this set covers the
//! changers, commands and value constructors the engine and REPL exercise.

use std::time::Duration;

use indexmap::IndexMap;

use super::MacroRegistry;
use crate::{
    changer::{Changer, Command, CommandOutcome, CommandSite},
    descriptor::{AppendMode, DescriptorPatch, EnchantmentFactory, EventSpec, LiveSpec},
    document::NodeId,
    enchantment::{EnchantEffect, Enchantment, Selector},
    engine::{Engine, Modification},
    error::RenderError,
    markup::Markup,
    runner::{self, EvalContext},
    value::{Lambda, Value},
};

/// Delay used by `(live:)` when none is given
const DEFAULT_LIVE_DELAY_MS: f64 = 20.0;

pub(super) fn register_all(registry: &mut MacroRegistry) {
    register_conditionals(registry);
    register_styles(registry);
    register_redirects(registry);
    register_timing(registry);
    register_interaction(registry);
    register_commands(registry);
    register_values(registry);
}

fn arity(name: &str, args: &[Value], min: usize, max: Option<usize>) -> Result<(), RenderError> {
    if args.len() < min {
        return Err(RenderError::in_macro(
            name,
            format!("needs at least {min} value(s), but was given {}", args.len()),
        ));
    }
    if let Some(max) = max {
        if args.len() > max {
            return Err(RenderError::in_macro(
                name,
                format!("takes at most {max} value(s), but was given {}", args.len()),
            ));
        }
    }
    Ok(())
}

fn bool_arg(name: &str, args: &[Value], index: usize) -> Result<bool, RenderError> {
    match args.get(index) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(other) => Err(RenderError::type_mismatch(name, "a boolean", other.type_name())),
        None => Err(RenderError::in_macro(name, "is missing a boolean")),
    }
}

fn string_arg(name: &str, args: &[Value], index: usize) -> Result<String, RenderError> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(RenderError::type_mismatch(name, "a string", other.type_name())),
        None => Err(RenderError::in_macro(name, "is missing a string")),
    }
}

fn lambda_arg(name: &str, args: &[Value], index: usize) -> Result<Lambda, RenderError> {
    match args.get(index) {
        Some(Value::Lambda(lambda)) => Ok(lambda.clone()),
        Some(other) => Err(RenderError::type_mismatch(name, "a lambda", other.type_name())),
        None => Err(RenderError::in_macro(name, "is missing a lambda")),
    }
}

fn changer_value(changer: Changer) -> Result<Value, RenderError> {
    Ok(Value::Changer(changer))
}

/// The previous hook's visibility, for `(else:)`-like changers
fn previous_hook(name: &str, ctx: &EvalContext<'_>) -> Result<bool, RenderError> {
    ctx.last_hook_shown.ok_or_else(|| {
        RenderError::in_macro(name, "has nothing before it to check; it should follow a hook")
    })
}

fn register_conditionals(registry: &mut MacroRegistry) {
    // (if: bool) - show the hook only when true
    registry.register("if", |_, args| {
        arity("if", &args, 1, Some(1))?;
        let shown = bool_arg("if", &args, 0)?;
        changer_value(Changer::new("if", args, move |d| {
            d.enabled = d.enabled && shown;
            Ok(())
        }))
    });

    // (unless: bool) - show the hook only when false
    registry.register("unless", |_, args| {
        arity("unless", &args, 1, Some(1))?;
        let hidden = bool_arg("unless", &args, 0)?;
        changer_value(Changer::new("unless", args, move |d| {
            d.enabled = d.enabled && !hidden;
            Ok(())
        }))
    });

    // (else:) - show the hook only when the previous one was hidden
    registry.register("else", |ctx, args| {
        arity("else", &args, 0, Some(0))?;
        let previous = previous_hook("else", ctx)?;
        changer_value(Changer::new("else", args, move |d| {
            d.enabled = d.enabled && !previous;
            Ok(())
        }))
    });

    // (else-if: bool) - like (if:), but only after a hidden hook
    registry.register("else-if", |ctx, args| {
        arity("else-if", &args, 1, Some(1))?;
        let condition = bool_arg("else-if", &args, 0)?;
        let previous = previous_hook("else-if", ctx)?;
        changer_value(Changer::new("else-if", args, move |d| {
            d.enabled = d.enabled && !previous && condition;
            Ok(())
        }))
    });

    registry.register("hidden", |_, args| {
        arity("hidden", &args, 0, Some(0))?;
        changer_value(Changer::new("hidden", args, |d| {
            d.enabled = false;
            Ok(())
        }))
    });
}

fn text_style(name: &str) -> Option<(&'static str, &'static str)> {
    match MacroRegistry::normalize(name).as_str() {
        "bold" => Some(("font-weight", "bold")),
        "italic" => Some(("font-style", "italic")),
        "underline" => Some(("text-decoration", "underline")),
        "strike" => Some(("text-decoration", "line-through")),
        "superscript" => Some(("vertical-align", "super")),
        "subscript" => Some(("vertical-align", "sub")),
        _ => None,
    }
}

/// Parse `name: value; name: value` declarations
fn parse_css(name: &str, css: &str) -> Result<IndexMap<String, String>, RenderError> {
    let mut styles = IndexMap::new();
    for declaration in css.split(';').map(str::trim).filter(|d| !d.is_empty()) {
        let Some((property, value)) = declaration.split_once(':') else {
            return Err(RenderError::in_macro(
                name,
                format!("couldn't read the CSS declaration '{declaration}'"),
            ));
        };
        styles.insert(property.trim().to_string(), value.trim().to_string());
    }
    Ok(styles)
}

fn register_styles(registry: &mut MacroRegistry) {
    // (text-style: ...names) - bold, italic, underline, strike, superscript, subscript
    registry.register("text-style", |_, args| {
        arity("text-style", &args, 1, None)?;
        let mut styles = Vec::with_capacity(args.len());
        for index in 0..args.len() {
            let style = string_arg("text-style", &args, index)?;
            let Some(declaration) = text_style(&style) else {
                return Err(RenderError::in_macro(
                    "text-style",
                    format!("doesn't know the style '{style}'"),
                ));
            };
            styles.push(declaration);
        }
        changer_value(Changer::new("text-style", args, move |d| {
            for (property, value) in &styles {
                d.styles.insert(property.to_string(), value.to_string());
            }
            Ok(())
        }))
    });

    // (text-colour: string) - set the text colour
    registry.register_aliases(&["text-colour", "text-color", "colour", "color"], |_, args| {
        arity("text-colour", &args, 1, Some(1))?;
        let colour = string_arg("text-colour", &args, 0)?;
        changer_value(Changer::new("text-colour", args, move |d| {
            d.styles.insert("color".to_string(), colour.clone());
            Ok(())
        }))
    });

    // (css: string) - raw style declarations
    registry.register("css", |_, args| {
        arity("css", &args, 1, Some(1))?;
        let styles = parse_css("css", &string_arg("css", &args, 0)?)?;
        changer_value(Changer::new("css", args, move |d| {
            d.styles.extend(styles.clone());
            Ok(())
        }))
    });

    // (transition: name) - how the content appears
    registry.register_aliases(&["transition", "t8n"], |_, args| {
        arity("transition", &args, 1, Some(1))?;
        let transition = string_arg("transition", &args, 0)?;
        changer_value(Changer::new("transition", args, move |d| {
            d.transition = Some(transition.clone());
            Ok(())
        }))
    });

    registry.register("transition-defer", |_, args| {
        arity("transition-defer", &args, 0, Some(0))?;
        changer_value(Changer::new("transition-defer", args, |d| {
            d.defer_transition = true;
            Ok(())
        }))
    });
}

fn redirect(
    name: &'static str,
    mode: AppendMode,
) -> impl Fn(&mut EvalContext<'_>, Vec<Value>) -> Result<Value, RenderError> + Send + Sync {
    move |_: &mut EvalContext<'_>, args: Vec<Value>| {
        arity(name, &args, 1, None)?;
        let selectors = args
            .iter()
            .map(Selector::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        changer_value(
            Changer::new(name, args, move |d| {
                for selector in &selectors {
                    d.add_target(selector.clone(), mode);
                }
                Ok(())
            })
            .redirecting(),
        )
    }
}

fn register_redirects(registry: &mut MacroRegistry) {
    // (append: ?hook or "text") - add the hook's content to the end of each target
    registry.register("append", redirect("append", AppendMode::Append));
    // (prepend: ?hook or "text") - add the hook's content to the start of each target
    registry.register("prepend", redirect("prepend", AppendMode::Prepend));
    // (replace: ?hook or "text") - replace each target with the hook's content
    registry.register("replace", redirect("replace", AppendMode::Replace));
}

fn register_timing(registry: &mut MacroRegistry) {
    // (live: [ms]) - re-render the hook every interval until (stop:) appears
    registry.register("live", |_, args| {
        arity("live", &args, 0, Some(1))?;
        let millis = match args.first() {
            Some(Value::Number(ms)) if ms.is_finite() && *ms >= 0.0 => *ms,
            Some(Value::Number(ms)) => {
                return Err(RenderError::in_macro("live", format!("can't wait {ms} milliseconds")))
            }
            Some(other) => return Err(RenderError::type_mismatch("live", "a number", other.type_name())),
            None => DEFAULT_LIVE_DELAY_MS,
        };
        let delay = Duration::from_secs_f64(millis / 1000.0);
        changer_value(Changer::new("live", args, move |d| {
            d.live = Some(LiveSpec {
                delay,
                predicate: None,
            });
            Ok(())
        }))
    });

    // (event: when ...) - hide the hook until the lambda becomes true
    registry.register("event", |_, args| {
        arity("event", &args, 1, Some(1))?;
        let predicate = lambda_arg("event", &args, 0)?;
        if predicate.body.is_none() {
            return Err(RenderError::in_macro("event", "needs a 'when' lambda with a condition"));
        }
        changer_value(Changer::new("event", args, move |d| {
            d.live = Some(LiveSpec {
                delay: Duration::ZERO,
                predicate: Some(predicate.clone()),
            });
            Ok(())
        }))
    });

    // (for: each _x [where ...], ...values) - render once per value
    registry.register("for", |ctx, args| {
        arity("for", &args, 1, None)?;
        let lambda = lambda_arg("for", &args, 0)?;
        let Some(param) = lambda.param.clone() else {
            return Err(RenderError::in_macro("for", "needs an 'each _name' lambda"));
        };
        let mut values = Vec::new();
        for value in &args[1..] {
            if lambda.body.is_none() {
                values.push(value.clone());
                continue;
            }
            match runner::call_lambda(&lambda, ctx, Some(value.clone()))? {
                Value::Boolean(true) => values.push(value.clone()),
                Value::Boolean(false) => {}
                other => {
                    return Err(RenderError::type_mismatch(
                        "for's 'where' condition",
                        "a boolean",
                        other.type_name(),
                    ))
                }
            }
        }
        changer_value(Changer::new("for", args, move |d| {
            d.loop_bindings.insert(param.clone(), values.clone());
            Ok(())
        }))
    });
}

fn register_interaction(registry: &mut MacroRegistry) {
    // (link: text) - show a link; clicking it reveals the hook in its place
    registry.register("link", |_, args| {
        arity("link", &args, 1, Some(1))?;
        let text = string_arg("link", &args, 0)?;
        changer_value(
            Changer::new("link", args, move |d| {
                let original = std::mem::replace(
                    &mut d.source,
                    vec![Markup::element("tw-link", vec![Markup::text(text.clone())])],
                );
                d.event = Some(EventSpec {
                    selector: Selector::Tag("tw-link".to_string()),
                    kind: "click".to_string(),
                    once: true,
                    within_target: true,
                    mode: AppendMode::Replace,
                    source: Some(original),
                });
                d.defer_transition = true;
                Ok(())
            })
            .forbid_redirect(),
        )
    });

    // (click: ?hook or "text") - hide the hook until a target is clicked
    registry.register("click", |_, args| {
        arity("click", &args, 1, Some(1))?;
        let selector = Selector::from_value(&args[0])?;
        changer_value(
            Changer::new("click", args, move |d| {
                d.enabled = false;
                d.event = Some(EventSpec {
                    selector: selector.clone(),
                    kind: "click".to_string(),
                    once: true,
                    within_target: false,
                    mode: AppendMode::Replace,
                    source: None,
                });
                Ok(())
            })
            .forbid_redirect(),
        )
    });

    // (enchant-in: ?hook or "text", changer) - enchant matches inside the hook only
    registry.register("enchant-in", |ctx, args| {
        arity("enchant-in", &args, 2, Some(2))?;
        let selector = Selector::from_value(&args[0])?;
        let Value::Changer(effect) = args[1].clone() else {
            return Err(RenderError::type_mismatch("enchant-in", "a changer", args[1].type_name()));
        };
        let scope = ctx.scope.clone();
        let factory: EnchantmentFactory = std::sync::Arc::new(move |region: NodeId| {
            Enchantment::new(selector.clone(), EnchantEffect::Fixed(effect.clone()), scope.clone())
                .within(region)
                .owned_by(region)
        });
        changer_value(Changer::new("enchant-in", args, move |d| {
            d.inner_enchantments.push(factory.clone());
            Ok(())
        }))
    });
}

/// Open a dialog under the document root and render `message` into it
fn open_dialog(engine: &mut Engine, kind: &str, message: &str, site: &CommandSite) -> NodeId {
    let doc = engine.document_mut();
    let root = doc.root();
    let dialog = doc.create_element("tw-dialog");
    doc.set_attr(dialog, "kind", kind);
    doc.append_child(root, dialog);
    let body = doc.create_element("tw-dialog-message");
    doc.append_child(dialog, body);
    engine.render_into(
        vec![Markup::text(message)],
        Some(body),
        Modification::None,
        Some(site.scope.child("dialog")),
    );
    dialog
}

fn hook_names(name: &str, args: &[Value]) -> Result<Vec<String>, RenderError> {
    args.iter()
        .map(|value| match value {
            Value::HookName(hook) => Ok(hook.clone()),
            other => Err(RenderError::type_mismatch(name, "a hook name", other.type_name())),
        })
        .collect()
}

fn register_commands(registry: &mut MacroRegistry) {
    // (print: value) - print a value; changers may be attached
    registry.register("print", |_, args| {
        arity("print", &args, 1, Some(1))?;
        let source = args[0].to_markup()?;
        Ok(Value::Command(
            Command::new("print", args, move |_, _| {
                Ok(CommandOutcome::Render {
                    source: source.clone(),
                    patch: DescriptorPatch::default(),
                })
            })
            .attachable(),
        ))
    });

    // (display: passage) - render another passage in place
    registry.register("display", |_, args| {
        arity("display", &args, 1, Some(1))?;
        let passage = string_arg("display", &args, 0)?;
        Ok(Value::Command(
            Command::new("display", args, move |engine, _| {
                let source = engine
                    .story()
                    .passage(&passage)
                    .map(<[Markup]>::to_vec)
                    .ok_or_else(|| {
                        RenderError::in_macro("display", format!("there's no passage named '{passage}'"))
                    })?;
                Ok(CommandOutcome::Render {
                    source,
                    patch: DescriptorPatch::default(),
                })
            })
            .attachable(),
        ))
    });

    // (prompt: message, default) - suspend until the player submits text
    registry.register("prompt", |_, args| {
        arity("prompt", &args, 1, Some(2))?;
        let message = string_arg("prompt", &args, 0)?;
        let default = match args.get(1) {
            Some(_) => string_arg("prompt", &args, 1)?,
            None => String::new(),
        };
        Ok(Value::Command(Command::new("prompt", args, move |engine, site| {
            let dialog = open_dialog(engine, "prompt", &message, site);
            let doc = engine.document_mut();
            let input = doc.create_element("tw-input");
            doc.set_attr(input, "value", &default);
            doc.append_child(dialog, input);
            Ok(CommandOutcome::Blocked(Some(dialog)))
        })))
    });

    // (dialog: message, ...buttons) - suspend until a button is chosen
    registry.register("dialog", |_, args| {
        arity("dialog", &args, 1, None)?;
        let message = string_arg("dialog", &args, 0)?;
        let mut buttons = Vec::new();
        for index in 1..args.len() {
            buttons.push(string_arg("dialog", &args, index)?);
        }
        if buttons.is_empty() {
            buttons.push("OK".to_string());
        }
        Ok(Value::Command(Command::new("dialog", args, move |engine, site| {
            let dialog = open_dialog(engine, "dialog", &message, site);
            let doc = engine.document_mut();
            for label in &buttons {
                let button = doc.create_element("tw-dialog-link");
                let text = doc.create_text(label);
                doc.append_child(button, text);
                doc.append_child(dialog, button);
            }
            Ok(CommandOutcome::Blocked(Some(dialog)))
        })))
    });

    // (show: ...?hooks) - reveal hidden hooks
    registry.register("show", |_, args| {
        arity("show", &args, 1, None)?;
        let names = hook_names("show", &args)?;
        Ok(Value::Command(Command::new("show", args, move |engine, _| {
            for name in &names {
                for hook in engine.document().find_hooks(name) {
                    engine.reveal(hook);
                }
            }
            Ok(CommandOutcome::Done)
        })))
    });

    // (enchant: ?hook or "text", changer or via-lambda) - decorate every match
    registry.register("enchant", |_, args| {
        arity("enchant", &args, 2, Some(2))?;
        let selector = Selector::from_value(&args[0])?;
        let effect = match &args[1] {
            Value::Changer(changer) => EnchantEffect::Fixed(changer.clone()),
            Value::Lambda(lambda) if lambda.body.is_some() => EnchantEffect::Computed(lambda.clone()),
            other => {
                return Err(RenderError::type_mismatch(
                    "enchant",
                    "a changer or a 'via' lambda",
                    other.type_name(),
                ))
            }
        };
        Ok(Value::Command(Command::new("enchant", args, move |engine, site| {
            engine.register_enchantment(Enchantment::new(
                selector.clone(),
                effect.clone(),
                site.scope.clone(),
            ));
            Ok(CommandOutcome::Done)
        })))
    });

    // (stop:) - ends the enclosing (live:) hook
    registry.register("stop", |_, args| {
        arity("stop", &args, 0, Some(0))?;
        Ok(Value::Command(Command::new("stop", args, |_, _| Ok(CommandOutcome::Done))))
    });

    // (go-to: passage) - navigate once the current render finishes
    registry.register("go-to", |_, args| {
        arity("go-to", &args, 1, Some(1))?;
        let passage = string_arg("go-to", &args, 0)?;
        Ok(Value::Command(Command::new("go-to", args, move |engine, _| {
            if engine.story().passage(&passage).is_none() {
                return Err(RenderError::in_macro("go-to", format!("there's no passage named '{passage}'")));
            }
            engine
                .go_to(&passage)
                .map_err(|err| RenderError::in_macro("go-to", err.to_string()))?;
            Ok(CommandOutcome::Done)
        })))
    });
}

fn register_values(registry: &mut MacroRegistry) {
    // (a: ...values) - an array
    registry.register_aliases(&["a", "array"], |_, args| Ok(Value::Array(args)));

    // (dm: name, value, ...) - a datamap
    registry.register_aliases(&["dm", "datamap"], |_, args| {
        if args.len() % 2 != 0 {
            return Err(RenderError::in_macro("dm", "needs a value for every name"));
        }
        let mut map = IndexMap::with_capacity(args.len() / 2);
        let mut iter = args.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            let Value::String(key) = key else {
                return Err(RenderError::type_mismatch("dm", "a string name", key.type_name()));
            };
            map.insert(key, value);
        }
        Ok(Value::Datamap(map))
    });

    // (str: ...values) - join printable values into a string
    registry.register_aliases(&["str", "string", "text"], |_, args| {
        let mut out = String::new();
        for value in &args {
            if !value.is_printable() {
                return Err(RenderError::type_mismatch("str", "printable values", value.type_name()));
            }
            out.push_str(&value.to_string());
        }
        Ok(Value::String(out))
    });

    // (num: string) - parse a number
    registry.register_aliases(&["num", "number"], |_, args| {
        arity("num", &args, 1, Some(1))?;
        match &args[0] {
            Value::Number(n) => Ok(Value::Number(*n)),
            Value::String(s) => s.trim().parse::<f64>().map(Value::Number).map_err(|_| {
                RenderError::in_macro("num", format!("couldn't convert '{s}' into a number"))
            }),
            other => Err(RenderError::type_mismatch("num", "a string", other.type_name())),
        }
    });
}
