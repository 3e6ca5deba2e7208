use super::*;
use crate::{
    document::Tree,
    identifiers::Story,
    value::{Lambda, LambdaKind},
};
use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use std::{cell::Cell, rc::Rc, time::Duration};

fn engine() -> Engine {
    engine_with(Story::default(), BrambleConfig::default())
}

fn engine_with(story: Story, config: BrambleConfig) -> Engine {
    Engine::new(Box::new(Tree::new()), Box::new(story), config)
}

fn render(engine: &mut Engine, source: Vec<Markup>) -> bool {
    let root = engine.document().root();
    engine.render_into(source, Some(root), Modification::None, None)
}

fn text(engine: &Engine) -> String {
    let doc = engine.document();
    doc.text_content(doc.root())
}

fn html(engine: &Engine) -> String {
    let doc = engine.document();
    doc.to_html(doc.root())
}

fn call(name: &str, args: Vec<Expr>) -> Markup {
    Markup::expr(Expr::call(name, args))
}

#[test]
fn test_plain_render_restores_stack() {
    let mut engine = engine();
    assert!(render(&mut engine, vec![Markup::text("Hello")]));
    assert_eq!(engine.stack_depth(), 0);
    assert_eq!(text(&engine), "Hello");
}

#[test]
fn test_changer_attaches_to_next_hook() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![call("text-style", vec![Expr::str("bold")]), Markup::hook(vec![Markup::text("hi")])],
    );
    let doc = engine.document();
    let hook = doc
        .descendants(doc.root())
        .into_iter()
        .find(|&node| doc.tag(node) == Some("tw-hook"))
        .unwrap();
    assert_eq!(doc.attr(hook, "style"), Some("font-weight: bold"));
    assert_eq!(text(&engine), "hi");
}

#[test]
fn test_changer_skips_whitespace_before_hook() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![
            call("if", vec![Expr::bool(false)]),
            Markup::text("  "),
            Markup::hook(vec![Markup::text("gone")]),
        ],
    );
    assert_eq!(text(&engine), "  ");
}

#[test]
fn test_loose_changer_is_malformed() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![call("text-style", vec![Expr::str("bold")]), Markup::text("loose")],
    );
    assert!(html(&engine).contains("<tw-error kind=\"malformed-attachment\">"));
    assert!(text(&engine).ends_with("loose"));
}

#[test]
fn test_changer_on_boolean_is_malformed() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![
            call("text-style", vec![Expr::str("bold")]),
            Markup::expr(Expr::bool(true)),
            Markup::hook(vec![Markup::text("x")]),
        ],
    );
    let html = html(&engine);
    assert!(html.contains("<tw-error kind=\"malformed-attachment\">"));
    assert!(html.contains("<tw-hook>x</tw-hook>"));
    assert!(!html.contains("font-weight"));
}

#[test]
fn test_else_chain() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![
            call("if", vec![Expr::bool(false)]),
            Markup::hook(vec![Markup::text("no")]),
            call("else-if", vec![Expr::bool(false)]),
            Markup::hook(vec![Markup::text("still no")]),
            call("else", vec![]),
            Markup::hook(vec![Markup::text("yes")]),
        ],
    );
    assert_eq!(text(&engine), "yes");
}

#[test]
fn test_false_boolean_hides_hook() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![
            Markup::expr(Expr::bool(false)),
            Markup::hook(vec![Markup::text("hidden")]),
            call("else", vec![]),
            Markup::hook(vec![Markup::text("shown")]),
        ],
    );
    assert_eq!(text(&engine), "shown");
}

#[test]
fn test_script_binds_temp_variables() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![
            Markup::script(vec![Statement::Set {
                name: "x".to_string(),
                value: Expr::plus(Expr::num(1.0), Expr::num(1.0)),
            }]),
            Markup::expr(Expr::temp("x")),
        ],
    );
    assert_eq!(text(&engine), "2");
}

#[test]
fn test_hook_scope_does_not_leak() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![
            Markup::hook(vec![Markup::script(vec![Statement::Set {
                name: "inner".to_string(),
                value: Expr::num(1.0),
            }])]),
            Markup::expr(Expr::temp("inner")),
        ],
    );
    assert!(html(&engine).contains("kind=\"macro\""));
}

#[test]
fn test_loop_bindings_stop_at_shortest_sequence() {
    let mut engine = engine();
    let mut bindings = IndexMap::new();
    bindings.insert("a".to_string(), vec![Value::from(1.0), Value::from(2.0), Value::from(3.0)]);
    bindings.insert("b".to_string(), vec![Value::from(10.0), Value::from(20.0)]);
    let patch = DescriptorPatch {
        loop_bindings: Some(bindings),
        ..Default::default()
    };
    let root = engine.document().root();
    engine.render_into(
        vec![
            Markup::expr(Expr::temp("a")),
            Markup::text("-"),
            Markup::expr(Expr::temp("b")),
            Markup::text(";"),
        ],
        Some(root),
        Modification::Patch(patch),
        None,
    );
    assert_eq!(text(&engine), "1-10;2-20;");
    assert_eq!(engine.stack_depth(), 0);
}

#[test]
fn test_for_renders_once_per_value() {
    let mut engine = engine();
    let each = Expr::lambda(Lambda {
        kind: LambdaKind::Each,
        param: Some("x".to_string()),
        body: None,
    });
    render(
        &mut engine,
        vec![
            call("for", vec![each, Expr::num(1.0), Expr::num(2.0), Expr::num(3.0)]),
            Markup::hook(vec![Markup::expr(Expr::temp("x")), Markup::text(",")]),
        ],
    );
    assert_eq!(text(&engine), "1,2,3,");
}

#[test]
fn test_blocker_suspends_and_resumes() {
    let mut engine = engine();
    let enabled = render(
        &mut engine,
        vec![
            Markup::text("Hi "),
            Markup::blocking(
                vec![Expr::call("prompt", vec![Expr::str("Name?"), Expr::str("Bo")])],
                Expr::call("print", vec![Expr::BlockedValue]),
            ),
            Markup::text("!"),
        ],
    );
    assert!(enabled);
    assert!(engine.is_blocked());
    assert_eq!(engine.stack_depth(), 1);
    let dialog = engine.blocking_element().unwrap();
    assert_eq!(engine.document().tag(dialog), Some("tw-dialog"));
    assert_eq!(text(&engine), "Hi !Name?");

    engine.unblock(Some(Value::from("Ann")));
    assert!(!engine.is_blocked());
    assert_eq!(engine.stack_depth(), 0);
    assert!(!engine.document().is_attached(dialog));
    assert_eq!(text(&engine), "Hi Ann!");
}

#[test]
fn test_blockers_drain_in_declaration_order() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![Markup::blocking(
            vec![
                Expr::call("prompt", vec![Expr::str("1?")]),
                Expr::call("prompt", vec![Expr::str("2?")]),
            ],
            Expr::plus(Expr::BlockedValue, Expr::BlockedValue),
        )],
    );
    assert_eq!(text(&engine), "1?");

    engine.unblock(Some(Value::from("A")));
    assert!(engine.is_blocked());
    assert_eq!(text(&engine), "2?");

    engine.unblock(Some(Value::from("B")));
    assert!(!engine.is_blocked());
    assert_eq!(text(&engine), "AB");
}

#[test]
fn test_unblock_without_value_leaves_nothing_to_read() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![Markup::blocking(
            vec![Expr::call("prompt", vec![Expr::str("Name?")])],
            Expr::call("print", vec![Expr::BlockedValue]),
        )],
    );
    engine.unblock(None);
    assert_eq!(engine.stack_depth(), 0);
    assert!(html(&engine).contains("<tw-error kind=\"evaluation-context\">"));
}

#[test]
fn test_suspended_command_resumes_after_unblock() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![call("dialog", vec![Expr::str("Ready?")]), Markup::text("after")],
    );
    assert!(engine.is_blocked());

    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    engine.when_unblocked(move |_| flag.set(true));
    assert!(!ran.get());

    engine.unblock(None);
    assert!(ran.get());
    assert_eq!(engine.stack_depth(), 0);
    assert_eq!(text(&engine), "after");
}

#[test]
fn test_when_unblocked_runs_immediately_when_free() {
    let mut engine = engine();
    let ran = Rc::new(Cell::new(0));
    let flag = ran.clone();
    engine.when_unblocked(move |_| flag.set(flag.get() + 1));
    assert_eq!(ran.get(), 1);

    let other = ran.clone();
    engine.when_unblocked_or(|_| unreachable!(), move |_| other.set(other.get() + 10));
    assert_eq!(ran.get(), 11);
}

#[test]
fn test_recursion_limit_renders_error() {
    let story = Story::new("Loop").with_passage(
        "Loop",
        vec![Markup::text("again "), call("display", vec![Expr::str("Loop")])],
    );
    let config = BrambleConfig {
        max_recursion_depth: 8,
        ..Default::default()
    };
    let mut engine = engine_with(story, config);
    engine.go_to("Loop").unwrap();
    assert!(html(&engine).contains("<tw-error kind=\"recursion-limit\">"));
    assert_eq!(engine.stack_depth(), 0);
}

#[test]
fn test_default_recursion_ceiling() {
    let story = Story::new("Loop").with_passage(
        "Loop",
        vec![Markup::text("again "), call("display", vec![Expr::str("Loop")])],
    );
    let mut engine = engine_with(story, BrambleConfig::default());
    assert_eq!(engine.config().max_recursion_depth, 50);
    engine.go_to("Loop").unwrap();

    assert!(html(&engine).contains("<tw-error kind=\"recursion-limit\">"));
    let nested = text(&engine).matches("again ").count();
    assert!((49..=50).contains(&nested), "rendered {nested} levels");
    assert_eq!(engine.stack_depth(), 0);
}

#[test]
fn test_hide_then_reveal_matches_direct_render() {
    let mut hidden = engine();
    render(
        &mut hidden,
        vec![call("hidden", vec![]), Markup::named_hook("secret", vec![Markup::text("shh")])],
    );
    assert_eq!(text(&hidden), "");
    let hook = hidden.document().find_hooks("secret")[0];
    assert!(hidden.reveal(hook));

    let mut direct = engine();
    render(&mut direct, vec![Markup::named_hook("secret", vec![Markup::text("shh")])]);
    let direct_hook = direct.document().find_hooks("secret")[0];

    assert_eq!(hidden.document().to_html(hook), direct.document().to_html(direct_hook));
}

#[test]
fn test_show_reveals_hidden_hooks() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![
            call("hidden", vec![]),
            Markup::named_hook("secret", vec![Markup::text("shh")]),
            call("show", vec![Expr::hook("secret")]),
        ],
    );
    assert_eq!(text(&engine), "shh");
}

#[test]
fn test_duplicate_redirects_render_once() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![
            Markup::named_hook("t", vec![]),
            Markup::expr(Expr::plus(
                Expr::call("append", vec![Expr::hook("t")]),
                Expr::call("append", vec![Expr::hook("t")]),
            )),
            Markup::hook(vec![Markup::text("x")]),
        ],
    );
    let target = engine.document().find_hooks("t")[0];
    assert_eq!(engine.document().text_content(target), "x");
}

#[test]
fn test_link_reveals_on_click() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![call("link", vec![Expr::str("go")]), Markup::hook(vec![Markup::text("went")])],
    );
    assert_eq!(text(&engine), "go");
    assert_eq!(engine.enchantment_count(), 1);

    let doc = engine.document();
    let link = doc
        .descendants(doc.root())
        .into_iter()
        .find(|&node| doc.tag(node) == Some("tw-link"))
        .unwrap();
    assert_eq!(engine.fire_event(link, "click"), 1);
    assert_eq!(text(&engine), "went");
    assert_eq!(engine.enchantment_count(), 0);
}

#[test]
fn test_click_on_named_hook() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![
            Markup::named_hook("door", vec![Markup::text("door")]),
            call("click", vec![Expr::hook("door")]),
            Markup::hook(vec![Markup::text(" opens")]),
        ],
    );
    assert_eq!(text(&engine), "door");
    assert_eq!(engine.fire_event_on_hook("door", "mouseover"), 0);
    assert_eq!(engine.fire_event_on_hook("door", "click"), 1);
    assert_eq!(text(&engine), "door opens");
    assert_eq!(engine.fire_event_on_hook("door", "click"), 0);
}

#[test]
fn test_outer_event_listener_fires_first() {
    let mut engine = engine();
    let reveal_into_log = |label: &str| {
        Markup::hook(vec![
            call("append", vec![Expr::hook("log")]),
            Markup::hook(vec![Markup::text(label)]),
        ])
    };
    render(
        &mut engine,
        vec![
            Markup::named_hook(
                "outer",
                vec![Markup::text("a "), Markup::named_hook("inner", vec![Markup::text("b")])],
            ),
            Markup::named_hook("log", vec![]),
            call("click", vec![Expr::hook("inner")]),
            reveal_into_log("I"),
            call("click", vec![Expr::hook("outer")]),
            reveal_into_log("O"),
        ],
    );
    assert_eq!(engine.enchantment_count(), 2);

    assert_eq!(engine.fire_event_on_hook("inner", "click"), 2);
    let doc = engine.document();
    let log = doc.find_hooks("log")[0];
    assert_eq!(doc.text_content(log), "OI");
    assert_eq!(engine.enchantment_count(), 0);
}

#[test]
fn test_enchantment_refresh_is_idempotent() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![
            Markup::text("a cat and a cat"),
            call(
                "enchant",
                vec![Expr::str("cat"), Expr::call("text-style", vec![Expr::str("italic")])],
            ),
        ],
    );
    let before = html(&engine);
    assert_eq!(before.matches("<tw-enchantment style=\"font-style: italic\">cat</tw-enchantment>").count(), 2);

    engine.update_enchantments();
    assert_eq!(html(&engine), before);
}

#[test]
fn test_live_hook_stops() {
    let mut engine = engine();
    let shown = render(
        &mut engine,
        vec![
            call("live", vec![Expr::num(10.0)]),
            Markup::hook(vec![Markup::text("tick"), call("stop", vec![])]),
        ],
    );
    assert!(!shown);
    assert_eq!(engine.live_loop_count(), 1);
    assert_eq!(text(&engine), "");

    assert_eq!(engine.tick(Duration::from_millis(4)), 0);
    assert_eq!(engine.tick(Duration::from_millis(6)), 1);
    assert_eq!(text(&engine), "tick");
    assert_eq!(engine.live_loop_count(), 0);
}

#[test]
fn test_speed_multiplier_scales_live_time() {
    let config = BrambleConfig {
        speed_multiplier: 2.0,
        ..Default::default()
    };
    let mut engine = engine_with(Story::default(), config);
    render(
        &mut engine,
        vec![
            call("live", vec![Expr::num(10.0)]),
            Markup::hook(vec![Markup::text("tick"), call("stop", vec![])]),
        ],
    );
    assert_eq!(engine.tick(Duration::from_millis(3)), 0);
    assert_eq!(engine.tick(Duration::from_millis(3)), 1);
    assert_eq!(text(&engine), "tick");
}

#[test]
fn test_event_waits_for_condition() {
    let mut engine = engine();
    engine.base_scope().set("ready", Value::Boolean(false));
    let when = Expr::lambda(Lambda {
        kind: LambdaKind::When,
        param: None,
        body: Some(Box::new(Expr::is(Expr::temp("ready"), Expr::bool(true)))),
    });
    render(
        &mut engine,
        vec![call("event", vec![when]), Markup::hook(vec![Markup::text("ready!")])],
    );
    engine.tick(Duration::from_millis(16));
    assert_eq!(text(&engine), "");
    assert_eq!(engine.live_loop_count(), 1);

    engine.base_scope().set("ready", Value::Boolean(true));
    engine.tick(Duration::from_millis(16));
    assert_eq!(text(&engine), "ready!");
    assert_eq!(engine.live_loop_count(), 0);
}

#[test]
fn test_detach_stops_live_loops() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![call("live", vec![]), Markup::hook(vec![Markup::text("tick")])],
    );
    engine.detach();
    assert_eq!(engine.live_loop_count(), 0);
    assert_eq!(engine.tick(Duration::from_secs(1)), 0);
}

#[test]
fn test_go_to_waits_for_render() {
    let story = Story::new("Start")
        .with_passage(
            "Start",
            vec![Markup::text("a"), call("go-to", vec![Expr::str("Hall")]), Markup::text("b")],
        )
        .with_passage("Hall", vec![Markup::text("hall")]);
    let mut engine = engine_with(story, BrambleConfig::default());
    engine.go_to("Start").unwrap();
    assert_eq!(text(&engine), "hall");
    assert_eq!(engine.story().turns(), 2);
    assert_eq!(engine.story().current(), Some("Hall"));
}

#[test]
fn test_go_to_unknown_passage() {
    let mut engine = engine();
    assert!(matches!(engine.go_to("Nowhere"), Err(BrambleError::UnknownPassage(_))));
}

#[test]
fn test_evaluate_only_rejects_commands() {
    let mut engine = engine();
    let err = engine
        .evaluate_only(&Expr::call("stop", vec![]), "a (dm:) value")
        .unwrap_err();
    assert_eq!(err.kind(), crate::error::ErrorKind::EvaluationContext);
    assert_eq!(
        engine.evaluate_only(&Expr::num(3.0), "a (dm:) value"),
        Ok(Value::Number(3.0))
    );
    assert_eq!(engine.stack_depth(), 0);
}

#[test]
fn test_collapsed_whitespace() {
    let mut engine = engine();
    render(&mut engine, vec![Markup::collapsed(vec![Markup::text("a   \n  b")])]);
    assert_eq!(text(&engine), "a b");
}
