use bramble_core::{
    BrambleConfig, Engine, ErrorKind, Expr, Identifier, Lambda, LambdaKind, Markup,
    Modification, Story, Tree, Value,
};
use pretty_assertions::assert_eq;

fn engine() -> Engine {
    Engine::new(Box::new(Tree::new()), Box::new(Story::default()), BrambleConfig::default())
}

fn render(engine: &mut Engine, source: Vec<Markup>) -> bool {
    let root = engine.document().root();
    engine.render_into(source, Some(root), Modification::None, None)
}

fn html(engine: &Engine) -> String {
    let doc = engine.document();
    doc.to_html(doc.root())
}

fn text(engine: &Engine) -> String {
    let doc = engine.document();
    doc.text_content(doc.root())
}

fn call(name: &str, args: Vec<Expr>) -> Markup {
    Markup::expr(Expr::call(name, args))
}

#[test]
fn test_errors_replace_only_their_node() {
    let mut engine = engine();
    assert!(render(&mut engine, vec![call("nope", vec![]), Markup::text("after")]));
    assert!(html(&engine).contains("<tw-error kind=\"macro\">There's no macro named (nope:)</tw-error>after"));
}

#[test]
fn test_datamap_prints_as_table() {
    let mut engine = engine();
    render(&mut engine, vec![call("dm", vec![Expr::str("hp"), Expr::num(3.0)])]);
    assert!(html(&engine).contains("<table><tr><td>hp</td><td>3</td></tr></table>"));
}

#[test]
fn test_prepend_into_text_match() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![
            Markup::text("Hello world"),
            call("prepend", vec![Expr::str("world")]),
            Markup::hook(vec![Markup::text("big ")]),
        ],
    );
    assert_eq!(text(&engine), "Hello big world");
}

#[test]
fn test_replace_redirect_empties_source_hook() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![
            Markup::named_hook("t", vec![Markup::text("old")]),
            call("replace", vec![Expr::hook("t")]),
            Markup::hook(vec![Markup::text("new")]),
        ],
    );
    assert_eq!(text(&engine), "new");
}

#[test]
fn test_decorated_append_uses_transition_container() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![
            Markup::named_hook("log", vec![Markup::text("a")]),
            Markup::expr(Expr::plus(
                Expr::call("append", vec![Expr::hook("log")]),
                Expr::call("t8n", vec![Expr::str("dissolve")]),
            )),
            Markup::hook(vec![Markup::text("b")]),
        ],
    );
    assert!(html(&engine).contains(
        "<tw-hook name=\"log\">a<tw-transition-container data-t8n=\"dissolve\">b</tw-transition-container></tw-hook>"
    ));
}

#[test]
fn test_enchant_with_via_lambda_sees_position() {
    let mut engine = engine();
    let via = Expr::lambda(Lambda {
        kind: LambdaKind::Via,
        param: Some("it".to_string()),
        body: Some(Box::new(Expr::call(
            "css",
            vec![Expr::plus(
                Expr::str("order: "),
                Expr::call("str", vec![Expr::ident(Identifier::Pos)]),
            )],
        ))),
    });
    render(
        &mut engine,
        vec![Markup::text("ax bx"), call("enchant", vec![Expr::str("x"), via])],
    );
    let html = html(&engine);
    assert!(html.contains("a<tw-enchantment style=\"order: 1\">x</tw-enchantment>"));
    assert!(html.contains("b<tw-enchantment style=\"order: 2\">x</tw-enchantment>"));
}

#[test]
fn test_enchant_in_stays_inside_its_hook() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![
            call(
                "enchant-in",
                vec![Expr::str("cat"), Expr::call("text-style", vec![Expr::str("bold")])],
            ),
            Markup::hook(vec![Markup::text("a cat")]),
            Markup::text(" and another cat"),
        ],
    );
    let html = html(&engine);
    assert_eq!(
        html.matches("<tw-enchantment style=\"font-weight: bold\">cat</tw-enchantment>").count(),
        1
    );
    assert!(html.ends_with(" and another cat</tw-passage>"));
}

#[test]
fn test_exits_counts_clickable_regions() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![
            call("link", vec![Expr::str("north")]),
            Markup::hook(vec![Markup::text("You go north.")]),
            call("link", vec![Expr::str("south")]),
            Markup::hook(vec![Markup::text("You go south.")]),
        ],
    );
    assert_eq!(engine.eval(&Expr::ident(Identifier::Exits)), Ok(Value::Number(2.0)));
    assert!(matches!(engine.eval(&Expr::ident(Identifier::Time)), Ok(Value::Number(ms)) if ms >= 0.0));
}

#[test]
fn test_blocked_value_outside_a_suspension() {
    let mut engine = engine();
    let err = engine.evaluate_only(&Expr::BlockedValue, "a link label").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EvaluationContext);
    assert_eq!(engine.blocked_value(), None);
}

#[test]
fn test_dialog_buttons() {
    let mut engine = engine();
    render(
        &mut engine,
        vec![call("dialog", vec![Expr::str("Stay?"), Expr::str("Yes"), Expr::str("No")])],
    );
    let dialog = engine.blocking_element().unwrap();
    assert_eq!(
        engine.document().to_html(dialog),
        "<tw-dialog kind=\"dialog\"><tw-dialog-message>Stay?</tw-dialog-message>\
         <tw-dialog-link>Yes</tw-dialog-link><tw-dialog-link>No</tw-dialog-link></tw-dialog>"
    );
}

#[test]
fn test_story_from_json_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("story.json");
    std::fs::write(
        &path,
        r#"{
            "start": "Gate",
            "passages": {
                "Gate": [
                    {"type": "text", "text": "Visits: "},
                    {"type": "expression", "code": {"op": "ident", "name": "visits"}}
                ]
            }
        }"#,
    )
    .unwrap();

    let story = Story::from_json_file(&path).unwrap();
    let start = story.start.clone();
    let mut engine = Engine::new(Box::new(Tree::new()), Box::new(story), BrambleConfig::default());
    engine.go_to(&start).unwrap();
    assert_eq!(text(&engine), "Visits: 1");
    engine.go_to(&start).unwrap();
    assert_eq!(text(&engine), "Visits: 2");
}
