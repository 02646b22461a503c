use serde_json::{Value, json};
use typecast_ast::Unit;
use typecast_core::{AnalysisOptions, AnalysisReport, ViolationKind, analyze};

fn run(body: Value) -> AnalysisReport {
    let unit: Unit = serde_json::from_value(json!({
        "declarations": {
            "classes": [{ "name": "Widget", "members": [{ "name": "size", "ty": { "name": "int" } }] }]
        },
        "body": body
    }))
    .expect("fixture decodes");
    analyze(&unit, &AnalysisOptions::default())
}

fn var(name: &str) -> Value {
    json!({ "kind": "variable", "name": name })
}

fn make(mode: &str) -> Value {
    json!({ "kind": "make_handle", "mode": mode, "pointee": { "name": "Widget" } })
}

fn bind(name: &str, init: Value) -> Value {
    json!({ "kind": "let", "name": name, "init": init })
}

fn release(name: &str) -> Value {
    json!({ "kind": "release", "name": name })
}

fn use_(name: &str) -> Value {
    json!({
        "kind": "expr",
        "expr": { "kind": "member", "base": var(name), "member": "size", "arrow": true }
    })
}

fn kinds(report: &AnalysisReport) -> Vec<ViolationKind> {
    report.violations.iter().map(|v| v.kind).collect()
}

#[test]
fn shared_copies_release_to_zero_then_double_release() {
    let report = run(json!([
        bind("a", make("shared")),
        bind("b", var("a")),
        bind("c", var("a")),
        release("a"),
        release("b"),
        release("c"),
        release("a")
    ]));

    assert!(report.fatal.is_none());
    assert_eq!(kinds(&report), vec![ViolationKind::DoubleRelease]);
    let v = &report.violations[0];
    assert_eq!(v.binding.as_deref(), Some("a"));
    assert_eq!(v.pointee, "Widget");
}

#[test]
fn moved_from_unique_rejects_use_but_target_is_fresh() {
    let report = run(json!([
        bind("u", make("unique")),
        bind("v", json!({ "kind": "move", "expr": var("u") })),
        use_("u"),
        use_("v"),
        bind("w", var("u"))
    ]));

    assert!(report.fatal.is_none());
    assert_eq!(
        kinds(&report),
        vec![ViolationKind::UseAfterMove, ViolationKind::UseAfterMove]
    );
    assert!(report.violations.iter().all(|v| v.binding.as_deref() == Some("u")));
}

#[test]
fn unique_handles_are_not_copyable() {
    let report = run(json!([
        bind("u", make("unique")),
        bind("copy", var("u"))
    ]));
    assert_eq!(kinds(&report), vec![ViolationKind::NonCopyable]);
    assert_eq!(report.exit_code(false), 1);
    assert_eq!(report.exit_code(true), 2);
}

#[test]
fn released_handle_cannot_be_dereferenced() {
    let report = run(json!([
        bind("s", make("shared")),
        release("s"),
        use_("s")
    ]));
    assert_eq!(kinds(&report), vec![ViolationKind::UseAfterRelease]);
}

#[test]
fn scopes_release_their_handles() {
    let report = run(json!([
        { "kind": "block", "body": [
            bind("inner", make("unique")),
            bind("shared", make("shared")),
            bind("alias", var("shared"))
        ]},
        bind("outer", make("unique")),
        { "kind": "expr", "expr": make("shared") }
    ]));
    assert!(report.violations.is_empty());
    assert_eq!(report.exit_code(true), 0);
}

#[test]
fn reassignment_releases_the_old_handle() {
    let report = run(json!([
        bind("p", make("unique")),
        bind("q", json!({ "kind": "move", "expr": var("p") })),
        { "kind": "expr", "expr": { "kind": "assign", "target": var("p"), "value": make("unique") } },
        use_("p"),
        use_("q")
    ]));
    assert!(report.violations.is_empty(), "{:?}", report.violations);
}

#[test]
fn unique_converts_into_shared_by_move_only() {
    let report = run(json!([
        bind("u", make("unique")),
        {
            "kind": "let",
            "name": "s",
            "ty": { "name": "std::shared_ptr", "args": [{ "name": "Widget" }] },
            "init": { "kind": "move", "expr": var("u") }
        },
        bind("s2", var("s")),
        use_("s2")
    ]));
    assert!(report.violations.is_empty(), "{:?}", report.violations);
    assert_eq!(report.casts.len(), 1);
    assert!(report.casts[0].classification.is_legal());
}

#[test]
fn moving_twice_is_a_violation() {
    let report = run(json!([
        bind("u", make("unique")),
        bind("a", json!({ "kind": "move", "expr": var("u") })),
        bind("b", json!({ "kind": "move", "expr": var("u") }))
    ]));
    assert_eq!(kinds(&report), vec![ViolationKind::UseAfterMove]);
}

fn handle_ref(template: &str) -> Value {
    json!({ "name": template, "args": [{ "name": "Widget" }], "reference": true })
}

fn bind_ref(name: &str, template: &str, init: Value) -> Value {
    json!({ "kind": "let", "name": name, "ty": handle_ref(template), "init": init })
}

fn assign(target: &str, value: Value) -> Value {
    json!({ "kind": "expr", "expr": { "kind": "assign", "target": var(target), "value": value } })
}

#[test]
fn reference_to_unique_aliases_instead_of_copying() {
    let report = run(json!([
        bind("p", make("unique")),
        bind_ref("r", "std::unique_ptr", var("p")),
        use_("r"),
        use_("p")
    ]));
    assert!(report.violations.is_empty(), "{:?}", report.violations);
}

#[test]
fn leaving_a_reference_scope_keeps_the_referent_alive() {
    let report = run(json!([
        bind("p", make("unique")),
        { "kind": "block", "body": [bind_ref("r", "std::unique_ptr", var("p"))] },
        use_("p"),
        release("p"),
        release("p")
    ]));
    assert_eq!(kinds(&report), vec![ViolationKind::DoubleRelease]);
}

#[test]
fn assignment_through_a_reference_reseats_the_referent() {
    let report = run(json!([
        bind("p", make("unique")),
        { "kind": "block", "body": [
            bind_ref("r", "std::unique_ptr", var("p")),
            assign("r", make("unique"))
        ]},
        use_("p")
    ]));
    assert!(report.violations.is_empty(), "{:?}", report.violations);
}

#[test]
fn shared_self_assignment_is_clean() {
    let report = run(json!([
        bind("s", make("shared")),
        assign("s", var("s")),
        use_("s"),
        release("s"),
        use_("s")
    ]));
    assert_eq!(kinds(&report), vec![ViolationKind::UseAfterRelease]);
}
