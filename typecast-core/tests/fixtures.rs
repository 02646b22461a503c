//! Whole-unit analyses over JSON trees shaped like the ones an external
//! parser hands over.

use serde_json::{Value, json};
use typecast_ast::{CastMechanism, Unit};
use typecast_core::{
    AnalysisOptions, AnalysisReport, CastError, CastNote, FindingKind, Severity, analyze,
};

fn run(input: Value) -> AnalysisReport {
    let unit: Unit = serde_json::from_value(input).expect("fixture decodes");
    analyze(&unit, &AnalysisOptions::default())
}

fn lit(form: Value) -> Value {
    json!({ "kind": "literal", "literal": form })
}

fn var(name: &str) -> Value {
    json!({ "kind": "variable", "name": name })
}

fn ty(name: &str) -> Value {
    json!({ "name": name })
}

fn ptr(name: &str) -> Value {
    json!({ "name": name, "pointer": 1 })
}

fn let_(name: &str, ty: Value, init: Value) -> Value {
    json!({ "kind": "let", "name": name, "ty": ty, "init": init })
}

fn cast(mechanism: &str, target: Value, expr: Value) -> Value {
    json!({ "kind": "cast", "mechanism": mechanism, "target": target, "expr": expr })
}

fn hierarchy() -> Value {
    json!({
        "classes": [
            { "name": "Base", "members": [{ "name": "describe", "ty": ty("int"), "virtual": true }] },
            { "name": "Child", "bases": ["Base"] }
        ]
    })
}

#[test]
fn type_casting_fixture() {
    let report = run(json!({
        "declarations": hierarchy(),
        "body": [
            let_("myInt", ty("int"), lit(json!({ "int": 10 }))),
            let_("myFloat", ty("int"), lit(json!({ "float": 20.0 }))),
            let_("myDouble", ty("double"), lit(json!({ "double": 30.0 }))),
            let_("myChild", ptr("Child"), json!({ "kind": "new", "ty": ty("Child") })),

            let_("castedToInt", ty("int"), cast("c_style", ty("int"), var("myFloat"))),
            let_("castedToInt2", ty("int"), cast("c_style", ty("int"), var("myDouble"))),
            let_("castedToInt3", ty("int"), cast("c_style", ty("int"), lit(json!({ "float": 12.0 })))),

            let_("castedToDouble", ty("double"), cast("c_style", ty("double"), var("myInt"))),
            let_("castedToDouble2", ty("double"), cast("c_style", ty("double"), var("myFloat"))),
            let_("castedToDouble3", ty("double"), cast("c_style", ty("double"), lit(json!({ "int": 100 })))),

            let_("castedToBase", ptr("Base"), cast("c_style", ptr("Base"), var("myChild"))),
            let_("castedToPointer", ptr("void"), cast("c_style", ptr("void"), lit(json!({ "int": 291 })))),
            let_("castedToValue", ty("Base"), cast("c_style", ty("Base"), var("myChild"))),

            let_("staticCastToBase", ptr("Base"), cast("static_cast", ptr("Base"), var("myChild"))),
            let_("dynamicCastToBase", ptr("Base"), cast("dynamic_cast", ptr("Base"), var("myChild"))),
            let_("reinterpretCastToBase", ptr("Base"), cast("reinterpret_cast", ptr("Base"), var("myChild")))
        ]
    }));

    assert!(report.fatal.is_none(), "{:?}", report.fatal);
    assert_eq!(report.casts.len(), 13);

    let float_to_int = &report.casts[0];
    assert!(float_to_int.implicit);
    assert_eq!(
        (float_to_int.source.as_str(), float_to_int.target.as_str()),
        ("float", "int")
    );
    assert!(float_to_int.classification.has_note(CastNote::Narrowing));

    let notes: Vec<Vec<CastNote>> = report.casts[1..]
        .iter()
        .map(|c| c.classification.notes.clone())
        .collect();
    assert_eq!(
        notes,
        vec![
            vec![],
            vec![CastNote::Narrowing],
            vec![CastNote::Narrowing],
            vec![],
            vec![],
            vec![],
            vec![],
            vec![CastNote::Unsafe, CastNote::Ambiguous],
            vec![CastNote::Ambiguous],
            vec![],
            vec![],
            vec![CastNote::Unsafe],
        ]
    );

    let to_base = &report.casts[7].classification;
    assert_eq!(to_base.requested, CastMechanism::LegacyAmbiguous);
    assert_eq!(to_base.mechanism, CastMechanism::QualifiedHierarchy);

    let to_pointer = &report.casts[8].classification;
    assert_eq!(to_pointer.mechanism, CastMechanism::BitReinterpretation);
    assert!(to_pointer.is_legal());

    let to_value = &report.casts[9].classification;
    assert_eq!(to_value.outcome, Err(CastError::NotRegisterSized));
    assert_eq!(report.illegal_casts().count(), 1);

    assert_eq!(report.severity(), Severity::Notes);
    assert_eq!(report.exit_code(false), 1);
    assert_eq!(report.exit_code(true), 2);
}

#[test]
fn tuples_fixture() {
    let make_tuple = json!({
        "kind": "template",
        "template": "std::tuple",
        "args": [lit(json!({ "int": 12 })), lit(json!({ "string": "Blabla" }))]
    });
    let report = run(json!({
        "body": [
            let_(
                "myTuple",
                json!({ "name": "std::tuple", "args": [ty("int"), ptr("char")] }),
                make_tuple
            ),
            { "kind": "expr", "expr": { "kind": "tuple_get", "tuple": var("myTuple"), "index": 0 } },
            { "kind": "expr", "expr": { "kind": "tuple_get", "tuple": var("myTuple"), "index": 1 } },
            { "kind": "expr", "expr": { "kind": "tuple_get", "tuple": var("myTuple"), "index": 2 } }
        ]
    }));

    assert!(report.fatal.is_none());
    // make_tuple already infers the declared instantiation.
    assert!(report.casts.is_empty());

    let gets: Vec<&str> = report
        .expressions
        .iter()
        .filter(|e| e.kind == "tuple_get")
        .map(|e| e.display.as_str())
        .collect();
    assert_eq!(gets, vec!["int", "char*", "<unknown>"]);

    assert_eq!(report.findings.len(), 1);
    assert_eq!(
        report.findings[0].kind,
        FindingKind::IndexOutOfRange { index: 2, arity: 2 }
    );
    assert_eq!(report.exit_code(false), 1);
}

#[test]
fn tuple_elements_convert_to_declared_types() {
    let report = run(json!({
        "body": [
            let_("pair", json!(null), json!({
                "kind": "template",
                "template": "fixed-arity-tuple",
                "type_args": [ty("int"), ty("string")],
                "args": [lit(json!({ "double": 1.5 })), lit(json!({ "string": "x" }))]
            })),
            { "kind": "expr", "expr": { "kind": "tuple_get", "tuple": var("pair"), "index": 1 } }
        ]
    }));

    assert!(report.fatal.is_none());
    assert_eq!(report.casts.len(), 2);
    assert!(report.casts.iter().all(|c| c.implicit && c.classification.is_legal()));
    assert!(report.casts[0].classification.has_note(CastNote::Narrowing));
    assert_eq!(report.casts[1].classification.mechanism, CastMechanism::ImplicitObject);
    assert_eq!(report.expressions.last().map(|e| e.display.as_str()), Some("std::string"));
}

#[test]
fn template_parameters_fixture() {
    let map_ty = json!({ "name": "std::map", "args": [ptr("char"), ty("int")] });
    let subscript = |key: &str| {
        json!({ "kind": "index", "base": var("textToIntMap"), "index": lit(json!({ "string": key })) })
    };
    let report = run(json!({
        "body": [
            { "kind": "let", "name": "numberVec", "ty": { "name": "std::vector", "args": [ty("int")] } },
            { "kind": "block", "body": [
                let_("i", ty("int"), lit(json!({ "int": 0 }))),
                { "kind": "expr", "expr": { "kind": "index", "base": var("numberVec"), "index": var("i") } }
            ]},
            { "kind": "let", "name": "textToIntMap", "ty": map_ty },
            { "kind": "expr", "expr": { "kind": "assign", "target": subscript("one"), "value": lit(json!({ "int": 1 })) } },
            { "kind": "expr", "expr": { "kind": "assign", "target": subscript("two"), "value": lit(json!({ "int": 2 })) } },
            { "kind": "expr", "expr": { "kind": "index", "base": var("numberVec"), "index": lit(json!({ "double": 1.5 })) } }
        ]
    }));

    assert!(report.fatal.is_none());
    assert!(report.findings.is_empty());

    let indexed: Vec<(&str, bool)> = report
        .expressions
        .iter()
        .filter(|e| e.kind == "index")
        .map(|e| (e.display.as_str(), e.lvalue))
        .collect();
    assert_eq!(indexed, vec![("int", true), ("int", true), ("int", true), ("int", true)]);

    // Only the floating-point subscript needed a conversion.
    assert_eq!(report.casts.len(), 1);
    assert_eq!(report.casts[0].target, "unsigned long");
    assert!(report.casts[0].classification.has_note(CastNote::Narrowing));
}

#[test]
fn new_inference_fixture() {
    let list = json!({ "name": "std::list", "args": [ty("int")] });
    let two_four = json!([lit(json!({ "int": 2 })), lit(json!({ "int": 4 }))]);
    let report = run(json!({
        "body": [
            { "kind": "let", "name": "classList1", "ty": list },
            let_("classListPtr", json!(null), json!({ "kind": "new", "ty": list, "args": two_four })),
            let_(
                "classListAuto",
                json!(null),
                json!({ "kind": "make_handle", "mode": "shared", "pointee": list, "args": two_four })
            ),
            let_(
                "classListUnique",
                json!(null),
                json!({ "kind": "make_handle", "mode": "unique", "pointee": list, "args": two_four })
            )
        ]
    }));

    assert!(report.fatal.is_none());
    assert_eq!(report.severity(), Severity::Clean);
    let displays: Vec<&str> = report
        .expressions
        .iter()
        .filter(|e| e.kind != "literal")
        .map(|e| e.display.as_str())
        .collect();
    assert_eq!(
        displays,
        vec![
            "std::list<int>*",
            "std::shared_ptr<std::list<int>>",
            "std::unique_ptr<std::list<int>>",
        ]
    );
}

#[test]
fn dynamic_downcast_needs_polymorphism() {
    let report = run(json!({
        "declarations": {
            "classes": [
                { "name": "Plain" },
                { "name": "PlainChild", "bases": ["Plain"] },
                { "name": "Shape", "polymorphic": true },
                { "name": "Square", "bases": ["Shape"] }
            ]
        },
        "body": [
            { "kind": "let", "name": "plain", "ty": ptr("Plain") },
            { "kind": "let", "name": "shape", "ty": ptr("Shape") },
            { "kind": "expr", "expr": cast("dynamic_cast", ptr("PlainChild"), var("plain")) },
            { "kind": "expr", "expr": cast("dynamic_cast", ptr("Square"), var("shape")) },
            { "kind": "expr", "expr": cast("dynamic_cast", ptr("Square"), var("plain")) }
        ]
    }));

    let outcomes: Vec<_> = report
        .casts
        .iter()
        .map(|c| c.classification.outcome.clone())
        .collect();
    assert_eq!(
        outcomes,
        vec![
            Err(CastError::NotPolymorphic {
                class: "Plain".to_string()
            }),
            Ok(()),
            Err(CastError::UnrelatedTypes),
        ]
    );
    assert!(report.casts[1].classification.has_note(CastNote::RuntimeChecked));
}

#[test]
fn reference_casts_bind_lvalues() {
    let report = run(json!({
        "declarations": hierarchy(),
        "body": [
            { "kind": "let", "name": "child", "ty": ty("Child") },
            let_("base", json!({ "name": "Base", "reference": true }), var("child")),
            { "kind": "expr", "expr": cast(
                "dynamic_cast",
                json!({ "name": "Child", "reference": true }),
                var("base")
            )}
        ]
    }));

    assert!(report.fatal.is_none());
    assert_eq!(report.casts.len(), 2);
    assert_eq!(report.casts[0].source, "Child&");
    assert_eq!(report.casts[0].target, "Base&");
    assert!(report.casts[0].classification.is_legal());
    assert!(report.casts[1].classification.has_note(CastNote::RuntimeChecked));
    assert!(report.expressions.last().is_some_and(|e| e.lvalue));
}

#[test]
fn assigning_to_an_rvalue_is_reported() {
    let report = run(json!({
        "body": [
            { "kind": "expr", "expr": {
                "kind": "assign",
                "target": lit(json!({ "int": 5 })),
                "value": lit(json!({ "int": 6 }))
            }}
        ]
    }));
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].kind, FindingKind::NotAssignable);
}

#[test]
fn subscripting_a_number_is_reported() {
    let report = run(json!({
        "body": [
            let_("n", ty("int"), lit(json!({ "int": 5 }))),
            { "kind": "expr", "expr": { "kind": "index", "base": var("n"), "index": lit(json!({ "int": 0 })) } }
        ]
    }));
    assert_eq!(
        report.findings[0].kind,
        FindingKind::NotIndexable {
            ty: "int".to_string()
        }
    );
}

#[test]
fn unknown_member_is_fatal() {
    let report = run(json!({
        "declarations": hierarchy(),
        "body": [
            { "kind": "let", "name": "child", "ty": ptr("Child") },
            { "kind": "expr", "expr": { "kind": "member", "base": var("child"), "member": "describe", "arrow": true } },
            { "kind": "expr", "expr": { "kind": "member", "base": var("child"), "member": "missing", "arrow": true } }
        ]
    }));

    let inherited = report
        .expressions
        .iter()
        .find(|e| e.kind == "member")
        .map(|e| e.display.as_str());
    assert_eq!(inherited, Some("int"));
    assert_eq!(
        report.fatal.as_ref().map(|e| e.kind_name()),
        Some("UnknownMemberError")
    );
    assert_eq!(report.exit_code(false), 2);
}

#[test]
fn cyclic_declarations_abort_before_analysis() {
    let report = run(json!({
        "declarations": {
            "classes": [
                { "name": "C", "bases": ["B"] },
                { "name": "B", "bases": ["A"] },
                { "name": "A", "bases": ["C"] }
            ]
        },
        "body": [ let_("x", ty("int"), lit(json!({ "int": 1 }))) ]
    }));
    assert_eq!(
        report.fatal.as_ref().map(|e| e.kind_name()),
        Some("CyclicHierarchyError")
    );
    assert!(report.expressions.is_empty());
}

#[test]
fn unknown_type_in_declaration_is_fatal() {
    let report = run(json!({
        "body": [ { "kind": "let", "name": "w", "ty": ty("Widget") } ]
    }));
    assert_eq!(
        report.fatal.as_ref().map(|e| e.kind_name()),
        Some("UnknownTypeError")
    );
}
