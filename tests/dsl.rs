//! Grammar and expression tests: parse success/failure, statement shapes, and
//! constant expression semantics through the public API.

use dsdlc::ast::{ArrayCapacity, ScalarName, TypeExpr};
use dsdlc::{evaluate, parse, parse_expression, CastMode, StatementKind, TypeName, Value};

fn eval(source: &str) -> Result<Value, dsdlc::EvaluationError> {
    let expression = parse_expression(source).expect("parse expression");
    evaluate(&expression, &())
}

fn int(v: i64) -> Value {
    Value::integer(v)
}

// ==================== Syntax: valid definitions ====================

#[test]
fn parse_empty_definition() {
    let tree = parse("").expect("empty definition parses");
    assert!(tree.statements.is_empty());
}

#[test]
fn parse_fields_with_cast_modes() {
    let tree = parse("uint8 a\nsaturated int16 b\ntruncated float32 c\nbool d\n").expect("parse");
    assert_eq!(tree.statements.len(), 4);
    let casts: Vec<Option<CastMode>> = tree
        .statements
        .iter()
        .map(|s| match &s.kind {
            StatementKind::Field {
                type_expr: TypeExpr::Scalar(scalar),
                ..
            } => scalar.cast_mode,
            other => panic!("unexpected statement {:?}", other),
        })
        .collect();
    assert_eq!(
        casts,
        vec![None, Some(CastMode::Saturated), Some(CastMode::Truncated), None]
    );
}

#[test]
fn parse_constants() {
    let tree = parse("uint8 A = 1\nfloat64 PI = 3.14159\nbool FLAG = true\n").expect("parse");
    let names: Vec<&str> = tree
        .statements
        .iter()
        .filter_map(|s| match &s.kind {
            StatementKind::Constant { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec!["A", "PI", "FLAG"]);
}

#[test]
fn parse_array_capacities() {
    let tree = parse("uint8[4] a\nuint8[<=4] b\nuint8[<5] c\n").expect("parse");
    let kinds: Vec<&str> = tree
        .statements
        .iter()
        .map(|s| match &s.kind {
            StatementKind::Field {
                type_expr: TypeExpr::Array { capacity, .. },
                ..
            } => match capacity {
                ArrayCapacity::Fixed(_) => "fixed",
                ArrayCapacity::Inclusive(_) => "inclusive",
                ArrayCapacity::Exclusive(_) => "exclusive",
            },
            other => panic!("unexpected statement {:?}", other),
        })
        .collect();
    assert_eq!(kinds, vec!["fixed", "inclusive", "exclusive"]);
}

#[test]
fn parse_versioned_reference() {
    let tree = parse("uavcan.node.Health.1.0 health\nPoint.2 p\nPoint q\n").expect("parse");
    let names: Vec<TypeName> = tree
        .statements
        .iter()
        .map(|s| match &s.kind {
            StatementKind::Field {
                type_expr: TypeExpr::Scalar(scalar),
                ..
            } => match &scalar.name {
                ScalarName::Versioned(name) => name.clone(),
                other => panic!("expected a composite, got {:?}", other),
            },
            other => panic!("unexpected statement {:?}", other),
        })
        .collect();
    assert_eq!(names[0], TypeName::new("uavcan.node.Health", Some(1), Some(0)));
    assert_eq!(names[1], TypeName::new("Point", Some(2), None));
    assert_eq!(names[2], TypeName::unversioned("Point"));
    assert!(!names[0].is_relative());
    assert!(names[2].is_relative());
    assert_eq!(names[0].to_string(), "uavcan.node.Health.1.0");
}

#[test]
fn parse_service_and_directives() {
    let src = "@union\nuint8 a\nuint16 b\n---\n@extent 64 * 8\n@print\nuint8 c\n";
    let tree = parse(src).expect("parse");
    let kinds: Vec<String> = tree
        .statements
        .iter()
        .map(|s| match &s.kind {
            StatementKind::Directive { name, expression } => {
                format!("@{}{}", name, if expression.is_some() { "(expr)" } else { "" })
            }
            StatementKind::ServiceResponseMarker => "---".to_string(),
            StatementKind::Field { name, .. } => name.clone(),
            other => format!("{:?}", other),
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["@union", "a", "b", "---", "@extent(expr)", "@print", "c"]
    );
}

#[test]
fn parse_padding_and_comments() {
    let tree = parse("# header\nvoid3\nuint5 x # trailing\n").expect("parse");
    assert!(matches!(tree.statements[0].kind, StatementKind::Comment(_)));
    assert!(matches!(&tree.statements[1].kind, StatementKind::Padding(p) if p == "void3"));
    assert!(matches!(tree.statements[2].kind, StatementKind::Field { .. }));
    assert!(matches!(tree.statements[3].kind, StatementKind::Comment(_)));
    assert_eq!(tree.statements[3].line, 3);
}

// ==================== Syntax: invalid definitions ====================

#[test]
fn parse_rejects_bad_statements() {
    for (src, line) in [
        ("uint8\n", 1),
        ("uint8 a b\n", 1),
        ("uint8 a\n@\n", 2),
        ("uint8 a\nuint8[] b\n", 2),
        ("uint8 A = \n", 1),
    ] {
        let err = parse(src).expect_err(src);
        assert_eq!(err.line, line, "{}", src);
    }
}

#[test]
fn parse_expression_rejects_trailing_input() {
    assert!(parse_expression("1 2").is_err());
    assert!(parse_expression("(1").is_err());
}

// ==================== Expressions ====================

#[test]
fn precedence_and_associativity() {
    assert_eq!(eval("1 + 2 * 3").unwrap(), int(7));
    assert_eq!(eval("(1 + 2) * 3").unwrap(), int(9));
    assert_eq!(eval("10 - 4 - 3").unwrap(), int(3));
    assert_eq!(eval("-2 ** 2").unwrap(), int(-4));
    assert_eq!(eval("2 ** 3 ** 2").unwrap(), int(512));
    assert_eq!(eval("1 + 2 == 3 && 2 > 1").unwrap(), Value::Boolean(true));
    assert_eq!(eval("6 | 1 ^ 3").unwrap(), int(4));
}

#[test]
fn literal_forms() {
    assert_eq!(eval("0x10 + 0b11 + 0o7").unwrap(), int(26));
    assert_eq!(eval("1_000 == 1e3").unwrap(), Value::Boolean(true));
    assert_eq!(eval("10 / 4 == 2.5").unwrap(), Value::Boolean(true));
    assert_eq!(eval("'it\\'s' + \"\\x21\"").unwrap(), Value::String("it's!".into()));
}

#[test]
fn rational_arithmetic_is_exact() {
    assert_eq!(eval("1/3 + 1/3 + 1/3").unwrap(), int(1));
    assert_eq!(eval("0.1 + 0.2 == 0.3").unwrap(), Value::Boolean(true));
    assert_eq!(eval("7 / 2 * 2").unwrap(), int(7));
    assert_eq!(eval("7 // 2 * 2").unwrap(), int(6));
    assert_eq!(eval("-1 // 3 == -1").unwrap(), Value::Boolean(true));
    assert_eq!(eval("{7, 9} // 2").unwrap(), eval("{3, 4}").unwrap());
}

#[test]
fn set_semantics() {
    assert_eq!(eval("{3} <= {1, 2, 3}").unwrap(), Value::Boolean(true));
    assert_eq!(eval("{4} <= {1, 2, 3}").unwrap(), Value::Boolean(false));
    assert_eq!(eval("{1, 2} ^ {2, 3}").unwrap(), eval("{3, 1}").unwrap());
    assert_eq!(eval("({1, 2, 3} * 8).max").unwrap(), int(24));
    assert_eq!(eval("{1, 2, 2, 1}.count").unwrap(), int(2));
    assert_eq!(eval("{1, 2} == {2, 1}").unwrap(), Value::Boolean(true));
    assert_eq!(eval("-{1, 2}").unwrap(), eval("{-1, -2}").unwrap());
}

#[test]
fn evaluation_errors() {
    for src in [
        "1 / 0",
        "1 % 0",
        "2 ** 0.5",
        "true + 1",
        "'a' * 2",
        "{1} + 'a'",
        "{1} & {2}",
        "1.5 | 1",
        "x + 1",
        "{1, 2}.median",
    ] {
        assert!(eval(src).is_err(), "{} should fail", src);
    }
}

#[test]
fn evaluation_error_names_subexpression() {
    let err = eval("3 + true").unwrap_err();
    assert_eq!(err.expression, "(3 + true)");
    assert!(err.to_string().contains("(3 + true)"));
}
