//! Integration tests: sessions over in-memory and on-disk namespaces. Covers demand
//! builds, memoization, cycles, version selection, layout and validation.

use dsdlc::{
    BitLengthSet, CompositeKind, CompositeTable, CompositeType, Definition, DefinitionError,
    DefinitionKey, ErrorKind, FileSystem, MemoryTree, Options, Session, TypeName, Version,
};
use std::fs;

const ROOT: &str = "/dsdl/ns";

fn tree(files: &[(&str, &str)]) -> MemoryTree {
    let mut tree = MemoryTree::new();
    for (name, source) in files {
        tree.insert(format!("{}/{}", ROOT, name), *source);
    }
    tree
}

fn session_with(files: &[(&str, &str)], options: Options) -> Session<MemoryTree> {
    let mut session = Session::new(tree(files), options);
    session.add_target_root(ROOT);
    session
}

fn session(files: &[(&str, &str)]) -> Session<MemoryTree> {
    session_with(files, Options::default())
}

fn name(full: &str, major: u32, minor: u32) -> TypeName {
    TypeName::new(full, Some(major), Some(minor))
}

fn key(full: &str, major: u8, minor: u8) -> DefinitionKey {
    DefinitionKey {
        full_name: full.to_string(),
        version: Version::new(major, minor),
    }
}

fn kinds(session: &Session<MemoryTree>) -> Vec<ErrorKind> {
    session
        .diagnostics()
        .iter()
        .filter(|d| d.is_error())
        .map(|d| d.kind())
        .collect()
}

// ==================== Layout ====================

#[test]
fn variable_array_bit_lengths() {
    let mut s = session(&[("A.1.0.dsdl", "uint7[<=3] values\n@sealed\n")]);
    let a = s.resolve(&name("ns.A", 1, 0)).expect("resolve");
    assert_eq!(a.bit_length_set(), &BitLengthSet::of([2, 9, 16, 23]));
    assert_eq!(a.extent, 23);
}

#[test]
fn union_bit_lengths() {
    let mut s = session(&[("U.1.0.dsdl", "@union\nuint8 a\nuint16 b\n@sealed\n")]);
    let u = s.resolve(&name("ns.U", 1, 0)).expect("resolve");
    assert_eq!(u.kind, CompositeKind::Union);
    assert_eq!(u.discriminant_width(), Some(1));
    assert_eq!(u.bit_length_set(), &BitLengthSet::of([9, 17]));
}

#[test]
fn fixed_array_bit_lengths() {
    let mut s = session(&[("F.1.0.dsdl", "uint8[4] data\n@sealed\n")]);
    let f = s.resolve(&name("ns.F", 1, 0)).expect("resolve");
    assert_eq!(f.bit_length_set(), &BitLengthSet::new(32));
}

#[test]
fn delimited_composite_as_field() {
    let mut s = session(&[
        ("Inner.1.0.dsdl", "uint8 a\n@extent 16\n"),
        ("Outer.1.0.dsdl", "Inner.1.0 inner\n@sealed\n"),
        ("Packed.1.0.dsdl", "SealedInner.1.0 inner\n@sealed\n"),
        ("SealedInner.1.0.dsdl", "uint12 a\n@sealed\n"),
    ]);
    let outer = s.resolve(&name("ns.Outer", 1, 0)).expect("outer");
    assert_eq!(outer.bit_length_set(), &BitLengthSet::of([32, 40, 48]));
    let packed = s.resolve(&name("ns.Packed", 1, 0)).expect("packed");
    assert_eq!(packed.bit_length_set(), &BitLengthSet::new(12));
}

#[test]
fn default_extent_rounds_up_to_bytes() {
    let mut s = session(&[("E.1.0.dsdl", "uint3 a\nbool b\n")]);
    let e = s.resolve(&name("ns.E", 1, 0)).expect("resolve");
    assert_eq!(e.max_bit_length(), 4);
    assert_eq!(e.extent, 8);
    assert!(!e.extent_declared);
    assert!(e.is_delimited());
}

#[test]
fn arrays_of_delimited_composites() {
    let mut s = session(&[
        ("Item.1.0.dsdl", "uint8 a\n@extent 256 * 8\n"),
        ("Box.1.0.dsdl", "Item.1.0[<=255] items\n@sealed\n"),
    ]);
    let item = s.resolve(&name("ns.Item", 1, 0)).expect("item").clone();
    assert_eq!(item.extent, 2048);
    let boxed = s.resolve(&name("ns.Box", 1, 0)).expect("box");
    let lengths = boxed.bit_length_set();
    assert_eq!(lengths.min(), 8);
    assert_eq!(lengths.max(), 8 + 255 * (32 + 2048));
    assert!(lengths.contains(8 + 32));
    assert!(!lengths.contains(8 + 8));
    assert_eq!(boxed.extent, lengths.max());
}

#[test]
fn oversized_layouts_are_extent_violations() {
    let mut s = session(&[
        ("Huge.1.0.dsdl", "uint64[0x400000000000000] a\n@sealed\n"),
        ("Wide.1.0.dsdl", "uint8[<=2**40] a\n@sealed\n"),
        ("Roomy.1.0.dsdl", "uint8 a\n@extent 8 * 2 ** 30\n"),
    ]);
    let report = s.build_all();
    assert!(report.published.is_empty());
    assert_eq!(
        kinds(&s),
        vec![
            ErrorKind::ExtentViolation,
            ErrorKind::ExtentViolation,
            ErrorKind::ExtentViolation
        ]
    );
}

// ==================== Memoization and identity ====================

#[test]
fn repeated_resolution_yields_identical_composite() {
    let mut s = session(&[
        ("A.1.0.dsdl", "uint8 a\n@sealed\n"),
        ("B.1.0.dsdl", "A.1.0 first\nns.A.1.0 second\nA third\n@sealed\n"),
    ]);
    let b: CompositeType = s.resolve(&name("ns.B", 1, 0)).expect("resolve").clone();
    assert_eq!(s.build_count(), 2);

    let ids: Vec<_> = b
        .fields()
        .map(|f| f.ty.as_composite().expect("composite").id)
        .collect();
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().all(|id| *id == ids[0]));

    let first = s.resolve(&name("ns.A", 1, 0)).expect("resolve") as *const CompositeType;
    let second = s.resolve(&TypeName::unversioned("ns.A")).expect("resolve") as *const CompositeType;
    assert_eq!(first, second);
    assert!(std::ptr::eq(first, s.composite(ids[0])));
    assert_eq!(s.build_count(), 2);
}

// ==================== Cycles and failures ====================

#[test]
fn self_reference_is_a_cycle() {
    let mut s = session(&[("A.1.0.dsdl", "A.1.0 again\n")]);
    let err = s.resolve(&name("ns.A", 1, 0)).unwrap_err();
    assert_eq!(
        err,
        DefinitionError::CyclicDependency(vec!["ns.A.1.0".to_string(), "ns.A.1.0".to_string()])
    );
    assert!(s.definition(&key("ns.A", 1, 0)).is_none());
    assert_eq!(s.resolve(&name("ns.A", 1, 0)).unwrap_err(), err);
    assert_eq!(s.build_count(), 1);
}

#[test]
fn transitive_cycle_names_every_member() {
    let mut s = session(&[
        ("A.1.0.dsdl", "B.1.0 b\n"),
        ("B.1.0.dsdl", "uint8 x\nA.1.0 a\n"),
    ]);
    let err = s.resolve(&name("ns.A", 1, 0)).unwrap_err();
    assert_eq!(
        err,
        DefinitionError::CyclicDependency(vec![
            "ns.A.1.0".to_string(),
            "ns.B.1.0".to_string(),
            "ns.A.1.0".to_string(),
        ])
    );
    assert_eq!(s.published().count(), 0);
    let cyclic: Vec<_> = s
        .diagnostics()
        .iter()
        .filter(|d| d.kind() == ErrorKind::CyclicDependency)
        .map(|d| (d.locator.path.to_string_lossy().into_owned(), d.locator.line))
        .collect();
    assert_eq!(
        cyclic,
        vec![
            (format!("{}/B.1.0.dsdl", ROOT), Some(2)),
            (format!("{}/A.1.0.dsdl", ROOT), Some(1)),
        ]
    );
}

#[test]
fn dependency_failure_names_root_cause() {
    let mut s = session(&[
        ("C.1.0.dsdl", "uint8 a\nD.1.0 d\n"),
        ("D.1.0.dsdl", "uint8 x\nuint8 x y\n"),
    ]);
    match s.resolve(&name("ns.C", 1, 0)) {
        Err(DefinitionError::Lookup(message)) => {
            assert!(message.contains("dependency ns.D.1.0 failed"), "{}", message)
        }
        other => panic!("expected a lookup error, got {:?}", other.map(|c| c.name.clone())),
    }
    assert!(kinds(&s).contains(&ErrorKind::Syntax));
    assert!(kinds(&s).contains(&ErrorKind::Lookup));
}

#[test]
fn every_error_in_a_file_is_reported() {
    let mut s = session(&[(
        "Bad.1.0.dsdl",
        "uint8 Value\nuint8 value\nuint8 X = 300\n@assert false\nMissing.1.0 m\n",
    )]);
    let report = s.build_all();
    assert!(report.published.is_empty());
    let errors: Vec<(Option<usize>, ErrorKind)> = report
        .errors()
        .map(|d| (d.locator.line, d.kind()))
        .collect();
    assert_eq!(
        errors,
        vec![
            (Some(2), ErrorKind::AttributeCollision),
            (Some(3), ErrorKind::Evaluation),
            (Some(4), ErrorKind::AssertionFailure),
            (Some(5), ErrorKind::Lookup),
        ]
    );
}

// ==================== Version selection ====================

#[test]
fn version_selection() {
    let files = [
        ("V.1.0.dsdl", "uint8 a\n"),
        ("V.1.1.dsdl", "uint8 a\nuint8 b\n"),
        ("V.2.0.dsdl", "uint16 a\n"),
    ];
    let mut s = session(&files);
    assert_eq!(
        s.resolve(&TypeName::unversioned("ns.V")).unwrap().version,
        Version::new(2, 0)
    );
    assert_eq!(
        s.resolve(&TypeName::new("ns.V", Some(1), None)).unwrap().version,
        Version::new(1, 1)
    );

    let lookup = |result: Result<&CompositeType, DefinitionError>| match result {
        Err(DefinitionError::Lookup(message)) => message,
        other => panic!("expected a lookup error, got {:?}", other.map(|c| c.name.clone())),
    };
    assert!(lookup(s.resolve(&name("ns.V", 1, 7))).contains("no suitable minor version"));
    assert!(lookup(s.resolve(&TypeName::new("ns.V", Some(3), None))).contains("no suitable major version"));
    assert!(lookup(s.resolve(&TypeName::unversioned("ns.W"))).contains("no type named"));
}

#[test]
fn reference_to_other_version_of_self_is_rejected() {
    let mut s = session(&[
        ("V.1.0.dsdl", "uint8 a\n"),
        ("V.2.0.dsdl", "ns.V.1.0 old\n"),
    ]);
    assert!(matches!(
        s.resolve(&name("ns.V", 2, 0)),
        Err(DefinitionError::Lookup(_))
    ));
    assert!(s.resolve(&name("ns.V", 1, 0)).is_ok());
}

#[test]
fn ambiguous_across_roots() {
    let tree = MemoryTree::new()
        .with("/first/ns/A.1.0.dsdl", "uint8 a\n")
        .with("/second/ns/A.1.0.dsdl", "uint16 a\n")
        .with("/second/ns/B.1.0.dsdl", "uint8 b\n");
    let mut s = Session::new(tree, Options::default());
    s.add_target_root("/first/ns");
    s.add_lookup_root("/second/ns");
    assert!(matches!(
        s.resolve(&name("ns.A", 1, 0)),
        Err(DefinitionError::AmbiguousDefinition(_))
    ));
    assert!(s.diagnostics()[0].error.to_string().contains("defined in more than one root"));
    assert!(s.resolve(&name("ns.B", 1, 0)).is_ok());
    let report = s.build_all();
    assert!(report.published.is_empty());
}

#[test]
fn duplicate_within_one_root() {
    let mut s = session(&[
        ("7509.A.1.0.dsdl", "uint8 a\n"),
        ("A.1.0.dsdl", "uint8 a\n"),
    ]);
    let error = s.resolve(&name("ns.A", 1, 0)).expect_err("duplicate definition");
    assert!(matches!(error, DefinitionError::AmbiguousDefinition(_)));
    let message = error.to_string();
    assert!(message.contains("defined more than once in /dsdl/ns"), "{}", message);
    assert!(!message.contains("more than one root"), "{}", message);
    assert_eq!(kinds(&s), vec![ErrorKind::AmbiguousDefinition; 2]);
}

// ==================== Compatibility ====================

#[test]
fn appended_minor_version_is_compatible() {
    let mut s = session(&[
        ("M.1.0.dsdl", "uint8 a\n@extent 64\n"),
        ("M.1.1.dsdl", "uint8 a\nuint8 b\n@extent 64\n"),
    ]);
    let report = s.build_all();
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(report.published, vec![key("ns.M", 1, 0), key("ns.M", 1, 1)]);
}

#[test]
fn reordered_minor_version_is_incompatible() {
    let mut s = session(&[
        ("M.1.0.dsdl", "uint8 a\nuint8 b\n@extent 64\n"),
        ("M.1.1.dsdl", "uint8 b\nuint8 a\n@extent 64\n"),
    ]);
    let report = s.build_all();
    assert_eq!(report.published, vec![key("ns.M", 1, 0)]);
    assert!(report
        .errors()
        .all(|d| d.kind() == ErrorKind::Compatibility));
    assert!(report.has_errors());
}

#[test]
fn sealed_minor_version_must_keep_layout() {
    let mut s = session(&[
        ("S.1.0.dsdl", "uint8 a\n@sealed\n"),
        ("S.1.1.dsdl", "uint8 a\nuint8 b\n@sealed\n"),
    ]);
    let report = s.build_all();
    assert_eq!(report.published, vec![key("ns.S", 1, 0)]);
    assert!(kinds(&s).contains(&ErrorKind::Compatibility));
}

#[test]
fn new_major_version_is_not_checked() {
    let mut s = session(&[
        ("M.1.0.dsdl", "uint8 a\n@sealed\n"),
        ("M.2.0.dsdl", "float64 z\n@sealed\n"),
    ]);
    assert!(!s.build_all().has_errors());
}

// ==================== Validation ====================

#[test]
fn case_insensitive_attribute_collision() {
    let mut s = session(&[("C.1.0.dsdl", "uint8 Value\nuint8 value\n")]);
    assert!(s.resolve(&name("ns.C", 1, 0)).is_err());
    assert_eq!(kinds(&s), vec![ErrorKind::AttributeCollision]);
}

#[test]
fn extent_must_cover_max_bit_length() {
    let mut s = session(&[
        ("Small.1.0.dsdl", "uint8[16] data\n@extent 64\n"),
        ("Odd.1.0.dsdl", "uint8 a\n@extent 12\n"),
        ("Exact.1.0.dsdl", "uint8[16] data\n@extent 128\n"),
    ]);
    let report = s.build_all();
    assert_eq!(report.published, vec![key("ns.Exact", 1, 0)]);
    assert_eq!(
        kinds(&s),
        vec![ErrorKind::ExtentViolation, ErrorKind::ExtentViolation]
    );
}

#[test]
fn sealed_extent_equals_max() {
    let mut s = session(&[("S.1.0.dsdl", "uint8[<=5] data\nbool f\n@sealed\n")]);
    let c = s.resolve(&name("ns.S", 1, 0)).unwrap();
    assert!(c.sealed);
    assert_eq!(c.extent, c.max_bit_length());
    assert_eq!(c.extent, 3 + 40 + 1);
}

#[test]
fn explicit_extent_can_be_required() {
    let options = Options {
        require_explicit_extent: true,
        ..Options::default()
    };
    let mut s = session_with(&[("A.1.0.dsdl", "uint8 a\n")], options);
    assert!(s.resolve(&name("ns.A", 1, 0)).is_err());
    assert_eq!(kinds(&s), vec![ErrorKind::ExtentViolation]);
}

#[test]
fn fixed_port_ids() {
    let files = [
        ("7000.Pub.1.0.dsdl", "uint8 a\n@sealed\n"),
        ("100.Low.1.0.dsdl", "uint8 a\n@sealed\n"),
        ("300.Call.1.0.dsdl", "uint8 a\n@sealed\n---\n@sealed\n"),
    ];
    let mut s = session(&files);
    let report = s.build_all();
    assert_eq!(
        report.published,
        vec![key("ns.Call", 1, 0), key("ns.Pub", 1, 0)]
    );
    assert_eq!(kinds(&s), vec![ErrorKind::PortIdRange]);
    assert_eq!(
        s.resolve(&name("ns.Pub", 1, 0)).unwrap().fixed_port_id,
        Some(7000)
    );

    let options = Options {
        allow_unregulated_fixed_port_id: true,
        ..Options::default()
    };
    let mut s = session_with(&files, options);
    assert!(!s.build_all().has_errors());
}

#[test]
fn deprecated_dependency_warns() {
    let files = [
        ("Old.1.0.dsdl", "@deprecated\nuint8 a\n@sealed\n"),
        ("New.1.0.dsdl", "Old.1.0 old\n@sealed\n"),
        ("AlsoOld.1.0.dsdl", "@deprecated\nOld.1.0 old\n@sealed\n"),
    ];
    let mut s = session(&files);
    let report = s.build_all();
    assert_eq!(report.published.len(), 3);
    let warnings: Vec<_> = report.diagnostics.iter().filter(|d| !d.is_error()).collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].kind(), ErrorKind::DeprecatedUsage);
    assert_eq!(warnings[0].locator.line, Some(1));

    let options = Options {
        strict_deprecation: true,
        ..Options::default()
    };
    let mut s = session_with(&files, options);
    let report = s.build_all();
    assert_eq!(report.published.len(), 2);
    assert_eq!(kinds(&s), vec![ErrorKind::DeprecatedUsage]);
}

// ==================== Services and expressions ====================

#[test]
fn service_definitions() {
    let mut s = session(&[
        ("Srv.1.0.dsdl", "uint8 x\n@sealed\n---\nuint16 y\nuint16 z\n@sealed\n"),
        ("UsesSrv.1.0.dsdl", "Srv.1.0 s\n"),
    ]);
    let service = match s.resolve_definition(&name("ns.Srv", 1, 0)).expect("service") {
        Definition::Service(service) => service.clone(),
        other => panic!("expected a service, got {:?}", other),
    };
    assert_eq!(s.composite(service.request).name, "ns.Srv.Request");
    assert_eq!(s.composite(service.response).max_bit_length(), 32);
    assert_eq!(s.composite(service.response).kind, CompositeKind::ServiceResponse);
    assert!(matches!(
        s.resolve(&name("ns.Srv", 1, 0)),
        Err(DefinitionError::Lookup(_))
    ));
    assert!(s.resolve(&name("ns.UsesSrv", 1, 0)).is_err());
}

#[test]
fn expressions_see_other_types() {
    let mut s = session(&[
        ("A.1.0.dsdl", "uint8 SIZE = 4\nuint8 a\n@extent 64\n"),
        (
            "B.1.0.dsdl",
            "uint8 N = A.1.0.SIZE\n\
             @assert A.1.0._extent_ == 64\n\
             @assert A.1.0._bit_length_ == {8}\n\
             uint8[N] data\n\
             @assert _offset_ == {32}\n\
             @assert _offset_.max % 8 == 0\n\
             @sealed\n",
        ),
    ]);
    let b = s.resolve(&name("ns.B", 1, 0)).expect("resolve");
    assert_eq!(b.bit_length_set(), &BitLengthSet::new(32));
    assert_eq!(b.constant("N"), Some(&dsdlc::Value::integer(4)));
}

#[test]
fn build_all_is_deterministic() {
    let files = [
        ("A.1.0.dsdl", "uint8 a\n"),
        ("B.1.0.dsdl", "A.1.0 a\nC.1.0 c\n"),
        ("C.1.0.dsdl", "B.1.0 b\n"),
        ("D.1.0.dsdl", "uint8 D\nuint8 d\n"),
    ];
    let first = session(&files).build_all();
    let second = session(&files).build_all();
    assert_eq!(first.published, second.published);
    assert_eq!(first.diagnostics, second.diagnostics);
    assert_eq!(first.published, vec![key("ns.A", 1, 0)]);
}

#[test]
fn bad_file_names_are_reported() {
    let mut s = session(&[("NoVersion.dsdl", "uint8 a\n"), ("Good.1.0.dsdl", "uint8 a\n")]);
    let report = s.build_all();
    assert_eq!(report.published, vec![key("ns.Good", 1, 0)]);
    assert_eq!(kinds(&s), vec![ErrorKind::Syntax]);
}

// ==================== File system ====================

#[test]
fn builds_namespace_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("demo");
    fs::create_dir_all(root.join("geometry")).expect("mkdir");
    fs::write(
        root.join("geometry").join("Point.1.0.dsdl"),
        "float32 x\nfloat32 y\n@sealed\n",
    )
    .expect("write");
    fs::write(
        root.join("7100.Path.1.0.dsdl"),
        "demo.geometry.Point.1.0[<=16] points\n@extent 1024 * 8\n",
    )
    .expect("write");
    fs::write(root.join("notes.txt"), "not a definition").expect("write");

    let mut s = Session::new(FileSystem, Options::default());
    s.add_target_root(&root);
    let report = s.build_all();
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    assert_eq!(
        report.published,
        vec![key("demo.Path", 1, 0), key("demo.geometry.Point", 1, 0)]
    );
    let path = s.resolve(&name("demo.Path", 1, 0)).unwrap();
    assert_eq!(path.max_bit_length(), 5 + 16 * 64);
    assert_eq!(path.fixed_port_id, Some(7100));
}
