//! # dsdlc: DSDL compiler frontend
//!
//! Parses DSDL definition files, resolves type references across versioned
//! namespaces, evaluates compile-time constant expressions, and produces a fully
//! typed, validated model of every definition together with the set of all
//! lengths (in bits) its serialized form can take. Code generation is left to
//! consumers of the model.
//!
//! ## Definitions
//!
//! A root namespace is a directory. Each file under it defines one message or
//! service type; the path gives its full name and the file name gives its version
//! and optional fixed port ID: `uavcan/node/7509.Heartbeat.1.0.dsdl`.
//!
//! ```text
//! # A variable-length array of 7-bit values.
//! uint8 CAPACITY = 3
//! uint7[<=CAPACITY] values
//! @assert _offset_ == {2, 9, 16, 23}
//! @sealed
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use dsdlc::{MemoryTree, Options, Session, TypeName};
//!
//! let tree = MemoryTree::new().with("/ns/Point.1.0.dsdl", "float32 x\nfloat32 y\n@sealed\n");
//! let mut session = Session::new(tree, Options::default());
//! session.add_target_root("/ns");
//! let point = session.resolve(&TypeName::unversioned("ns.Point")).unwrap();
//! assert_eq!(point.max_bit_length(), 64);
//! ```
//!
//! [`Session::build_all`] builds everything under the target roots and returns every
//! diagnostic; nothing aborts on bad input.

pub mod ast;
pub mod bit_length_set;
pub mod builder;
pub mod error;
pub mod expression;
pub mod namespace;
pub mod options;
pub mod parser;
pub mod session;
pub mod types;
pub mod validate;

pub use ast::{DefinitionTree, Expression, Statement, StatementKind, TypeName};
pub use bit_length_set::{BitLengthSet, LengthOverflow, MAX_BIT_LENGTH};
pub use builder::{build_definition, BuildOutcome, Built, Resolver};
pub use error::{
    DefinitionError, Diagnostic, ErrorKind, EvaluationError, Locator, ParseError, Severity,
};
pub use expression::{evaluate, Bindings, Value};
pub use namespace::{DefinitionFile, DefinitionKey, FileSystem, MemoryTree, SourceTree};
pub use options::Options;
pub use parser::{parse, parse_expression};
pub use session::{Report, Session};
pub use types::{
    ArrayKind, Attribute, AttributeKind, CastMode, CompositeId, CompositeKind, CompositeRef,
    CompositeTable, CompositeType, Definition, SerializableType, ServiceType, Version,
};
pub use validate::{AdditivePolicy, CompatibilityPolicy};
