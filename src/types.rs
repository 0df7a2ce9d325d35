//! Serializable type model: primitives, arrays, composites and services.
//!
//! Composites live in the session arena and are referred to through
//! [`CompositeRef`]; a reference carries the arena index plus the name and version
//! for display and structural comparison. Bit length sets of composites are
//! computed once, when the composite is assembled, and stored on it.

use crate::bit_length_set::{bits_to_represent, discriminant_width, BitLengthSet, LengthOverflow};
use crate::expression::Value;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Zero};
use std::fmt;
use std::path::PathBuf;

/// Size of the delimiter header prepended to non-sealed composites nested as fields.
pub const DELIMITER_HEADER_BITS: u64 = 32;

/// Byte alignment required of declared extents.
pub const BYTE_BITS: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum CastMode {
    #[default]
    Saturated,
    Truncated,
}

impl fmt::Display for CastMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CastMode::Saturated => write!(f, "saturated"),
            CastMode::Truncated => write!(f, "truncated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub fn new(major: u8, minor: u8) -> Self {
        Version { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Index of a composite in the session arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeId(pub(crate) usize);

impl CompositeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Non-owning reference to a published composite.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeRef {
    pub id: CompositeId,
    pub name: String,
    pub version: Version,
}

impl fmt::Display for CompositeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.version)
    }
}

/// Read access to published composites.
pub trait CompositeTable {
    fn composite(&self, id: CompositeId) -> &CompositeType;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArrayKind {
    Fixed { length: u64 },
    VariableInclusive { max_length: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayType {
    pub element: Box<SerializableType>,
    pub kind: ArrayKind,
}

impl ArrayType {
    pub fn capacity(&self) -> u64 {
        match self.kind {
            ArrayKind::Fixed { length } => length,
            ArrayKind::VariableInclusive { max_length } => max_length,
        }
    }

    /// Width of the implicit length prefix; zero for fixed arrays.
    pub fn length_prefix_width(&self) -> u64 {
        match self.kind {
            ArrayKind::Fixed { .. } => 0,
            ArrayKind::VariableInclusive { max_length } => bits_to_represent(max_length),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SerializableType {
    Void { width: u8 },
    Boolean,
    Integer {
        width: u8,
        signed: bool,
        cast_mode: CastMode,
    },
    Float { width: u8, cast_mode: CastMode },
    Array(ArrayType),
    Composite(CompositeRef),
}

impl SerializableType {
    /// Primitive type from its token text: `bool`, `uint8`, `int64`, `float16`, `void3`.
    pub fn primitive(name: &str, cast_mode: Option<CastMode>) -> Result<Self, String> {
        let invalid = || format!("Invalid type declaration: {}", name);
        if name == "bool" {
            return Ok(SerializableType::Boolean);
        }
        let split = name.find(|c: char| c.is_ascii_digit()).ok_or_else(invalid)?;
        let (prefix, digits) = name.split_at(split);
        if digits.starts_with('0') || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let width: u8 = digits.parse().map_err(|_| invalid())?;
        let cast = cast_mode.unwrap_or_default();
        match prefix {
            "uint" if (1..=64).contains(&width) => Ok(SerializableType::Integer {
                width,
                signed: false,
                cast_mode: cast,
            }),
            "int" if (2..=64).contains(&width) => Ok(SerializableType::Integer {
                width,
                signed: true,
                cast_mode: cast,
            }),
            "float" if matches!(width, 16 | 32 | 64) => Ok(SerializableType::Float {
                width,
                cast_mode: cast,
            }),
            "void" if (1..=64).contains(&width) => match cast_mode {
                Some(_) => Err(format!("Cast mode cannot be applied to padding type {}", name)),
                None => Ok(SerializableType::Void { width }),
            },
            _ => Err(invalid()),
        }
    }

    /// Array of `element`. Nested arrays and void elements are rejected.
    pub fn array(element: SerializableType, kind: ArrayKind) -> Result<Self, String> {
        match element {
            SerializableType::Array(_) => {
                return Err("Arrays of arrays are not allowed; nest through a composite".to_string())
            }
            SerializableType::Void { .. } => {
                return Err("Arrays of padding types are not allowed".to_string())
            }
            _ => {}
        }
        let capacity = match kind {
            ArrayKind::Fixed { length } => length,
            ArrayKind::VariableInclusive { max_length } => max_length,
        };
        if capacity < 1 {
            return Err(format!("Invalid array size: {}", capacity));
        }
        Ok(SerializableType::Array(ArrayType {
            element: Box::new(element),
            kind,
        }))
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            SerializableType::Boolean
                | SerializableType::Integer { .. }
                | SerializableType::Float { .. }
                | SerializableType::Void { .. }
        )
    }

    pub fn is_void(&self) -> bool {
        matches!(self, SerializableType::Void { .. })
    }

    pub fn as_composite(&self) -> Option<&CompositeRef> {
        match self {
            SerializableType::Composite(r) => Some(r),
            _ => None,
        }
    }

    /// The composite this type is, or holds as array element.
    pub fn composite_dependency(&self) -> Option<&CompositeRef> {
        match self {
            SerializableType::Composite(r) => Some(r),
            SerializableType::Array(a) => a.element.composite_dependency(),
            _ => None,
        }
    }

    /// Inclusive range of an integer type.
    pub fn integer_range(&self) -> Option<(BigInt, BigInt)> {
        match self {
            SerializableType::Integer { width, signed, .. } => {
                let width = usize::from(*width);
                if *signed {
                    let half: BigInt = BigInt::one() << (width - 1);
                    Some((-half.clone(), half - 1))
                } else {
                    let max: BigInt = (BigInt::one() << width) - 1;
                    Some((BigInt::zero(), max))
                }
            }
            _ => None,
        }
    }

    /// Largest finite magnitude of a float type, exactly.
    pub fn float_max(&self) -> Option<BigRational> {
        match self {
            SerializableType::Float { width: 16, .. } => {
                Some(BigRational::from_integer(BigInt::from(65504)))
            }
            SerializableType::Float { width: 32, .. } => BigRational::from_float(f64::from(f32::MAX)),
            SerializableType::Float { .. } => BigRational::from_float(f64::MAX),
            _ => None,
        }
    }

    /// All serialized lengths of a value of this type.
    pub fn bit_length_set(&self, table: &dyn CompositeTable) -> Result<BitLengthSet, LengthOverflow> {
        match self {
            SerializableType::Void { width }
            | SerializableType::Integer { width, .. }
            | SerializableType::Float { width, .. } => Ok(BitLengthSet::new(u64::from(*width))),
            SerializableType::Boolean => Ok(BitLengthSet::new(1)),
            SerializableType::Array(array) => {
                let element = array.element.bit_length_set(table)?;
                match array.kind {
                    ArrayKind::Fixed { length } => element.repeat(length),
                    ArrayKind::VariableInclusive { max_length } => element
                        .repeat_range(max_length)?
                        .shift(array.length_prefix_width()),
                }
            }
            SerializableType::Composite(r) => Ok(table.composite(r.id).field_bit_length_set().clone()),
        }
    }
}

impl fmt::Display for SerializableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializableType::Void { width } => write!(f, "void{}", width),
            SerializableType::Boolean => write!(f, "bool"),
            SerializableType::Integer {
                width,
                signed,
                cast_mode,
            } => write!(f, "{} {}int{}", cast_mode, if *signed { "" } else { "u" }, width),
            SerializableType::Float { width, cast_mode } => write!(f, "{} float{}", cast_mode, width),
            SerializableType::Array(array) => match array.kind {
                ArrayKind::Fixed { length } => write!(f, "{}[{}]", array.element, length),
                ArrayKind::VariableInclusive { max_length } => {
                    write!(f, "{}[<={}]", array.element, max_length)
                }
            },
            SerializableType::Composite(r) => write!(f, "{}", r),
        }
    }
}

// ==================== Attributes ====================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeKind {
    Field,
    Padding,
    Constant(Value),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Empty for padding fields.
    pub name: String,
    pub ty: SerializableType,
    pub kind: AttributeKind,
    pub line: usize,
}

impl Attribute {
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, AttributeKind::Constant(_))
    }

    pub fn is_padding(&self) -> bool {
        matches!(self.kind, AttributeKind::Padding)
    }

    /// Fields and padding: everything that occupies bits on the wire.
    pub fn is_serialized(&self) -> bool {
        !self.is_constant()
    }

    pub fn constant_value(&self) -> Option<&Value> {
        match &self.kind {
            AttributeKind::Constant(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            AttributeKind::Field => write!(f, "{} {}", self.ty, self.name),
            AttributeKind::Padding => write!(f, "{}", self.ty),
            AttributeKind::Constant(v) => write!(f, "{} {} = {}", self.ty, self.name, v),
        }
    }
}

// ==================== Composites ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositeKind {
    Message,
    Union,
    ServiceRequest,
    ServiceResponse,
}

/// A built, validated composite. Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeType {
    /// Fully qualified: `ns.sub.Type`, or `ns.Service.Request` for service halves.
    pub name: String,
    pub version: Version,
    pub kind: CompositeKind,
    /// Set for `Union` and for service halves marked `@union`.
    pub tagged_union: bool,
    pub attributes: Vec<Attribute>,
    pub extent: u64,
    /// True when the extent came from an `@extent` directive.
    pub extent_declared: bool,
    pub sealed: bool,
    pub deprecated: bool,
    pub fixed_port_id: Option<u32>,
    pub source: PathBuf,
    bit_length_set: BitLengthSet,
    field_bit_length_set: BitLengthSet,
}

impl CompositeType {
    pub fn full_name(&self) -> &str {
        &self.name
    }

    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn full_namespace(&self) -> &str {
        self.name.rsplit_once('.').map(|(ns, _)| ns).unwrap_or("")
    }

    pub fn root_namespace(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    pub fn is_union(&self) -> bool {
        self.tagged_union
    }

    pub fn is_delimited(&self) -> bool {
        !self.sealed
    }

    /// Fields and padding, in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| a.is_serialized())
    }

    pub fn constants(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| a.is_constant())
    }

    pub fn constant(&self, name: &str) -> Option<&Value> {
        self.constants()
            .find(|a| a.name == name)
            .and_then(Attribute::constant_value)
    }

    pub fn number_of_variants(&self) -> usize {
        if self.tagged_union {
            self.fields().count()
        } else {
            0
        }
    }

    pub fn discriminant_width(&self) -> Option<u64> {
        if self.tagged_union {
            Some(discriminant_width(self.number_of_variants()))
        } else {
            None
        }
    }

    /// Lengths of the composite's own serialized form.
    pub fn bit_length_set(&self) -> &BitLengthSet {
        &self.bit_length_set
    }

    /// Lengths when nested as a field: the composite itself when sealed, otherwise a
    /// delimiter header followed by any byte count up to the extent.
    pub fn field_bit_length_set(&self) -> &BitLengthSet {
        &self.field_bit_length_set
    }

    pub fn max_bit_length(&self) -> u64 {
        self.bit_length_set.max()
    }
}

impl fmt::Display for CompositeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.version)
    }
}

/// Bit length set of an attribute list laid out as a structure or a tagged union.
pub fn aggregate_bit_length_set(
    tagged_union: bool,
    attributes: &[Attribute],
    table: &dyn CompositeTable,
) -> Result<BitLengthSet, LengthOverflow> {
    let mut sets = attributes
        .iter()
        .filter(|a| a.is_serialized())
        .map(|a| a.ty.bit_length_set(table));
    if tagged_union {
        let mut count = 0usize;
        let mut variants: Option<BitLengthSet> = None;
        for set in sets {
            let set = set?;
            count += 1;
            variants = Some(match variants {
                Some(acc) => acc.alternate(&set)?,
                None => set,
            });
        }
        match variants {
            Some(v) => v.shift(discriminant_width(count)),
            None => Ok(BitLengthSet::new(0)),
        }
    } else {
        sets.try_fold(BitLengthSet::default(), |acc, set| acc.concatenate(&set?))
    }
}

/// Everything a composite needs before its lengths are computed.
#[derive(Debug, Clone)]
pub(crate) struct CompositeDraft {
    pub name: String,
    pub version: Version,
    pub kind: CompositeKind,
    pub tagged_union: bool,
    pub attributes: Vec<Attribute>,
    pub sealed: bool,
    pub declared_extent: Option<u64>,
    pub deprecated: bool,
    pub fixed_port_id: Option<u32>,
    pub source: PathBuf,
}

impl CompositeDraft {
    /// Computes the bit length sets and the extent. Without `@sealed` or `@extent` the
    /// extent is the maximum length rounded up to a whole byte.
    pub fn finish(self, table: &dyn CompositeTable) -> Result<CompositeType, LengthOverflow> {
        let bit_length_set = aggregate_bit_length_set(self.tagged_union, &self.attributes, table)?;
        let max = bit_length_set.max();
        let extent = if self.sealed {
            max
        } else {
            self.declared_extent
                .unwrap_or_else(|| max.div_ceil(BYTE_BITS) * BYTE_BITS)
        };
        let field_bit_length_set = if self.sealed {
            bit_length_set.clone()
        } else {
            BitLengthSet::new(BYTE_BITS)
                .repeat_range(extent.div_ceil(BYTE_BITS))?
                .shift(DELIMITER_HEADER_BITS)?
        };
        Ok(CompositeType {
            name: self.name,
            version: self.version,
            kind: self.kind,
            tagged_union: self.tagged_union,
            attributes: self.attributes,
            extent,
            extent_declared: self.declared_extent.is_some(),
            sealed: self.sealed,
            deprecated: self.deprecated,
            fixed_port_id: self.fixed_port_id,
            source: self.source,
            bit_length_set,
            field_bit_length_set,
        })
    }
}

// ==================== Published definitions ====================

/// Request/response pair built from one service definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceType {
    pub name: String,
    pub version: Version,
    pub request: CompositeId,
    pub response: CompositeId,
    pub fixed_port_id: Option<u32>,
    pub deprecated: bool,
}

/// What one definition file publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Definition {
    Message(CompositeId),
    Service(ServiceType),
}

impl Definition {
    pub fn composites(&self) -> Vec<CompositeId> {
        match self {
            Definition::Message(id) => vec![*id],
            Definition::Service(s) => vec![s.request, s.response],
        }
    }

    pub fn is_service(&self) -> bool {
        matches!(self, Definition::Service(_))
    }
}
