//! Checks applied to composites before they are published.
//!
//! Each check reports with its own error kind. Nothing here stops at the first
//! problem: callers collect every finding and refuse to publish a composite that
//! has at least one error.

use crate::error::{DefinitionError, Diagnostic, Locator};
use crate::options::Options;
use crate::types::{ArrayType, CompositeTable, CompositeType, SerializableType, BYTE_BITS};
use std::fmt;

pub use crate::bit_length_set::MAX_BIT_LENGTH;

pub const MAX_SUBJECT_ID: u32 = 8191;
pub const MAX_SERVICE_ID: u32 = 511;

/// Regulated subject IDs for the standard `uavcan` namespace.
pub const STANDARD_SUBJECT_IDS: std::ops::RangeInclusive<u32> = 7168..=8191;
/// Regulated subject IDs for vendor namespaces.
pub const VENDOR_SUBJECT_IDS: std::ops::RangeInclusive<u32> = 6144..=7167;
pub const STANDARD_SERVICE_IDS: std::ops::RangeInclusive<u32> = 384..=511;
pub const VENDOR_SERVICE_IDS: std::ops::RangeInclusive<u32> = 256..=383;

const STANDARD_ROOT_NAMESPACE: &str = "uavcan";

/// Names that would clash with type or mode keywords.
fn is_keyword(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if matches!(
        lower.as_str(),
        "bool" | "true" | "false" | "saturated" | "truncated"
    ) {
        return true;
    }
    ["uint", "int", "float", "void"].iter().any(|prefix| {
        lower
            .strip_prefix(prefix)
            .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
    })
}

/// Device names some file systems refuse; they cannot name namespaces or types.
fn is_reserved_device_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    matches!(lower.as_str(), "con" | "prn" | "aux" | "nul")
        || ["com", "lpt"].iter().any(|prefix| {
            lower
                .strip_prefix(prefix)
                .map(|rest| rest.len() == 1 && rest.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false)
        })
}

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `_name_`: reserved for implicit members such as the union tag or array length.
pub fn is_reserved_attribute_name(name: &str) -> bool {
    name.len() >= 2 && name.starts_with('_') && name.ends_with('_')
}

/// Validate a namespace component or short type name taken from a file path.
pub fn check_name_component(component: &str) -> Result<(), DefinitionError> {
    if !is_identifier(component) {
        return Err(DefinitionError::Syntax(format!(
            "invalid name component `{}`",
            component
        )));
    }
    if is_keyword(component) || is_reserved_device_name(component) {
        return Err(DefinitionError::Syntax(format!(
            "name `{}` is reserved",
            component
        )));
    }
    Ok(())
}

/// Check a new attribute name against the names already declared in the same section.
/// Comparison is case-insensitive.
pub fn check_attribute_name<'a, I>(name: &str, existing: I) -> Result<(), DefinitionError>
where
    I: IntoIterator<Item = &'a str>,
{
    if is_reserved_attribute_name(name) {
        return Err(DefinitionError::AttributeCollision(format!(
            "attribute name `{}` is reserved",
            name
        )));
    }
    if is_keyword(name) {
        return Err(DefinitionError::Syntax(format!(
            "attribute name `{}` is a reserved word",
            name
        )));
    }
    let lower = name.to_lowercase();
    if let Some(previous) = existing.into_iter().find(|n| n.to_lowercase() == lower) {
        return Err(DefinitionError::AttributeCollision(format!(
            "attribute `{}` collides with `{}`",
            name, previous
        )));
    }
    Ok(())
}

/// Extent must be a whole number of bytes and must hold the largest serialized form.
pub fn check_extent(composite: &CompositeType) -> Result<(), DefinitionError> {
    if composite.extent_declared && composite.extent % BYTE_BITS != 0 {
        return Err(DefinitionError::ExtentViolation(format!(
            "extent of {} bits is not a multiple of {}",
            composite.extent, BYTE_BITS
        )));
    }
    let max = composite.max_bit_length();
    if max > composite.extent {
        return Err(DefinitionError::ExtentViolation(format!(
            "maximum bit length {} exceeds the extent of {} bits",
            max, composite.extent
        )));
    }
    Ok(())
}

/// An `@extent` value may not exceed [`MAX_BIT_LENGTH`].
pub fn check_declared_extent(extent: u64) -> Result<(), DefinitionError> {
    if extent > MAX_BIT_LENGTH {
        return Err(DefinitionError::ExtentViolation(format!(
            "extent of {} bits exceeds the limit of {} bits",
            extent, MAX_BIT_LENGTH
        )));
    }
    Ok(())
}

/// Fixed port ID ranges: the absolute maximum always applies; the regulated
/// ranges apply unless unregulated IDs are allowed.
pub fn check_fixed_port_id(
    port_id: u32,
    is_service: bool,
    root_namespace: &str,
    allow_unregulated: bool,
) -> Result<(), DefinitionError> {
    let (kind, max, standard, vendor) = if is_service {
        ("service", MAX_SERVICE_ID, STANDARD_SERVICE_IDS, VENDOR_SERVICE_IDS)
    } else {
        ("subject", MAX_SUBJECT_ID, STANDARD_SUBJECT_IDS, VENDOR_SUBJECT_IDS)
    };
    if port_id > max {
        return Err(DefinitionError::PortIdRange(format!(
            "{} ID {} exceeds the maximum of {}",
            kind, port_id, max
        )));
    }
    if allow_unregulated {
        return Ok(());
    }
    let regulated = if root_namespace == STANDARD_ROOT_NAMESPACE {
        standard
    } else {
        vendor
    };
    if !regulated.contains(&port_id) {
        return Err(DefinitionError::PortIdRange(format!(
            "regulated {} ID {} for namespace `{}` is outside {}..={}",
            kind,
            port_id,
            root_namespace,
            regulated.start(),
            regulated.end()
        )));
    }
    Ok(())
}

/// Every check on a freshly built composite. Warnings and errors are returned together.
pub fn validate_composite(
    composite: &CompositeType,
    table: &dyn CompositeTable,
    options: &Options,
) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    if let Err(e) = check_extent(composite) {
        out.push(Diagnostic::error(Locator::file(&composite.source), e));
    }
    if !composite.deprecated {
        for attribute in composite.attributes.iter() {
            let Some(dependency) = attribute.ty.composite_dependency() else {
                continue;
            };
            if !table.composite(dependency.id).deprecated {
                continue;
            }
            let error = DefinitionError::DeprecatedUsage(format!(
                "{} uses deprecated type {} for `{}`",
                composite, dependency, attribute.name
            ));
            let at = Locator::at(&composite.source, attribute.line);
            if options.strict_deprecation {
                out.push(Diagnostic::error(at, error));
            } else {
                tracing::warn!(
                    definition = %composite,
                    dependency = %dependency,
                    "deprecated type used by non-deprecated definition"
                );
                out.push(Diagnostic::warning(at, error));
            }
        }
    }
    out
}

// ==================== Version compatibility ====================

/// Decides whether `newer` may follow `older` as the next minor version of the same major.
pub trait CompatibilityPolicy: Send + Sync + fmt::Debug {
    /// One message per incompatibility; empty when compatible.
    fn check(
        &self,
        older: &CompositeType,
        newer: &CompositeType,
        table: &dyn CompositeTable,
    ) -> Vec<String>;
}

/// Minor versions may only append: fields keep their names, types and order.
#[derive(Debug, Clone)]
pub struct AdditivePolicy {
    /// New fields (or union variants) may be appended.
    pub allow_appended_fields: bool,
    /// Constants may be added, removed or changed.
    pub allow_constant_changes: bool,
    /// Explicitly declared extents may differ.
    pub allow_extent_change: bool,
}

impl Default for AdditivePolicy {
    fn default() -> Self {
        AdditivePolicy {
            allow_appended_fields: true,
            allow_constant_changes: true,
            allow_extent_change: false,
        }
    }
}

impl CompatibilityPolicy for AdditivePolicy {
    fn check(
        &self,
        older: &CompositeType,
        newer: &CompositeType,
        _table: &dyn CompositeTable,
    ) -> Vec<String> {
        let mut problems = Vec::new();
        if older.kind != newer.kind || older.tagged_union != newer.tagged_union {
            problems.push(format!(
                "{} and {} are different kinds of composite",
                older, newer
            ));
            return problems;
        }
        if older.sealed != newer.sealed {
            problems.push(format!("{} and {} differ in sealing", older, newer));
        }

        let old_fields: Vec<_> = older.fields().collect();
        let new_fields: Vec<_> = newer.fields().collect();
        for (index, old) in old_fields.iter().enumerate() {
            match new_fields.get(index) {
                None => problems.push(format!("field `{}` was removed", old.name)),
                Some(new) if new.name != old.name || !same_type(&old.ty, &new.ty) => {
                    problems.push(format!(
                        "field #{} changed from `{}` to `{}`",
                        index, old, new
                    ))
                }
                Some(_) => {}
            }
        }
        if new_fields.len() > old_fields.len() && !self.allow_appended_fields {
            problems.push("fields were appended".to_string());
        }
        if older.discriminant_width() != newer.discriminant_width() {
            problems.push(format!(
                "union tag width changed from {:?} to {:?} bits",
                older.discriminant_width(),
                newer.discriminant_width()
            ));
        }

        if older.sealed {
            if older.bit_length_set() != newer.bit_length_set() {
                problems.push(format!(
                    "sealed layout changed from {} to {}",
                    older.bit_length_set(),
                    newer.bit_length_set()
                ));
            }
        } else {
            if older.max_bit_length() > newer.extent {
                problems.push(format!(
                    "older maximum bit length {} exceeds the new extent of {} bits",
                    older.max_bit_length(),
                    newer.extent
                ));
            }
            if !self.allow_extent_change
                && older.extent_declared
                && newer.extent_declared
                && older.extent != newer.extent
            {
                problems.push(format!(
                    "extent changed from {} to {} bits",
                    older.extent, newer.extent
                ));
            }
        }

        if !self.allow_constant_changes {
            for constant in older.constants() {
                if newer.constant(&constant.name) != constant.constant_value() {
                    problems.push(format!("constant `{}` changed or was removed", constant.name));
                }
            }
        }

        match (older.fixed_port_id, newer.fixed_port_id) {
            (Some(a), Some(b)) if a != b => {
                problems.push(format!("fixed port ID changed from {} to {}", a, b))
            }
            (Some(a), None) => problems.push(format!("fixed port ID {} was removed", a)),
            _ => {}
        }
        problems
    }
}

/// Structural type identity across versions: composites match on name and major version.
fn same_type(a: &SerializableType, b: &SerializableType) -> bool {
    match (a, b) {
        (SerializableType::Composite(x), SerializableType::Composite(y)) => {
            x.name == y.name && x.version.major == y.version.major
        }
        (
            SerializableType::Array(ArrayType { element: ea, kind: ka }),
            SerializableType::Array(ArrayType { element: eb, kind: kb }),
        ) => ka == kb && same_type(ea, eb),
        _ => a == b,
    }
}
