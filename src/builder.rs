//! Builds composites from a parsed definition.
//!
//! Statements are processed in order. A failing statement is reported and skipped
//! so that one pass reports every problem in the file; a definition with any error
//! produces no composite.

use crate::ast::*;
use crate::bit_length_set::{discriminant_width, BitLengthSet, LengthOverflow};
use crate::error::{DefinitionError, Diagnostic, EvaluationError, Locator};
use crate::expression::{evaluate, Bindings, Value};
use crate::namespace::DefinitionFile;
use crate::options::Options;
use crate::types::{
    ArrayKind, Attribute, AttributeKind, CompositeDraft, CompositeKind,
    CompositeRef, CompositeTable, CompositeType, SerializableType,
};
use crate::validate::{check_attribute_name, check_declared_extent};
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};
use std::collections::HashMap;
use std::mem;

/// Supplies composites referenced by the definition being built.
pub trait Resolver: CompositeTable {
    /// Resolve `name` as seen from `origin`; the composite must be fully built on return.
    fn resolve_reference(
        &mut self,
        name: &TypeName,
        origin: &DefinitionFile,
    ) -> Result<CompositeRef, DefinitionError>;
}

/// What a definition file produced.
#[derive(Debug, Clone)]
pub enum Built {
    Message(CompositeType),
    Service {
        request: CompositeType,
        response: CompositeType,
    },
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// `None` when any error was reported.
    pub built: Option<Built>,
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildOutcome {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// Build the composite(s) defined by `tree`.
pub fn build_definition<R: Resolver>(
    file: &DefinitionFile,
    tree: &DefinitionTree,
    resolver: &mut R,
    options: &Options,
) -> BuildOutcome {
    let mut builder = DefinitionBuilder {
        file,
        options,
        resolver,
        current: Section::default(),
        request: None,
        deprecated: false,
        diagnostics: Vec::new(),
    };
    for statement in &tree.statements {
        if let Err(e) = builder.statement(statement) {
            builder.error(Some(statement.line), e);
        }
    }
    builder.finish()
}

#[derive(Debug, Default)]
struct Section {
    attributes: Vec<Attribute>,
    union: bool,
    sealed: bool,
    extent: Option<u64>,
    /// Serialized attributes so far: concatenated, or alternated in a union.
    lengths: Option<BitLengthSet>,
}

impl Section {
    fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(|a| !a.is_padding())
            .map(|a| a.name.as_str())
    }

    fn field_count(&self) -> usize {
        self.attributes.iter().filter(|a| a.is_serialized()).count()
    }

    /// Appends a field or padding. Fails, leaving the section unchanged, when the
    /// section would grow past the maximum serialized length.
    fn push_serialized(
        &mut self,
        attribute: Attribute,
        table: &dyn CompositeTable,
    ) -> Result<(), DefinitionError> {
        let set = attribute.ty.bit_length_set(table)?;
        let lengths = match &self.lengths {
            Some(acc) if self.union => acc.alternate(&set)?,
            Some(acc) => acc.concatenate(&set)?,
            None => set,
        };
        self.lengths = Some(lengths);
        self.attributes.push(attribute);
        Ok(())
    }

    /// Lengths of everything serialized so far, as `_offset_` sees them.
    fn offset(&self) -> Result<BitLengthSet, LengthOverflow> {
        match &self.lengths {
            Some(lengths) if self.union => lengths.shift(discriminant_width(self.field_count())),
            Some(lengths) => Ok(lengths.clone()),
            None => Ok(BitLengthSet::default()),
        }
    }
}

struct DefinitionBuilder<'a, R: Resolver> {
    file: &'a DefinitionFile,
    options: &'a Options,
    resolver: &'a mut R,
    current: Section,
    /// Request section, once `---` was seen.
    request: Option<Section>,
    deprecated: bool,
    diagnostics: Vec<Diagnostic>,
}

impl<'a, R: Resolver> DefinitionBuilder<'a, R> {
    fn error(&mut self, line: Option<usize>, error: DefinitionError) {
        let locator = match line {
            Some(line) => Locator::at(&self.file.path, line),
            None => Locator::file(&self.file.path),
        };
        self.diagnostics.push(Diagnostic::error(locator, error));
    }

    fn statement(&mut self, statement: &Statement) -> Result<(), DefinitionError> {
        let line = statement.line;
        match &statement.kind {
            StatementKind::Comment(_) => Ok(()),
            StatementKind::ServiceResponseMarker => {
                if self.request.is_some() {
                    return Err(DefinitionError::Syntax(
                        "duplicate service response marker".to_string(),
                    ));
                }
                self.request = Some(mem::take(&mut self.current));
                Ok(())
            }
            StatementKind::Field { type_expr, name } => {
                let ty = self.resolve_type(type_expr)?;
                if ty.is_void() {
                    return Err(DefinitionError::Syntax(format!(
                        "padding field `{}` cannot have a name",
                        name
                    )));
                }
                check_attribute_name(name, self.current.names())?;
                let field = Attribute {
                    name: name.clone(),
                    ty,
                    kind: AttributeKind::Field,
                    line,
                };
                self.current.push_serialized(field, &*self.resolver)
            }
            StatementKind::Padding(token) => {
                if self.current.union {
                    return Err(DefinitionError::Syntax(
                        "padding fields are not allowed in unions".to_string(),
                    ));
                }
                let ty = SerializableType::primitive(token, None).map_err(DefinitionError::Syntax)?;
                let padding = Attribute {
                    name: String::new(),
                    ty,
                    kind: AttributeKind::Padding,
                    line,
                };
                self.current.push_serialized(padding, &*self.resolver)
            }
            StatementKind::Constant {
                type_expr,
                name,
                value,
            } => {
                if self.current.union {
                    return Err(DefinitionError::Syntax(
                        "constants are not allowed in unions".to_string(),
                    ));
                }
                let ty = self.resolve_type(type_expr)?;
                if !ty.is_primitive() || ty.is_void() {
                    return Err(DefinitionError::Syntax(format!(
                        "constant `{}` must have a primitive type, not {}",
                        name, ty
                    )));
                }
                let raw = self.evaluate(value)?;
                let coerced = coerce_constant(&ty, raw, value)?;
                check_attribute_name(name, self.current.names())?;
                self.current.attributes.push(Attribute {
                    name: name.clone(),
                    ty,
                    kind: AttributeKind::Constant(coerced),
                    line,
                });
                Ok(())
            }
            StatementKind::Directive { name, expression } => {
                self.directive(name, expression.as_ref(), line)
            }
        }
    }

    fn directive(
        &mut self,
        name: &str,
        expression: Option<&Expression>,
        line: usize,
    ) -> Result<(), DefinitionError> {
        let no_expression = |expression: Option<&Expression>| match expression {
            Some(_) => Err(DefinitionError::Syntax(format!(
                "directive @{} does not take an expression",
                name
            ))),
            None => Ok(()),
        };
        let required = |expression: Option<&Expression>| {
            expression.cloned().ok_or_else(|| {
                DefinitionError::Syntax(format!("directive @{} requires an expression", name))
            })
        };
        match name {
            "union" => {
                no_expression(expression)?;
                if self.current.union {
                    return Err(DefinitionError::Syntax("duplicate @union".to_string()));
                }
                if !self.current.attributes.is_empty() {
                    return Err(DefinitionError::Syntax(
                        "@union must precede the first attribute".to_string(),
                    ));
                }
                self.current.union = true;
            }
            "deprecated" => {
                no_expression(expression)?;
                if self.deprecated {
                    return Err(DefinitionError::Syntax("duplicate @deprecated".to_string()));
                }
                if self.request.is_some() || !self.current.attributes.is_empty() {
                    return Err(DefinitionError::Syntax(
                        "@deprecated must precede the first attribute of the definition".to_string(),
                    ));
                }
                self.deprecated = true;
            }
            "sealed" => {
                no_expression(expression)?;
                self.check_layout_not_set(name)?;
                self.current.sealed = true;
            }
            "extent" => {
                let expression = required(expression)?;
                self.check_layout_not_set(name)?;
                let value = self.evaluate(&expression)?;
                let extent = value.as_u64().ok_or_else(|| {
                    EvaluationError::new(
                        format!("extent must be a non-negative integer, got {}", value),
                        &expression,
                    )
                })?;
                check_declared_extent(extent)?;
                self.current.extent = Some(extent);
            }
            "assert" => {
                let expression = required(expression)?;
                let value = self.evaluate(&expression)?;
                match value {
                    Value::Boolean(true) => {}
                    Value::Boolean(false) => {
                        if !self.options.skip_assertion_checks {
                            return Err(DefinitionError::AssertionFailure(format!(
                                "assertion failed: {}",
                                expression
                            )));
                        }
                    }
                    other => {
                        return Err(EvaluationError::new(
                            format!("assertion must be a bool, got {}", other.type_name()),
                            &expression,
                        )
                        .into())
                    }
                }
            }
            "print" => {
                let value = match expression {
                    Some(expression) => Some(self.evaluate(expression)?),
                    None => None,
                };
                match &value {
                    Some(v) => {
                        tracing::info!(path = %self.file.path.display(), line, value = %v, "@print")
                    }
                    None => tracing::info!(path = %self.file.path.display(), line, "@print"),
                }
                if let Some(handler) = &self.options.print_handler {
                    handler(&self.file.path, line, value.as_ref());
                }
            }
            other => {
                return Err(DefinitionError::Syntax(format!(
                    "unknown directive @{}",
                    other
                )))
            }
        }
        Ok(())
    }

    fn check_layout_not_set(&self, directive: &str) -> Result<(), DefinitionError> {
        if self.current.sealed || self.current.extent.is_some() {
            return Err(DefinitionError::Syntax(format!(
                "@{}: @sealed or @extent was already specified for this section",
                directive
            )));
        }
        Ok(())
    }

    // ==================== Types ====================

    fn resolve_type(&mut self, type_expr: &TypeExpr) -> Result<SerializableType, DefinitionError> {
        match type_expr {
            TypeExpr::Scalar(scalar) => self.resolve_scalar(scalar),
            TypeExpr::Array { element, capacity } => {
                let element = self.resolve_scalar(element)?;
                let (expression, exclusive) = match capacity {
                    ArrayCapacity::Fixed(e) => (e, false),
                    ArrayCapacity::Inclusive(e) => (e, false),
                    ArrayCapacity::Exclusive(e) => (e, true),
                };
                let value = self.evaluate(expression)?;
                let size = value.as_integer().ok_or_else(|| {
                    EvaluationError::new(
                        format!("array capacity must be an integer, got {}", value),
                        expression,
                    )
                })?;
                let size = if exclusive { size - 1 } else { size };
                if size < BigInt::from(1) {
                    return Err(DefinitionError::Syntax(format!(
                        "array capacity must be at least 1, got {}",
                        size
                    )));
                }
                let size = size.to_u64().ok_or_else(|| {
                    DefinitionError::Syntax(format!("array capacity {} is too large", size))
                })?;
                let kind = match capacity {
                    ArrayCapacity::Fixed(_) => ArrayKind::Fixed { length: size },
                    _ => ArrayKind::VariableInclusive { max_length: size },
                };
                SerializableType::array(element, kind).map_err(DefinitionError::Syntax)
            }
        }
    }

    fn resolve_scalar(&mut self, scalar: &ScalarType) -> Result<SerializableType, DefinitionError> {
        match &scalar.name {
            ScalarName::Primitive(name) => {
                SerializableType::primitive(name, scalar.cast_mode).map_err(DefinitionError::Syntax)
            }
            ScalarName::Versioned(name) => {
                if scalar.cast_mode.is_some() {
                    return Err(DefinitionError::Syntax(format!(
                        "cast mode cannot be applied to composite type {}",
                        name
                    )));
                }
                let reference = self.resolver.resolve_reference(name, self.file)?;
                Ok(SerializableType::Composite(reference))
            }
        }
    }

    // ==================== Expressions ====================

    fn evaluate(&mut self, expression: &Expression) -> Result<Value, DefinitionError> {
        let mut types = HashMap::new();
        for name in expression.type_references() {
            let reference = self.resolver.resolve_reference(name, self.file)?;
            types.insert(name.clone(), reference);
        }
        let scope = Scope {
            section: &self.current,
            types,
            table: &*self.resolver,
        };
        Ok(evaluate(expression, &scope)?)
    }

    // ==================== Assembly ====================

    fn finish(mut self) -> BuildOutcome {
        let sections = match self.request.take() {
            Some(request) => vec![
                (request, CompositeKind::ServiceRequest, ".Request"),
                (mem::take(&mut self.current), CompositeKind::ServiceResponse, ".Response"),
            ],
            None => vec![(mem::take(&mut self.current), CompositeKind::Message, "")],
        };

        let mut drafts = Vec::new();
        for (section, kind, suffix) in sections {
            if section.union && section.field_count() < 2 {
                self.error(
                    None,
                    DefinitionError::Syntax(format!(
                        "a union needs at least 2 fields, found {}",
                        section.field_count()
                    )),
                );
            }
            if self.options.require_explicit_extent && !section.sealed && section.extent.is_none() {
                self.error(
                    None,
                    DefinitionError::ExtentViolation(
                        "definition must be either @sealed or have an @extent".to_string(),
                    ),
                );
            }
            let kind = match kind {
                CompositeKind::Message if section.union => CompositeKind::Union,
                other => other,
            };
            drafts.push(CompositeDraft {
                name: format!("{}{}", self.file.full_name, suffix),
                version: self.file.version,
                kind,
                tagged_union: section.union,
                attributes: section.attributes,
                sealed: section.sealed,
                declared_extent: section.extent,
                deprecated: self.deprecated,
                fixed_port_id: self.file.fixed_port_id,
                source: self.file.path.clone(),
            });
        }

        if self.diagnostics.iter().any(Diagnostic::is_error) {
            return BuildOutcome {
                built: None,
                diagnostics: self.diagnostics,
            };
        }

        let table: &dyn CompositeTable = &*self.resolver;
        let finished: Vec<_> = drafts.into_iter().map(|d| d.finish(table)).collect();
        let mut composites = Vec::new();
        for result in finished {
            match result {
                Ok(composite) => composites.push(composite),
                Err(e) => self.error(None, e.into()),
            }
        }
        if self.diagnostics.iter().any(Diagnostic::is_error) {
            return BuildOutcome {
                built: None,
                diagnostics: self.diagnostics,
            };
        }
        let mut composites = composites.into_iter();
        let built = match (composites.next(), composites.next()) {
            (Some(request), Some(response)) => Some(Built::Service { request, response }),
            (Some(message), None) => Some(Built::Message(message)),
            _ => None,
        };
        BuildOutcome {
            built,
            diagnostics: self.diagnostics,
        }
    }
}

/// Names visible to expressions in the section being built.
struct Scope<'s> {
    section: &'s Section,
    types: HashMap<TypeName, CompositeRef>,
    table: &'s dyn CompositeTable,
}

impl Bindings for Scope<'_> {
    fn identifier(&self, name: &str) -> Option<Value> {
        if name == "_offset_" {
            return self
                .section
                .offset()
                .ok()
                .map(|offset| Value::integer_set(offset.iter()));
        }
        self.section
            .attributes
            .iter()
            .find(|a| a.name == name)
            .and_then(Attribute::constant_value)
            .cloned()
    }

    fn type_reference(&self, name: &TypeName) -> Option<Value> {
        self.types
            .get(name)
            .map(|r| Value::Type(SerializableType::Composite(r.clone())))
    }

    fn type_attribute(&self, ty: &SerializableType, name: &str) -> Option<Value> {
        let bit_lengths = |set: &BitLengthSet| Value::integer_set(set.iter());
        match ty {
            SerializableType::Composite(r) => {
                let composite = self.table.composite(r.id);
                match name {
                    "_extent_" => Some(Value::integer(composite.extent)),
                    "_bit_length_" => Some(bit_lengths(composite.bit_length_set())),
                    _ => composite.constant(name).cloned(),
                }
            }
            other if name == "_bit_length_" => {
                other.bit_length_set(self.table).ok().map(|set| bit_lengths(&set))
            }
            _ => None,
        }
    }
}

/// Check a constant initializer against the declared type.
fn coerce_constant(
    ty: &SerializableType,
    value: Value,
    expression: &Expression,
) -> Result<Value, DefinitionError> {
    let invalid = |message: String| DefinitionError::from(EvaluationError::new(message, expression));
    match ty {
        SerializableType::Boolean => match value {
            Value::Boolean(_) => Ok(value),
            other => Err(invalid(format!("bool constant needs a bool value, got {}", other.type_name()))),
        },
        SerializableType::Integer { width, signed, .. } => {
            let integer = match &value {
                Value::String(s) if *width == 8 && !*signed => {
                    let mut chars = s.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) if (c as u32) < 256 => BigInt::from(c as u32),
                        _ => {
                            return Err(invalid(format!(
                                "uint8 constant from a string needs one character below U+0100, got {:?}",
                                s
                            )))
                        }
                    }
                }
                other => other.as_integer().ok_or_else(|| {
                    invalid(format!("integer constant needs an integer value, got {}", other))
                })?,
            };
            let (min, max) = ty
                .integer_range()
                .ok_or_else(|| invalid(format!("{} has no integer range", ty)))?;
            if integer < min || integer > max {
                return Err(invalid(format!(
                    "value {} is outside the range of {} ({}..={})",
                    integer, ty, min, max
                )));
            }
            Ok(Value::integer(integer))
        }
        SerializableType::Float { .. } => {
            let rational = value.as_rational().ok_or_else(|| {
                invalid(format!("float constant needs a rational value, got {}", value.type_name()))
            })?;
            let max = ty
                .float_max()
                .ok_or_else(|| invalid(format!("{} has no finite range", ty)))?;
            if rational.abs() > max {
                return Err(invalid(format!("value {} is outside the range of {}", value, ty)));
            }
            Ok(value)
        }
        other => Err(invalid(format!("constants of type {} are not supported", other))),
    }
}
