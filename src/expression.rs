//! Constant expression values and evaluation.
//!
//! Values are immutable. Numbers are exact rationals, so `1/3 * 3 == 1` holds and no
//! precision is lost before a constant is checked against its declared type.

use crate::ast::{BinaryOp, Expression, TypeName, UnaryOp};
use crate::error::EvaluationError;
use crate::types::SerializableType;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Largest exponent magnitude accepted by `**`.
pub const MAX_EXPONENT: u32 = 1 << 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Rational(BigRational),
    Boolean(bool),
    String(String),
    /// Non-empty, homogeneous.
    Set(BTreeSet<Value>),
    Type(SerializableType),
}

impl Value {
    pub fn integer(value: impl Into<BigInt>) -> Self {
        Value::Rational(BigRational::from_integer(value.into()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Rational(_) => "rational",
            Value::Boolean(_) => "bool",
            Value::String(_) => "string",
            Value::Set(_) => "set",
            Value::Type(_) => "metaserializable",
        }
    }

    pub fn as_rational(&self) -> Option<&BigRational> {
        match self {
            Value::Rational(r) => Some(r),
            _ => None,
        }
    }

    /// The value as an integer, if it is an integral rational.
    pub fn as_integer(&self) -> Option<BigInt> {
        match self {
            Value::Rational(r) if r.is_integer() => Some(r.to_integer()),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_integer().and_then(|i| i.to_u64())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<Value>> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&SerializableType> {
        match self {
            Value::Type(t) => Some(t),
            _ => None,
        }
    }

    /// Set of integer values, as used for `_offset_` and `_bit_length_`.
    pub fn integer_set<I: IntoIterator<Item = u64>>(values: I) -> Self {
        Value::Set(values.into_iter().map(Value::integer).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Rational(r) if r.is_integer() => write!(f, "{}", r.numer()),
            Value::Rational(r) => write!(f, "{}/{}", r.numer(), r.denom()),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Set(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
            Value::Type(t) => write!(f, "{}", t),
        }
    }
}

/// Names visible to an expression.
pub trait Bindings {
    fn identifier(&self, name: &str) -> Option<Value>;

    /// A composite referenced by name inside the expression.
    fn type_reference(&self, _name: &TypeName) -> Option<Value> {
        None
    }

    /// `T.attr` where `T` evaluated to a type.
    fn type_attribute(&self, _ty: &SerializableType, _name: &str) -> Option<Value> {
        None
    }
}

impl Bindings for HashMap<String, Value> {
    fn identifier(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl Bindings for () {
    fn identifier(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// Evaluate `expression` against `bindings`.
pub fn evaluate(expression: &Expression, bindings: &dyn Bindings) -> Result<Value, EvaluationError> {
    match expression {
        Expression::Rational(r) => Ok(Value::Rational(r.clone())),
        Expression::Boolean(b) => Ok(Value::Boolean(*b)),
        Expression::String(s) => Ok(Value::String(s.clone())),
        Expression::Set(items) => {
            let values = items
                .iter()
                .map(|item| evaluate(item, bindings))
                .collect::<Result<Vec<_>, _>>()?;
            make_set(values).map_err(|m| EvaluationError::new(m, expression))
        }
        Expression::Identifier(name) => bindings.identifier(name).ok_or_else(|| {
            EvaluationError::new(format!("undefined identifier `{}`", name), expression)
        }),
        Expression::Type(name) => bindings.type_reference(name).ok_or_else(|| {
            EvaluationError::new(format!("unresolved type reference `{}`", name), expression)
        }),
        Expression::Attribute { base, name } => {
            let base = evaluate(base, bindings)?;
            attribute(&base, name, bindings).map_err(|m| EvaluationError::new(m, expression))
        }
        Expression::Unary { op, operand } => {
            let operand = evaluate(operand, bindings)?;
            apply_unary(*op, operand).map_err(|m| EvaluationError::new(m, expression))
        }
        Expression::Binary { op, left, right } => {
            let left = evaluate(left, bindings)?;
            let right = evaluate(right, bindings)?;
            apply_binary(*op, left, right).map_err(|m| EvaluationError::new(m, expression))
        }
    }
}

fn make_set(values: Vec<Value>) -> Result<Value, String> {
    let first = values
        .first()
        .ok_or_else(|| "empty sets are not allowed".to_string())?
        .type_name();
    if let Some(other) = values.iter().find(|v| v.type_name() != first) {
        return Err(format!(
            "heterogeneous set: {} element among {} elements",
            other.type_name(),
            first
        ));
    }
    Ok(Value::Set(values.into_iter().collect()))
}

fn attribute(base: &Value, name: &str, bindings: &dyn Bindings) -> Result<Value, String> {
    match base {
        Value::Set(items) => match name {
            "count" => Ok(Value::integer(items.len() as u64)),
            "min" | "max" => {
                if items.iter().any(|v| v.as_rational().is_none()) {
                    return Err(format!("attribute `{}` requires a set of rationals", name));
                }
                let picked = if name == "min" {
                    items.iter().next()
                } else {
                    items.iter().next_back()
                };
                picked.cloned().ok_or_else(|| "empty set".to_string())
            }
            _ => Err(format!("set has no attribute `{}`", name)),
        },
        Value::Type(ty) => bindings
            .type_attribute(ty, name)
            .ok_or_else(|| format!("type {} has no attribute `{}`", ty, name)),
        other => Err(format!("{} has no attribute `{}`", other.type_name(), name)),
    }
}

/// Apply a unary operator.
pub fn apply_unary(op: UnaryOp, operand: Value) -> Result<Value, String> {
    match (op, operand) {
        (UnaryOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
        (UnaryOp::Plus, Value::Rational(r)) => Ok(Value::Rational(r)),
        (UnaryOp::Minus, Value::Rational(r)) => Ok(Value::Rational(-r)),
        (UnaryOp::Plus | UnaryOp::Minus, Value::Set(items)) => {
            let mapped = items
                .into_iter()
                .map(|v| apply_unary(op, v))
                .collect::<Result<Vec<_>, _>>()?;
            make_set(mapped)
        }
        (op, operand) => Err(format!(
            "unary operator {} is not defined for {}",
            op.symbol(),
            operand.type_name()
        )),
    }
}

/// Apply a binary operator.
pub fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, String> {
    match (left, right) {
        (Value::Rational(a), Value::Rational(b)) => rational_op(op, a, b),
        (Value::Boolean(a), Value::Boolean(b)) => match op {
            BinaryOp::Or => Ok(Value::Boolean(a || b)),
            BinaryOp::And => Ok(Value::Boolean(a && b)),
            BinaryOp::Eq => Ok(Value::Boolean(a == b)),
            BinaryOp::Ne => Ok(Value::Boolean(a != b)),
            _ => Err(undefined(op, "bool", "bool")),
        },
        (Value::String(a), Value::String(b)) => match op {
            BinaryOp::Add => Ok(Value::String(a + &b)),
            BinaryOp::Eq => Ok(Value::Boolean(a == b)),
            BinaryOp::Ne => Ok(Value::Boolean(a != b)),
            _ => Err(undefined(op, "string", "string")),
        },
        (Value::Type(a), Value::Type(b)) => match op {
            BinaryOp::Eq => Ok(Value::Boolean(a == b)),
            BinaryOp::Ne => Ok(Value::Boolean(a != b)),
            _ => Err(undefined(op, "metaserializable", "metaserializable")),
        },
        (Value::Set(a), Value::Set(b)) => set_op(op, a, b),
        (Value::Set(items), scalar) if elementwise(op) => {
            let mapped = items
                .into_iter()
                .map(|v| apply_binary(op, v, scalar.clone()))
                .collect::<Result<Vec<_>, _>>()?;
            make_set(mapped)
        }
        (scalar, Value::Set(items)) if elementwise(op) => {
            let mapped = items
                .into_iter()
                .map(|v| apply_binary(op, scalar.clone(), v))
                .collect::<Result<Vec<_>, _>>()?;
            make_set(mapped)
        }
        (a, b) => Err(undefined(op, a.type_name(), b.type_name())),
    }
}

fn undefined(op: BinaryOp, left: &str, right: &str) -> String {
    format!(
        "operator {} is not defined for {} and {}",
        op.symbol(),
        left,
        right
    )
}

/// Operators that expand over the elements of a set when the other side is a scalar.
fn elementwise(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::FloorDiv
            | BinaryOp::Mod
            | BinaryOp::Pow
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::BitAnd
    )
}

fn set_op(op: BinaryOp, a: BTreeSet<Value>, b: BTreeSet<Value>) -> Result<Value, String> {
    let same_kind = match (a.iter().next(), b.iter().next()) {
        (Some(x), Some(y)) => x.type_name() == y.type_name(),
        _ => true,
    };
    if !same_kind {
        return Err("set operands have different element types".to_string());
    }
    let result = match op {
        BinaryOp::BitOr => Value::Set(a.union(&b).cloned().collect()),
        BinaryOp::BitAnd => {
            let common: Vec<Value> = a.intersection(&b).cloned().collect();
            make_set(common)?
        }
        BinaryOp::BitXor => {
            let diff: Vec<Value> = a.symmetric_difference(&b).cloned().collect();
            make_set(diff)?
        }
        BinaryOp::Eq => Value::Boolean(a == b),
        BinaryOp::Ne => Value::Boolean(a != b),
        BinaryOp::Le => Value::Boolean(a.is_subset(&b)),
        BinaryOp::Ge => Value::Boolean(a.is_superset(&b)),
        BinaryOp::Lt => Value::Boolean(a.is_subset(&b) && a != b),
        BinaryOp::Gt => Value::Boolean(a.is_superset(&b) && a != b),
        _ => return Err(undefined(op, "set", "set")),
    };
    Ok(result)
}

fn rational_op(op: BinaryOp, a: BigRational, b: BigRational) -> Result<Value, String> {
    let value = match op {
        BinaryOp::Eq => Value::Boolean(a == b),
        BinaryOp::Ne => Value::Boolean(a != b),
        BinaryOp::Lt => Value::Boolean(a < b),
        BinaryOp::Gt => Value::Boolean(a > b),
        BinaryOp::Le => Value::Boolean(a <= b),
        BinaryOp::Ge => Value::Boolean(a >= b),
        BinaryOp::Add => Value::Rational(a + b),
        BinaryOp::Sub => Value::Rational(a - b),
        BinaryOp::Mul => Value::Rational(a * b),
        BinaryOp::Div => {
            if b.is_zero() {
                return Err("division by zero".to_string());
            }
            Value::Rational(a / b)
        }
        BinaryOp::FloorDiv => {
            if b.is_zero() {
                return Err("division by zero".to_string());
            }
            Value::Rational((a / b).floor())
        }
        BinaryOp::Mod => {
            if b.is_zero() {
                return Err("modulo by zero".to_string());
            }
            // Floored: the result takes the sign of the divisor.
            let quotient = (&a / &b).floor();
            Value::Rational(a - b * quotient)
        }
        BinaryOp::Pow => Value::Rational(power(a, b)?),
        BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::BitAnd => {
            let (x, y) = match (a.is_integer(), b.is_integer()) {
                (true, true) => (a.to_integer(), b.to_integer()),
                _ => return Err(format!("operator {} requires integer operands", op.symbol())),
            };
            let r = match op {
                BinaryOp::BitOr => x | y,
                BinaryOp::BitXor => x ^ y,
                _ => x & y,
            };
            Value::integer(r)
        }
        BinaryOp::Or | BinaryOp::And => return Err(undefined(op, "rational", "rational")),
    };
    Ok(value)
}

fn power(base: BigRational, exponent: BigRational) -> Result<BigRational, String> {
    if !exponent.is_integer() {
        return Err(format!("non-integral exponent {}", exponent));
    }
    let e = exponent.to_integer();
    let magnitude = e
        .abs()
        .to_u32()
        .filter(|m| *m <= MAX_EXPONENT)
        .ok_or_else(|| format!("exponent {} is out of range", e))?;
    if e.is_negative() {
        if base.is_zero() {
            return Err("zero cannot be raised to a negative power".to_string());
        }
        Ok(num_traits::pow(base.recip(), magnitude as usize))
    } else {
        Ok(num_traits::pow(base, magnitude as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;

    fn eval(source: &str) -> Result<Value, EvaluationError> {
        let expression = parse_expression(source).expect("parse");
        evaluate(&expression, &())
    }

    fn rational(n: i64, d: i64) -> Value {
        Value::Rational(BigRational::new(BigInt::from(n), BigInt::from(d)))
    }

    #[test]
    fn exact_arithmetic() {
        assert_eq!(eval("1/3 * 3").unwrap(), Value::integer(1));
        assert_eq!(eval("2 ** 3 ** 2").unwrap(), Value::integer(512));
        assert_eq!(eval("2 ** -2").unwrap(), rational(1, 4));
        assert_eq!(eval("-7 % 3").unwrap(), Value::integer(2));
        assert_eq!(eval("7 % -3").unwrap(), Value::integer(-2));
        assert_eq!(eval("7 // 2").unwrap(), Value::integer(3));
        assert_eq!(eval("-7 // 2").unwrap(), Value::integer(-4));
        assert_eq!(eval("15/2 // 2").unwrap(), Value::integer(3));
        assert_eq!(eval("0x0F | 0b10000").unwrap(), Value::integer(31));
    }

    #[test]
    fn errors_name_the_subexpression() {
        let err = eval("1 + (2 / 0)").unwrap_err();
        assert_eq!(err.expression, "(2 / 0)");
        assert!(err.message.contains("division by zero"));

        let err = eval("2 ** (1/2)").unwrap_err();
        assert!(err.message.contains("non-integral"));

        assert!(eval("0 ** -1").is_err());
        let err = eval("1 // 0").unwrap_err();
        assert!(err.message.contains("division by zero"));
        assert!(eval("true + 1").is_err());
        assert!(eval("undefined_name").is_err());
    }

    #[test]
    fn set_operations() {
        assert_eq!(eval("{1, 2} | {3}").unwrap(), eval("{1, 2, 3}").unwrap());
        assert_eq!(eval("{1, 2} & {2, 3}").unwrap(), eval("{2}").unwrap());
        assert_eq!(eval("{1} <= {1, 2}").unwrap(), Value::Boolean(true));
        assert_eq!(eval("{1, 2} < {1, 2}").unwrap(), Value::Boolean(false));
        assert_eq!(eval("{1, 2, 3} * 2").unwrap(), eval("{2, 4, 6}").unwrap());
        assert_eq!(eval("10 - {1, 2}").unwrap(), eval("{9, 8}").unwrap());
        assert_eq!(eval("{5, 1, 3}.max").unwrap(), Value::integer(5));
        assert_eq!(eval("{5, 1, 3}.min").unwrap(), Value::integer(1));
        assert_eq!(eval("{1, 1, 2}.count").unwrap(), Value::integer(2));
        assert!(eval("{1, 'a'}").is_err());
    }

    #[test]
    fn strings_and_booleans() {
        assert_eq!(eval("'ab' + \"cd\"").unwrap(), Value::String("abcd".into()));
        assert_eq!(eval("!(1 == 2) && true").unwrap(), Value::Boolean(true));
        assert!(eval("'a' < 'b'").is_err());
    }

    #[test]
    fn evaluation_is_repeatable() {
        let mut scope = HashMap::new();
        scope.insert("S".to_string(), Value::integer_set([3, 11]));
        let expression = parse_expression("({1, 2} | S * 2) ^ {4} == {1, 2, 6, 22}").unwrap();
        let first = evaluate(&expression, &scope).unwrap();
        assert_eq!(first, Value::Boolean(false));
        assert_eq!(evaluate(&expression, &scope).unwrap(), first);
    }

    #[test]
    fn identifiers_come_from_bindings() {
        let mut scope = HashMap::new();
        scope.insert("N".to_string(), Value::integer(8));
        let expression = parse_expression("N * 2 + 1").unwrap();
        assert_eq!(evaluate(&expression, &scope).unwrap(), Value::integer(17));
    }
}
