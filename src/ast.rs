//! Parse tree for DSDL definitions.
//!
//! A definition is a sequence of line-oriented statements. The statement set is
//! closed: the builder matches on [`StatementKind`] exhaustively.

use crate::types::CastMode;
use num_rational::BigRational;
use std::fmt;

/// One parsed definition file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DefinitionTree {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// 1-based source line.
    pub line: usize,
    pub kind: StatementKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// `uint8 value`
    Field { type_expr: TypeExpr, name: String },
    /// `uint8 VALUE = 42`
    Constant {
        type_expr: TypeExpr,
        name: String,
        value: Expression,
    },
    /// Unnamed `voidN`.
    Padding(String),
    /// `@name [expression]`
    Directive {
        name: String,
        expression: Option<Expression>,
    },
    /// `---` splitting a service into request and response.
    ServiceResponseMarker,
    /// `# text`, without the leading `#`.
    Comment(String),
}

/// Declared type of an attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Scalar(ScalarType),
    Array {
        element: ScalarType,
        capacity: ArrayCapacity,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalarType {
    pub cast_mode: Option<CastMode>,
    pub name: ScalarName,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScalarName {
    /// `bool`, `uintN`, `intN`, `floatN`, `voidN` (width still unchecked).
    Primitive(String),
    /// Reference to a composite definition.
    Versioned(TypeName),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayCapacity {
    /// `T[N]`
    Fixed(Expression),
    /// `T[<=N]`
    Inclusive(Expression),
    /// `T[<N]`
    Exclusive(Expression),
}

/// A possibly relative, possibly unversioned composite type name: `ns.Type.1.0`, `Type.1`, `Type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeName {
    pub name: String,
    pub major: Option<u32>,
    pub minor: Option<u32>,
}

impl TypeName {
    pub fn new(name: impl Into<String>, major: Option<u32>, minor: Option<u32>) -> Self {
        TypeName {
            name: name.into(),
            major,
            minor,
        }
    }

    /// Name without version: `ns.Type`.
    pub fn unversioned(name: impl Into<String>) -> Self {
        TypeName::new(name, None, None)
    }

    /// True when the name has no namespace prefix and must be resolved relative to the referrer.
    pub fn is_relative(&self) -> bool {
        !self.name.contains('.')
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(major) = self.major {
            write!(f, ".{}", major)?;
            if let Some(minor) = self.minor {
                write!(f, ".{}", minor)?;
            }
        }
        Ok(())
    }
}

/// Constant expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Rational(BigRational),
    Boolean(bool),
    String(String),
    Set(Vec<Expression>),
    Identifier(String),
    /// `ns.Type.1.0` used as a value.
    Type(TypeName),
    /// `base.name`
    Attribute {
        base: Box<Expression>,
        name: String,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    /// Type names referenced anywhere in the expression, in source order.
    pub fn type_references(&self) -> Vec<&TypeName> {
        let mut out = Vec::new();
        self.collect_type_references(&mut out);
        out
    }

    fn collect_type_references<'a>(&'a self, out: &mut Vec<&'a TypeName>) {
        match self {
            Expression::Type(name) => out.push(name),
            Expression::Set(items) => {
                for item in items {
                    item.collect_type_references(out);
                }
            }
            Expression::Attribute { base, .. } => base.collect_type_references(out),
            Expression::Unary { operand, .. } => operand.collect_type_references(out),
            Expression::Binary { left, right, .. } => {
                left.collect_type_references(out);
                right.collect_type_references(out);
            }
            Expression::Rational(_)
            | Expression::Boolean(_)
            | Expression::String(_)
            | Expression::Identifier(_) => {}
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Rational(r) => {
                if r.is_integer() {
                    write!(f, "{}", r.numer())
                } else {
                    write!(f, "{}/{}", r.numer(), r.denom())
                }
            }
            Expression::Boolean(b) => write!(f, "{}", b),
            Expression::String(s) => write!(f, "{:?}", s),
            Expression::Set(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
            Expression::Identifier(name) => write!(f, "{}", name),
            Expression::Type(name) => write!(f, "{}", name),
            Expression::Attribute { base, name } => write!(f, "{}.{}", base, name),
            Expression::Unary { op, operand } => write!(f, "{}{}", op.symbol(), operand),
            Expression::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Plus => "+",
            UnaryOp::Minus => "-",
            UnaryOp::Not => "!",
        }
    }

    pub fn from_symbol(s: &str) -> Option<Self> {
        match s {
            "+" => Some(UnaryOp::Plus),
            "-" => Some(UnaryOp::Minus),
            "!" => Some(UnaryOp::Not),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    BitOr,
    BitXor,
    BitAnd,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::BitAnd => "&",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
        }
    }

    pub fn from_symbol(s: &str) -> Option<Self> {
        let op = match s {
            "||" => BinaryOp::Or,
            "&&" => BinaryOp::And,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "<=" => BinaryOp::Le,
            ">=" => BinaryOp::Ge,
            "<" => BinaryOp::Lt,
            ">" => BinaryOp::Gt,
            "|" => BinaryOp::BitOr,
            "^" => BinaryOp::BitXor,
            "&" => BinaryOp::BitAnd,
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "//" => BinaryOp::FloorDiv,
            "%" => BinaryOp::Mod,
            "**" => BinaryOp::Pow,
            _ => return None,
        };
        Some(op)
    }
}
