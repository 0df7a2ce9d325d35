//! Parse DSDL source into a [`DefinitionTree`] using PEST.

use crate::ast::*;
use crate::error::ParseError;
use crate::types::CastMode;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::Num;
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct DsdlParser;

/// Parse one definition file.
pub fn parse(source: &str) -> Result<DefinitionTree, ParseError> {
    let pairs = DsdlParser::parse(Rule::definition, source).map_err(|e| {
        let line = match e.line_col {
            LineColLocation::Pos((line, _)) | LineColLocation::Span((line, _), _) => line,
        };
        ParseError::new(line, format!("invalid syntax: {}", e.variant.message()))
    })?;
    let pair = pairs
        .into_iter()
        .next()
        .ok_or_else(|| ParseError::new(1, "empty parse"))?;
    build_definition(pair)
}

/// Parse a standalone expression (no surrounding statement).
pub fn parse_expression(source: &str) -> Result<Expression, ParseError> {
    let pairs = DsdlParser::parse(Rule::expression, source.trim()).map_err(|e| {
        ParseError::new(1, format!("invalid expression: {}", e.variant.message()))
    })?;
    let pair = pairs
        .into_iter()
        .next()
        .ok_or_else(|| ParseError::new(1, "empty expression"))?;
    if pair.as_str().len() != source.trim().len() {
        return Err(ParseError::new(
            1,
            format!("unexpected trailing input after `{}`", pair.as_str()),
        ));
    }
    build_expression(pair)
}

fn line_of(pair: &Pair<Rule>) -> usize {
    pair.as_span().start_pos().line_col().0
}

fn build_definition(pair: Pair<Rule>) -> Result<DefinitionTree, ParseError> {
    let mut statements = Vec::new();
    for inner in pair.into_inner() {
        let line = line_of(&inner);
        let kind = match inner.as_rule() {
            Rule::directive => build_directive(inner)?,
            Rule::service_response_marker => StatementKind::ServiceResponseMarker,
            Rule::constant => build_constant(inner)?,
            Rule::field => build_field(inner)?,
            Rule::padding_field => StatementKind::Padding(inner.as_str().trim().to_string()),
            Rule::comment => {
                StatementKind::Comment(inner.as_str().trim_start_matches('#').to_string())
            }
            _ => continue,
        };
        statements.push(Statement { line, kind });
    }
    Ok(DefinitionTree { statements })
}

fn build_directive(pair: Pair<Rule>) -> Result<StatementKind, ParseError> {
    let line = line_of(&pair);
    let mut name = None;
    let mut expression = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::directive_name => {
                name = Some(inner.as_str().trim_start_matches('@').to_string())
            }
            Rule::expression => expression = Some(build_expression(inner)?),
            _ => {}
        }
    }
    Ok(StatementKind::Directive {
        name: name.ok_or_else(|| ParseError::new(line, "directive: missing name"))?,
        expression,
    })
}

fn build_constant(pair: Pair<Rule>) -> Result<StatementKind, ParseError> {
    let line = line_of(&pair);
    let mut type_expr = None;
    let mut name = None;
    let mut value = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::type_spec => type_expr = Some(build_type_spec(inner)?),
            Rule::identifier => name = Some(inner.as_str().to_string()),
            Rule::expression => value = Some(build_expression(inner)?),
            _ => {}
        }
    }
    Ok(StatementKind::Constant {
        type_expr: type_expr.ok_or_else(|| ParseError::new(line, "constant: missing type"))?,
        name: name.ok_or_else(|| ParseError::new(line, "constant: missing name"))?,
        value: value.ok_or_else(|| ParseError::new(line, "constant: missing value"))?,
    })
}

fn build_field(pair: Pair<Rule>) -> Result<StatementKind, ParseError> {
    let line = line_of(&pair);
    let mut type_expr = None;
    let mut name = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::type_spec => type_expr = Some(build_type_spec(inner)?),
            Rule::identifier => name = Some(inner.as_str().to_string()),
            _ => {}
        }
    }
    Ok(StatementKind::Field {
        type_expr: type_expr.ok_or_else(|| ParseError::new(line, "field: missing type"))?,
        name: name.ok_or_else(|| ParseError::new(line, "field: missing name"))?,
    })
}

// ==================== Types ====================

fn build_type_spec(pair: Pair<Rule>) -> Result<TypeExpr, ParseError> {
    let line = line_of(&pair);
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| ParseError::new(line, "empty type"))?;
    match inner.as_rule() {
        Rule::scalar_type => Ok(TypeExpr::Scalar(build_scalar_type(inner)?)),
        Rule::array_type => {
            let mut it = inner.into_inner();
            let element = it
                .next()
                .ok_or_else(|| ParseError::new(line, "array: missing element type"))?;
            let capacity = it
                .next()
                .ok_or_else(|| ParseError::new(line, "array: missing capacity"))?;
            Ok(TypeExpr::Array {
                element: build_scalar_type(element)?,
                capacity: build_capacity(capacity)?,
            })
        }
        other => Err(ParseError::new(line, format!("unhandled type rule: {:?}", other))),
    }
}

fn build_capacity(pair: Pair<Rule>) -> Result<ArrayCapacity, ParseError> {
    let line = line_of(&pair);
    let rule = pair.as_rule();
    let expression = pair
        .into_inner()
        .next()
        .ok_or_else(|| ParseError::new(line, "array capacity: missing expression"))?;
    let expression = build_expression(expression)?;
    match rule {
        Rule::capacity_fixed => Ok(ArrayCapacity::Fixed(expression)),
        Rule::capacity_inclusive => Ok(ArrayCapacity::Inclusive(expression)),
        Rule::capacity_exclusive => Ok(ArrayCapacity::Exclusive(expression)),
        other => Err(ParseError::new(line, format!("unhandled capacity rule: {:?}", other))),
    }
}

fn build_scalar_type(pair: Pair<Rule>) -> Result<ScalarType, ParseError> {
    let line = line_of(&pair);
    let mut cast_mode = None;
    let mut name = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::cast_mode => {
                cast_mode = Some(match inner.as_str() {
                    "truncated" => CastMode::Truncated,
                    _ => CastMode::Saturated,
                })
            }
            Rule::primitive_name => name = Some(ScalarName::Primitive(inner.as_str().to_string())),
            Rule::versioned_name => name = Some(ScalarName::Versioned(build_type_name(inner)?)),
            _ => {}
        }
    }
    Ok(ScalarType {
        cast_mode,
        name: name.ok_or_else(|| ParseError::new(line, "type: missing name"))?,
    })
}

fn build_type_name(pair: Pair<Rule>) -> Result<TypeName, ParseError> {
    let line = line_of(&pair);
    let mut name = None;
    let mut major = None;
    let mut minor = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::type_name => name = Some(inner.as_str().to_string()),
            Rule::major_version => major = Some(parse_version_number(&inner)?),
            Rule::minor_version => minor = Some(parse_version_number(&inner)?),
            _ => {}
        }
    }
    Ok(TypeName {
        name: name.ok_or_else(|| ParseError::new(line, "type name: missing name"))?,
        major,
        minor,
    })
}

fn parse_version_number(pair: &Pair<Rule>) -> Result<u32, ParseError> {
    pair.as_str().parse().map_err(|_| {
        ParseError::new(
            line_of(pair),
            format!("version number out of range: {}", pair.as_str()),
        )
    })
}

// ==================== Expressions ====================

fn build_expression(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    let line = line_of(&pair);
    match pair.as_rule() {
        Rule::expression => {
            let inner = pair
                .into_inner()
                .next()
                .ok_or_else(|| ParseError::new(line, "empty expression"))?;
            build_expression(inner)
        }
        Rule::logical | Rule::comparison | Rule::bitwise | Rule::additive | Rule::multiplicative => {
            build_binary_chain(pair)
        }
        Rule::unary => {
            let mut parts: Vec<Pair<Rule>> = pair.into_inner().collect();
            let operand = parts
                .pop()
                .ok_or_else(|| ParseError::new(line, "unary: missing operand"))?;
            let mut expression = build_expression(operand)?;
            for op in parts.into_iter().rev() {
                let op = UnaryOp::from_symbol(op.as_str())
                    .ok_or_else(|| ParseError::new(line, format!("unknown unary operator {}", op.as_str())))?;
                expression = Expression::Unary {
                    op,
                    operand: Box::new(expression),
                };
            }
            Ok(expression)
        }
        Rule::power => {
            let mut it = pair.into_inner();
            let base = it
                .next()
                .ok_or_else(|| ParseError::new(line, "power: missing base"))?;
            let base = build_expression(base)?;
            // power_op is followed by the exponent
            match (it.next(), it.next()) {
                (Some(_), Some(exponent)) => Ok(Expression::Binary {
                    op: BinaryOp::Pow,
                    left: Box::new(base),
                    right: Box::new(build_expression(exponent)?),
                }),
                _ => Ok(base),
            }
        }
        Rule::postfix => {
            let mut it = pair.into_inner();
            let atom = it
                .next()
                .ok_or_else(|| ParseError::new(line, "postfix: missing operand"))?;
            let mut expression = build_expression(atom)?;
            for attribute in it {
                expression = Expression::Attribute {
                    base: Box::new(expression),
                    name: attribute.as_str().to_string(),
                };
            }
            Ok(expression)
        }
        Rule::set_literal => {
            let items = pair
                .into_inner()
                .map(build_expression)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expression::Set(items))
        }
        Rule::type_literal => Ok(Expression::Type(build_type_name(pair)?)),
        Rule::real => Ok(Expression::Rational(parse_real(pair.as_str()).ok_or_else(|| {
            ParseError::new(line, format!("invalid real literal: {}", pair.as_str()))
        })?)),
        Rule::integer => Ok(Expression::Rational(BigRational::from_integer(
            parse_integer(pair.as_str()).ok_or_else(|| {
                ParseError::new(line, format!("invalid integer literal: {}", pair.as_str()))
            })?,
        ))),
        Rule::string => Ok(Expression::String(
            unescape_string(pair.as_str()).map_err(|m| ParseError::new(line, m))?,
        )),
        Rule::boolean => Ok(Expression::Boolean(pair.as_str() == "true")),
        Rule::identifier => Ok(Expression::Identifier(pair.as_str().to_string())),
        other => Err(ParseError::new(line, format!("unhandled expression rule: {:?}", other))),
    }
}

/// `operand (op operand)*`, folded left.
fn build_binary_chain(pair: Pair<Rule>) -> Result<Expression, ParseError> {
    let line = line_of(&pair);
    let mut it = pair.into_inner();
    let first = it
        .next()
        .ok_or_else(|| ParseError::new(line, "binary expression: missing operand"))?;
    let mut left = build_expression(first)?;
    while let Some(op) = it.next() {
        let op_symbol = op.as_str();
        let op = BinaryOp::from_symbol(op_symbol)
            .ok_or_else(|| ParseError::new(line, format!("unknown operator {}", op_symbol)))?;
        let right = it
            .next()
            .ok_or_else(|| ParseError::new(line, format!("missing right operand of {}", op_symbol)))?;
        left = Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(build_expression(right)?),
        };
    }
    Ok(left)
}

// ==================== Literals ====================

fn parse_integer(s: &str) -> Option<BigInt> {
    let s = s.replace('_', "");
    let lower = s.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        return BigInt::from_str_radix(hex, 16).ok();
    }
    if let Some(bin) = lower.strip_prefix("0b") {
        return BigInt::from_str_radix(bin, 2).ok();
    }
    if let Some(oct) = lower.strip_prefix("0o") {
        return BigInt::from_str_radix(oct, 8).ok();
    }
    BigInt::from_str_radix(&s, 10).ok()
}

const MAX_DECIMAL_EXPONENT: u64 = 4096;

/// Exact value of a decimal real literal such as `3.14`, `.5`, `1e-3`.
fn parse_real(s: &str) -> Option<BigRational> {
    let s = s.replace('_', "").to_ascii_lowercase();
    let (mantissa, exponent) = match s.split_once('e') {
        Some((m, e)) => (m.to_string(), e.parse::<i64>().ok()?),
        None => (s.clone(), 0),
    };
    let (whole, fraction) = match mantissa.split_once('.') {
        Some((w, f)) => (w.to_string(), f.to_string()),
        None => (mantissa.clone(), String::new()),
    };
    let digits = format!("{}{}", whole, fraction);
    let digits = if digits.is_empty() { "0".to_string() } else { digits };
    let numerator = BigInt::from_str_radix(&digits, 10).ok()?;
    let scale = exponent - fraction.len() as i64;
    if scale.unsigned_abs() > MAX_DECIMAL_EXPONENT {
        return None;
    }
    let ten = BigInt::from(10);
    let power = num_traits::pow(ten, usize::try_from(scale.unsigned_abs()).ok()?);
    if scale >= 0 {
        Some(BigRational::from_integer(numerator * power))
    } else {
        Some(BigRational::new(numerator, power))
    }
}

fn unescape_string(literal: &str) -> Result<String, String> {
    let quote = literal.chars().next().ok_or("empty string literal")?;
    let body = literal
        .strip_prefix(quote)
        .and_then(|s| s.strip_suffix(quote))
        .ok_or("unterminated string literal")?;
    let mut out = String::new();
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let escaped = chars.next().ok_or("dangling escape in string literal")?;
        match escaped {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'x' | 'u' | 'U' => {
                let width = match escaped {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let hex: String = chars.by_ref().take(width).collect();
                if hex.len() != width {
                    return Err(format!("truncated \\{} escape", escaped));
                }
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| format!("invalid \\{} escape: {}", escaped, hex))?;
                out.push(char::from_u32(code).ok_or_else(|| format!("invalid code point {:#x}", code))?);
            }
            other => return Err(format!("unknown escape sequence \\{}", other)),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rational(n: i64, d: i64) -> BigRational {
        BigRational::new(BigInt::from(n), BigInt::from(d))
    }

    #[test]
    fn real_literals_are_exact() {
        assert_eq!(parse_real("3.25"), Some(rational(13, 4)));
        assert_eq!(parse_real(".5"), Some(rational(1, 2)));
        assert_eq!(parse_real("1e3"), Some(rational(1000, 1)));
        assert_eq!(parse_real("1.5e-3"), Some(rational(3, 2000)));
        assert_eq!(parse_real("1_000.0"), Some(rational(1000, 1)));
    }

    #[test]
    fn integer_literals_in_all_bases() {
        assert_eq!(parse_integer("0x1F"), Some(BigInt::from(31)));
        assert_eq!(parse_integer("0b1010"), Some(BigInt::from(10)));
        assert_eq!(parse_integer("0o17"), Some(BigInt::from(15)));
        assert_eq!(parse_integer("65_535"), Some(BigInt::from(65535)));
    }

    #[test]
    fn string_escapes() {
        assert_eq!(unescape_string(r#""a\nb""#).unwrap(), "a\nb");
        assert_eq!(unescape_string(r"'\x41é'").unwrap(), "A\u{e9}");
        assert!(unescape_string(r"'\q'").is_err());
    }

    #[test]
    fn statements_carry_line_numbers() {
        let tree = parse("# header\nuint8 a\n\n@sealed\n").expect("parse");
        let lines: Vec<usize> = tree.statements.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![1, 2, 4]);
    }

    #[test]
    fn syntax_error_reports_line() {
        let err = parse("uint8 a\nbool array[10]\n").unwrap_err();
        assert_eq!(err.line, 2);
    }
}
