//! Content filter compilation.
//!
//! Filter expressions use the SQL subset of content-filtered topics. The
//! expression is parsed with `sqlparser`, then lowered into a [`Predicate`]
//! after every field reference has been checked against the type schema.

use super::predicate::{CompareOp, Operand, Predicate};
use crate::error::{Result, SubscriberError};
use crate::types::{FieldKind, FieldValue, TopicType, TypeSchema};
use sqlparser::ast::{BinaryOperator, Expr, UnaryOperator, Value};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

/// A filter expression and the parameters its `%N` placeholders refer to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterExpression {
    pub expression: String,
    pub parameters: Vec<String>,
}

impl FilterExpression {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<String>) -> Self {
        self.parameters = parameters;
        self
    }
}

/// A filter checked against a schema, ready for evaluation.
///
/// Immutable once compiled. Evaluation is a pure function of the payload.
#[derive(Clone, Debug)]
pub struct CompiledFilter {
    expression: FilterExpression,
    predicate: Predicate,
}

impl CompiledFilter {
    /// Compile `expression` against an explicit schema.
    pub fn compile(expression: &FilterExpression, schema: &TypeSchema) -> Result<Self> {
        let source = expression.expression.as_str();
        let bound = bind_parameters(source, &expression.parameters)?;

        let dialect = GenericDialect {};
        let mut parser = Parser::new(&dialect)
            .try_with_sql(&bound)
            .map_err(|e| SubscriberError::invalid_filter(source, e.to_string()))?;
        let expr = parser
            .parse_expr()
            .map_err(|e| SubscriberError::invalid_filter(source, e.to_string()))?;
        let trailing = parser.peek_token().token;
        if trailing != Token::EOF {
            return Err(SubscriberError::invalid_filter(
                source,
                format!("unexpected trailing input at {}", trailing),
            ));
        }

        let lowering = Lowering { source, schema };
        let predicate = lowering.predicate(&expr)?;

        Ok(Self {
            expression: expression.clone(),
            predicate,
        })
    }

    /// Compile against the schema of `T`.
    pub fn for_type<T: TopicType>(expression: &FilterExpression) -> Result<Self> {
        Self::compile(expression, &T::schema())
    }

    pub fn expression(&self) -> &FilterExpression {
        &self.expression
    }

    /// Whether `sample` passes the filter.
    pub fn evaluate<T: TopicType>(&self, sample: &T) -> bool {
        self.predicate.evaluate(sample)
    }
}

/// Replace `%N` placeholders outside string literals with their parameter.
fn bind_parameters(expression: &str, parameters: &[String]) -> Result<String> {
    let mut result = String::with_capacity(expression.len());
    let mut chars = expression.char_indices().peekable();
    let mut in_string = false;

    while let Some((_, c)) = chars.next() {
        if c == '\'' {
            in_string = !in_string;
            result.push(c);
            continue;
        }

        if c != '%' || in_string {
            result.push(c);
            continue;
        }

        let mut digits = String::new();
        while let Some((_, d)) = chars.peek().copied() {
            if !d.is_ascii_digit() {
                break;
            }
            digits.push(d);
            chars.next();
        }

        let index: usize = digits.parse().map_err(|_| {
            SubscriberError::invalid_filter(expression, "'%' must be followed by a parameter index")
        })?;
        let value = parameters.get(index).ok_or_else(|| {
            SubscriberError::invalid_filter(
                expression,
                format!(
                    "parameter %{} is not bound ({} given)",
                    index,
                    parameters.len()
                ),
            )
        })?;
        check_parameter(expression, index, value)?;
        result.push('(');
        result.push_str(value);
        result.push(')');
    }

    Ok(result)
}

/// A parameter must parse on its own as a single literal operand.
fn check_parameter(expression: &str, index: usize, value: &str) -> Result<()> {
    let reject = |reason: String| {
        SubscriberError::invalid_filter(expression, format!("parameter %{} {}", index, reason))
    };

    let dialect = GenericDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(value)
        .map_err(|e| reject(e.to_string()))?;
    let expr = parser.parse_expr().map_err(|e| reject(e.to_string()))?;
    if parser.peek_token().token != Token::EOF {
        return Err(reject(format!("{:?} is not a single literal", value)));
    }

    let literal = match &expr {
        Expr::UnaryOp {
            op: UnaryOperator::Minus | UnaryOperator::Plus,
            expr,
        } => matches!(expr.as_ref(), Expr::Value(v) if matches!(v.value, Value::Number(..))),
        Expr::Value(v) => matches!(
            v.value,
            Value::Number(..) | Value::SingleQuotedString(_) | Value::Boolean(_)
        ),
        _ => false,
    };
    if !literal {
        return Err(reject(format!("{:?} is not a literal", value)));
    }
    Ok(())
}

struct Lowering<'a> {
    source: &'a str,
    schema: &'a TypeSchema,
}

impl Lowering<'_> {
    fn error(&self, reason: impl Into<String>) -> SubscriberError {
        SubscriberError::invalid_filter(self.source, reason)
    }

    fn predicate(&self, expr: &Expr) -> Result<Predicate> {
        match expr {
            Expr::Nested(inner) => self.predicate(inner),
            Expr::UnaryOp {
                op: UnaryOperator::Not,
                expr,
            } => Ok(Predicate::Not(Box::new(self.predicate(expr)?))),
            Expr::BinaryOp { left, op, right } => match op {
                BinaryOperator::And => Ok(Predicate::And(
                    Box::new(self.predicate(left)?),
                    Box::new(self.predicate(right)?),
                )),
                BinaryOperator::Or => Ok(Predicate::Or(
                    Box::new(self.predicate(left)?),
                    Box::new(self.predicate(right)?),
                )),
                other => {
                    let op = compare_op(other)
                        .ok_or_else(|| self.error(format!("unsupported operator {}", other)))?;
                    self.comparison(left, op, right)
                }
            },
            Expr::Between {
                expr,
                negated,
                low,
                high,
                ..
            } => {
                let (value, value_kind) = self.operand(expr)?;
                let (low, low_kind) = self.operand(low)?;
                let (high, high_kind) = self.operand(high)?;
                for kind in [low_kind, high_kind] {
                    self.check_kinds(value_kind, kind, true)?;
                }
                Ok(Predicate::Between {
                    value,
                    low,
                    high,
                    negated: *negated,
                })
            }
            Expr::Value(v) => match &v.value {
                Value::Boolean(b) => Ok(Predicate::Constant(*b)),
                other => Err(self.error(format!("{} is not a condition", other))),
            },
            Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
                let (field, kind) = self.operand(expr)?;
                if kind != FieldKind::Boolean {
                    return Err(self.error("only boolean fields can stand alone as a condition"));
                }
                Ok(Predicate::Compare {
                    left: field,
                    op: CompareOp::Eq,
                    right: Operand::Literal(FieldValue::Boolean(true)),
                })
            }
            other => Err(self.error(format!("unsupported expression {}", other))),
        }
    }

    fn comparison(&self, left: &Expr, op: CompareOp, right: &Expr) -> Result<Predicate> {
        let (left, left_kind) = self.operand(left)?;
        let (right, right_kind) = self.operand(right)?;
        self.check_kinds(left_kind, right_kind, op.is_ordering())?;
        Ok(Predicate::Compare { left, op, right })
    }

    fn check_kinds(&self, left: FieldKind, right: FieldKind, ordering: bool) -> Result<()> {
        if left != right {
            return Err(self.error(format!("cannot compare {:?} with {:?}", left, right)));
        }
        if ordering && left == FieldKind::Boolean {
            return Err(self.error("boolean values only support = and <>"));
        }
        Ok(())
    }

    fn operand(&self, expr: &Expr) -> Result<(Operand, FieldKind)> {
        match expr {
            Expr::Nested(inner) => self.operand(inner),
            Expr::Identifier(ident) => self.field(ident.value.clone()),
            Expr::CompoundIdentifier(parts) => {
                let path = parts
                    .iter()
                    .map(|p| p.value.as_str())
                    .collect::<Vec<_>>()
                    .join(".");
                self.field(path)
            }
            Expr::UnaryOp {
                op: op @ (UnaryOperator::Minus | UnaryOperator::Plus),
                expr,
            } => match self.operand(expr)? {
                (Operand::Literal(FieldValue::Numeric(n)), kind) => {
                    let n = if matches!(op, UnaryOperator::Minus) { -n } else { n };
                    Ok((Operand::Literal(FieldValue::Numeric(n)), kind))
                }
                _ => Err(self.error("sign applied to a non-numeric operand")),
            },
            Expr::Value(v) => {
                let literal = match &v.value {
                    Value::Number(n, _) => FieldValue::Numeric(
                        n.parse()
                            .map_err(|_| self.error(format!("invalid number {}", n)))?,
                    ),
                    Value::SingleQuotedString(s) => FieldValue::Text(s.clone()),
                    Value::Boolean(b) => FieldValue::Boolean(*b),
                    other => return Err(self.error(format!("unsupported literal {}", other))),
                };
                let kind = literal.kind();
                Ok((Operand::Literal(literal), kind))
            }
            other => Err(self.error(format!("unsupported operand {}", other))),
        }
    }

    fn field(&self, path: String) -> Result<(Operand, FieldKind)> {
        let kind = self
            .schema
            .kind_of(&path)
            .ok_or_else(|| self.error(format!("unknown field {}", path)))?;
        Ok((Operand::Field(path), kind))
    }
}

fn compare_op(op: &BinaryOperator) -> Option<CompareOp> {
    Some(match op {
        BinaryOperator::Eq => CompareOp::Eq,
        BinaryOperator::NotEq => CompareOp::NotEq,
        BinaryOperator::Lt => CompareOp::Lt,
        BinaryOperator::LtEq => CompareOp::LtEq,
        BinaryOperator::Gt => CompareOp::Gt,
        BinaryOperator::GtEq => CompareOp::GtEq,
        _ => return None,
    })
}
