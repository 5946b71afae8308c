//! Evaluator for checked rule expressions

use serde::{Deserialize, Serialize};
use std::fmt;

use super::context::AuditContext;
use super::parser::{BinaryOp, Expr, Func, UnaryOp};
use super::RuleError;

/// Runtime value of a rule expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<Value>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Text(_) => "string",
            Value::List(_) => "list",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "\"{}\"", s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

fn fail(message: impl Into<String>) -> RuleError {
    RuleError::Execution(message.into())
}

fn number(value: Value, what: &str) -> Result<f64, RuleError> {
    match value {
        Value::Number(n) => Ok(n),
        Value::Null => Err(fail(format!("{} is null", what))),
        other => Err(fail(format!("{} expected number, found {}", what, other.kind()))),
    }
}

fn text(value: Value, what: &str) -> Result<String, RuleError> {
    match value {
        Value::Text(s) => Ok(s),
        Value::Null => Err(fail(format!("{} is null", what))),
        other => Err(fail(format!("{} expected string, found {}", what, other.kind()))),
    }
}

fn boolean(value: Value, what: &str) -> Result<bool, RuleError> {
    match value {
        Value::Bool(b) => Ok(b),
        Value::Null => Err(fail(format!("{} is null", what))),
        other => Err(fail(format!("{} expected bool, found {}", what, other.kind()))),
    }
}

/// Evaluate `expr` against `ctx`
///
/// `&&` and `||` short-circuit, so `tax_id == null || len(tax_id) > 0` never
/// touches a null `tax_id`. Null in arithmetic, ordering or a function
/// argument is an execution error.
pub fn evaluate(expr: &Expr, ctx: &AuditContext) -> Result<Value, RuleError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Field(field) => Ok(ctx.value_of(*field)),
        Expr::List(items) => items
            .iter()
            .map(|item| evaluate(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expr::Unary(op, operand) => {
            let value = evaluate(operand, ctx)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!boolean(value, "operand of `!`")?)),
                UnaryOp::Neg => Ok(Value::Number(-number(value, "operand of `-`")?)),
            }
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            if !boolean(evaluate(lhs, ctx)?, "left side of `&&`")? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(boolean(evaluate(rhs, ctx)?, "right side of `&&`")?))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            if boolean(evaluate(lhs, ctx)?, "left side of `||`")? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(boolean(evaluate(rhs, ctx)?, "right side of `||`")?))
        }
        Expr::Binary(op, lhs, rhs) => {
            let left = evaluate(lhs, ctx)?;
            let right = evaluate(rhs, ctx)?;
            binary(*op, left, right)
        }
        Expr::Call(func, args) => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            call(*func, values)
        }
        Expr::MatchesLiteral(subject, regex) => {
            let subject = text(evaluate(subject, ctx)?, "argument of matches()")?;
            Ok(Value::Bool(regex.is_match(&subject)))
        }
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, RuleError> {
    let sym = op.symbol();
    match op {
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Ne => Ok(Value::Bool(left != right)),
        BinaryOp::In => match right {
            Value::List(items) => {
                if left == Value::Null {
                    return Err(fail("left side of `in` is null"));
                }
                Ok(Value::Bool(items.contains(&left)))
            }
            other => Err(fail(format!("right side of `in` expected list, found {}", other.kind()))),
        },
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(&b),
                (Value::Text(a), Value::Text(b)) => Some(a.cmp(&b)),
                (Value::Null, _) | (_, Value::Null) => {
                    return Err(fail(format!("cannot compare null with `{}`", sym)));
                }
                (a, b) => {
                    return Err(fail(format!("cannot compare {} with {}", a.kind(), b.kind())));
                }
            };
            let ordering = ordering.ok_or_else(|| fail("comparison with NaN"))?;
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::Add => match (left, right) {
            (Value::Text(a), Value::Text(b)) => Ok(Value::Text(a + &b)),
            (a, b) => Ok(Value::Number(
                number(a, "left side of `+`")? + number(b, "right side of `+`")?,
            )),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            let a = number(left, &format!("left side of `{}`", sym))?;
            let b = number(right, &format!("right side of `{}`", sym))?;
            let value = match op {
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div | BinaryOp::Rem if b == 0.0 => {
                    return Err(fail(format!("division by zero in `{}`", sym)));
                }
                BinaryOp::Div => a / b,
                _ => a % b,
            };
            Ok(Value::Number(value))
        }
        BinaryOp::And | BinaryOp::Or => Err(fail(format!("`{}` is evaluated lazily", sym))),
    }
}

fn call(func: Func, args: Vec<Value>) -> Result<Value, RuleError> {
    let what = format!("argument of {}()", func.name());
    let mut args = args.into_iter();
    let mut next = || args.next().unwrap_or(Value::Null);

    let value = match func {
        Func::Len => Value::Number(text(next(), &what)?.chars().count() as f64),
        Func::Lower => Value::Text(text(next(), &what)?.to_lowercase()),
        Func::Upper => Value::Text(text(next(), &what)?.to_uppercase()),
        Func::Contains => {
            let (haystack, needle) = (text(next(), &what)?, text(next(), &what)?);
            Value::Bool(haystack.contains(&needle))
        }
        Func::StartsWith => {
            let (s, prefix) = (text(next(), &what)?, text(next(), &what)?);
            Value::Bool(s.starts_with(&prefix))
        }
        Func::EndsWith => {
            let (s, suffix) = (text(next(), &what)?, text(next(), &what)?);
            Value::Bool(s.ends_with(&suffix))
        }
        Func::Matches => {
            let (s, pattern) = (text(next(), &what)?, text(next(), &what)?);
            let regex = regex::Regex::new(&pattern)
                .map_err(|e| fail(format!("invalid regular expression: {}", e)))?;
            Value::Bool(regex.is_match(&s))
        }
        Func::Abs => Value::Number(number(next(), &what)?.abs()),
        Func::Round => Value::Number(number(next(), &what)?.round()),
        Func::Min => Value::Number(number(next(), &what)?.min(number(next(), &what)?)),
        Func::Max => Value::Number(number(next(), &what)?.max(number(next(), &what)?)),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Claim, InvoiceFields};
    use crate::rules::parser::parse;
    use chrono::{NaiveDate, Utc};

    fn ctx(amount: f64, invoice: Option<InvoiceFields>) -> AuditContext {
        let claim = Claim {
            id: "c1".to_string(),
            employee_id: "e1".to_string(),
            department: "Sales".to_string(),
            claim_type: "travel".to_string(),
            category: "hotel".to_string(),
            amount,
            currency: "CNY".to_string(),
            description: "Hotel stay for customer meeting".to_string(),
            vendor: "Grand Hotel".to_string(),
            expense_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            submitted_at: Utc::now(),
            attachment_count: 2,
            invoice,
        };
        AuditContext::from_claim(&claim, NaiveDate::from_ymd_opt(2024, 6, 11).unwrap())
    }

    fn eval(source: &str, ctx: &AuditContext) -> Result<Value, RuleError> {
        evaluate(&parse(source).unwrap(), ctx)
    }

    #[test]
    fn test_comparisons_and_logic() {
        let c = ctx(1500.0, None);
        assert_eq!(eval("amount <= 2000", &c).unwrap(), Value::Bool(true));
        assert_eq!(eval("amount > 2000 || category == 'hotel'", &c).unwrap(), Value::Bool(true));
        assert_eq!(eval("not (amount < 1000) and days_since_expense == 10", &c).unwrap(), Value::Bool(true));
        assert_eq!(eval("category in ['meal', 'taxi']", &c).unwrap(), Value::Bool(false));
        assert_eq!(eval("amount % 1000 == 500", &c).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_string_functions() {
        let c = ctx(10.0, None);
        assert_eq!(eval("contains(lower(description), 'customer')", &c).unwrap(), Value::Bool(true));
        assert_eq!(eval("starts_with(vendor, 'Grand')", &c).unwrap(), Value::Bool(true));
        assert_eq!(eval("upper(department) == 'SALES'", &c).unwrap(), Value::Bool(true));
        assert_eq!(eval("len(vendor) == 11", &c).unwrap(), Value::Bool(true));
        assert_eq!(eval("matches(vendor, lower('^G'))", &c).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_null_handling() {
        let c = ctx(10.0, None);
        assert_eq!(eval("tax_id == null", &c).unwrap(), Value::Bool(true));
        assert_eq!(
            eval("tax_id == null || matches(tax_id, '^[0-9A-Z]{18}$')", &c).unwrap(),
            Value::Bool(true)
        );

        let err = eval("invoice_amount >= amount", &c).unwrap_err();
        assert!(matches!(err, RuleError::Execution(ref m) if m.contains("null")));

        let err = eval("len(tax_id) > 0", &c).unwrap_err();
        assert!(matches!(err, RuleError::Execution(_)));
    }

    #[test]
    fn test_invoice_consistency() {
        let invoice = InvoiceFields {
            invoice_number: "INV-7".to_string(),
            tax_id: Some("91310000MA1FL5LX2A".to_string()),
            total_amount: Some(950.0),
            ..Default::default()
        };
        let c = ctx(1000.0, Some(invoice));
        assert_eq!(eval("invoice_amount >= amount * 0.95", &c).unwrap(), Value::Bool(true));
        assert_eq!(eval("matches(tax_id, '^[0-9A-Z]{18}$')", &c).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_division_by_zero() {
        let c = ctx(10.0, None);
        let err = eval("amount / (attachment_count - 2) > 1", &c).unwrap_err();
        assert_eq!(err, RuleError::Execution("division by zero in `/`".to_string()));
    }

    #[test]
    fn test_value_display() {
        let list = Value::List(vec![Value::Number(1.0), Value::Text("a".to_string()), Value::Null]);
        assert_eq!(list.to_string(), "[1, \"a\", null]");
    }
}
