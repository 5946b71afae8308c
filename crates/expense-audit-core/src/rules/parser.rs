//! Parser and type checker for the rule expression language
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! expr     := or
//! or       := and (("||" | "or") and)*
//! and      := compare (("&&" | "and") compare)*
//! compare  := additive (("==" | "!=" | "<" | "<=" | ">" | ">=" | "in") additive)?
//! additive := term (("+" | "-") term)*
//! term     := unary (("*" | "/" | "%") unary)*
//! unary    := ("!" | "not" | "-") unary | primary
//! primary  := number | string | true | false | null | list
//!           | ident | ident "(" args ")" | "(" expr ")"
//! ```
//!
//! Every identifier must be a context binding and every call a known
//! function. The checked expression must be boolean.

use regex::Regex;
use std::fmt;
use std::sync::Arc;

use super::context::Field;
use super::eval::Value;
use super::lexer::{tokenize, Token, TokenKind};
use super::CompileError;

/// Static type of an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ty {
    Number,
    Text,
    Bool,
    /// The `null` literal, comparable with anything
    Null,
    NumberList,
    TextList,
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Ty::Number => "number",
            Ty::Text => "string",
            Ty::Bool => "bool",
            Ty::Null => "null",
            Ty::NumberList => "list of numbers",
            Ty::TextList => "list of strings",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

/// Built-in functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Len,
    Lower,
    Upper,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    Abs,
    Min,
    Max,
    Round,
}

impl Func {
    fn lookup(name: &str) -> Option<Func> {
        Some(match name {
            "len" => Func::Len,
            "lower" => Func::Lower,
            "upper" => Func::Upper,
            "contains" => Func::Contains,
            "starts_with" => Func::StartsWith,
            "ends_with" => Func::EndsWith,
            "matches" => Func::Matches,
            "abs" => Func::Abs,
            "min" => Func::Min,
            "max" => Func::Max,
            "round" => Func::Round,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Func::Len => "len",
            Func::Lower => "lower",
            Func::Upper => "upper",
            Func::Contains => "contains",
            Func::StartsWith => "starts_with",
            Func::EndsWith => "ends_with",
            Func::Matches => "matches",
            Func::Abs => "abs",
            Func::Min => "min",
            Func::Max => "max",
            Func::Round => "round",
        }
    }

    /// Parameter types and return type
    fn signature(&self) -> (&'static [Ty], Ty) {
        match self {
            Func::Len => (&[Ty::Text], Ty::Number),
            Func::Lower | Func::Upper => (&[Ty::Text], Ty::Text),
            Func::Contains | Func::StartsWith | Func::EndsWith | Func::Matches => {
                (&[Ty::Text, Ty::Text], Ty::Bool)
            }
            Func::Abs | Func::Round => (&[Ty::Number], Ty::Number),
            Func::Min | Func::Max => (&[Ty::Number, Ty::Number], Ty::Number),
        }
    }
}

/// Checked expression tree
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Field(Field),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
    /// `matches(text, "literal")` with the pattern compiled ahead of time
    MatchesLiteral(Box<Expr>, Arc<Regex>),
}

/// Parse and type-check `source` into a boolean expression
pub fn parse(source: &str) -> Result<Expr, CompileError> {
    if source.trim().is_empty() {
        return Err(CompileError::new("rule source is empty", 0));
    }

    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        cursor: 0,
        depth: 0,
    };
    let (expr, ty) = parser.expr()?;
    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(CompileError::new(
            format!("unexpected {} after expression", trailing.kind.describe()),
            trailing.position,
        ));
    }
    if ty != Ty::Bool {
        return Err(CompileError::new(
            format!("rule must evaluate to bool, found {}", ty),
            0,
        ));
    }
    Ok(expr)
}

/// Deepest nesting of groups, operators, lists and calls a rule may use
pub const MAX_NESTING: usize = 128;

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
    depth: usize,
}

type Parsed = Result<(Expr, Ty), CompileError>;

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.cursor.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.cursor += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, CompileError> {
        let token = self.advance();
        if token.kind == kind {
            Ok(token)
        } else {
            Err(CompileError::new(
                format!("expected {}, found {}", kind.describe(), token.kind.describe()),
                token.position,
            ))
        }
    }

    fn expr(&mut self) -> Parsed {
        self.or()
    }

    /// Descend one nesting level; callers restore `depth` on the way out
    fn nest(&mut self, at: usize) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(CompileError::new(
                format!("expression nested too deeply (limit {})", MAX_NESTING),
                at,
            ));
        }
        Ok(())
    }

    fn or(&mut self) -> Parsed {
        let base = self.depth;
        let (mut lhs, mut lty) = self.and()?;
        while self.peek().kind == TokenKind::Or {
            let op = self.advance();
            self.nest(op.position)?;
            let (rhs, rty) = self.and()?;
            require_bool(lty, rty, "||", op.position)?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
            lty = Ty::Bool;
        }
        self.depth = base;
        Ok((lhs, lty))
    }

    fn and(&mut self) -> Parsed {
        let base = self.depth;
        let (mut lhs, mut lty) = self.compare()?;
        while self.peek().kind == TokenKind::And {
            let op = self.advance();
            self.nest(op.position)?;
            let (rhs, rty) = self.compare()?;
            require_bool(lty, rty, "&&", op.position)?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
            lty = Ty::Bool;
        }
        self.depth = base;
        Ok((lhs, lty))
    }

    fn compare(&mut self) -> Parsed {
        let (lhs, lty) = self.additive()?;
        let op = match self.peek().kind {
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::Ne => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            TokenKind::In => BinaryOp::In,
            _ => return Ok((lhs, lty)),
        };
        let op_token = self.advance();
        let (rhs, rty) = self.additive()?;
        let at = op_token.position;

        match op {
            BinaryOp::Eq | BinaryOp::Ne => {
                if lty != rty && lty != Ty::Null && rty != Ty::Null {
                    return Err(mismatch(op, lty, rty, at));
                }
            }
            BinaryOp::In => {
                let ok = matches!((lty, rty), (Ty::Number, Ty::NumberList) | (Ty::Text, Ty::TextList));
                if !ok {
                    return Err(mismatch(op, lty, rty, at));
                }
            }
            _ => {
                let ok = lty == rty && matches!(lty, Ty::Number | Ty::Text);
                if !ok {
                    return Err(mismatch(op, lty, rty, at));
                }
            }
        }

        Ok((Expr::Binary(op, Box::new(lhs), Box::new(rhs)), Ty::Bool))
    }

    fn additive(&mut self) -> Parsed {
        let base = self.depth;
        let (mut lhs, mut lty) = self.term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let at = self.advance().position;
            self.nest(at)?;
            let (rhs, rty) = self.term()?;
            // `+` also concatenates strings
            let ty = match (op, lty, rty) {
                (_, Ty::Number, Ty::Number) => Ty::Number,
                (BinaryOp::Add, Ty::Text, Ty::Text) => Ty::Text,
                _ => return Err(mismatch(op, lty, rty, at)),
            };
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
            lty = ty;
        }
        self.depth = base;
        Ok((lhs, lty))
    }

    fn term(&mut self) -> Parsed {
        let base = self.depth;
        let (mut lhs, mut lty) = self.unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => break,
            };
            let at = self.advance().position;
            self.nest(at)?;
            let (rhs, rty) = self.unary()?;
            if lty != Ty::Number || rty != Ty::Number {
                return Err(mismatch(op, lty, rty, at));
            }
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
            lty = Ty::Number;
        }
        self.depth = base;
        Ok((lhs, lty))
    }

    fn unary(&mut self) -> Parsed {
        match self.peek().kind {
            TokenKind::Not => {
                let at = self.advance().position;
                self.nest(at)?;
                let (operand, ty) = self.unary()?;
                self.depth -= 1;
                if ty != Ty::Bool {
                    return Err(CompileError::new(format!("`!` expects bool, found {}", ty), at));
                }
                Ok((Expr::Unary(UnaryOp::Not, Box::new(operand)), Ty::Bool))
            }
            TokenKind::Minus => {
                let at = self.advance().position;
                self.nest(at)?;
                let (operand, ty) = self.unary()?;
                self.depth -= 1;
                if ty != Ty::Number {
                    return Err(CompileError::new(format!("`-` expects number, found {}", ty), at));
                }
                Ok((Expr::Unary(UnaryOp::Neg, Box::new(operand)), Ty::Number))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Parsed {
        let token = self.advance();
        match token.kind {
            TokenKind::Number(n) => Ok((Expr::Literal(Value::Number(n)), Ty::Number)),
            TokenKind::Str(s) => Ok((Expr::Literal(Value::Text(s)), Ty::Text)),
            TokenKind::True => Ok((Expr::Literal(Value::Bool(true)), Ty::Bool)),
            TokenKind::False => Ok((Expr::Literal(Value::Bool(false)), Ty::Bool)),
            TokenKind::Null => Ok((Expr::Literal(Value::Null), Ty::Null)),
            TokenKind::LParen => {
                self.nest(token.position)?;
                let inner = self.expr()?;
                self.expect(TokenKind::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            TokenKind::LBracket => self.list(token.position),
            TokenKind::Ident(name) => {
                if self.peek().kind == TokenKind::LParen {
                    self.call(&name, token.position)
                } else {
                    let field = Field::lookup(&name).ok_or_else(|| {
                        CompileError::new(format!("unknown binding `{}`", name), token.position)
                    })?;
                    Ok((Expr::Field(field), field.ty()))
                }
            }
            other => Err(CompileError::new(
                format!("unexpected {}", other.describe()),
                token.position,
            )),
        }
    }

    fn list(&mut self, open_at: usize) -> Parsed {
        self.nest(open_at)?;
        let mut items = Vec::new();
        let mut elem_ty: Option<Ty> = None;

        if self.peek().kind != TokenKind::RBracket {
            loop {
                let at = self.peek().position;
                let (item, ty) = self.expr()?;
                match (elem_ty, ty) {
                    (None, Ty::Number | Ty::Text) => elem_ty = Some(ty),
                    (Some(expected), found) if expected == found => {}
                    (_, found) => {
                        return Err(CompileError::new(
                            format!("list elements must all be numbers or all strings, found {}", found),
                            at,
                        ));
                    }
                }
                items.push(item);
                if self.peek().kind == TokenKind::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBracket)?;
        self.depth -= 1;

        let ty = match elem_ty {
            Some(Ty::Number) => Ty::NumberList,
            Some(_) => Ty::TextList,
            None => return Err(CompileError::new("empty list literal", open_at)),
        };
        Ok((Expr::List(items), ty))
    }

    fn call(&mut self, name: &str, at: usize) -> Parsed {
        let func = Func::lookup(name)
            .ok_or_else(|| CompileError::new(format!("unknown function `{}`", name), at))?;
        self.expect(TokenKind::LParen)?;
        self.nest(at)?;

        let mut args = Vec::new();
        if self.peek().kind != TokenKind::RParen {
            loop {
                let arg_at = self.peek().position;
                args.push((self.expr()?, arg_at));
                if self.peek().kind == TokenKind::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        self.depth -= 1;

        let (params, ret) = func.signature();
        if args.len() != params.len() {
            return Err(CompileError::new(
                format!("{}() takes {} argument(s), got {}", func.name(), params.len(), args.len()),
                at,
            ));
        }
        for (((_, ty), arg_at), expected) in args.iter().zip(params) {
            if ty != expected {
                return Err(CompileError::new(
                    format!("{}() expects {}, found {}", func.name(), expected, ty),
                    *arg_at,
                ));
            }
        }

        let mut exprs: Vec<Expr> = args.into_iter().map(|((e, _), _)| e).collect();

        if func == Func::Matches {
            if let Expr::Literal(Value::Text(pattern)) = &exprs[1] {
                let regex = Regex::new(pattern).map_err(|e| {
                    CompileError::new(format!("invalid regular expression: {}", e), at)
                })?;
                let subject = exprs.swap_remove(0);
                return Ok((Expr::MatchesLiteral(Box::new(subject), Arc::new(regex)), ret));
            }
        }

        Ok((Expr::Call(func, exprs), ret))
    }
}

fn require_bool(lty: Ty, rty: Ty, op: &str, at: usize) -> Result<(), CompileError> {
    if lty == Ty::Bool && rty == Ty::Bool {
        Ok(())
    } else {
        Err(CompileError::new(
            format!("`{}` expects bool operands, found {} and {}", op, lty, rty),
            at,
        ))
    }
}

fn mismatch(op: BinaryOp, lty: Ty, rty: Ty, at: usize) -> CompileError {
    CompileError::new(
        format!("cannot apply `{}` to {} and {}", op.symbol(), lty, rty),
        at,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_spec_style_rules() {
        for source in [
            "amount <= 2000",
            "claim_type == 'travel' && amount <= 5000 || department == \"exec\"",
            "duplicate_invoice_count == 0",
            "tax_id == null || matches(tax_id, '^[0-9A-Z]{15,20}$')",
            "not has_invoice or invoice_amount >= amount * 0.95",
            "category in ['hotel', 'flight', 'train']",
            "monthly_claim_count <= 10 and monthly_claim_total + 0 <= 20000",
            "len(lower(description)) > 3",
            "max(amount, 1) % 2 >= 0",
            "-amount < 0",
        ] {
            assert!(parse(source).is_ok(), "failed to parse {}", source);
        }
    }

    #[test]
    fn test_unknown_binding_is_rejected() {
        let err = parse("salary > 10").unwrap_err();
        assert!(err.message.contains("unknown binding `salary`"));
        assert_eq!(err.position, 0);
    }

    #[test]
    fn test_non_boolean_rule_is_rejected() {
        let err = parse("amount + 1").unwrap_err();
        assert!(err.message.contains("must evaluate to bool"));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let err = parse("amount == 'high'").unwrap_err();
        assert!(err.message.contains("cannot apply `==` to number and string"));
        assert_eq!(err.position, 7);
    }

    #[test]
    fn test_arity_and_unknown_function() {
        assert!(parse("len(vendor, 2) > 1").unwrap_err().message.contains("takes 1 argument"));
        assert!(parse("sqrt(amount) > 1").unwrap_err().message.contains("unknown function"));
    }

    #[test]
    fn test_invalid_literal_regex() {
        let err = parse("matches(vendor, '([a-z')").unwrap_err();
        assert!(err.message.contains("invalid regular expression"));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("").is_err());
        assert!(parse("amount <=").is_err());
        assert!(parse("(amount > 1").is_err());
        assert!(parse("amount > 1 amount").unwrap_err().message.contains("after expression"));
        assert!(parse("category in []").unwrap_err().message.contains("empty list"));
        assert!(parse("category in ['a', 1]").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}true{}", "(".repeat(20_000), ")".repeat(20_000));
        let err = parse(&deep).unwrap_err();
        assert!(err.message.contains("nested too deeply"));
        assert_eq!(err.position, MAX_NESTING);

        assert!(parse(&format!("{}true", "!".repeat(20_000))).is_err());
        assert!(parse(&format!("{}amount < 0", "-".repeat(20_000))).is_err());
        assert!(parse(&format!("amount{} > 0", " + 1".repeat(20_000))).is_err());
        let calls = format!("{}vendor{} == 'x'", "lower(".repeat(5_000), ")".repeat(5_000));
        assert!(parse(&calls).unwrap_err().message.contains("nested too deeply"));

        let ok = format!("{}amount > 1{}", "(".repeat(50), ")".repeat(50));
        assert!(parse(&ok).is_ok());
        assert!(parse(&format!("amount{} > 0", " + 1".repeat(50))).is_ok());
    }

    #[test]
    fn test_literal_regex_is_precompiled() {
        let expr = parse("matches(vendor, '^A')").unwrap();
        assert!(matches!(expr, Expr::MatchesLiteral(..)));

        let expr = parse("matches(vendor, lower('^A'))").unwrap();
        assert!(matches!(expr, Expr::Call(Func::Matches, _)));
    }
}
