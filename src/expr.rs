//! The embedded expression language: lexer and parser.
//!
//! Bodies between braces parse to a single expression AST. The parser
//! consumes the entire input or fails — the first-that-compiles rule in the
//! interpolation parser relies on trailing tokens being a hard error.

use crate::error::RuntimeError;
use serde_json::Value;

// ═══════════════════════════════════════════════════════════════════════════════
// AST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Value),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign(Box<Expr>, Box<Expr>),
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEXER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(Value),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Question,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn lex(src: &str) -> Result<Vec<Tok>, RuntimeError> {
    let chars: Vec<char> = src.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if is_ident_start(c) {
            let start = i;
            while i < chars.len() && is_ident_continue(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            toks.push(Tok::Ident(word));
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let mut is_float = false;
            if i < chars.len() && chars[i] == '.' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit()
            {
                is_float = true;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                is_float = true;
                i += 1;
                if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                    i += 1;
                }
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = if is_float {
                let f: f64 = text
                    .parse()
                    .map_err(|_| RuntimeError::expr_syntax(format!("Bad number '{}'.", text)))?;
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| RuntimeError::expr_syntax(format!("Bad number '{}'.", text)))?
            } else {
                let n: i64 = text
                    .parse()
                    .map_err(|_| RuntimeError::expr_syntax(format!("Bad number '{}'.", text)))?;
                Value::Number(n.into())
            };
            toks.push(Tok::Num(value));
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            i += 1;
            let mut out = String::new();
            let mut closed = false;
            while i < chars.len() {
                let ch = chars[i];
                if ch == '\\' {
                    i += 1;
                    match chars.get(i).copied() {
                        Some('n') => out.push('\n'),
                        Some('r') => out.push('\r'),
                        Some('t') => out.push('\t'),
                        Some(other) => out.push(other),
                        None => break,
                    }
                    i += 1;
                } else if ch == quote {
                    closed = true;
                    i += 1;
                    break;
                } else {
                    out.push(ch);
                    i += 1;
                }
            }
            if !closed {
                return Err(RuntimeError::expr_syntax("Unterminated string literal."));
            }
            toks.push(Tok::Str(out));
            continue;
        }

        let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
        let tok = match two.as_str() {
            "==" => Some((Tok::EqEq, 2)),
            "!=" => Some((Tok::NotEq, 2)),
            "<=" => Some((Tok::Le, 2)),
            ">=" => Some((Tok::Ge, 2)),
            "&&" => Some((Tok::AndAnd, 2)),
            "||" => Some((Tok::OrOr, 2)),
            _ => None,
        };
        if let Some((tok, len)) = tok {
            toks.push(tok);
            i += len;
            continue;
        }

        let tok = match c {
            '(' => Tok::LParen,
            ')' => Tok::RParen,
            '{' => Tok::LBrace,
            '}' => Tok::RBrace,
            '[' => Tok::LBracket,
            ']' => Tok::RBracket,
            ',' => Tok::Comma,
            '.' => Tok::Dot,
            ':' => Tok::Colon,
            '?' => Tok::Question,
            '=' => Tok::Assign,
            '<' => Tok::Lt,
            '>' => Tok::Gt,
            '!' => Tok::Not,
            '+' => Tok::Plus,
            '-' => Tok::Minus,
            '*' => Tok::Star,
            '/' => Tok::Slash,
            '%' => Tok::Percent,
            other => {
                return Err(RuntimeError::expr_syntax(format!(
                    "Unexpected character '{}'.",
                    other
                )))
            }
        };
        toks.push(tok);
        i += 1;
    }

    Ok(toks)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSER
// ═══════════════════════════════════════════════════════════════════════════════

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

/// Parse a complete expression body. Trailing tokens are an error.
pub fn parse_expression(src: &str) -> Result<Expr, RuntimeError> {
    let toks = lex(src)?;
    if toks.is_empty() {
        return Err(RuntimeError::expr_syntax("Empty expression."));
    }
    let mut parser = Parser { toks, pos: 0 };
    let expr = parser.assignment()?;
    if parser.pos != parser.toks.len() {
        return Err(RuntimeError::expr_syntax(format!(
            "Trailing tokens after expression: {:?}.",
            parser.toks[parser.pos]
        )));
    }
    Ok(expr)
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn advance(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<(), RuntimeError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(RuntimeError::expr_syntax(format!(
                "Expected {:?}, found {:?}.",
                tok,
                self.peek()
            )))
        }
    }

    fn assignment(&mut self) -> Result<Expr, RuntimeError> {
        let lhs = self.ternary()?;
        if self.eat(&Tok::Assign) {
            match lhs {
                Expr::Ident(_) | Expr::Member(..) | Expr::Index(..) => {}
                _ => {
                    return Err(RuntimeError::expr_syntax(
                        "Left side of assignment is not a place.",
                    ))
                }
            }
            let rhs = self.assignment()?;
            return Ok(Expr::Assign(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn ternary(&mut self) -> Result<Expr, RuntimeError> {
        let cond = self.logic_or()?;
        if self.eat(&Tok::Question) {
            let consequent = self.assignment()?;
            self.expect(Tok::Colon)?;
            let alternate = self.assignment()?;
            return Ok(Expr::Ternary(
                Box::new(cond),
                Box::new(consequent),
                Box::new(alternate),
            ));
        }
        Ok(cond)
    }

    fn logic_or(&mut self) -> Result<Expr, RuntimeError> {
        let mut lhs = self.logic_and()?;
        while self.eat(&Tok::OrOr) {
            let rhs = self.logic_and()?;
            lhs = Expr::Bin(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn logic_and(&mut self) -> Result<Expr, RuntimeError> {
        let mut lhs = self.equality()?;
        while self.eat(&Tok::AndAnd) {
            let rhs = self.equality()?;
            lhs = Expr::Bin(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, RuntimeError> {
        let mut lhs = self.relational()?;
        loop {
            let op = match self.peek() {
                Some(Tok::EqEq) => BinOp::Eq,
                Some(Tok::NotEq) => BinOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.relational()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn relational(&mut self) -> Result<Expr, RuntimeError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Lt) => BinOp::Lt,
                Some(Tok::Le) => BinOp::Le,
                Some(Tok::Gt) => BinOp::Gt,
                Some(Tok::Ge) => BinOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, RuntimeError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, RuntimeError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                Some(Tok::Percent) => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, RuntimeError> {
        if self.eat(&Tok::Not) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat(&Tok::Minus) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, RuntimeError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Tok::Dot) {
                match self.advance() {
                    Some(Tok::Ident(name)) => {
                        expr = Expr::Member(Box::new(expr), name);
                    }
                    other => {
                        return Err(RuntimeError::expr_syntax(format!(
                            "Expected property name after '.', found {:?}.",
                            other
                        )))
                    }
                }
            } else if self.eat(&Tok::LBracket) {
                let index = self.assignment()?;
                self.expect(Tok::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat(&Tok::LParen) {
                let mut args = Vec::new();
                if !self.eat(&Tok::RParen) {
                    loop {
                        args.push(self.assignment()?);
                        if self.eat(&Tok::RParen) {
                            break;
                        }
                        self.expect(Tok::Comma)?;
                    }
                }
                expr = Expr::Call(Box::new(expr), args);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, RuntimeError> {
        match self.advance() {
            Some(Tok::Num(n)) => Ok(Expr::Lit(n)),
            Some(Tok::Str(s)) => Ok(Expr::Lit(Value::String(s))),
            Some(Tok::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Lit(Value::Bool(true))),
                "false" => Ok(Expr::Lit(Value::Bool(false))),
                "null" | "undefined" => Ok(Expr::Lit(Value::Null)),
                _ => Ok(Expr::Ident(word)),
            },
            Some(Tok::LParen) => {
                let inner = self.assignment()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::LBracket) => {
                let mut items = Vec::new();
                if !self.eat(&Tok::RBracket) {
                    loop {
                        items.push(self.assignment()?);
                        if self.eat(&Tok::RBracket) {
                            break;
                        }
                        self.expect(Tok::Comma)?;
                        if self.eat(&Tok::RBracket) {
                            break;
                        }
                    }
                }
                Ok(Expr::Array(items))
            }
            Some(Tok::LBrace) => {
                let mut entries = Vec::new();
                if !self.eat(&Tok::RBrace) {
                    loop {
                        let key = match self.advance() {
                            Some(Tok::Ident(name)) => name,
                            Some(Tok::Str(s)) => s,
                            other => {
                                return Err(RuntimeError::expr_syntax(format!(
                                    "Expected object key, found {:?}.",
                                    other
                                )))
                            }
                        };
                        self.expect(Tok::Colon)?;
                        let value = self.assignment()?;
                        entries.push((key, value));
                        if self.eat(&Tok::RBrace) {
                            break;
                        }
                        self.expect(Tok::Comma)?;
                        if self.eat(&Tok::RBrace) {
                            break;
                        }
                    }
                }
                Ok(Expr::Object(entries))
            }
            other => Err(RuntimeError::expr_syntax(format!(
                "Unexpected token {:?}.",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literals() {
        assert_eq!(parse_expression("42").unwrap(), Expr::Lit(json!(42)));
        assert_eq!(parse_expression("'hi'").unwrap(), Expr::Lit(json!("hi")));
        assert_eq!(parse_expression("true").unwrap(), Expr::Lit(json!(true)));
        assert_eq!(parse_expression("null").unwrap(), Expr::Lit(Value::Null));
        assert_eq!(parse_expression("1.5").unwrap(), Expr::Lit(json!(1.5)));
    }

    #[test]
    fn test_member_chain() {
        let expr = parse_expression("$u.name").unwrap();
        assert_eq!(
            expr,
            Expr::Member(Box::new(Expr::Ident("$u".to_string())), "name".to_string())
        );
    }

    #[test]
    fn test_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let expr = parse_expression("1 + 2 * 3").unwrap();
        match expr {
            Expr::Bin(BinOp::Add, _, rhs) => match *rhs {
                Expr::Bin(BinOp::Mul, ..) => {}
                other => panic!("expected mul on the right, got {:?}", other),
            },
            other => panic!("expected add at the top, got {:?}", other),
        }
    }

    #[test]
    fn test_object_literal() {
        let expr = parse_expression("{ open: false, n: 1 }").unwrap();
        match expr {
            Expr::Object(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].0, "open");
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_requires_place() {
        assert!(parse_expression("a.b = 1").is_ok());
        assert!(parse_expression("1 = 2").is_err());
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        assert!(parse_expression("a b").is_err());
        assert!(parse_expression("'a").is_err());
        assert!(parse_expression("{ open: false").is_err());
    }

    #[test]
    fn test_string_with_closing_brace() {
        assert_eq!(parse_expression("'a}b'").unwrap(), Expr::Lit(json!("a}b")));
    }

    #[test]
    fn test_ternary() {
        assert!(parse_expression("a ? 'x' : 'y'").is_ok());
    }
}
