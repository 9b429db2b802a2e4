//! Expression grammar for embedded code fragments.
//!
//! Fragments are small: literals, identifiers (locals with a scope-method
//! fallback), `@attr` reads, `yield`, and the usual unary/binary operators.
//! Parsing is precedence climbing over a hand-rolled token stream; any
//! malformed input is reported as a plain message and surfaces as a compile
//! error.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    /// Bare identifier: bound local, falling back to a scope method call.
    Ident(String),
    /// `@name` scope attribute read.
    Attr(String),
    /// Content-block invocation.
    Yield,
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
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

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
        };
        f.write_str(s)
    }
}

impl BinOp {
    fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Eq | BinOp::Ne => 3,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 4,
            BinOp::Add | BinOp::Sub => 5,
            BinOp::Mul | BinOp::Div | BinOp::Rem => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Attr(String),
    Op(BinOp),
    Bang,
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let bytes = src.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = src[i..].chars().next().expect("i is on a char boundary");
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Op(BinOp::Add));
                i += 1;
            }
            '-' => {
                tokens.push(Token::Op(BinOp::Sub));
                i += 1;
            }
            '*' => {
                tokens.push(Token::Op(BinOp::Mul));
                i += 1;
            }
            '/' => {
                tokens.push(Token::Op(BinOp::Div));
                i += 1;
            }
            '%' => {
                tokens.push(Token::Op(BinOp::Rem));
                i += 1;
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Op(BinOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Op(BinOp::Lt));
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Op(BinOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(BinOp::Gt));
                    i += 1;
                }
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Op(BinOp::Eq));
                    i += 2;
                } else {
                    return Err("unexpected '='".to_string());
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Op(BinOp::Ne));
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push(Token::Op(BinOp::And));
                    i += 2;
                } else {
                    return Err("unexpected '&'".to_string());
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push(Token::Op(BinOp::Or));
                    i += 2;
                } else {
                    return Err("unexpected '|'".to_string());
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match src[i..].chars().next() {
                        None => return Err("unterminated string literal".to_string()),
                        Some(ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = src[i + 1..]
                                .chars()
                                .next()
                                .ok_or_else(|| "unterminated string literal".to_string())?;
                            s.push(match escaped {
                                'n' => '\n',
                                'r' => '\r',
                                't' => '\t',
                                '\\' => '\\',
                                '"' => '"',
                                '\'' => '\'',
                                other => {
                                    return Err(format!("unknown escape '\\{other}'"));
                                }
                            });
                            i += 2;
                        }
                        Some(ch) => {
                            s.push(ch);
                            i += ch.len_utf8();
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '@' => {
                let start = i + 1;
                let end = ident_end(bytes, start);
                if end == start {
                    return Err("'@' must be followed by an attribute name".to_string());
                }
                tokens.push(Token::Attr(src[start..end].to_string()));
                i = end;
            }
            '0'..='9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let n: i64 = src[start..i]
                    .parse()
                    .map_err(|_| format!("invalid integer '{}'", &src[start..i]))?;
                tokens.push(Token::Int(n));
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let end = ident_end(bytes, i);
                tokens.push(Token::Ident(src[i..end].to_string()));
                i = end;
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

fn ident_end(bytes: &[u8], start: usize) -> usize {
    let mut end = start;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }
    end
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expression(&mut self, min_prec: u8) -> Result<Expr, String> {
        let mut lhs = self.primary()?;
        while let Some(&Token::Op(op)) = self.peek() {
            if op.precedence() < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.expression(op.precedence() + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            None => Err("unexpected end of expression".to_string()),
            Some(Token::Int(n)) => Ok(Expr::Int(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::Attr(name)) => Ok(Expr::Attr(name)),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "nil" => Expr::Nil,
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                "yield" => Expr::Yield,
                _ => Expr::Ident(name),
            }),
            Some(Token::Bang) => {
                let operand = self.primary()?;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)))
            }
            Some(Token::Op(BinOp::Sub)) => {
                let operand = self.primary()?;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)))
            }
            Some(Token::LParen) => {
                let inner = self.expression(1)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected ')'".to_string()),
                }
            }
            Some(other) => Err(format!("unexpected token {other:?}")),
        }
    }
}

/// Parse a complete expression fragment.
pub(crate) fn parse_expr(src: &str) -> Result<Expr, String> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression(1)?;
    if parser.pos != parser.tokens.len() {
        return Err(format!(
            "trailing tokens after expression: {:?}",
            &parser.tokens[parser.pos..]
        ));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals() {
        assert_eq!(parse_expr("42").unwrap(), Expr::Int(42));
        assert_eq!(parse_expr("nil").unwrap(), Expr::Nil);
        assert_eq!(parse_expr("true").unwrap(), Expr::Bool(true));
        assert_eq!(
            parse_expr("\"a\\nb\"").unwrap(),
            Expr::Str("a\nb".to_string())
        );
        assert_eq!(parse_expr("'hi'").unwrap(), Expr::Str("hi".to_string()));
    }

    #[test]
    fn test_identifiers_and_attrs() {
        assert_eq!(parse_expr("name").unwrap(), Expr::Ident("name".to_string()));
        assert_eq!(parse_expr("@name").unwrap(), Expr::Attr("name".to_string()));
        assert_eq!(parse_expr("yield").unwrap(), Expr::Yield);
    }

    #[test]
    fn test_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let expr = parse_expr("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinOp::Add,
                Box::new(Expr::Int(1)),
                Box::new(Expr::Binary(
                    BinOp::Mul,
                    Box::new(Expr::Int(2)),
                    Box::new(Expr::Int(3))
                ))
            )
        );
    }

    #[test]
    fn test_parenthesized() {
        let expr = parse_expr("(1 + 2) * 3").unwrap();
        assert!(matches!(expr, Expr::Binary(BinOp::Mul, _, _)));
    }

    #[test]
    fn test_unary() {
        assert_eq!(
            parse_expr("-1").unwrap(),
            Expr::Unary(UnaryOp::Neg, Box::new(Expr::Int(1)))
        );
        assert_eq!(
            parse_expr("!true").unwrap(),
            Expr::Unary(UnaryOp::Not, Box::new(Expr::Bool(true)))
        );
    }

    #[test]
    fn test_comparison_and_logic() {
        let expr = parse_expr("a < 3 && b == \"x\"").unwrap();
        assert!(matches!(expr, Expr::Binary(BinOp::And, _, _)));
    }

    #[test]
    fn test_errors() {
        assert!(parse_expr("").is_err());
        assert!(parse_expr("1 +").is_err());
        assert!(parse_expr("(1").is_err());
        assert!(parse_expr("\"open").is_err());
        assert!(parse_expr("1 2").is_err());
        assert!(parse_expr("@").is_err());
    }
}
