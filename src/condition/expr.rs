//! The check expression language.
//!
//! Stored conditions embed their predicate as a small s-expression string,
//! e.g. `(and (ends-with (param "path") ".py") (contains (param "perms") "x"))`.
//! The string is parsed exactly once, at load time, into a closed AST;
//! anything outside the operator table below is a syntax error and the
//! condition is rejected before it is stored.

use std::fmt;

use crate::error::ConditionError;
use crate::value::Value;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// A parsed check expression.
///
/// The set of forms is closed; there is deliberately no general-purpose
/// evaluator behind this type.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal scalar.
    Lit(Value),
    /// Literal vector: `(list e…)`.
    List(Vec<Expr>),
    /// Parameter lookup: `(param "name")`.
    Param(String),
    /// Conjunction: `(and e…)`.
    And(Vec<Expr>),
    /// Disjunction: `(or e…)`.
    Or(Vec<Expr>),
    /// Negation: `(not e)`.
    Not(Box<Expr>),
    /// Comparison: `(== a b)` and friends.
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    /// Membership: `(in needle haystack)`.
    In(Box<Expr>, Box<Expr>),
    /// Null check: `(is-none e)`.
    IsNone(Box<Expr>),
    /// Non-null check: `(is-not-none e)`.
    IsNotNone(Box<Expr>),
    /// String prefix test: `(starts-with s prefix)`.
    StartsWith(Box<Expr>, Box<Expr>),
    /// String suffix test: `(ends-with s suffix)`.
    EndsWith(Box<Expr>, Box<Expr>),
    /// Substring test: `(contains s sub)`.
    Contains(Box<Expr>, Box<Expr>),
    /// CIDR containment: `(cidr-contains ip cidr)`.
    CidrContains(Box<Expr>, Box<Expr>),
    /// Graph-database escape: `(db-count "query" e…)` evaluating to the
    /// row count of the parameterized query.
    DbCount(String, Vec<Expr>),
}

/// Parses a check expression source string.
///
/// # Errors
///
/// Returns [`ConditionError::Syntax`] on any malformed or unknown form.
pub fn parse(source: &str) -> Result<Expr, ConditionError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    if let Some((tok, at)) = parser.peek() {
        return Err(syntax(at, format!("trailing input after expression: {tok}")));
    }
    Ok(expr)
}

fn syntax(pos: usize, message: impl Into<String>) -> ConditionError {
    ConditionError::Syntax {
        pos,
        message: message.into(),
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Str(String),
    Num(f64),
    Sym(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Num(n) => write!(f, "{n}"),
            Self::Sym(s) => f.write_str(s),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ConditionError> {
    let mut tokens = Vec::new();
    let bytes = source.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let at = i;
        match bytes[i] {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b'(' => {
                tokens.push((Token::LParen, at));
                i += 1;
            }
            b')' => {
                tokens.push((Token::RParen, at));
                i += 1;
            }
            b'"' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => return Err(syntax(at, "unterminated string literal")),
                        Some(b'"') => {
                            i += 1;
                            break;
                        }
                        Some(b'\\') => {
                            let escaped = match bytes.get(i + 1) {
                                Some(b'"') => '"',
                                Some(b'\\') => '\\',
                                Some(b'n') => '\n',
                                Some(b't') => '\t',
                                other => {
                                    return Err(syntax(
                                        i,
                                        format!(
                                            "unsupported escape \\{}",
                                            other.map_or(String::new(), |c| {
                                                char::from(*c).to_string()
                                            })
                                        ),
                                    ));
                                }
                            };
                            text.push(escaped);
                            i += 2;
                        }
                        Some(_) => {
                            // Strings are UTF-8; advance one whole character.
                            let rest = &source[i..];
                            let ch = rest.chars().next().unwrap_or('\u{fffd}');
                            text.push(ch);
                            i += ch.len_utf8();
                        }
                    }
                }
                tokens.push((Token::Str(text), at));
            }
            c if c.is_ascii_digit() || c == b'-' || c == b'+' => {
                let start = i;
                i += 1;
                while i < bytes.len()
                    && (bytes[i].is_ascii_digit() || bytes[i] == b'.' || bytes[i] == b'e')
                {
                    i += 1;
                }
                let text = &source[start..i];
                let num: f64 = text
                    .parse()
                    .map_err(|_| syntax(start, format!("invalid number literal {text:?}")))?;
                tokens.push((Token::Num(num), at));
            }
            _ => {
                let start = i;
                while i < bytes.len()
                    && !matches!(bytes[i], b' ' | b'\t' | b'\r' | b'\n' | b'(' | b')' | b'"')
                {
                    i += 1;
                }
                tokens.push((Token::Sym(source[start..i].to_string()), at));
            }
        }
    }

    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<(&Token, usize)> {
        self.tokens.get(self.pos).map(|(t, at)| (t, *at))
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expr(&mut self) -> Result<Expr, ConditionError> {
        let Some((token, at)) = self.next() else {
            return Err(syntax(0, "empty expression"));
        };
        match token {
            Token::Str(s) => Ok(Expr::Lit(Value::Str(s))),
            Token::Num(n) => Ok(Expr::Lit(Value::Num(n))),
            Token::Sym(s) => match s.as_str() {
                "true" => Ok(Expr::Lit(Value::Bool(true))),
                "false" => Ok(Expr::Lit(Value::Bool(false))),
                "none" => Ok(Expr::Lit(Value::Null)),
                other => Err(syntax(at, format!("bare symbol {other:?} outside a form"))),
            },
            Token::RParen => Err(syntax(at, "unexpected )")),
            Token::LParen => self.form(at),
        }
    }

    /// Parses the body of a form after the opening paren.
    fn form(&mut self, at: usize) -> Result<Expr, ConditionError> {
        let Some((head, head_at)) = self.next() else {
            return Err(syntax(at, "unterminated form"));
        };
        let Token::Sym(head) = head else {
            return Err(syntax(head_at, format!("form head must be a symbol, got {head}")));
        };

        let expr = match head.as_str() {
            "and" => Expr::And(self.args_until_close(head_at, 1)?),
            "or" => Expr::Or(self.args_until_close(head_at, 1)?),
            "not" => {
                let [e] = self.fixed_args(head_at, "not")?;
                Expr::Not(Box::new(e))
            }
            op @ ("==" | "!=" | "<" | "<=" | ">" | ">=") => {
                let cmp = match op {
                    "==" => CmpOp::Eq,
                    "!=" => CmpOp::Ne,
                    "<" => CmpOp::Lt,
                    "<=" => CmpOp::Le,
                    ">" => CmpOp::Gt,
                    _ => CmpOp::Ge,
                };
                let [a, b] = self.fixed_args(head_at, op)?;
                Expr::Cmp(cmp, Box::new(a), Box::new(b))
            }
            "in" => {
                let [needle, haystack] = self.fixed_args(head_at, "in")?;
                Expr::In(Box::new(needle), Box::new(haystack))
            }
            "is-none" => {
                let [e] = self.fixed_args(head_at, "is-none")?;
                Expr::IsNone(Box::new(e))
            }
            "is-not-none" => {
                let [e] = self.fixed_args(head_at, "is-not-none")?;
                Expr::IsNotNone(Box::new(e))
            }
            "starts-with" => {
                let [s, p] = self.fixed_args(head_at, "starts-with")?;
                Expr::StartsWith(Box::new(s), Box::new(p))
            }
            "ends-with" => {
                let [s, p] = self.fixed_args(head_at, "ends-with")?;
                Expr::EndsWith(Box::new(s), Box::new(p))
            }
            "contains" => {
                let [s, p] = self.fixed_args(head_at, "contains")?;
                Expr::Contains(Box::new(s), Box::new(p))
            }
            "cidr-contains" => {
                let [ip, net] = self.fixed_args(head_at, "cidr-contains")?;
                Expr::CidrContains(Box::new(ip), Box::new(net))
            }
            "param" => {
                let name = self.string_arg(head_at, "param")?;
                self.close(head_at)?;
                Expr::Param(name)
            }
            "list" => Expr::List(self.args_until_close(head_at, 0)?),
            "db-count" => {
                let query = self.string_arg(head_at, "db-count")?;
                let bindings = self.args_until_close(head_at, 0)?;
                Expr::DbCount(query, bindings)
            }
            other => return Err(syntax(head_at, format!("unknown form ({other} …)"))),
        };
        Ok(expr)
    }

    /// Collects argument expressions up to the closing paren.
    fn args_until_close(&mut self, at: usize, min: usize) -> Result<Vec<Expr>, ConditionError> {
        let mut args = Vec::new();
        loop {
            match self.peek() {
                None => return Err(syntax(at, "unterminated form")),
                Some((Token::RParen, _)) => {
                    self.pos += 1;
                    if args.len() < min {
                        return Err(syntax(at, format!("form needs at least {min} argument(s)")));
                    }
                    return Ok(args);
                }
                Some(_) => args.push(self.expr()?),
            }
        }
    }

    /// Collects exactly N argument expressions and the closing paren.
    fn fixed_args<const N: usize>(
        &mut self,
        at: usize,
        head: &str,
    ) -> Result<[Expr; N], ConditionError> {
        let args = self.args_until_close(at, N)?;
        let got = args.len();
        args.try_into()
            .map_err(|_| syntax(at, format!("({head} …) takes {N} argument(s), got {got}")))
    }

    /// Consumes a mandatory string-literal argument.
    fn string_arg(&mut self, at: usize, head: &str) -> Result<String, ConditionError> {
        match self.next() {
            Some((Token::Str(s), _)) => Ok(s),
            Some((other, other_at)) => Err(syntax(
                other_at,
                format!("({head} …) takes a string literal first, got {other}"),
            )),
            None => Err(syntax(at, "unterminated form")),
        }
    }

    /// Consumes the closing paren of the current form.
    fn close(&mut self, at: usize) -> Result<(), ConditionError> {
        match self.next() {
            Some((Token::RParen, _)) => Ok(()),
            Some((other, other_at)) => {
                Err(syntax(other_at, format!("expected ), got {other}")))
            }
            None => Err(syntax(at, "unterminated form")),
        }
    }
}
