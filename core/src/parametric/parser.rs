//! Expression parser for parameter expressions.
//!
//! Supports:
//! - Numbers (integers and floats)
//! - Parameter references (@name)
//! - Arithmetic operators (+, -, *, /, ^)
//! - Parentheses for grouping
//! - Single-argument functions (sin, cos, tan, asin, acos, atan, sqrt,
//!   abs, ln, exp, floor, ceil)
//! - Constants (PI, E, TAU), folded at parse time

use crate::error::CoreError;
use std::collections::BTreeSet;

/// Parse error with location info.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "parse error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for CoreError {
    fn from(e: ParseError) -> Self {
        CoreError::Expression(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sqrt,
    Abs,
    Ln,
    Exp,
    Floor,
    Ceil,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "asin" => Self::Asin,
            "acos" => Self::Acos,
            "atan" => Self::Atan,
            "sqrt" => Self::Sqrt,
            "abs" => Self::Abs,
            "ln" => Self::Ln,
            "exp" => Self::Exp,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            _ => return None,
        })
    }

    pub fn apply(self, x: f64) -> Result<f64, CoreError> {
        let out_of_domain = |what: &str| CoreError::Expression(format!("{} of {}", what, x));
        match self {
            Self::Sin => Ok(x.sin()),
            Self::Cos => Ok(x.cos()),
            Self::Tan => Ok(x.tan()),
            Self::Asin => {
                if (-1.0..=1.0).contains(&x) {
                    Ok(x.asin())
                } else {
                    Err(out_of_domain("asin"))
                }
            }
            Self::Acos => {
                if (-1.0..=1.0).contains(&x) {
                    Ok(x.acos())
                } else {
                    Err(out_of_domain("acos"))
                }
            }
            Self::Atan => Ok(x.atan()),
            Self::Sqrt => {
                if x >= 0.0 {
                    Ok(x.sqrt())
                } else {
                    Err(out_of_domain("sqrt"))
                }
            }
            Self::Abs => Ok(x.abs()),
            Self::Ln => {
                if x > 0.0 {
                    Ok(x.ln())
                } else {
                    Err(out_of_domain("ln"))
                }
            }
            Self::Exp => Ok(x.exp()),
            Self::Floor => Ok(x.floor()),
            Self::Ceil => Ok(x.ceil()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Expression AST node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// Parameter reference (name without the leading @).
    ParamRef(String),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        function: Function,
        arg: Box<Expr>,
    },
}

impl Expr {
    /// Names of every parameter this expression references.
    pub fn references(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::ParamRef(name) => {
                out.insert(name.clone());
            }
            Expr::Neg(inner) => inner.collect_references(out),
            Expr::Binary { left, right, .. } => {
                left.collect_references(out);
                right.collect_references(out);
            }
            Expr::Call { arg, .. } => arg.collect_references(out),
        }
    }

    /// Evaluate against a parameter resolver. The resolver returns the
    /// current value (base units) of a parameter, or `None` if unknown.
    pub fn evaluate(&self, resolve: &dyn Fn(&str) -> Option<f64>) -> Result<f64, CoreError> {
        match self {
            Expr::Number(n) => Ok(*n),
            Expr::ParamRef(name) => {
                resolve(name).ok_or_else(|| CoreError::UnknownParameter(name.clone()))
            }
            Expr::Neg(inner) => Ok(-inner.evaluate(resolve)?),
            Expr::Binary { op, left, right } => {
                let l = left.evaluate(resolve)?;
                let r = right.evaluate(resolve)?;
                match op {
                    BinOp::Add => Ok(l + r),
                    BinOp::Sub => Ok(l - r),
                    BinOp::Mul => Ok(l * r),
                    BinOp::Div => {
                        if r.abs() < 1e-15 {
                            Err(CoreError::Expression("division by zero".to_string()))
                        } else {
                            Ok(l / r)
                        }
                    }
                    BinOp::Pow => Ok(l.powf(r)),
                }
            }
            Expr::Call { function, arg } => function.apply(arg.evaluate(resolve)?),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Ref(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '+' => {
                tokens.push((Token::Plus, start));
                i += 1;
            }
            '-' => {
                tokens.push((Token::Minus, start));
                i += 1;
            }
            '*' => {
                tokens.push((Token::Star, start));
                i += 1;
            }
            '/' => {
                tokens.push((Token::Slash, start));
                i += 1;
            }
            '^' => {
                tokens.push((Token::Caret, start));
                i += 1;
            }
            '(' => {
                tokens.push((Token::LParen, start));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, start));
                i += 1;
            }
            '@' => {
                i += 1;
                let name_start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                if i == name_start {
                    return Err(ParseError {
                        message: "expected parameter name after '@'".to_string(),
                        position: start,
                    });
                }
                let name: String = chars[name_start..i].iter().collect();
                tokens.push((Token::Ref(name), start));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut seen_dot = false;
                while i < chars.len() && (chars[i].is_ascii_digit() || (chars[i] == '.' && !seen_dot))
                {
                    if chars[i] == '.' {
                        seen_dot = true;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text.parse::<f64>().map_err(|_| ParseError {
                    message: format!("invalid number '{}'", text),
                    position: start,
                })?;
                tokens.push((Token::Number(value), start));
            }
            c if c.is_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                tokens.push((Token::Ident(name), start));
            }
            other => {
                return Err(ParseError {
                    message: format!("unexpected character '{}'", other),
                    position: start,
                });
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    input_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, p)| *p)
            .unwrap_or(self.input_len)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.position(),
        }
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    // factor := unary ('^' factor)?   (right-associative)
    fn factor(&mut self) -> Result<Expr, ParseError> {
        let base = self.unary()?;
        if matches!(self.peek(), Some(Token::Caret)) {
            self.advance();
            let exponent = self.factor()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    // unary := '-' unary | primary
    fn unary(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.advance();
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ref(name)) => Ok(Expr::ParamRef(name)),
            Some(Token::Ident(name)) => {
                // constant or function call
                match name.as_str() {
                    "PI" => return Ok(Expr::Number(std::f64::consts::PI)),
                    "E" => return Ok(Expr::Number(std::f64::consts::E)),
                    "TAU" => return Ok(Expr::Number(std::f64::consts::TAU)),
                    _ => {}
                }
                let function = Function::from_name(&name)
                    .ok_or_else(|| self.error(format!("unknown function or constant '{}'", name)))?;
                match self.advance() {
                    Some(Token::LParen) => {}
                    _ => return Err(self.error(format!("expected '(' after '{}'", name))),
                }
                let arg = self.expr()?;
                match self.advance() {
                    Some(Token::RParen) => {}
                    _ => return Err(self.error("expected ')'")),
                }
                Ok(Expr::Call {
                    function,
                    arg: Box::new(arg),
                })
            }
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            _ => Err(self.error("expected number, reference, or '('")),
        }
    }
}

/// Parse an expression string into an AST.
pub fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    let tokens = lex(input)?;
    if tokens.is_empty() {
        return Err(ParseError {
            message: "empty expression".to_string(),
            position: 0,
        });
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        input_len: input.len(),
    };
    let expr = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("trailing input"));
    }
    Ok(expr)
}
