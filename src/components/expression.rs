//! Arithmetic over band arrays.
//!
//! Expressions are parsed once into a small tree and evaluated element-wise.
//! Supported are numbers, named operands, parentheses, unary minus,
//! `+ - * /`, right associative power (`^` or `**`) and the functions
//! `abs sqrt exp log log10 sin cos tan` and `min max pow`. A `np.` or `numpy.`
//! prefix on function names is accepted and ignored.

use std::fmt::Display;

use ndarray::{Array2, Zip};

use crate::errors::{Result, RustervrtError};

/// Operand name the band's own array is bound to.
pub const BAND_DATA: &str = "bandData";

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Pow,
    LParen,
    RParen,
    Comma,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut idx = 0;
    while idx < chars.len() {
        let c = chars[idx];
        match c {
            c if c.is_whitespace() => idx += 1,
            '0'..='9' | '.' => {
                let start = idx;
                while idx < chars.len() && (chars[idx].is_ascii_digit() || chars[idx] == '.') {
                    idx += 1;
                }
                // exponent part, e.g. 1e-3
                if idx < chars.len() && (chars[idx] == 'e' || chars[idx] == 'E') {
                    let mut end = idx + 1;
                    if end < chars.len() && (chars[end] == '+' || chars[end] == '-') {
                        end += 1;
                    }
                    if end < chars.len() && chars[end].is_ascii_digit() {
                        idx = end;
                        while idx < chars.len() && chars[idx].is_ascii_digit() {
                            idx += 1;
                        }
                    }
                }
                let literal: String = chars[start..idx].iter().collect();
                let number = literal.parse::<f64>().map_err(|_| {
                    RustervrtError::ExpressionError(format!("bad number {literal:?}"))
                })?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = idx;
                while idx < chars.len()
                    && (chars[idx].is_alphanumeric() || chars[idx] == '_' || chars[idx] == '.')
                {
                    idx += 1;
                }
                tokens.push(Token::Ident(chars[start..idx].iter().collect()));
            }
            '*' if chars.get(idx + 1) == Some(&'*') => {
                tokens.push(Token::Pow);
                idx += 2;
            }
            _ => {
                tokens.push(match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '^' => Token::Pow,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    other => {
                        return Err(RustervrtError::ExpressionError(format!(
                            "unexpected character {other:?}"
                        )))
                    }
                });
                idx += 1;
            }
        }
    }
    Ok(tokens)
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Min,
    Max,
}

impl BinaryOp {
    fn apply(&self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
            BinaryOp::Pow => lhs.powf(rhs),
            BinaryOp::Min => lhs.min(rhs),
            BinaryOp::Max => lhs.max(rhs),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum UnaryOp {
    Neg,
    Abs,
    Sqrt,
    Exp,
    Ln,
    Log10,
    Sin,
    Cos,
    Tan,
}

impl UnaryOp {
    fn apply(&self, value: f64) -> f64 {
        match self {
            UnaryOp::Neg => -value,
            UnaryOp::Abs => value.abs(),
            UnaryOp::Sqrt => value.sqrt(),
            UnaryOp::Exp => value.exp(),
            UnaryOp::Ln => value.ln(),
            UnaryOp::Log10 => value.log10(),
            UnaryOp::Sin => value.sin(),
            UnaryOp::Cos => value.cos(),
            UnaryOp::Tan => value.tan(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Node {
    Number(f64),
    Operand(String),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(RustervrtError::ExpressionError(format!(
                "expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn expression(&mut self) -> Result<Node> {
        let mut node = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(node),
            };
            self.next();
            node = Node::Binary(op, Box::new(node), Box::new(self.term()?));
        }
    }

    fn term(&mut self) -> Result<Node> {
        let mut node = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(node),
            };
            self.next();
            node = Node::Binary(op, Box::new(node), Box::new(self.unary()?));
        }
    }

    fn unary(&mut self) -> Result<Node> {
        match self.peek() {
            Some(Token::Minus) => {
                self.next();
                Ok(Node::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            Some(Token::Plus) => {
                self.next();
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Node> {
        let base = self.atom()?;
        if let Some(Token::Pow) = self.peek() {
            self.next();
            let exponent = self.unary()?;
            return Ok(Node::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Node> {
        match self.next() {
            Some(Token::Number(number)) => Ok(Node::Number(number)),
            Some(Token::LParen) => {
                let node = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(node)
            }
            Some(Token::Ident(name)) if self.peek() == Some(&Token::LParen) => {
                self.next();
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    args.push(self.expression()?);
                    while self.peek() == Some(&Token::Comma) {
                        self.next();
                        args.push(self.expression()?);
                    }
                }
                self.expect(Token::RParen)?;
                call(&name, args)
            }
            Some(Token::Ident(name)) => Ok(Node::Operand(name)),
            other => Err(RustervrtError::ExpressionError(format!(
                "unexpected token {other:?}"
            ))),
        }
    }
}

fn call(name: &str, mut args: Vec<Node>) -> Result<Node> {
    let function = name
        .strip_prefix("numpy.")
        .or_else(|| name.strip_prefix("np."))
        .unwrap_or(name);
    let unary = match function {
        "abs" => Some(UnaryOp::Abs),
        "sqrt" => Some(UnaryOp::Sqrt),
        "exp" => Some(UnaryOp::Exp),
        "log" => Some(UnaryOp::Ln),
        "log10" => Some(UnaryOp::Log10),
        "sin" => Some(UnaryOp::Sin),
        "cos" => Some(UnaryOp::Cos),
        "tan" => Some(UnaryOp::Tan),
        _ => None,
    };
    let binary = match function {
        "min" | "minimum" => Some(BinaryOp::Min),
        "max" | "maximum" => Some(BinaryOp::Max),
        "pow" | "power" => Some(BinaryOp::Pow),
        _ => None,
    };
    let arity_error = |expected: usize, found: usize| {
        RustervrtError::ExpressionError(format!(
            "{function} takes {expected} argument(s), {found} given"
        ))
    };
    match (unary, binary) {
        (Some(op), _) => {
            if args.len() != 1 {
                return Err(arity_error(1, args.len()));
            }
            Ok(Node::Unary(op, Box::new(args.remove(0))))
        }
        (_, Some(op)) => {
            if args.len() != 2 {
                return Err(arity_error(2, args.len()));
            }
            let rhs = args.remove(1);
            let lhs = args.remove(0);
            Ok(Node::Binary(op, Box::new(lhs), Box::new(rhs)))
        }
        _ => Err(RustervrtError::ExpressionError(format!(
            "unknown function {name}"
        ))),
    }
}

enum Value {
    Scalar(f64),
    Array(Array2<f64>),
}

impl Node {
    fn evaluate(&self, operands: &[(&str, &Array2<f64>)]) -> Result<Value> {
        match self {
            Node::Number(number) => Ok(Value::Scalar(*number)),
            Node::Operand(name) => operands
                .iter()
                .find(|(operand, _)| *operand == name.as_str())
                .map(|(_, array)| Value::Array((*array).clone()))
                .ok_or_else(|| {
                    RustervrtError::ExpressionError(format!("unknown operand {name}"))
                }),
            Node::Unary(op, node) => Ok(match node.evaluate(operands)? {
                Value::Scalar(value) => Value::Scalar(op.apply(value)),
                Value::Array(mut array) => {
                    array.mapv_inplace(|value| op.apply(value));
                    Value::Array(array)
                }
            }),
            Node::Binary(op, lhs, rhs) => {
                match (lhs.evaluate(operands)?, rhs.evaluate(operands)?) {
                    (Value::Scalar(lhs), Value::Scalar(rhs)) => Ok(Value::Scalar(op.apply(lhs, rhs))),
                    (Value::Array(mut lhs), Value::Scalar(rhs)) => {
                        lhs.mapv_inplace(|value| op.apply(value, rhs));
                        Ok(Value::Array(lhs))
                    }
                    (Value::Scalar(lhs), Value::Array(mut rhs)) => {
                        rhs.mapv_inplace(|value| op.apply(lhs, value));
                        Ok(Value::Array(rhs))
                    }
                    (Value::Array(lhs), Value::Array(rhs)) => {
                        if lhs.dim() != rhs.dim() {
                            return Err(RustervrtError::ExpressionError(format!(
                                "operand shapes differ: {:?} and {:?}",
                                lhs.dim(),
                                rhs.dim()
                            )));
                        }
                        Ok(Value::Array(
                            Zip::from(&lhs)
                                .and(&rhs)
                                .map_collect(|lhs, rhs| op.apply(*lhs, *rhs)),
                        ))
                    }
                }
            }
        }
    }
}

/// Parsed arithmetic expression.
#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self> {
        let mut parser = Parser {
            tokens: tokenize(source)?,
            position: 0,
        };
        let root = parser.expression()?;
        if let Some(token) = parser.peek() {
            return Err(RustervrtError::ExpressionError(format!(
                "trailing input at {token:?}"
            )));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates against named arrays. The result has the shape of the
    /// first operand, constants are broadcast.
    pub fn evaluate(&self, operands: &[(&str, &Array2<f64>)]) -> Result<Array2<f64>> {
        match self.root.evaluate(operands)? {
            Value::Array(array) => Ok(array),
            Value::Scalar(value) => operands
                .first()
                .map(|(_, array)| Array2::from_elem(array.dim(), value))
                .ok_or_else(|| {
                    RustervrtError::ExpressionError("no operand to take a shape from".into())
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rstest::rstest;

    fn eval(source: &str, data: &Array2<f64>) -> Array2<f64> {
        Expression::parse(source)
            .unwrap()
            .evaluate(&[(BAND_DATA, data)])
            .unwrap()
    }

    #[rstest]
    #[case("1 + 2 * 3", 7.)]
    #[case("(1 + 2) * 3", 9.)]
    #[case("2 ^ 3 ^ 2", 512.)]
    #[case("2 ** 3", 8.)]
    #[case("-2 ^ 2", -4.)]
    #[case("10 / 4 - 1", 1.5)]
    #[case("max(1, 3) - min(1, 3)", 2.)]
    #[case("np.log10(1000)", 3.)]
    #[case("1e2 + 2.5E-1", 100.25)]
    fn constant_expressions(#[case] source: &str, #[case] expected: f64) {
        let data = Array2::zeros((1, 1));
        assert_eq!(eval(source, &data)[[0, 0]], expected);
    }

    #[test]
    fn band_data_is_element_wise() {
        let data = array![[1., 4.], [9., 16.]];
        assert_eq!(eval("sqrt(bandData) * 2 + 1", &data), array![[3., 5.], [7., 9.]]);
        assert_eq!(eval("pow(bandData, 0.5)", &data), array![[1., 2.], [3., 4.]]);
        assert_eq!(eval("bandData / bandData", &data), Array2::<f64>::ones((2, 2)));
    }

    #[rstest]
    #[case("bandData +")]
    #[case("(bandData")]
    #[case("import os")]
    #[case("bandData; 1")]
    #[case("exec(bandData)")]
    #[case("sqrt(1, 2)")]
    fn rejects_what_is_not_arithmetic(#[case] source: &str) {
        let data = Array2::zeros((1, 1));
        let outcome =
            Expression::parse(source).and_then(|expression| expression.evaluate(&[(BAND_DATA, &data)]));
        assert!(matches!(outcome, Err(RustervrtError::ExpressionError(_))));
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let expression = Expression::parse("a + b").unwrap();
        let a = Array2::zeros((2, 2));
        let b = Array2::zeros((3, 3));
        assert!(expression.evaluate(&[("a", &a), ("b", &b)]).is_err());
    }
}
