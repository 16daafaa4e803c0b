//! Snippet reader: infix source text to the canonical operator-array tree.
//!
//! The output is the same JSON shape [`compile_expr`](crate::compile_expr)
//! consumes, e.g. `feat.properties.count * 2` reads as
//! `["*", ["var", "feat", "properties", "count"], 2]`.
//!
//! Tree shapes produced here:
//!
//! | source | tree |
//! |---|---|
//! | `a.b["c"]` | `["var", "a", "b", "c"]` |
//! | `expr.name`, `expr[k]` | `["get", expr, "name"]`, `["get", expr, k]` |
//! | `a.b(x)` | `["call", ["a", "b"], x]` |
//! | `expr.m(x)` | `["method", expr, "m", x]` |
//! | `[x, y]` | `["list", x, y]` |
//! | `c ? a : b` | `["if", c, a, b]` |
//! | `-x`, `!x` | `["neg", x]`, `["!", x]` |

use serde_json::{Number, Value, json};
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

/// Deepest operator nesting a snippet may have, counted in tree levels
/// (`["!", ["!", 1]]` is two levels deep).
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReaderError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unbalanced parenthesis or bracket")]
    UnbalancedParenthesis,
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("unexpected end of snippet")]
    UnexpectedEnd,
    #[error("expression is not callable")]
    NotCallable,
    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),
}

/// Read one snippet into its operator tree.
pub fn read(input: &str) -> Result<Value, ReaderError> {
    let mut parser = Parser {
        tokens: Tokenizer::new(input),
        nesting: 0,
    };
    let expr = parser.parse_ternary()?;
    match parser.tokens.next_token()? {
        None => Ok(expr.tree),
        Some(Token::RParen) | Some(Token::RBracket) => Err(ReaderError::UnbalancedParenthesis),
        Some(t) => Err(ReaderError::UnexpectedToken(t.to_string())),
    }
}

/// Whether `tree` has more than `limit` levels of arrays and objects.
///
/// Walks with an explicit stack so arbitrarily deep input is safe to check.
pub fn exceeds_depth(tree: &Value, limit: usize) -> bool {
    let mut pending = vec![(tree, 1usize)];
    while let Some((value, level)) = pending.pop() {
        let children: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            Value::Object(map) => map.values().collect(),
            _ => continue,
        };
        if level > limit {
            return true;
        }
        pending.extend(children.into_iter().map(|child| (child, level + 1)));
    }
    false
}

// A subtree and its depth. Scalars are depth 0.
struct Node {
    tree: Value,
    depth: usize,
}

impl Node {
    fn scalar(tree: Value) -> Self {
        Self { tree, depth: 0 }
    }

    // An array of scalars, such as a call path.
    fn flat(tree: Value) -> Self {
        Self { tree, depth: 1 }
    }
}

fn operator(name: &str, operands: Vec<Node>) -> Result<Node, ReaderError> {
    let depth = 1 + operands.iter().map(|n| n.depth).max().unwrap_or(0);
    if depth > MAX_DEPTH {
        return Err(ReaderError::TooDeep(MAX_DEPTH));
    }
    let mut tree = Vec::with_capacity(operands.len() + 1);
    tree.push(Value::String(name.to_string()));
    tree.extend(operands.into_iter().map(|n| n.tree));
    Ok(Node {
        tree: Value::Array(tree),
        depth,
    })
}

struct Parser<'a> {
    tokens: Tokenizer<'a>,
    // recursion depth, bounded separately from tree depth since parentheses
    // recurse without adding a level
    nesting: usize,
}

impl Parser<'_> {
    fn enter(&mut self) -> Result<(), ReaderError> {
        if self.nesting >= MAX_DEPTH {
            return Err(ReaderError::TooDeep(MAX_DEPTH));
        }
        self.nesting += 1;
        Ok(())
    }

    fn parse_ternary(&mut self) -> Result<Node, ReaderError> {
        self.enter()?;
        let parsed = self.parse_conditional();
        self.nesting -= 1;
        parsed
    }

    fn parse_conditional(&mut self) -> Result<Node, ReaderError> {
        let cond = self.parse_binary(1)?;
        if self.tokens.peek_token()? != Some(Token::Op("?")) {
            return Ok(cond);
        }
        self.tokens.next_token()?;
        let then_branch = self.parse_ternary()?;
        self.expect(Token::Op(":"))?;
        let else_branch = self.parse_ternary()?;
        operator("if", vec![cond, then_branch, else_branch])
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Node, ReaderError> {
        let mut left = self.parse_unary()?;
        loop {
            let Some(Token::Op(op)) = self.tokens.peek_token()? else {
                break;
            };
            let Some(prec) = binary_precedence(op) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.tokens.next_token()?;
            let right = self.parse_binary(prec + 1)?;
            left = operator(op, vec![left, right])?;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Node, ReaderError> {
        let name = match self.tokens.peek_token()? {
            Some(Token::Op("!")) => "!",
            Some(Token::Op("-")) => "neg",
            Some(Token::Op("+")) => "call",
            _ => return self.parse_postfix(),
        };
        self.tokens.next_token()?;
        self.enter()?;
        let operand = self.parse_unary();
        self.nesting -= 1;
        let operand = operand?;
        if name == "call" {
            operator(name, vec![Node::flat(json!(["Number"])), operand])
        } else {
            operator(name, vec![operand])
        }
    }

    fn parse_postfix(&mut self) -> Result<Node, ReaderError> {
        let mut base = self.parse_primary()?;
        loop {
            match self.tokens.peek_token()? {
                Some(Token::Op(".")) => {
                    self.tokens.next_token()?;
                    let name = match self.tokens.next_token()? {
                        Some(Token::Ident(name)) => name,
                        Some(t) => return Err(ReaderError::UnexpectedToken(t.to_string())),
                        None => return Err(ReaderError::UnexpectedEnd),
                    };
                    base = member(base, Node::scalar(Value::String(name)))?;
                }
                Some(Token::LBracket) => {
                    self.tokens.next_token()?;
                    let key = self.parse_ternary()?;
                    self.expect(Token::RBracket)?;
                    base = member(base, key)?;
                }
                Some(Token::LParen) => {
                    self.tokens.next_token()?;
                    let args = self.parse_list(Token::RParen)?;
                    base = call(base, args)?;
                }
                _ => return Ok(base),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Node, ReaderError> {
        let Some(token) = self.tokens.next_token()? else {
            return Err(ReaderError::UnexpectedEnd);
        };
        match token {
            Token::Number(n) => Ok(Node::scalar(Value::Number(n))),
            Token::Str(s) => Ok(Node::scalar(Value::String(s))),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Node::scalar(json!(true)),
                "false" => Node::scalar(json!(false)),
                "null" => Node::scalar(Value::Null),
                "undefined" => Node::flat(json!(["undefined"])),
                _ => Node::flat(json!(["var", name])),
            }),
            Token::LParen => {
                let inner = self.parse_ternary()?;
                match self.tokens.next_token()? {
                    Some(Token::RParen) => Ok(inner),
                    Some(t) => Err(ReaderError::UnexpectedToken(t.to_string())),
                    None => Err(ReaderError::UnbalancedParenthesis),
                }
            }
            Token::LBracket => {
                let items = self.parse_list(Token::RBracket)?;
                operator("list", items)
            }
            Token::RParen | Token::RBracket => Err(ReaderError::UnbalancedParenthesis),
            Token::Op(op) => Err(ReaderError::UnexpectedToken(op.to_string())),
        }
    }

    /// Comma separated expressions up to and including `close`.
    fn parse_list(&mut self, close: Token) -> Result<Vec<Node>, ReaderError> {
        let mut items = Vec::new();
        if self.tokens.peek_token()? == Some(close.clone()) {
            self.tokens.next_token()?;
            return Ok(items);
        }
        loop {
            items.push(self.parse_ternary()?);
            match self.tokens.next_token()? {
                Some(Token::Op(",")) => {}
                Some(t) if t == close => return Ok(items),
                Some(t) => return Err(ReaderError::UnexpectedToken(t.to_string())),
                None => return Err(ReaderError::UnbalancedParenthesis),
            }
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ReaderError> {
        match self.tokens.next_token()? {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(ReaderError::UnexpectedToken(t.to_string())),
            None => Err(ReaderError::UnexpectedEnd),
        }
    }
}

fn binary_precedence(op: &str) -> Option<u8> {
    match op {
        "??" | "||" => Some(1),
        "&&" => Some(2),
        "==" | "!=" | "===" | "!==" => Some(3),
        "<" | "<=" | ">" | ">=" => Some(4),
        "+" | "-" => Some(5),
        "*" | "/" | "%" => Some(6),
        _ => None,
    }
}

/// Static member chains stay one `var` path; anything dynamic becomes `get`.
fn member(base: Node, key: Node) -> Result<Node, ReaderError> {
    let static_key = match &key.tree {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.is_u64() => Some(n.to_string()),
        _ => None,
    };
    match (base.tree, static_key) {
        (Value::Array(mut path), Some(segment))
            if path.first().and_then(Value::as_str) == Some("var") =>
        {
            path.push(Value::String(segment));
            Ok(Node::flat(Value::Array(path)))
        }
        (tree, _) => operator(
            "get",
            vec![
                Node {
                    tree,
                    depth: base.depth,
                },
                key,
            ],
        ),
    }
}

fn call(callee: Node, args: Vec<Node>) -> Result<Node, ReaderError> {
    let Value::Array(mut parts) = callee.tree else {
        return Err(ReaderError::NotCallable);
    };
    match parts.first().and_then(Value::as_str) {
        Some("var") => {
            let path = Node::flat(Value::Array(parts.split_off(1)));
            let mut operands = vec![path];
            operands.extend(args);
            operator("call", operands)
        }
        Some("get") if parts.len() == 3 && parts[2].is_string() => {
            let name = parts.pop().unwrap_or_default();
            let receiver = Node {
                tree: parts.pop().unwrap_or_default(),
                depth: callee.depth - 1,
            };
            let mut operands = vec![receiver, Node::scalar(name)];
            operands.extend(args);
            operator("method", operands)
        }
        _ => Err(ReaderError::NotCallable),
    }
}

#[derive(Debug, PartialEq, Clone)]
enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Number(Number),
    Str(String),
    Ident(String),
    Op(&'static str),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::LBracket => f.write_str("["),
            Token::RBracket => f.write_str("]"),
            Token::Number(n) => write!(f, "{n}"),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::Ident(s) => f.write_str(s),
            Token::Op(op) => f.write_str(op),
        }
    }
}

const OPERATORS: [&str; 21] = [
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "??", "<", ">", "+", "-", "*", "/", "%",
    "!", "?", ":", ",", ".",
];

struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    peeked: Option<Token>,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            peeked: None,
        }
    }

    fn peek_token(&mut self) -> Result<Option<Token>, ReaderError> {
        if self.peeked.is_none() {
            self.peeked = self.next_token_inner()?;
        }
        Ok(self.peeked.clone())
    }

    fn next_token(&mut self) -> Result<Option<Token>, ReaderError> {
        if let Some(t) = self.peeked.take() {
            return Ok(Some(t));
        }
        self.next_token_inner()
    }

    fn next_token_inner(&mut self) -> Result<Option<Token>, ReaderError> {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }

        let Some(c) = self.chars.next() else {
            return Ok(None);
        };

        match c {
            '(' => Ok(Some(Token::LParen)),
            ')' => Ok(Some(Token::RParen)),
            '[' => Ok(Some(Token::LBracket)),
            ']' => Ok(Some(Token::RBracket)),
            '\'' | '"' => self.read_string(c).map(Some),
            _ if c.is_ascii_digit()
                || (c == '.' && self.chars.peek().is_some_and(|nc| nc.is_ascii_digit())) =>
            {
                self.read_number(c).map(Some)
            }
            _ if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut s = c.to_string();
                while let Some(&nc) = self.chars.peek() {
                    if nc.is_alphanumeric() || nc == '_' || nc == '$' {
                        s.push(nc);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                Ok(Some(Token::Ident(s)))
            }
            _ => self.read_operator(c).map(Some),
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Token, ReaderError> {
        let mut s = String::new();
        while let Some(nc) = self.chars.next() {
            match nc {
                '\\' => match self.chars.next() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some(escaped) => s.push(escaped),
                    None => return Err(ReaderError::UnterminatedString),
                },
                _ if nc == quote => return Ok(Token::Str(s)),
                _ => s.push(nc),
            }
        }
        Err(ReaderError::UnterminatedString)
    }

    fn read_number(&mut self, first: char) -> Result<Token, ReaderError> {
        let mut s = first.to_string();
        let mut is_float = first == '.';
        while let Some(&nc) = self.chars.peek() {
            if nc.is_ascii_digit() {
                s.push(nc);
            } else if nc == '.' && !is_float {
                is_float = true;
                s.push(nc);
            } else if nc == 'e' || nc == 'E' {
                is_float = true;
                s.push(nc);
                self.chars.next();
                if let Some(&sign) = self.chars.peek() {
                    if sign == '+' || sign == '-' {
                        s.push(sign);
                        self.chars.next();
                    }
                }
                continue;
            } else {
                break;
            }
            self.chars.next();
        }
        if !is_float {
            if let Ok(n) = s.parse::<i64>() {
                return Ok(Token::Number(Number::from(n)));
            }
        }
        s.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Token::Number)
            .ok_or(ReaderError::InvalidNumber(s))
    }

    fn read_operator(&mut self, first: char) -> Result<Token, ReaderError> {
        let mut candidate = first.to_string();
        let mut rest = self.chars.clone();
        // longest match first: `===` before `==` before `=`
        for _ in 0..2 {
            match rest.next() {
                Some(nc) => candidate.push(nc),
                None => break,
            }
        }
        while !candidate.is_empty() {
            if let Some(op) = OPERATORS.iter().find(|op| **op == candidate) {
                for _ in 1..candidate.chars().count() {
                    self.chars.next();
                }
                return Ok(Token::Op(op));
            }
            candidate.pop();
        }
        Err(ReaderError::UnexpectedChar(first))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_read() {
        let val = read("1+1").unwrap();
        assert_eq!(val, json!(["+", 1, 1]));
    }

    #[test]
    fn test_member_chain_folds_into_var_path() {
        let val = read("feat.properties.count*2").unwrap();
        assert_eq!(val, json!(["*", ["var", "feat", "properties", "count"], 2]));
    }

    #[test]
    fn test_computed_member_with_literal_key() {
        let val = read("feat.properties['name:en']").unwrap();
        assert_eq!(val, json!(["var", "feat", "properties", "name:en"]));
    }

    #[test]
    fn test_precedence_and_ternary() {
        let val = read("a + b * 2 > 3 ? 'big' : 'small'").unwrap();
        assert_eq!(
            val,
            json!([
                "if",
                [">", ["+", ["var", "a"], ["*", ["var", "b"], 2]], 3],
                "big",
                "small"
            ])
        );
    }

    #[test]
    fn test_calls_and_methods() {
        let val = read("Math.round(feat.get('x')).toFixed(1)").unwrap();
        assert_eq!(
            val,
            json!([
                "method",
                ["call", ["Math", "round"], ["call", ["feat", "get"], "x"]],
                "toFixed",
                1
            ])
        );
    }

    #[test]
    fn test_strict_equality_is_one_token() {
        let val = read("a === 'x' && b !== null").unwrap();
        assert_eq!(
            val,
            json!(["&&", ["===", ["var", "a"], "x"], ["!==", ["var", "b"], null]])
        );
    }

    #[test]
    fn test_errors() {
        assert_eq!(read("(1 + 2"), Err(ReaderError::UnbalancedParenthesis));
        assert_eq!(read("'abc"), Err(ReaderError::UnterminatedString));
        assert_eq!(read(""), Err(ReaderError::UnexpectedEnd));
        assert_eq!(read("1 # 2"), Err(ReaderError::UnexpectedChar('#')));
        assert_eq!(read("(1)(2)"), Err(ReaderError::NotCallable));
    }

    #[test]
    fn test_nesting_is_bounded() {
        let parens = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
        assert_eq!(read(&parens), Err(ReaderError::TooDeep(MAX_DEPTH)));
        let negations = format!("{}1", "!".repeat(500_000));
        assert_eq!(read(&negations), Err(ReaderError::TooDeep(MAX_DEPTH)));
        let chain = vec!["1"; 10_000].join(" - ");
        assert_eq!(read(&chain), Err(ReaderError::TooDeep(MAX_DEPTH)));
        let methods = format!("x{}", ".trim()".repeat(10_000));
        assert_eq!(read(&methods), Err(ReaderError::TooDeep(MAX_DEPTH)));
    }

    #[test]
    fn test_reasonable_nesting_reads() {
        let shallow = format!("{}1{}", "(".repeat(30), ")".repeat(30));
        assert_eq!(read(&shallow), Ok(json!(1)));
        let tree = read("!!!a").unwrap();
        assert_eq!(tree, json!(["!", ["!", ["!", ["var", "a"]]]]));
        assert!(!exceeds_depth(&tree, 4));
        assert!(exceeds_depth(&tree, 3));
    }
}
