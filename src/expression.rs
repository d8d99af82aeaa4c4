//! Boolean conditions used by `--#if`, `--#when` and `--#for ... filter`.
//!
//! ```text
//! expr    := and ('||' and)*
//! and     := unary ('&&' unary)*
//! unary   := '!' unary | '(' expr ')' | compare
//! compare := operand [ op operand | 'is' ['not'] ('null' | 'blank') ]
//! operand := :name ('|' pipe)* | 'text' | "text" | number
//!          | null | blank | true | false | word
//! op      := = == <> != < > <= >= ~ !~
//! ```
//!
//! `blank` matches absent, null, whitespace-only and empty values. `~` is a
//! regular expression search on the left operand's text.

use crate::pipe::Pipes;
use crate::value::{as_number, display_string, is_blank, lookup, Args};
use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Match,
    NotMatch,
}

/// Evaluation settings shared by all conditions of one render.
#[derive(Debug, Clone)]
pub struct ExpressionContext {
    /// Referencing an absent argument is an error instead of `null`.
    pub strict_args: bool,
    pub pipes: Pipes,
}

impl Default for ExpressionContext {
    fn default() -> Self {
        Self {
            strict_args: true,
            pipes: Pipes::default(),
        }
    }
}

impl ExpressionContext {
    pub fn lenient() -> Self {
        Self {
            strict_args: false,
            ..Self::default()
        }
    }
}

/// A parsed condition.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Node,
}

#[derive(Debug, Clone)]
enum Node {
    Or(Vec<Node>),
    And(Vec<Node>),
    Not(Box<Node>),
    Compare {
        left: Operand,
        op: Operator,
        right: Operand,
    },
    Test(Operand),
}

#[derive(Debug, Clone)]
enum Operand {
    Arg { name: String, pipes: Vec<String> },
    Literal(Value),
    Blank,
}

enum Resolved<'a> {
    Value(Cow<'a, Value>),
    Blank,
}

impl Expression {
    /// Parses `source`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Expression`] on any syntax error.
    pub fn parse(source: &str) -> crate::Result<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
        };
        let root = parser.or()?;
        if let Some(token) = parser.peek() {
            return Err(crate::Error::expression(
                source,
                format!("unexpected {token:?}"),
            ));
        }
        Ok(Self {
            source: source.trim().to_owned(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the condition against `args`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::MissingArgument`] for an absent name in strict mode,
    /// [`crate::Error::Expression`] for an unknown pipe or a bad pattern.
    pub fn evaluate(&self, args: &Args, ctx: &ExpressionContext) -> crate::Result<bool> {
        self.eval(&self.root, args, ctx)
    }

    fn eval(&self, node: &Node, args: &Args, ctx: &ExpressionContext) -> crate::Result<bool> {
        match node {
            Node::Or(nodes) => {
                for node in nodes {
                    if self.eval(node, args, ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Node::And(nodes) => {
                for node in nodes {
                    if !self.eval(node, args, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Node::Not(node) => Ok(!self.eval(node, args, ctx)?),
            Node::Compare { left, op, right } => {
                let left = self.resolve(left, args, ctx)?;
                let right = self.resolve(right, args, ctx)?;
                self.compare(&left, *op, &right)
            }
            Node::Test(operand) => Ok(match self.resolve(operand, args, ctx)? {
                Resolved::Blank => false,
                Resolved::Value(value) => truthy(&value),
            }),
        }
    }

    fn resolve<'a>(
        &self,
        operand: &'a Operand,
        args: &'a Args,
        ctx: &ExpressionContext,
    ) -> crate::Result<Resolved<'a>> {
        match operand {
            Operand::Blank => Ok(Resolved::Blank),
            Operand::Literal(value) => Ok(Resolved::Value(Cow::Borrowed(value))),
            Operand::Arg { name, pipes } => {
                let mut value = match lookup(args, name) {
                    Some(value) => Cow::Borrowed(value),
                    None if ctx.strict_args => {
                        return Err(crate::Error::MissingArgument(name.clone()))
                    }
                    None => Cow::Owned(Value::Null),
                };
                for pipe in pipes {
                    let pipe_fn = ctx.pipes.get(pipe).ok_or_else(|| {
                        crate::Error::expression(&self.source, format!("unknown pipe '{pipe}'"))
                    })?;
                    value = Cow::Owned(pipe_fn.transform(&value));
                }
                Ok(Resolved::Value(value))
            }
        }
    }

    fn compare(&self, left: &Resolved, op: Operator, right: &Resolved) -> crate::Result<bool> {
        let (l, r) = match (left, right) {
            (Resolved::Blank, Resolved::Blank) => return Ok(matches!(op, Operator::Eq)),
            (Resolved::Blank, Resolved::Value(v)) | (Resolved::Value(v), Resolved::Blank) => {
                return Ok(match op {
                    Operator::Eq => is_blank(Some(&**v)),
                    Operator::NotEq => !is_blank(Some(&**v)),
                    _ => false,
                });
            }
            (Resolved::Value(l), Resolved::Value(r)) => (&**l, &**r),
        };
        match op {
            Operator::Eq => Ok(equals(l, r)),
            Operator::NotEq => Ok(!equals(l, r)),
            Operator::Match | Operator::NotMatch => {
                let pattern = Regex::new(&display_string(r)).map_err(|e| {
                    crate::Error::expression(&self.source, format!("bad pattern: {e}"))
                })?;
                let found = !l.is_null() && pattern.is_match(&display_string(l));
                Ok(found == (op == Operator::Match))
            }
            Operator::Lt | Operator::Gt | Operator::LtEq | Operator::GtEq => {
                let Some(ordering) = order(l, r) else {
                    return Ok(false);
                };
                Ok(match op {
                    Operator::Lt => ordering == Ordering::Less,
                    Operator::Gt => ordering == Ordering::Greater,
                    Operator::LtEq => ordering != Ordering::Greater,
                    _ => ordering != Ordering::Less,
                })
            }
        }
    }
}

fn equals(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => match (as_number(l), as_number(r)) {
            (Some(a), Some(b)) => a == b,
            _ => display_string(l) == display_string(r),
        },
    }
}

fn order(l: &Value, r: &Value) -> Option<Ordering> {
    if l.is_null() || r.is_null() {
        return None;
    }
    match (as_number(l), as_number(r)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => Some(display_string(l).cmp(&display_string(r))),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.trim().is_empty() && !s.trim().eq_ignore_ascii_case("false"),
        other => !is_blank(Some(other)),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Arg(String),
    Str(String),
    Num(Value),
    Word(String),
    Op(Operator),
    And,
    Or,
    Bang,
    Pipe,
    LParen,
    RParen,
}

fn tokenize(source: &str) -> crate::Result<Vec<Token>> {
    let err = |message: String| crate::Error::expression(source, message);
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            ':' if next.is_some_and(is_ident_start) => {
                let (name, end) = read_name(&chars, i + 1);
                tokens.push(Token::Arg(name));
                i = end;
            }
            '$' if next == Some('{') => {
                let close = chars[i..]
                    .iter()
                    .position(|c| *c == '}')
                    .ok_or_else(|| err("unterminated '${'".to_owned()))?;
                let inner: String = chars[i + 2..i + close].iter().collect();
                let name = inner.trim().trim_start_matches(['!', ':']).trim();
                if name.is_empty() {
                    return Err(err("empty '${}' reference".to_owned()));
                }
                tokens.push(Token::Arg(name.to_owned()));
                i += close + 1;
            }
            '\'' | '"' => {
                let (text, end) = read_quoted(&chars, i)
                    .ok_or_else(|| err(format!("unterminated string starting at {i}")))?;
                tokens.push(Token::Str(text));
                i = end;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Num(parse_number(&text).ok_or_else(|| err(format!("bad number '{text}'")))?));
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' | '!' | '<' | '>' | '~' => {
                let (token, width) = match (c, next) {
                    ('=', Some('=')) => (Token::Op(Operator::Eq), 2),
                    ('=', _) => (Token::Op(Operator::Eq), 1),
                    ('!', Some('=')) => (Token::Op(Operator::NotEq), 2),
                    ('!', Some('~')) => (Token::Op(Operator::NotMatch), 2),
                    ('!', _) => (Token::Bang, 1),
                    ('<', Some('>')) => (Token::Op(Operator::NotEq), 2),
                    ('<', Some('=')) => (Token::Op(Operator::LtEq), 2),
                    ('<', _) => (Token::Op(Operator::Lt), 1),
                    ('>', Some('=')) => (Token::Op(Operator::GtEq), 2),
                    ('>', _) => (Token::Op(Operator::Gt), 1),
                    _ => (Token::Op(Operator::Match), 1),
                };
                tokens.push(token);
                i += width;
            }
            c if is_ident_start(c) => {
                let (word, end) = read_name(&chars, i);
                tokens.push(Token::Word(word));
                i = end;
            }
            other => return Err(err(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn read_name(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    while end < chars.len() {
        let c = chars[end];
        let dotted = c == '.' && chars.get(end + 1).is_some_and(|n| n.is_ascii_alphanumeric() || *n == '_');
        if c.is_ascii_alphanumeric() || c == '_' || dotted {
            end += 1;
        } else {
            break;
        }
    }
    (chars[start..end].iter().collect(), end)
}

fn read_quoted(chars: &[char], start: usize) -> Option<(String, usize)> {
    let quote = chars[start];
    let mut text = String::new();
    let mut j = start + 1;
    while j < chars.len() {
        if chars[j] == quote {
            if chars.get(j + 1) == Some(&quote) {
                text.push(quote);
                j += 2;
                continue;
            }
            return Some((text, j + 1));
        }
        text.push(chars[j]);
        j += 1;
    }
    None
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(n) = text.parse::<i64>() {
        return Some(Value::from(n));
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> crate::Error {
        crate::Error::expression(self.source, message)
    }

    fn or(&mut self) -> crate::Result<Node> {
        let mut nodes = vec![self.and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            nodes.push(self.and()?);
        }
        Ok(if nodes.len() == 1 { nodes.remove(0) } else { Node::Or(nodes) })
    }

    fn and(&mut self) -> crate::Result<Node> {
        let mut nodes = vec![self.unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            nodes.push(self.unary()?);
        }
        Ok(if nodes.len() == 1 { nodes.remove(0) } else { Node::And(nodes) })
    }

    fn unary(&mut self) -> crate::Result<Node> {
        match self.peek() {
            Some(Token::Bang) => {
                self.pos += 1;
                Ok(Node::Not(Box::new(self.unary()?)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let node = self.or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(node),
                    _ => Err(self.error("missing ')'")),
                }
            }
            _ => self.compare(),
        }
    }

    fn compare(&mut self) -> crate::Result<Node> {
        let left = self.operand()?;
        match self.peek() {
            Some(Token::Op(op)) => {
                let op = *op;
                self.pos += 1;
                let right = self.operand()?;
                Ok(Node::Compare { left, op, right })
            }
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("is") => {
                self.pos += 1;
                let mut op = Operator::Eq;
                if matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case("not")) {
                    self.pos += 1;
                    op = Operator::NotEq;
                }
                let right = match self.next() {
                    Some(Token::Word(w)) if w.eq_ignore_ascii_case("null") => Operand::Literal(Value::Null),
                    Some(Token::Word(w)) if w.eq_ignore_ascii_case("blank") => Operand::Blank,
                    _ => return Err(self.error("expected 'null' or 'blank' after 'is'")),
                };
                Ok(Node::Compare { left, op, right })
            }
            _ => Ok(Node::Test(left)),
        }
    }

    fn operand(&mut self) -> crate::Result<Operand> {
        match self.next() {
            Some(Token::Arg(name)) => {
                let mut pipes = Vec::new();
                while self.peek() == Some(&Token::Pipe) {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Word(pipe)) => pipes.push(pipe),
                        _ => return Err(self.error("expected pipe name after '|'")),
                    }
                }
                Ok(Operand::Arg { name, pipes })
            }
            Some(Token::Str(text)) => Ok(Operand::Literal(Value::String(text))),
            Some(Token::Num(value)) => Ok(Operand::Literal(value)),
            Some(Token::Word(word)) => Ok(match word.to_ascii_lowercase().as_str() {
                "null" => Operand::Literal(Value::Null),
                "blank" => Operand::Blank,
                "true" => Operand::Literal(Value::Bool(true)),
                "false" => Operand::Literal(Value::Bool(false)),
                _ => Operand::Literal(Value::String(word)),
            }),
            Some(token) => Err(self.error(format!("unexpected {token:?}"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use serde_json::json;

    fn eval(source: &str, args: &Args) -> bool {
        Expression::parse(source)
            .unwrap()
            .evaluate(args, &ExpressionContext::default())
            .unwrap()
    }

    #[test]
    fn test_numeric_comparisons() {
        let args = args! { "x" => 5, "y" => "7" };
        assert!(eval(":x > 1", &args));
        assert!(eval(":x >= 5 && :x <= 5", &args));
        assert!(eval(":x < :y", &args));
        assert!(eval(":y = 7", &args));
        assert!(!eval(":x <> 5", &args));
        assert!(eval(":x == 5.0", &args));
        assert!(eval(":x > -1", &args));
    }

    #[test]
    fn test_blank_and_null() {
        let args = args! { "empty" => "  ", "none" => Value::Null, "name" => "cyx" };
        assert!(eval(":empty = blank", &args));
        assert!(eval(":none = blank", &args));
        assert!(eval(":name <> blank", &args));
        assert!(eval(":none is null", &args));
        assert!(eval(":name is not null", &args));
        assert!(eval(":empty is blank && :name is not blank", &args));
        assert!(!eval(":none > 1", &args));
    }

    #[test]
    fn test_logical_precedence_and_grouping() {
        let args = args! { "a" => 1, "b" => 2 };
        assert!(eval(":a = 1 || :b = 3 && :b = 4", &args));
        assert!(!eval("(:a = 1 || :b = 3) && :b = 4", &args));
        assert!(eval("!(:a = 2)", &args));
    }

    #[test]
    fn test_match_operators() {
        let args = args! { "name" => "jackson", "none" => Value::Null };
        assert!(eval(":name ~ 'j'", &args));
        assert!(eval(":name ~ '^jack'", &args));
        assert!(eval(":name !~ 'x'", &args));
        assert!(!eval(":none ~ 'x'", &args));
        assert!(eval(":none !~ 'x'", &args));
    }

    #[test]
    fn test_string_equality_and_quotes() {
        let args = args! { "name" => "O'Neil", "flag" => true };
        assert!(eval(":name = 'O''Neil'", &args));
        assert!(eval(":name = \"O'Neil\"", &args));
        assert!(eval(":flag = true", &args));
        assert!(eval(":flag", &args));
    }

    #[test]
    fn test_pipes_and_dotted_names() {
        let args = args! { "user" => json!({"name": "abc", "tags": [1, 2, 3]}) };
        assert!(eval(":user.name|length = 3", &args));
        assert!(eval(":user.tags|length > 2", &args));
        assert!(eval(":user.name|upper = 'ABC'", &args));
        assert!(eval("${user.name} = 'abc'", &args));
    }

    #[test]
    fn test_strict_missing_argument() {
        let expr = Expression::parse(":missing > 1").unwrap();
        let err = expr.evaluate(&Args::new(), &ExpressionContext::default()).unwrap_err();
        assert!(matches!(err, crate::Error::MissingArgument(name) if name == "missing"));
        assert!(!expr.evaluate(&Args::new(), &ExpressionContext::lenient()).unwrap());
        let blank = Expression::parse(":missing = blank").unwrap();
        assert!(blank.evaluate(&Args::new(), &ExpressionContext::lenient()).unwrap());
    }

    #[test]
    fn test_parse_errors() {
        assert!(Expression::parse(":a >").is_err());
        assert!(Expression::parse(":a = 'open").is_err());
        assert!(Expression::parse("(:a = 1").is_err());
        assert!(Expression::parse(":a is maybe").is_err());
        assert!(Expression::parse(":a = 1 :b").is_err());
        assert!(Expression::parse(":a|").is_err());
    }

    #[test]
    fn test_unknown_pipe_is_error() {
        let expr = Expression::parse(":a|nope = 1").unwrap();
        let err = expr.evaluate(&args! { "a" => 1 }, &ExpressionContext::default()).unwrap_err();
        assert!(matches!(err, crate::Error::Expression { .. }));
    }
}
