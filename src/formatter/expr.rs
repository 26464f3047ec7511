//! Expression language for filters, conditional formats and `\fE`/`\fF` templates
//!
//! Supported: literals (`1`, `2.5`, `'text'`, `True`, `False`, `None`), kwdict
//! names, attribute/index/slice access, `+ - * / // % **`, chained comparisons,
//! `in`/`not in`/`is`/`is not`, `and`/`or`/`not`, `a if cond else b`, list and
//! tuple literals, the builtins `len str int float abs min max bool` and the
//! string/map methods `startswith endswith lower upper strip get`.

use super::field::SliceSpec;
use super::value::Val;
use crate::error::FormatError;
use crate::types::Kwdict;
use std::cmp::Ordering;

/// A parsed expression
#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    /// Parse `source`
    pub fn parse(source: &str) -> Result<Self, FormatError> {
        let error = |reason: String| FormatError::Expression {
            expression: source.to_string(),
            reason,
        };
        let tokens = tokenize(source).map_err(error)?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.expression().map_err(error)?;
        if parser.peek() != &Token::End {
            return Err(error(format!("unexpected {:?}", parser.peek())));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// Source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against `kwdict`
    pub fn eval(&self, kwdict: &Kwdict) -> Result<Val, String> {
        eval(&self.root, kwdict)
    }

    /// Evaluate and take the truthiness of the result
    pub fn eval_bool(&self, kwdict: &Kwdict) -> Result<bool, String> {
        self.eval(kwdict).map(|v| v.truthy())
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    Op(&'static str),
    End,
}

const OPERATORS: [&str; 22] = [
    "**", "//", "==", "!=", "<=", ">=", "+", "-", "*", "/", "%", "<", ">", "(", ")", "[", "]",
    ",", ":", ".", "{", "}",
];

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let bytes = source.as_bytes();
    let mut i = 0;

    while i < source.len() {
        let rest = &source[i..];
        let Some(c) = rest.chars().next() else { break };

        if c.is_whitespace() {
            i += c.len_utf8();
        } else if c.is_ascii_digit() || (c == '.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            let len = rest
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '.' || ch == '_'))
                .unwrap_or(rest.len());
            let mut text = rest[..len].replace('_', "");
            let mut consumed = len;
            if text.ends_with(['e', 'E']) && rest[len..].starts_with(['+', '-']) {
                let tail = &rest[len + 1..];
                let digits = tail.find(|ch: char| !ch.is_ascii_digit()).unwrap_or(tail.len());
                text.push_str(&rest[len..len + 1 + digits]);
                consumed = len + 1 + digits;
            }
            let token = if let Ok(n) = text.parse::<i64>() {
                Token::Int(n)
            } else {
                Token::Float(text.parse().map_err(|_| format!("invalid number '{text}'"))?)
            };
            tokens.push(token);
            i += consumed;
        } else if c.is_alphabetic() || c == '_' {
            let len = rest
                .find(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
                .unwrap_or(rest.len());
            tokens.push(Token::Name(rest[..len].to_string()));
            i += len;
        } else if c == '\'' || c == '"' {
            let (text, len) = string_literal(rest, c)?;
            tokens.push(Token::Str(text));
            i += len;
        } else if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            tokens.push(Token::Op(*op));
            i += op.len();
        } else {
            return Err(format!("unexpected character '{c}'"));
        }
    }

    tokens.push(Token::End);
    Ok(tokens)
}

/// Parse a quoted literal at the start of `rest`; returns the text and bytes consumed
fn string_literal(rest: &str, quote: char) -> Result<(String, usize), String> {
    let mut out = String::new();
    let mut chars = rest.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, '0')) => out.push('\0'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c if c == quote => return Ok((out, i + c.len_utf8())),
            c => out.push(c),
        }
    }
    Err("unterminated string literal".to_string())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Clone, Debug, PartialEq)]
enum Node {
    Literal(Val),
    Name(String),
    List(Vec<Node>),
    Attr(Box<Node>, String),
    Index(Box<Node>, Box<Node>),
    Slice(Box<Node>, [Option<Box<Node>>; 3]),
    Call(String, Vec<Node>),
    Method(Box<Node>, String, Vec<Node>),
    Neg(Box<Node>),
    Not(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    Compare(Box<Node>, Vec<(CmpOp, Node)>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    IfElse {
        cond: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
}

const END: &Token = &Token::End;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(END)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or(END)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Token::Op(o) if *o == op)
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Name(n) if n == word)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        let hit = self.is_op(op);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        let hit = self.is_keyword(word);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn expect_op(&mut self, op: &str) -> Result<(), String> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(format!("expected '{op}', found {:?}", self.peek()))
        }
    }

    fn expression(&mut self) -> Result<Node, String> {
        let value = self.or_expr()?;
        if self.eat_keyword("if") {
            let cond = self.or_expr()?;
            if !self.eat_keyword("else") {
                return Err("expected 'else' in conditional expression".to_string());
            }
            let otherwise = self.expression()?;
            return Ok(Node::IfElse {
                cond: Box::new(cond),
                then: Box::new(value),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(value)
    }

    fn or_expr(&mut self) -> Result<Node, String> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("or") {
            left = Node::Or(Box::new(left), Box::new(self.and_expr()?));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Node, String> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("and") {
            left = Node::And(Box::new(left), Box::new(self.not_expr()?));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Node, String> {
        if self.eat_keyword("not") {
            return Ok(Node::Not(Box::new(self.not_expr()?)));
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let next_is = |parser: &Self, word: &str| matches!(parser.peek_at(1), Token::Name(m) if m == word);
        let (op, width) = match self.peek() {
            Token::Op("==") => (CmpOp::Eq, 1),
            Token::Op("!=") => (CmpOp::Ne, 1),
            Token::Op("<") => (CmpOp::Lt, 1),
            Token::Op("<=") => (CmpOp::Le, 1),
            Token::Op(">") => (CmpOp::Gt, 1),
            Token::Op(">=") => (CmpOp::Ge, 1),
            Token::Name(n) if n == "in" => (CmpOp::In, 1),
            Token::Name(n) if n == "not" && next_is(self, "in") => (CmpOp::NotIn, 2),
            Token::Name(n) if n == "is" && next_is(self, "not") => (CmpOp::IsNot, 2),
            Token::Name(n) if n == "is" => (CmpOp::Is, 1),
            _ => return None,
        };
        self.pos += width;
        Some(op)
    }

    fn comparison(&mut self) -> Result<Node, String> {
        let left = self.arith()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comparison_op() {
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Node::Compare(Box::new(left), rest))
        }
    }

    fn arith(&mut self) -> Result<Node, String> {
        let mut left = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                return Ok(left);
            };
            left = Node::Binary(op, Box::new(left), Box::new(self.term()?));
        }
    }

    fn term(&mut self) -> Result<Node, String> {
        let mut left = self.factor()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                return Ok(left);
            };
            left = Node::Binary(op, Box::new(left), Box::new(self.factor()?));
        }
    }

    fn factor(&mut self) -> Result<Node, String> {
        if self.eat_op("-") {
            return Ok(Node::Neg(Box::new(self.factor()?)));
        }
        if self.eat_op("+") {
            return self.factor();
        }
        let base = self.primary()?;
        if self.eat_op("**") {
            let exponent = self.factor()?;
            return Ok(Node::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn arguments(&mut self) -> Result<Vec<Node>, String> {
        let mut args = Vec::new();
        if self.eat_op(")") {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat_op(")") {
                return Ok(args);
            }
            self.expect_op(",")?;
            if self.eat_op(")") {
                return Ok(args);
            }
        }
    }

    fn primary(&mut self) -> Result<Node, String> {
        let mut node = self.atom()?;
        loop {
            if self.eat_op(".") {
                let Token::Name(name) = self.advance() else {
                    return Err("expected attribute name after '.'".to_string());
                };
                node = if self.eat_op("(") {
                    Node::Method(Box::new(node), name, self.arguments()?)
                } else {
                    Node::Attr(Box::new(node), name)
                };
            } else if self.eat_op("[") {
                node = self.subscript(node)?;
            } else if self.is_op("(") {
                let Node::Name(name) = node else {
                    return Err("only builtin functions can be called".to_string());
                };
                self.pos += 1;
                node = Node::Call(name, self.arguments()?);
            } else {
                return Ok(node);
            }
        }
    }

    fn subscript(&mut self, target: Node) -> Result<Node, String> {
        let mut bounds: [Option<Box<Node>>; 3] = [None, None, None];
        let mut slot = 0;
        let mut is_slice = false;
        loop {
            if self.eat_op("]") {
                break;
            }
            if self.eat_op(":") {
                is_slice = true;
                slot += 1;
                if slot > 2 {
                    return Err("too many ':' in slice".to_string());
                }
                continue;
            }
            if bounds[slot].is_some() {
                return Err("expected ':' or ']' in subscript".to_string());
            }
            bounds[slot] = Some(Box::new(self.expression()?));
        }
        if is_slice {
            return Ok(Node::Slice(Box::new(target), bounds));
        }
        match bounds[0].take() {
            Some(index) => Ok(Node::Index(Box::new(target), index)),
            None => Err("empty subscript".to_string()),
        }
    }

    fn atom(&mut self) -> Result<Node, String> {
        match self.advance() {
            Token::Int(i) => Ok(Node::Literal(Val::Int(i))),
            Token::Float(f) => Ok(Node::Literal(Val::Float(f))),
            Token::Str(mut s) => {
                while let Token::Str(next) = self.peek() {
                    s.push_str(next);
                    self.pos += 1;
                }
                Ok(Node::Literal(Val::Str(s)))
            }
            Token::Name(name) => Ok(match name.as_str() {
                "True" => Node::Literal(Val::Bool(true)),
                "False" => Node::Literal(Val::Bool(false)),
                "None" => Node::Literal(Val::None),
                _ => Node::Name(name),
            }),
            Token::Op("(") => {
                if self.eat_op(")") {
                    return Ok(Node::List(Vec::new()));
                }
                let first = self.expression()?;
                if self.eat_op(")") {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.is_op(")") {
                        break;
                    }
                    items.push(self.expression()?);
                }
                self.expect_op(")")?;
                Ok(Node::List(items))
            }
            Token::Op("[") => {
                let mut items = Vec::new();
                while !self.eat_op("]") {
                    items.push(self.expression()?);
                    if !self.eat_op(",") {
                        self.expect_op("]")?;
                        break;
                    }
                }
                Ok(Node::List(items))
            }
            other => Err(format!("unexpected {other:?}")),
        }
    }
}

fn eval(node: &Node, env: &Kwdict) -> Result<Val, String> {
    match node {
        Node::Literal(v) => Ok(v.clone()),
        Node::Name(name) => env
            .get(name)
            .map(Val::from)
            .ok_or_else(|| format!("name '{name}' is not defined")),
        Node::List(items) => Ok(Val::List(
            items
                .iter()
                .map(|n| eval(n, env))
                .collect::<Result<_, _>>()?,
        )),
        Node::Attr(target, name) => {
            let target = eval(target, env)?;
            target
                .get(name)
                .cloned()
                .ok_or_else(|| format!("'{}' object has no attribute '{name}'", target.type_name()))
        }
        Node::Index(target, index) => index_value(eval(target, env)?, &eval(index, env)?),
        Node::Slice(target, bounds) => {
            let target = eval(target, env)?;
            let mut parsed = [None; 3];
            for (slot, bound) in bounds.iter().enumerate() {
                if let Some(bound) = bound {
                    parsed[slot] = match eval(bound, env)? {
                        Val::None => None,
                        v => Some(v.as_i64().ok_or("slice indices must be integers")?),
                    };
                }
            }
            let slice = SliceSpec {
                start: parsed[0],
                stop: parsed[1],
                step: parsed[2],
            };
            match target {
                Val::Str(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    Ok(Val::Str(
                        slice.indices(chars.len())?.into_iter().map(|i| chars[i]).collect(),
                    ))
                }
                Val::List(items) => Ok(Val::List(
                    slice
                        .indices(items.len())?
                        .into_iter()
                        .map(|i| items[i].clone())
                        .collect(),
                )),
                other => Err(format!("'{}' object is not subscriptable", other.type_name())),
            }
        }
        Node::Call(name, args) => {
            let args = args
                .iter()
                .map(|a| eval(a, env))
                .collect::<Result<Vec<_>, _>>()?;
            call_builtin(name, args)
        }
        Node::Method(target, name, args) => {
            let target = eval(target, env)?;
            let args = args
                .iter()
                .map(|a| eval(a, env))
                .collect::<Result<Vec<_>, _>>()?;
            call_method(target, name, args)
        }
        Node::Neg(inner) => match eval(inner, env)? {
            Val::Int(i) => i.checked_neg().map(Val::Int).ok_or_else(|| "integer overflow".to_string()),
            Val::Bool(b) => Ok(Val::Int(-i64::from(b))),
            Val::Float(f) => Ok(Val::Float(-f)),
            other => Err(format!("bad operand type for unary -: '{}'", other.type_name())),
        },
        Node::Not(inner) => Ok(Val::Bool(!eval(inner, env)?.truthy())),
        Node::Binary(op, left, right) => binary(*op, eval(left, env)?, eval(right, env)?),
        Node::Compare(first, rest) => {
            let mut left = eval(first, env)?;
            for (op, node) in rest {
                let right = eval(node, env)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Val::Bool(false));
                }
                left = right;
            }
            Ok(Val::Bool(true))
        }
        Node::And(left, right) => {
            let left = eval(left, env)?;
            if left.truthy() { eval(right, env) } else { Ok(left) }
        }
        Node::Or(left, right) => {
            let left = eval(left, env)?;
            if left.truthy() { Ok(left) } else { eval(right, env) }
        }
        Node::IfElse {
            cond,
            then,
            otherwise,
        } => {
            if eval(cond, env)?.truthy() {
                eval(then, env)
            } else {
                eval(otherwise, env)
            }
        }
    }
}

fn index_value(target: Val, index: &Val) -> Result<Val, String> {
    let position = |len: usize| -> Result<usize, String> {
        let i = index.as_i64().ok_or("indices must be integers")?;
        let len = len as i64;
        let i = if i < 0 { i + len } else { i };
        if (0..len).contains(&i) {
            Ok(i as usize)
        } else {
            Err("index out of range".to_string())
        }
    };
    match target {
        Val::List(items) => {
            let i = position(items.len())?;
            Ok(items[i].clone())
        }
        Val::Str(s) => {
            let i = position(s.chars().count())?;
            Ok(s.chars().nth(i).map(|c| Val::Str(c.to_string())).unwrap_or(Val::None))
        }
        Val::Map(_) => {
            let key = match index {
                Val::Str(s) => s.clone(),
                other => other.to_str(),
            };
            target
                .get(&key)
                .cloned()
                .ok_or_else(|| format!("key error: '{key}'"))
        }
        other => Err(format!("'{}' object is not subscriptable", other.type_name())),
    }
}

fn contains(container: &Val, item: &Val) -> Result<bool, String> {
    match container {
        Val::Str(haystack) => match item {
            Val::Str(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            )),
        },
        Val::List(items) => Ok(items.iter().any(|v| v.loose_eq(item))),
        Val::Map(entries) => Ok(entries.iter().any(|(k, _)| item.as_str() == Some(k))),
        other => Err(format!("argument of type '{}' is not iterable", other.type_name())),
    }
}

fn compare(op: CmpOp, left: &Val, right: &Val) -> Result<bool, String> {
    let ordered = |want: fn(Ordering) -> bool| -> Result<bool, String> {
        left.compare(right).map(want).ok_or_else(|| {
            format!(
                "comparison not supported between instances of '{}' and '{}'",
                left.type_name(),
                right.type_name()
            )
        })
    };
    match op {
        CmpOp::Eq => Ok(left.loose_eq(right)),
        CmpOp::Ne => Ok(!left.loose_eq(right)),
        CmpOp::Lt => ordered(|o| o == Ordering::Less),
        CmpOp::Le => ordered(|o| o != Ordering::Greater),
        CmpOp::Gt => ordered(|o| o == Ordering::Greater),
        CmpOp::Ge => ordered(|o| o != Ordering::Less),
        CmpOp::In => contains(right, left),
        CmpOp::NotIn => contains(right, left).map(|b| !b),
        CmpOp::Is => Ok(identical(left, right)),
        CmpOp::IsNot => Ok(!identical(left, right)),
    }
}

fn identical(left: &Val, right: &Val) -> bool {
    match (left, right) {
        (Val::None, Val::None) => true,
        (Val::Bool(a), Val::Bool(b)) => a == b,
        _ => false,
    }
}

/// Largest string `str * int` may produce
const MAX_REPEAT_LEN: usize = 1 << 20;

fn binary(op: BinOp, left: Val, right: Val) -> Result<Val, String> {
    let unsupported = |left: &Val, right: &Val| {
        format!(
            "unsupported operand types: '{}' and '{}'",
            left.type_name(),
            right.type_name()
        )
    };

    match (op, &left, &right) {
        (BinOp::Add, Val::Str(a), Val::Str(b)) => return Ok(Val::Str(format!("{a}{b}"))),
        (BinOp::Add, Val::List(a), Val::List(b)) => {
            return Ok(Val::List(a.iter().chain(b).cloned().collect()));
        }
        (BinOp::Mul, Val::Str(s), n) | (BinOp::Mul, n, Val::Str(s)) if n.as_i64().is_some() => {
            let count = usize::try_from(n.as_i64().unwrap_or(0).max(0)).unwrap_or(usize::MAX);
            return match s.len().checked_mul(count) {
                Some(len) if len <= MAX_REPEAT_LEN => Ok(Val::Str(s.repeat(count))),
                _ => Err(format!("repeated string would exceed {MAX_REPEAT_LEN} bytes")),
            };
        }
        (BinOp::Mod, Val::Str(_), _) => return Err(unsupported(&left, &right)),
        _ => {}
    }

    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        let overflow = || "integer overflow".to_string();
        return match op {
            BinOp::Add => a.checked_add(b).map(Val::Int).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).map(Val::Int).ok_or_else(overflow),
            BinOp::Mul => a.checked_mul(b).map(Val::Int).ok_or_else(overflow),
            BinOp::Div if b == 0 => Err("division by zero".to_string()),
            BinOp::Div => Ok(Val::Float(a as f64 / b as f64)),
            BinOp::FloorDiv | BinOp::Mod if b == 0 => Err("integer division or modulo by zero".to_string()),
            BinOp::FloorDiv => {
                let q = a.checked_div(b).ok_or_else(overflow)?;
                let r = a.checked_rem(b).ok_or_else(overflow)?;
                Ok(Val::Int(if r != 0 && (r < 0) != (b < 0) { q - 1 } else { q }))
            }
            BinOp::Mod => {
                let r = a.checked_rem(b).ok_or_else(overflow)?;
                Ok(Val::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }))
            }
            BinOp::Pow if b >= 0 => u32::try_from(b)
                .ok()
                .and_then(|e| a.checked_pow(e))
                .map(Val::Int)
                .ok_or_else(overflow),
            BinOp::Pow => Ok(Val::Float((a as f64).powf(b as f64))),
        };
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(unsupported(&left, &right));
    };
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div | BinOp::FloorDiv | BinOp::Mod if b == 0.0 => {
            return Err("float division by zero".to_string());
        }
        BinOp::Div => a / b,
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod => a - b * (a / b).floor(),
        BinOp::Pow => a.powf(b),
    };
    Ok(Val::Float(result))
}

fn arity(name: &str, args: &[Val], min: usize, max: usize) -> Result<(), String> {
    if args.len() < min || args.len() > max {
        return Err(format!("{name}() takes {min}..{max} arguments ({} given)", args.len()));
    }
    Ok(())
}

fn call_builtin(name: &str, mut args: Vec<Val>) -> Result<Val, String> {
    use super::conversion::Conversion;
    match name {
        "len" => {
            arity(name, &args, 1, 1)?;
            Conversion::Len.apply(args.remove(0))
        }
        "str" => {
            arity(name, &args, 1, 1)?;
            Ok(Val::Str(args.remove(0).to_str()))
        }
        "int" => {
            arity(name, &args, 1, 1)?;
            Conversion::Int.apply(args.remove(0))
        }
        "float" => {
            arity(name, &args, 1, 1)?;
            Conversion::Float.apply(args.remove(0))
        }
        "bool" => {
            arity(name, &args, 1, 1)?;
            Ok(Val::Bool(args.remove(0).truthy()))
        }
        "abs" => {
            arity(name, &args, 1, 1)?;
            match args.remove(0) {
                Val::Int(i) => i.checked_abs().map(Val::Int).ok_or_else(|| "integer overflow".to_string()),
                Val::Bool(b) => Ok(Val::Int(i64::from(b))),
                Val::Float(f) => Ok(Val::Float(f.abs())),
                other => Err(format!("bad operand type for abs(): '{}'", other.type_name())),
            }
        }
        "min" | "max" => {
            let items = match args.len() {
                0 => return Err(format!("{name} expected at least 1 argument")),
                1 => match args.remove(0) {
                    Val::List(items) => items,
                    other => return Err(format!("'{}' object is not iterable", other.type_name())),
                },
                _ => args,
            };
            let want = if name == "min" { Ordering::Less } else { Ordering::Greater };
            let mut best: Option<Val> = None;
            for item in items {
                best = Some(match best {
                    None => item,
                    Some(current) => match item.compare(&current) {
                        Some(o) if o == want => item,
                        Some(_) => current,
                        None => return Err("values are not comparable".to_string()),
                    },
                });
            }
            best.ok_or_else(|| format!("{name}() arg is an empty sequence"))
        }
        other => Err(format!("name '{other}' is not defined")),
    }
}

fn call_method(target: Val, name: &str, args: Vec<Val>) -> Result<Val, String> {
    let string_arg = |i: usize| -> Result<&str, String> {
        args.get(i)
            .and_then(Val::as_str)
            .ok_or_else(|| format!("{name}() argument must be str"))
    };
    match (&target, name) {
        (Val::Str(s), "startswith") => Ok(Val::Bool(s.starts_with(string_arg(0)?))),
        (Val::Str(s), "endswith") => Ok(Val::Bool(s.ends_with(string_arg(0)?))),
        (Val::Str(s), "lower") => Ok(Val::Str(s.to_lowercase())),
        (Val::Str(s), "upper") => Ok(Val::Str(s.to_uppercase())),
        (Val::Str(s), "strip") => Ok(Val::Str(match args.first() {
            Some(Val::Str(chars)) => s.trim_matches(|c| chars.contains(c)).to_string(),
            _ => s.trim().to_string(),
        })),
        (Val::Map(_), "get") => {
            let key = string_arg(0)?;
            Ok(target
                .get(key)
                .cloned()
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Val::None)))
        }
        _ => Err(format!(
            "'{}' object has no attribute '{name}'",
            target.type_name()
        )),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kwdict() -> Kwdict {
        match json!({
            "width": 1920,
            "height": 1080,
            "title": "Hello World",
            "tags": ["a", "b"],
            "meta": {"lang": "en"},
            "none": null,
        }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn eval(source: &str) -> Val {
        Expression::parse(source).unwrap().eval(&kwdict()).unwrap()
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3"), Val::Int(7));
        assert_eq!(eval("(1 + 2) * 3"), Val::Int(9));
        assert_eq!(eval("-2 ** 2"), Val::Int(-4));
        assert_eq!(eval("7 // 2"), Val::Int(3));
        assert_eq!(eval("-7 // 2"), Val::Int(-4));
        assert_eq!(eval("-7 % 3"), Val::Int(2));
        assert_eq!(eval("7 / 2"), Val::Float(3.5));
        assert_eq!(eval("width * height"), Val::Int(2073600));
    }

    #[test]
    fn string_repetition_is_bounded() {
        assert_eq!(eval("'ab' * 3"), Val::from("ababab"));
        assert_eq!(eval("2 * 'x'"), Val::from("xx"));
        assert_eq!(eval("'ab' * -1"), Val::from(""));

        let huge = Expression::parse("'ab' * 9999999999").unwrap();
        assert!(huge.eval(&kwdict()).unwrap_err().contains("exceed"));
        let overflow = Expression::parse("'ab' * 9223372036854775807").unwrap();
        assert!(overflow.eval(&kwdict()).is_err());
    }

    #[test]
    fn comparisons_chain() {
        assert_eq!(eval("1 < 2 < 3"), Val::Bool(true));
        assert_eq!(eval("1 < 3 < 2"), Val::Bool(false));
        assert_eq!(eval("width >= 1000 and height > 1000"), Val::Bool(true));
        assert_eq!(eval("'a' in tags"), Val::Bool(true));
        assert_eq!(eval("'c' not in tags"), Val::Bool(true));
        assert_eq!(eval("none is None"), Val::Bool(true));
        assert_eq!(eval("title is not None"), Val::Bool(true));
    }

    #[test]
    fn boolean_operators_return_operands() {
        assert_eq!(eval("none or 'fallback'"), Val::from("fallback"));
        assert_eq!(eval("title and width"), Val::Int(1920));
        assert_eq!(eval("not tags"), Val::Bool(false));
    }

    #[test]
    fn access_and_methods() {
        assert_eq!(eval("tags[-1]"), Val::from("b"));
        assert_eq!(eval("title[:5]"), Val::from("Hello"));
        assert_eq!(eval("meta.lang"), Val::from("en"));
        assert_eq!(eval("meta['lang']"), Val::from("en"));
        assert_eq!(eval("title.lower().startswith('hello')"), Val::Bool(true));
        assert_eq!(eval("meta.get('missing', 5)"), Val::Int(5));
    }

    #[test]
    fn builtins_and_conditionals() {
        assert_eq!(eval("len(tags)"), Val::Int(2));
        assert_eq!(eval("max(1, 5, 3)"), Val::Int(5));
        assert_eq!(eval("min([4, 2])"), Val::Int(2));
        assert_eq!(eval("str(width) + 'px'"), Val::from("1920px"));
        assert_eq!(eval("'big' if width > 1000 else 'small'"), Val::from("big"));
        assert_eq!(eval("[1, 2] + [3]"), Val::from(&json!([1, 2, 3])));
    }

    #[test]
    fn undefined_names_fail_at_eval_time() {
        let expr = Expression::parse("missing > 1").unwrap();
        let err = expr.eval(&kwdict()).unwrap_err();
        assert!(err.contains("missing"), "{err}");
    }

    #[test]
    fn syntax_errors_fail_at_parse_time() {
        assert!(Expression::parse("1 +").is_err());
        assert!(Expression::parse("a if b").is_err());
        assert!(Expression::parse("'open").is_err());
        assert!(Expression::parse("(1, 2").is_err());
    }
}
