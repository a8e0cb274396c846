//! Splitter expression tree and its text notation
//!
//! A splitter is written the way users declare it on a node:
//!
//! - `a` is a single field
//! - `_NA` imports the whole final splitter of upstream node `NA`
//! - `(a, b)` zips two sub-splitters element by element
//! - `[a, b, c]` takes the Cartesian product of two or more sub-splitters
//!
//! The text is parsed once into [`Splitter`]; every other stage works on the
//! tagged variants and never looks at name prefixes again.

use crate::error::{ErrorCode, Result, StateError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Peekable;
use std::str::{Chars, FromStr};

/// Leading character of an escape-marker leaf.
pub const UPSTREAM_PREFIX: char = '_';

/// Separator between a node name and a field name.
pub const NAME_SEPARATOR: char = '.';

/// A splitter expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "SplitterRepr", into = "String")]
pub enum Splitter {
    /// A field reference, bare (`a`) or qualified (`NA.a`).
    Field(String),
    /// All of the named upstream node's final splitter.
    Upstream(String),
    /// Element-wise pairing of two sub-splitters.
    Zip(Box<Splitter>, Box<Splitter>),
    /// Cartesian product of two or more sub-splitters, left to right.
    Product(Vec<Splitter>),
}

impl Splitter {
    /// Build a leaf from its wire-form name, dispatching on the escape prefix.
    pub fn leaf(name: &str) -> Self {
        match name.strip_prefix(UPSTREAM_PREFIX) {
            Some(node) => Self::Upstream(node.to_string()),
            None => Self::Field(name.to_string()),
        }
    }

    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    pub fn upstream(node: impl Into<String>) -> Self {
        Self::Upstream(node.into())
    }

    pub fn zip(left: Splitter, right: Splitter) -> Self {
        Self::Zip(Box::new(left), Box::new(right))
    }

    /// Binary product of two sub-splitters.
    pub fn pair(left: Splitter, right: Splitter) -> Self {
        Self::Product(vec![left, right])
    }

    /// Product of a sequence; fails when fewer than two children are given.
    pub fn product(children: Vec<Splitter>) -> Result<Self> {
        if children.len() < 2 {
            return Err(StateError::structure(
                ErrorCode::STRUCTURE_PRODUCT_ARITY,
                format!("product needs at least two children, got {}", children.len()),
            ));
        }
        Ok(Self::Product(children))
    }

    /// Parse the bracket notation.
    ///
    /// # Examples
    ///
    /// ```
    /// use statespace::splitter::Splitter;
    ///
    /// let splitter = Splitter::parse("[_NA, (b, c)]").unwrap();
    /// assert_eq!(
    ///     splitter,
    ///     Splitter::pair(
    ///         Splitter::upstream("NA"),
    ///         Splitter::zip(Splitter::field("b"), Splitter::field("c")),
    ///     )
    /// );
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = tokenize(text)?;
        let mut parser = Parser { tokens, pos: 0 };
        let splitter = parser.parse_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(parse_error(format!(
                "unexpected trailing input in '{}'",
                text
            )));
        }
        Ok(splitter)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Field(_) | Self::Upstream(_))
    }

    /// Leaves in left-to-right order.
    pub fn leaves(&self) -> Vec<&Splitter> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Splitter>) {
        match self {
            Self::Field(_) | Self::Upstream(_) => out.push(self),
            Self::Zip(left, right) => {
                left.collect_leaves(out);
                right.collect_leaves(out);
            }
            Self::Product(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
        }
    }

    /// Field names in left-to-right order.
    pub fn fields(&self) -> Vec<&str> {
        self.leaves()
            .into_iter()
            .filter_map(|leaf| match leaf {
                Self::Field(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Upstream node names referenced by escape markers, in left-to-right order.
    pub fn upstreams(&self) -> Vec<&str> {
        self.leaves()
            .into_iter()
            .filter_map(|leaf| match leaf {
                Self::Upstream(node) => Some(node.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Rebuild the tree with every leaf passed through `f`.
    pub fn try_map_leaves<F>(self, f: &F) -> Result<Self>
    where
        F: Fn(Splitter) -> Result<Splitter>,
    {
        match self {
            Self::Field(_) | Self::Upstream(_) => f(self),
            Self::Zip(left, right) => Ok(Self::zip(
                left.try_map_leaves(f)?,
                right.try_map_leaves(f)?,
            )),
            Self::Product(children) => Ok(Self::Product(
                children
                    .into_iter()
                    .map(|child| child.try_map_leaves(f))
                    .collect::<Result<Vec<_>>>()?,
            )),
        }
    }
}

impl fmt::Display for Splitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => write!(f, "{}", name),
            Self::Upstream(node) => write!(f, "{}{}", UPSTREAM_PREFIX, node),
            Self::Zip(left, right) => write!(f, "({}, {})", left, right),
            Self::Product(children) => {
                write!(f, "[")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl FromStr for Splitter {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<Splitter> for String {
    fn from(splitter: Splitter) -> Self {
        splitter.to_string()
    }
}

/// Accepted wire forms: bracket notation text, a JSON/YAML list for a
/// product, or `{zip: [left, right]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum SplitterRepr {
    Text(String),
    Product(Vec<Splitter>),
    Zip { zip: (Splitter, Splitter) },
}

impl TryFrom<SplitterRepr> for Splitter {
    type Error = StateError;

    fn try_from(repr: SplitterRepr) -> Result<Self> {
        match repr {
            SplitterRepr::Text(text) => Splitter::parse(&text),
            SplitterRepr::Product(children) => Splitter::product(children),
            SplitterRepr::Zip { zip: (left, right) } => Ok(Splitter::zip(left, right)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Comma,
    Name(String),
}

fn parse_error(message: impl Into<String>) -> StateError {
    StateError::structure(ErrorCode::STRUCTURE_PARSE, message)
}

fn is_name_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '.' | '-')
}

fn parse_quoted(quote: char, chars: &mut Peekable<Chars>) -> Result<String> {
    let mut name = String::new();
    for ch in chars.by_ref() {
        if ch == quote {
            return Ok(name);
        }
        name.push(ch);
    }
    Err(parse_error(format!("unterminated {} quote", quote)))
}

fn tokenize(text: &str) -> Result<Vec<Lexeme>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | '[' | ']' | ',' => {
                chars.next();
                tokens.push(match ch {
                    '(' => Lexeme::LeftParen,
                    ')' => Lexeme::RightParen,
                    '[' => Lexeme::LeftBracket,
                    ']' => Lexeme::RightBracket,
                    _ => Lexeme::Comma,
                });
            }
            '"' | '\'' => {
                chars.next();
                tokens.push(Lexeme::Name(parse_quoted(ch, &mut chars)?));
            }
            c if is_name_char(c) => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_name_char(c) {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                tokens.push(Lexeme::Name(name));
            }
            other => {
                return Err(parse_error(format!(
                    "unexpected character '{}' in splitter",
                    other
                )))
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Lexeme>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Option<Lexeme> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_expr(&mut self) -> Result<Splitter> {
        match self.next() {
            Some(Lexeme::Name(name)) if !name.is_empty() => Ok(Splitter::leaf(&name)),
            Some(Lexeme::Name(_)) => Err(parse_error("empty field name")),
            Some(Lexeme::LeftParen) => {
                let mut children = self.parse_sequence(Lexeme::RightParen)?;
                if children.len() != 2 {
                    return Err(parse_error(format!(
                        "zip takes exactly two children, got {}",
                        children.len()
                    )));
                }
                let right = children.pop();
                let left = children.pop();
                match (left, right) {
                    (Some(left), Some(right)) => Ok(Splitter::zip(left, right)),
                    _ => Err(parse_error("zip takes exactly two children")),
                }
            }
            Some(Lexeme::LeftBracket) => {
                let children = self.parse_sequence(Lexeme::RightBracket)?;
                Splitter::product(children)
            }
            Some(other) => Err(parse_error(format!("unexpected token {:?}", other))),
            None => Err(parse_error("unexpected end of splitter")),
        }
    }

    fn parse_sequence(&mut self, close: Lexeme) -> Result<Vec<Splitter>> {
        let mut children = vec![self.parse_expr()?];
        loop {
            match self.next() {
                Some(Lexeme::Comma) => children.push(self.parse_expr()?),
                Some(token) if token == close => return Ok(children),
                Some(other) => {
                    return Err(parse_error(format!("unexpected token {:?}", other)))
                }
                None => return Err(parse_error(format!("missing closing {:?}", close))),
            }
        }
    }
}
