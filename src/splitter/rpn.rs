//! Postfix (RPN) form of splitters
//!
//! The postfix program is the storage and interop form: leaves in order,
//! each operator after its two operands. `[a, (b, c)]` becomes
//! `a b c . *`. Conversion back goes through [`rpn_to_splitter`], which
//! rebuilds binary composites.

use super::ast::{Splitter, UPSTREAM_PREFIX};
use crate::error::{ErrorCode, Result, StateError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const ZIP_OP: &str = ".";
pub const PRODUCT_OP: &str = "*";

/// One element of a postfix program.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    Field(String),
    Upstream(String),
    Zip,
    Product,
}

impl Token {
    pub fn is_operator(&self) -> bool {
        matches!(self, Self::Zip | Self::Product)
    }

    /// Parse a wire-form program element.
    pub fn parse(text: &str) -> Self {
        match text {
            ZIP_OP => Self::Zip,
            PRODUCT_OP => Self::Product,
            leaf => match leaf.strip_prefix(UPSTREAM_PREFIX) {
                Some(node) => Self::Upstream(node.to_string()),
                None => Self::Field(leaf.to_string()),
            },
        }
    }

    fn as_leaf(&self) -> Option<Splitter> {
        match self {
            Self::Field(name) => Some(Splitter::Field(name.clone())),
            Self::Upstream(node) => Some(Splitter::Upstream(node.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => write!(f, "{}", name),
            Self::Upstream(node) => write!(f, "{}{}", UPSTREAM_PREFIX, node),
            Self::Zip => write!(f, "{}", ZIP_OP),
            Self::Product => write!(f, "{}", PRODUCT_OP),
        }
    }
}

/// A postfix splitter program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Rpn(Vec<Token>);

impl Rpn {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self(tokens)
    }

    /// Build from wire-form strings, e.g. `["NA.a", "NA.b", "*"]`.
    pub fn from_strs<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(items.into_iter().map(|s| Token::parse(s.as_ref())).collect())
    }

    pub fn tokens(&self) -> &[Token] {
        &self.0
    }

    pub fn into_tokens(self) -> Vec<Token> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Token> {
        self.0.iter()
    }

    /// Field leaves in program order.
    pub fn fields(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter_map(|token| match token {
                Token::Field(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Escape-marker leaves in program order.
    pub fn upstreams(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter_map(|token| match token {
                Token::Upstream(node) => Some(node.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.fields().contains(&field)
    }

    pub fn contains_upstream(&self, node: &str) -> bool {
        self.upstreams().contains(&node)
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(Token::to_string).collect()
    }

    /// Check that every operator finds two operands and one result remains.
    pub fn validate(&self) -> Result<()> {
        let mut depth = 0usize;
        for (pos, token) in self.0.iter().enumerate() {
            if token.is_operator() {
                if depth < 2 {
                    return Err(StateError::structure(
                        ErrorCode::STRUCTURE_OPERATOR_ARITY,
                        format!(
                            "operator '{}' at position {} lacks two operands in {}",
                            token, pos, self
                        ),
                    ));
                }
                depth -= 1;
            } else {
                depth += 1;
            }
        }
        if depth > 1 {
            return Err(StateError::structure(
                ErrorCode::STRUCTURE_DANGLING_OPERANDS,
                format!("program {} leaves {} results", self, depth),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Rpn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.to_strings().join(", "))
    }
}

impl FromIterator<Token> for Rpn {
    fn from_iter<I: IntoIterator<Item = Token>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Rpn {
    type Item = &'a Token;
    type IntoIter = std::slice::Iter<'a, Token>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<Vec<String>> for Rpn {
    fn from(items: Vec<String>) -> Self {
        Self::from_strs(items)
    }
}

impl From<Rpn> for Vec<String> {
    fn from(rpn: Rpn) -> Self {
        rpn.to_strings()
    }
}

/// Source of upstream nodes' resolved final programs.
pub trait UpstreamLookup {
    fn final_rpn(&self, node: &str) -> Result<Rpn>;
}

/// Lookup for splitters that must not reference any upstream.
pub struct NoUpstreams;

pub(crate) fn unconnected(node: &str) -> StateError {
    StateError::reference(
        node,
        format!(
            "{}{} is not among the other nodes that are connected",
            UPSTREAM_PREFIX, node
        ),
    )
}

impl UpstreamLookup for NoUpstreams {
    fn final_rpn(&self, node: &str) -> Result<Rpn> {
        Err(unconnected(node))
    }
}

impl UpstreamLookup for BTreeMap<String, Rpn> {
    fn final_rpn(&self, node: &str) -> Result<Rpn> {
        self.get(node).cloned().ok_or_else(|| unconnected(node))
    }
}

fn emit(splitter: &Splitter, out: &mut Vec<Token>) -> Result<()> {
    match splitter {
        Splitter::Field(name) => out.push(Token::Field(name.clone())),
        Splitter::Upstream(node) => out.push(Token::Upstream(node.clone())),
        Splitter::Zip(left, right) => {
            emit(left, out)?;
            emit(right, out)?;
            out.push(Token::Zip);
        }
        Splitter::Product(children) => {
            if children.len() < 2 {
                return Err(StateError::structure(
                    ErrorCode::STRUCTURE_PRODUCT_ARITY,
                    format!("product needs at least two children, got {}", children.len()),
                ));
            }
            for (i, child) in children.iter().enumerate() {
                emit(child, out)?;
                if i > 0 {
                    out.push(Token::Product);
                }
            }
        }
    }
    Ok(())
}

/// Compact postfix program: escape markers are kept as leaves.
pub fn splitter_to_rpn(splitter: &Splitter) -> Result<Rpn> {
    let mut tokens = Vec::new();
    emit(splitter, &mut tokens)?;
    Ok(Rpn(tokens))
}

/// Replace every escape marker with the upstream's resolved final program.
///
/// Upstream programs are already fully resolved, so the result only holds
/// field leaves and operators.
pub fn resolve_upstreams<L>(rpn: &Rpn, lookup: &L) -> Result<Rpn>
where
    L: UpstreamLookup + ?Sized,
{
    let mut tokens = Vec::with_capacity(rpn.len());
    for token in rpn {
        match token {
            Token::Upstream(node) => {
                let upstream = lookup.final_rpn(node)?;
                if upstream.is_empty() {
                    return Err(StateError::configuration_with_code(
                        ErrorCode::CONFIG_EMPTY_UPSTREAM,
                        format!(
                            "{}{} has no final splitter to import",
                            UPSTREAM_PREFIX, node
                        ),
                    ));
                }
                tokens.extend(upstream.into_tokens());
            }
            other => tokens.push(other.clone()),
        }
    }
    Ok(Rpn(tokens))
}

/// Postfix program with every escape marker resolved to upstream fields.
pub fn splitter_to_rpn_resolved<L>(splitter: &Splitter, lookup: &L) -> Result<Rpn>
where
    L: UpstreamLookup + ?Sized,
{
    resolve_upstreams(&splitter_to_rpn(splitter)?, lookup)
}

/// Rebuild a splitter from a postfix program; composites come out binary,
/// so `a b * c *` becomes `[[a, b], c]`. An empty program has no splitter.
pub fn rpn_to_splitter(rpn: &Rpn) -> Result<Option<Splitter>> {
    rpn.validate()?;
    let mut stack: Vec<Splitter> = Vec::new();
    for token in rpn {
        if let Some(leaf) = token.as_leaf() {
            stack.push(leaf);
            continue;
        }
        let (right, left) = match (stack.pop(), stack.pop()) {
            (Some(right), Some(left)) => (right, left),
            _ => {
                return Err(StateError::structure(
                    ErrorCode::STRUCTURE_OPERATOR_ARITY,
                    format!("operator '{}' lacks two operands", token),
                ))
            }
        };
        stack.push(match token {
            Token::Zip => Splitter::zip(left, right),
            _ => Splitter::pair(left, right),
        });
    }
    Ok(stack.pop())
}
