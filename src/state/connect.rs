//! Cross-node splitter propagation
//!
//! A node's splitter has an upstream (left) part made of escape markers and
//! a local (right) part made of its own fields. Every upstream that fans
//! out has to appear in the left part; markers the user left out are added
//! here, and a node without any splitter inherits the product of all of its
//! upstreams.

use super::{Upstream, UpstreamGraph};
use crate::error::{ErrorCode, Result, StateError};
use crate::splitter::rpn::unconnected;
use crate::splitter::Splitter;

/// Which side of the left/right split a splitter fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Only escape markers.
    Left,
    /// Only local fields.
    Right,
    Mixed,
}

/// A node's splitter broken into its upstream and local parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connection {
    pub splitter: Option<Splitter>,
    pub left: Option<Splitter>,
    pub right: Option<Splitter>,
}

/// Classify a fragment; escape markers must name a reachable upstream.
pub fn classify(fragment: &Splitter, graph: &UpstreamGraph<'_>) -> Result<Side> {
    let mut sides = Vec::new();
    for leaf in fragment.leaves() {
        match leaf {
            Splitter::Upstream(node) => {
                if graph.find(node).is_none() {
                    return Err(unconnected(node));
                }
                sides.push(Side::Left);
            }
            _ => sides.push(Side::Right),
        }
    }
    let left = sides.iter().all(|s| *s == Side::Left);
    let right = sides.iter().all(|s| *s == Side::Right);
    Ok(match (left, right) {
        (true, _) => Side::Left,
        (false, true) => Side::Right,
        _ => Side::Mixed,
    })
}

/// Add markers for every fanning-out direct upstream missing from `left`.
///
/// Missing markers are prepended in reverse connection order, each as a
/// binary product with what is already there.
pub fn complete_left(left: Option<Splitter>, upstreams: &[Upstream]) -> Option<Splitter> {
    let fanning: Vec<&str> = upstreams
        .iter()
        .filter(|u| !u.state().splitter_rpn_final().is_empty())
        .map(Upstream::name)
        .collect();

    match left {
        Some(mut left) => {
            let present: Vec<String> = left.upstreams().iter().map(|s| s.to_string()).collect();
            for node in fanning.iter().rev() {
                if !present.iter().any(|p| p == node) {
                    left = Splitter::pair(Splitter::upstream(*node), left);
                }
            }
            Some(left)
        }
        None => {
            let mut markers: Vec<Splitter> =
                fanning.into_iter().map(Splitter::upstream).collect();
            match markers.len() {
                0 => None,
                1 => markers.pop(),
                _ => Some(Splitter::Product(markers)),
            }
        }
    }
}

/// Split a declared (qualified) splitter into left and right parts and
/// complete the left part from the node's upstreams.
pub fn connect(
    declared: Option<Splitter>,
    upstreams: &[Upstream],
    graph: &UpstreamGraph<'_>,
) -> Result<Connection> {
    let (left, right) = match declared {
        None => (None, None),
        Some(splitter) => match classify(&splitter, graph)? {
            Side::Left => (Some(splitter), None),
            Side::Right => (None, Some(splitter)),
            Side::Mixed => split_mixed(splitter, graph)?,
        },
    };

    let left = complete_left(left, upstreams);
    let splitter = match (&left, &right) {
        (Some(left), Some(right)) => Some(Splitter::pair(left.clone(), right.clone())),
        (Some(part), None) | (None, Some(part)) => Some(part.clone()),
        (None, None) => None,
    };
    Ok(Connection {
        splitter,
        left,
        right,
    })
}

fn split_mixed(
    splitter: Splitter,
    graph: &UpstreamGraph<'_>,
) -> Result<(Option<Splitter>, Option<Splitter>)> {
    match splitter {
        Splitter::Product(mut children) if children.len() == 2 => {
            let (right, left) = match (children.pop(), children.pop()) {
                (Some(right), Some(left)) => (right, left),
                _ => return Err(mixed_error("product")),
            };
            if classify(&left, graph)? == Side::Left && classify(&right, graph)? == Side::Right {
                Ok((Some(left), Some(right)))
            } else {
                Err(mixed_error("product"))
            }
        }
        Splitter::Zip(_, _) => Err(mixed_error("zip")),
        _ => Err(mixed_error("product")),
    }
}

fn mixed_error(form: &str) -> StateError {
    StateError::configuration_with_code(
        ErrorCode::CONFIG_MIXED_SPLITTER,
        format!(
            "splitter {} mixes upstream markers and local fields; \
             use a two-element product of an upstream part and a local part",
            form
        ),
    )
}
