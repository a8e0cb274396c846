//! Combiner reduction
//!
//! Combining a field collapses every axis its group spans. The reduction
//! has two halves: dropping the retired leaves from the postfix program,
//! and removing their groups from the group layout. Retiring one member of
//! a zip retires all of its partners, and only groups in the innermost
//! stack level may be collapsed.

use super::ast::Splitter;
use super::groups::GroupLayout;
use super::rpn::{rpn_to_splitter, splitter_to_rpn, Rpn};
use crate::error::{ErrorCode, Result, StateError};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Result of applying a combiner to a node's program and layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Combination {
    pub rpn: Rpn,
    pub layout: GroupLayout,
    /// Every retired field, explicit or through a shared group, in key order.
    pub combiner_all: Vec<String>,
}

fn prune(splitter: Splitter, retired: &[String]) -> Option<Splitter> {
    match splitter {
        Splitter::Field(_) | Splitter::Upstream(_) => {
            if retired.contains(&splitter.to_string()) {
                None
            } else {
                Some(splitter)
            }
        }
        Splitter::Zip(left, right) => match (prune(*left, retired), prune(*right, retired)) {
            (Some(left), Some(right)) => Some(Splitter::zip(left, right)),
            (Some(survivor), None) | (None, Some(survivor)) => Some(survivor),
            (None, None) => None,
        },
        Splitter::Product(children) => {
            let mut survivors: Vec<Splitter> = children
                .into_iter()
                .filter_map(|child| prune(child, retired))
                .collect();
            match survivors.len() {
                0 => None,
                1 => survivors.pop(),
                _ => Some(Splitter::Product(survivors)),
            }
        }
    }
}

/// Drop retired leaves (wire-form names, so `_NA` removes a marker) from a
/// postfix program. An operator left with a single operand is replaced by
/// that operand; one left with none disappears.
///
/// # Examples
///
/// ```
/// use statespace::splitter::{remove_from_rpn, Rpn};
///
/// let rpn = Rpn::from_strs(["a", "b", ".", "c", "*"]);
/// let reduced = remove_from_rpn(&rpn, &["b".to_string()]).unwrap();
/// assert_eq!(reduced, Rpn::from_strs(["a", "c", "*"]));
/// ```
pub fn remove_from_rpn(rpn: &Rpn, retired: &[String]) -> Result<Rpn> {
    match rpn_to_splitter(rpn)?.and_then(|tree| prune(tree, retired)) {
        Some(tree) => splitter_to_rpn(&tree),
        None => Ok(Rpn::default()),
    }
}

/// Remove the groups of `combiner` (and of every field sharing them) from a
/// layout, renumbering the survivors densely.
pub fn reduce_layout(
    layout: &GroupLayout,
    combiner: &[String],
) -> Result<(GroupLayout, Vec<String>)> {
    let mut combined_groups = BTreeSet::new();
    for field in combiner {
        let group = layout.group_for_inputs.get(field).ok_or_else(|| {
            StateError::configuration_with_code(
                ErrorCode::CONFIG_COMBINER_NOT_IN_SPLITTER,
                format!(
                    "combiner field {} is not in the splitter (fields: {})",
                    field,
                    layout.keys.join(", ")
                ),
            )
        })?;
        let top = layout.groups_stack.last().map(Vec::as_slice).unwrap_or(&[]);
        if !top.contains(group) {
            return Err(StateError::order(
                Some(field.clone()),
                format!(
                    "{} belongs to an outer split; combine inner/dependent fields first",
                    field
                ),
            ));
        }
        combined_groups.insert(*group);
    }

    let mut combiner_all: Vec<String> = Vec::new();
    for key in &layout.keys {
        let retired = layout
            .group_for_inputs
            .get(key)
            .is_some_and(|group| combined_groups.contains(group));
        if retired && !combiner_all.contains(key) {
            combiner_all.push(key.clone());
        }
    }

    let groups_stack: Vec<Vec<usize>> = layout
        .groups_stack
        .iter()
        .map(|level| {
            level
                .iter()
                .copied()
                .filter(|group| !combined_groups.contains(group))
                .collect::<Vec<_>>()
        })
        .filter(|level| !level.is_empty())
        .collect();

    let surviving: BTreeSet<usize> = groups_stack.iter().flatten().copied().collect();
    let renumber: BTreeMap<usize, usize> = surviving
        .into_iter()
        .enumerate()
        .map(|(new, old)| (old, new))
        .collect();

    let keys: Vec<String> = layout
        .keys
        .iter()
        .filter(|key| !combiner_all.contains(key))
        .cloned()
        .collect();
    let group_for_inputs = keys
        .iter()
        .filter_map(|key| {
            let old = layout.group_for_inputs.get(key)?;
            Some((key.clone(), *renumber.get(old)?))
        })
        .collect();
    let groups_stack = groups_stack
        .into_iter()
        .map(|level| level.iter().filter_map(|g| renumber.get(g).copied()).collect())
        .collect();

    Ok((
        GroupLayout {
            keys,
            group_for_inputs,
            groups_stack,
        },
        combiner_all,
    ))
}

/// Apply `combiner` to a resolved program and its layout.
pub fn combine(rpn: &Rpn, layout: &GroupLayout, combiner: &[String]) -> Result<Combination> {
    if combiner.is_empty() {
        return Ok(Combination {
            rpn: rpn.clone(),
            layout: layout.clone(),
            combiner_all: Vec::new(),
        });
    }
    let (reduced, combiner_all) = reduce_layout(layout, combiner)?;
    let rpn = remove_from_rpn(rpn, &combiner_all)?;
    trace!(
        combiner = ?combiner,
        combiner_all = ?combiner_all,
        rpn_final = %rpn,
        "Applied combiner"
    );
    Ok(Combination {
        rpn,
        layout: reduced,
        combiner_all,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splitter::groups::resolve_groups;
    use crate::splitter::rpn::NoUpstreams;

    fn rpn(items: &[&str]) -> Rpn {
        Rpn::from_strs(items)
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_remove_leaf_from_product() {
        let reduced = remove_from_rpn(&rpn(&["a", "b", "*"]), &names(&["a"])).unwrap();
        assert_eq!(reduced, rpn(&["b"]));
        let reduced = remove_from_rpn(&rpn(&["a", "b", "*", "c", "*"]), &names(&["b"])).unwrap();
        assert_eq!(reduced, rpn(&["a", "c", "*"]));
    }

    #[test]
    fn test_remove_whole_zip() {
        let program = rpn(&["a", "b", ".", "c", "*"]);
        let reduced = remove_from_rpn(&program, &names(&["a", "b"])).unwrap();
        assert_eq!(reduced, rpn(&["c"]));
    }

    #[test]
    fn test_remove_everything() {
        let reduced = remove_from_rpn(&rpn(&["a", "b", "*"]), &names(&["a", "b"])).unwrap();
        assert!(reduced.is_empty());
    }

    #[test]
    fn test_remove_marker() {
        let reduced = remove_from_rpn(&rpn(&["_NA", "NB.b", "*"]), &names(&["_NA"])).unwrap();
        assert_eq!(reduced, rpn(&["NB.b"]));
    }

    #[test]
    fn test_remove_nested_mixed() {
        let program = rpn(&["a", "b", "c", "*", ".", "d", "*"]);
        let reduced = remove_from_rpn(&program, &names(&["c"])).unwrap();
        assert_eq!(reduced, rpn(&["a", "b", ".", "d", "*"]));
    }

    #[test]
    fn test_combine_one_product_field() {
        let program = rpn(&["NA.a", "NA.b", "*"]);
        let layout = resolve_groups(&program, &NoUpstreams).unwrap();
        let combination = combine(&program, &layout, &names(&["NA.a"])).unwrap();
        assert_eq!(combination.rpn, rpn(&["NA.b"]));
        assert_eq!(combination.combiner_all, names(&["NA.a"]));
        assert_eq!(combination.layout.keys, names(&["NA.b"]));
        assert_eq!(combination.layout.group_for_inputs["NA.b"], 0);
        assert_eq!(combination.layout.groups_stack, vec![vec![0]]);
    }

    #[test]
    fn test_combine_zip_partner_retires_both() {
        let program = rpn(&["NA.a", "NA.b", ".", "NA.c", "*"]);
        let layout = resolve_groups(&program, &NoUpstreams).unwrap();
        let combination = combine(&program, &layout, &names(&["NA.b"])).unwrap();
        assert_eq!(combination.combiner_all, names(&["NA.a", "NA.b"]));
        assert_eq!(combination.rpn, rpn(&["NA.c"]));
        assert_eq!(combination.layout.group_for_inputs["NA.c"], 0);
    }

    #[test]
    fn test_combine_all_leaves_empty_layout() {
        let program = rpn(&["NA.a"]);
        let layout = resolve_groups(&program, &NoUpstreams).unwrap();
        let combination = combine(&program, &layout, &names(&["NA.a"])).unwrap();
        assert!(combination.rpn.is_empty());
        assert!(combination.layout.groups_stack.is_empty());
        assert!(combination.layout.keys.is_empty());
    }

    #[test]
    fn test_combine_unknown_field() {
        let program = rpn(&["NA.a"]);
        let layout = resolve_groups(&program, &NoUpstreams).unwrap();
        let err = combine(&program, &layout, &names(&["NA.z"])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_COMBINER_NOT_IN_SPLITTER);
    }

    #[test]
    fn test_combine_outer_group_first_is_order_error() {
        let layout = GroupLayout::leaf("NA.a").nest(GroupLayout::leaf("NB.b"));
        let program = rpn(&["NA.a", "NB.b", "*"]);
        let err = combine(&program, &layout, &names(&["NA.a"])).unwrap_err();
        assert!(matches!(err, StateError::Order { .. }));
        assert!(err.to_string().contains("combine inner/dependent fields first"));

        let combination = combine(&program, &layout, &names(&["NB.b"])).unwrap();
        assert_eq!(combination.layout.groups_stack, vec![vec![0]]);
        assert_eq!(combination.layout.keys, names(&["NA.a"]));
    }

    #[test]
    fn test_renumbering_is_dense() {
        let program = rpn(&["a", "b", "*", "c", "*"]);
        let layout = resolve_groups(&program, &NoUpstreams).unwrap();
        let combination = combine(&program, &layout, &names(&["b"])).unwrap();
        assert_eq!(combination.layout.group_for_inputs["a"], 0);
        assert_eq!(combination.layout.group_for_inputs["c"], 1);
        assert_eq!(combination.layout.groups_stack, vec![vec![0, 1]]);
    }
}
