//! Shape-free group resolution
//!
//! Before any values are known the index space can still be described
//! abstractly: every field belongs to a group (an equivalence class of
//! axes), zipped fields share a group, and product operands get disjoint
//! groups numbered left to right. The groups stack records, per nesting
//! level, which groups are still open. Groups in the last level can be
//! combined; groups in earlier levels belong to outer (upstream) splits
//! and have to wait until the inner ones are gone.

use super::rpn::{unconnected, NoUpstreams, Rpn, Token};
use crate::error::{ErrorCode, Result, StateError};
use serde::Serialize;
use std::collections::BTreeMap;

/// Group structure of a splitter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupLayout {
    /// Fields in program order.
    pub keys: Vec<String>,
    pub group_for_inputs: BTreeMap<String, usize>,
    pub groups_stack: Vec<Vec<usize>>,
}

impl GroupLayout {
    pub fn leaf(field: impl Into<String>) -> Self {
        let field = field.into();
        let mut group_for_inputs = BTreeMap::new();
        group_for_inputs.insert(field.clone(), 0);
        Self {
            keys: vec![field],
            group_for_inputs,
            groups_stack: vec![vec![0]],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn group_count(&self) -> usize {
        self.groups_stack.iter().map(Vec::len).sum()
    }

    fn offset(mut self, by: usize) -> Self {
        for group in self.group_for_inputs.values_mut() {
            *group += by;
        }
        for level in &mut self.groups_stack {
            for group in level.iter_mut() {
                *group += by;
            }
        }
        self
    }

    fn absorb_fields(&mut self, other: GroupLayout) {
        self.keys.extend(other.keys);
        self.group_for_inputs.extend(other.group_for_inputs);
    }

    /// Cartesian product: the right operand's groups follow the left's,
    /// level by level.
    pub fn product(mut self, right: GroupLayout) -> Self {
        let mut right = right.offset(self.group_count());
        let levels = std::mem::take(&mut right.groups_stack);
        for (depth, level) in levels.into_iter().enumerate() {
            match self.groups_stack.get_mut(depth) {
                Some(existing) => existing.extend(level),
                None => self.groups_stack.push(level),
            }
        }
        self.absorb_fields(right);
        self
    }

    /// Element-wise pairing: the right operand's groups are identified with
    /// the left operand's, position by position.
    pub fn zip(mut self, right: GroupLayout) -> Result<Self> {
        let signature = |layout: &GroupLayout| -> Vec<usize> {
            layout.groups_stack.iter().map(Vec::len).collect()
        };
        if signature(&self) != signature(&right) {
            return Err(StateError::shape_mismatch(
                ErrorCode::SHAPE_ZIP_GROUPS,
                format!(
                    "cannot zip [{}] with [{}]: group structures {:?} and {:?} differ",
                    self.keys.join(", "),
                    right.keys.join(", "),
                    self.groups_stack,
                    right.groups_stack
                ),
            ));
        }
        let mapping: BTreeMap<usize, usize> = right
            .groups_stack
            .concat()
            .into_iter()
            .zip(self.groups_stack.concat())
            .collect();
        for (field, group) in right.group_for_inputs {
            let mapped = mapping.get(&group).copied().unwrap_or(group);
            self.group_for_inputs.insert(field, mapped);
        }
        // The same upstream reached along two paths contributes its keys once.
        for key in right.keys {
            if !self.keys.contains(&key) {
                self.keys.push(key);
            }
        }
        Ok(self)
    }

    /// Append `inner` as new, deeper stack levels.
    pub fn nest(mut self, inner: GroupLayout) -> Self {
        let mut inner = inner.offset(self.group_count());
        self.groups_stack.append(&mut inner.groups_stack);
        self.absorb_fields(inner);
        self
    }

    /// Merge `right` into the innermost level of `self`.
    pub fn extend_innermost(mut self, right: GroupLayout) -> Self {
        let mut right = right.offset(self.group_count());
        let mut levels = std::mem::take(&mut right.groups_stack).into_iter();
        match (self.groups_stack.last_mut(), levels.next()) {
            (Some(last), Some(first)) => last.extend(first),
            (None, Some(first)) => self.groups_stack.push(first),
            _ => {}
        }
        self.groups_stack.extend(levels);
        self.absorb_fields(right);
        self
    }

    /// Fields of every group, in key order.
    pub fn input_for_groups(&self) -> BTreeMap<usize, Vec<String>> {
        let mut out: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for key in &self.keys {
            if let Some(&group) = self.group_for_inputs.get(key) {
                out.entry(group).or_default().push(key.clone());
            }
        }
        out
    }
}

/// Source of upstream nodes' final group layouts.
pub trait LayoutLookup {
    fn final_layout(&self, node: &str) -> Result<GroupLayout>;
}

impl LayoutLookup for NoUpstreams {
    fn final_layout(&self, node: &str) -> Result<GroupLayout> {
        Err(unconnected(node))
    }
}

impl LayoutLookup for BTreeMap<String, GroupLayout> {
    fn final_layout(&self, node: &str) -> Result<GroupLayout> {
        self.get(node).cloned().ok_or_else(|| unconnected(node))
    }
}

/// Evaluate a compact program into its group layout. Escape markers take
/// the upstream's final layout as a whole.
pub fn resolve_groups<L>(rpn: &Rpn, lookup: &L) -> Result<GroupLayout>
where
    L: LayoutLookup + ?Sized,
{
    rpn.validate()?;
    let mut stack: Vec<GroupLayout> = Vec::new();
    for token in rpn {
        match token {
            Token::Field(name) => stack.push(GroupLayout::leaf(name.clone())),
            Token::Upstream(node) => stack.push(lookup.final_layout(node)?),
            Token::Zip | Token::Product => {
                let (right, left) = match (stack.pop(), stack.pop()) {
                    (Some(right), Some(left)) => (right, left),
                    _ => {
                        return Err(StateError::structure(
                            ErrorCode::STRUCTURE_OPERATOR_ARITY,
                            format!("operator '{}' lacks two operands", token),
                        ))
                    }
                };
                stack.push(if *token == Token::Zip {
                    left.zip(right)?
                } else {
                    left.product(right)
                });
            }
        }
    }
    Ok(stack.pop().unwrap_or_default())
}
