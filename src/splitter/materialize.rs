//! Index space materialization
//!
//! Evaluates a postfix program against concrete values. Every stack item is
//! an [`IndexSpace`]: a key list plus the index tuples enumerated over those
//! keys. Leaves push a fresh range, escape markers pull an upstream's final
//! enumeration, and ragged inner inputs are broadcast against the upstream
//! states they came from. Enumeration order is row-major: the last declared
//! axis varies fastest.

use super::axes::{input_shape, resolve_axes, AxisLayout, Shape};
use super::rpn::{unconnected, Rpn, Token};
use crate::error::{ErrorCode, Result, StateError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Field values keyed by qualified field name.
pub type Inputs = BTreeMap<String, Value>;

/// Enumerated index tuples over an ordered key list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSpace {
    pub keys: Vec<String>,
    pub rows: Vec<Vec<usize>>,
    pub shape: Shape,
}

impl IndexSpace {
    /// One range over all `product(shape)` flat positions of `field`.
    pub fn leaf(field: impl Into<String>, shape: Shape) -> Self {
        let size: usize = shape.iter().product();
        Self {
            keys: vec![field.into()],
            rows: (0..size).map(|i| vec![i]).collect(),
            shape,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Pair rows element by element.
    pub fn zip(mut self, right: IndexSpace) -> Result<Self> {
        if self.shape != right.shape || self.rows.len() != right.rows.len() {
            return Err(StateError::shape_mismatch(
                ErrorCode::SHAPE_ZIP_LENGTH,
                format!(
                    "cannot zip [{}] (shape {:?}) with [{}] (shape {:?})",
                    self.keys.join(", "),
                    self.shape,
                    right.keys.join(", "),
                    right.shape
                ),
            ));
        }
        let fresh: Vec<usize> = right
            .keys
            .iter()
            .enumerate()
            .filter(|(_, key)| !self.keys.contains(key))
            .map(|(pos, _)| pos)
            .collect();
        for (row, other) in self.rows.iter_mut().zip(right.rows) {
            row.extend(fresh.iter().map(|&pos| other[pos]));
        }
        self.keys.extend(fresh.iter().map(|&pos| right.keys[pos].clone()));
        Ok(self)
    }

    /// Cartesian product; the right operand varies fastest.
    pub fn product(mut self, right: IndexSpace) -> Self {
        let mut rows = Vec::with_capacity(self.rows.len() * right.rows.len());
        for row in &self.rows {
            for other in &right.rows {
                let mut combined = row.clone();
                combined.extend(other);
                rows.push(combined);
            }
        }
        self.rows = rows;
        self.keys.extend(right.keys);
        self.shape.extend(right.shape);
        self
    }
}

/// Enumerated states of one node, before and after its combiner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSpace {
    pub keys: Vec<String>,
    pub rows: Vec<Vec<usize>>,
    pub axes: AxisLayout,
    /// Flattened values of every key, addressed by that key's index.
    pub columns: BTreeMap<String, Vec<Value>>,
    pub keys_final: Vec<String>,
    pub rows_final: Vec<Vec<usize>>,
    /// Final state index to the pre-combine state indices it gathers.
    pub final_groups_mapping: Vec<Vec<usize>>,
    pub combiner_all: Vec<String>,
}

impl StateSpace {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn final_len(&self) -> usize {
        self.rows_final.len()
    }

    fn value(&self, key: &str, index: usize) -> Value {
        self.columns
            .get(key)
            .and_then(|column| column.get(index))
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn states_ind(&self) -> Vec<BTreeMap<String, usize>> {
        index_maps(&self.keys, &self.rows)
    }

    pub fn states_val(&self) -> Vec<BTreeMap<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.keys
                    .iter()
                    .zip(row)
                    .map(|(key, &i)| (key.clone(), self.value(key, i)))
                    .collect()
            })
            .collect()
    }

    pub fn states_ind_final(&self) -> Vec<BTreeMap<String, usize>> {
        index_maps(&self.keys_final, &self.rows_final)
    }

    /// Surviving fields map to their value; combined fields map to the list
    /// of values gathered from the pre-combine states.
    pub fn states_val_final(&self) -> Vec<BTreeMap<String, Value>> {
        let combined: Vec<(usize, &String)> = self
            .keys
            .iter()
            .enumerate()
            .filter(|(_, key)| self.combiner_all.contains(key))
            .collect();

        self.rows_final
            .iter()
            .zip(&self.final_groups_mapping)
            .map(|(row, members)| {
                let mut state: BTreeMap<String, Value> = self
                    .keys_final
                    .iter()
                    .zip(row)
                    .map(|(key, &i)| (key.clone(), self.value(key, i)))
                    .collect();
                for &(pos, key) in &combined {
                    let gathered = members
                        .iter()
                        .filter_map(|&m| self.rows.get(m).and_then(|r| r.get(pos)))
                        .map(|&i| self.value(key, i))
                        .collect();
                    state.insert(key.clone(), Value::Array(gathered));
                }
                state
            })
            .collect()
    }

    /// Final enumeration as an index space, for downstream escape markers.
    fn final_space(&self) -> IndexSpace {
        IndexSpace {
            keys: self.keys_final.clone(),
            rows: self.rows_final.clone(),
            shape: vec![self.rows_final.len()],
        }
    }

    fn final_columns(&self) -> impl Iterator<Item = (&String, &Vec<Value>)> {
        self.keys_final
            .iter()
            .filter_map(|key| self.columns.get_key_value(key))
    }
}

fn index_maps(keys: &[String], rows: &[Vec<usize>]) -> Vec<BTreeMap<String, usize>> {
    rows.iter()
        .map(|row| keys.iter().cloned().zip(row.iter().copied()).collect())
        .collect()
}

/// Values and upstream enumerations a program is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct MaterializeContext<'a> {
    pub inputs: &'a Inputs,
    /// Already materialized upstream nodes, by node name.
    pub upstreams: &'a BTreeMap<String, Arc<StateSpace>>,
    /// Local fields holding ragged per-upstream-state values, to the
    /// upstream node that produced them.
    pub inner_inputs: &'a BTreeMap<String, String>,
}

impl<'a> MaterializeContext<'a> {
    fn upstream(&self, node: &str) -> Result<&'a Arc<StateSpace>> {
        self.upstreams.get(node).ok_or_else(|| unconnected(node))
    }

    fn value(&self, field: &str) -> Result<&'a Value> {
        self.inputs.get(field).ok_or_else(|| {
            StateError::input(
                ErrorCode::INPUT_MISSING,
                field,
                format!("no value provided for split field {}", field),
            )
        })
    }
}

fn flatten(value: &Value, depth: usize, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) if depth > 0 => {
            for item in items {
                flatten(item, depth - 1, out);
            }
        }
        other => out.push(other.clone()),
    }
}

/// Broadcast a ragged inner input over the upstream states it came from:
/// upstream final state `j` is repeated once per element of inner list `j`.
fn broadcast(
    field: &str,
    value: &Value,
    upstream: &StateSpace,
    columns: &mut BTreeMap<String, Vec<Value>>,
) -> Result<IndexSpace> {
    let not_ragged = || {
        StateError::input(
            ErrorCode::INPUT_NOT_RAGGED,
            field,
            format!("{} must hold one list per upstream state", field),
        )
    };
    let outer = value.as_array().ok_or_else(not_ragged)?;
    if outer.len() != upstream.final_len() {
        return Err(StateError::shape_mismatch(
            ErrorCode::SHAPE_RAGGED_OUTER,
            format!(
                "{} holds {} inner lists but its upstream has {} states",
                field,
                outer.len(),
                upstream.final_len()
            ),
        ));
    }

    let mut space = upstream.final_space();
    let mut rows = Vec::new();
    let mut flat = 0usize;
    for (outer_row, inner) in space.rows.iter().zip(outer) {
        let inner = inner.as_array().ok_or_else(not_ragged)?;
        for _ in inner {
            let mut row = outer_row.clone();
            row.push(flat);
            rows.push(row);
            flat += 1;
        }
    }
    space.keys.push(field.to_string());
    space.shape = vec![rows.len()];
    space.rows = rows;

    for (key, column) in upstream.final_columns() {
        columns.insert(key.clone(), column.clone());
    }
    let mut column = Vec::with_capacity(flat);
    flatten(value, 2, &mut column);
    columns.insert(field.to_string(), column);
    Ok(space)
}

fn leaf_space(
    token: &Token,
    ctx: &MaterializeContext<'_>,
    columns: &mut BTreeMap<String, Vec<Value>>,
) -> Result<IndexSpace> {
    match token {
        Token::Field(field) => {
            let value = ctx.value(field)?;
            if let Some(node) = ctx.inner_inputs.get(field) {
                return broadcast(field, value, ctx.upstream(node)?, columns);
            }
            let shape = input_shape(value).ok_or_else(|| {
                StateError::input(
                    ErrorCode::INPUT_NOT_ARRAY,
                    field,
                    format!("split field {} must hold a list, got {}", field, value),
                )
            })?;
            let mut column = Vec::new();
            flatten(value, shape.len(), &mut column);
            columns.insert(field.clone(), column);
            Ok(IndexSpace::leaf(field.clone(), shape))
        }
        Token::Upstream(node) => {
            let upstream = ctx.upstream(node)?;
            for (key, column) in upstream.final_columns() {
                columns.insert(key.clone(), column.clone());
            }
            Ok(upstream.final_space())
        }
        Token::Zip | Token::Product => Err(StateError::structure(
            ErrorCode::STRUCTURE_GENERIC,
            format!("operator '{}' is not a leaf", token),
        )),
    }
}

/// Materialize `program`, then project the result onto the fields that
/// survive `combiner_all`.
pub fn materialize(
    program: &Rpn,
    ctx: &MaterializeContext<'_>,
    combiner_all: &[String],
) -> Result<StateSpace> {
    program.validate()?;

    let mut columns = BTreeMap::new();
    let mut leaves = Vec::with_capacity(program.len());
    let mut shapes = BTreeMap::new();
    for token in program.iter().filter(|t| !t.is_operator()) {
        let space = leaf_space(token, ctx, &mut columns)?;
        shapes.insert(token.to_string(), space.shape.clone());
        leaves.push(space);
    }
    let axes = resolve_axes(program, &shapes)?;

    let mut leaves = leaves.into_iter();
    let mut stack: Vec<IndexSpace> = Vec::new();
    for token in program {
        if !token.is_operator() {
            if let Some(space) = leaves.next() {
                stack.push(space);
            }
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
            Token::Zip => left.zip(right)?,
            _ => left.product(right),
        });
    }

    let space = stack.pop().unwrap_or_else(|| IndexSpace {
        keys: Vec::new(),
        rows: vec![Vec::new()],
        shape: Vec::new(),
    });

    let (keys_final, rows_final, final_groups_mapping) = project(&space, combiner_all);
    debug!(
        program = %program,
        states = space.rows.len(),
        final_states = rows_final.len(),
        "Materialized index space"
    );

    Ok(StateSpace {
        keys: space.keys,
        rows: space.rows,
        axes,
        columns,
        keys_final,
        rows_final,
        final_groups_mapping,
        combiner_all: combiner_all.to_vec(),
    })
}

/// Project rows onto the keys outside `combiner_all`, keeping the first
/// appearance order of every distinct projection.
fn project(
    space: &IndexSpace,
    combiner_all: &[String],
) -> (Vec<String>, Vec<Vec<usize>>, Vec<Vec<usize>>) {
    let positions: Vec<usize> = space
        .keys
        .iter()
        .enumerate()
        .filter(|(_, key)| !combiner_all.contains(key))
        .map(|(pos, _)| pos)
        .collect();
    if positions.is_empty() {
        // Everything combined: one final state gathering every row, even none.
        return (Vec::new(), vec![Vec::new()], vec![(0..space.rows.len()).collect()]);
    }
    let keys = positions.iter().map(|&p| space.keys[p].clone()).collect();

    let mut seen: BTreeMap<Vec<usize>, usize> = BTreeMap::new();
    let mut rows = Vec::new();
    let mut mapping: Vec<Vec<usize>> = Vec::new();
    for (index, row) in space.rows.iter().enumerate() {
        let projected: Vec<usize> = positions.iter().map(|&p| row[p]).collect();
        let slot = *seen.entry(projected.clone()).or_insert_with(|| {
            rows.push(projected);
            mapping.push(Vec::new());
            rows.len() - 1
        });
        mapping[slot].push(index);
    }
    (keys, rows, mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(items: &[(&str, Value)]) -> Inputs {
        items.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn run(program: &[&str], values: &Inputs, combiner_all: &[&str]) -> Result<StateSpace> {
        let upstreams = BTreeMap::new();
        let inner_inputs = BTreeMap::new();
        let ctx = MaterializeContext {
            inputs: values,
            upstreams: &upstreams,
            inner_inputs: &inner_inputs,
        };
        let combiner: Vec<String> = combiner_all.iter().map(|s| s.to_string()).collect();
        materialize(&Rpn::from_strs(program), &ctx, &combiner)
    }

    #[test]
    fn test_single_leaf() {
        let values = inputs(&[("NA.a", json!([3, 5]))]);
        let space = run(&["NA.a"], &values, &[]).unwrap();
        assert_eq!(space.rows, vec![vec![0], vec![1]]);
        assert_eq!(
            space.states_val(),
            vec![
                BTreeMap::from([("NA.a".to_string(), json!(3))]),
                BTreeMap::from([("NA.a".to_string(), json!(5))]),
            ]
        );
        assert_eq!(space.states_ind(), space.states_ind_final());
    }

    #[test]
    fn test_product_rightmost_fastest() {
        let values = inputs(&[("a", json!([3, 5])), ("b", json!(["x", "y"]))]);
        let space = run(&["a", "b", "*"], &values, &[]).unwrap();
        assert_eq!(space.rows, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
        assert_eq!(space.states_val()[1]["b"], json!("y"));
        assert_eq!(space.axes.shape, vec![2, 2]);
    }

    #[test]
    fn test_zip_pairs_and_rejects_mismatch() {
        let values = inputs(&[("a", json!([3, 5])), ("b", json!([10, 20]))]);
        let space = run(&["a", "b", "."], &values, &[]).unwrap();
        assert_eq!(space.rows, vec![vec![0, 0], vec![1, 1]]);

        let values = inputs(&[("a", json!([3, 5])), ("b", json!([10, 20, 30]))]);
        let err = run(&["a", "b", "."], &values, &[]).unwrap_err();
        assert!(matches!(err, StateError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_two_dimensional_leaf_uses_flat_range() {
        let values = inputs(&[("a", json!([[1, 2], [3, 4]]))]);
        let space = run(&["a"], &values, &[]).unwrap();
        assert_eq!(space.len(), 4);
        assert_eq!(space.states_val()[2]["a"], json!(3));
    }

    #[test]
    fn test_empty_program_has_one_state() {
        let space = run(&[], &Inputs::new(), &[]).unwrap();
        assert_eq!(space.len(), 1);
        assert_eq!(space.states_ind(), vec![BTreeMap::new()]);
        assert_eq!(space.final_len(), 1);
    }

    #[test]
    fn test_missing_and_scalar_inputs() {
        let err = run(&["a"], &Inputs::new(), &[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::INPUT_MISSING);

        let err = run(&["a"], &inputs(&[("a", json!(3))]), &[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::INPUT_NOT_ARRAY);
    }

    #[test]
    fn test_combined_projection_gathers_values() {
        let values = inputs(&[("a", json!([3, 5])), ("b", json!([10, 20]))]);
        let space = run(&["a", "b", "*"], &values, &["a"]).unwrap();
        assert_eq!(space.keys_final, vec!["b"]);
        assert_eq!(space.rows_final, vec![vec![0], vec![1]]);
        assert_eq!(space.final_groups_mapping, vec![vec![0, 2], vec![1, 3]]);
        let finals = space.states_val_final();
        assert_eq!(finals[0]["b"], json!(10));
        assert_eq!(finals[0]["a"], json!([3, 5]));
        assert_eq!(finals[1]["a"], json!([3, 5]));
    }

    #[test]
    fn test_upstream_pull_and_broadcast() {
        let values = inputs(&[("NA.a", json!([3, 5]))]);
        let upstream = Arc::new(run(&["NA.a"], &values, &[]).unwrap());
        let upstreams = BTreeMap::from([("NA".to_string(), upstream)]);

        let ctx_inputs = inputs(&[("NB.b", json!([[1, 2], [3]]))]);
        let inner_inputs = BTreeMap::from([("NB.b".to_string(), "NA".to_string())]);
        let ctx = MaterializeContext {
            inputs: &ctx_inputs,
            upstreams: &upstreams,
            inner_inputs: &inner_inputs,
        };
        let space = materialize(&Rpn::from_strs(["NB.b"]), &ctx, &[]).unwrap();
        assert_eq!(space.keys, vec!["NA.a", "NB.b"]);
        assert_eq!(space.rows, vec![vec![0, 0], vec![0, 1], vec![1, 2]]);
        assert_eq!(space.states_val()[2]["NA.a"], json!(5));
        assert_eq!(space.states_val()[2]["NB.b"], json!(3));

        let no_inner = BTreeMap::new();
        let ctx = MaterializeContext {
            inputs: &ctx_inputs,
            upstreams: &upstreams,
            inner_inputs: &no_inner,
        };
        let pulled = materialize(&Rpn::from_strs(["_NA"]), &ctx, &[]).unwrap();
        assert_eq!(pulled.keys, vec!["NA.a"]);
        assert_eq!(pulled.rows, vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_combining_everything_over_empty_input() {
        let values = inputs(&[("NA.a", json!([]))]);
        let space = run(&["NA.a"], &values, &["NA.a"]).unwrap();
        assert!(space.is_empty());
        assert!(space.keys_final.is_empty());
        assert_eq!(space.rows_final, vec![Vec::<usize>::new()]);
        assert_eq!(space.final_groups_mapping, vec![Vec::<usize>::new()]);
        assert_eq!(
            space.states_val_final(),
            vec![BTreeMap::from([("NA.a".to_string(), json!([]))])]
        );

        let values = inputs(&[("a", json!([3, 5]))]);
        let space = run(&["a"], &values, &["a"]).unwrap();
        assert_eq!(space.final_groups_mapping, vec![vec![0, 1]]);
        assert_eq!(space.states_val_final()[0]["a"], json!([3, 5]));
    }

    #[test]
    fn test_zip_of_same_upstream_keeps_one_column() {
        let values = inputs(&[("NA.a", json!([3, 5]))]);
        let upstream = Arc::new(run(&["NA.a"], &values, &[]).unwrap());
        let upstreams = BTreeMap::from([("NA".to_string(), upstream)]);
        let no_inputs = Inputs::new();
        let no_inner = BTreeMap::new();
        let ctx = MaterializeContext {
            inputs: &no_inputs,
            upstreams: &upstreams,
            inner_inputs: &no_inner,
        };
        let space = materialize(&Rpn::from_strs(["_NA", "_NA", "."]), &ctx, &[]).unwrap();
        assert_eq!(space.keys, vec!["NA.a"]);
        assert_eq!(space.rows, vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_ragged_outer_length_must_match() {
        let values = inputs(&[("NA.a", json!([3, 5]))]);
        let upstream = Arc::new(run(&["NA.a"], &values, &[]).unwrap());
        let upstreams = BTreeMap::from([("NA".to_string(), upstream)]);
        let ctx_inputs = inputs(&[("NB.b", json!([[1, 2]]))]);
        let inner_inputs = BTreeMap::from([("NB.b".to_string(), "NA".to_string())]);
        let ctx = MaterializeContext {
            inputs: &ctx_inputs,
            upstreams: &upstreams,
            inner_inputs: &inner_inputs,
        };
        let err = materialize(&Rpn::from_strs(["NB.b"]), &ctx, &[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SHAPE_RAGGED_OUTER);
    }
}
