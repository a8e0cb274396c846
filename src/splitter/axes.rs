//! Shape-aware axis resolution
//!
//! Once concrete values are known every program leaf has a shape. Walking
//! the postfix program assigns each leaf the axes of the final index space
//! it spans: zipped operands share axes (and must have equal shapes),
//! product operands sit side by side with the right operand's axes shifted
//! past the left operand's.

use super::rpn::{Rpn, Token};
use crate::error::{ErrorCode, Result, StateError};
use serde_json::Value;
use std::collections::BTreeMap;

pub type Shape = Vec<usize>;

/// Infer the split shape of a field value.
///
/// The outer array contributes the first axis; nested arrays contribute
/// further axes while every element at that level has the same shape.
pub fn input_shape(value: &Value) -> Option<Shape> {
    let items = value.as_array()?;
    let mut shape = vec![items.len()];
    let inner: Option<Vec<Shape>> = items.iter().map(input_shape).collect();
    if let Some(inner) = inner {
        if let Some(first) = inner.first() {
            if inner.iter().all(|s| s == first) {
                shape.extend(first);
            }
        }
    }
    Some(shape)
}

/// Axis assignment of a postfix program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxisLayout {
    /// Program leaf (wire form) to the axes it spans.
    pub axis_for_input: BTreeMap<String, Vec<usize>>,
    pub ndim: usize,
    pub shape: Shape,
}

impl AxisLayout {
    fn leaf(name: String, shape: Shape) -> Self {
        let axes = (0..shape.len()).collect();
        let mut axis_for_input = BTreeMap::new();
        axis_for_input.insert(name, axes);
        Self {
            axis_for_input,
            ndim: shape.len(),
            shape,
        }
    }

    fn product(mut self, right: AxisLayout) -> Self {
        let offset = self.ndim;
        for (name, axes) in right.axis_for_input {
            self.axis_for_input
                .insert(name, axes.into_iter().map(|a| a + offset).collect());
        }
        self.shape.extend(right.shape);
        self.ndim = self.shape.len();
        self
    }

    fn zip(mut self, right: AxisLayout) -> Result<Self> {
        if self.shape != right.shape {
            return Err(StateError::shape_mismatch(
                ErrorCode::SHAPE_ZIP_LENGTH,
                format!(
                    "zipped operands have shapes {:?} and {:?} ({} vs {})",
                    self.shape,
                    right.shape,
                    self.axis_for_input.keys().cloned().collect::<Vec<_>>().join(", "),
                    right.axis_for_input.keys().cloned().collect::<Vec<_>>().join(", "),
                ),
            ));
        }
        self.axis_for_input.extend(right.axis_for_input);
        Ok(self)
    }

    /// Inverse view: for every axis, the leaves spanning it.
    pub fn input_for_axis(&self) -> Vec<Vec<String>> {
        let mut out = vec![Vec::new(); self.ndim];
        for (name, axes) in &self.axis_for_input {
            for &axis in axes {
                if let Some(slot) = out.get_mut(axis) {
                    slot.push(name.clone());
                }
            }
        }
        out
    }
}

/// Resolve axes for `rpn` given the shape of every leaf, keyed by the
/// leaf's wire form (`NA.a`, `_NA`).
pub fn resolve_axes(rpn: &Rpn, shapes: &BTreeMap<String, Shape>) -> Result<AxisLayout> {
    rpn.validate()?;
    let mut stack: Vec<AxisLayout> = Vec::new();
    for token in rpn {
        match token {
            Token::Field(_) | Token::Upstream(_) => {
                let name = token.to_string();
                let shape = shapes.get(&name).cloned().ok_or_else(|| {
                    StateError::input(
                        ErrorCode::INPUT_MISSING,
                        name.clone(),
                        format!("no shape known for {}", name),
                    )
                })?;
                stack.push(AxisLayout::leaf(name, shape));
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shapes(items: &[(&str, &[usize])]) -> BTreeMap<String, Shape> {
        items
            .iter()
            .map(|(name, shape)| (name.to_string(), shape.to_vec()))
            .collect()
    }

    #[test]
    fn test_input_shape() {
        assert_eq!(input_shape(&json!([1, 2, 3])), Some(vec![3]));
        assert_eq!(input_shape(&json!([[1, 2], [3, 4], [5, 6]])), Some(vec![3, 2]));
        assert_eq!(input_shape(&json!([[1, 2], [3]])), Some(vec![2]));
        assert_eq!(input_shape(&json!([])), Some(vec![0]));
        assert_eq!(input_shape(&json!(3)), None);
    }

    #[test]
    fn test_product_offsets_right_axes() {
        let rpn = Rpn::from_strs(["NA.a", "NA.b", "*"]);
        let layout = resolve_axes(&rpn, &shapes(&[("NA.a", &[2]), ("NA.b", &[3, 4])])).unwrap();
        assert_eq!(layout.shape, vec![2, 3, 4]);
        assert_eq!(layout.ndim, 3);
        assert_eq!(layout.axis_for_input["NA.a"], vec![0]);
        assert_eq!(layout.axis_for_input["NA.b"], vec![1, 2]);
        assert_eq!(
            layout.input_for_axis(),
            vec![vec!["NA.a".to_string()], vec!["NA.b".to_string()], vec!["NA.b".to_string()]]
        );
    }

    #[test]
    fn test_zip_shares_axes() {
        let rpn = Rpn::from_strs(["a", "b", "c", "*", "."]);
        let layout =
            resolve_axes(&rpn, &shapes(&[("a", &[2, 3]), ("b", &[2]), ("c", &[3])])).unwrap();
        assert_eq!(layout.shape, vec![2, 3]);
        assert_eq!(layout.axis_for_input["a"], vec![0, 1]);
        assert_eq!(layout.axis_for_input["b"], vec![0]);
        assert_eq!(layout.axis_for_input["c"], vec![1]);
    }

    #[test]
    fn test_zip_shape_mismatch() {
        let rpn = Rpn::from_strs(["a", "b", "."]);
        let err = resolve_axes(&rpn, &shapes(&[("a", &[2]), ("b", &[3])])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SHAPE_ZIP_LENGTH);
    }

    #[test]
    fn test_missing_shape_is_input_error() {
        let rpn = Rpn::from_strs(["a"]);
        let err = resolve_axes(&rpn, &BTreeMap::new()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::INPUT_MISSING);
    }

    #[test]
    fn test_empty_program() {
        let layout = resolve_axes(&Rpn::default(), &BTreeMap::new()).unwrap();
        assert_eq!(layout, AxisLayout::default());
    }
}
