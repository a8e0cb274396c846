//! Property tests for splitter normalization and enumeration
//!
//! - Notation and postfix conversions are lossless
//! - Enumeration size follows the splitter algebra
//! - Materialization is deterministic
//! - Combining every field leaves exactly one final state

use proptest::prelude::*;
use serde_json::{json, Value};
use statespace::splitter::rpn::{rpn_to_splitter, splitter_to_rpn};
use statespace::splitter::{Inputs, Splitter};
use statespace::state::State;

/// Splitter structure over distinct fields `f0..`. A zip pairs two copies
/// of the same structure, so both operands always have equal sizes.
#[derive(Debug, Clone)]
enum Shape {
    Field,
    Zip(Box<Shape>),
    Product(Vec<Shape>),
}

fn shape_strategy() -> impl Strategy<Value = Shape> {
    let leaf = Just(Shape::Field);
    leaf.prop_recursive(3, 8, 3, |inner| {
        prop_oneof![
            inner.clone().prop_map(|s| Shape::Zip(Box::new(s))),
            prop::collection::vec(inner, 2..4).prop_map(Shape::Product),
        ]
    })
}

/// Render a shape as a splitter, returning the number of states it yields
/// when every field holds `len` values, and the inputs it needs.
fn build(shape: &Shape, next: &mut usize, len: usize, inputs: &mut Inputs) -> (Splitter, usize) {
    match shape {
        Shape::Field => {
            let name = format!("f{}", next);
            *next += 1;
            let values: Vec<Value> = (0..len).map(|i| json!(i)).collect();
            inputs.insert(format!("NA.{}", name), Value::Array(values));
            (Splitter::field(name), len)
        }
        Shape::Zip(inner) => {
            let (left, count) = build(inner, next, len, inputs);
            let (right, _) = build(inner, next, len, inputs);
            (Splitter::zip(left, right), count)
        }
        Shape::Product(children) => {
            let mut parts = Vec::new();
            let mut count = 1;
            for child in children {
                let (splitter, n) = build(child, next, len, inputs);
                parts.push(splitter);
                count *= n;
            }
            (Splitter::Product(parts), count)
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_notation_round_trip(shape in shape_strategy()) {
        let mut inputs = Inputs::new();
        let (splitter, _) = build(&shape, &mut 0, 2, &mut inputs);
        let reparsed = Splitter::parse(&splitter.to_string()).unwrap();
        prop_assert_eq!(&reparsed, &splitter);
    }

    #[test]
    fn test_postfix_round_trip_preserves_program(shape in shape_strategy()) {
        let mut inputs = Inputs::new();
        let (splitter, _) = build(&shape, &mut 0, 2, &mut inputs);
        let rpn = splitter_to_rpn(&splitter).unwrap();
        let rebuilt = rpn_to_splitter(&rpn).unwrap().unwrap();
        prop_assert_eq!(splitter_to_rpn(&rebuilt).unwrap(), rpn);
    }

    #[test]
    fn test_state_count_follows_algebra(shape in shape_strategy(), len in 1usize..3) {
        let mut inputs = Inputs::new();
        let (splitter, expected) = build(&shape, &mut 0, len, &mut inputs);
        let st = State::builder("NA").splitter(splitter).build().unwrap();
        let space = st.materialize(&inputs).unwrap();
        prop_assert_eq!(space.len(), expected);
        prop_assert_eq!(space.final_len(), expected);
    }

    #[test]
    fn test_materialize_is_deterministic(shape in shape_strategy()) {
        let mut inputs = Inputs::new();
        let (splitter, _) = build(&shape, &mut 0, 2, &mut inputs);
        let st = State::builder("NA").splitter(splitter).build().unwrap();
        prop_assert_eq!(st.materialize(&inputs).unwrap(), st.materialize(&inputs).unwrap());
    }

    #[test]
    fn test_combining_every_field_leaves_one_state(fields in 1usize..4, len in 1usize..4) {
        let names: Vec<String> = (0..fields).map(|i| format!("f{}", i)).collect();
        let splitter = match names.len() {
            1 => Splitter::field(names[0].clone()),
            _ => Splitter::Product(names.iter().cloned().map(Splitter::field).collect()),
        };
        let inputs: Inputs = names
            .iter()
            .map(|n| (format!("NA.{}", n), Value::Array((0..len).map(|i| json!(i)).collect())))
            .collect();
        let st = State::builder("NA")
            .splitter(splitter)
            .combiner(names.clone())
            .build()
            .unwrap();
        prop_assert!(st.splitter_rpn_final().is_empty());

        let space = st.materialize(&inputs).unwrap();
        prop_assert_eq!(space.len(), len.pow(fields as u32));
        prop_assert_eq!(space.final_len(), 1);
        prop_assert_eq!(space.final_groups_mapping[0].len(), space.len());
    }
}
