//! Splitter/combiner algebra
//!
//! Pure building blocks used by [`crate::state::State`]:
//!
//! - [`ast`]: the tagged splitter tree and its bracket notation
//! - [`names`]: node-qualified field names
//! - [`rpn`]: postfix programs and conversion to and from splitters
//! - [`axes`]: shape-aware axis resolution
//! - [`groups`]: shape-free group layouts and the groups stack
//! - [`combine`]: combiner reduction of programs and layouts
//! - [`materialize`]: enumeration of concrete index spaces

pub mod ast;
pub mod axes;
pub mod combine;
pub mod groups;
pub mod materialize;
pub mod names;
pub mod rpn;

pub use ast::{Splitter, NAME_SEPARATOR, UPSTREAM_PREFIX};
pub use axes::{input_shape, resolve_axes, AxisLayout, Shape};
pub use combine::{combine, reduce_layout, remove_from_rpn, Combination};
pub use groups::{resolve_groups, GroupLayout, LayoutLookup};
pub use materialize::{materialize, IndexSpace, Inputs, MaterializeContext, StateSpace};
pub use names::{qualify_combiner, qualify_field, qualify_splitter, split_name};
pub use rpn::{
    resolve_upstreams, rpn_to_splitter, splitter_to_rpn, splitter_to_rpn_resolved, NoUpstreams,
    Rpn, Token, UpstreamLookup,
};
