//! # statespace
//!
//! Splitter/combiner state algebra for dataflow pipeline nodes.
//!
//! A node declares a *splitter* over its input fields (scalar splitters
//! `(a, b)` zip, outer splitters `[a, b]` take the cartesian product) and an
//! optional *combiner* that collapses some of those dimensions again. Nodes
//! connected to upstream nodes inherit the upstream state space through
//! `_Node` markers. This crate normalizes those declarations into postfix
//! programs, tracks group layouts and enumerates the resulting states.
//!
//! ## Usage
//!
//! ```bash
//! statespace plan pipeline.yaml [--node NB] [--format json]
//! statespace rpn "[a, (b, c)]" [--node NA]
//! ```
//!
//! ## Modules
//!
//! - `splitter` - Splitter notation, postfix programs, group layouts and materialization
//! - `state` - Per-node state construction and connection to upstream nodes
//! - `plan` - Plan files: many nodes, ordered and materialized together
//! - `error` - Error types with stable error codes
//! - `app` - Logging, configuration and fatal error handling for the binary
//! - `cli` - Command line interface
pub mod app;
pub mod cli;
pub mod error;
pub mod plan;
pub mod splitter;
pub mod state;

pub use error::{Result, StateError};
pub use splitter::Splitter;
pub use state::{State, StateBuilder};
