//! Per-node state: splitter, combiner and upstream links
//!
//! A [`State`] is configured once through [`StateBuilder`] and normalized
//! eagerly: the splitter is qualified, completed with upstream markers,
//! compiled to postfix form and resolved to a group layout, and the
//! combiner is applied to both. Materialization happens later, when values
//! are known, through [`State::materialize`] or [`State::prepare_states`].
//!
//! # Examples
//!
//! ```
//! use serde_json::json;
//! use statespace::splitter::{Inputs, Splitter};
//! use statespace::state::State;
//! use std::sync::Arc;
//!
//! let na = State::builder("NA")
//!     .splitter(Splitter::parse("[a, b]").unwrap())
//!     .combiner(["a"])
//!     .build()
//!     .unwrap();
//! assert_eq!(na.splitter_rpn_final().to_strings(), vec!["NA.b"]);
//!
//! let nb = State::builder("NB").upstream(Arc::new(na), "x").build().unwrap();
//! assert_eq!(nb.splitter().map(|s| s.to_string()), Some("_NA".to_string()));
//!
//! let inputs: Inputs = [("NA.a".to_string(), json!([1, 2])), ("NA.b".to_string(), json!([3, 4]))]
//!     .into_iter()
//!     .collect();
//! let space = nb.materialize(&inputs).unwrap();
//! assert_eq!(space.len(), 2);
//! ```

pub mod connect;

use crate::error::{ErrorCode, Result, StateError};
use crate::splitter::groups::{resolve_groups, GroupLayout, LayoutLookup};
use crate::splitter::materialize::{materialize, Inputs, MaterializeContext, StateSpace};
use crate::splitter::names::{qualified, qualify_combiner, qualify_splitter};
use crate::splitter::rpn::{
    resolve_upstreams, rpn_to_splitter, splitter_to_rpn, unconnected, NoUpstreams, Rpn, Token,
    UpstreamLookup,
};
use crate::splitter::{combine, remove_from_rpn, Splitter, NAME_SEPARATOR, UPSTREAM_PREFIX};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Materialized nodes by name, shared across one materialization pass.
pub type SpaceCache = BTreeMap<String, Arc<StateSpace>>;

/// Link to an upstream node and the local field its output feeds.
#[derive(Debug, Clone)]
pub struct Upstream {
    state: Arc<State>,
    field: String,
}

impl Upstream {
    pub fn new(state: Arc<State>, field: impl Into<String>) -> Self {
        Self {
            state,
            field: field.into(),
        }
    }

    pub fn name(&self) -> &str {
        self.state.name()
    }

    pub fn state(&self) -> &Arc<State> {
        &self.state
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

/// Name lookup over a node's upstreams: direct links first, then their
/// own upstreams.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamGraph<'a> {
    upstreams: &'a [Upstream],
}

impl<'a> UpstreamGraph<'a> {
    pub fn new(upstreams: &'a [Upstream]) -> Self {
        Self { upstreams }
    }

    pub fn find(&self, node: &str) -> Option<&'a Arc<State>> {
        if let Some(direct) = self.upstreams.iter().find(|u| u.name() == node) {
            return Some(&direct.state);
        }
        self.upstreams
            .iter()
            .find_map(|u| UpstreamGraph::new(&u.state.upstreams).find(node))
    }
}

impl UpstreamLookup for UpstreamGraph<'_> {
    fn final_rpn(&self, node: &str) -> Result<Rpn> {
        self.find(node)
            .map(|state| state.splitter_rpn_final.clone())
            .ok_or_else(|| unconnected(node))
    }
}

impl LayoutLookup for UpstreamGraph<'_> {
    fn final_layout(&self, node: &str) -> Result<GroupLayout> {
        self.find(node)
            .map(|state| state.layout_final.clone())
            .ok_or_else(|| unconnected(node))
    }
}

/// Set-once configuration of a [`State`].
#[derive(Debug, Default)]
pub struct StateBuilder {
    name: String,
    splitter: Option<Splitter>,
    combiner: Option<Vec<String>>,
    upstreams: Vec<Upstream>,
    repeated: Vec<&'static str>,
}

impl StateBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn splitter(mut self, splitter: Splitter) -> Self {
        if self.splitter.replace(splitter).is_some() {
            self.repeated.push("splitter");
        }
        self
    }

    /// Set the splitter from its bracket notation.
    pub fn parse_splitter(self, text: &str) -> Result<Self> {
        Ok(self.splitter(Splitter::parse(text)?))
    }

    pub fn combiner<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = fields.into_iter().map(Into::into).collect();
        if self.combiner.replace(fields).is_some() {
            self.repeated.push("combiner");
        }
        self
    }

    /// Connect an upstream node whose output feeds local field `field`.
    pub fn upstream(mut self, state: Arc<State>, field: impl Into<String>) -> Self {
        self.upstreams.push(Upstream::new(state, field));
        self
    }

    fn validate(&self) -> Result<()> {
        let name = &self.name;
        if name.is_empty() || name.contains(NAME_SEPARATOR) || name.starts_with(UPSTREAM_PREFIX)
        {
            return Err(StateError::configuration_with_code(
                ErrorCode::CONFIG_INVALID_NAME,
                format!(
                    "node name '{}' must be non-empty, without '{}' and not starting with '{}'",
                    name, NAME_SEPARATOR, UPSTREAM_PREFIX
                ),
            ));
        }
        if let Some(attr) = self.repeated.first() {
            return Err(StateError::configuration_with_code(
                ErrorCode::CONFIG_ALREADY_SET,
                format!("{} can only be set once", attr),
            )
            .with_node(name));
        }
        for (i, upstream) in self.upstreams.iter().enumerate() {
            if upstream.name() == name {
                return Err(StateError::configuration_with_code(
                    ErrorCode::CONFIG_DUPLICATE_UPSTREAM,
                    "a node cannot be its own upstream",
                )
                .with_node(name));
            }
            if self.upstreams[..i].iter().any(|u| u.name() == upstream.name()) {
                return Err(StateError::configuration_with_code(
                    ErrorCode::CONFIG_DUPLICATE_UPSTREAM,
                    format!("upstream {} is connected more than once", upstream.name()),
                )
                .with_node(name));
            }
        }
        Ok(())
    }

    /// Normalize the configuration into a [`State`].
    pub fn build(self) -> Result<State> {
        self.validate()?;
        let StateBuilder {
            name,
            splitter,
            combiner,
            upstreams,
            ..
        } = self;
        State::normalize(name, splitter, combiner.unwrap_or_default(), upstreams)
    }
}

/// One node's splitter/combiner configuration and its enumeration.
#[derive(Debug, Clone)]
pub struct State {
    name: String,
    splitter: Option<Splitter>,
    left_splitter: Option<Splitter>,
    right_splitter: Option<Splitter>,
    combiner: Vec<String>,
    upstreams: Vec<Upstream>,
    /// Local fields fed with ragged values, to the upstream that fans them.
    inner_inputs: BTreeMap<String, String>,
    splitter_rpn_compact: Rpn,
    splitter_rpn: Rpn,
    layout: GroupLayout,
    splitter_final: Option<Splitter>,
    splitter_rpn_final: Rpn,
    layout_final: GroupLayout,
    combiner_all: Vec<String>,
    /// Compact program with the markers of inner-input upstreams removed.
    program: Rpn,
    space: Option<Arc<StateSpace>>,
}

impl State {
    pub fn builder(name: impl Into<String>) -> StateBuilder {
        StateBuilder::new(name)
    }

    fn normalize(
        name: String,
        declared: Option<Splitter>,
        combiner: Vec<String>,
        upstreams: Vec<Upstream>,
    ) -> Result<Self> {
        let in_node = |e: StateError| e.with_node(&name);
        let graph = UpstreamGraph::new(&upstreams);

        let declared = declared
            .map(|s| qualify_splitter(s, &name))
            .transpose()?;
        let connection = connect::connect(declared, &upstreams, &graph).map_err(in_node)?;

        let splitter_rpn_compact = match &connection.splitter {
            Some(splitter) => splitter_to_rpn(splitter)?,
            None => Rpn::default(),
        };
        let splitter_rpn = resolve_upstreams(&splitter_rpn_compact, &graph).map_err(in_node)?;

        let inner_inputs: BTreeMap<String, String> = upstreams
            .iter()
            .filter(|u| !u.state.splitter_rpn_final.is_empty())
            .filter_map(|u| {
                let field = qualified(&name, u.field());
                splitter_rpn
                    .contains_field(&field)
                    .then(|| (field, u.name().to_string()))
            })
            .collect();
        check_inner_upstreams(&inner_inputs, connection.left.as_ref()).map_err(in_node)?;

        let left_layout = match &connection.left {
            Some(left) => resolve_groups(&splitter_to_rpn(left)?, &graph)?,
            None => GroupLayout::default(),
        };
        let right_layout = match &connection.right {
            Some(right) => resolve_groups(&splitter_to_rpn(right)?, &NoUpstreams)?,
            None => GroupLayout::default(),
        };
        let layout = if inner_inputs.is_empty() {
            left_layout.extend_innermost(right_layout)
        } else {
            left_layout.nest(right_layout)
        };

        let combiner = qualify_combiner(combiner, &name);
        let combination = combine(&splitter_rpn, &layout, &combiner).map_err(in_node)?;
        let splitter_final = if combination.combiner_all.is_empty() {
            connection.splitter.clone()
        } else {
            final_splitter(&splitter_rpn_compact, &combination.combiner_all, &graph)?
        };

        let inner_markers: Vec<String> = inner_inputs
            .values()
            .map(|node| Token::Upstream(node.clone()).to_string())
            .collect();
        let program = remove_from_rpn(&splitter_rpn_compact, &inner_markers)?;

        debug!(
            node = %name,
            splitter = ?connection.splitter.as_ref().map(ToString::to_string),
            rpn = %splitter_rpn,
            rpn_final = %combination.rpn,
            inner_inputs = ?inner_inputs,
            "Normalized node state"
        );

        Ok(Self {
            name,
            splitter: connection.splitter,
            left_splitter: connection.left,
            right_splitter: connection.right,
            combiner,
            upstreams,
            inner_inputs,
            splitter_rpn_compact,
            splitter_rpn,
            layout,
            splitter_final,
            splitter_rpn_final: combination.rpn,
            layout_final: combination.layout,
            combiner_all: combination.combiner_all,
            program,
            space: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Qualified, upstream-completed splitter.
    pub fn splitter(&self) -> Option<&Splitter> {
        self.splitter.as_ref()
    }

    pub fn left_splitter(&self) -> Option<&Splitter> {
        self.left_splitter.as_ref()
    }

    pub fn right_splitter(&self) -> Option<&Splitter> {
        self.right_splitter.as_ref()
    }

    pub fn combiner(&self) -> &[String] {
        &self.combiner
    }

    pub fn upstreams(&self) -> &[Upstream] {
        &self.upstreams
    }

    pub fn upstream_graph(&self) -> UpstreamGraph<'_> {
        UpstreamGraph::new(&self.upstreams)
    }

    pub fn inner_inputs(&self) -> &BTreeMap<String, String> {
        &self.inner_inputs
    }

    /// Postfix program with escape markers resolved to upstream fields.
    pub fn splitter_rpn(&self) -> &Rpn {
        &self.splitter_rpn
    }

    /// Postfix program with escape markers kept.
    pub fn splitter_rpn_compact(&self) -> &Rpn {
        &self.splitter_rpn_compact
    }

    pub fn keys(&self) -> &[String] {
        &self.layout.keys
    }

    pub fn group_for_inputs(&self) -> &BTreeMap<String, usize> {
        &self.layout.group_for_inputs
    }

    pub fn groups_stack(&self) -> &[Vec<usize>] {
        &self.layout.groups_stack
    }

    pub fn splitter_final(&self) -> Option<&Splitter> {
        self.splitter_final.as_ref()
    }

    pub fn splitter_rpn_final(&self) -> &Rpn {
        &self.splitter_rpn_final
    }

    pub fn layout_final(&self) -> &GroupLayout {
        &self.layout_final
    }

    pub fn keys_final(&self) -> &[String] {
        &self.layout_final.keys
    }

    pub fn group_for_inputs_final(&self) -> &BTreeMap<String, usize> {
        &self.layout_final.group_for_inputs
    }

    pub fn groups_stack_final(&self) -> &[Vec<usize>] {
        &self.layout_final.groups_stack
    }

    /// Fields retired by the combiner, explicitly or through a shared group.
    pub fn combiner_all(&self) -> &[String] {
        &self.combiner_all
    }

    /// Enumerate this node's states against `inputs`, materializing
    /// upstream nodes as needed. Pure; see [`State::prepare_states`].
    pub fn materialize(&self, inputs: &Inputs) -> Result<StateSpace> {
        let mut cache = SpaceCache::new();
        let space = self.materialize_cached(inputs, &mut cache)?;
        Ok(Arc::try_unwrap(space).unwrap_or_else(|shared| (*shared).clone()))
    }

    /// Like [`State::materialize`], reusing nodes already in `cache`.
    pub fn materialize_cached(
        &self,
        inputs: &Inputs,
        cache: &mut SpaceCache,
    ) -> Result<Arc<StateSpace>> {
        if let Some(hit) = cache.get(&self.name) {
            return Ok(Arc::clone(hit));
        }

        let graph = self.upstream_graph();
        let mut needed: Vec<&str> = self.program.upstreams();
        needed.extend(self.inner_inputs.values().map(String::as_str));

        let mut upstream_spaces = BTreeMap::new();
        for node in needed {
            let state = graph.find(node).ok_or_else(|| unconnected(node))?;
            let space = state.materialize_cached(inputs, cache)?;
            upstream_spaces.insert(node.to_string(), space);
        }

        let ctx = MaterializeContext {
            inputs,
            upstreams: &upstream_spaces,
            inner_inputs: &self.inner_inputs,
        };
        let space = Arc::new(materialize(&self.program, &ctx, &self.combiner_all)?);
        debug!(
            node = %self.name,
            states = space.len(),
            final_states = space.final_len(),
            "Prepared node states"
        );
        cache.insert(self.name.clone(), Arc::clone(&space));
        Ok(space)
    }

    /// Materialize and keep the enumeration on this state.
    pub fn prepare_states(&mut self, inputs: &Inputs) -> Result<()> {
        let space = self.materialize(inputs)?;
        self.space = Some(Arc::new(space));
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.space.is_some()
    }

    /// Stored enumeration, once [`State::prepare_states`] has run.
    pub fn space(&self) -> Option<&StateSpace> {
        self.space.as_deref()
    }

    /// Index assignments in enumeration order; empty until prepared.
    pub fn states_ind(&self) -> Vec<BTreeMap<String, usize>> {
        self.space().map(StateSpace::states_ind).unwrap_or_default()
    }

    /// Value assignments in enumeration order; empty until prepared.
    pub fn states_val(&self) -> Vec<BTreeMap<String, Value>> {
        self.space().map(StateSpace::states_val).unwrap_or_default()
    }

    pub fn states_ind_final(&self) -> Vec<BTreeMap<String, usize>> {
        self.space()
            .map(StateSpace::states_ind_final)
            .unwrap_or_default()
    }

    pub fn states_val_final(&self) -> Vec<BTreeMap<String, Value>> {
        self.space()
            .map(StateSpace::states_val_final)
            .unwrap_or_default()
    }

    pub fn final_groups_mapping(&self) -> &[Vec<usize>] {
        self.space()
            .map(|space| space.final_groups_mapping.as_slice())
            .unwrap_or(&[])
    }
}

/// Top-level factors of a product, flattened; any other splitter is its own
/// single term.
fn product_terms(splitter: &Splitter) -> Vec<&Splitter> {
    match splitter {
        Splitter::Product(children) => children.iter().flat_map(product_terms).collect(),
        other => vec![other],
    }
}

/// An upstream that feeds an inner input has its marker dropped from the
/// program and its states broadcast through the ragged input, so it can only
/// appear as a product factor of the upstream part.
fn check_inner_upstreams(
    inner_inputs: &BTreeMap<String, String>,
    left: Option<&Splitter>,
) -> Result<()> {
    let terms = left.map(product_terms).unwrap_or_default();
    for (field, node) in inner_inputs {
        let marker = Splitter::Upstream(node.clone());
        if !terms.contains(&&marker) {
            return Err(StateError::configuration_with_code(
                ErrorCode::CONFIG_INNER_INPUT_ZIP,
                format!(
                    "upstream {} feeds inner input {} and must be a product term of {}",
                    node,
                    field,
                    left.map(ToString::to_string).unwrap_or_default()
                ),
            ));
        }
    }
    Ok(())
}

/// Compact final splitter: markers whose upstream keeps all of its fields
/// stay markers, the others are expanded before the retired fields are
/// removed.
fn final_splitter(
    compact: &Rpn,
    combiner_all: &[String],
    graph: &UpstreamGraph<'_>,
) -> Result<Option<Splitter>> {
    let mut tokens = Vec::with_capacity(compact.len());
    for token in compact {
        match token {
            Token::Upstream(node) => {
                let upstream = graph.final_rpn(node)?;
                if upstream
                    .fields()
                    .iter()
                    .any(|f| combiner_all.iter().any(|c| c == f))
                {
                    tokens.extend(upstream.into_tokens());
                } else {
                    tokens.push(token.clone());
                }
            }
            other => tokens.push(other.clone()),
        }
    }
    let reduced = remove_from_rpn(&Rpn::new(tokens), combiner_all)?;
    rpn_to_splitter(&reduced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sp(text: &str) -> Splitter {
        Splitter::parse(text).unwrap()
    }

    #[test]
    fn test_builder_rejects_repeated_splitter() {
        let err = State::builder("NA")
            .splitter(sp("a"))
            .splitter(sp("b"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_ALREADY_SET);
    }

    #[test]
    fn test_builder_rejects_bad_names() {
        for name in ["", "N.A", "_NA"] {
            let err = State::builder(name).build().unwrap_err();
            assert_eq!(err.code(), ErrorCode::CONFIG_INVALID_NAME);
        }
    }

    #[test]
    fn test_duplicate_upstream() {
        let na = Arc::new(State::builder("NA").splitter(sp("a")).build().unwrap());
        let err = State::builder("NB")
            .upstream(Arc::clone(&na), "x")
            .upstream(na, "y")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_DUPLICATE_UPSTREAM);
    }

    #[test]
    fn test_no_splitter_single_state() {
        let mut st = State::builder("NA").build().unwrap();
        assert!(st.splitter().is_none());
        assert!(st.splitter_rpn().is_empty());
        st.prepare_states(&Inputs::new()).unwrap();
        assert_eq!(st.states_ind(), vec![BTreeMap::new()]);
    }

    #[test]
    fn test_unprepared_state_has_no_states() {
        let st = State::builder("NA").splitter(sp("a")).build().unwrap();
        assert!(!st.is_prepared());
        assert!(st.states_val().is_empty());
        assert!(st.final_groups_mapping().is_empty());
    }

    #[test]
    fn test_transitive_marker_resolution() {
        let na = Arc::new(State::builder("NA").splitter(sp("a")).build().unwrap());
        let nb = Arc::new(State::builder("NB").upstream(na, "x").build().unwrap());
        let nc = State::builder("NC")
            .splitter(sp("(_NB, _NA)"))
            .upstream(nb, "y")
            .build()
            .unwrap();
        assert_eq!(nc.splitter_rpn().to_strings(), vec!["NA.a", "NA.a", "."]);
        assert_eq!(nc.groups_stack_final(), [vec![0]]);
        assert_eq!(nc.keys(), ["NA.a"]);
        assert_eq!(nc.keys_final(), ["NA.a"]);

        let inputs: Inputs = [("NA.a".to_string(), json!([1, 2]))].into_iter().collect();
        let space = nc.materialize(&inputs).unwrap();
        assert_eq!(space.keys, vec!["NA.a"]);
        assert_eq!(space.rows, vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_materialize_is_repeatable() {
        let st = State::builder("NA").splitter(sp("[a, b]")).build().unwrap();
        let inputs: Inputs = [
            ("NA.a".to_string(), json!([1, 2])),
            ("NA.b".to_string(), json!(["x", "y", "z"])),
        ]
        .into_iter()
        .collect();
        let first = st.materialize(&inputs).unwrap();
        let second = st.materialize(&inputs).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 6);
    }

    #[test]
    fn test_left_combiner_on_upstream_field() {
        let na = Arc::new(State::builder("NA").splitter(sp("[a, b]")).build().unwrap());
        let nb = State::builder("NB")
            .combiner(["NA.a"])
            .upstream(na, "x")
            .build()
            .unwrap();
        assert_eq!(nb.combiner(), ["NA.a".to_string()]);
        assert_eq!(nb.splitter_rpn_final().to_strings(), vec!["NA.b"]);
        assert_eq!(nb.splitter_final(), Some(&sp("NA.b")));
    }
}
