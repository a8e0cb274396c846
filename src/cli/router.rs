//! Command routing and execution

use crate::app::{AppConfig, OutputFormat};
use crate::cli::args::Commands;
use crate::error::StateError;
use crate::plan::{Plan, PlanConfig};
use crate::splitter::groups::resolve_groups;
use crate::splitter::materialize::StateSpace;
use crate::splitter::names::qualify_splitter;
use crate::splitter::rpn::{rpn_to_splitter, splitter_to_rpn, NoUpstreams};
use crate::splitter::Splitter;
use crate::state::State;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

/// Execute a CLI command, returning what should be printed on stdout
pub fn execute_command(command: Commands, config: &AppConfig) -> Result<String> {
    match command {
        Commands::Plan { file, node } => run_plan(&file, node.as_deref(), config.format),
        Commands::Rpn { splitter, node } => run_rpn(&splitter, node.as_deref(), config.format),
    }
}

fn run_plan(file: &Path, only: Option<&str>, format: OutputFormat) -> Result<String> {
    let config = PlanConfig::load(file)?;
    let plan = Plan::build(&config)
        .map_err(anyhow::Error::new)
        .with_context(|| format!("Failed to build plan {}", file.display()))?;
    if let Some(name) = only {
        if plan.state(name).is_none() {
            return Err(anyhow::Error::new(StateError::configuration(format!(
                "plan has no node named {}",
                name
            ))));
        }
    }
    let spaces = plan.materialize()?;
    let selected: Vec<_> = spaces
        .iter()
        .filter(|(state, _)| only.map_or(true, |name| state.name() == name))
        .collect();

    match format {
        OutputFormat::Json => {
            let nodes: Vec<Value> = selected
                .iter()
                .map(|(state, space)| node_json(state, space))
                .collect();
            Ok(serde_json::to_string_pretty(&json!({ "nodes": nodes }))?)
        }
        OutputFormat::Text => {
            let mut out = String::new();
            for (state, space) in selected {
                write_node_text(&mut out, state, space)?;
            }
            Ok(out)
        }
    }
}

fn splitter_text(splitter: Option<&Splitter>) -> String {
    splitter.map_or_else(|| "-".to_string(), ToString::to_string)
}

fn node_json(state: &State, space: &StateSpace) -> Value {
    json!({
        "name": state.name(),
        "splitter": state.splitter().map(ToString::to_string),
        "splitter_rpn": state.splitter_rpn(),
        "combiner": state.combiner(),
        "splitter_final": state.splitter_final().map(ToString::to_string),
        "splitter_rpn_final": state.splitter_rpn_final(),
        "keys_final": state.keys_final(),
        "group_for_inputs_final": state.group_for_inputs_final(),
        "groups_stack_final": state.groups_stack_final(),
        "combiner_all": state.combiner_all(),
        "states_ind": space.states_ind(),
        "states_val": space.states_val(),
        "states_ind_final": space.states_ind_final(),
        "states_val_final": space.states_val_final(),
        "final_groups_mapping": space.final_groups_mapping,
    })
}

fn format_state<V: std::fmt::Display>(state: &BTreeMap<String, V>) -> String {
    state
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(" ")
}

fn write_node_text(out: &mut String, state: &State, space: &StateSpace) -> std::fmt::Result {
    writeln!(out, "node {}", state.name())?;
    writeln!(out, "  splitter:       {}", splitter_text(state.splitter()))?;
    writeln!(out, "  splitter_rpn:   {}", state.splitter_rpn())?;
    if !state.combiner().is_empty() {
        writeln!(out, "  combiner:       {}", state.combiner().join(", "))?;
        writeln!(out, "  splitter_final: {}", splitter_text(state.splitter_final()))?;
        writeln!(out, "  rpn_final:      {}", state.splitter_rpn_final())?;
    }
    writeln!(out, "  groups_final:   {}", format_state(state.group_for_inputs_final()))?;
    writeln!(out, "  groups_stack:   {:?}", state.groups_stack_final())?;
    writeln!(out, "  states ({}):", space.len())?;
    for (i, values) in space.states_val().iter().enumerate() {
        writeln!(out, "    {}: {}", i, format_state(values))?;
    }
    if !space.combiner_all.is_empty() {
        writeln!(out, "  final states ({}):", space.final_len())?;
        for (i, values) in space.states_val_final().iter().enumerate() {
            writeln!(out, "    {}: {}", i, format_state(values))?;
        }
    }
    Ok(())
}

fn run_rpn(text: &str, node: Option<&str>, format: OutputFormat) -> Result<String> {
    let mut splitter = Splitter::parse(text).map_err(anyhow::Error::new)?;
    if let Some(owner) = node {
        splitter = qualify_splitter(splitter, owner)?;
    }
    let rpn = splitter_to_rpn(&splitter)?;
    let rebuilt = rpn_to_splitter(&rpn)?;
    let layout = if splitter.upstreams().is_empty() {
        Some(resolve_groups(&rpn, &NoUpstreams)?)
    } else {
        None
    };

    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&json!({
            "splitter": splitter.to_string(),
            "rpn": rpn,
            "rebuilt": rebuilt.map(|s| s.to_string()),
            "layout": layout,
        }))?),
        OutputFormat::Text => {
            let mut out = String::new();
            writeln!(out, "splitter: {}", splitter)?;
            writeln!(out, "rpn:      {}", rpn)?;
            writeln!(out, "rebuilt:  {}", splitter_text(rebuilt.as_ref()))?;
            if let Some(layout) = layout {
                writeln!(out, "groups:   {}", format_state(&layout.group_for_inputs))?;
                writeln!(out, "stack:    {:?}", layout.groups_stack)?;
            }
            Ok(out)
        }
    }
}
