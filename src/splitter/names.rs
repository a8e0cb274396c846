//! Field name qualification
//!
//! Field names are unique workflow-wide only once they carry their owning
//! node's name (`NA.a`). Splitters may only name the owner's own fields; a
//! field of another node has to be reached through that node's escape
//! marker. Combiners may name upstream fields directly.

use super::ast::{Splitter, NAME_SEPARATOR};
use crate::error::{ErrorCode, Result, StateError};

/// Split `node.field` into its parts.
pub fn split_name(name: &str) -> Option<(&str, &str)> {
    name.split_once(NAME_SEPARATOR)
}

pub fn qualified(owner: &str, field: &str) -> String {
    format!("{}{}{}", owner, NAME_SEPARATOR, field)
}

/// Qualify a splitter leaf name with `owner`.
///
/// Already-qualified names must belong to `owner`.
pub fn qualify_field(field: &str, owner: &str) -> Result<String> {
    match split_name(field) {
        None => Ok(qualified(owner, field)),
        Some((node, _)) if node == owner => Ok(field.to_string()),
        Some((node, _)) => Err(StateError::configuration_with_code(
            ErrorCode::CONFIG_FOREIGN_FIELD,
            format!(
                "field {} belongs to node {}, not {}; consider using _{} to import its splitter",
                field, node, owner, node
            ),
        )
        .with_node(owner)),
    }
}

/// Qualify every field leaf of a splitter; escape markers are kept as-is.
pub fn qualify_splitter(splitter: Splitter, owner: &str) -> Result<Splitter> {
    splitter.try_map_leaves(&|leaf| match leaf {
        Splitter::Field(name) => Ok(Splitter::Field(qualify_field(&name, owner)?)),
        other => Ok(other),
    })
}

/// Qualify combiner fields; entries naming another node are left combiners
/// and are kept verbatim.
pub fn qualify_combiner<I, S>(fields: I, owner: &str) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    fields
        .into_iter()
        .map(|field| {
            let field = field.as_ref();
            if split_name(field).is_some() {
                field.to_string()
            } else {
                qualified(owner, field)
            }
        })
        .collect()
}
