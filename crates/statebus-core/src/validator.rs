// ── Validator ──
//
// Applies mutations to a working copy of an entry's running config,
// validates the result and only then commits it. A rejected mutation
// leaves the running config untouched.

use serde_json::Value;
use statebus_api::path::clean_path;
use statebus_api::{Path, Update};
use strum::Display;

use crate::error::CoreError;
use crate::schema::{ApplyMode, SchemaError, apply, delete};
use crate::store::ConfigEntry;

/// Who asked for a mutation. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Origin {
    RpcServer,
    Seed,
    Controller,
}

/// One Set request's worth of mutations, applied deletes first, then
/// replaces, then updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mutation<'a> {
    pub deletes: &'a [Path],
    pub replaces: &'a [Update],
    pub updates: &'a [Update],
}

impl Mutation<'_> {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.replaces.is_empty() && self.updates.is_empty()
    }
}

/// Apply `updates` with the given mode, validate and commit.
pub fn validate_update(
    entry: &ConfigEntry,
    updates: &[Update],
    mode: ApplyMode,
    origin: Origin,
) -> Result<(), CoreError> {
    let mutation = match mode {
        ApplyMode::Replace => Mutation {
            replaces: updates,
            ..Mutation::default()
        },
        ApplyMode::Merge => Mutation {
            updates,
            ..Mutation::default()
        },
    };
    validate_set(entry, mutation, origin)
}

/// Remove `paths`, validate and commit.
pub fn validate_delete(entry: &ConfigEntry, paths: &[Path], origin: Origin) -> Result<(), CoreError> {
    validate_set(
        entry,
        Mutation {
            deletes: paths,
            ..Mutation::default()
        },
        origin,
    )
}

/// Apply a whole mutation atomically: either every part lands or none.
pub fn validate_set(entry: &ConfigEntry, mutation: Mutation<'_>, origin: Origin) -> Result<(), CoreError> {
    let target = entry.target();
    let _guard = entry.lock();
    let mut working: Value = entry.running().as_ref().clone();

    apply_mutation(entry, &mut working, mutation).map_err(|source| {
        tracing::debug!(%target, %origin, error = %source, "mutation rejected");
        CoreError::Validation {
            target: target.to_string(),
            source,
        }
    })?;

    entry.schema().validate(&working).map_err(|source| {
        tracing::debug!(%target, %origin, error = %source, "mutation fails validation");
        CoreError::Validation {
            target: target.to_string(),
            source,
        }
    })?;

    entry.commit(working);
    tracing::debug!(
        %target,
        %origin,
        deletes = mutation.deletes.len(),
        replaces = mutation.replaces.len(),
        updates = mutation.updates.len(),
        "running config updated"
    );
    Ok(())
}

fn apply_mutation(
    entry: &ConfigEntry,
    working: &mut Value,
    mutation: Mutation<'_>,
) -> Result<(), SchemaError> {
    let root = entry.schema().root();
    for path in mutation.deletes {
        delete(root, working, &clean_path(path))?;
    }
    for update in mutation.replaces {
        apply(root, working, &clean_path(&update.path), update.val.to_json(), ApplyMode::Replace)?;
    }
    for update in mutation.updates {
        apply(root, working, &clean_path(&update.path), update.val.to_json(), ApplyMode::Merge)?;
    }
    Ok(())
}
