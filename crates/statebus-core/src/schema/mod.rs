//! Schema services for running-config trees.
//!
//! A running config is a JSON tree (RFC 7951 style: lists are arrays of
//! objects, list keys are ordinary leaves). A [`SchemaService`] describes
//! the allowed shape with a [`SchemaNode`] tree and provides parsing,
//! validation and diffing on top of the generic machinery in this module.
//! Services are looked up by name through a [`SchemaRegistry`] built once
//! at startup.

mod diff;
mod state;
mod tree;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use statebus_api::Path;
use statebus_api::value::strip_json_modules;
use thiserror::Error;

use crate::error::CoreError;

pub use diff::{Change, Delta, collapse_key_leaf};
pub use state::{STATE_SCHEMA, StateSchema};
pub use tree::{ApplyMode, apply, delete, get_subtree, validate};

// ── Error ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unknown element '{name}' at {location}")]
    UnknownElement { location: String, name: String },

    #[error("{location}: expected {expected}")]
    WrongKind { location: String, expected: String },

    #[error("{location}: missing key '{key}'")]
    MissingKey { location: String, key: String },

    #[error("{location}: duplicate list entry")]
    DuplicateEntry { location: String },

    #[error("{location}: {reason}")]
    InvalidValue { location: String, reason: String },

    #[error("cannot parse tree: {reason}")]
    Parse { reason: String },
}

// ── Schema tree ──────────────────────────────────────────────────────

/// Type of a leaf value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    String,
    Bool,
    Int,
    Uint,
}

impl LeafKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Bool => value.is_boolean(),
            Self::Int => value.is_i64(),
            Self::Uint => value.is_u64(),
        }
    }

    /// JSON value for a list key given as a path key string.
    fn key_value(self, raw: &str) -> Value {
        match self {
            Self::Int => raw.parse::<i64>().map_or_else(|_| Value::from(raw), Value::from),
            Self::Uint => raw.parse::<u64>().map_or_else(|_| Value::from(raw), Value::from),
            Self::Bool => raw.parse::<bool>().map_or_else(|_| Value::from(raw), Value::from),
            Self::String => Value::from(raw),
        }
    }
}

impl fmt::Display for LeafKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String => "string",
            Self::Bool => "boolean",
            Self::Int => "integer",
            Self::Uint => "unsigned integer",
        })
    }
}

/// One node of a schema tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaNode {
    Container {
        children: BTreeMap<String, SchemaNode>,
    },
    List {
        keys: Vec<String>,
        children: BTreeMap<String, SchemaNode>,
    },
    Leaf(LeafKind),
    LeafList(LeafKind),
}

impl SchemaNode {
    pub fn container<'a>(children: impl IntoIterator<Item = (&'a str, SchemaNode)>) -> Self {
        Self::Container {
            children: collect_children(children),
        }
    }

    pub fn list<'a>(
        keys: &[&str],
        children: impl IntoIterator<Item = (&'a str, SchemaNode)>,
    ) -> Self {
        Self::List {
            keys: keys.iter().map(|k| (*k).to_owned()).collect(),
            children: collect_children(children),
        }
    }

    /// Child schema of a container or list entry.
    pub fn child(&self, name: &str) -> Option<&SchemaNode> {
        match self {
            Self::Container { children } | Self::List { children, .. } => children.get(name),
            Self::Leaf(_) | Self::LeafList(_) => None,
        }
    }

    /// List keys, empty for anything but a list.
    pub fn keys(&self) -> &[String] {
        match self {
            Self::List { keys, .. } => keys,
            _ => &[],
        }
    }

    fn children(&self) -> Option<&BTreeMap<String, SchemaNode>> {
        match self {
            Self::Container { children } | Self::List { children, .. } => Some(children),
            Self::Leaf(_) | Self::LeafList(_) => None,
        }
    }

    fn leaf_kind(&self, name: &str) -> LeafKind {
        match self.child(name) {
            Some(Self::Leaf(kind) | Self::LeafList(kind)) => *kind,
            _ => LeafKind::String,
        }
    }
}

fn collect_children<'a>(
    children: impl IntoIterator<Item = (&'a str, SchemaNode)>,
) -> BTreeMap<String, SchemaNode> {
    children
        .into_iter()
        .map(|(name, node)| (name.to_owned(), node))
        .collect()
}

// ── Schema service ───────────────────────────────────────────────────

/// Marshal, validate and diff operations for one schema.
///
/// Everything except [`name`](Self::name) and [`root`](Self::root) has a
/// default built on the generic tree machinery; a schema adds its own
/// semantic rules through [`check`](Self::check).
pub trait SchemaService: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Root container of the schema.
    fn root(&self) -> &SchemaNode;

    /// An empty, valid tree.
    fn new_tree(&self) -> Value {
        Value::Object(Map::new())
    }

    /// Decode raw JSON into a validated tree.
    fn parse(&self, raw: &[u8]) -> Result<Value, SchemaError> {
        let tree = serde_json::from_slice::<Value>(raw).map_err(|e| SchemaError::Parse {
            reason: e.to_string(),
        })?;
        let tree = strip_json_modules(tree);
        self.validate(&tree)?;
        Ok(tree)
    }

    /// Structural validation followed by [`check`](Self::check).
    fn validate(&self, tree: &Value) -> Result<(), SchemaError> {
        tree::validate(self.root(), tree)?;
        self.check(tree)
    }

    /// Changes that turn `a` into `b`.
    fn diff(&self, a: &Value, b: &Value) -> Delta {
        diff::diff(self.root(), a, b)
    }

    /// Schema-specific rules beyond the tree shape.
    fn check(&self, _tree: &Value) -> Result<(), SchemaError> {
        Ok(())
    }
}

/// Read the subtree at `path` through a service's schema.
pub fn read(
    schema: &dyn SchemaService,
    tree: &Value,
    path: &Path,
) -> Result<Option<Value>, SchemaError> {
    tree::get_subtree(schema.root(), tree, path).map(|v| v.cloned())
}

// ── Registry ─────────────────────────────────────────────────────────

/// Schema services keyed by name. Built once, then shared read-only.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    services: HashMap<String, Arc<dyn SchemaService>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every schema shipped with this crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(StateSchema::new()));
        registry
    }

    pub fn register(&mut self, service: Arc<dyn SchemaService>) {
        self.services.insert(service.name().to_owned(), service);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn SchemaService>, CoreError> {
        self.services
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownSchema {
                name: name.to_owned(),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
