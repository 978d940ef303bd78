// ── nddp-state schema ──

use serde_json::Value;
use statebus_api::Path;

use super::{LeafKind, SchemaError, SchemaNode, SchemaService};
use crate::model::StateDevice;

/// Name of the built-in state schema.
pub const STATE_SCHEMA: &str = "nddp-state";

/// Running config of a state target: a list of state entries keyed by
/// `name`, each with a leaf-list of xpaths and an optional prefix.
#[derive(Debug, Clone)]
pub struct StateSchema {
    root: SchemaNode,
}

impl Default for StateSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl StateSchema {
    pub fn new() -> Self {
        let entry = SchemaNode::list(
            &["name"],
            [
                ("name", SchemaNode::Leaf(LeafKind::String)),
                ("path", SchemaNode::LeafList(LeafKind::String)),
                ("prefix", SchemaNode::Leaf(LeafKind::String)),
            ],
        );
        Self {
            root: SchemaNode::container([(StateDevice::LIST, entry)]),
        }
    }
}

impl SchemaService for StateSchema {
    fn name(&self) -> &str {
        STATE_SCHEMA
    }

    fn root(&self) -> &SchemaNode {
        &self.root
    }

    /// Every path and prefix must be a parseable xpath.
    fn check(&self, tree: &Value) -> Result<(), SchemaError> {
        let Some(entries) = tree.get(StateDevice::LIST).and_then(Value::as_array) else {
            return Ok(());
        };
        for entry in entries {
            let name = entry.get("name").and_then(Value::as_str).unwrap_or_default();
            let location = |leaf: &str| format!("/{}[name={name}]/{leaf}", StateDevice::LIST);

            let paths = entry.get("path").and_then(Value::as_array).into_iter().flatten();
            for xpath in paths.filter_map(Value::as_str) {
                Path::from_xpath(xpath).map_err(|e| SchemaError::InvalidValue {
                    location: location("path"),
                    reason: e.to_string(),
                })?;
            }
            if let Some(prefix) = entry.get("prefix").and_then(Value::as_str) {
                Path::from_xpath(prefix).map_err(|e| SchemaError::InvalidValue {
                    location: location("prefix"),
                    reason: e.to_string(),
                })?;
            }
        }
        Ok(())
    }
}
