// ── State entries ──
//
// Typed view of the `nddp-state` running configuration: a list of
// named entries, each listing the xpaths to collect from the target.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use statebus_api::Path;

use crate::error::CoreError;

/// One requested piece of device state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    pub name: String,
    /// Xpaths to subscribe to.
    #[serde(rename = "path", default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    /// Xpath prepended to every entry in `paths`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl StateEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, xpath: impl Into<String>) -> Self {
        self.paths.push(xpath.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Structured subscription paths, prefix applied. Unparseable xpaths
    /// are returned as errors in place.
    pub fn structured_paths(&self) -> Vec<Result<Path, statebus_api::Error>> {
        let prefix = match self.prefix.as_deref().filter(|p| !p.is_empty()) {
            Some(prefix) => match Path::from_xpath(prefix) {
                Ok(prefix) => Some(prefix),
                Err(e) => return vec![Err(e)],
            },
            None => None,
        };
        self.paths
            .iter()
            .map(|xpath| {
                let path = Path::from_xpath(xpath)?;
                Ok(match &prefix {
                    Some(prefix) => prefix.join(&path),
                    None => path,
                })
            })
            .collect()
    }

    /// Xpath of this entry inside the running config.
    pub fn config_path(&self) -> Path {
        Path::root().push(
            statebus_api::PathElem::new(StateDevice::LIST).with_key("name", self.name.clone()),
        )
    }
}

/// The whole running config of one target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDevice {
    #[serde(rename = "state-entry", default, skip_serializing_if = "Vec::is_empty")]
    pub state_entry: Vec<StateEntry>,
}

impl StateDevice {
    /// Name of the entry list in the tree.
    pub const LIST: &'static str = "state-entry";

    /// Decode a running-config tree. A tree that does not have this shape
    /// means the store holds something it should never have accepted.
    pub fn from_tree(tree: &Value) -> Result<Self, CoreError> {
        serde_json::from_value(tree.clone()).map_err(|e| {
            tracing::error!(error = %e, "running config is not a state device");
            CoreError::Internal(format!("wrong state object: {e}"))
        })
    }

    pub fn to_tree(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn entry(&self, name: &str) -> Option<&StateEntry> {
        self.state_entry.iter().find(|e| e.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.state_entry.is_empty()
    }
}
