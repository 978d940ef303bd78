// ── Target identity ──

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of one managed target, `namespace/name` or `namespace.name`.
///
/// Opaque for lookups: two ids are equal only when their strings are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace part, if the id carries one.
    pub fn namespace(&self) -> Option<&str> {
        self.split().map(|(ns, _)| ns)
    }

    /// The name part (the whole id when there is no namespace).
    pub fn name(&self) -> &str {
        self.split().map_or(self.0.as_str(), |(_, name)| name)
    }

    // `/` wins over `.` so dotted names keep their dots
    fn split(&self) -> Option<(&str, &str)> {
        self.0
            .split_once('/')
            .or_else(|| self.0.split_once('.'))
            .filter(|(ns, name)| !ns.is_empty() && !name.is_empty())
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TargetId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TargetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for TargetId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_separated() {
        let id = TargetId::new("default/leaf1");
        assert_eq!(id.namespace(), Some("default"));
        assert_eq!(id.name(), "leaf1");
    }

    #[test]
    fn dot_separated() {
        let id = TargetId::new("default.leaf1");
        assert_eq!(id.namespace(), Some("default"));
        assert_eq!(id.name(), "leaf1");
    }

    #[test]
    fn slash_wins_over_dot() {
        let id = TargetId::new("lab/leaf1.dc1");
        assert_eq!(id.namespace(), Some("lab"));
        assert_eq!(id.name(), "leaf1.dc1");
    }

    #[test]
    fn bare_name() {
        let id = TargetId::new("leaf1");
        assert_eq!(id.namespace(), None);
        assert_eq!(id.name(), "leaf1");
        assert_eq!(id.to_string(), "leaf1");
    }
}
