// ── Generic tree machinery ──
//
// Navigation, mutation and validation of JSON trees against a
// `SchemaNode`. Keyed list entries are addressed by matching every key
// leaf against the path element's key map.

use std::collections::HashSet;

use serde_json::{Map, Value};
use statebus_api::{Path, PathElem};

use super::{SchemaError, SchemaNode};

/// How an update lands on the addressed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// The node becomes exactly the given value.
    Replace,
    /// Members are merged in; unspecified siblings are kept.
    Merge,
}

fn location(elems: &[PathElem]) -> String {
    Path::new(elems.to_vec()).to_xpath()
}

/// Textual form of a key leaf, as it appears in a path key.
pub(super) fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Two list entries carrying the same key values. Keyless lists never match.
pub(super) fn same_entry(keys: &[String], a: &Value, b: &Value) -> bool {
    !keys.is_empty()
        && keys.iter().all(|k| {
            let ka = a.get(k).and_then(key_string);
            ka.is_some() && ka == b.get(k).and_then(key_string)
        })
}

fn entry_matches(entry: &Value, elem: &PathElem) -> bool {
    elem.key
        .iter()
        .all(|(k, v)| entry.get(k).and_then(key_string).as_deref() == Some(v.as_str()))
}

fn check_keys(list: &SchemaNode, elem: &PathElem, here: &str) -> Result<(), SchemaError> {
    let keys = list.keys();
    if let Some(missing) = keys.iter().find(|k| !elem.key.contains_key(*k)) {
        return Err(SchemaError::MissingKey {
            location: here.to_owned(),
            key: missing.clone(),
        });
    }
    if let Some(extra) = elem.key.keys().find(|k| !keys.contains(k)) {
        return Err(SchemaError::InvalidValue {
            location: here.to_owned(),
            reason: format!("'{extra}' is not a key of this list"),
        });
    }
    Ok(())
}

fn missing_key(list: &SchemaNode, here: String) -> SchemaError {
    SchemaError::MissingKey {
        location: here,
        key: list.keys().first().cloned().unwrap_or_default(),
    }
}

fn unknown_child<'s>(
    schema: &'s SchemaNode,
    elems: &[PathElem],
    depth: usize,
) -> Result<&'s SchemaNode, SchemaError> {
    let elem = &elems[depth];
    schema
        .child(&elem.name)
        .ok_or_else(|| SchemaError::UnknownElement {
            location: location(&elems[..depth]),
            name: elem.name.clone(),
        })
}

fn below_leaf(elems: &[PathElem], depth: usize) -> SchemaError {
    SchemaError::UnknownElement {
        location: location(&elems[..=depth]),
        name: elems
            .get(depth + 1)
            .map(|e| e.name.clone())
            .unwrap_or_default(),
    }
}

// ── Read ─────────────────────────────────────────────────────────────

/// The subtree at `path`, `None` when nothing is stored there.
///
/// A list element without keys addresses the whole list.
pub fn get_subtree<'t>(
    root: &SchemaNode,
    tree: &'t Value,
    path: &Path,
) -> Result<Option<&'t Value>, SchemaError> {
    let elems = &path.elem;
    let mut schema = root;
    let mut node = tree;
    for (depth, elem) in elems.iter().enumerate() {
        let child = unknown_child(schema, elems, depth)?;
        let last = depth + 1 == elems.len();
        let Some(member) = node.get(&elem.name) else {
            return Ok(None);
        };
        match child {
            SchemaNode::Container { .. } => node = member,
            SchemaNode::List { .. } => {
                if elem.key.is_empty() {
                    if last {
                        return Ok(Some(member));
                    }
                    return Err(missing_key(child, location(&elems[..=depth])));
                }
                check_keys(child, elem, &location(&elems[..=depth]))?;
                let entry = member
                    .as_array()
                    .and_then(|entries| entries.iter().find(|e| entry_matches(e, elem)));
                let Some(entry) = entry else {
                    return Ok(None);
                };
                node = entry;
            }
            SchemaNode::Leaf(_) | SchemaNode::LeafList(_) => {
                if !last {
                    return Err(below_leaf(elems, depth));
                }
                return Ok(Some(member));
            }
        }
        schema = child;
    }
    Ok(Some(node))
}

// ── Write ────────────────────────────────────────────────────────────

/// Write `value` at `path`, creating intermediate containers and list
/// entries. The result is not validated here.
pub fn apply(
    root: &SchemaNode,
    tree: &mut Value,
    path: &Path,
    value: Value,
    mode: ApplyMode,
) -> Result<(), SchemaError> {
    apply_at(root, tree, &path.elem, 0, value, mode)
}

fn apply_at(
    schema: &SchemaNode,
    node: &mut Value,
    elems: &[PathElem],
    depth: usize,
    value: Value,
    mode: ApplyMode,
) -> Result<(), SchemaError> {
    let Some(elem) = elems.get(depth) else {
        match mode {
            ApplyMode::Replace => *node = value,
            ApplyMode::Merge => merge(schema, node, value),
        }
        return Ok(());
    };
    let child = unknown_child(schema, elems, depth)?;
    let here = location(&elems[..=depth]);
    let last = depth + 1 == elems.len();
    let members = as_object_mut(node, &elems[..depth])?;

    match child {
        SchemaNode::Container { .. } => {
            let member = members
                .entry(elem.name.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            apply_at(child, member, elems, depth + 1, value, mode)
        }
        SchemaNode::List { .. } if elem.key.is_empty() => {
            if !last {
                return Err(missing_key(child, here));
            }
            let member = members
                .entry(elem.name.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            match mode {
                ApplyMode::Replace => *member = value,
                ApplyMode::Merge => merge_list(child, member, value),
            }
            Ok(())
        }
        SchemaNode::List { .. } => {
            check_keys(child, elem, &here)?;
            let member = members
                .entry(elem.name.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            let Value::Array(entries) = member else {
                return Err(SchemaError::WrongKind {
                    location: here,
                    expected: "list".into(),
                });
            };
            let idx = if let Some(idx) = entries.iter().position(|e| entry_matches(e, elem)) {
                idx
            } else {
                entries.push(Value::Object(Map::new()));
                entries.len() - 1
            };
            let entry = &mut entries[idx];
            apply_at(child, entry, elems, depth + 1, value, mode)?;
            // the path's keys win over whatever the value carried
            if let Value::Object(fields) = entry {
                for (k, v) in &elem.key {
                    fields.insert(k.clone(), child.leaf_kind(k).key_value(v));
                }
            }
            Ok(())
        }
        SchemaNode::Leaf(_) | SchemaNode::LeafList(_) => {
            if !last {
                return Err(below_leaf(elems, depth));
            }
            members.insert(elem.name.clone(), value);
            Ok(())
        }
    }
}

fn as_object_mut<'v>(
    node: &'v mut Value,
    at: &[PathElem],
) -> Result<&'v mut Map<String, Value>, SchemaError> {
    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(members) => Ok(members),
        _ => Err(SchemaError::WrongKind {
            location: location(at),
            expected: "container".into(),
        }),
    }
}

fn merge(schema: &SchemaNode, target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (name, value) in incoming {
                let Some(slot) = existing.get_mut(&name) else {
                    existing.insert(name, value);
                    continue;
                };
                match schema.child(&name) {
                    Some(child @ SchemaNode::Container { .. }) => merge(child, slot, value),
                    Some(child @ SchemaNode::List { .. }) => merge_list(child, slot, value),
                    _ => *slot = value,
                }
            }
        }
        (target, incoming) => *target = incoming,
    }
}

fn merge_list(list: &SchemaNode, target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Array(existing), Value::Array(incoming)) => {
            for entry in incoming {
                match existing.iter().position(|e| same_entry(list.keys(), e, &entry)) {
                    Some(idx) => merge(list, &mut existing[idx], entry),
                    None => existing.push(entry),
                }
            }
        }
        (target, incoming) => *target = incoming,
    }
}

// ── Delete ───────────────────────────────────────────────────────────

/// Remove the node at `path`. Returns `false` when nothing was there.
///
/// The root path clears the whole tree. A list left without entries is
/// removed from its parent.
pub fn delete(root: &SchemaNode, tree: &mut Value, path: &Path) -> Result<bool, SchemaError> {
    if path.elem.is_empty() {
        let had_content = tree.as_object().is_some_and(|m| !m.is_empty());
        *tree = Value::Object(Map::new());
        return Ok(had_content);
    }
    delete_at(root, tree, &path.elem, 0)
}

fn delete_at(
    schema: &SchemaNode,
    node: &mut Value,
    elems: &[PathElem],
    depth: usize,
) -> Result<bool, SchemaError> {
    let elem = &elems[depth];
    let child = unknown_child(schema, elems, depth)?;
    let here = location(&elems[..=depth]);
    let last = depth + 1 == elems.len();
    let Value::Object(members) = node else {
        return Ok(false);
    };

    match child {
        SchemaNode::List { .. } if !elem.key.is_empty() => {
            check_keys(child, elem, &here)?;
            let Some(Value::Array(entries)) = members.get_mut(&elem.name) else {
                return Ok(false);
            };
            let Some(idx) = entries.iter().position(|e| entry_matches(e, elem)) else {
                return Ok(false);
            };
            let removed = if last {
                entries.remove(idx);
                true
            } else {
                delete_at(child, &mut entries[idx], elems, depth + 1)?
            };
            let now_empty = entries.is_empty();
            if now_empty {
                members.remove(&elem.name);
            }
            Ok(removed)
        }
        SchemaNode::List { .. } => {
            if !last {
                return Err(missing_key(child, here));
            }
            Ok(members.remove(&elem.name).is_some())
        }
        SchemaNode::Container { .. } => {
            if last {
                return Ok(members.remove(&elem.name).is_some());
            }
            match members.get_mut(&elem.name) {
                Some(member) => delete_at(child, member, elems, depth + 1),
                None => Ok(false),
            }
        }
        SchemaNode::Leaf(_) | SchemaNode::LeafList(_) => {
            if !last {
                return Err(below_leaf(elems, depth));
            }
            Ok(members.remove(&elem.name).is_some())
        }
    }
}

// ── Validate ─────────────────────────────────────────────────────────

/// Check `tree` against the schema: no unknown members, leaves of the
/// right kind, every list entry keyed and unique.
pub fn validate(root: &SchemaNode, tree: &Value) -> Result<(), SchemaError> {
    let mut at = Vec::new();
    validate_members(root, tree, &mut at)
}

fn validate_members(
    schema: &SchemaNode,
    value: &Value,
    at: &mut Vec<PathElem>,
) -> Result<(), SchemaError> {
    let Value::Object(members) = value else {
        return Err(SchemaError::WrongKind {
            location: location(at),
            expected: "container".into(),
        });
    };
    for (name, member) in members {
        let Some(child) = schema.child(name) else {
            return Err(SchemaError::UnknownElement {
                location: location(at),
                name: name.clone(),
            });
        };
        at.push(PathElem::new(name.clone()));
        let result = validate_child(child, member, at);
        at.pop();
        result?;
    }
    Ok(())
}

fn validate_child(
    schema: &SchemaNode,
    value: &Value,
    at: &mut Vec<PathElem>,
) -> Result<(), SchemaError> {
    match schema {
        SchemaNode::Container { .. } => validate_members(schema, value, at),
        SchemaNode::List { keys, .. } => {
            let Value::Array(entries) = value else {
                return Err(SchemaError::WrongKind {
                    location: location(at),
                    expected: "list".into(),
                });
            };
            let mut seen = HashSet::new();
            for entry in entries {
                let mut key_values = Vec::with_capacity(keys.len());
                for key in keys {
                    let Some(v) = entry.get(key).and_then(key_string) else {
                        return Err(SchemaError::MissingKey {
                            location: location(at),
                            key: key.clone(),
                        });
                    };
                    key_values.push(v);
                }
                if let Some(last) = at.last_mut() {
                    last.key = keys.iter().cloned().zip(key_values.iter().cloned()).collect();
                }
                let entry_location = location(at);
                let result = validate_members(schema, entry, at);
                if let Some(last) = at.last_mut() {
                    last.key.clear();
                }
                result?;
                if !keys.is_empty() && !seen.insert(key_values) {
                    return Err(SchemaError::DuplicateEntry {
                        location: entry_location,
                    });
                }
            }
            Ok(())
        }
        SchemaNode::Leaf(kind) => {
            if kind.accepts(value) {
                Ok(())
            } else {
                Err(SchemaError::WrongKind {
                    location: location(at),
                    expected: kind.to_string(),
                })
            }
        }
        SchemaNode::LeafList(kind) => {
            let valid = value
                .as_array()
                .is_some_and(|items| items.iter().all(|v| kind.accepts(v)));
            if valid {
                Ok(())
            } else {
                Err(SchemaError::WrongKind {
                    location: location(at),
                    expected: format!("list of {kind}"),
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::schema::{LeafKind, SchemaNode};

    fn schema() -> SchemaNode {
        SchemaNode::container([
            (
                "interface",
                SchemaNode::list(
                    &["name"],
                    [
                        ("name", SchemaNode::Leaf(LeafKind::String)),
                        ("mtu", SchemaNode::Leaf(LeafKind::Uint)),
                        ("description", SchemaNode::Leaf(LeafKind::String)),
                        (
                            "subinterface",
                            SchemaNode::list(
                                &["index"],
                                [
                                    ("index", SchemaNode::Leaf(LeafKind::Uint)),
                                    ("enabled", SchemaNode::Leaf(LeafKind::Bool)),
                                ],
                            ),
                        ),
                    ],
                ),
            ),
            (
                "system",
                SchemaNode::container([
                    ("name", SchemaNode::Leaf(LeafKind::String)),
                    ("dns", SchemaNode::LeafList(LeafKind::String)),
                ]),
            ),
        ])
    }

    fn path(xpath: &str) -> Path {
        Path::from_xpath(xpath).unwrap()
    }

    fn sample() -> Value {
        json!({
            "interface": [
                {"name": "e1", "mtu": 1500, "subinterface": [{"index": 0, "enabled": true}]},
                {"name": "e2"}
            ],
            "system": {"name": "leaf1", "dns": ["1.1.1.1"]}
        })
    }

    #[test]
    fn get_addresses_list_entries_by_key() {
        let tree = sample();
        let got = get_subtree(&schema(), &tree, &path("/interface[name=e1]/subinterface[index=0]/enabled"))
            .unwrap();
        assert_eq!(got, Some(&json!(true)));
        assert_eq!(
            get_subtree(&schema(), &tree, &path("/interface[name=e3]")).unwrap(),
            None
        );
        assert_eq!(get_subtree(&schema(), &tree, &Path::root()).unwrap(), Some(&tree));
    }

    #[test]
    fn get_whole_list_without_keys() {
        let tree = sample();
        let got = get_subtree(&schema(), &tree, &path("/interface")).unwrap().unwrap();
        assert_eq!(got.as_array().unwrap().len(), 2);
    }

    #[test]
    fn get_unknown_element_fails() {
        let err = get_subtree(&schema(), &sample(), &path("/bogus")).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownElement { .. }));
    }

    #[test]
    fn replace_clears_unnamed_children() {
        let mut tree = sample();
        apply(
            &schema(),
            &mut tree,
            &path("/interface[name=e1]"),
            json!({"description": "uplink"}),
            ApplyMode::Replace,
        )
        .unwrap();
        assert_eq!(tree["interface"][0], json!({"description": "uplink", "name": "e1"}));
    }

    #[test]
    fn merge_keeps_siblings() {
        let mut tree = sample();
        apply(
            &schema(),
            &mut tree,
            &path("/interface[name=e1]"),
            json!({"description": "uplink", "subinterface": [{"index": 1, "enabled": false}]}),
            ApplyMode::Merge,
        )
        .unwrap();
        let e1 = &tree["interface"][0];
        assert_eq!(e1["mtu"], 1500);
        assert_eq!(e1["description"], "uplink");
        assert_eq!(e1["subinterface"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn apply_creates_missing_entries_with_typed_keys() {
        let mut tree = json!({});
        apply(
            &schema(),
            &mut tree,
            &path("/interface[name=e9]/subinterface[index=3]/enabled"),
            json!(true),
            ApplyMode::Merge,
        )
        .unwrap();
        assert_eq!(
            tree,
            json!({"interface": [{"name": "e9", "subinterface": [{"index": 3, "enabled": true}]}]})
        );
        validate(&schema(), &tree).unwrap();
    }

    #[test]
    fn apply_below_a_leaf_fails() {
        let mut tree = sample();
        let err = apply(
            &schema(),
            &mut tree,
            &path("/system/name/extra"),
            json!(1),
            ApplyMode::Merge,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownElement { .. }));
    }

    #[test]
    fn delete_entry_and_prune_empty_list() {
        let mut tree = sample();
        assert!(delete(&schema(), &mut tree, &path("/interface[name=e1]")).unwrap());
        assert!(delete(&schema(), &mut tree, &path("/interface[name=e2]")).unwrap());
        assert!(tree.get("interface").is_none());
        assert!(!delete(&schema(), &mut tree, &path("/interface[name=e2]")).unwrap());
    }

    #[test]
    fn delete_leaf() {
        let mut tree = sample();
        assert!(delete(&schema(), &mut tree, &path("/system/dns")).unwrap());
        assert_eq!(tree["system"], json!({"name": "leaf1"}));
    }

    #[test]
    fn delete_root_clears_tree() {
        let mut tree = sample();
        assert!(delete(&schema(), &mut tree, &Path::root()).unwrap());
        assert_eq!(tree, json!({}));
    }

    #[test]
    fn validate_accepts_sample() {
        validate(&schema(), &sample()).unwrap();
    }

    #[test]
    fn validate_rejects_unknown_member() {
        let err = validate(&schema(), &json!({"system": {"hostname": "x"}})).unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnknownElement {
                location: "/system".into(),
                name: "hostname".into()
            }
        );
    }

    #[test]
    fn validate_rejects_wrong_leaf_kind() {
        let err = validate(&schema(), &json!({"interface": [{"name": "e1", "mtu": "big"}]})).unwrap_err();
        assert_eq!(
            err,
            SchemaError::WrongKind {
                location: "/interface[name=e1]/mtu".into(),
                expected: "unsigned integer".into()
            }
        );
    }

    #[test]
    fn validate_rejects_missing_and_duplicate_keys() {
        let err = validate(&schema(), &json!({"interface": [{"mtu": 1}]})).unwrap_err();
        assert!(matches!(err, SchemaError::MissingKey { .. }));

        let err = validate(&schema(), &json!({"interface": [{"name": "e1"}, {"name": "e1"}]})).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateEntry { .. }));
    }
}
