// ── Tree diff ──
//
// A list entry missing from the new tree becomes one delete at the entry
// path. A new entry becomes one update per leaf, key leaves included, so
// callers see `.../list[k=v]/k` paths and must collapse them with
// `collapse_key_leaf`. Leaf-lists and keyless lists compare as a whole.

use serde_json::{Map, Value};
use statebus_api::{Path, PathElem};

use super::SchemaNode;
use super::tree::{key_string, same_entry};

/// One update emitted by a diff.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub path: Path,
    pub value: Value,
}

/// Changes turning one tree into another.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    pub deletes: Vec<Path>,
    pub updates: Vec<Change>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.updates.is_empty()
    }

    /// Apply [`collapse_key_leaf`] to every path. Collapsed updates carry
    /// an empty object.
    pub fn collapse_key_leaves(mut self) -> Self {
        for path in &mut self.deletes {
            collapse_key_leaf(path);
        }
        for change in &mut self.updates {
            if collapse_key_leaf(&mut change.path) {
                change.value = Value::Object(Map::new());
            }
        }
        self
    }
}

/// Drop the last element when it names a key of the element before it,
/// e.g. `/address[ip-prefix=10.0.0.0/31]/ip-prefix` becomes
/// `/address[ip-prefix=10.0.0.0/31]`. Returns `true` when trimmed.
pub fn collapse_key_leaf(path: &mut Path) -> bool {
    let [.., parent, last] = path.elem.as_slice() else {
        return false;
    };
    if parent.key.is_empty() || !parent.key.contains_key(&last.name) {
        return false;
    }
    path.elem.pop();
    true
}

pub(super) fn diff(root: &SchemaNode, a: &Value, b: &Value) -> Delta {
    let mut delta = Delta::default();
    diff_members(root, a.as_object(), b.as_object(), &Path::root(), &mut delta);
    delta
}

fn diff_members(
    schema: &SchemaNode,
    a: Option<&Map<String, Value>>,
    b: Option<&Map<String, Value>>,
    at: &Path,
    out: &mut Delta,
) {
    let Some(children) = schema.children() else {
        return;
    };
    for (name, child) in children {
        let va = a.and_then(|m| m.get(name));
        let vb = b.and_then(|m| m.get(name));
        if va.is_none() && vb.is_none() {
            continue;
        }
        let here = at.clone().push(PathElem::new(name.clone()));
        match child {
            SchemaNode::Container { .. } => diff_members(
                child,
                va.and_then(Value::as_object),
                vb.and_then(Value::as_object),
                &here,
                out,
            ),
            SchemaNode::List { keys, .. } if !keys.is_empty() => {
                diff_list(child, va, vb, at, name, out);
            }
            _ => {
                if va != vb {
                    match vb {
                        Some(v) => out.updates.push(Change {
                            path: here,
                            value: v.clone(),
                        }),
                        None => out.deletes.push(here),
                    }
                }
            }
        }
    }
}

fn diff_list(
    list: &SchemaNode,
    va: Option<&Value>,
    vb: Option<&Value>,
    at: &Path,
    name: &str,
    out: &mut Delta,
) {
    let entries_a = va.and_then(Value::as_array).map_or(&[][..], Vec::as_slice);
    let entries_b = vb.and_then(Value::as_array).map_or(&[][..], Vec::as_slice);
    let keys = list.keys();

    for ea in entries_a {
        if !entries_b.iter().any(|eb| same_entry(keys, ea, eb)) {
            out.deletes.push(entry_path(at, name, keys, ea));
        }
    }
    for eb in entries_b {
        let ea = entries_a.iter().find(|ea| same_entry(keys, ea, eb));
        diff_members(
            list,
            ea.and_then(Value::as_object),
            eb.as_object(),
            &entry_path(at, name, keys, eb),
            out,
        );
    }
}

fn entry_path(at: &Path, name: &str, keys: &[String], entry: &Value) -> Path {
    let mut elem = PathElem::new(name);
    for key in keys {
        let value = entry.get(key).and_then(key_string).unwrap_or_default();
        elem = elem.with_key(key.clone(), value);
    }
    at.clone().push(elem)
}
