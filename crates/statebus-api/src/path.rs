// ── Structured paths ──
//
// Hierarchical YANG-style paths: an ordered list of named elements,
// each optionally carrying key=value pairs. Parsed from and rendered
// to the xpath-like string form (`/interface[name=ethernet-1/1]/state`).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ── PathElem ────────────────────────────────────────────────────────

/// A single path element with its (unordered) list keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathElem {
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub key: HashMap<String, String>,
}

impl PathElem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: HashMap::new(),
        }
    }

    pub fn with_key(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.key.insert(name.into(), value.into());
        self
    }

    /// Keys ordered by key name. Every rendering of a path goes through
    /// this so output never depends on map iteration order.
    pub fn sorted_keys(&self) -> Vec<(&str, &str)> {
        let mut keys: Vec<(&str, &str)> = self
            .key
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        keys.sort_unstable_by(|a, b| a.0.cmp(b.0));
        keys
    }
}

// ── Path ────────────────────────────────────────────────────────────

/// A structured path, optionally scoped by origin and target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elem: Vec<PathElem>,
}

impl Path {
    pub fn new(elem: Vec<PathElem>) -> Self {
        Self {
            origin: None,
            target: None,
            elem,
        }
    }

    /// The root path (no elements).
    pub fn root() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn push(mut self, elem: PathElem) -> Self {
        self.elem.push(elem);
        self
    }

    pub fn is_root(&self) -> bool {
        self.elem.is_empty()
    }

    /// Append `other`'s elements to this path, keeping this path's
    /// origin and target unless it has none.
    pub fn join(&self, other: &Path) -> Path {
        let mut joined = self.clone();
        joined.elem.extend(other.elem.iter().cloned());
        if joined.origin.is_none() {
            joined.origin.clone_from(&other.origin);
        }
        if joined.target.is_none() {
            joined.target.clone_from(&other.target);
        }
        joined
    }

    /// Parse an xpath-style string such as `/a/b[k=v]/c` or `origin:/a/b`.
    ///
    /// Key values may contain `/` and escaped brackets (`\[`, `\]`).
    pub fn from_xpath(xpath: &str) -> Result<Self, Error> {
        let mut path = Path::default();
        let mut rest = xpath;

        if let Some((origin, remainder)) = split_origin(xpath) {
            path.origin = Some(origin.to_owned());
            rest = remainder;
        }

        let rest = rest.strip_prefix('/').unwrap_or(rest);
        if rest.is_empty() {
            return Ok(path);
        }

        let segments = split_elements(rest).map_err(|reason| Error::malformed_path(xpath, reason))?;
        let last = segments.len().saturating_sub(1);
        for (i, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                // a single trailing slash is tolerated
                if i == last {
                    continue;
                }
                return Err(Error::malformed_path(xpath, "empty path element"));
            }
            let (name, keys) = match find_unescaped(segment, '[') {
                Some(idx) => (&segment[..idx], &segment[idx..]),
                None => (segment.as_str(), ""),
            };
            if name.is_empty() {
                return Err(Error::malformed_path(xpath, "path element without a name"));
            }
            let mut elem = PathElem::new(name);
            for (k, v) in parse_keys(keys).map_err(|reason| Error::malformed_path(xpath, reason))? {
                if elem.key.insert(k.clone(), v).is_some() {
                    return Err(Error::malformed_path(xpath, format!("duplicate key '{k}'")));
                }
            }
            path.elem.push(elem);
        }
        Ok(path)
    }

    /// Render as an xpath string with keys sorted by name.
    pub fn to_xpath(&self) -> String {
        let mut out = String::new();
        if let Some(origin) = &self.origin {
            out.push_str(origin);
            out.push(':');
        }
        if self.elem.is_empty() {
            out.push('/');
            return out;
        }
        for elem in &self.elem {
            out.push('/');
            out.push_str(&elem.name);
            for (k, v) in elem.sorted_keys() {
                out.push('[');
                out.push_str(k);
                out.push('=');
                out.push_str(&v.replace('[', "\\[").replace(']', "\\]"));
                out.push(']');
            }
        }
        out
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xpath())
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_xpath(s)
    }
}

// ── Module prefix cleaning ──────────────────────────────────────────

/// Strip YANG module prefixes from element names, key names and key values.
///
/// `foo:bar` → `bar`, `foo::Key1` → `Key1`. Values only lose a prefix when
/// it looks like a module name, so `fe80::1` and `10.0.0.1` survive.
pub fn clean_path(path: &Path) -> Path {
    let elem = path
        .elem
        .iter()
        .map(|e| PathElem {
            name: strip_module(&e.name).to_owned(),
            key: e
                .key
                .iter()
                .map(|(k, v)| (strip_module(k).to_owned(), strip_module_from_value(v).to_owned()))
                .collect(),
        })
        .collect();
    Path {
        origin: path.origin.clone(),
        target: path.target.clone(),
        elem,
    }
}

/// Drop everything up to and including the last `:`.
pub fn strip_module(name: &str) -> &str {
    name.rfind(':').map_or(name, |idx| &name[idx + 1..])
}

fn strip_module_from_value(value: &str) -> &str {
    let Some(idx) = value.rfind(':') else {
        return value;
    };
    let (module, local) = (&value[..idx], &value[idx + 1..]);
    let module_like = module
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && module
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
    let local_like = local
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if module_like && local_like { local } else { value }
}

// ── Shared parsing helpers ──────────────────────────────────────────

/// Detect an `origin:` prefix. Returns the origin and everything after the colon.
///
/// An origin is recognised only when the input does not start with `/`,
/// no `/` precedes the colon, and the colon is either last or followed by `/`.
pub(crate) fn split_origin(input: &str) -> Option<(&str, &str)> {
    let idx = input.find(':')?;
    if input.starts_with('/') || input[..idx].contains('/') {
        return None;
    }
    let after = &input[idx + 1..];
    if after.is_empty() || after.starts_with('/') {
        Some((&input[..idx], after))
    } else {
        None
    }
}

/// Split on `/` outside of (unescaped) brackets.
pub(crate) fn split_elements(input: &str) -> Result<Vec<String>, &'static str> {
    let mut elems = Vec::new();
    let mut current = String::new();
    let mut in_key = false;
    let mut prev = '\0';

    for c in input.chars() {
        match c {
            '[' if prev != '\\' => {
                if in_key {
                    return Err("nested '[' inside key");
                }
                in_key = true;
            }
            ']' if prev != '\\' => {
                if !in_key {
                    return Err("unbalanced ']'");
                }
                in_key = false;
            }
            '/' if !in_key => {
                elems.push(std::mem::take(&mut current));
                prev = c;
                continue;
            }
            _ => {}
        }
        current.push(c);
        prev = c;
    }
    if in_key {
        return Err("unbalanced '['");
    }
    elems.push(current);
    Ok(elems)
}

/// Byte index of the first `needle` not preceded by a backslash.
pub(crate) fn find_unescaped(input: &str, needle: char) -> Option<usize> {
    let mut prev = '\0';
    for (idx, c) in input.char_indices() {
        if c == needle && prev != '\\' {
            return Some(idx);
        }
        prev = c;
    }
    None
}

/// Parse `[k1=v1][k2=v2]` into pairs sorted by key name.
///
/// Escaped brackets inside names and values are unescaped. Fails when a
/// bracket is unbalanced, `=` is missing, or either side of `=` is empty.
pub(crate) fn parse_keys(input: &str) -> Result<Vec<(String, String)>, &'static str> {
    let mut pairs = Vec::new();
    let mut in_key = false;
    let mut start = 0;
    let mut prev = '\0';

    for (idx, c) in input.char_indices() {
        match c {
            '[' if prev != '\\' => {
                if in_key {
                    return Err("nested '[' inside key");
                }
                in_key = true;
                start = idx + 1;
            }
            ']' if prev != '\\' => {
                if !in_key {
                    return Err("unbalanced ']'");
                }
                let body = &input[start..idx];
                let Some(eq) = body.find('=') else {
                    return Err("key without '='");
                };
                let (k, v) = (&body[..eq], &body[eq + 1..]);
                if k.is_empty() || v.is_empty() {
                    return Err("empty key name or value");
                }
                pairs.push((unescape_brackets(k), unescape_brackets(v)));
                in_key = false;
            }
            _ => {}
        }
        prev = c;
    }
    if in_key {
        return Err("unbalanced '['");
    }
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(pairs)
}

fn unescape_brackets(s: &str) -> String {
    s.replace("\\]", "]").replace("\\[", "[")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_path() {
        let path = Path::from_xpath("/interface/state").unwrap();
        assert_eq!(path.elem.len(), 2);
        assert_eq!(path.elem[0].name, "interface");
        assert_eq!(path.elem[1].name, "state");
        assert!(path.origin.is_none());
    }

    #[test]
    fn parses_keys_containing_slashes() {
        let path = Path::from_xpath("/interface[name=ethernet-1/1]/oper-state").unwrap();
        assert_eq!(path.elem.len(), 2);
        assert_eq!(path.elem[0].key.get("name").unwrap(), "ethernet-1/1");
    }

    #[test]
    fn parses_origin_prefix() {
        let path = Path::from_xpath("openconfig:/system/state").unwrap();
        assert_eq!(path.origin.as_deref(), Some("openconfig"));
        assert_eq!(path.elem.len(), 2);
    }

    #[test]
    fn colon_in_element_is_not_an_origin() {
        let path = Path::from_xpath("/srl_nokia-interfaces:interface").unwrap();
        assert!(path.origin.is_none());
        assert_eq!(path.elem[0].name, "srl_nokia-interfaces:interface");
    }

    #[test]
    fn escaped_brackets_in_values() {
        let path = Path::from_xpath(r"/a[k=x\[1\]]").unwrap();
        assert_eq!(path.elem[0].key.get("k").unwrap(), "x[1]");
        assert_eq!(path.to_xpath(), r"/a[k=x\[1\]]");
    }

    #[test]
    fn rejects_unbalanced_brackets() {
        assert!(Path::from_xpath("/a[k=v/b").is_err());
        assert!(Path::from_xpath("/a]k=v[/b").is_err());
    }

    #[test]
    fn rejects_key_without_equals() {
        let err = Path::from_xpath("/a[k]").unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn rejects_duplicate_keys() {
        assert!(Path::from_xpath("/a[k=1][k=2]").is_err());
    }

    #[test]
    fn rejects_empty_inner_element() {
        assert!(Path::from_xpath("/a//b").is_err());
        assert_eq!(Path::from_xpath("/a/b/").unwrap().elem.len(), 2);
    }

    #[test]
    fn root_renders_as_slash() {
        let path = Path::from_xpath("/").unwrap();
        assert!(path.is_root());
        assert_eq!(path.to_xpath(), "/");
    }

    #[test]
    fn xpath_keys_are_sorted() {
        let path = Path::new(vec![
            PathElem::new("a").with_key("z", "1").with_key("b", "2"),
        ]);
        assert_eq!(path.to_xpath(), "/a[b=2][z=1]");
    }

    #[test]
    fn join_appends_elements() {
        let prefix = Path::from_xpath("/a").unwrap().with_target("leaf1");
        let joined = prefix.join(&Path::from_xpath("/b/c").unwrap());
        assert_eq!(joined.to_xpath(), "/a/b/c");
        assert_eq!(joined.target.as_deref(), Some("leaf1"));
    }

    #[test]
    fn clean_path_removes_namespaces() {
        let cases = [
            ("/Foo/Bar", "/Foo/Bar"),
            ("/Foo:bar/bla:Bar", "/bar/Bar"),
            ("/bar/Bar[foo:Key1=foo:data]", "/bar/Bar[Key1=data]"),
            ("/bar/Bar[foo::Key1=foo:data]", "/bar/Bar[Key1=data]"),
        ];
        for (input, expected) in cases {
            let cleaned = clean_path(&Path::from_xpath(input).unwrap());
            assert_eq!(cleaned.to_xpath(), expected, "input: {input}");
        }
    }

    #[test]
    fn clean_path_keeps_address_values() {
        let path = Path::new(vec![
            PathElem::new("neighbor").with_key("address", "fe80::1"),
        ]);
        let cleaned = clean_path(&path);
        assert_eq!(cleaned.elem[0].key.get("address").unwrap(), "fe80::1");
    }
}
