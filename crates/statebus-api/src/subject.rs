// ── Bus subject translation ──
//
// Structured paths map onto dot-delimited bus subjects. Each path element
// becomes one token; each list key becomes an extra `{key=value}` token.
// Filter expressions map onto wildcard subjects used for bus consumers.

use crate::error::Error;
use crate::path::{Path, find_unescaped, parse_keys, split_elements, split_origin};

/// Substitute for `.` inside key values.
pub const DOT_REPLACEMENT: char = '^';
/// Substitute for whitespace inside key values.
pub const SPACE_REPLACEMENT: char = '~';

/// Single-token wildcard.
pub const WILDCARD_TOKEN: &str = "*";
/// Tail wildcard (this token and everything after it).
pub const TAIL_WILDCARD: &str = ">";

// ── Path → subject ──────────────────────────────────────────────────

/// Convert a structured path into a bus subject.
///
/// `origin.` (if any), then element names joined by `.`, each followed by
/// one `.{k=v}` token per key in key-name order. Key values are sanitized
/// with [`sanitize_key_value`].
pub fn path_to_subject(path: &Path) -> String {
    let mut subject = String::new();
    if let Some(origin) = path.origin.as_deref().filter(|o| !o.is_empty()) {
        subject.push_str(origin);
        subject.push('.');
    }
    for (i, elem) in path.elem.iter().enumerate() {
        if i > 0 {
            subject.push('.');
        }
        subject.push_str(&elem.name);
        for (k, v) in elem.sorted_keys() {
            subject.push_str(".{");
            subject.push_str(k);
            subject.push('=');
            subject.push_str(&sanitize_key_value(v));
            subject.push('}');
        }
    }
    subject
}

/// Replace every `.` with `^` and every whitespace character with `~`.
///
/// Each character is replaced individually, so `1..1` becomes `1^^1`.
/// Values that already contain `^` or `~` cannot be told apart afterwards.
pub fn sanitize_key_value(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '.' => DOT_REPLACEMENT,
            c if is_subject_whitespace(c) => SPACE_REPLACEMENT,
            c => c,
        })
        .collect()
}

fn is_subject_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0C')
}

// ── Filter expression → subject ─────────────────────────────────────

/// Convert a filter expression (`origin:/a/b[k=v]`) into a wildcard subject.
///
/// A `[k=*]` key becomes a single-token wildcard. The result always ends
/// with a tail wildcard, except for empty input which maps to an empty
/// subject. Filter key values are copied verbatim.
pub fn filter_expression_to_subject(expression: &str) -> Result<String, Error> {
    if expression.is_empty() {
        return Ok(String::new());
    }

    let malformed = |reason: &str| Error::MalformedExpression {
        expression: expression.to_owned(),
        reason: reason.to_owned(),
    };

    let mut subject = String::new();
    let mut rest = expression;
    if let Some((origin, remainder)) = split_origin(expression) {
        subject.push_str(origin);
        let remainder = remainder.strip_prefix('/').unwrap_or(remainder);
        if remainder.is_empty() {
            subject.push_str(".>");
            return Ok(subject);
        }
        subject.push('.');
        rest = remainder;
    }
    let rest = rest.strip_prefix('/').unwrap_or(rest);

    let elems = split_elements(rest).map_err(malformed)?;
    let count = elems.len();
    for (i, elem) in elems.iter().enumerate() {
        let (name, keys) = match find_unescaped(elem, '[') {
            Some(idx) if idx > 0 => (&elem[..idx], parse_keys(&elem[idx..]).map_err(malformed)?),
            _ => (elem.as_str(), Vec::new()),
        };
        subject.push_str(name);

        if !keys.is_empty() {
            subject.push('.');
            let tokens: Vec<String> = keys
                .iter()
                .map(|(k, v)| {
                    if v == WILDCARD_TOKEN {
                        WILDCARD_TOKEN.to_owned()
                    } else {
                        format!("{{{k}={v}}}")
                    }
                })
                .collect();
            subject.push_str(&tokens.join("."));
        }
        if i + 1 != count {
            subject.push('.');
        }
    }

    if let Some(stripped) = subject.strip_suffix(".*") {
        return Ok(format!("{stripped}.{TAIL_WILDCARD}"));
    }
    subject.push_str(".>");
    Ok(subject)
}

// ── Subject matching ────────────────────────────────────────────────

/// Returns `true` when `subject` carries a wildcard token and therefore
/// cannot be published to.
pub fn has_wildcard(subject: &str) -> bool {
    subject
        .split('.')
        .any(|token| token == WILDCARD_TOKEN || token == TAIL_WILDCARD)
}

/// Match a concrete subject against a filter that may contain `*`
/// (exactly one token) and a trailing `>` (one or more tokens).
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(TAIL_WILDCARD), Some(_)) => return filter_tokens.next().is_none(),
            (Some(WILDCARD_TOKEN), Some(_)) => {}
            (Some(f), Some(s)) if f == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
