//! Fully qualified names
//!
//! An fqn joins the names of an entity and its ancestors with `.`. A name that
//! itself contains `.` is wrapped in double quotes so that the fqn can be split
//! back into its segments.

use crate::error::{Error, Result};

pub const SEPARATOR: char = '.';
const QUOTE: char = '"';

/// Quote a single name so it can be used as an fqn segment
pub fn quote_name(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(Error::invalid("Name cannot be empty"));
    }
    if name.contains(QUOTE) {
        // Already quoted names are accepted as long as the quotes are balanced
        let inner = name
            .strip_prefix(QUOTE)
            .and_then(|n| n.strip_suffix(QUOTE))
            .ok_or_else(|| Error::invalid(format!("Invalid name {}", name)))?;
        if inner.is_empty() || inner.contains(QUOTE) {
            return Err(Error::invalid(format!("Invalid name {}", name)));
        }
        return Ok(name.to_string());
    }
    if name.contains(SEPARATOR) {
        return Ok(format!("{QUOTE}{name}{QUOTE}"));
    }
    Ok(name.to_string())
}

/// Strip the quotes added by [`quote_name`]
pub fn unquote_name(name: &str) -> String {
    name.strip_prefix(QUOTE)
        .and_then(|n| n.strip_suffix(QUOTE))
        .unwrap_or(name)
        .to_string()
}

/// Build an fqn from unquoted segment names
pub fn build<S: AsRef<str>>(names: &[S]) -> Result<String> {
    let quoted = names
        .iter()
        .map(|n| quote_name(n.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join("."))
}

/// Append a child name to a parent fqn
pub fn add(parent: &str, name: &str) -> Result<String> {
    Ok(format!("{}{}{}", parent, SEPARATOR, quote_name(name)?))
}

/// Split an fqn into its unquoted segment names
pub fn split(fqn: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in fqn.chars() {
        match c {
            QUOTE => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            SEPARATOR if !in_quotes => {
                segments.push(unquote_name(&current));
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        segments.push(unquote_name(&current));
    }
    segments
}

/// Fqn of the parent, `None` for a top level name
pub fn parent(fqn: &str) -> Option<String> {
    let segments = split(fqn);
    if segments.len() < 2 {
        return None;
    }
    build(&segments[..segments.len() - 1]).ok()
}

/// Whether `fqn` is `prefix` itself or nested below it
pub fn is_same_or_descendant(fqn: &str, prefix: &str) -> bool {
    fqn == prefix || is_descendant(fqn, prefix)
}

/// Whether `fqn` is nested below `prefix`
pub fn is_descendant(fqn: &str, prefix: &str) -> bool {
    fqn.len() > prefix.len()
        && fqn.starts_with(prefix)
        && fqn[prefix.len()..].starts_with(SEPARATOR)
}

/// Rewrite the leading `old_prefix` of `fqn` to `new_prefix`
///
/// Returns `None` when `fqn` is not `old_prefix` or one of its descendants.
pub fn replace_prefix(fqn: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    if fqn == old_prefix {
        Some(new_prefix.to_string())
    } else if is_descendant(fqn, old_prefix) {
        Some(format!("{}{}", new_prefix, &fqn[old_prefix.len()..]))
    } else {
        None
    }
}
