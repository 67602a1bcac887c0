//! `{{NAME}}` placeholder extraction and substitution.
//!
//! Substitution fails closed: if any placeholder in the content has no value,
//! nothing is replaced and the error names every missing placeholder.
//! Values are inserted verbatim, so callers feeding the result to a shell own
//! any quoting.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::error::{Error, Result};

pub type Variables = BTreeMap<String, String>;

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").unwrap())
}

/// Every placeholder name in `content`, sorted and deduplicated.
pub fn extract(content: &str) -> Vec<String> {
    placeholder_re()
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Placeholders in `content` with no entry in `vars`, sorted.
pub fn missing(content: &str, vars: &Variables) -> Vec<String> {
    extract(content)
        .into_iter()
        .filter(|name| !vars.contains_key(name))
        .collect()
}

/// Replace every `{{NAME}}` in `content` with its value from `vars`.
pub fn apply(content: &str, vars: &Variables) -> Result<String> {
    let absent = missing(content, vars);
    if !absent.is_empty() {
        return Err(Error::MissingVariables(absent));
    }
    // Single pass: substituted values are never rescanned for placeholders.
    let out = placeholder_re().replace_all(content, |caps: &Captures| vars[&caps[1]].clone());
    Ok(out.into_owned())
}

/// True when `name` can appear inside `{{...}}`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('}')
}
