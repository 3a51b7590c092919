//! Statement templating.
//!
//! Creation, renewal and revocation statements are written by administrators
//! with `{{ name }}` placeholders and rendered with generated credential
//! material right before they are sent to the target system.
//!
//! # Security
//!
//! Rendering is plain textual substitution. Values are never quoted or
//! escaped: the rendered statement is executed verbatim, so the template
//! author decides how identifiers and literals are quoted for the target
//! dialect. Templates are a trust boundary owned by whoever controls the
//! provider configuration.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").unwrap());

static VARIABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("undefined variable(s) referenced: {}", names.join(", "))]
    UndefinedVariable { names: Vec<String> },

    #[error("malformed placeholder at byte {position}: {reason}")]
    Malformed { position: usize, reason: String },
}

/// Variables available to a statement template.
#[derive(Clone, Default)]
pub struct TemplateVars {
    values: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

// Values are credential material; only the names are printed.
impl fmt::Debug for TemplateVars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// Names referenced by `template`, in order of first appearance.
pub fn placeholders(template: &str) -> Result<Vec<String>, TemplateError> {
    let mut names = Vec::new();
    let mut seen = BTreeSet::new();
    let mut cursor = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        check_no_open_braces(template, cursor, whole.start)?;
        cursor = whole.end;

        let name = caps.get(1).map_or("", |m| m.as_str());
        if !VARIABLE_NAME.is_match(name) {
            return Err(TemplateError::Malformed {
                position: whole.start,
                reason: format!("invalid variable name '{}'", name),
            });
        }
        if seen.insert(name.to_string()) {
            names.push(name.to_string());
        }
    }
    check_no_open_braces(template, cursor, template.len())?;

    Ok(names)
}

fn check_no_open_braces(template: &str, from: usize, to: usize) -> Result<(), TemplateError> {
    match template[from..to].find("{{") {
        Some(offset) => Err(TemplateError::Malformed {
            position: from + offset,
            reason: "unterminated '{{'".to_string(),
        }),
        None => Ok(()),
    }
}

/// Render `template`, failing if any referenced variable is undefined.
///
/// Nothing is substituted unless every placeholder resolves.
pub fn render(template: &str, vars: &TemplateVars) -> Result<String, TemplateError> {
    let missing: Vec<String> = placeholders(template)?
        .into_iter()
        .filter(|name| !vars.contains(name))
        .collect();
    if !missing.is_empty() {
        return Err(TemplateError::UndefinedVariable { names: missing });
    }

    let rendered = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        let name = caps.get(1).map_or("", |m| m.as_str());
        vars.get(name).unwrap_or_default().to_string()
    });
    Ok(rendered.into_owned())
}

/// Split a rendered script into individual statements on `;`.
pub fn split_statements(script: &str) -> Vec<String> {
    script
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
