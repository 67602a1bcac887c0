//! Workflow data model.
//!
//! A `Workflow` is what the store persists: identity plus a `metadata` body
//! holding the atoms and variable rules. Workflows are validated when they
//! are loaded or added, so the orchestrator can assume a well-formed shape.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::template;

// ---------------------------------------------------------------------------
// Atom
// ---------------------------------------------------------------------------

/// A single command with an optional description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Atom {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Atom {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            description: None,
        }
    }

    pub fn described(command: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            description: Some(description.into()),
        }
    }

    /// Description if present, else the raw command.
    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.command)
    }
}

// ---------------------------------------------------------------------------
// Variable rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Slugify,
    Lowercase,
    Uppercase,
    Trim,
}

impl Transform {
    pub fn apply(self, value: &str) -> String {
        match self {
            Transform::Slugify => slugify(value),
            Transform::Lowercase => value.to_lowercase(),
            Transform::Uppercase => value.to_uppercase(),
            Transform::Trim => value.trim().to_string(),
        }
    }
}

fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut dash = false;
    for c in value.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// One rule attached to a workflow variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum VariableRule {
    /// Value used when neither overrides, vault, nor env files define the variable.
    Default { value: String },
    /// Text shown when the variable has to be prompted for.
    Prompt { message: String },
    /// Rewrite the resolved value before substitution.
    Transform { transform: Transform },
}

// ---------------------------------------------------------------------------
// WorkflowConfig / WorkflowMetadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub variables: BTreeMap<String, Vec<VariableRule>>,
    /// Persist prompted values as workflow-scoped vault entries.
    #[serde(default)]
    pub store_variables: bool,
}

impl WorkflowConfig {
    pub fn default_for(&self, name: &str) -> Option<&str> {
        self.rules(name).find_map(|r| match r {
            VariableRule::Default { value } => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn prompt_for(&self, name: &str) -> Option<&str> {
        self.rules(name).find_map(|r| match r {
            VariableRule::Prompt { message } => Some(message.as_str()),
            _ => None,
        })
    }

    pub fn transforms_for<'a>(&'a self, name: &str) -> impl Iterator<Item = Transform> + 'a {
        self.rules(name).filter_map(|r| match r {
            VariableRule::Transform { transform } => Some(*transform),
            _ => None,
        })
    }

    fn rules<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a VariableRule> + 'a {
        self.variables.get(name).into_iter().flatten()
    }

    fn validate(&self) -> Result<()> {
        for (name, rules) in &self.variables {
            if !template::is_valid_name(name) {
                return Err(Error::Validation(format!("invalid variable name '{name}'")));
            }
            let defaults = rules
                .iter()
                .filter(|r| matches!(r, VariableRule::Default { .. }))
                .count();
            if defaults > 1 {
                return Err(Error::Validation(format!(
                    "variable '{name}' declares {defaults} default values"
                )));
            }
            let mut prompts = 0;
            for rule in rules {
                if let VariableRule::Prompt { message } = rule {
                    prompts += 1;
                    if message.trim().is_empty() {
                        return Err(Error::Validation(format!(
                            "variable '{name}' has an empty prompt message"
                        )));
                    }
                }
            }
            if prompts > 1 {
                return Err(Error::Validation(format!(
                    "variable '{name}' declares {prompts} prompts"
                )));
            }
        }
        Ok(())
    }
}

/// The executable body of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub pre_checks: Vec<Atom>,
    #[serde(default)]
    pub steps: Vec<Atom>,
    #[serde(default)]
    pub actions: BTreeMap<String, Atom>,
    #[serde(default)]
    pub config: WorkflowConfig,
    /// Refuse to run unless the process is already elevated.
    #[serde(default)]
    pub uses_sudo: bool,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    /// File the workflow was loaded from; empty when it was created in place.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub use_vault: bool,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            path: String::new(),
            use_vault: false,
            metadata: WorkflowMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Every placeholder referenced by any atom, sorted.
    pub fn placeholders(&self) -> Vec<String> {
        let m = &self.metadata;
        let mut names: Vec<String> = m
            .pre_checks
            .iter()
            .chain(m.steps.iter())
            .chain(m.actions.values())
            .flat_map(|a| template::extract(&a.command))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn validate(&self) -> Result<()> {
        validate_id(&self.id)?;
        if self.name.trim().is_empty() {
            return Err(Error::Validation(format!(
                "workflow '{}' has an empty name",
                self.id
            )));
        }
        let m = &self.metadata;
        for (section, atoms) in [("pre-check", &m.pre_checks), ("step", &m.steps)] {
            for (i, atom) in atoms.iter().enumerate() {
                if atom.command.trim().is_empty() {
                    return Err(Error::Validation(format!(
                        "{section} {} has an empty command",
                        i + 1
                    )));
                }
            }
        }
        for (name, atom) in &m.actions {
            if name.trim().is_empty() {
                return Err(Error::Validation("action with an empty name".into()));
            }
            if atom.command.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "action '{name}' has an empty command"
                )));
            }
        }
        m.config.validate()
    }
}

static ID_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_\-]*$").unwrap())
}

pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 || !id_re().is_match(id) {
        return Err(Error::Validation(format!(
            "invalid workflow id '{id}': must be lowercase alphanumeric with '-' or '_'"
        )));
    }
    Ok(())
}
