use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Visibility tier of a vault entry. More specific scopes win on lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    Project,
    Workflow,
}

impl Scope {
    /// Lookup order for a workflow: most specific first.
    pub fn fallback_order() -> &'static [Scope] {
        &[Scope::Workflow, Scope::Project, Scope::Global]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Project => "project",
            Scope::Workflow => "workflow",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Scope::Global),
            "project" => Ok(Scope::Project),
            "workflow" => Ok(Scope::Workflow),
            other => Err(Error::Validation(format!(
                "unknown scope '{other}': expected global, project, or workflow"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AtomKind
// ---------------------------------------------------------------------------

/// Which section of a workflow an atom came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomKind {
    PreCheck,
    Step,
    Action,
}

impl AtomKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AtomKind::PreCheck => "pre-check",
            AtomKind::Step => "step",
            AtomKind::Action => "action",
        }
    }
}

impl fmt::Display for AtomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
