//! Turning a workflow and a request into the exact commands a run executes.
//!
//! Planning is side-effect free. Every atom the run will execute is
//! substituted up front, so a missing variable or unknown action is reported
//! before the first command starts.

use crate::error::{Error, Result};
use crate::template::{self, Variables};
use crate::types::AtomKind;
use crate::workflow::{Atom, Workflow};

/// What a run should do after its pre-checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunRequest {
    PreChecksOnly,
    Steps,
    /// Named actions in caller order. An empty list means `Steps`.
    Actions(Vec<String>),
}

impl RunRequest {
    pub fn actions<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            RunRequest::Steps
        } else {
            RunRequest::Actions(names)
        }
    }

    /// Short description for headers and run logs.
    pub fn label(&self) -> String {
        match self {
            RunRequest::PreChecksOnly => "pre-checks".to_string(),
            RunRequest::Steps => "run".to_string(),
            RunRequest::Actions(names) if names.is_empty() => "run".to_string(),
            RunRequest::Actions(names) => names.join(", "),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlannedAtom {
    pub kind: AtomKind,
    /// 1-based position within its phase.
    pub index: usize,
    pub label: String,
    pub command: String,
}

#[derive(Debug, Default)]
pub(crate) struct Plan {
    pub pre_checks: Vec<PlannedAtom>,
    pub main: Vec<PlannedAtom>,
}

impl Plan {
    pub fn main_kind(&self) -> Option<AtomKind> {
        self.main.first().map(|a| a.kind)
    }
}

/// Atoms selected by `request`, unsubstituted.
fn select<'a>(workflow: &'a Workflow, request: &RunRequest) -> Result<Vec<(AtomKind, usize, &'a Atom)>> {
    let m = &workflow.metadata;
    let mut atoms: Vec<(AtomKind, usize, &Atom)> = m
        .pre_checks
        .iter()
        .enumerate()
        .map(|(i, a)| (AtomKind::PreCheck, i + 1, a))
        .collect();

    match request {
        RunRequest::PreChecksOnly => {}
        RunRequest::Actions(names) if !names.is_empty() => {
            let unknown: Vec<&str> = names
                .iter()
                .filter(|n| !m.actions.contains_key(n.as_str()))
                .map(String::as_str)
                .collect();
            if !unknown.is_empty() {
                return Err(Error::Validation(format!(
                    "workflow '{}' has no action named {}",
                    workflow.id,
                    unknown
                        .iter()
                        .map(|n| format!("'{n}'"))
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
            for (i, name) in names.iter().enumerate() {
                if let Some(atom) = m.actions.get(name) {
                    atoms.push((AtomKind::Action, i + 1, atom));
                }
            }
        }
        RunRequest::Steps | RunRequest::Actions(_) => {
            atoms.extend(
                m.steps
                    .iter()
                    .enumerate()
                    .map(|(i, a)| (AtomKind::Step, i + 1, a)),
            );
        }
    }
    Ok(atoms)
}

/// Placeholder names the run described by `request` needs, sorted.
pub fn required_variables(workflow: &Workflow, request: &RunRequest) -> Result<Vec<String>> {
    let mut names: Vec<String> = select(workflow, request)?
        .into_iter()
        .flat_map(|(_, _, atom)| template::extract(&atom.command))
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}

/// Substitute every selected atom. Fails with all missing names at once.
pub(crate) fn build(workflow: &Workflow, request: &RunRequest, vars: &Variables) -> Result<Plan> {
    let atoms = select(workflow, request)?;

    let mut missing: Vec<String> = atoms
        .iter()
        .flat_map(|(_, _, atom)| template::missing(&atom.command, vars))
        .collect();
    missing.sort();
    missing.dedup();
    if !missing.is_empty() {
        return Err(Error::MissingVariables(missing));
    }

    let mut plan = Plan::default();
    for (kind, index, atom) in atoms {
        let planned = PlannedAtom {
            kind,
            index,
            label: atom.label().to_string(),
            command: template::apply(&atom.command, vars)?,
        };
        match kind {
            AtomKind::PreCheck => plan.pre_checks.push(planned),
            AtomKind::Step | AtomKind::Action => plan.main.push(planned),
        }
    }
    Ok(plan)
}
