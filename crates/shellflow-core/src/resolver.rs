//! Layered variable resolution.
//!
//! Precedence, highest first:
//!
//! 1. caller overrides
//! 2. vault entries (workflow > project > global) when the workflow uses the
//!    vault, otherwise the first env file found for the workflow
//! 3. `default` rules
//! 4. interactive prompt (vault-disabled workflows only)
//!
//! `transform` rules run last, on whatever value won. Overrides are used as given.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::env_file;
use crate::error::{Error, Result};
use crate::store::VaultStore;
use crate::template::Variables;
use crate::types::Scope;
use crate::workflow::{Workflow, WorkflowConfig};

// ---------------------------------------------------------------------------
// Prompter
// ---------------------------------------------------------------------------

/// Source of values for variables nothing else could resolve.
pub trait Prompter: Send + Sync {
    /// Ask for `name`. `message` is the workflow's custom prompt text, if any.
    fn prompt(&self, name: &str, message: Option<&str>) -> Result<String>;
}

/// Reads one line per variable from standard input.
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn prompt(&self, name: &str, message: Option<&str>) -> Result<String> {
        let mut out = io::stdout().lock();
        write!(out, "{}: ", message.unwrap_or(name))?;
        out.flush()?;
        drop(out);

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stdin closed while reading {name}"),
            )));
        }
        Ok(line.trim().to_string())
    }
}

/// Answers prompts from a fixed list and records what was asked.
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: Mutex<Vec<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut answers: Vec<String> = answers.into_iter().map(Into::into).collect();
        answers.reverse();
        Self {
            answers: Mutex::new(answers),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Names prompted for so far, in order.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl Prompter for ScriptedPrompter {
    fn prompt(&self, name: &str, _message: Option<&str>) -> Result<String> {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(name.to_string());
        }
        self.answers
            .lock()
            .ok()
            .and_then(|mut a| a.pop())
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("no scripted answer for {name}"),
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Everything resolution needs to know about one run.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub workflow_id: &'a str,
    pub use_vault: bool,
    pub overrides: &'a Variables,
    /// Placeholder names the run will substitute.
    pub required: &'a [String],
    pub config: &'a WorkflowConfig,
}

impl<'a> ResolveRequest<'a> {
    pub fn for_workflow(workflow: &'a Workflow, overrides: &'a Variables, required: &'a [String]) -> Self {
        Self {
            workflow_id: &workflow.id,
            use_vault: workflow.use_vault,
            overrides,
            required,
            config: &workflow.metadata.config,
        }
    }
}

// ---------------------------------------------------------------------------
// VariableResolver
// ---------------------------------------------------------------------------

pub struct VariableResolver {
    vault: Option<VaultStore>,
    env_base: PathBuf,
    prompter: Box<dyn Prompter>,
}

impl VariableResolver {
    /// Resolver reading env files relative to the current directory and
    /// prompting on stdin.
    pub fn new(vault: Option<VaultStore>) -> Self {
        Self {
            vault,
            env_base: PathBuf::from("."),
            prompter: Box::new(StdinPrompter),
        }
    }

    pub fn with_env_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.env_base = base.into();
        self
    }

    pub fn with_prompter(mut self, prompter: Box<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    /// Produce the variable set for one run.
    ///
    /// Required names may still be absent from the result when the vault is
    /// in use; substitution reports them.
    pub async fn resolve(&self, req: &ResolveRequest<'_>) -> Result<Variables> {
        let mut vars = req.overrides.clone();

        let layer = if req.use_vault {
            match &self.vault {
                Some(vault) => vault.all_for_workflow(req.workflow_id).await?,
                None => {
                    warn!(workflow = %req.workflow_id, "workflow uses the vault but no store is attached");
                    Variables::new()
                }
            }
        } else {
            env_file::load(&self.env_base, req.workflow_id)
        };
        for (k, v) in layer {
            vars.entry(k).or_insert(v);
        }

        for name in req.config.variables.keys() {
            if let Some(default) = req.config.default_for(name) {
                vars.entry(name.clone())
                    .or_insert_with(|| default.to_string());
            }
        }

        let mut prompted = Vec::new();
        if !req.use_vault {
            let mut pending: Vec<&String> = req
                .required
                .iter()
                .filter(|name| !vars.contains_key(*name))
                .collect();
            pending.sort();
            pending.dedup();
            for name in pending {
                let value = self.prompter.prompt(name, req.config.prompt_for(name))?;
                vars.insert(name.clone(), value);
                prompted.push(name.clone());
            }
        }

        for (name, value) in vars.iter_mut() {
            if req.overrides.contains_key(name) {
                continue;
            }
            for transform in req.config.transforms_for(name) {
                *value = transform.apply(value);
            }
        }

        if req.config.store_variables && !prompted.is_empty() {
            self.store_prompted(req.workflow_id, &prompted, &vars).await;
        }

        debug!(workflow = %req.workflow_id, count = vars.len(), "resolved variables");
        Ok(vars)
    }

    async fn store_prompted(&self, workflow_id: &str, names: &[String], vars: &Variables) {
        let Some(vault) = &self.vault else {
            return;
        };
        for name in names {
            let Some(value) = vars.get(name) else {
                continue;
            };
            if let Err(e) = vault.set(name, value, Scope::Workflow, Some(workflow_id)).await {
                warn!(workflow = %workflow_id, variable = %name, error = %e, "failed to store prompted variable");
            }
        }
    }
}
