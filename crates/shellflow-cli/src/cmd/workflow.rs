use anyhow::Context as _;
use clap::Subcommand;
use serde::Deserialize;
use shellflow_core::workflow::{Atom, Workflow, WorkflowConfig, WorkflowMetadata};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::context::Context;
use crate::output::{print_json, print_table};

// ---------------------------------------------------------------------------
// Subcommand tree
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum WorkflowSubcommand {
    /// Add a workflow from a YAML file, replacing any workflow with the same id
    Add {
        /// Path to the workflow file
        file: PathBuf,
    },
    /// List stored workflows
    List,
    /// Show one workflow
    Show { id: String },
    /// Delete a workflow
    Delete { id: String },
}

// ---------------------------------------------------------------------------
// Workflow file
// ---------------------------------------------------------------------------

/// On-disk YAML shape. The id defaults to the file stem.
#[derive(Debug, Deserialize)]
struct WorkflowFile {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    use_vault: bool,
    #[serde(default)]
    uses_sudo: bool,
    #[serde(default)]
    pre_checks: Vec<Atom>,
    #[serde(default)]
    steps: Vec<Atom>,
    #[serde(default)]
    actions: BTreeMap<String, Atom>,
    #[serde(default)]
    config: WorkflowConfig,
}

fn load_file(path: &Path) -> anyhow::Result<Workflow> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let file: WorkflowFile = serde_yaml::from_str(&data)
        .with_context(|| format!("invalid workflow file {}", path.display()))?;

    let id = match file.id {
        Some(id) => id,
        None => path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("cannot derive a workflow id from {}", path.display()))?,
    };

    let mut wf = Workflow::new(id, file.name);
    wf.path = path.display().to_string();
    wf.use_vault = file.use_vault;
    wf.metadata = WorkflowMetadata {
        description: file.description,
        pre_checks: file.pre_checks,
        steps: file.steps,
        actions: file.actions,
        config: file.config,
        uses_sudo: file.uses_sudo,
    };
    wf.validate()?;
    Ok(wf)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run(ctx: &Context, subcommand: WorkflowSubcommand, json: bool) -> anyhow::Result<()> {
    let store = ctx.gateway.workflows();
    match subcommand {
        WorkflowSubcommand::Add { file } => {
            let wf = load_file(&file)?;
            let saved = store.upsert(&wf).await?;
            if json {
                print_json(&saved)?;
            } else {
                println!("saved workflow '{}' ({})", saved.id, saved.name);
            }
            Ok(())
        }

        WorkflowSubcommand::List => {
            let workflows = store.list().await?;
            if json {
                return print_json(&workflows);
            }
            if workflows.is_empty() {
                println!("no workflows in {}", ctx.home.display());
                println!("\nAdd one:  shellflow workflow add <file.yaml>");
                return Ok(());
            }
            print_table(
                &["ID", "NAME", "CHECKS", "STEPS", "ACTIONS", "VAULT"],
                workflows
                    .iter()
                    .map(|w| {
                        vec![
                            w.id.clone(),
                            w.name.clone(),
                            w.metadata.pre_checks.len().to_string(),
                            w.metadata.steps.len().to_string(),
                            w.metadata.actions.len().to_string(),
                            if w.use_vault { "yes" } else { "no" }.to_string(),
                        ]
                    })
                    .collect(),
            );
            Ok(())
        }

        WorkflowSubcommand::Show { id } => {
            let wf = store.get(&id).await?;
            if json {
                print_json(&wf)?;
            } else {
                print!("{}", serde_yaml::to_string(&wf)?);
                let vars = wf.placeholders();
                if !vars.is_empty() {
                    println!("# variables: {}", vars.join(", "));
                }
            }
            Ok(())
        }

        WorkflowSubcommand::Delete { id } => {
            store.delete(&id).await?;
            println!("deleted workflow '{id}'");
            Ok(())
        }
    }
}
