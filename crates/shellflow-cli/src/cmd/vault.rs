use clap::Subcommand;
use shellflow_core::{store::VaultEntry, types::Scope};

use crate::context::Context;
use crate::output::{print_json, print_table};

#[derive(Subcommand)]
pub enum VaultSubcommand {
    /// Create or update a variable
    Set {
        key: String,
        value: String,
        /// global, project, or workflow (default: workflow when --workflow is given, else global)
        #[arg(long)]
        scope: Option<Scope>,
        /// Workflow id for workflow-scoped variables
        #[arg(long)]
        workflow: Option<String>,
    },
    /// Print a variable's value; without --scope, search workflow, project, then global
    Get {
        key: String,
        #[arg(long)]
        scope: Option<Scope>,
        #[arg(long)]
        workflow: Option<String>,
    },
    /// List variables
    List {
        #[arg(long)]
        scope: Option<Scope>,
        #[arg(long)]
        workflow: Option<String>,
    },
    /// Delete a variable
    Delete {
        key: String,
        #[arg(long)]
        scope: Option<Scope>,
        #[arg(long)]
        workflow: Option<String>,
    },
}

/// Explicit scope, else workflow scope when a workflow is named.
fn scope_for(scope: Option<Scope>, workflow: Option<&str>) -> Scope {
    scope.unwrap_or(if workflow.is_some() {
        Scope::Workflow
    } else {
        Scope::Global
    })
}

fn rows(entries: &[VaultEntry]) -> Vec<Vec<String>> {
    entries
        .iter()
        .map(|e| {
            vec![
                e.key.clone(),
                e.scope.to_string(),
                e.workflow_id.clone().unwrap_or_else(|| "-".into()),
                e.value.clone(),
                e.updated_at.format("%Y-%m-%d %H:%M").to_string(),
            ]
        })
        .collect()
}

pub async fn run(ctx: &Context, subcommand: VaultSubcommand, json: bool) -> anyhow::Result<()> {
    let vault = ctx.gateway.vault();
    match subcommand {
        VaultSubcommand::Set {
            key,
            value,
            scope,
            workflow,
        } => {
            let scope = scope_for(scope, workflow.as_deref());
            let entry = vault.set(&key, &value, scope, workflow.as_deref()).await?;
            if json {
                print_json(&entry)?;
            } else {
                println!("set {} ({})", entry.key, entry.scope);
            }
            Ok(())
        }

        VaultSubcommand::Get {
            key,
            scope,
            workflow,
        } => {
            let entry = match scope {
                Some(scope) => vault.get(&key, scope, workflow.as_deref()).await?,
                None => vault.get_with_fallback(&key, workflow.as_deref()).await?,
            };
            if json {
                print_json(&entry)?;
            } else {
                println!("{}", entry.value);
            }
            Ok(())
        }

        VaultSubcommand::List { scope, workflow } => {
            let entries = vault.list(scope, workflow.as_deref()).await?;
            if json {
                return print_json(&entries);
            }
            if entries.is_empty() {
                println!("no variables");
                return Ok(());
            }
            print_table(&["KEY", "SCOPE", "WORKFLOW", "VALUE", "UPDATED"], rows(&entries));
            Ok(())
        }

        VaultSubcommand::Delete {
            key,
            scope,
            workflow,
        } => {
            let scope = scope_for(scope, workflow.as_deref());
            vault.delete(&key, scope, workflow.as_deref()).await?;
            println!("deleted {key} ({scope})");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_defaults_follow_workflow_flag() {
        assert_eq!(scope_for(None, None), Scope::Global);
        assert_eq!(scope_for(None, Some("wf")), Scope::Workflow);
        assert_eq!(scope_for(Some(Scope::Project), None), Scope::Project);
    }
}
