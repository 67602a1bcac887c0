use anyhow::Context as _;
use shellflow_core::{
    console::Console,
    orchestrator::{required_variables, Orchestrator, RunRequest},
    resolver::{ResolveRequest, VariableResolver},
    runner::{CommandRunner, PtyRunner},
    template::Variables,
};
use std::path::PathBuf;
use std::sync::Arc;

use crate::context::Context;

pub struct RunArgs {
    pub id: String,
    pub actions: Vec<String>,
    pub vars: Vec<(String, String)>,
    pub pre_checks_only: bool,
    pub env_dir: Option<PathBuf>,
}

impl RunArgs {
    fn request(&self) -> RunRequest {
        if self.pre_checks_only {
            RunRequest::PreChecksOnly
        } else {
            RunRequest::actions(self.actions.iter().cloned())
        }
    }
}

pub async fn run(ctx: &Context, args: RunArgs) -> anyhow::Result<()> {
    let workflow = ctx
        .gateway
        .workflows()
        .get(&args.id)
        .await
        .with_context(|| format!("cannot load workflow '{}'", args.id))?;

    let request = args.request();
    let required = required_variables(&workflow, &request)?;
    let overrides: Variables = args.vars.iter().cloned().collect();

    let mut resolver = VariableResolver::new(Some(ctx.gateway.vault()));
    if let Some(dir) = &args.env_dir {
        resolver = resolver.with_env_base(dir);
    }
    let variables = resolver
        .resolve(&ResolveRequest::for_workflow(&workflow, &overrides, &required))
        .await
        .context("failed to resolve variables")?;

    let runner: Arc<dyn CommandRunner> = Arc::new(PtyRunner::new());
    let orchestrator = Orchestrator::new(workflow, variables, runner)
        .with_console(Arc::new(Console::stdout()))
        .with_history(ctx.gateway.runs());

    orchestrator.execute(&request).await?.into_result()?;
    Ok(())
}
