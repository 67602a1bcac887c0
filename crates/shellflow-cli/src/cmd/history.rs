use crate::context::Context;
use crate::output::{print_json, print_table};

pub async fn run(
    ctx: &Context,
    limit: Option<usize>,
    workflow: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let limit = limit.unwrap_or(ctx.config.history_limit);
    let runs = ctx.gateway.runs();
    let runs = match workflow {
        Some(id) => runs.list_for_workflow(id, limit).await?,
        None => runs.list_recent(limit).await?,
    };

    if json {
        return print_json(&runs);
    }
    if runs.is_empty() {
        println!("no runs recorded");
        return Ok(());
    }
    print_table(
        &["ID", "WORKFLOW", "STATUS", "STARTED", "DURATION"],
        runs.iter()
            .map(|r| {
                let duration = r
                    .completed_at
                    .map(|done| {
                        let ms = (done - r.started_at).num_milliseconds().max(0);
                        format!("{:.1}s", ms as f64 / 1000.0)
                    })
                    .unwrap_or_else(|| "-".into());
                vec![
                    r.id.to_string(),
                    r.workflow_id.clone(),
                    r.status.to_string(),
                    r.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    duration,
                ]
            })
            .collect(),
    );
    Ok(())
}
