//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use codelens_core::{ObservedEdge, UnitId};
use codelens_engine::api::{self, ToolResponse};
use codelens_engine::{CancelToken, PatchRequest, ProjectContext};
use codelens_watcher::WatcherService;
use serde::Serialize;

/// Open the project and persist whatever the refresh changed.
async fn open(root: &Path) -> anyhow::Result<ProjectContext> {
    let ctx = ProjectContext::open(root)
        .await
        .with_context(|| format!("opening project at {}", root.display()))?;
    if let Err(e) = ctx.save() {
        tracing::warn!("Could not save state: {}", e);
    }
    Ok(ctx)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the envelope; a failed response also fails the command.
fn respond<T: Serialize>(response: ToolResponse<T>) -> anyhow::Result<()> {
    print_json(&response)?;
    match response.error {
        Some(error) => anyhow::bail!("{}: {}", error.code, error.message),
        None => Ok(()),
    }
}

pub async fn index(root: PathBuf, full: bool) -> anyhow::Result<()> {
    tracing::info!("Indexing repository: {}", root.display());

    let ctx = ProjectContext::new(&root)?;
    let report = if !full && ctx.restore()? { ctx.refresh().await? } else { ctx.index_all().await? };
    ctx.save()?;

    let snapshot = ctx.snapshot();
    tracing::info!(
        "Graph has {} units, {} edges across {} files",
        snapshot.unit_count(),
        snapshot.edge_count(),
        snapshot.file_count()
    );
    print_json(&report)
}

pub async fn impact(root: PathBuf, id: &str, depth: Option<usize>) -> anyhow::Result<()> {
    let ctx = open(&root).await?;
    respond(api::check_impact(&ctx, id, depth))
}

pub async fn usages(root: PathBuf, id: &str) -> anyhow::Result<()> {
    let ctx = open(&root).await?;
    respond(api::find_usages(&ctx, id))
}

pub async fn dead_code(root: PathBuf, entries: Vec<String>) -> anyhow::Result<()> {
    let ctx = open(&root).await?;
    let entries = if entries.is_empty() { None } else { Some(entries.into_iter().map(UnitId::new).collect()) };
    respond(api::dead_code(&ctx, entries))
}

pub async fn cycles(root: PathBuf) -> anyhow::Result<()> {
    let ctx = open(&root).await?;
    respond(api::cycles(&ctx))
}

pub async fn unresolved(root: PathBuf) -> anyhow::Result<()> {
    let ctx = open(&root).await?;
    respond(api::unresolved(&ctx))
}

pub async fn patch(root: PathBuf, batch: PathBuf, dry_run: bool) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&batch).with_context(|| format!("reading {}", batch.display()))?;
    let requests: Vec<PatchRequest> =
        serde_json::from_str(&text).with_context(|| format!("parsing patch batch {}", batch.display()))?;
    let ctx = open(&root).await?;

    if dry_run {
        let proposals: Vec<_> = requests.iter().map(|request| api::propose_patch(&ctx, request)).collect();
        return print_json(&proposals);
    }
    respond(api::apply_batch(&ctx, requests, &CancelToken::new()).await)
}

pub async fn merge_trace(root: PathBuf, trace: PathBuf) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&trace).with_context(|| format!("reading {}", trace.display()))?;
    let observed: Vec<ObservedEdge> =
        serde_json::from_str(&text).with_context(|| format!("parsing trace {}", trace.display()))?;
    let ctx = open(&root).await?;
    tracing::info!("Merging {} observed edges", observed.len());
    respond(api::merge_observed(&ctx, observed))
}

pub async fn watch(root: PathBuf) -> anyhow::Result<()> {
    let ctx = Arc::new(open(&root).await?);
    let service = WatcherService::new(Arc::clone(&ctx))?;
    tracing::info!("Watching {} (Ctrl-C to stop)", root.display());

    let stats = service
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;
    ctx.save()?;
    print_json(&stats)
}

pub fn clear(root: PathBuf) -> anyhow::Result<()> {
    tracing::info!("Clearing cache for: {}", root.display());

    codelens_core::cache::clear_cache(&root)?;

    tracing::info!("Cache cleared");
    Ok(())
}
