//! `progress` and `reset` command handlers.

use optrack_checkpoint::{ArtifactStore, CheckpointStore, ProgressSummary};
use optrack_core::AppConfig;

pub(crate) fn run_progress(config: &AppConfig) -> anyhow::Result<()> {
    let store = CheckpointStore::load(&config.checkpoint_path)?;
    print!("{}", render_progress(&store.progress()?));
    Ok(())
}

/// Clears the checkpoint and every stored stage artifact.
///
/// Artifacts go too: a stale artifact would otherwise be reloaded once its
/// stage is marked complete again.
pub(crate) fn run_reset(config: &AppConfig) -> anyhow::Result<()> {
    let store = CheckpointStore::load(&config.checkpoint_path)?;
    store.reset()?;
    ArtifactStore::new(&config.artifacts_dir).clear()?;
    println!(
        "reset checkpoint {} and artifacts under {}",
        config.checkpoint_path.display(),
        config.artifacts_dir.display()
    );
    Ok(())
}

pub(crate) fn render_progress(progress: &ProgressSummary) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    let _ = writeln!(
        out,
        "units: {} tracked, {} fully processed",
        progress.total_units, progress.processed_units
    );
    for (stage, done) in &progress.stage_progress {
        let _ = writeln!(out, "  {:<11} {done}", stage.name());
    }
    let _ = writeln!(
        out,
        "last processed: {}",
        progress.last_processed_unit.as_deref().unwrap_or("-")
    );
    if let Some(cursor) = progress.cursor {
        let _ = writeln!(out, "cursor: {cursor}");
    }
    let _ = writeln!(out, "cached oracle responses: {}", progress.cached_responses);
    let _ = writeln!(out, "updated: {}", progress.updated_at.to_rfc3339());
    out
}
