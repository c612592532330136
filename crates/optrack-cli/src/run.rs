//! `run` command handler.
//!
//! Loads the candidates file, wires the checkpoint, artifact store and
//! oracle into a [`Pipeline`], and exports the results to the output
//! directory. Ctrl-C sets the pipeline's cancel flag, so an interrupted run
//! stops at the next stage boundary and resumes on the next invocation.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use optrack_checkpoint::{ArtifactStore, CheckpointStore};
use optrack_consolidate::{Pipeline, PipelineInput, PipelineOptions, PipelineOutput, RunReport};
use optrack_core::{load_tuning, AppConfig, Tuning};
use optrack_oracle::{DisabledOracle, LlmOracleClient, LlmOracleSettings, RelationOracle};
use serde::Serialize;

pub(crate) async fn run_pipeline(
    config: &AppConfig,
    input_path: &Path,
    no_oracle: bool,
    fresh: bool,
) -> anyhow::Result<()> {
    let input = read_input(input_path)?;
    let tuning = match &config.tuning_path {
        Some(path) => load_tuning(path)?,
        None => Tuning::default(),
    };

    let store = CheckpointStore::load(&config.checkpoint_path)?;
    let artifacts = ArtifactStore::new(&config.artifacts_dir);
    if fresh {
        store.reset()?;
        artifacts.clear()?;
    }

    let oracle = build_oracle(config, no_oracle)?;
    tracing::info!(
        units = input.units.len(),
        oracle = oracle.name(),
        checkpoint = %config.checkpoint_path.display(),
        "starting consolidation run"
    );

    let cancel = Arc::new(AtomicBool::new(false));
    let signal = tokio::spawn(cancel_on_ctrl_c(Arc::clone(&cancel)));

    let pipeline = Pipeline::new(
        &store,
        &artifacts,
        oracle.as_ref(),
        PipelineOptions::from_app_config(config, tuning),
    )
    .with_cancel_flag(cancel);
    let result = pipeline.run(&input).await;
    signal.abort();
    let output = result?;

    write_outputs(&config.output_dir, &output)?;
    print!("{}", render_report(&output.report));
    if output.report.cancelled {
        println!("run interrupted; rerun the same command to resume");
    }
    Ok(())
}

fn read_input(path: &Path) -> anyhow::Result<PipelineInput> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read input file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse input file {}", path.display()))
}

fn build_oracle(config: &AppConfig, no_oracle: bool) -> anyhow::Result<Box<dyn RelationOracle>> {
    if no_oracle {
        return Ok(Box::new(DisabledOracle));
    }
    match LlmOracleSettings::from_app_config(config) {
        Some(settings) => {
            let client = LlmOracleClient::new(settings)
                .map_err(|e| anyhow::anyhow!("failed to build oracle client: {e}"))?;
            Ok(Box::new(client))
        }
        None => {
            tracing::warn!("OPTRACK_ORACLE_API_KEY is not set; borderline pairs use heuristics");
            Ok(Box::new(DisabledOracle))
        }
    }
}

async fn cancel_on_ctrl_c(flag: Arc<AtomicBool>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::warn!("interrupt received; stopping at the next stage boundary");
        flag.store(true, Ordering::SeqCst);
    }
}

/// Write `opinions.json`, `chains.json`, `journeys.json` and `report.json`.
pub(crate) fn write_outputs(dir: &Path, output: &PipelineOutput) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    write_json(&dir.join("opinions.json"), &output.opinions)?;
    write_json(&dir.join("chains.json"), &output.chains)?;
    write_json(&dir.join("journeys.json"), &output.journeys)?;
    write_json(&dir.join("report.json"), &output.report)?;
    tracing::info!(
        dir = %dir.display(),
        opinions = output.opinions.len(),
        chains = output.chains.len(),
        speakers = output.journeys.len(),
        "outputs written"
    );
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

pub(crate) fn render_report(report: &RunReport) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    let _ = writeln!(
        out,
        "source units: {} valid of {}",
        report.units_valid, report.units_total
    );
    let _ = writeln!(
        out,
        "partitions: {} completed of {}",
        report.partitions_completed, report.partitions_total
    );
    let _ = writeln!(
        out,
        "oracle: {} calls, {} cache hits, {} heuristic fallbacks",
        report.oracle_calls, report.oracle_cache_hits, report.oracle_fallbacks
    );
    for failure in &report.failures {
        let _ = writeln!(
            out,
            "failed partition {} at {}: {}",
            failure.category, failure.stage, failure.reason
        );
    }
    for unit in &report.invalid_units {
        let _ = writeln!(out, "skipped unit {}: {}", unit.unit_id, unit.reason);
    }
    out
}
