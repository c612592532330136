//! Resumable orchestration of the consolidation stages.
//!
//! Source units are validated and grouped into category partitions. Each
//! partition runs relate, merge, evolve and track in order; partitions run
//! concurrently with no shared state besides the checkpoint store. Every
//! stage output is saved as an artifact before the stage is marked
//! complete, so a rerun reloads finished work instead of redoing it.
//! A unit or partition whose candidates differ from the ones its stages
//! were computed from has its core stages cleared and runs them again.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use optrack_checkpoint::{content_digest, ArtifactStore, CheckpointStore, StageStats};
use optrack_core::{
    AppConfig, CategoryId, EvolutionChain, Opinion, OpinionCandidate, SpeakerJourney, Stage,
    Tuning, ValidationError,
};
use optrack_oracle::RelationOracle;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::CachedOracle;
use crate::classify::{Classification, Classifier, ClassifyStats};
use crate::error::ConsolidateError;
use crate::evolution::{assign_chain_ids, build_chains};
use crate::journey::{build_journeys, merge_journeys};
use crate::merge::{process_relationships, MergeOutcome};
use crate::similarity::{partition_by_category, PartitionScores};

const CORE_STAGES: [Stage; 4] = [Stage::Relate, Stage::Merge, Stage::Evolve, Stage::Track];

/// Candidates grouped by source unit id, as produced by extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineInput {
    pub units: BTreeMap<String, Vec<OpinionCandidate>>,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub tuning: Tuning,
    pub max_concurrent_partitions: usize,
    /// Upper bound on one oracle question, retries included.
    pub oracle_deadline: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            tuning: Tuning::default(),
            max_concurrent_partitions: 4,
            oracle_deadline: Duration::from_secs(150),
        }
    }
}

impl PipelineOptions {
    /// Options from the environment configuration. The oracle deadline
    /// covers every retry attempt plus the worst-case backoff between them.
    #[must_use]
    pub fn from_app_config(config: &AppConfig, tuning: Tuning) -> Self {
        let attempts = u64::from(config.oracle_max_retries) + 1;
        let backoff_secs = 30 * u64::from(config.oracle_max_retries);
        Self {
            tuning,
            max_concurrent_partitions: config.max_concurrent_partitions.max(1),
            oracle_deadline: Duration::from_secs(
                config
                    .oracle_timeout_secs
                    .saturating_mul(attempts)
                    .saturating_add(backoff_secs),
            ),
        }
    }
}

/// A source unit rejected at ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidUnit {
    pub unit_id: String,
    pub reason: String,
}

/// A partition that stopped on a data-integrity error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionFailure {
    pub category: String,
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub units_total: usize,
    pub units_valid: usize,
    pub invalid_units: Vec<InvalidUnit>,
    pub partitions_total: usize,
    pub partitions_completed: usize,
    pub failures: Vec<PartitionFailure>,
    pub cancelled: bool,
    /// Live oracle calls made by this run; cache hits are not counted.
    pub oracle_calls: u64,
    pub oracle_cache_hits: u64,
    pub oracle_fallbacks: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub opinions: Vec<Opinion>,
    pub chains: Vec<EvolutionChain>,
    pub journeys: BTreeMap<String, SpeakerJourney>,
    pub report: RunReport,
}

/// Evolve-stage artifact: opinions with chain ids assigned, and the chains.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Evolved {
    opinions: Vec<Opinion>,
    chains: Vec<EvolutionChain>,
}

struct PartitionResult {
    opinions: Vec<Opinion>,
    chains: Vec<EvolutionChain>,
    journeys: BTreeMap<String, SpeakerJourney>,
    /// Classifier counters when relate ran in this process.
    fresh_stats: Option<ClassifyStats>,
}

pub struct Pipeline<'a> {
    store: &'a CheckpointStore,
    artifacts: &'a ArtifactStore,
    oracle: &'a dyn RelationOracle,
    options: PipelineOptions,
    cancel: Arc<AtomicBool>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        store: &'a CheckpointStore,
        artifacts: &'a ArtifactStore,
        oracle: &'a dyn RelationOracle,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            artifacts,
            oracle,
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use `flag` as the cancellation signal. Setting it stops the run
    /// before the next source unit or stage; in-flight oracle calls finish.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run every stage that is not yet complete.
    ///
    /// Partition-local data errors are reported in [`RunReport::failures`]
    /// and do not stop other partitions. Cancellation returns whatever
    /// finished with [`RunReport::cancelled`] set.
    ///
    /// # Errors
    ///
    /// Returns [`ConsolidateError::Checkpoint`] on checkpoint or artifact
    /// I/O failure, corruption, or an out-of-order stage.
    pub async fn run(&self, input: &PipelineInput) -> Result<PipelineOutput, ConsolidateError> {
        let mut output = PipelineOutput::default();
        output.report.units_total = input.units.len();

        let valid_units = match self.ingest(input, &mut output.report) {
            Ok(units) => units,
            Err(ConsolidateError::Cancelled) => {
                tracing::warn!("run cancelled during ingestion");
                output.report.cancelled = true;
                return Ok(output);
            }
            Err(e) => return Err(e),
        };
        output.report.units_valid = valid_units.len();

        let candidates: Vec<OpinionCandidate> = valid_units
            .iter()
            .flat_map(|unit| input.units[unit].iter().cloned())
            .collect();
        let partitions = partition_by_category(candidates);
        output.report.partitions_total = partitions.len();
        for (category, members) in &partitions {
            let key = partition_key(category);
            let stats = StageStats {
                items_in: members.len() as u64,
                items_out: members.len() as u64,
                ..StageStats::default()
            };
            self.store.mark_stage_complete(&key, Stage::Raw, &stats)?;
            self.store.mark_stage_complete(&key, Stage::Categorize, &stats)?;
            if self
                .store
                .sync_fingerprint(&key, &input_fingerprint(members)?, Stage::Relate)?
            {
                tracing::info!(category = %category, "partition input changed, recomputing");
            }
        }
        tracing::info!(
            units = valid_units.len(),
            partitions = partitions.len(),
            "ingestion complete"
        );

        let limit = self.options.max_concurrent_partitions.max(1);
        let results: Vec<(&CategoryId, Result<PartitionResult, (Stage, ConsolidateError)>)> =
            stream::iter(&partitions)
                .map(|(category, members)| async move {
                    (category, self.run_partition(category, members).await)
                })
                .buffer_unordered(limit)
                .collect()
                .await;

        let by_category: BTreeMap<&CategoryId, _> = results.into_iter().collect();
        let mut completed: BTreeSet<&CategoryId> = BTreeSet::new();
        let mut journey_parts = Vec::new();
        for (category, result) in by_category {
            match result {
                Ok(part) => {
                    if let Some(fresh) = &part.fresh_stats {
                        output.report.oracle_calls += fresh.oracle_calls;
                        output.report.oracle_cache_hits += fresh.oracle_cache_hits;
                        output.report.oracle_fallbacks += fresh.oracle_fallbacks;
                    }
                    output.opinions.extend(part.opinions);
                    output.chains.extend(part.chains);
                    journey_parts.push(part.journeys);
                    completed.insert(category);
                }
                Err((_, ConsolidateError::Cancelled)) => output.report.cancelled = true,
                Err((stage, e)) if e.is_partition_local() => {
                    tracing::error!(
                        category = %category,
                        %stage,
                        error = %e,
                        "partition failed"
                    );
                    self.store.record_failure(stage)?;
                    output.report.failures.push(PartitionFailure {
                        category: category.to_string(),
                        stage,
                        reason: e.to_string(),
                    });
                }
                Err((stage, e)) => {
                    tracing::error!(category = %category, %stage, error = %e, "run aborted");
                    return Err(e);
                }
            }
        }
        output.report.partitions_completed = completed.len();
        output.journeys = merge_journeys(journey_parts);

        self.complete_units(input, &valid_units, &completed)?;

        tracing::info!(
            opinions = output.opinions.len(),
            chains = output.chains.len(),
            speakers = output.journeys.len(),
            failed_partitions = output.report.failures.len(),
            cancelled = output.report.cancelled,
            "run finished"
        );
        Ok(output)
    }

    /// Validate every source unit. Returns the ids of the units that passed,
    /// in input order, and records the rest in `report`.
    fn ingest(
        &self,
        input: &PipelineInput,
        report: &mut RunReport,
    ) -> Result<Vec<String>, ConsolidateError> {
        let mut owner: BTreeMap<&str, &str> = BTreeMap::new();
        let mut valid = Vec::new();

        for (unit_id, candidates) in &input.units {
            self.check_cancel()?;
            match validate_unit(unit_id, candidates, &owner) {
                Ok(()) => {
                    for c in candidates {
                        owner.insert(&c.id, unit_id);
                    }
                    let stats = StageStats {
                        items_in: candidates.len() as u64,
                        items_out: candidates.len() as u64,
                        ..StageStats::default()
                    };
                    self.store.mark_stage_complete(unit_id, Stage::Raw, &stats)?;
                    self.store
                        .mark_stage_complete(unit_id, Stage::Categorize, &stats)?;
                    self.store.sync_fingerprint(
                        unit_id,
                        &input_fingerprint(candidates)?,
                        Stage::Relate,
                    )?;
                    valid.push(unit_id.clone());
                }
                Err(e) => {
                    tracing::warn!(unit = %unit_id, error = %e, "skipping invalid source unit");
                    self.store.record_failure(Stage::Raw)?;
                    report.invalid_units.push(InvalidUnit {
                        unit_id: unit_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(valid)
    }

    async fn run_partition(
        &self,
        category: &CategoryId,
        candidates: &[OpinionCandidate],
    ) -> Result<PartitionResult, (Stage, ConsolidateError)> {
        let key = partition_key(category);
        tracing::info!(category = %category, candidates = candidates.len(), "partition started");

        let (classification, fresh_stats) = self
            .relate(&key, candidates)
            .await
            .map_err(|e| (Stage::Relate, e))?;
        let merged = self
            .merge(&key, candidates, &classification)
            .map_err(|e| (Stage::Merge, e))?;
        let evolved = self
            .evolve(&key, category, merged)
            .map_err(|e| (Stage::Evolve, e))?;
        let journeys = self
            .track(&key, &evolved)
            .map_err(|e| (Stage::Track, e))?;

        tracing::info!(
            category = %category,
            opinions = evolved.opinions.len(),
            chains = evolved.chains.len(),
            "partition complete"
        );
        Ok(PartitionResult {
            opinions: evolved.opinions,
            chains: evolved.chains,
            journeys,
            fresh_stats,
        })
    }

    async fn relate(
        &self,
        key: &str,
        candidates: &[OpinionCandidate],
    ) -> Result<(Classification, Option<ClassifyStats>), ConsolidateError> {
        if let Some(done) = self.resume::<Classification>(key, Stage::Relate)? {
            return Ok((done, None));
        }
        self.check_cancel()?;

        let started = Instant::now();
        let tuning = &self.options.tuning;
        let scores = PartitionScores::new(candidates, &tuning.weights);
        let clusters = scores.cluster(tuning.effective_cluster_threshold());
        let oracle = CachedOracle::new(self.oracle, self.store, self.options.oracle_deadline);
        let classification = Classifier::new(tuning, &oracle)
            .classify(&scores, &clusters)
            .await?;

        let stats = StageStats {
            items_in: candidates.len() as u64,
            items_out: classification.relationships.len() as u64,
            elapsed_ms: elapsed_ms(started),
            oracle_calls: classification.stats.oracle_calls,
            oracle_fallbacks: classification.stats.oracle_fallbacks,
            ..StageStats::default()
        };
        self.finish(key, Stage::Relate, &classification, &stats)?;
        let fresh = classification.stats.clone();
        Ok((classification, Some(fresh)))
    }

    fn merge(
        &self,
        key: &str,
        candidates: &[OpinionCandidate],
        classification: &Classification,
    ) -> Result<MergeOutcome, ConsolidateError> {
        if let Some(done) = self.resume::<MergeOutcome>(key, Stage::Merge)? {
            return Ok(done);
        }
        self.check_cancel()?;

        let started = Instant::now();
        let outcome = process_relationships(candidates, &classification.relationships)?;
        let stats = StageStats {
            items_in: candidates.len() as u64,
            items_out: outcome.opinions.len() as u64,
            elapsed_ms: elapsed_ms(started),
            ..StageStats::default()
        };
        self.finish(key, Stage::Merge, &outcome, &stats)?;
        Ok(outcome)
    }

    fn evolve(
        &self,
        key: &str,
        category: &CategoryId,
        merged: MergeOutcome,
    ) -> Result<Evolved, ConsolidateError> {
        if let Some(done) = self.resume::<Evolved>(key, Stage::Evolve)? {
            return Ok(done);
        }
        self.check_cancel()?;

        let started = Instant::now();
        let chains = build_chains(
            category,
            &merged.opinions,
            &merged.evolution_edges,
            self.options.tuning.max_chain_paths,
        )?;
        let mut opinions = merged.opinions;
        assign_chain_ids(&mut opinions, &chains);
        let evolved = Evolved { opinions, chains };

        let stats = StageStats {
            items_in: merged.evolution_edges.len() as u64,
            items_out: evolved.chains.len() as u64,
            elapsed_ms: elapsed_ms(started),
            ..StageStats::default()
        };
        self.finish(key, Stage::Evolve, &evolved, &stats)?;
        Ok(evolved)
    }

    fn track(
        &self,
        key: &str,
        evolved: &Evolved,
    ) -> Result<BTreeMap<String, SpeakerJourney>, ConsolidateError> {
        if let Some(done) = self.resume(key, Stage::Track)? {
            return Ok(done);
        }
        self.check_cancel()?;

        let started = Instant::now();
        let journeys = build_journeys(&evolved.opinions, &evolved.chains);
        let stats = StageStats {
            items_in: evolved.opinions.len() as u64,
            items_out: journeys.len() as u64,
            elapsed_ms: elapsed_ms(started),
            ..StageStats::default()
        };
        self.finish(key, Stage::Track, &journeys, &stats)?;
        Ok(journeys)
    }

    /// The saved output of a completed stage, or `None` if it must run.
    fn resume<T: DeserializeOwned>(
        &self,
        key: &str,
        stage: Stage,
    ) -> Result<Option<T>, ConsolidateError> {
        if !self.store.is_stage_complete(key, stage)? {
            return Ok(None);
        }
        match self.artifacts.load::<T>(key, stage)? {
            Some(done) => {
                tracing::debug!(partition = key, %stage, "stage already complete, reusing artifact");
                Ok(Some(done))
            }
            None => {
                tracing::warn!(
                    partition = key,
                    %stage,
                    "stage marked complete but artifact is missing, recomputing"
                );
                Ok(None)
            }
        }
    }

    /// Persist the artifact, then mark the stage complete.
    fn finish<T: Serialize>(
        &self,
        key: &str,
        stage: Stage,
        artifact: &T,
        stats: &StageStats,
    ) -> Result<(), ConsolidateError> {
        self.artifacts.save(key, stage, artifact)?;
        self.store.mark_stage_complete(key, stage, stats)?;
        tracing::info!(partition = key, %stage, elapsed_ms = stats.elapsed_ms, "stage complete");
        Ok(())
    }

    /// Mark the core stages complete for every source unit whose candidates
    /// all landed in completed partitions.
    fn complete_units(
        &self,
        input: &PipelineInput,
        valid_units: &[String],
        completed: &BTreeSet<&CategoryId>,
    ) -> Result<(), ConsolidateError> {
        for unit_id in valid_units {
            let candidates = &input.units[unit_id];
            if !candidates.iter().all(|c| completed.contains(&c.category)) {
                continue;
            }
            for stage in CORE_STAGES {
                self.store
                    .mark_stage_complete(unit_id, stage, &StageStats::default())?;
            }
        }
        Ok(())
    }

    fn check_cancel(&self) -> Result<(), ConsolidateError> {
        if self.cancel.load(Ordering::SeqCst) {
            Err(ConsolidateError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Checkpoint unit key of a category partition.
#[must_use]
pub fn partition_key(category: &CategoryId) -> String {
    format!("partition:{category}")
}

fn validate_unit(
    unit_id: &str,
    candidates: &[OpinionCandidate],
    owner: &BTreeMap<&str, &str>,
) -> Result<(), ValidationError> {
    let mut local: BTreeSet<&str> = BTreeSet::new();
    for c in candidates {
        c.validate()?;
        if c.source_unit_id != unit_id {
            return Err(ValidationError::SourceUnitMismatch {
                candidate_id: c.id.clone(),
                expected: unit_id.to_owned(),
                actual: c.source_unit_id.clone(),
            });
        }
        let first_unit = owner
            .get(c.id.as_str())
            .copied()
            .or_else(|| local.contains(c.id.as_str()).then_some(unit_id));
        if let Some(first_unit) = first_unit {
            return Err(ValidationError::DuplicateCandidateId {
                candidate_id: c.id.clone(),
                first_unit: first_unit.to_owned(),
            });
        }
        local.insert(&c.id);
    }
    Ok(())
}

/// Digest of a candidate set, independent of input order.
fn input_fingerprint(candidates: &[OpinionCandidate]) -> Result<String, ConsolidateError> {
    let mut sorted: Vec<&OpinionCandidate> = candidates.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(content_digest(&sorted)?)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod tests;
