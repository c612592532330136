use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use optrack_core::Stage;
use serde::{Deserialize, Serialize};

pub const STATE_VERSION: u32 = 1;

/// Counters accumulated for one stage across every unit that completed it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    #[serde(default)]
    pub units_completed: u64,
    #[serde(default)]
    pub items_in: u64,
    #[serde(default)]
    pub items_out: u64,
    #[serde(default)]
    pub elapsed_ms: u64,
    #[serde(default)]
    pub failures: u64,
    #[serde(default)]
    pub oracle_calls: u64,
    #[serde(default)]
    pub oracle_fallbacks: u64,
}

impl StageStats {
    pub fn merge(&mut self, other: &StageStats) {
        self.units_completed += other.units_completed;
        self.items_in += other.items_in;
        self.items_out += other.items_out;
        self.elapsed_ms += other.elapsed_ms;
        self.failures += other.failures;
        self.oracle_calls += other.oracle_calls;
        self.oracle_fallbacks += other.oracle_fallbacks;
    }
}

/// The persisted checkpoint document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub version: u32,
    /// Per unit of work, which stages have completed.
    #[serde(default)]
    pub units: BTreeMap<String, BTreeMap<Stage, bool>>,
    /// Most recently completed stage across all units.
    #[serde(default)]
    pub cursor: Option<Stage>,
    /// Units that have completed every stage, in completion order.
    #[serde(default)]
    pub processed_units: Vec<String>,
    #[serde(default)]
    pub last_processed_unit: Option<String>,
    /// Oracle responses keyed by [`crate::QueryKey`].
    #[serde(default)]
    pub oracle_cache: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub stats: BTreeMap<Stage, StageStats>,
    /// Digest of the input each unit's stages were computed from.
    #[serde(default)]
    pub fingerprints: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for CheckpointState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            units: BTreeMap::new(),
            cursor: None,
            processed_units: Vec::new(),
            last_processed_unit: None,
            oracle_cache: BTreeMap::new(),
            stats: BTreeMap::new(),
            fingerprints: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

impl CheckpointState {
    #[must_use]
    pub fn is_complete(&self, unit: &str, stage: Stage) -> bool {
        self.units
            .get(unit)
            .and_then(|stages| stages.get(&stage))
            .copied()
            .unwrap_or(false)
    }

    /// First predecessor of `stage` that `unit` has not completed.
    #[must_use]
    pub fn missing_predecessor(&self, unit: &str, stage: Stage) -> Option<Stage> {
        stage
            .predecessors()
            .iter()
            .copied()
            .find(|p| !self.is_complete(unit, *p))
    }

    #[must_use]
    pub fn is_fully_processed(&self, unit: &str) -> bool {
        Stage::ALL.iter().all(|s| self.is_complete(unit, *s))
    }

    #[must_use]
    pub fn progress(&self) -> ProgressSummary {
        let mut stage_progress = BTreeMap::new();
        for stage in Stage::ALL {
            let done = self
                .units
                .values()
                .filter(|stages| stages.get(&stage).copied().unwrap_or(false))
                .count();
            stage_progress.insert(stage, done);
        }
        ProgressSummary {
            total_units: self.units.len(),
            processed_units: self.processed_units.len(),
            stage_progress,
            last_processed_unit: self.last_processed_unit.clone(),
            cursor: self.cursor,
            cached_responses: self.oracle_cache.len(),
            updated_at: self.updated_at,
        }
    }
}

/// Read-only view of checkpoint progress for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub total_units: usize,
    pub processed_units: usize,
    /// Number of units that have completed each stage.
    pub stage_progress: BTreeMap<Stage, usize>,
    pub last_processed_unit: Option<String>,
    pub cursor: Option<Stage>,
    pub cached_responses: usize,
    pub updated_at: DateTime<Utc>,
}
