use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use optrack_core::Stage;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CheckpointError;
use crate::fsio::atomic_write;
use crate::key::QueryKey;
use crate::state::{CheckpointState, ProgressSummary, StageStats, STATE_VERSION};

/// File-backed checkpoint shared by every concurrent partition worker.
///
/// Each mutation is applied to a copy of the state, flushed to disk, and
/// only then published in memory. A failed write therefore leaves both the
/// file and the in-memory view at the previous consistent state. The lock is
/// held for the whole write so flushes are serialized; it is never held
/// across an `.await`.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    state: Mutex<CheckpointState>,
}

impl CheckpointStore {
    /// Open the checkpoint at `path`. A missing file yields a fresh state.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Corrupt`] if the file exists but does not
    /// parse or carries an unknown version. The file is left untouched.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(bytes) => parse_state(&path, &bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no checkpoint found, starting fresh");
                CheckpointState::default()
            }
            Err(e) => return Err(CheckpointError::io(&path, e)),
        };
        tracing::debug!(
            path = %path.display(),
            units = state.units.len(),
            cached = state.oracle_cache.len(),
            "checkpoint loaded"
        );
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// # Errors
    ///
    /// Returns [`CheckpointError::LockPoisoned`] if a writer panicked.
    pub fn is_stage_complete(&self, unit: &str, stage: Stage) -> Result<bool, CheckpointError> {
        Ok(self.lock()?.is_complete(unit, stage))
    }

    /// Record that `unit` finished `stage` and fold `stats` into the stage totals.
    ///
    /// Returns `false` without touching disk when the stage was already
    /// complete, so replays after a crash do not double-count.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::OutOfOrderStage`] when an earlier stage for
    /// the same unit is not yet complete, or an I/O error if the flush fails.
    pub fn mark_stage_complete(
        &self,
        unit: &str,
        stage: Stage,
        stats: &StageStats,
    ) -> Result<bool, CheckpointError> {
        let mut guard = self.lock()?;
        if guard.is_complete(unit, stage) {
            return Ok(false);
        }
        if let Some(missing) = guard.missing_predecessor(unit, stage) {
            return Err(CheckpointError::OutOfOrderStage {
                unit: unit.to_string(),
                stage,
                missing,
            });
        }

        let mut next = guard.clone();
        next.units
            .entry(unit.to_string())
            .or_default()
            .insert(stage, true);
        next.cursor = Some(stage);
        let mut folded = stats.clone();
        folded.units_completed = folded.units_completed.max(1);
        next.stats.entry(stage).or_default().merge(&folded);
        if next.is_fully_processed(unit) && !next.processed_units.iter().any(|u| u == unit) {
            next.processed_units.push(unit.to_string());
            next.last_processed_unit = Some(unit.to_string());
        }

        self.commit(&mut guard, next)?;
        tracing::debug!(unit, %stage, "stage marked complete");
        Ok(true)
    }

    /// Compare `fingerprint` with the one recorded for `unit`.
    ///
    /// On a mismatch, `from` and every later stage are cleared for `unit`,
    /// the unit leaves the processed list, and the new fingerprint is
    /// recorded. Returns `true` when completed stages were cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be flushed.
    pub fn sync_fingerprint(
        &self,
        unit: &str,
        fingerprint: &str,
        from: Stage,
    ) -> Result<bool, CheckpointError> {
        let mut guard = self.lock()?;
        if guard.fingerprints.get(unit).map(String::as_str) == Some(fingerprint) {
            return Ok(false);
        }

        let mut next = guard.clone();
        let mut cleared = false;
        if let Some(stages) = next.units.get_mut(unit) {
            for (stage, done) in stages.iter_mut() {
                if *stage >= from && *done {
                    *done = false;
                    cleared = true;
                }
            }
        }
        if cleared {
            next.processed_units.retain(|u| u != unit);
            if next.last_processed_unit.as_deref() == Some(unit) {
                next.last_processed_unit = next.processed_units.last().cloned();
            }
        }
        next.fingerprints
            .insert(unit.to_string(), fingerprint.to_string());

        self.commit(&mut guard, next)?;
        if cleared {
            tracing::info!(unit, from = %from, "unit input changed, later stages cleared");
        }
        Ok(cleared)
    }

    /// Count a failed attempt at `stage` without marking anything complete.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be flushed.
    pub fn record_failure(&self, stage: Stage) -> Result<(), CheckpointError> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        next.stats.entry(stage).or_default().failures += 1;
        self.commit(&mut guard, next)
    }

    /// Look up a cached oracle response.
    ///
    /// An entry that no longer deserializes as `T` is treated as a miss.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::LockPoisoned`] if a writer panicked.
    pub fn cached_response<T: DeserializeOwned>(
        &self,
        key: &QueryKey,
    ) -> Result<Option<T>, CheckpointError> {
        let value = self.lock()?.oracle_cache.get(key.as_str()).cloned();
        Ok(value.and_then(|v| match serde_json::from_value(v) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "ignoring unreadable cached response");
                None
            }
        }))
    }

    /// Store an oracle response. Writing the same key twice keeps the first value.
    ///
    /// # Errors
    ///
    /// Returns an error if `response` does not serialize or the flush fails.
    pub fn put_cached_response<T: Serialize>(
        &self,
        key: &QueryKey,
        response: &T,
    ) -> Result<(), CheckpointError> {
        let value = serde_json::to_value(response)?;
        let mut guard = self.lock()?;
        if guard.oracle_cache.contains_key(key.as_str()) {
            return Ok(());
        }
        let mut next = guard.clone();
        next.oracle_cache.insert(key.as_str().to_string(), value);
        self.commit(&mut guard, next)
    }

    /// Write the current in-memory state to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the atomic write fails.
    pub fn flush(&self) -> Result<(), CheckpointError> {
        let mut guard = self.lock()?;
        let next = guard.clone();
        self.commit(&mut guard, next)
    }

    /// # Errors
    ///
    /// Returns [`CheckpointError::LockPoisoned`] if a writer panicked.
    pub fn snapshot(&self) -> Result<CheckpointState, CheckpointError> {
        Ok(self.lock()?.clone())
    }

    /// # Errors
    ///
    /// Returns [`CheckpointError::LockPoisoned`] if a writer panicked.
    pub fn progress(&self) -> Result<ProgressSummary, CheckpointError> {
        Ok(self.lock()?.progress())
    }

    /// Discard all progress and cached responses, persisting an empty state.
    ///
    /// # Errors
    ///
    /// Returns an error if the empty state cannot be written.
    pub fn reset(&self) -> Result<(), CheckpointError> {
        let mut guard = self.lock()?;
        self.commit(&mut guard, CheckpointState::default())?;
        tracing::info!(path = %self.path.display(), "checkpoint reset");
        Ok(())
    }

    fn commit(
        &self,
        guard: &mut MutexGuard<'_, CheckpointState>,
        mut next: CheckpointState,
    ) -> Result<(), CheckpointError> {
        next.updated_at = Utc::now();
        let bytes = serde_json::to_vec_pretty(&next)?;
        atomic_write(&self.path, &bytes)?;
        **guard = next;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, CheckpointState>, CheckpointError> {
        self.state.lock().map_err(|_| CheckpointError::LockPoisoned)
    }
}

fn parse_state(path: &Path, bytes: &[u8]) -> Result<CheckpointState, CheckpointError> {
    let state: CheckpointState =
        serde_json::from_slice(bytes).map_err(|e| CheckpointError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    if state.version != STATE_VERSION {
        return Err(CheckpointError::Corrupt {
            path: path.display().to_string(),
            reason: format!(
                "unsupported version {} (expected {STATE_VERSION})",
                state.version
            ),
        });
    }
    Ok(state)
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
