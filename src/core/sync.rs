//! Purpose: Pull mutable settings from a backend and apply the ones that changed.
//! Exports: `SettingsSynchronizer`, `SyncReport`.
//! Role: Recurring per-process task; the runtime calls `tick` on a fixed interval.
//! Invariants: Only non-read-only keys are fetched; changes are detected by value equality.
//! Invariants: Propagation is one-way (backend to process); nothing here writes to the backend.
//! Notes: A failing key keeps its cached value for the tick (stale over unavailable).

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::core::backend::SettingsBackend;
use crate::core::error::Error;
use crate::core::settings::SettingsRegistry;

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct SyncReport {
    pub checked: usize,
    pub updated: Vec<String>,
    pub unchanged: usize,
    pub failed: Vec<String>,
    pub rejected: Vec<String>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.rejected.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct SettingsSynchronizer {
    registry: Arc<SettingsRegistry>,
    backend: SettingsBackend,
    interval: Duration,
}

impl SettingsSynchronizer {
    pub fn new(registry: Arc<SettingsRegistry>, backend: SettingsBackend, interval: Duration) -> Self {
        Self {
            registry,
            backend,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn backend(&self) -> &SettingsBackend {
        &self.backend
    }

    pub fn tick(&self) -> Result<SyncReport, Error> {
        let keys = self.registry.mutable_keys()?;
        let mut report = SyncReport {
            checked: keys.len(),
            ..SyncReport::default()
        };

        for (key, fetched) in self.backend.fetch_many(&keys) {
            let value = match fetched {
                Ok(Some(value)) => value,
                Ok(None) => {
                    report.unchanged += 1;
                    continue;
                }
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "settings fetch failed; keeping cached value");
                    report.failed.push(key);
                    continue;
                }
            };
            match self.registry.apply(&key, value) {
                Ok(true) => {
                    tracing::info!(key = %key, "setting updated from backend");
                    report.updated.push(key);
                }
                Ok(false) => report.unchanged += 1,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "rejected backend value");
                    report.rejected.push(key);
                }
            }
        }

        tracing::debug!(
            backend = %self.backend.describe(),
            checked = report.checked,
            updated = report.updated.len(),
            failed = report.failed.len(),
            rejected = report.rejected.len(),
            "settings sync tick"
        );
        Ok(report)
    }
}
