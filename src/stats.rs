//! Usage statistics.
//!
//! The scanner and executor report events through [`StatsRecorder`]; they never
//! read anything back. [`UsageStats`] keeps running totals in a JSON file.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// File name of the statistics store inside the state directory.
pub const STATS_FILE: &str = "stats.json";

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid statistics file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One moved file, as reported at the end of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub name: String,
    pub category: String,
    pub size: u64,
}

/// Receiver of fire-and-forget statistics events.
pub trait StatsRecorder {
    /// Called once per executed batch in which at least one file moved.
    fn record_batch(&mut self, _entries: &[BatchEntry]) {}

    /// Called for every unrecognized extension the scanner meets.
    fn record_unknown_extension(&mut self, _extension: &str) {}
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStats;

impl StatsRecorder for NoStats {}

/// Persisted counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageCounters {
    pub total_files: u64,
    pub total_bytes: u64,
    pub sessions: u64,
    pub categories: BTreeMap<String, u64>,
    pub unknown_extensions: BTreeMap<String, u64>,
    pub first_run: Option<DateTime<Local>>,
    pub last_run: Option<DateTime<Local>>,
}

/// Condensed view of [`UsageCounters`] for display.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSummary {
    pub total_files: u64,
    pub total_bytes: u64,
    pub sessions: u64,
    pub favourite_category: Option<String>,
    pub unknown_extensions: usize,
    pub first_run: Option<DateTime<Local>>,
    pub last_run: Option<DateTime<Local>>,
}

/// Statistics kept in memory and, when opened from a path, saved after every event.
#[derive(Debug, Clone, Default)]
pub struct UsageStats {
    path: Option<PathBuf>,
    counters: UsageCounters,
}

impl UsageStats {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the statistics file at `path`, starting empty if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StatsError> {
        let path = path.into();
        let counters = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| StatsError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&content).map_err(|source| StatsError::Json {
                path: path.clone(),
                source,
            })?
        } else {
            UsageCounters::default()
        };

        Ok(Self {
            path: Some(path),
            counters,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn counters(&self) -> &UsageCounters {
        &self.counters
    }

    pub fn summary(&self) -> StatsSummary {
        let favourite_category = self
            .counters
            .categories
            .iter()
            .max_by(|(name_a, count_a), (name_b, count_b)| {
                count_a.cmp(count_b).then_with(|| name_b.cmp(name_a))
            })
            .map(|(name, _)| name.clone());

        StatsSummary {
            total_files: self.counters.total_files,
            total_bytes: self.counters.total_bytes,
            sessions: self.counters.sessions,
            favourite_category,
            unknown_extensions: self.counters.unknown_extensions.len(),
            first_run: self.counters.first_run,
            last_run: self.counters.last_run,
        }
    }

    /// Clears all counters and saves the empty state.
    pub fn reset(&mut self) -> Result<(), StatsError> {
        self.counters = UsageCounters::default();
        self.save()
    }

    pub fn save(&self) -> Result<(), StatsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StatsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(&self.counters).map_err(|source| {
            StatsError::Json {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(path, json).map_err(|source| StatsError::Io {
            path: path.clone(),
            source,
        })
    }

    fn save_quietly(&self) {
        if let Err(e) = self.save() {
            warn!("could not save statistics: {}", e);
        }
    }
}

impl StatsRecorder for UsageStats {
    fn record_batch(&mut self, entries: &[BatchEntry]) {
        let now = Local::now();
        let counters = &mut self.counters;

        counters.sessions += 1;
        for entry in entries {
            counters.total_files += 1;
            counters.total_bytes += entry.size;
            *counters.categories.entry(entry.category.clone()).or_default() += 1;
        }
        counters.first_run.get_or_insert(now);
        counters.last_run = Some(now);

        self.save_quietly();
    }

    fn record_unknown_extension(&mut self, extension: &str) {
        *self
            .counters
            .unknown_extensions
            .entry(extension.to_string())
            .or_default() += 1;
        self.save_quietly();
    }
}
