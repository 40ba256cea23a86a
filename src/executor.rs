//! Dry-run plans and batch execution.
//!
//! [`OrganizeExecutor::plan`] summarizes what a batch would do without touching the
//! filesystem. [`OrganizeExecutor::execute`] moves every categorized file through
//! the [`SafeMover`], asks a [`UnknownFileDecider`] about unrecognized files and
//! finally prunes folders the batch left empty.

use crate::config::{Settings, UnknownAction};
use crate::control::{ProgressSink, StopHandle, Total};
use crate::file_category::CategoryStore;
use crate::file_mover::SafeMover;
use crate::output::format_size;
use crate::scanner::{FileRecord, FileState};
use crate::sniff::file_digest;
use crate::stats::{BatchEntry, StatsRecorder};
use chrono::Local;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A category chosen for an unrecognized file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub category: String,
    /// Learn the file's extension for this category.
    pub remember: bool,
}

impl Decision {
    pub fn new(category: impl Into<String>, remember: bool) -> Self {
        Self {
            category: category.into(),
            remember,
        }
    }
}

/// Chooses a category for an unrecognized file; `None` leaves the file alone.
///
/// Called synchronously, once per unrecognized record, in record order.
pub trait UnknownFileDecider {
    fn decide(&mut self, record: &FileRecord) -> Option<Decision>;
}

impl<F> UnknownFileDecider for F
where
    F: FnMut(&FileRecord) -> Option<Decision>,
{
    fn decide(&mut self, record: &FileRecord) -> Option<Decision> {
        self(record)
    }
}

/// A planned move whose destination is already taken.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedConflict {
    pub record: FileRecord,
    /// The existing file has the same size and content.
    pub identical: bool,
}

/// Read-only snapshot of what executing a batch would do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrganizationPlan {
    pub total_files: usize,
    pub total_bytes: u64,
    pub by_category: BTreeMap<String, Vec<FileRecord>>,
    pub conflicts: Vec<PlannedConflict>,
    pub unrecognized: Vec<FileRecord>,
    pub locked: Vec<FileRecord>,
    pub ignored: Vec<FileRecord>,
    /// Destination folders that do not exist yet.
    pub new_directories: BTreeSet<PathBuf>,
}

/// Counts for a one-line description of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    pub categories: usize,
    pub conflicts: usize,
    pub unrecognized: usize,
    pub locked: usize,
    pub ignored: usize,
    pub new_directories: usize,
}

impl OrganizationPlan {
    /// Aggregates scanned records. Reads file metadata, never writes.
    pub fn from_records(records: &[FileRecord]) -> Self {
        let mut plan = Self {
            total_files: records.len(),
            ..Self::default()
        };
        let mut claimed: HashSet<&Path> = HashSet::new();

        for record in records {
            plan.total_bytes += record.size;

            match record.state {
                FileState::Unrecognized => plan.unrecognized.push(record.clone()),
                FileState::Locked => plan.locked.push(record.clone()),
                FileState::Categorized => {
                    let category = record.category.clone().unwrap_or_default();
                    plan.by_category
                        .entry(category)
                        .or_default()
                        .push(record.clone());

                    let Some(destination) = record.destination.as_deref() else {
                        continue;
                    };
                    if destination.exists() {
                        plan.conflicts.push(PlannedConflict {
                            record: record.clone(),
                            identical: same_content(&record.source, destination),
                        });
                    } else if !claimed.insert(destination) {
                        plan.conflicts.push(PlannedConflict {
                            record: record.clone(),
                            identical: false,
                        });
                    }
                    if let Some(parent) = destination.parent()
                        && !parent.exists()
                    {
                        plan.new_directories.insert(parent.to_path_buf());
                    }
                }
                _ => plan.ignored.push(record.clone()),
            }
        }

        plan
    }

    /// Number of files that would be moved without asking.
    pub fn categorized_files(&self) -> usize {
        self.by_category.values().map(Vec::len).sum()
    }

    pub fn categorized_bytes(&self) -> u64 {
        self.by_category
            .values()
            .flatten()
            .map(|record| record.size)
            .sum()
    }

    pub fn category_bytes(&self) -> BTreeMap<&str, u64> {
        self.by_category
            .iter()
            .map(|(category, records)| {
                (
                    category.as_str(),
                    records.iter().map(|record| record.size).sum(),
                )
            })
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            categories: self.by_category.len(),
            conflicts: self.conflicts.len(),
            unrecognized: self.unrecognized.len(),
            locked: self.locked.len(),
            ignored: self.ignored.len(),
            new_directories: self.new_directories.len(),
        }
    }

    pub fn total_size(&self) -> String {
        format_size(self.total_bytes)
    }
}

fn same_content(a: &Path, b: &Path) -> bool {
    let same_size = match (fs::metadata(a), fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.len() == b.len(),
        _ => false,
    };
    same_size
        && matches!(
            (file_digest(a), file_digest(b)),
            (Ok(digest_a), Ok(digest_b)) if digest_a == digest_b
        )
}

/// Outcome of [`OrganizeExecutor::execute`].
///
/// Records not visited because of a stop request appear in no bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub moved: Vec<FileRecord>,
    pub failed: Vec<FileRecord>,
    /// Ignored, locked or undecided records.
    pub skipped: Vec<FileRecord>,
    pub bytes_moved: u64,
    pub stopped: bool,
    pub pruned_dirs: usize,
}

impl ExecutionResult {
    pub fn processed(&self) -> usize {
        self.moved.len() + self.failed.len() + self.skipped.len()
    }
}

/// Where the executor is in its batch lifecycle.
///
/// `Idle` until [`OrganizeExecutor::plan`] (`Planning`) or [`OrganizeExecutor::execute`]
/// (`Executing`) is called; an execution ends `Completed` or `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Planning,
    Executing,
    Completed,
    Stopped,
}

/// Moves scanned files into their category folders.
///
/// Not meant to run two batches at once; `execute` takes `&mut self`.
pub struct OrganizeExecutor<'a> {
    store: &'a mut CategoryStore,
    settings: &'a Settings,
    source_root: PathBuf,
    mover: SafeMover,
    stop: StopHandle,
    state: BatchState,
    progress: Option<Box<dyn ProgressSink + 'a>>,
    decider: Option<Box<dyn UnknownFileDecider + 'a>>,
    stats: Option<&'a mut dyn StatsRecorder>,
}

impl<'a> OrganizeExecutor<'a> {
    pub fn new(store: &'a mut CategoryStore, settings: &'a Settings) -> Self {
        Self {
            store,
            settings,
            source_root: settings.source_dir.clone(),
            mover: SafeMover::new(),
            stop: StopHandle::new(),
            state: BatchState::Idle,
            progress: None,
            decider: None,
            stats: None,
        }
    }

    /// Folder whose emptied subfolders get pruned. Defaults to the settings' source folder.
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = root.into();
        self
    }

    pub fn with_mover(mut self, mover: SafeMover) -> Self {
        self.mover = mover;
        self
    }

    pub fn with_stop(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_progress(mut self, progress: impl ProgressSink + 'a) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn with_decider(mut self, decider: impl UnknownFileDecider + 'a) -> Self {
        self.decider = Some(Box::new(decider));
        self
    }

    pub fn with_stats(mut self, stats: &'a mut dyn StatsRecorder) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Builds the dry-run plan for `records`. Nothing on disk changes.
    pub fn plan(&mut self, records: &[FileRecord]) -> OrganizationPlan {
        self.state = BatchState::Planning;
        OrganizationPlan::from_records(records)
    }

    /// Processes `records` in order and reports where each one ended up.
    ///
    /// Empty folders are pruned afterwards when configured, also after a stop.
    pub fn execute(&mut self, records: Vec<FileRecord>) -> ExecutionResult {
        self.state = BatchState::Executing;
        let total = records.len();
        let mut result = ExecutionResult::default();
        info!("organizing {} files", total);

        for (index, mut record) in records.into_iter().enumerate() {
            if self.stop.is_requested() {
                info!("stopped after {} of {} files", index, total);
                result.stopped = true;
                break;
            }

            self.process(&mut record);
            let message = match record.state {
                FileState::Moved => format!("Moved: {}", record.name),
                FileState::Failed => format!("Failed: {}", record.name),
                _ => format!("Skipped: {}", record.name),
            };

            match record.state {
                FileState::Moved => {
                    result.bytes_moved += record.size;
                    result.moved.push(record);
                }
                FileState::Failed => result.failed.push(record),
                _ => result.skipped.push(record),
            }

            if let Some(progress) = self.progress.as_mut() {
                progress.report(index + 1, Total::Known(total), &message);
            }
        }

        if self.settings.prune_empty_dirs {
            result.pruned_dirs = prune_empty_dirs(&self.source_root);
        }

        if !result.moved.is_empty()
            && let Some(stats) = self.stats.as_mut()
        {
            let entries: Vec<BatchEntry> = result
                .moved
                .iter()
                .map(|record| BatchEntry {
                    name: record.name.clone(),
                    category: record.category.clone().unwrap_or_default(),
                    size: record.size,
                })
                .collect();
            stats.record_batch(&entries);
        }

        info!(
            "moved {}, failed {}, skipped {}",
            result.moved.len(),
            result.failed.len(),
            result.skipped.len()
        );
        self.state = if result.stopped {
            BatchState::Stopped
        } else {
            BatchState::Completed
        };
        result
    }

    fn process(&mut self, record: &mut FileRecord) {
        match record.state {
            FileState::Ignored | FileState::Locked => return,
            FileState::Unrecognized => {
                if !self.resolve_unrecognized(record) {
                    return;
                }
            }
            FileState::Categorized => {}
            FileState::Pending | FileState::Moved | FileState::Failed => {
                let reason = format!("cannot organize a {} file", record.state);
                record.set_state(FileState::Failed, reason);
                return;
            }
        }

        let Some(destination) = record.destination.clone() else {
            record.set_state(FileState::Failed, "no destination folder was determined");
            return;
        };

        match self.mover.move_file(&record.source, &destination) {
            Ok(final_path) => {
                info!("moved {} -> {}", record.source.display(), final_path.display());
                record.destination = Some(final_path);
                record.set_state(FileState::Moved, "");
            }
            Err(e) => {
                warn!("could not move {}: {}", record.source.display(), e);
                record.set_state(FileState::Failed, e.to_string());
            }
        }
    }

    /// Settles an unrecognized record. Returns `true` if it is now ready to move.
    fn resolve_unrecognized(&mut self, record: &mut FileRecord) -> bool {
        let catch_all = || {
            self.store
                .catch_all()
                .map(|category| Decision::new(category, false))
        };

        // A rule learned earlier in this batch answers for later files of the same type.
        let learned = self
            .store
            .learned_rule(&record.extension)
            .map(|category| Decision::new(category, false));

        let decision = match (learned, self.settings.unknown_files) {
            (Some(decision), _) => Some(decision),
            (None, UnknownAction::Ignore) => None,
            (None, UnknownAction::CatchAll) => catch_all(),
            (None, UnknownAction::Ask) => match self.decider.as_mut() {
                Some(decider) => decider.decide(record),
                None => catch_all(),
            },
        };

        let Some(decision) = decision else {
            record.set_state(FileState::Ignored, "left in place, no category chosen");
            return false;
        };

        if !self.store.is_active(&decision.category) {
            let reason = format!("category '{}' is disabled", decision.category);
            record.set_state(FileState::Ignored, reason);
            return false;
        }

        if decision.remember && !record.extension.is_empty() {
            if let Err(e) = self.store.learn(&record.extension, &decision.category) {
                warn!("could not save learned rule for {}: {}", record.extension, e);
            }
        }

        let origin = record.source.parent();
        record.destination = Some(
            self.settings
                .destination_dir(&decision.category, origin, Local::now())
                .join(&record.name),
        );
        debug!("{} assigned to {}", record.name, decision.category);
        record.category = Some(decision.category);
        record.set_state(FileState::Categorized, "category chosen");
        true
    }
}

/// Removes empty folders below `root`, deepest first, and returns how many went.
///
/// `root` itself is kept and symlinked folders are not entered. A folder that
/// still has entries is simply left alone.
pub fn prune_empty_dirs(root: &Path) -> usize {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("cannot list {} for pruning: {}", root.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let is_dir = entry.file_type().is_ok_and(|file_type| file_type.is_dir());
        if !is_dir {
            continue;
        }

        let path = entry.path();
        removed += prune_empty_dirs(&path);
        match fs::remove_dir(&path) {
            Ok(()) => {
                info!("removed empty folder {}", path.display());
                removed += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => {}
            Err(e) => warn!("could not remove {}: {}", path.display(), e),
        }
    }
    removed
}
