//! Source-directory scanning and per-file classification.
//!
//! The scanner looks at the direct children of a folder and produces one
//! [`FileRecord`] per regular file, already sorted into Categorized, Unrecognized,
//! Locked or Ignored. Nothing is moved here.

use crate::config::{CompiledFilters, Settings};
use crate::control::{ProgressSink, StopHandle, Total};
use crate::file_category::{CategoryStore, extension_of};
use crate::resolver::CategoryResolver;
use crate::sanitize::sanitize_file_name;
use crate::sniff::ContentSniffer;
use crate::stats::StatsRecorder;
use chrono::{DateTime, Local};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Extensions of partial downloads and scratch files.
const TRANSIENT_EXTENSIONS: &[&str] = &[".tmp", ".temp", ".crdownload", ".part", ".$$$"];

/// Name fragments of editor backups and OS metadata files, matched case-insensitively.
const TRANSIENT_NAME_PATTERNS: &[&str] = &["~", ".ds_store", "thumbs.db", "desktop.ini"];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("folder does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("not a folder: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("cannot read folder {}: {source}", path.display())]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where a file is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileState {
    Pending,
    /// Has an active category and a destination.
    Categorized,
    /// Nothing claims its extension and its content did not help.
    Unrecognized,
    /// Another process holds it open.
    Locked,
    /// Transient, filtered out, disabled category or skipped by choice.
    Ignored,
    Moved,
    Failed,
}

impl FileState {
    pub fn label(&self) -> &'static str {
        match self {
            FileState::Pending => "pending",
            FileState::Categorized => "categorized",
            FileState::Unrecognized => "unrecognized",
            FileState::Locked => "in use",
            FileState::Ignored => "ignored",
            FileState::Moved => "moved",
            FileState::Failed => "failed",
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One scanned file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub source: PathBuf,
    /// Sanitized file name, used for the destination.
    pub name: String,
    /// Lowercase with a leading dot, or empty.
    pub extension: String,
    pub size: u64,
    pub category: Option<String>,
    pub destination: Option<PathBuf>,
    pub state: FileState,
    pub reason: String,
    pub modified: DateTime<Local>,
}

impl FileRecord {
    /// A pending record for `source` with the given metadata.
    pub fn new(source: impl Into<PathBuf>, size: u64, modified: DateTime<Local>) -> Self {
        let source = source.into();
        let raw_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            name: sanitize_file_name(&raw_name),
            extension: extension_of(&source),
            source,
            size,
            category: None,
            destination: None,
            state: FileState::Pending,
            reason: String::new(),
            modified,
        }
    }

    /// The name as it appears in the source folder.
    pub fn original_name(&self) -> String {
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }

    pub(crate) fn set_state(&mut self, state: FileState, reason: impl Into<String>) {
        self.state = state;
        self.reason = reason.into();
    }
}

/// Whether a file looks like a temporary artifact that must not be organized.
///
/// # Examples
///
/// ```
/// use dlsort::scanner::is_transient;
///
/// assert!(is_transient("movie.mkv.part", 4096));
/// assert!(is_transient("~$report.docx", 162));
/// assert!(is_transient("notes.txt", 0));
/// assert!(!is_transient("report.pdf", 10_240));
/// ```
pub fn is_transient(file_name: &str, size: u64) -> bool {
    if size == 0 {
        return true;
    }

    let lower = file_name.to_lowercase();
    let extension = extension_of(Path::new(&lower));
    TRANSIENT_EXTENSIONS.contains(&extension.as_str())
        || TRANSIENT_NAME_PATTERNS
            .iter()
            .any(|pattern| lower.contains(pattern))
}

/// Whether another process holds `path` open.
///
/// Probed by opening the file for reading and writing; on Windows without sharing.
/// A file we may not write to also reports as locked.
pub fn is_locked(path: &Path) -> bool {
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        options.share_mode(0);
    }
    options.open(path).is_err()
}

/// Walks a folder and classifies each file.
///
/// Borrowing the store keeps the category rules stable for the whole pass.
pub struct ScanPlanner<'a> {
    store: &'a CategoryStore,
    settings: &'a Settings,
    filters: Option<&'a CompiledFilters>,
    sniffer: ContentSniffer,
    stop: StopHandle,
    lock_probe: fn(&Path) -> bool,
    progress: Option<Box<dyn ProgressSink + 'a>>,
    stats: Option<&'a mut dyn StatsRecorder>,
}

impl<'a> ScanPlanner<'a> {
    pub fn new(store: &'a CategoryStore, settings: &'a Settings) -> Self {
        Self {
            store,
            settings,
            filters: None,
            sniffer: ContentSniffer::new(),
            stop: StopHandle::new(),
            lock_probe: is_locked,
            progress: None,
            stats: None,
        }
    }

    pub fn with_filters(mut self, filters: &'a CompiledFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn with_stop(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Replaces the in-use check, [`is_locked`] by default.
    pub fn with_lock_probe(mut self, probe: fn(&Path) -> bool) -> Self {
        self.lock_probe = probe;
        self
    }

    pub fn with_progress(mut self, progress: impl ProgressSink + 'a) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn with_stats(mut self, stats: &'a mut dyn StatsRecorder) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Scans the direct children of `dir`.
    ///
    /// A stop request ends the walk early and returns what was classified so far.
    ///
    /// # Errors
    ///
    /// Fails only when `dir` itself is missing or cannot be listed.
    pub fn scan(&mut self, dir: &Path) -> Result<Vec<FileRecord>, ScanError> {
        if !dir.exists() {
            return Err(ScanError::MissingDirectory(dir.to_path_buf()));
        }
        if !dir.is_dir() {
            return Err(ScanError::NotADirectory(dir.to_path_buf()));
        }

        let entries = fs::read_dir(dir).map_err(|source| ScanError::ReadDirectory {
            path: dir.to_path_buf(),
            source,
        })?;

        info!("scanning {}", dir.display());
        let now = Local::now();
        let mut records = Vec::new();

        for entry in entries {
            if self.stop.is_requested() {
                info!("scan stopped after {} files", records.len());
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };

            // Symlinks are not followed; only regular files are organized.
            match entry.file_type() {
                Ok(file_type) if file_type.is_file() => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!("cannot stat {}: {}", entry.path().display(), e);
                    continue;
                }
            }

            let record = self.classify(&entry.path(), dir, now);
            debug!(
                "{}: {} ({})",
                record.original_name(),
                record.state,
                record.reason
            );

            let message = format!("Analyzing: {}", record.original_name());
            records.push(record);
            if let Some(progress) = self.progress.as_mut() {
                progress.report(records.len(), Total::Unknown, &message);
            }
        }

        info!("scanned {} files in {}", records.len(), dir.display());
        Ok(records)
    }

    /// Builds the record for one file.
    pub fn classify(&mut self, path: &Path, origin: &Path, now: DateTime<Local>) -> FileRecord {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                let mut record = FileRecord::new(path, 0, now);
                record.set_state(FileState::Ignored, format!("cannot read file details: {}", e));
                return record;
            }
        };

        let modified = metadata
            .modified()
            .map(DateTime::<Local>::from)
            .unwrap_or(now);
        let mut record = FileRecord::new(path, metadata.len(), modified);
        let original_name = record.original_name();

        if is_transient(&original_name, record.size) {
            record.set_state(FileState::Ignored, "temporary or empty file");
            return record;
        }

        if let Some(filters) = self.filters
            && !filters.should_include(path)
        {
            record.set_state(FileState::Ignored, "excluded by filter rules");
            return record;
        }

        if (self.lock_probe)(path) {
            record.set_state(FileState::Locked, "file is in use by another program");
            return record;
        }

        let resolver = CategoryResolver::new(self.store);
        let sniffer = self.sniffer;
        let Some(category) = resolver.resolve_unfiltered(&record.extension, || sniffer.sniff_path(path))
        else {
            record.set_state(FileState::Ignored, "no category accepts this file");
            return record;
        };

        record.category = Some(category.to_string());
        if !self.store.is_active(category) {
            record.set_state(
                FileState::Ignored,
                format!("category '{}' is disabled", category),
            );
            return record;
        }

        record.destination = Some(
            self.settings
                .destination_dir(category, Some(origin), now)
                .join(&record.name),
        );

        if resolver.is_unrecognized(&record.extension, category) {
            let reason = format!("extension '{}' not recognized", record.extension);
            record.set_state(FileState::Unrecognized, reason);
            if let Some(stats) = self.stats.as_mut() {
                stats.record_unknown_extension(&record.extension);
            }
        } else {
            record.set_state(FileState::Categorized, format!("goes to {}", category));
        }

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::UsageStats;
    use std::cell::RefCell;
    use tempfile::TempDir;

    fn settings_for(dir: &Path) -> Settings {
        Settings::default().with_source_dir(dir)
    }

    fn find<'r>(records: &'r [FileRecord], name: &str) -> &'r FileRecord {
        records
            .iter()
            .find(|record| record.original_name() == name)
            .unwrap_or_else(|| panic!("no record for {}", name))
    }

    #[test]
    fn test_transient_predicate() {
        for name in [
            "setup.exe.crdownload",
            "video.PART",
            "scratch.tmp",
            "scratch.temp",
            "weird.$$$",
            ".DS_Store",
            "Thumbs.db",
            "desktop.ini",
            "~lock.odt#",
            "draft~.txt",
        ] {
            assert!(is_transient(name, 10), "{} should be transient", name);
        }
        assert!(is_transient("report.pdf", 0));
        assert!(!is_transient("report.pdf", 1));
        assert!(!is_transient("template.docx", 1));
    }

    #[test]
    fn test_scan_missing_directory() {
        let store = CategoryStore::default();
        let settings = Settings::default();
        let result = ScanPlanner::new(&store, &settings).scan(Path::new("/non/existent/dir"));
        assert!(matches!(result, Err(ScanError::MissingDirectory(_))));
    }

    #[test]
    fn test_scan_classifies_direct_children_only() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = temp_dir.path();
        fs::write(dir.join("report.pdf"), vec![b'a'; 2048]).expect("write");
        fs::write(dir.join("song.MP3"), b"ID3 data").expect("write");
        fs::create_dir(dir.join("nested")).expect("mkdir");
        fs::write(dir.join("nested").join("inner.pdf"), b"inner").expect("write");

        let store = CategoryStore::default();
        let settings = settings_for(dir);
        let records = ScanPlanner::new(&store, &settings)
            .scan(dir)
            .expect("scan");

        assert_eq!(records.len(), 2);
        let report = find(&records, "report.pdf");
        assert_eq!(report.state, FileState::Categorized);
        assert_eq!(report.category.as_deref(), Some("Documentos"));
        assert_eq!(report.destination, Some(dir.join("Documentos").join("report.pdf")));
        assert_eq!(report.size, 2048);

        let song = find(&records, "song.MP3");
        assert_eq!(song.extension, ".mp3");
        assert_eq!(song.category.as_deref(), Some("Audio"));
    }

    #[test]
    fn test_disabled_category_is_ignored_with_reason() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = temp_dir.path();
        fs::write(dir.join("clip.mp4"), b"not really a video").expect("write");

        let mut store = CategoryStore::default();
        store.set_active("Videos", false);
        let settings = settings_for(dir);
        let records = ScanPlanner::new(&store, &settings)
            .scan(dir)
            .expect("scan");

        let clip = find(&records, "clip.mp4");
        assert_eq!(clip.state, FileState::Ignored);
        assert_eq!(clip.category.as_deref(), Some("Videos"));
        assert_eq!(clip.destination, None);
        assert!(clip.reason.contains("disabled"));
    }

    #[test]
    fn test_unknown_extension_with_known_content_is_categorized() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = temp_dir.path();
        fs::write(dir.join("download.bin"), b"%PDF-1.5\n...").expect("write");

        let store = CategoryStore::default();
        let settings = settings_for(dir);
        let records = ScanPlanner::new(&store, &settings)
            .scan(dir)
            .expect("scan");

        let record = find(&records, "download.bin");
        assert_eq!(record.state, FileState::Categorized);
        assert_eq!(record.category.as_deref(), Some("Documentos"));
    }

    #[test]
    fn test_unrecognized_file_reports_extension() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = temp_dir.path();
        fs::write(dir.join("mystery.xyz"), b"nothing to see").expect("write");
        fs::write(dir.join("program.xyz2"), b"\x7fELF\x02\x01\x01").expect("write");

        let store = CategoryStore::default();
        let settings = settings_for(dir);
        let mut stats = UsageStats::in_memory();
        let records = ScanPlanner::new(&store, &settings)
            .with_stats(&mut stats)
            .scan(dir)
            .expect("scan");

        let mystery = find(&records, "mystery.xyz");
        assert_eq!(mystery.state, FileState::Unrecognized);
        assert_eq!(mystery.category.as_deref(), Some("Otros"));
        assert_eq!(mystery.destination, Some(dir.join("Otros").join("mystery.xyz")));

        // Sniffed as ELF, which has no category of its own.
        assert_eq!(find(&records, "program.xyz2").state, FileState::Unrecognized);

        let counts = &stats.counters().unknown_extensions;
        assert_eq!(counts.get(".xyz"), Some(&1));
        assert_eq!(counts.get(".xyz2"), Some(&1));
    }

    #[test]
    fn test_file_without_extension_goes_to_catch_all() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = temp_dir.path();
        fs::write(dir.join("README"), b"read me").expect("write");

        let store = CategoryStore::default();
        let settings = settings_for(dir);
        let records = ScanPlanner::new(&store, &settings)
            .scan(dir)
            .expect("scan");

        let readme = find(&records, "README");
        assert_eq!(readme.state, FileState::Categorized);
        assert_eq!(readme.category.as_deref(), Some("Otros"));
    }

    #[test]
    fn test_filters_mark_files_ignored() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = temp_dir.path();
        fs::write(dir.join(".hidden.pdf"), b"secret").expect("write");
        fs::write(dir.join("visible.pdf"), b"public").expect("write");

        let store = CategoryStore::default();
        let settings = settings_for(dir);
        let filters = settings.compile_filters().expect("filters");
        let records = ScanPlanner::new(&store, &settings)
            .with_filters(&filters)
            .scan(dir)
            .expect("scan");

        let hidden = find(&records, ".hidden.pdf");
        assert_eq!(hidden.state, FileState::Ignored);
        assert_eq!(hidden.reason, "excluded by filter rules");
        assert_eq!(find(&records, "visible.pdf").state, FileState::Categorized);
    }

    #[cfg(unix)]
    #[test]
    fn test_unwritable_file_reports_locked() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = temp_dir.path();
        let path = dir.join("busy.pdf");
        fs::write(&path, b"busy").expect("write");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444)).expect("chmod");

        // Root can open read-only files for writing, so the probe cannot fail there.
        if OpenOptions::new().write(true).open(&path).is_ok() {
            return;
        }

        let store = CategoryStore::default();
        let settings = settings_for(dir);
        let records = ScanPlanner::new(&store, &settings)
            .scan(dir)
            .expect("scan");

        let busy = find(&records, "busy.pdf");
        assert_eq!(busy.state, FileState::Locked);
        assert_eq!(busy.destination, None);
    }

    #[test]
    fn test_locked_file_skips_classification() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = temp_dir.path();
        fs::write(dir.join("busy.pdf"), b"busy").expect("write");
        fs::write(dir.join("mystery.xyz"), b"in use").expect("write");
        fs::write(dir.join("free.pdf"), b"free").expect("write");

        let store = CategoryStore::default();
        let settings = settings_for(dir);
        let mut stats = UsageStats::in_memory();
        let records = ScanPlanner::new(&store, &settings)
            .with_lock_probe(|path| !path.ends_with("free.pdf"))
            .with_stats(&mut stats)
            .scan(dir)
            .expect("scan");

        for name in ["busy.pdf", "mystery.xyz"] {
            let record = find(&records, name);
            assert_eq!(record.state, FileState::Locked, "{}", name);
            assert_eq!(record.category, None);
            assert_eq!(record.destination, None);
            assert_eq!(record.reason, "file is in use by another program");
        }
        assert_eq!(find(&records, "free.pdf").state, FileState::Categorized);
        assert!(stats.counters().unknown_extensions.is_empty());
    }

    #[test]
    fn test_stop_request_returns_partial_results() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = temp_dir.path();
        for i in 0..5 {
            fs::write(dir.join(format!("file{}.pdf", i)), b"data").expect("write");
        }

        let store = CategoryStore::default();
        let settings = settings_for(dir);
        let stop = StopHandle::new();
        let trigger = stop.clone();
        let seen = RefCell::new(Vec::new());

        let records = ScanPlanner::new(&store, &settings)
            .with_stop(stop)
            .with_progress(|current: usize, total: Total, _message: &str| {
                seen.borrow_mut().push((current, total));
                if current == 2 {
                    trigger.request();
                }
            })
            .scan(dir)
            .expect("scan");

        assert_eq!(records.len(), 2);
        assert_eq!(
            *seen.borrow(),
            vec![(1, Total::Unknown), (2, Total::Unknown)]
        );
    }
}
