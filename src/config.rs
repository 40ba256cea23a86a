//! Organizer settings and file filtering rules.
//!
//! Settings are loaded from a TOML file. Every key is optional:
//!
//! ```toml
//! source_dir = "/home/me/Downloads"
//! subfolders = "date"          # none | date | origin
//! unknown_files = "ask"        # ask | catch-all | ignore
//! prune_empty_dirs = true
//! state_dir = "/home/me/.config/dlsort"
//! catch_all = "Otros"
//!
//! [[category]]
//! name = "Documentos"
//! extensions = [".pdf", ".docx"]
//!
//! [active]
//! Audio = false
//!
//! [destinations]
//! Documentos = "/home/me/Documents/inbox"
//!
//! [filters]
//! enable_hidden_files = false
//!
//! [filters.exclude]
//! filenames = ["keep-me.txt"]
//! patterns = ["*.torrent"]
//! extensions = ["bak"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//! ```
//!
//! `[[category]]` entries replace the built-in table. Categories missing from
//! `[active]` are active; categories missing from `[destinations]` go to
//! `<source_dir>/<category>`.

use crate::file_category::{
    CategoryEntry, CategoryStore, CategoryTable, DEFAULT_CATCH_ALL, LEARNED_RULES_FILE,
    StoreError,
};
use crate::stats::STATS_FILE;
use chrono::{DateTime, Local};
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Name of the per-directory configuration file.
pub const LOCAL_CONFIG_FILE: &str = ".dlsort.toml";

/// Errors that can occur during configuration loading and filtering.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] toml::de::Error),

    #[error("invalid glob pattern '{0}': expected *.ext or dir/**")]
    InvalidGlobPattern(String),

    #[error("invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern { pattern: String, reason: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Extra folder level created below each category folder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubfolderMode {
    #[default]
    None,
    /// `YYYY-MM` of the organization run.
    Date,
    /// `<category>-<source folder name>`, both lowercase.
    Origin,
}

/// What happens to files no category recognizes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum UnknownAction {
    /// Let the decision provider choose, per file.
    #[default]
    Ask,
    /// Send them to the catch-all category.
    CatchAll,
    /// Leave them where they are.
    Ignore,
}

/// Everything the organizer needs to know about where files go.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub source_dir: PathBuf,
    pub subfolders: SubfolderMode,
    pub unknown_files: UnknownAction,
    pub prune_empty_dirs: bool,
    /// Where learned rules and statistics are kept.
    pub state_dir: Option<PathBuf>,
    /// Empty disables the catch-all category.
    pub catch_all: String,
    #[serde(rename = "category")]
    pub categories: Vec<CategoryEntry>,
    pub active: BTreeMap<String, bool>,
    pub destinations: BTreeMap<String, PathBuf>,
    pub filters: FilterRules,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source_dir: home_dir().join("Downloads"),
            subfolders: SubfolderMode::None,
            unknown_files: UnknownAction::Ask,
            prune_empty_dirs: true,
            state_dir: None,
            catch_all: DEFAULT_CATCH_ALL.to_string(),
            categories: Vec::new(),
            active: BTreeMap::new(),
            destinations: BTreeMap::new(),
            filters: FilterRules::default(),
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.dlsort.toml` in the current directory
    /// 3. Look for `~/.config/dlsort/config.toml` in home directory
    /// 4. Fall back to default settings
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is explicitly provided but cannot be read,
    /// or if any discovered file is not valid TOML.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        let home_config = default_state_dir().join("config.toml");
        if home_config.exists() {
            return Self::load_from_file(&home_config);
        }

        debug!("no configuration file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("loading configuration from {}", path.display());
        Self::from_toml(&content)
    }

    /// Parses settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn with_source_dir(mut self, source_dir: impl Into<PathBuf>) -> Self {
        self.source_dir = source_dir.into();
        self
    }

    /// The configured category table, or the built-in one when none is configured.
    pub fn category_table(&self) -> CategoryTable {
        if self.categories.is_empty() {
            CategoryTable::builtin()
        } else {
            CategoryTable::from_entries(self.categories.iter().cloned())
        }
    }

    pub fn catch_all(&self) -> Option<String> {
        let catch_all = self.catch_all.trim();
        (!catch_all.is_empty()).then(|| catch_all.to_string())
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(default_state_dir)
    }

    pub fn learned_rules_path(&self) -> PathBuf {
        self.state_dir().join(LEARNED_RULES_FILE)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.state_dir().join(STATS_FILE)
    }

    /// Builds the file-backed category store these settings describe.
    pub fn open_store(&self) -> Result<CategoryStore, StoreError> {
        Ok(
            CategoryStore::open(self.category_table(), self.learned_rules_path())?
                .with_catch_all(self.catch_all())
                .with_active_flags(self.active.clone()),
        )
    }

    /// An in-memory category store, nothing is read from or written to disk.
    pub fn memory_store(&self) -> CategoryStore {
        CategoryStore::new(self.category_table())
            .with_catch_all(self.catch_all())
            .with_active_flags(self.active.clone())
    }

    /// Compile the filter rules into matchers.
    ///
    /// # Errors
    ///
    /// Returns an error if any regex or glob patterns are invalid.
    pub fn compile_filters(&self) -> Result<CompiledFilters, ConfigError> {
        CompiledFilters::new(&self.filters)
    }

    /// Folder a file of `category` coming from `origin` should be moved into.
    ///
    /// # Examples
    ///
    /// ```
    /// use dlsort::config::{Settings, SubfolderMode};
    /// use std::path::{Path, PathBuf};
    ///
    /// let mut settings = Settings::default().with_source_dir("/dl");
    /// let now = chrono::Local::now();
    /// assert_eq!(
    ///     settings.destination_dir("Audio", None, now),
    ///     PathBuf::from("/dl/Audio")
    /// );
    ///
    /// settings.subfolders = SubfolderMode::Origin;
    /// assert_eq!(
    ///     settings.destination_dir("Audio", Some(Path::new("/home/me/Downloads")), now),
    ///     PathBuf::from("/dl/Audio/audio-downloads")
    /// );
    /// ```
    pub fn destination_dir(
        &self,
        category: &str,
        origin: Option<&Path>,
        now: DateTime<Local>,
    ) -> PathBuf {
        let base = self
            .destinations
            .get(category)
            .cloned()
            .unwrap_or_else(|| self.source_dir.join(category));

        match self.subfolders {
            SubfolderMode::None => base,
            SubfolderMode::Date => base.join(now.format("%Y-%m").to_string()),
            SubfolderMode::Origin => match origin.and_then(Path::file_name) {
                Some(origin_name) => base.join(format!(
                    "{}-{}",
                    category.to_lowercase(),
                    origin_name.to_string_lossy().to_lowercase()
                )),
                None => base,
            },
        }
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_state_dir() -> PathBuf {
    home_dir().join(".config").join("dlsort")
}

/// User rules for files the scanner should leave alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterRules {
    /// Whether to organize hidden files (starting with "."). Defaults to false.
    #[serde(default)]
    pub enable_hidden_files: bool,

    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Whitelist, overrides exclude rules.
    #[serde(default)]
    pub include: IncludeRules,
}

/// Rules for excluding files from organization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// Exact filenames to exclude (e.g., "keep-me.txt").
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns to exclude (e.g., "*.torrent").
    #[serde(default)]
    pub patterns: Vec<String>,

    /// File extensions to exclude, with or without the dot.
    #[serde(default)]
    pub extensions: Vec<String>,

    #[serde(default)]
    pub regex: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeRules {
    /// Glob patterns that override exclude rules.
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Pre-compiled filter rules.
///
/// Patterns are matched against the file name, since the scanner only looks at
/// direct children of the source folder.
#[derive(Debug)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

impl CompiledFilters {
    fn new(rules: &FilterRules) -> Result<Self, ConfigError> {
        let exclude_patterns = compile_globs(&rules.exclude.patterns)?;
        let include_patterns = compile_globs(&rules.include.patterns)?;

        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: rules.exclude.filenames.iter().cloned().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns,
            exclude_regexes,
            include_patterns,
        })
    }

    /// Check if a file should be organized (not excluded).
    ///
    /// Checks are performed in this order, with early termination:
    /// 1. Include patterns (whitelist) - if matched, always include
    /// 2. Hidden file filter - if hidden and disabled, exclude
    /// 3. Exact filename match - if matched, exclude
    /// 4. File extension match - if matched, exclude
    /// 5. Glob pattern match - if matched, exclude
    /// 6. Regex pattern match - if matched, exclude
    /// 7. Default: include
    pub fn should_include(&self, file_path: &Path) -> bool {
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        let name_path = Path::new(file_name.as_ref());

        if matches_any(&self.include_patterns, name_path) {
            return true;
        }

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name.as_ref()) {
            return false;
        }

        if let Some(ext) = file_path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            if self.exclude_extensions.contains(&ext_lower) {
                return false;
            }
        }

        if matches_any(&self.exclude_patterns, name_path) {
            return false;
        }

        !self
            .exclude_regexes
            .iter()
            .any(|regex| regex.is_match(&file_name))
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
        })
        .collect()
}

fn matches_any(patterns: &[Pattern], path: &Path) -> bool {
    patterns.iter().any(|pattern| pattern.matches_path(path))
}
