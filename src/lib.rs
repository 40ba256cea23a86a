//! dlsort - sorts a downloads folder into category folders
//!
//! This library scans a folder, classifies every file by extension, learned rules
//! and content signatures, plans the resulting moves and executes them safely:
//! names are sanitized, collisions get numbered copies, over-long paths are
//! shortened and cross-device moves fall back to copy-then-delete.

pub mod cli;
pub mod config;
pub mod control;
pub mod executor;
pub mod file_category;
pub mod file_mover;
pub mod output;
pub mod resolver;
pub mod sanitize;
pub mod scanner;
pub mod sniff;
pub mod stats;

pub use config::{CompiledFilters, ConfigError, Settings, SubfolderMode, UnknownAction};
pub use control::{ProgressSink, StopHandle, Total};
pub use executor::{
    BatchState, Decision, ExecutionResult, OrganizationPlan, OrganizeExecutor,
    UnknownFileDecider,
};
pub use file_category::{CategoryStore, CategoryTable};
pub use file_mover::{MoveError, SafeMover};
pub use resolver::CategoryResolver;
pub use sanitize::sanitize_file_name;
pub use scanner::{FileRecord, FileState, ScanPlanner};
pub use sniff::ContentSniffer;
pub use stats::{StatsRecorder, UsageStats};

pub use cli::{Cli, run_cli};
