//! Command-line interface for dlsort.
//!
//! Subcommands:
//! - `scan`: classify every file and print what was found
//! - `plan`: dry run, show where files would go without touching anything
//! - `organize`: move files into their category folders
//! - `stats`: show or reset usage statistics
//! - `rules`: list, add or remove learned extension rules

use crate::config::{Settings, UnknownAction};
use crate::control::StopHandle;
use crate::executor::{Decision, OrganizeExecutor};
use crate::file_category::{CategoryStore, normalize_extension};
use crate::output::{OutputFormatter, ProgressBarSink};
use crate::scanner::{FileRecord, ScanPlanner};
use crate::stats::UsageStats;
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Sort a downloads folder into category folders.
#[derive(Debug, Parser)]
#[command(name = "dlsort", version, about)]
pub struct Cli {
    /// Configuration file to use instead of the discovered one
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log progress details (RUST_LOG overrides this)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Classify the files in a folder and list them
    Scan {
        /// Folder to scan (defaults to the configured source folder)
        dir: Option<PathBuf>,
    },
    /// Show what organizing a folder would do, without moving anything
    Plan { dir: Option<PathBuf> },
    /// Move files into their category folders
    Organize {
        dir: Option<PathBuf>,

        /// What to do with files no category claims
        #[arg(long, value_enum)]
        unknown: Option<UnknownAction>,
    },
    /// Show usage statistics
    Stats {
        /// Clear all statistics
        #[arg(long)]
        reset: bool,
    },
    /// Manage learned extension rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum RulesAction {
    /// List learned rules and the category table
    List,
    /// Always sort an extension into a category
    Add { extension: String, category: String },
    /// Forget a learned rule
    Remove { extension: String },
}

/// Runs a parsed command line.
///
/// # Examples
///
/// ```no_run
/// use clap::Parser;
/// use dlsort::cli::{Cli, run_cli};
///
/// let cli = Cli::parse_from(["dlsort", "plan", "/home/me/Downloads"]);
/// run_cli(cli).expect("plan failed");
/// ```
pub fn run_cli(cli: Cli) -> Result<()> {
    run_cli_with_config(cli.command, cli.config.as_deref())
}

/// Runs `command` with settings loaded from `config_path` or the usual locations.
pub fn run_cli_with_config(command: Command, config_path: Option<&Path>) -> Result<()> {
    let settings = Settings::load(config_path).context("Error loading configuration")?;

    match command {
        Command::Scan { dir } => scan_directory(&with_dir(settings, dir)),
        Command::Plan { dir } => plan_directory(&with_dir(settings, dir)),
        Command::Organize { dir, unknown } => {
            let mut settings = with_dir(settings, dir);
            if let Some(unknown) = unknown {
                settings.unknown_files = unknown;
            }
            organize_directory(&settings)
        }
        Command::Stats { reset } => show_stats(&settings, reset),
        Command::Rules { action } => manage_rules(&settings, action),
    }
}

fn with_dir(settings: Settings, dir: Option<PathBuf>) -> Settings {
    match dir {
        Some(dir) => settings.with_source_dir(dir),
        None => settings,
    }
}

fn open_stats(settings: &Settings) -> UsageStats {
    UsageStats::open(settings.stats_path()).unwrap_or_else(|e| {
        warn!("statistics unavailable, continuing without saving them: {}", e);
        UsageStats::in_memory()
    })
}

fn scan_records(
    settings: &Settings,
    store: &CategoryStore,
    stats: &mut UsageStats,
    stop: &StopHandle,
) -> Result<Vec<FileRecord>> {
    let filters = settings
        .compile_filters()
        .context("Error compiling filters")?;
    let sink = ProgressBarSink::new();
    let bar = sink.clone();

    let records = ScanPlanner::new(store, settings)
        .with_filters(&filters)
        .with_stop(stop.clone())
        .with_progress(sink)
        .with_stats(stats)
        .scan(&settings.source_dir)
        .with_context(|| format!("Error scanning {}", settings.source_dir.display()))?;
    bar.finish();

    Ok(records)
}

fn scan_directory(settings: &Settings) -> Result<()> {
    OutputFormatter::info(&format!("Scanning {}", settings.source_dir.display()));
    let store = settings.open_store().context("Error loading learned rules")?;
    let mut stats = open_stats(settings);

    let records = scan_records(settings, &store, &mut stats, &StopHandle::new())?;
    OutputFormatter::records_table(&records);
    Ok(())
}

fn plan_directory(settings: &Settings) -> Result<()> {
    OutputFormatter::dry_run_notice(&format!(
        "Analyzing {}",
        settings.source_dir.display()
    ));
    let mut store = settings.open_store().context("Error loading learned rules")?;
    let mut stats = open_stats(settings);

    let records = scan_records(settings, &store, &mut stats, &StopHandle::new())?;
    let plan = OrganizeExecutor::new(&mut store, settings).plan(&records);
    OutputFormatter::plan_report(&plan);

    println!();
    OutputFormatter::success("Dry run complete. No files were modified.");
    Ok(())
}

fn organize_directory(settings: &Settings) -> Result<()> {
    OutputFormatter::info(&format!("Organizing {}", settings.source_dir.display()));
    let mut store = settings.open_store().context("Error loading learned rules")?;
    let mut stats = open_stats(settings);
    let stop = StopHandle::new();

    let records = scan_records(settings, &store, &mut stats, &stop)?;
    if records.is_empty() {
        OutputFormatter::plain("No files found to organize.");
        return Ok(());
    }

    let interactive = settings.unknown_files == UnknownAction::Ask && io::stdin().is_terminal();
    let categories: Vec<String> = store
        .active_categories()
        .into_iter()
        .map(str::to_string)
        .collect();

    let executor = OrganizeExecutor::new(&mut store, settings)
        .with_stop(stop)
        .with_stats(&mut stats);

    let result = if interactive {
        // Prompts and a live bar would fight over the terminal.
        let decider = move |record: &FileRecord| {
            let stdin = io::stdin();
            prompt_decision(record, &categories, &mut stdin.lock())
        };
        executor.with_decider(decider).execute(records)
    } else {
        let sink = ProgressBarSink::new();
        let bar = sink.clone();
        let result = executor.with_progress(sink).execute(records);
        bar.finish();
        result
    };

    println!();
    OutputFormatter::result_report(&result);
    if !result.failed.is_empty() {
        OutputFormatter::warning("Some files could not be organized. Please review errors above.");
    }
    Ok(())
}

/// Asks which category an unrecognized file belongs to.
///
/// An empty answer, `0`, or end of input leaves the file where it is.
fn prompt_decision(
    record: &FileRecord,
    categories: &[String],
    input: &mut impl BufRead,
) -> Option<Decision> {
    if categories.is_empty() {
        return None;
    }

    println!();
    OutputFormatter::warning(&format!("Unrecognized file: {}", record.name));
    for (index, category) in categories.iter().enumerate() {
        println!("  {}) {}", index + 1, category);
    }
    println!("  0) Leave it");

    let category = loop {
        let answer = read_answer("Category", input)?;
        match answer.parse::<usize>() {
            Ok(0) => return None,
            Ok(choice) if choice <= categories.len() => break categories[choice - 1].clone(),
            _ => OutputFormatter::plain("Please enter one of the numbers above."),
        }
    };

    let remember = !record.extension.is_empty()
        && read_answer(
            &format!("Always sort {} files into {}? (y/N)", record.extension, category),
            input,
        )
        .is_some_and(|answer| answer.eq_ignore_ascii_case("y"));

    Some(Decision::new(category, remember))
}

/// Prints `prompt` and reads one trimmed line; `None` on empty input or EOF.
fn read_answer(prompt: &str, input: &mut impl BufRead) -> Option<String> {
    print!("{}: ", prompt);
    io::stdout().flush().ok()?;

    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => {
            let answer = line.trim();
            (!answer.is_empty()).then(|| answer.to_string())
        }
    }
}

fn show_stats(settings: &Settings, reset: bool) -> Result<()> {
    let path = settings.stats_path();
    let mut stats = UsageStats::open(&path)
        .with_context(|| format!("Error reading statistics from {}", path.display()))?;

    if reset {
        stats.reset().context("Error resetting statistics")?;
        OutputFormatter::success("Statistics cleared.");
        return Ok(());
    }

    OutputFormatter::stats_report(&stats.summary());
    Ok(())
}

fn manage_rules(settings: &Settings, action: RulesAction) -> Result<()> {
    let mut store = settings.open_store().context("Error loading learned rules")?;

    match action {
        RulesAction::List => {
            OutputFormatter::header("LEARNED RULES");
            if store.learned_rules().is_empty() {
                OutputFormatter::plain("No learned rules yet.");
            }
            for (extension, category) in store.learned_rules() {
                println!("  {:<10} -> {}", extension, category);
            }

            OutputFormatter::header("CATEGORIES");
            for entry in store.table().entries() {
                let state = if store.is_active(&entry.name) { "" } else { " (disabled)" };
                println!("  {}{}: {}", entry.name, state, entry.extensions.join(" "));
            }
        }
        RulesAction::Add {
            extension,
            category,
        } => {
            let extension = normalize_extension(&extension);
            if extension.is_empty() {
                bail!("Extension must not be empty");
            }
            let known = store.table().contains_category(&category)
                || store.catch_all() == Some(category.as_str());
            if !known {
                bail!("Unknown category: {}", category);
            }
            store
                .learn(&extension, &category)
                .context("Error saving learned rules")?;
            OutputFormatter::success(&format!("{} files will go to {}", extension, category));
        }
        RulesAction::Remove { extension } => {
            let extension = normalize_extension(&extension);
            if store
                .forget(&extension)
                .context("Error saving learned rules")?
            {
                OutputFormatter::success(&format!("Forgot the rule for {}", extension));
            } else {
                OutputFormatter::warning(&format!("No learned rule for {}", extension));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use std::io::Cursor;

    fn record(name: &str) -> FileRecord {
        FileRecord::new(PathBuf::from("/dl").join(name), 10, Local::now())
    }

    fn categories() -> Vec<String> {
        vec!["Documentos".to_string(), "Imágenes".to_string()]
    }

    #[test]
    fn test_parse_organize_command() {
        let cli = Cli::try_parse_from([
            "dlsort",
            "--config",
            "my.toml",
            "organize",
            "/tmp/dl",
            "--unknown",
            "catch-all",
        ])
        .expect("valid command line");

        assert_eq!(cli.config, Some(PathBuf::from("my.toml")));
        match cli.command {
            Command::Organize { dir, unknown } => {
                assert_eq!(dir, Some(PathBuf::from("/tmp/dl")));
                assert_eq!(unknown, Some(UnknownAction::CatchAll));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rules_and_stats() {
        let cli = Cli::try_parse_from(["dlsort", "rules", "add", ".xyz", "Imágenes"])
            .expect("valid rules command");
        assert!(matches!(
            cli.command,
            Command::Rules {
                action: RulesAction::Add { .. }
            }
        ));

        let cli = Cli::try_parse_from(["dlsort", "-v", "stats", "--reset"]).expect("valid stats");
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Stats { reset: true }));

        assert!(Cli::try_parse_from(["dlsort", "organize", "--unknown", "maybe"]).is_err());
    }

    #[test]
    fn test_prompt_decision_with_remember() {
        let mut input = Cursor::new("2\ny\n");
        let decision = prompt_decision(&record("data.xyz"), &categories(), &mut input);
        assert_eq!(decision, Some(Decision::new("Imágenes", true)));
    }

    #[test]
    fn test_prompt_decision_retries_invalid_choice() {
        let mut input = Cursor::new("7\nabc\n1\n\n");
        let decision = prompt_decision(&record("data.xyz"), &categories(), &mut input);
        assert_eq!(decision, Some(Decision::new("Documentos", false)));
    }

    #[test]
    fn test_prompt_decision_leave_or_eof() {
        let mut input = Cursor::new("0\n");
        assert_eq!(
            prompt_decision(&record("data.xyz"), &categories(), &mut input),
            None
        );

        let mut input = Cursor::new("");
        assert_eq!(
            prompt_decision(&record("data.xyz"), &categories(), &mut input),
            None
        );
    }

    #[test]
    fn test_prompt_decision_without_extension_never_remembers() {
        let mut input = Cursor::new("1\n");
        let decision = prompt_decision(&record("README"), &categories(), &mut input);
        assert_eq!(decision, Some(Decision::new("Documentos", false)));
    }
}
