//! Output formatting and styling module.
//!
//! Everything the command line prints goes through here: colored status lines,
//! progress bars, and the scan, plan, result and statistics tables.

use crate::control::{ProgressSink, Total};
use crate::executor::{ExecutionResult, OrganizationPlan};
use crate::scanner::{FileRecord, FileState};
use crate::stats::StatsSummary;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;

const SIZE_UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

/// Formats a byte count with one decimal, e.g. `"1.5 MB"`.
///
/// # Examples
///
/// ```
/// use dlsort::output::format_size;
///
/// assert_eq!(format_size(0), "0.0 B");
/// assert_eq!(format_size(1536), "1.5 KB");
/// assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
/// ```
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in SIZE_UNITS {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} PB", size)
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}

/// Manages all CLI output with consistent styling and formatting.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// ```no_run
    /// use dlsort::output::OutputFormatter;
    /// OutputFormatter::success("Moved 12 files");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// Creates a progress bar for `total` files.
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        pb.set_style(Self::bar_style());
        pb
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("Invalid progress bar template")
            .progress_chars("█▓░")
    }

    /// Creates a spinner for work whose total is not known yet.
    pub fn create_spinner() -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {pos} {wide_msg}")
                .expect("Invalid spinner template"),
        );
        pb
    }

    /// Prints one line per scanned file.
    pub fn records_table(records: &[FileRecord]) {
        Self::header("FILES");
        if records.is_empty() {
            Self::plain("No files found.");
            return;
        }

        let width = records
            .iter()
            .map(|record| record.name.chars().count())
            .max()
            .unwrap_or(0)
            .clamp(4, 60);

        for record in records {
            let state = match record.state {
                FileState::Categorized | FileState::Moved => record.state.label().green(),
                FileState::Unrecognized | FileState::Locked => record.state.label().yellow(),
                FileState::Failed => record.state.label().red(),
                FileState::Ignored | FileState::Pending => record.state.label().dimmed(),
            };
            println!(
                "{:<width$}  {:>10}  {:<12}  {}",
                record.name,
                format_size(record.size),
                state,
                record.category.as_deref().unwrap_or("-"),
                width = width
            );
            if !record.reason.is_empty() && record.state != FileState::Categorized {
                println!("{:<width$}  {}", "", record.reason.dimmed(), width = width);
            }
        }
    }

    /// Prints the dry-run plan: files per category, then anything needing attention.
    pub fn plan_report(plan: &OrganizationPlan) {
        Self::header("PLAN");
        let bytes = plan.category_bytes();
        let counts: BTreeMap<&str, usize> = plan
            .by_category
            .iter()
            .map(|(category, records)| (category.as_str(), records.len()))
            .collect();
        Self::category_table(&counts, Some(&bytes), plan.categorized_files());

        let summary = plan.summary();
        println!();
        Self::plain(&format!(
            "{} {} scanned, {} in total",
            plan.total_files,
            plural(plan.total_files),
            plan.total_size()
        ));
        if summary.new_directories > 0 {
            Self::info(&format!("{} new folders will be created", summary.new_directories));
        }
        for conflict in &plan.conflicts {
            let note = if conflict.identical {
                "identical copy already there"
            } else {
                "name taken, a numbered copy will be made"
            };
            Self::warning(&format!("{}: {}", conflict.record.name, note));
        }
        for record in &plan.unrecognized {
            Self::warning(&format!("{}: {}", record.name, record.reason));
        }
        for record in &plan.locked {
            Self::warning(&format!("{}: {}", record.name, record.reason));
        }
        if summary.ignored > 0 {
            Self::plain(&format!("{} {} ignored", summary.ignored, plural(summary.ignored)));
        }
    }

    /// Prints what an executed batch did.
    pub fn result_report(result: &ExecutionResult) {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for record in &result.moved {
            *counts
                .entry(record.category.as_deref().unwrap_or("-"))
                .or_default() += 1;
        }
        Self::category_table(&counts, None, result.moved.len());
        println!();

        for record in &result.failed {
            Self::error(&format!("{}: {}", record.name, record.reason));
        }
        for record in result
            .skipped
            .iter()
            .filter(|record| record.state == FileState::Locked)
        {
            Self::warning(&format!("{}: {}", record.name, record.reason));
        }

        if result.stopped {
            Self::warning("Stopped before all files were processed");
        }
        Self::success(&format!(
            "Moved {} {} ({}), {} failed, {} skipped",
            result.moved.len(),
            plural(result.moved.len()),
            format_size(result.bytes_moved),
            result.failed.len(),
            result.skipped.len()
        ));
        if result.pruned_dirs > 0 {
            Self::info(&format!("Removed {} empty folders", result.pruned_dirs));
        }
    }

    pub fn stats_report(summary: &StatsSummary) {
        Self::header("STATISTICS");
        println!("Files organized:  {}", summary.total_files.to_string().green());
        println!("Space organized:  {}", format_size(summary.total_bytes));
        println!("Sessions:         {}", summary.sessions);
        println!(
            "Top category:     {}",
            summary.favourite_category.as_deref().unwrap_or("-")
        );
        println!("Unknown types:    {}", summary.unknown_extensions);
        if let Some(first) = summary.first_run {
            println!("First run:        {}", first.format("%Y-%m-%d %H:%M"));
        }
        if let Some(last) = summary.last_run {
            println!("Last run:         {}", last.format("%Y-%m-%d %H:%M"));
        }
    }

    /// Prints category names with file counts and, optionally, sizes.
    fn category_table(
        counts: &BTreeMap<&str, usize>,
        bytes: Option<&BTreeMap<&str, u64>>,
        total_files: usize,
    ) {
        let width = counts
            .keys()
            .map(|name| name.chars().count())
            .max()
            .unwrap_or(0)
            .max(8); // At least "Category" width

        println!(
            "{:<width$} | {}",
            "Category".bold(),
            "Files".bold(),
            width = width
        );
        println!("{}", "-".repeat(width + 22));

        for (category, count) in counts {
            let size = bytes
                .and_then(|bytes| bytes.get(category))
                .map(|size| format!(" ({})", format_size(*size)))
                .unwrap_or_default();
            println!(
                "{:<width$} | {} {}{}",
                category,
                count.to_string().green(),
                plural(*count),
                size,
                width = width
            );
        }

        println!("{}", "-".repeat(width + 22));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total_files.to_string().green().bold(),
            plural(total_files),
            width = width
        );
    }
}

/// Drives an indicatif bar from scanner and executor progress updates.
///
/// Starts as a spinner and turns into a bar once a total is known. Clones share
/// the same bar, so a clone kept aside can finish it after the sink is handed off.
#[derive(Clone)]
pub struct ProgressBarSink {
    bar: ProgressBar,
}

impl ProgressBarSink {
    pub fn new() -> Self {
        Self {
            bar: OutputFormatter::create_spinner(),
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressBarSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ProgressBarSink {
    fn report(&mut self, current: usize, total: Total, message: &str) {
        if let Total::Known(total) = total
            && self.bar.length() != Some(total as u64)
        {
            self.bar.set_length(total as u64);
            self.bar.set_style(OutputFormatter::bar_style());
        }
        self.bar.set_position(current as u64);
        self.bar.set_message(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size_units() {
        assert_eq!(format_size(512), "512.0 B");
        assert_eq!(format_size(1023), "1023.0 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(10 * 1024), "10.0 KB");
        assert_eq!(format_size(2 * 1024 * 1024 + 10 * 1024), "2.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
        assert_eq!(format_size(1024u64.pow(4)), "1.0 TB");
        assert_eq!(format_size(1024u64.pow(5) * 2), "2.0 PB");
    }

    #[test]
    fn test_progress_sink_switches_to_bar() {
        let mut sink = ProgressBarSink::new();
        let observer = sink.clone();
        sink.report(1, Total::Unknown, "Analyzing: a.pdf");
        sink.report(1, Total::Known(3), "Moved: a.pdf");
        assert_eq!(observer.bar.length(), Some(3));
        assert_eq!(observer.bar.position(), 1);
        observer.finish();
    }
}
