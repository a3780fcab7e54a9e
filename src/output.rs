//! Output formatting and styling module.
//!
//! All human-facing CLI output goes through `OutputFormatter`, so executor
//! log lines, undo results and run summaries share one look.

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;

/// Kind of an executor log line, judged by its marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Error,
    Skip,
    DryRun,
    Matched,
    Plain,
}

impl LineKind {
    pub fn of(line: &str) -> Self {
        let trimmed = line.trim_start();
        if trimmed.starts_with("ERROR") {
            LineKind::Error
        } else if trimmed.starts_with("SKIP") {
            LineKind::Skip
        } else if trimmed.starts_with("DRY RUN") {
            LineKind::DryRun
        } else if trimmed.ends_with(": MATCHED") {
            LineKind::Matched
        } else {
            LineKind::Plain
        }
    }
}

/// Manages all CLI output with consistent styling and formatting.
///
/// - Success messages (green with ✓)
/// - Error messages (red with ✗)
/// - Warning messages (yellow with ⚠)
/// - Info messages (cyan)
/// - Executor log lines colored by marker
/// - Progress bars and summary tables
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// ```no_run
    /// use ruletidy::output::OutputFormatter;
    /// OutputFormatter::success("Rules applied");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints an info message in cyan.
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    /// Prints a regular message without styling.
    pub fn plain(message: &str) {
        println!("{}", message);
    }

    /// Prints a section header.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Prints one executor log line, colored by its marker.
    pub fn log_line(line: &str) {
        match LineKind::of(line) {
            LineKind::Error => eprintln!("{}", line.red()),
            LineKind::Skip => println!("{}", line.dimmed()),
            LineKind::DryRun => println!("{}", line.yellow()),
            LineKind::Matched => println!("{}", line.green()),
            LineKind::Plain => println!("{}", line),
        }
    }

    /// Creates a progress bar for processing `total` files.
    ///
    /// ```no_run
    /// use ruletidy::output::OutputFormatter;
    /// let pb = OutputFormatter::create_progress_bar(100);
    /// pb.inc(1);
    /// pb.finish_with_message("done");
    /// ```
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("Invalid progress bar template")
                .progress_chars("█▓░"),
        );
        pb
    }

    /// Prints how many times each action type made a change.
    pub fn summary_table(action_counts: &HashMap<String, usize>, files_handled: usize) {
        Self::header("SUMMARY");

        let mut actions: Vec<_> = action_counts.iter().collect();
        actions.sort_by_key(|&(name, _)| name);

        let width = actions
            .iter()
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or(0)
            .max(13);

        println!("{:<width$} | {}", "Action".bold(), "Count".bold(), width = width);
        println!("{}", "-".repeat(width + 10));

        for (action, count) in &actions {
            println!(
                "{:<width$} | {}",
                action,
                count.to_string().green(),
                width = width
            );
        }

        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Files handled".bold(),
            files_handled.to_string().green().bold(),
            if files_handled == 1 { "file" } else { "files" },
            width = width
        );
    }

    /// Prints a dry-run notice message.
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }
}
