//! Command-line interface module for ruletidy.
//!
//! This module handles all CLI-related functionality including:
//! - Command parsing
//! - Collecting the files a run applies to
//! - Running the rule executor and reporting the results
//! - Validating rule files

use crate::config::Config;
use crate::executor::{ActivitySink, RuleExecutor};
use crate::file_category::FileMapper;
use crate::file_info::FileInfo;
use crate::metadata::MetadataStore;
use crate::output::OutputFormatter;
use crate::rule::Rule;
use crate::rule_store::RuleStore;
use crate::undo::UndoLedger;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Above this many files, a progress bar is shown while rules run.
const PROGRESS_THRESHOLD: usize = 20;

/// Rule-driven file organizer.
#[derive(Debug, Parser)]
#[command(name = "ruletidy", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Represents a CLI command to execute.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply a rules file to files or directories.
    Apply {
        /// JSON rules file.
        #[arg(long)]
        rules: PathBuf,
        /// TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// JSON metadata store (tags, colors, hashes); loaded and saved back.
        #[arg(long)]
        metadata: Option<PathBuf>,
        /// Log what would happen without changing anything.
        #[arg(long)]
        dry_run: bool,
        /// Allow deletes of protected paths and external commands.
        #[arg(long)]
        no_safe_mode: bool,
        /// Files or directories; directories are scanned one level deep.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Check that a rules file parses and list its rules.
    Validate {
        /// JSON rules file.
        #[arg(long)]
        rules: PathBuf,
    },
}

/// Totals of one `apply` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Files the rules were evaluated against.
    pub files_seen: usize,
    /// Files at least one rule matched.
    pub files_handled: usize,
    /// Files no rule matched.
    pub unhandled: Vec<PathBuf>,
    /// Actions that failed.
    pub failed: usize,
    /// Undo entries recorded on the ledger.
    pub undo_recorded: usize,
    /// Changes per action type; planned changes in a dry run.
    pub action_counts: HashMap<String, usize>,
}

/// Runs the CLI application with the given parsed arguments.
///
/// ```no_run
/// use clap::Parser;
/// use ruletidy::cli::{run_cli, Cli};
///
/// let cli = Cli::parse_from(["ruletidy", "validate", "--rules", "rules.json"]);
/// if let Err(e) = run_cli(cli) {
///     eprintln!("Error: {}", e);
/// }
/// ```
pub fn run_cli(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Apply {
            rules,
            config,
            metadata,
            dry_run,
            no_safe_mode,
            paths,
        } => {
            let mut cfg = Config::load(config.as_deref())
                .map_err(|e| format!("Error loading configuration: {}", e))?;
            if dry_run {
                cfg = cfg.with_dry_run(true);
            }
            if no_safe_mode {
                cfg = cfg.with_safe_mode(false);
            }
            apply_command(&rules, &cfg, metadata.as_deref(), &paths)
        }
        Command::Validate { rules } => validate_command(&rules),
    }
}

fn apply_command(
    rules_path: &Path,
    config: &Config,
    metadata_path: Option<&Path>,
    paths: &[PathBuf],
) -> Result<(), String> {
    let rules = RuleStore::load_rules(rules_path)
        .map_err(|e| format!("Error loading rules: {}", e))?;
    let store = match metadata_path {
        Some(path) => MetadataStore::load(path)
            .map_err(|e| format!("Error loading metadata store: {}", e))?,
        None => MetadataStore::new(),
    };
    let ledger = UndoLedger::new(config.undo_capacity);
    let files = collect_files(paths)?;

    if files.is_empty() {
        OutputFormatter::warning("No files found to process.");
        return Ok(());
    }

    if config.dry_run {
        OutputFormatter::dry_run_notice(&format!(
            "Applying {} rule(s) to {} file(s)",
            rules.len(),
            files.len()
        ));
    } else {
        OutputFormatter::info(&format!(
            "Applying {} rule(s) to {} file(s)",
            rules.len(),
            files.len()
        ));
    }

    let progress = (files.len() > PROGRESS_THRESHOLD)
        .then(|| OutputFormatter::create_progress_bar(files.len() as u64));
    let printer = |line: &str| match &progress {
        Some(pb) => pb.suspend(|| OutputFormatter::log_line(line)),
        None => OutputFormatter::log_line(line),
    };

    let summary = apply_rules(&rules, &files, config, &ledger, &store, Some(&printer), || {
        if let Some(pb) = &progress {
            pb.inc(1);
        }
    });

    if let Some(pb) = &progress {
        pb.finish_with_message("done");
    }

    print_summary(&summary, config, &store);

    if let Some(path) = metadata_path
        && !config.dry_run
    {
        store
            .save(path)
            .map_err(|e| format!("Error saving metadata store: {}", e))?;
    }

    Ok(())
}

/// Runs `rules` against every file and tallies the outcome.
///
/// `on_file` is called once per file after its rules ran.
pub fn apply_rules(
    rules: &[Rule],
    files: &[PathBuf],
    config: &Config,
    ledger: &UndoLedger,
    store: &MetadataStore,
    sink: Option<&dyn ActivitySink>,
    mut on_file: impl FnMut(),
) -> ApplySummary {
    let mut executor = RuleExecutor::new(ledger, store);
    if let Some(sink) = sink {
        executor = executor.with_sink(sink);
    }

    let mut summary = ApplySummary::default();

    for path in files {
        let file = match FileInfo::from_path(path) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                summary.failed += 1;
                on_file();
                continue;
            }
        };

        if let Some(sink) = sink {
            sink.log(&format!("{}:", path.display()));
        }
        let report = executor.execute(rules, &file, config);

        summary.files_seen += 1;
        if report.handled {
            summary.files_handled += 1;
        } else {
            summary.unhandled.push(path.clone());
        }
        summary.failed += report.failed();

        for record in &report.actions {
            let result = &record.result;
            if result.is_real_change() && result.meta.undo_type.is_some() {
                summary.undo_recorded += 1;
            }
            if result.is_real_change() || (result.ok && result.meta.was_dry_run) {
                *summary
                    .action_counts
                    .entry(record.action.type_name().to_string())
                    .or_insert(0) += 1;
            }
        }

        on_file();
    }

    summary
}

fn print_summary(summary: &ApplySummary, config: &Config, store: &MetadataStore) {
    OutputFormatter::summary_table(&summary.action_counts, summary.files_handled);

    if !summary.unhandled.is_empty() {
        OutputFormatter::header("UNMATCHED");
        let mapper = FileMapper::shared();
        for path in &summary.unhandled {
            let category = mapper.categorize_path(path);
            let tags = store.tags(path);
            let tag_info = if tags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", tags.into_iter().collect::<Vec<_>>().join(", "))
            };
            OutputFormatter::plain(&format!(
                " - {} ({}){}",
                path.display(),
                category.as_str(),
                tag_info
            ));
        }
    }

    if summary.failed > 0 {
        OutputFormatter::error(&format!(
            "{} action(s) failed. Please review errors above.",
            summary.failed
        ));
    }

    if config.dry_run {
        OutputFormatter::dry_run_notice("Dry run complete. No files were modified.");
    } else {
        OutputFormatter::success(&format!(
            "Done. {} undo entr{} recorded.",
            summary.undo_recorded,
            if summary.undo_recorded == 1 { "y" } else { "ies" }
        ));
    }
}

fn validate_command(rules_path: &Path) -> Result<(), String> {
    let rules = RuleStore::load_rules(rules_path)
        .map_err(|e| format!("Invalid rules file {}: {}", rules_path.display(), e))?;

    OutputFormatter::success(&format!(
        "{} is valid ({} rule{})",
        rules_path.display(),
        rules.len(),
        if rules.len() == 1 { "" } else { "s" }
    ));

    for rule in &rules {
        let state = if rule.enabled { "" } else { " (disabled)" };
        OutputFormatter::header(&format!("{}{}", rule.name, state));
        OutputFormatter::plain(&format!(
            "  match {:?}, stop on match: {}",
            rule.match_mode, rule.stop_on_match
        ));
        for condition in &rule.conditions {
            OutputFormatter::plain(&format!("  if   {}", condition.describe()));
        }
        for action in &rule.actions {
            OutputFormatter::plain(&format!("  then {}", action.describe()));
        }
    }

    Ok(())
}

/// Expands the command-line paths into the files a run applies to.
///
/// Files are taken as given. Directories contribute the regular files directly
/// inside them, sorted by name; subdirectories are not descended into.
///
/// # Errors
///
/// Returns an error if a path does not exist or a directory cannot be read.
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, String> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        if !path.is_dir() {
            return Err(format!("Path not found: {}", path.display()));
        }

        let entries = fs::read_dir(path)
            .map_err(|e| format!("Error reading directory {}: {}", path.display(), e))?;
        let mut found: Vec<PathBuf> = entries
            .flatten()
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .map(|entry| entry.path())
            .collect();
        found.sort();
        files.extend(found);
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_apply_command() {
        let cli = Cli::parse_from([
            "ruletidy",
            "apply",
            "--rules",
            "rules.json",
            "--dry-run",
            "/tmp/inbox",
            "/tmp/other",
        ]);
        match cli.command {
            Command::Apply {
                rules,
                dry_run,
                no_safe_mode,
                paths,
                config,
                metadata,
            } => {
                assert_eq!(rules, PathBuf::from("rules.json"));
                assert!(dry_run);
                assert!(!no_safe_mode);
                assert_eq!(paths.len(), 2);
                assert!(config.is_none());
                assert!(metadata.is_none());
            }
            other => panic!("Unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_apply_requires_paths() {
        let parsed = Cli::try_parse_from(["ruletidy", "apply", "--rules", "rules.json"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_collect_files_one_level_deep() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path();
        fs::write(root.join("b.txt"), "b").expect("Failed to write file");
        fs::write(root.join("a.txt"), "a").expect("Failed to write file");
        fs::create_dir(root.join("nested")).expect("Failed to create dir");
        fs::write(root.join("nested/c.txt"), "c").expect("Failed to write file");

        let files = collect_files(&[root.to_path_buf()]).expect("Failed to collect files");
        assert_eq!(files, vec![root.join("a.txt"), root.join("b.txt")]);
    }

    #[test]
    fn test_collect_files_missing_path() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let result = collect_files(&[temp_dir.path().join("missing")]);
        assert!(result.is_err());
    }
}
