//! Runs rules against a file and records what can be undone.

use crate::actions::{Action, ActionContext, ActionResult};
use crate::conditions::EvalContext;
use crate::config::Config;
use crate::file_info::FileInfo;
use crate::metadata::MetadataStore;
use crate::rule::Rule;
use crate::undo::{UndoEntry, UndoLedger, UndoResult, UndoType};

/// Receives every log line the executor produces, e.g. an activity log.
pub trait ActivitySink {
    fn log(&self, line: &str);
}

impl<F> ActivitySink for F
where
    F: Fn(&str),
{
    fn log(&self, line: &str) {
        self(line)
    }
}

/// One action that ran, with its outcome.
#[derive(Debug, Clone)]
pub struct ActionRecord {
    pub rule: String,
    pub action: Action,
    pub result: ActionResult,
}

/// Outcome of running a rule list against one file.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// True if at least one rule matched.
    pub handled: bool,
    pub log: Vec<String>,
    pub actions: Vec<ActionRecord>,
}

impl ExecutionReport {
    /// Number of actions that made a real change.
    pub fn changed(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.result.is_real_change())
            .count()
    }

    /// Number of actions that failed.
    pub fn failed(&self) -> usize {
        self.actions.iter().filter(|a| !a.result.ok).count()
    }
}

/// Evaluates rules and runs the actions of matching ones.
///
/// The ledger and metadata store are owned by the host and shared by
/// reference; both are internally synchronized.
pub struct RuleExecutor<'a> {
    ledger: &'a UndoLedger,
    metadata: &'a MetadataStore,
    sink: Option<&'a dyn ActivitySink>,
}

impl<'a> RuleExecutor<'a> {
    pub fn new(ledger: &'a UndoLedger, metadata: &'a MetadataStore) -> Self {
        Self {
            ledger,
            metadata,
            sink: None,
        }
    }

    /// Forwards every log line to `sink` as well.
    pub fn with_sink(mut self, sink: &'a dyn ActivitySink) -> Self {
        self.sink = Some(sink);
        self
    }

    fn emit(&self, report: &mut ExecutionReport, line: String) {
        if let Some(sink) = self.sink {
            sink.log(&line);
        }
        report.log.push(line);
    }

    /// Runs `rules` in order against `file`.
    ///
    /// Actions see the file where earlier actions left it. Real, reversible
    /// changes are recorded on the undo ledger, and a file's metadata record
    /// follows it when it is moved or renamed.
    pub fn execute(&self, rules: &[Rule], file: &FileInfo, config: &Config) -> ExecutionReport {
        let eval_ctx = EvalContext::from_config(config, self.metadata);
        let action_ctx = ActionContext::new(config, self.metadata);
        let mut report = ExecutionReport::default();
        let mut current = file.clone();

        for rule in rules {
            if !rule.enabled {
                self.emit(&mut report, format!("Rule '{}' disabled", rule.name));
                continue;
            }

            let (matched, condition_log) = rule.evaluate(&current, &eval_ctx);
            for line in condition_log {
                self.emit(&mut report, line);
            }

            if !matched {
                self.emit(&mut report, format!("Rule '{}': No match", rule.name));
                continue;
            }

            self.emit(&mut report, format!("Rule '{}': MATCHED", rule.name));
            report.handled = true;

            for action in &rule.actions {
                let result = action.run(&current, &action_ctx);
                self.emit(&mut report, format!("  {}", result.log));

                if result.is_real_change() {
                    if let Some(entry) = UndoEntry::from_meta(&result.meta) {
                        self.ledger.record(entry);
                    }
                    if let Some(new_path) = &result.meta.current_path {
                        if let Some(old_path) = &current.path {
                            self.metadata.relocate(old_path, new_path);
                        }
                        current = FileInfo::relocated(new_path);
                    }
                }

                report.actions.push(ActionRecord {
                    rule: rule.name.clone(),
                    action: action.clone(),
                    result,
                });
            }

            if rule.stop_on_match {
                self.emit(&mut report, format!("Stopping after rule '{}'", rule.name));
                break;
            }
        }

        tracing::debug!(
            file = %file.name,
            handled = report.handled,
            actions = report.actions.len(),
            "Finished rule evaluation"
        );
        report
    }

    /// Undoes the most recent change and keeps the metadata store in step.
    pub fn undo_last(&self) -> UndoResult {
        let result = self.ledger.undo_last();
        self.after_undo(&result);
        result
    }

    /// Undoes a specific history entry and keeps the metadata store in step.
    pub fn undo_entry(&self, entry: &UndoEntry) -> UndoResult {
        let result = self.ledger.undo_entry(entry);
        self.after_undo(&result);
        result
    }

    fn after_undo(&self, result: &UndoResult) {
        if let Some(sink) = self.sink {
            let marker = if result.success { "UNDO" } else { "ERROR: UNDO" };
            sink.log(&format!("{}: {}", marker, result.message));
        }
        if !result.success {
            return;
        }
        let Some(entry) = &result.entry else {
            return;
        };

        match entry.undo_type {
            UndoType::Move | UndoType::Rename => {
                if let (Some(dst), Some(restored)) = (&entry.dst, &result.restored) {
                    self.metadata.relocate(dst, restored);
                }
            }
            UndoType::Copy => {
                if let Some(dst) = &entry.dst {
                    self.metadata.remove(dst);
                }
            }
            UndoType::Delete => {}
        }
    }
}
