//! ruletidy - A rule-driven file organization engine
//!
//! This library evaluates user-defined rules (conditions + actions) against
//! file snapshots, performs collision-safe and idempotent filesystem actions
//! with dry-run support, and records every real mutation in a bounded undo
//! ledger so it can be reversed later.

pub mod actions;
pub mod archive;
pub mod cli;
pub mod conditions;
pub mod config;
pub mod executor;
pub mod file_category;
pub mod file_info;
pub mod fsops;
pub mod metadata;
pub mod output;
pub mod regex_guard;
pub mod rule;
pub mod rule_store;
pub mod safety;
pub mod tokens;
pub mod undo;

pub use actions::{Action, ActionContext, ActionMeta, ActionResult};
pub use conditions::{Condition, DuplicateMatch, EvalContext, RegexCondition, WhichDate};
pub use config::{Config, ConfigError};
pub use executor::{ActionRecord, ActivitySink, ExecutionReport, RuleExecutor};
pub use file_category::{Category, FileMapper};
pub use file_info::FileInfo;
pub use metadata::{HashKind, HashRecord, MetadataRecord, MetadataStore, StoreError};
pub use rule::{MatchMode, Rule};
pub use rule_store::{RuleStore, ValidationError};
pub use tokens::TokenExpander;
pub use undo::{UndoEntry, UndoLedger, UndoResult, UndoStatus, UndoType};

pub use cli::{Cli, Command, run_cli};
