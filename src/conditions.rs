//! Rule conditions.
//!
//! A `Condition` is a predicate over a `FileInfo` snapshot and the shared
//! `MetadataStore`. Evaluation never mutates anything and never fails: a
//! condition that cannot be computed (missing path, unreadable file, invalid
//! pattern) evaluates to `false`.
//!
//! Name and path comparisons are case-insensitive unless a variant says
//! otherwise.

use crate::config::{Config, DEFAULT_CONTENT_SCAN_LIMIT};
use crate::file_category::{Category, FileMapper};
use crate::file_info::FileInfo;
use crate::fsops::{expand_home, normalize_lexical};
use crate::metadata::{HashKind, HashRecord, MetadataStore};
use crate::regex_guard::{self, DEFAULT_REGEX_TIMEOUT, MatchOutcome};
use chrono::{DateTime, Local};
use glob::{MatchOptions, Pattern};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Shared state a condition may read.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub metadata: &'a MetadataStore,
    pub regex_timeout: Duration,
    pub content_scan_limit: u64,
}

impl<'a> EvalContext<'a> {
    /// Context with default bounds.
    pub fn new(metadata: &'a MetadataStore) -> Self {
        Self {
            metadata,
            regex_timeout: DEFAULT_REGEX_TIMEOUT,
            content_scan_limit: DEFAULT_CONTENT_SCAN_LIMIT,
        }
    }

    /// Context with bounds taken from `config`.
    pub fn from_config(config: &Config, metadata: &'a MetadataStore) -> Self {
        Self {
            metadata,
            regex_timeout: config.regex_timeout(),
            content_scan_limit: config.content_scan_limit,
        }
    }
}

/// Which timestamp a date condition looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhichDate {
    #[default]
    Modified,
    Created,
    Accessed,
}

impl WhichDate {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhichDate::Modified => "modified",
            WhichDate::Created => "created",
            WhichDate::Accessed => "accessed",
        }
    }

    fn of(self, file: &FileInfo) -> Option<DateTime<Local>> {
        match self {
            WhichDate::Modified => file.modified(),
            WhichDate::Created => file.created(),
            WhichDate::Accessed => file.accessed(),
        }
    }
}

/// How `IsDuplicate` compares files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateMatch {
    /// SHA-256 of the whole file.
    #[default]
    Content,
    /// SHA-256 of the first 64 KiB plus size.
    Quick,
    /// Size only.
    Size,
}

fn default_true() -> bool {
    true
}

/// Arguments of `RegexMatch`; the compiled pattern is cached on first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexCondition {
    pub pattern: String,
    #[serde(default = "default_true")]
    pub ignore_case: bool,
    #[serde(skip)]
    compiled: OnceLock<Option<Arc<Regex>>>,
}

impl PartialEq for RegexCondition {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.ignore_case == other.ignore_case
    }
}

impl RegexCondition {
    pub fn new(pattern: impl Into<String>, ignore_case: bool) -> Self {
        Self {
            pattern: pattern.into(),
            ignore_case,
            compiled: OnceLock::new(),
        }
    }

    /// Compiles the pattern once; an invalid pattern stays `None`.
    fn regex(&self) -> Option<&Arc<Regex>> {
        self.compiled
            .get_or_init(|| match regex_guard::compile(&self.pattern, self.ignore_case) {
                Ok(regex) => Some(Arc::new(regex)),
                Err(e) => {
                    tracing::warn!(pattern = %self.pattern, error = %e, "RegexMatch: invalid pattern");
                    None
                }
            })
            .as_ref()
    }

    fn matches(&self, name: &str, timeout: Duration) -> bool {
        if name.is_empty() {
            return false;
        }
        if self.pattern.is_empty() {
            return true;
        }
        let Some(regex) = self.regex() else {
            return false;
        };

        match regex_guard::match_with_timeout(regex, name, timeout) {
            MatchOutcome::TimedOut => {
                tracing::warn!(pattern = %self.pattern, "RegexMatch timed out; treating as no match");
                false
            }
            outcome => outcome.is_match(),
        }
    }
}

/// A predicate over one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args")]
pub enum Condition {
    NameContains {
        text: String,
    },
    NameStartsWith {
        prefix: String,
    },
    NameEndsWith {
        suffix: String,
    },
    NameEquals {
        name: String,
        #[serde(default)]
        case_sensitive: bool,
    },
    /// One extension or a comma-separated list; the dot is optional.
    ExtensionIs {
        ext: String,
    },
    FileSizeGreaterThan {
        bytes: u64,
    },
    FileSizeLessThan {
        bytes: u64,
    },
    RegexMatch(RegexCondition),
    IsHidden {},
    IsReadOnly {},
    IsDirectory {},
    ParentFolderContains {
        substring: String,
    },
    FileInFolder {
        folder_pattern: String,
    },
    ColorIs {
        color: String,
    },
    HasTag {
        tag: String,
    },
    MetadataContains {
        field_path: String,
        substring: String,
    },
    MetadataFieldEquals {
        field_path: String,
        value: Value,
    },
    IsDuplicate {
        #[serde(default)]
        match_type: DuplicateMatch,
    },
    ContentContains {
        text: String,
    },
    DatePattern {
        #[serde(default)]
        which_date: WhichDate,
        pattern: String,
    },
    FileAgeGreaterThan {
        days: u64,
        #[serde(default)]
        which_date: WhichDate,
    },
    FileTypeIs {
        category: Category,
    },
}

impl Condition {
    /// Internal name used in rule documents.
    pub fn type_name(&self) -> &'static str {
        match self {
            Condition::NameContains { .. } => "NameContains",
            Condition::NameStartsWith { .. } => "NameStartsWith",
            Condition::NameEndsWith { .. } => "NameEndsWith",
            Condition::NameEquals { .. } => "NameEquals",
            Condition::ExtensionIs { .. } => "ExtensionIs",
            Condition::FileSizeGreaterThan { .. } => "FileSizeGreaterThan",
            Condition::FileSizeLessThan { .. } => "FileSizeLessThan",
            Condition::RegexMatch(_) => "RegexMatch",
            Condition::IsHidden {} => "IsHidden",
            Condition::IsReadOnly {} => "IsReadOnly",
            Condition::IsDirectory {} => "IsDirectory",
            Condition::ParentFolderContains { .. } => "ParentFolderContains",
            Condition::FileInFolder { .. } => "FileInFolder",
            Condition::ColorIs { .. } => "ColorIs",
            Condition::HasTag { .. } => "HasTag",
            Condition::MetadataContains { .. } => "MetadataContains",
            Condition::MetadataFieldEquals { .. } => "MetadataFieldEquals",
            Condition::IsDuplicate { .. } => "IsDuplicate",
            Condition::ContentContains { .. } => "ContentContains",
            Condition::DatePattern { .. } => "DatePattern",
            Condition::FileAgeGreaterThan { .. } => "FileAgeGreaterThan",
            Condition::FileTypeIs { .. } => "FileTypeIs",
        }
    }

    /// Short human-readable form, e.g. `NameContains("invoice")`.
    pub fn describe(&self) -> String {
        let args = match self {
            Condition::NameContains { text } => format!("{:?}", text),
            Condition::NameStartsWith { prefix } => format!("{:?}", prefix),
            Condition::NameEndsWith { suffix } => format!("{:?}", suffix),
            Condition::NameEquals {
                name,
                case_sensitive,
            } => format!("{:?}, case_sensitive={}", name, case_sensitive),
            Condition::ExtensionIs { ext } => format!("{:?}", ext),
            Condition::FileSizeGreaterThan { bytes } | Condition::FileSizeLessThan { bytes } => {
                bytes.to_string()
            }
            Condition::RegexMatch(re) => format!("{:?}", re.pattern),
            Condition::IsHidden {} | Condition::IsReadOnly {} | Condition::IsDirectory {} => {
                String::new()
            }
            Condition::ParentFolderContains { substring } => format!("{:?}", substring),
            Condition::FileInFolder { folder_pattern } => format!("{:?}", folder_pattern),
            Condition::ColorIs { color } => format!("{:?}", color),
            Condition::HasTag { tag } => format!("{:?}", tag),
            Condition::MetadataContains {
                field_path,
                substring,
            } => format!("{} ~ {:?}", field_path, substring),
            Condition::MetadataFieldEquals { field_path, value } => {
                format!("{} == {}", field_path, value)
            }
            Condition::IsDuplicate { match_type } => format!("{:?}", match_type),
            Condition::ContentContains { text } => format!("{:?}", text),
            Condition::DatePattern {
                which_date,
                pattern,
            } => format!("{} {:?}", which_date.as_str(), pattern),
            Condition::FileAgeGreaterThan { days, which_date } => {
                format!("{} days, {}", days, which_date.as_str())
            }
            Condition::FileTypeIs { category } => category.as_str().to_string(),
        };
        format!("{}({})", self.type_name(), args)
    }

    /// Evaluates the condition. Never panics; anything that cannot be
    /// computed is `false`.
    pub fn evaluate(&self, file: &FileInfo, ctx: &EvalContext<'_>) -> bool {
        let result = self.evaluate_inner(file, ctx);
        tracing::debug!(condition = %self.describe(), file = %file.name, result, "Evaluated condition");
        result
    }

    fn evaluate_inner(&self, file: &FileInfo, ctx: &EvalContext<'_>) -> bool {
        let name = file.name.as_str();
        let path = file.path.as_deref();

        match self {
            Condition::NameContains { text } => {
                non_empty(name, text) && lower(name).contains(&lower(text))
            }
            Condition::NameStartsWith { prefix } => {
                non_empty(name, prefix) && lower(name).starts_with(&lower(prefix))
            }
            Condition::NameEndsWith { suffix } => {
                non_empty(name, suffix) && lower(name).ends_with(&lower(suffix))
            }
            Condition::NameEquals {
                name: expected,
                case_sensitive,
            } => {
                if name.is_empty() {
                    false
                } else if *case_sensitive {
                    name == expected
                } else {
                    name.to_lowercase() == expected.to_lowercase()
                }
            }
            Condition::ExtensionIs { ext } => {
                !file.ext.is_empty()
                    && ext
                        .split(',')
                        .map(normalize_extension)
                        .any(|wanted| !wanted.is_empty() && wanted == file.ext.to_lowercase())
            }
            Condition::FileSizeGreaterThan { bytes } => file.size.is_some_and(|s| s > *bytes),
            Condition::FileSizeLessThan { bytes } => file.size.is_some_and(|s| s < *bytes),
            Condition::RegexMatch(re) => re.matches(name, ctx.regex_timeout),
            Condition::IsHidden {} => is_hidden(file),
            Condition::IsReadOnly {} => path.is_some_and(|p| match fs::metadata(p) {
                Ok(meta) => meta.permissions().readonly(),
                Err(_) => true,
            }),
            Condition::IsDirectory {} => path.is_some_and(Path::is_dir),
            Condition::ParentFolderContains { substring } => file.parent().is_some_and(|parent| {
                substring.is_empty()
                    || lower(&parent.to_string_lossy()).contains(&lower(substring))
            }),
            Condition::FileInFolder { folder_pattern } => file
                .parent()
                .is_some_and(|parent| in_folder(parent, folder_pattern)),
            Condition::ColorIs { color } => path.is_some_and(|p| {
                ctx.metadata
                    .color(p)
                    .is_some_and(|c| c.eq_ignore_ascii_case(color.trim()))
            }),
            Condition::HasTag { tag } => {
                path.is_some_and(|p| !tag.trim().is_empty() && ctx.metadata.has_tag(p, tag))
            }
            Condition::MetadataContains {
                field_path,
                substring,
            } => path
                .and_then(|p| ctx.metadata.metadata_value(p, field_path))
                .is_some_and(|value| value_contains(&value, substring)),
            Condition::MetadataFieldEquals { field_path, value } => path
                .and_then(|p| ctx.metadata.metadata_value(p, field_path))
                .is_some_and(|stored| values_equal(&stored, value)),
            Condition::IsDuplicate { match_type } => {
                path.is_some_and(|p| is_duplicate(p, *match_type, ctx.metadata))
            }
            Condition::ContentContains { text } => path.is_some_and(|p| {
                !text.is_empty() && content_contains(p, text, ctx.content_scan_limit)
            }),
            Condition::DatePattern {
                which_date,
                pattern,
            } => which_date
                .of(file)
                .is_some_and(|date| date_matches(&date, pattern)),
            Condition::FileAgeGreaterThan { days, which_date } => {
                which_date.of(file).is_some_and(|date| {
                    let age = Local::now().signed_duration_since(date);
                    age.num_seconds() > i64::try_from(*days).unwrap_or(i64::MAX).saturating_mul(86_400)
                })
            }
            Condition::FileTypeIs { category } => {
                let mapper = FileMapper::shared();
                match path {
                    Some(p) if p.is_file() => mapper.categorize_path(p) == *category,
                    _ if !file.ext.is_empty() => {
                        mapper.categorize(None, Some(&file.ext)) == *category
                    }
                    _ => false,
                }
            }
        }
    }
}

fn lower(s: &str) -> String {
    s.to_lowercase()
}

fn non_empty(name: &str, needle: &str) -> bool {
    !name.is_empty() && !needle.is_empty()
}

/// `"PNG"`, `".png"` and `" .Png "` all become `".png"`.
fn normalize_extension(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('.').to_lowercase();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(".{}", trimmed)
    }
}

fn is_hidden(file: &FileInfo) -> bool {
    if file.name.is_empty() {
        return false;
    }
    if file.name.starts_with('.') {
        return true;
    }

    #[cfg(windows)]
    {
        use std::os::windows::fs::MetadataExt;
        const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
        if let Some(meta) = file.metadata() {
            return meta.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0;
        }
    }

    false
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

fn glob_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    }
}

/// Folder match: glob against the parent path or any ancestor name; a bare
/// name against any ancestor name; anything else as an ancestor path.
fn in_folder(parent: &Path, folder_pattern: &str) -> bool {
    let pattern = folder_pattern.trim();
    if pattern.is_empty() {
        return true;
    }

    let ancestor_names = || {
        parent
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
    };

    if has_glob_chars(pattern) {
        let Ok(glob) = Pattern::new(pattern) else {
            tracing::warn!(pattern, "FileInFolder: invalid pattern");
            return false;
        };
        let options = glob_options();
        return glob.matches_path_with(parent, options)
            || ancestor_names().any(|name| glob.matches_with(&name, options));
    }

    if !pattern.contains(['/', '\\']) {
        return ancestor_names().any(|name| name.eq_ignore_ascii_case(pattern));
    }

    let components = |path: &Path| -> Vec<String> {
        normalize_lexical(path)
            .components()
            .map(|c| lower(&c.as_os_str().to_string_lossy()))
            .collect()
    };
    let folder = components(&expand_home(pattern));
    let parent = components(parent);
    parent.len() >= folder.len() && parent.iter().zip(&folder).all(|(a, b)| a == b)
}

fn value_contains(value: &Value, substring: &str) -> bool {
    let needle = lower(substring);
    match value {
        Value::String(s) => lower(s).contains(&needle),
        Value::Array(items) => items.iter().any(|item| value_contains(item, substring)),
        Value::Null => false,
        other => lower(&other.to_string()).contains(&needle),
    }
}

fn values_equal(stored: &Value, expected: &Value) -> bool {
    match (stored, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => stored == expected,
    }
}

fn is_duplicate(path: &Path, match_type: DuplicateMatch, store: &MetadataStore) -> bool {
    if !path.is_file() {
        return false;
    }

    let candidates = match match_type {
        DuplicateMatch::Size => match fs::metadata(path) {
            Ok(meta) => store.find_same_size(path, meta.len()),
            Err(_) => return false,
        },
        DuplicateMatch::Content | DuplicateMatch::Quick => {
            let kind = if match_type == DuplicateMatch::Quick {
                HashKind::Quick
            } else {
                HashKind::Content
            };
            match HashRecord::compute(path, kind) {
                Ok(record) => store.find_matching(path, kind, &record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "IsDuplicate: could not hash file");
                    return false;
                }
            }
        }
    };

    candidates.iter().any(|other| other.is_file())
}

fn content_contains(path: &Path, text: &str, limit: u64) -> bool {
    if !path.is_file() {
        return false;
    }

    let mut buffer = Vec::new();
    if let Err(e) = File::open(path).and_then(|f| f.take(limit).read_to_end(&mut buffer)) {
        tracing::warn!(path = %path.display(), error = %e, "ContentContains: could not read file");
        return false;
    }

    lower(&String::from_utf8_lossy(&buffer)).contains(&lower(text))
}

/// `pattern` is a glob over `YYYY-MM-DD`, or a plain prefix such as `2024-03`.
fn date_matches(date: &DateTime<Local>, pattern: &str) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return false;
    }

    let formatted = date.format("%Y-%m-%d").to_string();
    if has_glob_chars(pattern) {
        Pattern::new(pattern).is_ok_and(|glob| glob.matches(&formatted))
    } else {
        formatted.starts_with(pattern)
    }
}
