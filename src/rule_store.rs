//! Rule documents.
//!
//! Rules are stored as JSON. Each condition and action is written as
//! `{"type": <internal name>, "args": {...}}`. When reading, a display name
//! from the editor ("Rename File") is accepted in place of the internal name
//! ("Rename"); any other unknown name is rejected.
//!
//! ```json
//! [
//!   {
//!     "name": "Screenshots",
//!     "match_mode": "ALL",
//!     "stop_on_match": true,
//!     "conditions": [{"type": "ExtensionIs", "args": {"ext": ".png"}}],
//!     "actions": [{"type": "Move File", "args": {"target_dir": "~/Pictures"}}]
//!   }
//! ]
//! ```

use crate::actions::Action;
use crate::conditions::Condition;
use crate::fsops::atomic_write;
use crate::rule::Rule;
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading or writing rule documents.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unknown condition type '{0}'")]
    UnknownCondition(String),

    #[error("Unknown action type '{0}'")]
    UnknownAction(String),

    #[error("Invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("Malformed rule document: {0}")]
    Malformed(String),

    #[error("Failed to access rules file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Internal condition names.
pub const CONDITION_TYPES: &[&str] = &[
    "NameContains",
    "NameStartsWith",
    "NameEndsWith",
    "NameEquals",
    "ExtensionIs",
    "FileSizeGreaterThan",
    "FileSizeLessThan",
    "RegexMatch",
    "IsHidden",
    "IsReadOnly",
    "IsDirectory",
    "ParentFolderContains",
    "FileInFolder",
    "ColorIs",
    "HasTag",
    "MetadataContains",
    "MetadataFieldEquals",
    "IsDuplicate",
    "ContentContains",
    "DatePattern",
    "FileAgeGreaterThan",
    "FileTypeIs",
];

/// Internal action names.
pub const ACTION_TYPES: &[&str] = &[
    "Move",
    "Copy",
    "Rename",
    "TokenRename",
    "Delete",
    "DeleteToTrash",
    "RunCommand",
    "Archive",
    "Extract",
    "CreateFolder",
    "ColorLabel",
    "AddTag",
    "RemoveTag",
    "MarkAsDuplicate",
    "SetMetadata",
];

/// Editor labels for conditions. The first label listed for a type is its
/// display name.
const CONDITION_ALIASES: &[(&str, &str)] = &[
    ("Name Contains", "NameContains"),
    ("Name Starts With", "NameStartsWith"),
    ("Name Ends With", "NameEndsWith"),
    ("Name Equals", "NameEquals"),
    ("Name Is", "NameEquals"),
    ("Extension Is", "ExtensionIs"),
    ("File Size Greater Than", "FileSizeGreaterThan"),
    ("Size Greater Than", "FileSizeGreaterThan"),
    ("File Size Less Than", "FileSizeLessThan"),
    ("Size Less Than", "FileSizeLessThan"),
    ("Name Matches Regex", "RegexMatch"),
    ("Regex Match", "RegexMatch"),
    ("Is Hidden", "IsHidden"),
    ("Is Read-Only", "IsReadOnly"),
    ("Is Read Only", "IsReadOnly"),
    ("Is Folder", "IsDirectory"),
    ("Is Directory", "IsDirectory"),
    ("Parent Folder Contains", "ParentFolderContains"),
    ("File In Folder", "FileInFolder"),
    ("In Folder", "FileInFolder"),
    ("Color Is", "ColorIs"),
    ("Color Label Is", "ColorIs"),
    ("Has Tag", "HasTag"),
    ("Metadata Contains", "MetadataContains"),
    ("Metadata Field Equals", "MetadataFieldEquals"),
    ("Is Duplicate", "IsDuplicate"),
    ("Content Contains", "ContentContains"),
    ("Date Matches", "DatePattern"),
    ("Date Pattern", "DatePattern"),
    ("Older Than (days)", "FileAgeGreaterThan"),
    ("File Age Greater Than", "FileAgeGreaterThan"),
    ("File Type Is", "FileTypeIs"),
];

/// Editor labels for actions. The first label listed for a type is its
/// display name.
const ACTION_ALIASES: &[(&str, &str)] = &[
    ("Move File", "Move"),
    ("Copy File", "Copy"),
    ("Rename File", "Rename"),
    ("Rename with Tokens", "TokenRename"),
    ("Delete File", "Delete"),
    ("Move to Trash", "DeleteToTrash"),
    ("Run Command", "RunCommand"),
    ("Archive File", "Archive"),
    ("Extract Archive", "Extract"),
    ("Create Folder", "CreateFolder"),
    ("Set Color Label", "ColorLabel"),
    ("Add Tag", "AddTag"),
    ("Remove Tag", "RemoveTag"),
    ("Mark as Duplicate", "MarkAsDuplicate"),
    ("Set Metadata", "SetMetadata"),
];

/// Which half of the rule a tagged entry belongs to.
#[derive(Debug, Clone, Copy)]
enum Kind {
    Condition,
    Action,
}

impl Kind {
    fn field(self) -> &'static str {
        match self {
            Kind::Condition => "conditions",
            Kind::Action => "actions",
        }
    }

    fn canonical(self, name: &str) -> Option<&'static str> {
        match self {
            Kind::Condition => RuleStore::canonical_condition_name(name),
            Kind::Action => RuleStore::canonical_action_name(name),
        }
    }

    fn unknown(self, name: String) -> ValidationError {
        match self {
            Kind::Condition => ValidationError::UnknownCondition(name),
            Kind::Action => ValidationError::UnknownAction(name),
        }
    }

    fn check(self, entry: Value) -> Result<(), String> {
        let parsed = match self {
            Kind::Condition => serde_json::from_value::<Condition>(entry).map(|_| ()),
            Kind::Action => serde_json::from_value::<Action>(entry).map(|_| ()),
        };
        parsed.map_err(|e| e.to_string())
    }
}

fn resolve(name: &str, types: &[&'static str], aliases: &[(&str, &'static str)]) -> Option<&'static str> {
    let name = name.trim();
    types.iter().copied().find(|t| *t == name).or_else(|| {
        aliases
            .iter()
            .find(|(label, _)| label.eq_ignore_ascii_case(name))
            .map(|(_, internal)| *internal)
    })
}

/// Converts rules to and from their JSON document form.
pub struct RuleStore;

impl RuleStore {
    /// Internal condition name for an internal or display name.
    pub fn canonical_condition_name(name: &str) -> Option<&'static str> {
        resolve(name, CONDITION_TYPES, CONDITION_ALIASES)
    }

    /// Internal action name for an internal or display name.
    pub fn canonical_action_name(name: &str) -> Option<&'static str> {
        resolve(name, ACTION_TYPES, ACTION_ALIASES)
    }

    /// Editor label for an internal condition name.
    pub fn condition_display_name(internal: &str) -> Option<&'static str> {
        CONDITION_ALIASES
            .iter()
            .find(|(_, name)| *name == internal)
            .map(|(label, _)| *label)
    }

    /// Editor label for an internal action name.
    pub fn action_display_name(internal: &str) -> Option<&'static str> {
        ACTION_ALIASES
            .iter()
            .find(|(_, name)| *name == internal)
            .map(|(label, _)| *label)
    }

    /// Serializes a rule with internal type names.
    pub fn rule_to_value(rule: &Rule) -> serde_json::Result<Value> {
        serde_json::to_value(rule)
    }

    pub fn rules_to_value(rules: &[Rule]) -> serde_json::Result<Value> {
        serde_json::to_value(rules)
    }

    /// Parses one rule, resolving display names and filling in missing
    /// `args` objects.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCondition`/`UnknownAction` for unrecognized type names,
    /// `InvalidRule` for bad arguments and `Malformed` for anything that is
    /// not shaped like a rule.
    pub fn value_to_rule(value: &Value) -> Result<Rule, ValidationError> {
        let Value::Object(object) = value else {
            return Err(ValidationError::Malformed("a rule must be a JSON object".to_string()));
        };
        let rule_name = object
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError::Malformed("rule is missing a 'name'".to_string()))?
            .to_string();

        let mut normalized = object.clone();
        for kind in [Kind::Condition, Kind::Action] {
            if let Some(entries) = normalized.get_mut(kind.field()) {
                normalize_entries(entries, kind, &rule_name)?;
            }
        }

        serde_json::from_value(Value::Object(normalized)).map_err(|e| ValidationError::InvalidRule {
            rule: rule_name,
            reason: e.to_string(),
        })
    }

    /// Parses a list of rules. A top-level `{"rules": [...]}` wrapper is
    /// accepted.
    ///
    /// # Errors
    ///
    /// Fails on the first invalid rule.
    pub fn value_to_rules(value: &Value) -> Result<Vec<Rule>, ValidationError> {
        let list = match value {
            Value::Array(items) => items,
            Value::Object(object) => match object.get("rules") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(ValidationError::Malformed(
                        "expected an array of rules or an object with a 'rules' array".to_string(),
                    ));
                }
            },
            _ => {
                return Err(ValidationError::Malformed(
                    "expected an array of rules".to_string(),
                ));
            }
        };

        list.iter().map(Self::value_to_rule).collect()
    }

    /// Reads rules from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `Malformed` if it is not
    /// JSON, or the first rule validation error.
    pub fn load_rules(path: &Path) -> Result<Vec<Rule>, ValidationError> {
        let content = fs::read_to_string(path).map_err(|source| ValidationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Self::value_to_rules(&value)
    }

    /// Writes rules as pretty JSON, atomically.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be written.
    pub fn save_rules(path: &Path, rules: &[Rule]) -> Result<(), ValidationError> {
        let json = serde_json::to_string_pretty(rules)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        atomic_write(path, json.as_bytes()).map_err(|source| ValidationError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn normalize_entries(entries: &mut Value, kind: Kind, rule_name: &str) -> Result<(), ValidationError> {
    let Value::Array(items) = entries else {
        return Err(ValidationError::InvalidRule {
            rule: rule_name.to_string(),
            reason: format!("'{}' must be an array", kind.field()),
        });
    };

    for item in items.iter_mut() {
        let Value::Object(entry) = item else {
            return Err(ValidationError::InvalidRule {
                rule: rule_name.to_string(),
                reason: format!("every entry in '{}' must be an object", kind.field()),
            });
        };

        let raw_type = entry
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError::InvalidRule {
                rule: rule_name.to_string(),
                reason: format!("an entry in '{}' has no 'type'", kind.field()),
            })?
            .to_string();
        let internal = kind.canonical(&raw_type).ok_or_else(|| kind.unknown(raw_type.clone()))?;

        entry.insert("type".to_string(), Value::String(internal.to_string()));
        if matches!(entry.get("args"), None | Some(Value::Null)) {
            entry.insert("args".to_string(), Value::Object(Map::new()));
        }

        kind.check(Value::Object(entry.clone()))
            .map_err(|reason| ValidationError::InvalidRule {
                rule: rule_name.to_string(),
                reason: format!("{}: {}", internal, reason),
            })?;
    }

    Ok(())
}
