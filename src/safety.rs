//! Safe-mode guards for destructive actions.
//!
//! `is_protected_path` decides whether a delete may touch a path when safe
//! mode is on; `validate_command` rejects obviously dangerous shell commands
//! before `RunCommand` hands them to a shell.

use crate::fsops::normalize_lexical;
use glob::{MatchOptions, Pattern};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Directories whose contents are never deleted in safe mode.
#[cfg(not(windows))]
const SYSTEM_DIRS: &[&str] = &[
    "/bin",
    "/boot",
    "/dev",
    "/etc",
    "/lib",
    "/lib64",
    "/proc",
    "/sbin",
    "/sys",
    "/usr",
    "/System",
    "/Library",
    "/Applications",
    "/private/etc",
];

#[cfg(windows)]
const SYSTEM_DIRS: &[&str] = &[
    "C:\\Windows",
    "C:\\Program Files",
    "C:\\Program Files (x86)",
    "C:\\ProgramData",
];

/// Shell fragments refused by `RunCommand`.
const BLOCKED_COMMAND_PATTERNS: &[&str] = &[
    r"rm\s+-rf\s+/(\s|$)",
    r"rm\s+-rf\s+~",
    r"rm\s+-rf\s+\$home",
    r">\s*/dev/sd",
    r"dd\s+.*of=/dev/",
    r"mkfs\.",
    r"chmod\s+-r\s+777\s+/(\s|$)",
    r":\(\)\s*\{\s*:\|:&\s*\};:",
    r"curl\s+.*\|\s*(ba)?sh",
    r"wget\s+.*\|\s*(ba)?sh",
    r"(^|\s)sudo\s+",
    r"(^|\s)doas\s+",
    r"format\s+[a-z]:",
];

/// True if `path` must not be deleted in safe mode.
///
/// Protected are the filesystem root, the home directory itself, everything
/// under the platform system directories, and anything matching one of the
/// `extra` patterns. The path is checked both as written and with symlinks
/// resolved, so a linked folder cannot stand in for a protected one.
pub fn is_protected_path(path: &Path, extra: &[Pattern]) -> bool {
    checked_forms(path)
        .iter()
        .any(|form| is_protected_form(form, extra))
}

/// The lexical form of `path` plus its symlink-resolved forms. A leaf that
/// does not exist yet is resolved through its parent.
fn checked_forms(path: &Path) -> Vec<PathBuf> {
    let lexical = normalize_lexical(path);
    let mut forms = vec![lexical.clone()];

    let through_parent = lexical.parent().zip(lexical.file_name()).and_then(|(parent, name)| {
        fs::canonicalize(parent).ok().map(|parent| parent.join(name))
    });
    for resolved in [fs::canonicalize(&lexical).ok(), through_parent]
        .into_iter()
        .flatten()
    {
        if !forms.contains(&resolved) {
            forms.push(resolved);
        }
    }
    forms
}

fn is_protected_form(check_path: &Path, extra: &[Pattern]) -> bool {
    if check_path.parent().is_none() {
        return true;
    }

    if let Some(home) = dirs::home_dir()
        && check_path == home
    {
        return true;
    }

    if SYSTEM_DIRS
        .iter()
        .map(PathBuf::from)
        .any(|dir| check_path.starts_with(&dir))
    {
        return true;
    }

    let options = MatchOptions {
        case_sensitive: !cfg!(windows),
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    extra
        .iter()
        .any(|pattern| pattern.matches_path_with(check_path, options))
}

fn blocked_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        BLOCKED_COMMAND_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// Rejects commands matching a known-dangerous pattern.
///
/// # Errors
///
/// Returns a human-readable reason naming the offending pattern.
pub fn validate_command(command: &str) -> Result<(), String> {
    if command.trim().is_empty() {
        return Err("command is empty".to_string());
    }

    let lowered = command.to_lowercase();
    for pattern in blocked_patterns() {
        if pattern.is_match(&lowered) {
            return Err(format!("matches dangerous pattern '{}'", pattern.as_str()));
        }
    }

    Ok(())
}
