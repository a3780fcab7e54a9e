/// Placeholder expansion for rename, archive and folder patterns.
///
/// Tokens are written in angle brackets and are case-sensitive:
///
/// | Token             | Value                                         |
/// |-------------------|-----------------------------------------------|
/// | `<name>`          | file stem, no extension                       |
/// | `<extension>`     | extension with leading dot (`.jpg`)           |
/// | `<ext>`           | extension without the dot (`jpg`)             |
/// | `<filename>`      | full file name                                |
/// | `<year>` `<month>` `<day>` `<hour>` `<minute>` | modification time, zero-padded |
/// | `<date_modified>` | modification date, `YYYY-MM-DD`               |
/// | `<date_created>`  | creation date, `YYYY-MM-DD`                   |
/// | `<parent>`        | name of the containing folder                 |
/// | `<path>`          | full path                                     |
/// | `<size>`          | size in bytes                                 |
///
/// Unknown tokens are left untouched.
use crate::file_info::FileInfo;
use chrono::{DateTime, Local};
use regex::{Captures, Regex};
use std::sync::OnceLock;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<([a-z_]+)>").expect("token pattern is valid"))
}

/// Expands placeholder tokens against a file snapshot.
pub struct TokenExpander;

impl TokenExpander {
    /// Replaces every recognized token in `pattern`.
    ///
    /// Dates come from the file's timestamps. When the snapshot carries no
    /// modification time, date tokens are left untouched, so the result
    /// depends only on `pattern` and `file`.
    ///
    /// # Examples
    ///
    /// ```
    /// use ruletidy::{FileInfo, TokenExpander};
    ///
    /// let file = FileInfo::unresolved("/inbox/Scan.PDF");
    /// assert_eq!(TokenExpander::expand("<name>_signed<extension>", &file), "Scan_signed.pdf");
    /// assert_eq!(TokenExpander::expand("<unknown>-<name>", &file), "<unknown>-Scan");
    /// ```
    pub fn expand(pattern: &str, file: &FileInfo) -> String {
        if !pattern.contains('<') {
            return pattern.to_string();
        }

        let modified = file.modified();

        token_pattern()
            .replace_all(pattern, |caps: &Captures| {
                Self::resolve(&caps[1], file, modified)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// True if `pattern` references the given token name.
    pub fn mentions(pattern: &str, token: &str) -> bool {
        token_pattern()
            .captures_iter(pattern)
            .any(|caps| &caps[1] == token)
    }

    fn resolve(token: &str, file: &FileInfo, modified: Option<DateTime<Local>>) -> Option<String> {
        let value = match token {
            "name" => file.stem(),
            "extension" => file.ext.clone(),
            "ext" => file.ext.trim_start_matches('.').to_string(),
            "filename" => file.name.clone(),
            "year" => modified?.format("%Y").to_string(),
            "month" => modified?.format("%m").to_string(),
            "day" => modified?.format("%d").to_string(),
            "hour" => modified?.format("%H").to_string(),
            "minute" => modified?.format("%M").to_string(),
            "date_modified" => modified?.format("%Y-%m-%d").to_string(),
            "date_created" => file.created().or(modified)?.format("%Y-%m-%d").to_string(),
            "parent" => file
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            "path" => file
                .path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default(),
            "size" => file.size.map(|s| s.to_string()).unwrap_or_default(),
            _ => return None,
        };
        Some(value)
    }
}
