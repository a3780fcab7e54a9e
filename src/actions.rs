//! Rule actions.
//!
//! Every action follows the same policy before it touches anything:
//!
//! 1. validate its arguments,
//! 2. refuse protected paths in safe mode (deletes only),
//! 3. under `dry_run`, report the intended effect and stop,
//! 4. skip when the target state is already reached,
//! 5. pick a ` (N)` alternate name instead of overwriting.
//!
//! `run` never panics and never returns an error: failures come back as
//! `ok == false` with a log line starting with `ERROR`. Successful real
//! mutations fill `ActionMeta` with what the undo ledger needs to reverse
//! them, but recording is left to the executor.

use crate::archive::{self, ArchiveFormat};
use crate::config::Config;
use crate::file_info::FileInfo;
use crate::fsops::{
    copy_path, exists_no_follow, expand_home, find_identical, move_path, remove_path,
    same_location, unique_path,
};
use crate::metadata::MetadataStore;
use crate::safety;
use crate::tokens::TokenExpander;
use crate::undo::UndoType;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Shared state an action may read or write.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub config: &'a Config,
    pub metadata: &'a MetadataStore,
}

impl<'a> ActionContext<'a> {
    pub fn new(config: &'a Config, metadata: &'a MetadataStore) -> Self {
        Self { config, metadata }
    }
}

/// Structured side information of an action result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionMeta {
    /// Internal name of the action that produced this result.
    pub kind: &'static str,
    /// Reversal needed to undo the action, if it is reversible.
    pub undo_type: Option<UndoType>,
    pub was_dry_run: bool,
    pub skipped: bool,
    pub collision_handled: bool,
    pub src: Option<PathBuf>,
    pub dst: Option<PathBuf>,
    pub old_name: Option<String>,
    pub new_name: Option<String>,
    /// Retained copy of deleted content.
    pub temp_backup: Option<PathBuf>,
    /// New location of the file after a move or rename.
    pub current_path: Option<PathBuf>,
}

impl ActionMeta {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }
}

/// Outcome of running one action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub ok: bool,
    pub log: String,
    pub meta: ActionMeta,
}

impl ActionResult {
    fn failure(kind: &'static str, log: String) -> Self {
        Self {
            ok: false,
            log,
            meta: ActionMeta::new(kind),
        }
    }

    fn success(meta: ActionMeta, log: String) -> Self {
        Self {
            ok: true,
            log,
            meta,
        }
    }

    fn dry_run(mut meta: ActionMeta, log: String) -> Self {
        meta.was_dry_run = true;
        Self::success(meta, log)
    }

    fn skipped(kind: &'static str, log: String) -> Self {
        let mut meta = ActionMeta::new(kind);
        meta.skipped = true;
        Self::success(meta, log)
    }

    /// True if the action changed the filesystem or metadata store.
    pub fn is_real_change(&self) -> bool {
        self.ok && !self.meta.was_dry_run && !self.meta.skipped
    }
}

fn default_duplicate_tag() -> String {
    "duplicate".to_string()
}

/// One mutation applied to a matching file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args")]
pub enum Action {
    /// Move into a folder. Tokens and `~` are expanded; relative folders are
    /// resolved against the file's folder.
    Move {
        target_dir: String,
    },
    Copy {
        target_dir: String,
    },
    Rename {
        new_name: String,
    },
    TokenRename {
        pattern: String,
    },
    Delete {},
    DeleteToTrash {},
    RunCommand {
        template: String,
    },
    /// Pack into `<target_dir>/<name>.tar.gz`; an empty folder means next to
    /// the file.
    Archive {
        #[serde(default)]
        target_dir: String,
    },
    /// Unpack a `.tar`, `.tar.gz` or `.tgz` into `<target_dir>/<stem>/`.
    Extract {
        #[serde(default)]
        target_dir: String,
    },
    CreateFolder {
        path_pattern: String,
    },
    ColorLabel {
        color: String,
    },
    AddTag {
        tag: String,
    },
    RemoveTag {
        tag: String,
    },
    MarkAsDuplicate {
        #[serde(default = "default_duplicate_tag")]
        tag: String,
    },
    SetMetadata {
        field_path: String,
        value: Value,
    },
}

/// Why an action did not complete.
type Failure = String;

impl Action {
    /// Internal name used in rule documents.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Move { .. } => "Move",
            Action::Copy { .. } => "Copy",
            Action::Rename { .. } => "Rename",
            Action::TokenRename { .. } => "TokenRename",
            Action::Delete {} => "Delete",
            Action::DeleteToTrash {} => "DeleteToTrash",
            Action::RunCommand { .. } => "RunCommand",
            Action::Archive { .. } => "Archive",
            Action::Extract { .. } => "Extract",
            Action::CreateFolder { .. } => "CreateFolder",
            Action::ColorLabel { .. } => "ColorLabel",
            Action::AddTag { .. } => "AddTag",
            Action::RemoveTag { .. } => "RemoveTag",
            Action::MarkAsDuplicate { .. } => "MarkAsDuplicate",
            Action::SetMetadata { .. } => "SetMetadata",
        }
    }

    /// Upper-case label used in log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Action::Move { .. } => "MOVE",
            Action::Copy { .. } => "COPY",
            Action::Rename { .. } => "RENAME",
            Action::TokenRename { .. } => "TOKEN RENAME",
            Action::Delete {} => "DELETE",
            Action::DeleteToTrash {} => "DELETE TO TRASH",
            Action::RunCommand { .. } => "RUN COMMAND",
            Action::Archive { .. } => "ARCHIVE",
            Action::Extract { .. } => "EXTRACT",
            Action::CreateFolder { .. } => "CREATE FOLDER",
            Action::ColorLabel { .. } => "COLOR LABEL",
            Action::AddTag { .. } => "ADD TAG",
            Action::RemoveTag { .. } => "REMOVE TAG",
            Action::MarkAsDuplicate { .. } => "MARK AS DUPLICATE",
            Action::SetMetadata { .. } => "SET METADATA",
        }
    }

    /// Short human-readable form, e.g. `Move("/dest")`.
    pub fn describe(&self) -> String {
        let args = match self {
            Action::Move { target_dir }
            | Action::Copy { target_dir }
            | Action::Archive { target_dir }
            | Action::Extract { target_dir } => format!("{:?}", target_dir),
            Action::Rename { new_name } => format!("{:?}", new_name),
            Action::TokenRename { pattern } => format!("{:?}", pattern),
            Action::Delete {} | Action::DeleteToTrash {} => String::new(),
            Action::RunCommand { template } => format!("{:?}", template),
            Action::CreateFolder { path_pattern } => format!("{:?}", path_pattern),
            Action::ColorLabel { color } => format!("{:?}", color),
            Action::AddTag { tag } | Action::RemoveTag { tag } | Action::MarkAsDuplicate { tag } => {
                format!("{:?}", tag)
            }
            Action::SetMetadata { field_path, value } => format!("{} = {}", field_path, value),
        };
        format!("{}({})", self.type_name(), args)
    }

    /// Runs the action against the file's current location.
    pub fn run(&self, file: &FileInfo, ctx: &ActionContext<'_>) -> ActionResult {
        let result = self
            .run_inner(file, ctx)
            .unwrap_or_else(|reason| {
                ActionResult::failure(
                    self.type_name(),
                    format!("ERROR: {} {}: {}", self.label(), file.name, reason),
                )
            });

        if !result.ok {
            tracing::warn!(action = %self.describe(), file = %file.name, "{}", result.log);
        } else if result.is_real_change() {
            tracing::info!(action = %self.describe(), file = %file.name, "{}", result.log);
        } else {
            tracing::debug!(action = %self.describe(), file = %file.name, "{}", result.log);
        }
        result
    }

    fn run_inner(&self, file: &FileInfo, ctx: &ActionContext<'_>) -> Result<ActionResult, Failure> {
        match self {
            Action::Move { target_dir } => self.move_file(file, target_dir, ctx.config),
            Action::Copy { target_dir } => self.copy_file(file, target_dir, ctx.config),
            Action::Rename { new_name } => self.rename_file(file, new_name.trim(), ctx.config),
            Action::TokenRename { pattern } => {
                let new_name = token_rename_target(pattern, file);
                self.rename_file(file, &new_name, ctx.config)
            }
            Action::Delete {} => self.delete_file(file, ctx.config, false),
            Action::DeleteToTrash {} => self.delete_file(file, ctx.config, true),
            Action::RunCommand { template } => self.run_command(file, template, ctx.config),
            Action::Archive { target_dir } => self.archive_file(file, target_dir, ctx.config),
            Action::Extract { target_dir } => self.extract_file(file, target_dir, ctx.config),
            Action::CreateFolder { path_pattern } => {
                self.create_folder(file, path_pattern, ctx.config)
            }
            Action::ColorLabel { color } => self.color_label(file, color, ctx),
            Action::AddTag { tag } | Action::MarkAsDuplicate { tag } => {
                self.add_tag(file, tag, ctx)
            }
            Action::RemoveTag { tag } => self.remove_tag(file, tag, ctx),
            Action::SetMetadata { field_path, value } => {
                self.set_metadata(file, field_path, value, ctx)
            }
        }
    }

    fn skip(&self, reason: impl std::fmt::Display) -> Result<ActionResult, Failure> {
        Ok(ActionResult::skipped(
            self.type_name(),
            format!("SKIP: {} ({})", self.label(), reason),
        ))
    }

    fn preview(&self, meta: ActionMeta, effect: impl std::fmt::Display) -> Result<ActionResult, Failure> {
        Ok(ActionResult::dry_run(
            meta,
            format!("DRY RUN: {} {}", self.label(), effect),
        ))
    }

    fn move_file(&self, file: &FileInfo, target_dir: &str, config: &Config) -> Result<ActionResult, Failure> {
        let src = source_path(file)?;
        let dest_dir = resolve_dir(target_dir, file)?;
        let dest = dest_dir.join(&file.name);

        if config.dry_run {
            let meta = ActionMeta {
                src: Some(src.to_path_buf()),
                dst: Some(dest.clone()),
                ..ActionMeta::new(self.type_name())
            };
            return self.preview(meta, format!("{} -> {}", file.name, dest.display()));
        }

        if file.parent().is_some_and(|parent| same_location(parent, &dest_dir)) {
            return self.skip(format!("already in {}", dest_dir.display()));
        }
        if !exists_no_follow(src) {
            if exists_no_follow(&dest) {
                return self.skip(format!("already moved to {}", dest.display()));
            }
            return Err("source not found".to_string());
        }

        fs::create_dir_all(&dest_dir)
            .map_err(|e| format!("could not create {}: {}", dest_dir.display(), e))?;
        let (final_dest, collision_handled) = unique_path(&dest);
        move_path(src, &final_dest).map_err(|e| e.to_string())?;

        let meta = ActionMeta {
            undo_type: Some(UndoType::Move),
            collision_handled,
            src: Some(src.to_path_buf()),
            dst: Some(final_dest.clone()),
            old_name: Some(file.name.clone()),
            new_name: final_dest.file_name().map(|n| n.to_string_lossy().to_string()),
            current_path: Some(final_dest.clone()),
            ..ActionMeta::new(self.type_name())
        };
        Ok(ActionResult::success(
            meta,
            format!(
                "{}: {} -> {}{}",
                self.label(),
                file.name,
                final_dest.display(),
                collision_note(collision_handled)
            ),
        ))
    }

    fn copy_file(&self, file: &FileInfo, target_dir: &str, config: &Config) -> Result<ActionResult, Failure> {
        let src = source_path(file)?;
        let dest_dir = resolve_dir(target_dir, file)?;
        let dest = dest_dir.join(&file.name);

        if config.dry_run {
            let meta = ActionMeta {
                src: Some(src.to_path_buf()),
                dst: Some(dest.clone()),
                ..ActionMeta::new(self.type_name())
            };
            return self.preview(meta, format!("{} -> {}", file.name, dest.display()));
        }

        if same_location(src, &dest) {
            return self.skip("destination is the source");
        }
        if !exists_no_follow(src) {
            return Err("source not found".to_string());
        }
        if let Some(existing) = find_identical(src, &dest) {
            return self.skip(format!("identical copy already at {}", existing.display()));
        }

        fs::create_dir_all(&dest_dir)
            .map_err(|e| format!("could not create {}: {}", dest_dir.display(), e))?;
        let (final_dest, collision_handled) = unique_path(&dest);
        copy_path(src, &final_dest).map_err(|e| e.to_string())?;

        let meta = ActionMeta {
            undo_type: Some(UndoType::Copy),
            collision_handled,
            src: Some(src.to_path_buf()),
            dst: Some(final_dest.clone()),
            old_name: Some(file.name.clone()),
            new_name: final_dest.file_name().map(|n| n.to_string_lossy().to_string()),
            ..ActionMeta::new(self.type_name())
        };
        Ok(ActionResult::success(
            meta,
            format!(
                "{}: {} -> {}{}",
                self.label(),
                file.name,
                final_dest.display(),
                collision_note(collision_handled)
            ),
        ))
    }

    fn rename_file(&self, file: &FileInfo, new_name: &str, config: &Config) -> Result<ActionResult, Failure> {
        let src = source_path(file)?;
        validate_file_name(new_name)?;
        let parent = file.parent().ok_or("file has no parent folder")?;
        let dest = parent.join(new_name);

        if config.dry_run {
            let meta = ActionMeta {
                src: Some(src.to_path_buf()),
                dst: Some(dest.clone()),
                old_name: Some(file.name.clone()),
                new_name: Some(new_name.to_string()),
                ..ActionMeta::new(self.type_name())
            };
            return self.preview(meta, format!("{} -> {}", file.name, new_name));
        }

        if file.name == new_name {
            return self.skip("name unchanged");
        }
        if !exists_no_follow(src) {
            if exists_no_follow(&dest) {
                return self.skip(format!("already renamed to {}", new_name));
            }
            return Err("source not found".to_string());
        }

        // A case-only rename on a case-insensitive filesystem sees itself.
        let (final_dest, collision_handled) = if same_location(src, &dest) {
            (dest, false)
        } else {
            unique_path(&dest)
        };
        fs::rename(src, &final_dest).map_err(|e| e.to_string())?;

        let final_name = final_dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| new_name.to_string());
        let meta = ActionMeta {
            undo_type: Some(UndoType::Rename),
            collision_handled,
            src: Some(src.to_path_buf()),
            dst: Some(final_dest.clone()),
            old_name: Some(file.name.clone()),
            new_name: Some(final_name.clone()),
            current_path: Some(final_dest),
            ..ActionMeta::new(self.type_name())
        };
        Ok(ActionResult::success(
            meta,
            format!(
                "{}: {} -> {}{}",
                self.label(),
                file.name,
                final_name,
                collision_note(collision_handled)
            ),
        ))
    }

    fn delete_file(&self, file: &FileInfo, config: &Config, to_trash: bool) -> Result<ActionResult, Failure> {
        let src = source_path(file)?;

        if config.safe_mode && safety::is_protected_path(src, &config.protected_patterns()) {
            return Err(format!(
                "{} is protected; refusing to delete in safe mode",
                src.display()
            ));
        }

        if config.dry_run {
            let meta = ActionMeta {
                src: Some(src.to_path_buf()),
                ..ActionMeta::new(self.type_name())
            };
            return self.preview(meta, src.display());
        }

        if !exists_no_follow(src) {
            return self.skip("already gone");
        }

        let backup = backup_path(&config.backup_root(), &file.name)?;
        if to_trash {
            copy_path(src, &backup).map_err(|e| format!("could not back up: {}", e))?;
            if let Err(e) = trash::delete(src) {
                let _ = remove_path(&backup);
                return Err(format!("could not move to trash: {}", e));
            }
        } else {
            move_path(src, &backup).map_err(|e| e.to_string())?;
        }

        let meta = ActionMeta {
            undo_type: Some(UndoType::Delete),
            src: Some(src.to_path_buf()),
            old_name: Some(file.name.clone()),
            temp_backup: Some(backup.clone()),
            ..ActionMeta::new(self.type_name())
        };
        Ok(ActionResult::success(
            meta,
            format!(
                "{}: {} (backup at {})",
                self.label(),
                src.display(),
                backup.display()
            ),
        ))
    }

    fn run_command(&self, file: &FileInfo, template: &str, config: &Config) -> Result<ActionResult, Failure> {
        let command = TokenExpander::expand(template.trim(), file);
        safety::validate_command(&command).map_err(|reason| format!("command blocked, {}", reason))?;

        if config.dry_run || config.safe_mode {
            let why = if config.dry_run { "" } else { " (safe mode)" };
            return self.preview(ActionMeta::new(self.type_name()), format!("`{}`{}", command, why));
        }

        let working_dir = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let expression = if cfg!(windows) {
            duct::cmd("cmd", ["/C", command.as_str()])
        } else {
            duct::cmd("sh", ["-c", command.as_str()])
        };
        let output = expression
            .dir(&working_dir)
            .stderr_to_stdout()
            .stdout_capture()
            .unchecked()
            .run()
            .map_err(|e| format!("could not start `{}`: {}", command, e))?;

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(format!("`{}` exited with {}: {}", command, code, text));
        }

        Ok(ActionResult::success(
            ActionMeta::new(self.type_name()),
            if text.is_empty() {
                format!("{}: `{}`", self.label(), command)
            } else {
                format!("{}: `{}` -> {}", self.label(), command, text)
            },
        ))
    }

    fn archive_file(&self, file: &FileInfo, target_dir: &str, config: &Config) -> Result<ActionResult, Failure> {
        let src = source_path(file)?;
        let dest_dir = resolve_dir_or_parent(target_dir, file)?;
        let dest = dest_dir.join(format!("{}.tar.gz", file.name));

        if config.dry_run {
            let meta = ActionMeta {
                src: Some(src.to_path_buf()),
                dst: Some(dest.clone()),
                ..ActionMeta::new(self.type_name())
            };
            return self.preview(meta, format!("{} -> {}", file.name, dest.display()));
        }

        if !exists_no_follow(src) {
            return Err("source not found".to_string());
        }

        fs::create_dir_all(&dest_dir)
            .map_err(|e| format!("could not create {}: {}", dest_dir.display(), e))?;
        let (final_dest, collision_handled) = unique_path(&dest);
        archive::create_tar_gz(src, &final_dest).map_err(|e| e.to_string())?;

        // An archive of unchanged content is byte-identical to an earlier one.
        if collision_handled
            && let Some(existing) = find_identical(&final_dest, &dest).filter(|p| *p != final_dest)
        {
            remove_path(&final_dest).map_err(|e| e.to_string())?;
            return self.skip(format!("identical archive already at {}", existing.display()));
        }

        let meta = ActionMeta {
            undo_type: Some(UndoType::Copy),
            collision_handled,
            src: Some(src.to_path_buf()),
            dst: Some(final_dest.clone()),
            ..ActionMeta::new(self.type_name())
        };
        Ok(ActionResult::success(
            meta,
            format!(
                "{}: {} -> {}{}",
                self.label(),
                file.name,
                final_dest.display(),
                collision_note(collision_handled)
            ),
        ))
    }

    fn extract_file(&self, file: &FileInfo, target_dir: &str, config: &Config) -> Result<ActionResult, Failure> {
        let src = source_path(file)?;
        let format = ArchiveFormat::detect(&file.name)
            .ok_or_else(|| format!("unsupported archive format ({})", file.ext))?;
        let dest_dir = resolve_dir_or_parent(target_dir, file)?;
        let dest = dest_dir.join(archive::archive_stem(&file.name));

        if config.dry_run {
            let meta = ActionMeta {
                src: Some(src.to_path_buf()),
                dst: Some(dest.clone()),
                ..ActionMeta::new(self.type_name())
            };
            return self.preview(meta, format!("{} -> {}", file.name, dest.display()));
        }

        if exists_no_follow(&dest) {
            return self.skip(format!("{} already exists", dest.display()));
        }
        if !src.is_file() {
            return Err("source not found".to_string());
        }

        archive::extract(src, format, &dest).map_err(|e| e.to_string())?;

        let meta = ActionMeta {
            undo_type: Some(UndoType::Copy),
            src: Some(src.to_path_buf()),
            dst: Some(dest.clone()),
            ..ActionMeta::new(self.type_name())
        };
        Ok(ActionResult::success(
            meta,
            format!("{}: {} -> {}", self.label(), file.name, dest.display()),
        ))
    }

    fn create_folder(&self, file: &FileInfo, path_pattern: &str, config: &Config) -> Result<ActionResult, Failure> {
        let folder = resolve_dir(path_pattern, file)?;

        if config.dry_run {
            let meta = ActionMeta {
                dst: Some(folder.clone()),
                ..ActionMeta::new(self.type_name())
            };
            return self.preview(meta, folder.display());
        }

        if folder.is_dir() {
            return self.skip(format!("{} already exists", folder.display()));
        }
        if exists_no_follow(&folder) {
            return Err(format!("{} exists and is not a folder", folder.display()));
        }

        fs::create_dir_all(&folder).map_err(|e| e.to_string())?;
        let meta = ActionMeta {
            dst: Some(folder.clone()),
            ..ActionMeta::new(self.type_name())
        };
        Ok(ActionResult::success(
            meta,
            format!("{}: {}", self.label(), folder.display()),
        ))
    }

    fn color_label(&self, file: &FileInfo, color: &str, ctx: &ActionContext<'_>) -> Result<ActionResult, Failure> {
        let path = source_path(file)?;
        let color = color.trim();

        if ctx.config.dry_run {
            return self.preview(ActionMeta::new(self.type_name()), format!("{} -> {}", file.name, color));
        }

        let current = ctx.metadata.color(path);
        let unchanged = match &current {
            Some(existing) => existing.eq_ignore_ascii_case(color),
            None => color.is_empty(),
        };
        if unchanged {
            return self.skip(format!("color already {}", display_or_none(color)));
        }

        ctx.metadata
            .set_color(path, if color.is_empty() { None } else { Some(color) });
        Ok(ActionResult::success(
            ActionMeta::new(self.type_name()),
            format!("{}: {} -> {}", self.label(), file.name, display_or_none(color)),
        ))
    }

    fn add_tag(&self, file: &FileInfo, tag: &str, ctx: &ActionContext<'_>) -> Result<ActionResult, Failure> {
        let path = source_path(file)?;
        let tag = tag.trim();
        if tag.is_empty() {
            return Err("tag is empty".to_string());
        }

        if ctx.config.dry_run {
            return self.preview(ActionMeta::new(self.type_name()), format!("{} +{}", file.name, tag));
        }
        if !ctx.metadata.add_tag(path, tag) {
            return self.skip(format!("already tagged '{}'", tag));
        }

        Ok(ActionResult::success(
            ActionMeta::new(self.type_name()),
            format!("{}: {} +{}", self.label(), file.name, tag),
        ))
    }

    fn remove_tag(&self, file: &FileInfo, tag: &str, ctx: &ActionContext<'_>) -> Result<ActionResult, Failure> {
        let path = source_path(file)?;
        let tag = tag.trim();
        if tag.is_empty() {
            return Err("tag is empty".to_string());
        }

        if ctx.config.dry_run {
            return self.preview(ActionMeta::new(self.type_name()), format!("{} -{}", file.name, tag));
        }
        if !ctx.metadata.remove_tag(path, tag) {
            return self.skip(format!("not tagged '{}'", tag));
        }

        Ok(ActionResult::success(
            ActionMeta::new(self.type_name()),
            format!("{}: {} -{}", self.label(), file.name, tag),
        ))
    }

    fn set_metadata(
        &self,
        file: &FileInfo,
        field_path: &str,
        value: &Value,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionResult, Failure> {
        let path = source_path(file)?;
        let field_path = field_path.trim();
        if field_path.is_empty() {
            return Err("field path is empty".to_string());
        }

        if ctx.config.dry_run {
            return self.preview(
                ActionMeta::new(self.type_name()),
                format!("{} {} = {}", file.name, field_path, value),
            );
        }
        if ctx.metadata.metadata_value(path, field_path).as_ref() == Some(value) {
            return self.skip(format!("{} already {}", field_path, value));
        }
        if !ctx.metadata.set_metadata_value(path, field_path, value.clone()) {
            return Err(format!("cannot write '{}': a parent field is not an object", field_path));
        }

        Ok(ActionResult::success(
            ActionMeta::new(self.type_name()),
            format!("{}: {} {} = {}", self.label(), file.name, field_path, value),
        ))
    }
}

fn source_path(file: &FileInfo) -> Result<&Path, Failure> {
    file.path
        .as_deref()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| "file has no path".to_string())
}

/// Expands tokens and `~`; relative results are taken from the file's folder.
fn resolve_dir(raw: &str, file: &FileInfo) -> Result<PathBuf, Failure> {
    let expanded = TokenExpander::expand(raw.trim(), file);
    if expanded.is_empty() {
        return Err("no target folder given".to_string());
    }

    let path = expand_home(&expanded);
    if path.is_absolute() {
        return Ok(path);
    }
    file.parent()
        .map(|parent| parent.join(&path))
        .ok_or_else(|| format!("cannot resolve relative folder '{}'", expanded))
}

fn resolve_dir_or_parent(raw: &str, file: &FileInfo) -> Result<PathBuf, Failure> {
    if raw.trim().is_empty() {
        return file
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| "file has no parent folder".to_string());
    }
    resolve_dir(raw, file)
}

fn validate_file_name(name: &str) -> Result<(), Failure> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(format!("invalid file name '{}'", name));
    }
    if name.contains(['/', '\\']) {
        return Err(format!("file name '{}' contains a path separator", name));
    }
    Ok(())
}

/// Expands a rename pattern, keeping the original extension when the pattern
/// does not place one.
fn token_rename_target(pattern: &str, file: &FileInfo) -> String {
    let expanded = TokenExpander::expand(pattern.trim(), file);
    let places_extension =
        TokenExpander::mentions(pattern, "extension") || TokenExpander::mentions(pattern, "ext");

    if !places_extension
        && !file.ext.is_empty()
        && Path::new(&expanded).extension().is_none()
    {
        format!("{}{}", expanded, file.ext)
    } else {
        expanded
    }
}

/// Unique `<backup_root>/<timestamp>_<name>` slot for a deleted entry.
fn backup_path(backup_root: &Path, name: &str) -> Result<PathBuf, Failure> {
    fs::create_dir_all(backup_root)
        .map_err(|e| format!("could not create backup folder {}: {}", backup_root.display(), e))?;
    let stamp = Local::now().format("%Y%m%d-%H%M%S%.f");
    let (path, _) = unique_path(&backup_root.join(format!("{}_{}", stamp, name)));
    Ok(path)
}

fn collision_note(collision_handled: bool) -> &'static str {
    if collision_handled {
        " (renamed to avoid collision)"
    } else {
        ""
    }
}

fn display_or_none(value: &str) -> &str {
    if value.is_empty() { "none" } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Harness {
        temp_dir: TempDir,
        config: Config,
        metadata: MetadataStore,
    }

    impl Harness {
        fn new() -> Self {
            let temp_dir = TempDir::new().expect("Failed to create temp directory");
            let config = Config {
                backup_dir: Some(temp_dir.path().join(".backups")),
                ..Config::default()
            };
            Self {
                temp_dir,
                config,
                metadata: MetadataStore::new(),
            }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.temp_dir.path().join(rel)
        }

        fn file(&self, rel: &str, content: &str) -> FileInfo {
            let path = self.path(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("Failed to create parent");
            }
            fs::write(&path, content).expect("Failed to write file");
            FileInfo::from_path(&path).expect("Failed to stat file")
        }

        fn run(&self, action: &Action, file: &FileInfo) -> ActionResult {
            action.run(file, &ActionContext::new(&self.config, &self.metadata))
        }
    }

    #[test]
    fn test_move_and_repeat_is_skipped() {
        let h = Harness::new();
        let file = h.file("inbox/shot.png", "png");
        let action = Action::Move {
            target_dir: h.path("pictures").display().to_string(),
        };

        let first = h.run(&action, &file);
        assert!(first.ok, "{}", first.log);
        assert_eq!(first.meta.undo_type, Some(UndoType::Move));
        assert_eq!(first.meta.current_path, Some(h.path("pictures/shot.png")));
        assert!(h.path("pictures/shot.png").exists());
        assert!(!h.path("inbox/shot.png").exists());

        let second = h.run(&action, &file);
        assert!(second.ok);
        assert!(second.meta.skipped);
        assert!(second.log.starts_with("SKIP: MOVE"));
    }

    #[test]
    fn test_move_into_same_folder_is_skipped() {
        let h = Harness::new();
        let file = h.file("inbox/a.txt", "a");
        let action = Action::Move {
            target_dir: h.path("inbox").display().to_string(),
        };

        let result = h.run(&action, &file);
        assert!(result.meta.skipped);
        assert!(h.path("inbox/a.txt").exists());
    }

    #[test]
    fn test_move_collision_naming() {
        let h = Harness::new();
        h.file("docs/document.txt", "existing");
        let target = h.path("docs").display().to_string();

        let second = h.file("in1/document.txt", "second");
        let result = h.run(&Action::Move { target_dir: target.clone() }, &second);
        assert!(result.meta.collision_handled);
        assert_eq!(result.meta.dst, Some(h.path("docs/document (1).txt")));

        let third = h.file("in2/document.txt", "third");
        let result = h.run(&Action::Move { target_dir: target }, &third);
        assert_eq!(result.meta.dst, Some(h.path("docs/document (2).txt")));
        assert!(result.log.contains("collision"));
    }

    #[test]
    fn test_move_dry_run_touches_nothing() {
        let mut h = Harness::new();
        h.config.dry_run = true;
        let file = h.file("inbox/a.txt", "a");

        let result = h.run(
            &Action::Move {
                target_dir: h.path("out").display().to_string(),
            },
            &file,
        );
        assert!(result.ok);
        assert!(result.meta.was_dry_run);
        assert!(result.log.starts_with("DRY RUN"));
        assert!(h.path("inbox/a.txt").exists());
        assert!(!h.path("out").exists());
    }

    #[test]
    fn test_move_with_date_tokens() {
        let h = Harness::new();
        let file = h.file("inbox/a.txt", "a");
        let year = file
            .modified()
            .expect("Modification time should be available")
            .format("%Y")
            .to_string();

        let result = h.run(
            &Action::Move {
                target_dir: format!("{}/<year>", h.path("archive").display()),
            },
            &file,
        );
        assert!(result.ok, "{}", result.log);
        assert!(h.path("archive").join(year).join("a.txt").exists());
    }

    #[test]
    fn test_missing_source_is_error() {
        let h = Harness::new();
        let file = FileInfo::unresolved(h.path("ghost.txt"));
        let result = h.run(
            &Action::Copy {
                target_dir: h.path("out").display().to_string(),
            },
            &file,
        );
        assert!(!result.ok);
        assert!(result.log.starts_with("ERROR"));
        assert_eq!(result.meta, ActionMeta::new("Copy"));
    }

    #[test]
    fn test_copy_and_identical_copy_is_skipped() {
        let h = Harness::new();
        let file = h.file("inbox/a.txt", "same");
        let action = Action::Copy {
            target_dir: h.path("backup").display().to_string(),
        };

        let first = h.run(&action, &file);
        assert!(first.ok, "{}", first.log);
        assert_eq!(first.meta.undo_type, Some(UndoType::Copy));
        assert!(first.meta.current_path.is_none());
        assert!(h.path("inbox/a.txt").exists());
        assert!(h.path("backup/a.txt").exists());

        let second = h.run(&action, &file);
        assert!(second.meta.skipped);

        let onto_itself = h.run(
            &Action::Copy {
                target_dir: h.path("inbox").display().to_string(),
            },
            &file,
        );
        assert!(onto_itself.meta.skipped);
    }

    #[test]
    fn test_copy_next_to_different_file_is_not_repeated() {
        let h = Harness::new();
        fs::create_dir_all(h.path("out")).expect("Failed to create dir");
        fs::write(h.path("out/a.txt"), "other").expect("Failed to write file");
        let file = h.file("in/a.txt", "mine");
        let action = Action::Copy {
            target_dir: h.path("out").display().to_string(),
        };

        let first = h.run(&action, &file);
        assert!(first.ok, "{}", first.log);
        assert!(first.meta.collision_handled);
        assert_eq!(first.meta.dst, Some(h.path("out/a (1).txt")));

        let second = h.run(&action, &file);
        assert!(second.meta.skipped, "{}", second.log);
        assert!(second.log.contains("a (1).txt"));
        assert!(!h.path("out/a (2).txt").exists());
        assert_eq!(
            fs::read_to_string(h.path("out/a.txt")).expect("Failed to read file"),
            "other"
        );
    }

    #[test]
    fn test_rename_and_repeat() {
        let h = Harness::new();
        let file = h.file("inbox/old.txt", "x");
        let action = Action::Rename {
            new_name: "new.txt".into(),
        };

        let first = h.run(&action, &file);
        assert!(first.ok, "{}", first.log);
        assert_eq!(first.meta.old_name.as_deref(), Some("old.txt"));
        assert_eq!(first.meta.new_name.as_deref(), Some("new.txt"));
        assert!(h.path("inbox/new.txt").exists());

        let second = h.run(&action, &file);
        assert!(second.meta.skipped);

        let same = h.run(&action, &FileInfo::relocated(&h.path("inbox/new.txt")));
        assert!(same.meta.skipped);
    }

    #[test]
    fn test_rename_rejects_separators() {
        let h = Harness::new();
        let file = h.file("inbox/a.txt", "x");
        let result = h.run(
            &Action::Rename {
                new_name: "../escape.txt".into(),
            },
            &file,
        );
        assert!(!result.ok);
        assert!(h.path("inbox/a.txt").exists());
    }

    #[test]
    fn test_token_rename_keeps_extension() {
        let h = Harness::new();
        let file = h.file("inbox/scan.PDF", "x");
        let result = h.run(
            &Action::TokenRename {
                pattern: "<name>_signed".into(),
            },
            &file,
        );
        assert!(result.ok, "{}", result.log);
        assert_eq!(result.meta.new_name.as_deref(), Some("scan_signed.pdf"));
        assert_eq!(result.meta.undo_type, Some(UndoType::Rename));
    }

    #[test]
    fn test_delete_keeps_backup() {
        let h = Harness::new();
        let file = h.file("inbox/old.log", "log lines");

        let result = h.run(&Action::Delete {}, &file);
        assert!(result.ok, "{}", result.log);
        assert!(!h.path("inbox/old.log").exists());
        let backup = result.meta.temp_backup.expect("Delete should keep a backup");
        assert_eq!(
            fs::read_to_string(backup).expect("Failed to read backup"),
            "log lines"
        );

        let again = h.run(&Action::Delete {}, &file);
        assert!(again.meta.skipped);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_delete_protected_path_in_safe_mode() {
        let h = Harness::new();
        let file = FileInfo::unresolved("/etc/hosts");
        let result = h.run(&Action::Delete {}, &file);
        assert!(!result.ok);
        assert!(result.log.contains("protected"));
    }

    #[test]
    fn test_delete_respects_extra_protected_patterns() {
        let mut h = Harness::new();
        h.config.protected_paths = vec![format!("{}/keep/**", h.temp_dir.path().display())];
        let file = h.file("keep/precious.txt", "x");

        let result = h.run(&Action::Delete {}, &file);
        assert!(!result.ok);
        assert!(result.log.contains("protected"));
        assert!(h.path("keep/precious.txt").exists());
    }

    #[test]
    fn test_run_command_suppressed_in_safe_mode() {
        let h = Harness::new();
        let file = h.file("inbox/a.txt", "x");
        let marker = h.path("ran.txt");

        let result = h.run(
            &Action::RunCommand {
                template: format!("touch {}", marker.display()),
            },
            &file,
        );
        assert!(result.ok);
        assert!(result.meta.was_dry_run);
        assert!(result.log.contains("safe mode"));
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_executes_without_safe_mode() {
        let mut h = Harness::new();
        h.config.safe_mode = false;
        let file = h.file("inbox/a.txt", "x");

        let result = h.run(
            &Action::RunCommand {
                template: "echo <name>".into(),
            },
            &file,
        );
        assert!(result.ok, "{}", result.log);
        assert!(result.log.ends_with("-> a"));

        let failing = h.run(
            &Action::RunCommand {
                template: "exit 3".into(),
            },
            &file,
        );
        assert!(!failing.ok);
        assert!(failing.log.contains("exited with 3"));
    }

    #[test]
    fn test_run_command_blocks_dangerous_patterns() {
        let mut h = Harness::new();
        h.config.safe_mode = false;
        let file = h.file("inbox/a.txt", "x");
        let result = h.run(
            &Action::RunCommand {
                template: "rm -rf /".into(),
            },
            &file,
        );
        assert!(!result.ok);
        assert!(result.log.contains("blocked"));
    }

    #[test]
    fn test_archive_and_extract() {
        let h = Harness::new();
        let file = h.file("inbox/notes.txt", "remember");

        let archived = h.run(
            &Action::Archive {
                target_dir: String::new(),
            },
            &file,
        );
        assert!(archived.ok, "{}", archived.log);
        let tarball = h.path("inbox/notes.txt.tar.gz");
        assert_eq!(archived.meta.dst, Some(tarball.clone()));
        assert!(h.run(&Action::Archive { target_dir: String::new() }, &file).meta.skipped);

        let archive_info = FileInfo::from_path(&tarball).expect("Failed to stat archive");
        let extracted = h.run(
            &Action::Extract {
                target_dir: h.path("unpacked").display().to_string(),
            },
            &archive_info,
        );
        assert!(extracted.ok, "{}", extracted.log);
        assert_eq!(
            fs::read_to_string(h.path("unpacked/notes.txt/notes.txt"))
                .expect("Failed to read extracted file"),
            "remember"
        );
    }

    #[test]
    fn test_archive_next_to_different_file() {
        let h = Harness::new();
        let file = h.file("inbox/notes.txt", "remember");
        fs::write(h.path("inbox/notes.txt.tar.gz"), "not an archive").expect("Failed to write file");
        let action = Action::Archive {
            target_dir: String::new(),
        };

        let archived = h.run(&action, &file);
        assert!(archived.ok, "{}", archived.log);
        assert!(!archived.meta.skipped);
        assert!(archived.meta.collision_handled);
        let written = archived.meta.dst.clone().expect("Archive destination missing");
        assert_ne!(written, h.path("inbox/notes.txt.tar.gz"));
        assert!(written.exists());
        assert_eq!(
            fs::read_to_string(h.path("inbox/notes.txt.tar.gz")).expect("Failed to read file"),
            "not an archive"
        );

        let again = h.run(&action, &file);
        assert!(again.meta.skipped, "{}", again.log);
        let entries = fs::read_dir(h.path("inbox")).expect("Failed to read dir").count();
        assert_eq!(entries, 3);
    }

    #[test]
    fn test_extract_unsupported_format() {
        let h = Harness::new();
        let file = h.file("inbox/bundle.zip", "PK");
        let result = h.run(
            &Action::Extract {
                target_dir: String::new(),
            },
            &file,
        );
        assert!(!result.ok);
        assert!(result.log.contains("unsupported archive format"));
    }

    #[test]
    fn test_create_folder() {
        let h = Harness::new();
        let file = h.file("inbox/a.txt", "x");
        let action = Action::CreateFolder {
            path_pattern: "sorted/<ext>".into(),
        };

        let first = h.run(&action, &file);
        assert!(first.ok, "{}", first.log);
        assert!(h.path("inbox/sorted/txt").is_dir());
        assert!(first.meta.undo_type.is_none());
        assert!(h.run(&action, &file).meta.skipped);
    }

    #[test]
    fn test_metadata_actions_are_idempotent() {
        let h = Harness::new();
        let file = FileInfo::unresolved(h.path("photo.jpg"));
        let path = h.path("photo.jpg");

        let color = Action::ColorLabel { color: "red".into() };
        assert!(h.run(&color, &file).is_real_change());
        assert!(h.run(&color, &file).meta.skipped);
        assert_eq!(h.metadata.color(&path).as_deref(), Some("red"));

        let tag = Action::AddTag { tag: "trip".into() };
        assert!(h.run(&tag, &file).is_real_change());
        assert!(h.run(&tag, &file).meta.skipped);

        let untag = Action::RemoveTag { tag: "TRIP".into() };
        assert!(h.run(&untag, &file).is_real_change());
        assert!(h.run(&untag, &file).meta.skipped);

        let dup = Action::MarkAsDuplicate {
            tag: default_duplicate_tag(),
        };
        assert!(h.run(&dup, &file).is_real_change());
        assert!(h.run(&dup, &file).meta.skipped);
        assert!(h.metadata.has_tag(&path, "duplicate"));

        let set = Action::SetMetadata {
            field_path: "review.status".into(),
            value: Value::String("done".into()),
        };
        assert!(h.run(&set, &file).is_real_change());
        assert!(h.run(&set, &file).meta.skipped);
        assert_eq!(
            h.metadata.metadata_value(&path, "review.status"),
            Some(Value::String("done".into()))
        );
    }

    #[test]
    fn test_metadata_actions_dry_run() {
        let mut h = Harness::new();
        h.config.dry_run = true;
        let file = FileInfo::unresolved(h.path("photo.jpg"));

        let result = h.run(&Action::AddTag { tag: "x".into() }, &file);
        assert!(result.meta.was_dry_run);
        assert!(h.metadata.is_empty());
    }

    #[test]
    fn test_mark_as_duplicate_default_tag() {
        let action: Action = serde_json::from_value(serde_json::json!({
            "type": "MarkAsDuplicate",
            "args": {}
        }))
        .expect("Deserialize failed");
        assert_eq!(
            action,
            Action::MarkAsDuplicate {
                tag: "duplicate".into()
            }
        );
    }
}
