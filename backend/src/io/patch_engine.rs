//! Search/replace file edits with backup and undo.
//!
//! Every in-place edit copies the target into the backup directory first.
//! Backup names encode the absolute original path, so [`FilePatchEngine::undo_last`]
//! can restore a file without any side table:
//!
//! ```text
//! /srv/app/config.py  ->  %2Fsrv%2Fapp%2Fconfig.py.20260101T120000-3.backup
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::core::matching::{MatchKind, replace_first};
use crate::core::types::{EditResult, FileEdit};
use crate::error::PatchError;
use crate::io::config::expand_home;

const BACKUP_SUFFIX: &str = ".backup";

/// Shared by every engine in the process so concurrent sessions never pick
/// the same backup name.
static BACKUP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

type WriteFn = fn(&Path, &str) -> io::Result<()>;

pub struct FilePatchEngine {
    backup_dir: PathBuf,
    undo_stack: Vec<PathBuf>,
    write: WriteFn,
}

impl FilePatchEngine {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            undo_stack: Vec::new(),
            write: write_file,
        }
    }

    #[cfg(test)]
    fn with_writer(mut self, write: WriteFn) -> Self {
        self.write = write;
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Number of edits that can still be undone.
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    /// Apply one edit. Failures are reported in the result; the target is
    /// left as it was.
    #[instrument(skip_all, fields(file = %edit.file_path))]
    pub fn apply(&mut self, edit: &FileEdit, working_dir: &Path) -> EditResult {
        let path = resolve_path(&edit.file_path, working_dir);
        match self.try_apply(edit, &path) {
            Ok(result) => result,
            Err(err) => {
                debug!(err = %err, "edit not applied");
                EditResult::failed(&path, failure_message(&err, &path))
            }
        }
    }

    /// Apply edits grouped by target file, files in order of first appearance.
    pub fn apply_all(&mut self, edits: &[FileEdit], working_dir: &Path) -> Vec<EditResult> {
        let mut groups: Vec<(PathBuf, Vec<&FileEdit>)> = Vec::new();
        for edit in edits {
            let path = resolve_path(&edit.file_path, working_dir);
            match groups.iter_mut().find(|(existing, _)| *existing == path) {
                Some((_, group)) => group.push(edit),
                None => groups.push((path, vec![edit])),
            }
        }
        groups
            .into_iter()
            .flat_map(|(_, group)| group)
            .map(|edit| self.apply(edit, working_dir))
            .collect()
    }

    /// [`Self::apply_all`] on the blocking pool.
    pub async fn apply_all_in_worker(
        &mut self,
        edits: Vec<FileEdit>,
        working_dir: PathBuf,
    ) -> Result<Vec<EditResult>, PatchError> {
        self.in_worker(move |engine| engine.apply_all(&edits, &working_dir)).await
    }

    /// [`Self::undo_last`] on the blocking pool.
    pub async fn undo_last_in_worker(&mut self) -> Result<EditResult, PatchError> {
        self.in_worker(FilePatchEngine::undo_last).await?
    }

    /// Move the engine onto a blocking thread for `op` and take it back.
    /// If the worker panics the undo stack is lost.
    async fn in_worker<T, F>(&mut self, op: F) -> Result<T, PatchError>
    where
        F: FnOnce(&mut FilePatchEngine) -> T + Send + 'static,
        T: Send + 'static,
    {
        let placeholder = FilePatchEngine {
            backup_dir: self.backup_dir.clone(),
            undo_stack: Vec::new(),
            write: self.write,
        };
        let mut engine = std::mem::replace(self, placeholder);
        let (engine, value) = tokio::task::spawn_blocking(move || {
            let value = op(&mut engine);
            (engine, value)
        })
        .await
        .map_err(|err| {
            warn!(err = %err, "patch worker failed, undo history dropped");
            PatchError::Worker(err.to_string())
        })?;
        *self = engine;
        Ok(value)
    }

    fn try_apply(&mut self, edit: &FileEdit, path: &Path) -> Result<EditResult, PatchError> {
        let name = display_name(path);
        let blank_old = edit.old_content.trim().is_empty();

        if !path.exists() {
            if !blank_old {
                return Err(PatchError::NotFound(path.to_path_buf()));
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|err| PatchError::io(parent, err))?;
            }
            fs::write(path, &edit.new_content).map_err(|err| PatchError::io(path, err))?;
            debug!(path = %path.display(), "file created");
            return Ok(EditResult {
                success: true,
                message: format!("Successfully created {name}"),
                file_path: path.to_path_buf(),
                backup_path: None,
                changes_applied: 1,
                created: true,
            });
        }

        let current = fs::read_to_string(path).map_err(|err| PatchError::io(path, err))?;
        let updated = if blank_old {
            edit.new_content.clone()
        } else {
            let replaced = replace_first(&current, &edit.old_content, &edit.new_content)
                .ok_or_else(|| PatchError::ContentMismatch(path.to_path_buf()))?;
            if replaced.occurrences > 1 {
                warn!(
                    occurrences = replaced.occurrences,
                    "old content occurs more than once, replacing the first"
                );
            }
            if replaced.kind == MatchKind::Normalized {
                debug!("matched after whitespace normalization");
            }
            replaced.content
        };

        let backup = self.backup(path)?;
        if let Err(err) = (self.write)(path, &updated) {
            let restored = fs::copy(&backup, path);
            self.undo_stack.pop();
            warn!(err = %err, restored = restored.is_ok(), "write failed, restored from backup");
            return Err(PatchError::io(path, err));
        }

        Ok(EditResult {
            success: true,
            message: format!("Successfully edited {name}"),
            file_path: path.to_path_buf(),
            backup_path: Some(backup),
            changes_applied: 1,
            created: false,
        })
    }

    fn backup(&mut self, path: &Path) -> Result<PathBuf, PatchError> {
        fs::create_dir_all(&self.backup_dir)
            .map_err(|err| PatchError::io(&self.backup_dir, err))?;
        let sequence = BACKUP_SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let backup = self
            .backup_dir
            .join(format!("{}.{stamp}-{sequence}{BACKUP_SUFFIX}", encode_path(path)));
        fs::copy(path, &backup).map_err(|err| PatchError::io(&backup, err))?;
        debug!(backup = %backup.display(), "backup written");
        self.undo_stack.push(backup.clone());
        Ok(backup)
    }

    /// Restore the file touched by the most recent edit.
    #[instrument(skip_all)]
    pub fn undo_last(&mut self) -> Result<EditResult, PatchError> {
        let backup = self.undo_stack.pop().ok_or(PatchError::NothingToUndo)?;
        if !backup.exists() {
            return Err(PatchError::BackupMissing(backup));
        }
        let original = backup
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(decode_backup_name)
            .ok_or_else(|| PatchError::UnrecognizedBackup(backup.clone()))?;
        fs::copy(&backup, &original).map_err(|err| PatchError::io(&original, err))?;
        debug!(path = %original.display(), "edit undone");
        Ok(EditResult {
            success: true,
            message: format!("Undid edit to {}", original.display()),
            file_path: original,
            backup_path: Some(backup),
            changes_applied: 1,
            created: false,
        })
    }
}

/// Resolve an edit path: `~` expands to home, relative paths join `working_dir`.
pub fn resolve_path(file_path: &str, working_dir: &Path) -> PathBuf {
    let expanded = expand_home(Path::new(file_path.trim()));
    if expanded.is_absolute() {
        expanded
    } else {
        working_dir.join(expanded)
    }
}

fn write_file(path: &Path, content: &str) -> io::Result<()> {
    fs::write(path, content)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn failure_message(err: &PatchError, path: &Path) -> String {
    match err {
        PatchError::NotFound(_) => format!("File not found: {}", path.display()),
        PatchError::ContentMismatch(_) => {
            "Old content not found in file. The file may have changed.".to_string()
        }
        other => format!("Failed to apply edit: {other}"),
    }
}

fn encode_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('%', "%25")
        .replace('/', "%2F")
}

fn decode_backup_name(name: &str) -> Option<PathBuf> {
    let stem = name.strip_suffix(BACKUP_SUFFIX)?;
    let (encoded, stamp) = stem.rsplit_once('.')?;
    if !stamp.contains('-') || !encoded.starts_with("%2F") {
        return None;
    }
    let mut decoded = String::with_capacity(encoded.len());
    let mut rest = encoded;
    while let Some(pos) = rest.find('%') {
        decoded.push_str(&rest[..pos]);
        let escape = rest.get(pos + 1..pos + 3)?;
        decoded.push(match escape {
            "2F" => '/',
            "25" => '%',
            _ => return None,
        });
        rest = &rest[pos + 3..];
    }
    decoded.push_str(rest);
    Some(PathBuf::from(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(path: &str, old: &str, new: &str) -> FileEdit {
        FileEdit {
            file_path: path.to_string(),
            old_content: old.to_string(),
            new_content: new.to_string(),
        }
    }

    fn backups(dir: &Path) -> usize {
        fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    #[test]
    fn replaces_single_occurrence_and_keeps_backup() {
        let work = tempfile::tempdir().expect("tempdir");
        let backup_dir = work.path().join("backups");
        fs::write(work.path().join("config.py"), "import os\nDEBUG = False\n").expect("write");

        let mut engine = FilePatchEngine::new(&backup_dir);
        let result = engine.apply(&edit("config.py", "DEBUG = False", "DEBUG = True"), work.path());

        assert!(result.success, "{}", result.message);
        assert_eq!(result.message, "Successfully edited config.py");
        assert_eq!(
            fs::read_to_string(work.path().join("config.py")).expect("read"),
            "import os\nDEBUG = True\n"
        );
        let backup = result.backup_path.expect("backup path");
        assert!(backup.exists());
        assert_eq!(fs::read_to_string(backup).expect("read"), "import os\nDEBUG = False\n");
    }

    #[test]
    fn mismatch_leaves_file_untouched_without_backup() {
        let work = tempfile::tempdir().expect("tempdir");
        let backup_dir = work.path().join("backups");
        let target = work.path().join("app.py");
        fs::write(&target, "print('hello')\n").expect("write");

        let mut engine = FilePatchEngine::new(&backup_dir);
        let first = engine.apply(&edit("app.py", "print('bye')", "pass"), work.path());
        let second = engine.apply(&edit("app.py", "print('bye')", "pass"), work.path());

        assert!(!first.success);
        assert_eq!(first, second);
        assert_eq!(first.message, "Old content not found in file. The file may have changed.");
        assert_eq!(fs::read_to_string(&target).expect("read"), "print('hello')\n");
        assert_eq!(backups(&backup_dir), 0);
        assert_eq!(engine.undo_depth(), 0);
    }

    #[test]
    fn missing_file_with_old_content_is_not_found() {
        let work = tempfile::tempdir().expect("tempdir");
        let mut engine = FilePatchEngine::new(work.path().join("backups"));
        let result = engine.apply(&edit("nope.txt", "a", "b"), work.path());
        assert!(!result.success);
        assert!(result.message.starts_with("File not found: "));
    }

    #[test]
    fn blank_old_creates_missing_file_with_parents() {
        let work = tempfile::tempdir().expect("tempdir");
        let backup_dir = work.path().join("backups");
        let mut engine = FilePatchEngine::new(&backup_dir);
        let result = engine.apply(&edit("scripts/run.sh", "", "#!/bin/sh\necho hi\n"), work.path());

        assert!(result.success);
        assert!(result.created);
        assert!(result.backup_path.is_none());
        assert_eq!(
            fs::read_to_string(work.path().join("scripts/run.sh")).expect("read"),
            "#!/bin/sh\necho hi\n"
        );
        assert_eq!(backups(&backup_dir), 0);
    }

    #[test]
    fn blank_old_on_existing_file_replaces_everything() {
        let work = tempfile::tempdir().expect("tempdir");
        let target = work.path().join("notes.txt");
        fs::write(&target, "old notes\n").expect("write");
        let mut engine = FilePatchEngine::new(work.path().join("backups"));
        let result = engine.apply(&edit("notes.txt", "", "fresh\n"), work.path());
        assert!(result.success);
        assert!(result.backup_path.is_some());
        assert_eq!(fs::read_to_string(&target).expect("read"), "fresh\n");
    }

    #[test]
    fn only_first_of_many_occurrences_is_replaced() {
        let work = tempfile::tempdir().expect("tempdir");
        let target = work.path().join("list.txt");
        fs::write(&target, "x = 1\nx = 1\n").expect("write");
        let mut engine = FilePatchEngine::new(work.path().join("backups"));
        assert!(engine.apply(&edit("list.txt", "x = 1", "x = 2"), work.path()).success);
        assert_eq!(fs::read_to_string(&target).expect("read"), "x = 2\nx = 1\n");
    }

    #[test]
    fn undo_restores_byte_identical_content() {
        let work = tempfile::tempdir().expect("tempdir");
        let target = work.path().join("weird 100%.cfg");
        let original = "key = value\t\n\ttabbed   line  \n";
        fs::write(&target, original).expect("write");

        let mut engine = FilePatchEngine::new(work.path().join("backups"));
        let applied =
            engine.apply(&edit("weird 100%.cfg", "key = value", "key = other"), work.path());
        assert!(applied.success);
        assert_ne!(fs::read_to_string(&target).expect("read"), original);

        let undone = engine.undo_last().expect("undo");
        assert_eq!(undone.file_path, target);
        assert_eq!(fs::read_to_string(&target).expect("read"), original);
        assert!(matches!(engine.undo_last(), Err(PatchError::NothingToUndo)));
    }

    #[test]
    fn undo_reports_externally_deleted_backup() {
        let work = tempfile::tempdir().expect("tempdir");
        fs::write(work.path().join("a.txt"), "one\n").expect("write");
        let mut engine = FilePatchEngine::new(work.path().join("backups"));
        let result = engine.apply(&edit("a.txt", "one", "two"), work.path());
        fs::remove_file(result.backup_path.expect("backup")).expect("remove");
        assert!(matches!(engine.undo_last(), Err(PatchError::BackupMissing(_))));
    }

    #[test]
    fn apply_all_groups_by_file_in_first_seen_order() {
        let work = tempfile::tempdir().expect("tempdir");
        fs::write(work.path().join("a.txt"), "a1\na2\n").expect("write");
        fs::write(work.path().join("b.txt"), "b1\n").expect("write");
        let mut engine = FilePatchEngine::new(work.path().join("backups"));
        let results = engine.apply_all(
            &[
                edit("a.txt", "a1", "A1"),
                edit("b.txt", "b1", "B1"),
                edit("a.txt", "a2", "A2"),
            ],
            work.path(),
        );
        let names: Vec<_> = results.iter().map(|r| display_name(&r.file_path)).collect();
        assert_eq!(names, vec!["a.txt", "a.txt", "b.txt"]);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(fs::read_to_string(work.path().join("a.txt")).expect("read"), "A1\nA2\n");
    }

    fn torn_write(path: &Path, _content: &str) -> io::Result<()> {
        fs::write(path, "half-writ")?;
        Err(io::Error::other("disk full"))
    }

    #[test]
    fn failed_write_restores_original_from_backup() {
        let work = tempfile::tempdir().expect("tempdir");
        let target = work.path().join("settings.ini");
        let original = "[main]\r\nmode = safe\n\ttrailing \n";
        fs::write(&target, original).expect("write");

        let mut engine = FilePatchEngine::new(work.path().join("backups")).with_writer(torn_write);
        let result = engine.apply(&edit("settings.ini", "mode = safe", "mode = fast"), work.path());

        assert!(!result.success);
        assert!(result.message.starts_with("Failed to apply edit: "), "{}", result.message);
        assert_eq!(fs::read(&target).expect("read"), original.as_bytes());
        assert_eq!(engine.undo_depth(), 0);
        assert!(matches!(engine.undo_last(), Err(PatchError::NothingToUndo)));
    }

    #[test]
    fn engines_sharing_a_backup_dir_never_reuse_a_backup_name() {
        let work = tempfile::tempdir().expect("tempdir");
        let backup_dir = work.path().join("backups");
        let target = work.path().join("shared.txt");
        fs::write(&target, "v1\n").expect("write");

        let mut first = FilePatchEngine::new(&backup_dir);
        let mut second = FilePatchEngine::new(&backup_dir);
        let a = first.apply(&edit("shared.txt", "v1", "v2"), work.path());
        let b = second.apply(&edit("shared.txt", "v2", "v3"), work.path());

        let (a, b) = (a.backup_path.expect("first backup"), b.backup_path.expect("second"));
        assert_ne!(a, b);
        assert_eq!(backups(&backup_dir), 2);
        assert_eq!(fs::read_to_string(&a).expect("read"), "v1\n");
        assert_eq!(fs::read_to_string(&b).expect("read"), "v2\n");

        first.undo_last().expect("undo");
        assert_eq!(fs::read_to_string(&target).expect("read"), "v1\n");
    }

    #[tokio::test]
    async fn worker_variants_keep_the_undo_stack() {
        let work = tempfile::tempdir().expect("tempdir");
        let target = work.path().join("app.toml");
        fs::write(&target, "port = 80\n").expect("write");
        let mut engine = FilePatchEngine::new(work.path().join("backups"));

        let results = engine
            .apply_all_in_worker(
                vec![edit("app.toml", "port = 80", "port = 8080")],
                work.path().to_path_buf(),
            )
            .await
            .expect("worker");
        assert!(results[0].success);
        assert_eq!(engine.undo_depth(), 1);

        let undone = engine.undo_last_in_worker().await.expect("undo");
        assert_eq!(undone.file_path, target);
        assert_eq!(fs::read_to_string(&target).expect("read"), "port = 80\n");
        assert!(matches!(engine.undo_last_in_worker().await, Err(PatchError::NothingToUndo)));
    }

    #[test]
    fn backup_names_round_trip() {
        let path = Path::new("/srv/my%app/conf.d/x.toml");
        let name = format!("{}.20260101T000000-7{BACKUP_SUFFIX}", encode_path(path));
        assert!(!name.contains('/'));
        assert_eq!(decode_backup_name(&name).as_deref(), Some(path));
        assert_eq!(decode_backup_name("notes.txt.20260101_000000.backup"), None);
    }

    #[test]
    fn relative_paths_resolve_against_working_dir() {
        assert_eq!(
            resolve_path("src/main.rs", Path::new("/work")),
            PathBuf::from("/work/src/main.rs")
        );
        assert_eq!(resolve_path("/etc/hosts", Path::new("/work")), PathBuf::from("/etc/hosts"));
    }
}
