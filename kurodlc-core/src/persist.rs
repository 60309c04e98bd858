use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::propagate::{ChangeRecord, Reassignment};
use crate::Result;

/// Marks a file name as a backup; such files are never read as input.
pub const BACKUP_MARKER: &str = ".bak_";

const RULE: &str = "------------------------------------------------------------";

pub struct ApplyOptions<'a> {
    /// Suffix shared by the backup and verbose log of one run.
    pub timestamp: &'a str,
    /// Cumulative log every change is appended to.
    pub summary_log: &'a Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedRepair {
    pub path: PathBuf,
    pub backup: PathBuf,
    pub verbose_log: PathBuf,
    pub changes: Vec<ChangeRecord>,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn backup_path(path: &Path, timestamp: &str) -> PathBuf {
    with_suffix(path, &format!("{BACKUP_MARKER}{timestamp}.json"))
}

pub fn verbose_log_path(path: &Path, timestamp: &str) -> PathBuf {
    with_suffix(path, &format!(".repair_verbose_{timestamp}.txt"))
}

/// Copies the current bytes of `path` to a new timestamped backup.
///
/// An existing backup is never overwritten; a numeric suffix is added to the
/// timestamp instead. Returns the backup path and the stamp it ended up with.
pub fn create_backup(path: &Path, timestamp: &str) -> Result<(PathBuf, String)> {
    let bytes = fs::read(path)?;
    let mut attempt = 1;
    loop {
        let stamp = if attempt == 1 {
            timestamp.to_string()
        } else {
            format!("{timestamp}_{attempt}")
        };
        let candidate = backup_path(path, &stamp);
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut file) => {
                file.write_all(&bytes)?;
                file.sync_all()?;
                return Ok((candidate, stamp));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Replaces the contents of `path` via a sibling temporary file and a rename.
pub fn write_replacing(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = with_suffix(path, ".tmp");
    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

pub fn format_change(change: &ChangeRecord) -> String {
    format!(
        "{:<13}: {:>5} -> {:>5}, {:<8}: {}",
        change.section.name(),
        change.old_id,
        change.new_id,
        change.context_field,
        change.context
    )
}

/// Header, then one block per old ID listing each rewritten field.
pub fn render_verbose_log(
    path: &Path,
    backup: &Path,
    log_path: &Path,
    changes: &[ChangeRecord],
) -> String {
    let mut out = String::new();
    out.push_str(&format!("File       : {}\n", file_label(path)));
    out.push_str(&format!("Backup     : {}\n", file_label(backup)));
    out.push_str(&format!("Verbose log: {}\n\n", file_label(log_path)));
    out.push_str(RULE);
    out.push('\n');

    let mut by_old_id: BTreeMap<u32, Vec<&ChangeRecord>> = BTreeMap::new();
    for change in changes {
        by_old_id.entry(change.old_id).or_default().push(change);
    }
    for block in by_old_id.values() {
        for change in block {
            out.push_str(&format_change(change));
            out.push('\n');
        }
        out.push_str(RULE);
        out.push('\n');
    }
    out
}

pub fn append_summary(
    summary_log: &Path,
    timestamp: &str,
    path: &Path,
    changes: &[ChangeRecord],
) -> Result<()> {
    if let Some(parent) = summary_log.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(summary_log)?;
    let label = file_label(path);
    for change in changes {
        writeln!(
            file,
            "{timestamp} {label}: {} {} -> {} ({}: {})",
            change.section.name(),
            change.old_id,
            change.new_id,
            change.context_field,
            change.context
        )?;
    }
    Ok(())
}

/// Writes a planned reassignment to disk.
///
/// Order matters: the backup is complete before the original is replaced, so
/// an interrupted run can lose at most the log files.
pub fn apply_reassignment(
    reassignment: &Reassignment,
    options: &ApplyOptions<'_>,
) -> Result<AppliedRepair> {
    let path = reassignment.document.path().to_path_buf();
    let bytes = reassignment.document.to_json_bytes()?;

    let (backup, stamp) = create_backup(&path, options.timestamp)?;
    log::info!("backed up {} to {}", path.display(), backup.display());

    write_replacing(&path, &bytes)?;
    log::info!(
        "wrote {} change(s) to {}",
        reassignment.changes.len(),
        path.display()
    );

    // Same stamp as the backup; never overwrites an earlier log.
    let verbose_log = verbose_log_path(&path, &stamp);
    let mut log_file = OpenOptions::new().write(true).create_new(true).open(&verbose_log)?;
    let rendered = render_verbose_log(&path, &backup, &verbose_log, &reassignment.changes);
    log_file.write_all(rendered.as_bytes())?;
    append_summary(options.summary_log, options.timestamp, &path, &reassignment.changes)?;

    Ok(AppliedRepair {
        path,
        backup,
        verbose_log,
        changes: reassignment.changes.clone(),
    })
}
