use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::persist::BACKUP_MARKER;
use crate::Result;

pub const DLC_SUFFIX: &str = ".kurodlc.json";

/// Regular files directly inside `dir` whose lowercased name passes `keep`, sorted by name.
pub(crate) fn files_in(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| match e.into_io_error() {
            Some(io) => io.into(),
            None => crate::ResolverError::Config(format!("cannot list {}", dir.display())),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if keep(&name) {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

pub fn is_backup_name(name: &str) -> bool {
    name.to_lowercase().contains(BACKUP_MARKER)
}

/// `*.kurodlc.json` files in `dir`, excluding backups written by earlier repairs.
pub fn find_dlc_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let files = files_in(dir, |name| name.ends_with(DLC_SUFFIX) && !is_backup_name(name))?;
    log::info!("found {} DLC file(s) in {}", files.len(), dir.display());
    Ok(files)
}
