//! Export and import of repair plans as hand-editable `id_mapping_*.json` files.
//!
//! An exported file records, per (DLC file, conflicting ID), the proposed
//! `new_id` together with how many ID fields held `old_id` at export time.
//! On import that count is checked against the current file; any difference
//! means the file was edited in between and the file is left alone.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::discovery::files_in;
use crate::document::DlcDocument;
use crate::repair::{FilePlan, PlannedChange, RepairPlan};
use crate::source::{AuthoritativeIds, SourceCandidate, SourceInfo};
use crate::{IdRange, ResolverError, Result};

pub const MAPPING_PREFIX: &str = "id_mapping_";
pub const MAPPING_SUFFIX: &str = ".json";

const INVALID_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    /// DLC file, relative to the working directory when possible.
    pub file: PathBuf,
    pub old_id: u32,
    /// The only field meant to be edited by hand.
    pub new_id: u32,
    #[serde(default)]
    pub conflict_name: String,
    pub occurrences: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingFile {
    #[serde(rename = "_comment", default)]
    pub comment: Vec<String>,
    #[serde(default)]
    pub generated: String,
    #[serde(default)]
    pub source: Option<SourceInfo>,
    #[serde(default)]
    pub range: Option<IdRange>,
    pub mappings: Vec<MappingEntry>,
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base).map(Path::to_path_buf).unwrap_or_else(|_| path.to_path_buf())
}

fn instructions(generated: &str, total: usize) -> Vec<String> {
    [
        "ID mapping file generated by kurodlc-resolve",
        "",
        "INSTRUCTIONS:",
        "1. Review each mapping below",
        "2. Edit 'new_id' values as needed (must be unique and not conflict with game items)",
        "3. Save this file",
        "4. Run: kurodlc-resolve repair --import",
        "",
        "IMPORTANT:",
        "- Do NOT change 'file', 'old_id' or 'occurrences' values",
        "- Do NOT modify the 'source' section",
        "- Do NOT edit the .kurodlc.json files between export and import",
        "- Every 'new_id' is validated before anything is written",
        "",
    ]
    .into_iter()
    .map(str::to_string)
    .chain([
        format!("Generated: {generated}"),
        format!("Total conflicts: {total}"),
    ])
    .collect()
}

impl MappingFile {
    pub fn from_plan(plan: &RepairPlan, working_dir: &Path, generated: &str) -> Self {
        let mappings: Vec<MappingEntry> = plan
            .files
            .iter()
            .flat_map(|file| {
                let rel = relative_to(&file.path, working_dir);
                file.entries.iter().map(move |e| MappingEntry {
                    file: rel.clone(),
                    old_id: e.old_id,
                    new_id: e.new_id,
                    conflict_name: e.conflict_label.clone(),
                    occurrences: e.occurrences,
                })
            })
            .collect();
        let source = SourceInfo {
            kind: plan.source.kind,
            path: relative_to(&plan.source.path, working_dir),
            extracted: plan
                .source
                .extracted
                .as_deref()
                .map(|p| relative_to(p, working_dir)),
        };
        Self {
            comment: instructions(generated, mappings.len()),
            generated: generated.to_string(),
            source: Some(source),
            range: Some(plan.range),
            mappings,
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let fail = |reason: String| ResolverError::Mapping {
            path: path.to_path_buf(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| fail(format!("cannot read: {e}")))?;
        let mapping: Self = serde_json::from_str(&text)
            .map_err(|e| fail(format!("invalid structure: {e}")))?;
        if mapping.mappings.is_empty() {
            return Err(fail("'mappings' list is empty, nothing to import".to_string()));
        }
        if let Some(index) = mapping.mappings.iter().position(|m| m.file.as_os_str().is_empty()) {
            return Err(fail(format!("mapping #{} has an empty 'file'", index + 1)));
        }
        Ok(mapping)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        fs::write(path, buf)?;
        log::info!("exported {} mapping(s) to {}", self.mappings.len(), path.display());
        Ok(())
    }

    /// The source recorded at export time, if it still exists.
    pub fn saved_source(&self, working_dir: &Path) -> Option<SourceCandidate> {
        let source = self.source.as_ref()?;
        let path = working_dir.join(&source.path);
        if path.is_file() {
            Some(SourceCandidate {
                kind: source.kind,
                path,
            })
        } else {
            log::warn!("saved source {} not found", path.display());
            None
        }
    }
}

/// Builds `id_mapping_<name>.json` from a user-supplied name, or
/// `id_mapping_<timestamp>.json` when none is given.
pub fn export_file_name(name: Option<&str>, timestamp: &str) -> Result<String> {
    let Some(name) = name else {
        return Ok(format!("{MAPPING_PREFIX}{timestamp}{MAPPING_SUFFIX}"));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(ResolverError::Config(
            "export name cannot be empty (example: --export-name=DLC1)".to_string(),
        ));
    }
    if let Some(c) = name.chars().find(|c| INVALID_NAME_CHARS.contains(c)) {
        return Err(ResolverError::Config(format!(
            "export name '{name}' contains invalid character '{c}'"
        )));
    }
    if name.starts_with(MAPPING_PREFIX) && name.ends_with(MAPPING_SUFFIX) {
        return Ok(name.to_string());
    }
    let custom = name.strip_suffix(MAPPING_SUFFIX).unwrap_or(name);
    let custom = custom.strip_prefix(MAPPING_PREFIX).unwrap_or(custom);
    Ok(format!("{MAPPING_PREFIX}{custom}{MAPPING_SUFFIX}"))
}

/// `id_mapping_*.json` files in `dir`, oldest name first.
pub fn find_mapping_files(dir: &Path) -> Result<Vec<PathBuf>> {
    files_in(dir, |name| name.starts_with(MAPPING_PREFIX) && name.ends_with(MAPPING_SUFFIX))
}

#[derive(Debug, Default)]
pub struct ImportOutcome {
    /// Files whose every entry validated, ready to apply.
    pub accepted: Vec<FilePlan>,
    /// Files left untouched, with the reasons.
    pub rejected: Vec<(PathBuf, Vec<ResolverError>)>,
    pub warnings: Vec<String>,
}

impl ImportOutcome {
    pub fn error_count(&self) -> usize {
        self.rejected.iter().map(|(_, errors)| errors.len()).sum()
    }
}

/// Checks an imported mapping against the current state of the documents.
///
/// Entries are grouped per file; a file with any failing entry is rejected as
/// a whole so a mapping is never applied partially to one file.
pub fn validate_import(
    mapping: &MappingFile,
    mapping_path: &Path,
    documents: &[DlcDocument],
    authoritative: &AuthoritativeIds,
    working_dir: &Path,
) -> ImportOutcome {
    let mapping_error = |reason: String| ResolverError::Mapping {
        path: mapping_path.to_path_buf(),
        reason,
    };

    let dlc_ids: BTreeSet<u32> = documents.iter().flat_map(|d| d.distinct_ids()).collect();
    let mut new_ids_seen: BTreeSet<u32> = BTreeSet::new();
    let mut pairs_seen: BTreeSet<(PathBuf, u32)> = BTreeSet::new();
    let mut per_file: BTreeMap<PathBuf, (Vec<PlannedChange>, Vec<ResolverError>)> = BTreeMap::new();
    let mut order: Vec<PathBuf> = Vec::new();
    let mut outcome = ImportOutcome::default();

    for entry in &mapping.mappings {
        let path = working_dir.join(&entry.file);
        if !per_file.contains_key(&path) {
            order.push(path.clone());
        }
        let (planned, errors) = per_file.entry(path.clone()).or_default();
        let (old_id, new_id) = (entry.old_id, entry.new_id);

        if !pairs_seen.insert((path.clone(), old_id)) {
            errors.push(mapping_error(format!(
                "ID {old_id} listed more than once for {}",
                path.display()
            )));
            continue;
        }

        let Some(doc) = documents.iter().find(|d| d.path() == path) else {
            errors.push(mapping_error(format!(
                "ID {old_id}: file {} does not exist or could not be read",
                path.display()
            )));
            continue;
        };

        let found = doc.occurrences_of(old_id);
        if found != entry.occurrences {
            errors.push(ResolverError::OccurrenceMismatch {
                file: path.clone(),
                old_id,
                expected: entry.occurrences,
                found,
            });
            continue;
        }

        let Some(label) = authoritative.label(old_id) else {
            outcome.warnings.push(format!(
                "ID {old_id} in {}: no longer conflicts with the game, skipped",
                path.display()
            ));
            continue;
        };

        if let Some(taken) = authoritative.label(new_id) {
            errors.push(mapping_error(format!(
                "ID {old_id} -> {new_id}: new_id already exists in the game as '{taken}'"
            )));
            continue;
        }
        if new_id != old_id && dlc_ids.contains(&new_id) {
            errors.push(mapping_error(format!(
                "ID {old_id} -> {new_id}: new_id is already used by a DLC file"
            )));
            continue;
        }
        if !new_ids_seen.insert(new_id) {
            errors.push(mapping_error(format!(
                "ID {old_id} -> {new_id}: new_id appears more than once in the mapping"
            )));
            continue;
        }

        planned.push(PlannedChange {
            old_id,
            new_id,
            conflict_label: label.to_string(),
            occurrences: found,
        });
    }

    for path in order {
        let Some((entries, errors)) = per_file.remove(&path) else {
            continue;
        };
        if !errors.is_empty() {
            log::warn!("{}: {} mapping error(s), file skipped", path.display(), errors.len());
            outcome.rejected.push((path, errors));
        } else if !entries.is_empty() {
            outcome.accepted.push(FilePlan { path, entries });
        }
    }
    outcome
}
