use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use crate::{ExternalCommand, ResolverError, Result, ToolConfig};

/// Where the game's item table was found.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Json,
    Tbl,
    Original,
    P3a,
    Zzz,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Json => "json",
            SourceKind::Tbl => "tbl",
            SourceKind::Original => "original",
            SourceKind::P3a => "p3a",
            SourceKind::Zzz => "zzz",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(SourceKind::Json),
            "tbl" => Ok(SourceKind::Tbl),
            "original" => Ok(SourceKind::Original),
            "p3a" => Ok(SourceKind::P3a),
            "zzz" => Ok(SourceKind::Zzz),
            other => Err(ResolverError::Config(format!(
                "unknown source type '{other}' (expected json, tbl, original, p3a or zzz)"
            ))),
        }
    }
}

/// File names checked by [`detect_sources`], in priority order.
const SOURCE_FILES: &[(SourceKind, &str)] = &[
    (SourceKind::Json, "t_item.json"),
    (SourceKind::Original, "t_item.tbl.original"),
    (SourceKind::Tbl, "t_item.tbl"),
    (SourceKind::P3a, "script_en.p3a"),
    (SourceKind::P3a, "script_eng.p3a"),
    (SourceKind::Zzz, "zzz_combined_tables.p3a"),
];

/// Table entry extracted from archives.
pub const ITEM_TABLE_ENTRY: &str = "t_item.tbl";

/// Scratch file an archive's item table is extracted to.
pub const EXTRACTED_TABLE_NAME: &str = "t_item.tbl.original.tmp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCandidate {
    pub kind: SourceKind,
    pub path: PathBuf,
}

/// Provenance of an [`AuthoritativeIds`] set, recorded in exported mappings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted: Option<PathBuf>,
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.extracted {
            Some(tmp) => write!(f, "{} -> {}", self.path.display(), tmp.display()),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

/// The game's item table: ID to display name. Read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthoritativeIds {
    items: BTreeMap<u32, String>,
}

impl AuthoritativeIds {
    pub fn new(items: BTreeMap<u32, String>) -> Self {
        Self { items }
    }

    pub fn label(&self, id: u32) -> Option<&str> {
        self.items.get(&id).map(String::as_str)
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.items.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Width of the longest label, for aligned reports.
    pub fn max_label_width(&self) -> usize {
        self.items.values().map(|n| n.chars().count()).max().unwrap_or(0)
    }
}

impl FromIterator<(u32, String)> for AuthoritativeIds {
    fn from_iter<T: IntoIterator<Item = (u32, String)>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

pub fn detect_sources(dir: &Path) -> Vec<SourceCandidate> {
    SOURCE_FILES
        .iter()
        .map(|&(kind, name)| SourceCandidate {
            kind,
            path: dir.join(name),
        })
        .filter(|c| c.path.is_file())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSelection {
    /// First candidate of this kind.
    Forced(SourceKind),
    /// First candidate in priority order.
    First,
    /// A choice made by the caller, e.g. from a prompt.
    Index(usize),
}

pub fn select_source(
    candidates: &[SourceCandidate],
    selection: SourceSelection,
) -> Result<SourceCandidate> {
    if candidates.is_empty() {
        return Err(ResolverError::SourceNotFound(
            "none of t_item.json, t_item.tbl.original, t_item.tbl, script_en.p3a, \
             script_eng.p3a or zzz_combined_tables.p3a exists"
                .to_string(),
        ));
    }
    let picked = match selection {
        SourceSelection::Forced(kind) => candidates.iter().find(|c| c.kind == kind),
        SourceSelection::First => candidates.first(),
        SourceSelection::Index(i) => candidates.get(i),
    };
    picked.cloned().ok_or_else(|| {
        let available: Vec<&str> = candidates.iter().map(|c| c.kind.as_str()).collect();
        let wanted = match selection {
            SourceSelection::Forced(kind) => format!("forced source '{kind}' is not available"),
            _ => "selected source is out of range".to_string(),
        };
        ResolverError::SourceNotFound(format!(
            "{wanted}; available sources: {}",
            available.join(", ")
        ))
    })
}

#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub info: SourceInfo,
    pub ids: AuthoritativeIds,
}

/// Boundary to the formats the resolver does not parse itself.
pub trait SourceLoader {
    fn load(&self, candidate: &SourceCandidate) -> Result<LoadedSource>;
}

/// Reads `t_item.json` directly and delegates TBL and P3A to configured tools.
pub struct DefaultSourceLoader<'a> {
    pub tools: &'a ToolConfig,
    pub keep_extracted: bool,
}

impl<'a> DefaultSourceLoader<'a> {
    pub fn new(tools: &'a ToolConfig, keep_extracted: bool) -> Self {
        Self {
            tools,
            keep_extracted,
        }
    }

    fn read_tbl(&self, path: &Path) -> Result<AuthoritativeIds> {
        let reader = self.tools.tbl_reader.as_ref().ok_or_else(|| {
            ResolverError::Config(format!(
                "{} needs a table reader; set tools.tbl_reader in {}",
                path.display(),
                crate::CONFIG_FILE_NAME
            ))
        })?;
        let path_str = path.to_string_lossy().into_owned();
        let output = spawn(reader, &[("{input}", path_str.as_str())])
            .map_err(|e| {
                ResolverError::Config(format!("table reader failed on {}: {e}", path.display()))
            })?;
        let value: Value = serde_json::from_slice(&output)?;
        items_from_table_json(&value, path)
    }

    fn extract(&self, archive: &Path, out: &Path) -> Result<()> {
        let fail = |reason: String| ResolverError::ExtractionFailure {
            archive: archive.to_path_buf(),
            reason,
        };
        let extractor = self
            .tools
            .p3a_extractor
            .as_ref()
            .ok_or_else(|| fail("no p3a_extractor configured".to_string()))?;
        match fs::remove_file(out) {
            Ok(()) => log::debug!("removed stale {}", out.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(fail(format!("cannot remove stale {}: {e}", out.display()))),
        }
        let archive_str = archive.to_string_lossy().into_owned();
        let out_str = out.to_string_lossy().into_owned();
        spawn(
            extractor,
            &[
                ("{archive}", archive_str.as_str()),
                ("{entry}", ITEM_TABLE_ENTRY),
                ("{output}", out_str.as_str()),
            ],
        )
        .map_err(&fail)?;
        if !out.is_file() {
            return Err(fail(format!("{ITEM_TABLE_ENTRY} not found in archive")));
        }
        Ok(())
    }
}

impl SourceLoader for DefaultSourceLoader<'_> {
    fn load(&self, candidate: &SourceCandidate) -> Result<LoadedSource> {
        let path = &candidate.path;
        let (ids, extracted) = match candidate.kind {
            SourceKind::Json => {
                let text = fs::read_to_string(path)?;
                let value: Value = serde_json::from_str(&text)?;
                (items_from_table_json(&value, path)?, None)
            }
            SourceKind::Tbl | SourceKind::Original => (self.read_tbl(path)?, None),
            SourceKind::P3a | SourceKind::Zzz => {
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                let tmp = dir.join(EXTRACTED_TABLE_NAME);
                log::info!("extracting {ITEM_TABLE_ENTRY} from {}", path.display());
                self.extract(path, &tmp)?;
                let ids = self.read_tbl(&tmp);
                if !self.keep_extracted {
                    if let Err(e) = fs::remove_file(&tmp) {
                        log::warn!("could not remove {}: {e}", tmp.display());
                    } else {
                        log::info!("cleaned up temporary file {}", tmp.display());
                    }
                }
                (ids?, Some(tmp))
            }
        };
        if ids.is_empty() {
            log::warn!(
                "{} holds no items; every DLC ID will be reported as available",
                path.display()
            );
        } else {
            log::info!("loaded {} items from {}", ids.len(), path.display());
        }
        Ok(LoadedSource {
            info: SourceInfo {
                kind: candidate.kind,
                path: path.clone(),
                extracted,
            },
            ids,
        })
    }
}

fn spawn(
    command: &ExternalCommand,
    substitutions: &[(&str, &str)],
) -> std::result::Result<Vec<u8>, String> {
    let args: Vec<String> = command
        .args
        .iter()
        .map(|arg| {
            substitutions
                .iter()
                .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
        })
        .collect();
    log::debug!("running {} {}", command.program, args.join(" "));
    let output = Command::new(&command.program)
        .args(&args)
        .output()
        .map_err(|e| format!("cannot run {}: {e}", command.program))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "{} exited with {}: {}",
            command.program,
            output.status,
            stderr.trim()
        ));
    }
    Ok(output.stdout)
}

/// Reads the `ItemTableData` table out of a kurotools-style table dump:
/// `{"data": [{"name": "ItemTableData", "data": [{"id": .., "name": ..}]}]}`.
pub fn items_from_table_json(value: &Value, path: &Path) -> Result<AuthoritativeIds> {
    let bad = |reason: &str| {
        ResolverError::SourceNotFound(format!("{}: {reason}", path.display()))
    };
    let tables = value
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| bad("missing top-level 'data' list"))?;
    let Some(table) = tables
        .iter()
        .find(|t| t.get("name").and_then(Value::as_str) == Some("ItemTableData"))
    else {
        log::warn!("{} has no ItemTableData table", path.display());
        return Ok(AuthoritativeIds::default());
    };
    let rows = table
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| bad("ItemTableData has no 'data' list"))?;

    let mut items = BTreeMap::new();
    for row in rows {
        let id = row
            .get("id")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| bad("ItemTableData row without an unsigned integer id"))?;
        let name = row.get("name").and_then(Value::as_str).unwrap_or_default();
        items.insert(id, name.to_string());
    }
    Ok(AuthoritativeIds::new(items))
}
