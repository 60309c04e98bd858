use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod allocate;
pub mod detect;
pub mod discovery;
pub mod document;
pub mod mapping;
pub mod persist;
pub mod propagate;
pub mod repair;
pub mod source;

pub use allocate::allocate;
pub use detect::{detect, used_ids, ConflictRecord};
pub use document::{DlcDocument, SectionKind};
pub use propagate::{apply, ChangeRecord, Reassignment};
pub use repair::{plan, FilePlan, PlannedChange, RepairPlan};
pub use source::{AuthoritativeIds, SourceInfo, SourceKind};

/// Engine ceiling for item IDs in the Kuro games.
pub const ENGINE_MAX_ID: u32 = 5000;

/// Name of the optional per-directory configuration file.
pub const CONFIG_FILE_NAME: &str = "kurodlc_resolver.json";

/// Name of the cumulative, append-only summary log.
pub const SUMMARY_LOG_NAME: &str = "repair_log.txt";

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("no item source found: {0}")]
    SourceNotFound(String),
    #[error("cannot parse {}: {reason}", path.display())]
    DocumentParse { path: PathBuf, reason: String },
    #[error(
        "not enough free IDs in range {lo}-{hi}: requested {requested}, available {available} \
         ({used_in_range} already used); reduce the number of files or import a hand-edited \
         mapping with an extended range"
    )]
    InsufficientRange {
        requested: usize,
        available: usize,
        used_in_range: usize,
        lo: u32,
        hi: u32,
    },
    #[error(
        "ID {old_id} in {}: expected {expected} occurrence(s), found {found}; \
         the file changed since the mapping was exported",
        file.display()
    )]
    OccurrenceMismatch {
        file: PathBuf,
        old_id: u32,
        expected: usize,
        found: usize,
    },
    #[error("failed to extract t_item.tbl from {}: {reason}", archive.display())]
    ExtractionFailure { archive: PathBuf, reason: String },
    #[error("mapping file {}: {reason}", path.display())]
    Mapping { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, ResolverError>;

/// Inclusive range new IDs are allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub min: u32,
    pub max: u32,
}

impl Default for IdRange {
    fn default() -> Self {
        Self {
            min: 1,
            max: ENGINE_MAX_ID,
        }
    }
}

impl IdRange {
    pub fn new(min: u32, max: u32) -> Result<Self> {
        if min > max {
            return Err(ResolverError::Config(format!(
                "ID range minimum {min} is greater than maximum {max}"
            )));
        }
        Ok(Self { min, max })
    }
}

/// An external program invoked for formats the resolver does not parse itself.
///
/// Arguments may contain the placeholders `{input}`, `{archive}`, `{entry}` and
/// `{output}`; they are substituted before the program is spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Converts a `.tbl` file to `t_item.json`-shaped JSON on stdout.
    #[serde(default)]
    pub tbl_reader: Option<ExternalCommand>,
    /// Extracts one entry of a `.p3a` archive to a file.
    #[serde(default)]
    pub p3a_extractor: Option<ExternalCommand>,
}

/// Contents of `kurodlc_resolver.json`. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub id_range: Option<IdRange>,
    #[serde(default)]
    pub tools: ToolConfig,
    #[serde(default)]
    pub summary_log: Option<PathBuf>,
}

impl ConfigFile {
    /// Reads `path`, or the default config file in `dir` when `path` is `None`.
    /// A missing default file yields the empty config; a missing explicit one is an error.
    pub fn load(dir: &Path, path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (dir.join(CONFIG_FILE_NAME), false),
        };
        if !path.exists() {
            if required {
                return Err(ResolverError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)?;
        let cfg = serde_json::from_str(&data).map_err(|e| {
            ResolverError::Config(format!("invalid config file {}: {e}", path.display()))
        })?;
        log::info!("loaded configuration from {}", path.display());
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverSettings {
    pub working_dir: PathBuf,
    pub id_range: IdRange,
    pub tools: ToolConfig,
    pub summary_log: PathBuf,
    pub keep_extracted: bool,
}

impl ResolverSettings {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        let summary_log = working_dir.join(SUMMARY_LOG_NAME);
        Self {
            working_dir,
            id_range: IdRange::default(),
            tools: ToolConfig::default(),
            summary_log,
            keep_extracted: false,
        }
    }

    /// Applies values from a config file on top of the defaults.
    pub fn with_config(mut self, cfg: ConfigFile) -> Self {
        if let Some(range) = cfg.id_range {
            self.id_range = range;
        }
        self.tools = cfg.tools;
        if let Some(summary_log) = cfg.summary_log {
            self.summary_log = if summary_log.is_absolute() {
                summary_log
            } else {
                self.working_dir.join(summary_log)
            };
        }
        self
    }
}

/// Current time formatted for file name suffixes.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}
