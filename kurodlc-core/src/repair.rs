use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::allocate::allocate;
use crate::detect::used_ids;
use crate::document::DlcDocument;
use crate::source::{AuthoritativeIds, SourceInfo};
use crate::{IdRange, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChange {
    pub old_id: u32,
    pub new_id: u32,
    pub conflict_label: String,
    /// ID field occurrences of `old_id` in the file when the plan was made.
    pub occurrences: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePlan {
    pub path: PathBuf,
    pub entries: Vec<PlannedChange>,
}

impl FilePlan {
    pub fn mapping(&self) -> BTreeMap<u32, u32> {
        self.entries.iter().map(|e| (e.old_id, e.new_id)).collect()
    }
}

/// In-memory repair proposal. Building one never touches the disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairPlan {
    pub source: SourceInfo,
    pub range: IdRange,
    pub files: Vec<FilePlan>,
}

impl RepairPlan {
    pub fn is_empty(&self) -> bool {
        self.files.iter().all(|f| f.entries.is_empty())
    }

    pub fn change_count(&self) -> usize {
        self.files.iter().map(|f| f.entries.len()).sum()
    }
}

/// Plans a new ID for every conflicting ID of every document.
///
/// Each (file, conflicting ID) pair gets its own new ID so that two mods which
/// both borrowed the same game ID do not end up sharing a replacement. All new
/// IDs come from one allocator call, keeping a repair in one block when the
/// range allows it. Files are taken in the given order, IDs ascending.
pub fn plan(
    documents: &[DlcDocument],
    authoritative: &AuthoritativeIds,
    source: &SourceInfo,
    range: IdRange,
) -> Result<RepairPlan> {
    let mut requests: Vec<(usize, u32, String, usize)> = Vec::new();
    for (index, doc) in documents.iter().enumerate() {
        for id in doc.distinct_ids() {
            if let Some(label) = authoritative.label(id) {
                requests.push((index, id, label.to_string(), doc.occurrences_of(id)));
            }
        }
    }

    let used = used_ids(documents, authoritative);
    let new_ids = allocate(requests.len(), &used, range.min, range.max)?;

    let mut files: Vec<FilePlan> = documents
        .iter()
        .map(|doc| FilePlan {
            path: doc.path().to_path_buf(),
            entries: Vec::new(),
        })
        .collect();
    for ((index, old_id, conflict_label, occurrences), new_id) in requests.into_iter().zip(new_ids)
    {
        files[index].entries.push(PlannedChange {
            old_id,
            new_id,
            conflict_label,
            occurrences,
        });
    }
    files.retain(|f| !f.entries.is_empty());

    let plan = RepairPlan {
        source: source.clone(),
        range,
        files,
    };
    log::info!(
        "planned {} reassignment(s) across {} file(s)",
        plan.change_count(),
        plan.files.len()
    );
    Ok(plan)
}
