use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::document::DlcDocument;
use crate::source::AuthoritativeIds;

/// Classification of one distinct ID found across the loaded documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    pub id: u32,
    /// Name of the game item holding this ID; `None` when the ID is free to use.
    pub conflict_label: Option<String>,
    pub occurrences: usize,
    pub files: BTreeSet<PathBuf>,
}

/// Every ID that a new assignment must avoid: the game's IDs plus every ID any
/// loaded document references.
pub fn used_ids(documents: &[DlcDocument], authoritative: &AuthoritativeIds) -> BTreeSet<u32> {
    let mut used: BTreeSet<u32> = authoritative.ids().collect();
    for doc in documents {
        used.extend(doc.id_occurrences().into_iter().map(|(_, id)| id));
    }
    used
}

/// One record per distinct ID, ascending. Only collisions with the game's table
/// count as conflicts; IDs shared between documents do not.
pub fn detect(documents: &[DlcDocument], authoritative: &AuthoritativeIds) -> Vec<ConflictRecord> {
    let mut records: BTreeMap<u32, ConflictRecord> = BTreeMap::new();
    for doc in documents {
        for (_, id) in doc.id_occurrences() {
            let record = records.entry(id).or_insert_with(|| ConflictRecord {
                id,
                conflict_label: authoritative.label(id).map(str::to_string),
                occurrences: 0,
                files: BTreeSet::new(),
            });
            record.occurrences += 1;
            record.files.insert(doc.path().to_path_buf());
        }
    }
    records.into_values().collect()
}
