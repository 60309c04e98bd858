use serde_json::Value;
use std::collections::BTreeMap;

use crate::document::{DlcDocument, Section, SectionKind};

/// One rewritten ID field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub section: SectionKind,
    pub old_id: u32,
    pub new_id: u32,
    /// Which record field `context` was read from (`mdl_name`, `shop_id`, `name`).
    pub context_field: &'static str,
    /// Human-readable value for logs only; never used for matching.
    pub context: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reassignment {
    pub document: DlcDocument,
    pub changes: Vec<ChangeRecord>,
}

impl Reassignment {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

fn context_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Rewrites every ID field whose value is a key of `mapping` and returns the
/// new document together with one [`ChangeRecord`] per rewritten field.
///
/// Lookups always use the value from `document`, so a mapping such as
/// `310 -> 311, 311 -> 2500` swaps rather than cascades. `shop_id` and all
/// other non-ID fields are left untouched. Keys that do not occur are ignored.
pub fn apply(document: &DlcDocument, mapping: &BTreeMap<u32, u32>) -> Reassignment {
    let mut updated = document.clone();
    let mut changes = Vec::new();

    let mut record = |section, old_id: u32, context_field, context| {
        let new_id = mapping.get(&old_id).copied()?;
        changes.push(ChangeRecord {
            section,
            old_id,
            new_id,
            context_field,
            context,
        });
        Some(new_id)
    };

    for section in updated.sections_mut() {
        match section {
            Section::CostumeParam(records) => {
                for r in records {
                    let context = r.mdl_name().unwrap_or_default().to_string();
                    let kind = SectionKind::CostumeParam;
                    if let Some(new_id) = record(kind, r.item_id, "mdl_name", context) {
                        r.item_id = new_id;
                    }
                }
            }
            Section::ItemTableData(records) => {
                for r in records {
                    let context = r.name().unwrap_or_default().to_string();
                    let kind = SectionKind::ItemTableData;
                    if let Some(new_id) = record(kind, r.id, "name", context) {
                        r.id = new_id;
                    }
                }
            }
            Section::ShopItem(records) => {
                for r in records {
                    let context = context_text(r.shop_id());
                    let kind = SectionKind::ShopItem;
                    if let Some(new_id) = record(kind, r.item_id, "shop_id", context) {
                        r.item_id = new_id;
                    }
                }
            }
            Section::DlcTableData(records) => {
                for r in records {
                    let context = r.name().unwrap_or_default().to_string();
                    for item in r.items.iter_mut() {
                        if let Some(new_id) =
                            record(SectionKind::DlcTableData, *item, "name", context.clone())
                        {
                            *item = new_id;
                        }
                    }
                }
            }
            Section::Other(..) => {}
        }
    }

    Reassignment {
        document: updated,
        changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "CostumeParam": [
            {"character_id": 0, "item_id": 310, "mdl_name": "chr0000_c02"},
            {"character_id": 1, "item_id": 4000, "mdl_name": "chr0100_c02"}
        ],
        "ItemTableData": [
            {"id": 310, "name": "Coat"},
            {"id": 311, "name": "Hat"}
        ],
        "DLCTableData": [
            {"id": 1, "items": [310, 311, 4000, 310], "name": "Pack"}
        ],
        "ShopItem": [
            {"shop_id": 310, "item_id": 311},
            {"shop_id": 22, "item_id": 310}
        ]
    }"#;

    fn doc() -> DlcDocument {
        DlcDocument::parse("a.kurodlc.json", DOC).unwrap()
    }

    fn mapping(pairs: &[(u32, u32)]) -> BTreeMap<u32, u32> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn rewrites_every_id_field() {
        let original = doc();
        let result = apply(&original, &mapping(&[(310, 2500), (311, 2501)]));

        assert_eq!(result.document.occurrences_of(310), 0);
        assert_eq!(result.document.occurrences_of(311), 0);
        assert_eq!(result.document.occurrences_of(2500), original.occurrences_of(310));
        assert_eq!(result.document.occurrences_of(2501), original.occurrences_of(311));
        assert_eq!(result.document.occurrences_of(4000), 2);
        assert_eq!(result.changes.len(), 8);

        // The input snapshot is untouched.
        assert_eq!(original, doc());
    }

    #[test]
    fn never_touches_shop_id() {
        let result = apply(&doc(), &mapping(&[(310, 2500)]));
        let value = result.document.to_value();
        let shops = value["ShopItem"].as_array().unwrap();
        assert_eq!(shops[0]["shop_id"], 310);
        assert_eq!(shops[0]["item_id"], 311);
        assert_eq!(shops[1]["shop_id"], 22);
        assert_eq!(shops[1]["item_id"], 2500);
    }

    #[test]
    fn records_context_labels() {
        let result = apply(&doc(), &mapping(&[(310, 2500)]));
        let seen: Vec<(SectionKind, &str, &str)> = result
            .changes
            .iter()
            .map(|c| (c.section, c.context_field, c.context.as_str()))
            .collect();
        assert_eq!(
            seen,
            vec![
                (SectionKind::CostumeParam, "mdl_name", "chr0000_c02"),
                (SectionKind::ItemTableData, "name", "Coat"),
                (SectionKind::DlcTableData, "name", "Pack"),
                (SectionKind::DlcTableData, "name", "Pack"),
                (SectionKind::ShopItem, "shop_id", "22"),
            ]
        );
        assert!(result.changes.iter().all(|c| c.old_id == 310 && c.new_id == 2500));
    }

    #[test]
    fn swaps_do_not_cascade() {
        let result = apply(&doc(), &mapping(&[(310, 311), (311, 310)]));
        let value = result.document.to_value();
        assert_eq!(value["DLCTableData"][0]["items"], serde_json::json!([311, 310, 4000, 311]));
    }

    #[test]
    fn absent_keys_produce_no_changes() {
        let original = doc();
        let result = apply(&original, &mapping(&[(9999, 1)]));
        assert!(result.is_empty());
        assert_eq!(result.document, original);
    }

    #[test]
    fn other_fields_and_order_survive() {
        let result = apply(&doc(), &mapping(&[(310, 2500)]));
        let mut expected: Value = serde_json::from_str(DOC).unwrap();
        expected["CostumeParam"][0]["item_id"] = 2500.into();
        expected["ItemTableData"][0]["id"] = 2500.into();
        expected["DLCTableData"][0]["items"] = serde_json::json!([2500, 311, 4000, 2500]);
        expected["ShopItem"][1]["item_id"] = 2500.into();
        assert_eq!(result.document.to_value(), expected);

        let text = String::from_utf8(result.document.to_json_bytes().unwrap()).unwrap();
        let expected_text = {
            let mut buf = Vec::new();
            let fmt = serde_json::ser::PrettyFormatter::with_indent(b"    ");
            let mut ser = serde_json::Serializer::with_formatter(&mut buf, fmt);
            serde::Serialize::serialize(&expected, &mut ser).unwrap();
            String::from_utf8(buf).unwrap()
        };
        assert_eq!(text, expected_text);
    }
}
