use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{ResolverError, Result};

/// The four sections of a `.kurodlc.json` file that hold item ID references.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SectionKind {
    CostumeParam,
    ItemTableData,
    ShopItem,
    DlcTableData,
}

impl SectionKind {
    pub const ALL: [SectionKind; 4] = [
        SectionKind::CostumeParam,
        SectionKind::ItemTableData,
        SectionKind::ShopItem,
        SectionKind::DlcTableData,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SectionKind::CostumeParam => "CostumeParam",
            SectionKind::ItemTableData => "ItemTableData",
            SectionKind::ShopItem => "ShopItem",
            SectionKind::DlcTableData => "DLCTableData",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Record field holding the ID reference(s).
    pub fn id_field(self) -> &'static str {
        match self {
            SectionKind::CostumeParam | SectionKind::ShopItem => "item_id",
            SectionKind::ItemTableData => "id",
            SectionKind::DlcTableData => "items",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Every field of a record except the typed ID member, in file order.
///
/// `typed_at` remembers where the ID member sat so the record serializes with
/// its original key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtraFields {
    fields: Map<String, Value>,
    typed_at: usize,
}

impl ExtraFields {
    fn split(object: Map<String, Value>, key: &str) -> (Option<Value>, Self) {
        let mut typed = None;
        let mut typed_at = object.len();
        let mut fields = Map::new();
        for (index, (k, v)) in object.into_iter().enumerate() {
            if k == key {
                typed = Some(v);
                typed_at = index;
            } else {
                fields.insert(k, v);
            }
        }
        (typed, Self { fields, typed_at })
    }

    fn join(&self, key: &str, value: Value) -> Value {
        let mut out = Map::new();
        let mut value = Some(value);
        for (index, (k, v)) in self.fields.iter().enumerate() {
            if index == self.typed_at {
                if let Some(value) = value.take() {
                    out.insert(key.to_string(), value);
                }
            }
            out.insert(k.clone(), v.clone());
        }
        if let Some(value) = value {
            out.insert(key.to_string(), value);
        }
        Value::Object(out)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CostumeParamRecord {
    pub item_id: u32,
    pub extra: ExtraFields,
}

impl CostumeParamRecord {
    pub fn mdl_name(&self) -> Option<&str> {
        self.extra.get_str("mdl_name")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemTableDataRecord {
    pub id: u32,
    pub extra: ExtraFields,
}

impl ItemTableDataRecord {
    pub fn name(&self) -> Option<&str> {
        self.extra.get_str("name")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShopItemRecord {
    pub item_id: u32,
    pub extra: ExtraFields,
}

impl ShopItemRecord {
    /// The shop this entry belongs to. Never an item reference.
    pub fn shop_id(&self) -> Option<&Value> {
        self.extra.get("shop_id")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DlcTableDataRecord {
    pub items: Vec<u32>,
    pub extra: ExtraFields,
}

impl DlcTableDataRecord {
    pub fn name(&self) -> Option<&str> {
        self.extra.get_str("name")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    CostumeParam(Vec<CostumeParamRecord>),
    ItemTableData(Vec<ItemTableDataRecord>),
    ShopItem(Vec<ShopItemRecord>),
    DlcTableData(Vec<DlcTableDataRecord>),
    /// Any root key the resolver does not interpret, kept verbatim.
    Other(String, Value),
}

impl Section {
    fn name(&self) -> &str {
        match self {
            Section::CostumeParam(_) => SectionKind::CostumeParam.name(),
            Section::ItemTableData(_) => SectionKind::ItemTableData.name(),
            Section::ShopItem(_) => SectionKind::ShopItem.name(),
            Section::DlcTableData(_) => SectionKind::DlcTableData.name(),
            Section::Other(name, _) => name,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Section::CostumeParam(records) => Value::Array(
                records
                    .iter()
                    .map(|r| r.extra.join("item_id", Value::from(r.item_id)))
                    .collect(),
            ),
            Section::ItemTableData(records) => Value::Array(
                records
                    .iter()
                    .map(|r| r.extra.join("id", Value::from(r.id)))
                    .collect(),
            ),
            Section::ShopItem(records) => Value::Array(
                records
                    .iter()
                    .map(|r| r.extra.join("item_id", Value::from(r.item_id)))
                    .collect(),
            ),
            Section::DlcTableData(records) => Value::Array(
                records
                    .iter()
                    .map(|r| {
                        let items = r.items.iter().copied().map(Value::from).collect();
                        r.extra.join("items", Value::Array(items))
                    })
                    .collect(),
            ),
            Section::Other(_, value) => value.clone(),
        }
    }
}

/// One mod's `.kurodlc.json` file.
#[derive(Debug, Clone, PartialEq)]
pub struct DlcDocument {
    path: PathBuf,
    sections: Vec<Section>,
}

fn as_id(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|n| u32::try_from(n).ok())
}

fn section_records(
    kind: SectionKind,
    value: Value,
) -> std::result::Result<Vec<Map<String, Value>>, String> {
    let Value::Array(entries) = value else {
        return Err(format!("invalid {kind} (not a list)"));
    };
    entries
        .into_iter()
        .map(|entry| match entry {
            Value::Object(object) => Ok(object),
            _ => Err(format!("{kind} item is not an object")),
        })
        .collect()
}

fn split_id(
    kind: SectionKind,
    object: Map<String, Value>,
) -> std::result::Result<(u32, ExtraFields), String> {
    let field = kind.id_field();
    let (typed, extra) = ExtraFields::split(object, field);
    let id = typed
        .as_ref()
        .and_then(as_id)
        .ok_or_else(|| format!("{kind}.{field} missing or not an unsigned integer"))?;
    Ok((id, extra))
}

fn parse_section(kind: SectionKind, value: Value) -> std::result::Result<Section, String> {
    let records = section_records(kind, value)?;
    let section = match kind {
        SectionKind::CostumeParam => Section::CostumeParam(
            records
                .into_iter()
                .map(|o| {
                    split_id(kind, o).map(|(item_id, extra)| CostumeParamRecord { item_id, extra })
                })
                .collect::<std::result::Result<_, _>>()?,
        ),
        SectionKind::ItemTableData => Section::ItemTableData(
            records
                .into_iter()
                .map(|o| split_id(kind, o).map(|(id, extra)| ItemTableDataRecord { id, extra }))
                .collect::<std::result::Result<_, _>>()?,
        ),
        SectionKind::ShopItem => Section::ShopItem(
            records
                .into_iter()
                .map(|o| {
                    split_id(kind, o).map(|(item_id, extra)| ShopItemRecord { item_id, extra })
                })
                .collect::<std::result::Result<_, _>>()?,
        ),
        SectionKind::DlcTableData => {
            let mut out = Vec::with_capacity(records.len());
            for object in records {
                let (typed, extra) = ExtraFields::split(object, "items");
                let Some(Value::Array(values)) = typed else {
                    return Err("DLCTableData.items missing or not a list".to_string());
                };
                let items = values
                    .iter()
                    .map(as_id)
                    .collect::<Option<Vec<u32>>>()
                    .ok_or_else(|| {
                        "DLCTableData.items contains a value that is not an unsigned integer"
                            .to_string()
                    })?;
                out.push(DlcTableDataRecord { items, extra });
            }
            Section::DlcTableData(out)
        }
    };
    Ok(section)
}

impl DlcDocument {
    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Result<Self> {
        let path = path.into();
        let fail = |reason: String| ResolverError::DocumentParse {
            path: path.clone(),
            reason,
        };

        let root: Value =
            serde_json::from_str(text).map_err(|e| fail(format!("invalid JSON: {e}")))?;
        let Value::Object(root) = root else {
            return Err(fail("root element must be a JSON object".to_string()));
        };

        let mut sections = Vec::with_capacity(root.len());
        for (name, value) in root {
            let section = match SectionKind::from_name(&name) {
                Some(kind) => parse_section(kind, value).map_err(&fail)?,
                None => Section::Other(name, value),
            };
            sections.push(section);
        }

        Ok(Self { path, sections })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| ResolverError::DocumentParse {
            path: path.to_path_buf(),
            reason: format!("cannot read file: {e}"),
        })?;
        Self::parse(path, &text)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name for display, falling back to the full path.
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub(crate) fn sections_mut(&mut self) -> &mut [Section] {
        &mut self.sections
    }

    /// Every ID reference in section order, one entry per field occurrence.
    pub fn id_occurrences(&self) -> Vec<(SectionKind, u32)> {
        let mut out = Vec::new();
        for section in &self.sections {
            match section {
                Section::CostumeParam(records) => {
                    out.extend(records.iter().map(|r| (SectionKind::CostumeParam, r.item_id)))
                }
                Section::ItemTableData(records) => {
                    out.extend(records.iter().map(|r| (SectionKind::ItemTableData, r.id)))
                }
                Section::ShopItem(records) => {
                    out.extend(records.iter().map(|r| (SectionKind::ShopItem, r.item_id)))
                }
                Section::DlcTableData(records) => {
                    for record in records {
                        out.extend(record.items.iter().map(|&id| (SectionKind::DlcTableData, id)));
                    }
                }
                Section::Other(..) => {}
            }
        }
        out
    }

    pub fn occurrences_of(&self, id: u32) -> usize {
        self.id_occurrences().iter().filter(|(_, v)| *v == id).count()
    }

    pub fn distinct_ids(&self) -> BTreeSet<u32> {
        self.id_occurrences().into_iter().map(|(_, id)| id).collect()
    }

    pub fn to_value(&self) -> Value {
        let mut root = Map::new();
        for section in &self.sections {
            root.insert(section.name().to_string(), section.to_value());
        }
        Value::Object(root)
    }

    /// Serializes with four-space indentation and unescaped UTF-8.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.to_value().serialize(&mut ser)?;
        Ok(buf)
    }
}

/// Loads each path, collecting parse failures instead of stopping at the first.
pub fn load_documents(paths: &[PathBuf]) -> (Vec<DlcDocument>, Vec<ResolverError>) {
    let mut documents = Vec::with_capacity(paths.len());
    let mut errors = Vec::new();
    for path in paths {
        match DlcDocument::load(path) {
            Ok(doc) => documents.push(doc),
            Err(e) => {
                log::warn!("skipping {}: {e}", path.display());
                errors.push(e);
            }
        }
    }
    (documents, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "CostumeParam": [
            {"character_id": 0, "item_id": 310, "mdl_name": "chr0000_c02"}
        ],
        "ItemTableData": [
            {"id": 310, "chr_restrict": 1, "name": "Sepith Coat", "desc": "Ünïcode"}
        ],
        "DLCTableData": [
            {"id": 7, "items": [310, 311, 310], "name": "Pack"}
        ],
        "ShopItem": [
            {"shop_id": 311, "item_id": 311, "unknown": 1}
        ],
        "Extra": {"keep": [1, 2.5, "x"]}
    }"#;

    fn sample() -> DlcDocument {
        DlcDocument::parse("a.kurodlc.json", SAMPLE).unwrap()
    }

    #[test]
    fn collects_every_id_occurrence() {
        let doc = sample();
        assert_eq!(
            doc.id_occurrences(),
            vec![
                (SectionKind::CostumeParam, 310),
                (SectionKind::ItemTableData, 310),
                (SectionKind::DlcTableData, 310),
                (SectionKind::DlcTableData, 311),
                (SectionKind::DlcTableData, 310),
                (SectionKind::ShopItem, 311),
            ]
        );
        assert_eq!(doc.occurrences_of(310), 4);
        assert_eq!(doc.occurrences_of(311), 2);
        assert_eq!(doc.occurrences_of(999), 0);
    }

    #[test]
    fn shop_id_is_not_an_id_reference() {
        let doc = DlcDocument::parse(
            "s.kurodlc.json",
            r#"{"ShopItem": [{"shop_id": 42, "item_id": 7}]}"#,
        )
        .unwrap();
        assert_eq!(doc.distinct_ids().into_iter().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn unchanged_document_round_trips_in_order() {
        let doc = sample();
        let original: Value = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(doc.to_value(), original);

        let out = String::from_utf8(doc.to_json_bytes().unwrap()).unwrap();
        let keys: Vec<&str> = ["CostumeParam", "ItemTableData", "DLCTableData", "ShopItem", "Extra"]
            .into_iter()
            .collect();
        let mut last = 0;
        for key in keys {
            let pos = out.find(key).unwrap();
            assert!(pos >= last, "{key} out of order");
            last = pos;
        }
        assert!(out.contains("Ünïcode"));
        assert!(out.contains("\n    \"CostumeParam\""));
        // Field order inside a record survives too.
        let shop = out.find("\"shop_id\"").unwrap();
        let item = out.rfind("\"item_id\": 311").unwrap();
        assert!(shop < item);
    }

    #[test]
    fn all_sections_are_optional() {
        let doc = DlcDocument::parse("e.kurodlc.json", "{}").unwrap();
        assert!(doc.id_occurrences().is_empty());
        assert!(doc.distinct_ids().is_empty());
    }

    #[test]
    fn rejects_malformed_documents() {
        let cases = [
            ("{not json", "invalid JSON"),
            ("[1, 2]", "root element"),
            (r#"{"CostumeParam": {}}"#, "not a list"),
            (r#"{"CostumeParam": [1]}"#, "not an object"),
            (r#"{"CostumeParam": [{"mdl_name": "x"}]}"#, "CostumeParam.item_id"),
            (r#"{"ItemTableData": [{"id": "310"}]}"#, "ItemTableData.id"),
            (r#"{"ShopItem": [{"item_id": -1}]}"#, "ShopItem.item_id"),
            (r#"{"DLCTableData": [{"items": 5}]}"#, "DLCTableData.items missing"),
            (r#"{"DLCTableData": [{"items": [1, "2"]}]}"#, "not an unsigned integer"),
        ];
        for (text, expected) in cases {
            match DlcDocument::parse("bad.kurodlc.json", text) {
                Err(ResolverError::DocumentParse { reason, .. }) => {
                    assert!(reason.contains(expected), "{text}: {reason}")
                }
                other => panic!("{text}: expected parse error, got {other:?}"),
            }
        }
    }

    #[test]
    fn load_documents_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.kurodlc.json");
        let bad = dir.path().join("bad.kurodlc.json");
        fs::write(&good, r#"{"ItemTableData": [{"id": 1, "name": "x"}]}"#).unwrap();
        fs::write(&bad, "{").unwrap();

        let (docs, errors) = load_documents(&[bad.clone(), good.clone()]);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path(), good.as_path());
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ResolverError::DocumentParse { path, .. } if *path == bad));
    }
}
