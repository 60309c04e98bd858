use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use serde_json::Value;

const T_ITEM: &str = r#"{
    "headers": [],
    "data": [
        {"name": "ItemTableData", "data": [
            {"id": 310, "name": "Earth Sepith"},
            {"id": 311, "name": "Water Sepith"}
        ]}
    ]
}"#;

const COSTUME_DLC: &str = r#"{
    "CostumeParam": [
        {"character_id": 0, "item_id": 310, "mdl_name": "chr0000_c02"}
    ],
    "ItemTableData": [
        {"id": 310, "name": "Sepith Coat"},
        {"id": 4000, "name": "Spare Hat"}
    ],
    "DLCTableData": [
        {"id": 1, "items": [310, 311, 4000], "name": "Coat Pack"}
    ],
    "ShopItem": [
        {"shop_id": 311, "item_id": 311}
    ]
}"#;

fn run_cli(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_kurodlc-resolve"))
        .args(args)
        .arg(format!("--dir={}", dir.display()))
        .arg("--no-interactive")
        .stdin(Stdio::null())
        .output()
        .expect("failed to run kurodlc-resolve")
}

fn workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("t_item.json"), T_ITEM).expect("write t_item.json");
    fs::write(dir.path().join("costume.kurodlc.json"), COSTUME_DLC).expect("write dlc");
    dir
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn files_containing(dir: &Path, marker: &str) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = fs::read_dir(dir)
        .expect("read_dir")
        .map(|e| e.expect("entry").path())
        .filter(|p| p.file_name().unwrap().to_string_lossy().contains(marker))
        .collect();
    found.sort();
    found
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).expect("read")).expect("valid JSON")
}

#[test]
fn checkbydlc_reports_each_id() {
    let dir = workspace();
    let output = run_cli(dir.path(), &["checkbydlc"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let text = stdout(&output);
    assert!(text.contains("Processing file: costume.kurodlc.json"));
    assert!(text.contains(" 310 : Earth Sepith [BAD]"));
    assert!(text.contains(" 311 : Water Sepith [BAD]"));
    assert!(text.contains("4000 : available    [OK]"));
    assert!(text.contains("Overall Summary:\nTotal IDs : 3\nOK        : 1\nBAD       : 2\n"));
    assert!(text.contains("Source used for check:"));
}

#[test]
fn repair_preview_changes_nothing() {
    let dir = workspace();
    let output = run_cli(dir.path(), &["repair"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let text = stdout(&output);
    assert!(text.contains(" 310 -> 2500"));
    assert!(text.contains(" 311 -> 2501"));
    assert!(text.contains("Preview only"));
    assert_eq!(
        fs::read_to_string(dir.path().join("costume.kurodlc.json")).unwrap(),
        COSTUME_DLC
    );
    assert!(files_containing(dir.path(), ".bak_").is_empty());
}

#[test]
fn repair_apply_rewrites_with_backup_and_logs() {
    let dir = workspace();
    let output = run_cli(dir.path(), &["repair", "--apply"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let json = read_json(&dir.path().join("costume.kurodlc.json"));
    assert_eq!(json["CostumeParam"][0]["item_id"], 2500);
    assert_eq!(json["ItemTableData"][0]["id"], 2500);
    assert_eq!(json["ItemTableData"][1]["id"], 4000);
    assert_eq!(json["DLCTableData"][0]["items"], serde_json::json!([2500, 2501, 4000]));
    assert_eq!(json["ShopItem"][0]["shop_id"], 311);
    assert_eq!(json["ShopItem"][0]["item_id"], 2501);

    let backups = files_containing(dir.path(), ".bak_");
    assert_eq!(backups.len(), 1);
    assert_eq!(fs::read_to_string(&backups[0]).unwrap(), COSTUME_DLC);
    assert_eq!(files_containing(dir.path(), ".repair_verbose_").len(), 1);

    let summary = fs::read_to_string(dir.path().join("repair_log.txt")).unwrap();
    assert_eq!(summary.lines().count(), 5);

    // The backup is not picked up as a DLC file on the next run.
    let output = run_cli(dir.path(), &["checkbydlc"]);
    let text = stdout(&output);
    assert_eq!(text.matches("Processing file:").count(), 1);
    assert!(text.contains("BAD       : 0"));
}

#[test]
fn export_then_import_matches_direct_apply() {
    let direct = workspace();
    assert!(run_cli(direct.path(), &["repair", "--apply"]).status.success());

    let staged = workspace();
    let output = run_cli(staged.path(), &["repair", "--export=test"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let mapping_path = staged.path().join("id_mapping_test.json");
    let mapping = read_json(&mapping_path);
    assert_eq!(mapping["mappings"].as_array().unwrap().len(), 2);
    assert_eq!(mapping["mappings"][0]["file"], "costume.kurodlc.json");
    assert_eq!(mapping["mappings"][0]["occurrences"], 3);
    assert_eq!(mapping["source"]["type"], "json");
    assert_eq!(
        fs::read_to_string(staged.path().join("costume.kurodlc.json")).unwrap(),
        COSTUME_DLC
    );

    let output = run_cli(staged.path(), &["repair", "--import"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(
        fs::read_to_string(staged.path().join("costume.kurodlc.json")).unwrap(),
        fs::read_to_string(direct.path().join("costume.kurodlc.json")).unwrap()
    );
}

#[test]
fn edited_new_ids_are_applied() {
    let dir = workspace();
    assert!(run_cli(dir.path(), &["repair", "--export-name=edit"]).status.success());
    let path = dir.path().join("id_mapping_edit.json");
    let mut mapping = read_json(&path);
    mapping["mappings"][0]["new_id"] = 4500.into();
    fs::write(&path, serde_json::to_string_pretty(&mapping).unwrap()).unwrap();

    let output = run_cli(
        dir.path(),
        &["repair", "--import", "--mapping-file=id_mapping_edit.json"],
    );
    assert!(output.status.success(), "{}", stderr(&output));
    let json = read_json(&dir.path().join("costume.kurodlc.json"));
    assert_eq!(json["CostumeParam"][0]["item_id"], 4500);
    assert_eq!(json["DLCTableData"][0]["items"], serde_json::json!([4500, 2501, 4000]));
}

#[test]
fn import_refuses_a_changed_file() {
    let dir = workspace();
    assert!(run_cli(dir.path(), &["repair", "--export"]).status.success());
    assert_eq!(files_containing(dir.path(), "id_mapping_").len(), 1);

    let edited = COSTUME_DLC.replace("[310, 311, 4000]", "[311, 4000]");
    fs::write(dir.path().join("costume.kurodlc.json"), &edited).unwrap();

    let output = run_cli(dir.path(), &["repair", "--import"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("ID 310"));
    assert!(stdout(&output).contains("expected 3 occurrence(s), found 2"));
    assert_eq!(
        fs::read_to_string(dir.path().join("costume.kurodlc.json")).unwrap(),
        edited
    );
    assert!(files_containing(dir.path(), ".bak_").is_empty());
}

#[test]
fn resolved_conflict_is_reported_on_import() {
    let dir = workspace();
    assert!(run_cli(dir.path(), &["repair", "--export"]).status.success());

    let game_without_311 = T_ITEM.replace(
        ",\n            {\"id\": 311, \"name\": \"Water Sepith\"}",
        "",
    );
    assert!(!game_without_311.contains("311"));
    fs::write(dir.path().join("t_item.json"), game_without_311).unwrap();

    let output = run_cli(dir.path(), &["repair", "--import"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("Warning: ID 311 in"));
    assert!(text.contains("no longer conflicts with the game, skipped"));

    let json = read_json(&dir.path().join("costume.kurodlc.json"));
    assert_eq!(json["DLCTableData"][0]["items"], serde_json::json!([2500, 311, 4000]));
    assert_eq!(json["ShopItem"][0]["item_id"], 311);
}

#[test]
fn import_and_export_together_are_rejected() {
    let dir = workspace();
    let output = run_cli(dir.path(), &["repair", "--import", "--export"]);
    assert!(!output.status.success());
}

#[test]
fn insufficient_range_is_fatal() {
    let dir = workspace();
    let output = run_cli(dir.path(), &["repair", "--apply", "--id-min=310", "--id-max=312"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("not enough free IDs in range 310-312"));
    assert_eq!(
        fs::read_to_string(dir.path().join("costume.kurodlc.json")).unwrap(),
        COSTUME_DLC
    );
}

#[test]
fn missing_source_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("costume.kurodlc.json"), COSTUME_DLC).unwrap();
    let output = run_cli(dir.path(), &["checkbydlc"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("no item source found"));
}

#[test]
fn broken_files_are_skipped() {
    let dir = workspace();
    fs::write(dir.path().join("broken.kurodlc.json"), "{ not json").unwrap();
    let output = run_cli(dir.path(), &["checkbydlc"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stderr(&output).contains("broken.kurodlc.json"));
    assert_eq!(stdout(&output).matches("Processing file:").count(), 1);
}
