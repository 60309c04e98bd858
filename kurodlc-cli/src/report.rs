use std::fmt::Write;

use kurodlc_core::detect::ConflictRecord;
use kurodlc_core::persist::AppliedRepair;
use kurodlc_core::repair::FilePlan;

const AVAILABLE: &str = "available";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub total: usize,
    pub ok: usize,
    pub bad: usize,
}

impl Tally {
    pub fn add(&mut self, other: Tally) {
        self.total += other.total;
        self.ok += other.ok;
        self.bad += other.bad;
    }

    fn render(&self, out: &mut String) {
        let _ = writeln!(out, "Total IDs : {}", self.total);
        let _ = writeln!(out, "OK        : {}", self.ok);
        let _ = writeln!(out, "BAD       : {}", self.bad);
    }
}

/// One aligned line per distinct ID of a file, then the file's totals.
///
/// `label_width` is shared across files so columns line up in the whole run.
pub fn file_report(
    records: &[ConflictRecord],
    label_width: usize,
    plan: Option<&FilePlan>,
) -> (String, Tally) {
    let mut out = String::new();
    let mut tally = Tally::default();
    if records.is_empty() {
        out.push_str("No item IDs found.\n");
        return (out, tally);
    }

    let id_width = records.iter().map(|r| r.id.to_string().len()).max().unwrap_or(0);
    let label_width = label_width.max(AVAILABLE.len());
    for record in records {
        let (label, status) = match &record.conflict_label {
            Some(label) => {
                tally.bad += 1;
                (label.as_str(), "[BAD]")
            }
            None => {
                tally.ok += 1;
                (AVAILABLE, "[OK]")
            }
        };
        let _ = writeln!(out, "{:>id_width$} : {:<label_width$} {status}", record.id, label);
    }
    tally.total = records.len();

    if let Some(plan) = plan.filter(|p| !p.entries.is_empty()) {
        out.push_str("\nProposed changes:\n");
        for entry in &plan.entries {
            let _ = writeln!(
                out,
                "  {:>id_width$} -> {:<5} ({}, {} occurrence(s))",
                entry.old_id, entry.new_id, entry.conflict_label, entry.occurrences
            );
        }
    }

    out.push_str("\nSummary for this file:\n");
    tally.render(&mut out);
    (out, tally)
}

pub fn overall_report(tally: Tally, source: &str) -> String {
    let mut out = String::from("\nOverall Summary:\n");
    tally.render(&mut out);
    let _ = writeln!(out, "\nSource used for check: {source}");
    out
}

pub fn applied_report(applied: &AppliedRepair) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Updated {} ({} field(s))",
        applied.path.display(),
        applied.changes.len()
    );
    let _ = writeln!(out, "  backup     : {}", applied.backup.display());
    let _ = writeln!(out, "  verbose log: {}", applied.verbose_log.display());
    out
}
