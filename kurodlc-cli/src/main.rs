use clap::{ArgAction, Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};

use kurodlc_core::discovery::find_dlc_files;
use kurodlc_core::document::load_documents;
use kurodlc_core::mapping::{export_file_name, find_mapping_files, validate_import, MappingFile};
use kurodlc_core::persist::{apply_reassignment, ApplyOptions};
use kurodlc_core::source::{
    detect_sources, select_source, DefaultSourceLoader, LoadedSource, SourceCandidate, SourceLoader,
    SourceSelection,
};
use kurodlc_core::{
    apply, detect, plan, timestamp, ConfigFile, DlcDocument, FilePlan, IdRange, ResolverError,
    ResolverSettings, Result, SourceKind,
};

mod prompt;
mod report;

use report::Tally;

#[derive(Debug, Parser)]
#[command(
    name = "kurodlc-resolve",
    version,
    about = "Detect and repair item ID conflicts between .kurodlc.json mods and the game item table"
)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    /// Directory holding the .kurodlc.json files and the item source.
    #[arg(long, global = true, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Config file to use instead of kurodlc_resolver.json in the directory.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Force the item source: json, tbl, original, p3a or zzz.
    #[arg(long, global = true, value_name = "TYPE")]
    source: Option<SourceKind>,

    /// Never prompt; take the first source and the newest mapping file.
    #[arg(long, global = true)]
    no_interactive: bool,

    /// Keep the t_item.tbl extracted from an archive source.
    #[arg(long, global = true)]
    keep_extracted: bool,

    #[arg(long, global = true, value_name = "ID")]
    id_min: Option<u32>,

    #[arg(long, global = true, value_name = "ID")]
    id_max: Option<u32>,

    /// -v for progress, -vv for allocator details.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// List every ID used by each DLC file as [OK] or [BAD].
    Checkbydlc,
    /// Propose new IDs for conflicting ones, then apply, export or import them.
    Repair(RepairArgs),
}

#[derive(Debug, clap::Args)]
struct RepairArgs {
    /// Write the proposed changes, with backups and logs.
    #[arg(long)]
    apply: bool,

    /// Export the proposed changes to id_mapping_<NAME>.json for editing.
    #[arg(
        long,
        value_name = "NAME",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "",
        conflicts_with = "import"
    )]
    export: Option<String>,

    #[arg(long, value_name = "NAME", conflicts_with = "import")]
    export_name: Option<String>,

    /// Apply a previously exported (and possibly edited) mapping file.
    #[arg(long)]
    import: bool,

    #[arg(long, value_name = "FILE", requires = "import")]
    mapping_file: Option<PathBuf>,
}

impl RepairArgs {
    /// `None` when no export was asked for; `Some(None)` for the default name.
    fn requested_export(&self) -> Option<Option<&str>> {
        match (&self.export_name, &self.export) {
            (Some(name), _) => Some(Some(name.as_str())),
            (None, Some(name)) if !name.is_empty() => Some(Some(name.as_str())),
            (None, Some(_)) => Some(None),
            (None, None) => None,
        }
    }
}

fn init_logger(verbosity: u8) -> std::result::Result<(), log::SetLoggerError> {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(io::stderr())
        .apply()
}

fn settings(cli: &Cli) -> Result<ResolverSettings> {
    let dir = match &cli.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let cfg = ConfigFile::load(&dir, cli.config.as_deref())?;
    let mut settings = ResolverSettings::new(dir).with_config(cfg);
    settings.id_range = IdRange::new(
        cli.id_min.unwrap_or(settings.id_range.min),
        cli.id_max.unwrap_or(settings.id_range.max),
    )?;
    settings.keep_extracted |= cli.keep_extracted;
    Ok(settings)
}

fn dlc_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let files = find_dlc_files(dir)?;
    if files.is_empty() {
        return Err(ResolverError::Config(format!(
            "no .kurodlc.json files found in {}",
            dir.display()
        )));
    }
    Ok(files)
}

fn pick_source(cli: &Cli, candidates: &[SourceCandidate]) -> Result<SourceCandidate> {
    let selection = match cli.source {
        Some(kind) => SourceSelection::Forced(kind),
        None if candidates.len() <= 1 || cli.no_interactive => SourceSelection::First,
        None => {
            let options: Vec<String> = candidates
                .iter()
                .map(|c| format!("{} ({})", c.path.display(), c.kind))
                .collect();
            let index = prompt::choose(
                &mut io::stdin().lock(),
                &mut io::stdout(),
                "Multiple item sources found. Select one:",
                &options,
            )?;
            SourceSelection::Index(index)
        }
    };
    select_source(candidates, selection)
}

fn load_source(settings: &ResolverSettings, candidate: &SourceCandidate) -> Result<LoadedSource> {
    let loader = DefaultSourceLoader::new(&settings.tools, settings.keep_extracted);
    let source = loader.load(candidate)?;
    println!("Source loaded: {} ({} items)", source.info, source.ids.len());
    Ok(source)
}

/// Prints the per-file reports and the overall summary.
fn print_reports(documents: &[DlcDocument], source: &LoadedSource, plans: &[FilePlan]) {
    let width = source.ids.max_label_width();
    let mut overall = Tally::default();
    for doc in documents {
        println!("\nProcessing file: {}\n", doc.display_name());
        let records = detect(std::slice::from_ref(doc), &source.ids);
        let plan = plans.iter().find(|p| doc.path() == p.path);
        let (text, tally) = report::file_report(&records, width, plan);
        print!("{text}");
        overall.add(tally);
    }
    print!("{}", report::overall_report(overall, &source.info.to_string()));
}

fn apply_plans(
    documents: &[DlcDocument],
    plans: &[FilePlan],
    settings: &ResolverSettings,
) -> Result<()> {
    let ts = timestamp();
    let options = ApplyOptions {
        timestamp: &ts,
        summary_log: &settings.summary_log,
    };
    println!("\nApplying changes...\n");
    for file in plans {
        let Some(doc) = documents.iter().find(|d| d.path() == file.path) else {
            log::warn!("{} is no longer loaded, skipped", file.path.display());
            continue;
        };
        let reassignment = apply(doc, &file.mapping());
        if reassignment.is_empty() {
            log::warn!("{}: none of the mapped IDs occur, skipped", file.path.display());
            continue;
        }
        let applied = apply_reassignment(&reassignment, &options)?;
        print!("{}", report::applied_report(&applied));
    }
    println!("\nSummary log: {}", settings.summary_log.display());
    Ok(())
}

fn check(cli: &Cli, settings: &ResolverSettings) -> Result<()> {
    let files = dlc_files(&settings.working_dir)?;
    let source = load_source(settings, &pick_source(cli, &detect_sources(&settings.working_dir))?)?;
    let (documents, _) = load_documents(&files);
    print_reports(&documents, &source, &[]);
    Ok(())
}

fn repair(cli: &Cli, args: &RepairArgs, settings: &ResolverSettings) -> Result<()> {
    if args.import {
        return import(cli, args, settings);
    }
    let dir = &settings.working_dir;
    let files = dlc_files(dir)?;
    let source = load_source(settings, &pick_source(cli, &detect_sources(dir))?)?;
    let (documents, _) = load_documents(&files);

    let plan = plan(&documents, &source.ids, &source.info, settings.id_range)?;
    print_reports(&documents, &source, &plan.files);

    if plan.is_empty() {
        println!("\nNo conflicts found, nothing to repair.");
        return Ok(());
    }
    println!(
        "\n{} conflicting ID(s) in {} file(s) get new IDs from {}-{}.",
        plan.change_count(),
        plan.files.len(),
        plan.range.min,
        plan.range.max
    );

    let export = args.requested_export();
    if let Some(name) = export {
        let file_name = export_file_name(name, &timestamp())?;
        let path = dir.join(&file_name);
        let generated = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        MappingFile::from_plan(&plan, dir, &generated).write(&path)?;
        println!("\nMapping exported to {}", path.display());
        println!(
            "Edit the new_id values, then run: \
             kurodlc-resolve repair --import --mapping-file={file_name}"
        );
    }

    if args.apply {
        apply_plans(&documents, &plan.files, settings)?;
    } else if export.is_none() {
        println!(
            "\nPreview only. Re-run with --apply to write these changes \
             or --export to edit them first."
        );
    }
    Ok(())
}

fn pick_mapping(cli: &Cli, dir: &Path) -> Result<PathBuf> {
    let mut found = find_mapping_files(dir)?;
    if found.len() > 1 && !cli.no_interactive {
        let options: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap_or_default().to_string_lossy().into_owned())
            .collect();
        let index = prompt::choose(
            &mut io::stdin().lock(),
            &mut io::stdout(),
            "Multiple mapping files found. Select one:",
            &options,
        )?;
        return Ok(found.swap_remove(index));
    }
    found.pop().ok_or_else(|| ResolverError::Mapping {
        path: dir.to_path_buf(),
        reason: "no id_mapping_*.json file found; export one first or pass --mapping-file"
            .to_string(),
    })
}

fn import(cli: &Cli, args: &RepairArgs, settings: &ResolverSettings) -> Result<()> {
    let dir = &settings.working_dir;
    let mapping_path = match &args.mapping_file {
        Some(path) if path.is_relative() && !path.exists() => dir.join(path),
        Some(path) => path.clone(),
        None => pick_mapping(cli, dir)?,
    };
    let mapping = MappingFile::read(&mapping_path)?;
    println!(
        "Importing {} mapping(s) from {}",
        mapping.mappings.len(),
        mapping_path.display()
    );

    let candidate = match (cli.source, mapping.saved_source(dir)) {
        (None, Some(saved)) => saved,
        _ => pick_source(cli, &detect_sources(dir))?,
    };
    let source = load_source(settings, &candidate)?;
    let files = dlc_files(dir)?;
    let (documents, _) = load_documents(&files);

    let outcome = validate_import(&mapping, &mapping_path, &documents, &source.ids, dir);
    for warning in &outcome.warnings {
        log::warn!("{warning}");
        println!("\nWarning: {warning}");
    }
    for (path, errors) in &outcome.rejected {
        println!("\n{} left unchanged:", path.display());
        for error in errors {
            println!("  {error}");
        }
    }

    if outcome.accepted.is_empty() {
        println!("\nNo valid mappings to apply.");
    } else {
        apply_plans(&documents, &outcome.accepted, settings)?;
    }

    if outcome.rejected.is_empty() {
        return Ok(());
    }
    Err(ResolverError::Mapping {
        path: mapping_path,
        reason: format!(
            "{} error(s) in {} file(s); fix the mapping and import again",
            outcome.error_count(),
            outcome.rejected.len()
        ),
    })
}

fn run(cli: &Cli) -> Result<()> {
    let settings = settings(cli)?;
    log::info!(
        "working in {} with ID range {}-{}",
        settings.working_dir.display(),
        settings.id_range.min,
        settings.id_range.max
    );
    match &cli.mode {
        Mode::Checkbydlc => check(cli, &settings),
        Mode::Repair(args) => repair(cli, args, &settings),
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = init_logger(cli.verbose) {
        eprintln!("Warning: logging disabled: {err}");
    }

    if let Err(err) = run(&cli) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repair_args(args: &[&str]) -> RepairArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.mode {
            Mode::Repair(args) => args,
            other => panic!("expected repair, got {other:?}"),
        }
    }

    #[test]
    fn export_flag_forms() {
        assert_eq!(repair_args(&["k", "repair"]).requested_export(), None);
        assert_eq!(repair_args(&["k", "repair", "--export"]).requested_export(), Some(None));
        assert_eq!(
            repair_args(&["k", "repair", "--export=DLC1"]).requested_export(),
            Some(Some("DLC1"))
        );
        assert_eq!(
            repair_args(&["k", "repair", "--export", "--export-name=Mine"]).requested_export(),
            Some(Some("Mine"))
        );
    }

    #[test]
    fn import_cannot_be_combined_with_export() {
        assert!(Cli::try_parse_from(["k", "repair", "--import", "--export"]).is_err());
        assert!(Cli::try_parse_from(["k", "repair", "--import", "--export-name=x"]).is_err());
        assert!(Cli::try_parse_from(["k", "repair", "--mapping-file=m.json"]).is_err());
        assert!(Cli::try_parse_from(["k", "repair", "--import", "--mapping-file=m.json"]).is_ok());
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli =
            Cli::try_parse_from(["k", "checkbydlc", "--source=tbl", "--id-min=3000", "-vv"])
                .unwrap();
        assert_eq!(cli.source, Some(SourceKind::Tbl));
        assert_eq!(cli.id_min, Some(3000));
        assert_eq!(cli.verbose, 2);
        assert!(Cli::try_parse_from(["k", "checkbydlc", "--source=bogus"]).is_err());
    }
}
