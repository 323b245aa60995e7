//! RO-Crate Synchronization CLI
//!
//! Command-line tool for exporting dataset versions to RO-Crates and
//! importing crates edited in an external metadata editor.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::debug;

use rocrate_sync::logging::init_logging;
use rocrate_sync::{
    export_to_document, import_version, post_process_external_edits, read_crate_json,
    read_document, validate_for_import, DatasetVersion, DocumentStore, InMemoryCatalog,
    MemoryStore, SyncConfig, SyncError,
};

#[derive(Parser)]
#[command(name = "rocrate-sync")]
#[command(about = "Synchronize dataset metadata with RO-Crates")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a dataset version to a crate
    Export(ExportArgs),
    /// Check an edited crate without importing it
    Validate(ValidateArgs),
    /// Import an edited crate into a dataset version
    Import(ImportArgs),
    /// Normalize a crate against a dataset version
    Postprocess(PostprocessArgs),
}

#[derive(Args)]
struct ExportArgs {
    /// Dataset version (JSON: pid, label, fields, files)
    version: PathBuf,

    /// Field-type catalog (JSON block definitions)
    #[arg(long)]
    catalog: PathBuf,

    /// Previous crate of the version: directory, metadata file or zip
    #[arg(long)]
    previous: Option<PathBuf>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct ValidateArgs {
    /// Edited crate: directory, metadata file or zip
    source: PathBuf,

    /// Field-type catalog (JSON block definitions)
    #[arg(long)]
    catalog: PathBuf,

    /// Previously exported crate, enables the file hash check
    #[arg(long)]
    previous: Option<PathBuf>,

    /// Write the normalized crate here (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct ImportArgs {
    /// Edited crate: directory, metadata file or zip
    source: PathBuf,

    /// Dataset version the crate belongs to
    #[arg(long)]
    version: PathBuf,

    /// Field-type catalog (JSON block definitions)
    #[arg(long)]
    catalog: PathBuf,

    /// Previously exported crate, enables the file hash check
    #[arg(long)]
    previous: Option<PathBuf>,

    /// Write the post-processed crate here
    #[arg(long, value_name = "PATH")]
    crate_output: Option<PathBuf>,

    /// Output file for the updated version (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct PostprocessArgs {
    /// Crate to normalize: directory, metadata file or zip
    source: PathBuf,

    /// Dataset version with persisted row ids
    #[arg(long)]
    version: PathBuf,

    /// Field-type catalog (JSON block definitions)
    #[arg(long)]
    catalog: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, SyncError> {
    let content = fs::read_to_string(path).map_err(|e| SyncError::LoadError {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| SyncError::LoadError {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn to_json(value: &impl serde::Serialize, pretty: bool) -> Result<String, SyncError> {
    let s = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(s)
}

/// Write output to file or stdout
fn write_output(content: &str, output: Option<&PathBuf>, what: &str) -> Result<(), SyncError> {
    match output {
        Some(path) => {
            fs::write(path, content)?;
            eprintln!("Wrote {} to {}", what, path.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}

fn run_export(args: ExportArgs, config: &SyncConfig) -> Result<(), SyncError> {
    let catalog = InMemoryCatalog::from_path(&args.catalog)?;
    let version: DatasetVersion = read_json(&args.version)?;
    let previous = args.previous.as_deref().map(read_document).transpose()?;

    let result = export_to_document(&catalog, &version, previous.as_ref(), &config.export_options())?;
    for warning in &result.warnings {
        eprintln!("Warning: {}", warning);
    }
    eprintln!(
        "Exported {} fields and {} files, {} entities",
        version.fields.len(),
        version.files.len(),
        result.document.len()
    );

    let output = result.document.to_json_string(args.pretty)?;
    write_output(&output, args.output.as_ref(), "crate")
}

fn run_validate(args: ValidateArgs) -> Result<(), SyncError> {
    let catalog = InMemoryCatalog::from_path(&args.catalog)?;
    let raw = read_crate_json(&args.source)?;
    let previous = args.previous.as_deref().map(read_document).transpose()?;

    let report = validate_for_import(&raw, previous.as_ref(), &catalog);
    for (field, value) in &report.new_terms {
        eprintln!("New vocabulary term for '{}': {}", field, value);
    }
    match report.document {
        Some(document) if report.errors.is_empty() => {
            eprintln!("Crate is valid");
            let output = document.to_json_string(args.pretty)?;
            write_output(&output, args.output.as_ref(), "normalized crate")
        }
        _ => Err(SyncError::ImportRejected(report.errors)),
    }
}

fn run_import(args: ImportArgs, config: &SyncConfig) -> Result<(), SyncError> {
    let mut catalog = InMemoryCatalog::from_path(&args.catalog)?;
    let version: DatasetVersion = read_json(&args.version)?;
    let raw = read_crate_json(&args.source)?;

    let label = version.label.clone();
    let mut repo = MemoryStore::new().with_version(version.clone());
    let mut documents = MemoryStore::new();
    if let Some(previous) = args.previous.as_deref() {
        documents.save(&label, &read_document(previous)?)?;
    }

    let outcome = import_version(
        &raw,
        &mut catalog,
        &mut repo,
        &mut documents,
        &version,
        &config.export_options(),
    )?;
    for warning in &outcome.warnings {
        eprintln!("Warning: {}", warning);
    }
    eprintln!("Post-processing: {}", to_json(&outcome.post.stats, false)?);

    if let Some(path) = args.crate_output.as_ref() {
        let crate_json = outcome.post.document.to_json_string(args.pretty)?;
        write_output(&crate_json, Some(path), "crate")?;
    }

    let mut updated = version;
    updated.fields = outcome.fields;
    debug!(fields = updated.fields.len(), "writing updated version");
    write_output(&to_json(&updated, args.pretty)?, args.output.as_ref(), "version")
}

fn run_postprocess(args: PostprocessArgs, config: &SyncConfig) -> Result<(), SyncError> {
    let catalog = InMemoryCatalog::from_path(&args.catalog)?;
    let version: DatasetVersion = read_json(&args.version)?;
    let document = read_document(&args.source)?;

    let outcome = post_process_external_edits(&document, &version, &catalog, &config.scheme());
    for warning in &outcome.warnings {
        eprintln!("Warning: {}", warning);
    }
    eprintln!("{}", to_json(&outcome.stats, false)?);

    let output = outcome.document.to_json_string(args.pretty)?;
    write_output(&output, args.output.as_ref(), "crate")
}

fn run(cli: Cli) -> Result<(), SyncError> {
    let config = SyncConfig::load(cli.config.as_deref())?;
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Export(args) => run_export(args, &config),
        Commands::Validate(args) => run_validate(args),
        Commands::Import(args) => run_import(args, &config),
        Commands::Postprocess(args) => run_postprocess(args, &config),
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        if let SyncError::ImportRejected(issues) = &e {
            for issue in issues {
                eprintln!("  - {}", issue);
            }
        }
        std::process::exit(1);
    }
}
