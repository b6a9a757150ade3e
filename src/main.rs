//! mboxmerge - Command-line entry point
//!
//! Reads record sets serialized as JSON arrays of `EmailRecord`, runs the
//! merge, import or export services and prints the resulting counts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use mboxmerge::config::{Settings, SortOrder, Threshold};
use mboxmerge::dedup::ClusteringStrategy;
use mboxmerge::progress::{CancellationToken, Progress, RunControl};
use mboxmerge::services::{ExportFormat, MergeSource};
use mboxmerge::{EmailRecord, ExportService, ImportService, MergeService};

#[derive(Parser)]
#[command(
    name = "mboxmerge",
    about = "Merge, deduplicate and export email archives",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge several record sets into one deduplicated collection.
    Merge {
        /// JSON files holding arrays of records, one per source.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Where to export the merged records.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Export format.
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
        /// Similarity threshold in (0, 1].
        #[arg(long)]
        threshold: Option<f64>,
        /// Ordering of the merged records.
        #[arg(long, value_enum)]
        sort: Option<SortArg>,
        /// Concatenate without removing duplicates.
        #[arg(long)]
        keep_duplicates: bool,
        /// Do not record which source each record came from.
        #[arg(long)]
        no_source_info: bool,
        /// Group by connected components instead of around seeds.
        #[arg(long)]
        transitive: bool,
        /// Write a JSON report of the collapsed groups.
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Add new records to an existing merged set by signature.
    Import {
        #[arg(long)]
        existing: PathBuf,
        #[arg(long)]
        incoming: PathBuf,
        /// Where to write the combined records as JSON.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Export a record set without merging.
    Export {
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
    },

    /// Print the effective settings.
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Mbox,
    Eml,
}

impl From<FormatArg> for ExportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Mbox => ExportFormat::Mbox,
            FormatArg::Eml => ExportFormat::Eml,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    DateAscending,
    DateDescending,
    Sender,
    Subject,
    None,
}

impl From<SortArg> for SortOrder {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::DateAscending => SortOrder::DateAscending,
            SortArg::DateDescending => SortOrder::DateDescending,
            SortArg::Sender => SortOrder::Sender,
            SortArg::Subject => SortOrder::Subject,
            SortArg::None => SortOrder::None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = load_settings(cli.config.as_deref())?;
    let control = cancellable_control();

    match cli.command {
        Commands::Merge {
            inputs,
            output,
            format,
            threshold,
            sort,
            keep_duplicates,
            no_source_info,
            transitive,
            report,
        } => {
            let mut options = settings.merge;
            if let Some(threshold) = threshold {
                options.duplicate_threshold = Threshold::new(threshold)?;
            }
            if let Some(sort) = sort {
                options.sort_order = sort.into();
            }
            if keep_duplicates {
                options.remove_duplicates = false;
            }
            if no_source_info {
                options.preserve_source_info = false;
            }
            if transitive {
                options.clustering = ClusteringStrategy::Transitive;
            }

            let mut sources = Vec::with_capacity(inputs.len());
            for path in &inputs {
                sources.push(MergeSource::new(source_label(path), read_records(path)?));
            }

            let service = Arc::new(MergeService::new(options));
            let result = service
                .merge_in_background(sources, control.clone())
                .await?;

            println!(
                "merged {} records into {} ({} duplicates removed in {} groups)",
                result.total_before,
                result.total_after,
                result.duplicates_removed,
                result.duplicate_groups.len()
            );

            if let Some(path) = report {
                let json = serde_json::to_string_pretty(&result.report())?;
                std::fs::write(&path, json)
                    .with_context(|| format!("writing report to {}", path.display()))?;
            }
            if let Some(path) = output {
                let format = resolve_format(format, &settings);
                export(&result.records, &path, format, &control)?;
            }
        }

        Commands::Import {
            existing,
            incoming,
            output,
        } => {
            let existing = read_records(&existing)?;
            let incoming = read_records(&incoming)?;

            let service = Arc::new(ImportService::new(settings.merge));
            let result = service
                .import_in_background(existing, incoming, control)
                .await?;

            println!(
                "added {} new records, skipped {} duplicates ({} total)",
                result.new_emails_added,
                result.duplicates_skipped,
                result.records.len()
            );

            if let Some(path) = output {
                let json = serde_json::to_string_pretty(&result.records)?;
                std::fs::write(&path, json)
                    .with_context(|| format!("writing records to {}", path.display()))?;
            }
        }

        Commands::Export {
            input,
            output,
            format,
        } => {
            let records = read_records(&input)?;
            let format = resolve_format(format, &settings);
            export(&records, &output, format, &control)?;
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }

    Ok(())
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Settings::default_path()?,
    };
    Ok(Settings::load_or_default(&path)?)
}

/// Builds a control that logs progress and cancels on Ctrl-C.
fn cancellable_control() -> RunControl {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    RunControl::new()
        .with_cancellation(token)
        .with_progress(|p: Progress| {
            tracing::debug!(
                phase = ?p.phase,
                percent = (p.fraction() * 100.0).round(),
                "progress"
            );
        })
}

fn read_records(path: &Path) -> Result<Vec<EmailRecord>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading records from {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing records in {}", path.display()))
}

fn source_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn resolve_format(format: Option<FormatArg>, settings: &Settings) -> ExportFormat {
    format.map(ExportFormat::from).unwrap_or(settings.export.format)
}

fn export(
    records: &[EmailRecord],
    path: &Path,
    format: ExportFormat,
    control: &RunControl,
) -> Result<()> {
    let summary = ExportService::new().export(records, path, format, control)?;
    println!(
        "exported {} records as {} to {}",
        summary.records_written,
        summary.format,
        path.display()
    );
    Ok(())
}
