//! Backup command

use anyhow::{Context, Result};
use cairn_backup::{
    format_bytes, Archive, BackupsConfig, CancellationToken, CompressionLevel, Config, ErrorKind,
    Progress,
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::output;

/// Width of the rendered progress bar, in characters.
const BAR_WIDTH: usize = 25;

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Directory to back up
    pub source: Utf8PathBuf,

    /// Output location (directory or file path)
    #[arg(short, long, default_value = ".")]
    pub output: String,

    /// File of gitignore-style patterns to leave out
    #[arg(long)]
    pub ignore_file: Option<Utf8PathBuf>,

    /// Additional ignore pattern (repeatable)
    #[arg(long)]
    pub ignore: Vec<String>,

    /// Only archive these paths, absolute or relative to the source (repeatable).
    /// Takes priority over ignore patterns.
    #[arg(long)]
    pub file: Vec<Utf8PathBuf>,

    /// Compression level: none, best_speed or best_compression
    #[arg(long)]
    pub compression: Option<String>,

    /// Write limit in MiB/s (0 = unlimited)
    #[arg(long)]
    pub write_limit: Option<i64>,

    /// Show what would be backed up without writing an archive
    #[arg(long)]
    pub dry_run: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: BackupArgs, config_path: Option<&Utf8Path>, quiet: bool) -> Result<()> {
    let silent = quiet || args.json;

    let backups = resolve_settings(&args, config_path)?;
    let ignore = read_ignore_rules(&args)?;
    let files: Vec<PathBuf> = args
        .file
        .iter()
        .map(|f| f.clone().into_std_path_buf())
        .collect();

    let archive = Archive::new(args.source.as_std_path())
        .with_ignore(ignore)
        .with_files(files)
        .with_config(&backups);

    if !silent {
        output::header("Backup Directory");
        output::kv("Source", args.source.as_str());
        output::kv("Compression", &backups.compression_level.to_string());
        match backups.write_limit_mib() {
            0 => output::kv("Write limit", "unlimited"),
            mib => output::kv("Write limit", &format!("{} MiB/s", mib)),
        }
        if !args.file.is_empty() {
            output::kv("Selected paths", &args.file.len().to_string());
        }
        println!();
    }

    let spinner = output::spinner("Analyzing source...", silent);
    let estimate = {
        let archive = archive.clone();
        tokio::task::spawn_blocking(move || archive.estimate_size())
            .await
            .context("size estimate task failed")?
            .with_context(|| format!("Failed to scan {}", args.source))?
    };
    spinner.finish_and_clear();

    if args.dry_run {
        if args.json {
            println!("{}", serde_json::json!({ "estimated_bytes": estimate }));
        } else if !quiet {
            output::kv("Estimated size", &format_bytes(estimate));
            output::success("Dry run complete");
        }
        return Ok(());
    }

    let output_path = resolve_output_path(&args.output);
    let progress = Arc::new(Progress::new(estimate));
    let cancel = CancellationToken::new();
    let archive = archive
        .with_progress(Arc::clone(&progress))
        .with_cancellation(cancel.clone());

    // Ctrl-C stops the job before its next entry.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    if !silent {
        output::info(&format!("Creating backup: {}", output_path.display()));
    }

    let spinner = output::spinner("Archiving...", silent);
    let destination = output_path.clone();
    let mut job = tokio::task::spawn_blocking(move || archive.create(&destination));
    let mut ticker = tokio::time::interval(Duration::from_millis(250));

    let result = loop {
        tokio::select! {
            res = &mut job => break res,
            _ = ticker.tick() => spinner.set_message(progress.render(BAR_WIDTH)),
        }
    };

    let summary = match result.context("backup task failed")? {
        Ok(summary) => {
            complete_progress(&progress);
            spinner.finish_with_message(progress.render(BAR_WIDTH));
            summary
        }
        Err(e) => {
            spinner.finish_and_clear();
            discard_partial(&output_path, &e);
            return Err(e).with_context(|| format!("Backup of {} failed", args.source));
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    if quiet {
        return Ok(());
    }

    println!();
    output::success("Backup created successfully");
    println!();
    output::kv("Location", &summary.archive_path.display().to_string());
    output::kv("Entries", &summary.entries.to_string());
    if summary.skipped > 0 {
        output::warning(&format!("{} entries skipped", summary.skipped));
    }
    output::kv("Size", &format_bytes(summary.size_bytes));
    output::kv("SHA256", &summary.checksum);
    output::kv("Duration", &format!("{:.1}s", summary.duration_seconds));

    Ok(())
}

/// The estimate counts uncompressed bytes and the tracker compressed ones, so
/// a finished job is pinned to its real output size.
fn complete_progress(progress: &Progress) {
    progress.set_total(progress.written());
}

/// Removes what a failed job wrote. When the destination never opened, the
/// path holds someone else's file and is left alone.
fn discard_partial(path: &Path, err: &cairn_backup::Error) {
    if err.kind() == ErrorKind::Destination {
        return;
    }
    if let Err(remove_err) = std::fs::remove_file(path) {
        warn!(error = %remove_err, "failed to remove partial archive");
    }
}

/// Merges the config file with command-line overrides.
fn resolve_settings(args: &BackupArgs, config_path: Option<&Utf8Path>) -> Result<BackupsConfig> {
    let config = match config_path {
        Some(path) => Config::load(path.as_std_path())
            .with_context(|| format!("Failed to load config {}", path))?,
        None => Config::default(),
    };

    let mut backups = config.system.backups;
    if let Some(level) = &args.compression {
        backups.compression_level = CompressionLevel::parse(level);
    }
    if let Some(limit) = args.write_limit {
        backups.write_limit = limit;
    }
    Ok(backups)
}

/// Joins the ignore file (if any) with patterns given on the command line.
fn read_ignore_rules(args: &BackupArgs) -> Result<String> {
    let mut rules = match &args.ignore_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ignore file {}", path))?,
        None => String::new(),
    };
    for pattern in &args.ignore {
        if !rules.is_empty() && !rules.ends_with('\n') {
            rules.push('\n');
        }
        rules.push_str(pattern);
    }
    Ok(rules)
}

/// A directory output gets a timestamped archive name inside it.
fn resolve_output_path(output: &str) -> PathBuf {
    let path = PathBuf::from(output);
    if output == "." || path.is_dir() {
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        path.join(format!("backup-{}.tar.gz", timestamp))
    } else {
        path
    }
}
