//! cloudtrim - Free up local disk space in cloud-synced folders.
//!
//! Usage:
//!   cloudtrim scan [PATH]            Scan and show local vs cloud-only files
//!   cloudtrim reclaim <PATHS>...     Turn files into cloud-only placeholders
//!   cloudtrim status <PATH>          Show whether a file is materialized
//!   cloudtrim config show            Show settings
//!   cloudtrim --help                 Show help

mod logging;
mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, eyre};
use tracing::debug;

use cloudtrim_core::{AttributeProbe, NativeProbe, ScanConfig, ScanResult, format_size};
use cloudtrim_ops::{BatchReport, ReclaimConfig, ReclaimEvent, Reclaimer, start_reclaim};
use cloudtrim_scan::{ScanCache, ScanEngine};

use crate::settings::Settings;

const PROGRESS_POLL: Duration = Duration::from_millis(150);

#[derive(Parser)]
#[command(
    name = "cloudtrim",
    version,
    about = "Find materialized files in a cloud-synced folder and free their local space",
    long_about = "cloudtrim scans a synced folder such as OneDrive, shows which files occupy \
                  local disk space and which are cloud-only placeholders, and converts \
                  selected files back into placeholders."
)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a folder and show a space summary
    Scan {
        /// Folder to scan (defaults to the configured root)
        path: Option<PathBuf>,

        /// Directory levels to descend (0 = files in the folder only)
        #[arg(short, long, conflicts_with = "all")]
        depth: Option<u32>,

        /// Descend without a depth limit
        #[arg(short, long)]
        all: bool,

        /// Classify files one at a time
        #[arg(long)]
        sequential: bool,

        /// Number of classification workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,

        /// Number of largest local files to list
        #[arg(short = 'n', long, default_value = "10")]
        top: usize,
    },

    /// Turn files into cloud-only placeholders
    Reclaim {
        /// Files to reclaim
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Synced folder the files live in (defaults to the configured root)
        #[arg(long)]
        root: Option<PathBuf>,

        /// Directory levels of the root to scan first (defaults to the configured depth)
        #[arg(short, long)]
        depth: Option<u32>,

        /// Do not re-check files after the state change
        #[arg(long)]
        no_verify: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show whether a file is local or cloud-only
    Status {
        /// File to check
        path: PathBuf,
    },

    /// Inspect or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the settings file
    Show,
    /// Set the default synced folder
    SetRoot {
        /// Existing directory
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    logging::init();

    let cli = Cli::parse();
    let settings_path = Settings::resolve_path(cli.config)?;
    let mut settings = Settings::load_or_create(&settings_path)?;
    debug!(path = %settings_path.display(), "settings loaded");

    match cli.command {
        Command::Scan {
            path,
            depth,
            all,
            sequential,
            workers,
            format,
            top,
        } => {
            let max_depth = if all {
                None
            } else {
                Some(depth.unwrap_or(settings.default_max_depth))
            };
            let root = settings.root_or(path)?;
            let config = ScanConfig::builder()
                .root(root)
                .max_depth(max_depth)
                .use_threads(settings.default_use_threads && !sequential)
                .max_workers(workers.unwrap_or(settings.default_max_workers))
                .build()
                .wrap_err("Invalid scan options")?;
            run_scan(&settings, config, format, top)?;
        }
        Command::Reclaim {
            paths,
            root,
            depth,
            no_verify,
            format,
        } => {
            let config = reclaim_scan_config(&settings, settings.root_or(root)?, depth);
            run_reclaim(&settings, config, paths, no_verify, format)?;
        }
        Command::Status { path } => {
            run_status(&path)?;
        }
        Command::Config { action } => match action {
            ConfigAction::Show => {
                println!("# {}", settings_path.display());
                print!("{}", toml::to_string_pretty(&settings)?);
            }
            ConfigAction::SetRoot { path } => {
                settings.set_root(&path)?;
                settings.save(&settings_path)?;
                if let Some(root) = &settings.root {
                    println!("Root set to {}", root.display());
                }
            }
        },
    }

    Ok(())
}

fn native_engine(settings: &Settings) -> ScanEngine {
    ScanEngine::new(Arc::new(NativeProbe::new())).with_cache_ttl(Some(settings.cache_ttl()))
}

/// Run a scan on a background thread while reporting progress on stderr.
fn scan_with_progress(engine: &Arc<ScanEngine>, config: ScanConfig) -> Result<ScanResult> {
    eprintln!("Scanning {}...", config.root.display());

    let handle = {
        let engine = Arc::clone(engine);
        thread::spawn(move || engine.start_scan(&config))
    };

    while !handle.is_finished() {
        let progress = engine.poll_progress();
        eprint!(
            "\r {:<50} {:>5.1}% {:>8.0} files/s",
            truncate(&progress.status, 50),
            progress.progress_percent,
            progress.files_per_second()
        );
        thread::sleep(PROGRESS_POLL);
    }
    eprintln!();

    let result = handle
        .join()
        .map_err(|_| eyre!("Scan thread panicked"))?
        .wrap_err("Scan failed")?;
    Ok(result)
}

/// Scan and print a summary.
fn run_scan(settings: &Settings, config: ScanConfig, format: OutputFormat, top_n: usize) -> Result<()> {
    let engine = Arc::new(native_engine(settings));
    let result = scan_with_progress(&engine, config)?;

    match format {
        OutputFormat::Text => print_summary(&result, top_n),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
    }

    Ok(())
}

fn print_summary(result: &ScanResult, top_n: usize) {
    let stats = &result.stats;

    println!();
    println!("{}", "─".repeat(70));
    println!(" {} - {}", result.root_path.display(), stats.human_total_size);
    println!(
        " {} files: {} local ({}), {} cloud-only",
        stats.total_files, stats.local_files, stats.human_local_size, stats.remote_files
    );
    if stats.unverified_files > 0 {
        println!(" {} files could not be verified", stats.unverified_files);
    }
    println!(" Potential savings: {}", stats.potential_savings);
    println!(" Scanned in {:.2}s", result.scan_duration.as_secs_f64());
    println!("{}", "─".repeat(70));

    let largest = result.largest_local(top_n);
    if !largest.is_empty() {
        println!();
        println!(" Largest local files:");
        for record in largest {
            let marker = if record.probe_error.is_some() { "?" } else { " " };
            println!(
                "  {}{:<40} {:>10}  {}",
                marker,
                truncate(&record.name, 40),
                format_size(record.size),
                record.relative_folder
            );
        }
    }

    if result.has_warnings() {
        println!();
        println!("{} warning(s) during scan", result.warnings.len());
    }
}

/// Depth-bounded scan run before a reclamation.
///
/// Files below the depth are untracked; they are still reclaimed, but the
/// local space totals do not include them.
fn reclaim_scan_config(settings: &Settings, root: PathBuf, depth: Option<u32>) -> ScanConfig {
    let mut config =
        ScanConfig::new(root).with_max_depth(Some(depth.unwrap_or(settings.default_max_depth)));
    config.use_threads = settings.default_use_threads;
    config.max_workers = settings.default_max_workers;
    config
}

/// Scan the root, then reclaim the given files with progress on stderr.
fn run_reclaim(
    settings: &Settings,
    config: ScanConfig,
    paths: Vec<PathBuf>,
    no_verify: bool,
    format: OutputFormat,
) -> Result<()> {
    let engine = Arc::new(native_engine(settings));
    let before = scan_with_progress(&engine, config)?;

    let reclaim_config = if no_verify {
        ReclaimConfig::without_verification()
    } else {
        ReclaimConfig::with_verify_delay(settings.verify_delay())
    };
    let reclaimer = Reclaimer::for_engine(&engine).with_config(reclaim_config);

    // Cached records are keyed by canonical path
    let paths: Vec<PathBuf> = paths
        .into_iter()
        .map(|p| p.canonicalize().unwrap_or(p))
        .collect();

    let runtime = tokio::runtime::Runtime::new().wrap_err("Failed to start runtime")?;
    let report = runtime.block_on(async move {
        let mut rx = start_reclaim(reclaimer, paths);
        let mut report = None;
        while let Some(event) = rx.recv().await {
            match event {
                ReclaimEvent::Progress(progress) => {
                    let current = progress
                        .current_file
                        .as_deref()
                        .and_then(Path::file_name)
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    eprint!(
                        "\r [{}/{}] {:<50}",
                        progress.completed,
                        progress.total,
                        truncate(&current, 50)
                    );
                }
                ReclaimEvent::Complete(done) => report = Some(done),
            }
        }
        eprintln!();
        report
    });
    let report = report.ok_or_else(|| eyre!("Reclamation ended without a report"))?;

    match format {
        OutputFormat::Text => {
            print_report(&report);
            if let Some(after) = engine.cache().stats() {
                println!(
                    " Local space: {} -> {}",
                    before.stats.human_local_size, after.human_local_size
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if report.success() {
        Ok(())
    } else {
        Err(eyre!("No file was reclaimed"))
    }
}

fn print_report(report: &BatchReport) {
    println!();
    for entry in &report.results {
        let mark = if entry.success { "ok  " } else { "FAIL" };
        println!(" {} {}: {}", mark, entry.path.display(), entry.message);
        if let Some(warning) = &entry.warning {
            println!("      warning: {warning}");
        }
    }
    println!();
    println!(" {}", report.summary());
}

/// Probe one file and print its state.
fn run_status(path: &Path) -> Result<()> {
    let path = path.canonicalize().wrap_err("Invalid path")?;
    let probe: Arc<dyn AttributeProbe> = Arc::new(NativeProbe::new());
    let reclaimer = Reclaimer::new(ScanCache::default(), probe);

    let status = reclaimer.verify_status(&path)?;
    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    println!("{}: {} ({})", path.display(), status, format_size(size));
    Ok(())
}

/// Truncate a string to max length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
