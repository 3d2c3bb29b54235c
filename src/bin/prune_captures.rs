//! prune_captures - delete local alert artifacts older than a retention window.
//!
//! By default only alerts confirmed as uploaded are removed; unsent alerts are
//! evidence that has not reached the backend yet.

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;

use fallwatch::config::FallwatchConfig;
use fallwatch::storage::{CaptureStore, PruneOptions};

#[derive(Parser, Debug)]
#[command(name = "prune_captures", about = "Delete old local fall captures")]
struct Args {
    /// Capture directory (defaults to the configured one).
    #[arg(long, env = "FALLWATCH_CAPTURE_DIR", value_name = "DIR")]
    capture_dir: Option<PathBuf>,

    /// Remove alerts older than this many days.
    #[arg(long, default_value_t = 365)]
    days: u32,

    /// Also remove alerts that were never uploaded.
    #[arg(long)]
    include_unsent: bool,

    /// Report what would be removed without deleting anything.
    #[arg(long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if args.days == 0 {
        return Err(anyhow!("--days must be at least 1"));
    }

    let capture_dir = match args.capture_dir {
        Some(dir) => dir,
        None => FallwatchConfig::load()?.capture_dir,
    };
    if !capture_dir.is_dir() {
        println!("prune_captures: {} does not exist, nothing to do", capture_dir.display());
        return Ok(());
    }

    let store = CaptureStore::open(&capture_dir)?;
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(args.days));
    let report = store.prune(
        cutoff,
        PruneOptions {
            include_unsent: args.include_unsent,
            dry_run: args.dry_run,
        },
    )?;

    if args.verbose {
        for stem in &report.removed {
            println!("  {}{}", if args.dry_run { "would remove " } else { "removed " }, stem);
        }
    }
    println!(
        "prune_captures: {} alert(s) {} older than {} days ({:.1} MB){}",
        report.removed.len(),
        if args.dry_run { "would be removed" } else { "removed" },
        args.days,
        report.bytes as f64 / (1024.0 * 1024.0),
        if report.kept_unsent > 0 {
            format!(", {} unsent kept (use --include-unsent)", report.kept_unsent)
        } else {
            String::new()
        }
    );
    Ok(())
}
