//! upload_pending - re-upload locally saved alerts that never reached the backend.
//!
//! Walks `<capture_dir>/*_fall.jpg` (ignoring `_pre_fall` directories), skips
//! alerts whose sidecar records a successful upload unless `--all` is given,
//! and runs the same single-attempt upload the daemon uses.

use anyhow::Result;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use fallwatch::config::FallwatchConfig;
use fallwatch::{CaptureStore, EventDispatcher, HttpUploader, ReconcileDefaults};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "upload_pending", about = "Upload saved fall images that were not sent")]
struct Args {
    /// Capture directory (defaults to the configured one).
    #[arg(long, env = "FALLWATCH_CAPTURE_DIR", value_name = "DIR")]
    capture_dir: Option<PathBuf>,

    /// Fall-event endpoint (defaults to the configured one).
    #[arg(long, env = "FALLWATCH_SERVER_URL", value_name = "URL")]
    server_url: Option<String>,

    /// Upload every saved alert, including ones already sent.
    #[arg(long)]
    all: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_args(&args.ui, std::io::stderr().is_terminal());

    let mut cfg = FallwatchConfig::load()?;
    if let Some(dir) = args.capture_dir {
        cfg.capture_dir = dir;
    }
    if let Some(url) = args.server_url {
        cfg.upload.url = url;
    }
    cfg.validate()?;

    if !cfg.capture_dir.is_dir() {
        println!("upload_pending: {} does not exist, nothing to do", cfg.capture_dir.display());
        return Ok(());
    }

    let store = CaptureStore::open(&cfg.capture_dir)?;
    let uploader = Arc::new(HttpUploader::new(cfg.upload.url.clone(), cfg.upload.timeout)?);
    let dispatcher = EventDispatcher::new(store, uploader);
    let defaults = ReconcileDefaults {
        location: cfg.location.clone(),
        description: cfg.description.clone(),
    };

    let candidates = dispatcher.reconcile_candidates(args.all)?;
    println!(
        "upload_pending: {} alert(s) to upload from {} to {}",
        candidates.len(),
        cfg.capture_dir.display(),
        cfg.upload.url
    );
    if candidates.is_empty() {
        return Ok(());
    }

    let (mut succeeded, mut failed) = (0usize, 0usize);
    {
        let mut progress = ui.progress("Uploading", candidates.len() as u64);
        for alert in candidates {
            let stem = alert.stem.clone();
            let result = dispatcher.reconcile_one(alert, &defaults);
            if result.success {
                succeeded += 1;
            } else {
                failed += 1;
            }
            progress.step(&stem, result.success);
        }
    }

    println!();
    println!("upload_pending: {} succeeded, {} failed", succeeded, failed);
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
