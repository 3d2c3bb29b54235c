//! fall_events - list or inspect fall events stored on the backend.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use std::time::Duration;

use fallwatch::config::FallwatchConfig;
use fallwatch::{BackendClient, FallEventRecord};

#[derive(Parser, Debug)]
#[command(name = "fall_events", about = "Query fall events on the backend")]
struct Args {
    /// Fall-event collection URL (defaults to the configured upload URL).
    #[arg(long, env = "FALLWATCH_SERVER_URL", value_name = "URL")]
    server_url: Option<String>,

    /// Print raw JSON instead of a table.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List events, most recent first.
    List {
        /// Only events at or after this time (RFC 3339).
        #[arg(long, value_name = "TIME")]
        start: Option<DateTime<Utc>>,
        /// Only events at or before this time (RFC 3339).
        #[arg(long, value_name = "TIME")]
        end: Option<DateTime<Utc>>,
    },
    /// Show one event.
    Show { id: i64 },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let base = match args.server_url {
        Some(url) => url,
        None => FallwatchConfig::load()?.upload.url,
    };
    let client = BackendClient::new(&base, Duration::from_secs(10))?;

    match args.command {
        Command::List { start, end } => {
            let events = client.list_events(start, end)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&events).context("serialize events")?);
                return Ok(());
            }
            println!("{} event(s)", events.len());
            for event in &events {
                print_row(event);
            }
        }
        Command::Show { id } => {
            let event = client.event_detail(id)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&event).context("serialize event")?);
                return Ok(());
            }
            print_row(&event);
            if !event.description.is_empty() {
                println!("    {}", event.description);
            }
            if let Some(url) = &event.image_url {
                println!("    image: {}", url);
            }
        }
    }
    Ok(())
}

fn print_row(event: &FallEventRecord) {
    println!(
        "  #{:<6} {}  {:<16} {}",
        event.id,
        event
            .effective_time()
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S"),
        event.location,
        if event.is_checked { "checked" } else { "new" }
    );
}
