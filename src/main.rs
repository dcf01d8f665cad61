mod classify;
mod config;
mod driver;
mod extract;
mod fixture;
mod models;
mod parser;
mod scraper;
mod verify;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::config::{Config, Rules};
use crate::fixture::{FixtureDriver, FixtureSnapshot};
use crate::models::{Message, Order};
use crate::scraper::{CancelFlag, CycleError, CycleReport};

#[derive(Parser)]
#[command(
    name = "order_scraper",
    about = "Chat transcript scraper: virtualized chat pane → consolidated purchase orders"
)]
struct Cli {
    /// JSON config overriding the built-in defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scrape cycle against a transcript snapshot
    Replay {
        /// Snapshot JSON (see tests/fixtures/orders_day.json)
        fixture: PathBuf,
        /// Emit the full report as JSON instead of tables
        #[arg(long)]
        json: bool,
    },
    /// Parse a captured message dump into consolidated orders
    Parse {
        /// JSON array of messages
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Run periodic cycles against a snapshot until ctrl-c
    Watch {
        fixture: PathBuf,
        /// Seconds between cycles
        #[arg(short, long, default_value = "30")]
        interval: u64,
        /// Stop after this many cycles
        #[arg(short = 'n', long)]
        max_cycles: Option<u32>,
    },
    /// Print the built-in default configuration as JSON
    Defaults,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            Config::load(path).with_context(|| format!("loading config {}", path.display()))?
        }
        None => Config::default(),
    };
    let rules = Arc::new(Rules::compile(config)?);

    match cli.command {
        Commands::Replay { fixture, json } => {
            let snapshot = FixtureSnapshot::from_path(&fixture)?;
            let mut driver = FixtureDriver::new(&snapshot);
            let report = match scraper::run_cycle(&mut driver, &rules, &CancelFlag::new()) {
                Ok(report) => report,
                Err(CycleError::DriverLost { source, partial }) => {
                    warn!("cycle aborted, showing partial results: {source}");
                    *partial
                }
            };
            if json {
                print_json(&report.messages, &report.orders)?;
            } else {
                print_report(&report);
            }
        }
        Commands::Parse { input, json } => {
            let raw = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let mut messages: Vec<Message> = serde_json::from_str(&raw)?;
            messages.sort_by_key(|m| m.timestamp);
            classify_all(&rules, &mut messages);
            let outcome = parser::parse_orders(&rules, &mut messages);
            if json {
                print_json(&messages, &outcome.orders)?;
            } else {
                println!("{} messages in dump", messages.len());
                print_orders(&outcome.orders);
                print_unresolved(&outcome.unresolved);
            }
        }
        Commands::Watch {
            fixture,
            interval,
            max_cycles,
        } => {
            let snapshot = FixtureSnapshot::from_path(&fixture)?;
            watch(rules, snapshot, interval, max_cycles).await?;
        }
        Commands::Defaults => {
            println!("{}", serde_json::to_string_pretty(&Config::default())?);
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }
    Ok(())
}

/// Periodic non-overlapping cycles: each one runs to completion on a
/// blocking worker while the timer and the ctrl-c listener stay on the
/// runtime.
async fn watch(
    rules: Arc<Rules>,
    snapshot: FixtureSnapshot,
    interval: u64,
    max_cycles: Option<u32>,
) -> anyhow::Result<()> {
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("stop requested, finishing current cycle");
                cancel.cancel();
            }
        });
    }

    let mut cycle_no = 0u32;
    loop {
        cycle_no += 1;
        let rules = Arc::clone(&rules);
        let snap = snapshot.clone();
        let cycle_cancel = cancel.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut driver = FixtureDriver::new(&snap);
            scraper::run_cycle(&mut driver, &rules, &cycle_cancel)
        })
        .await?;

        match result {
            Ok(report) => {
                println!(
                    "cycle {cycle_no}: {} ({} messages, {} orders, {} unresolved)",
                    report.stop,
                    report.messages.len(),
                    report.orders.len(),
                    report.unresolved.len()
                );
            }
            Err(CycleError::DriverLost { source, partial }) => {
                // Supervised restart: report partials and start fresh next tick.
                warn!(
                    "cycle {cycle_no} lost its handle ({source}); kept {} partial messages",
                    partial.messages.len()
                );
            }
        }

        if cancel.is_cancelled() || max_cycles.is_some_and(|max| cycle_no >= max) {
            break;
        }
        for _ in 0..interval {
            if cancel.is_cancelled() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
    Ok(())
}

fn classify_all(rules: &Rules, messages: &mut [Message]) {
    use indicatif::{ProgressBar, ProgressStyle};

    let pb = ProgressBar::new(messages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len}")
            .unwrap()
            .progress_chars("=> "),
    );
    for message in messages.iter_mut() {
        message.message_type =
            classify::classify(rules, &message.cleaned_content, message.media_type);
        pb.inc(1);
    }
    pb.finish_and_clear();
}

fn print_json(messages: &[Message], orders: &[Order]) -> anyhow::Result<()> {
    let doc = serde_json::json!({ "messages": messages, "orders": orders });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

fn print_report(report: &CycleReport) {
    let s = &report.stats;
    println!("Stop:       {}", report.stop);
    println!("Passes:     {}", s.passes);
    println!("Rows seen:  {}", s.rows_seen);
    println!(
        "Accepted:   {} ({} duplicates, {} integrity, {} outside window, {} skipped rows)",
        s.session.accepted,
        s.session.duplicates,
        s.session.rejected_integrity,
        s.session.outside_window,
        s.skipped_rows
    );

    let mut by_category: BTreeMap<&str, usize> = BTreeMap::new();
    for message in &report.messages {
        *by_category.entry(message.message_type.as_str()).or_default() += 1;
    }
    let summary: Vec<String> = by_category
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect();
    println!("Categories: {}", summary.join(", "));

    print_orders(&report.orders);
    print_unresolved(&report.unresolved);
}

fn print_orders(orders: &[Order]) {
    if orders.is_empty() {
        println!("\nNo orders found.");
        return;
    }
    println!(
        "\n{:>3} | {:<16} | {:>5} | {:<16} | {}",
        "#", "Company", "Items", "First seen", "Contributors"
    );
    println!("{}", "-".repeat(70));
    for (i, order) in orders.iter().enumerate() {
        println!(
            "{:>3} | {:<16} | {:>5} | {:<16} | {}",
            i + 1,
            truncate(&order.company_name, 16),
            order.items_text.len(),
            order.timestamp.format("%d/%m %H:%M").to_string(),
            order.message_ids.len()
        );
        for line in &order.items_text {
            let item = parser::items::parse_line(line);
            println!("      {:>4} x {}", item.quantity, item.product);
        }
        for note in &order.instructions {
            println!("      note: {note}");
        }
    }
}

fn print_unresolved(unresolved: &[parser::BufferedLine]) {
    if unresolved.is_empty() {
        return;
    }
    println!("\nUnresolved lines (no company claimed them):");
    for line in unresolved {
        println!("  [{}] {}", line.message_id, line.text);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{truncated}...")
    }
}
