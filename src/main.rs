mod calendar;
mod config;
mod context;
mod models;
mod pipeline;
mod rebalance;
mod scheduler;
mod storage;
mod upstream;
mod utils;

use anyhow::{bail, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::context::AppContext;
use crate::models::{RebalanceEvent, StockSummary};
use crate::pipeline::Pipeline;
use crate::rebalance::Rebalancer;
use crate::scheduler::Scheduler;
use crate::storage::{CacheTable, Repository};
use crate::utils::{clip, fmt_rate, Timer};

#[derive(Parser)]
#[command(name = "combo-rank-engine", about = "Portfolio rank crawler and rebalance tracker", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh on a timer until Ctrl-C
    Run,

    /// Run one refresh cycle and store the snapshot
    Refresh,

    /// Show the current rank snapshot (refreshes if none is cached)
    Ranks {
        /// Entries shown per list
        #[arg(short, long, default_value_t = 3)]
        top: usize,

        /// Show the stored snapshot of this day (YYYY-MM-DD) instead. Day
        /// entries are kept for `expire_window_secs` after their last save.
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// List buy/sell events of ranked portfolios
    Rebalances {
        /// Calendar days before today to start from
        #[arg(long, default_value_t = 0)]
        days_back: u32,

        /// Number of consecutive days to search
        #[arg(long, default_value_t = 1)]
        window: u32,

        /// Fetch the rank lists fresh instead of using the cached snapshot
        #[arg(long)]
        no_cache: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Per-stock buy/sell summary with rank badges
    Summary {
        #[arg(long, default_value_t = 0)]
        days_back: u32,

        #[arg(long, default_value_t = 1)]
        window: u32,
    },

    /// Show one portfolio's holdings
    Portfolio {
        /// Numeric portfolio id
        id: String,
    },

    /// Remove expired cache entries
    Sweep,

    /// Apply schema migrations only
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "combo_rank_engine=info,warn",
        1 => "combo_rank_engine=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    if let Command::Migrate = cli.command {
        Repository::open(&config.storage.db_path)?.run_migrations()?;
        println!("Migrations applied.");
        return Ok(());
    }

    let ctx = AppContext::build(config)?;

    match cli.command {
        Command::Run => {
            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Ctrl-C received, shutting down");
                    let _ = tx.send(true);
                }
            });
            Scheduler::new(ctx).run(rx).await?;
        }

        Command::Refresh => {
            let t = Timer::start("Manual refresh");
            match Pipeline::new(ctx).refresh().await? {
                Some(snap) => println!(
                    "Saved {} records across {} lists in {:.2?}",
                    snap.total_records,
                    snap.categories.len(),
                    t.elapsed()
                ),
                None => bail!("No rank list returned any data"),
            }
        }

        Command::Ranks { top, date } => {
            let snap = match date {
                Some(day) => match ctx.snapshots.load_dated(day)? {
                    Some(snap) => snap,
                    None => {
                        println!("No snapshot stored for {}.", day);
                        return Ok(());
                    }
                },
                None => Pipeline::new(ctx).get_or_refresh().await,
            };
            if snap.is_empty() {
                println!("No rank data available.");
                return Ok(());
            }
            println!("─────────────────────────────────────────────");
            println!("  Rank snapshot {}  ({} records)", snap.timestamp.format("%Y-%m-%d %H:%M:%S"), snap.total_records);
            println!("─────────────────────────────────────────────");
            for (category, entries) in &snap.categories {
                println!("  {} ({} entries)", category.display_name(), entries.len());
                for e in entries.iter().take(top) {
                    println!(
                        "    {:>3}. {:<24} {:>10}  {}",
                        e.rank,
                        clip(&e.name, 24),
                        fmt_rate(e.rate.as_deref()),
                        e.portfolio_id
                    );
                }
            }
        }

        Command::Rebalances { days_back, window, no_cache, format } => {
            let _t = Timer::start("Rebalance listing");
            let events = Rebalancer::new(ctx).rebalance_events(days_back, window, !no_cache).await;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&events)?),
                OutputFormat::Csv => write_csv(&events)?,
            }
        }

        Command::Summary { days_back, window } => {
            let _t = Timer::start("Stock summary");
            let summary = Rebalancer::new(ctx).stock_summary(days_back, window).await;
            print_summary(&summary);
        }

        Command::Portfolio { id } => match Rebalancer::new(ctx).portfolio_detail(&id).await? {
            Some(lookup) => println!("{}", serde_json::to_string_pretty(&lookup)?),
            None => {
                warn!("Portfolio {} unavailable", id);
                println!("Portfolio {} not found.", id);
            }
        },

        Command::Sweep => {
            let now = Local::now().naive_local();
            let ranks = ctx.snapshots.sweep(now)?;
            let portfolios = ctx.portfolios.sweep(now)?;
            println!("Removed {} dated snapshots, {} portfolio entries.", ranks, portfolios);
            println!(
                "Remaining: {} rank keys, {} portfolio entries.",
                ctx.repo.count(CacheTable::Rank)?,
                ctx.repo.count(CacheTable::Portfolio)?
            );
        }

        // handled before the context is built
        Command::Migrate => {}
    }

    Ok(())
}

fn write_csv(events: &[RebalanceEvent]) -> Result<()> {
    let mut w = csv::Writer::from_writer(std::io::stdout());
    for ev in events {
        w.serialize(ev)?;
    }
    w.flush()?;
    Ok(())
}

fn print_summary(summary: &[StockSummary]) {
    if summary.is_empty() {
        println!("No rebalances in range.");
        return;
    }
    for s in summary {
        println!("{} {}  buy {} / sell {}", s.stock_code, s.stock_name, s.buy_count(), s.sell_count());
        for (side, portfolios) in [("+", &s.buy_portfolios), ("-", &s.sell_portfolios)] {
            for p in portfolios {
                let badges: Vec<String> = p.badges.iter().map(ToString::to_string).collect();
                println!("    {} {:<24} {}", side, clip(&p.name, 24), badges.join(", "));
            }
        }
    }
}
