use anyhow::{Context, anyhow};
use api_client::LnMarketsConnector;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use comfy_table::{Table, presets};
use configuration::{Config, LoggingConfig, load_config};
use core_types::{Id, ScheduledSwap, ScheduledTrade, SyncScope, TradeTrigger};
use database::{DbRepository, MemoryRepository, Repository, connect, run_migrations};
use engine::{ScheduleManager, Scheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Scheduled trades and swaps for LN Markets accounts.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Missing files fall back to defaults.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the market, trigger and reconciliation loops until Ctrl-C.
    Run {
        /// Keep everything in memory instead of PostgreSQL.
        #[arg(long)]
        dry_run: bool,
    },
    /// Refresh market data and evaluate every schedule once.
    Tick,
    /// Reconcile trades and balances with the venue.
    Sync {
        /// Only this user; every user with credentials when omitted.
        #[arg(long)]
        user: Option<Id>,
        /// open, running, closed or all.
        #[arg(long, default_value = "all")]
        scope: SyncScope,
    },
    /// List a user's scheduled trades and swaps.
    Schedules {
        #[arg(long)]
        user: Id,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; DATABASE_URL may come from the environment.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = load_config(&cli.config).context("loading configuration")?;
    let _log_guard = init_tracing(&config.logging);

    match cli.command {
        Commands::Run { dry_run } => run(&config, dry_run).await,
        Commands::Tick => tick(&config).await,
        Commands::Sync { user, scope } => sync(&config, user, scope).await,
        Commands::Schedules { user } => schedules(&config, user).await,
    }
}

/// Console output always; a daily rolling file as well when a log directory
/// is configured. `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let console = fmt::layer().with_target(false);

    match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "autotrader.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = fmt::layer().with_writer(writer).with_ansi(false);
            tracing_subscriber::registry().with(filter).with(console).with(file).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(console).init();
            None
        }
    }
}

async fn open_repository(config: &Config, dry_run: bool) -> anyhow::Result<Arc<dyn Repository>> {
    if dry_run {
        warn!("Dry run: schedules and trades live in memory and are lost on exit.");
        return Ok(Arc::new(MemoryRepository::new()));
    }
    let pool = connect(&config.database).await.context("connecting to the database")?;
    run_migrations(&pool).await.context("running database migrations")?;
    Ok(Arc::new(DbRepository::new(pool)))
}

fn build_scheduler(config: &Config, repo: Arc<dyn Repository>) -> Scheduler {
    let connector = Arc::new(LnMarketsConnector::new(config.venue.clone()));
    Scheduler::new(repo, connector, config.scheduler.clone(), config.venue.symbol.clone())
}

async fn run(config: &Config, dry_run: bool) -> anyhow::Result<()> {
    let repo = open_repository(config, dry_run).await?;
    let scheduler = Arc::new(build_scheduler(config, repo));
    let handle = scheduler.start();
    info!(network = %config.venue.network, symbol = %config.venue.symbol, "Scheduler running. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Shutdown requested; waiting for in-flight ticks.");
    if !handle.shutdown().await {
        warn!("Some ticks were still running when the grace period ended.");
    }
    Ok(())
}

async fn tick(config: &Config) -> anyhow::Result<()> {
    let repo = open_repository(config, false).await?;
    let scheduler = build_scheduler(config, repo);
    if let Err(e) = scheduler.run_market_tick().await {
        warn!(error = %e, "Market data refresh failed; using the stored snapshot.");
    }
    let report = scheduler.run_trigger_tick().await;
    println!(
        "evaluated {} | executed {} | unrecorded {} | deferred {} | rejected {} | already claimed {} | failed {}",
        report.evaluated,
        report.executed,
        report.unrecorded,
        report.deferred,
        report.rejected,
        report.already_claimed,
        report.failed
    );
    Ok(())
}

async fn sync(config: &Config, user_id: Option<Id>, scope: SyncScope) -> anyhow::Result<()> {
    let repo = open_repository(config, false).await?;
    let scheduler = build_scheduler(config, repo.clone());

    let Some(user_id) = user_id else {
        let report = scheduler.run_reconciliation_tick(scope).await?;
        println!(
            "{} users ({} failed) | {} trades created | {} updated | {} positions skipped",
            report.users, report.failed_users, report.created, report.updated, report.failed_positions
        );
        return Ok(());
    };

    let user = repo
        .get_user(user_id)
        .await?
        .ok_or_else(|| anyhow!("user #{} not found", user_id))?;
    let summary = scheduler.reconciler().sync_user(&user, scope).await?;
    let (balance, balance_usd) = scheduler.reconciler().sync_balance(&user).await?;
    println!(
        "{}: {} trades created | {} updated | {} positions skipped | balance {} sats (${})",
        user.username, summary.created, summary.updated, summary.failed, balance, balance_usd
    );
    Ok(())
}

async fn schedules(config: &Config, user_id: Id) -> anyhow::Result<()> {
    let repo = open_repository(config, false).await?;
    let manager = ScheduleManager::new(repo, config.scheduler.clone(), config.venue.symbol.clone());
    let (trades, swaps) = manager.list_schedules(user_id).await?;
    println!("{}", trade_table(&trades));
    println!("{}", swap_table(&swaps));
    Ok(())
}

fn trade_table(trades: &[ScheduledTrade]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_header(vec!["ID", "Condition", "Order", "Status", "Trade", "Last checked", "Error"]);
    for schedule in trades {
        let condition = match &schedule.trigger {
            TradeTrigger::Date { scheduled_time } => format!("at {}", scheduled_time.format("%Y-%m-%d %H:%M")),
            TradeTrigger::PriceRange { low, high } => format!("price in [{}, {}]", low, high),
            TradeTrigger::PricePercentage { base_price, percentage } => format!("{}% from {}", percentage, base_price),
        };
        let order = &schedule.order;
        table.add_row(vec![
            schedule.id.to_string(),
            condition,
            format!("{} {} {}", order.instrument, order.side, order.order_type),
            schedule.status.to_string(),
            schedule.executed_trade_id.map(|id| id.to_string()).unwrap_or_default(),
            when(schedule.last_checked_at),
            schedule.error_message.clone().unwrap_or_default(),
        ]);
    }
    table
}

fn swap_table(swaps: &[ScheduledSwap]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_header(vec!["ID", "Name", "Direction", "Amount", "Schedule", "Status", "Last executed"]);
    for schedule in swaps {
        table.add_row(vec![
            schedule.id.to_string(),
            schedule.name.clone(),
            schedule.direction.to_string(),
            schedule.amount.to_string(),
            schedule.trigger.schedule_type().to_string(),
            schedule.status.to_string(),
            when(schedule.last_executed_at),
        ]);
    }
    table
}

fn when(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()).unwrap_or_else(|| "-".to_string())
}
