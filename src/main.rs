//! Botgraph - Main Entry Point
//!
//! CLI for the strategy execution core: validate strategy graphs, run
//! paper sessions against the in-process mock feed and venue, and inspect
//! persisted sessions and the execution ledger.

use anyhow::{Context, Result};
use botgraph::config::AppConfig;
use botgraph::execution::{MockMarketFeed, MockVenue, MockVenueBehavior};
use botgraph::ledger::{ExecutionLedger, LogFilter, LogLevel, TradeFilter};
use botgraph::market::CandleInterval;
use botgraph::notify::LogNotifier;
use botgraph::persistence::SessionStore;
use botgraph::session::{
    ExecutionFrequency, ExecutionMode, ExecutionService, ServiceDeps, StartSessionSpec,
};
use botgraph::strategy::{Strategy, StrategyExport};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Botgraph CLI
#[derive(Parser)]
#[command(name = "botgraph")]
#[command(version, about = "Strategy-graph execution engine for trading bots")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a strategy graph file
    Validate {
        /// Path to a strategy export (JSON)
        #[arg(short, long)]
        file: String,
    },

    /// Run a paper-trading session against the mock feed and venue
    Run {
        /// Path to a strategy export (JSON)
        #[arg(short, long)]
        file: String,

        /// Tick interval in milliseconds
        #[arg(short, long, default_value = "1000")]
        interval_ms: u64,

        /// How long to run before stopping (seconds)
        #[arg(short, long, default_value = "30")]
        duration_secs: u64,

        /// Synthetic base price for seeded market history
        #[arg(short, long, default_value = "100")]
        base_price: f64,
    },

    /// Show persisted sessions and recent ledger activity
    Status {
        /// Show recent trades and error logs per session
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Commands::Validate { file } => run_validate(&file),
        Commands::Run {
            file,
            interval_ms,
            duration_secs,
            base_price,
        } => run_paper_session(&file, interval_ms, duration_secs, base_price).await,
        Commands::Status { verbose } => run_status(verbose),
    }
}

fn load_strategy(path: &str) -> Result<Strategy> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read strategy file {}", path))?;
    let export: StrategyExport =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path))?;
    Strategy::import(export, Uuid::new_v4())
        .map_err(|report| anyhow::anyhow!("strategy validation failed: {}", report))
}

fn run_validate(path: &str) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read strategy file {}", path))?;
    let export: StrategyExport =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path))?;

    let name = export.name.clone();
    match Strategy::import(export, Uuid::new_v4()) {
        Ok(strategy) => {
            let report = strategy.validate();
            info!(
                "✅ '{}' is valid ({} elements, root '{}')",
                name,
                strategy.element_count(),
                strategy.root_element_id
            );
            for warning in &report.warnings {
                warn!(
                    "   ⚠️  [{}] {}",
                    warning.element_id.as_deref().unwrap_or("-"),
                    warning.message
                );
            }
            Ok(())
        }
        Err(report) => {
            error!("❌ '{}' failed validation:", name);
            for issue in &report.errors {
                error!(
                    "   [{}] {}",
                    issue.element_id.as_deref().unwrap_or("-"),
                    issue.message
                );
            }
            anyhow::bail!("{} validation errors", report.errors.len())
        }
    }
}

async fn run_paper_session(
    path: &str,
    interval_ms: u64,
    duration_secs: u64,
    base_price: f64,
) -> Result<()> {
    info!("📝 PAPER TRADING MODE - mock feed and venue, no real funds");

    let app = AppConfig::load()?;
    let strategy = load_strategy(path)?;
    let base = Decimal::from_f64_retain(base_price).unwrap_or(dec!(100));

    // Seed the mock collaborators with a synthetic price path.
    let feed = MockMarketFeed::new(CandleInterval::OneHour);
    let venue = MockVenue::new(MockVenueBehavior::Fill);
    for pair in &app.execution.trading_pairs {
        feed.seed_synthetic(pair, base, 120).await;
        venue.set_price(pair, base).await;
    }

    ensure_parent_dir(&app.ledger_db)?;
    ensure_parent_dir(&app.session_db)?;
    let ledger = Arc::new(ExecutionLedger::open(&app.ledger_db)?);
    let store = Arc::new(SessionStore::open(&app.session_db)?);

    let service = ExecutionService::new(ServiceDeps {
        feed: Arc::new(feed),
        real_venue: None,
        paper_venue: Arc::new(venue),
        ledger: ledger.clone(),
        store: Some(store),
        notifier: Arc::new(LogNotifier),
    });

    let spec = StartSessionSpec {
        bot_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        mode: ExecutionMode::Paper,
        frequency: ExecutionFrequency::Interval { interval_ms },
        wallet_id: None,
        config: app.execution.clone(),
    };

    let session = service.start_session(spec, strategy).await?;
    info!(
        "🚀 Session {} started (interval {}ms, {} pairs)",
        session.id,
        interval_ms,
        app.execution.trading_pairs.len()
    );

    // Run until the duration elapses or the operator interrupts.
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(duration_secs)) => {
            info!("⏱️  Run duration elapsed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Interrupt received, stopping session");
        }
    }

    let stopped = service.stop(session.id).await?;
    let metrics = service.metrics(session.id);

    info!("👋 Session {} stopped", stopped.id);
    info!(
        "📊 Ticks: {} ({} ok, {} failed) | Trades: {} completed, {} failed",
        stopped.execution_count,
        stopped.successful_executions,
        stopped.failed_executions,
        metrics.completed_trades,
        metrics.failed_trades,
    );
    info!(
        "💰 P/L: ${:.2} ({:.2}%) | Win rate: {:.1}% | Fees: ${:.2}",
        stopped.total_profit_usd,
        stopped.total_profit_pct * dec!(100),
        metrics.win_rate_pct,
        metrics.total_fees_usd,
    );
    Ok(())
}

fn run_status(verbose: bool) -> Result<()> {
    let app = AppConfig::load()?;
    let store = SessionStore::open(&app.session_db)?;
    let ledger = ExecutionLedger::open(&app.ledger_db)?;

    let sessions = store.list_all_sessions()?;
    if sessions.is_empty() {
        info!("No persisted sessions at {}", app.session_db);
        return Ok(());
    }

    info!("📊 {} persisted session(s)", sessions.len());
    for session in &sessions {
        info!(
            "   {} [{}] mode={:?} ticks={} ok={} failed={} p/l=${:.2}",
            session.id,
            session.status,
            session.mode,
            session.execution_count,
            session.successful_executions,
            session.failed_executions,
            session.total_profit_usd,
        );

        if verbose {
            let trades = ledger.query_trades(&TradeFilter {
                session_id: Some(session.id),
                limit: Some(5),
                ..Default::default()
            })?;
            for trade in &trades {
                info!(
                    "      trade {} {:?} {} {} @ {} [{:?}]",
                    trade.id,
                    trade.side,
                    trade.amount,
                    trade.pair,
                    trade
                        .price
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    trade.status,
                );
            }
            let errors = ledger.query_logs(&LogFilter {
                session_id: Some(session.id),
                min_level: Some(LogLevel::Error),
                limit: Some(5),
                ..Default::default()
            })?;
            for entry in &errors {
                info!("      {} {}: {}", entry.timestamp, entry.level.as_str(), entry.message);
            }
        }
    }
    Ok(())
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "botgraph.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("botgraph=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}
