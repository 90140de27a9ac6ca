use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::time::{interval, MissedTickBehavior};

use kdjbot::api::BinanceMarketData;
use kdjbot::execution::{CycleAction, CycleReport, TradingEngine};
use kdjbot::gateway::{ExchangeGateway, MarketDataProvider, PaperGateway};
use kdjbot::persistence::JsonStateStore;
use kdjbot::settings::{BotConfig, MarketKind};

/// KDJ multi-timeframe trading engine (paper execution)
#[derive(Parser, Debug)]
#[command(name = "kdjbot", version, about)]
struct Args {
    /// TOML config file (defaults to ./kdjbot.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Instrument symbol, e.g. BTCUSDT
    #[arg(short, long)]
    symbol: Option<String>,

    #[arg(short, long, value_enum)]
    market: Option<MarketKind>,

    /// Seconds between evaluation cycles (minimum 10)
    #[arg(short, long)]
    interval: Option<u64>,

    /// Starting paper equity in quote currency
    #[arg(long)]
    equity: Option<f64>,

    /// State file path
    #[arg(long)]
    state: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let args = Args::parse();
    let config = load_config(&args)?;

    tracing::info!("🚀 kdjbot starting");
    tracing::info!("  Symbol: {} ({})", config.symbol, config.market);
    tracing::info!("  Interval: {}s", config.check_interval_secs);
    tracing::info!("  Risk per trade: {:.1}%", config.risk.risk_fraction * 100.0);
    tracing::info!("  Paper equity: ${:.2}", config.paper.initial_equity);
    tracing::info!("  State file: {}", config.state_path().display());

    let provider = BinanceMarketData::new(&config.base_url(), config.market)
        .context("Failed to create market data client")?
        .with_max_retries(config.data.max_retries)
        .with_backoff(config.data.retry_delay());
    let paper = config.paper_config();
    tracing::info!("  Paper fee: {:.3}%", paper.fee_rate.unwrap_or(0.0) * 100.0);
    let gateway = PaperGateway::new(paper);
    let store = JsonStateStore::new(config.state_path());
    let check_interval = config.check_interval();

    let mut engine = TradingEngine::new(config, provider, gateway).with_store(store);
    engine
        .restore()
        .await
        .context("Failed to restore saved state")?;

    if args.once {
        run_once(&mut engine).await;
        engine.shutdown().await?;
        return Ok(());
    }

    let mut ticker = interval(check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!("Press Ctrl+C to stop...");

    loop {
        // Cancellation is only observed between cycles
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("⚠️  Received Ctrl+C, shutting down...");
                break;
            }
            _ = ticker.tick() => {}
        }

        run_once(&mut engine).await;
    }

    engine.shutdown().await?;
    tracing::info!("👋 kdjbot stopped");
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kdjbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &Args) -> Result<BotConfig> {
    let mut config = BotConfig::load(args.config.as_deref()).context("Failed to load config")?;

    if let Some(symbol) = &args.symbol {
        config.symbol = symbol.clone();
    }
    if let Some(market) = args.market {
        config.market = market;
    }
    if let Some(secs) = args.interval {
        config.check_interval_secs = secs;
    }
    if let Some(equity) = args.equity {
        config.paper.initial_equity = equity;
    }
    if args.state.is_some() {
        config.state_path = args.state.clone();
    }

    // CLI overrides go through the same checks as file values
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run_once<M, G>(engine: &mut TradingEngine<M, G>)
where
    M: MarketDataProvider,
    G: ExchangeGateway,
{
    let report = match engine.run_cycle().await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("✗ Cycle failed: {}", e);
            return;
        }
    };
    log_report(&report);

    if let (Some(position), Some(mark)) = (engine.position(), report.mark_price) {
        tracing::info!(
            "  📈 {:?} {:.6} @ ${:.2} | stop ${:.2} | target ${:.2} | P&L {:+.2}%",
            position.side,
            position.quantity,
            position.entry_price,
            position.stop_price,
            position.take_profit_price,
            position.profit_pct(mark)
        );
    }

    let stats = engine.stats();
    if stats.trades > 0 {
        tracing::info!(
            "  💰 Session: {} trades, {:.0}% wins, realized ${:+.2}",
            stats.trades,
            stats.win_rate(),
            stats.realized_pnl
        );
    }
}

fn log_report(report: &CycleReport) {
    for error in &report.errors {
        tracing::warn!("  ✗ {}", error);
    }

    match &report.action {
        CycleAction::Hold => {}
        CycleAction::AwaitingOrder => tracing::info!("  ⏳ Waiting for pending order to resolve"),
        CycleAction::Entry(intent) => tracing::info!(
            "  → Entry {:?} {:.6} @ ~${:.2}",
            intent.side,
            intent.quantity,
            intent.reference_price
        ),
        CycleAction::Exit { reason, intent } => tracing::info!(
            "  → Exit ({:?}) {:.6} @ ~${:.2}",
            reason,
            intent.quantity,
            intent.reference_price
        ),
    }

    if let Some(stop) = report.stop_moved {
        tracing::info!("  🔒 Trailing stop moved to ${:.2}", stop);
    }
    if let Some(closed) = &report.closed {
        tracing::info!(
            "  ✓ Closed {:?} at ${:.2} ({:?}), P&L ${:+.2}",
            closed.position.side,
            closed.exit_price,
            closed.exit_reason,
            closed.realized_pnl
        );
    }
}
