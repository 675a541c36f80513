//! perp-pilot entry point.
//!
//! Wires the gateway, state store, notifier, and lifecycle controller, then
//! runs two independent schedules: a candle poll that feeds the per-symbol
//! trackers (and opens positions on signals), and a fixed-interval
//! reconciliation sweep over every stored position. On restart the store is
//! reloaded and fully reconciled before any new entry is accepted, so
//! migrations interrupted by a crash are resumed, not abandoned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use perp_pilot::config::Config;
use perp_pilot::exchange::{BybitClient, ExecutionGateway};
use perp_pilot::lifecycle::{CandleTracker, StateStore, TradeLifecycleController};
use perp_pilot::notify::{LogSink, Notifier, TelegramSink};
use perp_pilot::strategy::{Regime, SignalEngine, TradeSignal};

/// Seconds between polls of the venue's kline endpoint. The tracker's
/// duplicate suppression makes re-delivery of the same candle harmless.
const CANDLE_POLL_SECS: u64 = 5;

#[derive(Parser)]
#[command(name = "perp-pilot")]
#[command(version, about = "Automated position lifecycle management on Bybit perpetuals")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show tracked positions from the persisted state store
    Status {
        /// Path to the SQLite state database
        #[arg(short, long, default_value = "data/positions.db")]
        db: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    if let Some(Commands::Status { db }) = cli.command {
        return show_status(&db);
    }

    info!("perp-pilot v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    config.validate()?;
    log_config(&config);

    if config.trading.enable_trading {
        warn!("LIVE TRADING ENABLED - real orders will be placed");
        anyhow::ensure!(
            !config.bybit.api_key.is_empty() && !config.bybit.api_secret.is_empty(),
            "API credentials are required when trading is enabled"
        );
    } else {
        info!("Signal-only mode: trades are notified, never placed");
    }

    let gateway: Arc<dyn ExecutionGateway> = Arc::new(BybitClient::new(&config.bybit)?);

    let notifier = if config.telegram.is_configured() {
        info!("Telegram notifications enabled");
        Notifier::spawn(Arc::new(TelegramSink::new(
            config.telegram.token.clone(),
            config.telegram.chat_id.clone(),
        )?))
    } else {
        info!("No Telegram credentials; notifications go to the log");
        Notifier::spawn(Arc::new(LogSink))
    };

    if let Some(parent) = std::path::Path::new(&config.state.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(StateStore::new(&config.state.db_path)?);
    let tracked = store.all()?;
    info!(positions = tracked.len(), "State store loaded");

    let controller = Arc::new(TradeLifecycleController::new(
        gateway.clone(),
        store.clone(),
        notifier.clone(),
        config.lifecycle_config(),
    ));

    // Shutdown signal: both schedules drain within one unit of work.
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });
    }

    // Any migration left incomplete by a crash is resumed before new entries
    // are considered.
    if !tracked.is_empty() {
        info!("Running startup reconciliation pass");
        controller.reconcile_all(&shutdown).await;
    }

    // Periodic reconciliation sweep.
    let sweep_handle = {
        let controller = controller.clone();
        let shutdown = shutdown.clone();
        let interval = Duration::from_secs(config.lifecycle.reconcile_interval_secs);
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Reconciliation sweep started");
            while !shutdown.load(Ordering::SeqCst) {
                controller.reconcile_all(&shutdown).await;
                tokio::time::sleep(interval).await;
            }
            info!("Reconciliation sweep stopped");
        })
    };

    run_candle_loop(&config, gateway, controller, notifier, &shutdown).await;

    sweep_handle.await.ok();
    info!("perp-pilot stopped");
    Ok(())
}

/// Seed every symbol's window from bulk history, then poll for newly
/// confirmed candles and dispatch resulting signals.
async fn run_candle_loop(
    config: &Config,
    gateway: Arc<dyn ExecutionGateway>,
    controller: Arc<TradeLifecycleController>,
    notifier: Notifier,
    shutdown: &AtomicBool,
) {
    let engine = Arc::new(SignalEngine::new(config.signal.clone()));
    let cooldown = Duration::from_secs(config.trading.cooldown_secs);
    let interval = config.trading.interval_minutes;
    let history_limit = (engine.config().required_candles() + 10) as u32;

    let mut trackers: HashMap<String, CandleTracker> = HashMap::new();
    for symbol in &config.trading.symbols {
        let mut tracker = CandleTracker::new(symbol.clone(), engine.clone(), cooldown);
        match gateway.fetch_candles(symbol, interval, history_limit).await {
            // The newest REST candle may still be forming; seed confirmed
            // history only.
            Ok(candles) if candles.len() > 1 => {
                tracker.seed(candles[..candles.len() - 1].to_vec())
            }
            Ok(_) => warn!(%symbol, "Too little history returned; window starts cold"),
            Err(e) => warn!(%symbol, error = %e, "History preload failed; window starts cold"),
        }
        trackers.insert(symbol.clone(), tracker);
    }

    info!(
        symbols = trackers.len(),
        poll_secs = CANDLE_POLL_SECS,
        "Candle loop started"
    );

    while !shutdown.load(Ordering::SeqCst) {
        for symbol in &config.trading.symbols {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            let candles = match gateway.fetch_candles(symbol, interval, 2).await {
                Ok(candles) => candles,
                Err(e) => {
                    warn!(%symbol, error = %e, "Candle poll failed");
                    continue;
                }
            };
            // Drop the newest (in-progress) candle; feed the confirmed rest.
            let confirmed = &candles[..candles.len().saturating_sub(1)];
            let Some(tracker) = trackers.get_mut(symbol) else {
                continue;
            };
            for candle in confirmed {
                if let Some(signal) = tracker.on_candle(candle.clone()) {
                    dispatch_signal(config, &controller, &notifier, symbol, &signal).await;
                }
            }
        }
        tokio::time::sleep(Duration::from_secs(CANDLE_POLL_SECS)).await;
    }
    info!("Candle loop stopped");
}

async fn dispatch_signal(
    config: &Config,
    controller: &TradeLifecycleController,
    notifier: &Notifier,
    symbol: &str,
    signal: &TradeSignal,
) {
    let risk_percent = match signal.regime {
        Regime::Trend => config.trading.trend_risk_percent,
        Regime::Range => config.trading.range_risk_percent,
    };

    if !config.trading.enable_trading {
        notifier.publish(format!(
            "Signal ({}): {} {} @ {} | stop {} | targets {} / {}",
            signal.regime,
            signal.side,
            symbol,
            signal.entry_price,
            signal.stop_loss,
            signal.take_profit_1,
            signal.take_profit_2
        ));
        return;
    }

    match controller.open(symbol, signal, risk_percent).await {
        Ok(record) => {
            info!(
                %symbol,
                qty = %record.initial_qty,
                entry = %record.entry_price,
                state = record.state.kind(),
                "Trade opened from signal"
            );
        }
        Err(e) => {
            // Every failure here is scoped to this one attempt; the cooldown
            // already prevents immediate re-fires.
            warn!(%symbol, error = %e, "Signal did not result in a position");
        }
    }
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "perp-pilot.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the flush guard alive for the program duration.
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("perp_pilot=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

fn log_config(config: &Config) {
    info!("Configuration:");
    info!("   Symbols: {}", config.trading.symbols.join(", "));
    info!(
        "   Interval: {}m | Cooldown: {}s | Reconcile every {}s",
        config.trading.interval_minutes,
        config.trading.cooldown_secs,
        config.lifecycle.reconcile_interval_secs
    );
    info!(
        "   Leverage: {}x | Trend risk: {}% | Range risk: {}% | Margin limit: {}",
        config.trading.leverage,
        config.trading.trend_risk_percent,
        config.trading.range_risk_percent,
        config.trading.margin_limit
    );
    info!(
        "   Staged exit: {}% of fill | State db: {}",
        config.trading.staged_exit_percent, config.state.db_path
    );
}

fn show_status(db_path: &str) -> Result<()> {
    let store = StateStore::new(db_path)?;
    let states = store.all()?;

    if states.is_empty() {
        println!("No tracked positions.");
        return Ok(());
    }

    println!("{} tracked position(s):", states.len());
    for state in states {
        println!(
            "  {} | {} {} @ {} | state: {} | stop: {} | tp2: {} | since {}",
            state.symbol,
            state.side,
            state.initial_qty,
            state.entry_price,
            state.state.kind(),
            state.stop_loss_price,
            state.secondary_take_profit,
            state.last_transition.format("%Y-%m-%d %H:%M:%S UTC"),
        );
    }
    Ok(())
}
