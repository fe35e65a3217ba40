//! FX Signal Bot
//!
//! Classifies trend/momentum signals on intraday bars and manages each
//! position through staged take-profits, a partial close and a breakeven
//! stop.

mod api;
mod bot;
mod db;
mod events;
mod inbox;
mod indicators;
mod metrics;
mod models;
mod settings;
mod trading;
mod webhook;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{BridgeClient, DataClient, Gateway, PaperGateway};
use crate::bot::{scan_signals, Bot, BotConfig};
use crate::db::Database;
use crate::metrics::{MetricsCalculator, TradeOutcome};
use crate::settings::{Settings, TradingMode};
use crate::trading::MomentumRule;

/// FX signal bot CLI.
#[derive(Parser)]
#[command(name = "fxsignal")]
#[command(about = "Trend/momentum signals with staged exits for FX and metals", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./fxsignal.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON settings file overlaying the defaults
    #[arg(short, long, env = "FXSIGNAL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the evaluation loop until Ctrl+C
    Run {
        /// Paper (simulated fills) or live (broker bridge)
        #[arg(short, long, value_enum, default_value = "paper", env = "FXSIGNAL_MODE")]
        mode: TradingMode,

        /// Seconds between ticks (overrides the settings file)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Broker bridge base URL, required for live mode
        #[arg(long, env = "FXSIGNAL_BRIDGE_URL")]
        bridge_url: Option<String>,

        /// Bearer token for the broker bridge
        #[arg(long, env = "FXSIGNAL_BRIDGE_TOKEN", hide_env_values = true)]
        bridge_token: Option<String>,

        /// Listen address for the external signal webhook (e.g. 127.0.0.1:8080)
        #[arg(long, env = "FXSIGNAL_WEBHOOK_ADDR")]
        webhook: Option<SocketAddr>,
    },

    /// Classify every instrument once and print the levels
    Signals,

    /// Show the effective settings
    Config {
        /// Print as JSON, usable as a settings file
        #[arg(long)]
        json: bool,
    },

    /// Show bot status and open positions from the journal
    Status,

    /// Closed-trade performance report from the journal
    Report,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            mode,
            interval,
            bridge_url,
            bridge_token,
            webhook,
        } => {
            if let Some(secs) = interval {
                settings.tick_interval_secs = secs;
                settings.validate()?;
            }

            let profiles = settings.profiles();
            let market = DataClient::new(&profiles, &settings.feed_interval, &settings.feed_range)?;

            // Live mode needs a bridge; without one, fall back to paper
            let (gateway, mode) = match (mode, bridge_url) {
                (TradingMode::Live, Some(url)) => {
                    let client = BridgeClient::new(&url, bridge_token)?;
                    info!(bridge = %client.base_url(), "Broker bridge configured");
                    (Gateway::Bridge(client), TradingMode::Live)
                }
                (TradingMode::Live, None) => {
                    warn!("No broker bridge URL configured. Running in paper mode.");
                    (Gateway::Paper(PaperGateway), TradingMode::Paper)
                }
                (TradingMode::Paper, _) => (Gateway::Paper(PaperGateway), TradingMode::Paper),
            };

            let db = Database::new(&cli.database).await?;

            let (sink, rx) = events::channel();
            let reporter = tokio::spawn(events::run_reporter(rx, Some(db.clone())));

            let (signals, inbox) = inbox::inbox();
            if let Some(addr) = webhook {
                tokio::spawn(async move {
                    if let Err(e) = webhook::serve(addr, signals).await {
                        error!(error = %e, "Signal webhook stopped");
                    }
                });
            }

            let config = BotConfig::from_settings(&settings, mode);
            let mut bot = Bot::new(config, profiles, market, gateway, inbox, sink).with_journal(db);

            println!("\n=== FX Signal Bot ===");
            println!(
                "Instruments:      {}",
                settings
                    .instruments
                    .iter()
                    .map(|i| i.symbol.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            println!("Tick interval:    {}s", settings.tick_interval_secs);
            println!(
                "Mode:             {}",
                match mode {
                    TradingMode::Paper => "PAPER (simulated fills)",
                    TradingMode::Live => "LIVE TRADING",
                }
            );
            if let Some(addr) = webhook {
                println!("Signal webhook:   http://{}/signal", addr);
            }
            println!("\nPress Ctrl+C to stop.\n");

            if let Err(e) = bot.run().await {
                error!(error = %e, "Bot error");
            }

            let stats = bot.stats();
            println!("\n{}", stats);

            // Closing the event channel lets the reporter flush and exit
            drop(bot);
            reporter.await.ok();
        }

        Commands::Signals => {
            let profiles = settings.profiles();
            let market = DataClient::new(&profiles, &settings.feed_interval, &settings.feed_range)?;
            let config = BotConfig::from_settings(&settings, TradingMode::Paper);

            let rows = scan_signals(&market, &profiles, &config).await;

            println!(
                "\n{:<10} {:<6} {:>7} {:>10} {:>12} {:>12} {:>12} {:>12}",
                "SYMBOL", "SIGNAL", "RSI", "ATR", "TP1", "TP2", "TP3", "SL"
            );
            println!("{}", "-".repeat(88));

            for row in rows {
                let result = match row.outcome {
                    Ok(result) => result,
                    Err(e) => {
                        println!("{:<10} {}", row.instrument, truncate(&e, 76));
                        continue;
                    }
                };

                let direction = result
                    .signal
                    .as_ref()
                    .map(|s| s.direction.as_str())
                    .unwrap_or("-");
                let level = |i: usize| {
                    result
                        .levels
                        .as_ref()
                        .and_then(|l| l.targets.get(i))
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "-".to_string())
                };
                let stop = result
                    .levels
                    .as_ref()
                    .map(|l| l.stop_loss.to_string())
                    .unwrap_or_else(|| "-".to_string());

                println!(
                    "{:<10} {:<6} {:>7.2} {:>10.5} {:>12} {:>12} {:>12} {:>12}",
                    row.instrument,
                    direction,
                    result.snapshot.oscillator,
                    result.snapshot.volatility,
                    level(0),
                    level(1),
                    level(2),
                    stop
                );
                if let Some(signal) = &result.signal {
                    for reason in &signal.reasons {
                        println!("           {}", truncate(reason, 76));
                    }
                }
            }
        }

        Commands::Config { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
                return Ok(());
            }

            let strategy = &settings.strategy;

            println!("\n=== Instruments ===\n");
            println!(
                "{:<10} {:<10} {:>8} {:>7} {:>10}  {:<20} {:>6}",
                "SYMBOL", "CLASS", "PIP", "DIGITS", "CONTRACT", "STATIC TP (pips)", "SL"
            );
            println!("{}", "-".repeat(80));
            for profile in settings.profiles() {
                let table = profile
                    .static_targets_pips
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join("/");
                println!(
                    "{:<10} {:<10} {:>8} {:>7} {:>10}  {:<20} {:>6}",
                    profile.symbol,
                    format!("{:?}", profile.class),
                    profile.pip_unit,
                    profile.price_digits,
                    profile.contract_size,
                    truncate(&table, 20),
                    profile.static_stop_pips
                );
            }

            let ind = &strategy.indicators;
            println!("\n=== Indicators ===\n");
            println!("  Trend EMA:            {} / {}", ind.fast_period, ind.slow_period);
            println!("  RSI Period:           {}", ind.rsi_period);
            println!("  ATR Period:           {}", ind.atr_period);
            println!("  MACD:                 {} / {} / {}", ind.macd_fast, ind.macd_slow, ind.macd_signal);
            println!("  Min Bars:             {}", ind.min_bars());

            let cls = &strategy.classifier;
            println!("\nClassifier:");
            println!("  BUY RSI Band:         [{}, {}]", cls.buy_band.min, cls.buy_band.max);
            println!("  SELL RSI Band:        [{}, {}]", cls.sell_band.min, cls.sell_band.max);
            let rule = match cls.momentum_rule {
                MomentumRule::SecondaryPair => "MACD line vs signal line",
                MomentumRule::PrimaryCrossover => "fresh fast/slow EMA crossover",
            };
            println!("  Momentum Rule:        {}", rule);

            println!("\nTargets:");
            println!(
                "  ATR Multipliers:      {}",
                strategy
                    .targets
                    .multipliers
                    .iter()
                    .map(|m| m.to_string())
                    .collect::<Vec<_>>()
                    .join(" / ")
            );
            println!("  Stop Multiplier:      {}", strategy.targets.stop_multiplier);

            let lc = &strategy.lifecycle;
            println!("\nExit Rules:");
            println!(
                "  Partial Close:        {} ({} at TP{}, step {})",
                lc.partial_close,
                lc.partial_fraction,
                lc.partial_target + 1,
                lc.partial_lot_step
            );
            println!("  Breakeven:            {} (at TP{})", lc.breakeven, lc.breakeven_target + 1);
            println!("  Exit Priority:        {:?}", lc.exit_priority);

            let sz = &strategy.sizing;
            println!("\nPosition Sizing:");
            println!("  Method:               {:?}", sz.method);
            println!("  Fixed Lot:            {}", sz.fixed_lot);
            println!("  Balance:              {}", sz.balance);
            println!("  Risk Per Trade:       {}%", sz.risk_per_trade * Decimal::from(100));
            println!("  Lot Range:            {} - {} (step {})", sz.min_lot, sz.max_lot, sz.lot_step);

            let session = &strategy.session;
            println!("\nSession (UTC):");
            println!("  Enabled:              {}", session.enabled);
            println!("  Window:               {} - {}", session.start, session.end);

            println!("\n=== Loop ===\n");
            println!("  Tick Interval:        {}s", settings.tick_interval_secs);
            println!("  Fetch Timeout:        {}s", settings.fetch_timeout_secs);
            println!("  Bar Count:            {}", settings.bar_count);
            println!("  Feed:                 {} bars over {}", settings.feed_interval, settings.feed_range);
            println!("  Max Open Positions:   {}", settings.max_open_positions);
        }

        Commands::Status => {
            let db = Database::new(&cli.database).await?;

            // Load bot state from database
            let bot_state = match db.get_bot_state().await {
                Ok(state) => state,
                Err(_) => {
                    println!("No bot session found. Run 'fxsignal run' to start the bot.");
                    return Ok(());
                }
            };

            let counts = db.event_counts().await.unwrap_or_default();
            let positions = db.get_open_positions().await?;
            let closed = db.get_closed_positions().await?;
            let realized: f64 = closed.iter().map(|p| p.realized_pnl).sum();

            println!("\n=== Bot Status ===");
            println!("Running:          {}", if bot_state.is_running { "Yes" } else { "No" });
            println!("Mode:             {}", bot_state.mode);
            println!("Started:          {}", bot_state.started_at);
            println!("Updated:          {}", bot_state.updated_at);
            println!("Ticks:            {}", bot_state.ticks);
            println!(
                "Last Tick:        {}",
                bot_state.last_tick_at.unwrap_or_else(|| "Never".to_string())
            );

            println!("\n=== Trading ===");
            println!("Opened:           {}", counts.opened);
            println!("Closed:           {}", counts.closed);
            println!("Execution Fails:  {}", counts.failed);
            println!("Rejected Signals: {}", counts.rejected);
            println!("Realized P&L:     {:.2}", realized);

            if !positions.is_empty() {
                println!("\n=== Open Positions ===");
                println!(
                    "{:<8} {:<8} {:<5} {:<9} {:>11} {:>10} {:>10} {:>10} {:>5} {:>10} {:>10}  {:<19}",
                    "ID", "SYMBOL", "SIDE", "STATE", "LOTS", "ENTRY", "STOP", "NEXT TP", "HIT",
                    "LAST", "P&L", "OPENED"
                );
                println!("{}", "-".repeat(126));
                for pos in &positions {
                    let pnl = pos.floating_pnl + pos.realized_pnl;
                    let next = pos
                        .next_target()
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<8} {:<8} {:<5} {:<9} {:>11} {:>10} {:>10} {:>10} {:>5} {:>10} {:>+10.2}  {:<19}",
                        pos.id.chars().take(8).collect::<String>(),
                        pos.instrument,
                        pos.side,
                        truncate(&pos.state, 9),
                        format!("{}/{}", pos.lot_size, pos.initial_lot_size),
                        pos.entry_price,
                        pos.stop_loss,
                        next,
                        format!("{}/{}", pos.targets_hit, pos.target_levels().len()),
                        pos.last_price,
                        pnl,
                        truncate(&pos.opened_at, 19)
                    );
                }
            }

            if !closed.is_empty() {
                println!("\n=== Recent Closed Positions ===");
                println!(
                    "{:<8} {:<5} {:>6} {:>10} {:>10} {:<13} {:>10}  {:<19}",
                    "SYMBOL", "SIDE", "LOTS", "ENTRY", "CLOSE", "REASON", "P&L", "CLOSED"
                );
                println!("{}", "-".repeat(90));
                for pos in closed.iter().rev().take(10) {
                    println!(
                        "{:<8} {:<5} {:>6} {:>10} {:>10} {:<13} {:>+10.2}  {:<19}",
                        pos.instrument,
                        pos.side,
                        pos.initial_lot_size,
                        pos.entry_price,
                        pos.close_price.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                        pos.close_reason.as_deref().unwrap_or("-"),
                        pos.realized_pnl,
                        truncate(pos.closed_at.as_deref().unwrap_or("-"), 19)
                    );
                }
            }
        }

        Commands::Report => {
            let db = Database::new(&cli.database).await?;
            let closed = db.get_closed_positions().await?;

            if closed.is_empty() {
                println!("No closed positions yet.");
                return Ok(());
            }

            let outcomes: Vec<TradeOutcome> = closed
                .into_iter()
                .map(|p| TradeOutcome {
                    pnl: Decimal::from_f64(p.realized_pnl).unwrap_or_default(),
                    instrument: p.instrument,
                    close_reason: p.close_reason,
                })
                .collect();

            let report = MetricsCalculator::calculate(&outcomes);
            println!("{}", report);
        }
    }

    Ok(())
}

/// Truncate a string with ellipsis if too long.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
