//! Bot runner: the periodic evaluation loop.
//!
//! Each tick:
//! - Drains externally submitted signals
//! - Fetches quotes for open instruments and bars for flat ones, concurrently
//!   and each under a timeout
//! - Applies every state change sequentially: lifecycle updates for open
//!   positions, classification and entries for flat instruments

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};

use crate::api::{DataError, ExecutionError, MarketData, OrderAck, OrderGateway, OrderRequest};
use crate::db::Database;
use crate::events::{EventSink, TradeEvent};
use crate::inbox::{ExternalSignal, Inbox};
use crate::indicators::{compute_indicators, compute_previous_indicators, IndicatorSnapshot};
use crate::models::{Bar, InstrumentProfile, Position, Quote, Signal};
use crate::settings::{Settings, TradingMode};
use crate::trading::{
    classify, compute_targets, external_signal, PositionBook, PositionSizer, StrategyConfig,
    TargetLevels,
};

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub mode: TradingMode,

    /// Time between ticks
    pub tick_interval: Duration,

    /// Upper bound on each fetch and each order submission
    pub fetch_timeout: Duration,

    /// Bars requested per flat instrument
    pub bar_count: usize,

    pub max_open_positions: usize,

    pub strategy: StrategyConfig,
}

impl BotConfig {
    pub fn from_settings(settings: &Settings, mode: TradingMode) -> Self {
        Self {
            mode,
            tick_interval: settings.tick_interval(),
            fetch_timeout: settings.fetch_timeout(),
            bar_count: settings.bar_count,
            max_open_positions: settings.max_open_positions,
            strategy: settings.strategy.clone(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), TradingMode::Paper)
    }
}

/// Snapshots kept between ticks for one flat instrument.
#[derive(Debug, Default)]
struct InstrumentTrack {
    current: Option<IndicatorSnapshot>,
    previous: Option<IndicatorSnapshot>,
    /// Bar the last entry was taken on
    acted_on_bar: Option<DateTime<Utc>>,
}

enum Fetched {
    Quote(Result<Quote, DataError>),
    Bars(Result<Vec<Bar>, DataError>),
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub evaluated: usize,
    pub skipped: usize,
    pub opened: usize,
    pub closed: usize,
}

/// Main bot runner.
pub struct Bot<M, G> {
    config: BotConfig,
    profiles: Arc<[InstrumentProfile]>,
    market: M,
    gateway: G,
    sizer: PositionSizer,
    book: PositionBook,
    tracks: HashMap<String, InstrumentTrack>,

    inbox: Inbox,
    /// External signals waiting for their instrument's bars
    pending: HashMap<String, ExternalSignal>,

    events: EventSink,
    db: Option<Database>,

    ticks: u64,
    shutdown: Arc<AtomicBool>,
}

impl<M: MarketData, G: OrderGateway> Bot<M, G> {
    pub fn new(
        config: BotConfig,
        profiles: Vec<InstrumentProfile>,
        market: M,
        gateway: G,
        inbox: Inbox,
        events: EventSink,
    ) -> Self {
        Self {
            sizer: PositionSizer::new(config.strategy.sizing.clone()),
            book: PositionBook::new(config.max_open_positions),
            config,
            profiles: profiles.into(),
            market,
            gateway,
            tracks: HashMap::new(),
            inbox,
            pending: HashMap::new(),
            events,
            db: None,
            ticks: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record run state and ticks in the journal.
    pub fn with_journal(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    /// Main run loop. Returns after Ctrl+C or the shutdown flag is set.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            mode = self.config.mode.as_str(),
            gateway = self.gateway.name(),
            interval_secs = self.config.tick_interval.as_secs(),
            instruments = self.profiles.len(),
            "Starting evaluation loop"
        );

        if let Some(db) = &self.db {
            db.init_bot_state(self.config.mode.as_str()).await?;
        }

        let mut ticker = interval(self.config.tick_interval);

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let summary = self.tick().await;
            self.ticks += 1;

            if summary.opened > 0 || summary.closed > 0 {
                info!(
                    evaluated = summary.evaluated,
                    skipped = summary.skipped,
                    opened = summary.opened,
                    closed = summary.closed,
                    open_positions = self.book.open_count(),
                    "Tick complete"
                );
            } else {
                debug!(evaluated = summary.evaluated, skipped = summary.skipped, "Tick complete");
            }

            if let Some(db) = &self.db {
                if let Err(e) = db.record_tick(Utc::now()).await {
                    error!(error = %e, "Failed to record tick");
                }
            }
        }

        self.shutdown().await
    }

    /// Single iteration of the main loop.
    pub async fn tick(&mut self) -> TickSummary {
        self.tick_at(Utc::now()).await
    }

    /// Tick with an explicit clock, used for session checks and timestamps.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> TickSummary {
        self.drain_inbox();

        let fetched = self.fetch_all().await;

        let profiles = Arc::clone(&self.profiles);
        let mut summary = TickSummary::default();
        for (profile, fetched) in profiles.iter().zip(fetched) {
            match fetched {
                Fetched::Quote(quote) => self.manage_open(profile, quote, now, &mut summary),
                Fetched::Bars(bars) => self.evaluate_flat(profile, bars, now, &mut summary).await,
            }
        }

        summary
    }

    fn drain_inbox(&mut self) {
        for signal in self.inbox.drain() {
            if !self.profiles.iter().any(|p| p.symbol == signal.instrument) {
                warn!(instrument = %signal.instrument, "External signal for unconfigured instrument");
                self.reject(&signal.instrument, "instrument not configured");
                continue;
            }
            debug!(instrument = %signal.instrument, side = %signal.side, "External signal received");
            // Latest signal per instrument wins
            self.pending.insert(signal.instrument.clone(), signal);
        }
    }

    /// Fetch phase: one request per instrument, all in flight together.
    async fn fetch_all(&self) -> Vec<Fetched> {
        let limit = self.config.fetch_timeout;
        let count = self.config.bar_count;
        let market = &self.market;

        let fetches = self.profiles.iter().map(|profile| {
            let symbol = profile.symbol.as_str();
            let open = self.book.has_open(symbol);
            async move {
                if open {
                    Fetched::Quote(bounded(limit, market.live_quote(symbol)).await)
                } else {
                    Fetched::Bars(bounded(limit, market.recent_bars(symbol, count)).await)
                }
            }
        });

        join_all(fetches).await
    }

    /// Feed the latest quote to the instrument's open position.
    fn manage_open(
        &mut self,
        profile: &InstrumentProfile,
        quote: Result<Quote, DataError>,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) {
        let symbol = profile.symbol.as_str();

        if self.pending.remove(symbol).is_some() {
            self.reject(symbol, "position already open");
        }

        let quote = match quote {
            Ok(quote) if quote.is_valid() => quote,
            Ok(quote) => {
                warn!(instrument = %symbol, bid = %quote.bid, ask = %quote.ask, "Invalid quote, skipping");
                summary.skipped += 1;
                return;
            }
            Err(e) => {
                warn!(instrument = %symbol, error = %e, "Quote unavailable, skipping");
                summary.skipped += 1;
                return;
            }
        };

        let Some(side) = self.book.get(symbol).map(|p| p.side) else {
            return;
        };
        let price = quote.mark_price(side);
        let Some(update) =
            self.book
                .apply_price(symbol, price, now, &self.config.strategy.lifecycle)
        else {
            return;
        };
        summary.evaluated += 1;

        for event in &update.events {
            if let Some(event) = TradeEvent::from_lifecycle(&update.position, event) {
                self.events.emit(event);
            }
        }

        if update.closed() {
            summary.closed += 1;
            self.events.emit(TradeEvent::PositionClosed {
                position: update.position,
            });
        } else {
            let floating_pnl = update.position.floating_pnl(price);
            let floating_pips = update.position.floating_pips(price);
            self.events.emit(TradeEvent::PositionMarked {
                position: update.position,
                price,
                floating_pnl,
                floating_pips,
            });
        }
    }

    /// Classify a flat instrument and open a position on a directional signal.
    async fn evaluate_flat(
        &mut self,
        profile: &InstrumentProfile,
        bars: Result<Vec<Bar>, DataError>,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) {
        let symbol = profile.symbol.as_str();

        let bars = match bars {
            Ok(bars) => bars,
            Err(e) => {
                warn!(instrument = %symbol, error = %e, "Bars unavailable, skipping");
                summary.skipped += 1;
                return;
            }
        };

        let Some(current) = compute_indicators(&bars, &self.config.strategy.indicators) else {
            debug!(instrument = %symbol, bars = bars.len(), "Not enough history");
            summary.skipped += 1;
            return;
        };
        summary.evaluated += 1;

        let previous = self.advance_track(symbol, &bars, current);

        let signal = match self.pending.remove(symbol) {
            Some(external) => {
                let reference = external
                    .reference_price
                    .or_else(|| Decimal::from_f64(current.close))
                    .unwrap_or_default();
                external_signal(
                    symbol,
                    external.side,
                    reference,
                    positive_decimal(current.volatility),
                    external.note.as_deref(),
                )
            }
            None => {
                let acted = self
                    .tracks
                    .get(symbol)
                    .and_then(|t| t.acted_on_bar)
                    .is_some_and(|bar| bar == current.as_of);
                // One entry per bar, and only with a previous snapshot
                let Some(previous) = previous.filter(|_| !acted) else {
                    return;
                };
                classify(symbol, &current, &previous, &self.config.strategy.classifier)
            }
        };

        if !signal.is_actionable() {
            debug!(instrument = %symbol, reasons = ?signal.reasons, "No signal");
            return;
        }

        if self.open_position(profile, signal, current.as_of, now).await {
            summary.opened += 1;
        }
    }

    /// Store `current` and return the snapshot to compare it against.
    fn advance_track(
        &mut self,
        symbol: &str,
        bars: &[Bar],
        current: IndicatorSnapshot,
    ) -> Option<IndicatorSnapshot> {
        let indicators = &self.config.strategy.indicators;
        let track = self.tracks.entry(symbol.to_string()).or_default();

        match track.current {
            // Forming bar updated; the completed one before it is unchanged
            Some(last) if last.as_of == current.as_of => {}
            Some(last) => track.previous = Some(last),
            // First sight: seed from the window without its last valid bar
            None => track.previous = compute_previous_indicators(bars, indicators),
        }

        track.current = Some(current);
        track.previous
    }

    /// Targets, sizing, book entry and order submission for one signal.
    async fn open_position(
        &mut self,
        profile: &InstrumentProfile,
        signal: Signal,
        bar_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        let symbol = profile.symbol.as_str();
        let Some(side) = signal.direction.side() else {
            return false;
        };

        if !self.config.strategy.session.is_open(now) {
            self.reject(symbol, "outside trading session");
            return false;
        }

        let entry = profile.round_price(signal.reference_price);
        let levels: TargetLevels = compute_targets(
            entry,
            side,
            signal.volatility_at_signal,
            profile,
            &self.config.strategy.targets,
        );
        let lots = self.sizer.lot_size(entry, levels.stop_loss, profile);

        let candidate = Position::new(
            profile,
            side,
            entry,
            lots,
            levels.stop_loss,
            levels.targets,
            now,
        );
        let position = match self.book.open(candidate) {
            Ok(position) => position.clone(),
            Err(rejected) => {
                self.reject(symbol, rejected.as_str());
                return false;
            }
        };

        let track = self.tracks.entry(symbol.to_string()).or_default();
        track.acted_on_bar = Some(bar_time);
        // Bars are not fetched while the position is open
        track.current = None;
        track.previous = None;

        self.events.emit(TradeEvent::PositionOpened {
            position: position.clone(),
            method: levels.method,
            source: signal.source,
            reasons: signal.reasons,
        });

        let order = OrderRequest {
            client_order_id: position.id,
            instrument: position.instrument.clone(),
            side,
            lots,
            stop_loss: position.stop_loss,
            take_profit: position.targets.first().copied().unwrap_or(entry),
            comment: format!("fxsignal {}", signal.source.as_str()),
        };
        self.submit_order(&order).await;

        true
    }

    /// Submit without retry. A failure is reported; the position stays.
    async fn submit_order(&self, order: &OrderRequest) {
        let limit = self.config.fetch_timeout;
        let result: Result<OrderAck, ExecutionError> =
            match timeout(limit, self.gateway.submit(order)).await {
                Ok(result) => result,
                Err(_) => Err(ExecutionError::Timeout(limit)),
            };

        match result {
            Ok(ack) => info!(
                instrument = %order.instrument,
                order_id = %ack.order_id,
                gateway = self.gateway.name(),
                simulated = ack.simulated,
                "Order acknowledged"
            ),
            Err(e) => self.events.emit(TradeEvent::ExecutionFailed {
                position_id: order.client_order_id,
                instrument: order.instrument.clone(),
                error: e.to_string(),
            }),
        }
    }

    fn reject(&self, instrument: &str, reason: &str) {
        self.events.emit(TradeEvent::SignalRejected {
            instrument: instrument.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Graceful shutdown.
    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down bot...");

        if let Some(db) = &self.db {
            db.mark_bot_stopped().await?;
        }

        info!(
            open_positions = self.book.open_count(),
            closed_positions = self.book.closed().len(),
            "Bot shutdown complete"
        );
        Ok(())
    }

    /// Get current stats.
    pub fn stats(&self) -> BotStats {
        let closed = self.book.closed();
        BotStats {
            mode: self.config.mode,
            ticks: self.ticks,
            open_positions: self.book.open_count(),
            closed_positions: closed.len(),
            winning_positions: closed
                .iter()
                .filter(|p| p.realized_pnl > Decimal::ZERO)
                .count(),
            realized_pnl: closed.iter().map(|p| p.realized_pnl).sum(),
            is_running: !self.shutdown.load(Ordering::SeqCst),
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    fetch: impl Future<Output = Result<T, DataError>>,
) -> Result<T, DataError> {
    timeout(limit, fetch)
        .await
        .unwrap_or(Err(DataError::Timeout(limit)))
}

fn positive_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value).filter(|v| *v > Decimal::ZERO)
}

/// One row of the `signals` command.
#[derive(Debug, Clone)]
pub struct ScanRow {
    pub instrument: String,
    pub outcome: Result<ScanResult, String>,
}

#[derive(Debug, Clone)]
pub struct ScanResult {
    pub snapshot: IndicatorSnapshot,
    /// `None` when the window is too short for a previous snapshot
    pub signal: Option<Signal>,
    /// Levels an entry would use, for directional signals
    pub levels: Option<TargetLevels>,
}

/// One-shot classification of every instrument, without opening anything.
pub async fn scan_signals<M: MarketData>(
    market: &M,
    profiles: &[InstrumentProfile],
    config: &BotConfig,
) -> Vec<ScanRow> {
    let strategy = &config.strategy;
    let fetches = profiles.iter().map(|profile| {
        bounded(
            config.fetch_timeout,
            market.recent_bars(&profile.symbol, config.bar_count),
        )
    });
    let fetched = join_all(fetches).await;

    profiles
        .iter()
        .zip(fetched)
        .map(|(profile, bars)| {
            let symbol = profile.symbol.clone();
            let outcome = bars.map_err(|e| e.to_string()).and_then(|bars| {
                let snapshot = compute_indicators(&bars, &strategy.indicators)
                    .ok_or_else(|| format!("not enough history ({} bars)", bars.len()))?;
                let previous = compute_previous_indicators(&bars, &strategy.indicators);

                let signal = previous
                    .map(|prev| classify(&symbol, &snapshot, &prev, &strategy.classifier));
                let levels = signal.as_ref().and_then(|s| {
                    let side = s.direction.side()?;
                    Some(compute_targets(
                        profile.round_price(s.reference_price),
                        side,
                        s.volatility_at_signal,
                        profile,
                        &strategy.targets,
                    ))
                });

                Ok(ScanResult {
                    snapshot,
                    signal,
                    levels,
                })
            });
            ScanRow {
                instrument: symbol,
                outcome,
            }
        })
        .collect()
}

/// Bot statistics.
#[derive(Debug, Clone)]
pub struct BotStats {
    pub mode: TradingMode,
    pub ticks: u64,
    pub open_positions: usize,
    pub closed_positions: usize,
    pub winning_positions: usize,
    pub realized_pnl: Decimal,
    pub is_running: bool,
}

impl std::fmt::Display for BotStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Bot Statistics ===")?;
        writeln!(f, "Mode:             {}", self.mode.as_str())?;
        writeln!(f, "Ticks:            {}", self.ticks)?;
        writeln!(f, "Open Positions:   {}", self.open_positions)?;
        writeln!(
            f,
            "Closed Positions: {} (Winning: {})",
            self.closed_positions, self.winning_positions
        )?;
        writeln!(f, "Realized P&L:     {:.2}", self.realized_pnl)?;
        writeln!(
            f,
            "Status:           {}",
            if self.is_running { "Running" } else { "Stopped" }
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::events;
    use crate::inbox::{self, InboxSender};
    use crate::indicators::test_bars::{from_closes, zigzag};
    use crate::models::{CloseReason, PositionState, Side, SignalSource};
    use crate::trading::{MomentumRule, TargetMethod};

    #[derive(Clone, Default)]
    struct FakeMarket {
        bars: Arc<Mutex<HashMap<String, Vec<Bar>>>>,
        quotes: Arc<Mutex<HashMap<String, Quote>>>,
        hanging: Arc<Mutex<HashSet<String>>>,
    }

    impl FakeMarket {
        fn set_bars(&self, symbol: &str, bars: Vec<Bar>) {
            self.bars.lock().unwrap().insert(symbol.to_string(), bars);
        }

        fn set_price(&self, symbol: &str, price: Decimal) {
            self.quotes.lock().unwrap().insert(
                symbol.to_string(),
                Quote {
                    bid: price,
                    ask: price,
                    timestamp: Utc::now(),
                },
            );
        }

        fn hang(&self, symbol: &str, hanging: bool) {
            let mut set = self.hanging.lock().unwrap();
            if hanging {
                set.insert(symbol.to_string());
            } else {
                set.remove(symbol);
            }
        }
    }

    impl MarketData for FakeMarket {
        async fn recent_bars(&self, instrument: &str, count: usize) -> Result<Vec<Bar>, DataError> {
            let hanging = self.hanging.lock().unwrap().contains(instrument);
            if hanging {
                std::future::pending::<()>().await;
            }
            let bars = self.bars.lock().unwrap().get(instrument).cloned();
            bars.map(|b| b[b.len().saturating_sub(count)..].to_vec())
                .ok_or_else(|| DataError::NoData {
                    instrument: instrument.to_string(),
                })
        }

        async fn live_quote(&self, instrument: &str) -> Result<Quote, DataError> {
            let quote = self.quotes.lock().unwrap().get(instrument).copied();
            quote.ok_or_else(|| DataError::NoData {
                instrument: instrument.to_string(),
            })
        }
    }

    #[derive(Clone, Default)]
    struct FakeGateway {
        fail: bool,
        orders: Arc<Mutex<Vec<OrderRequest>>>,
    }

    impl OrderGateway for FakeGateway {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn submit(&self, order: &OrderRequest) -> Result<OrderAck, ExecutionError> {
            self.orders.lock().unwrap().push(order.clone());
            if self.fail {
                return Err(ExecutionError::Rejected("not enough margin".to_string()));
            }
            Ok(OrderAck {
                order_id: "1".to_string(),
                fill_price: None,
                simulated: true,
            })
        }
    }

    struct Harness {
        bot: Bot<FakeMarket, FakeGateway>,
        market: FakeMarket,
        gateway: FakeGateway,
        signals: InboxSender,
        events: UnboundedReceiver<TradeEvent>,
    }

    impl Harness {
        fn new(symbols: &[&str], gateway: FakeGateway) -> Self {
            Self::with_config(symbols, gateway, test_config())
        }

        fn with_config(symbols: &[&str], gateway: FakeGateway, config: BotConfig) -> Self {
            let market = FakeMarket::default();
            for symbol in symbols {
                market.set_bars(symbol, trending_bars(symbol, 120));
            }

            let profiles = symbols
                .iter()
                .map(|s| InstrumentProfile::for_symbol(s))
                .collect();
            let (sink, events) = events::channel();
            let (signals, inbox) = inbox::inbox();

            let bot = Bot::new(config, profiles, market.clone(), gateway.clone(), inbox, sink);
            Self {
                bot,
                market,
                gateway,
                signals,
                events,
            }
        }

        fn send(&self, symbol: &str, side: Side) {
            self.signals
                .submit(inbox::ExternalSignal::new(symbol, side))
                .unwrap();
        }

        fn drain_events(&mut self) -> Vec<TradeEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn test_config() -> BotConfig {
        BotConfig {
            fetch_timeout: Duration::from_millis(100),
            ..BotConfig::default()
        }
    }

    /// Accelerating rising zig-zag: uptrend, MACD above its signal line and
    /// RSI inside the default BUY band at 120 and 121 bars.
    fn accelerating_bars(n: usize) -> Vec<Bar> {
        let closes: Vec<f64> = (0..n)
            .map(|i| 1.1 + 5e-7 * (i * i) as f64 + if i % 2 == 0 { 0.0006 } else { 0.0 })
            .collect();
        from_closes(&closes)
    }

    /// Falls to a trough at bar 60, then recovers. The fast average crosses
    /// above the slow one on the 73rd bar.
    fn v_shaped_bars(n: usize) -> Vec<Bar> {
        let closes: Vec<f64> = (0..n)
            .map(|i| {
                1.1 + 0.0002 * (i as f64 - 60.0).abs() + if i % 2 == 0 { 0.0006 } else { 0.0 }
            })
            .collect();
        from_closes(&closes)
    }

    fn trending_bars(symbol: &str, n: usize) -> Vec<Bar> {
        let base = if symbol.ends_with("JPY") { 150.0 } else { 1.1 };
        let step = base * 0.0004;
        from_closes(&zigzag(n, base, step * 1.5, step))
    }

    fn in_session() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap()
    }

    fn rejections(events: &[TradeEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                TradeEvent::SignalRejected { reason, .. } => Some(reason.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_external_signal_opens_position() {
        let mut h = Harness::new(&["EURUSD"], FakeGateway::default());
        h.send("eur/usd", Side::Buy);

        let summary = h.bot.tick_at(in_session()).await;
        assert_eq!(summary.opened, 1);

        let position = h.bot.book().get("EURUSD").unwrap().clone();
        assert_eq!(position.side, Side::Buy);
        assert_eq!(position.state, PositionState::Open);
        assert_eq!(position.targets.len(), 3);
        assert!(position.stop_loss < position.entry_price);
        assert!(position.targets.windows(2).all(|w| w[0] < w[1]));

        let orders = h.gateway.orders.lock().unwrap().clone();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].client_order_id, position.id);
        assert_eq!(orders[0].take_profit, position.targets[0]);
        assert_eq!(orders[0].lots, dec!(0.1));

        let events = h.drain_events();
        assert!(events.iter().any(|e| e.kind() == "position_opened"));
    }

    #[tokio::test]
    async fn test_classifier_signal_opens_position() {
        let mut h = Harness::new(&["EURUSD"], FakeGateway::default());
        h.market.set_bars("EURUSD", accelerating_bars(120));

        let summary = h.bot.tick_at(in_session()).await;
        assert_eq!(summary.evaluated, 1);
        assert_eq!(summary.opened, 1);

        let position = h.bot.book().get("EURUSD").unwrap().clone();
        assert_eq!(position.side, Side::Buy);
        assert!(position.stop_loss < position.entry_price);
        assert!(position.targets[0] > position.entry_price);
        assert_eq!(h.gateway.orders.lock().unwrap().len(), 1);

        let opened = h.drain_events().into_iter().find_map(|e| match e {
            TradeEvent::PositionOpened { source, method, .. } => Some((source, method)),
            _ => None,
        });
        assert_eq!(opened, Some((SignalSource::Indicators, TargetMethod::Volatility)));
    }

    #[tokio::test]
    async fn test_one_entry_per_bar_after_quick_close() {
        let mut h = Harness::new(&["EURUSD"], FakeGateway::default());
        h.market.set_bars("EURUSD", accelerating_bars(120));
        assert_eq!(h.bot.tick_at(in_session()).await.opened, 1);

        let stop = h.bot.book().get("EURUSD").unwrap().stop_loss;
        h.market.set_price("EURUSD", stop - dec!(0.0010));
        assert_eq!(h.bot.tick_at(in_session()).await.closed, 1);

        // Same bar still classifies BUY, but it was already traded
        let summary = h.bot.tick_at(in_session()).await;
        assert_eq!(summary.evaluated, 1);
        assert_eq!(summary.opened, 0);
        assert!(!h.bot.book().has_open("EURUSD"));
        assert_eq!(h.gateway.orders.lock().unwrap().len(), 1);

        h.market.set_bars("EURUSD", accelerating_bars(121));
        assert_eq!(h.bot.tick_at(in_session()).await.opened, 1);
        assert_eq!(h.gateway.orders.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_primary_crossover_enters_on_crossing_bar() {
        let mut config = test_config();
        config.strategy.classifier.momentum_rule = MomentumRule::PrimaryCrossover;
        let mut h = Harness::with_config(&["EURUSD"], FakeGateway::default(), config);

        // Fast average still below the slow one
        h.market.set_bars("EURUSD", v_shaped_bars(72));
        assert_eq!(h.bot.tick_at(in_session()).await.opened, 0);

        h.market.set_bars("EURUSD", v_shaped_bars(73));
        assert_eq!(h.bot.tick_at(in_session()).await.opened, 1);
        assert_eq!(h.bot.book().get("EURUSD").map(|p| p.side), Some(Side::Buy));
    }

    #[tokio::test]
    async fn test_timed_out_instrument_is_skipped_and_carried_over() {
        let mut h = Harness::new(&["EURUSD", "GBPUSD", "USDJPY"], FakeGateway::default());
        h.market.hang("GBPUSD", true);
        for symbol in ["EURUSD", "GBPUSD", "USDJPY"] {
            h.send(symbol, Side::Sell);
        }

        let summary = h.bot.tick_at(in_session()).await;
        assert_eq!(summary.opened, 2);
        assert_eq!(summary.skipped, 1);
        assert!(h.bot.book().has_open("EURUSD"));
        assert!(h.bot.book().has_open("USDJPY"));
        assert!(!h.bot.book().has_open("GBPUSD"));

        // The queued GBPUSD signal survives the timeout
        h.market.hang("GBPUSD", false);
        let summary = h.bot.tick_at(in_session()).await;
        assert_eq!(summary.opened, 1);
        assert_eq!(h.bot.book().get("GBPUSD").map(|p| p.side), Some(Side::Sell));
        assert_eq!(h.bot.book().open_count(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_signal_is_rejected_while_open() {
        let mut h = Harness::new(&["EURUSD"], FakeGateway::default());
        h.send("EURUSD", Side::Buy);
        h.bot.tick_at(in_session()).await;
        let entry = h.bot.book().get("EURUSD").unwrap().entry_price;
        h.drain_events();

        h.market.set_price("EURUSD", entry);
        h.send("EURUSD", Side::Buy);
        h.bot.tick_at(in_session()).await;

        let events = h.drain_events();
        assert_eq!(rejections(&events), vec!["position already open"]);
        assert!(events.iter().any(|e| e.kind() == "position_marked"));
        assert_eq!(h.gateway.orders.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_loss_closes_position() {
        let mut h = Harness::new(&["EURUSD"], FakeGateway::default());
        h.send("EURUSD", Side::Buy);
        h.bot.tick_at(in_session()).await;
        let stop = h.bot.book().get("EURUSD").unwrap().stop_loss;

        h.market.set_price("EURUSD", stop - dec!(0.0010));
        let summary = h.bot.tick_at(in_session()).await;

        assert_eq!(summary.closed, 1);
        assert!(!h.bot.book().has_open("EURUSD"));
        let closed = &h.bot.book().closed()[0];
        assert_eq!(closed.close_reason, Some(CloseReason::StopLoss));
        assert!(closed.realized_pnl < Decimal::ZERO);

        let events = h.drain_events();
        assert_eq!(events.last().map(|e| e.kind()), Some("position_closed"));
        assert_eq!(h.bot.stats().closed_positions, 1);
    }

    #[tokio::test]
    async fn test_execution_failure_keeps_position() {
        let gateway = FakeGateway {
            fail: true,
            ..FakeGateway::default()
        };
        let mut h = Harness::new(&["USDJPY"], gateway);
        h.send("USDJPY", Side::Sell);

        let summary = h.bot.tick_at(in_session()).await;
        assert_eq!(summary.opened, 1);
        assert!(h.bot.book().has_open("USDJPY"));

        let events = h.drain_events();
        let failure = events.iter().find_map(|e| match e {
            TradeEvent::ExecutionFailed { error, .. } => Some(error.clone()),
            _ => None,
        });
        assert_eq!(failure.as_deref(), Some("order rejected: not enough margin"));
    }

    #[tokio::test]
    async fn test_session_closed_blocks_new_entries() {
        let mut h = Harness::new(&["EURUSD"], FakeGateway::default());
        h.send("EURUSD", Side::Buy);

        let late = Utc.with_ymd_and_hms(2024, 3, 5, 22, 0, 0).unwrap();
        let summary = h.bot.tick_at(late).await;

        assert_eq!(summary.opened, 0);
        assert!(!h.bot.book().has_open("EURUSD"));
        assert_eq!(rejections(&h.drain_events()), vec!["outside trading session"]);
    }

    #[tokio::test]
    async fn test_unconfigured_instrument_is_rejected() {
        let mut h = Harness::new(&["EURUSD"], FakeGateway::default());
        h.send("AUDNZD", Side::Buy);

        h.bot.tick_at(in_session()).await;

        assert_eq!(h.bot.book().open_count(), 0);
        assert_eq!(rejections(&h.drain_events()), vec!["instrument not configured"]);
    }

    #[tokio::test]
    async fn test_short_history_skips_instrument() {
        let mut h = Harness::new(&["EURUSD"], FakeGateway::default());
        h.market.set_bars("EURUSD", trending_bars("EURUSD", 10));
        h.send("EURUSD", Side::Buy);

        let summary = h.bot.tick_at(in_session()).await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.opened, 0);

        // Enough history arrives; the queued signal is still there
        h.market.set_bars("EURUSD", trending_bars("EURUSD", 120));
        let summary = h.bot.tick_at(in_session()).await;
        assert_eq!(summary.opened, 1);
    }

    #[test]
    fn test_previous_snapshot_tracks_completed_bars() {
        let h = Harness::new(&["EURUSD"], FakeGateway::default());
        let mut bot = h.bot;
        let indicators = bot.config.strategy.indicators.clone();

        let bars = trending_bars("EURUSD", 120);
        let first = compute_indicators(&bars, &indicators).unwrap();
        let seeded = compute_indicators(&bars[..119], &indicators);

        // First sight seeds from the window without its last bar
        assert_eq!(bot.advance_track("EURUSD", &bars, first), seeded);
        // Same bar again keeps the previous snapshot
        assert_eq!(bot.advance_track("EURUSD", &bars, first), seeded);

        let more = trending_bars("EURUSD", 121);
        let second = compute_indicators(&more, &indicators).unwrap();
        assert_eq!(bot.advance_track("EURUSD", &more, second), Some(first));
    }

    #[test]
    fn test_first_sight_ignores_trailing_malformed_bar() {
        let h = Harness::new(&["EURUSD"], FakeGateway::default());
        let mut bot = h.bot;
        let indicators = bot.config.strategy.indicators.clone();

        let mut bars = trending_bars("EURUSD", 120);
        bars[119].high = f64::NAN;
        let current = compute_indicators(&bars, &indicators).unwrap();

        let previous = bot.advance_track("EURUSD", &bars, current).unwrap();
        assert_eq!(current.as_of, bars[118].timestamp);
        assert_eq!(previous.as_of, bars[117].timestamp);
    }

    #[tokio::test]
    async fn test_scan_reports_errors_per_instrument() {
        let market = FakeMarket::default();
        market.set_bars("EURUSD", trending_bars("EURUSD", 120));
        market.set_bars("GBPUSD", trending_bars("GBPUSD", 5));
        let profiles: Vec<InstrumentProfile> = ["EURUSD", "GBPUSD", "USDCAD"]
            .iter()
            .map(|s| InstrumentProfile::for_symbol(s))
            .collect();

        let rows = scan_signals(&market, &profiles, &BotConfig::default()).await;

        assert_eq!(rows.len(), 3);
        let eur = rows[0].outcome.as_ref().unwrap();
        assert!(eur.signal.is_some());
        assert!((0.0..=100.0).contains(&eur.snapshot.oscillator));
        assert!(rows[1].outcome.as_ref().unwrap_err().starts_with("not enough history"));
        assert_eq!(rows[2].outcome.as_ref().unwrap_err(), "no data for USDCAD");
    }
}
