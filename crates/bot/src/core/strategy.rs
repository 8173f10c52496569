//! The polling trading loop.
//!
//! One fixed-interval tick drives one full pass over all configured symbols,
//! sequentially. Per symbol: classify the multi-timeframe trend, fetch bars,
//! compute indicators, evaluate the signal state machine, then run either
//! the entry pipeline (max-positions check → event calendar → resistance
//! proximity → learning gate ∧ ML gate → Kelly sizing → order) or the exit
//! pipeline (stop/target/partial/reversal ladder).
//!
//! The loop is never allowed to terminate due to a per-symbol or per-cycle
//! error: every failure is caught, logged and notified, and the next symbol
//! (or cycle) proceeds. Only login failure at boot halts the process, which
//! happens before this loop starts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Timelike, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{BotConfig, MarketHoursConfig, TimeWindowConfig};
use crate::config::validate::parse_hhmm;
use crate::core::data_service::DataService;
use crate::core::events::{EventCalendar, EventCheck};
use crate::core::indicators::IndicatorSeries;
use crate::core::learning::{LearningEngine, LearningInsights};
use crate::core::position_manager::{evaluate_exit, stop_levels, PositionBook};
use crate::core::position_sizing::KellySizer;
use crate::core::predictor::TradePredictor;
use crate::core::signal_engine;
use crate::core::support_resistance;
use crate::core::trend::TrendAnalyzer;
use crate::execution::{BrokerClient, OrderOutcome};
use crate::notify::Notifier;
use crate::storage::TradeStore;
use crate::types::{
    ExitReason, Interval, Position, Signal, SignalDecision, TradeAction, TradeMode, TradeRecord,
    TrendLabel,
};

/// Percentage proximity to a resistance zone that blocks new buys.
const RESISTANCE_PROXIMITY_PCT: Decimal = dec!(2);

// ═══════════════════════════════════════════════════════════════════════════
// Market-hours helpers
// ═══════════════════════════════════════════════════════════════════════════

/// Whether the market is open at `now`, with a human-readable status.
pub fn market_status(now: DateTime<FixedOffset>, hours: &MarketHoursConfig) -> (bool, String) {
    // Saturday/Sunday.
    if now.weekday().number_from_monday() >= 6 {
        return (false, "weekend".to_string());
    }

    let minutes = now.hour() * 60 + now.minute();
    let open = parse_hhmm(&hours.open).unwrap_or(9 * 60 + 15);
    let close = parse_hhmm(&hours.close).unwrap_or(15 * 60 + 30);

    if minutes < open {
        (false, format!("market opens at {}", hours.open))
    } else if minutes > close {
        (false, format!("market closed at {}", hours.close))
    } else {
        (true, "market open".to_string())
    }
}

/// Conjunctive entry gate: either estimator can veto a trade, regardless of
/// how enthusiastic the other is.
pub fn entry_gate(learning_approved: bool, ml_approved: bool) -> bool {
    learning_approved && ml_approved
}

/// Whether `now` falls inside any configured high-liquidity window.
pub fn in_liquidity_window(now: DateTime<FixedOffset>, windows: &[TimeWindowConfig]) -> bool {
    let minutes = now.hour() * 60 + now.minute();
    windows.iter().any(|w| {
        match (parse_hhmm(&w.start), parse_hhmm(&w.end)) {
            (Ok(start), Ok(end)) => minutes >= start && minutes <= end,
            _ => false,
        }
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Strategy
// ═══════════════════════════════════════════════════════════════════════════

/// Owns the decision loop and all per-cycle state.
///
/// Everything mutable lives on this single struct, owned exclusively by the
/// loop task — persistence is the only cross-process sharing mechanism.
pub struct Strategy {
    config: BotConfig,
    tz: FixedOffset,
    broker: Arc<BrokerClient>,
    data: Arc<DataService>,
    notifier: Arc<Notifier>,
    store: Arc<TradeStore>,
    trend: TrendAnalyzer,
    sizer: KellySizer,
    learning: LearningEngine,
    predictor: TradePredictor,
    events: EventCalendar,
    book: PositionBook,
    insights: LearningInsights,
    daily_pnl: Decimal,
    total_pnl: Decimal,
    check_count: u64,
    last_daily_summary: Option<NaiveDate>,
    last_closed_alert: Option<NaiveDate>,
    market_was_open: bool,
    last_position_sync: Option<Instant>,
    shutdown: CancellationToken,
}

impl Strategy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BotConfig,
        broker: Arc<BrokerClient>,
        data: Arc<DataService>,
        notifier: Arc<Notifier>,
        store: Arc<TradeStore>,
        predictor: TradePredictor,
        shutdown: CancellationToken,
    ) -> Self {
        let tz = FixedOffset::east_opt(config.app.timezone.utc_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
        let trend = TrendAnalyzer::new(data.clone(), config.indicators.clone());
        let sizer = KellySizer::new(config.risk.sizing.clone());
        let learning = LearningEngine::new(
            config.learning.clone(),
            config.signals.rsi_oversold,
            config.risk.stop_loss_pct,
        );
        let events = EventCalendar::new(config.events.clone());

        Self {
            tz,
            broker,
            data,
            notifier,
            store,
            trend,
            sizer,
            learning,
            predictor,
            events,
            book: PositionBook::new(),
            insights: LearningInsights::default(),
            daily_pnl: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            check_count: 0,
            last_daily_summary: None,
            last_closed_alert: None,
            market_was_open: false,
            last_position_sync: None,
            shutdown,
            config,
        }
    }

    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.tz)
    }

    fn trade_mode(&self) -> TradeMode {
        if self.config.trading.paper_trading {
            TradeMode::Paper
        } else {
            TradeMode::Live
        }
    }

    // -----------------------------------------------------------------------
    // Bootstrap
    // -----------------------------------------------------------------------

    /// Restore state, reconcile with the broker, warm up the learners and
    /// announce startup. Called once before [`run`].
    ///
    /// [`run`]: Strategy::run
    pub async fn bootstrap(&mut self) -> Result<()> {
        // Saved positions from a previous run.
        let saved = self.store.load_positions()?;
        if !saved.is_empty() {
            info!(count = saved.len(), "restored positions from store");
            self.book.load(saved);
        }

        // Reconcile against the broker's authoritative holdings.
        self.sync_broker_positions().await;

        // Warm up the learning engine and the predictor.
        let trades = self.store.load_trades()?;
        self.insights = self.learning.analyze(&trades, &self.now().to_rfc3339());
        info!("{}", self.learning.summarize(&self.insights));
        if let Some(adjustments) = &self.insights.adjustments {
            info!(
                rsi_oversold = %adjustments.rsi_oversold,
                stop_loss_pct = %adjustments.stop_loss_pct,
                "suggested parameter adjustments"
            );
        }
        self.store.save_insights(&self.insights)?;

        if self.predictor.train(&trades, &self.now().to_rfc3339()) {
            if let Some(model) = self.predictor.model() {
                self.store.save_model(model)?;
            }
        }

        self.notifier
            .startup(
                self.config.trading.capital,
                &self.config.trading.symbols,
                self.config.trading.paper_trading,
            )
            .await;

        info!(
            symbols = self.config.trading.symbols.len(),
            capital = %self.config.trading.capital,
            policy = ?self.config.signals.policy,
            paper = self.config.trading.paper_trading,
            interval_s = self.config.trading.check_interval_seconds,
            "strategy bootstrapped"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    /// Drive the polling loop until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let sleep_for = self.cycle().await;

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
        info!("strategy loop stopped");
        Ok(())
    }

    /// One full pass. Returns how long to sleep before the next one.
    async fn cycle(&mut self) -> Duration {
        self.check_count += 1;
        let now = self.now();
        debug!(check = self.check_count, time = %now.to_rfc3339(), "cycle start");

        // Periodic broker reconciliation.
        let sync_due = self.last_position_sync.map_or(true, |at| {
            at.elapsed()
                >= Duration::from_secs(self.config.trading.position_sync_interval_seconds)
        });
        if sync_due {
            self.sync_broker_positions().await;
            self.last_position_sync = Some(Instant::now());
        }

        let (market_open, status) = market_status(now, &self.config.trading.market_hours);
        if !market_open {
            self.handle_market_closed(now, &status).await;
            return Duration::from_secs(self.config.trading.market_closed_poll_seconds);
        }

        if !self.market_was_open {
            self.notifier.market_open().await;
            self.market_was_open = true;
        }

        // Daily loss limit pauses the whole loop, not just one symbol.
        let loss_limit = self.config.trading.capital * self.config.risk.max_daily_loss_pct;
        if self.daily_pnl <= -loss_limit {
            warn!(daily_pnl = %self.daily_pnl, "daily loss limit reached, pausing");
            self.notifier
                .error(&format!(
                    "daily loss limit reached ({:.2}); pausing trading",
                    self.daily_pnl
                ))
                .await;
            return Duration::from_secs(self.config.trading.daily_loss_pause_seconds);
        }

        if self.config.trading.trade_only_high_liquidity
            && !in_liquidity_window(now, &self.config.trading.high_liquidity_windows)
        {
            debug!("outside high-liquidity window, waiting");
            return Duration::from_secs(self.config.trading.market_closed_poll_seconds);
        }

        let symbols = self.config.trading.symbols.clone();
        for symbol in &symbols {
            if self.shutdown.is_cancelled() {
                break;
            }
            if let Err(e) = self.process_symbol(symbol, now).await {
                error!(symbol, error = %e, "symbol processing failed");
                self.notifier
                    .error(&format!("error processing {symbol}: {e}"))
                    .await;
            }
        }

        // Mark adopted positions in symbols outside the trading list.
        self.refresh_external_positions(&symbols).await;

        info!(
            check = self.check_count,
            open_positions = self.book.len(),
            daily_pnl = %self.daily_pnl,
            total_pnl = %self.total_pnl,
            "cycle complete"
        );
        Duration::from_secs(self.config.trading.check_interval_seconds)
    }

    // -----------------------------------------------------------------------
    // Market-closed handling
    // -----------------------------------------------------------------------

    async fn handle_market_closed(&mut self, now: DateTime<FixedOffset>, status: &str) {
        let today = now.date_naive();

        if self.last_closed_alert != Some(today) {
            self.notifier.market_closed(status).await;
            self.last_closed_alert = Some(today);
            self.market_was_open = false;
        }

        if self.last_daily_summary != Some(today) {
            if !self.book.is_empty() {
                self.notifier
                    .overnight_positions(&self.book.to_vec())
                    .await;
            }
            let date = now.format("%Y-%m-%d").to_string();
            match self.store.daily_stats(&date) {
                Ok(stats) => {
                    self.notifier
                        .daily_summary(&date, stats.trades, stats.pnl, self.total_pnl, self.book.len())
                        .await;
                }
                Err(e) => warn!(error = %e, "daily stats unavailable"),
            }
            self.last_daily_summary = Some(today);
            self.daily_pnl = Decimal::ZERO;
        }

        debug!(status, "market closed");
    }

    // -----------------------------------------------------------------------
    // Per-symbol pipeline
    // -----------------------------------------------------------------------

    async fn process_symbol(&mut self, symbol: &str, now: DateTime<FixedOffset>) -> Result<()> {
        let trend = self.trend.classify(symbol).await;

        let bars = match self.data.fetch_bars(symbol, Interval::M5).await {
            Ok(bars) => bars,
            Err(e) => {
                warn!(symbol, error = %e, "no bar data, skipping symbol this cycle");
                return Ok(());
            }
        };
        if bars.is_empty() {
            warn!(symbol, "empty bar series, skipping symbol this cycle");
            return Ok(());
        }

        let series = IndicatorSeries::compute(&bars, &self.config.indicators);
        let mut decision = signal_engine::evaluate_series(
            &series,
            trend,
            &self.config.signals,
            self.config.indicators.min_bars,
        );

        let current_price = bars.last().expect("non-empty").close;

        if let Some(position) = self.book.get_mut(symbol) {
            position.update_price(current_price);
        }

        // A SELL with no open position cannot be acted on: report it as an
        // informational HOLD instead.
        if decision.signal == Signal::Sell && !self.book.contains(symbol) {
            let bearish = decision.reasons.join(", ");
            decision.signal = Signal::Hold;
            decision.reasons = vec![
                format!("bearish: {bearish}"),
                "no position (cannot exit)".to_string(),
            ];
        }

        info!(
            symbol,
            signal = %decision.signal,
            %trend,
            price = %current_price,
            reasons = %decision.reasons.join("; "),
            "signal evaluated"
        );

        let holding = self.book.contains(symbol);
        if !holding && decision.signal.is_buy() {
            self.try_enter(symbol, &decision, trend, current_price, now)
                .await?;
        } else if holding {
            self.try_exit(symbol, &decision, current_price, now).await?;
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Entry pipeline
    // -----------------------------------------------------------------------

    async fn try_enter(
        &mut self,
        symbol: &str,
        decision: &SignalDecision,
        trend: TrendLabel,
        price: Decimal,
        now: DateTime<FixedOffset>,
    ) -> Result<()> {
        let snapshot = match &decision.snapshot {
            Some(s) => s.clone(),
            None => return Ok(()),
        };

        if self.book.bot_owned_count() >= self.config.trading.max_positions {
            info!(
                symbol,
                max = self.config.trading.max_positions,
                "max positions reached, skipping entry"
            );
            return Ok(());
        }

        // Event calendar: holidays veto, volatility events warn.
        match self.events.check(now.date_naive()) {
            EventCheck::Holiday(event) => {
                info!(symbol, event, "entry vetoed by event calendar");
                return Ok(());
            }
            EventCheck::HighVolatility(event) => {
                warn!(symbol, event, "high-volatility event today, trading with caution");
            }
            _ => {}
        }

        // Resistance proximity: buying just under a ceiling is a poor entry.
        if let Ok(daily_bars) = self.data.fetch_bars(symbol, Interval::D1).await {
            if let Some(levels) = support_resistance::compute_levels(&daily_bars) {
                if levels.is_near_resistance(RESISTANCE_PROXIMITY_PCT) {
                    info!(
                        symbol,
                        resistance = %levels.nearest_resistance.unwrap_or_default(),
                        "price near resistance, skipping buy"
                    );
                    return Ok(());
                }
                if levels.is_near_support(RESISTANCE_PROXIMITY_PCT) {
                    info!(
                        symbol,
                        support = %levels.nearest_support.unwrap_or_default(),
                        "price near support, favourable entry"
                    );
                }
            }
        }

        // Adaptive confidence gate: both estimators must approve.
        let hour = now.hour();
        let weekday = now.weekday().num_days_from_monday();
        let gate = self
            .learning
            .should_take_trade(&self.insights, decision.signal, snapshot.rsi, hour);
        let (ml_take, ml_probability, ml_confidence) =
            self.predictor.should_take_trade(&snapshot, hour, weekday);

        let ml_confidence_dec = Decimal::from_f64(ml_confidence).unwrap_or(Decimal::ZERO);
        let combined = (gate.confidence + ml_confidence_dec) / dec!(2);

        info!(
            symbol,
            learning = %gate.confidence,
            ml_probability,
            combined = %combined,
            "entry confidence"
        );

        if !entry_gate(gate.approved, ml_take) {
            let reason = gate.reasons.join("; ");
            info!(symbol, reason, "trade skipped (confidence gate)");
            self.notifier
                .trade_skipped(symbol, decision.signal, gate.confidence, ml_probability, &reason)
                .await;
            return Ok(());
        }

        // Kelly sizing, scaled by the combined confidence.
        let trades = self.store.load_trades()?;
        let quantity = self.sizer.position_size(
            self.config.trading.capital,
            price,
            &trades,
            Some(symbol),
            combined,
        );
        if quantity == 0 {
            info!(symbol, %price, "sized to zero units, skipping entry");
            return Ok(());
        }

        let outcome = self
            .broker
            .place_order(symbol, quantity, TradeAction::Buy, None)
            .await;
        match outcome {
            OrderOutcome::Placed(order_id) => {
                info!(symbol, order_id = %order_id, quantity, %price, "buy filled");

                let position = Position::open(
                    symbol,
                    quantity,
                    price,
                    now.to_rfc3339(),
                    decision.signal,
                    combined,
                );
                let levels = stop_levels(&position, snapshot.atr, &self.config.risk);
                self.book.open(position);

                let record = TradeRecord::from_execution(
                    now.to_rfc3339(),
                    symbol,
                    TradeAction::Buy,
                    quantity,
                    price,
                    decision.signal,
                    None,
                    Decimal::ZERO,
                    &snapshot,
                    self.trade_mode(),
                );
                self.store.append_trade(&record)?;
                self.persist_positions(now);

                self.notifier
                    .buy_executed(
                        symbol,
                        quantity,
                        price,
                        decision.signal,
                        &snapshot,
                        levels.effective_stop,
                        levels.target,
                    )
                    .await;
                debug!(symbol, %trend, "entry complete");
            }
            OrderOutcome::Rejected(rejection) => {
                warn!(
                    symbol,
                    code = %rejection.code,
                    message = %rejection.message,
                    "buy order rejected"
                );
                self.notifier
                    .error(&format!("buy rejected for {symbol}: {}", rejection.guidance))
                    .await;
            }
            OrderOutcome::Failed(reason) => {
                warn!(symbol, reason, "buy order failed");
            }
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Exit pipeline
    // -----------------------------------------------------------------------

    async fn try_exit(
        &mut self,
        symbol: &str,
        decision: &SignalDecision,
        price: Decimal,
        now: DateTime<FixedOffset>,
    ) -> Result<()> {
        let position = match self.book.get(symbol) {
            Some(p) => p.clone(),
            None => return Ok(()),
        };

        let atr = decision
            .snapshot
            .as_ref()
            .map(|s| s.atr)
            .unwrap_or(Decimal::ZERO);

        let plan = match evaluate_exit(&position, price, atr, decision.signal, &self.config.risk) {
            Some(plan) => plan,
            None => return Ok(()),
        };

        info!(
            symbol,
            reason = %plan.reason,
            quantity = plan.quantity,
            %price,
            "exit triggered"
        );

        let outcome = self
            .broker
            .place_order(symbol, plan.quantity, TradeAction::Sell, None)
            .await;
        match outcome {
            OrderOutcome::Placed(order_id) => {
                let pnl = self
                    .book
                    .apply_exit(symbol, &plan, price)
                    .unwrap_or(Decimal::ZERO);
                self.daily_pnl += pnl;
                self.total_pnl += pnl;

                info!(
                    symbol,
                    order_id = %order_id,
                    %pnl,
                    daily_pnl = %self.daily_pnl,
                    total_pnl = %self.total_pnl,
                    "sell filled"
                );

                // SELL rows carry the entry signal so per-signal learning
                // has ground truth.
                if let Some(snapshot) = &decision.snapshot {
                    let record = TradeRecord::from_execution(
                        now.to_rfc3339(),
                        symbol,
                        TradeAction::Sell,
                        plan.quantity,
                        price,
                        position.signal_type,
                        Some(plan.reason),
                        pnl,
                        snapshot,
                        self.trade_mode(),
                    );
                    self.store.append_trade(&record)?;
                }
                self.persist_positions(now);

                self.notifier
                    .sell_executed(
                        symbol,
                        plan.quantity,
                        position.entry_price,
                        price,
                        plan.reason,
                        pnl,
                    )
                    .await;

                // Closed-trade feedback: refresh the learners on full exits;
                // a partial leaves a live position worth reporting.
                if plan.reason != ExitReason::PartialTarget {
                    self.refresh_learning().await?;
                } else if let Some(remaining) = self.book.get(symbol) {
                    self.notifier.position_update(remaining).await;
                }
            }
            OrderOutcome::Rejected(rejection) => {
                // Position intentionally untouched: the next cycle retries.
                warn!(
                    symbol,
                    code = %rejection.code,
                    "sell order rejected, position preserved"
                );
                self.notifier
                    .error(&format!("sell rejected for {symbol}: {}", rejection.guidance))
                    .await;
            }
            OrderOutcome::Failed(reason) => {
                warn!(symbol, reason, "sell order failed, position preserved for retry");
            }
        }

        Ok(())
    }

    /// Recompute insights and retrain the predictor from the updated log.
    async fn refresh_learning(&mut self) -> Result<()> {
        let trades = self.store.load_trades()?;
        self.insights = self.learning.analyze(&trades, &self.now().to_rfc3339());
        self.store.save_insights(&self.insights)?;
        if self.predictor.train(&trades, &self.now().to_rfc3339()) {
            if let Some(model) = self.predictor.model() {
                self.store.save_model(model)?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Broker reconciliation
    // -----------------------------------------------------------------------

    /// Adopt broker-side positions and drop externally-owned ones that have
    /// disappeared. Bot-owned positions are authoritative from our memory.
    async fn sync_broker_positions(&mut self) {
        let broker_positions = match self.broker.sync_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, "broker position sync failed");
                return;
            }
        };

        let broker_symbols: Vec<String> = broker_positions
            .iter()
            .map(|p| p.symbol.clone())
            .collect();
        for position in broker_positions {
            self.book.adopt_external(position);
        }
        self.book.prune_external(&broker_symbols);
        self.persist_positions(self.now());
    }

    /// Update marks on adopted positions outside the configured symbol list.
    async fn refresh_external_positions(&mut self, traded: &[String]) {
        let outside: Vec<String> = self
            .book
            .symbols()
            .into_iter()
            .filter(|s| !traded.contains(s))
            .collect();
        for symbol in outside {
            if let Ok(bars) = self.data.fetch_bars(&symbol, Interval::M5).await {
                if let Some(last) = bars.last() {
                    if let Some(position) = self.book.get_mut(&symbol) {
                        position.update_price(last.close);
                        debug!(
                            symbol,
                            price = %last.close,
                            pnl = %position.unrealized_pnl(),
                            "external position marked"
                        );
                    }
                }
            }
        }
    }

    fn persist_positions(&self, now: DateTime<FixedOffset>) {
        if let Err(e) = self
            .store
            .save_positions(&self.book.to_vec(), &now.to_rfc3339())
        {
            warn!(error = %e, "failed to persist positions");
        }
    }

    /// Snapshot accessor used by startup logging and tests.
    pub fn open_positions(&self) -> Vec<Position> {
        self.book.to_vec()
    }
}
