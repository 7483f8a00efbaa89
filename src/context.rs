// =============================================================================
// Context — single owned struct replacing the teacher's Arc<RwLock<AppState>>.
// =============================================================================
//
// Per SPEC_FULL §5/§9: the tick pipeline runs on one task with no lock on
// core engine state. `Context` owns every tracker and decision-stage cache
// the engine loop needs across ticks and is driven exclusively by `tick()`;
// the venue reader and backfill tasks only ever send events in, they never
// touch this struct directly.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::decision::structure::{empty_view, SrClusterCache, StructureBuilder, StructureSnapshot};
use crate::decision::{decide_a, decide_b2, AResult, B2Result, DiagnosticRateLimiter, MetaGate};
use crate::engine::{self, EngineState, TickOutcome};
use crate::health::{DecisionHistogram, StageHeartbeats};
use crate::market::bar::{Bar, BarSource};
use crate::market::snapshot::{Level, MarketUpdate};
use crate::market::{IoAggregator, IoPacket};
use crate::markers::{MarkerEvent, MarkerLog, TradeLogRecord};
use crate::persistence::{self, JsonlWriter};
use crate::types::{EngineMode, Side};
use crate::venue::{RawCandle, VenueEvent};

/// Resolve the persisted engine-state path: `ENGINE_STATE_PATH` env var
/// overrides, otherwise `ws/engine_state.{LIVE|TEST}.json` per the venue
/// mode (test/dry both use the TEST suffix — only a live-mode process
/// touches the LIVE file).
pub fn engine_state_path(mode: EngineMode) -> PathBuf {
    if let Ok(p) = std::env::var("ENGINE_STATE_PATH") {
        return PathBuf::from(p);
    }
    let suffix = if mode == EngineMode::Live { "LIVE" } else { "TEST" };
    PathBuf::from(format!("ws/engine_state.{suffix}.json"))
}

fn raw_candle_to_bar(c: RawCandle) -> Bar {
    Bar {
        ts_start: c.ts_start,
        open: c.open,
        high: c.high,
        low: c.low,
        close: c.close,
        close_history: Vec::new(),
        source: BarSource::Backfill,
    }
}

/// Outcome of one full tick through the decision pipeline, returned so the
/// caller can decide whether to persist, log a decision-monitor sample, etc.
pub struct TickResult {
    pub packet: IoPacket,
    pub a: AResult,
    pub b2: Option<B2Result>,
    pub outcome: TickOutcome,
}

pub struct Context {
    pub config: RuntimeConfig,
    pub mode: EngineMode,
    pub engine_state_path: PathBuf,

    io: IoAggregator,
    pub state: EngineState,

    meta_gate: MetaGate,
    diagnostic_rate_limiter: DiagnosticRateLimiter,
    structure_builder: StructureBuilder,
    sr_cluster_cache: SrClusterCache,
    structure_snapshot: Option<StructureSnapshot>,

    pub bar15m_backfill: crate::market::backfill::BackfillState,
    pub bar1h_backfill: crate::market::backfill::BackfillState,
    bar15m_scheduler: crate::market::backfill::BackfillScheduler,
    bar1h_scheduler: crate::market::backfill::BackfillScheduler,

    pub heartbeats: StageHeartbeats,
    pub histogram: DecisionHistogram,

    /// Last decision pipeline outputs, kept only for the dashboard snapshot
    /// — never persisted, never read back into the pipeline itself.
    pub last_a: Option<AResult>,
    pub last_b2: Option<B2Result>,
    pub last_packet: Option<IoPacket>,

    hard_sl_streak: u32,
    pub process_start_ms: i64,
    last_saved_ms: i64,

    trades_log: JsonlWriter,
    pub marker_log: MarkerLog,
}

impl Context {
    pub fn new(config: RuntimeConfig, now_ms: i64) -> Self {
        let mode = config.mode;
        let engine_state_path = engine_state_path(mode);
        let state = match persistence::read_json_opt::<EngineState>(&engine_state_path) {
            Ok(Some(s)) => {
                info!(path = %engine_state_path.display(), "loaded persisted engine state");
                s
            }
            Ok(None) => EngineState::default(),
            Err(e) => {
                warn!(error = %e, path = %engine_state_path.display(), "failed to load engine state, starting fresh");
                EngineState::default()
            }
        };

        Self {
            io: IoAggregator::new(&config, now_ms),
            meta_gate: MetaGate::new(),
            diagnostic_rate_limiter: DiagnosticRateLimiter::new(),
            structure_builder: StructureBuilder::new(),
            sr_cluster_cache: SrClusterCache::new(),
            structure_snapshot: None,
            bar15m_backfill: crate::market::backfill::BackfillState::new(),
            bar1h_backfill: crate::market::backfill::BackfillState::new(),
            bar15m_scheduler: crate::market::backfill::BackfillScheduler::new(
                config.backfill_base_delay_ms,
                config.backfill_max_delay_ms,
                config.backfill_target_bars,
            ),
            bar1h_scheduler: crate::market::backfill::BackfillScheduler::new(
                config.backfill_base_delay_ms,
                config.backfill_max_delay_ms,
                config.backfill_target_bars,
            ),
            heartbeats: StageHeartbeats::default(),
            histogram: DecisionHistogram::default(),
            last_a: None,
            last_b2: None,
            last_packet: None,
            hard_sl_streak: 0,
            process_start_ms: now_ms,
            last_saved_ms: 0,
            trades_log: JsonlWriter::new(
                std::env::var("LOG_TRADES_PATH").unwrap_or_else(|_| "logs/trades.jsonl".to_string()),
            ),
            marker_log: MarkerLog::new(),
            engine_state_path,
            mode,
            config,
            state,
        }
    }

    // -- venue event ingestion -----------------------------------------

    pub fn on_venue_event(&mut self, event: VenueEvent) {
        match event {
            VenueEvent::Book { ts_ms, best_bid, best_ask, bids, asks } => {
                self.on_book(ts_ms, best_bid, best_ask, bids, asks);
            }
            VenueEvent::Trade { ts_ms, price, size, side } => {
                self.io.on_trade(ts_ms, price, size, side);
            }
            VenueEvent::AssetCtx {
                ts_ms,
                mark,
                oracle,
                funding,
                premium,
                open_interest,
                impact_bid,
                impact_ask,
            } => {
                self.io.on_market_update(MarketUpdate {
                    ts_ms: Some(ts_ms),
                    mark: Some(mark),
                    oracle: Some(oracle),
                    funding: Some(funding),
                    premium: Some(premium),
                    impact_bid: Some(impact_bid),
                    impact_ask: Some(impact_ask),
                    ..Default::default()
                });
                self.io.on_open_interest(ts_ms, open_interest);
            }
        }
    }

    fn on_book(&mut self, ts_ms: i64, best_bid: f64, best_ask: f64, bids: Vec<Level>, asks: Vec<Level>) {
        let mid = if best_bid > 0.0 && best_ask > 0.0 {
            (best_bid + best_ask) / 2.0
        } else {
            0.0
        };
        self.io.on_market_update(MarketUpdate {
            ts_ms: Some(ts_ms),
            best_bid: Some(best_bid),
            best_ask: Some(best_ask),
            bids: Some(bids.clone()),
            asks: Some(asks.clone()),
            ..Default::default()
        });
        if mid > 0.0 {
            self.io.on_book_snapshot(ts_ms / 1000, mid, bids, asks);
        }
    }

    /// Record that the venue reader produced an event this instant, for
    /// health staleness classification. Called once per drained batch
    /// rather than per event to keep the hot path cheap.
    pub fn mark_ws_heartbeat(&mut self, now_ms: i64) {
        self.heartbeats.last_ws_ms = Some(now_ms);
    }

    // -- backfill merge --------------------------------------------------

    pub fn merge_bar15m_backfill(&mut self, candles: Vec<RawCandle>) {
        let bars = candles.into_iter().map(raw_candle_to_bar).collect();
        self.io.merge_bar15m_backfill(bars);
    }

    pub fn merge_bar1h_backfill(&mut self, candles: Vec<RawCandle>) {
        let bars = candles.into_iter().map(raw_candle_to_bar).collect();
        self.io.merge_bar1h_backfill(bars);
    }

    pub fn bar15m_confirmed_count(&self) -> usize {
        self.io.bar15m_confirmed_count()
    }

    pub fn bar1h_confirmed_count(&self) -> usize {
        self.io.bar1h_confirmed_count()
    }

    pub fn bar15m_backfill_due(&self, now_ms: i64) -> bool {
        self.bar15m_scheduler
            .due(&self.bar15m_backfill, self.bar15m_confirmed_count(), now_ms)
    }

    pub fn bar1h_backfill_due(&self, now_ms: i64) -> bool {
        self.bar1h_scheduler
            .due(&self.bar1h_backfill, self.bar1h_confirmed_count(), now_ms)
    }

    pub fn on_bar15m_backfill_started(&mut self) {
        self.bar15m_scheduler.on_started(&mut self.bar15m_backfill);
    }

    pub fn on_bar1h_backfill_started(&mut self) {
        self.bar1h_scheduler.on_started(&mut self.bar1h_backfill);
    }

    pub fn on_bar15m_backfill_success(&mut self, confirmed_bars: usize) {
        self.bar15m_scheduler.on_success(&mut self.bar15m_backfill, confirmed_bars);
    }

    pub fn on_bar1h_backfill_success(&mut self, confirmed_bars: usize) {
        self.bar1h_scheduler.on_success(&mut self.bar1h_backfill, confirmed_bars);
    }

    pub fn on_bar15m_backfill_failure(&mut self, now_ms: i64, error: impl Into<String>) {
        self.bar15m_scheduler.on_failure(&mut self.bar15m_backfill, now_ms, error);
    }

    pub fn on_bar1h_backfill_failure(&mut self, now_ms: i64, error: impl Into<String>) {
        self.bar1h_scheduler.on_failure(&mut self.bar1h_backfill, now_ms, error);
    }

    // -- tick pipeline ----------------------------------------------------

    /// Run one full tick: I/O aggregation, meta gate, decision A, structure
    /// rebuild, SR cluster view, decision B2, and the engine state machine.
    /// Matches the chain in SPEC_FULL §4/§9 exactly — a skipped stage
    /// (meta-toxic, decision A block) still runs the engine loop so open
    /// positions keep getting managed every tick regardless of entry gating.
    pub fn tick(&mut self, now_ms: i64) -> TickResult {
        let packet = self.io.tick(now_ms, &self.config);
        self.heartbeats.last_io_ms = Some(now_ms);

        if let Some(reason) = packet.bar1h_adaptive_switch_reason.clone() {
            let event = MarkerEvent::Bar1hAdaptiveSwitch { ts: now_ms, reason };
            if let Err(e) = self.marker_log.record(&event) {
                warn!(error = %e, "failed to append bar1h_adaptive_switch marker");
            }
        }

        let meta = self.meta_gate.evaluate(&packet, &self.config, now_ms);

        let (a, b2) = if !meta.allow {
            let a = AResult {
                allow: false,
                regime: crate::types::Regime::None,
                zone: crate::types::Zone::Middle,
                trend_strength: crate::types::TrendStrength::Weak,
                active_area: None,
                daily_area: None,
                reason: meta.reason,
                diagnostic: meta.diagnostic.clone(),
            };
            (a, None)
        } else {
            let a = decide_a(&packet, self.mode, &self.config, now_ms, Some(&mut self.diagnostic_rate_limiter));
            if !a.allow {
                (a, None)
            } else {
                self.structure_snapshot = self.structure_builder.maybe_rebuild(
                    self.structure_snapshot.take(),
                    &packet,
                    a.active_area.as_ref().expect("decide_a allow implies active_area"),
                    a.daily_area.as_ref(),
                    &self.config,
                    now_ms,
                );
                let sr_view = match &self.structure_snapshot {
                    Some(snap) => self.sr_cluster_cache.get_or_build(snap, &packet, &self.config, now_ms),
                    None => empty_view(),
                };
                let b2 = decide_b2(
                    &a,
                    &packet,
                    self.structure_snapshot.as_ref(),
                    &sr_view,
                    &self.config,
                    now_ms,
                    self.process_start_ms,
                );
                (a, Some(b2))
            }
        };
        self.heartbeats.last_decision_ms = Some(now_ms);
        self.histogram.record(a.reason);
        if let Some(b2) = &b2 {
            self.histogram.record(b2.reason);
        }

        let mid = packet.market.mid;
        let blocked_b2;
        let decision_ref: &B2Result = match &b2 {
            Some(b) => b,
            None => {
                blocked_b2 = B2Result {
                    side: Side::None,
                    size: 0.0,
                    notional_usd: 0.0,
                    firepower: 0.0,
                    entry_profile: String::new(),
                    tp_px: 0.0,
                    tp_distance_usd: 0.0,
                    structural_distance_usd: 0.0,
                    expected_usd: 0.0,
                    reason: a.reason,
                    // None of B2's three phases ran — decide_a already blocked upstream.
                    // Its diagnostic lives on `a.diagnostic` (kept on `self.last_a`), not here.
                    phase1_diag: String::new(),
                    phase2_diag: String::new(),
                    phase4_diag: String::new(),
                };
                &blocked_b2
            }
        };

        let outcome = engine::apply_tick(
            &mut self.state,
            mid,
            decision_ref,
            &a,
            self.structure_snapshot.as_ref(),
            &packet,
            &self.config,
            now_ms,
            &mut self.hard_sl_streak,
        );
        self.heartbeats.last_engine_ms = Some(now_ms);

        if outcome.closed_trade {
            // StructureSnapshot is scoped to one position's lifetime — a
            // closed position has no bearing on the rails the next entry
            // should see, so force a fresh B0/B1 build next tick.
            self.structure_snapshot = None;
            if let Some(trade) = self.state.trades.last() {
                let record = TradeLogRecord::from(trade);
                if let Err(e) = self.trades_log.append(&record) {
                    warn!(error = %e, "failed to append trade log record");
                }
            }
        }

        self.last_a = Some(a.clone());
        self.last_b2 = b2.clone();
        self.last_packet = Some(packet.clone());

        TickResult { packet, a, b2, outcome }
    }

    /// Persist `EngineState` if `should_save` says it's due, updating
    /// `last_saved_ms` on success. Failures are logged and swallowed per
    /// SPEC_FULL §7 (persistence failure -> log + retain in-memory state).
    pub fn save_if_due(&mut self, now_ms: i64, safety_transitioned: bool) {
        if !engine::should_save(&self.config, self.last_saved_ms, now_ms, safety_transitioned) {
            return;
        }
        match persistence::atomic_write_json(&self.engine_state_path, &self.state) {
            Ok(()) => self.last_saved_ms = now_ms,
            Err(e) => warn!(error = %e, path = %self.engine_state_path.display(), "failed to persist engine state"),
        }
    }

    /// Synchronous final save used on shutdown; always writes regardless of
    /// the save-interval gate.
    pub fn save_now(&mut self) -> Result<()> {
        persistence::atomic_write_json(&self.engine_state_path, &self.state)
    }

    pub fn health_report(&self, now_ms: i64) -> crate::health::HealthReport {
        self.heartbeats.report(&self.config, now_ms)
    }

    pub fn decision_snapshot(&self) -> Vec<(crate::decision::ReasonCode, u64)> {
        self.histogram.snapshot()
    }

    pub fn decision_total(&self) -> u64 {
        self.histogram.total()
    }

    /// Append the `shutdown` marker with uptime + session stats. Called once
    /// from the graceful-shutdown path after the final `save_now()`.
    pub fn record_shutdown(&mut self, now_ms: i64, reason: &str) -> Result<()> {
        let uptime_ms = (now_ms - self.process_start_ms).max(0);
        let event = crate::markers::MarkerEvent::Shutdown {
            ts: now_ms,
            reason: reason.to_string(),
            uptime_hours: uptime_ms as f64 / 3_600_000.0,
            uptime_ms,
            stopped_at: now_ms,
            session_stats: (&self.state.stats).into(),
        };
        self.marker_log.record(&event)
    }
}

/// Directory containing the trades/markers JSONL logs, created lazily on
/// first write by `JsonlWriter::append`.
pub fn logs_dir() -> &'static Path {
    Path::new("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RuntimeConfig {
        let mut c = RuntimeConfig::default();
        c.bar15m_interval_ms = 1_000;
        c.bar1h_interval_ms = 10_000;
        c.lookback_bars_1h = 0;
        c.lrc_len_b15m = 2;
        c.lrc_len_a1h = 2;
        c.lrc_len_daily = 2;
        c.warmup_ms = 0;
        c
    }

    #[test]
    fn tick_runs_full_pipeline_without_panicking() {
        let config = cfg();
        let mut ctx = Context::new(config, 0);
        ctx.on_venue_event(VenueEvent::Book {
            ts_ms: 0,
            best_bid: 100.0,
            best_ask: 101.0,
            bids: vec![(100.0, 1.0)],
            asks: vec![(101.0, 1.0)],
        });
        let result = ctx.tick(1_000);
        assert!(result.packet.market.mid > 0.0);
    }

    #[test]
    fn structure_snapshot_destroyed_on_position_close() {
        let config = cfg();
        let mut ctx = Context::new(config, 0);
        ctx.on_venue_event(VenueEvent::Book {
            ts_ms: 0,
            best_bid: 100.0,
            best_ask: 101.0,
            bids: vec![(100.0, 1.0)],
            asks: vec![(101.0, 1.0)],
        });

        ctx.structure_snapshot = Some(StructureSnapshot {
            rails_upper: 200.0,
            rails_lower: 50.0,
            span_usd: 150.0,
            basis: crate::decision::structure::StructureBasis::B1Overlap,
            structure_source: "test".to_string(),
            hash: "0000000000000000".to_string(),
            version: 1,
            snapshot_seq: 1,
            created_at_ms: 0,
            candidates: vec![],
        });
        ctx.state.open_position = Some(crate::engine::OpenPosition {
            side: Side::Buy,
            size: 1.0,
            entry_px: 90.0,
            entry_ts: 0,
            tp_px: 100.0, // mid (~100.5) has already crossed this
            sl_px: 1.0,
            tp_distance_usd: 10.0,
            worst_px: 90.0,
            entry_context: crate::engine::state::EntryContext {
                regime: String::new(),
                zone: String::new(),
                trend_strength: String::new(),
                entry_quality_reason: crate::decision::ReasonCode::B2Allowed,
                structure_hash: String::new(),
            },
            exit_streaks: Default::default(),
            depth_exit_state: None,
        });

        ctx.tick(1_000);
        assert!(ctx.state.open_position.is_none(), "tp hit should have closed the position");
        assert!(ctx.structure_snapshot.is_none(), "structure snapshot must be destroyed on position close");
    }

    #[test]
    fn backfill_merge_updates_confirmed_count() {
        let config = cfg();
        let mut ctx = Context::new(config, 100_000);
        ctx.merge_bar1h_backfill(vec![RawCandle {
            ts_start: 0,
            open: 10.0,
            high: 11.0,
            low: 9.0,
            close: 10.5,
        }]);
        assert_eq!(ctx.bar1h_confirmed_count(), 1);
    }

    #[test]
    fn engine_state_path_honors_env_override() {
        std::env::set_var("ENGINE_STATE_PATH", "/tmp/aurora_test_engine_state.json");
        let path = engine_state_path(EngineMode::Test);
        assert_eq!(path, PathBuf::from("/tmp/aurora_test_engine_state.json"));
        std::env::remove_var("ENGINE_STATE_PATH");
    }

    #[test]
    fn engine_state_path_defaults_by_mode() {
        std::env::remove_var("ENGINE_STATE_PATH");
        assert_eq!(engine_state_path(EngineMode::Live), PathBuf::from("ws/engine_state.LIVE.json"));
        assert_eq!(engine_state_path(EngineMode::Test), PathBuf::from("ws/engine_state.TEST.json"));
        assert_eq!(engine_state_path(EngineMode::Dry), PathBuf::from("ws/engine_state.TEST.json"));
    }
}
