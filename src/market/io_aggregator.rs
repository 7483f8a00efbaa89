// =============================================================================
// I/O Aggregator — orchestrates the per-tick trackers into one IOPacket.
// =============================================================================
//
// Owns every tracker instance directly (no lazy singletons, per SPEC_FULL §9):
// the market state store, both bar trackers, the three LRC engines (sharing
// the OLS math in `lrc.rs` over different close arrays), the depth SR
// analyzer, the trade flow tracker and the adaptive 1h lookback controller.
// `tick()` is the single entry point the engine loop calls once per venue
// event; it returns an immutable `IoPacket` snapshot.

use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::market::bar::{Bar, BarTracker};
use crate::market::depth_sr::{DepthSrAnalyzer, DepthSrView};
use crate::market::lrc::{self, AdaptiveLookbackController, LrcState};
use crate::market::snapshot::{Level, MarketSnapshot, MarketStateStore, MarketUpdate};
use crate::market::trade_flow::{TradeFlowState, TradeFlowTracker};
use crate::types::Side;

/// Immutable per-tick value object consumed by the decision pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoPacket {
    pub now_ms: i64,
    pub market: MarketSnapshot,

    pub bar15m_ready: bool,
    pub bar15m_high: f64,
    pub bar15m_low: f64,
    pub bar15m_close: f64,
    /// Recent 15m bars, oldest-first, for pivot-based SR-cluster detection.
    pub bar15m_recent: Vec<Bar>,

    pub bar1h_ready: bool,
    pub bar1h_high: f64,
    pub bar1h_low: f64,
    pub bar1h_close: f64,
    pub bar1h_confirmed_count: usize,
    pub bar1h_updated_at_ms: i64,
    pub bar1h_lookback_range_usd: f64,

    pub lrc_b15m: LrcState,
    pub lrc_a1h: LrcState,
    pub lrc_daily: LrcState,

    pub depth_sr: DepthSrView,
    pub trade_flow: TradeFlowState,

    pub constraints: Vec<String>,
    /// Set this tick iff the adaptive 1h lookback controller just switched;
    /// carries its reason string for the `bar1h_adaptive_switch` marker.
    pub bar1h_adaptive_switch_reason: Option<String>,
}

impl IoPacket {
    pub fn has_constraint(&self, tag: &str) -> bool {
        self.constraints.iter().any(|c| c == tag)
    }
}

pub struct IoAggregator {
    market_store: MarketStateStore,
    bar15m: BarTracker,
    bar1h: BarTracker,
    depth_sr: DepthSrAnalyzer,
    trade_flow: TradeFlowTracker,
    adaptive_1h: AdaptiveLookbackController,

    bar1h_updated_at_ms: i64,
    start_ms: i64,
}

impl IoAggregator {
    pub fn new(config: &RuntimeConfig, now_ms: i64) -> Self {
        Self {
            market_store: MarketStateStore::new(now_ms),
            bar15m: BarTracker::new(config.bar15m_interval_ms, 0),
            bar1h: BarTracker::new(config.bar1h_interval_ms, config.lookback_bars_1h),
            depth_sr: DepthSrAnalyzer::new(
                config.depth_observation_window_s,
                config.depth_frequency_analysis_interval_s,
                config.depth_bin_size_usd,
                config.depth_threshold_multiplier,
                config.depth_merge_distance_usd,
                config.depth_min_sample_count,
            ),
            trade_flow: TradeFlowTracker::new(
                config.trade_flow_windows_ms.clone(),
                config.large_trade_factor,
                config.trade_flow_cleanup_interval_ms,
                config.trade_flow_max_buffer_size,
            ),
            adaptive_1h: AdaptiveLookbackController::new(config.adaptive_start_lookback),
            bar1h_updated_at_ms: now_ms,
            start_ms: now_ms,
        }
    }

    pub fn on_market_update(&mut self, update: MarketUpdate) {
        self.market_store.apply(update);
    }

    pub fn on_trade(&mut self, ts_ms: i64, price: f64, size: f64, side: Side) {
        self.trade_flow.on_trade(ts_ms, price, size, side);
    }

    pub fn on_open_interest(&mut self, ts_ms: i64, oi: f64) {
        self.trade_flow.on_open_interest(ts_ms, oi);
    }

    pub fn on_book_snapshot(&mut self, ts_s: i64, mid: f64, bids: Vec<Level>, asks: Vec<Level>) {
        self.depth_sr.push_snapshot(ts_s, mid, bids, asks);
    }

    pub fn bar15m_confirmed_count(&self) -> usize {
        self.bar15m.confirmed_count()
    }

    pub fn bar1h_confirmed_count(&self) -> usize {
        self.bar1h.confirmed_count()
    }

    pub fn merge_bar15m_backfill(&mut self, candles: Vec<Bar>) {
        self.bar15m.merge_backfill_candles(candles);
    }

    pub fn merge_bar1h_backfill(&mut self, candles: Vec<Bar>) {
        self.bar1h.merge_backfill_candles(candles);
    }

    fn lookback_range_usd(&self, lookback_bars: usize) -> f64 {
        let mut high = f64::MIN;
        let mut low = f64::MAX;
        let mut seen = false;
        if let Some(bar) = self.bar1h.current_bar() {
            high = high.max(bar.high);
            low = low.min(bar.low);
            seen = true;
        }
        for bar in self.bar1h.confirmed_slice().iter().rev().take(lookback_bars) {
            high = high.max(bar.high);
            low = low.min(bar.low);
            seen = true;
        }
        if !seen || !high.is_finite() || !low.is_finite() {
            return 0.0;
        }
        (high - low).max(0.0)
    }

    /// Run one tick of the pipeline: fold the current mid into both bar
    /// trackers, run the adaptive 1h controller, maybe run the depth SR
    /// re-analysis, and assemble the immutable `IoPacket`.
    pub fn tick(&mut self, now_ms: i64, config: &RuntimeConfig) -> IoPacket {
        let mid = self.market_store.current().mid;
        if mid.is_finite() && mid > 0.0 {
            self.bar15m.on_tick(now_ms, mid);
            self.bar1h.on_tick(now_ms, mid);
            self.bar1h_updated_at_ms = now_ms;
        }

        self.depth_sr.maybe_analyze(now_ms / 1000);

        let b15m_closes = self.bar15m.close_array(config.lrc_len_b15m + 1);
        let lrc_b15m = lrc::compute_lrc_tv(
            &b15m_closes,
            config.lrc_len_b15m,
            config.dev_len,
            config.k_norm,
            config.flat_thresh,
            now_ms,
        );

        let a1h_closes = self.bar1h.close_array(config.lrc_len_a1h + 1);
        let lrc_a1h = lrc::compute_lrc_tv(
            &a1h_closes,
            config.lrc_len_a1h,
            config.dev_len,
            config.k_norm,
            config.flat_thresh,
            now_ms,
        );

        let daily_closes = self.bar1h.close_array(config.lrc_len_daily + 1);
        let lrc_daily = lrc::compute_lrc_tv(
            &daily_closes,
            config.lrc_len_daily,
            config.dev_len,
            config.k_norm,
            config.flat_thresh,
            now_ms,
        );

        let mut bar1h_adaptive_switch_reason = None;
        if let Some(top) = lrc_a1h.channel_top {
            if let Some(bottom) = lrc_a1h.channel_bottom {
                let span = top - bottom;
                let switched = self.adaptive_1h.observe(
                    span,
                    now_ms,
                    config.adaptive_min_final_span_usd,
                    config.adaptive_high_span_usd,
                    config.adaptive_expand_step,
                    config.adaptive_start_lookback,
                    config.adaptive_expanded_lookback,
                    config.adaptive_switch_cooldown_ms,
                    config.adaptive_weak_order_ms_after_switch,
                );
                if switched {
                    bar1h_adaptive_switch_reason = self.adaptive_1h.last_reason().map(|r| r.to_string());
                }
                self.bar1h.set_lookback_bars(self.adaptive_1h.current_lookback());
            }
        }

        let mut constraints = Vec::new();
        if now_ms - self.start_ms < config.warmup_ms {
            constraints.push("warmup".to_string());
        }
        if self.adaptive_1h.is_weak(now_ms) {
            constraints.push("bar1h_adaptive_switching".to_string());
        }

        let (bar15m_high, bar15m_low, bar15m_close, bar15m_ready) = match self.bar15m.current_bar() {
            Some(b) => (b.high, b.low, b.close, self.bar15m.ready()),
            None => (0.0, 0.0, 0.0, false),
        };
        let (bar1h_high, bar1h_low, bar1h_close) = match self.bar1h.current_bar() {
            Some(b) => (b.high, b.low, b.close),
            None => (0.0, 0.0, 0.0),
        };

        IoPacket {
            now_ms,
            market: self.market_store.current().clone(),
            bar15m_ready,
            bar15m_high,
            bar15m_low,
            bar15m_close,
            bar15m_recent: self.bar15m.recent_bars(config.sr_pivot_lookback_bars * 2 + config.sr_pivot_left_bars + 1),
            bar1h_ready: self.bar1h.ready(),
            bar1h_high,
            bar1h_low,
            bar1h_close,
            bar1h_confirmed_count: self.bar1h.confirmed_count(),
            bar1h_updated_at_ms: self.bar1h_updated_at_ms,
            bar1h_lookback_range_usd: self.lookback_range_usd(config.a_range_lookback_bars),
            lrc_b15m,
            lrc_a1h,
            lrc_daily,
            depth_sr: self.depth_sr.view(),
            trade_flow: self.trade_flow.state(now_ms),
            constraints,
            bar1h_adaptive_switch_reason,
        }
    }
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
        c
    }

    #[test]
    fn tick_produces_packet_with_market_mid() {
        let config = cfg();
        let mut agg = IoAggregator::new(&config, 0);
        agg.on_market_update(MarketUpdate {
            best_bid: Some(100.0),
            best_ask: Some(101.0),
            ..Default::default()
        });
        let packet = agg.tick(0, &config);
        assert!((packet.market.mid - 100.5).abs() < 1e-9);
    }

    #[test]
    fn warmup_constraint_present_before_warmup_elapses() {
        let config = cfg();
        let mut agg = IoAggregator::new(&config, 0);
        agg.on_market_update(MarketUpdate {
            best_bid: Some(100.0),
            best_ask: Some(101.0),
            ..Default::default()
        });
        let packet = agg.tick(1_000, &config);
        assert!(packet.has_constraint("warmup"));
        let packet2 = agg.tick(config.warmup_ms + 1, &config);
        assert!(!packet2.has_constraint("warmup"));
    }

    #[test]
    fn adaptive_switch_reason_surfaces_on_flat_narrow_channel() {
        let config = cfg();
        let mut agg = IoAggregator::new(&config, 0);
        agg.on_market_update(MarketUpdate {
            best_bid: Some(100.0),
            best_ask: Some(100.0),
            ..Default::default()
        });
        // Flat price across a few 1h bars builds a ready, ~0-width channel —
        // well under the default 60 USD minimum. The first observe() call at
        // or past the default switch cooldown (15 min) should then expand.
        agg.tick(0, &config);
        agg.tick(10_000, &config);
        agg.tick(20_000, &config);
        let packet = agg.tick(config.adaptive_switch_cooldown_ms, &config);
        assert_eq!(packet.bar1h_adaptive_switch_reason.as_deref(), Some("expand_narrow_span"));
    }
}
