// =============================================================================
// Meta Gate — toxic-flow rejection, evaluated before Decision A.
// =============================================================================
//
// Keeps its own opaque state across ticks: a short rolling window of
// per-tick toxicity samples, averaged into one score. Grounded in the same
// bucketed-imbalance idea as VPIN, but windowed by wall-clock time instead
// of volume buckets since this runs once per tick rather than per trade.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::decision::reason::ReasonCode;
use crate::market::io_aggregator::IoPacket;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaResult {
    pub allow: bool,
    pub toxicity_score: f64,
    pub reason: ReasonCode,
    pub diagnostic: String,
}

#[derive(Debug, Clone)]
struct Sample {
    ts_ms: i64,
    toxicity: f64,
}

/// Carries its rolling window across ticks; constructed once at startup.
#[derive(Debug, Default)]
pub struct MetaGate {
    samples: VecDeque<Sample>,
}

impl MetaGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn evict_stale(&mut self, now_ms: i64, lookback_ms: i64) {
        let cutoff = now_ms - lookback_ms;
        while let Some(front) = self.samples.front() {
            if front.ts_ms < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Per-tick toxicity sample: combines the nearest trade-flow window's
    /// one-sided pressure magnitude with acceleration (bursty one-sided
    /// flow is the toxic signature, not steady flow in either direction).
    fn sample_toxicity(packet: &IoPacket) -> f64 {
        let window = packet.trade_flow.windows.first();
        match window {
            Some(w) => {
                let pressure_mag = w.flow_pressure.abs();
                let accel_mag = w.acceleration.abs().min(2.0) / 2.0;
                (0.7 * pressure_mag + 0.3 * accel_mag).clamp(0.0, 1.0)
            }
            None => 0.0,
        }
    }

    pub fn evaluate(&mut self, packet: &IoPacket, config: &RuntimeConfig, now_ms: i64) -> MetaResult {
        self.samples.push_back(Sample {
            ts_ms: now_ms,
            toxicity: Self::sample_toxicity(packet),
        });
        self.evict_stale(now_ms, config.meta_lookback_ms);

        let toxicity_score = if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().map(|s| s.toxicity).sum::<f64>() / self.samples.len() as f64
        };

        if toxicity_score >= config.meta_toxic_threshold {
            return MetaResult {
                allow: false,
                toxicity_score,
                reason: ReasonCode::MetaToxicFlow,
                diagnostic: format!(
                    "meta: toxicity {toxicity_score:.3} >= {}",
                    config.meta_toxic_threshold
                ),
            };
        }

        MetaResult {
            allow: true,
            toxicity_score,
            reason: ReasonCode::MetaAllowed,
            diagnostic: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::depth_sr::DepthSrView;
    use crate::market::snapshot::MarketSnapshot;
    use crate::market::trade_flow::{TradeFlowState, WindowFlowStats};

    fn packet_with_flow(now_ms: i64, flow_pressure: f64, acceleration: f64) -> IoPacket {
        let mut market = MarketSnapshot::empty(now_ms);
        market.mid = 50_000.0;
        IoPacket {
            now_ms,
            market,
            bar15m_ready: true,
            bar15m_high: 0.0,
            bar15m_low: 0.0,
            bar15m_close: 0.0,
            bar15m_recent: vec![],
            bar1h_ready: true,
            bar1h_high: 0.0,
            bar1h_low: 0.0,
            bar1h_confirmed_count: 0,
            bar1h_updated_at_ms: now_ms,
            bar1h_lookback_range_usd: 0.0,
            bar1h_close: 0.0,
            lrc_b15m: crate::market::lrc::compute_lrc_tv(&[], 20, 2.0, 14.0, 0.15, now_ms),
            lrc_a1h: crate::market::lrc::compute_lrc_tv(&[], 20, 2.0, 14.0, 0.15, now_ms),
            lrc_daily: crate::market::lrc::compute_lrc_tv(&[], 20, 2.0, 14.0, 0.15, now_ms),
            depth_sr: DepthSrView {
                ready: false,
                support: None,
                resistance: None,
                secondary_support: None,
                secondary_resistance: None,
                asymmetry_ratio: None,
                observation_sample_count: 0,
                last_mid_px: 50_000.0,
            },
            trade_flow: TradeFlowState {
                windows: vec![WindowFlowStats {
                    window_ms: 5_000,
                    trade_count: 10,
                    buy_volume_usd: 0.0,
                    sell_volume_usd: 0.0,
                    flow_pressure,
                    trade_rate_per_sec: 2.0,
                    vwap: 50_000.0,
                    large_trade_count: 0,
                    acceleration,
                }],
                oi_delta: 0.0,
                oi_delta_at_ms: 0,
            },
            constraints: vec![],
            bar1h_adaptive_switch_reason: None,
        }
    }

    fn cfg() -> RuntimeConfig {
        RuntimeConfig::default()
    }

    #[test]
    fn calm_flow_allows() {
        let config = cfg();
        let mut gate = MetaGate::new();
        let packet = packet_with_flow(0, 0.05, 0.0);
        let result = gate.evaluate(&packet, &config, 0);
        assert!(result.allow);
        assert_eq!(result.reason, ReasonCode::MetaAllowed);
    }

    #[test]
    fn sustained_one_sided_burst_rejects() {
        let mut config = cfg();
        config.meta_toxic_threshold = 0.5;
        let mut gate = MetaGate::new();
        let mut last = None;
        for i in 0..10 {
            let packet = packet_with_flow(i * 1_000, 0.95, 1.0);
            last = Some(gate.evaluate(&packet, &config, i * 1_000));
        }
        let result = last.unwrap();
        assert!(!result.allow);
        assert_eq!(result.reason, ReasonCode::MetaToxicFlow);
    }

    #[test]
    fn stale_samples_evicted_outside_lookback() {
        let mut config = cfg();
        config.meta_lookback_ms = 5_000;
        config.meta_toxic_threshold = 0.9;
        let mut gate = MetaGate::new();
        let _ = gate.evaluate(&packet_with_flow(0, 0.99, 1.0), &config, 0);
        // jump far beyond lookback: the old toxic sample should be evicted
        let result = gate.evaluate(&packet_with_flow(100_000, 0.0, 0.0), &config, 100_000);
        assert!(result.allow);
    }
}
