// =============================================================================
// Trade Flow Tracker — multi-window buy/sell pressure and acceleration.
// =============================================================================
//
// Ring buffer of recent trades sized to the largest configured window.
// Computes, per window, trade count, buy/sell volume, flow pressure, trade
// rate, VWAP, large-trade count and acceleration. Also tracks open-interest
// delta independent of the trade windows.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::Side;

#[derive(Debug, Clone)]
struct Trade {
    ts_ms: i64,
    price: f64,
    size: f64,
    side: Side,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowFlowStats {
    pub window_ms: i64,
    pub trade_count: usize,
    pub buy_volume_usd: f64,
    pub sell_volume_usd: f64,
    pub flow_pressure: f64,
    pub trade_rate_per_sec: f64,
    pub vwap: f64,
    pub large_trade_count: usize,
    pub acceleration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFlowState {
    pub windows: Vec<WindowFlowStats>,
    pub oi_delta: f64,
    pub oi_delta_at_ms: i64,
}

pub struct TradeFlowTracker {
    windows_ms: Vec<i64>,
    large_trade_factor: f64,
    cleanup_interval_ms: i64,
    max_buffer_size: usize,

    buffer: VecDeque<Trade>,
    last_cleanup_ms: i64,

    prev_oi: Option<f64>,
    oi_delta: f64,
    oi_delta_at_ms: i64,
}

impl TradeFlowTracker {
    pub fn new(
        windows_ms: Vec<i64>,
        large_trade_factor: f64,
        cleanup_interval_ms: i64,
        max_buffer_size: usize,
    ) -> Self {
        Self {
            windows_ms,
            large_trade_factor,
            cleanup_interval_ms,
            max_buffer_size,
            buffer: VecDeque::new(),
            last_cleanup_ms: 0,
            prev_oi: None,
            oi_delta: 0.0,
            oi_delta_at_ms: 0,
        }
    }

    pub fn on_trade(&mut self, ts_ms: i64, price: f64, size: f64, side: Side) {
        if !price.is_finite() || !size.is_finite() || size <= 0.0 {
            return;
        }
        self.buffer.push_back(Trade { ts_ms, price, size, side });
        self.maybe_evict(ts_ms);
    }

    pub fn on_open_interest(&mut self, ts_ms: i64, oi: f64) {
        if !oi.is_finite() {
            return;
        }
        if let Some(prev) = self.prev_oi {
            self.oi_delta = oi - prev;
            self.oi_delta_at_ms = ts_ms;
        }
        self.prev_oi = Some(oi);
    }

    fn maybe_evict(&mut self, now_ms: i64) {
        if now_ms - self.last_cleanup_ms < self.cleanup_interval_ms && self.buffer.len() <= self.max_buffer_size {
            return;
        }
        self.last_cleanup_ms = now_ms;
        let largest_window = self.windows_ms.iter().copied().max().unwrap_or(0);
        let cutoff = now_ms - largest_window;
        while let Some(front) = self.buffer.front() {
            if front.ts_ms < cutoff {
                self.buffer.pop_front();
            } else {
                break;
            }
        }
        while self.buffer.len() > self.max_buffer_size {
            self.buffer.pop_front();
        }
    }

    fn window_stats(&self, now_ms: i64, window_ms: i64) -> WindowFlowStats {
        let start = now_ms - window_ms;
        let half = now_ms - window_ms / 2;

        let mut buy_vol = 0.0;
        let mut sell_vol = 0.0;
        let mut trade_count = 0usize;
        let mut notional_sum = 0.0;
        let mut price_vol_sum = 0.0;
        let mut size_sum = 0.0;
        let mut recent_half_vol = 0.0;
        let mut prev_half_vol = 0.0;
        let mut notionals: Vec<f64> = Vec::new();

        for t in self.buffer.iter().rev() {
            if t.ts_ms < start {
                break;
            }
            let notional = t.price * t.size;
            trade_count += 1;
            notional_sum += notional;
            price_vol_sum += t.price * t.size;
            size_sum += t.size;
            notionals.push(notional);
            match t.side {
                Side::Buy => buy_vol += notional,
                Side::Sell => sell_vol += notional,
                Side::None => {}
            }
            if t.ts_ms >= half {
                recent_half_vol += t.size;
            } else {
                prev_half_vol += t.size;
            }
        }

        let total_vol = buy_vol + sell_vol;
        let flow_pressure = if total_vol > 0.0 { (buy_vol - sell_vol) / total_vol } else { 0.0 };
        let trade_rate_per_sec = if window_ms > 0 {
            trade_count as f64 / (window_ms as f64 / 1000.0)
        } else {
            0.0
        };
        let vwap = if size_sum > 0.0 { price_vol_sum / size_sum } else { 0.0 };

        let avg_notional = if !notionals.is_empty() {
            notional_sum / notionals.len() as f64
        } else {
            0.0
        };
        let large_threshold = avg_notional * self.large_trade_factor;
        let large_trade_count = notionals.iter().filter(|&&n| n >= large_threshold && large_threshold > 0.0).count();

        let acceleration = if prev_half_vol > 0.0 {
            (recent_half_vol - prev_half_vol) / prev_half_vol
        } else {
            0.0
        };

        WindowFlowStats {
            window_ms,
            trade_count,
            buy_volume_usd: buy_vol,
            sell_volume_usd: sell_vol,
            flow_pressure,
            trade_rate_per_sec,
            vwap,
            large_trade_count,
            acceleration,
        }
    }

    pub fn state(&self, now_ms: i64) -> TradeFlowState {
        let windows = self.windows_ms.iter().map(|&w| self.window_stats(now_ms, w)).collect();
        TradeFlowState {
            windows,
            oi_delta: self.oi_delta,
            oi_delta_at_ms: self.oi_delta_at_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_pressure_positive_when_buys_dominate() {
        let mut t = TradeFlowTracker::new(vec![5_000, 30_000, 60_000], 5.0, 1_000, 10_000);
        t.on_trade(0, 100.0, 10.0, Side::Buy);
        t.on_trade(100, 100.0, 1.0, Side::Sell);
        let state = t.state(200);
        let w5s = &state.windows[0];
        assert!(w5s.flow_pressure > 0.0);
        assert_eq!(w5s.trade_count, 2);
    }

    #[test]
    fn flow_pressure_zero_on_no_volume() {
        let t = TradeFlowTracker::new(vec![5_000], 5.0, 1_000, 10_000);
        let state = t.state(1_000);
        assert_eq!(state.windows[0].flow_pressure, 0.0);
        assert_eq!(state.windows[0].vwap, 0.0);
    }

    #[test]
    fn eviction_enforces_max_buffer_size() {
        let mut t = TradeFlowTracker::new(vec![60_000], 5.0, 0, 5);
        for i in 0..50_i64 {
            t.on_trade(i, 100.0, 1.0, Side::Buy);
        }
        assert!(t.buffer.len() <= 5);
    }

    #[test]
    fn oi_delta_tracks_change_and_timestamp() {
        let mut t = TradeFlowTracker::new(vec![5_000], 5.0, 1_000, 1_000);
        t.on_open_interest(0, 1_000.0);
        assert_eq!(t.state(0).oi_delta, 0.0); // no prior baseline yet
        t.on_open_interest(100, 1_200.0);
        let state = t.state(100);
        assert!((state.oi_delta - 200.0).abs() < 1e-9);
        assert_eq!(state.oi_delta_at_ms, 100);
    }

    #[test]
    fn acceleration_zero_when_prior_half_empty() {
        let mut t = TradeFlowTracker::new(vec![10_000], 5.0, 1_000, 1_000);
        t.on_trade(9_000, 100.0, 1.0, Side::Buy);
        let state = t.state(10_000);
        assert_eq!(state.windows[0].acceleration, 0.0);
    }
}
