// =============================================================================
// Bar Tracker — UTC-aligned OHLC folding, used at the 15m and 1h timeframes.
// =============================================================================
//
// Folds `(nowMs, midPx)` into the current bar. When the floor-boundary
// advances, the current bar closes into confirmed history and a fresh one
// opens. Backfilled candles are merged into gaps only, never overwriting.

use serde::{Deserialize, Serialize};

/// One OHLC bar. `close_history` is the tick-close trail used to recompute
/// `close` incrementally; it is not persisted downstream, only `close`
/// itself is read by the LRC engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub ts_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub close_history: Vec<f64>,
    pub source: BarSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarSource {
    Tick,
    Backfill,
}

impl Bar {
    fn open_at(ts_start: i64, px: f64) -> Self {
        Self {
            ts_start,
            open: px,
            high: px,
            low: px,
            close: px,
            close_history: vec![px],
            source: BarSource::Tick,
        }
    }
}

/// Folds ticks into bars at a fixed interval, aligned to UTC epoch
/// boundaries (`floor(ts_ms / interval_ms) * interval_ms`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarTracker {
    interval_ms: i64,
    current: Option<Bar>,
    confirmed: Vec<Bar>,
    /// Dynamically adjustable readiness threshold (adaptive controller for
    /// the 1h tracker switches this; 15m/daily trackers leave it fixed).
    lookback_bars: usize,
}

impl BarTracker {
    pub fn new(interval_ms: i64, lookback_bars: usize) -> Self {
        Self {
            interval_ms,
            current: None,
            confirmed: Vec::new(),
            lookback_bars,
        }
    }

    fn boundary(&self, ts_ms: i64) -> i64 {
        (ts_ms.div_euclid(self.interval_ms)) * self.interval_ms
    }

    /// Fold one `(now_ms, mid_px)` sample. Non-finite `mid_px` is ignored —
    /// tracker preconditions never panic or throw.
    pub fn on_tick(&mut self, now_ms: i64, mid_px: f64) {
        if !mid_px.is_finite() {
            return;
        }
        let boundary = self.boundary(now_ms);

        match &mut self.current {
            None => {
                self.current = Some(Bar::open_at(boundary, mid_px));
            }
            Some(bar) if boundary > bar.ts_start => {
                let closed = self.current.take().unwrap();
                self.confirmed.push(closed);
                self.current = Some(Bar::open_at(boundary, mid_px));
            }
            Some(bar) => {
                bar.high = bar.high.max(mid_px);
                bar.low = bar.low.min(mid_px);
                bar.close = mid_px;
                bar.close_history.push(mid_px);
            }
        }
    }

    /// Newest-first close array: `[current.close, lastConfirmed.close, ...]`.
    /// Length is `min(len, confirmed_count + 1)`.
    pub fn close_array(&self, len: usize) -> Vec<f64> {
        let mut out = Vec::with_capacity(len.min(self.confirmed.len() + 1));
        if let Some(bar) = &self.current {
            out.push(bar.close);
        }
        for bar in self.confirmed.iter().rev() {
            if out.len() >= len {
                break;
            }
            out.push(bar.close);
        }
        out.truncate(len);
        out
    }

    pub fn confirmed_count(&self) -> usize {
        self.confirmed.len()
    }

    /// Last `n` bars (confirmed, plus the current bar if present),
    /// oldest-first — the shape pivot detection needs.
    pub fn recent_bars(&self, n: usize) -> Vec<Bar> {
        let take_confirmed = n.saturating_sub(if self.current.is_some() { 1 } else { 0 });
        let mut out: Vec<Bar> = self
            .confirmed
            .iter()
            .rev()
            .take(take_confirmed)
            .rev()
            .cloned()
            .collect();
        if let Some(cur) = &self.current {
            out.push(cur.clone());
        }
        out
    }

    pub fn current_bar(&self) -> Option<&Bar> {
        self.current.as_ref()
    }

    pub fn last_confirmed(&self) -> Option<&Bar> {
        self.confirmed.last()
    }

    /// All confirmed bars, oldest-first.
    pub fn confirmed_slice(&self) -> &[Bar] {
        &self.confirmed
    }

    pub fn set_lookback_bars(&mut self, lookback_bars: usize) {
        self.lookback_bars = lookback_bars;
    }

    pub fn lookback_bars(&self) -> usize {
        self.lookback_bars
    }

    /// `ready = current exists AND confirmed_count >= lookback_bars`.
    pub fn ready(&self) -> bool {
        self.current.is_some() && self.confirmed.len() >= self.lookback_bars
    }

    /// Insert backfilled candles into gaps in history. Candles with
    /// `ts_start >= currentBoundary`, non-finite fields, or `high < low`
    /// are rejected. History stays sorted and deduplicated by `ts_start`.
    /// The current bar is adopted only if absent.
    pub fn merge_backfill_candles(&mut self, mut candles: Vec<Bar>) {
        let current_boundary = self.current.as_ref().map(|b| b.ts_start);

        candles.retain(|c| {
            let finite = c.open.is_finite() && c.high.is_finite() && c.low.is_finite() && c.close.is_finite();
            let valid_range = c.high >= c.low;
            let before_current = current_boundary.map(|b| c.ts_start < b).unwrap_or(true);
            finite && valid_range && before_current
        });

        for mut candle in candles {
            candle.source = BarSource::Backfill;
            if !self.confirmed.iter().any(|b| b.ts_start == candle.ts_start) {
                self.confirmed.push(candle);
            }
        }
        self.confirmed.sort_by_key(|b| b.ts_start);

        if self.current.is_none() {
            if let Some(last) = self.confirmed.last().cloned() {
                // Only adopt as current if it would be the active boundary;
                // otherwise leave current empty until a live tick arrives.
                if current_boundary.is_none() {
                    self.current = Some(last);
                    self.confirmed.pop();
                }
            }
        }
    }
}
