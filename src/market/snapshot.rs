// =============================================================================
// Market State Store — prev/current MarketSnapshot pair
// =============================================================================
//
// Holds the venue's per-tick fields. Fields carry forward from the previous
// snapshot when absent in an incoming tick update (the venue WS feed emits
// partial updates, e.g. a depth delta carries no trade fields).

use serde::{Deserialize, Serialize};

/// One price level: `(price, size)`.
pub type Level = (f64, f64);

/// Per-tick venue state. `prev`/`current` are held as a pair by
/// `MarketStateStore`; this struct itself is a single point-in-time view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub ts_ms: i64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub mid: f64,
    pub open_interest: f64,
    pub funding: f64,
    pub premium: f64,
    pub mark: f64,
    pub oracle: f64,
    pub impact_bid: f64,
    pub impact_ask: f64,
    pub last_trade_side: Option<crate::types::Side>,
    pub last_trade_px: f64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

impl MarketSnapshot {
    pub fn empty(ts_ms: i64) -> Self {
        Self {
            ts_ms,
            best_bid: 0.0,
            best_ask: 0.0,
            mid: 0.0,
            open_interest: 0.0,
            funding: 0.0,
            premium: 0.0,
            mark: 0.0,
            oracle: 0.0,
            impact_bid: 0.0,
            impact_ask: 0.0,
            last_trade_side: None,
            last_trade_px: 0.0,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    pub fn impact_spread_bps(&self) -> f64 {
        if self.impact_bid <= 0.0 || self.impact_ask <= 0.0 {
            return 0.0;
        }
        let mid = (self.impact_bid + self.impact_ask) / 2.0;
        if mid <= 0.0 {
            return 0.0;
        }
        (self.impact_ask - self.impact_bid) / mid * 10_000.0
    }
}

/// A partial update from the venue feed; any field left `None` carries
/// forward from the prior snapshot unchanged.
#[derive(Debug, Clone, Default)]
pub struct MarketUpdate {
    pub ts_ms: Option<i64>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub open_interest: Option<f64>,
    pub funding: Option<f64>,
    pub premium: Option<f64>,
    pub mark: Option<f64>,
    pub oracle: Option<f64>,
    pub impact_bid: Option<f64>,
    pub impact_ask: Option<f64>,
    pub last_trade_side: Option<crate::types::Side>,
    pub last_trade_px: Option<f64>,
    pub bids: Option<Vec<Level>>,
    pub asks: Option<Vec<Level>>,
}

/// Owns the (prev, current) pair and produces a diff-free merged snapshot
/// on each apply.
pub struct MarketStateStore {
    prev: Option<MarketSnapshot>,
    current: MarketSnapshot,
}

impl MarketStateStore {
    pub fn new(ts_ms: i64) -> Self {
        Self {
            prev: None,
            current: MarketSnapshot::empty(ts_ms),
        }
    }

    /// Apply `update` onto `current`, carrying forward any unset field,
    /// then advance `prev` strictly after this call (never mid-tick).
    pub fn apply(&mut self, update: MarketUpdate) {
        self.prev = Some(self.current.clone());
        let cur = &mut self.current;

        if let Some(ts) = update.ts_ms {
            cur.ts_ms = ts;
        }
        if let Some(v) = update.best_bid {
            cur.best_bid = v;
        }
        if let Some(v) = update.best_ask {
            cur.best_ask = v;
        }
        if let Some(v) = update.open_interest {
            cur.open_interest = v;
        }
        if let Some(v) = update.funding {
            cur.funding = v;
        }
        if let Some(v) = update.premium {
            cur.premium = v;
        }
        if let Some(v) = update.mark {
            cur.mark = v;
        }
        if let Some(v) = update.oracle {
            cur.oracle = v;
        }
        if let Some(v) = update.impact_bid {
            cur.impact_bid = v;
        }
        if let Some(v) = update.impact_ask {
            cur.impact_ask = v;
        }
        if update.last_trade_side.is_some() {
            cur.last_trade_side = update.last_trade_side;
        }
        if let Some(v) = update.last_trade_px {
            cur.last_trade_px = v;
        }
        if let Some(v) = update.bids {
            cur.bids = v;
        }
        if let Some(v) = update.asks {
            cur.asks = v;
        }

        if cur.best_bid > 0.0 && cur.best_ask > 0.0 {
            cur.mid = (cur.best_bid + cur.best_ask) / 2.0;
        }
    }

    pub fn current(&self) -> &MarketSnapshot {
        &self.current
    }

    pub fn prev(&self) -> Option<&MarketSnapshot> {
        self.prev.as_ref()
    }
}
