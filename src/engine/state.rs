// =============================================================================
// EngineState — the engine loop's exclusively-owned persisted state.
// =============================================================================
//
// Grounded on the teacher's `position_engine.rs` (`Position`/`PositionManager`
// life-cycle), simplified from dual TP1/TP2 partial-close to a single TP/SL
// per SPEC_FULL §3 (perpetual engines here run one rail-derived target, not a
// scaled ladder). Persisted atomically via `persistence::atomic_write_json`.

use serde::{Deserialize, Serialize};

use crate::decision::ReasonCode;
use crate::types::{SafetyReason, SafetyStatus, Side};

/// Gate-output snapshot captured at entry time, for post-trade diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryContext {
    pub regime: String,
    pub zone: String,
    pub trend_strength: String,
    pub entry_quality_reason: ReasonCode,
    pub structure_hash: String,
}

/// Flow-adaptive exit streak state. Each counter advances on a tick where its
/// signal is active and resets otherwise; an exit fires once a counter
/// reaches `exit_streak_required` consecutive ticks — matching the teacher's
/// triple-barrier progressive-tightening discipline ("only tighten, never
/// widen") generalized to named streaks instead of a single SL path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExitStreaks {
    pub flow_tp: u32,
    pub burst: u32,
    pub drift: u32,
    pub shield: u32,
    pub wall: u32,
    pub flow: u32,
}

impl ExitStreaks {
    fn bump(counter: &mut u32, active: bool) {
        *counter = if active { *counter + 1 } else { 0 };
    }

    /// Advance every streak given this tick's active-signal set; returns the
    /// name of the first streak that has reached `required`, if any.
    pub fn observe(&mut self, active: &ExitSignals, required: u32) -> Option<&'static str> {
        Self::bump(&mut self.flow_tp, active.flow_tp);
        Self::bump(&mut self.burst, active.burst);
        Self::bump(&mut self.drift, active.drift);
        Self::bump(&mut self.shield, active.shield);
        Self::bump(&mut self.wall, active.wall);
        Self::bump(&mut self.flow, active.flow);

        if self.flow_tp >= required {
            Some("flow_tp")
        } else if self.burst >= required {
            Some("burst")
        } else if self.drift >= required {
            Some("drift")
        } else if self.shield >= required {
            Some("shield")
        } else if self.wall >= required {
            Some("wall")
        } else if self.flow >= required {
            Some("flow")
        } else {
            None
        }
    }
}

/// Per-tick boolean read of each flow-adaptive exit signal. Computed by the
/// engine loop from the current `IoPacket` and position state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitSignals {
    pub flow_tp: bool,
    pub burst: bool,
    pub drift: bool,
    pub shield: bool,
    pub wall: bool,
    pub flow: bool,
}

/// An open perpetual position. Destroyed (not archived) on close — the
/// closed record lives only in `trades`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub side: Side,
    pub size: f64,
    pub entry_px: f64,
    pub entry_ts: i64,
    pub tp_px: f64,
    pub sl_px: f64,
    pub tp_distance_usd: f64,
    /// Most adverse mid seen since entry (worst-case excursion tracking).
    pub worst_px: f64,
    pub entry_context: EntryContext,
    #[serde(default)]
    pub exit_streaks: ExitStreaks,
    /// Opaque structural-exit bookkeeping carried alongside the depth SR
    /// view; not interpreted by the engine loop itself, only threaded
    /// through so a future depth-based trailing exit can consume it.
    #[serde(default)]
    pub depth_exit_state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub side: Side,
    pub entry_px: f64,
    pub exit_px: f64,
    pub size: f64,
    pub timestamp_entry: i64,
    pub timestamp_exit: i64,
    pub realized_pnl_usd: f64,
    pub realized_pnl_net_usd: f64,
    pub fee_usd: f64,
    pub exit_reason: String,
    pub exit_signal: Option<String>,
    pub hold_ms: i64,
    pub entry_profile_mode: String,
    pub max_adverse_usd: f64,
    pub max_favorable_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub long_trades: u64,
    pub long_wins: u64,
    pub short_trades: u64,
    pub short_wins: u64,
    pub realized_pnl_usd: f64,
    pub realized_pnl_net_usd: f64,
    /// Annualized return over the trailing 7 days, derived from `history7d`.
    pub apr7d: f64,
    /// Daily realized-PnL-net buckets for the trailing 7 days, oldest first.
    pub history7d: Vec<f64>,
    /// UTC day index (ms/86_400_000) matching each `history7d` bucket.
    #[serde(default)]
    history7d_day: Vec<i64>,
}

impl Default for EngineStats {
    fn default() -> Self {
        Self {
            total_trades: 0,
            wins: 0,
            losses: 0,
            long_trades: 0,
            long_wins: 0,
            short_trades: 0,
            short_wins: 0,
            realized_pnl_usd: 0.0,
            realized_pnl_net_usd: 0.0,
            apr7d: 0.0,
            history7d: Vec::new(),
            history7d_day: Vec::new(),
        }
    }
}

impl EngineStats {
    /// Fold one closed trade into the running stats and recompute apr7d from
    /// a trailing 7-entry daily history (one bucket per UTC day).
    pub fn record_trade(&mut self, trade: &TradeRecord, base_notional_usd: f64) {
        self.total_trades += 1;
        self.realized_pnl_usd += trade.realized_pnl_usd;
        self.realized_pnl_net_usd += trade.realized_pnl_net_usd;

        let is_win = trade.realized_pnl_net_usd >= 0.0;
        if is_win {
            self.wins += 1;
        } else {
            self.losses += 1;
        }

        match trade.side {
            Side::Buy => {
                self.long_trades += 1;
                if is_win {
                    self.long_wins += 1;
                }
            }
            Side::Sell => {
                self.short_trades += 1;
                if is_win {
                    self.short_wins += 1;
                }
            }
            Side::None => {}
        }

        const DAY_MS: i64 = 86_400_000;
        let day_index = trade.timestamp_exit / DAY_MS;
        match self.history7d_day.last().copied() {
            Some(last_day) if last_day == day_index => {
                *self.history7d.last_mut().unwrap() += trade.realized_pnl_net_usd;
            }
            _ => {
                self.history7d.push(trade.realized_pnl_net_usd);
                self.history7d_day.push(day_index);
                if self.history7d.len() > 7 {
                    self.history7d.remove(0);
                    self.history7d_day.remove(0);
                }
            }
        }

        let window_pnl: f64 = self.history7d.iter().sum();
        self.apr7d = if base_notional_usd > 0.0 {
            (window_pnl / base_notional_usd) * (365.0 / 7.0) * 100.0
        } else {
            0.0
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Safety {
    pub status: SafetyStatus,
    pub reason: SafetyReason,
    pub since_ms: i64,
}

impl Default for Safety {
    fn default() -> Self {
        Self {
            status: SafetyStatus::Normal,
            reason: SafetyReason::None,
            since_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub open_position: Option<OpenPosition>,
    pub trades: Vec<TradeRecord>,
    pub stats: EngineStats,
    pub last_decision: Option<ReasonCode>,
    pub last_update_ms: i64,
    pub last_tick_ts: i64,
    pub last_loop_at_ms: i64,
    pub last_market_at_ms: i64,
    pub safety: Safety,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            open_position: None,
            trades: Vec::new(),
            stats: EngineStats::default(),
            last_decision: None,
            last_update_ms: 0,
            last_tick_ts: 0,
            last_loop_at_ms: 0,
            last_market_at_ms: 0,
            safety: Safety::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(side: Side, pnl_net: f64, exit_ts: i64) -> TradeRecord {
        TradeRecord {
            trade_id: "t1".into(),
            side,
            entry_px: 100.0,
            exit_px: 101.0,
            size: 1.0,
            timestamp_entry: exit_ts - 1000,
            timestamp_exit: exit_ts,
            realized_pnl_usd: pnl_net,
            realized_pnl_net_usd: pnl_net,
            fee_usd: 0.0,
            exit_reason: "tp".into(),
            exit_signal: None,
            hold_ms: 1000,
            entry_profile_mode: "normal".into(),
            max_adverse_usd: 0.0,
            max_favorable_usd: pnl_net.max(0.0),
        }
    }

    #[test]
    fn record_trade_updates_win_loss_counts() {
        let mut stats = EngineStats::default();
        stats.record_trade(&trade(Side::Buy, 10.0, 86_400_000), 1000.0);
        stats.record_trade(&trade(Side::Sell, -5.0, 86_400_000 * 2), 1000.0);
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.long_trades, 1);
        assert_eq!(stats.short_trades, 1);
        assert!((stats.realized_pnl_net_usd - 5.0).abs() < 1e-9);
    }

    #[test]
    fn record_trade_buckets_same_day_together() {
        let mut stats = EngineStats::default();
        stats.record_trade(&trade(Side::Buy, 10.0, 1_000), 1000.0);
        stats.record_trade(&trade(Side::Buy, 5.0, 2_000), 1000.0);
        assert_eq!(stats.history7d.len(), 1);
        assert!((stats.history7d[0] - 15.0).abs() < 1e-9);
    }

    #[test]
    fn record_trade_caps_history_at_seven_days() {
        let mut stats = EngineStats::default();
        for day in 0..10 {
            stats.record_trade(&trade(Side::Buy, 1.0, day * 86_400_000 + 1), 1000.0);
        }
        assert_eq!(stats.history7d.len(), 7);
    }

    #[test]
    fn exit_streaks_fire_at_threshold() {
        let mut streaks = ExitStreaks::default();
        let active = ExitSignals {
            drift: true,
            ..Default::default()
        };
        assert_eq!(streaks.observe(&active, 3), None);
        assert_eq!(streaks.observe(&active, 3), None);
        assert_eq!(streaks.observe(&active, 3), Some("drift"));
    }

    #[test]
    fn exit_streaks_reset_on_gap() {
        let mut streaks = ExitStreaks::default();
        let active = ExitSignals {
            wall: true,
            ..Default::default()
        };
        let inactive = ExitSignals::default();
        streaks.observe(&active, 3);
        streaks.observe(&active, 3);
        streaks.observe(&inactive, 3);
        assert_eq!(streaks.wall, 0);
    }

    #[test]
    fn engine_state_default_has_no_position() {
        let state = EngineState::default();
        assert!(state.open_position.is_none());
        assert_eq!(state.safety.status, SafetyStatus::Normal);
    }
}
