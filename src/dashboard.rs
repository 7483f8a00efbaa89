// =============================================================================
// Dashboard Snapshot — the 2Hz broadcast frame and the ws-status-v1 frame.
// =============================================================================
//
// Grounded on the teacher's `app_state::build_snapshot` convention (a fresh
// Serialize DTO assembled from live state on demand) but restructured around
// SPEC_FULL §9's "immutable snapshot" concurrency note: the engine loop
// builds one of these per broadcast tick and pushes it through a
// `tokio::sync::watch` channel, so the API layer never touches `Context`
// directly and the tick loop never blocks on a dashboard connection.

use serde::Serialize;

use crate::context::Context;
use crate::decision::ReasonCode;
use crate::engine::{EngineStats, ExitStreaks, OpenPosition, TradeRecord};
use crate::health::{HealthReport, StageHealth, StageStatus};
use crate::market::snapshot::Level;
use crate::types::{Regime, Side, TrendStrength, Zone};

#[derive(Debug, Clone, Serialize)]
pub struct EquitySnapshot {
    pub realized_pnl_usd: f64,
    pub realized_pnl_net_usd: f64,
    pub unrealized_pnl_usd: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateEntry {
    pub reason: ReasonCode,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateSnapshot {
    pub evaluated: u64,
    pub top_reasons: Vec<GateEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegimeSnapshot {
    pub regime: Regime,
    pub zone: Zone,
    pub trend_strength: TrendStrength,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub ts: i64,
    pub equity: EquitySnapshot,
    pub performance: EngineStats,
    pub gate: GateSnapshot,
    pub regime: Option<RegimeSnapshot>,
    pub position: Option<OpenPosition>,
    pub exit_streaks: Option<ExitStreaks>,
    pub recent_trades: Vec<TradeRecord>,
    pub book_bids: Vec<Level>,
    pub book_asks: Vec<Level>,
}

impl DashboardSnapshot {
    /// Build a fresh snapshot from whatever `Context` last observed. Never
    /// mutates `ctx` — read-only by construction so it can run on a timer
    /// independent of the tick cadence.
    pub fn build(ctx: &Context, now_ms: i64) -> Self {
        let unrealized_pnl_usd = match (&ctx.state.open_position, ctx.last_packet.as_ref()) {
            (Some(pos), Some(packet)) => unrealized_pnl(pos, packet.market.mid),
            _ => 0.0,
        };

        let top_reasons = ctx
            .decision_snapshot()
            .into_iter()
            .take(5)
            .map(|(reason, count)| GateEntry { reason, count })
            .collect();

        let regime = ctx.last_a.as_ref().map(|a| RegimeSnapshot {
            regime: a.regime,
            zone: a.zone,
            trend_strength: a.trend_strength,
        });

        let (book_bids, book_asks) = match ctx.last_packet.as_ref() {
            Some(packet) => (
                packet.market.bids.iter().take(5).cloned().collect(),
                packet.market.asks.iter().take(5).cloned().collect(),
            ),
            None => (Vec::new(), Vec::new()),
        };

        let recent_trades = ctx
            .state
            .trades
            .iter()
            .rev()
            .take(10)
            .cloned()
            .collect::<Vec<_>>();

        Self {
            kind: "dashboard",
            ts: now_ms,
            equity: EquitySnapshot {
                realized_pnl_usd: ctx.state.stats.realized_pnl_usd,
                realized_pnl_net_usd: ctx.state.stats.realized_pnl_net_usd,
                unrealized_pnl_usd,
            },
            performance: ctx.state.stats.clone(),
            gate: GateSnapshot {
                evaluated: ctx.decision_total(),
                top_reasons,
            },
            regime,
            position: ctx.state.open_position.clone(),
            exit_streaks: ctx.state.open_position.as_ref().map(|p| p.exit_streaks.clone()),
            recent_trades,
            book_bids,
            book_asks,
        }
    }
}

fn unrealized_pnl(pos: &OpenPosition, mid: f64) -> f64 {
    if mid <= 0.0 {
        return 0.0;
    }
    match pos.side {
        Side::Buy => (mid - pos.entry_px) * pos.size,
        Side::Sell => (pos.entry_px - mid) * pos.size,
        Side::None => 0.0,
    }
}

/// `ws-status-v1` frame: a coarse connection-health summary for the
/// dashboard UI, derived from the same `HealthReport` the `/health`
/// endpoint returns.
#[derive(Debug, Clone, Serialize)]
pub struct WsStatusFrame {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub state: &'static str,
    pub severity: &'static str,
    pub hint: &'static str,
    pub cores: Vec<StageHealth>,
}

pub fn ws_status(report: &HealthReport) -> WsStatusFrame {
    let network = report.stages.iter().find(|s| s.name == "network");
    let any_na = report.stages.iter().any(|s| s.status == StageStatus::Na);
    let any_ng = report.stages.iter().any(|s| s.status == StageStatus::Ng);
    let any_warn = report.stages.iter().any(|s| s.status == StageStatus::Warn);

    let (state, severity, hint) = if network.map(|s| s.status == StageStatus::Ng).unwrap_or(false) {
        ("NO_FEED", "ERROR", "venue feed stalled beyond the network NG threshold")
    } else if any_na {
        ("BOOTING", "OK", "waiting for first samples from every stage")
    } else if any_ng {
        ("ERROR", "ERROR", "one or more stages exceeded their NG staleness threshold")
    } else if any_warn {
        ("STALLED", "WARN", "one or more stages are aging past their WARN threshold")
    } else {
        ("STABLE", "OK", "all stages reporting within thresholds")
    };

    WsStatusFrame {
        kind: "ws-status-v1",
        state,
        severity,
        hint,
        cores: report.stages.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    #[test]
    fn build_with_no_activity_yields_empty_snapshot() {
        let ctx = Context::new(RuntimeConfig::default(), 0);
        let snap = DashboardSnapshot::build(&ctx, 0);
        assert_eq!(snap.kind, "dashboard");
        assert!(snap.position.is_none());
        assert!(snap.recent_trades.is_empty());
    }

    #[test]
    fn ws_status_boots_before_any_heartbeat() {
        let config = RuntimeConfig::default();
        let report = crate::health::StageHeartbeats::default().report(&config, 0);
        let status = ws_status(&report);
        assert_eq!(status.state, "BOOTING");
    }

    #[test]
    fn ws_status_stable_when_all_fresh() {
        let config = RuntimeConfig::default();
        let mut hb = crate::health::StageHeartbeats::default();
        hb.last_ws_ms = Some(0);
        hb.last_io_ms = Some(0);
        hb.last_decision_ms = Some(0);
        hb.last_engine_ms = Some(0);
        let report = hb.report(&config, 1);
        let status = ws_status(&report);
        assert_eq!(status.state, "STABLE");
        assert_eq!(status.severity, "OK");
    }
}
