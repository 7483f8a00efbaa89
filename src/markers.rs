// =============================================================================
// Markers & Trade Log — the JSONL external interfaces from SPEC_FULL §6.
// =============================================================================
//
// Grounded on `persistence::JsonlWriter` (append-only, one JSON object per
// line). Two files: `logs/trades.jsonl` (one record per closed trade, camelCase
// keys — this is the dashboard/backtest-tooling contract, not our internal
// snake_case `TradeRecord`) and `logs/markers.jsonl` (lifecycle + backfill
// events). `logs/crash.log` gets the same crash record, separately, so an
// operator can `tail -f` just the crashes.

use std::collections::HashMap;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::engine::{EngineStats, TradeRecord};
use crate::persistence::JsonlWriter;

/// External trade-log record. Field names are the camelCase contract named
/// in SPEC_FULL §6, independent of `TradeRecord`'s internal snake_case shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeLogRecord {
    pub trade_id: String,
    pub side: String,
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

impl From<&TradeRecord> for TradeLogRecord {
    fn from(t: &TradeRecord) -> Self {
        Self {
            trade_id: t.trade_id.clone(),
            side: t.side.to_string(),
            entry_px: t.entry_px,
            exit_px: t.exit_px,
            size: t.size,
            timestamp_entry: t.timestamp_entry,
            timestamp_exit: t.timestamp_exit,
            realized_pnl_usd: t.realized_pnl_usd,
            realized_pnl_net_usd: t.realized_pnl_net_usd,
            fee_usd: t.fee_usd,
            exit_reason: t.exit_reason.clone(),
            exit_signal: t.exit_signal.clone(),
            hold_ms: t.hold_ms,
            entry_profile_mode: t.entry_profile_mode.clone(),
            max_adverse_usd: t.max_adverse_usd,
            max_favorable_usd: t.max_favorable_usd,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub realized_pnl_net_usd: f64,
}

impl From<&EngineStats> for SessionStats {
    fn from(s: &EngineStats) -> Self {
        Self {
            total_trades: s.total_trades,
            wins: s.wins,
            losses: s.losses,
            realized_pnl_net_usd: s.realized_pnl_net_usd,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum MarkerEvent {
    #[serde(rename = "shutdown")]
    Shutdown {
        ts: i64,
        reason: String,
        uptime_hours: f64,
        uptime_ms: i64,
        stopped_at: i64,
        session_stats: SessionStats,
    },
    #[serde(rename = "bar1h_backfill_success")]
    Bar1hBackfillSuccess { ts: i64, bars: usize },
    #[serde(rename = "bar1h_backfill_failed")]
    Bar1hBackfillFailed { ts: i64, error: String },
    #[serde(rename = "bar1h_backfill_ready")]
    Bar1hBackfillReady { ts: i64 },
    #[serde(rename = "bar1h_backfill_exception")]
    Bar1hBackfillException { ts: i64, error: String },
    #[serde(rename = "bar15m_backfill_success")]
    Bar15mBackfillSuccess { ts: i64, bars: usize },
    #[serde(rename = "bar15m_backfill_failed")]
    Bar15mBackfillFailed { ts: i64, error: String },
    #[serde(rename = "bar15m_backfill_ready")]
    Bar15mBackfillReady { ts: i64 },
    #[serde(rename = "bar15m_backfill_exception")]
    Bar15mBackfillException { ts: i64, error: String },
    #[serde(rename = "bar1h_adaptive_switch")]
    Bar1hAdaptiveSwitch { ts: i64, reason: String },
    #[serde(rename = "crash")]
    Crash {
        ts: i64,
        reason: String,
        message: String,
        top_frame: String,
    },
}

/// Owns both JSONL sinks plus the crash rate-limiter. One instance lives on
/// `Context`; all writes are synchronous `fs` calls (small, infrequent,
/// append-only — no need for the async fire-and-forget treatment backfill
/// REST gets).
pub struct MarkerLog {
    markers: JsonlWriter,
    crash: JsonlWriter,
    crash_last_emitted: HashMap<(String, String, String), i64>,
}

impl MarkerLog {
    pub fn new() -> Self {
        Self {
            markers: JsonlWriter::new("logs/markers.jsonl"),
            crash: JsonlWriter::new("logs/crash.log"),
            crash_last_emitted: HashMap::new(),
        }
    }

    pub fn record(&self, event: &MarkerEvent) -> Result<()> {
        self.markers.append(event)
    }

    /// Append a crash record, rate-limited to one per `(reason, message,
    /// top_frame)` triple every `rate_limit_ms`. Returns `false` (no write)
    /// when the same triple fired too recently.
    pub fn record_crash(
        &mut self,
        now_ms: i64,
        reason: &str,
        message: &str,
        top_frame: &str,
        rate_limit_ms: i64,
    ) -> Result<bool> {
        let key = (reason.to_string(), message.to_string(), top_frame.to_string());
        if let Some(last) = self.crash_last_emitted.get(&key) {
            if now_ms - last < rate_limit_ms {
                return Ok(false);
            }
        }
        self.crash_last_emitted.insert(key, now_ms);

        let event = MarkerEvent::Crash {
            ts: now_ms,
            reason: reason.to_string(),
            message: message.to_string(),
            top_frame: top_frame.to_string(),
        };
        self.crash.append(&event)?;
        self.markers.append(&event)?;
        Ok(true)
    }
}

impl Default for MarkerLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Emit the 60s decision-monitor summary as a structured log line (SPEC_FULL
/// §6's `decision_monitor` payload shape) — this is an operator-facing
/// diagnostic, not a persisted artifact, so it goes through `tracing` like
/// every other ambient signal in this codebase rather than its own file.
pub fn log_decision_monitor(ctx: &crate::context::Context, now_ms: i64, route: &str) {
    let snapshot = ctx.decision_snapshot();
    let evaluated = ctx.decision_total();
    let entered = snapshot
        .iter()
        .find(|(reason, _)| *reason == crate::decision::ReasonCode::B2Allowed)
        .map(|(_, count)| *count)
        .unwrap_or(0);
    let entry_rate = if evaluated > 0 { entered as f64 / evaluated as f64 } else { 0.0 };
    let top_raw_reasons: Vec<String> = snapshot.iter().take(5).map(|(r, _)| r.to_string()).collect();

    info!(
        ts = now_ms,
        route = route,
        evaluated,
        entered,
        entry_rate,
        top_raw_reasons = ?top_raw_reasons,
        "decision_monitor"
    );
}
