// =============================================================================
// Decision A — macro gate over the 1h channel.
// =============================================================================
//
// First-failure-wins gate sequence. Every exit path returns a populated
// `AResult` with `allow=false` and a `ReasonCode`; the gate never panics or
// returns `Result::Err` — a failed precondition is data, not an exception.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::decision::reason::{Diagnostic, ReasonCode};
use crate::market::io_aggregator::IoPacket;
use crate::market::lrc::LrcState;
use crate::types::{EngineMode, Regime, TrendStrength, Zone};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AResult {
    pub allow: bool,
    pub regime: Regime,
    pub zone: Zone,
    pub trend_strength: TrendStrength,
    pub active_area: Option<LrcState>,
    pub daily_area: Option<LrcState>,
    pub reason: ReasonCode,
    pub diagnostic: String,
}

impl AResult {
    fn blocked(code: ReasonCode, diagnostic: impl Into<String>) -> Self {
        Self {
            allow: false,
            regime: Regime::None,
            zone: Zone::Middle,
            trend_strength: TrendStrength::Normal,
            active_area: None,
            daily_area: None,
            reason: code,
            diagnostic: diagnostic.into(),
        }
    }
}

/// Rate-limits the operator-facing diagnostic to one emission per reason
/// code per `limit_ms` of wall-clock time; logic itself is never throttled.
#[derive(Debug, Default)]
pub struct DiagnosticRateLimiter {
    last_emitted_ms: HashMap<ReasonCode, i64>,
}

impl DiagnosticRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_emit(&mut self, code: ReasonCode, now_ms: i64, limit_ms: i64) -> bool {
        let emit = match self.last_emitted_ms.get(&code) {
            None => true,
            Some(&last) => now_ms - last >= limit_ms,
        };
        if emit {
            self.last_emitted_ms.insert(code, now_ms);
        }
        emit
    }
}

fn zone_from_ratio(mid: f64, top: f64, bottom: f64) -> Zone {
    let span = top - bottom;
    if !span.is_finite() || span <= 0.0 {
        return Zone::Middle;
    }
    let ratio = (mid - bottom) / span;
    if ratio >= 2.0 / 3.0 {
        Zone::Top
    } else if ratio <= 1.0 / 3.0 {
        Zone::Bottom
    } else {
        Zone::Middle
    }
}

fn trend_strength_from_slope(normalized_slope: f64, strong_min: f64, weak_max: f64) -> TrendStrength {
    if normalized_slope >= strong_min {
        TrendStrength::Strong
    } else if normalized_slope <= weak_max {
        TrendStrength::Weak
    } else {
        TrendStrength::Normal
    }
}

/// Evaluate Decision A against one `IOPacket`. `limiter` is optional; pass
/// `None` to skip diagnostic rate limiting (e.g. in tests).
pub fn decide_a(
    packet: &IoPacket,
    mode: EngineMode,
    config: &RuntimeConfig,
    now_ms: i64,
    limiter: Option<&mut DiagnosticRateLimiter>,
) -> AResult {
    let result = decide_a_inner(packet, mode, config, now_ms);
    if let Some(limiter) = limiter {
        let _ = limiter.should_emit(result.reason, now_ms, config.a_diagnostic_rate_limit_ms);
    }
    result
}

fn decide_a_inner(packet: &IoPacket, mode: EngineMode, config: &RuntimeConfig, now_ms: i64) -> AResult {
    if packet.has_constraint("warmup") {
        return AResult::blocked(ReasonCode::WarmupInProgress, "A: warmup in progress");
    }

    let market_age_ms = now_ms - packet.market.ts_ms;
    if market_age_ms > config.market_stale_ms {
        return AResult::blocked(
            ReasonCode::AStaleMarket,
            format!("A: data not ready (market age {market_age_ms}ms)"),
        );
    }

    let bar1h_ready = packet.bar1h_ready || (mode.is_test() && packet.bar1h_confirmed_count >= 1);
    if !bar1h_ready {
        return AResult::blocked(ReasonCode::ANotReadyBar1h, "A: bar1h not ready");
    }

    let bar1h_age_ms = now_ms - packet.bar1h_updated_at_ms;
    if bar1h_age_ms > config.bar1h_stale_ms {
        return AResult::blocked(
            ReasonCode::AStaleBar1h,
            format!("A: bar1h stale age={bar1h_age_ms}ms"),
        );
    }

    if !packet.lrc_a1h.ready {
        return AResult::blocked(ReasonCode::ANotReadyLrcA, "A: lrc_a not ready");
    }
    let lrc_a_age_ms = now_ms - packet.lrc_a1h.updated_at_ms;
    if lrc_a_age_ms > config.lrc_a_stale_ms {
        return AResult::blocked(
            ReasonCode::AStaleLrcA,
            format!("A: lrc_a stale age={lrc_a_age_ms}ms"),
        );
    }

    let c = packet.market.mid;
    if !c.is_finite() {
        return AResult::blocked(ReasonCode::AInvalidC, "A: invalid c (non-finite mid)");
    }

    let active_range = packet.bar1h_high - packet.bar1h_low;
    if !(active_range > 0.0) {
        return AResult::blocked(ReasonCode::AInvalidRange, "A: invalid range (high<=low)");
    }

    let effective_range = active_range.max(packet.bar1h_lookback_range_usd);
    if effective_range < config.min_range_usd {
        return AResult::blocked(
            ReasonCode::ARangeTooNarrow,
            format!(
                "A: range too narrow usd={:.2} < {}",
                effective_range, config.min_range_usd
            ),
        );
    }

    let active_area = packet.lrc_a1h.clone();
    let daily_area = if packet.lrc_daily.ready {
        Some(packet.lrc_daily.clone())
    } else {
        None
    };

    let area_mid = active_area.channel_mid.unwrap_or(c);
    let area_top = active_area.channel_top.unwrap_or(c);
    let area_bottom = active_area.channel_bottom.unwrap_or(c);

    let regime = match active_area.trend_state {
        crate::types::TrendState::Up if c >= area_mid => Regime::Up,
        crate::types::TrendState::Down if c <= area_mid => Regime::Down,
        _ => Regime::Range,
    };

    let zone = zone_from_ratio(c, area_top, area_bottom);
    let trend_strength = trend_strength_from_slope(
        active_area.normalized_slope.unwrap_or(0.0),
        config.a_trend_strong_min,
        config.a_trend_weak_max,
    );

    AResult {
        allow: true,
        regime,
        zone,
        trend_strength,
        active_area: Some(active_area),
        daily_area,
        reason: ReasonCode::AAllowed,
        diagnostic: String::new(),
    }
}
