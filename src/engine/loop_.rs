// =============================================================================
// Engine Loop — applies one tick's decision to position state.
// =============================================================================
//
// Grounded on the teacher's `exit/monitor.rs` (collect-then-mutate, no
// nested locks) and `exit/triple_barrier.rs` (streak-counter exit discipline,
// "only tighten never widen"). Runs entirely synchronously inside the main
// tick's critical section — single-threaded cooperative model, no lock
// needed (see `market/io_aggregator.rs` for the same discipline upstream).

use tracing::info;
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::decision::a::AResult;
use crate::decision::b2::B2Result;
use crate::decision::reason::ReasonCode;
use crate::decision::structure::StructureSnapshot;
use crate::engine::safety::{self, SafetyInputs};
use crate::engine::state::{EngineState, EntryContext, ExitSignals, OpenPosition, TradeRecord};
use crate::market::io_aggregator::IoPacket;
use crate::types::{SafetyStatus, Side};

/// Outcome of one `apply_tick` call, for the caller to decide whether a
/// persistence save or markers-log append is warranted this cycle.
pub struct TickOutcome {
    pub closed_trade: bool,
    pub safety_transitioned: bool,
}

fn opposite(side: Side) -> Side {
    match side {
        Side::Buy => Side::Sell,
        Side::Sell => Side::Buy,
        Side::None => Side::None,
    }
}

fn fee_usd(notional_usd: f64, config: &RuntimeConfig) -> f64 {
    notional_usd.abs() * (config.taker_fee_bps / 10_000.0) * 2.0
}

/// Read this tick's flow-adaptive exit signals for an open position.
/// Open-ended by design — SPEC_FULL left the exact trigger conditions for
/// each named streak unspecified beyond "fires when a streak meets its
/// threshold", so these are deliberately simple, one signal per named path:
///   - `burst`:  a large opposing-volume spike on the shortest window
///   - `drift`:  price drifted adverse past a fraction of the TP distance
///   - `shield`: the defending side's depth S/R has stopped confirming
///   - `wall`:   a secondary opposing level has appeared close to mid
///   - `flow`:   sustained opposing flow pressure on the primary window
///   - `flow_tp`: aligned flow has faded while near the TP target
fn read_exit_signals(pos: &OpenPosition, packet: &IoPacket, mid: f64) -> ExitSignals {
    let aligned_sign = match pos.side {
        Side::Buy => 1.0,
        Side::Sell => -1.0,
        Side::None => 0.0,
    };

    let shortest = packet.trade_flow.windows.first();
    let primary = packet
        .trade_flow
        .windows
        .get(packet.trade_flow.windows.len() / 2)
        .or(shortest);

    let burst = shortest
        .map(|w| w.flow_pressure * aligned_sign <= -0.6 && w.large_trade_count >= 2)
        .unwrap_or(false);

    let flow = primary
        .map(|w| w.flow_pressure * aligned_sign <= -0.4)
        .unwrap_or(false);

    let progress = if pos.tp_distance_usd > 0.0 {
        (mid - pos.entry_px) * aligned_sign / pos.tp_distance_usd
    } else {
        0.0
    };
    let drift = progress <= -0.5;

    let near_tp = progress >= 0.6;
    let flow_tp = near_tp
        && primary
            .map(|w| w.flow_pressure * aligned_sign < 0.1)
            .unwrap_or(false);

    let shield = match pos.side {
        Side::Buy => !packet.depth_sr.ready || packet.depth_sr.support.is_none(),
        Side::Sell => !packet.depth_sr.ready || packet.depth_sr.resistance.is_none(),
        Side::None => false,
    };

    let wall = match pos.side {
        Side::Buy => packet.depth_sr.has_secondary_resistance(),
        Side::Sell => packet.depth_sr.has_secondary_support(),
        Side::None => false,
    };

    ExitSignals {
        flow_tp,
        burst,
        drift,
        shield,
        wall,
        flow,
    }
}

fn close_position(
    state: &mut EngineState,
    pos: OpenPosition,
    exit_px: f64,
    now_ms: i64,
    exit_reason: &str,
    exit_signal: Option<&str>,
    config: &RuntimeConfig,
) -> TradeRecord {
    let signed = match pos.side {
        Side::Buy => 1.0,
        Side::Sell => -1.0,
        Side::None => 0.0,
    };
    let gross_usd = (exit_px - pos.entry_px) * signed * pos.size;
    let notional_usd = pos.entry_px * pos.size;
    let fee = fee_usd(notional_usd, config);
    let net_usd = gross_usd - fee;

    let adverse = (pos.worst_px - pos.entry_px) * signed * pos.size;
    let favorable = gross_usd.max(0.0);

    let trade = TradeRecord {
        trade_id: Uuid::new_v4().to_string(),
        side: pos.side,
        entry_px: pos.entry_px,
        exit_px,
        size: pos.size,
        timestamp_entry: pos.entry_ts,
        timestamp_exit: now_ms,
        realized_pnl_usd: gross_usd,
        realized_pnl_net_usd: net_usd,
        fee_usd: fee,
        exit_reason: exit_reason.to_string(),
        exit_signal: exit_signal.map(|s| s.to_string()),
        hold_ms: now_ms - pos.entry_ts,
        entry_profile_mode: pos.entry_context.entry_quality_reason.to_string(),
        max_adverse_usd: adverse.min(0.0).abs(),
        max_favorable_usd: favorable,
    };

    state.stats.record_trade(&trade, notional_usd.max(1.0));
    state.trades.push(trade.clone());
    info!(
        side = %trade.side,
        net_usd = trade.realized_pnl_net_usd,
        reason = %trade.exit_reason,
        "trade closed"
    );
    trade
}

/// Apply one tick's `(market, decision)` pair to the engine state in place.
/// Idempotent for a repeated `(market, decision)` pair against the same
/// state snapshot: calling this twice with identical inputs and an
/// unchanged `now_ms` on the already-updated state produces no further
/// mutation (no second position open/close, no duplicated trade record).
#[allow(clippy::too_many_arguments)]
pub fn apply_tick(
    state: &mut EngineState,
    mid: f64,
    decision: &B2Result,
    a: &AResult,
    structure_snapshot: Option<&StructureSnapshot>,
    packet: &IoPacket,
    config: &RuntimeConfig,
    now_ms: i64,
    hard_sl_streak: &mut u32,
) -> TickOutcome {
    state.last_market_at_ms = now_ms;
    state.last_tick_ts = now_ms;
    state.last_decision = Some(decision.reason);

    let mut closed_trade = false;
    let mut closed_this_tick_net: Option<f64> = None;

    if let Some(mut pos) = state.open_position.take() {
        if pos.side == decision.side {
            // Same-side: no-op, but keep worst-excursion tracking current.
            let signed = match pos.side {
                Side::Buy => 1.0,
                Side::Sell => -1.0,
                Side::None => 0.0,
            };
            if (mid - pos.entry_px) * signed < (pos.worst_px - pos.entry_px) * signed {
                pos.worst_px = mid;
            }
            state.open_position = Some(pos);
        } else {
            let opposite_side_decision = decision.side != Side::None && decision.side == opposite(pos.side);

            let tp_hit = match pos.side {
                Side::Buy => mid >= pos.tp_px,
                Side::Sell => mid <= pos.tp_px,
                Side::None => false,
            };
            let sl_hit = match pos.side {
                Side::Buy => mid <= pos.sl_px,
                Side::Sell => mid >= pos.sl_px,
                Side::None => false,
            };

            let signals = read_exit_signals(&pos, packet, mid);
            let streak_exit = pos.exit_streaks.observe(&signals, config.exit_streak_required);

            if opposite_side_decision || tp_hit || sl_hit || streak_exit.is_some() {
                let (reason, signal) = if opposite_side_decision {
                    ("opposite_side", None)
                } else if tp_hit {
                    ("tp", None)
                } else if sl_hit {
                    ("sl", None)
                } else {
                    ("flow_adaptive", streak_exit)
                };
                let trade = close_position(state, pos, mid, now_ms, reason, signal, config);
                if sl_hit {
                    *hard_sl_streak += 1;
                } else {
                    *hard_sl_streak = 0;
                }
                closed_this_tick_net = Some(trade.realized_pnl_net_usd);
                closed_trade = true;
                state.open_position = None;
            } else {
                let signed = match pos.side {
                    Side::Buy => 1.0,
                    Side::Sell => -1.0,
                    Side::None => 0.0,
                };
                if (mid - pos.entry_px) * signed < (pos.worst_px - pos.entry_px) * signed {
                    pos.worst_px = mid;
                }
                state.open_position = Some(pos);
            }
        }
    } else if decision.side != Side::None {
        let structural = decision.structural_distance_usd.max(1e-9);
        let sl_px = match decision.side {
            Side::Buy => mid - structural,
            Side::Sell => mid + structural,
            Side::None => mid,
        };
        state.open_position = Some(OpenPosition {
            side: decision.side,
            size: decision.size,
            entry_px: mid,
            entry_ts: now_ms,
            tp_px: decision.tp_px,
            sl_px,
            tp_distance_usd: decision.tp_distance_usd,
            worst_px: mid,
            entry_context: EntryContext {
                regime: format!("{:?}", a.regime),
                zone: format!("{:?}", a.zone),
                trend_strength: format!("{:?}", a.trend_strength),
                entry_quality_reason: decision.reason,
                structure_hash: structure_snapshot.map(|s| s.hash.clone()).unwrap_or_default(),
            },
            exit_streaks: Default::default(),
            depth_exit_state: None,
        });
        info!(side = %decision.side, entry_px = mid, "position opened");
    }

    let warming_up = decision.reason == ReasonCode::WarmupInProgress;
    let data_fresh = packet.market.ts_ms > 0 && (now_ms - packet.market.ts_ms) < config.market_stale_ms;

    let inputs = SafetyInputs {
        data_fresh,
        bar1h_ready: packet.bar1h_ready,
        warming_up,
        hard_sl_streak: *hard_sl_streak,
        last_trade_net_usd: closed_this_tick_net,
    };

    let before = state.safety.status;
    safety::evaluate(&mut state.safety, &inputs, config, now_ms);
    let safety_transitioned = state.safety.status != before;

    state.last_update_ms = now_ms;

    TickOutcome {
        closed_trade,
        safety_transitioned,
    }
}

/// Whether the engine state should be persisted this tick: at most every
/// `engine_state_save_interval_ms`, or immediately on a safety transition.
pub fn should_save(config: &RuntimeConfig, last_saved_ms: i64, now_ms: i64, safety_transitioned: bool) -> bool {
    safety_transitioned || now_ms - last_saved_ms >= config.engine_state_save_interval_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::reason::ReasonCode;
    use crate::market::bar::Bar;
    use crate::market::depth_sr::DepthSrView;
    use crate::market::lrc::LrcState;
    use crate::market::snapshot::MarketSnapshot;
    use crate::market::trade_flow::TradeFlowState;
    use crate::types::{Regime, TrendStrength, Zone};

    fn not_ready_lrc(now_ms: i64) -> LrcState {
        LrcState {
            ready: false,
            channel_top: None,
            channel_mid: None,
            channel_bottom: None,
            slope: None,
            dev: None,
            normalized_slope: None,
            trend_state: crate::types::TrendState::Unknown,
            updated_at_ms: now_ms,
        }
    }

    fn packet_at(now_ms: i64, mid: f64) -> IoPacket {
        let mut market = MarketSnapshot::empty(now_ms);
        market.mid = mid;
        IoPacket {
            now_ms,
            market,
            bar15m_ready: true,
            bar15m_high: mid,
            bar15m_low: mid,
            bar15m_close: mid,
            bar15m_recent: Vec::<Bar>::new(),
            bar1h_ready: true,
            bar1h_high: mid,
            bar1h_low: mid,
            bar1h_close: mid,
            bar1h_confirmed_count: 10,
            bar1h_updated_at_ms: now_ms,
            bar1h_lookback_range_usd: 100.0,
            lrc_b15m: not_ready_lrc(now_ms),
            lrc_a1h: not_ready_lrc(now_ms),
            lrc_daily: not_ready_lrc(now_ms),
            depth_sr: DepthSrView {
                ready: false,
                support: None,
                resistance: None,
                secondary_support: None,
                secondary_resistance: None,
                asymmetry_ratio: None,
                observation_sample_count: 0,
                last_mid_px: mid,
            },
            trade_flow: TradeFlowState {
                windows: Vec::new(),
                oi_delta: 0.0,
                oi_delta_at_ms: now_ms,
            },
            constraints: Vec::new(),
            bar1h_adaptive_switch_reason: None,
        }
    }

    fn allowed_buy(mid: f64) -> B2Result {
        B2Result {
            side: Side::Buy,
            size: 1.0,
            notional_usd: mid,
            firepower: 1.0,
            entry_profile: "normal".into(),
            tp_px: mid + 100.0,
            tp_distance_usd: 100.0,
            structural_distance_usd: 50.0,
            expected_usd: 10.0,
            reason: ReasonCode::B2Allowed,
            phase1_diag: String::new(),
            phase2_diag: String::new(),
            phase4_diag: String::new(),
        }
    }

    fn none_decision() -> B2Result {
        B2Result {
            side: Side::None,
            size: 0.0,
            notional_usd: 0.0,
            firepower: 0.0,
            entry_profile: String::new(),
            tp_px: 0.0,
            tp_distance_usd: 0.0,
            structural_distance_usd: 0.0,
            expected_usd: 0.0,
            reason: ReasonCode::NoSide,
            phase1_diag: String::new(),
            phase2_diag: String::new(),
            phase4_diag: String::new(),
        }
    }

    fn a_result() -> AResult {
        AResult {
            allow: true,
            regime: Regime::Up,
            zone: Zone::Bottom,
            trend_strength: TrendStrength::Normal,
            active_area: None,
            daily_area: None,
            reason: ReasonCode::AAllowed,
            diagnostic: String::new(),
        }
    }

    #[test]
    fn opens_position_on_allowed_buy() {
        let mut state = EngineState::default();
        let config = RuntimeConfig::default();
        let packet = packet_at(1000, 100.0);
        let decision = allowed_buy(100.0);
        let mut streak = 0;
        apply_tick(&mut state, 100.0, &decision, &a_result(), None, &packet, &config, 1000, &mut streak);
        assert!(state.open_position.is_some());
        assert_eq!(state.open_position.as_ref().unwrap().side, Side::Buy);
    }

    #[test]
    fn same_side_decision_is_noop() {
        let mut state = EngineState::default();
        let config = RuntimeConfig::default();
        let mut streak = 0;
        let decision = allowed_buy(100.0);
        apply_tick(
            &mut state,
            100.0,
            &decision,
            &a_result(),
            None,
            &packet_at(1000, 100.0),
            &config,
            1000,
            &mut streak,
        );
        let entry_ts = state.open_position.as_ref().unwrap().entry_ts;
        apply_tick(
            &mut state,
            101.0,
            &decision,
            &a_result(),
            None,
            &packet_at(2000, 101.0),
            &config,
            2000,
            &mut streak,
        );
        assert_eq!(state.open_position.as_ref().unwrap().entry_ts, entry_ts);
        assert_eq!(state.trades.len(), 0);
    }

    #[test]
    fn tp_hit_closes_and_records_trade() {
        let mut state = EngineState::default();
        let config = RuntimeConfig::default();
        let mut streak = 0;
        let decision = allowed_buy(100.0);
        apply_tick(
            &mut state,
            100.0,
            &decision,
            &a_result(),
            None,
            &packet_at(1000, 100.0),
            &config,
            1000,
            &mut streak,
        );
        apply_tick(
            &mut state,
            200.5,
            &none_decision(),
            &a_result(),
            None,
            &packet_at(2000, 200.5),
            &config,
            2000,
            &mut streak,
        );
        assert!(state.open_position.is_none());
        assert_eq!(state.trades.len(), 1);
        assert_eq!(state.trades[0].exit_reason, "tp");
    }

    #[test]
    fn sl_hit_bumps_hard_sl_streak() {
        let mut state = EngineState::default();
        let config = RuntimeConfig::default();
        let mut streak = 0;
        let decision = allowed_buy(100.0);
        apply_tick(
            &mut state,
            100.0,
            &decision,
            &a_result(),
            None,
            &packet_at(1000, 100.0),
            &config,
            1000,
            &mut streak,
        );
        apply_tick(
            &mut state,
            49.0,
            &none_decision(),
            &a_result(),
            None,
            &packet_at(2000, 49.0),
            &config,
            2000,
            &mut streak,
        );
        assert_eq!(state.trades[0].exit_reason, "sl");
        assert_eq!(streak, 1);
    }

    #[test]
    fn opposite_side_decision_flips_position() {
        let mut state = EngineState::default();
        let config = RuntimeConfig::default();
        let mut streak = 0;
        let decision = allowed_buy(100.0);
        apply_tick(
            &mut state,
            100.0,
            &decision,
            &a_result(),
            None,
            &packet_at(1000, 100.0),
            &config,
            1000,
            &mut streak,
        );
        let sell = B2Result {
            side: Side::Sell,
            ..allowed_buy(105.0)
        };
        apply_tick(
            &mut state,
            105.0,
            &sell,
            &a_result(),
            None,
            &packet_at(2000, 105.0),
            &config,
            2000,
            &mut streak,
        );
        assert_eq!(state.trades.len(), 1);
        assert_eq!(state.trades[0].exit_reason, "opposite_side");
    }

    #[test]
    fn repeated_tick_on_settled_state_is_idempotent() {
        let mut state = EngineState::default();
        let config = RuntimeConfig::default();
        let mut streak = 0;
        let decision = none_decision();
        let packet = packet_at(1000, 100.0);
        apply_tick(&mut state, 100.0, &decision, &a_result(), None, &packet, &config, 1000, &mut streak);
        let trades_before = state.trades.len();
        apply_tick(&mut state, 100.0, &decision, &a_result(), None, &packet, &config, 1000, &mut streak);
        assert_eq!(state.trades.len(), trades_before);
        assert!(state.open_position.is_none());
    }

    #[test]
    fn data_stale_halts_even_with_open_position() {
        let mut state = EngineState::default();
        let mut config = RuntimeConfig::default();
        config.market_stale_ms = 1000;
        let mut streak = 0;
        let decision = allowed_buy(100.0);
        apply_tick(
            &mut state,
            100.0,
            &decision,
            &a_result(),
            None,
            &packet_at(1000, 100.0),
            &config,
            1000,
            &mut streak,
        );
        let mut stale_packet = packet_at(1000, 100.0);
        stale_packet.market.ts_ms = 0;
        apply_tick(
            &mut state,
            100.0,
            &none_decision(),
            &a_result(),
            None,
            &stale_packet,
            &config,
            5000,
            &mut streak,
        );
        assert_eq!(state.safety.status, SafetyStatus::Halted);
    }

    #[test]
    fn entry_context_captures_gate_outputs_at_open() {
        let mut state = EngineState::default();
        let config = RuntimeConfig::default();
        let packet = packet_at(1000, 100.0);
        let decision = allowed_buy(100.0);
        let a = AResult {
            regime: Regime::Down,
            zone: Zone::Top,
            trend_strength: TrendStrength::Strong,
            ..a_result()
        };
        let snapshot = StructureSnapshot {
            rails_upper: 200.0,
            rails_lower: 50.0,
            span_usd: 150.0,
            basis: crate::decision::structure::StructureBasis::B1Overlap,
            structure_source: "test".to_string(),
            hash: "deadbeefcafef00d".to_string(),
            version: 1,
            snapshot_seq: 1,
            created_at_ms: 0,
            candidates: vec![],
        };
        let mut streak = 0;
        apply_tick(&mut state, 100.0, &decision, &a, Some(&snapshot), &packet, &config, 1000, &mut streak);
        let entry_context = &state.open_position.as_ref().unwrap().entry_context;
        assert_eq!(entry_context.regime, "Down");
        assert_eq!(entry_context.zone, "Top");
        assert_eq!(entry_context.trend_strength, "Strong");
        assert_eq!(entry_context.structure_hash, "deadbeefcafef00d");
    }
}
