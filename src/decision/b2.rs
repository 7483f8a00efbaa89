// =============================================================================
// Decision B2 — structure-level entry/exit selection with SR clusters.
// =============================================================================
//
// Assumes Decision A allowed and a `StructureSnapshot` exists. Runs four
// phases; phase 4's execution guards are themselves ordered, first-failure-
// wins, same discipline as Decision A.

use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::decision::a::AResult;
use crate::decision::reason::ReasonCode;
use crate::decision::structure::{SrClusterView, StructureSnapshot};
use crate::market::io_aggregator::IoPacket;
use crate::types::{Regime, Side, TrendStrength, Zone};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct B2Result {
    pub side: Side,
    pub size: f64,
    pub notional_usd: f64,
    pub firepower: f64,
    pub entry_profile: String,
    pub tp_px: f64,
    pub tp_distance_usd: f64,
    pub structural_distance_usd: f64,
    pub expected_usd: f64,
    pub reason: ReasonCode,
    /// Phase 1 (SR cluster gate) diagnostic; empty unless phase 1 blocked.
    pub phase1_diag: String,
    /// Phase 2 (containment/position) diagnostic; always carries the
    /// rails-containment ratio, whether or not phase 2 itself blocked.
    pub phase2_diag: String,
    /// Phase 4 (execution guards) diagnostic; empty unless phase 4 blocked.
    pub phase4_diag: String,
}

impl B2Result {
    fn blocked_phase1(code: ReasonCode, diagnostic: impl Into<String>) -> Self {
        Self::blocked(code, diagnostic.into(), String::new(), String::new())
    }

    fn blocked_phase2(code: ReasonCode, diagnostic: impl Into<String>) -> Self {
        Self::blocked(code, String::new(), diagnostic.into(), String::new())
    }

    fn blocked_phase4(code: ReasonCode, diagnostic: impl Into<String>) -> Self {
        Self::blocked(code, String::new(), String::new(), diagnostic.into())
    }

    fn blocked(code: ReasonCode, phase1_diag: String, phase2_diag: String, phase4_diag: String) -> Self {
        Self {
            side: Side::None,
            size: 0.0,
            notional_usd: 0.0,
            firepower: 0.0,
            entry_profile: String::new(),
            tp_px: 0.0,
            tp_distance_usd: 0.0,
            structural_distance_usd: 0.0,
            expected_usd: 0.0,
            reason: code,
            phase1_diag,
            phase2_diag,
            phase4_diag,
        }
    }
}

fn intended_side(regime: Regime, zone: Zone) -> Side {
    match regime {
        Regime::Up => Side::Buy,
        Regime::Down => Side::Sell,
        Regime::Range => match zone {
            Zone::Bottom => Side::Buy,
            Zone::Top => Side::Sell,
            Zone::Middle => Side::None,
        },
        Regime::None => Side::None,
    }
}

fn firepower_for(trend_strength: TrendStrength, config: &RuntimeConfig) -> f64 {
    match trend_strength {
        TrendStrength::Strong => config.firepower_strong,
        TrendStrength::Normal => config.firepower_normal,
        TrendStrength::Weak => config.firepower_weak,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn decide_b2(
    a: &AResult,
    packet: &IoPacket,
    snapshot: Option<&StructureSnapshot>,
    sr_view: &SrClusterView,
    config: &RuntimeConfig,
    now_ms: i64,
    process_start_ms: i64,
) -> B2Result {
    let Some(snapshot) = snapshot else {
        return B2Result::blocked_phase1(ReasonCode::B2NoStructureSnapshot, "B2: no structure snapshot");
    };

    let side = intended_side(a.regime, a.zone);
    if side == Side::None {
        return B2Result::blocked_phase1(ReasonCode::NoSide, "B2: no directional intent for RANGE/middle zone");
    }

    // --- Phase 1: SR cluster gate -----------------------------------------
    if sr_view.cluster_count < config.min_cluster_count {
        return B2Result::blocked_phase1(
            ReasonCode::B2InsufficientClusters,
            format!("B2: cluster_count={} < {}", sr_view.cluster_count, config.min_cluster_count),
        );
    }
    if sr_view.map_strength < config.min_map_strength {
        return B2Result::blocked_phase1(
            ReasonCode::B2WeakMapStrength,
            format!("B2: map_strength={:.2} < {:.2}", sr_view.map_strength, config.min_map_strength),
        );
    }

    // --- Phase 2: containment / position -----------------------------------
    let mid = packet.market.mid;
    let span = snapshot.rails_upper - snapshot.rails_lower;
    let channel_t = if span > 0.0 {
        ((mid - snapshot.rails_lower) / span).clamp(0.0, 1.0)
    } else {
        0.5
    };
    let mut phase2_diag = format!("B2: channel_t={channel_t:.3}");

    let nearest_level = sr_view
        .levels
        .iter()
        .min_by(|x, y| (x.price - mid).abs().partial_cmp(&(y.price - mid).abs()).unwrap());
    let sr_reference_ok = match nearest_level {
        Some(level) => (level.price - mid).abs() <= config.sr_reference_window_usd,
        None => false,
    };
    if !sr_reference_ok {
        phase2_diag.push_str(", no SR reference within guard window");
        return B2Result::blocked_phase2(ReasonCode::B2NoSrReference, phase2_diag);
    }

    // --- Phase 4: execution guards -------------------------------------------
    let elapsed_since_start_ms = now_ms - process_start_ms;
    if elapsed_since_start_ms < config.startup_no_order_ms {
        return B2Result::blocked_phase4(ReasonCode::B2StartupBlocked, "B2: startup no-order window active");
    }
    let startup_restricted = elapsed_since_start_ms < config.startup_window_ms;

    let flow_window = packet
        .trade_flow
        .windows
        .iter()
        .find(|w| w.window_ms == 30_000)
        .or_else(|| packet.trade_flow.windows.first());
    let aligned_flow = match flow_window {
        Some(w) => {
            if side == Side::Buy {
                w.flow_pressure
            } else {
                -w.flow_pressure
            }
        }
        None => 0.0,
    };
    if aligned_flow <= -config.flow_hostile_threshold {
        return B2Result::blocked_phase4(
            ReasonCode::B2FlowHostile,
            format!("B2: aligned flow pressure {aligned_flow:.3} <= -{}", config.flow_hostile_threshold),
        );
    }

    let funding = packet.market.funding;
    let funding_hostile = match side {
        Side::Buy => funding > config.funding_hostile_threshold,
        Side::Sell => funding < -config.funding_hostile_threshold,
        Side::None => false,
    };
    if funding_hostile {
        return B2Result::blocked_phase4(ReasonCode::B2FundingHostile, format!("B2: funding {funding:.5} hostile to {side}"));
    }

    let premium = packet.market.premium;
    let premium_hostile = match side {
        Side::Buy => premium > config.premium_hostile_threshold,
        Side::Sell => premium < -config.premium_hostile_threshold,
        Side::None => false,
    };
    if premium_hostile {
        return B2Result::blocked_phase4(ReasonCode::B2PremiumHostile, format!("B2: premium {premium:.5} hostile to {side}"));
    }

    let impact_spread_bps = packet.market.impact_spread_bps();
    if impact_spread_bps > config.max_impact_spread_bps {
        return B2Result::blocked_phase4(
            ReasonCode::B2ImpactSpreadTooWide,
            format!("B2: impact spread {impact_spread_bps:.2}bps > {}bps", config.max_impact_spread_bps),
        );
    }

    let oi_delta = packet.trade_flow.oi_delta;
    let oi_trap = oi_delta > 0.0
        && match side {
            Side::Buy => aligned_flow < 0.0,
            Side::Sell => aligned_flow < 0.0,
            Side::None => false,
        };
    if oi_trap && packet.trade_flow.oi_delta_at_ms > 0 {
        return B2Result::blocked_phase4(ReasonCode::B2OiPriceTrap, "B2: new positioning against intended side with adverse flow");
    }

    let trend_strength = a.trend_strength;
    let mut firepower = firepower_for(trend_strength, config);
    if startup_restricted {
        firepower *= 0.5;
    }

    let notional_usd = config.base_notional_usd * firepower;
    if !(mid > 0.0) {
        return B2Result::blocked_phase4(ReasonCode::AInvalidC, "B2: invalid mid");
    }
    let size = notional_usd / mid;

    let tp_px = match side {
        Side::Buy => snapshot.rails_upper,
        Side::Sell => snapshot.rails_lower,
        Side::None => mid,
    };
    let tp_distance_usd = (tp_px - mid).abs();
    let structural_distance_usd = tp_distance_usd;

    let gross_usd = tp_distance_usd * size;
    let fee_usd = notional_usd * (config.taker_fee_bps / 10_000.0) * 2.0;
    let estimated_net_usd = gross_usd - fee_usd;
    if estimated_net_usd < config.min_net_usd {
        return B2Result::blocked_phase4(
            ReasonCode::B2FeeEdgeInsufficient,
            format!("B2: net {estimated_net_usd:.2} < min {}", config.min_net_usd),
        );
    }

    let edge_component = (estimated_net_usd / notional_usd.max(1.0)).clamp(0.0, 1.0);
    let spread_component = (1.0 - impact_spread_bps / config.max_impact_spread_bps.max(1e-9)).clamp(0.0, 1.0);
    let velocity_component = flow_window
        .map(|w| (w.trade_rate_per_sec / 5.0).clamp(0.0, 1.0))
        .unwrap_or(0.0);
    let shock_component = flow_window
        .map(|w| (1.0 - w.acceleration.abs()).clamp(0.0, 1.0))
        .unwrap_or(1.0);

    let weights = &config.entry_weights;
    let components = [edge_component, spread_component, velocity_component, shock_component];
    let entry_quality_score: f64 = weights
        .iter()
        .zip(components.iter())
        .map(|(w, c)| w * c)
        .sum::<f64>()
        / weights.iter().sum::<f64>().max(1e-9);

    if entry_quality_score < config.min_entry_quality {
        return B2Result::blocked_phase4(
            ReasonCode::B2EntryQualityTooLow,
            format!("B2: entry quality {entry_quality_score:.2} < {}", config.min_entry_quality),
        );
    }

    B2Result {
        side,
        size,
        notional_usd,
        firepower,
        entry_profile: format!("{trend_strength:?}"),
        tp_px,
        tp_distance_usd,
        structural_distance_usd,
        expected_usd: estimated_net_usd,
        reason: ReasonCode::B2Allowed,
        phase1_diag: String::new(),
        phase2_diag,
        phase4_diag: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::depth_sr::DepthSrView;
    use crate::market::snapshot::MarketSnapshot;
    use crate::market::trade_flow::{TradeFlowState, WindowFlowStats};

    fn snapshot() -> StructureSnapshot {
        StructureSnapshot {
            rails_upper: 50_200.0,
            rails_lower: 49_800.0,
            span_usd: 400.0,
            basis: crate::decision::structure::StructureBasis::B1Overlap,
            structure_source: "b1_overlap_a1h".to_string(),
            hash: "0000000000000000".to_string(),
            version: 1,
            snapshot_seq: 1,
            created_at_ms: 0,
            candidates: vec![],
        }
    }

    fn sr_view(cluster_count: usize, map_strength: f64, levels: Vec<f64>) -> SrClusterView {
        SrClusterView {
            levels: levels
                .into_iter()
                .map(|price| crate::decision::structure::SrClusterLevel { price, strength: 1 })
                .collect(),
            map_strength,
            cluster_count,
        }
    }

    fn a_result(regime: Regime, zone: Zone, trend_strength: TrendStrength) -> AResult {
        AResult {
            allow: true,
            regime,
            zone,
            trend_strength,
            active_area: None,
            daily_area: None,
            reason: ReasonCode::AAllowed,
            diagnostic: String::new(),
        }
    }

    fn base_packet(mid: f64) -> IoPacket {
        let mut market = MarketSnapshot::empty(1_000_000);
        market.mid = mid;
        market.funding = 0.0;
        market.premium = 0.0;
        market.impact_bid = mid - 0.5;
        market.impact_ask = mid + 0.5;
        IoPacket {
            now_ms: 1_000_000,
            market,
            bar15m_ready: true,
            bar15m_high: 50_100.0,
            bar15m_low: 49_900.0,
            bar15m_close: mid,
            bar15m_recent: vec![],
            bar1h_ready: true,
            bar1h_high: 50_200.0,
            bar1h_low: 49_800.0,
            bar1h_confirmed_count: 30,
            bar1h_updated_at_ms: 1_000_000,
            bar1h_lookback_range_usd: 400.0,
            bar1h_close: mid,
            lrc_b15m: crate::market::lrc::compute_lrc_tv(&[mid; 50], 20, 2.0, 14.0, 0.15, 1_000_000),
            lrc_a1h: crate::market::lrc::compute_lrc_tv(&[mid; 50], 20, 2.0, 14.0, 0.15, 1_000_000),
            lrc_daily: crate::market::lrc::compute_lrc_tv(&[mid; 50], 20, 2.0, 14.0, 0.15, 1_000_000),
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
                windows: vec![WindowFlowStats {
                    window_ms: 30_000,
                    trade_count: 20,
                    buy_volume_usd: 1_000.0,
                    sell_volume_usd: 400.0,
                    flow_pressure: 0.4,
                    trade_rate_per_sec: 2.0,
                    vwap: mid,
                    large_trade_count: 0,
                    acceleration: 0.0,
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
    fn no_structure_snapshot_blocks() {
        let config = cfg();
        let packet = base_packet(50_000.0);
        let a = a_result(Regime::Up, Zone::Middle, TrendStrength::Normal);
        let view = sr_view(0, 0.0, vec![]);
        let r = decide_b2(&a, &packet, None, &view, &config, 200_000, 0);
        assert_eq!(r.reason, ReasonCode::B2NoStructureSnapshot);
        assert_eq!(r.side, Side::None);
    }

    #[test]
    fn range_middle_zone_has_no_directional_intent() {
        let config = cfg();
        let packet = base_packet(50_000.0);
        let snap = snapshot();
        let a = a_result(Regime::Range, Zone::Middle, TrendStrength::Normal);
        let view = sr_view(3, 0.8, vec![50_010.0]);
        let r = decide_b2(&a, &packet, Some(&snap), &view, &config, 200_000, 0);
        assert_eq!(r.reason, ReasonCode::NoSide);
    }

    #[test]
    fn insufficient_clusters_blocks() {
        let config = cfg();
        let packet = base_packet(50_000.0);
        let snap = snapshot();
        let a = a_result(Regime::Up, Zone::Bottom, TrendStrength::Normal);
        let view = sr_view(1, 0.8, vec![50_010.0]);
        let r = decide_b2(&a, &packet, Some(&snap), &view, &config, 200_000, 0);
        assert_eq!(r.reason, ReasonCode::B2InsufficientClusters);
    }

    #[test]
    fn startup_guard_blocks_new_orders() {
        let config = cfg();
        let packet = base_packet(50_000.0);
        let snap = snapshot();
        let a = a_result(Regime::Up, Zone::Bottom, TrendStrength::Normal);
        let view = sr_view(3, 0.8, vec![50_010.0]);
        let r = decide_b2(&a, &packet, Some(&snap), &view, &config, 1_000, 0);
        assert_eq!(r.reason, ReasonCode::B2StartupBlocked);
    }

    #[test]
    fn full_pass_returns_allowed_with_populated_fields() {
        let config = cfg();
        let packet = base_packet(50_000.0);
        let snap = snapshot();
        let a = a_result(Regime::Up, Zone::Bottom, TrendStrength::Strong);
        let view = sr_view(3, 0.8, vec![50_010.0, 49_990.0]);
        let r = decide_b2(&a, &packet, Some(&snap), &view, &config, 10_000_000, 0);
        assert_eq!(r.reason, ReasonCode::B2Allowed);
        assert_eq!(r.side, Side::Buy);
        assert!(r.size > 0.0);
        assert!((r.firepower - config.firepower_strong).abs() < 1e-9);
    }

    #[test]
    fn flow_hostile_blocks_aligned_long_against_selling_pressure() {
        let config = cfg();
        let mut packet = base_packet(50_000.0);
        packet.trade_flow.windows[0].flow_pressure = -0.9;
        let snap = snapshot();
        let a = a_result(Regime::Up, Zone::Bottom, TrendStrength::Normal);
        let view = sr_view(3, 0.8, vec![50_010.0]);
        let r = decide_b2(&a, &packet, Some(&snap), &view, &config, 10_000_000, 0);
        assert_eq!(r.reason, ReasonCode::B2FlowHostile);
    }
}
