// =============================================================================
// Structure Snapshot Builder (B0/B1) + SR-cluster view
// =============================================================================
//
// B0 resolves the daily arena into a small set of higher-timeframe
// candidate levels; B1 takes the 15m LRC channel and keeps it only where it
// overlaps the 1h (A) arena by at least `min_overlap_ratio`. The overlap
// region becomes the `rails` carried by every downstream Decision B2 call
// until one of the three rebuild triggers in SPEC_FULL fires.
//
// The SR-cluster view is a separate, on-demand artifact built from 15m
// pivots inside the current rails; it is cached against
// `(snapshot_hash, base_mid, created_at)` and only rebuilt when that triple
// goes stale.

use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::market::bar::Bar;
use crate::market::io_aggregator::IoPacket;
use crate::market::lrc::LrcState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureBasis {
    B1Overlap,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureSnapshot {
    pub rails_upper: f64,
    pub rails_lower: f64,
    pub span_usd: f64,
    pub basis: StructureBasis,
    pub structure_source: String,
    pub hash: String,
    pub version: u32,
    pub snapshot_seq: u64,
    pub created_at_ms: i64,
    /// B0 higher-timeframe candidate levels folded into the hash.
    pub candidates: Vec<f64>,
}

impl StructureSnapshot {
    pub fn channel_mid(&self) -> f64 {
        (self.rails_upper + self.rails_lower) / 2.0
    }
}

/// FNV-1a over rails + candidates, rendered as 16 hex chars. Stable under
/// unordered rebuilds that produce an identical `{rails, candidates}` set
/// because candidates are sorted before hashing.
fn hash_structure(rails_upper: f64, rails_lower: f64, candidates: &[f64]) -> String {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut sorted_candidates = candidates.to_vec();
    sorted_candidates.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut hash = OFFSET;
    let mut feed = |v: f64| {
        // round to the cent to make the hash robust to float noise from
        // rebuild-order differences that should be considered identical.
        let rounded = (v * 100.0).round() as i64;
        for byte in rounded.to_be_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(PRIME);
        }
    };
    feed(rails_upper);
    feed(rails_lower);
    for c in &sorted_candidates {
        feed(*c);
    }

    hex::encode(hash.to_be_bytes())
}

/// Collapse daily-arena candidate levels within `merge_distance` of each
/// other into a single level (the mean of the merged group). Levels are
/// sorted first so merging only ever compares neighbors.
fn merge_daily_candidates(mut levels: Vec<f64>, merge_distance: f64) -> Vec<f64> {
    levels.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut merged: Vec<f64> = Vec::new();
    let mut group_sum = 0.0;
    let mut group_count = 0usize;

    for level in levels {
        if group_count > 0 && (level - group_sum / group_count as f64).abs() > merge_distance {
            merged.push(group_sum / group_count as f64);
            group_sum = 0.0;
            group_count = 0;
        }
        group_sum += level;
        group_count += 1;
    }
    if group_count > 0 {
        merged.push(group_sum / group_count as f64);
    }

    merged
}

fn overlap_region(b15m: &LrcState, a1h: &LrcState) -> Option<(f64, f64)> {
    let b_top = b15m.channel_top?;
    let b_bottom = b15m.channel_bottom?;
    let a_top = a1h.channel_top?;
    let a_bottom = a1h.channel_bottom?;
    Some((b_top.min(a_top), b_bottom.max(a_bottom)))
}

/// Builds and caches `StructureSnapshot`s, assigning monotonically
/// increasing `snapshot_seq` values for the lifetime of the process.
pub struct StructureBuilder {
    seq: u64,
}

impl StructureBuilder {
    pub fn new() -> Self {
        Self { seq: 0 }
    }

    /// Evaluate the three rebuild triggers against `existing` and either
    /// return it unchanged or build a fresh snapshot. Returns `None` only
    /// when no snapshot exists yet and B1 cannot be constructed this tick.
    pub fn maybe_rebuild(
        &mut self,
        existing: Option<StructureSnapshot>,
        packet: &IoPacket,
        active_area: &LrcState,
        daily_area: Option<&LrcState>,
        config: &RuntimeConfig,
        now_ms: i64,
    ) -> Option<StructureSnapshot> {
        let needs_rebuild = match &existing {
            None => true,
            Some(snap) => {
                let age_ms = now_ms - snap.created_at_ms;
                let time_trigger = age_ms >= config.structure_refresh_ms;

                let mid = packet.market.mid;
                let buffer = config.structure_rails_break_buffer_usd;
                let rails_break = mid > snap.rails_upper + buffer || mid < snap.rails_lower - buffer;

                let span_drift = match overlap_region(&packet.lrc_b15m, active_area) {
                    Some((upper, lower)) if snap.span_usd > 0.0 => {
                        let observed_span = (upper - lower).max(0.0);
                        ((observed_span - snap.span_usd).abs() / snap.span_usd)
                            >= config.structure_span_change_ratio_threshold
                    }
                    _ => false,
                };

                time_trigger || rails_break || span_drift
            }
        };

        if !needs_rebuild {
            return existing;
        }

        self.build(packet, active_area, daily_area, config, now_ms).or(existing)
    }

    fn build(
        &mut self,
        packet: &IoPacket,
        active_area: &LrcState,
        daily_area: Option<&LrcState>,
        config: &RuntimeConfig,
        now_ms: i64,
    ) -> Option<StructureSnapshot> {
        let (overlap_upper, overlap_lower) = overlap_region(&packet.lrc_b15m, active_area)?;
        let b_top = packet.lrc_b15m.channel_top?;
        let b_bottom = packet.lrc_b15m.channel_bottom?;
        let b_width = b_top - b_bottom;
        if !(b_width > 0.0) {
            return None;
        }

        let overlap_width = (overlap_upper - overlap_lower).max(0.0);
        let inclusion_ratio = overlap_width / b_width;
        if inclusion_ratio < config.min_overlap_ratio {
            return None;
        }
        if !(overlap_upper > overlap_lower) {
            return None;
        }

        // B0: higher-timeframe candidates from the daily arena, collapsed by
        // merge distance so nearly-coincident top/mid/bottom levels don't
        // produce redundant candidates.
        let candidates: Vec<f64> = match daily_area {
            Some(d) if d.ready => {
                let raw: Vec<f64> = [d.channel_top, d.channel_mid, d.channel_bottom].into_iter().flatten().collect();
                merge_daily_candidates(raw, config.daily_merge_distance_usd)
            }
            _ => Vec::new(),
        };

        let span_usd = overlap_upper - overlap_lower;
        let hash = hash_structure(overlap_upper, overlap_lower, &candidates);

        self.seq += 1;
        Some(StructureSnapshot {
            rails_upper: overlap_upper,
            rails_lower: overlap_lower,
            span_usd,
            basis: StructureBasis::B1Overlap,
            structure_source: "b1_overlap_a1h".to_string(),
            hash,
            version: 1,
            snapshot_seq: self.seq,
            created_at_ms: now_ms,
            candidates,
        })
    }
}

impl Default for StructureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SR-cluster view
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrClusterLevel {
    pub price: f64,
    /// Count of raw pivots merged into this level.
    pub strength: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrClusterView {
    pub levels: Vec<SrClusterLevel>,
    pub map_strength: f64,
    pub cluster_count: usize,
}

impl SrClusterView {
    fn empty() -> Self {
        Self {
            levels: Vec::new(),
            map_strength: 0.0,
            cluster_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Pivot {
    price: f64,
}

/// Trailing-only pivot detection (no look-ahead, suitable for a live
/// stream): bar `i` is a pivot high/low if its high/low dominates the
/// preceding `left_bars` confirmed bars.
fn detect_pivots(bars: &[Bar], left_bars: usize) -> Vec<Pivot> {
    let mut pivots = Vec::new();
    if bars.len() <= left_bars {
        return pivots;
    }
    for i in left_bars..bars.len() {
        let window = &bars[i - left_bars..i];
        let bar = &bars[i];
        if window.iter().all(|w| bar.high >= w.high) {
            pivots.push(Pivot { price: bar.high });
        }
        if window.iter().all(|w| bar.low <= w.low) {
            pivots.push(Pivot { price: bar.low });
        }
    }
    pivots
}

fn build_sr_cluster_view(snapshot: &StructureSnapshot, packet: &IoPacket, config: &RuntimeConfig) -> SrClusterView {
    let raw_pivots = detect_pivots(&packet.bar15m_recent, config.sr_pivot_left_bars);
    let total_raw = raw_pivots.len();

    let mut inside: Vec<f64> = raw_pivots
        .into_iter()
        .map(|p| p.price)
        .filter(|&p| p >= snapshot.rails_lower && p <= snapshot.rails_upper)
        .collect();
    inside.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let merge_distance = config.sr_near_ratio * snapshot.span_usd.max(0.0);
    let center = snapshot.channel_mid();

    let mut merged: Vec<SrClusterLevel> = Vec::new();
    for price in inside {
        match merged.last_mut() {
            Some(last) if (price - last.price).abs() <= merge_distance => {
                // Prefer the outer line: keep whichever candidate is
                // farther from the channel center, accumulate strength.
                if (price - center).abs() > (last.price - center).abs() {
                    last.price = price;
                }
                last.strength += 1;
            }
            _ => merged.push(SrClusterLevel { price, strength: 1 }),
        }
    }

    merged.sort_by(|a, b| {
        (a.price - center)
            .abs()
            .partial_cmp(&(b.price - center).abs())
            .unwrap()
    });
    merged.truncate(config.sr_max_levels);

    let coverage = (merged.len() as f64 / config.sr_max_levels.max(1) as f64).min(1.0);
    let path_depth = (total_raw as f64 / config.sr_pivot_lookback_bars.max(1) as f64).min(1.0);
    let map_strength = ((coverage + path_depth) / 2.0).clamp(0.0, 1.0);

    SrClusterView {
        cluster_count: merged.len(),
        levels: merged,
        map_strength,
    }
}

/// Caches the SR-cluster view against `(snapshot_hash, base_mid, created_at)`
/// per SPEC_FULL §9 — replacing ad-hoc "mid drift <= N and ttl <= M" checks
/// scattered across call sites with one explicit `valid_for` predicate.
pub struct SrClusterCache {
    cached: Option<(String, f64, i64, SrClusterView)>,
}

impl SrClusterCache {
    pub fn new() -> Self {
        Self { cached: None }
    }

    fn valid_for(&self, snapshot_hash: &str, mid: f64, now_ms: i64, config: &RuntimeConfig) -> bool {
        match &self.cached {
            None => false,
            Some((hash, base_mid, created_at, _)) => {
                hash == snapshot_hash
                    && (mid - base_mid).abs() <= config.sr_invalidate_mid_drift_usd
                    && (now_ms - created_at) <= config.sr_cache_ttl_ms
            }
        }
    }

    pub fn get_or_build(&mut self, snapshot: &StructureSnapshot, packet: &IoPacket, config: &RuntimeConfig, now_ms: i64) -> SrClusterView {
        let mid = packet.market.mid;
        if self.valid_for(&snapshot.hash, mid, now_ms, config) {
            return self.cached.as_ref().unwrap().3.clone();
        }
        let view = build_sr_cluster_view(snapshot, packet, config);
        self.cached = Some((snapshot.hash.clone(), mid, now_ms, view.clone()));
        view
    }
}

impl Default for SrClusterCache {
    fn default() -> Self {
        Self::new()
    }
}

pub fn empty_view() -> SrClusterView {
    SrClusterView::empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::depth_sr::DepthSrView;
    use crate::market::snapshot::MarketSnapshot;
    use crate::market::trade_flow::TradeFlowState;

    fn lrc(top: f64, bottom: f64) -> LrcState {
        LrcState {
            ready: true,
            channel_top: Some(top),
            channel_mid: Some((top + bottom) / 2.0),
            channel_bottom: Some(bottom),
            slope: Some(0.0),
            dev: Some(1.0),
            normalized_slope: Some(0.0),
            trend_state: crate::types::TrendState::Flat,
            updated_at_ms: 0,
        }
    }

    fn base_packet(now_ms: i64, b15m: LrcState, a1h: LrcState) -> IoPacket {
        let mut market = MarketSnapshot::empty(now_ms);
        market.mid = 50_000.0;
        IoPacket {
            now_ms,
            market,
            bar15m_ready: true,
            bar15m_high: 50_100.0,
            bar15m_low: 49_900.0,
            bar15m_close: 50_000.0,
            bar15m_recent: vec![],
            bar1h_ready: true,
            bar1h_high: 50_200.0,
            bar1h_low: 49_800.0,
            bar1h_confirmed_count: 30,
            bar1h_updated_at_ms: now_ms,
            bar1h_lookback_range_usd: 400.0,
            bar1h_close: 50_000.0,
            lrc_b15m: b15m,
            lrc_a1h: a1h,
            lrc_daily: lrc(50_300.0, 49_700.0),
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
                windows: vec![],
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
    fn builds_snapshot_when_overlap_meets_ratio() {
        let config = cfg();
        let b15m = lrc(50_050.0, 49_950.0);
        let a1h = lrc(50_200.0, 49_800.0);
        let packet = base_packet(1_000, b15m, a1h.clone());
        let mut builder = StructureBuilder::new();
        let snap = builder.maybe_rebuild(None, &packet, &a1h, None, &config, 1_000);
        let snap = snap.expect("overlap should be fully inside a1h => ratio 1.0");
        assert!(snap.rails_upper > snap.rails_lower);
        assert_eq!(snap.snapshot_seq, 1);
        assert_eq!(snap.span_usd, snap.rails_upper - snap.rails_lower);
    }

    #[test]
    fn rejects_when_overlap_ratio_too_low() {
        let mut config = cfg();
        config.min_overlap_ratio = 0.99;
        let b15m = lrc(50_100.0, 49_900.0); // width 200
        let a1h = lrc(49_950.0, 49_850.0); // only slightly overlapping
        let packet = base_packet(1_000, b15m, a1h.clone());
        let mut builder = StructureBuilder::new();
        let snap = builder.maybe_rebuild(None, &packet, &a1h, None, &config, 1_000);
        assert!(snap.is_none());
    }

    #[test]
    fn merge_daily_candidates_collapses_nearby_levels() {
        let merged = merge_daily_candidates(vec![50_100.0, 50_102.0, 49_900.0], 5.0);
        assert_eq!(merged.len(), 2);
        assert!((merged[0] - 49_900.0).abs() < 1e-9);
        assert!((merged[1] - 50_101.0).abs() < 1e-9);
    }

    #[test]
    fn merge_daily_candidates_keeps_distant_levels_separate() {
        let merged = merge_daily_candidates(vec![50_100.0, 49_900.0, 49_700.0], 5.0);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn build_merges_daily_candidates_within_config_distance() {
        let mut config = cfg();
        config.daily_merge_distance_usd = 50.0;
        let b15m = lrc(50_050.0, 49_950.0);
        let a1h = lrc(50_200.0, 49_800.0);
        let packet = base_packet(1_000, b15m, a1h.clone());
        // top/mid/bottom collapse to one candidate when all within 50 usd of
        // each other (50_300/50_000/49_700 spans 600, so keep spread thin).
        let daily = lrc(50_010.0, 49_990.0);
        let mut builder = StructureBuilder::new();
        let snap = builder
            .maybe_rebuild(None, &packet, &a1h, Some(&daily), &config, 1_000)
            .expect("overlap should build");
        assert_eq!(snap.candidates.len(), 1);
    }

    #[test]
    fn hash_stable_under_candidate_reordering() {
        let h1 = hash_structure(100.0, 90.0, &[1.0, 2.0, 3.0]);
        let h2 = hash_structure(100.0, 90.0, &[3.0, 1.0, 2.0]);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
    }

    #[test]
    fn no_rebuild_within_refresh_window_without_triggers() {
        let mut config = cfg();
        config.structure_refresh_ms = 60_000;
        config.structure_rails_break_buffer_usd = 1000.0;
        config.structure_span_change_ratio_threshold = 1.0;
        let b15m = lrc(50_050.0, 49_950.0);
        let a1h = lrc(50_200.0, 49_800.0);
        let packet = base_packet(1_000, b15m, a1h.clone());
        let mut builder = StructureBuilder::new();
        let first = builder.maybe_rebuild(None, &packet, &a1h, None, &config, 1_000).unwrap();
        let seq_after_first = first.snapshot_seq;

        let second = builder
            .maybe_rebuild(Some(first), &packet, &a1h, None, &config, 2_000)
            .unwrap();
        assert_eq!(second.snapshot_seq, seq_after_first, "no rebuild trigger fired, seq must not advance");
    }

    #[test]
    fn pivot_detection_finds_local_extremes() {
        fn bar(ts: i64, h: f64, l: f64) -> Bar {
            Bar {
                ts_start: ts,
                open: (h + l) / 2.0,
                high: h,
                low: l,
                close: (h + l) / 2.0,
                close_history: vec![],
                source: crate::market::bar::BarSource::Tick,
            }
        }
        let bars = vec![
            bar(0, 100.0, 95.0),
            bar(1, 101.0, 96.0),
            bar(2, 110.0, 97.0), // pivot high
            bar(3, 102.0, 90.0), // pivot low
            bar(4, 103.0, 98.0),
        ];
        let pivots = detect_pivots(&bars, 2);
        assert!(pivots.iter().any(|p| (p.price - 110.0).abs() < 1e-9));
    }
}
