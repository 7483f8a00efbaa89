// =============================================================================
// Depth SR Analyzer — ring of book snapshots, periodic histogram rebuild.
// =============================================================================
//
// Maintains a 1-hour ring of top-20-level book snapshots. Every
// `frequency_analysis_interval_s` of wall-clock time since the last
// analysis, rebuilds a frequency histogram of "thick" price bins on each
// side and extracts support/resistance clusters. `ready` is sticky:
// once both a primary support and a primary resistance have been
// identified, it never reverts to false, and a side that drops out of a
// later analysis keeps its last known primary.
//
// `last_mid_px` updates on every snapshot push, independent of whether
// that push also triggers (or succeeds at) a re-analysis — see
// DESIGN.md Open Question (a).

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::market::snapshot::Level;

const EPS_USD: f64 = 1e-9;

#[derive(Debug, Clone)]
struct BookSnapshot {
    ts_s: i64,
    mid: f64,
    bids: Vec<Level>,
    asks: Vec<Level>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrSide {
    pub center: f64,
    pub width: f64,
    pub lower: f64,
    pub upper: f64,
}

/// The externally consumed view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthSrView {
    pub ready: bool,
    pub support: Option<SrSide>,
    pub resistance: Option<SrSide>,
    pub secondary_support: Option<SrSide>,
    pub secondary_resistance: Option<SrSide>,
    pub asymmetry_ratio: Option<f64>,
    pub observation_sample_count: usize,
    pub last_mid_px: f64,
}

impl DepthSrView {
    pub fn has_secondary_support(&self) -> bool {
        self.secondary_support.is_some()
    }
    pub fn has_secondary_resistance(&self) -> bool {
        self.secondary_resistance.is_some()
    }
}

pub struct DepthSrAnalyzer {
    observation_window_s: i64,
    frequency_analysis_interval_s: i64,
    bin_size_usd: f64,
    threshold_multiplier: f64,
    merge_distance_usd: f64,
    min_sample_count: usize,

    ring: VecDeque<BookSnapshot>,
    last_mid_px: f64,
    last_analysis_at_s: Option<i64>,
    last_push_s: Option<i64>,

    ready_ever: bool,
    support: Option<SrSide>,
    resistance: Option<SrSide>,
    secondary_support: Option<SrSide>,
    secondary_resistance: Option<SrSide>,
}

struct Cluster {
    total_freq: f64,
    weighted_price_sum: f64,
    weighted_sq_sum: f64,
}

impl Cluster {
    fn center(&self) -> f64 {
        if self.total_freq <= 0.0 {
            0.0
        } else {
            self.weighted_price_sum / self.total_freq
        }
    }

    fn stddev(&self) -> f64 {
        if self.total_freq <= 0.0 {
            return 0.0;
        }
        let mean = self.center();
        let variance = (self.weighted_sq_sum / self.total_freq) - mean * mean;
        variance.max(0.0).sqrt()
    }

    fn width(&self) -> f64 {
        (2.0 * self.stddev()).clamp(2.0, 15.0)
    }
}

impl DepthSrAnalyzer {
    pub fn new(
        observation_window_s: i64,
        frequency_analysis_interval_s: i64,
        bin_size_usd: f64,
        threshold_multiplier: f64,
        merge_distance_usd: f64,
        min_sample_count: usize,
    ) -> Self {
        Self {
            observation_window_s,
            frequency_analysis_interval_s,
            bin_size_usd,
            threshold_multiplier,
            merge_distance_usd,
            min_sample_count,
            ring: VecDeque::new(),
            last_mid_px: 0.0,
            last_analysis_at_s: None,
            last_push_s: None,
            ready_ever: false,
            support: None,
            resistance: None,
            secondary_support: None,
            secondary_resistance: None,
        }
    }

    /// Push one book snapshot (top-N levels per side). Updates
    /// `last_mid_px` unconditionally before any analysis-gating logic runs,
    /// but only admits one snapshot per wall-clock second into the ring —
    /// the venue can deliver several book deltas within the same second and
    /// the histogram rebuild assumes one sample per elapsed second.
    pub fn push_snapshot(&mut self, ts_s: i64, mid: f64, bids: Vec<Level>, asks: Vec<Level>) {
        if mid.is_finite() && mid > 0.0 {
            self.last_mid_px = mid;
        }
        if let Some(last) = self.last_push_s {
            if ts_s <= last {
                return;
            }
        }
        self.last_push_s = Some(ts_s);
        self.ring.push_back(BookSnapshot { ts_s, mid, bids, asks });
        let cutoff = ts_s - self.observation_window_s;
        while let Some(front) = self.ring.front() {
            if front.ts_s < cutoff {
                self.ring.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn sample_count(&self) -> usize {
        self.ring.len()
    }

    /// Runs the 60s histogram rebuild if enough wall-clock time has
    /// elapsed since the last analysis. Returns `true` if it ran.
    pub fn maybe_analyze(&mut self, now_s: i64) -> bool {
        let due = match self.last_analysis_at_s {
            None => true,
            Some(last) => now_s - last >= self.frequency_analysis_interval_s,
        };
        if !due {
            return false;
        }
        self.last_analysis_at_s = Some(now_s);
        self.analyze();
        true
    }

    fn analyze(&mut self) {
        if self.ring.is_empty() {
            return;
        }

        let mut total_size = 0.0;
        let mut total_count = 0usize;
        for snap in &self.ring {
            for (_, size) in snap.bids.iter().chain(snap.asks.iter()) {
                total_size += size;
                total_count += 1;
            }
        }
        if total_count == 0 {
            return;
        }
        let mean_depth = total_size / total_count as f64;
        let threshold = mean_depth * self.threshold_multiplier;

        let mut bid_hist: HashMap<i64, f64> = HashMap::new();
        let mut ask_hist: HashMap<i64, f64> = HashMap::new();

        for snap in &self.ring {
            for (price, size) in &snap.bids {
                if *size >= threshold && *price <= snap.mid {
                    let bin = (*price / self.bin_size_usd).floor() as i64;
                    *bid_hist.entry(bin).or_insert(0.0) += 1.0;
                }
            }
            for (price, size) in &snap.asks {
                if *size >= threshold && *price > snap.mid {
                    let bin = (*price / self.bin_size_usd).floor() as i64;
                    *ask_hist.entry(bin).or_insert(0.0) += 1.0;
                }
            }
        }

        let (support, secondary_support) = self.rank_clusters(&bid_hist);
        let (resistance, secondary_resistance) = self.rank_clusters(&ask_hist);

        // Sticky: only overwrite when this analysis actually found a side.
        if support.is_some() {
            self.support = support;
            self.secondary_support = secondary_support;
        }
        if resistance.is_some() {
            self.resistance = resistance;
            self.secondary_resistance = secondary_resistance;
        }

        if !self.ready_ever
            && self.ring.len() >= self.min_sample_count
            && self.support.is_some()
            && self.resistance.is_some()
        {
            self.ready_ever = true;
        }
    }

    /// Build bins into clusters (merging neighbors within
    /// `merge_distance_usd`), rank by total frequency, return (primary,
    /// secondary) as `SrSide`s.
    fn rank_clusters(&self, hist: &HashMap<i64, f64>) -> (Option<SrSide>, Option<SrSide>) {
        if hist.is_empty() {
            return (None, None);
        }
        let mut bins: Vec<(f64, f64)> = hist
            .iter()
            .map(|(&bin, &freq)| (bin as f64 * self.bin_size_usd, freq))
            .collect();
        bins.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

        let mut clusters: Vec<Cluster> = Vec::new();
        let mut last_price: Option<f64> = None;
        for (price, freq) in bins {
            let start_new = match last_price {
                None => true,
                Some(lp) => (price - lp).abs() > self.merge_distance_usd,
            };
            if start_new || clusters.is_empty() {
                clusters.push(Cluster {
                    total_freq: 0.0,
                    weighted_price_sum: 0.0,
                    weighted_sq_sum: 0.0,
                });
            }
            let c = clusters.last_mut().unwrap();
            c.total_freq += freq;
            c.weighted_price_sum += price * freq;
            c.weighted_sq_sum += freq * price * price;
            last_price = Some(price);
        }

        clusters.sort_by(|a, b| b.total_freq.partial_cmp(&a.total_freq).unwrap());
        let primary = clusters.first().map(|c| SrSide {
            center: c.center(),
            width: c.width(),
            lower: c.center() - c.width(),
            upper: c.center() + c.width(),
        });
        let secondary = clusters.get(1).map(|c| SrSide {
            center: c.center(),
            width: c.width(),
            lower: c.center() - c.width(),
            upper: c.center() + c.width(),
        });
        (primary, secondary)
    }

    pub fn view(&self) -> DepthSrView {
        let asymmetry_ratio = match (&self.support, &self.resistance) {
            (Some(s), Some(r)) if (r.center - s.center) >= 1.0 => {
                Some((self.last_mid_px - s.center) / (r.center - s.center))
            }
            _ => None,
        };

        DepthSrView {
            ready: self.ready_ever,
            support: self.support.clone(),
            resistance: self.resistance.clone(),
            secondary_support: self.secondary_support.clone(),
            secondary_resistance: self.secondary_resistance.clone(),
            asymmetry_ratio,
            observation_sample_count: self.ring.len(),
            last_mid_px: self.last_mid_px,
        }
    }
}
