// =============================================================================
// Runtime Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Every tunable parameter the tick pipeline reads lives here so the engine
// can be reconfigured without a restart. All fields carry
// `#[serde(default = "...")]` so adding a new field never breaks loading an
// older config file. Persistence uses an atomic tmp + rename pattern to
// prevent corruption on crash.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::EngineMode;

fn default_symbol() -> String {
    "BTC".to_string()
}

fn default_bar15m_interval_ms() -> i64 {
    15 * 60 * 1000
}

fn default_bar1h_interval_ms() -> i64 {
    60 * 60 * 1000
}

fn default_lookback_bars_1h() -> usize {
    24
}

fn default_lrc_len_b15m() -> usize {
    40
}

fn default_lrc_len_a1h() -> usize {
    40
}

fn default_lrc_len_daily() -> usize {
    20
}

fn default_dev_len() -> f64 {
    2.0
}

fn default_flat_thresh() -> f64 {
    0.15
}

fn default_k_norm() -> f64 {
    14.0
}

fn default_adaptive_min_final_span() -> f64 {
    60.0
}

fn default_adaptive_high_span() -> f64 {
    260.0
}

fn default_adaptive_expand_step() -> usize {
    6
}

fn default_adaptive_start_lookback() -> usize {
    24
}

fn default_adaptive_expanded_lookback() -> usize {
    60
}

fn default_adaptive_switch_cooldown_ms() -> i64 {
    15 * 60 * 1000
}

fn default_adaptive_weak_order_ms_after_switch() -> i64 {
    5 * 60 * 1000
}

fn default_depth_observation_window_s() -> i64 {
    3600
}

fn default_depth_frequency_analysis_interval_s() -> i64 {
    60
}

fn default_depth_bin_size_usd() -> f64 {
    1.0
}

fn default_depth_threshold_multiplier() -> f64 {
    1.2
}

fn default_depth_merge_distance_usd() -> f64 {
    5.0
}

fn default_depth_min_sample_count() -> usize {
    300
}

fn default_trade_flow_windows_ms() -> Vec<i64> {
    vec![5_000, 30_000, 60_000]
}

fn default_large_trade_factor() -> f64 {
    5.0
}

fn default_trade_flow_cleanup_interval_ms() -> i64 {
    1_000
}

fn default_trade_flow_max_buffer_size() -> usize {
    20_000
}

fn default_structure_refresh_ms() -> i64 {
    0
}

fn default_structure_rails_break_buffer_usd() -> f64 {
    1.0
}

fn default_structure_span_change_ratio_threshold() -> f64 {
    0.25
}

fn default_daily_merge_distance_usd() -> f64 {
    5.0
}

fn default_min_overlap_ratio() -> f64 {
    0.7
}

fn default_sr_near_ratio() -> f64 {
    0.1
}

fn default_sr_max_levels() -> usize {
    6
}

fn default_sr_cache_ttl_ms() -> i64 {
    5_000
}

fn default_sr_pivot_left_bars() -> usize {
    2
}

fn default_sr_pivot_lookback_bars() -> usize {
    40
}

fn default_sr_invalidate_mid_drift_usd() -> f64 {
    10.0
}

fn default_min_range_usd() -> f64 {
    50.0
}

fn default_market_stale_ms() -> i64 {
    10_000
}

fn default_bar1h_stale_ms() -> i64 {
    60_000
}

fn default_lrc_a_stale_ms() -> i64 {
    60_000
}

fn default_startup_no_order_ms() -> i64 {
    30_000
}

fn default_startup_window_ms() -> i64 {
    120_000
}

fn default_flow_hostile_threshold() -> f64 {
    0.4
}

fn default_funding_hostile_threshold() -> f64 {
    0.0005
}

fn default_premium_hostile_threshold() -> f64 {
    0.002
}

fn default_max_impact_spread_bps() -> f64 {
    12.0
}

fn default_min_net_usd() -> f64 {
    1.0
}

fn default_min_entry_quality() -> f64 {
    0.55
}

fn default_entry_weights() -> Vec<f64> {
    vec![0.4, 0.3, 0.2, 0.1]
}

fn default_taker_fee_bps() -> f64 {
    4.5
}

fn default_base_notional_usd() -> f64 {
    1_000.0
}

fn default_min_cluster_count() -> usize {
    2
}

fn default_min_map_strength() -> f64 {
    0.3
}

fn default_sr_reference_window_usd() -> f64 {
    80.0
}

fn default_hard_sl_streak_limit() -> u32 {
    3
}

fn default_net_per_trade_halt_usd() -> f64 {
    -250.0
}

fn default_engine_state_save_interval_ms() -> i64 {
    5_000
}

fn default_exit_streak_required() -> u32 {
    3
}

fn default_ws_port() -> u16 {
    8788
}

fn default_backfill_base_delay_ms() -> i64 {
    5_000
}

fn default_backfill_max_delay_ms() -> i64 {
    5 * 60 * 1000
}

fn default_warmup_ms() -> i64 {
    30_000
}

fn default_a_trend_strong_min() -> f64 {
    4.0
}

fn default_a_trend_weak_max() -> f64 {
    1.5
}

fn default_a_range_lookback_bars() -> usize {
    6
}

fn default_a_diagnostic_rate_limit_ms() -> i64 {
    5_000
}

fn default_meta_lookback_ms() -> i64 {
    30_000
}

fn default_meta_toxic_threshold() -> f64 {
    0.6
}

fn default_backfill_target_bars() -> usize {
    60
}

fn default_backfill_candle_limit() -> usize {
    500
}

fn default_dashboard_broadcast_hz() -> f64 {
    2.0
}

fn default_health_ws_warn_ms() -> i64 {
    15_000
}
fn default_health_ws_ng_ms() -> i64 {
    30_000
}
fn default_health_io_warn_ms() -> i64 {
    20_000
}
fn default_health_io_ng_ms() -> i64 {
    40_000
}
fn default_health_decision_warn_ms() -> i64 {
    25_000
}
fn default_health_decision_ng_ms() -> i64 {
    45_000
}
fn default_health_engine_warn_ms() -> i64 {
    30_000
}
fn default_health_engine_ng_ms() -> i64 {
    60_000
}

fn default_crash_log_rate_limit_ms() -> i64 {
    60_000
}

fn default_decision_monitor_interval_ms() -> i64 {
    60_000
}

fn default_firepower_weak() -> f64 {
    0.5
}
fn default_firepower_normal() -> f64 {
    1.0
}
fn default_firepower_strong() -> f64 {
    1.75
}

/// Top-level runtime configuration for the tick pipeline.
///
/// Every field has a serde default so that older JSON files missing new
/// fields still deserialize correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,

    #[serde(default)]
    pub mode: EngineMode,

    // --- bar trackers --------------------------------------------------
    #[serde(default = "default_bar15m_interval_ms")]
    pub bar15m_interval_ms: i64,
    #[serde(default = "default_bar1h_interval_ms")]
    pub bar1h_interval_ms: i64,
    #[serde(default = "default_lookback_bars_1h")]
    pub lookback_bars_1h: usize,

    // --- LRC engines ----------------------------------------------------
    #[serde(default = "default_lrc_len_b15m")]
    pub lrc_len_b15m: usize,
    #[serde(default = "default_lrc_len_a1h")]
    pub lrc_len_a1h: usize,
    #[serde(default = "default_lrc_len_daily")]
    pub lrc_len_daily: usize,
    #[serde(default = "default_dev_len")]
    pub dev_len: f64,
    #[serde(default = "default_flat_thresh")]
    pub flat_thresh: f64,
    #[serde(default = "default_k_norm")]
    pub k_norm: f64,

    // --- adaptive 1h lookback controller ---------------------------------
    #[serde(default = "default_adaptive_min_final_span")]
    pub adaptive_min_final_span_usd: f64,
    #[serde(default = "default_adaptive_high_span")]
    pub adaptive_high_span_usd: f64,
    #[serde(default = "default_adaptive_expand_step")]
    pub adaptive_expand_step: usize,
    #[serde(default = "default_adaptive_start_lookback")]
    pub adaptive_start_lookback: usize,
    #[serde(default = "default_adaptive_expanded_lookback")]
    pub adaptive_expanded_lookback: usize,
    #[serde(default = "default_adaptive_switch_cooldown_ms")]
    pub adaptive_switch_cooldown_ms: i64,
    #[serde(default = "default_adaptive_weak_order_ms_after_switch")]
    pub adaptive_weak_order_ms_after_switch: i64,

    // --- depth SR analyzer -----------------------------------------------
    #[serde(default = "default_depth_observation_window_s")]
    pub depth_observation_window_s: i64,
    #[serde(default = "default_depth_frequency_analysis_interval_s")]
    pub depth_frequency_analysis_interval_s: i64,
    #[serde(default = "default_depth_bin_size_usd")]
    pub depth_bin_size_usd: f64,
    #[serde(default = "default_depth_threshold_multiplier")]
    pub depth_threshold_multiplier: f64,
    #[serde(default = "default_depth_merge_distance_usd")]
    pub depth_merge_distance_usd: f64,
    #[serde(default = "default_depth_min_sample_count")]
    pub depth_min_sample_count: usize,

    // --- trade flow tracker ------------------------------------------------
    #[serde(default = "default_trade_flow_windows_ms")]
    pub trade_flow_windows_ms: Vec<i64>,
    #[serde(default = "default_large_trade_factor")]
    pub large_trade_factor: f64,
    #[serde(default = "default_trade_flow_cleanup_interval_ms")]
    pub trade_flow_cleanup_interval_ms: i64,
    #[serde(default = "default_trade_flow_max_buffer_size")]
    pub trade_flow_max_buffer_size: usize,

    // --- structure snapshot builder -----------------------------------------
    #[serde(default = "default_structure_refresh_ms")]
    pub structure_refresh_ms: i64,
    #[serde(default = "default_structure_rails_break_buffer_usd")]
    pub structure_rails_break_buffer_usd: f64,
    #[serde(default = "default_structure_span_change_ratio_threshold")]
    pub structure_span_change_ratio_threshold: f64,
    /// Candidates from the daily arena (channel top/mid/bottom) within this
    /// distance of each other collapse into one B0 candidate level.
    #[serde(default = "default_daily_merge_distance_usd")]
    pub daily_merge_distance_usd: f64,
    #[serde(default = "default_min_overlap_ratio")]
    pub min_overlap_ratio: f64,
    #[serde(default = "default_sr_near_ratio")]
    pub sr_near_ratio: f64,
    #[serde(default = "default_sr_max_levels")]
    pub sr_max_levels: usize,
    #[serde(default = "default_sr_cache_ttl_ms")]
    pub sr_cache_ttl_ms: i64,
    #[serde(default = "default_sr_invalidate_mid_drift_usd")]
    pub sr_invalidate_mid_drift_usd: f64,
    #[serde(default = "default_sr_pivot_left_bars")]
    pub sr_pivot_left_bars: usize,
    #[serde(default = "default_sr_pivot_lookback_bars")]
    pub sr_pivot_lookback_bars: usize,

    // --- decision A -----------------------------------------------------
    #[serde(default = "default_min_range_usd")]
    pub min_range_usd: f64,
    #[serde(default = "default_market_stale_ms")]
    pub market_stale_ms: i64,
    #[serde(default = "default_bar1h_stale_ms")]
    pub bar1h_stale_ms: i64,
    #[serde(default = "default_lrc_a_stale_ms")]
    pub lrc_a_stale_ms: i64,

    // --- decision B2 execution guards --------------------------------------
    #[serde(default = "default_startup_no_order_ms")]
    pub startup_no_order_ms: i64,
    #[serde(default = "default_startup_window_ms")]
    pub startup_window_ms: i64,
    #[serde(default = "default_flow_hostile_threshold")]
    pub flow_hostile_threshold: f64,
    #[serde(default = "default_funding_hostile_threshold")]
    pub funding_hostile_threshold: f64,
    #[serde(default = "default_premium_hostile_threshold")]
    pub premium_hostile_threshold: f64,
    #[serde(default = "default_max_impact_spread_bps")]
    pub max_impact_spread_bps: f64,
    #[serde(default = "default_min_net_usd")]
    pub min_net_usd: f64,
    #[serde(default = "default_min_entry_quality")]
    pub min_entry_quality: f64,
    #[serde(default = "default_entry_weights")]
    pub entry_weights: Vec<f64>,
    #[serde(default = "default_min_cluster_count")]
    pub min_cluster_count: usize,
    #[serde(default = "default_min_map_strength")]
    pub min_map_strength: f64,
    #[serde(default = "default_sr_reference_window_usd")]
    pub sr_reference_window_usd: f64,

    // --- fees / sizing ------------------------------------------------------
    #[serde(default = "default_taker_fee_bps")]
    pub taker_fee_bps: f64,
    #[serde(default = "default_base_notional_usd")]
    pub base_notional_usd: f64,

    // --- safety -------------------------------------------------------------
    #[serde(default = "default_hard_sl_streak_limit")]
    pub hard_sl_streak_limit: u32,
    #[serde(default = "default_net_per_trade_halt_usd")]
    pub net_per_trade_halt_usd: f64,
    #[serde(default = "default_exit_streak_required")]
    pub exit_streak_required: u32,

    // --- persistence / ops ----------------------------------------------------
    #[serde(default = "default_engine_state_save_interval_ms")]
    pub engine_state_save_interval_ms: i64,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    #[serde(default = "default_backfill_base_delay_ms")]
    pub backfill_base_delay_ms: i64,
    #[serde(default = "default_backfill_max_delay_ms")]
    pub backfill_max_delay_ms: i64,
    #[serde(default = "default_backfill_target_bars")]
    pub backfill_target_bars: usize,
    #[serde(default = "default_backfill_candle_limit")]
    pub backfill_candle_limit: usize,

    // --- decision A -------------------------------------------------------
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: i64,
    #[serde(default = "default_a_trend_strong_min")]
    pub a_trend_strong_min: f64,
    #[serde(default = "default_a_trend_weak_max")]
    pub a_trend_weak_max: f64,
    #[serde(default = "default_a_range_lookback_bars")]
    pub a_range_lookback_bars: usize,
    #[serde(default = "default_a_diagnostic_rate_limit_ms")]
    pub a_diagnostic_rate_limit_ms: i64,

    // --- meta gate ----------------------------------------------------------
    #[serde(default = "default_meta_lookback_ms")]
    pub meta_lookback_ms: i64,
    #[serde(default = "default_meta_toxic_threshold")]
    pub meta_toxic_threshold: f64,

    // --- sizing / firepower ---------------------------------------------------
    #[serde(default = "default_firepower_weak")]
    pub firepower_weak: f64,
    #[serde(default = "default_firepower_normal")]
    pub firepower_normal: f64,
    #[serde(default = "default_firepower_strong")]
    pub firepower_strong: f64,

    // --- health & monitor -----------------------------------------------------
    #[serde(default = "default_health_ws_warn_ms")]
    pub health_ws_warn_ms: i64,
    #[serde(default = "default_health_ws_ng_ms")]
    pub health_ws_ng_ms: i64,
    #[serde(default = "default_health_io_warn_ms")]
    pub health_io_warn_ms: i64,
    #[serde(default = "default_health_io_ng_ms")]
    pub health_io_ng_ms: i64,
    #[serde(default = "default_health_decision_warn_ms")]
    pub health_decision_warn_ms: i64,
    #[serde(default = "default_health_decision_ng_ms")]
    pub health_decision_ng_ms: i64,
    #[serde(default = "default_health_engine_warn_ms")]
    pub health_engine_warn_ms: i64,
    #[serde(default = "default_health_engine_ng_ms")]
    pub health_engine_ng_ms: i64,
    #[serde(default = "default_crash_log_rate_limit_ms")]
    pub crash_log_rate_limit_ms: i64,
    #[serde(default = "default_decision_monitor_interval_ms")]
    pub decision_monitor_interval_ms: i64,
    #[serde(default = "default_dashboard_broadcast_hz")]
    pub dashboard_broadcast_hz: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            mode: EngineMode::default(),
            bar15m_interval_ms: default_bar15m_interval_ms(),
            bar1h_interval_ms: default_bar1h_interval_ms(),
            lookback_bars_1h: default_lookback_bars_1h(),
            lrc_len_b15m: default_lrc_len_b15m(),
            lrc_len_a1h: default_lrc_len_a1h(),
            lrc_len_daily: default_lrc_len_daily(),
            dev_len: default_dev_len(),
            flat_thresh: default_flat_thresh(),
            k_norm: default_k_norm(),
            adaptive_min_final_span_usd: default_adaptive_min_final_span(),
            adaptive_high_span_usd: default_adaptive_high_span(),
            adaptive_expand_step: default_adaptive_expand_step(),
            adaptive_start_lookback: default_adaptive_start_lookback(),
            adaptive_expanded_lookback: default_adaptive_expanded_lookback(),
            adaptive_switch_cooldown_ms: default_adaptive_switch_cooldown_ms(),
            adaptive_weak_order_ms_after_switch: default_adaptive_weak_order_ms_after_switch(),
            depth_observation_window_s: default_depth_observation_window_s(),
            depth_frequency_analysis_interval_s: default_depth_frequency_analysis_interval_s(),
            depth_bin_size_usd: default_depth_bin_size_usd(),
            depth_threshold_multiplier: default_depth_threshold_multiplier(),
            depth_merge_distance_usd: default_depth_merge_distance_usd(),
            depth_min_sample_count: default_depth_min_sample_count(),
            trade_flow_windows_ms: default_trade_flow_windows_ms(),
            large_trade_factor: default_large_trade_factor(),
            trade_flow_cleanup_interval_ms: default_trade_flow_cleanup_interval_ms(),
            trade_flow_max_buffer_size: default_trade_flow_max_buffer_size(),
            structure_refresh_ms: default_structure_refresh_ms(),
            structure_rails_break_buffer_usd: default_structure_rails_break_buffer_usd(),
            structure_span_change_ratio_threshold: default_structure_span_change_ratio_threshold(),
            daily_merge_distance_usd: default_daily_merge_distance_usd(),
            min_overlap_ratio: default_min_overlap_ratio(),
            sr_near_ratio: default_sr_near_ratio(),
            sr_max_levels: default_sr_max_levels(),
            sr_cache_ttl_ms: default_sr_cache_ttl_ms(),
            sr_invalidate_mid_drift_usd: default_sr_invalidate_mid_drift_usd(),
            sr_pivot_left_bars: default_sr_pivot_left_bars(),
            sr_pivot_lookback_bars: default_sr_pivot_lookback_bars(),
            min_range_usd: default_min_range_usd(),
            market_stale_ms: default_market_stale_ms(),
            bar1h_stale_ms: default_bar1h_stale_ms(),
            lrc_a_stale_ms: default_lrc_a_stale_ms(),
            startup_no_order_ms: default_startup_no_order_ms(),
            startup_window_ms: default_startup_window_ms(),
            flow_hostile_threshold: default_flow_hostile_threshold(),
            funding_hostile_threshold: default_funding_hostile_threshold(),
            premium_hostile_threshold: default_premium_hostile_threshold(),
            max_impact_spread_bps: default_max_impact_spread_bps(),
            min_net_usd: default_min_net_usd(),
            min_entry_quality: default_min_entry_quality(),
            entry_weights: default_entry_weights(),
            min_cluster_count: default_min_cluster_count(),
            min_map_strength: default_min_map_strength(),
            sr_reference_window_usd: default_sr_reference_window_usd(),
            taker_fee_bps: default_taker_fee_bps(),
            base_notional_usd: default_base_notional_usd(),
            hard_sl_streak_limit: default_hard_sl_streak_limit(),
            net_per_trade_halt_usd: default_net_per_trade_halt_usd(),
            exit_streak_required: default_exit_streak_required(),
            engine_state_save_interval_ms: default_engine_state_save_interval_ms(),
            ws_port: default_ws_port(),
            backfill_base_delay_ms: default_backfill_base_delay_ms(),
            backfill_max_delay_ms: default_backfill_max_delay_ms(),
            backfill_target_bars: default_backfill_target_bars(),
            backfill_candle_limit: default_backfill_candle_limit(),
            warmup_ms: default_warmup_ms(),
            a_trend_strong_min: default_a_trend_strong_min(),
            a_trend_weak_max: default_a_trend_weak_max(),
            a_range_lookback_bars: default_a_range_lookback_bars(),
            a_diagnostic_rate_limit_ms: default_a_diagnostic_rate_limit_ms(),
            meta_lookback_ms: default_meta_lookback_ms(),
            meta_toxic_threshold: default_meta_toxic_threshold(),
            firepower_weak: default_firepower_weak(),
            firepower_normal: default_firepower_normal(),
            firepower_strong: default_firepower_strong(),
            health_ws_warn_ms: default_health_ws_warn_ms(),
            health_ws_ng_ms: default_health_ws_ng_ms(),
            health_io_warn_ms: default_health_io_warn_ms(),
            health_io_ng_ms: default_health_io_ng_ms(),
            health_decision_warn_ms: default_health_decision_warn_ms(),
            health_decision_ng_ms: default_health_decision_ng_ms(),
            health_engine_warn_ms: default_health_engine_warn_ms(),
            health_engine_ng_ms: default_health_engine_ng_ms(),
            crash_log_rate_limit_ms: default_crash_log_rate_limit_ms(),
            decision_monitor_interval_ms: default_decision_monitor_interval_ms(),
            dashboard_broadcast_hz: default_dashboard_broadcast_hz(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`, falling back to
    /// defaults (with a warning) if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "runtime config not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(path = %path.display(), symbol = %config.symbol, mode = %config.mode, "runtime config loaded");
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        crate::persistence::atomic_write_json(path, self)
    }

    /// Read the `MODE`/`TEST_MODE` environment pair once and overlay it on
    /// top of a loaded config, matching the "fixed for process lifetime"
    /// design of `EngineMode`.
    pub fn with_env_mode(mut self) -> Self {
        self.mode = EngineMode::from_env();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.symbol, "BTC");
        assert_eq!(cfg.lookback_bars_1h, 24);
        assert!((cfg.min_range_usd - 50.0).abs() < f64::EPSILON);
        assert_eq!(cfg.trade_flow_windows_ms, vec![5_000, 30_000, 60_000]);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.symbol, "BTC");
        assert_eq!(cfg.depth_min_sample_count, 300);
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "symbol": "ETH", "min_range_usd": 25.0 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbol, "ETH");
        assert!((cfg.min_range_usd - 25.0).abs() < f64::EPSILON);
        assert_eq!(cfg.lrc_len_a1h, 40);
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbol, cfg2.symbol);
        assert_eq!(cfg.lookback_bars_1h, cfg2.lookback_bars_1h);
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let cfg = RuntimeConfig::load("/nonexistent/path/does-not-exist.json").unwrap();
        assert_eq!(cfg.symbol, "BTC");
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut cfg = RuntimeConfig::default();
        cfg.symbol = "ETH".to_string();
        cfg.min_range_usd = 33.0;
        cfg.save(&path).unwrap();
        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.symbol, "ETH");
        assert!((loaded.min_range_usd - 33.0).abs() < f64::EPSILON);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
