// =============================================================================
// LRC Engines — linear regression channel + TradingView-compatible slope.
// =============================================================================
//
// Three instances run over the same math with different inputs: B-15m (the
// 15-minute close array), A-1h (the 1-hour close array), D-daily (the
// 1h-bar-derived daily-scale close array). All non-finite intermediates
// downgrade the result to `ready: false` with null channel fields; zero
// denominators return zero slope, never NaN.

use serde::{Deserialize, Serialize};

use crate::types::TrendState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LrcState {
    pub ready: bool,
    pub channel_top: Option<f64>,
    pub channel_mid: Option<f64>,
    pub channel_bottom: Option<f64>,
    pub slope: Option<f64>,
    pub dev: Option<f64>,
    pub normalized_slope: Option<f64>,
    pub trend_state: TrendState,
    pub updated_at_ms: i64,
}

impl LrcState {
    fn not_ready(updated_at_ms: i64) -> Self {
        Self {
            ready: false,
            channel_top: None,
            channel_mid: None,
            channel_bottom: None,
            slope: None,
            dev: None,
            normalized_slope: None,
            trend_state: TrendState::Unknown,
            updated_at_ms,
        }
    }
}

/// OLS fit over a window ordered oldest-first (`x = 0..n-1`). Returns
/// `(slope, intercept)`; a degenerate (n<=1 or zero-variance-x) window
/// returns `(0.0, window.last())` rather than NaN.
fn ols_fit(window: &[f64]) -> (f64, f64) {
    let n = window.len() as f64;
    if window.len() < 2 {
        return (0.0, window.last().copied().unwrap_or(0.0));
    }
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    for (i, &y) in window.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }
    let denom = n * sum_xx - sum_x * sum_x;
    if denom == 0.0 || !denom.is_finite() {
        return (0.0, sum_y / n);
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;
    (slope, intercept)
}

/// `linreg(values, len, offset)`: fit an OLS line over the `len`-sample
/// window starting `offset` samples back from the newest (`values[0]`),
/// oldest-first within the window, and return the fitted value at the
/// window's newest point. Returns `None` if the window doesn't exist.
fn linreg(values_newest_first: &[f64], len: usize, offset: usize) -> Option<f64> {
    if values_newest_first.len() < offset + len {
        return None;
    }
    let window_newest_first = &values_newest_first[offset..offset + len];
    let mut window_oldest_first: Vec<f64> = window_newest_first.to_vec();
    window_oldest_first.reverse();
    let (slope, intercept) = ols_fit(&window_oldest_first);
    let fit = intercept + slope * (len as f64 - 1.0);
    if fit.is_finite() {
        Some(fit)
    } else {
        None
    }
}

/// Compute the TV-compatible LRC state from a newest-first close array.
/// Requires at least `len + 1` samples.
pub fn compute_lrc_tv(
    values_newest_first: &[f64],
    len: usize,
    dev_len: f64,
    k_norm: f64,
    flat_thresh: f64,
    now_ms: i64,
) -> LrcState {
    if len < 1 || values_newest_first.len() < len + 1 {
        return LrcState::not_ready(now_ms);
    }
    if values_newest_first[..len + 1].iter().any(|v| !v.is_finite()) {
        return LrcState::not_ready(now_ms);
    }

    let proj0 = linreg(values_newest_first, len, 0);
    let proj1 = linreg(values_newest_first, len, 1);
    let (Some(proj0), Some(proj1)) = (proj0, proj1) else {
        return LrcState::not_ready(now_ms);
    };
    let tv_slope = proj0 - proj1;
    if !tv_slope.is_finite() {
        return LrcState::not_ready(now_ms);
    }

    // Channel: OLS over the most recent `len` samples.
    let window_newest_first = &values_newest_first[0..len];
    let mut window_oldest_first: Vec<f64> = window_newest_first.to_vec();
    window_oldest_first.reverse();
    let (slope_ols, intercept) = ols_fit(&window_oldest_first);
    let channel_mid = intercept + slope_ols * (len as f64 - 1.0);
    if !channel_mid.is_finite() {
        return LrcState::not_ready(now_ms);
    }

    let mean_sq_residual: f64 = window_oldest_first
        .iter()
        .enumerate()
        .map(|(i, &y)| {
            let fitted = intercept + slope_ols * i as f64;
            let r = y - fitted;
            r * r
        })
        .sum::<f64>()
        / len as f64;
    let dev = mean_sq_residual.sqrt();
    if !dev.is_finite() {
        return LrcState::not_ready(now_ms);
    }

    let channel_top = channel_mid + dev * dev_len;
    let channel_bottom = channel_mid - dev * dev_len;
    if !channel_top.is_finite() || !channel_bottom.is_finite() {
        return LrcState::not_ready(now_ms);
    }

    let epsilon = if len > 0 { k_norm / len as f64 } else { 0.0 };
    let normalized_slope = if epsilon > 0.0 {
        tv_slope.abs() / epsilon
    } else {
        0.0
    };

    let trend_state = if normalized_slope < flat_thresh {
        TrendState::Flat
    } else if tv_slope > 0.0 {
        TrendState::Up
    } else {
        TrendState::Down
    };

    LrcState {
        ready: true,
        channel_top: Some(channel_top),
        channel_mid: Some(channel_mid),
        channel_bottom: Some(channel_bottom),
        slope: Some(tv_slope),
        dev: Some(dev),
        normalized_slope: Some(normalized_slope),
        trend_state,
        updated_at_ms: now_ms,
    }
}

/// Adaptive 1h lookback controller: expands/shrinks the 1h bar tracker's
/// readiness threshold based on observed channel span, throttled by a
/// cooldown and a post-switch "weak" window that downstream sees as the
/// `bar1h_adaptive_switching` constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveLookbackController {
    current_lookback: usize,
    last_switch_at_ms: i64,
    weak_until_ms: i64,
    last_reason: Option<String>,
}

impl AdaptiveLookbackController {
    pub fn new(start_lookback: usize) -> Self {
        Self {
            current_lookback: start_lookback,
            last_switch_at_ms: 0,
            weak_until_ms: 0,
            last_reason: None,
        }
    }

    pub fn current_lookback(&self) -> usize {
        self.current_lookback
    }

    pub fn is_weak(&self, now_ms: i64) -> bool {
        now_ms < self.weak_until_ms
    }

    pub fn last_reason(&self) -> Option<&str> {
        self.last_reason.as_deref()
    }

    /// Evaluate a candidate span and possibly switch lookback. Returns
    /// `true` if a switch occurred this call.
    #[allow(clippy::too_many_arguments)]
    pub fn observe(
        &mut self,
        span_usd: f64,
        now_ms: i64,
        min_final_span: f64,
        high_span: f64,
        expand_step: usize,
        start_lookback: usize,
        expanded_lookback: usize,
        switch_cooldown_ms: i64,
        weak_order_ms_after_switch: i64,
    ) -> bool {
        if now_ms - self.last_switch_at_ms < switch_cooldown_ms {
            return false;
        }
        if !span_usd.is_finite() {
            return false;
        }

        if span_usd < min_final_span && self.current_lookback < expanded_lookback {
            self.current_lookback = (self.current_lookback + expand_step).min(expanded_lookback);
            self.last_switch_at_ms = now_ms;
            self.weak_until_ms = now_ms + weak_order_ms_after_switch;
            self.last_reason = Some("expand_narrow_span".to_string());
            return true;
        }

        if span_usd > high_span && self.current_lookback > start_lookback {
            self.current_lookback = self.current_lookback.saturating_sub(expand_step).max(start_lookback);
            self.last_switch_at_ms = now_ms;
            self.weak_until_ms = now_ms + weak_order_ms_after_switch;
            self.last_reason = Some("shrink_wide_span".to_string());
            return true;
        }

        false
    }
}
