// =============================================================================
// Backfill Scheduler — per-timeframe fetch state with exponential backoff.
// =============================================================================
//
// Tracks whether a timeframe (15m/1h) still needs historical candles fetched
// to reach `target_bars` confirmed bars, and when the next attempt may fire.
// This module holds only the scheduling decision; the actual HTTP round trip
// lives in `venue::backfill_client` and is fire-and-forget from the main
// loop's perspective — the loop never awaits it, it only reads back the
// `BackfillState` flags a completed (or failed) fetch updates.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillState {
    pub in_flight: bool,
    pub next_retry_at_ms: i64,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub satisfied: bool,
}

impl BackfillState {
    pub fn new() -> Self {
        Self {
            in_flight: false,
            next_retry_at_ms: 0,
            attempts: 0,
            last_error: None,
            satisfied: false,
        }
    }
}

impl Default for BackfillState {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides when a timeframe is due for a backfill attempt and computes the
/// exponential backoff delay. Pure state machine; never performs I/O itself.
pub struct BackfillScheduler {
    base_delay_ms: i64,
    max_delay_ms: i64,
    target_bars: usize,
}

impl BackfillScheduler {
    pub fn new(base_delay_ms: i64, max_delay_ms: i64, target_bars: usize) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            target_bars,
        }
    }

    /// Should the main loop fire a new fetch for this timeframe right now?
    pub fn due(&self, state: &BackfillState, confirmed_bars: usize, now_ms: i64) -> bool {
        if state.satisfied || state.in_flight {
            return false;
        }
        if confirmed_bars >= self.target_bars {
            return false;
        }
        now_ms >= state.next_retry_at_ms
    }

    /// Mark a fetch as started (sets `in_flight`; never blocks the caller).
    pub fn on_started(&self, state: &mut BackfillState) {
        state.in_flight = true;
    }

    /// Record a successful fetch. Resets attempts/backoff; `satisfied` is set
    /// by the caller once the merged tracker actually reaches `target_bars`
    /// (a single fetch may only partially fill the gap).
    pub fn on_success(&self, state: &mut BackfillState, confirmed_bars: usize) {
        state.in_flight = false;
        state.attempts = 0;
        state.last_error = None;
        state.satisfied = confirmed_bars >= self.target_bars;
        if !state.satisfied {
            state.next_retry_at_ms = 0;
        }
    }

    /// Record a failed fetch (HTTP non-2xx, timeout). Doubles the backoff
    /// delay from `base_delay_ms`, capped at `max_delay_ms`.
    pub fn on_failure(&self, state: &mut BackfillState, now_ms: i64, error: impl Into<String>) {
        state.in_flight = false;
        state.attempts = state.attempts.saturating_add(1);
        state.last_error = Some(error.into());
        let delay = self
            .base_delay_ms
            .saturating_mul(1_i64 << state.attempts.min(20))
            .min(self.max_delay_ms)
            .max(self.base_delay_ms);
        state.next_retry_at_ms = now_ms + delay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_when_under_target_and_past_retry_time() {
        let sched = BackfillScheduler::new(5_000, 300_000, 60);
        let state = BackfillState::new();
        assert!(sched.due(&state, 10, 0));
    }

    #[test]
    fn not_due_when_target_already_met() {
        let sched = BackfillScheduler::new(5_000, 300_000, 60);
        let state = BackfillState::new();
        assert!(!sched.due(&state, 60, 0));
    }

    #[test]
    fn not_due_while_in_flight() {
        let sched = BackfillScheduler::new(5_000, 300_000, 60);
        let mut state = BackfillState::new();
        sched.on_started(&mut state);
        assert!(!sched.due(&state, 10, 0));
    }

    #[test]
    fn backoff_doubles_and_caps_at_max() {
        let sched = BackfillScheduler::new(5_000, 20_000, 60);
        let mut state = BackfillState::new();
        sched.on_failure(&mut state, 0, "timeout");
        assert_eq!(state.next_retry_at_ms, 10_000); // 5000 * 2^1
        sched.on_failure(&mut state, 10_000, "timeout");
        assert_eq!(state.next_retry_at_ms, 10_000 + 20_000); // 5000*2^2=20000, capped at max
        assert_eq!(state.attempts, 2);
    }

    #[test]
    fn success_clears_in_flight_and_sets_satisfied() {
        let sched = BackfillScheduler::new(5_000, 300_000, 60);
        let mut state = BackfillState::new();
        sched.on_started(&mut state);
        sched.on_success(&mut state, 60);
        assert!(!state.in_flight);
        assert!(state.satisfied);
        assert_eq!(state.attempts, 0);
    }
}
