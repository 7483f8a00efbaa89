// =============================================================================
// Safety — the engine's halting state machine.
// =============================================================================
//
// Grounded on the teacher's `risk.rs` circuit breakers, collapsed from four
// independent percentage-based breakers down to the two automatic triggers
// this engine needs (data staleness, hard-SL streak, net-per-trade loss) plus
// a warmup gate. Unlike the teacher's `RiskEngine`, there is no `RwLock`
// here: the engine loop owns `Safety` exclusively and calls these as plain
// functions on each tick.

use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::engine::state::Safety;
use crate::types::SafetyReason;
use crate::types::SafetyStatus;

/// Everything the safety evaluator needs to read about the current tick.
/// Built fresh by the engine loop each cycle from the `IoPacket` and recent
/// trade history — safety never reaches back into market/decision state
/// itself.
pub struct SafetyInputs {
    pub data_fresh: bool,
    pub bar1h_ready: bool,
    pub warming_up: bool,
    pub hard_sl_streak: u32,
    pub last_trade_net_usd: Option<f64>,
}

/// Evaluate one tick's safety transition in place. Only `DATA_STALE` ever
/// auto-clears; `AUTO_HALT_*` reasons latch until an operator resets the
/// persisted state file, mirroring the teacher's manual circuit-breaker
/// reset discipline in `risk.rs`.
pub fn evaluate(safety: &mut Safety, inputs: &SafetyInputs, config: &RuntimeConfig, now_ms: i64) {
    if let SafetyStatus::Halted = safety.status {
        if safety.reason != SafetyReason::DataStale {
            // Hard-SL-streak / net-per-trade halts require a manual reset.
            return;
        }
    }

    if !inputs.data_fresh {
        transition(safety, SafetyStatus::Halted, SafetyReason::DataStale, now_ms);
        return;
    }

    if inputs.hard_sl_streak >= config.hard_sl_streak_limit {
        transition(
            safety,
            SafetyStatus::Halted,
            SafetyReason::AutoHaltHardSlStreak,
            now_ms,
        );
        return;
    }

    if let Some(net) = inputs.last_trade_net_usd {
        if net <= -config.net_per_trade_halt_usd.abs() {
            transition(
                safety,
                SafetyStatus::Halted,
                SafetyReason::AutoHaltNetPerTrade,
                now_ms,
            );
            return;
        }
    }

    // Recovering from DATA_STALE: per the data-recovery property, land on
    // ACTIVE/WARMUP while bar1h hasn't confirmed yet, else full ACTIVE.
    if safety.status == SafetyStatus::Halted && safety.reason == SafetyReason::DataStale {
        if inputs.bar1h_ready {
            transition(safety, SafetyStatus::Active, SafetyReason::None, now_ms);
        } else {
            transition(safety, SafetyStatus::Active, SafetyReason::Warmup, now_ms);
        }
        return;
    }

    if inputs.warming_up {
        transition(safety, SafetyStatus::Active, SafetyReason::Warmup, now_ms);
        return;
    }

    transition(safety, SafetyStatus::Normal, SafetyReason::None, now_ms);
}

fn transition(safety: &mut Safety, status: SafetyStatus, reason: SafetyReason, now_ms: i64) {
    if safety.status == status && safety.reason == reason {
        return;
    }
    info!(
        from_status = %safety.status,
        from_reason = %safety.reason,
        to_status = %status,
        to_reason = %reason,
        "safety transition"
    );
    if status == SafetyStatus::Halted {
        warn!(reason = %reason, "engine halted");
    }
    safety.status = status;
    safety.reason = reason;
    safety.since_ms = now_ms;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RuntimeConfig {
        RuntimeConfig::default()
    }

    #[test]
    fn data_stale_halts() {
        let mut safety = Safety::default();
        let inputs = SafetyInputs {
            data_fresh: false,
            bar1h_ready: true,
            warming_up: false,
            hard_sl_streak: 0,
            last_trade_net_usd: None,
        };
        evaluate(&mut safety, &inputs, &cfg(), 1000);
        assert_eq!(safety.status, SafetyStatus::Halted);
        assert_eq!(safety.reason, SafetyReason::DataStale);
    }

    #[test]
    fn data_stale_recovers_to_warmup_when_bar1h_not_ready() {
        let mut safety = Safety {
            status: SafetyStatus::Halted,
            reason: SafetyReason::DataStale,
            since_ms: 0,
        };
        let inputs = SafetyInputs {
            data_fresh: true,
            bar1h_ready: false,
            warming_up: false,
            hard_sl_streak: 0,
            last_trade_net_usd: None,
        };
        evaluate(&mut safety, &inputs, &cfg(), 2000);
        assert_eq!(safety.status, SafetyStatus::Active);
        assert_eq!(safety.reason, SafetyReason::Warmup);
    }

    #[test]
    fn data_stale_recovers_fully_when_bar1h_ready() {
        let mut safety = Safety {
            status: SafetyStatus::Halted,
            reason: SafetyReason::DataStale,
            since_ms: 0,
        };
        let inputs = SafetyInputs {
            data_fresh: true,
            bar1h_ready: true,
            warming_up: false,
            hard_sl_streak: 0,
            last_trade_net_usd: None,
        };
        evaluate(&mut safety, &inputs, &cfg(), 2000);
        assert_eq!(safety.status, SafetyStatus::Active);
        assert_eq!(safety.reason, SafetyReason::None);
    }

    #[test]
    fn hard_sl_streak_halts_and_requires_manual_reset() {
        let mut config = cfg();
        config.hard_sl_streak_limit = 3;
        let mut safety = Safety::default();
        let inputs = SafetyInputs {
            data_fresh: true,
            bar1h_ready: true,
            warming_up: false,
            hard_sl_streak: 3,
            last_trade_net_usd: None,
        };
        evaluate(&mut safety, &inputs, &config, 1000);
        assert_eq!(safety.reason, SafetyReason::AutoHaltHardSlStreak);

        // Even with everything recovered, stays halted until manual reset.
        let recovered = SafetyInputs {
            data_fresh: true,
            bar1h_ready: true,
            warming_up: false,
            hard_sl_streak: 0,
            last_trade_net_usd: None,
        };
        evaluate(&mut safety, &recovered, &config, 2000);
        assert_eq!(safety.status, SafetyStatus::Halted);
        assert_eq!(safety.reason, SafetyReason::AutoHaltHardSlStreak);
    }

    #[test]
    fn net_per_trade_loss_halts() {
        let mut config = cfg();
        config.net_per_trade_halt_usd = 50.0;
        let mut safety = Safety::default();
        let inputs = SafetyInputs {
            data_fresh: true,
            bar1h_ready: true,
            warming_up: false,
            hard_sl_streak: 0,
            last_trade_net_usd: Some(-75.0),
        };
        evaluate(&mut safety, &inputs, &config, 1000);
        assert_eq!(safety.reason, SafetyReason::AutoHaltNetPerTrade);
    }

    #[test]
    fn warmup_sets_active_warmup_reason() {
        let mut safety = Safety::default();
        let inputs = SafetyInputs {
            data_fresh: true,
            bar1h_ready: true,
            warming_up: true,
            hard_sl_streak: 0,
            last_trade_net_usd: None,
        };
        evaluate(&mut safety, &inputs, &cfg(), 1000);
        assert_eq!(safety.status, SafetyStatus::Active);
        assert_eq!(safety.reason, SafetyReason::Warmup);
    }

    #[test]
    fn normal_path_clears_to_normal() {
        let mut safety = Safety {
            status: SafetyStatus::Active,
            reason: SafetyReason::Warmup,
            since_ms: 0,
        };
        let inputs = SafetyInputs {
            data_fresh: true,
            bar1h_ready: true,
            warming_up: false,
            hard_sl_streak: 0,
            last_trade_net_usd: None,
        };
        evaluate(&mut safety, &inputs, &cfg(), 1000);
        assert_eq!(safety.status, SafetyStatus::Normal);
        assert_eq!(safety.reason, SafetyReason::None);
    }
}
