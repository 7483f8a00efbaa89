// =============================================================================
// Core enums shared across the tick pipeline.
// =============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

/// Process-lifetime engine mode. Fixed once at startup from `MODE`/
/// `TEST_MODE`; never branched on mid-pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineMode {
    Live,
    Dry,
    Test,
}

impl EngineMode {
    pub fn from_env() -> Self {
        if std::env::var("TEST_MODE").as_deref() == Ok("1") {
            return EngineMode::Test;
        }
        match std::env::var("MODE").as_deref() {
            Ok("live") => EngineMode::Live,
            Ok("test") => EngineMode::Test,
            _ => EngineMode::Dry,
        }
    }

    pub fn is_test(self) -> bool {
        matches!(self, EngineMode::Test)
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineMode::Live => "live",
            EngineMode::Dry => "dry",
            EngineMode::Test => "test",
        };
        write!(f, "{s}")
    }
}

impl Default for EngineMode {
    fn default() -> Self {
        EngineMode::Dry
    }
}

/// Position / decision side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
    None,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
            Side::None => "none",
        };
        write!(f, "{s}")
    }
}

/// Decision A's macro regime classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Up,
    Down,
    Range,
    None,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Regime::Up => "UP",
            Regime::Down => "DOWN",
            Regime::Range => "RANGE",
            Regime::None => "NONE",
        };
        write!(f, "{s}")
    }
}

/// Mid's position within the active area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Zone {
    Top,
    Middle,
    Bottom,
}

/// Strength of the dominant trend, derived from normalized slope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendStrength {
    Strong,
    Normal,
    Weak,
}

/// Directional trend classification for a single LRC state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendState {
    Up,
    Down,
    Flat,
    Unknown,
}

/// Engine safety status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyStatus {
    Normal,
    Active,
    Halted,
}

impl fmt::Display for SafetyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SafetyStatus::Normal => "NORMAL",
            SafetyStatus::Active => "ACTIVE",
            SafetyStatus::Halted => "HALTED",
        };
        write!(f, "{s}")
    }
}

/// Canonical safety halt reasons. `None` means not halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyReason {
    DataStale,
    AutoHaltHardSlStreak,
    AutoHaltNetPerTrade,
    Warmup,
    None,
}

impl fmt::Display for SafetyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SafetyReason::DataStale => "DATA_STALE",
            SafetyReason::AutoHaltHardSlStreak => "AUTO_HALT_HARD_SL_STREAK",
            SafetyReason::AutoHaltNetPerTrade => "AUTO_HALT_NET_PER_TRADE",
            SafetyReason::Warmup => "WARMUP",
            SafetyReason::None => "none",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_mode_display_roundtrip() {
        assert_eq!(EngineMode::Live.to_string(), "live");
        assert_eq!(EngineMode::Test.to_string(), "test");
    }

    #[test]
    fn safety_reason_display() {
        assert_eq!(SafetyReason::DataStale.to_string(), "DATA_STALE");
    }
}
