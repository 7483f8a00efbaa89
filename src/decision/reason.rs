// =============================================================================
// ReasonCode — one closed enum for every decision-path outcome.
// =============================================================================
//
// Consolidates what used to be ad-hoc reason strings scattered across the
// gate sequence. Every gate returns one of these plus a free-text
// diagnostic string for operator-facing detail; nothing downstream ever
// string-matches on the diagnostic.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonCode {
    // Decision A
    AStaleMarket,
    ANotReadyBar1h,
    AStaleBar1h,
    ANotReadyLrcA,
    AStaleLrcA,
    AInvalidC,
    AInvalidRange,
    ARangeTooNarrow,
    AAllowed,

    // Meta gate
    MetaToxicFlow,
    MetaAllowed,

    // Decision B2 phase 1 / 2
    B2NoStructureSnapshot,
    B2InsufficientClusters,
    B2WeakMapStrength,
    B2NoSrReference,

    // Decision B2 phase 4 execution guards
    B2StartupBlocked,
    B2StartupRestricted,
    B2FlowHostile,
    B2FundingHostile,
    B2PremiumHostile,
    B2ImpactSpreadTooWide,
    B2OiPriceTrap,
    B2FeeEdgeInsufficient,
    B2EntryQualityTooLow,
    B2Allowed,

    // Engine / warmup
    WarmupInProgress,
    NoSide,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReasonCode::AStaleMarket => "A_STALE_MARKET",
            ReasonCode::ANotReadyBar1h => "A_NOT_READY_BAR1H",
            ReasonCode::AStaleBar1h => "A_STALE_BAR1H",
            ReasonCode::ANotReadyLrcA => "A_NOT_READY_LRC_A",
            ReasonCode::AStaleLrcA => "A_STALE_LRC_A",
            ReasonCode::AInvalidC => "A_INVALID_C",
            ReasonCode::AInvalidRange => "A_INVALID_RANGE",
            ReasonCode::ARangeTooNarrow => "A_RANGE_TOO_NARROW",
            ReasonCode::AAllowed => "A_ALLOWED",
            ReasonCode::MetaToxicFlow => "META_TOXIC_FLOW",
            ReasonCode::MetaAllowed => "META_ALLOWED",
            ReasonCode::B2NoStructureSnapshot => "B2_NO_STRUCTURE_SNAPSHOT",
            ReasonCode::B2InsufficientClusters => "B2_INSUFFICIENT_CLUSTERS",
            ReasonCode::B2WeakMapStrength => "B2_WEAK_MAP_STRENGTH",
            ReasonCode::B2NoSrReference => "B2_NO_SR_REFERENCE",
            ReasonCode::B2StartupBlocked => "B2_STARTUP_BLOCKED",
            ReasonCode::B2StartupRestricted => "B2_STARTUP_RESTRICTED",
            ReasonCode::B2FlowHostile => "B2_FLOW_HOSTILE",
            ReasonCode::B2FundingHostile => "B2_FUNDING_HOSTILE",
            ReasonCode::B2PremiumHostile => "B2_PREMIUM_HOSTILE",
            ReasonCode::B2ImpactSpreadTooWide => "B2_IMPACT_SPREAD_TOO_WIDE",
            ReasonCode::B2OiPriceTrap => "B2_OI_PRICE_TRAP",
            ReasonCode::B2FeeEdgeInsufficient => "B2_FEE_EDGE_INSUFFICIENT",
            ReasonCode::B2EntryQualityTooLow => "B2_ENTRY_QUALITY_TOO_LOW",
            ReasonCode::B2Allowed => "B2_ALLOWED",
            ReasonCode::WarmupInProgress => "warmup_in_progress",
            ReasonCode::NoSide => "NO_SIDE",
        };
        write!(f, "{s}")
    }
}

/// A reason code plus free-text diagnostic. Never string-matched on by
/// callers; `code` drives logic, `diagnostic` is for humans/logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: ReasonCode,
    pub diagnostic: String,
}

impl Diagnostic {
    pub fn new(code: ReasonCode, diagnostic: impl Into<String>) -> Self {
        Self {
            code,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn ok(code: ReasonCode) -> Self {
        Self {
            code,
            diagnostic: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_canonical_strings() {
        assert_eq!(ReasonCode::ANotReadyBar1h.to_string(), "A_NOT_READY_BAR1H");
        assert_eq!(ReasonCode::ARangeTooNarrow.to_string(), "A_RANGE_TOO_NARROW");
        assert_eq!(ReasonCode::AStaleMarket.to_string(), "A_STALE_MARKET");
    }
}
