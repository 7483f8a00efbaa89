// =============================================================================
// Health & Monitor — stage heartbeats, freshness classification, decision
// outcome histograms.
// =============================================================================
//
// Grounded on the teacher's `app_state.rs` snapshot-building convention
// (build a `Serialize` DTO fresh from live counters on demand, no separate
// cached copy) but scoped down to the four stages this engine tracks.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::RuntimeConfig;
use crate::decision::ReasonCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StageStatus {
    Ok,
    Warn,
    Ng,
    Na,
}

fn classify(age_ms: Option<i64>, warn_ms: i64, ng_ms: i64) -> StageStatus {
    match age_ms {
        None => StageStatus::Na,
        Some(age) if age < warn_ms => StageStatus::Ok,
        Some(age) if age < ng_ms => StageStatus::Warn,
        Some(_) => StageStatus::Ng,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageHealth {
    pub name: &'static str,
    pub status: StageStatus,
    pub age_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub now: i64,
    pub stages: Vec<StageHealth>,
}

/// Last-seen timestamps for each monitored stage; the engine loop updates
/// these fields as each stage produces output.
#[derive(Debug, Clone, Default)]
pub struct StageHeartbeats {
    pub last_ws_ms: Option<i64>,
    pub last_io_ms: Option<i64>,
    pub last_decision_ms: Option<i64>,
    pub last_engine_ms: Option<i64>,
}

impl StageHeartbeats {
    pub fn report(&self, config: &RuntimeConfig, now_ms: i64) -> HealthReport {
        let age = |ts: Option<i64>| ts.map(|t| (now_ms - t).max(0));
        HealthReport {
            now: now_ms,
            stages: vec![
                StageHealth {
                    name: "network",
                    status: classify(age(self.last_ws_ms), config.health_ws_warn_ms, config.health_ws_ng_ms),
                    age_ms: age(self.last_ws_ms),
                },
                StageHealth {
                    name: "io",
                    status: classify(age(self.last_io_ms), config.health_io_warn_ms, config.health_io_ng_ms),
                    age_ms: age(self.last_io_ms),
                },
                StageHealth {
                    name: "decision",
                    status: classify(
                        age(self.last_decision_ms),
                        config.health_decision_warn_ms,
                        config.health_decision_ng_ms,
                    ),
                    age_ms: age(self.last_decision_ms),
                },
                StageHealth {
                    name: "engine",
                    status: classify(
                        age(self.last_engine_ms),
                        config.health_engine_warn_ms,
                        config.health_engine_ng_ms,
                    ),
                    age_ms: age(self.last_engine_ms),
                },
            ],
        }
    }
}

/// Rolling histogram of decision-path outcomes, for the dashboard's gate
/// snapshot panel. Bounded to a fixed capacity per reason to avoid unbounded
/// growth over a long-running process; only counts are kept, no timestamps.
#[derive(Debug, Clone, Default)]
pub struct DecisionHistogram {
    counts: HashMap<ReasonCode, u64>,
}

impl DecisionHistogram {
    pub fn record(&mut self, reason: ReasonCode) {
        *self.counts.entry(reason).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> Vec<(ReasonCode, u64)> {
        let mut entries: Vec<_> = self.counts.iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}
