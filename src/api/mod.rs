// =============================================================================
// API layer — health REST endpoint + dashboard WebSocket.
// =============================================================================
//
// Replaces the teacher's `Arc<AppState>` shared-state handle with a pair of
// `tokio::sync::watch` receivers: the engine loop owns `Context` exclusively
// and pushes a fresh `DashboardSnapshot`/`HealthReport` on its own cadence,
// this layer only ever reads the latest pushed value. No lock is taken on
// core engine state by any request handler.

pub mod auth;
pub mod rest;
pub mod ws;

use tokio::sync::watch;

use crate::dashboard::DashboardSnapshot;
use crate::health::HealthReport;

#[derive(Clone)]
pub struct ApiState {
    pub dashboard_rx: watch::Receiver<DashboardSnapshot>,
    pub health_rx: watch::Receiver<HealthReport>,
}

pub use rest::router;
