// =============================================================================
// Aurora Perp Engine — Main Entry Point
// =============================================================================
//
// Single tick-driven decision loop against one Hyperliquid perpetual. The
// venue WebSocket reader and the two backfill schedulers run as independent
// tasks that only ever send events into the main loop; `Context` is owned
// exclusively by this task, so no lock guards the core engine state.
// =============================================================================

mod api;
mod config;
mod context;
mod dashboard;
mod decision;
mod engine;
mod health;
mod market;
mod markers;
mod persistence;
mod types;
mod venue;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::ApiState;
use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::dashboard::DashboardSnapshot;
use crate::venue::VenueEvent;

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Aurora Perp Engine — Starting Up                 ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = RuntimeConfig::load("runtime_config.json")
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to load config, using defaults");
            RuntimeConfig::default()
        })
        .with_env_mode();

    info!(symbol = %config.symbol, mode = %config.mode, "engine configured");

    let start_ms = now_ms();
    let mut ctx = Context::new(config.clone(), start_ms);

    // ── Venue WebSocket reader ──────────────────────────────────────────
    let (venue_tx, mut venue_rx) = mpsc::unbounded_channel::<VenueEvent>();
    {
        let coin = config.symbol.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = venue::run_venue_stream(&coin, venue_tx.clone()).await {
                    warn!(coin = %coin, error = %e, "venue stream error — reconnecting in 5s");
                } else {
                    warn!(coin = %coin, "venue stream closed — reconnecting in 5s");
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });
    }

    // ── Backfill schedulers (fire-and-forget, per SPEC_FULL §5) ─────────
    let (backfill15m_tx, mut backfill15m_rx) = mpsc::unbounded_channel::<BackfillOutcome>();
    let (backfill1h_tx, mut backfill1h_rx) = mpsc::unbounded_channel::<BackfillOutcome>();
    spawn_backfill_poller(config.symbol.clone(), "15m", backfill15m_tx);
    spawn_backfill_poller(config.symbol.clone(), "1h", backfill1h_tx);

    // ── Dashboard / health broadcast channels ───────────────────────────
    let initial_health = ctx.health_report(start_ms);
    let initial_dashboard = DashboardSnapshot::build(&ctx, start_ms);
    let (dashboard_tx, dashboard_rx) = watch::channel(initial_dashboard);
    let (health_tx, health_rx) = watch::channel(initial_health);

    let api_state = Arc::new(ApiState { dashboard_rx, health_rx });
    {
        let bind_addr = format!("0.0.0.0:{}", config.ws_port);
        tokio::spawn(async move {
            let app = api::router(api_state);
            let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(addr = %bind_addr, error = %e, "failed to bind API server");
                    return;
                }
            };
            info!(addr = %bind_addr, "dashboard/health API listening");
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "API server exited");
            }
        });
    }

    info!("all subsystems running — entering tick loop");

    let mut broadcast_interval =
        tokio::time::interval(Duration::from_millis((1000.0 / config.dashboard_broadcast_hz).max(1.0) as u64));
    let mut decision_monitor_interval = tokio::time::interval(Duration::from_millis(config.decision_monitor_interval_ms as u64));
    let mut shutdown = Box::pin(tokio::signal::ctrl_c());

    'main_loop: loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                warn!("shutdown signal received — stopping gracefully");
                break 'main_loop;
            }

            maybe_event = venue_rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        ctx.on_venue_event(event);
                        let tick_now = now_ms();
                        ctx.mark_ws_heartbeat(tick_now);
                        let result = ctx.tick(tick_now);
                        ctx.save_if_due(tick_now, result.outcome.safety_transitioned);
                    }
                    None => {
                        error!("venue event channel closed unexpectedly");
                        break 'main_loop;
                    }
                }
            }

            Some(outcome) = backfill15m_rx.recv() => {
                apply_backfill_outcome(&mut ctx, Timeframe::Bar15m, outcome, now_ms());
            }

            Some(outcome) = backfill1h_rx.recv() => {
                apply_backfill_outcome(&mut ctx, Timeframe::Bar1h, outcome, now_ms());
            }

            _ = broadcast_interval.tick() => {
                let tick_now = now_ms();
                let _ = dashboard_tx.send(DashboardSnapshot::build(&ctx, tick_now));
                let _ = health_tx.send(ctx.health_report(tick_now));
            }

            _ = decision_monitor_interval.tick() => {
                markers::log_decision_monitor(&ctx, now_ms(), &config.symbol);
            }
        }
    }

    // ── Graceful shutdown: stop scheduling, final save, markers, exit ───
    let stop_ms = now_ms();
    if let Err(e) = ctx.save_now() {
        error!(error = %e, "failed to persist final engine state on shutdown");
    }
    if let Err(e) = ctx.record_shutdown(stop_ms, "ctrl_c") {
        error!(error = %e, "failed to append shutdown marker");
    }

    info!("aurora perp engine shut down complete");
    Ok(())
}

#[derive(Debug)]
enum Timeframe {
    Bar15m,
    Bar1h,
}

#[derive(Debug)]
enum BackfillOutcome {
    Success(Vec<venue::RawCandle>),
    Failure(String),
}

/// Poll `due()` on a fixed cadence and fire a backfill request when it says
/// so. The scheduler state itself lives on `Context`, back on the main
/// loop's task — this task only ever asks "is it due" via the outcome
/// channel round-trip; it owns no engine state directly.
fn spawn_backfill_poller(coin: String, interval: &'static str, tx: mpsc::UnboundedSender<BackfillOutcome>) {
    tokio::spawn(async move {
        let client = venue::fetch_candle_snapshot;
        let mut poll = tokio::time::interval(Duration::from_secs(5));
        loop {
            poll.tick().await;
            let end = now_ms();
            let lookback_ms: i64 = if interval == "1h" { 60 * 60_000 * 200 } else { 15 * 60_000 * 200 };
            let start = end - lookback_ms;
            match client(&coin, interval, start, end).await {
                Ok(candles) => {
                    if tx.send(BackfillOutcome::Success(candles)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    if tx.send(BackfillOutcome::Failure(e.to_string())).is_err() {
                        return;
                    }
                }
            }
            // Backfill is opportunistic, not continuous — back off hard
            // between attempts regardless of outcome; `Context` decides
            // whether another attempt is actually due next interval.
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    });
}

fn apply_backfill_outcome(ctx: &mut Context, tf: Timeframe, outcome: BackfillOutcome, now_ms: i64) {
    use crate::markers::MarkerEvent;

    match (tf, outcome) {
        (Timeframe::Bar15m, BackfillOutcome::Success(candles)) => {
            let bars = candles.len();
            ctx.merge_bar15m_backfill(candles);
            ctx.on_bar15m_backfill_success(ctx.bar15m_confirmed_count());
            let _ = ctx.marker_log.record(&MarkerEvent::Bar15mBackfillSuccess { ts: now_ms, bars });
        }
        (Timeframe::Bar15m, BackfillOutcome::Failure(err)) => {
            ctx.on_bar15m_backfill_failure(now_ms, err.clone());
            let _ = ctx.marker_log.record(&MarkerEvent::Bar15mBackfillFailed { ts: now_ms, error: err });
        }
        (Timeframe::Bar1h, BackfillOutcome::Success(candles)) => {
            let bars = candles.len();
            ctx.merge_bar1h_backfill(candles);
            ctx.on_bar1h_backfill_success(ctx.bar1h_confirmed_count());
            let _ = ctx.marker_log.record(&MarkerEvent::Bar1hBackfillSuccess { ts: now_ms, bars });
        }
        (Timeframe::Bar1h, BackfillOutcome::Failure(err)) => {
            ctx.on_bar1h_backfill_failure(now_ms, err.clone());
            let _ = ctx.marker_log.record(&MarkerEvent::Bar1hBackfillFailed { ts: now_ms, error: err });
        }
    }
}
