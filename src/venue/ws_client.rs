// =============================================================================
// Venue WebSocket Client — Hyperliquid L2 book / trades / asset context feed.
// =============================================================================
//
// Grounded on the teacher's `market_data/trade_stream.rs` and
// `market_data/orderbook.rs`: `connect_async` then split into `(write, read)`,
// loop on `read.next()` dispatching `Message::Text`, return `Err` on a read
// error and `Ok(())` when the stream ends so the caller (main.rs) can
// reconnect with its own backoff sleep. Unlike the teacher's per-stream
// sockets, Hyperliquid multiplexes book/trades/context onto one connection
// via subscribe messages, so this module owns a single socket per coin and
// fans parsed events out through an mpsc channel instead of mutating shared
// state directly.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::market::snapshot::Level;
use crate::types::Side;

const VENUE_WS_URL: &str = "wss://api.hyperliquid.xyz/ws";

/// One parsed venue event, ready to be folded into the I/O aggregator.
#[derive(Debug, Clone)]
pub enum VenueEvent {
    Book {
        ts_ms: i64,
        best_bid: f64,
        best_ask: f64,
        bids: Vec<Level>,
        asks: Vec<Level>,
    },
    Trade {
        ts_ms: i64,
        price: f64,
        size: f64,
        side: Side,
    },
    AssetCtx {
        ts_ms: i64,
        mark: f64,
        oracle: f64,
        funding: f64,
        premium: f64,
        open_interest: f64,
        impact_bid: f64,
        impact_ask: f64,
    },
}

fn subscribe_message(kind: &str, coin: &str) -> Value {
    serde_json::json!({
        "method": "subscribe",
        "subscription": { "type": kind, "coin": coin },
    })
}

/// Connect to the venue feed for `coin`, subscribe to `l2Book`, `trades` and
/// `activeAssetCtx`, and forward parsed events on `tx` until the stream ends
/// or errors. Mirrors the teacher's run_*_stream contract: `Ok(())` means the
/// stream closed cleanly, `Err` means a read error — either way the caller
/// reconnects after its own sleep.
pub async fn run_venue_stream(coin: &str, tx: UnboundedSender<VenueEvent>) -> anyhow::Result<()> {
    info!(url = VENUE_WS_URL, coin = %coin, "connecting to venue WebSocket");

    let (ws_stream, _response) = connect_async(VENUE_WS_URL).await?;
    info!(coin = %coin, "venue WebSocket connected");
    let (mut write, mut read) = ws_stream.split();

    for kind in ["l2Book", "trades", "activeAssetCtx"] {
        let msg = subscribe_message(kind, coin);
        write.send(Message::Text(msg.to_string())).await?;
    }

    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match parse_message(&text) {
                Ok(Some(event)) => {
                    if tx.send(event).is_err() {
                        warn!(coin = %coin, "venue event receiver dropped, stopping stream");
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(coin = %coin, error = %e, "failed to parse venue message"),
            },
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) => {
                warn!(coin = %coin, "venue WebSocket closed by peer");
                return Ok(());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(coin = %coin, error = %e, "venue WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(coin = %coin, "venue WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn parse_message(text: &str) -> anyhow::Result<Option<VenueEvent>> {
    let root: Value = serde_json::from_str(text)?;
    let channel = root.get("channel").and_then(Value::as_str).unwrap_or("");
    let data = match root.get("data") {
        Some(d) => d,
        None => return Ok(None),
    };

    match channel {
        "l2Book" => Ok(parse_l2_book(data)),
        "trades" => Ok(parse_trades(data).pop()),
        "activeAssetCtx" => Ok(parse_asset_ctx(data)),
        _ => Ok(None),
    }
}

fn level_array(value: &Value) -> Vec<Level> {
    value
        .as_array()
        .map(|levels| {
            levels
                .iter()
                .filter_map(|l| {
                    let px: f64 = l.get("px")?.as_str()?.parse().ok()?;
                    let sz: f64 = l.get("sz")?.as_str()?.parse().ok()?;
                    Some((px, sz))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_l2_book(data: &Value) -> Option<VenueEvent> {
    let levels = data.get("levels")?.as_array()?;
    let bids = level_array(levels.first()?);
    let asks = level_array(levels.get(1)?);
    let best_bid = bids.first().map(|l| l.0).unwrap_or(0.0);
    let best_ask = asks.first().map(|l| l.0).unwrap_or(0.0);
    let ts_ms = data.get("time").and_then(Value::as_i64).unwrap_or_else(now_ms);
    Some(VenueEvent::Book {
        ts_ms,
        best_bid,
        best_ask,
        bids,
        asks,
    })
}

fn parse_trades(data: &Value) -> Vec<VenueEvent> {
    let Some(array) = data.as_array() else {
        return Vec::new();
    };
    array
        .iter()
        .filter_map(|t| {
            let price: f64 = t.get("px")?.as_str()?.parse().ok()?;
            let size: f64 = t.get("sz")?.as_str()?.parse().ok()?;
            let side = match t.get("side")?.as_str()? {
                "B" => Side::Buy,
                "A" => Side::Sell,
                _ => return None,
            };
            let ts_ms = t.get("time").and_then(Value::as_i64).unwrap_or_else(now_ms);
            Some(VenueEvent::Trade { ts_ms, price, size, side })
        })
        .collect()
}

fn parse_asset_ctx(data: &Value) -> Option<VenueEvent> {
    let ctx = data.get("ctx").unwrap_or(data);
    let num = |key: &str| -> f64 {
        ctx.get(key)
            .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_f64()))
            .unwrap_or(0.0)
    };
    Some(VenueEvent::AssetCtx {
        ts_ms: now_ms(),
        mark: num("markPx"),
        oracle: num("oraclePx"),
        funding: num("funding"),
        premium: num("premium"),
        open_interest: num("openInterest"),
        impact_bid: ctx
            .get("impactPxs")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0),
        impact_ask: ctx
            .get("impactPxs")
            .and_then(Value::as_array)
            .and_then(|a| a.get(1))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0),
    })
}
