// =============================================================================
// Backfill REST Client — historical candle snapshot fetch.
// =============================================================================
//
// Grounded on the teacher's `binance/client.rs` construction style (client
// built once, 10 s timeout, `.expect()`'d at construction since the builder
// call cannot fail with this configuration) minus HMAC signing: this
// endpoint is unauthenticated, it takes a plain JSON POST body.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

const BACKFILL_URL: &str = "https://api.hyperliquid.xyz/info";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawCandle {
    pub ts_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[derive(Clone)]
pub struct BackfillClient {
    client: reqwest::Client,
}

impl BackfillClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        debug!(url = BACKFILL_URL, "BackfillClient initialised");
        Self { client }
    }

    #[instrument(skip(self), name = "backfill::candle_snapshot")]
    pub async fn candle_snapshot(
        &self,
        coin: &str,
        interval: &str,
        start_time_ms: i64,
        end_time_ms: i64,
    ) -> Result<Vec<RawCandle>> {
        let body = serde_json::json!({
            "type": "candleSnapshot",
            "req": {
                "coin": coin,
                "interval": interval,
                "startTime": start_time_ms,
                "endTime": end_time_ms,
            }
        });

        let resp = self
            .client
            .post(BACKFILL_URL)
            .json(&body)
            .send()
            .await
            .context("candleSnapshot request failed")?;

        let status = resp.status();
        if let Some(retry_after) = resp.headers().get("Retry-After") {
            warn!(?retry_after, "backfill endpoint requested Retry-After");
        }

        let value: Value = resp.json().await.context("failed to parse candleSnapshot response")?;

        if !status.is_success() {
            anyhow::bail!("candleSnapshot returned {}: {}", status, value);
        }

        parse_candles(&value)
    }
}

impl Default for BackfillClient {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_candles(value: &Value) -> Result<Vec<RawCandle>> {
    let array = if let Some(arr) = value.as_array() {
        arr
    } else if let Some(arr) = value.get("data").and_then(Value::as_array) {
        arr
    } else if let Some(arr) = value.get("candles").and_then(Value::as_array) {
        arr
    } else if let Some(arr) = value.get("snapshot").and_then(Value::as_array) {
        arr
    } else if let Some(arr) = value.get("result").and_then(Value::as_array) {
        arr
    } else {
        anyhow::bail!("candleSnapshot response had no recognizable candle array");
    };

    let mut candles = Vec::with_capacity(array.len());
    for entry in array {
        let ts_start = entry
            .get("t")
            .or_else(|| entry.get("ts_start"))
            .and_then(Value::as_i64)
            .context("candle missing timestamp field")?;
        let open = num_field(entry, &["o", "open"])?;
        let high = num_field(entry, &["h", "high"])?;
        let low = num_field(entry, &["l", "low"])?;
        let close = num_field(entry, &["c", "close"])?;
        candles.push(RawCandle {
            ts_start,
            open,
            high,
            low,
            close,
        });
    }
    Ok(candles)
}

fn num_field(entry: &Value, keys: &[&str]) -> Result<f64> {
    for key in keys {
        if let Some(v) = entry.get(*key) {
            if let Some(f) = v.as_f64() {
                return Ok(f);
            }
            if let Some(s) = v.as_str() {
                if let Ok(f) = s.parse::<f64>() {
                    return Ok(f);
                }
            }
        }
    }
    anyhow::bail!("candle missing numeric field among {:?}", keys)
}

/// Convenience free function mirroring the module's public surface, used by
/// callers that don't need to retain a `BackfillClient` across calls.
pub async fn fetch_candle_snapshot(
    coin: &str,
    interval: &str,
    start_time_ms: i64,
    end_time_ms: i64,
) -> Result<Vec<RawCandle>> {
    BackfillClient::new()
        .candle_snapshot(coin, interval, start_time_ms, end_time_ms)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_array() {
        let value = serde_json::json!([
            {"t": 1000, "o": "1.0", "h": "2.0", "l": "0.5", "c": "1.5"}
        ]);
        let candles = parse_candles(&value).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].ts_start, 1000);
        assert!((candles[0].close - 1.5).abs() < 1e-9);
    }

    #[test]
    fn parses_wrapped_in_data_key() {
        let value = serde_json::json!({
            "data": [{"t": 2000, "o": 1.0, "h": 2.0, "l": 0.5, "c": 1.5}]
        });
        let candles = parse_candles(&value).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].ts_start, 2000);
    }

    #[test]
    fn parses_wrapped_in_result_key() {
        let value = serde_json::json!({
            "result": [{"t": 3000, "o": 1.0, "h": 2.0, "l": 0.5, "c": 1.5}]
        });
        let candles = parse_candles(&value).unwrap();
        assert_eq!(candles[0].ts_start, 3000);
    }

    #[test]
    fn errors_on_unrecognized_shape() {
        let value = serde_json::json!({"unexpected": "shape"});
        assert!(parse_candles(&value).is_err());
    }

    #[test]
    fn errors_on_missing_numeric_field() {
        let value = serde_json::json!([{"t": 1000, "o": 1.0, "h": 2.0, "l": 0.5}]);
        assert!(parse_candles(&value).is_err());
    }
}
