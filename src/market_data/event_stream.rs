// =============================================================================
// Event Stream: Binance USD-M combined stream (aggTrade + partial depth)
// =============================================================================

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::error::RecorderError;
use crate::recorder::MarketRecorder;
use crate::types::{BookLevel, BookSnapshot, MarketEvent, TradeRecord};

/// Build the combined-stream URL carrying both the partial depth stream and
/// the aggregated trade stream for `symbol`.
pub fn combined_stream_url(base: &str, symbol: &str, depth: usize, speed_ms: u64) -> String {
    let lower = symbol.to_lowercase();
    format!(
        "{}/stream?streams={lower}@depth{depth}@{speed_ms}ms/{lower}@aggTrade",
        base.trim_end_matches('/')
    )
}

/// Connect to `url` and feed every parsed event into `recorder`.
///
/// Runs until the stream disconnects or an error occurs, then returns so that
/// the caller (main.rs) can handle reconnection.
pub async fn run_market_stream(url: &str, recorder: &Arc<MarketRecorder>) -> Result<()> {
    info!(url = %url, "connecting to market WebSocket");

    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to market WebSocket")?;

    info!(symbol = %recorder.symbol(), "market WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_market_event(&text) {
                        Ok(event) => recorder.handle_event(event),
                        Err(RecorderError::UnknownEventType(kind)) => {
                            debug!(event_type = %kind, "skipping unhandled message");
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse market message");
                        }
                    }
                }
            }
            Some(Err(e)) => {
                error!(symbol = %recorder.symbol(), error = %e, "market WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(symbol = %recorder.symbol(), "market WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Parse a Binance futures payload, raw or wrapped in the combined-stream
/// envelope `{ "stream": ..., "data": { ... } }`.
///
/// aggTrade shape:
/// ```json
/// { "e": "aggTrade", "E": 1729280821838, "s": "BNBUSDT", "p": "599.600", "q": "0.01", "m": false }
/// ```
///
/// depthUpdate shape:
/// ```json
/// { "e": "depthUpdate", "E": 1, "T": 1, "s": "BNBUSDT", "U": 1, "u": 2, "pu": 0,
///   "b": [["601.100", "56.37"]], "a": [["601.110", "4.74"]] }
/// ```
pub fn parse_market_event(text: &str) -> Result<MarketEvent, RecorderError> {
    let root: Value = serde_json::from_str(text)?;
    let payload = match root.get("data") {
        Some(data) if data.is_object() => data,
        _ => &root,
    };

    match payload["e"].as_str().unwrap_or_default() {
        "aggTrade" => parse_agg_trade(payload).map(MarketEvent::Trade),
        "depthUpdate" => parse_depth_update(payload).map(MarketEvent::BookUpdate),
        other => Err(RecorderError::UnknownEventType(other.to_string())),
    }
}

/// Price and quantity must be non-negative and their product must fit a
/// `Decimal`.
fn parse_agg_trade(v: &Value) -> Result<TradeRecord, RecorderError> {
    let price = field_non_negative(&v["p"], "p")?;
    let volume = field_non_negative(&v["q"], "q")?;
    if price.checked_mul(volume).is_none() {
        return Err(RecorderError::InvalidNumber {
            field: "q",
            value: volume.to_string(),
        });
    }

    Ok(TradeRecord::new(
        field_i64(v, "E")?,
        price,
        volume,
        // Buyer is maker => taker is selling.
        v["m"].as_bool().ok_or(RecorderError::MissingField("m"))?,
    ))
}

fn parse_depth_update(v: &Value) -> Result<BookSnapshot, RecorderError> {
    Ok(BookSnapshot {
        event_type: "depthUpdate".to_string(),
        event_time: field_i64(v, "E")?,
        transaction_time: field_i64(v, "T")?,
        symbol: v["s"]
            .as_str()
            .ok_or(RecorderError::MissingField("s"))?
            .to_string(),
        first_update_id: field_u64(v, "U")?,
        final_update_id: field_u64(v, "u")?,
        prev_final_update_id: field_u64(v, "pu")?,
        bids: parse_levels(&v["b"], "b")?,
        asks: parse_levels(&v["a"], "a")?,
    })
}

fn parse_levels(v: &Value, name: &'static str) -> Result<Vec<BookLevel>, RecorderError> {
    v.as_array()
        .ok_or(RecorderError::MissingField(name))?
        .iter()
        .map(|level| {
            Ok(BookLevel {
                price: field_decimal(&level[0], name)?,
                qty: field_decimal(&level[1], name)?,
            })
        })
        .collect()
}

fn field_i64(v: &Value, name: &'static str) -> Result<i64, RecorderError> {
    v[name].as_i64().ok_or(RecorderError::MissingField(name))
}

fn field_u64(v: &Value, name: &'static str) -> Result<u64, RecorderError> {
    v[name].as_u64().ok_or(RecorderError::MissingField(name))
}

/// Binance sends prices and quantities as JSON strings.
fn field_decimal(v: &Value, name: &'static str) -> Result<Decimal, RecorderError> {
    let s = v.as_str().ok_or(RecorderError::MissingField(name))?;
    Decimal::from_str(s).map_err(|_| RecorderError::InvalidNumber {
        field: name,
        value: s.to_string(),
    })
}

fn field_non_negative(v: &Value, name: &'static str) -> Result<Decimal, RecorderError> {
    let value = field_decimal(v, name)?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(RecorderError::InvalidNumber {
            field: name,
            value: value.to_string(),
        });
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const DEPTH_JSON: &str = r#"{
        "e":"depthUpdate",
        "E":1729270072134,
        "T":1729270072113,
        "s":"BNBUSDT",
        "U":5555693039345,
        "u":5555693045490,
        "pu":5555693030957,
        "b":[["601.100","56.37"],["601.090","27.26"]],
        "a":[["601.110","4.74"],["601.120","0.17"]]
    }"#;

    #[test]
    fn build_url_contains_streams() {
        let url = combined_stream_url("wss://fstream.binance.com/", "NEIROUSDT", 10, 100);
        assert_eq!(
            url,
            "wss://fstream.binance.com/stream?streams=neirousdt@depth10@100ms/neirousdt@aggTrade"
        );
    }

    #[test]
    fn parse_agg_trade_ok() {
        let json = r#"{
            "e":"aggTrade","E":1729280821838,"a":612250785,"s":"BNBUSDT",
            "p":"599.600","q":"0.01","f":1425511795,"l":1425511795,
            "T":1729280821684,"m":true
        }"#;
        let event = parse_market_event(json).expect("should parse");
        assert_eq!(
            event,
            MarketEvent::Trade(TradeRecord::new(1729280821838, dec!(599.600), dec!(0.01), true))
        );
    }

    #[test]
    fn parse_depth_update_ok() {
        let MarketEvent::BookUpdate(book) = parse_market_event(DEPTH_JSON).expect("should parse")
        else {
            panic!("expected book update");
        };
        assert_eq!(book.symbol, "BNBUSDT");
        assert_eq!(book.transaction_time, 1729270072113);
        assert_eq!(book.prev_final_update_id, 5555693030957);
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.asks[1].price, dec!(601.120));
        assert_eq!(book.asks[1].qty, dec!(0.17));
    }

    #[test]
    fn parse_combined_envelope() {
        let wrapped = format!(r#"{{"stream":"bnbusdt@depth10@100ms","data":{DEPTH_JSON}}}"#);
        let event = parse_market_event(&wrapped).expect("should parse");
        assert_eq!(event.timestamp(), 1729270072113);
        assert_eq!(event.to_string(), "depthUpdate");
    }

    #[test]
    fn unknown_event_type_is_classified() {
        let err = parse_market_event(r#"{"e":"markPriceUpdate","E":1}"#).unwrap_err();
        assert!(matches!(err, RecorderError::UnknownEventType(ref k) if k == "markPriceUpdate"));

        let ack = parse_market_event(r#"{"result":null,"id":1}"#).unwrap_err();
        assert!(matches!(ack, RecorderError::UnknownEventType(ref k) if k.is_empty()));
    }

    #[test]
    fn bad_price_is_rejected() {
        let json = r#"{"e":"aggTrade","E":1,"p":"abc","q":"1","m":false}"#;
        let err = parse_market_event(json).unwrap_err();
        assert!(matches!(err, RecorderError::InvalidNumber { field: "p", .. }));
    }

    #[test]
    fn overflowing_notional_is_rejected() {
        let json = r#"{"e":"aggTrade","E":1,"p":"79228162514264337593543950335","q":"2","m":false}"#;
        let err = parse_market_event(json).unwrap_err();
        assert!(matches!(err, RecorderError::InvalidNumber { field: "q", .. }));

        // The same price with a unit quantity still fits.
        let json = r#"{"e":"aggTrade","E":1,"p":"79228162514264337593543950335","q":"1","m":false}"#;
        assert!(parse_market_event(json).is_ok());
    }

    #[test]
    fn negative_quantity_is_rejected() {
        let json = r#"{"e":"aggTrade","E":1,"p":"1.5","q":"-3","m":true}"#;
        let err = parse_market_event(json).unwrap_err();
        assert!(matches!(err, RecorderError::InvalidNumber { field: "q", .. }));
    }
}
