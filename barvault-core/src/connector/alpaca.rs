//! Alpaca Market Data v2 connector (historical stock bars).
//!
//! `GET {base}/v2/stocks/{symbol}/bars?timeframe=1Min&start=..&end=..&limit=..`
//! authenticated with the `APCA-API-KEY-ID` / `APCA-API-SECRET-KEY` headers.
//! Pages chain through `next_page_token` → `page_token`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::auth::{AuthStrategy, HeaderKeyAuth, QueryParams};
use super::config::ClientConfig;
use super::provider::{volume_from, ConnectorError, ProviderConnector, RawPage};
use crate::domain::{to_nanos, Bar, Timeframe, TimeframeUnit};

const BARS_PATH: &str = "/v2/stocks";

/// Corporate action adjustment applied by Alpaca.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Adjustment {
    #[default]
    Raw,
    Split,
    Dividend,
    All,
}

/// Source feed for stock data.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Feed {
    #[default]
    Sip,
    Iex,
    Otc,
}

impl Adjustment {
    fn as_str(self) -> &'static str {
        match self {
            Adjustment::Raw => "raw",
            Adjustment::Split => "split",
            Adjustment::Dividend => "dividend",
            Adjustment::All => "all",
        }
    }
}

impl Feed {
    fn as_str(self) -> &'static str {
        match self {
            Feed::Sip => "sip",
            Feed::Iex => "iex",
            Feed::Otc => "otc",
        }
    }
}

#[derive(Deserialize, Debug)]
struct AlpacaBar {
    #[serde(rename = "t")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "o")]
    open: f64,
    #[serde(rename = "h")]
    high: f64,
    #[serde(rename = "l")]
    low: f64,
    #[serde(rename = "c")]
    close: f64,
    #[serde(rename = "v")]
    volume: f64,
    #[serde(rename = "n")]
    trade_count: Option<u64>,
    #[serde(rename = "vw")]
    vwap: Option<f64>,
}

#[derive(Deserialize, Debug)]
struct AlpacaBarsResponse {
    bars: Option<Vec<AlpacaBar>>,
}

/// Cursor only; bar rows are ignored.
#[derive(Deserialize, Debug)]
struct AlpacaCursor {
    next_page_token: Option<String>,
}

pub struct AlpacaConnector {
    config: ClientConfig,
    auth: HeaderKeyAuth,
    adjustment: Adjustment,
    feed: Feed,
}

impl AlpacaConnector {
    /// Requires both the key id and the secret key.
    pub fn new(config: ClientConfig) -> Result<Self, ConnectorError> {
        let secret = config.api_secret.as_ref().ok_or_else(|| {
            ConnectorError::InvalidConfig("alpaca requires an API secret".into())
        })?;
        let auth = HeaderKeyAuth::new(&[
            ("apca-api-key-id", &config.api_key),
            ("apca-api-secret-key", secret),
        ])?;
        Ok(Self {
            config,
            auth,
            adjustment: Adjustment::default(),
            feed: Feed::default(),
        })
    }

    pub fn with_adjustment(mut self, adjustment: Adjustment) -> Self {
        self.adjustment = adjustment;
        self
    }

    pub fn with_feed(mut self, feed: Feed) -> Self {
        self.feed = feed;
        self
    }

    fn timeframe_param(&self, timeframe: Timeframe) -> Result<String, ConnectorError> {
        let n = timeframe.amount;
        let supported = match timeframe.unit {
            TimeframeUnit::Minute => (1..=59).contains(&n).then(|| format!("{n}Min")),
            TimeframeUnit::Hour => (1..=23).contains(&n).then(|| format!("{n}Hour")),
            TimeframeUnit::Day => (n == 1).then(|| "1Day".to_string()),
            TimeframeUnit::Week => (n == 1).then(|| "1Week".to_string()),
            TimeframeUnit::Month => {
                [1, 2, 3, 4, 6, 12].contains(&n).then(|| format!("{n}Month"))
            }
        };
        supported.ok_or(ConnectorError::UnsupportedTimeframe {
            provider: "alpaca",
            timeframe,
        })
    }
}

fn rfc3339_ms(ms: i64) -> Result<String, ConnectorError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| ConnectorError::InvalidConfig(format!("timestamp {ms}ms out of range")))
}

impl ProviderConnector for AlpacaConnector {
    fn name(&self) -> &'static str {
        "alpaca"
    }

    fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn auth(&self) -> &dyn AuthStrategy {
        &self.auth
    }

    fn endpoint(
        &self,
        symbol: &str,
        _timeframe: Timeframe,
        _start_ms: i64,
        _end_ms: i64,
        _cursor: Option<&str>,
    ) -> String {
        format!("{}{BARS_PATH}/{symbol}/bars", self.config.base())
    }

    fn build_request_params(
        &self,
        _symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
        cursor: Option<&str>,
    ) -> Result<QueryParams, ConnectorError> {
        let mut params = vec![
            ("timeframe".to_string(), self.timeframe_param(timeframe)?),
            ("start".to_string(), rfc3339_ms(start_ms)?),
            ("end".to_string(), rfc3339_ms(end_ms)?),
            ("limit".to_string(), self.config.page_limit.to_string()),
            ("adjustment".to_string(), self.adjustment.as_str().to_string()),
            ("feed".to_string(), self.feed.as_str().to_string()),
            ("sort".to_string(), "asc".to_string()),
        ];
        if let Some(token) = cursor {
            params.push(("page_token".to_string(), token.to_string()));
        }
        Ok(params)
    }

    fn parse_response(&self, symbol: &str, page: &RawPage) -> Result<Vec<Bar>, ConnectorError> {
        let response: AlpacaBarsResponse = serde_json::from_str(&page.body)
            .map_err(|e| ConnectorError::malformed(format!("alpaca bars for {symbol}"), e))?;

        response
            .bars
            .unwrap_or_default()
            .into_iter()
            .map(|ab| {
                Ok(Bar {
                    symbol: symbol.to_string(),
                    ts_ns: to_nanos(ab.timestamp),
                    open: ab.open,
                    high: ab.high,
                    low: ab.low,
                    close: ab.close,
                    volume: volume_from("alpaca", symbol, ab.volume)?,
                    trade_count: ab.trade_count,
                    vwap: ab.vwap,
                })
            })
            .collect()
    }

    fn next_cursor(&self, page: &RawPage) -> Result<Option<String>, ConnectorError> {
        let cursor: AlpacaCursor = serde_json::from_str(&page.body)
            .map_err(|e| ConnectorError::malformed("alpaca page token", e))?;
        Ok(cursor.next_page_token.filter(|t| !t.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    fn connector() -> AlpacaConnector {
        let config = ClientConfig::new("key", "https://data.alpaca.markets/")
            .with_secret("secret")
            .with_page_limit(500);
        AlpacaConnector::new(config).unwrap()
    }

    fn page(body: &str) -> RawPage {
        RawPage {
            status: StatusCode::OK,
            body: body.to_string(),
        }
    }

    #[test]
    fn requires_secret() {
        let config = ClientConfig::new("key", "https://data.alpaca.markets");
        assert!(matches!(
            AlpacaConnector::new(config),
            Err(ConnectorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn builds_first_and_next_page_params() {
        let c = connector();
        let params = c
            .build_request_params("AAPL", Timeframe::minutes(1), 1_705_312_200_000, 1_705_312_260_000, None)
            .unwrap();
        assert!(params.contains(&("timeframe".into(), "1Min".into())));
        assert!(params.contains(&("start".into(), "2024-01-15T09:50:00.000Z".into())));
        assert!(params.contains(&("limit".into(), "500".into())));
        assert!(!params.iter().any(|(k, _)| k == "page_token"));

        let next = c
            .build_request_params("AAPL", Timeframe::minutes(1), 0, 1, Some("tok"))
            .unwrap();
        assert!(next.contains(&("page_token".into(), "tok".into())));
    }

    #[test]
    fn endpoint_embeds_symbol() {
        let url = connector().endpoint("AAPL", Timeframe::daily(), 0, 0, None);
        assert_eq!(url, "https://data.alpaca.markets/v2/stocks/AAPL/bars");
    }

    #[test]
    fn rejects_unsupported_timeframe() {
        let err = connector()
            .build_request_params("AAPL", Timeframe::new(2, TimeframeUnit::Day), 0, 1, None)
            .unwrap_err();
        assert!(matches!(err, ConnectorError::UnsupportedTimeframe { .. }));
    }

    #[test]
    fn parses_bars_and_absent_fields() {
        let body = r#"{
            "bars": [
                {"t":"2024-01-15T09:50:00Z","o":185.0,"h":185.5,"l":184.8,"c":185.2,"v":12000,"n":140,"vw":185.1},
                {"t":"2024-01-15T09:51:00Z","o":185.2,"h":185.6,"l":185.0,"c":185.4,"v":9000}
            ],
            "symbol": "AAPL",
            "next_page_token": "abc"
        }"#;
        let c = connector();
        let bars = c.parse_response("AAPL", &page(body)).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].ts_ns, 1_705_312_200_000_000_000);
        assert_eq!(bars[0].trade_count, Some(140));
        assert_eq!(bars[1].trade_count, None);
        assert_eq!(bars[1].vwap, None);
        assert_eq!(c.next_cursor(&page(body)).unwrap(), Some("abc".into()));
    }

    #[test]
    fn null_bars_is_empty_page() {
        let body = r#"{"bars":null,"symbol":"AAPL","next_page_token":null}"#;
        let c = connector();
        assert!(c.parse_response("AAPL", &page(body)).unwrap().is_empty());
        assert_eq!(c.next_cursor(&page(body)).unwrap(), None);
    }

    #[test]
    fn malformed_json_is_not_retryable_error() {
        let err = connector()
            .parse_response("AAPL", &page("<html>oops</html>"))
            .unwrap_err();
        assert!(matches!(err, ConnectorError::MalformedResponse(_)));
    }
}
