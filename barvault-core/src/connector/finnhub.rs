//! Finnhub stock candles connector.
//!
//! Finnhub answers a whole range in one columnar response, so there is never
//! a second page.

use serde::Deserialize;

use super::auth::{AuthStrategy, QueryParams, QueryTokenAuth};
use super::config::ClientConfig;
use super::provider::{volume_from, ConnectorError, ProviderConnector, RawPage};
use crate::domain::{Bar, Timeframe, TimeframeUnit};

#[derive(Deserialize, Debug)]
struct CandleResponse {
    #[serde(rename = "s")]
    status: Option<String>,
    error: Option<String>,
    #[serde(rename = "t", default)]
    ts_secs: Vec<i64>,
    #[serde(rename = "o", default)]
    open: Vec<f64>,
    #[serde(rename = "h", default)]
    high: Vec<f64>,
    #[serde(rename = "l", default)]
    low: Vec<f64>,
    #[serde(rename = "c", default)]
    close: Vec<f64>,
    #[serde(rename = "v", default)]
    volume: Vec<f64>,
}

pub struct FinnhubConnector {
    config: ClientConfig,
    auth: QueryTokenAuth,
}

impl FinnhubConnector {
    pub fn new(config: ClientConfig) -> Self {
        let auth = QueryTokenAuth::new("token", config.api_key.clone());
        Self { config, auth }
    }

    fn resolution(timeframe: Timeframe) -> Result<&'static str, ConnectorError> {
        let res = match (timeframe.unit, timeframe.amount) {
            (TimeframeUnit::Minute, 1) => Some("1"),
            (TimeframeUnit::Minute, 5) => Some("5"),
            (TimeframeUnit::Minute, 15) => Some("15"),
            (TimeframeUnit::Minute, 30) => Some("30"),
            (TimeframeUnit::Minute, 60) | (TimeframeUnit::Hour, 1) => Some("60"),
            (TimeframeUnit::Day, 1) => Some("D"),
            (TimeframeUnit::Week, 1) => Some("W"),
            (TimeframeUnit::Month, 1) => Some("M"),
            _ => None,
        };
        res.ok_or(ConnectorError::UnsupportedTimeframe {
            provider: "finnhub",
            timeframe,
        })
    }
}

impl ProviderConnector for FinnhubConnector {
    fn name(&self) -> &'static str {
        "finnhub"
    }

    fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn auth(&self) -> &dyn AuthStrategy {
        &self.auth
    }

    fn endpoint(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        _start_ms: i64,
        _end_ms: i64,
        _cursor: Option<&str>,
    ) -> String {
        format!("{}/api/v1/stock/candle", self.config.base())
    }

    fn build_request_params(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
        _cursor: Option<&str>,
    ) -> Result<QueryParams, ConnectorError> {
        let from = start_ms.div_euclid(1000);
        let to = end_ms.div_euclid(1000) + i64::from(end_ms.rem_euclid(1000) != 0);
        Ok(vec![
            ("symbol".to_string(), symbol.to_string()),
            ("resolution".to_string(), Self::resolution(timeframe)?.to_string()),
            ("from".to_string(), from.to_string()),
            ("to".to_string(), to.to_string()),
        ])
    }

    fn parse_response(&self, symbol: &str, page: &RawPage) -> Result<Vec<Bar>, ConnectorError> {
        let candles: CandleResponse = serde_json::from_str(&page.body)
            .map_err(|e| ConnectorError::malformed(format!("finnhub candles for {symbol}"), e))?;

        if let Some(message) = candles.error {
            return Err(ConnectorError::Vendor {
                status: page.status.as_u16(),
                message,
            });
        }
        match candles.status.as_deref() {
            Some("no_data") => return Ok(Vec::new()),
            Some("ok") => {}
            other => {
                return Err(ConnectorError::MalformedResponse(format!(
                    "finnhub status {other:?} for {symbol}"
                )))
            }
        }

        let n = candles.ts_secs.len();
        let lengths = [
            candles.open.len(),
            candles.high.len(),
            candles.low.len(),
            candles.close.len(),
            candles.volume.len(),
        ];
        if lengths.iter().any(|&len| len != n) {
            return Err(ConnectorError::MalformedResponse(format!(
                "finnhub column lengths differ for {symbol}: t={n}, o/h/l/c/v={lengths:?}"
            )));
        }

        (0..n)
            .map(|i| {
                let ts_ns = candles.ts_secs[i].checked_mul(1_000_000_000).ok_or_else(|| {
                    ConnectorError::MalformedResponse(format!(
                        "finnhub timestamp {} out of range",
                        candles.ts_secs[i]
                    ))
                })?;
                Ok(Bar {
                    symbol: symbol.to_string(),
                    ts_ns,
                    open: candles.open[i],
                    high: candles.high[i],
                    low: candles.low[i],
                    close: candles.close[i],
                    volume: volume_from("finnhub", symbol, candles.volume[i])?,
                    trade_count: None,
                    vwap: None,
                })
            })
            .collect()
    }

    fn next_cursor(&self, _page: &RawPage) -> Result<Option<String>, ConnectorError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    fn connector() -> FinnhubConnector {
        FinnhubConnector::new(ClientConfig::new("tok", "https://finnhub.io"))
    }

    fn page(body: &str) -> RawPage {
        RawPage {
            status: StatusCode::OK,
            body: body.to_string(),
        }
    }

    #[test]
    fn params_use_seconds_and_resolution() {
        let params = connector()
            .build_request_params("AAPL", Timeframe::minutes(15), 1_705_312_200_000, 1_705_312_260_500, None)
            .unwrap();
        assert!(params.contains(&("resolution".into(), "15".into())));
        assert!(params.contains(&("from".into(), "1705312200".into())));
        assert!(params.contains(&("to".into(), "1705312261".into())));
    }

    #[test]
    fn unsupported_resolution() {
        let err = connector()
            .build_request_params("AAPL", Timeframe::minutes(2), 0, 1, None)
            .unwrap_err();
        assert!(matches!(err, ConnectorError::UnsupportedTimeframe { .. }));
    }

    #[test]
    fn parses_columnar_candles() {
        let body = r#"{"c":[185.2,185.4],"h":[185.5,185.6],"l":[184.8,185.0],"o":[185.0,185.2],"s":"ok","t":[1705312200,1705312260],"v":[12000,9000]}"#;
        let bars = connector().parse_response("AAPL", &page(body)).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].ts_ns, 1_705_312_260_000_000_000);
        assert_eq!(bars[1].volume, 9000);
        assert_eq!(bars[0].vwap, None);
    }

    #[test]
    fn no_data_is_empty() {
        let bars = connector().parse_response("AAPL", &page(r#"{"s":"no_data"}"#)).unwrap();
        assert!(bars.is_empty());
    }

    #[test]
    fn ragged_columns_are_malformed() {
        let body = r#"{"c":[1.0],"h":[1.0],"l":[1.0],"o":[1.0,2.0],"s":"ok","t":[1],"v":[1]}"#;
        let err = connector().parse_response("AAPL", &page(body)).unwrap_err();
        assert!(matches!(err, ConnectorError::MalformedResponse(_)));
    }

    #[test]
    fn never_paginates() {
        let body = r#"{"s":"no_data"}"#;
        assert_eq!(connector().next_cursor(&page(body)).unwrap(), None);
    }
}
