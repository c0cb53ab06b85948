//! Polygon.io aggregates connector.
//!
//! First page: `GET {base}/v2/aggs/ticker/{sym}/range/{mult}/{span}/{from_ms}/{to_ms}`.
//! Later pages follow the absolute `next_url` the vendor returns, which already
//! carries every query parameter except the `apiKey`.

use serde::Deserialize;

use super::auth::{AuthStrategy, QueryParams, QueryTokenAuth};
use super::config::ClientConfig;
use super::provider::{volume_from, ConnectorError, ProviderConnector, RawPage};
use crate::domain::{Bar, Timeframe, TimeframeUnit};

const NANOS_PER_MILLI: i64 = 1_000_000;

#[derive(Deserialize, Debug)]
struct PolygonAgg {
    #[serde(rename = "t")]
    ts_ms: i64,
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
struct PolygonAggsResponse {
    status: Option<String>,
    error: Option<String>,
    #[serde(default)]
    results: Option<Vec<PolygonAgg>>,
    next_url: Option<String>,
}

pub struct PolygonConnector {
    config: ClientConfig,
    auth: QueryTokenAuth,
    adjusted: bool,
}

impl PolygonConnector {
    pub fn new(config: ClientConfig) -> Self {
        let auth = QueryTokenAuth::new("apiKey", config.api_key.clone());
        Self {
            config,
            auth,
            adjusted: false,
        }
    }

    pub fn with_adjusted(mut self, adjusted: bool) -> Self {
        self.adjusted = adjusted;
        self
    }

    fn timespan(timeframe: Timeframe) -> &'static str {
        match timeframe.unit {
            TimeframeUnit::Minute => "minute",
            TimeframeUnit::Hour => "hour",
            TimeframeUnit::Day => "day",
            TimeframeUnit::Week => "week",
            TimeframeUnit::Month => "month",
        }
    }

    fn parse_body(&self, page: &RawPage) -> Result<PolygonAggsResponse, ConnectorError> {
        let response: PolygonAggsResponse = serde_json::from_str(&page.body)
            .map_err(|e| ConnectorError::malformed("polygon aggregates", e))?;
        if response.status.as_deref() == Some("ERROR") {
            return Err(ConnectorError::Vendor {
                status: page.status.as_u16(),
                message: response
                    .error
                    .unwrap_or_else(|| "polygon reported status ERROR".to_string()),
            });
        }
        Ok(response)
    }
}

impl ProviderConnector for PolygonConnector {
    fn name(&self) -> &'static str {
        "polygon"
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
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
        cursor: Option<&str>,
    ) -> String {
        if let Some(next_url) = cursor {
            return next_url.to_string();
        }
        format!(
            "{}/v2/aggs/ticker/{symbol}/range/{}/{}/{start_ms}/{end_ms}",
            self.config.base(),
            timeframe.amount,
            Self::timespan(timeframe),
        )
    }

    fn build_request_params(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        _start_ms: i64,
        _end_ms: i64,
        cursor: Option<&str>,
    ) -> Result<QueryParams, ConnectorError> {
        if cursor.is_some() {
            return Ok(Vec::new());
        }
        Ok(vec![
            ("adjusted".to_string(), self.adjusted.to_string()),
            ("sort".to_string(), "asc".to_string()),
            ("limit".to_string(), self.config.page_limit.to_string()),
        ])
    }

    fn parse_response(&self, symbol: &str, page: &RawPage) -> Result<Vec<Bar>, ConnectorError> {
        self.parse_body(page)?
            .results
            .unwrap_or_default()
            .into_iter()
            .map(|agg| {
                let ts_ns = agg.ts_ms.checked_mul(NANOS_PER_MILLI).ok_or_else(|| {
                    ConnectorError::MalformedResponse(format!(
                        "polygon timestamp {} out of range",
                        agg.ts_ms
                    ))
                })?;
                Ok(Bar {
                    symbol: symbol.to_string(),
                    ts_ns,
                    open: agg.open,
                    high: agg.high,
                    low: agg.low,
                    close: agg.close,
                    volume: volume_from("polygon", symbol, agg.volume)?,
                    trade_count: agg.trade_count,
                    vwap: agg.vwap,
                })
            })
            .collect()
    }

    fn next_cursor(&self, page: &RawPage) -> Result<Option<String>, ConnectorError> {
        Ok(self.parse_body(page)?.next_url.filter(|u| !u.is_empty()))
    }
}
