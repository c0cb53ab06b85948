//! Vendor connector contract and structured error types.
//!
//! A [`ProviderConnector`] knows one vendor's URLs, query parameters, JSON
//! shapes and cursor format. It does no I/O: the [`ConnectorClient`] drives
//! pagination, rate limiting and retries for every vendor the same way.
//!
//! [`ConnectorClient`]: super::client::ConnectorClient

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use super::alpaca::{Adjustment, AlpacaConnector, Feed};
use super::auth::{AuthStrategy, QueryParams};
use super::config::ClientConfig;
use super::transport::TransportError;
use super::{finnhub::FinnhubConnector, polygon::PolygonConnector};
use crate::domain::{Bar, Timeframe};

/// Errors surfaced by connectors. Only `Exhausted` follows retries.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("vendor error (HTTP {status}): {message}")]
    Vendor { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("timeframe {timeframe} is not supported by {provider}")]
    UnsupportedTimeframe {
        provider: &'static str,
        timeframe: Timeframe,
    },

    #[error("invalid connector configuration: {0}")]
    InvalidConfig(String),
}

impl ConnectorError {
    pub fn malformed(context: impl fmt::Display, err: impl fmt::Display) -> Self {
        Self::MalformedResponse(format!("{context}: {err}"))
    }
}

/// Vendors report volume as a JSON number that may carry a fraction.
pub(crate) fn volume_from(vendor: &str, symbol: &str, volume: f64) -> Result<u64, ConnectorError> {
    if !volume.is_finite() || volume < 0.0 {
        return Err(ConnectorError::MalformedResponse(format!(
            "{vendor} volume {volume} for {symbol}"
        )));
    }
    Ok(volume.round() as u64)
}

/// One successful vendor response page, still in vendor format.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub status: StatusCode,
    pub body: String,
}

/// The per-vendor adapter contract.
pub trait ProviderConnector: Send + Sync {
    /// Stable vendor key (matches [`ProviderKind`]'s serde name).
    fn name(&self) -> &'static str;

    fn config(&self) -> &ClientConfig;

    fn auth(&self) -> &dyn AuthStrategy;

    /// URL for the page request. Vendors whose cursor is a full URL return it here.
    fn endpoint(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
        cursor: Option<&str>,
    ) -> String;

    /// Vendor query parameters for one page request; pure.
    fn build_request_params(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
        cursor: Option<&str>,
    ) -> Result<QueryParams, ConnectorError>;

    /// Translate one page into canonical bars.
    fn parse_response(&self, symbol: &str, page: &RawPage) -> Result<Vec<Bar>, ConnectorError>;

    /// Cursor for the following page, `None` when pagination is done.
    fn next_cursor(&self, page: &RawPage) -> Result<Option<String>, ConnectorError>;

    /// Whether a non-success response should be retried.
    fn is_retryable(&self, status: StatusCode, body: &str) -> bool {
        default_is_retryable(status, body)
    }
}

/// 429, any 5xx, and 403s whose body says the caller is being throttled.
pub fn default_is_retryable(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return true;
    }
    if status == StatusCode::FORBIDDEN {
        let lowered = body.to_ascii_lowercase();
        return ["rate limit", "too many requests", "throttl", "quota"]
            .iter()
            .any(|needle| lowered.contains(needle));
    }
    false
}

/// Which vendor implementation a configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Alpaca,
    Polygon,
    Finnhub,
}

impl ProviderKind {
    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::Alpaca => "https://data.alpaca.markets",
            ProviderKind::Polygon => "https://api.polygon.io",
            ProviderKind::Finnhub => "https://finnhub.io",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Alpaca => "alpaca",
            ProviderKind::Polygon => "polygon",
            ProviderKind::Finnhub => "finnhub",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alpaca" => Ok(ProviderKind::Alpaca),
            "polygon" => Ok(ProviderKind::Polygon),
            "finnhub" => Ok(ProviderKind::Finnhub),
            other => Err(ConnectorError::InvalidConfig(format!(
                "unknown provider '{other}' (expected alpaca, polygon or finnhub)"
            ))),
        }
    }
}

/// Vendor-specific query options. Unset fields keep the connector default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorOptions {
    /// Alpaca source feed (`sip`, `iex`, `otc`).
    #[serde(default)]
    pub feed: Option<Feed>,
    /// Alpaca corporate action adjustment.
    #[serde(default)]
    pub adjustment: Option<Adjustment>,
    /// Polygon split adjustment.
    #[serde(default)]
    pub adjusted: Option<bool>,
}

impl VendorOptions {
    /// Options `kind` does not understand are a configuration error, not a no-op.
    pub fn check(&self, kind: ProviderKind) -> Result<(), ConnectorError> {
        let unsupported = |option: &str| -> Result<(), ConnectorError> {
            Err(ConnectorError::InvalidConfig(format!(
                "option '{option}' is not supported by {kind}"
            )))
        };
        if kind != ProviderKind::Alpaca {
            if self.feed.is_some() {
                return unsupported("feed");
            }
            if self.adjustment.is_some() {
                return unsupported("adjustment");
            }
        }
        if kind != ProviderKind::Polygon && self.adjusted.is_some() {
            return unsupported("adjusted");
        }
        Ok(())
    }
}

/// Build the connector selected by `kind`, taking ownership of its config.
pub fn build_connector(
    kind: ProviderKind,
    config: ClientConfig,
) -> Result<Arc<dyn ProviderConnector>, ConnectorError> {
    build_connector_with(kind, config, &VendorOptions::default())
}

/// [`build_connector`] with vendor query options applied.
pub fn build_connector_with(
    kind: ProviderKind,
    config: ClientConfig,
    options: &VendorOptions,
) -> Result<Arc<dyn ProviderConnector>, ConnectorError> {
    options.check(kind)?;
    Ok(match kind {
        ProviderKind::Alpaca => {
            let mut connector = AlpacaConnector::new(config)?;
            if let Some(feed) = options.feed {
                connector = connector.with_feed(feed);
            }
            if let Some(adjustment) = options.adjustment {
                connector = connector.with_adjustment(adjustment);
            }
            Arc::new(connector)
        }
        ProviderKind::Polygon => {
            let mut connector = PolygonConnector::new(config);
            if let Some(adjusted) = options.adjusted {
                connector = connector.with_adjusted(adjusted);
            }
            Arc::new(connector)
        }
        ProviderKind::Finnhub => Arc::new(FinnhubConnector::new(config)),
    })
}
