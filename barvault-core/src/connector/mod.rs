//! Market data vendor connectors.

pub mod alpaca;
pub mod auth;
pub mod client;
pub mod config;
pub mod finnhub;
pub mod polygon;
pub mod provider;
pub mod rate_limiter;
pub mod retry;
pub mod transport;

pub use alpaca::{Adjustment, AlpacaConnector, Feed};
pub use auth::{AuthStrategy, HeaderKeyAuth, QueryParams, QueryTokenAuth};
pub use client::{ConnectorClient, PageStream};
pub use config::ClientConfig;
pub use finnhub::FinnhubConnector;
pub use polygon::PolygonConnector;
pub use provider::{
    build_connector, build_connector_with, default_is_retryable, ConnectorError, ProviderConnector,
    ProviderKind, RawPage, VendorOptions,
};
pub use rate_limiter::RateLimiter;
pub use retry::RetryPolicy;
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError, TransportErrorKind,
};
