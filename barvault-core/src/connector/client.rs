//! Vendor-independent driver: pagination, rate limiting and retries.

use futures::stream::{self, Stream, TryStreamExt};
use reqwest::header::HeaderMap;
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

use super::config::ClientConfig;
use super::provider::{
    build_connector_with, ConnectorError, ProviderConnector, ProviderKind, RawPage, VendorOptions,
};
use super::rate_limiter::RateLimiter;
use super::retry::RetryPolicy;
use super::transport::{HttpRequest, HttpTransport, ReqwestTransport};
use crate::domain::{sort_dedup_keep_last, Bar, Timeframe, TimeWindow};

/// Longest vendor body excerpt carried in an error message.
const BODY_SNIPPET: usize = 256;

/// Stream of parsed pages, in vendor order.
pub type PageStream<'a> = Pin<Box<dyn Stream<Item = Result<Vec<Bar>, ConnectorError>> + Send + 'a>>;

enum PageState {
    Start,
    Next(String),
    Done,
}

/// Drives one [`ProviderConnector`] over an [`HttpTransport`].
///
/// Cheap to share behind an `Arc`: every caller goes through the same
/// rate limiter, so concurrent symbols stay within the vendor budget.
pub struct ConnectorClient {
    connector: Arc<dyn ProviderConnector>,
    transport: Arc<dyn HttpTransport>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl ConnectorClient {
    pub fn new(connector: Arc<dyn ProviderConnector>, transport: Arc<dyn HttpTransport>) -> Self {
        let config = connector.config();
        let limiter = Arc::new(RateLimiter::per_minute(config.requests_per_minute));
        let retry = RetryPolicy::new(config.max_retries);
        Self {
            connector,
            transport,
            limiter,
            retry,
        }
    }

    /// Production client for `kind` over reqwest.
    pub fn for_provider(kind: ProviderKind, config: ClientConfig) -> Result<Self, ConnectorError> {
        Self::for_provider_with(kind, config, &VendorOptions::default())
    }

    pub fn for_provider_with(
        kind: ProviderKind,
        config: ClientConfig,
        options: &VendorOptions,
    ) -> Result<Self, ConnectorError> {
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        let connector = build_connector_with(kind, config, options)?;
        Ok(Self::new(connector, transport))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.connector.name()
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Lazily fetch every page for `symbol` in `[start_ms, end_ms]`.
    ///
    /// Ends after the first page without a cursor. A vendor that hands back a
    /// cursor it already issued is reported as malformed instead of looping.
    pub fn paginate<'a>(
        &'a self,
        symbol: &'a str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> PageStream<'a> {
        let initial = (PageState::Start, HashSet::<String>::new());
        Box::pin(stream::try_unfold(initial, move |(state, mut seen)| async move {
            let cursor = match state {
                PageState::Done => return Ok(None),
                PageState::Start => None,
                PageState::Next(cursor) => Some(cursor),
            };

            let page = self
                .fetch_page(symbol, timeframe, start_ms, end_ms, cursor.as_deref())
                .await?;
            let bars = self.connector.parse_response(symbol, &page)?;
            let next = match self.connector.next_cursor(&page)? {
                Some(next) => {
                    if !seen.insert(next.clone()) {
                        return Err(ConnectorError::MalformedResponse(format!(
                            "{} repeated pagination cursor for {symbol}",
                            self.connector.name()
                        )));
                    }
                    PageState::Next(next)
                }
                None => PageState::Done,
            };
            debug!(
                provider = self.connector.name(),
                symbol,
                bars = bars.len(),
                more = matches!(next, PageState::Next(_)),
                "fetched page"
            );
            Ok(Some((bars, (next, seen))))
        }))
    }

    /// All bars for `symbol` inside `window`, ascending and unique by timestamp.
    ///
    /// When pages overlap the later page wins for a repeated timestamp.
    pub async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: TimeWindow,
    ) -> Result<Vec<Bar>, ConnectorError> {
        let pages: Vec<Vec<Bar>> = self
            .paginate(symbol, timeframe, window.start_ms(), window.end_ms())
            .try_collect()
            .await?;

        let bars: Vec<Bar> = pages
            .into_iter()
            .flatten()
            .filter(|bar| window.contains(bar.ts_ns))
            .collect();
        Ok(sort_dedup_keep_last(bars))
    }

    /// One page, retried on throttling, 5xx and network failures.
    async fn fetch_page(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
        cursor: Option<&str>,
    ) -> Result<RawPage, ConnectorError> {
        let url = self
            .connector
            .endpoint(symbol, timeframe, start_ms, end_ms, cursor);
        let mut query = self
            .connector
            .build_request_params(symbol, timeframe, start_ms, end_ms, cursor)?;
        let mut headers = HeaderMap::new();
        self.connector.auth().apply(&mut headers, &mut query);
        let request = HttpRequest {
            url,
            headers,
            query,
        };

        let attempts = self.retry.max_retries.saturating_add(1);
        let mut last = String::new();
        for attempt in 0..attempts {
            self.limiter.acquire_async().await;

            let retry_after = match self.transport.get(&request).await {
                Ok(response) if response.status.is_success() => {
                    return Ok(RawPage {
                        status: response.status,
                        body: response.body,
                    });
                }
                Ok(response) => {
                    let message = snippet(&response.body);
                    if !self.connector.is_retryable(response.status, &response.body) {
                        return Err(ConnectorError::Vendor {
                            status: response.status.as_u16(),
                            message,
                        });
                    }
                    last = format!("HTTP {}: {message}", response.status.as_u16());
                    response.retry_after
                }
                Err(e) if e.is_retryable() => {
                    last = e.to_string();
                    None
                }
                Err(e) => return Err(e.into()),
            };

            if attempt + 1 < attempts {
                let delay = self.retry.delay_for(attempt, retry_after);
                warn!(
                    provider = self.connector.name(),
                    symbol,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %last,
                    "request failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(ConnectorError::Exhausted { attempts, last })
    }
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_SNIPPET) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
