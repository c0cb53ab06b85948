use secrecy::SecretString;
use std::time::Duration;

/// Connection settings for one vendor connector.
///
/// Built once at startup and handed to exactly one connector; never mutated.
/// Credentials are kept in [`SecretString`] so they never show up in `Debug`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: SecretString,
    pub api_secret: Option<SecretString>,
    pub base_url: String,
    pub requests_per_minute: u32,
    pub timeout: Duration,
    pub max_retries: u32,
    pub user_agent: String,
    /// Bars requested per page (vendor `limit`).
    pub page_limit: u32,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            api_secret: None,
            base_url: base_url.into(),
            requests_per_minute: 200,
            timeout: Duration::from_secs(30),
            max_retries: 5,
            user_agent: concat!("barvault/", env!("CARGO_PKG_VERSION")).to_string(),
            page_limit: 10_000,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.api_secret = Some(SecretString::from(secret.into()));
        self
    }

    pub fn with_requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = rpm;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.page_limit = page_limit;
        self
    }

    /// Base URL without a trailing slash, ready for path joining.
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}
