//! Credential injection for outbound vendor requests.
//!
//! An [`AuthStrategy`] only touches the request being built (headers and
//! query parameters); it holds no mutable state and reads nothing global.

use super::ConnectorError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};

/// Query parameters of an outbound request, in send order.
pub type QueryParams = Vec<(String, String)>;

pub trait AuthStrategy: Send + Sync {
    /// Add credentials to the outgoing request.
    fn apply(&self, headers: &mut HeaderMap, params: &mut QueryParams);
}

/// Credentials sent as one or more request headers (e.g. Alpaca key + secret).
#[derive(Debug, Clone)]
pub struct HeaderKeyAuth {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl HeaderKeyAuth {
    pub fn new(pairs: &[(&'static str, &SecretString)]) -> Result<Self, ConnectorError> {
        let mut headers = Vec::with_capacity(pairs.len());
        for (name, secret) in pairs {
            let mut value = HeaderValue::from_str(secret.expose_secret()).map_err(|e| {
                ConnectorError::InvalidConfig(format!("credential for header {name}: {e}"))
            })?;
            value.set_sensitive(true);
            headers.push((HeaderName::from_static(name), value));
        }
        Ok(Self { headers })
    }
}

impl AuthStrategy for HeaderKeyAuth {
    fn apply(&self, headers: &mut HeaderMap, _params: &mut QueryParams) {
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
    }
}

/// Credential sent as a query parameter (e.g. Polygon `apiKey`, Finnhub `token`).
#[derive(Debug, Clone)]
pub struct QueryTokenAuth {
    param: &'static str,
    token: SecretString,
}

impl QueryTokenAuth {
    pub fn new(param: &'static str, token: SecretString) -> Self {
        Self { param, token }
    }
}

impl AuthStrategy for QueryTokenAuth {
    fn apply(&self, _headers: &mut HeaderMap, params: &mut QueryParams) {
        params.retain(|(k, _)| k != self.param);
        params.push((self.param.to_string(), self.token.expose_secret().to_string()));
    }
}
