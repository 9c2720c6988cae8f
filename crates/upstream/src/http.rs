//! reqwest-backed upstream transport
//!
//! Issues `GET <base_url><endpoint>?<params>` with the credential attached as
//! a per-request header. The shared `reqwest::Client` carries no default
//! credential; every request gets its own.

use reqwest::Url;
use reqwest::header::{HeaderName, HeaderValue, RETRY_AFTER};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::{CallFuture, Upstream, UpstreamError, UpstreamRequest, parse_retry_after};

/// HTTP upstream with a per-call credential header.
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
    credential_header: HeaderName,
    /// Optional scheme prefix, e.g. "Bearer" for `Authorization` headers
    credential_prefix: Option<String>,
    timeout: Duration,
}

impl HttpUpstream {
    /// Create a transport for `base_url`.
    ///
    /// Fails with a `Validation` error when the base URL is not http(s) or the
    /// header name is invalid.
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        credential_header: &str,
        timeout: Duration,
    ) -> crate::Result<Self> {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(UpstreamError::validation(format!(
                "base_url must start with http:// or https://, got: {base_url}"
            )));
        }
        Url::parse(base_url)
            .map_err(|e| UpstreamError::validation(format!("invalid base_url {base_url}: {e}")))?;
        let credential_header = HeaderName::from_str(credential_header).map_err(|e| {
            UpstreamError::validation(format!(
                "invalid credential header {credential_header}: {e}"
            ))
        })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential_header,
            credential_prefix: None,
            timeout,
        })
    }

    /// Prefix credentials with a scheme, e.g. `Authorization: Bearer <key>`.
    pub fn with_credential_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.credential_prefix = Some(prefix.into());
        self
    }

    /// Build the full request URL including the query string.
    pub fn url_for(&self, request: &UpstreamRequest) -> crate::Result<Url> {
        let endpoint = request.endpoint.trim_start_matches('/');
        let raw = format!("{}/{endpoint}", self.base_url);
        let mut url = Url::parse(&raw)
            .map_err(|e| UpstreamError::validation(format!("invalid endpoint {endpoint}: {e}")))?;
        if !request.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in request.params.iter() {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn credential_value(&self, credential: &str) -> crate::Result<HeaderValue> {
        let raw = match &self.credential_prefix {
            Some(prefix) => format!("{prefix} {credential}"),
            None => credential.to_string(),
        };
        let mut value = HeaderValue::from_str(&raw).map_err(|_| UpstreamError {
            kind: crate::ErrorKind::Auth,
            status: None,
            body: String::new(),
            message: "credential contains characters not allowed in a header".into(),
        })?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl Upstream for HttpUpstream {
    fn id(&self) -> &str {
        "http"
    }

    fn call<'a>(&'a self, request: &'a UpstreamRequest, credential: &'a str) -> CallFuture<'a> {
        Box::pin(async move {
            let url = self.url_for(request)?;
            let credential = self.credential_value(credential)?;

            let response = self
                .client
                .get(url)
                .header(self.credential_header.clone(), credential)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        UpstreamError::network(format!(
                            "upstream timeout after {}s",
                            self.timeout.as_secs()
                        ))
                    } else {
                        UpstreamError::network(format!("upstream request failed: {e}"))
                    }
                })?;

            let status = response.status();
            let retry_after = response.headers().get(RETRY_AFTER).and_then(parse_retry_after);
            let body = response
                .bytes()
                .await
                .map_err(|e| UpstreamError::network(format!("failed to read upstream body: {e}")))?;

            if !status.is_success() {
                let text = String::from_utf8_lossy(&body);
                debug!(status = status.as_u16(), endpoint = %request.endpoint, "upstream error response");
                return Err(UpstreamError::from_status(status.as_u16(), retry_after, &text));
            }

            serde_json::from_slice(&body).map_err(|e| {
                UpstreamError::invalid_body(
                    status.as_u16(),
                    format!("invalid JSON from upstream: {e}"),
                    &String::from_utf8_lossy(&body),
                )
            })
        })
    }
}
