//! # HTTP Transport
//!
//! One configured blocking client per provider: auth header injection,
//! proxy and TLS options, a fixed redirect cap, and a sleep-then-retry
//! policy that absorbs HTTP 429 (primary and secondary rate limits) and
//! transient 5xx responses. Rate-limit headers from every response feed the
//! shared [`RateLimitState`] consulted by the status channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

pub const USER_AGENT: &str = concat!("leakhound/", env!("CARGO_PKG_VERSION"));

const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid transport option: {0}")]
    Options(String),
    #[error("response decode error: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }
}

/// Authentication scheme injected into every request.
#[derive(Debug, Clone)]
pub enum Auth {
    None,
    /// `Authorization: Bearer <token>` (GitHub).
    Bearer(String),
    /// `Authorization: token <token>` (Gitea).
    Token(String),
    /// `Private-Token: <token>` (GitLab).
    PrivateToken(String),
    /// HTTP basic (BitBucket app passwords, Azure DevOps PATs).
    Basic { user: String, secret: String },
}

/// Sleep-then-retry policy applied by the transport middleware.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Added on top of the advertised reset time to survive clock skew.
    pub reset_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(120),
            reset_jitter: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for responses that carry no reset hint.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub auth: Auth,
    pub proxy: Option<String>,
    pub insecure: bool,
    pub cookie: Option<String>,
    /// Overall request timeout. `None` keeps requests unbounded so that
    /// rate-limit sleeps longer than any timeout still work.
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            auth: Auth::None,
            proxy: None,
            insecure: false,
            cookie: None,
            timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Last-seen rate-limit budget, shared with the status channel.
#[derive(Debug, Clone, Default)]
pub struct RateLimitState {
    pub remaining_core: Option<i64>,
    pub remaining_search: Option<i64>,
    pub reset_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Lower-cased snapshot of response headers.
#[derive(Debug, Clone, Default)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let mut out = HashMap::new();
        for (name, value) in pairs {
            out.insert(name.to_ascii_lowercase(), value.to_string());
        }
        Self(out)
    }

    fn from_reqwest(map: &reqwest::header::HeaderMap) -> Self {
        let mut out = HashMap::new();
        for (name, value) in map.iter() {
            if let Ok(v) = value.to_str() {
                out.insert(name.as_str().to_ascii_lowercase(), v.to_string());
            }
        }
        Self(out)
    }
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

pub struct HttpTransport {
    client: reqwest::blocking::Client,
    auth: Auth,
    cookie: Option<String>,
    retry: RetryPolicy,
    rate_limit: Arc<Mutex<RateLimitState>>,
}

impl HttpTransport {
    pub fn new(opts: TransportOptions) -> Result<Self, TransportError> {
        let mut builder = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(opts.timeout);
        if let Some(proxy) = &opts.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| TransportError::Options(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        if opts.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            auth: opts.auth,
            cookie: opts.cookie,
            retry: opts.retry,
            rate_limit: Arc::new(Mutex::new(RateLimitState::default())),
        })
    }

    /// Handle to the shared rate-limit snapshot.
    pub fn rate_limit(&self) -> Arc<Mutex<RateLimitState>> {
        Arc::clone(&self.rate_limit)
    }

    /// GET returning the response when the status is 2xx, an error
    /// otherwise. Rate limits and 5xx are retried before surfacing.
    pub fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.get_with(url, &[])
    }

    pub fn get_with(
        &self,
        url: &str,
        extra_headers: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        let resp = self.execute(url, extra_headers)?;
        if (200..300).contains(&resp.status) {
            Ok(resp)
        } else {
            Err(TransportError::Status {
                status: resp.status,
                url: url.to_string(),
            })
        }
    }

    pub fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<(T, Headers), TransportError> {
        let resp = self.get(url)?;
        let body = resp.json()?;
        Ok((body, resp.headers))
    }

    fn execute(
        &self,
        url: &str,
        extra_headers: &[(&str, &str)],
    ) -> Result<HttpResponse, TransportError> {
        let mut attempt = 1u32;
        loop {
            let mut req = self.client.get(url);
            req = match &self.auth {
                Auth::None => req,
                Auth::Bearer(token) => req.header("Authorization", format!("Bearer {token}")),
                Auth::Token(token) => req.header("Authorization", format!("token {token}")),
                Auth::PrivateToken(token) => req.header("Private-Token", token.as_str()),
                Auth::Basic { user, secret } => req.basic_auth(user, Some(secret)),
            };
            if let Some(cookie) = &self.cookie {
                req = req.header("Cookie", cookie.as_str());
            }
            for (name, value) in extra_headers {
                req = req.header(*name, *value);
            }

            let resp = match req.send() {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt < self.retry.max_attempts {
                        let delay = self.retry.backoff(attempt);
                        debug!("request error for {url}: {err}; retrying in {delay:?}");
                        std::thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return Err(err.into());
                }
            };

            let status = resp.status().as_u16();
            let headers = Headers::from_reqwest(resp.headers());
            self.record_rate_limit(&headers);

            if is_rate_limited(status, &headers) {
                if attempt >= self.retry.max_attempts {
                    return Err(TransportError::Status {
                        status,
                        url: url.to_string(),
                    });
                }
                let delay = self.rate_limit_delay(&headers, attempt);
                warn!(
                    "rate limited ({status}) on {url}; sleeping {}s before retry {attempt}",
                    delay.as_secs()
                );
                std::thread::sleep(delay);
                attempt += 1;
                continue;
            }

            if (500..600).contains(&status) && attempt < self.retry.max_attempts {
                let delay = self.retry.backoff(attempt);
                debug!("server error {status} on {url}; retrying in {delay:?}");
                std::thread::sleep(delay);
                attempt += 1;
                continue;
            }

            let body = resp.bytes()?.to_vec();
            return Ok(HttpResponse {
                status,
                headers,
                body,
            });
        }
    }

    /// Sleep until the advertised reset plus jitter, falling back to
    /// `Retry-After` seconds, then to plain backoff.
    fn rate_limit_delay(&self, headers: &Headers, attempt: u32) -> Duration {
        if let Some(reset) = parse_reset_epoch(headers) {
            let now = Utc::now();
            let until = (reset - now).to_std().unwrap_or(Duration::ZERO);
            return until + self.retry.reset_jitter;
        }
        if let Some(secs) = headers.get("retry-after").and_then(|v| v.parse::<u64>().ok()) {
            return Duration::from_secs(secs) + self.retry.reset_jitter;
        }
        self.retry.backoff(attempt)
    }

    fn record_rate_limit(&self, headers: &Headers) {
        let remaining = remaining_header(headers);
        let reset = parse_reset_epoch(headers);
        if remaining.is_none() && reset.is_none() {
            return;
        }
        if let Ok(mut state) = self.rate_limit.lock() {
            if headers.get("x-ratelimit-resource") == Some("search") {
                state.remaining_search = remaining.or(state.remaining_search);
            } else if remaining.is_some() {
                state.remaining_core = remaining;
            }
            if reset.is_some() {
                state.reset_at = reset;
            }
            state.last_seen = Some(Utc::now());
        }
    }
}

fn remaining_header(headers: &Headers) -> Option<i64> {
    headers
        .get("x-ratelimit-remaining")
        .or_else(|| headers.get("ratelimit-remaining"))
        .and_then(|v| v.parse().ok())
}

fn parse_reset_epoch(headers: &Headers) -> Option<DateTime<Utc>> {
    let raw = headers
        .get("x-ratelimit-reset")
        .or_else(|| headers.get("ratelimit-reset"))?;
    let epoch: i64 = raw.parse().ok()?;
    Utc.timestamp_opt(epoch, 0).single()
}

/// 429 is always a rate limit; 403 with an exhausted budget or a
/// `Retry-After` hint is the secondary variant some providers emit.
fn is_rate_limited(status: u16, headers: &Headers) -> bool {
    if status == 429 {
        return true;
    }
    status == 403
        && (headers.get("retry-after").is_some() || remaining_header(headers) == Some(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_of(pairs: &[(&str, &str)]) -> Headers {
        Headers::from_pairs(pairs)
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(10), Duration::from_secs(120));
    }

    #[test]
    fn detects_primary_rate_limit() {
        assert!(is_rate_limited(429, &Headers::default()));
        assert!(!is_rate_limited(200, &Headers::default()));
    }

    #[test]
    fn detects_secondary_rate_limit() {
        let exhausted = headers_of(&[("x-ratelimit-remaining", "0")]);
        assert!(is_rate_limited(403, &exhausted));

        let retry_after = headers_of(&[("Retry-After", "12")]);
        assert!(is_rate_limited(403, &retry_after));

        let plain_forbidden = headers_of(&[("x-ratelimit-remaining", "55")]);
        assert!(!is_rate_limited(403, &plain_forbidden));
    }

    #[test]
    fn parses_reset_epoch_from_either_header_family() {
        let epoch = Utc::now().timestamp() + 90;
        let gh = headers_of(&[("x-ratelimit-reset", &epoch.to_string())]);
        assert!(parse_reset_epoch(&gh).is_some());
        let gl = headers_of(&[("ratelimit-reset", &epoch.to_string())]);
        assert!(parse_reset_epoch(&gl).is_some());
        assert!(parse_reset_epoch(&Headers::default()).is_none());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = headers_of(&[("X-Next-Page", "2")]);
        assert_eq!(headers.get("x-next-page"), Some("2"));
        assert_eq!(headers.get("X-NEXT-PAGE"), Some("2"));
    }

    #[test]
    fn status_error_predicates() {
        let err = TransportError::Status {
            status: 404,
            url: "http://x".into(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_auth());
        let err = TransportError::Status {
            status: 401,
            url: "http://x".into(),
        };
        assert!(err.is_auth());
    }
}
