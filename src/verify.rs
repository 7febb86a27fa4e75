//! # Active Credential Verification
//!
//! Optional second stage behind `--verify`: a candidate secret whose rule
//! names a verifier is probed against the issuing service's cheapest
//! authenticated endpoint. Only confirmed credentials survive. Verifiers
//! are registered in a string-keyed map so rules reference them by id.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::transport::{Auth, HttpTransport, RetryPolicy, TransportError, TransportOptions};

const VERIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Verifier ids the bundled rules may reference.
const KNOWN_VERIFIERS: &[&str] = &[
    "github-token",
    "gitlab-token",
    "slack-token",
    "stripe-key",
    "openai-key",
];

pub fn known_verifier(id: &str) -> bool {
    KNOWN_VERIFIERS.contains(&id)
}

pub trait Verifier: Send + Sync {
    fn id(&self) -> &'static str;
    /// Probe the issuing service. `Ok(true)` confirms the credential is
    /// live; transport errors are treated by the caller as unverified.
    fn verify(&self, transport: &HttpTransport, secret: &str) -> Result<bool, TransportError>;
}

/// Maps a 2xx to confirmed and 401/403 to refuted; anything else is an
/// error the caller treats as unverified.
fn status_to_verdict(result: Result<(), TransportError>) -> Result<bool, TransportError> {
    match result {
        Ok(()) => Ok(true),
        Err(err) if err.is_auth() => Ok(false),
        Err(err) => Err(err),
    }
}

struct GithubToken;

impl Verifier for GithubToken {
    fn id(&self) -> &'static str {
        "github-token"
    }

    fn verify(&self, transport: &HttpTransport, secret: &str) -> Result<bool, TransportError> {
        let auth = format!("Bearer {secret}");
        let result = transport
            .get_with("https://api.github.com/user", &[("Authorization", &auth)])
            .map(|_| ());
        status_to_verdict(result)
    }
}

struct GitlabToken;

impl Verifier for GitlabToken {
    fn id(&self) -> &'static str {
        "gitlab-token"
    }

    fn verify(&self, transport: &HttpTransport, secret: &str) -> Result<bool, TransportError> {
        let result = transport
            .get_with(
                "https://gitlab.com/api/v4/user",
                &[("Private-Token", secret)],
            )
            .map(|_| ());
        status_to_verdict(result)
    }
}

struct SlackToken;

impl Verifier for SlackToken {
    fn id(&self) -> &'static str {
        "slack-token"
    }

    fn verify(&self, transport: &HttpTransport, secret: &str) -> Result<bool, TransportError> {
        let auth = format!("Bearer {secret}");
        // auth.test answers 200 even for bad tokens; the verdict is in the
        // body's `ok` field.
        let resp =
            transport.get_with("https://slack.com/api/auth.test", &[("Authorization", &auth)])?;
        let body: serde_json::Value = resp.json()?;
        Ok(body.get("ok").and_then(|v| v.as_bool()).unwrap_or(false))
    }
}

struct StripeKey;

impl Verifier for StripeKey {
    fn id(&self) -> &'static str {
        "stripe-key"
    }

    fn verify(&self, transport: &HttpTransport, secret: &str) -> Result<bool, TransportError> {
        let auth = format!("Bearer {secret}");
        let result = transport
            .get_with(
                "https://api.stripe.com/v1/account",
                &[("Authorization", &auth)],
            )
            .map(|_| ());
        status_to_verdict(result)
    }
}

struct OpenAiKey;

impl Verifier for OpenAiKey {
    fn id(&self) -> &'static str {
        "openai-key"
    }

    fn verify(&self, transport: &HttpTransport, secret: &str) -> Result<bool, TransportError> {
        let auth = format!("Bearer {secret}");
        let result = transport
            .get_with(
                "https://api.openai.com/v1/models",
                &[("Authorization", &auth)],
            )
            .map(|_| ());
        status_to_verdict(result)
    }
}

pub struct VerifierRegistry {
    transport: HttpTransport,
    handlers: HashMap<&'static str, Box<dyn Verifier>>,
}

impl VerifierRegistry {
    /// Build the registry with its own transport: anonymous auth, a real
    /// timeout (verification must not stall the scan), and a short retry
    /// budget.
    pub fn with_defaults(
        proxy: Option<String>,
        insecure: bool,
    ) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(TransportOptions {
            auth: Auth::None,
            proxy,
            insecure,
            cookie: None,
            timeout: Some(VERIFY_TIMEOUT),
            retry: RetryPolicy {
                max_attempts: 2,
                ..RetryPolicy::default()
            },
        })?;

        let mut handlers: HashMap<&'static str, Box<dyn Verifier>> = HashMap::new();
        for handler in [
            Box::new(GithubToken) as Box<dyn Verifier>,
            Box::new(GitlabToken),
            Box::new(SlackToken),
            Box::new(StripeKey),
            Box::new(OpenAiKey),
        ] {
            handlers.insert(handler.id(), handler);
        }

        Ok(Self {
            transport,
            handlers,
        })
    }

    /// Confirm a candidate. Unknown ids and transport failures come back
    /// `false`; the detector drops unconfirmed candidates.
    pub fn confirm(&self, verifier_id: &str, secret: &str) -> bool {
        let Some(handler) = self.handlers.get(verifier_id) else {
            debug!("no verifier registered for id {verifier_id:?}");
            return false;
        };
        match handler.verify(&self.transport, secret) {
            Ok(confirmed) => confirmed,
            Err(err) => {
                debug!("verifier {verifier_id} failed: {err}; treating as unverified");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_ids_cover_bundled_rules() {
        for id in KNOWN_VERIFIERS {
            assert!(known_verifier(id));
        }
        assert!(!known_verifier("nope"));
    }

    #[test]
    fn registry_registers_every_known_id() {
        let registry = VerifierRegistry::with_defaults(None, false).expect("registry");
        for id in KNOWN_VERIFIERS {
            assert!(registry.handlers.contains_key(id), "missing {id}");
        }
    }

    #[test]
    fn unknown_id_is_unverified() {
        let registry = VerifierRegistry::with_defaults(None, false).expect("registry");
        assert!(!registry.confirm("not-a-verifier", "secret"));
    }

    #[test]
    fn auth_failures_refute_without_error() {
        assert_eq!(
            status_to_verdict(Err(TransportError::Status {
                status: 401,
                url: "http://x".into()
            }))
            .expect("verdict"),
            false
        );
        assert!(status_to_verdict(Ok(())).expect("verdict"));
    }
}
