//! # Provider Adapters
//!
//! Thin mappings from the generic traversal contract onto each provider's
//! REST shape: URL templates, auth header style, and the pagination cursor
//! each family uses. Anything clever lives in the engine or the transport;
//! these stay mechanical.

pub mod azure;
pub mod bitbucket;
pub mod gitea;
pub mod github;
pub mod gitlab;

pub use azure::AzureAdapter;
pub use bitbucket::BitbucketAdapter;
pub use gitea::GiteaAdapter;
pub use github::GitHubAdapter;
pub use gitlab::GitLabAdapter;

/// Percent-encode one path segment (GitLab wants `group/project` as
/// `group%2Fproject`).
pub(crate) fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Extract the `rel="next"` target from a `Link` header.
pub(crate) fn parse_link_next(header: &str) -> Option<String> {
    for part in header.split(',') {
        let Some((url_part, params)) = part.trim().split_once(';') else {
            continue;
        };
        if params.contains("rel=\"next\"") {
            let url = url_part.trim().trim_start_matches('<').trim_end_matches('>');
            return Some(url.to_string());
        }
    }
    None
}

/// Trim a trailing slash off a user-supplied base URL.
pub(crate) fn normalize_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}
