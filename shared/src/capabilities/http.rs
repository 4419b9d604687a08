use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const MAX_URL_LENGTH: usize = 2048;

/// How strictly a URL's host is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPolicy {
    /// Links shown to every user (video links, camera streams).
    PublicOnly,
    /// Endpoints the core itself calls; local development hosts allowed.
    AllowPrivate,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedUrl {
    url: String,
    host: String,
}

impl ValidatedUrl {
    pub fn new(url: &str, policy: HostPolicy) -> Result<Self, UrlError> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(UrlError::Invalid {
                url: String::new(),
                reason: "URL cannot be empty".to_string(),
            });
        }

        if trimmed.len() > MAX_URL_LENGTH {
            return Err(UrlError::Invalid {
                url: truncate(trimmed),
                reason: format!("URL exceeds maximum length of {MAX_URL_LENGTH} bytes"),
            });
        }

        let parsed = Url::parse(trimmed).map_err(|e| UrlError::Invalid {
            url: truncate(trimmed),
            reason: e.to_string(),
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(UrlError::Invalid {
                url: truncate(trimmed),
                reason: format!(
                    "invalid scheme '{}', only 'http' and 'https' are allowed",
                    parsed.scheme()
                ),
            });
        }

        let Some(host) = parsed.host_str().map(str::to_lowercase) else {
            return Err(UrlError::Invalid {
                url: truncate(trimmed),
                reason: "URL must have a host".to_string(),
            });
        };

        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(UrlError::Invalid {
                url: truncate(trimmed),
                reason: "credentials in URL are not allowed".to_string(),
            });
        }

        if policy == HostPolicy::PublicOnly && is_private_host(&host) {
            return Err(UrlError::PrivateNetworkBlocked {
                url: truncate(trimmed),
                host,
            });
        }

        Ok(Self {
            url: parsed.to_string(),
            host,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl std::fmt::Display for ValidatedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

fn is_private_host(host: &str) -> bool {
    if matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]" | "0.0.0.0") {
        return true;
    }

    if host.ends_with(".local") || host.ends_with(".localhost") || host.ends_with(".internal") {
        return true;
    }

    if host.starts_with("10.") || host.starts_with("192.168.") || host.starts_with("169.254.") {
        return true;
    }

    if let Some(rest) = host.strip_prefix("172.") {
        if let Some(second) = rest.split('.').next().and_then(|s| s.parse::<u8>().ok()) {
            return (16..=31).contains(&second);
        }
    }

    false
}

fn truncate(url: &str) -> String {
    if url.len() <= 100 {
        url.to_string()
    } else {
        let cut = (0..=100).rev().find(|i| url.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &url[..cut])
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("invalid URL '{url}': {reason}")]
    Invalid { url: String, reason: String },

    #[error("URL '{url}' points at a private network host ({host})")]
    PrivateNetworkBlocked { url: String, host: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation_empty() {
        assert!(ValidatedUrl::new("", HostPolicy::PublicOnly).is_err());
        assert!(ValidatedUrl::new("   ", HostPolicy::PublicOnly).is_err());
    }

    #[test]
    fn test_url_validation_invalid_scheme() {
        for url in ["javascript:alert(1)", "file:///etc/passwd", "rtsp://cam.example.com/1"] {
            assert!(ValidatedUrl::new(url, HostPolicy::PublicOnly).is_err(), "{url}");
        }
    }

    #[test]
    fn test_url_validation_private_hosts() {
        for url in [
            "http://localhost:3000/x",
            "http://192.168.1.20/stream",
            "http://172.20.0.5/",
            "http://10.0.0.1/",
        ] {
            assert!(matches!(
                ValidatedUrl::new(url, HostPolicy::PublicOnly),
                Err(UrlError::PrivateNetworkBlocked { .. })
            ));
        }
        assert!(ValidatedUrl::new("http://172.32.0.1/", HostPolicy::PublicOnly).is_ok());
    }

    #[test]
    fn test_private_hosts_allowed_for_endpoints() {
        let url = ValidatedUrl::new(
            "http://localhost:3000/api/send-incident",
            HostPolicy::AllowPrivate,
        )
        .unwrap();
        assert_eq!(url.host(), "localhost");
    }

    #[test]
    fn test_url_validation_credentials_blocked() {
        assert!(ValidatedUrl::new("https://user:pw@example.com/", HostPolicy::PublicOnly).is_err());
    }

    #[test]
    fn test_url_validation_valid() {
        let url = ValidatedUrl::new(
            "  https://www.youtube.com/watch?v=abc ",
            HostPolicy::PublicOnly,
        )
        .unwrap();
        assert_eq!(url.host(), "www.youtube.com");
        assert_eq!(url.as_str(), "https://www.youtube.com/watch?v=abc");
    }

    #[test]
    fn test_url_validation_too_long() {
        let url = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert!(ValidatedUrl::new(&url, HostPolicy::PublicOnly).is_err());
    }
}
