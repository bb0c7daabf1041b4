//! URL Match Patterns
//!
//! Patterns of the form `<scheme>://<host><path>` used to scope the
//! request-rate monitor, e.g. `https://*/*` or `http://localhost:8080/*`.
//! Scheme must be one of `*`, `http`, `https`, `file`, `ftp`; host is `*`,
//! `*.<domain>` or a literal domain (optionally with a port); the path is
//! a non-empty wildcard pattern starting with `/`.

use url::Url;
use wildmatch::WildMatch;

use crate::error::{CoreError, Result};

const SCHEMES: [&str; 5] = ["*", "http", "https", "file", "ftp"];

/// A parsed, validated match pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPattern {
    scheme: String,
    host: String,
    port: Option<u16>,
    path: String,
}

impl MatchPattern {
    /// Parse and validate a raw pattern string.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || CoreError::Pattern(raw.to_string());

        let (scheme, rest) = raw.split_once("://").ok_or_else(invalid)?;
        if !SCHEMES.contains(&scheme) {
            return Err(invalid());
        }

        let slash = rest.find('/').ok_or_else(invalid)?;
        let (host_part, path) = rest.split_at(slash);
        if path.is_empty() {
            return Err(invalid());
        }

        let (host, port) = match host_part.split_once(':') {
            Some((name, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid())?;
                (name, Some(port))
            }
            None => (host_part, None),
        };

        let valid_host = match host {
            "*" => true,
            h if h.starts_with("*.") => h.len() > 2 && !h[2..].contains('*'),
            h => !h.is_empty() && !h.contains('*'),
        };
        if !valid_host {
            return Err(invalid());
        }

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_ascii_lowercase(),
            port,
            path: path.to_string(),
        })
    }

    /// Whether this pattern covers the given URL.
    pub fn matches(&self, url: &Url) -> bool {
        let scheme_ok = match self.scheme.as_str() {
            "*" => matches!(url.scheme(), "http" | "https"),
            s => url.scheme() == s,
        };
        if !scheme_ok {
            return false;
        }

        let host = url.host_str().unwrap_or("").to_ascii_lowercase();
        let host_ok = match self.host.as_str() {
            "*" => true,
            h if h.starts_with("*.") => {
                let domain = &h[2..];
                host == domain || host.ends_with(&format!(".{domain}"))
            }
            h => host == h,
        };
        if !host_ok {
            return false;
        }

        if let Some(port) = self.port {
            if url.port_or_known_default() != Some(port) {
                return false;
            }
        }

        WildMatch::new(&self.path).matches(url.path())
    }
}

/// Validate a batch of raw patterns, all-or-nothing.
///
/// Returns the concatenated list of offending entries on failure so the
/// caller can show every bad pattern at once, and leaves any active filter
/// untouched.
pub fn validate_all(patterns: &[String]) -> std::result::Result<Vec<MatchPattern>, String> {
    let mut parsed = Vec::with_capacity(patterns.len());
    let mut offending = Vec::new();
    for raw in patterns {
        match MatchPattern::parse(raw) {
            Ok(p) => parsed.push(p),
            Err(_) => offending.push(raw.as_str()),
        }
    }
    if offending.is_empty() {
        Ok(parsed)
    } else {
        Err(format!("Invalid match patterns: {}", offending.join(", ")))
    }
}
