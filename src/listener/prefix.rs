// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! URI prefixes routing incoming requests to behavior hosts.
//!
//! Syntax: `scheme://host[:port]/path/` where scheme is one of
//! `http`, `https`, `ws`, `wss`. The trailing `/` is required and the
//! path may contain neither `//` nor `%`. Prefixes are immutable after
//! validation; equality is by canonical form (lower-case scheme and
//! host, explicit port).

use std::fmt;

/// A validated URI prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UriPrefix {
    secure: bool,
    host: String,
    port: u16,
    path: String
}

impl UriPrefix {
    /// Parse and validate a prefix string.
    pub fn parse(input: &str) -> Result<Self, InvalidPrefix> {
        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| InvalidPrefix::new(input, "missing scheme"))?;

        let secure = match scheme.to_ascii_lowercase().as_str() {
            "http" | "ws" => false,
            "https" | "wss" => true,
            _ => return Err(InvalidPrefix::new(input, "unsupported scheme"))
        };

        let (authority, path) = match rest.find('/') {
            Some(i) => rest.split_at(i),
            None => return Err(InvalidPrefix::new(input, "missing path"))
        };

        if authority.is_empty() {
            return Err(InvalidPrefix::new(input, "missing host"))
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) if !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()) => {
                let port = p.parse().map_err(|_| InvalidPrefix::new(input, "invalid port"))?;
                (h, port)
            }
            _ => (authority, if secure { 443 } else { 80 })
        };

        if host.is_empty() {
            return Err(InvalidPrefix::new(input, "missing host"))
        }
        if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
            return Err(InvalidPrefix::new(input, "invalid port"))
        }

        if !path.ends_with('/') {
            return Err(InvalidPrefix::new(input, "path must end with '/'"))
        }
        if path.contains("//") {
            return Err(InvalidPrefix::new(input, "path must not contain '//'"))
        }
        if path.contains('%') {
            return Err(InvalidPrefix::new(input, "path must not contain '%'"))
        }

        Ok(UriPrefix {
            secure,
            host: host.to_ascii_lowercase(),
            port,
            path: path.to_string()
        })
    }

    /// Does this prefix require TLS?
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// The prefix host (`*` and `+` are wildcards).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The prefix port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The prefix path (always ends with `/`).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Does this prefix bind the wildcard host?
    pub fn is_wildcard(&self) -> bool {
        self.host == "*" || self.host == "+"
    }

    /// Does the request `Host` header match this prefix?
    ///
    /// A port in the header is ignored; comparison is case-insensitive.
    pub fn host_matches(&self, request_host: &str) -> bool {
        if self.is_wildcard() {
            return true
        }
        let host = request_host.rsplit_once(':')
            .map(|(h, p)| if p.chars().all(|c| c.is_ascii_digit()) { h } else { request_host })
            .unwrap_or(request_host);
        host.eq_ignore_ascii_case(&self.host)
    }

    /// Is this prefix path a prefix of the request path?
    ///
    /// `/chat` matches the prefix `/chat/`.
    pub fn path_matches(&self, request_path: &str) -> bool {
        if request_path.starts_with(&self.path) {
            return true
        }
        // A request for the prefix itself without the trailing slash.
        self.path.len() == request_path.len() + 1 && self.path.starts_with(request_path)
    }

    /// The match specificity: longer paths win.
    pub fn specificity(&self) -> usize {
        self.path.len()
    }
}

impl fmt::Display for UriPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        write!(f, "{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

/// Error of [`UriPrefix::parse`].
#[derive(Debug, thiserror::Error)]
#[error("invalid prefix {input:?}: {reason}")]
pub struct InvalidPrefix {
    input: String,
    reason: &'static str
}

impl InvalidPrefix {
    fn new(input: &str, reason: &'static str) -> Self {
        InvalidPrefix { input: input.to_string(), reason }
    }
}

#[cfg(test)]
mod tests {
    use super::UriPrefix;

    #[test]
    fn parses_defaults() {
        let p = UriPrefix::parse("http://example.com/").unwrap();
        assert!(!p.is_secure());
        assert_eq!(p.host(), "example.com");
        assert_eq!(p.port(), 80);
        assert_eq!(p.path(), "/");

        let p = UriPrefix::parse("wss://Example.com:9000/chat/").unwrap();
        assert!(p.is_secure());
        assert_eq!(p.host(), "example.com");
        assert_eq!(p.port(), 9000);
        assert_eq!(p.path(), "/chat/")
    }

    #[test]
    fn canonical_equality() {
        let a = UriPrefix::parse("ws://Example.com/chat/").unwrap();
        let b = UriPrefix::parse("http://example.com:80/chat/").unwrap();
        assert_eq!(a, b)
    }

    #[test]
    fn rejects_bad_paths() {
        assert!(UriPrefix::parse("http://h/chat").is_err());
        assert!(UriPrefix::parse("http://h/a//b/").is_err());
        assert!(UriPrefix::parse("http://h/a%20b/").is_err());
        assert!(UriPrefix::parse("ftp://h/").is_err());
        assert!(UriPrefix::parse("http://:80/").is_err());
        assert!(UriPrefix::parse("http://").is_err())
    }

    #[test]
    fn host_matching() {
        let p = UriPrefix::parse("http://example.com/").unwrap();
        assert!(p.host_matches("example.com"));
        assert!(p.host_matches("EXAMPLE.com:8080"));
        assert!(!p.host_matches("other.com"));

        let w = UriPrefix::parse("http://*/").unwrap();
        assert!(w.is_wildcard());
        assert!(w.host_matches("anything"))
    }

    #[test]
    fn path_matching() {
        let p = UriPrefix::parse("http://h/chat/").unwrap();
        assert!(p.path_matches("/chat/"));
        assert!(p.path_matches("/chat/room1"));
        assert!(p.path_matches("/chat"));
        assert!(!p.path_matches("/chatter"));
        assert!(!p.path_matches("/"))
    }
}
