// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Cookies across the Netscape, RFC 2109, RFC 2965 and RFC 6265 formats.
//!
//! Cookie names must be RFC 2616 tokens and must not start with `$`.
//! Empty values are allowed; values containing `;` or `,` are double
//! quoted on output. A [`CookieJar`] stores cookies per endpoint with
//! replacement by the `(name, path, domain, version)` identity.

use super::field::{quote_if_needed, split_quoted, unquote};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use log::debug;
use std::fmt;

/// The date format cookies serialize with (en-US, UTC).
const DATE_FORMAT: &str = "%a, %d-%b-%Y %H:%M:%S GMT";

/// Accepted date formats on input.
const PARSE_FORMATS: &[&str] = &[
    DATE_FORMAT,                    // Netscape
    "%a, %d %b %Y %H:%M:%S GMT",    // RFC 1123
    "%A, %d-%b-%y %H:%M:%S GMT",    // RFC 850
    "%a %b %e %H:%M:%S %Y"          // asctime
];

/// The `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    /// Only sent in a first-party context.
    Strict,
    /// Sent on top-level navigation.
    Lax,
    /// Sent in all contexts (requires `Secure`).
    None
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SameSite::Strict => f.write_str("Strict"),
            SameSite::Lax => f.write_str("Lax"),
            SameSite::None => f.write_str("None")
        }
    }
}

impl std::str::FromStr for SameSite {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("strict") {
            Ok(SameSite::Strict)
        } else if s.eq_ignore_ascii_case("lax") {
            Ok(SameSite::Lax)
        } else if s.eq_ignore_ascii_case("none") {
            Ok(SameSite::None)
        } else {
            Err(())
        }
    }
}

/// An HTTP cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    path: String,
    domain: String,
    expires: Option<DateTime<Utc>>,
    max_age: Option<i64>,
    port_list: Option<Vec<u16>>,
    comment: Option<String>,
    comment_url: Option<String>,
    discard: bool,
    secure: bool,
    http_only: bool,
    same_site: Option<SameSite>,
    version: u8,
    timestamp: DateTime<Utc>
}

impl Cookie {
    /// Create a new cookie with the given name and value.
    ///
    /// The name must be an RFC 2616 token and must not start with `$`.
    /// The value may be empty.
    pub fn new(name: &str, value: &str) -> Result<Self, Error> {
        if !super::field::is_token(name) || name.starts_with('$') {
            return Err(Error::InvalidName(name.into()))
        }
        Ok(Cookie {
            name: name.to_string(),
            value: unquote(value).to_string(),
            path: String::new(),
            domain: String::new(),
            expires: None,
            max_age: None,
            port_list: None,
            comment: None,
            comment_url: None,
            discard: false,
            secure: false,
            http_only: false,
            same_site: None,
            version: 0,
            timestamp: Utc::now()
        })
    }

    /// The cookie name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cookie value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Set the cookie value.
    pub fn set_value(&mut self, value: &str) -> &mut Self {
        self.value = unquote(value).to_string();
        self
    }

    /// The cookie path (empty if not set).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Set the cookie path.
    pub fn set_path(&mut self, path: &str) -> &mut Self {
        self.path = path.to_string();
        self
    }

    /// The cookie domain (empty if not set).
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Set the cookie domain.
    pub fn set_domain(&mut self, domain: &str) -> &mut Self {
        self.domain = domain.to_string();
        self
    }

    /// The expiry time, if any.
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.expires
    }

    /// Set the expiry time.
    pub fn set_expires(&mut self, t: Option<DateTime<Utc>>) -> &mut Self {
        self.expires = t;
        self
    }

    /// The `Max-Age` in seconds, if any.
    pub fn max_age(&self) -> Option<i64> {
        self.max_age
    }

    /// Set the `Max-Age` in seconds.
    pub fn set_max_age(&mut self, seconds: Option<i64>) -> &mut Self {
        self.max_age = seconds;
        self
    }

    /// Is the `Secure` attribute set?
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Set the `Secure` attribute.
    pub fn set_secure(&mut self, secure: bool) -> &mut Self {
        self.secure = secure;
        self
    }

    /// Is the `HttpOnly` attribute set?
    pub fn is_http_only(&self) -> bool {
        self.http_only
    }

    /// Set the `HttpOnly` attribute.
    pub fn set_http_only(&mut self, http_only: bool) -> &mut Self {
        self.http_only = http_only;
        self
    }

    /// The `SameSite` attribute, if any.
    pub fn same_site(&self) -> Option<SameSite> {
        self.same_site
    }

    /// Set the `SameSite` attribute.
    pub fn set_same_site(&mut self, s: Option<SameSite>) -> &mut Self {
        self.same_site = s;
        self
    }

    /// The cookie version (0 = Netscape, 1 = RFC 2109/2965).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Set the cookie version.
    pub fn set_version(&mut self, version: u8) -> &mut Self {
        self.version = if version > 0 { 1 } else { 0 };
        self
    }

    /// The RFC 2965 port list, if any.
    pub fn port_list(&self) -> Option<&[u16]> {
        self.port_list.as_deref()
    }

    /// Has this cookie expired?
    pub fn is_expired(&self) -> bool {
        if let Some(ma) = self.max_age {
            return ma <= 0 || self.timestamp + Duration::seconds(ma) <= Utc::now()
        }
        if let Some(e) = self.expires {
            return e <= Utc::now()
        }
        false
    }

    /// The identity tuple used for collection replacement.
    fn same_identity(&self, other: &Cookie) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.domain.eq_ignore_ascii_case(&other.domain)
            && self.path == other.path
            && self.version == other.version
    }

    /// Parse the value of a `Cookie` request header into cookies.
    ///
    /// `$Version`, `$Path`, `$Domain` and `$Port` apply to the current
    /// cookie; unrecognized `name=value` pairs start new cookies.
    pub fn parse_request(value: &str) -> Vec<Cookie> {
        let mut cookies: Vec<Cookie> = Vec::new();
        let mut version = 0;
        for part in split_quoted(value, &[',', ';']) {
            let part = part.trim();
            if part.is_empty() {
                continue
            }
            let (name, val) = match part.find('=') {
                Some(i) => (part[.. i].trim(), unquote(part[i + 1 ..].trim())),
                None => (part, "")
            };
            if name.eq_ignore_ascii_case("$version") {
                version = val.parse().unwrap_or(0);
                continue
            }
            if name.eq_ignore_ascii_case("$path") {
                if let Some(c) = cookies.last_mut() {
                    c.set_path(val);
                }
                continue
            }
            if name.eq_ignore_ascii_case("$domain") {
                if let Some(c) = cookies.last_mut() {
                    c.set_domain(val);
                }
                continue
            }
            if name.eq_ignore_ascii_case("$port") {
                if let Some(c) = cookies.last_mut() {
                    c.port_list = Some(parse_ports(val));
                }
                continue
            }
            match Cookie::new(name, val) {
                Ok(mut c) => {
                    c.set_version(version);
                    cookies.push(c)
                }
                Err(e) => debug!("skipping malformed cookie: {}", e)
            }
        }
        cookies
    }

    /// Parse the value of a `Set-Cookie` response header into cookies.
    pub fn parse_response(value: &str) -> Vec<Cookie> {
        let mut cookies: Vec<Cookie> = Vec::new();
        let parts = rejoin_expires(split_quoted(value, &[',', ';']));
        for part in parts {
            let part = part.trim();
            if part.is_empty() {
                continue
            }
            let (name, val) = match part.find('=') {
                Some(i) => (part[.. i].trim(), part[i + 1 ..].trim()),
                None => (part, "")
            };
            let current = cookies.last_mut();
            if name.eq_ignore_ascii_case("version") {
                if let Some(c) = current {
                    c.set_version(unquote(val).parse().unwrap_or(0));
                }
            } else if name.eq_ignore_ascii_case("expires") {
                if let Some(c) = current {
                    match parse_date(unquote(val)) {
                        Some(t) => { c.set_expires(Some(t)); }
                        None => debug!("unparseable cookie expiry: {}", val)
                    }
                }
            } else if name.eq_ignore_ascii_case("max-age") {
                if let Some(c) = current {
                    match unquote(val).parse() {
                        Ok(ma) => { c.set_max_age(Some(ma)); }
                        Err(_) => debug!("unparseable cookie max-age: {}", val)
                    }
                }
            } else if name.eq_ignore_ascii_case("path") {
                if let Some(c) = current {
                    c.set_path(unquote(val));
                }
            } else if name.eq_ignore_ascii_case("domain") {
                if let Some(c) = current {
                    c.set_domain(unquote(val));
                }
            } else if name.eq_ignore_ascii_case("port") {
                if let Some(c) = current {
                    c.port_list = Some(parse_ports(unquote(val)));
                    c.set_version(1);
                }
            } else if name.eq_ignore_ascii_case("comment") {
                if let Some(c) = current {
                    c.comment = Some(unquote(val).to_string());
                }
            } else if name.eq_ignore_ascii_case("commenturl") {
                if let Some(c) = current {
                    c.comment_url = Some(unquote(val).to_string());
                }
            } else if name.eq_ignore_ascii_case("discard") {
                if let Some(c) = current {
                    c.discard = true;
                    c.set_version(1);
                }
            } else if name.eq_ignore_ascii_case("secure") {
                if let Some(c) = current {
                    c.set_secure(true);
                }
            } else if name.eq_ignore_ascii_case("httponly") {
                if let Some(c) = current {
                    c.set_http_only(true);
                }
            } else if name.eq_ignore_ascii_case("samesite") {
                if let Some(c) = current {
                    c.set_same_site(unquote(val).parse().ok());
                }
            } else {
                match Cookie::new(name, unquote(val)) {
                    Ok(c) => cookies.push(c),
                    Err(e) => debug!("skipping malformed cookie: {}", e)
                }
            }
        }
        cookies
    }

    /// Serialize for a `Set-Cookie` response header.
    ///
    /// Version 0 emits `Expires`, version 1 emits `Max-Age`; when both an
    /// expiry and a max-age are present, `Max-Age` wins and only one of
    /// them appears in the output.
    pub fn to_set_cookie_string(&self) -> String {
        let mut s = format!("{}={}", self.name, quote_if_needed(&self.value));
        if self.version > 0 {
            s.push_str("; Version=1")
        }
        match (self.version, self.max_age, self.expires) {
            (0, Some(ma), _) => {
                let at = self.timestamp + Duration::seconds(ma);
                s.push_str("; Expires=");
                s.push_str(&at.format(DATE_FORMAT).to_string())
            }
            (0, None, Some(e)) => {
                s.push_str("; Expires=");
                s.push_str(&e.format(DATE_FORMAT).to_string())
            }
            (_, Some(ma), _) => {
                s.push_str("; Max-Age=");
                s.push_str(&ma.to_string())
            }
            (_, None, Some(e)) => {
                let ma = (e - Utc::now()).num_seconds().max(0);
                s.push_str("; Max-Age=");
                s.push_str(&ma.to_string())
            }
            (_, None, None) => {}
        }
        if !self.path.is_empty() {
            s.push_str("; Path=");
            s.push_str(&self.path)
        }
        if !self.domain.is_empty() {
            s.push_str("; Domain=");
            s.push_str(&self.domain)
        }
        if let Some(ports) = &self.port_list {
            s.push_str("; Port=\"");
            s.push_str(&ports.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(","));
            s.push('"')
        }
        if let Some(c) = &self.comment {
            s.push_str("; Comment=");
            s.push_str(&quote_if_needed(c))
        }
        if let Some(u) = &self.comment_url {
            s.push_str("; CommentURL=\"");
            s.push_str(u);
            s.push('"')
        }
        if self.discard {
            s.push_str("; Discard")
        }
        if self.secure {
            s.push_str("; Secure")
        }
        if self.http_only {
            s.push_str("; HttpOnly")
        }
        if let Some(ss) = self.same_site {
            s.push_str("; SameSite=");
            s.push_str(&ss.to_string())
        }
        s
    }

    /// Serialize for a `Cookie` request header (without the `$Version`
    /// prefix, which applies once per header and is added by
    /// [`CookieJar::request_header_value`]).
    pub fn to_request_string(&self) -> String {
        let mut s = format!("{}={}", self.name, quote_if_needed(&self.value));
        if self.version > 0 {
            if !self.path.is_empty() {
                s.push_str("; $Path=");
                s.push_str(&self.path)
            }
            if !self.domain.is_empty() {
                s.push_str("; $Domain=");
                s.push_str(&self.domain)
            }
        }
        s
    }
}

fn parse_ports(value: &str) -> Vec<u16> {
    value.split(',').filter_map(|p| p.trim().parse().ok()).collect()
}

/// Parse a cookie date in any of the supported formats.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    for f in PARSE_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(value.trim(), f) {
            return Some(DateTime::from_naive_utc_and_offset(t, Utc))
        }
    }
    None
}

/// Format a date the way cookies serialize it.
pub fn format_date(t: DateTime<Utc>) -> String {
    t.format(DATE_FORMAT).to_string()
}

/// An `Expires` attribute contains a comma after the weekday, so a
/// comma-split produces a fragment `expires=Thu` followed by the date
/// continuation. Rejoin such pairs.
fn rejoin_expires(parts: Vec<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut iter = parts.into_iter().peekable();
    while let Some(part) = iter.next() {
        let is_split_date = {
            let t = part.trim();
            if let Some(i) = t.find('=') {
                t[.. i].trim().eq_ignore_ascii_case("expires")
                    && t[i + 1 ..].trim().len() == 3
                    && t[i + 1 ..].trim().chars().all(|c| c.is_ascii_alphabetic())
            } else {
                false
            }
        };
        if is_split_date {
            if let Some(next) = iter.peek() {
                out.push(format!("{},{}", part, next));
                iter.next();
                continue
            }
        }
        out.push(part.to_string())
    }
    out
}

/// Cookie errors.
#[non_exhaustive]
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// The cookie name is empty, no token, or starts with `$`.
    #[error("invalid cookie name: {0:?}")]
    InvalidName(String),

    /// The jar has been sealed and can not be mutated.
    #[error("cookie jar is sealed")]
    Sealed
}

// Cookie jar /////////////////////////////////////////////////////////////////////////////////////

/// A per-endpoint cookie collection.
///
/// Insertion replaces an existing cookie with the same
/// `(name, path, domain, version)` identity. The jar is writable by
/// default; [`CookieJar::seal`] turns it read-only.
#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
    sealed: bool
}

impl CookieJar {
    /// Create an empty jar.
    pub fn new() -> Self {
        CookieJar::default()
    }

    /// Number of cookies stored.
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Is the jar empty?
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Make the jar read-only. Irreversible.
    pub fn seal(&mut self) {
        self.sealed = true
    }

    /// Has the jar been sealed?
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Insert the cookie, replacing one with the same identity.
    /// An expired cookie removes its stored counterpart instead.
    pub fn set_or_remove(&mut self, cookie: Cookie) -> Result<(), Error> {
        if self.sealed {
            return Err(Error::Sealed)
        }
        if let Some(i) = self.cookies.iter().position(|c| c.same_identity(&cookie)) {
            if cookie.is_expired() {
                self.cookies.remove(i);
            } else {
                self.cookies[i] = cookie
            }
        } else if !cookie.is_expired() {
            self.cookies.push(cookie)
        }
        Ok(())
    }

    /// Get a cookie by name (first match).
    pub fn get(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name().eq_ignore_ascii_case(name))
    }

    /// Iterate over all stored cookies.
    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.iter()
    }

    /// The value of a `Cookie` request header carrying all non-expired
    /// cookies, or `None` if there is nothing to send.
    pub fn request_header_value(&self) -> Option<String> {
        let live: Vec<&Cookie> = self.cookies.iter().filter(|c| !c.is_expired()).collect();
        if live.is_empty() {
            return None
        }
        let mut s = String::new();
        if live.iter().any(|c| c.version() > 0) {
            s.push_str("$Version=1; ")
        }
        s.push_str(&live.iter().map(|c| c.to_request_string()).collect::<Vec<_>>().join("; "));
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use super::{parse_date, Cookie, CookieJar, Error};

    #[test]
    fn scenario_roundtrip() {
        let parsed = Cookie::parse_response("SID=abc; Path=/; HttpOnly; Secure");
        assert_eq!(parsed.len(), 1);
        let c = &parsed[0];
        assert_eq!(c.name(), "SID");
        assert_eq!(c.value(), "abc");
        assert_eq!(c.path(), "/");
        assert!(c.is_http_only());
        assert!(c.is_secure());
        assert_eq!(c.version(), 0);
        assert_eq!(c.expires(), None);

        let again = Cookie::parse_response(&c.to_set_cookie_string());
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].name(), c.name());
        assert_eq!(again[0].value(), c.value());
        assert_eq!(again[0].path(), c.path());
        assert_eq!(again[0].is_http_only(), c.is_http_only());
        assert_eq!(again[0].is_secure(), c.is_secure())
    }

    #[test]
    fn rejects_bad_names() {
        assert_matches!(Cookie::new("", "v"), Err(Error::InvalidName(_)));
        assert_matches!(Cookie::new("$name", "v"), Err(Error::InvalidName(_)));
        assert_matches!(Cookie::new("na me", "v"), Err(Error::InvalidName(_)));
        assert_matches!(Cookie::new("name", ""), Ok(_))
    }

    #[test]
    fn quoted_values_roundtrip() {
        let mut c = Cookie::new("pref", "a;b,c").unwrap();
        c.set_path("/");
        let s = c.to_set_cookie_string();
        assert!(s.starts_with("pref=\"a;b,c\""), "{}", s);
        let parsed = Cookie::parse_response(&s);
        assert_eq!(parsed[0].value(), "a;b,c")
    }

    #[test]
    fn expires_spanning_comma_fragments() {
        let parsed = Cookie::parse_response("lang=en; Expires=Wed, 09-Jun-2021 10:18:14 GMT; Path=/");
        assert_eq!(parsed.len(), 1);
        let c = &parsed[0];
        assert_eq!(c.value(), "en");
        let e = c.expires().expect("expiry parsed");
        assert_eq!(super::format_date(e), "Wed, 09-Jun-2021 10:18:14 GMT");
        assert!(c.is_expired())
    }

    #[test]
    fn rfc1123_dates_accepted() {
        assert!(parse_date("Sun, 06 Nov 1994 08:49:37 GMT").is_some());
        assert!(parse_date("Sunday, 06-Nov-94 08:49:37 GMT").is_some());
        assert!(parse_date("Sun Nov  6 08:49:37 1994").is_some());
        assert!(parse_date("not a date").is_none())
    }

    #[test]
    fn request_parsing_with_attributes() {
        let cookies = Cookie::parse_request("$Version=1; SID=31d4; $Path=/; lang=en; $Domain=example.com");
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].name(), "SID");
        assert_eq!(cookies[0].path(), "/");
        assert_eq!(cookies[0].version(), 1);
        assert_eq!(cookies[1].name(), "lang");
        assert_eq!(cookies[1].domain(), "example.com")
    }

    #[test]
    fn version1_uses_max_age() {
        let mut c = Cookie::new("id", "7").unwrap();
        c.set_version(1);
        c.set_max_age(Some(3600));
        let s = c.to_set_cookie_string();
        assert!(s.contains("Max-Age=3600"), "{}", s);
        assert!(!s.contains("Expires"), "{}", s);
        assert!(s.contains("Version=1"), "{}", s)
    }

    #[test]
    fn max_age_overrides_expires() {
        let mut c = Cookie::new("id", "7").unwrap();
        c.set_expires(parse_date("Wed, 09-Jun-2100 10:18:14 GMT"));
        c.set_max_age(Some(60));
        let s = c.to_set_cookie_string();
        // Version 0 emits Expires derived from the max-age, never both.
        assert_eq!(s.matches("Expires").count(), 1);
        assert!(!s.contains("Max-Age"))
    }

    #[test]
    fn jar_replaces_by_identity() {
        let mut jar = CookieJar::new();
        let mut a = Cookie::new("sid", "1").unwrap();
        a.set_path("/");
        jar.set_or_remove(a).unwrap();

        let mut b = Cookie::new("sid", "2").unwrap();
        b.set_path("/");
        jar.set_or_remove(b).unwrap();
        assert_eq!(jar.len(), 1);
        assert_eq!(jar.get("sid").unwrap().value(), "2");

        // A different path is a different identity.
        let mut c = Cookie::new("sid", "3").unwrap();
        c.set_path("/other/");
        jar.set_or_remove(c).unwrap();
        assert_eq!(jar.len(), 2)
    }

    #[test]
    fn jar_removes_expired() {
        let mut jar = CookieJar::new();
        jar.set_or_remove(Cookie::new("sid", "1").unwrap()).unwrap();
        let mut dead = Cookie::new("sid", "").unwrap();
        dead.set_max_age(Some(0));
        jar.set_or_remove(dead).unwrap();
        assert!(jar.is_empty())
    }

    #[test]
    fn sealed_jar_rejects_mutation() {
        let mut jar = CookieJar::new();
        jar.set_or_remove(Cookie::new("sid", "1").unwrap()).unwrap();
        jar.seal();
        assert_matches!(
            jar.set_or_remove(Cookie::new("sid", "2").unwrap()),
            Err(Error::Sealed)
        );
        assert_eq!(jar.get("sid").unwrap().value(), "1")
    }

    #[test]
    fn request_header_value() {
        let mut jar = CookieJar::new();
        jar.set_or_remove(Cookie::new("a", "1").unwrap()).unwrap();
        jar.set_or_remove(Cookie::new("b", "2").unwrap()).unwrap();
        assert_eq!(jar.request_header_value().as_deref(), Some("a=1; b=2"))
    }
}
