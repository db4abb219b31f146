// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! HTTP authentication (Basic and Digest, RFC 2617).
//!
//! The listener consults an [`Authenticator`] per prefix. Requests without
//! a matching `Authorization` header are answered with `401` and one
//! challenge per configured scheme. Digest nonce counts must strictly
//! increase per connection; a reused or reordered count is answered with
//! a fresh challenge marked `stale=true`.

use super::field::{split_quoted, unquote};
use log::debug;
use md5::{Digest, Md5};
use std::fmt;

/// Selectable authentication schemes (bitwise combinable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schemes(u8);

impl Schemes {
    /// No authentication configured; every request passes.
    pub const NONE: Schemes = Schemes(0);
    /// Anonymous access is allowed.
    pub const ANONYMOUS: Schemes = Schemes(1);
    /// HTTP Basic.
    pub const BASIC: Schemes = Schemes(2);
    /// HTTP Digest.
    pub const DIGEST: Schemes = Schemes(4);

    /// Combine two scheme sets.
    pub fn with(self, other: Schemes) -> Schemes {
        Schemes(self.0 | other.0)
    }

    /// Does this set contain all schemes of `other`?
    pub fn contains(self, other: Schemes) -> bool {
        self.0 & other.0 == other.0
    }

    /// Does this set require credentials?
    pub fn requires_credentials(self) -> bool {
        self.contains(Schemes::BASIC) || self.contains(Schemes::DIGEST)
    }
}

impl std::ops::BitOr for Schemes {
    type Output = Schemes;

    fn bitor(self, rhs: Schemes) -> Schemes {
        self.with(rhs)
    }
}

/// A parsed `Authorization` or `WWW-Authenticate` header value:
/// a scheme token followed by a comma-separated parameter list.
#[derive(Debug, Clone)]
pub struct AuthHeader {
    scheme: String,
    /// For Basic this is the single base64 blob; for Digest the
    /// `name=value` parameters.
    params: Vec<(String, String)>,
    token: Option<String>
}

impl AuthHeader {
    /// Parse a header value like `Digest realm="x", nonce="y"` or
    /// `Basic dXNlcjpwYXNz`.
    pub fn parse(value: &str) -> Result<Self, Error> {
        let value = value.trim();
        let (scheme, rest) = match value.find(' ') {
            Some(i) => (&value[.. i], value[i + 1 ..].trim()),
            None => (value, "")
        };
        if scheme.is_empty() {
            return Err(Error::Malformed)
        }
        let mut params = Vec::new();
        let mut token = None;
        // A `name=value` list has a quote or an `=` that is not base64
        // padding; everything else is a single credentials token.
        let is_params = rest.contains('"') || rest.trim_end_matches('=').contains('=');
        if is_params {
            for part in split_quoted(rest, &[',']) {
                let part = part.trim();
                if part.is_empty() {
                    continue
                }
                match part.find('=') {
                    Some(i) => {
                        let name = part[.. i].trim().to_ascii_lowercase();
                        let val = unquote(part[i + 1 ..].trim()).to_string();
                        params.push((name, val))
                    }
                    None => return Err(Error::Malformed)
                }
            }
        } else if !rest.is_empty() {
            token = Some(rest.to_string())
        }
        Ok(AuthHeader { scheme: scheme.to_string(), params, token })
    }

    /// The authentication scheme token.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Look up a parameter value by (lower-case) name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    /// The single token following the scheme (Basic credentials blob).
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

/// A challenge the server sends in a `WWW-Authenticate` header.
#[derive(Debug, Clone)]
pub enum Challenge {
    /// `Basic realm="..."`.
    Basic {
        /// The protection realm.
        realm: String
    },
    /// `Digest realm="...", nonce="...", ...`.
    Digest {
        /// The protection realm.
        realm: String,
        /// Fresh server nonce (16 random bytes, hex encoded).
        nonce: String,
        /// Opaque server value echoed by the client.
        opaque: String,
        /// Marks a rejected-but-valid digest due to a stale nonce.
        stale: bool
    }
}

impl Challenge {
    /// Create a Basic challenge for the realm.
    pub fn basic(realm: &str) -> Self {
        Challenge::Basic { realm: realm.to_string() }
    }

    /// Create a Digest challenge for the realm with a fresh nonce.
    pub fn digest(realm: &str) -> Self {
        Challenge::Digest {
            realm: realm.to_string(),
            nonce: hex(&rand::random::<[u8; 16]>()),
            opaque: hex(&rand::random::<[u8; 8]>()),
            stale: false
        }
    }

    /// Parse a `WWW-Authenticate` header value (client side).
    pub fn parse(value: &str) -> Result<Self, Error> {
        let header = AuthHeader::parse(value)?;
        if header.scheme().eq_ignore_ascii_case("basic") {
            return Ok(Challenge::Basic {
                realm: header.param("realm").unwrap_or("").to_string()
            })
        }
        if header.scheme().eq_ignore_ascii_case("digest") {
            return Ok(Challenge::Digest {
                realm: header.param("realm").unwrap_or("").to_string(),
                nonce: header.param("nonce").ok_or(Error::Malformed)?.to_string(),
                opaque: header.param("opaque").unwrap_or("").to_string(),
                stale: header.param("stale")
                    .map(|s| s.eq_ignore_ascii_case("true"))
                    .unwrap_or(false)
            })
        }
        Err(Error::Malformed)
    }

    /// The nonce of a digest challenge.
    pub fn nonce(&self) -> Option<&str> {
        match self {
            Challenge::Basic { .. } => None,
            Challenge::Digest { nonce, .. } => Some(nonce)
        }
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Challenge::Basic { realm } => write!(f, "Basic realm=\"{}\"", realm),
            Challenge::Digest { realm, nonce, opaque, stale } => {
                write!(f, "Digest realm=\"{}\", nonce=\"{}\", opaque=\"{}\", algorithm=MD5, qop=\"auth\"",
                    realm, nonce, opaque)?;
                if *stale {
                    write!(f, ", stale=true")?
                }
                Ok(())
            }
        }
    }
}

/// Outcome of validating an `Authorization` header.
#[derive(Debug)]
pub enum Verdict {
    /// Credentials check out.
    Accepted {
        /// The authenticated user name.
        username: String
    },
    /// Credentials rejected; repeat the challenge.
    Rejected,
    /// Digest nonce count did not strictly increase; repeat the
    /// challenge with `stale=true`.
    Stale
}

/// Per-connection digest bookkeeping: the nonce handed out and the last
/// accepted nonce count.
#[derive(Debug, Default, Clone)]
pub struct DigestState {
    nonce: Option<String>,
    last_nc: u32
}

/// Authentication configuration and validation for one prefix.
///
/// The credential function maps a user name to the cleartext password,
/// or `None` for unknown users.
pub struct Authenticator {
    schemes: Schemes,
    realm: String,
    credentials: Box<dyn Fn(&str) -> Option<String> + Send + Sync>
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("schemes", &self.schemes)
            .field("realm", &self.realm)
            .finish()
    }
}

impl Authenticator {
    /// Create an authenticator which accepts every request.
    pub fn open() -> Self {
        Authenticator {
            schemes: Schemes::NONE,
            realm: String::new(),
            credentials: Box::new(|_| None)
        }
    }

    /// Create an authenticator for the given schemes and realm.
    pub fn new<F>(schemes: Schemes, realm: &str, credentials: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static
    {
        Authenticator { schemes, realm: realm.to_string(), credentials: Box::new(credentials) }
    }

    /// The configured schemes.
    pub fn schemes(&self) -> Schemes {
        self.schemes
    }

    /// Generate the challenges for a `401` answer, refreshing the digest
    /// state with the new nonce.
    pub fn challenges(&self, state: &mut DigestState, stale: bool) -> Vec<Challenge> {
        let mut out = Vec::new();
        if self.schemes.contains(Schemes::DIGEST) {
            let mut c = Challenge::digest(&self.realm);
            if let Challenge::Digest { nonce, stale: s, .. } = &mut c {
                *s = stale;
                state.nonce = Some(nonce.clone());
                state.last_nc = 0;
            }
            out.push(c)
        }
        if self.schemes.contains(Schemes::BASIC) {
            out.push(Challenge::basic(&self.realm))
        }
        out
    }

    /// Validate the `Authorization` header of a request.
    pub fn verify(
        &self,
        authorization: Option<&str>,
        method: &str,
        state: &mut DigestState
    ) -> Verdict {
        if !self.schemes.requires_credentials() {
            return Verdict::Accepted { username: String::new() }
        }

        let header = match authorization.and_then(|v| AuthHeader::parse(v).ok()) {
            Some(h) => h,
            None => return Verdict::Rejected
        };

        if header.scheme().eq_ignore_ascii_case("basic") && self.schemes.contains(Schemes::BASIC) {
            return self.verify_basic(&header)
        }
        if header.scheme().eq_ignore_ascii_case("digest") && self.schemes.contains(Schemes::DIGEST) {
            return self.verify_digest(&header, method, state)
        }
        Verdict::Rejected
    }

    fn verify_basic(&self, header: &AuthHeader) -> Verdict {
        let blob = match header.token() {
            Some(t) => t,
            None => return Verdict::Rejected
        };
        let decoded = match base64::decode(blob) {
            Ok(d) => d,
            Err(_) => return Verdict::Rejected
        };
        let text = match std::str::from_utf8(&decoded) {
            Ok(t) => t,
            Err(_) => return Verdict::Rejected
        };
        let (user, pass) = match text.find(':') {
            Some(i) => (&text[.. i], &text[i + 1 ..]),
            None => return Verdict::Rejected
        };
        match (self.credentials)(user) {
            Some(expected) if expected == pass => Verdict::Accepted { username: user.to_string() },
            _ => Verdict::Rejected
        }
    }

    fn verify_digest(&self, header: &AuthHeader, method: &str, state: &mut DigestState) -> Verdict {
        let username = match header.param("username") {
            Some(u) => u.to_string(),
            None => return Verdict::Rejected
        };
        let realm = header.param("realm").unwrap_or("");
        let nonce = match header.param("nonce") {
            Some(n) => n,
            None => return Verdict::Rejected
        };
        let uri = match header.param("uri") {
            Some(u) => u,
            None => return Verdict::Rejected
        };
        let response = match header.param("response") {
            Some(r) => r,
            None => return Verdict::Rejected
        };

        // The nonce must be the one this connection was challenged with.
        if state.nonce.as_deref() != Some(nonce) {
            debug!("digest nonce unknown or outdated");
            return Verdict::Stale
        }

        let password = match (self.credentials)(&username) {
            Some(p) => p,
            None => return Verdict::Rejected
        };

        let qop = header.param("qop");
        let cnonce = header.param("cnonce").unwrap_or("");
        let nc = header.param("nc").unwrap_or("");

        let mut ha1 = md5_hex(&format!("{}:{}:{}", username, realm, password));
        if header.param("algorithm").map(|a| a.eq_ignore_ascii_case("md5-sess")).unwrap_or(false) {
            ha1 = md5_hex(&format!("{}:{}:{}", ha1, nonce, cnonce))
        }
        let ha2 = md5_hex(&format!("{}:{}", method, uri));

        let expected = match qop {
            Some(q) if q.eq_ignore_ascii_case("auth") || q.eq_ignore_ascii_case("auth-int") =>
                md5_hex(&format!("{}:{}:{}:{}:{}:{}", ha1, nonce, nc, cnonce, q, ha2)),
            _ => md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2))
        };

        if expected != response.to_ascii_lowercase() {
            return Verdict::Rejected
        }

        if qop.is_some() {
            // The nonce count must strictly increase per client.
            let count = match u32::from_str_radix(nc, 16) {
                Ok(c) => c,
                Err(_) => {
                    debug!("unparseable digest nonce count: {:?}", nc);
                    return Verdict::Rejected
                }
            };
            if count <= state.last_nc {
                return Verdict::Stale
            }
            state.last_nc = count;
        }

        Verdict::Accepted { username }
    }
}

/// Compute the value of a Basic `Authorization` header.
pub fn basic_authorization(username: &str, password: &str) -> String {
    format!("Basic {}", base64::encode(format!("{}:{}", username, password)))
}

/// Compute the value of a Digest `Authorization` header answering the
/// given challenge (client side, `qop=auth`).
pub fn digest_authorization(
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    challenge: &Challenge,
    cnonce: &str,
    nc: u32
) -> Option<String> {
    let (realm, nonce, opaque) = match challenge {
        Challenge::Digest { realm, nonce, opaque, .. } => (realm, nonce, opaque),
        Challenge::Basic { .. } => return None
    };
    let ha1 = md5_hex(&format!("{}:{}:{}", username, realm, password));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));
    let nc_hex = format!("{:08x}", nc);
    let response = md5_hex(&format!("{}:{}:{}:{}:auth:{}", ha1, nonce, nc_hex, cnonce, ha2));
    Some(format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", \
         algorithm=MD5, qop=auth, nc={}, cnonce=\"{}\", response=\"{}\", opaque=\"{}\"",
        username, realm, nonce, uri, nc_hex, cnonce, response, opaque
    ))
}

fn md5_hex(input: &str) -> String {
    let mut h = Md5::new();
    h.update(input.as_bytes());
    hex(&h.finalize())
}

fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b))
    }
    s
}

/// Authentication errors.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The header value could not be parsed.
    #[error("malformed authentication header")]
    Malformed
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use super::*;

    fn users(name: &str) -> Option<String> {
        if name == "mufasa" {
            Some("Circle Of Life".to_string())
        } else {
            None
        }
    }

    #[test]
    fn rfc2617_digest_vector() {
        // The worked example of RFC 2617, section 3.5.
        let ha1 = md5_hex("Mufasa:testrealm@host.com:Circle Of Life");
        let ha2 = md5_hex("GET:/dir/index.html");
        let response = md5_hex(&format!(
            "{}:dcd98b7102dd2f0e8b11d0f600bfb0c093:00000001:0a4f113b:auth:{}",
            ha1, ha2
        ));
        assert_eq!(response, "6629fae49393a05397450978507c4ef1")
    }

    #[test]
    fn basic_roundtrip() {
        let auth = Authenticator::new(Schemes::BASIC, "realm", users);
        let mut state = DigestState::default();
        let header = basic_authorization("mufasa", "Circle Of Life");
        assert_matches!(
            auth.verify(Some(&header), "GET", &mut state),
            Verdict::Accepted { username } if username == "mufasa"
        );
        let bad = basic_authorization("mufasa", "wrong");
        assert_matches!(auth.verify(Some(&bad), "GET", &mut state), Verdict::Rejected);
        assert_matches!(auth.verify(None, "GET", &mut state), Verdict::Rejected)
    }

    #[test]
    fn digest_roundtrip_and_nonce_count() {
        let auth = Authenticator::new(Schemes::DIGEST, "realm", users);
        let mut state = DigestState::default();
        let challenges = auth.challenges(&mut state, false);
        assert_eq!(challenges.len(), 1);
        let challenge = &challenges[0];

        let value = digest_authorization(
            "mufasa", "Circle Of Life", "GET", "/chat", challenge, "abc123", 1
        ).unwrap();
        assert_matches!(
            auth.verify(Some(&value), "GET", &mut state),
            Verdict::Accepted { .. }
        );

        // Replaying the same nonce count is stale.
        assert_matches!(auth.verify(Some(&value), "GET", &mut state), Verdict::Stale);

        // A higher count passes again.
        let next = digest_authorization(
            "mufasa", "Circle Of Life", "GET", "/chat", challenge, "abc124", 2
        ).unwrap();
        assert_matches!(auth.verify(Some(&next), "GET", &mut state), Verdict::Accepted { .. })
    }

    #[test]
    fn digest_wrong_password_rejected() {
        let auth = Authenticator::new(Schemes::DIGEST, "realm", users);
        let mut state = DigestState::default();
        let challenge = &auth.challenges(&mut state, false)[0];
        let value = digest_authorization("mufasa", "nope", "GET", "/", challenge, "c", 1).unwrap();
        assert_matches!(auth.verify(Some(&value), "GET", &mut state), Verdict::Rejected)
    }

    #[test]
    fn unknown_nonce_is_stale() {
        let auth = Authenticator::new(Schemes::DIGEST, "realm", users);
        let mut state = DigestState::default();
        let _ = auth.challenges(&mut state, false);
        let other = Challenge::digest("realm");
        let value = digest_authorization("mufasa", "Circle Of Life", "GET", "/", &other, "c", 1).unwrap();
        assert_matches!(auth.verify(Some(&value), "GET", &mut state), Verdict::Stale)
    }

    #[test]
    fn challenge_formatting() {
        let c = Challenge::basic("chat");
        assert_eq!(c.to_string(), "Basic realm=\"chat\"");
        let d = Challenge::digest("chat");
        let s = d.to_string();
        assert!(s.starts_with("Digest realm=\"chat\", nonce=\""), "{}", s);
        assert!(s.contains("algorithm=MD5"));
        assert!(s.contains("qop=\"auth\""))
    }

    #[test]
    fn challenge_parse_roundtrip() {
        let basic = Challenge::parse("Basic realm=\"chat\"").unwrap();
        assert_matches!(basic, Challenge::Basic { realm } if realm == "chat");

        let original = Challenge::digest("chat");
        let parsed = Challenge::parse(&original.to_string()).unwrap();
        assert_eq!(parsed.nonce(), original.nonce());
        assert_matches!(parsed, Challenge::Digest { stale: false, .. });

        let stale = Challenge::parse(
            "Digest realm=\"r\", nonce=\"n\", opaque=\"o\", algorithm=MD5, qop=\"auth\", stale=true"
        ).unwrap();
        assert_matches!(stale, Challenge::Digest { stale: true, .. });

        assert_matches!(Challenge::parse("Negotiate blob"), Err(Error::Malformed))
    }

    #[test]
    fn header_parsing() {
        let h = AuthHeader::parse("Digest realm=\"r\", nonce=\"abc\", qop=auth").unwrap();
        assert_eq!(h.scheme(), "Digest");
        assert_eq!(h.param("realm"), Some("r"));
        assert_eq!(h.param("nonce"), Some("abc"));
        assert_eq!(h.param("qop"), Some("auth"));

        let b = AuthHeader::parse("Basic dXNlcjpwYXNz").unwrap();
        assert_eq!(b.scheme(), "Basic");
        assert_eq!(b.token(), Some("dXNlcjpwYXNz"));

        assert_matches!(AuthHeader::parse(""), Err(Error::Malformed))
    }
}
