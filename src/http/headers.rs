// Copyright (c) 2019 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! An ordered, case-insensitive header collection.
//!
//! The collection carries a mode tag. Inserting a header which only exists
//! in one direction locks the collection to that direction; adding an
//! opposite-direction field afterwards fails with [`Error::WrongDirection`].
//! Restricted fields (`Host`, `Content-Length`, ...) can not be mutated
//! through the public name-based API, only through the internal capability
//! path used by the transport machinery.

use super::field::{self, FieldInfo, REQUEST, RESPONSE};
use std::fmt;

/// Maximum length of a single header value.
const MAX_VALUE_LEN: usize = 65535;

/// The direction a header collection is used in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Not yet determined; the first direction-specific insertion decides.
    Unspecified,
    /// The collection belongs to a request.
    Request,
    /// The collection belongs to a response.
    Response
}

impl Mode {
    fn direction_bit(self) -> u8 {
        match self {
            Mode::Unspecified => REQUEST | RESPONSE,
            Mode::Request => REQUEST,
            Mode::Response => RESPONSE
        }
    }
}

/// An ordered multimap of header names to values.
#[derive(Debug, Clone)]
pub struct Headers {
    entries: Vec<(String, String)>,
    mode: Mode
}

impl Default for Headers {
    fn default() -> Self {
        Headers::new()
    }
}

impl Headers {
    /// Create an empty, untyped header collection.
    pub fn new() -> Self {
        Headers { entries: Vec::new(), mode: Mode::Unspecified }
    }

    /// Create an empty collection locked to the given mode.
    pub fn with_mode(mode: Mode) -> Self {
        Headers { entries: Vec::new(), mode }
    }

    /// The current collection mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The number of header entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Is this collection empty?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a header through the generic name-based API.
    ///
    /// Restricted fields are rejected; use the transport machinery to set
    /// them. Singleton fields replace an existing entry, multi-value
    /// fields append.
    pub fn add(&mut self, name: &str, value: &str) -> Result<(), Error> {
        let info = self.check(name, value)?;
        if info.map(|i| i.restricted).unwrap_or(false) {
            return Err(Error::Restricted(name.into()))
        }
        self.insert(name, value, info);
        Ok(())
    }

    /// Add a header through the internal capability path, bypassing the
    /// restricted-field check. Direction and syntax rules still apply.
    pub(crate) fn add_restricted(&mut self, name: &str, value: &str) -> Result<(), Error> {
        let info = self.check(name, value)?;
        self.insert(name, value, info);
        Ok(())
    }

    /// Get the first value of the given header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get all values of the given header, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries.iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Does the collection contain the given header?
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove all values of the given header.
    pub fn remove(&mut self, name: &str) -> Result<(), Error> {
        if field::lookup(name).map(|i| i.restricted).unwrap_or(false) {
            return Err(Error::Restricted(name.into()))
        }
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        Ok(())
    }

    /// Iterate over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Validate name, value and direction; returns the field metadata.
    fn check(&mut self, name: &str, value: &str) -> Result<Option<&'static FieldInfo>, Error> {
        if !field::is_token(name) {
            return Err(Error::InvalidName(name.into()))
        }
        let value = value.trim();
        if value.len() > MAX_VALUE_LEN {
            return Err(Error::ValueTooLong)
        }
        if !field::is_text(value) {
            return Err(Error::InvalidValue(name.into()))
        }

        let info = field::lookup(name);
        if let Some(i) = info {
            if i.direction & self.mode.direction_bit() == 0 {
                return Err(Error::WrongDirection(name.into()))
            }
            // The first direction-specific insertion types the collection.
            if self.mode == Mode::Unspecified {
                if i.direction == REQUEST {
                    self.mode = Mode::Request
                } else if i.direction == RESPONSE {
                    self.mode = Mode::Response
                }
            }
        }
        Ok(info)
    }

    fn insert(&mut self, name: &str, value: &str, info: Option<&'static FieldInfo>) {
        let value = value.trim();
        let multi = info
            .map(|i| i.multi_value & self.mode.direction_bit() != 0)
            .unwrap_or(true);
        if !multi {
            if let Some(entry) = self.entries.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                entry.1 = value.to_string();
                return
            }
        }
        self.entries.push((name.to_string(), value.to_string()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (name, value) in self.iter() {
            write!(f, "{}: {}\r\n", name, value)?
        }
        Ok(())
    }
}

/// Header collection errors.
#[non_exhaustive]
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// The header name is not a valid token.
    #[error("invalid header name: {0}")]
    InvalidName(String),

    /// The header value contains invalid octets.
    #[error("invalid value for header {0}")]
    InvalidValue(String),

    /// The header value exceeds 65535 bytes.
    #[error("header value too long")]
    ValueTooLong,

    /// The field does not exist in the direction this collection is
    /// typed for.
    #[error("header {0} not valid in this direction")]
    WrongDirection(String),

    /// The field is controlled by the transport machinery.
    #[error("header {0} is restricted")]
    Restricted(String)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use super::{Error, Headers, Mode};

    #[test]
    fn first_typed_add_locks_direction() {
        let mut h = Headers::new();
        assert_eq!(h.mode(), Mode::Unspecified);
        h.add("Accept", "text/html").unwrap();
        assert_eq!(h.mode(), Mode::Request);
        assert_matches!(h.add("Set-Cookie", "a=b"), Err(Error::WrongDirection(_)))
    }

    #[test]
    fn response_direction_locks_too() {
        let mut h = Headers::new();
        h.add("Server", "websock").unwrap();
        assert_eq!(h.mode(), Mode::Response);
        assert_matches!(h.add("Accept", "text/html"), Err(Error::WrongDirection(_)))
    }

    #[test]
    fn bidirectional_fields_do_not_lock() {
        let mut h = Headers::new();
        h.add("Cache-Control", "no-cache").unwrap();
        assert_eq!(h.mode(), Mode::Unspecified)
    }

    #[test]
    fn restricted_fields_need_capability() {
        let mut h = Headers::new();
        assert_matches!(h.add("Host", "example.com"), Err(Error::Restricted(_)));
        h.add_restricted("Host", "example.com").unwrap();
        assert_eq!(h.get("host"), Some("example.com"))
    }

    #[test]
    fn value_length_cap() {
        let mut h = Headers::new();
        let long = "x".repeat(65536);
        assert_matches!(h.add("X-Long", &long), Err(Error::ValueTooLong))
    }

    #[test]
    fn values_are_trimmed() {
        let mut h = Headers::new();
        h.add("X-Custom", "  value  ").unwrap();
        assert_eq!(h.get("x-custom"), Some("value"))
    }

    #[test]
    fn singleton_fields_replace() {
        let mut h = Headers::with_mode(Mode::Response);
        h.add("Content-Type", "text/plain").unwrap();
        h.add("Content-Type", "text/html").unwrap();
        assert_eq!(h.get_all("content-type").count(), 1);
        assert_eq!(h.get("Content-Type"), Some("text/html"))
    }

    #[test]
    fn multi_value_fields_append() {
        let mut h = Headers::with_mode(Mode::Response);
        h.add("Set-Cookie", "a=1").unwrap();
        h.add("Set-Cookie", "b=2").unwrap();
        assert_eq!(h.get_all("set-cookie").count(), 2)
    }

    #[test]
    fn invalid_names_rejected() {
        let mut h = Headers::new();
        assert_matches!(h.add("bad name", "v"), Err(Error::InvalidName(_)));
        assert_matches!(h.add("", "v"), Err(Error::InvalidName(_)))
    }
}
