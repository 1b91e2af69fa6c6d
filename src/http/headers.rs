//! Response header map with case-insensitive name lookup.
//!
//! Request headers are kept exactly as received (see [`Request::headers`]);
//! this type is what handlers use to build the header block of a response.
//!
//! [`Request::headers`]: crate::http::Request::headers

use std::fmt;

/// A case-insensitive, order-preserving HTTP header map.
///
/// Names compare ignoring ASCII case but are written out with the casing the
/// caller first supplied.
///
/// # Examples
///
/// ```
/// use netjin::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.set("Content-Type", "text/html");
/// headers.set_default("content-type", "text/plain");
/// headers.set_default("X-Content-Type-Options", "nosniff");
///
/// assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
/// assert_eq!(headers.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` to `value`, replacing every existing entry with that name.
    ///
    /// Bytes that are not valid in a header name are dropped from `name`, and
    /// CR, LF and NUL are dropped from `value`, so neither can start a new
    /// header line. A name left empty is ignored.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let Some(name) = clean_name(name.into()) else {
            return;
        };
        let value = clean_value(value.into());
        match self
            .inner
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(pos) => {
                self.inner[pos].1 = value;
                let mut index = 0;
                self.inner.retain(|(k, _)| {
                    let keep = index <= pos || !k.eq_ignore_ascii_case(&name);
                    index += 1;
                    keep
                });
            }
            None => self.inner.push((name, value)),
        }
    }

    /// Sets `name` only when no entry with that name exists yet.
    ///
    /// Returns `true` if the value was added. Names and values are cleaned as
    /// in [`set`](Self::set).
    pub fn set_default(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let Some(name) = clean_name(name.into()) else {
            return false;
        };
        if self.contains(&name) {
            return false;
        }
        self.inner.push((name, clean_value(value.into())));
        true
    }

    /// Merges `other` into `self`; entries from `other` win on name collisions.
    pub fn merge(&mut self, other: Headers) {
        for (name, value) in other.inner {
            self.set(name, value);
        }
    }

    /// Returns the value for the given header name (case-insensitive), or `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes all entries with the given header name (case-insensitive).
    ///
    /// Returns `true` if any entries were removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.inner.len() < before
    }

    /// Returns `true` if the map contains an entry with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Returns the number of header entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no header entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.set(name, value);
        }
        headers
    }
}

// RFC 9110 `token` characters.
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn clean_name(mut name: String) -> Option<String> {
    if !name.bytes().all(is_token_byte) {
        name.retain(|c| c.is_ascii() && is_token_byte(c as u8));
    }
    (!name.is_empty()).then_some(name)
}

pub(crate) fn clean_value(mut value: String) -> String {
    if value.contains(['\r', '\n', '\0']) {
        value.retain(|c| !matches!(c, '\r' | '\n' | '\0'));
    }
    value
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_get() {
        let mut h = Headers::new();
        h.set("Content-Type", "text/plain");
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("text/plain"));
    }

    #[test]
    fn set_replaces_existing_value() {
        let mut h = Headers::new();
        h.set("X-Foo", "a");
        h.set("Other", "b");
        h.set("x-foo", "c");
        assert_eq!(h.len(), 2);
        assert_eq!(h.get("X-FOO"), Some("c"));
        // First casing and position are kept.
        assert_eq!(h.iter().next(), Some(("X-Foo", "c")));
    }

    #[test]
    fn set_default_keeps_caller_value() {
        let mut h = Headers::new();
        h.set("connection", "keep-alive");
        assert!(!h.set_default("Connection", "close"));
        assert!(h.set_default("X-Content-Type-Options", "nosniff"));
        assert_eq!(h.get("Connection"), Some("keep-alive"));
    }

    #[test]
    fn merge_prefers_incoming() {
        let mut base: Headers = [("Content-Type", "text/plain"), ("X-A", "1")].into_iter().collect();
        let incoming: Headers = [("content-type", "text/html")].into_iter().collect();
        base.merge(incoming);
        assert_eq!(base.get("Content-Type"), Some("text/html"));
        assert_eq!(base.get("x-a"), Some("1"));
    }

    #[test]
    fn remove() {
        let mut h = Headers::new();
        h.set("X-Foo", "bar");
        assert!(h.remove("x-foo"));
        assert!(h.is_empty());
        assert!(!h.remove("x-foo"));
    }

    #[test]
    fn line_breaks_are_stripped_from_values() {
        let mut h = Headers::new();
        h.set("X-Name", "a\r\nSet-Cookie: admin=1");
        h.set_default("X-Other", "b\n\0c");
        assert_eq!(h.get("X-Name"), Some("aSet-Cookie: admin=1"));
        assert_eq!(h.get("X-Other"), Some("bc"));
        assert!(!h.contains("Set-Cookie"));
        assert_eq!(h.to_string().matches("\r\n").count(), 2);
    }

    #[test]
    fn invalid_name_bytes_are_dropped() {
        let mut h = Headers::new();
        h.set("X-Bad\r\nName: x", "1");
        assert_eq!(h.get("X-BadNamex"), Some("1"));
        h.set("\r\n", "ignored");
        assert!(!h.set_default(" :", "ignored"));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn display_is_wire_format() {
        let h: Headers = [("A", "1"), ("B", "2")].into_iter().collect();
        assert_eq!(h.to_string(), "A: 1\r\nB: 2\r\n");
    }
}
