//! HTTP/1.1 request parsing using the [`httparse`] crate.

use std::collections::HashMap;

use thiserror::Error;
use url::Url;

use super::{Connection, Method};

/// Errors that can occur while parsing an HTTP/1.1 request head.
///
/// The server answers every one of these by closing the connection without
/// writing a response.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("request head is incomplete")]
    Incomplete,

    #[error("malformed request: {0}")]
    Malformed(#[from] httparse::Error),

    #[error("invalid request target {target:?}: {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: url::ParseError,
    },
}

/// A parsed HTTP/1.1 request.
///
/// Created by [`Request::parse`] from the bytes read off a connection. Only the
/// request line and header block are interpreted; bodies are never read.
///
/// # Examples
///
/// ```
/// use netjin::http::{Method, Request};
///
/// let raw = b"get /hello?name=world HTTP/1.1\r\nHost: localhost:5500\r\nCookie: sid=abc\r\n\r\n";
/// let request = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method(), &Method::Get);
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.host(), "localhost:5500");
/// assert_eq!(request.query_param("name"), Some("world"));
/// assert_eq!(request.cookie("sid"), Some("abc"));
/// assert!(request.route_params().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    raw_url: String,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    host: String,
    connection: Option<Connection>,
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
    query_params: HashMap<String, String>,
    fragment_params: HashMap<String, String>,
    route_params: Option<HashMap<String, String>>,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parse a request head from a byte slice.
    ///
    /// Anything after the blank line that terminates the headers is ignored.
    ///
    /// # Errors
    ///
    /// - [`ParseError::Incomplete`]: the header terminator has not been seen yet.
    /// - [`ParseError::Malformed`]: the request line is not exactly
    ///   `METHOD SP TARGET SP VERSION`, or a header line is invalid.
    /// - [`ParseError::InvalidTarget`]: the target cannot form a URL.
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        if raw_req.parse(buf)?.is_partial() {
            return Err(ParseError::Incomplete);
        }

        // A complete parse always fills the request line.
        let (Some(method), Some(target), Some(version)) =
            (raw_req.method, raw_req.path, raw_req.version)
        else {
            return Err(ParseError::Incomplete);
        };
        let method: Method = match method.parse() {
            Ok(m) => m,
            Err(never) => match never {},
        };

        let mut header_map = HashMap::with_capacity(raw_req.headers.len());
        let mut host = String::new();
        let mut connection = None;
        let mut cookies = HashMap::new();

        for header in raw_req.headers.iter() {
            let Ok(value) = std::str::from_utf8(header.value) else {
                continue;
            };
            if header.name.eq_ignore_ascii_case("host") {
                host = value.trim().to_owned();
            } else if header.name.eq_ignore_ascii_case("connection") {
                connection = Connection::from_header(value);
            } else {
                if header.name.eq_ignore_ascii_case("cookie") {
                    cookies.extend(parse_cookies(value));
                }
                header_map.insert(header.name.to_owned(), value.to_owned());
            }
        }

        let (raw_url, url) = reconstruct_url(&host, target)?;

        Ok(Self {
            method,
            raw_url,
            path: url.path().to_owned(),
            version,
            host,
            connection,
            headers: header_map,
            cookies,
            query_params: url.query().map(parse_pairs).unwrap_or_default(),
            fragment_params: url.fragment().map(parse_pairs).unwrap_or_default(),
            route_params: None,
        })
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the reconstructed `http://host/target` URL.
    pub fn raw_url(&self) -> &str {
        &self.raw_url
    }

    /// Returns the request path, still percent-encoded, without query or fragment.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the `Host` header value, or an empty string when absent.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the parsed `Connection` header, if it held a known token.
    pub fn connection(&self) -> Option<Connection> {
        self.connection
    }

    /// Returns the remaining headers keyed exactly as received.
    ///
    /// `Host` and `Connection` are not in this map. On duplicate names the last
    /// occurrence wins.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Returns a header value by its exact, case-sensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Returns all cookies sent with the request.
    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    /// Returns a cookie value by name.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Returns all query parameters.
    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    /// Returns a parsed query parameter value by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query_params.get(key).map(String::as_str)
    }

    /// Returns the `key=value` pairs found in the URL fragment.
    pub fn fragment_params(&self) -> &HashMap<String, String> {
        &self.fragment_params
    }

    /// Returns the variables bound by the matched route.
    ///
    /// `None` until the router has matched the request.
    pub fn route_params(&self) -> Option<&HashMap<String, String>> {
        self.route_params.as_ref()
    }

    /// Returns a single route variable by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.route_params.as_ref()?.get(name).map(String::as_str)
    }

    /// Merges freshly matched route variables into [`route_params`](Self::route_params).
    pub(crate) fn merge_route_params(&mut self, params: HashMap<String, String>) {
        match &mut self.route_params {
            Some(existing) => existing.extend(params),
            None => self.route_params = Some(params),
        }
    }
}

/// Returns the `http://<host><target>` URL for display, and the target
/// decomposed with the WHATWG URL rules against a fixed `localhost` base.
///
/// Only the target decides the routed path; the client's `Host` never does.
fn reconstruct_url(host: &str, target: &str) -> Result<(String, Url), ParseError> {
    let raw_url = if target.starts_with('/') {
        format!("http://{host}{target}")
    } else {
        target.to_owned()
    };

    let parsed = if target.starts_with('/') {
        Url::parse(&format!("http://localhost{target}"))
    } else {
        Url::parse(target).or_else(|_| Url::parse(&format!("http://localhost/{target}")))
    };

    let url = parsed.map_err(|source| ParseError::InvalidTarget {
        target: target.to_owned(),
        source,
    })?;

    Ok((raw_url, url))
}

/// Parses `key=value&key2=value2` pairs.
///
/// `+` is decoded as a space and percent escapes are decoded. A key with no `=`
/// gets an empty value; the last duplicate wins.
fn parse_pairs(input: &str) -> HashMap<String, String> {
    input
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}

/// Parses a `Cookie` header value (`a=1; b=2`). Entries without `=` are skipped.
fn parse_cookies(value: &str) -> impl Iterator<Item = (String, String)> + '_ {
    value.split(';').filter_map(|part| {
        let (name, value) = part.split_once('=')?;
        let name = name.trim();
        (!name.is_empty()).then(|| (name.to_owned(), value.trim().to_owned()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/");
        assert_eq!(req.version(), 1);
        assert_eq!(req.host(), "localhost");
        assert_eq!(req.raw_url(), "http://localhost/");
    }

    #[test]
    fn host_and_connection_leave_header_map() {
        let raw = b"GET / HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\nAccept: */*\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.connection(), Some(Connection::Close));
        assert!(req.header("Host").is_none());
        assert!(req.header("Connection").is_none());
        assert_eq!(req.header("Accept"), Some("*/*"));
        assert_eq!(req.headers().len(), 1);
    }

    #[test]
    fn header_names_are_case_sensitive_and_last_wins() {
        let raw = b"GET / HTTP/1.1\r\nX-Tag: one\r\nX-Tag: two\r\nx-tag: lower\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.header("X-Tag"), Some("two"));
        assert_eq!(req.header("x-tag"), Some("lower"));
    }

    #[test]
    fn query_string_is_decomposed() {
        let raw = b"GET /search?q=rust+lang&page=2&flag&name=a%26b HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_param("q"), Some("rust lang"));
        assert_eq!(req.query_param("page"), Some("2"));
        assert_eq!(req.query_param("flag"), Some(""));
        assert_eq!(req.query_param("name"), Some("a&b"));
    }

    #[test]
    fn fragment_pairs_are_decomposed() {
        let raw = b"GET /doc#section=intro&line=4 HTTP/1.1\r\nHost: h\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/doc");
        assert_eq!(req.fragment_params().get("section").map(String::as_str), Some("intro"));
        assert_eq!(req.fragment_params().get("line").map(String::as_str), Some("4"));
    }

    #[test]
    fn cookies_are_split() {
        let raw = b"GET / HTTP/1.1\r\nCookie: sid=abc; theme=dark;broken\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.cookie("sid"), Some("abc"));
        assert_eq!(req.cookie("theme"), Some("dark"));
        assert_eq!(req.cookies().len(), 2);
    }

    #[test]
    fn lowercase_method_is_normalized() {
        let req = Request::parse(b"delete /item HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.method(), &Method::Delete);
    }

    #[test]
    fn unknown_method_passes_through() {
        let req = Request::parse(b"PURGE /cache HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.method(), &Method::Custom("PURGE".into()));
    }

    #[test]
    fn path_stays_percent_encoded() {
        let req = Request::parse(b"GET /path/open%20ai HTTP/1.1\r\nHost: h\r\n\r\n").unwrap();
        assert_eq!(req.path(), "/path/open%20ai");
    }

    #[test]
    fn missing_host_still_yields_path() {
        let req = Request::parse(b"GET /no-host HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.host(), "");
        assert_eq!(req.path(), "/no-host");
    }

    #[test]
    fn host_header_does_not_change_routed_path() {
        let req = Request::parse(b"GET /public HTTP/1.1\r\nHost: h/admin\r\n\r\n").unwrap();
        assert_eq!(req.path(), "/public");
        assert_eq!(req.host(), "h/admin");
        assert_eq!(req.raw_url(), "http://h/admin/public");

        let req = Request::parse(b"GET /a?x=1 HTTP/1.1\r\nHost: evil.test:1/b?y=2#\r\n\r\n").unwrap();
        assert_eq!(req.path(), "/a");
        assert_eq!(req.query_param("x"), Some("1"));
        assert!(req.query_param("y").is_none());
    }

    #[test]
    fn request_line_needs_three_tokens() {
        assert!(matches!(
            Request::parse(b"GET /\r\n\r\n"),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            Request::parse(b"GET / HTTP/1.1 extra\r\n\r\n"),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(ParseError::Incomplete)));
    }

    #[test]
    fn route_params_merge() {
        let mut req = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(req.route_params().is_none());
        req.merge_route_params(HashMap::from([("a".into(), "1".into())]));
        req.merge_route_params(HashMap::from([("b".into(), "2".into())]));
        assert_eq!(req.param("a"), Some("1"));
        assert_eq!(req.param("b"), Some("2"));
    }
}
