//! HTTP/1.1 response writer.
//!
//! A [`Response`] owns the write half of one connection and commits exactly one
//! message to it. Every terminal operation ([`send`](Response::send),
//! [`send_with`](Response::send_with), [`json`](Response::json),
//! [`render`](Response::render), [`end`](Response::end)) consumes the response,
//! so a second write cannot be expressed.

use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, warn};

use super::headers::clean_value;
use super::{Headers, StatusCode};
use crate::template::{TemplateError, TemplateRenderer};

/// Boxed write half of a client connection.
pub type Transport = Box<dyn AsyncWrite + Send + Unpin>;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const TEXT_HTML: &str = "text/html; charset=utf-8";
const APPLICATION_JSON: &str = "application/json; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

/// Body sent when a value handed to [`Response::json`] cannot be serialized.
const SERIALIZE_FAILED: &str = "Cannot serialize data";

/// Content handed to [`Response::send`].
///
/// The variant decides the default `Content-Type`.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// UTF-8 text, tagged `text/plain`.
    Text(String),
    /// Raw bytes, tagged `application/octet-stream`.
    Binary(Vec<u8>),
    /// Structured data, encoded as JSON text and tagged `application/json`.
    Json(serde_json::Value),
}

impl Body {
    fn default_content_type(&self) -> &'static str {
        match self {
            Self::Text(_) => TEXT_PLAIN,
            Self::Binary(_) => OCTET_STREAM,
            Self::Json(_) => APPLICATION_JSON,
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Binary(bytes) => bytes,
            // Display for Value is infallible and yields compact JSON.
            Self::Json(value) => value.to_string().into_bytes(),
        }
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Write-side handle for a single HTTP exchange.
///
/// # Examples
///
/// ```
/// use netjin::http::Response;
/// use tokio::io::AsyncReadExt;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (mut client, server) = tokio::io::duplex(1024);
///
/// let written = Response::new(server).header("X-Id", "7").send("hello").await;
///
/// let mut wire = String::new();
/// client.read_to_string(&mut wire).await.unwrap();
/// assert_eq!(written, wire.len());
/// assert!(wire.starts_with("HTTP/1.1 200 OK\r\nContent-Length: 5\r\n"));
/// assert!(wire.ends_with("\r\n\r\nhello"));
/// # }
/// ```
pub struct Response {
    transport: Transport,
    headers: Headers,
    reason: Option<String>,
    templates: Option<Arc<dyn TemplateRenderer>>,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("headers", &self.headers)
            .field("reason", &self.reason)
            .field("templates", &self.templates.is_some())
            .finish_non_exhaustive()
    }
}

impl Response {
    /// Wraps the write half of a connection.
    pub fn new(transport: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            headers: Headers::new(),
            reason: None,
            templates: None,
        }
    }

    /// Overrides the reason phrase written after the status code.
    ///
    /// Without an override the canonical phrase for the status is used. CR,
    /// LF and NUL are dropped from `phrase`.
    #[must_use]
    pub fn reason(mut self, phrase: impl Into<String>) -> Self {
        self.reason = Some(clean_value(phrase.into()));
        self
    }

    /// Attaches the template renderer used by [`render`](Self::render).
    #[must_use]
    pub fn with_templates(mut self, templates: Arc<dyn TemplateRenderer>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Sets a header to be written with the message.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Sets a header in place.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Returns the headers accumulated so far.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Sends `content` with status `200 OK`.
    ///
    /// Returns the number of bytes written, or `0` if the transport failed.
    pub async fn send(self, content: impl Into<Body>) -> usize {
        self.send_with(content, StatusCode::OK, Headers::new()).await
    }

    /// Sends `content` with an explicit status and extra headers.
    ///
    /// `headers` override any header of the same name set earlier through
    /// [`header`](Self::header); defaults are only added for names still absent.
    pub async fn send_with(
        mut self,
        content: impl Into<Body>,
        status: StatusCode,
        headers: Headers,
    ) -> usize {
        let body = content.into();
        self.apply_headers(headers, body.default_content_type());

        let reason = self.reason_phrase(status);
        let wire = serialize(status, reason, &self.headers, &body.into_bytes());
        debug!(status = status.as_u16(), bytes = wire.len(), "writing response");
        write_and_close(self.transport, &wire).await
    }

    /// Streams `len` bytes of `file` as the body with status `200 OK`.
    ///
    /// Only the head is buffered; the body is copied straight from the file to
    /// the connection. Returns the number of bytes written, or `0` on failure.
    pub async fn send_file(mut self, file: File, len: u64, content_type: &str) -> usize {
        self.apply_headers(
            Headers::from_iter([("Content-Type", content_type)]),
            OCTET_STREAM,
        );

        let reason = self.reason_phrase(StatusCode::OK);
        let head = serialize_head(StatusCode::OK, reason, &self.headers, len);
        debug!(bytes = len, "streaming file response");
        stream_and_close(self.transport, &head, file, len).await
    }

    // Merges caller headers and fills in defaults. `Content-Length` is always
    // computed from the body, so a caller-supplied one is discarded.
    fn apply_headers(&mut self, headers: Headers, content_type: &str) {
        self.headers.merge(headers);
        self.headers.remove("Content-Length");
        self.headers.set_default("Content-Type", content_type);
        self.headers.set_default("X-Content-Type-Options", "nosniff");
        self.headers.set_default("Connection", "close");
    }

    fn reason_phrase(&self, status: StatusCode) -> &str {
        self.reason
            .as_deref()
            .unwrap_or_else(|| status.canonical_reason())
    }

    /// Serializes `value` as JSON and sends it with status `200 OK`.
    ///
    /// A value that fails to serialize degrades to a `text/plain` body.
    pub async fn json<T: Serialize + ?Sized>(self, value: &T) -> usize {
        match serde_json::to_value(value) {
            Ok(json) => self.send(Body::Json(json)).await,
            Err(e) => {
                warn!(error = %e, "response value is not serializable");
                self.send_with(
                    SERIALIZE_FAILED,
                    StatusCode::OK,
                    Headers::from_iter([("Content-Type", TEXT_PLAIN)]),
                )
                .await
            }
        }
    }

    /// Renders `template` with `context` and sends it as HTML.
    ///
    /// A missing template produces a `404` with body `File Not Found`; any other
    /// rendering failure produces a `500`.
    pub async fn render(self, template: &str, context: serde_json::Value) -> usize {
        let Some(templates) = self.templates.clone() else {
            warn!(template, "render called without a template renderer");
            return self.not_found_template().await;
        };

        let name = template.to_owned();
        let rendered =
            tokio::task::spawn_blocking(move || templates.render(&name, &context)).await;

        match rendered {
            Ok(Ok(html)) => {
                self.send_with(
                    html,
                    StatusCode::OK,
                    Headers::from_iter([("Content-Type", TEXT_HTML)]),
                )
                .await
            }
            Ok(Err(TemplateError::NotFound(name))) => {
                debug!(template = %name, "template not found");
                self.not_found_template().await
            }
            Ok(Err(e)) => {
                error!(template, error = %e, "template rendering failed");
                self.send_with(
                    "Template Error",
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Headers::new(),
                )
                .await
            }
            Err(e) => {
                error!(template, error = %e, "template task failed");
                self.send_with(
                    "Template Error",
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Headers::new(),
                )
                .await
            }
        }
    }

    /// Sends an empty body with `status` and `Connection: close`.
    pub async fn end(self, status: StatusCode) -> usize {
        self.send_with(
            String::new(),
            status,
            Headers::from_iter([("Connection", "close")]),
        )
        .await
    }

    async fn not_found_template(self) -> usize {
        self.send_with(
            "File Not Found",
            StatusCode::NOT_FOUND,
            Headers::from_iter([("Connection", "close")]),
        )
        .await
    }
}

/// Serializes one message in HTTP/1.1 wire format.
///
/// `Content-Length` always comes first, followed by `headers` in order.
pub(crate) fn serialize(
    status: StatusCode,
    reason: &str,
    headers: &Headers,
    body: &[u8],
) -> BytesMut {
    let mut buf = serialize_head(status, reason, headers, body.len() as u64);
    buf.put(body);
    buf
}

/// Serializes the status line and header block, including the blank line.
fn serialize_head(
    status: StatusCode,
    reason: &str,
    headers: &Headers,
    content_length: u64,
) -> BytesMut {
    let mut buf = BytesMut::with_capacity(128 + headers.len() * 64);

    buf.put(
        format!(
            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\n",
            status.as_u16(),
            reason,
            content_length
        )
        .as_bytes(),
    );
    buf.put(headers.to_string().as_bytes());

    // Header/body separator
    buf.put(&b"\r\n"[..]);

    buf
}

async fn write_and_close(mut transport: Transport, wire: &[u8]) -> usize {
    if let Err(e) = transport.write_all(wire).await {
        warn!(error = %e, "failed to send response");
        return 0;
    }
    if let Err(e) = transport.flush().await {
        warn!(error = %e, "failed to flush response");
        return 0;
    }
    // The message is already out; a failed shutdown only means the peer left first.
    if let Err(e) = transport.shutdown().await {
        debug!(error = %e, "connection shutdown failed");
    }
    wire.len()
}

async fn stream_and_close(mut transport: Transport, head: &[u8], file: File, len: u64) -> usize {
    if let Err(e) = transport.write_all(head).await {
        warn!(error = %e, "failed to send response head");
        return 0;
    }
    let copied = match tokio::io::copy(&mut file.take(len), &mut transport).await {
        Ok(copied) => copied,
        Err(e) => {
            warn!(error = %e, "failed to stream file body");
            return 0;
        }
    };
    if copied < len {
        // The file shrank after its length was taken; the peer sees a short body.
        warn!(expected = len, copied, "file ended early");
    }
    if let Err(e) = transport.flush().await {
        warn!(error = %e, "failed to flush response");
        return 0;
    }
    if let Err(e) = transport.shutdown().await {
        debug!(error = %e, "connection shutdown failed");
    }
    head.len() + copied as usize
}
