//! Request routing: map URL patterns and HTTP methods to handler functions.
//!
//! This module provides [`Router`], which resolves each incoming request to
//! exactly one outcome, in this order:
//!
//! 1. The first registered route whose [`Pattern`] matches the path. If the
//!    method is not in the route's allowed set the answer is `405`.
//! 2. The first static root holding the path as a regular file.
//! 3. `404`, through the registered error handler or the built-in page.
//!
//! | Pattern              | Example match   | Captured params              |
//! |----------------------|-----------------|------------------------------|
//! | `/users`             | `/users/`       | *(none)*                     |
//! | `/users/<id>`        | `/users/42`     | `id → "42"`                  |
//! | `/<name>:<age>`      | `/ann:31`       | `name → "ann"`, `age → "31"` |
//!
//! No uniqueness check is made at registration: when two patterns match, the
//! one registered first wins.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::http::{Headers, Method, Request, Response, StatusCode};

pub mod pattern;
pub mod static_files;

pub use pattern::{Pattern, PatternError, RouteParams};

/// Type-erased, heap-allocated async handler.
///
/// Handlers receive the parsed [`Request`] and the [`Response`] they must write
/// to. You never construct this type directly; use [`Router::route`] or one of
/// the method-specific helpers.
pub type Handler = Arc<dyn Fn(Request, Response) -> BoxFuture + Send + Sync + 'static>;

/// The boxed future a [`Handler`] returns.
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Placeholder replaced by the request path in the 404 page template.
pub const PATHNAME_PLACEHOLDER: &str = "{{ pathname }}";

/// Built-in 404 page, used when no template file is configured.
pub const DEFAULT_NOT_FOUND_PAGE: &str = "<!DOCTYPE html>
<html>
<head><meta charset=\"utf-8\"><title>404 Not Found</title></head>
<body>
<h1>404: Not Found</h1>
<p>The requested URL <code>{{ pathname }}</code> was not found on this server.</p>
</body>
</html>
";

// A single registered route binding a pattern and method set to a handler.
struct Route {
    pattern: Pattern,
    methods: Vec<Method>,
    handler: Handler,
}

/// Ordered route table plus error handlers and static roots.
///
/// Populate it during setup, then hand it to [`Server::bind`](crate::Server::bind);
/// it is read-only while serving.
///
/// # Examples
///
/// ```rust,no_run
/// use netjin::{Method, Request, Response, Router, StatusCode};
///
/// # fn main() -> Result<(), netjin::router::PatternError> {
/// let mut router = Router::new();
///
/// router.get("/ping", |_req, res: Response| async move {
///     res.send("pong").await;
/// })?;
///
/// router.route("/users/<id>", &[Method::Get, Method::Delete], |req: Request, res: Response| async move {
///     let id = req.param("id").unwrap_or("unknown").to_owned();
///     res.send(id).await;
/// })?;
///
/// router.on_error(StatusCode::NOT_FOUND, |_req, res: Response| async move {
///     res.send_with("nothing here", StatusCode::NOT_FOUND, Default::default()).await;
/// });
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    error_handlers: HashMap<u16, Handler>,
    static_roots: Vec<PathBuf>,
    not_found_template: Option<PathBuf>,
}

impl Router {
    /// Create a new, empty `Router`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `pattern` and the given methods.
    ///
    /// An empty method list means `GET` only.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] if `pattern` is malformed.
    pub fn route<H, F>(&mut self, pattern: &str, methods: &[Method], handler: H) -> Result<(), PatternError>
    where
        H: Fn(Request, Response) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let pattern = Pattern::compile(pattern)?;
        let methods = if methods.is_empty() {
            vec![Method::Get]
        } else {
            methods.to_vec()
        };
        debug!(pattern = pattern.as_str(), ?methods, "route registered");
        self.routes.push(Route {
            pattern,
            methods,
            handler: erase(handler),
        });
        Ok(())
    }

    /// Register a handler for `GET` requests matching `pattern`.
    pub fn get<H, F>(&mut self, pattern: &str, handler: H) -> Result<(), PatternError>
    where
        H: Fn(Request, Response) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.route(pattern, &[Method::Get], handler)
    }

    /// Register a handler for `POST` requests matching `pattern`.
    pub fn post<H, F>(&mut self, pattern: &str, handler: H) -> Result<(), PatternError>
    where
        H: Fn(Request, Response) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.route(pattern, &[Method::Post], handler)
    }

    /// Register a handler for `PUT` requests matching `pattern`.
    pub fn put<H, F>(&mut self, pattern: &str, handler: H) -> Result<(), PatternError>
    where
        H: Fn(Request, Response) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.route(pattern, &[Method::Put], handler)
    }

    /// Register a handler for `PATCH` requests matching `pattern`.
    pub fn patch<H, F>(&mut self, pattern: &str, handler: H) -> Result<(), PatternError>
    where
        H: Fn(Request, Response) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.route(pattern, &[Method::Patch], handler)
    }

    /// Register a handler for `DELETE` requests matching `pattern`.
    pub fn delete<H, F>(&mut self, pattern: &str, handler: H) -> Result<(), PatternError>
    where
        H: Fn(Request, Response) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.route(pattern, &[Method::Delete], handler)
    }

    /// Register the handler invoked for `status` (404 and 405 are consulted).
    ///
    /// A later registration for the same status replaces the earlier one.
    pub fn on_error<H, F>(&mut self, status: StatusCode, handler: H)
    where
        H: Fn(Request, Response) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.error_handlers.insert(status.as_u16(), erase(handler));
    }

    /// Append a directory to the static roots searched for unrouted paths.
    pub fn static_dir(&mut self, root: impl Into<PathBuf>) {
        self.static_roots.push(root.into());
    }

    /// Use the file at `path` as the built-in 404 page template.
    pub fn not_found_template(&mut self, path: impl Into<PathBuf>) {
        self.not_found_template = Some(path.into());
    }

    /// Returns the static roots in search order.
    pub fn static_roots(&self) -> &[PathBuf] {
        &self.static_roots
    }

    /// Return the number of routes registered in this router.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve `request` and write exactly one response through `response`.
    ///
    /// A request without a method or path is dropped without a response.
    pub async fn dispatch(&self, mut request: Request, response: Response) {
        if request.method().as_str().is_empty() || request.path().is_empty() {
            debug!("request without method or path, closing");
            return;
        }

        let decoded = pattern::percent_decode(request.path());

        for route in &self.routes {
            let Some(params) = route.pattern.matches_decoded(&decoded) else {
                continue;
            };

            if !route.methods.contains(request.method()) {
                debug!(
                    method = %request.method(),
                    path = request.path(),
                    pattern = route.pattern.as_str(),
                    "method not allowed"
                );
                self.method_not_allowed(request, response).await;
                return;
            }

            request.merge_route_params(params);
            (route.handler)(request, response).await;
            return;
        }

        if let Some(file) = static_files::lookup(&self.static_roots, &decoded).await {
            response
                .send_file(file.file, file.len, file.content_type)
                .await;
            return;
        }

        self.not_found(request, response).await;
    }

    async fn method_not_allowed(&self, request: Request, response: Response) {
        if let Some(handler) = self.error_handlers.get(&StatusCode::METHOD_NOT_ALLOWED.as_u16()) {
            handler(request, response).await;
            return;
        }

        let body = format!(
            "Method '{}' on route '{}' not allowed",
            request.method(),
            request.path()
        );
        response
            .send_with(body, StatusCode::METHOD_NOT_ALLOWED, Headers::new())
            .await;
    }

    async fn not_found(&self, request: Request, response: Response) {
        if let Some(handler) = self.error_handlers.get(&StatusCode::NOT_FOUND.as_u16()) {
            handler(request, response).await;
            return;
        }

        let path = request.path();
        let page = match &self.not_found_template {
            None => Some(DEFAULT_NOT_FOUND_PAGE.to_owned()),
            Some(template) => match tokio::fs::read_to_string(template).await {
                Ok(source) => Some(source),
                Err(e) => {
                    warn!(template = %template.display(), error = %e, "404 template unavailable");
                    None
                }
            },
        };

        let (body, content_type) = match page {
            Some(page) => (
                page.replace(PATHNAME_PLACEHOLDER, &escape_html(path)),
                "text/html; charset=utf-8",
            ),
            None => (format!("Not Found: {path}"), "text/plain; charset=utf-8"),
        };
        let headers = Headers::from_iter([("Content-Type", content_type)]);
        response
            .send_with(body, StatusCode::NOT_FOUND, headers)
            .await;
    }
}

// Erase the concrete handler type and store it as a `Handler` trait object.
fn erase<H, F>(handler: H) -> Handler
where
    H: Fn(Request, Response) -> F + Send + Sync + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |request: Request, response: Response| -> BoxFuture {
        Box::pin(handler(request, response))
    })
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::AsyncReadExt;

    use super::*;

    async fn dispatch(router: &Router, method: &str, path: &str) -> String {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let request = Request::parse(raw.as_bytes()).unwrap();
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        router.dispatch(request, Response::new(server)).await;
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    fn body(wire: &str) -> &str {
        wire.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("")
    }

    #[test]
    fn router_starts_empty() {
        let router = Router::new();
        assert!(router.is_empty());
        assert_eq!(router.len(), 0);
    }

    #[test]
    fn malformed_pattern_fails_registration() {
        let mut router = Router::new();
        let err = router.get("/<id>/<id>", |_req, _res| async {});
        assert!(matches!(err, Err(PatternError::DuplicateName { .. })));
        assert!(router.is_empty());
    }

    #[tokio::test]
    async fn empty_router_returns_404_with_path() {
        let router = Router::new();
        let wire = dispatch(&router, "GET", "/missing/page").await;
        assert!(wire.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(wire.contains("Content-Type: text/html; charset=utf-8"));
        assert!(body(&wire).contains("/missing/page"));
        assert!(!body(&wire).contains(PATHNAME_PLACEHOLDER));
    }

    #[tokio::test]
    async fn get_route_matches() {
        let mut router = Router::new();
        router
            .get("/hello", |_req, res: Response| async move {
                res.send("hi").await;
            })
            .unwrap();
        let wire = dispatch(&router, "GET", "/hello/").await;
        assert!(wire.starts_with("HTTP/1.1 200 OK"));
        assert_eq!(body(&wire), "hi");
    }

    #[tokio::test]
    async fn wrong_method_is_405_and_handler_not_called() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut router = Router::new();
        router
            .get("/hello", move |_req, res: Response| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    res.send("hi").await;
                }
            })
            .unwrap();

        let wire = dispatch(&router, "POST", "/hello").await;
        assert!(wire.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert_eq!(body(&wire), "Method 'POST' on route '/hello' not allowed");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn custom_405_handler() {
        let mut router = Router::new();
        router.get("/only-get", |_req, _res| async {}).unwrap();
        router.on_error(StatusCode::METHOD_NOT_ALLOWED, |req: Request, res: Response| async move {
            res.send_with(
                format!("no {}", req.method()),
                StatusCode::METHOD_NOT_ALLOWED,
                Headers::new(),
            )
            .await;
        });
        let wire = dispatch(&router, "DELETE", "/only-get").await;
        assert!(wire.starts_with("HTTP/1.1 405"));
        assert_eq!(body(&wire), "no DELETE");
    }

    #[tokio::test]
    async fn custom_404_handler() {
        let mut router = Router::new();
        router.on_error(StatusCode::NOT_FOUND, |_req, res: Response| async move {
            res.send_with("<h1>404: Not Found</h1>", StatusCode::NOT_FOUND, Headers::new())
                .await;
        });
        let wire = dispatch(&router, "GET", "/nowhere").await;
        assert_eq!(body(&wire), "<h1>404: Not Found</h1>");
    }

    #[tokio::test]
    async fn first_matching_route_wins() {
        let mut router = Router::new();
        router
            .get("/users/<id>", |_req, res: Response| async move {
                res.send("param").await;
            })
            .unwrap();
        router
            .get("/users/me", |_req, res: Response| async move {
                res.send("literal").await;
            })
            .unwrap();
        let wire = dispatch(&router, "GET", "/users/me").await;
        assert_eq!(body(&wire), "param");
    }

    #[tokio::test]
    async fn first_match_decides_method_check() {
        let mut router = Router::new();
        router.post("/item", |_req, _res| async {}).unwrap();
        router
            .get("/item", |_req, res: Response| async move {
                res.send("unreachable").await;
            })
            .unwrap();
        let wire = dispatch(&router, "GET", "/item").await;
        assert!(wire.starts_with("HTTP/1.1 405"));
    }

    #[tokio::test]
    async fn route_params_reach_handler_decoded() {
        let mut router = Router::new();
        router
            .route("/test/<name>/<userid>", &[], |req: Request, res: Response| async move {
                let out = format!(
                    "{}:{}",
                    req.param("name").unwrap_or_default(),
                    req.param("userid").unwrap_or_default()
                );
                res.send(out).await;
            })
            .unwrap();
        let wire = dispatch(&router, "GET", "/test/open%20ai/42").await;
        assert_eq!(body(&wire), "open ai:42");
    }

    #[tokio::test]
    async fn multiple_methods_and_update() {
        let mut router = Router::new();
        router
            .route("/r", &[Method::Put, Method::Update], |req: Request, res: Response| async move {
                res.send(req.method().to_string()).await;
            })
            .unwrap();
        assert_eq!(body(&dispatch(&router, "PUT", "/r").await), "PUT");
        assert_eq!(body(&dispatch(&router, "update", "/r").await), "UPDATE");
        assert!(dispatch(&router, "GET", "/r").await.starts_with("HTTP/1.1 405"));
    }

    #[tokio::test]
    async fn unrouted_path_falls_back_to_static_file() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("site.css"), "body{}").unwrap();
        let mut router = Router::new();
        router.static_dir(root.path());

        let wire = dispatch(&router, "GET", "/site.css").await;
        assert!(wire.starts_with("HTTP/1.1 200 OK"));
        assert!(wire.contains("Content-Type: text/css\r\n"));
        assert_eq!(body(&wire), "body{}");
    }

    #[tokio::test]
    async fn routes_take_precedence_over_static_files() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("about"), "file").unwrap();
        let mut router = Router::new();
        router.static_dir(root.path());
        router
            .get("/about", |_req, res: Response| async move {
                res.send("route").await;
            })
            .unwrap();
        assert_eq!(body(&dispatch(&router, "GET", "/about").await), "route");
    }

    #[tokio::test]
    async fn encoded_traversal_is_not_found() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("public");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("secret.txt"), "top secret").unwrap();
        let mut router = Router::new();
        router.static_dir(&root);

        let wire = dispatch(&router, "GET", "/%2e%2e%2fsecret.txt").await;
        assert!(wire.starts_with("HTTP/1.1 404"));
        assert!(!wire.contains("top secret"));
    }

    #[tokio::test]
    async fn configured_404_template_substitutes_path() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("404.html");
        std::fs::write(&template, "<p>gone: {{ pathname }}</p>").unwrap();
        let mut router = Router::new();
        router.not_found_template(&template);

        let wire = dispatch(&router, "GET", "/a&b").await;
        assert_eq!(body(&wire), "<p>gone: /a&amp;b</p>");
    }

    #[tokio::test]
    async fn unreadable_404_template_falls_back_to_inline_body() {
        let mut router = Router::new();
        router.not_found_template("/definitely/not/here/404.html");
        let wire = dispatch(&router, "GET", "/lost").await;
        assert!(wire.starts_with("HTTP/1.1 404"));
        assert!(wire.contains("Content-Type: text/plain; charset=utf-8"));
        assert_eq!(body(&wire), "Not Found: /lost");
    }

    #[test]
    fn escape_html_escapes_markup() {
        assert_eq!(escape_html("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
