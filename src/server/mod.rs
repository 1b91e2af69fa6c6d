//! Async TCP server using Tokio.
//!
//! One accept loop per listener; every accepted connection gets its own task
//! that reads one request head, dispatches it through the shared [`Router`],
//! writes one response, and closes. There are no persistent connections.
//!
//! Request heads must fit in `max_request_bytes`. A head that does not fit, or
//! that is malformed, or that does not arrive within `read_timeout_secs`, gets
//! the connection closed without a response.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, ServerConfig};
use crate::http::{ParseError, Request, Response};
use crate::router::Router;
use crate::template::{FileTemplates, TemplateRenderer};

pub mod shutdown;

pub use shutdown::Shutdown;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// Why reading a request head stopped short of a `Request`.
#[derive(Debug, Error)]
enum ReadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("peer closed the connection before sending a request")]
    Closed,

    #[error("request head exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

// Per-connection settings copied out of the config.
#[derive(Debug, Clone, Copy)]
struct ConnectionSettings {
    read_timeout: Duration,
    max_request_bytes: usize,
    debug: bool,
}

/// The netjin HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use netjin::{Response, Router, Server, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new();
///     router.get("/", |_req, res: Response| async move {
///         res.send("Hello!").await;
///     })?;
///
///     let server = Server::bind(ServerConfig::default(), router).await?;
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Arc<Router>,
    templates: Option<Arc<dyn TemplateRenderer>>,
    settings: ConnectionSettings,
}

impl Server {
    /// Binds a listener for `config` and takes ownership of the route table.
    ///
    /// The configured `static_dirs` are appended after any static roots the
    /// router already has, and a configured `not_found_template` replaces the
    /// router's. Unless replaced with [`with_templates`](Self::with_templates),
    /// templates are rendered from `template_dirs`.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Config`] if `config` fails validation.
    /// - [`ServerError::Bind`] if the address cannot be resolved or bound.
    pub async fn bind(config: ServerConfig, mut router: Router) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.address();
        let bind_err = |source| ServerError::Bind {
            addr: addr.clone(),
            source,
        };

        let socket_addr = tokio::net::lookup_host(&addr)
            .await
            .map_err(bind_err)?
            .next()
            .ok_or_else(|| {
                bind_err(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "host resolved to no addresses",
                ))
            })?;

        let socket = if socket_addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(socket_addr).map_err(bind_err)?;
        let listener = socket.listen(config.backlog).map_err(bind_err)?;
        let local_addr = listener.local_addr()?;

        for root in &config.static_dirs {
            router.static_dir(root.clone());
        }
        if let Some(template) = &config.not_found_template {
            router.not_found_template(template.clone());
        }

        let templates = (!config.template_dirs.is_empty()).then(|| {
            Arc::new(FileTemplates::new(config.template_dirs.iter().cloned()))
                as Arc<dyn TemplateRenderer>
        });

        Ok(Self {
            listener,
            local_addr,
            router: Arc::new(router),
            templates,
            settings: ConnectionSettings {
                read_timeout: config.read_timeout(),
                max_request_bytes: config.max_request_bytes,
                debug: config.debug,
            },
        })
    }

    /// Replaces the template renderer handed to every [`Response`].
    #[must_use]
    pub fn with_templates(mut self, templates: Arc<dyn TemplateRenderer>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves until the process receives Ctrl-C.
    ///
    /// # Errors
    ///
    /// See [`run_until`](Self::run_until).
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot listen for Ctrl-C, serving until killed");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serves until `shutdown` resolves.
    ///
    /// The listener is closed as soon as the shutdown future completes;
    /// connections already accepted keep running to completion on their own
    /// tasks.
    ///
    /// # Errors
    ///
    /// Accept failures are logged and do not end the loop, so this currently
    /// always returns `Ok(())`.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let Self {
            listener,
            local_addr,
            router,
            templates,
            settings,
        } = self;

        info!(address = %local_addr, "netjin listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };

                    debug!(peer = %peer_addr, "connection accepted");
                    let router = Arc::clone(&router);
                    let templates = templates.clone();
                    tokio::spawn(handle_connection(stream, peer_addr, router, templates, settings));
                }
            }
        }

        drop(listener);
        info!(address = %local_addr, "listener closed");
        Ok(())
    }
}

/// Handles a single TCP connection: one request, one response, close.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    router: Arc<Router>,
    templates: Option<Arc<dyn TemplateRenderer>>,
    settings: ConnectionSettings,
) {
    let read = tokio::time::timeout(
        settings.read_timeout,
        read_request(&mut stream, settings.max_request_bytes),
    )
    .await;

    let request = match read {
        Ok(Ok(request)) => request,
        Ok(Err(ReadError::Closed)) => {
            debug!(peer = %peer_addr, "connection closed by peer");
            return;
        }
        Ok(Err(e)) => {
            warn!(peer = %peer_addr, error = %e, "malformed request, closing without response");
            return;
        }
        Err(_) => {
            warn!(peer = %peer_addr, timeout = ?settings.read_timeout, "request read timed out");
            return;
        }
    };

    if settings.debug {
        info!(peer = %peer_addr, method = %request.method(), path = request.path(), "request");
    } else {
        debug!(peer = %peer_addr, method = %request.method(), path = request.path(), "request");
    }

    let mut response = Response::new(stream);
    if let Some(templates) = templates {
        response = response.with_templates(templates);
    }
    router.dispatch(request, response).await;
}

/// Reads until a complete request head is buffered, at most `limit` bytes.
async fn read_request(stream: &mut TcpStream, limit: usize) -> Result<Request, ReadError> {
    let mut buf = BytesMut::with_capacity(limit.min(4096));

    loop {
        let room = limit.saturating_sub(buf.len());
        if room == 0 {
            return Err(ReadError::TooLarge { limit });
        }

        let bytes_read = (&mut *stream).take(room as u64).read_buf(&mut buf).await?;
        if bytes_read == 0 {
            return Err(if buf.is_empty() {
                ReadError::Closed
            } else {
                ReadError::Parse(ParseError::Incomplete)
            });
        }

        match Request::parse(&buf) {
            Ok(request) => return Ok(request),
            Err(ParseError::Incomplete) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
