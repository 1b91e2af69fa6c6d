//! # netjin
//!
//! A small async HTTP/1.1 server library: one request per connection, regex
//! routes with named parameters, static files, and file templates.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netjin::{Request, Response, Router, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.get("/hello/<name>", |req: Request, res: Response| async move {
//!         let name = req.param("name").unwrap_or("world").to_owned();
//!         res.send(format!("Hello, {name}!")).await;
//!     })?;
//!
//!     let server = Server::bind(ServerConfig::default(), router).await?;
//!     println!("Listening on http://{}", server.local_addr());
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod http;
pub mod router;
pub mod server;
pub mod template;

pub use config::{ConfigError, ServerConfig};
pub use http::{Body, Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError, Shutdown};
pub use template::{FileTemplates, TemplateError, TemplateRenderer};
