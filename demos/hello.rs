//! A small site: rendered pages, a parameterised route, a JSON endpoint, and a
//! custom 404 page.
//!
//! ```text
//! cargo run --example hello              # defaults, http://127.0.0.1:5500
//! cargo run --example hello netjin.toml  # settings from a TOML file
//! ```
//!
//! Pages are rendered from `templates/` and unrouted paths are served from
//! `static/`, both relative to the working directory.

use netjin::{Headers, Request, Response, Router, Server, ServerConfig, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Serialize)]
struct User {
    name: &'static str,
    age: u8,
}

const USERS: &[User] = &[
    User { name: "Ada Lovelace", age: 36 },
    User { name: "Alan Turing", age: 41 },
    User { name: "Grace Hopper", age: 85 },
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netjin=debug,hello=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    let mut router = Router::new();

    for page in ["about", "contact"] {
        router.get(&format!("/{page}"), move |req: Request, res: Response| async move {
            res.render(page, json!({ "path": req.path() })).await;
        })?;
    }
    router.get("/", |_req, res: Response| async move {
        res.render("index", json!({ "title": "netjin" })).await;
    })?;

    router.get("/test/<name>/<userid>", |req: Request, res: Response| async move {
        tracing::info!(params = ?req.route_params(), "test route");
        res.send("Received").await;
    })?;

    router.post("/users", |_req, res: Response| async move {
        res.json(USERS).await;
    })?;

    router.on_error(StatusCode::NOT_FOUND, |_req, res: Response| async move {
        let headers = Headers::from_iter([("Content-Type", "text/html; charset=utf-8")]);
        res.send_with(
            "<title>Response 404</title><h1>404: Not Found</h1>",
            StatusCode::NOT_FOUND,
            headers,
        )
        .await;
    });

    let server = Server::bind(config, router).await?;
    tracing::info!("hello demo on http://{}", server.local_addr());
    server.run().await?;
    Ok(())
}
