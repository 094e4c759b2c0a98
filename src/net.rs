//! HTTP/WebSocket server setup: port binding with interactive fallback,
//! CORS, security headers, and the startup banner.

use crate::auth::AuthPredicate;
use crate::orchestrator::Orchestrator;
use crate::ws::{upgrade, WsState};
use anyhow::Result;
use axum::http::{header, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub async fn run(
    port: u16,
    orchestrator: Arc<Orchestrator>,
    registry: crate::ws::ConnectionRegistry,
    auth: Arc<dyn AuthPredicate>,
) -> Result<()> {
    let (listener, actual_port) = bind_with_fallback(port).await?;

    let cors = CorsLayer::new()
        .allow_origin([
            format!("http://127.0.0.1:{actual_port}").parse().unwrap(),
            format!("http://localhost:{actual_port}").parse().unwrap(),
        ])
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    let ws_state = WsState { registry, auth };

    let app = Router::new()
        .route("/ws", axum::routing::get(upgrade))
        .with_state(ws_state)
        .layer(cors)
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(validate_host));

    print_banner(actual_port, orchestrator.as_ref());

    axum::serve(listener, app).await?;
    Ok(())
}

async fn validate_host(req: Request<axum::body::Body>, next: Next) -> Response {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let hostname = host.split(':').next().unwrap_or("");
    if !matches!(hostname, "127.0.0.1" | "localhost" | "[::1]" | "") {
        return StatusCode::FORBIDDEN.into_response();
    }
    next.run(req).await
}

/// Security headers, enriched beyond the teacher dashboard's set with the
/// additional headers the original FastAPI app set (referrer policy,
/// permissions policy, HSTS, XSS protection).
async fn security_headers(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert("X-Frame-Options", "DENY".parse().unwrap());
    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());
    headers.insert("X-XSS-Protection", "1; mode=block".parse().unwrap());
    headers.insert("Referrer-Policy", "strict-origin-when-cross-origin".parse().unwrap());
    headers.insert(
        "Permissions-Policy",
        "geolocation=(), microphone=(), camera=()".parse().unwrap(),
    );
    headers.insert(
        "Content-Security-Policy",
        "default-src 'self'; connect-src 'self'".parse().unwrap(),
    );
    response
}

async fn bind_with_fallback(port: u16) -> Result<(tokio::net::TcpListener, u16)> {
    match tokio::net::TcpListener::bind(format!("127.0.0.1:{port}")).await {
        Ok(listener) => Ok((listener, port)),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            eprintln!("[scriptwatch] port {port} is already in use.");
            eprint!("[scriptwatch] bind to a random available port instead? [Y/n] ");

            let mut answer = String::new();
            std::io::stdin().read_line(&mut answer)?;
            let answer = answer.trim().to_lowercase();
            if !answer.is_empty() && answer != "y" && answer != "yes" {
                anyhow::bail!("port {port} is already in use — pass a different SCRIPTWATCH_BIND_PORT");
            }

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
            let actual_port = listener.local_addr()?.port();
            Ok((listener, actual_port))
        }
        Err(e) => Err(e.into()),
    }
}

fn print_banner(port: u16, orchestrator: &Orchestrator) {
    let version = env!("CARGO_PKG_VERSION");
    let url = format!("ws://127.0.0.1:{port}/ws");
    let health = orchestrator.health();

    let dim = "\x1b[2m";
    let bold = "\x1b[1m";
    let cyan = "\x1b[36m";
    let green = "\x1b[32m";
    let reset = "\x1b[0m";

    let width: usize = 60;
    eprintln!();
    eprintln!("{bold}{cyan}scriptwatch{reset} {dim}transcript pipeline{reset}");
    eprintln!("{dim}{}{reset}", "─".repeat(width));
    eprintln!("  {dim}Status{reset}        {bold}{green}online{reset}");
    eprintln!("  {dim}Version{reset}       v{version}");
    eprintln!("  {dim}WebSocket{reset}     {bold}{cyan}{url}{reset}");
    eprintln!("  {dim}Health{reset}        {:?}", health.overall);
    eprintln!("{dim}{}{reset}", "─".repeat(width));
    eprintln!();
}
