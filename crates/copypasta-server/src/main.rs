use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use socket2::{Domain, Protocol, Socket, Type};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use copypasta_api::auth::{self, AppStateInner, AuthRateLimiter};
use copypasta_api::sessions::SessionStore;
use copypasta_notify::ChangeNotifier;
use copypasta_store::{Database, DEFAULT_HISTORY_LIMIT};

/// Placeholder values that MUST NOT be used as the session signing key.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "your-secret-key-change-this-in-production",
    "change-me",
];

/// Request body cap. Base64 image payloads are the largest legitimate
/// bodies; the 10 MiB rich-text rule is enforced separately by the paste
/// handler.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "copypasta_server=debug,copypasta_api=debug,copypasta_store=debug,\
                 copypasta_notify=debug,tower_http=debug"
                    .into()
            }),
        )
        .init();

    // Config -- the session signing key is MANDATORY
    let secret_key = std::env::var("SECRET_KEY").unwrap_or_default();
    if secret_key.is_empty() || PLACEHOLDER_SECRETS.contains(&secret_key.as_str()) {
        eprintln!("FATAL: SECRET_KEY is unset or still a placeholder.");
        eprintln!("       Pick a strong random value (e.g. openssl rand -base64 48),");
        eprintln!("       put it in the environment or .env, and restart.");
        std::process::exit(1);
    }

    let db_path = std::env::var("DATABASE_PATH").unwrap_or_else(|_| "copypasta.db".into());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "5000".into())
        .parse()?;
    let history_limit: u32 = std::env::var("HISTORY_LIMIT")
        .unwrap_or_else(|_| DEFAULT_HISTORY_LIMIT.to_string())
        .parse()?;
    let poll_max_timeout: u64 = std::env::var("POLL_MAX_TIMEOUT")
        .unwrap_or_else(|_| "60".into())
        .parse()?;

    let db = Database::open(&PathBuf::from(&db_path), history_limit)?;

    // The dummy hash keeps login timing flat for unknown usernames.
    let dummy_hash = auth::hash_password("copypasta-timing-pad")?;

    let state = Arc::new(AppStateInner {
        db,
        notifier: ChangeNotifier::new(),
        sessions: SessionStore::new(&secret_key),
        auth_rate_limiter: AuthRateLimiter::new(),
        dummy_hash,
        poll_max_timeout,
    });

    let app = copypasta_api::router(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(build_cors_layer())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("CopyPasta server listening on {}", addr);

    // Create the listener via socket2 so TCP_NODELAY is set on the
    // listening socket and inherited by accepted connections; long-poll
    // responses are small and latency-sensitive.
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nodelay(true)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(socket.into())?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Browser clients are normally served same-origin; tray-app webviews and
/// dev servers register extra origins via CORS_ORIGINS (comma-separated).
fn build_cors_layer() -> CorsLayer {
    let mut origins: Vec<HeaderValue> = vec!["http://localhost:5000".parse().unwrap()];

    if let Ok(extra) = std::env::var("CORS_ORIGINS") {
        for raw in extra.split(',') {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                if let Ok(val) = trimmed.parse::<HeaderValue>() {
                    origins.push(val);
                } else {
                    eprintln!("WARNING: ignoring invalid CORS origin: {trimmed}");
                }
            }
        }
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .allow_credentials(false)
}
