use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cli;
mod config;
mod errors;
mod fanout;
mod jobs;
mod live;
mod metrics;
mod models;
mod presence;
mod store;

use fanout::Dispatcher;
use presence::{LocalPresence, Presence};
use store::postgres::PgStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub db: PgStore,
    pub presence: Arc<dyn Presence>,
    pub fanout: Dispatcher,
    pub config: config::Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Export traces to an OTLP collector when one is configured,
    // otherwise log to stdout only.
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "herald"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .expect("failed to install OpenTelemetry tracer");
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "herald=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => run_server(cfg, port).await,
        Some(cli::Commands::User { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_user_command(&db, command).await
        }
        Some(cli::Commands::Session { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_session_command(&db, command).await
        }
        Some(cli::Commands::Workspace { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_workspace_command(&db, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
    let dispatcher = Dispatcher::new(Arc::new(db.clone()), presence.clone());

    let state = Arc::new(AppState {
        db,
        presence: presence.clone(),
        fanout: dispatcher,
        config: cfg.clone(),
    });

    let app = axum::Router::new()
        // Health + metrics endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics_endpoint))
        // Live channel
        .route("/ws", get(live::ws_handler))
        // API — nested under /api/v1 (preserves middleware + fallback)
        .nest("/api/v1", api::api_router(state.clone()))
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer({
            use axum::http::Method;
            use tower_http::cors::AllowOrigin;
            let allowed = cfg.allowed_origin.clone();
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == allowed
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::PATCH,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::HeaderName::from_static("content-type"),
                    axum::http::HeaderName::from_static("authorization"),
                    axum::http::HeaderName::from_static("x-request-id"),
                ])
                .allow_credentials(true)
        })
        .layer(axum::middleware::from_fn(request_id_middleware));

    // Evict connections that never closed cleanly.
    jobs::sweep::spawn(presence);
    tracing::info!("Background presence sweep started (every 60s)");

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Herald listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows clients to correlate errors with server logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

async fn readiness_check() -> &'static str {
    "ok"
}

async fn metrics_endpoint() -> ([(axum::http::HeaderName, &'static str); 1], String) {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        metrics::encode_metrics(),
    )
}

fn mint_session_token() -> String {
    use rand::RngCore;
    let mut random_bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut random_bytes);
    format!("herald_v1_{}", hex::encode(random_bytes))
}

async fn handle_user_command(db: &PgStore, cmd: cli::UserCommands) -> anyhow::Result<()> {
    match cmd {
        cli::UserCommands::Create { name, avatar_url } => {
            let id = db.create_user(&name, avatar_url.as_deref()).await?;
            println!("User created:\n  Name: {}\n  ID:   {}", name, id);
        }
    }
    Ok(())
}

async fn handle_session_command(db: &PgStore, cmd: cli::SessionCommands) -> anyhow::Result<()> {
    match cmd {
        cli::SessionCommands::Create { user_id } => {
            let uid = uuid::Uuid::parse_str(&user_id).context("Invalid user_id")?;
            let user = db
                .get_user(uid)
                .await?
                .ok_or_else(|| anyhow::anyhow!("User not found: {}", user_id))?;

            let token = mint_session_token();
            db.insert_session(&token, user.id).await?;
            println!(
                "Session created for {}:\n  Use: Authorization: Bearer {}",
                user.name, token
            );
        }
    }
    Ok(())
}

async fn handle_workspace_command(db: &PgStore, cmd: cli::WorkspaceCommands) -> anyhow::Result<()> {
    match cmd {
        cli::WorkspaceCommands::Create { name, owner_id } => {
            let owner = uuid::Uuid::parse_str(&owner_id).context("Invalid owner_id")?;
            let ws = db.create_workspace(&name, owner).await?;
            println!(
                "Workspace created:\n  Name: {}\n  ID:   {}\n  Owner: {}",
                ws.name, ws.id, ws.owner_id
            );
        }
        cli::WorkspaceCommands::AddMember {
            workspace_id,
            user_id,
        } => {
            let wid = uuid::Uuid::parse_str(&workspace_id).context("Invalid workspace_id")?;
            let uid = uuid::Uuid::parse_str(&user_id).context("Invalid user_id")?;
            let added = db.add_member(wid, uid).await?;
            if added {
                println!("Member added.");
            } else {
                println!("Already a member.");
            }
        }
    }
    Ok(())
}
