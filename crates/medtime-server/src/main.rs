use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use medtime_api::auth::{AppState, AppStateInner};
use medtime_engine::channels::{PushSender, SocketSender, TelegramSender, WhatsAppSender};
use medtime_engine::{ChannelSender, Engine, EngineConfig, SystemClock};
use medtime_gateway::{ConnectionRegistry, connection};

const DEFAULT_LOG_FILTER: &str = "medtime=debug,medtime_engine=debug,medtime_db=debug,\
     medtime_gateway=debug,medtime_api=debug,tower_http=debug";

#[derive(Clone)]
struct GatewayState {
    registry: ConnectionRegistry,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("MEDTIME_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("MEDTIME_DB_PATH").unwrap_or_else(|_| "medtime.db".into());
    let host = std::env::var("MEDTIME_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("MEDTIME_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let config = EngineConfig::from_env();

    // Init database
    let db = Arc::new(medtime_db::Database::open(&PathBuf::from(&db_path))?);

    // Delivery channels
    let registry = ConnectionRegistry::default();
    let client = reqwest::Client::builder()
        .timeout(config.channel_timeout)
        .build()?;

    let mut senders: Vec<Arc<dyn ChannelSender>> =
        vec![Arc::new(SocketSender::new(registry.clone()))];

    if let (Some(project_id), Some(token)) = (env_opt("FCM_PROJECT_ID"), env_opt("FCM_ACCESS_TOKEN")) {
        senders.push(Arc::new(PushSender::new(client.clone(), project_id, token)));
    } else {
        warn!("FCM credentials missing, push delivery disabled");
    }

    if let (Some(phone_id), Some(token)) = (
        env_opt("WHATSAPP_PHONE_NUMBER_ID"),
        env_opt("WHATSAPP_ACCESS_TOKEN"),
    ) {
        senders.push(Arc::new(WhatsAppSender::new(client.clone(), phone_id, token)));
    } else {
        warn!("WhatsApp credentials missing, WhatsApp delivery disabled");
    }

    let telegram = env_opt("TELEGRAM_BOT_TOKEN")
        .map(|token| Arc::new(TelegramSender::new(client.clone(), token)));
    match &telegram {
        Some(sender) => senders.push(sender.clone()),
        None => warn!("TELEGRAM_BOT_TOKEN missing, Telegram delivery disabled"),
    }

    // Engine
    let engine = Arc::new(Engine::new(db, Arc::new(SystemClock), config, senders));
    let engine_handle = engine.start();

    // Shared state
    let app_state: AppState = Arc::new(AppStateInner {
        engine,
        jwt_secret: jwt_secret.clone(),
        whatsapp_verify_token: env_opt("WHATSAPP_VERIFY_TOKEN"),
        telegram,
    });

    let gateway = GatewayState {
        registry,
        jwt_secret,
    };

    // Routes
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway);

    let app = Router::new()
        .merge(medtime_api::router(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("MedTime server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine_handle.stop().await;
    info!("MedTime server stopped");

    Ok(())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

async fn ws_upgrade(
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.registry, state.jwt_secret)
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_covers_every_crate() {
        let directives: Vec<&str> = DEFAULT_LOG_FILTER.split(',').collect();
        for target in ["medtime_engine", "medtime_db", "medtime_gateway", "medtime_api"] {
            assert!(
                directives.contains(&format!("{}=debug", target).as_str()),
                "{} missing from default filter",
                target
            );
        }
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }
}
