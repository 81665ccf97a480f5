use agentdesk::adapters::metrics_handler::MetricsCollector;
use agentdesk::bridge::InvocationBridge;
use agentdesk::chat::{ChatService, Notification, Notifier};
use agentdesk::cli::Cli;
use agentdesk::config::Settings;
use agentdesk::persistence::DataStore;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = Settings::new_with_cli(&cli)?;
    let host = settings.server.host.clone();
    let port = settings.server.port;

    info!("Starting agentdesk on {}:{}", host, port);

    let store = DataStore::new(&settings.database).await?;
    info!("Connected to {} database", store.backend().name());

    if settings.database.auto_migrate {
        let result = store.migrate().await?;
        info!(
            "Migrations: {} applied, {} already present",
            result.applied, result.skipped
        );
    }

    if settings.database.seed_on_startup {
        let seeded = store.seed_from_settings(&settings).await?;
        info!(
            "Seeded {} applications and {} agents",
            seeded.applications, seeded.agents
        );
    }

    if !settings.auth.enabled && settings.auth.trust_proxy_headers {
        warn!("Auth disabled; trusting x-user-id and x-user-roles from the request");
    }

    let metrics = Arc::new(MetricsCollector::new()?);
    let bridge = InvocationBridge::from_config(&settings.bridge, Some(metrics.clone()))?;
    if settings.bridge.prediction_url.is_none() {
        warn!("No prediction service configured; chatflow agents will fail");
    }

    let notifier = Notifier::default();
    spawn_notification_logger(&notifier);

    let chat = Arc::new(
        ChatService::new(&store, Arc::new(bridge), notifier).with_metrics(metrics.clone()),
    );

    let app = agentdesk::create_app(&settings, store.clone(), chat, metrics);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    store.close().await;
    Ok(())
}

fn spawn_notification_logger(notifier: &Notifier) {
    let mut rx = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(Notification::TurnFailed { chat_id, user_id, message }) => {
                    warn!(chat_id, user_id = %user_id, "Turn failed: {}", message);
                }
                Ok(other) => info!(?other, "Notification"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Notification logger skipped {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
