// Main entry point for the chat router

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chat_router::domains::agents::{
    load_agent_specs, AgentRegistry, OpenAiCompatibleAgent, RoutingOrchestrator,
};
use chat_router::domains::chatrooms::{ChatService, InMemoryChatStore, Member, PostgresChatStore};
use chat_router::kernel::{
    BaseChatStore, BaseTopicBroker, InMemoryBroker, NatsBroker, ServerDeps, StreamHub,
};
use chat_router::server::{build_app, AppState};
use chat_router::Config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chat_router=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting chat router");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Storage
    let store: Arc<dyn BaseChatStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
                .context("Failed to connect to database")?;

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;
            tracing::info!("Migrations complete");

            Arc::new(PostgresChatStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, chats are kept in memory");
            Arc::new(InMemoryChatStore::new(&config.human_member_id))
        }
    };

    // Broker
    let broker: Arc<dyn BaseTopicBroker> = match &config.nats_url {
        Some(nats_url) => {
            tracing::info!(url = %nats_url, "Connecting to NATS...");
            Arc::new(
                NatsBroker::connect(nats_url, config.broker_max_deliver)
                    .await
                    .context("Failed to connect to NATS")?,
            )
        }
        None => {
            tracing::warn!("NATS_URL not set, using the in-process broker");
            Arc::new(InMemoryBroker::new())
        }
    };

    let stream_hub = StreamHub::new();
    let deps = ServerDeps::new(
        store.clone(),
        broker.clone(),
        Arc::new(stream_hub.clone()),
        config.human_member_id.clone(),
    );
    let chats = Arc::new(ChatService::new(deps));

    // Members and agents
    let specs = match &config.agents_file {
        Some(path) => load_agent_specs(path)?,
        None => {
            tracing::warn!("AGENTS_FILE not set, no agents will reply");
            Vec::new()
        }
    };

    let mut members = vec![Member::human(config.human_member_id.clone(), "User")];
    members.extend(specs.iter().map(|spec| spec.member()));
    chats
        .provision_members(&members)
        .await
        .context("Failed to provision members")?;

    let mut registry = AgentRegistry::new();
    for spec in &specs {
        registry.register(
            spec.member_id.clone(),
            Arc::new(OpenAiCompatibleAgent::from_spec(spec, store.clone())),
        );
    }
    tracing::info!(agents = registry.len(), "Agents registered");

    chats
        .ensure_control_queues()
        .await
        .context("Failed to declare control queues")?;
    chats
        .load_directory()
        .await
        .context("Failed to load chat directory")?;

    let orchestrator = RoutingOrchestrator::new(chats, registry, config.flow_settings());
    orchestrator
        .start()
        .await
        .context("Failed to start orchestrator")?;

    // Drop idle SSE channels
    let hub = stream_hub.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            hub.cleanup().await;
        }
    });

    let app = build_app(AppState::new(orchestrator.clone(), stream_hub));

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutting down");
    orchestrator.shutdown().await;
    broker.shutdown().await.context("Failed to flush broker")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
