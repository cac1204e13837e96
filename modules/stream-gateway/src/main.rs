use event_bus::{BusConnector, InMemoryBus, NatsConnector, SchemaRegistryClient, SchemaSource};
use std::net::SocketAddr;
use std::sync::Arc;
use stream_gateway::config::{BusType, Config};
use stream_gateway::insight::{DisabledInsights, GeminiInsights, InsightGenerator};
use stream_gateway::AppState;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded: {:?}", config);

    // Broker connections open lazily on first publish or poll
    let connector: Arc<dyn BusConnector> = match config.bus_type {
        BusType::Nats => {
            let nats_url = config
                .nats_url
                .clone()
                .ok_or("NATS_URL required for NATS bus")?;
            tracing::info!("Using NATS at {}", nats_url);
            let mut connector =
                NatsConnector::new(nats_url).with_ack_timeout(config.publish_ack_timeout);
            if let Some((user, password)) = config.nats_credentials.clone() {
                connector = connector.with_credentials(user, password);
            }
            Arc::new(connector)
        }
        BusType::InMemory => {
            tracing::info!("Using in-memory event bus");
            Arc::new(InMemoryBus::new())
        }
    };

    let schema_source: Option<Arc<dyn SchemaSource>> = match &config.schema_registry_url {
        Some(url) => {
            let mut client = SchemaRegistryClient::new(url.clone())?;
            if let Some((key, secret)) = config.schema_registry_auth.clone() {
                client = client.with_basic_auth(key, secret);
            }
            tracing::info!("Schema registry configured at {}", url);
            Some(Arc::new(client))
        }
        None => {
            tracing::warn!("SCHEMA_REGISTRY_URL not set, summaries decode as JSON only");
            None
        }
    };

    let generator: Arc<dyn InsightGenerator> = match &config.gemini_api_key {
        Some(key) => {
            let gemini = GeminiInsights::new(
                key.clone(),
                config.gemini_model.clone(),
                config.gemini_base_url.clone(),
            )?;
            tracing::info!("Gemini insights enabled with model {}", gemini.model());
            Arc::new(gemini)
        }
        None => {
            tracing::warn!("GEMINI_API_KEY not set, AI insights disabled");
            Arc::new(DisabledInsights)
        }
    };

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let state = AppState::new(config, connector, generator, schema_source);
    let publisher = state.publisher.clone();
    let app = stream_gateway::router(state);

    tracing::info!("Stream gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = publisher.close().await {
        tracing::warn!(error = %e, "Publisher did not flush cleanly");
    }
    tracing::info!("Stream gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
