use portal_auth::api::start_webserver;
use portal_auth::config::load_config_or_panic;
use portal_auth::oauth2::{self, OAuth2State};
use sea_orm::Database;
use std::sync::Arc;
use tokio::time::{Duration, interval};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_standard_tracing() {
    let default_directives = "portal_auth=info,audit=info,tower_http=info,sea_orm=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    initialize_standard_tracing();

    // Load config
    let config = load_config_or_panic();

    // Set up SeaORM database connection
    let db = Arc::new(Database::connect(&config.database_url).await?);

    let state = OAuth2State::new(db, config.oauth2.clone());

    for seed in &config.clients {
        state
            .registrar
            .register(seed)
            .await
            .map_err(|e| color_eyre::Report::msg(format!("Failed to register client {}: {e}", seed.id)))?;
        tracing::info!(client_id = %seed.id, "Registered client from configuration");
    }

    // Start background housekeeping task
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(300)); // 5 minutes
            loop {
                interval.tick().await;
                match oauth2::purge_expired(&state).await {
                    Ok(removed) => tracing::debug!(removed, "Purged expired authorization state"),
                    Err(e) => tracing::warn!("Housekeeping failed: {}", e),
                }
            }
        });
    }

    tracing::info!(
        issuer = %state.issuer(),
        clients = config.clients.len(),
        rotate_refresh_tokens = state.config.rotate_refresh_tokens,
        "authorization server configuration"
    );

    start_webserver(state, &config.bind_address).await?;
    Ok(())
}
