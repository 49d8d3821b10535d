use anyhow::Context;
use callmarket::config::{Config, StorageBackend};
use callmarket::domain::account::Account;
use callmarket::domain::shared::value_objects::AccountId;
use callmarket::infrastructure::persistence::MemoryStore;
use callmarket::interface::api::{build_router, init_metrics, AppState};
use callmarket::SessionServices;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "postgres")]
use callmarket::infrastructure::persistence::{create_pool, run_migrations, DatabaseConfig, PgStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting callmarket session orchestrator");

    // Load configuration
    let config_path = config_path_from_args().or_else(|| std::env::var("CALLMARKET_CONFIG").ok());
    let config = Config::load(config_path.as_deref()).context("loading configuration")?;
    info!(
        "Configuration loaded: accept window {}s, join window {}s, storage {:?}",
        config.session.accept_timeout_secs, config.session.join_timeout_secs, config.storage.backend
    );

    let mut services = match config.storage.backend {
        StorageBackend::Memory => {
            warn!("Using the in-memory store; state is lost on restart");
            let store = Arc::new(MemoryStore::new());
            seed_demo_accounts(&store).await;
            SessionServices::build(&config, store)
        }
        #[cfg(feature = "postgres")]
        StorageBackend::Postgres => {
            let pool = create_pool(&DatabaseConfig::from_settings(&config.database))
                .await
                .context("connecting to PostgreSQL")?;
            run_migrations(&pool).await.context("running migrations")?;
            SessionServices::build(&config, Arc::new(PgStore::new(pool)))
        }
        #[cfg(not(feature = "postgres"))]
        StorageBackend::Postgres => {
            anyhow::bail!("storage backend 'postgres' requires the postgres feature")
        }
    };

    services.start_expiry_worker();
    let sweeper_handle = services.sweeper(&config).spawn();

    // Initialize metrics exporter
    info!("Initializing Prometheus metrics exporter");
    let prometheus_handle = init_metrics().context("installing metrics recorder")?;

    let api_state = AppState {
        facade: services.facade.clone(),
        media: services.media.clone(),
    };
    let app = build_router(api_state, prometheus_handle);

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("binding {}", config.bind_address()))?;
    info!("REST API server listening on {}", config.bind_address());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server failed")?;

    info!("Shutting down...");
    sweeper_handle.abort();
    Ok(())
}

fn config_path_from_args() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

/// Accounts normally come from the identity subsystem; the memory backend
/// starts with one client and one advisor so the API is usable locally.
async fn seed_demo_accounts(store: &MemoryStore) {
    store
        .seed_account(Account::client(AccountId::new(1), "Demo Client", Decimal::new(500, 0)))
        .await;
    store
        .seed_account(Account::advisor(AccountId::new(2), "Demo Advisor", Decimal::new(10, 0)))
        .await;
    info!("Seeded demo client 1 and advisor 2");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
}
