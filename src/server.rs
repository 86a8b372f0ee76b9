/// Server setup and initialization
///
/// Wires together storage, the definition registry, the org directory, the entity
/// adapters, the workflow engine, the escalation scheduler and the HTTP routes.

use crate::{
    adapter::{AdapterRegistry, InMemoryAdapter},
    api::{create_approval_routes, create_definition_routes, create_entity_routes, AppState},
    approval::ApprovalStore,
    condition::{ConditionEvaluator, OrgDirectory},
    config::{Config, DatabaseConfig},
    escalation::DirectoryEscalationResolver,
    notify::TracingNotifier,
    runtime::{EscalationScheduler, WorkflowEngine},
    workflow::{DefinitionRegistry, DefinitionStorage},
};
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::{collections::HashMap, path::Path, str::FromStr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Open the SQLite pool, creating the database file (and its directory) if missing
///
/// Connections run in WAL mode with a busy timeout so concurrent writers queue on the
/// write lock instead of failing.
pub async fn connect_database(config: &DatabaseConfig) -> Result<SqlitePool> {
    let url = config.url.as_str();
    if let Some(file) = url.strip_prefix("sqlite://").filter(|f| !f.starts_with(':')) {
        if let Some(parent) = Path::new(file).parent().filter(|p| !p.as_os_str().is_empty()) {
            tracing::info!("📁 Ensuring database directory exists: {}", parent.display());
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory '{}'", parent.display()))?;
        }
    }

    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("Invalid database URL '{}'", url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs));
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database '{}'", url))?;

    Ok(pool)
}

/// Build every component on top of an existing pool
pub async fn build_state(config: &Config, pool: SqlitePool) -> Result<AppState> {
    tracing::info!("📋 Initializing approval schema");
    let definition_storage = DefinitionStorage::new(pool.clone());
    definition_storage.init_schema().await?;
    let store = ApprovalStore::new(pool);
    store.init_schema().await?;

    tracing::info!("📊 Initializing definition registry");
    let registry = Arc::new(DefinitionRegistry::new(definition_storage));
    registry
        .init_from_storage()
        .await
        .context("Failed to load workflow definitions from storage")?;

    let directory = Arc::new(match &config.directory.file {
        Some(path) => {
            tracing::info!("👥 Loading organisation directory from {}", path);
            OrgDirectory::load(path)?
        }
        None => {
            tracing::warn!("⚠️ No directory file configured; role, department and manager lookups are empty");
            OrgDirectory::new()
        }
    });

    tracing::info!("🔌 Registering entity adapters: {:?}", config.adapters.business_types);
    let mut entities = HashMap::new();
    let mut adapters = AdapterRegistry::builder();
    for business_type in &config.adapters.business_types {
        let adapter = Arc::new(
            InMemoryAdapter::new(business_type, &label_for(business_type), directory.clone())
                .title_from("title")
                .summarize(&["total_amount", "currency", "department"])
                .cc_role(&format!("{}_cc", business_type)),
        );
        adapters = adapters.register(adapter.clone())?;
        entities.insert(business_type.clone(), adapter);
    }

    tracing::info!("🚀 Initializing workflow engine");
    let engine = Arc::new(WorkflowEngine::new(
        store,
        registry.clone(),
        adapters.build(),
        ConditionEvaluator::new(directory.clone()),
        Arc::new(TracingNotifier),
        Arc::new(DirectoryEscalationResolver::new(directory)),
    ));

    Ok(AppState {
        engine,
        registry,
        entities: Arc::new(entities),
    })
}

/// HTTP router over a built state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_approval_routes())
        .merge(create_definition_routes())
        .merge(create_entity_routes())
        .with_state(state)
}

/// Create the main Axum application and start its background jobs
///
/// The escalation scheduler is returned so the caller can stop it on shutdown.
pub async fn create_app(config: &Config) -> Result<(Router, Option<EscalationScheduler>)> {
    let pool = connect_database(&config.database).await?;
    let state = build_state(config, pool).await?;

    let scheduler = if config.escalation.enabled {
        tracing::info!("⏰ Initializing escalation scheduler");
        let scheduler = EscalationScheduler::new(state.engine.clone(), &config.escalation.schedule).await?;
        scheduler.start().await?;
        Some(scheduler)
    } else {
        tracing::info!("Escalation sweep disabled");
        None
    };

    tracing::info!("✅ Application initialized successfully");
    Ok((create_router(state), scheduler))
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting approval engine server...");

    let (app, scheduler) = create_app(&config).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Approval engine shutting down");
    if let Some(scheduler) = scheduler {
        scheduler.stop().await?;
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("❌ Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("❌ Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health_check() -> &'static str {
    "ok"
}

/// "purchase_order" -> "Purchase order"
fn label_for(business_type: &str) -> String {
    let spaced = business_type.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_from_business_types() {
        assert_eq!(label_for("purchase_order"), "Purchase order");
        assert_eq!(label_for("quote"), "Quote");
        assert_eq!(label_for(""), "");
    }
}
