use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

use common::{database, telemetry};
use identity::{
    authz::{AuthorizationEngine, PolicyTable},
    cleanup::TokenSweeper,
    config::{IdentitySettings, StorageBackend},
    flows::{FlowConfig, IdentityFlows},
    jwt::{JwtConfig, JwtService},
    notifier::{LogNotifier, Notifier, WebhookNotifier},
    rate_limiter::{AttemptPolicy, RateLimiter},
    repositories::{IdentityStore, MemoryStore, PgStore},
    routes::{self, AppState},
};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    info!("Starting identity service");

    let settings = IdentitySettings::load()?;

    match settings.storage()? {
        StorageBackend::Postgres => {
            let db_config = database::DatabaseConfig::from_env()?;
            let pool = database::init_pool(&db_config).await?;

            if database::health_check(&pool).await? {
                info!("Database connection successful");
            } else {
                anyhow::bail!("Failed to connect to database");
            }

            let store = PgStore::new(pool);
            store.run_migrations().await?;
            serve(store, settings).await
        }
        StorageBackend::Memory => {
            info!("Using in-memory storage; data is lost on restart");
            serve(MemoryStore::new(), settings).await
        }
    }
}

async fn serve<S: IdentityStore>(store: S, settings: IdentitySettings) -> Result<()> {
    let jwt_service = JwtService::new(JwtConfig::from_env()?)?;

    let notifier: Arc<dyn Notifier> = match &settings.notifier_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };

    let sweeper = TokenSweeper::new(store.clone());
    // Keep the scheduler alive for the lifetime of the server
    let _scheduler = sweeper.start(&settings.cleanup_schedule).await?;

    let app_state = AppState {
        flows: IdentityFlows::new(
            store.clone(),
            jwt_service,
            notifier,
            FlowConfig::try_from(&settings)?,
        ),
        authz: AuthorizationEngine::new(store, PolicyTable::role_admin_defaults()),
        limiter: RateLimiter::new(AttemptPolicy::from(&settings)),
    };

    let app = routes::create_router(app_state);

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    info!("Identity service listening on {}", settings.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
