use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use tracing::{error, info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use casedesk::config::{AppConfig, StoreBackend};
use casedesk::openapi::ApiDoc;
use casedesk::repo::Repo;
use casedesk::{auth, storage, telemetry, AppState, SecurityHeaders};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env automatically only in debug builds; production sets the environment externally.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    info!(environment = %config.environment, store = ?config.store, storage = ?config.storage, "bootstrapping casedesk");

    let repo = match build_repo(&config).await {
        Ok(r) => r,
        Err(e) => {
            error!("cannot initialise store: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = repo.ping().await {
        warn!("store not ready, retrying in the background: {e}");
        actix_web::rt::spawn(wait_for_store(repo.clone()));
    }

    if let Some(seed) = &config.seed_admin {
        match auth::ensure_seed_admin(repo.as_ref(), seed).await {
            Ok(true) => info!(username = %seed.username, "seeded admin account"),
            Ok(false) => {}
            Err(e) => warn!("could not seed admin account: {e}"),
        }
    }

    let blobs = match storage::build_blob_store(&config).await {
        Ok(b) => b,
        Err(e) => {
            error!("cannot initialise attachment store: {e:#}");
            std::process::exit(1);
        }
    };

    let mut state = AppState::new(repo, blobs, config);
    if state.config.metrics_enabled {
        match telemetry::install() {
            Ok(handle) => state = state.with_metrics(handle),
            Err(e) => warn!("metrics disabled: {e:#}"),
        }
    }

    let openapi = ApiDoc::openapi();
    let bind_addr = state.config.bind_addr.clone();
    let data = web::Data::new(state);

    let server = HttpServer::new(move || {
        let cfg = &data.config;
        let cors = {
            let mut c = Cors::default()
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PATCH", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            if let Some(front) = &cfg.frontend_url {
                c = c.allowed_origin(front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::new(cfg.enable_hsts))
            .wrap(cors)
            .app_data(data.clone())
            .configure(casedesk::config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(&bind_addr)?;

    info!("Listening on http://{bind_addr}");
    server.run().await
}

/// Keep pinging until the store answers. For Postgres each ping also retries
/// the schema migrations.
async fn wait_for_store(repo: Arc<dyn Repo>) {
    let mut delay = Duration::from_secs(1);
    loop {
        tokio::time::sleep(delay).await;
        match repo.ping().await {
            Ok(()) => {
                info!("store is ready");
                return;
            }
            Err(e) => {
                delay = (delay * 2).min(Duration::from_secs(60));
                warn!("store still unavailable (next attempt in {}s): {e}", delay.as_secs());
            }
        }
    }
}

/// Build the configured store. An unreachable database is logged, not fatal:
/// the server starts degraded and `/api/health` reports it.
async fn build_repo(config: &AppConfig) -> anyhow::Result<Arc<dyn Repo>> {
    match config.store {
        #[cfg(feature = "postgres-store")]
        StoreBackend::Postgres => {
            use sqlx::postgres::PgPoolOptions;
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set for the postgres store"))?;
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .acquire_timeout(std::time::Duration::from_secs(5))
                .connect_lazy(url)?;
            let repo = casedesk::repo::pg::PgRepo::new(pool);
            match repo.migrate().await {
                Ok(()) => info!("Using Postgres repository backend (migrations applied)"),
                Err(e) => warn!("Postgres unavailable at start-up, serving degraded: {e}"),
            }
            Ok(Arc::new(repo))
        }
        #[cfg(feature = "inmem-store")]
        StoreBackend::Memory => {
            warn!("Using in-memory repository backend; data is lost on restart");
            Ok(Arc::new(casedesk::repo::inmem::InMemRepo::new()))
        }
        #[allow(unreachable_patterns)]
        other => Err(anyhow::anyhow!("store backend {other:?} is not compiled into this build")),
    }
}
