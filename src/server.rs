//! HTTP server bootstrap for the back-office tenancy core.
//!
//! This module wires together:
//! - configuration
//! - the tenant directory (PostgreSQL or in-memory) and its lookup cache
//! - the per-tenant pool manager, reconciler, write pipeline and scheduler
//! - the Axum router behind the tenant resolution middleware

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::domain::Tenant;
use crate::infra::{
    serve_with_shutdown, shutdown_signal, track_requests, CachedTenantDirectory,
    ConnectionPoolManager, GracefulShutdownConfig, InMemoryTenantDirectory, PgTenantDirectory,
    PoolConfig, ShutdownCoordinator, SqlxStoreConnector, StoreConnector, TenantDirectory,
};
use crate::pipeline::{PipelineConfig, ResolvingWriteExecutor, WriteRetryPipeline};
use crate::reconcile::{backoffice_schema, ReconcileConfig, ReconciliationEngine};
use crate::resolution::{resolve_tenant, ResolutionConfig, ResolutionLayerState, TenantResolver};
use crate::scheduler::{
    BackgroundScheduler, DirectoryCacheCleanup, PoolEvictionSweep, ReconcileSweep,
    SchedulerConfig,
};

/// Tenant directory behind the lookup cache, whatever its backend
pub type SharedDirectory = CachedTenantDirectory<Arc<dyn TenantDirectory>>;

/// Where tenant records come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryMode {
    Postgres { url: String, max_connections: u32 },
    /// Local development; optionally seeded from a JSON array of tenants
    Memory { seed_file: Option<PathBuf> },
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub directory: DirectoryMode,
    pub migrate_on_startup: bool,
    pub directory_cache_ttl: Duration,
    pub directory_cache_capacity: usize,
    pub pools: PoolConfig,
    pub resolution: ResolutionConfig,
    pub reconcile: ReconcileConfig,
    pub pipeline: PipelineConfig,
    pub scheduler: SchedulerConfig,
    pub shutdown: GracefulShutdownConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {host}:{port}: {e}"))?;

        let directory = match std::env::var("DIRECTORY_MODE").ok().as_deref() {
            Some("memory") => DirectoryMode::Memory {
                seed_file: std::env::var("DIRECTORY_SEED_FILE").ok().map(PathBuf::from),
            },
            _ => DirectoryMode::Postgres {
                url: std::env::var("DIRECTORY_DATABASE_URL").map_err(|_| {
                    anyhow::anyhow!(
                        "DIRECTORY_DATABASE_URL is required (or set DIRECTORY_MODE=memory for local dev)"
                    )
                })?,
                max_connections: env_parse("DIRECTORY_MAX_CONNECTIONS").unwrap_or(5),
            },
        };

        let migrate_on_startup = std::env::var("DB_MIGRATE_ON_STARTUP")
            .ok()
            .map(|v| {
                !matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "0" | "false" | "off"
                )
            })
            .unwrap_or(true);

        Ok(Self {
            listen_addr,
            directory,
            migrate_on_startup,
            directory_cache_ttl: Duration::from_secs(
                env_parse("DIRECTORY_CACHE_TTL_SECS").unwrap_or(30),
            ),
            directory_cache_capacity: env_parse("DIRECTORY_CACHE_CAPACITY").unwrap_or(1024),
            pools: PoolConfig::from_env(),
            resolution: ResolutionConfig::from_env(),
            reconcile: ReconcileConfig::from_env(),
            pipeline: PipelineConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
            shutdown: GracefulShutdownConfig::from_env(),
        })
    }
}

impl Config {
    /// Local development defaults: in-memory directory on 127.0.0.1:8080.
    pub fn local() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            directory: DirectoryMode::Memory { seed_file: None },
            migrate_on_startup: false,
            directory_cache_ttl: Duration::from_secs(30),
            directory_cache_capacity: 1024,
            pools: PoolConfig::default(),
            resolution: ResolutionConfig::default(),
            reconcile: ReconcileConfig::default(),
            pipeline: PipelineConfig::default(),
            scheduler: SchedulerConfig::default(),
            shutdown: GracefulShutdownConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<SharedDirectory>,
    pub pools: Arc<ConnectionPoolManager>,
    pub reconciler: Arc<ReconciliationEngine>,
    pub pipeline: Arc<WriteRetryPipeline>,
    pub scheduler: Arc<BackgroundScheduler>,
    pub resolution: Arc<ResolutionConfig>,
}

impl AppState {
    /// Resolver sharing this state's directory and pools
    pub fn resolver(&self) -> TenantResolver {
        TenantResolver::new(self.directory.clone(), self.pools.clone())
    }
}

/// Start the HTTP server.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting backoffice-tenancy v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  Listen address: {}", config.listen_addr);
    info!(
        "  Tenant pools: {} x {} connections (ceiling {})",
        config.pools.max_pools,
        config.pools.limits.max_connections,
        config.pools.connection_ceiling()
    );

    let coordinator = Arc::new(ShutdownCoordinator::new());
    let backend = connect_directory(&config).await?;
    let state = build_state(
        &config,
        backend,
        Arc::new(SqlxStoreConnector::new()),
        &coordinator,
    )?;
    state.scheduler.start();

    let app = build_router(state.clone(), &config.resolution, &coordinator)?;

    info!("Starting HTTP server on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    let signal_coordinator = coordinator.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_coordinator.shutdown();
    });

    info!("backoffice-tenancy is ready to accept connections");
    serve_with_shutdown(listener, app, coordinator.clone(), config.shutdown).await?;

    state.scheduler.stop().await;
    state.pipeline.shutdown().await;
    state.pools.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

async fn connect_directory(config: &Config) -> anyhow::Result<Arc<dyn TenantDirectory>> {
    match &config.directory {
        DirectoryMode::Postgres {
            url,
            max_connections,
        } => {
            info!("Connecting to tenant directory...");
            let pool = PgPoolOptions::new()
                .max_connections(*max_connections)
                .connect(url)
                .await?;
            info!("Connected to tenant directory");

            if config.migrate_on_startup {
                info!("Running directory migrations...");
                crate::migrations::run_directory(&pool).await?;
                info!("Directory migrations applied");
            } else {
                info!("DB migrations skipped (DB_MIGRATE_ON_STARTUP=0)");
            }
            Ok(Arc::new(PgTenantDirectory::new(pool)))
        }
        DirectoryMode::Memory { seed_file } => {
            let tenants: Vec<Tenant> = match seed_file {
                Some(path) => {
                    let raw = tokio::fs::read_to_string(path).await?;
                    serde_json::from_str(&raw)?
                }
                None => Vec::new(),
            };
            warn!(
                tenants = tenants.len(),
                "Using in-memory tenant directory (DIRECTORY_MODE=memory)"
            );
            Ok(Arc::new(InMemoryTenantDirectory::with_tenants(tenants)))
        }
    }
}

/// Wire every component around an already-connected directory backend.
///
/// Must run inside a Tokio runtime: the pipeline spawns its workers here.
pub fn build_state(
    config: &Config,
    backend: Arc<dyn TenantDirectory>,
    connector: Arc<dyn StoreConnector>,
    coordinator: &ShutdownCoordinator,
) -> anyhow::Result<AppState> {
    let directory = Arc::new(CachedTenantDirectory::new(
        backend,
        config.directory_cache_capacity,
        config.directory_cache_ttl,
    ));
    let pools = Arc::new(ConnectionPoolManager::new(connector, config.pools.clone()));
    let schema = Arc::new(backoffice_schema()?);

    let reconciler = Arc::new(ReconciliationEngine::new(
        directory.clone(),
        pools.clone(),
        schema.clone(),
        config.reconcile.clone(),
    ));

    let resolver = TenantResolver::new(directory.clone(), pools.clone());
    let pipeline = Arc::new(WriteRetryPipeline::start(
        config.pipeline.clone(),
        Arc::new(ResolvingWriteExecutor::new(resolver, schema)),
        coordinator.signal(),
    ));

    let mut scheduler = BackgroundScheduler::new(coordinator.signal());
    scheduler
        .schedule(
            Arc::new(ReconcileSweep::new(reconciler.clone())),
            config.scheduler.reconcile_interval,
        )
        .schedule(
            Arc::new(PoolEvictionSweep::new(pools.clone(), directory.clone())),
            config.scheduler.pool_sweep_interval,
        )
        .schedule(
            Arc::new(DirectoryCacheCleanup::new(directory.clone())),
            config.scheduler.cache_cleanup_interval,
        );

    Ok(AppState {
        directory,
        pools,
        reconciler,
        pipeline,
        scheduler: Arc::new(scheduler),
        resolution: Arc::new(config.resolution.clone()),
    })
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Full router: shared endpoints, tenant API, resolution and request tracking.
///
/// The resolution layer wraps every route so the allow-list is the single
/// place deciding which paths skip it.
pub fn build_router(
    state: AppState,
    resolution: &ResolutionConfig,
    coordinator: &ShutdownCoordinator,
) -> anyhow::Result<Router> {
    let resolution_state = ResolutionLayerState::new(state.resolver(), resolution.clone());

    let mut router = Router::new()
        .merge(crate::api::shared_router())
        .nest("/api", crate::api::router())
        .layer(axum::middleware::from_fn_with_state(
            resolution_state,
            resolve_tenant,
        ))
        .layer(axum::middleware::from_fn_with_state(
            coordinator.request_tracker(),
            track_requests,
        ))
        .layer(TraceLayer::new_for_http());

    if let Some(cors_layer) = cors_layer_from_env()? {
        router = router.layer(cors_layer);
    }

    Ok(router.with_state(state))
}

fn cors_layer_from_env() -> anyhow::Result<Option<CorsLayer>> {
    let origins = match std::env::var("CORS_ALLOW_ORIGINS") {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };

    let origins = origins.trim();
    if origins.is_empty() {
        return Ok(None);
    }

    let allow_origin = if origins == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = origins
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<HeaderValue>()
                    .map_err(|e| anyhow::anyhow!("Invalid CORS origin {s:?}: {e}"))
            })
            .collect::<anyhow::Result<_>>()?;
        AllowOrigin::list(origins)
    };

    Ok(Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
                axum::http::header::HeaderName::from_static("x-tenant-id"),
            ]),
    ))
}
