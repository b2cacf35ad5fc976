//! # fleet-manager: managed Kafka control plane
//!
//! Kafka requests are admitted against quota and driven through their lifecycle by background reconcilers:
//!
//! ```text
//! accepted -> preparing -> provisioning -> ready
//!     \            \             \            \
//!      `-> failed   `-> failed    `-> failed   `-> deprovision -> deleting -> (removed)
//! ```
//!
//! - [`workers::AcceptedKafkaManager`] places a request on a data plane cluster and reserves its quota through the
//!   backend selected by [`services::quota::QuotaServiceFactory`]: the entitlement system ([`services::quota::ams`]) or
//!   a static allow-list ([`services::quota::quota_list`]).
//! - [`workers::PreparingKafkaManager`] derives the bootstrap host and SSO client.
//! - [`workers::ProvisioningKafkaManager`] polls the data plane until the instance is ready.
//! - [`workers::DeletingKafkaManager`] releases quota and removes requests on their way out.
//! - [`workers::KafkaManager`] keeps status gauges current and deprovisions expired or denied instances.
//!
//! Replicas elect a single leader through a PostgreSQL advisory lock ([`leader_election`]); only the leader runs
//! reconcilers. Cluster placement is additionally serialised through [`locks::DistributedLockMgr`].
//!
//! The HTTP surface is internal: `/healthz` and `/metrics` (Prometheus text format).

pub mod clients;
pub mod config;
pub mod db;
pub mod errors;
pub mod instance_types;
pub mod leader_election;
pub mod locks;
pub mod metrics;
pub mod quota_management;
pub mod services;
pub mod telemetry;
pub mod workers;

use axum::{Router, extract::State, routing::get};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub use config::Config;

use crate::clients::ams::{AmsClient, HttpAmsClient};
use crate::locks::{DistributedLockMgr, PgLockFactory};
use crate::metrics::{KafkaMetrics, PrometheusKafkaMetrics};
use crate::services::{
    kafka::{KafkaService, PgKafkaService},
    kafka_state::{HttpKafkaStateProvider, KafkaStateProvider},
    placement::StaticClusterPlacement,
    preparer::DefaultKafkaPreparer,
    quota::{QuotaService, QuotaServiceFactory, ams::AmsQuotaService, quota_list::QuotaManagementListService},
    sso::{KeycloakSsoProvider, SsoProvider},
};
use crate::workers::{
    AcceptedKafkaManager, DeletingKafkaManager, KafkaManager, PreparingKafkaManager, ProvisioningKafkaManager,
    ReadyKafkaManager, ReconcileLoop, Reconciler,
};

/// Timeout for calls to keycloak and the data plane state endpoint
const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often followers retry for leadership and the leader pings its lock connection
const LEADER_ELECTION_INTERVAL: Duration = Duration::from_secs(30);

/// Get the fleet manager database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let settings = &config.database.pool;
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(settings.idle_timeout)
        .max_lifetime(settings.max_lifetime)
        .connect(&config.database.url)
        .await?;
    migrator().run(&pool).await?;
    Ok(pool)
}

/// Build every reconciler with its production dependencies
pub fn build_reconcilers(pool: PgPool, config: &Config) -> anyhow::Result<Vec<Arc<dyn Reconciler>>> {
    let instance_types = Arc::new(config.kafka.supported_instance_types.clone());
    let kafkas: Arc<dyn KafkaService> = Arc::new(PgKafkaService::new(pool.clone()));
    let metrics: Arc<dyn KafkaMetrics> = Arc::new(PrometheusKafkaMetrics);

    let ams = match config.ams.base_url {
        Some(_) => {
            let client: Arc<dyn AmsClient> = Arc::new(HttpAmsClient::from_config(&config.ams)?);
            Some(Arc::new(AmsQuotaService::new(client, instance_types.clone())) as Arc<dyn QuotaService>)
        }
        None => None,
    };
    let quota_list = Arc::new(QuotaManagementListService::new(
        kafkas.clone(),
        Arc::new(config.quota_management_list.clone()),
        instance_types.clone(),
    ));
    let quota_services = QuotaServiceFactory::new(ams, quota_list);

    let sso = if config.keycloak.enable_authentication_on_kafka {
        let provider = KeycloakSsoProvider::from_config(&config.keycloak, HTTP_CLIENT_TIMEOUT)?;
        Some(Arc::new(provider) as Arc<dyn SsoProvider>)
    } else {
        None
    };

    let state_provider = match (&config.data_plane.state_url, config.kafka.enable_kas_fleetshard_sync) {
        (Some(url), false) => {
            let provider = HttpKafkaStateProvider::new(url.clone(), HTTP_CLIENT_TIMEOUT)?;
            Some(Arc::new(provider) as Arc<dyn KafkaStateProvider>)
        }
        _ => None,
    };

    let clusters = config.data_plane.clusters.clone();
    let locks = Arc::new(DistributedLockMgr::new(Arc::new(PgLockFactory::new(pool))));

    let accepted = AcceptedKafkaManager::builder()
        .kafkas(kafkas.clone())
        .placement(Arc::new(StaticClusterPlacement::new(clusters.clone(), kafkas.clone())))
        .quota_services(quota_services.clone())
        .locks(locks)
        .metrics(metrics.clone())
        .instance_types(instance_types)
        .enable_quota_service(config.kafka.enable_quota_service)
        .quota_type(config.kafka.quota_type)
        .build();

    let preparing = PreparingKafkaManager::builder()
        .kafkas(kafkas.clone())
        .preparer(Arc::new(DefaultKafkaPreparer::new(clusters, sso.clone())))
        .metrics(metrics.clone())
        .max_duration_with_provisioning_errs(config.kafka.max_duration_with_provisioning_errs)
        .build();

    let provisioning = ProvisioningKafkaManager::builder()
        .kafkas(kafkas.clone())
        .maybe_state_provider(state_provider)
        .metrics(metrics.clone())
        .build();

    let ready = ReadyKafkaManager::builder().kafkas(kafkas.clone()).maybe_sso(sso).build();

    let deleting = DeletingKafkaManager::builder()
        .kafkas(kafkas.clone())
        .quota_services(quota_services)
        .metrics(metrics.clone())
        .enable_kas_fleetshard_sync(config.kafka.enable_kas_fleetshard_sync)
        .enable_authentication_on_kafka(config.keycloak.enable_authentication_on_kafka)
        .build();

    let housekeeping = KafkaManager::builder()
        .kafkas(kafkas)
        .metrics(metrics)
        .deny_list(config.kafka.deny_list.clone())
        .enable_deletion_of_expired_kafka(config.kafka.enable_deletion_of_expired_kafka)
        .build();

    let workers: Vec<Arc<dyn Reconciler>> = vec![
        Arc::new(accepted) as Arc<dyn Reconciler>,
        Arc::new(preparing) as Arc<dyn Reconciler>,
        Arc::new(provisioning) as Arc<dyn Reconciler>,
        Arc::new(ready) as Arc<dyn Reconciler>,
        Arc::new(deleting) as Arc<dyn Reconciler>,
        Arc::new(housekeeping) as Arc<dyn Reconciler>,
    ];
    Ok(workers)
}

/// Background tasks running alongside the HTTP server.
///
/// Dropping the struct cancels the shutdown token through `drop_guard`, which stops the leader election task and any
/// reconcile loop it started.
pub struct BackgroundServices {
    is_leader: Arc<AtomicBool>,
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Relaxed)
    }

    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

fn setup_background_services(
    pool: PgPool,
    config: &Config,
    workers: Vec<Arc<dyn Reconciler>>,
    shutdown_token: CancellationToken,
) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let interval = config.background_services.reconcile_interval;
    let is_leader = Arc::new(AtomicBool::new(false));
    let mut background_tasks = Vec::new();

    if !config.background_services.leader_election.enabled {
        info!("Launching without leader election: running as leader");
        is_leader.store(true, Ordering::Relaxed);
        let reconcile_loop = ReconcileLoop::new(workers, interval);
        background_tasks.push(tokio::spawn(reconcile_loop.run(shutdown_token.clone())));
    } else {
        info!("Starting leader election - will attempt to acquire leadership");

        // Cancelled when leadership is lost, stopping the reconcile loop started for that term
        let leadership_session: Arc<tokio::sync::Mutex<Option<CancellationToken>>> = Arc::new(tokio::sync::Mutex::new(None));
        let session_gain = leadership_session.clone();
        let session_lose = leadership_session;
        let parent_token = shutdown_token.clone();

        let handle = tokio::spawn(leader_election::leader_election_task(
            pool,
            is_leader.clone(),
            leader_election::LEADER_LOCK_ID,
            LEADER_ELECTION_INTERVAL,
            shutdown_token.clone(),
            move || {
                let workers = workers.clone();
                let session = session_gain.clone();
                let session_token = parent_token.child_token();
                async move {
                    if let Some(previous) = session.lock().await.replace(session_token.clone()) {
                        previous.cancel();
                    }
                    tokio::spawn(ReconcileLoop::new(workers, interval).run(session_token));
                    anyhow::Ok(())
                }
            },
            move || {
                let session = session_lose.clone();
                async move {
                    if let Some(token) = session.lock().await.take() {
                        token.cancel();
                        info!("Reconcile loop stopped (lost leadership)");
                    }
                    anyhow::Ok(())
                }
            },
        ));
        background_tasks.push(handle);
    }

    BackgroundServices {
        is_leader,
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

#[derive(Clone)]
struct AppState {
    metrics: PrometheusHandle,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn render_metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}

/// Internal router: liveness and Prometheus scrape endpoints
pub fn build_router(metrics: PrometheusHandle) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(render_metrics))
        .with_state(AppState { metrics })
        .layer(TraceLayer::new_for_http())
}

/// Owns the HTTP server, database pool and background services.
///
/// [`Application::new`] connects to the database, runs migrations and starts the background services;
/// [`Application::serve`] serves the internal router until the shutdown future resolves, then stops everything.
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
    bg_services: BackgroundServices,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting fleet manager with configuration: {:#?}", config);

        // Installed before any worker runs, or early measurements are lost
        let metrics_handle = crate::metrics::get_or_install_prometheus_handle()?;

        let pool = setup_database(&config).await?;
        let workers = build_reconcilers(pool.clone(), &config)?;
        let bg_services = setup_background_services(pool.clone(), &config, workers, CancellationToken::new());
        let router = build_router(metrics_handle);

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Fleet manager listening on http://{}, leader: {}",
            bind_addr,
            self.bg_services.is_leader()
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
