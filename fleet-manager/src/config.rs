//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `FLEET_MANAGER_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `FLEET_MANAGER_` override YAML values
//! 3. **DATABASE_URL** - Special case: overrides `database.url` if set
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `FLEET_MANAGER_KAFKA__QUOTA_TYPE=ams` sets the `kafka.quota_type` field.
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port` - internal HTTP server (health and metrics)
//! - **Database**: `database.url`, `database.pool` - PostgreSQL connection settings
//! - **Kafka**: `kafka.*` - quota backend, reconciliation policy and the instance type catalogue
//! - **Keycloak**: `keycloak.*` - SSO client provisioning for kafka instances
//! - **AMS**: `ams.*` - entitlement system endpoint
//! - **Data plane**: `data_plane.*` - clusters available for placement and the cluster state endpoint
//! - **Quota list**: `quota_management_list.*` - static allow-list used by the `quota-management-list` quota type
//! - **Background Services**: `background_services.*` - leader election and reconcile interval

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Deserializer, Serialize, de};
use std::{str::FromStr, time::Duration};
use url::Url;

use crate::errors::ServiceError;
use crate::instance_types::SupportedKafkaInstanceTypes;
use crate::quota_management::QuotaManagementListConfig;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "FLEET_MANAGER_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Internal HTTP server host to bind to
    pub host: String,
    /// Internal HTTP server port to bind to
    pub port: u16,
    /// Set from `DATABASE_URL`; takes precedence over `database.url`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    pub database: DatabaseConfig,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    pub kafka: KafkaConfig,
    pub keycloak: KeycloakConfig,
    pub ams: AmsConfig,
    pub data_plane: DataPlaneConfig,
    pub quota_management_list: QuotaManagementListConfig,
    pub background_services: BackgroundServicesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: None,
            database: DatabaseConfig::default(),
            enable_otel_export: false,
            kafka: KafkaConfig::default(),
            keycloak: KeycloakConfig::default(),
            ams: AmsConfig::default(),
            data_plane: DataPlaneConfig::default(),
            quota_management_list: QuotaManagementListConfig::default(),
            background_services: BackgroundServicesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool: PoolSettings,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/fleet_manager".to_string(),
            pool: PoolSettings::default(),
        }
    }
}

/// Connection pool settings.
///
/// Each held distributed lock pins one connection for its whole lifetime, so `max_connections` bounds the number of locks
/// this replica can hold at once.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub max_lifetime: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// Backend used to admit kafka requests against quota
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(type_name = "text", rename_all = "kebab-case")]
pub enum QuotaType {
    #[default]
    QuotaManagementList,
    Ams,
}

impl QuotaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaType::QuotaManagementList => "quota-management-list",
            QuotaType::Ams => "ams",
        }
    }
}

impl FromStr for QuotaType {
    type Err = ServiceError;

    /// An empty value selects the default quota type
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Ok(QuotaType::default()),
            "quota-management-list" => Ok(QuotaType::QuotaManagementList),
            "ams" => Ok(QuotaType::Ams),
            other => Err(ServiceError::general(format!("invalid quota service type: {other}"))),
        }
    }
}

impl<'de> Deserialize<'de> for QuotaType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct KafkaConfig {
    pub quota_type: QuotaType,
    /// Reserve quota when a kafka request is accepted
    pub enable_quota_service: bool,
    /// The data plane fleetshard reports kafka status directly, so the provisioning reconciler does nothing
    pub enable_kas_fleetshard_sync: bool,
    /// How long server-side preparation errors are retried before the request is failed
    #[serde(with = "humantime_serde")]
    pub max_duration_with_provisioning_errs: Duration,
    /// Deprovision instances once their lifespan has passed
    pub enable_deletion_of_expired_kafka: bool,
    /// Owners whose kafka instances are deprovisioned
    pub deny_list: Vec<String>,
    pub supported_instance_types: SupportedKafkaInstanceTypes,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            quota_type: QuotaType::default(),
            enable_quota_service: true,
            enable_kas_fleetshard_sync: true,
            max_duration_with_provisioning_errs: Duration::from_secs(5 * 60),
            enable_deletion_of_expired_kafka: true,
            deny_list: Vec::new(),
            supported_instance_types: SupportedKafkaInstanceTypes::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeycloakConfig {
    /// Kafka instances get an SSO client and require authentication
    pub enable_authentication_on_kafka: bool,
    pub base_url: Option<Url>,
    pub realm: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl Default for KeycloakConfig {
    fn default() -> Self {
        Self {
            enable_authentication_on_kafka: false,
            base_url: None,
            realm: "rhoas".to_string(),
            client_id: None,
            client_secret: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AmsConfig {
    pub base_url: Option<Url>,
    pub token: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for AmsConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// A data plane cluster kafka instances can be placed on
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    pub cluster_id: String,
    pub cloud_provider: String,
    pub region: String,
    pub max_kafka_instances: i64,
    /// Bootstrap hosts are generated under this domain
    pub dns_domain: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataPlaneConfig {
    /// Base URL of the endpoint reporting kafka state, used when fleetshard sync is disabled
    pub state_url: Option<Url>,
    pub clusters: Vec<ClusterConfig>,
}

/// Leader election configuration for multi-instance deployments.
///
/// Leader election uses PostgreSQL advisory locks to elect a single leader instance that runs the reconcilers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeaderElectionConfig {
    /// When false, this instance always runs as leader (useful for single-instance deployments and testing)
    pub enabled: bool,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackgroundServicesConfig {
    pub leader_election: LeaderElectionConfig,
    /// Time between reconcile passes
    #[serde(with = "humantime_serde")]
    pub reconcile_interval: Duration,
}

impl Default for BackgroundServicesConfig {
    fn default() -> Self {
        Self {
            leader_election: LeaderElectionConfig::default(),
            reconcile_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if let Some(url) = config.database_url.take() {
            config.database.url = url;
        }

        config.validate().map_err(|e| figment::Error::from(e.reason))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("FLEET_MANAGER_").ignore(&["config"]).split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), ServiceError> {
        for instance_type in &self.kafka.supported_instance_types.0 {
            if instance_type.sizes.is_empty() {
                return Err(ServiceError::validation(format!(
                    "instance type '{}' must define at least one size",
                    instance_type.id
                )));
            }
            if instance_type.supported_billing_models.is_empty() {
                return Err(ServiceError::validation(format!(
                    "instance type '{}' must define at least one billing model",
                    instance_type.id
                )));
            }
        }

        if self.kafka.quota_type == QuotaType::Ams && self.ams.base_url.is_none() {
            return Err(ServiceError::validation("ams.base_url is required when kafka.quota_type is 'ams'"));
        }

        if self.keycloak.enable_authentication_on_kafka
            && (self.keycloak.base_url.is_none() || self.keycloak.client_id.is_none() || self.keycloak.client_secret.is_none())
        {
            return Err(ServiceError::validation(
                "keycloak.base_url, keycloak.client_id and keycloak.client_secret are required when authentication on kafka is enabled",
            ));
        }

        if !self.kafka.enable_kas_fleetshard_sync && self.data_plane.state_url.is_none() {
            return Err(ServiceError::validation(
                "data_plane.state_url is required when kafka.enable_kas_fleetshard_sync is false",
            ));
        }

        Ok(())
    }
}
