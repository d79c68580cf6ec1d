//! Configuration type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// PostgreSQL connection settings.
    pub database: DatabaseConfig,

    /// Provisioning behavior.
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
}

/// PostgreSQL connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password. Never written back out.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// SSL mode: disable, require, verify-ca or verify-full (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,

    /// Pool size (default: 8).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Provisioning behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Foreign-data wrapper servers are created under (default: "multicorn").
    #[serde(default = "default_fdw")]
    pub fdw: String,

    /// Schema of the point-cloud format registry (default: "public").
    #[serde(default = "default_public_schema")]
    pub registry_schema: String,

    /// Point-cloud format registry table (default: "pointcloud_formats").
    #[serde(default = "default_registry_table")]
    pub registry_table: String,

    /// SRID of trajectory views when none is requested (default: 4326).
    #[serde(default = "default_srid")]
    pub default_srid: i32,

    /// Extra attempts after a pcid allocation conflict (default: 1).
    #[serde(default = "default_allocation_retries")]
    pub allocation_retries: u32,

    /// Procedural language of the multicorn driver enumeration block
    /// (default: "plpython2u").
    #[serde(default = "default_driver_language")]
    pub driver_language: String,

    /// Return engine diagnostics to callers instead of a generic message.
    #[serde(default)]
    pub expose_engine_errors: bool,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            fdw: default_fdw(),
            registry_schema: default_public_schema(),
            registry_table: default_registry_table(),
            default_srid: default_srid(),
            allocation_retries: default_allocation_retries(),
            driver_language: default_driver_language(),
            expose_engine_errors: false,
        }
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_max_connections() -> usize {
    8
}

fn default_fdw() -> String {
    "multicorn".to_string()
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_registry_table() -> String {
    "pointcloud_formats".to_string()
}

fn default_srid() -> i32 {
    4326
}

fn default_allocation_retries() -> u32 {
    1
}

fn default_driver_language() -> String {
    "plpython2u".to_string()
}
