//! Addressable connection inputs.
//!
//! These are plain serde structs — configuration *loading* is an external
//! collaborator's job; this crate only defines the shape a caller hands in
//! once it has resolved host/port/credentials from wherever it keeps them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SslMode {
    Disable,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl Default for SslMode {
    fn default() -> Self {
        SslMode::Prefer
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub ssl_mode: SslMode,
    #[serde(default = "default_reject_unauthorized")]
    pub ssl_reject_unauthorized: bool,
    pub ssl_cert: Option<String>,
    pub ssl_key: Option<String>,
    pub ssl_root_cert: Option<String>,
}

fn default_reject_unauthorized() -> bool {
    true
}

/// A ciphertext blob; only ever handed to `SecretStore::decrypt` (see
/// `crate::secrets`). The core never attempts to interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ciphertext(pub Vec<u8>);

/// The addressable parameters for one logical database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub database_id: String,
    pub tenant_id: String,
    pub workspace_id: String,
    pub environment_id: Option<String>,
    pub instance_id: String,
    pub name: String,
    pub description: Option<String>,
    /// Matches a `BackendId` in the capability catalog / adapter registry.
    pub database_vendor: String,
    pub connection_type: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<Ciphertext>,
    pub database_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub tls: TlsConfig,
    pub role: Option<String>,
    pub connected_to_node_id: Option<String>,
    pub owner_id: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Same as `ConnectionConfig` minus a specific database, plus instance
/// identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub instance_id: String,
    pub tenant_id: String,
    pub workspace_id: String,
    pub environment_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub database_vendor: String,
    pub connection_type: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<Ciphertext>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub tls: TlsConfig,
    pub role: Option<String>,
    pub connected_to_node_id: Option<String>,
    pub owner_id: Option<String>,
    /// Unique instance fingerprint, independent of `instance_id`'s caller
    /// semantics (e.g. a hash of host+port+vendor).
    pub unique_identifier: String,
    /// Reported server version string, filled in after a successful probe.
    pub version: Option<String>,
}

/// Per-replication-stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub replication_id: String,
    pub database_id: String,
    pub connection_type: String,
    pub table_names: Vec<String>,
}
