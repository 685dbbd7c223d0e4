//! Live connection handles and the manager that owns them.
//!
//! A `Connection` wraps one open logical database; an `InstanceConnection`
//! wraps one open server-level instance with no specific database selected.
//! Both are created exclusively by `ConnectionManager::connect[_instance]`
//! and carry a back-pointer to their config, never to the manager itself.

pub mod manager;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::adapters::{AdapterFacets, InstanceOperator};
use crate::config::{ConnectionConfig, InstanceConfig};
use crate::error::AnchorError;

/// One open logical-database handle. `connected` is monotonic: once closed,
/// a Connection never silently reconnects.
pub struct Connection {
    pub config: ConnectionConfig,
    facets: AdapterFacets,
    connected: AtomicBool,
}

impl Connection {
    pub fn new(config: ConnectionConfig, facets: AdapterFacets) -> Self {
        Connection { config, facets, connected: AtomicBool::new(true) }
    }

    pub fn database_id(&self) -> &str {
        &self.config.database_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Every facet accessor fails once the connection is closed, instead of
    /// silently handing back a handle into a torn-down backend.
    fn require_open(&self) -> Result<(), AnchorError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(AnchorError::NotConnected(self.database_id().to_string()))
        }
    }

    pub fn schema(&self) -> Result<Arc<dyn crate::adapters::SchemaOperator>, AnchorError> {
        self.require_open()?;
        Ok(self.facets.schema.clone())
    }

    pub fn data(&self) -> Result<Arc<dyn crate::adapters::DataOperator>, AnchorError> {
        self.require_open()?;
        Ok(self.facets.data.clone())
    }

    pub fn metadata(&self) -> Result<Arc<dyn crate::adapters::MetadataOperator>, AnchorError> {
        self.require_open()?;
        Ok(self.facets.metadata.clone())
    }

    pub fn replication(&self) -> Result<Option<Arc<dyn crate::adapters::ReplicationOperator>>, AnchorError> {
        self.require_open()?;
        Ok(self.facets.replication.clone())
    }

    /// Closing is idempotent and infallible at this layer: there is no
    /// separate handle to tear down beyond flipping the open flag, since
    /// pooled resources are cached process-wide per adapter and may be
    /// shared by other logical connections.
    pub async fn close(&self) -> Result<(), AnchorError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// One open instance-level handle: no data or schema facet, only database
/// listing/creation/removal and instance metadata.
pub struct InstanceConnection {
    pub config: InstanceConfig,
    operator: Arc<dyn InstanceOperator>,
    connected: AtomicBool,
}

impl InstanceConnection {
    pub fn new(config: InstanceConfig, operator: Arc<dyn InstanceOperator>) -> Self {
        InstanceConnection { config, operator, connected: AtomicBool::new(true) }
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn operator(&self) -> Result<Arc<dyn InstanceOperator>, AnchorError> {
        if self.is_connected() {
            Ok(self.operator.clone())
        } else {
            Err(AnchorError::NotConnected(self.instance_id().to_string()))
        }
    }

    pub async fn close(&self) -> Result<(), AnchorError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
