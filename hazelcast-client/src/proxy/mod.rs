//! Distributed object proxies and the factory that owns them.

mod factory;

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use hazelcast_core::Result;

pub use factory::DistributedObjectFactory;

/// A client-side handle to a named object living on the cluster.
///
/// The factory keeps exactly one instance per service and name, and drives
/// its lifecycle hooks.
#[async_trait]
pub trait DistributedObject: Send + Sync + 'static {
    /// Returns the object's name.
    fn name(&self) -> &str;

    /// Returns the name of the service owning the object.
    fn service_name(&self) -> &str;

    /// Called once after the object exists on the cluster, before any caller
    /// receives it.
    async fn on_initialized(&self) -> Result<()> {
        Ok(())
    }

    /// Called when the object is about to be destroyed on the cluster.
    async fn destroying(&self) -> Result<()> {
        Ok(())
    }

    /// Releases local resources. Failures are logged by the factory and
    /// never propagated.
    async fn dispose(&self) -> Result<()> {
        Ok(())
    }

    /// Upcasts for typed retrieval; implement as `self`.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl std::fmt::Debug for dyn DistributedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DistributedObject({}/{})", self.service_name(), self.name())
    }
}
