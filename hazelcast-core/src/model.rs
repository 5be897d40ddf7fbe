//! Value types shared by the protocol codecs and the client.

use std::fmt;

/// Identifies a distributed object on the cluster: the service that owns it
/// and its name within that service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DistributedObjectInfo {
    service_name: String,
    name: String,
}

impl DistributedObjectInfo {
    /// Creates a new object identifier.
    pub fn new(service_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            name: name.into(),
        }
    }

    /// Returns the service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Returns the object name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for DistributedObjectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service_name, self.name)
    }
}
