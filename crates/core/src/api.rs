//! RPC surface descriptors.
//!
//! Subsystems describe the namespaces they serve with these records; the
//! node aggregates them at startup and hands them to the RPC layer.

use serde::{Deserialize, Serialize};

/// One RPC namespace registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiDescriptor {
    /// Namespace prefix, e.g. `phoenixchain` or `admin`.
    pub namespace: String,
    /// Interface version.
    pub version: String,
    /// Name of the backing service.
    pub service: String,
    /// Whether the namespace is offered on public endpoints.
    pub public: bool,
}

impl ApiDescriptor {
    /// Builds a record with the conventional version string.
    pub fn new(namespace: &str, service: &str, public: bool) -> Self {
        Self {
            namespace: namespace.to_string(),
            version: "1.0".to_string(),
            service: service.to_string(),
            public,
        }
    }
}
