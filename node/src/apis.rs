//! RPC namespace records the backend contributes.
//!
//! Transports mount services by these descriptors; the node only answers
//! which namespaces exist and whether each is public.

use phoenix_core::ApiDescriptor;

/// Namespace records of the backend itself. The engine's records and the
/// net facade created at start are appended by the service.
pub fn backend_apis(dpos: bool) -> Vec<ApiDescriptor> {
    let mut apis = vec![
        ApiDescriptor::new("phoenixchain", "downloader", true),
        ApiDescriptor::new("phoenixchain", "filters", true),
        ApiDescriptor::new("miner", "miner", false),
        ApiDescriptor::new("admin", "admin", false),
        ApiDescriptor::new("debug", "debug", true),
        ApiDescriptor::new("debug", "debug-internal", false),
        ApiDescriptor::new("txgen", "txgen", true),
    ];
    if dpos {
        apis.push(ApiDescriptor::new("debug", "staking-view", true));
    }
    apis
}

/// The public net facade, available once the node has started.
pub fn net_api(network_id: u64) -> ApiDescriptor {
    ApiDescriptor::new("net", &format!("net-{network_id}"), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_namespaces_stay_private() {
        let apis = backend_apis(false);
        for api in &apis {
            if api.namespace == "miner" || api.namespace == "admin" {
                assert!(!api.public);
            }
        }
        assert!(!apis.iter().any(|a| a.service == "staking-view"));
        assert!(backend_apis(true).iter().any(|a| a.service == "staking-view"));
    }

    #[test]
    fn net_facade_is_public() {
        let api = net_api(7);
        assert_eq!(api.namespace, "net");
        assert!(api.public);
        assert_eq!(api.version, "1.0");
    }
}
