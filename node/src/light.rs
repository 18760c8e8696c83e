//! Light-client serving seam.
//!
//! A full node can donate a share of its capacity to serving light
//! clients. The lifecycle controller only needs start/stop and the
//! protocol list; everything else stays behind the trait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use phoenix_consensus::ProtocolSpec;
use phoenix_ledger::BloomIndexer;

use crate::error::Result;

#[async_trait]
pub trait LightServer: Send + Sync {
    /// Brings the server online. Called last during node start.
    async fn start(&self) -> Result<()>;

    /// Takes the server offline. Called right after the protocol manager
    /// during node stop.
    async fn stop(&self) -> Result<()>;

    /// Wire protocols the server answers on.
    fn protocols(&self) -> Vec<ProtocolSpec>;

    /// Bloom index the server answers log filters from.
    fn set_bloom_indexer(&self, indexer: Arc<BloomIndexer>);
}

/// Light server that tracks its lifecycle without a transport. The served
/// share is a percentage of this node's request capacity.
pub struct BasicLightServer {
    serv_rate: u64,
    running: AtomicBool,
    indexer: Mutex<Option<Arc<BloomIndexer>>>,
}

impl BasicLightServer {
    pub fn new(serv_rate: u64) -> Self {
        Self {
            serv_rate,
            running: AtomicBool::new(false),
            indexer: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn has_bloom_indexer(&self) -> bool {
        self.indexer.lock().is_some()
    }
}

#[async_trait]
impl LightServer for BasicLightServer {
    async fn start(&self) -> Result<()> {
        if !self.running.swap(true, Ordering::AcqRel) {
            info!(serv_rate = self.serv_rate, "light server started");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("light server stopped");
        }
        Ok(())
    }

    fn protocols(&self) -> Vec<ProtocolSpec> {
        vec![ProtocolSpec {
            name: "les",
            version: 2,
        }]
    }

    fn set_bloom_indexer(&self, indexer: Arc<BloomIndexer>) {
        *self.indexer.lock() = Some(indexer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_stop_toggle() {
        let server = BasicLightServer::new(50);
        assert!(!server.is_running());
        server.start().await.unwrap();
        server.start().await.unwrap();
        assert!(server.is_running());
        server.stop().await.unwrap();
        assert!(!server.is_running());
    }
}
