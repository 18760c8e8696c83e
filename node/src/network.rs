//! The slice of the peer-to-peer server the node lifecycle drives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use phoenix_core::{EventBus, NodeEvent, ValidatorNode};

/// What the lifecycle controller needs from a network server. The real
/// transport lives behind this seam; tests substitute a recording one.
pub trait NetworkServer: Send + Sync {
    /// Hard cap on connected peers.
    fn max_peers(&self) -> usize;

    /// Dials and retains an ordinary peer.
    fn add_peer(&self, node: &ValidatorNode);

    /// Dials a validator and pins the connection for consensus traffic.
    fn add_consensus_peer(&self, node: &ValidatorNode);

    /// Hands the server the node's event bus so it can announce heads.
    fn start_watching(&self, bus: &Arc<EventBus>);

    /// Identity string announced on the wire.
    fn node_info(&self) -> String;
}

/// In-process server used by single-node deployments and tests. Records
/// what the lifecycle asked of it instead of opening sockets.
pub struct InProcServer {
    max_peers: usize,
    peers: Mutex<Vec<ValidatorNode>>,
    consensus_peers: Mutex<Vec<ValidatorNode>>,
    watching: AtomicBool,
}

impl InProcServer {
    pub fn new(max_peers: usize) -> Self {
        Self {
            max_peers,
            peers: Mutex::new(Vec::new()),
            consensus_peers: Mutex::new(Vec::new()),
            watching: AtomicBool::new(false),
        }
    }

    /// Validators pinned for consensus so far.
    pub fn consensus_peers(&self) -> Vec<ValidatorNode> {
        self.consensus_peers.lock().clone()
    }

    /// Ordinary peers added so far.
    pub fn peers(&self) -> Vec<ValidatorNode> {
        self.peers.lock().clone()
    }

    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::Acquire)
    }
}

impl NetworkServer for InProcServer {
    fn max_peers(&self) -> usize {
        self.max_peers
    }

    fn add_peer(&self, node: &ValidatorNode) {
        debug!(id = %node.id, "peer added");
        self.peers.lock().push(node.clone());
    }

    fn add_consensus_peer(&self, node: &ValidatorNode) {
        info!(id = %node.id, "consensus peer added");
        self.consensus_peers.lock().push(node.clone());
    }

    fn start_watching(&self, bus: &Arc<EventBus>) {
        if self.watching.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(NodeEvent::NewChainHead(block)) => {
                        debug!(number = block.number(), "head announced to peers");
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn node_info(&self) -> String {
        format!("phoenix/in-proc/max-peers-{}", self.max_peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use phoenix_core::NodeId;

    fn validator(byte: u8) -> ValidatorNode {
        let addr: SocketAddr = format!("127.0.0.1:{}", 30300 + byte as u16)
            .parse()
            .unwrap();
        ValidatorNode::new(NodeId([byte; 64]), addr)
    }

    #[test]
    fn records_consensus_peers() {
        let server = InProcServer::new(50);
        server.add_consensus_peer(&validator(1));
        server.add_consensus_peer(&validator(2));
        assert_eq!(server.consensus_peers().len(), 2);
        assert!(server.peers().is_empty());
    }

    #[tokio::test]
    async fn watching_is_sticky() {
        let server = InProcServer::new(10);
        let bus = Arc::new(EventBus::new());
        assert!(!server.is_watching());
        server.start_watching(&bus);
        server.start_watching(&bus);
        assert!(server.is_watching());
    }
}
