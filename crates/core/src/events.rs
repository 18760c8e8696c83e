//! In-process event bus.
//!
//! Subsystems publish lifecycle and chain events here instead of holding
//! references to one another. Built on a tokio broadcast channel; slow
//! subscribers drop old events rather than blocking publishers.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

use crate::block::Block;
use crate::error::{CoreError, Result};

const BUS_CAPACITY: usize = 256;

/// Subsystems the lifecycle controller starts and stops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Subsystem {
    ProtocolManager,
    LightServer,
    BloomIndexer,
    BloomHandlers,
    TxPool,
    Miner,
    BlockChain,
    Engine,
    Reactor,
    ChainDb,
    EventBus,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Subsystem::ProtocolManager => "protocol-manager",
            Subsystem::LightServer => "light-server",
            Subsystem::BloomIndexer => "bloom-indexer",
            Subsystem::BloomHandlers => "bloom-handlers",
            Subsystem::TxPool => "txpool",
            Subsystem::Miner => "miner",
            Subsystem::BlockChain => "blockchain",
            Subsystem::Engine => "engine",
            Subsystem::Reactor => "reactor",
            Subsystem::ChainDb => "chain-db",
            Subsystem::EventBus => "event-bus",
        };
        f.write_str(name)
    }
}

/// Events published on the node bus.
#[derive(Clone, Debug)]
pub enum NodeEvent {
    /// A new block became the canonical head.
    NewChainHead(Block),
    /// A block reached finality.
    BlockConfirmed(Block),
    /// Sealing was switched on.
    MiningStarted,
    /// Sealing was switched off.
    MiningStopped,
    /// A subsystem finished shutting down.
    ShutdownStage(Subsystem),
}

/// Broadcast bus connecting the node's subsystems.
pub struct EventBus {
    sender: broadcast::Sender<NodeEvent>,
    stopped: AtomicBool,
}

impl EventBus {
    /// Creates a bus with the default capacity.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            sender,
            stopped: AtomicBool::new(false),
        }
    }

    /// Opens a new subscription. Events posted before this call are not
    /// delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event to all current subscribers.
    ///
    /// Returns [`CoreError::BusStopped`] once the bus has been stopped.
    /// Posting with no subscribers is not an error.
    pub fn post(&self, event: NodeEvent) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(CoreError::BusStopped);
        }
        let _ = self.sender.send(event);
        Ok(())
    }

    /// Stops the bus. Subsequent posts fail; existing receivers drain
    /// whatever was already queued.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// True once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.post(NodeEvent::MiningStarted).unwrap();
        match rx.recv().await.unwrap() {
            NodeEvent::MiningStarted => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn post_after_stop_fails() {
        let bus = EventBus::new();
        bus.stop();
        assert!(matches!(
            bus.post(NodeEvent::MiningStopped),
            Err(CoreError::BusStopped)
        ));
    }

    #[tokio::test]
    async fn post_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.post(NodeEvent::MiningStarted).unwrap();
    }
}
