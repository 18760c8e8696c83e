//! The proof-of-stake reactor.
//!
//! A process-wide singleton hosting the plugin registry and the rule
//! orders. It is initialized exactly once per node construction and
//! closed during shutdown; hidden lazy initialization is deliberately
//! avoided so tests and restarts see explicit state.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use phoenix_config::ValidatorMode;
use phoenix_core::{EventBus, Header, NodeEvent, NodeId, NodeKey, ValidatorNode, ValidatorProvider, H256};
use phoenix_snapshotdb::SnapshotDb;

use crate::error::{PosError, Result};
use crate::gov;
use crate::plugin::{PosPlugin, RuleTag};
use crate::staking;
use crate::vrf::VrfHandler;

static REACTOR: Lazy<RwLock<Option<Arc<Reactor>>>> = Lazy::new(|| RwLock::new(None));

/// Hosts plugins and drives begin/end-of-block rule execution.
pub struct Reactor {
    chain_id: u64,
    bus: Arc<EventBus>,
    snapshot: Arc<SnapshotDb>,
    mode: RwLock<Option<ValidatorMode>>,
    registry: RwLock<Vec<(RuleTag, Arc<dyn PosPlugin>)>>,
    begin_rule: RwLock<Vec<RuleTag>>,
    end_rule: RwLock<Vec<RuleTag>>,
    vrf: RwLock<Option<VrfHandler>>,
    node_key: RwLock<Option<NodeKey>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl Reactor {
    fn new(chain_id: u64, bus: Arc<EventBus>, snapshot: Arc<SnapshotDb>) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            chain_id,
            bus,
            snapshot,
            mode: RwLock::new(None),
            registry: RwLock::new(Vec::new()),
            begin_rule: RwLock::new(Vec::new()),
            end_rule: RwLock::new(Vec::new()),
            vrf: RwLock::new(None),
            node_key: RwLock::new(None),
            watcher: Mutex::new(None),
            shutdown,
        })
    }

    /// Creates the singleton, replacing any previous instance. Called once
    /// per node construction.
    pub fn init(chain_id: u64, bus: Arc<EventBus>, snapshot: Arc<SnapshotDb>) -> Arc<Self> {
        let reactor = Self::new(chain_id, bus, snapshot);
        *REACTOR.write() = Some(reactor.clone());
        info!(chain_id, "reactor initialized");
        reactor
    }

    /// The installed singleton.
    pub fn instance() -> Result<Arc<Self>> {
        REACTOR.read().clone().ok_or(PosError::NotInitialized)
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn snapshot(&self) -> &Arc<SnapshotDb> {
        &self.snapshot
    }

    /// Marks the reactor running in the given validator mode.
    pub fn start(&self, mode: ValidatorMode) {
        *self.mode.write() = Some(mode);
        info!(%mode, "reactor started");
    }

    pub fn mode(&self) -> Option<ValidatorMode> {
        *self.mode.read()
    }

    /// Seeds the crypto handler with the node's key.
    pub fn set_node_key(&self, key: NodeKey) {
        *self.node_key.write() = Some(key);
    }

    /// Identity of the hosting node, once the key is seeded.
    pub fn node_id(&self) -> Option<NodeId> {
        self.node_key.read().as_ref().map(|k| k.node_id())
    }

    /// Installs the VRF handler used by elections.
    pub fn set_vrf(&self, vrf: VrfHandler) {
        *self.vrf.write() = Some(vrf);
    }

    pub fn vrf(&self) -> Option<VrfHandler> {
        self.vrf.read().clone()
    }

    /// Registers a plugin under its rule tag. Re-registering a tag
    /// replaces the plugin but keeps its original position.
    pub fn register_plugin(&self, tag: RuleTag, plugin: Arc<dyn PosPlugin>) {
        let mut registry = self.registry.write();
        if let Some(slot) = registry.iter_mut().find(|(t, _)| *t == tag) {
            slot.1 = plugin;
        } else {
            registry.push((tag, plugin));
        }
    }

    /// Tags in registration order.
    pub fn registered_tags(&self) -> Vec<RuleTag> {
        self.registry.read().iter().map(|(t, _)| *t).collect()
    }

    /// The plugin registered under `tag`.
    pub fn plugin(&self, tag: RuleTag) -> Option<Arc<dyn PosPlugin>> {
        self.registry
            .read()
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, p)| p.clone())
    }

    pub fn set_begin_rule(&self, rule: Vec<RuleTag>) {
        *self.begin_rule.write() = rule;
    }

    pub fn set_end_rule(&self, rule: Vec<RuleTag>) {
        *self.end_rule.write() = rule;
    }

    pub fn begin_rule(&self) -> Vec<RuleTag> {
        self.begin_rule.read().clone()
    }

    pub fn end_rule(&self) -> Vec<RuleTag> {
        self.end_rule.read().clone()
    }

    fn run_rule(&self, rule: &[RuleTag], hash: &H256, header: &Header, begin: bool) -> Result<()> {
        for tag in rule {
            if *tag == RuleTag::CollectDeclareVersion {
                gov::collect_declared_versions(&self.snapshot, hash)?;
                continue;
            }
            match self.plugin(*tag) {
                Some(plugin) => {
                    if begin {
                        plugin.begin_block(hash, header, &self.snapshot)?;
                    } else {
                        plugin.end_block(hash, header, &self.snapshot)?;
                    }
                }
                None => warn!(%tag, "rule names an unregistered plugin"),
            }
        }
        Ok(())
    }

    /// Runs the begin-of-block rules against the pending layer of `hash`.
    pub fn begin_block(&self, hash: &H256, header: &Header) -> Result<()> {
        self.run_rule(&self.begin_rule(), hash, header, true)
    }

    /// Runs the end-of-block rules against the pending layer of `hash`.
    pub fn end_block(&self, hash: &H256, header: &Header) -> Result<()> {
        self.run_rule(&self.end_rule(), hash, header, false)
    }

    /// Spawns the confirmation watcher: finalized blocks are handed to
    /// every plugin in registration order.
    pub fn start_watching(self: &Arc<Self>) {
        let mut guard = self.watcher.lock();
        if guard.is_some() {
            return;
        }
        let reactor = self.clone();
        let mut events = self.bus.subscribe();
        let mut shutdown = self.shutdown.subscribe();
        *guard = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    event = events.recv() => match event {
                        Ok(NodeEvent::BlockConfirmed(block)) => {
                            let plugins: Vec<_> = reactor
                                .registry
                                .read()
                                .iter()
                                .map(|(_, p)| p.clone())
                                .collect();
                            for plugin in plugins {
                                if let Err(e) = plugin.confirmed(&block) {
                                    warn!(plugin = plugin.name(), error = %e, "confirmed hook failed");
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        }));
    }

    /// Stops the watcher and uninstalls the singleton if it is this
    /// instance.
    pub async fn close(self: &Arc<Self>) {
        let _ = self.shutdown.send(true);
        let handle = self.watcher.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let mut slot = REACTOR.write();
        if slot.as_ref().is_some_and(|r| Arc::ptr_eq(r, self)) {
            *slot = None;
        }
        info!("reactor closed");
    }
}

impl ValidatorProvider for Reactor {
    fn validators_at(&self, _number: u64) -> Option<Vec<ValidatorNode>> {
        staking::validators(&self.snapshot).ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_core::{Address, Block};
    use phoenix_storage::MemoryStore;
    use std::sync::Mutex as StdMutex;

    struct RecordingPlugin {
        name: &'static str,
        log: Arc<StdMutex<Vec<String>>>,
    }

    impl PosPlugin for RecordingPlugin {
        fn name(&self) -> &'static str {
            self.name
        }
        fn begin_block(&self, _: &H256, _: &Header, _: &SnapshotDb) -> Result<()> {
            self.log.lock().unwrap().push(format!("begin:{}", self.name));
            Ok(())
        }
        fn end_block(&self, _: &H256, _: &Header, _: &SnapshotDb) -> Result<()> {
            self.log.lock().unwrap().push(format!("end:{}", self.name));
            Ok(())
        }
        fn confirmed(&self, _: &Block) -> Result<()> {
            self.log.lock().unwrap().push(format!("confirmed:{}", self.name));
            Ok(())
        }
    }

    fn bare_reactor() -> Arc<Reactor> {
        Reactor::new(
            1,
            Arc::new(EventBus::new()),
            Arc::new(SnapshotDb::open(Arc::new(MemoryStore::new())).unwrap()),
        )
    }

    fn header() -> Header {
        Header {
            parent_hash: H256::zero(),
            number: 1,
            timestamp: 0,
            coinbase: Address::ZERO,
            state_root: H256::zero(),
            tx_root: H256::zero(),
            gas_limit: 0,
            gas_used: 0,
            extra: Vec::new(),
        }
    }

    #[test]
    fn rules_run_in_configured_order() {
        let reactor = bare_reactor();
        let log = Arc::new(StdMutex::new(Vec::new()));
        for name in ["a", "b"] {
            let tag = if name == "a" {
                RuleTag::Staking
            } else {
                RuleTag::Reward
            };
            reactor.register_plugin(
                tag,
                Arc::new(RecordingPlugin {
                    name,
                    log: log.clone(),
                }),
            );
        }
        reactor.set_begin_rule(vec![RuleTag::Reward, RuleTag::Staking]);
        reactor.set_end_rule(vec![RuleTag::Staking, RuleTag::Reward]);

        let hash = H256([1; 32]);
        reactor.snapshot().new_block(1, hash).unwrap();
        reactor.begin_block(&hash, &header()).unwrap();
        reactor.end_block(&hash, &header()).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["begin:b", "begin:a", "end:a", "end:b"]
        );
    }

    #[test]
    fn reregistration_keeps_position() {
        let reactor = bare_reactor();
        let log = Arc::new(StdMutex::new(Vec::new()));
        let plugin = |name| {
            Arc::new(RecordingPlugin {
                name,
                log: log.clone(),
            })
        };
        reactor.register_plugin(RuleTag::Staking, plugin("one"));
        reactor.register_plugin(RuleTag::Reward, plugin("two"));
        reactor.register_plugin(RuleTag::Staking, plugin("replacement"));
        assert_eq!(
            reactor.registered_tags(),
            vec![RuleTag::Staking, RuleTag::Reward]
        );
        assert_eq!(reactor.plugin(RuleTag::Staking).unwrap().name(), "replacement");
    }

    #[tokio::test]
    async fn watcher_feeds_confirmed_blocks() {
        let reactor = bare_reactor();
        let log = Arc::new(StdMutex::new(Vec::new()));
        reactor.register_plugin(
            RuleTag::Staking,
            Arc::new(RecordingPlugin {
                name: "s",
                log: log.clone(),
            }),
        );
        reactor.start_watching();
        tokio::task::yield_now().await;

        let block = Block::new(header(), Vec::new());
        reactor.bus.post(NodeEvent::BlockConfirmed(block)).unwrap();

        // Give the watcher a moment to drain the event.
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            if !log.lock().unwrap().is_empty() {
                break;
            }
        }
        assert_eq!(*log.lock().unwrap(), vec!["confirmed:s"]);

        reactor.close().await;
    }

    #[tokio::test]
    async fn close_uninstalls_singleton() {
        let bus = Arc::new(EventBus::new());
        let snap = Arc::new(SnapshotDb::open(Arc::new(MemoryStore::new())).unwrap());
        let reactor = Reactor::init(9, bus, snap);
        assert_eq!(Reactor::instance().unwrap().chain_id(), 9);
        reactor.close().await;
        assert!(Reactor::instance().is_err());
    }
}
