//! Node assembly and lifecycle.
//!
//! `NodeService::new` turns an operator configuration and a data
//! directory into a fully wired node: storage, recovery, genesis,
//! consensus, chain, pool, miner, protocol manager. `start` and `stop`
//! drive the running subsystems in a fixed order; shutdown runs every
//! step even when earlier ones fail and reports the first error at the
//! end.

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use phoenix_config::{
    ChainConfig, MinerConfig, NodeConfig, SyncMode, ValidatorMode,
};
use phoenix_consensus::{
    decode_evidences, Agency, ConsensusEngine, InnerAgency, Pbft, PbftEngine, ProtocolSpec,
    StaticAgency,
};
use phoenix_core::{
    Address, ApiDescriptor, Block, ChainReader, EventBus, NodeEvent, Subsystem, H256,
};
use phoenix_ledger::{
    rawdb, recover_snapshot_db, setup_genesis_block, BlockChain, BlockChainCache, BloomIndexer,
    CacheConfig, LedgerError, ShouldPreserve, TxPool, BLOOM_WORKERS,
};
use phoenix_pos::{
    gov, staking, GovernancePlugin, Reactor, RestrictingPlugin, RewardPlugin, RuleTag,
    SlashingPlugin, StakingPlugin, VrfHandler,
};
use phoenix_snapshotdb::SnapshotDb;
use phoenix_storage::Database;

use crate::apis;
use crate::context::ServiceContext;
use crate::error::{NodeError, Result};
use crate::executor::StateExecutor;
use crate::light::LightServer;
use crate::miner::Miner;
use crate::network::NetworkServer;
use crate::protocol::ProtocolManager;
use crate::recovery::{run_recovery_gate, RecoveryOutcome};

/// Validators elected per round under delegated selection.
const DPOS_MAX_VALIDATORS: usize = 25;
/// Blocks per election epoch.
const DPOS_EPOCH_BLOCKS: u64 = 10_750;
/// Stake credited to each initial validator at genesis.
const DPOS_INITIAL_STAKE: u128 = 1_000_000;
/// Reward credited per confirmed block.
const DPOS_BLOCK_REWARD: u128 = 2;
/// Fraction of stake taken from a double-signing validator.
const SLASHING_PENALTY_DIVISOR: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Assembled,
    Started,
    Stopped,
}

/// Everything assembled before start, torn down if assembly fails
/// partway. Slots are cleared as ownership moves on.
#[derive(Default)]
struct Assembly {
    chain_db: Option<Arc<dyn Database>>,
    snapshot_base: Option<Arc<dyn Database>>,
    snapshot: Option<Arc<SnapshotDb>>,
    reactor: Option<Arc<Reactor>>,
    engine: Option<Arc<Pbft>>,
    chain: Option<Arc<BlockChain>>,
    pool: Option<Arc<TxPool>>,
}

impl Assembly {
    /// Releases whatever was built, newest first. Close failures are
    /// logged; there is nowhere further to surface them.
    async fn dismantle(&mut self) {
        if let Some(pool) = self.pool.take() {
            if let Err(e) = pool.stop() {
                warn!(error = %e, "pool close failed during assembly teardown");
            }
        }
        if let Some(engine) = self.engine.take() {
            if let Err(e) = engine.close().await {
                warn!(error = %e, "engine close failed during assembly teardown");
            }
        }
        if let Some(reactor) = self.reactor.take() {
            reactor.close().await;
        }
        if let Some(chain) = self.chain.take() {
            // The chain closes the snapshot store riding with it.
            self.snapshot = None;
            if let Err(e) = chain.stop() {
                warn!(error = %e, "chain stop failed during assembly teardown");
            }
        }
        if let Some(snapshot) = self.snapshot.take() {
            if let Err(e) = snapshot.close() {
                warn!(error = %e, "snapshot close failed during assembly teardown");
            }
        }
        if let Some(base) = self.snapshot_base.take() {
            if let Err(e) = base.close() {
                warn!(error = %e, "snapshot base close failed during assembly teardown");
            }
        }
        if let Some(db) = self.chain_db.take() {
            if let Err(e) = db.close() {
                warn!(error = %e, "chain database close failed during assembly teardown");
            }
        }
    }
}

/// A fully assembled node.
pub struct NodeService {
    config: NodeConfig,
    chain_config: ChainConfig,
    genesis_hash: H256,
    context: ServiceContext,
    chain_db: Arc<dyn Database>,
    snapshot: Arc<SnapshotDb>,
    chain: Arc<BlockChain>,
    cache: Arc<BlockChainCache>,
    pool: Arc<TxPool>,
    engine: Arc<Pbft>,
    reactor: Arc<Reactor>,
    miner: Arc<Miner>,
    protocol_manager: Arc<ProtocolManager>,
    bloom: Arc<BloomIndexer>,
    light: RwLock<Option<Arc<dyn LightServer>>>,
    net_api: RwLock<Option<ApiDescriptor>>,
    gas_price: RwLock<u64>,
    mining_address: Arc<RwLock<Address>>,
    lifecycle: Mutex<Lifecycle>,
}

impl NodeService {
    /// Assembles a node under `data_dir`. On failure every resource
    /// opened so far is released before the error is returned.
    pub async fn new(mut config: NodeConfig, data_dir: &Path) -> Result<Arc<Self>> {
        if config.sync_mode == SyncMode::Light {
            return Err(NodeError::Config(
                "light sync cannot run a full node service".into(),
            ));
        }
        if config.miner.gas_price == 0 {
            let fallback = MinerConfig::default().gas_price;
            warn!(fallback, "configured miner gas price is zero, using default");
            config.miner.gas_price = fallback;
        }
        if config.gpo.default_price == 0 {
            config.gpo.default_price = config.miner.gas_price;
        }

        let context = ServiceContext::new(data_dir)?;
        for address in &config.local_accounts {
            context.accounts().add(*address);
        }

        let chain_db = context.open_chain_database(&config.database)?;
        let snapshot_base = match context.open_snapshot_base(&config.database) {
            Ok(db) => db,
            Err(e) => {
                if let Err(close_err) = chain_db.close() {
                    warn!(error = %close_err, "chain database close failed");
                }
                return Err(e);
            }
        };

        let RecoveryOutcome {
            chain_db,
            snapshot_base,
            genesis,
            wiped,
        } = run_recovery_gate(&context, &config, chain_db, snapshot_base)?;
        if let Some(recovered) = genesis {
            config.genesis = Some(recovered);
        }
        if wiped {
            info!("assembling on freshly reset chain state");
        }

        let mut parts = Assembly::default();
        match Self::assemble(config, context, chain_db, snapshot_base, &mut parts).await {
            Ok(service) => Ok(Arc::new(service)),
            Err(e) => {
                parts.dismantle().await;
                Err(e)
            }
        }
    }

    async fn assemble(
        mut config: NodeConfig,
        context: ServiceContext,
        chain_db: Arc<dyn Database>,
        snapshot_base: Arc<dyn Database>,
        parts: &mut Assembly,
    ) -> Result<NodeService> {
        parts.chain_db = Some(chain_db.clone());
        parts.snapshot_base = Some(snapshot_base.clone());

        match rawdb::read_database_version(chain_db.as_ref())? {
            Some(version) if version > rawdb::CHAIN_DB_VERSION => {
                if config.database.skip_version_check {
                    warn!(
                        stored = version,
                        supported = rawdb::CHAIN_DB_VERSION,
                        "database version check skipped"
                    );
                } else {
                    return Err(LedgerError::VersionTooNew {
                        stored: version,
                        supported: rawdb::CHAIN_DB_VERSION,
                    }
                    .into());
                }
            }
            Some(version) if version < rawdb::CHAIN_DB_VERSION => {
                warn!(
                    from = version,
                    to = rawdb::CHAIN_DB_VERSION,
                    "upgrading chain database version"
                );
                rawdb::write_database_version(chain_db.as_ref(), rawdb::CHAIN_DB_VERSION)?;
            }
            Some(_) => {}
            None => rawdb::write_database_version(chain_db.as_ref(), rawdb::CHAIN_DB_VERSION)?,
        }

        let (mut chain_config, genesis_hash) =
            setup_genesis_block(chain_db.as_ref(), config.genesis.as_ref())?;

        // Zero-valued consensus timing means the operator's settings apply.
        if let Some(pbft) = chain_config.pbft.as_mut() {
            if pbft.period == 0 {
                pbft.period = config.pbft.period;
            }
            if pbft.amount == 0 {
                pbft.amount = config.pbft.amount;
            }
        }
        let pbft_config = chain_config.pbft.clone().ok_or_else(|| {
            NodeError::Config("chain configuration carries no pbft section".into())
        })?;

        let snapshot = Arc::new(SnapshotDb::open(snapshot_base)?);
        parts.snapshot_base = None;
        parts.snapshot = Some(snapshot.clone());

        let bus = context.bus().clone();
        let reactor = Reactor::init(chain_config.chain_id, bus.clone(), snapshot.clone());
        reactor.set_node_key(context.node_key().clone());
        parts.reactor = Some(reactor.clone());

        let engine = Arc::new(Pbft::new(
            pbft_config.clone(),
            &config.pbft,
            bus.clone(),
            context.node_key().clone(),
            &context.wal_dir(),
        )?);
        parts.engine = Some(engine.clone());

        let mining_address = Arc::new(RwLock::new(config.miner.mining_address));
        let preserve: ShouldPreserve = {
            let engine = engine.clone();
            let mining_address = mining_address.clone();
            let accounts = context.accounts().clone();
            Arc::new(move |block: &Block| {
                let author = match engine.author(&block.header) {
                    Ok(author) => author,
                    Err(_) => return false,
                };
                author == *mining_address.read() || accounts.contains(&author)
            })
        };

        let cache_config = CacheConfig {
            header_cache: config.database.cache_mb.max(64),
            block_cache: (config.database.cache_mb / 2).max(64),
        };
        let chain = BlockChain::new(
            chain_db.clone(),
            snapshot.clone(),
            cache_config,
            chain_config.clone(),
            engine.clone(),
            preserve,
            bus.clone(),
        )?;
        parts.chain = Some(chain.clone());

        // First run against this snapshot store: commit a genesis layer so
        // governance and staking state exist at height zero.
        if snapshot.current().is_none() {
            snapshot.new_block(0, genesis_hash)?;
            gov::bootstrap_params(&snapshot, &genesis_hash)?;
            if pbft_config.validator_mode == ValidatorMode::Dpos {
                staking::bootstrap(
                    &snapshot,
                    &genesis_hash,
                    engine.initial_nodes(),
                    DPOS_INITIAL_STAKE,
                )?;
            }
            snapshot.commit(&genesis_hash)?;
        }

        let ceiling = gov::gas_ceiling(&snapshot)?;
        if config.miner.gas_floor > ceiling {
            return Err(NodeError::GasFloorTooHigh {
                floor: config.miner.gas_floor,
                ceiling,
            });
        }

        let cache = BlockChainCache::new(chain.clone());
        cache.set_executor(Arc::new(StateExecutor::new(snapshot.clone())));

        let journal = config.resolve_journal(context.data_dir());
        let pool = TxPool::new(config.txpool.clone(), chain.clone(), journal)?;
        parts.pool = Some(pool.clone());

        let miner = Miner::new(
            chain.clone(),
            cache.clone(),
            pool.clone(),
            engine.clone(),
            config.miner.clone(),
            mining_address.clone(),
        );

        let initial_nodes = engine.initial_nodes().to_vec();
        let agency = match pbft_config.validator_mode {
            ValidatorMode::Static => {
                reactor.start(ValidatorMode::Static);
                Agency::Static(StaticAgency::new(initial_nodes))
            }
            ValidatorMode::Inner => {
                let blocks_per_node = u64::from(pbft_config.amount);
                reactor.start(ValidatorMode::Inner);
                let chain_view: Arc<dyn ChainReader> = chain.clone();
                Agency::Inner(InnerAgency::new(
                    initial_nodes,
                    blocks_per_node,
                    Arc::downgrade(&chain_view),
                ))
            }
            ValidatorMode::Dpos => {
                let vrf = VrfHandler::new(vrf_seed(&config, &genesis_hash));
                reactor.set_vrf(vrf.clone());

                let slashing = Arc::new(SlashingPlugin::new(SLASHING_PENALTY_DIVISOR));
                slashing.set_decoder(decode_evidences);
                reactor.register_plugin(RuleTag::Slashing, slashing);
                reactor.register_plugin(
                    RuleTag::Staking,
                    Arc::new(StakingPlugin::new(
                        DPOS_MAX_VALIDATORS,
                        DPOS_EPOCH_BLOCKS,
                        vrf,
                    )),
                );
                reactor.register_plugin(RuleTag::Restricting, Arc::new(RestrictingPlugin::new()));
                reactor.register_plugin(
                    RuleTag::Reward,
                    Arc::new(RewardPlugin::new(DPOS_BLOCK_REWARD)),
                );
                let governance = Arc::new(GovernancePlugin::new(chain_config.chain_id));
                governance
                    .register_param_verifier(gov::PARAM_MAX_BLOCK_GAS_LIMIT, gov::verify_gas_ceiling);
                reactor.register_plugin(RuleTag::Governance, governance);

                reactor.set_begin_rule(vec![
                    RuleTag::Staking,
                    RuleTag::Slashing,
                    RuleTag::CollectDeclareVersion,
                    RuleTag::Governance,
                ]);
                reactor.set_end_rule(vec![
                    RuleTag::CollectDeclareVersion,
                    RuleTag::Restricting,
                    RuleTag::Reward,
                    RuleTag::Governance,
                    RuleTag::Staking,
                ]);

                reactor.start(ValidatorMode::Dpos);
                Agency::Dpos(reactor.clone())
            }
        };
        reactor.start_watching();

        recover_snapshot_db(&cache, &snapshot)?;

        engine
            .start(chain.clone(), cache.clone(), pool.clone(), agency)
            .await?;

        let protocol_manager = ProtocolManager::new(
            config.network_id,
            chain.clone(),
            cache.clone(),
            pool.clone(),
            engine.protocols(),
        );
        let bloom = BloomIndexer::new(chain_db.clone());

        info!(
            chain_id = chain_config.chain_id,
            genesis = %genesis_hash,
            mode = %pbft_config.validator_mode,
            head = chain.current_header().number,
            "node assembled"
        );

        let gas_price = config.miner.gas_price;
        Ok(NodeService {
            config,
            chain_config,
            genesis_hash,
            context,
            chain_db,
            snapshot,
            chain,
            cache,
            pool,
            engine,
            reactor,
            miner,
            protocol_manager,
            bloom,
            light: RwLock::new(None),
            net_api: RwLock::new(None),
            gas_price: RwLock::new(gas_price),
            mining_address,
            lifecycle: Mutex::new(Lifecycle::Assembled),
        })
    }

    /// Registers a light server. Must happen before `start`.
    pub fn add_light_server(&self, server: Arc<dyn LightServer>) -> Result<()> {
        if *self.lifecycle.lock() != Lifecycle::Assembled {
            return Err(NodeError::BadState("running, light server must be added first"));
        }
        server.set_bloom_indexer(self.bloom.clone());
        *self.light.write() = Some(server);
        Ok(())
    }

    /// Brings the node online against the given network server. A failed
    /// start unwinds the steps already taken and leaves the node
    /// assembled.
    pub async fn start(&self, server: Arc<dyn NetworkServer>) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Assembled => *lifecycle = Lifecycle::Started,
                Lifecycle::Started => return Err(NodeError::BadState("already started")),
                Lifecycle::Stopped => return Err(NodeError::BadState("already stopped")),
            }
        }
        match self.start_inner(&server).await {
            Ok(()) => Ok(()),
            Err(e) => {
                *self.lifecycle.lock() = Lifecycle::Assembled;
                Err(e)
            }
        }
    }

    async fn start_inner(&self, server: &Arc<dyn NetworkServer>) -> Result<()> {
        let bus = self.context.bus();
        let light = self.light.read().clone();

        self.bloom.start(bus, BLOOM_WORKERS);

        *self.net_api.write() = Some(apis::net_api(self.config.network_id));

        let mut max_peers = server.max_peers();
        if light.is_some() {
            if self.config.light_peers >= max_peers {
                let err = NodeError::LightPeersExhaustMax {
                    light: self.config.light_peers,
                    max: max_peers,
                };
                self.unwind_start(2).await;
                return Err(err);
            }
            max_peers -= self.config.light_peers;
        }

        self.protocol_manager.start(bus, max_peers);

        if self.engine.is_consensus_node() {
            for validator in self.engine.initial_nodes() {
                server.add_consensus_peer(validator);
            }
            self.start_mining()?;
        }

        server.start_watching(bus);

        if let Some(light_server) = &light {
            if let Err(e) = light_server.start().await {
                self.unwind_start(6).await;
                return Err(e);
            }
        }

        info!(max_peers, node = %server.node_info(), "node started");
        Ok(())
    }

    /// Reverses the start steps numbered `1..=through`.
    async fn unwind_start(&self, through: u8) {
        if through >= 5 {
            self.miner.stop().await;
        }
        if through >= 4 {
            self.protocol_manager.stop().await;
        }
        if through >= 2 {
            *self.net_api.write() = None;
        }
        if through >= 1 {
            if let Err(e) = self.bloom.close().await {
                warn!(error = %e, "bloom close failed while unwinding start");
            }
            self.bloom.close_handlers().await;
        }
    }

    /// Stops the node. Every subsystem is shut down in order even when an
    /// earlier one fails; the first failure is returned at the end.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle == Lifecycle::Stopped {
                return Err(NodeError::BadState("already stopped"));
            }
            *lifecycle = Lifecycle::Stopped;
        }

        let bus = self.context.bus();
        let mut first_error: Option<NodeError> = None;
        let mut note = |step: &'static str, result: Result<()>| {
            if let Err(e) = result {
                warn!(step, error = %e, "shutdown step failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        };

        let _ = bus.post(NodeEvent::ShutdownStage(Subsystem::ProtocolManager));
        self.protocol_manager.stop().await;

        let _ = bus.post(NodeEvent::ShutdownStage(Subsystem::LightServer));
        let light = self.light.read().clone();
        if let Some(light_server) = light {
            note("light-server", light_server.stop().await);
        }

        let _ = bus.post(NodeEvent::ShutdownStage(Subsystem::BloomIndexer));
        note(
            "bloom-indexer",
            self.bloom.close().await.map_err(NodeError::from),
        );
        let _ = bus.post(NodeEvent::ShutdownStage(Subsystem::BloomHandlers));
        self.bloom.close_handlers().await;

        let _ = bus.post(NodeEvent::ShutdownStage(Subsystem::TxPool));
        note("txpool", self.pool.stop().map_err(NodeError::from));

        let _ = bus.post(NodeEvent::ShutdownStage(Subsystem::Miner));
        self.miner.stop().await;

        let _ = bus.post(NodeEvent::ShutdownStage(Subsystem::BlockChain));
        note("blockchain", self.chain.stop().map_err(NodeError::from));

        let _ = bus.post(NodeEvent::ShutdownStage(Subsystem::Engine));
        note("engine", self.engine.close().await.map_err(NodeError::from));

        let _ = bus.post(NodeEvent::ShutdownStage(Subsystem::Reactor));
        self.reactor.close().await;

        let _ = bus.post(NodeEvent::ShutdownStage(Subsystem::ChainDb));
        note("chain-db", self.chain_db.close().map_err(NodeError::from));

        let _ = bus.post(NodeEvent::ShutdownStage(Subsystem::EventBus));
        bus.stop();

        info!("node stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Switches sealing on. Safe to call when already mining.
    pub fn start_mining(&self) -> Result<()> {
        if self.miner.is_mining() {
            return Ok(());
        }
        let price = *self.gas_price.read();
        self.pool.set_gas_price(price);
        self.pool.set_accept_remotes(true);
        if self.miner.mining_address().is_zero() {
            // Allowed: rewards for such blocks go nowhere.
            warn!("sealing with a zero coinbase");
        }
        self.miner.start();
        let _ = self.context.bus().post(NodeEvent::MiningStarted);
        Ok(())
    }

    /// Switches sealing off and waits for the sealer to exit.
    pub async fn stop_mining(&self) {
        if !self.miner.is_mining() {
            return;
        }
        self.miner.stop().await;
        let _ = self.context.bus().post(NodeEvent::MiningStopped);
    }

    pub fn is_mining(&self) -> bool {
        self.miner.is_mining()
    }

    /// Minimum gas price for sealing and pool admission.
    pub fn gas_price(&self) -> u64 {
        *self.gas_price.read()
    }

    pub fn set_gas_price(&self, price: u64) {
        *self.gas_price.write() = price;
        self.pool.set_gas_price(price);
    }

    pub fn mining_address(&self) -> Address {
        *self.mining_address.read()
    }

    pub fn set_mining_address(&self, address: Address) {
        *self.mining_address.write() = address;
    }

    /// RPC namespace records of this node: the backend's own, the
    /// engine's, and the net facade once started.
    pub fn apis(&self) -> Vec<ApiDescriptor> {
        let mut records = apis::backend_apis(self.validator_mode() == ValidatorMode::Dpos);
        records.extend(self.engine.apis());
        if let Some(net) = self.net_api.read().clone() {
            records.push(net);
        }
        records
    }

    /// Wire protocols served: manager, engine, and light server.
    pub fn protocols(&self) -> Vec<ProtocolSpec> {
        let mut protocols = self.protocol_manager.protocols();
        if let Some(light_server) = self.light.read().as_ref() {
            protocols.extend(light_server.protocols());
        }
        protocols
    }

    pub fn is_consensus_node(&self) -> bool {
        self.engine.is_consensus_node()
    }

    pub fn validator_mode(&self) -> ValidatorMode {
        self.chain_config
            .pbft
            .as_ref()
            .map(|p| p.validator_mode)
            .unwrap_or_default()
    }

    pub fn chain_config(&self) -> &ChainConfig {
        &self.chain_config
    }

    pub fn genesis_hash(&self) -> H256 {
        self.genesis_hash
    }

    pub fn node_config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        self.context.bus()
    }

    pub fn chain(&self) -> &Arc<BlockChain> {
        &self.chain
    }

    pub fn chain_cache(&self) -> &Arc<BlockChainCache> {
        &self.cache
    }

    pub fn snapshot(&self) -> &Arc<SnapshotDb> {
        &self.snapshot
    }

    pub fn pool(&self) -> &Arc<TxPool> {
        &self.pool
    }

    pub fn miner(&self) -> &Arc<Miner> {
        &self.miner
    }

    pub fn engine(&self) -> &Arc<Pbft> {
        &self.engine
    }

    pub fn reactor(&self) -> &Arc<Reactor> {
        &self.reactor
    }

    pub fn protocol_manager(&self) -> &Arc<ProtocolManager> {
        &self.protocol_manager
    }

    pub fn bloom_indexer(&self) -> &Arc<BloomIndexer> {
        &self.bloom
    }
}

/// Elections are seeded from the operator genesis when present; a node
/// assembled purely from stored state derives the seed from the genesis
/// hash instead.
fn vrf_seed(config: &NodeConfig, genesis_hash: &H256) -> u64 {
    match &config.genesis {
        Some(genesis) => genesis.nonce,
        None => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&genesis_hash.as_bytes()[..8]);
            u64::from_le_bytes(bytes)
        }
    }
}
