//! Ledger facade
//!
//! Ties storage, the commit actor and the verification cache together.
//! Reads go straight to storage; every write goes through the actor.
//!
//! # Example
//!
//! ```no_run
//! use jig_ledger::{Config, Ledger};
//!
//! #[tokio::main]
//! async fn main() -> jig_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!     let mut evaluator = ledger.start_evaluator(None)?;
//!     evaluator.finalize()?;
//!     jig_ledger::commit::commit(&ledger, &mut evaluator).await?;
//!     ledger.close().await
//! }
//! ```

use crate::{
    actor::{spawn_commit_actor, CommitHandle},
    commit::check_invariants,
    eval::BlockEvaluator,
    metrics::Metrics,
    storage::Storage,
    types::{CreatableKind, CreatableLocator, ValidatedBlock},
    verify::{self, VerifiedCache, VerifyOutcome},
    Config, Error, Result,
};
use jig_protocol::{AccountData, Address, Block, BlockHeader, ConsensusParams, SignedTxn};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Single-node ledger
#[derive(Debug)]
pub struct Ledger {
    config: Config,
    proto: ConsensusParams,
    storage: Arc<Storage>,
    handle: CommitHandle,
    task: JoinHandle<()>,

    /// Latest durable header
    latest: RwLock<BlockHeader>,

    /// Header of the last block handed to the actor, durable or not
    tip: Mutex<BlockHeader>,

    cache: VerifiedCache,
    metrics: Metrics,
}

impl Ledger {
    /// Open an initialized ledger
    pub async fn open(config: Config) -> Result<Self> {
        let storage = Storage::open(&config)?;
        if storage.latest_round()?.is_none() {
            return Err(Error::InvalidState(format!(
                "no ledger at {}, run init first",
                config.data_dir.display()
            )));
        }
        Self::from_storage(config, Arc::new(storage)).await
    }

    /// Wrap a store that already holds at least the genesis block
    pub async fn from_storage(config: Config, storage: Arc<Storage>) -> Result<Self> {
        let round = storage
            .latest_round()?
            .ok_or_else(|| Error::InvalidState("store holds no blocks".to_string()))?;
        let header = storage
            .get_block(round)?
            .ok_or_else(|| Error::Storage(format!("latest block {} missing", round)))?
            .header;
        let proto = ConsensusParams::for_version(&header.current_protocol)?;

        let metrics = Metrics::new().map_err(|e| Error::Other(e.to_string()))?;
        let (handle, task) = spawn_commit_actor(storage.clone(), round, metrics.clone());

        tracing::info!(round, protocol = %header.current_protocol, "Ledger opened");

        Ok(Self {
            config,
            proto,
            storage,
            handle,
            task,
            latest: RwLock::new(header.clone()),
            tip: Mutex::new(header),
            cache: VerifiedCache::new(),
            metrics,
        })
    }

    /// Configuration the ledger was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consensus parameters of the current protocol
    pub fn proto(&self) -> &ConsensusParams {
        &self.proto
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Latest durable round
    pub fn latest(&self) -> u64 {
        self.latest.read().round
    }

    /// Header of the latest durable block
    pub fn latest_header(&self) -> BlockHeader {
        self.latest.read().clone()
    }

    /// Committed block at `round`
    pub fn block(&self, round: u64) -> Result<Block> {
        self.storage
            .get_block(round)?
            .ok_or(Error::RoundNotAvailable(round))
    }

    /// Verify a group against the latest header
    pub fn verify_group(&self, group: &[SignedTxn]) -> Result<VerifyOutcome> {
        let header = self.latest_header();
        let outcome = verify::verify_group(group, &header, &self.proto, &self.cache)?;
        self.metrics.verified_groups.inc();
        self.metrics.cache_hits.inc_by(outcome.cache_hits as u64);
        Ok(outcome)
    }

    /// Evaluator for the block after the last one handed to the actor
    pub fn start_evaluator(&self, timestamp: Option<i64>) -> Result<BlockEvaluator> {
        let prev = self.tip.lock().clone();
        BlockEvaluator::new(self.storage.clone(), self.proto.clone(), prev, timestamp)
    }

    /// Check a validated block against the tip and queue it for writing
    pub async fn add_block(&self, validated: ValidatedBlock) -> Result<()> {
        let round = validated.block.round();
        {
            let mut tip = self.tip.lock();
            check_invariants(&tip, &validated)?;
            *tip = validated.block.header.clone();
        }
        tracing::debug!(round, "Block queued for commit");
        self.handle
            .add_block(validated.block, validated.delta)
            .await
    }

    /// Suspend until `round` is durable
    pub async fn wait(&self, round: u64) -> Result<()> {
        self.handle.wait(round).await?;
        let header = self.block(round)?.header;
        let mut latest = self.latest.write();
        if header.round > latest.round {
            *latest = header;
        }
        Ok(())
    }

    /// Latest record of an account, empty when unknown
    pub fn lookup_account(&self, addr: &Address) -> Result<AccountData> {
        Ok(self.storage.get_account(addr)?.unwrap_or_default())
    }

    /// Creator of a creatable
    pub fn lookup_creator(&self, index: u64, kind: CreatableKind) -> Result<Option<Address>> {
        self.storage.get_creator(kind, index)
    }

    /// Creatables of `kind` with index at most `max_index`, highest first
    pub fn list_creatables(
        &self,
        max_index: u64,
        max_results: usize,
        kind: CreatableKind,
    ) -> Result<Vec<CreatableLocator>> {
        self.storage.list_creatables(kind, max_index, max_results)
    }

    /// Key-value keys starting with `prefix` as of `round` (0 is unbounded)
    pub fn lookup_keys_by_prefix(&self, round: u64, prefix: &[u8], max: usize) -> Result<Vec<Vec<u8>>> {
        self.require_latest(round)?;
        self.storage.keys_with_prefix(prefix, max)
    }

    /// Value of a key-value entry as of `round`
    pub fn lookup_kv(&self, round: u64, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.require_latest(round)?;
        self.storage.get_kv(key)
    }

    // Only the latest state is kept
    fn require_latest(&self, round: u64) -> Result<()> {
        if round != self.latest() {
            return Err(Error::RoundNotAvailable(round));
        }
        Ok(())
    }

    /// Stop the commit actor after pending writes
    pub async fn close(self) -> Result<()> {
        self.handle.shutdown().await?;
        self.task
            .await
            .map_err(|e| Error::Concurrency(format!("commit task failed: {}", e)))?;
        tracing::debug!("Ledger closed");
        Ok(())
    }
}
