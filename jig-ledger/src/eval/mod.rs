//! Block evaluator
//!
//! Builds the block following the latest committed header, one group at a
//! time.
//!
//! ```text
//!   Open ──finalize()──▶ Closed ──commit──▶ Committed
//!    │
//!    └──apply_group() fails──▶ Error
//! ```
//!
//! A group applies completely or not at all: the working state is
//! checkpointed before each group and restored when any member fails. A
//! failed group also ends the evaluation, since the run aborts on the first
//! invalid group.

mod apply;
mod cow;
mod logic;
mod rewards;

pub use rewards::RewardsState;

use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::types::ValidatedBlock;
use apply::EvalCtx;
use cow::Cow;
use jig_protocol::{
    ApplyData, Block, BlockHeader, ConsensusParams, SignedTxn, SignedTxnWithAd, Transaction,
    TxType,
};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of an evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalState {
    /// Accepting groups
    Open,
    /// Block produced, awaiting commit
    Closed,
    /// Block durable
    Committed,
    /// A group failed
    Error,
}

impl fmt::Display for EvalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvalState::Open => "open",
            EvalState::Closed => "closed",
            EvalState::Committed => "committed",
            EvalState::Error => "failed",
        };
        f.write_str(name)
    }
}

/// Evaluator of the next block
pub struct BlockEvaluator {
    proto: ConsensusParams,
    prev: BlockHeader,
    header: BlockHeader,
    state: EvalState,
    cow: Option<Cow>,
    payset: Vec<SignedTxnWithAd>,
    withdrawn: u64,
    validated: Option<ValidatedBlock>,
}

impl fmt::Debug for BlockEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockEvaluator")
            .field("round", &self.header.round)
            .field("state", &self.state)
            .field("payset", &self.payset.len())
            .finish()
    }
}

impl BlockEvaluator {
    /// Start evaluating the block after `prev`.
    ///
    /// The timestamp is carried from `prev` unless overridden. Rewards state
    /// advances and the rewards pool pays out the level increase up front.
    pub fn new(
        storage: Arc<Storage>,
        proto: ConsensusParams,
        prev: BlockHeader,
        timestamp: Option<i64>,
    ) -> Result<Self> {
        let mut header = prev.next()?;
        if let Some(ts) = timestamp {
            header.timestamp = ts;
        }

        let prev_rewards = RewardsState::of(&prev);
        let pool_balance = storage
            .get_account(&prev.rewards_pool)?
            .map_or(0, |a| a.micro_algos);
        let units = storage.total_reward_units(&proto)?;
        let next_rewards = prev_rewards.next(header.round, &proto, pool_balance, units);
        next_rewards.store(&mut header);
        let withdrawn = next_rewards.withdrawal(&prev_rewards, units);

        let mut cow = Cow::new(storage, proto.clone(), next_rewards.level);
        if withdrawn > 0 {
            cow.debit(&prev.rewards_pool, withdrawn)?;
            cow.take_touched();
        }

        tracing::debug!(
            round = header.round,
            rewards_level = header.rewards_level,
            withdrawn,
            "Evaluator opened"
        );

        Ok(Self {
            proto,
            prev,
            header,
            state: EvalState::Open,
            cow: Some(cow),
            payset: Vec::new(),
            withdrawn,
            validated: None,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> EvalState {
        self.state
    }

    /// Header of the block being built
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    /// Header the block builds on
    pub fn prev_header(&self) -> &BlockHeader {
        &self.prev
    }

    fn require(&self, expected: EvalState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState(format!(
                "evaluator is {}, expected {}",
                self.state, expected
            )));
        }
        Ok(())
    }

    /// Apply a group atomically
    pub fn apply_group(&mut self, group: &[SignedTxn]) -> Result<()> {
        self.require(EvalState::Open)?;
        let cow = self
            .cow
            .as_mut()
            .ok_or_else(|| Error::InvalidState("evaluator has no working state".to_string()))?;

        let checkpoint = cow.clone();
        let payset_len = self.payset.len();
        match apply_members(
            cow,
            &self.proto,
            &self.prev,
            &self.header,
            &mut self.payset,
            group,
        ) {
            Ok(()) => {
                tracing::debug!(round = self.header.round, size = group.len(), "Group applied");
                Ok(())
            }
            Err(e) => {
                *cow = checkpoint;
                self.payset.truncate(payset_len);
                self.state = EvalState::Error;
                tracing::debug!(round = self.header.round, "Group rejected: {}", e);
                Err(e)
            }
        }
    }

    /// Close the evaluator and produce the block
    pub fn finalize(&mut self) -> Result<Block> {
        self.require(EvalState::Open)?;
        let cow = self
            .cow
            .take()
            .ok_or_else(|| Error::InvalidState("evaluator has no working state".to_string()))?;

        let mut header = self.header.clone();
        header.txn_counter = self.prev.txn_counter + cow.txn_count();
        let mut block = Block {
            header,
            payset: std::mem::take(&mut self.payset),
        };
        block.header.txn_root = match block.payset_commitment() {
            Ok(root) => root,
            Err(e) => {
                self.state = EvalState::Error;
                return Err(e.into());
            }
        };

        let (delta, audit) = cow.into_delta(self.withdrawn);
        self.header = block.header.clone();
        self.validated = Some(ValidatedBlock {
            block: block.clone(),
            delta,
            audit,
        });
        self.state = EvalState::Closed;

        tracing::info!(
            round = block.round(),
            txns = block.payset.len(),
            txn_counter = block.header.txn_counter,
            "Block finalized"
        );
        Ok(block)
    }

    /// Hand over the finalized block for commit
    pub fn take_validated(&mut self) -> Result<ValidatedBlock> {
        self.require(EvalState::Closed)?;
        self.validated
            .take()
            .ok_or_else(|| Error::InvalidState("block already handed over".to_string()))
    }

    /// Record the outcome of a commit attempt
    pub fn mark_committed(&mut self, committed: bool) {
        self.state = if committed {
            EvalState::Committed
        } else {
            EvalState::Error
        };
    }
}

fn apply_members(
    cow: &mut Cow,
    proto: &ConsensusParams,
    prev: &BlockHeader,
    header: &BlockHeader,
    payset: &mut Vec<SignedTxnWithAd>,
    group: &[SignedTxn],
) -> Result<()> {
    let txns: Vec<Transaction> = group.iter().map(|s| s.txn.clone()).collect();
    let fees = txns.iter().fold(0u64, |acc, t| acc.saturating_add(t.fee));
    let app_calls = txns
        .iter()
        .filter(|t| t.tx_type == TxType::ApplicationCall)
        .count() as u64;

    let mut ctx = EvalCtx {
        cow,
        proto,
        header,
        prev_timestamp: prev.timestamp,
        prev_counter: prev.txn_counter,
        budget: proto.max_app_program_cost * app_calls,
        fee_credit: fees.saturating_sub(proto.min_txn_fee * txns.len() as u64),
        window: (0, 0),
    };

    let mut applied: Vec<ApplyData> = Vec::with_capacity(group.len());
    for (index, stxn) in group.iter().enumerate() {
        let ad = ctx
            .apply_signed(stxn, &txns, &applied, index)
            .map_err(|e| match e {
                Error::Evaluation(message) => match stxn.id() {
                    Ok(id) => Error::Evaluation(format!("transaction {}: {}", id, message)),
                    Err(e) => e.into(),
                },
                other => other,
            })?;
        payset.push(SignedTxnWithAd::in_block(stxn.clone(), ad.clone(), header));
        applied.push(ad);
    }
    Ok(())
}
