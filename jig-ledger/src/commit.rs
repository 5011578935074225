//! Block commit
//!
//! A finalized block is checked against the chain invariants, handed to the
//! commit actor, and waited on until durable.

use crate::eval::{BlockEvaluator, EvalState};
use crate::ledger::Ledger;
use crate::types::ValidatedBlock;
use crate::{Error, Result};
use jig_protocol::BlockHeader;

/// Check that `validated` extends `prev`.
///
/// - round is `prev.round + 1`
/// - fee sink and rewards pool do not change
/// - rewards level and transaction counter never decrease
/// - rewards credited to accounts equal the pool withdrawal and total
///   balances move only by what was credited
pub fn check_invariants(prev: &BlockHeader, validated: &ValidatedBlock) -> Result<()> {
    let header = &validated.block.header;
    if header.round != prev.round + 1 {
        return Err(Error::Commit(format!(
            "round {} does not follow {}",
            header.round, prev.round
        )));
    }
    if header.fee_sink != prev.fee_sink || header.rewards_pool != prev.rewards_pool {
        return Err(Error::Commit(format!(
            "round {}: special addresses changed",
            header.round
        )));
    }
    if header.rewards_level < prev.rewards_level {
        return Err(Error::Commit(format!(
            "round {}: rewards level {} below previous {}",
            header.round, header.rewards_level, prev.rewards_level
        )));
    }
    if header.txn_counter < prev.txn_counter {
        return Err(Error::Commit(format!(
            "round {}: txn counter {} below previous {}",
            header.round, header.txn_counter, prev.txn_counter
        )));
    }
    if !validated.audit.conserved() {
        return Err(Error::Commit(format!(
            "round {}: balances not conserved ({:?})",
            header.round, validated.audit
        )));
    }
    Ok(())
}

/// Commit the block of a finalized evaluator and wait until it is durable
pub async fn commit(ledger: &Ledger, evaluator: &mut BlockEvaluator) -> Result<()> {
    if evaluator.state() != EvalState::Closed {
        return Err(Error::Commit(format!(
            "evaluator is {}, expected closed",
            evaluator.state()
        )));
    }
    let validated = evaluator.take_validated()?;
    let round = validated.block.round();
    let applied = validated
        .block
        .header
        .txn_counter
        .saturating_sub(evaluator.prev_header().txn_counter);

    let result = async {
        ledger.add_block(validated).await?;
        ledger.wait(round).await
    }
    .await;

    match result {
        Ok(()) => {
            ledger.metrics().applied_txns.inc_by(applied);
            evaluator.mark_committed(true);
            tracing::info!(round, applied, "Block committed");
            Ok(())
        }
        Err(e) => {
            evaluator.mark_committed(false);
            tracing::error!(round, "Commit failed: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RewardsAudit, StateDelta};
    use jig_protocol::{Address, Block};

    fn validated(prev: &BlockHeader) -> ValidatedBlock {
        ValidatedBlock {
            block: Block {
                header: prev.next().unwrap(),
                payset: vec![],
            },
            delta: StateDelta::default(),
            audit: RewardsAudit::default(),
        }
    }

    fn genesis() -> BlockHeader {
        BlockHeader {
            fee_sink: Address([1; 32]),
            rewards_pool: Address([2; 32]),
            txn_counter: 10,
            rewards_level: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_next_block_passes() {
        let prev = genesis();
        check_invariants(&prev, &validated(&prev)).unwrap();
    }

    #[test]
    fn test_round_gap_rejected() {
        let prev = genesis();
        let mut block = validated(&prev);
        block.block.header.round = 5;
        assert!(matches!(check_invariants(&prev, &block), Err(Error::Commit(_))));
    }

    #[test]
    fn test_counter_and_level_monotonic() {
        let prev = genesis();
        let mut block = validated(&prev);
        block.block.header.txn_counter = 9;
        assert!(check_invariants(&prev, &block).is_err());

        let mut block = validated(&prev);
        block.block.header.rewards_level = 2;
        assert!(check_invariants(&prev, &block).is_err());
    }

    #[test]
    fn test_special_addresses_fixed() {
        let prev = genesis();
        let mut block = validated(&prev);
        block.block.header.fee_sink = Address([9; 32]);
        assert!(check_invariants(&prev, &block).is_err());
    }

    #[test]
    fn test_unbalanced_audit_rejected() {
        let prev = genesis();
        let mut block = validated(&prev);
        block.audit = RewardsAudit {
            balances_before: 100,
            balances_after: 101,
            credited: 0,
            withdrawn: 0,
        };
        assert!(check_invariants(&prev, &block).is_err());
    }
}
