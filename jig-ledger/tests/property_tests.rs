//! Property-based tests for harness invariants
//!
//! - Canonical encoding: equal results encode to equal bytes, and decoding
//!   never changes them
//! - Grouping: partitioning keeps every transaction, in order
//! - Rewards: the level never decreases and withdrawals are covered by the
//!   pool

use jig_ledger::eval::RewardsState;
use jig_ledger::reader::partition_groups;
use jig_ledger::types::box_key;
use jig_ledger::EvaluationResult;
use jig_protocol::{
    AccountData, Address, AssetHolding, Block, BlockHeader, ConsensusParams, Digest, SignedTxn,
    Transaction, TxType,
};
use proptest::prelude::*;
use serde_bytes::ByteBuf;
use std::collections::BTreeMap;

fn address_strategy() -> impl Strategy<Value = Address> {
    any::<[u8; 32]>().prop_map(Address)
}

fn account_strategy() -> impl Strategy<Value = AccountData> {
    (
        any::<u64>(),
        prop::collection::btree_map(1u64..1_000, any::<u64>(), 0..4),
        any::<u64>(),
    )
        .prop_map(|(balance, holdings, boxes)| AccountData {
            micro_algos: balance,
            assets: holdings
                .into_iter()
                .map(|(id, amount)| {
                    (
                        id,
                        AssetHolding {
                            amount,
                            frozen: amount % 2 == 0,
                        },
                    )
                })
                .collect(),
            total_boxes: boxes,
            ..Default::default()
        })
}

fn result_strategy() -> impl Strategy<Value = EvaluationResult> {
    (
        1u64..1_000_000,
        any::<i64>(),
        prop::collection::btree_map(address_strategy(), account_strategy(), 0..6),
        prop::collection::btree_map(
            (1u64..100, prop::collection::vec(any::<u8>(), 1..16)),
            prop::collection::vec(any::<u8>(), 0..32),
            0..6,
        ),
    )
        .prop_map(|(round, timestamp, accounts, boxes)| EvaluationResult {
            block: Block {
                header: BlockHeader {
                    round,
                    timestamp,
                    genesis_id: "algojig".to_string(),
                    ..Default::default()
                },
                payset: vec![],
            },
            accounts,
            boxes: boxes
                .into_iter()
                .map(|((app, name), value)| (ByteBuf::from(box_key(app, &name)), ByteBuf::from(value)))
                .collect(),
        })
}

/// Transactions tagged with a group id drawn from a tiny alphabet so that
/// adjacent runs are common
fn batch_strategy() -> impl Strategy<Value = Vec<(u8, u64)>> {
    prop::collection::vec((0u8..3, any::<u64>()), 0..20)
}

fn stxn(group: u8, amount: u64) -> SignedTxn {
    SignedTxn {
        txn: Transaction {
            tx_type: TxType::Payment,
            sender: Address([1; 32]),
            amount,
            group: if group == 0 {
                Digest::ZERO
            } else {
                Digest([group; 32])
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

proptest! {
    #[test]
    fn prop_encoding_is_deterministic(result in result_strategy()) {
        let first = result.encode().unwrap();
        let second = result.clone().encode().unwrap();
        prop_assert_eq!(&first, &second);

        let decoded = EvaluationResult::decode(&first).unwrap();
        prop_assert_eq!(&decoded, &result);
        prop_assert_eq!(decoded.encode().unwrap(), first);
    }

    #[test]
    fn prop_partition_keeps_order(batch in batch_strategy()) {
        let stxns: Vec<SignedTxn> = batch.iter().map(|(g, a)| stxn(*g, *a)).collect();
        let groups = partition_groups(stxns.clone());

        let flattened: Vec<SignedTxn> = groups.iter().flatten().cloned().collect();
        prop_assert_eq!(flattened, stxns);
        for group in &groups {
            prop_assert!(!group.is_empty());
            if group.len() > 1 {
                let id = group[0].txn.group;
                prop_assert!(!id.is_zero());
                prop_assert!(group.iter().all(|s| s.txn.group == id));
            }
        }
        for pair in groups.windows(2) {
            let last = &pair[0][pair[0].len() - 1].txn.group;
            let next = &pair[1][0].txn.group;
            prop_assert!(last.is_zero() || last != next);
        }
    }

    #[test]
    fn prop_rewards_level_monotonic(
        level in 0u64..1_000_000,
        rate in 0u64..1_000_000,
        residue in 0u64..1_000,
        extra in 0u64..10_000_000_000,
        units in 0u64..1_000_000,
        round in 1u64..1_000_000,
    ) {
        let proto = ConsensusParams::future();
        // The pool always keeps its minimum balance and the undistributed residue
        let pool = proto.min_balance + residue + extra;
        let prev = RewardsState {
            level,
            rate,
            residue,
            recalculation_round: 500_000,
        };
        let next = prev.next(round, &proto, pool, units);
        prop_assert!(next.level >= prev.level);

        let withdrawn = next.withdrawal(&prev, units);
        prop_assert!(withdrawn <= pool.saturating_sub(proto.min_balance));
    }
}

#[test]
fn test_result_key_order_is_canonical() {
    let mut accounts = BTreeMap::new();
    accounts.insert(Address([9; 32]), AccountData::with_balance(1));
    accounts.insert(Address([1; 32]), AccountData::with_balance(2));
    let result = EvaluationResult {
        block: Block {
            header: BlockHeader::default(),
            payset: vec![],
        },
        accounts,
        boxes: BTreeMap::new(),
    };
    let bytes = result.encode().unwrap();
    let low = bytes.windows(32).position(|w| w == [1u8; 32]).unwrap();
    let high = bytes.windows(32).position(|w| w == [9u8; 32]).unwrap();
    assert!(low < high);
}
