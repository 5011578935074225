//! Post-commit state extraction
//!
//! Collects every account the batch reached, directly or through inner
//! transactions and created assets/applications, plus the boxes under a key
//! prefix. All reads are against the latest committed round.

use crate::ledger::Ledger;
use crate::types::CreatableKind;
use crate::Result;
use jig_protocol::crypto::app_address;
use jig_protocol::{AccountData, Address, Block, SignedTxn, SignedTxnWithAd, Transaction, TxType};
use serde_bytes::ByteBuf;
use std::collections::{BTreeMap, BTreeSet};

fn push_roles(txn: &Transaction, out: &mut BTreeSet<Address>) {
    out.extend(txn.relevant_addresses());
    if txn.tx_type == TxType::ApplicationCall {
        out.extend(txn.accounts.iter().copied());
        if txn.application_id != 0 {
            out.insert(app_address(txn.application_id));
        }
    }
}

/// Addresses referenced by the batch.
///
/// For application calls this includes the app account and the app creator;
/// a creator that cannot be found is skipped.
pub fn extract_addresses(batch: &[SignedTxn], ledger: &Ledger) -> Result<BTreeSet<Address>> {
    let mut out = BTreeSet::new();
    for stxn in batch {
        let txn = &stxn.txn;
        push_roles(txn, &mut out);
        if txn.tx_type == TxType::ApplicationCall && txn.application_id != 0 {
            if let Some(creator) =
                ledger.lookup_creator(txn.application_id, CreatableKind::Application)?
            {
                out.insert(creator);
            }
        }
    }
    out.remove(&Address::ZERO);
    Ok(out)
}

/// Addresses reached by the block's inner transactions and by applications
/// it created
pub fn extract_inner_addresses(block: &Block) -> BTreeSet<Address> {
    fn walk(stxns: &[SignedTxnWithAd], out: &mut BTreeSet<Address>, top: bool) {
        for stxn in stxns {
            if !top {
                push_roles(&stxn.txn, out);
            }
            if stxn.application_id != 0 {
                out.insert(app_address(stxn.application_id));
            }
            walk(&stxn.eval_delta.inner_txns, out, false);
        }
    }

    let mut out = BTreeSet::new();
    walk(&block.payset, &mut out, true);
    out.remove(&Address::ZERO);
    out
}

/// Creators of every asset or application with index in `(before, after]`
pub fn extract_creators(ledger: &Ledger, before: u64, after: u64) -> Result<BTreeSet<Address>> {
    let mut out = BTreeSet::new();
    if after <= before {
        return Ok(out);
    }
    let span = (after - before) as usize;
    for kind in [CreatableKind::Asset, CreatableKind::Application] {
        for locator in ledger.list_creatables(after, span, kind)? {
            if locator.index > before {
                out.insert(locator.creator);
            }
        }
    }
    Ok(out)
}

/// Latest record of each address; unknown addresses map to an empty record
pub fn extract_accounts(
    ledger: &Ledger,
    addresses: &BTreeSet<Address>,
) -> Result<BTreeMap<Address, AccountData>> {
    addresses
        .iter()
        .map(|addr| Ok((*addr, ledger.lookup_account(addr)?)))
        .collect()
}

/// Every key-value entry under `prefix` at `round`, ordered by key bytes
pub fn extract_boxes(ledger: &Ledger, round: u64, prefix: &[u8]) -> Result<BTreeMap<ByteBuf, ByteBuf>> {
    let mut out = BTreeMap::new();
    for key in ledger.lookup_keys_by_prefix(round, prefix, 0)? {
        if let Some(value) = ledger.lookup_kv(round, &key)? {
            out.insert(ByteBuf::from(key), ByteBuf::from(value));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jig_protocol::{ApplyData, EvalDelta};

    fn pay(sender: u8, receiver: u8) -> Transaction {
        Transaction {
            tx_type: TxType::Payment,
            sender: Address([sender; 32]),
            receiver: Address([receiver; 32]),
            ..Default::default()
        }
    }

    #[test]
    fn test_inner_addresses_walk_nested_calls() {
        let nested = SignedTxnWithAd::new(
            SignedTxn {
                txn: pay(8, 9),
                ..Default::default()
            },
            ApplyData::default(),
        );
        let inner = SignedTxnWithAd::new(
            SignedTxn {
                txn: pay(5, 6),
                ..Default::default()
            },
            ApplyData {
                eval_delta: EvalDelta {
                    inner_txns: vec![nested],
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let top = SignedTxnWithAd::new(
            SignedTxn {
                txn: Transaction {
                    tx_type: TxType::ApplicationCall,
                    sender: Address([1; 32]),
                    ..Default::default()
                },
                ..Default::default()
            },
            ApplyData {
                application_id: 77,
                eval_delta: EvalDelta {
                    inner_txns: vec![inner],
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let block = Block {
            header: Default::default(),
            payset: vec![top],
        };

        let found = extract_inner_addresses(&block);
        assert!(found.contains(&app_address(77)));
        for b in [5u8, 6, 8, 9] {
            assert!(found.contains(&Address([b; 32])));
        }
        // Top-level roles are collected from the batch instead
        assert!(!found.contains(&Address([1; 32])));
    }

    #[test]
    fn test_roles_skip_zero_address() {
        let mut out = BTreeSet::new();
        push_roles(&pay(1, 0), &mut out);
        out.remove(&Address::ZERO);
        assert_eq!(out.len(), 1);
    }
}
