//! Blocks, block headers and apply data

use crate::address::{Address, Digest, Signature};
use crate::crypto::{self, prefix};
use crate::encoding::{canonical_bytes, is_false, is_zero, KvKey};
use crate::transaction::{LogicSig, MultisigSig, SignedTxn};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use std::collections::BTreeMap;

/// Block header
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Rewards level
    #[serde(rename = "earn", default, skip_serializing_if = "is_zero")]
    pub rewards_level: u64,
    /// Fee sink address
    #[serde(rename = "fees", default, skip_serializing_if = "Address::is_zero")]
    pub fee_sink: Address,
    /// Rewards residue
    #[serde(rename = "frac", default, skip_serializing_if = "is_zero")]
    pub rewards_residue: u64,
    /// Genesis id
    #[serde(rename = "gen", default, skip_serializing_if = "String::is_empty")]
    pub genesis_id: String,
    /// Genesis hash
    #[serde(rename = "gh", default, skip_serializing_if = "Digest::is_zero")]
    pub genesis_hash: Digest,
    /// Hash of the previous header
    #[serde(rename = "prev", default, skip_serializing_if = "Digest::is_zero")]
    pub previous_hash: Digest,
    /// Protocol version
    #[serde(rename = "proto", default, skip_serializing_if = "String::is_empty")]
    pub current_protocol: String,
    /// Rewards rate
    #[serde(rename = "rate", default, skip_serializing_if = "is_zero")]
    pub rewards_rate: u64,
    /// Round
    #[serde(rename = "rnd", default, skip_serializing_if = "is_zero")]
    pub round: u64,
    /// Next rewards rate recalculation round
    #[serde(rename = "rwcalr", default, skip_serializing_if = "is_zero")]
    pub rewards_recalculation_round: u64,
    /// Rewards pool address
    #[serde(rename = "rwd", default, skip_serializing_if = "Address::is_zero")]
    pub rewards_pool: Address,
    /// Seed
    #[serde(rename = "seed", default, skip_serializing_if = "Digest::is_zero")]
    pub seed: Digest,
    /// Transactions (including inner ones) ever applied
    #[serde(rename = "tc", default, skip_serializing_if = "is_zero")]
    pub txn_counter: u64,
    /// Timestamp (seconds)
    #[serde(rename = "ts", default, skip_serializing_if = "is_zero")]
    pub timestamp: i64,
    /// Payset commitment
    #[serde(rename = "txn", default, skip_serializing_if = "Digest::is_zero")]
    pub txn_root: Digest,
}

impl BlockHeader {
    /// Header hash: `H("BH" || encoding)`
    pub fn hash(&self) -> crate::Result<Digest> {
        Ok(crypto::hash_with_prefix(prefix::BLOCK_HEADER, &canonical_bytes(self)?))
    }

    /// Header of the following round, before any transaction is applied.
    ///
    /// Carries identifiers, protocol, rewards state, counter and timestamp
    /// forward and links to this header's hash.
    pub fn next(&self) -> crate::Result<BlockHeader> {
        let previous_hash = self.hash()?;
        Ok(BlockHeader {
            round: self.round + 1,
            previous_hash,
            seed: crypto::sha512_256(&previous_hash.0),
            txn_root: Digest::ZERO,
            ..self.clone()
        })
    }
}

/// Change to one key of application state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValueDelta {
    /// Action: 1 set bytes, 2 set uint, 3 delete
    #[serde(rename = "at", default)]
    pub action: u64,
    /// Bytes value
    #[serde(rename = "bs", default, skip_serializing_if = "is_zero")]
    pub bytes: ByteBuf,
    /// Uint value
    #[serde(rename = "ui", default, skip_serializing_if = "is_zero")]
    pub uint: u64,
}

impl ValueDelta {
    /// Set bytes action
    pub const SET_BYTES: u64 = 1;
    /// Set uint action
    pub const SET_UINT: u64 = 2;
    /// Delete action
    pub const DELETE: u64 = 3;
}

/// State changes, logs and inner transactions of an application call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvalDelta {
    /// Global state changes
    #[serde(rename = "gd", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub global_delta: BTreeMap<KvKey, ValueDelta>,
    /// Inner transactions
    #[serde(rename = "itx", default, skip_serializing_if = "Vec::is_empty")]
    pub inner_txns: Vec<SignedTxnWithAd>,
    /// Local state changes keyed by account index (0 is the sender)
    #[serde(rename = "ld", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub local_deltas: BTreeMap<u64, BTreeMap<KvKey, ValueDelta>>,
    /// Logs
    #[serde(rename = "lg", default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<ByteBuf>,
}

impl EvalDelta {
    /// True when nothing happened
    pub fn is_empty(&self) -> bool {
        self.global_delta.is_empty()
            && self.inner_txns.is_empty()
            && self.local_deltas.is_empty()
            && self.logs.is_empty()
    }
}

/// Effects of applying a transaction
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApplyData {
    /// Amount moved by `close`
    pub closing_amount: u64,
    /// Asset amount moved by `aclose`
    pub asset_closing_amount: u64,
    /// Rewards credited to the sender
    pub sender_rewards: u64,
    /// Rewards credited to the receiver
    pub receiver_rewards: u64,
    /// Rewards credited to the close-to account
    pub close_rewards: u64,
    /// Application effects
    pub eval_delta: EvalDelta,
    /// Created asset id
    pub config_asset: u64,
    /// Created application id
    pub application_id: u64,
}

/// Signed transaction merged with its apply data, as stored in a block
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignedTxnWithAd {
    /// Asset closing amount
    #[serde(rename = "aca", default, skip_serializing_if = "is_zero")]
    pub asset_closing_amount: u64,
    /// Created application id
    #[serde(rename = "apid", default, skip_serializing_if = "is_zero")]
    pub application_id: u64,
    /// Closing amount
    #[serde(rename = "ca", default, skip_serializing_if = "is_zero")]
    pub closing_amount: u64,
    /// Created asset id
    #[serde(rename = "caid", default, skip_serializing_if = "is_zero")]
    pub config_asset: u64,
    /// Application effects
    #[serde(rename = "dt", default, skip_serializing_if = "EvalDelta::is_empty")]
    pub eval_delta: EvalDelta,
    /// Genesis hash was stripped and equals the block's
    #[serde(rename = "hgh", default, skip_serializing_if = "is_false")]
    pub has_genesis_hash: bool,
    /// Genesis id was stripped and equals the block's
    #[serde(rename = "hgi", default, skip_serializing_if = "is_false")]
    pub has_genesis_id: bool,
    /// Logic signature
    #[serde(rename = "lsig", default, skip_serializing_if = "LogicSig::is_blank")]
    pub lsig: LogicSig,
    /// Multisig
    #[serde(rename = "msig", default, skip_serializing_if = "MultisigSig::is_blank")]
    pub msig: MultisigSig,
    /// Close rewards
    #[serde(rename = "rc", default, skip_serializing_if = "is_zero")]
    pub close_rewards: u64,
    /// Receiver rewards
    #[serde(rename = "rr", default, skip_serializing_if = "is_zero")]
    pub receiver_rewards: u64,
    /// Sender rewards
    #[serde(rename = "rs", default, skip_serializing_if = "is_zero")]
    pub sender_rewards: u64,
    /// Auth address
    #[serde(rename = "sgnr", default, skip_serializing_if = "Address::is_zero")]
    pub auth_addr: Address,
    /// Signature
    #[serde(rename = "sig", default, skip_serializing_if = "Signature::is_zero")]
    pub sig: Signature,
    /// Transaction
    #[serde(rename = "txn")]
    pub txn: crate::transaction::Transaction,
}

impl SignedTxnWithAd {
    /// Merge a signed transaction with its apply data
    pub fn new(stxn: SignedTxn, ad: ApplyData) -> Self {
        Self {
            asset_closing_amount: ad.asset_closing_amount,
            application_id: ad.application_id,
            closing_amount: ad.closing_amount,
            config_asset: ad.config_asset,
            eval_delta: ad.eval_delta,
            has_genesis_hash: false,
            has_genesis_id: false,
            lsig: stxn.lsig,
            msig: stxn.msig,
            close_rewards: ad.close_rewards,
            receiver_rewards: ad.receiver_rewards,
            sender_rewards: ad.sender_rewards,
            auth_addr: stxn.auth_addr,
            sig: stxn.sig,
            txn: stxn.txn,
        }
    }

    /// Form stored in a block: genesis id and hash are stripped when they
    /// match the block and flagged instead
    pub fn in_block(stxn: SignedTxn, ad: ApplyData, header: &BlockHeader) -> Self {
        let mut out = Self::new(stxn, ad);
        if !out.txn.genesis_id.is_empty() && out.txn.genesis_id == header.genesis_id {
            out.txn.genesis_id.clear();
            out.has_genesis_id = true;
        }
        if out.txn.genesis_hash == header.genesis_hash {
            out.txn.genesis_hash = Digest::ZERO;
            out.has_genesis_hash = true;
        }
        out
    }

    /// Signed transaction as originally submitted
    pub fn signed_txn(&self, header: &BlockHeader) -> SignedTxn {
        let mut txn = self.txn.clone();
        if self.has_genesis_id {
            txn.genesis_id = header.genesis_id.clone();
        }
        if self.has_genesis_hash {
            txn.genesis_hash = header.genesis_hash;
        }
        SignedTxn {
            lsig: self.lsig.clone(),
            msig: self.msig.clone(),
            auth_addr: self.auth_addr,
            sig: self.sig,
            txn,
        }
    }
}

/// Block: header plus applied transactions
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Block {
    /// Header
    #[serde(flatten)]
    pub header: BlockHeader,
    /// Applied transactions in order
    #[serde(rename = "txns", default, skip_serializing_if = "Vec::is_empty")]
    pub payset: Vec<SignedTxnWithAd>,
}

impl Block {
    /// Round of the block
    pub fn round(&self) -> u64 {
        self.header.round
    }

    /// Commitment over the payset: Merkle root of `H("TL" || txid || H("STIB" || stxn))`
    pub fn payset_commitment(&self) -> crate::Result<Digest> {
        let leaves = self
            .payset
            .iter()
            .map(|stib| -> crate::Result<Digest> {
                let stib_hash =
                    crypto::hash_with_prefix(prefix::SIGNED_TXN_IN_BLOCK, &canonical_bytes(stib)?);
                let txid = stib.signed_txn(&self.header).id()?;
                let mut leaf = [0u8; 64];
                leaf[..32].copy_from_slice(&txid.0);
                leaf[32..].copy_from_slice(&stib_hash.0);
                Ok(crypto::hash_with_prefix(prefix::PAYSET_LEAF, &leaf))
            })
            .collect::<crate::Result<Vec<Digest>>>()?;
        Ok(crypto::merkle_root(&leaves))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode, encode};
    use crate::transaction::{Transaction, TxType};

    fn header() -> BlockHeader {
        BlockHeader {
            round: 1,
            genesis_id: "algojig".to_string(),
            genesis_hash: Digest([9u8; 32]),
            current_protocol: "future".to_string(),
            timestamp: 1000,
            txn_counter: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_next_links_previous() {
        let h = header();
        let n = h.next().unwrap();
        assert_eq!(n.round, 2);
        assert_eq!(n.previous_hash, h.hash().unwrap());
        assert_eq!(n.timestamp, h.timestamp);
        assert_eq!(n.txn_counter, h.txn_counter);
    }

    #[test]
    fn test_block_header_flattened() {
        let block = Block {
            header: header(),
            payset: vec![],
        };
        let bytes = encode(&block).unwrap();
        let back: Block = decode(&bytes).unwrap();
        assert_eq!(back, block);
        assert!(!bytes.windows(4).any(|w| w == b"txns"));
    }

    #[test]
    fn test_genesis_fields_stripped_in_block() {
        let h = header();
        let stxn = SignedTxn {
            txn: Transaction {
                tx_type: TxType::Payment,
                genesis_id: h.genesis_id.clone(),
                genesis_hash: h.genesis_hash,
                fee: 1000,
                ..Default::default()
            },
            ..Default::default()
        };
        let stib = SignedTxnWithAd::in_block(stxn.clone(), ApplyData::default(), &h);
        assert!(stib.has_genesis_id && stib.has_genesis_hash);
        assert!(stib.txn.genesis_id.is_empty());
        assert_eq!(stib.signed_txn(&h), stxn);
    }

    #[test]
    fn test_payset_commitment_depends_on_order() {
        let h = header();
        let mk = |amount| {
            SignedTxnWithAd::in_block(
                SignedTxn {
                    txn: Transaction {
                        amount,
                        ..Default::default()
                    },
                    ..Default::default()
                },
                ApplyData::default(),
                &h,
            )
        };
        let a = Block {
            header: h.clone(),
            payset: vec![mk(1), mk(2)],
        };
        let b = Block {
            header: h.clone(),
            payset: vec![mk(2), mk(1)],
        };
        assert_ne!(a.payset_commitment().unwrap(), b.payset_commitment().unwrap());
        assert_eq!(Block::default().payset_commitment().unwrap(), Digest::ZERO);
    }
}
