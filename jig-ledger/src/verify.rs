//! Group verification
//!
//! Stateless checks run before a group touches the ledger: per-transaction
//! well-formedness, group hash consistency, pooled fees and authorization.
//! Authorization results are cached by the hash of the whole signed
//! transaction, so a transaction seen twice is only verified once.

use crate::error::{Error, Result};
use dashmap::DashMap;
use jig_avm::{eval_signature, GroupView};
use jig_protocol::crypto::{self, prefix};
use jig_protocol::{
    BlockHeader, ConsensusParams, Digest, OnCompletion, SignedTxn, Transaction, TxType,
};

/// Verified transaction cache
#[derive(Debug, Default)]
pub struct VerifiedCache {
    entries: DashMap<Digest, ()>,
}

impl VerifiedCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the signed transaction was already authorized
    pub fn contains(&self, stxn: &SignedTxn) -> Result<bool> {
        Ok(self.entries.contains_key(&stxn.cache_key()?))
    }

    /// Remember a successful authorization
    pub fn insert(&self, stxn: &SignedTxn) -> Result<()> {
        self.entries.insert(stxn.cache_key()?, ());
        Ok(())
    }

    /// Number of cached transactions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Summary of a successful verification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyOutcome {
    /// Members whose authorization came from the cache
    pub cache_hits: usize,
}

/// Verify a group against the reference header.
///
/// Fails on the first invalid member.
pub fn verify_group(
    group: &[SignedTxn],
    header: &BlockHeader,
    proto: &ConsensusParams,
    cache: &VerifiedCache,
) -> Result<VerifyOutcome> {
    if group.is_empty() {
        return Err(Error::Verification("empty transaction group".to_string()));
    }
    if group.len() > proto.max_tx_group_size {
        return Err(Error::Verification(format!(
            "group size {} exceeds maximum {}",
            group.len(),
            proto.max_tx_group_size
        )));
    }

    for stxn in group {
        well_formed(&stxn.txn, header, proto).map_err(|e| txn_error(stxn, e))?;
    }

    let txns: Vec<Transaction> = group.iter().map(|s| s.txn.clone()).collect();
    check_group_id(&txns)?;

    let fees = txns
        .iter()
        .fold(0u64, |acc, t| acc.saturating_add(t.fee));
    let required = proto.min_txn_fee.saturating_mul(txns.len() as u64);
    if fees < required {
        return Err(Error::Verification(format!(
            "txgroup had {} in fees, which is less than the minimum {} * {}",
            fees,
            txns.len(),
            proto.min_txn_fee
        )));
    }

    let view = GroupView::unapplied(&txns);
    let mut logic_budget = proto.logic_sig_max_cost.saturating_mul(txns.len() as u64);
    let mut outcome = VerifyOutcome::default();
    for (index, stxn) in group.iter().enumerate() {
        if cache.contains(stxn)? {
            outcome.cache_hits += 1;
            continue;
        }
        authorize(stxn, &view, index, &mut logic_budget, proto).map_err(|e| txn_error(stxn, e))?;
        cache.insert(stxn)?;
    }

    tracing::debug!(
        size = group.len(),
        cache_hits = outcome.cache_hits,
        "Group verified"
    );
    Ok(outcome)
}

fn txn_error(stxn: &SignedTxn, message: String) -> Error {
    match stxn.id() {
        Ok(id) => Error::Verification(format!("transaction {}: {}", id, message)),
        Err(e) => e.into(),
    }
}

fn check_group_id(txns: &[Transaction]) -> Result<()> {
    let grp = txns[0].group;
    if txns.len() == 1 && grp.is_zero() {
        return Ok(());
    }
    if let Some(t) = txns.iter().find(|t| t.group.is_zero() || t.group != grp) {
        return Err(Error::Verification(format!(
            "transactionGroup: incomplete group: {} has group {}, expected {}",
            t.id()?,
            t.group,
            grp
        )));
    }
    let expected = Transaction::group_id(txns)?;
    if expected != grp {
        return Err(Error::Verification(format!(
            "transactionGroup: incomplete group: {} != {}",
            grp, expected
        )));
    }
    Ok(())
}

/// Context-free validity of a single transaction
pub fn well_formed(
    txn: &Transaction,
    header: &BlockHeader,
    proto: &ConsensusParams,
) -> std::result::Result<(), String> {
    if txn.sender.is_zero() {
        return Err("transaction cannot have zero sender".to_string());
    }
    if txn.first_valid > txn.last_valid {
        return Err(format!(
            "transaction invalid range ({}--{})",
            txn.first_valid, txn.last_valid
        ));
    }
    if txn.last_valid - txn.first_valid > proto.max_txn_life {
        return Err(format!(
            "transaction window size excessive ({}--{})",
            txn.first_valid, txn.last_valid
        ));
    }
    if txn.note.len() > proto.max_txn_note_bytes {
        return Err(format!(
            "transaction note too big: {} > {}",
            txn.note.len(),
            proto.max_txn_note_bytes
        ));
    }
    if txn.genesis_hash.is_zero() {
        return Err("required field genesis hash is missing".to_string());
    }
    if txn.genesis_hash != header.genesis_hash {
        return Err(format!(
            "tx.GenesisHash <{}> does not match expected <{}>",
            txn.genesis_hash, header.genesis_hash
        ));
    }
    if !txn.genesis_id.is_empty() && txn.genesis_id != header.genesis_id {
        return Err(format!(
            "tx.GenesisID <{}> does not match expected <{}>",
            txn.genesis_id, header.genesis_id
        ));
    }

    match txn.tx_type {
        TxType::Payment => {
            if !txn.close_remainder_to.is_zero() && txn.close_remainder_to == txn.sender {
                return Err("transaction cannot close account to its sender".to_string());
            }
        }
        TxType::KeyRegistration => {
            let has_keys = !txn.vote_pk.is_zero()
                || !txn.selection_pk.is_zero()
                || !txn.state_proof_pk.is_empty()
                || txn.vote_key_dilution != 0
                || txn.vote_first != 0
                || txn.vote_last != 0;
            if txn.nonparticipation && has_keys {
                return Err(
                    "transaction tries to mark an account as nonparticipating, but carries participation keys"
                        .to_string(),
                );
            }
            if !txn.vote_pk.is_zero() && txn.vote_first > txn.vote_last {
                return Err(format!(
                    "transaction invalid vote range ({}--{})",
                    txn.vote_first, txn.vote_last
                ));
            }
        }
        TxType::AssetConfig => {
            let params = &txn.asset_params;
            if params.unit_name.len() > proto.max_asset_unit_name_bytes {
                return Err(format!(
                    "transaction asset unit name too big: {} > {}",
                    params.unit_name.len(),
                    proto.max_asset_unit_name_bytes
                ));
            }
            if params.asset_name.len() > proto.max_asset_name_bytes {
                return Err(format!(
                    "transaction asset name too big: {} > {}",
                    params.asset_name.len(),
                    proto.max_asset_name_bytes
                ));
            }
            if params.url.len() > proto.max_asset_url_bytes {
                return Err(format!(
                    "transaction asset url too big: {} > {}",
                    params.url.len(),
                    proto.max_asset_url_bytes
                ));
            }
            if params.decimals > proto.max_asset_decimals {
                return Err(format!(
                    "transaction asset decimals is too high (max is {})",
                    proto.max_asset_decimals
                ));
            }
        }
        TxType::AssetTransfer | TxType::AssetFreeze => {}
        TxType::ApplicationCall => app_call_well_formed(txn, proto)?,
    }
    Ok(())
}

fn app_call_well_formed(txn: &Transaction, proto: &ConsensusParams) -> std::result::Result<(), String> {
    let creating = txn.application_id == 0;
    let has_programs = !txn.approval_program.is_empty() || !txn.clear_state_program.is_empty();

    if !creating && txn.on_completion != OnCompletion::UpdateApplication && has_programs {
        return Err("programs may only be specified during application creation or update".to_string());
    }
    if creating {
        if txn.approval_program.is_empty() {
            return Err("approval program empty".to_string());
        }
        if txn.clear_state_program.is_empty() {
            return Err("clear state program empty".to_string());
        }
        if txn.on_completion == OnCompletion::ClearState {
            return Err("cannot clear state of an application being created".to_string());
        }
    } else {
        let has_schema = txn.global_state_schema.num_entries() != 0
            || txn.local_state_schema.num_entries() != 0;
        if has_schema {
            return Err("local and global state schemas are immutable".to_string());
        }
        if txn.extra_program_pages != 0 {
            return Err("tx.ExtraProgramPages is immutable".to_string());
        }
    }

    if txn.extra_program_pages > proto.max_extra_app_program_pages {
        return Err(format!(
            "tx.ExtraProgramPages exceeds MaxExtraAppProgramPages = {}",
            proto.max_extra_app_program_pages
        ));
    }
    let page_len = proto.max_app_program_len * (1 + txn.extra_program_pages as usize);
    if txn.approval_program.len() > page_len {
        return Err(format!("approval program too long. max len {} bytes", page_len));
    }
    if txn.clear_state_program.len() > page_len {
        return Err(format!("clear state program too long. max len {} bytes", page_len));
    }
    if txn.approval_program.len() + txn.clear_state_program.len() > page_len {
        return Err(format!("app programs too long. max total len {} bytes", page_len));
    }

    if txn.app_args.len() > proto.max_app_args {
        return Err(format!(
            "too many application args, max {}",
            proto.max_app_args
        ));
    }
    if txn.app_args_len() > proto.max_app_total_arg_len {
        return Err(format!(
            "application args total length too long, max len {} bytes",
            proto.max_app_total_arg_len
        ));
    }
    if txn.accounts.len() > proto.max_app_txn_accounts {
        return Err(format!(
            "tx.Accounts too long, max number of accounts is {}",
            proto.max_app_txn_accounts
        ));
    }
    if txn.foreign_apps.len() > proto.max_app_txn_foreign_apps {
        return Err(format!(
            "tx.ForeignApps too long, max number of foreign apps is {}",
            proto.max_app_txn_foreign_apps
        ));
    }
    if txn.foreign_assets.len() > proto.max_app_txn_foreign_assets {
        return Err(format!(
            "tx.ForeignAssets too long, max number of foreign assets is {}",
            proto.max_app_txn_foreign_assets
        ));
    }
    if txn.boxes.len() > proto.max_app_box_references {
        return Err(format!(
            "tx.Boxes too long, max number of box references is {}",
            proto.max_app_box_references
        ));
    }
    let references =
        txn.accounts.len() + txn.foreign_apps.len() + txn.foreign_assets.len() + txn.boxes.len();
    if references > proto.max_app_total_txn_references {
        return Err(format!(
            "tx references exceed MaxAppTotalTxnReferences = {}",
            proto.max_app_total_txn_references
        ));
    }
    for (i, bref) in txn.boxes.iter().enumerate() {
        if bref.index as usize > txn.foreign_apps.len() {
            return Err(format!(
                "tx.Boxes[{}].Index is {}. Exceeds len(tx.ForeignApps)",
                i, bref.index
            ));
        }
        if bref.name.len() > proto.max_app_key_len {
            return Err(format!(
                "tx.Boxes[{}].Name too long, max len {} bytes",
                i, proto.max_app_key_len
            ));
        }
    }
    if txn.global_state_schema.num_entries() > proto.max_global_schema_entries {
        return Err(format!(
            "tx.GlobalStateSchema too large, max number of keys is {}",
            proto.max_global_schema_entries
        ));
    }
    if txn.local_state_schema.num_entries() > proto.max_local_schema_entries {
        return Err(format!(
            "tx.LocalStateSchema too large, max number of keys is {}",
            proto.max_local_schema_entries
        ));
    }
    Ok(())
}

fn authorize(
    stxn: &SignedTxn,
    group: &GroupView<'_>,
    index: usize,
    logic_budget: &mut u64,
    proto: &ConsensusParams,
) -> std::result::Result<(), String> {
    let has_sig = !stxn.sig.is_zero();
    let has_msig = !stxn.msig.is_blank();
    let has_lsig = !stxn.lsig.is_blank();
    match [has_sig, has_msig, has_lsig].iter().filter(|b| **b).count() {
        0 => return Err("signedtxn has no sig".to_string()),
        1 => {}
        _ => return Err("signedtxn should only have one of Sig or Msig or LogicSig".to_string()),
    }

    let authorizer = stxn.authorizer();
    if has_sig {
        let payload = stxn.txn.canonical_bytes().map_err(|e| e.to_string())?;
        if !crypto::verify_with_prefix(&authorizer, prefix::TRANSACTION, &payload, &stxn.sig) {
            return Err("At least one signature didn't pass verification".to_string());
        }
        return Ok(());
    }

    if has_msig {
        if stxn.msig.address() != authorizer {
            return Err(format!(
                "multisig address {} does not match authorizer {}",
                stxn.msig.address(),
                authorizer
            ));
        }
        let mut message = prefix::TRANSACTION.to_vec();
        message.extend_from_slice(&stxn.txn.canonical_bytes().map_err(|e| e.to_string())?);
        return stxn.msig.verify(&message);
    }

    let lsig = &stxn.lsig;
    if lsig.logic.is_empty() {
        return Err("LogicSig.Logic empty".to_string());
    }
    if lsig.size() > proto.logic_sig_max_size {
        return Err(format!(
            "LogicSig.Logic too long, max {} bytes",
            proto.logic_sig_max_size
        ));
    }
    if !lsig.sig.is_zero() && !lsig.msig.is_blank() {
        return Err("LogicSig should only have one of Sig or Msig but has more than one".to_string());
    }
    if !lsig.sig.is_zero() {
        if !crypto::verify_with_prefix(&authorizer, prefix::PROGRAM, &lsig.logic, &lsig.sig) {
            return Err("logic signature delegation didn't pass verification".to_string());
        }
    } else if !lsig.msig.is_blank() {
        if lsig.msig.address() != authorizer {
            return Err(format!(
                "multisig address {} does not match authorizer {}",
                lsig.msig.address(),
                authorizer
            ));
        }
        lsig.msig.verify(&lsig.delegation_message())?;
    } else if lsig.address() != authorizer {
        return Err("LogicNot signed and not a Logic-only account".to_string());
    }

    match eval_signature(&lsig.logic, &lsig.args, group, index, logic_budget, proto) {
        Ok(true) => Ok(()),
        Ok(false) => Err("rejected by logic".to_string()),
        Err(e) => Err(format!("rejected by logic err={}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jig_avm::assemble;
    use jig_protocol::{KeyPair, LogicSig, MultisigSig, MultisigSubsig, Signature};
    use serde_bytes::ByteBuf;

    fn header() -> BlockHeader {
        BlockHeader {
            round: 0,
            genesis_id: "algojig".to_string(),
            genesis_hash: Digest([9; 32]),
            ..Default::default()
        }
    }

    fn pay(sender: jig_protocol::Address, amount: u64) -> Transaction {
        Transaction {
            tx_type: TxType::Payment,
            sender,
            receiver: jig_protocol::Address([2; 32]),
            amount,
            fee: 1000,
            first_valid: 1,
            last_valid: 100,
            genesis_hash: Digest([9; 32]),
            genesis_id: "algojig".to_string(),
            ..Default::default()
        }
    }

    fn verify(group: &[SignedTxn]) -> Result<VerifyOutcome> {
        verify_group(group, &header(), &ConsensusParams::future(), &VerifiedCache::new())
    }

    #[test]
    fn test_signed_payment() {
        let key = KeyPair::from_seed(&[1; 32]);
        let stxn = SignedTxn::sign(pay(key.address(), 5), &key).unwrap();
        verify(&[stxn]).unwrap();
    }

    #[test]
    fn test_bad_signature() {
        let key = KeyPair::from_seed(&[1; 32]);
        let mut stxn = SignedTxn::sign(pay(key.address(), 5), &key).unwrap();
        stxn.txn.amount = 6;
        let err = verify(&[stxn.clone()]).unwrap_err().to_string();
        assert!(err.contains(&format!("transaction {}:", stxn.id().unwrap())));
        assert!(err.contains("signature"));
    }

    #[test]
    fn test_missing_and_double_authorization() {
        let key = KeyPair::from_seed(&[1; 32]);
        let bare = SignedTxn {
            txn: pay(key.address(), 5),
            ..Default::default()
        };
        assert!(verify(&[bare]).unwrap_err().to_string().contains("no sig"));

        let mut both = SignedTxn::sign(pay(key.address(), 5), &key).unwrap();
        both.msig = MultisigSig {
            version: 1,
            threshold: 1,
            subsigs: vec![MultisigSubsig {
                key: key.address(),
                sig: Signature::ZERO,
            }],
        };
        assert!(verify(&[both]).unwrap_err().to_string().contains("only have one"));
    }

    #[test]
    fn test_rekeyed_signer() {
        let sender = KeyPair::from_seed(&[1; 32]);
        let signer = KeyPair::from_seed(&[2; 32]);
        let stxn = SignedTxn::sign(pay(sender.address(), 5), &signer).unwrap();
        assert_eq!(stxn.auth_addr, signer.address());
        verify(&[stxn]).unwrap();
    }

    #[test]
    fn test_multisig() {
        let a = KeyPair::from_seed(&[1; 32]);
        let b = KeyPair::from_seed(&[2; 32]);
        let msig_addr = crypto::multisig_address(1, 1, &[a.address(), b.address()]);
        let txn = pay(msig_addr, 5);
        let sig = a.sign_with_prefix(prefix::TRANSACTION, &txn.canonical_bytes().unwrap());
        let stxn = SignedTxn {
            msig: MultisigSig {
                version: 1,
                threshold: 1,
                subsigs: vec![
                    MultisigSubsig { key: a.address(), sig },
                    MultisigSubsig {
                        key: b.address(),
                        sig: Signature::ZERO,
                    },
                ],
            },
            txn,
            ..Default::default()
        };
        verify(&[stxn]).unwrap();
    }

    #[test]
    fn test_logic_sig_escrow() {
        let program = assemble("#pragma version 6\nint 1").unwrap().bytecode;
        let lsig = LogicSig {
            logic: ByteBuf::from(program),
            ..Default::default()
        };
        let stxn = SignedTxn::with_logic(pay(lsig.address(), 5), lsig);
        verify(&[stxn]).unwrap();
    }

    #[test]
    fn test_logic_sig_rejects() {
        let program = assemble("#pragma version 6\nint 0").unwrap().bytecode;
        let lsig = LogicSig {
            logic: ByteBuf::from(program),
            ..Default::default()
        };
        let stxn = SignedTxn::with_logic(pay(lsig.address(), 5), lsig);
        let err = verify(&[stxn]).unwrap_err().to_string();
        assert!(err.ends_with("rejected by logic"), "{}", err);

        let program = assemble("#pragma version 6\nerr").unwrap().bytecode;
        let lsig = LogicSig {
            logic: ByteBuf::from(program),
            ..Default::default()
        };
        let stxn = SignedTxn::with_logic(pay(lsig.address(), 5), lsig);
        let err = verify(&[stxn]).unwrap_err().to_string();
        assert!(err.contains("rejected by logic err="), "{}", err);
        assert!(err.contains("pc=1"), "{}", err);
    }

    #[test]
    fn test_logic_sig_wrong_account() {
        let program = assemble("#pragma version 6\nint 1").unwrap().bytecode;
        let lsig = LogicSig {
            logic: ByteBuf::from(program),
            ..Default::default()
        };
        let stxn = SignedTxn::with_logic(pay(jig_protocol::Address([5; 32]), 5), lsig);
        assert!(verify(&[stxn]).unwrap_err().to_string().contains("not a Logic-only"));
    }

    #[test]
    fn test_delegated_logic_sig() {
        let key = KeyPair::from_seed(&[1; 32]);
        let program = assemble("#pragma version 6\nint 1").unwrap().bytecode;
        let mut lsig = LogicSig {
            logic: ByteBuf::from(program),
            ..Default::default()
        };
        lsig.sig = key.sign_with_prefix(prefix::PROGRAM, &lsig.logic);
        let stxn = SignedTxn::with_logic(pay(key.address(), 5), lsig);
        verify(&[stxn]).unwrap();
    }

    #[test]
    fn test_group_consistency() {
        let key = KeyPair::from_seed(&[1; 32]);
        let mut a = pay(key.address(), 1);
        let mut b = pay(key.address(), 2);
        let gid = Transaction::group_id(&[a.clone(), b.clone()]).unwrap();
        a.group = gid;
        b.group = gid;
        let group = vec![
            SignedTxn::sign(a.clone(), &key).unwrap(),
            SignedTxn::sign(b, &key).unwrap(),
        ];
        verify(&group).unwrap();

        // A member missing from the group
        let partial = vec![SignedTxn::sign(a, &key).unwrap()];
        assert!(verify(&partial)
            .unwrap_err()
            .to_string()
            .contains("incomplete group"));
    }

    #[test]
    fn test_pooled_fees() {
        let key = KeyPair::from_seed(&[1; 32]);
        let mut a = pay(key.address(), 1);
        let mut b = pay(key.address(), 2);
        a.fee = 2000;
        b.fee = 0;
        let gid = Transaction::group_id(&[a.clone(), b.clone()]).unwrap();
        a.group = gid;
        b.group = gid;
        verify(&[
            SignedTxn::sign(a.clone(), &key).unwrap(),
            SignedTxn::sign(b.clone(), &key).unwrap(),
        ])
        .unwrap();

        let mut lone = pay(key.address(), 1);
        lone.fee = 10;
        let err = verify(&[SignedTxn::sign(lone, &key).unwrap()]).unwrap_err().to_string();
        assert!(err.contains("txgroup had 10 in fees, which is less than the minimum 1 * 1000"));
    }

    #[test]
    fn test_cache_hits_skip_authorization() {
        let key = KeyPair::from_seed(&[1; 32]);
        let stxn = SignedTxn::sign(pay(key.address(), 5), &key).unwrap();
        let cache = VerifiedCache::new();
        let proto = ConsensusParams::future();
        let first = verify_group(&[stxn.clone()], &header(), &proto, &cache).unwrap();
        assert_eq!(first.cache_hits, 0);
        let second = verify_group(&[stxn], &header(), &proto, &cache).unwrap();
        assert_eq!(second.cache_hits, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_well_formed_rules() {
        let proto = ConsensusParams::future();
        let h = header();
        let sender = jig_protocol::Address([1; 32]);

        let mut t = pay(sender, 1);
        t.first_valid = 10;
        t.last_valid = 5;
        assert!(well_formed(&t, &h, &proto).unwrap_err().contains("invalid range"));

        let mut t = pay(sender, 1);
        t.last_valid = 5000;
        assert!(well_formed(&t, &h, &proto).unwrap_err().contains("window size"));

        let mut t = pay(sender, 1);
        t.genesis_hash = Digest([1; 32]);
        assert!(well_formed(&t, &h, &proto).is_err());

        let mut t = pay(sender, 1);
        t.close_remainder_to = sender;
        assert!(well_formed(&t, &h, &proto).unwrap_err().contains("close account to its sender"));

        let mut t = pay(sender, 1);
        t.tx_type = TxType::ApplicationCall;
        t.application_id = 5;
        t.accounts = vec![sender; 5];
        assert!(well_formed(&t, &h, &proto).unwrap_err().contains("tx.Accounts too long"));

        let mut t = pay(sender, 1);
        t.tx_type = TxType::ApplicationCall;
        t.application_id = 5;
        t.boxes = vec![jig_protocol::BoxRef {
            index: 1,
            name: ByteBuf::from(b"x".to_vec()),
        }];
        assert!(well_formed(&t, &h, &proto).unwrap_err().contains("Exceeds len(tx.ForeignApps)"));

        let mut t = pay(sender, 1);
        t.tx_type = TxType::ApplicationCall;
        t.application_id = 5;
        t.foreign_apps = vec![1, 2, 3, 4, 5];
        t.foreign_assets = vec![1, 2, 3, 4];
        assert!(well_formed(&t, &h, &proto).unwrap_err().contains("MaxAppTotalTxnReferences"));

        let mut t = pay(sender, 1);
        t.tx_type = TxType::AssetConfig;
        t.asset_params.unit_name = "TOOLONGNAME".to_string();
        assert!(well_formed(&t, &h, &proto).unwrap_err().contains("unit name"));
    }
}
