//! Copy-on-write working state of a block under evaluation
//!
//! Reads fall through to storage at the previous round; writes stay in
//! memory until the block commits. Cloning the whole state is the group
//! checkpoint, so everything here is plain owned data.

use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::types::{CreatableKind, RewardsAudit, StateDelta};
use jig_protocol::transaction::AssetParams;
use jig_protocol::{AccountData, Address, AppParams, ConsensusParams, Digest};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct Cow {
    storage: Arc<Storage>,
    proto: ConsensusParams,
    rewards_level: u64,

    accounts: BTreeMap<Address, AccountData>,
    /// Records as stored before this block, for the delta and the audit
    originals: BTreeMap<Address, AccountData>,
    /// Rewards credited on load and not yet reported in apply data
    pending_rewards: BTreeMap<Address, u64>,
    credited: u64,
    touched: BTreeSet<Address>,

    creatables: BTreeMap<(CreatableKind, u64), Option<Address>>,
    kv: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    txn_count: u64,

    txids: BTreeSet<Digest>,
    /// (sender, lease) to the last round the lease is held
    leases: BTreeMap<(Address, Digest), u64>,
}

impl std::fmt::Debug for Cow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cow")
            .field("accounts", &self.accounts.len())
            .field("creatables", &self.creatables.len())
            .field("kv", &self.kv.len())
            .field("txn_count", &self.txn_count)
            .finish()
    }
}

impl Cow {
    pub(crate) fn new(storage: Arc<Storage>, proto: ConsensusParams, rewards_level: u64) -> Self {
        Self {
            storage,
            proto,
            rewards_level,
            accounts: BTreeMap::new(),
            originals: BTreeMap::new(),
            pending_rewards: BTreeMap::new(),
            credited: 0,
            touched: BTreeSet::new(),
            creatables: BTreeMap::new(),
            kv: BTreeMap::new(),
            txn_count: 0,
            txids: BTreeSet::new(),
            leases: BTreeMap::new(),
        }
    }

    fn load(&mut self, addr: &Address) -> Result<()> {
        if self.accounts.contains_key(addr) {
            return Ok(());
        }
        let stored = self.storage.get_account(addr)?.unwrap_or_default();
        let mut data = stored.clone();
        if !data.is_empty() {
            let credited = data.apply_rewards(&self.proto, self.rewards_level);
            if credited > 0 {
                self.credited = self.credited.saturating_add(credited);
                self.pending_rewards.insert(*addr, credited);
            }
        }
        self.originals.insert(*addr, stored);
        self.accounts.insert(*addr, data);
        Ok(())
    }

    /// Current record, empty for unknown accounts
    pub(crate) fn get(&mut self, addr: &Address) -> Result<&AccountData> {
        self.load(addr)?;
        self.accounts
            .get(addr)
            .ok_or_else(|| Error::InvalidState(format!("account {} not loaded", addr)))
    }

    /// Mutable record; marks the account touched for the min balance check
    pub(crate) fn get_mut(&mut self, addr: &Address) -> Result<&mut AccountData> {
        self.load(addr)?;
        self.touched.insert(*addr);
        self.accounts
            .get_mut(addr)
            .ok_or_else(|| Error::InvalidState(format!("account {} not loaded", addr)))
    }

    /// Rewards credited to `addr` since the last call
    pub(crate) fn take_rewards(&mut self, addr: &Address) -> u64 {
        self.pending_rewards.remove(addr).unwrap_or(0)
    }

    pub(crate) fn take_touched(&mut self) -> BTreeSet<Address> {
        std::mem::take(&mut self.touched)
    }

    pub(crate) fn debit(&mut self, addr: &Address, amount: u64) -> Result<()> {
        let data = self.get_mut(addr)?;
        match data.micro_algos.checked_sub(amount) {
            Some(rest) => {
                data.micro_algos = rest;
                Ok(())
            }
            None => Err(Error::Evaluation(format!(
                "overspend (account {}, balance {}, tried to spend {})",
                addr, data.micro_algos, amount
            ))),
        }
    }

    pub(crate) fn credit(&mut self, addr: &Address, amount: u64) -> Result<()> {
        let data = self.get_mut(addr)?;
        data.micro_algos = data.micro_algos.checked_add(amount).ok_or_else(|| {
            Error::Evaluation(format!("balance overflow (account {})", addr))
        })?;
        Ok(())
    }

    pub(crate) fn transfer(&mut self, from: &Address, to: &Address, amount: u64) -> Result<()> {
        self.debit(from, amount)?;
        self.credit(to, amount)
    }

    // Creatables

    pub(crate) fn creator(&self, kind: CreatableKind, index: u64) -> Result<Option<Address>> {
        match self.creatables.get(&(kind, index)) {
            Some(entry) => Ok(*entry),
            None => self.storage.get_creator(kind, index),
        }
    }

    pub(crate) fn set_creator(&mut self, kind: CreatableKind, index: u64, creator: Option<Address>) {
        self.creatables.insert((kind, index), creator);
    }

    pub(crate) fn app_params(&mut self, app_id: u64) -> Result<Option<(AppParams, Address)>> {
        let creator = match self.creator(CreatableKind::Application, app_id)? {
            Some(c) => c,
            None => return Ok(None),
        };
        let params = self.get(&creator)?.app_params.get(&app_id).cloned();
        Ok(params.map(|p| (p, creator)))
    }

    pub(crate) fn asset_params(&mut self, asset_id: u64) -> Result<Option<(AssetParams, Address)>> {
        let creator = match self.creator(CreatableKind::Asset, asset_id)? {
            Some(c) => c,
            None => return Ok(None),
        };
        let params = self.get(&creator)?.asset_params.get(&asset_id).cloned();
        Ok(params.map(|p| (p, creator)))
    }

    // Key-value entries

    pub(crate) fn get_kv(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.kv.get(key) {
            Some(entry) => Ok(entry.clone()),
            None => self.storage.get_kv(key),
        }
    }

    pub(crate) fn set_kv(&mut self, key: Vec<u8>, value: Option<Vec<u8>>) {
        self.kv.insert(key, value);
    }

    // Counter

    /// Count one more applied transaction, returning the id a creatable made
    /// by it receives
    pub(crate) fn next_txn(&mut self, prev_counter: u64) -> u64 {
        self.txn_count += 1;
        prev_counter + self.txn_count
    }

    pub(crate) fn txn_count(&self) -> u64 {
        self.txn_count
    }

    /// Record a top-level transaction id, false when already in the block
    pub(crate) fn record_txid(&mut self, txid: Digest) -> bool {
        self.txids.insert(txid)
    }

    /// Take a lease until `last_valid`, false while another holds it
    pub(crate) fn acquire_lease(&mut self, sender: Address, lease: Digest, round: u64, last_valid: u64) -> bool {
        match self.leases.get(&(sender, lease)) {
            Some(held_until) if *held_until >= round => false,
            _ => {
                self.leases.insert((sender, lease), last_valid);
                true
            }
        }
    }

    /// Changes to persist, plus the balance audit of every loaded account
    pub(crate) fn into_delta(self, withdrawn: u64) -> (StateDelta, RewardsAudit) {
        let mut audit = RewardsAudit {
            credited: self.credited,
            withdrawn,
            ..Default::default()
        };
        let mut delta = StateDelta::default();
        for (addr, data) in self.accounts {
            let original = self.originals.get(&addr).cloned().unwrap_or_default();
            audit.balances_before = audit.balances_before.saturating_add(original.micro_algos);
            audit.balances_after = audit.balances_after.saturating_add(data.micro_algos);
            if data != original {
                delta.accounts.insert(addr, data);
            }
        }
        delta.creatables = self.creatables;
        delta.kv = self.kv;
        (delta, audit)
    }
}
