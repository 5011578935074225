//! Ledger view handed to running applications
//!
//! [`LogicAdapter`] implements the VM's [`LogicLedger`] over the evaluation
//! context, so program writes land directly in the block's working state.
//! Inner transaction groups are applied here, recursively, through the same
//! context.

use super::apply::EvalCtx;
use crate::error::{Error, Result};
use crate::types::box_key;
use jig_avm::LogicLedger;
use jig_protocol::crypto::app_address;
use jig_protocol::transaction::AssetParams;
use jig_protocol::{
    AccountData, Address, AppParams, ApplyData, KvKey, SignedTxn, SignedTxnWithAd, TealValue,
    Transaction, TxType,
};

pub(crate) struct LogicAdapter<'x, 'c> {
    ctx: &'x mut EvalCtx<'c>,
    depth: usize,
}

impl<'x, 'c> LogicAdapter<'x, 'c> {
    pub(crate) fn new(ctx: &'x mut EvalCtx<'c>, depth: usize) -> Self {
        Self { ctx, depth }
    }
}

fn ledger_error(err: Error) -> jig_avm::Error {
    match err {
        Error::Evaluation(message) => jig_avm::Error::Ledger(message),
        other => jig_avm::Error::Ledger(other.to_string()),
    }
}

fn not_opted_in(addr: &Address, app_id: u64) -> jig_avm::Error {
    jig_avm::Error::Ledger(format!("account {} is not opted in to app {}", addr, app_id))
}

impl LogicLedger for LogicAdapter<'_, '_> {
    fn round(&self) -> u64 {
        self.ctx.header.round
    }

    fn latest_timestamp(&self) -> i64 {
        self.ctx.prev_timestamp
    }

    fn account(&mut self, addr: &Address) -> jig_avm::Result<AccountData> {
        self.ctx.cow.get(addr).map(Clone::clone).map_err(ledger_error)
    }

    fn min_balance(&mut self, addr: &Address) -> jig_avm::Result<u64> {
        let proto = self.ctx.proto;
        self.ctx
            .cow
            .get(addr)
            .map(|a| a.min_balance(proto))
            .map_err(ledger_error)
    }

    fn app_params(&mut self, app_id: u64) -> jig_avm::Result<Option<(AppParams, Address)>> {
        self.ctx.cow.app_params(app_id).map_err(ledger_error)
    }

    fn asset_params(&mut self, asset_id: u64) -> jig_avm::Result<Option<(AssetParams, Address)>> {
        self.ctx.cow.asset_params(asset_id).map_err(ledger_error)
    }

    fn set_global(&mut self, app_id: u64, key: &[u8], value: TealValue) -> jig_avm::Result<()> {
        let creator = self.ctx.app_creator(app_id).map_err(ledger_error)?;
        let params = self
            .ctx
            .app_params_mut(&creator, app_id)
            .map_err(ledger_error)?;
        params.global_state.insert(KvKey::from(key), value);
        Ok(())
    }

    fn del_global(&mut self, app_id: u64, key: &[u8]) -> jig_avm::Result<()> {
        let creator = self.ctx.app_creator(app_id).map_err(ledger_error)?;
        let params = self
            .ctx
            .app_params_mut(&creator, app_id)
            .map_err(ledger_error)?;
        params.global_state.remove(&KvKey::from(key));
        Ok(())
    }

    fn set_local(&mut self, addr: &Address, app_id: u64, key: &[u8], value: TealValue) -> jig_avm::Result<()> {
        let record = self.ctx.cow.get_mut(addr).map_err(ledger_error)?;
        let local = record
            .app_local_states
            .get_mut(&app_id)
            .ok_or_else(|| not_opted_in(addr, app_id))?;
        local.key_value.insert(KvKey::from(key), value);
        Ok(())
    }

    fn del_local(&mut self, addr: &Address, app_id: u64, key: &[u8]) -> jig_avm::Result<()> {
        let record = self.ctx.cow.get_mut(addr).map_err(ledger_error)?;
        let local = record
            .app_local_states
            .get_mut(&app_id)
            .ok_or_else(|| not_opted_in(addr, app_id))?;
        local.key_value.remove(&KvKey::from(key));
        Ok(())
    }

    fn get_box(&mut self, app_id: u64, name: &[u8]) -> jig_avm::Result<Option<Vec<u8>>> {
        self.ctx
            .cow
            .get_kv(&box_key(app_id, name))
            .map_err(ledger_error)
    }

    fn put_box(&mut self, app_id: u64, name: &[u8], value: Vec<u8>) -> jig_avm::Result<()> {
        let key = box_key(app_id, name);
        let existing = self.ctx.cow.get_kv(&key).map_err(ledger_error)?;
        let record = self
            .ctx
            .cow
            .get_mut(&app_address(app_id))
            .map_err(ledger_error)?;
        match &existing {
            None => {
                record.total_boxes += 1;
                record.total_box_bytes += (name.len() + value.len()) as u64;
            }
            Some(old) => {
                record.total_box_bytes = record
                    .total_box_bytes
                    .saturating_sub(old.len() as u64)
                    .saturating_add(value.len() as u64);
            }
        }
        self.ctx.cow.set_kv(key, Some(value));
        Ok(())
    }

    fn del_box(&mut self, app_id: u64, name: &[u8]) -> jig_avm::Result<bool> {
        let key = box_key(app_id, name);
        let old = match self.ctx.cow.get_kv(&key).map_err(ledger_error)? {
            Some(old) => old,
            None => return Ok(false),
        };
        let record = self
            .ctx
            .cow
            .get_mut(&app_address(app_id))
            .map_err(ledger_error)?;
        record.total_boxes = record.total_boxes.saturating_sub(1);
        record.total_box_bytes = record
            .total_box_bytes
            .saturating_sub((name.len() + old.len()) as u64);
        self.ctx.cow.set_kv(key, None);
        Ok(true)
    }

    fn fee_credit(&self) -> u64 {
        self.ctx.fee_credit
    }

    fn submit_inner(&mut self, caller_app: u64, txns: Vec<Transaction>) -> jig_avm::Result<Vec<SignedTxnWithAd>> {
        self.ctx
            .submit_inner(caller_app, self.depth, txns)
            .map_err(ledger_error)
    }

    fn budget(&self) -> u64 {
        self.ctx.budget
    }

    fn set_budget(&mut self, budget: u64) {
        self.ctx.budget = budget;
    }
}

impl EvalCtx<'_> {
    /// Apply an inner group issued by `caller_app` running at `depth`
    pub(crate) fn submit_inner(
        &mut self,
        caller_app: u64,
        depth: usize,
        mut txns: Vec<Transaction>,
    ) -> Result<Vec<SignedTxnWithAd>> {
        let app_addr = app_address(caller_app);
        let (first_valid, last_valid) = self.window;
        for txn in txns.iter_mut() {
            txn.first_valid = first_valid;
            txn.last_valid = last_valid;
        }
        if txns.len() > 1 {
            let group = Transaction::group_id(&txns)?;
            for txn in txns.iter_mut() {
                txn.group = group;
            }
        }

        let min_fee = self.proto.min_txn_fee;
        for txn in &txns {
            if txn.fee >= min_fee {
                self.fee_credit = self.fee_credit.saturating_add(txn.fee - min_fee);
            } else {
                let shortfall = min_fee - txn.fee;
                self.fee_credit = self.fee_credit.checked_sub(shortfall).ok_or_else(|| {
                    Error::Evaluation(format!("fee too small {} < {}", txn.fee, min_fee))
                })?;
            }
        }

        let mut applied: Vec<ApplyData> = Vec::with_capacity(txns.len());
        let mut out = Vec::with_capacity(txns.len());
        for index in 0..txns.len() {
            let txn = &txns[index];
            let authorizer = self.authorizer_of(&txn.sender)?;
            if authorizer != app_addr {
                return Err(Error::Evaluation(format!(
                    "unauthorized inner transaction: {} is not controlled by app {}",
                    txn.sender, caller_app
                )));
            }
            if txn.tx_type == TxType::ApplicationCall {
                if txn.application_id == caller_app {
                    return Err(Error::Evaluation(format!(
                        "attempt to self-call app {}",
                        caller_app
                    )));
                }
                self.budget = self.budget.saturating_add(self.proto.max_app_program_cost);
            }

            let ad = self.apply(&txns, &applied, index, depth + 1, caller_app)?;
            let stxn = SignedTxn {
                txn: txn.clone(),
                ..Default::default()
            };
            out.push(SignedTxnWithAd::new(stxn, ad.clone()));
            applied.push(ad);
        }
        tracing::debug!(app = caller_app, count = out.len(), depth, "Inner group applied");
        Ok(out)
    }
}
