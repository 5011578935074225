//! Transaction effects
//!
//! [`EvalCtx`] applies one transaction at a time against the working state.
//! Top-level transactions go through [`EvalCtx::apply_signed`], which adds
//! the checks that only make sense outside an application: liveness,
//! duplicates, leases, the authorizer and the min balance of every touched
//! account. Inner transactions re-enter at [`EvalCtx::apply`].

use super::cow::Cow;
use super::logic::LogicAdapter;
use crate::error::{Error, Result};
use crate::types::CreatableKind;
use jig_avm::{eval_application, AppOutcome, GroupView};
use jig_protocol::transaction::AssetParams;
use jig_protocol::{
    AccountData, Address, AppLocalState, AppParams, ApplyData, AssetHolding, BlockHeader,
    ConsensusParams, KvKey, OnCompletion, SignedTxn, StateSchema, Status, TealKeyValue, TealType,
    TealValue, Transaction, TxType, ValueDelta,
};
use serde_bytes::ByteBuf;
use std::collections::BTreeMap;

/// Evaluation context of one group
pub(crate) struct EvalCtx<'c> {
    pub(crate) cow: &'c mut Cow,
    pub(crate) proto: &'c ConsensusParams,
    /// Header of the block being built
    pub(crate) header: &'c BlockHeader,
    pub(crate) prev_timestamp: i64,
    pub(crate) prev_counter: u64,
    /// Pooled application budget of the group
    pub(crate) budget: u64,
    /// Fees paid above the minimum, spendable by inner transactions
    pub(crate) fee_credit: u64,
    /// Validity window of the running top-level transaction
    pub(crate) window: (u64, u64),
}

fn eval_err(message: impl Into<String>) -> Error {
    Error::Evaluation(message.into())
}

impl<'c> EvalCtx<'c> {
    /// Apply a top-level transaction
    pub(crate) fn apply_signed(
        &mut self,
        stxn: &SignedTxn,
        txns: &[Transaction],
        applied: &[ApplyData],
        index: usize,
    ) -> Result<ApplyData> {
        let txn = &stxn.txn;
        let round = self.header.round;
        if round < txn.first_valid || round > txn.last_valid {
            return Err(eval_err(format!(
                "txn dead: round {} outside of {}--{}",
                round, txn.first_valid, txn.last_valid
            )));
        }
        let txid = stxn.id()?;
        if !self.cow.record_txid(txid) {
            return Err(eval_err(format!("transaction already in ledger: {}", txid)));
        }
        if !txn.lease.is_zero()
            && !self
                .cow
                .acquire_lease(txn.sender, txn.lease, round, txn.last_valid)
        {
            return Err(eval_err(format!(
                "using an overlapping lease (sender {}, lease {})",
                txn.sender, txn.lease
            )));
        }

        let expected = self.authorizer_of(&txn.sender)?;
        let actual = stxn.authorizer();
        if expected != actual {
            return Err(eval_err(format!(
                "should have been authorized by {} but was actually authorized by {}",
                expected, actual
            )));
        }

        self.window = (txn.first_valid, txn.last_valid);
        let ad = self.apply(txns, applied, index, 0, 0)?;
        self.check_min_balances()?;
        Ok(ad)
    }

    /// Address whose signature currently controls `addr`
    pub(crate) fn authorizer_of(&mut self, addr: &Address) -> Result<Address> {
        let auth = self.cow.get(addr)?.auth_addr;
        Ok(if auth.is_zero() { *addr } else { auth })
    }

    fn check_min_balances(&mut self) -> Result<()> {
        for addr in self.cow.take_touched() {
            if addr == self.header.fee_sink || addr == self.header.rewards_pool {
                continue;
            }
            let proto = self.proto;
            let data = self.cow.get(&addr)?;
            if data.is_empty() {
                continue;
            }
            let min = data.min_balance(proto);
            if data.micro_algos < min {
                return Err(eval_err(format!(
                    "account {} balance {} below min {} ({} assets)",
                    addr,
                    data.micro_algos,
                    min,
                    data.assets.len()
                )));
            }
        }
        Ok(())
    }

    /// Apply member `index` of `txns`, top-level or inner
    pub(crate) fn apply(
        &mut self,
        txns: &[Transaction],
        applied: &[ApplyData],
        index: usize,
        depth: usize,
        caller_app: u64,
    ) -> Result<ApplyData> {
        let txn = &txns[index];
        let created_id = self.cow.next_txn(self.prev_counter);
        let mut ad = ApplyData::default();

        let fee_sink = self.header.fee_sink;
        self.cow.transfer(&txn.sender, &fee_sink, txn.fee)?;

        if !txn.rekey_to.is_zero() {
            let target = if txn.rekey_to == txn.sender {
                Address::ZERO
            } else {
                txn.rekey_to
            };
            self.cow.get_mut(&txn.sender)?.auth_addr = target;
        }

        match txn.tx_type {
            TxType::Payment => self.payment(txn, &mut ad)?,
            TxType::KeyRegistration => self.key_registration(txn)?,
            TxType::AssetConfig => self.asset_config(txn, created_id, &mut ad)?,
            TxType::AssetTransfer => self.asset_transfer(txn, &mut ad)?,
            TxType::AssetFreeze => self.asset_freeze(txn)?,
            TxType::ApplicationCall => {
                self.application_call(txns, applied, index, created_id, depth, caller_app, &mut ad)?
            }
        }

        ad.sender_rewards = self.cow.take_rewards(&txn.sender);
        if txn.tx_type == TxType::Payment {
            ad.receiver_rewards = self.cow.take_rewards(&txn.receiver);
            ad.close_rewards = self.cow.take_rewards(&txn.close_remainder_to);
        }
        Ok(ad)
    }

    // Payments and key registration

    fn payment(&mut self, txn: &Transaction, ad: &mut ApplyData) -> Result<()> {
        let fee_sink = self.header.fee_sink;
        if txn.sender == fee_sink {
            if txn.receiver != self.header.rewards_pool {
                return Err(eval_err(format!(
                    "cannot spend from fee sink's address {} to non incentive pool address {}",
                    fee_sink, txn.receiver
                )));
            }
            if !txn.close_remainder_to.is_zero() {
                return Err(eval_err(format!(
                    "cannot close fee sink {} to {}",
                    fee_sink, txn.close_remainder_to
                )));
            }
        }

        self.cow.transfer(&txn.sender, &txn.receiver, txn.amount)?;

        if txn.close_remainder_to.is_zero() {
            return Ok(());
        }
        let record = self.cow.get(&txn.sender)?;
        check_closable(record)?;
        let remainder = record.micro_algos;
        self.cow
            .transfer(&txn.sender, &txn.close_remainder_to, remainder)?;
        ad.closing_amount = remainder;
        *self.cow.get_mut(&txn.sender)? = AccountData::default();
        Ok(())
    }

    fn key_registration(&mut self, txn: &Transaction) -> Result<()> {
        let record = self.cow.get_mut(&txn.sender)?;
        if txn.nonparticipation || txn.vote_pk.is_zero() {
            record.status = if txn.nonparticipation {
                Status::NotParticipating
            } else {
                Status::Offline
            };
            record.vote_id = Address::ZERO;
            record.selection_id = Address::ZERO;
            record.state_proof_id = ByteBuf::new();
            record.vote_first_valid = 0;
            record.vote_last_valid = 0;
            record.vote_key_dilution = 0;
        } else {
            record.status = Status::Online;
            record.vote_id = txn.vote_pk;
            record.selection_id = txn.selection_pk;
            record.state_proof_id = txn.state_proof_pk.clone();
            record.vote_first_valid = txn.vote_first;
            record.vote_last_valid = txn.vote_last;
            record.vote_key_dilution = txn.vote_key_dilution;
        }
        Ok(())
    }

    // Assets

    fn existing_asset(&mut self, asset_id: u64) -> Result<(AssetParams, Address)> {
        self.cow.asset_params(asset_id)?.ok_or_else(|| {
            eval_err(format!("asset {} does not exist or has been deleted", asset_id))
        })
    }

    fn asset_config(&mut self, txn: &Transaction, created_id: u64, ad: &mut ApplyData) -> Result<()> {
        if txn.config_asset == 0 {
            let params = txn.asset_params.clone();
            let record = self.cow.get_mut(&txn.sender)?;
            record.assets.insert(
                created_id,
                AssetHolding {
                    amount: params.total,
                    frozen: false,
                },
            );
            record.asset_params.insert(created_id, params);
            self.cow
                .set_creator(CreatableKind::Asset, created_id, Some(txn.sender));
            ad.config_asset = created_id;
            return Ok(());
        }

        let asset_id = txn.config_asset;
        let (mut params, creator) = self.existing_asset(asset_id)?;
        if params.manager.is_zero() || params.manager != txn.sender {
            return Err(eval_err(format!(
                "this transaction should be issued by the manager. It is issued by {}, manager key {}",
                txn.sender, params.manager
            )));
        }

        let record = self.cow.get_mut(&creator)?;
        if txn.asset_params == AssetParams::default() {
            let held = record.assets.get(&asset_id).map_or(0, |h| h.amount);
            if held != params.total {
                return Err(eval_err(format!(
                    "cannot destroy asset: creator is holding only {}/{}",
                    held, params.total
                )));
            }
            record.assets.remove(&asset_id);
            record.asset_params.remove(&asset_id);
            self.cow.set_creator(CreatableKind::Asset, asset_id, None);
            return Ok(());
        }

        // Only role addresses change, and a cleared role stays cleared
        params.manager = txn.asset_params.manager;
        if !params.reserve.is_zero() {
            params.reserve = txn.asset_params.reserve;
        }
        if !params.freeze.is_zero() {
            params.freeze = txn.asset_params.freeze;
        }
        if !params.clawback.is_zero() {
            params.clawback = txn.asset_params.clawback;
        }
        record.asset_params.insert(asset_id, params);
        Ok(())
    }

    fn take_out(&mut self, addr: &Address, asset_id: u64, amount: u64, bypass_freeze: bool) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let record = self.cow.get_mut(addr)?;
        let holding = record
            .assets
            .get_mut(&asset_id)
            .ok_or_else(|| eval_err(format!("asset {} missing from {}", asset_id, addr)))?;
        if holding.frozen && !bypass_freeze {
            return Err(eval_err(format!("asset {} frozen in {}", asset_id, addr)));
        }
        holding.amount = holding.amount.checked_sub(amount).ok_or_else(|| {
            eval_err(format!(
                "underflow on subtracting {} from sender amount {}",
                amount, holding.amount
            ))
        })?;
        Ok(())
    }

    fn put_in(&mut self, addr: &Address, asset_id: u64, amount: u64, bypass_freeze: bool) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let record = self.cow.get_mut(addr)?;
        let holding = record.assets.get_mut(&asset_id).ok_or_else(|| {
            eval_err(format!(
                "receiver error: must optin, asset {} missing from {}",
                asset_id, addr
            ))
        })?;
        if holding.frozen && !bypass_freeze {
            return Err(eval_err(format!("asset frozen in recipient {}", addr)));
        }
        holding.amount = holding.amount.checked_add(amount).ok_or_else(|| {
            eval_err(format!(
                "overflow on adding {} to receiver amount {}",
                amount, holding.amount
            ))
        })?;
        Ok(())
    }

    fn asset_transfer(&mut self, txn: &Transaction, ad: &mut ApplyData) -> Result<()> {
        let asset_id = txn.xfer_asset;
        let clawback = !txn.asset_sender.is_zero();
        let closing = !txn.asset_close_to.is_zero();

        let params = self.cow.asset_params(asset_id)?;
        if params.is_none() && !(closing && !clawback) {
            return Err(eval_err(format!(
                "asset {} does not exist or has been deleted",
                asset_id
            )));
        }

        let source = if clawback {
            let role = params.as_ref().map(|(p, _)| p.clawback).unwrap_or_default();
            if role.is_zero() || role != txn.sender {
                return Err(eval_err(format!(
                    "clawback not allowed: sender {}, clawback {}",
                    txn.sender, role
                )));
            }
            txn.asset_sender
        } else {
            txn.sender
        };

        // Zero self-transfer allocates the holding
        if !clawback && txn.asset_receiver == txn.sender && txn.asset_amount == 0 {
            let default_frozen = params.as_ref().map_or(false, |(p, _)| p.default_frozen);
            self.cow
                .get_mut(&txn.sender)?
                .assets
                .entry(asset_id)
                .or_insert(AssetHolding {
                    amount: 0,
                    frozen: default_frozen,
                });
        }

        self.take_out(&source, asset_id, txn.asset_amount, clawback)?;
        self.put_in(&txn.asset_receiver, asset_id, txn.asset_amount, clawback)?;

        if !closing {
            return Ok(());
        }
        if clawback {
            return Err(eval_err("cannot close asset by clawback"));
        }
        if let Some((_, creator)) = &params {
            if *creator == txn.sender {
                return Err(eval_err(format!(
                    "cannot close asset ID in allocating account {}",
                    txn.sender
                )));
            }
        }
        let holding = self
            .cow
            .get(&txn.sender)?
            .assets
            .get(&asset_id)
            .cloned()
            .ok_or_else(|| eval_err(format!("asset {} missing from {}", asset_id, txn.sender)))?;
        if holding.frozen {
            return Err(eval_err(format!("asset {} frozen in {}", asset_id, txn.sender)));
        }
        self.put_in(&txn.asset_close_to, asset_id, holding.amount, false)?;
        self.cow.get_mut(&txn.sender)?.assets.remove(&asset_id);
        ad.asset_closing_amount = holding.amount;
        Ok(())
    }

    fn asset_freeze(&mut self, txn: &Transaction) -> Result<()> {
        let (params, _) = self.existing_asset(txn.freeze_asset)?;
        if params.freeze.is_zero() || params.freeze != txn.sender {
            return Err(eval_err(format!(
                "freeze not allowed: sender {} != freeze {}",
                txn.sender, params.freeze
            )));
        }
        let holding = self
            .cow
            .get_mut(&txn.freeze_account)?
            .assets
            .get_mut(&txn.freeze_asset)
            .ok_or_else(|| {
                eval_err(format!(
                    "asset {} not found in account {}",
                    txn.freeze_asset, txn.freeze_account
                ))
            })?;
        holding.frozen = txn.asset_frozen;
        Ok(())
    }

    // Applications

    #[allow(clippy::too_many_arguments)]
    fn application_call(
        &mut self,
        txns: &[Transaction],
        applied: &[ApplyData],
        index: usize,
        created_id: u64,
        depth: usize,
        caller_app: u64,
        ad: &mut ApplyData,
    ) -> Result<()> {
        let txn = &txns[index];
        if depth > self.proto.max_app_call_depth {
            return Err(eval_err(format!("appl depth ({}) exceeded", depth)));
        }

        let app_id = if txn.application_id == 0 {
            self.create_app(txn, created_id)?;
            ad.application_id = created_id;
            created_id
        } else {
            txn.application_id
        };

        let params = match self.cow.app_params(app_id)? {
            Some((params, _)) => params,
            None if txn.on_completion == OnCompletion::ClearState => {
                return self.clear_local(&txn.sender, app_id);
            }
            None => {
                return Err(eval_err(format!("application {} does not exist", app_id)));
            }
        };

        if txn.on_completion == OnCompletion::OptIn {
            self.opt_in(&txn.sender, app_id, &params)?;
        }

        let targets = local_targets(txn);
        let before = StateSnapshot {
            global: params.global_state.clone(),
            locals: self.local_states(&targets, app_id)?,
        };
        let call = ProgramCall {
            txns,
            applied,
            index,
            app_id,
            caller_app,
            depth,
        };

        if txn.on_completion == OnCompletion::ClearState {
            if !self.cow.get(&txn.sender)?.app_local_states.contains_key(&app_id) {
                return Err(eval_err(format!(
                    "account {} is not currently opted in to app {}",
                    txn.sender, app_id
                )));
            }
            // Clear program failures are ignored, but their effects are not kept
            let checkpoint = self.cow.clone();
            let kept = match self.run_program(&params.clear_state_program, &call) {
                Ok(outcome) if outcome.pass => match self.check_schemas(app_id, &targets) {
                    Ok(()) => Some(outcome),
                    Err(_) => None,
                },
                _ => None,
            };
            match kept {
                Some(outcome) => self.record_eval(ad, app_id, &targets, &before, outcome)?,
                None => *self.cow = checkpoint,
            }
            return self.clear_local(&txn.sender, app_id);
        }

        let outcome = self
            .run_program(&params.approval_program, &call)
            .map_err(|e| logic_error(app_id, e))?;
        if !outcome.pass {
            return Err(eval_err("transaction rejected by ApprovalProgram"));
        }
        self.check_schemas(app_id, &targets)?;
        self.record_eval(ad, app_id, &targets, &before, outcome)?;

        match txn.on_completion {
            OnCompletion::NoOp | OnCompletion::OptIn | OnCompletion::ClearState => Ok(()),
            OnCompletion::CloseOut => self.clear_local(&txn.sender, app_id),
            OnCompletion::UpdateApplication => self.update_app(app_id, txn),
            OnCompletion::DeleteApplication => self.delete_app(app_id),
        }
    }

    fn run_program(&mut self, program: &[u8], call: &ProgramCall<'_>) -> jig_avm::Result<AppOutcome> {
        let proto = self.proto;
        let group = GroupView {
            txns: call.txns,
            apply: call.applied,
        };
        let mut ledger = LogicAdapter::new(self, call.depth);
        eval_application(
            program,
            &group,
            call.index,
            call.app_id,
            call.caller_app,
            &mut ledger,
            proto,
        )
    }

    fn create_app(&mut self, txn: &Transaction, app_id: u64) -> Result<()> {
        let record = self.cow.get_mut(&txn.sender)?;
        record.app_params.insert(
            app_id,
            AppParams {
                approval_program: txn.approval_program.clone(),
                clear_state_program: txn.clear_state_program.clone(),
                extra_program_pages: txn.extra_program_pages,
                global_state: TealKeyValue::new(),
                global_state_schema: txn.global_state_schema,
                local_state_schema: txn.local_state_schema,
            },
        );
        record.total_app_schema = record.total_app_schema.add(&txn.global_state_schema);
        record.total_extra_app_pages = record
            .total_extra_app_pages
            .saturating_add(txn.extra_program_pages);
        self.cow
            .set_creator(CreatableKind::Application, app_id, Some(txn.sender));
        Ok(())
    }

    fn opt_in(&mut self, addr: &Address, app_id: u64, params: &AppParams) -> Result<()> {
        let record = self.cow.get_mut(addr)?;
        if record.app_local_states.contains_key(&app_id) {
            return Err(eval_err(format!(
                "account {} has already opted in to app {}",
                addr, app_id
            )));
        }
        record.app_local_states.insert(
            app_id,
            AppLocalState {
                schema: params.local_state_schema,
                key_value: TealKeyValue::new(),
            },
        );
        record.total_app_schema = record.total_app_schema.add(&params.local_state_schema);
        Ok(())
    }

    fn clear_local(&mut self, addr: &Address, app_id: u64) -> Result<()> {
        let record = self.cow.get_mut(addr)?;
        match record.app_local_states.remove(&app_id) {
            Some(local) => {
                record.total_app_schema = record.total_app_schema.sub(&local.schema);
                Ok(())
            }
            None => Err(eval_err(format!(
                "account {} is not opted in to app {}",
                addr, app_id
            ))),
        }
    }

    fn update_app(&mut self, app_id: u64, txn: &Transaction) -> Result<()> {
        let creator = self.app_creator(app_id)?;
        let page_len = self.proto.max_app_program_len;
        let params = self.app_params_mut(&creator, app_id)?;
        let limit = page_len * (1 + params.extra_program_pages as usize);
        if txn.approval_program.len() + txn.clear_state_program.len() > limit {
            return Err(eval_err(format!(
                "updateApplication app programs too long, {}. max total len {} bytes",
                txn.approval_program.len() + txn.clear_state_program.len(),
                limit
            )));
        }
        params.approval_program = txn.approval_program.clone();
        params.clear_state_program = txn.clear_state_program.clone();
        Ok(())
    }

    fn delete_app(&mut self, app_id: u64) -> Result<()> {
        let creator = self.app_creator(app_id)?;
        let record = self.cow.get_mut(&creator)?;
        if let Some(params) = record.app_params.remove(&app_id) {
            record.total_app_schema = record.total_app_schema.sub(&params.global_state_schema);
            record.total_extra_app_pages = record
                .total_extra_app_pages
                .saturating_sub(params.extra_program_pages);
        }
        self.cow
            .set_creator(CreatableKind::Application, app_id, None);
        Ok(())
    }

    pub(crate) fn app_creator(&self, app_id: u64) -> Result<Address> {
        self.cow
            .creator(CreatableKind::Application, app_id)?
            .ok_or_else(|| eval_err(format!("application {} does not exist", app_id)))
    }

    pub(crate) fn app_params_mut(&mut self, creator: &Address, app_id: u64) -> Result<&mut AppParams> {
        self.cow
            .get_mut(creator)?
            .app_params
            .get_mut(&app_id)
            .ok_or_else(|| eval_err(format!("application {} does not exist", app_id)))
    }

    fn local_states(&mut self, targets: &[(u64, Address)], app_id: u64) -> Result<Vec<Option<TealKeyValue>>> {
        let mut out = Vec::with_capacity(targets.len());
        for (_, addr) in targets {
            let local = self
                .cow
                .get(addr)?
                .app_local_states
                .get(&app_id)
                .map(|l| l.key_value.clone());
            out.push(local);
        }
        Ok(out)
    }

    fn check_schemas(&mut self, app_id: u64, targets: &[(u64, Address)]) -> Result<()> {
        if let Some((params, _)) = self.cow.app_params(app_id)? {
            check_schema(&params.global_state, &params.global_state_schema)?;
        }
        for (_, addr) in targets {
            if let Some(local) = self.cow.get(addr)?.app_local_states.get(&app_id) {
                check_schema(&local.key_value, &local.schema)?;
            }
        }
        Ok(())
    }

    fn record_eval(
        &mut self,
        ad: &mut ApplyData,
        app_id: u64,
        targets: &[(u64, Address)],
        before: &StateSnapshot,
        outcome: AppOutcome,
    ) -> Result<()> {
        let global_after = self
            .cow
            .app_params(app_id)?
            .map(|(p, _)| p.global_state)
            .unwrap_or_default();
        ad.eval_delta.global_delta = state_delta(&before.global, &global_after);

        let locals_after = self.local_states(targets, app_id)?;
        for (((slot, _), prior), current) in targets.iter().zip(&before.locals).zip(&locals_after) {
            let empty = TealKeyValue::new();
            let delta = state_delta(
                prior.as_ref().unwrap_or(&empty),
                current.as_ref().unwrap_or(&empty),
            );
            if !delta.is_empty() {
                ad.eval_delta.local_deltas.insert(*slot, delta);
            }
        }

        ad.eval_delta.logs = outcome.logs.into_iter().map(ByteBuf::from).collect();
        ad.eval_delta.inner_txns = outcome.inner_txns;
        Ok(())
    }
}

/// Inputs of one program run
struct ProgramCall<'t> {
    txns: &'t [Transaction],
    applied: &'t [ApplyData],
    index: usize,
    app_id: u64,
    caller_app: u64,
    depth: usize,
}

struct StateSnapshot {
    global: TealKeyValue,
    locals: Vec<Option<TealKeyValue>>,
}

/// Accounts whose local state changes are reported: the sender at slot 0,
/// then the foreign accounts at their 1-based position
fn local_targets(txn: &Transaction) -> Vec<(u64, Address)> {
    let mut out = vec![(0, txn.sender)];
    for (i, addr) in txn.accounts.iter().enumerate() {
        if out.iter().all(|(_, a)| a != addr) {
            out.push((i as u64 + 1, *addr));
        }
    }
    out
}

fn check_closable(record: &AccountData) -> Result<()> {
    if !record.assets.is_empty() {
        return Err(eval_err(format!(
            "cannot close: {} outstanding assets",
            record.assets.len()
        )));
    }
    if !record.app_local_states.is_empty() {
        return Err(eval_err(format!(
            "cannot close: {} outstanding applications opted in. Please opt out or clear them",
            record.app_local_states.len()
        )));
    }
    if !record.app_params.is_empty() {
        return Err(eval_err(format!(
            "cannot close: {} outstanding created applications",
            record.app_params.len()
        )));
    }
    if record.total_boxes > 0 {
        return Err(eval_err(format!(
            "cannot close: {} outstanding boxes",
            record.total_boxes
        )));
    }
    Ok(())
}

fn check_schema(kv: &TealKeyValue, schema: &StateSchema) -> Result<()> {
    let uints = kv.values().filter(|v| v.kind == TealType::Uint).count() as u64;
    let bytes = kv.len() as u64 - uints;
    if uints > schema.num_uint {
        return Err(eval_err(format!(
            "store integer count {} exceeds schema integer count {}",
            uints, schema.num_uint
        )));
    }
    if bytes > schema.num_byte_slice {
        return Err(eval_err(format!(
            "store bytes count {} exceeds schema bytes count {}",
            bytes, schema.num_byte_slice
        )));
    }
    Ok(())
}

fn value_delta(value: &TealValue) -> ValueDelta {
    match value.kind {
        TealType::Bytes => ValueDelta {
            action: ValueDelta::SET_BYTES,
            bytes: value.bytes.clone(),
            uint: 0,
        },
        TealType::Uint => ValueDelta {
            action: ValueDelta::SET_UINT,
            bytes: ByteBuf::new(),
            uint: value.uint,
        },
    }
}

/// Per-key changes from `before` to `after`
pub(crate) fn state_delta(before: &TealKeyValue, after: &TealKeyValue) -> BTreeMap<KvKey, ValueDelta> {
    let mut out = BTreeMap::new();
    for (key, value) in after {
        if before.get(key) != Some(value) {
            out.insert(key.clone(), value_delta(value));
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            out.insert(
                key.clone(),
                ValueDelta {
                    action: ValueDelta::DELETE,
                    ..Default::default()
                },
            );
        }
    }
    out
}

fn logic_error(app_id: u64, err: jig_avm::Error) -> Error {
    match err {
        jig_avm::Error::Eval { pc, message } => eval_err(format!(
            "logic eval error: {}. Details: app={}, pc={}",
            message, app_id, pc
        )),
        other => eval_err(format!(
            "logic eval error: {}. Details: app={}, pc=0",
            other, app_id
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(entries: &[(&str, TealValue)]) -> TealKeyValue {
        entries
            .iter()
            .map(|(k, v)| (KvKey::from(*k), v.clone()))
            .collect()
    }

    #[test]
    fn test_state_delta() {
        let before = kv(&[
            ("same", TealValue::from_uint(1)),
            ("changed", TealValue::from_uint(1)),
            ("gone", TealValue::from_bytes(b"x".to_vec())),
        ]);
        let after = kv(&[
            ("same", TealValue::from_uint(1)),
            ("changed", TealValue::from_bytes(b"y".to_vec())),
            ("new", TealValue::from_uint(7)),
        ]);
        let delta = state_delta(&before, &after);
        assert_eq!(delta.len(), 3);
        assert_eq!(delta[&KvKey::from("changed")].action, ValueDelta::SET_BYTES);
        assert_eq!(delta[&KvKey::from("changed")].bytes.as_slice(), b"y");
        assert_eq!(delta[&KvKey::from("new")].uint, 7);
        assert_eq!(delta[&KvKey::from("gone")].action, ValueDelta::DELETE);
    }

    #[test]
    fn test_schema_limits() {
        let state = kv(&[
            ("a", TealValue::from_uint(1)),
            ("b", TealValue::from_uint(2)),
        ]);
        let schema = StateSchema {
            num_uint: 1,
            num_byte_slice: 5,
        };
        let err = check_schema(&state, &schema).unwrap_err().to_string();
        assert!(err.contains("store integer count 2 exceeds schema integer count 1"));
        check_schema(
            &state,
            &StateSchema {
                num_uint: 2,
                num_byte_slice: 0,
            },
        )
        .unwrap();
    }

    #[test]
    fn test_local_targets_skip_repeats() {
        let sender = Address([1; 32]);
        let other = Address([2; 32]);
        let txn = Transaction {
            sender,
            accounts: vec![other, sender, other, Address([3; 32])],
            ..Default::default()
        };
        let targets = local_targets(&txn);
        assert_eq!(
            targets,
            vec![(0, sender), (1, other), (4, Address([3; 32]))]
        );
    }

    #[test]
    fn test_closable() {
        let mut record = AccountData::with_balance(5);
        check_closable(&record).unwrap();
        record.assets.insert(1, AssetHolding::default());
        assert!(check_closable(&record)
            .unwrap_err()
            .to_string()
            .contains("outstanding assets"));
    }
}
