//! State access for application programs
//!
//! The VM never owns ledger state. Application mode evaluation reads and
//! writes through a [`LogicLedger`], which the block evaluator implements
//! over its working state. Writes take effect immediately; rolling them back
//! on failure is the implementor's job.

use crate::error::Result;
use jig_protocol::{AccountData, Address, AppParams, SignedTxnWithAd, TealValue, Transaction};
use jig_protocol::transaction::AssetParams;

/// Ledger view seen by an executing application
pub trait LogicLedger {
    /// Round being evaluated
    fn round(&self) -> u64;

    /// Timestamp of the previous block
    fn latest_timestamp(&self) -> i64;

    /// Current account record, empty for unknown accounts
    fn account(&mut self, addr: &Address) -> Result<AccountData>;

    /// Minimum balance the account must keep
    fn min_balance(&mut self, addr: &Address) -> Result<u64>;

    /// Application parameters and creator
    fn app_params(&mut self, app_id: u64) -> Result<Option<(AppParams, Address)>>;

    /// Asset parameters and creator
    fn asset_params(&mut self, asset_id: u64) -> Result<Option<(AssetParams, Address)>>;

    /// Write a global state key
    fn set_global(&mut self, app_id: u64, key: &[u8], value: TealValue) -> Result<()>;

    /// Delete a global state key
    fn del_global(&mut self, app_id: u64, key: &[u8]) -> Result<()>;

    /// Write a local state key
    fn set_local(&mut self, addr: &Address, app_id: u64, key: &[u8], value: TealValue) -> Result<()>;

    /// Delete a local state key
    fn del_local(&mut self, addr: &Address, app_id: u64, key: &[u8]) -> Result<()>;

    /// Box contents
    fn get_box(&mut self, app_id: u64, name: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Create or overwrite a box. Creation charges the application account.
    fn put_box(&mut self, app_id: u64, name: &[u8], value: Vec<u8>) -> Result<()>;

    /// Delete a box, returning whether it existed
    fn del_box(&mut self, app_id: u64, name: &[u8]) -> Result<bool>;

    /// Fees paid in excess of the minimum so far in the group, available to
    /// inner transactions
    fn fee_credit(&self) -> u64;

    /// Apply an inner transaction group issued by `caller_app`
    fn submit_inner(&mut self, caller_app: u64, txns: Vec<Transaction>) -> Result<Vec<SignedTxnWithAd>>;

    /// Remaining pooled application budget
    fn budget(&self) -> u64;

    /// Update the pooled application budget
    fn set_budget(&mut self, budget: u64);
}
