//! Consensus parameters
//!
//! Only the development protocol (`future`) is known to the harness.

use crate::error::{Error, Result};

/// Protocol identifier of the development protocol
pub const CONSENSUS_FUTURE: &str = "future";

/// Consensus parameters consulted by verification and evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusParams {
    /// Minimum fee per transaction
    pub min_txn_fee: u64,
    /// Base minimum balance of any account
    pub min_balance: u64,
    /// Maximum `lv - fv`
    pub max_txn_life: u64,
    /// Maximum transaction note length
    pub max_txn_note_bytes: usize,
    /// Maximum group size
    pub max_tx_group_size: usize,
    /// Maximum inner transactions per application call (pooled)
    pub max_inner_transactions: usize,
    /// Maximum nesting of inner application calls
    pub max_app_call_depth: usize,

    /// Highest supported logic version
    pub logic_sig_version: u64,
    /// Logic signature budget per transaction (pooled across the group)
    pub logic_sig_max_cost: u64,
    /// Maximum logic signature program plus args size
    pub logic_sig_max_size: usize,
    /// Application call budget per call (pooled across the group)
    pub max_app_program_cost: u64,
    /// Maximum approval plus clear program length per page
    pub max_app_program_len: usize,
    /// Maximum extra program pages
    pub max_extra_app_program_pages: u32,
    /// Maximum application args
    pub max_app_args: usize,
    /// Maximum total application args bytes
    pub max_app_total_arg_len: usize,
    /// Maximum foreign accounts per call
    pub max_app_txn_accounts: usize,
    /// Maximum foreign applications per call
    pub max_app_txn_foreign_apps: usize,
    /// Maximum foreign assets per call
    pub max_app_txn_foreign_assets: usize,
    /// Maximum total references (accounts, apps, assets, boxes) per call
    pub max_app_total_txn_references: usize,
    /// Maximum key length in application state
    pub max_app_key_len: usize,
    /// Maximum bytes value length in application state
    pub max_app_bytes_value_len: usize,
    /// Maximum key plus value length in application state
    pub max_app_sum_key_value_lens: usize,
    /// Maximum global schema entries
    pub max_global_schema_entries: u64,
    /// Maximum local schema entries
    pub max_local_schema_entries: u64,
    /// Maximum logs per application call
    pub max_log_calls: usize,
    /// Maximum total log bytes per application call
    pub max_log_size: usize,

    /// Maximum box size
    pub max_box_size: usize,
    /// Maximum box references per transaction
    pub max_app_box_references: usize,
    /// Box read/write quota per box reference
    pub bytes_per_box_reference: usize,
    /// Flat minimum balance per box
    pub box_flat_min_balance: u64,
    /// Minimum balance per box byte (key and value)
    pub box_byte_min_balance: u64,

    /// Minimum balance per created application
    pub app_flat_params_min_balance: u64,
    /// Minimum balance per opted-in application
    pub app_flat_opt_in_min_balance: u64,
    /// Minimum balance per schema entry
    pub schema_min_balance_per_entry: u64,
    /// Additional minimum balance per uint entry
    pub schema_uint_min_balance: u64,
    /// Additional minimum balance per byte slice entry
    pub schema_bytes_min_balance: u64,

    /// Maximum asset unit name length
    pub max_asset_unit_name_bytes: usize,
    /// Maximum asset name length
    pub max_asset_name_bytes: usize,
    /// Maximum asset URL length
    pub max_asset_url_bytes: usize,
    /// Maximum decimals of an asset
    pub max_asset_decimals: u32,

    /// Micro-units per reward unit
    pub reward_unit: u64,
    /// Rounds between rewards rate recalculations
    pub rewards_rate_refresh_interval: u64,
}

impl ConsensusParams {
    /// Parameters of the development protocol
    pub fn future() -> Self {
        Self {
            min_txn_fee: 1_000,
            min_balance: 100_000,
            max_txn_life: 1_000,
            max_txn_note_bytes: 1_024,
            max_tx_group_size: 16,
            max_inner_transactions: 16 * 16,
            max_app_call_depth: 8,

            logic_sig_version: 8,
            logic_sig_max_cost: 20_000,
            logic_sig_max_size: 1_000,
            max_app_program_cost: 700,
            max_app_program_len: 2_048,
            max_extra_app_program_pages: 3,
            max_app_args: 16,
            max_app_total_arg_len: 2_048,
            max_app_txn_accounts: 4,
            max_app_txn_foreign_apps: 8,
            max_app_txn_foreign_assets: 8,
            max_app_total_txn_references: 8,
            max_app_key_len: 64,
            max_app_bytes_value_len: 128,
            max_app_sum_key_value_lens: 128,
            max_global_schema_entries: 64,
            max_local_schema_entries: 16,
            max_log_calls: 32,
            max_log_size: 1_024,

            max_box_size: 32_768,
            max_app_box_references: 8,
            bytes_per_box_reference: 1_024,
            box_flat_min_balance: 2_500,
            box_byte_min_balance: 400,

            app_flat_params_min_balance: 100_000,
            app_flat_opt_in_min_balance: 100_000,
            schema_min_balance_per_entry: 25_000,
            schema_uint_min_balance: 3_500,
            schema_bytes_min_balance: 25_000,

            max_asset_unit_name_bytes: 8,
            max_asset_name_bytes: 32,
            max_asset_url_bytes: 96,
            max_asset_decimals: 19,

            reward_unit: 1_000_000,
            rewards_rate_refresh_interval: 500_000,
        }
    }

    /// Look up parameters by protocol identifier
    pub fn for_version(version: &str) -> Result<Self> {
        match version {
            CONSENSUS_FUTURE => Ok(Self::future()),
            other => Err(Error::UnknownProtocol(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_future_known() {
        let params = ConsensusParams::for_version("future").unwrap();
        assert_eq!(params.min_txn_fee, 1_000);
        assert_eq!(params.max_tx_group_size, 16);
    }

    #[test]
    fn test_unknown_protocol() {
        assert!(matches!(
            ConsensusParams::for_version("v1"),
            Err(Error::UnknownProtocol(_))
        ));
    }
}
