//! Field tables for field-indexed opcodes
//!
//! Each entry is `(name, index, first version)`. Indices are the bytes that
//! appear in the program.

/// A named field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Name in source
    pub name: &'static str,
    /// Immediate byte
    pub index: u8,
    /// First program version that has it
    pub version: u64,
    /// Array field, read with an index
    pub array: bool,
}

const fn f(name: &'static str, index: u8, version: u64) -> FieldSpec {
    FieldSpec {
        name,
        index,
        version,
        array: false,
    }
}

const fn a(name: &'static str, index: u8, version: u64) -> FieldSpec {
    FieldSpec {
        name,
        index,
        version,
        array: true,
    }
}

/// Field groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldGroup {
    /// `txn`, `gtxn`, `itxn_field` and friends
    Txn,
    /// `global`
    Global,
    /// `asset_holding_get`
    AssetHolding,
    /// `asset_params_get`
    AssetParams,
    /// `app_params_get`
    AppParams,
    /// `acct_params_get`
    AcctParams,
}

impl FieldGroup {
    /// All fields of the group
    pub fn specs(&self) -> &'static [FieldSpec] {
        match self {
            FieldGroup::Txn => TXN_FIELDS,
            FieldGroup::Global => GLOBAL_FIELDS,
            FieldGroup::AssetHolding => ASSET_HOLDING_FIELDS,
            FieldGroup::AssetParams => ASSET_PARAMS_FIELDS,
            FieldGroup::AppParams => APP_PARAMS_FIELDS,
            FieldGroup::AcctParams => ACCT_PARAMS_FIELDS,
        }
    }

    /// Look up by name
    pub fn by_name(&self, name: &str) -> Option<&'static FieldSpec> {
        self.specs().iter().find(|s| s.name == name)
    }

    /// Look up by immediate byte
    pub fn by_index(&self, index: u8) -> Option<&'static FieldSpec> {
        self.specs().iter().find(|s| s.index == index)
    }
}

/// Transaction fields
pub static TXN_FIELDS: &[FieldSpec] = &[
    f("Sender", 0, 1),
    f("Fee", 1, 1),
    f("FirstValid", 2, 1),
    f("FirstValidTime", 3, 7),
    f("LastValid", 4, 1),
    f("Note", 5, 1),
    f("Lease", 6, 1),
    f("Receiver", 7, 1),
    f("Amount", 8, 1),
    f("CloseRemainderTo", 9, 1),
    f("VotePK", 10, 1),
    f("SelectionPK", 11, 1),
    f("VoteFirst", 12, 1),
    f("VoteLast", 13, 1),
    f("VoteKeyDilution", 14, 1),
    f("Type", 15, 1),
    f("TypeEnum", 16, 1),
    f("XferAsset", 17, 1),
    f("AssetAmount", 18, 1),
    f("AssetSender", 19, 1),
    f("AssetReceiver", 20, 1),
    f("AssetCloseTo", 21, 1),
    f("GroupIndex", 22, 1),
    f("TxID", 23, 1),
    f("ApplicationID", 24, 2),
    f("OnCompletion", 25, 2),
    a("ApplicationArgs", 26, 2),
    f("NumAppArgs", 27, 2),
    a("Accounts", 28, 2),
    f("NumAccounts", 29, 2),
    f("ApprovalProgram", 30, 2),
    f("ClearStateProgram", 31, 2),
    f("RekeyTo", 32, 2),
    f("ConfigAsset", 33, 2),
    f("ConfigAssetTotal", 34, 2),
    f("ConfigAssetDecimals", 35, 2),
    f("ConfigAssetDefaultFrozen", 36, 2),
    f("ConfigAssetUnitName", 37, 2),
    f("ConfigAssetName", 38, 2),
    f("ConfigAssetURL", 39, 2),
    f("ConfigAssetMetadataHash", 40, 2),
    f("ConfigAssetManager", 41, 2),
    f("ConfigAssetReserve", 42, 2),
    f("ConfigAssetFreeze", 43, 2),
    f("ConfigAssetClawback", 44, 2),
    f("FreezeAsset", 45, 2),
    f("FreezeAssetAccount", 46, 2),
    f("FreezeAssetFrozen", 47, 2),
    a("Assets", 48, 3),
    f("NumAssets", 49, 3),
    a("Applications", 50, 3),
    f("NumApplications", 51, 3),
    f("GlobalNumUint", 52, 3),
    f("GlobalNumByteSlice", 53, 3),
    f("LocalNumUint", 54, 3),
    f("LocalNumByteSlice", 55, 3),
    f("ExtraProgramPages", 56, 4),
    f("Nonparticipation", 57, 5),
    a("Logs", 58, 5),
    f("NumLogs", 59, 5),
    f("CreatedAssetID", 60, 5),
    f("CreatedApplicationID", 61, 5),
    f("LastLog", 62, 6),
    f("StateProofPK", 63, 6),
    a("ApprovalProgramPages", 64, 7),
    f("NumApprovalProgramPages", 65, 7),
    a("ClearStateProgramPages", 66, 7),
    f("NumClearStateProgramPages", 67, 7),
];

/// Global fields
pub static GLOBAL_FIELDS: &[FieldSpec] = &[
    f("MinTxnFee", 0, 1),
    f("MinBalance", 1, 1),
    f("MaxTxnLife", 2, 1),
    f("ZeroAddress", 3, 1),
    f("GroupSize", 4, 1),
    f("LogicSigVersion", 5, 2),
    f("Round", 6, 2),
    f("LatestTimestamp", 7, 2),
    f("CurrentApplicationID", 8, 2),
    f("CreatorAddress", 9, 3),
    f("CurrentApplicationAddress", 10, 5),
    f("GroupID", 11, 5),
    f("OpcodeBudget", 12, 6),
    f("CallerApplicationID", 13, 6),
    f("CallerApplicationAddress", 14, 6),
];

/// Asset holding fields
pub static ASSET_HOLDING_FIELDS: &[FieldSpec] = &[f("AssetBalance", 0, 2), f("AssetFrozen", 1, 2)];

/// Asset parameter fields
pub static ASSET_PARAMS_FIELDS: &[FieldSpec] = &[
    f("AssetTotal", 0, 2),
    f("AssetDecimals", 1, 2),
    f("AssetDefaultFrozen", 2, 2),
    f("AssetUnitName", 3, 2),
    f("AssetName", 4, 2),
    f("AssetURL", 5, 2),
    f("AssetMetadataHash", 6, 2),
    f("AssetManager", 7, 2),
    f("AssetReserve", 8, 2),
    f("AssetFreeze", 9, 2),
    f("AssetClawback", 10, 2),
    f("AssetCreator", 11, 5),
];

/// Application parameter fields
pub static APP_PARAMS_FIELDS: &[FieldSpec] = &[
    f("AppApprovalProgram", 0, 5),
    f("AppClearStateProgram", 1, 5),
    f("AppGlobalNumUint", 2, 5),
    f("AppGlobalNumByteSlice", 3, 5),
    f("AppLocalNumUint", 4, 5),
    f("AppLocalNumByteSlice", 5, 5),
    f("AppExtraProgramPages", 6, 5),
    f("AppCreator", 7, 5),
    f("AppAddress", 8, 5),
];

/// Account parameter fields
pub static ACCT_PARAMS_FIELDS: &[FieldSpec] = &[
    f("AcctBalance", 0, 6),
    f("AcctMinBalance", 1, 6),
    f("AcctAuthAddr", 2, 6),
    f("AcctTotalNumUint", 3, 8),
    f("AcctTotalNumByteSlice", 4, 8),
    f("AcctTotalExtraAppPages", 5, 8),
    f("AcctTotalAppsCreated", 6, 8),
    f("AcctTotalAppsOptedIn", 7, 8),
    f("AcctTotalAssetsCreated", 8, 8),
    f("AcctTotalAssets", 9, 8),
    f("AcctTotalBoxes", 10, 8),
    f("AcctTotalBoxBytes", 11, 8),
];

/// Named integer constants accepted by `int`
pub fn named_int(name: &str) -> Option<u64> {
    let v = match name {
        "unknown" => 0,
        "pay" => 1,
        "keyreg" => 2,
        "acfg" => 3,
        "axfer" => 4,
        "afrz" => 5,
        "appl" => 6,
        "NoOp" => 0,
        "OptIn" => 1,
        "CloseOut" => 2,
        "ClearState" => 3,
        "UpdateApplication" => 4,
        "DeleteApplication" => 5,
        _ => return None,
    };
    Some(v)
}
