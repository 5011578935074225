//! Transactions and their authorizations
//!
//! [`Transaction`] is a flat record carrying the fields of every transaction
//! type; `type` selects which ones are meaningful. Fields are declared in wire
//! key order and zero values are omitted, so the derived encoding is
//! canonical and hashes to the transaction id.

use crate::address::{Address, Digest, Signature};
use crate::crypto::{self, prefix};
use crate::encoding::{canonical_bytes, is_false, is_zero};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::ByteBuf;
use std::fmt;

/// Transaction type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TxType {
    /// Payment (`pay`)
    #[default]
    Payment,
    /// Key registration (`keyreg`)
    KeyRegistration,
    /// Asset configuration (`acfg`)
    AssetConfig,
    /// Asset transfer (`axfer`)
    AssetTransfer,
    /// Asset freeze (`afrz`)
    AssetFreeze,
    /// Application call (`appl`)
    ApplicationCall,
}

impl TxType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Payment => "pay",
            TxType::KeyRegistration => "keyreg",
            TxType::AssetConfig => "acfg",
            TxType::AssetTransfer => "axfer",
            TxType::AssetFreeze => "afrz",
            TxType::ApplicationCall => "appl",
        }
    }

    /// Parse a wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pay" => Some(TxType::Payment),
            "keyreg" => Some(TxType::KeyRegistration),
            "acfg" => Some(TxType::AssetConfig),
            "axfer" => Some(TxType::AssetTransfer),
            "afrz" => Some(TxType::AssetFreeze),
            "appl" => Some(TxType::ApplicationCall),
            _ => None,
        }
    }

    /// Numeric form exposed to programs (`TypeEnum`)
    pub fn type_enum(&self) -> u64 {
        match self {
            TxType::Payment => 1,
            TxType::KeyRegistration => 2,
            TxType::AssetConfig => 3,
            TxType::AssetTransfer => 4,
            TxType::AssetFreeze => 5,
            TxType::ApplicationCall => 6,
        }
    }

    /// Inverse of [`TxType::type_enum`]
    pub fn from_type_enum(v: u64) -> Option<Self> {
        match v {
            1 => Some(TxType::Payment),
            2 => Some(TxType::KeyRegistration),
            3 => Some(TxType::AssetConfig),
            4 => Some(TxType::AssetTransfer),
            5 => Some(TxType::AssetFreeze),
            6 => Some(TxType::ApplicationCall),
            _ => None,
        }
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TxType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TxType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TypeVisitor;

        impl<'de> Visitor<'de> for TypeVisitor {
            type Value = TxType;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a transaction type name")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<TxType, E> {
                TxType::parse(v).ok_or_else(|| E::unknown_variant(v, &["pay", "keyreg", "acfg", "axfer", "afrz", "appl"]))
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<TxType, E> {
                let s = std::str::from_utf8(v).map_err(E::custom)?;
                self.visit_str(s)
            }
        }

        deserializer.deserialize_str(TypeVisitor)
    }
}

/// Application call completion action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OnCompletion {
    /// Run the approval program only
    #[default]
    NoOp,
    /// Allocate local state
    OptIn,
    /// Release local state (program may refuse)
    CloseOut,
    /// Release local state unconditionally
    ClearState,
    /// Replace the programs
    UpdateApplication,
    /// Delete the application
    DeleteApplication,
}

impl OnCompletion {
    /// Numeric wire value
    pub fn as_u64(&self) -> u64 {
        match self {
            OnCompletion::NoOp => 0,
            OnCompletion::OptIn => 1,
            OnCompletion::CloseOut => 2,
            OnCompletion::ClearState => 3,
            OnCompletion::UpdateApplication => 4,
            OnCompletion::DeleteApplication => 5,
        }
    }

    /// Inverse of [`OnCompletion::as_u64`]
    pub fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(OnCompletion::NoOp),
            1 => Some(OnCompletion::OptIn),
            2 => Some(OnCompletion::CloseOut),
            3 => Some(OnCompletion::ClearState),
            4 => Some(OnCompletion::UpdateApplication),
            5 => Some(OnCompletion::DeleteApplication),
            _ => None,
        }
    }
}

impl Serialize for OnCompletion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.as_u64())
    }
}

impl<'de> Deserialize<'de> for OnCompletion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = u64::deserialize(deserializer)?;
        OnCompletion::from_u64(v)
            .ok_or_else(|| de::Error::custom(format!("unknown on-completion {}", v)))
    }
}

/// Storage allocation of an application's global or local state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateSchema {
    /// Byte slice entries
    #[serde(rename = "nbs", default, skip_serializing_if = "is_zero")]
    pub num_byte_slice: u64,
    /// Uint entries
    #[serde(rename = "nui", default, skip_serializing_if = "is_zero")]
    pub num_uint: u64,
}

impl StateSchema {
    /// Total entries
    pub fn num_entries(&self) -> u64 {
        self.num_uint.saturating_add(self.num_byte_slice)
    }

    /// Component-wise sum
    pub fn add(&self, other: &StateSchema) -> StateSchema {
        StateSchema {
            num_byte_slice: self.num_byte_slice.saturating_add(other.num_byte_slice),
            num_uint: self.num_uint.saturating_add(other.num_uint),
        }
    }

    /// Component-wise difference, floored at zero
    pub fn sub(&self, other: &StateSchema) -> StateSchema {
        StateSchema {
            num_byte_slice: self.num_byte_slice.saturating_sub(other.num_byte_slice),
            num_uint: self.num_uint.saturating_sub(other.num_uint),
        }
    }
}

/// Reference to a box of an application listed in the call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoxRef {
    /// Index into foreign apps (0 is the called app)
    #[serde(rename = "i", default, skip_serializing_if = "is_zero")]
    pub index: u64,
    /// Box name
    #[serde(rename = "n", default, skip_serializing_if = "is_zero")]
    pub name: ByteBuf,
}

/// Asset parameters, as configured and as stored by the creator
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssetParams {
    /// Metadata hash
    #[serde(rename = "am", default, skip_serializing_if = "Digest::is_zero")]
    pub metadata_hash: Digest,
    /// Asset name
    #[serde(rename = "an", default, skip_serializing_if = "String::is_empty")]
    pub asset_name: String,
    /// URL
    #[serde(rename = "au", default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    /// Clawback address
    #[serde(rename = "c", default, skip_serializing_if = "Address::is_zero")]
    pub clawback: Address,
    /// Decimals
    #[serde(rename = "dc", default, skip_serializing_if = "is_zero")]
    pub decimals: u32,
    /// Holdings start frozen
    #[serde(rename = "df", default, skip_serializing_if = "is_false")]
    pub default_frozen: bool,
    /// Freeze address
    #[serde(rename = "f", default, skip_serializing_if = "Address::is_zero")]
    pub freeze: Address,
    /// Manager address
    #[serde(rename = "m", default, skip_serializing_if = "Address::is_zero")]
    pub manager: Address,
    /// Reserve address
    #[serde(rename = "r", default, skip_serializing_if = "Address::is_zero")]
    pub reserve: Address,
    /// Total supply
    #[serde(rename = "t", default, skip_serializing_if = "is_zero")]
    pub total: u64,
    /// Unit name
    #[serde(rename = "un", default, skip_serializing_if = "String::is_empty")]
    pub unit_name: String,
}

/// Transaction payload
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transaction {
    /// Asset amount (axfer)
    #[serde(rename = "aamt", default, skip_serializing_if = "is_zero")]
    pub asset_amount: u64,
    /// Asset close-to (axfer)
    #[serde(rename = "aclose", default, skip_serializing_if = "Address::is_zero")]
    pub asset_close_to: Address,
    /// Target frozen flag (afrz)
    #[serde(rename = "afrz", default, skip_serializing_if = "is_false")]
    pub asset_frozen: bool,
    /// Payment amount (pay)
    #[serde(rename = "amt", default, skip_serializing_if = "is_zero")]
    pub amount: u64,
    /// Application args (appl)
    #[serde(rename = "apaa", default, skip_serializing_if = "Vec::is_empty")]
    pub app_args: Vec<ByteBuf>,
    /// Completion action (appl)
    #[serde(rename = "apan", default, skip_serializing_if = "is_zero")]
    pub on_completion: OnCompletion,
    /// Approval program (appl)
    #[serde(rename = "apap", default, skip_serializing_if = "is_zero")]
    pub approval_program: ByteBuf,
    /// Asset parameters (acfg)
    #[serde(rename = "apar", default, skip_serializing_if = "is_zero")]
    pub asset_params: AssetParams,
    /// Foreign assets (appl)
    #[serde(rename = "apas", default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_assets: Vec<u64>,
    /// Foreign accounts (appl)
    #[serde(rename = "apat", default, skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<Address>,
    /// Box references (appl)
    #[serde(rename = "apbx", default, skip_serializing_if = "Vec::is_empty")]
    pub boxes: Vec<BoxRef>,
    /// Extra program pages (appl)
    #[serde(rename = "apep", default, skip_serializing_if = "is_zero")]
    pub extra_program_pages: u32,
    /// Foreign applications (appl)
    #[serde(rename = "apfa", default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_apps: Vec<u64>,
    /// Global schema (appl create)
    #[serde(rename = "apgs", default, skip_serializing_if = "is_zero")]
    pub global_state_schema: StateSchema,
    /// Application id, zero to create (appl)
    #[serde(rename = "apid", default, skip_serializing_if = "is_zero")]
    pub application_id: u64,
    /// Local schema (appl create)
    #[serde(rename = "apls", default, skip_serializing_if = "is_zero")]
    pub local_state_schema: StateSchema,
    /// Clear state program (appl)
    #[serde(rename = "apsu", default, skip_serializing_if = "is_zero")]
    pub clear_state_program: ByteBuf,
    /// Asset receiver (axfer)
    #[serde(rename = "arcv", default, skip_serializing_if = "Address::is_zero")]
    pub asset_receiver: Address,
    /// Clawback target (axfer)
    #[serde(rename = "asnd", default, skip_serializing_if = "Address::is_zero")]
    pub asset_sender: Address,
    /// Asset being configured, zero to create (acfg)
    #[serde(rename = "caid", default, skip_serializing_if = "is_zero")]
    pub config_asset: u64,
    /// Close remainder to (pay)
    #[serde(rename = "close", default, skip_serializing_if = "Address::is_zero")]
    pub close_remainder_to: Address,
    /// Account to freeze (afrz)
    #[serde(rename = "fadd", default, skip_serializing_if = "Address::is_zero")]
    pub freeze_account: Address,
    /// Asset to freeze (afrz)
    #[serde(rename = "faid", default, skip_serializing_if = "is_zero")]
    pub freeze_asset: u64,
    /// Fee
    #[serde(rename = "fee", default, skip_serializing_if = "is_zero")]
    pub fee: u64,
    /// First valid round
    #[serde(rename = "fv", default, skip_serializing_if = "is_zero")]
    pub first_valid: u64,
    /// Genesis id
    #[serde(rename = "gen", default, skip_serializing_if = "String::is_empty")]
    pub genesis_id: String,
    /// Genesis hash
    #[serde(rename = "gh", default, skip_serializing_if = "Digest::is_zero")]
    pub genesis_hash: Digest,
    /// Group id
    #[serde(rename = "grp", default, skip_serializing_if = "Digest::is_zero")]
    pub group: Digest,
    /// Last valid round
    #[serde(rename = "lv", default, skip_serializing_if = "is_zero")]
    pub last_valid: u64,
    /// Lease
    #[serde(rename = "lx", default, skip_serializing_if = "Digest::is_zero")]
    pub lease: Digest,
    /// Mark account non-participating (keyreg)
    #[serde(rename = "nonpart", default, skip_serializing_if = "is_false")]
    pub nonparticipation: bool,
    /// Note
    #[serde(rename = "note", default, skip_serializing_if = "is_zero")]
    pub note: ByteBuf,
    /// Receiver (pay)
    #[serde(rename = "rcv", default, skip_serializing_if = "Address::is_zero")]
    pub receiver: Address,
    /// New auth address
    #[serde(rename = "rekey", default, skip_serializing_if = "Address::is_zero")]
    pub rekey_to: Address,
    /// Selection key (keyreg)
    #[serde(rename = "selkey", default, skip_serializing_if = "Address::is_zero")]
    pub selection_pk: Address,
    /// Sender
    #[serde(rename = "snd", default, skip_serializing_if = "Address::is_zero")]
    pub sender: Address,
    /// State proof key (keyreg)
    #[serde(rename = "sprfkey", default, skip_serializing_if = "is_zero")]
    pub state_proof_pk: ByteBuf,
    /// Type
    #[serde(rename = "type", default)]
    pub tx_type: TxType,
    /// First voting round (keyreg)
    #[serde(rename = "votefst", default, skip_serializing_if = "is_zero")]
    pub vote_first: u64,
    /// Key dilution (keyreg)
    #[serde(rename = "votekd", default, skip_serializing_if = "is_zero")]
    pub vote_key_dilution: u64,
    /// Vote key (keyreg)
    #[serde(rename = "votekey", default, skip_serializing_if = "Address::is_zero")]
    pub vote_pk: Address,
    /// Last voting round (keyreg)
    #[serde(rename = "votelst", default, skip_serializing_if = "is_zero")]
    pub vote_last: u64,
    /// Asset being transferred (axfer)
    #[serde(rename = "xaid", default, skip_serializing_if = "is_zero")]
    pub xfer_asset: u64,
}

#[derive(Serialize)]
struct TxGroup<'a> {
    #[serde(rename = "txlist")]
    tx_list: &'a [Digest],
}

impl Transaction {
    /// Canonical encoding of the payload
    pub fn canonical_bytes(&self) -> crate::Result<Vec<u8>> {
        canonical_bytes(self)
    }

    /// Transaction id: `H("TX" || encoding)`
    pub fn id(&self) -> crate::Result<Digest> {
        Ok(crypto::hash_with_prefix(prefix::TRANSACTION, &self.canonical_bytes()?))
    }

    /// Group id over the given members, ignoring their current `grp` field
    pub fn group_id(txns: &[Transaction]) -> crate::Result<Digest> {
        let ids = txns
            .iter()
            .map(|t| {
                let mut bare = t.clone();
                bare.group = Digest::ZERO;
                bare.id()
            })
            .collect::<crate::Result<Vec<Digest>>>()?;
        Ok(crypto::hash_with_prefix(
            prefix::TX_GROUP,
            &canonical_bytes(&TxGroup { tx_list: &ids })?,
        ))
    }

    /// Addresses a transaction moves value between.
    ///
    /// The sender first, then the type-specific counterparties. Zero
    /// addresses are skipped.
    pub fn relevant_addresses(&self) -> Vec<Address> {
        let mut out = vec![self.sender];
        let mut push = |a: Address| {
            if !a.is_zero() {
                out.push(a);
            }
        };
        match self.tx_type {
            TxType::Payment => {
                push(self.receiver);
                push(self.close_remainder_to);
            }
            TxType::AssetTransfer => {
                push(self.asset_receiver);
                push(self.asset_close_to);
                push(self.asset_sender);
            }
            TxType::AssetFreeze => push(self.freeze_account),
            _ => {}
        }
        push(self.rekey_to);
        out
    }

    /// Total bytes of application args
    pub fn app_args_len(&self) -> usize {
        self.app_args.iter().map(|a| a.len()).sum()
    }
}

/// One subsignature of a multisig
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MultisigSubsig {
    /// Public key
    #[serde(rename = "pk", default)]
    pub key: Address,
    /// Signature, absent when this key did not sign
    #[serde(rename = "s", default, skip_serializing_if = "Signature::is_zero")]
    pub sig: Signature,
}

/// Multisig authorization
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MultisigSig {
    /// Subsignatures in key order
    #[serde(rename = "subsig", default, skip_serializing_if = "Vec::is_empty")]
    pub subsigs: Vec<MultisigSubsig>,
    /// Threshold
    #[serde(rename = "thr", default, skip_serializing_if = "is_zero")]
    pub threshold: u8,
    /// Version
    #[serde(rename = "v", default, skip_serializing_if = "is_zero")]
    pub version: u8,
}

impl MultisigSig {
    /// True when no multisig is present
    pub fn is_blank(&self) -> bool {
        self.subsigs.is_empty() && self.threshold == 0 && self.version == 0
    }

    /// Address derived from version, threshold and keys
    pub fn address(&self) -> Address {
        let keys: Vec<Address> = self.subsigs.iter().map(|s| s.key).collect();
        crypto::multisig_address(self.version, self.threshold, &keys)
    }

    /// Check subsignatures over `message` and the threshold
    pub fn verify(&self, message: &[u8]) -> Result<(), String> {
        if self.version != 1 {
            return Err(format!("unsupported multisig version {}", self.version));
        }
        if self.threshold == 0 || usize::from(self.threshold) > self.subsigs.len() {
            return Err(format!(
                "invalid multisig threshold {} of {}",
                self.threshold,
                self.subsigs.len()
            ));
        }
        let mut count = 0usize;
        for sub in &self.subsigs {
            if sub.sig.is_zero() {
                continue;
            }
            if !crypto::verify(&sub.key, message, &sub.sig) {
                return Err(format!("invalid multisig subsignature for {}", sub.key));
            }
            count += 1;
        }
        if count < usize::from(self.threshold) {
            return Err(format!(
                "multisig has {} signatures, threshold {}",
                count, self.threshold
            ));
        }
        Ok(())
    }
}

/// Logic signature authorization
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogicSig {
    /// Program arguments
    #[serde(rename = "arg", default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ByteBuf>,
    /// Program bytecode
    #[serde(rename = "l", default, skip_serializing_if = "is_zero")]
    pub logic: ByteBuf,
    /// Delegating multisig
    #[serde(rename = "msig", default, skip_serializing_if = "MultisigSig::is_blank")]
    pub msig: MultisigSig,
    /// Delegating signature
    #[serde(rename = "sig", default, skip_serializing_if = "Signature::is_zero")]
    pub sig: Signature,
}

impl LogicSig {
    /// True when no logic signature is present
    pub fn is_blank(&self) -> bool {
        self.logic.is_empty() && self.args.is_empty() && self.sig.is_zero() && self.msig.is_blank()
    }

    /// True when a key delegated the program
    pub fn is_delegated(&self) -> bool {
        !self.sig.is_zero() || !self.msig.is_blank()
    }

    /// Escrow address of the program
    pub fn address(&self) -> Address {
        crypto::program_address(&self.logic)
    }

    /// Message a delegating key signs: `"Program" || program`
    pub fn delegation_message(&self) -> Vec<u8> {
        let mut buf = prefix::PROGRAM.to_vec();
        buf.extend_from_slice(&self.logic);
        buf
    }

    /// Program plus args length
    pub fn size(&self) -> usize {
        self.logic.len() + self.args.iter().map(|a| a.len()).sum::<usize>()
    }
}

/// A transaction with its authorization
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignedTxn {
    /// Logic signature
    #[serde(rename = "lsig", default, skip_serializing_if = "LogicSig::is_blank")]
    pub lsig: LogicSig,
    /// Multisig
    #[serde(rename = "msig", default, skip_serializing_if = "MultisigSig::is_blank")]
    pub msig: MultisigSig,
    /// Auth address when it differs from the sender
    #[serde(rename = "sgnr", default, skip_serializing_if = "Address::is_zero")]
    pub auth_addr: Address,
    /// Ed25519 signature
    #[serde(rename = "sig", default, skip_serializing_if = "Signature::is_zero")]
    pub sig: Signature,
    /// Payload
    #[serde(rename = "txn")]
    pub txn: Transaction,
}

impl SignedTxn {
    /// Sign with a single key. The signer becomes `sgnr` when it is not the sender.
    pub fn sign(txn: Transaction, key: &crate::crypto::KeyPair) -> crate::Result<Self> {
        let sig = key.sign_with_prefix(prefix::TRANSACTION, &txn.canonical_bytes()?);
        let signer = key.address();
        let auth_addr = if signer == txn.sender {
            Address::ZERO
        } else {
            signer
        };
        Ok(Self {
            sig,
            auth_addr,
            txn,
            ..Default::default()
        })
    }

    /// Wrap in a logic signature
    pub fn with_logic(txn: Transaction, lsig: LogicSig) -> Self {
        Self {
            lsig,
            txn,
            ..Default::default()
        }
    }

    /// Address whose key or program authorizes this transaction
    pub fn authorizer(&self) -> Address {
        if self.auth_addr.is_zero() {
            self.txn.sender
        } else {
            self.auth_addr
        }
    }

    /// Transaction id
    pub fn id(&self) -> crate::Result<Digest> {
        self.txn.id()
    }

    /// Hash of the whole signed transaction, used as a cache key
    pub fn cache_key(&self) -> crate::Result<Digest> {
        Ok(crypto::sha512_256(&canonical_bytes(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::encoding::{decode, encode};

    fn payment() -> Transaction {
        Transaction {
            tx_type: TxType::Payment,
            sender: Address([1u8; 32]),
            receiver: Address([2u8; 32]),
            amount: 5,
            fee: 1000,
            first_valid: 1,
            last_valid: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_fields_omitted() {
        let bytes = encode(&Transaction::default()).unwrap();
        // map of one entry: {"type": "pay"}
        assert_eq!(bytes[0], 0x81);
        assert_eq!(&bytes[1..6], b"\xa4type");
    }

    #[test]
    fn test_keys_are_sorted() {
        let bytes = encode(&payment()).unwrap();
        let value: std::collections::BTreeMap<String, any_value::Any> = decode(&bytes).unwrap();
        let keys: Vec<_> = value.keys().cloned().collect();
        assert_eq!(keys, vec!["amt", "fee", "fv", "lv", "rcv", "snd", "type"]);
        // Encoded order matches sorted order
        let pos = |k: &str| {
            bytes
                .windows(k.len())
                .position(|w| w == k.as_bytes())
                .unwrap()
        };
        assert!(pos("amt") < pos("fee"));
        assert!(pos("rcv") < pos("snd"));
        assert!(pos("snd") < pos("type"));
    }

    #[test]
    fn test_signed_txn_decodes() {
        let kp = KeyPair::from_seed(&[3u8; 32]);
        let mut txn = payment();
        txn.sender = kp.address();
        let stxn = SignedTxn::sign(txn, &kp).unwrap();
        assert!(stxn.auth_addr.is_zero());
        let back: SignedTxn = decode(&encode(&stxn).unwrap()).unwrap();
        assert_eq!(back, stxn);
        assert!(crypto::verify_with_prefix(
            &kp.address(),
            prefix::TRANSACTION,
            &back.txn.canonical_bytes().unwrap(),
            &back.sig
        ));
    }

    #[test]
    fn test_group_id_ignores_existing_group() {
        let a = payment();
        let mut b = payment();
        b.amount = 6;
        let gid = Transaction::group_id(&[a.clone(), b.clone()]).unwrap();
        let mut a2 = a.clone();
        a2.group = gid;
        assert_eq!(Transaction::group_id(&[a2, b.clone()]).unwrap(), gid);
        assert_ne!(Transaction::group_id(&[b, a]).unwrap(), gid);
    }

    #[test]
    fn test_txid_changes_with_group() {
        let a = payment();
        let mut b = a.clone();
        b.group = Digest([9u8; 32]);
        assert_ne!(a.id().unwrap(), b.id().unwrap());
    }

    #[test]
    fn test_relevant_addresses() {
        let mut txn = payment();
        txn.close_remainder_to = Address([4u8; 32]);
        assert_eq!(
            txn.relevant_addresses(),
            vec![Address([1u8; 32]), Address([2u8; 32]), Address([4u8; 32])]
        );
    }

    #[test]
    fn test_multisig_threshold() {
        let k1 = KeyPair::from_seed(&[1u8; 32]);
        let k2 = KeyPair::from_seed(&[2u8; 32]);
        let msg = b"data";
        let mut msig = MultisigSig {
            version: 1,
            threshold: 2,
            subsigs: vec![
                MultisigSubsig { key: k1.address(), sig: k1.sign(msg) },
                MultisigSubsig { key: k2.address(), sig: Signature::ZERO },
            ],
        };
        assert!(msig.verify(msg).is_err());
        msig.subsigs[1].sig = k2.sign(msg);
        assert!(msig.verify(msg).is_ok());
    }

    #[test]
    fn test_on_completion_wire_value() {
        let mut txn = Transaction {
            tx_type: TxType::ApplicationCall,
            on_completion: OnCompletion::DeleteApplication,
            ..Default::default()
        };
        let back: Transaction = decode(&encode(&txn).unwrap()).unwrap();
        assert_eq!(back.on_completion, OnCompletion::DeleteApplication);
        txn.on_completion = OnCompletion::NoOp;
        let bytes = encode(&txn).unwrap();
        assert!(!bytes.windows(4).any(|w| w == b"apan"));
    }

    mod any_value {
        use serde::de::{Deserialize, Deserializer, IgnoredAny};

        /// Accepts any value
        pub struct Any;

        impl<'de> Deserialize<'de> for Any {
            fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                IgnoredAny::deserialize(d)?;
                Ok(Any)
            }
        }
    }
}
