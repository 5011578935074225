//! Opcode table
//!
//! One entry per supported opcode: byte, mnemonic, first version, immediate
//! layout and cost.

use crate::fields::FieldGroup;

/// Immediate argument layout following the opcode byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Immediates {
    /// No immediates
    None,
    /// One byte
    U8,
    /// Two bytes
    U8x2,
    /// Signed 16-bit branch offset
    Label,
    /// Count then varuints
    IntBlock,
    /// Count then length-prefixed byte strings
    ByteBlock,
    /// One varuint
    PushInt,
    /// One length-prefixed byte string
    PushBytes,
    /// Field byte
    Field(FieldGroup),
    /// Field byte then array index byte
    FieldIndex(FieldGroup),
    /// Group index byte then field byte
    GroupField(FieldGroup),
    /// Group index, field and array index bytes
    GroupFieldIndex(FieldGroup),
}

/// Opcode mode restriction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Allowed everywhere
    Any,
    /// Application mode only
    Application,
}

/// Opcode description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpSpec {
    /// Opcode byte
    pub opcode: u8,
    /// Mnemonic
    pub name: &'static str,
    /// First program version that has it
    pub version: u64,
    /// Immediate layout
    pub immediates: Immediates,
    /// Cost
    pub cost: u64,
    /// Mode restriction
    pub mode: Mode,
}

const fn op(opcode: u8, name: &'static str, version: u64, immediates: Immediates) -> OpSpec {
    OpSpec {
        opcode,
        name,
        version,
        immediates,
        cost: 1,
        mode: Mode::Any,
    }
}

const fn costly(opcode: u8, name: &'static str, version: u64, cost: u64) -> OpSpec {
    OpSpec {
        opcode,
        name,
        version,
        immediates: Immediates::None,
        cost,
        mode: Mode::Any,
    }
}

const fn app(opcode: u8, name: &'static str, version: u64, immediates: Immediates) -> OpSpec {
    OpSpec {
        opcode,
        name,
        version,
        immediates,
        cost: 1,
        mode: Mode::Application,
    }
}

pub use table::OPCODES;

mod table {
    use super::{app, costly, op, Immediates::*, OpSpec};
    use crate::fields::FieldGroup;

    /// All supported opcodes
    pub static OPCODES: &[OpSpec] = &[
        op(0x00, "err", 1, None),
        costly(0x01, "sha256", 1, 35),
        costly(0x03, "sha512_256", 1, 45),
        costly(0x04, "ed25519verify", 1, 1900),
        op(0x08, "+", 1, None),
        op(0x09, "-", 1, None),
        op(0x0a, "/", 1, None),
        op(0x0b, "*", 1, None),
        op(0x0c, "<", 1, None),
        op(0x0d, ">", 1, None),
        op(0x0e, "<=", 1, None),
        op(0x0f, ">=", 1, None),
        op(0x10, "&&", 1, None),
        op(0x11, "||", 1, None),
        op(0x12, "==", 1, None),
        op(0x13, "!=", 1, None),
        op(0x14, "!", 1, None),
        op(0x15, "len", 1, None),
        op(0x16, "itob", 1, None),
        op(0x17, "btoi", 1, None),
        op(0x18, "%", 1, None),
        op(0x19, "|", 1, None),
        op(0x1a, "&", 1, None),
        op(0x1b, "^", 1, None),
        op(0x1c, "~", 1, None),
        op(0x1d, "mulw", 1, None),
        op(0x1e, "addw", 2, None),
        op(0x20, "intcblock", 1, IntBlock),
        op(0x21, "intc", 1, U8),
        op(0x22, "intc_0", 1, None),
        op(0x23, "intc_1", 1, None),
        op(0x24, "intc_2", 1, None),
        op(0x25, "intc_3", 1, None),
        op(0x26, "bytecblock", 1, ByteBlock),
        op(0x27, "bytec", 1, U8),
        op(0x28, "bytec_0", 1, None),
        op(0x29, "bytec_1", 1, None),
        op(0x2a, "bytec_2", 1, None),
        op(0x2b, "bytec_3", 1, None),
        op(0x2c, "arg", 1, U8),
        op(0x2d, "arg_0", 1, None),
        op(0x2e, "arg_1", 1, None),
        op(0x2f, "arg_2", 1, None),
        op(0x30, "arg_3", 1, None),
        op(0x31, "txn", 1, Field(FieldGroup::Txn)),
        op(0x32, "global", 1, Field(FieldGroup::Global)),
        op(0x33, "gtxn", 1, GroupField(FieldGroup::Txn)),
        op(0x34, "load", 1, U8),
        op(0x35, "store", 1, U8),
        op(0x36, "txna", 2, FieldIndex(FieldGroup::Txn)),
        op(0x37, "gtxna", 2, GroupFieldIndex(FieldGroup::Txn)),
        op(0x38, "gtxns", 3, Field(FieldGroup::Txn)),
        op(0x39, "gtxnsa", 3, FieldIndex(FieldGroup::Txn)),
        op(0x40, "bnz", 1, Label),
        op(0x41, "bz", 2, Label),
        op(0x42, "b", 2, Label),
        op(0x43, "return", 2, None),
        op(0x44, "assert", 3, None),
        op(0x48, "pop", 1, None),
        op(0x49, "dup", 1, None),
        op(0x4a, "dup2", 2, None),
        op(0x4b, "dig", 3, U8),
        op(0x4c, "swap", 3, None),
        op(0x4d, "select", 3, None),
        op(0x4e, "cover", 5, U8),
        op(0x4f, "uncover", 5, U8),
        op(0x50, "concat", 2, None),
        op(0x51, "substring", 2, U8x2),
        op(0x52, "substring3", 2, None),
        op(0x53, "getbit", 3, None),
        op(0x54, "setbit", 3, None),
        op(0x55, "getbyte", 3, None),
        op(0x56, "setbyte", 3, None),
        op(0x57, "extract", 5, U8x2),
        op(0x58, "extract3", 5, None),
        op(0x59, "extract_uint16", 5, None),
        op(0x5a, "extract_uint32", 5, None),
        op(0x5b, "extract_uint64", 5, None),
        app(0x60, "balance", 2, None),
        app(0x61, "app_opted_in", 2, None),
        app(0x62, "app_local_get", 2, None),
        app(0x63, "app_local_get_ex", 2, None),
        app(0x64, "app_global_get", 2, None),
        app(0x65, "app_global_get_ex", 2, None),
        app(0x66, "app_local_put", 2, None),
        app(0x67, "app_global_put", 2, None),
        app(0x68, "app_local_del", 2, None),
        app(0x69, "app_global_del", 2, None),
        app(0x70, "asset_holding_get", 2, Field(FieldGroup::AssetHolding)),
        app(0x71, "asset_params_get", 2, Field(FieldGroup::AssetParams)),
        app(0x72, "app_params_get", 5, Field(FieldGroup::AppParams)),
        app(0x73, "acct_params_get", 6, Field(FieldGroup::AcctParams)),
        app(0x78, "min_balance", 3, None),
        op(0x80, "pushbytes", 3, PushBytes),
        op(0x81, "pushint", 3, PushInt),
        op(0x88, "callsub", 4, Label),
        op(0x89, "retsub", 4, None),
        op(0xaf, "bzero", 4, None),
        app(0xb0, "log", 5, None),
        app(0xb1, "itxn_begin", 5, None),
        app(0xb2, "itxn_field", 5, Field(FieldGroup::Txn)),
        app(0xb3, "itxn_submit", 5, None),
        app(0xb4, "itxn", 5, Field(FieldGroup::Txn)),
        app(0xb5, "itxna", 5, FieldIndex(FieldGroup::Txn)),
        app(0xb6, "itxn_next", 6, None),
        app(0xb9, "box_create", 8, None),
        app(0xba, "box_extract", 8, None),
        app(0xbb, "box_replace", 8, None),
        app(0xbc, "box_del", 8, None),
        app(0xbd, "box_len", 8, None),
        app(0xbe, "box_get", 8, None),
        app(0xbf, "box_put", 8, None),
    ];
}

/// Look up by opcode byte
pub fn by_opcode(opcode: u8) -> Option<&'static OpSpec> {
    OPCODES.iter().find(|s| s.opcode == opcode)
}

/// Look up by mnemonic
pub fn by_name(name: &str) -> Option<&'static OpSpec> {
    OPCODES.iter().find(|s| s.name == name)
}

/// Read an unsigned LEB128 varuint at `pos`, returning the value and its length
pub fn read_varuint(bytes: &[u8], pos: usize) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, b) in bytes.get(pos..)?.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        value |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

/// Append an unsigned LEB128 varuint
pub fn write_varuint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcodes_unique() {
        for (i, a) in OPCODES.iter().enumerate() {
            for b in &OPCODES[i + 1..] {
                assert_ne!(a.opcode, b.opcode, "{} vs {}", a.name, b.name);
                assert_ne!(a.name, b.name);
            }
        }
    }

    #[test]
    fn test_varuint() {
        let mut buf = Vec::new();
        write_varuint(&mut buf, 300);
        assert_eq!(buf, vec![0xac, 0x02]);
        assert_eq!(read_varuint(&buf, 0), Some((300, 2)));
        buf.clear();
        write_varuint(&mut buf, u64::MAX);
        assert_eq!(read_varuint(&buf, 0), Some((u64::MAX, 10)));
        assert_eq!(read_varuint(&[0x80], 0), None);
    }
}
