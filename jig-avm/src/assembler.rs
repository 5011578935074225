//! Assembler
//!
//! Turns program text into bytecode and records which source line produced
//! each instruction.
//!
//! # Constants
//!
//! `int`, `byte`, `addr` and `method` are pseudo-ops. From version 4,
//! constants used more than once go into `intcblock`/`bytecblock` (most used
//! first) and single-use constants become `pushint`/`pushbytes`. Earlier
//! versions put every constant in a block, in order of first use. A program
//! that declares its own blocks gets no generated ones.

use crate::error::{Error, Result};
use crate::fields::{named_int, FieldGroup};
use crate::opcodes::{self, write_varuint, Immediates, OpSpec};
use base64::Engine as _;
use jig_protocol::address::base32_decode;
use jig_protocol::crypto::sha512_256;
use jig_protocol::Address;
use std::collections::{BTreeMap, HashMap};

/// Highest version the assembler accepts
pub const MAX_VERSION: u64 = 8;

/// Version assumed without a `#pragma version`
pub const DEFAULT_VERSION: u64 = 1;

/// Assembled program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// Bytecode, starting with the version varuint
    pub bytecode: Vec<u8>,
    /// Program version
    pub version: u64,
    /// Program counter to 0-based source line
    pub offset_to_line: BTreeMap<usize, usize>,
}

#[derive(Debug)]
enum Item {
    Label(String),
    Int(u64),
    Byte(Vec<u8>),
    Branch(&'static OpSpec, String),
    Raw(Vec<u8>),
}

#[derive(Debug)]
struct Line {
    line: usize,
    item: Item,
}

fn err(line: usize, message: impl Into<String>) -> Error {
    Error::Assemble {
        line: line + 1,
        message: message.into(),
    }
}

/// Assemble program text
pub fn assemble(source: &str) -> Result<Program> {
    let mut version = DEFAULT_VERSION;
    let mut seen_op = false;
    let mut items: Vec<Line> = Vec::new();
    let mut user_ints: Option<Vec<u64>> = None;
    let mut user_bytes: Option<Vec<Vec<u8>>> = None;

    for (line_no, raw) in source.lines().enumerate() {
        let mut tokens = tokenize(raw).map_err(|m| err(line_no, m))?;
        if tokens.is_empty() {
            continue;
        }

        if tokens[0] == "#pragma" {
            if seen_op {
                return Err(err(line_no, "#pragma version is only allowed before instructions"));
            }
            if tokens.len() != 3 || tokens[1] != "version" {
                return Err(err(line_no, "expected #pragma version N"));
            }
            version = parse_uint(&tokens[2]).ok_or_else(|| err(line_no, "bad #pragma version"))?;
            if version == 0 || version > MAX_VERSION {
                return Err(err(line_no, format!("unsupported version {}", version)));
            }
            continue;
        }

        if let Some(label) = tokens[0].strip_suffix(':') {
            if label.is_empty() {
                return Err(err(line_no, "empty label"));
            }
            items.push(Line {
                line: line_no,
                item: Item::Label(label.to_string()),
            });
            tokens.remove(0);
            if tokens.is_empty() {
                continue;
            }
        }

        seen_op = true;
        let item = parse_instruction(&tokens, version, &mut user_ints, &mut user_bytes)
            .map_err(|m| err(line_no, m))?;
        items.push(Line { line: line_no, item });
    }

    // Constant allocation
    let (int_block, byte_block, generated) = match (&user_ints, &user_bytes) {
        (None, None) => {
            let ints = allocate(
                items.iter().filter_map(|l| match &l.item {
                    Item::Int(v) => Some(*v),
                    _ => None,
                }),
                version,
            );
            let bytes = allocate(
                items.iter().filter_map(|l| match &l.item {
                    Item::Byte(b) => Some(b.clone()),
                    _ => None,
                }),
                version,
            );
            (ints, bytes, true)
        }
        _ => (
            user_ints.clone().unwrap_or_default(),
            user_bytes.clone().unwrap_or_default(),
            false,
        ),
    };

    let int_index: HashMap<u64, usize> = int_block
        .iter()
        .enumerate()
        .rev()
        .map(|(i, v)| (*v, i))
        .collect();
    let byte_index: HashMap<Vec<u8>, usize> = byte_block
        .iter()
        .enumerate()
        .rev()
        .map(|(i, v)| (v.clone(), i))
        .collect();

    let mut prefix = Vec::new();
    write_varuint(&mut prefix, version);
    if generated && !int_block.is_empty() {
        prefix.push(0x20);
        write_varuint(&mut prefix, int_block.len() as u64);
        for v in &int_block {
            write_varuint(&mut prefix, *v);
        }
    }
    if generated && !byte_block.is_empty() {
        prefix.push(0x26);
        write_varuint(&mut prefix, byte_block.len() as u64);
        for b in &byte_block {
            write_varuint(&mut prefix, b.len() as u64);
            prefix.extend_from_slice(b);
        }
    }

    // Encode everything except branches, then resolve labels
    let mut encoded: Vec<(usize, Vec<u8>, Option<(&'static OpSpec, String)>)> = Vec::new();
    let mut labels: HashMap<String, usize> = HashMap::new();
    let mut pc = prefix.len();
    for l in &items {
        let bytes = match &l.item {
            Item::Label(name) => {
                if labels.insert(name.clone(), pc).is_some() {
                    return Err(err(l.line, format!("duplicate label {:?}", name)));
                }
                continue;
            }
            Item::Int(v) => encode_int(*v, &int_index, version).map_err(|m| err(l.line, m))?,
            Item::Byte(b) => encode_bytes(b, &byte_index, version).map_err(|m| err(l.line, m))?,
            Item::Branch(spec, _) => vec![spec.opcode, 0, 0],
            Item::Raw(bytes) => bytes.clone(),
        };
        let branch = match &l.item {
            Item::Branch(spec, label) => Some((*spec, label.clone())),
            _ => None,
        };
        let len = bytes.len();
        encoded.push((l.line, bytes, branch));
        pc += len;
    }

    let mut bytecode = prefix;
    let mut offset_to_line = BTreeMap::new();
    for (line, mut bytes, branch) in encoded {
        let at = bytecode.len();
        if let Some((spec, label)) = branch {
            let target = *labels
                .get(&label)
                .ok_or_else(|| err(line, format!("reference to undefined label {:?}", label)))?;
            let offset = target as i64 - (at as i64 + 3);
            if offset < 0 && version < 4 {
                return Err(err(
                    line,
                    format!("{} {} is a back reference, needs version 4", spec.name, label),
                ));
            }
            let offset = i16::try_from(offset)
                .map_err(|_| err(line, format!("label {:?} is too far away", label)))?;
            bytes[1..3].copy_from_slice(&offset.to_be_bytes());
        }
        offset_to_line.insert(at, line);
        bytecode.extend_from_slice(&bytes);
    }

    Ok(Program {
        bytecode,
        version,
        offset_to_line,
    })
}

/// Choose block contents for constants seen in program order
fn allocate<T: Clone + Eq + std::hash::Hash>(values: impl Iterator<Item = T>, version: u64) -> Vec<T> {
    let mut order: Vec<T> = Vec::new();
    let mut counts: HashMap<T, usize> = HashMap::new();
    for v in values {
        let c = counts.entry(v.clone()).or_insert(0);
        if *c == 0 {
            order.push(v);
        }
        *c += 1;
    }
    if version < 4 {
        return order;
    }
    let mut shared: Vec<T> = order.into_iter().filter(|v| counts[v] > 1).collect();
    // stable: ties keep first-use order
    shared.sort_by(|a, b| counts[b].cmp(&counts[a]));
    shared
}

fn encode_int(v: u64, index: &HashMap<u64, usize>, version: u64) -> std::result::Result<Vec<u8>, String> {
    match index.get(&v) {
        Some(&i) if i < 4 => Ok(vec![0x22 + i as u8]),
        Some(&i) => Ok(vec![0x21, i as u8]),
        None if version >= 3 => {
            let mut out = vec![0x81];
            write_varuint(&mut out, v);
            Ok(out)
        }
        None => Err(format!("int {} is not in intcblock", v)),
    }
}

fn encode_bytes(
    b: &[u8],
    index: &HashMap<Vec<u8>, usize>,
    version: u64,
) -> std::result::Result<Vec<u8>, String> {
    match index.get(b) {
        Some(&i) if i < 4 => Ok(vec![0x28 + i as u8]),
        Some(&i) => Ok(vec![0x27, i as u8]),
        None if version >= 3 => {
            let mut out = vec![0x80];
            write_varuint(&mut out, b.len() as u64);
            out.extend_from_slice(b);
            Ok(out)
        }
        None => Err("byte constant is not in bytecblock".to_string()),
    }
}

fn parse_instruction(
    tokens: &[String],
    version: u64,
    user_ints: &mut Option<Vec<u64>>,
    user_bytes: &mut Option<Vec<Vec<u8>>>,
) -> std::result::Result<Item, String> {
    let name = tokens[0].as_str();
    let args = &tokens[1..];

    match name {
        "int" => {
            expect_args(name, args, 1)?;
            return Ok(Item::Int(parse_int_arg(&args[0])?));
        }
        "byte" => {
            let (bytes, used) = parse_byte_arg(args)?;
            if used != args.len() {
                return Err("byte expects one constant".to_string());
            }
            return Ok(Item::Byte(bytes));
        }
        "addr" => {
            expect_args(name, args, 1)?;
            let addr: Address = args[0].parse().map_err(|e| format!("{}", e))?;
            return Ok(Item::Byte(addr.0.to_vec()));
        }
        "method" => {
            expect_args(name, args, 1)?;
            let (sig, _) = parse_byte_arg(args)?;
            return Ok(Item::Byte(sha512_256(&sig).0[..4].to_vec()));
        }
        _ => {}
    }

    // Array fields written with an index use the indexed form of the opcode
    let name = match (name, args.len()) {
        ("txn", 2) => "txna",
        ("gtxn", 3) => "gtxna",
        ("gtxns", 2) => "gtxnsa",
        ("itxn", 2) => "itxna",
        (n, _) => n,
    };

    let spec = opcodes::by_name(name).ok_or_else(|| format!("unknown opcode: {}", name))?;
    if spec.version > version {
        return Err(format!(
            "{} opcode was introduced in v{}",
            spec.name, spec.version
        ));
    }

    let mut out = vec![spec.opcode];
    match spec.immediates {
        Immediates::None => expect_args(name, args, 0)?,
        Immediates::U8 => {
            expect_args(name, args, 1)?;
            out.push(parse_u8(&args[0])?);
        }
        Immediates::U8x2 => {
            expect_args(name, args, 2)?;
            out.push(parse_u8(&args[0])?);
            out.push(parse_u8(&args[1])?);
        }
        Immediates::Label => {
            expect_args(name, args, 1)?;
            return Ok(Item::Branch(spec, args[0].clone()));
        }
        Immediates::PushInt => {
            expect_args(name, args, 1)?;
            write_varuint(&mut out, parse_int_arg(&args[0])?);
        }
        Immediates::PushBytes => {
            let (bytes, used) = parse_byte_arg(args)?;
            if used != args.len() {
                return Err("pushbytes expects one constant".to_string());
            }
            write_varuint(&mut out, bytes.len() as u64);
            out.extend_from_slice(&bytes);
        }
        Immediates::IntBlock => {
            let values = args
                .iter()
                .map(|a| parse_int_arg(a))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            write_varuint(&mut out, values.len() as u64);
            for v in &values {
                write_varuint(&mut out, *v);
            }
            *user_ints = Some(values);
        }
        Immediates::ByteBlock => {
            let mut values = Vec::new();
            let mut rest = args;
            while !rest.is_empty() {
                let (bytes, used) = parse_byte_arg(rest)?;
                values.push(bytes);
                rest = &rest[used..];
            }
            write_varuint(&mut out, values.len() as u64);
            for v in &values {
                write_varuint(&mut out, v.len() as u64);
                out.extend_from_slice(v);
            }
            *user_bytes = Some(values);
        }
        Immediates::Field(group) => {
            expect_args(name, args, 1)?;
            // itxn_field sets whole array fields one element at a time
            let indexed = if spec.opcode == 0xb2 { None } else { Some(false) };
            out.push(field_index(group, &args[0], version, indexed)?);
        }
        Immediates::FieldIndex(group) => {
            expect_args(name, args, 2)?;
            out.push(field_index(group, &args[0], version, Some(true))?);
            out.push(parse_u8(&args[1])?);
        }
        Immediates::GroupField(group) => {
            expect_args(name, args, 2)?;
            out.push(parse_u8(&args[0])?);
            out.push(field_index(group, &args[1], version, Some(false))?);
        }
        Immediates::GroupFieldIndex(group) => {
            expect_args(name, args, 3)?;
            out.push(parse_u8(&args[0])?);
            out.push(field_index(group, &args[1], version, Some(true))?);
            out.push(parse_u8(&args[2])?);
        }
    }
    Ok(Item::Raw(out))
}

fn expect_args(name: &str, args: &[String], n: usize) -> std::result::Result<(), String> {
    if args.len() != n {
        return Err(format!("{} expects {} immediate arguments", name, n));
    }
    Ok(())
}

fn field_index(
    group: FieldGroup,
    name: &str,
    version: u64,
    indexed: Option<bool>,
) -> std::result::Result<u8, String> {
    let spec = group
        .by_name(name)
        .ok_or_else(|| format!("unknown field: {:?}", name))?;
    if spec.version > version {
        return Err(format!("field {} available in version {}", name, spec.version));
    }
    if group == FieldGroup::Txn && indexed.map_or(false, |i| i != spec.array) {
        return Err(if spec.array {
            format!("field {} needs an index", name)
        } else {
            format!("field {} is not an array", name)
        });
    }
    Ok(spec.index)
}

fn parse_u8(s: &str) -> std::result::Result<u8, String> {
    parse_uint(s)
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| format!("unable to parse {:?} as a byte immediate", s))
}

/// Decimal, `0x` hex or leading-zero octal
fn parse_uint(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if s.len() > 1 && s.starts_with('0') {
        u64::from_str_radix(&s[1..], 8).ok()
    } else {
        s.parse().ok()
    }
}

fn parse_int_arg(s: &str) -> std::result::Result<u64, String> {
    parse_uint(s)
        .or_else(|| named_int(s))
        .ok_or_else(|| format!("unable to parse {:?} as integer", s))
}

/// Parse one byte constant starting at `args[0]`; returns bytes and tokens consumed
fn parse_byte_arg(args: &[String]) -> std::result::Result<(Vec<u8>, usize), String> {
    let first = args.first().ok_or("expected a byte constant")?;
    let b64 = |s: &str| {
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| format!("bad base64: {}", e))
    };
    let b32 = |s: &str| base32_decode(s).ok_or_else(|| "bad base32".to_string());

    if let Some(hex) = first.strip_prefix("0x") {
        return Ok((hex::decode(hex).map_err(|e| format!("bad hex: {}", e))?, 1));
    }
    if first.starts_with('"') {
        return Ok((parse_string_literal(first)?, 1));
    }
    for (prefix, base64_form) in [("base64", true), ("b64", true), ("base32", false), ("b32", false)] {
        if let Some(inner) = first
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('('))
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let bytes = if base64_form { b64(inner)? } else { b32(inner)? };
            return Ok((bytes, 1));
        }
        if first == prefix {
            let value = args.get(1).ok_or_else(|| format!("{} needs a value", prefix))?;
            let bytes = if base64_form { b64(value)? } else { b32(value)? };
            return Ok((bytes, 2));
        }
    }
    Err(format!("byte arg did not parse: {}", first))
}

fn parse_string_literal(token: &str) -> std::result::Result<Vec<u8>, String> {
    let inner = token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .ok_or("unterminated string")?;
    let mut out = Vec::with_capacity(inner.len());
    let bytes = inner.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c != b'\\' {
            out.push(c);
            i += 1;
            continue;
        }
        let esc = *bytes.get(i + 1).ok_or("escape at end of string")?;
        match esc {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'0' => out.push(0),
            b'\\' => out.push(b'\\'),
            b'"' => out.push(b'"'),
            b'x' => {
                let hex = inner.get(i + 2..i + 4).ok_or("short \\x escape")?;
                out.push(u8::from_str_radix(hex, 16).map_err(|_| "bad \\x escape")?);
                i += 2;
            }
            other => return Err(format!("invalid escape \\{}", other as char)),
        }
        i += 2;
    }
    Ok(out)
}

/// Split a line into tokens; quoted strings stay whole and `//` starts a comment
fn tokenize(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                current.push(c);
                let mut closed = false;
                while let Some(n) = chars.next() {
                    current.push(n);
                    if n == '\\' {
                        if let Some(e) = chars.next() {
                            current.push(e);
                        }
                    } else if n == '"' {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err("unterminated string".to_string());
                }
            }
            '/' if chars.peek() == Some(&'/') => break,
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_int_uses_pushint() {
        let p = assemble("#pragma version 7\nint 1").unwrap();
        assert_eq!(p.bytecode, vec![0x07, 0x81, 0x01]);
        assert_eq!(p.offset_to_line.get(&1), Some(&1));
    }

    #[test]
    fn test_repeated_ints_go_in_block() {
        let p = assemble("#pragma version 6\nint 5\nint 5\n+\nint 9\n==").unwrap();
        assert_eq!(
            p.bytecode,
            vec![0x06, 0x20, 0x01, 0x05, 0x22, 0x22, 0x08, 0x81, 0x09, 0x12]
        );
    }

    #[test]
    fn test_old_version_blocks_everything() {
        let p = assemble("#pragma version 2\nint 1\nbyte \"a\"\npop").unwrap();
        assert_eq!(
            p.bytecode,
            vec![0x02, 0x20, 0x01, 0x01, 0x26, 0x01, 0x01, b'a', 0x22, 0x28, 0x48]
        );
    }

    #[test]
    fn test_byte_formats() {
        for src in [
            "byte 0x6869",
            "byte \"hi\"",
            "byte base64 aGk=",
            "byte b64(aGk=)",
            "byte base32 NBUQ",
        ] {
            let p = assemble(&format!("#pragma version 8\n{}", src)).unwrap();
            assert_eq!(p.bytecode, vec![0x08, 0x80, 0x02, b'h', b'i'], "{}", src);
        }
    }

    #[test]
    fn test_string_escapes() {
        let p = assemble("#pragma version 8\nbyte \"a\\n\\x41 // not a comment\"").unwrap();
        assert_eq!(&p.bytecode[3..6], b"a\nA");
    }

    #[test]
    fn test_branches_and_labels() {
        let src = "#pragma version 8\nint 1\nbnz done\nerr\ndone:\nint 1\nreturn";
        let p = assemble(src).unwrap();
        // 08 | 22 (intc_0) | 40 00 01 | 00 | 22 | 43 ; int 1 repeats so it lands in a block
        assert_eq!(
            p.bytecode,
            vec![0x08, 0x20, 0x01, 0x01, 0x22, 0x40, 0x00, 0x01, 0x00, 0x22, 0x43]
        );
    }

    #[test]
    fn test_back_jump_needs_v4() {
        let src = "#pragma version 3\nloop:\nint 1\nbnz loop";
        assert!(assemble(src).is_err());
        let src = "#pragma version 4\nloop:\nint 1\nbnz loop\nint 1";
        let p = assemble(src).unwrap();
        // branch at pc 5 jumps back to pc 4: offset -4
        assert_eq!(&p.bytecode[5..8], &[0x40, 0xff, 0xfc]);
    }

    #[test]
    fn test_txn_fields() {
        let p = assemble("#pragma version 8\ntxn Sender\ntxn ApplicationArgs 0\ngtxn 1 Amount\npop\npop\npop\nint 1").unwrap();
        assert_eq!(
            &p.bytecode[1..11],
            &[0x31, 0x00, 0x36, 0x1a, 0x00, 0x33, 0x01, 0x08, 0x48, 0x48]
        );
    }

    #[test]
    fn test_named_constants_and_method() {
        let p = assemble("#pragma version 8\nint appl\nint OptIn\nmethod \"add(uint64)uint64\"").unwrap();
        assert_eq!(&p.bytecode[1..5], &[0x81, 0x06, 0x81, 0x01]);
        assert_eq!(p.bytecode[5], 0x80);
        assert_eq!(p.bytecode[6], 4);
    }

    #[test]
    fn test_errors_carry_line() {
        match assemble("#pragma version 8\nint 1\nfrobnicate") {
            Err(Error::Assemble { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected {:?}", other),
        }
        assert!(assemble("#pragma version 2\nlog").is_err());
        assert!(assemble("#pragma version 8\nb nowhere").is_err());
    }

    #[test]
    fn test_addr_pseudo_op() {
        let p = assemble(
            "#pragma version 8\naddr XRBWO7FUJ7NOB6TOLBNEMLPHGEN7PWOSNNTUIG274DOAFWZ4533OR677SM",
        )
        .unwrap();
        assert_eq!(p.bytecode.len(), 1 + 2 + 32);
        assert_eq!(p.bytecode[3], 0xbc);
    }

    proptest::proptest! {
        #[test]
        fn prop_assemble_never_panics(source in "[ -~\n]{0,80}") {
            let _ = assemble(&source);
        }

        #[test]
        fn prop_single_int_is_pushint(n in proptest::prelude::any::<u64>()) {
            let p = assemble(&format!("#pragma version 8\nint {}", n)).unwrap();
            proptest::prop_assert_eq!(p.bytecode[1], 0x81);
            proptest::prop_assert!(p.bytecode.len() >= 3 && p.bytecode.len() <= 12);
        }
    }
}
