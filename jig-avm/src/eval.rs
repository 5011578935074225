//! Stack machine
//!
//! One interpreter serves both run modes. Signature mode sees only the
//! transaction group and the logic signature arguments. Application mode
//! additionally reaches ledger state through a [`LogicLedger`] and may issue
//! inner transactions.
//!
//! A program passes when it ends with exactly one uint64 on the stack and
//! that value is non-zero. `return` ends the program with the top of the
//! stack as the sole value.

use crate::assembler::MAX_VERSION;
use crate::error::{Error, Result};
use crate::fields::{FieldGroup, FieldSpec};
use crate::ledger::LogicLedger;
use crate::opcodes::{self, read_varuint, Immediates, Mode, OpSpec};
use crate::value::{StackValue, MAX_BYTES_LEN};
use jig_protocol::crypto::{self, prefix};
use jig_protocol::transaction::AssetParams;
use jig_protocol::{
    Address, ApplyData, ConsensusParams, Digest, KvKey, OnCompletion, SignedTxnWithAd, TealValue,
    Transaction, TxType,
};
use serde_bytes::ByteBuf;
use sha2::{Digest as _, Sha256};

/// Maximum stack depth
pub const MAX_STACK_DEPTH: usize = 1000;

/// Scratch space slots
pub const SCRATCH_SLOTS: usize = 256;

/// Maximum nested `callsub` depth
pub const MAX_CALLSTACK_DEPTH: usize = 1000;

/// Bytes per program page exposed by `ApprovalProgramPages`
const PROGRAM_PAGE_SIZE: usize = 4096;

/// Transaction group as seen by a program
#[derive(Debug, Clone, Copy)]
pub struct GroupView<'a> {
    /// Members of the group
    pub txns: &'a [Transaction],
    /// Apply data of members already applied (those before the running one)
    pub apply: &'a [ApplyData],
}

impl<'a> GroupView<'a> {
    /// Group without any applied members, as seen during verification
    pub fn unapplied(txns: &'a [Transaction]) -> Self {
        Self { txns, apply: &[] }
    }
}

/// Result of an application run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppOutcome {
    /// Program approved
    pub pass: bool,
    /// Emitted logs
    pub logs: Vec<Vec<u8>>,
    /// Inner transactions applied during the run
    pub inner_txns: Vec<SignedTxnWithAd>,
}

/// Run a logic signature program.
///
/// `budget` is the pooled remaining signature budget of the group and is
/// decremented by the cost of this run.
pub fn eval_signature(
    program: &[u8],
    args: &[ByteBuf],
    group: &GroupView<'_>,
    index: usize,
    budget: &mut u64,
    proto: &ConsensusParams,
) -> Result<bool> {
    let mut machine = Machine::new(program, group, index, proto, *budget)?;
    if machine.version > proto.logic_sig_version {
        return Err(Error::eval(0, format!("program version {} not supported", machine.version)));
    }
    machine.args = args;
    let result = machine.run();
    *budget = machine.budget;
    result
}

/// Run an application program.
///
/// The pooled budget is taken from and returned to `ledger`.
pub fn eval_application(
    program: &[u8],
    group: &GroupView<'_>,
    index: usize,
    app_id: u64,
    caller_app: u64,
    ledger: &mut dyn LogicLedger,
    proto: &ConsensusParams,
) -> Result<AppOutcome> {
    let budget = ledger.budget();
    let mut machine = Machine::new(program, group, index, proto, budget)?;
    if machine.version < 2 {
        return Err(Error::eval(0, "program version must be >= 2 for stateful programs"));
    }
    machine.app_id = app_id;
    machine.caller_app = caller_app;
    machine.ledger = Some(ledger);

    let result = machine.run();
    let remaining = machine.budget;
    if let Some(ledger) = machine.ledger.as_deref_mut() {
        ledger.set_budget(remaining);
    }
    tracing::trace!(app_id, cost = budget.saturating_sub(remaining), "application run");

    Ok(AppOutcome {
        pass: result?,
        logs: machine.logs,
        inner_txns: machine.inner_txns,
    })
}

/// Effects of an applied transaction visible to programs
#[derive(Debug, Clone, Copy)]
struct Effects<'x> {
    created_asset: u64,
    created_app: u64,
    logs: &'x [ByteBuf],
}

struct Machine<'a, 'l> {
    program: &'a [u8],
    version: u64,
    pc: usize,
    done: bool,
    op_name: &'static str,
    stack: Vec<StackValue>,
    scratch: Vec<StackValue>,
    intc: Vec<u64>,
    bytec: Vec<Vec<u8>>,
    callstack: Vec<usize>,
    budget: u64,
    cost: u64,

    group: &'a GroupView<'a>,
    index: usize,
    proto: &'a ConsensusParams,
    args: &'a [ByteBuf],

    app_id: u64,
    caller_app: u64,
    ledger: Option<&'l mut dyn LogicLedger>,
    logs: Vec<Vec<u8>>,
    log_bytes: usize,
    pending: Option<Vec<Transaction>>,
    last_inner: Vec<SignedTxnWithAd>,
    inner_txns: Vec<SignedTxnWithAd>,
}

impl std::fmt::Debug for Machine<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("version", &self.version)
            .field("pc", &self.pc)
            .field("stack", &self.stack)
            .field("app_id", &self.app_id)
            .finish()
    }
}

impl<'a, 'l> Machine<'a, 'l> {
    fn new(
        program: &'a [u8],
        group: &'a GroupView<'a>,
        index: usize,
        proto: &'a ConsensusParams,
        budget: u64,
    ) -> Result<Self> {
        let (version, len) =
            read_varuint(program, 0).ok_or_else(|| Error::eval(0, "invalid program (empty)"))?;
        if version == 0 || version > MAX_VERSION {
            return Err(Error::eval(0, format!("program version {} not supported", version)));
        }
        if index >= group.txns.len() {
            return Err(Error::eval(0, format!("txn index {} outside group", index)));
        }
        Ok(Self {
            program,
            version,
            pc: len,
            done: false,
            op_name: "",
            stack: Vec::new(),
            scratch: vec![StackValue::default(); SCRATCH_SLOTS],
            intc: Vec::new(),
            bytec: Vec::new(),
            callstack: Vec::new(),
            budget,
            cost: 0,
            group,
            index,
            proto,
            args: &[],
            app_id: 0,
            caller_app: 0,
            ledger: None,
            logs: Vec::new(),
            log_bytes: 0,
            pending: None,
            last_inner: Vec::new(),
            inner_txns: Vec::new(),
        })
    }

    fn run(&mut self) -> Result<bool> {
        while !self.done && self.pc < self.program.len() {
            let pc = self.pc;
            self.step().map_err(|e| match e {
                Error::Ledger(message) => Error::eval(pc, message),
                other => other,
            })?;
        }
        if self.stack.len() != 1 {
            return Err(Error::eval(
                self.pc,
                format!("stack len is {} instead of 1", self.stack.len()),
            ));
        }
        match self.stack[0] {
            StackValue::Uint(v) => Ok(v != 0),
            StackValue::Bytes(_) => Err(Error::eval(self.pc, "stack finished with bytes not int")),
        }
    }

    fn fail<T>(&self, message: impl Into<String>) -> Result<T> {
        Err(Error::eval(self.pc, message))
    }

    fn step(&mut self) -> Result<()> {
        let opcode = self.program[self.pc];
        let spec = match opcodes::by_opcode(opcode) {
            Some(spec) if spec.version <= self.version => spec,
            _ => return self.fail(format!("illegal opcode 0x{:02x}", opcode)),
        };
        self.op_name = spec.name;
        if spec.mode == Mode::Application && self.ledger.is_none() {
            return self.fail(format!("{} not allowed in current mode", spec.name));
        }

        self.cost += spec.cost;
        if spec.cost > self.budget {
            return self.fail(format!(
                "dynamic cost budget exceeded, executing {}: local program cost was {}",
                spec.name, self.cost
            ));
        }
        self.budget -= spec.cost;

        let size = self.op_size(spec)?;
        let next = self.execute(spec, size)?;
        self.pc = next;
        Ok(())
    }

    /// Length of the instruction at pc, immediates included
    fn op_size(&self, spec: &OpSpec) -> Result<usize> {
        let pc = self.pc;
        let size = match spec.immediates {
            Immediates::None => 1,
            Immediates::U8 | Immediates::Field(_) => 2,
            Immediates::U8x2 | Immediates::Label | Immediates::FieldIndex(_) | Immediates::GroupField(_) => 3,
            Immediates::GroupFieldIndex(_) => 4,
            Immediates::PushInt => 1 + self.varuint_at(pc + 1)?.1,
            Immediates::PushBytes => {
                let (n, len) = self.varuint_at(pc + 1)?;
                self.bytes_end(pc + 1 + len, n)? - pc
            }
            Immediates::IntBlock => {
                let (count, mut pos) = self.varuint_at(pc + 1)?;
                pos += pc + 1;
                for _ in 0..count {
                    pos += self.varuint_at(pos)?.1;
                }
                pos - pc
            }
            Immediates::ByteBlock => {
                let (count, mut pos) = self.varuint_at(pc + 1)?;
                pos += pc + 1;
                for _ in 0..count {
                    let (n, len) = self.varuint_at(pos)?;
                    pos = self.bytes_end(pos + len, n)?;
                }
                pos - pc
            }
        };
        if pc + size > self.program.len() {
            return self.fail(format!("{} program ends short of immediate values", spec.name));
        }
        Ok(size)
    }

    /// End of an `n` byte immediate starting at `start`, inside the program
    fn bytes_end(&self, start: usize, n: u64) -> Result<usize> {
        match usize::try_from(n)
            .ok()
            .and_then(|n| start.checked_add(n))
            .filter(|end| *end <= self.program.len())
        {
            Some(end) => Ok(end),
            None => self.fail(format!("{} immediate of {} bytes runs past program end", self.op_name, n)),
        }
    }

    fn varuint_at(&self, pos: usize) -> Result<(u64, usize)> {
        match read_varuint(self.program, pos) {
            Some(v) => Ok(v),
            None => self.fail(format!("{} bad varuint immediate", self.op_name)),
        }
    }

    fn imm(&self, offset: usize) -> u8 {
        self.program[self.pc + offset]
    }

    // Stack helpers

    fn push(&mut self, value: impl Into<StackValue>) -> Result<()> {
        let value = value.into();
        if let StackValue::Bytes(b) = &value {
            if b.len() > MAX_BYTES_LEN {
                return self.fail(format!(
                    "{} produced a too big ([]byte) len {}",
                    self.op_name,
                    b.len()
                ));
            }
        }
        if self.stack.len() >= MAX_STACK_DEPTH {
            return self.fail("stack overflow");
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<StackValue> {
        match self.stack.pop() {
            Some(v) => Ok(v),
            None => self.fail(format!("stack underflow in {}", self.op_name)),
        }
    }

    fn pop_uint(&mut self) -> Result<u64> {
        match self.pop()? {
            StackValue::Uint(v) => Ok(v),
            StackValue::Bytes(_) => self.fail(format!("{} arg is []byte, expected uint64", self.op_name)),
        }
    }

    fn pop_bytes(&mut self) -> Result<Vec<u8>> {
        match self.pop()? {
            StackValue::Bytes(b) => Ok(b),
            StackValue::Uint(_) => self.fail(format!("{} arg is uint64, expected []byte", self.op_name)),
        }
    }

    fn pop_uint_pair(&mut self) -> Result<(u64, u64)> {
        let b = self.pop_uint()?;
        let a = self.pop_uint()?;
        Ok((a, b))
    }

    fn ledger(&mut self) -> Result<&mut (dyn LogicLedger + 'l)> {
        match self.ledger.as_deref_mut() {
            Some(ledger) => Ok(ledger),
            None => Err(Error::eval(self.pc, "ledger not available in current mode")),
        }
    }

    fn branch_target(&self, size: usize) -> Result<usize> {
        let offset = i16::from_be_bytes([self.imm(1), self.imm(2)]);
        if offset < 0 && self.version < 4 {
            return self.fail("branch target is a back jump, needs version 4");
        }
        let target = (self.pc + size) as i64 + i64::from(offset);
        if target < 0 || target as usize > self.program.len() {
            return self.fail(format!("branch target {} outside of program", target));
        }
        Ok(target as usize)
    }

    fn execute(&mut self, spec: &'static OpSpec, size: usize) -> Result<usize> {
        let next = self.pc + size;
        match spec.opcode {
            0x00 => return self.fail("err opcode executed"),
            0x01 => {
                let data = self.pop_bytes()?;
                self.push(Sha256::digest(&data).to_vec())?;
            }
            0x03 => {
                let data = self.pop_bytes()?;
                self.push(crypto::sha512_256(&data).0.to_vec())?;
            }
            0x04 => {
                let key = self.pop_bytes()?;
                let sig = self.pop_bytes()?;
                let data = self.pop_bytes()?;
                let key = match Address::from_slice(&key) {
                    Some(k) => k,
                    None => return self.fail("ed25519verify key must be 32 bytes"),
                };
                let sig = match jig_protocol::Signature::from_slice(&sig) {
                    Some(s) => s,
                    None => return self.fail("ed25519verify signature must be 64 bytes"),
                };
                let mut msg = crypto::program_address(self.program).0.to_vec();
                msg.extend_from_slice(&data);
                self.push(crypto::verify_with_prefix(&key, prefix::PROGRAM_DATA, &msg, &sig))?;
            }
            0x08..=0x1c => self.arithmetic(spec.opcode)?,
            0x1d => {
                let (a, b) = self.pop_uint_pair()?;
                let product = u128::from(a) * u128::from(b);
                self.push((product >> 64) as u64)?;
                self.push(product as u64)?;
            }
            0x1e => {
                let (a, b) = self.pop_uint_pair()?;
                let (sum, carry) = a.overflowing_add(b);
                self.push(u64::from(carry))?;
                self.push(sum)?;
            }
            0x20 => {
                let (count, mut pos) = self.varuint_at(self.pc + 1)?;
                pos += self.pc + 1;
                let mut values = Vec::new();
                for _ in 0..count {
                    let (v, len) = self.varuint_at(pos)?;
                    values.push(v);
                    pos += len;
                }
                self.intc = values;
            }
            0x21..=0x25 => {
                let i = if spec.opcode == 0x21 { self.imm(1) as usize } else { (spec.opcode - 0x22) as usize };
                match self.intc.get(i) {
                    Some(&v) => self.push(v)?,
                    None => return self.fail(format!("intc {} beyond {} constants", i, self.intc.len())),
                }
            }
            0x26 => {
                let (count, mut pos) = self.varuint_at(self.pc + 1)?;
                pos += self.pc + 1;
                let mut values = Vec::new();
                for _ in 0..count {
                    let (n, len) = self.varuint_at(pos)?;
                    pos += len;
                    let end = self.bytes_end(pos, n)?;
                    values.push(self.program[pos..end].to_vec());
                    pos = end;
                }
                self.bytec = values;
            }
            0x27..=0x2b => {
                let i = if spec.opcode == 0x27 { self.imm(1) as usize } else { (spec.opcode - 0x28) as usize };
                match self.bytec.get(i) {
                    Some(v) => {
                        let v = v.clone();
                        self.push(v)?
                    }
                    None => return self.fail(format!("bytec {} beyond {} constants", i, self.bytec.len())),
                }
            }
            0x2c..=0x30 => {
                if self.ledger.is_some() {
                    return self.fail(format!("{} not allowed in current mode", spec.name));
                }
                let i = if spec.opcode == 0x2c { self.imm(1) as usize } else { (spec.opcode - 0x2d) as usize };
                match self.args.get(i) {
                    Some(arg) => {
                        let arg = arg.to_vec();
                        self.push(arg)?
                    }
                    None => return self.fail(format!("cannot load arg[{}] of {}", i, self.args.len())),
                }
            }
            0x31 => {
                let v = self.txn_field(TxnSource::Group(self.index), self.imm(1), None)?;
                self.push(v)?;
            }
            0x32 => {
                let v = self.global_field(self.imm(1))?;
                self.push(v)?;
            }
            0x33 => {
                let v = self.txn_field(TxnSource::Group(self.imm(1) as usize), self.imm(2), None)?;
                self.push(v)?;
            }
            0x34 => {
                let v = self.scratch[self.imm(1) as usize].clone();
                self.push(v)?;
            }
            0x35 => {
                let v = self.pop()?;
                let i = self.imm(1) as usize;
                self.scratch[i] = v;
            }
            0x36 => {
                let v = self.txn_field(TxnSource::Group(self.index), self.imm(1), Some(self.imm(2)))?;
                self.push(v)?;
            }
            0x37 => {
                let v = self.txn_field(TxnSource::Group(self.imm(1) as usize), self.imm(2), Some(self.imm(3)))?;
                self.push(v)?;
            }
            0x38 => {
                let gi = self.pop_uint()?;
                let v = self.txn_field(TxnSource::Group(gi as usize), self.imm(1), None)?;
                self.push(v)?;
            }
            0x39 => {
                let gi = self.pop_uint()?;
                let v = self.txn_field(TxnSource::Group(gi as usize), self.imm(1), Some(self.imm(2)))?;
                self.push(v)?;
            }
            0x40 | 0x41 => {
                let target = self.branch_target(size)?;
                let cond = self.pop_uint()?;
                if (cond != 0) == (spec.opcode == 0x40) {
                    return Ok(target);
                }
            }
            0x42 => return self.branch_target(size),
            0x43 => {
                let top = self.pop()?;
                self.stack.clear();
                self.stack.push(top);
                self.done = true;
            }
            0x44 => {
                if self.pop_uint()? == 0 {
                    return self.fail("assert failed");
                }
            }
            0x48 => {
                self.pop()?;
            }
            0x49 => {
                let top = self.pop()?;
                self.push(top.clone())?;
                self.push(top)?;
            }
            0x4a => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(a.clone())?;
                self.push(b.clone())?;
                self.push(a)?;
                self.push(b)?;
            }
            0x4b => {
                let n = self.imm(1) as usize;
                if n >= self.stack.len() {
                    return self.fail(format!("dig {} with stack size = {}", n, self.stack.len()));
                }
                let v = self.stack[self.stack.len() - 1 - n].clone();
                self.push(v)?;
            }
            0x4c => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b)?;
                self.push(a)?;
            }
            0x4d => {
                let c = self.pop_uint()?;
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(if c != 0 { b } else { a })?;
            }
            0x4e => {
                let n = self.imm(1) as usize;
                if n >= self.stack.len() {
                    return self.fail(format!("cover {} with stack size = {}", n, self.stack.len()));
                }
                let top = self.pop()?;
                let at = self.stack.len() - n;
                self.stack.insert(at, top);
            }
            0x4f => {
                let n = self.imm(1) as usize;
                if n >= self.stack.len() {
                    return self.fail(format!("uncover {} with stack size = {}", n, self.stack.len()));
                }
                let at = self.stack.len() - 1 - n;
                let v = self.stack.remove(at);
                self.stack.push(v);
            }
            0x50 => {
                let b = self.pop_bytes()?;
                let mut a = self.pop_bytes()?;
                a.extend_from_slice(&b);
                self.push(a)?;
            }
            0x51 => {
                let (start, end) = (self.imm(1) as u64, self.imm(2) as u64);
                let bytes = self.pop_bytes()?;
                let out = self.substring(&bytes, start, end)?;
                self.push(out)?;
            }
            0x52 => {
                let end = self.pop_uint()?;
                let start = self.pop_uint()?;
                let bytes = self.pop_bytes()?;
                let out = self.substring(&bytes, start, end)?;
                self.push(out)?;
            }
            0x53 => {
                let idx = self.pop_uint()?;
                let target = self.pop()?;
                let bit = self.get_bit(&target, idx)?;
                self.push(bit)?;
            }
            0x54 => {
                let bit = self.pop_uint()?;
                let idx = self.pop_uint()?;
                let target = self.pop()?;
                let out = self.set_bit(target, idx, bit)?;
                self.push(out)?;
            }
            0x55 => {
                let idx = self.pop_uint()?;
                let bytes = self.pop_bytes()?;
                match bytes.get(idx as usize) {
                    Some(&b) => self.push(u64::from(b))?,
                    None => return self.fail(format!("getbyte index {} beyond length {}", idx, bytes.len())),
                }
            }
            0x56 => {
                let val = self.pop_uint()?;
                let idx = self.pop_uint()?;
                let mut bytes = self.pop_bytes()?;
                if val > 255 {
                    return self.fail("setbyte value > 255");
                }
                match bytes.get_mut(idx as usize) {
                    Some(b) => *b = val as u8,
                    None => return self.fail(format!("setbyte index {} beyond length", idx)),
                }
                self.push(bytes)?;
            }
            0x57 => {
                let start = self.imm(1) as u64;
                let len = self.imm(2) as u64;
                let bytes = self.pop_bytes()?;
                let len = if len == 0 { (bytes.len() as u64).saturating_sub(start) } else { len };
                let out = self.extract(&bytes, start, len)?;
                self.push(out)?;
            }
            0x58 => {
                let len = self.pop_uint()?;
                let start = self.pop_uint()?;
                let bytes = self.pop_bytes()?;
                let out = self.extract(&bytes, start, len)?;
                self.push(out)?;
            }
            0x59..=0x5b => {
                let width = match spec.opcode {
                    0x59 => 2,
                    0x5a => 4,
                    _ => 8,
                };
                let start = self.pop_uint()?;
                let bytes = self.pop_bytes()?;
                let slice = self.extract(&bytes, start, width)?;
                let v = slice.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
                self.push(v)?;
            }
            0x60 => {
                let target = self.pop()?;
                let addr = self.resolve_account(&target)?;
                let balance = self.ledger()?.account(&addr)?.micro_algos;
                self.push(balance)?;
            }
            0x61 => {
                let app = self.pop_uint()?;
                let target = self.pop()?;
                let app = self.resolve_app(app)?;
                let addr = self.resolve_account(&target)?;
                let opted = self.ledger()?.account(&addr)?.app_local_states.contains_key(&app);
                self.push(opted)?;
            }
            0x62 | 0x63 => {
                let key = self.pop_bytes()?;
                let app = if spec.opcode == 0x63 {
                    let app = self.pop_uint()?;
                    self.resolve_app(app)?
                } else {
                    self.app_id
                };
                let target = self.pop()?;
                let addr = self.resolve_account(&target)?;
                let value = self
                    .ledger()?
                    .account(&addr)?
                    .app_local_states
                    .get(&app)
                    .and_then(|ls| ls.key_value.get(&KvKey::from(&key[..])).cloned());
                self.push_state_value(value, spec.opcode == 0x63)?;
            }
            0x64 | 0x65 => {
                let key = self.pop_bytes()?;
                let app = if spec.opcode == 0x65 {
                    let app = self.pop_uint()?;
                    self.resolve_app(app)?
                } else {
                    self.app_id
                };
                let value = self
                    .ledger()?
                    .app_params(app)?
                    .and_then(|(params, _)| params.global_state.get(&KvKey::from(&key[..])).cloned());
                self.push_state_value(value, spec.opcode == 0x65)?;
            }
            0x66 => {
                let value = self.pop()?;
                let key = self.pop_bytes()?;
                let target = self.pop()?;
                let addr = self.resolve_account(&target)?;
                self.check_state_write(&key, &value)?;
                self.require_opted_in(&addr)?;
                let app = self.app_id;
                self.ledger()?.set_local(&addr, app, &key, value.to_teal_value())?;
            }
            0x67 => {
                let value = self.pop()?;
                let key = self.pop_bytes()?;
                self.check_state_write(&key, &value)?;
                let app = self.app_id;
                self.ledger()?.set_global(app, &key, value.to_teal_value())?;
            }
            0x68 => {
                let key = self.pop_bytes()?;
                let target = self.pop()?;
                let addr = self.resolve_account(&target)?;
                self.require_opted_in(&addr)?;
                let app = self.app_id;
                self.ledger()?.del_local(&addr, app, &key)?;
            }
            0x69 => {
                let key = self.pop_bytes()?;
                let app = self.app_id;
                self.ledger()?.del_global(app, &key)?;
            }
            0x70 => {
                let asset = self.pop_uint()?;
                let target = self.pop()?;
                let addr = self.resolve_account(&target)?;
                let asset = self.resolve_asset(asset)?;
                let holding = self.ledger()?.account(&addr)?.assets.get(&asset).cloned();
                let field = self.field_spec(FieldGroup::AssetHolding, self.imm(1))?;
                match holding {
                    Some(h) => {
                        let v = match field.index {
                            0 => StackValue::Uint(h.amount),
                            _ => StackValue::from(h.frozen),
                        };
                        self.push(v)?;
                        self.push(1u64)?;
                    }
                    None => self.push_missing()?,
                }
            }
            0x71 => {
                let asset = self.pop_uint()?;
                let asset = self.resolve_asset(asset)?;
                let field = self.field_spec(FieldGroup::AssetParams, self.imm(1))?;
                match self.ledger()?.asset_params(asset)? {
                    Some((params, creator)) => {
                        self.push(asset_param_value(&params, &creator, field.index))?;
                        self.push(1u64)?;
                    }
                    None => self.push_missing()?,
                }
            }
            0x72 => {
                let app = self.pop_uint()?;
                let app = self.resolve_app(app)?;
                let field = self.field_spec(FieldGroup::AppParams, self.imm(1))?;
                match self.ledger()?.app_params(app)? {
                    Some((params, creator)) => {
                        let v = match field.index {
                            0 => StackValue::from(params.approval_program.to_vec()),
                            1 => StackValue::from(params.clear_state_program.to_vec()),
                            2 => StackValue::Uint(params.global_state_schema.num_uint),
                            3 => StackValue::Uint(params.global_state_schema.num_byte_slice),
                            4 => StackValue::Uint(params.local_state_schema.num_uint),
                            5 => StackValue::Uint(params.local_state_schema.num_byte_slice),
                            6 => StackValue::Uint(u64::from(params.extra_program_pages)),
                            7 => StackValue::from(creator.0.to_vec()),
                            _ => StackValue::from(crypto::app_address(app).0.to_vec()),
                        };
                        self.push(v)?;
                        self.push(1u64)?;
                    }
                    None => self.push_missing()?,
                }
            }
            0x73 => {
                let target = self.pop()?;
                let addr = self.resolve_account(&target)?;
                let field = self.field_spec(FieldGroup::AcctParams, self.imm(1))?;
                let ledger = self.ledger()?;
                let data = ledger.account(&addr)?;
                let min_balance = ledger.min_balance(&addr)?;
                let v = match field.index {
                    0 => StackValue::Uint(data.micro_algos),
                    1 => StackValue::Uint(min_balance),
                    2 => StackValue::from(data.auth_addr.0.to_vec()),
                    3 => StackValue::Uint(data.total_app_schema.num_uint),
                    4 => StackValue::Uint(data.total_app_schema.num_byte_slice),
                    5 => StackValue::Uint(u64::from(data.total_extra_app_pages)),
                    6 => StackValue::Uint(data.app_params.len() as u64),
                    7 => StackValue::Uint(data.app_local_states.len() as u64),
                    8 => StackValue::Uint(data.asset_params.len() as u64),
                    9 => StackValue::Uint(data.assets.len() as u64),
                    10 => StackValue::Uint(data.total_boxes),
                    _ => StackValue::Uint(data.total_box_bytes),
                };
                self.push(v)?;
                self.push(data.micro_algos > 0)?;
            }
            0x78 => {
                let target = self.pop()?;
                let addr = self.resolve_account(&target)?;
                let min = self.ledger()?.min_balance(&addr)?;
                self.push(min)?;
            }
            0x80 => {
                let (n, len) = self.varuint_at(self.pc + 1)?;
                let start = self.pc + 1 + len;
                let end = self.bytes_end(start, n)?;
                let bytes = self.program[start..end].to_vec();
                self.push(bytes)?;
            }
            0x81 => {
                let (v, _) = self.varuint_at(self.pc + 1)?;
                self.push(v)?;
            }
            0x88 => {
                let target = self.branch_target(size)?;
                if self.callstack.len() >= MAX_CALLSTACK_DEPTH {
                    return self.fail("callsub stack overflow");
                }
                self.callstack.push(next);
                return Ok(target);
            }
            0x89 => {
                return match self.callstack.pop() {
                    Some(target) => Ok(target),
                    None => self.fail("retsub with empty callstack"),
                };
            }
            0xaf => {
                let n = self.pop_uint()?;
                if n as usize > MAX_BYTES_LEN {
                    return self.fail(format!("bzero attempted to create a too large string {}", n));
                }
                self.push(vec![0u8; n as usize])?;
            }
            0xb0 => {
                let msg = self.pop_bytes()?;
                if self.logs.len() >= self.proto.max_log_calls {
                    return self.fail(format!(
                        "too many log calls in program. up to {} is allowed.",
                        self.proto.max_log_calls
                    ));
                }
                self.log_bytes += msg.len();
                if self.log_bytes > self.proto.max_log_size {
                    return self.fail(format!(
                        "program logs too large. {} bytes > {} bytes limit",
                        self.log_bytes, self.proto.max_log_size
                    ));
                }
                self.logs.push(msg);
            }
            0xb1 | 0xb6 => {
                match (&self.pending, spec.opcode) {
                    (Some(_), 0xb1) => return self.fail("itxn_begin without itxn_submit"),
                    (None, 0xb6) => return self.fail("itxn_next without itxn_begin"),
                    _ => {}
                }
                let queued = self.pending.as_ref().map_or(0, Vec::len);
                if self.inner_txns.len() + queued >= self.proto.max_inner_transactions {
                    return self.fail("too many inner transactions");
                }
                let txn = self.default_inner()?;
                self.pending.get_or_insert_with(Vec::new).push(txn);
            }
            0xb2 => {
                let value = self.pop()?;
                let field = self.field_spec(FieldGroup::Txn, self.imm(1))?;
                let mut pending = match self.pending.take() {
                    Some(p) => p,
                    None => return self.fail("itxn_field without itxn_begin"),
                };
                let result = match pending.last_mut() {
                    Some(txn) => self.set_inner_field(txn, field, value),
                    None => self.fail("itxn_field without itxn_begin"),
                };
                self.pending = Some(pending);
                result?;
            }
            0xb3 => {
                let txns = match self.pending.take() {
                    Some(p) => p,
                    None => return self.fail("itxn_submit without itxn_begin"),
                };
                let app = self.app_id;
                let budget = self.budget;
                let ledger = self.ledger()?;
                ledger.set_budget(budget);
                let applied = ledger.submit_inner(app, txns)?;
                self.budget = ledger.budget();
                self.inner_txns.extend(applied.iter().cloned());
                self.last_inner = applied;
            }
            0xb4 => {
                let v = self.txn_field(TxnSource::LastInner, self.imm(1), None)?;
                self.push(v)?;
            }
            0xb5 => {
                let v = self.txn_field(TxnSource::LastInner, self.imm(1), Some(self.imm(2)))?;
                self.push(v)?;
            }
            0xb9..=0xbf => self.box_op(spec.opcode)?,
            _ => return self.fail(format!("illegal opcode 0x{:02x}", spec.opcode)),
        }
        Ok(if self.done { self.program.len() } else { next })
    }

    fn arithmetic(&mut self, opcode: u8) -> Result<()> {
        match opcode {
            0x12 | 0x13 => {
                let b = self.pop()?;
                let a = self.pop()?;
                if std::mem::discriminant(&a) != std::mem::discriminant(&b) {
                    return self.fail(format!(
                        "cannot compare ({} to {})",
                        a.type_name(),
                        b.type_name()
                    ));
                }
                return self.push((a == b) == (opcode == 0x12));
            }
            0x14 => {
                let a = self.pop_uint()?;
                return self.push(a == 0);
            }
            0x15 => {
                let a = self.pop_bytes()?;
                return self.push(a.len() as u64);
            }
            0x16 => {
                let a = self.pop_uint()?;
                return self.push(a.to_be_bytes().to_vec());
            }
            0x17 => {
                let a = self.pop_bytes()?;
                if a.len() > 8 {
                    return self.fail(format!("btoi arg too long, got [{}]bytes", a.len()));
                }
                let v = a.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
                return self.push(v);
            }
            0x1c => {
                let a = self.pop_uint()?;
                return self.push(!a);
            }
            _ => {}
        }

        let (a, b) = self.pop_uint_pair()?;
        let v = match opcode {
            0x08 => match a.checked_add(b) {
                Some(v) => v,
                None => return self.fail("+ overflowed"),
            },
            0x09 => match a.checked_sub(b) {
                Some(v) => v,
                None => return self.fail("- would result negative"),
            },
            0x0a => match a.checked_div(b) {
                Some(v) => v,
                None => return self.fail("/ 0"),
            },
            0x0b => match a.checked_mul(b) {
                Some(v) => v,
                None => return self.fail("* overflowed"),
            },
            0x0c => u64::from(a < b),
            0x0d => u64::from(a > b),
            0x0e => u64::from(a <= b),
            0x0f => u64::from(a >= b),
            0x10 => u64::from(a != 0 && b != 0),
            0x11 => u64::from(a != 0 || b != 0),
            0x18 => match a.checked_rem(b) {
                Some(v) => v,
                None => return self.fail("% 0"),
            },
            0x19 => a | b,
            0x1a => a & b,
            _ => a ^ b,
        };
        self.push(v)
    }

    fn substring(&self, bytes: &[u8], start: u64, end: u64) -> Result<Vec<u8>> {
        if end < start {
            return self.fail("substring end before start");
        }
        if end as usize > bytes.len() {
            return self.fail("substring range beyond length of string");
        }
        Ok(bytes[start as usize..end as usize].to_vec())
    }

    fn extract(&self, bytes: &[u8], start: u64, len: u64) -> Result<Vec<u8>> {
        let end = start.saturating_add(len);
        if start as usize > bytes.len() || end as usize > bytes.len() {
            return self.fail(format!(
                "extraction end {} is beyond length: {}",
                end,
                bytes.len()
            ));
        }
        Ok(bytes[start as usize..end as usize].to_vec())
    }

    fn get_bit(&self, target: &StackValue, idx: u64) -> Result<u64> {
        match target {
            StackValue::Uint(v) => {
                if idx >= 64 {
                    return self.fail(format!("getbit index {} beyond 64", idx));
                }
                Ok((v >> idx) & 1)
            }
            StackValue::Bytes(b) => {
                let byte = match b.get((idx / 8) as usize) {
                    Some(byte) => *byte,
                    None => return self.fail(format!("getbit index {} beyond byteslice", idx)),
                };
                Ok(u64::from((byte >> (7 - (idx % 8))) & 1))
            }
        }
    }

    fn set_bit(&self, target: StackValue, idx: u64, bit: u64) -> Result<StackValue> {
        if bit > 1 {
            return self.fail("setbit value > 1");
        }
        match target {
            StackValue::Uint(v) => {
                if idx >= 64 {
                    return self.fail(format!("setbit index {} beyond 64", idx));
                }
                let mask = 1u64 << idx;
                Ok(StackValue::Uint(if bit == 1 { v | mask } else { v & !mask }))
            }
            StackValue::Bytes(mut b) => {
                let mask = 1u8 << (7 - (idx % 8));
                match b.get_mut((idx / 8) as usize) {
                    Some(byte) => {
                        *byte = if bit == 1 { *byte | mask } else { *byte & !mask };
                    }
                    None => return self.fail(format!("setbit index {} beyond byteslice", idx)),
                }
                Ok(StackValue::Bytes(b))
            }
        }
    }

    fn field_spec(&self, group: FieldGroup, index: u8) -> Result<&'static FieldSpec> {
        match group.by_index(index) {
            Some(spec) if spec.version <= self.version => Ok(spec),
            _ => self.fail(format!("invalid {:?} field {}", group, index)),
        }
    }

    fn push_missing(&mut self) -> Result<()> {
        self.push(0u64)?;
        self.push(0u64)
    }

    fn push_state_value(&mut self, value: Option<TealValue>, with_flag: bool) -> Result<()> {
        let exists = value.is_some();
        let v = value.map(|v| StackValue::from_teal_value(&v)).unwrap_or_default();
        self.push(v)?;
        if with_flag {
            self.push(exists)?;
        }
        Ok(())
    }

    fn check_state_write(&self, key: &[u8], value: &StackValue) -> Result<()> {
        if key.len() > self.proto.max_app_key_len {
            return self.fail(format!("key too long: length was {}, maximum is {}", key.len(), self.proto.max_app_key_len));
        }
        if let StackValue::Bytes(b) = value {
            if key.len() + b.len() > self.proto.max_app_sum_key_value_lens {
                return self.fail(format!(
                    "key/value total too long for key {:?}",
                    String::from_utf8_lossy(key)
                ));
            }
        }
        Ok(())
    }

    fn require_opted_in(&mut self, addr: &Address) -> Result<()> {
        let app = self.app_id;
        if !self.ledger()?.account(addr)?.app_local_states.contains_key(&app) {
            return self.fail(format!("account {} is not opted in to app {}", addr, app));
        }
        Ok(())
    }

    // Reference resolution

    fn current_txn(&self) -> &'a Transaction {
        &self.group.txns[self.index]
    }

    fn group_created(&self) -> impl Iterator<Item = &'a ApplyData> + '_ {
        self.group.apply.iter().take(self.index)
    }

    fn resolve_account(&self, target: &StackValue) -> Result<Address> {
        let txn = self.current_txn();
        match target {
            StackValue::Uint(0) => Ok(txn.sender),
            StackValue::Uint(i) => match txn.accounts.get(*i as usize - 1) {
                Some(a) => Ok(*a),
                None => self.fail(format!("invalid Account reference {}", i)),
            },
            StackValue::Bytes(b) => {
                let addr = match (self.version >= 4, Address::from_slice(b)) {
                    (true, Some(addr)) => addr,
                    _ => return self.fail(format!("invalid Account reference {}", hex::encode(b))),
                };
                let available = addr == txn.sender
                    || txn.accounts.contains(&addr)
                    || addr == crypto::app_address(self.app_id)
                    || txn.foreign_apps.iter().any(|app| crypto::app_address(*app) == addr)
                    || self
                        .group_created()
                        .any(|ad| ad.application_id != 0 && crypto::app_address(ad.application_id) == addr);
                if available {
                    Ok(addr)
                } else {
                    self.fail(format!("invalid Account reference {}", addr))
                }
            }
        }
    }

    fn resolve_app(&self, reference: u64) -> Result<u64> {
        let txn = self.current_txn();
        if reference == 0 {
            return Ok(self.app_id);
        }
        if self.version < 4 || reference as usize <= txn.foreign_apps.len() {
            return match txn.foreign_apps.get(reference as usize - 1) {
                Some(app) => Ok(*app),
                None => self.fail(format!("invalid App reference {}", reference)),
            };
        }
        if reference == self.app_id
            || txn.foreign_apps.contains(&reference)
            || self.group_created().any(|ad| ad.application_id == reference)
        {
            return Ok(reference);
        }
        self.fail(format!("invalid App reference {}", reference))
    }

    fn resolve_asset(&self, reference: u64) -> Result<u64> {
        let txn = self.current_txn();
        if (reference as usize) < txn.foreign_assets.len() {
            return Ok(txn.foreign_assets[reference as usize]);
        }
        if self.version >= 4
            && (txn.foreign_assets.contains(&reference)
                || self.group_created().any(|ad| ad.config_asset == reference))
        {
            return Ok(reference);
        }
        self.fail(format!("invalid Asset reference {}", reference))
    }

    fn check_box_ref(&self, name: &[u8]) -> Result<()> {
        if name.is_empty() || name.len() > self.proto.max_app_key_len {
            return self.fail(format!("name of box must be 1-{} bytes", self.proto.max_app_key_len));
        }
        let available = self.group.txns.iter().enumerate().any(|(i, txn)| {
            txn.tx_type == TxType::ApplicationCall
                && txn.boxes.iter().any(|r| {
                    let app = match r.index {
                        0 if i == self.index => self.app_id,
                        0 if txn.application_id == 0 => {
                            self.group.apply.get(i).map_or(0, |ad| ad.application_id)
                        }
                        0 => txn.application_id,
                        n => txn.foreign_apps.get(n as usize - 1).copied().unwrap_or(0),
                    };
                    app == self.app_id && r.name.as_slice() == name
                })
        });
        if !available {
            return self.fail(format!("invalid Box reference {:?}", String::from_utf8_lossy(name)));
        }
        Ok(())
    }

    fn box_op(&mut self, opcode: u8) -> Result<()> {
        let app = self.app_id;
        match opcode {
            // box_create
            0xb9 => {
                let size = self.pop_uint()?;
                let name = self.pop_bytes()?;
                self.check_box_ref(&name)?;
                if size as usize > self.proto.max_box_size {
                    return self.fail(format!("box size too large: {}, max is {}", size, self.proto.max_box_size));
                }
                match self.ledger()?.get_box(app, &name)? {
                    Some(existing) if existing.len() as u64 != size => {
                        self.fail(format!("box size mismatch {} {}", existing.len(), size))
                    }
                    Some(_) => self.push(0u64),
                    None => {
                        self.ledger()?.put_box(app, &name, vec![0u8; size as usize])?;
                        self.push(1u64)
                    }
                }
            }
            // box_extract
            0xba => {
                let len = self.pop_uint()?;
                let start = self.pop_uint()?;
                let name = self.pop_bytes()?;
                self.check_box_ref(&name)?;
                let contents = self.existing_box(&name)?;
                let out = self.extract(&contents, start, len)?;
                self.push(out)
            }
            // box_replace
            0xbb => {
                let value = self.pop_bytes()?;
                let start = self.pop_uint()?;
                let name = self.pop_bytes()?;
                self.check_box_ref(&name)?;
                let mut contents = self.existing_box(&name)?;
                let end = start.saturating_add(value.len() as u64);
                if end as usize > contents.len() {
                    return self.fail(format!("replacement end {} beyond length: {}", end, contents.len()));
                }
                contents[start as usize..end as usize].copy_from_slice(&value);
                self.ledger()?.put_box(app, &name, contents)
            }
            // box_del
            0xbc => {
                let name = self.pop_bytes()?;
                self.check_box_ref(&name)?;
                let existed = self.ledger()?.del_box(app, &name)?;
                self.push(existed)
            }
            // box_len
            0xbd => {
                let name = self.pop_bytes()?;
                self.check_box_ref(&name)?;
                match self.ledger()?.get_box(app, &name)? {
                    Some(contents) => {
                        self.push(contents.len() as u64)?;
                        self.push(1u64)
                    }
                    None => self.push_missing(),
                }
            }
            // box_get
            0xbe => {
                let name = self.pop_bytes()?;
                self.check_box_ref(&name)?;
                match self.ledger()?.get_box(app, &name)? {
                    Some(contents) => {
                        self.push(contents)?;
                        self.push(1u64)
                    }
                    None => {
                        self.push(Vec::new())?;
                        self.push(0u64)
                    }
                }
            }
            // box_put
            _ => {
                let value = self.pop_bytes()?;
                let name = self.pop_bytes()?;
                self.check_box_ref(&name)?;
                if let Some(existing) = self.ledger()?.get_box(app, &name)? {
                    if existing.len() != value.len() {
                        return self.fail(format!(
                            "box_put wrong size {} != {}",
                            existing.len(),
                            value.len()
                        ));
                    }
                }
                self.ledger()?.put_box(app, &name, value)
            }
        }
    }

    fn existing_box(&mut self, name: &[u8]) -> Result<Vec<u8>> {
        let app = self.app_id;
        match self.ledger()?.get_box(app, name)? {
            Some(contents) => Ok(contents),
            None => self.fail(format!("no such box {:?}", String::from_utf8_lossy(name))),
        }
    }

    // Fields

    fn global_field(&mut self, index: u8) -> Result<StackValue> {
        let field = self.field_spec(FieldGroup::Global, index)?;
        let needs_app = matches!(field.index, 6..=10 | 13 | 14);
        if needs_app && self.ledger.is_none() {
            return self.fail(format!("global {} not allowed in current mode", field.name));
        }
        let v = match field.index {
            0 => StackValue::Uint(self.proto.min_txn_fee),
            1 => StackValue::Uint(self.proto.min_balance),
            2 => StackValue::Uint(self.proto.max_txn_life),
            3 => StackValue::from(Address::ZERO.0.to_vec()),
            4 => StackValue::Uint(self.group.txns.len() as u64),
            5 => StackValue::Uint(self.proto.logic_sig_version),
            6 => StackValue::Uint(self.ledger()?.round()),
            7 => StackValue::Uint(self.ledger()?.latest_timestamp().max(0) as u64),
            8 => StackValue::Uint(self.app_id),
            9 => {
                let app = self.app_id;
                match self.ledger()?.app_params(app)? {
                    Some((_, creator)) => StackValue::from(creator.0.to_vec()),
                    None => return self.fail(format!("app {} does not exist", app)),
                }
            }
            10 => StackValue::from(crypto::app_address(self.app_id).0.to_vec()),
            11 => StackValue::from(self.current_txn().group.0.to_vec()),
            12 => StackValue::Uint(self.budget),
            13 => StackValue::Uint(self.caller_app),
            _ => {
                let addr = if self.caller_app == 0 {
                    Address::ZERO
                } else {
                    crypto::app_address(self.caller_app)
                };
                StackValue::from(addr.0.to_vec())
            }
        };
        Ok(v)
    }

    fn txn_field(&self, source: TxnSource, field: u8, array_index: Option<u8>) -> Result<StackValue> {
        let spec = self.field_spec(FieldGroup::Txn, field)?;
        if spec.array != array_index.is_some() {
            return self.fail(format!("invalid txn field {} for {}", spec.name, self.op_name));
        }

        let (txn, group_index, effects) = match source {
            TxnSource::Group(gi) => {
                let txn = match self.group.txns.get(gi) {
                    Some(t) => t,
                    None => {
                        return self.fail(format!(
                            "txn index {}, len(group) is {}",
                            gi,
                            self.group.txns.len()
                        ))
                    }
                };
                let effects = if gi < self.index {
                    self.group.apply.get(gi).map(|ad| Effects {
                        created_asset: ad.config_asset,
                        created_app: ad.application_id,
                        logs: &ad.eval_delta.logs,
                    })
                } else {
                    None
                };
                (txn, gi, effects)
            }
            TxnSource::LastInner => {
                let last = match self.last_inner.last() {
                    Some(l) => l,
                    None => return self.fail("no inner transaction available"),
                };
                let effects = Effects {
                    created_asset: last.config_asset,
                    created_app: last.application_id,
                    logs: &last.eval_delta.logs,
                };
                (&last.txn, self.last_inner.len() - 1, Some(effects))
            }
        };
        let idx = array_index.map_or(0, usize::from);

        let addr = |a: &Address| StackValue::from(a.0.to_vec());
        let array_get = |len: usize| -> Result<()> {
            if idx >= len {
                return self.fail(format!("invalid {} index {}", spec.name, idx));
            }
            Ok(())
        };
        let params = &txn.asset_params;

        let v = match spec.index {
            0 => addr(&txn.sender),
            1 => StackValue::Uint(txn.fee),
            2 => StackValue::Uint(txn.first_valid),
            3 => return self.fail("FirstValidTime is not available"),
            4 => StackValue::Uint(txn.last_valid),
            5 => StackValue::from(txn.note.to_vec()),
            6 => StackValue::from(txn.lease.0.to_vec()),
            7 => addr(&txn.receiver),
            8 => StackValue::Uint(txn.amount),
            9 => addr(&txn.close_remainder_to),
            10 => addr(&txn.vote_pk),
            11 => addr(&txn.selection_pk),
            12 => StackValue::Uint(txn.vote_first),
            13 => StackValue::Uint(txn.vote_last),
            14 => StackValue::Uint(txn.vote_key_dilution),
            15 => StackValue::from(txn.tx_type.as_str().as_bytes()),
            16 => StackValue::Uint(txn.tx_type.type_enum()),
            17 => StackValue::Uint(txn.xfer_asset),
            18 => StackValue::Uint(txn.asset_amount),
            19 => addr(&txn.asset_sender),
            20 => addr(&txn.asset_receiver),
            21 => addr(&txn.asset_close_to),
            22 => StackValue::Uint(group_index as u64),
            23 => match txn.id() {
                Ok(id) => StackValue::from(id.0.to_vec()),
                Err(e) => return self.fail(format!("txn TxID: {}", e)),
            },
            24 => StackValue::Uint(txn.application_id),
            25 => StackValue::Uint(txn.on_completion.as_u64()),
            26 => {
                array_get(txn.app_args.len())?;
                StackValue::from(txn.app_args[idx].to_vec())
            }
            27 => StackValue::Uint(txn.app_args.len() as u64),
            28 => {
                if idx == 0 {
                    addr(&txn.sender)
                } else {
                    array_get(txn.accounts.len() + 1)?;
                    addr(&txn.accounts[idx - 1])
                }
            }
            29 => StackValue::Uint(txn.accounts.len() as u64),
            30 => StackValue::from(txn.approval_program.to_vec()),
            31 => StackValue::from(txn.clear_state_program.to_vec()),
            32 => addr(&txn.rekey_to),
            33 => StackValue::Uint(txn.config_asset),
            34 => StackValue::Uint(params.total),
            35 => StackValue::Uint(u64::from(params.decimals)),
            36 => StackValue::from(params.default_frozen),
            37 => StackValue::from(params.unit_name.as_bytes()),
            38 => StackValue::from(params.asset_name.as_bytes()),
            39 => StackValue::from(params.url.as_bytes()),
            40 => StackValue::from(params.metadata_hash.0.to_vec()),
            41 => addr(&params.manager),
            42 => addr(&params.reserve),
            43 => addr(&params.freeze),
            44 => addr(&params.clawback),
            45 => StackValue::Uint(txn.freeze_asset),
            46 => addr(&txn.freeze_account),
            47 => StackValue::from(txn.asset_frozen),
            48 => {
                array_get(txn.foreign_assets.len())?;
                StackValue::Uint(txn.foreign_assets[idx])
            }
            49 => StackValue::Uint(txn.foreign_assets.len() as u64),
            50 => {
                if idx == 0 {
                    StackValue::Uint(txn.application_id)
                } else {
                    array_get(txn.foreign_apps.len() + 1)?;
                    StackValue::Uint(txn.foreign_apps[idx - 1])
                }
            }
            51 => StackValue::Uint(txn.foreign_apps.len() as u64),
            52 => StackValue::Uint(txn.global_state_schema.num_uint),
            53 => StackValue::Uint(txn.global_state_schema.num_byte_slice),
            54 => StackValue::Uint(txn.local_state_schema.num_uint),
            55 => StackValue::Uint(txn.local_state_schema.num_byte_slice),
            56 => StackValue::Uint(u64::from(txn.extra_program_pages)),
            57 => StackValue::from(txn.nonparticipation),
            58 => {
                let e = self.effects_of(effects, spec, group_index)?;
                array_get(e.logs.len())?;
                StackValue::from(e.logs[idx].to_vec())
            }
            59 => StackValue::Uint(self.effects_of(effects, spec, group_index)?.logs.len() as u64),
            60 => StackValue::Uint(self.effects_of(effects, spec, group_index)?.created_asset),
            61 => StackValue::Uint(self.effects_of(effects, spec, group_index)?.created_app),
            62 => StackValue::from(
                self.effects_of(effects, spec, group_index)?
                    .logs
                    .last()
                    .map(|l| l.to_vec())
                    .unwrap_or_default(),
            ),
            63 => StackValue::from(txn.state_proof_pk.to_vec()),
            64 | 66 => {
                let program = if spec.index == 64 { &txn.approval_program } else { &txn.clear_state_program };
                let pages: Vec<&[u8]> = program.chunks(PROGRAM_PAGE_SIZE).collect();
                array_get(pages.len())?;
                StackValue::from(pages[idx])
            }
            _ => {
                let program = if spec.index == 65 { &txn.approval_program } else { &txn.clear_state_program };
                StackValue::Uint(program.len().div_ceil(PROGRAM_PAGE_SIZE) as u64)
            }
        };
        Ok(v)
    }

    fn effects_of<'x>(&self, effects: Option<Effects<'x>>, spec: &FieldSpec, group_index: usize) -> Result<Effects<'x>> {
        match effects {
            Some(e) => Ok(e),
            None => self.fail(format!(
                "can't use {} of txn {} from txn {}",
                spec.name, group_index, self.index
            )),
        }
    }

    fn default_inner(&mut self) -> Result<Transaction> {
        let app = self.app_id;
        let min_fee = self.proto.min_txn_fee;
        let credit = self.ledger()?.fee_credit();
        Ok(Transaction {
            sender: crypto::app_address(app),
            fee: min_fee.saturating_sub(credit),
            ..Default::default()
        })
    }

    fn set_inner_field(&self, txn: &mut Transaction, field: &FieldSpec, value: StackValue) -> Result<()> {
        let uint = |v: &StackValue| -> Result<u64> {
            match v {
                StackValue::Uint(u) => Ok(*u),
                StackValue::Bytes(_) => self.fail(format!("{} expects uint64", field.name)),
            }
        };
        let bytes = |v: &StackValue| -> Result<Vec<u8>> {
            match v {
                StackValue::Bytes(b) => Ok(b.clone()),
                StackValue::Uint(_) => self.fail(format!("{} expects []byte", field.name)),
            }
        };
        let address = |v: &StackValue| -> Result<Address> {
            match Address::from_slice(&bytes(v)?) {
                Some(a) => Ok(a),
                None => self.fail(format!("{} expects a 32 byte address", field.name)),
            }
        };
        let boolean = |v: &StackValue| -> Result<bool> {
            match uint(v)? {
                0 => Ok(false),
                1 => Ok(true),
                n => self.fail(format!("{} must be 0 or 1, got {}", field.name, n)),
            }
        };
        let text = |v: &StackValue| -> Result<String> {
            match String::from_utf8(bytes(v)?) {
                Ok(s) => Ok(s),
                Err(_) => self.fail(format!("{} must be valid UTF-8", field.name)),
            }
        };
        let digest = |v: &StackValue| -> Result<Digest> {
            match Digest::from_slice(&bytes(v)?) {
                Some(d) => Ok(d),
                None => self.fail(format!("{} must be 32 bytes", field.name)),
            }
        };
        let small = |v: &StackValue| -> Result<u32> {
            match u32::try_from(uint(v)?) {
                Ok(n) => Ok(n),
                Err(_) => self.fail(format!("{} out of range", field.name)),
            }
        };

        match field.index {
            0 => txn.sender = address(&value)?,
            1 => txn.fee = uint(&value)?,
            5 => txn.note = ByteBuf::from(bytes(&value)?),
            7 => txn.receiver = address(&value)?,
            8 => txn.amount = uint(&value)?,
            9 => txn.close_remainder_to = address(&value)?,
            10 => txn.vote_pk = address(&value)?,
            11 => txn.selection_pk = address(&value)?,
            12 => txn.vote_first = uint(&value)?,
            13 => txn.vote_last = uint(&value)?,
            14 => txn.vote_key_dilution = uint(&value)?,
            15 => {
                let name = bytes(&value)?;
                txn.tx_type = match std::str::from_utf8(&name).ok().and_then(TxType::parse) {
                    Some(t) => t,
                    None => return self.fail(format!("{:?} is not a valid Type", String::from_utf8_lossy(&name))),
                };
            }
            16 => {
                let n = uint(&value)?;
                txn.tx_type = match TxType::from_type_enum(n) {
                    Some(t) => t,
                    None => return self.fail(format!("{} is not a valid TypeEnum", n)),
                };
            }
            17 => txn.xfer_asset = uint(&value)?,
            18 => txn.asset_amount = uint(&value)?,
            19 => txn.asset_sender = address(&value)?,
            20 => txn.asset_receiver = address(&value)?,
            21 => txn.asset_close_to = address(&value)?,
            24 => txn.application_id = uint(&value)?,
            25 => {
                let n = uint(&value)?;
                txn.on_completion = match OnCompletion::from_u64(n) {
                    Some(oc) => oc,
                    None => return self.fail(format!("{} is not a valid OnCompletion", n)),
                };
            }
            26 => txn.app_args.push(ByteBuf::from(bytes(&value)?)),
            28 => txn.accounts.push(address(&value)?),
            30 => txn.approval_program = ByteBuf::from(bytes(&value)?),
            31 => txn.clear_state_program = ByteBuf::from(bytes(&value)?),
            32 => txn.rekey_to = address(&value)?,
            33 => txn.config_asset = uint(&value)?,
            34 => txn.asset_params.total = uint(&value)?,
            35 => txn.asset_params.decimals = small(&value)?,
            36 => txn.asset_params.default_frozen = boolean(&value)?,
            37 => txn.asset_params.unit_name = text(&value)?,
            38 => txn.asset_params.asset_name = text(&value)?,
            39 => txn.asset_params.url = text(&value)?,
            40 => txn.asset_params.metadata_hash = digest(&value)?,
            41 => txn.asset_params.manager = address(&value)?,
            42 => txn.asset_params.reserve = address(&value)?,
            43 => txn.asset_params.freeze = address(&value)?,
            44 => txn.asset_params.clawback = address(&value)?,
            45 => txn.freeze_asset = uint(&value)?,
            46 => txn.freeze_account = address(&value)?,
            47 => txn.asset_frozen = boolean(&value)?,
            48 => txn.foreign_assets.push(uint(&value)?),
            50 => txn.foreign_apps.push(uint(&value)?),
            52 => txn.global_state_schema.num_uint = uint(&value)?,
            53 => txn.global_state_schema.num_byte_slice = uint(&value)?,
            54 => txn.local_state_schema.num_uint = uint(&value)?,
            55 => txn.local_state_schema.num_byte_slice = uint(&value)?,
            56 => txn.extra_program_pages = small(&value)?,
            57 => txn.nonparticipation = boolean(&value)?,
            63 => txn.state_proof_pk = ByteBuf::from(bytes(&value)?),
            64 => {
                let page = bytes(&value)?;
                let mut program = std::mem::take(&mut txn.approval_program).into_vec();
                program.extend_from_slice(&page);
                txn.approval_program = ByteBuf::from(program);
            }
            66 => {
                let page = bytes(&value)?;
                let mut program = std::mem::take(&mut txn.clear_state_program).into_vec();
                program.extend_from_slice(&page);
                txn.clear_state_program = ByteBuf::from(program);
            }
            _ => return self.fail(format!("{} is not allowed in itxn_field", field.name)),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum TxnSource {
    Group(usize),
    LastInner,
}

fn asset_param_value(params: &AssetParams, creator: &Address, field: u8) -> StackValue {
    match field {
        0 => StackValue::Uint(params.total),
        1 => StackValue::Uint(u64::from(params.decimals)),
        2 => StackValue::from(params.default_frozen),
        3 => StackValue::from(params.unit_name.as_bytes()),
        4 => StackValue::from(params.asset_name.as_bytes()),
        5 => StackValue::from(params.url.as_bytes()),
        6 => StackValue::from(params.metadata_hash.0.to_vec()),
        7 => StackValue::from(params.manager.0.to_vec()),
        8 => StackValue::from(params.reserve.0.to_vec()),
        9 => StackValue::from(params.freeze.0.to_vec()),
        10 => StackValue::from(params.clawback.0.to_vec()),
        _ => StackValue::from(creator.0.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::assemble;
    use jig_protocol::transaction::BoxRef;
    use jig_protocol::{AccountData, AppLocalState, AppParams};
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct MockLedger {
        accounts: BTreeMap<Address, AccountData>,
        apps: BTreeMap<u64, (AppParams, Address)>,
        boxes: BTreeMap<(u64, Vec<u8>), Vec<u8>>,
        submitted: Vec<Transaction>,
        budget: u64,
    }

    impl LogicLedger for MockLedger {
        fn round(&self) -> u64 {
            7
        }

        fn latest_timestamp(&self) -> i64 {
            1000
        }

        fn account(&mut self, addr: &Address) -> Result<AccountData> {
            Ok(self.accounts.get(addr).cloned().unwrap_or_default())
        }

        fn min_balance(&mut self, addr: &Address) -> Result<u64> {
            let proto = ConsensusParams::future();
            Ok(self.account(addr)?.min_balance(&proto))
        }

        fn app_params(&mut self, app_id: u64) -> Result<Option<(AppParams, Address)>> {
            Ok(self.apps.get(&app_id).cloned())
        }

        fn asset_params(&mut self, _asset_id: u64) -> Result<Option<(AssetParams, Address)>> {
            Ok(None)
        }

        fn set_global(&mut self, app_id: u64, key: &[u8], value: TealValue) -> Result<()> {
            let (params, _) = self.apps.get_mut(&app_id).ok_or(Error::Ledger("no app".into()))?;
            params.global_state.insert(key.into(), value);
            Ok(())
        }

        fn del_global(&mut self, app_id: u64, key: &[u8]) -> Result<()> {
            if let Some((params, _)) = self.apps.get_mut(&app_id) {
                params.global_state.remove(&KvKey::from(key));
            }
            Ok(())
        }

        fn set_local(&mut self, addr: &Address, app_id: u64, key: &[u8], value: TealValue) -> Result<()> {
            let acct = self.accounts.entry(*addr).or_default();
            acct.app_local_states
                .entry(app_id)
                .or_default()
                .key_value
                .insert(key.into(), value);
            Ok(())
        }

        fn del_local(&mut self, addr: &Address, app_id: u64, key: &[u8]) -> Result<()> {
            if let Some(ls) = self
                .accounts
                .get_mut(addr)
                .and_then(|a| a.app_local_states.get_mut(&app_id))
            {
                ls.key_value.remove(&KvKey::from(key));
            }
            Ok(())
        }

        fn get_box(&mut self, app_id: u64, name: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(self.boxes.get(&(app_id, name.to_vec())).cloned())
        }

        fn put_box(&mut self, app_id: u64, name: &[u8], value: Vec<u8>) -> Result<()> {
            self.boxes.insert((app_id, name.to_vec()), value);
            Ok(())
        }

        fn del_box(&mut self, app_id: u64, name: &[u8]) -> Result<bool> {
            Ok(self.boxes.remove(&(app_id, name.to_vec())).is_some())
        }

        fn fee_credit(&self) -> u64 {
            0
        }

        fn submit_inner(&mut self, _caller_app: u64, txns: Vec<Transaction>) -> Result<Vec<SignedTxnWithAd>> {
            self.submitted.extend(txns.iter().cloned());
            Ok(txns
                .into_iter()
                .map(|txn| SignedTxnWithAd {
                    txn,
                    ..Default::default()
                })
                .collect())
        }

        fn budget(&self) -> u64 {
            self.budget
        }

        fn set_budget(&mut self, budget: u64) {
            self.budget = budget;
        }
    }

    fn app_call(app_id: u64) -> Transaction {
        Transaction {
            tx_type: TxType::ApplicationCall,
            sender: Address::from_bytes([1; 32]),
            application_id: app_id,
            ..Default::default()
        }
    }

    fn ledger_with_app(app_id: u64) -> MockLedger {
        let mut ledger = MockLedger {
            budget: 700,
            ..Default::default()
        };
        ledger
            .apps
            .insert(app_id, (AppParams::default(), Address::from_bytes([9; 32])));
        ledger
    }

    fn run_sig(src: &str, args: &[&[u8]]) -> Result<bool> {
        let program = assemble(src)?.bytecode;
        let txns = vec![Transaction::default()];
        let args: Vec<ByteBuf> = args.iter().map(|a| ByteBuf::from(a.to_vec())).collect();
        let mut budget = 20_000;
        eval_signature(
            &program,
            &args,
            &GroupView::unapplied(&txns),
            0,
            &mut budget,
            &ConsensusParams::future(),
        )
    }

    fn run_app(src: &str, txn: Transaction, ledger: &mut MockLedger) -> Result<AppOutcome> {
        let program = assemble(src)?.bytecode;
        let txns = vec![txn];
        let app_id = txns[0].application_id;
        eval_application(
            &program,
            &GroupView::unapplied(&txns),
            0,
            app_id,
            0,
            ledger,
            &ConsensusParams::future(),
        )
    }

    fn run_sig_bytes(program: &[u8]) -> Result<bool> {
        let txns = vec![Transaction::default()];
        let mut budget = 20_000;
        eval_signature(
            program,
            &[],
            &GroupView::unapplied(&txns),
            0,
            &mut budget,
            &ConsensusParams::future(),
        )
    }

    // varuint close to u64::MAX
    const HUGE_LEN: [u8; 10] = [0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01];

    #[test]
    fn test_oversized_pushbytes_length_fails() {
        let mut program = vec![0x08, 0x80];
        program.extend_from_slice(&HUGE_LEN);
        let err = run_sig_bytes(&program).unwrap_err();
        assert!(err.to_string().contains("runs past program end"), "{}", err);

        // length just past the end
        let err = run_sig_bytes(&[0x08, 0x80, 0x05, b'a', b'b']).unwrap_err();
        assert!(err.to_string().contains("runs past program end"), "{}", err);
    }

    #[test]
    fn test_oversized_bytecblock_length_fails() {
        let mut program = vec![0x08, 0x26, 0x01];
        program.extend_from_slice(&HUGE_LEN);
        let err = run_sig_bytes(&program).unwrap_err();
        assert!(err.to_string().contains("runs past program end"), "{}", err);

        // second constant overruns after a valid first one
        let err = run_sig_bytes(&[0x08, 0x26, 0x02, 0x01, b'a', 0x07, b'b']).unwrap_err();
        assert!(err.to_string().contains("runs past program end"), "{}", err);
    }

    #[test]
    fn test_oversized_intcblock_count_fails() {
        let mut program = vec![0x08, 0x20];
        program.extend_from_slice(&HUGE_LEN);
        assert!(run_sig_bytes(&program).is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_arbitrary_bytecode_never_panics(
            body in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..64)
        ) {
            let mut program = vec![0x08];
            program.extend(body);
            let _ = run_sig_bytes(&program);
        }
    }

    #[test]
    fn test_trivial_approve_and_reject() {
        assert!(run_sig("#pragma version 8\nint 1", &[]).unwrap());
        assert!(!run_sig("#pragma version 8\nint 0", &[]).unwrap());
    }

    #[test]
    fn test_stack_must_end_with_one_uint() {
        let err = run_sig("#pragma version 8\nint 1\nint 2", &[]).unwrap_err();
        assert!(err.to_string().contains("stack len is 2"));
        let err = run_sig("#pragma version 8\nbyte 0x01", &[]).unwrap_err();
        assert!(err.to_string().contains("bytes not int"));
    }

    #[test]
    fn test_arithmetic_and_errors() {
        assert!(run_sig("#pragma version 8\nint 2\nint 3\n*\nint 6\n==", &[]).unwrap());
        let err = run_sig("#pragma version 8\nint 1\nint 0\n/", &[]).unwrap_err();
        assert_eq!(err.pc(), Some(5));
        assert!(run_sig("#pragma version 8\nint 0\nint 1\n-", &[]).is_err());
        assert!(run_sig("#pragma version 8\nerr", &[]).unwrap_err().to_string().contains("err opcode"));
    }

    #[test]
    fn test_args_and_bytes() {
        let src = "#pragma version 8\narg 0\nbyte \"hello\"\n==\narg_1\nlen\nint 3\n==\n&&";
        assert!(run_sig(src, &[b"hello", b"abc"]).unwrap());
        assert!(!run_sig(src, &[b"nope", b"abc"]).unwrap());
    }

    #[test]
    fn test_branches_and_subroutines() {
        let src = "#pragma version 8
int 5
callsub double
int 10
==
return
double:
dup
+
retsub";
        assert!(run_sig(src, &[]).unwrap());
    }

    #[test]
    fn test_byte_ops() {
        let src = "#pragma version 8
byte 0x0102030405
extract 1 2
byte 0x0203
==
byte 0x00000000000000ff
btoi
int 255
==
&&
byte 0xff00
int 8
getbit
!
&&";
        assert!(run_sig(src, &[]).unwrap());
    }

    #[test]
    fn test_budget_exhaustion() {
        let program = assemble("#pragma version 8\nbyte 0x00\nsha256\nlen").unwrap().bytecode;
        let txns = vec![Transaction::default()];
        let mut budget = 10;
        let err = eval_signature(
            &program,
            &[],
            &GroupView::unapplied(&txns),
            0,
            &mut budget,
            &ConsensusParams::future(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("dynamic cost budget exceeded"));
    }

    #[test]
    fn test_app_opcodes_rejected_in_signature_mode() {
        let err = run_sig("#pragma version 8\nbyte \"x\"\nlog\nint 1", &[]).unwrap_err();
        assert!(err.to_string().contains("not allowed in current mode"));
    }

    #[test]
    fn test_global_state_roundtrip() {
        let mut ledger = ledger_with_app(5);
        let src = "#pragma version 8
byte \"counter\"
int 41
app_global_put
byte \"counter\"
app_global_get
int 1
+
int 42
==";
        let outcome = run_app(src, app_call(5), &mut ledger).unwrap();
        assert!(outcome.pass);
        let (params, _) = &ledger.apps[&5];
        assert_eq!(params.global_state[&KvKey::from("counter")].uint, 41);
        assert!(ledger.budget < 700);
    }

    #[test]
    fn test_local_state_requires_opt_in() {
        let mut ledger = ledger_with_app(5);
        let src = "#pragma version 8\nint 0\nbyte \"k\"\nint 1\napp_local_put\nint 1";
        let err = run_app(src, app_call(5), &mut ledger).unwrap_err();
        assert!(err.to_string().contains("not opted in"));

        let sender = Address::from_bytes([1; 32]);
        ledger
            .accounts
            .entry(sender)
            .or_default()
            .app_local_states
            .insert(5, AppLocalState::default());
        assert!(run_app(src, app_call(5), &mut ledger).unwrap().pass);
    }

    #[test]
    fn test_logs() {
        let mut ledger = ledger_with_app(5);
        let outcome = run_app("#pragma version 8\nbyte \"hi\"\nlog\nint 1", app_call(5), &mut ledger).unwrap();
        assert_eq!(outcome.logs, vec![b"hi".to_vec()]);
    }

    #[test]
    fn test_boxes_need_references() {
        let mut ledger = ledger_with_app(5);
        let src = "#pragma version 8\nbyte \"b\"\nbyte \"value\"\nbox_put\nint 1";
        assert!(run_app(src, app_call(5), &mut ledger)
            .unwrap_err()
            .to_string()
            .contains("invalid Box reference"));

        let mut txn = app_call(5);
        txn.boxes.push(BoxRef {
            index: 0,
            name: ByteBuf::from(b"b".to_vec()),
        });
        assert!(run_app(src, txn.clone(), &mut ledger).unwrap().pass);
        assert_eq!(ledger.boxes[&(5, b"b".to_vec())], b"value".to_vec());

        let src = "#pragma version 8\nbyte \"b\"\nbox_del";
        assert!(run_app(src, txn, &mut ledger).unwrap().pass);
        assert!(ledger.boxes.is_empty());
    }

    #[test]
    fn test_inner_payment() {
        let mut ledger = ledger_with_app(5);
        let src = "#pragma version 8
itxn_begin
int pay
itxn_field TypeEnum
txn Sender
itxn_field Receiver
int 1000
itxn_field Amount
itxn_submit
itxn Amount
int 1000
==";
        let outcome = run_app(src, app_call(5), &mut ledger).unwrap();
        assert!(outcome.pass);
        assert_eq!(outcome.inner_txns.len(), 1);
        let inner = &ledger.submitted[0];
        assert_eq!(inner.sender, crypto::app_address(5));
        assert_eq!(inner.receiver, Address::from_bytes([1; 32]));
        assert_eq!(inner.fee, 1000);
    }

    #[test]
    fn test_account_references() {
        let mut ledger = ledger_with_app(5);
        let other = Address::from_bytes([2; 32]);
        ledger.accounts.insert(other, AccountData::with_balance(777));

        let src = "#pragma version 8\nint 1\nbalance\nint 777\n==";
        assert!(run_app(src, app_call(5), &mut ledger).is_err());

        let mut txn = app_call(5);
        txn.accounts.push(other);
        assert!(run_app(src, txn, &mut ledger).unwrap().pass);
    }

    #[test]
    fn test_global_fields_in_app_mode() {
        let mut ledger = ledger_with_app(5);
        let src = "#pragma version 8
global Round
int 7
==
global CurrentApplicationID
int 5
==
&&
global CreatorAddress
addr XRBWO7FUJ7NOB6TOLBNEMLPHGEN7PWOSNNTUIG274DOAFWZ4533OR677SM
!=
&&";
        assert!(run_app(src, app_call(5), &mut ledger).unwrap().pass);
    }
}
