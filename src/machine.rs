use std::collections::{HashMap, HashSet};

use primitive_types::{H160, H256, U256};
use rlp::RlpStream;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::trace;

use crate::gas;
use crate::opcodes::*;
use crate::state::{Account, JournaledState};
use crate::transaction::recover_unchecked;
use crate::word::*;

pub const STACK_LIMIT: usize = 1024;
pub const CALL_DEPTH_LIMIT: usize = 1024;
pub const MAX_CODE_SIZE: usize = 24_576;
// Anything past this cannot be paid for with a 64-bit gas counter.
const MEMORY_LIMIT: u64 = u32::MAX as u64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvmError {
    #[error("out of gas")]
    OutOfGas,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack overflow")]
    StackOverflow,
    #[error("invalid jump destination {0}")]
    InvalidJump(usize),
    #[error("invalid opcode 0x{0:02x} at pc={1}")]
    InvalidOpcode(u8, usize),
    #[error("return data out of bounds")]
    ReturnDataOutOfBounds,
    #[error("state modification in static context")]
    StaticViolation,
    #[error("max call depth exceeded")]
    CallDepth,
    #[error("insufficient balance for transfer")]
    InsufficientBalance,
    #[error("contract address collision")]
    CreateCollision,
    #[error("max code size exceeded")]
    CodeSizeLimit,
}

impl EvmError {
    /// Failures detected before a child frame starts hand its gas back to the caller.
    fn consumes_gas(&self) -> bool {
        !matches!(self, EvmError::CallDepth | EvmError::InsufficientBalance)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    Stop,
    Return,
    Revert,
    Exception(EvmError),
}

impl Halt {
    pub fn is_success(&self) -> bool {
        matches!(self, Halt::Stop | Halt::Return)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: H160,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct BlockEnv {
    pub coinbase: H160,
    pub timestamp: u64,
    pub number: u64,
    pub gas_limit: u64,
    pub chain_id: u64,
    pub difficulty: U256,
    /// Hashes of the preceding blocks, oldest first; the last entry is block `number - 1`.
    pub ancestor_hashes: Vec<H256>,
}

impl BlockEnv {
    pub fn block_hash(&self, n: U256) -> H256 {
        if n >= U256::from(self.number) {
            return H256::zero();
        }
        let age = self.number - n.low_u64();
        if age > 256 || age as usize > self.ancestor_hashes.len() {
            return H256::zero();
        }
        self.ancestor_hashes[self.ancestor_hashes.len() - age as usize]
    }
}

#[derive(Debug, Clone, Default)]
pub struct TxEnv {
    pub origin: H160,
    pub gas_price: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Call,
    CallCode,
    DelegateCall,
    StaticCall,
    Create,
    Create2,
}

impl CallKind {
    pub fn is_create(self) -> bool {
        matches!(self, CallKind::Create | CallKind::Create2)
    }
}

/// Input to a frame. For creations `address` is the new contract and `data` the init code.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: CallKind,
    pub caller: H160,
    pub address: H160,
    pub code_address: H160,
    pub value: U256,
    pub data: Vec<u8>,
    pub gas: u64,
    pub is_static: bool,
    pub depth: usize,
}

impl Message {
    pub fn call(caller: H160, to: H160, value: U256, data: Vec<u8>, gas: u64) -> Self {
        Self {
            kind: CallKind::Call,
            caller,
            address: to,
            code_address: to,
            value,
            data,
            gas,
            is_static: false,
            depth: 0,
        }
    }

    pub fn create(caller: H160, address: H160, value: U256, init_code: Vec<u8>, gas: u64) -> Self {
        Self {
            kind: CallKind::Create,
            caller,
            address,
            code_address: address,
            value,
            data: init_code,
            gas,
            is_static: false,
            depth: 0,
        }
    }

    fn transfers_value(&self) -> bool {
        !matches!(self.kind, CallKind::DelegateCall | CallKind::StaticCall) && !self.value.is_zero()
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub halt: Halt,
    pub gas_left: u64,
    pub output: Vec<u8>,
    pub created: Option<H160>,
    pub logs: Vec<LogEntry>,
    /// Accumulated refund counter, uncapped.
    pub refund: u64,
    pub selfdestructs: Vec<H160>,
}

#[derive(Debug, Clone, Copy)]
enum FrameKind {
    Call { ret_offset: usize, ret_size: usize },
    Create,
}

#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    journal: usize,
    logs: usize,
    refund: i64,
    selfdestructs: usize,
}

/// One activation record in the frame arena.
#[derive(Debug, Clone)]
pub struct Frame {
    pub pc: usize,
    pub gas: u64,
    pub code: Vec<u8>,
    pub stack: Vec<U256>,
    pub memory: Vec<u8>,
    pub calldata: Vec<u8>,
    pub return_data: Vec<u8>,
    pub address: H160,
    pub caller: H160,
    pub value: U256,
    pub is_static: bool,
    pub depth: usize,
    kind: FrameKind,
    checkpoint: Checkpoint,
    jumpdests: HashSet<usize>,
}

enum Control {
    Continue,
    Halt(Halt, Vec<u8>),
    Call(Message, FrameKind),
}

struct Completion {
    kind: FrameKind,
    checkpoint: Option<Checkpoint>,
    address: H160,
    halt: Halt,
    gas_left: u64,
    output: Vec<u8>,
}

/// Interpreter for one transaction. Nested calls push frames onto `frames`
/// instead of recursing; the loop always executes the top frame.
pub struct Evm<'a> {
    state: &'a mut JournaledState,
    block: &'a BlockEnv,
    tx: TxEnv,
    frames: Vec<Frame>,
    logs: Vec<LogEntry>,
    refund: i64,
    originals: HashMap<(H160, U256), U256>,
    selfdestructs: Vec<H160>,
    result: Option<ExecutionResult>,
}

impl<'a> Evm<'a> {
    pub fn new(state: &'a mut JournaledState, block: &'a BlockEnv, tx: TxEnv) -> Self {
        Self {
            state,
            block,
            tx,
            frames: Vec::with_capacity(16),
            logs: Vec::new(),
            refund: 0,
            originals: HashMap::new(),
            selfdestructs: Vec::new(),
            result: None,
        }
    }

    /// Run `msg` to completion.
    pub fn transact(mut self, msg: Message) -> ExecutionResult {
        self.begin(msg);
        while self.step() {}
        self.finish()
    }

    pub fn begin(&mut self, msg: Message) {
        let kind = if msg.kind.is_create() {
            FrameKind::Create
        } else {
            FrameKind::Call { ret_offset: 0, ret_size: 0 }
        };
        self.enter(msg, kind);
    }

    /// Frame currently executing, if any.
    pub fn current(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Execute one instruction. Returns false once the outermost frame has halted.
    pub fn step(&mut self) -> bool {
        if self.frames.is_empty() {
            return false;
        }
        let control = match self.exec() {
            Ok(control) => control,
            Err(e) => Control::Halt(Halt::Exception(e), Vec::new()),
        };
        match control {
            Control::Continue => {}
            Control::Halt(halt, output) => self.exit_frame(halt, output),
            Control::Call(msg, kind) => self.enter(msg, kind),
        }
        !self.frames.is_empty()
    }

    pub fn finish(self) -> ExecutionResult {
        self.result.unwrap_or(ExecutionResult {
            halt: Halt::Stop,
            gas_left: 0,
            output: Vec::new(),
            created: None,
            logs: Vec::new(),
            refund: 0,
            selfdestructs: Vec::new(),
        })
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            journal: self.state.checkpoint(),
            logs: self.logs.len(),
            refund: self.refund,
            selfdestructs: self.selfdestructs.len(),
        }
    }

    fn revert(&mut self, cp: Checkpoint) {
        self.state.revert_to(cp.journal);
        self.logs.truncate(cp.logs);
        self.refund = cp.refund;
        self.selfdestructs.truncate(cp.selfdestructs);
    }

    fn enter(&mut self, msg: Message, kind: FrameKind) {
        let fail = |err: EvmError, gas_left| Completion {
            kind,
            checkpoint: None,
            address: msg.address,
            halt: Halt::Exception(err),
            gas_left,
            output: Vec::new(),
        };
        if msg.depth > CALL_DEPTH_LIMIT {
            return self.complete(fail(EvmError::CallDepth, msg.gas));
        }
        if msg.transfers_value() && self.state.store().balance(&msg.caller) < msg.value {
            return self.complete(fail(EvmError::InsufficientBalance, msg.gas));
        }

        let checkpoint = self.checkpoint();
        if msg.kind.is_create() {
            let store = self.state.store();
            if store.nonce(&msg.address) != 0 || !store.code(&msg.address).is_empty() {
                return self.complete(fail(EvmError::CreateCollision, 0));
            }
            self.state.create_account(msg.address);
        }
        if msg.transfers_value() {
            self.state.transfer(msg.caller, msg.address, msg.value);
        }

        if !msg.kind.is_create() {
            if let Some(res) = precompile(msg.code_address, &msg.data, msg.gas) {
                let (halt, gas_left, output) = match res {
                    Ok((output, cost)) => (Halt::Return, msg.gas - cost, output),
                    Err(e) => (Halt::Exception(e), 0, Vec::new()),
                };
                return self.complete(Completion {
                    kind,
                    checkpoint: Some(checkpoint),
                    address: msg.address,
                    halt,
                    gas_left,
                    output,
                });
            }
        }

        let (code, calldata) = if msg.kind.is_create() {
            (msg.data, Vec::new())
        } else {
            (self.state.store().code(&msg.code_address).to_vec(), msg.data)
        };
        trace!(depth = msg.depth, kind = ?msg.kind, address = ?msg.address, gas = msg.gas, "enter frame");
        let jumpdests = scan_jumpdests(&code);
        self.frames.push(Frame {
            pc: 0,
            gas: msg.gas,
            code,
            stack: Vec::with_capacity(64),
            memory: Vec::new(),
            calldata,
            return_data: Vec::new(),
            address: msg.address,
            caller: msg.caller,
            value: msg.value,
            is_static: msg.is_static,
            depth: msg.depth,
            kind,
            checkpoint,
            jumpdests,
        });
    }

    fn exit_frame(&mut self, halt: Halt, output: Vec<u8>) {
        let Some(frame) = self.frames.pop() else { return };
        trace!(depth = frame.depth, ?halt, gas_left = frame.gas, "exit frame");
        self.complete(Completion {
            kind: frame.kind,
            checkpoint: Some(frame.checkpoint),
            address: frame.address,
            halt,
            gas_left: frame.gas,
            output,
        });
    }

    fn complete(&mut self, c: Completion) {
        let Completion { kind, checkpoint, address, mut halt, mut gas_left, mut output } = c;
        let is_create = matches!(kind, FrameKind::Create);

        if is_create && halt.is_success() {
            let deposit = gas::CODE_DEPOSIT_BYTE * output.len() as u64;
            if output.len() > MAX_CODE_SIZE {
                halt = Halt::Exception(EvmError::CodeSizeLimit);
            } else if gas_left < deposit {
                halt = Halt::Exception(EvmError::OutOfGas);
            } else {
                gas_left -= deposit;
                self.state.set_code(address, std::mem::take(&mut output));
            }
        }
        if !halt.is_success() {
            if let Halt::Exception(e) = &halt {
                if e.consumes_gas() {
                    gas_left = 0;
                }
                output.clear();
            }
            if let Some(cp) = checkpoint {
                self.revert(cp);
            }
        }

        let success = halt.is_success();
        let Some(parent) = self.frames.last_mut() else {
            self.result = Some(ExecutionResult {
                halt,
                gas_left,
                output,
                created: (is_create && success).then_some(address),
                logs: std::mem::take(&mut self.logs),
                refund: self.refund.max(0) as u64,
                selfdestructs: std::mem::take(&mut self.selfdestructs),
            });
            return;
        };

        parent.gas += gas_left;
        let flag = match kind {
            FrameKind::Call { ret_offset, ret_size } => {
                let n = ret_size.min(output.len());
                parent.memory[ret_offset..ret_offset + n].copy_from_slice(&output[..n]);
                bool_to_u256(success)
            }
            FrameKind::Create if success => h160_to_u256(address),
            FrameKind::Create => U256::zero(),
        };
        parent.return_data = output;
        // The parent popped at least as many operands as it pushes back here.
        parent.stack.push(flag);
    }

    fn exec(&mut self) -> Result<Control, EvmError> {
        let Some(f) = self.frames.last_mut() else {
            return Ok(Control::Halt(Halt::Stop, Vec::new()));
        };
        if f.pc >= f.code.len() {
            return Ok(Control::Halt(Halt::Stop, Vec::new()));
        }
        let op = f.code[f.pc];
        match op {
            STOP => return Ok(Control::Halt(Halt::Stop, Vec::new())),

            // Arithmetic
            ADD => { f.gas_dec(gas::VERYLOW)?; f.binop(|a, b| a.overflowing_add(b).0)?; }
            MUL => { f.gas_dec(gas::LOW)?; f.binop(|a, b| a.overflowing_mul(b).0)?; }
            SUB => { f.gas_dec(gas::VERYLOW)?; f.binop(|a, b| a.overflowing_sub(b).0)?; }
            DIV => { f.gas_dec(gas::LOW)?; f.binop(|a, b| if b.is_zero() { U256::zero() } else { a / b })?; }
            SDIV => { f.gas_dec(gas::LOW)?; f.binop(sdiv)?; }
            MOD => { f.gas_dec(gas::LOW)?; f.binop(|a, b| if b.is_zero() { U256::zero() } else { a % b })?; }
            SMOD => { f.gas_dec(gas::LOW)?; f.binop(smod)?; }
            ADDMOD => { f.gas_dec(gas::MID)?; let (a, b, n) = (f.pop()?, f.pop()?, f.pop()?); f.push(addmod(a, b, n))?; }
            MULMOD => { f.gas_dec(gas::MID)?; let (a, b, n) = (f.pop()?, f.pop()?, f.pop()?); f.push(mulmod(a, b, n))?; }
            EXP => {
                let (base, exponent) = (f.pop()?, f.pop()?);
                let bytes = exponent.bits().div_ceil(8) as u64;
                f.gas_dec(gas::EXP + gas::EXP_BYTE * bytes)?;
                f.push(base.overflowing_pow(exponent).0)?;
            }
            SIGNEXTEND => { f.gas_dec(gas::LOW)?; f.binop(signextend)?; }

            // Logic/compare
            LT => { f.gas_dec(gas::VERYLOW)?; f.binop(|a, b| bool_to_u256(a < b))?; }
            GT => { f.gas_dec(gas::VERYLOW)?; f.binop(|a, b| bool_to_u256(a > b))?; }
            SLT => { f.gas_dec(gas::VERYLOW)?; f.binop(|a, b| bool_to_u256(slt(a, b)))?; }
            SGT => { f.gas_dec(gas::VERYLOW)?; f.binop(|a, b| bool_to_u256(sgt(a, b)))?; }
            EQ => { f.gas_dec(gas::VERYLOW)?; f.binop(|a, b| bool_to_u256(a == b))?; }
            ISZERO => { f.gas_dec(gas::VERYLOW)?; f.unop(|a| bool_to_u256(a.is_zero()))?; }
            AND => { f.gas_dec(gas::VERYLOW)?; f.binop(|a, b| a & b)?; }
            OR => { f.gas_dec(gas::VERYLOW)?; f.binop(|a, b| a | b)?; }
            XOR => { f.gas_dec(gas::VERYLOW)?; f.binop(|a, b| a ^ b)?; }
            NOT => { f.gas_dec(gas::VERYLOW)?; f.unop(|a| !a)?; }
            BYTE => { f.gas_dec(gas::VERYLOW)?; f.binop(byte)?; }
            SHL => { f.gas_dec(gas::VERYLOW)?; f.binop(shl)?; }
            SHR => { f.gas_dec(gas::VERYLOW)?; f.binop(shr)?; }
            SAR => { f.gas_dec(gas::VERYLOW)?; f.binop(sar)?; }

            SHA3 => {
                let (offset, size) = (f.pop()?, f.pop()?);
                f.gas_dec(gas::SHA3 + gas::SHA3_WORD * words_of(size)?)?;
                let data = f.read_memory(offset, size)?;
                f.push(h256_to_u256(keccak256(&data)))?;
            }

            // Environment
            ADDRESS => { f.gas_dec(gas::BASE)?; f.push(h160_to_u256(f.address))?; }
            BALANCE => {
                f.gas_dec(gas::BALANCE)?;
                let addr = u256_to_h160(f.pop()?);
                f.push(self.state.store().balance(&addr))?;
            }
            ORIGIN => { f.gas_dec(gas::BASE)?; f.push(h160_to_u256(self.tx.origin))?; }
            CALLER => { f.gas_dec(gas::BASE)?; f.push(h160_to_u256(f.caller))?; }
            CALLVALUE => { f.gas_dec(gas::BASE)?; f.push(f.value)?; }
            CALLDATALOAD => {
                f.gas_dec(gas::VERYLOW)?;
                let offset = f.pop()?;
                let mut buf = [0u8; 32];
                copy_padded(&mut buf, &f.calldata, offset);
                f.push(U256::from_big_endian(&buf))?;
            }
            CALLDATASIZE => { f.gas_dec(gas::BASE)?; f.push(U256::from(f.calldata.len()))?; }
            CALLDATACOPY => {
                let (mem, offset, size) = (f.pop()?, f.pop()?, f.pop()?);
                f.gas_dec(gas::VERYLOW)?;
                if let Some((m, s)) = f.copy_region(mem, size)? {
                    copy_padded(&mut f.memory[m..m + s], &f.calldata, offset);
                }
            }
            CODESIZE => { f.gas_dec(gas::BASE)?; f.push(U256::from(f.code.len()))?; }
            CODECOPY => {
                let (mem, offset, size) = (f.pop()?, f.pop()?, f.pop()?);
                f.gas_dec(gas::VERYLOW)?;
                if let Some((m, s)) = f.copy_region(mem, size)? {
                    copy_padded(&mut f.memory[m..m + s], &f.code, offset);
                }
            }
            GASPRICE => { f.gas_dec(gas::BASE)?; f.push(self.tx.gas_price)?; }
            EXTCODESIZE => {
                f.gas_dec(gas::EXTCODE)?;
                let addr = u256_to_h160(f.pop()?);
                f.push(U256::from(self.state.store().code(&addr).len()))?;
            }
            EXTCODECOPY => {
                let addr = u256_to_h160(f.pop()?);
                let (mem, offset, size) = (f.pop()?, f.pop()?, f.pop()?);
                f.gas_dec(gas::EXTCODE)?;
                if let Some((m, s)) = f.copy_region(mem, size)? {
                    copy_padded(&mut f.memory[m..m + s], self.state.store().code(&addr), offset);
                }
            }
            RETURNDATASIZE => { f.gas_dec(gas::BASE)?; f.push(U256::from(f.return_data.len()))?; }
            RETURNDATACOPY => {
                let (mem, offset, size) = (f.pop()?, f.pop()?, f.pop()?);
                f.gas_dec(gas::VERYLOW)?;
                let end = offset.overflowing_add(size);
                if end.1 || end.0 > U256::from(f.return_data.len()) {
                    return Err(EvmError::ReturnDataOutOfBounds);
                }
                if let Some((m, s)) = f.copy_region(mem, size)? {
                    let o = offset.low_u64() as usize;
                    f.memory[m..m + s].copy_from_slice(&f.return_data[o..o + s]);
                }
            }
            EXTCODEHASH => {
                f.gas_dec(gas::EXTCODEHASH)?;
                let addr = u256_to_h160(f.pop()?);
                let hash = match self.state.store().get(&addr) {
                    Some(acc) if !acc.is_empty() => h256_to_u256(acc.code_hash()),
                    _ => U256::zero(),
                };
                f.push(hash)?;
            }

            // Block env
            BLOCKHASH => {
                f.gas_dec(gas::BLOCKHASH)?;
                let n = f.pop()?;
                f.push(h256_to_u256(self.block.block_hash(n)))?;
            }
            COINBASE => { f.gas_dec(gas::BASE)?; f.push(h160_to_u256(self.block.coinbase))?; }
            TIMESTAMP => { f.gas_dec(gas::BASE)?; f.push(U256::from(self.block.timestamp))?; }
            NUMBER => { f.gas_dec(gas::BASE)?; f.push(U256::from(self.block.number))?; }
            DIFFICULTY => { f.gas_dec(gas::BASE)?; f.push(self.block.difficulty)?; }
            GASLIMIT => { f.gas_dec(gas::BASE)?; f.push(U256::from(self.block.gas_limit))?; }
            CHAINID => { f.gas_dec(gas::BASE)?; f.push(U256::from(self.block.chain_id))?; }
            SELFBALANCE => { f.gas_dec(gas::SELFBALANCE)?; f.push(self.state.store().balance(&f.address))?; }

            // Stack/Memory/Storage
            POP => { f.gas_dec(gas::BASE)?; f.pop()?; }
            MLOAD => {
                f.gas_dec(gas::VERYLOW)?;
                let offset = f.pop()?;
                let o = f.word_region(offset)?;
                let val = U256::from_big_endian(&f.memory[o..o + 32]);
                f.push(val)?;
            }
            MSTORE => {
                f.gas_dec(gas::VERYLOW)?;
                let (offset, val) = (f.pop()?, f.pop()?);
                let o = f.word_region(offset)?;
                val.to_big_endian(&mut f.memory[o..o + 32]);
            }
            MSTORE8 => {
                f.gas_dec(gas::VERYLOW)?;
                let (offset, val) = (f.pop()?, f.pop()?);
                if let Some((o, _)) = f.region(offset, U256::one())? {
                    f.memory[o] = val.byte(0);
                }
            }
            SLOAD => {
                f.gas_dec(gas::SLOAD)?;
                let key = f.pop()?;
                f.push(self.state.store().storage(&f.address, key))?;
            }
            SSTORE => {
                if f.is_static {
                    return Err(EvmError::StaticViolation);
                }
                if f.gas <= gas::SSTORE_SENTRY {
                    return Err(EvmError::OutOfGas);
                }
                let (key, new) = (f.pop()?, f.pop()?);
                let current = self.state.store().storage(&f.address, key);
                let original = *self.originals.entry((f.address, key)).or_insert(current);
                let (cost, refund) = sstore_cost(original, current, new);
                f.gas_dec(cost)?;
                self.refund += refund;
                if current != new {
                    self.state.set_storage(f.address, key, new);
                }
            }

            // Flow
            JUMP => {
                f.gas_dec(gas::MID)?;
                let dest = u256_to_usize(f.pop()?);
                if !f.jumpdests.contains(&dest) {
                    return Err(EvmError::InvalidJump(dest));
                }
                f.pc = dest;
                return Ok(Control::Continue);
            }
            JUMPI => {
                f.gas_dec(gas::HIGH)?;
                let (dest, cond) = (f.pop()?, f.pop()?);
                if !cond.is_zero() {
                    let d = u256_to_usize(dest);
                    if !f.jumpdests.contains(&d) {
                        return Err(EvmError::InvalidJump(d));
                    }
                    f.pc = d;
                    return Ok(Control::Continue);
                }
            }
            JUMPDEST => { f.gas_dec(gas::JUMPDEST)?; }

            // Introspection
            PC => { f.gas_dec(gas::BASE)?; f.push(U256::from(f.pc))?; }
            MSIZE => { f.gas_dec(gas::BASE)?; f.push(U256::from(f.memory.len()))?; }
            GAS => { f.gas_dec(gas::BASE)?; f.push(U256::from(f.gas))?; }

            PUSH0 => { f.gas_dec(gas::BASE)?; f.push(U256::zero())?; }
            PUSH1..=PUSH32 => {
                f.gas_dec(gas::VERYLOW)?;
                let n = (op - PUSH1 + 1) as usize;
                let start = f.pc + 1;
                let end = (start + n).min(f.code.len());
                // Immediates running past the end of code read as zero bytes.
                let mut buf = [0u8; 32];
                buf[32 - n..32 - n + (end - start)].copy_from_slice(&f.code[start..end]);
                f.push(U256::from_big_endian(&buf))?;
                f.pc = start + n;
                return Ok(Control::Continue);
            }
            DUP1..=DUP16 => {
                f.gas_dec(gas::VERYLOW)?;
                let n = (op - DUP1 + 1) as usize;
                if f.stack.len() < n {
                    return Err(EvmError::StackUnderflow);
                }
                let val = f.stack[f.stack.len() - n];
                f.push(val)?;
            }
            SWAP1..=SWAP16 => {
                f.gas_dec(gas::VERYLOW)?;
                let n = (op - SWAP1 + 1) as usize;
                if f.stack.len() < n + 1 {
                    return Err(EvmError::StackUnderflow);
                }
                let top = f.stack.len() - 1;
                f.stack.swap(top, top - n);
            }

            LOG0..=LOG4 => {
                if f.is_static {
                    return Err(EvmError::StaticViolation);
                }
                let n = (op - LOG0) as usize;
                let (offset, size) = (f.pop()?, f.pop()?);
                let mut topics = Vec::with_capacity(n);
                for _ in 0..n {
                    topics.push(u256_to_h256(f.pop()?));
                }
                if size > U256::from(MEMORY_LIMIT) {
                    return Err(EvmError::OutOfGas);
                }
                f.gas_dec(gas::LOG + gas::LOG_TOPIC * n as u64 + gas::LOG_DATA * size.low_u64())?;
                let data = f.read_memory(offset, size)?;
                self.logs.push(LogEntry { address: f.address, topics, data });
            }

            CREATE | CREATE2 => {
                if f.is_static {
                    return Err(EvmError::StaticViolation);
                }
                let (value, offset, size) = (f.pop()?, f.pop()?, f.pop()?);
                let salt = if op == CREATE2 { Some(f.pop()?) } else { None };
                let init = f.read_memory(offset, size)?;
                let hashing = if salt.is_some() { gas::SHA3_WORD * gas::words(init.len()) } else { 0 };
                f.gas_dec(gas::CREATE + hashing)?;
                let child_gas = f.gas - f.gas / 64;
                f.pc += 1;
                f.return_data.clear();

                let creator = f.address;
                if f.depth + 1 > CALL_DEPTH_LIMIT || self.state.store().balance(&creator) < value {
                    f.push(U256::zero())?;
                    return Ok(Control::Continue);
                }
                f.gas -= child_gas;
                let nonce = self.state.store().nonce(&creator);
                self.state.increment_nonce(creator);
                let address = match salt {
                    Some(salt) => create2_address(creator, salt, &init),
                    None => create_address(creator, nonce),
                };
                let msg = Message {
                    kind: if salt.is_some() { CallKind::Create2 } else { CallKind::Create },
                    caller: creator,
                    address,
                    code_address: address,
                    value,
                    data: init,
                    gas: child_gas,
                    is_static: false,
                    depth: f.depth + 1,
                };
                return Ok(Control::Call(msg, FrameKind::Create));
            }

            CALL | CALLCODE | DELEGATECALL | STATICCALL => {
                let requested = f.pop()?;
                let to = u256_to_h160(f.pop()?);
                let value = if matches!(op, CALL | CALLCODE) { f.pop()? } else { U256::zero() };
                let (in_offset, in_size, out_offset, out_size) = (f.pop()?, f.pop()?, f.pop()?, f.pop()?);
                if op == CALL && f.is_static && !value.is_zero() {
                    return Err(EvmError::StaticViolation);
                }
                let input = f.read_memory(in_offset, in_size)?;
                let (ret_offset, ret_size) = f.region(out_offset, out_size)?.unwrap_or((0, 0));

                let mut cost = gas::CALL;
                if !value.is_zero() {
                    cost += gas::CALL_VALUE;
                    if op == CALL && self.state.store().get(&to).map_or(true, Account::is_empty) {
                        cost += gas::NEW_ACCOUNT;
                    }
                }
                f.gas_dec(cost)?;
                let forward = gas::call_gas(f.gas, u256_to_u64_saturating(requested));
                f.gas -= forward;
                let stipend = if value.is_zero() { 0 } else { gas::CALL_STIPEND };
                f.pc += 1;
                f.return_data.clear();

                let (caller, address, value) = match op {
                    CALL | STATICCALL => (f.address, to, value),
                    CALLCODE => (f.address, f.address, value),
                    _ => (f.caller, f.address, f.value),
                };
                let msg = Message {
                    kind: match op {
                        CALL => CallKind::Call,
                        CALLCODE => CallKind::CallCode,
                        DELEGATECALL => CallKind::DelegateCall,
                        _ => CallKind::StaticCall,
                    },
                    caller,
                    address,
                    code_address: to,
                    value,
                    data: input,
                    gas: forward + stipend,
                    is_static: f.is_static || op == STATICCALL,
                    depth: f.depth + 1,
                };
                return Ok(Control::Call(msg, FrameKind::Call { ret_offset, ret_size }));
            }

            RETURN | REVERT => {
                let (offset, size) = (f.pop()?, f.pop()?);
                let out = f.read_memory(offset, size)?;
                let halt = if op == RETURN { Halt::Return } else { Halt::Revert };
                return Ok(Control::Halt(halt, out));
            }

            SELFDESTRUCT => {
                if f.is_static {
                    return Err(EvmError::StaticViolation);
                }
                let beneficiary = u256_to_h160(f.pop()?);
                let balance = self.state.store().balance(&f.address);
                let mut cost = gas::SELFDESTRUCT;
                if !balance.is_zero() && self.state.store().get(&beneficiary).map_or(true, Account::is_empty) {
                    cost += gas::NEW_ACCOUNT;
                }
                f.gas_dec(cost)?;
                if !self.selfdestructs.contains(&f.address) {
                    self.refund += gas::SELFDESTRUCT_REFUND;
                    self.selfdestructs.push(f.address);
                }
                self.state.add_balance(beneficiary, balance);
                self.state.set_balance(f.address, U256::zero());
                return Ok(Control::Halt(Halt::Stop, Vec::new()));
            }

            _ => return Err(EvmError::InvalidOpcode(op, f.pc)),
        }
        f.pc += 1;
        Ok(Control::Continue)
    }
}

impl Frame {
    fn push(&mut self, v: U256) -> Result<(), EvmError> {
        if self.stack.len() >= STACK_LIMIT {
            return Err(EvmError::StackOverflow);
        }
        self.stack.push(v);
        Ok(())
    }

    fn pop(&mut self) -> Result<U256, EvmError> {
        self.stack.pop().ok_or(EvmError::StackUnderflow)
    }

    // `a` is the top of the stack.
    fn binop<F: Fn(U256, U256) -> U256>(&mut self, f: F) -> Result<(), EvmError> {
        let a = self.pop()?;
        let b = self.pop()?;
        self.push(f(a, b))
    }

    fn unop<F: Fn(U256) -> U256>(&mut self, f: F) -> Result<(), EvmError> {
        let a = self.pop()?;
        self.push(f(a))
    }

    fn gas_dec(&mut self, amount: u64) -> Result<(), EvmError> {
        if self.gas < amount {
            self.gas = 0;
            return Err(EvmError::OutOfGas);
        }
        self.gas -= amount;
        Ok(())
    }

    fn charge_memory(&mut self, end: usize) -> Result<(), EvmError> {
        let before = gas::words(self.memory.len());
        let after = gas::words(end);
        if after > before {
            self.gas_dec(gas::memory_cost(after) - gas::memory_cost(before))?;
            self.memory.resize(after as usize * 32, 0);
        }
        Ok(())
    }

    /// Charge and expand memory for `[offset, offset + size)`. Empty ranges touch nothing.
    fn region(&mut self, offset: U256, size: U256) -> Result<Option<(usize, usize)>, EvmError> {
        if size.is_zero() {
            return Ok(None);
        }
        if offset > U256::from(MEMORY_LIMIT) || size > U256::from(MEMORY_LIMIT) {
            return Err(EvmError::OutOfGas);
        }
        let (o, s) = (offset.low_u64() as usize, size.low_u64() as usize);
        self.charge_memory(o + s)?;
        Ok(Some((o, s)))
    }

    fn word_region(&mut self, offset: U256) -> Result<usize, EvmError> {
        Ok(self.region(offset, U256::from(32))?.map_or(0, |(o, _)| o))
    }

    fn copy_region(&mut self, offset: U256, size: U256) -> Result<Option<(usize, usize)>, EvmError> {
        self.gas_dec(gas::COPY_WORD * words_of(size)?)?;
        self.region(offset, size)
    }

    fn read_memory(&mut self, offset: U256, size: U256) -> Result<Vec<u8>, EvmError> {
        Ok(match self.region(offset, size)? {
            Some((o, s)) => self.memory[o..o + s].to_vec(),
            None => Vec::new(),
        })
    }
}

fn words_of(size: U256) -> Result<u64, EvmError> {
    if size > U256::from(MEMORY_LIMIT) {
        return Err(EvmError::OutOfGas);
    }
    Ok(gas::words(size.low_u64() as usize))
}

fn copy_padded(dst: &mut [u8], src: &[u8], offset: U256) {
    let start = u256_to_usize(offset);
    for (i, b) in dst.iter_mut().enumerate() {
        *b = start.checked_add(i).and_then(|j| src.get(j)).copied().unwrap_or(0);
    }
}

/// EIP-2200 net gas metering: (cost, refund delta).
fn sstore_cost(original: U256, current: U256, new: U256) -> (u64, i64) {
    if current == new {
        return (gas::SLOAD, 0);
    }
    if original == current {
        if original.is_zero() {
            return (gas::SSTORE_SET, 0);
        }
        let refund = if new.is_zero() { gas::SSTORE_CLEARS_REFUND } else { 0 };
        return (gas::SSTORE_RESET, refund);
    }
    let mut refund = 0;
    if !original.is_zero() {
        if current.is_zero() {
            refund -= gas::SSTORE_CLEARS_REFUND;
        } else if new.is_zero() {
            refund += gas::SSTORE_CLEARS_REFUND;
        }
    }
    if original == new {
        refund += if original.is_zero() {
            (gas::SSTORE_SET - gas::SLOAD) as i64
        } else {
            (gas::SSTORE_RESET - gas::SLOAD) as i64
        };
    }
    (gas::SLOAD, refund)
}

pub fn scan_jumpdests(code: &[u8]) -> HashSet<usize> {
    let mut set = HashSet::new();
    let mut pc = 0usize;
    while pc < code.len() {
        let op = code[pc];
        if op == JUMPDEST {
            set.insert(pc);
        }
        pc += 1 + immediate_size(op);
    }
    set
}

pub fn create_address(from: H160, nonce: u64) -> H160 {
    let mut s = RlpStream::new_list(2);
    s.append(&from);
    s.append(&nonce);
    H160::from_slice(&keccak256(&s.out())[12..])
}

pub fn create2_address(from: H160, salt: U256, init: &[u8]) -> H160 {
    let mut buf = Vec::with_capacity(85);
    buf.push(0xff);
    buf.extend_from_slice(from.as_bytes());
    buf.extend_from_slice(u256_to_h256(salt).as_bytes());
    buf.extend_from_slice(keccak256(init).as_bytes());
    H160::from_slice(&keccak256(&buf)[12..])
}

pub fn is_precompile(addr: H160) -> bool {
    [1u64, 2, 4].iter().any(|n| addr == H160::from_low_u64_be(*n))
}

/// Run a precompiled contract. `None` when `addr` is not one; otherwise the
/// output and the gas it cost, or out-of-gas.
pub fn precompile(addr: H160, input: &[u8], gas_limit: u64) -> Option<Result<(Vec<u8>, u64), EvmError>> {
    if !is_precompile(addr) {
        return None;
    }
    let words = gas::words(input.len());
    let id = addr.to_low_u64_be();
    let cost = match id {
        1 => gas::ECRECOVER,
        2 => gas::SHA256 + gas::SHA256_WORD * words,
        _ => gas::IDENTITY + gas::IDENTITY_WORD * words,
    };
    if cost > gas_limit {
        return Some(Err(EvmError::OutOfGas));
    }
    let output = match id {
        1 => ecrecover(input),
        2 => Sha256::digest(input).to_vec(),
        _ => input.to_vec(),
    };
    Some(Ok((output, cost)))
}

fn ecrecover(input: &[u8]) -> Vec<u8> {
    let mut buf = [0u8; 128];
    let n = input.len().min(128);
    buf[..n].copy_from_slice(&input[..n]);
    let v = U256::from_big_endian(&buf[32..64]);
    if v != U256::from(27) && v != U256::from(28) {
        return Vec::new();
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&buf[..32]);
    match recover_unchecked(H256(hash), &buf[64..128], v.low_u32() as i32 - 27) {
        Ok(addr) => u256_to_h256(h160_to_u256(addr)).as_bytes().to_vec(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AccountStore;

    const CONTRACT: u64 = 0xc0de;
    const SENDER: u64 = 0x5e4d;

    fn addr(n: u64) -> H160 {
        H160::from_low_u64_be(n)
    }

    fn run_code(code: Vec<u8>, gas: u64) -> (ExecutionResult, JournaledState) {
        let mut store = AccountStore::new();
        store.insert(addr(CONTRACT), Account { code, ..Account::default() });
        store.insert(addr(SENDER), Account { balance: U256::from(1_000_000), ..Account::default() });
        let mut state = JournaledState::new(store);
        let block = BlockEnv { number: 5, chain_id: 43, ..BlockEnv::default() };
        let msg = Message::call(addr(SENDER), addr(CONTRACT), U256::zero(), Vec::new(), gas);
        let res = Evm::new(&mut state, &block, TxEnv::default()).transact(msg);
        (res, state)
    }

    fn returned_word(res: &ExecutionResult) -> U256 {
        U256::from_big_endian(&res.output)
    }

    // PUSH1 0; MSTORE; PUSH1 32; PUSH1 0; RETURN
    const RETURN_TOP: [u8; 8] = [0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];

    fn returning(mut prefix: Vec<u8>) -> Vec<u8> {
        prefix.extend_from_slice(&RETURN_TOP);
        prefix
    }

    #[test]
    fn simple_add() {
        // PUSH1 0x42; PUSH1 0xFF; ADD
        let (res, _) = run_code(returning(vec![0x60, 0x42, 0x60, 0xff, 0x01]), 100_000);
        assert_eq!(res.halt, Halt::Return);
        assert_eq!(returned_word(&res), U256::from(0x42 + 0xff));
    }

    #[test]
    fn sub_uses_top_as_minuend() {
        // PUSH1 3; PUSH1 10; SUB -> 10 - 3
        let (res, _) = run_code(returning(vec![0x60, 0x03, 0x60, 0x0a, 0x03]), 100_000);
        assert_eq!(returned_word(&res), U256::from(7));
    }

    #[test]
    fn gas_accounting_for_simple_program() {
        // PUSH1 1; PUSH1 2; ADD; STOP = 3 + 3 + 3
        let (res, _) = run_code(vec![0x60, 0x01, 0x60, 0x02, 0x01, 0x00], 1_000);
        assert_eq!(res.halt, Halt::Stop);
        assert_eq!(res.gas_left, 1_000 - 9);
    }

    #[test]
    fn invalid_opcode_consumes_all_gas() {
        let (res, _) = run_code(vec![0x60, 0x01, 0xfe], 50_000);
        assert_eq!(res.halt, Halt::Exception(EvmError::InvalidOpcode(0xfe, 2)));
        assert_eq!(res.gas_left, 0);
    }

    #[test]
    fn bad_jump_is_exceptional() {
        // PUSH1 3; JUMP; STOP
        let (res, _) = run_code(vec![0x60, 0x03, 0x56, 0x00], 50_000);
        assert_eq!(res.halt, Halt::Exception(EvmError::InvalidJump(3)));
    }

    #[test]
    fn jumpdest_inside_push_data_is_not_valid() {
        let dests = scan_jumpdests(&[0x60, 0x5b, 0x5b]);
        assert!(!dests.contains(&1));
        assert!(dests.contains(&2));
    }

    #[test]
    fn sstore_fresh_slot_costs_20k_and_revert_undoes_it() {
        // PUSH1 1; PUSH1 0; SSTORE; STOP
        let (res, state) = run_code(vec![0x60, 0x01, 0x60, 0x00, 0x55, 0x00], 100_000);
        assert_eq!(res.gas_left, 100_000 - 6 - 20_000);
        assert_eq!(state.store().storage(&addr(CONTRACT), U256::zero()), U256::one());

        // same store followed by PUSH1 0; PUSH1 0; REVERT
        let (res, state) =
            run_code(vec![0x60, 0x01, 0x60, 0x00, 0x55, 0x60, 0x00, 0x60, 0x00, 0xfd], 100_000);
        assert_eq!(res.halt, Halt::Revert);
        assert!(res.gas_left > 0);
        assert_eq!(state.store().storage(&addr(CONTRACT), U256::zero()), U256::zero());
    }

    #[test]
    fn eip2200_refund_when_slot_restored() {
        assert_eq!(sstore_cost(U256::zero(), U256::zero(), U256::one()), (20_000, 0));
        assert_eq!(sstore_cost(U256::zero(), U256::one(), U256::zero()), (800, 19_200));
        assert_eq!(sstore_cost(U256::one(), U256::one(), U256::zero()), (5_000, 15_000));
        assert_eq!(sstore_cost(U256::one(), U256::zero(), U256::one()), (800, -15_000 + 4_200));
    }

    #[test]
    fn logs_carry_address_and_topics() {
        // PUSH1 0xaa; PUSH1 0; PUSH1 0; LOG1; STOP
        let (res, _) = run_code(vec![0x60, 0xaa, 0x60, 0x00, 0x60, 0x00, 0xa1, 0x00], 100_000);
        assert_eq!(res.logs.len(), 1);
        assert_eq!(res.logs[0].address, addr(CONTRACT));
        assert_eq!(res.logs[0].topics, vec![u256_to_h256(U256::from(0xaa))]);
        assert_eq!(res.gas_left, 100_000 - 9 - 375 - 375);
    }

    #[test]
    fn calldataload_pads_with_zeros() {
        let mut store = AccountStore::new();
        // PUSH1 0; CALLDATALOAD; ...return
        store.insert(addr(CONTRACT), Account { code: returning(vec![0x60, 0x00, 0x35]), ..Account::default() });
        let mut state = JournaledState::new(store);
        let block = BlockEnv::default();
        let msg = Message::call(addr(SENDER), addr(CONTRACT), U256::zero(), vec![0xab], 100_000);
        let res = Evm::new(&mut state, &block, TxEnv::default()).transact(msg);
        assert_eq!(returned_word(&res), U256::from(0xab) << 248);
    }

    #[test]
    fn nested_call_revert_keeps_parent_changes() {
        // callee: PUSH1 7; PUSH1 1; SSTORE; PUSH1 0; PUSH1 0; REVERT
        let callee = vec![0x60, 0x07, 0x60, 0x01, 0x55, 0x60, 0x00, 0x60, 0x00, 0xfd];
        // caller: PUSH1 9; PUSH1 0; SSTORE;
        //         CALL(gas=0xffff, to=0xca11, value=0, in 0/0, out 0/0) -> result at slot 2
        let mut caller = vec![0x60, 0x09, 0x60, 0x00, 0x55];
        caller.extend_from_slice(&[
            0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x61, 0xca, 0x11, 0x61, 0xff, 0xff, 0xf1,
        ]);
        caller.extend_from_slice(&[0x60, 0x02, 0x55, 0x00]);

        let mut store = AccountStore::new();
        store.insert(addr(CONTRACT), Account { code: caller, ..Account::default() });
        store.insert(addr(0xca11), Account { code: callee, ..Account::default() });
        let mut state = JournaledState::new(store);
        let block = BlockEnv::default();
        let msg = Message::call(addr(SENDER), addr(CONTRACT), U256::zero(), Vec::new(), 200_000);
        let res = Evm::new(&mut state, &block, TxEnv::default()).transact(msg);

        assert_eq!(res.halt, Halt::Stop);
        let store = state.store();
        assert_eq!(store.storage(&addr(CONTRACT), U256::zero()), U256::from(9));
        assert_eq!(store.storage(&addr(0xca11), U256::one()), U256::zero());
        // CALL pushed 0 for the reverted child; storing 0 into a fresh slot leaves it empty.
        assert_eq!(store.storage(&addr(CONTRACT), U256::from(2)), U256::zero());
    }

    #[test]
    fn create_deploys_returned_runtime() {
        // init: store runtime byte 0x00 (STOP) ... return 1 byte of memory
        // PUSH1 0xfe; PUSH1 0; MSTORE8; PUSH1 1; PUSH1 0; RETURN
        let init = vec![0x60, 0xfe, 0x60, 0x00, 0x53, 0x60, 0x01, 0x60, 0x00, 0xf3];
        let mut state = JournaledState::new(AccountStore::new());
        let block = BlockEnv::default();
        let created = create_address(addr(SENDER), 0);
        let msg = Message::create(addr(SENDER), created, U256::zero(), init, 100_000);
        let res = Evm::new(&mut state, &block, TxEnv::default()).transact(msg);
        assert_eq!(res.created, Some(created));
        assert_eq!(state.store().code(&created), &[0xfe]);
        assert_eq!(state.store().nonce(&created), 1);
    }

    #[test]
    fn identity_precompile_charges_per_word() {
        let (out, cost) = precompile(addr(4), &[1, 2, 3], 100).unwrap().unwrap();
        assert_eq!(out, vec![1, 2, 3]);
        assert_eq!(cost, 18);
        assert!(matches!(precompile(addr(4), &[0; 64], 20), Some(Err(EvmError::OutOfGas))));
        assert!(precompile(addr(5), &[], 100).is_none());
    }

    #[test]
    fn sha256_precompile() {
        let (out, _) = precompile(addr(2), b"", 1_000).unwrap().unwrap();
        assert_eq!(hex::encode(out), "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }

    #[test]
    fn create_address_matches_known_vector() {
        let from: H160 = "6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0".parse().unwrap();
        assert_eq!(create_address(from, 0), "cd234a471b72ba2f1ccf0a70fcaba648a5eecd8d".parse().unwrap());
        assert_eq!(create_address(from, 1), "343c43a37d37dff08ae8c4a11544c718abb4fcf8".parse().unwrap());
    }

    #[test]
    fn create2_address_matches_eip_vector() {
        let addr = create2_address(H160::zero(), U256::zero(), &[0x00]);
        assert_eq!(addr, "4d1a2e2bb4f88f0250f26ffff098b0b30b26bf38".parse().unwrap());
    }

    #[test]
    fn blockhash_window() {
        let env = BlockEnv {
            number: 3,
            ancestor_hashes: vec![H256::repeat_byte(0), H256::repeat_byte(1), H256::repeat_byte(2)],
            ..BlockEnv::default()
        };
        assert_eq!(env.block_hash(U256::from(2)), H256::repeat_byte(2));
        assert_eq!(env.block_hash(U256::zero()), H256::repeat_byte(0));
        assert_eq!(env.block_hash(U256::from(3)), H256::zero());
    }
}
