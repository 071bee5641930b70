//! Execution of linked baseline code
//!
//! `Machine` interprets the virtual instruction set produced by the
//! compiler. It owns the machine stack shared by all activations and the
//! [`Host`] that supplies names, globals, objects and callables. IC sites
//! dispatch through their entry's stub chain with an [`IcFrame`] giving
//! stubs access to the registers and the machine.

mod fallback;
mod host;

pub use fallback::DefaultFallbacks;
pub use host::{CallResult, GlobalHost, Host, HostObject, NativeFn};

use basalt_bytecode::{Atom, AtomTable, Value};
use std::sync::Arc;

use crate::config::JitConfig;
use crate::ic::{IcEntry, StubResult};
use crate::masm::{Address, CodeOffset, Inst, ValueReg};
use crate::method::CompiledMethod;
use crate::script::Script;

/// Runtime error raised by generated code or a stub
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("Script '{0}' has no baseline code")]
    NotCompiled(String),
    #[error("Too much recursion (depth {depth})")]
    StackOverflow { depth: u32 },
    #[error("TypeError: {0}")]
    TypeError(String),
    #[error("ReferenceError: {0} is not defined")]
    ReferenceError(String),
    #[error("Value is not callable")]
    NotCallable,
    #[error("IC patch slot {0} is unresolved")]
    UnpatchedIcSite(u32),
    #[error("Stub chain of IC entry {0} ended without handling the operation")]
    IcChainExhausted(u32),
    #[error("Machine stack underflow")]
    StackUnderflow,
    #[error("Bad address {0}")]
    BadAddress(String),
    #[error("Code offset {0} out of range")]
    PcOutOfRange(CodeOffset),
    #[error("Host error: {0}")]
    Host(String),
}

/// State a stub operates on
pub struct IcFrame<'a> {
    pub vm: &'a mut Machine,
    pub regs: &'a mut [Value; 3],
    /// Staged right-hand value of set operations
    pub scratch: &'a mut Value,
    pub argc: u32,
    pub entry: &'a IcEntry,
}

impl IcFrame<'_> {
    #[inline]
    pub fn reg(&self, reg: ValueReg) -> Value {
        self.regs[reg.index()]
    }

    #[inline]
    pub fn set_reg(&mut self, reg: ValueReg, value: Value) {
        self.regs[reg.index()] = value;
    }
}

/// Per-activation register file
struct Activation {
    regs: [Value; 3],
    scratch: Value,
    argc: u32,
    fp: usize,
    nslots: u32,
    args: Vec<Value>,
}

/// Interpreter for linked baseline code
pub struct Machine {
    host: Box<dyn Host>,
    atoms: Arc<AtomTable>,
    stack: Vec<Value>,
    depth: u32,
    max_depth: u32,
}

impl Machine {
    pub fn new(host: Box<dyn Host>, atoms: Arc<AtomTable>, config: &JitConfig) -> Self {
        Self {
            host,
            atoms,
            stack: Vec::with_capacity(256),
            depth: 0,
            max_depth: config.max_native_depth,
        }
    }

    pub fn host(&self) -> &dyn Host {
        &*self.host
    }

    pub fn host_mut(&mut self) -> &mut dyn Host {
        &mut *self.host
    }

    pub fn atoms(&self) -> &Arc<AtomTable> {
        &self.atoms
    }

    /// Machine stack, bottom first
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    /// Current native nesting depth
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Run `script`'s installed baseline code
    pub fn execute(&mut self, script: &Script, args: &[Value]) -> Result<Value, VmError> {
        let method = script
            .baseline()
            .ok_or_else(|| VmError::NotCompiled(script.name().to_string()))?;

        let base = self.stack.len();
        self.depth += 1;
        let result = self.run(&method, script.program().nargs(), args);
        self.depth -= 1;

        if result.is_err() {
            self.stack.truncate(base);
        }
        debug_assert_eq!(self.stack.len(), base);
        result
    }

    fn run(
        &mut self,
        method: &CompiledMethod,
        nargs: u32,
        args: &[Value],
    ) -> Result<Value, VmError> {
        let code = method.code();
        let mut args = args.to_vec();
        if args.len() < nargs as usize {
            args.resize(nargs as usize, Value::undefined());
        }
        let mut act = Activation {
            regs: [Value::undefined(); 3],
            scratch: Value::undefined(),
            argc: 0,
            fp: self.stack.len(),
            nslots: 0,
            args,
        };

        let mut pc = code.entry();
        loop {
            let inst = *code.inst(pc).ok_or(VmError::PcOutOfRange(pc))?;
            pc += 1;

            match inst {
                Inst::EnterFrame { nslots } => {
                    act.fp = self.stack.len();
                    act.nslots = nslots;
                    self.stack
                        .resize(act.fp + nslots as usize, Value::undefined());
                }
                Inst::LeaveFrame => self.stack.truncate(act.fp),
                Inst::Ret => return Ok(act.regs[0]),
                Inst::StackCheck => {
                    if self.depth > self.max_depth {
                        return Err(VmError::StackOverflow { depth: self.depth });
                    }
                }

                Inst::MoveValue { src, dst } => act.regs[dst.index()] = act.regs[src.index()],
                Inst::MoveImm { value, dst } => act.regs[dst.index()] = value,
                Inst::Load { src, dst } => act.regs[dst.index()] = self.read(&act, src)?,
                Inst::Store { src, dst } => {
                    let value = act.regs[src.index()];
                    self.write(&mut act, dst, value)?;
                }
                Inst::StoreImm { value, dst } => self.write(&mut act, dst, value)?,

                Inst::Push(reg) => self.stack.push(act.regs[reg.index()]),
                Inst::PushImm(value) => self.stack.push(value),
                Inst::PushFrom(src) => {
                    let value = self.read(&act, src)?;
                    self.stack.push(value);
                }
                Inst::Pop(reg) => {
                    if self.stack.len() <= act.fp + act.nslots as usize {
                        return Err(VmError::StackUnderflow);
                    }
                    act.regs[reg.index()] = self.stack.pop().ok_or(VmError::StackUnderflow)?;
                }
                Inst::FreeStack(n) => {
                    let len = self
                        .stack
                        .len()
                        .checked_sub(n as usize)
                        .filter(|&len| len >= act.fp + act.nslots as usize)
                        .ok_or(VmError::StackUnderflow)?;
                    self.stack.truncate(len);
                }

                Inst::MoveArgc(n) => act.argc = n,
                Inst::NotBoolean(reg) => {
                    let b = expect_bool(act.regs[reg.index()])?;
                    act.regs[reg.index()] = Value::bool(!b);
                }

                Inst::Jump(target) => pc = target,
                Inst::BranchTest { reg, when, target } => {
                    if expect_bool(act.regs[reg.index()])? == when {
                        pc = target;
                    }
                }
                Inst::BranchIfNumber { reg, target } => {
                    if act.regs[reg.index()].is_number() {
                        pc = target;
                    }
                }

                Inst::CallIc { patch } => self.call_ic(method, patch, &mut act)?,
            }
        }
    }

    fn call_ic(
        &mut self,
        method: &CompiledMethod,
        patch: u32,
        act: &mut Activation,
    ) -> Result<(), VmError> {
        let index = method
            .code()
            .ic_slot(patch)
            .ok_or(VmError::UnpatchedIcSite(patch))?;
        let entry = method
            .ic_entry(index)
            .ok_or(VmError::UnpatchedIcSite(patch))?;

        let mut cursor = Some(entry.first_stub());
        while let Some(id) = cursor {
            let (code, next) = method
                .stub(id)
                .ok_or(VmError::IcChainExhausted(index.0))?;
            let mut frame = IcFrame {
                vm: self,
                regs: &mut act.regs,
                scratch: &mut act.scratch,
                argc: act.argc,
                entry,
            };
            match code(&mut frame)? {
                StubResult::Done => return Ok(()),
                StubResult::Next => cursor = next,
            }
        }
        Err(VmError::IcChainExhausted(index.0))
    }

    fn read(&self, act: &Activation, addr: Address) -> Result<Value, VmError> {
        let value = match addr {
            Address::Local(i) => self.stack.get(act.fp + i as usize).copied(),
            Address::Stack(i) => self
                .stack
                .get(act.fp + act.nslots as usize + i as usize)
                .copied(),
            Address::Arg(i) => act.args.get(i as usize).copied(),
            Address::Scratch => Some(act.scratch),
        };
        value.ok_or_else(|| VmError::BadAddress(addr.to_string()))
    }

    fn write(&mut self, act: &mut Activation, addr: Address, value: Value) -> Result<(), VmError> {
        let slot = match addr {
            Address::Local(i) => self.stack.get_mut(act.fp + i as usize),
            Address::Stack(i) => self
                .stack
                .get_mut(act.fp + act.nslots as usize + i as usize),
            Address::Arg(i) => act.args.get_mut(i as usize),
            Address::Scratch => Some(&mut act.scratch),
        };
        let slot = slot.ok_or_else(|| VmError::BadAddress(addr.to_string()))?;
        *slot = value;
        Ok(())
    }

    /// Text of a string value's atom
    pub(crate) fn atom_text(&self, atom: Atom) -> Option<Arc<str>> {
        use basalt_bytecode::AtomLookup;
        self.atoms.text(atom)
    }
}

fn expect_bool(value: Value) -> Result<bool, VmError> {
    value
        .as_bool()
        .ok_or_else(|| VmError::TypeError(format!("expected boolean, got {value}")))
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("stack", &self.stack.len())
            .field("depth", &self.depth)
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}
