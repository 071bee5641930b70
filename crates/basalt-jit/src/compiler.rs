//! Compilation driver
//!
//! Walks one program's bytecode in offset order and sequences prologue,
//! body and epilogue emission, reconciling the symbolic stack at every
//! merge point. The driver moves through
//!
//! ```text
//! Created -> Initialized -> PrologueEmitted -> BodyEmitted -> EpilogueEmitted -> Linked
//! ```
//!
//! and ends in `Failed(_)` if any step fails. Installation is done by the
//! caller once it holds the finished [`CompiledMethod`].

use basalt_bytecode::{decompose, Atom, AtomLookup, BytecodeProgram, DecodedInstr, Value};
use tracing::trace;

use crate::config::JitConfig;
use crate::error::{Bailout, CompileError, MethodStatus};
use crate::frame::FrameInfo;
use crate::ic::{FallbackFactory, IcAllocator, IcIndex, IcKind};
use crate::linker::{ExecutableCode, Linker};
use crate::lowering::lowering_for;
use crate::masm::{Address, Label, MacroAssembler, ValueReg};
use crate::method::CompiledMethod;

/// Where a compilation currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerState {
    Created,
    Initialized,
    PrologueEmitted,
    BodyEmitted,
    EpilogueEmitted,
    Linked,
    Installed,
    Failed(MethodStatus),
}

/// Baseline compiler for one program
pub struct BaselineCompiler<'a> {
    pub(crate) program: &'a BytecodeProgram,
    pub(crate) config: &'a JitConfig,
    atoms: &'a dyn AtomLookup,
    pub(crate) masm: MacroAssembler,
    pub(crate) frame: FrameInfo,
    pub(crate) ic: IcAllocator<'a>,
    return_label: Option<Label>,
    /// Bytecode offset of the opcode being lowered
    pub(crate) pc: usize,
    state: CompilerState,
}

impl<'a> BaselineCompiler<'a> {
    pub fn new(
        program: &'a BytecodeProgram,
        config: &'a JitConfig,
        atoms: &'a dyn AtomLookup,
        fallbacks: &'a dyn FallbackFactory,
    ) -> Self {
        Self {
            program,
            config,
            atoms,
            masm: MacroAssembler::new(),
            frame: FrameInfo::new(program.nslots(), program.nargs()),
            ic: IcAllocator::new(fallbacks, config.max_ic_entries, config.stub_space_limit),
            return_label: None,
            pc: 0,
            state: CompilerState::Created,
        }
    }

    pub fn state(&self) -> CompilerState {
        self.state
    }

    /// Emitted code so far
    pub fn masm(&self) -> &MacroAssembler {
        &self.masm
    }

    pub fn frame(&self) -> &FrameInfo {
        &self.frame
    }

    /// IC entries allocated so far
    pub fn ic_count(&self) -> usize {
        self.ic.len()
    }

    fn advance(&mut self, from: CompilerState, to: CompilerState) {
        assert_eq!(self.state, from, "compiler step out of order");
        self.state = to;
    }

    fn checked<T>(&mut self, result: Result<T, CompileError>) -> Result<T, CompileError> {
        if let Err(err) = &result {
            self.state = CompilerState::Failed(err.status());
        }
        result
    }

    /// Run every step through linking
    pub fn compile(mut self, linker: &dyn Linker) -> Result<CompiledMethod, CompileError> {
        self.init()?;
        self.emit_prologue()?;
        self.emit_body()?;
        self.emit_epilogue()?;
        let code = self.link(linker)?;
        Ok(self.finish(code))
    }

    /// Pre-checks, label table and frame setup
    pub fn init(&mut self) -> Result<(), CompileError> {
        let result = self.init_inner();
        self.checked(result)?;
        self.advance(CompilerState::Created, CompilerState::Initialized);
        Ok(())
    }

    fn init_inner(&mut self) -> Result<(), CompileError> {
        if self.program.needs_args_obj() {
            return Err(Bailout::ArgumentsObject.into());
        }
        let length = self.program.len();
        if length > self.config.max_script_length {
            return Err(Bailout::ScriptTooLarge {
                length,
                limit: self.config.max_script_length,
            }
            .into());
        }

        // One label per byte offset, then the shared return label
        self.masm.reserve_labels(length + 1)?;
        for _ in 0..length {
            self.masm.new_label();
        }
        self.return_label = Some(self.masm.new_label());
        Ok(())
    }

    /// Frame setup, local initialization and the stack-limit check
    pub fn emit_prologue(&mut self) -> Result<(), CompileError> {
        let nslots = self.program.nslots();
        self.masm.enter_frame(nslots);
        for slot in 0..nslots {
            self.masm.store_imm(Value::undefined(), Address::Local(slot));
        }
        self.masm.stack_check();
        self.advance(CompilerState::Initialized, CompilerState::PrologueEmitted);
        Ok(())
    }

    /// Lower every reachable opcode
    pub fn emit_body(&mut self) -> Result<(), CompileError> {
        let result = self.emit_body_inner();
        self.checked(result)?;
        self.advance(CompilerState::PrologueEmitted, CompilerState::BodyEmitted);
        Ok(())
    }

    fn emit_body_inner(&mut self) -> Result<(), CompileError> {
        let program = self.program;
        let mut prev_fell_through = false;

        for offset in program.offsets() {
            let Some(info) = program.info(offset).copied() else {
                prev_fell_through = false;
                continue;
            };
            let instr = program.decode_at(offset)?;

            if info.jump_target {
                self.bind_merge(offset, info.stack_depth, prev_fell_through);
            } else if prev_fell_through {
                assert_eq!(
                    self.frame.stack_depth(),
                    info.stack_depth,
                    "stack depth mismatch at offset {offset}"
                );
            }

            if self.config.debug_mode {
                self.frame.sync_stack(&mut self.masm, 0);
            } else if self.frame.stack_depth() > 2 {
                self.frame.sync_stack(&mut self.masm, 2);
            }
            self.frame.assert_valid_state();

            trace!(
                pc = offset,
                op = %instr.opcode,
                depth = self.frame.stack_depth(),
                "lowering"
            );
            self.pc = offset;
            self.lower(&instr)?;
            prev_fell_through = instr.opcode.falls_through();
        }
        Ok(())
    }

    /// Flush the stack and bind the label of jump target `offset`.
    ///
    /// A fall-through predecessor must arrive with the declared depth, both
    /// symbolically and on the machine stack. Other predecessors jumped here
    /// with a synced stack, so the declared depth is adopted.
    fn bind_merge(&mut self, offset: usize, depth: u32, fell_through: bool) {
        self.frame.sync_stack(&mut self.masm, 0);
        if fell_through {
            assert_eq!(
                self.frame.stack_depth(),
                depth,
                "stack depth mismatch at merge {offset}"
            );
            assert_eq!(
                self.masm.frame_pushed(),
                depth,
                "machine stack height mismatch at merge {offset}"
            );
        }
        self.frame.set_stack_depth(depth);
        self.masm.set_frame_pushed(depth);
        let label = self.label_of(offset);
        self.masm.bind(label);
    }

    fn lower(&mut self, instr: &DecodedInstr) -> Result<(), CompileError> {
        if let Some(lower) = lowering_for(instr.opcode) {
            return lower(self, instr);
        }
        let unsupported = || Bailout::UnsupportedOpcode {
            opcode: instr.opcode,
            offset: instr.offset,
        };
        let parts = decompose(instr).ok_or_else(unsupported)?;
        for part in &parts {
            let lower = lowering_for(part.opcode).ok_or_else(unsupported)?;
            lower(self, part)?;
        }
        Ok(())
    }

    /// Shared return path
    pub fn emit_epilogue(&mut self) -> Result<(), CompileError> {
        let label = self.return_label();
        self.masm.bind(label);
        self.masm.leave_frame();
        self.masm.ret();
        self.advance(CompilerState::BodyEmitted, CompilerState::EpilogueEmitted);
        Ok(())
    }

    /// Hand the emitted code to `linker`
    pub fn link(&mut self, linker: &dyn Linker) -> Result<ExecutableCode, CompileError> {
        let masm = std::mem::take(&mut self.masm);
        let result = linker.link(masm).map_err(CompileError::from);
        let code = self.checked(result)?;
        self.advance(CompilerState::EpilogueEmitted, CompilerState::Linked);
        Ok(code)
    }

    /// Build the artifact from linked code
    pub fn finish(mut self, code: ExecutableCode) -> CompiledMethod {
        self.advance(CompilerState::Linked, CompilerState::Installed);
        let (entries, stubs) = self.ic.into_parts();
        CompiledMethod::new(code, entries, stubs)
    }

    // ===== Helpers for lowering routines =====

    /// Label of the instruction at bytecode offset `offset`
    pub(crate) fn label_of(&self, offset: usize) -> Label {
        debug_assert!(offset < self.program.len());
        Label(offset as u32)
    }

    pub(crate) fn return_label(&self) -> Label {
        match self.return_label {
            Some(label) => label,
            None => panic!("return label used before init"),
        }
    }

    /// Allocate an IC site for the current opcode and call through it
    pub(crate) fn emit_ic(&mut self, kind: IcKind) -> Result<IcIndex, CompileError> {
        let index = self.ic.allocate(kind, self.pc)?;
        let ret = self.masm.call_ic(index);
        self.ic.set_return_offset(index, ret);
        Ok(index)
    }

    /// Runtime atom for the program's atom operand `index`
    pub(crate) fn resolve_atom(&self, index: u32) -> Result<Atom, CompileError> {
        let text = self
            .program
            .atom_text(index)
            .ok_or_else(|| CompileError::UnknownAtom(format!("#{index}")))?;
        self.atoms
            .lookup(text)
            .ok_or_else(|| CompileError::UnknownAtom(text.to_string()))
    }

    /// Pop the top value, checking the return channel is the only live one
    pub(crate) fn pop_return_value(&mut self) {
        self.frame.pop_value(&mut self.masm, ValueReg::R0);
        assert_eq!(self.frame.stack_depth(), 0, "values left on stack at return");
    }
}
