//! Abstract code emitter
//!
//! `MacroAssembler` appends virtual instructions, hands out labels for
//! not-yet-known code offsets and records the patch sites where IC entry
//! addresses are embedded. Labels and patch sites are resolved by a
//! [`Linker`](crate::linker::Linker).

mod inst;

pub use inst::{Address, CodeOffset, Inst, ValueReg};

use basalt_bytecode::Value;
use std::fmt;

use crate::error::CompileError;
use crate::ic::IcIndex;

/// Deferred code offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub(crate) u32);

impl Label {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Reference to "the address of IC entry `entry`", embedded by the `CallIc`
/// at `offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSite {
    pub offset: CodeOffset,
    pub entry: IcIndex,
}

/// Virtual-ISA emitter
#[derive(Debug, Default)]
pub struct MacroAssembler {
    code: Vec<Inst<Label>>,
    labels: Vec<Option<CodeOffset>>,
    patches: Vec<PatchSite>,
    frame_pushed: u32,
}

impl MacroAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve room for `n` more labels up front
    pub fn reserve_labels(&mut self, n: usize) -> Result<(), CompileError> {
        self.labels
            .try_reserve(n)
            .map_err(|_| CompileError::LabelAllocation(n))
    }

    /// Create an unbound label
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    /// Bind `label` to the current offset
    pub fn bind(&mut self, label: Label) {
        let offset = self.current_offset();
        let slot = &mut self.labels[label.0 as usize];
        assert!(slot.is_none(), "{label} bound twice");
        *slot = Some(offset);
    }

    /// Offset `label` is bound to, if bound
    pub fn label_offset(&self, label: Label) -> Option<CodeOffset> {
        self.labels.get(label.0 as usize).copied().flatten()
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Offset of the next instruction to be emitted
    pub fn current_offset(&self) -> CodeOffset {
        self.code.len() as CodeOffset
    }

    /// Statically tracked machine stack height within straight-line code
    pub fn frame_pushed(&self) -> u32 {
        self.frame_pushed
    }

    /// Reset the tracked height at a merge point
    pub fn set_frame_pushed(&mut self, height: u32) {
        self.frame_pushed = height;
    }

    /// Emitted instructions
    pub fn code(&self) -> &[Inst<Label>] {
        &self.code
    }

    /// Recorded IC patch sites, in emission order
    pub fn patches(&self) -> &[PatchSite] {
        &self.patches
    }

    /// Split into instructions, label table and patch sites
    pub fn into_parts(self) -> (Vec<Inst<Label>>, Vec<Option<CodeOffset>>, Vec<PatchSite>) {
        (self.code, self.labels, self.patches)
    }

    fn emit(&mut self, inst: Inst<Label>) {
        let height = self.frame_pushed as i64 + inst.stack_delta();
        assert!(height >= 0, "{inst} pops below the frame");
        self.frame_pushed = height as u32;
        self.code.push(inst);
    }

    // ===== Frame =====

    pub fn enter_frame(&mut self, nslots: u32) {
        self.emit(Inst::EnterFrame { nslots });
    }

    pub fn leave_frame(&mut self) {
        self.emit(Inst::LeaveFrame);
    }

    pub fn ret(&mut self) {
        self.emit(Inst::Ret);
    }

    pub fn stack_check(&mut self) {
        self.emit(Inst::StackCheck);
    }

    // ===== Moves =====

    pub fn move_value(&mut self, src: ValueReg, dst: ValueReg) {
        self.emit(Inst::MoveValue { src, dst });
    }

    pub fn move_imm(&mut self, value: Value, dst: ValueReg) {
        self.emit(Inst::MoveImm { value, dst });
    }

    pub fn load(&mut self, src: Address, dst: ValueReg) {
        self.emit(Inst::Load { src, dst });
    }

    pub fn store(&mut self, src: ValueReg, dst: Address) {
        self.emit(Inst::Store { src, dst });
    }

    pub fn store_imm(&mut self, value: Value, dst: Address) {
        self.emit(Inst::StoreImm { value, dst });
    }

    pub fn move_argc(&mut self, argc: u32) {
        self.emit(Inst::MoveArgc(argc));
    }

    pub fn not_boolean(&mut self, reg: ValueReg) {
        self.emit(Inst::NotBoolean(reg));
    }

    // ===== Machine stack =====

    pub fn push(&mut self, reg: ValueReg) {
        self.emit(Inst::Push(reg));
    }

    pub fn push_imm(&mut self, value: Value) {
        self.emit(Inst::PushImm(value));
    }

    pub fn push_from(&mut self, src: Address) {
        self.emit(Inst::PushFrom(src));
    }

    pub fn pop(&mut self, dst: ValueReg) {
        self.emit(Inst::Pop(dst));
    }

    pub fn free_stack(&mut self, count: u32) {
        if count > 0 {
            self.emit(Inst::FreeStack(count));
        }
    }

    // ===== Control flow =====

    pub fn jump(&mut self, target: Label) {
        self.emit(Inst::Jump(target));
    }

    pub fn branch_test(&mut self, reg: ValueReg, when: bool, target: Label) {
        self.emit(Inst::BranchTest { reg, when, target });
    }

    pub fn branch_if_number(&mut self, reg: ValueReg, target: Label) {
        self.emit(Inst::BranchIfNumber { reg, target });
    }

    /// Call through IC entry `entry`; returns the call's return offset
    pub fn call_ic(&mut self, entry: IcIndex) -> CodeOffset {
        let offset = self.current_offset();
        let patch = self.patches.len() as u32;
        self.patches.push(PatchSite { offset, entry });
        self.emit(Inst::CallIc { patch });
        self.current_offset()
    }
}

impl fmt::Display for MacroAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (offset, inst) in self.code.iter().enumerate() {
            for (index, bound) in self.labels.iter().enumerate() {
                if *bound == Some(offset as CodeOffset) {
                    writeln!(f, "L{index}:")?;
                }
            }
            writeln!(f, "  {offset:4}  {inst}")?;
        }
        Ok(())
    }
}
