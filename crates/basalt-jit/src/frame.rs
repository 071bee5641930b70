//! Symbolic operand stack
//!
//! `FrameInfo` records, for every logical operand stack entry, where its
//! value currently lives: a compile-time constant, a value register, a local
//! or argument slot, or the machine stack. Code is only emitted when a value
//! has to move.
//!
//! Invariants:
//! - spilled entries form a contiguous prefix, so the machine operand stack
//!   height equals the number of spilled entries;
//! - at most one entry claims a given register; claiming a register syncs
//!   the previous claimant (and everything below it) to memory.

use basalt_bytecode::{Value, ValueType};

use crate::masm::{Address, MacroAssembler, ValueReg};

/// Where a stack entry's value lives
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StackValueKind {
    Constant(Value),
    Register(ValueReg),
    LocalSlot(u32),
    ArgSlot(u32),
    /// On the machine stack at the given operand stack slot
    Spilled(u32),
}

/// One operand stack entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StackValue {
    pub kind: StackValueKind,
    /// Statically known type of the value, if any
    pub known_type: Option<ValueType>,
}

impl StackValue {
    pub fn constant(value: Value) -> Self {
        Self {
            kind: StackValueKind::Constant(value),
            known_type: Some(value.value_type()),
        }
    }

    pub fn register(reg: ValueReg) -> Self {
        Self {
            kind: StackValueKind::Register(reg),
            known_type: None,
        }
    }

    pub fn local(slot: u32) -> Self {
        Self {
            kind: StackValueKind::LocalSlot(slot),
            known_type: None,
        }
    }

    pub fn arg(index: u32) -> Self {
        Self {
            kind: StackValueKind::ArgSlot(index),
            known_type: None,
        }
    }

    pub fn with_type(mut self, ty: ValueType) -> Self {
        self.known_type = Some(ty);
        self
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.kind, StackValueKind::Spilled(_))
    }

    pub fn register_claim(&self) -> Option<ValueReg> {
        match self.kind {
            StackValueKind::Register(reg) => Some(reg),
            _ => None,
        }
    }
}

/// Symbolic operand stack of the function being compiled
#[derive(Debug, Clone)]
pub struct FrameInfo {
    stack: Vec<StackValue>,
    nslots: u32,
    nargs: u32,
}

impl FrameInfo {
    pub fn new(nslots: u32, nargs: u32) -> Self {
        Self {
            stack: Vec::new(),
            nslots,
            nargs,
        }
    }

    pub fn nslots(&self) -> u32 {
        self.nslots
    }

    pub fn nargs(&self) -> u32 {
        self.nargs
    }

    /// Number of logical entries
    #[inline]
    pub fn stack_depth(&self) -> u32 {
        self.stack.len() as u32
    }

    /// Number of entries living on the machine stack
    pub fn spilled_count(&self) -> u32 {
        self.stack.iter().take_while(|v| v.is_spilled()).count() as u32
    }

    /// Entry `n` from the top (1 = top)
    pub fn peek(&self, n: u32) -> &StackValue {
        let depth = self.stack_depth();
        assert!(n >= 1 && n <= depth, "peek({n}) with stack depth {depth}");
        &self.stack[(depth - n) as usize]
    }

    /// Check if entry `n` from the top is known to hold a boolean
    pub fn is_known_boolean(&self, n: u32) -> bool {
        self.peek(n).known_type == Some(ValueType::Boolean)
    }

    pub fn address_of_local(&self, slot: u32) -> Address {
        Address::Local(slot)
    }

    pub fn address_of_arg(&self, index: u32) -> Address {
        Address::Arg(index)
    }

    /// Address of a synced entry
    pub fn address_of_stack_value(&self, value: &StackValue) -> Address {
        match value.kind {
            StackValueKind::Spilled(slot) => Address::Stack(slot),
            StackValueKind::LocalSlot(slot) => Address::Local(slot),
            StackValueKind::ArgSlot(index) => Address::Arg(index),
            kind => panic!("{kind:?} has no address"),
        }
    }

    // ===== Pushes =====

    /// Push an entry, evicting any earlier claimant of its register
    pub fn push(&mut self, masm: &mut MacroAssembler, value: StackValue) {
        if let Some(reg) = value.register_claim() {
            self.evict(masm, reg);
        }
        self.stack.push(value);
    }

    pub fn push_constant(&mut self, value: Value) {
        self.stack.push(StackValue::constant(value));
    }

    pub fn push_local(&mut self, slot: u32) {
        debug_assert!(slot < self.nslots);
        self.stack.push(StackValue::local(slot));
    }

    pub fn push_arg(&mut self, index: u32) {
        debug_assert!(index < self.nargs);
        self.stack.push(StackValue::arg(index));
    }

    pub fn push_reg(&mut self, masm: &mut MacroAssembler, reg: ValueReg) {
        self.push(masm, StackValue::register(reg));
    }

    pub fn push_reg_typed(&mut self, masm: &mut MacroAssembler, reg: ValueReg, ty: ValueType) {
        self.push(masm, StackValue::register(reg).with_type(ty));
    }

    /// Push the frame scratch slot onto the machine stack as a new entry
    pub fn push_scratch_value(&mut self, masm: &mut MacroAssembler) {
        self.sync_stack(masm, 0);
        let slot = self.stack_depth();
        masm.push_from(Address::Scratch);
        self.stack.push(StackValue {
            kind: StackValueKind::Spilled(slot),
            known_type: None,
        });
    }

    // ===== Pops =====

    /// Pop the top entry into `reg`
    pub fn pop_value(&mut self, masm: &mut MacroAssembler, reg: ValueReg) {
        let Some(value) = self.stack.pop() else {
            panic!("pop_value on empty operand stack");
        };
        match value.kind {
            StackValueKind::Constant(v) => masm.move_imm(v, reg),
            StackValueKind::LocalSlot(slot) => masm.load(Address::Local(slot), reg),
            StackValueKind::ArgSlot(index) => masm.load(Address::Arg(index), reg),
            StackValueKind::Register(src) if src != reg => masm.move_value(src, reg),
            StackValueKind::Register(_) => {}
            StackValueKind::Spilled(_) => masm.pop(reg),
        }
    }

    /// Discard the top entry
    pub fn pop(&mut self, masm: &mut MacroAssembler) {
        self.popn(masm, 1);
    }

    /// Discard the top `n` entries, releasing any machine stack they occupy
    pub fn popn(&mut self, masm: &mut MacroAssembler, n: u32) {
        let depth = self.stack_depth();
        assert!(n <= depth, "popn({n}) with stack depth {depth}");
        let keep = (depth - n) as usize;
        let spilled = self.stack[keep..].iter().filter(|v| v.is_spilled()).count();
        self.stack.truncate(keep);
        masm.free_stack(spilled as u32);
    }

    /// Force the top `uses` entries into registers (R0 for the deeper, R1 for
    /// the top) after flushing everything below them
    pub fn pop_regs_and_sync(&mut self, masm: &mut MacroAssembler, uses: u32) {
        assert!(
            (1..=2).contains(&uses) && uses <= self.stack_depth(),
            "pop_regs_and_sync({uses}) with stack depth {}",
            self.stack_depth()
        );
        self.sync_stack(masm, uses);

        match uses {
            1 => self.pop_value(masm, ValueReg::R0),
            _ => {
                let depth = self.stack.len();
                if self.stack[depth - 2].register_claim() == Some(ValueReg::R1) {
                    if self.stack[depth - 1].register_claim() == Some(ValueReg::R2) {
                        // No free register; park the deeper value in memory
                        self.sync_through(masm, depth - 2);
                    } else {
                        masm.move_value(ValueReg::R1, ValueReg::R2);
                        self.stack[depth - 2].kind = StackValueKind::Register(ValueReg::R2);
                    }
                }
                self.pop_value(masm, ValueReg::R1);
                self.pop_value(masm, ValueReg::R0);
            }
        }
    }

    // ===== Syncing =====

    /// Flush all but the top `keep_top` entries to the machine stack
    pub fn sync_stack(&mut self, masm: &mut MacroAssembler, keep_top: u32) {
        let end = self.stack.len().saturating_sub(keep_top as usize);
        if end > 0 {
            self.sync_through(masm, end - 1);
        }
    }

    /// Flush entries below the top that alias local `slot`
    pub fn sync_local_aliases(&mut self, masm: &mut MacroAssembler, slot: u32) {
        self.sync_aliases(masm, StackValueKind::LocalSlot(slot));
    }

    /// Flush entries below the top that alias argument `index`
    pub fn sync_arg_aliases(&mut self, masm: &mut MacroAssembler, index: u32) {
        self.sync_aliases(masm, StackValueKind::ArgSlot(index));
    }

    fn sync_aliases(&mut self, masm: &mut MacroAssembler, kind: StackValueKind) {
        let below_top = self.stack.len().saturating_sub(1);
        if let Some(idx) = self.stack[..below_top].iter().rposition(|v| v.kind == kind) {
            self.sync_through(masm, idx);
        }
    }

    /// Flush entries `0..=idx`
    fn sync_through(&mut self, masm: &mut MacroAssembler, idx: usize) {
        for i in 0..=idx {
            self.sync(masm, i);
        }
    }

    fn sync(&mut self, masm: &mut MacroAssembler, i: usize) {
        let value = &mut self.stack[i];
        match value.kind {
            StackValueKind::Spilled(_) => return,
            StackValueKind::Constant(v) => masm.push_imm(v),
            StackValueKind::Register(reg) => masm.push(reg),
            StackValueKind::LocalSlot(slot) => masm.push_from(Address::Local(slot)),
            StackValueKind::ArgSlot(index) => masm.push_from(Address::Arg(index)),
        }
        value.kind = StackValueKind::Spilled(i as u32);
    }

    fn evict(&mut self, masm: &mut MacroAssembler, reg: ValueReg) {
        if let Some(idx) = self.stack.iter().position(|v| v.register_claim() == Some(reg)) {
            self.sync_through(masm, idx);
        }
    }

    /// A register no entry claims, syncing below the top if all are taken
    pub fn free_register(&mut self, masm: &mut MacroAssembler) -> ValueReg {
        let claimed =
            |frame: &Self, reg| frame.stack.iter().any(|v| v.register_claim() == Some(reg));
        if let Some(reg) = ValueReg::ALL.into_iter().find(|&r| !claimed(self, r)) {
            return reg;
        }
        self.sync_stack(masm, 1);
        ValueReg::ALL
            .into_iter()
            .find(|&r| !claimed(self, r))
            .unwrap_or(ValueReg::R0)
    }

    /// Store `value` to `dst`, going through `scratch` for memory operands
    pub fn store_value(
        &self,
        masm: &mut MacroAssembler,
        value: &StackValue,
        dst: Address,
        scratch: ValueReg,
    ) {
        match value.kind {
            StackValueKind::Constant(v) => masm.store_imm(v, dst),
            StackValueKind::Register(reg) => masm.store(reg, dst),
            StackValueKind::LocalSlot(_)
            | StackValueKind::ArgSlot(_)
            | StackValueKind::Spilled(_) => {
                masm.load(self.address_of_stack_value(value), scratch);
                masm.store(scratch, dst);
            }
        }
    }

    // ===== Merges =====

    /// Reconcile the logical depth with a declared depth; growing adds
    /// spilled entries, shrinking truncates
    pub fn set_stack_depth(&mut self, depth: u32) {
        let current = self.stack_depth();
        if depth <= current {
            self.stack.truncate(depth as usize);
        } else {
            for slot in current..depth {
                self.stack.push(StackValue {
                    kind: StackValueKind::Spilled(slot),
                    known_type: None,
                });
            }
        }
    }

    /// Check the structural invariants
    pub fn assert_valid_state(&self) {
        let spilled = self.spilled_count() as usize;
        for (i, v) in self.stack.iter().enumerate() {
            match v.kind {
                StackValueKind::Spilled(slot) => {
                    assert!(i < spilled, "spilled entry {i} above unsynced entries");
                    assert_eq!(slot as usize, i, "spilled entry {i} at slot {slot}");
                }
                StackValueKind::Register(reg) => {
                    let claimants = self
                        .stack
                        .iter()
                        .filter(|o| o.register_claim() == Some(reg))
                        .count();
                    assert_eq!(claimants, 1, "{reg} claimed {claimants} times");
                }
                _ => {}
            }
        }
    }

    /// Entries bottom to top
    pub fn entries(&self) -> &[StackValue] {
        &self.stack
    }
}
