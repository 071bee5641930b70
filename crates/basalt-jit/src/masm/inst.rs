//! Virtual instruction set
//!
//! A small register/stack machine close enough to real hardware that the
//! baseline compiler's decisions (what lives in a register, what is pushed,
//! when the stack is flushed) are visible in the emitted code.

use basalt_bytecode::Value;
use std::fmt;

/// Offset of an instruction in linked code
pub type CodeOffset = u32;

/// Value registers available to generated code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueReg {
    R0,
    R1,
    R2,
}

impl ValueReg {
    /// Every value register, in allocation order
    pub const ALL: [ValueReg; 3] = [ValueReg::R0, ValueReg::R1, ValueReg::R2];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ValueReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueReg::R0 => f.write_str("r0"),
            ValueReg::R1 => f.write_str("r1"),
            ValueReg::R2 => f.write_str("r2"),
        }
    }
}

/// Frame-relative memory operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    /// Local slot; indexes past the slot count reach into the operand stack
    Local(u32),
    /// Formal argument
    Arg(u32),
    /// Operand stack slot, counted from the bottom
    Stack(u32),
    /// Frame scratch slot used to stage right-hand values around IC calls
    Scratch,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Local(i) => write!(f, "[local {i}]"),
            Address::Arg(i) => write!(f, "[arg {i}]"),
            Address::Stack(i) => write!(f, "[stack {i}]"),
            Address::Scratch => f.write_str("[scratch]"),
        }
    }
}

/// One virtual instruction; `T` is the branch target representation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Inst<T = CodeOffset> {
    /// Open a frame with `nslots` local slots
    EnterFrame { nslots: u32 },
    /// Discard the current frame
    LeaveFrame,
    /// Return to the caller with the result in R0
    Ret,
    /// Fail if the native nesting limit is exceeded
    StackCheck,
    MoveValue { src: ValueReg, dst: ValueReg },
    MoveImm { value: Value, dst: ValueReg },
    Load { src: Address, dst: ValueReg },
    Store { src: ValueReg, dst: Address },
    StoreImm { value: Value, dst: Address },
    Push(ValueReg),
    PushImm(Value),
    PushFrom(Address),
    Pop(ValueReg),
    /// Drop values from the top of the machine stack
    FreeStack(u32),
    /// Load the argument count register for a call IC
    MoveArgc(u32),
    /// Negate a boolean register in place
    NotBoolean(ValueReg),
    Jump(T),
    /// Branch if the boolean in `reg` equals `when`
    BranchTest { reg: ValueReg, when: bool, target: T },
    /// Branch if `reg` holds an int32 or double
    BranchIfNumber { reg: ValueReg, target: T },
    /// Call through the IC entry recorded in patch slot `patch`
    CallIc { patch: u32 },
}

impl<T: Copy> Inst<T> {
    /// Branch target, if any
    pub fn target(&self) -> Option<T> {
        match *self {
            Inst::Jump(t)
            | Inst::BranchTest { target: t, .. }
            | Inst::BranchIfNumber { target: t, .. } => Some(t),
            _ => None,
        }
    }

    /// Rewrite the branch target through `f`
    pub fn map_target<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Inst<U>, E> {
        Ok(match self {
            Inst::Jump(t) => Inst::Jump(f(t)?),
            Inst::BranchTest { reg, when, target } => Inst::BranchTest {
                reg,
                when,
                target: f(target)?,
            },
            Inst::BranchIfNumber { reg, target } => Inst::BranchIfNumber {
                reg,
                target: f(target)?,
            },
            Inst::EnterFrame { nslots } => Inst::EnterFrame { nslots },
            Inst::LeaveFrame => Inst::LeaveFrame,
            Inst::Ret => Inst::Ret,
            Inst::StackCheck => Inst::StackCheck,
            Inst::MoveValue { src, dst } => Inst::MoveValue { src, dst },
            Inst::MoveImm { value, dst } => Inst::MoveImm { value, dst },
            Inst::Load { src, dst } => Inst::Load { src, dst },
            Inst::Store { src, dst } => Inst::Store { src, dst },
            Inst::StoreImm { value, dst } => Inst::StoreImm { value, dst },
            Inst::Push(r) => Inst::Push(r),
            Inst::PushImm(v) => Inst::PushImm(v),
            Inst::PushFrom(a) => Inst::PushFrom(a),
            Inst::Pop(r) => Inst::Pop(r),
            Inst::FreeStack(n) => Inst::FreeStack(n),
            Inst::MoveArgc(n) => Inst::MoveArgc(n),
            Inst::NotBoolean(r) => Inst::NotBoolean(r),
            Inst::CallIc { patch } => Inst::CallIc { patch },
        })
    }

    /// Change in machine stack height, for instructions that have a static one
    pub fn stack_delta(&self) -> i64 {
        match *self {
            Inst::Push(_) | Inst::PushImm(_) | Inst::PushFrom(_) => 1,
            Inst::Pop(_) => -1,
            Inst::FreeStack(n) => -(n as i64),
            _ => 0,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Inst<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::EnterFrame { nslots } => write!(f, "enter_frame {nslots}"),
            Inst::LeaveFrame => f.write_str("leave_frame"),
            Inst::Ret => f.write_str("ret"),
            Inst::StackCheck => f.write_str("stack_check"),
            Inst::MoveValue { src, dst } => write!(f, "mov {dst}, {src}"),
            Inst::MoveImm { value, dst } => write!(f, "mov {dst}, #{value}"),
            Inst::Load { src, dst } => write!(f, "load {dst}, {src}"),
            Inst::Store { src, dst } => write!(f, "store {dst}, {src}"),
            Inst::StoreImm { value, dst } => write!(f, "store {dst}, #{value}"),
            Inst::Push(r) => write!(f, "push {r}"),
            Inst::PushImm(v) => write!(f, "push #{v}"),
            Inst::PushFrom(a) => write!(f, "push {a}"),
            Inst::Pop(r) => write!(f, "pop {r}"),
            Inst::FreeStack(n) => write!(f, "free_stack {n}"),
            Inst::MoveArgc(n) => write!(f, "mov argc, {n}"),
            Inst::NotBoolean(r) => write!(f, "not {r}"),
            Inst::Jump(t) => write!(f, "jmp {t}"),
            Inst::BranchTest { reg, when, target } => {
                write!(f, "b{} {reg}, {target}", if *when { "true" } else { "false" })
            }
            Inst::BranchIfNumber { reg, target } => write!(f, "bnum {reg}, {target}"),
            Inst::CallIc { patch } => write!(f, "call_ic @{patch}"),
        }
    }
}
