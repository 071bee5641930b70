//! Per-opcode lowering table
//!
//! Maps each opcode the baseline tier handles to a routine that updates the
//! symbolic frame and emits code through the compiler's assembler. Opcodes
//! without an entry are either decomposed into simpler ones or make the
//! script uncompilable.

mod control;
mod ops;
mod stack;

use basalt_bytecode::{DecodedInstr, Opcode, Operands};

use crate::compiler::BaselineCompiler;
use crate::error::CompileError;

pub type LowerResult = Result<(), CompileError>;

/// Lowering routine for one opcode
pub type LowerFn = fn(&mut BaselineCompiler<'_>, &DecodedInstr) -> LowerResult;

/// Lowering routine for `op`, if the baseline tier handles it directly
pub fn lowering_for(op: Opcode) -> Option<LowerFn> {
    use Opcode::*;
    let f: LowerFn = match op {
        Nop | LoopHead => stack::lower_nop,
        Pop => stack::lower_pop,
        PopN => stack::lower_popn,
        Dup => stack::lower_dup,
        Dup2 => stack::lower_dup2,
        Swap => stack::lower_swap,

        Undefined | Null | True | False | Zero | One | Int8 | Int32 | Double | Hole => {
            stack::lower_literal
        }
        String => stack::lower_string,

        GetLocal => stack::lower_get_local,
        SetLocal => stack::lower_set_local,
        GetArg => stack::lower_get_arg,
        SetArg => stack::lower_set_arg,

        Add | Sub | Mul | Div | Mod | BitAnd | BitOr | BitXor | Lsh | Rsh | Ursh => {
            ops::lower_binary_arith
        }
        Neg | BitNot => ops::lower_unary,
        Pos => ops::lower_pos,
        Not => ops::lower_not,
        Eq | Ne | StrictEq | StrictNe | Lt | Le | Gt | Ge => ops::lower_compare,

        Goto => control::lower_goto,
        IfEq | IfNe => control::lower_if,
        And | Or => control::lower_and_or,
        Return => control::lower_return,
        Stop => control::lower_stop,

        GetName | GetGlobal => ops::lower_get_name,
        SetName | SetGlobal => ops::lower_set_name,
        GetProp => ops::lower_get_prop,
        SetProp => ops::lower_set_prop,
        GetElem => ops::lower_get_elem,
        SetElem => ops::lower_set_elem,
        Call => ops::lower_call,

        IncLocal | DecLocal | Debugger | Throw | Lambda | Arguments | EnterWith | LeaveWith => {
            return None
        }
    };
    Some(f)
}

// ===== Operand accessors =====
//
// The decoder guarantees each opcode carries the operand its format names.

fn u16_operand(instr: &DecodedInstr) -> u16 {
    match instr.operands {
        Operands::U16(n) => n,
        other => panic!("{} at {} has operands {other:?}", instr.opcode, instr.offset),
    }
}

fn u32_operand(instr: &DecodedInstr) -> u32 {
    match instr.operands {
        Operands::U32(n) => n,
        other => panic!("{} at {} has operands {other:?}", instr.opcode, instr.offset),
    }
}

fn jump_target(instr: &DecodedInstr) -> usize {
    match instr.operands {
        Operands::Jump { target } => target,
        other => panic!("{} at {} has operands {other:?}", instr.opcode, instr.offset),
    }
}
