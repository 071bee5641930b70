//! Jumps, branches and returns
//!
//! Every jump leaves the whole operand stack on the machine stack, so the
//! code at the target can assume the fully-synced state it is bound in.

use basalt_bytecode::{DecodedInstr, Opcode, Value};

use super::{jump_target, LowerResult};
use crate::compiler::BaselineCompiler;
use crate::ic::IcKind;
use crate::masm::{Address, ValueReg};

pub(super) fn lower_goto(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    let target = c.label_of(jump_target(instr));
    c.frame.sync_stack(&mut c.masm, 0);
    c.masm.jump(target);
    Ok(())
}

/// `IfEq` branches when the popped value is falsy, `IfNe` when truthy
pub(super) fn lower_if(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    let target = c.label_of(jump_target(instr));
    let known_bool = c.frame.is_known_boolean(1);
    c.frame.pop_regs_and_sync(&mut c.masm, 1);
    if !known_bool {
        c.emit_ic(IcKind::ToBool)?;
    }
    c.masm
        .branch_test(ValueReg::R0, instr.opcode == Opcode::IfNe, target);
    Ok(())
}

/// Short-circuit: the tested value stays on the stack on both paths
pub(super) fn lower_and_or(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    let target = c.label_of(jump_target(instr));
    let known_bool = c.frame.is_known_boolean(1);
    c.frame.sync_stack(&mut c.masm, 0);

    let top = c.frame.stack_depth() - 1;
    c.masm.load(Address::Stack(top), ValueReg::R0);
    if !known_bool {
        c.emit_ic(IcKind::ToBool)?;
    }
    c.masm
        .branch_test(ValueReg::R0, instr.opcode == Opcode::Or, target);
    Ok(())
}

pub(super) fn lower_return(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    c.pop_return_value();
    jump_to_epilogue(c, instr);
    Ok(())
}

pub(super) fn lower_stop(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    assert_eq!(c.frame.stack_depth(), 0, "values left on stack at stop");
    c.masm.move_imm(Value::undefined(), ValueReg::R0);
    jump_to_epilogue(c, instr);
    Ok(())
}

/// The epilogue directly follows the last opcode, so no jump is needed there
fn jump_to_epilogue(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) {
    if instr.next_offset() < c.program.len() {
        let label = c.return_label();
        c.masm.jump(label);
    }
}
