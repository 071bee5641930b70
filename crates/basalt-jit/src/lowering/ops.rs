//! Operators, name and property access, calls
//!
//! Everything here goes through an IC site: operands are forced into R0/R1
//! (or onto the machine stack for calls), the site is called and its result
//! is pushed from R0.

use basalt_bytecode::{DecodedInstr, Opcode, ValueType};

use super::stack::store_top;
use super::{u16_operand, u32_operand, LowerResult};
use crate::compiler::BaselineCompiler;
use crate::ic::IcKind;
use crate::masm::{Address, ValueReg};

pub(super) fn lower_binary_arith(
    c: &mut BaselineCompiler<'_>,
    instr: &DecodedInstr,
) -> LowerResult {
    c.frame.pop_regs_and_sync(&mut c.masm, 2);
    c.emit_ic(IcKind::BinaryArith(instr.opcode))?;
    c.frame.push_reg(&mut c.masm, ValueReg::R0);
    Ok(())
}

pub(super) fn lower_compare(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    c.frame.pop_regs_and_sync(&mut c.masm, 2);
    c.emit_ic(IcKind::Compare(instr.opcode))?;
    c.frame
        .push_reg_typed(&mut c.masm, ValueReg::R0, ValueType::Boolean);
    Ok(())
}

pub(super) fn lower_unary(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    c.frame.pop_regs_and_sync(&mut c.masm, 1);
    c.emit_ic(IcKind::Unary(instr.opcode))?;
    c.frame.push_reg(&mut c.masm, ValueReg::R0);
    Ok(())
}

/// Numbers pass through; everything else goes through the conversion IC
pub(super) fn lower_pos(c: &mut BaselineCompiler<'_>, _: &DecodedInstr) -> LowerResult {
    c.frame.pop_regs_and_sync(&mut c.masm, 1);
    let done = c.masm.new_label();
    c.masm.branch_if_number(ValueReg::R0, done);
    c.emit_ic(IcKind::ToNumber)?;
    c.masm.bind(done);
    c.frame.push_reg(&mut c.masm, ValueReg::R0);
    Ok(())
}

pub(super) fn lower_not(c: &mut BaselineCompiler<'_>, _: &DecodedInstr) -> LowerResult {
    let known_bool = c.frame.is_known_boolean(1);
    c.frame.pop_regs_and_sync(&mut c.masm, 1);
    if !known_bool {
        c.emit_ic(IcKind::ToBool)?;
    }
    c.masm.not_boolean(ValueReg::R0);
    c.frame
        .push_reg_typed(&mut c.masm, ValueReg::R0, ValueType::Boolean);
    Ok(())
}

pub(super) fn lower_get_name(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    let atom = c.resolve_atom(u32_operand(instr))?;
    let kind = match instr.opcode {
        Opcode::GetGlobal => IcKind::GetGlobal(atom),
        _ => IcKind::GetName(atom),
    };
    c.frame.sync_stack(&mut c.masm, 0);
    c.emit_ic(kind)?;
    c.frame.push_reg(&mut c.masm, ValueReg::R0);
    Ok(())
}

pub(super) fn lower_set_name(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    let atom = c.resolve_atom(u32_operand(instr))?;
    let kind = match instr.opcode {
        Opcode::SetGlobal => IcKind::SetGlobal(atom),
        _ => IcKind::SetName(atom),
    };
    stage_top(c);
    c.frame.sync_stack(&mut c.masm, 0);
    c.emit_ic(kind)?;
    c.frame.push_scratch_value(&mut c.masm);
    Ok(())
}

pub(super) fn lower_get_prop(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    let atom = c.resolve_atom(u32_operand(instr))?;
    c.frame.pop_regs_and_sync(&mut c.masm, 1);
    c.emit_ic(IcKind::GetProp(atom))?;
    c.frame.push_reg(&mut c.masm, ValueReg::R0);
    Ok(())
}

pub(super) fn lower_set_prop(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    let atom = c.resolve_atom(u32_operand(instr))?;
    stage_top(c);
    c.frame.pop_regs_and_sync(&mut c.masm, 1);
    c.emit_ic(IcKind::SetProp(atom))?;
    c.frame.push_scratch_value(&mut c.masm);
    Ok(())
}

pub(super) fn lower_get_elem(c: &mut BaselineCompiler<'_>, _: &DecodedInstr) -> LowerResult {
    c.frame.pop_regs_and_sync(&mut c.masm, 2);
    c.emit_ic(IcKind::GetElem)?;
    c.frame.push_reg(&mut c.masm, ValueReg::R0);
    Ok(())
}

pub(super) fn lower_set_elem(c: &mut BaselineCompiler<'_>, _: &DecodedInstr) -> LowerResult {
    stage_top(c);
    c.frame.pop_regs_and_sync(&mut c.masm, 2);
    c.emit_ic(IcKind::SetElem)?;
    c.frame.push_scratch_value(&mut c.masm);
    Ok(())
}

/// Callee, `this` and the arguments are passed on the machine stack
pub(super) fn lower_call(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    let argc = u16_operand(instr);
    c.frame.sync_stack(&mut c.masm, 0);
    c.masm.move_argc(argc as u32);
    c.emit_ic(IcKind::Call(argc))?;
    c.frame.popn(&mut c.masm, argc as u32 + 2);
    c.frame.push_reg(&mut c.masm, ValueReg::R0);
    Ok(())
}

/// Move the assigned value into the scratch slot and drop it from the stack
fn stage_top(c: &mut BaselineCompiler<'_>) {
    store_top(c, Address::Scratch);
    c.frame.pop(&mut c.masm);
}
