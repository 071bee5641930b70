//! Stack shuffles, literals and slot access
//!
//! None of these call into the runtime; most only rearrange the symbolic
//! frame and emit nothing.

use basalt_bytecode::{DecodedInstr, Opcode, Operands, Value};

use super::{u16_operand, u32_operand, LowerResult};
use crate::compiler::BaselineCompiler;
use crate::frame::{StackValue, StackValueKind};
use crate::masm::{Address, ValueReg};

pub(super) fn lower_nop(_c: &mut BaselineCompiler<'_>, _: &DecodedInstr) -> LowerResult {
    Ok(())
}

pub(super) fn lower_pop(c: &mut BaselineCompiler<'_>, _: &DecodedInstr) -> LowerResult {
    c.frame.pop(&mut c.masm);
    Ok(())
}

pub(super) fn lower_popn(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    let n = u16_operand(instr) as u32;
    c.frame.popn(&mut c.masm, n);
    Ok(())
}

pub(super) fn lower_dup(c: &mut BaselineCompiler<'_>, _: &DecodedInstr) -> LowerResult {
    let known_type = c.frame.peek(1).known_type;
    c.frame.pop_regs_and_sync(&mut c.masm, 1);
    c.masm.move_value(ValueReg::R0, ValueReg::R1);

    for reg in [ValueReg::R1, ValueReg::R0] {
        let value = StackValue {
            kind: StackValueKind::Register(reg),
            known_type,
        };
        c.frame.push(&mut c.masm, value);
    }
    Ok(())
}

pub(super) fn lower_dup2(c: &mut BaselineCompiler<'_>, _: &DecodedInstr) -> LowerResult {
    c.frame.sync_stack(&mut c.masm, 0);
    let depth = c.frame.stack_depth();
    c.masm.load(Address::Stack(depth - 2), ValueReg::R0);
    c.masm.load(Address::Stack(depth - 1), ValueReg::R1);
    c.frame.push_reg(&mut c.masm, ValueReg::R0);
    c.frame.push_reg(&mut c.masm, ValueReg::R1);
    Ok(())
}

pub(super) fn lower_swap(c: &mut BaselineCompiler<'_>, _: &DecodedInstr) -> LowerResult {
    c.frame.pop_regs_and_sync(&mut c.masm, 2);
    c.frame.push_reg(&mut c.masm, ValueReg::R1);
    c.frame.push_reg(&mut c.masm, ValueReg::R0);
    Ok(())
}

pub(super) fn lower_literal(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    let value = match (instr.opcode, instr.operands) {
        (Opcode::Undefined, _) => Value::undefined(),
        (Opcode::Null, _) => Value::null(),
        (Opcode::True, _) => Value::bool(true),
        (Opcode::False, _) => Value::bool(false),
        (Opcode::Zero, _) => Value::int32(0),
        (Opcode::One, _) => Value::int32(1),
        (Opcode::Int8, Operands::I8(i)) => Value::int32(i as i32),
        (Opcode::Int32, Operands::I32(i)) => Value::int32(i),
        (Opcode::Double, Operands::F64(d)) => Value::double(d),
        (Opcode::Hole, _) => Value::hole(),
        (op, operands) => panic!("{op} is not a literal (operands {operands:?})"),
    };
    c.frame.push_constant(value);
    Ok(())
}

pub(super) fn lower_string(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    let atom = c.resolve_atom(u32_operand(instr))?;
    c.frame.push_constant(Value::string(atom));
    Ok(())
}

pub(super) fn lower_get_local(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    let slot = u16_operand(instr) as u32;
    if slot < c.frame.nslots() {
        c.frame.push_local(slot);
    } else {
        // Reads an operand stack slot through the locals window
        c.frame.sync_stack(&mut c.masm, 0);
        c.masm.load(Address::Local(slot), ValueReg::R0);
        c.frame.push_reg(&mut c.masm, ValueReg::R0);
    }
    Ok(())
}

pub(super) fn lower_set_local(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    let slot = u16_operand(instr) as u32;
    c.frame.sync_local_aliases(&mut c.masm, slot);
    store_top(c, Address::Local(slot));
    Ok(())
}

pub(super) fn lower_get_arg(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    c.frame.push_arg(u16_operand(instr) as u32);
    Ok(())
}

pub(super) fn lower_set_arg(c: &mut BaselineCompiler<'_>, instr: &DecodedInstr) -> LowerResult {
    let index = u16_operand(instr) as u32;
    c.frame.sync_arg_aliases(&mut c.masm, index);
    store_top(c, Address::Arg(index));
    Ok(())
}

/// Write the top entry to `dst`, leaving it on the stack
pub(super) fn store_top(c: &mut BaselineCompiler<'_>, dst: Address) {
    let scratch = c.frame.free_register(&mut c.masm);
    let top = *c.frame.peek(1);
    c.frame.store_value(&mut c.masm, &top, dst, scratch);
}
