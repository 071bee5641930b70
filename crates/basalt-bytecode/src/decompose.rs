//! Decomposition of compound opcodes
//!
//! Some opcodes are shorthand for a short sequence of primitive ones. A
//! consumer that has no direct handling for them can lower the expansion
//! instead. Expanded instructions keep the compound instruction's offset and
//! have size zero.

use crate::decoder::{DecodedInstr, Operands};
use crate::opcode::Opcode;

/// Expand `instr` into primitive instructions, or `None` if it is primitive
/// or has no known expansion
pub fn decompose(instr: &DecodedInstr) -> Option<Vec<DecodedInstr>> {
    let step = |opcode: Opcode, operands: Operands| DecodedInstr {
        offset: instr.offset,
        opcode,
        operands,
        size: 0,
    };

    match instr.opcode {
        Opcode::IncLocal | Opcode::DecLocal => {
            let slot = instr.u16_operand()?;
            let arith = if instr.opcode == Opcode::IncLocal {
                Opcode::Add
            } else {
                Opcode::Sub
            };
            Some(vec![
                step(Opcode::GetLocal, Operands::U16(slot)),
                step(Opcode::One, Operands::None),
                step(arith, Operands::None),
                step(Opcode::SetLocal, Operands::U16(slot)),
            ])
        }
        _ => None,
    }
}
