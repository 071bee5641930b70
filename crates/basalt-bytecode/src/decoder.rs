//! Bytecode instruction decoder
//!
//! Decodes raw bytecode bytes into typed instruction structs with parsed
//! operands. Jump displacements are resolved to absolute byte offsets.

use crate::encoder::{BytecodeReader, DecodeError};
use crate::opcode::{OperandFormat, Opcode};

/// A decoded bytecode instruction with typed operands
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInstr {
    /// Byte offset in the program's code array
    pub offset: usize,
    /// The opcode
    pub opcode: Opcode,
    /// Decoded operands
    pub operands: Operands,
    /// Total size in bytes (opcode + operands); zero for decomposed parts
    pub size: usize,
}

/// Typed operands for each instruction format
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operands {
    /// No operands
    None,
    /// Single i8 (Int8)
    I8(i8),
    /// Single u16 (GetLocal, SetArg, PopN, Call, ...)
    U16(u16),
    /// Single i32 (Int32)
    I32(i32),
    /// Single u32 (String, GetProp, Lambda, ...)
    U32(u32),
    /// Single f64 (Double)
    F64(f64),
    /// Jump with its absolute target offset
    Jump {
        /// Absolute byte offset of the jump target
        target: usize,
    },
}

impl DecodedInstr {
    /// Absolute jump target, if this is a jump
    pub fn jump_target(&self) -> Option<usize> {
        match self.operands {
            Operands::Jump { target } => Some(target),
            _ => None,
        }
    }

    /// The u16 operand, if any (slot, argument index, count or argc)
    pub fn u16_operand(&self) -> Option<u16> {
        match self.operands {
            Operands::U16(v) => Some(v),
            _ => None,
        }
    }

    /// The u32 operand, if any (atom or function index)
    pub fn u32_operand(&self) -> Option<u32> {
        match self.operands {
            Operands::U32(v) => Some(v),
            _ => None,
        }
    }

    /// Offset of the next instruction in the original stream
    pub fn next_offset(&self) -> usize {
        self.offset + self.opcode.length()
    }

    /// Number of values popped and pushed by this instruction
    pub fn stack_effect(&self) -> (usize, usize) {
        use Opcode::*;
        let n = self.u16_operand().unwrap_or(0) as usize;
        match self.opcode {
            Nop | LoopHead | Goto | Stop | Debugger | LeaveWith => (0, 0),
            Pop | IfEq | IfNe | Return | Throw | EnterWith => (1, 0),
            PopN => (n, 0),
            Dup => (1, 2),
            Dup2 => (2, 4),
            Swap => (2, 2),

            Undefined | Null | True | False | Zero | One | Int8 | Int32 | Double | String
            | Hole => (0, 1),

            GetLocal | GetArg | IncLocal | DecLocal | GetName | GetGlobal | Lambda
            | Arguments => (0, 1),
            SetLocal | SetArg | SetName | SetGlobal => (1, 1),

            Add | Sub | Mul | Div | Mod | BitAnd | BitOr | BitXor | Lsh | Rsh | Ursh => (2, 1),
            Neg | Pos | BitNot | Not => (1, 1),
            Eq | Ne | StrictEq | StrictNe | Lt | Le | Gt | Ge => (2, 1),

            And | Or => (1, 1),

            GetProp => (1, 1),
            SetProp | GetElem => (2, 1),
            SetElem => (3, 1),
            Call => (n + 2, 1),
        }
    }
}

/// Decode the single instruction starting at `offset`
pub fn decode_at(code: &[u8], offset: usize) -> Result<DecodedInstr, DecodeError> {
    let mut reader = BytecodeReader::at(code, offset);
    let opcode = reader.read_opcode()?;

    let operands = match opcode.operand_format() {
        OperandFormat::None => Operands::None,
        OperandFormat::I8 => Operands::I8(reader.read_i8()?),
        OperandFormat::U16 => Operands::U16(reader.read_u16()?),
        OperandFormat::I32 => Operands::I32(reader.read_i32()?),
        OperandFormat::U32 => Operands::U32(reader.read_u32()?),
        OperandFormat::F64 => Operands::F64(reader.read_f64()?),
        OperandFormat::Jump => {
            let displacement = reader.read_i32()?;
            let target = offset as i64 + displacement as i64;
            if target < 0 || target >= code.len() as i64 {
                return Err(DecodeError::JumpOutOfRange {
                    offset,
                    displacement,
                });
            }
            Operands::Jump {
                target: target as usize,
            }
        }
    };

    Ok(DecodedInstr {
        offset,
        opcode,
        operands,
        size: reader.position() - offset,
    })
}

/// Decode all instructions in a program's bytecode, in offset order
pub fn decode_program(code: &[u8]) -> Result<Vec<DecodedInstr>, DecodeError> {
    let mut instrs = Vec::new();
    let mut pos = 0;

    while pos < code.len() {
        let instr = decode_at(code, pos)?;
        pos += instr.size;
        instrs.push(instr);
    }

    Ok(instrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::BytecodeWriter;

    #[test]
    fn test_decode_simple_sequence() {
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::One);
        w.emit_int(-3);
        w.emit_op(Opcode::Add);
        w.emit_op(Opcode::Return);

        let instrs = decode_program(w.buffer()).unwrap();
        assert_eq!(instrs.len(), 4);
        assert_eq!(instrs[0].opcode, Opcode::One);
        assert_eq!(instrs[1].operands, Operands::I8(-3));
        assert_eq!(instrs[1].offset, 1);
        assert_eq!(instrs[2].offset, 3);
        assert_eq!(instrs[3].opcode, Opcode::Return);
    }

    #[test]
    fn test_decode_jump_targets_are_absolute() {
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::True);
        let site = w.emit_jump(Opcode::IfEq);
        w.emit_op(Opcode::Zero);
        w.patch_jump_here(site);
        w.emit_op(Opcode::Stop);

        let instr = decode_at(w.buffer(), 1).unwrap();
        assert_eq!(instr.jump_target(), Some(7));
        assert_eq!(instr.size, 5);
    }

    #[test]
    fn test_decode_jump_out_of_range() {
        let mut w = BytecodeWriter::new();
        w.emit_jump_to(Opcode::Goto, 100);
        assert!(matches!(
            decode_program(w.buffer()),
            Err(DecodeError::JumpOutOfRange { offset: 0, .. })
        ));
    }

    #[test]
    fn test_decode_invalid_and_truncated() {
        assert_eq!(
            decode_program(&[0x07]),
            Err(DecodeError::InvalidOpcode(0x07, 0))
        );
        assert_eq!(
            decode_program(&[Opcode::GetLocal.to_u8(), 0x01]),
            Err(DecodeError::UnexpectedEnd(1))
        );
    }

    #[test]
    fn test_stack_effects() {
        let call = DecodedInstr {
            offset: 0,
            opcode: Opcode::Call,
            operands: Operands::U16(3),
            size: 3,
        };
        assert_eq!(call.stack_effect(), (5, 1));

        let set_elem = DecodedInstr {
            offset: 0,
            opcode: Opcode::SetElem,
            operands: Operands::None,
            size: 1,
        };
        assert_eq!(set_elem.stack_effect(), (3, 1));
    }
}
