//! Bytecode analysis
//!
//! Abstract interpretation over the operand stack. Produces, for every
//! reachable instruction offset, the stack depth on entry and whether some
//! reachable jump targets it. Offsets never reached from entry carry no
//! metadata.

use crate::decoder::{decode_program, DecodedInstr};
use crate::encoder::DecodeError;
use crate::opcode::Opcode;

/// Deepest operand stack a program may build
pub const MAX_STACK_DEPTH: u32 = 1024;

/// Bytecode analysis errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    /// Program has no instructions
    #[error("Program is empty")]
    EmptyProgram,

    /// Decode error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Stack underflow
    #[error("Stack underflow at offset {0}")]
    StackUnderflow(usize),

    /// Stack overflow
    #[error("Stack overflow at offset {0} (depth: {1})")]
    StackOverflow(usize, u32),

    /// Two paths reach an instruction with different stack depths
    #[error("Stack depth mismatch at offset {offset}: {expected} vs {found}")]
    DepthMismatch {
        offset: usize,
        expected: u32,
        found: u32,
    },

    /// Invalid jump target
    #[error("Invalid jump target {target} at offset {offset}")]
    InvalidJumpTarget { target: usize, offset: usize },

    /// Execution falls off end
    #[error("Execution falls off end of program at offset {0}")]
    FallOffEnd(usize),

    /// Return or Stop with leftover operands
    #[error("{opcode} at offset {offset} with stack depth {depth}")]
    BadReturnDepth {
        opcode: Opcode,
        offset: usize,
        depth: u32,
    },

    /// Invalid local slot reference
    #[error("Invalid local slot reference: index {index} (max {max}) at offset {offset}")]
    InvalidLocal {
        index: u32,
        max: u32,
        offset: usize,
    },

    /// Invalid argument reference
    #[error("Invalid argument reference: index {index} (max {max}) at offset {offset}")]
    InvalidArg {
        index: u32,
        max: u32,
        offset: usize,
    },

    /// Invalid atom reference
    #[error("Invalid atom reference: index {index} at offset {offset}")]
    InvalidAtom { index: u32, offset: usize },
}

/// Per-offset metadata for a reachable instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
    /// Some reachable jump lands here
    pub jump_target: bool,
    /// Operand stack depth on entry
    pub stack_depth: u32,
}

/// Result of analyzing a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramAnalysis {
    infos: Vec<Option<OpInfo>>,
    max_stack_depth: u32,
}

impl ProgramAnalysis {
    /// Metadata for the instruction at `offset`, `None` if unreachable or not
    /// an instruction boundary
    #[inline]
    pub fn info(&self, offset: usize) -> Option<&OpInfo> {
        self.infos.get(offset).and_then(Option::as_ref)
    }

    /// Check if `offset` starts a reachable instruction
    pub fn is_reachable(&self, offset: usize) -> bool {
        self.info(offset).is_some()
    }

    /// Check if a reachable jump targets `offset`
    pub fn is_jump_target(&self, offset: usize) -> bool {
        self.info(offset).is_some_and(|info| info.jump_target)
    }

    /// Guaranteed stack depth on entry to `offset`
    pub fn stack_depth_at(&self, offset: usize) -> Option<u32> {
        self.info(offset).map(|info| info.stack_depth)
    }

    /// Deepest stack reached on any path
    pub fn max_stack_depth(&self) -> u32 {
        self.max_stack_depth
    }

    /// Number of reachable instructions
    pub fn reachable_count(&self) -> usize {
        self.infos.iter().filter(|info| info.is_some()).count()
    }
}

/// Analyze `code` for a program with the given slot, argument and atom counts
pub fn analyze(
    code: &[u8],
    nslots: u32,
    nargs: u32,
    natoms: u32,
) -> Result<ProgramAnalysis, AnalysisError> {
    if code.is_empty() {
        return Err(AnalysisError::EmptyProgram);
    }

    let instrs = decode_program(code)?;

    // offset -> instruction index, for boundary checks on jump targets
    let mut index_of: Vec<Option<usize>> = vec![None; code.len()];
    for (i, instr) in instrs.iter().enumerate() {
        index_of[instr.offset] = Some(i);
    }

    let mut depths: Vec<Option<u32>> = vec![None; instrs.len()];
    let mut targets = vec![false; instrs.len()];
    let mut worklist = vec![0usize];
    let mut max_stack_depth = 0u32;
    depths[0] = Some(0);

    while let Some(idx) = worklist.pop() {
        let instr = &instrs[idx];
        let Some(depth) = depths[idx] else {
            continue;
        };

        check_operands(instr, depth, nslots, nargs, natoms)?;

        let (pops, pushes) = instr.stack_effect();
        if (depth as usize) < pops {
            return Err(AnalysisError::StackUnderflow(instr.offset));
        }

        let required = match instr.opcode {
            Opcode::Return => Some(1),
            Opcode::Stop => Some(0),
            _ => None,
        };
        if let Some(required) = required {
            if depth != required {
                return Err(AnalysisError::BadReturnDepth {
                    opcode: instr.opcode,
                    offset: instr.offset,
                    depth,
                });
            }
        }

        let after = depth - pops as u32 + pushes as u32;
        if after > MAX_STACK_DEPTH {
            return Err(AnalysisError::StackOverflow(instr.offset, after));
        }
        max_stack_depth = max_stack_depth.max(depth).max(after);

        if let Some(target) = instr.jump_target() {
            let t = index_of[target].ok_or(AnalysisError::InvalidJumpTarget {
                target,
                offset: instr.offset,
            })?;
            targets[t] = true;
            merge(&instrs, &mut depths, &mut worklist, t, after)?;
        }

        if instr.opcode.falls_through() {
            if instr.next_offset() >= code.len() {
                return Err(AnalysisError::FallOffEnd(instr.offset));
            }
            merge(&instrs, &mut depths, &mut worklist, idx + 1, after)?;
        }
    }

    let mut infos = vec![None; code.len()];
    for (idx, instr) in instrs.iter().enumerate() {
        if let Some(stack_depth) = depths[idx] {
            infos[instr.offset] = Some(OpInfo {
                jump_target: targets[idx],
                stack_depth,
            });
        }
    }

    Ok(ProgramAnalysis {
        infos,
        max_stack_depth,
    })
}

fn merge(
    instrs: &[DecodedInstr],
    depths: &mut [Option<u32>],
    worklist: &mut Vec<usize>,
    idx: usize,
    depth: u32,
) -> Result<(), AnalysisError> {
    match depths[idx] {
        None => {
            depths[idx] = Some(depth);
            worklist.push(idx);
            Ok(())
        }
        Some(expected) if expected == depth => Ok(()),
        Some(expected) => Err(AnalysisError::DepthMismatch {
            offset: instrs[idx].offset,
            expected,
            found: depth,
        }),
    }
}

fn check_operands(
    instr: &DecodedInstr,
    depth: u32,
    nslots: u32,
    nargs: u32,
    natoms: u32,
) -> Result<(), AnalysisError> {
    let offset = instr.offset;
    match instr.opcode {
        // Reads past the fixed slots address the operand stack itself
        Opcode::GetLocal => {
            let index = instr.u16_operand().unwrap_or(0) as u32;
            let max = nslots + depth;
            if index >= max {
                return Err(AnalysisError::InvalidLocal { index, max, offset });
            }
        }
        Opcode::SetLocal | Opcode::IncLocal | Opcode::DecLocal => {
            let index = instr.u16_operand().unwrap_or(0) as u32;
            if index >= nslots {
                return Err(AnalysisError::InvalidLocal {
                    index,
                    max: nslots,
                    offset,
                });
            }
        }
        Opcode::GetArg | Opcode::SetArg => {
            let index = instr.u16_operand().unwrap_or(0) as u32;
            if index >= nargs {
                return Err(AnalysisError::InvalidArg {
                    index,
                    max: nargs,
                    offset,
                });
            }
        }
        op if op.has_atom_operand() => {
            let index = instr.u32_operand().unwrap_or(0);
            if index >= natoms {
                return Err(AnalysisError::InvalidAtom { index, offset });
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::BytecodeWriter;

    #[test]
    fn test_analyze_straight_line() {
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::One);
        w.emit_int(2);
        w.emit_op(Opcode::Add);
        w.emit_op(Opcode::Return);

        let analysis = analyze(w.buffer(), 0, 0, 0).unwrap();
        assert_eq!(analysis.stack_depth_at(0), Some(0));
        assert_eq!(analysis.stack_depth_at(1), Some(1));
        assert_eq!(analysis.stack_depth_at(3), Some(2));
        assert_eq!(analysis.stack_depth_at(4), Some(1));
        assert_eq!(analysis.stack_depth_at(2), None);
        assert_eq!(analysis.max_stack_depth(), 2);
        assert!(!analysis.is_jump_target(3));
    }

    #[test]
    fn test_analyze_diamond_marks_merge() {
        // true; ifeq L1; 10; goto L2; L1: 20; L2: return
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::True);
        let to_else = w.emit_jump(Opcode::IfEq);
        w.emit_int(10);
        let to_join = w.emit_jump(Opcode::Goto);
        let else_offset = w.offset();
        w.patch_jump_here(to_else);
        w.emit_int(20);
        let join_offset = w.offset();
        w.patch_jump_here(to_join);
        w.emit_op(Opcode::Return);

        let analysis = analyze(w.buffer(), 0, 0, 0).unwrap();
        assert!(analysis.is_jump_target(else_offset));
        assert!(analysis.is_jump_target(join_offset));
        assert_eq!(analysis.stack_depth_at(else_offset), Some(0));
        assert_eq!(analysis.stack_depth_at(join_offset), Some(1));
    }

    #[test]
    fn test_analyze_skips_unreachable() {
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::Stop);
        w.emit_op(Opcode::Debugger);
        w.emit_op(Opcode::Stop);

        let analysis = analyze(w.buffer(), 0, 0, 0).unwrap();
        assert!(analysis.is_reachable(0));
        assert!(!analysis.is_reachable(1));
        assert_eq!(analysis.reachable_count(), 1);
    }

    #[test]
    fn test_analyze_depth_mismatch() {
        // true; ifeq L; 1; L: stop
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::True);
        let site = w.emit_jump(Opcode::IfEq);
        w.emit_op(Opcode::One);
        w.patch_jump_here(site);
        w.emit_op(Opcode::Stop);

        assert!(matches!(
            analyze(w.buffer(), 0, 0, 0),
            Err(AnalysisError::DepthMismatch { .. })
        ));
    }

    #[test]
    fn test_analyze_jump_into_operand() {
        let mut w = BytecodeWriter::new();
        w.emit_jump_to(Opcode::Goto, 2);
        w.emit_op(Opcode::Stop);

        assert!(matches!(
            analyze(w.buffer(), 0, 0, 0),
            Err(AnalysisError::InvalidJumpTarget { target: 2, offset: 0 })
        ));
    }

    #[test]
    fn test_analyze_underflow_and_fall_off() {
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::Add);
        w.emit_op(Opcode::Return);
        assert_eq!(
            analyze(w.buffer(), 0, 0, 0),
            Err(AnalysisError::StackUnderflow(0))
        );

        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::Nop);
        assert_eq!(analyze(w.buffer(), 0, 0, 0), Err(AnalysisError::FallOffEnd(0)));
    }

    #[test]
    fn test_analyze_return_depth() {
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::One);
        w.emit_op(Opcode::One);
        w.emit_op(Opcode::Return);
        assert!(matches!(
            analyze(w.buffer(), 0, 0, 0),
            Err(AnalysisError::BadReturnDepth { depth: 2, .. })
        ));
    }

    #[test]
    fn test_analyze_slot_bounds() {
        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::One);
        w.emit_op_u16(Opcode::GetLocal, 2); // operand stack slot 0
        w.emit_op(Opcode::Add);
        w.emit_op_u16(Opcode::SetLocal, 1);
        w.emit_op(Opcode::Return);
        assert!(analyze(w.buffer(), 2, 0, 0).is_ok());

        let mut w = BytecodeWriter::new();
        w.emit_op(Opcode::One);
        w.emit_op_u16(Opcode::SetLocal, 2);
        w.emit_op(Opcode::Return);
        assert!(matches!(
            analyze(w.buffer(), 2, 0, 0),
            Err(AnalysisError::InvalidLocal { index: 2, max: 2, .. })
        ));

        let mut w = BytecodeWriter::new();
        w.emit_op_u16(Opcode::GetArg, 0);
        w.emit_op(Opcode::Return);
        assert!(matches!(
            analyze(w.buffer(), 0, 0, 0),
            Err(AnalysisError::InvalidArg { index: 0, max: 0, .. })
        ));

        let mut w = BytecodeWriter::new();
        w.emit_op_u32(Opcode::GetName, 3);
        w.emit_op(Opcode::Return);
        assert!(matches!(
            analyze(w.buffer(), 0, 0, 3),
            Err(AnalysisError::InvalidAtom { index: 3, .. })
        ));
    }

    #[test]
    fn test_analyze_empty() {
        assert_eq!(analyze(&[], 0, 0, 0), Err(AnalysisError::EmptyProgram));
    }
}
