//! Basalt Bytecode Definitions
//!
//! This crate provides the stack-machine instruction set consumed by the
//! baseline compiler: opcodes, encoding and decoding, the analysis pass that
//! produces per-offset jump-target and stack-depth metadata, interned atoms,
//! NaN-boxed values and the decomposition of compound opcodes.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod analysis;
pub mod atoms;
pub mod decoder;
pub mod decompose;
pub mod encoder;
pub mod opcode;
pub mod program;
#[allow(missing_docs)]
pub mod value;

pub use analysis::{analyze, AnalysisError, OpInfo, ProgramAnalysis, MAX_STACK_DEPTH};
pub use atoms::{Atom, AtomLookup, AtomTable};
pub use decoder::{decode_at, decode_program, DecodedInstr, Operands};
pub use decompose::decompose;
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError, JumpSite};
pub use opcode::{OperandFormat, Opcode};
pub use program::{BytecodeProgram, ProgramBuilder};
pub use value::{Value, ValueType};
