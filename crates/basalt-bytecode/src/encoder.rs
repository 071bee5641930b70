//! Bytecode encoding and decoding utilities
//!
//! `BytecodeWriter` emits opcodes and little-endian operands into a byte
//! buffer; `BytecodeReader` walks a buffer back.

use crate::opcode::{OperandFormat, Opcode};
use thiserror::Error;

/// Errors that can occur during bytecode decoding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Unexpected end of bytecode stream
    #[error("Unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0:#x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Jump displacement leaves the code buffer
    #[error("Jump at offset {offset} has out-of-range displacement {displacement}")]
    JumpOutOfRange {
        /// Offset of the jump instruction
        offset: usize,
        /// Raw displacement operand
        displacement: i32,
    },
}

/// A forward jump whose displacement has not been written yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "forward jumps must be patched"]
pub struct JumpSite {
    /// Offset of the jump opcode byte
    pub offset: usize,
}

/// Bytecode writer for encoding instructions
#[derive(Debug, Default)]
pub struct BytecodeWriter {
    buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create a new bytecode writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new bytecode writer with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the current bytecode buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the bytecode buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get the current offset (length of bytecode)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer (little-endian)
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer (little-endian)
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit signed integer (little-endian)
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit float (little-endian)
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    // ===== Opcode Emission =====

    /// Emit an opcode without operands
    pub fn emit_op(&mut self, opcode: Opcode) {
        debug_assert_eq!(opcode.operand_format(), OperandFormat::None, "{opcode} takes operands");
        self.emit_u8(opcode.to_u8());
    }

    /// Emit an opcode with a u16 operand (slot, argument or count)
    pub fn emit_op_u16(&mut self, opcode: Opcode, operand: u16) {
        debug_assert_eq!(opcode.operand_format(), OperandFormat::U16);
        self.emit_u8(opcode.to_u8());
        self.emit_u16(operand);
    }

    /// Emit an opcode with a u32 operand (atom or function index)
    pub fn emit_op_u32(&mut self, opcode: Opcode, operand: u32) {
        debug_assert_eq!(opcode.operand_format(), OperandFormat::U32);
        self.emit_u8(opcode.to_u8());
        self.emit_u32(operand);
    }

    /// Emit the cheapest integer literal for `value`
    pub fn emit_int(&mut self, value: i32) {
        match value {
            0 => self.emit_op(Opcode::Zero),
            1 => self.emit_op(Opcode::One),
            v if i8::try_from(v).is_ok() => {
                self.emit_u8(Opcode::Int8.to_u8());
                self.emit_u8(v as i8 as u8);
            }
            v => {
                self.emit_u8(Opcode::Int32.to_u8());
                self.emit_i32(v);
            }
        }
    }

    /// Emit a double literal
    pub fn emit_double(&mut self, value: f64) {
        self.emit_u8(Opcode::Double.to_u8());
        self.emit_f64(value);
    }

    // ===== Jumps =====

    /// Emit a forward jump with a placeholder displacement
    pub fn emit_jump(&mut self, opcode: Opcode) -> JumpSite {
        debug_assert!(opcode.is_jump(), "{opcode} is not a jump");
        let offset = self.offset();
        self.emit_u8(opcode.to_u8());
        self.emit_i32(0);
        JumpSite { offset }
    }

    /// Emit a jump to an already known target (typically backwards)
    pub fn emit_jump_to(&mut self, opcode: Opcode, target: usize) {
        let site = self.emit_jump(opcode);
        self.patch_jump(site, target);
    }

    /// Point a forward jump at `target`
    pub fn patch_jump(&mut self, site: JumpSite, target: usize) {
        let displacement = target as i64 - site.offset as i64;
        self.patch_i32(site.offset + 1, displacement as i32);
    }

    /// Point a forward jump at the current offset
    pub fn patch_jump_here(&mut self, site: JumpSite) {
        let here = self.offset();
        self.patch_jump(site, here);
    }

    /// Patch a previously emitted i32 value at the given offset
    pub fn patch_i32(&mut self, offset: usize, value: i32) {
        let bytes = value.to_le_bytes();
        self.buffer[offset..offset + 4].copy_from_slice(&bytes);
    }
}

/// Bytecode reader for decoding operands
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a new bytecode reader
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Create a reader positioned at `position`
    pub fn at(buffer: &'a [u8], position: usize) -> Self {
        Self { buffer, position }
    }

    /// Get the current position in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Check if there are more bytes to read
    pub fn has_more(&self) -> bool {
        self.position < self.buffer.len()
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.position + N;
        let bytes = self
            .buffer
            .get(self.position..end)
            .ok_or(DecodeError::UnexpectedEnd(self.position))?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.position = end;
        Ok(out)
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    /// Read a signed byte
    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.read_u8()? as i8)
    }

    /// Read a 16-bit unsigned integer (little-endian)
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    /// Read a 32-bit unsigned integer (little-endian)
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    /// Read a 32-bit signed integer (little-endian)
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    /// Read a 64-bit float (little-endian)
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.take()?))
    }

    /// Read an opcode byte
    pub fn read_opcode(&mut self) -> Result<Opcode, DecodeError> {
        let offset = self.position;
        let byte = self.read_u8()?;
        Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, offset))
    }
}
