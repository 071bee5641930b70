//! Bytecode programs
//!
//! A `BytecodeProgram` is one function's immutable instruction stream plus
//! the metadata the compiler consumes: slot and argument counts, the
//! script-local atom texts, the arguments-object flag and the analysis
//! result.

use crate::analysis::{analyze, AnalysisError, OpInfo, ProgramAnalysis};
use crate::atoms::AtomTable;
use crate::decoder::{decode_at, decode_program, DecodedInstr};
use crate::encoder::{BytecodeWriter, DecodeError, JumpSite};
use crate::opcode::Opcode;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// One function's verified bytecode
#[derive(Debug, Clone)]
pub struct BytecodeProgram {
    name: Arc<str>,
    code: Vec<u8>,
    nslots: u32,
    nargs: u32,
    atoms: Vec<Arc<str>>,
    needs_args_obj: bool,
    analysis: ProgramAnalysis,
}

impl BytecodeProgram {
    /// Analyze `code` and wrap it as a program
    pub fn new(
        name: impl Into<Arc<str>>,
        code: Vec<u8>,
        nslots: u32,
        nargs: u32,
        atoms: Vec<Arc<str>>,
    ) -> Result<Self, AnalysisError> {
        let analysis = analyze(&code, nslots, nargs, atoms.len() as u32)?;
        let needs_args_obj = decode_program(&code)?
            .iter()
            .any(|instr| instr.opcode == Opcode::Arguments);

        Ok(Self {
            name: name.into(),
            code,
            nslots,
            nargs,
            atoms,
            needs_args_obj,
            analysis,
        })
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw instruction bytes
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Length of the instruction stream in bytes
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Check if the program has no bytes (never true for a built program)
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Number of local slots
    pub fn nslots(&self) -> u32 {
        self.nslots
    }

    /// Number of formal arguments
    pub fn nargs(&self) -> u32 {
        self.nargs
    }

    /// Script-local atom texts, indexed by atom operands
    pub fn atoms(&self) -> &[Arc<str>] {
        &self.atoms
    }

    /// Text of the script-local atom `index`
    pub fn atom_text(&self, index: u32) -> Option<&str> {
        self.atoms.get(index as usize).map(|s| &**s)
    }

    /// Check if the function reifies its arguments object
    pub fn needs_args_obj(&self) -> bool {
        self.needs_args_obj
    }

    /// Analysis result
    pub fn analysis(&self) -> &ProgramAnalysis {
        &self.analysis
    }

    /// Metadata for the instruction at `offset`, `None` if unreachable
    pub fn info(&self, offset: usize) -> Option<&OpInfo> {
        self.analysis.info(offset)
    }

    /// Decode the instruction at `offset`
    pub fn decode_at(&self, offset: usize) -> Result<DecodedInstr, DecodeError> {
        decode_at(&self.code, offset)
    }

    /// Iterate instruction start offsets in increasing order
    pub fn offsets(&self) -> impl Iterator<Item = usize> + '_ {
        let mut pos = 0;
        std::iter::from_fn(move || {
            if pos >= self.code.len() {
                return None;
            }
            let here = pos;
            let len = Opcode::from_u8(self.code[pos]).map_or(1, Opcode::length);
            pos += len;
            Some(here)
        })
    }
}

/// Incremental builder for programs
///
/// Atom operands are given as text; the builder assigns script-local
/// indexes and interns every text into the runtime table on `build`.
#[derive(Debug)]
pub struct ProgramBuilder {
    name: Arc<str>,
    writer: BytecodeWriter,
    nslots: u32,
    nargs: u32,
    atoms: Vec<Arc<str>>,
    atom_index: FxHashMap<Arc<str>, u32>,
}

impl ProgramBuilder {
    /// Start a program named `name`
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            writer: BytecodeWriter::new(),
            nslots: 0,
            nargs: 0,
            atoms: Vec::new(),
            atom_index: FxHashMap::default(),
        }
    }

    /// Set the number of local slots
    pub fn slots(mut self, nslots: u32) -> Self {
        self.nslots = nslots;
        self
    }

    /// Set the number of formal arguments
    pub fn args(mut self, nargs: u32) -> Self {
        self.nargs = nargs;
        self
    }

    /// Current offset
    pub fn offset(&self) -> usize {
        self.writer.offset()
    }

    /// Script-local index for `text`
    pub fn atom(&mut self, text: &str) -> u32 {
        if let Some(&index) = self.atom_index.get(text) {
            return index;
        }
        let index = self.atoms.len() as u32;
        let text: Arc<str> = Arc::from(text);
        self.atoms.push(text.clone());
        self.atom_index.insert(text, index);
        index
    }

    /// Emit an opcode without operands
    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.writer.emit_op(opcode);
        self
    }

    /// Emit an opcode with a u16 operand
    pub fn op_u16(&mut self, opcode: Opcode, operand: u16) -> &mut Self {
        self.writer.emit_op_u16(opcode, operand);
        self
    }

    /// Emit an opcode whose operand names an atom
    pub fn op_atom(&mut self, opcode: Opcode, text: &str) -> &mut Self {
        let index = self.atom(text);
        self.writer.emit_op_u32(opcode, index);
        self
    }

    /// Emit an integer literal
    pub fn int(&mut self, value: i32) -> &mut Self {
        self.writer.emit_int(value);
        self
    }

    /// Emit a double literal
    pub fn double(&mut self, value: f64) -> &mut Self {
        self.writer.emit_double(value);
        self
    }

    /// Emit a string literal
    pub fn string(&mut self, text: &str) -> &mut Self {
        self.op_atom(Opcode::String, text)
    }

    /// Emit a forward jump
    pub fn jump(&mut self, opcode: Opcode) -> JumpSite {
        self.writer.emit_jump(opcode)
    }

    /// Emit a jump to a known offset
    pub fn jump_to(&mut self, opcode: Opcode, target: usize) -> &mut Self {
        self.writer.emit_jump_to(opcode, target);
        self
    }

    /// Bind a forward jump to the current offset
    pub fn bind(&mut self, site: JumpSite) -> &mut Self {
        self.writer.patch_jump_here(site);
        self
    }

    /// Emit a raw opcode with a u32 operand (e.g. `Lambda`)
    pub fn op_u32(&mut self, opcode: Opcode, operand: u32) -> &mut Self {
        self.writer.emit_op_u32(opcode, operand);
        self
    }

    /// Analyze the program and intern its atoms into `table`
    pub fn build(self, table: &AtomTable) -> Result<BytecodeProgram, AnalysisError> {
        for text in &self.atoms {
            table.intern(text);
        }
        BytecodeProgram::new(
            self.name,
            self.writer.into_bytes(),
            self.nslots,
            self.nargs,
            self.atoms,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::AtomLookup;

    #[test]
    fn test_builder_assigns_atoms() {
        let table = AtomTable::new();
        let mut b = ProgramBuilder::new("f");
        b.op_atom(Opcode::GetName, "x")
            .op_atom(Opcode::GetProp, "y")
            .op(Opcode::Pop)
            .op_atom(Opcode::GetName, "x")
            .op(Opcode::Return);
        let program = b.build(&table).unwrap();

        assert_eq!(program.atoms().len(), 2);
        assert_eq!(program.atom_text(1), Some("y"));
        assert!(table.lookup("x").is_some());
        assert!(table.lookup("y").is_some());
        assert!(!program.needs_args_obj());
    }

    #[test]
    fn test_arguments_flag() {
        let mut b = ProgramBuilder::new("f");
        b.op(Opcode::Arguments).op(Opcode::Return);
        let program = b.build(&AtomTable::new()).unwrap();
        assert!(program.needs_args_obj());
    }

    #[test]
    fn test_offsets_walk_instruction_starts() {
        let mut b = ProgramBuilder::new("f").slots(1);
        b.int(7).op_u16(Opcode::SetLocal, 0).op(Opcode::Return);
        let program = b.build(&AtomTable::new()).unwrap();
        assert_eq!(program.offsets().collect::<Vec<_>>(), vec![0, 2, 5]);
        assert_eq!(program.info(2).map(|i| i.stack_depth), Some(1));
    }

    #[test]
    fn test_build_rejects_bad_program() {
        let mut b = ProgramBuilder::new("f");
        b.op(Opcode::Pop).op(Opcode::Stop);
        assert!(matches!(
            b.build(&AtomTable::new()),
            Err(AnalysisError::StackUnderflow(0))
        ));
    }
}
