//! Compilation outcomes and errors

use basalt_bytecode::{DecodeError, Opcode};

use crate::linker::LinkError;

/// Outcome of a compilation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodStatus {
    /// Code was compiled and installed
    Compiled,
    /// The script uses something this tier does not handle
    CantCompile,
    /// Resource exhaustion or a backend failure
    Error,
}

/// Why a script is not compilable by this tier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Bailout {
    #[error("unsupported opcode {opcode} at offset {offset}")]
    UnsupportedOpcode { opcode: Opcode, offset: usize },
    #[error("script needs an arguments object")]
    ArgumentsObject,
    #[error("script length {length} exceeds limit {limit}")]
    ScriptTooLarge { length: usize, limit: usize },
}

/// Error from a compilation attempt
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Can't compile: {0}")]
    CantCompile(#[from] Bailout),
    #[error("IC entry table full ({limit} entries)")]
    IcTableFull { limit: usize },
    #[error("Stub space exhausted ({limit} stubs)")]
    StubSpaceExhausted { limit: usize },
    #[error("No fallback stub for {0}")]
    FallbackUnavailable(String),
    #[error("Failed to reserve {0} labels")]
    LabelAllocation(usize),
    #[error("No IC entry with index {0}")]
    UnknownIcEntry(u32),
    #[error("Atom {0:?} is not interned")]
    UnknownAtom(String),
    #[error("Bytecode error: {0}")]
    Bytecode(#[from] DecodeError),
    #[error("Link error: {0}")]
    Link(#[from] LinkError),
}

impl CompileError {
    /// Map to the coarse outcome reported to callers
    pub fn status(&self) -> MethodStatus {
        match self {
            CompileError::CantCompile(_) => MethodStatus::CantCompile,
            _ => MethodStatus::Error,
        }
    }

    /// Check if this is an expected bail-out
    pub fn is_cant_compile(&self) -> bool {
        self.status() == MethodStatus::CantCompile
    }
}
