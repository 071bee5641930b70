//! Inline cache sites
//!
//! Every cacheable opcode occurrence gets one `IcEntry` whose stub chain
//! starts with a fallback stub obtained from a [`FallbackFactory`]. Stubs
//! live in a per-method `StubSpace` arena and link to each other by index;
//! an entry's chain head is an atomic index so later specialization can
//! prepend stubs while compiled code is running.

use basalt_bytecode::{Atom, Opcode};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::CompileError;
use crate::masm::CodeOffset;
use crate::vm::{IcFrame, VmError};

/// Index of an IC entry within its method, in program order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IcIndex(pub u32);

/// Index of a stub within its method's stub space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StubId(pub u32);

/// Operation an IC site performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IcKind {
    /// R0 -> boolean R0
    ToBool,
    /// R0 -> numeric R0
    ToNumber,
    /// R0 op R1 -> R0 (`Add` ... `Ursh`)
    BinaryArith(Opcode),
    /// op R0 -> R0 (`Neg`, `BitNot`)
    Unary(Opcode),
    /// R0 op R1 -> boolean R0 (`Eq` ... `Ge`)
    Compare(Opcode),
    GetName(Atom),
    /// Value staged in the scratch slot
    SetName(Atom),
    GetGlobal(Atom),
    /// Value staged in the scratch slot
    SetGlobal(Atom),
    /// Object in R0 -> R0
    GetProp(Atom),
    /// Object in R0, value staged in the scratch slot
    SetProp(Atom),
    /// Object in R0, key in R1 -> R0
    GetElem,
    /// Object in R0, key in R1, value staged in the scratch slot
    SetElem,
    /// Callee, this and arguments on the machine stack, argc register set
    Call(u16),
}

impl fmt::Display for IcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcKind::ToBool => f.write_str("ToBool"),
            IcKind::ToNumber => f.write_str("ToNumber"),
            IcKind::BinaryArith(op) => write!(f, "BinaryArith({op})"),
            IcKind::Unary(op) => write!(f, "Unary({op})"),
            IcKind::Compare(op) => write!(f, "Compare({op})"),
            IcKind::GetName(a) => write!(f, "GetName({a})"),
            IcKind::SetName(a) => write!(f, "SetName({a})"),
            IcKind::GetGlobal(a) => write!(f, "GetGlobal({a})"),
            IcKind::SetGlobal(a) => write!(f, "SetGlobal({a})"),
            IcKind::GetProp(a) => write!(f, "GetProp({a})"),
            IcKind::SetProp(a) => write!(f, "SetProp({a})"),
            IcKind::GetElem => f.write_str("GetElem"),
            IcKind::SetElem => f.write_str("SetElem"),
            IcKind::Call(argc) => write!(f, "Call({argc})"),
        }
    }
}

/// What a stub did with the operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubResult {
    /// Operation performed, result in place
    Done,
    /// Guard failed; continue with the next stub in the chain
    Next,
}

/// Stub body
pub type StubCode = fn(&mut IcFrame<'_>) -> Result<StubResult, VmError>;

/// Role of a stub in its chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubKind {
    /// Generic handler at the end of every chain
    Fallback,
    /// Type-specialized fast path
    Specialized,
}

/// One stub in a chain
#[derive(Clone, Copy)]
pub struct Stub {
    pub kind: StubKind,
    pub code: StubCode,
    pub next: Option<StubId>,
}

impl fmt::Debug for Stub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stub")
            .field("kind", &self.kind)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

/// Produces fallback stub bodies for IC kinds
pub trait FallbackFactory: Send + Sync {
    /// Fallback body for `kind`, or `None` if it cannot provide one
    fn create(&self, kind: &IcKind) -> Option<StubCode>;
}

/// Bounded stub arena
#[derive(Debug)]
pub struct StubSpace {
    stubs: Vec<Stub>,
    limit: usize,
}

impl StubSpace {
    pub fn new(limit: usize) -> Self {
        Self {
            stubs: Vec::new(),
            limit,
        }
    }

    /// Allocate a stub
    pub fn alloc(&mut self, stub: Stub) -> Result<StubId, CompileError> {
        if self.stubs.len() >= self.limit {
            return Err(CompileError::StubSpaceExhausted { limit: self.limit });
        }
        let id = StubId(self.stubs.len() as u32);
        self.stubs.push(stub);
        Ok(id)
    }

    pub fn get(&self, id: StubId) -> Option<&Stub> {
        self.stubs.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Per-site IC record
#[derive(Debug)]
pub struct IcEntry {
    /// Bytecode offset of the opcode this site belongs to
    pub pc_offset: u32,
    pub kind: IcKind,
    /// Offset of the instruction following the call
    pub return_offset: CodeOffset,
    first_stub: AtomicU32,
}

impl IcEntry {
    fn new(pc_offset: u32, kind: IcKind, first_stub: StubId) -> Self {
        Self {
            pc_offset,
            kind,
            return_offset: 0,
            first_stub: AtomicU32::new(first_stub.0),
        }
    }

    /// Head of the stub chain
    pub fn first_stub(&self) -> StubId {
        StubId(self.first_stub.load(Ordering::Acquire))
    }

    pub(crate) fn set_first_stub(&self, id: StubId) {
        self.first_stub.store(id.0, Ordering::Release);
    }
}

/// Creates IC entries in program order during one compilation
pub struct IcAllocator<'a> {
    entries: Vec<IcEntry>,
    stubs: StubSpace,
    max_entries: usize,
    factory: &'a dyn FallbackFactory,
}

impl<'a> IcAllocator<'a> {
    pub fn new(factory: &'a dyn FallbackFactory, max_entries: usize, stub_limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            stubs: StubSpace::new(stub_limit),
            max_entries,
            factory,
        }
    }

    /// Create an entry plus its fallback stub for the opcode at `pc`
    pub fn allocate(&mut self, kind: IcKind, pc: usize) -> Result<IcIndex, CompileError> {
        if self.entries.len() >= self.max_entries {
            return Err(CompileError::IcTableFull {
                limit: self.max_entries,
            });
        }
        let code = self
            .factory
            .create(&kind)
            .ok_or_else(|| CompileError::FallbackUnavailable(kind.to_string()))?;
        let stub = self.stubs.alloc(Stub {
            kind: StubKind::Fallback,
            code,
            next: None,
        })?;

        let index = IcIndex(self.entries.len() as u32);
        self.entries.push(IcEntry::new(pc as u32, kind, stub));
        Ok(index)
    }

    /// Record where the call through `index` returns to
    pub fn set_return_offset(&mut self, index: IcIndex, offset: CodeOffset) {
        self.entries[index.0 as usize].return_offset = offset;
    }

    pub fn entries(&self) -> &[IcEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hand entries and stub storage over to the compiled method
    pub fn into_parts(self) -> (Vec<IcEntry>, StubSpace) {
        (self.entries, self.stubs)
    }
}
