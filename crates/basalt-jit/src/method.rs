//! Compiled-method artifact
//!
//! A `CompiledMethod` owns the linked code, the IC entries in emission order
//! and the stub storage their chains live in. It is built once per successful
//! compilation and shared through an `Arc`.

use parking_lot::RwLock;
use std::fmt;

use crate::error::CompileError;
use crate::ic::{IcEntry, IcIndex, Stub, StubCode, StubId, StubKind, StubSpace};
use crate::linker::ExecutableCode;
use crate::masm::CodeOffset;

/// Baseline code for one script
pub struct CompiledMethod {
    code: ExecutableCode,
    ic_entries: Box<[IcEntry]>,
    stubs: RwLock<StubSpace>,
}

impl CompiledMethod {
    /// Adopt the IC entries and stub storage and point every patch site at
    /// its entry
    pub(crate) fn new(code: ExecutableCode, ic_entries: Vec<IcEntry>, stubs: StubSpace) -> Self {
        debug_assert!(code
            .patches()
            .iter()
            .all(|site| (site.entry.0 as usize) < ic_entries.len()));
        code.resolve_patches();
        Self {
            code,
            ic_entries: ic_entries.into_boxed_slice(),
            stubs: RwLock::new(stubs),
        }
    }

    pub fn code(&self) -> &ExecutableCode {
        &self.code
    }

    /// Entry point
    pub fn entry(&self) -> CodeOffset {
        self.code.entry()
    }

    /// IC entries in emission order
    pub fn ic_entries(&self) -> &[IcEntry] {
        &self.ic_entries
    }

    pub fn ic_entry(&self, index: IcIndex) -> Option<&IcEntry> {
        self.ic_entries.get(index.0 as usize)
    }

    /// IC entries belonging to the opcode at bytecode offset `pc`
    pub fn ic_entries_for_pc(&self, pc: usize) -> impl Iterator<Item = &IcEntry> + '_ {
        self.ic_entries
            .iter()
            .filter(move |entry| entry.pc_offset as usize == pc)
    }

    /// Code and successor of stub `id`
    pub fn stub(&self, id: StubId) -> Option<(StubCode, Option<StubId>)> {
        self.stubs.read().get(id).map(|stub| (stub.code, stub.next))
    }

    /// Kinds of the stubs in an entry's chain, head first
    pub fn stub_chain(&self, index: IcIndex) -> Vec<StubKind> {
        let Some(entry) = self.ic_entry(index) else {
            return Vec::new();
        };
        let stubs = self.stubs.read();
        let mut chain = Vec::new();
        let mut cursor = Some(entry.first_stub());
        while let Some(id) = cursor {
            let Some(stub) = stubs.get(id) else { break };
            chain.push(stub.kind);
            cursor = stub.next;
        }
        chain
    }

    /// Prepend a specialized stub to an entry's chain
    pub fn prepend_stub(&self, index: IcIndex, code: StubCode) -> Result<StubId, CompileError> {
        let entry = self
            .ic_entry(index)
            .ok_or(CompileError::UnknownIcEntry(index.0))?;
        let mut stubs = self.stubs.write();
        let id = stubs.alloc(Stub {
            kind: StubKind::Specialized,
            code,
            next: Some(entry.first_stub()),
        })?;
        entry.set_first_stub(id);
        Ok(id)
    }

    /// Number of stubs allocated for this method
    pub fn stub_count(&self) -> usize {
        self.stubs.read().len()
    }

    /// Visit every stub reachable from an entry chain
    pub fn trace(&self, mut visitor: impl FnMut(IcIndex, StubId, &Stub)) {
        let stubs = self.stubs.read();
        for (i, entry) in self.ic_entries.iter().enumerate() {
            let mut cursor = Some(entry.first_stub());
            while let Some(id) = cursor {
                let Some(stub) = stubs.get(id) else { break };
                visitor(IcIndex(i as u32), id, stub);
                cursor = stub.next;
            }
        }
    }
}

impl fmt::Debug for CompiledMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledMethod")
            .field("code", &self.code)
            .field("ic_entries", &self.ic_entries.len())
            .field("stubs", &self.stub_count())
            .finish()
    }
}
