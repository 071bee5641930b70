//! Scripts and their installed baseline code

use basalt_bytecode::BytecodeProgram;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use crate::ic::{IcIndex, Stub, StubId};
use crate::method::CompiledMethod;

/// A function's bytecode plus its currently installed baseline code
pub struct Script {
    program: Arc<BytecodeProgram>,
    baseline: RwLock<Option<Arc<CompiledMethod>>>,
}

impl Script {
    pub fn new(program: impl Into<Arc<BytecodeProgram>>) -> Self {
        Self {
            program: program.into(),
            baseline: RwLock::new(None),
        }
    }

    pub fn program(&self) -> &BytecodeProgram {
        &self.program
    }

    pub fn name(&self) -> &str {
        self.program.name()
    }

    /// Installed baseline code, if any
    pub fn baseline(&self) -> Option<Arc<CompiledMethod>> {
        self.baseline.read().clone()
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.read().is_some()
    }

    /// Publish `method`, replacing any earlier one
    pub(crate) fn install(&self, method: Arc<CompiledMethod>) {
        *self.baseline.write() = Some(method);
    }

    /// Detach the baseline code, e.g. when tiering up or invalidating
    pub fn discard_baseline(&self) -> Option<Arc<CompiledMethod>> {
        self.baseline.write().take()
    }

    /// Visit every live stub of the installed code
    pub fn trace_stubs(&self, visitor: impl FnMut(IcIndex, StubId, &Stub)) {
        if let Some(method) = self.baseline() {
            method.trace(visitor);
        }
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("name", &self.name())
            .field("baseline", &self.has_baseline())
            .finish()
    }
}
