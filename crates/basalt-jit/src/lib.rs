//! Baseline JIT for Basalt bytecode
//!
//! This crate compiles one script at a time into linear virtual-ISA code
//! without optimization. It provides:
//! - A symbolic operand stack that defers code emission until values move
//! - Inline-cache sites with fallback stubs for every dynamic operation
//! - A per-opcode lowering table and a compilation driver
//! - A pluggable linker over a bounded code pool
//! - Compiled-method artifacts installed atomically on their script
//! - A small machine for running installed code against a host

#![warn(rust_2018_idioms)]

pub mod compiler;
pub mod config;
pub mod error;
pub mod frame;
pub mod ic;
pub mod linker;
pub mod lowering;
pub mod masm;
pub mod method;
pub mod script;
pub mod vm;

pub use compiler::{BaselineCompiler, CompilerState};
pub use config::{ConfigError, JitConfig};
pub use error::{Bailout, CompileError, MethodStatus};
pub use ic::{
    FallbackFactory, IcEntry, IcIndex, IcKind, Stub, StubCode, StubId, StubKind, StubResult,
};
pub use linker::{CodePool, ExecutableCode, LinkError, Linker, PoolLinker};
pub use method::CompiledMethod;
pub use script::Script;
pub use vm::{CallResult, DefaultFallbacks, GlobalHost, Host, IcFrame, Machine, VmError};

use basalt_bytecode::AtomLookup;
use std::sync::Arc;
use tracing::{debug, info_span, trace, warn};

/// Baseline compiler entry point shared by all scripts of a runtime
pub struct BaselineJit {
    config: JitConfig,
    atoms: Arc<dyn AtomLookup>,
    linker: Arc<dyn Linker>,
    fallbacks: Arc<dyn FallbackFactory>,
}

impl BaselineJit {
    /// Create a compiler with the default pool linker and fallback stubs
    pub fn new(config: JitConfig, atoms: Arc<dyn AtomLookup>) -> Self {
        let pool = CodePool::new(config.code_pool_limit);
        Self {
            config,
            atoms,
            linker: Arc::new(PoolLinker::new(pool)),
            fallbacks: Arc::new(DefaultFallbacks),
        }
    }

    pub fn with_linker(mut self, linker: Arc<dyn Linker>) -> Self {
        self.linker = linker;
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: Arc<dyn FallbackFactory>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Compile `script` and install the result on it.
    ///
    /// On failure the script keeps whatever code it had before.
    pub fn try_compile(&self, script: &Script) -> Result<Arc<CompiledMethod>, CompileError> {
        let _span = info_span!("baseline_compile", script = script.name()).entered();

        let compiler = BaselineCompiler::new(
            script.program(),
            &self.config,
            &*self.atoms,
            &*self.fallbacks,
        );
        match compiler.compile(&*self.linker) {
            Ok(method) => {
                let method = Arc::new(method);
                script.install(Arc::clone(&method));
                debug!(
                    ics = method.ic_entries().len(),
                    code_size = method.code().code_size(),
                    "installed baseline code"
                );
                Ok(method)
            }
            Err(err) if err.is_cant_compile() => {
                trace!(reason = %err, "script not compilable");
                Err(err)
            }
            Err(err) => {
                warn!(error = %err, "baseline compilation failed");
                Err(err)
            }
        }
    }

    /// Compile `script`, reporting only the outcome
    pub fn compile(&self, script: &Script) -> MethodStatus {
        match self.try_compile(script) {
            Ok(_) => MethodStatus::Compiled,
            Err(err) => err.status(),
        }
    }
}

impl std::fmt::Debug for BaselineJit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaselineJit")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
