//! Linking emitted code into executable form
//!
//! The `Linker` trait is the seam to whatever places code in memory. The
//! default `PoolLinker` resolves labels to instruction offsets, carves space
//! out of a shared, capacity-bounded `CodePool` and leaves one unpatched slot
//! per recorded IC patch site.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::ic::IcIndex;
use crate::masm::{CodeOffset, Inst, Label, MacroAssembler, PatchSite};

/// Slot value before its patch site is resolved
pub const UNPATCHED: u32 = u32::MAX;

/// Error while linking
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("Label L{0} used but never bound")]
    UnboundLabel(u32),
    #[error("Code pool exhausted: requested {requested}, available {available}")]
    PoolExhausted { requested: usize, available: usize },
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Shared budget for linked code, measured in instructions
#[derive(Debug)]
pub struct CodePool {
    capacity: usize,
    used: AtomicUsize,
}

impl CodePool {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            used: AtomicUsize::new(0),
        })
    }

    /// Reserve `size` units, failing if the pool cannot hold them
    pub fn reserve(self: &Arc<Self>, size: usize) -> Result<CodeReservation, LinkError> {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let available = self.capacity.saturating_sub(current);
            if size > available {
                return Err(LinkError::PoolExhausted {
                    requested: size,
                    available,
                });
            }
            match self.used.compare_exchange_weak(
                current,
                current + size,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Ok(CodeReservation {
                        pool: Arc::clone(self),
                        size,
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Space held in a `CodePool`; released on drop
#[derive(Debug)]
pub struct CodeReservation {
    pool: Arc<CodePool>,
    size: usize,
}

impl Drop for CodeReservation {
    fn drop(&mut self) {
        self.pool.used.fetch_sub(self.size, Ordering::AcqRel);
    }
}

/// Linked code
pub struct ExecutableCode {
    insts: Box<[Inst]>,
    entry: CodeOffset,
    patches: Box<[PatchSite]>,
    ic_slots: Box<[AtomicU32]>,
    _reservation: Option<CodeReservation>,
}

impl ExecutableCode {
    /// Build from resolved instructions; every IC slot starts unpatched
    pub fn new(
        insts: Vec<Inst>,
        entry: CodeOffset,
        patches: Vec<PatchSite>,
        reservation: Option<CodeReservation>,
    ) -> Self {
        let ic_slots = patches.iter().map(|_| AtomicU32::new(UNPATCHED)).collect();
        Self {
            insts: insts.into_boxed_slice(),
            entry,
            patches: patches.into_boxed_slice(),
            ic_slots,
            _reservation: reservation,
        }
    }

    pub fn entry(&self) -> CodeOffset {
        self.entry
    }

    pub fn insts(&self) -> &[Inst] {
        &self.insts
    }

    pub fn inst(&self, offset: CodeOffset) -> Option<&Inst> {
        self.insts.get(offset as usize)
    }

    /// Size in instructions
    pub fn code_size(&self) -> usize {
        self.insts.len()
    }

    pub fn patches(&self) -> &[PatchSite] {
        &self.patches
    }

    /// Write the resolved entry into each patch slot
    pub(crate) fn resolve_patches(&self) {
        for (slot, site) in self.ic_slots.iter().zip(self.patches.iter()) {
            slot.store(site.entry.0, Ordering::Release);
        }
    }

    /// IC entry a patch slot refers to, `None` while unpatched
    pub fn ic_slot(&self, patch: u32) -> Option<IcIndex> {
        let raw = self.ic_slots.get(patch as usize)?.load(Ordering::Acquire);
        (raw != UNPATCHED).then_some(IcIndex(raw))
    }
}

impl fmt::Debug for ExecutableCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableCode")
            .field("code_size", &self.insts.len())
            .field("entry", &self.entry)
            .field("patches", &self.patches.len())
            .finish()
    }
}

impl fmt::Display for ExecutableCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (offset, inst) in self.insts.iter().enumerate() {
            writeln!(f, "{offset:4}  {inst}")?;
        }
        Ok(())
    }
}

/// Places emitted code in memory
pub trait Linker: Send + Sync {
    fn link(&self, masm: MacroAssembler) -> Result<ExecutableCode, LinkError>;
}

/// Resolve label operands to bound offsets
pub fn resolve_labels(masm: MacroAssembler) -> Result<(Vec<Inst>, Vec<PatchSite>), LinkError> {
    let (code, labels, patches) = masm.into_parts();
    let resolve = |label: Label| -> Result<CodeOffset, LinkError> {
        labels
            .get(label.index() as usize)
            .copied()
            .flatten()
            .ok_or(LinkError::UnboundLabel(label.index()))
    };
    let insts = code
        .into_iter()
        .map(|inst| inst.map_target(&resolve))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((insts, patches))
}

/// Default linker backed by a `CodePool`
#[derive(Debug, Clone)]
pub struct PoolLinker {
    pool: Arc<CodePool>,
}

impl PoolLinker {
    pub fn new(pool: Arc<CodePool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<CodePool> {
        &self.pool
    }
}

impl Linker for PoolLinker {
    fn link(&self, masm: MacroAssembler) -> Result<ExecutableCode, LinkError> {
        let (insts, patches) = resolve_labels(masm)?;
        let reservation = self.pool.reserve(insts.len())?;
        Ok(ExecutableCode::new(insts, 0, patches, Some(reservation)))
    }
}
