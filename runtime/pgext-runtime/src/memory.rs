///
/// Memory context for by-reference datums.
///
/// Every varlena and `internal` value handed out by the host lives in one
/// slab owned by the backend. Its datum is a handle: the context's
/// generation in the high 32 bits and the 1-based slot in the low 32 bits.
/// `reset` frees every slot and bumps the generation, so handles from
/// before the reset (and plain scalars misused as references) miss instead
/// of aliasing new allocations.
///

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pgext_core::{Datum, InternalState, Varlena};

use crate::Backend;

enum Chunk {
    Varlena(Varlena),
    Internal(Rc<dyn Any>),
}

pub(crate) struct MemoryContext {
    generation: Cell<u32>,
    chunks: RefCell<Vec<Chunk>>,
    allocated_bytes: Cell<usize>,
    allocations: Cell<u64>,
}

impl MemoryContext {
    pub fn new() -> Self {
        Self {
            generation: Cell::new(1),
            chunks: RefCell::new(Vec::new()),
            allocated_bytes: Cell::new(0),
            allocations: Cell::new(0),
        }
    }

    fn push(&self, chunk: Chunk, size: usize) -> Datum {
        let mut chunks = self.chunks.borrow_mut();
        chunks.push(chunk);
        self.allocated_bytes.set(self.allocated_bytes.get() + size);
        self.allocations.set(self.allocations.get() + 1);
        let slot = chunks.len() as u64;
        Datum::from_u64(((self.generation.get() as u64) << 32) | slot)
    }

    fn slot(&self, datum: Datum) -> Option<usize> {
        let raw = datum.raw();
        if (raw >> 32) as u32 != self.generation.get() {
            return None;
        }
        ((raw & 0xFFFF_FFFF) as usize).checked_sub(1)
    }

    pub fn alloc_varlena(&self, blob: Varlena) -> Datum {
        let size = blob.varsize_any();
        self.push(Chunk::Varlena(blob), size)
    }

    pub fn alloc_internal(&self, value: Rc<dyn Any>) -> Datum {
        self.push(Chunk::Internal(value), std::mem::size_of::<usize>())
    }

    pub fn varlena(&self, datum: Datum) -> Option<Varlena> {
        let slot = self.slot(datum)?;
        match self.chunks.borrow().get(slot)? {
            Chunk::Varlena(blob) => Some(blob.clone()),
            Chunk::Internal(_) => None,
        }
    }

    pub fn internal(&self, datum: Datum) -> Option<Rc<dyn Any>> {
        let slot = self.slot(datum)?;
        match self.chunks.borrow().get(slot)? {
            Chunk::Internal(value) => Some(value.clone()),
            Chunk::Varlena(_) => None,
        }
    }

    pub fn reset(&self) {
        let freed = self.chunks.borrow().len();
        self.chunks.borrow_mut().clear();
        self.allocated_bytes.set(0);
        self.generation.set(self.generation.get().wrapping_add(1).max(1));
        tracing::debug!(freed, generation = self.generation.get(), "memory context reset");
    }

    pub fn live_chunks(&self) -> usize {
        self.chunks.borrow().len()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.get()
    }

    pub fn allocations(&self) -> u64 {
        self.allocations.get()
    }
}

impl InternalState for Backend {
    fn internal_state(&self, datum: Datum) -> Option<Rc<dyn Any>> {
        self.memory.internal(datum)
    }
}
