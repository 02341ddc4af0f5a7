//! Scoped ownership of intermediate inference buffers
//!
//! Every tensor created while classifying an image is registered with a
//! [`BufferScope`]. Dropping the scope releases them all, so cleanup happens
//! on every exit path including early `?` returns. The shared
//! [`BufferLedger`] counts buffers that are still alive.

use candle_core::Tensor;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Live and lifetime buffer counters shared by all scopes of a pipeline
#[derive(Debug, Clone, Default)]
pub struct BufferLedger {
    inner: Arc<LedgerInner>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    live: AtomicUsize,
    allocated: AtomicU64,
}

impl BufferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers currently held by open scopes
    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Buffers registered since creation
    pub fn allocated(&self) -> u64 {
        self.inner.allocated.load(Ordering::Relaxed)
    }

    /// Open a new scope
    pub fn scope(&self) -> BufferScope {
        BufferScope {
            ledger: self.clone(),
            buffers: Vec::new(),
        }
    }
}

/// Owner of the intermediate buffers of one inference
pub struct BufferScope {
    ledger: BufferLedger,
    buffers: Vec<Tensor>,
}

impl BufferScope {
    /// Register `tensor` and hand it back for further use
    pub fn track(&mut self, tensor: Tensor) -> Tensor {
        self.ledger.inner.live.fetch_add(1, Ordering::SeqCst);
        self.ledger.inner.allocated.fetch_add(1, Ordering::Relaxed);
        self.buffers.push(tensor.clone());
        tensor
    }

    /// Buffers held by this scope
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl Drop for BufferScope {
    fn drop(&mut self) {
        let released = self.buffers.len();
        self.buffers.clear();
        self.ledger.inner.live.fetch_sub(released, Ordering::SeqCst);
    }
}
