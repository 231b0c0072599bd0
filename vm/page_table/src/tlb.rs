// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Deferred TLB shootdown bookkeeping.
//!
//! [`crate::PageTable::update`] never invalidates TLBs itself. The
//! owner of a space marks every CPU currently holding it dirty here,
//! sends IPIs, and each target acknowledges by clearing its bit and
//! invalidating on its next entry to the space.

use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;

/// Per-space dirty bits, one per CPU.
pub struct TlbControl {
    words: Vec<AtomicU64>,
}

impl TlbControl {
    pub fn new(max_cpus: usize) -> TlbControl {
        TlbControl {
            words: (0..max_cpus.div_ceil(64)).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Marks a shootdown pending for `cpu`.
    pub fn mark(&self, cpu: usize) {
        self.words[cpu / 64].fetch_or(1 << (cpu % 64), Ordering::Release);
    }

    /// Marks every CPU in the iterator.
    pub fn mark_all(&self, cpus: impl IntoIterator<Item = usize>) {
        for cpu in cpus {
            self.mark(cpu);
        }
    }

    /// Whether `cpu` still owes an invalidation.
    pub fn pending(&self, cpu: usize) -> bool {
        self.words[cpu / 64].load(Ordering::Acquire) & (1 << (cpu % 64)) != 0
    }

    /// Acknowledges the shootdown on `cpu`: clears its bit and reports
    /// whether an invalidation is owed.
    pub fn ack(&self, cpu: usize) -> bool {
        self.words[cpu / 64].fetch_and(!(1 << (cpu % 64)), Ordering::AcqRel) & (1 << (cpu % 64))
            != 0
    }

    /// Whether any CPU still owes an invalidation.
    pub fn any_pending(&self) -> bool {
        self.words.iter().any(|w| w.load(Ordering::Acquire) != 0)
    }
}
