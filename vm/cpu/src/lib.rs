// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-CPU state: the processor registry, feature enumeration and
//! trap configuration.

pub mod aarch64;
pub mod desc;
pub mod x86;

use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;

/// A processor index: dense, starting at zero, assigned in discovery
/// order. Distinct from any firmware identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CpuId(pub u16);

/// One discovered processor.
#[derive(Copy, Clone, Debug, Default)]
pub struct CpuRecord {
    /// x86 APIC id, or the packed MPIDR affinity on ARM.
    pub firmware_id: u32,
    /// Full MPIDR affinity bits (ARM).
    pub mpidr: u64,
    /// Redistributor base for this CPU, when applicable.
    pub gicr: u64,
}

/// Error from processor registration.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("platform has more than {max} CPUs")]
pub struct TooManyCpus {
    pub max: usize,
}

/// The process-wide processor registry.
///
/// Populated on the boot CPU during firmware-table parsing, before any
/// application processor runs; records are never destroyed.
pub struct CpuRegistry {
    records: Vec<CpuRecord>,
    max: usize,
    boot: CpuId,
    online: AtomicU32,
}

impl CpuRegistry {
    pub fn new(max: usize) -> CpuRegistry {
        CpuRegistry {
            records: Vec::new(),
            max,
            boot: CpuId(0),
            online: AtomicU32::new(0),
        }
    }

    /// Registers a usable processor, assigning the next dense id.
    pub fn allocate(&mut self, record: CpuRecord) -> Result<CpuId, TooManyCpus> {
        if self.records.len() == self.max {
            return Err(TooManyCpus { max: self.max });
        }
        let id = CpuId(self.records.len() as u16);
        tracing::debug!(
            cpu = id.0,
            firmware_id = record.firmware_id,
            "registered processor"
        );
        self.records.push(record);
        Ok(id)
    }

    /// Declares which registered CPU is the boot CPU. Firmware sets
    /// this on ARM; on x86 it stays zero unless overridden.
    pub fn set_boot(&mut self, id: CpuId) {
        assert!((id.0 as usize) < self.records.len());
        self.boot = id;
    }

    pub fn boot_cpu(&self) -> CpuId {
        self.boot
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, id: CpuId) -> &CpuRecord {
        &self.records[id.0 as usize]
    }

    pub fn records(&self) -> impl ExactSizeIterator<Item = (CpuId, &CpuRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, r)| (CpuId(i as u16), r))
    }

    /// Finds the dense id for a firmware identifier.
    pub fn lookup(&self, firmware_id: u32) -> Option<CpuId> {
        self.records
            .iter()
            .position(|r| r.firmware_id == firmware_id)
            .map(|i| CpuId(i as u16))
    }

    /// Counts a CPU as online. Monotone non-decreasing until teardown.
    pub fn mark_online(&self) -> u32 {
        self.online.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn online(&self) -> u32 {
        self.online.load(Ordering::Acquire)
    }
}
