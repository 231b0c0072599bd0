// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Early platform discovery.
//!
//! Walks the firmware description tables (ACPI, or a Flattened
//! Devicetree on AArch64 when ACPI is absent) into a [`Platform`]
//! model describing CPUs, interrupt controllers, IOMMUs, PCI
//! segments, consoles and power hardware. Parsing happens once, on
//! the boot CPU, before any other processor is released.

pub mod devicetree;
pub mod discover;
pub mod fixed;
pub mod platform;

pub use discover::Discovery;
pub use platform::Platform;

/// Read access to physical memory during discovery.
///
/// The kernel implements this over its physical mapping window; tests
/// implement it over byte buffers. A `None` return means the range is
/// not mapped (or not backed), and the requester must treat the
/// structure as absent.
pub trait PhysMemory {
    /// Borrows `len` bytes of physical memory at `phys`.
    fn view(&self, phys: u64, len: usize) -> Option<&[u8]>;
}

/// Errors that abort discovery entirely (individual bad tables are
/// skipped, not errors).
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no valid RSDP found")]
    NoRsdp,
    #[error("root table at {phys:#x} is unmapped or invalid")]
    BadRootTable { phys: u64 },
    #[error("platform CPU limit exceeded")]
    TooManyCpus(#[from] cpu::TooManyCpus),
}

#[cfg(test)]
pub(crate) mod test_mem {
    use super::PhysMemory;
    use std::collections::BTreeMap;

    /// Sparse physical memory backed by byte buffers.
    #[derive(Default)]
    pub struct TestMemory {
        regions: BTreeMap<u64, Vec<u8>>,
    }

    impl TestMemory {
        pub fn put(&mut self, phys: u64, bytes: Vec<u8>) {
            self.regions.insert(phys, bytes);
        }
    }

    impl PhysMemory for TestMemory {
        fn view(&self, phys: u64, len: usize) -> Option<&[u8]> {
            let (&base, bytes) = self.regions.range(..=phys).next_back()?;
            let off = (phys - base) as usize;
            bytes.get(off..off.checked_add(len)?)
        }
    }
}
