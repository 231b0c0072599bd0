// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The register-file access seam for device drivers.
//!
//! Drivers program hardware through [`RegisterIo`] rather than raw
//! pointers; the kernel implements it over mapped MMIO windows, and
//! tests over [`testing::FakeIo`]. Every implementation is expected
//! to be bound to an explicitly mapped, bounds-checked window.

/// 32/64-bit register access at byte offsets within one device's
/// register window.
pub trait RegisterIo {
    fn read32(&self, offset: u64) -> u32;
    fn write32(&mut self, offset: u64, value: u32);

    fn read64(&self, offset: u64) -> u64 {
        self.read32(offset) as u64 | (self.read32(offset + 4) as u64) << 32
    }

    fn write64(&mut self, offset: u64, value: u64) {
        self.write32(offset, value as u32);
        self.write32(offset + 4, (value >> 32) as u32);
    }

    fn write8(&mut self, offset: u64, value: u8) {
        self.write32(offset, value as u32);
    }
}

pub mod testing {
    use super::RegisterIo;
    use std::collections::BTreeMap;

    /// Sparse register file recording every write in order.
    #[derive(Default)]
    pub struct FakeIo {
        pub regs: BTreeMap<u64, u32>,
        pub writes: Vec<(u64, u32)>,
    }

    impl FakeIo {
        pub fn with(regs: impl IntoIterator<Item = (u64, u32)>) -> FakeIo {
            FakeIo {
                regs: regs.into_iter().collect(),
                writes: Vec::new(),
            }
        }

        /// The last value written to `offset`, if any.
        pub fn written(&self, offset: u64) -> Option<u32> {
            self.writes
                .iter()
                .rev()
                .find(|(o, _)| *o == offset)
                .map(|&(_, v)| v)
        }
    }

    impl RegisterIo for FakeIo {
        fn read32(&self, offset: u64) -> u32 {
            self.regs.get(&offset).copied().unwrap_or(0)
        }

        fn write32(&mut self, offset: u64, value: u32) {
            self.regs.insert(offset, value);
            self.writes.push((offset, value));
        }
    }
}
