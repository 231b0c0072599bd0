// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Stage-2 domain identifiers.

use crate::IommuError;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;

/// A stage-2 domain identifier: the tag that scopes stage-2 TLB
/// entries for one DMA space (VMID on ARM, domain id on VT-d).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Sdid(pub u16);

/// Monotone identifier allocator. Identifiers are not recycled;
/// exhaustion is an allocation error.
pub struct SdidAllocator {
    next: AtomicU32,
    limit: u32,
}

impl SdidAllocator {
    /// An allocator bounded by the hardware's identifier width in
    /// bits (8 for SMMUv2 context banks, up to 16 for VT-d).
    pub fn new(bits: u32) -> SdidAllocator {
        SdidAllocator {
            next: AtomicU32::new(0),
            limit: 1 << bits.min(16),
        }
    }

    pub fn alloc(&self) -> Result<Sdid, IommuError> {
        let v = self.next.fetch_add(1, Ordering::Relaxed);
        if v >= self.limit {
            return Err(IommuError::SdidExhausted);
        }
        Ok(Sdid(v as u16))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotone() {
        let a = SdidAllocator::new(16);
        assert_eq!(a.alloc(), Ok(Sdid(0)));
        assert_eq!(a.alloc(), Ok(Sdid(1)));
        assert_eq!(a.alloc(), Ok(Sdid(2)));
    }

    #[test]
    fn exhaustion_is_an_error() {
        let a = SdidAllocator::new(1);
        assert!(a.alloc().is_ok());
        assert!(a.alloc().is_ok());
        assert_eq!(a.alloc(), Err(IommuError::SdidExhausted));
        // Still failing; no wraparound reuse.
        assert_eq!(a.alloc(), Err(IommuError::SdidExhausted));
    }
}
