// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! DMA-remapping drivers: ARM SMMUv2 and Intel VT-d.
//!
//! Both confine assigned devices to their owning domain's DMA address
//! space: a stream (SMMU) or PCI source id (VT-d) is routed to a
//! stage-2 translation rooted at the domain's page table, tagged by a
//! stage-2 domain identifier. Every table update is followed by a TLB
//! synchronize before the device's next transaction may observe it.

pub mod sdid;
pub mod smmu;
pub mod vtd;

pub use sdid::Sdid;
pub use sdid::SdidAllocator;

/// Errors from IOMMU configuration.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum IommuError {
    /// Stream id, mask, group or context index outside what the
    /// hardware implements.
    #[error("stream descriptor out of range")]
    BadStream,
    /// The stage-2 domain identifier space is exhausted.
    #[error("out of stage-2 domain identifiers")]
    SdidExhausted,
    /// A synchronize or command handshake timed out.
    #[error("hardware handshake timeout")]
    Timeout,
}
