// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! x86 definitions of non-translated MSI address and data.

use crate::apic::APIC_BASE_ADDRESS;
use bitfield_struct::bitfield;

/// The layout of the MSI address element.
#[bitfield(u32)]
pub struct MsiAddress {
    #[bits(2)]
    _reserved: u32,
    pub destination_mode_logical: bool,
    pub redirection_hint: bool,
    pub extended_destination: u8,
    pub destination: u8,
    #[bits(12)]
    pub address: u16,
}

/// The expected value for [`MsiAddress::address`].
pub const MSI_ADDRESS: u16 = (APIC_BASE_ADDRESS >> 20) as u16;

/// Size of the physical window reserved for message-signaled
/// interrupts; no memory may be mapped for DMA inside it.
pub const MSI_WINDOW_BASE: u64 = 0xfee0_0000;
pub const MSI_WINDOW_SIZE: u64 = 0x10_0000;

/// The layout of the MSI data element.
#[bitfield(u32)]
pub struct MsiData {
    pub vector: u8,
    #[bits(3)]
    pub delivery_mode: u8,
    pub destination_mode_logical: bool,
    #[bits(2)]
    _reserved: u8,
    pub assert: bool,
    pub trigger_mode_level: bool,
    _reserved2: u16,
}
