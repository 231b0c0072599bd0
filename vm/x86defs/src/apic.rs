// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! APIC-related definitions.

use bitfield_struct::bitfield;
use open_enum::open_enum;

/// The physical address of the APIC at reset.
pub const APIC_BASE_ADDRESS: u32 = 0xfee00000;

/// The APIC base MSR.
#[bitfield(u64)]
pub struct ApicBase {
    _reserved: u8,
    /// True if this processor is the BSP.
    pub bsp: bool,
    _reserved2: bool,
    pub x2apic: bool,
    pub enable: bool,
    /// The page number of the APIC.
    #[bits(24)]
    pub base_page: u32,
    #[bits(28)]
    _reserved3: u64,
}

open_enum! {
    /// Architectural register indices; the MMIO offset is the index
    /// shifted left by 4, the x2APIC MSR is the index plus 0x800.
    pub enum ApicRegister: u8 {
        ID = 0x2,
        VERSION = 0x3,
        TPR = 0x8,
        EOI = 0xb,
        SVR = 0xf,
        ESR = 0x28,
        LVT_CMCI = 0x2f,
        ICR0 = 0x30,
        ICR1 = 0x31,
        LVT_TIMER = 0x32,
        LVT_THERMAL = 0x33,
        LVT_PMC = 0x34,
        LVT_LINT0 = 0x35,
        LVT_LINT1 = 0x36,
        LVT_ERROR = 0x37,
        TIMER_ICR = 0x38,
        TIMER_CCR = 0x39,
        TIMER_DCR = 0x3e,
        SELF_IPI = 0x3f,
    }
}

pub const X2APIC_MSR_BASE: u32 = 0x800;

impl ApicRegister {
    pub fn x2apic_msr(&self) -> u32 {
        X2APIC_MSR_BASE + self.0 as u32
    }

    pub fn mmio_offset(&self) -> u64 {
        (self.0 as u64) << 4
    }
}

/// Spurious vector register.
#[bitfield(u32)]
pub struct Svr {
    pub vector: u8,
    pub enable: bool,
    pub focus_processor_checking: bool,
    #[bits(2)]
    _rsvd: u32,
    pub eoi_broadcast_suppression: bool,
    #[bits(19)]
    _rsvd2: u32,
}

/// Local vector table entry.
#[bitfield(u32)]
pub struct Lvt {
    pub vector: u8,
    #[bits(3)]
    pub delivery_mode: u8,
    _rsvd: bool,
    pub delivery_status: bool,
    pub input_pin_polarity: bool,
    pub remote_irr: bool,
    pub trigger_mode_level: bool,
    pub masked: bool,
    #[bits(2)]
    pub timer_mode: u8,
    #[bits(13)]
    _rsvd2: u32,
}

open_enum! {
    pub enum TimerMode: u8 {
        ONE_SHOT = 0,
        PERIODIC = 1,
        TSC_DEADLINE = 2,
    }
}

/// Interrupt command register.
#[bitfield(u64)]
pub struct Icr {
    pub vector: u8,
    #[bits(3)]
    pub delivery_mode: u8,
    pub destination_mode_logical: bool,
    pub delivery_pending: bool,
    _reserved1: bool,
    pub level_assert: bool,
    pub trigger_mode_level: bool,
    #[bits(2)]
    pub remote_read_status: u8,
    #[bits(2)]
    pub destination_shorthand: u8,
    #[bits(12)]
    _reserved3: u16,
    pub x2apic_mda: u32,
}

impl Icr {
    /// In xAPIC mode the destination occupies the top byte.
    pub const fn with_xapic_mda(self, value: u8) -> Self {
        self.with_x2apic_mda((value as u32) << 24)
    }
}

open_enum! {
    pub enum DeliveryMode: u8 {
        FIXED = 0,
        LOWEST_PRIORITY = 1,
        SMI = 2,
        REMOTE_READ = 3,
        NMI = 4,
        INIT = 5,
        SIPI = 6,
        EXTINT = 7,
    }
}

#[bitfield(u32)]
pub struct ApicVersion {
    pub version: u8,
    _rsvd: u8,
    pub max_lvt_entry: u8,
    pub eoi_broadcast_suppression: bool,
    #[bits(7)]
    _rsvd2: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_addressing() {
        assert_eq!(ApicRegister::ID.mmio_offset(), 0x20);
        assert_eq!(ApicRegister::ICR0.x2apic_msr(), 0x830);
    }

    #[test]
    fn icr_destination() {
        let icr = Icr::new()
            .with_vector(0x40)
            .with_delivery_mode(DeliveryMode::FIXED.0)
            .with_xapic_mda(3);
        assert_eq!(u64::from(icr) >> 56, 3);
        assert_eq!(u64::from(icr) & 0xff, 0x40);
    }
}
