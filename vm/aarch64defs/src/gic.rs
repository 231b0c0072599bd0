// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Definitions for the Generic Interrupt Controller (GIC) registers.

use bitfield_struct::bitfield;
use core::ops::Range;
use open_enum::open_enum;

open_enum! {
    /// Distributor register offsets.
    pub enum GicdRegister: u16 {
        CTLR = 0x0000,
        TYPER = 0x0004,
        IIDR = 0x0008,
        IGROUPR0 = 0x0080,    // 0x80
        ISENABLER0 = 0x0100,  // 0x80
        ICENABLER0 = 0x0180,  // 0x80
        ISPENDR0 = 0x0200,    // 0x80
        ICPENDR0 = 0x0280,    // 0x80
        ICACTIVER0 = 0x0380,  // 0x80
        IPRIORITYR0 = 0x0400, // 0x400
        ICFGR0 = 0x0c00,      // 0x100
        IROUTER0 = 0x6000,    // 0x2000, first 0x100 reserved
        PIDR2 = 0xffe8,
    }
}

impl GicdRegister {
    pub const IGROUPR: Range<u16> = Self::IGROUPR0.0..Self::IGROUPR0.0 + 0x80;
    pub const ISENABLER: Range<u16> = Self::ISENABLER0.0..Self::ISENABLER0.0 + 0x80;
    pub const ICENABLER: Range<u16> = Self::ICENABLER0.0..Self::ICENABLER0.0 + 0x80;
    pub const IPRIORITYR: Range<u16> = Self::IPRIORITYR0.0..Self::IPRIORITYR0.0 + 0x400;
    pub const ICFGR: Range<u16> = Self::ICFGR0.0..Self::ICFGR0.0 + 0x100;
    pub const IROUTER: Range<u16> = Self::IROUTER0.0..Self::IROUTER0.0 + 0x2000;
}

#[bitfield(u32)]
pub struct GicdCtlr {
    pub enable_grp0: bool,
    pub enable_grp1: bool,
    #[bits(2)]
    _res_2_3: u8,
    pub are: bool,
    _res_5: bool,
    pub ds: bool,
    pub e1nwf: bool,
    pub n_assgi_req: bool,
    #[bits(22)]
    _res_9_30: u32,
    pub rwp: bool,
}

#[bitfield(u32)]
pub struct GicdTyper {
    #[bits(5)]
    pub it_lines_number: u8,
    #[bits(3)]
    pub cpu_number: u8,
    pub espi: bool,
    pub nmi: bool,
    pub security_extn: bool,
    #[bits(5)]
    pub num_lpis: u8,
    pub mbis: bool,
    pub lpis: bool,
    pub dvis: bool,
    #[bits(5)]
    pub id_bits: u8,
    pub a3v: bool,
    pub no1n: bool,
    pub rss: bool,
    #[bits(5)]
    pub espi_range: u8,
}

open_enum! {
    /// Redistributor control-frame register offsets.
    pub enum GicrRdRegister: u16 {
        CTLR = 0x0000,
        IIDR = 0x0004,
        TYPER = 0x0008, // 64 bit
        WAKER = 0x0014,
        PIDR2 = 0xffe8,
    }
}

open_enum! {
    /// Redistributor SGI-frame register offsets (second 64K frame).
    pub enum GicrSgiRegister: u16 {
        IGROUPR0 = 0x0080,
        ISENABLER0 = 0x0100,
        ICENABLER0 = 0x0180,
        ICPENDR0 = 0x0280,
        ICACTIVER0 = 0x0380,
        IPRIORITYR0 = 0x0400, // 0x20
        ICFGR0 = 0x0c00,
        ICFGR1 = 0x0c04,
    }
}

impl GicrSgiRegister {
    pub const IPRIORITYR: Range<u16> = Self::IPRIORITYR0.0..Self::IPRIORITYR0.0 + 0x20;
}

/// Size of one redistributor: an RD frame and an SGI frame.
pub const GICR_STRIDE: u64 = 0x20000;

#[bitfield(u64)]
pub struct GicrTyper {
    pub plpis: bool,
    pub vlpis: bool,
    pub dirty: bool,
    pub direct_lpi: bool,
    /// Last redistributor in this window.
    pub last: bool,
    pub dpgs: bool,
    pub mpam: bool,
    pub rvpeid: bool,
    pub processor_number: u16,
    #[bits(2)]
    pub common_lpi_aff: u8,
    pub vsgi: bool,
    #[bits(5)]
    pub ppi_num: u8,
    pub aff0: u8,
    pub aff1: u8,
    pub aff2: u8,
    pub aff3: u8,
}

impl GicrTyper {
    /// The redistributor's affinity in packed Aff3.Aff2.Aff1.Aff0 form.
    pub fn affinity(&self) -> u32 {
        (self.aff3() as u32) << 24
            | (self.aff2() as u32) << 16
            | (self.aff1() as u32) << 8
            | self.aff0() as u32
    }
}

#[bitfield(u32)]
pub struct GicrWaker {
    pub bit_0: bool,
    pub processor_sleep: bool,
    pub children_asleep: bool,
    #[bits(28)]
    _res_3_30: u32,
    pub bit_31: bool,
}

open_enum! {
    /// Legacy memory-mapped CPU-interface register offsets
    /// (GICv2 compatibility).
    pub enum GiccRegister: u16 {
        CTLR = 0x0000,
        PMR = 0x0004,
        BPR = 0x0008,
        IAR = 0x000c,
        EOIR = 0x0010,
        RPR = 0x0014,
        HPPIR = 0x0018,
        IIDR = 0x00fc,
        DIR = 0x1000,
    }
}

/// ICC_SGI1R_EL1 layout, also the GICD_SGIR successor format.
#[bitfield(u64)]
pub struct IccSgi1r {
    pub target_list: u16,
    pub aff1: u8,
    #[bits(4)]
    pub intid: u32,
    #[bits(4)]
    _res_28_31: u16,
    pub aff2: u8,
    /// Route to all but self rather than the target list.
    pub irm: bool,
    #[bits(3)]
    _res_41_43: u8,
    #[bits(4)]
    pub rs: u8,
    pub aff3: u8,
    _res_56_63: u8,
}

/// Interrupt-id classes.
pub const INTID_SGI_BASE: u32 = 0;
pub const INTID_PPI_BASE: u32 = 16;
pub const INTID_SPI_BASE: u32 = 32;
pub const INTID_SPURIOUS: u32 = 1023;

/// Converts a firmware GSI to a PPI number, where PPIs occupy
/// intids 16..32.
pub const fn gsi_to_ppi(gsi: u32) -> u32 {
    gsi.wrapping_sub(INTID_PPI_BASE) & 0xf
}
