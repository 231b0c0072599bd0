// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! x86-64 descriptor tables: the per-CPU GDT, IDT and TSS images
//! built once during CPU bring-up and loaded through the pseudo
//! descriptor.

use core::mem::size_of;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

// Descriptor type fields.
const TYPE_SYS_TSS: u32 = 0x9;
const TYPE_SYS_INTR_GATE: u32 = 0xe;
const TYPE_DATA_RWA: u32 = 0x13;
const TYPE_CODE_XRA: u32 = 0x1b;

/// Segment selectors, in GDT layout order.
pub const SEL_KERN_CODE: u16 = 0x8;
pub const SEL_KERN_DATA: u16 = 0x10;
pub const SEL_USER_DATA: u16 = 0x18 | 3;
pub const SEL_USER_CODE: u16 = 0x20 | 3;
pub const SEL_TSS_RUN: u16 = 0x30;

/// A page-granular 64-bit code or data segment descriptor.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct SegDescriptor(u64);

impl SegDescriptor {
    /// Long-mode segments ignore base and limit; only type, DPL,
    /// presence and the long/granularity bits matter.
    const fn new(typ: u32, dpl: u32) -> SegDescriptor {
        SegDescriptor((((1 << 23) | (1 << 21) | (1 << 15) | (dpl << 13) | (typ << 8)) as u64) << 32)
    }

    pub fn dpl(self) -> u32 {
        (self.0 >> 45 & 3) as u32
    }
}

/// A byte-granular 64-bit system segment descriptor (TSS), 16 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct SysDescriptor {
    lo: u64,
    hi: u64,
}

impl SysDescriptor {
    pub fn tss(base: u64, limit: u32) -> SysDescriptor {
        let w0 = (base << 16 | (limit & 0xffff) as u64) as u32;
        let w1 = ((base & 0xff00_0000) | (limit as u64 & 0xf_0000) | 1 << 15
            | (TYPE_SYS_TSS as u64) << 8
            | (base >> 16 & 0xff)) as u32;
        SysDescriptor {
            lo: (w1 as u64) << 32 | w0 as u64,
            hi: base >> 32,
        }
    }

    /// Clears the busy bit so the TSS can be reloaded after a VM
    /// exit path used it.
    pub fn unbusy(&mut self) {
        self.lo &= !(1 << 41);
    }
}

/// A 64-bit interrupt gate, 16 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct IdtGate {
    lo: u64,
    hi: u64,
}

impl IdtGate {
    /// An interrupt gate to `entry`, callable from privilege `dpl`,
    /// switching to interrupt stack `ist` when nonzero.
    pub fn interrupt(dpl: u32, ist: u32, selector: u16, entry: u64) -> IdtGate {
        let w0 = ((selector as u64) << 16 | (entry & 0xffff)) as u32;
        let w1 =
            ((entry & 0xffff_0000) | 1 << 15 | (dpl as u64) << 13 | (TYPE_SYS_INTR_GATE as u64) << 8
                | ist as u64) as u32;
        IdtGate {
            lo: (w1 as u64) << 32 | w0 as u64,
            hi: entry >> 32,
        }
    }

    pub fn entry(self) -> u64 {
        (self.lo & 0xffff) | (self.lo >> 32 & 0xffff_0000) | self.hi << 32
    }
}

/// The task-state segment: stack pointers for privilege transitions
/// and the interrupt stack table.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, Default, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct Tss {
    _rsvd0: u32,
    pub rsp0: u64,
    pub rsp1: u64,
    pub rsp2: u64,
    _rsvd1: u64,
    pub ist: [u64; 7],
    _rsvd2: u64,
    _rsvd3: u16,
    pub iobm_offset: u16,
}

const_assert_eq!(size_of::<Tss>(), 104);

/// The per-CPU GDT image: null, kernel code/data, user data/code, one
/// spare slot and the running TSS.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, IntoBytes, Immutable, KnownLayout, FromBytes)]
pub struct Gdt {
    null: SegDescriptor,
    kern_code: SegDescriptor,
    kern_data: SegDescriptor,
    user_data: SegDescriptor,
    user_code: SegDescriptor,
    unused: SegDescriptor,
    tss_run: SysDescriptor,
}

const_assert_eq!(size_of::<Gdt>(), 0x40);

impl Gdt {
    /// Builds the descriptor set for this CPU, with the TSS at
    /// `tss_base` covering `tss_limit` bytes (the I/O permission
    /// bitmap included).
    pub fn build(tss_base: u64, tss_limit: u32) -> Gdt {
        Gdt {
            null: SegDescriptor::default(),
            kern_code: SegDescriptor::new(TYPE_CODE_XRA, 0),
            kern_data: SegDescriptor::new(TYPE_DATA_RWA, 0),
            user_data: SegDescriptor::new(TYPE_DATA_RWA, 3),
            user_code: SegDescriptor::new(TYPE_CODE_XRA, 3),
            unused: SegDescriptor::default(),
            tss_run: SysDescriptor::tss(tss_base, tss_limit),
        }
    }

    pub fn unbusy_tss(&mut self) {
        self.tss_run.unbusy();
    }
}

/// The operand of LGDT/LIDT.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout)]
pub struct PseudoDescriptor {
    pub limit: u16,
    pub base: u64,
}

impl PseudoDescriptor {
    pub fn new(base: u64, size: usize) -> PseudoDescriptor {
        PseudoDescriptor {
            limit: (size - 1) as u16,
            base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_privilege_levels() {
        let gdt = Gdt::build(0, 0x67);
        assert_eq!(gdt.kern_code.dpl(), 0);
        assert_eq!(gdt.user_code.dpl(), 3);
        assert_eq!(gdt.null, SegDescriptor::default());
    }

    #[test]
    fn tss_descriptor_base_split() {
        let base = 0xffff_8000_1234_5678u64;
        let d = SysDescriptor::tss(base, 0x67);
        // Base bits scatter across three fields; reassemble.
        let lo16 = d.lo >> 16 & 0xffff;
        let mid8 = d.lo >> 32 & 0xff;
        let hi8 = d.lo >> 56 & 0xff;
        let top32 = d.hi;
        assert_eq!(
            lo16 | mid8 << 16 | hi8 << 24 | top32 << 32,
            base
        );
        // Present, type TSS-available.
        assert_eq!(d.lo >> 40 & 0x1f, 0x9);
        assert_ne!(d.lo & 1 << 47, 0);
    }

    #[test]
    fn tss_busy_clear() {
        let mut d = SysDescriptor::tss(0x1000, 0x67);
        d.lo |= 1 << 41; // hardware marked it busy
        d.unbusy();
        assert_eq!(d.lo >> 40 & 0x1f, 0x9);
    }

    #[test]
    fn idt_gate_round_trip() {
        let entry = 0xffff_8000_0010_2030u64;
        let g = IdtGate::interrupt(0, 2, SEL_KERN_CODE, entry);
        assert_eq!(g.entry(), entry);
        // IST slot and selector in place.
        assert_eq!(g.lo >> 32 & 0x7, 2);
        assert_eq!(g.lo >> 16 & 0xffff, SEL_KERN_CODE as u64);
    }

    #[test]
    fn pseudo_descriptor_limit() {
        let p = PseudoDescriptor::new(0x1000, size_of::<Gdt>());
        assert_eq!(p.limit, 0x3f);
    }
}
