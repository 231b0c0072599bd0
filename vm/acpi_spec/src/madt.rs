// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! 5.2.12: Multiple APIC Description Table (MADT).
//!
//! The body is a stream of variable-length interrupt-controller entries
//! tagged by a type byte. Unknown entry types are skipped by their
//! declared length; a zero or truncated length terminates the stream.

use crate::packed_nums::*;
use crate::Header;
use crate::ParseError;
use crate::Table;
use core::mem::size_of;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct Madt {
    pub lapic_phys: u32_le,
    pub flags: u32_le,
}

const_assert_eq!(size_of::<Madt>(), 8);

impl Table for Madt {
    const SIGNATURE: [u8; 4] = *b"APIC";
    const MIN_LENGTH: u32 = 44;
}

/// The platform also has a legacy 8259 PIC.
pub const MADT_PCAT_COMPAT: u32 = 1 << 0;

open_enum::open_enum! {
    #[derive(IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
    pub enum MadtType: u8 {
        LAPIC  = 0x0,
        IOAPIC = 0x1,
        X2APIC = 0x9,
        GICC   = 0xb,
        GICD   = 0xc,
        GMSI   = 0xd,
        GICR   = 0xe,
        GITS   = 0xf,
    }
}

/// 5.2.12.2: Local APIC structure.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct MadtLapic {
    pub typ: MadtType,
    pub length: u8,
    pub uid: u8,
    pub apic_id: u8,
    pub flags: u32_le,
}

const_assert_eq!(size_of::<MadtLapic>(), 8);

/// Enabled now, or may be brought online later.
pub const MADT_CPU_USABLE: u32 = 0b11;

/// 5.2.12.3: I/O APIC structure.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct MadtIoapic {
    pub typ: MadtType,
    pub length: u8,
    pub id: u8,
    pub rsvd: u8,
    pub phys: u32_le,
    pub gsi_base: u32_le,
}

const_assert_eq!(size_of::<MadtIoapic>(), 12);

/// 5.2.12.12: Local x2APIC structure.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct MadtX2apic {
    pub typ: MadtType,
    pub length: u8,
    pub rsvd: u16_le,
    pub apic_id: u32_le,
    pub flags: u32_le,
    pub uid: u32_le,
}

const_assert_eq!(size_of::<MadtX2apic>(), 16);

/// 5.2.12.14: GIC CPU interface structure.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct MadtGicc {
    pub typ: MadtType,
    pub length: u8,
    pub rsvd: u16_le,
    pub cpu_if: u32_le,
    pub uid: u32_le,
    pub flags: u32_le,
    pub park_pver: u32_le,
    pub perf_gsiv: u32_le,
    pub park_addr: u64_le,
    pub phys_gicc: u64_le,
    pub phys_gicv: u64_le,
    pub phys_gich: u64_le,
    pub vgic_gsiv: u32_le,
    pub phys_gicr: u64_le,
    pub mpidr: u64_le,
    pub power_class: u8,
    pub rsvd2: u8,
    pub spe_gsiv: u16_le,
}

const_assert_eq!(size_of::<MadtGicc>(), 80);

/// 5.2.12.15: GIC distributor structure.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct MadtGicd {
    pub typ: MadtType,
    pub length: u8,
    pub rsvd: u16_le,
    pub gic_id: u32_le,
    pub phys: u64_le,
    pub rsvd2: u32_le,
    pub version: u8,
    pub rsvd3: [u8; 3],
}

const_assert_eq!(size_of::<MadtGicd>(), 24);

/// 5.2.12.16: GIC MSI frame structure.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct MadtGmsi {
    pub typ: MadtType,
    pub length: u8,
    pub rsvd: u16_le,
    pub frame_id: u32_le,
    pub phys: u64_le,
    pub flags: u32_le,
    pub spi_count: u16_le,
    pub spi_base: u16_le,
}

const_assert_eq!(size_of::<MadtGmsi>(), 24);

/// 5.2.12.17: GIC redistributor structure.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct MadtGicr {
    pub typ: MadtType,
    pub length: u8,
    pub rsvd: u16_le,
    pub phys: u64_le,
    pub window: u32_le,
}

const_assert_eq!(size_of::<MadtGicr>(), 16);

/// 5.2.12.18: GIC interrupt translation service structure.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct MadtGits {
    pub typ: MadtType,
    pub length: u8,
    pub rsvd: u16_le,
    pub its_id: u32_le,
    pub phys: u64_le,
    pub rsvd2: u32_le,
}

const_assert_eq!(size_of::<MadtGits>(), 20);

/// A single controller entry with its raw bytes.
pub struct MadtEntry<'a> {
    pub typ: MadtType,
    pub bytes: &'a [u8],
}

impl<'a> MadtEntry<'a> {
    /// Reinterprets the entry as a fixed structure, failing if the
    /// entry is shorter than the structure.
    pub fn read<T: FromBytes + Unaligned + Immutable + KnownLayout>(&self) -> Option<&'a T> {
        T::ref_from_prefix(self.bytes).ok().map(|(t, _)| t)
    }
}

/// Iterates the controller entries of a MADT body.
pub struct MadtIter<'a> {
    body: &'a [u8],
}

impl<'a> Iterator for MadtIter<'a> {
    type Item = MadtEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.body.len() < 2 {
            return None;
        }
        let len = self.body[1] as usize;
        // A zero or overlong length ends the stream; each iteration
        // must advance by a nonzero amount.
        if len < 2 || len > self.body.len() {
            self.body = &[];
            return None;
        }
        let (entry, rest) = self.body.split_at(len);
        self.body = rest;
        Some(MadtEntry {
            typ: MadtType(entry[0]),
            bytes: entry,
        })
    }
}

/// Parses a full MADT (header included), returning the fixed part and
/// an entry iterator.
pub fn parse_madt(bytes: &[u8]) -> Result<(&Header, &Madt, MadtIter<'_>), ParseError> {
    let (header, fixed, rest) = crate::table_body::<Madt>(bytes)?;
    Ok((header, fixed, MadtIter { body: rest }))
}

#[cfg(test)]
mod tests {
    extern crate alloc;

    use super::*;
    use crate::test_helpers::fake_table;
    use alloc::vec::Vec;
    use zerocopy::FromZeros;
    use zerocopy::IntoBytes;

    fn madt_with(entries: &[&[u8]]) -> Vec<u8> {
        let mut body = Madt {
            lapic_phys: 0xfee00000.into(),
            flags: MADT_PCAT_COMPAT.into(),
        }
        .as_bytes()
        .to_vec();
        for e in entries {
            body.extend_from_slice(e);
        }
        fake_table(*b"APIC", &body)
    }

    fn lapic(uid: u8, id: u8, flags: u32) -> MadtLapic {
        MadtLapic {
            typ: MadtType::LAPIC,
            length: size_of::<MadtLapic>() as u8,
            uid,
            apic_id: id,
            flags: flags.into(),
        }
    }

    #[test]
    fn stream_entries() {
        let a = lapic(0, 0, 1);
        let b = lapic(1, 2, 1);
        let c = lapic(2, 3, 0);
        let t = madt_with(&[a.as_bytes(), b.as_bytes(), c.as_bytes()]);
        let (_, fixed, iter) = parse_madt(&t).unwrap();
        assert_eq!(fixed.lapic_phys.get(), 0xfee00000);

        let ids: Vec<u8> = iter
            .filter(|e| e.typ == MadtType::LAPIC)
            .filter_map(|e| e.read::<MadtLapic>().copied())
            .filter(|l| l.flags.get() & MADT_CPU_USABLE != 0)
            .map(|l| l.apic_id)
            .collect();
        assert_eq!(ids, [0, 2]);
    }

    #[test]
    fn zero_length_terminates() {
        // An entry declaring length zero must not loop forever.
        let t = madt_with(&[&[0u8, 0u8, 0, 0]]);
        let (_, _, iter) = parse_madt(&t).unwrap();
        assert_eq!(iter.count(), 0);
    }

    #[test]
    fn unknown_types_skipped_by_length() {
        let unknown = [0x7fu8, 4, 0xaa, 0xbb];
        let a = lapic(0, 5, 1);
        let t = madt_with(&[&unknown, a.as_bytes()]);
        let (_, _, mut iter) = parse_madt(&t).unwrap();
        assert_eq!(iter.next().unwrap().typ, MadtType(0x7f));
        let e = iter.next().unwrap();
        assert_eq!(e.typ, MadtType::LAPIC);
        assert_eq!(e.read::<MadtLapic>().unwrap().apic_id, 5);
        assert!(iter.next().is_none());
    }

    #[test]
    fn gicc_layout() {
        let mut g = MadtGicc::new_zeroed();
        g.typ = MadtType::GICC;
        g.length = size_of::<MadtGicc>() as u8;
        g.mpidr = 0x0000_0081_0000_0100u64.into();
        g.flags = 1.into();
        let t = madt_with(&[g.as_bytes()]);
        let (_, _, mut iter) = parse_madt(&t).unwrap();
        let e = iter.next().unwrap();
        assert_eq!(e.typ, MadtType::GICC);
        assert_eq!(e.read::<MadtGicc>().unwrap().mpidr.get(), 0x81_0000_0100);
    }
}
