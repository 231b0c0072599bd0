// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! 8.1: DMA Remapping Description Table (DMAR).

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
pub struct Dmar {
    pub haw: u8,
    pub flags: u8,
    pub rsvd: [u8; 10],
}

const_assert_eq!(size_of::<Dmar>(), 12);

impl Table for Dmar {
    const SIGNATURE: [u8; 4] = *b"DMAR";
    const MIN_LENGTH: u32 = 48;
}

/// Interrupt remapping supported.
pub const DMAR_INTR_REMAP: u8 = 1 << 0;
/// Firmware opts out of x2APIC.
pub const DMAR_X2APIC_OPT_OUT: u8 = 1 << 1;

open_enum::open_enum! {
    pub enum RemappingType: u16 {
        DRHD = 0,
        RMRR = 1,
        ATSR = 2,
        RHSA = 3,
        ANDD = 4,
        SATC = 5,
    }
}

/// 8.3: DMA Remapping Hardware Unit Definition.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct Drhd {
    pub typ: u16_le,
    pub length: u16_le,
    pub flags: u8,
    pub size: u8,
    pub segment: u16_le,
    pub phys: u64_le,
}

const_assert_eq!(size_of::<Drhd>(), 16);

/// The unit covers every device on the segment not claimed elsewhere.
pub const DRHD_INCLUDE_PCI_ALL: u8 = 1 << 0;

/// 8.4: Reserved Memory Region Reporting.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct Rmrr {
    pub typ: u16_le,
    pub length: u16_le,
    pub rsvd: u16_le,
    pub segment: u16_le,
    pub base: u64_le,
    pub limit: u64_le,
}

const_assert_eq!(size_of::<Rmrr>(), 24);

open_enum::open_enum! {
    #[derive(IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
    pub enum ScopeType: u8 {
        PCI_EP = 1,
        PCI_SH = 2,
        IOAPIC = 3,
        HPET   = 4,
        ACPI   = 5,
    }
}

/// 8.3.1: Device scope structure with a single path element.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct Scope {
    pub typ: ScopeType,
    pub length: u8,
    pub rsvd: u16_le,
    pub enum_id: u8,
    pub start_bus: u8,
    pub dev: u8,
    pub fun: u8,
}

const_assert_eq!(size_of::<Scope>(), 8);

/// Iterates the device scopes trailing a remapping structure.
pub struct ScopeIter<'a> {
    body: &'a [u8],
}

impl<'a> Iterator for ScopeIter<'a> {
    type Item = &'a Scope;

    fn next(&mut self) -> Option<Self::Item> {
        if self.body.len() < size_of::<Scope>() {
            return None;
        }
        let scope = Scope::ref_from_prefix(self.body).ok()?.0;
        let len = scope.length as usize;
        if len < size_of::<Scope>() || len > self.body.len() {
            self.body = &[];
            return None;
        }
        self.body = &self.body[len..];
        Some(scope)
    }
}

/// A remapping structure with its trailing scope list.
pub enum Remapping<'a> {
    Drhd(&'a Drhd, ScopeIter<'a>),
    Rmrr(&'a Rmrr, ScopeIter<'a>),
    Other(RemappingType),
}

/// Iterates the remapping structures of a DMAR body.
pub struct RemappingIter<'a> {
    body: &'a [u8],
}

impl<'a> Iterator for RemappingIter<'a> {
    type Item = Remapping<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.body.len() < 4 {
            return None;
        }
        let typ = RemappingType(u16::from_le_bytes([self.body[0], self.body[1]]));
        let len = u16::from_le_bytes([self.body[2], self.body[3]]) as usize;
        if len < 4 || len > self.body.len() {
            self.body = &[];
            return None;
        }
        let (entry, rest) = self.body.split_at(len);
        self.body = rest;
        Some(match typ {
            RemappingType::DRHD => {
                let drhd = Drhd::ref_from_prefix(entry).ok()?.0;
                Remapping::Drhd(
                    drhd,
                    ScopeIter {
                        body: &entry[size_of::<Drhd>()..],
                    },
                )
            }
            RemappingType::RMRR => {
                let rmrr = Rmrr::ref_from_prefix(entry).ok()?.0;
                Remapping::Rmrr(
                    rmrr,
                    ScopeIter {
                        body: &entry[size_of::<Rmrr>()..],
                    },
                )
            }
            other => Remapping::Other(other),
        })
    }
}

/// Parses a full DMAR (header included).
pub fn parse_dmar(bytes: &[u8]) -> Result<(&Header, &Dmar, RemappingIter<'_>), ParseError> {
    let (header, fixed, rest) = crate::table_body::<Dmar>(bytes)?;
    Ok((header, fixed, RemappingIter { body: rest }))
}
