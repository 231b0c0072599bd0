// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! 5.2.16: System Resource Affinity Table (SRAT).
//!
//! Only memory affinity entries are consumed; processor affinity is
//! redundant with the MADT for this kernel's purposes.

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
pub struct Srat {
    pub rsvd1: u32_le,
    pub rsvd2: u64_le,
}

const_assert_eq!(size_of::<Srat>(), 12);

impl Table for Srat {
    const SIGNATURE: [u8; 4] = *b"SRAT";
    const MIN_LENGTH: u32 = 48;
}

open_enum::open_enum! {
    #[derive(IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
    pub enum SratType: u8 {
        LAPIC  = 0,
        MEMORY = 1,
        X2APIC = 2,
        GICC   = 3,
    }
}

/// 5.2.16.2: Memory affinity structure.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct SratMemory {
    pub typ: SratType,
    pub length: u8,
    pub domain: u32_le,
    pub rsvd1: u16_le,
    pub base: u64_le,
    pub size: u64_le,
    pub rsvd2: u32_le,
    pub flags: u32_le,
    pub rsvd3: u64_le,
}

const_assert_eq!(size_of::<SratMemory>(), 40);

pub const SRAT_MEM_ENABLED: u32 = 1 << 0;
pub const SRAT_MEM_HOTPLUG: u32 = 1 << 1;
pub const SRAT_MEM_NONVOLATILE: u32 = 1 << 2;

/// Parses an SRAT, yielding enabled memory-affinity entries. Other
/// entry types are skipped by their declared length.
pub fn parse_srat<'a>(
    bytes: &'a [u8],
    mut on_memory: impl FnMut(&'a SratMemory),
) -> Result<&'a Header, ParseError> {
    let (header, _, mut rest) = crate::table_body::<Srat>(bytes)?;
    while rest.len() >= 2 {
        let len = rest[1] as usize;
        if len < 2 || len > rest.len() {
            break;
        }
        if SratType(rest[0]) == SratType::MEMORY {
            if let Ok((mem, _)) = SratMemory::ref_from_prefix(rest) {
                if mem.flags.get() & SRAT_MEM_ENABLED != 0 {
                    on_memory(mem);
                }
            }
        }
        rest = &rest[len..];
    }
    Ok(header)
}
