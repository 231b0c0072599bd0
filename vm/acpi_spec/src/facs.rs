// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! 5.2.10: Firmware ACPI Control Structure (FACS).
//!
//! The FACS is not checksummed and does not carry the standard table
//! header; it is located through the FADT.

use crate::packed_nums::*;
use core::mem::size_of;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct Facs {
    pub signature: [u8; 4], // "FACS"
    pub length: u32_le,
    pub hardware_signature: u32_le,
    pub wake32: u32_le,
    pub global_lock: u32_le,
    pub flags: u32_le,
    pub wake64: u64_le,
    pub version: u8,
    pub rsvd: [u8; 3],
    pub ospm_flags: u32_le,
    pub rsvd2: [u8; 24],
}

const_assert_eq!(size_of::<Facs>(), 64);

pub const FACS_SIGNATURE: [u8; 4] = *b"FACS";

impl Facs {
    /// Validates signature and minimum length. No checksum by design.
    pub fn validate(bytes: &[u8]) -> Option<&Facs> {
        let facs = Facs::ref_from_prefix(bytes).ok()?.0;
        if facs.signature != FACS_SIGNATURE || (facs.length.get() as usize) < size_of::<Facs>() {
            return None;
        }
        Some(facs)
    }
}
