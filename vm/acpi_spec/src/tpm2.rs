// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! TPM2 table: control area and start method for a TPM 2.0 device.

use crate::packed_nums::*;
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
pub struct Tpm2 {
    pub platform_class: u16_le,
    pub rsvd: u16_le,
    pub control_area: u64_le,
    pub start_method: u32_le,
}

const_assert_eq!(size_of::<Tpm2>(), 16);

impl Table for Tpm2 {
    const SIGNATURE: [u8; 4] = *b"TPM2";
    const MIN_LENGTH: u32 = 52;
}
