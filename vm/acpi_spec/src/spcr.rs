// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Serial Port Console Redirection Table (SPCR).

use crate::packed_nums::*;
use crate::Gas;
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
pub struct Spcr {
    pub subtype: u16_le,
    pub rsvd: u16_le,
    pub regs: Gas,
    pub intr_type: u8,
    pub irq: u8,
    pub gsi: u32_le,
    pub baud: u8,
    pub parity: u8,
    pub stop: u8,
    pub flow: u8,
    pub term: u8,
    pub lang: u8,
    pub did: u16_le,
    pub vid: u16_le,
    pub bus: u8,
    pub dev: u8,
    pub fun: u8,
    pub flags: u32_le,
    pub segment: u8,
    pub rsvd2: u32_le,
}

const_assert_eq!(size_of::<Spcr>(), 80 - size_of::<crate::Header>());

impl Table for Spcr {
    const SIGNATURE: [u8; 4] = *b"SPCR";
    const MIN_LENGTH: u32 = 80;
}
