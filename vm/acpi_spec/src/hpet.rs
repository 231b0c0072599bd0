// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! High Precision Event Timer description table (HPET).

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
pub struct Hpet {
    pub block_id: u32_le,
    pub base: Gas,
    pub number: u8,
    pub min_tick: u16_le,
    pub page_protection: u8,
}

const_assert_eq!(size_of::<Hpet>(), 20);

impl Table for Hpet {
    const SIGNATURE: [u8; 4] = *b"HPET";
    const MIN_LENGTH: u32 = 56;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_body;
    use crate::test_helpers::fake_table;
    use zerocopy::FromZeros;

    #[test]
    fn base_address() {
        let mut hpet = Hpet::new_zeroed();
        hpet.base.addr = 0xfed0_0000u64.into();
        hpet.base.bits = 64;
        let t = fake_table(*b"HPET", hpet.as_bytes());
        let (_, parsed, _) = table_body::<Hpet>(&t).unwrap();
        assert_eq!(parsed.base.addr.get(), 0xfed0_0000);
    }
}
