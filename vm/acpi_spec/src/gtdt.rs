// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! 5.2.24: Generic Timer Description Table (GTDT).

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
pub struct Gtdt {
    pub ctrl_base: u64_le,
    pub flags: u32_le,
    pub el1_s_gsi: u32_le,
    pub el1_s_flg: u32_le,
    pub el1_p_gsi: u32_le,
    pub el1_p_flg: u32_le,
    pub el1_v_gsi: u32_le,
    pub el1_v_flg: u32_le,
    pub el2_p_gsi: u32_le,
    pub el2_p_flg: u32_le,
    pub read_base: u64_le,
    pub plt_cnt: u32_le,
    pub plt_off: u32_le,
    pub el2_v_gsi: u32_le,
    pub el2_v_flg: u32_le,
}

const_assert_eq!(size_of::<Gtdt>(), 104 - size_of::<crate::Header>());

impl Table for Gtdt {
    const SIGNATURE: [u8; 4] = *b"GTDT";
    const MIN_LENGTH: u32 = 104;
}

/// Timer flag bit 0: edge triggered (level when clear).
pub const GTDT_EDGE_TRIGGERED: u32 = 1 << 0;
/// Timer flag bit 1: active low.
pub const GTDT_ACTIVE_LOW: u32 = 1 << 1;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_body;
    use crate::test_helpers::fake_table;
    use zerocopy::FromZeros;

    #[test]
    fn timer_interrupts() {
        let mut gtdt = Gtdt::new_zeroed();
        gtdt.el2_p_gsi = 26.into();
        gtdt.el2_p_flg = 0.into(); // level triggered
        gtdt.el1_v_gsi = 27.into();
        gtdt.el1_v_flg = GTDT_EDGE_TRIGGERED.into();
        let t = fake_table(*b"GTDT", gtdt.as_bytes());
        let (_, parsed, _) = table_body::<Gtdt>(&t).unwrap();
        assert_eq!(parsed.el2_p_gsi.get(), 26);
        assert_eq!(parsed.el1_v_flg.get() & GTDT_EDGE_TRIGGERED, 1);
    }
}
