// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Low Power Idle Table (LPIT).

use crate::packed_nums::*;
use crate::Gas;
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
pub struct Lpit {
    pub rsvd: [u8; 0],
}

impl Table for Lpit {
    const SIGNATURE: [u8; 4] = *b"LPIT";
    const MIN_LENGTH: u32 = 36;
}

open_enum::open_enum! {
    pub enum LpiType: u32 {
        NATIVE = 0,
    }
}

/// MWAIT entry-trigger descriptor for a native C-state.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct LpiNative {
    pub typ: u32_le,
    pub length: u32_le,
    pub id: u16_le,
    pub rsvd: u16_le,
    pub flags: u32_le,
    pub trigger: Gas,
    pub min_residency: u32_le,
    pub max_latency: u32_le,
    pub counter: Gas,
    pub counter_freq: u64_le,
}

const_assert_eq!(size_of::<LpiNative>(), 56);

/// The state is disabled and must not be used.
pub const LPI_DISABLED: u32 = 1 << 0;

/// Parses an LPIT, yielding each enabled native state descriptor.
pub fn parse_lpit<'a>(
    bytes: &'a [u8],
    mut on_state: impl FnMut(&'a LpiNative),
) -> Result<&'a Header, ParseError> {
    let (header, _, mut rest) = crate::table_body::<Lpit>(bytes)?;
    while rest.len() >= 8 {
        let typ = u32::from_le_bytes(rest[..4].try_into().unwrap());
        let len = u32::from_le_bytes(rest[4..8].try_into().unwrap()) as usize;
        if len < 8 || len > rest.len() {
            break;
        }
        if LpiType(typ) == LpiType::NATIVE {
            if let Ok((state, _)) = LpiNative::ref_from_prefix(rest) {
                if state.flags.get() & LPI_DISABLED == 0 {
                    on_state(state);
                }
            }
        }
        rest = &rest[len..];
    }
    Ok(header)
}

#[cfg(test)]
mod tests {
    extern crate alloc;

    use super::*;
    use crate::test_helpers::fake_table;
    use alloc::vec::Vec;
    use zerocopy::FromZeros;

    #[test]
    fn native_states() {
        let mut body = Vec::new();
        for (id, flags) in [(0u16, 0u32), (1, LPI_DISABLED)] {
            let mut s = LpiNative::new_zeroed();
            s.typ = LpiType::NATIVE.0.into();
            s.length = (size_of::<LpiNative>() as u32).into();
            s.id = id.into();
            s.flags = flags.into();
            s.min_residency = 30000.into();
            body.extend_from_slice(s.as_bytes());
        }
        let t = fake_table(*b"LPIT", &body);
        let mut ids = Vec::new();
        parse_lpit(&t, |s| ids.push(s.id.get())).unwrap();
        assert_eq!(ids, [0]);
    }
}
