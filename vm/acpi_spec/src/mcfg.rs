// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Memory Mapped Configuration Space Description Table (MCFG).

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
pub struct Mcfg {
    pub rsvd: [u8; 8],
}

const_assert_eq!(size_of::<Mcfg>(), 8);

impl Table for Mcfg {
    const SIGNATURE: [u8; 4] = *b"MCFG";
    const MIN_LENGTH: u32 = 44;
}

/// One ECAM window: a PCI segment group and its bus range.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct McfgSegment {
    pub phys_base: u64_le,
    pub segment: u16_le,
    pub start_bus: u8,
    pub end_bus: u8,
    pub rsvd: u32_le,
}

const_assert_eq!(size_of::<McfgSegment>(), 16);

/// Parses an MCFG, yielding each declared segment.
pub fn parse_mcfg<'a>(
    bytes: &'a [u8],
    mut on_segment: impl FnMut(&'a McfgSegment),
) -> Result<&'a Header, ParseError> {
    let (header, _, mut rest) = crate::table_body::<Mcfg>(bytes)?;
    while let Ok((segment, tail)) = McfgSegment::ref_from_prefix(rest) {
        on_segment(segment);
        rest = tail;
    }
    Ok(header)
}

#[cfg(test)]
mod tests {
    extern crate alloc;

    use super::*;
    use crate::test_helpers::fake_table;
    use alloc::vec::Vec;

    #[test]
    fn segments() {
        let mut body = [0u8; 8].to_vec();
        for (seg, bus) in [(0u16, 0u8), (1, 0x80)] {
            body.extend_from_slice(
                McfgSegment {
                    phys_base: (0xe000_0000 + seg as u64 * 0x1000_0000).into(),
                    segment: seg.into(),
                    start_bus: bus,
                    end_bus: 0xff,
                    rsvd: 0.into(),
                }
                .as_bytes(),
            );
        }
        let t = fake_table(*b"MCFG", &body);
        let mut segs = Vec::new();
        parse_mcfg(&t, |s| segs.push((s.segment.get(), s.phys_base.get()))).unwrap();
        assert_eq!(segs, [(0, 0xe000_0000), (1, 0xf000_0000)]);
    }
}
