// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Debug Port Table 2 (DBG2).
//!
//! Each device-information entry carries an array of generic address
//! structures at a declared offset; the console binds against the first.

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
pub struct Dbg2 {
    pub info_off: u32_le,
    pub info_cnt: u32_le,
}

const_assert_eq!(size_of::<Dbg2>(), 8);

impl Table for Dbg2 {
    const SIGNATURE: [u8; 4] = *b"DBG2";
    const MIN_LENGTH: u32 = 44;
}

open_enum::open_enum! {
    pub enum PortType: u16 {
        SERIAL = 0x8000,
        IEEE1394 = 0x8001,
        USB = 0x8002,
        NET = 0x8003,
    }
}

open_enum::open_enum! {
    pub enum PortSubtype: u16 {
        SERIAL_NS16550_DBGP = 0x0000,
        SERIAL_NS16550 = 0x0001,
        SERIAL_PL011 = 0x0003,
        SERIAL_NS16550_PARAM = 0x0012,
    }
}

/// Device information structure header.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct DeviceInfo {
    pub revision: u8,
    pub length: u16_le,
    pub regs_cnt: u8,
    pub nstr_len: u16_le,
    pub nstr_off: u16_le,
    pub data_len: u16_le,
    pub data_off: u16_le,
    pub typ: u16_le,
    pub subtype: u16_le,
    pub rsvd: u16_le,
    pub regs_off: u16_le,
    pub size_off: u16_le,
}

const_assert_eq!(size_of::<DeviceInfo>(), 22);

/// Parses a full DBG2 (header included), yielding each debug device
/// with its first register block.
pub fn parse_dbg2<'a>(
    bytes: &'a [u8],
    mut on_device: impl FnMut(PortType, PortSubtype, &'a Gas),
) -> Result<&'a Header, ParseError> {
    let (header, fixed, _) = crate::table_body::<Dbg2>(bytes)?;
    let len = header.length.get() as usize;
    let mut off = fixed.info_off.get() as usize;
    let mut cnt = fixed.info_cnt.get();

    while cnt != 0 && off < len {
        let entry = &bytes[off..len];
        let Ok((info, _)) = DeviceInfo::ref_from_prefix(entry) else {
            break;
        };
        let ilen = info.length.get() as usize;
        if ilen < size_of::<DeviceInfo>() || ilen > entry.len() {
            break;
        }
        if info.regs_cnt != 0 {
            if let Some(regs) = entry.get(info.regs_off.get() as usize..) {
                if let Ok((gas, _)) = Gas::ref_from_prefix(regs) {
                    on_device(PortType(info.typ.get()), PortSubtype(info.subtype.get()), gas);
                }
            }
        }
        off += ilen;
        cnt -= 1;
    }
    Ok(header)
}
