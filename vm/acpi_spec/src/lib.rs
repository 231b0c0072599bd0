// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! ACPI table types.
//!
//! Zero-copy, unaligned little-endian views over the static firmware
//! tables the hypervisor consumes. Every structure is validated against
//! its declared length and additive checksum before the body is
//! interpreted; see [`Header::validate_body`].

#![no_std]

pub mod dbg2;
pub mod dmar;
pub mod facs;
pub mod fadt;
pub mod gtdt;
pub mod hpet;
pub mod iort;
pub mod lpit;
pub mod madt;
pub mod mcfg;
pub mod spcr;
pub mod srat;
pub mod tpm2;

#[allow(non_camel_case_types)]
pub mod packed_nums {
    pub type u16_le = zerocopy::U16<zerocopy::LittleEndian>;
    pub type u32_le = zerocopy::U32<zerocopy::LittleEndian>;
    pub type u64_le = zerocopy::U64<zerocopy::LittleEndian>;
}

use self::packed_nums::*;
use core::mem::size_of;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

/// 5.2.5: Root System Description Pointer.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct Rsdp {
    pub signature: [u8; 8], // "RSD PTR "
    pub checksum: u8,       // first 20 bytes
    pub oem_id: [u8; 6],
    pub revision: u8,
    pub rsdt: u32_le,
    pub length: u32_le,
    pub xsdt: u64_le,
    pub xchecksum: u8, // full checksum
    pub rsvd: [u8; 3],
}

const_assert_eq!(size_of::<Rsdp>(), 36);

pub const RSDP_SIGNATURE: [u8; 8] = *b"RSD PTR ";

impl Rsdp {
    /// Validates signature and checksum.
    ///
    /// Revision 0 checksums the first 20 bytes; revision 1 and newer
    /// checksum the full declared length.
    pub fn validate(bytes: &[u8]) -> Option<&Rsdp> {
        let rsdp = Rsdp::ref_from_prefix(bytes).ok()?.0;
        if rsdp.signature != RSDP_SIGNATURE {
            return None;
        }
        let len = if rsdp.revision >= 1 {
            rsdp.length.get() as usize
        } else {
            20
        };
        if len < 20 || len > bytes.len() || bitops::additive_sum(bytes, len) != 0 {
            return None;
        }
        Some(rsdp)
    }

    /// The preferred root table pointer: XSDT if present, else RSDT.
    pub fn root_table(&self) -> (u64, bool) {
        if self.revision >= 1 && self.xsdt.get() != 0 {
            (self.xsdt.get(), true)
        } else {
            (self.rsdt.get() as u64, false)
        }
    }
}

/// 5.2.6: System Description Table Header.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct Header {
    pub signature: [u8; 4],
    pub length: u32_le,
    pub revision: u8,
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub oem_table_id: [u8; 8],
    pub oem_revision: u32_le,
    pub creator_id: u32_le,
    pub creator_revision: u32_le,
}

const_assert_eq!(size_of::<Header>(), 36);

impl Header {
    /// Validates a whole table: header present, declared length within
    /// the buffer and at least `min_length`, additive checksum zero.
    ///
    /// Returns the header and the table body (declared length minus the
    /// header).
    pub fn validate_body(bytes: &[u8], min_length: u32) -> Result<(&Header, &[u8]), ParseError> {
        let header = Header::ref_from_prefix(bytes)
            .map_err(|_| ParseError::Truncated)?
            .0;
        let len = header.length.get() as usize;
        if len > bytes.len() || header.length.get() < min_length.max(size_of::<Header>() as u32) {
            return Err(ParseError::BadLength {
                declared: header.length.get(),
            });
        }
        if bitops::additive_sum(bytes, len) != 0 {
            return Err(ParseError::BadChecksum);
        }
        Ok((header, &bytes[size_of::<Header>()..len]))
    }
}

/// Marker trait tying a fixed table body to its signature and the
/// minimum length a valid instance must declare.
pub trait Table: FromBytes + Unaligned + Immutable + KnownLayout {
    const SIGNATURE: [u8; 4];
    const MIN_LENGTH: u32;
}

/// Errors produced while validating or streaming a table.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Buffer too small for the fixed part of the structure.
    Truncated,
    /// Declared length shorter than the signature minimum or longer
    /// than the mapped window.
    BadLength { declared: u32 },
    /// Additive checksum over the declared length is nonzero.
    BadChecksum,
    /// Signature mismatch for a typed access.
    BadSignature([u8; 4]),
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Truncated => f.write_str("buffer too small for structure"),
            Self::BadLength { declared } => write!(f, "invalid declared length {declared}"),
            Self::BadChecksum => f.write_str("additive checksum mismatch"),
            Self::BadSignature(sig) => write!(f, "signature mismatch: {sig:02x?}"),
        }
    }
}

impl core::error::Error for ParseError {}

/// Reads the typed fixed body of a validated table.
pub fn table_body<T: Table>(bytes: &[u8]) -> Result<(&Header, &T, &[u8]), ParseError> {
    let (header, body) = Header::validate_body(bytes, T::MIN_LENGTH)?;
    if header.signature != T::SIGNATURE {
        return Err(ParseError::BadSignature(header.signature));
    }
    let (fixed, rest) = T::ref_from_prefix(body).map_err(|_| ParseError::Truncated)?;
    Ok((header, fixed, rest))
}

/// 5.2.3.2: Generic Address Structure.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct Gas {
    pub asid: u8,
    pub bits: u8,
    pub offs: u8,
    pub accs: u8,
    pub addr: u64_le,
}

const_assert_eq!(size_of::<Gas>(), 12);

open_enum::open_enum! {
    /// Address space a [`Gas`] points into.
    pub enum AddressSpace: u8 {
        MEM     = 0x0,
        PIO     = 0x1,
        PCI_CFG = 0x2,
        EC      = 0x3,
        SMBUS   = 0x4,
        CMOS    = 0x5,
        PCI_BAR = 0x6,
        IPMI    = 0x7,
        GPIO    = 0x8,
        SERIAL  = 0x9,
        PCC     = 0xa,
        PRM     = 0xb,
        FFH     = 0x7f,
    }
}

impl Gas {
    /// A register is declared by a nonzero bit width.
    pub fn is_present(&self) -> bool {
        self.bits != 0
    }

    pub fn address_space(&self) -> AddressSpace {
        AddressSpace(self.asid)
    }

    /// Merges an extended register block with its legacy PIO twin:
    /// the extended block wins when declared, otherwise the legacy
    /// block is a PIO register of `len` bytes. `cnt` subdivides the
    /// block into registers and `idx` selects one.
    pub fn from_blocks(x_blk: &Gas, blk: u32, len: u8, cnt: u8, idx: u8) -> Gas {
        if x_blk.bits != 0 {
            let bits = x_blk.bits / cnt;
            Gas {
                asid: x_blk.asid,
                bits,
                offs: 0,
                accs: 0,
                addr: (x_blk.addr.get() + (bits as u64 / 8) * idx as u64).into(),
            }
        } else if blk != 0 {
            let bits = (len as u32 * 8 / cnt as u32) as u8;
            Gas {
                asid: AddressSpace::PIO.0,
                bits,
                offs: 0,
                accs: 0,
                addr: (blk as u64 + (bits as u64 / 8) * idx as u64).into(),
            }
        } else {
            Gas::default()
        }
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    extern crate alloc;

    use super::Header;
    use alloc::vec::Vec;
    use core::mem::size_of;
    use zerocopy::IntoBytes;

    pub fn checksummed(mut v: Vec<u8>) -> Vec<u8> {
        let sum = bitops::additive_sum(&v, v.len());
        let last = v.len() - 1;
        v[last] = v[last].wrapping_sub(sum);
        v
    }

    pub fn fake_table(sig: [u8; 4], body: &[u8]) -> Vec<u8> {
        let header = Header {
            signature: sig,
            length: ((size_of::<Header>() + body.len()) as u32).into(),
            revision: 6,
            checksum: 0,
            oem_id: *b"OEMOEM",
            oem_table_id: *b"TABLETBL",
            oem_revision: 1.into(),
            creator_id: 0.into(),
            creator_revision: 0.into(),
        };
        let mut v = header.as_bytes().to_vec();
        v.extend_from_slice(body);
        checksummed(v)
    }
}

#[cfg(test)]
mod tests {
    extern crate alloc;

    use super::test_helpers::*;
    use super::*;
    use alloc::vec;
    use zerocopy::IntoBytes;

    #[test]
    fn rsdp_roundtrip() {
        // Discovery scenario: revision 2, XSDT pointer recorded.
        let rsdp = Rsdp {
            signature: RSDP_SIGNATURE,
            checksum: 0,
            oem_id: *b"OEMOEM",
            revision: 2,
            rsdt: 0x7fff0000.into(),
            length: 36.into(),
            xsdt: 0x7fee0000.into(),
            xchecksum: 0,
            rsvd: [0; 3],
        };
        let bytes = checksummed(rsdp.as_bytes().to_vec());
        let parsed = Rsdp::validate(&bytes).unwrap();
        assert_eq!(parsed.root_table(), (0x7fee0000, true));
    }

    #[test]
    fn rsdp_rejects_bad_checksum() {
        let mut bytes = vec![0u8; 36];
        bytes[..8].copy_from_slice(&RSDP_SIGNATURE);
        bytes[15] = 0; // revision 0: 20-byte checksum
        bytes[19] = 1; // break it
        assert!(Rsdp::validate(&bytes).is_none());
    }

    #[test]
    fn header_validation() {
        let t = fake_table(*b"TEST", &[1, 2, 3, 4]);
        let (header, body) = Header::validate_body(&t, 36).unwrap();
        assert_eq!(header.signature, *b"TEST");
        assert_eq!(body.len(), 4);

        let mut bad = t.clone();
        bad[9] ^= 0xff;
        assert_eq!(
            Header::validate_body(&bad, 36).unwrap_err(),
            ParseError::BadChecksum
        );
        assert!(matches!(
            Header::validate_body(&t, 64).unwrap_err(),
            ParseError::BadLength { .. }
        ));
    }

    #[test]
    fn gas_block_merge() {
        // Extended block present: it wins and subdivides.
        let x = Gas {
            asid: AddressSpace::MEM.0,
            bits: 32,
            offs: 0,
            accs: 3,
            addr: 0xfed40000.into(),
        };
        let g = Gas::from_blocks(&x, 0x1004, 4, 2, 1);
        assert_eq!(g.address_space(), AddressSpace::MEM);
        assert_eq!(g.bits, 16);
        assert_eq!(g.addr.get(), 0xfed40002);

        // Legacy only: PIO.
        let g = Gas::from_blocks(&Gas::default(), 0x1004, 4, 2, 1);
        assert_eq!(g.address_space(), AddressSpace::PIO);
        assert_eq!(g.bits, 16);
        assert_eq!(g.addr.get(), 0x1006);

        // Neither: absent.
        assert!(!Gas::from_blocks(&Gas::default(), 0, 0, 1, 0).is_present());
    }
}
