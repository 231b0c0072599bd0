// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! AArch64 stage-2 descriptor codec (4 KiB granule), the format walked
//! by the SMMU for DMA translation and by EL2 for guest memory.

use crate::Cache;
use crate::Memattr;
use crate::Permissions;
use crate::PteFormat;

const S2_VALID: u64 = 1 << 0;
/// Descriptor bit 1: set for tables and terminal pages, clear for
/// blocks.
const S2_TYPE: u64 = 1 << 1;
const S2_READ: u64 = 1 << 6; // S2AP[0]
const S2_WRITE: u64 = 1 << 7; // S2AP[1]
const S2_SH_INNER: u64 = 0b11 << 8;
const S2_AF: u64 = 1 << 10;
/// XN[0] (bit 53) forbids unprivileged execution, XN[1] (bit 54)
/// privileged execution.
const S2_XN0: u64 = 1 << 53;
const S2_XN1: u64 = 1 << 54;

const S2_ADDR_MASK: u64 = 0x0000_ffff_ffff_f000;

/// Stage-2 MemAttr[3:0] encoding, bits 5:2.
const fn s2_memattr(cache: Cache) -> u64 {
    match cache {
        Cache::WriteBack => 0b1111,
        Cache::WriteThrough => 0b1010,
        // Normal non-cacheable covers both WC and UC.
        Cache::WriteCombining | Cache::Uncacheable => 0b0101,
        Cache::Device => 0b0000, // Device-nGnRnE
    }
}

const fn s2_cache(attr: u64) -> Cache {
    match attr {
        0b1111 => Cache::WriteBack,
        0b1010 => Cache::WriteThrough,
        0b0101 => Cache::WriteCombining,
        _ => Cache::Device,
    }
}

/// Stage-2 translation tables: 4 levels, 48-bit IPA space.
pub struct S2Format;

impl PteFormat for S2Format {
    const LEVELS: u32 = 4;
    const BITS_PER_LEVEL: u32 = 9;
    const PAGE_BITS: u32 = 12;
    const INPUT_BITS: u32 = 48;

    fn make_leaf(level: u32, pa: u64, perms: Permissions, attrs: Memattr) -> u64 {
        if !perms.is_live() {
            return 0;
        }
        let sh = if matches!(attrs.cache, Cache::Device) {
            0
        } else {
            S2_SH_INNER
        };
        (pa & S2_ADDR_MASK)
            | S2_VALID
            | if level == 0 { S2_TYPE } else { 0 }
            | if perms.contains(Permissions::R) { S2_READ } else { 0 }
            | if perms.contains(Permissions::W) { S2_WRITE } else { 0 }
            | if perms.contains(Permissions::XU) { 0 } else { S2_XN0 }
            | if perms.contains(Permissions::XS) { 0 } else { S2_XN1 }
            | sh
            | S2_AF
            | s2_memattr(attrs.cache) << 2
    }

    fn make_table(pa: u64) -> u64 {
        (pa & S2_ADDR_MASK) | S2_TYPE | S2_VALID
    }

    fn is_present(pte: u64) -> bool {
        pte & S2_VALID != 0
    }

    fn is_table(level: u32, pte: u64) -> bool {
        level > 0 && pte & S2_TYPE != 0
    }

    fn leaf_addr(level: u32, pte: u64) -> u64 {
        pte & S2_ADDR_MASK & !((1u64 << (Self::PAGE_BITS + level * Self::BITS_PER_LEVEL)) - 1)
    }

    fn table_addr(pte: u64) -> u64 {
        pte & S2_ADDR_MASK
    }

    fn decode_perms(pte: u64) -> Permissions {
        if pte & S2_VALID == 0 {
            return Permissions::NONE;
        }
        let mut p = Permissions::NONE;
        if pte & S2_READ != 0 {
            p = p | Permissions::R;
        }
        if pte & S2_WRITE != 0 {
            p = p | Permissions::W;
        }
        if pte & S2_XN0 == 0 {
            p = p | Permissions::XU;
        }
        if pte & S2_XN1 == 0 {
            p = p | Permissions::XS;
        }
        p
    }

    fn decode_attrs(_level: u32, pte: u64) -> Memattr {
        Memattr {
            cache: s2_cache(pte >> 2 & 0b1111),
            keyid: 0,
        }
    }
}

/// Input-address size (bits) the stage-2 configuration should use for
/// a physical-address-size nibble reported by the translation
/// hardware.
pub const fn s2_input_size(ias_nibble: u8) -> u8 {
    aarch64_pa_bits(ias_nibble)
}

const fn aarch64_pa_bits(nibble: u8) -> u8 {
    match nibble {
        0 => 32,
        1 => 36,
        2 => 40,
        3 => 42,
        4 => 44,
        _ => 48,
    }
}

/// Number of table levels needed to translate `input_bits` of address
/// with a 4 KiB granule.
pub const fn s2_levels(input_bits: u8) -> u8 {
    ((input_bits - S2Format::PAGE_BITS as u8) + (S2Format::BITS_PER_LEVEL as u8 - 1))
        / S2Format::BITS_PER_LEVEL as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let sets = [
            Permissions::R,
            Permissions(Permissions::R.0 | Permissions::W.0),
            Permissions(Permissions::R.0 | Permissions::W.0 | Permissions::XS.0),
            Permissions(Permissions::R.0 | Permissions::XS.0 | Permissions::XU.0),
        ];
        for level in 0..3 {
            for perms in sets {
                for cache in [Cache::WriteBack, Cache::WriteThrough, Cache::Device] {
                    let attrs = Memattr { cache, keyid: 0 };
                    let pte = S2Format::make_leaf(level, 0x8000_0000, perms, attrs);
                    assert_eq!(S2Format::decode_perms(pte), perms);
                    assert_eq!(S2Format::decode_attrs(level, pte), attrs);
                }
            }
        }
    }

    #[test]
    fn block_vs_page_type() {
        // Terminal page carries the type bit, block does not.
        let page = S2Format::make_leaf(0, 0x1000, Permissions::R, Memattr::ram());
        let block = S2Format::make_leaf(1, 0x20_0000, Permissions::R, Memattr::ram());
        assert!(page & S2_TYPE != 0);
        assert!(block & S2_TYPE == 0);
        assert!(!S2Format::is_table(1, block));
        assert!(S2Format::is_table(1, S2Format::make_table(0x3000)));
    }

    #[test]
    fn level_count() {
        assert_eq!(s2_levels(48), 4);
        assert_eq!(s2_levels(40), 4);
        assert_eq!(s2_levels(39), 3);
        assert_eq!(s2_levels(32), 3);
    }
}
