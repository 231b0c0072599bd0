// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! x86-64 descriptor codecs: the host stage-1 format and the EPT-style
//! stage-2 format used for DMA translation.

use crate::Cache;
use crate::Memattr;
use crate::Permissions;
use crate::PteFormat;

const PTE_P: u64 = 1 << 0; // Present
const PTE_W: u64 = 1 << 1; // Writable
const PTE_U: u64 = 1 << 2; // User
const PTE_PWT: u64 = 1 << 3;
const PTE_PCD: u64 = 1 << 4;
const PTE_A: u64 = 1 << 5; // Accessed
const PTE_D: u64 = 1 << 6; // Dirty
const PTE_S: u64 = 1 << 7; // Superpage (PAT at level 0)
const PTE_G: u64 = 1 << 8; // Global
const PTE_K: u64 = 1 << 9; // Kernel memory (ignored bit)
const PTE_NX: u64 = 1 << 63;

/// Memory-encryption key id field carved out of the upper physical
/// address bits.
const KEY_SHIFT: u32 = 46;
const KEY_BITS: u32 = 6;
const KEY_MASK: u64 = ((1 << KEY_BITS) - 1) << KEY_SHIFT;

const ADDR_MASK: u64 = ((1 << KEY_SHIFT) - 1) & !0xfff;

/// 3-bit PAT index for a cacheability selector, assuming the PAT is
/// programmed with WC in slot 4.
const fn cache_index(cache: Cache) -> u64 {
    match cache {
        Cache::WriteBack => 0,
        Cache::WriteThrough => 1,
        Cache::WriteCombining => 4,
        Cache::Uncacheable | Cache::Device => 3,
    }
}

const fn cache_from_index(idx: u64) -> Cache {
    match idx {
        0 => Cache::WriteBack,
        1 => Cache::WriteThrough,
        4 => Cache::WriteCombining,
        _ => Cache::Uncacheable,
    }
}

/// Host (stage-1) page tables: 4 levels, 48-bit input.
pub struct HptFormat;

impl HptFormat {
    /// The PAT bit sits at bit 12 in superpage leaves and bit 7 in
    /// terminal pages.
    const fn pat_shift(level: u32) -> u32 {
        if level > 0 { 10 } else { 5 }
    }
}

impl PteFormat for HptFormat {
    const LEVELS: u32 = 4;
    const BITS_PER_LEVEL: u32 = 9;
    const PAGE_BITS: u32 = 12;
    const INPUT_BITS: u32 = 48;

    fn make_leaf(level: u32, pa: u64, perms: Permissions, attrs: Memattr) -> u64 {
        if !perms.is_live() {
            return 0;
        }
        let cache = cache_index(attrs.cache);
        let exec = perms.intersects(Permissions(Permissions::XS.0 | Permissions::XU.0));
        (pa & ADDR_MASK)
            | PTE_P
            | PTE_A
            | if perms.intersects(Permissions(Permissions::W.0 | Permissions::SS.0)) {
                PTE_D
            } else {
                0
            }
            | if perms.contains(Permissions::W) { PTE_W } else { 0 }
            | if perms.contains(Permissions::U) { PTE_U } else { 0 }
            | if perms.contains(Permissions::K) { PTE_K } else { 0 }
            | if perms.contains(Permissions::G) { PTE_G } else { 0 }
            | if exec { 0 } else { PTE_NX }
            | if level > 0 { PTE_S } else { 0 }
            | (cache & 0b11) << 3
            | (cache & 0b100) << Self::pat_shift(level)
            | (attrs.keyid as u64) << KEY_SHIFT
    }

    fn make_table(pa: u64) -> u64 {
        (pa & ADDR_MASK) | PTE_A | PTE_U | PTE_W | PTE_P
    }

    fn is_present(pte: u64) -> bool {
        pte & PTE_P != 0
    }

    fn is_table(level: u32, pte: u64) -> bool {
        level > 0 && pte & PTE_S == 0
    }

    fn leaf_addr(level: u32, pte: u64) -> u64 {
        pte & ADDR_MASK & !((1u64 << (Self::PAGE_BITS + level * Self::BITS_PER_LEVEL)) - 1)
    }

    fn table_addr(pte: u64) -> u64 {
        pte & ADDR_MASK
    }

    fn decode_perms(pte: u64) -> Permissions {
        if pte & PTE_P == 0 {
            return Permissions::NONE;
        }
        let mut p = Permissions::R;
        if pte & PTE_W != 0 {
            p = p | Permissions::W;
        } else if pte & PTE_D != 0 {
            // A dirty read-only page is the shadow-stack encoding.
            p = p | Permissions::SS;
        }
        if pte & PTE_U != 0 {
            p = p | Permissions::U;
        }
        if pte & PTE_K != 0 {
            p = p | Permissions::K;
        }
        if pte & PTE_G != 0 {
            p = p | Permissions::G;
        }
        if pte & PTE_NX == 0 {
            p = p | Permissions::XS | Permissions::XU;
        }
        p
    }

    fn decode_attrs(level: u32, pte: u64) -> Memattr {
        let idx = (pte >> 3 & 0b11) | (pte >> Self::pat_shift(level) & 0b100);
        Memattr {
            cache: cache_from_index(idx),
            keyid: ((pte & KEY_MASK) >> KEY_SHIFT) as u16,
        }
    }
}

const EPT_R: u64 = 1 << 0;
const EPT_W: u64 = 1 << 1;
const EPT_XS: u64 = 1 << 2;
const EPT_S: u64 = 1 << 7; // Superpage
const EPT_A: u64 = 1 << 8;
const EPT_D: u64 = 1 << 9;
const EPT_XU: u64 = 1 << 10; // With mode-based execute control

const EPT_ADDR_MASK: u64 = 0x000f_ffff_ffff_f000;

/// EPT memory type field, bits 5:3.
const fn ept_memtype(cache: Cache) -> u64 {
    match cache {
        Cache::WriteBack => 6,
        Cache::WriteThrough => 4,
        Cache::WriteCombining => 1,
        Cache::Uncacheable | Cache::Device => 0,
    }
}

const fn ept_cache(memtype: u64) -> Cache {
    match memtype {
        6 => Cache::WriteBack,
        4 => Cache::WriteThrough,
        1 => Cache::WriteCombining,
        _ => Cache::Uncacheable,
    }
}

/// Extended/DMA (stage-2) page tables: 4 levels, 48-bit input.
///
/// Carries no user/global/kernel distinction; device memory encodes as
/// the uncacheable memory type.
pub struct EptFormat;

impl PteFormat for EptFormat {
    const LEVELS: u32 = 4;
    const BITS_PER_LEVEL: u32 = 9;
    const PAGE_BITS: u32 = 12;
    const INPUT_BITS: u32 = 48;

    fn make_leaf(level: u32, pa: u64, perms: Permissions, attrs: Memattr) -> u64 {
        if !perms.is_live() {
            return 0;
        }
        (pa & EPT_ADDR_MASK)
            | if perms.contains(Permissions::R) { EPT_R } else { 0 }
            | if perms.contains(Permissions::W) { EPT_W } else { 0 }
            | if perms.contains(Permissions::XS) { EPT_XS } else { 0 }
            | if perms.contains(Permissions::XU) { EPT_XU } else { 0 }
            | if level > 0 { EPT_S } else { 0 }
            | EPT_A
            | EPT_D
            | ept_memtype(attrs.cache) << 3
    }

    fn make_table(pa: u64) -> u64 {
        (pa & EPT_ADDR_MASK) | EPT_XU | EPT_XS | EPT_W | EPT_R
    }

    fn is_present(pte: u64) -> bool {
        pte & (EPT_R | EPT_W | EPT_XS | EPT_XU) != 0
    }

    fn is_table(level: u32, pte: u64) -> bool {
        level > 0 && pte & EPT_S == 0
    }

    fn leaf_addr(level: u32, pte: u64) -> u64 {
        pte & EPT_ADDR_MASK & !((1u64 << (Self::PAGE_BITS + level * Self::BITS_PER_LEVEL)) - 1)
    }

    fn table_addr(pte: u64) -> u64 {
        pte & EPT_ADDR_MASK
    }

    fn decode_perms(pte: u64) -> Permissions {
        let mut p = Permissions::NONE;
        if pte & EPT_R != 0 {
            p = p | Permissions::R;
        }
        if pte & EPT_W != 0 {
            p = p | Permissions::W;
        }
        if pte & EPT_XS != 0 {
            p = p | Permissions::XS;
        }
        if pte & EPT_XU != 0 {
            p = p | Permissions::XU;
        }
        p
    }

    fn decode_attrs(_level: u32, pte: u64) -> Memattr {
        Memattr {
            cache: ept_cache(pte >> 3 & 0b111),
            keyid: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hpt_perm_sets() -> Vec<Permissions> {
        // Representable stage-1 sets: R implied by presence, XS/XU
        // fused by NX. A shadow-stack leaf is a dirty read-only page,
        // so W and SS are mutually exclusive.
        let mut v = Vec::new();
        for w in [0, Permissions::W.0, Permissions::SS.0] {
            for u in [0, Permissions::U.0] {
                for k in [0, Permissions::K.0] {
                    for g in [0, Permissions::G.0] {
                        for x in [0, Permissions::XS.0 | Permissions::XU.0] {
                            v.push(Permissions(Permissions::R.0 | w | u | k | g | x));
                        }
                    }
                }
            }
        }
        v
    }

    #[test]
    fn hpt_round_trip() {
        for level in 0..3 {
            for perms in hpt_perm_sets() {
                for cache in [
                    Cache::WriteBack,
                    Cache::WriteThrough,
                    Cache::WriteCombining,
                    Cache::Uncacheable,
                ] {
                    for keyid in [0u16, 1, 63] {
                        let attrs = Memattr { cache, keyid };
                        let pte = HptFormat::make_leaf(level, 0x1230_0000_0000 & !0x3fff_ffff, perms, attrs);
                        assert!(HptFormat::is_present(pte));
                        assert!(!HptFormat::is_table(level, pte) || level == 0);
                        assert_eq!(HptFormat::decode_perms(pte), perms, "level {level} {perms:?}");
                        assert_eq!(HptFormat::decode_attrs(level, pte), attrs);
                    }
                }
            }
        }
    }

    #[test]
    fn hpt_empty_perms_clear() {
        assert_eq!(
            HptFormat::make_leaf(0, 0x1000, Permissions::NONE, Memattr::ram()),
            0
        );
    }

    #[test]
    fn hpt_superpage_bit() {
        let pte = HptFormat::make_leaf(1, 0x200000, Permissions::R, Memattr::ram());
        assert!(!HptFormat::is_table(1, pte));
        let table = HptFormat::make_table(0x5000);
        assert!(HptFormat::is_table(1, table));
        assert_eq!(HptFormat::table_addr(table), 0x5000);
    }

    #[test]
    fn hpt_shadow_stack_encoding() {
        let pte = HptFormat::make_leaf(
            0,
            0x1000,
            Permissions(Permissions::R.0 | Permissions::SS.0),
            Memattr::ram(),
        );
        // Dirty but not writable, and decoded back as shadow stack.
        assert_ne!(pte & PTE_D, 0);
        assert_eq!(pte & PTE_W, 0);
        assert!(HptFormat::decode_perms(pte).contains(Permissions::SS));
        assert!(!HptFormat::decode_perms(pte).contains(Permissions::W));
    }

    #[test]
    fn hpt_key_in_upper_bits() {
        let attrs = Memattr {
            cache: Cache::WriteBack,
            keyid: 5,
        };
        let pte = HptFormat::make_leaf(0, 0x1000, Permissions::R, attrs);
        assert_eq!(HptFormat::leaf_addr(0, pte), 0x1000);
        assert_eq!(HptFormat::decode_attrs(0, pte).keyid, 5);
    }

    #[test]
    fn ept_round_trip() {
        let sets = [
            Permissions::R,
            Permissions(Permissions::R.0 | Permissions::W.0),
            Permissions(Permissions::R.0 | Permissions::XS.0),
            Permissions(Permissions::R.0 | Permissions::W.0 | Permissions::XS.0 | Permissions::XU.0),
        ];
        for level in 0..3 {
            for perms in sets {
                for cache in [
                    Cache::WriteBack,
                    Cache::WriteThrough,
                    Cache::WriteCombining,
                    Cache::Uncacheable,
                ] {
                    let attrs = Memattr { cache, keyid: 0 };
                    let pte = EptFormat::make_leaf(level, 0x4000_0000, perms, attrs);
                    assert_eq!(EptFormat::decode_perms(pte), perms);
                    assert_eq!(EptFormat::decode_attrs(level, pte), attrs);
                }
            }
        }
    }
}
