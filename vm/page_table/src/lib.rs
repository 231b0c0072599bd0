// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Multi-level translation tables.
//!
//! A single generic engine serves every table variant: host stage-1,
//! DMA/guest stage-2, on either architecture. The variant supplies a
//! [`PteFormat`] describing the tree geometry and the pure
//! encode/decode functions between ([`Permissions`], [`Memattr`]) and
//! raw descriptor bits; the engine owns the walk.
//!
//! Nodes live in a [`FrameArena`], addressed by physical address, so
//! trees may alias each other's subtrees (kernel mappings are shared
//! into per-CPU roots by [`PageTable::share_from`]). Entries are
//! atomics: a concurrent walker either sees an empty entry or a fully
//! constructed subtree, never a partially built one.

pub mod aarch64;
pub mod tlb;
pub mod x64;

use core::marker::PhantomData;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;

/// Leaf permission bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Permissions(pub u16);

impl Permissions {
    pub const NONE: Self = Self(0);
    /// Readable.
    pub const R: Self = Self(1 << 0);
    /// Writable.
    pub const W: Self = Self(1 << 1);
    /// Executable in supervisor mode.
    pub const XS: Self = Self(1 << 2);
    /// Executable in unprivileged mode.
    pub const XU: Self = Self(1 << 3);
    /// User accessible (stage-1 only).
    pub const U: Self = Self(1 << 4);
    /// Kernel-memory marker (hypervisor owned).
    pub const K: Self = Self(1 << 5);
    /// Global: survives address-space tag switches.
    pub const G: Self = Self(1 << 6);
    /// Shadow stack.
    pub const SS: Self = Self(1 << 7);

    /// The access bits: a PTE carrying none of these is not live.
    pub const API: Self =
        Self(Self::R.0 | Self::W.0 | Self::XS.0 | Self::XU.0 | Self::U.0 | Self::SS.0);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether any access bit is set.
    pub const fn is_live(self) -> bool {
        self.0 & Self::API.0 != 0
    }
}

impl core::ops::BitOr for Permissions {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl core::ops::BitAnd for Permissions {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        self.intersect(rhs)
    }
}

/// Cacheability selector for a mapping.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Cache {
    /// Write-back (normal RAM).
    #[default]
    WriteBack = 0,
    /// Write-through.
    WriteThrough = 1,
    /// Write-combining.
    WriteCombining = 2,
    /// Uncacheable.
    Uncacheable = 3,
    /// Device memory.
    Device = 4,
}

impl Cache {
    pub const fn from_index(v: u8) -> Cache {
        match v {
            0 => Cache::WriteBack,
            1 => Cache::WriteThrough,
            2 => Cache::WriteCombining,
            3 => Cache::Uncacheable,
            _ => Cache::Device,
        }
    }
}

/// Memory attributes of a mapping: cacheability plus an optional
/// memory-encryption key id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Memattr {
    pub cache: Cache,
    pub keyid: u16,
}

impl Memattr {
    /// Normal RAM.
    pub const fn ram() -> Memattr {
        Memattr {
            cache: Cache::WriteBack,
            keyid: 0,
        }
    }

    /// Device MMIO.
    pub const fn dev() -> Memattr {
        Memattr {
            cache: Cache::Device,
            keyid: 0,
        }
    }
}

/// The per-variant descriptor codec and tree geometry.
///
/// Encode and decode must be exact inverses for every (level, perms,
/// attrs) a caller can produce; the engine relies on reading back what
/// it wrote.
pub trait PteFormat {
    /// Number of levels in the tree.
    const LEVELS: u32;
    /// Log2 entries per node, at most 9.
    const BITS_PER_LEVEL: u32;
    /// Log2 bytes per terminal page.
    const PAGE_BITS: u32;
    /// Valid input-address width.
    const INPUT_BITS: u32;

    /// Encodes a leaf at `level` mapping `pa`. Returns 0 when `perms`
    /// carries no access bit.
    fn make_leaf(level: u32, pa: u64, perms: Permissions, attrs: Memattr) -> u64;

    /// Encodes a non-leaf entry pointing at the node at `pa`.
    fn make_table(pa: u64) -> u64;

    /// Whether the entry is non-empty.
    fn is_present(pte: u64) -> bool;

    /// Whether a present entry at `level` references a next-level node
    /// rather than terminating translation.
    fn is_table(level: u32, pte: u64) -> bool;

    /// Output address of a leaf at `level`.
    fn leaf_addr(level: u32, pte: u64) -> u64;

    /// Node address of a table entry.
    fn table_addr(pte: u64) -> u64;

    /// Decodes the permission bits of a leaf.
    fn decode_perms(pte: u64) -> Permissions;

    /// Decodes the memory attributes of a leaf at `level`.
    fn decode_attrs(level: u32, pte: u64) -> Memattr;
}

/// Entries per node. Formats with fewer bits per level use a prefix.
pub const NODE_ENTRIES: usize = 512;

/// One translation-table node.
pub struct PageNode {
    entries: [AtomicU64; NODE_ENTRIES],
}

impl PageNode {
    pub fn new() -> PageNode {
        PageNode {
            entries: [const { AtomicU64::new(0) }; NODE_ENTRIES],
        }
    }

    /// The entry at `idx`. Also used for the other page-sized,
    /// entry-paired hardware tables (IOMMU root/context tables,
    /// invalidation queues) that draw from the same arena.
    pub fn entry(&self, idx: usize) -> &AtomicU64 {
        &self.entries[idx]
    }
}

/// Backing store for translation-table nodes.
///
/// The kernel implements this over the physical frame allocator; tests
/// implement it over a preallocated vector. Nodes are only reclaimed
/// with their owning space, so the arena never frees individual nodes.
pub trait FrameArena {
    /// Allocates a zeroed node and returns its physical address.
    fn allocate_node(&self) -> Option<u64>;

    /// Borrows the node at `phys`, which must have been returned by
    /// [`Self::allocate_node`].
    fn node(&self, phys: u64) -> Option<&PageNode>;
}

/// Errors from table mutation.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PtabError {
    /// A node allocation failed; already-installed inner nodes are
    /// left in place (an inner node without leaves is equivalent to
    /// empty).
    #[error("translation-table node allocation failed")]
    AllocFailed,
    /// Input or output address not aligned to the mapping size, or an
    /// order beyond the table geometry. Rejected before any side
    /// effect.
    #[error("misaligned or oversized mapping request")]
    Misaligned,
}

/// A successful translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    /// Output address corresponding to the queried input address.
    pub phys: u64,
    /// Leaf order: log2 of the mapping size in pages.
    pub order: u32,
    pub perms: Permissions,
    pub attrs: Memattr,
}

/// A multi-level translation table rooted at a node in `A`.
pub struct PageTable<'a, F, A> {
    root: u64,
    arena: &'a A,
    _format: PhantomData<F>,
}

impl<'a, F: PteFormat, A: FrameArena> PageTable<'a, F, A> {
    /// Creates an empty table, allocating its root node.
    pub fn new(arena: &'a A) -> Result<Self, PtabError> {
        let root = arena.allocate_node().ok_or(PtabError::AllocFailed)?;
        Ok(PageTable {
            root,
            arena,
            _format: PhantomData,
        })
    }

    /// Adopts an existing root, e.g. a remote CPU's current table.
    pub fn from_root(root: u64, arena: &'a A) -> Self {
        PageTable {
            root,
            arena,
            _format: PhantomData,
        }
    }

    /// Physical address of the root node, the value loaded into the
    /// translation-base register.
    pub fn root_phys(&self) -> u64 {
        self.root
    }

    /// Mapping size in bytes for a leaf of `order` pages.
    pub const fn page_size(order: u32) -> u64 {
        1 << (order + F::PAGE_BITS)
    }

    /// Slot index of `addr` at `level`.
    const fn slot(level: u32, addr: u64) -> usize {
        (addr >> (F::PAGE_BITS + level * F::BITS_PER_LEVEL)) as usize
            & ((1 << F::BITS_PER_LEVEL) - 1)
    }

    /// The highest level at which `a` and `b` land in different slots.
    pub fn diverge(a: u64, b: u64) -> u32 {
        let msb = bitops::bit_scan_msb(a ^ b);
        if msb < F::PAGE_BITS as i32 {
            return 0;
        }
        ((msb as u32 - F::PAGE_BITS) / F::BITS_PER_LEVEL).min(F::LEVELS - 1)
    }

    /// Returns the PTE slot for `v` at `level`, materializing the
    /// intermediate nodes when `allocate` is set.
    ///
    /// Returns `None` if the path is absent (or terminated by a
    /// superpage above `level`) and `allocate` is clear, or if node
    /// allocation fails.
    pub fn walk(&self, v: u64, level: u32, allocate: bool) -> Option<&'a AtomicU64> {
        debug_assert!(level < F::LEVELS);
        let mut phys = self.root;
        let mut cur = F::LEVELS - 1;
        loop {
            let node = self.arena.node(phys)?;
            let entry = node.entry(Self::slot(cur, v));
            if cur == level {
                return Some(entry);
            }
            let e = entry.load(Ordering::Acquire);
            if F::is_present(e) {
                if !F::is_table(cur, e) {
                    // A superpage terminates the path above the
                    // requested level.
                    return None;
                }
                phys = F::table_addr(e);
            } else {
                if !allocate {
                    return None;
                }
                let new = self.arena.allocate_node()?;
                match entry.compare_exchange(
                    e,
                    F::make_table(new),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => phys = new,
                    // Lost the race: follow whatever won. The node we
                    // allocated stays unused; the arena reclaims it
                    // with the space.
                    Err(raced) if F::is_table(cur, raced) => phys = F::table_addr(raced),
                    Err(_) => return None,
                }
            }
            cur -= 1;
        }
    }

    /// Translates `v`, returning the leaf's output address, order and
    /// decoded attributes.
    pub fn lookup(&self, v: u64) -> Option<Lookup> {
        let mut phys = self.root;
        for cur in (0..F::LEVELS).rev() {
            let node = self.arena.node(phys)?;
            let e = node.entry(Self::slot(cur, v)).load(Ordering::Acquire);
            if !F::is_present(e) {
                return None;
            }
            if F::is_table(cur, e) {
                phys = F::table_addr(e);
                continue;
            }
            let order = cur * F::BITS_PER_LEVEL;
            let offset = v & (Self::page_size(order) - 1);
            return Some(Lookup {
                phys: F::leaf_addr(cur, e) + offset,
                order,
                perms: F::decode_perms(e),
                attrs: F::decode_attrs(cur, e),
            });
        }
        None
    }

    /// Installs (or, with empty `perms`, clears) a mapping of
    /// `2^order` pages at `v` -> `p`.
    ///
    /// `order` need not be a multiple of the per-level stride: the
    /// residue is expressed as a run of `2^(order % BITS_PER_LEVEL)`
    /// consecutive leaves at level `order / BITS_PER_LEVEL`.
    ///
    /// The caller owns TLB maintenance; see [`tlb::TlbControl`].
    pub fn update(
        &self,
        v: u64,
        p: u64,
        order: u32,
        perms: Permissions,
        attrs: Memattr,
    ) -> Result<(), PtabError> {
        let size = Self::page_size(order);
        if order + F::PAGE_BITS >= F::INPUT_BITS
            || order / F::BITS_PER_LEVEL >= F::LEVELS
            || v & (size - 1) != 0
            || p & (size - 1) != 0
        {
            return Err(PtabError::Misaligned);
        }

        let level = order / F::BITS_PER_LEVEL;
        let step = Self::page_size(level * F::BITS_PER_LEVEL);
        let n = 1u64 << (order % F::BITS_PER_LEVEL);

        for i in 0..n {
            let va = v + i * step;
            let pa = p + i * step;
            let entry = self.walk(va, level, true).ok_or(PtabError::AllocFailed)?;
            entry.store(F::make_leaf(level, pa, perms, attrs), Ordering::Release);
        }
        Ok(())
    }

    /// Copies the slot at `diverge(v, other)` from `src`, aliasing the
    /// whole subtree. Returns whether the slot changed.
    ///
    /// This is how kernel mappings replicate into per-CPU and
    /// per-space roots: both tables end up referencing the same
    /// interior nodes.
    pub fn share_from(
        &self,
        src: &PageTable<'_, F, A>,
        v: u64,
        other: u64,
    ) -> Result<bool, PtabError> {
        debug_assert_ne!(v & !(Self::page_size(0) - 1), other & !(Self::page_size(0) - 1));
        let level = Self::diverge(v, other);
        let Some(s) = src.walk(v, level, false) else {
            return Ok(false);
        };
        let d = self.walk(v, level, true).ok_or(PtabError::AllocFailed)?;
        let spte = s.load(Ordering::Acquire);
        let dpte = d.load(Ordering::Acquire);
        if spte == dpte {
            return Ok(false);
        }
        d.store(spte, Ordering::Release);
        Ok(true)
    }

    /// Shares every slot of `[start, end)` from `src`, stepping at the
    /// divergence granularity against `pivot` (an address outside the
    /// range whose mappings must stay private).
    pub fn share_range(
        &self,
        src: &PageTable<'_, F, A>,
        mut start: u64,
        end: u64,
        pivot: u64,
    ) -> Result<(), PtabError> {
        while start < end {
            let level = Self::diverge(start, pivot);
            self.share_from(src, start, pivot)?;
            start += Self::page_size(level * F::BITS_PER_LEVEL);
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_arena::TestArena;
    use super::x64::HptFormat;
    use super::*;

    type Hpt<'a> = PageTable<'a, HptFormat, TestArena>;

    const RW: Permissions = Permissions(Permissions::R.0 | Permissions::W.0);

    #[test]
    fn superpage_map_and_lookup() {
        // 2 MiB leaf at level 1, then byte-granular translation.
        let arena = TestArena::new(16);
        let pt = Hpt::new(&arena).unwrap();
        pt.update(0x200000, 0x40000000, 9, RW, Memattr::ram()).unwrap();

        let hit = pt.lookup(0x200FF8).unwrap();
        assert_eq!(hit.phys, 0x40000FF8);
        assert_eq!(hit.order, 9);
        assert_eq!(hit.perms, RW);
        assert_eq!(hit.attrs, Memattr::ram());

        assert_eq!(pt.lookup(0x1FFFFF), None);
        assert_eq!(pt.lookup(0x400000), None);
    }

    #[test]
    fn round_trip_all_offsets() {
        let arena = TestArena::new(16);
        let pt = Hpt::new(&arena).unwrap();
        pt.update(0x200000, 0x40000000, 9, RW, Memattr::ram()).unwrap();
        for off in [0u64, 0x1000, 0x12345 & !7, 0x1FFFF8] {
            assert_eq!(pt.lookup(0x200000 + off).unwrap().phys, 0x40000000 + off);
        }
    }

    #[test]
    fn misalignment_rejected_without_side_effects() {
        let arena = TestArena::new(16);
        let pt = Hpt::new(&arena).unwrap();
        let before = arena.allocated();
        // 2 MiB order with a 4 KiB-aligned address.
        assert_eq!(
            pt.update(0x201000, 0x40000000, 9, RW, Memattr::ram()),
            Err(PtabError::Misaligned)
        );
        assert_eq!(
            pt.update(0x200000, 0x40001000, 9, RW, Memattr::ram()),
            Err(PtabError::Misaligned)
        );
        assert_eq!(arena.allocated(), before);
    }

    #[test]
    fn alloc_failure_surfaces() {
        let arena = TestArena::new(16);
        let pt = Hpt::new(&arena).unwrap();
        arena.limit_allocations(1);
        assert_eq!(
            pt.update(0, 0, 0, RW, Memattr::ram()),
            Err(PtabError::AllocFailed)
        );
    }

    #[test]
    fn clear_leaf() {
        let arena = TestArena::new(16);
        let pt = Hpt::new(&arena).unwrap();
        pt.update(0x1000, 0x2000, 0, RW, Memattr::ram()).unwrap();
        assert!(pt.lookup(0x1000).is_some());
        pt.update(0x1000, 0, 0, Permissions::NONE, Memattr::ram()).unwrap();
        assert!(pt.lookup(0x1000).is_none());
    }

    #[test]
    fn intermediate_order_installs_run_of_leaves() {
        // Order 10 = two adjacent 2 MiB leaves at level 1.
        let arena = TestArena::new(16);
        let pt = Hpt::new(&arena).unwrap();
        pt.update(0x400000, 0x80000000, 10, RW, Memattr::ram()).unwrap();
        assert_eq!(pt.lookup(0x400000).unwrap().order, 9);
        assert_eq!(pt.lookup(0x600000).unwrap().phys, 0x80200000);
    }

    #[test]
    fn diverge_levels() {
        assert_eq!(Hpt::diverge(0x0000, 0x1000), 0);
        assert_eq!(Hpt::diverge(0x0000, 0x20_0000), 1);
        assert_eq!(Hpt::diverge(0x0000, 0x4000_0000), 2);
        assert_eq!(Hpt::diverge(0x0000, 0x80_0000_0000), 3);
        // Beyond the top stride, still the top level.
        assert_eq!(Hpt::diverge(0x0000, 0xffff_0000_0000_0000), 3);
    }

    #[test]
    fn share_aliases_subtree() {
        let arena = TestArena::new(32);
        let master = Hpt::new(&arena).unwrap();
        let percpu = Hpt::new(&arena).unwrap();

        // Kernel mapping high, per-CPU pivot low.
        let kva = 0xffff_8000_0000_0000u64 & ((1 << 48) - 1);
        master.update(kva, 0x1000, 0, RW, Memattr::ram()).unwrap();
        assert!(percpu.share_from(&master, kva, 0x0).unwrap());
        assert_eq!(percpu.lookup(kva).unwrap().phys, 0x1000);

        // Idempotent: a second share changes nothing.
        assert!(!percpu.share_from(&master, kva, 0x0).unwrap());

        // Updates through the master become visible in the sharer
        // because the subtree is aliased, not copied.
        master.update(kva + 0x1000, 0x2000, 0, RW, Memattr::ram()).unwrap();
        assert_eq!(percpu.lookup(kva + 0x1000).unwrap().phys, 0x2000);
    }

    #[test]
    fn share_absent_source_is_noop() {
        let arena = TestArena::new(16);
        let master = Hpt::new(&arena).unwrap();
        let percpu = Hpt::new(&arena).unwrap();
        assert!(!percpu.share_from(&master, 0x40000000, 0).unwrap());
    }
}
