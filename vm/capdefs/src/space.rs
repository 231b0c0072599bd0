// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Memory-space factories and the mapping operations the capability
//! layer invokes on them.

use crate::Status;
use bitops::aligned_order;
use core::sync::atomic::AtomicBool;
use core::sync::atomic::Ordering;
use iommu::Sdid;
use iommu::SdidAllocator;
use page_table::tlb::TlbControl;
use page_table::FrameArena;
use page_table::Memattr;
use page_table::PageTable;
use page_table::Permissions;
use page_table::PteFormat;

/// The slice of a protection domain the space factories need: a
/// liveness token. Once a PD starts tearing down it can no longer be
/// referenced and space creation aborts.
pub struct PdRef {
    alive: AtomicBool,
}

impl PdRef {
    pub fn new() -> PdRef {
        PdRef {
            alive: AtomicBool::new(true),
        }
    }

    pub fn revoke(&self) {
        self.alive.store(false, Ordering::Release);
    }

    fn try_ref(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

impl Default for PdRef {
    fn default() -> Self {
        Self::new()
    }
}

/// A host (stage-1) memory space: one translation tree per protection
/// domain, with per-CPU shootdown state.
pub struct SpaceHst<'a, F: PteFormat, A: FrameArena> {
    table: PageTable<'a, F, A>,
    tlb: TlbControl,
}

impl<'a, F: PteFormat, A: FrameArena> SpaceHst<'a, F, A> {
    /// Creates the space, failing with `Aborted` if the owning PD is
    /// gone and `MemObj` if the root cannot be allocated.
    pub fn create(pd: &PdRef, arena: &'a A, max_cpus: usize) -> Result<Self, Status> {
        if !pd.try_ref() {
            return Err(Status::Aborted);
        }
        Ok(SpaceHst {
            table: PageTable::new(arena)?,
            tlb: TlbControl::new(max_cpus),
        })
    }

    pub fn table(&self) -> &PageTable<'a, F, A> {
        &self.table
    }

    pub fn tlb(&self) -> &TlbControl {
        &self.tlb
    }

    /// Installs identity mappings over `[phys, phys + size)`,
    /// choosing the largest orders the size and alignment allow. Used
    /// to protect (or expose) reserved physical regions.
    pub fn access_ctrl(
        &self,
        mut phys: u64,
        mut size: u64,
        perm: Permissions,
        attrs: Memattr,
    ) -> Result<(), Status> {
        while size != 0 {
            let order = aligned_order(size, &[phys])
                .checked_sub(F::PAGE_BITS)
                .ok_or(Status::BadPar)?;
            self.table.update(phys, phys, order, perm, attrs)?;
            let bytes = 1u64 << (order + F::PAGE_BITS);
            phys += bytes;
            size -= bytes;
        }
        Ok(())
    }
}

/// A DMA (stage-2) memory space with its stage-2 domain id.
pub struct SpaceDma<'a, F: PteFormat, A: FrameArena> {
    table: PageTable<'a, F, A>,
    sdid: Sdid,
}

impl<'a, F: PteFormat, A: FrameArena> SpaceDma<'a, F, A> {
    /// Creates the space with a freshly allocated domain id.
    pub fn create(pd: &PdRef, arena: &'a A, sdids: &SdidAllocator) -> Result<Self, Status> {
        if !pd.try_ref() {
            return Err(Status::Aborted);
        }
        Ok(SpaceDma {
            table: PageTable::new(arena)?,
            sdid: sdids.alloc()?,
        })
    }

    pub fn table(&self) -> &PageTable<'a, F, A> {
        &self.table
    }

    pub fn sdid(&self) -> Sdid {
        self.sdid
    }

    /// The physical root to program into an IOMMU context.
    pub fn root_phys(&self) -> u64 {
        self.table.root_phys()
    }

    /// Identity read/write DMA windows for reserved memory regions.
    pub fn access_ctrl(&self, phys: u64, size: u64, perm: Permissions) -> Result<(), Status> {
        let mut phys = phys;
        let mut size = size;
        while size != 0 {
            let order = aligned_order(size, &[phys])
                .checked_sub(F::PAGE_BITS)
                .ok_or(Status::BadPar)?;
            self.table.update(phys, phys, order, perm, Memattr::ram())?;
            let bytes = 1u64 << (order + F::PAGE_BITS);
            phys += bytes;
            size -= bytes;
        }
        Ok(())
    }
}

/// Maps the region at `v_src` of `src` into `dst` at `v_dst` under a
/// permission mask.
///
/// An unmapped source or an empty masked permission set clears the
/// destination instead.
pub fn delegate<'a, F: PteFormat, A: FrameArena>(
    src: &SpaceHst<'a, F, A>,
    dst: &PageTable<'a, F, A>,
    v_src: u64,
    v_dst: u64,
    order: u32,
    perm_mask: Permissions,
    attrs: Memattr,
) -> Result<(), Status> {
    let size = 1u64 << (order + F::PAGE_BITS);
    if v_src & (size - 1) != 0 || v_dst & (size - 1) != 0 {
        return Err(Status::BadPar);
    }

    match src.table.lookup(v_src) {
        Some(hit) if hit.order >= order => {
            let perms = hit.perms.intersect(perm_mask);
            // Delegation must never widen what the source holds.
            let base = hit.phys & !(size - 1);
            dst.update(v_dst, base, order, perms, attrs)?;
        }
        _ => {
            dst.update(v_dst, 0, order, Permissions::NONE, attrs)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use page_table::x64::EptFormat;
    use page_table::x64::HptFormat;
    use page_table::PageNode;
    use std::sync::atomic::AtomicUsize;

    struct Arena {
        nodes: Vec<PageNode>,
        next: AtomicUsize,
        limit: AtomicUsize,
    }

    impl Arena {
        fn new(n: usize) -> Arena {
            Arena {
                nodes: (0..n).map(|_| PageNode::new()).collect(),
                next: AtomicUsize::new(0),
                limit: AtomicUsize::new(n),
            }
        }

        fn exhaust(&self) {
            self.limit.store(0, Ordering::Relaxed);
        }
    }

    impl FrameArena for Arena {
        fn allocate_node(&self) -> Option<u64> {
            let i = self.next.fetch_add(1, Ordering::Relaxed);
            (i < self.limit.load(Ordering::Relaxed) && i < self.nodes.len())
                .then(|| ((i + 1) as u64) << 12)
        }

        fn node(&self, phys: u64) -> Option<&PageNode> {
            self.nodes.get(((phys >> 12) as usize).checked_sub(1)?)
        }
    }

    const RW: Permissions = Permissions(Permissions::R.0 | Permissions::W.0);

    #[test]
    fn create_fails_on_dead_pd() {
        let arena = Arena::new(8);
        let pd = PdRef::new();
        pd.revoke();
        let r = SpaceHst::<HptFormat, _>::create(&pd, &arena, 4);
        assert!(matches!(r, Err(Status::Aborted)));
    }

    #[test]
    fn create_fails_without_memory() {
        let arena = Arena::new(8);
        arena.exhaust();
        let pd = PdRef::new();
        let r = SpaceHst::<HptFormat, _>::create(&pd, &arena, 4);
        assert!(matches!(r, Err(Status::MemObj)));
    }

    #[test]
    fn dma_space_gets_domain_id() {
        let arena = Arena::new(8);
        let pd = PdRef::new();
        let sdids = SdidAllocator::new(16);
        let a = SpaceDma::<EptFormat, _>::create(&pd, &arena, &sdids).unwrap();
        let b = SpaceDma::<EptFormat, _>::create(&pd, &arena, &sdids).unwrap();
        assert_ne!(a.sdid(), b.sdid());
    }

    #[test]
    fn access_ctrl_uses_largest_orders() {
        // A 2 MiB + 4 KiB region at a 2 MiB boundary: one superpage
        // and one terminal page.
        let arena = Arena::new(16);
        let pd = PdRef::new();
        let space = SpaceHst::<HptFormat, _>::create(&pd, &arena, 4).unwrap();
        space
            .access_ctrl(0x200000, 0x201000, RW, Memattr::dev())
            .unwrap();
        assert_eq!(space.table().lookup(0x200000).unwrap().order, 9);
        assert_eq!(space.table().lookup(0x400000).unwrap().order, 0);
        assert!(space.table().lookup(0x401000).is_none());
    }

    #[test]
    fn delegate_masks_permissions() {
        let arena = Arena::new(32);
        let pd = PdRef::new();
        let parent = SpaceHst::<HptFormat, _>::create(&pd, &arena, 4).unwrap();
        let child = SpaceHst::<HptFormat, _>::create(&pd, &arena, 4).unwrap();

        parent
            .table()
            .update(0x1000, 0x5000, 0, RW, Memattr::ram())
            .unwrap();
        delegate(
            &parent,
            child.table(),
            0x1000,
            0x9000,
            0,
            Permissions::R,
            Memattr::ram(),
        )
        .unwrap();

        let hit = child.table().lookup(0x9000).unwrap();
        assert_eq!(hit.phys, 0x5000);
        assert_eq!(hit.perms, Permissions::R);
    }

    #[test]
    fn delegate_of_absent_source_revokes() {
        let arena = Arena::new(32);
        let pd = PdRef::new();
        let parent = SpaceHst::<HptFormat, _>::create(&pd, &arena, 4).unwrap();
        let child = SpaceHst::<HptFormat, _>::create(&pd, &arena, 4).unwrap();

        child
            .table()
            .update(0x9000, 0x5000, 0, RW, Memattr::ram())
            .unwrap();
        delegate(
            &parent,
            child.table(),
            0x1000,
            0x9000,
            0,
            Permissions::API,
            Memattr::ram(),
        )
        .unwrap();
        assert!(child.table().lookup(0x9000).is_none());
    }

    #[test]
    fn misaligned_delegate_rejected() {
        let arena = Arena::new(32);
        let pd = PdRef::new();
        let parent = SpaceHst::<HptFormat, _>::create(&pd, &arena, 4).unwrap();
        let child = SpaceHst::<HptFormat, _>::create(&pd, &arena, 4).unwrap();
        assert_eq!(
            delegate(
                &parent,
                child.table(),
                0x1800,
                0x9000,
                0,
                Permissions::R,
                Memattr::ram(),
            ),
            Err(Status::BadPar)
        );
    }
}
