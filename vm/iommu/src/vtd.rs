// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Intel VT-d DMA-remapping driver.
//!
//! A root/context entry table routes each PCI source id to the owning
//! domain's stage-2 translation root. Invalidations go through the
//! queued-invalidation interface when implemented, else through the
//! register interface; either way completion is polled under the
//! per-unit lock before a device may observe the new translation.

use crate::IommuError;
use crate::Sdid;
use core::sync::atomic::Ordering;
use mmio::RegisterIo;
use page_table::FrameArena;
use parking_lot::Mutex;

mod regs {
    use open_enum::open_enum;

    open_enum! {
        pub enum Reg32: u64 {
            VER    = 0x000,
            GCMD   = 0x018,
            GSTS   = 0x01c,
            FSTS   = 0x034,
            FECTL  = 0x038,
            PMEN   = 0x064,
        }
    }

    open_enum! {
        pub enum Reg64: u64 {
            CAP    = 0x008,
            ECAP   = 0x010,
            RTADDR = 0x020,
            CCMD   = 0x028,
            IQH    = 0x080,
            IQT    = 0x088,
            IQA    = 0x090,
            IRTA   = 0x0b8,
        }
    }

    /// IOTLB register pair, at the extended-capability offset.
    pub const TLB_IVA: u64 = 0x000;
    pub const TLB_IOTLB: u64 = 0x008;

    // Global command / status bits. Only one command bit may change
    // per write; one-shot bits read back as zero.
    pub const CMD_CFI: u32 = 1 << 23;
    pub const CMD_IRTP: u32 = 1 << 24;
    pub const CMD_IRE: u32 = 1 << 25;
    pub const CMD_QIE: u32 = 1 << 26;
    pub const CMD_WBF: u32 = 1 << 27;
    pub const CMD_FL: u32 = 1 << 29;
    pub const CMD_RTP: u32 = 1 << 30;
    pub const CMD_TE: u32 = 1 << 31;
    pub const CMD_ONE_SHOT: u32 = CMD_RTP | CMD_FL | CMD_WBF | CMD_IRTP;

    // Fault status bits.
    pub const FSTS_PPF: u32 = 1 << 1;

    // Capability bits.
    pub const CAP_ESRTPS: u64 = 1 << 63;
    // Extended capability bits.
    pub const ECAP_QI: u64 = 1 << 1;
    pub const ECAP_IR: u64 = 1 << 3;
}

/// Invalidation granularities, context-cache and IOTLB.
const GRAN_GLOBAL: u64 = 1;
const GRAN_DOMAIN: u64 = 2;
const GRAN_DEVICE: u64 = 3;

/// Bound on command and invalidation handshakes.
const CMD_SPINS: u32 = 1_000_000;

/// Number of 16-byte descriptors in the one-page invalidation queue.
const IQ_COUNT: u64 = 256;

/// One Intel DMA-remapping unit.
///
/// The root table, context tables, invalidation queue and interrupt
/// remapping table are page-sized structures drawn from the frame
/// arena; an entry is a (lo, hi) pair of adjacent 64-bit slots.
pub struct Vtd<'a, A, F> {
    io: Mutex<A>,
    arena: &'a F,
    cap: u64,
    ecap: u64,
    root: u64,
    irt: u64,
    invq: u64,
    invq_idx: Mutex<u64>,
    inv_lock: Mutex<()>,
}

impl<'a, A: RegisterIo, F: FrameArena> Vtd<'a, A, F> {
    pub fn new(io: A, arena: &'a F) -> Result<Vtd<'a, A, F>, IommuError> {
        let cap = io.read64(regs::Reg64::CAP.0);
        let ecap = io.read64(regs::Reg64::ECAP.0);
        let root = arena.allocate_node().ok_or(IommuError::BadStream)?;
        let irt = arena.allocate_node().ok_or(IommuError::BadStream)?;
        let invq = arena.allocate_node().ok_or(IommuError::BadStream)?;

        tracing::info!(
            version = io.read32(regs::Reg32::VER.0),
            qi = ecap & regs::ECAP_QI != 0,
            ir = ecap & regs::ECAP_IR != 0,
            "VT-d"
        );

        Ok(Vtd {
            io: Mutex::new(io),
            arena,
            cap,
            ecap,
            root,
            irt,
            invq,
            invq_idx: Mutex::new(0),
            inv_lock: Mutex::new(()),
        })
    }

    fn has_qi(&self) -> bool {
        self.ecap & regs::ECAP_QI != 0
    }

    pub fn has_ir(&self) -> bool {
        self.ecap & regs::ECAP_IR != 0
    }

    /// Fault-recording register file offset.
    fn fro(&self) -> u64 {
        self.cap >> 20 & 0x3ff0
    }

    /// IOTLB register file offset.
    fn iro(&self) -> u64 {
        self.ecap >> 4 & 0x3ff0
    }

    /// Issues one global-command bit and polls its status.
    fn command(&self, cmd: u32) -> Result<(), IommuError> {
        let mut io = self.io.lock();
        let v = io.read32(regs::Reg32::GSTS.0) & !regs::CMD_ONE_SHOT;
        io.write32(regs::Reg32::GCMD.0, v | cmd);
        if polling::until(CMD_SPINS, || io.read32(regs::Reg32::GSTS.0) & cmd != 0) {
            Ok(())
        } else {
            Err(IommuError::Timeout)
        }
    }

    /// Writes a 128-bit entry into an arena-backed table.
    fn set_entry(&self, table: u64, index: u64, lo: u64, hi: u64) -> Option<()> {
        let node = self.arena.node(table)?;
        // Publish the high half first; presence lives in the low one.
        node.entry(2 * index as usize + 1).store(hi, Ordering::Release);
        node.entry(2 * index as usize).store(lo, Ordering::Release);
        Some(())
    }

    fn entry_lo(&self, table: u64, index: u64) -> Option<u64> {
        Some(self.arena.node(table)?.entry(2 * index as usize).load(Ordering::Acquire))
    }

    /// Routes a PCI source id to a DMA space: its context entry gets
    /// the space's stage-2 root and domain id, then the old context
    /// and IOTLB entries are invalidated.
    pub fn configure(&self, sdid: Sdid, slptptr: u64, source_id: u16) -> Result<(), IommuError> {
        let bus = (source_id >> 8) as u64;
        let devfn = (source_id & 0xff) as u64;

        // The per-bus context table hangs off the root entry,
        // allocated on first use.
        let ctx_table = match self.entry_lo(self.root, bus) {
            Some(lo) if lo & 1 != 0 => lo & !0xfff,
            Some(_) => {
                let table = self.arena.allocate_node().ok_or(IommuError::BadStream)?;
                self.set_entry(self.root, bus, table | 1, 0)
                    .ok_or(IommuError::BadStream)?;
                table
            }
            None => return Err(IommuError::BadStream),
        };

        // Context entry: present, untranslated requests walk the
        // second-level table; address width 48-bit (4 levels).
        self.set_entry(ctx_table, devfn, slptptr | 1, (sdid.0 as u64) << 8 | 2)
            .ok_or(IommuError::BadStream)?;

        tracing::info!(source_id, sdid = sdid.0, "VT-d: device assigned");

        self.invalidate_ctx_device(source_id, sdid)?;
        Ok(())
    }

    /// Sets the root table pointer and enables translation.
    pub fn enable(&self) -> Result<(), IommuError> {
        self.io.lock().write64(regs::Reg64::RTADDR.0, self.root);
        self.command(regs::CMD_RTP)?;
        if self.cap & regs::CAP_ESRTPS == 0 {
            self.invalidate_ctx_global()?;
        }
        if self.has_qi() {
            self.io.lock().write64(regs::Reg64::IQA.0, self.invq);
            self.command(regs::CMD_QIE)?;
        }
        self.command(regs::CMD_TE)
    }

    /// Programs an interrupt-remapping table entry and flushes the
    /// interrupt entry cache.
    pub fn set_irte(
        &self,
        index: u16,
        source_id: u16,
        destination: u32,
        vector: u8,
        level: bool,
        x2apic: bool,
    ) -> Result<(), IommuError> {
        if !self.has_ir() {
            return Ok(());
        }
        let dst_shift = if x2apic { 32 } else { 40 };
        self.set_entry(
            self.irt,
            index as u64,
            (destination as u64) << dst_shift | (vector as u64) << 16 | (level as u64) << 4 | 1,
            1 << 18 | source_id as u64,
        )
        .ok_or(IommuError::BadStream)?;
        self.qi_submit(&[4 | GRAN_DOMAIN << 4 | (index as u64) << 32, 0])
    }

    /// Enables interrupt remapping through the table.
    pub fn enable_ir(&self, x2apic: bool) -> Result<(), IommuError> {
        if !self.has_ir() {
            return Ok(());
        }
        self.io.lock().write64(
            regs::Reg64::IRTA.0,
            self.irt | (x2apic as u64) << 11 | 7,
        );
        self.command(regs::CMD_IRTP)?;
        self.command(regs::CMD_IRE)
    }

    /// Domain-selective IOTLB invalidation.
    pub fn invalidate_tlb(&self, sdid: Sdid) -> Result<(), IommuError> {
        if self.has_qi() {
            return self.qi_submit(&[2 | GRAN_DOMAIN << 4 | (sdid.0 as u64) << 16, 0]);
        }
        self.ri_inv_tlb(GRAN_DOMAIN, sdid.0)
    }

    fn invalidate_ctx_global(&self) -> Result<(), IommuError> {
        if self.has_qi() {
            return self.qi_submit(&[1 | GRAN_GLOBAL << 4, 0, 2 | GRAN_GLOBAL << 4, 0]);
        }
        let _guard = self.inv_lock.lock();
        self.io.lock().write64(
            regs::Reg64::CCMD.0,
            1 << 63 | GRAN_GLOBAL << 61,
        );
        self.ri_wait_ccmd()?;
        drop(_guard);
        self.ri_inv_tlb(GRAN_GLOBAL, 0)
    }

    fn invalidate_ctx_device(&self, source_id: u16, sdid: Sdid) -> Result<(), IommuError> {
        if self.has_qi() {
            return self.qi_submit(&[
                1 | GRAN_DEVICE << 4 | (sdid.0 as u64) << 16 | (source_id as u64) << 32,
                0,
                2 | GRAN_DOMAIN << 4 | (sdid.0 as u64) << 16,
                0,
            ]);
        }
        let _guard = self.inv_lock.lock();
        self.io.lock().write64(
            regs::Reg64::CCMD.0,
            1 << 63 | GRAN_DEVICE << 61 | (source_id as u64) << 16 | sdid.0 as u64,
        );
        self.ri_wait_ccmd()?;
        drop(_guard);
        self.ri_inv_tlb(GRAN_DOMAIN, sdid.0)
    }

    /// Register-interface IOTLB invalidation with completion poll.
    fn ri_inv_tlb(&self, gran: u64, did: u16) -> Result<(), IommuError> {
        let _guard = self.inv_lock.lock();
        let off = self.iro() + regs::TLB_IOTLB;
        self.io
            .lock()
            .write64(off, 1 << 63 | gran << 60 | (did as u64) << 32);
        if polling::until(CMD_SPINS, || self.io.lock().read64(off) & 1 << 63 == 0) {
            Ok(())
        } else {
            Err(IommuError::Timeout)
        }
    }

    fn ri_wait_ccmd(&self) -> Result<(), IommuError> {
        if polling::until(CMD_SPINS, || {
            self.io.lock().read64(regs::Reg64::CCMD.0) & 1 << 63 == 0
        }) {
            Ok(())
        } else {
            Err(IommuError::Timeout)
        }
    }

    /// Posts descriptors to the invalidation queue and waits for the
    /// hardware to drain it.
    fn qi_submit(&self, descriptors: &[u64]) -> Result<(), IommuError> {
        let _guard = self.inv_lock.lock();
        let mut idx = self.invq_idx.lock();
        let node = self.arena.node(self.invq).ok_or(IommuError::BadStream)?;
        for pair in descriptors.chunks_exact(2) {
            node.entry((2 * *idx) as usize).store(pair[0], Ordering::Release);
            node.entry((2 * *idx) as usize + 1).store(pair[1], Ordering::Release);
            *idx = (*idx + 1) % IQ_COUNT;
        }
        let tail = *idx << 4;
        self.io.lock().write64(regs::Reg64::IQT.0, tail);
        if polling::until(CMD_SPINS, || {
            self.io.lock().read64(regs::Reg64::IQH.0) == tail
        }) {
            Ok(())
        } else {
            Err(IommuError::Timeout)
        }
    }

    /// Drains the primary fault log: decode, report, clear. The
    /// offending devices see aborted transactions; the system
    /// continues.
    pub fn fault(&self) {
        let fsts = self.io.lock().read32(regs::Reg32::FSTS.0);
        if fsts & regs::FSTS_PPF != 0 {
            let nfr = (self.cap >> 40 & 0xff) + 1;
            for frr in 0..nfr {
                let base = self.fro() + frr * 16;
                let mut io = self.io.lock();
                let hi = io.read64(base + 8);
                if hi & 1 << 63 == 0 {
                    continue;
                }
                let lo = io.read64(base);
                tracing::warn!(
                    frr,
                    addr = lo,
                    source_id = hi & 0xffff,
                    reason = hi >> 32 & 0xff,
                    write = hi & 1 << 38 == 0,
                    "VT-d: fault"
                );
                io.write64(base + 8, 1 << 63);
            }
        }
        self.io.lock().write32(regs::Reg32::FSTS.0, fsts);
    }
}
