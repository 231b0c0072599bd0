// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! ARM SMMUv2 driver.
//!
//! A stream is matched by (StreamID, mask) in a stream match group
//! and routed to a context bank configured as VA64 stage-2 over the
//! DMA space's translation table, tagged by the space's stage-2
//! domain id.

use crate::IommuError;
use crate::Sdid;
use mmio::RegisterIo;
use page_table::aarch64::s2_levels;
use parking_lot::Mutex;

mod regs {
    use open_enum::open_enum;

    open_enum! {
        /// Global register space 0, 32-bit.
        pub enum Gr0Reg32: u64 {
            CR0         = 0x000,
            IDR0        = 0x020,
            IDR1        = 0x024,
            IDR2        = 0x028,
            IDR7        = 0x03c,
            GFSR        = 0x048,
            GFSYNR0     = 0x050,
            GFSYNR1     = 0x054,
            TLBIVMID    = 0x064,
            TLBGSYNC    = 0x070,
            TLBGSTATUS  = 0x074,
        }
    }

    open_enum! {
        /// Global register space 0, 64-bit.
        pub enum Gr0Reg64: u64 {
            GFAR = 0x040,
        }
    }

    /// GR0 register arrays, indexed by stream match group.
    pub const SMR: u64 = 0x800;
    pub const S2CR: u64 = 0xc00;

    /// GR1 register arrays, indexed by context bank.
    pub const CBAR: u64 = 0x000;
    pub const CBFRSYNRA: u64 = 0x400;
    pub const CBA2R: u64 = 0x800;

    open_enum! {
        /// Per-context-bank registers, 32-bit.
        pub enum CtxReg32: u64 {
            SCTLR       = 0x000,
            TCR         = 0x030,
            FSR         = 0x058,
            FSYNR0      = 0x068,
            TLBSYNC     = 0x7f0,
            TLBSTATUS   = 0x7f4,
        }
    }

    open_enum! {
        /// Per-context-bank registers, 64-bit.
        pub enum CtxReg64: u64 {
            TTBR0       = 0x020,
            FAR         = 0x060,
            TLBIIPAS2   = 0x630,
        }
    }

    // TCR fields for a 4 KiB-granule stage-2 context.
    pub const TCR_IRGN0_WB_RW: u32 = 1 << 8;
    pub const TCR_ORGN0_WB_RW: u32 = 1 << 10;
    pub const TCR_SH0_INNER: u32 = 3 << 12;
    pub const TCR_TG0_4K: u32 = 0;
}

/// How streams select a context.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// (StreamID, mask) matching through the SMR array.
    StreamMatching,
    /// The stream id indexes the S2CR array directly.
    StreamIndexing,
}

/// One stream-to-context assignment, remembered for resume.
#[derive(Copy, Clone, Debug, Default)]
struct SmgConfig {
    sdid: Option<Sdid>,
    ttbr: u64,
    sid: u16,
    msk: u16,
    ctx: u8,
}

/// Decoded identification state.
#[derive(Copy, Clone, Debug)]
pub struct SmmuInfo {
    pub mode: Mode,
    pub sid_bits: u32,
    pub page_size: u32,
    pub num_smg: u8,
    pub num_ctx: u8,
    /// Input address size nibble.
    pub ias: u8,
    /// Output address size nibble.
    pub oas: u8,
    /// Total MMIO span of the device.
    pub span: u64,
    /// DMA translation-table walks are not cache coherent.
    pub noncoherent: bool,
}

/// One SMMUv2 instance.
pub struct Smmu<A> {
    io: Mutex<A>,
    info: SmmuInfo,
    config: Mutex<Vec<SmgConfig>>,
    inv_lock: Mutex<()>,
}

/// Bound on TLB synchronize polls.
const SYNC_SPINS: u32 = 1_000_000;

impl<A: RegisterIo> Smmu<A> {
    /// Reads the identification registers and decodes capabilities.
    pub fn new(io: A) -> Smmu<A> {
        let idr0 = io.read32(regs::Gr0Reg32::IDR0.0);
        let idr1 = io.read32(regs::Gr0Reg32::IDR1.0);
        let idr2 = io.read32(regs::Gr0Reg32::IDR2.0);
        let idr7 = io.read32(regs::Gr0Reg32::IDR7.0);

        let page_size = if idr1 & 1 << 31 != 0 { 1 << 16 } else { 1 << 12 };
        let pnum = 1u64 << ((idr1 >> 28 & 0b111) + 1);
        let info = SmmuInfo {
            mode: if idr0 & 1 << 27 != 0 {
                Mode::StreamMatching
            } else {
                Mode::StreamIndexing
            },
            sid_bits: if idr0 & 1 << 8 != 0 {
                16
            } else {
                idr0 >> 9 & 0xf
            },
            page_size,
            num_smg: idr0 as u8,
            num_ctx: idr1 as u8,
            ias: (idr2 & 0xf) as u8,
            oas: (idr2 >> 4 & 0xf) as u8,
            span: page_size as u64 * pnum * 2,
            noncoherent: idr0 & 1 << 14 == 0,
        };

        tracing::info!(
            version = idr7 >> 4 & 0xf,
            patch = idr7 & 0xf,
            smg = info.num_smg,
            ctx = info.num_ctx,
            sid_bits = info.sid_bits,
            matching = info.mode == Mode::StreamMatching,
            "SMMU"
        );

        Smmu {
            io: Mutex::new(io),
            config: Mutex::new(vec![SmgConfig::default(); info.num_smg as usize]),
            info,
            inv_lock: Mutex::new(()),
        }
    }

    pub fn info(&self) -> &SmmuInfo {
        &self.info
    }

    /// Offset of a GR1 array register for a context bank.
    fn gr1(&self, array: u64, ctx: u8) -> u64 {
        self.info.page_size as u64 + array + 4 * ctx as u64
    }

    /// Offset of a context-bank register.
    fn ctx(&self, ctx: u8, reg: u64) -> u64 {
        self.info.span / 2 + self.info.page_size as u64 * ctx as u64 + reg
    }

    /// Global initialization: every context bank and unassigned match
    /// group faults, then the SMMU is enabled.
    pub fn init(&self) {
        for ctx in 0..self.info.num_ctx {
            let off = self.gr1(regs::CBAR, ctx);
            self.io.lock().write32(off, 1 << 17); // fault on invalid context
        }
        for smg in 0..self.info.num_smg as usize {
            let assigned = { self.config.lock()[smg].sdid.is_some() };
            if !(assigned && self.program_smg(smg as u8)) {
                self.io
                    .lock()
                    .write32(regs::S2CR + 4 * smg as u64, 1 << 17);
            }
        }
        // Fault reporting, TLB maintenance broadcast, and translation
        // enable.
        self.io.lock().write32(
            regs::Gr0Reg32::CR0.0,
            1 << 21 | 0b11 << 11 | 1 << 10 | 0b11 << 4 | 0b11 << 1,
        );
    }

    /// Binds a DMA space (stage-2 root `ttbr`, domain `sdid`) to the
    /// stream descriptor `(sid, msk, smg, ctx)`.
    pub fn configure(
        &self,
        sdid: Sdid,
        ttbr: u64,
        sid: u16,
        msk: u16,
        smg: u8,
        ctx: u8,
    ) -> Result<(), IommuError> {
        // Under stream indexing the stream id selects the group
        // directly and may carry at most 7 bits.
        let smg = match self.info.mode {
            Mode::StreamIndexing => sid as u8,
            Mode::StreamMatching => smg,
        };
        if (sid | msk) as u32 >= 1 << self.info.sid_bits
            || smg >= self.info.num_smg
            || ctx >= self.info.num_ctx
        {
            return Err(IommuError::BadStream);
        }

        tracing::info!(sid, msk, smg, ctx, sdid = sdid.0, "SMMU: stream assigned");

        let mut config = self.config.lock();
        config[smg as usize] = SmgConfig {
            sdid: Some(sdid),
            ttbr,
            sid,
            msk,
            ctx,
        };
        drop(config);

        if !self.program_smg(smg) {
            return Err(IommuError::BadStream);
        }
        Ok(())
    }

    /// Programs one stream match group from its remembered
    /// configuration: disable, invalidate, configure, re-enable.
    fn program_smg(&self, smg: u8) -> bool {
        let cfg = self.config.lock()[smg as usize];
        let Some(sdid) = cfg.sdid else {
            return false;
        };

        let mut io = self.io.lock();

        // Disable the context bank while it is reprogrammed, then
        // drop stale translations for the domain.
        io.write32(self.ctx(cfg.ctx, regs::CtxReg32::SCTLR.0), 0);
        drop(io);
        self.tlb_invalidate(sdid);
        let mut io = self.io.lock();

        // VA64 stage-2 context tagged with the domain id.
        io.write32(self.gr1(regs::CBA2R, cfg.ctx), 1 << 0);
        io.write32(self.gr1(regs::CBAR, cfg.ctx), sdid.0 as u32 & 0xff);

        // Input size and level count from the implemented address
        // width.
        let isz = page_table::aarch64::s2_input_size(self.info.ias);
        let lev = s2_levels(isz) as u32;
        io.write32(
            self.ctx(cfg.ctx, regs::CtxReg32::TCR.0),
            (self.info.oas as u32) << 16
                | regs::TCR_TG0_4K
                | regs::TCR_SH0_INNER
                | regs::TCR_ORGN0_WB_RW
                | regs::TCR_IRGN0_WB_RW
                | (lev - 2) << 6
                | (64 - isz as u32),
        );
        io.write64(self.ctx(cfg.ctx, regs::CtxReg64::TTBR0.0), cfg.ttbr);
        io.write32(
            self.ctx(cfg.ctx, regs::CtxReg32::SCTLR.0),
            0b11 << 5 | 1 << 0,
        );

        // Disable the match group during reprogramming, then route.
        io.write32(regs::SMR + 4 * smg as u64, 0);
        io.write32(regs::S2CR + 4 * smg as u64, 1 << 27 | cfg.ctx as u32);
        io.write32(
            regs::SMR + 4 * smg as u64,
            1 << 31 | (cfg.msk as u32) << 16 | cfg.sid as u32,
        );
        true
    }

    /// Invalidates every stage-2 TLB entry tagged with `sdid` and
    /// waits for completion.
    pub fn tlb_invalidate(&self, sdid: Sdid) -> bool {
        self.io
            .lock()
            .write32(regs::Gr0Reg32::TLBIVMID.0, sdid.0 as u32);
        self.tlb_sync_global()
    }

    /// Invalidates one intermediate physical address in a context
    /// bank.
    pub fn tlb_invalidate_ipa(&self, ctx: u8, ipa: u64) -> bool {
        self.io
            .lock()
            .write64(self.ctx(ctx, regs::CtxReg64::TLBIIPAS2.0), ipa >> 12);
        self.tlb_sync_ctx(ctx)
    }

    /// Completion barrier for posted global TLB maintenance.
    fn tlb_sync_global(&self) -> bool {
        let _guard = self.inv_lock.lock();
        self.io.lock().write32(regs::Gr0Reg32::TLBGSYNC.0, 0);
        let ok = polling::until(SYNC_SPINS, || {
            self.io.lock().read32(regs::Gr0Reg32::TLBGSTATUS.0) & 1 == 0
        });
        if !ok {
            tracing::warn!("global TLB synchronize timeout");
        }
        ok
    }

    /// Completion barrier for posted TLB maintenance in one context.
    fn tlb_sync_ctx(&self, ctx: u8) -> bool {
        let _guard = self.inv_lock.lock();
        self.io
            .lock()
            .write32(self.ctx(ctx, regs::CtxReg32::TLBSYNC.0), 0);
        polling::until(SYNC_SPINS, || {
            self.io.lock().read32(self.ctx(ctx, regs::CtxReg32::TLBSTATUS.0)) & 1 == 0
        })
    }

    /// Drains and clears global and per-context fault status.
    /// Faulting transactions abort; the system continues.
    pub fn fault(&self) {
        let gfsr = self.io.lock().read32(regs::Gr0Reg32::GFSR.0);
        if gfsr & 0x1ff != 0 {
            let io = self.io.lock();
            let syn = io.read32(regs::Gr0Reg32::GFSYNR0.0);
            tracing::warn!(
                gfsr,
                far = io.read64(regs::Gr0Reg64::GFAR.0),
                kind = if syn & 1 << 3 != 0 { "insn" } else { "data" },
                privileged = syn & 1 << 2 != 0,
                write = syn & 1 << 1 != 0,
                sid = io.read32(regs::Gr0Reg32::GFSYNR1.0) & 0xffff,
                "SMMU: global fault"
            );
            drop(io);
            self.io.lock().write32(regs::Gr0Reg32::GFSR.0, gfsr);
        }

        for ctx in 0..self.info.num_ctx {
            let fsr = self.io.lock().read32(self.ctx(ctx, regs::CtxReg32::FSR.0));
            if fsr & 0x1fe != 0 {
                let io = self.io.lock();
                let syn = io.read32(self.ctx(ctx, regs::CtxReg32::FSYNR0.0));
                tracing::warn!(
                    ctx,
                    fsr,
                    far = io.read64(self.ctx(ctx, regs::CtxReg64::FAR.0)),
                    kind = if syn & 1 << 6 != 0 { "insn" } else { "data" },
                    privileged = syn & 1 << 5 != 0,
                    write = syn & 1 << 4 != 0,
                    level = syn & 0b11,
                    "SMMU: context fault"
                );
                drop(io);
                self.io
                    .lock()
                    .write32(self.ctx(ctx, regs::CtxReg32::FSR.0), fsr);
            }
        }
    }
}
