// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! GICv3 driver: distributor, per-CPU redistributor and CPU
//! interface.
//!
//! The CPU interface is reached either through system registers
//! (GICv3 native) or through the legacy MMIO frame (GICv2
//! compatibility); the per-CPU [`CpuIfMode`] selects which.

use crate::RegisterIo;
use aarch64defs::gic::GiccRegister;
use aarch64defs::gic::GicdCtlr;
use aarch64defs::gic::GicdRegister;
use aarch64defs::gic::GicdTyper;
use aarch64defs::gic::GicrRdRegister;
use aarch64defs::gic::GicrSgiRegister;
use aarch64defs::gic::GicrTyper;
use aarch64defs::gic::GicrWaker;
use aarch64defs::gic::IccSgi1r;
use aarch64defs::gic::INTID_SPI_BASE;

/// Bound on redistributor wake and distributor RWP polls.
const WAKE_SPINS: u32 = 1_000_000;

/// ICC system-register access plus the barriers the architecture
/// requires around them.
pub trait IccRegs {
    fn read_iar1(&mut self) -> u32;
    fn write_eoir1(&mut self, intid: u32);
    fn write_dir(&mut self, intid: u32);
    fn write_sgi1r(&mut self, value: u64);
    fn write_igrpen1(&mut self, enable: bool);
    fn write_pmr(&mut self, priority: u8);
    /// Data synchronization barrier, inner-shareable store domain.
    fn dsb_ishst(&mut self);
    /// Instruction synchronization barrier.
    fn isb(&mut self);
}

/// How the calling CPU reaches its CPU interface.
pub enum CpuIfMode<S, M> {
    /// ICC system registers.
    Regs(S),
    /// Legacy MMIO frame.
    Mmio(M),
}

/// The distributor, shared by all CPUs.
pub struct Gicd<A> {
    io: A,
    /// Number of implemented interrupt lines.
    lines: u32,
}

impl<A: RegisterIo> Gicd<A> {
    pub fn new(io: A) -> Gicd<A> {
        let typer = GicdTyper::from(io.read32(GicdRegister::TYPER.0 as u64));
        let lines = 32 * (typer.it_lines_number() as u32 + 1);
        Gicd { io, lines }
    }

    pub fn lines(&self) -> u32 {
        self.lines.min(1020)
    }

    /// Boot-CPU initialization: disable, route and mask every SPI,
    /// then enable group 1 with affinity routing.
    pub fn init(&mut self) {
        self.io.write32(GicdRegister::CTLR.0 as u64, 0);
        self.wait_rwp();

        for spi in (INTID_SPI_BASE..self.lines()).step_by(32) {
            let n = (spi / 32) as u64;
            self.io
                .write32(GicdRegister::ICENABLER0.0 as u64 + 4 * n, !0);
            self.io
                .write32(GicdRegister::IGROUPR0.0 as u64 + 4 * n, !0);
        }
        for spi in INTID_SPI_BASE..self.lines() {
            self.io
                .write8(GicdRegister::IPRIORITYR0.0 as u64 + spi as u64, 0x80);
        }
        self.wait_rwp();

        self.io.write32(
            GicdRegister::CTLR.0 as u64,
            GicdCtlr::new().with_enable_grp1(true).with_are(true).into(),
        );
    }

    /// Routes an SPI to a CPU by affinity and sets its trigger.
    pub fn config_spi(&mut self, spi: u32, affinity: u32, edge: bool, enable: bool) {
        assert!((INTID_SPI_BASE..self.lines()).contains(&spi));

        // Trigger config: 2 bits per line, bit 1 set for edge.
        let cfg_off = GicdRegister::ICFGR0.0 as u64 + 4 * (spi / 16) as u64;
        let shift = (spi % 16) * 2 + 1;
        let cfg = self.io.read32(cfg_off);
        self.io
            .write32(cfg_off, cfg & !(1 << shift) | (edge as u32) << shift);

        let aff = affinity as u64;
        let route = (aff & 0xff00_0000) << 8 | aff & 0x00ff_ffff;
        self.io
            .write64(GicdRegister::IROUTER0.0 as u64 + 8 * spi as u64, route);

        let n = 4 * (spi / 32) as u64;
        let bit = 1u32 << (spi % 32);
        if enable {
            self.io.write32(GicdRegister::ISENABLER0.0 as u64 + n, bit);
        } else {
            self.io.write32(GicdRegister::ICENABLER0.0 as u64 + n, bit);
        }
    }

    fn wait_rwp(&mut self) {
        let io = &self.io;
        if !polling::until(WAKE_SPINS, || {
            !GicdCtlr::from(io.read32(GicdRegister::CTLR.0 as u64)).rwp()
        }) {
            tracing::warn!("distributor register write pending timeout");
        }
    }
}

/// One CPU's redistributor: the RD frame at offset 0, the SGI frame
/// one 64 KiB page up.
pub struct Gicr<A> {
    io: A,
}

const SGI_FRAME: u64 = 0x10000;

impl<A: RegisterIo> Gicr<A> {
    pub fn new(io: A) -> Gicr<A> {
        Gicr { io }
    }

    /// The redistributor's affinity, for matching against MPIDR.
    pub fn affinity(&self) -> u32 {
        GicrTyper::from(self.io.read64(GicrRdRegister::TYPER.0 as u64)).affinity()
    }

    /// Whether this is the last redistributor in its window.
    pub fn last(&self) -> bool {
        GicrTyper::from(self.io.read64(GicrRdRegister::TYPER.0 as u64)).last()
    }

    /// Wakes the redistributor and configures SGIs and PPIs: SGIs
    /// edge, PPIs masked, all group 1.
    pub fn init(&mut self) -> bool {
        let waker = GicrWaker::from(self.io.read32(GicrRdRegister::WAKER.0 as u64));
        self.io.write32(
            GicrRdRegister::WAKER.0 as u64,
            waker.with_processor_sleep(false).into(),
        );
        let awake = polling::until(WAKE_SPINS, || {
            !GicrWaker::from(self.io.read32(GicrRdRegister::WAKER.0 as u64)).children_asleep()
        });
        if !awake {
            tracing::warn!("redistributor failed to wake");
            return false;
        }

        let sgi = |r: GicrSgiRegister| SGI_FRAME + r.0 as u64;
        self.io.write32(sgi(GicrSgiRegister::IGROUPR0), !0);
        // SGIs enabled, PPIs masked until claimed.
        self.io.write32(sgi(GicrSgiRegister::ICENABLER0), 0xffff0000);
        self.io.write32(sgi(GicrSgiRegister::ISENABLER0), 0x0000ffff);
        for i in 0..32 {
            self.io
                .write8(sgi(GicrSgiRegister::IPRIORITYR0) + i, 0x80);
        }
        true
    }

    /// Unmasks and configures a PPI for the local CPU.
    pub fn config_ppi(&mut self, ppi: u32, edge: bool, enable: bool) {
        assert!(ppi < 16);
        let intid = 16 + ppi;
        let sgi = |r: GicrSgiRegister| SGI_FRAME + r.0 as u64;

        let shift = (intid % 16) * 2 + 1;
        let cfg = self.io.read32(sgi(GicrSgiRegister::ICFGR1));
        self.io.write32(
            sgi(GicrSgiRegister::ICFGR1),
            cfg & !(1 << shift) | (edge as u32) << shift,
        );
        let bit = 1u32 << intid;
        if enable {
            self.io.write32(sgi(GicrSgiRegister::ISENABLER0), bit);
        } else {
            self.io.write32(sgi(GicrSgiRegister::ICENABLER0), bit);
        }
    }
}

/// The CPU interface, in either access mode.
pub struct Gicc<S, M> {
    mode: CpuIfMode<S, M>,
}

impl<S: IccRegs, M: RegisterIo> Gicc<S, M> {
    pub fn new(mode: CpuIfMode<S, M>) -> Gicc<S, M> {
        Gicc { mode }
    }

    /// Per-CPU enable: unmask priorities and enable group 1.
    pub fn init(&mut self) {
        match &mut self.mode {
            CpuIfMode::Regs(icc) => {
                icc.write_pmr(0xff);
                icc.write_igrpen1(true);
                icc.isb();
            }
            CpuIfMode::Mmio(io) => {
                io.write32(GiccRegister::PMR.0 as u64, 0xff);
                io.write32(GiccRegister::CTLR.0 as u64, 1);
            }
        }
    }

    /// Acknowledges the highest pending interrupt, returning its id.
    pub fn ack(&mut self) -> u32 {
        match &mut self.mode {
            // IAR reads are self-synchronizing with interrupts masked.
            CpuIfMode::Regs(icc) => icc.read_iar1(),
            CpuIfMode::Mmio(io) => io.read32(GiccRegister::IAR.0 as u64),
        }
    }

    /// Signals completion. The system-register write needs an ISB to
    /// guarantee it executed.
    pub fn eoi(&mut self, intid: u32) {
        match &mut self.mode {
            CpuIfMode::Regs(icc) => {
                icc.write_eoir1(intid);
                icc.isb();
            }
            CpuIfMode::Mmio(io) => io.write32(GiccRegister::EOIR.0 as u64, intid),
        }
    }

    /// Deactivates an interrupt previously acknowledged.
    pub fn dir(&mut self, intid: u32) {
        match &mut self.mode {
            CpuIfMode::Regs(icc) => {
                icc.write_dir(intid);
                icc.isb();
            }
            CpuIfMode::Mmio(io) => io.write32(GiccRegister::DIR.0 as u64, intid),
        }
    }

    /// Sends an SGI to the CPU with the given packed affinity.
    ///
    /// Earlier stores must be observable in the inner-shareable
    /// domain before the SGI is sent, and the system-register write
    /// must have completed before returning.
    pub fn send_cpu(&mut self, sgi: u32, affinity: u32) {
        let value = IccSgi1r::new()
            .with_target_list(1 << (affinity & 0xf))
            .with_aff1((affinity >> 8) as u8)
            .with_aff2((affinity >> 16) as u8)
            .with_aff3((affinity >> 24) as u8)
            .with_intid(sgi);
        self.send(value);
    }

    /// Broadcasts an SGI to every CPU but the caller.
    pub fn send_exc(&mut self, sgi: u32) {
        self.send(IccSgi1r::new().with_intid(sgi).with_irm(true));
    }

    fn send(&mut self, value: IccSgi1r) {
        match &mut self.mode {
            CpuIfMode::Regs(icc) => {
                icc.dsb_ishst();
                icc.write_sgi1r(value.into());
                icc.isb();
            }
            CpuIfMode::Mmio(_) => {
                // Without the system-register interface, SGIs go
                // through the distributor's legacy SGIR, which the
                // v3-only driver does not carry.
                tracing::warn!("SGI requested in MMIO CPU-interface mode");
            }
        }
    }
}
