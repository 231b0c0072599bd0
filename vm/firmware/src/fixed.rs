// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! ACPI fixed hardware: reset, sleep-state transitions, wake handling
//! and the power-management timer.

use crate::platform::EnableHandshake;
use crate::platform::FixedRegisters;
use acpi_spec::AddressSpace;
use acpi_spec::Gas;
use core::sync::atomic::AtomicU16;
use core::sync::atomic::Ordering;

/// 4.8.3: the PM timer runs at 3.579545 MHz and is 24 bits wide.
pub const PM_TIMER_HZ: u64 = 3_579_545;

/// Bound on fixed-hardware status polls.
const WAIT_SPINS: u32 = 1_000_000;

/// Register-level access to generic-address-structure targets. The
/// kernel implements PIO and MMIO access; tests implement fakes.
pub trait GasIo {
    fn read(&self, space: AddressSpace, addr: u64, bits: u8) -> u32;
    fn write(&mut self, space: AddressSpace, addr: u64, bits: u8, value: u32);
}

fn read_gas(io: &impl GasIo, g: &Gas) -> u32 {
    if !g.is_present() {
        return 0;
    }
    io.read(g.address_space(), g.addr.get(), g.bits)
}

fn write_gas(io: &mut impl GasIo, g: &Gas, v: u32) {
    if !g.is_present() {
        return;
    }
    io.write(g.address_space(), g.addr.get(), g.bits, v);
}

/// Writes a GPE register block bytewise: the block length always
/// exceeds what one generic address can encode (the declared bit
/// width is meaningless here), and each register in the block is
/// accessed as a byte.
fn write_gpe(io: &mut impl GasIo, g: &Gas, len: u8, v: u8) {
    if g.addr.get() == 0 {
        return;
    }
    for i in 0..len {
        io.write(g.address_space(), g.addr.get() + i as u64, 8, v as u32);
    }
}

/// A requested sleep transition: the state index plus the two
/// sleep-type field values, 3 bits each.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Transition(pub u16);

impl Transition {
    pub const NONE: Transition = Transition(0);

    pub fn new(state: u16, val_a: u16, val_b: u16) -> Transition {
        Transition((state & 7) | (val_a & 7) << 3 | (val_b & 7) << 6)
    }

    pub fn state(self) -> u16 {
        self.0 & 7
    }

    pub fn val_a(self) -> u16 {
        self.0 >> 3 & 7
    }

    pub fn val_b(self) -> u16 {
        self.0 >> 6 & 7
    }
}

/// The fixed-hardware driver, plus the global transition slot that
/// serializes sleep entry across CPUs.
pub struct FixedHw {
    regs: FixedRegisters,
    enable: EnableHandshake,
    transition: AtomicU16,
}

impl FixedHw {
    pub fn new(regs: FixedRegisters, enable: EnableHandshake) -> FixedHw {
        FixedHw {
            regs,
            enable,
            transition: AtomicU16::new(0),
        }
    }

    fn pm1_cnt(&self, io: &impl GasIo) -> u32 {
        read_gas(io, &self.regs.pm1a_cnt) | read_gas(io, &self.regs.pm1b_cnt)
    }

    fn pm1_sts(&self, io: &impl GasIo) -> u32 {
        read_gas(io, &self.regs.pm1a_sts) | read_gas(io, &self.regs.pm1b_sts)
    }

    pub fn can_reset(&self) -> bool {
        self.regs.rst_reg.is_present()
    }

    pub fn can_sleep(&self) -> bool {
        (self.regs.slp_cnt.is_present() || self.regs.pm1a_cnt.is_present())
            && (self.regs.slp_sts.is_present() || self.regs.pm1a_sts.is_present())
    }

    /// Whether the platform declares the hardware for `t`.
    pub fn supported(&self, t: Transition) -> bool {
        (t.state() == 7 && self.can_reset())
            || ((1u8 << t.state()) & 0b0011_1010 != 0 && self.can_sleep())
    }

    /// Claims the global transition slot. Fails if another CPU already
    /// holds a pending transition.
    pub fn set_transition(&self, t: Transition) -> bool {
        self.transition
            .compare_exchange(0, t.0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn get_transition(&self) -> Transition {
        Transition(self.transition.load(Ordering::Acquire))
    }

    /// Clears wake state and releases the transition slot.
    pub fn clr_transition(&self, io: &mut impl GasIo) {
        self.wake_clr(io);
        self.transition.store(0, Ordering::Release);
    }

    /// Platform reset: one byte to the reset register.
    pub fn reset(&self, io: &mut impl GasIo) {
        write_gas(io, &self.regs.rst_reg, self.regs.rst_val as u32);
    }

    /// Enters the sleep state described by `t`.
    ///
    /// HW-reduced platforms use the sleep-control register; otherwise
    /// the sleep type goes into both PM1 control registers with the
    /// SLP_EN bit.
    pub fn sleep(&self, io: &mut impl GasIo, t: Transition) {
        if self.regs.slp_cnt.is_present() {
            let v = (read_gas(io, &self.regs.slp_cnt) | 1 << 5) & !(0b111 << 2);
            write_gas(io, &self.regs.slp_cnt, v | (t.val_a() as u32) << 2);
        } else {
            let v = (self.pm1_cnt(io) | 1 << 13) & !(0b111 << 10);
            write_gas(io, &self.regs.pm1a_cnt, v | (t.val_a() as u32) << 10);
            write_gas(io, &self.regs.pm1b_cnt, v | (t.val_b() as u32) << 10);
        }
    }

    /// Clears pending wake bits: the WAK status bit, and on legacy
    /// platforms every GPE enable/status register.
    pub fn wake_clr(&self, io: &mut impl GasIo) {
        if self.regs.slp_sts.is_present() {
            write_gas(io, &self.regs.slp_sts, 1 << 7);
        } else {
            write_gas(io, &self.regs.pm1a_ena, 0);
            write_gas(io, &self.regs.pm1b_ena, 0);
            let keep = self.pm1_sts(io) & 0b111 << 8;
            write_gas(io, &self.regs.pm1a_sts, 1 << 15 | keep);
            write_gas(io, &self.regs.pm1b_sts, 1 << 15 | keep);

            write_gpe(io, &self.regs.gpe0_ena, self.regs.gpe0_len, 0);
            write_gpe(io, &self.regs.gpe0_sts, self.regs.gpe0_len, 0xff);
            write_gpe(io, &self.regs.gpe1_ena, self.regs.gpe1_len, 0);
            write_gpe(io, &self.regs.gpe1_sts, self.regs.gpe1_len, 0xff);
        }
    }

    /// Polls the wake status bit. Returns false if it never sets
    /// within the spin bound.
    pub fn wake_chk(&self, io: &impl GasIo) -> bool {
        if self.regs.slp_sts.is_present() {
            polling::until(WAIT_SPINS, || read_gas(io, &self.regs.slp_sts) & 1 << 7 != 0)
        } else {
            polling::until(WAIT_SPINS, || self.pm1_sts(io) & 1 << 15 != 0)
        }
    }

    /// Busy-waits `ms` milliseconds on the 24-bit PM timer. Returns
    /// false if the timer never advances far enough.
    pub fn delay(&self, io: &impl GasIo, ms: u32) -> bool {
        if !self.regs.pm_tmr.is_present() {
            return false;
        }
        let cnt = (PM_TIMER_HZ * ms as u64 / 1000) as u32;
        let start = read_gas(io, &self.regs.pm_tmr);
        polling::until(WAIT_SPINS, || {
            (read_gas(io, &self.regs.pm_tmr).wrapping_sub(start)) % (1 << 24) >= cnt
        })
    }

    fn acpi_enabled(&self, io: &impl GasIo) -> bool {
        self.pm1_cnt(io) & 1 != 0
    }

    /// Hands fixed-hardware control to the OSPM: writes ACPI_ENABLE
    /// to the SMI command port and polls SCI_EN, then the P-state and
    /// C-state control values.
    pub fn enable(&self, io: &mut impl GasIo) -> bool {
        let scp = self.enable.smi_cmd;
        if scp == 0 {
            return true;
        }
        if self.enable.acpi_enable != 0 && !self.acpi_enabled(io) {
            io.write(AddressSpace::PIO, scp as u64, 8, self.enable.acpi_enable as u32);
            if !polling::until(WAIT_SPINS, || self.acpi_enabled(io)) {
                return false;
            }
        }
        if self.enable.pstate_cnt != 0 {
            io.write(AddressSpace::PIO, scp as u64, 8, self.enable.pstate_cnt as u32);
        }
        if self.enable.cstate_cnt != 0 {
            io.write(AddressSpace::PIO, scp as u64, 8, self.enable.cstate_cnt as u32);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeIo {
        regs: HashMap<(u8, u64), u32>,
        timer: std::cell::Cell<u32>,
    }

    impl GasIo for FakeIo {
        fn read(&self, space: AddressSpace, addr: u64, _bits: u8) -> u32 {
            if addr == 0x608 {
                // PM timer advances on every read.
                let v = self.timer.get();
                self.timer.set(v.wrapping_add(10_000));
                return v;
            }
            self.regs.get(&(space.0, addr)).copied().unwrap_or(0)
        }

        fn write(&mut self, space: AddressSpace, addr: u64, _bits: u8, value: u32) {
            self.regs.insert((space.0, addr), value);
        }
    }

    fn pio(addr: u64, bits: u8) -> Gas {
        Gas {
            asid: AddressSpace::PIO.0,
            bits,
            offs: 0,
            accs: 0,
            addr: addr.into(),
        }
    }

    fn legacy_regs() -> FixedRegisters {
        FixedRegisters {
            pm1a_sts: pio(0x1000, 16),
            pm1a_ena: pio(0x1002, 16),
            pm1a_cnt: pio(0x1004, 16),
            pm_tmr: pio(0x608, 32),
            rst_reg: pio(0xcf9, 8),
            rst_val: 6,
            gpe0_sts: pio(0x1020, 8),
            gpe0_ena: pio(0x1024, 8),
            gpe0_len: 4,
            ..Default::default()
        }
    }

    #[test]
    fn transition_packing() {
        let t = Transition::new(5, 5, 0);
        assert_eq!(t.state(), 5);
        assert_eq!(t.val_a(), 5);
        assert_eq!(t.val_b(), 0);
    }

    #[test]
    fn sleep_writes_pm1_control() {
        // S5 with sleep type A=5: PM1a gets SLP_EN | 5 << 10.
        let hw = FixedHw::new(legacy_regs(), EnableHandshake::default());
        let mut io = FakeIo::default();
        io.regs.insert((AddressSpace::PIO.0, 0x1004), 0x1);

        assert!(hw.supported(Transition::new(5, 5, 0)));
        hw.sleep(&mut io, Transition::new(5, 5, 0));
        let v = io.regs[&(AddressSpace::PIO.0, 0x1004)];
        assert_eq!(v, (0x1 | 1 << 13) | 5 << 10);
    }

    #[test]
    fn hw_reduced_sleep() {
        let regs = FixedRegisters {
            slp_cnt: pio(0x2000, 8),
            slp_sts: pio(0x2001, 8),
            ..Default::default()
        };
        let hw = FixedHw::new(regs, EnableHandshake::default());
        let mut io = FakeIo::default();
        hw.sleep(&mut io, Transition::new(3, 2, 0));
        assert_eq!(io.regs[&(AddressSpace::PIO.0, 0x2000)], 1 << 5 | 2 << 2);
    }

    #[test]
    fn reset_single_byte() {
        let hw = FixedHw::new(legacy_regs(), EnableHandshake::default());
        let mut io = FakeIo::default();
        assert!(hw.can_reset());
        hw.reset(&mut io);
        assert_eq!(io.regs[&(AddressSpace::PIO.0, 0xcf9)], 6);
    }

    #[test]
    fn transition_slot_serializes() {
        let hw = FixedHw::new(legacy_regs(), EnableHandshake::default());
        assert!(hw.set_transition(Transition::new(5, 5, 0)));
        // A second CPU loses the race.
        assert!(!hw.set_transition(Transition::new(3, 1, 0)));
        assert_eq!(hw.get_transition().state(), 5);

        let mut io = FakeIo::default();
        hw.clr_transition(&mut io);
        assert_eq!(hw.get_transition(), Transition::NONE);
        assert!(hw.set_transition(Transition::new(3, 1, 0)));
    }

    #[test]
    fn wake_clear_scrubs_gpe_blocks() {
        let hw = FixedHw::new(legacy_regs(), EnableHandshake::default());
        let mut io = FakeIo::default();
        hw.wake_clr(&mut io);
        // Enables cleared, statuses written back with 0xff per byte.
        for i in 0..4 {
            assert_eq!(io.regs[&(AddressSpace::PIO.0, 0x1024 + i)], 0);
            assert_eq!(io.regs[&(AddressSpace::PIO.0, 0x1020 + i)], 0xff);
        }
        assert_eq!(io.regs[&(AddressSpace::PIO.0, 0x1000)] & 1 << 15, 1 << 15);
    }

    #[test]
    fn pm_timer_delay() {
        let hw = FixedHw::new(legacy_regs(), EnableHandshake::default());
        let io = FakeIo::default();
        // The fake timer advances 10000 ticks per read; 1 ms needs
        // ~3580 ticks.
        assert!(hw.delay(&io, 1));
    }

    #[test]
    fn enable_handshake() {
        let hw = FixedHw::new(
            legacy_regs(),
            EnableHandshake {
                smi_cmd: 0xb2,
                acpi_enable: 0xa0,
                pstate_cnt: 0,
                cstate_cnt: 0x85,
            },
        );
        let mut io = FakeIo::default();
        // SCI_EN reads as set once the write lands.
        io.regs.insert((AddressSpace::PIO.0, 0x1004), 1);
        assert!(hw.enable(&mut io));
        assert_eq!(io.regs[&(AddressSpace::PIO.0, 0xb2)], 0x85);
    }
}
