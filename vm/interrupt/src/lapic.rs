// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Local APIC / x2APIC driver.
//!
//! One driver serves both interfaces: the [`ApicAccess`]
//! implementation is chosen by the extended-mode bit in the APIC base
//! MSR (MMIO register file, or MSR-based in x2APIC mode).

use crate::VEC_IPI;
use crate::VEC_LVT;
use x86defs::apic::ApicRegister;
use x86defs::apic::DeliveryMode;
use x86defs::apic::ApicVersion;
use x86defs::apic::Icr;
use x86defs::apic::Lvt;
use x86defs::apic::TimerMode;

/// Register access to the local APIC, MMIO- or MSR-backed.
pub trait ApicAccess {
    fn read(&self, reg: ApicRegister) -> u32;
    fn write(&mut self, reg: ApicRegister, value: u32);

    /// Writes the interrupt command register. In xAPIC mode this is
    /// two 32-bit halves, high half first; in x2APIC mode one MSR
    /// write.
    fn write_icr(&mut self, value: u64) {
        self.write(ApicRegister::ICR1, (value >> 32) as u32);
        self.write(ApicRegister::ICR0, value as u32);
    }

    /// Whether this CPU runs the APIC in x2APIC mode.
    fn x2apic(&self) -> bool;
}

/// Calibration and identification results from [`init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapicInit {
    /// This CPU's APIC id.
    pub apic_id: u32,
    /// Bus-to-TSC divider for the timer; zero in TSC-deadline mode.
    pub ratio: u32,
    /// Timer frequency in Hz.
    pub freq_hz: u64,
    /// Whether this CPU is the bootstrap processor.
    pub bsp: bool,
}

/// Clock inputs for timer calibration.
pub struct TimerCalibration<'a> {
    /// Enumerated crystal clock in Hz, zero if unknown.
    pub clk: u32,
    /// Enumerated TSC ratio, zero if unknown.
    pub rat: u32,
    /// TSC-deadline mode is available and not filtered out.
    pub tsc_deadline: bool,
    /// Reads the TSC.
    pub now: &'a mut dyn FnMut() -> u64,
    /// Busy-waits the given number of milliseconds (the ACPI PM
    /// timer during bring-up).
    pub delay_ms: &'a mut dyn FnMut(u32),
}

/// Brings up the local interrupt controller on the calling CPU and,
/// on the BSP, calibrates the timer.
///
/// The caller has already hardware-enabled the APIC via the base MSR
/// and reserved the MSI window and APIC page from DMA.
pub fn init(access: &mut impl ApicAccess, bsp: bool, cal: TimerCalibration<'_>) -> LapicInit {
    let apic_id = if access.x2apic() {
        access.read(ApicRegister::ID)
    } else {
        access.read(ApicRegister::ID) >> 24
    };

    // Software enable.
    let svr = access.read(ApicRegister::SVR);
    access.write(ApicRegister::SVR, svr | 1 << 8);

    let version = ApicVersion::from(access.read(ApicRegister::VERSION));
    let dl = cal.tsc_deadline;

    // Populate the local vector table top-down, as far as this part's
    // LVT count reaches.
    let lvt = |vector: u8, mode: DeliveryMode, masked: bool, timer: bool| {
        Lvt::new()
            .with_vector(vector)
            .with_delivery_mode(mode.0)
            .with_masked(masked)
            .with_timer_mode(if timer && dl { TimerMode::TSC_DEADLINE.0 } else { 0 })
    };
    if version.max_lvt_entry() >= 6 {
        access.write(
            ApicRegister::LVT_CMCI,
            lvt(VEC_LVT + 4, DeliveryMode::FIXED, false, false).into(),
        );
    }
    if version.max_lvt_entry() >= 5 {
        access.write(
            ApicRegister::LVT_THERMAL,
            lvt(VEC_LVT + 3, DeliveryMode::FIXED, false, false).into(),
        );
    }
    if version.max_lvt_entry() >= 4 {
        access.write(
            ApicRegister::LVT_PMC,
            lvt(VEC_LVT + 2, DeliveryMode::FIXED, false, false).into(),
        );
    }
    access.write(
        ApicRegister::LVT_ERROR,
        lvt(VEC_LVT + 1, DeliveryMode::FIXED, false, false).into(),
    );
    access.write(
        ApicRegister::LVT_LINT1,
        lvt(0, DeliveryMode::NMI, false, false).into(),
    );
    access.write(
        ApicRegister::LVT_LINT0,
        lvt(0, DeliveryMode::EXTINT, true, false).into(),
    );
    access.write(
        ApicRegister::LVT_TIMER,
        lvt(VEC_LVT, DeliveryMode::FIXED, false, true).into(),
    );

    access.write(ApicRegister::TPR, 0x10);
    access.write(ApicRegister::TIMER_DCR, 0xb);

    let mut ratio = 0;
    let mut freq_hz = 0;
    if bsp {
        // Calibrate the timer against the PM timer unless both
        // crystal clock and ratio were enumerated.
        access.write(ApicRegister::TIMER_ICR, !0u32);

        let c1 = access.read(ApicRegister::TIMER_CCR);
        let t1 = (cal.now)();
        (cal.delay_ms)(10);
        let c2 = access.read(ApicRegister::TIMER_CCR);
        let t2 = (cal.now)();

        let c = (c1 - c2) as u64;
        let t = t2 - t1;
        let f = cal.clk as u64 * cal.rat as u64;

        ratio = if dl {
            0
        } else if f != 0 {
            cal.rat
        } else {
            ((t + c / 2) / c.max(1)) as u32
        };
        freq_hz = if f != 0 { f } else { t * 100 };

        tracing::info!(
            freq_hz,
            ratio,
            enumerated = f != 0,
            "timer calibrated"
        );
    }
    access.write(ApicRegister::TIMER_ICR, 0);

    tracing::info!(
        apic_id,
        version = version.version(),
        lvt = version.max_lvt_entry(),
        x2apic = access.x2apic(),
        "APIC"
    );

    LapicInit {
        apic_id,
        ratio,
        freq_hz,
        bsp,
    }
}

/// Sends a fixed-vector IPI to one CPU by APIC id.
pub fn send_cpu(access: &mut impl ApicAccess, vector: u8, apic_id: u32) {
    let icr = Icr::new()
        .with_vector(vector)
        .with_delivery_mode(DeliveryMode::FIXED.0)
        .with_level_assert(true);
    let icr = if access.x2apic() {
        icr.with_x2apic_mda(apic_id)
    } else {
        icr.with_xapic_mda(apic_id as u8)
    };
    access.write_icr(icr.into());
}

/// Broadcasts to all CPUs but the caller with the given delivery
/// mode: INIT and SIPI for AP start, fixed for shootdowns.
pub fn send_exc(access: &mut impl ApicAccess, vector: u8, mode: DeliveryMode) {
    access.write_icr(
        Icr::new()
            .with_vector(vector)
            .with_delivery_mode(mode.0)
            .with_level_assert(true)
            .with_destination_shorthand(3)
            .into(),
    );
}

/// The INIT-SIPI-SIPI sequence releasing the application processors
/// into the trampoline page at `sipi_page`.
pub fn start_aps(
    access: &mut impl ApicAccess,
    sipi_page: u8,
    delay_ms: &mut dyn FnMut(u32),
) {
    send_exc(access, 0, DeliveryMode::INIT);
    (delay_ms)(10);
    send_exc(access, sipi_page, DeliveryMode::SIPI);
    (delay_ms)(1);
    send_exc(access, sipi_page, DeliveryMode::SIPI);
}

/// Acknowledges the highest-priority in-service interrupt.
pub fn eoi(access: &mut impl ApicAccess) {
    access.write(ApicRegister::EOI, 0);
}

/// IPI broadcast shorthand used by the TLB shootdown path.
pub fn send_shootdown(access: &mut impl ApicAccess) {
    send_exc(access, VEC_IPI, DeliveryMode::FIXED);
}
