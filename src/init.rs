// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Boot orchestration.
//!
//! Cold boot runs platform discovery once on the boot CPU, builds the
//! subsystems the tables describe, then releases the application
//! processors one at a time. Wake from a sleep state replays the same
//! path but skips construction: only the parked processors are
//! restarted.

use crate::Options;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;
use firmware::discover::Discovery;
use firmware::DiscoveryError;
use firmware::Platform;
use firmware::PhysMemory;

/// Maximum supported processors.
pub const NUM_CPU: usize = 256;

/// The cold-boot/wake distinction: nonzero once firmware has armed a
/// wake vector, directing init down the resume path.
#[derive(Default)]
pub struct ResumeControl {
    vector: AtomicU64,
}

impl ResumeControl {
    pub fn new() -> ResumeControl {
        ResumeControl {
            vector: AtomicU64::new(0),
        }
    }

    /// Arms the resume path with the physical wake vector.
    pub fn arm(&self, vector: u64) {
        self.vector.store(vector, Ordering::Release);
    }

    pub fn disarm(&self) {
        self.vector.store(0, Ordering::Release);
    }

    /// Nonzero while waking from a sleep state.
    pub fn resuming(&self) -> u64 {
        self.vector.load(Ordering::Acquire)
    }
}

/// How discovery located the firmware description.
#[derive(Debug, PartialEq, Eq)]
pub enum FirmwarePath {
    Acpi,
    Devicetree,
}

/// Runs first-phase platform discovery: ACPI when an RSDP is found
/// (firmware handoff, EFI pointer or legacy scan), else the
/// devicetree blob when one was handed over.
///
/// Boot cannot proceed without either description.
pub fn discover(
    mem: &impl PhysMemory,
    rsdp_hint: Option<u64>,
    fdt_blob: Option<&[u8]>,
    options: &Options,
) -> Result<(Platform, FirmwarePath), DiscoveryError> {
    let rsdp = rsdp_hint.or_else(|| Discovery::find_rsdp(mem, None));
    if let Some(rsdp) = rsdp {
        match Discovery::new(mem, rsdp) {
            Ok(mut discovery) => {
                let platform = discovery.parse(mem, NUM_CPU, options.nosmmu)?;
                return Ok((platform, FirmwarePath::Acpi));
            }
            Err(e) => tracing::warn!(error = %e, "ACPI discovery failed"),
        }
    }
    if let Some(blob) = fdt_blob {
        let platform = firmware::devicetree::parse(blob, NUM_CPU)?;
        return Ok((platform, FirmwarePath::Devicetree));
    }
    Err(DiscoveryError::NoRsdp)
}

/// Reserves the interrupt-message window and the local APIC page
/// from the kernel host space: no guest or DMA mapping may ever
/// cover them.
pub fn reserve_interrupt_windows<F, A>(
    space: &capdefs::SpaceHst<'_, F, A>,
    platform: &Platform,
) -> Result<(), capdefs::Status>
where
    F: page_table::PteFormat,
    A: page_table::FrameArena,
{
    use page_table::Memattr;
    use page_table::Permissions;

    space.access_ctrl(
        x86defs::msi::MSI_WINDOW_BASE,
        x86defs::msi::MSI_WINDOW_SIZE,
        Permissions::NONE,
        Memattr::dev(),
    )?;
    if platform.lapic_phys != 0 && platform.lapic_phys != x86defs::msi::MSI_WINDOW_BASE {
        space.access_ctrl(
            platform.lapic_phys & !0xfff,
            0x1000,
            Permissions::NONE,
            Memattr::dev(),
        )?;
    }
    Ok(())
}

/// Feeds every discovered console descriptor to the multiplexer.
pub fn bind_consoles<B: console::UartBackend>(platform: &Platform, console: &console::Console<B>) {
    for device in &platform.consoles {
        console.bind(device.port_type, device.port_subtype, &device.regs);
    }
}

/// Marks the boot CPU online and yields the AP release order: every
/// other CPU in dense-id order.
///
/// Each AP's own `init` runs under the boot lock and ends by
/// releasing it for the next; on x86 the release is triggered by the
/// INIT-SIPI-SIPI broadcast, on ARM by a PSCI `CPU_ON` per processor.
pub fn ap_release_order(platform: &Platform) -> impl Iterator<Item = cpu::CpuId> + '_ {
    let boot = platform.cpus.boot_cpu();
    platform
        .cpus
        .records()
        .map(|(id, _)| id)
        .filter(move |id| *id != boot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpu::CpuRecord;

    #[test]
    fn resume_control() {
        let r = ResumeControl::new();
        assert_eq!(r.resuming(), 0);
        r.arm(0x9000);
        assert_eq!(r.resuming(), 0x9000);
        r.disarm();
        assert_eq!(r.resuming(), 0);
    }

    #[test]
    fn release_order_skips_boot_cpu() {
        let mut p = Platform::new(8);
        for i in 0..3 {
            p.cpus
                .allocate(CpuRecord {
                    firmware_id: i,
                    ..Default::default()
                })
                .unwrap();
        }
        p.cpus.set_boot(cpu::CpuId(1));
        let order: Vec<u16> = ap_release_order(&p).map(|id| id.0).collect();
        assert_eq!(order, [0, 2]);
    }
}
