// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The discovered-platform model filled in by table parsing.

use acpi_spec::Gas;
use cpu::CpuRegistry;
use memory_range::MemoryRange;

/// An I/O interrupt controller (x86).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IoapicRecord {
    pub phys: u64,
    /// Firmware enumeration id, matched by IOMMU scopes.
    pub id: u8,
    pub gsi_base: u32,
}

/// The GIC complex (ARM). At most one distributor; the CPU-interface
/// base is shared by every CPU.
#[derive(Clone, Debug, Default)]
pub struct GicRecord {
    pub gicd: u64,
    pub gicc: u64,
    pub gich: u64,
    pub gits: u64,
    /// Redistributor windows: base and byte length.
    pub gicr_windows: Vec<(u64, u32)>,
}

/// One ECAM window.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PciSegment {
    pub phys_base: u64,
    pub group: u16,
    pub start_bus: u8,
    pub end_bus: u8,
}

impl PciSegment {
    /// Bytes of configuration space this window decodes.
    pub fn size(&self) -> u64 {
        (self.end_bus as u64 - self.start_bus as u64 + 1) * 256 * 4096
    }
}

/// What an IOMMU scope entry points at.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    /// A single PCI endpoint.
    Endpoint,
    /// A whole PCI sub-hierarchy below the named bridge.
    SubHierarchy,
    /// An I/O APIC, matched by enumeration id.
    Ioapic,
    /// An HPET block, matched by enumeration id.
    Hpet,
}

/// One device scope of an IOMMU or reserved-memory record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceScope {
    pub kind: ScopeKind,
    pub enum_id: u8,
    /// PCI segment:bus:device.function.
    pub segment: u16,
    pub bus: u8,
    pub dev: u8,
    pub fun: u8,
}

impl DeviceScope {
    /// The 16-bit PCI source id (bus:dev.fn).
    pub fn source_id(&self) -> u16 {
        (self.bus as u16) << 8 | (self.dev as u16) << 3 | self.fun as u16
    }
}

/// A DMA-remapping unit.
#[derive(Clone, Debug)]
pub struct IommuRecord {
    pub phys: u64,
    pub segment: u16,
    /// Claims every device on the segment not claimed elsewhere.
    pub include_all: bool,
    pub scopes: Vec<DeviceScope>,
}

/// A reserved memory region that must receive identity read+write DMA
/// mappings for its scoped devices.
#[derive(Clone, Debug)]
pub struct RmrrRecord {
    pub range: MemoryRange,
    pub segment: u16,
    pub scopes: Vec<DeviceScope>,
}

/// A NUMA memory-affinity range.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NumaRange {
    pub range: MemoryRange,
    pub domain: u32,
}

/// A console device descriptor to hand to the console multiplexer.
#[derive(Copy, Clone, Debug)]
pub struct ConsoleDevice {
    pub port_type: u16,
    pub port_subtype: u16,
    pub regs: Gas,
}

/// Generic-timer interrupts (ARM).
#[derive(Copy, Clone, Debug, Default)]
pub struct TimerRecord {
    /// EL2 physical timer PPI.
    pub el2_p_ppi: u32,
    /// EL1 virtual timer PPI.
    pub el1_v_ppi: u32,
    /// Level-triggered (edge when false).
    pub lvl_el2_p: bool,
    pub lvl_el1_v: bool,
}

/// A native low-power idle state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IdleState {
    pub id: u16,
    pub min_residency_us: u32,
    pub max_latency_us: u32,
}

/// FACS wake-vector state.
#[derive(Copy, Clone, Debug, Default)]
pub struct WakeVectors {
    pub hardware_signature: u32,
    pub wake32: u32,
    pub wake64: u64,
}

/// The fixed-hardware register file assembled from the FADT; absent
/// registers have a zero bit width.
#[derive(Copy, Clone, Debug, Default)]
pub struct FixedRegisters {
    pub pm1a_sts: Gas,
    pub pm1a_ena: Gas,
    pub pm1b_sts: Gas,
    pub pm1b_ena: Gas,
    pub pm1a_cnt: Gas,
    pub pm1b_cnt: Gas,
    pub pm2_cnt: Gas,
    pub pm_tmr: Gas,
    pub gpe0_sts: Gas,
    pub gpe0_ena: Gas,
    pub gpe1_sts: Gas,
    pub gpe1_ena: Gas,
    pub gpe0_len: u8,
    pub gpe1_len: u8,
    pub rst_reg: Gas,
    pub rst_val: u8,
    pub slp_cnt: Gas,
    pub slp_sts: Gas,
}

/// The ACPI-mode enable handshake values from the FADT.
#[derive(Copy, Clone, Debug, Default)]
pub struct EnableHandshake {
    pub smi_cmd: u32,
    pub acpi_enable: u8,
    pub pstate_cnt: u8,
    pub cstate_cnt: u8,
}

/// Everything discovery learns about the machine.
pub struct Platform {
    pub cpus: CpuRegistry,
    /// Physical LAPIC base from the MADT.
    pub lapic_phys: u64,
    /// A legacy 8259 PIC exists and must be masked.
    pub has_pic: bool,
    /// Firmware opted out of x2APIC (DMAR flag).
    pub x2apic_opt_out: bool,
    pub ioapics: Vec<IoapicRecord>,
    pub gic: GicRecord,
    pub pci_segments: Vec<PciSegment>,
    pub iommus: Vec<IommuRecord>,
    pub rmrrs: Vec<RmrrRecord>,
    pub numa: Vec<NumaRange>,
    /// Plain RAM ranges (devicetree path; ACPI platforms learn memory
    /// from the boot loader instead).
    pub memory: Vec<MemoryRange>,
    pub consoles: Vec<ConsoleDevice>,
    pub timer: TimerRecord,
    pub idle_states: Vec<IdleState>,
    pub wake: WakeVectors,
    pub fixed: FixedRegisters,
    pub enable: EnableHandshake,
    /// ACPI feature flags from the FADT.
    pub fflg: u32,
    pub sci_irq: u16,
    /// PSCI is implemented (ARM boot flags).
    pub psci: bool,
    /// PSCI calls use HVC rather than SMC.
    pub psci_hvc: bool,
    /// HPET enumeration ids and bases, for IOMMU scope matching.
    pub hpets: Vec<(u8, u64)>,
    /// TPM2 control area, recorded for the attestation layer.
    pub tpm2_control: u64,
}

impl Platform {
    pub fn new(max_cpus: usize) -> Platform {
        Platform {
            cpus: CpuRegistry::new(max_cpus),
            lapic_phys: 0,
            has_pic: false,
            x2apic_opt_out: false,
            ioapics: Vec::new(),
            gic: GicRecord::default(),
            pci_segments: Vec::new(),
            iommus: Vec::new(),
            rmrrs: Vec::new(),
            numa: Vec::new(),
            memory: Vec::new(),
            consoles: Vec::new(),
            timer: TimerRecord::default(),
            idle_states: Vec::new(),
            wake: WakeVectors::default(),
            fixed: FixedRegisters::default(),
            enable: EnableHandshake::default(),
            fflg: 0,
            sci_irq: 0,
            psci: false,
            psci_hvc: false,
            hpets: Vec::new(),
            tpm2_control: 0,
        }
    }

    /// Adds an ECAM window, refusing overlap within a segment group.
    pub fn add_pci_segment(&mut self, seg: PciSegment) {
        let overlaps = self.pci_segments.iter().any(|s| {
            s.group == seg.group && s.start_bus <= seg.end_bus && seg.start_bus <= s.end_bus
        });
        if overlaps {
            tracing::warn!(group = seg.group, "overlapping ECAM window ignored");
            return;
        }
        self.pci_segments.push(seg);
    }

    /// Total number of interrupt pins across the IOAPICs, given each
    /// controller's max-redirection-entry count.
    pub fn gsi_limit(&self, mre: impl Fn(&IoapicRecord) -> u32) -> u32 {
        self.ioapics
            .iter()
            .map(|io| io.gsi_base + mre(io) + 1)
            .max()
            .unwrap_or(0)
    }
}
