// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! RSDP location, root-table walk, and per-table validation and
//! dispatch.

use crate::platform::ConsoleDevice;
use crate::platform::DeviceScope;
use crate::platform::IdleState;
use crate::platform::IommuRecord;
use crate::platform::IoapicRecord;
use crate::platform::NumaRange;
use crate::platform::PciSegment;
use crate::platform::RmrrRecord;
use crate::platform::ScopeKind;
use crate::DiscoveryError;
use crate::PhysMemory;
use crate::Platform;
use acpi_spec::dbg2;
use acpi_spec::dmar;
use acpi_spec::facs::Facs;
use acpi_spec::fadt::Fadt;
use acpi_spec::gtdt::Gtdt;
use acpi_spec::hpet::Hpet;
use acpi_spec::iort;
use acpi_spec::lpit;
use acpi_spec::madt;
use acpi_spec::mcfg;
use acpi_spec::spcr::Spcr;
use acpi_spec::srat;
use acpi_spec::table_body;
use acpi_spec::tpm2::Tpm2;
use acpi_spec::Gas;
use acpi_spec::Header;
use acpi_spec::Rsdp;
use core::mem::size_of;
use cpu::CpuRecord;
use memory_range::MemoryRange;
use zerocopy::FromBytes;

/// The tables discovery knows how to validate, with the minimum
/// length a valid instance must declare. A validated table's physical
/// address lands in the slot of the same index.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum Slot {
    Madt,
    Dbg2,
    Dmar,
    Fadt,
    Gtdt,
    Hpet,
    Iort,
    Lpit,
    Mcfg,
    Spcr,
    Srat,
    Tpm2,
}

struct TableDesc {
    sig: [u8; 4],
    min_len: u32,
    slot: Slot,
}

const TABLES: &[TableDesc] = &[
    TableDesc { sig: *b"APIC", min_len: 44, slot: Slot::Madt },
    TableDesc { sig: *b"DBG2", min_len: 44, slot: Slot::Dbg2 },
    TableDesc { sig: *b"DMAR", min_len: 48, slot: Slot::Dmar },
    TableDesc { sig: *b"FACP", min_len: 244, slot: Slot::Fadt },
    TableDesc { sig: *b"GTDT", min_len: 104, slot: Slot::Gtdt },
    TableDesc { sig: *b"HPET", min_len: 56, slot: Slot::Hpet },
    TableDesc { sig: *b"IORT", min_len: 48, slot: Slot::Iort },
    TableDesc { sig: *b"LPIT", min_len: 36, slot: Slot::Lpit },
    TableDesc { sig: *b"MCFG", min_len: 44, slot: Slot::Mcfg },
    TableDesc { sig: *b"SPCR", min_len: 80, slot: Slot::Spcr },
    TableDesc { sig: *b"SRAT", min_len: 48, slot: Slot::Srat },
    TableDesc { sig: *b"TPM2", min_len: 52, slot: Slot::Tpm2 },
];

/// ECAM windows known broken on specific platforms; a matching
/// (OEM id, OEM table id) disables the listed segment groups.
struct McfgQuirk {
    oem_id: [u8; 6],
    oem_table_id: [u8; 8],
    segments: u64,
}

const MCFG_QUIRKS: &[McfgQuirk] = &[McfgQuirk {
    oem_id: *b"NVIDIA",
    oem_table_id: *b"TEGRA194",
    segments: !0,
}];

/// Completed first-phase discovery: every referenced table validated
/// and slotted.
pub struct Discovery {
    slots: [Option<u64>; TABLES.len()],
    pub rsdp_phys: u64,
    pub revision: u8,
    /// FACS physical address, located via the FADT during parse.
    facs_phys: u64,
}

impl Discovery {
    /// Searches the legacy x86 locations for the RSDP: the first KiB
    /// of the EBDA, then the BIOS read-only area, on 16-byte
    /// boundaries. An EFI-provided pointer short-circuits the scan.
    pub fn find_rsdp(mem: &impl PhysMemory, efi_ptr: Option<u64>) -> Option<u64> {
        if let Some(phys) = efi_ptr {
            if mem.view(phys, size_of::<Rsdp>()).is_some_and(|b| Rsdp::validate(b).is_some()) {
                return Some(phys);
            }
        }

        let ebda = mem
            .view(0x40e, 2)
            .map(|b| (u16::from_le_bytes([b[0], b[1]]) as u64) << 4)
            .unwrap_or(0);
        let windows = [(ebda, 0x400u64), (0xe0000, 0x20000)];
        for (base, len) in windows {
            if base == 0 {
                continue;
            }
            let mut phys = base;
            while phys + size_of::<Rsdp>() as u64 <= base + len {
                if let Some(bytes) = mem.view(phys, size_of::<Rsdp>()) {
                    if Rsdp::validate(bytes).is_some() {
                        return Some(phys);
                    }
                }
                phys += 16;
            }
        }
        None
    }

    /// Validates the RSDP and walks the preferred root table,
    /// validating and slotting every referenced table.
    pub fn new(mem: &impl PhysMemory, rsdp_phys: u64) -> Result<Discovery, DiscoveryError> {
        let rsdp_bytes = mem
            .view(rsdp_phys, size_of::<Rsdp>())
            .ok_or(DiscoveryError::NoRsdp)?;
        let rsdp = Rsdp::validate(rsdp_bytes).ok_or(DiscoveryError::NoRsdp)?;
        let (root_phys, xsdt) = rsdp.root_table();
        let revision = rsdp.revision;

        tracing::info!(rsdp = rsdp_phys, root = root_phys, xsdt, "RSDP");

        let mut disc = Discovery {
            slots: [None; TABLES.len()],
            rsdp_phys,
            revision,
            facs_phys: 0,
        };
        disc.walk_root(mem, root_phys, xsdt)?;
        Ok(disc)
    }

    /// Walks the XSDT (8-byte entries) or RSDT (4-byte entries).
    fn walk_root(
        &mut self,
        mem: &impl PhysMemory,
        root_phys: u64,
        xsdt: bool,
    ) -> Result<(), DiscoveryError> {
        let bytes = read_table(mem, root_phys).ok_or(DiscoveryError::BadRootTable {
            phys: root_phys,
        })?;
        let expected = if xsdt { *b"XSDT" } else { *b"RSDT" };
        let (header, body) = Header::validate_body(bytes, 36)
            .map_err(|_| DiscoveryError::BadRootTable { phys: root_phys })?;
        if header.signature != expected {
            return Err(DiscoveryError::BadRootTable { phys: root_phys });
        }

        let step = if xsdt { 8 } else { 4 };
        for entry in body.chunks_exact(step) {
            let phys = if xsdt {
                u64::from_le_bytes(entry.try_into().unwrap())
            } else {
                u32::from_le_bytes(entry.try_into().unwrap()) as u64
            };
            if phys != 0 {
                self.validate_table(mem, phys);
            }
        }
        Ok(())
    }

    /// Validates one table and records it in its signature's slot.
    /// Invalid tables are logged and skipped; the first valid table
    /// of a signature wins.
    fn validate_table(&mut self, mem: &impl PhysMemory, phys: u64) {
        let Some(bytes) = read_table(mem, phys) else {
            tracing::warn!(phys, "firmware table not mapped");
            return;
        };
        let Ok(header) = Header::ref_from_prefix(bytes).map(|(h, _)| h) else {
            return;
        };
        let sig = header.signature;
        let desc = TABLES.iter().find(|d| d.sig == sig);
        let valid = desc.is_some_and(|d| Header::validate_body(bytes, d.min_len).is_ok());

        tracing::info!(
            sig = %String::from_utf8_lossy(&sig),
            phys,
            len = header.length.get(),
            oem = %String::from_utf8_lossy(&header.oem_id),
            ok = valid,
            "table"
        );

        if let (Some(desc), true) = (desc, valid) {
            let slot = &mut self.slots[desc.slot as usize];
            if slot.is_none() {
                *slot = Some(phys);
            }
        }
    }

    /// The validated physical address recorded for `slot`.
    pub fn table(&self, slot: Slot) -> Option<u64> {
        self.slots[slot as usize]
    }

    /// Second phase: maps each slotted table and parses it into the
    /// platform model.
    pub fn parse(
        &mut self,
        mem: &impl PhysMemory,
        max_cpus: usize,
        nosmmu: bool,
    ) -> Result<Platform, DiscoveryError> {
        let mut p = Platform::new(max_cpus);

        if let Some(bytes) = self.mapped(mem, Slot::Fadt) {
            self.parse_fadt(bytes, &mut p);
        }
        if let Some(bytes) = self.mapped(mem, Slot::Madt) {
            parse_madt(bytes, &mut p)?;
        }
        if let Some(bytes) = self.mapped(mem, Slot::Mcfg) {
            parse_mcfg(bytes, &mut p);
        }
        if let Some(bytes) = self.mapped(mem, Slot::Hpet) {
            parse_hpet(bytes, &mut p);
        }
        if !nosmmu {
            if let Some(bytes) = self.mapped(mem, Slot::Dmar) {
                parse_dmar(bytes, &mut p);
            }
            if let Some(bytes) = self.mapped(mem, Slot::Iort) {
                parse_iort(bytes, &mut p);
            }
        }
        if let Some(bytes) = self.mapped(mem, Slot::Gtdt) {
            parse_gtdt(bytes, &mut p);
        }
        if let Some(bytes) = self.mapped(mem, Slot::Srat) {
            parse_srat(bytes, &mut p);
        }
        if let Some(bytes) = self.mapped(mem, Slot::Lpit) {
            parse_lpit(bytes, &mut p);
        }
        if let Some(bytes) = self.mapped(mem, Slot::Spcr) {
            parse_spcr(bytes, &mut p);
        }
        if let Some(bytes) = self.mapped(mem, Slot::Dbg2) {
            parse_dbg2(bytes, &mut p);
        }
        if let Some(bytes) = self.mapped(mem, Slot::Tpm2) {
            if let Ok((_, t, _)) = table_body::<Tpm2>(bytes) {
                p.tpm2_control = t.control_area.get();
            }
        }

        // The FACS hangs off the FADT rather than the root table and
        // carries no checksum.
        if self.facs_phys != 0 {
            if let Some(bytes) = mem.view(self.facs_phys, size_of::<Facs>()) {
                if let Some(facs) = Facs::validate(bytes) {
                    p.wake = crate::platform::WakeVectors {
                        hardware_signature: facs.hardware_signature.get(),
                        wake32: facs.wake32.get(),
                        wake64: facs.wake64.get(),
                    };
                }
            }
        }

        Ok(p)
    }

    fn mapped<'a>(&self, mem: &'a impl PhysMemory, slot: Slot) -> Option<&'a [u8]> {
        read_table(mem, self.table(slot)?)
    }

    fn parse_fadt(&mut self, bytes: &[u8], p: &mut Platform) {
        let Ok((header, fadt, _)) = table_body::<Fadt>(bytes) else {
            return;
        };
        self.facs_phys = if fadt.facs64.get() != 0 {
            fadt.facs64.get()
        } else {
            fadt.facs32.get() as u64
        };
        p.fflg = fadt.fflg.get();
        p.sci_irq = fadt.sci_irq.get();
        p.psci = fadt.bflg_arm.get() & acpi_spec::fadt::FADT_ARM_PSCI_COMPLIANT != 0;
        p.psci_hvc = fadt.bflg_arm.get() & acpi_spec::fadt::FADT_ARM_PSCI_USE_HVC != 0;
        p.enable = crate::platform::EnableHandshake {
            smi_cmd: fadt.smi_cmd.get(),
            acpi_enable: fadt.acpi_enable,
            pstate_cnt: fadt.pstate_cnt,
            cstate_cnt: fadt.cstate_cnt,
        };

        tracing::info!(
            revision = header.revision,
            minor = fadt.minor_version & 0xf,
            profile = fadt.pm_profile,
            flags = p.fflg,
            "FADT"
        );

        let f = &mut p.fixed;
        if p.fflg & acpi_spec::fadt::FADT_RESET_REG_SUP != 0 {
            f.rst_reg = fadt.reset_reg;
            f.rst_val = fadt.reset_val;
        }
        if p.fflg & acpi_spec::fadt::FADT_HW_REDUCED != 0 {
            f.slp_cnt = fadt.sleep_cnt;
            f.slp_sts = fadt.sleep_sts;
            return;
        }

        // Below this point: fixed hardware that HW-reduced platforms
        // do not have. GPE blocks can carry more bits than a generic
        // address encodes, so their length travels separately.
        f.gpe0_len = fadt.gpe0_blk_len / 2;
        f.gpe1_len = fadt.gpe1_blk_len / 2;
        f.gpe0_sts = Gas::from_blocks(&fadt.x_gpe0_blk, fadt.gpe0_blk.get(), 0, 2, 0);
        f.gpe0_ena = Gas::from_blocks(&fadt.x_gpe0_blk, fadt.gpe0_blk.get(), 0, 2, 1);
        f.gpe1_sts = Gas::from_blocks(&fadt.x_gpe1_blk, fadt.gpe1_blk.get(), 0, 2, 0);
        f.gpe1_ena = Gas::from_blocks(&fadt.x_gpe1_blk, fadt.gpe1_blk.get(), 0, 2, 1);
        f.pm1a_sts = Gas::from_blocks(&fadt.x_pm1a_evt_blk, fadt.pm1a_evt_blk.get(), fadt.pm1_evt_len, 2, 0);
        f.pm1a_ena = Gas::from_blocks(&fadt.x_pm1a_evt_blk, fadt.pm1a_evt_blk.get(), fadt.pm1_evt_len, 2, 1);
        f.pm1b_sts = Gas::from_blocks(&fadt.x_pm1b_evt_blk, fadt.pm1b_evt_blk.get(), fadt.pm1_evt_len, 2, 0);
        f.pm1b_ena = Gas::from_blocks(&fadt.x_pm1b_evt_blk, fadt.pm1b_evt_blk.get(), fadt.pm1_evt_len, 2, 1);
        f.pm1a_cnt = Gas::from_blocks(&fadt.x_pm1a_cnt_blk, fadt.pm1a_cnt_blk.get(), fadt.pm1_cnt_len, 1, 0);
        f.pm1b_cnt = Gas::from_blocks(&fadt.x_pm1b_cnt_blk, fadt.pm1b_cnt_blk.get(), fadt.pm1_cnt_len, 1, 0);
        f.pm2_cnt = Gas::from_blocks(&fadt.x_pm2_cnt_blk, fadt.pm2_cnt_blk.get(), fadt.pm2_cnt_len, 1, 0);
        f.pm_tmr = Gas::from_blocks(&fadt.x_pm_tmr_blk, fadt.pm_tmr_blk.get(), fadt.pm_tmr_len, 1, 0);
    }
}

/// Reads a whole table: header first for the declared length, then
/// the full span.
fn read_table<'a>(mem: &'a impl PhysMemory, phys: u64) -> Option<&'a [u8]> {
    let header = Header::ref_from_prefix(mem.view(phys, size_of::<Header>())?)
        .ok()?
        .0;
    let len = (header.length.get() as usize).max(size_of::<Header>());
    mem.view(phys, len)
}

fn parse_madt(bytes: &[u8], p: &mut Platform) -> Result<(), DiscoveryError> {
    let Ok((_, fixed, entries)) = madt::parse_madt(bytes) else {
        return Ok(());
    };
    p.lapic_phys = fixed.lapic_phys.get() as u64;
    p.has_pic = fixed.flags.get() & madt::MADT_PCAT_COMPAT != 0;
    // A 32-bit CPU-interface base that a GICC entry may override.
    p.gic.gicc = fixed.lapic_phys.get() as u64;

    for entry in entries {
        match entry.typ {
            madt::MadtType::LAPIC => {
                let Some(lapic) = entry.read::<madt::MadtLapic>() else {
                    continue;
                };
                if lapic.flags.get() & madt::MADT_CPU_USABLE != 0 {
                    p.cpus.allocate(CpuRecord {
                        firmware_id: lapic.apic_id as u32,
                        ..Default::default()
                    })?;
                }
            }
            madt::MadtType::X2APIC => {
                let Some(x2) = entry.read::<madt::MadtX2apic>() else {
                    continue;
                };
                if x2.flags.get() & madt::MADT_CPU_USABLE != 0 {
                    p.cpus.allocate(CpuRecord {
                        firmware_id: x2.apic_id.get(),
                        ..Default::default()
                    })?;
                }
            }
            madt::MadtType::IOAPIC => {
                let Some(io) = entry.read::<madt::MadtIoapic>() else {
                    continue;
                };
                p.ioapics.push(IoapicRecord {
                    phys: io.phys.get() as u64,
                    id: io.id,
                    gsi_base: io.gsi_base.get(),
                });
            }
            madt::MadtType::GICD => {
                let Some(gicd) = entry.read::<madt::MadtGicd>() else {
                    continue;
                };
                tracing::info!(phys = gicd.phys.get(), "MADT: GICD");
                p.gic.gicd = gicd.phys.get();
            }
            madt::MadtType::GICR => {
                let Some(gicr) = entry.read::<madt::MadtGicr>() else {
                    continue;
                };
                p.gic.gicr_windows.push((gicr.phys.get(), gicr.window.get()));
            }
            madt::MadtType::GICC => {
                let Some(gicc) = entry.read::<madt::MadtGicc>() else {
                    continue;
                };
                // The CPU is unusable, or uses the parking protocol,
                // which is unsupported.
                if gicc.flags.get() & 1 == 0 || gicc.park_pver.get() != 0 {
                    continue;
                }
                if gicc.phys_gicc.get() != 0 {
                    p.gic.gicc = gicc.phys_gicc.get();
                }
                if gicc.phys_gich.get() != 0 {
                    p.gic.gich = gicc.phys_gich.get();
                }
                let mpidr = aarch64defs::affinity_bits(gicc.mpidr.get());
                p.cpus.allocate(CpuRecord {
                    firmware_id: aarch64defs::affinity_pack(mpidr),
                    mpidr,
                    gicr: gicc.phys_gicr.get(),
                })?;
            }
            madt::MadtType::GITS => {
                if let Some(gits) = entry.read::<madt::MadtGits>() {
                    p.gic.gits = gits.phys.get();
                }
            }
            madt::MadtType::GMSI => {}
            _ => {}
        }
    }
    Ok(())
}

fn parse_mcfg(bytes: &[u8], p: &mut Platform) {
    let Ok((header, _)) = Header::validate_body(bytes, 44) else {
        return;
    };
    let unusable_segments = MCFG_QUIRKS
        .iter()
        .filter(|q| q.oem_id == header.oem_id && q.oem_table_id == header.oem_table_id)
        .fold(0u64, |acc, q| acc | q.segments);

    let _ = mcfg::parse_mcfg(bytes, |seg| {
        let group = seg.segment.get();
        if group < 64 && unusable_segments & (1 << group) != 0 {
            tracing::warn!(group, "PCI segment unusable");
            return;
        }
        p.add_pci_segment(PciSegment {
            phys_base: seg.phys_base.get(),
            group,
            start_bus: seg.start_bus,
            end_bus: seg.end_bus,
        });
    });
}

fn parse_hpet(bytes: &[u8], p: &mut Platform) {
    if let Ok((_, hpet, _)) = table_body::<Hpet>(bytes) {
        p.hpets.push((hpet.number, hpet.base.addr.get()));
    }
}

fn collect_scopes(scopes: dmar::ScopeIter<'_>, segment: u16) -> Vec<DeviceScope> {
    scopes
        .filter_map(|s| {
            let kind = match s.typ {
                dmar::ScopeType::PCI_EP => ScopeKind::Endpoint,
                dmar::ScopeType::PCI_SH => ScopeKind::SubHierarchy,
                dmar::ScopeType::IOAPIC => ScopeKind::Ioapic,
                dmar::ScopeType::HPET => ScopeKind::Hpet,
                _ => return None,
            };
            Some(DeviceScope {
                kind,
                enum_id: s.enum_id,
                segment,
                bus: s.start_bus,
                dev: s.dev,
                fun: s.fun,
            })
        })
        .collect()
}

fn parse_dmar(bytes: &[u8], p: &mut Platform) {
    let Ok((_, fixed, remappings)) = dmar::parse_dmar(bytes) else {
        return;
    };
    if fixed.flags & (dmar::DMAR_INTR_REMAP | dmar::DMAR_X2APIC_OPT_OUT)
        == dmar::DMAR_INTR_REMAP | dmar::DMAR_X2APIC_OPT_OUT
    {
        p.x2apic_opt_out = true;
    }
    for r in remappings {
        match r {
            dmar::Remapping::Drhd(drhd, scopes) => {
                let segment = drhd.segment.get();
                p.iommus.push(IommuRecord {
                    phys: drhd.phys.get(),
                    segment,
                    include_all: drhd.flags & dmar::DRHD_INCLUDE_PCI_ALL != 0,
                    scopes: collect_scopes(scopes, segment),
                });
            }
            dmar::Remapping::Rmrr(rmrr, scopes) => {
                let segment = rmrr.segment.get();
                // The page-aligned expansion of [base, limit].
                let range = MemoryRange::bounding(rmrr.base.get()..rmrr.limit.get() + 1);
                tracing::info!(%range, "RMRR");
                p.rmrrs.push(RmrrRecord {
                    range,
                    segment,
                    scopes: collect_scopes(scopes, segment),
                });
            }
            dmar::Remapping::Other(_) => {}
        }
    }
}

fn parse_iort(bytes: &[u8], p: &mut Platform) {
    let _ = iort::parse_iort(bytes, |node, smmu| {
        tracing::info!(phys = smmu.base.get(), id = node.id.get(), "IORT: SMMU");
        p.iommus.push(IommuRecord {
            phys: smmu.base.get(),
            segment: 0,
            include_all: false,
            scopes: Vec::new(),
        });
    });
}

fn parse_gtdt(bytes: &[u8], p: &mut Platform) {
    let Ok((_, gtdt, _)) = table_body::<Gtdt>(bytes) else {
        return;
    };
    p.timer = crate::platform::TimerRecord {
        el2_p_ppi: gtdt.el2_p_gsi.get().wrapping_sub(16) & 0xf,
        el1_v_ppi: gtdt.el1_v_gsi.get().wrapping_sub(16) & 0xf,
        lvl_el2_p: gtdt.el2_p_flg.get() & acpi_spec::gtdt::GTDT_EDGE_TRIGGERED == 0,
        lvl_el1_v: gtdt.el1_v_flg.get() & acpi_spec::gtdt::GTDT_EDGE_TRIGGERED == 0,
    };
}

fn parse_srat(bytes: &[u8], p: &mut Platform) {
    let _ = srat::parse_srat(bytes, |mem| {
        let base = mem.base.get();
        let size = mem.size.get();
        tracing::info!(base, size, domain = mem.domain.get(), "SRAT");
        p.numa.push(NumaRange {
            range: MemoryRange::bounding(base..base + size),
            domain: mem.domain.get(),
        });
    });
}

fn parse_lpit(bytes: &[u8], p: &mut Platform) {
    let _ = lpit::parse_lpit(bytes, |state| {
        p.idle_states.push(IdleState {
            id: state.id.get(),
            min_residency_us: state.min_residency.get(),
            max_latency_us: state.max_latency.get(),
        });
    });
}

fn parse_spcr(bytes: &[u8], p: &mut Platform) {
    let Ok((_, spcr, _)) = table_body::<Spcr>(bytes) else {
        return;
    };
    tracing::info!(
        subtype = spcr.subtype.get(),
        addr = spcr.regs.addr.get(),
        "SPCR: console"
    );
    p.consoles.push(ConsoleDevice {
        port_type: dbg2::PortType::SERIAL.0,
        port_subtype: spcr.subtype.get(),
        regs: spcr.regs,
    });
}

fn parse_dbg2(bytes: &[u8], p: &mut Platform) {
    let _ = dbg2::parse_dbg2(bytes, |typ, subtype, regs: &Gas| {
        tracing::info!(
            typ = typ.0,
            subtype = subtype.0,
            addr = regs.addr.get(),
            "DBG2: console"
        );
        p.consoles.push(ConsoleDevice {
            port_type: typ.0,
            port_subtype: subtype.0,
            regs: *regs,
        });
    });
}
