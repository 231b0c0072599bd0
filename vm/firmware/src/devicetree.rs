// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Alternate discovery path: a Flattened Devicetree, used on AArch64
//! when no ACPI tables were handed over. Produces the same platform
//! model as the ACPI walk.

use crate::platform::ConsoleDevice;
use crate::DiscoveryError;
use crate::Platform;
use acpi_spec::dbg2::PortSubtype;
use acpi_spec::dbg2::PortType;
use acpi_spec::AddressSpace;
use acpi_spec::Gas;
use cpu::CpuRecord;
use fdt::parser::Node;
use fdt::parser::Parser;
use memory_range::MemoryRange;

/// Parses a devicetree blob into a platform model.
///
/// Consumes the `/cpus`, `/memory`, interrupt-controller and UART
/// subtrees; everything else is skipped.
pub fn parse(blob: &[u8], max_cpus: usize) -> Result<Platform, DiscoveryError> {
    let parser = Parser::new(blob).map_err(|_| DiscoveryError::NoRsdp)?;
    let root = parser.root().map_err(|_| DiscoveryError::NoRsdp)?;

    let mut p = Platform::new(max_cpus);
    // Devicetree platforms boot through PSCI.
    p.psci = true;

    let address_cells = prop_u32(&root, "#address-cells").unwrap_or(2);
    let size_cells = prop_u32(&root, "#size-cells").unwrap_or(2);

    for child in root.children().filter_map(Result::ok) {
        match child.base_name() {
            "cpus" => parse_cpus(&child, &mut p, parser.boot_cpuid_phys)?,
            "memory" => {
                if let Some((base, size)) = reg_pair(&child, address_cells, size_cells) {
                    p.memory.push(MemoryRange::bounding(base..base + size));
                }
            }
            "intc" | "interrupt-controller" => parse_gic(&child, &mut p, address_cells, size_cells),
            "uart" | "serial" | "pl011" => parse_uart(&child, &mut p, address_cells, size_cells),
            "chosen" => {}
            _ => {}
        }
    }

    tracing::info!(
        cpus = p.cpus.count(),
        gicd = p.gic.gicd,
        consoles = p.consoles.len(),
        "devicetree"
    );
    Ok(p)
}

fn prop_u32(node: &Node<'_>, name: &str) -> Option<u32> {
    node.find_property(name).ok()??.read_u32(0).ok()
}

/// Reads the first (address, size) pair of a `reg` property.
fn reg_pair(node: &Node<'_>, address_cells: u32, size_cells: u32) -> Option<(u64, u64)> {
    let reg = node.find_property("reg").ok()??;
    let base = reg.read_cells(0, address_cells).ok()?;
    let size = reg
        .read_cells(address_cells as usize, size_cells)
        .ok()?;
    Some((base, size))
}

fn parse_cpus(cpus: &Node<'_>, p: &mut Platform, boot_reg: u32) -> Result<(), DiscoveryError> {
    // The cpus node overrides the root cell counts; MPIDR values are
    // one or two cells with no size.
    let address_cells = prop_u32(cpus, "#address-cells").unwrap_or(1);

    for cpu_node in cpus.children().filter_map(Result::ok) {
        let is_cpu = cpu_node
            .find_property("device_type")
            .ok()
            .flatten()
            .and_then(|prop| prop.read_str().ok())
            == Some("cpu");
        if !is_cpu {
            continue;
        }
        let Some(reg) = cpu_node.find_property("reg").ok().flatten() else {
            continue;
        };
        let Ok(mpidr) = reg.read_cells(0, address_cells) else {
            continue;
        };
        // CPUs that spin on a mailbox rather than PSCI cannot be
        // brought online.
        if let Ok(Some(en)) = cpu_node.find_property("enable-method") {
            if en.read_str() != Ok("psci") {
                continue;
            }
        }
        let mpidr = aarch64defs::affinity_bits(mpidr);
        let id = p.cpus.allocate(CpuRecord {
            firmware_id: aarch64defs::affinity_pack(mpidr),
            mpidr,
            gicr: 0,
        })?;
        if mpidr == aarch64defs::affinity_bits(boot_reg as u64) {
            p.cpus.set_boot(id);
        }
    }
    Ok(())
}

fn parse_gic(node: &Node<'_>, p: &mut Platform, address_cells: u32, size_cells: u32) {
    if !node.is_compatible("arm,gic-v3") && !node.is_compatible("arm,gic-400") {
        return;
    }
    // First reg pair is the distributor, the second the
    // redistributor window (v3) or CPU interface (v2).
    let Ok(Some(reg)) = node.find_property("reg") else {
        return;
    };
    let stride = (address_cells + size_cells) as usize;
    if let (Ok(gicd), Ok(_)) = (
        reg.read_cells(0, address_cells),
        reg.read_cells(address_cells as usize, size_cells),
    ) {
        p.gic.gicd = gicd;
    }
    if let (Ok(base), Ok(size)) = (
        reg.read_cells(stride, address_cells),
        reg.read_cells(stride + address_cells as usize, size_cells),
    ) {
        if node.is_compatible("arm,gic-v3") {
            p.gic.gicr_windows.push((base, size as u32));
        } else {
            p.gic.gicc = base;
        }
    }
}

fn parse_uart(node: &Node<'_>, p: &mut Platform, address_cells: u32, size_cells: u32) {
    let subtype = if node.is_compatible("arm,pl011") {
        PortSubtype::SERIAL_PL011
    } else if node.is_compatible("ns16550a") || node.is_compatible("ns16550") {
        PortSubtype::SERIAL_NS16550
    } else {
        return;
    };
    let Some((base, _)) = reg_pair(node, address_cells, size_cells) else {
        return;
    };
    p.consoles.push(ConsoleDevice {
        port_type: PortType::SERIAL.0,
        port_subtype: subtype.0,
        regs: Gas {
            asid: AddressSpace::MEM.0,
            bits: 32,
            offs: 0,
            accs: 3,
            addr: base.into(),
        },
    });
}
