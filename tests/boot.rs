// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end boot flow against a synthetic firmware description:
//! discovery, console binding, space construction and device
//! assignment, composed the way the boot CPU runs them.

use acpi_spec::Gas;
use acpi_spec::Header;
use acpi_spec::Rsdp;
use capdefs::space::PdRef;
use capdefs::space::SpaceDma;
use firmware::PhysMemory;
use microvisor::init;
use microvisor::init::FirmwarePath;
use microvisor::Options;
use page_table::x64::EptFormat;
use page_table::FrameArena;
use page_table::PageNode;
use page_table::Permissions;
use std::collections::BTreeMap;
use std::mem::size_of;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

#[derive(Default)]
struct FakeMemory {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl FakeMemory {
    fn put(&mut self, phys: u64, bytes: Vec<u8>) {
        self.regions.insert(phys, bytes);
    }
}

impl PhysMemory for FakeMemory {
    fn view(&self, phys: u64, len: usize) -> Option<&[u8]> {
        let (&base, bytes) = self.regions.range(..=phys).next_back()?;
        let off = (phys - base) as usize;
        bytes.get(off..off.checked_add(len)?)
    }
}

struct Arena {
    nodes: Vec<PageNode>,
    next: AtomicUsize,
}

impl Arena {
    fn new(n: usize) -> Arena {
        Arena {
            nodes: (0..n).map(|_| PageNode::new()).collect(),
            next: AtomicUsize::new(0),
        }
    }
}

impl FrameArena for Arena {
    fn allocate_node(&self) -> Option<u64> {
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        (i < self.nodes.len()).then(|| ((i + 1) as u64) << 12)
    }

    fn node(&self, phys: u64) -> Option<&PageNode> {
        self.nodes.get(((phys >> 12) as usize).checked_sub(1)?)
    }
}

fn checksummed(mut v: Vec<u8>) -> Vec<u8> {
    let sum = bitops::additive_sum(&v, v.len());
    let last = v.len() - 1;
    v[last] = v[last].wrapping_sub(sum);
    v
}

fn table(sig: [u8; 4], body: &[u8]) -> Vec<u8> {
    let mut header = Header::new_zeroed();
    header.signature = sig;
    header.length = ((size_of::<Header>() + body.len()) as u32).into();
    header.revision = 6;
    header.oem_id = *b"TESTED";
    header.oem_table_id = *b"TESTTEST";
    let mut v = header.as_bytes().to_vec();
    v.extend_from_slice(body);
    checksummed(v)
}

/// A machine description: two usable CPUs (APIC ids 0 and 2, one
/// disabled entry), one IOAPIC, a COM1 console, a DMAR unit covering
/// one endpoint, and PM1a fixed hardware.
fn machine() -> FakeMemory {
    let mut mem = FakeMemory::default();

    // MADT.
    let mut madt_body = acpi_spec::madt::Madt {
        lapic_phys: 0xfee0_0000.into(),
        flags: acpi_spec::madt::MADT_PCAT_COMPAT.into(),
    }
    .as_bytes()
    .to_vec();
    for (uid, id, flags) in [(0u8, 0u8, 1u32), (1, 2, 1), (2, 3, 0)] {
        madt_body.extend_from_slice(
            acpi_spec::madt::MadtLapic {
                typ: acpi_spec::madt::MadtType::LAPIC,
                length: size_of::<acpi_spec::madt::MadtLapic>() as u8,
                uid,
                apic_id: id,
                flags: flags.into(),
            }
            .as_bytes(),
        );
    }
    madt_body.extend_from_slice(
        acpi_spec::madt::MadtIoapic {
            typ: acpi_spec::madt::MadtType::IOAPIC,
            length: size_of::<acpi_spec::madt::MadtIoapic>() as u8,
            id: 1,
            rsvd: 0,
            phys: 0xfec0_0000.into(),
            gsi_base: 0.into(),
        }
        .as_bytes(),
    );
    mem.put(0x100_0000, table(*b"APIC", &madt_body));

    // FADT with PM1a control at port 0x1004 and a reset register.
    let mut fadt = acpi_spec::fadt::Fadt::new_zeroed();
    fadt.pm1a_cnt_blk = 0x1004.into();
    fadt.pm1_cnt_len = 2;
    fadt.pm1a_evt_blk = 0x1000.into();
    fadt.pm1_evt_len = 4;
    fadt.fflg = acpi_spec::fadt::FADT_RESET_REG_SUP.into();
    fadt.reset_reg = Gas {
        asid: acpi_spec::AddressSpace::PIO.0,
        bits: 8,
        offs: 0,
        accs: 1,
        addr: 0xcf9.into(),
    };
    fadt.reset_val = 6;
    mem.put(0x100_2000, table(*b"FACP", fadt.as_bytes()));

    // SPCR: NS16550 at port 0x3f8.
    let mut spcr = acpi_spec::spcr::Spcr::new_zeroed();
    spcr.regs = Gas {
        asid: acpi_spec::AddressSpace::PIO.0,
        bits: 8,
        offs: 0,
        accs: 1,
        addr: 0x3f8.into(),
    };
    mem.put(0x100_4000, table(*b"SPCR", spcr.as_bytes()));

    // DMAR: one DRHD claiming everything on segment 0.
    let mut dmar_body = acpi_spec::dmar::Dmar {
        haw: 38,
        flags: 0,
        rsvd: [0; 10],
    }
    .as_bytes()
    .to_vec();
    let mut drhd = acpi_spec::dmar::Drhd::new_zeroed();
    drhd.typ = acpi_spec::dmar::RemappingType::DRHD.0.into();
    drhd.length = (size_of::<acpi_spec::dmar::Drhd>() as u16).into();
    drhd.flags = acpi_spec::dmar::DRHD_INCLUDE_PCI_ALL;
    drhd.phys = 0xfed9_0000u64.into();
    dmar_body.extend_from_slice(drhd.as_bytes());
    mem.put(0x100_6000, table(*b"DMAR", &dmar_body));

    // XSDT referencing everything, and the RSDP.
    let mut xsdt_body = Vec::new();
    for phys in [0x100_0000u64, 0x100_2000, 0x100_4000, 0x100_6000] {
        xsdt_body.extend_from_slice(&phys.to_le_bytes());
    }
    mem.put(0x0fee_0000, table(*b"XSDT", &xsdt_body));

    let mut rsdp = Rsdp::new_zeroed();
    rsdp.signature = acpi_spec::RSDP_SIGNATURE;
    rsdp.revision = 2;
    rsdp.length = 36.into();
    rsdp.xsdt = 0x0fee_0000u64.into();
    mem.put(0x000f_6420, checksummed(rsdp.as_bytes().to_vec()));

    mem
}

#[test]
fn cold_boot_discovery() {
    let mem = machine();
    let options = Options::parse("");
    let (platform, path) = init::discover(&mem, Some(0x000f_6420), None, &options).unwrap();
    assert_eq!(path, FirmwarePath::Acpi);

    // Dense CPU ids for the two usable entries.
    assert_eq!(platform.cpus.count(), 2);
    let apic_ids: Vec<u32> = platform.cpus.records().map(|(_, r)| r.firmware_id).collect();
    assert_eq!(apic_ids, [0, 2]);

    assert_eq!(platform.ioapics.len(), 1);
    assert_eq!(platform.iommus.len(), 1);
    assert!(platform.iommus[0].include_all);
    assert_eq!(platform.consoles.len(), 1);
    assert!(platform.fixed.rst_reg.is_present());
    assert!(platform.has_pic);
}

#[test]
fn nosmmu_suppresses_remapping() {
    let mem = machine();
    let options = Options::parse("nosmmu");
    let (platform, _) = init::discover(&mem, Some(0x000f_6420), None, &options).unwrap();
    assert!(platform.iommus.is_empty());
}

#[test]
fn console_binds_from_discovery() {
    struct Backend;
    impl console::UartBackend for Backend {
        fn open(
            &mut self,
            _gas: &Gas,
        ) -> Option<Box<dyn console::uart::UartIo + Send>> {
            Some(Box::new(console::uart::testing::FakeUart::working()))
        }
    }

    let mem = machine();
    let options = Options::parse("");
    let (platform, _) = init::discover(&mem, Some(0x000f_6420), None, &options).unwrap();

    let mux = console::Console::new(Backend, 1_843_200, options.nouart);
    init::bind_consoles(&platform, &mux);
    assert_eq!(mux.enabled(), 1);
    mux.write("boot\n");
    mux.flush();
    assert_eq!(mux.enabled(), 1);
}

#[test]
fn dma_space_assignment_flow() {
    // The capability layer's assign path: create a DMA space, give
    // an RMRR-like region identity access, program the space root
    // into a context entry.
    let arena = Arena::new(64);
    let pd = PdRef::new();
    let sdids = iommu::SdidAllocator::new(16);
    let space = SpaceDma::<EptFormat, _>::create(&pd, &arena, &sdids).unwrap();

    space
        .access_ctrl(
            0x7c00_0000,
            0x0080_0000,
            Permissions(Permissions::R.0 | Permissions::W.0),
        )
        .unwrap();
    let hit = space.table().lookup(0x7c00_0000).unwrap();
    assert_eq!(hit.phys, 0x7c00_0000);

    // The stage-2 root is what an IOMMU context would be programmed
    // with.
    assert_ne!(space.root_phys(), 0);
}

#[test]
fn interrupt_windows_reserved() {
    use capdefs::space::SpaceHst;
    use page_table::x64::HptFormat;

    let mem = machine();
    let options = Options::parse("");
    let (platform, _) = init::discover(&mem, Some(0x000f_6420), None, &options).unwrap();

    let arena = Arena::new(64);
    let pd = PdRef::new();
    let kernel = SpaceHst::<HptFormat, _>::create(&pd, &arena, 4).unwrap();
    init::reserve_interrupt_windows(&kernel, &platform).unwrap();
    // Nothing is mapped over the MSI window.
    assert!(kernel.table().lookup(0xfee0_0000).is_none());
}

#[test]
fn sleep_transition_flow() {
    use acpi_spec::AddressSpace;
    use firmware::fixed::FixedHw;
    use firmware::fixed::GasIo;
    use firmware::fixed::Transition;

    let mem = machine();
    let options = Options::parse("");
    let (platform, _) = init::discover(&mem, Some(0x000f_6420), None, &options).unwrap();

    #[derive(Default)]
    struct Ports(BTreeMap<u64, u32>);
    impl GasIo for Ports {
        fn read(&self, _space: AddressSpace, addr: u64, _bits: u8) -> u32 {
            self.0.get(&addr).copied().unwrap_or(0)
        }
        fn write(&mut self, _space: AddressSpace, addr: u64, _bits: u8, value: u32) {
            self.0.insert(addr, value);
        }
    }

    let hw = FixedHw::new(platform.fixed, platform.enable);
    let mut io = Ports::default();

    // S5 with sleep type 5: SLP_EN | type into PM1a control.
    let t = Transition::new(5, 5, 0);
    assert!(hw.supported(t));
    assert!(hw.set_transition(t));
    hw.sleep(&mut io, t);
    assert_eq!(io.0[&0x1004], 1 << 13 | 5 << 10);

    // Reset is also declared.
    hw.reset(&mut io);
    assert_eq!(io.0[&0xcf9], 6);
}
