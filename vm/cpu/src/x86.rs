// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! x86-64 feature, clock and topology enumeration.
//!
//! Enumeration runs once per CPU against a [`CpuidSource`] and
//! [`MsrAccess`] so the result is a stable cached view; consumers read
//! the cache, never the hardware.

use bitops::bit_scan_msb;
use x86defs::cpuid::CpuidFunction;
use x86defs::cpuid::CpuidResult;
use x86defs::cpuid::Feature;
use x86defs::cpuid::FeatureSet;
use x86defs::cpuid::ScaleableBus;
use x86defs::cpuid::Vendor;
use x86defs::cpuid::VersionInfo;
use x86defs::cpuid::FEATURE_WORDS;
use x86defs::cpuid::FREQ_ATOM;
use x86defs::cpuid::FREQ_CORE;
use x86defs::Cstate;
use x86defs::Msr;

/// Access to the identification instruction.
pub trait CpuidSource {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidResult;
}

/// Access to model-specific registers.
pub trait MsrAccess {
    fn read(&self, msr: Msr) -> u64;
    fn write(&mut self, msr: Msr, value: u64);
}

/// Operator-requested feature downgrades. Applied during enumeration,
/// before any consumer reads the cached view.
#[derive(Copy, Clone, Debug, Default)]
pub struct FeatureFilters {
    /// `nodl`: hide TSC-deadline timer mode.
    pub nodl: bool,
    /// `nopcid`: hide PCID.
    pub nopcid: bool,
    /// `nomktme`: hide multi-key memory encryption.
    pub nomktme: bool,
    /// `noccst`: do not use core C-states.
    pub noccst: bool,
    /// `nocpst`: stay at the guaranteed rather than maximum P-state.
    pub nocpst: bool,
}

/// The stable per-CPU view produced by [`enumerate`].
#[derive(Clone, Debug)]
pub struct Enumerated {
    pub vendor: Vendor,
    pub version: VersionInfo,
    /// Intel platform id (MSR 0x17 bits 52:50).
    pub platform: u32,
    /// Microcode patch level.
    pub patch: u32,
    pub features: FeatureSet,
    /// Cache line size in bytes.
    pub cache_line: u32,
    /// Topology layers, innermost first: thread, core, package-high
    /// (remaining bits), spare.
    pub topology: [u32; 4],
    /// The full x2APIC id.
    pub apic_id: u32,
    /// Crystal clock in Hz, zero when unknown.
    pub clk: u32,
    /// TSC-to-crystal ratio, zero when unknown.
    pub rat: u32,
    /// MONITOR/MWAIT sub-state counts from leaf 5.
    pub cstates: u32,
    /// Processor brand string, NUL padded.
    pub brand: [u8; 48],
}

impl Default for Enumerated {
    fn default() -> Self {
        Enumerated {
            vendor: Vendor::Unknown,
            version: VersionInfo::default(),
            platform: 0,
            patch: 0,
            features: FeatureSet::default(),
            cache_line: 0,
            topology: [0; 4],
            apic_id: 0,
            clk: 0,
            rat: 0,
            cstates: 0,
            brand: [0; 48],
        }
    }
}

impl Enumerated {
    /// The TSC frequency in Hz when both clock and ratio enumerated.
    pub fn tsc_hz(&self) -> u64 {
        self.clk as u64 * self.rat as u64
    }

    /// CR4 bits to set based on the enumerated features.
    pub fn cr4_set(&self) -> u64 {
        let f = &self.features;
        let mut cr4 = 0;
        if f.has(Feature::Smap) {
            cr4 |= x86defs::X64_CR4_SMAP;
        }
        if f.has(Feature::Smep) {
            cr4 |= x86defs::X64_CR4_SMEP;
        }
        if f.has(Feature::Xsave) {
            cr4 |= x86defs::X64_CR4_OSXSAVE;
        }
        if f.has(Feature::Pcid) {
            cr4 |= x86defs::X64_CR4_PCIDE;
        }
        if f.has(Feature::Umip) {
            cr4 |= x86defs::X64_CR4_UMIP;
        }
        if f.has(Feature::Mce) {
            cr4 |= x86defs::X64_CR4_MCE;
        }
        cr4
    }
}

/// Enumerates the running CPU.
pub fn enumerate(
    cpuid: &impl CpuidSource,
    msr: &mut impl MsrAccess,
    filters: FeatureFilters,
) -> Enumerated {
    let mut e = Enumerated::default();
    let mut words = [0u32; FEATURE_WORDS];

    let leaf0 = cpuid.cpuid(CpuidFunction::VENDOR_AND_MAX.0, 0);
    let max_leaf = leaf0.eax;
    e.vendor = Vendor::from_signature(leaf0.ebx, leaf0.ecx, leaf0.edx);

    if e.vendor == Vendor::Intel {
        msr.write(Msr::IA32_BIOS_SIGN_ID, 0);
        e.platform = (msr.read(Msr::IA32_PLATFORM_ID) >> 50 & 7) as u32;
    }

    let leaf1 = cpuid.cpuid(CpuidFunction::VERSION_AND_FEATURES.0, 0);
    e.version = VersionInfo::from_eax(leaf1.eax);
    e.cache_line = 8 * (leaf1.ebx >> 8 & 0xff);
    e.apic_id = leaf1.ebx >> 24;
    words[0] = leaf1.ecx;
    words[1] = leaf1.edx;

    let mut cores_per_package = 1;
    if max_leaf >= CpuidFunction::CACHE_PARAMETERS.0 {
        let leaf4 = cpuid.cpuid(CpuidFunction::CACHE_PARAMETERS.0, 0);
        cores_per_package = (leaf4.eax >> 26 & 0x3f) + 1;
    }
    if max_leaf >= CpuidFunction::MONITOR_MWAIT.0 {
        e.cstates = cpuid.cpuid(CpuidFunction::MONITOR_MWAIT.0, 0).edx;
    }
    if max_leaf >= CpuidFunction::POWER_MANAGEMENT.0 {
        words[2] = cpuid.cpuid(CpuidFunction::POWER_MANAGEMENT.0, 0).eax;
    }
    if max_leaf >= CpuidFunction::EXTENDED_FEATURES.0 {
        let l = cpuid.cpuid(CpuidFunction::EXTENDED_FEATURES.0, 0);
        words[3] = l.ebx;
        words[4] = l.ecx;
        words[5] = l.edx;
        let l = cpuid.cpuid(CpuidFunction::EXTENDED_FEATURES.0, 1);
        words[6] = l.eax;
        words[7] = l.ebx;
        words[8] = l.ecx;
        words[9] = l.edx;
        words[10] = cpuid.cpuid(CpuidFunction::EXTENDED_FEATURES.0, 2).edx;
    }
    if max_leaf >= CpuidFunction::CORE_CRYSTAL.0 {
        let l = cpuid.cpuid(CpuidFunction::CORE_CRYSTAL.0, 0);
        e.clk = l.ecx;
        e.rat = if l.eax != 0 { l.ebx / l.eax } else { 0 };
    }

    // Topology: the v2 leaf wins, then the extended leaf, then the
    // legacy derivation from leaf 1 and cache parameters.
    let mut have_topology = false;
    if max_leaf >= CpuidFunction::V2_EXTENDED_TOPOLOGY.0 {
        have_topology = enumerate_topology(
            cpuid,
            CpuidFunction::V2_EXTENDED_TOPOLOGY.0,
            &mut e.apic_id,
            &mut e.topology,
        );
    }
    if !have_topology && max_leaf >= CpuidFunction::EXTENDED_TOPOLOGY.0 {
        have_topology = enumerate_topology(
            cpuid,
            CpuidFunction::EXTENDED_TOPOLOGY.0,
            &mut e.apic_id,
            &mut e.topology,
        );
    }
    if !have_topology {
        let threads_per_package = if words[1] >> 28 & 1 != 0 {
            leaf1.ebx >> 16 & 0xff
        } else {
            1
        };
        let threads_per_core = (threads_per_package / cores_per_package).max(1);
        let c = bit_scan_msb(cores_per_package as u64 - 1) + 1;
        let t = bit_scan_msb(threads_per_core as u64 - 1) + 1;
        e.topology[2] = e.apic_id >> (c + t);
        e.topology[1] = e.apic_id >> t & !(!0u32 << c);
        e.topology[0] = e.apic_id & !(!0u32 << t);
    }

    let ext_max = cpuid.cpuid(CpuidFunction::EXTENDED_MAX.0, 0).eax;
    if ext_max & 0x8000_0000 != 0 {
        if ext_max >= CpuidFunction::EXTENDED_VERSION_AND_FEATURES.0 {
            let l = cpuid.cpuid(CpuidFunction::EXTENDED_VERSION_AND_FEATURES.0, 0);
            words[11] = l.ecx;
            words[12] = l.edx;
        }
        if ext_max >= CpuidFunction::BRAND2.0 {
            for (i, leaf) in [
                CpuidFunction::BRAND0,
                CpuidFunction::BRAND1,
                CpuidFunction::BRAND2,
            ]
            .into_iter()
            .enumerate()
            {
                let l = cpuid.cpuid(leaf.0, 0);
                for (j, r) in [l.eax, l.ebx, l.ecx, l.edx].into_iter().enumerate() {
                    e.brand[i * 16 + j * 4..i * 16 + j * 4 + 4].copy_from_slice(&r.to_le_bytes());
                }
            }
        }
    }

    e.patch = (msr.read(Msr::IA32_BIOS_SIGN_ID) >> 32) as u32;
    e.features = FeatureSet::new(words);

    if filters.nodl {
        e.features.defeature(Feature::TscDeadline);
    }
    if filters.nopcid {
        e.features.defeature(Feature::Pcid);
    }
    if filters.nomktme {
        // No consumer may ever see an encryption key id.
        e.features.defeature(Feature::Tme);
        e.features.defeature(Feature::Pconfig);
    }

    enumerate_clocks(&mut e, msr);
    e
}

/// Programs the performance-state request: HWP when available, else
/// EIST. `nocpst` pins the CPU to the guaranteed ratio instead of the
/// maximum and disengages turbo mode.
pub fn setup_pstates(e: &Enumerated, msr: &mut impl MsrAccess, filters: FeatureFilters) {
    if e.vendor != Vendor::Intel {
        return;
    }

    if e.features.has(Feature::Hwp) {
        // Additional HWP MSRs may only be accessed after HWP is
        // enabled.
        msr.write(Msr::IA32_PM_ENABLE, 1);

        let caps = msr.read(Msr::IA32_HWP_CAPABILITIES);
        let min = caps >> 24 & 0xff; // lowest
        let gtd = caps >> 8 & 0xff; // currently guaranteed
        let max = caps & 0xff; // highest
        let des = if filters.nocpst { gtd } else { max };

        msr.write(Msr::IA32_HWP_REQUEST, des << 16 | max << 8 | min);

        tracing::info!(max, gtd, min, des, "P-states (HWP)");
    } else if e.features.has(Feature::Eist) {
        msr.write(
            Msr::IA32_MISC_ENABLE,
            msr.read(Msr::IA32_MISC_ENABLE) | 1 << 16,
        );

        let gtd = msr.read(Msr::PLATFORM_INFO) >> 8 & 0xff;
        let max = if e.features.has(Feature::TurboBoost) {
            msr.read(Msr::TURBO_RATIO_LIMIT) & 0xff
        } else {
            gtd
        };
        let des = if filters.nocpst { gtd } else { max };

        // Set the desired ratio and (dis)engage turbo mode.
        let ctl = msr.read(Msr::IA32_PERF_CTL) & !(1 << 32 | 0xff << 8);
        let turbo_off = if e.features.has(Feature::TurboBoost) && filters.nocpst {
            1 << 32
        } else {
            0
        };
        msr.write(Msr::IA32_PERF_CTL, ctl | turbo_off | des << 8);

        tracing::info!(max, gtd, des, "P-states (EIST)");
    }
}

/// Walks an extended-topology leaf, filling one shift-decoded layer
/// per sub-leaf.
fn enumerate_topology(
    cpuid: &impl CpuidSource,
    leaf: u32,
    apic_id: &mut u32,
    lvl: &mut [u32; 4],
) -> bool {
    let mut shift = 0;
    let mut any = false;
    for (i, slot) in lvl.iter_mut().enumerate() {
        let l = cpuid.cpuid(leaf, i as u32);
        if l.ebx != 0 {
            *apic_id = l.edx;
            let b = l.eax & 0x1f;
            *slot = (l.edx & !(!0u32 << b)) >> shift;
            shift = b;
            any = true;
            continue;
        }
        if i != 0 {
            *slot = *apic_id >> shift;
        }
        break;
    }
    any
}

fn scaled_clock(freq: &[ScaleableBus], i: usize, msr: &impl MsrAccess) -> (u32, u32) {
    let clk = freq
        .get(i)
        .map_or(0, |f| (100_000_000 * f.mul as u64 / f.div as u64) as u32);
    let rat = (msr.read(Msr::PLATFORM_INFO) >> 8 & 0xff) as u32;
    (clk, rat)
}

/// Fills in the nominal clock and TSC ratio for parts that do not
/// enumerate them, keyed by (vendor, family, model).
fn enumerate_clocks(e: &mut Enumerated, msr: &impl MsrAccess) {
    if e.clk != 0 && e.rat != 0 {
        return;
    }
    if e.vendor != Vendor::Intel || e.version.family != 0x6 {
        return;
    }

    let (clk, rat) = match e.version.model {
        // P-core >= SKL: the crystal leaf reports the ratio only.
        0xa6 | 0xa5 | 0x9e | 0x8e | 0x5e | 0x4e => (24_000_000, e.rat),

        // P-core <= BDW: the crystal leaf is absent, 100 MHz bus.
        0x6a | 0x55 | 0x56 | 0x4f | 0x3f | 0x3e | 0x2d | 0x47 | 0x3d | 0x46 | 0x45 | 0x3c
        | 0x3a | 0x2a => scaled_clock(FREQ_CORE, 5, msr),

        // NHM/WSM era: 133.33 MHz bus.
        0x2f | 0x2c | 0x25 | 0x2e | 0x1a | 0x1f | 0x1e => scaled_clock(FREQ_CORE, 1, msr),

        // Core 2 era: bus index from FSB_FREQ.
        0x1d | 0x17 | 0x0f => {
            scaled_clock(FREQ_CORE, (msr.read(Msr::FSB_FREQ) & 0b111) as usize, msr)
        }

        // E-core >= GLM: ratio only.
        0x5f => (25_000_000, e.rat),
        0x5c => (19_200_000, e.rat),

        // E-core <= AMT: bus index from FSB_FREQ.
        0x4c => scaled_clock(FREQ_ATOM, (msr.read(Msr::FSB_FREQ) & 0b1111) as usize, msr),
        0x5d | 0x5a | 0x4a | 0x37 => {
            scaled_clock(FREQ_ATOM, (msr.read(Msr::FSB_FREQ) & 0b111) as usize, msr)
        }

        _ => return,
    };
    e.clk = clk;
    e.rat = rat;
}

/// Number of MWAIT sub-states supported for `c`, from the leaf-5 word.
pub fn cstate_substates(cstates: u32, c: Cstate) -> u32 {
    cstates >> (c.0 / 2) & 0xf
}

/// Builds the per-CPU C-state hint table: one MWAIT hint byte per
/// C-state, unsupported states demoted to the next lower supported
/// one. Zero when core C-states are unavailable or filtered out.
pub fn cstate_hints(e: &Enumerated, filters: FeatureFilters) -> u64 {
    if filters.noccst || e.vendor != Vendor::Intel {
        return 0;
    }
    if !e.features.has(Feature::Monitor) || !e.features.has(Feature::Arat) {
        return 0;
    }
    let mut hint: u64 = 0xf0;
    for i in 0..7u64 {
        let s = cstate_substates(e.cstates, Cstate(8 * (i as u32 + 1))) as u64;
        let byte = if s != 0 {
            i << 4 | (s - 1)
        } else {
            hint >> (8 * i) & 0xff
        };
        hint |= byte << (8 * (i + 1));
    }
    hint
}

/// Picks a target C-state from the predicted idle residency (in clock
/// ticks), trading entry/exit latency against residency.
pub fn pick_cstate(idle: u64) -> Cstate {
    match idle {
        0 => Cstate::C0,
        1..=79 => Cstate::C1,
        80..=119 => Cstate::C3,
        120..=150 => Cstate::C6,
        151..=255 => Cstate::C7,
        256..=338 => Cstate::C8,
        339..=1033 => Cstate::C9,
        _ => Cstate::C10,
    }
}

/// The MWAIT hint byte for a picked C-state.
pub fn cstate_hint(hints: u64, c: Cstate) -> u8 {
    (hints >> c.0 & 0xff) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeCpu {
        leaves: HashMap<(u32, u32), CpuidResult>,
        msrs: HashMap<u32, u64>,
    }

    impl CpuidSource for FakeCpu {
        fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidResult {
            self.leaves
                .get(&(leaf, subleaf))
                .copied()
                .unwrap_or_default()
        }
    }

    impl MsrAccess for FakeCpu {
        fn read(&self, msr: Msr) -> u64 {
            self.msrs.get(&msr.0).copied().unwrap_or_default()
        }

        fn write(&mut self, msr: Msr, value: u64) {
            self.msrs.insert(msr.0, value);
        }
    }

    fn r(eax: u32, ebx: u32, ecx: u32, edx: u32) -> CpuidResult {
        CpuidResult { eax, ebx, ecx, edx }
    }

    /// A KBL-like part: family 6 model 0x9e, crystal leaf reports the
    /// ratio but not the clock.
    fn kbl() -> FakeCpu {
        let mut leaves = HashMap::new();
        leaves.insert((0, 0), r(0x16, 0x756e6547, 0x6c65746e, 0x49656e69));
        // family/model/stepping 6/0x9e/10, clflush 8, apic id 4,
        // monitor+tsc-deadline+pcid+xsave, acpi+htt+mce.
        leaves.insert(
            (1, 0),
            r(
                0x000906ea,
                4 << 24 | 8 << 8 | 8 << 16,
                1 << 3 | 1 << 17 | 1 << 24 | 1 << 26,
                1 << 7 | 1 << 22 | 1 << 28,
            ),
        );
        leaves.insert((4, 0), r(3 << 26, 0, 0, 0)); // 4 cores per package
        leaves.insert((5, 0), r(0, 0, 0, 0x11142120)); // mwait sub-states
        leaves.insert((6, 0), r(1 << 2, 0, 0, 0)); // ARAT
        leaves.insert((7, 0), r(0, 0, 1 << 13, 1 << 18)); // TME, PCONFIG
        leaves.insert((0xb, 0), r(1, 2, 0, 4)); // SMT level: 1 bit
        leaves.insert((0xb, 1), r(4, 8, 0, 4)); // core level: 4 bits
        leaves.insert((0x15, 0), r(2, 168, 0, 0)); // ratio 84, no clock
        leaves.insert((0x8000_0000, 0), r(0x8000_0008, 0, 0, 0));
        leaves.insert((0x8000_0001, 0), r(0, 0, 0, 1 << 27 | 1 << 29));
        FakeCpu {
            leaves,
            msrs: HashMap::new(),
        }
    }

    #[test]
    fn kbl_enumeration() {
        let mut fake = kbl();
        let e = enumerate(&fake.leaves_clone(), &mut fake, FeatureFilters::default());
        assert_eq!(e.vendor, Vendor::Intel);
        assert_eq!(e.version.model, 0x9e);
        assert_eq!(e.cache_line, 64);
        assert!(e.features.has(Feature::TscDeadline));
        assert!(e.features.has(Feature::Lm));
        // Model-keyed fallback: 24 MHz crystal, enumerated ratio 84.
        assert_eq!(e.clk, 24_000_000);
        assert_eq!(e.rat, 84);
        assert_eq!(e.tsc_hz(), 2_016_000_000);
        // Topology from leaf 0xb: thread bit 0, core bits 3:1.
        assert_eq!(e.topology[0], 0);
        assert_eq!(e.topology[1], 2);
    }

    impl FakeCpu {
        fn leaves_clone(&self) -> FakeCpu {
            FakeCpu {
                leaves: self.leaves.clone(),
                msrs: HashMap::new(),
            }
        }
    }

    #[test]
    fn filters_downgrade() {
        let mut fake = kbl();
        let e = enumerate(
            &fake.leaves_clone(),
            &mut fake,
            FeatureFilters {
                nodl: true,
                nopcid: true,
                nomktme: true,
                ..Default::default()
            },
        );
        assert!(!e.features.has(Feature::TscDeadline));
        assert!(!e.features.has(Feature::Pcid));
        assert!(!e.features.has(Feature::Tme));
        assert!(!e.features.has(Feature::Pconfig));
        // Downgrade only: unrelated features survive.
        assert!(e.features.has(Feature::Monitor));

        // Without the filter the encryption features stay visible.
        let e = enumerate(&fake.leaves_clone(), &mut fake, FeatureFilters::default());
        assert!(e.features.has(Feature::Tme));
        assert!(e.features.has(Feature::Pconfig));
    }

    #[test]
    fn pstates_pin_to_guaranteed() {
        let mut fake = kbl();
        let mut e = enumerate(&fake.leaves_clone(), &mut fake, FeatureFilters::default());
        // HWP capable: lowest 8, guaranteed 20, highest 42.
        e.features = FeatureSet::new({
            let mut w = [0u32; FEATURE_WORDS];
            w[2] = 1 << 7;
            w
        });
        fake.msrs.insert(Msr::IA32_HWP_CAPABILITIES.0, 8 << 24 | 20 << 8 | 42);

        setup_pstates(
            &e,
            &mut fake,
            FeatureFilters {
                nocpst: true,
                ..Default::default()
            },
        );
        assert_eq!(fake.msrs[&Msr::IA32_PM_ENABLE.0], 1);
        assert_eq!(fake.msrs[&Msr::IA32_HWP_REQUEST.0], 20 << 16 | 42 << 8 | 8);

        // Unfiltered, the request targets the highest level.
        setup_pstates(&e, &mut fake, FeatureFilters::default());
        assert_eq!(fake.msrs[&Msr::IA32_HWP_REQUEST.0], 42 << 16 | 42 << 8 | 8);
    }

    #[test]
    fn pstates_eist_turbo_disengage() {
        let mut fake = kbl();
        let mut e = enumerate(&fake.leaves_clone(), &mut fake, FeatureFilters::default());
        // EIST + turbo, no HWP.
        e.features = FeatureSet::new({
            let mut w = [0u32; FEATURE_WORDS];
            w[0] = 1 << 7;
            w[2] = 1 << 1;
            w
        });
        fake.msrs.insert(Msr::PLATFORM_INFO.0, 34 << 8);
        fake.msrs.insert(Msr::TURBO_RATIO_LIMIT.0, 40);

        setup_pstates(
            &e,
            &mut fake,
            FeatureFilters {
                nocpst: true,
                ..Default::default()
            },
        );
        // EIST enabled, turbo disengaged, guaranteed ratio requested.
        assert_ne!(fake.msrs[&Msr::IA32_MISC_ENABLE.0] & 1 << 16, 0);
        let ctl = fake.msrs[&Msr::IA32_PERF_CTL.0];
        assert_ne!(ctl & 1 << 32, 0);
        assert_eq!(ctl >> 8 & 0xff, 34);
    }

    #[test]
    fn sandy_bridge_bus_clock() {
        let mut fake = kbl();
        // Model 0x2a: 100 MHz scaled bus, ratio from PLATFORM_INFO.
        fake.leaves.insert((0, 0), r(0xd, 0x756e6547, 0x6c65746e, 0x49656e69));
        fake.leaves.insert(
            (1, 0),
            r(0x000206a7, 4 << 24 | 8 << 8, 1 << 3, 1 << 22 | 1 << 28),
        );
        fake.leaves.remove(&(0x15, 0));
        fake.msrs.insert(Msr::PLATFORM_INFO.0, 34 << 8);
        let e = enumerate(&fake.leaves_clone(), &mut fake, FeatureFilters::default());
        assert_eq!(e.version.model, 0x2a);
        assert_eq!(e.clk, 100_000_000);
        assert_eq!(e.rat, 34);
    }

    #[test]
    fn cstate_hint_table() {
        let mut fake = kbl();
        let e = enumerate(&fake.leaves_clone(), &mut fake, FeatureFilters::default());
        let hints = cstate_hints(&e, FeatureFilters::default());
        assert_ne!(hints, 0);
        // C0 keeps the sentinel byte.
        assert_eq!(cstate_hint(hints, Cstate::C0), 0xf0);
        // C1 supported: hint index 0, substates 0x2 -> 0x01.
        assert_eq!(cstate_hint(hints, Cstate::C1), 0x01);

        // Filtered out entirely.
        assert_eq!(
            cstate_hints(
                &e,
                FeatureFilters {
                    noccst: true,
                    ..Default::default()
                }
            ),
            0
        );
    }

    #[test]
    fn cstate_pick_thresholds() {
        assert_eq!(pick_cstate(0), Cstate::C0);
        assert_eq!(pick_cstate(79), Cstate::C1);
        assert_eq!(pick_cstate(80), Cstate::C3);
        assert_eq!(pick_cstate(150), Cstate::C6);
        assert_eq!(pick_cstate(255), Cstate::C7);
        assert_eq!(pick_cstate(338), Cstate::C8);
        assert_eq!(pick_cstate(1033), Cstate::C9);
        assert_eq!(pick_cstate(1034), Cstate::C10);
    }

    #[test]
    fn cr4_composition() {
        let mut fake = kbl();
        let e = enumerate(&fake.leaves_clone(), &mut fake, FeatureFilters::default());
        let cr4 = e.cr4_set();
        assert_ne!(cr4 & x86defs::X64_CR4_MCE, 0);
        assert_ne!(cr4 & x86defs::X64_CR4_PCIDE, 0);
        assert_ne!(cr4 & x86defs::X64_CR4_OSXSAVE, 0);
        assert_eq!(cr4 & x86defs::X64_CR4_SMAP, 0);
    }
}
