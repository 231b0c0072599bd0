// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! AArch64 per-CPU identification and EL2 trap configuration.

use aarch64defs::CpuFeature;
use aarch64defs::DbgFeature;
use aarch64defs::IsaFeature;
use aarch64defs::MemFeature;

/// The identification-register file captured once per CPU: 4-bit
/// nibble fields packed into 64-bit words.
#[derive(Clone, Debug, Default)]
pub struct FeatureWords {
    /// ID_AA64PFR0..2.
    pub cpu64: [u64; 3],
    /// ID_AA64DFR0..1.
    pub dbg64: [u64; 2],
    /// ID_AA64ISAR0..3.
    pub isa64: [u64; 4],
    /// ID_AA64MMFR0..4.
    pub mem64: [u64; 5],
}

impl FeatureWords {
    pub fn cpu(&self, f: CpuFeature) -> u8 {
        bitops::nibble(&self.cpu64, f as usize)
    }

    pub fn dbg(&self, f: DbgFeature) -> u8 {
        bitops::nibble(&self.dbg64, f as usize)
    }

    pub fn isa(&self, f: IsaFeature) -> u8 {
        bitops::nibble(&self.isa64, f as usize)
    }

    pub fn mem(&self, f: MemFeature) -> u8 {
        bitops::nibble(&self.mem64, f as usize)
    }

    /// Physical address width advertised by the translation hardware.
    pub fn pa_bits(&self) -> u8 {
        aarch64defs::pa_range_bits(self.mem(MemFeature::PaRange))
    }

    /// Whether 16-bit VMIDs are implemented.
    pub fn vmid16(&self) -> bool {
        self.mem(MemFeature::VmidBits) == 2
    }

    /// Whether VHE (E2H) is implemented.
    pub fn vhe(&self) -> bool {
        self.mem(MemFeature::Vh) != 0
    }
}

/// Immutable trap configuration, computed once during `init` on each
/// CPU and never mutated afterwards.
#[derive(Copy, Clone, Debug, Default)]
pub struct TrapConfig {
    /// Bits the hardware treats as reserved-zero in HCR_EL2 on this
    /// CPU, discovered from the feature words.
    pub res0_hcr: u64,
    /// Reserved-zero bits in HCRX_EL2.
    pub res0_hcrx: u64,
}

impl TrapConfig {
    /// Derives the per-CPU RES0 masks from the feature words: a trap
    /// bit for an unimplemented facility must stay zero.
    pub fn discover(features: &FeatureWords) -> TrapConfig {
        let mut res0_hcr = 0;
        if features.cpu(CpuFeature::Mte) < 2 {
            res0_hcr |= aarch64defs::HCR_ATA;
        }
        if features.cpu(CpuFeature::Ras) == 0 {
            res0_hcr |= aarch64defs::HCR_TERR | aarch64defs::HCR_FIEN;
        }
        if features.mem(MemFeature::Nv) == 0 {
            res0_hcr |= aarch64defs::HCR_NV | aarch64defs::HCR_NV1 | aarch64defs::HCR_NV2;
        }
        if features.isa(IsaFeature::Apa) == 0
            && features.isa(IsaFeature::Api) == 0
            && features.isa(IsaFeature::Apa3) == 0
        {
            res0_hcr |= aarch64defs::HCR_APK;
        }
        if !features.vhe() {
            res0_hcr |= aarch64defs::HCR_E2H;
        }
        TrapConfig {
            res0_hcr,
            res0_hcrx: 0,
        }
    }

    /// Filters a guest-proposed HCR value: bits the hypervisor must
    /// keep set stay set, bits that must stay clear (and the per-CPU
    /// RES0 bits) are cleared.
    pub fn constrain_hcr(&self, v: u64) -> u64 {
        (v | aarch64defs::HYP1_HCR) & !(self.res0_hcr | aarch64defs::HYP0_HCR)
    }

    pub fn constrain_hcrx(&self, v: u64) -> u64 {
        (v | aarch64defs::HYP1_HCRX) & !(self.res0_hcrx | aarch64defs::HYP0_HCRX)
    }

    /// The MDCR_EL2 value this CPU runs with.
    pub fn mdcr(&self) -> u64 {
        aarch64defs::HYP1_MDCR
    }

    /// The CPTR_EL2 value this CPU runs with.
    pub fn cptr(&self) -> u64 {
        aarch64defs::HYP1_CPTR
    }
}

/// Identity captured from MIDR/MPIDR on the running CPU.
#[derive(Copy, Clone, Debug, Default)]
pub struct CpuIdentity {
    pub midr: u64,
    pub mpidr: u64,
}

impl CpuIdentity {
    /// Packed Aff3.Aff2.Aff1.Aff0 affinity.
    pub fn affinity(&self) -> u32 {
        aarch64defs::affinity_pack(self.mpidr)
    }
}
