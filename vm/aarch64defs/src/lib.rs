// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! ARM64 type and constant definitions: EL2 trap configuration,
//! identification registers and the interrupt controller.

#![no_std]
#![forbid(unsafe_code)]

pub mod gic;
pub mod psci;

// HCR_EL2 bit assignments.
pub const HCR_VM: u64 = 1 << 0;
pub const HCR_SWIO: u64 = 1 << 1;
pub const HCR_PTW: u64 = 1 << 2;
pub const HCR_FMO: u64 = 1 << 3;
pub const HCR_IMO: u64 = 1 << 4;
pub const HCR_AMO: u64 = 1 << 5;
pub const HCR_FB: u64 = 1 << 9;
pub const HCR_BSU_INNER: u64 = 1 << 10;
pub const HCR_DC: u64 = 1 << 12;
pub const HCR_TWI: u64 = 1 << 13;
pub const HCR_TWE: u64 = 1 << 14;
pub const HCR_TID0: u64 = 1 << 15;
pub const HCR_TID1: u64 = 1 << 16;
pub const HCR_TID2: u64 = 1 << 17;
pub const HCR_TID3: u64 = 1 << 18;
pub const HCR_TSC: u64 = 1 << 19;
pub const HCR_TIDCP: u64 = 1 << 20;
pub const HCR_TACR: u64 = 1 << 21;
pub const HCR_TSW: u64 = 1 << 22;
pub const HCR_TGE: u64 = 1 << 27;
pub const HCR_CD: u64 = 1 << 32;
pub const HCR_ID: u64 = 1 << 33;
pub const HCR_E2H: u64 = 1 << 34;
pub const HCR_TLOR: u64 = 1 << 35;
pub const HCR_TERR: u64 = 1 << 36;
pub const HCR_APK: u64 = 1 << 40;
pub const HCR_NV: u64 = 1 << 42;
pub const HCR_NV1: u64 = 1 << 43;
pub const HCR_NV2: u64 = 1 << 45;
pub const HCR_FIEN: u64 = 1 << 47;
pub const HCR_ENSCXT: u64 = 1 << 53;
pub const HCR_ATA: u64 = 1 << 56;
pub const HCR_TID5: u64 = 1 << 58;

/// HCR bits that must never be set: facilities the hypervisor either
/// emulates itself or must not let a guest redirect.
pub const HYP0_HCR: u64 = HCR_ATA     // Trap GCR, RGSR, TFSR*
    | HCR_ENSCXT                      // Trap SCXTNUM
    | HCR_FIEN                        // Trap ERXPFG*
    | HCR_NV2
    | HCR_NV1
    | HCR_NV
    | HCR_APK                         // Trap APDAKey*, APDBKey*, APGAKey*, APIAKey*, APIBKey*
    | HCR_E2H
    | HCR_ID
    | HCR_CD
    | HCR_TGE
    | HCR_DC;

/// HCR bits that must always be set: the trap floor that keeps EL1
/// confined.
pub const HYP1_HCR: u64 = HCR_TID5    // Trap GMID
    | HCR_TERR                        // Trap ERRIDR, ERRSELR, ERXADDR, ERXCTLR, ERXFR, ERXMISC*, ERXSTATUS
    | HCR_TLOR                        // Trap LORC, LOREA, LORID, LORN, LORSA
    | HCR_TSW                         // Trap DC ISW/CSW/CISW
    | HCR_TACR                        // Trap ACTLR
    | HCR_TIDCP                       // Trap S3_* implementation defined registers
    | HCR_TSC                         // Trap SMC
    | HCR_TID3                        // Trap ID_AA64*, ID_*, MVFR*
    | HCR_TID1                        // Trap AIDR, REVIDR
    | HCR_TID0                        // Trap JIDR
    | HCR_TWE                         // Trap WFE
    | HCR_TWI                         // Trap WFI
    | HCR_BSU_INNER
    | HCR_FB
    | HCR_AMO
    | HCR_IMO
    | HCR_FMO
    | HCR_PTW
    | HCR_SWIO
    | HCR_VM;

pub const HYP0_HCRX: u64 = 0;
pub const HYP1_HCRX: u64 = 0;

// MDCR_EL2 bit assignments.
pub const MDCR_TPM: u64 = 1 << 6;
pub const MDCR_TDE: u64 = 1 << 8;
pub const MDCR_E2PB: u64 = 0b11 << 12;
pub const MDCR_TPMS: u64 = 1 << 14;
pub const MDCR_TTRF: u64 = 1 << 19;
pub const MDCR_E2TB: u64 = 0b11 << 24;
pub const MDCR_TDCC: u64 = 1 << 27;

/// MDCR fields that stay zero so the trace and profiling buffers
/// remain owned by EL2.
pub const HYP0_MDCR: u64 = MDCR_E2TB  // Trap trace buffer controls: TRB*
    | MDCR_E2PB;                      // Trap profiling buffer control: PMB*

pub const HYP1_MDCR: u64 = MDCR_TDCC  // Trap debug comms channel
    | MDCR_TTRF                       // Trap trace filter: TRFCR
    | MDCR_TPMS                       // Trap performance monitor sampling: PMS*
    | MDCR_TDE                        // Trap all of TDRA+TDOSA+TDA
    | MDCR_TPM;                       // Trap performance monitor access: PMCR, PM*

// CPTR_EL2 bit assignments (E2H clear).
pub const CPTR_TZ: u64 = 1 << 8;
pub const CPTR_TTA: u64 = 1 << 20;
pub const CPTR_TAM: u64 = 1 << 30;

pub const HYP0_CPTR: u64 = 0;
pub const HYP1_CPTR: u64 = CPTR_TAM   // Trap activity monitor: AM*
    | CPTR_TTA                        // Trap trace registers
    | CPTR_TZ;                        // Trap ZCR

/// Packs an MPIDR affinity value into Aff3[31:24] Aff2[23:16]
/// Aff1[15:8] Aff0[7:0] format.
pub const fn affinity_pack(mpidr: u64) -> u32 {
    ((mpidr >> 8 & 0xff00_0000) | (mpidr & 0x00ff_ffff)) as u32
}

/// Masks an MPIDR down to its affinity fields,
/// Aff3[39:32] Aff2[23:16] Aff1[15:8] Aff0[7:0].
pub const fn affinity_bits(mpidr: u64) -> u64 {
    mpidr & 0x0000_00ff_00ff_ffff
}

/// ID_AA64PFRx nibble selectors.
#[derive(Copy, Clone, Debug)]
#[repr(usize)]
pub enum CpuFeature {
    El0 = 0,
    El1 = 1,
    El2 = 2,
    El3 = 3,
    Fp = 4,
    AdvSimd = 5,
    Gic = 6,
    Ras = 7,
    Sve = 8,
    Sel2 = 9,
    Mpam = 10,
    Amu = 11,
    Dit = 12,
    Rme = 13,
    Csv2 = 14,
    Csv3 = 15,
    Bt = 16,
    Ssbs = 17,
    Mte = 18,
    Sme = 22,
    Nmi = 25,
    Gcs = 27,
}

/// ID_AA64DFRx nibble selectors.
#[derive(Copy, Clone, Debug)]
#[repr(usize)]
pub enum DbgFeature {
    DebugVer = 0,
    TraceVer = 1,
    PmuVer = 2,
    Brps = 3,
    Wrps = 5,
    CtxCmps = 7,
    PmsVer = 8,
    DoubleLock = 9,
    TraceFilt = 10,
    TraceBuffer = 11,
    Brbe = 13,
}

/// ID_AA64ISARx nibble selectors.
#[derive(Copy, Clone, Debug)]
#[repr(usize)]
pub enum IsaFeature {
    Aes = 1,
    Sha1 = 2,
    Sha2 = 3,
    Crc32 = 4,
    Atomic = 5,
    Tme = 6,
    Rdm = 7,
    Sha3 = 8,
    Dp = 11,
    Ts = 13,
    Tlb = 14,
    Rndr = 15,
    Dpb = 16,
    Apa = 17,
    Api = 18,
    Gpa = 22,
    Gpi = 23,
    Sb = 25,
    Specres = 26,
    Bf16 = 27,
    I8mm = 29,
    Wfxt = 32,
    Gpa3 = 34,
    Apa3 = 35,
    Mops = 36,
}

/// ID_AA64MMFRx nibble selectors.
#[derive(Copy, Clone, Debug)]
#[repr(usize)]
pub enum MemFeature {
    PaRange = 0,
    AsidBits = 1,
    BigEnd = 2,
    SnsMem = 3,
    TGran16 = 5,
    TGran64 = 6,
    TGran4 = 7,
    Fgt = 14,
    Ecv = 15,
    Hafdbs = 16,
    VmidBits = 17,
    Vh = 18,
    Hpds = 19,
    Pan = 21,
    Xnx = 23,
    Twed = 24,
    Ets = 25,
    Hcx = 26,
    Cnp = 32,
    Uao = 33,
    VaRange = 36,
    Nv = 38,
    Fwb = 42,
    Ttl = 44,
    Bbm = 45,
    Evt = 46,
    E0pd = 47,
    E2h0 = 70,
}

/// Translates the PARange nibble into a physical-address width in bits.
pub const fn pa_range_bits(nibble: u8) -> u8 {
    match nibble {
        0 => 32,
        1 => 36,
        2 => 40,
        3 => 42,
        4 => 44,
        5 => 48,
        6 => 52,
        _ => 56,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_masks_disjoint() {
        // A bit cannot be both forced set and forced clear.
        assert_eq!(HYP0_HCR & HYP1_HCR, 0);
        assert_eq!(HYP0_MDCR & HYP1_MDCR, 0);
        assert_eq!(HYP0_CPTR & HYP1_CPTR, 0);
    }

    #[test]
    fn affinity() {
        let mpidr = 0x0000_00ab_00cd_ef01u64;
        assert_eq!(affinity_pack(mpidr), 0xabcd_ef01);
        assert_eq!(affinity_bits(mpidr | 0xf000_0000), mpidr);
    }

    #[test]
    fn pa_range() {
        assert_eq!(pa_range_bits(0), 32);
        assert_eq!(pa_range_bits(5), 48);
        assert_eq!(pa_range_bits(6), 52);
    }
}
