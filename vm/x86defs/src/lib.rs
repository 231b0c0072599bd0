// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Definitions relating to the x86-64 architecture: control registers,
//! model-specific registers, idle states and the local interrupt
//! controller.

#![no_std]
#![forbid(unsafe_code)]

pub mod apic;
pub mod cpuid;
pub mod msi;

use open_enum::open_enum;

pub const X64_CR4_MCE: u64 = 0x0000000000000040; // Machine check enable
pub const X64_CR4_UMIP: u64 = 0x0000000000000800; // UMIP used by OS
pub const X64_CR4_PCIDE: u64 = 0x0000000000020000; // PCID enabled by OS
pub const X64_CR4_OSXSAVE: u64 = 0x0000000000040000; // XSAVE enabled by OS
pub const X64_CR4_SMEP: u64 = 0x0000000000100000; // Supervisor Mode Execution Protection
pub const X64_CR4_SMAP: u64 = 0x0000000000200000; // Supervisor Mode Access Protection

open_enum! {
    /// Model-specific register addresses.
    pub enum Msr: u32 {
        IA32_PLATFORM_ID = 0x17,
        IA32_APIC_BASE = 0x1b,
        IA32_BIOS_SIGN_ID = 0x8b,
        FSB_FREQ = 0xcd,
        PLATFORM_INFO = 0xce,
        CST_CONFIG = 0xe2,
        IA32_MPERF = 0xe7,
        IA32_APERF = 0xe8,
        IA32_SYSENTER_CS = 0x174,
        IA32_PERF_CTL = 0x199,
        IA32_THERM_INTERRUPT = 0x19b,
        IA32_MISC_ENABLE = 0x1a0,
        TURBO_RATIO_LIMIT = 0x1ad,
        POWER_CTL = 0x1fc,
        IA32_TSC_DEADLINE = 0x6e0,
        IA32_PM_ENABLE = 0x770,
        IA32_HWP_CAPABILITIES = 0x771,
        IA32_HWP_REQUEST = 0x774,
        IA32_STAR = 0xc000_0081,
        IA32_LSTAR = 0xc000_0082,
        IA32_FMASK = 0xc000_0084,
        IA32_KERNEL_GS_BASE = 0xc000_0102,
        IA32_TSC_AUX = 0xc000_0103,
    }
}

open_enum! {
    /// Core idle states, encoded as the bit offset of the state's hint
    /// byte within the per-CPU C-state hint table.
    pub enum Cstate: u32 {
        C0  = 0,
        C1  = 8,
        C3  = 16,
        C6  = 24,
        C7  = 32,
        C8  = 40,
        C9  = 48,
        C10 = 56,
    }
}
