// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! 5.2.9: Fixed ACPI Description Table (FADT).

use crate::packed_nums::*;
use crate::Gas;
use crate::Table;
use core::mem::size_of;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct Fadt {
    // 36
    pub facs32: u32_le,
    pub dsdt32: u32_le,
    // 44
    pub int_model: u8,
    pub pm_profile: u8,
    pub sci_irq: u16_le,
    // 48
    pub smi_cmd: u32_le,
    pub acpi_enable: u8,
    pub acpi_disable: u8,
    pub s4_bios_req: u8,
    pub pstate_cnt: u8,
    // 56
    pub pm1a_evt_blk: u32_le,
    pub pm1b_evt_blk: u32_le,
    pub pm1a_cnt_blk: u32_le,
    pub pm1b_cnt_blk: u32_le,
    pub pm2_cnt_blk: u32_le,
    pub pm_tmr_blk: u32_le,
    pub gpe0_blk: u32_le,
    pub gpe1_blk: u32_le,
    // 88
    pub pm1_evt_len: u8,
    pub pm1_cnt_len: u8,
    pub pm2_cnt_len: u8,
    pub pm_tmr_len: u8,
    pub gpe0_blk_len: u8,
    pub gpe1_blk_len: u8,
    pub gpe1_base: u8,
    pub cstate_cnt: u8,
    // 96
    pub p_lvl2_lat: u16_le,
    pub p_lvl3_lat: u16_le,
    pub flush_size: u16_le,
    pub flush_stride: u16_le,
    // 104
    pub duty_offset: u8,
    pub duty_width: u8,
    pub day_alarm: u8,
    pub mon_alarm: u8,
    pub century: u8,
    // 109
    pub bflg_x86: u16_le,
    pub rsvd: u8,
    // 112
    pub fflg: u32_le,
    // 116
    pub reset_reg: Gas,
    pub reset_val: u8,
    pub bflg_arm: u16_le,
    pub minor_version: u8,
    // 132
    pub facs64: u64_le,
    pub dsdt64: u64_le,
    // 148
    pub x_pm1a_evt_blk: Gas,
    pub x_pm1b_evt_blk: Gas,
    pub x_pm1a_cnt_blk: Gas,
    pub x_pm1b_cnt_blk: Gas,
    pub x_pm2_cnt_blk: Gas,
    pub x_pm_tmr_blk: Gas,
    pub x_gpe0_blk: Gas,
    pub x_gpe1_blk: Gas,
    // 244
    pub sleep_cnt: Gas,
    pub sleep_sts: Gas,
    // 268
    pub hypervisor_vendor_id: u64_le,
}

const_assert_eq!(size_of::<Fadt>(), 276 - size_of::<crate::Header>());

impl Table for Fadt {
    const SIGNATURE: [u8; 4] = *b"FACP";
    const MIN_LENGTH: u32 = 244;
}

/// Reset register is declared and usable.
pub const FADT_RESET_REG_SUP: u32 = 1 << 10;
/// HW-reduced ACPI: only the sleep control/status registers exist.
pub const FADT_HW_REDUCED: u32 = 1 << 20;
/// Low-power S0 idle is preferred over S3.
pub const FADT_LOW_POWER_S0: u32 = 1 << 21;

/// ARM boot flag: PSCI is implemented.
pub const FADT_ARM_PSCI_COMPLIANT: u16 = 1 << 0;
/// ARM boot flag: PSCI calls use HVC rather than SMC.
pub const FADT_ARM_PSCI_USE_HVC: u16 = 1 << 1;
