// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Definitions for the Power State Coordination Interface (PSCI).

use bitfield_struct::bitfield;
use open_enum::open_enum;

/// SMC fast-call function id layout.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct FastCall {
    pub number: u16,
    pub hint: bool,
    #[bits(7)]
    pub mbz: u8,
    #[bits(6)]
    pub service: u8,
    pub smc64: bool,
    pub fast: bool,
}

open_enum! {
    pub enum PsciCall: FastCall {
        PSCI_VERSION = FastCall(0x8400_0000),
        CPU_SUSPEND = FastCall(0x8400_0001),
        CPU_OFF = FastCall(0x8400_0002),
        CPU_ON = FastCall(0x8400_0003),
        AFFINITY_INFO = FastCall(0x8400_0004),
        SYSTEM_OFF = FastCall(0x8400_0008),
        SYSTEM_RESET = FastCall(0x8400_0009),
        PSCI_FEATURES = FastCall(0x8400_000a),
        SYSTEM_SUSPEND = FastCall(0x8400_000e),
    }
}

/// The SMC64 variant of a call.
pub const fn smc64(call: PsciCall) -> u32 {
    call.0 .0 | 1 << 30
}

open_enum! {
    pub enum PsciError: i32 {
        SUCCESS = 0,
        NOT_SUPPORTED = -1,
        INVALID_PARAMETERS = -2,
        DENIED = -3,
        ALREADY_ON = -4,
        ON_PENDING = -5,
        INTERNAL_FAILURE = -6,
        NOT_PRESENT = -7,
        DISABLED = -8,
        INVALID_ADDRESS = -9,
    }
}
