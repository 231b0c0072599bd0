// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! CPU identification leaves and the cached feature-word map.

use open_enum::open_enum;

open_enum! {
    /// Cpuid leaf numbers consumed during bring-up.
    pub enum CpuidFunction: u32 {
        VENDOR_AND_MAX = 0x0,
        VERSION_AND_FEATURES = 0x1,
        CACHE_PARAMETERS = 0x4,
        MONITOR_MWAIT = 0x5,
        POWER_MANAGEMENT = 0x6,
        EXTENDED_FEATURES = 0x7,
        EXTENDED_TOPOLOGY = 0xb,
        EXTENDED_STATE = 0xd,
        CORE_CRYSTAL = 0x15,
        V2_EXTENDED_TOPOLOGY = 0x1f,
        EXTENDED_MAX = 0x8000_0000,
        EXTENDED_VERSION_AND_FEATURES = 0x8000_0001,
        BRAND0 = 0x8000_0002,
        BRAND1 = 0x8000_0003,
        BRAND2 = 0x8000_0004,
        SVM_FEATURES = 0x8000_000a,
    }
}

/// Output registers of one cpuid invocation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuidResult {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// CPU vendors recognized during enumeration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Vendor {
    Unknown,
    Amd,
    Intel,
}

impl Vendor {
    /// Decodes the 12-byte vendor signature from leaf 0 (ebx:edx:ecx).
    pub fn from_signature(ebx: u32, ecx: u32, edx: u32) -> Vendor {
        let mut sig = [0u8; 12];
        sig[..4].copy_from_slice(&ebx.to_le_bytes());
        sig[4..8].copy_from_slice(&edx.to_le_bytes());
        sig[8..].copy_from_slice(&ecx.to_le_bytes());
        match &sig {
            b"AuthenticAMD" => Vendor::Amd,
            b"GenuineIntel" => Vendor::Intel,
            _ => Vendor::Unknown,
        }
    }
}

/// Number of cached feature words; see [`Feature`] for the layout.
pub const FEATURE_WORDS: usize = 13;

/// Feature bits, encoded as `word * 32 + bit` into the cached array:
///
/// | word | source |
/// |---|---|
/// | 0, 1 | leaf 1 ecx, edx |
/// | 2 | leaf 6 eax |
/// | 3..=5 | leaf 7.0 ebx, ecx, edx |
/// | 6..=9 | leaf 7.1 eax, ebx, ecx, edx |
/// | 10 | leaf 7.2 edx |
/// | 11, 12 | leaf 0x80000001 ecx, edx |
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Feature {
    Monitor = 3,         // 1.ecx
    Vmx = 5,             // 1.ecx
    Eist = 7,            // 1.ecx
    Pcid = 17,           // 1.ecx
    X2apic = 21,         // 1.ecx
    TscDeadline = 24,    // 1.ecx
    Xsave = 26,          // 1.ecx
    Mce = 32 + 7,        // 1.edx
    Sep = 32 + 11,       // 1.edx
    Acpi = 32 + 22,      // 1.edx
    Htt = 32 + 28,       // 1.edx
    TurboBoost = 64 + 1, // 6.eax
    Arat = 64 + 2,       // 6.eax
    Hwp = 64 + 7,        // 6.eax
    Smep = 96 + 7,       // 7.0.ebx
    Smap = 96 + 20,      // 7.0.ebx
    Umip = 128 + 2,      // 7.0.ecx
    Tme = 128 + 13,      // 7.0.ecx
    Rdpid = 128 + 22,    // 7.0.ecx
    Pconfig = 160 + 18,  // 7.0.edx
    Svm = 352 + 2,       // 0x80000001.ecx
    Rdtscp = 384 + 27,   // 0x80000001.edx
    Lm = 384 + 29,       // 0x80000001.edx
}

/// The cached feature-word array with downgrade-only masking.
#[derive(Copy, Clone, Debug, Default)]
pub struct FeatureSet {
    words: [u32; FEATURE_WORDS],
}

impl FeatureSet {
    pub fn new(words: [u32; FEATURE_WORDS]) -> Self {
        FeatureSet { words }
    }

    pub fn has(&self, f: Feature) -> bool {
        let v = f as u32;
        self.words[v as usize / 32] >> (v % 32) & 1 != 0
    }

    /// Removes a feature from the cached view. Features are never
    /// added back; command-line filters may only downgrade.
    pub fn defeature(&mut self, f: Feature) {
        let v = f as u32;
        self.words[v as usize / 32] &= !(1 << (v % 32));
    }
}

/// Family/model/stepping decoded from leaf 1 eax, extended fields
/// folded in.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionInfo {
    pub family: u32,
    pub model: u32,
    pub stepping: u32,
}

impl VersionInfo {
    pub fn from_eax(eax: u32) -> Self {
        VersionInfo {
            family: (eax >> 8 & 0xf) + (eax >> 20 & 0xff),
            model: (eax >> 4 & 0xf) + (eax >> 12 & 0xf0),
            stepping: eax & 0xf,
        }
    }
}

/// One row of the model-specific bus-clock table: the nominal clock is
/// `100 MHz * mul / div`.
#[derive(Copy, Clone, Debug)]
pub struct ScaleableBus {
    pub mul: u32,
    pub div: u32,
}

/// Bus clocks for big-core parts without crystal enumeration, indexed
/// by FSB_FREQ.
pub const FREQ_CORE: &[ScaleableBus] = &[
    ScaleableBus { mul: 8, div: 3 },  // 266.67 MHz
    ScaleableBus { mul: 4, div: 3 },  // 133.33 MHz
    ScaleableBus { mul: 2, div: 1 },  // 200.00 MHz
    ScaleableBus { mul: 5, div: 3 },  // 166.67 MHz
    ScaleableBus { mul: 10, div: 3 }, // 333.33 MHz
    ScaleableBus { mul: 1, div: 1 },  // 100.00 MHz
    ScaleableBus { mul: 4, div: 1 },  // 400.00 MHz
];

/// Bus clocks for small-core parts, indexed by FSB_FREQ.
pub const FREQ_ATOM: &[ScaleableBus] = &[
    ScaleableBus { mul: 5, div: 6 },   // 83.33 MHz
    ScaleableBus { mul: 1, div: 1 },   // 100.00 MHz
    ScaleableBus { mul: 4, div: 3 },   // 133.33 MHz
    ScaleableBus { mul: 7, div: 6 },   // 116.67 MHz
    ScaleableBus { mul: 4, div: 5 },   // 80.00 MHz
    ScaleableBus { mul: 14, div: 15 }, // 93.33 MHz
    ScaleableBus { mul: 9, div: 10 },  // 90.00 MHz
    ScaleableBus { mul: 8, div: 9 },   // 88.89 MHz
    ScaleableBus { mul: 10, div: 12 }, // 83.33 MHz
];
