// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Microhypervisor core composition.
//!
//! Wires the subsystem crates together in boot order: command line,
//! firmware discovery (ACPI, devicetree fallback), then interrupt,
//! IOMMU and console construction driven by the discovered platform.
//! The capability/IPC layer sits on top of the re-exported boundary.

pub mod cmdline;
pub mod init;

pub use cmdline::Options;
pub use init::ResumeControl;

pub use capdefs::Status;
pub use firmware::Platform;
