// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Flattened DeviceTree blob parsing.
//!
//! Used on AArch64 when ACPI discovery fails. Big-endian throughout.

#![no_std]

pub mod parser;
pub mod spec;
