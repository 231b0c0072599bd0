// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The narrow boundary exported to the capability/IPC layer: status
//! codes, message-transfer descriptors, syscall argument decoders and
//! the memory-space factories.

pub mod cont;
pub mod mtd;
pub mod space;
pub mod syscall;

pub use space::SpaceDma;
pub use space::SpaceHst;

/// Status codes returned across the syscall boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Status {
    #[error("success")]
    Success,
    #[error("operation timed out")]
    Timeout,
    #[error("operation aborted")]
    Aborted,
    #[error("counter overflow")]
    Overflow,
    #[error("invalid hypercall")]
    BadHyp,
    #[error("invalid capability")]
    BadCap,
    #[error("invalid parameter")]
    BadPar,
    #[error("invalid feature")]
    BadFtr,
    #[error("invalid CPU")]
    BadCpu,
    #[error("invalid device")]
    BadDev,
    #[error("out of kernel memory")]
    MemObj,
    #[error("out of capability space")]
    MemCap,
}

impl From<page_table::PtabError> for Status {
    fn from(e: page_table::PtabError) -> Status {
        match e {
            page_table::PtabError::AllocFailed => Status::MemObj,
            page_table::PtabError::Misaligned => Status::BadPar,
        }
    }
}

impl From<iommu::IommuError> for Status {
    fn from(e: iommu::IommuError) -> Status {
        match e {
            iommu::IommuError::SdidExhausted => Status::MemObj,
            iommu::IommuError::BadStream => Status::BadDev,
            iommu::IommuError::Timeout => Status::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mapping() {
        assert_eq!(Status::from(page_table::PtabError::AllocFailed), Status::MemObj);
        assert_eq!(Status::from(page_table::PtabError::Misaligned), Status::BadPar);
        assert_eq!(Status::from(iommu::IommuError::SdidExhausted), Status::MemObj);
        assert_eq!(Status::from(iommu::IommuError::Timeout), Status::Timeout);
    }
}
