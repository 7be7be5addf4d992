// ABOUTME: Slave-side error taxonomy, with wire-code numbering fixed by declaration order
// ABOUTME: Each variant's discriminant plus config.sci_error_offset is the value placed in a response's error field

use crate::codec::CodecError;
use thiserror::Error;

/// Slave-side protocol errors. Declaration order is load-bearing: `wire_code`
/// numbers each variant by its position here, so `RequestIdentifierNotFound`
/// is fixed at discriminant 6 regardless of how the enum is refactored.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlaveError {
    #[error("persistent variable partition table exhausted")]
    NvPartitionTableExhausted,

    #[error("variable number {0} is out of range")]
    VarNumberInvalid(i16),

    #[error("unknown variable datatype")]
    UnknownDatatype,

    #[error("no NV address assigned for variable index {0}")]
    NvAddressUnknown(usize),

    #[error("NV read failed at address {0:#06x}")]
    NvReadFailed(u16),

    #[error("NV write failed at address {0:#06x}")]
    NvWriteFailed(u16),

    #[error("no identifier byte found in request")]
    RequestIdentifierNotFound,

    #[error("variable/command number could not be decoded as hex")]
    VariableNumberConversionFailed,

    #[error("request value could not be decoded as hex")]
    RequestValueConversionFailed,

    #[error("request number {0} has no matching command")]
    RequestUnknown(i16),

    #[error("upstream request for #{0} received without a pending UPS transfer")]
    UpstreamNotInitiated(i16),
}

impl SlaveError {
    /// The discriminant used for wire-code numbering, independent of enum
    /// representation (kept explicit rather than `as u16` on a `#[repr]`
    /// enum, since several variants carry data).
    pub fn discriminant(&self) -> u16 {
        match self {
            SlaveError::NvPartitionTableExhausted => 0,
            SlaveError::VarNumberInvalid(_) => 1,
            SlaveError::UnknownDatatype => 2,
            SlaveError::NvAddressUnknown(_) => 3,
            SlaveError::NvReadFailed(_) => 4,
            SlaveError::NvWriteFailed(_) => 5,
            SlaveError::RequestIdentifierNotFound => 6,
            SlaveError::VariableNumberConversionFailed => 7,
            SlaveError::RequestValueConversionFailed => 8,
            SlaveError::RequestUnknown(_) => 9,
            SlaveError::UpstreamNotInitiated(_) => 10,
        }
    }

    /// The error code placed in a response's `error` field:
    /// `sci_error_offset + discriminant`.
    pub fn wire_code(&self, sci_error_offset: u16) -> u16 {
        sci_error_offset + self.discriminant()
    }
}

impl From<CodecError> for SlaveError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::RequestIdentifierNotFound => SlaveError::RequestIdentifierNotFound,
            CodecError::VariableNumberConversionFailed => {
                SlaveError::VariableNumberConversionFailed
            }
            CodecError::RequestValueConversionFailed | CodecError::NumberConversionFailed => {
                SlaveError::RequestValueConversionFailed
            }
            CodecError::AcknowledgeUnknown => SlaveError::RequestIdentifierNotFound,
        }
    }
}
