// ABOUTME: Master-side error taxonomy, surfaced locally to the caller (never wire-encoded)
// ABOUTME: Unlike SlaveError these never cross the wire with an offset; they report local submit/parse failures

use crate::codec::CodecError;
use thiserror::Error;

/// Master-side protocol errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MasterError {
    #[error("variable number {0} is out of range")]
    VarNumberInvalid(i16),

    #[error("unknown variable datatype")]
    UnknownDatatype,

    #[error("no identifier byte found in response")]
    RequestIdentifierNotFound,

    #[error("numeric field could not be decoded as hex")]
    NumberConversionFailed,

    #[error("unrecognized ACK keyword in response")]
    AcknowledgeUnknown,

    #[error("response parameter could not be converted")]
    ParameterConversionFailed,

    #[error("response declared fewer data words than received")]
    ExpectedDatalengthNotMet,

    #[error("request would exceed the configured TX buffer size")]
    MessageExceedsTxBufferSize,

    #[error("feature not implemented")]
    FeatureNotImplemented,
}

impl From<CodecError> for MasterError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::RequestIdentifierNotFound => MasterError::RequestIdentifierNotFound,
            CodecError::VariableNumberConversionFailed | CodecError::NumberConversionFailed => {
                MasterError::NumberConversionFailed
            }
            CodecError::RequestValueConversionFailed => MasterError::ParameterConversionFailed,
            CodecError::AcknowledgeUnknown => MasterError::AcknowledgeUnknown,
        }
    }
}
