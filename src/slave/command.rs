// ABOUTME: Slave command-table callback surface and the transfer payload a command hands back
// ABOUTME: Uses Cow's static ownership typing instead of a runtime "who frees this buffer" flag

use crate::codec::AckKind;
use std::borrow::Cow;

/// The payload a command invocation hands back to the transfer engine.
///
/// `Cow` expresses the ownership question statically: a command backed by a
/// `'static` table returns `Borrowed`, one that builds a result on the fly
/// returns `Owned`, and the engine never needs to know which at drop time.
#[derive(Debug, Clone)]
pub enum TransferPayload {
    /// Result words for a `SuccessData` command ack.
    Values(Cow<'static, [u32]>),
    /// Raw bytes for a `SuccessUpstream` command ack.
    Bytes(Cow<'static, [u8]>),
    /// No payload (`Success`, `Error`, or `Unknown` acks).
    None,
}

impl TransferPayload {
    pub fn len(&self) -> usize {
        match self {
            TransferPayload::Values(v) => v.len(),
            TransferPayload::Bytes(b) => b.len(),
            TransferPayload::None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The result of a single command invocation.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub ack: AckKind,
    pub payload: TransferPayload,
}

impl CommandResult {
    pub fn success() -> Self {
        Self {
            ack: AckKind::Success,
            payload: TransferPayload::None,
        }
    }

    pub fn data(values: impl Into<Cow<'static, [u32]>>) -> Self {
        Self {
            ack: AckKind::SuccessData,
            payload: TransferPayload::Values(values.into()),
        }
    }

    pub fn upstream(bytes: impl Into<Cow<'static, [u8]>>) -> Self {
        Self {
            ack: AckKind::SuccessUpstream,
            payload: TransferPayload::Bytes(bytes.into()),
        }
    }

    pub fn error() -> Self {
        Self {
            ack: AckKind::Error,
            payload: TransferPayload::None,
        }
    }
}

/// User-supplied command table. `num` is the 1-origin command number from
/// the request; `values` is the request's value list.
pub trait CommandTable {
    /// Upper bound on command numbers; `num` outside `1..=len()` is
    /// `RequestUnknown`.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn invoke(&mut self, num: i16, values: &[u32]) -> CommandResult;
}
