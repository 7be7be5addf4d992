// ABOUTME: Master-side result callbacks and repeat/abort control returned from them
// ABOUTME: Trait-based callback surface, analogous to a client-side delivery-receipt handler

use crate::codec::AckKind;

/// What the engine should do after a callback has inspected a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferAck {
    /// Release the protocol back to Idle.
    Success,
    /// Resubmit the last request verbatim.
    RepeatRequest,
    /// Release the protocol back to Idle without resubmitting.
    Abort,
}

/// Result callbacks invoked by the master transfer engine's control routine.
pub trait MasterCallbacks {
    fn on_setvar(&mut self, ack: AckKind, num: i16, error: u16) -> TransferAck;

    fn on_getvar(&mut self, ack: AckKind, num: i16, value: u32, error: u16) -> TransferAck;

    /// `buf` is `None` for any ack other than `SuccessData`.
    fn on_command(&mut self, ack: AckKind, num: i16, buf: Option<&[u32]>, error: u16) -> TransferAck;

    /// Invoked once the upstream payload is fully received; the protocol
    /// releases unconditionally afterward.
    fn on_upstream(&mut self, num: i16, buf: &[u8]);
}
