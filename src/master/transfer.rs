// ABOUTME: Master-side response control routine: aggregates paged COMMAND results and switches to upstream stream mode
// ABOUTME: Response parsing is context-aware (continuation COMMAND packets carry no ACK keyword), so it lives here, not in codec.rs

use crate::codec::{self, AckKind, Identifier};
use crate::master::callbacks::{MasterCallbacks, TransferAck};
use crate::master::error::MasterError;
use tracing::{debug, warn};

/// Master-side receive mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    #[default]
    TransactionFrames,
    RawStream,
}

/// What the caller (the `Master` top state machine) should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    ReleaseProtocol,
    Resubmit(codec::Request),
    EnterStreamMode { expected_len: usize },
}

/// Outstanding transaction aggregation state.
#[derive(Debug, Clone)]
struct ActiveTransfer {
    num: i16,
    kind: Identifier,
    /// The original request's value list, kept verbatim so a `RepeatRequest`
    /// ack can resubmit the exact same request rather than a bare identifier.
    values: Vec<u32>,
    expected_total: usize,
    received_total: usize,
    packet_count: usize,
    result_buf: Vec<u32>,
}

#[derive(Debug, Default)]
pub struct MasterTransfer {
    mode: TransferMode,
    active: Option<ActiveTransfer>,
}

impl MasterTransfer {
    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    /// Arms aggregation state for a freshly submitted request, keeping
    /// `values` so a later `RepeatRequest` ack can resend them verbatim.
    pub fn begin(&mut self, num: i16, kind: Identifier, values: Vec<u32>) {
        self.active = Some(ActiveTransfer {
            num,
            kind,
            values,
            expected_total: 0,
            received_total: 0,
            packet_count: 0,
            result_buf: Vec::new(),
        });
    }

    /// Drops aggregation state and frees any transfer-owned buffers.
    pub fn release(&mut self) {
        self.mode = TransferMode::TransactionFrames;
        self.active = None;
    }

    /// Forces raw stream-receive mode without a COMMAND/UPS ack having
    /// triggered it.
    pub fn force_stream_mode(&mut self) {
        self.mode = TransferMode::RawStream;
    }

    /// Parses and handles one received frame against the active transfer.
    pub fn handle_frame(
        &mut self,
        body: &[u8],
        callbacks: &mut dyn MasterCallbacks,
    ) -> Result<ControlOutcome, MasterError> {
        let active = self.active.as_ref().ok_or(MasterError::RequestIdentifierNotFound)?;

        let ident_pos = body
            .iter()
            .position(|&b| Identifier::from_byte(b).is_some())
            .ok_or(MasterError::RequestIdentifierNotFound)?;
        let kind = Identifier::from_byte(body[ident_pos]).expect("position matched from_byte");
        let num = codec::decode_num(&body[..ident_pos])?;
        let tail = &body[ident_pos + 1..];

        let is_continuation =
            kind == Identifier::Command && active.kind == Identifier::Command && active.packet_count > 0;

        if is_continuation {
            let values_part = tail.strip_prefix(b";").unwrap_or(tail);
            let values = codec::parse_value_list(values_part)?;
            return self.handle_command_data(num, values, callbacks);
        }

        let m = codec::check_ack(tail).ok_or(MasterError::AcknowledgeUnknown)?;
        let rest = &tail[m.consumed..];

        match (kind, m.ack) {
            (Identifier::SetVar, AckKind::Success) => {
                let outcome = callbacks.on_setvar(m.ack, num, 0);
                self.finish_or_resubmit(outcome, num, kind)
            }
            (Identifier::GetVar, AckKind::Success) => {
                let value = if rest.is_empty() { 0 } else { codec::decode_hex(rest)? };
                let outcome = callbacks.on_getvar(m.ack, num, value, 0);
                self.finish_or_resubmit(outcome, num, kind)
            }
            (Identifier::Command, AckKind::SuccessData) => {
                let (total_len_hex, values_part) = split_on_semicolon(rest);
                let total_len = codec::decode_hex(total_len_hex)? as usize;
                let values = codec::parse_value_list(values_part)?;

                let active = self.active.as_mut().expect("checked above");
                active.expected_total = total_len;
                self.handle_command_data(num, values, callbacks)
            }
            (Identifier::Command, AckKind::SuccessUpstream) => {
                let total_len = codec::decode_hex(rest)? as usize;
                debug!(num, total_len, "master: entering upstream stream mode");
                self.mode = TransferMode::RawStream;
                Ok(ControlOutcome::EnterStreamMode { expected_len: total_len })
            }
            (Identifier::Command, ack @ (AckKind::Error | AckKind::Unknown)) => {
                let error = if rest.is_empty() { 0 } else { codec::decode_hex(rest)? as u16 };
                warn!(num, error, "master: command returned error ack");
                let outcome = callbacks.on_command(ack, num, None, error);
                self.finish_or_resubmit(outcome, num, kind)
            }
            (_, AckKind::Error | AckKind::Unknown) => {
                let error = if rest.is_empty() { 0 } else { codec::decode_hex(rest)? as u16 };
                let outcome = match kind {
                    Identifier::SetVar => callbacks.on_setvar(m.ack, num, error),
                    Identifier::GetVar => callbacks.on_getvar(m.ack, num, 0, error),
                    _ => callbacks.on_command(m.ack, num, None, error),
                };
                self.finish_or_resubmit(outcome, num, kind)
            }
            (Identifier::Downstream, _) => {
                self.release();
                Err(MasterError::FeatureNotImplemented)
            }
            _ => Err(MasterError::AcknowledgeUnknown),
        }
    }

    fn handle_command_data(
        &mut self,
        num: i16,
        mut values: Vec<u32>,
        callbacks: &mut dyn MasterCallbacks,
    ) -> Result<ControlOutcome, MasterError> {
        let active = self.active.as_mut().ok_or(MasterError::RequestIdentifierNotFound)?;
        active.packet_count += 1;
        active.received_total += values.len();
        active.result_buf.append(&mut values);

        if active.received_total < active.expected_total {
            debug!(
                num,
                received = active.received_total,
                expected = active.expected_total,
                "master: command result partially received, resubmitting"
            );
            return Ok(ControlOutcome::Resubmit(codec::Request {
                num,
                kind: Identifier::Command,
                values: Vec::new(),
            }));
        }

        if active.received_total > active.expected_total {
            self.release();
            return Err(MasterError::ExpectedDatalengthNotMet);
        }

        let buf = active.result_buf.clone();
        let outcome = callbacks.on_command(AckKind::SuccessData, num, Some(&buf), 0);
        self.finish_or_resubmit(outcome, num, Identifier::Command)
    }

    /// Appends stream-mode bytes; returns `Some(buf)` once the declared
    /// length is reached.
    pub fn feed_stream_bytes(&mut self, upstream_buf: &mut Vec<u8>, chunk: &[u8], expected_len: usize) -> bool {
        upstream_buf.extend_from_slice(chunk);
        upstream_buf.len() >= expected_len
    }

    /// Releases on `Success`/`Abort`; on `RepeatRequest`, resubmits the
    /// original request verbatim (values included) rather than a bare
    /// identifier.
    fn finish_or_resubmit(
        &mut self,
        ack: TransferAck,
        num: i16,
        kind: Identifier,
    ) -> Result<ControlOutcome, MasterError> {
        match ack {
            TransferAck::Success | TransferAck::Abort => {
                self.release();
                Ok(ControlOutcome::ReleaseProtocol)
            }
            TransferAck::RepeatRequest => {
                let values = self.active.as_ref().map(|a| a.values.clone()).unwrap_or_default();
                Ok(ControlOutcome::Resubmit(codec::Request { num, kind, values }))
            }
        }
    }
}

fn split_on_semicolon(bytes: &[u8]) -> (&[u8], &[u8]) {
    match bytes.iter().position(|&b| b == b';') {
        Some(pos) => (&bytes[..pos], &bytes[pos + 1..]),
        None => (bytes, &[]),
    }
}
