// ABOUTME: Master role: submits requests, correlates responses, and pages COMMAND/UPSTREAM transfers
// ABOUTME: Public API is init/tick/on_bytes/submit_*/get_state

pub mod callbacks;
pub mod error;
pub mod transfer;

use crate::codec::{encode_request, Identifier, Request};
use crate::config::Config;
use crate::framing::{Framing, RxState, TransportSink, TxState};
use callbacks::MasterCallbacks;
use error::MasterError;
use transfer::{ControlOutcome, MasterTransfer, TransferMode};
use tracing::{error, warn};

/// Top-level master protocol state, as returned by [`Master::get_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Idle,
    Sending,
    Evaluating,
    Receiving,
    Error,
}

/// The master engine: an explicit handle constructed by [`Master::init`], not
/// a process-wide global.
pub struct Master<'a> {
    cfg: Config,
    framing: Framing,
    callbacks: Box<dyn MasterCallbacks + 'a>,
    engine: MasterTransfer,
    state: MasterState,
    last_request: Option<Request>,
    last_error: Option<MasterError>,
    upstream_buf: Vec<u8>,
    upstream_expected: usize,
}

impl<'a> Master<'a> {
    pub fn init(cfg: Config, callbacks: impl MasterCallbacks + 'a) -> Self {
        let framing = Framing::new(cfg.rx_packet_len, cfg.tx_packet_len);
        Self {
            cfg,
            framing,
            callbacks: Box::new(callbacks),
            engine: MasterTransfer::default(),
            state: MasterState::Idle,
            last_request: None,
            last_error: None,
            upstream_buf: Vec::new(),
            upstream_expected: 0,
        }
    }

    /// Starts assembling a [`Master`] from a [`Config`] plus the required
    /// result callbacks, without exposing the engine's fields directly.
    pub fn builder(cfg: Config, callbacks: impl MasterCallbacks + 'a) -> MasterBuilder<'a> {
        MasterBuilder {
            cfg,
            callbacks: Box::new(callbacks),
        }
    }

    pub fn get_state(&self) -> MasterState {
        self.state
    }

    /// The error behind the most recent submit rejection or `Error`-state
    /// transition, if any. `submit_*` returns a bare `bool`, so this is the
    /// only way to distinguish an oversized request from one rejected for
    /// being busy, or to inspect why a response failed to parse.
    pub fn last_error(&self) -> Option<&MasterError> {
        self.last_error.as_ref()
    }

    pub fn submit_getvar(&mut self, num: i16) -> bool {
        self.submit(Request {
            num,
            kind: Identifier::GetVar,
            values: Vec::new(),
        })
    }

    pub fn submit_setvar(&mut self, num: i16, value: u32) -> bool {
        self.submit(Request {
            num,
            kind: Identifier::SetVar,
            values: vec![value],
        })
    }

    pub fn submit_command(&mut self, num: i16, values: Vec<u32>) -> bool {
        self.submit(Request {
            num,
            kind: Identifier::Command,
            values,
        })
    }

    fn submit(&mut self, req: Request) -> bool {
        if self.state != MasterState::Idle {
            return false;
        }
        let body = encode_request(&req);
        if body.len() > self.cfg.tx_packet_len {
            warn!(len = body.len(), "master: request exceeds TX buffer, not submitted");
            self.last_error = Some(MasterError::MessageExceedsTxBufferSize);
            return false;
        }
        if !self.framing.enqueue(&body) {
            return false;
        }
        self.last_error = None;
        self.engine.begin(req.num, req.kind, req.values.clone());
        self.last_request = Some(req);
        self.state = MasterState::Sending;
        true
    }

    fn resubmit(&mut self, req: Request) {
        let body = encode_request(&req);
        if self.framing.enqueue(&body) {
            self.last_request = Some(req);
            self.state = MasterState::Sending;
        } else {
            error!("master: resubmit failed to enqueue, forcing Error state");
            self.state = MasterState::Error;
        }
    }

    /// Forces the protocol back to Idle and frees transfer-owned buffers.
    pub fn release_protocol(&mut self) {
        self.engine.release();
        self.upstream_buf.clear();
        self.upstream_expected = 0;
        self.state = MasterState::Idle;
    }

    /// Manually enters stream-receive mode without a COMMAND having
    /// requested it.
    pub fn begin_stream_receive(&mut self, expected_len: usize) {
        self.engine.force_stream_mode();
        self.upstream_buf.clear();
        self.upstream_expected = expected_len;
        self.state = MasterState::Receiving;
    }

    pub fn end_stream_receive(&mut self) {
        self.release_protocol();
    }

    /// Drives the transmit sub-machine while `Sending`.
    pub fn tick(&mut self, sink: &mut dyn TransportSink) {
        if self.state == MasterState::Sending {
            self.framing.tick_tx(sink);
            if self.framing.tx_state() == TxState::Ready {
                self.framing.acknowledge_tx();
                self.state = MasterState::Receiving;
            }
        }
    }

    /// Feeds received bytes, dispatching to framing or stream-mode
    /// accumulation depending on `engine.mode()`.
    pub fn on_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.on_byte(b);
        }
    }

    fn on_byte(&mut self, byte: u8) {
        if self.engine.mode() == TransferMode::RawStream {
            self.upstream_buf.push(byte);
            if self.upstream_buf.len() >= self.upstream_expected {
                let buf = std::mem::take(&mut self.upstream_buf);
                let num = self.last_request.as_ref().map(|r| r.num).unwrap_or(0);
                self.callbacks.on_upstream(num, &buf);
                self.release_protocol();
            }
            return;
        }

        self.framing.receive_byte(byte);
        if self.framing.rx_state() == RxState::Pending {
            self.state = MasterState::Evaluating;
            self.evaluate();
        }
    }

    fn evaluate(&mut self) {
        let packet = self.framing.packet().to_vec();
        self.framing.finish_receive();

        match self.engine.handle_frame(&packet, self.callbacks.as_mut()) {
            Ok(ControlOutcome::ReleaseProtocol) => {
                self.release_protocol();
            }
            Ok(ControlOutcome::Resubmit(req)) => {
                self.resubmit(req);
            }
            Ok(ControlOutcome::EnterStreamMode { expected_len }) => {
                self.upstream_buf.clear();
                self.upstream_expected = expected_len;
                let num = self.last_request.as_ref().map(|r| r.num).unwrap_or(0);
                self.resubmit(Request {
                    num,
                    kind: Identifier::Upstream,
                    values: Vec::new(),
                });
            }
            Err(e) => {
                warn!(error = %e, "master: response handling failed");
                self.last_error = Some(e);
                self.state = MasterState::Error;
            }
        }
    }
}

/// Builder for a [`Master`], assembled via [`Master::builder`].
pub struct MasterBuilder<'a> {
    cfg: Config,
    callbacks: Box<dyn MasterCallbacks + 'a>,
}

impl<'a> MasterBuilder<'a> {
    pub fn build(self) -> Master<'a> {
        let framing = Framing::new(self.cfg.rx_packet_len, self.cfg.tx_packet_len);
        Master {
            cfg: self.cfg,
            framing,
            callbacks: self.callbacks,
            engine: MasterTransfer::default(),
            state: MasterState::Idle,
            last_request: None,
            last_error: None,
            upstream_buf: Vec::new(),
            upstream_expected: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::AckKind;
    use callbacks::TransferAck;

    struct RecordingCallbacks {
        getvar: Option<(AckKind, i16, u32, u16)>,
    }

    impl MasterCallbacks for RecordingCallbacks {
        fn on_setvar(&mut self, _ack: AckKind, _num: i16, _error: u16) -> TransferAck {
            TransferAck::Success
        }
        fn on_getvar(&mut self, ack: AckKind, num: i16, value: u32, error: u16) -> TransferAck {
            self.getvar = Some((ack, num, value, error));
            TransferAck::Success
        }
        fn on_command(&mut self, _ack: AckKind, _num: i16, _buf: Option<&[u32]>, _error: u16) -> TransferAck {
            TransferAck::Success
        }
        fn on_upstream(&mut self, _num: i16, _buf: &[u8]) {}
    }

    struct LoopbackSink(Vec<u8>);
    impl TransportSink for LoopbackSink {
        fn tx_nonblocking(&mut self, bytes: &[u8]) -> usize {
            self.0.extend_from_slice(bytes);
            bytes.len()
        }
    }

    #[test]
    fn submit_getvar_then_receive_response_releases_protocol() {
        let mut master = Master::init(Config::default(), RecordingCallbacks { getvar: None });
        assert!(master.submit_getvar(3));
        assert_eq!(master.get_state(), MasterState::Sending);

        let mut sink = LoopbackSink(Vec::new());
        for _ in 0..5 {
            master.tick(&mut sink);
            if master.get_state() != MasterState::Sending {
                break;
            }
        }
        assert_eq!(sink.0, b"\x023?\x03");
        assert_eq!(master.get_state(), MasterState::Receiving);

        master.on_bytes(b"\x023?ACK;F5\x03");
        assert_eq!(master.get_state(), MasterState::Idle);
    }

    #[test]
    fn submit_rejected_when_not_idle() {
        let mut master = Master::init(Config::default(), RecordingCallbacks { getvar: None });
        assert!(master.submit_getvar(3));
        assert!(!master.submit_getvar(4));
    }

    #[test]
    fn release_protocol_is_idempotent() {
        let mut master = Master::init(Config::default(), RecordingCallbacks { getvar: None });
        master.submit_getvar(3);
        master.release_protocol();
        assert_eq!(master.get_state(), MasterState::Idle);
        master.release_protocol();
        assert_eq!(master.get_state(), MasterState::Idle);
    }

    #[test]
    fn builder_produces_an_idle_master() {
        let mut master = Master::builder(Config::default(), RecordingCallbacks { getvar: None }).build();
        assert_eq!(master.get_state(), MasterState::Idle);
        assert!(master.submit_getvar(1));
    }
}
