// ABOUTME: STX/ETX byte-framing state machines for packet receive and transmit
// ABOUTME: Receive is an O(1)-per-byte pump safe to drive from an interrupt context; transmit is a small cooperative state machine

use crate::packet::PacketBuffer;
use tracing::{debug, trace, warn};

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;

/// Receive-side framing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    Idle,
    Busy,
    Pending,
}

/// Transmit-side framing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    SendStx,
    SendBody,
    SendEtx,
    Ready,
}

/// A transport the framer can push bytes into.
///
/// `tx_nonblocking` MAY accept fewer bytes than offered; the framer retries
/// the remainder on the next `tick`. `tx_busy` lets the transport say "not
/// now" without the framer attempting a zero-byte write first.
pub trait TransportSink {
    fn tx_nonblocking(&mut self, bytes: &[u8]) -> usize;

    fn tx_busy(&self) -> bool {
        false
    }
}

/// Receive byte pump plus transmit state machine sharing the STX/ETX framing
/// rules.
#[derive(Debug)]
pub struct Framing {
    rx_state: RxState,
    rx_buf: PacketBuffer,

    tx_state: TxState,
    tx_buf: PacketBuffer,
    tx_cursor: usize,

    debug_hooks: Vec<Box<dyn FnMut(u8) + Send>>,
    debug_scan: DebugScan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DebugScan {
    None,
    MatchedD,
    MatchedDb,
    MatchedDbg,
}

impl Framing {
    pub fn new(rx_capacity: usize, tx_capacity: usize) -> Self {
        Self {
            rx_state: RxState::Idle,
            rx_buf: PacketBuffer::new(rx_capacity),
            tx_state: TxState::Idle,
            tx_buf: PacketBuffer::new(tx_capacity),
            tx_cursor: 0,
            debug_hooks: Vec::new(),
            debug_scan: DebugScan::None,
        }
    }

    /// Installs the optional debug escape callback array.
    ///
    /// `hooks[d]` is invoked when the literal sequence `Dbg<d>` arrives while
    /// the receiver is Idle. Omit this call to leave the side channel
    /// disabled.
    pub fn with_debug_hooks(mut self, hooks: Vec<Box<dyn FnMut(u8) + Send>>) -> Self {
        self.debug_hooks = hooks;
        self
    }

    pub fn rx_state(&self) -> RxState {
        self.rx_state
    }

    pub fn tx_state(&self) -> TxState {
        self.tx_state
    }

    /// Feeds a single received byte through the framing receive pump.
    ///
    /// Bounded, O(1) work; safe to call from an interrupt context. Does not
    /// allocate beyond what the fixed-capacity `rx_buf` already reserved.
    pub fn receive_byte(&mut self, byte: u8) {
        match (self.rx_state, byte) {
            (RxState::Idle, STX) => {
                self.rx_buf.clear();
                self.rx_state = RxState::Busy;
                self.debug_scan = DebugScan::None;
                trace!("framing: STX in Idle, -> Busy");
            }
            (RxState::Busy, STX) => {
                warn!("framing: STX while Busy, framing error, resetting to Idle");
                self.rx_buf.clear();
                self.rx_state = RxState::Idle;
            }
            (RxState::Busy, ETX) => {
                self.rx_state = RxState::Pending;
                trace!(len = self.rx_buf.len(), "framing: ETX in Busy, -> Pending");
            }
            (RxState::Idle, ETX) => {
                warn!("framing: ETX while Idle, framing error, resetting to Idle");
                self.rx_state = RxState::Idle;
            }
            (RxState::Busy, other) => {
                self.rx_buf.push(other);
                if self.rx_buf.overflow() {
                    warn!("framing: RX buffer overflow, frame will be dropped");
                }
            }
            (RxState::Idle, other) => {
                self.scan_debug_escape(other);
            }
            (RxState::Pending, _) => {
                // A byte arrived before the host consumed the pending packet.
                // Drop it silently; the host is expected to drain Pending
                // every tick.
            }
        }
    }

    fn scan_debug_escape(&mut self, byte: u8) {
        if self.debug_hooks.is_empty() {
            return;
        }
        self.debug_scan = match (self.debug_scan, byte) {
            (DebugScan::None, b'D') => DebugScan::MatchedD,
            (DebugScan::MatchedD, b'b') => DebugScan::MatchedDb,
            (DebugScan::MatchedDb, b'g') => DebugScan::MatchedDbg,
            (DebugScan::MatchedDbg, d) if d.is_ascii_digit() => {
                let idx = (d - b'0') as usize;
                if let Some(hook) = self.debug_hooks.get_mut(idx) {
                    debug!(index = idx, "framing: debug escape invoked");
                    hook(d);
                }
                DebugScan::None
            }
            (_, b'D') => DebugScan::MatchedD,
            _ => DebugScan::None,
        };
    }

    /// The filled region of the pending packet (valid once `rx_state() ==
    /// RxState::Pending`).
    pub fn packet(&self) -> &[u8] {
        self.rx_buf.view()
    }

    pub fn rx_overflowed(&self) -> bool {
        self.rx_buf.overflow()
    }

    /// Consumes the pending packet and returns framing to Idle.
    pub fn finish_receive(&mut self) {
        self.rx_buf.clear();
        self.rx_state = RxState::Idle;
    }

    /// Seizes the TX buffer with `body` and arms the transmitter. Fails only
    /// if the transmitter is not Idle; a `body` larger than TX capacity is
    /// truncated to capacity rather than rejected, with the truncation
    /// observable via `tx_overflowed` until the next `enqueue`/`acknowledge_tx`.
    pub fn enqueue(&mut self, body: &[u8]) -> bool {
        if self.tx_state != TxState::Idle {
            return false;
        }
        self.tx_buf.clear();
        self.tx_buf.extend_from_slice(body);
        if self.tx_buf.overflow() {
            warn!(
                len = body.len(),
                cap = self.tx_buf.capacity(),
                "framing: TX body truncated to capacity"
            );
        }
        self.tx_cursor = 0;
        self.tx_state = TxState::SendStx;
        true
    }

    pub fn tx_overflowed(&self) -> bool {
        self.tx_buf.overflow()
    }

    /// Pumps the transmit state machine once, writing at most one chunk
    /// through `sink.tx_nonblocking`. Never blocks beyond that single call.
    pub fn tick_tx(&mut self, sink: &mut dyn TransportSink) {
        if sink.tx_busy() {
            return;
        }
        match self.tx_state {
            TxState::Idle | TxState::Ready => {}
            TxState::SendStx => {
                if sink.tx_nonblocking(&[STX]) > 0 {
                    self.tx_state = TxState::SendBody;
                }
            }
            TxState::SendBody => {
                let body = self.tx_buf.view();
                if self.tx_cursor >= body.len() {
                    self.tx_state = TxState::SendEtx;
                    return;
                }
                let accepted = sink.tx_nonblocking(&body[self.tx_cursor..]);
                self.tx_cursor += accepted;
                if self.tx_cursor >= body.len() {
                    self.tx_state = TxState::SendEtx;
                }
            }
            TxState::SendEtx => {
                if sink.tx_nonblocking(&[ETX]) > 0 {
                    self.tx_state = TxState::Ready;
                    debug!("framing: frame fully transmitted, -> Ready");
                }
            }
        }
    }

    /// Acknowledges a fully transmitted frame, returning the transmitter to
    /// Idle. Idempotent: calling it from any state leaves the transmitter
    /// Idle.
    pub fn acknowledge_tx(&mut self) {
        self.tx_state = TxState::Idle;
        self.tx_cursor = 0;
        self.tx_buf.clear();
    }
}
