// ABOUTME: Slave role: owns framing + variable table + command table, drives the top state machine each tick
// ABOUTME: Public API is init/tick/on_byte/get_var/version

pub mod command;
pub mod error;
pub mod transfer;
pub mod vars;

use crate::codec;
use crate::config::Config;
use crate::framing::{Framing, RxState, TransportSink, TxState};
use command::CommandTable;
use error::SlaveError;
use tracing::{debug, instrument, warn};
use vars::{NvStore, VarAccess, VarTable};

/// Top-level slave protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    Idle,
    Receiving,
    Evaluating,
    Sending,
}

const CRATE_VERSION: (u8, u8, u8) = (0, 1, 0);

/// The slave engine: an explicit handle constructed by [`Slave::init`], not a
/// process-wide global.
pub struct Slave<'a> {
    cfg: Config,
    framing: Framing,
    var_access: VarAccess<'a>,
    cmd_table: Box<dyn CommandTable + 'a>,
    control: transfer::ResponseControl,
    state: SlaveState,
}

impl<'a> Slave<'a> {
    /// Builds the persistent partition table, warm-starts NV-backed
    /// variables, and returns a ready engine. Fails only on
    /// `NvPartitionTableExhausted`.
    pub fn init(
        cfg: Config,
        var_table: &'a mut dyn VarTable,
        nv: Option<&'a mut dyn NvStore>,
        cmd_table: impl CommandTable + 'a,
    ) -> Result<Self, SlaveError> {
        let var_access = VarAccess::init(var_table, nv, cfg.clone())?;
        let framing = Framing::new(cfg.rx_packet_len, cfg.tx_packet_len);
        Ok(Self {
            cfg,
            framing,
            var_access,
            cmd_table: Box::new(cmd_table),
            control: transfer::ResponseControl::default(),
            state: SlaveState::Idle,
        })
    }

    /// Starts assembling a [`Slave`] from a [`Config`] plus the required
    /// table/command callbacks, without exposing the engine's fields
    /// directly. `var_table` and `cmd_table` are required up front; NV
    /// backing is optional and supplied through [`SlaveBuilder::nv_store`].
    pub fn builder(
        cfg: Config,
        var_table: &'a mut dyn VarTable,
        cmd_table: impl CommandTable + 'a,
    ) -> SlaveBuilder<'a> {
        SlaveBuilder {
            cfg,
            var_table,
            nv: None,
            cmd_table: Box::new(cmd_table),
        }
    }

    pub fn state(&self) -> SlaveState {
        self.state
    }

    /// Feeds one received byte to the framing layer. Bounded, O(1) work,
    /// safe to call from an interrupt context.
    pub fn on_byte(&mut self, byte: u8) {
        self.framing.receive_byte(byte);
        if self.framing.rx_state() == RxState::Pending && self.state == SlaveState::Idle {
            self.state = SlaveState::Receiving;
        }
    }

    pub fn get_var(&self, num: i16) -> Result<&vars::VarEntry, SlaveError> {
        self.var_access.entry(num)
    }

    pub fn version(&self) -> (u8, u8, u8) {
        CRATE_VERSION
    }

    /// Drives the top state machine one step and pumps the transmit
    /// sub-machine through `sink`.
    #[instrument(skip(self, sink))]
    pub fn tick(&mut self, sink: &mut dyn TransportSink) {
        match self.state {
            SlaveState::Idle | SlaveState::Receiving => {
                if self.framing.rx_state() == RxState::Pending {
                    self.state = SlaveState::Evaluating;
                    self.evaluate();
                }
            }
            SlaveState::Evaluating => {
                self.evaluate();
            }
            SlaveState::Sending => {
                self.framing.tick_tx(sink);
                if self.framing.tx_state() == TxState::Ready {
                    self.framing.acknowledge_tx();
                    if self.control.ongoing() {
                        // COMMAND DAT paging continues without a new wire
                        // request; UPSTREAM continuation, by contrast, waits
                        // for an explicit `>` request, so it falls through to
                        // Idle below.
                        let body = transfer::continue_command_packet(&mut self.control, &self.cfg);
                        debug!(len = body.len(), "slave: continuation body built");
                        if self.framing.enqueue(&body) {
                            self.state = SlaveState::Sending;
                        } else {
                            warn!("slave: continuation response could not be enqueued, returning to Idle");
                            self.control.clear();
                            self.state = SlaveState::Idle;
                        }
                    } else {
                        self.state = SlaveState::Idle;
                    }
                }
            }
        }
    }

    fn evaluate(&mut self) {
        let packet = self.framing.packet().to_vec();
        self.framing.finish_receive();
        let body = match codec::parse_request(&packet, self.cfg.max_request_values) {
            Ok(req) => transfer::process_request(
                &mut self.control,
                &req,
                &mut self.var_access,
                self.cmd_table.as_mut(),
                &self.cfg,
            ),
            Err(e) => {
                let slave_err: SlaveError = e.into();
                transfer::build_parse_error_response(&slave_err, &self.cfg)
            }
        };

        debug!(len = body.len(), "slave: response body built");
        if self.framing.enqueue(&body) {
            self.state = SlaveState::Sending;
        } else {
            warn!("slave: response could not be enqueued, returning to Idle");
            self.control.clear();
            self.state = SlaveState::Idle;
        }
    }
}

/// Builder for a [`Slave`], assembled via [`Slave::builder`].
pub struct SlaveBuilder<'a> {
    cfg: Config,
    var_table: &'a mut dyn VarTable,
    nv: Option<&'a mut dyn NvStore>,
    cmd_table: Box<dyn CommandTable + 'a>,
}

impl<'a> SlaveBuilder<'a> {
    /// Attaches an NV backing store for persistent variables.
    pub fn nv_store(mut self, nv: &'a mut dyn NvStore) -> Self {
        self.nv = Some(nv);
        self
    }

    /// Builds the partition table, warm-starts from NV if attached, and
    /// returns a ready engine. Fails only on `NvPartitionTableExhausted`.
    pub fn build(self) -> Result<Slave<'a>, SlaveError> {
        let var_access = VarAccess::init(self.var_table, self.nv, self.cfg.clone())?;
        let framing = Framing::new(self.cfg.rx_packet_len, self.cfg.tx_packet_len);
        Ok(Slave {
            cfg: self.cfg,
            framing,
            var_access,
            cmd_table: self.cmd_table,
            control: transfer::ResponseControl::default(),
            state: SlaveState::Idle,
        })
    }
}
