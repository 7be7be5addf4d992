// ABOUTME: Slave-side request dispatch and multi-packet response-control paging
// ABOUTME: Builds one dataframe body per call; the top state machine re-invokes it each tick while ongoing/upstream_pending

use crate::codec::{encode_hex, AckKind, Identifier, Request};
use crate::config::Config;
use crate::slave::command::{CommandResult, CommandTable, TransferPayload};
use crate::slave::error::SlaveError;
use crate::slave::vars::VarAccess;
use tracing::{debug, warn};

/// The full response record captured at command invocation and reused for
/// every follow-up packet.
#[derive(Debug, Clone)]
struct SavedResponse {
    num: i16,
    ack: AckKind,
    error: u16,
    payload: TransferPayload,
}

/// Per-transaction paging state for multi-packet COMMAND/UPSTREAM responses.
#[derive(Debug, Default)]
pub struct ResponseControl {
    first_not_sent: bool,
    ongoing: bool,
    upstream_pending: bool,
    data_cursor: usize,
    saved: Option<SavedResponse>,
}

impl ResponseControl {
    pub fn ongoing(&self) -> bool {
        self.ongoing
    }

    pub fn upstream_pending(&self) -> bool {
        self.upstream_pending
    }

    /// Releases any saved transfer state, including dynamically owned
    /// result or upstream buffers. `Cow`-backed payloads free themselves
    /// on drop.
    pub fn clear(&mut self) {
        self.first_not_sent = false;
        self.ongoing = false;
        self.upstream_pending = false;
        self.data_cursor = 0;
        self.saved = None;
    }
}

/// Dispatches one request against the variable/command tables and produces
/// the next outgoing dataframe body (STX/ETX not included).
pub fn process_request(
    control: &mut ResponseControl,
    req: &Request,
    var_access: &mut VarAccess,
    cmd_table: &mut dyn CommandTable,
    cfg: &Config,
) -> Vec<u8> {
    match req.kind {
        Identifier::GetVar => {
            control.clear();
            match var_access.read_wire(req.num) {
                Ok(value) => build_simple(req.num, req.kind, AckKind::Success, &[value]),
                Err(e) => build_error(req.num, req.kind, &e, cfg),
            }
        }
        Identifier::SetVar => {
            control.clear();
            let value = req.values.first().copied().unwrap_or(0);
            match var_access.write_wire(req.num, value) {
                Ok(new_value) => build_simple(req.num, req.kind, AckKind::Success, &[new_value]),
                Err(e) => build_error(req.num, req.kind, &e, cfg),
            }
        }
        Identifier::Command => {
            if req.num <= 0 || req.num as usize > cmd_table.len() {
                control.clear();
                return build_error(req.num, req.kind, &SlaveError::RequestUnknown(req.num), cfg);
            }

            let same_transaction = control.saved.as_ref().map(|s| s.num) == Some(req.num)
                && (control.ongoing || control.upstream_pending);
            if !same_transaction {
                let CommandResult { ack, payload } = cmd_table.invoke(req.num, &req.values);
                debug!(num = req.num, ?ack, "slave: command invoked");
                control.first_not_sent = true;
                control.data_cursor = 0;
                control.ongoing = matches!(ack, AckKind::SuccessData) && !payload.is_empty();
                control.upstream_pending =
                    matches!(ack, AckKind::SuccessUpstream) && !payload.is_empty();
                control.saved = Some(SavedResponse {
                    num: req.num,
                    ack,
                    error: 0,
                    payload,
                });
            } else {
                control.first_not_sent = false;
            }

            build_command_packet(control, req.kind, cfg)
        }
        Identifier::Upstream => {
            let matches_saved = control.saved.as_ref().map(|s| s.num) == Some(req.num);
            if !control.upstream_pending || !matches_saved {
                control.clear();
                return build_error(
                    req.num,
                    req.kind,
                    &SlaveError::UpstreamNotInitiated(req.num),
                    cfg,
                );
            }
            build_upstream_packet(control, cfg)
        }
        Identifier::Downstream => {
            control.clear();
            build_error(req.num, req.kind, &SlaveError::RequestUnknown(req.num), cfg)
        }
        Identifier::Unknown => {
            control.clear();
            build_error(req.num, req.kind, &SlaveError::RequestIdentifierNotFound, cfg)
        }
    }
}

/// Builds the minimal-identifier-not-found response for a request that could
/// not even be parsed (`num=0`, `kind='#'`).
pub fn build_parse_error_response(error: &SlaveError, cfg: &Config) -> Vec<u8> {
    build_error(0, Identifier::Unknown, error, cfg)
}

/// Pages the next COMMAND continuation packet directly off `saved` state,
/// with no new wire request: the top loop re-enters Evaluating
/// automatically while `ongoing`. Only legal when `control.ongoing()`.
pub fn continue_command_packet(control: &mut ResponseControl, cfg: &Config) -> Vec<u8> {
    build_command_packet(control, Identifier::Command, cfg)
}

fn build_simple(num: i16, kind: Identifier, ack: AckKind, values: &[u32]) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(&encode_hex(num as u16 as u32));
    out.push(kind.to_byte() as char);
    out.push_str(ack.keyword());
    if !values.is_empty() {
        out.push(';');
        let encoded: Vec<String> = values.iter().map(|&v| encode_hex(v)).collect();
        out.push_str(&encoded.join(","));
    }
    out.into_bytes()
}

fn build_error(num: i16, kind: Identifier, error: &SlaveError, cfg: &Config) -> Vec<u8> {
    warn!(num, ?kind, %error, "slave: request failed");
    let code = error.wire_code(cfg.sci_error_offset);
    let mut out = String::new();
    out.push_str(&encode_hex(num as u16 as u32));
    out.push(kind.to_byte() as char);
    out.push_str(AckKind::Error.keyword());
    out.push(';');
    out.push_str(&encode_hex(code as u32));
    out.into_bytes()
}

fn build_command_packet(control: &mut ResponseControl, kind: Identifier, cfg: &Config) -> Vec<u8> {
    let saved = control.saved.as_ref().expect("command packet requires saved state");
    let mut out = String::new();
    out.push_str(&encode_hex(saved.num as u16 as u32));
    out.push(kind.to_byte() as char);

    if control.first_not_sent {
        out.push_str(saved.ack.keyword());
        if matches!(saved.ack, AckKind::SuccessData | AckKind::SuccessUpstream) {
            out.push(';');
            out.push_str(&encode_hex(saved.payload.len() as u32));
        } else if matches!(saved.ack, AckKind::Error | AckKind::Unknown) && saved.error != 0 {
            out.push(';');
            out.push_str(&encode_hex(saved.error as u32));
        }
    }

    if control.ongoing {
        let TransferPayload::Values(values) = &saved.payload else {
            unreachable!("ongoing implies a Values payload");
        };
        out.push(';');

        let header_len = out.len();
        let budget = cfg.tx_packet_len.saturating_sub(header_len);
        let mut rendered: Vec<String> = Vec::new();
        let mut used = 0usize;
        while control.data_cursor < values.len() {
            let word = encode_hex(values[control.data_cursor]);
            let extra = word.len() + if rendered.is_empty() { 0 } else { 1 };
            if used + extra > budget && !rendered.is_empty() {
                break;
            }
            used += extra;
            rendered.push(word);
            control.data_cursor += 1;
        }
        out.push_str(&rendered.join(","));

        if control.data_cursor >= values.len() {
            control.ongoing = false;
        }
    }

    let body = out.into_bytes();
    if !control.ongoing {
        control.clear();
    } else {
        control.first_not_sent = false;
    }
    body
}

fn build_upstream_packet(control: &mut ResponseControl, cfg: &Config) -> Vec<u8> {
    let saved = control.saved.as_ref().expect("upstream packet requires saved state");
    let TransferPayload::Bytes(bytes) = &saved.payload else {
        unreachable!("upstream_pending implies a Bytes payload");
    };

    let budget = cfg.tx_packet_len;
    let end = (control.data_cursor + budget).min(bytes.len());
    let chunk = bytes[control.data_cursor..end].to_vec();
    control.data_cursor = end;

    if control.data_cursor >= bytes.len() {
        control.clear();
    }
    chunk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slave::vars::{StorageClass, VarEntry, VarTable, VarValue};

    struct OneVar(VarEntry);
    impl VarTable for OneVar {
        fn len(&self) -> usize {
            1
        }
        fn entry(&self, index: usize) -> Option<&VarEntry> {
            (index == 0).then_some(&self.0)
        }
        fn entry_mut(&mut self, index: usize) -> Option<&mut VarEntry> {
            (index == 0).then_some(&mut self.0)
        }
    }

    struct TenWordCommand;
    impl CommandTable for TenWordCommand {
        fn len(&self) -> usize {
            1
        }
        fn invoke(&mut self, _num: i16, _values: &[u32]) -> CommandResult {
            CommandResult::data((1u32..=10).collect::<Vec<_>>())
        }
    }

    #[test]
    fn get_var_builds_ack_with_hex_value() {
        let mut table = OneVar(VarEntry {
            value: VarValue::U8(0xF5),
            storage: StorageClass::Volatile,
            action: None,
        });
        let mut access = VarAccess::init(&mut table, None, Config::default()).unwrap();
        let mut cmds = TenWordCommand;
        let mut control = ResponseControl::default();
        let req = Request {
            num: 1,
            kind: Identifier::GetVar,
            values: vec![],
        };
        let body = process_request(&mut control, &req, &mut access, &mut cmds, &Config::default());
        assert_eq!(body, b"1?ACK;F5");
    }

    #[test]
    fn set_var_out_of_range_is_error_response() {
        let mut table = OneVar(VarEntry {
            value: VarValue::U8(0),
            storage: StorageClass::Volatile,
            action: None,
        });
        let cfg = Config::default();
        let mut access = VarAccess::init(&mut table, None, cfg.clone()).unwrap();
        let mut cmds = TenWordCommand;
        let mut control = ResponseControl::default();
        let req = Request {
            num: 9,
            kind: Identifier::SetVar,
            values: vec![0x42],
        };
        let body = process_request(&mut control, &req, &mut access, &mut cmds, &cfg);
        assert_eq!(body, b"9!ERR;101");
    }

    #[test]
    fn command_first_packet_declares_total_len_and_pages_values() {
        let mut table = OneVar(VarEntry {
            value: VarValue::U8(0),
            storage: StorageClass::Volatile,
            action: None,
        });
        let cfg = Config {
            tx_packet_len: 32,
            ..Config::default()
        };
        let mut access = VarAccess::init(&mut table, None, cfg.clone()).unwrap();
        let mut cmds = TenWordCommand;
        let mut control = ResponseControl::default();
        let req = Request {
            num: 1,
            kind: Identifier::Command,
            values: vec![],
        };
        let body = process_request(&mut control, &req, &mut access, &mut cmds, &cfg);
        assert_eq!(body, b"1:DAT;A;1,2,3,4,5,6,7,8,9,A");
        assert!(!control.ongoing());
    }

    #[test]
    fn command_out_of_range_is_request_unknown() {
        let mut table = OneVar(VarEntry {
            value: VarValue::U8(0),
            storage: StorageClass::Volatile,
            action: None,
        });
        let cfg = Config::default();
        let mut access = VarAccess::init(&mut table, None, cfg.clone()).unwrap();
        let mut cmds = TenWordCommand;
        let mut control = ResponseControl::default();
        let req = Request {
            num: 7,
            kind: Identifier::Command,
            values: vec![],
        };
        let body = process_request(&mut control, &req, &mut access, &mut cmds, &cfg);
        assert_eq!(body, b"7:ERR;109");
    }

    #[test]
    fn upstream_without_pending_transfer_is_rejected() {
        let mut table = OneVar(VarEntry {
            value: VarValue::U8(0),
            storage: StorageClass::Volatile,
            action: None,
        });
        let cfg = Config::default();
        let mut access = VarAccess::init(&mut table, None, cfg.clone()).unwrap();
        let mut cmds = TenWordCommand;
        let mut control = ResponseControl::default();
        let req = Request {
            num: 1,
            kind: Identifier::Upstream,
            values: vec![],
        };
        let body = process_request(&mut control, &req, &mut access, &mut cmds, &cfg);
        assert_eq!(body, b"1>ERR;10A");
    }
}
