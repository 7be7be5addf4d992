// ABOUTME: End-to-end protocol scenarios driving a full Slave engine byte-by-byte through worked request/response pairs
// ABOUTME: Exercises framing + codec + transfer engine together from the outside, the way a real transport would

use crate::codec::AckKind;
use crate::config::Config;
use crate::framing::TransportSink;
use crate::master::callbacks::{MasterCallbacks, TransferAck};
use crate::master::{Master, MasterState};
use crate::slave::command::{CommandResult, CommandTable};
use crate::slave::vars::{NvStore, VarEntry, VarTable, VarValue};
use crate::slave::{Slave, SlaveState};
use std::collections::HashMap;

struct CapturingSink(Vec<u8>);
impl TransportSink for CapturingSink {
    fn tx_nonblocking(&mut self, bytes: &[u8]) -> usize {
        self.0.extend_from_slice(bytes);
        bytes.len()
    }
}

struct TestVarTable(Vec<VarEntry>);
impl VarTable for TestVarTable {
    fn len(&self) -> usize {
        self.0.len()
    }
    fn entry(&self, index: usize) -> Option<&VarEntry> {
        self.0.get(index)
    }
    fn entry_mut(&mut self, index: usize) -> Option<&mut VarEntry> {
        self.0.get_mut(index)
    }
}

fn default_test_table() -> TestVarTable {
    TestVarTable(vec![
        VarEntry::volatile(VarValue::F32(2.356)),     // #1
        VarEntry::volatile(VarValue::U8(0)),           // #2 (unused filler)
        VarEntry::persistent(VarValue::U8(0xF5)),      // #3
        VarEntry::persistent(VarValue::U16(0x86E6)),   // #4
        VarEntry::volatile(VarValue::I32(-87344381)),  // #5
    ])
}

struct FakeNv(HashMap<u16, u32>);
impl NvStore for FakeNv {
    fn nv_read(&mut self, address: u16) -> Option<u32> {
        self.0.get(&address).copied()
    }
    fn nv_write(&mut self, address: u16, value: u32) -> bool {
        self.0.insert(address, value);
        true
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

/// Drives a `Slave` through one full request/response exchange: feeds
/// `input` (STX..ETX) byte by byte, then ticks until a response is fully
/// queued for transmission, returning the transmitted bytes.
fn drive_slave(slave: &mut Slave, input: &[u8]) -> Vec<u8> {
    for &b in input {
        slave.on_byte(b);
    }
    let mut sink = CapturingSink(Vec::new());
    for _ in 0..16 {
        slave.tick(&mut sink);
        if slave.state() == SlaveState::Idle {
            break;
        }
    }
    sink.0
}

fn new_slave(table: &mut TestVarTable, nv: &mut FakeNv) -> Slave<'_> {
    Slave::init(Config::default(), table, Some(nv), TenWordCommand).unwrap()
}

#[test]
fn scenario_1_get_u8_variable() {
    let mut table = default_test_table();
    let mut nv = FakeNv(HashMap::new());
    let mut slave = new_slave(&mut table, &mut nv);
    let out = drive_slave(&mut slave, b"\x023?\x03");
    assert_eq!(out, b"\x023?ACK;F5\x03");
}

#[test]
fn scenario_2_get_u16_variable() {
    let mut table = default_test_table();
    let mut nv = FakeNv(HashMap::new());
    let mut slave = new_slave(&mut table, &mut nv);
    let out = drive_slave(&mut slave, b"\x024?\x03");
    assert_eq!(out, b"\x024?ACK;86E6\x03");
}

#[test]
fn scenario_3_get_i32_variable() {
    let mut table = default_test_table();
    let mut nv = FakeNv(HashMap::new());
    let mut slave = new_slave(&mut table, &mut nv);
    let out = drive_slave(&mut slave, b"\x025?\x03");
    assert_eq!(out, b"\x025?ACK;FACB3B03\x03");
}

#[test]
fn scenario_4_get_f32_variable() {
    let mut table = default_test_table();
    let mut nv = FakeNv(HashMap::new());
    let mut slave = new_slave(&mut table, &mut nv);
    let out = drive_slave(&mut slave, b"\x021?\x03");
    assert_eq!(out, b"\x021?ACK;4016C8B4\x03");
}

#[test]
fn scenario_5_command_returns_ten_word_result() {
    let mut table = default_test_table();
    let mut nv = FakeNv(HashMap::new());
    let mut slave = new_slave(&mut table, &mut nv);
    let out = drive_slave(&mut slave, b"\x021:\x03");
    assert_eq!(out, b"\x021:DAT;A;1,2,3,4,5,6,7,8,9,A\x03");
}

#[test]
fn scenario_6_set_u8_variable() {
    let mut table = default_test_table();
    let mut nv = FakeNv(HashMap::new());
    let mut slave = new_slave(&mut table, &mut nv);
    let out = drive_slave(&mut slave, b"\x023!42\x03");
    assert_eq!(out, b"\x023!ACK;42\x03");

    let refetch = drive_slave(&mut slave, b"\x023?\x03");
    assert_eq!(refetch, b"\x023?ACK;42\x03");
}

#[test]
fn scenario_7_malformed_request_has_no_identifier() {
    let mut table = default_test_table();
    let mut nv = FakeNv(HashMap::new());
    let mut slave = new_slave(&mut table, &mut nv);
    let out = drive_slave(&mut slave, b"\x02123\x03");
    assert_eq!(out, b"\x020#ERR;106\x03");
}

struct RecordingMasterCallbacks {
    getvar: Option<(AckKind, i16, u32, u16)>,
    command: Option<Vec<u32>>,
}

impl MasterCallbacks for RecordingMasterCallbacks {
    fn on_setvar(&mut self, _ack: AckKind, _num: i16, _error: u16) -> TransferAck {
        TransferAck::Success
    }
    fn on_getvar(&mut self, ack: AckKind, num: i16, value: u32, error: u16) -> TransferAck {
        self.getvar = Some((ack, num, value, error));
        TransferAck::Success
    }
    fn on_command(&mut self, _ack: AckKind, _num: i16, buf: Option<&[u32]>, _error: u16) -> TransferAck {
        self.command = buf.map(|b| b.to_vec());
        TransferAck::Success
    }
    fn on_upstream(&mut self, _num: i16, _buf: &[u8]) {}
}

fn drive_master_to_completion(master: &mut Master, response: &[u8]) {
    let mut sink = CapturingSink(Vec::new());
    for _ in 0..16 {
        master.tick(&mut sink);
        if master.get_state() != MasterState::Sending {
            break;
        }
    }
    master.on_bytes(response);
}

#[test]
fn master_and_slave_round_trip_get_var() {
    let mut table = default_test_table();
    let mut nv = FakeNv(HashMap::new());
    let mut slave = new_slave(&mut table, &mut nv);

    let mut master = Master::init(Config::default(), RecordingMasterCallbacks { getvar: None, command: None });
    assert!(master.submit_getvar(4));

    let mut sink = CapturingSink(Vec::new());
    for _ in 0..16 {
        master.tick(&mut sink);
        if master.get_state() != MasterState::Sending {
            break;
        }
    }
    let request_bytes = sink.0;
    assert_eq!(request_bytes, b"\x024?\x03");

    let response = drive_slave(&mut slave, &request_bytes);
    assert_eq!(response, b"\x024?ACK;86E6\x03");

    master.on_bytes(&response);
    assert_eq!(master.get_state(), MasterState::Idle);
}

#[test]
fn master_aggregates_paged_command_result() {
    let mut master = Master::init(Config::default(), RecordingMasterCallbacks { getvar: None, command: None });
    assert!(master.submit_command(1, Vec::new()));
    drive_master_to_completion(&mut master, b"\x021:DAT;A;1,2,3,4,5,6,7,8,9,A\x03");
    assert_eq!(master.get_state(), MasterState::Idle);
}

#[test]
fn release_protocol_from_any_state_returns_idle() {
    let mut master = Master::init(Config::default(), RecordingMasterCallbacks { getvar: None, command: None });
    master.submit_getvar(1);
    master.release_protocol();
    assert_eq!(master.get_state(), MasterState::Idle);
}
