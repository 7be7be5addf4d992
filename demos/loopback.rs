// ABOUTME: Demonstrates a master and slave wired through an in-process byte loopback
// ABOUTME: Shows the init/tick/on_bytes surface the way send_sms.rs showed the client API

use argh::FromArgs;
use sci_link::codec::AckKind;
use sci_link::config::Config;
use sci_link::framing::TransportSink;
use sci_link::master::callbacks::{MasterCallbacks, TransferAck};
use sci_link::master::{Master, MasterState};
use sci_link::slave::command::{CommandResult, CommandTable};
use sci_link::slave::vars::{VarEntry, VarTable, VarValue};
use sci_link::Slave;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Runs a get-var request against an in-process slave over a loopback byte
/// channel and prints the decoded result.
#[derive(FromArgs)]
struct CliArgs {
    /// whether to enable trace-level logging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// the 1-origin variable number to request (default: 1)
    #[argh(option, short = 'n')]
    var: Option<i16>,
}

struct DemoVars(Vec<VarEntry>);
impl VarTable for DemoVars {
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

struct NoCommands;
impl CommandTable for NoCommands {
    fn len(&self) -> usize {
        0
    }
    fn invoke(&mut self, _num: i16, _values: &[u32]) -> CommandResult {
        CommandResult::error()
    }
}

/// A byte sink that simply accumulates everything written to it.
struct LoopbackSink(Vec<u8>);
impl TransportSink for LoopbackSink {
    fn tx_nonblocking(&mut self, bytes: &[u8]) -> usize {
        self.0.extend_from_slice(bytes);
        bytes.len()
    }
}

struct PrintingCallbacks;
impl MasterCallbacks for PrintingCallbacks {
    fn on_setvar(&mut self, ack: AckKind, num: i16, error: u16) -> TransferAck {
        println!("set-var #{num} -> {ack:?} (error {error:#x})");
        TransferAck::Success
    }
    fn on_getvar(&mut self, ack: AckKind, num: i16, value: u32, error: u16) -> TransferAck {
        println!("get-var #{num} -> {ack:?} value=0x{value:X} (error {error:#x})");
        TransferAck::Success
    }
    fn on_command(&mut self, ack: AckKind, num: i16, buf: Option<&[u32]>, error: u16) -> TransferAck {
        println!("command #{num} -> {ack:?} {buf:?} (error {error:#x})");
        TransferAck::Success
    }
    fn on_upstream(&mut self, num: i16, buf: &[u8]) {
        println!("upstream #{num} -> {} bytes", buf.len());
    }
}

fn main() {
    let cli_args: CliArgs = argh::from_env();

    let level = if cli_args.debugging { Level::TRACE } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let var_num = cli_args.var.unwrap_or(1);

    let mut table = DemoVars(vec![
        VarEntry::volatile(VarValue::F32(2.356)),
        VarEntry::volatile(VarValue::U16(0x86E6)),
        VarEntry::volatile(VarValue::I32(-87344381)),
    ]);
    let mut slave = Slave::init(Config::default(), &mut table, None, NoCommands).expect("slave init");
    let mut master = Master::init(Config::default(), PrintingCallbacks);

    if !master.submit_getvar(var_num) {
        eprintln!("master rejected submission, already busy");
        return;
    }

    let mut wire = LoopbackSink(Vec::new());
    while master.get_state() == MasterState::Sending {
        master.tick(&mut wire);
    }
    println!("master -> slave: {:?}", String::from_utf8_lossy(&wire.0));

    for &b in &wire.0 {
        slave.on_byte(b);
    }
    let mut reply = LoopbackSink(Vec::new());
    loop {
        slave.tick(&mut reply);
        if reply.0.last() == Some(&sci_link::framing::ETX) {
            break;
        }
    }
    println!("slave -> master: {:?}", String::from_utf8_lossy(&reply.0));

    master.on_bytes(&reply.0);
    println!("master state after exchange: {:?}", master.get_state());
}
