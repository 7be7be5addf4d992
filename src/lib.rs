//! A symmetric, text-framed serial command-interface protocol for querying
//! and mutating named scalar variables, invoking application commands, and
//! streaming bulk data between an embedded controller (slave) and a
//! controlling host (master) over any byte-oriented transport.
//!
//! The stack is layered bottom-up: [`packet`] buffers, [`framing`]
//! (STX/ETX), the [`codec`] grammar, and the per-role transfer engines in
//! [`slave`] and [`master`]. Both roles are driven by a cooperative `tick()`
//! — there is no async runtime here, by design.

pub mod codec;
pub mod config;
pub mod framing;
pub mod master;
pub mod packet;
pub mod slave;

#[cfg(test)]
mod tests;

pub use codec::{AckKind, Identifier};
pub use config::Config;
pub use master::Master;
pub use slave::Slave;
