//! umi-core — wire format, transactions and atomics of the Universal
//! Memory Interface. Every other UMI crate depends on this one.

pub mod atomic;
pub mod bitfield;
pub mod config;
pub mod transaction;
pub mod wire;

pub use atomic::{apply_atomic, AtomicOp};
pub use config::{ConfigError, UmiConfig};
pub use transaction::{packetize, Fragment, FragmentAssembler, Segment, Transaction};
pub use wire::{CmdClass, CmdType, CommandHeader, ResponseStatus, WireError};
