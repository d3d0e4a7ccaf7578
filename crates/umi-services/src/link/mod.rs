//! Link flow-control engine.
//!
//! Each [`LinkEndpoint`] owns its register file and credit counters; the
//! only way to change them is a register write, which arrives as an
//! ordinary protocol transaction on the side-band. [`LinkController`]
//! drives the bring-up sequence through a [`SidebandPort`].

mod controller;
mod endpoint;
pub mod registers;
mod sideband;

pub use controller::LinkController;
pub use endpoint::LinkEndpoint;
pub use sideband::{LoopbackSideband, SidebandPort};

use umi_core::wire::{CmdClass, CommandHeader};
use umi_core::WireError;

use crate::responder::ResponderError;

/// Endpoint lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Held in reset; data-plane packets are refused.
    Reset,
    /// Out of reset, link not yet active.
    Configuring,
    /// A width change is in progress.
    Reconfiguring,
    Active,
}

/// Request and response traffic is credited independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Request,
    Response,
}

impl Channel {
    pub fn for_header(cmd: &CommandHeader) -> Result<Self, LinkError> {
        match cmd.class() {
            CmdClass::Request => Ok(Channel::Request),
            CmdClass::Response => Ok(Channel::Response),
            CmdClass::Invalid => Err(WireError::UnknownCommand(cmd.opcode()).into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("link did not become active at {base:#x} after {polls} polls")]
    ConfigurationTimeout { base: u64, polls: u32 },

    #[error("endpoint {base:#x} still in reset after release")]
    ResetStuck { base: u64 },

    #[error("link not active (state {0:?})")]
    NotActive(LinkState),

    #[error("credit accounting disabled")]
    CreditDisabled,

    #[error("no {channel:?} credit available")]
    NoCredit { channel: Channel },

    #[error("{channel:?} credit returned beyond initial {limit}")]
    CreditOverflow { channel: Channel, limit: u16 },

    #[error("no register at offset {0:#x}")]
    UnknownRegister(u64),

    #[error("register at offset {0:#x} is read-only")]
    ReadOnlyRegister(u64),

    #[error("address {0:#x} is not decoded by any endpoint")]
    Unmapped(u64),

    #[error("unexpected side-band response: {0}")]
    BadResponse(String),

    #[error("opcode 0x{0:02x} not supported on the side-band")]
    Unsupported(u8),

    #[error(transparent)]
    Responder(#[from] ResponderError),

    #[error(transparent)]
    Wire(#[from] WireError),
}
