//! Link register map and control-word layouts.
//!
//! Offsets are relative to an endpoint's side-band base. The host sees the
//! local endpoint at [`LOCAL_BASE`] and the far end at [`REMOTE_BASE`].

use static_assertions::const_assert;
use umi_core::bitfield::{BitField, PacketLayout};
use umi_core::WireError;

pub const LOCAL_BASE: u64 = 0x7000_0000;
pub const REMOTE_BASE: u64 = 0x6000_0000;

/// Bytes of side-band address space decoded per endpoint.
pub const WINDOW: u64 = 0x100;

pub const RESET_STATUS: u64 = 0x00;
pub const LINK_ACTIVE: u64 = 0x04;
pub const RESET_CTRL: u64 = 0x0C;
pub const TX_CTRL: u64 = 0x10;
pub const RX_CTRL: u64 = 0x14;
pub const TX_CREDIT_INIT: u64 = 0x20;
pub const TX_REQ_CREDIT_UNAVAIL: u64 = 0x30;
pub const TX_RESP_CREDIT_UNAVAIL: u64 = 0x34;
pub const TX_REQ_CREDIT_AVAIL: u64 = 0x38;
pub const TX_RESP_CREDIT_AVAIL: u64 = 0x3C;

// ── Control word ─────────────────────────────────────────────────────────────

pub const CTRL_ENABLE: BitField = BitField::new("enable", 0, 1);
pub const CTRL_CREDIT_ENABLE: BitField = BitField::new("credit_enable", 4, 1);
pub const CTRL_WIDTH: BitField = BitField::new("width", 16, 8);

const CTRL_FIELD_TABLE: [BitField; 3] = [CTRL_ENABLE, CTRL_CREDIT_ENABLE, CTRL_WIDTH];
static CTRL_FIELDS: [BitField; 3] = CTRL_FIELD_TABLE;
pub static CTRL_LAYOUT: PacketLayout = PacketLayout::new(32, &CTRL_FIELDS);
const_assert!(PacketLayout::new(32, &CTRL_FIELD_TABLE).is_well_formed());

/// Decoded Tx/Rx control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Control {
    pub enable: bool,
    /// Tx only; ignored on Rx.
    pub credit_enable: bool,
    pub width: u8,
}

impl Control {
    pub fn disabled(width: u8) -> Self {
        Self {
            enable: false,
            credit_enable: false,
            width,
        }
    }

    pub fn enabled(width: u8) -> Self {
        Self {
            enable: true,
            credit_enable: false,
            width,
        }
    }

    pub fn with_credit(mut self) -> Self {
        self.credit_enable = true;
        self
    }

    pub fn decode(word: u32) -> Self {
        let w = word as u64;
        Self {
            enable: CTRL_ENABLE.extract(w) == 1,
            credit_enable: CTRL_CREDIT_ENABLE.extract(w) == 1,
            width: CTRL_WIDTH.extract(w) as u8,
        }
    }

    pub fn encode(&self) -> Result<u32, WireError> {
        let word = CTRL_LAYOUT
            .builder()
            .set("enable", self.enable as u64)?
            .set("credit_enable", self.credit_enable as u64)?
            .set("width", self.width as u64)?
            .finish();
        Ok(word as u32)
    }

    /// Bytes per beat on the serial link.
    pub fn beat_bytes(&self) -> usize {
        1usize << self.width.min(7)
    }
}

// ── Credit init word ─────────────────────────────────────────────────────────

pub const CREDIT_REQ: BitField = BitField::new("request", 0, 16);
pub const CREDIT_RESP: BitField = BitField::new("response", 16, 16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditInit {
    pub request: u16,
    pub response: u16,
}

impl CreditInit {
    pub fn decode(word: u32) -> Self {
        Self {
            request: CREDIT_REQ.extract(word as u64) as u16,
            response: CREDIT_RESP.extract(word as u64) as u16,
        }
    }

    pub fn encode(&self) -> u32 {
        (self.request as u32) | (self.response as u32) << 16
    }
}
