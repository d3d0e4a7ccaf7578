//! One end of a serial link: its side-band register file and the
//! credit-checked data plane behind it.

use umi_core::atomic::le_value;
use umi_core::config::LinkConfig;
use umi_core::transaction::LinkFragments;
use umi_core::wire::{CmdType, ResponseStatus};
use umi_core::{Fragment, FragmentAssembler, Transaction};

use super::registers::*;
use super::{Channel, LinkError, LinkState};
use crate::responder::{check_request, response_to};

/// Width code endpoints come out of reset with.
const RESET_WIDTH: u8 = 0;

/// One end of a serial link: register file, credit counters and the
/// receive-side reassembler.
#[derive(Debug)]
pub struct LinkEndpoint {
    base: u64,
    in_reset: bool,
    phy_up: bool,
    tx: Control,
    rx: Control,
    credit_init: CreditInit,
    default_credits: CreditInit,
    // [request, response]
    available: [u16; 2],
    reconfiguring: bool,
    state: LinkState,
    assembler: FragmentAssembler,
}

fn slot(channel: Channel) -> usize {
    match channel {
        Channel::Request => 0,
        Channel::Response => 1,
    }
}

impl LinkEndpoint {
    pub fn new(base: u64, config: &LinkConfig) -> Result<Self, LinkError> {
        let default_credits = CreditInit {
            request: config.request_credits,
            response: config.response_credits,
        };
        Ok(Self {
            base,
            in_reset: true,
            phy_up: false,
            tx: Control::enabled(RESET_WIDTH).with_credit(),
            rx: Control::enabled(RESET_WIDTH),
            credit_init: default_credits,
            default_credits,
            available: [default_credits.request, default_credits.response],
            reconfiguring: false,
            state: LinkState::Reset,
            assembler: FragmentAssembler::new(config.addr_width)?,
        })
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_link_active(&self) -> bool {
        !self.in_reset && self.phy_up && self.tx.enable && self.rx.enable
    }

    pub fn tx_control(&self) -> Control {
        self.tx
    }

    pub fn rx_control(&self) -> Control {
        self.rx
    }

    pub fn credits(&self, channel: Channel) -> u16 {
        self.available[slot(channel)]
    }

    /// Physical-layer link indication.
    pub fn set_phy_up(&mut self, up: bool) {
        self.phy_up = up;
        self.update_state();
    }

    pub fn decodes(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.base + WINDOW
    }

    // ── Registers ────────────────────────────────────────────────────────

    pub fn write_register(&mut self, offset: u64, value: u32) -> Result<(), LinkError> {
        match offset {
            RESET_CTRL => {
                let hold = value & 1 == 1;
                if hold && !self.in_reset {
                    self.enter_reset();
                } else if !hold && self.in_reset {
                    self.in_reset = false;
                }
            }
            TX_CTRL => {
                let next = Control::decode(value);
                self.note_width(self.tx.width, next.width);
                if next.credit_enable && !self.tx.credit_enable {
                    self.available = [self.credit_init.request, self.credit_init.response];
                }
                self.tx = next;
            }
            RX_CTRL => {
                let mut next = Control::decode(value);
                next.credit_enable = false;
                self.note_width(self.rx.width, next.width);
                self.rx = next;
            }
            TX_CREDIT_INIT => self.credit_init = CreditInit::decode(value),
            RESET_STATUS | LINK_ACTIVE | TX_REQ_CREDIT_UNAVAIL | TX_RESP_CREDIT_UNAVAIL
            | TX_REQ_CREDIT_AVAIL | TX_RESP_CREDIT_AVAIL => {
                return Err(LinkError::ReadOnlyRegister(offset))
            }
            _ => return Err(LinkError::UnknownRegister(offset)),
        }
        tracing::trace!(base = self.base, offset, value, "register write");
        self.update_state();
        Ok(())
    }

    pub fn read_register(&self, offset: u64) -> Result<u32, LinkError> {
        let unavailable = |ch: Channel, init: u16| init.saturating_sub(self.credits(ch)) as u32;
        Ok(match offset {
            RESET_STATUS | RESET_CTRL => self.in_reset as u32,
            LINK_ACTIVE => self.is_link_active() as u32,
            TX_CTRL => self.tx.encode()?,
            RX_CTRL => self.rx.encode()?,
            TX_CREDIT_INIT => self.credit_init.encode(),
            TX_REQ_CREDIT_UNAVAIL => unavailable(Channel::Request, self.credit_init.request),
            TX_RESP_CREDIT_UNAVAIL => unavailable(Channel::Response, self.credit_init.response),
            TX_REQ_CREDIT_AVAIL => self.credits(Channel::Request) as u32,
            TX_RESP_CREDIT_AVAIL => self.credits(Channel::Response) as u32,
            _ => return Err(LinkError::UnknownRegister(offset)),
        })
    }

    /// Service a side-band access: `POSTED`/`WRITE` stores a register,
    /// `READ` returns one as a 4-byte `RESP_READ`.
    pub fn handle_sideband(&mut self, req: &Transaction) -> Result<Option<Transaction>, LinkError> {
        check_request(req)?;
        if !self.decodes(req.dstaddr) {
            return Err(LinkError::Unmapped(req.dstaddr));
        }
        let offset = req.dstaddr - self.base;
        match req.cmd.cmd_type() {
            Some(CmdType::ReqPosted) => {
                let value = le_value(&req.data()?) as u32;
                self.write_register(offset, value)?;
                Ok(None)
            }
            Some(CmdType::ReqWrite) => {
                let value = le_value(&req.data()?) as u32;
                self.write_register(offset, value)?;
                let ack = response_to(req, CmdType::RespWrite, ResponseStatus::Okay, req.cmd.len(), bytes::Bytes::new())?;
                Ok(Some(ack))
            }
            Some(CmdType::ReqRead) => {
                let value = self.read_register(offset)?;
                let mut data = value.to_le_bytes().to_vec();
                data.resize(req.declared_len(), 0);
                let resp = response_to(req, CmdType::RespRead, ResponseStatus::Okay, req.cmd.len(), data)?;
                Ok(Some(resp))
            }
            _ => Err(LinkError::Unsupported(req.cmd.opcode())),
        }
    }

    // ── Data plane ───────────────────────────────────────────────────────

    /// Take one credit for `channel`.
    pub fn try_consume(&mut self, channel: Channel) -> Result<(), LinkError> {
        if self.state != LinkState::Active {
            return Err(LinkError::NotActive(self.state));
        }
        if !self.tx.credit_enable {
            return Err(LinkError::CreditDisabled);
        }
        let count = &mut self.available[slot(channel)];
        if *count == 0 {
            return Err(LinkError::NoCredit { channel });
        }
        *count -= 1;
        Ok(())
    }

    /// Return one credit after the peer acknowledged a receive.
    ///
    /// [`receive`](Self::receive) never returns credit on its own: whoever
    /// drives the link calls this on the transmitting endpoint once the
    /// packet it sent has been consumed at the far end.
    pub fn release(&mut self, channel: Channel) -> Result<(), LinkError> {
        let limit = match channel {
            Channel::Request => self.credit_init.request,
            Channel::Response => self.credit_init.response,
        };
        let count = &mut self.available[slot(channel)];
        if *count >= limit {
            return Err(LinkError::CreditOverflow { channel, limit });
        }
        *count += 1;
        Ok(())
    }

    /// Serialize `txn` into Tx-width fragments, spending one credit on its
    /// channel. Nothing is spent if the packet cannot be sent.
    pub fn transmit(&mut self, txn: &Transaction) -> Result<LinkFragments, LinkError> {
        let channel = Channel::for_header(&txn.cmd)?;
        let fragments = txn.split_for_link(self.tx.beat_bytes(), true, None)?;
        self.try_consume(channel)?;
        tracing::debug!(
            base = self.base,
            ?channel,
            header = %hex::encode(txn.header_bytes()),
            beats = fragments.len(),
            "transmit"
        );
        Ok(fragments)
    }

    /// Feed one received fragment; yields the packet on its last fragment.
    pub fn receive(&mut self, fragment: Fragment) -> Result<Option<Transaction>, LinkError> {
        if self.in_reset || !self.rx.enable {
            return Err(LinkError::NotActive(self.state));
        }
        Ok(self.assembler.push(fragment)?)
    }

    // ── State ────────────────────────────────────────────────────────────

    fn enter_reset(&mut self) {
        self.in_reset = true;
        self.tx = Control::enabled(RESET_WIDTH).with_credit();
        self.rx = Control::enabled(RESET_WIDTH);
        self.credit_init = self.default_credits;
        self.available = [self.credit_init.request, self.credit_init.response];
        self.reconfiguring = false;
        if let Ok(fresh) = FragmentAssembler::new(self.assembler_width()) {
            self.assembler = fresh;
        }
    }

    fn assembler_width(&self) -> u32 {
        self.assembler.addr_width()
    }

    fn note_width(&mut self, current: u8, next: u8) {
        if !self.in_reset && current != next {
            self.reconfiguring = true;
        }
    }

    fn update_state(&mut self) {
        let next = if self.in_reset {
            LinkState::Reset
        } else if self.is_link_active() && self.tx.width == self.rx.width {
            self.reconfiguring = false;
            LinkState::Active
        } else if self.reconfiguring {
            LinkState::Reconfiguring
        } else {
            LinkState::Configuring
        };
        if next != self.state {
            tracing::info!(base = self.base, from = ?self.state, to = ?next, "link state change");
            self.state = next;
        }
    }
}
