//! Side-band register access.
//!
//! Register reads and writes are ordinary 32-bit protocol transactions
//! against the endpoints' reserved address windows.

use std::future::Future;

use umi_core::atomic::le_value;
use umi_core::config::LinkConfig;
use umi_core::wire::{CmdType, CommandHeader, ResponseStatus};
use umi_core::Transaction;

use super::registers::{LOCAL_BASE, REMOTE_BASE};
use super::{LinkEndpoint, LinkError};

/// Register access over the side-band channel.
///
/// Accesses are 32-bit: writes are `POSTED` (no acknowledgement) and reads
/// are `READ` with a 4-byte `RESP_READ`.
pub trait SidebandPort {
    fn posted_write(&mut self, addr: u64, value: u32)
        -> impl Future<Output = Result<(), LinkError>> + Send;

    fn read(&mut self, addr: u64) -> impl Future<Output = Result<u32, LinkError>> + Send;
}

/// Side-band port wired straight into a local/remote endpoint pair.
///
/// Every access is built as a protocol transaction and routed to the
/// endpoint that decodes its address. Writes are recorded in issue order.
#[derive(Debug)]
pub struct LoopbackSideband {
    local: LinkEndpoint,
    remote: LinkEndpoint,
    srcaddr: u64,
    addr_width: u32,
    writes: Vec<(u64, u32)>,
}

impl LoopbackSideband {
    /// Both endpoints held in reset with the physical link up.
    pub fn new(config: &LinkConfig) -> Result<Self, LinkError> {
        let mut local = LinkEndpoint::new(LOCAL_BASE, config)?;
        let mut remote = LinkEndpoint::new(REMOTE_BASE, config)?;
        local.set_phy_up(true);
        remote.set_phy_up(true);
        Ok(Self {
            local,
            remote,
            srcaddr: 0,
            addr_width: config.addr_width,
            writes: Vec::new(),
        })
    }

    pub fn local(&self) -> &LinkEndpoint {
        &self.local
    }

    pub fn remote(&self) -> &LinkEndpoint {
        &self.remote
    }

    pub fn local_mut(&mut self) -> &mut LinkEndpoint {
        &mut self.local
    }

    pub fn remote_mut(&mut self) -> &mut LinkEndpoint {
        &mut self.remote
    }

    /// Both endpoints at once, for driving traffic across the link.
    pub fn endpoints_mut(&mut self) -> (&mut LinkEndpoint, &mut LinkEndpoint) {
        (&mut self.local, &mut self.remote)
    }

    /// `(address, value)` of every write so far.
    pub fn writes(&self) -> &[(u64, u32)] {
        &self.writes
    }

    fn access(&self, opcode: CmdType, addr: u64, payload: Vec<u8>) -> Result<Transaction, LinkError> {
        let cmd = CommandHeader::builder(opcode).size(2).eom(true).build()?;
        Ok(Transaction::with_addr_width(
            cmd,
            addr,
            self.srcaddr,
            payload,
            self.addr_width,
        )?)
    }

    fn route(&mut self, txn: &Transaction) -> Result<Option<Transaction>, LinkError> {
        if self.local.decodes(txn.dstaddr) {
            self.local.handle_sideband(txn)
        } else if self.remote.decodes(txn.dstaddr) {
            self.remote.handle_sideband(txn)
        } else {
            Err(LinkError::Unmapped(txn.dstaddr))
        }
    }
}

impl SidebandPort for LoopbackSideband {
    async fn posted_write(&mut self, addr: u64, value: u32) -> Result<(), LinkError> {
        let txn = self.access(CmdType::ReqPosted, addr, value.to_le_bytes().to_vec())?;
        tracing::trace!(header = %hex::encode(txn.header_bytes()), value, "side-band write");
        self.route(&txn)?;
        self.writes.push((addr, value));
        Ok(())
    }

    async fn read(&mut self, addr: u64) -> Result<u32, LinkError> {
        let txn = self.access(CmdType::ReqRead, addr, Vec::new())?;
        let resp = self
            .route(&txn)?
            .ok_or_else(|| LinkError::BadResponse(format!("no response to read at {addr:#x}")))?;
        if !resp.cmd.is(CmdType::RespRead) || resp.cmd.status() != ResponseStatus::Okay {
            return Err(LinkError::BadResponse(resp.to_string()));
        }
        Ok(le_value(&resp.data()?) as u32)
    }
}
