//! Bus bridges: foreign bus transactions in, protocol transactions out.
//!
//! A [`BusAdapter`] knows one foreign bus. It splits a foreign request into
//! protocol requests and folds the protocol responses back into the foreign
//! response. [`Bridge`] wraps an adapter with the queueing rules every bus
//! shares:
//!
//! - A foreign request is admitted only when all of its protocol packets fit
//!   the outbound queue. Otherwise it is handed back as
//!   [`Admission::Stalled`] and nothing is queued.
//! - Protocol responses are matched in order against the oldest outstanding
//!   request of their source id (the response's destination address).
//! - A response that would complete a foreign request while the foreign
//!   response queue is full is handed back the same way.
//! - A request that translates to no packets at all (an AXI write with every
//!   strobe low) completes with an `OKAY` response once every earlier request
//!   of its source id has completed.

mod apb;
mod axi;
mod tilelink;

pub use apb::{ApbAdapter, ApbCompleter, ApbMemory, ApbRequest, ApbResponse, ApbTarget};
pub use axi::{
    Axi4Adapter, AxiAtomic, AxiAtomicOp, AxiBeat, AxiRead, AxiReadBeat, AxiRequest, AxiResponse,
    AxiWrite, Burst,
};
pub use tilelink::{
    TileLinkAdapter, TlArith, TlLogic, TlOpcode, TlRequest, TlResponse, TlResponseOpcode,
};

use std::collections::{HashMap, VecDeque};
use std::fmt;

use bytes::Bytes;
use umi_core::atomic::AtomicOp;
use umi_core::config::BridgeConfig;
use umi_core::wire::{CmdType, CommandHeader, ResponseStatus};
use umi_core::{packetize, Transaction, WireError};

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("byte mask {mask:#x} of beat {beat} is not contiguous")]
    NonContiguousMask { beat: usize, mask: u128 },

    #[error("access carries no enabled bytes")]
    EmptyAccess,

    #[error("address {addr:#x} is not aligned to {bytes} bytes")]
    Misaligned { addr: u64, bytes: usize },

    #[error("invalid burst: {0}")]
    InvalidBurst(&'static str),

    #[error("expected {expected} data bytes, got {actual}")]
    DataLength { expected: usize, actual: usize },

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("request split into {packets} packets, queue holds {capacity}")]
    TooLarge { packets: usize, capacity: usize },

    #[error("unexpected packet for source {source_id:#x} (opcode 0x{opcode:02x})")]
    UnexpectedPacket { source_id: u64, opcode: u8 },

    #[error("sequence mismatch for source {source_id:#x}: expected opcode 0x{expected:02x}, got 0x{actual:02x}")]
    SequenceMismatch {
        source_id: u64,
        expected: u8,
        actual: u8,
    },

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Outcome of offering an input to a bridge queue.
#[derive(Debug)]
pub enum Admission<T> {
    /// Taken; carries the number of protocol packets queued.
    Accepted(usize),
    /// Refused by backpressure; the input is handed back untouched.
    Stalled(T),
}

impl<T> Admission<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted(_))
    }
}

// ── Adapter trait ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Atomic,
}

/// One foreign bus.
pub trait BusAdapter {
    type Request: fmt::Debug;
    type Response: fmt::Debug;

    fn access(req: &Self::Request) -> Access;

    /// Transaction id; responses for one id complete in issue order.
    fn source_id(req: &Self::Request) -> u64;

    fn split_write(&self, req: &Self::Request) -> Result<Vec<Transaction>, BridgeError>;

    fn split_read(&self, req: &Self::Request) -> Result<Vec<Transaction>, BridgeError>;

    fn split_atomic(&self, req: &Self::Request) -> Result<Vec<Transaction>, BridgeError>;

    /// Fold the responses (in packet order) into the foreign response.
    fn translate_response(
        &self,
        req: &Self::Request,
        responses: &[Transaction],
    ) -> Result<Self::Response, BridgeError>;

    fn split(&self, req: &Self::Request) -> Result<Vec<Transaction>, BridgeError> {
        match Self::access(req) {
            Access::Read => self.split_read(req),
            Access::Write => self.split_write(req),
            Access::Atomic => self.split_atomic(req),
        }
    }
}

// ── Bridge ───────────────────────────────────────────────────────────────────

struct Pending<R> {
    request: R,
    expected: VecDeque<CmdType>,
    responses: Vec<Transaction>,
}

/// Queueing and ordering around a [`BusAdapter`].
pub struct Bridge<A: BusAdapter> {
    adapter: A,
    outbound: VecDeque<Transaction>,
    inflight: HashMap<u64, VecDeque<Pending<A::Request>>>,
    completed: VecDeque<A::Response>,
    request_capacity: usize,
    response_capacity: usize,
}

impl<A: BusAdapter> Bridge<A> {
    pub fn new(adapter: A, config: &BridgeConfig) -> Self {
        Self {
            adapter,
            outbound: VecDeque::new(),
            inflight: HashMap::new(),
            completed: VecDeque::new(),
            request_capacity: config.request_queue.max(1),
            response_capacity: config.response_queue.max(1),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Foreign-side ready: room for at least one more protocol packet.
    pub fn foreign_ready(&self) -> bool {
        self.outbound.len() < self.request_capacity
    }

    /// Protocol-side ready: room for one more completed foreign response.
    pub fn protocol_ready(&self) -> bool {
        self.completed.len() < self.response_capacity
    }

    /// Translate and queue a foreign request, all packets or none.
    ///
    /// Translation errors reject the request outright; lack of queue space
    /// stalls it.
    pub fn try_accept(&mut self, req: A::Request) -> Result<Admission<A::Request>, BridgeError> {
        let packets = self.adapter.split(&req)?;
        if packets.len() > self.request_capacity {
            return Err(BridgeError::TooLarge {
                packets: packets.len(),
                capacity: self.request_capacity,
            });
        }
        if self.outbound.len() + packets.len() > self.request_capacity {
            tracing::trace!(queued = self.outbound.len(), needed = packets.len(), "bridge stalled");
            return Ok(Admission::Stalled(req));
        }
        let expected: VecDeque<CmdType> =
            packets.iter().filter_map(|p| p.cmd.response_type()).collect();
        if expected.is_empty() && !packets.is_empty() {
            return Err(BridgeError::Unsupported("translation without acknowledged packets"));
        }
        let source_id = A::source_id(&req);
        let count = packets.len();
        for p in &packets {
            tracing::debug!(
                source_id,
                header = %hex::encode(p.header_bytes()),
                dstaddr = p.dstaddr,
                bytes = p.declared_len(),
                "bridge request"
            );
        }
        self.outbound.extend(packets);
        self.inflight
            .entry(source_id)
            .or_default()
            .push_back(Pending {
                request: req,
                expected,
                responses: Vec::new(),
            });
        if count == 0 {
            tracing::debug!(source_id, "foreign request needs no packets");
            self.settle(source_id)?;
        }
        Ok(Admission::Accepted(count))
    }

    /// Next protocol request to issue, in admission order.
    pub fn poll_request(&mut self) -> Option<Transaction> {
        self.outbound.pop_front()
    }

    pub fn queued_requests(&self) -> usize {
        self.outbound.len()
    }

    /// Accept one protocol response.
    pub fn push_response(&mut self, resp: Transaction) -> Result<Admission<Transaction>, BridgeError> {
        let source_id = resp.dstaddr;
        let opcode = resp.cmd.opcode();
        let Some(queue) = self.inflight.get_mut(&source_id) else {
            return Err(BridgeError::UnexpectedPacket { source_id, opcode });
        };
        let Some(pending) = queue.front_mut() else {
            return Err(BridgeError::UnexpectedPacket { source_id, opcode });
        };
        let Some(&want) = pending.expected.front() else {
            return Err(BridgeError::UnexpectedPacket { source_id, opcode });
        };
        if want.code() != opcode {
            return Err(BridgeError::SequenceMismatch {
                source_id,
                expected: want.code(),
                actual: opcode,
            });
        }
        let completes = pending.expected.len() == 1;
        if completes && self.completed.len() >= self.response_capacity {
            return Ok(Admission::Stalled(resp));
        }
        if resp.cmd.status().is_error() {
            tracing::warn!(source_id, status = ?resp.cmd.status(), dstaddr = resp.srcaddr, "responder reported error");
        }
        pending.expected.pop_front();
        pending.responses.push(resp);
        if completes {
            self.settle(source_id)?;
        }
        Ok(Admission::Accepted(1))
    }

    /// Complete, in order, every request at the head of `source_id`'s queue
    /// that has all its responses, while the foreign response queue has room.
    fn settle(&mut self, source_id: u64) -> Result<(), BridgeError> {
        while self.completed.len() < self.response_capacity {
            let Some(queue) = self.inflight.get_mut(&source_id) else {
                return Ok(());
            };
            if !queue.front().is_some_and(|p| p.expected.is_empty()) {
                return Ok(());
            }
            let Some(done) = queue.pop_front() else {
                return Ok(());
            };
            if queue.is_empty() {
                self.inflight.remove(&source_id);
            }
            let response = self.adapter.translate_response(&done.request, &done.responses)?;
            tracing::debug!(source_id, packets = done.responses.len(), "foreign request complete");
            self.completed.push_back(response);
        }
        Ok(())
    }

    /// Next completed foreign response.
    ///
    /// Freeing a slot lets requests that were waiting only on queue room
    /// complete.
    pub fn pop_response(&mut self) -> Option<A::Response> {
        let out = self.completed.pop_front()?;
        let sources: Vec<u64> = self.inflight.keys().copied().collect();
        for source_id in sources {
            if let Err(e) = self.settle(source_id) {
                tracing::warn!(source_id, error = %e, "completing foreign request failed");
            }
        }
        Some(out)
    }

    /// Foreign requests still waiting for protocol responses.
    pub fn outstanding(&self) -> usize {
        self.inflight.values().map(VecDeque::len).sum()
    }

    pub fn is_idle(&self) -> bool {
        self.outbound.is_empty() && self.inflight.is_empty() && self.completed.is_empty()
    }
}

// ── Shared translation helpers ───────────────────────────────────────────────

/// First and count of set bits in `mask` over `lanes` byte lanes.
///
/// `Ok(None)` for an empty mask; `Err(())` when the set bits have a gap.
pub(crate) fn mask_span(mask: u128, lanes: usize) -> Result<Option<(usize, usize)>, ()> {
    let mask = if lanes >= 128 {
        mask
    } else {
        mask & ((1u128 << lanes) - 1)
    };
    if mask == 0 {
        return Ok(None);
    }
    let first = mask.trailing_zeros() as usize;
    let count = (mask >> first).trailing_ones() as usize;
    if mask.checked_shr((first + count) as u32).unwrap_or(0) != 0 {
        return Err(());
    }
    Ok(Some((first, count)))
}

/// `WRITE` packets covering `data` at `addr`.
pub(crate) fn write_packets(
    addr: u64,
    data: &[u8],
    srcaddr: u64,
    config: &BridgeConfig,
) -> Result<Vec<Transaction>, BridgeError> {
    packetize(addr, data.len(), config.boundary, config.max_packet_bytes)
        .into_iter()
        .map(|seg| {
            let cmd = CommandHeader::builder(CmdType::ReqWrite)
                .size(seg.size as u64)
                .len(seg.len as u64)
                .eom(true)
                .build()?;
            let payload = Bytes::copy_from_slice(&data[seg.offset..seg.offset + seg.bytes()]);
            Ok(Transaction::new(cmd, seg.addr, srcaddr, payload))
        })
        .collect()
}

/// `READ` packets covering `len` bytes at `addr`.
pub(crate) fn read_packets(
    addr: u64,
    len: usize,
    srcaddr: u64,
    config: &BridgeConfig,
) -> Result<Vec<Transaction>, BridgeError> {
    packetize(addr, len, config.boundary, config.max_packet_bytes)
        .into_iter()
        .map(|seg| {
            let cmd = CommandHeader::builder(CmdType::ReqRead)
                .size(seg.size as u64)
                .len(seg.len as u64)
                .build()?;
            Ok(Transaction::new(cmd, seg.addr, srcaddr, Bytes::new()))
        })
        .collect()
}

/// One `ATOMIC` packet. Operands are 1, 2, 4 or 8 bytes, naturally aligned.
pub(crate) fn atomic_packet(
    addr: u64,
    op: AtomicOp,
    operand: &[u8],
    srcaddr: u64,
) -> Result<Transaction, BridgeError> {
    let bytes = operand.len();
    if !matches!(bytes, 1 | 2 | 4 | 8) {
        return Err(BridgeError::Unsupported("atomic operand must be 1, 2, 4 or 8 bytes"));
    }
    if addr % bytes as u64 != 0 {
        return Err(BridgeError::Misaligned { addr, bytes });
    }
    let cmd = CommandHeader::builder(CmdType::ReqAtomic)
        .size(bytes.trailing_zeros() as u64)
        .atomic(op)
        .build()?;
    Ok(Transaction::new(cmd, addr, srcaddr, operand.to_vec()))
}

/// Combined status of several responses: the first error wins, `EXOKAY`
/// only if every response was exclusive-okay.
pub(crate) fn merge_status<I>(statuses: I) -> ResponseStatus
where
    I: IntoIterator<Item = ResponseStatus>,
{
    let mut all_exclusive = true;
    let mut any = false;
    for status in statuses {
        any = true;
        if status.is_error() {
            return status;
        }
        all_exclusive &= status == ResponseStatus::ExOkay;
    }
    if any && all_exclusive {
        ResponseStatus::ExOkay
    } else {
        ResponseStatus::Okay
    }
}

/// Read data of every response in order, with each byte's status.
pub(crate) fn read_stream(
    responses: &[Transaction],
) -> Result<(Vec<u8>, Vec<ResponseStatus>), BridgeError> {
    let mut data = Vec::new();
    let mut status = Vec::new();
    for resp in responses {
        let bytes = resp.data()?;
        status.extend(std::iter::repeat(resp.cmd.status()).take(bytes.len()));
        data.extend_from_slice(&bytes);
    }
    Ok((data, status))
}
