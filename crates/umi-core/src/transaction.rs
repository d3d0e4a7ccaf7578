//! Transactions: one complete protocol packet (header, address pair, payload).
//!
//! A transaction is serialised as the command word, the destination address
//! and the source address (each `addr_width / 8` bytes, little-endian),
//! followed by the payload. On a narrow physical channel that byte stream is
//! cut into fixed-size [`Fragment`]s, the final one tagged `last`.

use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::wire::{
    CmdType, CommandHeader, WireError, COMMAND_WORD_BYTES, DEFAULT_ADDR_WIDTH, MAX_BEATS, MAX_SIZE,
};

/// A complete protocol exchange.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub cmd: CommandHeader,
    pub dstaddr: u64,
    pub srcaddr: u64,
    pub payload: Bytes,
    addr_width: u32,
}

impl Transaction {
    /// A transaction with the default 64-bit address width.
    pub fn new(cmd: CommandHeader, dstaddr: u64, srcaddr: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            cmd,
            dstaddr,
            srcaddr,
            payload: payload.into(),
            addr_width: DEFAULT_ADDR_WIDTH,
        }
    }

    /// A transaction for a narrower address space.
    ///
    /// `addr_width` must be a multiple of 8 in `8..=64` and both addresses
    /// must fit in it.
    pub fn with_addr_width(
        cmd: CommandHeader,
        dstaddr: u64,
        srcaddr: u64,
        payload: impl Into<Bytes>,
        addr_width: u32,
    ) -> Result<Self, WireError> {
        check_addr_width(addr_width)?;
        for (field, value) in [("dstaddr", dstaddr), ("srcaddr", srcaddr)] {
            if addr_width < 64 && value >> addr_width != 0 {
                return Err(WireError::OutOfRange {
                    field,
                    value,
                    width: addr_width,
                });
            }
        }
        Ok(Self {
            cmd,
            dstaddr,
            srcaddr,
            payload: payload.into(),
            addr_width,
        })
    }

    pub fn addr_width(&self) -> u32 {
        self.addr_width
    }

    fn addr_bytes(&self) -> usize {
        (self.addr_width / 8) as usize
    }

    /// Bytes of the wire prefix: command word plus both addresses.
    pub fn header_len(&self) -> usize {
        COMMAND_WORD_BYTES + 2 * self.addr_bytes()
    }

    /// Canonical wire prefix: command word, destination, source.
    pub fn header_bytes(&self) -> Vec<u8> {
        let n = self.addr_bytes();
        let mut out = Vec::with_capacity(self.header_len());
        out.extend_from_slice(&self.cmd.to_bytes());
        out.extend_from_slice(&self.dstaddr.to_le_bytes()[..n]);
        out.extend_from_slice(&self.srcaddr.to_le_bytes()[..n]);
        out
    }

    /// Header prefix followed by the full payload.
    pub fn to_wire(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.header_len() + self.payload.len());
        out.extend_from_slice(&self.header_bytes());
        out.extend_from_slice(&self.payload);
        out.freeze()
    }

    /// Parse a header prefix plus declared payload.
    ///
    /// Bytes beyond the declared payload length are ignored.
    pub fn from_wire(bytes: &[u8], addr_width: u32) -> Result<Self, WireError> {
        check_addr_width(addr_width)?;
        let n = (addr_width / 8) as usize;
        let header_len = COMMAND_WORD_BYTES + 2 * n;
        if bytes.len() < header_len {
            return Err(WireError::PayloadUnderrun {
                needed: header_len,
                available: bytes.len(),
            });
        }
        let cmd = CommandHeader::from_bytes(bytes)?;
        let addr = |at: usize| {
            let mut buf = [0u8; 8];
            buf[..n].copy_from_slice(&bytes[at..at + n]);
            u64::from_le_bytes(buf)
        };
        let dstaddr = addr(COMMAND_WORD_BYTES);
        let srcaddr = addr(COMMAND_WORD_BYTES + n);
        let body = &bytes[header_len..];
        let needed = cmd.payload_len();
        if body.len() < needed {
            return Err(WireError::PayloadUnderrun {
                needed,
                available: body.len(),
            });
        }
        Ok(Self {
            cmd,
            dstaddr,
            srcaddr,
            payload: Bytes::copy_from_slice(&body[..needed]),
            addr_width,
        })
    }

    /// Bytes the header covers: written, read or operated on.
    pub fn declared_len(&self) -> usize {
        self.cmd.data_len()
    }

    /// Bytes that travel with the header. Zero for reads and write acks.
    pub fn payload_len(&self) -> usize {
        self.cmd.payload_len()
    }

    /// The declared payload, or `PayloadUnderrun` if fewer bytes are present.
    pub fn data(&self) -> Result<Bytes, WireError> {
        let needed = self.payload_len();
        if self.payload.len() < needed {
            return Err(WireError::PayloadUnderrun {
                needed,
                available: self.payload.len(),
            });
        }
        Ok(self.payload.slice(..needed))
    }

    /// Drop payload bytes beyond the declared length; left-pad with zeros
    /// when the payload is short.
    pub fn truncate_to_declared_length(&mut self) {
        let declared = self.payload_len();
        let have = self.payload.len();
        if have >= declared {
            self.payload = self.payload.slice(..declared);
        } else {
            let mut padded = BytesMut::zeroed(declared - have);
            padded.extend_from_slice(&self.payload);
            self.payload = padded.freeze();
        }
    }

    /// Cut this transaction into `beat_size`-byte link fragments.
    ///
    /// The stream is the declared payload, optionally preceded by the header
    /// prefix; the last fragment is zero-padded to `beat_size`. An empty
    /// stream (a payload-only split of a read) yields no fragments. Passing
    /// `override_last` forces the `last` flag of the final fragment, which
    /// is only useful for building deliberately malformed streams.
    pub fn split_for_link(
        &self,
        beat_size: usize,
        include_header: bool,
        override_last: Option<bool>,
    ) -> Result<LinkFragments, WireError> {
        if beat_size == 0 {
            return Err(WireError::InvalidBeatSize);
        }
        let data = self.data()?;
        let raw = if include_header {
            let mut buf = BytesMut::with_capacity(self.header_len() + data.len());
            buf.extend_from_slice(&self.header_bytes());
            buf.extend_from_slice(&data);
            buf.freeze()
        } else {
            data
        };
        Ok(LinkFragments {
            raw,
            beat_size,
            offset: 0,
            override_last,
            done: false,
        })
    }

    /// BLAKE3 of the canonical wire bytes. Used as a trace id.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.header_bytes());
        hasher.update(&self.payload);
        *hasher.finalize().as_bytes()
    }
}

fn check_addr_width(addr_width: u32) -> Result<(), WireError> {
    if addr_width == 0 || addr_width > 64 || addr_width % 8 != 0 {
        return Err(WireError::InvalidAddrWidth(addr_width));
    }
    Ok(())
}

/// Headers must be bit-identical. Write acknowledgements then only compare
/// the destination address; everything else compares the full wire bytes.
impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        if self.cmd.encode() != other.cmd.encode() {
            return false;
        }
        if self.cmd.is(CmdType::RespWrite) {
            return self.dstaddr == other.dstaddr;
        }
        self.header_bytes() == other.header_bytes() && self.payload == other.payload
    }
}

impl Eq for Transaction {}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "header = {} data = {} (opcode 0x{:02x}, dst 0x{:x}, {} bytes)",
            hex::encode(self.header_bytes()),
            hex::encode(&self.payload),
            self.cmd.opcode(),
            self.dstaddr,
            self.declared_len()
        )
    }
}

// ── Link fragments ───────────────────────────────────────────────────────────

/// One beat on a narrow physical channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub data: Bytes,
    pub last: bool,
}

/// Finite, non-restartable sequence of fragments for one transaction.
#[derive(Debug)]
pub struct LinkFragments {
    raw: Bytes,
    beat_size: usize,
    offset: usize,
    override_last: Option<bool>,
    done: bool,
}

impl Iterator for LinkFragments {
    type Item = Fragment;

    fn next(&mut self) -> Option<Fragment> {
        if self.done || self.offset >= self.raw.len() {
            self.done = true;
            return None;
        }
        let end = (self.offset + self.beat_size).min(self.raw.len());
        let is_final = end >= self.raw.len();
        let data = if end - self.offset == self.beat_size {
            self.raw.slice(self.offset..end)
        } else {
            let mut buf = BytesMut::zeroed(self.beat_size);
            buf[..end - self.offset].copy_from_slice(&self.raw[self.offset..end]);
            buf.freeze()
        };
        self.offset = end;
        let last = if is_final {
            self.done = true;
            self.override_last.unwrap_or(true)
        } else {
            false
        };
        Some(Fragment { data, last })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        let remaining = self.raw.len() - self.offset;
        let n = remaining.div_ceil(self.beat_size);
        (n, Some(n))
    }
}

impl ExactSizeIterator for LinkFragments {}

/// Concatenate fragment payloads and drop padding beyond `declared_len`.
pub fn reassemble<I>(fragments: I, declared_len: usize) -> Result<Bytes, WireError>
where
    I: IntoIterator<Item = Fragment>,
{
    let mut buf = BytesMut::new();
    for fragment in fragments {
        buf.extend_from_slice(&fragment.data);
        if fragment.last {
            break;
        }
    }
    if buf.len() < declared_len {
        return Err(WireError::PayloadUnderrun {
            needed: declared_len,
            available: buf.len(),
        });
    }
    buf.truncate(declared_len);
    Ok(buf.freeze())
}

/// Rebuilds transactions from a header-carrying fragment stream.
#[derive(Debug)]
pub struct FragmentAssembler {
    addr_width: u32,
    buf: BytesMut,
}

impl FragmentAssembler {
    pub fn new(addr_width: u32) -> Result<Self, WireError> {
        check_addr_width(addr_width)?;
        Ok(Self {
            addr_width,
            buf: BytesMut::new(),
        })
    }

    pub fn addr_width(&self) -> u32 {
        self.addr_width
    }

    /// Bytes accumulated for the packet in progress.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Feed one fragment. Returns the transaction once `last` arrives.
    ///
    /// A `last` that arrives before the declared payload is complete is a
    /// premature end of message and yields `PayloadUnderrun`; the partial
    /// packet is discarded either way.
    pub fn push(&mut self, fragment: Fragment) -> Result<Option<Transaction>, WireError> {
        self.buf.extend_from_slice(&fragment.data);
        if !fragment.last {
            return Ok(None);
        }
        let bytes = self.buf.split().freeze();
        let txn = Transaction::from_wire(&bytes, self.addr_width)?;
        tracing::trace!(
            opcode = txn.cmd.opcode(),
            dstaddr = txn.dstaddr,
            bytes = txn.declared_len(),
            "fragment stream reassembled"
        );
        Ok(Some(txn))
    }
}

// ── Packetization ────────────────────────────────────────────────────────────

/// One contiguous protocol packet produced by [`packetize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub addr: u64,
    /// Offset into the source buffer.
    pub offset: usize,
    pub size: u8,
    pub len: u8,
}

impl Segment {
    pub fn bytes(&self) -> usize {
        (self.len as usize + 1) << self.size
    }
}

/// Plan protocol packets for `total` contiguous bytes starting at `addr`.
///
/// No segment crosses a multiple of `boundary` (a power of two) or carries
/// more than `max_bytes`. Each segment uses the widest `size` that divides
/// both its length and its start address while keeping `len` within 256
/// beats.
pub fn packetize(addr: u64, total: usize, boundary: u64, max_bytes: usize) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    let max_bytes = max_bytes.clamp(1, MAX_BEATS << MAX_SIZE);
    while offset < total {
        let at = addr + offset as u64;
        let to_boundary = if boundary.is_power_of_two() {
            (boundary - (at & (boundary - 1))) as usize
        } else {
            usize::MAX
        };
        let chunk = (total - offset).min(to_boundary).min(max_bytes);
        let (size, beats) = widest_size(at, chunk);
        let seg = Segment {
            addr: at,
            offset,
            size,
            len: (beats - 1) as u8,
        };
        offset += seg.bytes();
        out.push(seg);
    }
    out
}

/// Widest `(size, beats)` whose beats tile a prefix of `chunk` at `at`.
fn widest_size(at: u64, chunk: usize) -> (u8, usize) {
    for size in (0..=MAX_SIZE).rev() {
        let beat = 1usize << size;
        if chunk % beat == 0 && at % beat as u64 == 0 && chunk / beat <= MAX_BEATS {
            return (size, chunk / beat);
        }
    }
    (0, chunk.min(MAX_BEATS))
}
