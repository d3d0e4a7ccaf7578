//! AXI4 and AXI4-lite adapter.
//!
//! Beats are bus-wide (`data_bytes` lanes); a beat's byte address comes from
//! the burst type. Strobes are clipped to the lanes a beat may legally use
//! and must then be contiguous. Contiguous beats are coalesced into as few
//! protocol packets as the boundary allows, except for FIXED bursts where
//! every beat becomes its own packet(s) so the last beat wins at the target.
//! RESP codes are the protocol status codes, passed through verbatim.

use umi_core::atomic::AtomicOp;
use umi_core::config::BridgeConfig;
use umi_core::Transaction;

use super::{
    atomic_packet, mask_span, merge_status, read_packets, read_stream, write_packets, Access,
    BridgeError, BusAdapter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Burst {
    Fixed,
    Incr,
    Wrap,
}

/// One write data beat: `data_bytes` lanes and their strobes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxiBeat {
    pub data: Vec<u8>,
    pub strb: u128,
}

#[derive(Debug, Clone)]
pub struct AxiWrite {
    pub id: u64,
    pub addr: u64,
    /// log2 bytes per beat.
    pub size: u8,
    pub burst: Burst,
    pub beats: Vec<AxiBeat>,
}

#[derive(Debug, Clone)]
pub struct AxiRead {
    pub id: u64,
    pub addr: u64,
    pub size: u8,
    /// Beats minus one.
    pub len: u8,
    pub burst: Burst,
}

/// AXI5 atomic transaction types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxiAtomicOp {
    Add,
    Clr,
    Eor,
    Set,
    SMax,
    SMin,
    UMax,
    UMin,
    Swap,
    Compare,
}

#[derive(Debug, Clone)]
pub struct AxiAtomic {
    pub id: u64,
    pub addr: u64,
    pub op: AxiAtomicOp,
    /// Little-endian operand, 1, 2, 4 or 8 bytes.
    pub operand: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum AxiRequest {
    Write(AxiWrite),
    Read(AxiRead),
    Atomic(AxiAtomic),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxiReadBeat {
    pub data: Vec<u8>,
    pub resp: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AxiResponse {
    Write { id: u64, resp: u8 },
    Read { id: u64, beats: Vec<AxiReadBeat> },
    Atomic { id: u64, data: Vec<u8>, resp: u8 },
}

/// Manager-side AXI bridge.
#[derive(Debug, Clone)]
pub struct Axi4Adapter {
    config: BridgeConfig,
    lite: bool,
}

impl Axi4Adapter {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            lite: false,
        }
    }

    /// AXI4-lite: single full-width beats, no atomics.
    pub fn lite(config: BridgeConfig) -> Self {
        Self { config, lite: true }
    }

    pub fn is_lite(&self) -> bool {
        self.lite
    }

    fn data_bytes(&self) -> usize {
        self.config.data_bytes
    }

    /// Byte address of every beat.
    fn beat_addrs(&self, addr: u64, size: u8, beats: usize, burst: Burst) -> Result<Vec<u64>, BridgeError> {
        let n = 1u64 << size;
        if n as usize > self.data_bytes() {
            return Err(BridgeError::InvalidBurst("beat size wider than the data bus"));
        }
        if beats == 0 || beats > 256 {
            return Err(BridgeError::InvalidBurst("burst length must be 1..=256 beats"));
        }
        if self.lite && beats != 1 {
            return Err(BridgeError::Unsupported("bursts on AXI4-lite"));
        }
        let aligned = addr & !(n - 1);
        Ok(match burst {
            Burst::Fixed => vec![addr; beats],
            Burst::Incr => (0..beats as u64)
                .map(|i| if i == 0 { Some(addr) } else { aligned.checked_add(i * n) })
                .collect::<Option<Vec<u64>>>()
                .ok_or(BridgeError::InvalidBurst("burst runs past the end of the address space"))?,
            Burst::Wrap => {
                if addr != aligned {
                    return Err(BridgeError::Misaligned {
                        addr,
                        bytes: n as usize,
                    });
                }
                if !matches!(beats, 2 | 4 | 8 | 16) {
                    return Err(BridgeError::InvalidBurst("wrap length must be 2, 4, 8 or 16"));
                }
                let span = n * beats as u64;
                let lower = addr & !(span - 1);
                (0..beats as u64)
                    .map(|i| lower + (addr - lower + i * n) % span)
                    .collect()
            }
        })
    }

    /// Bytes a beat at `beat_addr` transfers: from the address up to the end
    /// of its size-aligned container.
    fn beat_len(beat_addr: u64, size: u8) -> usize {
        let n = 1u64 << size;
        (n - (beat_addr & (n - 1))) as usize
    }

    fn lane(&self, addr: u64) -> usize {
        (addr % self.data_bytes() as u64) as usize
    }

    fn bus_word(&self, addr: u64) -> u64 {
        addr & !(self.data_bytes() as u64 - 1)
    }

    /// Contiguous `(addr, bytes)` regions, in beat order.
    fn coalesce(regions: impl Iterator<Item = (u64, Vec<u8>)>, burst: Burst) -> Vec<(u64, Vec<u8>)> {
        let mut out: Vec<(u64, Vec<u8>)> = Vec::new();
        for (addr, bytes) in regions {
            if burst != Burst::Fixed {
                if let Some((start, acc)) = out.last_mut() {
                    if start.checked_add(acc.len() as u64) == Some(addr) {
                        acc.extend_from_slice(&bytes);
                        continue;
                    }
                }
            }
            out.push((addr, bytes));
        }
        out
    }

    fn read_regions(&self, req: &AxiRead) -> Result<Vec<(u64, usize)>, BridgeError> {
        let addrs = self.beat_addrs(req.addr, req.size, req.len as usize + 1, req.burst)?;
        let mut out: Vec<(u64, usize)> = Vec::new();
        for addr in addrs {
            let len = Self::beat_len(addr, req.size);
            if req.burst != Burst::Fixed {
                if let Some((start, acc)) = out.last_mut() {
                    if start.checked_add(*acc as u64) == Some(addr) {
                        *acc += len;
                        continue;
                    }
                }
            }
            out.push((addr, len));
        }
        Ok(out)
    }
}

impl BusAdapter for Axi4Adapter {
    type Request = AxiRequest;
    type Response = AxiResponse;

    fn access(req: &AxiRequest) -> Access {
        match req {
            AxiRequest::Write(_) => Access::Write,
            AxiRequest::Read(_) => Access::Read,
            AxiRequest::Atomic(_) => Access::Atomic,
        }
    }

    fn source_id(req: &AxiRequest) -> u64 {
        match req {
            AxiRequest::Write(w) => w.id,
            AxiRequest::Read(r) => r.id,
            AxiRequest::Atomic(a) => a.id,
        }
    }

    fn split_write(&self, req: &AxiRequest) -> Result<Vec<Transaction>, BridgeError> {
        let AxiRequest::Write(w) = req else {
            return Err(BridgeError::Unsupported("not a write"));
        };
        let db = self.data_bytes();
        let addrs = self.beat_addrs(w.addr, w.size, w.beats.len(), w.burst)?;

        let mut regions = Vec::with_capacity(w.beats.len());
        for (i, (beat, addr)) in w.beats.iter().zip(&addrs).enumerate() {
            if beat.data.len() != db {
                return Err(BridgeError::DataLength {
                    expected: db,
                    actual: beat.data.len(),
                });
            }
            let lo = self.lane(*addr);
            let hi = lo + Self::beat_len(*addr, w.size);
            let lanes = if hi >= 128 { u128::MAX } else { (1u128 << hi) - 1 };
            let legal = lanes & !((1u128 << lo) - 1);
            let strb = beat.strb & legal;
            let span = mask_span(strb, db).map_err(|_| BridgeError::NonContiguousMask {
                beat: i,
                mask: beat.strb,
            })?;
            if let Some((first, count)) = span {
                let at = self.bus_word(*addr) + first as u64;
                regions.push((at, beat.data[first..first + count].to_vec()));
            }
        }

        let mut packets = Vec::new();
        for (addr, bytes) in Self::coalesce(regions.into_iter(), w.burst) {
            packets.extend(write_packets(addr, &bytes, w.id, &self.config)?);
        }
        Ok(packets)
    }

    fn split_read(&self, req: &AxiRequest) -> Result<Vec<Transaction>, BridgeError> {
        let AxiRequest::Read(r) = req else {
            return Err(BridgeError::Unsupported("not a read"));
        };
        let mut packets = Vec::new();
        for (addr, len) in self.read_regions(r)? {
            packets.extend(read_packets(addr, len, r.id, &self.config)?);
        }
        Ok(packets)
    }

    fn split_atomic(&self, req: &AxiRequest) -> Result<Vec<Transaction>, BridgeError> {
        let AxiRequest::Atomic(a) = req else {
            return Err(BridgeError::Unsupported("not an atomic"));
        };
        if self.lite {
            return Err(BridgeError::Unsupported("atomics on AXI4-lite"));
        }
        let (op, operand) = match a.op {
            AxiAtomicOp::Add => (AtomicOp::Add, a.operand.clone()),
            AxiAtomicOp::Clr => (AtomicOp::And, a.operand.iter().map(|b| !b).collect()),
            AxiAtomicOp::Eor => (AtomicOp::Xor, a.operand.clone()),
            AxiAtomicOp::Set => (AtomicOp::Or, a.operand.clone()),
            AxiAtomicOp::SMax => (AtomicOp::Max, a.operand.clone()),
            AxiAtomicOp::SMin => (AtomicOp::Min, a.operand.clone()),
            AxiAtomicOp::UMax => (AtomicOp::MaxU, a.operand.clone()),
            AxiAtomicOp::UMin => (AtomicOp::MinU, a.operand.clone()),
            AxiAtomicOp::Swap => (AtomicOp::Swap, a.operand.clone()),
            AxiAtomicOp::Compare => return Err(BridgeError::Unsupported("AtomicCompare")),
        };
        Ok(vec![atomic_packet(a.addr, op, &operand, a.id)?])
    }

    fn translate_response(
        &self,
        req: &AxiRequest,
        responses: &[Transaction],
    ) -> Result<AxiResponse, BridgeError> {
        match req {
            AxiRequest::Write(w) => Ok(AxiResponse::Write {
                id: w.id,
                resp: merge_status(responses.iter().map(|r| r.cmd.status())).code(),
            }),
            AxiRequest::Atomic(a) => {
                let (data, _) = read_stream(responses)?;
                Ok(AxiResponse::Atomic {
                    id: a.id,
                    data,
                    resp: merge_status(responses.iter().map(|r| r.cmd.status())).code(),
                })
            }
            AxiRequest::Read(r) => {
                let (data, status) = read_stream(responses)?;
                let db = self.data_bytes();
                let addrs = self.beat_addrs(r.addr, r.size, r.len as usize + 1, r.burst)?;
                let mut at = 0usize;
                let mut beats = Vec::with_capacity(addrs.len());
                for addr in addrs {
                    let len = Self::beat_len(addr, r.size);
                    if at + len > data.len() {
                        return Err(umi_core::WireError::PayloadUnderrun {
                            needed: at + len,
                            available: data.len(),
                        }
                        .into());
                    }
                    let lane = self.lane(addr);
                    let mut lanes = vec![0u8; db];
                    lanes[lane..lane + len].copy_from_slice(&data[at..at + len]);
                    let resp = merge_status(status[at..at + len].iter().copied()).code();
                    beats.push(AxiReadBeat { data: lanes, resp });
                    at += len;
                }
                Ok(AxiResponse::Read { id: r.id, beats })
            }
        }
    }
}
