//! APB adapter and the reverse-direction APB target.
//!
//! APB moves one bus word per access with no ids, so every request shares
//! source id 0 and completes in order. `PSLVERR` is raised for any status
//! other than `OKAY`; APB has no way to carry the distinction.

use umi_core::config::BridgeConfig;
use umi_core::wire::{CmdType, ResponseStatus};
use umi_core::Transaction;

use super::{mask_span, merge_status, read_packets, read_stream, write_packets, Access, BridgeError, BusAdapter};
use crate::memory::SparseMemory;
use crate::responder::{check_request, reject, response_to, Responder, ResponderError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApbRequest {
    pub addr: u64,
    pub write: bool,
    /// `data_bytes` lanes; ignored on reads.
    pub wdata: Vec<u8>,
    pub pstrb: u128,
}

impl ApbRequest {
    pub fn read(addr: u64) -> Self {
        Self {
            addr,
            write: false,
            wdata: Vec::new(),
            pstrb: 0,
        }
    }

    pub fn write(addr: u64, wdata: Vec<u8>, pstrb: u128) -> Self {
        Self {
            addr,
            write: true,
            wdata,
            pstrb,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApbResponse {
    pub prdata: Vec<u8>,
    pub pslverr: bool,
}

/// Requester-side APB bridge.
#[derive(Debug, Clone)]
pub struct ApbAdapter {
    config: BridgeConfig,
}

impl ApbAdapter {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    fn word(&self, addr: u64) -> u64 {
        addr & !(self.config.data_bytes as u64 - 1)
    }
}

impl BusAdapter for ApbAdapter {
    type Request = ApbRequest;
    type Response = ApbResponse;

    fn access(req: &ApbRequest) -> Access {
        if req.write {
            Access::Write
        } else {
            Access::Read
        }
    }

    fn source_id(_req: &ApbRequest) -> u64 {
        0
    }

    fn split_write(&self, req: &ApbRequest) -> Result<Vec<Transaction>, BridgeError> {
        let db = self.config.data_bytes;
        if req.wdata.len() != db {
            return Err(BridgeError::DataLength {
                expected: db,
                actual: req.wdata.len(),
            });
        }
        let (first, count) = mask_span(req.pstrb, db)
            .map_err(|_| BridgeError::NonContiguousMask {
                beat: 0,
                mask: req.pstrb,
            })?
            .ok_or(BridgeError::EmptyAccess)?;
        let addr = self.word(req.addr) + first as u64;
        write_packets(addr, &req.wdata[first..first + count], 0, &self.config)
    }

    fn split_read(&self, req: &ApbRequest) -> Result<Vec<Transaction>, BridgeError> {
        read_packets(self.word(req.addr), self.config.data_bytes, 0, &self.config)
    }

    fn split_atomic(&self, _req: &ApbRequest) -> Result<Vec<Transaction>, BridgeError> {
        Err(BridgeError::Unsupported("APB has no atomics"))
    }

    fn translate_response(
        &self,
        req: &ApbRequest,
        responses: &[Transaction],
    ) -> Result<ApbResponse, BridgeError> {
        let status = merge_status(responses.iter().map(|r| r.cmd.status()));
        let prdata = if req.write {
            Vec::new()
        } else {
            read_stream(responses)?.0
        };
        Ok(ApbResponse {
            prdata,
            pslverr: status != ResponseStatus::Okay,
        })
    }
}

// ── Target side ──────────────────────────────────────────────────────────────

/// Completes APB accesses; the slave behind an [`ApbTarget`].
pub trait ApbCompleter: Send {
    fn complete(&mut self, req: &ApbRequest) -> ApbResponse;
}

/// Memory-backed APB slave: writes honour `pstrb`, reads return one word.
#[derive(Debug, Clone, Default)]
pub struct ApbMemory {
    mem: SparseMemory,
    data_bytes: usize,
}

impl ApbMemory {
    pub fn new(data_bytes: usize) -> Self {
        Self {
            mem: SparseMemory::default(),
            data_bytes,
        }
    }

    pub fn memory(&self) -> &SparseMemory {
        &self.mem
    }
}

impl ApbCompleter for ApbMemory {
    fn complete(&mut self, req: &ApbRequest) -> ApbResponse {
        if !req.write {
            return ApbResponse {
                prdata: self.mem.read(req.addr, self.data_bytes),
                pslverr: false,
            };
        }
        for (lane, byte) in req.wdata.iter().enumerate().take(128) {
            if req.pstrb >> lane & 1 == 1 {
                self.mem.write(req.addr.wrapping_add(lane as u64), &[*byte]);
            }
        }
        ApbResponse {
            prdata: Vec::new(),
            pslverr: false,
        }
    }
}

/// Protocol responder that services requests as APB accesses.
///
/// Each request is cut into bus-word accesses with `pstrb` covering the
/// requested bytes. Any `PSLVERR` turns the response into `SLVERR`.
pub struct ApbTarget<C> {
    completer: C,
    data_bytes: usize,
}

impl<C: ApbCompleter> ApbTarget<C> {
    pub fn new(completer: C, data_bytes: usize) -> Self {
        Self {
            completer,
            data_bytes: data_bytes.clamp(1, 128),
        }
    }

    pub fn completer(&self) -> &C {
        &self.completer
    }

    /// `(word address, first lane, byte count)` for each word of a range.
    ///
    /// Computed in `u128` so a range ending at the top of the address space
    /// does not wrap.
    fn words(&self, addr: u64, len: usize) -> Vec<(u64, usize, usize)> {
        let db = self.data_bytes as u128;
        let mut out = Vec::new();
        let mut at = addr as u128;
        let end = at + len as u128;
        while at < end {
            let word = at & !(db - 1);
            let lane = (at - word) as usize;
            let count = ((word + db).min(end) - at) as usize;
            out.push((word as u64, lane, count));
            at += count as u128;
        }
        out
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> bool {
        let mut err = false;
        let mut offset = 0;
        for (word, lane, count) in self.words(addr, data.len()) {
            let mut wdata = vec![0u8; self.data_bytes];
            wdata[lane..lane + count].copy_from_slice(&data[offset..offset + count]);
            let pstrb = lane_mask(count) << lane;
            let resp = self.completer.complete(&ApbRequest::write(word, wdata, pstrb));
            err |= resp.pslverr;
            offset += count;
        }
        err
    }

    fn read(&mut self, addr: u64, len: usize) -> (Vec<u8>, bool) {
        let mut err = false;
        let mut out = Vec::with_capacity(len);
        for (word, lane, count) in self.words(addr, len) {
            let resp = self.completer.complete(&ApbRequest::read(word));
            err |= resp.pslverr;
            let mut prdata = resp.prdata;
            prdata.resize(self.data_bytes, 0);
            out.extend_from_slice(&prdata[lane..lane + count]);
        }
        (out, err)
    }
}

fn lane_mask(count: usize) -> u128 {
    if count >= 128 {
        u128::MAX
    } else {
        (1u128 << count) - 1
    }
}

fn slverr_if(err: bool) -> ResponseStatus {
    if err {
        ResponseStatus::SlvErr
    } else {
        ResponseStatus::Okay
    }
}

impl<C: ApbCompleter> Responder for ApbTarget<C> {
    fn handle(&mut self, req: &Transaction) -> Result<Option<Transaction>, ResponderError> {
        check_request(req)?;
        match req.cmd.cmd_type() {
            Some(CmdType::ReqWrite) | Some(CmdType::ReqPosted) => {
                let data = req.data()?;
                let err = self.write(req.dstaddr, &data);
                if req.cmd.is(CmdType::ReqPosted) {
                    if err {
                        tracing::warn!(dstaddr = req.dstaddr, "PSLVERR on posted write dropped");
                    }
                    return Ok(None);
                }
                let resp = response_to(req, CmdType::RespWrite, slverr_if(err), req.cmd.len(), bytes::Bytes::new())?;
                Ok(Some(resp))
            }
            Some(CmdType::ReqRead) => {
                let (data, err) = self.read(req.dstaddr, req.declared_len());
                let resp = response_to(req, CmdType::RespRead, slverr_if(err), req.cmd.len(), data)?;
                Ok(Some(resp))
            }
            _ => reject(req),
        }
    }
}
