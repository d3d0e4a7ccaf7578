//! Reference memory responder.
//!
//! A sparse byte store behind the [`Responder`] trait. Unwritten addresses
//! read as the configured default byte. Requests are serviced strictly in
//! arrival order, so a read after a write to the same address observes it.

use std::collections::HashMap;
use std::ops::Range;

use umi_core::atomic::{self, AtomicOp};
use umi_core::config::MemoryConfig;
use umi_core::wire::{CmdType, ResponseStatus};
use umi_core::Transaction;

use crate::responder::{check_request, reject, response_to, Responder, ResponderError};

/// Byte-addressable sparse store.
#[derive(Debug, Clone, Default)]
pub struct SparseMemory {
    bytes: HashMap<u64, u8>,
    default_byte: u8,
}

impl SparseMemory {
    pub fn new(default_byte: u8) -> Self {
        Self {
            bytes: HashMap::new(),
            default_byte,
        }
    }

    pub fn read(&self, addr: u64, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|i| {
                self.bytes
                    .get(&addr.wrapping_add(i))
                    .copied()
                    .unwrap_or(self.default_byte)
            })
            .collect()
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.bytes.insert(addr.wrapping_add(i as u64), *b);
        }
    }

    /// Little-endian word of `width` bytes.
    pub fn read_le(&self, addr: u64, width: usize) -> u64 {
        atomic::le_value(&self.read(addr, width))
    }

    pub fn write_le(&mut self, addr: u64, value: u64, width: usize) {
        self.write(addr, &atomic::le_bytes(value, width));
    }

    /// Number of bytes ever written.
    pub fn footprint(&self) -> usize {
        self.bytes.len()
    }
}

/// Memory agent servicing READ, WRITE, POSTED and ATOMIC requests.
#[derive(Debug, Clone, Default)]
pub struct MemoryResponder {
    mem: SparseMemory,
    injected: HashMap<u64, ResponseStatus>,
    window: Option<Range<u64>>,
}

impl MemoryResponder {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            mem: SparseMemory::new(config.default_byte),
            injected: HashMap::new(),
            window: config.window.map(|(lo, hi)| lo..hi),
        }
    }

    pub fn memory(&self) -> &SparseMemory {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut SparseMemory {
        &mut self.mem
    }

    /// Report `status` for every access touching `addr`. The access itself
    /// still happens.
    pub fn inject_error(&mut self, addr: u64, status: ResponseStatus) {
        self.injected.insert(addr, status);
    }

    pub fn clear_errors(&mut self) {
        self.injected.clear();
    }

    fn decodes(&self, addr: u64, len: usize) -> bool {
        match &self.window {
            Some(w) => w.contains(&addr) && addr.saturating_add(len as u64) <= w.end,
            None => true,
        }
    }

    fn status_for(&self, addr: u64, len: usize) -> ResponseStatus {
        if self.injected.is_empty() {
            return ResponseStatus::Okay;
        }
        (0..len as u64)
            .find_map(|i| self.injected.get(&addr.wrapping_add(i)).copied())
            .unwrap_or(ResponseStatus::Okay)
    }

    fn handle_atomic(&mut self, req: &Transaction) -> Result<Transaction, ResponderError> {
        let width = req.cmd.beat_bytes();
        let operand_bytes = req.data()?;
        if width > 8 {
            tracing::warn!(size = req.cmd.size(), "atomic wider than 8 bytes");
            return response_to(req, CmdType::RespRead, ResponseStatus::SlvErr, 0, vec![0u8; width]);
        }
        let code = req.cmd.len();
        if AtomicOp::is_reserved(code) {
            tracing::warn!(code, dstaddr = req.dstaddr, "reserved atomic opcode, treating as swap");
        }
        let old = self.mem.read_le(req.dstaddr, width);
        let operand = atomic::le_value(&operand_bytes);
        let new = atomic::apply_atomic(old, operand, code, atomic::modulus_for_size(req.cmd.size()));
        self.mem.write_le(req.dstaddr, new, width);
        tracing::debug!(
            dstaddr = req.dstaddr,
            op = ?req.cmd.atomic_op(),
            old,
            new,
            "atomic"
        );
        let status = self.status_for(req.dstaddr, width);
        response_to(req, CmdType::RespRead, status, 0, atomic::le_bytes(old, width))
    }
}

impl Responder for MemoryResponder {
    fn handle(&mut self, req: &Transaction) -> Result<Option<Transaction>, ResponderError> {
        check_request(req)?;
        let Some(opcode) = req.cmd.cmd_type() else {
            return Ok(None);
        };
        let len = req.declared_len();

        if !self.decodes(req.dstaddr, len) {
            tracing::warn!(dstaddr = req.dstaddr, bytes = len, "address outside window");
            return match req.cmd.response_type() {
                Some(CmdType::RespRead) => {
                    let beats = if opcode == CmdType::ReqAtomic { 0 } else { req.cmd.len() };
                    let resp = response_to(req, CmdType::RespRead, ResponseStatus::DecErr, beats, vec![0u8; len])?;
                    Ok(Some(resp))
                }
                Some(resp_type) => {
                    let resp = response_to(req, resp_type, ResponseStatus::DecErr, req.cmd.len(), bytes::Bytes::new())?;
                    Ok(Some(resp))
                }
                None => Ok(None),
            };
        }

        let resp = match opcode {
            CmdType::ReqWrite | CmdType::ReqPosted => {
                let data = req.data()?;
                self.mem.write(req.dstaddr, &data);
                let status = self.status_for(req.dstaddr, len);
                tracing::debug!(dstaddr = req.dstaddr, bytes = len, posted = opcode == CmdType::ReqPosted, "write");
                if opcode == CmdType::ReqPosted {
                    if status.is_error() {
                        tracing::warn!(dstaddr = req.dstaddr, ?status, "error on posted write dropped");
                    }
                    return Ok(None);
                }
                response_to(req, CmdType::RespWrite, status, req.cmd.len(), bytes::Bytes::new())?
            }
            CmdType::ReqRead => {
                let data = self.mem.read(req.dstaddr, len);
                let status = self.status_for(req.dstaddr, len);
                tracing::debug!(dstaddr = req.dstaddr, bytes = len, "read");
                response_to(req, CmdType::RespRead, status, req.cmd.len(), data)?
            }
            CmdType::ReqAtomic => self.handle_atomic(req)?,
            // RDMA, user, future, link-control and error requests are not
            // implemented by the memory model.
            _ => return reject(req),
        };

        if resp.cmd.status().is_error() {
            tracing::warn!(
                dstaddr = req.dstaddr,
                status = ?resp.cmd.status(),
                "responder reported error"
            );
        }
        Ok(Some(resp))
    }
}
