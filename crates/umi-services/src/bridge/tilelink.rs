//! TileLink-UH adapter.
//!
//! Data travels in bus lanes: a transfer narrower than the bus occupies
//! lanes `address % data_bytes ..`, a wider one is the concatenation of its
//! beats. `PutPartialData` is limited to a single beat so one mask covers it.

use umi_core::atomic::AtomicOp;
use umi_core::config::BridgeConfig;
use umi_core::wire::ResponseStatus;
use umi_core::Transaction;

use super::{
    atomic_packet, mask_span, merge_status, read_packets, read_stream, write_packets, Access,
    BridgeError, BusAdapter,
};

/// `ArithmeticData` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlArith {
    Min,
    Max,
    MinU,
    MaxU,
    Add,
}

/// `LogicalData` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlLogic {
    Xor,
    Or,
    And,
    Swap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlOpcode {
    Get,
    PutFullData,
    PutPartialData,
    ArithmeticData(TlArith),
    LogicalData(TlLogic),
}

impl TlOpcode {
    /// A-channel opcode.
    pub fn code(self) -> u8 {
        match self {
            TlOpcode::PutFullData => 0,
            TlOpcode::PutPartialData => 1,
            TlOpcode::ArithmeticData(_) => 2,
            TlOpcode::LogicalData(_) => 3,
            TlOpcode::Get => 4,
        }
    }

    /// A-channel `param` field.
    pub fn param(self) -> u8 {
        match self {
            TlOpcode::ArithmeticData(a) => a as u8,
            TlOpcode::LogicalData(l) => l as u8,
            _ => 0,
        }
    }

    fn atomic_op(self) -> Option<AtomicOp> {
        let op = match self {
            TlOpcode::ArithmeticData(TlArith::Min) => AtomicOp::Min,
            TlOpcode::ArithmeticData(TlArith::Max) => AtomicOp::Max,
            TlOpcode::ArithmeticData(TlArith::MinU) => AtomicOp::MinU,
            TlOpcode::ArithmeticData(TlArith::MaxU) => AtomicOp::MaxU,
            TlOpcode::ArithmeticData(TlArith::Add) => AtomicOp::Add,
            TlOpcode::LogicalData(TlLogic::Xor) => AtomicOp::Xor,
            TlOpcode::LogicalData(TlLogic::Or) => AtomicOp::Or,
            TlOpcode::LogicalData(TlLogic::And) => AtomicOp::And,
            TlOpcode::LogicalData(TlLogic::Swap) => AtomicOp::Swap,
            _ => return None,
        };
        Some(op)
    }
}

/// A-channel message.
#[derive(Debug, Clone)]
pub struct TlRequest {
    pub opcode: TlOpcode,
    pub source: u64,
    pub address: u64,
    /// log2 bytes of the whole transfer.
    pub size: u8,
    pub mask: u128,
    pub data: Vec<u8>,
}

impl TlRequest {
    pub fn get(source: u64, address: u64, size: u8) -> Self {
        Self {
            opcode: TlOpcode::Get,
            source,
            address,
            size,
            mask: 0,
            data: Vec::new(),
        }
    }

    pub fn put_full(source: u64, address: u64, size: u8, data: Vec<u8>) -> Self {
        Self {
            opcode: TlOpcode::PutFullData,
            source,
            address,
            size,
            mask: 0,
            data,
        }
    }

    pub fn put_partial(source: u64, address: u64, size: u8, mask: u128, data: Vec<u8>) -> Self {
        Self {
            opcode: TlOpcode::PutPartialData,
            source,
            address,
            size,
            mask,
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlResponseOpcode {
    AccessAck,
    AccessAckData,
}

/// D-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlResponse {
    pub source: u64,
    pub opcode: TlResponseOpcode,
    pub data: Vec<u8>,
    pub denied: bool,
    pub corrupt: bool,
}

#[derive(Debug, Clone)]
pub struct TileLinkAdapter {
    config: BridgeConfig,
}

impl TileLinkAdapter {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    fn data_bytes(&self) -> usize {
        self.config.data_bytes.clamp(1, 128)
    }

    fn transfer_bytes(req: &TlRequest) -> Result<usize, BridgeError> {
        if req.size > 12 {
            return Err(BridgeError::Unsupported("transfer larger than 4 KiB"));
        }
        let bytes = 1usize << req.size;
        if req.address % bytes as u64 != 0 {
            return Err(BridgeError::Misaligned {
                addr: req.address,
                bytes,
            });
        }
        Ok(bytes)
    }

    /// Length of the lane vector carrying a transfer of `bytes`.
    fn lanes_len(&self, bytes: usize) -> usize {
        bytes.max(self.data_bytes())
    }

    /// First lane of the transfer within its lane vector.
    fn first_lane(&self, address: u64, bytes: usize) -> usize {
        if bytes >= self.data_bytes() {
            0
        } else {
            (address % self.data_bytes() as u64) as usize
        }
    }

    fn check_data(&self, req: &TlRequest, bytes: usize) -> Result<(), BridgeError> {
        let expected = self.lanes_len(bytes);
        if req.data.len() != expected {
            return Err(BridgeError::DataLength {
                expected,
                actual: req.data.len(),
            });
        }
        Ok(())
    }
}

impl BusAdapter for TileLinkAdapter {
    type Request = TlRequest;
    type Response = TlResponse;

    fn access(req: &TlRequest) -> Access {
        match req.opcode {
            TlOpcode::Get => Access::Read,
            TlOpcode::PutFullData | TlOpcode::PutPartialData => Access::Write,
            TlOpcode::ArithmeticData(_) | TlOpcode::LogicalData(_) => Access::Atomic,
        }
    }

    fn source_id(req: &TlRequest) -> u64 {
        req.source
    }

    fn split_write(&self, req: &TlRequest) -> Result<Vec<Transaction>, BridgeError> {
        let bytes = Self::transfer_bytes(req)?;
        self.check_data(req, bytes)?;
        let lane = self.first_lane(req.address, bytes);
        match req.opcode {
            TlOpcode::PutFullData => {
                write_packets(req.address, &req.data[lane..lane + bytes], req.source, &self.config)
            }
            TlOpcode::PutPartialData => {
                let db = self.data_bytes();
                if bytes > db {
                    return Err(BridgeError::Unsupported("multi-beat PutPartialData"));
                }
                let legal = if bytes >= 128 {
                    u128::MAX
                } else {
                    ((1u128 << bytes) - 1) << lane
                };
                let (first, count) = mask_span(req.mask & legal, db)
                    .map_err(|_| BridgeError::NonContiguousMask {
                        beat: 0,
                        mask: req.mask,
                    })?
                    .ok_or(BridgeError::EmptyAccess)?;
                let word = req.address - lane as u64;
                write_packets(
                    word + first as u64,
                    &req.data[first..first + count],
                    req.source,
                    &self.config,
                )
            }
            _ => Err(BridgeError::Unsupported("not a put")),
        }
    }

    fn split_read(&self, req: &TlRequest) -> Result<Vec<Transaction>, BridgeError> {
        let bytes = Self::transfer_bytes(req)?;
        read_packets(req.address, bytes, req.source, &self.config)
    }

    fn split_atomic(&self, req: &TlRequest) -> Result<Vec<Transaction>, BridgeError> {
        let Some(op) = req.opcode.atomic_op() else {
            return Err(BridgeError::Unsupported("not an atomic"));
        };
        if req.size > 3 {
            return Err(BridgeError::Unsupported("atomic wider than 8 bytes"));
        }
        let bytes = Self::transfer_bytes(req)?;
        self.check_data(req, bytes)?;
        let lane = self.first_lane(req.address, bytes);
        Ok(vec![atomic_packet(
            req.address,
            op,
            &req.data[lane..lane + bytes],
            req.source,
        )?])
    }

    fn translate_response(
        &self,
        req: &TlRequest,
        responses: &[Transaction],
    ) -> Result<TlResponse, BridgeError> {
        let status = merge_status(responses.iter().map(|r| r.cmd.status()));
        if Self::access(req) == Access::Write {
            return Ok(TlResponse {
                source: req.source,
                opcode: TlResponseOpcode::AccessAck,
                data: Vec::new(),
                denied: status.is_error(),
                corrupt: false,
            });
        }

        let (bytes_read, _) = read_stream(responses)?;
        let bytes = 1usize << req.size;
        let lane = self.first_lane(req.address, bytes);
        let mut data = vec![0u8; self.lanes_len(bytes)];
        let n = bytes_read.len().min(bytes);
        data[lane..lane + n].copy_from_slice(&bytes_read[..n]);
        Ok(TlResponse {
            source: req.source,
            opcode: TlResponseOpcode::AccessAckData,
            data,
            denied: status == ResponseStatus::DecErr,
            // A denied AccessAckData is always corrupt.
            corrupt: status.is_error(),
        })
    }
}
