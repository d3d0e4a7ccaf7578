//! UMI wire format: the command word and its opcode taxonomy.
//!
//! These types ARE the protocol. Every field offset and every opcode value
//! below is part of the wire format and is shared with hardware
//! realizations; changing one is a breaking change.
//!
//! The command word is 32 bits, little-endian on the wire:
//!
//! ```text
//!  31    27 26 25 24  23  22  21 20 19  16 15       8 7   5 4      0
//! +--------+-----+---+---+---+-----+------+----------+-----+--------+
//! | hostid | user| ex|eof|eom| prot|  qos |   len    | size| opcode |
//! +--------+-----+---+---+---+-----+------+----------+-----+--------+
//! ```
//!
//! For `ATOMIC` requests `len` carries the atomic type. For responses
//! `user` carries the status code.

use static_assertions::{assert_eq_size, const_assert};
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::atomic::AtomicOp;
use crate::bitfield::{BitField, PacketLayout};

// ── Layout ───────────────────────────────────────────────────────────────────

pub const OPCODE: BitField = BitField::new("opcode", 0, 5);
pub const SIZE: BitField = BitField::new("size", 5, 3);
pub const LEN: BitField = BitField::new("len", 8, 8);
pub const QOS: BitField = BitField::new("qos", 16, 4);
pub const PROT: BitField = BitField::new("prot", 20, 2);
pub const EOM: BitField = BitField::new("eom", 22, 1);
pub const EOF: BitField = BitField::new("eof", 23, 1);
pub const EX: BitField = BitField::new("ex", 24, 1);
pub const USER: BitField = BitField::new("user", 25, 2);
pub const HOSTID: BitField = BitField::new("hostid", 27, 5);

const CMD_FIELD_TABLE: [BitField; 10] = [OPCODE, SIZE, LEN, QOS, PROT, EOM, EOF, EX, USER, HOSTID];
static CMD_FIELDS: [BitField; 10] = CMD_FIELD_TABLE;

/// Field table of the 32-bit command word.
pub static CMD_LAYOUT: PacketLayout = PacketLayout::new(32, &CMD_FIELDS);

const_assert!(PacketLayout::new(32, &CMD_FIELD_TABLE).is_well_formed());

/// The command word as it appears on the wire.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(transparent)]
pub struct CommandWord(U32<LittleEndian>);

assert_eq_size!(CommandWord, [u8; 4]);

impl CommandWord {
    pub fn new(word: u32) -> Self {
        Self(U32::new(word))
    }

    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

// ── Constants ────────────────────────────────────────────────────────────────

/// Bytes occupied by the command word on the wire.
pub const COMMAND_WORD_BYTES: usize = 4;

/// Default per-instance address width in bits.
pub const DEFAULT_ADDR_WIDTH: u32 = 64;

/// Largest encodable `size` (log2 bytes per beat).
pub const MAX_SIZE: u8 = 7;

/// Largest number of beats one header can describe.
pub const MAX_BEATS: usize = 256;

// ── Command types ────────────────────────────────────────────────────────────

/// Whether an opcode travels host→device, device→host, or is not valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdClass {
    Request,
    Response,
    Invalid,
}

/// Opcode values of the `cmd_type` field.
///
/// Requests are odd, responses are even, and zero is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CmdType {
    ReqRead = 0x01,
    ReqWrite = 0x03,
    ReqPosted = 0x05,
    ReqRdma = 0x07,
    ReqAtomic = 0x09,
    ReqUser0 = 0x0B,
    ReqFuture0 = 0x0D,
    /// Error message; with `size == 1` this is link control (`REQ_LINK`).
    ReqError = 0x0F,

    RespRead = 0x02,
    RespWrite = 0x04,
    RespUser0 = 0x06,
    RespUser1 = 0x08,
    RespFuture0 = 0x0A,
    RespFuture1 = 0x0C,
    RespLink = 0x0E,
}

impl CmdType {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn class(self) -> CmdClass {
        match self {
            CmdType::ReqRead
            | CmdType::ReqWrite
            | CmdType::ReqPosted
            | CmdType::ReqRdma
            | CmdType::ReqAtomic
            | CmdType::ReqUser0
            | CmdType::ReqFuture0
            | CmdType::ReqError => CmdClass::Request,
            CmdType::RespRead
            | CmdType::RespWrite
            | CmdType::RespUser0
            | CmdType::RespUser1
            | CmdType::RespFuture0
            | CmdType::RespFuture1
            | CmdType::RespLink => CmdClass::Response,
        }
    }

    /// The response opcode an acknowledged request is answered with.
    ///
    /// `None` for posted writes, error messages and all responses. Link
    /// control is answered with `RESP_LINK`; see [`CommandHeader::response_type`].
    pub fn response(self) -> Option<CmdType> {
        match self {
            CmdType::ReqRead | CmdType::ReqAtomic => Some(CmdType::RespRead),
            CmdType::ReqWrite | CmdType::ReqRdma => Some(CmdType::RespWrite),
            CmdType::ReqUser0 => Some(CmdType::RespUser0),
            CmdType::ReqFuture0 => Some(CmdType::RespFuture0),
            _ => None,
        }
    }

    /// Only writes, posted writes and read responses carry a streamed payload.
    pub fn supports_streaming(self) -> bool {
        matches!(
            self,
            CmdType::ReqWrite | CmdType::ReqPosted | CmdType::RespRead
        )
    }
}

impl TryFrom<u8> for CmdType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => CmdType::ReqRead,
            0x03 => CmdType::ReqWrite,
            0x05 => CmdType::ReqPosted,
            0x07 => CmdType::ReqRdma,
            0x09 => CmdType::ReqAtomic,
            0x0B => CmdType::ReqUser0,
            0x0D => CmdType::ReqFuture0,
            0x0F => CmdType::ReqError,
            0x02 => CmdType::RespRead,
            0x04 => CmdType::RespWrite,
            0x06 => CmdType::RespUser0,
            0x08 => CmdType::RespUser1,
            0x0A => CmdType::RespFuture0,
            0x0C => CmdType::RespFuture1,
            0x0E => CmdType::RespLink,
            other => return Err(WireError::UnknownCommand(other)),
        })
    }
}

impl From<CmdType> for u8 {
    fn from(c: CmdType) -> u8 {
        c as u8
    }
}

/// Classify a raw opcode.
pub fn classify(code: u8) -> CmdClass {
    CmdType::try_from(code)
        .map(CmdType::class)
        .unwrap_or(CmdClass::Invalid)
}

/// True only for `WRITE`, `POSTED` and `RESP_READ`.
pub fn supports_streaming(code: u8) -> bool {
    CmdType::try_from(code)
        .map(CmdType::supports_streaming)
        .unwrap_or(false)
}

// ── Response status ──────────────────────────────────────────────────────────

/// Responder status carried in the `user` field of a response.
///
/// The codes line up with AXI `RRESP`/`BRESP`, so AXI adapters pass them
/// through verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ResponseStatus {
    #[default]
    Okay = 0,
    ExOkay = 1,
    SlvErr = 2,
    DecErr = 3,
}

impl ResponseStatus {
    /// Decode the two status bits. Every 2-bit value is a valid status.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => ResponseStatus::Okay,
            1 => ResponseStatus::ExOkay,
            2 => ResponseStatus::SlvErr,
            _ => ResponseStatus::DecErr,
        }
    }

    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn is_error(self) -> bool {
        matches!(self, ResponseStatus::SlvErr | ResponseStatus::DecErr)
    }
}

// ── Command header ───────────────────────────────────────────────────────────

/// Decoded command word.
///
/// Construct through [`CommandHeader::builder`] (width-checked) or
/// [`CommandHeader::decode`] (any 32-bit word).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CommandHeader {
    opcode: u8,
    size: u8,
    len: u8,
    qos: u8,
    prot: u8,
    eom: bool,
    eof: bool,
    ex: bool,
    user: u8,
    hostid: u8,
}

impl CommandHeader {
    pub fn builder(cmd: CmdType) -> HeaderBuilder {
        HeaderBuilder::new(cmd.code() as u64)
    }

    /// Builder for reserved or experimental opcodes.
    pub fn builder_raw(opcode: u8) -> HeaderBuilder {
        HeaderBuilder::new(opcode as u64)
    }

    pub fn decode(word: u32) -> Self {
        let w = word as u64;
        Self {
            opcode: OPCODE.extract(w) as u8,
            size: SIZE.extract(w) as u8,
            len: LEN.extract(w) as u8,
            qos: QOS.extract(w) as u8,
            prot: PROT.extract(w) as u8,
            eom: EOM.extract(w) == 1,
            eof: EOF.extract(w) == 1,
            ex: EX.extract(w) == 1,
            user: USER.extract(w) as u8,
            hostid: HOSTID.extract(w) as u8,
        }
    }

    pub fn encode(&self) -> u32 {
        let w = (self.opcode as u64) << OPCODE.offset
            | (self.size as u64) << SIZE.offset
            | (self.len as u64) << LEN.offset
            | (self.qos as u64) << QOS.offset
            | (self.prot as u64) << PROT.offset
            | (self.eom as u64) << EOM.offset
            | (self.eof as u64) << EOF.offset
            | (self.ex as u64) << EX.offset
            | (self.user as u64) << USER.offset
            | (self.hostid as u64) << HOSTID.offset;
        w as u32
    }

    pub fn to_bytes(&self) -> [u8; COMMAND_WORD_BYTES] {
        let mut out = [0u8; COMMAND_WORD_BYTES];
        out.copy_from_slice(CommandWord::new(self.encode()).as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let word = CommandWord::read_from_prefix(bytes).ok_or(WireError::PayloadUnderrun {
            needed: COMMAND_WORD_BYTES,
            available: bytes.len(),
        })?;
        Ok(Self::decode(word.get()))
    }

    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    pub fn cmd_type(&self) -> Option<CmdType> {
        CmdType::try_from(self.opcode).ok()
    }

    pub fn class(&self) -> CmdClass {
        classify(self.opcode)
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn qos(&self) -> u8 {
        self.qos
    }

    pub fn prot(&self) -> u8 {
        self.prot
    }

    pub fn eom(&self) -> bool {
        self.eom
    }

    pub fn eof(&self) -> bool {
        self.eof
    }

    pub fn ex(&self) -> bool {
        self.ex
    }

    pub fn user(&self) -> u8 {
        self.user
    }

    pub fn hostid(&self) -> u8 {
        self.hostid
    }

    pub fn is(&self, cmd: CmdType) -> bool {
        self.opcode == cmd.code()
    }

    /// `REQ_LINK`: the error opcode with `size == 1`.
    pub fn is_link_control(&self) -> bool {
        self.opcode == CmdType::ReqError.code() && self.size == 1
    }

    /// Bytes per beat.
    pub fn beat_bytes(&self) -> usize {
        1usize << self.size
    }

    /// Payload bytes covered by this header.
    ///
    /// `(len + 1) << size`, except for `ATOMIC` where `len` is the atomic
    /// type and the operand is a single beat.
    pub fn data_len(&self) -> usize {
        if self.is(CmdType::ReqAtomic) {
            self.beat_bytes()
        } else {
            (self.len as usize + 1) << self.size
        }
    }

    /// True for opcodes whose data travels right after the address pair.
    pub fn carries_data(&self) -> bool {
        matches!(
            self.cmd_type(),
            Some(CmdType::ReqWrite | CmdType::ReqPosted | CmdType::ReqAtomic | CmdType::RespRead)
        )
    }

    /// Payload bytes on the wire: [`data_len`](Self::data_len) for
    /// data-carrying opcodes, zero for everything else.
    pub fn payload_len(&self) -> usize {
        if self.carries_data() {
            self.data_len()
        } else {
            0
        }
    }

    /// Status of a response. Meaningless for requests.
    pub fn status(&self) -> ResponseStatus {
        ResponseStatus::from_bits(self.user)
    }

    /// Atomic type of an `ATOMIC` request, with the lossy SWAP fallback.
    pub fn atomic_op(&self) -> AtomicOp {
        AtomicOp::from_code_lossy(self.len)
    }

    /// Response opcode for this request, taking link control into account.
    pub fn response_type(&self) -> Option<CmdType> {
        if self.is_link_control() {
            return Some(CmdType::RespLink);
        }
        self.cmd_type().and_then(CmdType::response)
    }

    /// Same header with a different end-of-message bit.
    pub fn with_eom(mut self, eom: bool) -> Self {
        self.eom = eom;
        self
    }
}

/// Width-checked construction of a [`CommandHeader`].
///
/// Values are checked against their field width in [`HeaderBuilder::build`];
/// nothing is silently truncated.
#[derive(Debug, Clone)]
pub struct HeaderBuilder {
    values: [(&'static str, u64); 10],
}

impl HeaderBuilder {
    fn new(opcode: u64) -> Self {
        Self {
            values: [
                ("opcode", opcode),
                ("size", 0),
                ("len", 0),
                ("qos", 0),
                ("prot", 0),
                ("eom", 0),
                ("eof", 0),
                ("ex", 0),
                ("user", 0),
                ("hostid", 0),
            ],
        }
    }

    fn put(mut self, name: &'static str, value: u64) -> Self {
        if let Some(slot) = self.values.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        }
        self
    }

    pub fn size(self, size: u64) -> Self {
        self.put("size", size)
    }

    pub fn len(self, len: u64) -> Self {
        self.put("len", len)
    }

    pub fn atomic(self, op: AtomicOp) -> Self {
        self.put("len", op.code() as u64)
    }

    pub fn qos(self, qos: u64) -> Self {
        self.put("qos", qos)
    }

    pub fn prot(self, prot: u64) -> Self {
        self.put("prot", prot)
    }

    pub fn eom(self, eom: bool) -> Self {
        self.put("eom", eom as u64)
    }

    pub fn eof(self, eof: bool) -> Self {
        self.put("eof", eof as u64)
    }

    pub fn ex(self, ex: bool) -> Self {
        self.put("ex", ex as u64)
    }

    pub fn user(self, user: u64) -> Self {
        self.put("user", user)
    }

    pub fn status(self, status: ResponseStatus) -> Self {
        self.put("user", status.code() as u64)
    }

    pub fn hostid(self, hostid: u64) -> Self {
        self.put("hostid", hostid)
    }

    /// Encode, rejecting any field value wider than its field.
    ///
    /// Command types that never stream always get `eom` set.
    pub fn build(self) -> Result<CommandHeader, WireError> {
        let mut builder = CMD_LAYOUT.builder();
        for (name, value) in self.values {
            builder = builder.set(name, value)?;
        }
        let header = CommandHeader::decode(builder.finish() as u32);
        if supports_streaming(header.opcode) {
            Ok(header)
        } else {
            Ok(header.with_eom(true))
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors that can arise when building or interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("value {value:#x} does not fit {width}-bit field `{field}`")]
    OutOfRange {
        field: &'static str,
        value: u64,
        width: u32,
    },

    #[error("no field named `{0}` in layout")]
    UnknownField(&'static str),

    #[error("unknown command opcode: 0x{0:02x}")]
    UnknownCommand(u8),

    #[error("reserved atomic opcode: {0}")]
    UnknownAtomic(u8),

    #[error("payload underrun: need {needed} bytes, have {available}")]
    PayloadUnderrun { needed: usize, available: usize },

    #[error("unsupported address width: {0} bits")]
    InvalidAddrWidth(u32),

    #[error("beat size must be non-zero")]
    InvalidBeatSize,
}

// ── Tests ────────────────────────────────────────────────────────────────────
