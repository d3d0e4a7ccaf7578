//! Atomic read-modify-write operations.
//!
//! [`apply_atomic`] is pure: it maps `(old, operand)` to the value the
//! responder stores. Responders return `old` in the response payload
//! (fetch-and-op semantics).

use crate::wire::WireError;

/// Atomic type carried in the `len` field of an `ATOMIC` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AtomicOp {
    Add = 0,
    And = 1,
    Or = 2,
    Xor = 3,
    /// Signed maximum.
    Max = 4,
    /// Signed minimum.
    Min = 5,
    MaxU = 6,
    MinU = 7,
    Swap = 8,
}

impl AtomicOp {
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode an atomic type, treating every reserved code (≥ 9) as `Swap`.
    ///
    /// Callers that must reject reserved codes use `AtomicOp::try_from`.
    pub fn from_code_lossy(code: u8) -> Self {
        Self::try_from(code).unwrap_or(AtomicOp::Swap)
    }

    /// True for codes the lossy decoder silently maps to `Swap`.
    pub fn is_reserved(code: u8) -> bool {
        Self::try_from(code).is_err()
    }
}

impl TryFrom<u8> for AtomicOp {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => AtomicOp::Add,
            1 => AtomicOp::And,
            2 => AtomicOp::Or,
            3 => AtomicOp::Xor,
            4 => AtomicOp::Max,
            5 => AtomicOp::Min,
            6 => AtomicOp::MaxU,
            7 => AtomicOp::MinU,
            8 => AtomicOp::Swap,
            other => return Err(WireError::UnknownAtomic(other)),
        })
    }
}

/// Two's-complement view of `value` over `modulus`.
fn signed(value: u128, modulus: u128) -> i128 {
    if value & (modulus >> 1) != 0 {
        value as i128 - modulus as i128
    } else {
        value as i128
    }
}

/// Compute the new stored value for an atomic request.
///
/// `modulus` is `2^(8 * operand bytes)`; both inputs are reduced into
/// `0..modulus` first. `opcode` goes through [`AtomicOp::from_code_lossy`].
pub fn apply_atomic(old: u64, operand: u64, opcode: u8, modulus: u128) -> u64 {
    apply(old, operand, AtomicOp::from_code_lossy(opcode), modulus)
}

/// [`apply_atomic`] for an already-decoded operation.
pub fn apply(old: u64, operand: u64, op: AtomicOp, modulus: u128) -> u64 {
    debug_assert!(modulus.is_power_of_two() && modulus >= 2);
    let a = old as u128 % modulus;
    let b = operand as u128 % modulus;
    let new = match op {
        AtomicOp::Add => (a + b) % modulus,
        AtomicOp::And => a & b,
        AtomicOp::Or => a | b,
        AtomicOp::Xor => a ^ b,
        AtomicOp::Max => {
            if signed(a, modulus) > signed(b, modulus) {
                a
            } else {
                b
            }
        }
        AtomicOp::Min => {
            if signed(a, modulus) > signed(b, modulus) {
                b
            } else {
                a
            }
        }
        AtomicOp::MaxU => a.max(b),
        AtomicOp::MinU => a.min(b),
        AtomicOp::Swap => b,
    };
    new as u64
}

/// Modulus for an operand of `1 << size` bytes.
pub fn modulus_for_size(size: u8) -> u128 {
    1u128 << (8u32 << size.min(3))
}

/// Little-endian value of up to eight bytes.
pub fn le_value(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(8)
        .rev()
        .fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

/// `value` as `width` little-endian bytes.
pub fn le_bytes(value: u64, width: usize) -> Vec<u8> {
    value.to_le_bytes()[..width.min(8)].to_vec()
}
