//! Named bit-range accessors for fixed-width header words.
//!
//! A [`PacketLayout`] is a static table of [`BitField`]s. Words are built
//! through [`WordBuilder`], which checks every value against its field width
//! at construction time, so an encoded word never carries truncated fields.

use crate::wire::WireError;

/// One named sub-range of a header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub name: &'static str,
    pub offset: u32,
    pub width: u32,
}

impl BitField {
    pub const fn new(name: &'static str, offset: u32, width: u32) -> Self {
        Self { name, offset, width }
    }

    /// Unshifted mask covering `width` bits.
    pub const fn mask(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    /// Largest value this field can hold.
    pub const fn max_value(&self) -> u64 {
        self.mask()
    }

    /// Index one past the most significant bit.
    pub const fn msb(&self) -> u32 {
        self.offset + self.width
    }

    pub const fn extract(&self, word: u64) -> u64 {
        (word >> self.offset) & self.mask()
    }

    /// Returns `word` with this field replaced by `value`.
    pub fn insert(&self, word: u64, value: u64) -> Result<u64, WireError> {
        if value > self.mask() {
            return Err(WireError::OutOfRange {
                field: self.name,
                value,
                width: self.width,
            });
        }
        let cleared = word & !(self.mask() << self.offset);
        Ok(cleared | (value << self.offset))
    }

    const fn overlaps(&self, other: &BitField) -> bool {
        self.offset < other.msb() && other.offset < self.msb()
    }
}

/// A fixed arrangement of fields inside a word of `width` bits.
#[derive(Debug, Clone, Copy)]
pub struct PacketLayout {
    pub width: u32,
    pub fields: &'static [BitField],
}

impl PacketLayout {
    pub const fn new(width: u32, fields: &'static [BitField]) -> Self {
        Self { width, fields }
    }

    /// True when every field fits the word and no two fields share a bit.
    pub const fn is_well_formed(&self) -> bool {
        let mut i = 0;
        while i < self.fields.len() {
            if self.fields[i].width == 0 || self.fields[i].msb() > self.width {
                return false;
            }
            let mut j = i + 1;
            while j < self.fields.len() {
                if self.fields[i].overlaps(&self.fields[j]) {
                    return false;
                }
                j += 1;
            }
            i += 1;
        }
        true
    }

    pub fn field(&self, name: &str) -> Option<&BitField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn builder(&'static self) -> WordBuilder {
        WordBuilder {
            layout: self,
            word: 0,
        }
    }

    /// Splits `word` into `(name, value)` pairs in layout order.
    pub fn decompose(&self, word: u64) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.fields.iter().map(move |f| (f.name, f.extract(word)))
    }
}

/// Accumulates field values into a word, rejecting any value that does not
/// fit its field.
#[derive(Debug, Clone)]
pub struct WordBuilder {
    layout: &'static PacketLayout,
    word: u64,
}

impl WordBuilder {
    pub fn set(mut self, name: &'static str, value: u64) -> Result<Self, WireError> {
        let field = self
            .layout
            .field(name)
            .ok_or(WireError::UnknownField(name))?;
        self.word = field.insert(self.word, value)?;
        Ok(self)
    }

    pub fn finish(self) -> u64 {
        self.word
    }
}
