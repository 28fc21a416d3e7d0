use std::fmt;
use std::ops::{BitOr, BitOrAssign, BitXor};

/// Represents a control line (single-bit or multi-bit field)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlLine {
    pub name: String,
    pub bit: u32,
    pub width: u32,
    pub active_low: bool,
}

impl ControlLine {
    pub fn new(name: &str, bit: u32, width: u32) -> Self {
        ControlLine {
            name: name.to_string(),
            bit,
            width,
            active_low: false,
        }
    }

    /// One past the highest bit occupied by this line.
    pub fn end(&self) -> u32 {
        self.bit.saturating_add(self.width)
    }

    pub fn overlaps(&self, other: &ControlLine) -> bool {
        self.bit < other.end() && other.bit < self.end()
    }

    /// All bits of the line set.
    pub fn mask(&self) -> ControlWord {
        let mut word = ControlWord::zero();
        for bit in self.bit..self.end() {
            word.set(bit);
        }
        word
    }
}

/// The signal bits asserted during one micro-step.
///
/// Stored as little-endian 64-bit limbs with trailing zero limbs trimmed, so
/// two words with the same bits compare equal regardless of how they were
/// built. Width is unbounded.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ControlWord {
    limbs: Vec<u64>,
}

impl ControlWord {
    pub fn zero() -> Self {
        ControlWord { limbs: Vec::new() }
    }

    pub fn bit(k: u32) -> Self {
        let mut word = ControlWord::zero();
        word.set(k);
        word
    }

    pub fn from_u128(value: u128) -> Self {
        let mut word = ControlWord {
            limbs: vec![value as u64, (value >> 64) as u64],
        };
        word.normalize();
        word
    }

    /// `value` placed at bits `lsb..lsb + width`; higher bits of `value` are dropped.
    pub fn field(lsb: u32, width: u32, value: u64) -> Self {
        let mut word = ControlWord::zero();
        for i in 0..width.min(64) {
            if (value >> i) & 1 == 1 {
                word.set(lsb + i);
            }
        }
        word
    }

    pub fn is_zero(&self) -> bool {
        self.limbs.is_empty()
    }

    pub fn set(&mut self, k: u32) {
        let limb = (k / 64) as usize;
        if self.limbs.len() <= limb {
            self.limbs.resize(limb + 1, 0);
        }
        self.limbs[limb] |= 1 << (k % 64);
    }

    pub fn test(&self, k: u32) -> bool {
        self.limbs
            .get((k / 64) as usize)
            .map_or(false, |limb| (limb >> (k % 64)) & 1 == 1)
    }

    /// Number of bits needed to hold the word; zero for the zero word.
    pub fn bit_width(&self) -> u32 {
        match self.limbs.last() {
            Some(top) => (self.limbs.len() as u32 - 1) * 64 + (64 - top.leading_zeros()),
            None => 0,
        }
    }

    /// Bits `lsb..lsb + width` as an integer, `width` at most 64.
    pub fn extract(&self, lsb: u32, width: u32) -> u64 {
        debug_assert!(width <= 64);
        let limb = (lsb / 64) as usize;
        let offset = lsb % 64;
        let lo = self.limbs.get(limb).copied().unwrap_or(0) >> offset;
        let hi = if offset == 0 {
            0
        } else {
            self.limbs.get(limb + 1).copied().unwrap_or(0) << (64 - offset)
        };
        let value = lo | hi;
        if width >= 64 {
            value
        } else {
            value & ((1u64 << width) - 1)
        }
    }

    /// The word as an integer, if it fits.
    pub fn to_u128(&self) -> Option<u128> {
        if self.limbs.len() > 2 {
            return None;
        }
        let lo = self.limbs.first().copied().unwrap_or(0) as u128;
        let hi = self.limbs.get(1).copied().unwrap_or(0) as u128;
        Some(lo | (hi << 64))
    }

    fn normalize(&mut self) {
        while self.limbs.last() == Some(&0) {
            self.limbs.pop();
        }
    }
}

impl BitOrAssign<&ControlWord> for ControlWord {
    fn bitor_assign(&mut self, rhs: &ControlWord) {
        if self.limbs.len() < rhs.limbs.len() {
            self.limbs.resize(rhs.limbs.len(), 0);
        }
        for (limb, other) in self.limbs.iter_mut().zip(&rhs.limbs) {
            *limb |= other;
        }
    }
}

impl BitOr<&ControlWord> for &ControlWord {
    type Output = ControlWord;

    fn bitor(self, rhs: &ControlWord) -> ControlWord {
        let mut word = self.clone();
        word |= rhs;
        word
    }
}

impl BitXor<&ControlWord> for &ControlWord {
    type Output = ControlWord;

    fn bitxor(self, rhs: &ControlWord) -> ControlWord {
        let len = self.limbs.len().max(rhs.limbs.len());
        let limbs = (0..len)
            .map(|i| {
                self.limbs.get(i).copied().unwrap_or(0) ^ rhs.limbs.get(i).copied().unwrap_or(0)
            })
            .collect();
        let mut word = ControlWord { limbs };
        word.normalize();
        word
    }
}

impl fmt::Debug for ControlWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ControlWord({})", self)
    }
}

impl fmt::Display for ControlWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.limbs.split_last() {
            None => write!(f, "0x0"),
            Some((top, rest)) => {
                write!(f, "0x{:x}", top)?;
                for limb in rest.iter().rev() {
                    write!(f, "{:016x}", limb)?;
                }
                Ok(())
            }
        }
    }
}
