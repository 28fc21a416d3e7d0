//! Status flags and flag-conditional resolution.
//!
//! A flag slice is one assignment of every status-flag bit, read from the
//! flag field of the microcode address. Predicates are a flat OR of
//! `flag = value` literals: a slice matches when any literal does.

use std::fmt;

use crate::error::{MicrocodeError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlagSlice(pub u32);

impl FlagSlice {
    pub fn get(self, bit: u32) -> bool {
        (self.0 >> bit) & 1 == 1
    }
}

impl fmt::Display for FlagSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#b}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Flag {
    name: String,
    bit: u32,
}

/// Named bits of the flag field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    bits: u32,
    flags: Vec<Flag>,
}

impl FlagSet {
    pub fn new(bits: u32) -> Self {
        FlagSet {
            bits,
            flags: Vec::new(),
        }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn define(&mut self, name: &str, bit: u32) -> Result<()> {
        if bit >= self.bits {
            return Err(MicrocodeError::range("flag bit", bit, self.bits));
        }
        if let Some(flag) = self.flags.iter().find(|f| f.name == name || f.bit == bit) {
            return Err(MicrocodeError::Config(format!(
                "Flag '{}' conflicts with flag '{}' at bit {}",
                name, flag.name, flag.bit
            )));
        }
        self.flags.push(Flag {
            name: name.to_string(),
            bit,
        });
        Ok(())
    }

    pub fn bit_of(&self, name: &str) -> Result<u32> {
        self.flags
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.bit)
            .ok_or_else(|| MicrocodeError::UnknownFlag(name.to_string()))
    }

    pub fn literal(&self, name: &str, value: bool) -> Result<Literal> {
        Ok(Literal {
            bit: self.bit_of(name)?,
            value,
        })
    }

    pub fn slice_count(&self) -> u32 {
        1 << self.bits
    }

    pub fn slices(&self) -> impl Iterator<Item = FlagSlice> {
        (0..self.slice_count()).map(FlagSlice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Literal {
    pub bit: u32,
    pub value: bool,
}

impl Literal {
    pub fn matches(&self, slice: FlagSlice) -> bool {
        slice.get(self.bit) == self.value
    }
}

/// Disjunction of flag literals. The empty predicate matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    literals: Vec<Literal>,
}

impl Predicate {
    pub fn any(literals: impl IntoIterator<Item = Literal>) -> Self {
        Predicate {
            literals: literals.into_iter().collect(),
        }
    }

    /// Parses `Z=1, C=0` against the named flags.
    pub fn parse(flags: &FlagSet, text: &str) -> Result<Self> {
        let mut literals = Vec::new();
        for term in text.split(',').map(str::trim) {
            let (name, value) = term.split_once('=').ok_or_else(|| {
                MicrocodeError::Config(format!(
                    "Invalid flag condition '{}', expected format 'flag=0' or 'flag=1'",
                    term
                ))
            })?;
            let value = match value.trim() {
                "0" => false,
                "1" => true,
                other => {
                    return Err(MicrocodeError::Config(format!(
                        "Invalid flag value '{}' in condition '{}'",
                        other, term
                    )))
                }
            };
            literals.push(flags.literal(name.trim(), value)?);
        }
        Ok(Predicate { literals })
    }

    pub fn literals(&self) -> &[Literal] {
        &self.literals
    }

    pub fn matches(&self, slice: FlagSlice) -> bool {
        self.literals.iter().any(|literal| literal.matches(slice))
    }

    /// Every slice of `flags` satisfying the predicate, ascending.
    pub fn resolve(&self, flags: &FlagSet) -> Vec<FlagSlice> {
        flags.slices().filter(|&slice| self.matches(slice)).collect()
    }
}
