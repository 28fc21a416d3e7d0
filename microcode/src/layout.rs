//! Address-space codec.
//!
//! A layout partitions the microcode ROM address into fields, most
//! significant first. Flags, opcode and step are always present (possibly
//! zero bits wide); a lane field is optional and selects a byte lane bank.

use std::fmt;
use std::str::FromStr;

use crate::error::{MicrocodeError, Result};
use crate::flags::FlagSlice;

/// Widest address a layout may describe. Keeps images addressable in memory.
pub const MAX_ADDRESS_BITS: u32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Flags,
    Lane,
    Opcode,
    Step,
}

impl Field {
    fn name(self) -> &'static str {
        match self {
            Field::Flags => "flags",
            Field::Lane => "lane",
            Field::Opcode => "opcode",
            Field::Step => "step",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = MicrocodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "flags" => Ok(Field::Flags),
            "lane" => Ok(Field::Lane),
            "opcode" => Ok(Field::Opcode),
            "step" => Ok(Field::Step),
            _ => Err(MicrocodeError::Config(format!(
                "Unknown address field '{}'",
                s
            ))),
        }
    }
}

/// A decoded microcode address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MicroAddress {
    pub slice: FlagSlice,
    pub opcode: u32,
    pub step: u32,
    pub lane: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressLayout {
    /// (field, width), most significant first
    fields: Vec<(Field, u32)>,
}

impl AddressLayout {
    pub fn new(fields: &[(Field, u32)]) -> Result<Self> {
        for field in [Field::Flags, Field::Lane, Field::Opcode, Field::Step] {
            let count = fields.iter().filter(|(f, _)| *f == field).count();
            if count > 1 {
                return Err(MicrocodeError::Config(format!(
                    "Address field '{}' appears more than once",
                    field
                )));
            }
            if count == 0 && field != Field::Lane {
                return Err(MicrocodeError::Config(format!(
                    "Address layout is missing the '{}' field",
                    field
                )));
            }
        }
        if let Some((field, width)) = fields.iter().find(|(_, w)| *w > MAX_ADDRESS_BITS) {
            return Err(MicrocodeError::Config(format!(
                "Address field '{}' is {} bits wide, at most {} supported",
                field, width, MAX_ADDRESS_BITS
            )));
        }
        let total: u32 = fields.iter().map(|(_, w)| w).sum();
        if total > MAX_ADDRESS_BITS {
            return Err(MicrocodeError::Config(format!(
                "Address layout is {} bits wide, at most {} supported",
                total, MAX_ADDRESS_BITS
            )));
        }
        Ok(AddressLayout {
            fields: fields.to_vec(),
        })
    }

    /// Parses `flags:4 opcode:8 step:4`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut fields = Vec::new();
        for term in text.split_whitespace() {
            let (name, width) = term.split_once(':').ok_or_else(|| {
                MicrocodeError::Config(format!(
                    "Invalid layout field '{}', expected format 'name:width'",
                    term
                ))
            })?;
            let width = width.parse::<u32>().map_err(|_| {
                MicrocodeError::Config(format!(
                    "Invalid width '{}' in layout field '{}'",
                    width, term
                ))
            })?;
            fields.push((name.parse()?, width));
        }
        AddressLayout::new(&fields)
    }

    pub fn width(&self, field: Field) -> u32 {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .map_or(0, |&(_, w)| w)
    }

    fn shift(&self, field: Field) -> u32 {
        self.fields
            .iter()
            .rev()
            .take_while(|(f, _)| *f != field)
            .map(|(_, w)| w)
            .sum()
    }

    pub fn total_bits(&self) -> u32 {
        self.fields.iter().map(|(_, w)| w).sum()
    }

    /// Number of addresses.
    pub fn len(&self) -> usize {
        1 << self.total_bits()
    }

    pub fn flag_slices(&self) -> u32 {
        1 << self.width(Field::Flags)
    }

    pub fn opcodes(&self) -> u32 {
        1 << self.width(Field::Opcode)
    }

    pub fn steps(&self) -> u32 {
        1 << self.width(Field::Step)
    }

    pub fn lanes(&self) -> u32 {
        1 << self.width(Field::Lane)
    }

    pub fn encode(&self, slice: FlagSlice, opcode: u32, step: u32) -> Result<u32> {
        self.encode_address(&MicroAddress {
            slice,
            opcode,
            step,
            lane: 0,
        })
    }

    pub fn encode_address(&self, address: &MicroAddress) -> Result<u32> {
        let mut encoded = 0;
        for &(field, width) in &self.fields {
            let value = match field {
                Field::Flags => address.slice.0,
                Field::Lane => address.lane,
                Field::Opcode => address.opcode,
                Field::Step => address.step,
            };
            if u64::from(value) >= 1u64 << width {
                return Err(MicrocodeError::range(field.name(), value, 1u64 << width));
            }
            encoded = (encoded << width) | value;
        }
        if self.width(Field::Lane) == 0 && address.lane != 0 {
            return Err(MicrocodeError::range("lane", address.lane, 1u32));
        }
        Ok(encoded)
    }

    pub fn decode(&self, address: u32) -> Result<MicroAddress> {
        if address as usize >= self.len() {
            return Err(MicrocodeError::range("address", address, self.len() as u64));
        }
        let get = |field| {
            let width = self.width(field);
            (address >> self.shift(field)) & ((1 << width) - 1)
        };
        Ok(MicroAddress {
            slice: FlagSlice(get(Field::Flags)),
            opcode: get(Field::Opcode),
            step: get(Field::Step),
            lane: get(Field::Lane),
        })
    }
}
