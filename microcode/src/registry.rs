//! Control-line registry and control-word builder.
//!
//! Lines map names to bit ranges of the control word. Composite names are
//! ORs of other signals and may deliberately share bits with lines; lines
//! themselves never overlap.

use std::collections::HashMap;

use log::debug;

use crate::ds::{ControlLine, ControlWord};
use crate::error::{MicrocodeError, Result};

/// Highest bit position, exclusive, a control line may reach.
pub const MAX_CONTROL_BITS: u32 = 1024;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    lines: Vec<ControlLine>,
    line_index: HashMap<String, usize>,
    composites: HashMap<String, ControlWord>,
    value_names: HashMap<String, HashMap<String, u64>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-bit line at `bit`.
    pub fn define(&mut self, name: &str, bit: u32) -> Result<ControlWord> {
        self.insert(ControlLine::new(name, bit, 1))
    }

    /// Single-bit line that is driven low when asserted.
    pub fn define_active_low(&mut self, name: &str, bit: u32) -> Result<ControlWord> {
        let mut line = ControlLine::new(name, bit, 1);
        line.active_low = true;
        self.insert(line)
    }

    /// Multi-bit selector field occupying `lsb..lsb + width`.
    pub fn define_field(&mut self, name: &str, lsb: u32, width: u32) -> Result<ControlWord> {
        if width == 0 || width > 64 {
            return Err(MicrocodeError::Config(format!(
                "Width of field '{}' must be between 1 and 64",
                name
            )));
        }
        self.insert(ControlLine::new(name, lsb, width))
    }

    /// Line or field placed at the next free bit, returning its position.
    pub fn push(&mut self, name: &str, width: u32, active_low: bool) -> Result<u32> {
        let bit = self.width();
        if width == 1 && active_low {
            self.define_active_low(name, bit)?;
        } else if width == 1 {
            self.define(name, bit)?;
        } else {
            self.define_field(name, bit, width)?;
        }
        Ok(bit)
    }

    fn insert(&mut self, line: ControlLine) -> Result<ControlWord> {
        validate_name(&line.name)?;
        if self.contains(&line.name) {
            return Err(MicrocodeError::DuplicateSignal(line.name));
        }
        match line.bit.checked_add(line.width) {
            Some(end) if end <= MAX_CONTROL_BITS => {}
            _ => {
                return Err(MicrocodeError::Config(format!(
                    "Control line '{}' at bit {} exceeds the {}-bit control word",
                    line.name, line.bit, MAX_CONTROL_BITS
                )))
            }
        }
        if let Some(other) = self.lines.iter().find(|other| other.overlaps(&line)) {
            return Err(MicrocodeError::OverlappingLine {
                bit: line.bit.max(other.bit),
                name: line.name,
                other: other.name.clone(),
            });
        }
        debug!(
            "control line {} at bits {}..{}",
            line.name,
            line.bit,
            line.end()
        );
        let mask = line.mask();
        self.line_index.insert(line.name.clone(), self.lines.len());
        self.lines.push(line);
        Ok(mask)
    }

    /// Names the OR of `signals`. Composites may overlap anything.
    pub fn alias<I, S>(&mut self, name: &str, signals: I) -> Result<ControlWord>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        validate_name(name)?;
        if self.contains(name) {
            return Err(MicrocodeError::DuplicateSignal(name.to_string()));
        }
        let word = self.build(signals)?;
        self.composites.insert(name.to_string(), word.clone());
        Ok(word)
    }

    /// Names the values `0..names.len()` of a multi-bit field.
    pub fn name_values<S: AsRef<str>>(&mut self, field: &str, names: &[S]) -> Result<()> {
        let line = self.line(field)?;
        if line.width == 1 {
            return Err(MicrocodeError::Config(format!(
                "Control line '{}' is not a multibit term and cannot have aliases",
                field
            )));
        }
        let limit = 1u128 << line.width;
        if names.len() as u128 > limit {
            return Err(MicrocodeError::Config(format!(
                "Too many aliases for multibit term '{}', expected at most {} aliases",
                field, limit
            )));
        }
        let mut values = HashMap::new();
        for (value, name) in names.iter().enumerate() {
            let name = name.as_ref();
            if name.chars().all(|c| c.is_ascii_digit()) {
                return Err(MicrocodeError::Config(format!(
                    "Alias name '{}' cannot be all numerals",
                    name
                )));
            }
            if values.insert(name.to_string(), value as u64).is_some() {
                return Err(MicrocodeError::Config(format!(
                    "Alias '{}' defined more than once for multibit term '{}'",
                    name, field
                )));
            }
        }
        self.value_names.insert(field.to_string(), values);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.line_index.contains_key(name) || self.composites.contains_key(name)
    }

    pub fn line(&self, name: &str) -> Result<&ControlLine> {
        self.line_index
            .get(name)
            .map(|&i| &self.lines[i])
            .ok_or_else(|| MicrocodeError::UnknownSignal(name.to_string()))
    }

    pub fn lines(&self) -> &[ControlLine] {
        &self.lines
    }

    /// Bit pattern of a line, field or composite.
    pub fn resolve(&self, name: &str) -> Result<ControlWord> {
        if let Some(&i) = self.line_index.get(name) {
            return Ok(self.lines[i].mask());
        }
        self.composites
            .get(name)
            .cloned()
            .ok_or_else(|| MicrocodeError::UnknownSignal(name.to_string()))
    }

    /// Like [`Registry::resolve`], also accepting `FIELD=value` where value
    /// is a number or one of the field's value names.
    pub fn resolve_term(&self, term: &str) -> Result<ControlWord> {
        let Some((name, value)) = term.split_once('=') else {
            return self.resolve(term);
        };
        let line = self.line(name)?;
        let value = match self.value_names.get(name).and_then(|names| names.get(value)) {
            Some(&value) => value,
            None => value.parse::<u64>().map_err(|_| {
                MicrocodeError::Config(format!(
                    "Invalid value '{}' for multibit term '{}'",
                    value, name
                ))
            })?,
        };
        if line.width < 64 && value >= 1 << line.width {
            return Err(MicrocodeError::FieldValue {
                name: name.to_string(),
                value,
                width: line.width,
            });
        }
        Ok(ControlWord::field(line.bit, line.width, value))
    }

    /// ORs the patterns of `signals`. Order and repetition do not matter.
    pub fn build<I, S>(&self, signals: I) -> Result<ControlWord>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut word = ControlWord::zero();
        for signal in signals {
            word |= &self.resolve_term(signal.as_ref())?;
        }
        Ok(word)
    }

    /// One past the highest bit reserved by any line.
    pub fn width(&self) -> u32 {
        self.lines.iter().map(ControlLine::end).max().unwrap_or(0)
    }

    /// Bits that idle high because their line is active low.
    pub fn active_low(&self) -> ControlWord {
        let mut word = ControlWord::zero();
        for line in self.lines.iter().filter(|line| line.active_low) {
            word |= &line.mask();
        }
        word
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(MicrocodeError::Config(format!(
            "Invalid control line name '{}', must be alphanumeric",
            name
        )));
    }
    if name.chars().all(|c| c.is_ascii_digit()) {
        return Err(MicrocodeError::Config(format!(
            "Control line name '{}' cannot be all numerals",
            name
        )));
    }
    Ok(())
}
