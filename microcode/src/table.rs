//! Instruction table.
//!
//! Step sequences live in an arena. Every slice points at a template
//! sequence, and definitions only record sparse `(slice, opcode)` overrides,
//! so nothing is materialized per slice until the image is serialized.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use log::{debug, warn};

use crate::ds::ControlWord;
use crate::error::{MicrocodeError, Result};
use crate::flags::{FlagSlice, Predicate};

/// What a conditional definition without a fallback does to slices its
/// predicate does not match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Leave whatever the slice held before.
    #[default]
    Preserve,
    /// Return the slice to its template.
    Reset,
}

impl FromStr for FallbackPolicy {
    type Err = MicrocodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "preserve" => Ok(FallbackPolicy::Preserve),
            "reset" => Ok(FallbackPolicy::Reset),
            _ => Err(MicrocodeError::Config(format!(
                "Unknown fallback policy '{}', expected 'preserve' or 'reset'",
                s
            ))),
        }
    }
}

/// What an unconditional definition of an already defined opcode does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RedefinePolicy {
    #[default]
    Replace,
    Warn,
    Reject,
}

impl FromStr for RedefinePolicy {
    type Err = MicrocodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "replace" => Ok(RedefinePolicy::Replace),
            "warn" => Ok(RedefinePolicy::Warn),
            "reject" => Ok(RedefinePolicy::Reject),
            _ => Err(MicrocodeError::Config(format!(
                "Unknown redefinition policy '{}', expected 'replace', 'warn' or 'reject'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    /// Micro-steps per instruction.
    pub steps: u32,
    /// Word appended to short step sequences.
    pub pad: ControlWord,
    pub fallback: FallbackPolicy,
    pub redefine: RedefinePolicy,
}

impl TableConfig {
    pub fn new(steps: u32) -> Self {
        TableConfig {
            steps,
            pad: ControlWord::zero(),
            fallback: FallbackPolicy::default(),
            redefine: RedefinePolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MicrocodeTable {
    config: TableConfig,
    slices: u32,
    opcodes: u32,
    /// Every sequence ever written; index 0 is the default template.
    arena: Vec<Vec<ControlWord>>,
    templates: Vec<usize>,
    reserved: Vec<Option<usize>>,
    overrides: HashMap<(FlagSlice, u32), usize>,
    defined: HashSet<u32>,
    cursor: u32,
}

impl MicrocodeTable {
    /// Table of `slices × opcodes` instructions, all idle (every step the pad word).
    pub fn new(slices: u32, opcodes: u32, config: TableConfig) -> Result<Self> {
        if config.steps == 0 {
            return Err(MicrocodeError::Config(
                "Instructions need at least one micro-step".to_string(),
            ));
        }
        let idle = vec![config.pad.clone(); config.steps as usize];
        Ok(MicrocodeTable {
            slices,
            opcodes,
            arena: vec![idle],
            templates: vec![0; slices as usize],
            reserved: vec![None; slices as usize],
            overrides: HashMap::new(),
            defined: HashSet::new(),
            cursor: 0,
            config,
        })
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn slice_count(&self) -> u32 {
        self.slices
    }

    pub fn opcode_count(&self) -> u32 {
        self.opcodes
    }

    pub fn step_count(&self) -> u32 {
        self.config.steps
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Pads with the pad word or truncates to the step count.
    fn fit(&self, steps: &[ControlWord], context: &str) -> Vec<ControlWord> {
        let count = self.config.steps as usize;
        if steps.len() > count {
            warn!(
                "{} has {} micro-steps, truncating to {}",
                context,
                steps.len(),
                count
            );
        }
        let mut fitted: Vec<ControlWord> = steps.iter().take(count).cloned().collect();
        fitted.resize(count, self.config.pad.clone());
        fitted
    }

    fn store(&mut self, steps: &[ControlWord], context: &str) -> usize {
        let fitted = self.fit(steps, context);
        self.arena.push(fitted);
        self.arena.len() - 1
    }

    fn matching(&self, predicate: Option<&Predicate>) -> Vec<FlagSlice> {
        (0..self.slices)
            .map(FlagSlice)
            .filter(|&slice| predicate.map_or(true, |p| p.matches(slice)))
            .collect()
    }

    fn check_opcode(&self, opcode: u32) -> Result<()> {
        if opcode >= self.opcodes {
            return Err(MicrocodeError::range("opcode", opcode, self.opcodes));
        }
        Ok(())
    }

    /// Replaces the idle template of the slices matching `predicate`, or of
    /// every slice when there is none. Opcodes without a definition read the
    /// template of their slice.
    pub fn set_template(&mut self, predicate: Option<&Predicate>, steps: &[ControlWord]) {
        let index = self.store(steps, "template");
        for slice in self.matching(predicate) {
            self.templates[slice.0 as usize] = index;
        }
    }

    /// Pins the matching slices to `steps` for every opcode. Definitions
    /// never write reserved slices.
    pub fn reserve(&mut self, predicate: &Predicate, steps: &[ControlWord]) {
        let index = self.store(steps, "reserved sequence");
        let slices = self.matching(Some(predicate));
        debug!("reserving {} flag slices", slices.len());
        for slice in slices {
            self.reserved[slice.0 as usize] = Some(index);
        }
    }

    fn writable(&self) -> impl Iterator<Item = FlagSlice> + '_ {
        (0..self.slices)
            .map(FlagSlice)
            .filter(|slice| self.reserved[slice.0 as usize].is_none())
    }

    /// Writes `steps` into every slice of `opcode`.
    pub fn set_unconditional(&mut self, opcode: u32, steps: &[ControlWord]) -> Result<()> {
        self.check_opcode(opcode)?;
        if self.defined.contains(&opcode) {
            match self.config.redefine {
                RedefinePolicy::Replace => {}
                RedefinePolicy::Warn => warn!("opcode {:#04x} redefined", opcode),
                RedefinePolicy::Reject => return Err(MicrocodeError::DuplicateDefinition(opcode)),
            }
        }
        let index = self.store(steps, &format!("opcode {:#04x}", opcode));
        let slices: Vec<FlagSlice> = self.writable().collect();
        for slice in slices {
            self.overrides.insert((slice, opcode), index);
        }
        self.defined.insert(opcode);
        debug!("opcode {:#04x}: {} steps", opcode, steps.len());
        Ok(())
    }

    /// Writes `matched` into the slices satisfying `predicate`. The other
    /// slices get `fallback` when given, otherwise the fallback policy.
    pub fn set_conditional(
        &mut self,
        predicate: &Predicate,
        opcode: u32,
        matched: &[ControlWord],
        fallback: Option<&[ControlWord]>,
    ) -> Result<()> {
        self.check_opcode(opcode)?;
        let context = format!("opcode {:#04x}", opcode);
        let matched = self.store(matched, &context);
        let fallback = fallback.map(|steps| self.store(steps, &context));
        let slices: Vec<FlagSlice> = self.writable().collect();
        let mut count = 0;
        for slice in slices {
            let key = (slice, opcode);
            if predicate.matches(slice) {
                self.overrides.insert(key, matched);
                count += 1;
            } else if let Some(fallback) = fallback {
                self.overrides.insert(key, fallback);
            } else if self.config.fallback == FallbackPolicy::Reset {
                self.overrides.remove(&key);
            }
        }
        self.defined.insert(opcode);
        debug!("opcode {:#04x}: conditional on {} flag slices", opcode, count);
        Ok(())
    }

    pub fn seek(&mut self, opcode: u32) -> Result<()> {
        self.check_opcode(opcode)?;
        self.cursor = opcode;
        Ok(())
    }

    /// Unconditional definition at the cursor. Returns the opcode written.
    pub fn define_next(&mut self, steps: &[ControlWord]) -> Result<u32> {
        let opcode = self.cursor;
        self.set_unconditional(opcode, steps)?;
        self.cursor += 1;
        Ok(opcode)
    }

    /// Conditional definition at the cursor. Returns the opcode written.
    pub fn define_next_conditional(
        &mut self,
        predicate: &Predicate,
        matched: &[ControlWord],
        fallback: Option<&[ControlWord]>,
    ) -> Result<u32> {
        let opcode = self.cursor;
        self.set_conditional(predicate, opcode, matched, fallback)?;
        self.cursor += 1;
        Ok(opcode)
    }

    fn index(&self, slice: FlagSlice, opcode: u32) -> Result<usize> {
        if slice.0 >= self.slices {
            return Err(MicrocodeError::range("flags", slice.0, self.slices));
        }
        self.check_opcode(opcode)?;
        if let Some(index) = self.reserved[slice.0 as usize] {
            return Ok(index);
        }
        Ok(self
            .overrides
            .get(&(slice, opcode))
            .copied()
            .unwrap_or(self.templates[slice.0 as usize]))
    }

    /// The step sequence of an instruction, always exactly the step count long.
    pub fn steps(&self, slice: FlagSlice, opcode: u32) -> Result<&[ControlWord]> {
        Ok(&self.arena[self.index(slice, opcode)?])
    }

    pub fn word(&self, slice: FlagSlice, opcode: u32, step: u32) -> Result<&ControlWord> {
        if step >= self.config.steps {
            return Err(MicrocodeError::range("step", step, self.config.steps));
        }
        Ok(&self.steps(slice, opcode)?[step as usize])
    }

    /// Widest word reachable from any address.
    pub fn max_word_width(&self) -> u32 {
        self.templates
            .iter()
            .chain(self.reserved.iter().flatten())
            .chain(self.overrides.values())
            .flat_map(|&index| &self.arena[index])
            .map(ControlWord::bit_width)
            .max()
            .unwrap_or(0)
    }
}
