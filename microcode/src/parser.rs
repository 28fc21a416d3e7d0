//! Definition-file parser.
//!
//! The first character of each line selects its kind:
//!
//! ```text
//! @ A B/4 /C D:12 E/2:20     control lines (/ prefix = active low)
//! ~ B zero one two           value names for a multibit line
//! $ AB = A B=two             composite signal
//! % FETCH = A | B C          step-sequence macro
//! ! layout flags:2 opcode:4 step:3
//! * %FETCH                   default template
//! * Z=1 : %FETCH | A         template of the matching flag slices
//! ^ I=1 : A | B              reserved flag slices
//! > h10                      opcode cursor
//! = %FETCH | A | .. | C      definition at the cursor
//! ? Z=1, C=1 : A | B : C     conditional definition with fallback
//! ```
//!
//! Steps are separated by `|`, `-` or an empty step is the zero word and
//! `..` pads so the steps after it end on the last micro-step.

use std::collections::HashMap;
use std::io::BufRead;
use std::iter;

use log::debug;

use crate::ds::ControlWord;
use crate::error::{MicrocodeError, ParseError, Result};
use crate::flags::{FlagSet, Predicate};
use crate::layout::{AddressLayout, Field};
use crate::registry::Registry;
use crate::serialize::{ByteOrder, LaneLayout, RomFormat, MAX_LANES};
use crate::table::{FallbackPolicy, MicrocodeTable, RedefinePolicy, TableConfig};
use crate::target::Target;

const DEFAULT_TARGET: &str = "microcode";
const BYTE_ORDER_MARK: char = '\u{FEFF}';

/// Settings of the target being built, fixed once its first definition is seen.
#[derive(Debug)]
struct TargetBuilder {
    name: String,
    named: bool,
    layout: Option<AddressLayout>,
    flags: FlagSet,
    pad: ControlWord,
    lanes: Option<u32>,
    lane_width: u32,
    lane_layout: LaneLayout,
    byte_order: ByteOrder,
    fallback: FallbackPolicy,
    redefine: RedefinePolicy,
    output: Option<String>,
    table: Option<MicrocodeTable>,
}

impl TargetBuilder {
    fn new(name: &str) -> Self {
        TargetBuilder {
            name: name.to_string(),
            named: false,
            layout: None,
            flags: FlagSet::new(0),
            pad: ControlWord::zero(),
            lanes: None,
            lane_width: 8,
            lane_layout: LaneLayout::default(),
            byte_order: ByteOrder::default(),
            fallback: FallbackPolicy::default(),
            redefine: RedefinePolicy::default(),
            output: None,
            table: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct ParserState {
    line_number: usize,
    registry: Registry,
    macros: HashMap<String, Vec<ControlWord>>,
    current: TargetBuilder,
    targets: Vec<Target>,
}

impl ParserState {
    pub(crate) fn new() -> Self {
        ParserState {
            line_number: 0,
            registry: Registry::new(),
            macros: HashMap::new(),
            current: TargetBuilder::new(DEFAULT_TARGET),
            targets: Vec::new(),
        }
    }

    /// Helper method to create a ParseError with the current line number
    fn parse_error(&self, message: &str) -> ParseError {
        ParseError::new(self.line_number, message)
    }

    /// Attaches the current line number to an engine error.
    fn engine_error(&self, err: MicrocodeError) -> ParseError {
        self.parse_error(&err.to_string())
    }
}

impl ParserState {
    pub(crate) fn parse<R: BufRead>(&mut self, reader: R) -> std::result::Result<(), ParseError> {
        let mut lines = reader.lines();
        while let Some(line) = lines.next() {
            self.line_number += 1;
            let line =
                line.map_err(|e| self.parse_error(&format!("Failed to read line: {}", e)))?;
            let line = match self.line_number {
                1 => line.trim_start_matches(BYTE_ORDER_MARK),
                _ => line.as_str(),
            };
            let line = line.split('#').next().unwrap_or_default().trim();
            let Some(first_char) = line.chars().next() else {
                continue; // Skip comments and empty lines
            };
            let rest = &line[first_char.len_utf8()..];
            match first_char {
                '@' => self.parse_control_line(rest)?,
                '~' => self.parse_alias_line(rest)?,
                '$' => self.parse_composite_line(rest)?,
                '%' => self.parse_macro_line(rest)?,
                '!' => self.parse_setting_line(rest)?,
                '*' => self.parse_template_line(rest)?,
                '^' => self.parse_reserve_line(rest)?,
                '>' => self.parse_address_line(rest)?,
                '=' => self.parse_microcode_line(rest)?,
                '?' => self.parse_conditional_line(rest)?,
                _ => {
                    return Err(self.parse_error(&format!("Invalid line start '{}'", first_char)));
                }
            }
        }
        Ok(())
    }

    /// Closes the last target and returns every target of the file.
    pub(crate) fn finish(mut self) -> std::result::Result<Vec<Target>, ParseError> {
        self.close_target()?;
        Ok(self.targets)
    }
}

impl ParserState {
    fn parse_control_line(&mut self, line: &str) -> std::result::Result<(), ParseError> {
        for term in line.split_whitespace() {
            let (active_low, term) = match term.strip_prefix('/') {
                Some(rest) => (true, rest),
                None => (false, term),
            };
            let (term, bit) = match term.split_once(':') {
                Some((term, bit)) => {
                    let bit = bit.parse::<u32>().map_err(|_| {
                        self.parse_error(&format!(
                            "Invalid bit position '{}' for control line '{}'",
                            bit, term
                        ))
                    })?;
                    (term, Some(bit))
                }
                None => (term, None),
            };
            let (name, width) = match term.split_once('/') {
                Some((name, width_str)) => {
                    if width_str.contains('/') {
                        return Err(self.parse_error(&format!(
                            "Invalid multibit term '{}', expected format 'name/width'",
                            term
                        )));
                    }
                    let width = width_str.parse::<u32>().map_err(|_| {
                        self.parse_error(&format!(
                            "Invalid width '{}' in multibit term '{}'",
                            width_str, name
                        ))
                    })?;
                    if width == 0 {
                        return Err(self.parse_error(&format!(
                            "Width cannot be zero in multibit term '{}'",
                            name
                        )));
                    }
                    (name, width)
                }
                None => (term, 1),
            };
            if active_low && width > 1 {
                return Err(self.parse_error(&format!(
                    "Multibit term '{}' cannot be active low",
                    name
                )));
            }
            let result = match bit {
                None => self.registry.push(name, width, active_low).map(|_| ()),
                Some(bit) if width > 1 => self.registry.define_field(name, bit, width).map(|_| ()),
                Some(bit) if active_low => self.registry.define_active_low(name, bit).map(|_| ()),
                Some(bit) => self.registry.define(name, bit).map(|_| ()),
            };
            result.map_err(|e| self.engine_error(e))?;
        }
        Ok(())
    }

    fn parse_alias_line(&mut self, line: &str) -> std::result::Result<(), ParseError> {
        let mut tokens = line.split_whitespace();
        let multibit_name = tokens
            .next()
            .ok_or_else(|| self.parse_error("Missing multibit term name after '~'"))?;
        if self.registry.line(multibit_name).is_err() {
            return Err(self.parse_error(&format!(
                "Undefined term '{}' in alias definition",
                multibit_name
            )));
        }
        let names: Vec<&str> = tokens.collect();
        self.registry
            .name_values(multibit_name, &names)
            .map_err(|e| self.engine_error(e))
    }

    fn parse_composite_line(&mut self, line: &str) -> std::result::Result<(), ParseError> {
        let (name, signals) = line.split_once('=').ok_or_else(|| {
            self.parse_error(&format!(
                "Invalid composite '{}', expected format 'NAME = signals'",
                line.trim()
            ))
        })?;
        self.registry
            .alias(name.trim(), signals.split_whitespace())
            .map(|_| ())
            .map_err(|e| self.engine_error(e))
    }

    fn parse_macro_line(&mut self, line: &str) -> std::result::Result<(), ParseError> {
        let (name, steps) = line.split_once('=').ok_or_else(|| {
            self.parse_error(&format!(
                "Invalid macro '{}', expected format 'NAME = steps'",
                line.trim()
            ))
        })?;
        let name = name.trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(self.parse_error(&format!(
                "Invalid macro name '{}', must be alphanumeric",
                name
            )));
        }
        if self.macros.contains_key(name) {
            return Err(self.parse_error(&format!("Macro '{}' defined more than once", name)));
        }
        let steps = self.parse_steps(steps, false)?;
        self.macros.insert(name.to_string(), steps);
        Ok(())
    }
}

impl ParserState {
    fn parse_setting_line(&mut self, line: &str) -> std::result::Result<(), ParseError> {
        let line = line.trim();
        let (key, value) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let value = value.trim();
        if key.is_empty() {
            return Err(self.parse_error("Missing setting name after '!'"));
        }
        if value.is_empty() {
            return Err(self.parse_error(&format!("Missing value for setting '{}'", key)));
        }

        if key == "name" {
            if self.current.named || self.current.table.is_some() {
                self.close_target()?;
                self.current = TargetBuilder::new(value);
            } else {
                self.current.name = value.to_string();
            }
            self.current.named = true;
            return Ok(());
        }
        if self.current.table.is_some() {
            return Err(self.parse_error(&format!(
                "Setting '{}' must precede the definitions of target '{}'",
                key, self.current.name
            )));
        }

        match key {
            "layout" => {
                let layout = AddressLayout::parse(value).map_err(|e| self.engine_error(e))?;
                self.current.flags = FlagSet::new(layout.width(Field::Flags));
                self.current.layout = Some(layout);
            }
            "flags" => {
                if self.current.layout.is_none() {
                    return Err(self.parse_error("Setting 'flags' must follow 'layout'"));
                }
                for term in value.split_whitespace() {
                    let parsed = term
                        .split_once(':')
                        .and_then(|(name, bit)| Some((name, bit.parse::<u32>().ok()?)));
                    let (name, bit) = parsed.ok_or_else(|| {
                        self.parse_error(&format!(
                            "Invalid flag '{}', expected format 'name:bit'",
                            term
                        ))
                    })?;
                    self.current
                        .flags
                        .define(name, bit)
                        .map_err(|e| self.engine_error(e))?;
                }
            }
            "pad" => {
                self.current.pad = self
                    .registry
                    .build(value.split_whitespace())
                    .map_err(|e| self.engine_error(e))?;
            }
            "lanes" => {
                let lanes = self.parse_number(key, value)?;
                if !(1..=MAX_LANES).contains(&lanes) {
                    return Err(self.parse_error(&format!(
                        "Lane count {} must be between 1 and {}",
                        lanes, MAX_LANES
                    )));
                }
                self.current.lanes = Some(lanes);
            }
            "lane-width" => self.current.lane_width = self.parse_number(key, value)?,
            "lane-layout" => {
                self.current.lane_layout = value.parse().map_err(|e| self.engine_error(e))?
            }
            "byte-order" => {
                self.current.byte_order = value.parse().map_err(|e| self.engine_error(e))?
            }
            "fallback" => {
                self.current.fallback = value.parse().map_err(|e| self.engine_error(e))?
            }
            "redefine" => {
                self.current.redefine = value.parse().map_err(|e| self.engine_error(e))?
            }
            "output" => self.current.output = Some(value.to_string()),
            _ => return Err(self.parse_error(&format!("Unknown setting '{}'", key))),
        }
        Ok(())
    }

    fn parse_number(&self, key: &str, value: &str) -> std::result::Result<u32, ParseError> {
        value.parse::<u32>().map_err(|_| {
            self.parse_error(&format!("Invalid number '{}' for setting '{}'", value, key))
        })
    }

    /// Fixes the settings of the current target and creates its table.
    fn seal(&mut self) -> std::result::Result<(), ParseError> {
        if self.current.table.is_some() {
            return Ok(());
        }
        let layout = self.current.layout.as_ref().ok_or_else(|| {
            self.parse_error(&format!(
                "Target '{}' has no address layout, expected '! layout'",
                self.current.name
            ))
        })?;
        let config = TableConfig {
            steps: layout.steps(),
            pad: self.current.pad.clone(),
            fallback: self.current.fallback,
            redefine: self.current.redefine,
        };
        let table = MicrocodeTable::new(layout.flag_slices(), layout.opcodes(), config)
            .map_err(|e| self.engine_error(e))?;
        debug!(
            "target {}: {} address bits, {} flag slices, {} opcodes, {} steps",
            self.current.name,
            layout.total_bits(),
            layout.flag_slices(),
            layout.opcodes(),
            layout.steps()
        );
        self.current.table = Some(table);
        Ok(())
    }

    /// Runs `f` on the sealed table of the current target.
    fn with_table<T>(
        &mut self,
        f: impl FnOnce(&mut MicrocodeTable) -> Result<T>,
    ) -> std::result::Result<T, ParseError> {
        self.seal()?;
        let line_number = self.line_number;
        match self.current.table.as_mut() {
            Some(table) => f(table).map_err(|e| ParseError::new(line_number, &e.to_string())),
            None => Err(ParseError::new(line_number, "Target has no instruction table")),
        }
    }

    fn close_target(&mut self) -> std::result::Result<(), ParseError> {
        self.seal()?;
        let builder = std::mem::replace(&mut self.current, TargetBuilder::new(DEFAULT_TARGET));
        let (Some(layout), Some(table)) = (builder.layout, builder.table) else {
            return Err(self.parse_error(&format!(
                "Target '{}' has no address layout, expected '! layout'",
                builder.name
            )));
        };
        let lanes = match builder.lanes {
            Some(lanes) => lanes,
            None if layout.width(Field::Lane) > 0 => layout.lanes(),
            None => self.registry.width().max(1).div_ceil(builder.lane_width.max(1)),
        };
        let format = RomFormat {
            lane_width: builder.lane_width,
            lane_count: lanes,
            layout: builder.lane_layout,
            order: builder.byte_order,
            active_low: self.registry.active_low(),
        };
        let output = builder
            .output
            .unwrap_or_else(|| format!("{}.bin", builder.name));
        debug!("target {} complete, {} lanes", builder.name, lanes);
        self.targets.push(Target {
            name: builder.name,
            registry: self.registry.clone(),
            flags: builder.flags,
            layout,
            table,
            format,
            output,
        });
        Ok(())
    }
}

impl ParserState {
    /// Splits `pred : steps [: fallback]`.
    fn split_condition<'a>(
        &self,
        line: &'a str,
        max_parts: usize,
    ) -> std::result::Result<Vec<&'a str>, ParseError> {
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() < 2 || parts.len() > max_parts {
            let expected = if max_parts == 3 {
                "'flags : steps' or 'flags : steps : fallback'"
            } else {
                "'flags : steps'"
            };
            return Err(self.parse_error(&format!(
                "Invalid conditional '{}', expected format {}",
                line.trim(),
                expected
            )));
        }
        Ok(parts)
    }

    fn parse_predicate(&self, text: &str) -> std::result::Result<Predicate, ParseError> {
        Predicate::parse(&self.current.flags, text.trim()).map_err(|e| self.engine_error(e))
    }

    fn parse_template_line(&mut self, line: &str) -> std::result::Result<(), ParseError> {
        self.seal()?;
        let (predicate, steps) = if line.contains(':') {
            let parts = self.split_condition(line, 2)?;
            (Some(self.parse_predicate(parts[0])?), parts[1])
        } else {
            (None, line)
        };
        let steps = self.parse_steps(steps, true)?;
        self.with_table(|table| {
            table.set_template(predicate.as_ref(), &steps);
            Ok(())
        })
    }

    fn parse_reserve_line(&mut self, line: &str) -> std::result::Result<(), ParseError> {
        self.seal()?;
        let parts = self.split_condition(line, 2)?;
        let predicate = self.parse_predicate(parts[0])?;
        let steps = self.parse_steps(parts[1], true)?;
        self.with_table(|table| {
            table.reserve(&predicate, &steps);
            Ok(())
        })
    }

    fn parse_address_line(&mut self, line: &str) -> std::result::Result<(), ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(self.parse_error("Missing address after '>'"));
        }

        let (radix, addr_str) = match line.chars().next() {
            Some('h') => (16, &line[1..]),
            Some('d') => (10, &line[1..]),
            Some('b') => (2, &line[1..]),
            _ => (10, line),
        };

        let opcode = u32::from_str_radix(addr_str, radix)
            .map_err(|_| self.parse_error(&format!("Invalid address format '{}'", addr_str)))?;
        self.with_table(|table| table.seek(opcode))
    }

    fn parse_microcode_line(&mut self, line: &str) -> std::result::Result<(), ParseError> {
        self.seal()?;
        let steps = self.parse_steps(line, true)?;
        self.with_table(|table| table.define_next(&steps).map(|_| ()))
    }

    fn parse_conditional_line(&mut self, line: &str) -> std::result::Result<(), ParseError> {
        self.seal()?;
        let parts = self.split_condition(line, 3)?;
        let predicate = self.parse_predicate(parts[0])?;
        let matched = self.parse_steps(parts[1], true)?;
        let fallback = match parts.get(2) {
            Some(steps) => Some(self.parse_steps(steps, true)?),
            None => None,
        };
        self.with_table(|table| {
            table
                .define_next_conditional(&predicate, &matched, fallback.as_deref())
                .map(|_| ())
        })
    }
}

impl ParserState {
    /// Parses `|`-separated steps, splicing macros and expanding `..`.
    fn parse_steps(
        &self,
        text: &str,
        allow_fill: bool,
    ) -> std::result::Result<Vec<ControlWord>, ParseError> {
        let mut before = Vec::new();
        let mut after: Option<Vec<ControlWord>> = None;
        for step in text.split('|').map(str::trim) {
            if step == ".." {
                if !allow_fill {
                    return Err(self.parse_error("'..' is not allowed in macro definitions"));
                }
                if after.is_some() {
                    return Err(self.parse_error("'..' may appear only once in a step sequence"));
                }
                after = Some(Vec::new());
                continue;
            }
            let steps = match after.as_mut() {
                Some(after) => after,
                None => &mut before,
            };
            if let Some(name) = step.strip_prefix('%') {
                if name.contains(char::is_whitespace) {
                    return Err(self.parse_error(&format!(
                        "Macro reference '{}' must be a whole step",
                        step
                    )));
                }
                let spliced = self
                    .macros
                    .get(name)
                    .ok_or_else(|| self.parse_error(&format!("Undefined macro '{}'", name)))?;
                steps.extend(spliced.iter().cloned());
            } else if step.is_empty() || step == "-" {
                steps.push(ControlWord::zero());
            } else {
                let word = self
                    .registry
                    .build(step.split_whitespace())
                    .map_err(|e| self.engine_error(e))?;
                steps.push(word);
            }
        }

        let Some(after) = after else {
            return Ok(before);
        };
        let table = self
            .current
            .table
            .as_ref()
            .ok_or_else(|| self.parse_error("'..' needs the step count of a target"))?;
        let count = table.step_count() as usize;
        let gap = count.saturating_sub(before.len() + after.len());
        before.extend(iter::repeat(table.config().pad.clone()).take(gap));
        before.extend(after);
        Ok(before)
    }
}

/// Parses a definition file into its targets.
pub fn parse<R: BufRead>(reader: R) -> Result<Vec<Target>> {
    let mut parser = ParserState::new();
    parser.parse(reader)?;
    Ok(parser.finish()?)
}

pub fn parse_str(text: &str) -> Result<Vec<Target>> {
    parse(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::FlagSlice;
    use std::io::Cursor;

    /// Helper function to create a ParserState and parse the given input
    fn parse_input(input: &str) -> std::result::Result<ParserState, ParseError> {
        let mut parser = ParserState::new();
        let reader = Cursor::new(input);
        parser.parse(reader)?;
        Ok(parser)
    }

    fn parse_targets(input: &str) -> std::result::Result<Vec<Target>, ParseError> {
        parse_input(input)?.finish()
    }

    fn word(bits: u128) -> ControlWord {
        ControlWord::from_u128(bits)
    }

    #[test]
    fn test_valid_input_all_line_types() {
        let input = r#"
            # Define control lines
            @ /x0 x1 x2 x3 x4 a b /c zz/4

            # Define aliases for multibit term zz
            ~ zz zero one two three four five six seven eight nine ten eleven twelve thirteen fourteen fifteen

            $ ab = a b
            % PRE = x1 | x2 x3

            ! layout flags:1 opcode:2 step:3
            ! flags Z:0

            * %PRE
            > d0
            = %PRE | a zz=three
            = %PRE | b zz=fifteen
            ? Z=1 : %PRE | ab | .. | c
        "#;

        let targets = parse_targets(input).expect("Parsing failed");
        assert_eq!(targets.len(), 1);
        let target = &targets[0];
        assert_eq!(target.name, "microcode");
        assert_eq!(target.output, "microcode.bin");
        assert_eq!(target.registry.lines().len(), 9);
        assert_eq!(target.registry.width(), 12);
        assert_eq!(target.format.lane_count, 2);

        let table = &target.table;
        let zz = |value: u128| value << 8;
        assert_eq!(
            table.steps(FlagSlice(0), 0).unwrap(),
            &[
                word(0b10),
                word(0b1100),
                word(0b10_0000 | zz(3)),
                word(0),
                word(0),
                word(0),
                word(0),
                word(0)
            ]
        );
        assert_eq!(table.word(FlagSlice(1), 1, 2).unwrap(), &word(0b100_0000 | zz(15)));
        // unconditional slice keeps the template, Z=1 gets the variant
        assert_eq!(table.word(FlagSlice(0), 2, 2).unwrap(), &word(0));
        assert_eq!(table.word(FlagSlice(1), 2, 2).unwrap(), &word(0b110_0000));
        assert_eq!(table.word(FlagSlice(1), 2, 7).unwrap(), &word(1 << 7));
        assert_eq!(table.word(FlagSlice(1), 3, 1).unwrap(), &word(0b1100));
    }

    #[test]
    fn test_error_duplicate_control_line() {
        let input = "@ a\n@ a";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 2: Control line 'a' defined more than once"
        );
    }

    #[test]
    fn test_error_invalid_multibit_width() {
        let input = "@ xx/0";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 1: Width cannot be zero in multibit term 'xx'"
        );
    }

    #[test]
    fn test_error_overlapping_positions() {
        let input = "@ alu/4:4\n@ ld:6";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 2: Control line 'ld' overlaps 'alu' at bit 6"
        );
    }

    #[test]
    fn test_explicit_positions() {
        let input = "@ HLT:15 MI:14 FI:0\n@ NEXT";
        let parser = parse_input(input).unwrap();
        assert_eq!(parser.registry.line("HLT").unwrap().bit, 15);
        assert_eq!(parser.registry.line("FI").unwrap().bit, 0);
        // unpositioned lines go above the highest line
        assert_eq!(parser.registry.line("NEXT").unwrap().bit, 16);
    }

    #[test]
    fn test_error_alias_name_all_numerals() {
        let input = "@ ww/2\n~ ww 12 3 4 5";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 2: Invalid configuration: Alias name '12' cannot be all numerals"
        );
    }

    #[test]
    fn test_error_too_many_aliases() {
        let input = "@ ww/2\n~ ww a b c d e";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 2: Invalid configuration: Too many aliases for multibit term 'ww', expected at most 4 aliases"
        );
    }

    #[test]
    fn test_error_missing_multibit_term_after_tilde() {
        let input = "~";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 1: Missing multibit term name after '~'"
        );
    }

    #[test]
    fn test_error_undefined_multibit_term_in_alias() {
        let input = "~ zz alias1 alias2";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 1: Undefined term 'zz' in alias definition"
        );
    }

    #[test]
    fn test_error_missing_address_after_greater_than() {
        let input = ">";
        let err = parse_input(input).unwrap_err();
        assert_eq!(err.to_string(), "Error on line 1: Missing address after '>'");
    }

    #[test]
    fn test_error_invalid_address_prefix() {
        let input = "! layout flags:0 opcode:4 step:2\n> x123";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 2: Invalid address format 'x123'"
        );
    }

    #[test]
    fn test_error_address_out_of_range() {
        let input = "! layout flags:0 opcode:4 step:2\n> h10";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 2: opcode 16 out of range, limit is 16"
        );
    }

    #[test]
    fn test_hex_and_binary_addresses() {
        let input = r#"
            @ x y z
            ! layout flags:0 opcode:4 step:1
            > hA
            = x
            > b1100
            = y
            = z
        "#;

        let targets = parse_targets(input).unwrap();
        let table = &targets[0].table;
        assert_eq!(table.word(FlagSlice(0), 10, 0).unwrap(), &word(0b001));
        assert_eq!(table.word(FlagSlice(0), 12, 0).unwrap(), &word(0b010));
        assert_eq!(table.word(FlagSlice(0), 13, 0).unwrap(), &word(0b100));
        assert!(table.word(FlagSlice(0), 11, 0).unwrap().is_zero());
    }

    #[test]
    fn test_error_undefined_control_line_in_microcode() {
        let input = "@ a\n! layout flags:0 opcode:1 step:1\n= b";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 3: Unknown control signal 'b'"
        );
    }

    #[test]
    fn test_error_value_exceeds_multibit_width() {
        let input = "@ zz/2\n! layout flags:0 opcode:1 step:1\n= zz=5";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 3: Value '5' exceeds width 2 of multibit term 'zz'"
        );
    }

    #[test]
    fn test_error_invalid_value_in_assignment() {
        let input = "@ zz/2\n! layout flags:0 opcode:1 step:1\n= zz=invalid";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 3: Invalid configuration: Invalid value 'invalid' for multibit term 'zz'"
        );
    }

    #[test]
    fn test_redefinition_rejected() {
        let input = "@ a\n! layout flags:0 opcode:2 step:1\n! redefine reject\n= a\n> 0\n= a";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 6: Opcode 0x00 defined more than once"
        );
    }

    #[test]
    fn test_error_invalid_line_start() {
        let input = "& invalid line start";
        let err = parse_input(input).unwrap_err();
        assert_eq!(err.to_string(), "Error on line 1: Invalid line start '&'");
    }

    #[test]
    fn test_error_definition_without_layout() {
        let input = "@ a\n= a";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 2: Target 'microcode' has no address layout, expected '! layout'"
        );
    }

    #[test]
    fn test_error_setting_after_definitions() {
        let input = "@ a\n! layout flags:0 opcode:1 step:1\n= a\n! lanes 2";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 4: Setting 'lanes' must precede the definitions of target 'microcode'"
        );
    }

    #[test]
    fn test_error_unknown_flag_in_condition() {
        let input = "@ a\n! layout flags:1 opcode:1 step:1\n! flags C:0\n? Z=1 : a";
        let err = parse_input(input).unwrap_err();
        assert_eq!(err.to_string(), "Error on line 4: Unknown flag 'Z'");
    }

    #[test]
    fn test_error_bad_conditional() {
        let input = "@ a\n! layout flags:1 opcode:1 step:1\n! flags C:0\n? C=1 a";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 4: Invalid conditional 'C=1 a', expected format 'flags : steps' or 'flags : steps : fallback'"
        );
    }

    #[test]
    fn test_error_undefined_macro() {
        let input = "@ a\n! layout flags:0 opcode:1 step:2\n= a | %FETCH";
        let err = parse_input(input).unwrap_err();
        assert_eq!(err.to_string(), "Error on line 3: Undefined macro 'FETCH'");
    }

    #[test]
    fn test_error_fill_in_macro() {
        let input = "@ a\n% M = a | .. | a";
        let err = parse_input(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 2: '..' is not allowed in macro definitions"
        );
    }

    #[test]
    fn test_fill_uses_pad_word() {
        let input = r#"
            @ a b NF
            ! layout flags:0 opcode:1 step:3
            ! pad NF
            = a | .. | b
            = a
        "#;
        let targets = parse_targets(input).unwrap();
        let table = &targets[0].table;
        assert_eq!(
            table.steps(FlagSlice(0), 0).unwrap(),
            &[
                word(0b001),
                word(0b100),
                word(0b100),
                word(0b100),
                word(0b100),
                word(0b100),
                word(0b100),
                word(0b010)
            ]
        );
        assert_eq!(table.word(FlagSlice(0), 1, 7).unwrap(), &word(0b100));
    }

    #[test]
    fn test_conditional_fallback_and_policy() {
        let input = r#"
            @ skip jump fetch
            ! layout flags:1 opcode:2 step:1
            ! flags C:0
            ! fallback reset
            * fetch
            = skip
            ? C=1 : jump
            > 0
            ? C=0 : jump : skip
        "#;
        let targets = parse_targets(input).unwrap();
        let table = &targets[0].table;
        // opcode 0: explicit fallback
        assert_eq!(table.word(FlagSlice(0), 0, 0).unwrap(), &word(0b010));
        assert_eq!(table.word(FlagSlice(1), 0, 0).unwrap(), &word(0b001));
        // opcode 1: reset policy sends the unmatched slice back to the template
        assert_eq!(table.word(FlagSlice(0), 1, 0).unwrap(), &word(0b100));
        assert_eq!(table.word(FlagSlice(1), 1, 0).unwrap(), &word(0b010));
    }

    #[test]
    fn test_reserved_slices() {
        let input = r#"
            @ irq op
            ! layout flags:1 opcode:1 step:1
            ! flags IRQ:0
            ^ IRQ=1 : irq
            = op
        "#;
        let targets = parse_targets(input).unwrap();
        let table = &targets[0].table;
        assert_eq!(table.word(FlagSlice(0), 0, 0).unwrap(), &word(0b10));
        assert_eq!(table.word(FlagSlice(1), 0, 0).unwrap(), &word(0b01));
        assert_eq!(table.word(FlagSlice(1), 1, 0).unwrap(), &word(0b01));
    }

    #[test]
    fn test_multiple_targets_share_signals() {
        let input = r#"
            @ a b
            $ ab = a b
            ! name main
            ! layout flags:0 opcode:1 step:1
            ! output main.rom
            = ab
            ! name aux
            ! layout flags:0 opcode:0 step:2
            ! byte-order high-first
            = a | b
        "#;
        let targets = parse_targets(input).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name, "main");
        assert_eq!(targets[0].output, "main.rom");
        assert_eq!(targets[1].name, "aux");
        assert_eq!(targets[1].output, "aux.bin");
        assert_eq!(targets[1].format.order, ByteOrder::HighFirst);
        assert_eq!(targets[0].table.word(FlagSlice(0), 0, 0).unwrap(), &word(0b11));
        assert_eq!(targets[1].table.word(FlagSlice(0), 0, 1).unwrap(), &word(0b10));
    }

    #[test]
    fn test_active_low_reaches_format() {
        let input = "@ /en a\n! layout flags:0 opcode:0 step:1\n= a";
        let targets = parse_targets(input).unwrap();
        assert_eq!(targets[0].format.active_low, ControlWord::bit(0));
        let images = targets[0].images().unwrap();
        assert_eq!(images[0].bytes, vec![0b11, 0b01]);
    }

    #[test]
    fn test_byte_order_mark_is_skipped() {
        let input = "\u{FEFF}@ a\n! layout flags:0 opcode:0 step:1\n= a";
        let targets = parse_str(input).unwrap();
        assert_eq!(targets[0].table.word(FlagSlice(0), 0, 0).unwrap(), &word(1));
    }

    #[test]
    fn test_error_multibyte_line_start() {
        let err = parse_input("é a").unwrap_err();
        assert_eq!(err.to_string(), "Error on line 1: Invalid line start 'é'");
        let err = parse_input("@ a\n\u{FEFF}@ b").unwrap_err();
        assert_eq!(err.to_string(), "Error on line 2: Invalid line start '\u{feff}'");
    }

    #[test]
    fn test_error_oversized_numbers() {
        let err = parse_input("! layout flags:4294967295 opcode:1 step:0").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 1: Invalid configuration: Address field 'flags' is 4294967295 bits wide, at most 24 supported"
        );
        let err = parse_input("@ a:4294967295").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 1: Invalid configuration: Control line 'a' at bit 4294967295 exceeds the 1024-bit control word"
        );
        let err = parse_input("! layout flags:0 opcode:0 step:1\n! lanes 4294967295").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error on line 2: Lane count 4294967295 must be between 1 and 1024"
        );
    }

    #[test]
    fn test_parse_str_wraps_line_errors() {
        let err = parse_str("@ a\n@ b:0").unwrap_err();
        match err {
            MicrocodeError::Parse(err) => assert_eq!(err.line_number(), 2),
            other => panic!("expected a parse error, got {:?}", other),
        }
    }
}
