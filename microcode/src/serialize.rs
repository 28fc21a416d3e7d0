//! ROM image serializer.
//!
//! Control words are cut into lanes of `lane_width` bits, lane 0 holding the
//! least significant bits. Lanes are placed either side by side within one
//! image, in one image per lane, or in banks selected by the address's lane
//! field.

use std::str::FromStr;

use crate::ds::ControlWord;
use crate::error::{MicrocodeError, Result};
use crate::layout::{AddressLayout, Field, MicroAddress};
use crate::table::MicrocodeTable;

/// Most lanes a control word may be cut into.
pub const MAX_LANES: u32 = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LaneLayout {
    #[default]
    Interleaved,
    Split,
    Banked,
}

impl FromStr for LaneLayout {
    type Err = MicrocodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "interleaved" => Ok(LaneLayout::Interleaved),
            "split" => Ok(LaneLayout::Split),
            "banked" => Ok(LaneLayout::Banked),
            _ => Err(MicrocodeError::Config(format!(
                "Unknown lane layout '{}', expected 'interleaved', 'split' or 'banked'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ByteOrder {
    #[default]
    LowFirst,
    HighFirst,
}

impl FromStr for ByteOrder {
    type Err = MicrocodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low-first" => Ok(ByteOrder::LowFirst),
            "high-first" => Ok(ByteOrder::HighFirst),
            _ => Err(MicrocodeError::Config(format!(
                "Unknown byte order '{}', expected 'low-first' or 'high-first'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomFormat {
    pub lane_width: u32,
    pub lane_count: u32,
    pub layout: LaneLayout,
    pub order: ByteOrder,
    /// Bits inverted on the way out.
    pub active_low: ControlWord,
}

impl Default for RomFormat {
    fn default() -> Self {
        RomFormat {
            lane_width: 8,
            lane_count: 1,
            layout: LaneLayout::default(),
            order: ByteOrder::default(),
            active_low: ControlWord::zero(),
        }
    }
}

impl RomFormat {
    /// Bits the lanes hold together.
    pub fn capacity(&self) -> u64 {
        u64::from(self.lane_width) * u64::from(self.lane_count)
    }

    /// Position of lane `lane` within an address's group of lanes.
    fn position(&self, lane: u32) -> u32 {
        match self.order {
            ByteOrder::LowFirst => lane,
            ByteOrder::HighFirst => self.lane_count - 1 - lane,
        }
    }

    /// Bytes each address occupies across all images.
    pub fn bytes_per_address(&self) -> u32 {
        match self.layout {
            LaneLayout::Banked => 1,
            _ => self.lane_count,
        }
    }

    fn validate(&self, codec: &AddressLayout) -> Result<()> {
        if !(1..=8).contains(&self.lane_width) {
            return Err(MicrocodeError::Config(format!(
                "Lane width {} must be between 1 and 8 bits",
                self.lane_width
            )));
        }
        if !(1..=MAX_LANES).contains(&self.lane_count) {
            return Err(MicrocodeError::Config(format!(
                "Lane count {} must be between 1 and {}",
                self.lane_count, MAX_LANES
            )));
        }
        let lane_bits = codec.width(Field::Lane);
        match self.layout {
            LaneLayout::Banked if lane_bits == 0 || codec.lanes() != self.lane_count => {
                Err(MicrocodeError::Config(format!(
                    "Banked layout needs a lane address field selecting {} lanes",
                    self.lane_count
                )))
            }
            LaneLayout::Interleaved | LaneLayout::Split if lane_bits != 0 => {
                Err(MicrocodeError::Config(
                    "A lane address field requires the banked lane layout".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    fn lane_value(&self, word: &ControlWord, lane: u32) -> u8 {
        word.extract(lane * self.lane_width, self.lane_width) as u8
    }
}

/// One output image. `lane` is set when the image holds a single lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomImage {
    pub lane: Option<u32>,
    pub bytes: Vec<u8>,
}

/// Renders every address of `codec` from `table`.
pub fn serialize(
    table: &MicrocodeTable,
    codec: &AddressLayout,
    format: &RomFormat,
) -> Result<Vec<RomImage>> {
    format.validate(codec)?;
    let width = table.max_word_width().max(format.active_low.bit_width());
    if u64::from(width) > format.capacity() {
        return Err(MicrocodeError::ControlWordOverflow {
            width,
            capacity: format.capacity(),
        });
    }

    let len = codec.len();
    let lanes = format.lane_count;
    let mut images: Vec<RomImage> = match format.layout {
        LaneLayout::Interleaved => vec![RomImage {
            lane: None,
            bytes: vec![0; len * lanes as usize],
        }],
        LaneLayout::Split => (0..lanes)
            .map(|position| RomImage {
                lane: Some(format.position(position)),
                bytes: vec![0; len],
            })
            .collect(),
        LaneLayout::Banked => vec![RomImage {
            lane: None,
            bytes: vec![0; len],
        }],
    };

    for address in 0..len as u32 {
        let decoded = codec.decode(address)?;
        let word = table.word(decoded.slice, decoded.opcode, decoded.step)?;
        let word = word ^ &format.active_low;
        let address = address as usize;
        match format.layout {
            LaneLayout::Interleaved => {
                for lane in 0..lanes {
                    let offset = address * lanes as usize + format.position(lane) as usize;
                    images[0].bytes[offset] = format.lane_value(&word, lane);
                }
            }
            LaneLayout::Split => {
                for lane in 0..lanes {
                    images[format.position(lane) as usize].bytes[address] =
                        format.lane_value(&word, lane);
                }
            }
            LaneLayout::Banked => {
                // the lane field holds the position
                let lane = format.position(decoded.lane);
                images[0].bytes[address] = format.lane_value(&word, lane);
            }
        }
    }
    Ok(images)
}

/// Reassembles the control word stored for `address` (its lane is ignored).
pub fn read_word(
    images: &[RomImage],
    codec: &AddressLayout,
    format: &RomFormat,
    address: &MicroAddress,
) -> Result<ControlWord> {
    let missing =
        || MicrocodeError::Config("Image set does not match the lane layout".to_string());
    let mut word = ControlWord::zero();
    for lane in 0..format.lane_count {
        let position = format.position(lane);
        let byte = match format.layout {
            LaneLayout::Interleaved => {
                let base = codec.encode_address(&MicroAddress { lane: 0, ..*address })? as usize;
                images
                    .first()
                    .and_then(|image| {
                        image
                            .bytes
                            .get(base * format.lane_count as usize + position as usize)
                    })
                    .copied()
            }
            LaneLayout::Split => {
                let base = codec.encode_address(&MicroAddress { lane: 0, ..*address })? as usize;
                images
                    .get(position as usize)
                    .and_then(|image| image.bytes.get(base))
                    .copied()
            }
            LaneLayout::Banked => {
                let banked = codec.encode_address(&MicroAddress {
                    lane: position,
                    ..*address
                })? as usize;
                images
                    .first()
                    .and_then(|image| image.bytes.get(banked))
                    .copied()
            }
        }
        .ok_or_else(missing)?;
        let lsb = lane * format.lane_width;
        word |= &ControlWord::field(lsb, format.lane_width, u64::from(byte));
    }
    Ok(&word ^ &format.active_low)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{FlagSet, FlagSlice, Predicate};
    use crate::registry::Registry;
    use crate::table::TableConfig;

    fn abcd() -> Registry {
        let mut registry = Registry::new();
        for (bit, name) in ["A", "B", "C", "D"].iter().enumerate() {
            registry.define(name, bit as u32).unwrap();
        }
        registry
    }

    #[test]
    fn test_end_to_end_single_lane() {
        let registry = abcd();
        let codec = AddressLayout::parse("flags:0 opcode:1 step:2").unwrap();
        let mut table = MicrocodeTable::new(1, 2, TableConfig::new(4)).unwrap();
        let steps = vec![
            registry.build(["A", "B"]).unwrap(),
            registry.build(["C"]).unwrap(),
            registry.build(Vec::<&str>::new()).unwrap(),
        ];
        table.set_unconditional(0, &steps).unwrap();

        let images = serialize(&table, &codec, &RomFormat::default()).unwrap();
        assert_eq!(images.len(), 1);
        let image = &images[0].bytes;
        let at = |step| image[codec.encode(FlagSlice(0), 0, step).unwrap() as usize];
        assert_eq!(at(0), 0b0011);
        assert_eq!(at(1), 0b0100);
        assert_eq!(at(2), 0b0000);
        assert_eq!(at(3), 0b0000);
    }

    fn wide_table() -> (MicrocodeTable, AddressLayout) {
        let codec = AddressLayout::parse("flags:1 opcode:2 step:1").unwrap();
        let mut table = MicrocodeTable::new(2, 4, TableConfig::new(2)).unwrap();
        table
            .set_unconditional(1, &[ControlWord::from_u128(0xA1B2), ControlWord::bit(15)])
            .unwrap();
        let mut flags = FlagSet::new(1);
        flags.define("C", 0).unwrap();
        table
            .set_conditional(
                &Predicate::parse(&flags, "C=1").unwrap(),
                2,
                &[ControlWord::from_u128(0x00FF)],
                None,
            )
            .unwrap();
        (table, codec)
    }

    fn two_lanes(layout: LaneLayout, order: ByteOrder) -> RomFormat {
        RomFormat {
            lane_count: 2,
            layout,
            order,
            ..RomFormat::default()
        }
    }

    #[test]
    fn test_interleaved_byte_order() {
        let (table, codec) = wide_table();
        let address = codec.encode(FlagSlice(0), 1, 0).unwrap() as usize;

        let format = two_lanes(LaneLayout::Interleaved, ByteOrder::LowFirst);
        let low = serialize(&table, &codec, &format).unwrap();
        assert_eq!(low[0].bytes.len(), 32);
        assert_eq!(&low[0].bytes[address * 2..address * 2 + 2], &[0xB2, 0xA1]);

        let format = two_lanes(LaneLayout::Interleaved, ByteOrder::HighFirst);
        let high = serialize(&table, &codec, &format).unwrap();
        assert_eq!(&high[0].bytes[address * 2..address * 2 + 2], &[0xA1, 0xB2]);
    }

    #[test]
    fn test_split_lanes() {
        let (table, codec) = wide_table();
        let format = two_lanes(LaneLayout::Split, ByteOrder::LowFirst);
        let images = serialize(&table, &codec, &format).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].lane, Some(0));
        assert_eq!(images[1].lane, Some(1));
        let address = codec.encode(FlagSlice(1), 1, 1).unwrap() as usize;
        assert_eq!(images[0].bytes[address], 0x00);
        assert_eq!(images[1].bytes[address], 0x80);
    }

    #[test]
    fn test_banked_lanes() {
        let codec = AddressLayout::parse("flags:0 lane:1 opcode:1 step:1").unwrap();
        let mut table = MicrocodeTable::new(1, 2, TableConfig::new(2)).unwrap();
        table
            .set_unconditional(1, &[ControlWord::from_u128(0x1234)])
            .unwrap();
        let format = two_lanes(LaneLayout::Banked, ByteOrder::HighFirst);
        let images = serialize(&table, &codec, &format).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].bytes.len(), 8);
        // lane field 0 holds the high byte
        assert_eq!(images[0].bytes[0b0_1_0], 0x12);
        assert_eq!(images[0].bytes[0b1_1_0], 0x34);
    }

    #[test]
    fn test_reassembled_words_match_table() {
        let (table, codec) = wide_table();
        for layout in [LaneLayout::Interleaved, LaneLayout::Split] {
            for order in [ByteOrder::LowFirst, ByteOrder::HighFirst] {
                let format = two_lanes(layout, order);
                let images = serialize(&table, &codec, &format).unwrap();
                for address in 0..codec.len() as u32 {
                    let decoded = codec.decode(address).unwrap();
                    assert_eq!(
                        &read_word(&images, &codec, &format, &decoded).unwrap(),
                        table.word(decoded.slice, decoded.opcode, decoded.step).unwrap()
                    );
                }
            }
        }
    }

    #[test]
    fn test_active_low_lines_idle_high() {
        let mut registry = abcd();
        registry.define_active_low("EN", 4).unwrap();
        let codec = AddressLayout::parse("flags:0 opcode:0 step:1").unwrap();
        let mut table = MicrocodeTable::new(1, 1, TableConfig::new(2)).unwrap();
        table
            .set_unconditional(0, &[registry.build(["A", "EN"]).unwrap()])
            .unwrap();
        let format = RomFormat {
            active_low: registry.active_low(),
            ..RomFormat::default()
        };
        let images = serialize(&table, &codec, &format).unwrap();
        assert_eq!(images[0].bytes, vec![0b0_0001, 0b1_0000]);
        let decoded = codec.decode(0).unwrap();
        assert_eq!(
            read_word(&images, &codec, &format, &decoded).unwrap(),
            registry.build(["A", "EN"]).unwrap()
        );
    }

    #[test]
    fn test_narrow_lanes() {
        let codec = AddressLayout::parse("flags:0 opcode:0 step:0").unwrap();
        let mut table = MicrocodeTable::new(1, 1, TableConfig::new(1)).unwrap();
        table
            .set_unconditional(0, &[ControlWord::from_u128(0b10_0111)])
            .unwrap();
        let format = RomFormat {
            lane_width: 3,
            lane_count: 2,
            ..RomFormat::default()
        };
        let images = serialize(&table, &codec, &format).unwrap();
        assert_eq!(images[0].bytes, vec![0b111, 0b100]);
    }

    #[test]
    fn test_error_control_word_overflow() {
        let (table, codec) = wide_table();
        let err = serialize(&table, &codec, &RomFormat::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Control word is 16 bits wide but the lanes hold only 8 bits"
        );
    }

    #[test]
    fn test_error_lane_layout_mismatch() {
        let (table, codec) = wide_table();
        let format = two_lanes(LaneLayout::Banked, ByteOrder::LowFirst);
        let err = serialize(&table, &codec, &format).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: Banked layout needs a lane address field selecting 2 lanes"
        );
        let format = RomFormat {
            lane_width: 9,
            ..RomFormat::default()
        };
        let err = serialize(&table, &codec, &format).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: Lane width 9 must be between 1 and 8 bits"
        );
    }

    #[test]
    fn test_error_lane_count_out_of_range() {
        let (table, codec) = wide_table();
        let format = RomFormat {
            lane_count: u32::MAX,
            ..RomFormat::default()
        };
        assert_eq!(format.capacity(), 8 * u64::from(u32::MAX));
        let err = serialize(&table, &codec, &format).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: Lane count 4294967295 must be between 1 and 1024"
        );
    }
}
