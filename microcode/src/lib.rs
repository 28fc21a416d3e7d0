//! Microcode ROM compiler.
//!
//! Symbolic control-line definitions and per-instruction step sequences
//! are compiled into the byte images burned into a CPU's control store.

pub mod ds;
pub mod error;
pub mod flags;
pub mod layout;
pub mod output;
pub mod parser;
pub mod registry;
pub mod serialize;
pub mod table;
pub mod target;
pub mod targets;

pub use ds::{ControlLine, ControlWord};
pub use error::{MicrocodeError, ParseError, Result};
pub use flags::{FlagSet, FlagSlice, Predicate};
pub use layout::{AddressLayout, Field, MicroAddress};
pub use output::OutputFormat;
pub use registry::Registry;
pub use serialize::{ByteOrder, LaneLayout, RomFormat, RomImage};
pub use table::{FallbackPolicy, MicrocodeTable, RedefinePolicy, TableConfig};
pub use target::Target;
