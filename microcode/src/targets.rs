//! Built-in targets, compiled from the definition files under `targets/`.

use crate::error::{MicrocodeError, Result};
use crate::parser;
use crate::target::Target;

#[derive(Debug, Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub description: &'static str,
    source: &'static str,
}

const BENEATER: &str = include_str!("../targets/beneater.mc");
const FLISP: &str = include_str!("../targets/flisp.mc");
const D1: &str = include_str!("../targets/d1.mc");
const D2: &str = include_str!("../targets/d2.mc");

static BUILTINS: &[Builtin] = &[
    Builtin {
        name: "beneater-8bit",
        description: "Ben Eater's 8-bit computer, two 8-bit EEPROMs in one image",
        source: BENEATER,
    },
    Builtin {
        name: "flisp",
        description: "FLISP, 48-bit control word in six 8-bit ROMs",
        source: FLISP,
    },
    Builtin {
        name: "d1",
        description: "D1 instruction ROM, 40-bit control word",
        source: D1,
    },
    Builtin {
        name: "d1-interrupt",
        description: "D1 interrupt entry ROM",
        source: D1,
    },
    Builtin {
        name: "d2",
        description: "D2 with interrupt mode, 64-bit control word",
        source: D2,
    },
];

pub fn all() -> &'static [Builtin] {
    BUILTINS
}

pub fn find(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

/// Parses the definition file of `name` and returns that target.
pub fn load(name: &str) -> Result<Target> {
    let builtin = find(name).ok_or_else(|| {
        MicrocodeError::Config(format!("Unknown built-in target '{}'", name))
    })?;
    builtin.load()
}

impl Builtin {
    pub fn load(&self) -> Result<Target> {
        parser::parse_str(self.source)?
            .into_iter()
            .find(|target| target.name == self.name)
            .ok_or_else(|| {
                MicrocodeError::Config(format!(
                    "Definition file has no target named '{}'",
                    self.name
                ))
            })
    }
}
