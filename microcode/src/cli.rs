use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::PathBuf;

use clap::Parser;
use log::info;

use microcode_rom::error::{MicrocodeError, Result};
use microcode_rom::output::{self, OutputFormat};
use microcode_rom::target::Target;
use microcode_rom::{parser, targets};

#[derive(Parser)]
#[command(name = "microcode")]
#[command(version)]
#[command(about = "Compiles microcode definitions into ROM images", long_about = None)]
pub(crate) struct Cli {
    /// Definition file (defaults to stdin)
    #[arg(short, long, conflicts_with = "target")]
    pub(crate) input: Option<PathBuf>,

    /// Built-in target to generate, may be repeated
    #[arg(short, long)]
    pub(crate) target: Vec<String>,

    /// Directory the images are written to
    #[arg(short, long, default_value = ".")]
    pub(crate) output: PathBuf,

    /// Image file format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Binary)]
    pub(crate) format: OutputFormat,

    /// List the built-in targets and exit
    #[arg(short, long)]
    pub(crate) list: bool,

    /// Log more, repeat for debug output
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,
}

impl Cli {
    pub(crate) fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

fn load_targets(cli: &Cli) -> Result<Vec<Target>> {
    if !cli.target.is_empty() {
        return cli.target.iter().map(|name| targets::load(name)).collect();
    }
    match &cli.input {
        Some(path) => {
            let file = File::open(path).map_err(|e| MicrocodeError::io(path, e))?;
            parser::parse(BufReader::new(file))
        }
        None => parser::parse(io::stdin().lock()),
    }
}

pub(crate) fn run(cli: &Cli) -> Result<()> {
    if cli.list {
        for builtin in targets::all() {
            println!("{:<14} {}", builtin.name, builtin.description);
        }
        return Ok(());
    }

    let targets = load_targets(cli)?;
    // Nothing is written unless every target serializes.
    let mut files = Vec::new();
    for target in &targets {
        let images = target.images()?;
        let rendered = target.render(&images, cli.format);
        info!("{}: {} image(s)", target.name, rendered.len());
        files.extend(
            rendered
                .into_iter()
                .map(|(name, contents)| (cli.output.join(name), contents)),
        );
    }

    fs::create_dir_all(&cli.output).map_err(|e| MicrocodeError::io(&cli.output, e))?;
    output::write_files(&files)
}
