use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use log::info;

use crate::error::{MicrocodeError, Result};

/// File formats an image can be written in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Raw bytes
    #[default]
    Binary,
    /// One hex byte per line
    Hex,
    /// Logisim "v2.0 raw" memory image
    Logisim,
    /// One binary string per line
    Logix,
}

/// Runs at least this long are written as `N*xx` in Logisim images.
const MIN_RUN: usize = 4;
const LOGISIM_PER_LINE: usize = 16;

/// Renders `bytes` in `format`. `lane_width` sets the digits per entry of
/// the binary-string format.
pub fn render(bytes: &[u8], format: OutputFormat, lane_width: u32) -> Vec<u8> {
    match format {
        OutputFormat::Binary => bytes.to_vec(),
        OutputFormat::Hex => {
            let mut text = String::with_capacity(bytes.len() * 3);
            for byte in bytes {
                let _ = writeln!(text, "{:02X}", byte);
            }
            text.into_bytes()
        }
        OutputFormat::Logisim => render_logisim(bytes).into_bytes(),
        OutputFormat::Logix => {
            let width = lane_width as usize;
            let mut text = String::with_capacity(bytes.len() * (width + 1));
            for byte in bytes {
                let _ = writeln!(text, "{:0width$b}", byte, width = width);
            }
            text.into_bytes()
        }
    }
}

fn render_logisim(bytes: &[u8]) -> String {
    let mut text = String::from("v2.0 raw\n");
    let mut entries = 0;
    let mut rest = bytes;
    while let Some(&byte) = rest.first() {
        let run = rest.iter().take_while(|&&b| b == byte).count();
        if run >= MIN_RUN {
            let _ = write!(text, "{}*{:02x}", run, byte);
            rest = &rest[run..];
        } else {
            let _ = write!(text, "{:02x}", byte);
            rest = &rest[1..];
        }
        entries += 1;
        text.push(if entries % LOGISIM_PER_LINE == 0 { '\n' } else { ' ' });
    }
    if text.ends_with(' ') {
        text.pop();
        text.push('\n');
    }
    text
}

impl OutputFormat {
    /// Extension of files in this format. Binary images keep their own name.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            OutputFormat::Binary => None,
            OutputFormat::Hex => Some("hex"),
            OutputFormat::Logisim => Some("logisim"),
            OutputFormat::Logix => Some("logix"),
        }
    }

    /// `name` with its extension replaced by the format's.
    pub fn file_name(self, name: &str) -> String {
        let Some(extension) = self.extension() else {
            return name.to_string();
        };
        match Path::new(name).extension() {
            Some(old) => format!("{}{}", &name[..name.len() - old.len()], extension),
            None => format!("{}.{}", name, extension),
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Writes `contents` to `<path>.tmp` and renames it over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    write_files(&[(path.to_path_buf(), contents.to_vec())])
}

/// Stages every file as `<path>.tmp`, then renames them all into place.
///
/// Nothing is replaced unless every file was staged. A failing rename still
/// leaves the files before it replaced.
pub fn write_files(files: &[(PathBuf, Vec<u8>)]) -> Result<()> {
    let mut staged = Vec::with_capacity(files.len());
    for (path, contents) in files {
        let tmp = tmp_path(path);
        if let Err(e) = fs::write(&tmp, contents) {
            let _ = fs::remove_file(&tmp);
            for tmp in &staged {
                let _ = fs::remove_file(tmp);
            }
            return Err(MicrocodeError::io(tmp, e));
        }
        staged.push(tmp);
    }
    for (tmp, (path, contents)) in staged.iter().zip(files) {
        fs::rename(tmp, path).map_err(|e| {
            let _ = fs::remove_file(tmp);
            MicrocodeError::io(path, e)
        })?;
        info!("wrote {} ({} bytes)", path.display(), contents.len());
    }
    Ok(())
}

/// Renders named images in `format`, renaming them to the format's extension.
pub fn render_images(
    images: &[(String, &[u8])],
    format: OutputFormat,
    lane_width: u32,
) -> Vec<(String, Vec<u8>)> {
    images
        .iter()
        .map(|(name, bytes)| (format.file_name(name), render(bytes, format, lane_width)))
        .collect()
}

/// Renders every image before writing any, then writes them as one set.
pub fn write_images(
    dir: &Path,
    images: &[(String, &[u8])],
    format: OutputFormat,
    lane_width: u32,
) -> Result<Vec<PathBuf>> {
    let files: Vec<(PathBuf, Vec<u8>)> = render_images(images, format, lane_width)
        .into_iter()
        .map(|(name, contents)| (dir.join(name), contents))
        .collect();
    write_files(&files)?;
    Ok(files.into_iter().map(|(path, _)| path).collect())
}
