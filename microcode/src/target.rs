use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::flags::FlagSet;
use crate::layout::AddressLayout;
use crate::output::{self, OutputFormat};
use crate::registry::Registry;
use crate::serialize::{self, RomFormat, RomImage};
use crate::table::MicrocodeTable;

/// A complete ROM: control lines, flags, address layout, instruction table
/// and how the table is laid out in image files.
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub registry: Registry,
    pub flags: FlagSet,
    pub layout: AddressLayout,
    pub table: MicrocodeTable,
    pub format: RomFormat,
    /// File name pattern; may contain `{lane}`, `{lo}` and `{hi}`.
    pub output: String,
}

impl Target {
    pub fn images(&self) -> Result<Vec<RomImage>> {
        serialize::serialize(&self.table, &self.layout, &self.format)
    }

    /// File name of each image, in the same order.
    pub fn file_names(&self, images: &[RomImage]) -> Vec<String> {
        images
            .iter()
            .map(|image| match image.lane {
                Some(lane) => self.lane_file_name(lane),
                None => self.output.clone(),
            })
            .collect()
    }

    fn lane_file_name(&self, lane: u32) -> String {
        let width = self.format.lane_width;
        let lo = lane * width;
        let hi = lo + width - 1;
        if ["{lane}", "{lo}", "{hi}"]
            .iter()
            .any(|placeholder| self.output.contains(placeholder))
        {
            return self
                .output
                .replace("{lane}", &lane.to_string())
                .replace("{lo}", &lo.to_string())
                .replace("{hi}", &hi.to_string());
        }
        match self.output.rfind('.') {
            Some(dot) => format!("{}_{}{}", &self.output[..dot], lane, &self.output[dot..]),
            None => format!("{}_{}", self.output, lane),
        }
    }

    fn named<'a>(&self, images: &'a [RomImage]) -> Vec<(String, &'a [u8])> {
        self.file_names(images)
            .into_iter()
            .zip(images.iter().map(|image| image.bytes.as_slice()))
            .collect()
    }

    /// Renders already serialized images as named files in `format`.
    pub fn render(&self, images: &[RomImage], format: OutputFormat) -> Vec<(String, Vec<u8>)> {
        output::render_images(&self.named(images), format, self.format.lane_width)
    }

    /// Writes already serialized images into `dir`.
    pub fn write(
        &self,
        dir: &Path,
        images: &[RomImage],
        format: OutputFormat,
    ) -> Result<Vec<PathBuf>> {
        output::write_images(dir, &self.named(images), format, self.format.lane_width)
    }

    pub fn generate(&self, dir: &Path, format: OutputFormat) -> Result<Vec<PathBuf>> {
        let images = self.images()?;
        self.write(dir, &images, format)
    }

    /// Total bytes across all images.
    pub fn image_size(&self) -> usize {
        self.layout.len() * self.format.bytes_per_address() as usize
    }
}
