use anyhow::{Context, Result, bail};
use isoprep_image::{
    CloneOptions, ImageKind, Modification, OpticalImage, ReadImage, ReadOptions, WriteOptions,
};
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::debug;

use crate::answer::AnswerFile;

use super::InstallerRecipe;

/// Name of the boot image copied out of the source, relative to the root.
pub const BOOT_IMAGE: &str = "boot.bin";

/// Licensing channel recorded in `ei.cfg`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum Channel {
    #[default]
    Retail,
    #[serde(rename = "OEM")]
    #[strum(to_string = "OEM")]
    Oem,
}

/// Edition selection written to `sources/ei.cfg`, which suppresses the
/// edition prompt of multi-edition media.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowsEdition {
    /// e.g. `Professional`
    pub edition_id: String,

    #[serde(default)]
    pub channel: Channel,

    /// Volume license media
    #[serde(default)]
    pub volume_license: bool,
}

impl WindowsEdition {
    pub fn ei_cfg(&self) -> String {
        format!(
            "[EditionID]\n{}\n[Channel]\n{}\n[VL]\n{}\n",
            self.edition_id,
            self.channel,
            u8::from(self.volume_license)
        )
    }
}

/// Windows Vista and later installer media, read and written as UDF.
#[derive(Clone, Debug, Default)]
pub struct Windows {
    pub edition: Option<WindowsEdition>,
}

impl InstallerRecipe for Windows {
    fn answer_file_path(&self) -> &'static str {
        "autounattend.xml"
    }

    fn answer_kind(&self) -> &'static str {
        "autounattend"
    }

    fn image_kind(&self) -> ImageKind {
        ImageKind::Udf
    }

    fn modifications_for(
        &self,
        _answer: &AnswerFile,
        source: &OpticalImage,
        reader: &dyn ReadImage,
    ) -> Result<Vec<Modification>> {
        // UDF extraction does not surface the El Torito image, so it is
        // copied from the raw source
        let Some(boot) = reader
            .boot_metadata(source)
            .with_context(|| format!("reading boot metadata of {source}"))?
        else {
            bail!("{source} has no El Torito boot image");
        };
        let range = boot.byte_range();
        debug!(start = range.start, end = range.end, "Copying boot image");

        let mut modifications = vec![Modification::from_byte_range(
            BOOT_IMAGE,
            source.path(),
            range.start,
            range.end,
        )];
        if let Some(edition) = &self.edition {
            modifications.push(Modification::from_string("sources/ei.cfg", edition.ei_cfg()));
        }
        Ok(modifications)
    }

    fn clone_options(&self, read_tolerance: f64) -> CloneOptions {
        CloneOptions {
            read: ReadOptions::udf(),
            write: WriteOptions::windows(BOOT_IMAGE),
            read_tolerance,
        }
    }
}
