use anyhow::{Context, Result};
use isoprep_image::{CloneOptions, ImageKind, Modification, OpticalImage, ReadImage};
use tracing::debug;

use crate::answer::{AnswerFile, preseed::FIRST_TIME_START_ON_IMAGE};

use super::{InstallerRecipe, insert_label_before, linux_clone_options, set_isolinux_timeout};

const TXT_CFG: &str = "isolinux/txt.cfg";
const ISOLINUX_CFG: &str = "isolinux/isolinux.cfg";

/// Ubuntu desktop live media installing through ubiquity.
#[derive(Clone, Debug, Default)]
pub struct UbuntuPreseed;

impl UbuntuPreseed {
    fn boot_entry(&self, kernel: &str, initrd: &str) -> String {
        format!(
            "label pscustom\n  menu label ^Custom Preseed\n  kernel /{kernel}\n  append file=/cdrom/{} boot=casper automatic-ubiquity noprompt initrd=/{initrd} --\n",
            self.answer_file_path()
        )
    }
}

/// The first of `candidates` present on the image, or the last one.
fn pick<'a>(files: &[String], candidates: &[&'a str]) -> &'a str {
    candidates
        .iter()
        .copied()
        .find(|candidate| files.iter().any(|f| f == candidate))
        .or(candidates.last().copied())
        .unwrap_or_default()
}

impl InstallerRecipe for UbuntuPreseed {
    fn answer_file_path(&self) -> &'static str {
        "preseed/pscustom.seed"
    }

    fn answer_kind(&self) -> &'static str {
        "preseed"
    }

    fn image_kind(&self) -> ImageKind {
        ImageKind::Iso
    }

    fn modifications_for(
        &self,
        answer: &AnswerFile,
        source: &OpticalImage,
        reader: &dyn ReadImage,
    ) -> Result<Vec<Modification>> {
        // 64-bit media ship an EFI-signed kernel under another name
        let listing = reader
            .list_entries(source, &self.clone_options(0.0).read)
            .with_context(|| format!("listing {source}"))?;
        let kernel = pick(&listing.files, &["casper/vmlinuz.efi", "casper/vmlinuz"]);
        let initrd = pick(&listing.files, &["casper/initrd.lz", "casper/initrd"]);
        debug!(kernel, initrd, "Found casper boot files");

        let mut modifications = Vec::new();
        if let AnswerFile::Preseed(preseed) = answer {
            if let Some(script) = preseed.first_time_start_script() {
                modifications.push(Modification::from_string(FIRST_TIME_START_ON_IMAGE, script));
            }
        }
        modifications.extend([
            Modification::from_string("isolinux/lang", "en\n"),
            insert_label_before(TXT_CFG, "install|live", &self.boot_entry(kernel, initrd)),
            Modification::by_regex(TXT_CFG, r"(?m)^([ \t]*default[ \t]+)\S+", "${1}pscustom")
                .require_match(),
        ]);
        modifications.extend(set_isolinux_timeout(ISOLINUX_CFG));
        Ok(modifications)
    }

    fn clone_options(&self, read_tolerance: f64) -> CloneOptions {
        linux_clone_options(read_tolerance)
    }
}
