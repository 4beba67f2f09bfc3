use anyhow::Result;
use isoprep_image::{CloneOptions, ImageKind, Modification, OpticalImage, ReadImage};

use crate::{answer::AnswerFile, network::DEFAULT_DEVICE};

use super::{InstallerRecipe, insert_label_before, linux_clone_options, set_isolinux_timeout};

const TXT_CFG: &str = "isolinux/txt.cfg";
const ISOLINUX_CFG: &str = "isolinux/isolinux.cfg";
const BOOTSTRAP_SEED: &str = "preseed/kscustom.seed";

/// Ubuntu alternate/server media, whose debian-installer understands a
/// subset of kickstart.
#[derive(Clone, Debug)]
pub struct UbuntuKickstart {
    pub interface: String,

    /// Kernel meta package installed into the target
    pub kernel: String,
}

impl Default for UbuntuKickstart {
    fn default() -> Self {
        Self {
            interface: DEFAULT_DEVICE.to_string(),
            kernel: String::from("linux-generic"),
        }
    }
}

impl UbuntuKickstart {
    /// Answers debian-installer needs before it reads the kickstart.
    pub fn bootstrap_seed(&self) -> String {
        format!(
            "d-i preseed/early_command string true\n\
             d-i base-installer/kernel/image string {}\n\
             d-i netcfg/choose_interface select {}\n",
            self.kernel, self.interface
        )
    }

    fn boot_entry(&self) -> String {
        format!(
            "label kscustom\n  menu label ^Custom Kickstart\n  kernel /install/vmlinuz\n  append file=/cdrom/{BOOTSTRAP_SEED} initrd=/install/initrd.gz ks=cdrom:/{} --\n",
            self.answer_file_path()
        )
    }
}

impl InstallerRecipe for UbuntuKickstart {
    fn answer_file_path(&self) -> &'static str {
        "isolinux/kscustom.cfg"
    }

    fn answer_kind(&self) -> &'static str {
        "kickstart"
    }

    fn image_kind(&self) -> ImageKind {
        ImageKind::Iso
    }

    fn modifications_for(
        &self,
        _answer: &AnswerFile,
        _source: &OpticalImage,
        _reader: &dyn ReadImage,
    ) -> Result<Vec<Modification>> {
        let mut modifications = vec![
            Modification::from_string(BOOTSTRAP_SEED, self.bootstrap_seed()),
            // Skips the language prompt
            Modification::from_string("isolinux/lang", "en\n"),
            insert_label_before(TXT_CFG, "install", &self.boot_entry()),
            Modification::by_regex(TXT_CFG, r"(?m)^([ \t]*default[ \t]+)install\b", "${1}kscustom")
                .require_match(),
        ];
        modifications.extend(set_isolinux_timeout(ISOLINUX_CFG));
        Ok(modifications)
    }

    fn clone_options(&self, read_tolerance: f64) -> CloneOptions {
        linux_clone_options(read_tolerance)
    }
}
