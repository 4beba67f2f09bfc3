use anyhow::Result;
use isoprep_image::{CloneOptions, ImageKind, Modification, OpticalImage, ReadImage};

use crate::{answer::AnswerFile, network::DEFAULT_DEVICE};

use super::{InstallerRecipe, insert_label_before, linux_clone_options, set_isolinux_timeout};

const ISOLINUX_CFG: &str = "isolinux/isolinux.cfg";

/// Red Hat Enterprise Linux and its rebuilds (CentOS, Rocky, Alma, Oracle)
/// booting isolinux from ISO-9660 media.
#[derive(Clone, Debug)]
pub struct EnterpriseLinux {
    /// Interface anaconda fetches the kickstart over
    pub ksdevice: String,
}

impl Default for EnterpriseLinux {
    fn default() -> Self {
        Self {
            ksdevice: DEFAULT_DEVICE.to_string(),
        }
    }
}

impl EnterpriseLinux {
    fn boot_entry(&self) -> String {
        format!(
            "label ks-custom\n  menu label Custom Kickstart\n  menu default\n  kernel vmlinuz\n  append initrd=initrd.img ks=cdrom:/{} ksdevice={}\n",
            self.answer_file_path(),
            self.ksdevice
        )
    }
}

impl InstallerRecipe for EnterpriseLinux {
    fn answer_file_path(&self) -> &'static str {
        "isolinux/ks-custom.cfg"
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
            Modification::by_regex(ISOLINUX_CFG, r"(?m)^[ \t]*menu[ \t]+default[ \t]*\r?\n", ""),
            insert_label_before(ISOLINUX_CFG, "linux", &self.boot_entry()),
        ];
        modifications.extend(set_isolinux_timeout(ISOLINUX_CFG));
        Ok(modifications)
    }

    fn clone_options(&self, read_tolerance: f64) -> CloneOptions {
        linux_clone_options(read_tolerance)
    }
}
