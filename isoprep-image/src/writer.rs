//! Repacking a staging tree into a new optical image.

use std::{
    ffi::OsString,
    fs::File,
    path::{Path, PathBuf},
    sync::LazyLock,
    time::SystemTime,
};

use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{
    error::{Error, Result},
    process::Cmd,
    timestamp,
};

/// Maximum length of an ISO-9660 volume identifier.
pub const VOLUME_ID_LEN: usize = 32;

/// El Torito parameters. Without them the written image is not bootable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElTorito {
    /// Boot image path relative to the staging root
    pub boot_image: String,

    /// Boot catalog path relative to the staging root
    pub boot_catalog: Option<String>,

    /// Number of 512-byte sectors the BIOS loads
    pub load_size: u32,

    /// Patch a boot information table into the boot image
    pub info_table: bool,

    pub no_emul_boot: bool,
}

impl ElTorito {
    /// The isolinux boot loader used by Linux installer images.
    pub fn isolinux() -> Self {
        Self {
            boot_image: String::from("isolinux/isolinux.bin"),
            boot_catalog: Some(String::from("isolinux/boot.cat")),
            load_size: 4,
            info_table: true,
            no_emul_boot: true,
        }
    }
}

/// Options for [`WriteImage::write`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteOptions {
    /// Write UDF structures (Windows images and anything over 4 GiB)
    pub udf: bool,

    pub joliet: bool,

    /// Allow 103 character Joliet names
    pub joliet_long: bool,

    /// Rock Ridge extensions carrying Unix permissions
    pub rock_ridge: bool,

    /// Generate TRANS.TBL files
    pub trans_tbl: bool,

    pub relaxed_filenames: bool,

    pub el_torito: Option<ElTorito>,

    /// Volume label; only the last [`VOLUME_ID_LEN`] characters are used
    pub label: String,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            udf: false,
            joliet: false,
            joliet_long: false,
            rock_ridge: true,
            trans_tbl: false,
            relaxed_filenames: false,
            el_torito: None,
            label: timestamp(),
        }
    }
}

impl WriteOptions {
    /// ISO-9660 with Rock Ridge, booting isolinux.
    pub fn linux() -> Self {
        Self {
            rock_ridge: true,
            trans_tbl: true,
            el_torito: Some(ElTorito::isolinux()),
            ..Default::default()
        }
    }

    /// UDF with long Joliet names, booting the given no-emulation boot image.
    pub fn windows(boot_image: &str) -> Self {
        Self {
            udf: true,
            joliet: true,
            joliet_long: true,
            rock_ridge: false,
            relaxed_filenames: true,
            el_torito: Some(ElTorito {
                boot_image: boot_image.to_string(),
                boot_catalog: Some(String::from("boot.cat")),
                load_size: 8,
                info_table: false,
                no_emul_boot: true,
            }),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// The volume identifier actually written: the tail of the label.
    pub fn volume_id(&self) -> String {
        let chars: Vec<char> = self.label.chars().collect();
        chars[chars.len().saturating_sub(VOLUME_ID_LEN)..]
            .iter()
            .collect()
    }

    /// Writer arguments for these options.
    pub fn args(&self, staging: &Path, dest: &Path) -> Result<Vec<OsString>> {
        if self.joliet_long && !self.joliet {
            return Err(Error::BadInput(String::from(
                "long Joliet names require Joliet",
            )));
        }
        if self.joliet && self.udf && !self.joliet_long {
            return Err(Error::BadInput(String::from(
                "Joliet together with UDF requires long Joliet names",
            )));
        }

        let mut args: Vec<OsString> = vec![
            "-input-charset".into(),
            "utf-8".into(),
            "-quiet".into(),
            "-o".into(),
            dest.as_os_str().to_os_string(),
            "-V".into(),
            self.volume_id().into(),
        ];

        if self.rock_ridge {
            args.push("-R".into());
        }
        if self.trans_tbl {
            args.push("-T".into());
        }
        if self.joliet {
            args.push("-J".into());
        }
        if self.joliet_long {
            args.push("-joliet-long".into());
        }
        if self.udf {
            args.push("-udf".into());
            args.push("-allow-limited-size".into());
        }
        if self.relaxed_filenames {
            args.push("-relaxed-filenames".into());
        }
        if let Some(boot) = &self.el_torito {
            args.push("-b".into());
            args.push(boot.boot_image.clone().into());
            if let Some(catalog) = &boot.boot_catalog {
                args.push("-c".into());
                args.push(catalog.clone().into());
            }
            if boot.no_emul_boot {
                args.push("-no-emul-boot".into());
            }
            args.push("-boot-load-size".into());
            args.push(boot.load_size.to_string().into());
            if boot.info_table {
                args.push("-boot-info-table".into());
            }
        }

        args.push(staging.as_os_str().to_os_string());
        Ok(args)
    }
}

/// Something that can turn a staging tree into an image file.
pub trait WriteImage {
    fn write(&self, staging: &Path, dest: &Path, options: &WriteOptions) -> Result<()>;
}

/// Writes images with `genisoimage` or `mkisofs`.
#[derive(Clone, Debug)]
pub struct HelperWriter {
    pub program: PathBuf,
}

impl WriteImage for HelperWriter {
    fn write(&self, staging: &Path, dest: &Path, options: &WriteOptions) -> Result<()> {
        normalize_timestamps(staging, SystemTime::UNIX_EPOCH)?;

        info!(
            dest = %dest.display(),
            volume_id = %options.volume_id(),
            bootable = options.el_torito.is_some(),
            udf = options.udf,
            "Writing image"
        );
        let output = Cmd::new(&self.program)
            .args(options.args(staging, dest)?)
            .allow_fail()
            .run()?;

        let stdout = output.stdout_str();
        let stderr = output.stderr_str();
        if !output.success() {
            return Err(Error::WriteFailure {
                status: output.status_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        if !stderr.trim().is_empty() {
            if is_benign_writer_noise(&stdout, &stderr) {
                warn!(stderr = %stderr.trim(), "Ignoring benign image writer warning");
            } else {
                return Err(Error::WriteFailure {
                    status: output.status_string(),
                    stderr: stderr.trim().to_string(),
                });
            }
        }

        if !dest.is_file() {
            return Err(Error::PostCondition(format!(
                "image writer exited successfully but {} does not exist",
                dest.display()
            )));
        }
        debug!(dest = %dest.display(), "Image written");
        Ok(())
    }
}

static INVALID_PARAMETER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\S+:\s+)?warning:.*\binvalid\b.*\b(parameter|configuration)\b").unwrap()
});
static ERROR_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(error|fatal|abort)").unwrap());

/// Whether writer output that has stderr content still denotes success.
///
/// Some writer versions print a warning about an invalid configuration
/// parameter (from their rc file) while producing a correct image. That
/// exact case is accepted: every stderr line must be such a warning and
/// stdout must not report an error. Any other stderr content is fatal.
pub fn is_benign_writer_noise(stdout: &str, stderr: &str) -> bool {
    let mut lines = stderr.lines().filter(|l| !l.trim().is_empty()).peekable();
    if lines.peek().is_none() {
        return false;
    }
    lines.all(|line| INVALID_PARAMETER.is_match(line.trim())) && !ERROR_MENTION.is_match(stdout)
}

/// Set the modification time of everything in a tree to `instant` so that
/// repeated writes of the same content produce the same image.
pub fn normalize_timestamps(root: &Path, instant: SystemTime) -> Result<()> {
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.path_is_symlink() {
            continue;
        }
        File::open(entry.path())?.set_modified(instant)?;
    }
    Ok(())
}
