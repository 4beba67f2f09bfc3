use std::path::Path;

use anyhow::{Result, bail};
use enum_dispatch::enum_dispatch;
use isoprep_image::{
    CloneOptions, ImageKind, Modification, OpticalImage, ReadImage, ReadOptions, WriteImage,
    WriteOptions, clone_with_modifications,
};
use strum::Display;
use tracing::info;

use crate::answer::{AnswerContent, AnswerFile};

use enterprise_linux::EnterpriseLinux;
use ubuntu_kickstart::UbuntuKickstart;
use ubuntu_preseed::UbuntuPreseed;
use windows::Windows;

pub mod enterprise_linux;
pub mod ubuntu_kickstart;
pub mod ubuntu_preseed;
pub mod windows;

/// Boot menu timeout written into isolinux configurations, in tenths of a
/// second.
pub const ISOLINUX_TIMEOUT: u32 = 50;

/// Everything that differs between installer media when an answer file is
/// baked into them.
#[enum_dispatch(Installer)]
pub trait InstallerRecipe {
    /// Where the answer file lives on the image.
    fn answer_file_path(&self) -> &'static str;

    /// The [`AnswerFile::kind`] this installer consumes.
    fn answer_kind(&self) -> &'static str;

    fn image_kind(&self) -> ImageKind;

    /// Changes that make the installer boot straight into `answer`. The
    /// answer file itself is not among them.
    fn modifications_for(
        &self,
        answer: &AnswerFile,
        source: &OpticalImage,
        reader: &dyn ReadImage,
    ) -> Result<Vec<Modification>>;

    fn clone_options(&self, read_tolerance: f64) -> CloneOptions;
}

/// Installer media supported for unattended installation.
#[enum_dispatch]
#[derive(Clone, Debug, Display)]
pub enum Installer {
    EnterpriseLinux,
    UbuntuKickstart,
    UbuntuPreseed,
    Windows,
}

/// Clone options shared by the isolinux based installers.
pub(crate) fn linux_clone_options(read_tolerance: f64) -> CloneOptions {
    CloneOptions {
        read: ReadOptions::default(),
        write: WriteOptions::linux(),
        read_tolerance,
    }
}

/// Make the isolinux menu time out after [`ISOLINUX_TIMEOUT`]. Existing
/// `timeout` lines are dropped and a single one goes at the top of the file.
pub(crate) fn set_isolinux_timeout(path_on_image: &str) -> [Modification; 2] {
    [
        Modification::by_regex(
            path_on_image,
            r"(?mi)^[ \t]*timeout[ \t]+\d+[ \t]*(?:\r?\n|\z)",
            "",
        ),
        Modification::by_regex(path_on_image, r"\A", format!("timeout {ISOLINUX_TIMEOUT}\n")),
    ]
}

/// Insert `entry` before the first isolinux `label` line matching
/// `label_pattern`. Fails when there is no such line.
pub(crate) fn insert_label_before(
    path_on_image: &str,
    label_pattern: &str,
    entry: &str,
) -> Modification {
    // `$` in the entry would be read as a capture reference
    let entry = entry.replace('$', "$$");
    Modification::by_regex(
        path_on_image,
        format!(r"(?ms)\A(.*?)^([ \t]*label[ \t]+(?:{label_pattern})\b)"),
        format!("${{1}}{entry}\n${{2}}"),
    )
    .require_match()
}

/// An installer image, checked to have the filesystem its installer needs.
#[derive(Clone, Debug)]
pub struct InstallerImage {
    pub image: OpticalImage,
    pub installer: Installer,
}

impl InstallerImage {
    pub fn new(image: OpticalImage, installer: Installer) -> Result<Self> {
        image.require_kind(installer.image_kind())?;
        Ok(Self { image, installer })
    }

    /// Clone the image with `answer` in place and the boot menu defaulting
    /// to an entry that consumes it.
    pub fn clone_with_auto_booting_answer_file(
        &self,
        answer: &AnswerFile,
        dest: Option<&Path>,
        read_tolerance: f64,
        reader: &dyn ReadImage,
        writer: &dyn WriteImage,
    ) -> Result<OpticalImage> {
        if answer.kind() != self.installer.answer_kind() {
            bail!(
                "{} installers take a {} answer file, not {}",
                self.installer,
                self.installer.answer_kind(),
                answer.kind()
            );
        }

        let mut modifications = vec![Modification::from_string(
            self.installer.answer_file_path(),
            answer.serialize(),
        )];
        modifications.extend(self.installer.modifications_for(answer, &self.image, reader)?);

        info!(
            installer = %self.installer,
            answer_file = self.installer.answer_file_path(),
            modifications = modifications.len(),
            "Preparing auto-booting installer image"
        );
        Ok(clone_with_modifications(
            &self.image,
            &modifications,
            dest,
            &self.installer.clone_options(read_tolerance),
            reader,
            writer,
        )?)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::{cell::RefCell, collections::BTreeMap, fs, path::Path};

    use isoprep_image::{
        BootMetadata, Listing, Modification, OpticalImage, ReadImage, ReadOptions, WriteImage,
        WriteOptions,
    };

    /// Serves a fixed listing. Files contain their own path unless given
    /// other content.
    pub struct FakeReader {
        pub files: Vec<String>,
        pub contents: BTreeMap<String, String>,
        pub boot: Option<BootMetadata>,
    }

    impl FakeReader {
        pub fn new(files: &[&str]) -> Self {
            Self {
                files: files.iter().map(|f| f.to_string()).collect(),
                contents: BTreeMap::new(),
                boot: None,
            }
        }

        pub fn with_content(mut self, path: &str, content: &str) -> Self {
            self.contents.insert(path.to_string(), content.to_string());
            self
        }
    }

    impl ReadImage for FakeReader {
        fn list_entries(
            &self,
            _: &OpticalImage,
            _: &ReadOptions,
        ) -> isoprep_image::Result<Listing> {
            let mut listing = Listing {
                files: self.files.clone(),
                ..Default::default()
            };
            listing.normalize();
            Ok(listing)
        }

        fn extract(
            &self,
            _: &OpticalImage,
            path_on_image: &str,
            dest: &Path,
            _: &ReadOptions,
        ) -> isoprep_image::Result<()> {
            let content = self
                .contents
                .get(path_on_image)
                .map_or(path_on_image, String::as_str);
            fs::write(dest, content)?;
            Ok(())
        }

        fn boot_metadata(&self, _: &OpticalImage) -> isoprep_image::Result<Option<BootMetadata>> {
            Ok(self.boot)
        }
    }

    /// Records the staging tree as it looked when the image was written.
    #[derive(Default)]
    pub struct RecordingWriter {
        pub seen: RefCell<Vec<(String, String)>>,
        pub options: RefCell<Option<WriteOptions>>,
    }

    impl WriteImage for RecordingWriter {
        fn write(
            &self,
            staging: &Path,
            dest: &Path,
            options: &WriteOptions,
        ) -> isoprep_image::Result<()> {
            for entry in walkdir::WalkDir::new(staging).sort_by_file_name() {
                let entry = entry.unwrap();
                if entry.file_type().is_file() {
                    let relative = entry
                        .path()
                        .strip_prefix(staging)
                        .unwrap()
                        .to_string_lossy()
                        .to_string();
                    let content = String::from_utf8_lossy(&fs::read(entry.path())?).to_string();
                    self.seen.borrow_mut().push((relative, content));
                }
            }
            *self.options.borrow_mut() = Some(options.clone());
            fs::write(dest, b"image")?;
            Ok(())
        }
    }

    /// Apply modifications to a scratch tree seeded with `files`.
    pub fn apply_all(
        files: &[(&str, &str)],
        modifications: &[Modification],
    ) -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        for (path, content) in files {
            let target = tmp.path().join(path);
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::write(target, content).unwrap();
        }
        for modification in modifications {
            modification.apply(tmp.path()).unwrap();
        }
        tmp
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{fixtures::*, *};
    use crate::answer::{Kickstart, KickstartDialect, templates};

    #[test]
    fn test_insert_label_before_first_match() {
        let tmp = apply_all(
            &[("txt.cfg", "default install\nlabel install\n  kernel a\nlabel install\n")],
            &[insert_label_before("txt.cfg", "install", "label x\n  append $1")],
        );
        assert_eq!(
            fs::read_to_string(tmp.path().join("txt.cfg")).unwrap(),
            "default install\nlabel x\n  append $1\nlabel install\n  kernel a\nlabel install\n"
        );
    }

    #[test]
    fn test_insert_label_without_anchor_fails() {
        let tmp = apply_all(&[("txt.cfg", "default live\nlabel live\n")], &[]);
        let result = insert_label_before("txt.cfg", "install", "label x").apply(tmp.path());

        assert!(matches!(result, Err(isoprep_image::Error::NoMatch { .. })));
        assert_eq!(
            fs::read_to_string(tmp.path().join("txt.cfg")).unwrap(),
            "default live\nlabel live\n"
        );
    }

    #[test]
    fn test_set_isolinux_timeout() {
        let tmp = apply_all(
            &[("isolinux.cfg", "default vesamenu.c32\ntimeout 600\nlabel a\nTIMEOUT 0")],
            &set_isolinux_timeout("isolinux.cfg"),
        );
        assert_eq!(
            fs::read_to_string(tmp.path().join("isolinux.cfg")).unwrap(),
            "timeout 50\ndefault vesamenu.c32\nlabel a\n"
        );
    }

    #[test]
    fn test_set_isolinux_timeout_when_absent() {
        let tmp = apply_all(
            &[("isolinux.cfg", "default vesamenu.c32\nlabel linux\n")],
            &set_isolinux_timeout("isolinux.cfg"),
        );
        assert_eq!(
            fs::read_to_string(tmp.path().join("isolinux.cfg")).unwrap(),
            "timeout 50\ndefault vesamenu.c32\nlabel linux\n"
        );
    }

    #[test]
    fn test_image_kind_is_checked() {
        let tmp = tempfile::tempdir().unwrap();
        let image = OpticalImage::new(tmp.path().join("install.img")).unwrap();
        assert!(InstallerImage::new(image, EnterpriseLinux::default().into()).is_err());
    }

    #[test_log::test]
    fn test_clone_with_auto_booting_answer_file() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("centos.iso");
        fs::write(&source, b"source").unwrap();

        let reader = FakeReader::new(&["isolinux/isolinux.cfg", "isolinux/vmlinuz"])
            .with_content("isolinux/isolinux.cfg", "timeout 600\nlabel linux\n  kernel vmlinuz\n");
        let writer = RecordingWriter::default();
        let image =
            InstallerImage::new(OpticalImage::new(&source).unwrap(), EnterpriseLinux::default().into())
                .unwrap();

        let answer: AnswerFile = Kickstart::parse(
            templates::ENTERPRISE_LINUX_KICKSTART,
            KickstartDialect::EnterpriseLinux,
        )
        .into();
        let dest = tmp.path().join("out.iso");
        let cloned = image
            .clone_with_auto_booting_answer_file(&answer, Some(&dest), 0.0, &reader, &writer)
            .unwrap();

        assert_eq!(cloned.path(), dest);
        let seen = writer.seen.borrow();
        let answer_on_image = seen
            .iter()
            .find(|(path, _)| path == "isolinux/ks-custom.cfg")
            .unwrap();
        assert_eq!(answer_on_image.1, answer.serialize());
        let (_, cfg) = seen
            .iter()
            .find(|(path, _)| path == "isolinux/isolinux.cfg")
            .unwrap();
        assert!(cfg.starts_with("timeout 50\n"));
        assert!(cfg.contains("label ks-custom\n"));
        assert!(writer.options.borrow().as_ref().unwrap().el_torito.is_some());
    }

    #[test]
    fn test_answer_kind_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("win.iso");
        fs::write(&source, b"source").unwrap();

        let image =
            InstallerImage::new(OpticalImage::new(&source).unwrap(), Windows::default().into())
                .unwrap();
        let answer: AnswerFile = Kickstart::parse(
            templates::ENTERPRISE_LINUX_KICKSTART,
            KickstartDialect::EnterpriseLinux,
        )
        .into();

        let result = image.clone_with_auto_booting_answer_file(
            &answer,
            None,
            0.0,
            &FakeReader::new(&[]),
            &RecordingWriter::default(),
        );
        assert!(result.is_err());
    }
}
