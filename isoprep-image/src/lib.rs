//! Reading, modifying, and writing optical installer images.
//!
//! Images are never mounted. Contents are extracted into a staging tree with
//! [`reader::ReadImage`], changed with [`modification::Modification`], and
//! repacked with [`writer::WriteImage`]. [`clone::clone_with_modifications`]
//! ties the three together.

use std::{
    fmt,
    fs,
    path::{Path, PathBuf},
};

use strum::{Display, EnumIter, IntoEnumIterator};

pub mod boot;
pub mod clone;
pub mod error;
pub mod modification;
pub mod preflight;
pub mod process;
pub mod reader;
pub mod writer;

pub use boot::BootMetadata;
pub use clone::{CloneOptions, clone_with_modifications};
pub use error::{Error, Result};
pub use modification::{Modification, TextEncoding};
pub use reader::{FsFormat, HelperReader, Listing, ReadImage, ReadOptions, Symlink};
pub use writer::{ElTorito, HelperWriter, WriteImage, WriteOptions};

/// Local time with microseconds, e.g. `20240131120000123456`.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S%6f").to_string()
}

/// Which filesystem an image is expected to carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumIter)]
pub enum ImageKind {
    Iso,
    Udf,
}

impl ImageKind {
    /// Accepted file extensions, lowercase.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            ImageKind::Iso => &["iso"],
            ImageKind::Udf => &["iso", "udf"],
        }
    }

    /// Guess the kind from a file extension. ISO wins when both accept it.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        ImageKind::iter().find(|kind| kind.extensions().contains(&extension.as_str()))
    }
}

/// An optical image file on the host, referenced by absolute path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OpticalImage {
    path: PathBuf,
}

impl OpticalImage {
    /// Reference an image. `~` is expanded and the result made absolute.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let expanded = match path.strip_prefix("~") {
            Ok(rest) => dirs::home_dir()
                .ok_or_else(|| Error::BadInput(String::from("home directory is unknown")))?
                .join(rest),
            Err(_) => path.to_path_buf(),
        };

        Ok(Self {
            path: std::path::absolute(expanded)?,
        })
    }

    /// Reference an image that must carry an extension of `kind`.
    pub fn with_kind(path: impl AsRef<Path>, kind: ImageKind) -> Result<Self> {
        let image = Self::new(path)?;
        image.require_kind(kind)?;
        Ok(image)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn require_kind(&self, kind: ImageKind) -> Result<()> {
        let extension = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        if kind.extensions().contains(&extension.as_str()) {
            Ok(())
        } else {
            Err(Error::BadInput(format!(
                "{} is not a {kind} image (expected extension {})",
                self,
                kind.extensions().join(" or ")
            )))
        }
    }

    pub fn remove(&self) -> Result<()> {
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

impl fmt::Display for OpticalImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl AsRef<Path> for OpticalImage {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_shape() {
        let stamp = timestamp();
        assert_eq!(stamp.len(), 20);
        assert!(stamp.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_relative_paths_become_absolute() {
        let image = OpticalImage::new("some/dir/disc.iso").unwrap();
        assert!(image.path().is_absolute());
        assert!(image.path().ends_with("some/dir/disc.iso"));
    }

    #[test]
    fn test_home_is_expanded() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let image = OpticalImage::new("~/disc.iso").unwrap();
        assert_eq!(image.path(), std::path::absolute(home.join("disc.iso")).unwrap());
    }

    #[test]
    fn test_image_kind_extensions() {
        assert!(OpticalImage::with_kind("/tmp/win.ISO", ImageKind::Udf).is_ok());
        assert!(OpticalImage::with_kind("/tmp/win.udf", ImageKind::Udf).is_ok());
        assert!(matches!(
            OpticalImage::with_kind("/tmp/win.udf", ImageKind::Iso),
            Err(Error::BadInput(_))
        ));
        assert!(matches!(
            OpticalImage::with_kind("/tmp/disc.img", ImageKind::Iso),
            Err(Error::BadInput(_))
        ));

        assert_eq!(ImageKind::from_path(Path::new("a.iso")), Some(ImageKind::Iso));
        assert_eq!(ImageKind::from_path(Path::new("a.udf")), Some(ImageKind::Udf));
        assert_eq!(ImageKind::from_path(Path::new("a")), None);
    }
}
