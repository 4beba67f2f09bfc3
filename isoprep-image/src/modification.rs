//! Typed mutations applied to a staging tree before it is repacked.

use std::{
    fs::{self, File},
    io::{Read, Seek, SeekFrom},
    path::{Component, Path, PathBuf},
};

use regex::Regex;
use strum::Display;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// How text is encoded into bytes on the image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display)]
pub enum TextEncoding {
    #[default]
    Utf8,
    /// Little-endian UTF-16 with a byte order mark
    Utf16Le,
}

impl TextEncoding {
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Utf16Le => {
                let mut bytes = vec![0xFF, 0xFE];
                for unit in text.encode_utf16() {
                    bytes.extend_from_slice(&unit.to_le_bytes());
                }
                bytes
            }
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self {
            TextEncoding::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::BadInput(String::from("file is not valid UTF-8"))),
            TextEncoding::Utf16Le => {
                let bytes = bytes.strip_prefix(&[0xFF, 0xFE]).unwrap_or(bytes);
                if bytes.len() % 2 != 0 {
                    return Err(Error::BadInput(String::from(
                        "file is not valid UTF-16: odd length",
                    )));
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16(&units)
                    .map_err(|_| Error::BadInput(String::from("file is not valid UTF-16")))
            }
        }
    }
}

/// One mutation of a staging tree.
///
/// `path_on_image` is always relative to the staging root; a leading slash
/// is ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Modification {
    /// Write a string to a file.
    FromString {
        path_on_image: String,
        content: String,
        encoding: TextEncoding,
    },

    /// Copy a host file to a file, or a host directory to a directory.
    /// Symlinks inside copied directories are preserved.
    FromPath {
        path_on_image: String,
        path_on_host: PathBuf,
    },

    /// Regex replacement over the whole content of a file. The replacement
    /// may reference capture groups as `$1` or `${name}`.
    ByRegex {
        path_on_image: String,
        pattern: String,
        replacement: String,
        encoding: TextEncoding,

        /// Fail with [`Error::NoMatch`] instead of leaving the file as is
        required: bool,
    },

    /// Copy the bytes `start..end` of a host file.
    FromByteRange {
        path_on_image: String,
        path_on_host: PathBuf,
        start: u64,
        end: u64,
    },
}

impl Modification {
    pub fn from_string(path_on_image: impl Into<String>, content: impl Into<String>) -> Self {
        Self::FromString {
            path_on_image: path_on_image.into(),
            content: content.into(),
            encoding: TextEncoding::Utf8,
        }
    }

    pub fn from_path(path_on_image: impl Into<String>, path_on_host: impl Into<PathBuf>) -> Self {
        Self::FromPath {
            path_on_image: path_on_image.into(),
            path_on_host: path_on_host.into(),
        }
    }

    pub fn by_regex(
        path_on_image: impl Into<String>,
        pattern: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        Self::ByRegex {
            path_on_image: path_on_image.into(),
            pattern: pattern.into(),
            replacement: replacement.into(),
            encoding: TextEncoding::Utf8,
            required: false,
        }
    }

    /// Make a [`Modification::ByRegex`] fail when its pattern does not
    /// match. Other variants are returned unchanged.
    pub fn require_match(mut self) -> Self {
        if let Self::ByRegex { required, .. } = &mut self {
            *required = true;
        }
        self
    }

    pub fn from_byte_range(
        path_on_image: impl Into<String>,
        path_on_host: impl Into<PathBuf>,
        start: u64,
        end: u64,
    ) -> Self {
        Self::FromByteRange {
            path_on_image: path_on_image.into(),
            path_on_host: path_on_host.into(),
            start,
            end,
        }
    }

    pub fn path_on_image(&self) -> &str {
        match self {
            Self::FromString { path_on_image, .. }
            | Self::FromPath { path_on_image, .. }
            | Self::ByRegex { path_on_image, .. }
            | Self::FromByteRange { path_on_image, .. } => path_on_image,
        }
    }

    /// Apply this modification to the staging tree at `root`.
    pub fn apply(&self, root: &Path) -> Result<()> {
        let target = resolve(root, self.path_on_image())?;
        debug!(modification = %self.describe(), target = %target.display(), "Applying modification");

        match self {
            Self::FromString {
                content, encoding, ..
            } => {
                prepare_file_target(&target)?;
                fs::write(&target, encoding.encode(content))?;
            }
            Self::FromPath { path_on_host, .. } => {
                let metadata = fs::symlink_metadata(path_on_host)
                    .map_err(|_| Error::Missing(path_on_host.clone()))?;
                if metadata.is_dir() {
                    if let Ok(existing) = fs::symlink_metadata(&target) {
                        if existing.is_dir() {
                            fs::remove_dir_all(&target)?;
                        } else {
                            fs::remove_file(&target)?;
                        }
                    }
                    copy_tree(path_on_host, &target)?;
                } else {
                    prepare_file_target(&target)?;
                    fs::copy(path_on_host, &target)?;
                }
            }
            Self::ByRegex {
                pattern,
                replacement,
                encoding,
                required,
                ..
            } => {
                let regex = Regex::new(pattern)?;
                if !target.is_file() {
                    return Err(Error::Missing(target));
                }
                let text = encoding.decode(&fs::read(&target)?)?;
                if *required && !regex.is_match(&text) {
                    return Err(Error::NoMatch {
                        path: target,
                        pattern: pattern.clone(),
                    });
                }
                let replaced = regex.replace_all(&text, replacement.as_str()).into_owned();
                prepare_file_target(&target)?;
                fs::write(&target, encoding.encode(&replaced))?;
            }
            Self::FromByteRange {
                path_on_host,
                start,
                end,
                ..
            } => {
                if end < start {
                    return Err(Error::BadInput(format!(
                        "byte range {start}..{end} is reversed"
                    )));
                }
                let mut source =
                    File::open(path_on_host).map_err(|_| Error::Missing(path_on_host.clone()))?;
                if *end > source.metadata()?.len() {
                    return Err(Error::BadInput(format!(
                        "{} ends before byte {end}",
                        path_on_host.display()
                    )));
                }
                source.seek(SeekFrom::Start(*start))?;

                let len = end - start;
                let mut bytes = Vec::with_capacity(len as usize);
                source.take(len).read_to_end(&mut bytes)?;
                if bytes.len() as u64 != len {
                    return Err(Error::PostCondition(format!(
                        "read {} of {len} bytes from {}",
                        bytes.len(),
                        path_on_host.display()
                    )));
                }

                prepare_file_target(&target)?;
                fs::write(&target, bytes)?;
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        match self {
            Self::FromString { content, .. } => format!("from string ({} chars)", content.len()),
            Self::FromPath { path_on_host, .. } => {
                format!("from path {}", path_on_host.display())
            }
            Self::ByRegex { pattern, .. } => format!("by regex {pattern:?}"),
            Self::FromByteRange {
                path_on_host,
                start,
                end,
                ..
            } => format!("from bytes {start}..{end} of {}", path_on_host.display()),
        }
    }
}

/// Resolve an image path below the staging root.
pub fn resolve(root: &Path, path_on_image: &str) -> Result<PathBuf> {
    let relative = Path::new(path_on_image.trim_start_matches('/'));
    let mut resolved = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => {
                return Err(Error::BadInput(format!(
                    "{path_on_image} is not a path below the image root"
                )));
            }
        }
    }
    if resolved == root {
        return Err(Error::BadInput(format!(
            "{path_on_image:?} does not name an entry on the image"
        )));
    }
    Ok(resolved)
}

/// Make room for a file at `target`: parents exist, any prior file is gone,
/// and a prior directory is an error.
fn prepare_file_target(target: &Path) -> Result<()> {
    match fs::symlink_metadata(target) {
        Ok(existing) if existing.is_dir() => {
            return Err(Error::BadInput(format!(
                "{} is a directory and cannot be replaced by a file",
                target.display()
            )));
        }
        Ok(_) => fs::remove_file(target)?,
        Err(_) => {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}

/// Recursively copy a directory, preserving symlinks.
fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::BadInput(e.to_string()))?;
        let target = dest.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_string_creates_parents() {
        let tmp = tempfile::tempdir().unwrap();
        Modification::from_string("a/b.txt", "hi")
            .apply(tmp.path())
            .unwrap();
        assert_eq!(fs::read(tmp.path().join("a/b.txt")).unwrap(), b"hi");
    }

    #[test]
    fn test_leading_slash_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        Modification::from_string("/isolinux/lang", "en\n")
            .apply(tmp.path())
            .unwrap();
        assert_eq!(
            fs::read_to_string(tmp.path().join("isolinux/lang")).unwrap(),
            "en\n"
        );
    }

    #[test]
    fn test_parent_components_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let result = Modification::from_string("../escape", "x").apply(tmp.path());
        assert!(matches!(result, Err(Error::BadInput(_))));
        assert!(!tmp.path().parent().unwrap().join("escape").exists());
    }

    #[test]
    fn test_from_string_replaces_file_but_not_directory() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("file"), "old").unwrap();
        fs::create_dir(tmp.path().join("dir")).unwrap();

        Modification::from_string("file", "new")
            .apply(tmp.path())
            .unwrap();
        assert_eq!(fs::read_to_string(tmp.path().join("file")).unwrap(), "new");

        let result = Modification::from_string("dir", "new").apply(tmp.path());
        assert!(matches!(result, Err(Error::BadInput(_))));
        assert!(tmp.path().join("dir").is_dir());
    }

    #[test]
    fn test_utf16_encoding() {
        let tmp = tempfile::tempdir().unwrap();
        Modification::FromString {
            path_on_image: String::from("u.txt"),
            content: String::from("A"),
            encoding: TextEncoding::Utf16Le,
        }
        .apply(tmp.path())
        .unwrap();
        assert_eq!(
            fs::read(tmp.path().join("u.txt")).unwrap(),
            vec![0xFF, 0xFE, 0x41, 0x00]
        );
        assert_eq!(
            TextEncoding::Utf16Le
                .decode(&[0xFF, 0xFE, 0x41, 0x00])
                .unwrap(),
            "A"
        );
    }

    #[test]
    fn test_by_regex_with_capture_groups() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("isolinux.cfg"),
            "default vesamenu.c32\ntimeout 600\n",
        )
        .unwrap();

        Modification::by_regex("isolinux.cfg", r"(?m)^(timeout\s+)\d+", "${1}50")
            .apply(tmp.path())
            .unwrap();
        assert_eq!(
            fs::read_to_string(tmp.path().join("isolinux.cfg")).unwrap(),
            "default vesamenu.c32\ntimeout 50\n"
        );
    }

    #[test]
    fn test_by_regex_required_match() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("txt.cfg"), "default live
label live
").unwrap();

        let optional = Modification::by_regex("txt.cfg", r"(?m)^label install\b", "x");
        optional.apply(tmp.path()).unwrap();

        let result = optional.require_match().apply(tmp.path());
        assert!(matches!(result, Err(Error::NoMatch { .. })));
        assert_eq!(
            fs::read_to_string(tmp.path().join("txt.cfg")).unwrap(),
            "default live\nlabel live\n"
        );

        Modification::by_regex("txt.cfg", r"(?m)^label live\b", "label x")
            .require_match()
            .apply(tmp.path())
            .unwrap();
        assert_eq!(
            fs::read_to_string(tmp.path().join("txt.cfg")).unwrap(),
            "default live\nlabel x\n"
        );
    }

    #[test]
    fn test_by_regex_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let result = Modification::by_regex("nope.cfg", "a", "b").apply(tmp.path());
        assert!(matches!(result, Err(Error::Missing(_))));
    }

    #[test]
    fn test_by_regex_invalid_pattern() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("f"), "x").unwrap();
        let result = Modification::by_regex("f", "(", "b").apply(tmp.path());
        assert!(matches!(result, Err(Error::Regex(_))));
    }

    #[test]
    fn test_from_path_directory_replaces_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let host = tmp.path().join("host");
        let stage = tmp.path().join("stage");
        fs::create_dir_all(host.join("sub")).unwrap();
        fs::write(host.join("sub/new.txt"), "new").unwrap();
        std::os::unix::fs::symlink("sub/new.txt", host.join("link")).unwrap();
        fs::create_dir_all(stage.join("payload")).unwrap();
        fs::write(stage.join("payload/stale.txt"), "stale").unwrap();

        Modification::from_path("payload", &host)
            .apply(&stage)
            .unwrap();

        assert!(!stage.join("payload/stale.txt").exists());
        assert_eq!(
            fs::read_to_string(stage.join("payload/sub/new.txt")).unwrap(),
            "new"
        );
        assert_eq!(
            fs::read_link(stage.join("payload/link")).unwrap(),
            PathBuf::from("sub/new.txt")
        );
    }

    #[test]
    fn test_from_path_file_refuses_directory_target() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("host.txt"), "x").unwrap();
        fs::create_dir(tmp.path().join("stage")).unwrap();
        fs::create_dir(tmp.path().join("stage/target")).unwrap();

        let result = Modification::from_path("target", tmp.path().join("host.txt"))
            .apply(&tmp.path().join("stage"));
        assert!(matches!(result, Err(Error::BadInput(_))));
    }

    #[test]
    fn test_from_byte_range() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("source.iso");
        let bytes: Vec<u8> = (0..=255u8).cycle().take(8192).collect();
        fs::write(&source, &bytes).unwrap();
        fs::create_dir(tmp.path().join("stage")).unwrap();

        Modification::from_byte_range("boot.bin", &source, 2048, 4096)
            .apply(&tmp.path().join("stage"))
            .unwrap();
        assert_eq!(
            fs::read(tmp.path().join("stage/boot.bin")).unwrap(),
            &bytes[2048..4096]
        );

        let result = Modification::from_byte_range("short.bin", &source, 4096, 9000)
            .apply(&tmp.path().join("stage"));
        assert!(matches!(result, Err(Error::BadInput(_))));
        assert!(!tmp.path().join("stage/short.bin").exists());

        // A range far past the end fails before anything is read
        let result = Modification::from_byte_range("huge.bin", &source, 0, u64::MAX)
            .apply(&tmp.path().join("stage"));
        assert!(matches!(result, Err(Error::BadInput(_))));
    }
}
