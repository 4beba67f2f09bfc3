//! Enumerating and extracting the contents of an optical image without
//! mounting it.

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::debug;

use crate::{
    OpticalImage,
    boot::BootMetadata,
    error::{Error, Result},
    process::Cmd,
};

/// Which directory structures of the image to read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum FsFormat {
    /// ISO-9660, preferring Rock Ridge names
    #[default]
    Iso9660,
    /// UDF, as found on Windows installer images
    Udf,
}

/// Options controlling how an image is read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    pub format: FsFormat,

    /// Ignore the Joliet namespace. Joliet names can be truncated or lossy
    /// and would take precedence over Rock Ridge names when enabled.
    pub ignore_joliet: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            format: FsFormat::Iso9660,
            ignore_joliet: true,
        }
    }
}

impl ReadOptions {
    pub fn udf() -> Self {
        Self {
            format: FsFormat::Udf,
            ignore_joliet: true,
        }
    }
}

/// A symbolic link on the image, recreated rather than extracted.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Symlink {
    pub path: String,

    /// Target exactly as recorded on the image, e.g. `.`
    pub target: String,
}

/// Directories, files and symlinks of an image as slash-separated relative
/// paths.
///
/// Directories are ordered parents before children.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Listing {
    pub directories: Vec<String>,
    pub files: Vec<String>,
    pub symlinks: Vec<Symlink>,
}

impl Listing {
    /// Add every missing ancestor directory and sort both lists.
    pub fn normalize(&mut self) {
        let mut directories: BTreeSet<String> = BTreeSet::new();
        let links = self.symlinks.iter().map(|link| &link.path);
        for path in self.directories.iter().chain(self.files.iter()).chain(links) {
            let mut ancestor = path.as_str();
            while let Some((parent, _)) = ancestor.rsplit_once('/') {
                directories.insert(parent.to_string());
                ancestor = parent;
            }
        }
        directories.extend(self.directories.drain(..));
        directories.remove("");

        self.directories = directories.into_iter().collect();
        self.directories
            .sort_by(|a, b| depth(a).cmp(&depth(b)).then_with(|| a.cmp(b)));

        self.files.sort();
        self.files.dedup();
        self.symlinks.sort();
        self.symlinks.dedup_by(|a, b| a.path == b.path);
    }
}

fn depth(path: &str) -> usize {
    path.matches('/').count()
}

/// Something that can enumerate and extract the contents of an image.
pub trait ReadImage {
    fn list_entries(&self, image: &OpticalImage, options: &ReadOptions) -> Result<Listing>;

    /// Copy one file out of the image verbatim.
    fn extract(
        &self,
        image: &OpticalImage,
        path_on_image: &str,
        dest: &Path,
        options: &ReadOptions,
    ) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let (program, cmd) = match options.format {
            FsFormat::Iso9660 => (
                "isoinfo",
                self.isoinfo(image, options)
                    .arg("-x")
                    .arg(format!("/{}", path_on_image.trim_start_matches('/'))),
            ),
            // Data goes to stdout; -bso0 and -bsp0 keep the banner and
            // progress off stderr
            FsFormat::Udf => (
                "7z",
                Cmd::new(self.sevenzip()?)
                    .args(["e", "-so", "-bso0", "-bsp0", "-tudf"])
                    .arg_path(image.path())
                    .arg(path_on_image.trim_start_matches('/')),
            ),
        };

        let result = cmd.run_to_file(dest).and_then(|output| {
            // Both helpers can exit zero after failing to transcribe an entry
            let stderr = output.stderr_str();
            match stderr.lines().find(|line| EXTRACT_ERROR.is_match(line)) {
                Some(line) => Err(Error::Helper {
                    program: program.to_string(),
                    status: output.status_string(),
                    message: format!("{path_on_image}: {}", line.trim()),
                }),
                None => {
                    if !stderr.trim().is_empty() {
                        debug!(program, path_on_image, stderr = %stderr.trim(), "Helper output while extracting");
                    }
                    Ok(())
                }
            }
        });

        if result.is_err() && dest.is_file() {
            fs::remove_file(dest)?;
        }
        result
    }

    fn boot_metadata(&self, image: &OpticalImage) -> Result<Option<BootMetadata>>;
}

/// Reads images with `isoinfo` (ISO-9660) and `7z` (UDF).
#[derive(Clone, Debug)]
pub struct HelperReader {
    pub isoinfo: PathBuf,
    pub sevenzip: Option<PathBuf>,
}

impl HelperReader {
    fn sevenzip(&self) -> Result<&Path> {
        self.sevenzip
            .as_deref()
            .ok_or_else(|| Error::ToolNotFound(String::from("  7z (install: p7zip)")))
    }

    fn isoinfo(&self, image: &OpticalImage, options: &ReadOptions) -> Cmd {
        let cmd = Cmd::new(&self.isoinfo)
            .arg("-i")
            .arg_path(image.path())
            .arg("-R");
        if options.ignore_joliet {
            cmd
        } else {
            cmd.arg("-J")
        }
    }
}

impl ReadImage for HelperReader {
    fn list_entries(&self, image: &OpticalImage, options: &ReadOptions) -> Result<Listing> {
        let mut listing = match options.format {
            FsFormat::Iso9660 => {
                let output = self
                    .isoinfo(image, options)
                    .arg("-l")
                    .error_msg(format!("isoinfo could not list {}", image))
                    .run()?;
                parse_isoinfo_listing(&output.stdout_str())
            }
            FsFormat::Udf => {
                let output = Cmd::new(self.sevenzip()?)
                    .args(["l", "-slt", "-tudf"])
                    .arg_path(image.path())
                    .error_msg(format!("7z could not list {}", image))
                    .run()?;
                parse_7z_listing(&output.stdout_str())
            }
        };
        listing.normalize();

        debug!(
            image = %image,
            directories = listing.directories.len(),
            files = listing.files.len(),
            symlinks = listing.symlinks.len(),
            "Listed image entries"
        );
        Ok(listing)
    }

    fn extract(
        &self,
        image: &OpticalImage,
        path_on_image: &str,
        dest: &Path,
        options: &ReadOptions,
    ) -> Result<()> {
        let (program, output) = match options.format {
            FsFormat::Iso9660 => (
                "isoinfo",
                self.isoinfo(image, options)
                    .arg("-x")
                    .arg(format!("/{}", path_on_image.trim_start_matches('/')))
                    .run()?,
            ),
            FsFormat::Udf => (
                "7z",
                Cmd::new(self.sevenzip()?)
                    .args(["e", "-so", "-tudf"])
                    .arg_path(image.path())
                    .arg(path_on_image.trim_start_matches('/'))
                    .run()?,
            ),
        };

        // A zero exit status does not guarantee the entry was transcribed
        if !output.stderr.is_empty() {
            return Err(Error::Helper {
                program: program.to_string(),
                status: output.status_string(),
                message: format!("{path_on_image}: {}", output.stderr_str().trim()),
            });
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, &output.stdout)?;
        Ok(())
    }

    fn boot_metadata(&self, image: &OpticalImage) -> Result<Option<BootMetadata>> {
        let output = Cmd::new(&self.isoinfo)
            .arg("-d")
            .arg("-i")
            .arg_path(image.path())
            .error_msg(format!("isoinfo could not read volume descriptors of {}", image))
            .run()?;

        let boot = BootMetadata::from_isoinfo(&output.stdout_str());
        debug!(image = %image, boot = ?boot, "Read El Torito boot metadata");
        Ok(boot)
    }
}

static LISTING_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Directory listing of (.*)$").unwrap());
static LISTING_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([dl-])[-rwxsStT]{9}\s.*\[\s*\d+\s+[0-9A-Fa-f]+\]\s\s(.*)$").unwrap()
});
static VERSION_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r";\d+$").unwrap());
static EXTRACT_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\berror\b|\bcannot\b|\bcan't\b|\bunable\b|\bfatal\b|\bno such\b)").unwrap()
});

/// Parse the output of `isoinfo -l`.
pub fn parse_isoinfo_listing(text: &str) -> Listing {
    let mut listing = Listing::default();
    let mut current = String::new();

    for line in text.lines() {
        if let Some(captures) = LISTING_HEADER.captures(line) {
            current = captures[1].trim_matches('/').to_string();
            continue;
        }

        let Some(captures) = LISTING_ENTRY.captures(line) else {
            continue;
        };
        let mut name = captures[2].trim_end();
        let mut target = None;
        if &captures[1] == "l" {
            if let Some((link, to)) = name.split_once(" -> ") {
                name = link;
                target = Some(to.to_string());
            }
        }
        if name == "." || name == ".." || name.is_empty() {
            continue;
        }
        let name = VERSION_SUFFIX.replace(name, "");

        let path = if current.is_empty() {
            name.to_string()
        } else {
            format!("{current}/{name}")
        };
        match (&captures[1], target) {
            ("d", _) => listing.directories.push(path),
            ("l", Some(target)) => listing.symlinks.push(Symlink { path, target }),
            _ => listing.files.push(path),
        }
    }
    listing
}

/// Parse the output of `7z l -slt`.
pub fn parse_7z_listing(text: &str) -> Listing {
    let mut listing = Listing::default();

    // Entries start after the archive header separator
    let Some((_, entries)) = text.split_once("\n----------\n") else {
        return listing;
    };

    let mut path: Option<&str> = None;
    let mut folder = false;
    let mut flush = |path: &mut Option<&str>, folder: &mut bool| {
        if let Some(p) = path.take() {
            let p = p.trim_matches('/').to_string();
            if !p.is_empty() {
                if *folder {
                    listing.directories.push(p);
                } else {
                    listing.files.push(p);
                }
            }
        }
        *folder = false;
    };

    for line in entries.lines() {
        if line.trim().is_empty() {
            flush(&mut path, &mut folder);
        } else if let Some(value) = line.strip_prefix("Path = ") {
            flush(&mut path, &mut folder);
            path = Some(value);
        } else if let Some(value) = line.strip_prefix("Folder = ") {
            folder = value.trim() == "+";
        } else if let Some(value) = line.strip_prefix("Attributes = ") {
            folder |= value.trim_start().starts_with('D');
        }
    }
    flush(&mut path, &mut folder);

    listing
}
