//! Clone a source image through a staging tree into a new image.

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use tracing::{debug, info, warn};

use crate::{
    OpticalImage,
    error::{Error, Result},
    modification::Modification,
    reader::{ReadImage, ReadOptions},
    timestamp,
    writer::{WriteImage, WriteOptions},
};

/// How a clone reads its source and writes its destination.
#[derive(Clone, Debug, Default)]
pub struct CloneOptions {
    pub read: ReadOptions,
    pub write: WriteOptions,

    /// Highest tolerated ratio of failed extractions to attempted ones.
    pub read_tolerance: f64,
}

/// Destination used when the caller does not name one: the source path with
/// a microsecond timestamp between stem and extension.
pub fn default_clone_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_default();

    let mut name = OsString::from(stem);
    name.push("-");
    name.push(timestamp());
    if let Some(extension) = source.extension() {
        name.push(".");
        name.push(extension);
    }
    source.with_file_name(name)
}

/// The sibling directory a clone to `dest` stages its content in.
pub fn staging_path(dest: &Path) -> PathBuf {
    let mut path = dest.as_os_str().to_os_string();
    path.push(".tmpdir");
    PathBuf::from(path)
}

/// Removes the staging directory when the clone finishes, however it ends.
struct StagingTree {
    path: PathBuf,
}

impl StagingTree {
    fn create(path: PathBuf) -> Result<Self> {
        fs::create_dir(&path).map_err(|error| match error.kind() {
            std::io::ErrorKind::AlreadyExists => Error::BadInput(format!(
                "staging directory {} already exists",
                path.display()
            )),
            _ => Error::Io(error),
        })?;
        Ok(Self { path })
    }
}

impl Drop for StagingTree {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), error = %error, "Failed to remove staging directory");
        }
    }
}

/// Copy `source` into a new image at `dest` (or a timestamped sibling of the
/// source), applying `modifications` in order on the way.
pub fn clone_with_modifications(
    source: &OpticalImage,
    modifications: &[Modification],
    dest: Option<&Path>,
    options: &CloneOptions,
    reader: &dyn ReadImage,
    writer: &dyn WriteImage,
) -> Result<OpticalImage> {
    if !(0.0..=1.0).contains(&options.read_tolerance) {
        return Err(Error::BadInput(format!(
            "read tolerance {} is not within 0..1",
            options.read_tolerance
        )));
    }
    if !source.exists() {
        return Err(Error::Missing(source.path().to_path_buf()));
    }

    let dest = match dest {
        Some(dest) => OpticalImage::new(dest)?,
        None => OpticalImage::new(default_clone_path(source.path()))?,
    };
    if fs::symlink_metadata(dest.path()).is_ok() {
        return Err(Error::BadInput(format!(
            "refusing to overwrite existing {}",
            dest
        )));
    }

    let started = Instant::now();
    info!(source = %source, dest = %dest, modifications = modifications.len(), "Cloning image");

    let staging = StagingTree::create(staging_path(dest.path()))?;
    extract_all(source, &staging.path, options, reader)?;

    for modification in modifications {
        modification.apply(&staging.path)?;
    }

    writer.write(&staging.path, dest.path(), &options.write)?;
    drop(staging);

    info!(dest = %dest, duration = ?started.elapsed(), "Cloned image");
    Ok(dest)
}

/// Explode every entry of `source` below `root`, honouring the tolerance.
fn extract_all(
    source: &OpticalImage,
    root: &Path,
    options: &CloneOptions,
    reader: &dyn ReadImage,
) -> Result<()> {
    let listing = reader.list_entries(source, &options.read)?;

    for directory in &listing.directories {
        fs::create_dir_all(root.join(directory))?;
    }
    for link in &listing.symlinks {
        std::os::unix::fs::symlink(&link.target, root.join(&link.path))?;
    }

    let mut failed = 0;
    for file in &listing.files {
        if let Err(error) = reader.extract(source, file, &root.join(file), &options.read) {
            warn!(file = %file, error = %error, "Could not extract file from source image");
            failed += 1;
        }
    }

    let attempted = listing.files.len();
    if failed == 0 {
        debug!(files = attempted, symlinks = listing.symlinks.len(), "Extracted source image");
        return Ok(());
    }

    let ratio = failed as f64 / attempted as f64;
    if ratio > options.read_tolerance {
        return Err(Error::ReadDefect {
            failed,
            attempted,
            tolerance: options.read_tolerance,
        });
    }
    warn!(
        failed,
        attempted,
        tolerance = options.read_tolerance,
        "Continuing despite files missing from the source image"
    );
    Ok(())
}
