use std::path::PathBuf;

/// Failures of the optical-image layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The caller asked for something impossible; nothing was changed.
    #[error("{0}")]
    BadInput(String),

    /// Too many files could not be extracted from the source image.
    #[error(
        "failed to extract {failed} of {attempted} files from the source image (tolerance {tolerance})"
    )]
    ReadDefect {
        failed: usize,
        attempted: usize,
        tolerance: f64,
    },

    /// The image writer exited non-zero or complained on stderr.
    #[error("image writer failed ({status}): {stderr}")]
    WriteFailure { status: String, stderr: String },

    /// A path a modification depends on does not exist.
    #[error("not found: {}", .0.display())]
    Missing(PathBuf),

    /// A pattern that must match found nothing in the file.
    #[error("no match for {pattern:?} in {}", .path.display())]
    NoMatch { path: PathBuf, pattern: String },

    /// A step reported success without producing its output.
    #[error("{0}")]
    PostCondition(String),

    #[error("missing required host tools:\n{0}")]
    ToolNotFound(String),

    /// Any other helper process that exited non-zero.
    #[error("{program} failed ({status}): {message}")]
    Helper {
        program: String,
        status: String,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Regex(#[from] regex::Error),

    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
