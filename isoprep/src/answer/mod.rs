//! In-memory models of unattended-installation answer files.
//!
//! Each flavor parses a whole file, offers semantic edits over its parsed
//! form and re-emits the whole file. Edits that set a single value are
//! idempotent; edits that append (packages, late commands) accumulate.

use enum_dispatch::enum_dispatch;

pub mod kickstart;
pub mod preseed;
pub mod unattend;
pub mod xml;

pub use kickstart::{Kickstart, KickstartDialect};
pub use preseed::Preseed;
pub use unattend::Unattend;

/// Answer files shipped with the binary, used when a build names no
/// template of its own.
pub mod templates {
    pub const ENTERPRISE_LINUX_KICKSTART: &str = include_str!("templates/el-kickstart.cfg");
    pub const UBUNTU_KICKSTART: &str = include_str!("templates/ubuntu-kickstart.cfg");
    pub const UBUNTU_PRESEED: &str = include_str!("templates/ubuntu-preseed.seed");
    pub const WINDOWS_AUTOUNATTEND: &str = include_str!("templates/autounattend.xml");
}

/// Failures of answer-file edits. No edit changes the model when it fails.
#[derive(Debug, thiserror::Error)]
pub enum AnswerError {
    /// A section, record or element the edit requires is absent.
    #[error("{0} not found in answer file")]
    Missing(String),

    #[error("{0}")]
    BadInput(String),

    #[error("malformed XML: {0}")]
    Xml(String),

    #[error("failed to hash password: {0}")]
    Password(String),
}

impl From<quick_xml::Error> for AnswerError {
    fn from(error: quick_xml::Error) -> Self {
        AnswerError::Xml(error.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for AnswerError {
    fn from(error: quick_xml::events::attributes::AttrError) -> Self {
        AnswerError::Xml(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AnswerError>;

/// Edits every answer-file flavor supports.
#[enum_dispatch(AnswerFile)]
pub trait AnswerContent {
    /// Render the whole file.
    fn serialize(&self) -> String;

    fn replace_hostname(&mut self, hostname: &str) -> Result<()>;

    /// Set the administrator password. Linux flavors store it hashed.
    fn set_root_password(&mut self, password: &str) -> Result<()>;

    /// Create an administrative user, replacing one of the same name.
    fn add_user(&mut self, name: &str, password: &str, full_name: Option<&str>) -> Result<()>;
}

/// An answer file of any flavor.
#[enum_dispatch]
#[derive(Clone, Debug)]
pub enum AnswerFile {
    Kickstart,
    Preseed,
    Unattend,
}

impl AnswerFile {
    pub fn kind(&self) -> &'static str {
        match self {
            AnswerFile::Kickstart(_) => "kickstart",
            AnswerFile::Preseed(_) => "preseed",
            AnswerFile::Unattend(_) => "autounattend",
        }
    }
}
