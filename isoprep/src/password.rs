use std::fmt::Display;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use pwhash::unix;

use crate::answer::{AnswerError, Result};

/// Salt for every hash generated here. Fixed so that the same password
/// always produces the same answer file.
pub const SALT: &str = "isoprep1";

/// A password in the crypt(3) form expected by Linux installers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Hash `password` with MD5-crypt, unless it already looks like a crypt
    /// string (starts with `$`), in which case it is taken as is.
    ///
    /// The `$1$` prefix of the setting selects MD5-crypt.
    pub fn new(password: &str) -> Result<Self> {
        if password.starts_with('$') {
            return Ok(Self(password.to_string()));
        }

        unix::crypt(password, format!("$1${SALT}$").as_str())
            .map(Self)
            .map_err(|error| AnswerError::Password(error.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The obfuscation Windows Setup applies to passwords with
/// `PlainText=false`: base64 of the UTF-16LE bytes of the password followed
/// by the name of the element holding it.
pub fn windows_password(password: &str, element: &str) -> String {
    let bytes: Vec<u8> = format!("{password}{element}")
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    BASE64_STANDARD.encode(bytes)
}
