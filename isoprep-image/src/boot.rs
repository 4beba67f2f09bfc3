use std::{ops::Range, sync::LazyLock};

use regex::Regex;

/// Sector size of an optical image in bytes.
pub const SECTOR_SIZE: u64 = 2048;

static NSECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Nsect\s+([0-9A-Fa-f]+)").unwrap());
static BOOTOFF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Bootoff\s+([0-9A-Fa-f]+)").unwrap());

/// Location of the El Torito default boot image inside an optical image.
///
/// The boot image is treated as an opaque blob: `sector_count` sectors of
/// [`SECTOR_SIZE`] bytes starting at `boot_sector` are copied verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootMetadata {
    pub boot_sector: u64,
    pub sector_count: u64,
}

impl BootMetadata {
    /// Parse the El Torito section of `isoinfo -d` output.
    ///
    /// Both fields are printed in hexadecimal. Returns `None` when the image
    /// has no default boot entry.
    pub fn from_isoinfo(text: &str) -> Option<Self> {
        let hex = |re: &Regex| {
            re.captures(text)
                .and_then(|c| u64::from_str_radix(&c[1], 16).ok())
        };

        Some(Self {
            boot_sector: hex(&BOOTOFF)?,
            sector_count: hex(&NSECT)?,
        })
    }

    pub fn byte_offset(&self) -> u64 {
        self.boot_sector * SECTOR_SIZE
    }

    pub fn byte_len(&self) -> u64 {
        self.sector_count * SECTOR_SIZE
    }

    /// Half-open byte range of the boot image within the image file.
    pub fn byte_range(&self) -> Range<u64> {
        self.byte_offset()..self.byte_offset() + self.byte_len()
    }
}
