//! Locating the external helpers on the host before any work starts.

use std::path::PathBuf;

use tracing::debug;

use crate::{
    error::{Error, Result},
    reader::HelperReader,
    writer::HelperWriter,
};

/// Locate a program on `PATH`.
pub fn find_tool(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Helpers used to read and write images.
#[derive(Clone, Debug)]
pub struct Toolchain {
    pub reader: HelperReader,
    pub writer: HelperWriter,
}

impl Toolchain {
    /// Find every helper, reporting all missing ones at once.
    ///
    /// `7z` is only required when `need_udf` is set; otherwise it is picked
    /// up opportunistically.
    pub fn detect(need_udf: bool) -> Result<Self> {
        let mut missing = Vec::new();

        let isoinfo = find_tool("isoinfo");
        if isoinfo.is_none() {
            missing.push(("isoinfo", "genisoimage"));
        }

        let sevenzip = find_tool("7z").or_else(|| find_tool("7za"));
        if sevenzip.is_none() && need_udf {
            missing.push(("7z", "p7zip"));
        }

        let writer = find_tool("genisoimage").or_else(|| find_tool("mkisofs"));
        if writer.is_none() {
            missing.push(("genisoimage", "genisoimage"));
        }

        match (isoinfo, writer) {
            (Some(isoinfo), Some(writer)) if missing.is_empty() => {
                debug!(isoinfo = %isoinfo.display(), sevenzip = ?sevenzip, writer = %writer.display(), "Found host tools");
                Ok(Self {
                    reader: HelperReader { isoinfo, sevenzip },
                    writer: HelperWriter { program: writer },
                })
            }
            _ => Err(Error::ToolNotFound(
                missing
                    .iter()
                    .map(|(tool, package)| format!("  {tool} (install: {package})"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )),
        }
    }
}
