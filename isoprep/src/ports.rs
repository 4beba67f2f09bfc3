//! The sidecar file describing how to reach a virtual machine installed from
//! a prepared image.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// An SSH endpoint of the installed system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshPort {
    #[serde(rename = "@ipaddress")]
    pub ipaddress: String,

    #[serde(rename = "@user")]
    pub user: String,

    #[serde(rename = "@pwd")]
    pub pwd: String,
}

/// How to shut the installed system down from the host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownPort {
    #[serde(rename = "@command")]
    pub command: String,

    #[serde(rename = "@user")]
    pub user: String,

    /// e.g. `ssh`
    #[serde(rename = "@protocol")]
    pub protocol: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmPorts {
    #[serde(default)]
    pub ssh: Vec<SshPort>,

    #[serde(default)]
    pub shutdown: Vec<ShutdownPort>,
}

impl VmPorts {
    pub fn to_xml(&self) -> Result<String> {
        Ok(quick_xml::se::to_string_with_root("ports", self)?)
    }

    pub fn from_xml(text: &str) -> Result<Self> {
        Ok(quick_xml::de::from_str(text)?)
    }
}

/// Paths belonging to one VMware machine, derived from its `.vmx` file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmDescriptor {
    pub vmx_path: PathBuf,
    pub directory: PathBuf,
    pub stem: String,
    pub ports_path: PathBuf,
}

impl VmDescriptor {
    pub fn new(vmx_path: impl AsRef<Path>) -> Result<Self> {
        let vmx_path = std::path::absolute(vmx_path.as_ref())?;
        let Some(directory) = vmx_path.parent().map(Path::to_path_buf) else {
            bail!("{} has no parent directory", vmx_path.display());
        };
        let Some(stem) = vmx_path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
            bail!("{} has no file name", vmx_path.display());
        };

        let ports_path = directory.join(format!("{stem}.ports"));
        Ok(Self {
            vmx_path,
            directory,
            stem,
            ports_path,
        })
    }

    /// The recorded ports, empty when none were saved yet.
    pub fn load_ports(&self) -> Result<VmPorts> {
        if !self.ports_path.exists() {
            return Ok(VmPorts::default());
        }
        let text = fs::read_to_string(&self.ports_path)
            .with_context(|| format!("reading {}", self.ports_path.display()))?;
        VmPorts::from_xml(&text).with_context(|| format!("parsing {}", self.ports_path.display()))
    }

    /// Replace the ports file. Readers never see a partial file.
    pub fn save_ports(&self, ports: &VmPorts) -> Result<()> {
        let mut file = tempfile::NamedTempFile::new_in(&self.directory)?;
        file.write_all(ports.to_xml()?.as_bytes())?;
        file.write_all(b"\n")?;
        file.persist(&self.ports_path)?;

        debug!(path = %self.ports_path.display(), ssh = ports.ssh.len(), shutdown = ports.shutdown.len(), "Saved ports");
        Ok(())
    }
}
