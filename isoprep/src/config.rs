use std::{
    fmt::Display,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumIter};
use tracing::debug;
use validator::Validate;

use crate::{
    answer::{
        AnswerContent, AnswerFile, Kickstart, KickstartDialect, Preseed, Unattend, templates,
        unattend::WindowsArch,
    },
    installer::{
        Installer,
        enterprise_linux::EnterpriseLinux,
        ubuntu_kickstart::UbuntuKickstart,
        ubuntu_preseed::UbuntuPreseed,
        windows::{Channel, Windows, WindowsEdition},
    },
    network::NetworkConfigStatic,
};

/// Base name of build configuration files.
pub const CONFIG_NAME: &str = "isoprep";

/// Location of a build configuration file, by format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigPath {
    Json(PathBuf),
    Ron(PathBuf),
    Toml(PathBuf),
    Yaml(PathBuf),
}

impl ConfigPath {
    /// Check for a build configuration file in the given directory.
    pub fn from_dir(path: impl AsRef<Path>) -> Option<ConfigPath> {
        let path = path.as_ref();

        if path.join("isoprep.toml").exists() {
            return Some(ConfigPath::Toml(path.join("isoprep.toml")));
        }

        if path.join("isoprep.yaml").exists() {
            return Some(ConfigPath::Yaml(path.join("isoprep.yaml")));
        } else if path.join("isoprep.yml").exists() {
            return Some(ConfigPath::Yaml(path.join("isoprep.yml")));
        }

        if path.join("isoprep.json").exists() {
            return Some(ConfigPath::Json(path.join("isoprep.json")));
        }

        if path.join("isoprep.ron").exists() {
            return Some(ConfigPath::Ron(path.join("isoprep.ron")));
        }

        None
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Json(path) | Self::Ron(path) | Self::Toml(path) | Self::Yaml(path) => path,
        }
    }

    /// Read and validate the configuration.
    pub fn load(&self) -> Result<BuildConfig> {
        let text = fs::read_to_string(self.path())
            .with_context(|| format!("reading {self}"))?;

        let config: BuildConfig = match &self {
            Self::Json(_) => serde_json::from_str(&text)?,
            Self::Ron(_) => ron::from_str(&text)?,
            Self::Toml(_) => toml::from_str(&text)?,
            Self::Yaml(_) => serde_yaml::from_str(&text)?,
        };
        config.validate()?;

        debug!(config = %self, distro = %config.distro, "Loaded build configuration");
        Ok(config)
    }
}

impl Display for ConfigPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path().display())
    }
}

/// Installer media family of the source image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, StrumDisplay, EnumIter)]
pub enum Distro {
    EnterpriseLinux,
    UbuntuKickstart,
    UbuntuPreseed,
    Windows,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct User {
    #[validate(length(min = 1, max = 32))]
    pub name: String,

    pub password: String,

    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct StaticIp {
    /// Interface name; Linux only
    #[serde(default)]
    pub device: Option<String>,

    /// Interface MAC address; required for Windows
    #[serde(default)]
    pub mac: Option<String>,

    pub ipv4: String,

    #[serde(default)]
    pub netmask: Option<String>,

    #[serde(default)]
    pub gateway: Option<String>,

    #[serde(default)]
    pub nameservers: Option<Vec<String>>,
}

impl StaticIp {
    pub fn network(&self) -> Result<NetworkConfigStatic> {
        Ok(NetworkConfigStatic::new(
            self.device.as_deref(),
            &self.ipv4,
            self.netmask.as_deref(),
            self.gateway.as_deref(),
            self.nameservers.as_deref(),
        )?)
    }
}

/// Settings only Windows Setup understands.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
pub struct WindowsConfig {
    /// Edition to select in `sources/ei.cfg`, e.g. `Professional`
    #[serde(default)]
    pub edition: Option<String>,

    #[serde(default)]
    pub channel: Channel,

    #[serde(default)]
    pub volume_license: bool,

    #[serde(default)]
    #[validate(length(equal = 29))]
    pub product_key: Option<String>,

    #[serde(default)]
    pub architecture: Option<WindowsArch>,

    #[serde(default)]
    pub locale: Option<String>,

    #[serde(default)]
    pub organization: Option<String>,

    #[serde(default)]
    pub owner: Option<String>,

    /// Number of automatic logons of the first user
    #[serde(default)]
    pub auto_logon: Option<u32>,

    #[serde(default)]
    pub first_logon_commands: Vec<String>,
}

/// Describes one installer image build.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct BuildConfig {
    /// Upstream installer image
    pub source: PathBuf,

    #[serde(default)]
    pub output: Option<PathBuf>,

    pub distro: Distro,

    /// Highest tolerated ratio of unreadable files on the source
    #[serde(default)]
    #[validate(range(min = 0.0, max = 1.0))]
    pub read_tolerance: f64,

    /// Answer file to start from instead of the built-in one
    #[serde(default)]
    pub template: Option<PathBuf>,

    #[serde(default)]
    #[validate(length(min = 1, max = 63))]
    pub hostname: Option<String>,

    #[serde(default)]
    pub root_password: Option<String>,

    #[serde(default)]
    #[validate(nested)]
    pub users: Vec<User>,

    #[serde(default)]
    pub packages: Vec<String>,

    #[serde(default)]
    pub remove_packages: Vec<String>,

    #[serde(default)]
    #[validate(nested)]
    pub static_ip: Option<StaticIp>,

    #[serde(default)]
    pub dhcp_devices: Vec<String>,

    #[serde(default)]
    #[validate(range(min = 0, max = 100))]
    pub swappiness: Option<i64>,

    #[serde(default)]
    pub graphical_login: bool,

    #[serde(default)]
    pub late_commands: Vec<String>,

    #[serde(default)]
    #[validate(nested)]
    pub windows: Option<WindowsConfig>,
}

/// Resolve `path` against the context directory. Home-relative and
/// absolute paths are kept.
pub fn resolve_path(context: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || path.starts_with("~") {
        path.to_path_buf()
    } else {
        context.join(path)
    }
}

impl BuildConfig {
    pub fn installer(&self) -> Installer {
        match self.distro {
            Distro::EnterpriseLinux => EnterpriseLinux::default().into(),
            Distro::UbuntuKickstart => UbuntuKickstart::default().into(),
            Distro::UbuntuPreseed => UbuntuPreseed.into(),
            Distro::Windows => Windows {
                edition: self
                    .windows
                    .as_ref()
                    .and_then(|windows| {
                        windows.edition.as_ref().map(|edition_id| WindowsEdition {
                            edition_id: edition_id.clone(),
                            channel: windows.channel,
                            volume_license: windows.volume_license,
                        })
                    }),
            }
            .into(),
        }
    }

    fn template_text(&self, context: &Path) -> Result<String> {
        match &self.template {
            Some(template) => {
                let path = resolve_path(context, template);
                fs::read_to_string(&path)
                    .with_context(|| format!("reading template {}", path.display()))
            }
            None => Ok(match self.distro {
                Distro::EnterpriseLinux => templates::ENTERPRISE_LINUX_KICKSTART,
                Distro::UbuntuKickstart => templates::UBUNTU_KICKSTART,
                Distro::UbuntuPreseed => templates::UBUNTU_PRESEED,
                Distro::Windows => templates::WINDOWS_AUTOUNATTEND,
            }
            .to_string()),
        }
    }

    /// Build the answer file this configuration describes.
    pub fn answer_file(&self, context: &Path) -> Result<AnswerFile> {
        let text = self.template_text(context)?;
        let mut answer: AnswerFile = match self.distro {
            Distro::EnterpriseLinux => {
                Kickstart::parse(&text, KickstartDialect::EnterpriseLinux).into()
            }
            Distro::UbuntuKickstart => Kickstart::parse(&text, KickstartDialect::Ubuntu).into(),
            Distro::UbuntuPreseed => Preseed::parse(&text).into(),
            Distro::Windows => Unattend::parse(&text)?.into(),
        };

        if let Some(hostname) = &self.hostname {
            answer.replace_hostname(hostname)?;
        }
        if let Some(password) = &self.root_password {
            answer.set_root_password(password)?;
        }
        for user in &self.users {
            answer
                .add_user(&user.name, &user.password, user.full_name.as_deref())
                .with_context(|| format!("adding user {}", user.name))?;
        }

        match &mut answer {
            AnswerFile::Kickstart(kickstart) => self.apply_kickstart(kickstart)?,
            AnswerFile::Preseed(preseed) => self.apply_preseed(preseed)?,
            AnswerFile::Unattend(unattend) => self.apply_unattend(unattend)?,
        }
        Ok(answer)
    }

    fn apply_kickstart(&self, kickstart: &mut Kickstart) -> Result<()> {
        if self.windows.is_some() {
            bail!("windows settings require distro Windows");
        }
        for package in &self.packages {
            kickstart.add_package(package)?;
        }
        for package in &self.remove_packages {
            kickstart.remove_package(package)?;
        }
        if let Some(static_ip) = &self.static_ip {
            kickstart.replace_static_ip(&static_ip.network()?)?;
        }
        for device in &self.dhcp_devices {
            kickstart.add_network_configuration_with_dhcp(device)?;
        }
        if let Some(swappiness) = self.swappiness {
            kickstart.set_swappiness(swappiness)?;
        }
        if self.graphical_login {
            kickstart.activate_graphical_login()?;
        }
        if !self.late_commands.is_empty() {
            kickstart.add_post_script(&self.late_commands.join("\n"))?;
        }
        Ok(())
    }

    fn apply_preseed(&self, preseed: &mut Preseed) -> Result<()> {
        if self.windows.is_some() {
            bail!("windows settings require distro Windows");
        }
        if self.graphical_login {
            bail!("graphical_login is only supported by kickstart installers");
        }
        for package in &self.packages {
            preseed.add_package(package)?;
        }
        for package in &self.remove_packages {
            preseed.remove_package(package);
        }
        if let Some(static_ip) = &self.static_ip {
            preseed.add_network_configuration_static(&static_ip.network()?);
        }
        for device in &self.dhcp_devices {
            preseed.add_network_configuration_with_dhcp(device);
        }
        if let Some(swappiness) = self.swappiness {
            preseed.set_swappiness(swappiness)?;
        }
        for command in &self.late_commands {
            preseed.add_late_command(command);
        }
        Ok(())
    }

    fn apply_unattend(&self, unattend: &mut Unattend) -> Result<()> {
        let unsupported = [
            ("packages", !self.packages.is_empty() || !self.remove_packages.is_empty()),
            ("dhcp_devices", !self.dhcp_devices.is_empty()),
            ("swappiness", self.swappiness.is_some()),
            ("graphical_login", self.graphical_login),
            ("late_commands", !self.late_commands.is_empty()),
        ];
        if let Some((name, _)) = unsupported.iter().find(|(_, set)| *set) {
            bail!("{name} is not supported for Windows; use windows.first_logon_commands");
        }

        if let Some(static_ip) = &self.static_ip {
            let Some(mac) = &static_ip.mac else {
                bail!("static_ip.mac is required for Windows");
            };
            unattend.add_network_configuration_static(mac, &static_ip.network()?)?;
        }

        let Some(windows) = &self.windows else {
            return Ok(());
        };
        if let Some(architecture) = windows.architecture {
            unattend.set_architecture(architecture);
        }
        if let Some(locale) = &windows.locale {
            unattend.set_locale(locale);
        }
        if let Some(organization) = &windows.organization {
            unattend.set_organization(organization);
        }
        if let Some(owner) = &windows.owner {
            unattend.set_registered_owner(owner);
        }
        if let Some(key) = &windows.product_key {
            unattend.set_product_key(key);
        }
        if let Some(count) = windows.auto_logon {
            let Some(user) = self.users.first() else {
                bail!("windows.auto_logon needs at least one user");
            };
            unattend.enable_auto_logon(&user.name, &user.password, count);
        }
        for (order, command) in windows.first_logon_commands.iter().enumerate() {
            unattend.add_first_logon_command(order as u32 + 1, command, command)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::InstallerRecipe;

    const TOML: &str = r#"
source = "CentOS-7-x86_64-DVD.iso"
distro = "EnterpriseLinux"
hostname = "build-1"
root_password = "root"
packages = ["@base", "vim-enhanced"]
swappiness = 10

[[users]]
name = "ops"
password = "ops"
full_name = "Operations"

[static_ip]
ipv4 = "10.1.2.3"
"#;

    #[test]
    fn test_from_dir_prefers_toml() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(ConfigPath::from_dir(tmp.path()), None);

        fs::write(tmp.path().join("isoprep.yml"), "").unwrap();
        assert!(matches!(ConfigPath::from_dir(tmp.path()), Some(ConfigPath::Yaml(_))));

        fs::write(tmp.path().join("isoprep.toml"), TOML).unwrap();
        assert!(matches!(ConfigPath::from_dir(tmp.path()), Some(ConfigPath::Toml(_))));
    }

    #[test_log::test]
    fn test_kickstart_build() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("isoprep.toml"), TOML).unwrap();

        let config = ConfigPath::from_dir(tmp.path()).unwrap().load().unwrap();
        assert_eq!(config.distro, Distro::EnterpriseLinux);
        assert_eq!(
            resolve_path(tmp.path(), &config.source),
            tmp.path().join("CentOS-7-x86_64-DVD.iso")
        );

        let text = config.answer_file(tmp.path()).unwrap().serialize();
        assert!(text.contains("--hostname=build-1"));
        assert!(text.contains("--ip=10.1.2.3"));
        assert!(text.contains("vim-enhanced\n"));
        assert!(text.contains("user --name=ops"));
        assert!(text.contains("vm.swappiness"));
        assert!(text.contains("rootpw --iscrypted $1$isoprep1$"));
        assert_eq!(config.installer().answer_file_path(), "isolinux/ks-custom.cfg");
    }

    #[test]
    fn test_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("isoprep.json");
        fs::write(
            &path,
            r#"{"source": "a.iso", "distro": "UbuntuPreseed", "swappiness": 101}"#,
        )
        .unwrap();
        assert!(ConfigPath::Json(path.clone()).load().is_err());

        fs::write(
            &path,
            r#"{"source": "a.iso", "distro": "UbuntuPreseed", "read_tolerance": 1.5}"#,
        )
        .unwrap();
        assert!(ConfigPath::Json(path).load().is_err());
    }

    #[test]
    fn test_windows_build() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("isoprep.yaml");
        fs::write(
            &path,
            r#"
source: /srv/media/Win10_22H2_English_x64.iso
distro: Windows
hostname: DESKTOP-1
users:
  - name: admin
    password: hunter2
windows:
  edition: Professional
  channel: OEM
  locale: en-GB
  auto_logon: 2
  first_logon_commands:
    - cmd /c echo first
    - cmd /c echo second
"#,
        )
        .unwrap();

        let config = ConfigPath::Yaml(path).load().unwrap();
        let text = config.answer_file(tmp.path()).unwrap().serialize();
        assert!(text.contains("<ComputerName>DESKTOP-1</ComputerName>"));
        assert!(text.contains("<UILanguage>en-GB</UILanguage>"));
        assert!(text.contains("<LogonCount>2</LogonCount>"));
        assert!(text.find("echo first").unwrap() < text.find("echo second").unwrap());
        assert!(!text.contains("hunter2"));

        match config.installer() {
            Installer::Windows(windows) => {
                let edition = windows.edition.unwrap();
                assert_eq!(edition.channel, Channel::Oem);
                assert_eq!(edition.edition_id, "Professional");
            }
            other => panic!("unexpected installer {other}"),
        }
    }

    #[test]
    fn test_windows_rejects_linux_settings() {
        let config: BuildConfig = serde_json::from_str(
            r#"{"source": "w.iso", "distro": "Windows", "packages": ["vim"]}"#,
        )
        .unwrap();
        assert!(config.answer_file(Path::new(".")).is_err());
    }

    #[test]
    fn test_preseed_build_from_ron() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("isoprep.ron");
        fs::write(
            &path,
            r#"(
    source: "ubuntu-16.04-desktop-amd64.iso",
    distro: UbuntuPreseed,
    hostname: Some("desk"),
    users: [(name: "ubuntu", password: "ubuntu")],
    packages: ["git"],
    late_commands: ["echo done"],
)"#,
        )
        .unwrap();

        let config = ConfigPath::Ron(path).load().unwrap();
        let text = config.answer_file(tmp.path()).unwrap().serialize();
        assert!(text.contains("netcfg/get_hostname string desk"));
        assert!(text.contains("passwd/username string ubuntu"));
        assert!(text.contains("git"));
        assert!(text.contains("echo done"));
    }
}
