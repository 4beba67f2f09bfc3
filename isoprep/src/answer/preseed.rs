//! Debconf preseed files: `owner name type value` records.

use std::{ops::Range, sync::LazyLock};

use regex::Regex;

use super::{AnswerContent, AnswerError, Result};
use crate::{network::NetworkConfigStatic, password::PasswordHash};

/// Where the first-boot script lives on the image.
pub const FIRST_TIME_START_ON_IMAGE: &str = "preseed/first-time-start";

const FIRST_TIME_START_SERVICE: &str = "isoprep-first-time-start";

static RECORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A[ \t]*(\S+)[ \t]+(\S+)[ \t]+(\S+)(?:[ \t]+(.*?))?\s*\z").unwrap()
});

/// One logical record, possibly continued over several lines with `\`.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Record {
    range: Range<usize>,
    owner: String,
    name: String,
    kind: String,
    value: String,
}

fn records(text: &str) -> Vec<Record> {
    let mut records = Vec::new();
    let mut offset = 0;
    let mut lines = text.split_inclusive('\n');

    while let Some(line) = lines.next() {
        let start = offset;
        offset += line.len();
        let mut logical = line.to_string();

        while logical.trim_end().ends_with('\\') {
            match lines.next() {
                Some(next) => {
                    offset += next.len();
                    logical.push_str(next);
                }
                None => break,
            }
        }

        let trimmed = logical.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(captures) = RECORD.captures(&logical) {
            records.push(Record {
                range: start..offset,
                owner: captures[1].to_string(),
                name: captures[2].to_string(),
                kind: captures[3].to_string(),
                value: captures
                    .get(4)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
            });
        }
    }
    records
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// A parsed preseed file plus the optional first-boot script that travels
/// with it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Preseed {
    text: String,
    first_time_start: Vec<String>,
}

impl Preseed {
    pub fn parse(text: &str) -> Self {
        Self {
            text: text.to_string(),
            first_time_start: Vec::new(),
        }
    }

    fn find(&self, owner: &str, name: &str, kind: Option<&str>) -> Option<Record> {
        records(&self.text).into_iter().find(|r| {
            r.owner == owner && r.name == name && kind.is_none_or(|kind| r.kind == kind)
        })
    }

    fn push_record(&mut self, record: &str) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        self.text.push_str(record);
        self.text.push('\n');
    }

    /// Value of the first record with this owner and name.
    pub fn value(&self, owner: &str, name: &str) -> Option<String> {
        self.find(owner, name, None).map(|r| r.value)
    }

    /// Rewrite the value of the first `(owner, name, type)` record, or
    /// append a new record.
    pub fn set_preseed_value(&mut self, owner: &str, name: &str, kind: &str, value: &str) {
        let record = format!("{owner} {name} {kind} {value}");
        match self.find(owner, name, Some(kind)) {
            Some(existing) => self
                .text
                .replace_range(existing.range, &format!("{record}\n")),
            None => self.push_record(&record),
        }
    }

    /// Remove every record with this owner and name.
    pub fn remove_preseed_value(&mut self, owner: &str, name: &str) {
        let mut matching: Vec<Range<usize>> = records(&self.text)
            .into_iter()
            .filter(|r| r.owner == owner && r.name == name)
            .map(|r| r.range)
            .collect();
        matching.reverse();
        for range in matching {
            self.text.replace_range(range, "");
        }
    }

    /// Append a shell command to a multi-command record such as
    /// `preseed/late_command`, joined by ` ; \` and a line break.
    pub fn add_preseed_command_line(&mut self, owner: &str, name: &str, command: &str) {
        match self.find(owner, name, None) {
            Some(existing) if existing.value.is_empty() => {
                let record = format!("{owner} {name} {} {command}\n", existing.kind);
                self.text.replace_range(existing.range, &record);
            }
            Some(existing) => {
                let record = format!(
                    "{} ; \\\n  {command}\n",
                    self.text[existing.range.clone()].trim_end()
                );
                self.text.replace_range(existing.range, &record);
            }
            None => self.push_record(&format!("{owner} {name} string {command}")),
        }
    }

    /// The record holding commands run at the end of installation. Ubiquity
    /// reads `ubiquity/success_command`; everything else the late command.
    pub fn late_command_key(&self) -> (&'static str, &'static str) {
        if self
            .find("ubiquity", "ubiquity/success_command", None)
            .is_some()
        {
            ("ubiquity", "ubiquity/success_command")
        } else {
            ("d-i", "preseed/late_command")
        }
    }

    pub fn add_late_command(&mut self, command: &str) {
        let (owner, name) = self.late_command_key();
        self.add_preseed_command_line(owner, name, command);
    }

    pub fn replace_hostname(&mut self, hostname: &str) -> Result<()> {
        if hostname.is_empty() || hostname.chars().any(char::is_whitespace) {
            return Err(AnswerError::BadInput(format!(
                "{hostname:?} is not a valid hostname"
            )));
        }
        self.set_preseed_value("d-i", "netcfg/get_hostname", "string", hostname);
        self.set_preseed_value("d-i", "netcfg/hostname", "string", hostname);
        Ok(())
    }

    pub fn set_root_password(&mut self, password: &str) -> Result<()> {
        let hash = PasswordHash::new(password)?;
        self.remove_preseed_value("d-i", "passwd/root-password");
        self.remove_preseed_value("d-i", "passwd/root-password-again");
        self.set_preseed_value("d-i", "passwd/root-login", "boolean", "true");
        self.set_preseed_value("d-i", "passwd/root-password-crypted", "password", hash.as_str());
        Ok(())
    }

    /// The installer creates a single user; further users are added by the
    /// late command.
    pub fn add_user(&mut self, name: &str, password: &str, full_name: Option<&str>) -> Result<()> {
        let hash = PasswordHash::new(password)?;
        let full_name = full_name.unwrap_or(name);

        match self.value("d-i", "passwd/username") {
            Some(existing) if !existing.is_empty() && existing != name => {
                self.add_late_command(&format!(
                    "chroot /target useradd -m -s /bin/bash -p {} -c {} {}",
                    shell_quote(hash.as_str()),
                    shell_quote(full_name),
                    shell_quote(name)
                ));
                self.add_late_command(&format!(
                    "chroot /target usermod -aG sudo {}",
                    shell_quote(name)
                ));
            }
            _ => {
                self.remove_preseed_value("d-i", "passwd/user-password");
                self.remove_preseed_value("d-i", "passwd/user-password-again");
                self.set_preseed_value("d-i", "passwd/user-fullname", "string", full_name);
                self.set_preseed_value("d-i", "passwd/username", "string", name);
                self.set_preseed_value(
                    "d-i",
                    "passwd/user-password-crypted",
                    "password",
                    hash.as_str(),
                );
            }
        }
        Ok(())
    }

    pub fn packages(&self) -> Vec<String> {
        self.value("d-i", "pkgsel/include")
            .map(|v| v.split_whitespace().map(String::from).collect())
            .unwrap_or_default()
    }

    pub fn add_package(&mut self, package: &str) -> Result<()> {
        if package.is_empty() || package.chars().any(char::is_whitespace) {
            return Err(AnswerError::BadInput(format!(
                "{package:?} is not a package name"
            )));
        }
        let mut packages = self.packages();
        if !packages.iter().any(|p| p == package) {
            packages.push(package.to_string());
            self.set_preseed_value("d-i", "pkgsel/include", "string", &packages.join(" "));
        }
        Ok(())
    }

    pub fn remove_package(&mut self, package: &str) {
        let mut packages = self.packages();
        let before = packages.len();
        packages.retain(|p| p != package);
        if packages.len() != before {
            self.set_preseed_value("d-i", "pkgsel/include", "string", &packages.join(" "));
        }
    }

    fn append_interfaces(&mut self, lines: &[String]) {
        for line in lines {
            self.add_late_command(&format!(
                "echo {} >> /target/etc/network/interfaces",
                shell_quote(line)
            ));
        }
    }

    /// Append an interfaces(5) stanza with a static address for the device.
    pub fn add_network_configuration_static(&mut self, config: &NetworkConfigStatic) {
        let mut lines = vec![
            format!("auto {}", config.device),
            format!("iface {} inet static", config.device),
            format!("  address {}", config.ipv4),
            format!("  netmask {}", config.netmask),
            format!("  gateway {}", config.gateway),
        ];
        if !config.nameservers.is_empty() {
            lines.push(format!("  dns-nameservers {}", config.nameservers_joined(" ")));
        }
        self.append_interfaces(&lines);
    }

    pub fn add_network_configuration_with_dhcp(&mut self, device: &str) {
        self.append_interfaces(&[format!("auto {device}"), format!("iface {device} inet dhcp")]);
    }

    pub fn set_swappiness(&mut self, swappiness: i64) -> Result<()> {
        if !(0..=100).contains(&swappiness) {
            return Err(AnswerError::BadInput(format!(
                "swappiness {swappiness} is not within 0..=100"
            )));
        }
        self.add_late_command(r"sed -i '/^vm\.swappiness/d' /target/etc/sysctl.conf");
        self.add_late_command(&format!(
            "echo 'vm.swappiness = {swappiness}' >> /target/etc/sysctl.conf"
        ));
        Ok(())
    }

    /// Run `command` once, on the first boot of the installed system.
    ///
    /// The first call also makes the late command install the script.
    pub fn add_first_time_start_command(&mut self, command: &str) {
        if self.first_time_start.is_empty() {
            let init = format!("/target/etc/init.d/{FIRST_TIME_START_SERVICE}");
            self.add_late_command(&format!("cp /cdrom/{FIRST_TIME_START_ON_IMAGE} {init}"));
            self.add_late_command(&format!("chmod 755 {init}"));
            self.add_late_command(&format!(
                "chroot /target update-rc.d {FIRST_TIME_START_SERVICE} defaults"
            ));
        }
        self.first_time_start.push(command.to_string());
    }

    /// The first-boot script, when any command was added.
    pub fn first_time_start_script(&self) -> Option<String> {
        if self.first_time_start.is_empty() {
            return None;
        }

        let mut script = format!(
            "#!/bin/sh\n\
             ### BEGIN INIT INFO\n\
             # Provides:          {FIRST_TIME_START_SERVICE}\n\
             # Required-Start:    $all\n\
             # Required-Stop:\n\
             # Default-Start:     2 3 4 5\n\
             # Default-Stop:\n\
             # Short-Description: Run once on first boot\n\
             ### END INIT INFO\n\
             [ \"$1\" = start ] || exit 0\n"
        );
        for command in &self.first_time_start {
            script.push_str(command);
            script.push('\n');
        }
        script.push_str(&format!(
            "update-rc.d -f {FIRST_TIME_START_SERVICE} remove\n\
             rm -f /etc/init.d/{FIRST_TIME_START_SERVICE}\n"
        ));
        Some(script)
    }
}

impl AnswerContent for Preseed {
    fn serialize(&self) -> String {
        self.text.clone()
    }

    fn replace_hostname(&mut self, hostname: &str) -> Result<()> {
        Preseed::replace_hostname(self, hostname)
    }

    fn set_root_password(&mut self, password: &str) -> Result<()> {
        Preseed::set_root_password(self, password)
    }

    fn add_user(&mut self, name: &str, password: &str, full_name: Option<&str>) -> Result<()> {
        Preseed::add_user(self, name, password, full_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = "\
# Unattended desktop install
d-i debian-installer/locale string en_US
d-i pkgsel/update-policy select unattended-upgrades
d-i pkgsel/include string openssh-server
ubiquity ubiquity/success_command string \\
  in-target apt-get -y update
ubiquity ubiquity/reboot boolean true
";

    #[test]
    fn test_set_preseed_value_rewrites_in_place() {
        let mut seed = Preseed::parse(SEED);
        seed.set_preseed_value("d-i", "pkgsel/update-policy", "select", "none");
        seed.set_preseed_value("d-i", "pkgsel/update-policy", "select", "none");

        let text = seed.serialize();
        assert_eq!(text.matches("pkgsel/update-policy").count(), 1);
        assert!(text.contains("\nd-i pkgsel/update-policy select none\nd-i pkgsel/include"));
    }

    #[test]
    fn test_set_preseed_value_appends() {
        let mut seed = Preseed::parse("d-i a/b string c");
        seed.set_preseed_value("d-i", "x/y", "boolean", "true");
        assert_eq!(seed.serialize(), "d-i a/b string c\nd-i x/y boolean true\n");
    }

    #[test]
    fn test_continued_record_is_one_value() {
        let seed = Preseed::parse(SEED);
        assert_eq!(
            seed.value("ubiquity", "ubiquity/success_command").unwrap(),
            "\\\n  in-target apt-get -y update"
        );
        assert_eq!(seed.value("ubiquity", "ubiquity/reboot").unwrap(), "true");
    }

    #[test]
    fn test_add_preseed_command_line_accumulates() {
        let mut seed = Preseed::parse(SEED);
        for _ in 0..3 {
            seed.add_preseed_command_line("ubiquity", "ubiquity/success_command", "echo hi");
        }

        let text = seed.serialize();
        assert_eq!(text.matches(" ; \\\n  echo hi").count(), 3);
        assert!(text.contains(
            "ubiquity ubiquity/success_command string \\\n  in-target apt-get -y update ; \\\n  echo hi ; \\\n  echo hi ; \\\n  echo hi\nubiquity ubiquity/reboot boolean true\n"
        ));
    }

    #[test]
    fn test_late_command_key() {
        assert_eq!(
            Preseed::parse(SEED).late_command_key(),
            ("ubiquity", "ubiquity/success_command")
        );

        let mut seed = Preseed::parse("d-i a/b string c\n");
        assert_eq!(seed.late_command_key(), ("d-i", "preseed/late_command"));
        seed.add_late_command("true");
        seed.add_late_command("false");
        assert!(seed
            .serialize()
            .ends_with("d-i preseed/late_command string true ; \\\n  false\n"));
    }

    #[test]
    fn test_hostname_is_idempotent() {
        let mut seed = Preseed::parse(SEED);
        seed.replace_hostname("host-1").unwrap();
        let once = seed.serialize();
        seed.replace_hostname("host-1").unwrap();
        assert_eq!(seed.serialize(), once);
        assert_eq!(seed.value("d-i", "netcfg/get_hostname").unwrap(), "host-1");
    }

    #[test]
    fn test_packages() {
        let mut seed = Preseed::parse(SEED);
        seed.add_package("vim").unwrap();
        seed.add_package("vim").unwrap();
        assert_eq!(seed.packages(), vec!["openssh-server", "vim"]);

        seed.remove_package("openssh-server");
        assert_eq!(seed.packages(), vec!["vim"]);
        assert!(seed.add_package("two words").is_err());
    }

    #[test]
    fn test_root_password() {
        let mut seed = Preseed::parse("d-i passwd/root-password password x\nd-i passwd/root-password-again password x\n");
        seed.set_root_password("$1$a$b").unwrap();
        assert_eq!(
            seed.serialize(),
            "d-i passwd/root-login boolean true\nd-i passwd/root-password-crypted password $1$a$b\n"
        );
    }

    #[test]
    fn test_second_user_goes_to_late_command() {
        let mut seed = Preseed::parse(SEED);
        seed.add_user("joe", "$1$a$b", Some("Joe")).unwrap();
        seed.add_user("joe", "$1$a$c", Some("Joe")).unwrap();
        assert_eq!(seed.value("d-i", "passwd/username").unwrap(), "joe");
        assert_eq!(
            seed.value("d-i", "passwd/user-password-crypted").unwrap(),
            "$1$a$c"
        );

        seed.add_user("ann", "$1$a$d", None).unwrap();
        let late = seed.value("ubiquity", "ubiquity/success_command").unwrap();
        assert!(late.contains("chroot /target useradd -m -s /bin/bash -p '$1$a$d' -c 'ann' 'ann'"));
    }

    #[test]
    fn test_static_network_stanza() {
        let mut seed = Preseed::parse(SEED);
        let config = NetworkConfigStatic::new(None, "10.0.0.2", None, None, None).unwrap();
        seed.add_network_configuration_static(&config);

        let late = seed.value("ubiquity", "ubiquity/success_command").unwrap();
        assert!(late.contains("echo 'iface eth0 inet static' >> /target/etc/network/interfaces"));
        assert!(late.contains("echo '  gateway 10.0.0.1' >> /target/etc/network/interfaces"));
        assert!(late.contains("echo '  dns-nameservers 10.0.0.1' >> /target/etc/network/interfaces"));
    }

    #[test]
    fn test_swappiness_bounds() {
        let mut seed = Preseed::parse(SEED);
        assert!(seed.set_swappiness(200).is_err());
        assert_eq!(seed.serialize(), SEED);
        seed.set_swappiness(5).unwrap();
        assert!(seed.serialize().contains("echo 'vm.swappiness = 5' >> /target/etc/sysctl.conf"));
    }

    #[test]
    fn test_first_time_start() {
        let mut seed = Preseed::parse(SEED);
        assert_eq!(seed.first_time_start_script(), None);

        seed.add_first_time_start_command("touch /var/first");
        seed.add_first_time_start_command("touch /var/second");

        let late = seed.value("ubiquity", "ubiquity/success_command").unwrap();
        assert_eq!(late.matches("update-rc.d isoprep-first-time-start defaults").count(), 1);

        let script = seed.first_time_start_script().unwrap();
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("touch /var/first\ntouch /var/second\n"));
    }
}
