//! Kickstart files: a command section followed by `%`-delimited sections.

use strum::Display;
use tracing::debug;

use super::{AnswerContent, AnswerError, Result};
use crate::{network::NetworkConfigStatic, password::PasswordHash};

/// Which installer reads the kickstart. The dialects differ in how a few
/// commands are spelled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display)]
pub enum KickstartDialect {
    /// Anaconda (RHEL, CentOS, Fedora and relatives)
    #[default]
    EnterpriseLinux,
    /// The kickstart compatibility layer of the Ubuntu alternate installer
    Ubuntu,
}

/// One section of a kickstart file.
///
/// `text` holds whole lines including the `%` marker line, and ends with a
/// newline unless it is empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub text: String,
}

impl Section {
    fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    fn lines(&self) -> Vec<String> {
        self.text.split_inclusive('\n').map(String::from).collect()
    }

    fn set_lines(&mut self, lines: Vec<String>) {
        self.text = lines.concat();
    }

    fn push_line(&mut self, line: &str) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        self.text.push_str(line);
        self.text.push('\n');
    }

    /// Index of the line carrying the `%` marker.
    fn marker(&self) -> Option<usize> {
        self.lines().iter().position(|l| l.starts_with('%'))
    }
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn is_empty_comment(line: &str) -> bool {
    line.trim() == "#"
}

fn is_substantial(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && !line.starts_with('#')
}

fn is_command(line: &str, command: &str) -> bool {
    line.split_whitespace().next() == Some(command)
}

/// First token of a package line, which ends at whitespace or `#`.
fn package_token(line: &str) -> &str {
    line.trim_start()
        .split(|c: char| c.is_whitespace() || c == '#')
        .next()
        .unwrap_or("")
}

/// Split off the trailing lines that belong with the next section.
fn split_trailing(text: &mut String) -> String {
    let offset = {
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        lines
            .iter()
            .rposition(|l| is_substantial(l))
            .and_then(|last| {
                let tail = &lines[last + 1..];
                tail.iter()
                    .position(|l| is_blank(l))
                    .or_else(|| tail.iter().position(|l| is_empty_comment(l)))
                    .map(|k| lines[..last + 1 + k].iter().map(|l| l.len()).sum::<usize>())
            })
    };

    match offset {
        Some(offset) => text.split_off(offset),
        None => String::new(),
    }
}

/// A whitespace-tokenized command line such as `network --device=eth0`,
/// with any trailing `# comment` kept apart from the options.
#[derive(Clone, Debug, PartialEq, Eq)]
struct CommandLine {
    tokens: Vec<String>,
    comment: Option<String>,
}

impl CommandLine {
    fn parse(line: &str) -> Self {
        // A comment starts at a `#` beginning a token
        let start = line.char_indices().find_map(|(i, c)| {
            (c == '#' && (i == 0 || line[..i].ends_with(char::is_whitespace))).then_some(i)
        });
        let (body, comment) = match start {
            Some(i) => (&line[..i], Some(line[i..].trim_end().to_string())),
            None => (line, None),
        };

        Self {
            tokens: body.split_whitespace().map(String::from).collect(),
            comment,
        }
    }

    fn new(command: &str) -> Self {
        Self {
            tokens: vec![command.to_string()],
            comment: None,
        }
    }

    /// Position of an option and whether its value is the following token.
    fn find(&self, option: &str) -> Option<(usize, bool)> {
        let flag = format!("--{option}");
        self.tokens.iter().enumerate().find_map(|(i, token)| {
            if token.starts_with(&format!("{flag}=")) {
                Some((i, false))
            } else if *token == flag {
                let separate = self
                    .tokens
                    .get(i + 1)
                    .is_some_and(|next| !next.starts_with("--"));
                Some((i, separate))
            } else {
                None
            }
        })
    }

    fn option(&self, option: &str) -> Option<&str> {
        let (i, separate) = self.find(option)?;
        if separate {
            self.tokens.get(i + 1).map(String::as_str)
        } else {
            self.tokens[i].split_once('=').map(|(_, value)| value)
        }
    }

    fn set_option(&mut self, option: &str, value: &str) {
        match self.find(option) {
            Some((i, true)) => self.tokens[i + 1] = value.to_string(),
            Some((i, false)) => self.tokens[i] = format!("--{option}={value}"),
            None => self.tokens.push(format!("--{option}={value}")),
        }
    }

    fn remove_option(&mut self, option: &str) {
        if let Some((i, separate)) = self.find(option) {
            let count = if separate { 2 } else { 1 };
            self.tokens.drain(i..i + count);
        }
    }

    fn has_flag(&self, flag: &str) -> bool {
        self.find(flag).is_some()
    }

    fn render(&self) -> String {
        match &self.comment {
            Some(comment) => format!("{} {comment}\n", self.tokens.join(" ")),
            None => format!("{}\n", self.tokens.join(" ")),
        }
    }
}

/// Split `eth0` into `("eth", 0)`.
fn split_device(device: &str) -> Option<(&str, u32)> {
    let digits = device.len() - device.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    let (prefix, number) = device.split_at(device.len() - digits);
    number.parse().ok().map(|n| (prefix, n))
}

/// A parsed kickstart file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Kickstart {
    pub dialect: KickstartDialect,
    sections: Vec<Section>,
}

impl Kickstart {
    /// Parse kickstart text.
    ///
    /// Everything before the first line starting with `%` becomes the
    /// `command` section. Blank lines (or failing that a lone `#` line)
    /// trailing a section, together with everything after them, are moved to
    /// the start of the following section so that a comment block stays with
    /// the section it introduces.
    pub fn parse(text: &str, dialect: KickstartDialect) -> Self {
        let mut sections = vec![Section::new("command", "")];
        for line in text.split_inclusive('\n') {
            if let Some(rest) = line.strip_prefix('%') {
                let name = rest.split_whitespace().next().unwrap_or_default();
                sections.push(Section::new(name, ""));
            }
            if let Some(section) = sections.last_mut() {
                section.text.push_str(line);
            }
        }

        for i in 1..sections.len() {
            let moved = split_trailing(&mut sections[i - 1].text);
            sections[i].text.insert_str(0, &moved);
        }

        if let Some(last) = sections.last_mut() {
            if !last.text.is_empty() {
                last.text = format!("{}\n", last.text.trim_end_matches('\n'));
            }
        }

        Self { dialect, sections }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    fn section_mut(&mut self, name: &str) -> Result<&mut Section> {
        self.sections
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| AnswerError::Missing(format!("%{name} section")))
    }

    fn command_mut(&mut self) -> &mut Section {
        &mut self.sections[0]
    }

    /// Replace the `rootpw` command with a hashed password.
    pub fn replace_rootpw(&mut self, password: &str) -> Result<()> {
        let hash = PasswordHash::new(password)?;
        let command = self.command_mut();
        let mut lines = command.lines();
        let index = lines
            .iter()
            .position(|l| is_command(l, "rootpw"))
            .ok_or_else(|| AnswerError::Missing(String::from("rootpw command")))?;

        lines[index] = format!("rootpw --iscrypted {hash}\n");
        command.set_lines(lines);
        Ok(())
    }

    pub fn replace_hostname(&mut self, hostname: &str) -> Result<()> {
        if hostname.is_empty() || hostname.chars().any(char::is_whitespace) {
            return Err(AnswerError::BadInput(format!(
                "{hostname:?} is not a valid hostname"
            )));
        }

        match self.dialect {
            KickstartDialect::EnterpriseLinux => {
                let command = self.command_mut();
                let mut lines = command.lines();
                let networks: Vec<usize> = (0..lines.len())
                    .filter(|&i| is_command(&lines[i], "network"))
                    .collect();

                let with_hostname: Vec<usize> = networks
                    .iter()
                    .copied()
                    .filter(|&i| CommandLine::parse(&lines[i]).option("hostname").is_some())
                    .collect();

                let targets = match (with_hostname.is_empty(), networks.first()) {
                    (false, _) => with_hostname,
                    (true, Some(&first)) => vec![first],
                    (true, None) => {
                        let mut line = CommandLine::new("network");
                        line.set_option("hostname", hostname);
                        command.push_line(line.render().trim_end());
                        return Ok(());
                    }
                };
                for i in targets {
                    let mut line = CommandLine::parse(&lines[i]);
                    line.set_option("hostname", hostname);
                    lines[i] = line.render();
                }
                command.set_lines(lines);
            }
            KickstartDialect::Ubuntu => {
                let record = format!("preseed netcfg/get_hostname string {hostname}");
                let command = self.command_mut();
                let mut lines = command.lines();
                match lines.iter().position(|l| {
                    let mut tokens = l.split_whitespace();
                    tokens.next() == Some("preseed")
                        && tokens.next() == Some("netcfg/get_hostname")
                }) {
                    Some(i) => {
                        lines[i] = format!("{record}\n");
                        command.set_lines(lines);
                    }
                    None => command.push_line(&record),
                }
            }
        }
        Ok(())
    }

    /// Rewrite the static addressing options of the `network` command for
    /// the configured device (or the first `network` command).
    pub fn replace_static_ip(&mut self, config: &NetworkConfigStatic) -> Result<()> {
        let command = self.command_mut();
        let mut lines = command.lines();
        let networks: Vec<usize> = (0..lines.len())
            .filter(|&i| is_command(&lines[i], "network"))
            .collect();
        let target = networks
            .iter()
            .copied()
            .find(|&i| CommandLine::parse(&lines[i]).option("device") == Some(config.device.as_str()))
            .or_else(|| networks.first().copied());

        let mut line = match target {
            Some(i) => CommandLine::parse(&lines[i]),
            None => {
                let mut line = CommandLine::new("network");
                line.set_option("device", &config.device);
                line
            }
        };
        line.set_option("bootproto", "static");
        line.set_option("ip", &config.ipv4.to_string());
        line.set_option("netmask", &config.netmask.to_string());
        line.set_option("gateway", &config.gateway.to_string());
        if config.nameservers.is_empty() {
            line.remove_option("nameserver");
        } else {
            line.set_option("nameserver", &config.nameservers_joined(","));
        }

        match target {
            Some(i) => {
                lines[i] = line.render();
                command.set_lines(lines);
            }
            None => command.push_line(line.render().trim_end()),
        }
        Ok(())
    }

    /// Add a DHCP `network` command for `device`.
    ///
    /// When another `network` command already uses `device`, that and every
    /// higher-numbered device of the same family moves up one slot and the
    /// new command goes first, since the installer activates the device of
    /// the first `network` command.
    pub fn add_network_configuration_with_dhcp(&mut self, device: &str) -> Result<()> {
        let mut new_line = CommandLine::new("network");
        new_line.set_option("device", device);
        new_line.set_option("bootproto", "dhcp");

        let command = self.command_mut();
        let mut lines = command.lines();
        let networks: Vec<usize> = (0..lines.len())
            .filter(|&i| is_command(&lines[i], "network"))
            .collect();
        let conflict = networks
            .iter()
            .any(|&i| CommandLine::parse(&lines[i]).option("device") == Some(device));

        if !conflict {
            match networks.last() {
                Some(&last) => lines.insert(last + 1, new_line.render()),
                None => {
                    command.push_line(new_line.render().trim_end());
                    return Ok(());
                }
            }
            command.set_lines(lines);
            return Ok(());
        }

        let (prefix, slot) = split_device(device).ok_or_else(|| {
            AnswerError::BadInput(format!(
                "cannot renumber network devices around {device:?}"
            ))
        })?;
        for &i in &networks {
            let mut line = CommandLine::parse(&lines[i]);
            let renumbered = line
                .option("device")
                .and_then(split_device)
                .filter(|(p, n)| *p == prefix && *n >= slot)
                .map(|(p, n)| format!("{p}{}", n + 1));
            if let Some(renumbered) = renumbered {
                debug!(from = ?line.option("device"), to = %renumbered, "Renumbering network device");
                line.set_option("device", &renumbered);
                lines[i] = line.render();
            }
        }
        lines.insert(networks[0], new_line.render());
        command.set_lines(lines);
        Ok(())
    }

    pub fn packages(&self) -> Result<Vec<String>> {
        let section = self
            .section("packages")
            .ok_or_else(|| AnswerError::Missing(String::from("%packages section")))?;
        let marker = section.marker().unwrap_or(0);
        Ok(section
            .lines()
            .iter()
            .skip(marker + 1)
            .map(|l| package_token(l).to_string())
            .filter(|p| !p.is_empty())
            .collect())
    }

    /// Append a package unless it is already listed.
    pub fn add_package(&mut self, package: &str) -> Result<()> {
        if package_token(package) != package {
            return Err(AnswerError::BadInput(format!(
                "{package:?} is not a package name"
            )));
        }
        if self.packages()?.iter().any(|p| p == package) {
            return Ok(());
        }
        self.section_mut("packages")?.push_line(package);
        Ok(())
    }

    pub fn remove_package(&mut self, package: &str) -> Result<()> {
        let section = self.section_mut("packages")?;
        let marker = section.marker().unwrap_or(0);
        let lines = section
            .lines()
            .into_iter()
            .enumerate()
            .filter(|(i, l)| *i <= marker || package_token(l) != package)
            .map(|(_, l)| l)
            .collect();
        section.set_lines(lines);
        Ok(())
    }

    pub fn remove_all_packages(&mut self) -> Result<()> {
        let section = self.section_mut("packages")?;
        let marker = section.marker().unwrap_or(0);
        let mut lines = section.lines();
        lines.truncate(marker + 1);
        section.set_lines(lines);
        Ok(())
    }

    pub fn replace_all_packages(&mut self, packages: &[String]) -> Result<()> {
        self.remove_all_packages()?;
        for package in packages {
            self.add_package(package)?;
        }
        Ok(())
    }

    /// Add a user, replacing an existing `user` command for the same name.
    pub fn add_user(&mut self, name: &str, password: &str, full_name: Option<&str>) -> Result<()> {
        let hash = PasswordHash::new(password)?;
        let dialect = self.dialect;
        let record = match dialect {
            KickstartDialect::EnterpriseLinux => {
                let mut line = format!("user --name={name} --password={hash} --iscrypted");
                if let Some(full_name) = full_name {
                    line.push_str(&format!(" --gecos=\"{full_name}\""));
                }
                line
            }
            KickstartDialect::Ubuntu => format!(
                "user {name} --fullname \"{}\" --iscrypted --password {hash}",
                full_name.unwrap_or(name)
            ),
        };

        let command = self.command_mut();
        let mut lines = command.lines();
        let existing = lines.iter().position(|l| {
            is_command(l, "user")
                && match dialect {
                    KickstartDialect::EnterpriseLinux => {
                        CommandLine::parse(l).option("name") == Some(name)
                    }
                    // Only one user is supported; it is always replaced
                    KickstartDialect::Ubuntu => true,
                }
        });
        match existing {
            Some(i) => {
                lines[i] = format!("{record}\n");
                command.set_lines(lines);
            }
            None => command.push_line(&record),
        }
        Ok(())
    }

    /// Boot into a graphical login.
    pub fn activate_graphical_login(&mut self) -> Result<()> {
        let command = self.command_mut();
        let mut lines = command.lines();
        match lines.iter().position(|l| is_command(l, "xconfig")) {
            Some(i) => {
                let mut line = CommandLine::parse(&lines[i]);
                if !line.has_flag("startxonboot") {
                    line.tokens.push(String::from("--startxonboot"));
                    lines[i] = line.render();
                    command.set_lines(lines);
                }
            }
            None => command.push_line("xconfig --startxonboot"),
        }
        Ok(())
    }

    /// Append a `%post` section running `body`.
    pub fn add_post_script(&mut self, body: &str) -> Result<()> {
        let mut text = String::from("%post\n");
        text.push_str(body.trim_end_matches('\n'));
        text.push('\n');

        if let Some(last) = self.sections.last_mut() {
            if !last.text.is_empty() && !last.text.ends_with('\n') {
                last.text.push('\n');
            }
        }
        self.sections.push(Section::new("post", text));
        if self.dialect == KickstartDialect::EnterpriseLinux {
            self.sections.push(Section::new("end", "%end\n"));
        }
        Ok(())
    }

    pub fn set_swappiness(&mut self, swappiness: i64) -> Result<()> {
        if !(0..=100).contains(&swappiness) {
            return Err(AnswerError::BadInput(format!(
                "swappiness {swappiness} is not within 0..=100"
            )));
        }
        self.add_post_script(&format!(
            "# swappiness\n\
             sed -i '/^vm\\.swappiness/d' /etc/sysctl.conf\n\
             echo 'vm.swappiness = {swappiness}' >> /etc/sysctl.conf"
        ))
    }
}

impl AnswerContent for Kickstart {
    fn serialize(&self) -> String {
        self.sections.iter().map(|s| s.text.as_str()).collect()
    }

    fn replace_hostname(&mut self, hostname: &str) -> Result<()> {
        Kickstart::replace_hostname(self, hostname)
    }

    fn set_root_password(&mut self, password: &str) -> Result<()> {
        self.replace_rootpw(password)
    }

    fn add_user(&mut self, name: &str, password: &str, full_name: Option<&str>) -> Result<()> {
        Kickstart::add_user(self, name, password, full_name)
    }
}
