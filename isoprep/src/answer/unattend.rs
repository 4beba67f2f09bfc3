//! Windows Setup answer files (`autounattend.xml`).

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{
    AnswerContent, AnswerError, Result,
    xml::{Document, Element, Node},
};
use crate::{network::NetworkConfigStatic, password::windows_password};

const WCM_NAMESPACE: &str = "http://schemas.microsoft.com/WMIConfig/2002/State";
const PUBLIC_KEY_TOKEN: &str = "31bf3856ad364e35";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum WindowsArch {
    #[strum(serialize = "x86")]
    #[serde(rename = "x86")]
    X86,
    #[default]
    #[strum(serialize = "amd64")]
    #[serde(rename = "amd64")]
    Amd64,
}

/// Which list a logon command is added to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LogonList {
    /// Runs once, synchronously, at the first logon
    First,
    /// Runs at every logon
    Every,
}

impl LogonList {
    fn container(&self) -> &'static str {
        match self {
            LogonList::First => "FirstLogonCommands",
            LogonList::Every => "LogonCommands",
        }
    }

    fn command(&self) -> &'static str {
        match self {
            LogonList::First => "SynchronousCommand",
            LogonList::Every => "AsynchronousCommand",
        }
    }
}

/// Normalize a MAC address to the `AA-BB-CC-DD-EE-FF` form Windows uses.
pub fn normalize_mac(mac: &str) -> Result<String> {
    let digits: String = mac
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect::<String>()
        .to_uppercase();
    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AnswerError::BadInput(format!(
            "{mac:?} is not a MAC address"
        )));
    }
    Ok(digits
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).to_string())
        .collect::<Vec<_>>()
        .join("-"))
}

/// A parsed unattend file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unattend {
    document: Document,
}

impl Unattend {
    pub fn parse(text: &str) -> Result<Self> {
        let document = Document::parse(text)?;
        if document.root.name != "unattend" {
            return Err(AnswerError::BadInput(format!(
                "root element is <{}>, not <unattend>",
                document.root.name
            )));
        }
        let mut unattend = Self { document };
        unattend.ensure_wcm_namespace();
        Ok(unattend)
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    fn ensure_wcm_namespace(&mut self) {
        if self.document.root.attr("xmlns:wcm").is_none() {
            self.document.root.set_attr("xmlns:wcm", WCM_NAMESPACE);
        }
    }

    /// Architecture of the existing components, `amd64` when there are none.
    pub fn architecture(&self) -> WindowsArch {
        self.document
            .root
            .elements()
            .flat_map(|settings| settings.elements())
            .find_map(|component| component.attr("processorArchitecture"))
            .and_then(|arch| arch.parse().ok())
            .unwrap_or_default()
    }

    /// The `component` named `name` in the settings pass `pass`, created
    /// when absent.
    fn component(&mut self, pass: &str, name: &str) -> &mut Element {
        let arch = self.architecture().to_string();
        let root = &mut self.document.root;

        let settings_index = root.elements().position(|e| {
            e.name == "settings" && e.attr("pass") == Some(pass)
        });
        let settings = match settings_index {
            Some(index) => root.elements_mut().nth(index),
            None => {
                root.push(Element::new("settings").with_attr("pass", pass));
                root.elements_mut().last()
            }
        };
        let Some(settings) = settings else {
            unreachable!("settings pass was just located or created");
        };

        let component_index = settings
            .elements()
            .position(|e| e.name == "component" && e.attr("name") == Some(name));
        let component = match component_index {
            Some(index) => settings.elements_mut().nth(index),
            None => {
                settings.push(
                    Element::new("component")
                        .with_attr("name", name)
                        .with_attr("processorArchitecture", &arch)
                        .with_attr("publicKeyToken", PUBLIC_KEY_TOKEN)
                        .with_attr("language", "neutral")
                        .with_attr("versionScope", "nonSxS"),
                );
                settings.elements_mut().last()
            }
        };
        component.unwrap_or_else(|| unreachable!("component was just located or created"))
    }

    /// Set the language and locale for Setup and for the installed system.
    pub fn set_locale(&mut self, locale: &str) {
        let pe = self.component("windowsPE", "Microsoft-Windows-International-Core-WinPE");
        pe.ensure_path(&["SetupUILanguage", "UILanguage"]).set_text(locale);
        for name in ["InputLocale", "SystemLocale", "UILanguage", "UserLocale"] {
            pe.ensure_child(name).set_text(locale);
        }

        let oobe = self.component("oobeSystem", "Microsoft-Windows-International-Core");
        for name in ["InputLocale", "SystemLocale", "UILanguage", "UserLocale"] {
            oobe.ensure_child(name).set_text(locale);
        }
    }

    pub fn set_computer_name(&mut self, name: &str) -> Result<()> {
        if name.is_empty() || name.len() > 15 || name.chars().any(|c| c.is_whitespace()) {
            return Err(AnswerError::BadInput(format!(
                "{name:?} is not a valid computer name"
            )));
        }
        self.component("specialize", "Microsoft-Windows-Shell-Setup")
            .ensure_child("ComputerName")
            .set_text(name);
        Ok(())
    }

    pub fn set_administrator_password(&mut self, password: &str) {
        let admin = self
            .component("oobeSystem", "Microsoft-Windows-Shell-Setup")
            .ensure_path(&["UserAccounts", "AdministratorPassword"]);
        admin
            .ensure_child("Value")
            .set_text(&windows_password(password, "AdministratorPassword"));
        admin.ensure_child("PlainText").set_text("false");
    }

    pub fn set_registered_owner(&mut self, owner: &str) {
        self.component("oobeSystem", "Microsoft-Windows-Shell-Setup")
            .ensure_child("RegisteredOwner")
            .set_text(owner);
        self.component("windowsPE", "Microsoft-Windows-Setup")
            .ensure_path(&["UserData", "FullName"])
            .set_text(owner);
    }

    pub fn set_organization(&mut self, organization: &str) {
        self.component("oobeSystem", "Microsoft-Windows-Shell-Setup")
            .ensure_child("RegisteredOrganization")
            .set_text(organization);
        self.component("windowsPE", "Microsoft-Windows-Setup")
            .ensure_path(&["UserData", "Organization"])
            .set_text(organization);
    }

    pub fn set_accept_eula(&mut self, accept: bool) {
        self.component("windowsPE", "Microsoft-Windows-Setup")
            .ensure_path(&["UserData", "AcceptEula"])
            .set_text(if accept { "true" } else { "false" });
    }

    pub fn set_product_key(&mut self, key: &str) {
        let product_key = self
            .component("windowsPE", "Microsoft-Windows-Setup")
            .ensure_path(&["UserData", "ProductKey"]);
        product_key.ensure_child("Key").set_text(key);
        product_key.ensure_child("WillShowUI").set_text("OnError");
    }

    /// Target every component at a processor architecture.
    pub fn set_architecture(&mut self, arch: WindowsArch) {
        let arch = arch.to_string();
        for settings in self.document.root.elements_mut() {
            for component in settings.elements_mut() {
                if component.name == "component" {
                    component.set_attr("processorArchitecture", &arch);
                }
            }
        }
    }

    /// Add a local account, replacing one with the same name.
    pub fn add_local_account(
        &mut self,
        name: &str,
        password: &str,
        full_name: Option<&str>,
        groups: &[&str],
    ) {
        let mut account = Element::new("LocalAccount")
            .with_attr("wcm:action", "add")
            .with_child(
                Element::new("Password")
                    .with_child(
                        Element::new("Value").with_text(&windows_password(password, "Password")),
                    )
                    .with_child(Element::new("PlainText").with_text("false")),
            )
            .with_child(Element::new("DisplayName").with_text(full_name.unwrap_or(name)))
            .with_child(Element::new("Name").with_text(name));
        if !groups.is_empty() {
            account.push(Element::new("Group").with_text(&groups.join(";")));
        }

        let accounts = self
            .component("oobeSystem", "Microsoft-Windows-Shell-Setup")
            .ensure_path(&["UserAccounts", "LocalAccounts"]);
        accounts.remove_children(|e| {
            e.name == "LocalAccount" && e.child("Name").is_some_and(|n| n.text() == name)
        });
        accounts.push(account);
    }

    /// Log `user` on automatically, `count` times.
    pub fn enable_auto_logon(&mut self, user: &str, password: &str, count: u32) {
        let shell = self.component("oobeSystem", "Microsoft-Windows-Shell-Setup");
        shell.remove_children(|e| e.name == "AutoLogon");
        shell.push(
            Element::new("AutoLogon")
                .with_child(
                    Element::new("Password")
                        .with_child(
                            Element::new("Value")
                                .with_text(&windows_password(password, "Password")),
                        )
                        .with_child(Element::new("PlainText").with_text("false")),
                )
                .with_child(Element::new("Enabled").with_text("true"))
                .with_child(Element::new("LogonCount").with_text(&count.to_string()))
                .with_child(Element::new("Username").with_text(user)),
        );
    }

    fn add_logon_command(
        &mut self,
        list: LogonList,
        order: u32,
        command_line: &str,
        description: &str,
    ) -> Result<()> {
        let commands = self
            .component("oobeSystem", "Microsoft-Windows-Shell-Setup")
            .ensure_child(list.container());
        let order_of = |e: &Element| -> Option<u32> { e.child("Order")?.text().trim().parse().ok() };

        if commands.elements().any(|e| order_of(e) == Some(order)) {
            return Err(AnswerError::BadInput(format!(
                "{} already has a command with order {order}",
                list.container()
            )));
        }

        commands.push(
            Element::new(list.command())
                .with_attr("wcm:action", "add")
                .with_child(Element::new("Order").with_text(&order.to_string()))
                .with_child(Element::new("CommandLine").with_text(command_line))
                .with_child(Element::new("Description").with_text(description)),
        );
        commands
            .children
            .sort_by_key(|node| match node {
                Node::Element(e) => order_of(e).unwrap_or(u32::MAX),
                _ => u32::MAX,
            });
        Ok(())
    }

    /// Run a command once, at the first logon. Commands run by `order`.
    pub fn add_first_logon_command(
        &mut self,
        order: u32,
        command_line: &str,
        description: &str,
    ) -> Result<()> {
        self.add_logon_command(LogonList::First, order, command_line, description)
    }

    /// Run a command at every logon. Commands run by `order`.
    pub fn add_logon_command_every_time(
        &mut self,
        order: u32,
        command_line: &str,
        description: &str,
    ) -> Result<()> {
        self.add_logon_command(LogonList::Every, order, command_line, description)
    }

    /// Give the interface with this MAC address a static configuration.
    pub fn add_network_configuration_static(
        &mut self,
        mac: &str,
        config: &NetworkConfigStatic,
    ) -> Result<()> {
        let mac = normalize_mac(mac)?;
        let same_interface =
            |e: &Element| e.name == "Interface" && e.child("Identifier").is_some_and(|i| i.text() == mac);

        let interface = Element::new("Interface")
            .with_attr("wcm:action", "add")
            .with_child(
                Element::new("Ipv4Settings")
                    .with_child(Element::new("DhcpEnabled").with_text("false")),
            )
            .with_child(Element::new("Identifier").with_text(&mac))
            .with_child(
                Element::new("UnicastIpAddresses").with_child(
                    Element::new("IpAddress")
                        .with_attr("wcm:action", "add")
                        .with_attr("wcm:keyValue", "1")
                        .with_text(&format!("{}/{}", config.ipv4, config.prefix_len())),
                ),
            )
            .with_child(
                Element::new("Routes").with_child(
                    Element::new("Route")
                        .with_attr("wcm:action", "add")
                        .with_child(Element::new("Identifier").with_text("0"))
                        .with_child(Element::new("NextHopAddress").with_text(&config.gateway.to_string()))
                        .with_child(Element::new("Prefix").with_text("0.0.0.0/0")),
                ),
            );
        let interfaces = self
            .component("specialize", "Microsoft-Windows-TCPIP")
            .ensure_child("Interfaces");
        interfaces.remove_children(same_interface);
        interfaces.push(interface);

        let dns = self
            .component("specialize", "Microsoft-Windows-DNS-Client")
            .ensure_child("Interfaces");
        dns.remove_children(same_interface);
        if !config.nameservers.is_empty() {
            let mut search_order = Element::new("DNSServerSearchOrder");
            for (i, nameserver) in config.nameservers.iter().enumerate() {
                search_order.push(
                    Element::new("IpAddress")
                        .with_attr("wcm:action", "add")
                        .with_attr("wcm:keyValue", &(i + 1).to_string())
                        .with_text(&nameserver.to_string()),
                );
            }
            dns.push(
                Element::new("Interface")
                    .with_attr("wcm:action", "add")
                    .with_child(Element::new("Identifier").with_text(&mac))
                    .with_child(search_order),
            );
        }
        Ok(())
    }
}

impl AnswerContent for Unattend {
    fn serialize(&self) -> String {
        self.document.serialize()
    }

    fn replace_hostname(&mut self, hostname: &str) -> Result<()> {
        self.set_computer_name(hostname)
    }

    fn set_root_password(&mut self, password: &str) -> Result<()> {
        self.set_administrator_password(password);
        Ok(())
    }

    fn add_user(&mut self, name: &str, password: &str, full_name: Option<&str>) -> Result<()> {
        self.add_local_account(name, password, full_name, &["Administrators"]);
        Ok(())
    }
}
