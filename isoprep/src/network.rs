use std::net::Ipv4Addr;

use crate::answer::{AnswerError, Result};

pub const DEFAULT_DEVICE: &str = "eth0";
pub const DEFAULT_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

/// A static IPv4 configuration for one network device.
///
/// An empty `nameservers` list means the option is omitted entirely.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkConfigStatic {
    pub device: String,
    pub ipv4: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub nameservers: Vec<Ipv4Addr>,
}

fn parse_ip(value: &str, what: &str) -> Result<Ipv4Addr> {
    value
        .trim()
        .parse()
        .map_err(|_| AnswerError::BadInput(format!("{value:?} is not a valid IPv4 {what}")))
}

impl NetworkConfigStatic {
    /// Build a configuration, filling in defaults.
    ///
    /// Without a gateway the first host of the subnet is used
    /// (`ipv4 & netmask | 0.0.0.1`). Without nameservers the gateway is used.
    pub fn new(
        device: Option<&str>,
        ipv4: &str,
        netmask: Option<&str>,
        gateway: Option<&str>,
        nameservers: Option<&[String]>,
    ) -> Result<Self> {
        let ipv4 = parse_ip(ipv4, "address")?;
        let netmask = match netmask {
            Some(netmask) => parse_ip(netmask, "netmask")?,
            None => DEFAULT_NETMASK,
        };
        prefix_len(netmask)?;

        let gateway = match gateway {
            Some(gateway) => parse_ip(gateway, "gateway")?,
            None => Ipv4Addr::from(u32::from(ipv4) & u32::from(netmask) | 1),
        };
        let nameservers = match nameservers {
            Some(nameservers) => nameservers
                .iter()
                .map(|ns| parse_ip(ns, "nameserver"))
                .collect::<Result<Vec<_>>>()?,
            None => vec![gateway],
        };

        Ok(Self {
            device: device.unwrap_or(DEFAULT_DEVICE).to_string(),
            ipv4,
            netmask,
            gateway,
            nameservers,
        })
    }

    /// Prefix length of the netmask, e.g. 24 for `255.255.255.0`.
    pub fn prefix_len(&self) -> u32 {
        u32::from(self.netmask).leading_ones()
    }

    pub fn nameservers_joined(&self, separator: &str) -> String {
        self.nameservers
            .iter()
            .map(|ns| ns.to_string())
            .collect::<Vec<_>>()
            .join(separator)
    }
}

fn prefix_len(netmask: Ipv4Addr) -> Result<u32> {
    let bits = u32::from(netmask);
    if bits.leading_ones() + bits.trailing_zeros() != 32 {
        return Err(AnswerError::BadInput(format!(
            "{netmask} is not a contiguous netmask"
        )));
    }
    Ok(bits.leading_ones())
}
