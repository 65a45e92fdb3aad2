use crate::error::{RaindropError, Result};
use raindrop_core::TimeUnit;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use tracing::warn;

/// Identity a node writes into the slot it leases.
///
/// Rendered as `{ip}#{port}#{time-unit-code}#{mac}`, so two generators on
/// the same host only share an identity when they also share port and time
/// unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeIdentity {
    ip: IpAddr,
    port: u16,
    time_unit: TimeUnit,
    mac: String,
}

impl NodeIdentity {
    pub fn new(ip: IpAddr, port: u16, time_unit: TimeUnit, mac: impl Into<String>) -> Self {
        Self {
            ip,
            port,
            time_unit,
            mac: mac.into(),
        }
    }

    /// Builds the identity of this host.
    ///
    /// `ip` overrides the first non-loopback local address. A host without a
    /// readable hardware address gets an empty mac.
    pub fn detect(ip: Option<IpAddr>, port: u16, time_unit: TimeUnit) -> Result<Self> {
        let ip = match ip {
            Some(ip) => ip,
            None => local_ip_address::local_ip()
                .map_err(|e| RaindropError::Identity(format!("no local ip address: {e}")))?,
        };

        let mac = match mac_address::get_mac_address() {
            Ok(Some(mac)) => mac.to_string().to_lowercase(),
            Ok(None) => String::new(),
            Err(e) => {
                warn!(error = %e, "failed to read mac address");
                String::new()
            }
        };

        Ok(Self::new(ip, port, time_unit, mac))
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    /// The value stored in the slot's `owner_code` column.
    pub fn owner_code(&self) -> String {
        self.to_string()
    }
}

impl Display for NodeIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}#{}#{}#{}",
            self.ip,
            self.port,
            self.time_unit.code(),
            self.mac
        )
    }
}
