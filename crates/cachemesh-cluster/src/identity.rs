//! Local host identity and the client's self-registration record.

use std::fs;
use std::io;
use std::net::{IpAddr, ToSocketAddrs};

use cachemesh_registry::SessionId;
use chrono::{DateTime, Local};

/// Hostname and address this client registers under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub hostname: String,
    pub ip: IpAddr,
}

/// Resolves the local host.
pub trait HostIdentity: Send + Sync + 'static {
    fn resolve(&self) -> io::Result<HostInfo>;
}

/// Resolves the machine's hostname and its first address.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl SystemIdentity {
    fn hostname() -> io::Result<String> {
        if let Ok(name) = std::env::var("HOSTNAME") {
            if !name.trim().is_empty() {
                return Ok(name.trim().to_string());
            }
        }
        for path in ["/proc/sys/kernel/hostname", "/etc/hostname"] {
            if let Ok(name) = fs::read_to_string(path) {
                let name = name.trim();
                if !name.is_empty() {
                    return Ok(name.to_string());
                }
            }
        }
        Err(io::Error::new(io::ErrorKind::NotFound, "local hostname is unknown"))
    }
}

impl HostIdentity for SystemIdentity {
    fn resolve(&self) -> io::Result<HostInfo> {
        let hostname = Self::hostname()?;
        let ip = (hostname.as_str(), 0)
            .to_socket_addrs()?
            .map(|addr| addr.ip())
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address for host {hostname}"),
                )
            })?;
        Ok(HostInfo { hostname, ip })
    }
}

/// A fixed identity.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub HostInfo);

impl HostIdentity for StaticIdentity {
    fn resolve(&self) -> io::Result<HostInfo> {
        Ok(self.0.clone())
    }
}

/// The ephemeral record a client leaves under `{root}/client_list/{service}`.
#[derive(Debug, Clone)]
pub struct SelfRegistration {
    pub host: HostInfo,
    pub pool_size: usize,
    pub client_tag: String,
    pub version: String,
    pub created_at: DateTime<Local>,
    pub session_id: SessionId,
}

impl SelfRegistration {
    /// `{hostname}_{ip}_{poolSize}_{tag}_{version}_{yyyyMMddHHmmss}_{sessionId}`
    pub fn node_name(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}_{}_{}",
            self.host.hostname,
            self.host.ip,
            self.pool_size,
            self.client_tag,
            self.version,
            self.created_at.format("%Y%m%d%H%M%S"),
            self.session_id.value(),
        )
    }

    pub fn path(&self, client_list_path: &str) -> String {
        format!("{}/{}", client_list_path, self.node_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::net::Ipv4Addr;

    #[test]
    fn renders_registration_path() {
        let registration = SelfRegistration {
            host: HostInfo {
                hostname: "app-01".to_string(),
                ip: IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)),
            },
            pool_size: 4,
            client_tag: "rust".to_string(),
            version: "0.3.0".to_string(),
            created_at: Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap(),
            session_id: SessionId::new(0x1f),
        };

        assert_eq!(
            registration.path("/cachemesh/client_list/svc"),
            "/cachemesh/client_list/svc/app-01_10.1.2.3_4_rust_0.3.0_20240309070501_31"
        );
    }

    #[test]
    fn static_identity_resolves() {
        let info = HostInfo {
            hostname: "h".to_string(),
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        };
        assert_eq!(StaticIdentity(info.clone()).resolve().unwrap(), info);
    }
}
