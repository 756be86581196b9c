// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Virtual-IP provisioning.
//!
//! Binding thousands of distinct addresses requires them to exist on a local
//! interface first. The [`Provisioner`] adds and removes those addresses.
//! On Linux it drives the `ip(8)` tool; on other platforms a stub records
//! the addresses without configuring anything, which keeps the rest of the
//! simulator testable.
//!
//! The simulation core never requires provisioning to have succeeded:
//! slaves simply fail their own binds otherwise.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use modsim_config::{ConfigError, IpRange};

/// A Result type with ProvisionerError.
pub type ProvisionerResult<T> = Result<T, ProvisionerError>;

/// Errors from the virtual-IP provisioner.
#[derive(Debug, Error)]
pub enum ProvisionerError {
    /// An address range failed validation.
    #[error("invalid range: {0}")]
    InvalidRange(#[from] ConfigError),

    /// The platform tool could not be executed.
    #[error("failed to run '{command}': {source}")]
    CommandFailed {
        /// The command line that failed.
        command: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The platform tool ran but reported failure.
    #[error("'{command}' failed: {stderr}")]
    CommandRejected {
        /// The command line that failed.
        command: String,
        /// Stderr output from the tool.
        stderr: String,
    },
}

// =============================================================================
// Provisioner
// =============================================================================

/// Adds and removes virtual IPv4 addresses on a host interface.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Validates the ranges without touching the host.
    fn validate(&self, ranges: &[IpRange]) -> ProvisionerResult<()> {
        for range in ranges {
            range.validate()?;
        }
        Ok(())
    }

    /// Adds every address in the ranges to the interface.
    async fn setup(&mut self, ranges: &[IpRange]) -> ProvisionerResult<()>;

    /// Removes every address added by this provisioner.
    async fn teardown(&mut self) -> ProvisionerResult<()>;

    /// Lists IPv4 addresses currently present on the interface.
    async fn list(&self) -> ProvisionerResult<Vec<Ipv4Addr>>;
}

/// Creates the provisioner for the current platform.
pub fn new_provisioner(interface: impl Into<String>) -> Box<dyn Provisioner> {
    #[cfg(target_os = "linux")]
    {
        Box::new(LinuxProvisioner::new(interface))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(StubProvisioner::new(interface))
    }
}

fn expand_all(ranges: &[IpRange]) -> ProvisionerResult<Vec<Ipv4Addr>> {
    let mut ips = Vec::new();
    for range in ranges {
        ips.extend(range.expand()?);
    }
    Ok(ips)
}

// =============================================================================
// LinuxProvisioner
// =============================================================================

/// Linux implementation backed by the `ip(8)` tool.
#[cfg(target_os = "linux")]
pub struct LinuxProvisioner {
    interface: String,
    configured: Vec<Ipv4Addr>,
}

#[cfg(target_os = "linux")]
impl LinuxProvisioner {
    /// Creates a provisioner for one interface.
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            configured: Vec::new(),
        }
    }

    async fn run_ip(&self, args: &[&str]) -> ProvisionerResult<String> {
        let command = format!("ip {}", args.join(" "));
        let output = tokio::process::Command::new("ip")
            .args(args)
            .output()
            .await
            .map_err(|e| ProvisionerError::CommandFailed {
                command: command.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(ProvisionerError::CommandRejected {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(target_os = "linux")]
#[async_trait]
impl Provisioner for LinuxProvisioner {
    async fn setup(&mut self, ranges: &[IpRange]) -> ProvisionerResult<()> {
        self.validate(ranges)?;
        let ips = expand_all(ranges)?;

        info!(
            interface = %self.interface,
            count = ips.len(),
            "adding virtual addresses"
        );

        let mut added = 0usize;
        for ip in ips {
            let cidr = format!("{ip}/32");
            match self
                .run_ip(&["addr", "add", &cidr, "dev", &self.interface])
                .await
            {
                Ok(_) => {
                    added += 1;
                    self.configured.push(ip);
                    debug!(%ip, "address added");
                }
                // Re-running setup over existing addresses is fine.
                Err(ProvisionerError::CommandRejected { stderr, .. })
                    if stderr.contains("File exists") =>
                {
                    added += 1;
                    self.configured.push(ip);
                    debug!(%ip, "address already present");
                }
                Err(e) => warn!(%ip, error = %e, "failed to add address"),
            }
        }

        info!(added, "virtual address setup complete");
        Ok(())
    }

    async fn teardown(&mut self) -> ProvisionerResult<()> {
        info!(
            interface = %self.interface,
            count = self.configured.len(),
            "removing virtual addresses"
        );

        let mut removed = 0usize;
        for ip in std::mem::take(&mut self.configured) {
            let cidr = format!("{ip}/32");
            match self
                .run_ip(&["addr", "del", &cidr, "dev", &self.interface])
                .await
            {
                Ok(_) => removed += 1,
                Err(e) => warn!(%ip, error = %e, "failed to remove address"),
            }
        }

        info!(removed, "virtual address teardown complete");
        Ok(())
    }

    async fn list(&self) -> ProvisionerResult<Vec<Ipv4Addr>> {
        let output = self
            .run_ip(&["-o", "-4", "addr", "show", "dev", &self.interface])
            .await?;
        Ok(parse_ip_addr_output(&output))
    }
}

// =============================================================================
// StubProvisioner
// =============================================================================

/// Non-Linux stub: records addresses without configuring the host.
pub struct StubProvisioner {
    #[allow(dead_code)]
    interface: String,
    configured: Vec<Ipv4Addr>,
}

impl StubProvisioner {
    /// Creates a stub provisioner.
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            configured: Vec::new(),
        }
    }
}

#[async_trait]
impl Provisioner for StubProvisioner {
    async fn setup(&mut self, ranges: &[IpRange]) -> ProvisionerResult<()> {
        self.validate(ranges)?;
        let ips = expand_all(ranges)?;
        warn!(
            count = ips.len(),
            "virtual-IP provisioning is only supported on Linux; recording addresses without configuring them"
        );
        self.configured = ips;
        Ok(())
    }

    async fn teardown(&mut self) -> ProvisionerResult<()> {
        self.configured.clear();
        Ok(())
    }

    async fn list(&self) -> ProvisionerResult<Vec<Ipv4Addr>> {
        Ok(self.configured.clone())
    }
}

// =============================================================================
// Local Address Discovery
// =============================================================================

/// Discovers non-loopback IPv4 addresses on this host.
///
/// On Linux this parses `ip -o -4 addr show`; anywhere (and as a fallback)
/// the default-route UDP trick contributes the primary address. Returns an
/// empty list when nothing can be discovered.
pub async fn local_ipv4_addrs() -> Vec<Ipv4Addr> {
    let mut addrs: Vec<Ipv4Addr> = Vec::new();

    #[cfg(target_os = "linux")]
    {
        if let Ok(output) = tokio::process::Command::new("ip")
            .args(["-o", "-4", "addr", "show"])
            .output()
            .await
        {
            if output.status.success() {
                addrs = parse_ip_addr_output(&String::from_utf8_lossy(&output.stdout))
                    .into_iter()
                    .filter(|ip| !ip.is_loopback())
                    .collect();
            }
        }
    }

    if addrs.is_empty() {
        if let Some(ip) = primary_local_ipv4() {
            addrs.push(ip);
        }
    }

    addrs
}

/// The source address the host would use toward the public internet.
/// No packet is sent; `connect` on a UDP socket only selects a route.
fn primary_local_ipv4() -> Option<Ipv4Addr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("198.51.100.1:53").ok()?;
    match socket.local_addr().ok()? {
        std::net::SocketAddr::V4(addr) if !addr.ip().is_loopback() => Some(*addr.ip()),
        _ => None,
    }
}

/// Parses `ip -o -4 addr show` output into addresses.
fn parse_ip_addr_output(output: &str) -> Vec<Ipv4Addr> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            tokens.find(|&token| token == "inet")?;
            let cidr = tokens.next()?;
            cidr.split('/').next()?.parse().ok()
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ip_addr_output() {
        let output = "\
1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever preferred_lft forever
2: eth0    inet 192.168.1.10/24 brd 192.168.1.255 scope global eth0\\       valid_lft forever preferred_lft forever
2: eth0    inet 10.0.0.5/32 scope global eth0\\       valid_lft forever preferred_lft forever
";
        let ips = parse_ip_addr_output(output);
        assert_eq!(
            ips,
            vec![
                Ipv4Addr::new(127, 0, 0, 1),
                Ipv4Addr::new(192, 168, 1, 10),
                Ipv4Addr::new(10, 0, 0, 5),
            ]
        );
    }

    #[test]
    fn test_parse_ignores_garbage() {
        assert!(parse_ip_addr_output("").is_empty());
        assert!(parse_ip_addr_output("no inet here\n").is_empty());
        assert!(parse_ip_addr_output("2: eth0 inet not-an-ip/24\n").is_empty());
    }

    #[tokio::test]
    async fn test_stub_provisioner_records_addresses() {
        let mut provisioner = StubProvisioner::new("eth0");
        provisioner
            .setup(&[IpRange::span("10.0.0.1", "10.0.0.3")])
            .await
            .unwrap();

        let listed = provisioner.list().await.unwrap();
        assert_eq!(listed.len(), 3);

        provisioner.teardown().await.unwrap();
        assert!(provisioner.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stub_provisioner_rejects_invalid_range() {
        let mut provisioner = StubProvisioner::new("eth0");
        let result = provisioner.setup(&[IpRange::default()]).await;
        assert!(matches!(result, Err(ProvisionerError::InvalidRange(_))));
    }

    #[test]
    fn test_validate_checks_every_range() {
        let provisioner = StubProvisioner::new("eth0");
        let ranges = vec![
            IpRange::cidr("10.0.0.0/30"),
            IpRange::span("bad", "worse"),
        ];
        assert!(provisioner.validate(&ranges).is_err());
    }
}
