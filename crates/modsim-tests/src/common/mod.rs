// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Shared fixtures for integration tests.
//!
//! - [`fleet_config`]: a loopback fleet configuration with fast ticks
//! - [`start_fleet`]: builds and starts a supervisor
//! - [`ModbusClient`]: a minimal Modbus/TCP client speaking raw ADUs

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use modsim_config::{IpRange, SimConfig};
use modsim_core::scenario::ScenarioRegistry;
use modsim_proto::frame::{encode_adu, MbapHeader, MBAP_HEADER_LEN};
use modsim_server::Supervisor;

/// Tick interval used by test fleets.
pub const TEST_TICK: Duration = Duration::from_millis(30);

/// Builds a loopback fleet configuration.
///
/// Slaves bind `127.0.0.1` through `127.0.0.<count>`; the loopback /8 is
/// bindable without any provisioning.
pub fn fleet_config(count: usize, port: u16) -> SimConfig {
    let mut config = SimConfig::default();
    config.server.port = port;
    config.slaves.count = count;
    config.scenario.update_interval = TEST_TICK;
    config.network.ip_ranges = vec![IpRange::span("127.0.0.1", format!("127.0.0.{count}"))];
    config
}

/// Builds and starts a supervisor over the given configuration.
pub async fn start_fleet(config: SimConfig) -> Arc<Supervisor> {
    let supervisor = Arc::new(Supervisor::new(
        Arc::new(config),
        Arc::new(ScenarioRegistry::with_builtins()),
    ));
    supervisor.start().await.expect("fleet failed to start");
    supervisor
}

// =============================================================================
// ModbusClient
// =============================================================================

/// A minimal Modbus/TCP client for driving the simulator over real sockets.
pub struct ModbusClient {
    stream: TcpStream,
    transaction_id: u16,
}

impl ModbusClient {
    /// Connects to a slave.
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
            transaction_id: 0,
        })
    }

    /// Sends a request PDU and returns the response PDU.
    ///
    /// Panics if the transaction id of the response does not match.
    pub async fn request(&mut self, unit_id: u8, pdu: &[u8]) -> std::io::Result<Vec<u8>> {
        let response = self
            .request_timeout(unit_id, pdu, Duration::from_secs(5))
            .await?;
        Ok(response.expect("response timed out"))
    }

    /// Sends a request PDU; `None` when no response arrives in time.
    pub async fn request_timeout(
        &mut self,
        unit_id: u8,
        pdu: &[u8],
        deadline: Duration,
    ) -> std::io::Result<Option<Vec<u8>>> {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        let request = encode_adu(self.transaction_id, unit_id, pdu);
        self.stream.write_all(&request).await?;

        let mut header = [0u8; MBAP_HEADER_LEN];
        match tokio::time::timeout(deadline, self.stream.read_exact(&mut header)).await {
            Ok(result) => {
                result?;
            }
            Err(_) => return Ok(None),
        }

        let decoded = MbapHeader::decode(&header);
        assert_eq!(
            decoded.transaction_id, self.transaction_id,
            "transaction id mismatch"
        );

        let mut body = vec![0u8; decoded.pdu_len()];
        self.stream.read_exact(&mut body).await?;
        Ok(Some(body))
    }

    /// Writes raw bytes, bypassing framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes).await
    }

    /// Reads until EOF or timeout; returns the bytes seen.
    pub async fn read_to_close(&mut self, deadline: Duration) -> std::io::Result<Vec<u8>> {
        let mut collected = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match tokio::time::timeout(deadline, self.stream.read(&mut buf)).await {
                Ok(Ok(0)) => return Ok(collected),
                Ok(Ok(n)) => collected.extend_from_slice(&buf[..n]),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connection did not close",
                    ))
                }
            }
        }
    }
}
