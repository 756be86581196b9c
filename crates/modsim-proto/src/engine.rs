// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The per-connection protocol engine.
//!
//! One engine instance serves one TCP connection: it reads ADUs, dispatches
//! them against the slave's register map and writes one response per request
//! in arrival order. Framing is strict; a malformed header, a non-zero
//! protocol id or a short read closes the connection with no resync attempt.
//!
//! Before each request is processed, the engine consults the slave's current
//! [`SlaKnobs`]:
//!
//! 1. If jitter is enabled, sleep a uniform random duration in
//!    `[jitter_min, jitter_max)`.
//! 2. If the packet-loss draw hits, consume the request and emit nothing.
//! 3. Otherwise process and respond.
//!
//! The engine is generic over the stream so tests can drive it through
//! in-memory duplex pipes.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use modsim_core::registers::RegisterMap;
use modsim_core::scenario::SlaKnobs;
use modsim_core::stats::SlaveStats;

use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{
    encode_adu, ExceptionCode, MbapHeader, Request, Response, COIL_ON, MBAP_HEADER_LEN,
};

// =============================================================================
// ConnectionState
// =============================================================================

/// Where a connection currently is in its request loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Accepted, loop not yet entered.
    Connected = 0,
    /// Waiting for the 7-byte MBAP header.
    ReadingHeader = 1,
    /// Waiting for the frame body.
    ReadingBody = 2,
    /// Request decoded, handlers running.
    Dispatching = 3,
    /// Response bytes going out.
    Writing = 4,
    /// Terminated.
    Closed = 5,
}

impl ConnectionState {
    /// Decodes the atomic representation.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::ReadingHeader,
            2 => Self::ReadingBody,
            3 => Self::Dispatching,
            4 => Self::Writing,
            5 => Self::Closed,
            _ => Self::Connected,
        }
    }
}

// =============================================================================
// EngineOptions
// =============================================================================

/// Per-connection configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// The slave's configured unit id; requests addressed elsewhere are
    /// dropped silently. Unit id 0 is always accepted.
    pub unit_id: u8,

    /// Optional read deadline for each frame.
    pub read_timeout: Option<Duration>,

    /// Optional write deadline for each response.
    pub write_timeout: Option<Duration>,
}

// =============================================================================
// ProtocolEngine
// =============================================================================

/// Serves one Modbus/TCP connection against a shared register map.
pub struct ProtocolEngine {
    registers: Arc<RegisterMap>,
    stats: Arc<SlaveStats>,
    sla: Arc<RwLock<SlaKnobs>>,
    options: EngineOptions,
    state: AtomicU8,
}

impl ProtocolEngine {
    /// Creates an engine for one connection.
    pub fn new(
        registers: Arc<RegisterMap>,
        stats: Arc<SlaveStats>,
        sla: Arc<RwLock<SlaKnobs>>,
        options: EngineOptions,
    ) -> Self {
        Self {
            registers,
            stats,
            sla,
            options,
            state: AtomicU8::new(ConnectionState::Connected as u8),
        }
    }

    /// The connection's current loop state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Runs the request loop until the peer disconnects or a frame is
    /// invalid. A clean disconnect returns `Ok(())`.
    pub async fn serve<S>(&self, mut stream: S) -> ProtocolResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let result = self.run(&mut stream).await;
        self.set_state(ConnectionState::Closed);
        result
    }

    async fn run<S>(&self, stream: &mut S) -> ProtocolResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut header_buf = [0u8; MBAP_HEADER_LEN];
        let mut body = Vec::new();

        loop {
            self.set_state(ConnectionState::ReadingHeader);
            match self
                .read_exact_deadline(stream, &mut header_buf)
                .await
            {
                Ok(()) => {}
                // A connection that goes away between requests is normal.
                Err(ProtocolError::Io(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(());
                }
                Err(e) => return Err(e),
            }

            let header = MbapHeader::decode(&header_buf);
            if header.protocol_id != 0 {
                return Err(ProtocolError::InvalidProtocolId {
                    actual: header.protocol_id,
                });
            }
            if !header.length_valid() {
                return Err(ProtocolError::InvalidFrameLength {
                    length: header.length,
                });
            }

            self.set_state(ConnectionState::ReadingBody);
            body.resize(header.pdu_len(), 0);
            match self.read_exact_deadline(stream, &mut body).await {
                Ok(()) => {}
                Err(ProtocolError::Io(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Err(ProtocolError::TruncatedBody);
                }
                Err(e) => return Err(e),
            }

            // Unit id filter: accept our own id and the 0 wildcard, ignore
            // everything else without a response.
            if header.unit_id != 0 && header.unit_id != self.options.unit_id {
                trace!(
                    unit_id = header.unit_id,
                    expected = self.options.unit_id,
                    "ignoring request for another unit"
                );
                continue;
            }

            self.set_state(ConnectionState::Dispatching);
            let bytes_in = (MBAP_HEADER_LEN + body.len()) as u64;

            // Draw the SLA decisions outside any await point.
            let (jitter, drop_response) = {
                let knobs = *self.sla.read();
                let mut rng = rand::thread_rng();
                (sample_jitter(&knobs, &mut rng), should_drop(&knobs, &mut rng))
            };

            if let Some(delay) = jitter {
                tokio::time::sleep(delay).await;
            }

            if drop_response {
                debug!(fc = body[0], "dropping response (packet loss scenario)");
                self.stats.record_dropped();
                continue;
            }

            let response = match Request::parse(&body) {
                Ok(request) => match dispatch(&self.registers, &request) {
                    Ok(response) => response,
                    Err(code) => {
                        debug!(fc = request.function_code(), %code, "request failed");
                        Response::Exception {
                            function_code: request.function_code(),
                            code,
                        }
                    }
                },
                Err(code) => {
                    debug!(fc = body[0], %code, "malformed request");
                    Response::Exception {
                        function_code: body[0],
                        code,
                    }
                }
            };

            self.set_state(ConnectionState::Writing);
            let adu = encode_adu(header.transaction_id, header.unit_id, &response.encode());
            self.write_all_deadline(stream, &adu).await?;

            self.stats
                .record_request(bytes_in, adu.len() as u64, response.is_exception());
        }
    }

    async fn read_exact_deadline<S>(&self, stream: &mut S, buf: &mut [u8]) -> ProtocolResult<()>
    where
        S: AsyncRead + Unpin + Send,
    {
        match self.options.read_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, stream.read_exact(buf)).await {
                Ok(result) => {
                    result?;
                    Ok(())
                }
                Err(_) => Err(ProtocolError::DeadlineExpired),
            },
            None => {
                stream.read_exact(buf).await?;
                Ok(())
            }
        }
    }

    async fn write_all_deadline<S>(&self, stream: &mut S, bytes: &[u8]) -> ProtocolResult<()>
    where
        S: AsyncWrite + Unpin + Send,
    {
        let write = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        };
        match self.options.write_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, write).await {
                Ok(result) => {
                    result?;
                    Ok(())
                }
                Err(_) => Err(ProtocolError::DeadlineExpired),
            },
            None => {
                write.await?;
                Ok(())
            }
        }
    }
}

fn sample_jitter(knobs: &SlaKnobs, rng: &mut impl Rng) -> Option<Duration> {
    if !knobs.jitter_enabled() {
        return None;
    }
    let min = knobs.jitter_min.min(knobs.jitter_max);
    let span = knobs.jitter_max.saturating_sub(min);
    if span.is_zero() {
        return Some(min);
    }
    let extra = rng.gen_range(0..span.as_nanos() as u64);
    Some(min + Duration::from_nanos(extra))
}

fn should_drop(knobs: &SlaKnobs, rng: &mut impl Rng) -> bool {
    knobs.packet_loss_rate > 0.0 && rng.gen::<f64>() < knobs.packet_loss_rate
}

// =============================================================================
// Dispatch
// =============================================================================

/// Executes a decoded request against the register map.
fn dispatch(registers: &RegisterMap, request: &Request) -> Result<Response, ExceptionCode> {
    match request {
        Request::ReadCoils { address, quantity } => registers
            .read_coils(*address, *quantity)
            .map(Response::ReadCoils)
            .map_err(Into::into),

        Request::ReadDiscreteInputs { address, quantity } => registers
            .read_discrete_inputs(*address, *quantity)
            .map(Response::ReadDiscreteInputs)
            .map_err(Into::into),

        Request::ReadHoldingRegisters { address, quantity } => registers
            .read_holding_registers(*address, *quantity)
            .map(Response::ReadHoldingRegisters)
            .map_err(Into::into),

        Request::ReadInputRegisters { address, quantity } => registers
            .read_input_registers(*address, *quantity)
            .map(Response::ReadInputRegisters)
            .map_err(Into::into),

        Request::WriteSingleCoil { address, value } => {
            if registers
                .definition(*address)
                .is_some_and(|meta| !meta.writable)
            {
                return Err(ExceptionCode::IllegalDataAddress);
            }
            registers.write_coil(*address, *value == COIL_ON)?;
            Ok(Response::WriteSingleCoil {
                address: *address,
                value: *value,
            })
        }

        Request::WriteSingleRegister { address, value } => {
            if registers
                .holding_definition(*address)
                .is_some_and(|meta| !meta.writable)
            {
                return Err(ExceptionCode::IllegalDataAddress);
            }
            registers.write_holding_register(*address, *value)?;
            Ok(Response::WriteSingleRegister {
                address: *address,
                value: *value,
            })
        }

        Request::WriteMultipleCoils { address, values } => {
            registers.write_coils(*address, values)?;
            Ok(Response::WriteMultipleCoils {
                address: *address,
                quantity: values.len() as u16,
            })
        }

        Request::WriteMultipleRegisters { address, values } => {
            registers.write_holding_registers(*address, values)?;
            Ok(Response::WriteMultipleRegisters {
                address: *address,
                quantity: values.len() as u16,
            })
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    struct Harness {
        client: DuplexStream,
        stats: Arc<SlaveStats>,
        sla: Arc<RwLock<SlaKnobs>>,
    }

    fn spawn_engine(options: EngineOptions) -> Harness {
        let registers = Arc::new(RegisterMap::with_defaults());
        spawn_engine_with(registers, options)
    }

    fn spawn_engine_with(registers: Arc<RegisterMap>, options: EngineOptions) -> Harness {
        let stats = Arc::new(SlaveStats::new());
        let sla = Arc::new(RwLock::new(SlaKnobs::default()));
        let engine = ProtocolEngine::new(registers, stats.clone(), sla.clone(), options);

        let (client, server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let _ = engine.serve(server).await;
        });

        Harness { client, stats, sla }
    }

    fn request_adu(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
        encode_adu(transaction_id, unit_id, pdu)
    }

    async fn transact(harness: &mut Harness, adu: &[u8]) -> Vec<u8> {
        harness.client.write_all(adu).await.unwrap();

        let mut header = [0u8; MBAP_HEADER_LEN];
        tokio::time::timeout(Duration::from_secs(2), harness.client.read_exact(&mut header))
            .await
            .expect("response header timed out")
            .unwrap();

        let decoded = MbapHeader::decode(&header);
        let mut body = vec![0u8; decoded.pdu_len()];
        harness.client.read_exact(&mut body).await.unwrap();

        let mut adu = header.to_vec();
        adu.extend_from_slice(&body);
        adu
    }

    async fn expect_no_response(harness: &mut Harness) {
        let mut byte = [0u8; 1];
        let result = tokio::time::timeout(
            Duration::from_millis(150),
            harness.client.read_exact(&mut byte),
        )
        .await;
        assert!(result.is_err(), "unexpected response byte {byte:?}");
    }

    #[tokio::test]
    async fn test_read_holding_register_from_defaults() {
        let mut harness = spawn_engine(EngineOptions {
            unit_id: 1,
            ..Default::default()
        });

        // FC 03, offset 0, quantity 1: LineVoltage raw 2200 = 0x0898.
        let response = transact(
            &mut harness,
            &request_adu(0x0001, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]),
        )
        .await;

        assert_eq!(response[0..2], [0x00, 0x01]); // transaction id echoed
        assert_eq!(&response[7..], &[0x03, 0x02, 0x08, 0x98]);
    }

    #[tokio::test]
    async fn test_write_then_read_register() {
        let mut harness = spawn_engine(EngineOptions {
            unit_id: 1,
            ..Default::default()
        });

        // FC 06: write 0x1234 at offset 100; response echoes the request.
        let response = transact(
            &mut harness,
            &request_adu(7, 1, &[0x06, 0x00, 0x64, 0x12, 0x34]),
        )
        .await;
        assert_eq!(&response[7..], &[0x06, 0x00, 0x64, 0x12, 0x34]);

        // FC 03: read it back.
        let response = transact(
            &mut harness,
            &request_adu(8, 1, &[0x03, 0x00, 0x64, 0x00, 0x01]),
        )
        .await;
        assert_eq!(&response[7..], &[0x03, 0x02, 0x12, 0x34]);
    }

    #[tokio::test]
    async fn test_write_then_read_coil() {
        let mut harness = spawn_engine(EngineOptions {
            unit_id: 1,
            ..Default::default()
        });

        let response = transact(
            &mut harness,
            &request_adu(1, 1, &[0x05, 0x00, 0x00, 0xFF, 0x00]),
        )
        .await;
        assert_eq!(&response[7..], &[0x05, 0x00, 0x00, 0xFF, 0x00]);

        let response = transact(
            &mut harness,
            &request_adu(2, 1, &[0x01, 0x00, 0x00, 0x00, 0x01]),
        )
        .await;
        assert_eq!(&response[7..], &[0x01, 0x01, 0x01]);
    }

    #[tokio::test]
    async fn test_quantity_zero_yields_illegal_data_value() {
        let mut harness = spawn_engine(EngineOptions {
            unit_id: 1,
            ..Default::default()
        });

        let response = transact(
            &mut harness,
            &request_adu(1, 1, &[0x03, 0x00, 0x00, 0x00, 0x00]),
        )
        .await;
        assert_eq!(&response[7..], &[0x83, 0x03]);
    }

    #[tokio::test]
    async fn test_out_of_bounds_yields_illegal_data_address() {
        let mut harness = spawn_engine(EngineOptions {
            unit_id: 1,
            ..Default::default()
        });

        // Offset 9995 + quantity 10 exceeds the 10000-word space.
        let response = transact(
            &mut harness,
            &request_adu(1, 1, &[0x03, 0x27, 0x0B, 0x00, 0x0A]),
        )
        .await;
        assert_eq!(&response[7..], &[0x83, 0x02]);
    }

    #[tokio::test]
    async fn test_unknown_function_code_yields_illegal_function() {
        let mut harness = spawn_engine(EngineOptions {
            unit_id: 1,
            ..Default::default()
        });

        let response = transact(&mut harness, &request_adu(1, 1, &[0x2B, 0x00, 0x00])).await;
        assert_eq!(&response[7..], &[0xAB, 0x01]);
    }

    #[tokio::test]
    async fn test_write_to_read_only_point_rejected() {
        let mut harness = spawn_engine(EngineOptions {
            unit_id: 1,
            ..Default::default()
        });

        // Offset 0 is LineVoltage, defined writable=false.
        let response = transact(
            &mut harness,
            &request_adu(1, 1, &[0x06, 0x00, 0x00, 0x00, 0x01]),
        )
        .await;
        assert_eq!(&response[7..], &[0x86, 0x02]);
        assert_eq!(harness.stats.errors(), 1);
        assert_eq!(harness.stats.requests(), 1);
    }

    #[tokio::test]
    async fn test_invalid_protocol_id_closes_connection() {
        let mut harness = spawn_engine(EngineOptions {
            unit_id: 1,
            ..Default::default()
        });

        // protocol id = 1.
        let frame = [0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        harness.client.write_all(&frame).await.unwrap();

        let mut byte = [0u8; 1];
        let n = tokio::time::timeout(
            Duration::from_secs(2),
            harness.client.read(&mut byte),
        )
        .await
        .expect("close timed out")
        .unwrap();
        assert_eq!(n, 0, "expected the connection to close without a response");
    }

    #[tokio::test]
    async fn test_unit_id_filter_drops_silently() {
        let mut harness = spawn_engine(EngineOptions {
            unit_id: 1,
            ..Default::default()
        });

        harness
            .client
            .write_all(&request_adu(1, 5, &[0x03, 0x00, 0x00, 0x00, 0x01]))
            .await
            .unwrap();
        expect_no_response(&mut harness).await;

        // Unit 0 acts as a wildcard and still gets an answer.
        let response = transact(
            &mut harness,
            &request_adu(2, 0, &[0x03, 0x00, 0x00, 0x00, 0x01]),
        )
        .await;
        assert_eq!(response[6], 0);
        assert_eq!(&response[7..], &[0x03, 0x02, 0x08, 0x98]);
    }

    #[tokio::test]
    async fn test_packet_loss_drops_response_but_keeps_connection() {
        let mut harness = spawn_engine(EngineOptions {
            unit_id: 1,
            ..Default::default()
        });

        *harness.sla.write() = SlaKnobs {
            packet_loss_rate: 1.0,
            ..Default::default()
        };

        harness
            .client
            .write_all(&request_adu(1, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]))
            .await
            .unwrap();
        expect_no_response(&mut harness).await;
        assert_eq!(harness.stats.errors(), 1);
        assert_eq!(harness.stats.requests(), 0);

        *harness.sla.write() = SlaKnobs::default();
        let response = transact(
            &mut harness,
            &request_adu(2, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]),
        )
        .await;
        assert_eq!(&response[7..], &[0x03, 0x02, 0x08, 0x98]);
    }

    #[tokio::test]
    async fn test_counters_are_wire_accurate() {
        let mut harness = spawn_engine(EngineOptions {
            unit_id: 1,
            ..Default::default()
        });

        let request = request_adu(1, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        let response = transact(&mut harness, &request).await;

        assert_eq!(harness.stats.requests(), 1);
        assert_eq!(harness.stats.bytes_in(), request.len() as u64);
        assert_eq!(harness.stats.bytes_out(), response.len() as u64);
        assert!(harness.stats.last_request_time().is_some());
    }

    #[tokio::test]
    async fn test_write_multiple_registers_round_trip() {
        let mut harness = spawn_engine(EngineOptions {
            unit_id: 1,
            ..Default::default()
        });

        // FC 16: write [0xAAAA, 0xBBBB] at offset 300.
        let response = transact(
            &mut harness,
            &request_adu(
                1,
                1,
                &[0x10, 0x01, 0x2C, 0x00, 0x02, 0x04, 0xAA, 0xAA, 0xBB, 0xBB],
            ),
        )
        .await;
        assert_eq!(&response[7..], &[0x10, 0x01, 0x2C, 0x00, 0x02]);

        let response = transact(
            &mut harness,
            &request_adu(2, 1, &[0x03, 0x01, 0x2C, 0x00, 0x02]),
        )
        .await;
        assert_eq!(&response[7..], &[0x03, 0x04, 0xAA, 0xAA, 0xBB, 0xBB]);
    }
}
