// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Modbus/TCP wire protocol for the slave fleet simulator.
//!
//! - [`frame`]: MBAP header and PDU codec, bit-exact per the Modbus
//!   Application Protocol v1.1b3
//! - [`engine`]: the per-connection request loop with fault-injection knobs
//! - [`error`]: connection-scoped protocol errors

pub mod engine;
pub mod error;
pub mod frame;

pub use engine::{ConnectionState, EngineOptions, ProtocolEngine};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{ExceptionCode, MbapHeader, Request, Response};
