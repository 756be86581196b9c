// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Integration test support for modsim.
//!
//! The actual tests live in `tests/`; this library provides the shared
//! fixtures and a minimal Modbus/TCP test client.

pub mod common;
