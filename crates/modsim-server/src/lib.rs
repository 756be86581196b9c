// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Slave fleet runtime for the Modbus/TCP simulator.
//!
//! - [`slave::Slave`]: one listener, accept loop and scenario ticker
//! - [`supervisor::Supervisor`]: fleet lifecycle, scenario fan-out,
//!   aggregate statistics
//! - [`metrics`]: background sampler and the HTTP metrics endpoint
//! - [`net`]: virtual-IP provisioner and local address discovery

pub mod metrics;
pub mod net;
pub mod slave;
pub mod supervisor;

pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use net::{new_provisioner, Provisioner, ProvisionerError, ProvisionerResult};
pub use slave::Slave;
pub use supervisor::{FleetStats, Supervisor, START_PARALLELISM};
