// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging setup.
//!
//! Every module logs through `tracing` macros with structured fields
//! (`worker_id`, `world`, `region`, `attempt`). The binary installs a
//! subscriber once at startup:
//!
//! ```rust,ignore
//! use chunkfleet::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```
//!
//! `RUST_LOG` overrides the configured levels, e.g.
//! `RUST_LOG=chunkfleet::network=trace`.

mod init;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard, CRATE_TARGET};
