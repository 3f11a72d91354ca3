// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! chunkfleet - distributed chunk pre-generation.
//!
//! A host splits a circular or square area of a world across itself and any
//! number of worker machines. Each instance generates the regions it owns
//! and ships the finished region files back through a durable transfer
//! queue.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`partition`] - Spiral ownership of regions and per-instance chunk plans
//! - [`network`] - Wire protocol, coordinator (host) and agent (worker)
//! - [`transfer`] - Durable queue, zstd compression and upload loop
//! - [`engine`] - The generation engine seam and an external-command engine
//! - [`node`] - Wiring of the host, worker and standalone roles
//! - [`config`] - Configuration loading and merging
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types and result aliases
//!
//! # Example
//!
//! ```rust,ignore
//! use chunkfleet::partition::{ChunkPlan, Selection};
//!
//! let selection = Selection::new("world", 0.0, 0.0, 512.0);
//! let plan = ChunkPlan::build(&selection, 1, 4);
//! println!("{} chunks in {} regions", plan.chunk_count, plan.regions.len());
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod network;
pub mod node;
pub mod partition;
pub mod telemetry;
pub mod transfer;

pub use error::{ConfigError, NodeError, Result};
pub use node::{Node, NodeSettings, Role};
pub use partition::{Assignment, ChunkPlan, PartitionDescriptor, Selection, Shape};

/// chunkfleet version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
