// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Durable region file transfer pipeline.
//!
//! Completed regions are queued per worker and shipped to a central
//! destination one at a time:
//!
//! ```text
//!   generation complete
//!          │ add_regions (idempotent)
//!          ▼
//!   ┌──────────────┐  next pending   ┌──────────┐  zstd   ┌──────────┐
//!   │TransferQueue │ ──────────────► │  settle  │ ──────► │  upload  │
//!   │ (JSON file)  │ ◄────────────── │  check   │         │ progress │
//!   └──────────────┘  every change   └──────────┘         └──────────┘
//! ```
//!
//! Delivery is at-least-once: a record interrupted mid-upload is sent again
//! from scratch after a restart, and uploads overwrite the destination file.

mod backend;
mod compress;
mod error;
mod manager;
mod queue;
mod record;
pub mod region;
mod retry;
mod summary;

pub use backend::{
    format_bytes, remote_parent, upload_file, Auth, Credentials, DirectoryBackend, ProgressFn,
    TransferBackend, TransferOutcome,
};
pub use compress::{
    compressed_name, compression_ratio, is_compressed_region, original_name, RegionCompressor,
    COMPRESSED_SUFFIX, DEFAULT_COMPRESSION_LEVEL,
};
pub use error::{TransferError, TransferResult};
pub use manager::{
    status_counts, TransferManager, TransferOptions, DEFAULT_SETTLE_INTERVAL, DEFAULT_WORLD,
    STAGING_DIR, WORLD_PLACEHOLDER,
};
pub use queue::{TransferQueue, QUEUE_FILE};
pub use record::{TransferRecord, TransferStatus};
pub use region::{Dimension, RegionCoord};
pub use retry::RetryPolicy;
pub use summary::TransferSummary;
