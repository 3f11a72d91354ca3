// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Deterministic work partitioning.
//!
//! Every instance derives its share of a selection independently from the
//! same [`PartitionDescriptor`] and its own instance index. No coordination
//! beyond distributing the descriptor is required:
//!
//! ```text
//!   Selection ──► PartitionDescriptor{total} ──► ChunkPlan(index)
//!                                                  │
//!                       spiral_index(region) % total == index
//! ```
//!
//! Ownership is computed at region resolution, so one region file is always
//! produced by exactly one instance.

mod descriptor;
mod plan;
mod shape;
pub mod spiral;

pub use descriptor::{Assignment, InstanceLayout, PartitionDescriptor, Selection, HOST_INSTANCE_INDEX};
pub use plan::{block_to_chunk, chunk_list_name, chunk_list_pattern, radius_in_chunks, ChunkPlan};
pub use shape::Shape;
pub use spiral::{owner_index, owns, spiral_index};
