// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-instance chunk plans.
//!
//! A plan expands a selection into the chunks one instance must generate and
//! the region files those chunks land in. Ownership is decided per region so
//! that a region file is only ever written by a single instance.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use super::descriptor::Selection;
use super::shape::Shape;
use super::spiral;
use crate::transfer::{Dimension, RegionCoord};

/// Blocks per chunk edge, as a shift.
const CHUNK_SHIFT: u32 = 4;

/// Chunks per region edge, as a shift.
const REGION_SHIFT: u32 = crate::transfer::region::REGION_SHIFT;

/// Chunk containing a block coordinate.
pub fn block_to_chunk(block: f64) -> i32 {
    let floored = block.floor();
    if !floored.is_finite() {
        return 0;
    }
    (floored as i32) >> CHUNK_SHIFT
}

/// Radius in chunks covering a block radius, rounded up.
pub fn radius_in_chunks(radius: f64) -> i32 {
    if !radius.is_finite() || radius <= 0.0 {
        return 0;
    }
    (radius / 16.0).ceil() as i32
}

/// Chunks and regions owned by one instance for a selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    pub world: String,
    pub dimension: Dimension,
    pub shape: Shape,
    pub center_chunk_x: i32,
    pub center_chunk_z: i32,
    pub radius_chunks: i32,
    pub instance_index: u32,
    pub total_instances: u32,
    /// In-shape chunks across all instances.
    pub total_chunks: u64,
    /// Chunks owned by this instance.
    pub chunk_count: u64,
    /// Regions owned by this instance that contain at least one in-shape chunk.
    pub regions: BTreeSet<RegionCoord>,
}

impl ChunkPlan {
    /// Compute the plan for `instance_index` out of `total_instances`.
    pub fn build(selection: &Selection, instance_index: u32, total_instances: u32) -> Self {
        let mut plan = Self {
            world: selection.world.clone(),
            dimension: Dimension::from_world_name(&selection.world),
            shape: selection.shape.clone(),
            center_chunk_x: block_to_chunk(selection.center_x),
            center_chunk_z: block_to_chunk(selection.center_z),
            radius_chunks: radius_in_chunks(selection.radius),
            instance_index,
            total_instances,
            total_chunks: 0,
            chunk_count: 0,
            regions: BTreeSet::new(),
        };

        let mut total = 0u64;
        let mut owned = 0u64;
        let mut regions = BTreeSet::new();
        plan.for_each_in_scope(|cx, cz, mine| {
            total += 1;
            if mine {
                owned += 1;
                regions.insert(RegionCoord::from_chunk(cx, cz, plan.dimension));
            }
        });
        plan.total_chunks = total;
        plan.chunk_count = owned;
        plan.regions = regions;
        plan
    }

    pub fn center_region(&self) -> (i32, i32) {
        (
            self.center_chunk_x >> REGION_SHIFT,
            self.center_chunk_z >> REGION_SHIFT,
        )
    }

    /// Whether this instance owns the region containing a chunk.
    pub fn owns_chunk(&self, chunk_x: i32, chunk_z: i32) -> bool {
        let (crx, crz) = self.center_region();
        spiral::owns(
            chunk_x >> REGION_SHIFT,
            chunk_z >> REGION_SHIFT,
            crx,
            crz,
            self.total_instances,
            self.instance_index,
        )
    }

    /// Visit every in-shape chunk, flagging the ones this instance owns.
    fn for_each_in_scope(&self, mut visit: impl FnMut(i32, i32, bool)) {
        let r = i64::from(self.radius_chunks);
        let cx = i64::from(self.center_chunk_x);
        let cz = i64::from(self.center_chunk_z);
        for x in (cx - r)..=(cx + r) {
            for z in (cz - r)..=(cz + r) {
                if !self.shape.contains(x - cx, z - cz, r) {
                    continue;
                }
                let (Ok(x), Ok(z)) = (i32::try_from(x), i32::try_from(z)) else {
                    continue;
                };
                visit(x, z, self.owns_chunk(x, z));
            }
        }
    }

    /// Owned chunks in scan order.
    pub fn owned_chunks(&self) -> Vec<(i32, i32)> {
        let mut chunks = Vec::with_capacity(self.chunk_count as usize);
        self.for_each_in_scope(|x, z, mine| {
            if mine {
                chunks.push((x, z));
            }
        });
        chunks
    }

    /// Write the owned chunks as `x,z` lines into `dir`, returning the path.
    pub fn write_chunk_list(&self, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(chunk_list_name(self.instance_index));
        let mut writer = BufWriter::new(File::create(&path)?);
        let mut result = Ok(());
        self.for_each_in_scope(|x, z, mine| {
            if mine && result.is_ok() {
                result = writeln!(writer, "{},{}", x, z);
            }
        });
        result?;
        writer.flush()?;

        info!(
            path = %path.display(),
            chunks = self.chunk_count,
            regions = self.regions.len(),
            "Wrote chunk list"
        );
        Ok(path)
    }
}

/// File name of the chunk list for an instance.
pub fn chunk_list_name(instance_index: u32) -> String {
    format!("chunkfleet_{}.csv", instance_index)
}

/// Engine selector string for a chunk list file (`csv=<stem>`).
pub fn chunk_list_pattern(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("csv={}", stem)
}
