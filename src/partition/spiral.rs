// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Square-spiral indexing and region ownership.
//!
//! Positions around a center are numbered layer by layer. Layer 0 is the
//! center itself; layer `L` holds the `8L` positions on the square ring at
//! Chebyshev distance `L` and occupies indices `[(2L-1)^2, (2L+1)^2)`.
//! Each ring is walked clockwise starting at the top-right corner:
//!
//! ```text
//!   z=+L  6L+...  ->  ->  ->   0
//!          ^                   |
//!          |        C          v   right edge: base + (L - dz)
//!          |                   |
//!   z=-L  4L  <-  <-  <-  <-  2L
//!        x=-L                x=+L
//! ```
//!
//! Ownership is the index modulo the instance count, so consecutive indices
//! land on different instances and every instance gets a near-equal share of
//! each ring.

/// Chebyshev distance from the center, i.e. the spiral layer of a position.
pub fn layer(x: i32, z: i32, center_x: i32, center_z: i32) -> u64 {
    let dx = (i64::from(x) - i64::from(center_x)).unsigned_abs();
    let dz = (i64::from(z) - i64::from(center_z)).unsigned_abs();
    dx.max(dz)
}

/// Spiral index of `(x, z)` relative to `(center_x, center_z)`.
///
/// The center maps to 0 and indices are unique per position. Every position
/// in layer `L` has a smaller index than every position in layer `L + 1`.
pub fn spiral_index(x: i32, z: i32, center_x: i32, center_z: i32) -> u64 {
    let dx = i64::from(x) - i64::from(center_x);
    let dz = i64::from(z) - i64::from(center_z);
    let l = dx.abs().max(dz.abs());

    if l == 0 {
        return 0;
    }

    let inner_side = 2 * l - 1;
    let base = inner_side * inner_side;

    let offset = if dx == l {
        l - dz
    } else if dz == -l {
        2 * l + (l - dx)
    } else if dx == -l {
        4 * l + (dz + l)
    } else {
        6 * l + (dx + l)
    };

    // base and offset are both non-negative here
    (base + offset) as u64
}

/// Whether the instance at `instance_index` owns the region at
/// `(region_x, region_z)` for a partition centered on the given region.
///
/// A `total_instances` of zero owns nothing.
pub fn owns(
    region_x: i32,
    region_z: i32,
    center_region_x: i32,
    center_region_z: i32,
    total_instances: u32,
    instance_index: u32,
) -> bool {
    owner_index(region_x, region_z, center_region_x, center_region_z, total_instances)
        == Some(instance_index)
}

/// The instance index owning a region, or `None` when there are no instances.
pub fn owner_index(
    region_x: i32,
    region_z: i32,
    center_region_x: i32,
    center_region_z: i32,
    total_instances: u32,
) -> Option<u32> {
    if total_instances == 0 {
        return None;
    }
    let index = spiral_index(region_x, region_z, center_region_x, center_region_z);
    Some((index % u64::from(total_instances)) as u32)
}
