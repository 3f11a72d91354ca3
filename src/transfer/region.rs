// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Region coordinates and region file naming.

use std::fmt;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Chunks per region edge, as a shift.
pub const REGION_SHIFT: u32 = 5;

static REGION_FILE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^r\.(-?\d+)\.(-?\d+)\.mca$").unwrap());

/// World dimension a region belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    #[default]
    Overworld,
    Nether,
    End,
}

impl Dimension {
    /// Folder holding this dimension's data inside a world directory.
    /// Empty for the overworld.
    pub fn folder(&self) -> &'static str {
        match self {
            Dimension::Overworld => "",
            Dimension::Nether => "DIM-1",
            Dimension::End => "DIM1",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Overworld => "overworld",
            Dimension::Nether => "nether",
            Dimension::End => "end",
        }
    }

    /// Infer the dimension from a world name using the usual server
    /// naming (`world_nether`, `world_the_end`).
    pub fn from_world_name(world: &str) -> Self {
        if world.ends_with("_nether") {
            Dimension::Nether
        } else if world.ends_with("_the_end") {
            Dimension::End
        } else {
            Dimension::Overworld
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coordinate of a region file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionCoord {
    pub x: i32,
    pub z: i32,
    #[serde(default)]
    pub dimension: Dimension,
}

impl RegionCoord {
    pub fn new(x: i32, z: i32, dimension: Dimension) -> Self {
        Self { x, z, dimension }
    }

    pub fn overworld(x: i32, z: i32) -> Self {
        Self::new(x, z, Dimension::Overworld)
    }

    pub fn nether(x: i32, z: i32) -> Self {
        Self::new(x, z, Dimension::Nether)
    }

    pub fn end(x: i32, z: i32) -> Self {
        Self::new(x, z, Dimension::End)
    }

    /// Region containing the given chunk (arithmetic shift, so negative
    /// chunks round toward negative infinity).
    pub fn from_chunk(chunk_x: i32, chunk_z: i32, dimension: Dimension) -> Self {
        Self::new(chunk_x >> REGION_SHIFT, chunk_z >> REGION_SHIFT, dimension)
    }

    /// Parse a file name of the form `r.X.Z.mca`.
    pub fn from_file_name(name: &str, dimension: Dimension) -> Option<Self> {
        let caps = REGION_FILE_PATTERN.captures(name)?;
        let x = caps.get(1)?.as_str().parse().ok()?;
        let z = caps.get(2)?.as_str().parse().ok()?;
        Some(Self::new(x, z, dimension))
    }

    pub fn file_name(&self) -> String {
        format!("r.{}.{}.mca", self.x, self.z)
    }

    /// Path of the region file relative to the world directory, always
    /// with `/` separators.
    pub fn relative_path(&self) -> String {
        let folder = self.dimension.folder();
        if folder.is_empty() {
            format!("region/{}", self.file_name())
        } else {
            format!("{}/region/{}", folder, self.file_name())
        }
    }

    /// Relative path as a platform path.
    pub fn relative_path_buf(&self) -> PathBuf {
        let mut path = PathBuf::new();
        let folder = self.dimension.folder();
        if !folder.is_empty() {
            path.push(folder);
        }
        path.push("region");
        path.push(self.file_name());
        path
    }
}

impl fmt::Display for RegionCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/r.{}.{}", self.dimension, self.x, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name() {
        assert_eq!(RegionCoord::overworld(-1, 3).file_name(), "r.-1.3.mca");
    }

    #[test]
    fn test_relative_path_per_dimension() {
        assert_eq!(RegionCoord::overworld(0, 0).relative_path(), "region/r.0.0.mca");
        assert_eq!(RegionCoord::nether(1, -2).relative_path(), "DIM-1/region/r.1.-2.mca");
        assert_eq!(RegionCoord::end(5, 5).relative_path(), "DIM1/region/r.5.5.mca");
        assert_eq!(
            RegionCoord::nether(1, -2).relative_path_buf(),
            PathBuf::from("DIM-1").join("region").join("r.1.-2.mca")
        );
    }

    #[test]
    fn test_from_file_name() {
        assert_eq!(
            RegionCoord::from_file_name("r.-12.7.mca", Dimension::End),
            Some(RegionCoord::end(-12, 7))
        );
        assert_eq!(RegionCoord::from_file_name("r.1.2.mcc", Dimension::Overworld), None);
        assert_eq!(RegionCoord::from_file_name("xr.1.2.mca", Dimension::Overworld), None);
    }

    #[test]
    fn test_from_chunk_floors_negatives() {
        assert_eq!(RegionCoord::from_chunk(31, 32, Dimension::Overworld), RegionCoord::overworld(0, 1));
        assert_eq!(RegionCoord::from_chunk(-1, -32, Dimension::Overworld), RegionCoord::overworld(-1, -1));
        assert_eq!(RegionCoord::from_chunk(-33, 0, Dimension::Overworld), RegionCoord::overworld(-2, 0));
    }

    #[test]
    fn test_dimension_from_world_name() {
        assert_eq!(Dimension::from_world_name("world"), Dimension::Overworld);
        assert_eq!(Dimension::from_world_name("world_nether"), Dimension::Nether);
        assert_eq!(Dimension::from_world_name("world_the_end"), Dimension::End);
    }

    #[test]
    fn test_display() {
        assert_eq!(RegionCoord::nether(2, -3).to_string(), "nether/r.2.-3");
    }
}
