// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Selections, partition descriptors and instance numbering.

use serde::{Deserialize, Serialize};

use super::shape::Shape;

/// Instance index reserved for the coordinator when it generates locally.
pub const HOST_INSTANCE_INDEX: u32 = 0;

/// The area a generation run covers, in block coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub world: String,
    pub center_x: f64,
    pub center_z: f64,
    /// Radius in blocks.
    pub radius: f64,
    #[serde(default)]
    pub shape: Shape,
}

impl Selection {
    pub fn new(world: impl Into<String>, center_x: f64, center_z: f64, radius: f64) -> Self {
        Self {
            world: world.into(),
            center_x,
            center_z,
            radius,
            shape: Shape::default(),
        }
    }

    pub fn with_shape(mut self, shape: impl Into<Shape>) -> Self {
        self.shape = shape.into();
        self
    }
}

/// Shared parameters defining how a selection is split across instances.
///
/// A descriptor is never mutated after it is sent; peer churn produces a new
/// descriptor with a higher `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionDescriptor {
    pub world: String,
    pub center_x: f64,
    pub center_z: f64,
    pub radius: f64,
    pub shape: Shape,
    pub total_instances: u32,
    #[serde(default)]
    pub version: u64,
}

impl PartitionDescriptor {
    pub fn new(selection: &Selection, total_instances: u32, version: u64) -> Self {
        Self {
            world: selection.world.clone(),
            center_x: selection.center_x,
            center_z: selection.center_z,
            radius: selection.radius,
            shape: selection.shape.clone(),
            total_instances,
            version,
        }
    }

    pub fn selection(&self) -> Selection {
        Selection {
            world: self.world.clone(),
            center_x: self.center_x,
            center_z: self.center_z,
            radius: self.radius,
            shape: self.shape.clone(),
        }
    }

    /// Whether two descriptors split the same area the same way, ignoring
    /// the version counter.
    pub fn same_split(&self, other: &PartitionDescriptor) -> bool {
        self.selection() == other.selection() && self.total_instances == other.total_instances
    }
}

/// A descriptor together with the receiving instance's index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// Instance index (not the connection identity).
    #[serde(rename = "instanceId")]
    pub instance_index: u32,
    #[serde(flatten)]
    pub partition: PartitionDescriptor,
}

impl Assignment {
    pub fn new(instance_index: u32, partition: PartitionDescriptor) -> Self {
        Self {
            instance_index,
            partition,
        }
    }

    pub fn total_instances(&self) -> u32 {
        self.partition.total_instances
    }

    pub fn world(&self) -> &str {
        &self.partition.world
    }
}

/// Maps connected peers to instance indices.
///
/// When the coordinator participates it holds [`HOST_INSTANCE_INDEX`] and
/// remote peers are numbered from 1; otherwise peers start at 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceLayout {
    pub host_participates: bool,
}

impl InstanceLayout {
    pub fn new(host_participates: bool) -> Self {
        Self { host_participates }
    }

    fn offset(&self) -> u32 {
        u32::from(self.host_participates)
    }

    /// Total instances for a given number of connected peers.
    pub fn total_instances(&self, peer_count: usize) -> u32 {
        peer_count as u32 + self.offset()
    }

    /// Instance index of the peer at `rank` in the ascending identity list.
    pub fn index_for_rank(&self, rank: usize) -> u32 {
        rank as u32 + self.offset()
    }

    /// The coordinator's own index, if it generates locally.
    pub fn host_index(&self) -> Option<u32> {
        self.host_participates.then_some(HOST_INSTANCE_INDEX)
    }
}
