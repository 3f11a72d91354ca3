// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Generation engine seam.
//!
//! The coordination layer never generates chunks itself. It hands a
//! [`GenerationRequest`] to a [`GenerationEngine`] and listens for
//! [`EngineEvent`]s.

mod command;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::partition::{ChunkPlan, Selection, Shape};

pub use command::{CommandEngine, CommandSpec};

/// Errors reported by a generation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Generation already running for {0}")]
    AlreadyRunning(String),

    #[error("Failed to launch engine: {0}")]
    Launch(String),

    #[error("Engine error: {0}")]
    Other(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// One generation task for the local instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub world: String,
    pub shape: Shape,
    /// Block coordinates of the selection center.
    pub center_x: f64,
    pub center_z: f64,
    /// Radius in blocks.
    pub radius: f64,
    /// Output selector naming the chunk list, e.g. `csv=chunkfleet_1`.
    pub selector: String,
    pub chunk_list: PathBuf,
    /// Chunks this instance owns.
    pub total_chunks: u64,
}

impl GenerationRequest {
    pub fn new(selection: &Selection, plan: &ChunkPlan, selector: impl Into<String>, chunk_list: PathBuf) -> Self {
        Self {
            world: selection.world.clone(),
            shape: selection.shape.clone(),
            center_x: selection.center_x,
            center_z: selection.center_z,
            radius: selection.radius,
            selector: selector.into(),
            chunk_list,
            total_chunks: plan.chunk_count,
        }
    }
}

/// Progress and lifecycle notifications from an engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Progress {
        world: String,
        chunks_generated: u64,
        total_chunks: u64,
        percent: f64,
        rate: f64,
    },
    Completed {
        world: String,
    },
    Cancelled {
        world: String,
    },
    Failed {
        world: String,
        error: String,
    },
}

impl EngineEvent {
    pub fn world(&self) -> &str {
        match self {
            Self::Progress { world, .. }
            | Self::Completed { world }
            | Self::Cancelled { world }
            | Self::Failed { world, .. } => world,
        }
    }
}

/// Something that can generate the chunks named by a request.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Begin generating. Fails if a task for the same world is running.
    async fn start(&self, request: GenerationRequest) -> EngineResult<()>;

    async fn is_running(&self, world: &str) -> bool;

    /// Cancel the task for `world`. Returns false if none was running.
    async fn cancel(&self, world: &str) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_plan() {
        let selection = Selection::new("world", 8.0, -8.0, 64.0).with_shape("circle");
        let plan = ChunkPlan::build(&selection, 0, 1);
        let request = GenerationRequest::new(&selection, &plan, "csv=chunkfleet_0", PathBuf::from("/tmp/x.csv"));

        assert_eq!(request.world, "world");
        assert_eq!(request.shape, Shape::Circle);
        assert_eq!(request.total_chunks, plan.chunk_count);
        assert_eq!(request.selector, "csv=chunkfleet_0");
    }

    #[test]
    fn test_event_world() {
        let event = EngineEvent::Failed {
            world: "w".to_string(),
            error: "boom".to_string(),
        };
        assert_eq!(event.world(), "w");
    }

    #[test]
    fn test_engine_error_display() {
        assert_eq!(
            EngineError::AlreadyRunning("world".to_string()).to_string(),
            "Generation already running for world"
        );
    }
}
