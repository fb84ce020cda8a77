//! Durable task store: the single source of truth for job lifecycle state.

pub mod sqlite;
pub mod task;

pub use sqlite::{QueueStats, TaskStore};
pub use task::{
    ChunkRecord, ChunkStatus, PipelineResult, StageTiming, SubmitOptions, Task, TaskSnapshot,
    TaskStatus,
};
