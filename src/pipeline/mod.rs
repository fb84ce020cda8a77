//! The transcription pipeline: chunk planning, parallel transcription,
//! reassembly, and the workers that drive tasks through every stage.

pub mod assembler;
pub mod chunker;
pub mod orchestrator;
pub mod worker;

pub use assembler::{Assembler, ChunkText};
pub use chunker::{ChunkSpec, Chunker};
pub use orchestrator::{ChunkOrchestrator, ChunkRun};
pub use worker::{Dispatcher, DispatcherHandle};
