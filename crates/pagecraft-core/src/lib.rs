//! Core domain of the pagecraft image generation orchestrator.
//!
//! This crate defines the provider-agnostic pieces: the generator
//! contract, the retry policy, the provider registry, per-task state
//! tracking and the orchestration engine that ties them together. The
//! concrete HTTP providers and the file-backed image store live in the
//! `pagecraft-providers` and `pagecraft-storage` crates.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod generator;
pub mod ports;
pub mod registry;
pub mod retry;
pub mod state;
pub mod task;

// Re-export the common entry points
pub use config::{EndpointType, ProviderConfig};
pub use engine::Engine;
pub use error::{EngineError, ErrorKind, ProviderError, Result};
pub use event::{GenerationEvent, PageOutcome};
pub use generator::{ImageGenerator, ImageRequest};
pub use ports::{ImageStore, MemoryImageStore, NoopCompressor, ReferenceCompressor};
pub use registry::ProviderRegistry;
pub use retry::{RetryError, RetryPolicy};
pub use state::{PageStatus, TaskStateStore, TaskStateView};
pub use task::{GenerationTask, Page};
