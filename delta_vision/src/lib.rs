// THEORY:
// This file is the main entry point for the `delta_vision` library crate.
// It defines the public API exposed to consumers such as the `delta_tester` CLI
// or a web service that monitors pages for changes.
//
// The high-level interface is the `ComparisonPipeline` with its `ComparisonResult`
// and serializable `ImageReport`. Around it sit the `WorkerPool`, for running many
// comparisons at once, and the `PageChecker`, which adds capturing, text scoring and
// device form factors. The numeric stages live in `core_modules` and are public for
// callers that need a single stage on its own.

pub mod core_modules;
pub mod error;
pub mod page_check;
pub mod parallel_pipeline;
pub mod pipeline;

pub use core_modules::artifacts::{ArtifactRef, ArtifactStore, FsArtifactStore, MemoryArtifactStore};
pub use core_modules::session::SessionKey;
pub use error::{CompareError, PageCheckError, StorageError};
pub use pipeline::{CompareConfig, ComparisonPipeline, ComparisonResult, ImageReport};
