pub use glance_source_api::{DiffSource, SourceError, SourceOutput, SourceResult};
pub use glance_sources::{CannedSource, GitCliSource, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT};
