//! Patch files and the operation engine that applies them.

pub mod engine;
pub mod errors;
pub mod loader;
pub mod schema;

pub use engine::{ApplyOptions, OperationOutcome, OperationResult, PatchReport, PatchSession};
pub use errors::{EngineError, PatchError};
pub use loader::{discover, load_for_registry, load_from_path, load_from_str, ConfigError};
pub use schema::{
    OperationKind, OperationRecord, PatchDocument, PatchFile, PatchMeta, PatchOperation, Payload,
    Placement, ValidationError, ValidationIssue,
};
