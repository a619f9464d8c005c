//! Selector registry: the only place literal XML names live.

pub mod compile;
pub mod loader;
pub mod schema;
pub mod version;

pub use compile::{compile, CompileError, CompileIssue, Registry, SymbolKind};
pub use loader::{load_from_path, load_from_str, load_layers, RegistryError};
pub use schema::{RegistryDocument, RegistryMeta};
