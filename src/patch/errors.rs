use crate::bind::BindError;
use crate::fragment::InstantiateError;
use crate::part::PartError;
use crate::patch::schema::OperationKind;
use crate::select::SelectError;
use crate::token::UnresolvedToken;
use crate::tree::TreeError;
use thiserror::Error;

/// Failure of a single operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("'{key}' is not defined in registry {table}")]
    UnknownRef { table: &'static str, key: String },

    #[error("target '{key}' matched no nodes")]
    TargetNotFound { key: String },

    #[error("target '{key}' matched {count} nodes (expected 1)")]
    AmbiguousTarget { key: String, count: usize },

    #[error("'{key}' cannot be used here: {message}")]
    InvalidTarget { key: String, message: String },

    #[error("'{target}' still matched nothing after inserting fragment '{fragment}'")]
    EnsureFailed { target: String, fragment: String },

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error(transparent)]
    Instantiate(#[from] InstantiateError),

    #[error(transparent)]
    UnresolvedToken(#[from] UnresolvedToken),

    #[error(transparent)]
    Part(#[from] PartError),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl EngineError {
    /// Errors that an `optional` operation downgrades to a skip.
    pub fn is_match_failure(&self) -> bool {
        matches!(
            self,
            EngineError::TargetNotFound { .. } | EngineError::AmbiguousTarget { .. }
        )
    }
}

/// An operation failure, located in its patch file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("operation #{index} ({kind}) [{}]: {source}", keys.join(", "))]
pub struct PatchError {
    pub index: usize,
    pub kind: OperationKind,
    pub keys: Vec<String>,
    pub source: EngineError,
}
