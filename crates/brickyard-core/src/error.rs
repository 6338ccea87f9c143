//! Crate-level error type.

use thiserror::Error;

use crate::event::EventNameError;
use crate::exec::ExecutionError;
use crate::extension::CatalogError;

/// Errors surfaced by the public API.
#[derive(Debug, Error)]
pub enum Error {
    /// Entity construction options must be a JSON object or `null`.
    #[error("entity options must be a JSON object or null")]
    InvalidOptions,

    /// The namespace exists but has no such method.
    #[error("namespace `{namespace}` has no method `{method}`")]
    UnknownMethod { namespace: String, method: String },

    /// A namespace handle outlived its module's installation.
    #[error("extension `{0}` is not installed on this entity")]
    NotInstalled(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    EventName(#[from] EventNameError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

pub type Result<T> = std::result::Result<T, Error>;
