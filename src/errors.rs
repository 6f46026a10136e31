//! Typed error hierarchy for the tasklane client.
//!
//! Three top-level enums cover the three subsystems:
//! - `GatewayError` — transport and backend failures from the data gateway
//! - `StoreError` — entity-store action failures (validation or gateway)
//! - `AuthError` — auth-session failures, including the persisted session file

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the remote data gateway. No operation retries internally;
/// every failure surfaces immediately to the caller.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Change feed for {table} ended unexpectedly")]
    FeedClosed { table: &'static str },
}

/// Field-level validation failures, caught before any network call.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("List name is required")]
    NameRequired,

    #[error("List name must be at most 100 characters (got {len})")]
    NameTooLong { len: usize },

    #[error("Description must be at most 500 characters (got {len})")]
    DescriptionTooLong { len: usize },

    #[error("Invalid color format: {value}")]
    InvalidColor { value: String },

    #[error("Task title is required")]
    TitleRequired,
}

/// Errors from an entity-store action.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("No list is selected")]
    NoListSelected,
}

/// Errors from the auth session store.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Failed to read session file at {path}: {source}")]
    SessionRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write session file at {path}: {source}")]
    SessionWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
