// Firewall Reconciler - Errors
// Copyright (C) 2026 Christos Daggas
// SPDX-License-Identifier: MIT

//! Error type shared by the firewall API, the entities and the parser.

use std::io;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The firewall does not know a zone or service with this name.
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// Firewall tooling is not installed or not usable in this environment.
    #[error("firewall unavailable: {0}")]
    Unavailable(String),

    /// A non-query command exited with a nonzero status.
    #[error("`{command}` failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("`{command}` timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed definition text.
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("invalid {field} value '{value}'")]
    InvalidValue { field: &'static str, value: String },
}

impl Error {
    pub fn service_not_found(name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "Service",
            name: name.into(),
        }
    }

    pub fn zone_not_found(name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "Zone",
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
