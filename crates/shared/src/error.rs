use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::CompanyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Network,
    NotFound,
    Validation,
    Parse,
}

/// Every failure in the directory is recovered locally; this type only
/// carries what went wrong back to whoever wants to show or log it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("request failed: {0}")]
    Network(String),
    #[error("company {0} is not in the local cache")]
    NotFound(CompanyId),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("malformed backend data: {0}")]
    Parse(String),
}

impl DirectoryError {
    pub fn network(err: impl std::fmt::Display) -> Self {
        Self::Network(err.to_string())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            DirectoryError::Network(_) => ErrorCode::Network,
            DirectoryError::NotFound(_) => ErrorCode::NotFound,
            DirectoryError::Validation(_) => ErrorCode::Validation,
            DirectoryError::Parse(_) => ErrorCode::Parse,
        }
    }
}
