use thiserror::Error;

use crate::db::StoreError;
use crate::models::SessionError;
use crate::srs::SrsError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Srs(#[from] SrsError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl AppError {
    pub fn not_found(kind: &'static str, id: &str) -> Self {
        AppError::NotFound { kind, id: id.to_string() }
    }
}

pub type AppResult<T> = Result<T, AppError>;
