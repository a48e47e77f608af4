use std::fmt;

use thiserror::Error;

/// Kind of record a `NotFound` error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Unit,
    User,
    Venue,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Unit => "redeemable unit",
            Entity::User => "user",
            Entity::Venue => "venue",
        })
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0} {1} not found")]
    NotFound(Entity, String),

    #[error("redeemable unit {0} has already been used")]
    AlreadyUsed(String),

    #[error("redeemable unit {0} has expired")]
    Expired(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("could not generate a unique identifier after {0} attempts")]
    GenerationExhausted(u32),

    #[error("insufficient balance: available={available}, requested={requested}")]
    InsufficientBalance { available: i64, requested: i64 },

    #[error("venue {0} is not active")]
    InactiveVenue(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
}

impl LedgerError {
    /// Storage failures abort the unit of work and may be retried by the caller.
    /// Everything else is a validation outcome that a retry would reproduce.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Database(_) | LedgerError::Pool(_))
    }

    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::NotFound(..) => "not_found",
            LedgerError::AlreadyUsed(_) => "already_used",
            LedgerError::Expired(_) => "expired",
            LedgerError::InvalidValue(_) => "invalid_value",
            LedgerError::GenerationExhausted(_) => "generation_exhausted",
            LedgerError::InsufficientBalance { .. } => "insufficient_balance",
            LedgerError::InactiveVenue(_) => "inactive_venue",
            LedgerError::Database(_) | LedgerError::Pool(_) => "storage_unavailable",
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
