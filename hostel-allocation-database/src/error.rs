use core::num::TryFromIntError;
use std::env::VarError;

use diesel_async::pooled_connection::deadpool;
use hostel_allocation_core::{HostelError, StoreError};
use thiserror::Error;

#[allow(clippy::module_name_repetitions)]
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database url not set in env variable DATABASE_URL")]
    DatabaseEnvUrl(#[from] VarError),
    #[error("Failed to create database pool {0}")]
    PoolBuild(#[from] deadpool::BuildError),
    #[error("Database pool failed {0}")]
    Pool(#[from] deadpool::PoolError),
    #[error("Database query failed {0}")]
    Database(#[from] diesel::result::Error),
    #[error("Database value out of range {0}")]
    OutOfRange(#[from] TryFromIntError),
    #[error("Database holds an unexpected value: {0}")]
    Corrupt(String),
}

impl From<DatabaseError> for HostelError {
    fn from(error: DatabaseError) -> Self {
        Self::Store(StoreError::new(error))
    }
}

/// Error type of a roster transaction: diesel needs to build it from its own
/// errors, services return theirs.
#[derive(Error, Debug)]
pub(crate) enum TransactionError {
    #[error(transparent)]
    Hostel(#[from] HostelError),
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
}

impl From<TransactionError> for HostelError {
    fn from(error: TransactionError) -> Self {
        match error {
            TransactionError::Hostel(error) => error,
            TransactionError::Database(error) => DatabaseError::from(error).into(),
        }
    }
}
