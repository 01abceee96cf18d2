//! Stage-boundary error types.
//!
//! Replaces the original's exception-as-control-flow: every ingestion/
//! enrichment stage returns one of these instead of raising, so only
//! `TransientIo`/`Store`/`Db` trigger retry-with-backoff — everything
//! else is a clean drop (see spec.md §9).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line did not match either DX spot grammar")]
    NoMatch,
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("frequency {0} kHz is not within any known band")]
    NoBand(f64),
}

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("no locator resolvable for callsign {0}")]
    Unresolvable(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key-value store error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("relational store error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for environment variable {0}: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Db(#[from] DbError),
}
