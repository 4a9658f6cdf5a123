//! # briefroom-core
//!
//! Core types, traits, and abstractions for the briefroom ingestion pipeline.
//!
//! This crate provides the job and document models, the error type, and the
//! capability traits that the ledger, the external clients, and the executor
//! meet at.

pub mod defaults;
pub mod error;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
