//! # briefroom-clients
//!
//! External service clients for the briefroom ingestion pipeline.
//!
//! This crate provides:
//! - [`SupabaseDocumentStore`]: downloads document bytes from the object
//!   storage bucket or from an external URL
//! - [`GeminiFileSearchClient`]: provisions search stores, uploads files with
//!   the resumable protocol, imports them and polls import operations
//! - Mock implementations of both (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use briefroom_clients::{GeminiFileSearchClient, SupabaseDocumentStore};
//!
//! fn main() -> briefroom_core::Result<()> {
//!     let search = GeminiFileSearchClient::from_env()?;
//!     let storage = SupabaseDocumentStore::from_env()?;
//!     Ok(())
//! }
//! ```

pub mod gemini;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod storage;

pub use gemini::{GeminiConfig, GeminiFileSearchClient};
pub use storage::{StorageConfig, SupabaseDocumentStore};
