//! Sample stores - the repository collaborator for metric samples
//!
//! The analytics pipeline reads many samples per run; this module provides
//! the trait it reads through plus the backends.
//!
//! ## Design
//!
//! - **Trait-based**: `SampleStore` allows swapping implementations
//! - **Async**: all operations are async for compatibility with Tokio actors
//! - **Batch-oriented**: writes go through `insert_batch`
//!
//! ## Backends
//!
//! - **In-memory** (default): bounded ring per server, no persistence
//! - **SQLite** (`storage-sqlite` feature): embedded database with WAL mode

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{QueryRange, SampleStore};
pub use error::{StorageError, StorageResult};
pub use schema::SampleRow;
