//! # Careline Store
//!
//! Key-value persistence substrate for Careline. The rest of the platform
//! treats this interface as the single source of truth for its records:
//! plain `get`/`set`/`delete` plus a `compare_and_swap` primitive for the
//! callers that need atomic read-modify-write without assuming the backend
//! offers transactions.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use careline_store::{KeyValueStore, MemoryStore};
//!
//! let store = MemoryStore::shared();
//! store.set("greeting", serde_json::json!("hello"), None).await?;
//! ```

mod error;
mod kv;
mod memory;

pub use error::{StoreError, StoreResult};
pub use kv::KeyValueStore;
pub use memory::MemoryStore;
