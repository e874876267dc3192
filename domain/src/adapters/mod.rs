//! In-memory adapters that live inside the domain crate for convenience.
//!
//! These back unit tests and the `STORAGE_PROVIDER=memory` local mode. The
//! real adapters (Redis, local disk) live in separate crates.

pub mod memory_assets;
pub mod memory_store;
