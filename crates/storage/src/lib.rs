//! InkWorks persistence adapters.
//!
//! Implements the [`pipeline::KeyValueStore`] port that the rate limiter and
//! checkpoint store persist through.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** File layout, atomic replacement and key escaping all live
//! here. The [`pipeline`] crate sees only [`pipeline::KeyValueStore`] and
//! [`pipeline::StoreError`].
//!
//! ## Backends
//!
//! | Type | Durability | Used by |
//! |------|------------|---------|
//! | [`FileStore`] | JSON file per key, atomic rename | CLI default |
//! | [`MemoryStore`] | Process lifetime only | `--ephemeral`, tests |

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;
