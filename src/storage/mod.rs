//! Recipe persistence.
//!
//! Two interchangeable backends sit behind the `RecipeBackend` trait:
//! - **indexed**: SQLite rows with secondary indexes and per-record images
//! - **flat**: one JSON blob in a size-capped key-value directory
//!
//! `StorageEngine` routes calls to whichever backend is active and moves data
//! between them.

mod engine;
mod flat;
mod indexed;
mod kv;
mod traits;

pub use engine::StorageEngine;
pub use flat::{FlatBackend, IMAGES_KEY, RECIPES_KEY};
pub use indexed::{IndexedBackend, SCHEMA_VERSION};
pub use kv::KvStore;
pub use traits::{BackendKind, Capabilities, RecipeBackend};
