//! recipebox - a recipe catalog with two interchangeable storage backends
//!
//! Recipes and their photos live either in an indexed SQLite store or in a
//! flat, size-capped key-value store that recompresses photos on write. The
//! `StorageEngine` routes calls to the active backend and migrates data
//! between the two.

pub mod config;
pub mod domain;
pub mod error;
pub mod id;
pub mod imaging;
pub mod stats;
pub mod storage;

pub use error::{OrNeutral, Result, StoreError};
