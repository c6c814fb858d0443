//! Derived, read-only views over a backend's contents.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::Recipe;
use crate::storage::{BackendKind, Capabilities};

/// How many recipes `Stats::recent` keeps
pub const RECENT_LIMIT: usize = 5;

/// Catalog statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total: usize,
    /// Distinct category labels
    pub categories: BTreeSet<String>,
    /// Most recently updated recipes, newest first
    pub recent: Vec<Recipe>,
    /// Approximate footprint in KB
    pub storage_size_kb: f64,
    pub image_count: usize,
}

impl Stats {
    pub fn from_recipes(mut recipes: Vec<Recipe>, image_count: usize, storage_size_kb: f64) -> Self {
        let total = recipes.len();
        let categories = recipes.iter().map(|r| r.category.clone()).collect();
        recipes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        recipes.truncate(RECENT_LIMIT);
        Self {
            total,
            categories,
            recent: recipes,
            storage_size_kb,
            image_count,
        }
    }
}

/// Diagnostics for the storage engine as a whole
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub active: BackendKind,
    pub indexed_available: bool,
    pub capabilities: Capabilities,
    pub stats: Stats,
    pub flat_capacity: &'static str,
    pub indexed_capacity: &'static str,
}
