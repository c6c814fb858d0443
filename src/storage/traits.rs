//! Backend contract shared by the indexed and flat stores.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ExportDocument, ImageRecord, ImportSummary, Recipe, RecipeDraft, RecipePatch, SearchQuery};
use crate::error::{Result, StoreError};
use crate::stats::Stats;

/// Which persistence mechanism a backend uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Structured store with per-record rows and secondary indexes
    #[default]
    Indexed,
    /// Single serialized blob in a size-capped key-value store
    Flat,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Indexed, BackendKind::Flat];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Indexed => "indexed",
            BackendKind::Flat => "flat",
        }
    }

    /// Advisory capacity of the backend (not measured)
    pub fn capacity_hint(&self) -> &'static str {
        match self {
            BackendKind::Indexed => "50MB-1GB+",
            BackendKind::Flat => "5-10MB",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "indexed" | "indexeddb" | "sqlite" => Ok(BackendKind::Indexed),
            "flat" | "localstorage" | "kv" => Ok(BackendKind::Flat),
            other => Err(StoreError::InvalidInput(format!("unknown backend: {}", other))),
        }
    }
}

/// What a backend can do natively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Multiple named image slots per recipe, stored as separate records
    pub named_images: bool,
    /// Images are recompressed on write to respect a size ceiling
    pub compresses_images: bool,
    /// Each call runs in its own isolated transaction
    pub transactional: bool,
    /// Hard ceiling on total stored bytes, if any
    pub quota_bytes: Option<usize>,
}

/// A recipe persistence backend.
///
/// Every method reports failure through `Result`; nothing panics across this
/// boundary. Backends log the failures they return.
///
/// Image operations on a backend without `named_images` degrade as follows:
/// - `save_image` returns `StoreError::Unsupported`
/// - `get_image` reads the embedded `image` field for the `main` slot only
/// - `delete_image` clears the embedded field for the `main` slot
/// - `get_recipe_images` synthesizes at most one `main` record from the field
#[async_trait]
pub trait RecipeBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> Capabilities;

    /// Make sure the backend can be used; idempotent.
    async fn init(&self) -> Result<()>;

    async fn get_all(&self) -> Result<Vec<Recipe>>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Recipe>>;

    /// Create a recipe with a fresh id and timestamps.
    async fn add(&self, draft: RecipeDraft) -> Result<Recipe>;

    /// Merge `patch` over an existing recipe. `NotFound` if `id` is absent.
    async fn update(&self, id: &str, patch: RecipePatch) -> Result<Recipe>;

    /// Remove a recipe and every image that references it. Missing ids are not an error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Full scan filtered by `query`.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Recipe>> {
        Ok(query.apply(self.get_all().await?))
    }

    async fn save_image(&self, recipe_id: &str, data: String, image_name: &str) -> Result<ImageRecord>;

    async fn get_image(&self, recipe_id: &str, image_name: &str) -> Result<Option<String>>;

    async fn delete_image(&self, recipe_id: &str, image_name: &str) -> Result<()>;

    async fn get_recipe_images(&self, recipe_id: &str) -> Result<Vec<ImageRecord>>;

    async fn stats(&self) -> Result<Stats>;

    async fn clear_all(&self) -> Result<()>;

    async fn export_all(&self) -> Result<ExportDocument>;

    /// Replace everything with the document's contents, re-keying every record.
    async fn import_replace_all(&self, doc: ExportDocument) -> Result<ImportSummary>;
}
