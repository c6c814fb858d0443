//! Export/import document shared by both backends

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::image::ImageRecord;
use super::recipe::Recipe;
use crate::error::{Result, StoreError};
use crate::id::now;

/// `{ recipes, images, exportDate }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub recipes: Vec<Recipe>,
    #[serde(default)]
    pub images: Vec<ImageRecord>,
    #[serde(default = "now")]
    pub export_date: DateTime<Utc>,
}

impl ExportDocument {
    pub fn new(recipes: Vec<Recipe>, images: Vec<ImageRecord>) -> Self {
        Self {
            recipes,
            images,
            export_date: now(),
        }
    }

    /// Parse a document produced by either backend.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StoreError::InvalidInput(format!("malformed export document: {}", e)))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// What an import actually wrote
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub recipes: usize,
    pub images: usize,
    /// Images whose recipe was not part of the document
    pub orphaned_images: usize,
}
