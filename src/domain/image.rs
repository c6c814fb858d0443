//! Image records
//!
//! Images belong to a recipe by back-reference only: the recipe does not list
//! its images, the relation is rebuilt by looking up `recipe_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{image_id, now};

/// Name of the default image slot
pub const MAIN_IMAGE: &str = "main";

/// A named image attached to a recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    /// Always `{recipe_id}_{image_name}`
    pub id: String,
    pub recipe_id: String,
    #[serde(default = "main_slot")]
    pub image_name: String,
    /// Inline data-URL payload
    pub data: String,
    #[serde(default = "now")]
    pub created_at: DateTime<Utc>,
}

fn main_slot() -> String {
    MAIN_IMAGE.to_string()
}

impl ImageRecord {
    /// Build a record for the given slot, deriving its id.
    pub fn new(recipe_id: &str, image_name: &str, data: String) -> Self {
        Self {
            id: image_id(recipe_id, image_name),
            recipe_id: recipe_id.to_string(),
            image_name: image_name.to_string(),
            data,
            created_at: now(),
        }
    }

    /// Move the record under another recipe, keeping the slot and payload.
    pub fn reassign(mut self, recipe_id: &str) -> Self {
        self.id = image_id(recipe_id, &self.image_name);
        self.recipe_id = recipe_id.to_string();
        self.created_at = now();
        self
    }

    pub fn is_main(&self) -> bool {
        self.image_name == MAIN_IMAGE
    }
}
