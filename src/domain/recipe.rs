//! Recipe record and its write-side companions
//!
//! A `Recipe` is only ever created from a `RecipeDraft` by a backend (which
//! assigns the id and timestamps) and only ever changed by applying a
//! `RecipePatch`. Fields the engine does not know about (ingredients, steps,
//! servings, ...) ride along untouched in `fields`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::id::{generate_id, next_timestamp, now};

/// Keys owned by typed columns. They never live in `fields`, or the
/// flattened record would serialize them twice.
const RESERVED_FIELDS: [&str; 7] = [
    "id",
    "title",
    "description",
    "category",
    "image",
    "createdAt",
    "updatedAt",
];

fn is_reserved_field(key: &str) -> bool {
    RESERVED_FIELDS.contains(&key)
}

/// A stored recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    /// Opaque unique id, assigned by the backend on add/import
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: String,

    /// Free-form label used for filtering
    #[serde(default)]
    pub category: String,

    /// Inline data-URL photo. Canonical on the flat backend; usually empty on the indexed one.
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default = "now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "now")]
    pub updated_at: DateTime<Utc>,

    /// Opaque pass-through payload
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Recipe {
    /// Materialize a draft with a fresh id and timestamps.
    pub(crate) fn create(draft: RecipeDraft) -> Self {
        let created = now();
        let mut fields = draft.fields;
        fields.retain(|key, _| {
            let reserved = is_reserved_field(key);
            if reserved {
                log::warn!("Dropping reserved field '{}' from new recipe", key);
            }
            !reserved
        });
        Self {
            id: generate_id(),
            title: draft.title,
            description: draft.description,
            category: draft.category,
            image: draft.image.filter(|i| !i.is_empty()),
            created_at: created,
            updated_at: created,
            fields,
        }
    }

    /// Shallow-merge a patch over this record and refresh `updated_at`.
    ///
    /// `id` and `created_at` never change.
    pub(crate) fn apply_patch(&mut self, patch: RecipePatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(image) = patch.image {
            self.image = if image.is_empty() { None } else { Some(image) };
        }
        for (key, value) in patch.fields {
            if is_reserved_field(&key) {
                log::warn!("Ignoring reserved field '{}' in update of {}", key, self.id);
                continue;
            }
            self.fields.insert(key, value);
        }
        self.updated_at = next_timestamp(self.updated_at);
    }

    /// Strip identity so the record can be re-added elsewhere.
    pub fn into_draft(self) -> RecipeDraft {
        RecipeDraft {
            title: self.title,
            description: self.description,
            category: self.category,
            image: self.image,
            fields: self.fields,
        }
    }

    /// True if the recipe carries an inline image
    pub fn has_image(&self) -> bool {
        self.image.as_deref().is_some_and(crate::imaging::is_inline_image)
    }
}

/// Input for creating a recipe
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RecipeDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set an extra field. Typed keys are routed to their fields; identity
    /// and timestamp keys are dropped.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        match key.as_str() {
            "title" => self.title = field_text(value),
            "description" => self.description = field_text(value),
            "category" => self.category = field_text(value),
            "image" => self.image = Some(field_text(value)).filter(|i| !i.is_empty()),
            "id" | "createdAt" | "updatedAt" => log::warn!("Ignoring reserved field '{}' on draft", key),
            _ => {
                self.fields.insert(key, value);
            }
        }
        self
    }
}

/// Partial update; `None` leaves a field alone.
///
/// An empty `image` string removes the photo.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RecipePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn clear_image(mut self) -> Self {
        self.image = Some(String::new());
        self
    }

    /// Like `RecipeDraft::field`, except an empty `image` clears the photo.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        match key.as_str() {
            "title" => self.title = Some(field_text(value)),
            "description" => self.description = Some(field_text(value)),
            "category" => self.category = Some(field_text(value)),
            "image" => self.image = Some(field_text(value)),
            "id" | "createdAt" | "updatedAt" => log::warn!("Ignoring reserved field '{}' on patch", key),
            _ => {
                self.fields.insert(key, value);
            }
        }
        self
    }
}

fn field_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Keyword/category filter shared by both backends.
///
/// Keyword matches title OR description, case-insensitively. Category is exact.
/// Either side left empty acts as a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    keyword: Option<String>,
    category: Option<String>,
}

impl SearchQuery {
    pub fn new(keyword: Option<&str>, category: Option<&str>) -> Self {
        Self {
            keyword: keyword
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_lowercase),
            category: category.filter(|c| !c.is_empty()).map(str::to_string),
        }
    }

    pub fn keyword(keyword: &str) -> Self {
        Self::new(Some(keyword), None)
    }

    pub fn category(category: &str) -> Self {
        Self::new(None, Some(category))
    }

    pub fn matches(&self, recipe: &Recipe) -> bool {
        let keyword_ok = match &self.keyword {
            None => true,
            Some(k) => {
                recipe.title.to_lowercase().contains(k.as_str())
                    || recipe.description.to_lowercase().contains(k.as_str())
            }
        };
        let category_ok = match &self.category {
            None => true,
            Some(c) => recipe.category == *c,
        };
        keyword_ok && category_ok
    }

    /// Filter a full scan down to the matching records
    pub fn apply(&self, recipes: Vec<Recipe>) -> Vec<Recipe> {
        recipes.into_iter().filter(|r| self.matches(r)).collect()
    }
}

/// The flat store historically wrote `""` for "no image"
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Older flat collections may hold numeric ids
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!("invalid recipe id: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn soup() -> Recipe {
        Recipe::create(
            RecipeDraft::new("Tomato Soup")
                .description("A warm bowl")
                .category("starter")
                .field("servings", 4),
        )
    }

    #[test]
    fn test_create_assigns_identity() {
        let recipe = soup();
        assert!(!recipe.id.is_empty());
        assert_eq!(recipe.created_at, recipe.updated_at);
        assert_eq!(recipe.fields.get("servings"), Some(&json!(4)));
        assert!(recipe.image.is_none());
    }

    #[test]
    fn test_create_drops_empty_image() {
        let recipe = Recipe::create(RecipeDraft::new("x").image(""));
        assert!(recipe.image.is_none());
    }

    #[test]
    fn test_apply_patch_preserves_identity() {
        let mut recipe = soup();
        let before = recipe.clone();

        recipe.apply_patch(RecipePatch::new().title("X"));

        assert_eq!(recipe.id, before.id);
        assert_eq!(recipe.created_at, before.created_at);
        assert_eq!(recipe.title, "X");
        assert_eq!(recipe.description, before.description);
        assert_eq!(recipe.category, before.category);
        assert_eq!(recipe.fields, before.fields);
        assert!(recipe.updated_at > before.updated_at);
    }

    #[test]
    fn test_apply_patch_clears_image() {
        let mut recipe = Recipe::create(RecipeDraft::new("x").image("data:image/jpeg;base64,AAAA"));
        assert!(recipe.image.is_some());
        recipe.apply_patch(RecipePatch::new().clear_image());
        assert!(recipe.image.is_none());
    }

    #[test]
    fn test_apply_patch_overwrites_extra_fields() {
        let mut recipe = soup();
        recipe.apply_patch(RecipePatch::new().field("servings", 6).field("spicy", true));
        assert_eq!(recipe.fields.get("servings"), Some(&json!(6)));
        assert_eq!(recipe.fields.get("spicy"), Some(&json!(true)));
    }

    #[test]
    fn test_draft_field_routes_typed_keys() {
        let draft = RecipeDraft::new("x")
            .field("title", "Soup")
            .field("category", "starter")
            .field("image", "");
        assert_eq!(draft.title, "Soup");
        assert_eq!(draft.category, "starter");
        assert!(draft.image.is_none());
        assert!(draft.fields.is_empty());
    }

    #[test]
    fn test_create_drops_identity_fields() {
        let recipe = Recipe::create(
            RecipeDraft::new("x")
                .field("id", "evil")
                .field("createdAt", "2000-01-01T00:00:00Z")
                .field("servings", 2),
        );
        assert_ne!(recipe.id, "evil");
        assert_eq!(recipe.fields.len(), 1);

        // Fields injected past the builder are still dropped
        let mut draft = RecipeDraft::new("y");
        draft.fields.insert("updatedAt".to_string(), json!("2000-01-01T00:00:00Z"));
        let recipe = Recipe::create(draft);
        assert!(recipe.fields.is_empty());

        let json = serde_json::to_string(&recipe).unwrap();
        assert_eq!(json.matches("\"updatedAt\"").count(), 1);
        let back: Recipe = serde_json::from_str(&json).unwrap();
        assert_eq!(back, recipe);
    }

    #[test]
    fn test_apply_patch_ignores_identity_fields() {
        let mut recipe = soup();
        let before = recipe.clone();

        recipe.apply_patch(RecipePatch::new().field("id", "evil").field("createdAt", "2000-01-01T00:00:00Z"));
        assert_eq!(recipe.id, before.id);
        assert_eq!(recipe.created_at, before.created_at);
        assert_eq!(recipe.fields, before.fields);

        let mut patch = RecipePatch::new();
        patch.fields.insert("id".to_string(), json!("evil"));
        patch.fields.insert("updatedAt".to_string(), json!(0));
        recipe.apply_patch(patch);
        assert_eq!(recipe.id, before.id);
        assert_eq!(recipe.fields, before.fields);

        let json = serde_json::to_string(&recipe).unwrap();
        assert_eq!(serde_json::from_str::<Recipe>(&json).unwrap(), recipe);
    }

    #[test]
    fn test_patch_field_routes_typed_keys() {
        let mut recipe = Recipe::create(RecipeDraft::new("x").image("data:image/jpeg;base64,AAAA"));
        recipe.apply_patch(
            RecipePatch::new()
                .field("title", "Stew")
                .field("description", "Hearty")
                .field("image", ""),
        );
        assert_eq!(recipe.title, "Stew");
        assert_eq!(recipe.description, "Hearty");
        assert!(recipe.image.is_none());
        assert!(recipe.fields.is_empty());
    }

    #[test]
    fn test_serialization_uses_camel_case() {
        let recipe = soup();
        let value = serde_json::to_value(&recipe).unwrap();
        assert!(value.get("createdAt").is_some());
        assert!(value.get("updatedAt").is_some());
        assert_eq!(value.get("servings"), Some(&json!(4)));
        assert!(value.get("image").is_none());
    }

    #[test]
    fn test_deserialize_legacy_flat_record() {
        let value = json!({
            "id": 1712345,
            "title": "Pancakes",
            "description": "Fluffy",
            "category": "breakfast",
            "image": "",
            "createdAt": "2024-01-01T00:00:00.000Z",
            "updatedAt": "2024-01-02T00:00:00.000Z",
            "ingredients": ["flour", "milk"]
        });
        let recipe: Recipe = serde_json::from_value(value).unwrap();
        assert_eq!(recipe.id, "1712345");
        assert!(recipe.image.is_none());
        assert_eq!(recipe.fields.get("ingredients"), Some(&json!(["flour", "milk"])));
        assert!(recipe.updated_at > recipe.created_at);
    }

    #[test]
    fn test_search_keyword_matches_title_or_description() {
        let recipe = soup();
        assert!(SearchQuery::keyword("SOUP").matches(&recipe));
        assert!(SearchQuery::keyword("warm").matches(&recipe));
        assert!(!SearchQuery::keyword("cake").matches(&recipe));
    }

    #[test]
    fn test_search_category_is_exact() {
        let recipe = soup();
        assert!(SearchQuery::category("starter").matches(&recipe));
        assert!(!SearchQuery::category("Starter").matches(&recipe));
        assert!(!SearchQuery::category("start").matches(&recipe));
    }

    #[test]
    fn test_search_empty_terms_are_wildcards() {
        let recipe = soup();
        assert!(SearchQuery::new(Some(""), Some("")).matches(&recipe));
        assert!(SearchQuery::new(None, None).matches(&recipe));
        assert!(SearchQuery::new(Some("soup"), Some("starter")).matches(&recipe));
        assert!(!SearchQuery::new(Some("soup"), Some("dessert")).matches(&recipe));
    }
}
