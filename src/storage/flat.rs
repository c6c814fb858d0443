//! Flat backend: every recipe in one serialized blob.
//!
//! Reads parse the whole collection, writes rewrite it. Photos are embedded in
//! each recipe's `image` field and recompressed on the way in, since the
//! underlying key-value store has a hard size ceiling. A second key holds a
//! recipe-id keyed map that is only touched for cleanup on delete.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::kv::KvStore;
use super::traits::{BackendKind, Capabilities, RecipeBackend};
use crate::domain::{
    ExportDocument, ImageRecord, ImportSummary, MAIN_IMAGE, Recipe, RecipeDraft, RecipePatch, SearchQuery,
};
use crate::error::{Result, StoreError};
use crate::imaging::{CompressionPolicy, is_inline_image};
use crate::id::image_id;
use crate::stats::Stats;

/// Key holding the serialized recipe array
pub const RECIPES_KEY: &str = "recipe_data";

/// Key holding the recipe-id keyed housekeeping map
pub const IMAGES_KEY: &str = "recipe_images";

/// Flat single-blob backend
#[derive(Debug)]
pub struct FlatBackend {
    kv: KvStore,
    policy: CompressionPolicy,
}

impl FlatBackend {
    /// Open the backend in `dir` with a ceiling of `quota_bytes`.
    pub fn open(dir: impl AsRef<Path>, quota_bytes: usize, policy: CompressionPolicy) -> Result<Self> {
        Ok(Self {
            kv: KvStore::open(dir, quota_bytes)?,
            policy,
        })
    }

    /// Parse the stored collection. Absent or corrupt data reads as empty.
    pub fn load_recipes(&self) -> Vec<Recipe> {
        let raw = match self.kv.get_item(RECIPES_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::error!("Failed to read recipe collection: {}", e);
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            log::error!("Failed to parse recipe collection: {}", e);
            Vec::new()
        })
    }

    fn save_recipes(&self, recipes: &[Recipe]) -> Result<()> {
        let json = serde_json::to_string(recipes)?;
        self.kv
            .set_item(RECIPES_KEY, json)
            .inspect_err(|e| log::error!("Failed to save recipe collection: {}", e))
    }

    /// Run an inline image through the compression policy off the async runtime.
    async fn optimize_image(&self, image: String) -> Result<String> {
        if !is_inline_image(&image) {
            return Ok(image);
        }
        let policy = self.policy;
        Ok(tokio::task::spawn_blocking(move || policy.apply(&image)).await?)
    }

    pub fn get_recipe(&self, id: &str) -> Option<Recipe> {
        self.load_recipes().into_iter().find(|r| r.id == id)
    }

    /// Remove recipes with `id`. Returns how many were removed.
    pub fn delete_recipe(&self, id: &str) -> Result<usize> {
        let mut recipes = self.load_recipes();
        let before = recipes.len();
        recipes.retain(|r| r.id != id);
        let removed = before - recipes.len();
        self.save_recipes(&recipes)?;
        self.cleanup_recipe_images(id);
        Ok(removed)
    }

    /// Drop any housekeeping entry for `recipe_id`; failures are only logged.
    fn cleanup_recipe_images(&self, recipe_id: &str) {
        let raw = match self.kv.get_item(IMAGES_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                log::error!("Failed to read image map: {}", e);
                return;
            }
        };
        let mut images: Map<String, Value> = match serde_json::from_str(&raw) {
            Ok(images) => images,
            Err(e) => {
                log::error!("Failed to parse image map: {}", e);
                return;
            }
        };
        if images.remove(recipe_id).is_some() {
            let result = serde_json::to_string(&images)
                .map_err(StoreError::from)
                .and_then(|json| self.kv.set_item(IMAGES_KEY, json));
            if let Err(e) = result {
                log::error!("Failed to clean up images for {}: {}", recipe_id, e);
            }
        }
    }

    /// Approximate footprint of both keys in KB
    pub fn storage_size_kb(&self) -> f64 {
        let chars = self.kv.item_len(RECIPES_KEY) + self.kv.item_len(IMAGES_KEY);
        chars as f64 * 0.75 / 1024.0
    }

    pub fn compute_stats(&self) -> Stats {
        let recipes = self.load_recipes();
        let image_count = recipes.iter().filter(|r| r.has_image()).count();
        Stats::from_recipes(recipes, image_count, self.storage_size_kb())
    }

    pub fn clear(&self) -> Result<()> {
        self.kv.remove_item(RECIPES_KEY)?;
        self.kv.remove_item(IMAGES_KEY)?;
        Ok(())
    }

    /// All recipes as a pretty JSON array with images blanked
    pub fn export_without_images(&self) -> Result<String> {
        let recipes: Vec<Recipe> = self
            .load_recipes()
            .into_iter()
            .map(|mut r| {
                r.image = None;
                r
            })
            .collect();
        Ok(serde_json::to_string_pretty(&recipes)?)
    }

    /// Replace the collection with a bare JSON recipe array, re-keying every record.
    pub fn import_recipes_json(&self, json: &str) -> Result<usize> {
        let incoming: Vec<Recipe> = serde_json::from_str(json)
            .map_err(|e| StoreError::InvalidInput(format!("expected a recipe array: {}", e)))?;
        let recipes: Vec<Recipe> = incoming
            .into_iter()
            .map(|r| Recipe::create(r.into_draft()))
            .collect();
        self.save_recipes(&recipes)?;
        Ok(recipes.len())
    }

    /// The embedded photo as a synthetic `main` image record
    fn embedded_image(recipe: &Recipe) -> Option<ImageRecord> {
        recipe.image.as_ref().filter(|i| !i.is_empty()).map(|data| ImageRecord {
            id: image_id(&recipe.id, MAIN_IMAGE),
            recipe_id: recipe.id.clone(),
            image_name: MAIN_IMAGE.to_string(),
            data: data.clone(),
            created_at: recipe.created_at,
        })
    }
}

#[async_trait]
impl RecipeBackend for FlatBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Flat
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            named_images: false,
            compresses_images: true,
            transactional: false,
            quota_bytes: Some(self.kv.quota_bytes()),
        }
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Recipe>> {
        Ok(self.load_recipes())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Recipe>> {
        Ok(self.get_recipe(id))
    }

    async fn add(&self, mut draft: RecipeDraft) -> Result<Recipe> {
        if let Some(image) = draft.image.take() {
            draft.image = Some(self.optimize_image(image).await?);
        }

        let recipe = Recipe::create(draft);
        let mut recipes = self.load_recipes();
        recipes.push(recipe.clone());
        self.save_recipes(&recipes)?;

        log::debug!("Added recipe {} to flat store", recipe.id);
        Ok(recipe)
    }

    async fn update(&self, id: &str, mut patch: RecipePatch) -> Result<Recipe> {
        if self.get_recipe(id).is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }

        if let Some(image) = patch.image.take() {
            patch.image = Some(self.optimize_image(image).await?);
        }

        // Reload: compression may have yielded to other callers
        let mut recipes = self.load_recipes();
        let recipe = recipes
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        recipe.apply_patch(patch);
        let updated = recipe.clone();
        self.save_recipes(&recipes)?;
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.delete_recipe(id).map(|_| ())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Recipe>> {
        Ok(query.apply(self.load_recipes()))
    }

    async fn save_image(&self, recipe_id: &str, _data: String, image_name: &str) -> Result<ImageRecord> {
        log::warn!(
            "Flat store cannot hold named images (recipe {}, slot {})",
            recipe_id,
            image_name
        );
        Err(StoreError::Unsupported {
            backend: "flat",
            operation: "save_image",
        })
    }

    async fn get_image(&self, recipe_id: &str, image_name: &str) -> Result<Option<String>> {
        if image_name != MAIN_IMAGE {
            return Ok(None);
        }
        Ok(self.get_recipe(recipe_id).and_then(|r| r.image))
    }

    async fn delete_image(&self, recipe_id: &str, image_name: &str) -> Result<()> {
        if image_name != MAIN_IMAGE {
            return Ok(());
        }
        self.update(recipe_id, RecipePatch::new().clear_image()).await.map(|_| ())
    }

    async fn get_recipe_images(&self, recipe_id: &str) -> Result<Vec<ImageRecord>> {
        Ok(self
            .get_recipe(recipe_id)
            .and_then(|r| Self::embedded_image(&r))
            .into_iter()
            .collect())
    }

    async fn stats(&self) -> Result<Stats> {
        Ok(self.compute_stats())
    }

    async fn clear_all(&self) -> Result<()> {
        self.clear()
    }

    async fn export_all(&self) -> Result<ExportDocument> {
        let recipes = self.load_recipes();
        let images = recipes.iter().filter_map(Self::embedded_image).collect();
        Ok(ExportDocument::new(recipes, images))
    }

    async fn import_replace_all(&self, doc: ExportDocument) -> Result<ImportSummary> {
        let ExportDocument { recipes, images, .. } = doc;
        let known: HashSet<String> = recipes.iter().map(|r| r.id.clone()).collect();

        // One image per recipe fits here: prefer the main slot
        let mut summary = ImportSummary::default();
        let mut chosen: HashMap<String, ImageRecord> = HashMap::new();
        for image in images {
            if !known.contains(&image.recipe_id) {
                summary.orphaned_images += 1;
                continue;
            }
            match chosen.get(&image.recipe_id) {
                Some(existing) if existing.is_main() || !image.is_main() => {
                    log::warn!("Dropping image {} on import: flat store keeps one image per recipe", image.id);
                }
                _ => {
                    chosen.insert(image.recipe_id.clone(), image);
                }
            }
        }

        let mut imported = Vec::with_capacity(recipes.len());
        for recipe in recipes {
            let source_id = recipe.id.clone();
            let mut draft = recipe.into_draft();
            if let Some(image) = chosen.remove(&source_id) {
                draft.image = Some(image.data);
            }
            if let Some(image) = draft.image.take() {
                draft.image = Some(self.optimize_image(image).await?);
            }
            let created = Recipe::create(draft);
            if created.image.is_some() {
                summary.images += 1;
            }
            imported.push(created);
        }

        // Single write: a failed import leaves the previous collection in place
        self.save_recipes(&imported)?;
        self.kv.remove_item(IMAGES_KEY)?;
        summary.recipes = imported.len();

        log::info!(
            "Imported {} recipes ({} with images) into flat store",
            summary.recipes,
            summary.images
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::test_images::{jpeg_data_url, noisy_png, png_data_url};
    use crate::imaging::{DataUrl, decode, normalize};
    use tempfile::TempDir;

    const QUOTA: usize = 5 * 1024 * 1024;

    fn create_test_backend() -> (FlatBackend, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let backend = FlatBackend::open(temp_dir.path(), QUOTA, CompressionPolicy::default()).unwrap();
        (backend, temp_dir)
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let (backend, _temp) = create_test_backend();
        let added = backend
            .add(RecipeDraft::new("Soup").description("Hot").category("starter"))
            .await
            .unwrap();

        let fetched = backend.get_by_id(&added.id).await.unwrap().unwrap();
        assert_eq!(fetched, added);
        assert_eq!(backend.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_all_on_corrupt_blob_is_empty() {
        let (backend, _temp) = create_test_backend();
        backend.kv.set_item(RECIPES_KEY, "{not json".to_string()).unwrap();
        assert!(backend.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let (backend, _temp) = create_test_backend();
        let err = backend.update("nope", RecipePatch::new().title("x")).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(backend.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_preserves_id_and_created_at() {
        let (backend, _temp) = create_test_backend();
        let added = backend
            .add(RecipeDraft::new("Soup").description("Hot").field("serves", 2))
            .await
            .unwrap();

        let updated = backend.update(&added.id, RecipePatch::new().title("X")).await.unwrap();
        assert_eq!(updated.id, added.id);
        assert_eq!(updated.created_at, added.created_at);
        assert_eq!(updated.description, "Hot");
        assert_eq!(updated.fields, added.fields);
        assert!(updated.updated_at > added.updated_at);
        assert_eq!(backend.get_recipe(&added.id).unwrap().title, "X");
    }

    #[tokio::test]
    async fn test_delete_is_unconditional() {
        let (backend, _temp) = create_test_backend();
        let added = backend.add(RecipeDraft::new("Soup")).await.unwrap();
        backend.delete(&added.id).await.unwrap();
        backend.delete(&added.id).await.unwrap();
        assert!(backend.get_by_id(&added.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_evicts_housekeeping_entry() {
        let (backend, _temp) = create_test_backend();
        let added = backend.add(RecipeDraft::new("Soup")).await.unwrap();
        let map = format!("{{\"{}\": {{\"slots\": 1}}, \"other\": {{}}}}", added.id);
        backend.kv.set_item(IMAGES_KEY, map).unwrap();

        backend.delete(&added.id).await.unwrap();

        let remaining: Map<String, Value> =
            serde_json::from_str(&backend.kv.get_item(IMAGES_KEY).unwrap().unwrap()).unwrap();
        assert!(!remaining.contains_key(&added.id));
        assert!(remaining.contains_key("other"));
    }

    #[tokio::test]
    async fn test_add_keeps_small_jpeg_verbatim() {
        let (backend, _temp) = create_test_backend();
        let image = jpeg_data_url(32, 32);
        let added = backend.add(RecipeDraft::new("Toast").image(image.clone())).await.unwrap();
        assert_eq!(added.image, Some(image));
    }

    #[tokio::test]
    async fn test_add_oversize_image_uses_fallback_pass() {
        let temp_dir = TempDir::new().unwrap();
        let policy = CompressionPolicy {
            threshold_kb: 1.0,
            ..CompressionPolicy::default()
        };
        let backend = FlatBackend::open(temp_dir.path(), QUOTA, policy).unwrap();
        let raw = noisy_png(1000, 800);

        let added = backend.add(RecipeDraft::new("Noise").image(png_data_url(&raw))).await.unwrap();

        let stored = added.image.unwrap();
        assert_eq!(stored, normalize(&raw, &policy.fallback).unwrap());
        let decoded = decode(&DataUrl::parse(&stored).unwrap().bytes).unwrap();
        assert!(decoded.width() <= 600 && decoded.height() <= 450);
    }

    #[tokio::test]
    async fn test_add_undecodable_image_keeps_original() {
        let (backend, _temp) = create_test_backend();
        let broken = "data:image/png;base64,AAAA".to_string();
        let added = backend.add(RecipeDraft::new("x").image(broken.clone())).await.unwrap();
        assert_eq!(added.image, Some(broken));
    }

    #[tokio::test]
    async fn test_quota_exceeded_surfaces() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FlatBackend::open(temp_dir.path(), 256, CompressionPolicy::default()).unwrap();
        let err = backend
            .add(RecipeDraft::new("x").description("y".repeat(1000)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn test_search() {
        let (backend, _temp) = create_test_backend();
        backend.add(RecipeDraft::new("Pea Soup").category("starter")).await.unwrap();
        backend
            .add(RecipeDraft::new("Cake").description("not a SOUP").category("dessert"))
            .await
            .unwrap();
        backend.add(RecipeDraft::new("Pie").category("dessert")).await.unwrap();

        assert_eq!(backend.search(&SearchQuery::keyword("soup")).await.unwrap().len(), 2);
        assert_eq!(backend.search(&SearchQuery::category("dessert")).await.unwrap().len(), 2);
        assert_eq!(
            backend
                .search(&SearchQuery::new(Some("soup"), Some("dessert")))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_image_accessors_degrade() {
        let (backend, _temp) = create_test_backend();
        let image = jpeg_data_url(16, 16);
        let with = backend.add(RecipeDraft::new("a").image(image.clone())).await.unwrap();
        let without = backend.add(RecipeDraft::new("b")).await.unwrap();

        let err = backend.save_image(&with.id, image.clone(), "side").await.unwrap_err();
        assert!(matches!(err, StoreError::Unsupported { .. }));

        assert_eq!(backend.get_image(&with.id, MAIN_IMAGE).await.unwrap(), Some(image.clone()));
        assert_eq!(backend.get_image(&with.id, "side").await.unwrap(), None);

        let images = backend.get_recipe_images(&with.id).await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].id, format!("{}_main", with.id));
        assert_eq!(images[0].data, image);
        assert!(backend.get_recipe_images(&without.id).await.unwrap().is_empty());

        backend.delete_image(&with.id, MAIN_IMAGE).await.unwrap();
        assert_eq!(backend.get_image(&with.id, MAIN_IMAGE).await.unwrap(), None);

        let err = backend.delete_image("missing", MAIN_IMAGE).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stats() {
        let (backend, _temp) = create_test_backend();
        backend
            .add(RecipeDraft::new("a").category("x").image(jpeg_data_url(8, 8)))
            .await
            .unwrap();
        backend.add(RecipeDraft::new("b").category("y")).await.unwrap();

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.image_count, 1);
        assert_eq!(stats.categories.len(), 2);
        assert!(stats.storage_size_kb > 0.0);
    }

    #[tokio::test]
    async fn test_export_without_images_and_reimport() {
        let (backend, _temp) = create_test_backend();
        let added = backend
            .add(RecipeDraft::new("a").image(jpeg_data_url(8, 8)))
            .await
            .unwrap();

        let json = backend.export_without_images().unwrap();
        assert!(!json.contains("data:image"));

        assert_eq!(backend.import_recipes_json(&json).unwrap(), 1);
        let all = backend.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_ne!(all[0].id, added.id);
        assert_eq!(all[0].title, "a");
        assert!(all[0].image.is_none());

        assert!(matches!(
            backend.import_recipes_json("{}"),
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_export_synthesizes_image_records() {
        let (backend, _temp) = create_test_backend();
        backend
            .add(RecipeDraft::new("a").image(jpeg_data_url(8, 8)))
            .await
            .unwrap();
        backend.add(RecipeDraft::new("b")).await.unwrap();

        let doc = backend.export_all().await.unwrap();
        assert_eq!(doc.recipes.len(), 2);
        assert_eq!(doc.images.len(), 1);
        assert!(doc.images[0].is_main());
    }

    #[tokio::test]
    async fn test_import_merges_images_and_rekeys() {
        let (backend, _temp) = create_test_backend();
        backend.add(RecipeDraft::new("stale")).await.unwrap();

        let main = jpeg_data_url(10, 10);
        let mut a = Recipe::create(RecipeDraft::new("a"));
        a.id = "src-a".to_string();
        let mut b = Recipe::create(RecipeDraft::new("b"));
        b.id = "src-b".to_string();
        let doc = ExportDocument::new(
            vec![a, b],
            vec![
                ImageRecord::new("src-a", "side", jpeg_data_url(12, 12)),
                ImageRecord::new("src-a", MAIN_IMAGE, main.clone()),
                ImageRecord::new("ghost", MAIN_IMAGE, main.clone()),
            ],
        );

        let summary = backend.import_replace_all(doc).await.unwrap();
        assert_eq!(summary.recipes, 2);
        assert_eq!(summary.images, 1);
        assert_eq!(summary.orphaned_images, 1);

        let all = backend.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|r| !r.id.starts_with("src-")));
        let a = all.iter().find(|r| r.title == "a").unwrap();
        assert_eq!(a.image, Some(main));
        assert!(all.iter().find(|r| r.title == "b").unwrap().image.is_none());
    }

    #[tokio::test]
    async fn test_clear_all() {
        let (backend, _temp) = create_test_backend();
        backend.add(RecipeDraft::new("a")).await.unwrap();
        backend.clear_all().await.unwrap();
        assert!(backend.get_all().await.unwrap().is_empty());
        assert_eq!(backend.stats().await.unwrap().storage_size_kb, 0.0);
    }

    #[tokio::test]
    async fn test_reserved_fields_do_not_corrupt_collection() {
        let (backend, _temp) = create_test_backend();
        backend.add(RecipeDraft::new("keep me")).await.unwrap();
        let victim = backend.add(RecipeDraft::new("victim")).await.unwrap();

        let updated = backend
            .update(&victim.id, RecipePatch::new().field("id", "evil").field("updatedAt", 0))
            .await
            .unwrap();
        assert_eq!(updated.id, victim.id);

        let stamped = backend
            .add(RecipeDraft::new("stamped").field("createdAt", "2000-01-01T00:00:00Z"))
            .await
            .unwrap();
        assert!(stamped.fields.is_empty());

        let all = backend.get_all().await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().any(|r| r.title == "keep me"));
        assert!(backend.get_by_id(&victim.id).await.unwrap().is_some());
        assert!(backend.get_by_id("evil").await.unwrap().is_none());
        assert_eq!(backend.stats().await.unwrap().total, 3);
    }
}
