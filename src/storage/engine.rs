//! Backend router.
//!
//! `StorageEngine` owns both backends and the one piece of mutable routing
//! state: which backend is active. Every catalog call is forwarded to the
//! active backend unchanged; degraded behavior on the flat store is part of
//! the `RecipeBackend` contract, so the engine adds no special cases.

use std::sync::RwLock;

use super::flat::FlatBackend;
use super::indexed::IndexedBackend;
use super::traits::{BackendKind, Capabilities, RecipeBackend};
use crate::config::Config;
use crate::domain::{ExportDocument, ImageRecord, ImportSummary, MAIN_IMAGE, Recipe, RecipeDraft, RecipePatch, SearchQuery};
use crate::error::{OrNeutral, Result};
use crate::stats::{Stats, StorageInfo};

/// Storage context shared by every caller in the process
pub struct StorageEngine {
    indexed: IndexedBackend,
    flat: FlatBackend,
    active: RwLock<BackendKind>,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("active", &self.active_backend())
            .field("indexed", &self.indexed)
            .finish_non_exhaustive()
    }
}

impl StorageEngine {
    /// Wire up both backends. The indexed backend starts out active.
    pub fn new(indexed: IndexedBackend, flat: FlatBackend) -> Self {
        Self {
            indexed,
            flat,
            active: RwLock::new(BackendKind::default()),
        }
    }

    /// Build both backends from configuration. No database is opened yet.
    pub fn open(config: &Config) -> Result<Self> {
        let storage = &config.storage;
        let indexed = IndexedBackend::new(storage.sqlite_path());
        let flat = FlatBackend::open(storage.flat_path(), storage.flat_quota_bytes(), config.images)?;
        log::debug!("Storage engine rooted at {}", storage.data_dir.display());
        Ok(Self::new(indexed, flat))
    }

    pub fn indexed(&self) -> &IndexedBackend {
        &self.indexed
    }

    pub fn flat(&self) -> &FlatBackend {
        &self.flat
    }

    // ---- selection ----

    /// The backend every dispatched call currently goes to
    pub fn active_backend(&self) -> BackendKind {
        match self.active.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn select(&self, kind: BackendKind) {
        let mut guard = match self.active.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard != kind {
            log::info!("Switching storage backend: {} -> {}", *guard, kind);
            *guard = kind;
        }
    }

    /// Switch by name. Unknown names leave the selection alone.
    ///
    /// Returns the backend that is active afterwards.
    pub fn select_backend(&self, name: &str) -> BackendKind {
        match name.parse::<BackendKind>() {
            Ok(kind) => self.select(kind),
            Err(e) => log::warn!("Ignoring backend selection: {}", e),
        }
        self.active_backend()
    }

    /// Probe the indexed backend and fall back to flat if it cannot be opened.
    pub async fn detect_and_select_best_backend(&self) -> BackendKind {
        match self.indexed.init().await {
            Ok(()) => self.select(BackendKind::Indexed),
            Err(e) => {
                log::warn!("Indexed backend unavailable, falling back to flat: {}", e);
                self.select(BackendKind::Flat);
            }
        }
        self.active_backend()
    }

    pub fn backend_for(&self, kind: BackendKind) -> &dyn RecipeBackend {
        match kind {
            BackendKind::Indexed => &self.indexed,
            BackendKind::Flat => &self.flat,
        }
    }

    /// The active backend
    pub fn backend(&self) -> &dyn RecipeBackend {
        self.backend_for(self.active_backend())
    }

    pub fn capabilities(&self) -> Capabilities {
        self.backend().capabilities()
    }

    // ---- catalog ----

    pub async fn get_all_recipes(&self) -> Result<Vec<Recipe>> {
        self.backend().get_all().await
    }

    pub async fn get_recipe_by_id(&self, id: &str) -> Result<Option<Recipe>> {
        self.backend().get_by_id(id).await
    }

    pub async fn add_recipe(&self, draft: RecipeDraft) -> Result<Recipe> {
        self.backend().add(draft).await
    }

    pub async fn update_recipe(&self, id: &str, patch: RecipePatch) -> Result<Recipe> {
        self.backend().update(id, patch).await
    }

    pub async fn delete_recipe(&self, id: &str) -> Result<()> {
        self.backend().delete(id).await
    }

    pub async fn search_recipes(&self, keyword: Option<&str>, category: Option<&str>) -> Result<Vec<Recipe>> {
        self.backend().search(&SearchQuery::new(keyword, category)).await
    }

    // ---- images ----

    /// Store `data` in the named slot, `main` if `image_name` is `None`.
    pub async fn save_image(&self, recipe_id: &str, data: String, image_name: Option<&str>) -> Result<ImageRecord> {
        self.backend()
            .save_image(recipe_id, data, image_name.unwrap_or(MAIN_IMAGE))
            .await
    }

    pub async fn get_image(&self, recipe_id: &str, image_name: Option<&str>) -> Result<Option<String>> {
        self.backend()
            .get_image(recipe_id, image_name.unwrap_or(MAIN_IMAGE))
            .await
    }

    pub async fn delete_image(&self, recipe_id: &str, image_name: Option<&str>) -> Result<()> {
        self.backend()
            .delete_image(recipe_id, image_name.unwrap_or(MAIN_IMAGE))
            .await
    }

    pub async fn get_recipe_images(&self, recipe_id: &str) -> Result<Vec<ImageRecord>> {
        self.backend().get_recipe_images(recipe_id).await
    }

    pub async fn get_stats(&self) -> Result<Stats> {
        self.backend().stats().await
    }

    pub async fn clear_all_data(&self) -> Result<()> {
        self.backend().clear_all().await
    }

    // ---- transfer ----

    pub async fn export_data(&self) -> Result<ExportDocument> {
        self.backend().export_all().await
    }

    /// Export as a pretty-printed JSON document
    pub async fn export_json(&self) -> Result<String> {
        self.export_data().await?.to_json_pretty()
    }

    /// Replace the active backend's contents with `doc`
    pub async fn import_data(&self, doc: ExportDocument) -> Result<ImportSummary> {
        self.backend().import_replace_all(doc).await
    }

    pub async fn import_json(&self, json: &str) -> Result<ImportSummary> {
        let doc = ExportDocument::from_json(json)?;
        self.import_data(doc).await
    }

    /// Copy everything from `from` into `to` and leave `to` active.
    ///
    /// On failure the previous selection is restored, so the engine never ends
    /// up pointed at a half-filled target.
    pub async fn migrate_data(&self, from: BackendKind, to: BackendKind) -> Result<ImportSummary> {
        let previous = self.active_backend();
        log::info!("Migrating recipes from {} to {}", from, to);

        self.select(from);
        let exported = match self.export_data().await {
            Ok(doc) => doc,
            Err(e) => {
                log::error!("Migration export from {} failed: {}", from, e);
                self.select(previous);
                return Err(e);
            }
        };

        self.select(to);
        match self.import_data(exported).await {
            Ok(summary) => {
                log::info!(
                    "Migrated {} recipes and {} images to {}",
                    summary.recipes,
                    summary.images,
                    to
                );
                Ok(summary)
            }
            Err(e) => {
                log::error!("Migration import into {} failed: {}", to, e);
                self.select(previous);
                Err(e)
            }
        }
    }

    /// Diagnostics snapshot. Capacity figures are advisory constants.
    pub async fn storage_info(&self) -> StorageInfo {
        let indexed_available = self.indexed.init().await.is_ok();
        StorageInfo {
            active: self.backend().kind(),
            indexed_available,
            capabilities: self.capabilities(),
            stats: self.get_stats().await.or_neutral(),
            flat_capacity: BackendKind::Flat.capacity_hint(),
            indexed_capacity: BackendKind::Indexed.capacity_hint(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::error::StoreError;
    use crate::imaging::CompressionPolicy;
    use tempfile::TempDir;

    fn create_test_engine() -> (StorageEngine, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            storage: StorageConfig::in_dir(temp_dir.path()),
            ..Config::default()
        };
        (StorageEngine::open(&config).unwrap(), temp_dir)
    }

    /// Engine whose indexed backend points beneath a regular file
    fn create_broken_engine() -> (StorageEngine, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let indexed = IndexedBackend::new(blocker.join("recipes.db"));
        let flat = FlatBackend::open(temp_dir.path().join("flat"), 1024 * 1024, CompressionPolicy::default()).unwrap();
        (StorageEngine::new(indexed, flat), temp_dir)
    }

    #[test]
    fn test_default_selection_is_indexed() {
        let (engine, _temp) = create_test_engine();
        assert_eq!(engine.active_backend(), BackendKind::Indexed);
        assert!(!engine.indexed().is_open());
    }

    #[test]
    fn test_dispatch_targets_matching_backend() {
        let (engine, _temp) = create_test_engine();
        for kind in BackendKind::ALL {
            engine.select(kind);
            assert_eq!(engine.backend_for(kind).kind(), kind);
            assert_eq!(engine.backend().kind(), kind);
        }
    }

    #[test]
    fn test_select_backend_ignores_unknown() {
        let (engine, _temp) = create_test_engine();
        assert_eq!(engine.select_backend("flat"), BackendKind::Flat);
        assert_eq!(engine.select_backend("memcached"), BackendKind::Flat);
        assert_eq!(engine.select_backend(""), BackendKind::Flat);
        assert_eq!(engine.select_backend("indexed"), BackendKind::Indexed);
    }

    #[tokio::test]
    async fn test_detect_prefers_indexed() {
        let (engine, _temp) = create_test_engine();
        engine.select(BackendKind::Flat);
        assert_eq!(engine.detect_and_select_best_backend().await, BackendKind::Indexed);
        assert!(engine.indexed().is_open());
    }

    #[tokio::test]
    async fn test_detect_falls_back_to_flat() {
        let (engine, _temp) = create_broken_engine();
        assert_eq!(engine.detect_and_select_best_backend().await, BackendKind::Flat);

        let added = engine.add_recipe(RecipeDraft::new("Still works")).await.unwrap();
        assert_eq!(engine.get_all_recipes().await.unwrap(), vec![added]);
    }

    #[tokio::test]
    async fn test_dispatch_follows_selection() {
        let (engine, _temp) = create_test_engine();
        engine.add_recipe(RecipeDraft::new("in indexed")).await.unwrap();

        engine.select(BackendKind::Flat);
        assert!(engine.get_all_recipes().await.unwrap().is_empty());
        assert!(!engine.capabilities().named_images);

        engine.select(BackendKind::Indexed);
        assert_eq!(engine.get_all_recipes().await.unwrap().len(), 1);
        assert!(engine.capabilities().named_images);
    }

    #[tokio::test]
    async fn test_image_slot_defaults_to_main() {
        let (engine, _temp) = create_test_engine();
        let recipe = engine.add_recipe(RecipeDraft::new("x")).await.unwrap();

        let saved = engine.save_image(&recipe.id, "pic".to_string(), None).await.unwrap();
        assert!(saved.is_main());
        assert_eq!(
            engine.get_image(&recipe.id, Some(MAIN_IMAGE)).await.unwrap(),
            Some("pic".to_string())
        );

        engine.delete_image(&recipe.id, None).await.unwrap();
        assert_eq!(engine.get_image(&recipe.id, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_migrate_switches_to_target() {
        let (engine, _temp) = create_test_engine();
        engine.add_recipe(RecipeDraft::new("a")).await.unwrap();

        let summary = engine
            .migrate_data(BackendKind::Indexed, BackendKind::Flat)
            .await
            .unwrap();
        assert_eq!(summary.recipes, 1);
        assert_eq!(engine.active_backend(), BackendKind::Flat);
        assert_eq!(engine.get_all_recipes().await.unwrap()[0].title, "a");
    }

    #[tokio::test]
    async fn test_failed_migration_restores_selection() {
        let (engine, _temp) = create_broken_engine();
        engine.select(BackendKind::Flat);
        engine.add_recipe(RecipeDraft::new("a")).await.unwrap();

        let err = engine
            .migrate_data(BackendKind::Flat, BackendKind::Indexed)
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(engine.active_backend(), BackendKind::Flat);

        let err = engine
            .migrate_data(BackendKind::Indexed, BackendKind::Flat)
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(engine.active_backend(), BackendKind::Flat);
        assert_eq!(engine.get_all_recipes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_json_rejects_garbage() {
        let (engine, _temp) = create_test_engine();
        let err = engine.import_json("not json").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_export_import_json() {
        let (engine, _temp) = create_test_engine();
        let original = engine.add_recipe(RecipeDraft::new("a").category("c")).await.unwrap();

        let json = engine.export_json().await.unwrap();
        assert!(json.contains("exportDate"));

        let summary = engine.import_json(&json).await.unwrap();
        assert_eq!(summary.recipes, 1);
        let all = engine.get_all_recipes().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_ne!(all[0].id, original.id);
        assert_eq!(all[0].category, "c");
    }

    #[tokio::test]
    async fn test_storage_info() {
        let (engine, _temp) = create_broken_engine();
        engine.select(BackendKind::Flat);
        engine.add_recipe(RecipeDraft::new("a").category("x")).await.unwrap();

        let info = engine.storage_info().await;
        assert_eq!(info.active, BackendKind::Flat);
        assert!(!info.indexed_available);
        assert_eq!(info.stats.total, 1);
        assert_eq!(info.flat_capacity, "5-10MB");
        assert_eq!(info.indexed_capacity, "50MB-1GB+");
        assert!(info.capabilities.quota_bytes.is_some());
    }

    #[tokio::test]
    async fn test_storage_info_with_failing_active_backend_is_neutral() {
        let (engine, _temp) = create_broken_engine();
        let info = engine.storage_info().await;
        assert_eq!(info.active, BackendKind::Indexed);
        assert_eq!(info.stats, Stats::default());
    }
}
