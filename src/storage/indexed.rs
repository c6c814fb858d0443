//! Indexed backend: per-record rows in SQLite with secondary indexes.
//!
//! Two tables share one versioned schema:
//! - **recipes**: keyed by `id`, indexed on `title`, `category`, `created_at`.
//!   The full record lives in `json_data`; the other columns exist for indexing.
//! - **images**: keyed by `{recipe_id}_{image_name}`, indexed on `recipe_id`
//!   so deleting a recipe can sweep its images in the same transaction.
//!
//! The connection is opened lazily on first use and shared afterwards. Every
//! call runs on the blocking pool in its own transaction.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::OnceCell;

use super::traits::{BackendKind, Capabilities, RecipeBackend};
use crate::domain::{ExportDocument, ImageRecord, ImportSummary, MAIN_IMAGE, Recipe, RecipeDraft, RecipePatch};
use crate::error::{Result, StoreError};
use crate::id::image_id;
use crate::stats::Stats;

/// Bump when the schema below changes
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS recipes (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        category TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        json_data TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_recipes_title ON recipes(title);
    CREATE INDEX IF NOT EXISTS idx_recipes_category ON recipes(category);
    CREATE INDEX IF NOT EXISTS idx_recipes_created ON recipes(created_at);

    CREATE TABLE IF NOT EXISTS images (
        id TEXT PRIMARY KEY,
        recipe_id TEXT NOT NULL,
        image_name TEXT NOT NULL,
        data TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_images_recipe ON images(recipe_id);
"#;

type Handle = Arc<Mutex<Connection>>;

/// SQLite-backed recipe store
pub struct IndexedBackend {
    path: PathBuf,
    handle: OnceCell<Handle>,
    opens: AtomicUsize,
}

impl std::fmt::Debug for IndexedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedBackend")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl IndexedBackend {
    /// Describe a store at `path`. Nothing is opened until first use.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            handle: OnceCell::new(),
            opens: AtomicUsize::new(0),
        }
    }

    /// True once the shared connection has been opened
    pub fn is_open(&self) -> bool {
        self.handle.initialized()
    }

    /// How many times a connection open was attempted
    pub fn connections_opened(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// The shared connection, opening it on first call.
    ///
    /// Callers racing the first open all wait on the same attempt. A failed
    /// open leaves the cell empty so a later call can retry.
    async fn handle(&self) -> Result<Handle> {
        let handle = self
            .handle
            .get_or_try_init(|| async move {
                self.opens.fetch_add(1, Ordering::SeqCst);
                let path = self.path.clone();
                let conn = tokio::task::spawn_blocking(move || open_connection(&path)).await??;
                log::info!("Opened indexed store at {}", self.path.display());
                Ok::<_, StoreError>(Arc::new(Mutex::new(conn)))
            })
            .await?;
        Ok(Arc::clone(handle))
    }

    /// Run `f` against the connection on the blocking pool, logging any failure.
    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let result = async {
            let handle = self.handle().await?;
            tokio::task::spawn_blocking(move || {
                let mut conn = handle.lock().map_err(|e| StoreError::Storage(e.to_string()))?;
                f(&mut conn)
            })
            .await?
        }
        .await;

        result.inspect_err(|e| {
            if e.is_not_found() {
                log::debug!("Indexed store {}: {}", op, e);
            } else {
                log::error!("Indexed store {} failed: {}", op, e);
            }
        })
    }

    /// Every image row
    pub async fn get_all_images(&self) -> Result<Vec<ImageRecord>> {
        self.run("get_all_images", |conn| read_images(conn, None)).await
    }
}

/// Open the database file and bring its schema up to date.
fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::Unavailable(format!("cannot create {}: {}", parent.display(), e)))?;
    }
    let mut conn = Connection::open(path)
        .map_err(|e| StoreError::Unavailable(format!("cannot open {}: {}", path.display(), e)))?;
    init_schema(&mut conn).map_err(|e| StoreError::Unavailable(format!("schema setup failed: {}", e)))?;
    Ok(conn)
}

/// Create tables and indexes if this file predates `SCHEMA_VERSION`.
fn init_schema(conn: &mut Connection) -> Result<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA)?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;

    log::info!("Initialized indexed schema v{} (was v{})", SCHEMA_VERSION, version);
    Ok(())
}

fn to_column(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn from_column(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn insert_recipe(conn: &Connection, recipe: &Recipe) -> Result<()> {
    let json_data = serde_json::to_string(recipe)?;
    conn.execute(
        r#"
        INSERT INTO recipes (id, title, category, created_at, updated_at, json_data)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            recipe.id,
            recipe.title,
            recipe.category,
            to_column(&recipe.created_at),
            to_column(&recipe.updated_at),
            json_data,
        ],
    )?;
    Ok(())
}

fn write_recipe(conn: &Connection, recipe: &Recipe) -> Result<()> {
    let json_data = serde_json::to_string(recipe)?;
    conn.execute(
        r#"
        UPDATE recipes
        SET title = ?2, category = ?3, updated_at = ?4, json_data = ?5
        WHERE id = ?1
        "#,
        params![
            recipe.id,
            recipe.title,
            recipe.category,
            to_column(&recipe.updated_at),
            json_data,
        ],
    )?;
    Ok(())
}

fn put_image(conn: &Connection, image: &ImageRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO images (id, recipe_id, image_name, data, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            image.id,
            image.recipe_id,
            image.image_name,
            image.data,
            to_column(&image.created_at),
        ],
    )?;
    Ok(())
}

fn read_recipe(conn: &Connection, id: &str) -> Result<Option<Recipe>> {
    let json: Option<String> = conn
        .query_row("SELECT json_data FROM recipes WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    match json {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

fn read_recipes(conn: &Connection) -> Result<Vec<Recipe>> {
    let mut stmt = conn.prepare("SELECT json_data FROM recipes ORDER BY created_at")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut recipes = Vec::new();
    for row in rows {
        recipes.push(serde_json::from_str(&row?)?);
    }
    Ok(recipes)
}

fn read_images(conn: &Connection, recipe_id: Option<&str>) -> Result<Vec<ImageRecord>> {
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<ImageRecord> {
        Ok(ImageRecord {
            id: row.get(0)?,
            recipe_id: row.get(1)?,
            image_name: row.get(2)?,
            data: row.get(3)?,
            created_at: from_column(4, row.get(4)?)?,
        })
    };

    let images = match recipe_id {
        Some(recipe_id) => {
            let mut stmt = conn.prepare(
                "SELECT id, recipe_id, image_name, data, created_at FROM images WHERE recipe_id = ?1 ORDER BY created_at",
            )?;
            let images = stmt.query_map([recipe_id], map_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
            images
        }
        None => {
            let mut stmt =
                conn.prepare("SELECT id, recipe_id, image_name, data, created_at FROM images ORDER BY created_at")?;
            let images = stmt.query_map([], map_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
            images
        }
    };
    Ok(images)
}

#[async_trait]
impl RecipeBackend for IndexedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Indexed
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            named_images: true,
            compresses_images: false,
            transactional: true,
            quota_bytes: None,
        }
    }

    async fn init(&self) -> Result<()> {
        self.handle()
            .await
            .map(|_| ())
            .inspect_err(|e| log::warn!("Indexed store unavailable: {}", e))
    }

    async fn get_all(&self) -> Result<Vec<Recipe>> {
        self.run("get_all", |conn| read_recipes(conn)).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Recipe>> {
        let id = id.to_string();
        self.run("get_by_id", move |conn| read_recipe(conn, &id)).await
    }

    async fn add(&self, draft: RecipeDraft) -> Result<Recipe> {
        let recipe = Recipe::create(draft);
        self.run("add", move |conn| {
            let tx = conn.transaction()?;
            insert_recipe(&tx, &recipe)?;
            tx.commit()?;
            Ok(recipe)
        })
        .await
    }

    async fn update(&self, id: &str, patch: RecipePatch) -> Result<Recipe> {
        let id = id.to_string();
        self.run("update", move |conn| {
            let tx = conn.transaction()?;
            let mut recipe = read_recipe(&tx, &id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
            recipe.apply_patch(patch);
            write_recipe(&tx, &recipe)?;
            tx.commit()?;
            Ok(recipe)
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.run("delete", move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM recipes WHERE id = ?1", [&id])?;
            // Cascade through the recipe_id index; the recipe removal stands even if this fails
            match tx.execute("DELETE FROM images WHERE recipe_id = ?1", [&id]) {
                Ok(swept) if swept > 0 => log::debug!("Deleted {} images of recipe {}", swept, id),
                Ok(_) => {}
                Err(e) => log::warn!("Image cleanup for recipe {} failed: {}", id, e),
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn save_image(&self, recipe_id: &str, data: String, image_name: &str) -> Result<ImageRecord> {
        let image = ImageRecord::new(recipe_id, image_name, data);
        self.run("save_image", move |conn| {
            let tx = conn.transaction()?;
            if read_recipe(&tx, &image.recipe_id)?.is_none() {
                return Err(StoreError::NotFound(image.recipe_id.clone()));
            }
            put_image(&tx, &image)?;
            tx.commit()?;
            Ok(image)
        })
        .await
    }

    async fn get_image(&self, recipe_id: &str, image_name: &str) -> Result<Option<String>> {
        let id = image_id(recipe_id, image_name);
        self.run("get_image", move |conn| {
            Ok(conn
                .query_row("SELECT data FROM images WHERE id = ?1", [&id], |row| row.get(0))
                .optional()?)
        })
        .await
    }

    async fn delete_image(&self, recipe_id: &str, image_name: &str) -> Result<()> {
        let id = image_id(recipe_id, image_name);
        self.run("delete_image", move |conn| {
            conn.execute("DELETE FROM images WHERE id = ?1", [&id])?;
            Ok(())
        })
        .await
    }

    async fn get_recipe_images(&self, recipe_id: &str) -> Result<Vec<ImageRecord>> {
        let recipe_id = recipe_id.to_string();
        self.run("get_recipe_images", move |conn| read_images(conn, Some(&recipe_id)))
            .await
    }

    async fn stats(&self) -> Result<Stats> {
        self.run("stats", |conn| {
            let tx = conn.transaction()?;
            let recipes = read_recipes(&tx)?;
            let image_count: i64 = tx.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
            let recipe_chars: i64 =
                tx.query_row("SELECT COALESCE(SUM(LENGTH(json_data)), 0) FROM recipes", [], |row| row.get(0))?;
            let image_chars: i64 =
                tx.query_row("SELECT COALESCE(SUM(LENGTH(data)), 0) FROM images", [], |row| row.get(0))?;
            tx.commit()?;

            let size_kb = (recipe_chars + image_chars) as f64 / 1024.0;
            Ok(Stats::from_recipes(recipes, image_count.max(0) as usize, size_kb))
        })
        .await
    }

    async fn clear_all(&self) -> Result<()> {
        self.run("clear_all", |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM recipes", [])?;
            tx.execute("DELETE FROM images", [])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn export_all(&self) -> Result<ExportDocument> {
        self.run("export_all", |conn| {
            let tx = conn.transaction()?;
            let recipes = read_recipes(&tx)?;
            let images = read_images(&tx, None)?;
            tx.commit()?;
            Ok(ExportDocument::new(recipes, images))
        })
        .await
    }

    async fn import_replace_all(&self, doc: ExportDocument) -> Result<ImportSummary> {
        let ExportDocument { recipes, images, .. } = doc;
        let has_main: HashSet<String> = images
            .iter()
            .filter(|i| i.is_main())
            .map(|i| i.recipe_id.clone())
            .collect();

        // Re-key recipes, remembering where each source id went
        let mut id_map: HashMap<String, String> = HashMap::new();
        let mut new_recipes = Vec::with_capacity(recipes.len());
        let mut new_images = Vec::new();
        for recipe in recipes {
            let source_id = recipe.id.clone();
            let mut draft = recipe.into_draft();
            let embedded = draft.image.take();
            let created = Recipe::create(draft);

            // The images table is canonical here; an embedded photo becomes the main slot
            if let Some(data) = embedded.filter(|_| !has_main.contains(&source_id)) {
                new_images.push(ImageRecord::new(&created.id, MAIN_IMAGE, data));
            }
            id_map.insert(source_id, created.id.clone());
            new_recipes.push(created);
        }

        let mut summary = ImportSummary::default();
        for image in images {
            match id_map.get(&image.recipe_id) {
                Some(new_id) => new_images.push(image.reassign(new_id)),
                None => {
                    log::warn!("Dropping image {}: recipe {} not in import", image.id, image.recipe_id);
                    summary.orphaned_images += 1;
                }
            }
        }
        summary.recipes = new_recipes.len();
        summary.images = new_images.len();

        let summary = self
            .run("import_replace_all", move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM recipes", [])?;
                tx.execute("DELETE FROM images", [])?;
                for recipe in &new_recipes {
                    insert_recipe(&tx, recipe)?;
                }
                for image in &new_images {
                    put_image(&tx, image)?;
                }
                tx.commit()?;
                Ok(summary)
            })
            .await?;

        log::info!(
            "Imported {} recipes and {} images into indexed store",
            summary.recipes,
            summary.images
        );
        Ok(summary)
    }
}
