use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

mod cli;

use cli::Cli;
use cli::commands::Commands;
use recipebox::config::Config;
use recipebox::domain::{Recipe, RecipeDraft, RecipePatch};
use recipebox::imaging::{DataUrl, byte_size_kb, estimate_encoded_size_kb, normalize};
use recipebox::storage::{BackendKind, StorageEngine};

fn setup_logging(level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("recipebox")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("recipebox.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins; the config level only fills in when it is unset
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.unwrap_or("info")))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn open_engine(cli: &Cli, config: &Config) -> Result<StorageEngine> {
    let engine = StorageEngine::open(config).context("Failed to open storage")?;

    if config.storage.auto_detect {
        engine.detect_and_select_best_backend().await;
    } else {
        engine.select(config.storage.default_backend);
    }
    if let Some(name) = &cli.backend {
        let active = engine.select_backend(name);
        if name.parse::<BackendKind>().is_err() {
            println!("{} unknown backend '{}', staying on {}", "Warning:".yellow(), name, active);
        }
    }

    if cli.is_verbose() {
        println!("{} {}", "Using backend:".dimmed(), engine.active_backend());
    }
    Ok(engine)
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");
    let engine = open_engine(cli, config).await?;

    match &cli.command {
        Commands::List => handle_list_command(&engine, cli.is_verbose()).await,
        Commands::Show { id } => handle_show_command(&engine, id).await,
        Commands::Add {
            title,
            description,
            category,
            image,
            fields,
        } => handle_add_command(&engine, title, description, category, image.as_deref(), fields).await,
        Commands::Update {
            id,
            title,
            description,
            category,
            image,
            clear_image,
            fields,
        } => {
            let mut patch = RecipePatch::new();
            patch.title = title.clone();
            patch.description = description.clone();
            patch.category = category.clone();
            if let Some(path) = image {
                patch.image = Some(read_image_file(path)?);
            } else if *clear_image {
                patch = patch.clear_image();
            }
            for (key, value) in fields {
                patch = patch.field(key.clone(), field_value(value));
            }
            handle_update_command(&engine, id, patch).await
        }
        Commands::Delete { id } => handle_delete_command(&engine, id).await,
        Commands::Search { keyword, category } => {
            handle_search_command(&engine, keyword.as_deref(), category.as_deref()).await
        }
        Commands::Images { id } => handle_images_command(&engine, id).await,
        Commands::Attach { id, file, name } => handle_attach_command(&engine, config, id, file, name).await,
        Commands::Stats => handle_stats_command(&engine).await,
        Commands::Info => handle_info_command(&engine).await,
        Commands::Export { file } => handle_export_command(&engine, file.as_deref()).await,
        Commands::Import { file } => handle_import_command(&engine, file).await,
        Commands::Migrate { from, to } => handle_migrate_command(&engine, from, to).await,
        Commands::Clear { yes } => handle_clear_command(&engine, *yes).await,
    }
}

/// Read a photo from disk as a data URL of its raw bytes
fn read_image_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).context(format!("Failed to read image {}", path.display()))?;
    info!("Read {} ({:.1}KB)", path.display(), byte_size_kb(&bytes));
    Ok(DataUrl::from_bytes(bytes).encode())
}

/// JSON if it parses, plain text otherwise
fn field_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_recipe_line(recipe: &Recipe) {
    let category = if recipe.category.is_empty() {
        "-".dimmed().to_string()
    } else {
        recipe.category.cyan().to_string()
    };
    let photo = if recipe.has_image() { " [photo]" } else { "" };
    println!("{}  {}  {}{}", recipe.id.dimmed(), recipe.title.bold(), category, photo.green());
}

fn print_recipe(recipe: &Recipe) -> Result<()> {
    println!("{} {}", "Title:".green(), recipe.title.bold());
    println!("{} {}", "ID:".green(), recipe.id);
    if !recipe.category.is_empty() {
        println!("{} {}", "Category:".green(), recipe.category);
    }
    if !recipe.description.is_empty() {
        println!("{} {}", "Description:".green(), recipe.description);
    }
    println!("{} {}", "Created:".green(), recipe.created_at.to_rfc3339());
    println!("{} {}", "Updated:".green(), recipe.updated_at.to_rfc3339());
    if let Some(image) = &recipe.image {
        println!("{} {:.1}KB inline", "Photo:".green(), estimate_encoded_size_kb(image));
    }
    if !recipe.fields.is_empty() {
        println!("{}", "Fields:".green());
        for (key, value) in &recipe.fields {
            println!("  {}: {}", key, serde_json::to_string(value)?);
        }
    }
    Ok(())
}

async fn handle_list_command(engine: &StorageEngine, verbose: bool) -> Result<()> {
    let recipes = engine.get_all_recipes().await?;
    if recipes.is_empty() {
        println!("{}", "No recipes yet".yellow());
        return Ok(());
    }
    for recipe in &recipes {
        print_recipe_line(recipe);
    }
    if verbose {
        println!("{} {}", "Total:".dimmed(), recipes.len());
    }
    Ok(())
}

async fn handle_show_command(engine: &StorageEngine, id: &str) -> Result<()> {
    match engine.get_recipe_by_id(id).await? {
        Some(recipe) => print_recipe(&recipe),
        None => eyre::bail!("No recipe with id {}", id),
    }
}

async fn handle_add_command(
    engine: &StorageEngine,
    title: &str,
    description: &str,
    category: &str,
    image: Option<&Path>,
    fields: &[(String, String)],
) -> Result<()> {
    let mut draft = RecipeDraft::new(title).description(description).category(category);
    if let Some(path) = image {
        draft = draft.image(read_image_file(path)?);
    }
    for (key, value) in fields {
        draft = draft.field(key.clone(), field_value(value));
    }

    let recipe = engine.add_recipe(draft).await.context("Failed to add recipe")?;
    println!("{} {} ({})", "Added:".green(), recipe.title.bold(), recipe.id);
    Ok(())
}

async fn handle_update_command(engine: &StorageEngine, id: &str, patch: RecipePatch) -> Result<()> {
    let recipe = engine
        .update_recipe(id, patch)
        .await
        .context(format!("Failed to update recipe {}", id))?;
    println!("{} {} ({})", "Updated:".green(), recipe.title.bold(), recipe.id);
    Ok(())
}

async fn handle_delete_command(engine: &StorageEngine, id: &str) -> Result<()> {
    engine.delete_recipe(id).await.context(format!("Failed to delete recipe {}", id))?;
    println!("{} {}", "Deleted:".red(), id);
    Ok(())
}

async fn handle_search_command(engine: &StorageEngine, keyword: Option<&str>, category: Option<&str>) -> Result<()> {
    let recipes = engine.search_recipes(keyword, category).await?;
    if recipes.is_empty() {
        println!("{}", "No matching recipes".yellow());
    }
    for recipe in &recipes {
        print_recipe_line(recipe);
    }
    Ok(())
}

async fn handle_images_command(engine: &StorageEngine, id: &str) -> Result<()> {
    let images = engine.get_recipe_images(id).await?;
    if images.is_empty() {
        println!("{}", "No photos".yellow());
    }
    for image in &images {
        println!(
            "{}  {:.1}KB  {}",
            image.image_name.bold(),
            estimate_encoded_size_kb(&image.data),
            image.created_at.to_rfc3339().dimmed()
        );
    }
    Ok(())
}

async fn handle_attach_command(
    engine: &StorageEngine,
    config: &Config,
    id: &str,
    file: &Path,
    name: &str,
) -> Result<()> {
    let bytes = fs::read(file).context(format!("Failed to read image {}", file.display()))?;
    let raw_kb = byte_size_kb(&bytes);
    let options = config.images.primary;
    let data = tokio::task::spawn_blocking(move || normalize(&bytes, &options))
        .await
        .context("Image task failed")?
        .context(format!("Failed to normalize {}", file.display()))?;

    let record = engine
        .save_image(id, data, Some(name))
        .await
        .context(format!("Failed to attach photo to {}", id))?;
    println!(
        "{} {} ({:.1}KB -> {:.1}KB)",
        "Attached:".green(),
        record.id,
        raw_kb,
        estimate_encoded_size_kb(&record.data)
    );
    Ok(())
}

async fn handle_stats_command(engine: &StorageEngine) -> Result<()> {
    let stats = engine.get_stats().await?;
    println!("{} {}", "Recipes:".green(), stats.total);
    println!("{} {}", "Photos:".green(), stats.image_count);
    println!("{} {:.2}KB", "Size:".green(), stats.storage_size_kb);
    let categories: Vec<&str> = stats.categories.iter().map(String::as_str).collect();
    println!("{} {}", "Categories:".green(), categories.join(", "));
    if !stats.recent.is_empty() {
        println!("{}", "Recently updated:".green());
        for recipe in &stats.recent {
            print_recipe_line(recipe);
        }
    }
    Ok(())
}

async fn handle_info_command(engine: &StorageEngine) -> Result<()> {
    let info = engine.storage_info().await;
    let availability = if info.indexed_available {
        "available".green()
    } else {
        "unavailable".red()
    };
    println!("{} {}", "Active backend:".green(), info.active.to_string().bold());
    println!("{} {}", "Indexed backend:".green(), availability);
    println!(
        "{} named images: {}, compresses: {}, transactional: {}",
        "Capabilities:".green(),
        info.capabilities.named_images,
        info.capabilities.compresses_images,
        info.capabilities.transactional
    );
    if let Some(quota) = info.capabilities.quota_bytes {
        println!("{} {:.0}KB", "Quota:".green(), quota as f64 / 1024.0);
    }
    println!(
        "{} {} recipes, {} photos, {:.2}KB",
        "Contents:".green(),
        info.stats.total,
        info.stats.image_count,
        info.stats.storage_size_kb
    );
    println!("{} flat {}, indexed {}", "Capacity:".green(), info.flat_capacity, info.indexed_capacity);
    Ok(())
}

async fn handle_export_command(engine: &StorageEngine, file: Option<&Path>) -> Result<()> {
    let json = engine.export_json().await.context("Failed to export")?;
    match file {
        Some(path) => {
            fs::write(path, json).context(format!("Failed to write {}", path.display()))?;
            println!("{} {}", "Exported to:".green(), path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn handle_import_command(engine: &StorageEngine, file: &Path) -> Result<()> {
    let json = fs::read_to_string(file).context(format!("Failed to read {}", file.display()))?;
    let summary = engine.import_json(&json).await.context("Failed to import")?;
    println!(
        "{} {} recipes, {} photos",
        "Imported:".green(),
        summary.recipes,
        summary.images
    );
    if summary.orphaned_images > 0 {
        println!(
            "{} skipped {} photos whose recipe was not in the file",
            "Warning:".yellow(),
            summary.orphaned_images
        );
    }
    Ok(())
}

async fn handle_migrate_command(engine: &StorageEngine, from: &str, to: &str) -> Result<()> {
    let from: BackendKind = from.parse()?;
    let to: BackendKind = to.parse()?;
    let summary = engine
        .migrate_data(from, to)
        .await
        .context(format!("Migration from {} to {} failed", from, to))?;
    println!(
        "{} {} recipes, {} photos from {} to {}",
        "Migrated:".green(),
        summary.recipes,
        summary.images,
        from,
        to
    );
    Ok(())
}

async fn handle_clear_command(engine: &StorageEngine, yes: bool) -> Result<()> {
    if !yes {
        println!(
            "{} this deletes every recipe in the {} backend; rerun with --yes",
            "Refusing:".red(),
            engine.active_backend()
        );
        return Ok(());
    }
    engine.clear_all_data().await.context("Failed to clear data")?;
    println!("{} {}", "Cleared:".red(), engine.active_backend());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;
    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
