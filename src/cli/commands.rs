//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - list/show/search: read the catalog
//! - add/update/delete: edit recipes
//! - images/attach: per-recipe photos
//! - stats/info: diagnostics
//! - export/import/migrate/clear: bulk data movement

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// recipebox - a recipe catalog with indexed and flat storage
#[derive(Parser, Debug)]
#[command(name = "recipebox")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend to use after detection (indexed or flat); unknown names are ignored
    #[arg(short, long, global = true)]
    pub backend: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List all recipes
    List,

    /// Show one recipe
    Show {
        /// Recipe ID
        id: String,
    },

    /// Add a recipe
    Add {
        #[arg(short, long)]
        title: String,

        #[arg(short, long, default_value = "")]
        description: String,

        #[arg(short = 'C', long, default_value = "")]
        category: String,

        /// Photo file to embed
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Extra field as key=value; JSON values are parsed, anything else is kept as text
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },

    /// Update fields of a recipe
    Update {
        /// Recipe ID
        id: String,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short = 'C', long)]
        category: Option<String>,

        /// Replacement photo file
        #[arg(short, long, conflicts_with = "clear_image")]
        image: Option<PathBuf>,

        /// Remove the embedded photo
        #[arg(long)]
        clear_image: bool,

        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },

    /// Delete a recipe and its photos
    Delete {
        /// Recipe ID
        id: String,
    },

    /// Search by keyword (title or description) and/or exact category
    Search {
        #[arg(short, long)]
        keyword: Option<String>,

        #[arg(short = 'C', long)]
        category: Option<String>,
    },

    /// List the photos attached to a recipe
    Images {
        /// Recipe ID
        id: String,
    },

    /// Normalize a photo and store it in a named slot
    Attach {
        /// Recipe ID
        id: String,

        /// Photo file
        file: PathBuf,

        /// Slot name
        #[arg(short, long, default_value = "main")]
        name: String,
    },

    /// Catalog statistics
    Stats,

    /// Backend diagnostics
    Info,

    /// Export everything as JSON (stdout if no file)
    Export {
        file: Option<PathBuf>,
    },

    /// Replace everything with the contents of an export file
    Import {
        file: PathBuf,
    },

    /// Copy all data from one backend to another
    Migrate {
        from: String,
        to: String,
    },

    /// Delete every recipe and photo in the active backend
    Clear {
        /// Skip the confirmation guard
        #[arg(short, long)]
        yes: bool,
    },
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}
