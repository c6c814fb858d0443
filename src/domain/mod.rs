//! Domain types
//!
//! - Recipe: the catalog record, plus the draft/patch types that create and change it
//! - ImageRecord: a named photo slot owned by a recipe
//! - ExportDocument: the portable snapshot moved between backends

pub mod export;
pub mod image;
pub mod recipe;

pub use export::{ExportDocument, ImportSummary};
pub use image::{ImageRecord, MAIN_IMAGE};
pub use recipe::{Recipe, RecipeDraft, RecipePatch, SearchQuery};
