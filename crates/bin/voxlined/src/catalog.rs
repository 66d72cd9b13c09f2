//! Template and macro catalogs read from disk at startup.
//!
//! Each catalog is a directory of `*.json` files holding one definition
//! each. Files that cannot be read, parsed or validated are logged and
//! skipped; they never prevent the daemon from starting.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::{info, warn};
use voxline_app::registry::{MacroRegistry, TemplateRegistry};
use voxline_domain::command_macro::Macro;
use voxline_domain::error::VoxlineError;
use voxline_domain::template::Template;

/// Register every template found in `dir`. Returns how many were loaded.
pub fn load_templates(dir: &Path, registry: &TemplateRegistry) -> usize {
    load_into(dir, "template", |template: Template| {
        registry.register(template)
    })
}

/// Register every macro found in `dir`. Returns how many were loaded.
pub fn load_macros(dir: &Path, registry: &MacroRegistry) -> usize {
    load_into(dir, "macro", |command_macro: Macro| {
        registry.register(command_macro)
    })
}

fn load_into<T, F>(dir: &Path, kind: &'static str, mut register: F) -> usize
where
    T: DeserializeOwned,
    F: FnMut(T) -> Result<(), VoxlineError>,
{
    let mut loaded = 0;
    for path in json_files(dir) {
        let definition = match read_definition::<T>(&path) {
            Ok(definition) => definition,
            Err(err) => {
                warn!(kind, path = %path.display(), %err, "skipping unreadable definition");
                continue;
            }
        };
        match register(definition) {
            Ok(()) => loaded += 1,
            Err(err) => warn!(kind, path = %path.display(), %err, "skipping invalid definition"),
        }
    }
    info!(kind, dir = %dir.display(), loaded, "catalog loaded");
    loaded
}

/// `*.json` entries of `dir`, sorted so load order is stable.
fn json_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), %err, "catalog directory unreadable");
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    files
}

fn read_definition<T: DeserializeOwned>(path: &Path) -> Result<T, CatalogError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[derive(Debug, thiserror::Error)]
enum CatalogError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}
