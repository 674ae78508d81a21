use std::fs;
use std::path::{Path, PathBuf};

use dirs::home_dir;
use log::{debug, info};

use crate::models::structs::{Source, SourceSet};
use crate::query_ast::errors::{Result, SlqError};

/// Overrides the sources file location
pub const CONFIG_ENV: &str = "SLQ_CONFIG";
/// Overrides where scratch databases are created
pub const SCRATCH_ENV: &str = "SLQ_SCRATCH_DIR";

const DATA_DIR_NAME: &str = ".slq";
const SOURCES_FILE: &str = "sources.json";

/// `~/.slq`, or `./.slq` when there is no home directory.
pub fn data_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}

pub fn sources_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV) {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => data_dir().join(SOURCES_FILE),
    }
}

pub fn scratch_dir() -> PathBuf {
    if let Some(p) = std::env::var_os(SCRATCH_ENV)
        && !p.is_empty()
    {
        return PathBuf::from(p);
    }
    match home_dir() {
        Some(home) => home.join(DATA_DIR_NAME).join("scratch"),
        None => std::env::temp_dir().join("slq_scratch"),
    }
}

/// Reads the source set from `path`. A missing file is an empty set.
pub fn load_sources(path: &Path) -> Result<SourceSet> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no sources file at {}", path.display());
            return Ok(SourceSet::new());
        }
        Err(e) => {
            return Err(SlqError::Config(format!("read {}: {}", path.display(), e)));
        }
    };
    let set: SourceSet = serde_json::from_str(&text)?;
    for src in &set.items {
        crate::models::structs::check_handle(&src.handle)?;
    }
    if let Some(active) = &set.active {
        set.get(active)?;
    }
    info!("loaded {} sources from {}", set.items.len(), path.display());
    Ok(set)
}

pub fn save_sources(path: &Path, set: &SourceSet) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .map_err(|e| SlqError::Config(format!("create {}: {}", parent.display(), e)))?;
    }
    let json = serde_json::to_string_pretty(set)?;
    fs::write(path, json).map_err(|e| SlqError::Config(format!("write {}: {}", path.display(), e)))?;
    debug!("saved {} sources to {}", set.items.len(), path.display());
    Ok(())
}

/// Adds a source to the file at `path`, inferring its driver from
/// `location`. The first source added becomes the active one.
pub fn add_source(path: &Path, handle: &str, location: &str) -> Result<Source> {
    let mut set = load_sources(path)?;
    let src = Source::from_location(handle, location)?;
    set.add(src.clone())?;
    if set.active.is_none() {
        set.set_active(&src.handle)?;
    }
    save_sources(path, &set)?;
    info!("added source {} ({})", src.handle, src.driver);
    Ok(src)
}
