//! Streaming exporters
//!
//! Two artifact formats over the ingested graphs: a compact line-delimited
//! JSON stream for machine consumption and a hierarchical text outline.
//! Both read through streaming SPARQL in configurable batches and are
//! strictly read-only: a failed export removes its partial file and leaves
//! the store untouched.

pub mod compact;
pub mod outline;

pub use compact::{CompactExporter, CompactStats};
pub use outline::OutlineExporter;

use crate::error::{CodelexError, CodelexResult};
use crate::schema::RepoId;
use std::path::{Path, PathBuf};

/// Default destination `{root}/exports/{org}/{repo}/{version}.{ext}`
pub fn default_destination(
    exports_dir: &Path,
    repo: &RepoId,
    version: &str,
    extension: &str,
) -> PathBuf {
    exports_dir
        .join(repo.org())
        .join(repo.name())
        .join(format!("{}.{}", version, extension))
}

/// Run an export into a file, removing the partial file on failure.
pub fn export_to_file<F>(path: &Path, export: F) -> CodelexResult<()>
where
    F: FnOnce(&mut dyn std::io::Write) -> CodelexResult<()>,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CodelexError::export(e.to_string()).with_source(e))?;
    }
    let mut file = std::fs::File::create(path)
        .map_err(|e| CodelexError::export(e.to_string()).with_source(e))?;
    match export(&mut file) {
        Ok(()) => Ok(()),
        Err(e) => {
            drop(file);
            let _ = std::fs::remove_file(path);
            Err(e)
        }
    }
}
