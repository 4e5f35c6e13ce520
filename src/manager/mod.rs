//! Lifecycle managers
//!
//! Repository lifecycle (clone / discover / remove) and graph lifecycle
//! (build / nuclear rebuild / remove) over the shared store, plus the
//! on-disk repository registry both consult.

pub mod graphs;
pub mod repos;

pub use graphs::{GraphInfo, GraphManager};
pub use repos::{RepoManager, RepoUpdate};

use crate::error::{CodelexError, CodelexResult};
use crate::schema::RepoId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Repository lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoStatus {
    Ready,
    Processing,
    Error,
}

/// One tracked repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub org: String,
    pub name: String,
    pub status: RepoStatus,
    /// Discovered version tags, descending
    pub releases: Vec<String>,
    pub path: PathBuf,
    pub added_at: String,
    pub updated_at: String,
}

impl RepositoryRecord {
    pub fn id(&self) -> CodelexResult<RepoId> {
        RepoId::new(&self.org, &self.name)
    }
}

/// JSON-backed registry of tracked repositories
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    pub fn new(repos_root: &Path) -> Self {
        Self {
            path: repos_root.join("registry.json"),
        }
    }

    pub fn load(&self) -> CodelexResult<BTreeMap<String, RepositoryRecord>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&text).map_err(|e| {
            CodelexError::store(format!(
                "corrupt registry {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    pub fn save(&self, records: &BTreeMap<String, RepositoryRecord>) -> CodelexResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(records)
            .map_err(|e| CodelexError::store(e.to_string()))?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }

    pub fn get(&self, repo: &RepoId) -> CodelexResult<Option<RepositoryRecord>> {
        Ok(self.load()?.remove(&repo.to_string()))
    }

    pub fn require(&self, repo: &RepoId) -> CodelexResult<RepositoryRecord> {
        self.get(repo)?.ok_or_else(|| {
            CodelexError::validation(format!("repository {} is not tracked", repo))
                .with_suggestion(format!("add it first: repo add {}", repo))
        })
    }

    pub fn upsert(&self, record: RepositoryRecord) -> CodelexResult<()> {
        let mut records = self.load()?;
        records.insert(format!("{}/{}", record.org, record.name), record);
        self.save(&records)
    }

    pub fn remove(&self, repo: &RepoId) -> CodelexResult<()> {
        let mut records = self.load()?;
        records.remove(&repo.to_string());
        self.save(&records)
    }

    pub fn set_status(&self, repo: &RepoId, status: RepoStatus) -> CodelexResult<()> {
        let mut records = self.load()?;
        if let Some(record) = records.get_mut(&repo.to_string()) {
            record.status = status;
            record.updated_at = now();
        }
        self.save(&records)
    }
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Destructive operations need `force` or a confirmation token matching
/// the repository identifier.
pub(crate) fn check_confirmation(
    required: bool,
    force: bool,
    confirm: Option<&str>,
    repo: &RepoId,
) -> CodelexResult<()> {
    if force || !required {
        return Ok(());
    }
    match confirm {
        Some(token) if token == repo.to_string() => Ok(()),
        _ => Err(CodelexError::validation(format!(
            "destructive operation on {} requires confirmation",
            repo
        ))
        .with_suggestion("pass --force, or type the org/name identifier to confirm")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record() -> RepositoryRecord {
        RepositoryRecord {
            org: "acme".to_string(),
            name: "lib".to_string(),
            status: RepoStatus::Ready,
            releases: vec!["v2".to_string(), "v1".to_string()],
            path: PathBuf::from("/tmp/acme/lib"),
            added_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn test_registry_round_trip() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(dir.path());
        registry.upsert(record()).unwrap();

        let repo = RepoId::new("acme", "lib").unwrap();
        let loaded = registry.get(&repo).unwrap().unwrap();
        assert_eq!(loaded.releases, ["v2", "v1"]);
        assert_eq!(loaded.status, RepoStatus::Ready);

        registry.set_status(&repo, RepoStatus::Processing).unwrap();
        assert_eq!(
            registry.get(&repo).unwrap().unwrap().status,
            RepoStatus::Processing
        );

        registry.remove(&repo).unwrap();
        assert!(registry.get(&repo).unwrap().is_none());
    }

    #[test]
    fn test_confirmation_rules() {
        let repo = RepoId::new("acme", "lib").unwrap();
        assert!(check_confirmation(true, true, None, &repo).is_ok());
        assert!(check_confirmation(false, false, None, &repo).is_ok());
        assert!(check_confirmation(true, false, Some("acme/lib"), &repo).is_ok());
        assert!(check_confirmation(true, false, Some("wrong"), &repo).is_err());
        assert!(check_confirmation(true, false, None, &repo).is_err());
    }
}
