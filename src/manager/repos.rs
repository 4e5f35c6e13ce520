//! Repository lifecycle
//!
//! add / update / remove / list / show over the repository store and the
//! registry. Adding a repository clones and discovers versions but never
//! triggers graph construction.

use super::{check_confirmation, now, Registry, RepoStatus, RepositoryRecord};
use crate::config::Config;
use crate::error::CodelexResult;
use crate::progress::ProgressObserver;
use crate::rdf::TripleStore;
use crate::repostore::RepositoryStore;
use crate::schema::{GraphSchema, RepoId};
use std::sync::Arc;
use tracing::info;

/// Result of a `repo update`
#[derive(Debug, Clone)]
pub struct RepoUpdate {
    pub record: RepositoryRecord,
    /// Versions discovered by this fetch that were not known before
    pub new_versions: Vec<String>,
}

/// Repository lifecycle operations
pub struct RepoManager {
    config: Config,
    store: Arc<TripleStore>,
    repostore: RepositoryStore,
    registry: Registry,
    schema: GraphSchema,
}

impl RepoManager {
    pub fn new(config: Config, store: Arc<TripleStore>) -> CodelexResult<Self> {
        let repostore =
            RepositoryStore::new(config.repos_dir(), config.auth_token.clone())?;
        let registry = Registry::new(&config.repos_dir());
        Ok(Self {
            config,
            store,
            repostore,
            registry,
            schema: GraphSchema::new(),
        })
    }

    pub fn repostore(&self) -> &RepositoryStore {
        &self.repostore
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Clone a repository and discover its versions. No graphs are built.
    pub fn add(
        &self,
        repo: &RepoId,
        url: Option<&str>,
        observer: &dyn ProgressObserver,
    ) -> CodelexResult<RepositoryRecord> {
        if self.registry.get(repo)?.is_some() {
            return Err(crate::error::CodelexError::validation(format!(
                "repository {} is already tracked",
                repo
            ))
            .with_suggestion("use repo update to fetch new versions"));
        }

        let path = self.repostore.clone_repo(repo, url, observer)?;
        let releases = self.repostore.list_versions(repo)?;
        let record = RepositoryRecord {
            org: repo.org().to_string(),
            name: repo.name().to_string(),
            status: RepoStatus::Ready,
            releases,
            path,
            added_at: now(),
            updated_at: now(),
        };
        self.registry.upsert(record.clone())?;
        info!(repo = %repo, releases = record.releases.len(), "repository added");
        Ok(record)
    }

    /// Fetch the remote and report newly available versions.
    pub fn update(
        &self,
        repo: &RepoId,
        observer: &dyn ProgressObserver,
    ) -> CodelexResult<RepoUpdate> {
        let mut record = self.registry.require(repo)?;
        self.repostore.fetch(repo, observer)?;

        let releases = self.repostore.list_versions(repo)?;
        let new_versions: Vec<String> = releases
            .iter()
            .filter(|v| !record.releases.contains(v))
            .cloned()
            .collect();
        record.releases = releases;
        record.updated_at = now();
        record.status = RepoStatus::Ready;
        self.registry.upsert(record.clone())?;
        info!(repo = %repo, new = new_versions.len(), "repository updated");
        Ok(RepoUpdate {
            record,
            new_versions,
        })
    }

    /// Delete on-disk checkouts and every graph under the repository's
    /// prefix. Requires a confirmation token unless `force`.
    pub fn remove(
        &self,
        repo: &RepoId,
        force: bool,
        confirm: Option<&str>,
    ) -> CodelexResult<()> {
        check_confirmation(
            self.config.require_confirmation_for_destructive,
            force,
            confirm,
            repo,
        )?;
        self.registry.require(repo)?;

        self.repostore.remove_repo(repo)?;

        let prefix = self.schema.repo_prefix(repo);
        let graphs = self.store.list_graphs(Some(&prefix));
        let mut writer = self.store.writer();
        for graph in &graphs {
            writer
                .drop_graph(graph)
                .map_err(|e| crate::error::CodelexError::store(e.to_string()))?;
        }
        writer
            .commit()
            .map_err(|e| crate::error::CodelexError::store(e.to_string()))?;
        drop(writer);

        self.registry.remove(repo)?;
        info!(repo = %repo, graphs = graphs.len(), "repository removed");
        Ok(())
    }

    pub fn list(&self) -> CodelexResult<Vec<RepositoryRecord>> {
        Ok(self.registry.load()?.into_values().collect())
    }

    pub fn show(&self, repo: &RepoId) -> CodelexResult<RepositoryRecord> {
        self.registry.require(repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopObserver;
    use git2::{Repository, Signature};
    use std::path::Path;
    use tempfile::TempDir;

    fn fixture_repo(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("upstream");
        let repo = Repository::init(&path).unwrap();
        let sig = Signature::now("Tester", "t@example.com").unwrap();
        std::fs::write(path.join("core.py"), "def create():\n    pass\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("core.py")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();
        let head = repo.head().unwrap().peel(git2::ObjectType::Commit).unwrap();
        repo.tag_lightweight("v1", &head, false).unwrap();
        path
    }

    fn manager(dir: &TempDir) -> RepoManager {
        let mut config = Config::default();
        config.storage_root = dir.path().to_path_buf();
        RepoManager::new(config, Arc::new(TripleStore::in_memory())).unwrap()
    }

    #[test]
    fn test_add_then_show() {
        let dir = TempDir::new().unwrap();
        let upstream = fixture_repo(dir.path());
        let manager = manager(&dir);
        let repo = RepoId::new("acme", "lib").unwrap();

        let record = manager
            .add(&repo, Some(upstream.to_str().unwrap()), &NoopObserver)
            .unwrap();
        assert_eq!(record.status, RepoStatus::Ready);
        assert_eq!(record.releases, ["v1"]);

        let shown = manager.show(&repo).unwrap();
        assert_eq!(shown.releases, ["v1"]);
        assert_eq!(manager.list().unwrap().len(), 1);

        // No graphs exist before a graph add.
        assert!(manager
            .store
            .list_graphs(Some(&manager.schema.repo_prefix(&repo)))
            .is_empty());
    }

    #[test]
    fn test_remove_requires_confirmation() {
        let dir = TempDir::new().unwrap();
        let upstream = fixture_repo(dir.path());
        let manager = manager(&dir);
        let repo = RepoId::new("acme", "lib").unwrap();
        manager
            .add(&repo, Some(upstream.to_str().unwrap()), &NoopObserver)
            .unwrap();

        let err = manager.remove(&repo, false, None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);

        manager.remove(&repo, false, Some("acme/lib")).unwrap();
        assert!(manager.show(&repo).is_err());
        assert!(!manager.repostore.has_clone(&repo));
    }
}
