//! Repository store
//!
//! Owns the on-disk layout of source checkouts:
//!
//! ```text
//! {root}/repos/{org}/{repo}/.git
//! {root}/repos/{org}/{repo}/{version}/     <- working tree of that tag
//! ```
//!
//! Every path is validated to stay within the configured root; a resolved
//! path escaping that prefix is a security error. A per-repository
//! advisory lock file serializes ingestions of the same repository.

use crate::error::{CodelexError, CodelexResult};
use crate::progress::{report, CancellationToken, ProgressObserver, Stage};
use crate::schema::{validate_identifier, RepoId};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Cred, FetchOptions, RemoteCallbacks, Repository};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LOCK_FILE: &str = ".codelex.lock";

/// Remote fetch attempts before giving up
const MAX_NETWORK_RETRIES: u32 = 3;

/// Retry a remote operation with linear backoff; only Network failures
/// are retried, everything else aborts immediately.
fn with_network_retry<T>(
    what: &str,
    mut attempt: impl FnMut() -> CodelexResult<T>,
) -> CodelexResult<T> {
    let mut tries = 0u32;
    loop {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(e) if e.kind() == crate::error::ErrorKind::Network => {
                tries += 1;
                if tries >= MAX_NETWORK_RETRIES {
                    return Err(e);
                }
                warn!("{} failed ({}), retry {}/{}", what, e, tries, MAX_NETWORK_RETRIES);
                std::thread::sleep(std::time::Duration::from_secs(tries as u64));
            }
            Err(e) => return Err(e),
        }
    }
}

/// On-disk checkout management under `{root}/repos/`
pub struct RepositoryStore {
    root: PathBuf,
    auth_token: Option<String>,
}

impl RepositoryStore {
    pub fn new(repos_root: PathBuf, auth_token: Option<String>) -> CodelexResult<Self> {
        std::fs::create_dir_all(&repos_root)?;
        Ok(Self {
            root: repos_root,
            auth_token,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one repository, validated to stay under the root.
    pub fn repo_dir(&self, repo: &RepoId) -> CodelexResult<PathBuf> {
        let path = self.root.join(repo.org()).join(repo.name());
        self.ensure_within(&path)?;
        Ok(path)
    }

    /// Checkout directory of one version.
    pub fn checkout_dir(&self, repo: &RepoId, version: &str) -> CodelexResult<PathBuf> {
        validate_identifier("version", version)?;
        let path = self.repo_dir(repo)?.join(version);
        self.ensure_within(&path)?;
        Ok(path)
    }

    /// Reject any resolved path that escapes the store root.
    fn ensure_within(&self, candidate: &Path) -> CodelexResult<()> {
        for component in candidate.components() {
            if matches!(component, std::path::Component::ParentDir) {
                return Err(CodelexError::security(format!(
                    "path '{}' escapes the repository root",
                    candidate.display()
                )));
            }
        }
        // Resolve as far as the closest existing ancestor and verify the
        // prefix; symlinked segments cannot smuggle the path outside.
        let root = self.root.canonicalize()?;
        let mut existing = candidate.to_path_buf();
        while !existing.exists() {
            match existing.parent() {
                Some(parent) => existing = parent.to_path_buf(),
                None => break,
            }
        }
        if existing.exists() {
            let resolved = existing.canonicalize()?;
            if !resolved.starts_with(&root) {
                return Err(CodelexError::security(format!(
                    "path '{}' resolves outside the repository root",
                    candidate.display()
                )));
            }
        }
        Ok(())
    }

    pub fn has_clone(&self, repo: &RepoId) -> bool {
        self.repo_dir(repo)
            .map(|dir| dir.join(".git").exists())
            .unwrap_or(false)
    }

    fn fetch_options(&self) -> FetchOptions<'_> {
        let mut callbacks = RemoteCallbacks::new();
        if let Some(token) = self.auth_token.clone() {
            callbacks.credentials(move |_url, _username, _allowed| {
                Cred::userpass_plaintext("x-access-token", &token)
            });
        }
        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks);
        options.download_tags(git2::AutotagOption::All);
        options
    }

    /// Clone once; a second clone of the same repository is an error.
    pub fn clone_repo(
        &self,
        repo: &RepoId,
        url: Option<&str>,
        observer: &dyn ProgressObserver,
    ) -> CodelexResult<PathBuf> {
        let dir = self.repo_dir(repo)?;
        if self.has_clone(repo) {
            return Err(CodelexError::validation(format!(
                "repository {} is already cloned",
                repo
            ))
            .with_suggestion("use update to fetch new versions"));
        }
        std::fs::create_dir_all(&dir)?;

        let url = match url {
            Some(url) => url.to_string(),
            None => format!("https://github.com/{}/{}.git", repo.org(), repo.name()),
        };
        report(
            observer,
            Stage::Cloning,
            None,
            format!("cloning {}", url),
        );
        info!(repo = %repo, url = %url, "cloning repository");

        with_network_retry("clone", || {
            // A failed attempt can leave a partial clone behind.
            if dir.join(".git").exists() {
                std::fs::remove_dir_all(dir.join(".git"))?;
            }
            RepoBuilder::new()
                .fetch_options(self.fetch_options())
                .clone(&url, &dir)
                .map_err(|e| {
                    CodelexError::from(e)
                        .with_suggestion("check the repository identifier and network access")
                })?;
            Ok(())
        })?;
        Ok(dir)
    }

    /// Fetch the default remote, including new tags.
    pub fn fetch(&self, repo: &RepoId, observer: &dyn ProgressObserver) -> CodelexResult<()> {
        let dir = self.repo_dir(repo)?;
        let repository = Repository::open(&dir)?;
        report(observer, Stage::Fetching, None, "fetching origin");
        with_network_retry("fetch", || {
            let mut remote = repository.find_remote("origin")?;
            remote.fetch::<&str>(&[], Some(&mut self.fetch_options()), None)?;
            Ok(())
        })
    }

    /// Version tags known to the clone, descending.
    pub fn list_versions(&self, repo: &RepoId) -> CodelexResult<Vec<String>> {
        let dir = self.repo_dir(repo)?;
        let repository = Repository::open(&dir)?;
        let names = repository.tag_names(None)?;
        let mut versions: Vec<String> = Vec::new();
        for name in names.iter().flatten() {
            match validate_identifier("version", name) {
                Ok(()) => versions.push(name.to_string()),
                Err(e) => warn!(tag = name, "ignoring tag: {}", e),
            }
        }
        versions.sort_by(|a, b| compare_versions(b, a));
        Ok(versions)
    }

    /// Versions with a materialized checkout directory.
    pub fn local_versions(&self, repo: &RepoId) -> CodelexResult<Vec<String>> {
        let dir = self.repo_dir(repo)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name == ".git" {
                continue;
            }
            if validate_identifier("version", &name).is_ok() {
                versions.push(name);
            }
        }
        versions.sort_by(|a, b| compare_versions(b, a));
        Ok(versions)
    }

    /// Materialize the working tree of `version` into its own directory.
    /// Re-checkouts of an existing directory are no-ops.
    pub fn checkout_version(
        &self,
        repo: &RepoId,
        version: &str,
        observer: &dyn ProgressObserver,
    ) -> CodelexResult<PathBuf> {
        let dest = self.checkout_dir(repo, version)?;
        if dest.exists() {
            debug!(repo = %repo, version, "checkout already materialized");
            return Ok(dest);
        }
        let dir = self.repo_dir(repo)?;
        let repository = Repository::open(&dir)?;

        report(
            observer,
            Stage::Checkout,
            None,
            format!("materializing {}", version),
        );
        let object = repository
            .revparse_single(&format!("refs/tags/{}", version))
            .map_err(|e| {
                CodelexError::from(e).with_suggestion("run repo update to discover new tags")
            })?;
        std::fs::create_dir_all(&dest)?;

        let mut checkout = CheckoutBuilder::new();
        checkout
            .force()
            .recreate_missing(true)
            .target_dir(&dest);
        repository.checkout_tree(&object, Some(&mut checkout))?;
        info!(repo = %repo, version, "checkout materialized");
        Ok(dest)
    }

    /// Existing checkout directory of a version.
    pub fn checkout_path(&self, repo: &RepoId, version: &str) -> CodelexResult<PathBuf> {
        let path = self.checkout_dir(repo, version)?;
        if !path.exists() {
            return Err(CodelexError::git(format!(
                "version {} of {} has no checkout",
                version, repo
            ))
            .with_suggestion("run graph add to materialize and ingest it"));
        }
        Ok(path)
    }

    /// Delete checkout directories not in `keep`.
    pub fn prune(&self, repo: &RepoId, keep: &[String]) -> CodelexResult<Vec<String>> {
        let mut pruned = Vec::new();
        for version in self.local_versions(repo)? {
            if !keep.contains(&version) {
                let dir = self.checkout_dir(repo, &version)?;
                std::fs::remove_dir_all(&dir)?;
                pruned.push(version);
            }
        }
        Ok(pruned)
    }

    /// Delete the clone and every checkout.
    pub fn remove_repo(&self, repo: &RepoId) -> CodelexResult<()> {
        let dir = self.repo_dir(repo)?;
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Take the per-repository advisory lock. The checkout directory of a
    /// `(repo, version)` is owned exclusively by the ingestion in progress.
    pub fn lock(&self, repo: &RepoId) -> CodelexResult<RepoLock> {
        let dir = self.repo_dir(repo)?;
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(LOCK_FILE);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => Ok(RepoLock { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(CodelexError::validation(format!(
                    "an ingestion of {} is already in progress",
                    repo
                ))
                .with_suggestion(format!(
                    "wait for it to finish, or remove the stale lock at {}",
                    path.display()
                )))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Held for the duration of an ingestion; releasing removes the lock file.
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "cannot remove lock file: {}", e);
        }
    }
}

/// Order version tags the way humans expect: numeric segments compare
/// numerically, everything else lexically.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let segments = |s: &str| -> Vec<String> {
        let mut out = Vec::new();
        let mut current = String::new();
        let mut numeric = false;
        for c in s.trim_start_matches('v').chars() {
            let is_digit = c.is_ascii_digit();
            if !current.is_empty() && is_digit != numeric {
                out.push(std::mem::take(&mut current));
            }
            numeric = is_digit;
            if c == '.' || c == '-' || c == '_' {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
                continue;
            }
            current.push(c);
        }
        if !current.is_empty() {
            out.push(current);
        }
        out
    };

    let left = segments(a);
    let right = segments(b);
    for (l, r) in left.iter().zip(right.iter()) {
        let cmp = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => l.cmp(r),
        };
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    left.len().cmp(&right.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::progress::NoopObserver;
    use git2::Signature;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> RepositoryStore {
        RepositoryStore::new(dir.path().join("repos"), None).unwrap()
    }

    fn acme() -> RepoId {
        RepoId::new("acme", "lib").unwrap()
    }

    /// Build a local repo with two tagged versions, usable as a clone URL.
    pub(crate) fn fixture_repo(dir: &Path) -> PathBuf {
        let path = dir.join("upstream");
        let repo = Repository::init(&path).unwrap();
        let sig = Signature::now("Tester", "t@example.com").unwrap();

        let mut commit = |file: &str, content: &str, message: &str| {
            std::fs::create_dir_all(path.join(file).parent().unwrap()).unwrap();
            std::fs::write(path.join(file), content).unwrap();
            let mut index = repo.index().unwrap();
            index.add_path(Path::new(file)).unwrap();
            index.write().unwrap();
            let tree_id = index.write_tree().unwrap();
            let tree = repo.find_tree(tree_id).unwrap();
            let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
            let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
            repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
                .unwrap()
        };

        commit("acme/lib/core.py", "def create(name):\n    return name\n", "v1");
        let head = repo.head().unwrap().peel(git2::ObjectType::Commit).unwrap();
        repo.tag_lightweight("v1", &head, false).unwrap();

        commit("acme/lib/core.py", "def make(name):\n    return name\n", "v2");
        let head = repo.head().unwrap().peel(git2::ObjectType::Commit).unwrap();
        repo.tag_lightweight("v2", &head, false).unwrap();

        path
    }

    #[test]
    fn test_clone_discover_checkout() {
        let dir = TempDir::new().unwrap();
        let upstream = fixture_repo(dir.path());
        let store = store(&dir);
        let repo = acme();

        store
            .clone_repo(&repo, Some(upstream.to_str().unwrap()), &NoopObserver)
            .unwrap();
        assert!(store.has_clone(&repo));

        let versions = store.list_versions(&repo).unwrap();
        assert_eq!(versions, ["v2", "v1"]);

        let checkout = store
            .checkout_version(&repo, "v1", &NoopObserver)
            .unwrap();
        assert!(checkout.join("acme/lib/core.py").exists());
        let content = std::fs::read_to_string(checkout.join("acme/lib/core.py")).unwrap();
        assert!(content.contains("def create"));

        let v2 = store.checkout_version(&repo, "v2", &NoopObserver).unwrap();
        let content = std::fs::read_to_string(v2.join("acme/lib/core.py")).unwrap();
        assert!(content.contains("def make"));

        assert_eq!(store.local_versions(&repo).unwrap(), ["v2", "v1"]);
        let pruned = store.prune(&repo, &["v2".to_string()]).unwrap();
        assert_eq!(pruned, ["v1"]);
    }

    #[test]
    fn test_double_clone_rejected() {
        let dir = TempDir::new().unwrap();
        let upstream = fixture_repo(dir.path());
        let store = store(&dir);
        let repo = acme();
        store
            .clone_repo(&repo, Some(upstream.to_str().unwrap()), &NoopObserver)
            .unwrap();
        let err = store
            .clone_repo(&repo, Some(upstream.to_str().unwrap()), &NoopObserver)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_path_escape_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let err = store.checkout_dir(&acme(), "..").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);
    }

    #[test]
    fn test_advisory_lock() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let repo = acme();
        let lock = store.lock(&repo).unwrap();
        let err = store.lock(&repo).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        drop(lock);
        assert!(store.lock(&repo).is_ok());
    }

    #[test]
    fn test_version_ordering() {
        let mut versions = vec![
            "v1.2".to_string(),
            "v1.10".to_string(),
            "v1.9".to_string(),
            "2.0".to_string(),
        ];
        versions.sort_by(|a, b| compare_versions(b, a));
        assert_eq!(versions, ["2.0", "v1.10", "v1.9", "v1.2"]);
    }
}
