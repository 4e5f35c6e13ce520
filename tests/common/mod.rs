//! Shared fixtures for the integration suites
#![allow(dead_code)]

use codelex::progress::NoopObserver;
use codelex::schema::RepoId;
use codelex::{Config, System};
use git2::{Repository, Signature};
use std::path::{Path, PathBuf};

pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage_root = root.to_path_buf();
    config.max_concurrent_parsers = 2;
    config
}

pub fn acme_lib() -> RepoId {
    RepoId::new("acme", "lib").unwrap()
}

/// Commit one file into a fixture repository.
pub fn commit_file(repo: &Repository, file: &str, content: &str, message: &str) {
    let workdir = repo.workdir().unwrap();
    let path = workdir.join(file);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(file)).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = Signature::now("Tester", "tester@example.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap();
}

pub fn tag_head(repo: &Repository, tag: &str) {
    let head = repo.head().unwrap().peel(git2::ObjectType::Commit).unwrap();
    repo.tag_lightweight(tag, &head, false).unwrap();
}

/// An upstream with two tagged versions: v1 defines
/// `acme.lib.core.create`, v2 renames it to `acme.lib.core.make`.
pub fn rename_fixture(dir: &Path) -> PathBuf {
    let path = dir.join("upstream");
    let repo = Repository::init(&path).unwrap();

    commit_file(
        &repo,
        "acme/lib/core.py",
        "def create(name):\n    \"\"\"Create a thing.\"\"\"\n    return name\n",
        "add create",
    );
    tag_head(&repo, "v1");

    commit_file(
        &repo,
        "acme/lib/core.py",
        "def make(name):\n    \"\"\"Make a thing.\"\"\"\n    return name\n",
        "rename create to make",
    );
    tag_head(&repo, "v2");

    path
}

/// Open a disk-backed system rooted in `root` and track the fixture.
pub fn tracked_system(root: &Path, upstream: &Path) -> System {
    let system = System::open(test_config(root)).unwrap();
    system
        .repos
        .add(&acme_lib(), Some(upstream.to_str().unwrap()), &NoopObserver)
        .unwrap();
    system
}
