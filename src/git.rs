//! Git intelligence
//!
//! Walks a repository's full history and distills commits, developer
//! aggregates, branches and tags into triple sets for the four git graphs.
//! Commit-to-entity links (`git:modifies`) always terminate at stable
//! entity URIs, never at version-scoped implementations.

use crate::error::{CodelexError, CodelexResult};
use crate::progress::{report, CancellationToken, ProgressObserver, Stage};
use crate::rdf::ontology::{git as git_ns, rdf_type};
use crate::rdf::{Literal, NamedNode, Triple};
use crate::schema::{GraphSchema, RepoId};
use git2::{BranchType, Repository, Sort};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Commits processed between cancellation checks
const COMMIT_BATCH: usize = 200;

/// One commit, already flattened for mapping
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub sha: String,
    /// Opaque string; author emails are never parsed as anything else.
    pub author_email: String,
    pub author_name: String,
    /// RFC 3339 timestamp
    pub authored_at: String,
    pub message: String,
    pub changed_files: Vec<String>,
}

/// Per-author aggregate
#[derive(Debug, Clone)]
pub struct DeveloperRecord {
    pub email: String,
    pub name: String,
    pub commit_count: u64,
    pub first_seen: String,
    pub last_seen: String,
}

/// A branch or tag pointing at a commit
#[derive(Debug, Clone)]
pub struct RefRecord {
    pub name: String,
    pub target_sha: String,
}

/// Everything extracted from one repository's history
#[derive(Debug, Default)]
pub struct GitAnalysis {
    pub commits: Vec<CommitRecord>,
    pub developers: Vec<DeveloperRecord>,
    pub branches: Vec<RefRecord>,
    pub tags: Vec<RefRecord>,
}

impl GitAnalysis {
    /// Most recent commit sha touching each file, used for best-effort
    /// change-event attribution.
    pub fn latest_commit_by_file(&self) -> BTreeMap<String, String> {
        let mut latest: BTreeMap<String, (String, String)> = BTreeMap::new();
        for commit in &self.commits {
            for file in &commit.changed_files {
                match latest.get(file) {
                    Some((seen_at, _)) if *seen_at >= commit.authored_at => {}
                    _ => {
                        latest.insert(
                            file.clone(),
                            (commit.authored_at.clone(), commit.sha.clone()),
                        );
                    }
                }
            }
        }
        latest
            .into_iter()
            .map(|(file, (_, sha))| (file, sha))
            .collect()
    }
}

/// History extraction and triple emission for the git graphs
pub struct GitIntelligence {
    schema: GraphSchema,
}

impl GitIntelligence {
    pub fn new(schema: GraphSchema) -> Self {
        Self { schema }
    }

    /// Extract the full history of the repository at `path`.
    pub fn analyze(
        &self,
        path: &Path,
        cancel: &CancellationToken,
        observer: &dyn ProgressObserver,
    ) -> CodelexResult<GitAnalysis> {
        let repo = Repository::open(path).map_err(CodelexError::from)?;
        report(observer, Stage::GitAnalysis, Some(0.0), "walking history");

        let mut revwalk = repo.revwalk()?;
        revwalk.set_sorting(Sort::TIME)?;
        revwalk.push_head()?;

        let mut analysis = GitAnalysis::default();
        let mut processed = 0usize;
        for oid in revwalk {
            if processed % COMMIT_BATCH == 0 {
                cancel.checkpoint(Stage::GitAnalysis)?;
            }
            processed += 1;

            let oid = oid?;
            let commit = repo.find_commit(oid)?;
            let author = commit.author();
            let authored_at = format_timestamp(commit.time().seconds());
            let changed_files = changed_files(&repo, &commit)?;

            analysis.commits.push(CommitRecord {
                sha: oid.to_string(),
                author_email: author.email().unwrap_or("unknown").to_string(),
                author_name: author.name().unwrap_or("unknown").to_string(),
                authored_at,
                message: commit.message().unwrap_or_default().trim().to_string(),
                changed_files,
            });
        }
        debug!(commits = analysis.commits.len(), "history walked");

        analysis.developers = aggregate_developers(&analysis.commits);

        for branch in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            let name = match branch.name()? {
                Some(name) => name.to_string(),
                None => continue,
            };
            if let Some(target) = branch.get().target() {
                analysis.branches.push(RefRecord {
                    name,
                    target_sha: target.to_string(),
                });
            }
        }

        let tag_names = repo.tag_names(None)?;
        for name in tag_names.iter().flatten() {
            let reference = format!("refs/tags/{}", name);
            match repo
                .find_reference(&reference)
                .and_then(|r| r.peel_to_commit())
            {
                Ok(commit) => analysis.tags.push(RefRecord {
                    name: name.to_string(),
                    target_sha: commit.id().to_string(),
                }),
                Err(e) => warn!(tag = name, "cannot resolve tag: {}", e),
            }
        }

        report(
            observer,
            Stage::GitAnalysis,
            Some(100.0),
            format!(
                "{} commits, {} developers, {} tags",
                analysis.commits.len(),
                analysis.developers.len(),
                analysis.tags.len()
            ),
        );
        Ok(analysis)
    }

    /// Triples for one commit. Commits are immutable and deduplicated by
    /// sha through idempotent appends.
    pub fn commit_triples(
        &self,
        repo: &RepoId,
        commit: &CommitRecord,
    ) -> CodelexResult<Vec<Triple>> {
        let uri = self.schema.commit_uri(repo, &commit.sha)?;
        let mut triples = vec![
            Triple::new(uri.clone(), rdf_type(), git_ns::commit()),
            Triple::new(uri.clone(), git_ns::sha(), Literal::string(&commit.sha)),
            Triple::new(
                uri.clone(),
                git_ns::author_email(),
                Literal::string(&commit.author_email),
            ),
            Triple::new(
                uri.clone(),
                git_ns::author_name(),
                Literal::string(&commit.author_name),
            ),
            Triple::new(
                uri.clone(),
                git_ns::authored_at(),
                Literal::date_time(&commit.authored_at),
            ),
            Triple::new(
                uri.clone(),
                git_ns::message(),
                Literal::string(&commit.message),
            ),
        ];
        for file in &commit.changed_files {
            triples.push(Triple::new(
                uri.clone(),
                git_ns::changed_file(),
                Literal::string(file),
            ));
        }
        Ok(triples)
    }

    /// `git:modifies` edges from a commit to the stable entities whose
    /// defining files it touched.
    pub fn modifies_triples(
        &self,
        repo: &RepoId,
        commit: &CommitRecord,
        entities_by_file: &BTreeMap<String, Vec<NamedNode>>,
    ) -> CodelexResult<Vec<Triple>> {
        let uri = self.schema.commit_uri(repo, &commit.sha)?;
        let mut triples = Vec::new();
        for file in &commit.changed_files {
            if let Some(entities) = entities_by_file.get(file) {
                for entity in entities {
                    triples.push(Triple::new(
                        uri.clone(),
                        git_ns::modifies(),
                        entity.clone(),
                    ));
                }
            }
        }
        Ok(triples)
    }

    pub fn developer_triples(
        &self,
        repo: &RepoId,
        developer: &DeveloperRecord,
    ) -> CodelexResult<Vec<Triple>> {
        let uri = self.schema.developer_uri(repo, &developer.email)?;
        Ok(vec![
            Triple::new(uri.clone(), rdf_type(), git_ns::developer()),
            Triple::new(
                uri.clone(),
                git_ns::author_email(),
                Literal::string(&developer.email),
            ),
            Triple::new(
                uri.clone(),
                git_ns::author_name(),
                Literal::string(&developer.name),
            ),
            Triple::new(
                uri.clone(),
                git_ns::commit_count(),
                Literal::integer(developer.commit_count as i64),
            ),
            Triple::new(
                uri.clone(),
                git_ns::first_seen(),
                Literal::date_time(&developer.first_seen),
            ),
            Triple::new(
                uri,
                git_ns::last_seen(),
                Literal::date_time(&developer.last_seen),
            ),
        ])
    }

    pub fn ref_triples(
        &self,
        repo: &RepoId,
        record: &RefRecord,
        is_tag: bool,
    ) -> CodelexResult<Vec<Triple>> {
        let kind = if is_tag { "tag" } else { "branch" };
        let uri = self.schema.ref_uri(repo, kind, &record.name)?;
        Ok(vec![
            Triple::new(
                uri.clone(),
                rdf_type(),
                if is_tag { git_ns::tag() } else { git_ns::branch() },
            ),
            Triple::new(uri.clone(), git_ns::name(), Literal::string(&record.name)),
            Triple::new(
                uri,
                git_ns::target(),
                Literal::string(&record.target_sha),
            ),
        ])
    }
}

fn format_timestamp(seconds: i64) -> String {
    chrono::DateTime::from_timestamp(seconds, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "1970-01-01T00:00:00+00:00".to_string())
}

fn changed_files(repo: &Repository, commit: &git2::Commit<'_>) -> CodelexResult<Vec<String>> {
    let tree = commit.tree()?;
    let parent_tree = match commit.parent(0) {
        Ok(parent) => Some(parent.tree()?),
        Err(_) => None,
    };
    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;

    let mut files = Vec::new();
    diff.foreach(
        &mut |delta, _| {
            if let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) {
                files.push(path.to_string_lossy().replace('\\', "/"));
            }
            true
        },
        None,
        None,
        None,
    )?;
    files.sort();
    files.dedup();
    Ok(files)
}

fn aggregate_developers(commits: &[CommitRecord]) -> Vec<DeveloperRecord> {
    let mut by_email: BTreeMap<String, DeveloperRecord> = BTreeMap::new();
    for commit in commits {
        let entry = by_email
            .entry(commit.author_email.clone())
            .or_insert_with(|| DeveloperRecord {
                email: commit.author_email.clone(),
                name: commit.author_name.clone(),
                commit_count: 0,
                first_seen: commit.authored_at.clone(),
                last_seen: commit.authored_at.clone(),
            });
        entry.commit_count += 1;
        if commit.authored_at < entry.first_seen {
            entry.first_seen = commit.authored_at.clone();
        }
        if commit.authored_at > entry.last_seen {
            entry.last_seen = commit.authored_at.clone();
        }
    }
    by_email.into_values().collect()
}
