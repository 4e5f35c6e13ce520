//! Graph lifecycle
//!
//! add / update / remove / list / show over the graph layout of one
//! repository. `update` is the nuclear rebuild: version-scoped graphs are
//! dropped and rebuilt from the current checkout without disturbing stable
//! identities or cross-version references. A `(repo, version)` graph unit
//! moves `absent -> building -> ready`; failures fall back to `absent`
//! after cleanup.

use super::{check_confirmation, Registry, RepoStatus};
use crate::builder::{BuildReport, GraphBuilder};
use crate::config::Config;
use crate::error::{CodelexError, CodelexResult};
use crate::events::retain_events_excluding_version;
use crate::progress::{CancellationToken, ProgressObserver};
use crate::rdf::ontology::woc;
use crate::rdf::{RdfObject, Triple, TripleStore};
use crate::repostore::RepositoryStore;
use crate::schema::{GraphSchema, RepoId};
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Summary of one named graph
#[derive(Debug, Clone)]
pub struct GraphInfo {
    pub uri: String,
    pub triples: usize,
}

/// Graph lifecycle operations
pub struct GraphManager {
    config: Config,
    store: Arc<TripleStore>,
    repostore: RepositoryStore,
    registry: Registry,
    builder: GraphBuilder,
    schema: GraphSchema,
}

impl GraphManager {
    pub fn new(config: Config, store: Arc<TripleStore>) -> CodelexResult<Self> {
        let repostore =
            RepositoryStore::new(config.repos_dir(), config.auth_token.clone())?;
        let registry = Registry::new(&config.repos_dir());
        let builder = GraphBuilder::new(Arc::clone(&store), config.clone())?;
        Ok(Self {
            config,
            store,
            repostore,
            registry,
            builder,
            schema: GraphSchema::new(),
        })
    }

    /// Versions of a repository with an ingested implementations partition.
    pub fn ingested_versions(&self, repo: &RepoId) -> Vec<String> {
        let prefix = self.schema.implementations_prefix(repo);
        self.store
            .list_graphs(Some(&prefix))
            .into_iter()
            .filter_map(|uri| {
                let encoded = uri.strip_prefix(&prefix)?;
                percent_decode_str(encoded)
                    .decode_utf8()
                    .ok()
                    .map(|s| s.into_owned())
            })
            .collect()
    }

    /// Build the graphs for one version. Fails if graphs already exist for
    /// it, unless `force`.
    pub fn add(
        &self,
        repo: &RepoId,
        version: Option<&str>,
        force: bool,
        cancel: &CancellationToken,
        observer: &dyn ProgressObserver,
    ) -> CodelexResult<BuildReport> {
        let record = self.registry.require(repo)?;
        let version = match version {
            Some(v) => v.to_string(),
            None => record.releases.first().cloned().ok_or_else(|| {
                CodelexError::validation(format!("{} has no discovered versions", repo))
                    .with_suggestion("run repo update to discover version tags")
            })?,
        };

        let implementations = self.schema.implementations(repo, &version);
        if self.store.contains_graph(&implementations) && !force {
            return Err(CodelexError::validation(format!(
                "graphs for {} {} already exist",
                repo, version
            ))
            .with_suggestion("pass --force to rebuild, or use graph update"));
        }

        self.build(repo, &version, cancel, observer)
    }

    /// The nuclear rebuild: drop the version-scoped graphs, rebuild them
    /// from the current checkout, and regenerate change events incident on
    /// `version`. Stable triples are updated by union, never rewritten.
    pub fn update(
        &self,
        repo: &RepoId,
        version: &str,
        cancel: &CancellationToken,
        observer: &dyn ProgressObserver,
    ) -> CodelexResult<BuildReport> {
        self.registry.require(repo)?;
        let implementations = self.schema.implementations(repo, version);
        if !self.store.contains_graph(&implementations) {
            return Err(CodelexError::validation(format!(
                "no graphs exist for {} {}",
                repo, version
            ))
            .with_suggestion("use graph add to build them first"));
        }

        {
            let mut writer = self.store.writer();
            for graph in self.schema.version_scoped(repo, version) {
                writer
                    .drop_graph(&graph)
                    .map_err(|e| CodelexError::store(e.to_string()))?;
            }
        }
        self.build(repo, version, cancel, observer)
    }

    fn build(
        &self,
        repo: &RepoId,
        version: &str,
        cancel: &CancellationToken,
        observer: &dyn ProgressObserver,
    ) -> CodelexResult<BuildReport> {
        let _lock = self.repostore.lock(repo)?;
        self.registry.set_status(repo, RepoStatus::Processing)?;

        let result = (|| {
            let checkout = self.repostore.checkout_version(repo, version, observer)?;
            let clone_dir = self.repostore.repo_dir(repo)?;
            let prior: Vec<String> = self
                .ingested_versions(repo)
                .into_iter()
                .filter(|v| v != version)
                .collect();
            self.builder.ingest(
                repo,
                version,
                &checkout,
                &clone_dir,
                &prior,
                cancel,
                observer,
            )
        })();

        let status = if result.is_ok() {
            RepoStatus::Ready
        } else {
            RepoStatus::Error
        };
        self.registry.set_status(repo, status)?;
        result
    }

    /// Remove graphs. With a version: drop only the version-scoped graphs,
    /// excise the version from every stable entity's version set (removing
    /// entities whose set becomes empty), and drop change events incident
    /// on it. Without a version: drop every graph of the repository,
    /// stable included.
    pub fn remove(
        &self,
        repo: &RepoId,
        version: Option<&str>,
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

        let mut writer = self.store.writer();
        match version {
            None => {
                let prefix = self.schema.repo_prefix(repo);
                for graph in self.store.list_graphs(Some(&prefix)) {
                    writer
                        .drop_graph(&graph)
                        .map_err(|e| CodelexError::store(e.to_string()))?;
                }
                info!(repo = %repo, "all graphs removed");
            }
            Some(version) => {
                for graph in self.schema.version_scoped(repo, version) {
                    writer
                        .drop_graph(&graph)
                        .map_err(|e| CodelexError::store(e.to_string()))?;
                }

                let stable_graph = self.schema.stable_functions(repo);
                let remaining =
                    excise_version(self.store.triples_in_graph(&stable_graph), version);
                writer
                    .upsert_graph(&stable_graph, remaining)
                    .map_err(|e| CodelexError::store(e.to_string()))?;

                let events_graph = self.schema.change_events(repo);
                let kept = retain_events_excluding_version(
                    self.store.triples_in_graph(&events_graph),
                    version,
                );
                writer
                    .upsert_graph(&events_graph, kept)
                    .map_err(|e| CodelexError::store(e.to_string()))?;

                self.builder.refresh_statistics(&mut writer, repo)?;
                info!(repo = %repo, version, "version graphs removed");
            }
        }
        writer
            .commit()
            .map_err(|e| CodelexError::store(e.to_string()))?;
        Ok(())
    }

    /// Enumerate graphs, optionally narrowed to one repository.
    pub fn list(&self, repo: Option<&RepoId>) -> Vec<GraphInfo> {
        let prefix = repo.map(|r| self.schema.repo_prefix(r));
        self.store
            .list_graphs(prefix.as_deref())
            .into_iter()
            .map(|uri| GraphInfo {
                triples: self.store.graph_len(&uri),
                uri,
            })
            .collect()
    }

    /// Graph summaries for one repository, optionally narrowed to the
    /// version-scoped graphs of one version.
    pub fn show(&self, repo: &RepoId, version: Option<&str>) -> CodelexResult<Vec<GraphInfo>> {
        self.registry.require(repo)?;
        Ok(match version {
            None => self.list(Some(repo)),
            Some(version) => self
                .schema
                .version_scoped(repo, version)
                .into_iter()
                .map(|uri| GraphInfo {
                    triples: self.store.graph_len(&uri),
                    uri,
                })
                .collect(),
        })
    }
}

/// Drop one version from every stable entity's `existsInVersion` set;
/// entities whose set becomes empty lose all their triples.
fn excise_version(stable: Vec<Triple>, version: &str) -> Vec<Triple> {
    let mut by_subject: BTreeMap<String, Vec<Triple>> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    for triple in stable {
        let key = triple.subject.to_string();
        if !by_subject.contains_key(&key) {
            order.push(key.clone());
        }
        by_subject.entry(key).or_default().push(triple);
    }

    let membership = woc::exists_in_version();
    let mut out = Vec::new();
    for key in order {
        let triples = by_subject.remove(&key).unwrap_or_default();
        let mut kept = Vec::new();
        let mut versions_left = 0usize;
        for triple in triples {
            if triple.predicate == membership {
                let matches = matches!(
                    &triple.object,
                    RdfObject::Literal(l) if l.value() == version
                );
                if matches {
                    continue;
                }
                versions_left += 1;
            }
            kept.push(triple);
        }
        if versions_left > 0 {
            out.extend(kept);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdf::ontology::{rdf_type, woc};
    use crate::rdf::{Literal, NamedNode};

    fn stable_entity(name: &str, versions: &[&str]) -> Vec<Triple> {
        let uri = NamedNode::new(format!("function:acme/lib/{}", name)).unwrap();
        let mut triples = vec![
            Triple::new(uri.clone(), rdf_type(), woc::function()),
            Triple::new(uri.clone(), woc::canonical_name(), Literal::string(name)),
        ];
        for v in versions {
            triples.push(Triple::new(
                uri.clone(),
                woc::exists_in_version(),
                Literal::string(*v),
            ));
        }
        triples
    }

    #[test]
    fn test_excise_version_removes_membership() {
        let mut triples = stable_entity("a", &["v1", "v2"]);
        triples.extend(stable_entity("b", &["v1"]));

        let remaining = excise_version(triples, "v1");
        let rendered: Vec<String> = remaining.iter().map(Triple::render).collect();

        // `a` survives with only its v2 membership.
        assert!(rendered.iter().any(|t| t.contains("function:acme/lib/a")));
        assert!(!rendered
            .iter()
            .any(|t| t.contains("function:acme/lib/a") && t.contains("\"v1\"")));
        assert!(rendered
            .iter()
            .any(|t| t.contains("function:acme/lib/a") && t.contains("\"v2\"")));

        // `b` had only v1 and is gone entirely.
        assert!(!rendered.iter().any(|t| t.contains("function:acme/lib/b")));
    }

    #[test]
    fn test_excise_untouched_version() {
        let triples = stable_entity("a", &["v1"]);
        let remaining = excise_version(triples.clone(), "v9");
        assert_eq!(remaining.len(), triples.len());
    }
}
