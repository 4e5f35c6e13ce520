//! Graph builder
//!
//! Orchestrates parsing, mapping, git analysis and change-event generation
//! for one (repository, version) ingestion, and applies the results to the
//! store in the required order: stable widening is observable before the
//! version-scoped replacement, and the writer token is held across the
//! version-scoped and git writes so readers never observe a mid-update
//! state.

use crate::config::Config;
use crate::error::{CodelexError, CodelexResult};
use crate::events::{retain_events_excluding_version, ChangeEventGenerator};
use crate::git::GitIntelligence;
use crate::mapper::{self, VersionContext};
use crate::parser::{ParsedEntity, SourceParser};
use crate::progress::{report, CancellationToken, Deadline, ProgressObserver, Stage};
use crate::rdf::ontology::{evo, rdf_type, woc};
use crate::rdf::{Literal, NamedNode, Triple, TriplePattern, TripleStore};
use crate::repostore::compare_versions;
use crate::schema::{GraphSchema, RepoId};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Summary of one ingestion
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub version: String,
    pub functions: usize,
    pub classes: usize,
    pub modules: usize,
    pub files: usize,
    pub skipped_files: usize,
    pub commits: usize,
    pub events: usize,
    pub warnings: Vec<String>,
    pub duration_ms: u128,
}

/// Builder over the full component stack
pub struct GraphBuilder {
    store: Arc<TripleStore>,
    schema: GraphSchema,
    parser: SourceParser,
    git: GitIntelligence,
    events: ChangeEventGenerator,
    config: Config,
}

impl GraphBuilder {
    pub fn new(store: Arc<TripleStore>, config: Config) -> CodelexResult<Self> {
        let schema = GraphSchema::new();
        Ok(Self {
            parser: SourceParser::new(&config)?,
            git: GitIntelligence::new(schema.clone()),
            events: ChangeEventGenerator::new(schema.clone()),
            store,
            schema,
            config,
        })
    }

    pub fn schema(&self) -> &GraphSchema {
        &self.schema
    }

    /// Ingest one version: parse the checkout, widen stable identities,
    /// replace the version-scoped graphs, refresh git graphs and
    /// regenerate change events incident on `version`.
    ///
    /// `prior_versions` are the versions already ingested for this
    /// repository (any order); the nearest neighbors of `version` among
    /// them drive change-event generation.
    #[allow(clippy::too_many_arguments)]
    pub fn ingest(
        &self,
        repo: &RepoId,
        version: &str,
        checkout: &Path,
        clone_dir: &Path,
        prior_versions: &[String],
        cancel: &CancellationToken,
        observer: &dyn ProgressObserver,
    ) -> CodelexResult<BuildReport> {
        let started = Instant::now();
        let deadline = Deadline::after(self.config.processing_timeout());
        let mut report_out = BuildReport {
            version: version.to_string(),
            ..Default::default()
        };

        // Step 1: parse the checkout.
        let outcome = self.parser.parse_checkout(checkout, cancel, observer)?;
        deadline.check("ingestion")?;
        let entities = dedup_entities(outcome.entities, &mut report_out.warnings);
        report_out.skipped_files = outcome.skipped.len();
        report_out.files = outcome.files.len();

        // Step 2: mint URIs and map to triples.
        report(observer, Stage::Mapping, None, "mapping entities to triples");
        let known_functions: BTreeSet<String> = entities
            .iter()
            .filter_map(|e| match e {
                ParsedEntity::Function(f) => Some(f.qualified_name.clone()),
                _ => None,
            })
            .collect();
        let ctx = VersionContext {
            repo,
            version,
            known_functions: &known_functions,
        };

        let mut stable_candidates: Vec<(NamedNode, Vec<Triple>)> = Vec::new();
        let mut stable_membership: Vec<Triple> = Vec::new();
        let mut implementation: Vec<Triple> = Vec::new();
        let mut entities_by_file: BTreeMap<String, Vec<NamedNode>> = BTreeMap::new();

        for entity in &entities {
            cancel.checkpoint(Stage::Mapping)?;
            let mapped = mapper::map_entity(&self.schema, entity, &ctx)?;
            if let Some(stable_uri) = stable_uri_of(&self.schema, repo, entity)? {
                let file = file_of(entity);
                entities_by_file
                    .entry(file)
                    .or_default()
                    .push(stable_uri.clone());
                stable_candidates.push((stable_uri, mapped.stable_intro));
            }
            stable_membership.extend(mapped.stable_membership);
            implementation.extend(mapped.implementation);
            match entity {
                ParsedEntity::Function(_) => report_out.functions += 1,
                ParsedEntity::Class(_) => report_out.classes += 1,
                ParsedEntity::Module(_) => report_out.modules += 1,
            }
        }

        // Files and metadata graphs.
        let mut file_triples = Vec::new();
        for (path, count) in &outcome.files {
            file_triples.extend(mapper::map_file(
                &self.schema,
                repo,
                version,
                path,
                *count,
                None,
            )?);
        }
        for skipped in &outcome.skipped {
            file_triples.extend(mapper::map_file(
                &self.schema,
                repo,
                version,
                &skipped.path,
                0,
                Some(&skipped.reason),
            )?);
        }

        // Git history is CPU/I-O bound and runs before the writer is taken.
        let analysis = self.git.analyze(clone_dir, cancel, observer)?;
        deadline.check("ingestion")?;
        report_out.commits = analysis.commits.len();

        // Ingestion timestamp: the tag's commit time, so that re-ingesting
        // the same checkout is bit-for-bit reproducible.
        let ingested_at = analysis
            .tags
            .iter()
            .find(|t| t.name == version)
            .and_then(|t| {
                analysis
                    .commits
                    .iter()
                    .find(|c| c.sha == t.target_sha)
                    .map(|c| c.authored_at.clone())
            })
            .unwrap_or_else(|| "1970-01-01T00:00:00+00:00".to_string());
        let meta_triples = mapper::version_meta(
            &self.schema,
            repo,
            version,
            report_out.functions,
            report_out.classes,
            report_out.modules,
            &ingested_at,
        )?;

        let stable_graph = self.schema.stable_functions(repo);
        let new_intros: Vec<Triple> = {
            let mut intros = Vec::new();
            for (stable_uri, intro) in stable_candidates {
                let existing = self.store.match_in_graph(
                    &stable_graph,
                    &TriplePattern::new(
                        Some(stable_uri.into()),
                        Some(rdf_type()),
                        None,
                    ),
                );
                if existing.is_empty() {
                    intros.extend(intro);
                }
            }
            intros
        };

        cancel.checkpoint(Stage::Writing)?;
        report(observer, Stage::Writing, None, "applying graphs");

        // Steps 3-6 under the writer token. A failure after the
        // version-scoped upserts drops those graphs again so no partial
        // version survives.
        let mut writer = self.store.writer();
        let result = (|| -> CodelexResult<usize> {
            // Step 3: widen stable identities (append; duplicates idempotent).
            writer
                .append_to_graph(&stable_graph, new_intros)
                .map_err(store_err)?;
            writer
                .append_to_graph(&stable_graph, stable_membership)
                .map_err(store_err)?;

            // Step 4: replace version-scoped graphs atomically.
            writer
                .upsert_graph(&self.schema.implementations(repo, version), implementation)
                .map_err(store_err)?;
            writer
                .upsert_graph(&self.schema.files_for(repo, version), file_triples)
                .map_err(store_err)?;
            writer
                .upsert_graph(&self.schema.meta_for(repo, version), meta_triples)
                .map_err(store_err)?;

            // Step 5: git graphs (append-only; commits deduplicated by sha).
            let mut commit_triples = Vec::new();
            for commit in &analysis.commits {
                commit_triples.extend(self.git.commit_triples(repo, commit)?);
                commit_triples.extend(self.git.modifies_triples(
                    repo,
                    commit,
                    &entities_by_file,
                )?);
            }
            writer
                .append_to_graph(&self.schema.git_commits(repo), commit_triples)
                .map_err(store_err)?;

            let mut developer_triples = Vec::new();
            for developer in &analysis.developers {
                developer_triples.extend(self.git.developer_triples(repo, developer)?);
            }
            // Developer aggregates change as history grows; replace them.
            writer
                .upsert_graph(&self.schema.git_developers(repo), developer_triples)
                .map_err(store_err)?;

            let mut branch_triples = Vec::new();
            for branch in &analysis.branches {
                branch_triples.extend(self.git.ref_triples(repo, branch, false)?);
            }
            writer
                .upsert_graph(&self.schema.git_branches(repo), branch_triples)
                .map_err(store_err)?;

            let mut tag_triples = Vec::new();
            for tag in &analysis.tags {
                tag_triples.extend(self.git.ref_triples(repo, tag, true)?);
            }
            writer
                .upsert_graph(&self.schema.git_tags(repo), tag_triples)
                .map_err(store_err)?;

            cancel.checkpoint(Stage::ChangeEvents)?;

            // Step 6: regenerate change events incident on this version.
            let events_written = self.regenerate_events(
                &mut writer,
                repo,
                version,
                prior_versions,
                &analysis.latest_commit_by_file(),
            )?;

            // Evolution aggregates are derived data; recompute and replace.
            self.refresh_evolution(&mut writer, repo, &entities)?;

            commit_with_retry(&mut writer)?;
            Ok(events_written)
        })();

        match result {
            Ok(events_written) => {
                report_out.events = events_written;
                report_out.duration_ms = started.elapsed().as_millis();
                info!(
                    repo = %repo,
                    version,
                    functions = report_out.functions,
                    events = report_out.events,
                    "ingestion complete"
                );
                Ok(report_out)
            }
            Err(e) => {
                // Best-effort cleanup: no partially written version-scoped
                // graph survives a failed or cancelled build.
                for graph in self.schema.version_scoped(repo, version) {
                    let _ = writer.drop_graph(&graph);
                }
                let _ = writer.commit();
                Err(e)
            }
        }
    }

    /// Drop events incident on `version` and regenerate them against the
    /// nearest ingested neighbors. Returns the number of events now
    /// incident on `version`.
    pub fn regenerate_events(
        &self,
        writer: &mut crate::rdf::StoreWriter<'_>,
        repo: &RepoId,
        version: &str,
        prior_versions: &[String],
        latest_commit_by_file: &BTreeMap<String, String>,
    ) -> CodelexResult<usize> {
        let events_graph = self.schema.change_events(repo);
        let existing = self.store.triples_in_graph(&events_graph);
        let retained = retain_events_excluding_version(existing, version);

        let lower = prior_versions
            .iter()
            .filter(|v| {
                v.as_str() != version
                    && compare_versions(v, version) == std::cmp::Ordering::Less
            })
            .max_by(|a, b| compare_versions(a, b));
        let higher = prior_versions
            .iter()
            .filter(|v| {
                v.as_str() != version
                    && compare_versions(v, version) == std::cmp::Ordering::Greater
            })
            .min_by(|a, b| compare_versions(a, b));

        // When this version lands between two previously consecutive
        // versions, their direct events are superseded by the two new pairs.
        let mut retained = match (lower, higher) {
            (Some(lower), Some(higher)) => {
                crate::events::retain_events_excluding_pair(retained, lower, higher)
            }
            _ => retained,
        };

        let mut written = 0usize;
        let mut pairs: Vec<(String, String)> = Vec::new();
        if let Some(lower) = lower {
            pairs.push((lower.clone(), version.to_string()));
        }
        if let Some(higher) = higher {
            pairs.push((version.to_string(), higher.clone()));
        }

        for (from, to) in pairs {
            let older = self.events.snapshot(&self.store, repo, &from);
            let newer = self.events.snapshot(&self.store, repo, &to);
            let events = self.events.diff(&older, &newer, &from, &to);
            for event in &events {
                let sha = event
                    .file
                    .as_deref()
                    .and_then(|f| latest_commit_by_file.get(f))
                    .map(String::as_str);
                retained.extend(self.events.event_triples(repo, event, sha)?);
            }
            written += events.len();
        }

        writer
            .upsert_graph(&events_graph, retained)
            .map_err(store_err)?;
        Ok(written)
    }

    /// Recompute the repository-level statistics graph from current store
    /// contents. Also used after a version removal.
    pub(crate) fn refresh_statistics(
        &self,
        writer: &mut crate::rdf::StoreWriter<'_>,
        repo: &RepoId,
    ) -> CodelexResult<()> {
        let stable_graph = self.schema.stable_functions(repo);
        let function_total = self
            .store
            .match_in_graph(
                &stable_graph,
                &TriplePattern::new(None, Some(rdf_type()), Some(woc::function().into())),
            )
            .len();
        let class_total = self
            .store
            .match_in_graph(
                &stable_graph,
                &TriplePattern::new(None, Some(rdf_type()), Some(woc::class().into())),
            )
            .len();
        let version_count = self
            .store
            .list_graphs(Some(&self.schema.implementations_prefix(repo)))
            .len();

        let stats = self.schema.stats_uri(repo)?;
        writer
            .upsert_graph(
                &self.schema.evolution_statistics(repo),
                vec![
                    Triple::new(stats.clone(), rdf_type(), evo::statistics()),
                    Triple::new(
                        stats.clone(),
                        evo::function_total(),
                        Literal::integer(function_total as i64),
                    ),
                    Triple::new(
                        stats.clone(),
                        evo::class_total(),
                        Literal::integer(class_total as i64),
                    ),
                    Triple::new(
                        stats,
                        evo::version_count(),
                        Literal::integer(version_count as i64),
                    ),
                ],
            )
            .map_err(store_err)
    }

    /// Recompute the three evolution graphs from the stable graph and the
    /// just-ingested entities.
    fn refresh_evolution(
        &self,
        writer: &mut crate::rdf::StoreWriter<'_>,
        repo: &RepoId,
        entities: &[ParsedEntity],
    ) -> CodelexResult<()> {
        self.refresh_statistics(writer, repo)?;

        // Analysis: refactor-score distribution of this ingestion.
        let mut score_buckets: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut category_buckets: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut module_functions: BTreeMap<String, usize> = BTreeMap::new();
        for entity in entities {
            match entity {
                ParsedEntity::Function(f) => {
                    *score_buckets.entry(f.score().as_str()).or_default() += 1;
                    *category_buckets.entry(f.category.as_str()).or_default() += 1;
                    *module_functions.entry(f.module_path.clone()).or_default() += 1;
                }
                ParsedEntity::Class(c) => {
                    *score_buckets.entry(c.score().as_str()).or_default() += 1;
                }
                ParsedEntity::Module(_) => {}
            }
        }

        let mut analysis_triples = Vec::new();
        for (bucket, count) in &score_buckets {
            let uri = self.schema.analysis_bucket_uri(repo, bucket)?;
            analysis_triples.push(Triple::new(uri.clone(), rdf_type(), evo::statistics()));
            analysis_triples.push(Triple::new(
                uri.clone(),
                evo::pattern_name(),
                Literal::string(*bucket),
            ));
            analysis_triples.push(Triple::new(
                uri,
                evo::bucket_count(),
                Literal::integer(*count as i64),
            ));
        }
        writer
            .upsert_graph(&self.schema.evolution_analysis(repo), analysis_triples)
            .map_err(store_err)?;

        // Patterns: implementation-category groups. Clusters: per-module
        // function membership.
        let mut pattern_triples = Vec::new();
        for (category, count) in &category_buckets {
            let uri = self.schema.pattern_uri(repo, category)?;
            pattern_triples.push(Triple::new(uri.clone(), rdf_type(), evo::pattern()));
            pattern_triples.push(Triple::new(
                uri.clone(),
                evo::pattern_name(),
                Literal::string(*category),
            ));
            pattern_triples.push(Triple::new(
                uri,
                evo::bucket_count(),
                Literal::integer(*count as i64),
            ));
        }
        for (module, count) in &module_functions {
            let uri = self.schema.cluster_uri(repo, module)?;
            pattern_triples.push(Triple::new(uri.clone(), rdf_type(), evo::cluster()));
            pattern_triples.push(Triple::new(
                uri.clone(),
                evo::cluster_module(),
                Literal::string(module),
            ));
            pattern_triples.push(Triple::new(
                uri,
                evo::bucket_count(),
                Literal::integer(*count as i64),
            ));
        }
        writer
            .upsert_graph(&self.schema.evolution_patterns(repo), pattern_triples)
            .map_err(store_err)?;
        Ok(())
    }
}

fn store_err(e: crate::rdf::StoreError) -> CodelexError {
    CodelexError::store(e.to_string())
}

/// Commit the snapshot, retrying once for transient failures.
fn commit_with_retry(writer: &mut crate::rdf::StoreWriter<'_>) -> CodelexResult<()> {
    if let Err(first) = writer.commit() {
        warn!("store commit failed, retrying once: {}", first);
        writer.commit().map_err(store_err)?;
    }
    Ok(())
}

/// Identity key is (module path, qualified name); the first parse-order
/// occurrence wins and later ones are logged as duplicates.
fn dedup_entities(
    entities: Vec<ParsedEntity>,
    warnings: &mut Vec<String>,
) -> Vec<ParsedEntity> {
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    let mut out = Vec::new();
    for entity in entities {
        let key = match &entity {
            ParsedEntity::Function(f) => {
                (f.module_path.clone(), f.qualified_name.clone())
            }
            ParsedEntity::Class(c) => (c.module_path.clone(), c.qualified_name.clone()),
            ParsedEntity::Module(m) => (m.dotted_path.clone(), m.dotted_path.clone()),
        };
        if seen.insert(key.clone()) {
            out.push(entity);
        } else {
            let message = format!("duplicate entity {} in {}", key.1, key.0);
            warn!("{}", message);
            warnings.push(message);
        }
    }
    out
}

fn stable_uri_of(
    schema: &GraphSchema,
    repo: &RepoId,
    entity: &ParsedEntity,
) -> CodelexResult<Option<NamedNode>> {
    match entity {
        ParsedEntity::Function(f) => schema.function_uri(repo, &f.qualified_name).map(Some),
        ParsedEntity::Class(c) => schema.class_uri(repo, &c.qualified_name).map(Some),
        ParsedEntity::Module(_) => Ok(None),
    }
}

fn file_of(entity: &ParsedEntity) -> String {
    let path = match entity {
        ParsedEntity::Function(f) => &f.file,
        ParsedEntity::Class(c) => &c.file,
        ParsedEntity::Module(m) => &m.file,
    };
    path.to_string_lossy().replace('\\', "/")
}
