//! Compact export
//!
//! A length-bounded, line-delimited JSON stream: header, repository,
//! per-function, per-class, per-module, per-pattern, per-cluster records
//! and a footer with aggregate stats. Recurring verbose strings (module
//! paths, file paths) are interned into a string table whose entries are
//! emitted lazily before first use, so any structured-query tool can
//! consume the artifact without this library.

use crate::config::Config;
use crate::error::{CodelexError, CodelexResult};
use crate::rdf::namespace::NamespaceManager;
use crate::sparql::{QuerySolution, SparqlEngine, SparqlError};
use crate::schema::{GraphSchema, RepoId};
use indexmap::IndexMap;
use serde_json::json;
use std::io::Write;
use std::time::Duration;
use tracing::debug;

/// Aggregate counters reported in the footer
#[derive(Debug, Default, Clone)]
pub struct CompactStats {
    pub functions_exported: usize,
    pub classes_exported: usize,
    pub modules_exported: usize,
    pub patterns_exported: usize,
    pub clusters_exported: usize,
    pub strings_interned: usize,
}

/// Lazily-emitted deduplicated string table
struct StringTable {
    entries: IndexMap<String, usize>,
}

impl StringTable {
    fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Intern a value, emitting its table record on first use.
    fn intern(&mut self, out: &mut dyn Write, value: &str) -> CodelexResult<usize> {
        if let Some(&id) = self.entries.get(value) {
            return Ok(id);
        }
        let id = self.entries.len();
        self.entries.insert(value.to_string(), id);
        write_record(out, &json!({ "type": "str", "i": id, "v": value }))?;
        Ok(id)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn write_record(out: &mut dyn Write, value: &serde_json::Value) -> CodelexResult<()> {
    serde_json::to_writer(&mut *out, value)
        .map_err(|e| CodelexError::export(e.to_string()))?;
    out.write_all(b"\n")
        .map_err(|e| CodelexError::export(e.to_string()).with_source(e))?;
    Ok(())
}

/// Streaming compact exporter
pub struct CompactExporter {
    engine: SparqlEngine,
    schema: GraphSchema,
    namespaces: NamespaceManager,
    batch_size: usize,
    timeout: Duration,
}

impl CompactExporter {
    pub fn new(engine: SparqlEngine, config: &Config) -> Self {
        Self {
            engine,
            schema: GraphSchema::new(),
            namespaces: NamespaceManager::new(),
            batch_size: config.export_batch_size,
            timeout: config.query_timeout(),
        }
    }

    /// Stream the compact artifact for one (repository, version).
    pub fn export(
        &self,
        repo: &RepoId,
        version: &str,
        releases: &[String],
        out: &mut dyn Write,
    ) -> CodelexResult<CompactStats> {
        let mut stats = CompactStats::default();
        let mut strings = StringTable::new();

        write_record(
            out,
            &json!({ "type": "header", "repo": repo.to_string(), "release": version }),
        )?;
        write_record(
            out,
            &json!({
                "type": "repository",
                "org": repo.org(),
                "name": repo.name(),
                "releases": releases,
            }),
        )?;

        self.export_functions(repo, version, out, &mut strings, &mut stats)?;
        self.export_classes(repo, version, out, &mut strings, &mut stats)?;
        self.export_modules(repo, version, out, &mut strings, &mut stats)?;
        self.export_patterns(repo, out, &mut stats)?;

        stats.strings_interned = strings.len();
        write_record(
            out,
            &json!({
                "type": "footer",
                "stats": {
                    "functions_exported": stats.functions_exported,
                    "classes_exported": stats.classes_exported,
                    "modules_exported": stats.modules_exported,
                    "patterns_exported": stats.patterns_exported,
                    "clusters_exported": stats.clusters_exported,
                    "strings_interned": stats.strings_interned,
                }
            }),
        )?;
        Ok(stats)
    }

    /// Run a SELECT in LIMIT/OFFSET batches over a stable ordering key,
    /// handing each batch to `consume` until the result set is exhausted.
    fn paged<F>(&self, query_body: &str, mut consume: F) -> CodelexResult<()>
    where
        F: FnMut(&[QuerySolution]) -> CodelexResult<()>,
    {
        let mut offset = 0usize;
        loop {
            let query = format!(
                "{}{} LIMIT {} OFFSET {}",
                self.namespaces.sparql_preamble(),
                query_body,
                self.batch_size,
                offset
            );
            let (_, rows) = self
                .engine
                .select(&query, self.timeout)
                .map_err(sparql_err)?;
            let fetched = rows.len();
            consume(&rows)?;
            if fetched < self.batch_size {
                return Ok(());
            }
            offset += fetched;
        }
    }

    fn export_functions(
        &self,
        repo: &RepoId,
        version: &str,
        out: &mut dyn Write,
        strings: &mut StringTable,
        stats: &mut CompactStats,
    ) -> CodelexResult<()> {
        let graph = self.schema.implementations(repo, version);
        let body = format!(
            "SELECT ?impl ?n ?s ?m ?f ?l ?loc ?cat ?score WHERE {{\n\
             GRAPH <{}> {{\n\
             ?impl a woc:FunctionImplementation ;\n\
                   woc:canonicalName ?n ;\n\
                   woc:signature ?s ;\n\
                   woc:modulePath ?m ;\n\
                   woc:definedInFile ?f ;\n\
                   woc:startLine ?l ;\n\
                   woc:lineCount ?loc ;\n\
                   woc:category ?cat ;\n\
                   woc:refactorScore ?score .\n\
             }} }} ORDER BY ?impl",
            graph
        );
        self.paged(&body, |rows| {
            for row in rows {
                let module = strings.intern(out, row.text("m").unwrap_or_default())?;
                let file = strings.intern(out, row.text("f").unwrap_or_default())?;
                write_record(
                    out,
                    &json!({
                        "type": "function",
                        "n": row.text("n"),
                        "s": row.text("s"),
                        "m": module,
                        "f": file,
                        "l": row.integer("l"),
                        "loc": row.integer("loc"),
                        "cat": row.text("cat"),
                        "refactor": row.text("score"),
                    }),
                )?;
                stats.functions_exported += 1;
            }
            Ok(())
        })?;
        debug!(functions = stats.functions_exported, "functions exported");
        Ok(())
    }

    fn export_classes(
        &self,
        repo: &RepoId,
        version: &str,
        out: &mut dyn Write,
        strings: &mut StringTable,
        stats: &mut CompactStats,
    ) -> CodelexResult<()> {
        let graph = self.schema.implementations(repo, version);
        let body = format!(
            "SELECT ?impl ?n ?m ?methods ?cat ?score ?parent WHERE {{\n\
             GRAPH <{}> {{\n\
             ?impl a woc:ClassImplementation ;\n\
                   woc:canonicalName ?n ;\n\
                   woc:modulePath ?m ;\n\
                   woc:methodCount ?methods ;\n\
                   woc:category ?cat ;\n\
                   woc:refactorScore ?score .\n\
             OPTIONAL {{ ?impl woc:parentClass ?parent }}\n\
             }} }} ORDER BY ?impl ?parent",
            graph
        );
        let mut last_impl: Option<String> = None;
        self.paged(&body, |rows| {
            for row in rows {
                // One record per class; extra rows carry additional parents.
                let impl_uri = row.iri("impl").unwrap_or_default().to_string();
                if last_impl.as_deref() == Some(impl_uri.as_str()) {
                    continue;
                }
                last_impl = Some(impl_uri);
                let module = strings.intern(out, row.text("m").unwrap_or_default())?;
                write_record(
                    out,
                    &json!({
                        "type": "class",
                        "n": row.text("n"),
                        "m": module,
                        "inherits": row.text("parent"),
                        "methods": row.integer("methods"),
                        "cat": row.text("cat"),
                        "refactor": row.text("score"),
                    }),
                )?;
                stats.classes_exported += 1;
            }
            Ok(())
        })
    }

    fn export_modules(
        &self,
        repo: &RepoId,
        version: &str,
        out: &mut dyn Write,
        strings: &mut StringTable,
        stats: &mut CompactStats,
    ) -> CodelexResult<()> {
        let graph = self.schema.implementations(repo, version);
        let body = format!(
            "SELECT ?module ?name ?path ?functions ?score WHERE {{\n\
             GRAPH <{}> {{\n\
             ?module a woc:Module ;\n\
                     woc:canonicalName ?name ;\n\
                     woc:definedInFile ?path ;\n\
                     woc:functionCount ?functions ;\n\
                     woc:refactorScore ?score .\n\
             }} }} ORDER BY ?module",
            graph
        );
        self.paged(&body, |rows| {
            for row in rows {
                let path = strings.intern(out, row.text("path").unwrap_or_default())?;
                write_record(
                    out,
                    &json!({
                        "type": "module",
                        "name": row.text("name"),
                        "path": path,
                        "function_count": row.integer("functions"),
                        "category": row.text("score"),
                    }),
                )?;
                stats.modules_exported += 1;
            }
            Ok(())
        })
    }

    fn export_patterns(
        &self,
        repo: &RepoId,
        out: &mut dyn Write,
        stats: &mut CompactStats,
    ) -> CodelexResult<()> {
        let graph = self.schema.evolution_patterns(repo);
        let patterns = format!(
            "SELECT ?p ?name ?count WHERE {{\n\
             GRAPH <{}> {{\n\
             ?p a evo:Pattern ; evo:patternName ?name ; evo:bucketCount ?count .\n\
             }} }} ORDER BY ?p",
            graph
        );
        self.paged(&patterns, |rows| {
            for row in rows {
                write_record(
                    out,
                    &json!({
                        "type": "pattern",
                        "p": row.text("name"),
                        "count": row.integer("count"),
                    }),
                )?;
                stats.patterns_exported += 1;
            }
            Ok(())
        })?;

        let clusters = format!(
            "SELECT ?c ?module ?count WHERE {{\n\
             GRAPH <{}> {{\n\
             ?c a evo:Cluster ; evo:clusterModule ?module ; evo:bucketCount ?count .\n\
             }} }} ORDER BY ?c",
            graph
        );
        self.paged(&clusters, |rows| {
            for row in rows {
                write_record(
                    out,
                    &json!({
                        "type": "cluster",
                        "c": row.text("module"),
                        "count": row.integer("count"),
                    }),
                )?;
                stats.clusters_exported += 1;
            }
            Ok(())
        })
    }
}

fn sparql_err(e: SparqlError) -> CodelexError {
    match e {
        SparqlError::UpdateForm => CodelexError::security(e.to_string()),
        other => CodelexError::export(other.to_string()),
    }
}
