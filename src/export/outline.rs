//! Outline export
//!
//! A hierarchical text tree of one ingested version: module, then class,
//! then function, each with its signature and the first docstring line.
//! Emitted as a stream, one module subtree at a time.

use crate::config::Config;
use crate::error::{CodelexError, CodelexResult};
use crate::events::qualified_name_of;
use crate::rdf::namespace::NamespaceManager;
use crate::schema::{GraphSchema, RepoId};
use crate::sparql::{QuerySolution, SparqlEngine};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::time::Duration;

#[derive(Debug, Default)]
struct OutlineFunction {
    qualified_name: String,
    signature: String,
    doc_first_line: Option<String>,
}

#[derive(Debug, Default)]
struct OutlineClass {
    signature: String,
    doc_first_line: Option<String>,
    methods: BTreeSet<String>,
}

/// Streaming outline exporter
pub struct OutlineExporter {
    engine: SparqlEngine,
    schema: GraphSchema,
    namespaces: NamespaceManager,
    batch_size: usize,
    timeout: Duration,
}

impl OutlineExporter {
    pub fn new(engine: SparqlEngine, config: &Config) -> Self {
        Self {
            engine,
            schema: GraphSchema::new(),
            namespaces: NamespaceManager::new(),
            batch_size: config.export_batch_size,
            timeout: config.query_timeout(),
        }
    }

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
                .map_err(|e| CodelexError::export(e.to_string()))?;
            let fetched = rows.len();
            consume(&rows)?;
            if fetched < self.batch_size {
                return Ok(());
            }
            offset += fetched;
        }
    }

    /// Stream the outline for one (repository, version).
    pub fn export(
        &self,
        repo: &RepoId,
        version: &str,
        out: &mut dyn Write,
    ) -> CodelexResult<()> {
        let graph = self.schema.implementations(repo, version);

        // module path -> (file, set of class names)
        let mut modules: BTreeMap<String, String> = BTreeMap::new();
        let body = format!(
            "SELECT ?m ?name ?path WHERE {{ GRAPH <{}> {{\n\
             ?m a woc:Module ; woc:canonicalName ?name ; woc:definedInFile ?path .\n\
             }} }} ORDER BY ?m",
            graph
        );
        self.paged(&body, |rows| {
            for row in rows {
                modules.insert(
                    row.text("name").unwrap_or_default().to_string(),
                    row.text("path").unwrap_or_default().to_string(),
                );
            }
            Ok(())
        })?;

        // module path -> class name -> class outline
        let mut classes: BTreeMap<String, BTreeMap<String, OutlineClass>> = BTreeMap::new();
        let body = format!(
            "SELECT ?impl ?n ?m ?s ?doc ?method WHERE {{ GRAPH <{}> {{\n\
             ?impl a woc:ClassImplementation ;\n\
                   woc:canonicalName ?n ;\n\
                   woc:modulePath ?m ;\n\
                   woc:signature ?s .\n\
             OPTIONAL {{ ?impl woc:docstring ?doc }}\n\
             OPTIONAL {{ ?impl woc:hasMethod ?method }}\n\
             }} }} ORDER BY ?impl ?method",
            graph
        );
        self.paged(&body, |rows| {
            for row in rows {
                let module = row.text("m").unwrap_or_default().to_string();
                let name = row.text("n").unwrap_or_default().to_string();
                let class = classes
                    .entry(module)
                    .or_default()
                    .entry(name)
                    .or_default();
                class.signature = row.text("s").unwrap_or_default().to_string();
                class.doc_first_line = row
                    .text("doc")
                    .and_then(|d| d.lines().next())
                    .map(str::to_string);
                if let Some(method) = row.iri("method") {
                    if let Some(qualified) = qualified_name_of(method) {
                        class.methods.insert(qualified);
                    }
                }
            }
            Ok(())
        })?;

        // module path -> functions (methods and free functions alike)
        let mut functions: BTreeMap<String, Vec<OutlineFunction>> = BTreeMap::new();
        let body = format!(
            "SELECT ?impl ?stable ?m ?s ?doc WHERE {{ GRAPH <{}> {{\n\
             ?impl a woc:FunctionImplementation ;\n\
                   woc:implementsFunction ?stable ;\n\
                   woc:modulePath ?m ;\n\
                   woc:signature ?s .\n\
             OPTIONAL {{ ?impl woc:docstring ?doc }}\n\
             }} }} ORDER BY ?impl",
            graph
        );
        self.paged(&body, |rows| {
            for row in rows {
                let module = row.text("m").unwrap_or_default().to_string();
                let qualified_name = row
                    .iri("stable")
                    .and_then(qualified_name_of)
                    .unwrap_or_default();
                functions.entry(module).or_default().push(OutlineFunction {
                    qualified_name,
                    signature: row.text("s").unwrap_or_default().to_string(),
                    doc_first_line: row
                        .text("doc")
                        .and_then(|d| d.lines().next())
                        .map(str::to_string),
                });
            }
            Ok(())
        })?;

        writeln!(out, "{} {}", repo, version).map_err(write_err)?;
        for (module, path) in &modules {
            writeln!(out, "\n{} ({})", module, path).map_err(write_err)?;

            let module_classes = classes.remove(module).unwrap_or_default();
            let mut module_functions = functions.remove(module).unwrap_or_default();
            module_functions.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));

            let method_names: BTreeSet<String> = module_classes
                .values()
                .flat_map(|c| c.methods.iter().cloned())
                .collect();

            for class in module_classes.values() {
                write_entry(out, 1, &class.signature, class.doc_first_line.as_deref())?;
                for function in module_functions
                    .iter()
                    .filter(|f| class.methods.contains(&f.qualified_name))
                {
                    write_entry(
                        out,
                        2,
                        &function.signature,
                        function.doc_first_line.as_deref(),
                    )?;
                }
            }

            for function in module_functions
                .iter()
                .filter(|f| !method_names.contains(&f.qualified_name))
            {
                write_entry(
                    out,
                    1,
                    &function.signature,
                    function.doc_first_line.as_deref(),
                )?;
            }
        }
        Ok(())
    }
}

fn write_entry(
    out: &mut dyn Write,
    depth: usize,
    signature: &str,
    doc: Option<&str>,
) -> CodelexResult<()> {
    let indent = "  ".repeat(depth);
    match doc {
        Some(doc) if !doc.is_empty() => {
            writeln!(out, "{}{}  # {}", indent, signature, doc).map_err(write_err)
        }
        _ => writeln!(out, "{}{}", indent, signature).map_err(write_err),
    }
}

fn write_err(e: std::io::Error) -> CodelexError {
    CodelexError::export(e.to_string()).with_source(e)
}
