//! Process-wide wiring
//!
//! Opens the store, loads the shared ontology graphs once, and constructs
//! the managers and query engine over the same handles. Configuration and
//! the store handle are init-once resources passed explicitly through
//! construction; nothing here is ambient.

use crate::config::Config;
use crate::error::{CodelexError, CodelexResult};
use crate::export::{CompactExporter, OutlineExporter};
use crate::manager::{GraphManager, RepoManager};
use crate::rdf::{ontology, TripleStore};
use crate::schema::GraphSchema;
use crate::sparql::SparqlEngine;
use std::sync::Arc;
use tracing::info;

/// All long-lived handles of one codelex process
pub struct System {
    pub config: Config,
    pub store: Arc<TripleStore>,
    pub repos: RepoManager,
    pub graphs: GraphManager,
}

impl System {
    /// Open (or create) the state under `config.storage_root`.
    pub fn open(config: Config) -> CodelexResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.storage_root)?;
        std::fs::create_dir_all(config.repos_dir())?;
        std::fs::create_dir_all(config.exports_dir())?;
        std::fs::create_dir_all(config.logs_dir())?;

        let store = Arc::new(
            TripleStore::open(config.store_dir())
                .map_err(|e| CodelexError::store(e.to_string()))?,
        );

        let schema = GraphSchema::new();
        {
            let mut writer = store.writer();
            ontology::load_ontologies(&mut writer, &schema.ontology_graphs())
                .map_err(|e| CodelexError::store(e.to_string()))?;
        }

        let repos = RepoManager::new(config.clone(), Arc::clone(&store))?;
        let graphs = GraphManager::new(config.clone(), Arc::clone(&store))?;
        info!(root = %config.storage_root.display(), "system opened");

        Ok(Self {
            config,
            store,
            repos,
            graphs,
        })
    }

    /// Ephemeral system for tests; same wiring, no disk-backed store.
    pub fn ephemeral(config: Config) -> CodelexResult<Self> {
        config.validate()?;
        let store = Arc::new(TripleStore::in_memory());
        let schema = GraphSchema::new();
        {
            let mut writer = store.writer();
            ontology::load_ontologies(&mut writer, &schema.ontology_graphs())
                .map_err(|e| CodelexError::store(e.to_string()))?;
        }
        let repos = RepoManager::new(config.clone(), Arc::clone(&store))?;
        let graphs = GraphManager::new(config.clone(), Arc::clone(&store))?;
        Ok(Self {
            config,
            store,
            repos,
            graphs,
        })
    }

    pub fn engine(&self) -> SparqlEngine {
        SparqlEngine::new(Arc::clone(&self.store))
    }

    pub fn compact_exporter(&self) -> CompactExporter {
        CompactExporter::new(self.engine(), &self.config)
    }

    pub fn outline_exporter(&self) -> OutlineExporter {
        OutlineExporter::new(self.engine(), &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_loads_ontologies() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage_root = dir.path().to_path_buf();
        let system = System::open(config).unwrap();

        let graphs = system
            .store
            .list_graphs(Some("http://codelex.dev/graph/ontology/"));
        assert_eq!(graphs.len(), 4);
    }

    #[test]
    fn test_reopen_preserves_state() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage_root = dir.path().to_path_buf();

        {
            let system = System::open(config.clone()).unwrap();
            let mut writer = system.store.writer();
            writer
                .append_to_graph(
                    "http://codelex.dev/graph/repo/acme/lib/functions/stable",
                    vec![crate::rdf::Triple::new(
                        crate::rdf::NamedNode::new("function:acme/lib/a").unwrap(),
                        crate::rdf::ontology::rdf_type(),
                        crate::rdf::ontology::woc::function(),
                    )],
                )
                .unwrap();
            writer.commit().unwrap();
        }

        let system = System::open(config).unwrap();
        assert_eq!(
            system
                .store
                .graph_len("http://codelex.dev/graph/repo/acme/lib/functions/stable"),
            1
        );
    }
}
