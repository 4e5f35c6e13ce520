//! Codelex
//!
//! A semantic code knowledge base. Tracked repositories are parsed per
//! version into a named-graph RDF representation: stable entity identities
//! that persist across versions, version-scoped implementation records,
//! git provenance, and inter-version change events. The store is queryable
//! with SPARQL 1.1 SELECT/ASK/CONSTRUCT and exportable as compact
//! streaming artifacts.
//!
//! # Architecture
//!
//! - `rdf`: the embedded named-graph store, RDF primitives, vocabularies
//! - `schema`: deterministic graph and entity URI minting
//! - `sparql`: query parsing (spargebra) and evaluation
//! - `parser`: tree-sitter based source extraction
//! - `mapper`: parsed entities to typed triples
//! - `git`: commit, developer, branch and tag intelligence
//! - `events`: version-pair diffing into change events
//! - `builder`: the per-version ingestion pipeline
//! - `repostore` / `manager`: on-disk checkouts and lifecycle operations
//! - `export`: compact and outline artifacts
//!
//! # Example
//!
//! ```no_run
//! use codelex::{Config, System};
//! use codelex::schema::RepoId;
//! use codelex::progress::{CancellationToken, NoopObserver};
//!
//! let mut config = Config::default();
//! config.storage_root = "/var/lib/codelex".into();
//! let system = System::open(config)?;
//!
//! let repo = RepoId::new("acme", "lib")?;
//! system.repos.add(&repo, None, &NoopObserver)?;
//! let report = system.graphs.add(
//!     &repo,
//!     None,
//!     false,
//!     &CancellationToken::new(),
//!     &NoopObserver,
//! )?;
//! println!("{} functions ingested", report.functions);
//! # Ok::<(), codelex::CodelexError>(())
//! ```

#![warn(clippy::all)]

pub mod builder;
pub mod config;
pub mod error;
pub mod events;
pub mod export;
pub mod git;
pub mod manager;
pub mod mapper;
pub mod parser;
pub mod progress;
pub mod rdf;
pub mod repostore;
pub mod schema;
pub mod sparql;
pub mod system;

// Re-export main types for convenience
pub use builder::{BuildReport, GraphBuilder};
pub use config::{Config, LogLevel};
pub use error::{CodelexError, CodelexResult, ErrorKind};
pub use events::{ChangeEvent, ChangeEventGenerator, ChangeKind};
pub use export::{CompactExporter, CompactStats, OutlineExporter};
pub use git::{CommitRecord, DeveloperRecord, GitAnalysis, GitIntelligence};
pub use manager::{
    GraphInfo, GraphManager, RepoManager, RepoStatus, RepoUpdate, RepositoryRecord,
};
pub use parser::{ParsedEntity, ParseOutcome, SourceParser};
pub use progress::{CancellationToken, NoopObserver, ProgressObserver, ProgressUpdate, Stage};
pub use rdf::{Literal, NamedNode, RdfObject, RdfSubject, Triple, TriplePattern, TripleStore};
pub use schema::{GraphSchema, RepoId};
pub use sparql::{QueryOutcome, QuerySolution, ResultFormat, SparqlEngine, SparqlError};
pub use system::System;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
