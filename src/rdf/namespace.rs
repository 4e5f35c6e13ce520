//! Vocabulary namespaces and prefix handling
//!
//! codelex speaks exactly seven namespaces: the three W3C standards plus
//! its four vocabularies. The set is closed and flat (no namespace IRI is
//! a prefix of another), so prefix resolution is a scan over a fixed
//! table and compaction has at most one possible hit.

use thiserror::Error;

pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const RDFS_NS: &str = "http://www.w3.org/2000/01/rdf-schema#";
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema#";

/// Code ontology: entities, implementations, structural attributes
pub const WOC_NS: &str = "http://codelex.dev/ontology/code#";
/// Git ontology: commits, developers, branches, tags
pub const GIT_NS: &str = "http://codelex.dev/ontology/git#";
/// Evolution ontology: change events, statistics, patterns
pub const EVO_NS: &str = "http://codelex.dev/ontology/evolution#";
/// Files ontology: source files per version
pub const FILES_NS: &str = "http://codelex.dev/ontology/files#";

/// Prefix errors
#[derive(Error, Debug)]
pub enum PrefixError {
    /// Unknown prefix
    #[error("Unknown prefix: {0}")]
    UnknownPrefix(String),

    /// Invalid compact IRI
    #[error("Invalid compact IRI: {0}")]
    InvalidIri(String),
}

pub type PrefixResult<T> = Result<T, PrefixError>;

/// One prefix → namespace IRI entry
#[derive(Debug, Clone, Copy)]
pub struct Namespace {
    pub prefix: &'static str,
    pub iri: &'static str,
}

/// The closed prefix table, in preamble emission order.
const PREFIXES: &[Namespace] = &[
    Namespace { prefix: "rdf", iri: RDF_NS },
    Namespace { prefix: "rdfs", iri: RDFS_NS },
    Namespace { prefix: "xsd", iri: XSD_NS },
    Namespace { prefix: "woc", iri: WOC_NS },
    Namespace { prefix: "git", iri: GIT_NS },
    Namespace { prefix: "evo", iri: EVO_NS },
    Namespace { prefix: "files", iri: FILES_NS },
];

/// Resolution over the fixed vocabulary table
pub struct NamespaceManager;

impl NamespaceManager {
    pub fn new() -> Self {
        Self
    }

    /// Namespace IRI registered for a prefix
    pub fn get_iri(&self, prefix: &str) -> PrefixResult<&'static str> {
        PREFIXES
            .iter()
            .find(|ns| ns.prefix == prefix)
            .map(|ns| ns.iri)
            .ok_or_else(|| PrefixError::UnknownPrefix(prefix.to_string()))
    }

    /// Expand a compact IRI (prefix:local) to a full IRI
    pub fn expand(&self, compact_iri: &str) -> PrefixResult<String> {
        let (prefix, local) = compact_iri
            .split_once(':')
            .ok_or_else(|| PrefixError::InvalidIri(compact_iri.to_string()))?;
        Ok(format!("{}{}", self.get_iri(prefix)?, local))
    }

    /// Compact a full IRI against the table. The namespaces are disjoint,
    /// so the first strip that succeeds is the only one that can.
    pub fn compact(&self, iri: &str) -> Option<String> {
        PREFIXES.iter().find_map(|ns| {
            iri.strip_prefix(ns.iri)
                .map(|local| format!("{}:{}", ns.prefix, local))
        })
    }

    /// SPARQL PREFIX preamble for every registered namespace, in table
    /// order; prepended to the exporters' generated queries.
    pub fn sparql_preamble(&self) -> String {
        let mut out = String::new();
        for ns in PREFIXES {
            out.push_str("PREFIX ");
            out.push_str(ns.prefix);
            out.push_str(": <");
            out.push_str(ns.iri);
            out.push_str(">\n");
        }
        out
    }

    pub fn prefixes(&self) -> &'static [Namespace] {
        PREFIXES
    }
}

impl Default for NamespaceManager {
    fn default() -> Self {
        Self::new()
    }
}
