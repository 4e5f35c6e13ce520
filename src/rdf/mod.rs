//! RDF layer: primitives, the named-graph store and vocabularies

pub mod namespace;
pub mod ontology;
pub mod store;
pub mod types;

pub use namespace::{Namespace, NamespaceManager, PrefixError, PrefixResult};
pub use store::{StoreError, StoreResult, StoreWriter, TripleStore};
pub use types::{
    BlankNode, Literal, NamedNode, RdfError, RdfObject, RdfResult, RdfSubject, Triple,
    TriplePattern,
};
