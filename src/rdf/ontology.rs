//! Ontology vocabularies and the shared ontology graphs
//!
//! Terms are grouped per vocabulary under `vocab`. The four ontology
//! graphs are repository-independent and loaded once at store
//! initialization; data graphs reference these terms but never redefine
//! them.

use super::namespace::{RDFS_NS, RDF_NS};
use super::store::{StoreResult, StoreWriter};
use super::types::{Literal, NamedNode, Triple};

/// Build a vocabulary term; all inputs are compile-time constants.
fn term(ns: &str, local: &str) -> NamedNode {
    NamedNode::from(oxrdf::NamedNode::new_unchecked(format!("{}{}", ns, local)))
}

pub fn rdf_type() -> NamedNode {
    term(RDF_NS, "type")
}

pub fn rdfs_class() -> NamedNode {
    term(RDFS_NS, "Class")
}

pub fn rdf_property() -> NamedNode {
    term(RDF_NS, "Property")
}

pub fn rdfs_label() -> NamedNode {
    term(RDFS_NS, "label")
}

/// Code ontology (`woc:`)
pub mod woc {
    use super::super::namespace::WOC_NS;
    use super::super::types::NamedNode;
    use super::term;

    pub fn function() -> NamedNode {
        term(WOC_NS, "Function")
    }
    pub fn class() -> NamedNode {
        term(WOC_NS, "Class")
    }
    pub fn module() -> NamedNode {
        term(WOC_NS, "Module")
    }
    pub fn function_implementation() -> NamedNode {
        term(WOC_NS, "FunctionImplementation")
    }
    pub fn class_implementation() -> NamedNode {
        term(WOC_NS, "ClassImplementation")
    }
    pub fn version() -> NamedNode {
        term(WOC_NS, "Version")
    }
    pub fn canonical_name() -> NamedNode {
        term(WOC_NS, "canonicalName")
    }
    pub fn module_path() -> NamedNode {
        term(WOC_NS, "modulePath")
    }
    pub fn signature() -> NamedNode {
        term(WOC_NS, "signature")
    }
    pub fn docstring() -> NamedNode {
        term(WOC_NS, "docstring")
    }
    pub fn defined_in_file() -> NamedNode {
        term(WOC_NS, "definedInFile")
    }
    pub fn start_line() -> NamedNode {
        term(WOC_NS, "startLine")
    }
    pub fn end_line() -> NamedNode {
        term(WOC_NS, "endLine")
    }
    pub fn line_count() -> NamedNode {
        term(WOC_NS, "lineCount")
    }
    pub fn method_count() -> NamedNode {
        term(WOC_NS, "methodCount")
    }
    pub fn function_count() -> NamedNode {
        term(WOC_NS, "functionCount")
    }
    pub fn class_count() -> NamedNode {
        term(WOC_NS, "classCount")
    }
    pub fn module_count() -> NamedNode {
        term(WOC_NS, "moduleCount")
    }
    pub fn parent_class() -> NamedNode {
        term(WOC_NS, "parentClass")
    }
    pub fn has_method() -> NamedNode {
        term(WOC_NS, "hasMethod")
    }
    pub fn implements_function() -> NamedNode {
        term(WOC_NS, "implementsFunction")
    }
    pub fn implements_class() -> NamedNode {
        term(WOC_NS, "implementsClass")
    }
    pub fn belongs_to_version() -> NamedNode {
        term(WOC_NS, "belongsToVersion")
    }
    pub fn exists_in_version() -> NamedNode {
        term(WOC_NS, "existsInVersion")
    }
    pub fn first_seen_version() -> NamedNode {
        term(WOC_NS, "firstSeenVersion")
    }
    pub fn category() -> NamedNode {
        term(WOC_NS, "category")
    }
    pub fn refactor_score() -> NamedNode {
        term(WOC_NS, "refactorScore")
    }
    pub fn body_hash() -> NamedNode {
        term(WOC_NS, "bodyHash")
    }
    pub fn calls() -> NamedNode {
        term(WOC_NS, "calls")
    }
    pub fn version_tag() -> NamedNode {
        term(WOC_NS, "versionTag")
    }
    pub fn ingested_at() -> NamedNode {
        term(WOC_NS, "ingestedAt")
    }
}

/// Git ontology (`git:`)
pub mod git {
    use super::super::namespace::GIT_NS;
    use super::super::types::NamedNode;
    use super::term;

    pub fn commit() -> NamedNode {
        term(GIT_NS, "Commit")
    }
    pub fn developer() -> NamedNode {
        term(GIT_NS, "Developer")
    }
    pub fn branch() -> NamedNode {
        term(GIT_NS, "Branch")
    }
    pub fn tag() -> NamedNode {
        term(GIT_NS, "Tag")
    }
    pub fn sha() -> NamedNode {
        term(GIT_NS, "sha")
    }
    pub fn author_email() -> NamedNode {
        term(GIT_NS, "authorEmail")
    }
    pub fn author_name() -> NamedNode {
        term(GIT_NS, "authorName")
    }
    pub fn authored_at() -> NamedNode {
        term(GIT_NS, "authoredAt")
    }
    pub fn message() -> NamedNode {
        term(GIT_NS, "message")
    }
    pub fn changed_file() -> NamedNode {
        term(GIT_NS, "changedFile")
    }
    pub fn modifies() -> NamedNode {
        term(GIT_NS, "modifies")
    }
    pub fn commit_count() -> NamedNode {
        term(GIT_NS, "commitCount")
    }
    pub fn first_seen() -> NamedNode {
        term(GIT_NS, "firstSeen")
    }
    pub fn last_seen() -> NamedNode {
        term(GIT_NS, "lastSeen")
    }
    pub fn name() -> NamedNode {
        term(GIT_NS, "name")
    }
    pub fn target() -> NamedNode {
        term(GIT_NS, "target")
    }
}

/// Evolution ontology (`evo:`)
pub mod evo {
    use super::super::namespace::EVO_NS;
    use super::super::types::NamedNode;
    use super::term;

    pub fn change_event() -> NamedNode {
        term(EVO_NS, "ChangeEvent")
    }
    pub fn statistics() -> NamedNode {
        term(EVO_NS, "Statistics")
    }
    pub fn pattern() -> NamedNode {
        term(EVO_NS, "Pattern")
    }
    pub fn cluster() -> NamedNode {
        term(EVO_NS, "Cluster")
    }
    pub fn from_version() -> NamedNode {
        term(EVO_NS, "fromVersion")
    }
    pub fn to_version() -> NamedNode {
        term(EVO_NS, "toVersion")
    }
    pub fn change_kind() -> NamedNode {
        term(EVO_NS, "changeKind")
    }
    pub fn introduced_by() -> NamedNode {
        term(EVO_NS, "introducedBy")
    }
    pub fn affects_entity() -> NamedNode {
        term(EVO_NS, "affectsEntity")
    }
    pub fn function_total() -> NamedNode {
        term(EVO_NS, "functionTotal")
    }
    pub fn class_total() -> NamedNode {
        term(EVO_NS, "classTotal")
    }
    pub fn module_total() -> NamedNode {
        term(EVO_NS, "moduleTotal")
    }
    pub fn version_count() -> NamedNode {
        term(EVO_NS, "versionCount")
    }
    pub fn bucket_count() -> NamedNode {
        term(EVO_NS, "bucketCount")
    }
    pub fn pattern_name() -> NamedNode {
        term(EVO_NS, "patternName")
    }
    pub fn cluster_module() -> NamedNode {
        term(EVO_NS, "clusterModule")
    }
}

/// Files ontology (`files:`)
pub mod files {
    use super::super::namespace::FILES_NS;
    use super::super::types::NamedNode;
    use super::term;

    pub fn source_file() -> NamedNode {
        term(FILES_NS, "SourceFile")
    }
    pub fn path() -> NamedNode {
        term(FILES_NS, "path")
    }
    pub fn entity_count() -> NamedNode {
        term(FILES_NS, "entityCount")
    }
    pub fn skipped() -> NamedNode {
        term(FILES_NS, "skipped")
    }
}

fn class_triples(classes: &[NamedNode]) -> Vec<Triple> {
    classes
        .iter()
        .flat_map(|c| {
            let label = c
                .as_str()
                .rsplit('#')
                .next()
                .unwrap_or_default()
                .to_string();
            [
                Triple::new(c.clone(), rdf_type(), rdfs_class()),
                Triple::new(c.clone(), rdfs_label(), Literal::string(label)),
            ]
        })
        .collect()
}

fn property_triples(properties: &[NamedNode]) -> Vec<Triple> {
    properties
        .iter()
        .flat_map(|p| {
            let label = p
                .as_str()
                .rsplit('#')
                .next()
                .unwrap_or_default()
                .to_string();
            [
                Triple::new(p.clone(), rdf_type(), rdf_property()),
                Triple::new(p.clone(), rdfs_label(), Literal::string(label)),
            ]
        })
        .collect()
}

/// Triples of the code ontology graph
pub fn code_ontology() -> Vec<Triple> {
    let mut triples = class_triples(&[
        woc::function(),
        woc::class(),
        woc::module(),
        woc::function_implementation(),
        woc::class_implementation(),
        woc::version(),
    ]);
    triples.extend(property_triples(&[
        woc::canonical_name(),
        woc::module_path(),
        woc::signature(),
        woc::docstring(),
        woc::defined_in_file(),
        woc::start_line(),
        woc::end_line(),
        woc::line_count(),
        woc::method_count(),
        woc::function_count(),
        woc::class_count(),
        woc::module_count(),
        woc::parent_class(),
        woc::has_method(),
        woc::implements_function(),
        woc::implements_class(),
        woc::belongs_to_version(),
        woc::exists_in_version(),
        woc::first_seen_version(),
        woc::category(),
        woc::refactor_score(),
        woc::body_hash(),
        woc::calls(),
        woc::version_tag(),
        woc::ingested_at(),
    ]));
    triples
}

/// Triples of the git ontology graph
pub fn git_ontology() -> Vec<Triple> {
    let mut triples = class_triples(&[git::commit(), git::developer(), git::branch(), git::tag()]);
    triples.extend(property_triples(&[
        git::sha(),
        git::author_email(),
        git::author_name(),
        git::authored_at(),
        git::message(),
        git::changed_file(),
        git::modifies(),
        git::commit_count(),
        git::first_seen(),
        git::last_seen(),
        git::name(),
        git::target(),
    ]));
    triples
}

/// Triples of the evolution ontology graph
pub fn evolution_ontology() -> Vec<Triple> {
    let mut triples = class_triples(&[
        evo::change_event(),
        evo::statistics(),
        evo::pattern(),
        evo::cluster(),
    ]);
    triples.extend(property_triples(&[
        evo::from_version(),
        evo::to_version(),
        evo::change_kind(),
        evo::introduced_by(),
        evo::affects_entity(),
        evo::function_total(),
        evo::class_total(),
        evo::module_total(),
        evo::version_count(),
        evo::bucket_count(),
        evo::pattern_name(),
        evo::cluster_module(),
    ]));
    triples
}

/// Triples of the files ontology graph
pub fn files_ontology() -> Vec<Triple> {
    let mut triples = class_triples(&[files::source_file()]);
    triples.extend(property_triples(&[
        files::path(),
        files::entity_count(),
        files::skipped(),
    ]));
    triples
}

/// Load all four shared ontology graphs.
///
/// Idempotent; called once at system initialization.
pub fn load_ontologies(
    writer: &mut StoreWriter<'_>,
    graph_uris: &crate::schema::OntologyGraphs,
) -> StoreResult<()> {
    writer.upsert_graph(&graph_uris.code, code_ontology())?;
    writer.upsert_graph(&graph_uris.git, git_ontology())?;
    writer.upsert_graph(&graph_uris.evolution, evolution_ontology())?;
    writer.upsert_graph(&graph_uris.files, files_ontology())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_iris() {
        assert_eq!(
            woc::function().as_str(),
            "http://codelex.dev/ontology/code#Function"
        );
        assert_eq!(
            git::modifies().as_str(),
            "http://codelex.dev/ontology/git#modifies"
        );
        assert_eq!(
            evo::change_event().as_str(),
            "http://codelex.dev/ontology/evolution#ChangeEvent"
        );
    }

    #[test]
    fn test_ontology_graphs_nonempty() {
        assert!(!code_ontology().is_empty());
        assert!(!git_ontology().is_empty());
        assert!(!evolution_ontology().is_empty());
        assert!(!files_ontology().is_empty());
    }

    #[test]
    fn test_ontology_declares_types() {
        let triples = code_ontology();
        let class_decl = Triple::new(woc::function(), rdf_type(), rdfs_class());
        assert!(triples.contains(&class_decl));
    }
}
