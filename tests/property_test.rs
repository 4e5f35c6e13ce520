//! Property tests over randomly generated ingestion sequences.

use codelex::mapper::{self, VersionContext};
use codelex::parser::{FunctionCategory, ParsedEntity, ParsedFunction};
use codelex::rdf::ontology::woc;
use codelex::schema::{GraphSchema, RepoId};
use codelex::{Literal, NamedNode, Triple, TriplePattern, TripleStore};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::path::PathBuf;

fn function_named(name: &str, body_lines: u32) -> ParsedFunction {
    ParsedFunction {
        name: name.rsplit('.').next().unwrap_or(name).to_string(),
        qualified_name: name.to_string(),
        module_path: name
            .rsplit_once('.')
            .map(|(m, _)| m.to_string())
            .unwrap_or_else(|| "root".to_string()),
        params: Vec::new(),
        return_type: None,
        docstring: None,
        file: PathBuf::from("pkg/mod.py"),
        start_line: 1,
        end_line: 1 + body_lines,
        body_lines,
        calls: BTreeSet::new(),
        category: FunctionCategory::Function,
        signature: format!("def {}()", name),
        body_hash: format!("hash-{}", body_lines),
    }
}

fn name_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-z]{1,6}", 2..4).prop_map(|parts| parts.join("."))
}

fn version_strategy() -> impl Strategy<Value = Vec<(String, Vec<String>)>> {
    proptest::collection::vec(
        proptest::collection::btree_set(name_strategy(), 1..6),
        1..4,
    )
    .prop_map(|versions| {
        versions
            .into_iter()
            .enumerate()
            .map(|(i, names)| (format!("v{}", i + 1), names.into_iter().collect()))
            .collect()
    })
}

/// Apply one version the way the builder does: widen stable, replace the
/// implementation partition.
fn apply_version(
    store: &TripleStore,
    schema: &GraphSchema,
    repo: &RepoId,
    version: &str,
    names: &[String],
) {
    let known: BTreeSet<String> = names.iter().cloned().collect();
    let mut membership = Vec::new();
    let mut intros = Vec::new();
    let mut implementation = Vec::new();

    for name in names {
        let ctx = VersionContext {
            repo,
            version,
            known_functions: &known,
        };
        let entity = ParsedEntity::Function(function_named(name, 5));
        let mapped = mapper::map_entity(schema, &entity, &ctx).unwrap();
        intros.extend(mapped.stable_intro);
        membership.extend(mapped.stable_membership);
        implementation.extend(mapped.implementation);
    }

    let mut writer = store.writer();
    writer
        .append_to_graph(&schema.stable_functions(repo), intros)
        .unwrap();
    writer
        .append_to_graph(&schema.stable_functions(repo), membership)
        .unwrap();
    writer
        .upsert_graph(&schema.implementations(repo, version), implementation)
        .unwrap();
}

proptest! {
    /// Every implementation with `implementsFunction S` and
    /// `belongsToVersion v` has `S existsInVersion v` in the stable graph.
    #[test]
    fn prop_implementations_are_backed_by_stable_membership(
        versions in version_strategy()
    ) {
        let store = TripleStore::in_memory();
        let schema = GraphSchema::new();
        let repo = RepoId::new("acme", "lib").unwrap();

        for (version, names) in &versions {
            apply_version(&store, &schema, &repo, version, names);
        }

        for (version, _) in &versions {
            let impl_graph = schema.implementations(&repo, version);
            let links = store.match_in_graph(
                &impl_graph,
                &TriplePattern::new(None, Some(woc::implements_function()), None),
            );
            for link in links {
                let stable_iri = link.object.as_iri().unwrap();
                let stable = NamedNode::new(stable_iri).unwrap();
                let memberships = store.match_in_graph(
                    &schema.stable_functions(&repo),
                    &TriplePattern::new(
                        Some(stable.into()),
                        Some(woc::exists_in_version()),
                        Some(Literal::string(version.as_str()).into()),
                    ),
                );
                prop_assert_eq!(memberships.len(), 1);
            }
        }
    }

    /// Stable graphs never mention implementation URIs.
    #[test]
    fn prop_stable_graph_has_no_versioned_uris(versions in version_strategy()) {
        let store = TripleStore::in_memory();
        let schema = GraphSchema::new();
        let repo = RepoId::new("acme", "lib").unwrap();

        for (version, names) in &versions {
            apply_version(&store, &schema, &repo, version, names);
        }

        for triple in store.triples_in_graph(&schema.stable_functions(&repo)) {
            let mut entity_iris = Vec::new();
            if let Some(iri) = triple.subject.as_iri() {
                entity_iris.push(iri.to_string());
            }
            if let Some(iri) = triple.object.as_iri() {
                entity_iris.push(iri.to_string());
            }
            for iri in entity_iris {
                if iri.starts_with("function:") {
                    prop_assert!(!iri.contains('#'), "{}", iri);
                }
            }
        }
    }

    /// Property 5: the mapper is deterministic.
    #[test]
    fn prop_mapper_deterministic(name in name_strategy(), lines in 0u32..500) {
        let schema = GraphSchema::new();
        let repo = RepoId::new("acme", "lib").unwrap();
        let known = BTreeSet::from([name.clone()]);
        let ctx = VersionContext {
            repo: &repo,
            version: "v1",
            known_functions: &known,
        };
        let entity = ParsedEntity::Function(function_named(&name, lines));

        let first = mapper::map_entity(&schema, &entity, &ctx).unwrap();
        let second = mapper::map_entity(&schema, &entity, &ctx).unwrap();
        let render = |triples: &[Triple]| -> Vec<String> {
            triples.iter().map(Triple::render).collect()
        };
        prop_assert_eq!(render(&first.implementation), render(&second.implementation));
        prop_assert_eq!(render(&first.stable_intro), render(&second.stable_intro));
        prop_assert_eq!(
            render(&first.stable_membership),
            render(&second.stable_membership)
        );
    }

    /// Re-applying a version is idempotent at the triple level.
    #[test]
    fn prop_reapply_is_idempotent(versions in version_strategy()) {
        let store = TripleStore::in_memory();
        let schema = GraphSchema::new();
        let repo = RepoId::new("acme", "lib").unwrap();

        for (version, names) in &versions {
            apply_version(&store, &schema, &repo, version, names);
        }
        let count_before = store.total_triples();

        for (version, names) in &versions {
            apply_version(&store, &schema, &repo, version, names);
        }
        prop_assert_eq!(store.total_triples(), count_before);
    }

    /// Property 7: path arguments containing traversal never validate.
    #[test]
    fn prop_traversal_identifiers_rejected(prefix in "[a-z]{1,5}", suffix in "[a-z]{0,5}") {
        let candidate = format!("{}..{}", prefix, suffix);
        prop_assert!(codelex::schema::validate_identifier("version", &candidate).is_err());
    }
}
