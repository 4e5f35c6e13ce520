//! End-to-end ingestion scenarios: add a repository, build versions,
//! observe stable identities, change events, queries and exports.

mod common;

use codelex::progress::{CancellationToken, NoopObserver};
use codelex::rdf::ontology::{evo, woc};
use codelex::{GraphSchema, Literal, TriplePattern};
use common::{acme_lib, rename_fixture, tracked_system};
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn test_repo_add_creates_no_graphs() {
    let dir = TempDir::new().unwrap();
    let upstream = rename_fixture(dir.path());
    let system = tracked_system(&dir.path().join("state"), &upstream);

    let record = system.repos.show(&acme_lib()).unwrap();
    assert_eq!(record.releases, ["v2", "v1"]);
    assert_eq!(record.status, codelex::RepoStatus::Ready);

    let schema = GraphSchema::new();
    let graphs = system
        .store
        .list_graphs(Some(&schema.repo_prefix(&acme_lib())));
    assert!(graphs.is_empty());
}

#[test]
fn test_first_version_ingestion() {
    let dir = TempDir::new().unwrap();
    let upstream = rename_fixture(dir.path());
    let system = tracked_system(&dir.path().join("state"), &upstream);
    let repo = acme_lib();
    let schema = GraphSchema::new();

    let report = system
        .graphs
        .add(&repo, Some("v1"), false, &CancellationToken::new(), &NoopObserver)
        .unwrap();
    assert_eq!(report.functions, 1);

    // The stable graph holds the entity with existsInVersion = {v1}.
    let stable_graph = schema.stable_functions(&repo);
    let stable = schema
        .function_uri(&repo, "acme.lib.core.create")
        .unwrap();
    let memberships = system.store.match_in_graph(
        &stable_graph,
        &TriplePattern::new(
            Some(stable.clone().into()),
            Some(woc::exists_in_version()),
            None,
        ),
    );
    assert_eq!(memberships.len(), 1);
    assert!(memberships[0].render().contains("\"v1\""));

    // The implementation record carries its line span.
    let impl_graph = schema.implementations(&repo, "v1");
    let implementation = schema
        .function_impl_uri(&repo, "acme.lib.core.create", "v1")
        .unwrap();
    let start = system.store.match_in_graph(
        &impl_graph,
        &TriplePattern::new(
            Some(implementation.into()),
            Some(woc::start_line()),
            None,
        ),
    );
    assert_eq!(start.len(), 1);

    // A single ingested version has no change events.
    let events = system
        .store
        .triples_in_graph(&schema.change_events(&repo));
    assert!(events.is_empty());
}

#[test]
fn test_rename_produces_paired_events() {
    let dir = TempDir::new().unwrap();
    let upstream = rename_fixture(dir.path());
    let system = tracked_system(&dir.path().join("state"), &upstream);
    let repo = acme_lib();
    let schema = GraphSchema::new();
    let cancel = CancellationToken::new();

    system
        .graphs
        .add(&repo, Some("v1"), false, &cancel, &NoopObserver)
        .unwrap();
    let report = system
        .graphs
        .add(&repo, Some("v2"), false, &cancel, &NoopObserver)
        .unwrap();
    assert_eq!(report.events, 2);

    // Both stable entities exist with disjoint version sets.
    let stable_graph = schema.stable_functions(&repo);
    for (name, version) in [
        ("acme.lib.core.create", "v1"),
        ("acme.lib.core.make", "v2"),
    ] {
        let uri = schema.function_uri(&repo, name).unwrap();
        let memberships = system.store.match_in_graph(
            &stable_graph,
            &TriplePattern::new(
                Some(uri.into()),
                Some(woc::exists_in_version()),
                None,
            ),
        );
        assert_eq!(memberships.len(), 1, "{}", name);
        assert!(memberships[0].render().contains(version));
    }

    // Exactly one removed and one added event, both tagged v1 -> v2.
    let events_graph = schema.change_events(&repo);
    for kind in ["added", "removed"] {
        let matching = system.store.match_in_graph(
            &events_graph,
            &TriplePattern::new(
                None,
                Some(evo::change_kind()),
                Some(Literal::string(kind).into()),
            ),
        );
        assert_eq!(matching.len(), 1, "{}", kind);
    }
    let from = system.store.match_in_graph(
        &events_graph,
        &TriplePattern::new(
            None,
            Some(evo::from_version()),
            Some(Literal::string("v1").into()),
        ),
    );
    assert_eq!(from.len(), 2);
}

#[test]
fn test_nuclear_rebuild_keeps_events_exactly_once() {
    let dir = TempDir::new().unwrap();
    let upstream = rename_fixture(dir.path());
    let system = tracked_system(&dir.path().join("state"), &upstream);
    let repo = acme_lib();
    let schema = GraphSchema::new();
    let cancel = CancellationToken::new();

    system
        .graphs
        .add(&repo, Some("v1"), false, &cancel, &NoopObserver)
        .unwrap();
    system
        .graphs
        .add(&repo, Some("v2"), false, &cancel, &NoopObserver)
        .unwrap();

    // Stable triples before the rebuild.
    let stable_graph = schema.stable_functions(&repo);
    let stable_before: Vec<String> = {
        let mut rendered: Vec<String> = system
            .store
            .triples_in_graph(&stable_graph)
            .iter()
            .map(|t| t.render())
            .collect();
        rendered.sort();
        rendered
    };

    system
        .graphs
        .update(&repo, "v2", &cancel, &NoopObserver)
        .unwrap();

    // The added/removed events remain exactly once.
    let events_graph = schema.change_events(&repo);
    for kind in ["added", "removed"] {
        let matching = system.store.match_in_graph(
            &events_graph,
            &TriplePattern::new(
                None,
                Some(evo::change_kind()),
                Some(Literal::string(kind).into()),
            ),
        );
        assert_eq!(matching.len(), 1, "{}", kind);
    }

    // Stable graph is untouched by the rebuild.
    let stable_after: Vec<String> = {
        let mut rendered: Vec<String> = system
            .store
            .triples_in_graph(&stable_graph)
            .iter()
            .map(|t| t.render())
            .collect();
        rendered.sort();
        rendered
    };
    assert_eq!(stable_before, stable_after);

    // Implementation triples point at the rebuilt version.
    let impl_graph = schema.implementations(&repo, "v2");
    assert!(system.store.graph_len(&impl_graph) > 0);
}

#[test]
fn test_query_counts_stable_functions() {
    let dir = TempDir::new().unwrap();
    let upstream = rename_fixture(dir.path());
    let system = tracked_system(&dir.path().join("state"), &upstream);
    let repo = acme_lib();
    let cancel = CancellationToken::new();

    system
        .graphs
        .add(&repo, Some("v1"), false, &cancel, &NoopObserver)
        .unwrap();
    system
        .graphs
        .add(&repo, Some("v2"), false, &cancel, &NoopObserver)
        .unwrap();

    let query = r#"
        PREFIX woc: <http://codelex.dev/ontology/code#>
        SELECT (COUNT(*) AS ?n) WHERE {
            GRAPH <http://codelex.dev/graph/repo/acme/lib/functions/stable> {
                ?f a woc:Function
            }
        }
    "#;
    let (_, rows) = system.engine().select(query, TIMEOUT).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].integer("n"), Some(2));
}

#[test]
fn test_compact_export_after_rename() {
    let dir = TempDir::new().unwrap();
    let upstream = rename_fixture(dir.path());
    let system = tracked_system(&dir.path().join("state"), &upstream);
    let repo = acme_lib();
    let cancel = CancellationToken::new();

    system
        .graphs
        .add(&repo, Some("v1"), false, &cancel, &NoopObserver)
        .unwrap();
    system
        .graphs
        .add(&repo, Some("v2"), false, &cancel, &NoopObserver)
        .unwrap();

    let exporter = system.compact_exporter();
    let mut out: Vec<u8> = Vec::new();
    let stats = exporter
        .export(&repo, "v2", &["v2".to_string(), "v1".to_string()], &mut out)
        .unwrap();
    assert_eq!(stats.functions_exported, 1);

    let text = String::from_utf8(out).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(lines[0]["type"], "header");
    assert_eq!(lines[0]["repo"], "acme/lib");
    assert_eq!(lines[0]["release"], "v2");

    let function = lines
        .iter()
        .find(|l| l["type"] == "function")
        .expect("one function record");
    assert_eq!(function["n"], "make");
    assert_eq!(function["refactor"], "small");
    // Module and file fields reference the string table.
    assert!(function["m"].is_number());
    let module_id = function["m"].as_u64().unwrap();
    let interned = lines
        .iter()
        .find(|l| l["type"] == "str" && l["i"] == module_id)
        .expect("string table entry precedes use");
    assert_eq!(interned["v"], "acme.lib.core");

    let footer = lines.last().unwrap();
    assert_eq!(footer["type"], "footer");
    assert_eq!(footer["stats"]["functions_exported"], 1);
}

#[test]
fn test_outline_export() {
    let dir = TempDir::new().unwrap();
    let upstream = rename_fixture(dir.path());
    let system = tracked_system(&dir.path().join("state"), &upstream);
    let repo = acme_lib();
    let cancel = CancellationToken::new();

    system
        .graphs
        .add(&repo, Some("v2"), false, &cancel, &NoopObserver)
        .unwrap();

    let exporter = system.outline_exporter();
    let mut out: Vec<u8> = Vec::new();
    exporter.export(&repo, "v2", &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.contains("acme.lib.core (acme/lib/core.py)"));
    assert!(text.contains("def make(name)"));
    assert!(text.contains("# Make a thing."));
}
