//! Graph lifecycle invariants: version removal, idempotent rebuilds,
//! repository removal and boundary behaviors.

mod common;

use codelex::progress::{CancellationToken, NoopObserver};
use codelex::rdf::ontology::woc;
use codelex::{GraphSchema, System, TriplePattern};
use common::{acme_lib, commit_file, rename_fixture, tag_head, test_config, tracked_system};
use git2::Repository;
use tempfile::TempDir;

#[test]
fn test_version_removal_excises_membership() {
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

    system.graphs.remove(&repo, Some("v2"), true, None).unwrap();

    // No graph mentions any #v2 URI anywhere.
    for graph in system.store.list_graphs(None) {
        for triple in system.store.triples_in_graph(&graph) {
            assert!(
                !triple.render().contains("#v2"),
                "{} still mentions v2: {}",
                graph,
                triple
            );
        }
    }

    // create (v1 only) is retained; make (v2 only) is gone entirely.
    let stable_graph = schema.stable_functions(&repo);
    let create = schema.function_uri(&repo, "acme.lib.core.create").unwrap();
    assert!(!system
        .store
        .match_in_graph(
            &stable_graph,
            &TriplePattern::new(Some(create.into()), None, None)
        )
        .is_empty());

    let make = schema.function_uri(&repo, "acme.lib.core.make").unwrap();
    assert!(system
        .store
        .match_in_graph(
            &stable_graph,
            &TriplePattern::new(Some(make.into()), None, None)
        )
        .is_empty());

    // Events incident on v2 are gone with it.
    assert!(system
        .store
        .triples_in_graph(&schema.change_events(&repo))
        .is_empty());

    // The three version-scoped graphs went away together.
    for graph in schema.version_scoped(&repo, "v2") {
        assert!(!system.store.contains_graph(&graph));
    }
    for graph in schema.version_scoped(&repo, "v1") {
        assert!(system.store.contains_graph(&graph), "{} missing", graph);
    }
}

#[test]
fn test_repo_level_graph_removal_drops_stable() {
    let dir = TempDir::new().unwrap();
    let upstream = rename_fixture(dir.path());
    let system = tracked_system(&dir.path().join("state"), &upstream);
    let repo = acme_lib();
    let schema = GraphSchema::new();

    system
        .graphs
        .add(&repo, Some("v1"), false, &CancellationToken::new(), &NoopObserver)
        .unwrap();
    system.graphs.remove(&repo, None, true, None).unwrap();

    assert!(system
        .store
        .list_graphs(Some(&schema.repo_prefix(&repo)))
        .is_empty());
}

#[test]
fn test_force_rebuild_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let upstream = rename_fixture(dir.path());
    let state = dir.path().join("state");
    let system = tracked_system(&state, &upstream);
    let repo = acme_lib();
    let cancel = CancellationToken::new();

    system
        .graphs
        .add(&repo, Some("v1"), false, &cancel, &NoopObserver)
        .unwrap();
    let snapshot = state.join("store").join("quads.bin.gz");
    let first = std::fs::read(&snapshot).unwrap();

    system
        .graphs
        .add(&repo, Some("v1"), true, &cancel, &NoopObserver)
        .unwrap();
    let second = std::fs::read(&snapshot).unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_add_without_force_rejects_existing() {
    let dir = TempDir::new().unwrap();
    let upstream = rename_fixture(dir.path());
    let system = tracked_system(&dir.path().join("state"), &upstream);
    let repo = acme_lib();
    let cancel = CancellationToken::new();

    system
        .graphs
        .add(&repo, Some("v1"), false, &cancel, &NoopObserver)
        .unwrap();
    let err = system
        .graphs
        .add(&repo, Some("v1"), false, &cancel, &NoopObserver)
        .unwrap_err();
    assert_eq!(err.kind(), codelex::ErrorKind::Validation);
}

#[test]
fn test_empty_repository_ingests_cleanly() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty-upstream");
    let upstream = Repository::init(&path).unwrap();
    commit_file(&upstream, "README.md", "docs only\n", "init");
    tag_head(&upstream, "v1");

    let system = tracked_system(&dir.path().join("state"), &path);
    let repo = acme_lib();
    let schema = GraphSchema::new();

    let report = system
        .graphs
        .add(&repo, None, false, &CancellationToken::new(), &NoopObserver)
        .unwrap();
    assert_eq!(report.functions, 0);
    assert_eq!(report.classes, 0);

    // Well-formed but near-empty graph set.
    for graph in schema.version_scoped(&repo, "v1") {
        assert!(system.store.contains_graph(&graph), "{} missing", graph);
    }
    assert!(system
        .store
        .triples_in_graph(&schema.change_events(&repo))
        .is_empty());
}

#[test]
fn test_oversized_file_reported_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("upstream");
    let upstream = Repository::init(&path).unwrap();
    let big = format!("# {}\n", "x".repeat(2 * 1024 * 1024));
    commit_file(&upstream, "big.py", &big, "big file");
    commit_file(&upstream, "ok.py", "def fine():\n    pass\n", "ok file");
    tag_head(&upstream, "v1");

    let state = dir.path().join("state");
    let mut config = test_config(&state);
    config.max_file_size_mb = 1;
    let system = System::open(config).unwrap();
    let repo = acme_lib();
    system
        .repos
        .add(&repo, Some(path.to_str().unwrap()), &NoopObserver)
        .unwrap();

    let report = system
        .graphs
        .add(&repo, None, false, &CancellationToken::new(), &NoopObserver)
        .unwrap();
    assert_eq!(report.skipped_files, 1);
    assert_eq!(report.functions, 1);

    // The skipped file appears once in the files graph, flagged.
    let schema = GraphSchema::new();
    let skipped = system.store.match_in_graph(
        &schema.files_for(&repo, "v1"),
        &TriplePattern::new(
            None,
            Some(codelex::rdf::ontology::files::skipped()),
            None,
        ),
    );
    assert_eq!(skipped.len(), 1);
}

#[test]
fn test_commit_links_terminate_at_stable_uris() {
    let dir = TempDir::new().unwrap();
    let upstream = rename_fixture(dir.path());
    let system = tracked_system(&dir.path().join("state"), &upstream);
    let repo = acme_lib();
    let schema = GraphSchema::new();

    system
        .graphs
        .add(&repo, Some("v1"), false, &CancellationToken::new(), &NoopObserver)
        .unwrap();

    let commits_graph = schema.git_commits(&repo);
    let modifies = system.store.match_in_graph(
        &commits_graph,
        &TriplePattern::new(
            None,
            Some(codelex::rdf::ontology::git::modifies()),
            None,
        ),
    );
    assert!(!modifies.is_empty());
    for triple in modifies {
        let target = triple.object.as_iri().unwrap();
        assert!(
            !target.contains('#'),
            "modifies edge points at a version-scoped URI: {}",
            target
        );
    }
}

#[test]
fn test_cancelled_build_leaves_no_partial_version() {
    let dir = TempDir::new().unwrap();
    let upstream = rename_fixture(dir.path());
    let system = tracked_system(&dir.path().join("state"), &upstream);
    let repo = acme_lib();
    let schema = GraphSchema::new();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = system
        .graphs
        .add(&repo, Some("v1"), false, &cancel, &NoopObserver)
        .unwrap_err();
    assert_eq!(err.kind(), codelex::ErrorKind::Cancelled);

    for graph in schema.version_scoped(&repo, "v1") {
        assert!(!system.store.contains_graph(&graph));
    }
}

#[test]
fn test_stable_widening_observed_with_new_version() {
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

    // Every implementation's stable entity lists the implementation's
    // version, for both ingested versions.
    for version in ["v1", "v2"] {
        let impl_graph = schema.implementations(&repo, version);
        let links = system.store.match_in_graph(
            &impl_graph,
            &TriplePattern::new(None, Some(woc::implements_function()), None),
        );
        assert!(!links.is_empty());
        for link in links {
            let stable_iri = link.object.as_iri().unwrap();
            let stable = codelex::NamedNode::new(stable_iri).unwrap();
            let memberships = system.store.match_in_graph(
                &schema.stable_functions(&repo),
                &TriplePattern::new(
                    Some(stable.into()),
                    Some(woc::exists_in_version()),
                    Some(codelex::Literal::string(version).into()),
                ),
            );
            assert_eq!(memberships.len(), 1, "{} missing {}", stable_iri, version);
        }
    }
}
