//! Change-event generation
//!
//! Diffs two versions of a repository into temporal change events. The
//! per-version facts are read back from the store's implementation
//! partitions, so event generation never needs the older checkout on disk
//! (a nuclear rebuild can regenerate events from store data alone).

use crate::error::CodelexResult;
use crate::rdf::ontology::{evo, rdf_type, woc};
use crate::rdf::{Literal, NamedNode, RdfObject, RdfSubject, Triple, TriplePattern, TripleStore};
use crate::schema::{GraphSchema, RepoId};
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;
use tracing::debug;

/// Change event kinds between two consecutive versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    SignatureChanged,
    BodyChanged,
    Moved,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::SignatureChanged => "signature_changed",
            ChangeKind::BodyChanged => "body_changed",
            ChangeKind::Moved => "moved",
        }
    }
}

/// Stable entity kinds that participate in change events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Function,
    Class,
}

/// Facts about one entity in one version, sufficient for diffing
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntityFacts {
    pub signature: String,
    pub body_hash: String,
    pub file: String,
    pub start_line: i64,
    pub end_line: i64,
}

/// All diffable facts of one version
#[derive(Debug, Default)]
pub struct VersionSnapshot {
    pub functions: BTreeMap<String, EntityFacts>,
    pub classes: BTreeMap<String, EntityFacts>,
}

/// One detected change
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub qualified_name: String,
    pub entity_kind: EntityKind,
    pub kind: ChangeKind,
    pub from_version: String,
    pub to_version: String,
    /// Defining file in the newer version (or the older one for removals);
    /// used for best-effort commit attribution.
    pub file: Option<String>,
}

/// Diff-and-emit engine for the change events graph
pub struct ChangeEventGenerator {
    schema: GraphSchema,
}

impl ChangeEventGenerator {
    pub fn new(schema: GraphSchema) -> Self {
        Self { schema }
    }

    /// Read the diffable facts of one ingested version back from the store.
    pub fn snapshot(
        &self,
        store: &TripleStore,
        repo: &RepoId,
        version: &str,
    ) -> VersionSnapshot {
        let graph = self.schema.implementations(repo, version);
        VersionSnapshot {
            functions: self.collect_facts(store, &graph, woc::implements_function()),
            classes: self.collect_facts(store, &graph, woc::implements_class()),
        }
    }

    fn collect_facts(
        &self,
        store: &TripleStore,
        graph: &str,
        link: NamedNode,
    ) -> BTreeMap<String, EntityFacts> {
        let mut out = BTreeMap::new();
        let links = store.match_in_graph(
            graph,
            &TriplePattern::new(None, Some(link), None),
        );
        for triple in links {
            let Some(stable_iri) = triple.object.as_iri() else {
                continue;
            };
            let Some(qualified_name) = qualified_name_of(stable_iri) else {
                continue;
            };
            let facts = self.read_facts(store, graph, &triple.subject);
            out.insert(qualified_name, facts);
        }
        out
    }

    fn read_facts(
        &self,
        store: &TripleStore,
        graph: &str,
        implementation: &RdfSubject,
    ) -> EntityFacts {
        let mut facts = EntityFacts::default();
        let triples = store.match_in_graph(
            graph,
            &TriplePattern::new(Some(implementation.clone()), None, None),
        );
        for triple in triples {
            let predicate = triple.predicate.as_str();
            let Some(literal) = triple.object.as_literal() else {
                continue;
            };
            if predicate == woc::signature().as_str() {
                facts.signature = literal.value().to_string();
            } else if predicate == woc::body_hash().as_str() {
                facts.body_hash = literal.value().to_string();
            } else if predicate == woc::defined_in_file().as_str() {
                facts.file = literal.value().to_string();
            } else if predicate == woc::start_line().as_str() {
                facts.start_line = literal.as_integer().unwrap_or_default();
            } else if predicate == woc::end_line().as_str() {
                facts.end_line = literal.as_integer().unwrap_or_default();
            }
        }
        facts
    }

    /// Classify the differences between two consecutive versions.
    pub fn diff(
        &self,
        older: &VersionSnapshot,
        newer: &VersionSnapshot,
        from_version: &str,
        to_version: &str,
    ) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        diff_kind(
            &older.functions,
            &newer.functions,
            EntityKind::Function,
            from_version,
            to_version,
            &mut events,
        );
        diff_kind(
            &older.classes,
            &newer.classes,
            EntityKind::Class,
            from_version,
            to_version,
            &mut events,
        );
        debug!(
            from = from_version,
            to = to_version,
            events = events.len(),
            "change events computed"
        );
        events
    }

    /// Triples for one event, with best-effort commit attribution.
    pub fn event_triples(
        &self,
        repo: &RepoId,
        event: &ChangeEvent,
        introduced_by: Option<&str>,
    ) -> CodelexResult<Vec<Triple>> {
        let uri = self.schema.event_uri(
            repo,
            &event.from_version,
            &event.to_version,
            event.kind.as_str(),
            &event.qualified_name,
        )?;
        let stable = match event.entity_kind {
            EntityKind::Function => self.schema.function_uri(repo, &event.qualified_name)?,
            EntityKind::Class => self.schema.class_uri(repo, &event.qualified_name)?,
        };
        let mut triples = vec![
            Triple::new(uri.clone(), rdf_type(), evo::change_event()),
            Triple::new(uri.clone(), evo::affects_entity(), stable),
            Triple::new(
                uri.clone(),
                evo::from_version(),
                Literal::string(&event.from_version),
            ),
            Triple::new(
                uri.clone(),
                evo::to_version(),
                Literal::string(&event.to_version),
            ),
            Triple::new(
                uri.clone(),
                evo::change_kind(),
                Literal::string(event.kind.as_str()),
            ),
        ];
        if let Some(sha) = introduced_by {
            let commit = self.schema.commit_uri(repo, sha)?;
            triples.push(Triple::new(uri, evo::introduced_by(), commit));
        }
        Ok(triples)
    }
}

fn diff_kind(
    older: &BTreeMap<String, EntityFacts>,
    newer: &BTreeMap<String, EntityFacts>,
    entity_kind: EntityKind,
    from_version: &str,
    to_version: &str,
    events: &mut Vec<ChangeEvent>,
) {
    for (name, facts) in newer {
        let event = |kind: ChangeKind, file: Option<String>| ChangeEvent {
            qualified_name: name.clone(),
            entity_kind,
            kind,
            from_version: from_version.to_string(),
            to_version: to_version.to_string(),
            file,
        };
        match older.get(name) {
            None => events.push(event(ChangeKind::Added, Some(facts.file.clone()))),
            Some(old) => {
                if old.signature != facts.signature {
                    events.push(event(
                        ChangeKind::SignatureChanged,
                        Some(facts.file.clone()),
                    ));
                } else if old.body_hash != facts.body_hash {
                    events.push(event(ChangeKind::BodyChanged, Some(facts.file.clone())));
                } else if old.file != facts.file
                    || old.start_line != facts.start_line
                    || old.end_line != facts.end_line
                {
                    events.push(event(ChangeKind::Moved, Some(facts.file.clone())));
                }
            }
        }
    }
    for (name, facts) in older {
        if !newer.contains_key(name) {
            events.push(ChangeEvent {
                qualified_name: name.clone(),
                entity_kind,
                kind: ChangeKind::Removed,
                from_version: from_version.to_string(),
                to_version: to_version.to_string(),
                file: Some(facts.file.clone()),
            });
        }
    }
}

/// Qualified name from a stable entity URI such as
/// `function:acme/lib/acme.lib.core.create`.
pub fn qualified_name_of(stable_iri: &str) -> Option<String> {
    let rest = stable_iri.split_once(':')?.1;
    let mut parts = rest.splitn(3, '/');
    let _org = parts.next()?;
    let _repo = parts.next()?;
    let encoded = parts.next()?;
    percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}

/// Partition an events graph into (kept, dropped-by-version) triples.
///
/// Used by version removal and the nuclear rebuild: every event whose
/// `fromVersion` or `toVersion` equals `version` is dropped as a whole
/// subject.
pub fn retain_events_excluding_version(
    triples: Vec<Triple>,
    version: &str,
) -> Vec<Triple> {
    let mut incident: Vec<RdfSubject> = Vec::new();
    for triple in &triples {
        let predicate = triple.predicate.as_str();
        if predicate != evo::from_version().as_str()
            && predicate != evo::to_version().as_str()
        {
            continue;
        }
        if let RdfObject::Literal(l) = &triple.object {
            if l.value() == version {
                incident.push(triple.subject.clone());
            }
        }
    }
    triples
        .into_iter()
        .filter(|t| !incident.contains(&t.subject))
        .collect()
}

/// Drop every event spanning exactly `(from_version, to_version)`.
///
/// Used when a version is inserted between two previously consecutive
/// versions: the old pair's events are superseded by the two new pairs.
pub fn retain_events_excluding_pair(
    triples: Vec<Triple>,
    from_version: &str,
    to_version: &str,
) -> Vec<Triple> {
    let mut from_subjects: Vec<RdfSubject> = Vec::new();
    let mut to_subjects: Vec<RdfSubject> = Vec::new();
    for triple in &triples {
        let RdfObject::Literal(l) = &triple.object else {
            continue;
        };
        if triple.predicate == evo::from_version() && l.value() == from_version {
            from_subjects.push(triple.subject.clone());
        } else if triple.predicate == evo::to_version() && l.value() == to_version {
            to_subjects.push(triple.subject.clone());
        }
    }
    triples
        .into_iter()
        .filter(|t| {
            !(from_subjects.contains(&t.subject) && to_subjects.contains(&t.subject))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(signature: &str, hash: &str, file: &str, start: i64) -> EntityFacts {
        EntityFacts {
            signature: signature.to_string(),
            body_hash: hash.to_string(),
            file: file.to_string(),
            start_line: start,
            end_line: start + 10,
        }
    }

    fn generator() -> ChangeEventGenerator {
        ChangeEventGenerator::new(GraphSchema::new())
    }

    #[test]
    fn test_rename_yields_removed_and_added() {
        let mut older = VersionSnapshot::default();
        older
            .functions
            .insert("acme.lib.core.create".to_string(), facts("def create(name)", "h1", "core.py", 10));
        let mut newer = VersionSnapshot::default();
        newer
            .functions
            .insert("acme.lib.core.make".to_string(), facts("def make(name)", "h1", "core.py", 10));

        let events = generator().diff(&older, &newer, "v1", "v2");
        assert_eq!(events.len(), 2);
        let added = events.iter().find(|e| e.kind == ChangeKind::Added).unwrap();
        assert_eq!(added.qualified_name, "acme.lib.core.make");
        let removed = events
            .iter()
            .find(|e| e.kind == ChangeKind::Removed)
            .unwrap();
        assert_eq!(removed.qualified_name, "acme.lib.core.create");
    }

    #[test]
    fn test_change_classification_order() {
        let base = facts("def f(a)", "h1", "core.py", 10);

        let sig_changed = facts("def f(a, b)", "h1", "core.py", 10);
        let body_changed = facts("def f(a)", "h2", "core.py", 10);
        let moved = facts("def f(a)", "h1", "util.py", 10);
        let untouched = base.clone();

        for (changed, expected) in [
            (sig_changed, Some(ChangeKind::SignatureChanged)),
            (body_changed, Some(ChangeKind::BodyChanged)),
            (moved, Some(ChangeKind::Moved)),
            (untouched, None),
        ] {
            let mut older = VersionSnapshot::default();
            older.functions.insert("acme.f".to_string(), base.clone());
            let mut newer = VersionSnapshot::default();
            newer.functions.insert("acme.f".to_string(), changed);
            let events = generator().diff(&older, &newer, "v1", "v2");
            match expected {
                Some(kind) => {
                    assert_eq!(events.len(), 1);
                    assert_eq!(events[0].kind, kind);
                }
                None => assert!(events.is_empty()),
            }
        }
    }

    #[test]
    fn test_qualified_name_round_trip() {
        assert_eq!(
            qualified_name_of("function:acme/lib/acme.lib.core.create"),
            Some("acme.lib.core.create".to_string())
        );
        assert_eq!(qualified_name_of("nonsense"), None);
    }

    #[test]
    fn test_event_triples_reference_stable_uri() {
        let repo = RepoId::new("acme", "lib").unwrap();
        let event = ChangeEvent {
            qualified_name: "acme.lib.core.make".to_string(),
            entity_kind: EntityKind::Function,
            kind: ChangeKind::Added,
            from_version: "v1".to_string(),
            to_version: "v2".to_string(),
            file: Some("core.py".to_string()),
        };
        let triples = generator()
            .event_triples(&repo, &event, Some("abc123"))
            .unwrap();
        let rendered: Vec<String> = triples.iter().map(Triple::render).collect();
        assert!(rendered
            .iter()
            .any(|t| t.contains("affectsEntity")
                && t.contains("<function:acme/lib/acme.lib.core.make>")));
        assert!(rendered
            .iter()
            .any(|t| t.contains("introducedBy") && t.contains("commit:acme/lib/abc123")));
        // No implementation URI appears anywhere in the event.
        assert!(rendered.iter().all(|t| !t.contains("#v2")));
    }

    #[test]
    fn test_retain_events_excluding_version() {
        let repo = RepoId::new("acme", "lib").unwrap();
        let generator = generator();
        let keep = generator
            .event_triples(
                &repo,
                &ChangeEvent {
                    qualified_name: "acme.a".to_string(),
                    entity_kind: EntityKind::Function,
                    kind: ChangeKind::Added,
                    from_version: "v1".to_string(),
                    to_version: "v2".to_string(),
                    file: None,
                },
                None,
            )
            .unwrap();
        let drop = generator
            .event_triples(
                &repo,
                &ChangeEvent {
                    qualified_name: "acme.b".to_string(),
                    entity_kind: EntityKind::Function,
                    kind: ChangeKind::Added,
                    from_version: "v2".to_string(),
                    to_version: "v3".to_string(),
                    file: None,
                },
                None,
            )
            .unwrap();
        let mut all = keep.clone();
        all.extend(drop);
        let retained = retain_events_excluding_version(all, "v3");
        assert_eq!(retained.len(), keep.len());
        assert!(retained.iter().all(|t| !t.render().contains("acme.b")));
    }
}
