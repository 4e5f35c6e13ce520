//! Ontology mapper
//!
//! Pure translation from parsed entities plus a version context into RDF
//! triples. Stable-identity triples are kept apart from version-scoped
//! implementation triples so the builder can route them to the right
//! graphs. The mapper is stateless and deterministic: identical inputs
//! yield identical triple sets.

use crate::error::CodelexResult;
use crate::parser::{ParsedClass, ParsedEntity, ParsedFunction, ParsedModule};
use crate::rdf::ontology::{files as files_ns, rdf_type, woc};
use crate::rdf::{Literal, Triple};
use crate::schema::{GraphSchema, RepoId};
use std::collections::BTreeSet;
use std::path::Path;

/// Context of one (repository, version) ingestion
pub struct VersionContext<'a> {
    pub repo: &'a RepoId,
    pub version: &'a str,
    /// Qualified names of every function present in this version; used to
    /// resolve call edges to stable URIs. Unresolvable calls are omitted.
    pub known_functions: &'a BTreeSet<String>,
}

/// Triples split by destination graph
#[derive(Debug, Default)]
pub struct MappedTriples {
    /// Introduction of a genuinely new stable entity (type, name, module,
    /// first-seen); the builder applies these only when the entity is new.
    pub stable_intro: Vec<Triple>,
    /// Version-set widening, applied on every ingestion.
    pub stable_membership: Vec<Triple>,
    /// Version-scoped implementation record.
    pub implementation: Vec<Triple>,
}

/// Map one parsed entity into its triple sets.
pub fn map_entity(
    schema: &GraphSchema,
    entity: &ParsedEntity,
    ctx: &VersionContext<'_>,
) -> CodelexResult<MappedTriples> {
    match entity {
        ParsedEntity::Function(f) => map_function(schema, f, ctx),
        ParsedEntity::Class(c) => map_class(schema, c, ctx),
        ParsedEntity::Module(m) => map_module(schema, m, ctx),
    }
}

fn path_literal(path: &Path) -> Literal {
    Literal::string(path.to_string_lossy().replace('\\', "/"))
}

fn map_function(
    schema: &GraphSchema,
    f: &ParsedFunction,
    ctx: &VersionContext<'_>,
) -> CodelexResult<MappedTriples> {
    let stable = schema.function_uri(ctx.repo, &f.qualified_name)?;
    let implementation = schema.function_impl_uri(ctx.repo, &f.qualified_name, ctx.version)?;

    let stable_intro = vec![
        Triple::new(stable.clone(), rdf_type(), woc::function()),
        Triple::new(
            stable.clone(),
            woc::canonical_name(),
            Literal::string(&f.name),
        ),
        Triple::new(
            stable.clone(),
            woc::module_path(),
            Literal::string(&f.module_path),
        ),
        Triple::new(
            stable.clone(),
            woc::first_seen_version(),
            Literal::string(ctx.version),
        ),
    ];
    let stable_membership = vec![Triple::new(
        stable.clone(),
        woc::exists_in_version(),
        Literal::string(ctx.version),
    )];

    let mut impl_triples = vec![
        Triple::new(
            implementation.clone(),
            rdf_type(),
            woc::function_implementation(),
        ),
        Triple::new(
            implementation.clone(),
            woc::implements_function(),
            stable,
        ),
        Triple::new(
            implementation.clone(),
            woc::belongs_to_version(),
            Literal::string(ctx.version),
        ),
        Triple::new(
            implementation.clone(),
            woc::canonical_name(),
            Literal::string(&f.name),
        ),
        Triple::new(
            implementation.clone(),
            woc::module_path(),
            Literal::string(&f.module_path),
        ),
        Triple::new(
            implementation.clone(),
            woc::signature(),
            Literal::string(&f.signature),
        ),
        Triple::new(
            implementation.clone(),
            woc::defined_in_file(),
            path_literal(&f.file),
        ),
        Triple::new(
            implementation.clone(),
            woc::start_line(),
            Literal::integer(f.start_line as i64),
        ),
        Triple::new(
            implementation.clone(),
            woc::end_line(),
            Literal::integer(f.end_line as i64),
        ),
        Triple::new(
            implementation.clone(),
            woc::line_count(),
            Literal::integer(f.body_lines as i64),
        ),
        Triple::new(
            implementation.clone(),
            woc::category(),
            Literal::string(f.category.as_str()),
        ),
        Triple::new(
            implementation.clone(),
            woc::refactor_score(),
            Literal::string(f.score().as_str()),
        ),
        Triple::new(
            implementation.clone(),
            woc::body_hash(),
            Literal::string(&f.body_hash),
        ),
    ];
    if let Some(doc) = &f.docstring {
        impl_triples.push(Triple::new(
            implementation.clone(),
            woc::docstring(),
            Literal::string(doc),
        ));
    }
    for call in &f.calls {
        if let Some(target) = resolve_call(call, &f.qualified_name, ctx.known_functions) {
            let callee = schema.function_uri(ctx.repo, &target)?;
            impl_triples.push(Triple::new(implementation.clone(), woc::calls(), callee));
        }
    }

    Ok(MappedTriples {
        stable_intro,
        stable_membership,
        implementation: impl_triples,
    })
}

/// Resolve a syntactic call name against the version's function set.
///
/// Exact qualified matches win; otherwise a suffix match is accepted only
/// when unambiguous. Self-calls and unresolvable names yield nothing.
fn resolve_call(
    call: &str,
    caller: &str,
    known_functions: &BTreeSet<String>,
) -> Option<String> {
    if known_functions.contains(call) {
        if call == caller {
            return None;
        }
        return Some(call.to_string());
    }
    let suffix = format!(".{}", call);
    let mut matches = known_functions
        .iter()
        .filter(|qn| qn.ends_with(&suffix) && qn.as_str() != caller);
    let first = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    Some(first.clone())
}

fn class_category(c: &ParsedClass) -> &'static str {
    if c.name.starts_with("Test") || c.module_path.split('.').any(|p| p == "tests") {
        "test"
    } else if c.name.starts_with('_') {
        "private"
    } else {
        "class"
    }
}

fn map_class(
    schema: &GraphSchema,
    c: &ParsedClass,
    ctx: &VersionContext<'_>,
) -> CodelexResult<MappedTriples> {
    let stable = schema.class_uri(ctx.repo, &c.qualified_name)?;
    let implementation = schema.class_impl_uri(ctx.repo, &c.qualified_name, ctx.version)?;

    let stable_intro = vec![
        Triple::new(stable.clone(), rdf_type(), woc::class()),
        Triple::new(
            stable.clone(),
            woc::canonical_name(),
            Literal::string(&c.name),
        ),
        Triple::new(
            stable.clone(),
            woc::module_path(),
            Literal::string(&c.module_path),
        ),
        Triple::new(
            stable.clone(),
            woc::first_seen_version(),
            Literal::string(ctx.version),
        ),
    ];
    let stable_membership = vec![Triple::new(
        stable.clone(),
        woc::exists_in_version(),
        Literal::string(ctx.version),
    )];

    let mut impl_triples = vec![
        Triple::new(
            implementation.clone(),
            rdf_type(),
            woc::class_implementation(),
        ),
        Triple::new(implementation.clone(), woc::implements_class(), stable),
        Triple::new(
            implementation.clone(),
            woc::belongs_to_version(),
            Literal::string(ctx.version),
        ),
        Triple::new(
            implementation.clone(),
            woc::canonical_name(),
            Literal::string(&c.name),
        ),
        Triple::new(
            implementation.clone(),
            woc::module_path(),
            Literal::string(&c.module_path),
        ),
        Triple::new(
            implementation.clone(),
            woc::signature(),
            Literal::string(&c.signature),
        ),
        Triple::new(
            implementation.clone(),
            woc::defined_in_file(),
            path_literal(&c.file),
        ),
        Triple::new(
            implementation.clone(),
            woc::start_line(),
            Literal::integer(c.start_line as i64),
        ),
        Triple::new(
            implementation.clone(),
            woc::end_line(),
            Literal::integer(c.end_line as i64),
        ),
        Triple::new(
            implementation.clone(),
            woc::method_count(),
            Literal::integer(c.methods.len() as i64),
        ),
        Triple::new(
            implementation.clone(),
            woc::category(),
            Literal::string(class_category(c)),
        ),
        Triple::new(
            implementation.clone(),
            woc::refactor_score(),
            Literal::string(c.score().as_str()),
        ),
        Triple::new(
            implementation.clone(),
            woc::body_hash(),
            Literal::string(&c.body_hash),
        ),
    ];
    if let Some(doc) = &c.docstring {
        impl_triples.push(Triple::new(
            implementation.clone(),
            woc::docstring(),
            Literal::string(doc),
        ));
    }
    for parent in &c.parents {
        impl_triples.push(Triple::new(
            implementation.clone(),
            woc::parent_class(),
            Literal::string(parent),
        ));
    }
    for method in &c.methods {
        let method_uri = schema.function_uri(ctx.repo, method)?;
        impl_triples.push(Triple::new(
            implementation.clone(),
            woc::has_method(),
            method_uri,
        ));
    }

    Ok(MappedTriples {
        stable_intro,
        stable_membership,
        implementation: impl_triples,
    })
}

fn map_module(
    schema: &GraphSchema,
    m: &ParsedModule,
    ctx: &VersionContext<'_>,
) -> CodelexResult<MappedTriples> {
    let uri = schema.module_uri(ctx.repo, &m.dotted_path, ctx.version)?;
    let implementation = vec![
        Triple::new(uri.clone(), rdf_type(), woc::module()),
        Triple::new(
            uri.clone(),
            woc::canonical_name(),
            Literal::string(&m.dotted_path),
        ),
        Triple::new(uri.clone(), woc::defined_in_file(), path_literal(&m.file)),
        Triple::new(
            uri.clone(),
            woc::belongs_to_version(),
            Literal::string(ctx.version),
        ),
        Triple::new(
            uri.clone(),
            woc::function_count(),
            Literal::integer(m.function_count as i64),
        ),
        Triple::new(
            uri.clone(),
            woc::class_count(),
            Literal::integer(m.class_count as i64),
        ),
        Triple::new(
            uri.clone(),
            woc::refactor_score(),
            Literal::string(m.score().as_str()),
        ),
    ];
    Ok(MappedTriples {
        implementation,
        ..Default::default()
    })
}

/// Triples for one source file entry in the per-version files graph.
pub fn map_file(
    schema: &GraphSchema,
    repo: &RepoId,
    version: &str,
    path: &Path,
    entity_count: u32,
    skipped: Option<&str>,
) -> CodelexResult<Vec<Triple>> {
    let rel = path.to_string_lossy().replace('\\', "/");
    let uri = schema.file_uri(repo, &rel, version)?;
    let mut triples = vec![
        Triple::new(uri.clone(), rdf_type(), files_ns::source_file()),
        Triple::new(uri.clone(), files_ns::path(), Literal::string(rel)),
        Triple::new(
            uri.clone(),
            files_ns::entity_count(),
            Literal::integer(entity_count as i64),
        ),
    ];
    if skipped.is_some() {
        triples.push(Triple::new(
            uri,
            files_ns::skipped(),
            Literal::boolean(true),
        ));
    }
    Ok(triples)
}

/// Triples of the per-version metadata graph.
pub fn version_meta(
    schema: &GraphSchema,
    repo: &RepoId,
    version: &str,
    function_count: usize,
    class_count: usize,
    module_count: usize,
    ingested_at: &str,
) -> CodelexResult<Vec<Triple>> {
    let uri = schema.version_uri(repo, version)?;
    Ok(vec![
        Triple::new(uri.clone(), rdf_type(), woc::version()),
        Triple::new(uri.clone(), woc::version_tag(), Literal::string(version)),
        Triple::new(
            uri.clone(),
            woc::ingested_at(),
            Literal::date_time(ingested_at),
        ),
        Triple::new(
            uri.clone(),
            woc::function_count(),
            Literal::integer(function_count as i64),
        ),
        Triple::new(
            uri.clone(),
            woc::class_count(),
            Literal::integer(class_count as i64),
        ),
        Triple::new(
            uri,
            woc::module_count(),
            Literal::integer(module_count as i64),
        ),
    ])
}
