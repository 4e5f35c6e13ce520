//! Graph schema and URI minting
//!
//! Every graph URI and entity URI is deterministic: stable entity URIs are
//! minted from (organization, repository, kind, name) and never from a
//! version; version-scoped records append the version as a fragment. All
//! path components are percent-encoded, and identifiers are validated
//! before minting: `..`, path separators and whitespace are rejected.

use crate::error::{CodelexError, CodelexResult};
use crate::rdf::NamedNode;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Base IRI of all data graphs
pub const GRAPH_BASE: &str = "http://codelex.dev/graph";

/// Unreserved characters stay literal; everything else is encoded.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn encode(component: &str) -> String {
    utf8_percent_encode(component, COMPONENT).to_string()
}

fn ident_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("static pattern"))
}

const MAX_IDENTIFIER_LEN: usize = 200;

/// Validate an organization, repository or version identifier.
///
/// Identifiers travel into graph URIs and file-system paths, so path
/// metacharacters are a Security rejection rather than a Validation one.
pub fn validate_identifier(what: &str, value: &str) -> CodelexResult<()> {
    if value.is_empty() {
        return Err(CodelexError::validation(format!("{} must not be empty", what)));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(CodelexError::validation(format!(
            "{} exceeds {} characters",
            what, MAX_IDENTIFIER_LEN
        )));
    }
    if value.contains("..") || value.contains('/') || value.contains('\\') {
        return Err(CodelexError::security(format!(
            "{} '{}' contains path characters",
            what, value
        )));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CodelexError::validation(format!(
            "{} '{}' contains whitespace or control characters",
            what, value
        ))
        .with_suggestion("identifiers may use letters, digits, '.', '_' and '-'"));
    }
    if !ident_pattern().is_match(value) {
        return Err(CodelexError::validation(format!(
            "{} '{}' has disallowed characters",
            what, value
        ))
        .with_suggestion("identifiers may use letters, digits, '.', '_' and '-'"));
    }
    Ok(())
}

/// Validate a qualified entity name (dotted path segments).
pub fn validate_qualified_name(value: &str) -> CodelexResult<()> {
    if value.is_empty() || value.len() > 512 {
        return Err(CodelexError::validation(
            "qualified name must be 1..=512 characters",
        ));
    }
    if value.contains("..") || value.contains('/') || value.contains('\\') {
        return Err(CodelexError::security(format!(
            "qualified name '{}' contains path characters",
            value
        )));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CodelexError::validation(format!(
            "qualified name '{}' contains whitespace",
            value
        )));
    }
    Ok(())
}

/// A validated (organization, repository) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    org: String,
    name: String,
}

impl RepoId {
    pub fn new(org: impl Into<String>, name: impl Into<String>) -> CodelexResult<Self> {
        let org = org.into();
        let name = name.into();
        validate_identifier("organization", &org)?;
        validate_identifier("repository", &name)?;
        Ok(Self { org, name })
    }

    /// Parse the `org/name` CLI form
    pub fn parse(value: &str) -> CodelexResult<Self> {
        match value.split_once('/') {
            Some((org, name)) => Self::new(org, name),
            None => Err(CodelexError::validation(format!(
                "repository identifier '{}' is not of the form org/name",
                value
            ))
            .with_suggestion("use the org/name form, e.g. acme/lib")),
        }
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.name)
    }
}

/// URIs of the four shared ontology graphs
#[derive(Debug, Clone)]
pub struct OntologyGraphs {
    pub code: String,
    pub git: String,
    pub evolution: String,
    pub files: String,
}

/// Deterministic naming of graphs and entities
#[derive(Debug, Clone)]
pub struct GraphSchema {
    base: String,
}

impl Default for GraphSchema {
    fn default() -> Self {
        Self {
            base: GRAPH_BASE.to_string(),
        }
    }
}

impl GraphSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema rooted at a custom base IRI (must parse as an absolute IRI).
    pub fn with_base(base: &str) -> CodelexResult<Self> {
        oxiri::Iri::parse(base.to_string())
            .map_err(|e| CodelexError::validation(format!("invalid graph base IRI: {}", e)))?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
        })
    }

    fn repo_root(&self, repo: &RepoId) -> String {
        format!(
            "{}/repo/{}/{}",
            self.base,
            encode(repo.org()),
            encode(repo.name())
        )
    }

    /// Prefix that every graph of this repository lives under; used by
    /// repository removal to enumerate what to drop.
    pub fn repo_prefix(&self, repo: &RepoId) -> String {
        format!("{}/", self.repo_root(repo))
    }

    pub fn stable_functions(&self, repo: &RepoId) -> String {
        format!("{}/functions/stable", self.repo_root(repo))
    }

    /// Logical prefix over all per-version implementation partitions
    pub fn implementations_prefix(&self, repo: &RepoId) -> String {
        format!("{}/functions/implementations/", self.repo_root(repo))
    }

    /// Physical partition for one version
    pub fn implementations(&self, repo: &RepoId, version: &str) -> String {
        format!(
            "{}/functions/implementations/{}",
            self.repo_root(repo),
            encode(version)
        )
    }

    pub fn git_commits(&self, repo: &RepoId) -> String {
        format!("{}/git/commits", self.repo_root(repo))
    }

    pub fn git_developers(&self, repo: &RepoId) -> String {
        format!("{}/git/developers", self.repo_root(repo))
    }

    pub fn git_branches(&self, repo: &RepoId) -> String {
        format!("{}/git/branches", self.repo_root(repo))
    }

    pub fn git_tags(&self, repo: &RepoId) -> String {
        format!("{}/git/tags", self.repo_root(repo))
    }

    pub fn evolution_analysis(&self, repo: &RepoId) -> String {
        format!("{}/evolution/analysis", self.repo_root(repo))
    }

    pub fn evolution_statistics(&self, repo: &RepoId) -> String {
        format!("{}/evolution/statistics", self.repo_root(repo))
    }

    pub fn evolution_patterns(&self, repo: &RepoId) -> String {
        format!("{}/evolution/patterns", self.repo_root(repo))
    }

    pub fn change_events(&self, repo: &RepoId) -> String {
        format!("{}/abc/events", self.repo_root(repo))
    }

    pub fn files_for(&self, repo: &RepoId, version: &str) -> String {
        format!("{}/files/{}", self.repo_root(repo), encode(version))
    }

    pub fn meta_for(&self, repo: &RepoId, version: &str) -> String {
        format!("{}/meta/{}", self.repo_root(repo), encode(version))
    }

    /// The three graphs owned by one (repository, version); created and
    /// destroyed together.
    pub fn version_scoped(&self, repo: &RepoId, version: &str) -> [String; 3] {
        [
            self.implementations(repo, version),
            self.files_for(repo, version),
            self.meta_for(repo, version),
        ]
    }

    pub fn ontology_graphs(&self) -> OntologyGraphs {
        OntologyGraphs {
            code: format!("{}/ontology/code", self.base),
            git: format!("{}/ontology/git", self.base),
            evolution: format!("{}/ontology/evolution", self.base),
            files: format!("{}/ontology/files", self.base),
        }
    }

    // ---- entity URI minting -------------------------------------------

    fn mint(&self, scheme: &str, repo: &RepoId, local: &str) -> CodelexResult<NamedNode> {
        let iri = format!(
            "{}:{}/{}/{}",
            scheme,
            encode(repo.org()),
            encode(repo.name()),
            encode(local)
        );
        NamedNode::new(iri).map_err(|e| CodelexError::validation(e.to_string()))
    }

    fn mint_versioned(
        &self,
        scheme: &str,
        repo: &RepoId,
        local: &str,
        version: &str,
    ) -> CodelexResult<NamedNode> {
        let iri = format!(
            "{}:{}/{}/{}#{}",
            scheme,
            encode(repo.org()),
            encode(repo.name()),
            encode(local),
            encode(version)
        );
        NamedNode::new(iri).map_err(|e| CodelexError::validation(e.to_string()))
    }

    /// Stable function URI; never references a version.
    pub fn function_uri(&self, repo: &RepoId, qualified_name: &str) -> CodelexResult<NamedNode> {
        validate_qualified_name(qualified_name)?;
        self.mint("function", repo, qualified_name)
    }

    /// Version-scoped function implementation URI
    pub fn function_impl_uri(
        &self,
        repo: &RepoId,
        qualified_name: &str,
        version: &str,
    ) -> CodelexResult<NamedNode> {
        validate_qualified_name(qualified_name)?;
        validate_identifier("version", version)?;
        self.mint_versioned("function", repo, qualified_name, version)
    }

    pub fn class_uri(&self, repo: &RepoId, qualified_name: &str) -> CodelexResult<NamedNode> {
        validate_qualified_name(qualified_name)?;
        self.mint("class", repo, qualified_name)
    }

    pub fn class_impl_uri(
        &self,
        repo: &RepoId,
        qualified_name: &str,
        version: &str,
    ) -> CodelexResult<NamedNode> {
        validate_qualified_name(qualified_name)?;
        validate_identifier("version", version)?;
        self.mint_versioned("class", repo, qualified_name, version)
    }

    /// Modules are version-scoped records.
    pub fn module_uri(
        &self,
        repo: &RepoId,
        dotted_path: &str,
        version: &str,
    ) -> CodelexResult<NamedNode> {
        validate_qualified_name(dotted_path)?;
        validate_identifier("version", version)?;
        self.mint_versioned("module", repo, dotted_path, version)
    }

    pub fn commit_uri(&self, repo: &RepoId, sha: &str) -> CodelexResult<NamedNode> {
        validate_identifier("commit sha", sha)?;
        self.mint("commit", repo, sha)
    }

    pub fn developer_uri(&self, repo: &RepoId, email: &str) -> CodelexResult<NamedNode> {
        if email.is_empty() || email.len() > 320 {
            return Err(CodelexError::validation("author email must be 1..=320 characters"));
        }
        // Emails are opaque strings here; encoding keeps them IRI-safe.
        self.mint("developer", repo, email)
    }

    pub fn file_uri(
        &self,
        repo: &RepoId,
        relative_path: &str,
        version: &str,
    ) -> CodelexResult<NamedNode> {
        if relative_path.contains("..") || relative_path.starts_with('/') {
            return Err(CodelexError::security(format!(
                "file path '{}' escapes the checkout",
                relative_path
            )));
        }
        validate_identifier("version", version)?;
        self.mint_versioned("file", repo, relative_path, version)
    }

    pub fn version_uri(&self, repo: &RepoId, version: &str) -> CodelexResult<NamedNode> {
        validate_identifier("version", version)?;
        self.mint("version", repo, version)
    }

    pub fn event_uri(
        &self,
        repo: &RepoId,
        from_version: &str,
        to_version: &str,
        kind: &str,
        qualified_name: &str,
    ) -> CodelexResult<NamedNode> {
        validate_identifier("version", from_version)?;
        validate_identifier("version", to_version)?;
        validate_qualified_name(qualified_name)?;
        let local = format!(
            "{}..{}/{}/{}",
            from_version, to_version, kind, qualified_name
        );
        let iri = format!(
            "event:{}/{}/{}",
            encode(repo.org()),
            encode(repo.name()),
            local
                .split('/')
                .map(encode)
                .collect::<Vec<_>>()
                .join("/")
        );
        NamedNode::new(iri).map_err(|e| CodelexError::validation(e.to_string()))
    }

    pub fn stats_uri(&self, repo: &RepoId) -> CodelexResult<NamedNode> {
        self.mint("stats", repo, "summary")
    }

    pub fn analysis_bucket_uri(&self, repo: &RepoId, bucket: &str) -> CodelexResult<NamedNode> {
        self.mint("analysis", repo, bucket)
    }

    pub fn pattern_uri(&self, repo: &RepoId, pattern: &str) -> CodelexResult<NamedNode> {
        self.mint("pattern", repo, pattern)
    }

    pub fn cluster_uri(&self, repo: &RepoId, module: &str) -> CodelexResult<NamedNode> {
        validate_qualified_name(module)?;
        self.mint("cluster", repo, module)
    }

    /// Branch and tag reference URIs; ref names may contain `/`.
    pub fn ref_uri(&self, repo: &RepoId, kind: &str, name: &str) -> CodelexResult<NamedNode> {
        if name.is_empty() || name.len() > 256 {
            return Err(CodelexError::validation("ref name must be 1..=256 characters"));
        }
        let iri = format!(
            "{}:{}/{}/{}",
            kind,
            encode(repo.org()),
            encode(repo.name()),
            name.split('/').map(encode).collect::<Vec<_>>().join("/")
        );
        NamedNode::new(iri).map_err(|e| CodelexError::validation(e.to_string()))
    }

    pub fn repo_uri(&self, repo: &RepoId) -> CodelexResult<NamedNode> {
        let iri = format!("repo:{}/{}", encode(repo.org()), encode(repo.name()));
        NamedNode::new(iri).map_err(|e| CodelexError::validation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn acme() -> RepoId {
        RepoId::new("acme", "lib").unwrap()
    }

    #[test]
    fn test_repo_id_parse() {
        let id = RepoId::parse("acme/lib").unwrap();
        assert_eq!(id.org(), "acme");
        assert_eq!(id.name(), "lib");
        assert!(RepoId::parse("acmelib").is_err());
    }

    #[test]
    fn test_identifier_rejections() {
        let err = validate_identifier("version", "v 1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = validate_identifier("version", "../etc").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);

        let err = validate_identifier("repository", "a/b").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);
    }

    #[test]
    fn test_graph_uris_are_deterministic() {
        let schema = GraphSchema::new();
        let repo = acme();
        assert_eq!(
            schema.stable_functions(&repo),
            "http://codelex.dev/graph/repo/acme/lib/functions/stable"
        );
        assert_eq!(
            schema.implementations(&repo, "v1"),
            "http://codelex.dev/graph/repo/acme/lib/functions/implementations/v1"
        );
        assert_eq!(
            schema.change_events(&repo),
            "http://codelex.dev/graph/repo/acme/lib/abc/events"
        );
        assert_eq!(
            schema.meta_for(&repo, "v1"),
            "http://codelex.dev/graph/repo/acme/lib/meta/v1"
        );
    }

    #[test]
    fn test_stable_uri_never_carries_version() {
        let schema = GraphSchema::new();
        let stable = schema.function_uri(&acme(), "acme.lib.core.create").unwrap();
        assert_eq!(stable.as_str(), "function:acme/lib/acme.lib.core.create");
        let implementation = schema
            .function_impl_uri(&acme(), "acme.lib.core.create", "v1")
            .unwrap();
        assert_eq!(
            implementation.as_str(),
            "function:acme/lib/acme.lib.core.create#v1"
        );
    }

    #[test]
    fn test_email_minting_is_verbatim_encoded() {
        let schema = GraphSchema::new();
        let dev = schema.developer_uri(&acme(), "alice@example.com").unwrap();
        assert_eq!(dev.as_str(), "developer:acme/lib/alice%40example.com");
    }

    #[test]
    fn test_file_uri_rejects_escapes() {
        let schema = GraphSchema::new();
        let err = schema.file_uri(&acme(), "../outside.py", "v1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);
        let err = schema.file_uri(&acme(), "/etc/passwd", "v1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);
    }

    #[test]
    fn test_version_scoped_triplet() {
        let schema = GraphSchema::new();
        let graphs = schema.version_scoped(&acme(), "v2");
        assert!(graphs[0].ends_with("/functions/implementations/v2"));
        assert!(graphs[1].ends_with("/files/v2"));
        assert!(graphs[2].ends_with("/meta/v2"));
    }
}
