//! Crate-wide error taxonomy
//!
//! Every public operation reports failures through [`CodelexError`], which
//! carries a taxonomy kind, a human message and a list of suggested
//! remediations. Subsystems keep their own `thiserror` enums and convert at
//! the operation boundary.

use std::fmt;

/// Error taxonomy kinds
///
/// Recoverable kinds (Source, transient Store, Network within the retry
/// limit) are handled locally and summarized at end of operation; the rest
/// surface to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input (bad repository identifier, oversized argument,
    /// whitespace in a version tag)
    Validation,
    /// Path escape, update form in a SPARQL query, disallowed characters
    Security,
    /// Parser failed on a file
    Source,
    /// History read, clone or checkout failed
    Git,
    /// Transaction or query failed
    Store,
    /// Remote fetch failed
    Network,
    /// Writer or disk failure during export
    Export,
    /// Invalid configuration value
    Configuration,
    /// Operation cancelled via its cancellation token
    Cancelled,
}

impl ErrorKind {
    /// Process exit code for the CLI surface; 0 is reserved for success.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Validation => 2,
            ErrorKind::Security => 3,
            ErrorKind::Source => 4,
            ErrorKind::Git => 5,
            ErrorKind::Store => 6,
            ErrorKind::Network => 7,
            ErrorKind::Export => 8,
            ErrorKind::Configuration => 9,
            ErrorKind::Cancelled => 130,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Security => "security",
            ErrorKind::Source => "source",
            ErrorKind::Git => "git",
            ErrorKind::Store => "store",
            ErrorKind::Network => "network",
            ErrorKind::Export => "export",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The crate-level error type
#[derive(Debug)]
pub struct CodelexError {
    kind: ErrorKind,
    message: String,
    suggestions: Vec<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CodelexError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            suggestions: Vec::new(),
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Security, message)
    }

    pub fn source_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Source, message)
    }

    pub fn git(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Git, message)
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Store, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn export(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Export, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Cancelled,
            format!("operation cancelled during {}", stage.into()),
        )
    }

    /// Attach a suggested remediation
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Attach an underlying cause
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    /// Whether a single local retry is worth attempting
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Store | ErrorKind::Network)
    }
}

impl fmt::Display for CodelexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for CodelexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<git2::Error> for CodelexError {
    fn from(err: git2::Error) -> Self {
        let kind = match err.class() {
            git2::ErrorClass::Net | git2::ErrorClass::Http | git2::ErrorClass::Ssh => {
                ErrorKind::Network
            }
            _ => ErrorKind::Git,
        };
        Self::new(kind, err.message().to_string()).with_source(err)
    }
}

impl From<std::io::Error> for CodelexError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Store, err.to_string()).with_source(err)
    }
}

pub type CodelexResult<T> = Result<T, CodelexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_partition() {
        let kinds = [
            ErrorKind::Validation,
            ErrorKind::Security,
            ErrorKind::Source,
            ErrorKind::Git,
            ErrorKind::Store,
            ErrorKind::Network,
            ErrorKind::Export,
            ErrorKind::Configuration,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_suggestions_carried() {
        let err = CodelexError::validation("bad repository identifier")
            .with_suggestion("use the org/name form, e.g. acme/lib");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.suggestions().len(), 1);
    }

    #[test]
    fn test_git_network_classification() {
        let inner = git2::Error::new(
            git2::ErrorCode::GenericError,
            git2::ErrorClass::Net,
            "connect timed out",
        );
        let err = CodelexError::from(inner);
        assert_eq!(err.kind(), ErrorKind::Network);
    }
}
