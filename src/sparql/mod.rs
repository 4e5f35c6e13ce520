//! SPARQL 1.1 query support
//!
//! Queries are parsed with spargebra and evaluated directly over the
//! named-graph store. Only the read forms SELECT, ASK and CONSTRUCT are
//! accepted: any update form is rejected with a security error before a
//! single store call is made.

mod eval;
mod results;

pub use results::{QueryOutcome, QuerySolution, ResultFormat};

use crate::rdf::{Triple, TripleStore};
use spargebra::Query;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// SPARQL errors
#[derive(Error, Debug)]
pub enum SparqlError {
    /// Syntax error, message carries the offending position
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// The query text is an update form
    #[error("update forms are not accepted by the query interface")]
    UpdateForm,

    /// Parsed but using a feature the evaluator does not cover
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// Evaluation failed
    #[error("Execution error: {0}")]
    Execution(String),

    /// The per-call timeout elapsed
    #[error("query exceeded {limit:.1?} after {elapsed:.1?}")]
    Timeout { elapsed: Duration, limit: Duration },
}

pub type SparqlResult<T> = Result<T, SparqlError>;

/// SPARQL query engine over a shared store
pub struct SparqlEngine {
    store: Arc<TripleStore>,
}

impl SparqlEngine {
    pub fn new(store: Arc<TripleStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<TripleStore> {
        &self.store
    }

    /// Parse a query, rejecting update forms before any evaluation.
    pub fn parse(query: &str) -> SparqlResult<Query> {
        match Query::parse(query, None) {
            Ok(parsed) => Ok(parsed),
            Err(parse_err) => {
                // A text that parses as an update is a security rejection,
                // not a syntax error.
                if spargebra::Update::parse(query, None).is_ok() {
                    Err(SparqlError::UpdateForm)
                } else {
                    Err(SparqlError::Syntax(parse_err.to_string()))
                }
            }
        }
    }

    /// Execute a read-only query with a per-call timeout.
    pub fn query(&self, query: &str, timeout: Duration) -> SparqlResult<QueryOutcome> {
        let parsed = Self::parse(query)?;
        let started = Instant::now();
        debug!(timeout_s = timeout.as_secs(), "executing sparql query");

        let outcome = match parsed {
            Query::Select { pattern, .. } => {
                let variables = eval::projected_variables(&pattern);
                let rows = eval::evaluate(&self.store, &pattern, started, timeout)?;
                QueryOutcome::Solutions {
                    variables,
                    rows: rows.into_iter().map(QuerySolution::from_binding).collect(),
                }
            }
            Query::Ask { pattern, .. } => {
                let rows = eval::evaluate(&self.store, &pattern, started, timeout)?;
                QueryOutcome::Boolean(!rows.is_empty())
            }
            Query::Construct {
                template, pattern, ..
            } => {
                let rows = eval::evaluate(&self.store, &pattern, started, timeout)?;
                let triples: Vec<Triple> = eval::instantiate_template(&template, &rows);
                QueryOutcome::Graph(triples)
            }
            Query::Describe { .. } => {
                return Err(SparqlError::Unsupported("DESCRIBE".to_string()))
            }
        };
        Ok(outcome)
    }

    /// SELECT convenience that fails on non-solution outcomes.
    pub fn select(
        &self,
        query: &str,
        timeout: Duration,
    ) -> SparqlResult<(Vec<String>, Vec<QuerySolution>)> {
        match self.query(query, timeout)? {
            QueryOutcome::Solutions { variables, rows } => Ok((variables, rows)),
            _ => Err(SparqlError::Execution(
                "expected a SELECT query".to_string(),
            )),
        }
    }
}
