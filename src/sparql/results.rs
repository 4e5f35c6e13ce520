//! SPARQL query results
//!
//! Solution sequences with accessors typed for the codelex data model,
//! plus serialization to the SPARQL 1.1 Query Results JSON format and CSV.

use super::eval::Binding;
use crate::rdf::Triple;
use oxrdf::Term;
use serde_json::{json, Map, Value};

/// Result serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFormat {
    Json,
    Csv,
}

/// One solution (variable bindings)
#[derive(Debug, Clone)]
pub struct QuerySolution {
    binding: Binding,
}

impl QuerySolution {
    pub(crate) fn from_binding(binding: Binding) -> Self {
        Self { binding }
    }

    pub fn get(&self, variable: &str) -> Option<&Term> {
        self.binding.get(variable)
    }

    /// Literal text of a bound variable
    pub fn text(&self, variable: &str) -> Option<&str> {
        match self.binding.get(variable)? {
            Term::Literal(l) => Some(l.value()),
            _ => None,
        }
    }

    /// IRI of a bound variable
    pub fn iri(&self, variable: &str) -> Option<&str> {
        match self.binding.get(variable)? {
            Term::NamedNode(n) => Some(n.as_str()),
            _ => None,
        }
    }

    /// Integer value of a bound literal
    pub fn integer(&self, variable: &str) -> Option<i64> {
        self.text(variable)?.parse().ok()
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.binding.keys().map(String::as_str)
    }
}

/// Outcome of a query: rows, a boolean, or constructed triples
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Solutions {
        variables: Vec<String>,
        rows: Vec<QuerySolution>,
    },
    Boolean(bool),
    Graph(Vec<Triple>),
}

impl QueryOutcome {
    pub fn len(&self) -> usize {
        match self {
            QueryOutcome::Solutions { rows, .. } => rows.len(),
            QueryOutcome::Boolean(_) => 1,
            QueryOutcome::Graph(triples) => triples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            QueryOutcome::Solutions { rows, .. } => rows.is_empty(),
            QueryOutcome::Boolean(_) => false,
            QueryOutcome::Graph(triples) => triples.is_empty(),
        }
    }

    /// Serialize to the requested format.
    pub fn serialize(&self, format: ResultFormat) -> String {
        match format {
            ResultFormat::Json => self.to_json().to_string(),
            ResultFormat::Csv => self.to_csv(),
        }
    }

    /// SPARQL 1.1 Query Results JSON
    pub fn to_json(&self) -> Value {
        match self {
            QueryOutcome::Boolean(value) => json!({ "head": {}, "boolean": value }),
            QueryOutcome::Solutions { variables, rows } => {
                let bindings: Vec<Value> = rows
                    .iter()
                    .map(|row| {
                        let mut entry = Map::new();
                        for var in variables {
                            if let Some(term) = row.get(var) {
                                entry.insert(var.clone(), term_json(term));
                            }
                        }
                        Value::Object(entry)
                    })
                    .collect();
                json!({
                    "head": { "vars": variables },
                    "results": { "bindings": bindings }
                })
            }
            QueryOutcome::Graph(triples) => {
                let rendered: Vec<String> =
                    triples.iter().map(|t| t.render()).collect();
                json!({ "triples": rendered })
            }
        }
    }

    fn to_csv(&self) -> String {
        match self {
            QueryOutcome::Boolean(value) => format!("boolean\n{}\n", value),
            QueryOutcome::Solutions { variables, rows } => {
                let mut out = String::new();
                out.push_str(&variables.join(","));
                out.push('\n');
                for row in rows {
                    let cells: Vec<String> = variables
                        .iter()
                        .map(|var| match row.get(var) {
                            Some(Term::Literal(l)) => csv_escape(l.value()),
                            Some(Term::NamedNode(n)) => csv_escape(n.as_str()),
                            Some(other) => csv_escape(&other.to_string()),
                            None => String::new(),
                        })
                        .collect();
                    out.push_str(&cells.join(","));
                    out.push('\n');
                }
                out
            }
            QueryOutcome::Graph(triples) => {
                let mut out = String::from("triple\n");
                for t in triples {
                    out.push_str(&csv_escape(&t.render()));
                    out.push('\n');
                }
                out
            }
        }
    }
}

fn term_json(term: &Term) -> Value {
    match term {
        Term::NamedNode(n) => json!({ "type": "uri", "value": n.as_str() }),
        Term::BlankNode(b) => json!({ "type": "bnode", "value": b.as_str() }),
        Term::Literal(l) => {
            let mut entry = Map::new();
            entry.insert("type".to_string(), Value::String("literal".to_string()));
            entry.insert("value".to_string(), Value::String(l.value().to_string()));
            if let Some(lang) = l.language() {
                entry.insert("xml:lang".to_string(), Value::String(lang.to_string()));
            } else {
                entry.insert(
                    "datatype".to_string(),
                    Value::String(l.datatype().as_str().to_string()),
                );
            }
            Value::Object(entry)
        }
        #[allow(unreachable_patterns)]
        _ => json!({ "type": "triple", "value": term.to_string() }),
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
