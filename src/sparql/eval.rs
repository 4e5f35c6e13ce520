//! SPARQL algebra evaluation
//!
//! Walks the spargebra algebra tree and evaluates it against the store.
//! Basic graph patterns, GRAPH scoping, joins, OPTIONAL, UNION, MINUS,
//! FILTER, BIND, VALUES, DISTINCT, ORDER BY, LIMIT/OFFSET and the common
//! aggregates are covered; property paths and federation are reported as
//! unsupported rather than silently mis-answered.
//!
//! A basic graph pattern outside any GRAPH clause matches the union of all
//! named graphs, deduplicated at the triple level.

use super::{SparqlError, SparqlResult};
use crate::rdf::types::{NamedNode, RdfObject, RdfSubject, Triple, TriplePattern};
use crate::rdf::TripleStore;
use oxrdf::{NamedNode as OxNamedNode, Term};
use regex::RegexBuilder;
use rustc_hash::FxHashSet;
use spargebra::algebra::{
    AggregateExpression, AggregateFunction, Expression, Function, GraphPattern, OrderExpression,
};
use spargebra::term::{
    GroundTerm, NamedNodePattern, TermPattern, TriplePattern as AlgebraTriplePattern,
};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Instant;

/// One solution: variable name → bound term
pub type Binding = BTreeMap<String, Term>;

/// Which graphs a pattern currently matches against
#[derive(Debug, Clone)]
enum GraphScope {
    /// Union of all named graphs
    Union,
    /// A single named graph
    Named(String),
}

struct Ctx<'a> {
    store: &'a TripleStore,
    started: Instant,
    limit: std::time::Duration,
}

impl Ctx<'_> {
    fn check_deadline(&self) -> SparqlResult<()> {
        let elapsed = self.started.elapsed();
        if elapsed > self.limit {
            Err(SparqlError::Timeout {
                elapsed,
                limit: self.limit,
            })
        } else {
            Ok(())
        }
    }
}

/// Evaluate a graph pattern to its solution sequence.
pub fn evaluate(
    store: &TripleStore,
    pattern: &GraphPattern,
    started: Instant,
    limit: std::time::Duration,
) -> SparqlResult<Vec<Binding>> {
    let ctx = Ctx {
        store,
        started,
        limit,
    };
    eval_pattern(&ctx, pattern, &GraphScope::Union)
}

/// Variables of the outermost projection, in declaration order.
pub fn projected_variables(pattern: &GraphPattern) -> Vec<String> {
    match pattern {
        GraphPattern::Project { variables, .. } => {
            variables.iter().map(|v| v.as_str().to_string()).collect()
        }
        GraphPattern::Distinct { inner }
        | GraphPattern::Reduced { inner }
        | GraphPattern::Slice { inner, .. }
        | GraphPattern::OrderBy { inner, .. } => projected_variables(inner),
        _ => Vec::new(),
    }
}

fn eval_pattern(
    ctx: &Ctx<'_>,
    pattern: &GraphPattern,
    scope: &GraphScope,
) -> SparqlResult<Vec<Binding>> {
    ctx.check_deadline()?;
    match pattern {
        GraphPattern::Bgp { patterns } => eval_bgp(ctx, patterns, scope),
        GraphPattern::Join { left, right } => {
            let lhs = eval_pattern(ctx, left, scope)?;
            let rhs = eval_pattern(ctx, right, scope)?;
            Ok(join(&lhs, &rhs))
        }
        GraphPattern::LeftJoin {
            left,
            right,
            expression,
        } => {
            let lhs = eval_pattern(ctx, left, scope)?;
            let rhs = eval_pattern(ctx, right, scope)?;
            let mut out = Vec::new();
            for l in &lhs {
                let mut extended = Vec::new();
                for r in &rhs {
                    if let Some(merged) = merge(l, r) {
                        let keep = match expression {
                            Some(expr) => truthy(eval_expr(expr, &merged)),
                            None => true,
                        };
                        if keep {
                            extended.push(merged);
                        }
                    }
                }
                if extended.is_empty() {
                    out.push(l.clone());
                } else {
                    out.append(&mut extended);
                }
            }
            Ok(out)
        }
        GraphPattern::Filter { expr, inner } => {
            let rows = eval_pattern(ctx, inner, scope)?;
            Ok(rows
                .into_iter()
                .filter(|b| truthy(eval_expr(expr, b)))
                .collect())
        }
        GraphPattern::Union { left, right } => {
            let mut rows = eval_pattern(ctx, left, scope)?;
            rows.extend(eval_pattern(ctx, right, scope)?);
            Ok(rows)
        }
        GraphPattern::Graph { name, inner } => match name {
            NamedNodePattern::NamedNode(n) => {
                eval_pattern(ctx, inner, &GraphScope::Named(n.as_str().to_string()))
            }
            NamedNodePattern::Variable(var) => {
                let mut out = Vec::new();
                for graph in ctx.store.list_graphs(None) {
                    let rows =
                        eval_pattern(ctx, inner, &GraphScope::Named(graph.clone()))?;
                    let graph_term =
                        Term::NamedNode(OxNamedNode::new_unchecked(graph.clone()));
                    for mut row in rows {
                        match row.get(var.as_str()) {
                            Some(existing) if existing != &graph_term => continue,
                            _ => {
                                row.insert(var.as_str().to_string(), graph_term.clone());
                                out.push(row);
                            }
                        }
                    }
                }
                Ok(out)
            }
        },
        GraphPattern::Extend {
            inner,
            variable,
            expression,
        } => {
            let rows = eval_pattern(ctx, inner, scope)?;
            Ok(rows
                .into_iter()
                .map(|mut row| {
                    if let Some(term) = eval_expr(expression, &row) {
                        row.insert(variable.as_str().to_string(), term);
                    }
                    row
                })
                .collect())
        }
        GraphPattern::Minus { left, right } => {
            let lhs = eval_pattern(ctx, left, scope)?;
            let rhs = eval_pattern(ctx, right, scope)?;
            Ok(lhs
                .into_iter()
                .filter(|l| {
                    !rhs.iter().any(|r| {
                        let shares_var = l.keys().any(|k| r.contains_key(k));
                        shares_var && merge(l, r).is_some()
                    })
                })
                .collect())
        }
        GraphPattern::Values {
            variables,
            bindings,
        } => {
            let mut out = Vec::new();
            for row in bindings {
                let mut binding = Binding::new();
                for (var, value) in variables.iter().zip(row.iter()) {
                    if let Some(term) = value {
                        binding.insert(var.as_str().to_string(), ground_to_term(term));
                    }
                }
                out.push(binding);
            }
            Ok(out)
        }
        GraphPattern::OrderBy { inner, expression } => {
            let mut rows = eval_pattern(ctx, inner, scope)?;
            rows.sort_by(|a, b| {
                for order in expression {
                    let (expr, descending) = match order {
                        OrderExpression::Asc(e) => (e, false),
                        OrderExpression::Desc(e) => (e, true),
                    };
                    let va = eval_expr(expr, a);
                    let vb = eval_expr(expr, b);
                    let cmp = cmp_optional_terms(&va, &vb);
                    let cmp = if descending { cmp.reverse() } else { cmp };
                    if cmp != Ordering::Equal {
                        return cmp;
                    }
                }
                Ordering::Equal
            });
            Ok(rows)
        }
        GraphPattern::Project { inner, variables } => {
            let rows = eval_pattern(ctx, inner, scope)?;
            Ok(rows
                .into_iter()
                .map(|row| {
                    let mut projected = Binding::new();
                    for var in variables {
                        if let Some(term) = row.get(var.as_str()) {
                            projected.insert(var.as_str().to_string(), term.clone());
                        }
                    }
                    projected
                })
                .collect())
        }
        GraphPattern::Distinct { inner } | GraphPattern::Reduced { inner } => {
            let rows = eval_pattern(ctx, inner, scope)?;
            let mut seen = FxHashSet::default();
            Ok(rows
                .into_iter()
                .filter(|row| seen.insert(binding_key(row)))
                .collect())
        }
        GraphPattern::Slice {
            inner,
            start,
            length,
        } => {
            let rows = eval_pattern(ctx, inner, scope)?;
            let iter = rows.into_iter().skip(*start);
            Ok(match length {
                Some(len) => iter.take(*len).collect(),
                None => iter.collect(),
            })
        }
        GraphPattern::Group {
            inner,
            variables,
            aggregates,
        } => {
            let rows = eval_pattern(ctx, inner, scope)?;
            eval_group(rows, variables, aggregates)
        }
        GraphPattern::Path { .. } => {
            Err(SparqlError::Unsupported("property paths".to_string()))
        }
        GraphPattern::Service { .. } => {
            Err(SparqlError::Unsupported("SERVICE federation".to_string()))
        }
    }
}

// ---- basic graph patterns ---------------------------------------------

fn eval_bgp(
    ctx: &Ctx<'_>,
    patterns: &[AlgebraTriplePattern],
    scope: &GraphScope,
) -> SparqlResult<Vec<Binding>> {
    let mut solutions: Vec<Binding> = vec![Binding::new()];
    for pattern in patterns {
        ctx.check_deadline()?;
        let mut next = Vec::new();
        for binding in &solutions {
            let store_pattern = concretize(pattern, binding);
            let candidates = triples_matching(ctx, &store_pattern, scope);
            for triple in candidates {
                if let Some(extended) = unify_triple(pattern, &triple, binding) {
                    next.push(extended);
                }
            }
        }
        solutions = next;
        if solutions.is_empty() {
            break;
        }
    }
    Ok(solutions)
}

fn triples_matching(
    ctx: &Ctx<'_>,
    pattern: &TriplePattern,
    scope: &GraphScope,
) -> Vec<Triple> {
    match scope {
        GraphScope::Named(graph) => ctx.store.match_in_graph(graph, pattern),
        GraphScope::Union => {
            let mut seen = FxHashSet::default();
            let mut out = Vec::new();
            for (_, triple) in ctx.store.match_quads(None, pattern) {
                if seen.insert(triple.clone()) {
                    out.push(triple);
                }
            }
            out
        }
    }
}

/// Narrow a store pattern with whatever the algebra pattern and the current
/// binding pin down.
fn concretize(pattern: &AlgebraTriplePattern, binding: &Binding) -> TriplePattern {
    let subject = match resolve_term(&pattern.subject, binding) {
        Some(Term::NamedNode(n)) => Some(RdfSubject::NamedNode(n.into())),
        Some(Term::BlankNode(b)) => Some(RdfSubject::BlankNode(b.into())),
        _ => None,
    };
    let predicate = match &pattern.predicate {
        NamedNodePattern::NamedNode(n) => Some(NamedNode::from(n.clone())),
        NamedNodePattern::Variable(v) => match binding.get(v.as_str()) {
            Some(Term::NamedNode(n)) => Some(NamedNode::from(n.clone())),
            _ => None,
        },
    };
    let object = resolve_term(&pattern.object, binding).map(term_to_object);
    TriplePattern::new(subject, predicate, object)
}

fn resolve_term(pattern: &TermPattern, binding: &Binding) -> Option<Term> {
    match pattern {
        TermPattern::NamedNode(n) => Some(Term::NamedNode(n.clone())),
        TermPattern::Literal(l) => Some(Term::Literal(l.clone())),
        TermPattern::BlankNode(b) => binding.get(&blank_key(b.as_str())).cloned(),
        TermPattern::Variable(v) => binding.get(v.as_str()).cloned(),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

fn blank_key(label: &str) -> String {
    format!("_:{}", label)
}

fn unify_triple(
    pattern: &AlgebraTriplePattern,
    triple: &Triple,
    binding: &Binding,
) -> Option<Binding> {
    let mut out = binding.clone();
    unify_term(&pattern.subject, &subject_term(&triple.subject), &mut out)?;
    match &pattern.predicate {
        NamedNodePattern::NamedNode(n) => {
            if n.as_str() != triple.predicate.as_str() {
                return None;
            }
        }
        NamedNodePattern::Variable(v) => {
            let term = Term::NamedNode(triple.predicate.clone().into());
            match out.get(v.as_str()) {
                Some(existing) if existing != &term => return None,
                _ => {
                    out.insert(v.as_str().to_string(), term);
                }
            }
        }
    }
    unify_term(&pattern.object, &object_term(&triple.object), &mut out)?;
    Some(out)
}

fn unify_term(pattern: &TermPattern, actual: &Term, binding: &mut Binding) -> Option<()> {
    let key = match pattern {
        TermPattern::NamedNode(n) => {
            return (Term::NamedNode(n.clone()) == *actual).then_some(());
        }
        TermPattern::Literal(l) => {
            return (Term::Literal(l.clone()) == *actual).then_some(());
        }
        TermPattern::BlankNode(b) => blank_key(b.as_str()),
        TermPattern::Variable(v) => v.as_str().to_string(),
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    match binding.get(&key) {
        Some(existing) if existing != actual => None,
        _ => {
            binding.insert(key, actual.clone());
            Some(())
        }
    }
}

fn subject_term(subject: &RdfSubject) -> Term {
    match subject {
        RdfSubject::NamedNode(n) => Term::NamedNode(n.clone().into()),
        RdfSubject::BlankNode(b) => Term::BlankNode(b.clone().into()),
    }
}

fn object_term(object: &RdfObject) -> Term {
    object.clone().into()
}

fn term_to_object(term: Term) -> RdfObject {
    match term {
        Term::NamedNode(n) => RdfObject::NamedNode(n.into()),
        Term::BlankNode(b) => RdfObject::BlankNode(b.into()),
        Term::Literal(l) => RdfObject::Literal(l.into()),
        #[allow(unreachable_patterns)]
        _ => unreachable!("RDF-star terms are never produced by the store"),
    }
}

fn ground_to_term(term: &GroundTerm) -> Term {
    match term {
        GroundTerm::NamedNode(n) => Term::NamedNode(n.clone()),
        GroundTerm::Literal(l) => Term::Literal(l.clone()),
        #[allow(unreachable_patterns)]
        _ => unreachable!("RDF-star VALUES are rejected at parse level"),
    }
}

// ---- joins -------------------------------------------------------------

fn merge(left: &Binding, right: &Binding) -> Option<Binding> {
    let mut out = left.clone();
    for (key, value) in right {
        match out.get(key) {
            Some(existing) if existing != value => return None,
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    Some(out)
}

fn join(left: &[Binding], right: &[Binding]) -> Vec<Binding> {
    let mut out = Vec::new();
    for l in left {
        for r in right {
            if let Some(merged) = merge(l, r) {
                out.push(merged);
            }
        }
    }
    out
}

fn binding_key(binding: &Binding) -> String {
    let mut key = String::new();
    for (var, term) in binding {
        key.push_str(var);
        key.push('=');
        key.push_str(&term.to_string());
        key.push('\u{1}');
    }
    key
}

// ---- grouping and aggregates ------------------------------------------

fn eval_group(
    rows: Vec<Binding>,
    variables: &[spargebra::term::Variable],
    aggregates: &[(spargebra::term::Variable, AggregateExpression)],
) -> SparqlResult<Vec<Binding>> {
    let mut groups: BTreeMap<String, (Binding, Vec<Binding>)> = BTreeMap::new();
    if variables.is_empty() {
        // An aggregate query without GROUP BY always yields one group,
        // even over an empty solution sequence.
        groups.insert(String::new(), (Binding::new(), rows));
    } else {
        for row in rows {
            let mut key_binding = Binding::new();
            for var in variables {
                if let Some(term) = row.get(var.as_str()) {
                    key_binding.insert(var.as_str().to_string(), term.clone());
                }
            }
            let key = binding_key(&key_binding);
            groups
                .entry(key)
                .or_insert_with(|| (key_binding, Vec::new()))
                .1
                .push(row);
        }
    }

    let mut out = Vec::new();
    for (_, (mut binding, members)) in groups {
        for (var, aggregate) in aggregates {
            if let Some(value) = eval_aggregate(aggregate, &members)? {
                binding.insert(var.as_str().to_string(), value);
            }
        }
        out.push(binding);
    }
    Ok(out)
}

fn eval_aggregate(
    aggregate: &AggregateExpression,
    members: &[Binding],
) -> SparqlResult<Option<Term>> {
    let collect = |expr: &Expression, distinct: bool| -> Vec<Term> {
        let mut values: Vec<Term> = members
            .iter()
            .filter_map(|row| eval_expr(expr, row))
            .collect();
        if distinct {
            let mut seen = FxHashSet::default();
            values.retain(|t| seen.insert(t.to_string()));
        }
        values
    };

    match aggregate {
        AggregateExpression::CountSolutions { .. } => {
            Ok(Some(integer_term(members.len() as i64)))
        }
        AggregateExpression::FunctionCall {
            name,
            expr,
            distinct,
        } => match name {
            AggregateFunction::Count => {
                let count = collect(expr, *distinct).len();
                Ok(Some(integer_term(count as i64)))
            }
            AggregateFunction::Sum => {
                let values = collect(expr, *distinct);
                let mut sum = 0i64;
                let mut float_sum = 0f64;
                let mut all_integers = true;
                for value in &values {
                    match numeric_value(value) {
                        Some(n) => {
                            float_sum += n;
                            if n.fract() == 0.0 && all_integers {
                                sum += n as i64;
                            } else {
                                all_integers = false;
                            }
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some(if all_integers {
                    integer_term(sum)
                } else {
                    double_term(float_sum)
                }))
            }
            AggregateFunction::Avg => {
                let values = collect(expr, *distinct);
                if values.is_empty() {
                    return Ok(None);
                }
                let mut total = 0f64;
                for value in &values {
                    match numeric_value(value) {
                        Some(n) => total += n,
                        None => return Ok(None),
                    }
                }
                Ok(Some(double_term(total / values.len() as f64)))
            }
            AggregateFunction::Min => {
                let mut values = collect(expr, *distinct);
                values.sort_by(|a, b| cmp_terms(a, b));
                Ok(values.into_iter().next())
            }
            AggregateFunction::Max => {
                let mut values = collect(expr, *distinct);
                values.sort_by(|a, b| cmp_terms(a, b));
                Ok(values.into_iter().next_back())
            }
            AggregateFunction::Sample => Ok(collect(expr, *distinct).into_iter().next()),
            AggregateFunction::GroupConcat { separator } => {
                let values = collect(expr, *distinct);
                let sep = separator.as_deref().unwrap_or(" ");
                let joined = values
                    .iter()
                    .map(term_text)
                    .collect::<Vec<_>>()
                    .join(sep);
                Ok(Some(Term::Literal(oxrdf::Literal::new_simple_literal(
                    joined,
                ))))
            }
            AggregateFunction::Custom(name) => Err(SparqlError::Unsupported(format!(
                "custom aggregate {}",
                name
            ))),
        },
    }
}

// ---- expressions -------------------------------------------------------

fn eval_expr(expr: &Expression, binding: &Binding) -> Option<Term> {
    match expr {
        Expression::NamedNode(n) => Some(Term::NamedNode(n.clone())),
        Expression::Literal(l) => Some(Term::Literal(l.clone())),
        Expression::Variable(v) => binding.get(v.as_str()).cloned(),
        Expression::Or(a, b) => {
            let lhs = eval_expr(a, binding).and_then(|t| ebv(&t));
            let rhs = eval_expr(b, binding).and_then(|t| ebv(&t));
            match (lhs, rhs) {
                (Some(true), _) | (_, Some(true)) => Some(boolean_term(true)),
                (Some(false), Some(false)) => Some(boolean_term(false)),
                _ => None,
            }
        }
        Expression::And(a, b) => {
            let lhs = eval_expr(a, binding).and_then(|t| ebv(&t));
            let rhs = eval_expr(b, binding).and_then(|t| ebv(&t));
            match (lhs, rhs) {
                (Some(false), _) | (_, Some(false)) => Some(boolean_term(false)),
                (Some(true), Some(true)) => Some(boolean_term(true)),
                _ => None,
            }
        }
        Expression::Not(inner) => {
            let value = eval_expr(inner, binding).and_then(|t| ebv(&t))?;
            Some(boolean_term(!value))
        }
        Expression::Equal(a, b) | Expression::SameTerm(a, b) => {
            let lhs = eval_expr(a, binding)?;
            let rhs = eval_expr(b, binding)?;
            Some(boolean_term(terms_equal(&lhs, &rhs)))
        }
        Expression::Greater(a, b) => compare(a, b, binding, |o| o == Ordering::Greater),
        Expression::GreaterOrEqual(a, b) => {
            compare(a, b, binding, |o| o != Ordering::Less)
        }
        Expression::Less(a, b) => compare(a, b, binding, |o| o == Ordering::Less),
        Expression::LessOrEqual(a, b) => {
            compare(a, b, binding, |o| o != Ordering::Greater)
        }
        Expression::In(value, candidates) => {
            let lhs = eval_expr(value, binding)?;
            let found = candidates.iter().any(|c| {
                eval_expr(c, binding)
                    .map(|rhs| terms_equal(&lhs, &rhs))
                    .unwrap_or(false)
            });
            Some(boolean_term(found))
        }
        Expression::Add(a, b) => arithmetic(a, b, binding, |x, y| x + y),
        Expression::Subtract(a, b) => arithmetic(a, b, binding, |x, y| x - y),
        Expression::Multiply(a, b) => arithmetic(a, b, binding, |x, y| x * y),
        Expression::Divide(a, b) => {
            let lhs = numeric_value(&eval_expr(a, binding)?)?;
            let rhs = numeric_value(&eval_expr(b, binding)?)?;
            if rhs == 0.0 {
                None
            } else {
                Some(double_term(lhs / rhs))
            }
        }
        Expression::UnaryPlus(inner) => eval_expr(inner, binding),
        Expression::UnaryMinus(inner) => {
            let n = numeric_value(&eval_expr(inner, binding)?)?;
            Some(double_term(-n))
        }
        Expression::Bound(var) => Some(boolean_term(binding.contains_key(var.as_str()))),
        Expression::If(cond, then, otherwise) => {
            let c = eval_expr(cond, binding).and_then(|t| ebv(&t))?;
            if c {
                eval_expr(then, binding)
            } else {
                eval_expr(otherwise, binding)
            }
        }
        Expression::Coalesce(candidates) => {
            candidates.iter().find_map(|c| eval_expr(c, binding))
        }
        Expression::FunctionCall(function, args) => eval_function(function, args, binding),
        Expression::Exists(_) => None,
    }
}

fn eval_function(function: &Function, args: &[Expression], binding: &Binding) -> Option<Term> {
    let arg = |i: usize| args.get(i).and_then(|a| eval_expr(a, binding));
    match function {
        Function::Str => {
            let term = arg(0)?;
            Some(string_term(&term_text(&term)))
        }
        Function::StrLen => {
            let term = arg(0)?;
            Some(integer_term(term_text(&term).chars().count() as i64))
        }
        Function::UCase => Some(string_term(&term_text(&arg(0)?).to_uppercase())),
        Function::LCase => Some(string_term(&term_text(&arg(0)?).to_lowercase())),
        Function::Contains => {
            let haystack = term_text(&arg(0)?);
            let needle = term_text(&arg(1)?);
            Some(boolean_term(haystack.contains(&needle)))
        }
        Function::StrStarts => {
            let text = term_text(&arg(0)?);
            let prefix = term_text(&arg(1)?);
            Some(boolean_term(text.starts_with(&prefix)))
        }
        Function::StrEnds => {
            let text = term_text(&arg(0)?);
            let suffix = term_text(&arg(1)?);
            Some(boolean_term(text.ends_with(&suffix)))
        }
        Function::Concat => {
            let mut out = String::new();
            for a in args {
                out.push_str(&term_text(&eval_expr(a, binding)?));
            }
            Some(string_term(&out))
        }
        Function::Regex => {
            let text = term_text(&arg(0)?);
            let pattern = term_text(&arg(1)?);
            let flags = args.get(2).and_then(|a| eval_expr(a, binding));
            let case_insensitive = flags
                .map(|f| term_text(&f).contains('i'))
                .unwrap_or(false);
            let regex = RegexBuilder::new(&pattern)
                .case_insensitive(case_insensitive)
                .build()
                .ok()?;
            Some(boolean_term(regex.is_match(&text)))
        }
        Function::IsIri => Some(boolean_term(matches!(arg(0)?, Term::NamedNode(_)))),
        Function::IsBlank => Some(boolean_term(matches!(arg(0)?, Term::BlankNode(_)))),
        Function::IsLiteral => Some(boolean_term(matches!(arg(0)?, Term::Literal(_)))),
        Function::IsNumeric => Some(boolean_term(numeric_value(&arg(0)?).is_some())),
        Function::Datatype => match arg(0)? {
            Term::Literal(l) => Some(Term::NamedNode(l.datatype().into_owned())),
            _ => None,
        },
        Function::Lang => match arg(0)? {
            Term::Literal(l) => Some(string_term(l.language().unwrap_or(""))),
            _ => None,
        },
        _ => None,
    }
}

fn compare(
    a: &Expression,
    b: &Expression,
    binding: &Binding,
    test: fn(Ordering) -> bool,
) -> Option<Term> {
    let lhs = eval_expr(a, binding)?;
    let rhs = eval_expr(b, binding)?;
    Some(boolean_term(test(cmp_terms(&lhs, &rhs))))
}

fn arithmetic(
    a: &Expression,
    b: &Expression,
    binding: &Binding,
    op: fn(f64, f64) -> f64,
) -> Option<Term> {
    let lhs = numeric_value(&eval_expr(a, binding)?)?;
    let rhs = numeric_value(&eval_expr(b, binding)?)?;
    let result = op(lhs, rhs);
    if result.fract() == 0.0 && result.abs() < i64::MAX as f64 {
        Some(integer_term(result as i64))
    } else {
        Some(double_term(result))
    }
}

// ---- term helpers ------------------------------------------------------

fn terms_equal(a: &Term, b: &Term) -> bool {
    if a == b {
        return true;
    }
    match (numeric_value(a), numeric_value(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn numeric_value(term: &Term) -> Option<f64> {
    match term {
        Term::Literal(l) => {
            let dt = l.datatype();
            let dt = dt.as_str();
            if dt.starts_with("http://www.w3.org/2001/XMLSchema#") {
                l.value().parse().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}

/// SPARQL effective boolean value
fn ebv(term: &Term) -> Option<bool> {
    match term {
        Term::Literal(l) => {
            let dt = l.datatype();
            match dt.as_str() {
                "http://www.w3.org/2001/XMLSchema#boolean" => match l.value() {
                    "true" | "1" => Some(true),
                    "false" | "0" => Some(false),
                    _ => None,
                },
                "http://www.w3.org/2001/XMLSchema#string" => Some(!l.value().is_empty()),
                _ => match numeric_value(term) {
                    Some(n) => Some(n != 0.0),
                    None => Some(!l.value().is_empty()),
                },
            }
        }
        _ => None,
    }
}

fn truthy(term: Option<Term>) -> bool {
    term.and_then(|t| ebv(&t)).unwrap_or(false)
}

fn term_text(term: &Term) -> String {
    match term {
        Term::NamedNode(n) => n.as_str().to_string(),
        Term::BlankNode(b) => b.as_str().to_string(),
        Term::Literal(l) => l.value().to_string(),
        #[allow(unreachable_patterns)]
        _ => term.to_string(),
    }
}

fn cmp_terms(a: &Term, b: &Term) -> Ordering {
    match (numeric_value(a), numeric_value(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => match (a, b) {
            (Term::Literal(la), Term::Literal(lb)) => la.value().cmp(lb.value()),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

fn cmp_optional_terms(a: &Option<Term>, b: &Option<Term>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => cmp_terms(x, y),
        // Unbound sorts first, per the SPARQL ordering rules
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn boolean_term(value: bool) -> Term {
    Term::Literal(oxrdf::Literal::new_typed_literal(
        value.to_string(),
        OxNamedNode::new_unchecked("http://www.w3.org/2001/XMLSchema#boolean"),
    ))
}

fn integer_term(value: i64) -> Term {
    Term::Literal(oxrdf::Literal::new_typed_literal(
        value.to_string(),
        OxNamedNode::new_unchecked("http://www.w3.org/2001/XMLSchema#integer"),
    ))
}

fn double_term(value: f64) -> Term {
    Term::Literal(oxrdf::Literal::new_typed_literal(
        value.to_string(),
        OxNamedNode::new_unchecked("http://www.w3.org/2001/XMLSchema#double"),
    ))
}

fn string_term(value: &str) -> Term {
    Term::Literal(oxrdf::Literal::new_simple_literal(value))
}

/// Instantiate a CONSTRUCT template against a solution sequence.
pub fn instantiate_template(
    template: &[AlgebraTriplePattern],
    rows: &[Binding],
) -> Vec<Triple> {
    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    for row in rows {
        for pattern in template {
            let Some(subject) = resolve_term(&pattern.subject, row) else {
                continue;
            };
            let subject = match subject {
                Term::NamedNode(n) => RdfSubject::NamedNode(n.into()),
                Term::BlankNode(b) => RdfSubject::BlankNode(b.into()),
                _ => continue,
            };
            let predicate = match &pattern.predicate {
                NamedNodePattern::NamedNode(n) => NamedNode::from(n.clone()),
                NamedNodePattern::Variable(v) => match row.get(v.as_str()) {
                    Some(Term::NamedNode(n)) => NamedNode::from(n.clone()),
                    _ => continue,
                },
            };
            let Some(object) = resolve_term(&pattern.object, row) else {
                continue;
            };
            let triple = Triple::new(subject, predicate, term_to_object(object));
            if seen.insert(triple.clone()) {
                out.push(triple);
            }
        }
    }
    out
}
