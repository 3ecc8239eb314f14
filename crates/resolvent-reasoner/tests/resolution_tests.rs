use resolvent_graph::GraphStore;
use resolvent_logic::{Atom, ConceptMap, Conjunction, Disjunction, Fact, Rule, Term, Variable};
use resolvent_reasoner::{
    Cycle, ProgressPredicate, Reasoner, ReasonerConfig, ReasonerError, ResolutionSummary,
};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(20), future)
        .await
        .expect("resolution did not finish in time")
}

/// `$name` is a variable, anything else a concept name.
fn atom(store: &GraphStore, predicate: &str, terms: &[&str]) -> Atom {
    let terms = terms
        .iter()
        .map(|term| match term.strip_prefix('$') {
            Some(variable) => Term::var(variable),
            None => Term::Concept(store.concept(term)),
        })
        .collect();
    Atom::new(predicate, terms)
}

fn query(atoms: Vec<Atom>) -> Conjunction {
    Conjunction::new(atoms)
}

fn names(store: &GraphStore, answers: &[ConceptMap], variable: &str) -> Vec<String> {
    let variable = Variable::new(variable);
    answers
        .iter()
        .map(|answer| {
            answer
                .get(&variable)
                .and_then(|concept| store.name_of(concept))
                .unwrap_or_default()
        })
        .collect()
}

/// `path` as the transitive closure of `edge`.
fn path_rules(store: &GraphStore) -> anyhow::Result<Vec<Rule>> {
    Ok(vec![
        Rule::new(
            "path-base",
            query(vec![atom(store, "edge", &["$x", "$y"])]),
            atom(store, "path", &["$x", "$y"]),
        )?,
        Rule::new(
            "path-step",
            query(vec![
                atom(store, "edge", &["$x", "$y"]),
                atom(store, "path", &["$y", "$z"]),
            ]),
            atom(store, "path", &["$x", "$z"]),
        )?,
    ])
}

fn edges(store: &GraphStore, pairs: &[(&str, &str)]) -> anyhow::Result<()> {
    for (from, to) in pairs {
        store.insert_named("edge", &[from, to])?;
    }
    Ok(())
}

async fn resolve_with_summary(
    reasoner: &Reasoner,
    conjunction: Conjunction,
) -> anyhow::Result<(Vec<ConceptMap>, ResolutionSummary)> {
    let mut stream = reasoner.resolve(conjunction)?;
    let answers = within(stream.collect()).await?;
    let summary = stream
        .summary()
        .cloned()
        .expect("exhausted stream has a summary");
    Ok((answers, summary))
}

// ============================================================================
// Stored facts only
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stored_answers_are_deduplicated_in_order() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    for name in ["a", "b", "a"] {
        store.insert_named("P", &[name])?;
    }
    let reasoner = Reasoner::new(store.clone(), Vec::new(), ReasonerConfig::default())?;

    let (answers, summary) =
        resolve_with_summary(&reasoner, query(vec![atom(&store, "P", &["$x"])])).await?;
    assert_eq!(names(&store, &answers, "x"), vec!["a", "b"]);
    assert_eq!(summary.answers, 2);
    assert_eq!(summary.iterations, 1);
    assert_eq!(summary.blocked_resolvers, 0);
    assert_eq!(summary.last_productive_iteration, Some(1));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_join_over_stored_facts() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    edges(&store, &[("a", "b"), ("b", "c"), ("b", "d"), ("c", "e")])?;
    let reasoner = Reasoner::new(store.clone(), Vec::new(), ReasonerConfig::default())?;

    let answers = within(reasoner.resolve_all(query(vec![
        atom(&store, "edge", &["$x", "$y"]),
        atom(&store, "edge", &["$y", "$z"]),
    ])))
    .await?;
    let mut pairs: Vec<(String, String)> = names(&store, &answers, "x")
        .into_iter()
        .zip(names(&store, &answers, "z"))
        .collect();
    pairs.sort();
    assert_eq!(
        pairs,
        vec![
            ("a".to_string(), "c".to_string()),
            ("a".to_string(), "d".to_string()),
            ("b".to_string(), "e".to_string()),
        ]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_empty_query_has_one_empty_answer() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    let reasoner = Reasoner::new(store, Vec::new(), ReasonerConfig::default())?;
    let answers = within(reasoner.resolve_all(query(Vec::new()))).await?;
    assert_eq!(answers, vec![ConceptMap::new()]);
    Ok(())
}

// ============================================================================
// Rules
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rule_conclusions_are_materialised() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    store.insert_named("parent", &["ann", "bob"])?;
    store.insert_named("parent", &["bob", "cid"])?;
    let rules = vec![Rule::new(
        "grandparent",
        query(vec![
            atom(&store, "parent", &["$x", "$y"]),
            atom(&store, "parent", &["$y", "$z"]),
        ]),
        atom(&store, "grandparent", &["$x", "$z"]),
    )?];
    let reasoner = Reasoner::new(store.clone(), rules, ReasonerConfig::default())?;

    let answers = within(reasoner.resolve_all(query(vec![atom(
        &store,
        "grandparent",
        &["$g", "$c"],
    )])))
    .await?;
    assert_eq!(names(&store, &answers, "g"), vec!["ann"]);
    assert_eq!(names(&store, &answers, "c"), vec!["cid"]);
    let inferred = [store.concept("ann"), store.concept("cid")];
    assert!(store.contains("grandparent", &inferred));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rule_conclusions_keep_stored_order() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    for name in ["a", "b"] {
        store.insert_named("P", &[name])?;
    }
    let rules = vec![Rule::new(
        "r-from-p",
        query(vec![atom(&store, "P", &["$x"])]),
        atom(&store, "R", &["$x"]),
    )?];
    let reasoner = Reasoner::new(store.clone(), rules, ReasonerConfig::default())?;

    let answers = within(reasoner.resolve_all(query(vec![atom(&store, "R", &["$x"])]))).await?;
    assert_eq!(names(&store, &answers, "x"), vec!["a", "b"]);
    assert!(store.contains("R", &[store.concept("b")]));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_recursion_without_base_case_terminates_empty() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    let rules = vec![
        Rule::new(
            "a-from-b",
            query(vec![atom(&store, "B", &["$x"])]),
            atom(&store, "A", &["$x"]),
        )?,
        Rule::new(
            "b-from-a",
            query(vec![atom(&store, "A", &["$x"])]),
            atom(&store, "B", &["$x"]),
        )?,
    ];
    let reasoner = Reasoner::new(store.clone(), rules, ReasonerConfig::default())?;

    let (answers, summary) =
        resolve_with_summary(&reasoner, query(vec![atom(&store, "A", &["$x"])])).await?;
    assert!(answers.is_empty());
    assert_eq!(summary.answers, 0);
    assert_eq!(summary.blocked_resolvers, 0);
    assert_eq!(summary.last_productive_iteration, None);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transitive_closure_over_cyclic_graph() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    edges(&store, &[("a", "b"), ("b", "c"), ("c", "a"), ("c", "d"), ("e", "a")])?;
    let rules = path_rules(&store)?;
    let reasoner = Reasoner::new(store.clone(), rules, ReasonerConfig::default())?;

    let (answers, summary) =
        resolve_with_summary(&reasoner, query(vec![atom(&store, "path", &["a", "$z"])])).await?;
    let reached: BTreeSet<String> = names(&store, &answers, "z").into_iter().collect();
    let expected: BTreeSet<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
    assert_eq!(reached, expected);
    assert_eq!(answers.len(), 4, "answers are delivered once");
    assert_eq!(summary.blocked_resolvers, 0);
    let last = summary
        .last_productive_iteration
        .expect("closure has answers");
    assert_eq!(summary.iterations, last + 1, "one empty iteration confirms the fixpoint");
    assert!(!reached.contains("e"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fully_bound_query_is_an_existence_check() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    edges(&store, &[("a", "b"), ("b", "c"), ("c", "a")])?;
    let rules = path_rules(&store)?;
    let reasoner = Reasoner::new(store.clone(), rules, ReasonerConfig::default())?;

    let found = within(reasoner.resolve_all(query(vec![atom(&store, "path", &["a", "c"])]))).await?;
    assert_eq!(found, vec![ConceptMap::new()]);

    store.insert_named("edge", &["x", "y"])?;
    let missing = within(reasoner.resolve_all(query(vec![atom(&store, "path", &["a", "x"])]))).await?;
    assert!(missing.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_join_over_recursive_predicate_matches_naive_closure() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    let graph = [("a", "b"), ("b", "c"), ("c", "b"), ("c", "d")];
    edges(&store, &graph)?;
    let rules = path_rules(&store)?;
    let reasoner = Reasoner::new(store.clone(), rules, ReasonerConfig::default())?;

    let answers = within(reasoner.resolve_all(query(vec![
        atom(&store, "path", &["$x", "$y"]),
        atom(&store, "path", &["$y", "$z"]),
    ])))
    .await?;
    let found: BTreeSet<(String, String, String)> = names(&store, &answers, "x")
        .into_iter()
        .zip(names(&store, &answers, "y"))
        .zip(names(&store, &answers, "z"))
        .map(|((x, y), z)| (x, y, z))
        .collect();

    // Naive closure for comparison.
    let mut closure: BTreeSet<(String, String)> = graph
        .iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();
    loop {
        let extended: BTreeSet<(String, String)> = closure
            .iter()
            .flat_map(|(x, y)| {
                closure
                    .iter()
                    .filter(move |(y2, _)| y2 == y)
                    .map(move |(_, z)| (x.clone(), z.clone()))
            })
            .collect();
        let before = closure.len();
        closure.extend(extended);
        if closure.len() == before {
            break;
        }
    }
    let expected: BTreeSet<(String, String, String)> = closure
        .iter()
        .flat_map(|(x, y)| {
            closure
                .iter()
                .filter(move |(y2, _)| y2 == y)
                .map(move |(_, z)| (x.clone(), y.clone(), z.clone()))
        })
        .collect();
    assert_eq!(found, expected);
    assert_eq!(answers.len(), expected.len());
    Ok(())
}

// ============================================================================
// Negation, disjunction and explanations
// ============================================================================

fn nodes(store: &GraphStore, names: &[&str]) -> anyhow::Result<()> {
    for name in names {
        store.insert_named("node", &[name])?;
    }
    Ok(())
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_negation_keeps_bindings_without_a_match() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    nodes(&store, &["a", "b", "c"])?;
    edges(&store, &[("a", "b")])?;
    let reasoner = Reasoner::new(store.clone(), Vec::new(), ReasonerConfig::default())?;

    let sinks = query(vec![atom(&store, "node", &["$x"])])
        .with_negation(query(vec![atom(&store, "edge", &["$x", "$y"])]));
    let answers = within(reasoner.resolve_all(sinks)).await?;
    assert_eq!(sorted(names(&store, &answers, "x")), vec!["b", "c"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rule_negating_a_recursive_predicate() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    nodes(&store, &["a", "b", "c", "d"])?;
    edges(&store, &[("a", "b"), ("b", "a"), ("c", "d")])?;
    let mut rules = path_rules(&store)?;
    rules.push(Rule::new(
        "unreachable",
        query(vec![atom(&store, "node", &["$x"])])
            .with_negation(query(vec![atom(&store, "path", &["a", "$x"])])),
        atom(&store, "unreachable", &["$x"]),
    )?);
    let reasoner = Reasoner::new(store.clone(), rules, ReasonerConfig::default())?;

    let answers = within(reasoner.resolve_all(query(vec![atom(&store, "unreachable", &["$x"])]))).await?;
    assert_eq!(sorted(names(&store, &answers, "x")), vec!["c", "d"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_negation_through_recursion_is_refused() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    let rules = vec![Rule::new(
        "win",
        query(vec![atom(&store, "move", &["$x", "$y"])])
            .with_negation(query(vec![atom(&store, "win", &["$y"])])),
        atom(&store, "win", &["$x"]),
    )?];
    let outcome = Reasoner::new(store, rules, ReasonerConfig::default());
    assert!(matches!(outcome, Err(ReasonerError::InvalidRules(_))));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disjunction_answers_once_per_shared_binding() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    nodes(&store, &["a", "b", "c", "d"])?;
    edges(&store, &[("a", "b"), ("a", "c")])?;
    for name in ["a", "d"] {
        store.insert_named("mark", &[name])?;
    }
    let reasoner = Reasoner::new(store.clone(), Vec::new(), ReasonerConfig::default())?;

    let either = Disjunction::new(vec![
        query(vec![atom(&store, "edge", &["$x", "$y"])]),
        query(vec![atom(&store, "mark", &["$x"])]),
    ])?;
    let conjunction = query(vec![atom(&store, "node", &["$x"])]).with_disjunction(either);
    let answers = within(reasoner.resolve_all(conjunction)).await?;
    assert_eq!(sorted(names(&store, &answers, "x")), vec!["a", "d"]);
    assert!(answers.iter().all(|answer| answer.len() == 1), "$y is branch-local");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_explanations_name_rule_and_premises() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    edges(&store, &[("a", "b"), ("b", "c")])?;
    let rules = path_rules(&store)?;
    let config = ReasonerConfig::default().with_explain(true);
    let reasoner = Reasoner::new(store.clone(), rules, config)?;

    let mut stream = reasoner.resolve(query(vec![atom(&store, "path", &["a", "$z"])]))?;
    let answers = within(stream.collect()).await?;
    let far = answers
        .iter()
        .find(|answer| {
            answer
                .get(&Variable::new("z"))
                .and_then(|concept| store.name_of(concept))
                .as_deref()
                == Some("c")
        })
        .expect("path(a, c) is derived");

    let explained = stream.explain_answer(far);
    assert_eq!(explained.len(), 1);
    assert_eq!(explained[0].rule, "path-step");
    let (a, b, c) = (store.concept("a"), store.concept("b"), store.concept("c"));
    assert_eq!(
        explained[0].premises,
        vec![Fact::new("edge", vec![a, b]), Fact::new("path", vec![b, c])]
    );

    let base = stream.explain(&Fact::new("path", vec![b, c]));
    assert_eq!(base.len(), 1);
    assert_eq!(base[0].rule, "path-base");
    assert!(stream.explain(&Fact::new("edge", vec![a, b])).is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_explanations_are_off_by_default() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    edges(&store, &[("a", "b")])?;
    let reasoner = Reasoner::new(store.clone(), path_rules(&store)?, ReasonerConfig::default())?;

    let mut stream = reasoner.resolve(query(vec![atom(&store, "path", &["a", "$z"])]))?;
    let answers = within(stream.collect()).await?;
    assert_eq!(answers.len(), 1);
    assert!(stream.explanations().is_empty());
    Ok(())
}

// ============================================================================
// Failure and cancellation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_closed_store_surfaces_resource_closed() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    store.insert_named("P", &["a"])?;
    let reasoner = Reasoner::new(store.clone(), Vec::new(), ReasonerConfig::default())?;
    store.close();

    let mut stream = reasoner.resolve(query(vec![atom(&store, "P", &["$x"])]))?;
    let first = within(stream.next()).await;
    assert!(matches!(first, Some(Err(ReasonerError::ResourceClosed))));
    assert!(within(stream.next()).await.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dropping_a_stream_leaves_the_reasoner_usable() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    let chain: Vec<String> = (0..40).map(|i| format!("n{i}")).collect();
    for pair in chain.windows(2) {
        store.insert_named("edge", &[&pair[0], &pair[1]])?;
    }
    let rules = path_rules(&store)?;
    let reasoner = Reasoner::new(store.clone(), rules, ReasonerConfig::default())?;

    let mut stream = reasoner.resolve(query(vec![atom(&store, "path", &["n0", "$z"])]))?;
    let first = within(stream.next()).await;
    assert!(matches!(first, Some(Ok(_))));
    drop(stream);

    let answers = within(reasoner.resolve_all(query(vec![atom(&store, "path", &["n30", "$z"])]))).await?;
    assert_eq!(answers.len(), 9);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_iteration_limit_terminates_resolution() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    edges(&store, &[("a", "b"), ("b", "c"), ("c", "a")])?;
    let rules = path_rules(&store)?;
    let config = ReasonerConfig::default().with_max_iterations(1);
    let reasoner = Reasoner::new(store.clone(), rules, config)?;

    let outcome = within(reasoner.resolve_all(query(vec![atom(&store, "path", &["a", "$z"])]))).await;
    assert_eq!(outcome, Err(ReasonerError::IterationLimit(1)));
    Ok(())
}

#[derive(Debug)]
struct ExplodingProgress;

impl ProgressPredicate for ExplodingProgress {
    fn made_progress(&self, _cycle: &Cycle, _answers: usize) -> bool {
        panic!("progress check exploded")
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_handler_fails_the_stream() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    edges(&store, &[("a", "b"), ("b", "a")])?;
    let rules = path_rules(&store)?;
    let reasoner = Reasoner::new(store.clone(), rules, ReasonerConfig::default())?
        .with_progress_predicate(ExplodingProgress);

    let outcome = within(reasoner.resolve_all(query(vec![atom(&store, "path", &["a", "$z"])]))).await;
    match outcome {
        Err(ReasonerError::IllegalState(message)) => {
            assert!(message.contains("panicked"), "{message}");
            assert!(message.contains("progress check exploded"), "{message}");
        }
        other => panic!("expected an illegal state, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_reasoner_needs_a_runtime() {
    let store = Arc::new(GraphStore::new());
    let outcome = Reasoner::new(store, Vec::new(), ReasonerConfig::default());
    assert!(matches!(outcome, Err(ReasonerError::NoRuntime)));
}

// ============================================================================
// Pluggable progress
// ============================================================================

#[derive(Debug, Default)]
struct CountingProgress {
    calls: Arc<AtomicUsize>,
}

impl ProgressPredicate for CountingProgress {
    fn made_progress(&self, cycle: &Cycle, answers: usize) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        cycle.seen() < answers
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_progress_predicate_is_consulted_for_cycles() -> anyhow::Result<()> {
    let store = Arc::new(GraphStore::new());
    edges(&store, &[("a", "b"), ("b", "a")])?;
    let rules = path_rules(&store)?;
    let calls = Arc::new(AtomicUsize::new(0));
    let reasoner = Reasoner::new(store.clone(), rules, ReasonerConfig::default())?
        .with_progress_predicate(CountingProgress {
            calls: calls.clone(),
        });

    let answers = within(reasoner.resolve_all(query(vec![atom(&store, "path", &["a", "$z"])]))).await?;
    let reached: BTreeSet<String> = names(&store, &answers, "z").into_iter().collect();
    assert_eq!(reached, ["a", "b"].iter().map(|s| s.to_string()).collect());
    assert!(calls.load(Ordering::SeqCst) > 0);
    Ok(())
}

// ============================================================================
// Tracing
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_trace_pairs_every_request_with_one_response() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(GraphStore::new());
    edges(&store, &[("a", "b"), ("b", "c"), ("c", "a")])?;
    let rules = path_rules(&store)?;
    let config = ReasonerConfig::default().with_trace_dir(dir.path());
    let reasoner = Reasoner::new(store.clone(), rules, config)?;

    let (_, first) =
        resolve_with_summary(&reasoner, query(vec![atom(&store, "path", &["a", "$z"])])).await?;
    let (_, second) =
        resolve_with_summary(&reasoner, query(vec![atom(&store, "edge", &["$x", "$y"])])).await?;
    assert_eq!(first.trace, Some(dir.path().join("resolution-0.dot")));
    assert_eq!(second.trace, Some(dir.path().join("resolution-1.dot")));

    let dot = std::fs::read_to_string(dir.path().join("resolution-0.dot"))?;
    let count = |colour: &str| dot.matches(&format!("color=\"{colour}\"")).count();
    assert!(count("blue") > 0);
    assert_eq!(count("blue"), count("green") + count("red") + count("orange"));
    assert!(dot.contains("\"Root\" -> \"Concludable(path(#"));
    assert!(dot.contains("{$_0=#"), "edges render bound values");
    Ok(())
}
