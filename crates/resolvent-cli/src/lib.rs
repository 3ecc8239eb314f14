//! Resolvent CLI support: program loading and query runs.

pub mod program;

use anyhow::{Context, Result};
use program::{render_answer, render_explanation, LoadedProgram};
use resolvent_graph::GraphStore;
use resolvent_logic::ConceptMap;
use resolvent_reasoner::{AnswerStream, Reasoner, ReasonerConfig, ResolutionSummary};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Reasoner configuration from an optional JSON file.
pub fn load_config(path: Option<&Path>) -> Result<ReasonerConfig> {
    let Some(path) = path else {
        return Ok(ReasonerConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

/// Outcome of running a program's query.
#[derive(Debug)]
pub struct RunReport {
    /// Rendered answers, in arrival order.
    pub answers: Vec<String>,
    /// `None` when the run stopped at `limit` before exhaustion.
    pub summary: Option<ResolutionSummary>,
    /// Per answer, the rule applications it rests on, premises indented
    /// under the fact they support. Empty unless the config explains.
    pub derivations: Vec<Vec<String>>,
}

/// Resolve the program's query, stopping after `limit` answers if given.
/// `on_answer` sees each rendered answer as it arrives.
pub async fn run_program(
    loaded: &LoadedProgram,
    config: ReasonerConfig,
    limit: Option<usize>,
    mut on_answer: impl FnMut(&str),
) -> Result<RunReport> {
    let explain = config.explain;
    let reasoner = Reasoner::new(loaded.store.clone(), loaded.rules.clone(), config)?;
    let mut stream = reasoner.resolve(loaded.query.clone())?;
    let mut answers = Vec::new();
    let mut derivations = Vec::new();
    while limit.map_or(true, |limit| answers.len() < limit) {
        let Some(answer) = stream.next().await else {
            break;
        };
        let answer = answer.context("resolution failed")?;
        let rendered = render_answer(&loaded.store, &answer);
        on_answer(&rendered);
        answers.push(rendered);
        if explain {
            derivations.push(derivation(&stream, &loaded.store, &answer));
        }
    }
    Ok(RunReport {
        answers,
        summary: stream.summary().cloned(),
        derivations,
    })
}

/// Depth-first walk from the answer's facts through the premises of each
/// explanation. Every explanation appears once.
fn derivation(stream: &AnswerStream, store: &GraphStore, answer: &ConceptMap) -> Vec<String> {
    let mut lines = Vec::new();
    let mut seen = HashSet::new();
    let mut pending: Vec<_> = stream
        .explain_answer(answer)
        .into_iter()
        .rev()
        .map(|explanation| (0, explanation))
        .collect();
    while let Some((depth, explanation)) = pending.pop() {
        if !seen.insert(explanation.clone()) {
            continue;
        }
        lines.push(format!("{}{}", "  ".repeat(depth), render_explanation(store, &explanation)));
        for premise in explanation.premises.iter().rev() {
            pending.extend(
                stream
                    .explain(premise)
                    .into_iter()
                    .rev()
                    .map(|support| (depth + 1, support)),
            );
        }
    }
    lines
}
