//! Reviewer phase executor and verdict parsing.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::prompt::build_reviewer_prompt;
use super::{AgentCaller, PhaseOutcome};
use crate::agent::{AgentRequest, AgentRole};
use crate::domain::{LoopState, OutputSource, ReviewDecision};

/// Feedback recorded when the reviewer's reply cannot be understood
pub const UNPARSEABLE_FEEDBACK: &str = "<could not parse reviewer response>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewVerdict {
    pub decision: ReviewDecision,
    pub feedback: String,
}

impl ReviewVerdict {
    /// A malformed reply costs one iteration instead of aborting the loop.
    pub fn unparseable() -> Self {
        Self {
            decision: ReviewDecision::Reject,
            feedback: UNPARSEABLE_FEEDBACK.to_string(),
        }
    }
}

/// Runs the reviewer agent against the newest worker attempt.
#[derive(Clone)]
pub struct ReviewerExecutor {
    caller: AgentCaller,
}

impl ReviewerExecutor {
    pub fn new(caller: AgentCaller) -> Self {
        Self { caller }
    }

    pub async fn execute(&self, state: &LoopState, cancel: &CancellationToken) -> PhaseOutcome<ReviewVerdict> {
        let Some(iteration) = state.last_iteration() else {
            return PhaseOutcome::Failed("Reviewer phase failed: no worker attempt to review".to_string());
        };

        let request = AgentRequest {
            role: AgentRole::Reviewer,
            model: state.reviewer_model.clone(),
            prompt: build_reviewer_prompt(state, iteration),
        };

        log::debug!(
            "{} reviewer phase for iteration {} (model={})",
            state.key(),
            iteration.number,
            state.reviewer_model
        );

        match self.caller.call(&state.key(), OutputSource::Reviewer, request, cancel).await {
            PhaseOutcome::Completed(response) => match parse_review(&response.content) {
                Some(verdict) => PhaseOutcome::Completed(verdict),
                None => {
                    log::warn!("{} could not parse reviewer response; treating as reject", state.key());
                    PhaseOutcome::Completed(ReviewVerdict::unparseable())
                }
            },
            PhaseOutcome::Cancelled => PhaseOutcome::Cancelled,
            PhaseOutcome::Failed(error) => PhaseOutcome::Failed(format!("Reviewer phase failed: {}", error)),
        }
    }
}

/// Parse a reviewer reply.
///
/// Accepts a bare JSON object, a fenced code block holding one, a JSON
/// object embedded in prose, or a `DECISION: <value>` header line.
pub fn parse_review(text: &str) -> Option<ReviewVerdict> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    verdict_from_json(text)
        .or_else(|| fenced_block(text).and_then(verdict_from_json))
        .or_else(|| embedded_object(text).and_then(verdict_from_json))
        .or_else(|| verdict_from_header(text))
}

fn parse_decision(raw: &str) -> Option<ReviewDecision> {
    let normalized = raw
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '*' | '.'))
        .to_lowercase()
        .replace(['-', ' '], "_");
    match normalized.as_str() {
        "approve" | "approved" => Some(ReviewDecision::Approve),
        "reject" | "rejected" => Some(ReviewDecision::Reject),
        "critical_failure" | "critical" => Some(ReviewDecision::CriticalFailure),
        _ => None,
    }
}

fn verdict_from_json(text: &str) -> Option<ReviewVerdict> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    let decision = parse_decision(value.get("decision")?.as_str()?)?;
    let feedback = match value.get("feedback") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    Some(ReviewVerdict { decision, feedback })
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip the info string, e.g. "json"
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

fn embedded_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn verdict_from_header(text: &str) -> Option<ReviewVerdict> {
    let mut lines = text.lines();
    let mut decision = None;
    for line in lines.by_ref() {
        let trimmed = line.trim().trim_start_matches(['#', '*', ' ']);
        if let Some(value) = strip_label(trimmed, "decision:") {
            decision = parse_decision(value);
            break;
        }
    }
    let decision = decision?;

    let rest: Vec<&str> = lines.collect();
    let rest = rest.join("\n");
    let rest = rest.trim();
    let feedback = strip_label(rest, "feedback:").map(str::trim).unwrap_or(rest);

    Some(ReviewVerdict {
        decision,
        feedback: feedback.to_string(),
    })
}

/// Strip a case-insensitive ASCII label from the start of `text`.
fn strip_label<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    let head = text.get(..label.len())?;
    head.eq_ignore_ascii_case(label).then(|| &text[label.len()..])
}
