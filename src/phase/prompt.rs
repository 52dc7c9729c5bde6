//! Prompt building for the worker and reviewer agents.

use crate::domain::{Iteration, LoopState};

/// Longest slice of a prior worker result repeated in later prompts
const MAX_RESULT_EXCERPT: usize = 2_000;

/// Prompt for the worker phase of the next iteration.
///
/// Carries every prior iteration so the worker sees the reviewer's feedback.
pub fn build_worker_prompt(state: &LoopState) -> String {
    let mut prompt = format!("## Task\n\n{}\n\n", state.task_description);

    if !state.iterations.is_empty() {
        prompt.push_str("## Previous Iterations\n\n");

        for iteration in &state.iterations {
            prompt.push_str(&format!("### Iteration {}\n", iteration.number));
            prompt.push_str(&format!(
                "**Your result:** {}\n",
                excerpt(&iteration.worker_output.result, MAX_RESULT_EXCERPT)
            ));
            if let Some(decision) = iteration.decision {
                prompt.push_str(&format!("**Reviewer decision:** {}\n", decision));
            }
            if let Some(feedback) = &iteration.reviewer_feedback {
                prompt.push_str(&format!("**Reviewer feedback:** {}\n", feedback));
            }
            prompt.push('\n');
        }

        prompt.push_str("**Address the reviewer's feedback from the previous iteration(s).**\n\n");
    }

    prompt.push_str(&format!(
        "This is iteration {} of at most {}. When you modify a file, print a line `FILE_MODIFIED: <path>`.\n",
        state.next_worker_iteration(),
        state.max_turns
    ));

    prompt
}

/// Prompt asking the reviewer to judge the worker's latest attempt.
pub fn build_reviewer_prompt(state: &LoopState, iteration: &Iteration) -> String {
    let mut prompt = format!("## Task\n\n{}\n\n", state.task_description);

    prompt.push_str(&format!(
        "## Worker Attempt (iteration {} of {})\n\n",
        iteration.number, state.max_turns
    ));
    prompt.push_str("```\n");
    prompt.push_str(&iteration.worker_output.result);
    prompt.push_str("\n```\n\n");

    if !iteration.worker_output.files_modified.is_empty() {
        prompt.push_str("## Files Modified\n\n");
        for file in &iteration.worker_output.files_modified {
            prompt.push_str(&format!("- {}\n", file));
        }
        prompt.push('\n');
    }

    prompt.push_str("## Your Response\n\n");
    prompt.push_str("Review the attempt against the task. Respond with EXACTLY one JSON object:\n");
    prompt.push_str("{\"decision\": \"approve\" | \"reject\" | \"critical_failure\", \"feedback\": \"...\"}\n\n");
    prompt.push_str("- `approve` if the task is fully done\n");
    prompt.push_str("- `reject` with specific, actionable feedback if more work is needed\n");
    prompt.push_str("- `critical_failure` if the attempt is harmful or the task cannot be completed\n");

    prompt
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}... [truncated]", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LoopSettings, ReviewDecision, WorkerOutput};

    fn state() -> LoopState {
        LoopState::new(
            "proj",
            "task-1",
            &LoopSettings {
                task_description: "Fix the login bug".to_string(),
                max_turns: 3,
                worker_model: "w".to_string(),
                reviewer_model: "r".to_string(),
            },
        )
    }

    #[test]
    fn test_first_worker_prompt_has_no_history() {
        let prompt = build_worker_prompt(&state());
        assert!(prompt.starts_with("## Task\n\nFix the login bug"));
        assert!(!prompt.contains("Previous Iterations"));
        assert!(prompt.contains("iteration 1 of at most 3"));
    }

    #[test]
    fn test_worker_prompt_includes_feedback() {
        let mut state = state();
        let mut iteration = Iteration::from_worker(
            1,
            WorkerOutput {
                result: "changed auth.rs".to_string(),
                files_modified: vec![],
            },
        );
        iteration.decision = Some(ReviewDecision::Reject);
        iteration.reviewer_feedback = Some("missing a regression test".to_string());
        state.iterations.push(iteration);

        let prompt = build_worker_prompt(&state);
        assert!(prompt.contains("## Previous Iterations"));
        assert!(prompt.contains("### Iteration 1"));
        assert!(prompt.contains("changed auth.rs"));
        assert!(prompt.contains("**Reviewer decision:** reject"));
        assert!(prompt.contains("missing a regression test"));
        assert!(prompt.contains("iteration 2 of at most 3"));
    }

    #[test]
    fn test_reviewer_prompt() {
        let state = state();
        let iteration = Iteration::from_worker(
            2,
            WorkerOutput {
                result: "patched".to_string(),
                files_modified: vec!["src/auth.rs".to_string()],
            },
        );

        let prompt = build_reviewer_prompt(&state, &iteration);
        assert!(prompt.contains("Fix the login bug"));
        assert!(prompt.contains("iteration 2 of 3"));
        assert!(prompt.contains("patched"));
        assert!(prompt.contains("- src/auth.rs"));
        assert!(prompt.contains("\"decision\""));
    }

    #[test]
    fn test_excerpt_truncates() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("abcdef", 3), "abc... [truncated]");
    }
}
