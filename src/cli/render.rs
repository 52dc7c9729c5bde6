//! Terminal rendering of loop events and states.

use colored::*;

use ralph_loop::domain::{FinalResult, LoopEvent, LoopState, LoopStatus, ReviewDecision};

fn status_label(status: LoopStatus) -> ColoredString {
    match status {
        LoopStatus::Idle => status.as_str().normal(),
        LoopStatus::WorkerRunning => status.as_str().cyan(),
        LoopStatus::ReviewerRunning => status.as_str().blue(),
        LoopStatus::Paused => status.as_str().yellow(),
        LoopStatus::Completed => status.as_str().green(),
        LoopStatus::Failed => status.as_str().red(),
    }
}

fn decision_label(decision: ReviewDecision) -> ColoredString {
    match decision {
        ReviewDecision::Approve => "approve".green().bold(),
        ReviewDecision::Reject => "reject".yellow(),
        ReviewDecision::CriticalFailure => "critical_failure".red().bold(),
    }
}

fn result_label(result: Option<FinalResult>) -> ColoredString {
    match result {
        Some(FinalResult::Approved) => "approved".green().bold(),
        Some(FinalResult::MaxTurnsReached) => "max_turns_reached".yellow(),
        Some(FinalResult::CriticalFailure) => "critical_failure".red().bold(),
        None => "none".dimmed(),
    }
}

/// One line per lifecycle event; output chunks only when verbose.
pub fn render_event(event: &LoopEvent, verbose: bool) -> Option<String> {
    match event {
        LoopEvent::Status { status, .. } => Some(format!("{} {}", "status".bold(), status_label(*status))),
        LoopEvent::Iteration { .. } => None,
        LoopEvent::Output { source, content, .. } => {
            verbose.then(|| format!("{} {}", format!("[{:?}]", source).dimmed(), content.trim_end()))
        }
        LoopEvent::WorkerComplete { summary, .. } => Some(format!(
            "{} iteration {} ({} files modified)",
            "worker".cyan().bold(),
            summary.iteration_number,
            summary.files_modified.len()
        )),
        LoopEvent::ReviewerComplete { feedback, .. } => Some(format!(
            "{} iteration {}: {} {}",
            "reviewer".blue().bold(),
            feedback.iteration_number,
            decision_label(feedback.decision),
            feedback.feedback
        )),
        LoopEvent::Complete {
            final_status,
            final_result,
            ..
        } => Some(format!(
            "{} {} (result: {})",
            "complete".bold(),
            status_label(*final_status),
            result_label(*final_result)
        )),
        LoopEvent::Error { error, .. } => Some(format!("{} {}", "error".red().bold(), error)),
    }
}

/// Single-line summary used by `list`.
pub fn render_summary(state: &LoopState) -> String {
    let started = state
        .start_time
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}  {:<17}  {}/{}  {:<17}  {}  {}",
        state.task_id.bold(),
        status_label(state.status),
        state.current_iteration,
        state.max_turns,
        result_label(state.final_result),
        started.dimmed(),
        state.task_description
    )
}

/// Multi-line detail used by `show`.
pub fn render_detail(state: &LoopState) -> String {
    let mut out = String::new();
    out.push_str(&format!("{} {}\n", "Task:".bold(), state.task_id));
    out.push_str(&format!("{} {}\n", "Project:".bold(), state.project_id));
    out.push_str(&format!("{} {}\n", "Description:".bold(), state.task_description));
    out.push_str(&format!("{} {}\n", "Status:".bold(), status_label(state.status)));
    out.push_str(&format!(
        "{} {}/{}\n",
        "Iteration:".bold(),
        state.current_iteration,
        state.max_turns
    ));
    out.push_str(&format!("{} {}\n", "Final result:".bold(), result_label(state.final_result)));
    out.push_str(&format!(
        "{} worker={} reviewer={}\n",
        "Models:".bold(),
        state.worker_model,
        state.reviewer_model
    ));
    if let Some(error) = &state.error {
        out.push_str(&format!("{} {}\n", "Error:".bold(), error.red()));
    }
    if let Some(warning) = &state.persistence_warning {
        out.push_str(&format!("{} {}\n", "Warning:".bold(), warning.yellow()));
    }

    for iteration in &state.iterations {
        out.push_str(&format!("\n{} {}\n", "Iteration".bold(), iteration.number));
        if !iteration.worker_output.files_modified.is_empty() {
            out.push_str(&format!(
                "  files: {}\n",
                iteration.worker_output.files_modified.join(", ")
            ));
        }
        out.push_str(&format!("  result: {}\n", iteration.worker_output.result.trim()));
        match iteration.decision {
            Some(decision) => out.push_str(&format!(
                "  review: {} {}\n",
                decision_label(decision),
                iteration.reviewer_feedback.as_deref().unwrap_or("")
            )),
            None => out.push_str(&format!("  review: {}\n", "pending".dimmed())),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ralph_loop::domain::{Iteration, LoopSettings, OutputSource, TaskKey, WorkerOutput};

    fn state() -> LoopState {
        LoopState::new(
            "proj",
            "task-1",
            &LoopSettings {
                task_description: "Fix bug".to_string(),
                max_turns: 3,
                worker_model: "w".to_string(),
                reviewer_model: "r".to_string(),
            },
        )
    }

    #[test]
    fn test_output_hidden_unless_verbose() {
        let event = LoopEvent::output(&TaskKey::new("proj", "task-1"), OutputSource::Worker, "hi\n".into());
        assert!(render_event(&event, false).is_none());
        assert!(render_event(&event, true).unwrap().contains("hi"));
    }

    #[test]
    fn test_render_error_event() {
        let line = render_event(&LoopEvent::error(&state(), "boom"), false).unwrap();
        assert!(line.contains("boom"));
    }

    #[test]
    fn test_render_detail_lists_iterations() {
        let mut state = state();
        let mut iteration = Iteration::from_worker(
            1,
            WorkerOutput {
                result: "patched".to_string(),
                files_modified: vec!["a.rs".to_string()],
            },
        );
        iteration.decision = Some(ReviewDecision::Reject);
        iteration.reviewer_feedback = Some("add tests".to_string());
        state.iterations.push(iteration);

        let detail = render_detail(&state);
        assert!(detail.contains("Fix bug"));
        assert!(detail.contains("files: a.rs"));
        assert!(detail.contains("add tests"));
    }

    #[test]
    fn test_render_summary() {
        let summary = render_summary(&state());
        assert!(summary.contains("task-1"));
        assert!(summary.contains("0/3"));
    }
}
