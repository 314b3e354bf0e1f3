//! Multi-step driver for a single user request.

use anyhow::Result;
use tracing::{info, instrument};

use crate::io::completion::CompletionClient;
use crate::io::console::Console;
use crate::session::Session;
use crate::step::{StepOutcome, run_step};

/// Reason why `run_request` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStop {
    /// The model reported the request complete.
    Completed,
    /// The request used every step it was allowed.
    StepBudgetExhausted { max_steps: u32 },
}

/// Summary of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOutcome {
    pub steps: u32,
    pub stop: RequestStop,
}

/// Run steps for `request` until the model reports completion or the step
/// budget runs out.
///
/// Conversation compaction happens after every step and once more when the
/// request ends. Stops immediately on a completion-service error.
#[instrument(skip_all, fields(max_steps = session.limits.max_steps))]
pub fn run_request<C: CompletionClient, K: Console, F: FnMut(&StepOutcome)>(
    session: &mut Session<C, K>,
    request: &str,
    mut on_step: F,
) -> Result<RequestOutcome> {
    session.begin_request(request);
    let max_steps = session.limits.max_steps;

    let mut steps = 0u32;
    let mut stop = RequestStop::StepBudgetExhausted { max_steps };
    for step in 1..=max_steps {
        let outcome = run_step(session, step);
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                session.compact_if_needed();
                return Err(err);
            }
        };
        steps = step;
        on_step(&outcome);
        session.compact_if_needed();
        if outcome.completes_request() {
            stop = RequestStop::Completed;
            break;
        }
    }

    session.compact_if_needed();
    info!(steps, ?stop, "request finished");
    Ok(RequestOutcome { steps, stop })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AgentConfig;
    use crate::io::config::CoderConfig;
    use crate::test_support::{
        ScriptedCompletion, ScriptedConsole, session_in, session_with, workspace,
    };

    #[test]
    fn request_stops_when_model_reports_completion() {
        let temp = workspace();
        let mut session = session_in(
            temp.path(),
            ScriptedCompletion::new(vec![
                "tool: list_files({'path': '.'})",
                "The project is ready.",
            ]),
            ScriptedConsole::new(Vec::<&str>::new()),
            AgentConfig::default(),
        );
        let mut seen = Vec::new();
        let outcome =
            run_request(&mut session, "show me the files", |s| seen.push(s.step)).expect("run");
        assert_eq!(outcome.stop, RequestStop::Completed);
        assert_eq!(outcome.steps, 2);
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn request_stops_at_step_budget() {
        let temp = workspace();
        let mut config = CoderConfig::default();
        config.agent.max_steps = 3;
        let mut session = session_with(
            temp.path(),
            &config,
            ScriptedCompletion::new(vec!["thinking", "thinking", "thinking", "unused"]),
            ScriptedConsole::new(Vec::<&str>::new()),
            AgentConfig::default(),
        );
        let outcome = run_request(&mut session, "x", |_| {}).expect("run");
        assert_eq!(
            outcome,
            RequestOutcome {
                steps: 3,
                stop: RequestStop::StepBudgetExhausted { max_steps: 3 },
            }
        );
    }

    #[test]
    fn long_requests_keep_the_conversation_bounded() {
        let temp = workspace();
        let mut config = CoderConfig::default();
        config.agent.max_steps = 30;
        let mut session = session_with(
            temp.path(),
            &config,
            ScriptedCompletion::new(vec!["still thinking"; 30]),
            ScriptedConsole::new(Vec::<&str>::new()),
            AgentConfig::default(),
        );
        run_request(&mut session, "x", |_| {}).expect("run");
        assert!(session.conversation().len() <= config.agent.max_turns);
    }

    #[test]
    fn completion_errors_propagate() {
        let temp = workspace();
        let mut session = session_in(
            temp.path(),
            ScriptedCompletion::new(Vec::<&str>::new()),
            ScriptedConsole::new(Vec::<&str>::new()),
            AgentConfig::default(),
        );
        assert!(run_request(&mut session, "x", |_| {}).is_err());
    }
}
