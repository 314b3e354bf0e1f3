//! One iteration of the control loop: ask the model, act on its reply, feed
//! the observation back.

use std::fmt;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::approval::request_approval;
use crate::core::extract::{Extraction, ParseDiagnostic, extract_invocation};
use crate::core::observation::{failure_records, render_observation, summarize, truncate_chars};
use crate::core::repetition::{CycleKind, action_signature, detect_cycle};
use crate::io::completion::CompletionClient;
use crate::io::console::Console;
use crate::session::Session;

/// Phrases that end a request when the reply carries no invocation.
pub const COMPLETION_PHRASES: &[&str] = &[
    "task complete",
    "finished creating",
    "all files created",
    "project is ready",
    "done.",
];

pub const GENTLE_NUDGE: &str = "Call the tool now. Do not explain.";
pub const SHARP_NUDGE: &str = "STOP EXPLAINING. You must call a tool NOW. Example: tool: write_file({\"path\": \"file.py\", \"content\": \"code\"})";
pub const SPLIT_FILE_GUIDANCE: &str = "ERROR: File content too long to parse. Split into smaller files (under 80 lines each) or simplify the code.";

/// What a step did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    /// The model reported completion without an invocation.
    Completed { reply: String },
    /// The reply looked like a call but could not be used.
    Diagnostic { diagnostic: ParseDiagnostic },
    /// Plain text; `sharp` is set when the stronger nudge was sent.
    NoInvocation { reply: String, sharp: bool },
    /// A repetitive pattern was detected; nothing was executed.
    CycleDetected { capability: String, cycle: CycleKind },
    /// The gate refused the action; nothing was executed.
    Rejected { capability: String, feedback: String },
    /// The capability ran.
    Executed {
        capability: String,
        failed: bool,
        summary: String,
    },
}

/// Result of a single step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Step number within the current request (1-indexed).
    pub step: u32,
    pub event: StepEvent,
}

impl StepOutcome {
    pub fn completes_request(&self) -> bool {
        matches!(self.event, StepEvent::Completed { .. })
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.event {
            StepEvent::Completed { reply } => {
                write!(f, "Agent reports completion: {}", truncate_chars(reply, 200))
            }
            StepEvent::Diagnostic { diagnostic } => write!(f, "  ⚠️ Parse error: {diagnostic}"),
            StepEvent::NoInvocation { reply, .. } => write!(
                f,
                "  ⚠️ No tool call in response\n    Preview: {}",
                truncate_chars(reply, 150)
            ),
            StepEvent::CycleDetected { capability, cycle } => {
                write!(f, "  Calling: {capability}\n  ⚠️ Loop detected: {cycle}")
            }
            StepEvent::Rejected {
                capability,
                feedback,
            } => write!(f, "  Calling: {capability}\n  ✗ Action rejected: {feedback}"),
            StepEvent::Executed {
                capability,
                summary,
                ..
            } => write!(f, "  Calling: {capability}\n  {summary}"),
        }
    }
}

fn reports_completion(reply: &str) -> bool {
    let lowered = reply.to_lowercase();
    COMPLETION_PHRASES.iter().any(|p| lowered.contains(p))
}

/// Execute one step of the current request.
///
/// Only a completion-service failure is an `Err`; every other problem is fed
/// back to the model as a user turn.
#[instrument(skip_all, fields(step = step))]
pub fn run_step<C: CompletionClient, K: Console>(
    session: &mut Session<C, K>,
    step: u32,
) -> Result<StepOutcome> {
    let reply = session
        .completion
        .complete(session.conversation.turns())
        .context("request completion")?;
    debug!(chars = reply.len(), "model replied");

    let names = session.registry.names();
    let invocation = match extract_invocation(&reply, &names) {
        Extraction::Call(invocation) => invocation,
        Extraction::Diagnostic(diagnostic) => {
            return Ok(StepOutcome {
                step,
                event: handle_without_call(session, reply, Some(diagnostic)),
            });
        }
        Extraction::NoCall => {
            return Ok(StepOutcome {
                step,
                event: handle_without_call(session, reply, None),
            });
        }
    };

    session.state.no_invocation_streak = 0;
    session.conversation.push_assistant(reply);
    let capability = invocation.name().to_string();

    session
        .state
        .actions
        .push(action_signature(&capability, invocation.arguments()));
    if let Some(cycle) = detect_cycle(&session.state.actions, &session.state.errors) {
        info!(capability = %capability, ?cycle, "repetition detected");
        session.conversation.push_user(cycle.message());
        session.state.actions.clear();
        session.state.errors.clear();
        return Ok(StepOutcome {
            step,
            event: StepEvent::CycleDetected { capability, cycle },
        });
    }

    let decision = request_approval(
        &invocation,
        &mut session.agent,
        &session.tools.paths,
        &mut session.console,
    );
    if !decision.approved {
        info!(capability = %capability, "action rejected");
        session.conversation.push_user(decision.feedback.clone());
        return Ok(StepOutcome {
            step,
            event: StepEvent::Rejected {
                capability,
                feedback: decision.feedback,
            },
        });
    }

    let result = session.registry.execute(&invocation, &session.tools);
    let failures = failure_records(&capability, &result);
    for failure in &failures {
        session.state.errors.push(failure.clone());
    }
    if capability == "write_file"
        && result.get("action").and_then(|a| a.as_str()) == Some("written")
        && let Some(path) = invocation.str_arg("path")
    {
        session.record_created(path);
    }
    if !failures.is_empty() {
        warn!(capability = %capability, "capability reported failure");
    }

    session.conversation.push_user(render_observation(
        &capability,
        &result,
        session.limits.result_char_limit,
    ));
    Ok(StepOutcome {
        step,
        event: StepEvent::Executed {
            summary: summarize(&capability, &result),
            capability,
            failed: !failures.is_empty(),
        },
    })
}

fn handle_without_call<C: CompletionClient, K: Console>(
    session: &mut Session<C, K>,
    reply: String,
    diagnostic: Option<ParseDiagnostic>,
) -> StepEvent {
    if reports_completion(&reply) {
        session.conversation.push_assistant(reply.clone());
        return StepEvent::Completed { reply };
    }

    session.conversation.push_assistant(reply.clone());
    // Diagnostics count toward the streak but only plain text escalates.
    session.state.no_invocation_streak += 1;
    if let Some(diagnostic) = diagnostic {
        let guidance = match diagnostic {
            ParseDiagnostic::IncompleteCall { .. } => SPLIT_FILE_GUIDANCE.to_string(),
            ref other => format!("ERROR: {other}"),
        };
        debug!(%diagnostic, "parse diagnostic");
        session.conversation.push_user(guidance);
        return StepEvent::Diagnostic { diagnostic };
    }

    let sharp = session.state.no_invocation_streak >= session.limits.nudge_threshold;
    if sharp {
        session.conversation.push_user(SHARP_NUDGE);
        session.state.no_invocation_streak = 0;
    } else {
        session.conversation.push_user(GENTLE_NUDGE);
    }
    StepEvent::NoInvocation { reply, sharp }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::Role;
    use crate::core::types::AgentConfig;
    use crate::test_support::{ScriptedCompletion, ScriptedConsole, session_in, workspace};

    fn last_user(session: &Session<ScriptedCompletion, ScriptedConsole>) -> String {
        let last = session.conversation().last().expect("turn");
        assert_eq!(last.role, Role::User);
        last.content.clone()
    }

    #[test]
    fn plain_text_nudges_then_escalates() {
        let temp = workspace();
        let mut session = session_in(
            temp.path(),
            ScriptedCompletion::new(vec!["Let me think.", "I would write it.", "Hmm."]),
            ScriptedConsole::new(Vec::<&str>::new()),
            AgentConfig::default(),
        );
        session.begin_request("make a.py");

        let first = run_step(&mut session, 1).expect("step");
        let sent = session.completion.requests();
        assert_eq!(sent[0].len(), 2);
        assert_eq!(sent[0][1].content, "make a.py");
        assert!(matches!(first.event, StepEvent::NoInvocation { sharp: false, .. }));
        assert_eq!(last_user(&session), GENTLE_NUDGE);

        let second = run_step(&mut session, 2).expect("step");
        assert!(matches!(second.event, StepEvent::NoInvocation { sharp: true, .. }));
        assert_eq!(last_user(&session), SHARP_NUDGE);

        // Counter reset after the sharp nudge.
        let third = run_step(&mut session, 3).expect("step");
        assert!(matches!(third.event, StepEvent::NoInvocation { sharp: false, .. }));
    }

    #[test]
    fn incomplete_call_gets_split_guidance() {
        let temp = workspace();
        let mut session = session_in(
            temp.path(),
            ScriptedCompletion::new(vec!["tool: write_file({'path': 'a.py', 'content': 'x'"]),
            ScriptedConsole::new(Vec::<&str>::new()),
            AgentConfig::default(),
        );
        session.begin_request("make a.py");
        let outcome = run_step(&mut session, 1).expect("step");
        assert!(matches!(
            outcome.event,
            StepEvent::Diagnostic {
                diagnostic: ParseDiagnostic::IncompleteCall { .. }
            }
        ));
        assert_eq!(last_user(&session), SPLIT_FILE_GUIDANCE);
    }

    #[test]
    fn other_diagnostics_are_fed_back_verbatim() {
        let temp = workspace();
        let mut session = session_in(
            temp.path(),
            ScriptedCompletion::new(vec!["tool: format_disk({'drive': 'c'})"]),
            ScriptedConsole::new(Vec::<&str>::new()),
            AgentConfig::default(),
        );
        session.begin_request("x");
        run_step(&mut session, 1).expect("step");
        assert_eq!(last_user(&session), "ERROR: Unknown tool: format_disk");
    }

    #[test]
    fn diagnostic_counts_toward_the_sharp_nudge() {
        let temp = workspace();
        let mut session = session_in(
            temp.path(),
            ScriptedCompletion::new(vec!["tool: nope({'a': 1})", "I will think about it."]),
            ScriptedConsole::new(Vec::<&str>::new()),
            AgentConfig::default(),
        );
        session.begin_request("x");

        let first = run_step(&mut session, 1).expect("step");
        assert!(matches!(first.event, StepEvent::Diagnostic { .. }));
        assert_eq!(last_user(&session), "ERROR: Unknown tool: nope");

        let second = run_step(&mut session, 2).expect("step");
        assert!(matches!(second.event, StepEvent::NoInvocation { sharp: true, .. }));
        assert_eq!(last_user(&session), SHARP_NUDGE);
    }

    #[test]
    fn invocation_resets_the_streak() {
        let temp = workspace();
        let mut session = session_in(
            temp.path(),
            ScriptedCompletion::new(vec![
                "tool: nope({'a': 1})",
                "tool: list_files({'path': '.'})",
                "Let me look.",
            ]),
            ScriptedConsole::new(Vec::<&str>::new()),
            AgentConfig::default(),
        );
        session.begin_request("x");
        run_step(&mut session, 1).expect("step");
        run_step(&mut session, 2).expect("step");
        let third = run_step(&mut session, 3).expect("step");
        assert!(matches!(third.event, StepEvent::NoInvocation { sharp: false, .. }));
    }

    #[test]
    fn completion_phrase_without_call_completes() {
        let temp = workspace();
        let mut session = session_in(
            temp.path(),
            ScriptedCompletion::new(vec!["All files created. Task complete."]),
            ScriptedConsole::new(Vec::<&str>::new()),
            AgentConfig::default(),
        );
        session.begin_request("x");
        let outcome = run_step(&mut session, 1).expect("step");
        assert!(outcome.completes_request());
    }

    #[test]
    fn executed_write_is_tracked_and_observed() {
        let temp = workspace();
        let mut session = session_in(
            temp.path(),
            ScriptedCompletion::new(vec![
                "tool: write_file({\"path\": \"a.py\", \"content\": \"print('hi')\\n\"})",
            ]),
            ScriptedConsole::new(Vec::<&str>::new()),
            AgentConfig::new(true, false),
        );
        session.begin_request("make a.py");
        let outcome = run_step(&mut session, 1).expect("step");
        assert!(matches!(
            outcome.event,
            StepEvent::Executed { failed: false, .. }
        ));
        assert_eq!(session.created_files(), ["a.py".to_string()]);
        assert!(last_user(&session).starts_with("Result: {"));
        assert_eq!(
            std::fs::read_to_string(temp.path().join("a.py")).expect("read"),
            "print('hi')\n"
        );
    }

    #[test]
    fn completion_failure_is_an_error() {
        let temp = workspace();
        let mut session = session_in(
            temp.path(),
            ScriptedCompletion::new(Vec::<&str>::new()),
            ScriptedConsole::new(Vec::<&str>::new()),
            AgentConfig::default(),
        );
        session.begin_request("x");
        assert!(run_step(&mut session, 1).is_err());
    }
}
