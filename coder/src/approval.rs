//! Approval gate: safety validation, risk tiers and the human decision.

use tracing::{debug, info, instrument, warn};

use crate::core::forbidden::{
    PathContext, PathOperation, Verdict, validate_command, validate_path, validate_path_with,
};
use crate::core::risk::{READ_CAPABILITIES, RiskTier, WRITE_CAPABILITIES, format_preview, risk_tier};
use crate::core::types::{AgentConfig, ApprovalDecision, ApprovalMode, Invocation};
use crate::io::console::Console;
use crate::io::paths::follow_links;

pub const REJECTED_FEEDBACK: &str = "User rejected the action. Try a different approach.";
pub const CANCELLED_FEEDBACK: &str = "User cancelled the operation";

/// Run the safety validator for whatever the invocation touches.
///
/// Write targets are checked after following symlinks, so a link inside the
/// workspace cannot redirect a write into a protected directory.
pub fn check_invocation(
    invocation: &Invocation,
    config: &AgentConfig,
    paths: &PathContext,
) -> Verdict {
    let name = invocation.name();
    let path_arg = || {
        invocation
            .str_arg("path")
            .filter(|p| !p.is_empty())
            .or_else(|| invocation.str_arg("filename"))
            .unwrap_or_default()
    };
    if name == "run_command" {
        return validate_command(
            invocation.str_arg("command").unwrap_or_default(),
            config.override_forbidden,
        );
    }
    if WRITE_CAPABILITIES.iter().any(|c| *c == name) {
        return validate_path_with(
            path_arg(),
            PathOperation::Write,
            config.override_forbidden,
            paths,
            follow_links,
        );
    }
    if READ_CAPABILITIES.iter().any(|c| *c == name) {
        return validate_path(
            path_arg(),
            PathOperation::Read,
            config.override_forbidden,
            paths,
        );
    }
    Verdict::Allowed
}

/// Decide whether `invocation` may execute.
///
/// Forbidden actions are rejected in every mode. Safe capabilities and auto
/// mode skip the prompt. Answering `a`/`auto` switches the session to auto
/// mode. End of input or a console failure rejects without touching `config`.
#[instrument(skip_all, fields(capability = invocation.name(), mode = config.approval_mode.as_str()))]
pub fn request_approval<K: Console>(
    invocation: &Invocation,
    config: &mut AgentConfig,
    paths: &PathContext,
    console: &mut K,
) -> ApprovalDecision {
    if let Verdict::Forbidden(rejection) = check_invocation(invocation, config, paths) {
        warn!("forbidden action blocked");
        return ApprovalDecision::reject(format!("FORBIDDEN: {rejection}"));
    }

    let tier = risk_tier(invocation.name());
    if tier == RiskTier::Safe {
        return ApprovalDecision::approve();
    }
    if config.is_auto() {
        debug!("auto mode approval");
        return ApprovalDecision::approve();
    }

    console.show_preview(tier, &format_preview(invocation));
    let answer = match console.read_decision() {
        Ok(Some(answer)) => answer,
        Ok(None) => {
            console.notify("Interrupted - rejecting action");
            return ApprovalDecision::reject(CANCELLED_FEEDBACK);
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "console failure during approval");
            return ApprovalDecision::reject(CANCELLED_FEEDBACK);
        }
    };

    interpret_answer(answer.trim(), config, console)
}

fn interpret_answer<K: Console>(
    answer: &str,
    config: &mut AgentConfig,
    console: &mut K,
) -> ApprovalDecision {
    match answer.to_lowercase().as_str() {
        "" | "y" | "yes" => ApprovalDecision::approve(),
        "a" | "auto" => {
            config.approval_mode = ApprovalMode::Auto;
            info!("auto mode enabled for session");
            console.notify("Auto-mode enabled for this session");
            ApprovalDecision::approve()
        }
        "n" | "no" => ApprovalDecision::reject(REJECTED_FEEDBACK),
        _ => ApprovalDecision::reject(format!("User feedback: {answer}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forbidden::Rejection;
    use crate::test_support::{ScriptedConsole, invocation, path_context, workspace};
    use serde_json::json;

    fn write_a_py() -> Invocation {
        invocation("write_file", json!({"path": "a.py", "content": "print('hi')\n"}))
    }

    #[test]
    fn safe_capabilities_skip_the_prompt() {
        let mut config = AgentConfig::default();
        let mut console = ScriptedConsole::new(Vec::<&str>::new());
        let decision = request_approval(
            &invocation("read_file", json!({"filename": "a.py"})),
            &mut config,
            &path_context("/work"),
            &mut console,
        );
        assert!(decision.approved);
        assert!(console.previews().is_empty());
    }

    #[test]
    fn empty_and_yes_answers_approve() {
        for answer in ["", "y", "YES"] {
            let mut config = AgentConfig::default();
            let mut console = ScriptedConsole::new(vec![answer]);
            let decision =
                request_approval(&write_a_py(), &mut config, &path_context("/work"), &mut console);
            assert!(decision.approved, "{answer:?}");
            assert!(!config.is_auto());
        }
    }

    #[test]
    fn auto_answer_switches_the_session() {
        let mut config = AgentConfig::default();
        let mut console = ScriptedConsole::new(vec!["a"]);
        let ctx = path_context("/work");
        assert!(request_approval(&write_a_py(), &mut config, &ctx, &mut console).approved);
        assert!(config.is_auto());
        assert_eq!(console.notices(), ["Auto-mode enabled for this session".to_string()]);

        // No further prompts once in auto mode.
        let decision = request_approval(
            &invocation("run_command", json!({"command": "python a.py"})),
            &mut config,
            &ctx,
            &mut console,
        );
        assert!(decision.approved);
        assert_eq!(console.previews().len(), 1);
    }

    #[test]
    fn no_and_free_text_reject_with_feedback() {
        let mut config = AgentConfig::default();
        let ctx = path_context("/work");
        let mut console = ScriptedConsole::new(vec!["n", "use pathlib instead"]);
        let first = request_approval(&write_a_py(), &mut config, &ctx, &mut console);
        assert_eq!(first, ApprovalDecision::reject(REJECTED_FEEDBACK));
        let second = request_approval(&write_a_py(), &mut config, &ctx, &mut console);
        assert_eq!(second.feedback, "User feedback: use pathlib instead");
    }

    #[test]
    fn end_of_input_rejects_and_keeps_mode() {
        let mut config = AgentConfig::default();
        let mut console = ScriptedConsole::new(Vec::<&str>::new());
        let decision =
            request_approval(&write_a_py(), &mut config, &path_context("/work"), &mut console);
        assert_eq!(decision, ApprovalDecision::reject(CANCELLED_FEEDBACK));
        assert!(!config.is_auto());
    }

    #[test]
    fn interrupt_at_the_prompt_cancels_the_action() {
        use crate::io::console::TerminalConsole;
        use std::io::Cursor;
        use std::sync::Arc;
        use std::sync::atomic::AtomicBool;

        let flag = Arc::new(AtomicBool::new(true));
        let mut console = TerminalConsole::new(Cursor::new(b"y\n".to_vec()), Vec::new())
            .with_interrupt_flag(flag);
        let mut config = AgentConfig::default();
        let decision =
            request_approval(&write_a_py(), &mut config, &path_context("/work"), &mut console);
        assert_eq!(decision, ApprovalDecision::reject(CANCELLED_FEEDBACK));
        assert!(!config.is_auto());
        let shown = String::from_utf8(console.into_output()).expect("utf8");
        assert!(shown.contains("Interrupted - rejecting action"));
    }

    #[test]
    fn forbidden_command_is_rejected_even_in_auto_mode_with_override() {
        let mut config = AgentConfig::new(true, true);
        let mut console = ScriptedConsole::new(Vec::<&str>::new());
        let decision = request_approval(
            &invocation("run_command", json!({"command": "rm -rf /"})),
            &mut config,
            &path_context("/work"),
            &mut console,
        );
        assert!(!decision.approved);
        assert!(decision.feedback.starts_with("FORBIDDEN: BLOCKED"));
        assert!(console.previews().is_empty());
    }

    #[test]
    fn writes_outside_the_workspace_are_forbidden() {
        let mut config = AgentConfig::new(true, false);
        let mut console = ScriptedConsole::new(Vec::<&str>::new());
        let decision = request_approval(
            &invocation("delete", json!({"path": "/etc/hosts"})),
            &mut config,
            &path_context("/work"),
            &mut console,
        );
        assert!(decision.feedback.contains("Cannot write to system directory"));
    }

    #[test]
    fn reads_of_system_paths_are_allowed() {
        let config = AgentConfig::default();
        let verdict = check_invocation(
            &invocation("read_file", json!({"filename": "/etc/hostname"})),
            &config,
            &path_context("/work"),
        );
        assert!(verdict.is_allowed());
    }

    #[cfg(unix)]
    #[test]
    fn writes_through_links_out_of_the_workspace_are_forbidden() {
        use std::os::unix::fs::symlink;

        let temp = workspace();
        symlink("/etc", temp.path().join("cfg")).expect("symlink");
        symlink("/opt/coder-missing/target", temp.path().join("dangling")).expect("symlink");
        let ctx = path_context(temp.path());
        let config = AgentConfig::new(true, false);

        for capability in ["write_file", "delete", "insert_lines"] {
            let verdict = check_invocation(
                &invocation(capability, json!({"path": "cfg/hosts", "content": "x"})),
                &config,
                &ctx,
            );
            match verdict {
                Verdict::Forbidden(Rejection::ProtectedPath { path, .. }) => {
                    assert!(path.starts_with("/etc"), "{}", path.display());
                }
                other => panic!("{capability}: expected protected path, got {other:?}"),
            }
        }

        let verdict = check_invocation(
            &invocation("write_file", json!({"path": "dangling", "content": "x"})),
            &config,
            &ctx,
        );
        assert!(
            matches!(verdict, Verdict::Forbidden(Rejection::OutsideWorkspace { .. })),
            "{verdict:?}"
        );

        // A plain file in the workspace is still fine.
        let verdict = check_invocation(
            &invocation("write_file", json!({"path": "src/a.py", "content": "x"})),
            &config,
            &ctx,
        );
        assert!(verdict.is_allowed(), "{verdict:?}");
    }
}
