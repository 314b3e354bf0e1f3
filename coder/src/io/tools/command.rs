use serde_json::{Value, json};
use tracing::warn;

use super::{Capability, ToolEnv, ToolResult, object, str_arg};
use crate::core::types::Arguments;
use crate::io::process::{run_command_with_timeout, shell_command};

/// Shell command execution with a hard wall-clock timeout.
pub struct RunCommand;

impl Capability for RunCommand {
    fn name(&self) -> &'static str {
        "run_command"
    }

    fn signature(&self) -> &'static str {
        "(command: str, working_dir: str = '.')"
    }

    fn description(&self) -> &'static str {
        "Execute a shell command and return stdout/stderr."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "minLength": 1},
                "working_dir": {"type": "string"}
            },
            "required": ["command"]
        })
    }

    fn invoke(&self, args: &Arguments, env: &ToolEnv) -> ToolResult {
        let command = str_arg(args, "command", "");
        let working_dir = env.resolve(str_arg(args, "working_dir", "."));
        let mut cmd = shell_command(command);
        cmd.current_dir(&working_dir);

        let output = match run_command_with_timeout(cmd, env.command_timeout, env.output_limit_bytes)
        {
            Ok(output) => output,
            Err(err) => {
                return object(json!({"command": command, "error": format!("{err:#}")}));
            }
        };
        if output.timed_out {
            warn!(command, "command timed out");
            return object(json!({
                "command": command,
                "error": format!(
                    "Command timed out after {} seconds",
                    env.command_timeout.as_secs()
                ),
                "timed_out": true,
            }));
        }
        object(json!({
            "command": command,
            "stdout": output.stdout_text(),
            "stderr": output.stderr_text(),
            "returncode": output.status.code().unwrap_or(-1),
            "working_dir": working_dir.display().to_string(),
        }))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::tool_env;
    use std::time::Duration;

    fn args(value: Value) -> Arguments {
        match value {
            Value::Object(map) => map,
            _ => panic!("object"),
        }
    }

    #[test]
    fn reports_exit_code_and_streams() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = RunCommand.invoke(
            &args(json!({"command": "echo hi; echo oops >&2; exit 2"})),
            &tool_env(temp.path()),
        );
        assert_eq!(result["returncode"], 2);
        assert_eq!(result["stdout"], "hi\n");
        assert_eq!(result["stderr"], "oops\n");
    }

    #[test]
    fn runs_in_the_requested_working_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(temp.path().join("sub")).expect("mkdir");
        std::fs::write(temp.path().join("sub/marker.txt"), "").expect("write");
        let result = RunCommand.invoke(
            &args(json!({"command": "ls", "working_dir": "sub"})),
            &tool_env(temp.path()),
        );
        assert_eq!(result["stdout"], "marker.txt\n");
    }

    #[test]
    fn timeout_is_a_distinct_result() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut env = tool_env(temp.path());
        env.command_timeout = Duration::from_millis(200);
        let result = RunCommand.invoke(&args(json!({"command": "exec sleep 5"})), &env);
        assert_eq!(result["timed_out"], true);
        assert!(result["error"].as_str().expect("error").contains("timed out"));
    }

    #[test]
    fn timeout_covers_compound_commands() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut env = tool_env(temp.path());
        env.command_timeout = Duration::from_millis(200);
        let started = std::time::Instant::now();
        let result = RunCommand.invoke(&args(json!({"command": "sleep 3; echo done"})), &env);
        assert_eq!(result["timed_out"], true);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
