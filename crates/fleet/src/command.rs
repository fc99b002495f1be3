use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::trace;

/// Error from a failed command.
#[derive(Debug, thiserror::Error)]
#[error("command failed: {command}\n{detail}")]
pub struct CommandError {
    pub command: String,
    pub detail: String,
}

fn format_command_display(program: &str, args: &[&str]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program);
    parts.extend_from_slice(args);
    parts.join(" ")
}

/// Execute a command and return its trimmed stdout.
pub async fn exec(program: &str, args: &[&str]) -> Result<String, CommandError> {
    run(program, args, None).await
}

/// Execute a command with `input` written to its stdin, which is then closed.
///
/// Used for secrets (`--password-stdin`) so they never appear in argv or logs.
pub async fn exec_with_stdin(
    program: &str,
    args: &[&str],
    input: &str,
) -> Result<String, CommandError> {
    run(program, args, Some(input)).await
}

async fn run(program: &str, args: &[&str], input: Option<&str>) -> Result<String, CommandError> {
    let cmd_display = format_command_display(program, args);
    trace!(command = %cmd_display, "exec");

    let fail = |detail: String| CommandError {
        command: cmd_display.clone(),
        detail,
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| fail(e.to_string()))?;

    if let Some(input) = input {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| fail("stdin not captured".into()))?;
        stdin
            .write_all(input.as_bytes())
            .await
            .map_err(|e| fail(format!("write stdin: {e}")))?;
        // Dropping closes the pipe so the child sees EOF.
        drop(stdin);
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| fail(e.to_string()))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(fail(String::from_utf8_lossy(&output.stderr).trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_command_display_joins_args() {
        let display = format_command_display("docker", &["push", "registry.fly.io/ws1:latest"]);
        assert_eq!(display, "docker push registry.fly.io/ws1:latest");
    }

    #[tokio::test]
    async fn exec_returns_trimmed_stdout() {
        let output = exec("echo", &["hello"]).await.unwrap();
        assert_eq!(output, "hello");
    }

    #[tokio::test]
    async fn exec_passes_multiple_args() {
        let output = exec("printf", &["%s-%s", "a", "b"]).await.unwrap();
        assert_eq!(output, "a-b");
    }

    #[tokio::test]
    async fn exec_error_contains_stderr() {
        let err = exec("bash", &["-c", "echo oops >&2; exit 1"])
            .await
            .unwrap_err();
        assert!(err.detail.contains("oops"), "detail was: {}", err.detail);
        assert!(err.command.starts_with("bash -c"), "command was: {}", err.command);
    }

    #[tokio::test]
    async fn exec_reports_missing_program() {
        let err = exec("definitely-not-a-real-binary", &[]).await.unwrap_err();
        assert!(err.command.contains("definitely-not-a-real-binary"));
    }

    #[tokio::test]
    async fn exec_with_stdin_feeds_input() {
        let output = exec_with_stdin("cat", &[], "secret-token\n").await.unwrap();
        assert_eq!(output, "secret-token");
    }
}
