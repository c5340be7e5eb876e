//! Subprocess execution and log streaming helpers.

use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use kubenest_core::util::sanitize_log_line;

use super::ProgressFn;

/// Run a command, streaming stdout and stderr line-by-line into `log`.
pub(crate) async fn run_streaming(
    label: &str,
    mut command: Command,
    log: ProgressFn<'_>,
) -> Result<()> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Cancellation drops the in-flight future; the child must not
        // keep mutating cluster state detached.
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("command failed to start: {label}"))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_reads = async {
        if let Some(stream) = stdout {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log(&sanitize_log_line(&line));
            }
        }
    };
    let stderr_reads = async {
        if let Some(stream) = stderr {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log(&sanitize_log_line(&line));
            }
        }
    };
    tokio::join!(stdout_reads, stderr_reads);

    let status = child
        .wait()
        .await
        .with_context(|| format!("command failed to run: {label}"))?;

    if status.success() {
        Ok(())
    } else {
        Err(anyhow!("command failed: {label}"))
    }
}

/// Run a command and capture its stdout as a string.
pub(crate) async fn run_capture(label: &str, mut command: Command) -> Result<String> {
    let output = command
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("command failed to run: {label}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "command failed: {label}: {}",
            sanitize_log_line(stderr.trim())
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a command with `input` piped to stdin, streaming output into `log`.
pub(crate) async fn run_with_stdin(
    label: &str,
    mut command: Command,
    input: &str,
    log: ProgressFn<'_>,
) -> Result<()> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("command failed to start: {label}"))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input.as_bytes())
            .await
            .with_context(|| format!("failed to write stdin: {label}"))?;
        drop(stdin);
    }

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reads = async {
        if let Some(stream) = stdout {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log(&sanitize_log_line(&line));
            }
        }
    };
    let stderr_reads = async {
        if let Some(stream) = stderr {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log(&sanitize_log_line(&line));
            }
        }
    };
    tokio::join!(stdout_reads, stderr_reads);

    let status = child
        .wait()
        .await
        .with_context(|| format!("command failed to run: {label}"))?;

    if status.success() {
        Ok(())
    } else {
        Err(anyhow!("command failed: {label}"))
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use super::*;

    #[tokio::test]
    async fn dropped_streaming_child_is_killed() {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let marker =
            std::env::temp_dir().join(format!("kubenest-kill-{}-{stamp}", std::process::id()));

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(format!("sleep 0.4; touch {}", marker.display()));
        let log: ProgressFn<'_> = &|_line: &str| {};

        // Abandon the future mid-run, the way a cancelled select! arm does.
        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            run_streaming("sleeper", command, log),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(
            !marker.exists(),
            "child kept running after its future was dropped"
        );
        let _ = std::fs::remove_file(&marker);
    }
}
