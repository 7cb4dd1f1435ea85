use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Seam over subprocess execution so pipelines can be exercised without the
/// real tools installed.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<Output> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} timed out after {limit:?}")]
    TimedOut { program: String, limit: Duration },
    #[error("{program} exited with status {status:?}: {stderr}")]
    Exited {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
}

/// Runs `program` to completion within `limit`, treating a non-zero exit as
/// an error. The child is killed when the deadline drops its future.
pub async fn run_checked(
    executor: &dyn CommandExecutor,
    program: &Path,
    args: &[String],
    limit: Duration,
) -> Result<Output, ProcessError> {
    let name = program.display().to_string();
    debug!(program = %name, args = ?args, "running external command");
    let output = match timeout(limit, executor.run(program, args)).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(ProcessError::Spawn {
                program: name,
                source,
            })
        }
        Err(_) => {
            return Err(ProcessError::TimedOut {
                program: name,
                limit,
            })
        }
    };
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ProcessError::Exited {
            program: name,
            status: output.status.code(),
            stderr: tail(&stderr, 2048),
        });
    }
    Ok(output)
}

fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingExecutor;
    use super::*;

    #[tokio::test]
    async fn non_zero_exit_is_reported_with_stderr() {
        let (executor, calls) = RecordingExecutor::with_code(1, Vec::new());
        let err = run_checked(
            executor.as_ref(),
            Path::new("ffmpeg"),
            &["-version".to_string()],
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        match err {
            ProcessError::Exited { status, stderr, .. } => {
                assert_eq!(status, Some(1));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn successful_output_is_returned() {
        let (executor, _) = RecordingExecutor::succeeding(b"ok".to_vec());
        let output = run_checked(executor.as_ref(), Path::new("true"), &[], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(output.stdout, b"ok");
    }

    #[test]
    fn tail_keeps_the_end_of_long_output() {
        let text = "a".repeat(10) + "end";
        assert_eq!(tail(&text, 3), "end");
        assert_eq!(tail("short", 10), "short");
    }
}
