//! Shell command job

use crate::job_queue::{Job, JobId, QueueKey};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::info;

const DEFAULT_SHELL: &str = "sh";
const QUEUE_SEPARATOR: &str = "::";

/// Runs a command line through the shell
///
/// The child process is killed when the job is killed.
#[derive(Debug, Clone)]
pub struct CommandJob {
    id: JobId,
    command: String,
    shell: String,
}

impl CommandJob {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            command: command.into(),
            shell: DEFAULT_SHELL.to_string(),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Job for CommandJob {
    fn id(&self) -> JobId {
        self.id
    }

    async fn perform(&self) -> Result<()> {
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn `{}`", self.command))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (status, (), ()) = tokio::join!(
            child.wait(),
            forward_lines(stdout, self.id, "stdout"),
            forward_lines(stderr, self.id, "stderr"),
        );
        let status = status.with_context(|| format!("Failed to wait for `{}`", self.command))?;

        if !status.success() {
            bail!("`{}` exited with {}", self.command, status);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.id, self.command)
    }
}

async fn forward_lines<R>(reader: Option<R>, job: JobId, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };

    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(job = %job, stream, "{}", line);
    }
}

/// Command line job description: `[QUEUE::]COMMAND`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub queue: Option<String>,
    pub command: String,
}

impl CommandSpec {
    pub fn queue_key(&self) -> Option<QueueKey> {
        self.queue.clone().map(QueueKey::Named)
    }

    pub fn into_job(self) -> CommandJob {
        CommandJob::new(self.command)
    }
}

impl FromStr for CommandSpec {
    type Err = String;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let (queue, command) = match spec.split_once(QUEUE_SEPARATOR) {
            Some((queue, command)) if !queue.trim().is_empty() && !queue.contains(char::is_whitespace) => {
                (Some(queue.to_string()), command)
            }
            _ => (None, spec),
        };

        let command = command.trim();
        if command.is_empty() {
            return Err(format!("no command given in job '{spec}'"));
        }

        Ok(Self {
            queue,
            command: command.to_string(),
        })
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.queue {
            Some(queue) => write!(f, "{queue}{QUEUE_SEPARATOR}{}", self.command),
            None => write!(f, "{}", self.command),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("deploy::make deploy", Some("deploy"), "make deploy")]
    #[case("echo hello", None, "echo hello")]
    #[case("  build:: cargo build  ", None, "build:: cargo build")]
    #[case("a b::echo", None, "a b::echo")]
    #[case("::echo", None, "::echo")]
    #[case("db::echo a::b", Some("db"), "echo a::b")]
    fn test_parse_command_spec(
        #[case] spec: &str,
        #[case] queue: Option<&str>,
        #[case] command: &str,
    ) {
        let parsed: CommandSpec = spec.parse().unwrap();
        assert_eq!(parsed.queue.as_deref(), queue);
        assert_eq!(parsed.command, command);
    }

    #[rstest]
    #[case("")]
    #[case("deploy::")]
    #[case("deploy::   ")]
    fn test_parse_command_spec_without_command(#[case] spec: &str) {
        assert!(spec.parse::<CommandSpec>().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_command() {
        let job = CommandJob::new("echo queued && true");
        assert!(job.perform().await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_reports_status() {
        let job = CommandJob::new("exit 3");
        let err = job.perform().await.unwrap_err();
        assert!(err.to_string().contains("exit 3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_shell() {
        let job = CommandJob::new("true").with_shell("/nonexistent/shell");
        let err = job.perform().await.unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }
}
