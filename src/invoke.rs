use chrono::{DateTime, Local};
use tokio::process::Command;

use std::fmt;
use std::future::Future;
use std::process::Stdio;
use std::time::{Duration, Instant};

use crate::config::{SyncConfig, ToolConfig};

/// Longest stream excerpt carried in an [Outcome]
pub const MAX_REPORT_LEN: usize = 4096;

/// A program and its argument vector. Never passed through a shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;

        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Stdout => write!(f, "stdout"),
            Stream::Stderr => write!(f, "stderr"),
        }
    }
}

/// How a [SyncRun] ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The tool ran but reported failure, through its exit code or by writing to stderr
    ProcessError {
        code: Option<i32>,
        stream: Stream,
        text: String,
    },
    /// The tool could not be started
    SpawnError(String),
    Cancelled,
}

/// One invocation of the synchronization tool
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub command: CommandLine,
    pub started: DateTime<Local>,
    pub elapsed: Duration,
    /// Exit code; `None` if the process never exited normally
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub outcome: Outcome,
}

impl SyncRun {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Builds and runs the synchronization tool for a [SyncConfig]
pub struct Invoker {
    tool: ToolConfig,
}

impl Invoker {
    pub fn new(tool: ToolConfig) -> Invoker {
        Invoker { tool }
    }

    /// `[wrapper] program flags... <source> <user>@<host>:<remote dir>`
    pub fn command(&self, config: &SyncConfig) -> CommandLine {
        let mut args = vec![];

        let program = match &self.tool.wrapper {
            Some(wrapper) => {
                args.push(self.tool.program.clone());
                wrapper.clone()
            }
            None => self.tool.program.clone(),
        };

        args.extend(self.tool.archive_flags.split_whitespace().map(str::to_string));
        args.push(config.source_path.clone());
        args.push(format!(
            "{}@{}:{}",
            config.username, config.remote_host, self.tool.remote_dir
        ));

        CommandLine { program, args }
    }

    /// Run the tool to completion. `config` must already have passed validation
    pub async fn run(&self, config: &SyncConfig) -> SyncRun {
        self.run_until(config, std::future::pending()).await
    }

    /// Run the tool until it exits or `cancel` resolves, whichever comes first.
    ///
    /// On cancellation the child is killed and the run ends as [Outcome::Cancelled]. Only the
    /// direct child is killed: when a `wrapper` is set, the tool it launched may keep running
    pub async fn run_until<F>(&self, config: &SyncConfig, cancel: F) -> SyncRun
    where
        F: Future<Output = ()>,
    {
        let clock = Instant::now();
        let mut run = SyncRun {
            command: self.command(config),
            started: Local::now(),
            elapsed: Duration::ZERO,
            code: None,
            stdout: String::new(),
            stderr: String::new(),
            outcome: Outcome::Success,
        };

        let program = match which::which(&run.command.program) {
            Ok(program) => program,
            Err(e) => {
                run.outcome = Outcome::SpawnError(format!(
                    "'{}' not found in PATH: {e}",
                    run.command.program
                ));
                return finish(run, clock);
            }
        };

        let child = Command::new(&program)
            .args(&run.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                run.outcome = Outcome::SpawnError(format!("failed to start '{}': {e}", program.display()));
                return finish(run, clock);
            }
        };

        log::info!("spawned `{}` (pid {:?})", run.command, child.id());

        tokio::select! {
            output = child.wait_with_output() => match output {
                Ok(output) => {
                    run.code = output.status.code();
                    run.stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                    run.stderr = String::from_utf8_lossy(&output.stderr).into_owned();

                    log::info!("`{}` exited with {}", run.command.program, output.status);

                    run.outcome = classify(output.status.success(), run.code, &run.stdout, &run.stderr);
                }

                Err(e) => {
                    run.outcome = Outcome::ProcessError {
                        code: None,
                        stream: Stream::Stderr,
                        text: format!("failed to collect process output: {e}"),
                    };
                }
            },

            // dropping the wait future drops the child, which kills it
            _ = cancel => {
                log::warn!("cancelling `{}`", run.command);
                run.outcome = Outcome::Cancelled;
            }
        }

        finish(run, clock)
    }
}

fn finish(mut run: SyncRun, clock: Instant) -> SyncRun {
    run.elapsed = clock.elapsed();

    match &run.outcome {
        Outcome::Success => log::info!("sync finished in {:?}", run.elapsed),
        outcome => log::error!("sync ended with {outcome:?}"),
    }

    run
}

/// Any stderr output counts as failure, even alongside a zero exit code
fn classify(success: bool, code: Option<i32>, stdout: &str, stderr: &str) -> Outcome {
    if success && stderr.is_empty() {
        return Outcome::Success;
    }

    let (stream, text) = if stderr.is_empty() {
        (Stream::Stdout, stdout)
    } else {
        (Stream::Stderr, stderr)
    };

    Outcome::ProcessError { code, stream, text: truncate(text, MAX_REPORT_LEN) }
}

/// Cut `text` to at most `max` bytes on a char boundary, noting how much was dropped
pub fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }

    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}... ({} more bytes)", &text[..end], text.len() - end)
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;

    use std::path::Path;

    fn config() -> SyncConfig {
        SyncConfig {
            remote_host: "192.168.0.201".into(),
            username: "alice".into(),
            source_path: "/mnt/c/vault".into(),
        }
    }

    /// A [ToolConfig] running `script` through `sh` in place of rsync
    pub(crate) fn mock_tool(dir: &Path, script: &str) -> ToolConfig {
        let path = dir.join("mock-rsync.sh");
        std::fs::write(&path, script).unwrap();

        ToolConfig {
            program: path.display().to_string(),
            wrapper: Some("sh".into()),
            ..ToolConfig::default()
        }
    }

    #[test]
    fn builds_archive_mode_command() {
        let invoker = Invoker::new(ToolConfig::default());

        assert_eq!(
            invoker.command(&config()),
            CommandLine {
                program: "rsync".into(),
                args: vec![
                    "-av".into(),
                    "/mnt/c/vault".into(),
                    "alice@192.168.0.201:~/Obsidian/".into()
                ],
            }
        );
    }

    #[test]
    fn wrapper_comes_first() {
        let invoker = Invoker::new(ToolConfig { wrapper: Some("wsl".into()), ..ToolConfig::default() });

        assert_eq!(
            invoker.command(&config()).to_string(),
            "wsl rsync -av /mnt/c/vault alice@192.168.0.201:~/Obsidian/"
        );
    }

    #[tokio::test]
    async fn clean_exit_is_success() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let invoker = Invoker::new(mock_tool(dir.path(), "printf '%s\\n' \"$@\"\n"));

        let run = invoker.run(&config()).await;

        assert_eq!(run.outcome, Outcome::Success);
        assert_eq!(run.code, Some(0));
        assert_eq!(run.stdout, "-av\n/mnt/c/vault\nalice@192.168.0.201:~/Obsidian/\n");
        assert!(run.stderr.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn arguments_are_not_shell_interpreted() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let marker = dir.path().join("pwned");
        let invoker = Invoker::new(mock_tool(dir.path(), "printf '%s\\n' \"$@\"\n"));

        let mut config = config();
        config.source_path = format!("/vault; touch {}", marker.display());
        config.username = "al ice$(id)".into();

        let run = invoker.run(&config).await;

        assert_eq!(run.outcome, Outcome::Success);
        assert!(!marker.exists());

        let lines: Vec<&str> = run.stdout.lines().collect();
        assert_eq!(lines[1], config.source_path);
        assert_eq!(lines[2], "al ice$(id)@192.168.0.201:~/Obsidian/");
        Ok(())
    }

    #[tokio::test]
    async fn stderr_with_zero_exit_is_failure() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let invoker = Invoker::new(mock_tool(dir.path(), "echo sent; echo 'some files vanished' >&2\n"));

        let run = invoker.run(&config()).await;

        assert_eq!(run.code, Some(0));
        assert_eq!(
            run.outcome,
            Outcome::ProcessError {
                code: Some(0),
                stream: Stream::Stderr,
                text: "some files vanished\n".into()
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn nonzero_exit_carries_stderr() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let invoker = Invoker::new(mock_tool(
            dir.path(),
            "echo 'Permission denied (publickey).' >&2\nexit 1\n",
        ));

        let run = invoker.run(&config()).await;

        match run.outcome {
            Outcome::ProcessError { code, stream, text } => {
                assert_eq!(code, Some(1));
                assert_eq!(stream, Stream::Stderr);
                assert!(text.contains("Permission denied"));
            }
            other => panic!("expected a process error, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn silent_nonzero_exit_reports_stdout() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let invoker = Invoker::new(mock_tool(dir.path(), "echo partial\nexit 23\n"));

        let run = invoker.run(&config()).await;

        assert_eq!(
            run.outcome,
            Outcome::ProcessError { code: Some(23), stream: Stream::Stdout, text: "partial\n".into() }
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_tool_is_spawn_error() {
        let invoker = Invoker::new(ToolConfig {
            program: "/nonexistent/vaultsync-test/rsync".into(),
            ..ToolConfig::default()
        });

        let run = invoker.run(&config()).await;

        assert!(matches!(run.outcome, Outcome::SpawnError(_)));
        assert_eq!(run.code, None);
    }

    #[tokio::test]
    async fn cancellation_kills_the_tool() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let invoker = Invoker::new(mock_tool(dir.path(), "exec sleep 30\n"));

        let cancel = tokio::time::sleep(Duration::from_millis(200));
        let run = invoker.run_until(&config(), cancel).await;

        assert_eq!(run.outcome, Outcome::Cancelled);
        assert!(run.elapsed < Duration::from_secs(10));
        Ok(())
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc... (3 more bytes)");
        // 'é' is two bytes; cutting at 2 would split it
        assert_eq!(truncate("aé", 2), "a... (2 more bytes)");
    }
}
