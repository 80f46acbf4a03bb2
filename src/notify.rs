use crate::invoke::{truncate, Outcome, MAX_REPORT_LEN};
use crate::trigger::Triggered;

/// Where user-facing messages go
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Prints messages to the terminal
pub struct Console;

impl Notifier for Console {
    fn notify(&self, message: &str) {
        log::debug!("notifying user: {message}");
        eprintln!("{message}");
    }
}

/// Keeps every message, for inspection in tests
#[cfg(test)]
#[derive(Default)]
pub struct Recorder {
    messages: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl Recorder {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Notifier for Recorder {
    fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// The message shown to the user once a trigger has been handled
pub fn describe(triggered: &Triggered) -> String {
    match triggered {
        Triggered::Rejected(e) => format!("cannot sync: {e}"),

        Triggered::AlreadyRunning => "a sync is already in progress; wait for it to finish".to_string(),

        Triggered::DryRun(command) => format!("would run: {command}"),

        Triggered::Completed(run) => {
            let secs = run.elapsed.as_secs_f64();

            match &run.outcome {
                Outcome::Success => {
                    let mut message = format!("sync finished in {secs:.1}s: {}", run.command);

                    if !run.stdout.is_empty() {
                        message.push_str("\nstdout:\n");
                        message.push_str(&truncate(&run.stdout, MAX_REPORT_LEN));
                    }

                    message
                }

                Outcome::ProcessError { code, stream, text } => {
                    let status = match code {
                        Some(0) => "exited cleanly but wrote to stderr".to_string(),
                        Some(code) => format!("exit code {code}"),
                        None => "terminated by signal".to_string(),
                    };

                    format!(
                        "sync failed ({status}) started {}\n{stream}:\n{text}",
                        run.started.format("%Y-%m-%d %H:%M:%S")
                    )
                }

                Outcome::SpawnError(reason) => format!("could not start sync: {reason}"),

                Outcome::Cancelled => format!("sync cancelled after {secs:.1}s"),
            }
        }
    }
}
