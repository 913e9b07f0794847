//! Oracles: membership predicates over strings.
//!
//! The synthesis and fuzzing code only ever talks to the [`Oracle`] trait.
//! Any `Fn(&str) -> bool` closure is an oracle, which is what tests use.
//! [`CommandOracle`] adapts an external program: the query is written to a
//! temporary file, the program runs under a timeout and its outcome is
//! interpreted by a configurable [`AcceptRule`]. A timed-out query counts as
//! a reject, never as an error, so answers stay repeatable.

use std::io::{Read, Write};
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::OracleError;

/// A deterministic, repeatable membership predicate over arbitrary strings.
pub trait Oracle {
    /// Whether the language under test contains `input`.
    fn accepts(&self, input: &str) -> bool;
}

impl<F: Fn(&str) -> bool> Oracle for F {
    fn accepts(&self, input: &str) -> bool {
        self(input)
    }
}

/// Rewrites every query with a wrapping function before consulting an inner
/// oracle. Useful when inputs must be embedded in a harness, e.g. a code
/// fragment wrapped in a main function.
pub struct WrappedOracle<O, F> {
    inner: O,
    wrap: F,
}

impl<O, F> WrappedOracle<O, F> {
    /// Wrap `inner` with the given query rewriter.
    pub fn new(inner: O, wrap: F) -> Self {
        Self { inner, wrap }
    }
}

impl<O: Oracle, F: Fn(&str) -> String> Oracle for WrappedOracle<O, F> {
    fn accepts(&self, input: &str) -> bool {
        self.inner.accepts(&(self.wrap)(input))
    }
}

/// How a finished oracle command is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptRule {
    /// Accept when the process exits successfully.
    ExitSuccess,
    /// Accept when the process prints nothing but whitespace on stdout.
    QuietStdout,
    /// Accept when the process prints nothing but whitespace on stderr.
    QuietStderr,
}

/// Adapts an external command into an oracle.
///
/// Every query is written to a fresh temporary file. Occurrences of `{}` in
/// the argument list are replaced by that file's path; if no argument
/// mentions `{}`, the query is piped to the child's stdin instead. Spawn
/// failures are logged and treated as rejects, which surfaces immediately as
/// a rejected training example when learning starts.
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    rule: AcceptRule,
}

impl CommandOracle {
    /// Create an oracle for `program` with the given argument template.
    pub fn new<S: Into<String>>(
        program: S,
        args: Vec<String>,
        timeout: Duration,
        rule: AcceptRule,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            rule,
        }
    }

    /// Create an oracle from a whitespace-separated command line, e.g.
    /// `"xmllint --noout {}"`. Returns `None` for an empty command line.
    pub fn from_command_line(command_line: &str, timeout: Duration, rule: AcceptRule) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect(), timeout, rule))
    }

    fn run(&self, input: &str) -> Result<Option<Output>, OracleError> {
        let file = tempfile::NamedTempFile::new()?;
        std::fs::write(file.path(), input)?;
        let path = file.path().display().to_string();

        let uses_file = self.args.iter().any(|arg| arg.contains("{}"));

        let mut command = Command::new(&self.program);
        for arg in &self.args {
            command.arg(arg.replace("{}", &path));
        }
        command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| OracleError::Command {
            command: self.program.clone(),
            source,
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            if !uses_file {
                let _ = stdin.write_all(input.as_bytes());
            }
            // Dropping the handle closes the pipe so line-readers terminate.
        }

        wait_with_timeout(child, self.timeout)
    }
}

impl Oracle for CommandOracle {
    fn accepts(&self, input: &str) -> bool {
        match self.run(input) {
            Ok(Some(output)) => match self.rule {
                AcceptRule::ExitSuccess => output.status.success(),
                AcceptRule::QuietStdout => {
                    String::from_utf8_lossy(&output.stdout).trim().is_empty()
                },
                AcceptRule::QuietStderr => {
                    String::from_utf8_lossy(&output.stderr).trim().is_empty()
                },
            },
            Ok(None) => {
                debug!(program = %self.program, "oracle command timed out, rejecting");
                false
            },
            Err(error) => {
                warn!(%error, "oracle command failed, rejecting");
                false
            },
        }
    }
}

/// Wait for the child under a timeout, draining its output streams from
/// separate threads. `None` means the timeout fired; the child is killed and
/// reaped in that case.
fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<Option<Output>, OracleError> {
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    let stdout_thread = thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut stdout) = stdout_handle {
            let _ = stdout.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_thread = thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr_handle {
            let _ = stderr.read_to_end(&mut buf);
        }
        buf
    });

    let (sender, receiver) = mpsc::channel();
    let wait_thread = thread::spawn(move || {
        let result = child.wait();
        let _ = sender.send(result);
        child
    });

    match receiver.recv_timeout(timeout) {
        Ok(Ok(status)) => {
            let _ = wait_thread.join();
            let stdout = stdout_thread.join().unwrap_or_default();
            let stderr = stderr_thread.join().unwrap_or_default();
            Ok(Some(Output {
                status,
                stdout,
                stderr,
            }))
        },
        Ok(Err(error)) => {
            let _ = wait_thread.join();
            let _ = stdout_thread.join();
            let _ = stderr_thread.join();
            Err(OracleError::Io(error))
        },
        Err(_) => {
            if let Ok(mut child) = wait_thread.join() {
                let _ = child.kill();
                let _ = child.wait();
            }
            let _ = stdout_thread.join();
            let _ = stderr_thread.join();
            Ok(None)
        },
    }
}
