use std::io::{self, Read, Write};
use std::process::{self, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use crossterm::style::{style, Stylize};
use itertools::Itertools;
use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::command_definitions::{Args, Command, CommandSet, Output, Outputs};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::interpolation::{render_arguments, RenderOptions, TemplateContext};

/// A writer shared between the caller and the threads copying a child's output.
pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdinMode {
    /// Interactive commands run directly on the caller's terminal.
    Inherit,
    /// No command ever reads stdin; interactive output is teed to the writers.
    Null,
}

/// Where commands announce themselves and tee their output.
#[derive(Clone)]
pub struct IoStreams {
    pub stdin: StdinMode,
    pub out: SharedWriter,
    pub err: SharedWriter,
}

impl IoStreams {
    /// The process' own stdin, stdout and stderr.
    pub fn stdio() -> Self {
        Self {
            stdin: StdinMode::Inherit,
            out: Arc::new(Mutex::new(io::stdout())),
            err: Arc::new(Mutex::new(io::stderr())),
        }
    }

    /// Arbitrary writers with stdin detached, mostly useful for capturing in tests.
    pub fn with_writers(out: SharedWriter, err: SharedWriter) -> Self {
        Self {
            stdin: StdinMode::Null,
            out,
            err,
        }
    }
}

fn lock(writer: &SharedWriter) -> MutexGuard<'_, dyn Write + Send + 'static> {
    writer.lock().unwrap_or_else(PoisonError::into_inner)
}

fn display_invocation(program: &str, arguments: &[String]) -> String {
    std::iter::once(program)
        .chain(arguments.iter().map(String::as_str))
        .join(" ")
}

fn announce(name: Option<&str>, invocation: &str, err: &SharedWriter) -> io::Result<()> {
    let mut writer = lock(err);

    match name {
        Some(name) => writeln!(writer, "> {}: {}", style(name).cyan(), style(invocation).green())?,
        None => writeln!(writer, "> {}", style(invocation).green())?,
    }

    writer.flush()
}

fn report_failure(invocation: &str, stderr: &str, err: &SharedWriter) -> io::Result<()> {
    let mut writer = lock(err);
    let message = format!("Error running command: [{invocation}]\n{stderr}");

    writeln!(writer, "{}", style(message).red())?;
    writer.flush()
}

/// Reads `reader` to the end, copying every chunk to `tee` when given.
fn capture<R: Read>(mut reader: R, tee: Option<&SharedWriter>) -> io::Result<Vec<u8>> {
    let mut captured = Vec::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        captured.extend_from_slice(&buffer[..read]);

        if let Some(tee) = tee {
            let mut writer = lock(tee);
            writer.write_all(&buffer[..read])?;
            writer.flush()?;
        }
    }

    Ok(captured)
}

fn join_capture(handle: thread::ScopedJoinHandle<'_, io::Result<Vec<u8>>>) -> Result<String> {
    let captured = handle
        .join()
        .map_err(|_| Error::SubProcess(io::Error::other("output capture thread panicked")))?
        .map_err(Error::SubProcess)?;

    Ok(String::from_utf8_lossy(&captured).into_owned())
}

/// Runs `child` on the caller's own terminal. Nothing is captured.
fn run_attached(
    mut child: process::Command,
    invocation: &str,
) -> Result<(ExitStatus, String, String)> {
    let status = child
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|original| Error::Spawn {
            command: invocation.to_string(),
            original,
        })?;

    Ok((status, String::new(), String::new()))
}

/// Runs `child` with piped output, copying it to `streams` as it arrives when `tee` is set.
/// The child never reads stdin.
fn run_captured(
    mut child: process::Command,
    invocation: &str,
    tee: bool,
    streams: &IoStreams,
) -> Result<(ExitStatus, String, String)> {
    let mut child = child
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|original| Error::Spawn {
            command: invocation.to_string(),
            original,
        })?;

    let child_stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::SubProcess(io::Error::other("stdout was not captured")))?;
    let child_stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::SubProcess(io::Error::other("stderr was not captured")))?;

    let (stdout, stderr) = thread::scope(|scope| {
        let stdout_handle = scope.spawn(|| capture(child_stdout, tee.then_some(&streams.out)));
        let stderr_handle = scope.spawn(|| capture(child_stderr, tee.then_some(&streams.err)));

        (join_capture(stdout_handle), join_capture(stderr_handle))
    });
    let (stdout, stderr) = (stdout?, stderr?);

    let status = child.wait().map_err(Error::SubProcess)?;

    Ok((status, stdout, stderr))
}

impl Command {
    /// Runs the command once and returns the output store the next command should see.
    ///
    /// Arguments are rendered twice: with secrets for the process itself and masked for
    /// the announcement written to `streams.err`. Output is captured and also streamed to
    /// `streams` when the command is interactive or `config.verbose` is set. An
    /// interactive command on an attached terminal gets the terminal itself instead and
    /// leaves an empty output behind.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments cannot be rendered, the program cannot be
    /// started or it exits unsuccessfully. `outputs` is never modified.
    pub fn execute(
        &self,
        config: &Config,
        args: &Args,
        outputs: &Outputs,
        streams: &IoStreams,
    ) -> Result<Outputs> {
        let program = self.program()?;
        let context = TemplateContext::new(config, args, outputs);
        let arguments = render_arguments(self.arguments(), &context, RenderOptions::REVEALED)?;
        let redacted = render_arguments(self.arguments(), &context, RenderOptions::REDACTED)?;
        let invocation = display_invocation(program, &redacted);

        announce(self.display_name.as_deref(), &invocation, &streams.err)
            .map_err(Error::SubProcess)?;

        info!("Executing `{invocation}`");

        let mut child = process::Command::new(program);
        child.args(&arguments);

        let (status, stdout, stderr) = match (self.interactive, streams.stdin) {
            (true, StdinMode::Inherit) => run_attached(child, &invocation)?,
            (true, StdinMode::Null) => run_captured(child, &invocation, true, streams)?,
            (false, _) => run_captured(child, &invocation, config.verbose, streams)?,
        };
        debug!("`{invocation}` exited with {status}");

        if !status.success() {
            report_failure(&invocation, &stderr, &streams.err).map_err(Error::SubProcess)?;

            return Err(Error::SubProcessExit {
                command: invocation,
                status,
                stderr,
            });
        }

        if self.id.is_empty() {
            Ok(outputs.clone())
        } else {
            Ok(outputs.with_output(&self.id, Output { stdout, stderr }))
        }
    }
}

/// A command set that stopped early, with the outputs gathered before the failure.
#[derive(Debug)]
pub struct SetFailure {
    pub completed: Outputs,
    pub error: Error,
}

impl From<SetFailure> for Error {
    fn from(failure: SetFailure) -> Self {
        failure.error
    }
}

impl CommandSet {
    /// Runs every command in order, threading the output store forward.
    ///
    /// # Errors
    ///
    /// The first failing command aborts the set; no later command is started.
    pub fn execute(
        &self,
        config: &Config,
        args: &Args,
        outputs: &Outputs,
        streams: &IoStreams,
    ) -> std::result::Result<Outputs, SetFailure> {
        self.run(config, args, outputs, streams, None)
    }

    /// Like [`CommandSet::execute`], but checks `cancel` before starting each command.
    /// A command already running is always allowed to finish.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Cancelled`] if `cancel` fired before a command could start.
    pub fn execute_cancellable(
        &self,
        config: &Config,
        args: &Args,
        outputs: &Outputs,
        streams: &IoStreams,
        cancel: &CancellationToken,
    ) -> std::result::Result<Outputs, SetFailure> {
        self.run(config, args, outputs, streams, Some(cancel))
    }

    fn run(
        &self,
        config: &Config,
        args: &Args,
        outputs: &Outputs,
        streams: &IoStreams,
        cancel: Option<&CancellationToken>,
    ) -> std::result::Result<Outputs, SetFailure> {
        let mut current = outputs.clone();

        for command in self {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(SetFailure {
                    completed: current,
                    error: Error::Cancelled,
                });
            }

            match command.execute(config, args, &current, streams) {
                Ok(next) => current = next,
                Err(error) => {
                    return Err(SetFailure {
                        completed: current,
                        error,
                    })
                }
            }
        }

        Ok(current)
    }
}
