//! Subprocess execution utilities.
//!
//! Every external program the engine launches (compiler probes, build steps,
//! verification drivers) goes through [`ProcessBuilder`] and a
//! [`ProcessRunner`]. The environment is an explicit overlay on the spawned
//! command; the parent's environment is never modified.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use wait_timeout::ChildExt;

/// How long to wait for the output pipes after a process group was killed.
const PIPE_GRACE: Duration = Duration::from_secs(2);

/// Builder for subprocess execution.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ProcessBuilder {
    /// Create a new process builder for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            timeout: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|s| s.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .insert(key.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    /// Set several environment variables at once.
    pub fn envs<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in vars {
            self.env.insert(key.clone(), value.clone());
        }
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Kill the process if it runs longer than `timeout`.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the program path.
    pub fn get_program(&self) -> &Path {
        &self.program
    }

    /// Get the arguments.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Get the environment overlay.
    pub fn get_env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Get the working directory, if one was set.
    pub fn get_cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Get the timeout, if one was set.
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Build the Command.
    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        // A bounded process gets its own group so a timeout can take down
        // everything it started.
        if self.timeout.is_some() {
            own_process_group(&mut cmd);
        }

        cmd
    }

    /// Execute the command and wait for completion (or the timeout).
    ///
    /// With a timeout, the whole call is bounded: the child is killed when it
    /// runs past the limit, and background processes still holding its
    /// output pipes at the deadline are killed too.
    pub fn exec(&self) -> Result<ProcessOutput> {
        let mut cmd = self.build_command();
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.program.display()))?;
        let deadline = self.timeout.map(|limit| Instant::now() + limit);

        let stdout = Capture::spawn(child.stdout.take());
        let stderr = Capture::spawn(child.stderr.take());

        let status = match self.timeout {
            Some(limit) => {
                let waited = child
                    .wait_timeout(limit)
                    .with_context(|| format!("failed to wait for `{}`", self.program.display()))?;
                if waited.is_none() {
                    tracing::warn!(
                        "`{}` exceeded {}s, killing it",
                        self.display_command(),
                        limit.as_secs()
                    );
                    kill_process_group(&mut child);
                    let _ = child.wait();
                }
                waited
            }
            None => Some(
                child
                    .wait()
                    .with_context(|| format!("failed to wait for `{}`", self.program.display()))?,
            ),
        };
        let timed_out = status.is_none();

        let pipe_deadline = if timed_out {
            Some(Instant::now() + PIPE_GRACE)
        } else {
            deadline
        };
        let stdout_closed = stdout.wait(pipe_deadline);
        let stderr_closed = stderr.wait(pipe_deadline);

        if !(stdout_closed && stderr_closed) && !timed_out {
            // Only reachable with a timeout, so the child led its own group.
            tracing::warn!(
                "`{}` left background processes holding its output, killing them",
                self.display_command()
            );
            kill_process_group(&mut child);
            let grace = Some(Instant::now() + PIPE_GRACE);
            stdout.wait(grace);
            stderr.wait(grace);
        }

        Ok(ProcessOutput {
            code: status.and_then(|s| s.code()),
            stdout: stdout.take(),
            stderr: stderr.take(),
            timed_out,
        })
    }

    /// Display the command for error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|a| quote_arg(a)));
        parts.join(" ")
    }
}

/// Output of one child pipe, read on a helper thread.
///
/// Bytes are kept as they arrive, so whatever was written before a deadline
/// is still available when the pipe never reaches end-of-file.
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<()>,
}

impl Capture {
    fn spawn<R: Read + Send + 'static>(pipe: Option<R>) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = mpsc::channel();
        let sink = Arc::clone(&buf);

        thread::spawn(move || {
            if let Some(mut pipe) = pipe {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => {
                            if let Ok(mut buf) = sink.lock() {
                                buf.extend_from_slice(&chunk[..n]);
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
            }
            let _ = tx.send(());
        });

        Capture { buf, done }
    }

    /// Wait for end-of-file, giving up at `deadline`. Returns whether the
    /// pipe closed.
    fn wait(&self, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) => self
                .done
                .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                .is_ok(),
            None => self.done.recv().is_ok(),
        }
    }

    fn take(&self) -> String {
        let bytes = self
            .buf
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// Kill `child` and every process in its group.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        tracing::debug!("killpg({}) failed: {}", pgid, e);
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

fn quote_arg(arg: &str) -> String {
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        format!("\"{}\"", arg)
    } else {
        arg.to_string()
    }
}

/// Captured result of a finished (or killed) process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` when killed by a signal or on timeout.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Whether the process was killed because it ran past its timeout.
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Whether the process exited with status 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout followed by stderr, verbatim.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => {
                let mut out = self.stdout.clone();
                if !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(&self.stderr);
                out
            }
        }
    }
}

/// Something that can run a [`ProcessBuilder`].
///
/// The engine only ever spawns processes through this trait, so tests can
/// substitute a scripted runner for real child processes.
pub trait ProcessRunner: Send + Sync {
    /// Run the command to completion and capture its output.
    fn run(&self, cmd: &ProcessBuilder) -> Result<ProcessOutput>;

    /// Locate an executable by name.
    fn find_executable(&self, name: &str, extra_paths: &[PathBuf]) -> Option<PathBuf> {
        find_executable_in(name, extra_paths)
    }
}

/// Runner that spawns real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, cmd: &ProcessBuilder) -> Result<ProcessOutput> {
        tracing::debug!("running `{}`", cmd.display_command());
        cmd.exec()
    }
}

/// Find an executable, searching `extra_paths` before `PATH`.
pub fn find_executable_in(name: &str, extra_paths: &[PathBuf]) -> Option<PathBuf> {
    for dir in extra_paths {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    which::which(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_process_builder() {
        let output = ProcessBuilder::new("echo").arg("hello").exec().unwrap();

        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
        assert!(!output.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn test_env_overlay_reaches_child() {
        let output = ProcessBuilder::new("sh")
            .args(["-c", "echo $KETTLE_PROBE"])
            .env("KETTLE_PROBE", "gcc-15")
            .exec()
            .unwrap();

        assert_eq!(output.stdout.trim(), "gcc-15");
        assert!(std::env::var("KETTLE_PROBE").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_captures_stderr() {
        let output = ProcessBuilder::new("sh")
            .args(["-c", "echo broken >&2; exit 3"])
            .exec()
            .unwrap();

        assert_eq!(output.code, Some(3));
        assert_eq!(output.stderr.trim(), "broken");
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_process() {
        let output = ProcessBuilder::new("sleep")
            .arg("5")
            .timeout(Some(Duration::from_millis(100)))
            .exec()
            .unwrap();

        assert!(output.timed_out);
        assert_eq!(output.code, None);
    }

    #[cfg(unix)]
    #[test]
    fn test_background_child_does_not_outlive_timeout() {
        let start = Instant::now();
        let output = ProcessBuilder::new("sh")
            .args(["-c", "sleep 8 & echo started"])
            .timeout(Some(Duration::from_secs(1)))
            .exec()
            .unwrap();

        assert!(
            start.elapsed() < Duration::from_secs(5),
            "took {:?}",
            start.elapsed()
        );
        assert_eq!(output.code, Some(0));
        assert!(!output.timed_out);
        assert_eq!(output.stdout.trim(), "started");
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_the_whole_group() {
        let tmp = tempfile::TempDir::new().unwrap();
        let marker = tmp.path().join("still-running");
        let script = format!("(sleep 2; touch '{}') & sleep 10", marker.display());

        let output = ProcessBuilder::new("sh")
            .args(["-c", script.as_str()])
            .timeout(Some(Duration::from_millis(500)))
            .exec()
            .unwrap();
        assert!(output.timed_out);

        thread::sleep(Duration::from_secs(3));
        assert!(!marker.exists(), "background job survived the timeout");
    }

    #[test]
    fn test_spawn_failure_is_error() {
        let result = ProcessBuilder::new("/nonexistent/kettle-no-such-binary").exec();
        assert!(result.is_err());
    }

    #[test]
    fn test_display_command() {
        let pb = ProcessBuilder::new("python3")
            .args(["test.py", "mpirun -np 1 /opt/bin/atdyn", "test_atdyn/jac/CUTOFF"]);

        assert_eq!(
            pb.display_command(),
            "python3 test.py \"mpirun -np 1 /opt/bin/atdyn\" test_atdyn/jac/CUTOFF"
        );
    }

    #[test]
    fn test_combined_output() {
        let out = ProcessOutput {
            code: Some(1),
            stdout: "checking for gfortran... no".into(),
            stderr: "configure: error: no Fortran compiler".into(),
            timed_out: false,
        };
        assert_eq!(
            out.combined(),
            "checking for gfortran... no\nconfigure: error: no Fortran compiler"
        );
    }
}
