//! External tool execution.
//!
//! Tools run with piped stdout/stderr. Every output line goes through a
//! [`LineFilter`] and is re-emitted through `tracing` with `tool` and
//! `stream` fields. A spawn resolves exactly once: success, a non-zero
//! exit, a spawn/wait failure, or a timeout.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}", code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}")))]
    Exit { program: String, code: Option<i32> },

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {}s", after.as_secs())]
    Timeout { program: String, after: Duration },
}

impl ProcessError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessError::Exit { code, .. } => *code,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    fn as_str(self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineAction {
    Info,
    Warn,
    Drop,
}

/// Decides how one line of tool output is logged.
pub type LineFilter = Arc<dyn Fn(OutputStream, &str) -> LineAction + Send + Sync>;

/// stdout at info, stderr at warn.
pub fn default_filter(stream: OutputStream, _line: &str) -> LineAction {
    match stream {
        OutputStream::Stdout => LineAction::Info,
        OutputStream::Stderr => LineAction::Warn,
    }
}

/// One external tool invocation.
#[derive(Clone)]
pub struct SpawnSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    /// Added on top of the inherited environment.
    pub env: Vec<(String, OsString)>,
    pub timeout: Option<Duration>,
    pub filter: Option<LineFilter>,
}

impl std::fmt::Debug for SpawnSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("env", &self.env)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SpawnSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
            filter: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<OsString>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn filter(mut self, filter: impl Fn(OutputStream, &str) -> LineAction + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Program file name, for logs and errors.
    pub fn tool_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    /// Value of an overlay variable, if set.
    pub fn env_var(&self, key: &str) -> Option<&OsString> {
        self.env.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// Runs external tools. Engines only ever talk to this trait.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: SpawnSpec) -> Result<(), ProcessError>;
}

/// Runs tools as child processes of this one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

async fn forward_lines<R>(reader: R, tool: String, stream: OutputStream, filter: LineFilter)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match filter(stream, &line) {
                LineAction::Info => info!(%tool, stream = stream.as_str(), "{line}"),
                LineAction::Warn => warn!(%tool, stream = stream.as_str(), "{line}"),
                LineAction::Drop => {}
            },
            Ok(None) => break,
            Err(e) => {
                debug!(%tool, stream = stream.as_str(), error = %e, "stopped reading tool output");
                break;
            }
        }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: SpawnSpec) -> Result<(), ProcessError> {
        let tool = spec.tool_name();
        let program = spec.program.display().to_string();

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_os_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        debug!(%tool, args = ?spec.args, cwd = ?spec.cwd, "spawning process");
        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

        let filter = spec.filter.clone().unwrap_or_else(|| Arc::new(default_filter));
        let stdout = child.stdout.take().map(|out| {
            tokio::spawn(forward_lines(out, tool.clone(), OutputStream::Stdout, filter.clone()))
        });
        let stderr = child.stderr.take().map(|err| {
            tokio::spawn(forward_lines(err, tool.clone(), OutputStream::Stderr, filter.clone()))
        });

        let status = match spec.timeout {
            Some(after) => match tokio::time::timeout(after, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    error!(%tool, timeout_secs = after.as_secs(), "process timed out, killing");
                    if let Err(e) = child.kill().await {
                        warn!(%tool, error = %e, "failed to kill timed out process");
                    }
                    for task in [stdout, stderr].into_iter().flatten() {
                        let _ = task.await;
                    }
                    return Err(ProcessError::Timeout { program, after });
                }
            },
            None => child.wait().await,
        };

        for task in [stdout, stderr].into_iter().flatten() {
            let _ = task.await;
        }

        let status = status.map_err(|source| ProcessError::Wait {
            program: program.clone(),
            source,
        })?;
        if status.success() {
            debug!(%tool, "process complete");
            Ok(())
        } else {
            error!(%tool, code = ?status.code(), "process failed");
            Err(ProcessError::Exit {
                program,
                code: status.code(),
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::sync::Mutex;

    /// Records every spec and answers from a script of results.
    #[derive(Default)]
    pub(crate) struct RecordingRunner {
        pub(crate) calls: Mutex<Vec<SpawnSpec>>,
        /// Tool names that fail with exit code 1.
        pub(crate) failing: Vec<String>,
    }

    impl RecordingRunner {
        pub(crate) fn failing(tool: &str) -> Self {
            Self {
                failing: vec![tool.to_string()],
                ..Default::default()
            }
        }

        /// `tool arg arg ...` for every call.
        pub(crate) async fn command_lines(&self) -> Vec<String> {
            self.calls
                .lock()
                .await
                .iter()
                .map(|spec| {
                    let mut parts = vec![spec.tool_name()];
                    parts.extend(spec.args.iter().map(|a| a.to_string_lossy().into_owned()));
                    parts.join(" ")
                })
                .collect()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, spec: SpawnSpec) -> Result<(), ProcessError> {
            let tool = spec.tool_name();
            let program = spec.program.display().to_string();
            self.calls.lock().await.push(spec);
            if self.failing.contains(&tool) {
                return Err(ProcessError::Exit {
                    program,
                    code: Some(1),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn default_filter_levels() {
        assert_eq!(default_filter(OutputStream::Stdout, "x"), LineAction::Info);
        assert_eq!(default_filter(OutputStream::Stderr, "x"), LineAction::Warn);
    }

    #[test]
    fn spec_builder() {
        let spec = SpawnSpec::new("/usr/bin/npm")
            .args(["run-script", "build"])
            .env("PATH", "/a")
            .env("PATH", "/b")
            .cwd("/tmp");
        assert_eq!(spec.tool_name(), "npm");
        assert_eq!(spec.args.len(), 2);
        assert_eq!(spec.env_var("PATH").unwrap(), "/b");
        assert_eq!(spec.cwd.as_deref(), Some(Path::new("/tmp")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_successful_process() {
        let dir = tempfile::tempdir().unwrap();
        SystemRunner
            .run(
                SpawnSpec::new("sh")
                    .args(["-c", "echo out; echo err >&2; touch marker"])
                    .cwd(dir.path()),
            )
            .await
            .unwrap();
        assert!(dir.path().join("marker").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn env_overlay_is_visible() {
        let dir = tempfile::tempdir().unwrap();
        SystemRunner
            .run(
                SpawnSpec::new("sh")
                    .args(["-c", "test \"$HOSTDECK_TEST\" = yes"])
                    .env("HOSTDECK_TEST", "yes")
                    .cwd(dir.path()),
            )
            .await
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_reports_code() {
        let err = SystemRunner
            .run(SpawnSpec::new("sh").args(["-c", "exit 3"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Exit { .. }));
        assert_eq!(err.exit_code(), Some(3));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let err = SystemRunner
            .run(SpawnSpec::new("hostdeck-no-such-tool-12345"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert_eq!(err.exit_code(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_process_times_out() {
        let err = SystemRunner
            .run(
                SpawnSpec::new("sh")
                    .args(["-c", "sleep 5"])
                    .timeout(Some(Duration::from_millis(100))),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn filter_sees_every_line() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        SystemRunner
            .run(
                SpawnSpec::new("sh")
                    .args(["-c", "echo one; echo two >&2"])
                    .filter(move |stream, line| {
                        sink.lock().unwrap().push((stream, line.to_string()));
                        LineAction::Drop
                    }),
            )
            .await
            .unwrap();
        let mut seen = seen.lock().unwrap().clone();
        seen.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            seen,
            vec![
                (OutputStream::Stdout, "one".to_string()),
                (OutputStream::Stderr, "two".to_string()),
            ]
        );
    }
}
