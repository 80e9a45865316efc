use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::process::{ProcessError, ProcessResult};

/// Upper bound on stderr bytes kept per invocation (1 MiB); the rest is drained and dropped
const MAX_STDERR_BYTES: usize = 1024 * 1024;

/// How long to wait for the stderr pipe to close once the process is gone
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Stderr read so far, shared with the reader task so an abandoned drain keeps it
type Capture = Arc<Mutex<Vec<u8>>>;

/// Something that can run one command to completion with input on stdin.
///
/// The sink is handed an implementation at construction, so tests can
/// substitute a double that never touches the OS.
#[async_trait]
pub trait ProcessRunner: Send + Sync + 'static {
    /// Run `argv`, feeding `stdin` to the process, and kill it after `timeout`
    async fn run(&self, argv: &[String], stdin: Vec<u8>, timeout: Duration) -> ProcessResult<()>;
}

/// Runs commands as OS processes through tokio
#[derive(Debug, Clone)]
pub struct CommandRunner {
    stderr_limit: usize,
}

impl CommandRunner {
    /// Create a runner with the default stderr capture limit
    pub fn new() -> Self {
        Self {
            stderr_limit: MAX_STDERR_BYTES,
        }
    }

    /// Set how many stderr bytes are kept for diagnostics
    pub fn stderr_limit(mut self, limit: usize) -> Self {
        self.stderr_limit = limit;
        self
    }

    fn spawn(&self, argv: &[String]) -> ProcessResult<Child> {
        let (program, args) = argv.split_first().ok_or(ProcessError::EmptyCommand)?;

        let mut cmd = TokioCommand::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so a timeout takes down anything the command forked
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        cmd.spawn().map_err(ProcessError::Spawn)
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to one spawned process
#[derive(Debug)]
struct ProcessOutcome {
    /// Set only for a process that exited with a failure status
    exit_error: Option<ExitStatus>,
    stderr: Vec<u8>,
    timed_out: bool,
}

impl ProcessOutcome {
    fn into_result(self, timeout: Duration) -> ProcessResult<()> {
        let failed = self.timed_out || self.exit_error.is_some();
        if failed && !self.stderr.is_empty() {
            debug!("Command error: {:?}", String::from_utf8_lossy(&self.stderr));
        }

        if self.timed_out {
            return Err(ProcessError::Timeout {
                timeout,
                stderr: self.stderr,
            });
        }

        match self.exit_error {
            Some(status) => Err(ProcessError::Exit {
                status,
                stderr: self.stderr,
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProcessRunner for CommandRunner {
    async fn run(&self, argv: &[String], stdin: Vec<u8>, timeout: Duration) -> ProcessResult<()> {
        debug!("Spawning command: {:?} ({} bytes on stdin)", argv, stdin.len());

        let mut child = self.spawn(argv)?;
        let pid = child.id();

        let stdin_task = child.stdin.take().map(|mut pipe| {
            tokio::spawn(async move {
                // A command may exit without reading its input; that is its business
                if let Err(e) = pipe.write_all(&stdin).await {
                    debug!("Failed writing to command stdin: {}", e);
                } else if let Err(e) = pipe.shutdown().await {
                    debug!("Failed closing command stdin: {}", e);
                }
            })
        });

        let limit = self.stderr_limit;
        let captured = Capture::default();
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(read_capped(pipe, limit, captured.clone())));

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = tokio::time::sleep(timeout) => None,
        };

        let outcome = match waited {
            Some(Ok(status)) => {
                trace!("Command {:?} exited with {}", argv, status);
                // Whatever the command left behind in its group goes with it
                kill_group(pid);
                ProcessOutcome {
                    exit_error: (!status.success()).then_some(status),
                    stderr: collect_stderr(stderr_task, &captured).await,
                    timed_out: false,
                }
            }
            Some(Err(e)) => {
                abort(stdin_task);
                abort(stderr_task);
                kill(&mut child, pid).await;
                return Err(ProcessError::Wait(e));
            }
            None => {
                warn!("Command {:?} exceeded {:?}, killing it", argv, timeout);
                kill(&mut child, pid).await;
                ProcessOutcome {
                    exit_error: None,
                    stderr: collect_stderr(stderr_task, &captured).await,
                    timed_out: true,
                }
            }
        };

        abort(stdin_task);
        outcome.into_result(timeout)
    }
}

/// Send `SIGKILL` to the child's process group, if the platform has them.
fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    {
        if let Some(pgid) = pid.and_then(|p| i32::try_from(p).ok()) {
            // The child leads its own group, so its pid is the group id
            let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
            if rc != 0 {
                // ESRCH once every member is gone
                trace!("killpg({}) failed: {}", pgid, std::io::Error::last_os_error());
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Kill the process group and the child itself, then reap it.
async fn kill(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);

    if let Err(e) = child.kill().await {
        debug!("Failed to kill command: {}", e);
    }
}

fn abort<T>(task: Option<JoinHandle<T>>) {
    if let Some(task) = task {
        task.abort();
    }
}

/// Wait a bounded time for the stderr reader; whatever it has by then is kept.
async fn collect_stderr(task: Option<JoinHandle<()>>, captured: &Capture) -> Vec<u8> {
    if let Some(mut task) = task {
        match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Stderr reader task failed: {}", e),
            Err(_) => {
                debug!("Stderr still open after {:?}, giving up on it", STDERR_DRAIN_TIMEOUT);
                task.abort();
            }
        }
    }

    std::mem::take(&mut *captured.lock().await)
}

/// Read a stream to its end into `kept`, keeping at most `limit` bytes.
///
/// Reading continues past the limit so the writer never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, limit: usize, kept: Capture) {
    let mut chunk = [0u8; 8192];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let mut kept = kept.lock().await;
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                debug!("Error reading command stderr: {}", e);
                break;
            }
        }
    }
}
