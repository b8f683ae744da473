use std::{
    future::Future,
    io,
    pin::Pin,
    process::{ExitStatus, Stdio},
    task::{Context, Poll},
};

use nix::{
    errno::Errno,
    sys::signal::{Signal, killpg},
    unistd::Pid,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::{ChildStdin, ChildStdout, Command},
    sync::{mpsc, oneshot},
};

use crate::error::LaunchError;

/// Read size for stdout; also the upper bound of one chunk.
const CHUNK_SIZE: usize = 4096;
/// Chunks buffered between the reader task and the broker.
const CHUNK_QUEUE: usize = 64;

/// A command line run through a shell interpreter.
#[derive(Clone, Debug)]
pub struct ShellCommand {
    shell: String,
    command: String,
}

impl ShellCommand {
    /// `shell` is invoked as `<shell> -c <command>`.
    pub fn new(shell: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            command: command.into(),
        }
    }

    /// The command line.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Spawns the process and starts feeding it `payload` on stdin.
    ///
    /// The write runs on its own task and is reported through [`Launched::stdin`], so a
    /// child that never reads cannot hold the caller up. A child that exits (or closes
    /// its stdin) before consuming the payload is not an error: the broken pipe is
    /// ignored and the exit status decides.
    pub async fn start(&self, payload: &[u8]) -> Result<Launched, LaunchError> {
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                shell: self.shell.clone(),
                source,
            })?;

        let pid = child
            .id()
            .and_then(|id| i32::try_from(id).ok())
            .ok_or(LaunchError::Unavailable("pid"))?;
        let control = ProcessControl {
            pgid: Pid::from_raw(pid),
        };
        let stdin = child
            .stdin
            .take()
            .ok_or(LaunchError::Unavailable("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(LaunchError::Unavailable("stdout"))?;

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE);
        tokio::spawn(read_chunks(stdout, chunk_tx));

        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = exit_tx.send(child.wait().await);
        });

        let (fed_tx, fed_rx) = oneshot::channel();
        tokio::spawn(write_payload(stdin, payload.to_vec(), pid, fed_tx));

        Ok(Launched {
            control,
            stdin: StdinFeed { rx: fed_rx },
            stdout: StdoutStream { rx: chunk_rx },
            exit: ExitSignal { rx: exit_rx },
        })
    }
}

/// The handles on a running command.
#[derive(Debug)]
pub struct Launched {
    /// Signal delivery.
    pub control: ProcessControl,
    /// Payload delivery.
    pub stdin: StdinFeed,
    /// Standard output chunks.
    pub stdout: StdoutStream,
    /// Exit notification.
    pub exit: ExitSignal,
}

/// Sends signals to the command's process group.
#[derive(Clone, Copy, Debug)]
pub struct ProcessControl {
    pgid: Pid,
}

impl ProcessControl {
    /// Process id of the shell (also the process group id).
    pub fn pid(&self) -> i32 {
        self.pgid.as_raw()
    }

    /// Requests termination (SIGTERM). Safe to repeat.
    pub fn terminate(&self) -> io::Result<()> {
        self.signal(Signal::SIGTERM)
    }

    /// Kills unconditionally (SIGKILL). Safe to repeat.
    pub fn kill(&self) -> io::Result<()> {
        self.signal(Signal::SIGKILL)
    }

    fn signal(&self, sig: Signal) -> io::Result<()> {
        match killpg(self.pgid, sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }
}

/// Resolves once the payload has been written and stdin closed.
///
/// A broken pipe counts as delivered; any other write error is
/// [`LaunchError::Stdin`].
#[derive(Debug)]
pub struct StdinFeed {
    rx: oneshot::Receiver<io::Result<()>>,
}

impl Future for StdinFeed {
    type Output = Result<(), LaunchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| match res {
            Ok(written) => written.map_err(LaunchError::Stdin),
            Err(_) => Err(LaunchError::Unavailable("stdin writer")),
        })
    }
}

/// Standard output of the command, as it is produced.
#[derive(Debug)]
pub struct StdoutStream {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl StdoutStream {
    /// Next chunk, or `None` once the command closed its output.
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

/// Resolves once, when the command has exited and been reaped.
#[derive(Debug)]
pub struct ExitSignal {
    rx: oneshot::Receiver<io::Result<ExitStatus>>,
}

impl Future for ExitSignal {
    type Output = io::Result<ExitStatus>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.unwrap_or_else(|_| Err(io::Error::other("process waiter dropped")))
        })
    }
}

async fn write_payload(
    mut stdin: ChildStdin,
    payload: Vec<u8>,
    pid: i32,
    done: oneshot::Sender<io::Result<()>>,
) {
    let written = async {
        stdin.write_all(&payload).await?;
        stdin.shutdown().await
    }
    .await;
    drop(stdin);
    let written = match written {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            tracing::debug!(pid, "child closed stdin before reading the whole payload");
            Ok(())
        }
        other => other,
    };
    let _ = done.send(written);
}

async fn read_chunks(mut stdout: ChildStdout, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(error = %e, "reading command stdout failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn sh(command: &str) -> ShellCommand {
        ShellCommand::new("/bin/sh", command)
    }

    async fn drain(stdout: &mut StdoutStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stdout.next_chunk().await {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn payload_goes_to_stdin_and_output_is_streamed() {
        let Launched {
            mut stdout, exit, ..
        } = sh("tr '[a-z]' '[A-Z]'").start(b"hello world").await.unwrap();

        assert_eq!(drain(&mut stdout).await, b"HELLO WORLD");
        let status = exit.await.unwrap();
        assert_eq!(status.code(), Some(0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exit_code_is_reported() {
        let Launched {
            mut stdout, exit, ..
        } = sh("exit 3").start(b"").await.unwrap();
        assert!(drain(&mut stdout).await.is_empty());
        assert_eq!(exit.await.unwrap().code(), Some(3));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ignoring_stdin_is_not_a_launch_error() {
        let payload = vec![b'x'; 1 << 20];
        let Launched { exit, stdin, .. } = sh("exit 0").start(&payload).await.unwrap();
        assert_eq!(exit.await.unwrap().code(), Some(0));
        assert!(stdin.await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_does_not_wait_for_the_payload_to_be_read() {
        let payload = vec![b'x'; 1 << 20];
        let started = Instant::now();
        let Launched {
            control,
            mut stdin,
            exit,
            ..
        } = sh("sleep 30").start(&payload).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        // Pipe buffer full, nobody reading: still pending.
        let pending = tokio::time::timeout(Duration::from_millis(200), &mut stdin).await;
        assert!(pending.is_err());

        control.terminate().unwrap();
        assert_eq!(exit.await.unwrap().code(), None);
        assert!(stdin.await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_interpreter_fails_to_spawn() {
        let err = ShellCommand::new("/nonexistent/shell", "true")
            .start(b"")
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn terminate_reaches_the_process_group() {
        let started = Instant::now();
        let Launched {
            control,
            mut stdout,
            exit,
            ..
        } = sh("sleep 30; echo late").start(b"").await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        control.terminate().unwrap();
        control.terminate().unwrap();

        assert!(drain(&mut stdout).await.is_empty());
        let status = exit.await.unwrap();
        assert_eq!(status.code(), None);
        assert!(started.elapsed() < Duration::from_secs(10));
        // Group is gone; further signals are no-ops.
        control.kill().unwrap();
    }
}
