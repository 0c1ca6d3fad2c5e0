/**
 * exiftool session: one persistent `-stay_open` process and its line protocol
 *
 * Request frame (one argument per line):
 *
 * ```text
 * -json
 * /path/to/file
 * -execute
 * ```
 *
 * exiftool answers with a JSON array followed by a `{ready}` line.
 */

use log::{debug, warn};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::exif::RawRecord;

pub const READY_SENTINEL: &[u8] = b"{ready}";
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How to launch the metadata engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl EngineCommand {
    /// `program -stay_open True -@ -`
    pub fn exiftool(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: ["-stay_open", "True", "-@", "-"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for EngineCommand {
    fn default() -> Self {
        Self::exiftool("exiftool")
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to open exiftool {0} pipe")]
    MissingPipe(&'static str),
    #[error("path cannot be passed to exiftool: {0:?}")]
    InvalidPath(PathBuf),
    #[error("failed to write request: {0}")]
    Write(#[source] io::Error),
    #[error("failed to read response: {0}")]
    Read(#[source] io::Error),
    #[error("exiftool returned EOF prematurely")]
    EndOfStream,
    #[error("malformed exiftool response: {source}")]
    Malformed {
        payload: String,
        #[source]
        source: serde_json::Error,
    },
}

impl SessionError {
    /// Whether the session can no longer be used. Once a write or read
    /// fails the stream position is unknown (a broken pipe means the engine
    /// is gone), so only a fresh process would help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::EndOfStream | SessionError::Read(_) | SessionError::Write(_)
        )
    }
}

/// Write one request frame and flush it.
pub async fn write_request<W>(writer: &mut W, paths: &[&Path]) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut frame = String::from("-json\n");
    for path in paths {
        let line = path
            .to_str()
            .filter(|s| !s.contains(['\n', '\r']))
            .ok_or_else(|| SessionError::InvalidPath(path.to_path_buf()))?;
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push_str("-execute\n");

    writer
        .write_all(frame.as_bytes())
        .await
        .map_err(SessionError::Write)?;
    writer.flush().await.map_err(SessionError::Write)
}

/// Read lines up to the `{ready}` sentinel and return everything before it.
pub async fn read_response<R>(reader: &mut R) -> Result<Vec<u8>, SessionError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut payload = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(SessionError::Read)?;
        if n == 0 {
            return Err(SessionError::EndOfStream);
        }
        if is_sentinel(&line) {
            return Ok(payload);
        }
        payload.extend_from_slice(&line);
    }
}

fn is_sentinel(line: &[u8]) -> bool {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    line == READY_SENTINEL
}

pub fn decode_records(payload: &[u8]) -> Result<Vec<RawRecord>, SessionError> {
    serde_json::from_slice(payload).map_err(|source| SessionError::Malformed {
        payload: String::from_utf8_lossy(payload).into_owned(),
        source,
    })
}

pub struct Session {
    id: usize,
    pid: Option<u32>,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr_task: JoinHandle<()>,
    shutdown_grace: Duration,
}

impl Session {
    /// Start the engine in its own process group. Must be called from within
    /// a tokio runtime.
    pub fn spawn(
        id: usize,
        engine: &EngineCommand,
        shutdown_grace: Duration,
    ) -> Result<Self, SessionError> {
        let mut command = Command::new(&engine.program);
        command
            .args(&engine.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| SessionError::Spawn {
            program: engine.to_string(),
            source,
        })?;
        let stdin = child.stdin.take().ok_or(SessionError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(SessionError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(SessionError::MissingPipe("stderr"))?;
        let pid = child.id();

        debug!(session = id, pid:? = pid; "started {}", engine);

        Ok(Self {
            id,
            pid,
            child,
            stdin,
            stdout: BufReader::new(stdout),
            stderr_task: forward_stderr(id, stderr),
            shutdown_grace,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Batch request: every record exiftool returns, in its order.
    pub async fn request(&mut self, paths: &[&Path]) -> Result<Vec<RawRecord>, SessionError> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        write_request(&mut self.stdin, paths).await?;
        let payload = read_response(&mut self.stdout).await?;
        decode_records(&payload)
    }

    /// Single-file request: the first record, if any.
    pub async fn extract(&mut self, path: &Path) -> Result<Option<RawRecord>, SessionError> {
        Ok(self.request(&[path]).await?.into_iter().next())
    }

    /// Leave stay-open mode and wait for the process, killing its process
    /// group once the grace period runs out. Consumes the session.
    pub async fn shutdown(self) -> Option<ExitStatus> {
        let Session {
            id,
            pid,
            mut child,
            mut stdin,
            stdout,
            mut stderr_task,
            shutdown_grace,
        } = self;

        if let Err(e) = disable_stay_open(&mut stdin).await {
            warn!(session = id; "failed to leave stay_open mode: {}", e);
        }
        drop(stdin);
        drop(stdout);

        let status = match timeout(shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!(session = id; "failed to wait for exiftool: {}", e);
                None
            }
            Err(_) => {
                warn!(session = id; "exiftool did not exit within {:?}, killing it", shutdown_grace);
                kill_process_group(id, pid);
                if let Err(e) = child.kill().await {
                    warn!(session = id; "failed to kill exiftool: {}", e);
                }
                child.try_wait().ok().flatten()
            }
        };
        debug!(session = id, status:? = status; "exiftool stopped");

        if timeout(shutdown_grace, &mut stderr_task).await.is_err() {
            stderr_task.abort();
        }
        status
    }
}

async fn disable_stay_open(stdin: &mut ChildStdin) -> io::Result<()> {
    stdin.write_all(b"-stay_open\nFalse\n").await?;
    stdin.flush().await
}

fn forward_stderr(id: usize, stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => warn!(target: "exiftool", session = id; "{}", line),
                Ok(None) => break,
                Err(e) => {
                    debug!(session = id; "stopped reading exiftool stderr: {}", e);
                    break;
                }
            }
        }
    })
}

#[cfg(unix)]
fn kill_process_group(id: usize, pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        debug!(session = id; "killpg({}) failed: {}", pgid, e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_id: usize, _pid: Option<u32>) {}

/// A shell script that speaks the stay-open protocol, for tests.
///
/// File names steer the reply: `crash` exits mid-response, `garbage` answers
/// with invalid JSON, `nodate` has no timestamp fields, `fallback` only has
/// `CreateDate` + `TimeZone`, `slow` sleeps before answering, `last` exits
/// right after its reply. Anything else
/// gets `SubSecDateTimeOriginal` 2023:05:10 14:22:01.500-07:00.
#[cfg(all(test, unix))]
pub(crate) mod fake_engine {
    use super::EngineCommand;
    use std::path::Path;

    const SCRIPT: &str = r##"files=""
while IFS= read -r line; do
  case "$line" in
    -json|-stay_open) ;;
    False) exit 0 ;;
    -execute)
      case "$files" in
        *crash*) printf '[{"SourceFile":'; exit 3 ;;
        *garbage*) printf 'not json\n{ready}\n'; files=""; continue ;;
        *slow*) sleep 5 ;;
      esac
      echo "handled $files" >&2
      printf '['
      printf '%s' "$files" | {
        sep=""
        while IFS= read -r f; do
          case "$f" in
            *nodate*) printf '%s{"SourceFile":"%s"}' "$sep" "$f" ;;
            *fallback*) printf '%s{"SourceFile":"%s","CreateDate":"2023:05:10 14:22:01","TimeZone":"-07:00"}' "$sep" "$f" ;;
            *) printf '%s{"SourceFile":"%s",\n"SubSecDateTimeOriginal":"2023:05:10 14:22:01.500-07:00"}' "$sep" "$f" ;;
          esac
          sep=","
        done
      }
      printf ']\n{ready}\n'
      case "$files" in *last*) exit 0 ;; esac
      files=""
      ;;
    *) files="$files$line
" ;;
  esac
done
"##;

    pub(crate) fn install(dir: &Path) -> EngineCommand {
        let script = dir.join("fake-exiftool.sh");
        std::fs::write(&script, SCRIPT).unwrap();
        EngineCommand {
            program: "sh".into(),
            args: vec![script.to_string_lossy().into_owned()],
        }
    }
}
