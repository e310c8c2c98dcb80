use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, trace, warn};

use super::{
    Launcher, ProcessDriver, ProcessEvent, ProcessHandle, ProcessSignal,
    ProgressSnapshot, TranscoderInvocation,
};
use crate::config::CodecMode;
use crate::error::SessionError;

/// Lines of stderr kept for failure reports
const STDERR_TAIL: usize = 20;

/// Launches ffmpeg to pull a live source into a rolling HLS playlist.
#[derive(Debug, Clone, Default)]
pub struct FfmpegLauncher;

impl FfmpegLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Launcher for FfmpegLauncher {
    async fn launch(
        &self,
        invocation: &TranscoderInvocation,
    ) -> Result<ProcessHandle, SessionError> {
        tokio::fs::create_dir_all(&invocation.paths.output_dir)
            .await
            .map_err(|e| {
                SessionError::Spawn(format!(
                    "failed to create {}: {e}",
                    invocation.paths.output_dir.display()
                ))
            })?;

        let mut cmd = build_ffmpeg_command(invocation);
        info!(key = %invocation.key, "Starting FFmpeg with command: {:?}", cmd);

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SessionError::Spawn(format!(
                    "failed to spawn {}: {e}",
                    invocation.policy.ffmpeg_path
                ))
            })?;

        let pid = child.id();
        let (handle, driver) = ProcessHandle::pair(pid);
        let key = invocation.key.to_string();

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(
            STDERR_TAIL,
        )));
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = stderr_tail.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut buf = Vec::new();
                // Drain to EOF; a closed pipe would kill ffmpeg with SIGPIPE.
                loop {
                    let line = match read_line_lossy(&mut reader, &mut buf).await {
                        Ok(Some(line)) => line,
                        Ok(None) => break,
                        Err(e) => {
                            debug!(key = %key, "stopped reading ffmpeg stderr: {}", e);
                            break;
                        }
                    };
                    trace!(key = %key, "ffmpeg: {}", line);
                    let mut tail = tail.lock();
                    if tail.len() == STDERR_TAIL {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            })
        });

        tokio::spawn(async move {
            let mut driver = driver;
            let status = drive_process(&mut child, &mut driver, &key).await;
            if let Some(task) = stderr_task {
                let _ = tokio::time::timeout(Duration::from_millis(500), task)
                    .await;
            }

            let event = match status {
                Ok(status) if status.success() => {
                    info!(key = %key, "FFmpeg finished");
                    ProcessEvent::Ended
                }
                Ok(status) => {
                    let tail = stderr_tail
                        .lock()
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join("\n");
                    warn!(key = %key, "FFmpeg exited with {}: {}", status, tail);
                    ProcessEvent::Failed(format!(
                        "ffmpeg exited with {status}: {tail}"
                    ))
                }
                Err(e) => {
                    warn!(key = %key, "Failed to wait on FFmpeg: {}", e);
                    ProcessEvent::Failed(e.to_string())
                }
            };
            driver.emit(event).await;
        });

        Ok(handle)
    }
}

/// Pump progress output and control signals until the child exits.
async fn drive_process(
    child: &mut Child,
    driver: &mut ProcessDriver,
    key: &str,
) -> std::io::Result<ExitStatus> {
    let mut stdin = child.stdin.take();
    let mut progress = child.stdout.take().map(BufReader::new);
    let mut progress_buf = Vec::new();
    let mut parser = ProgressParser::default();
    let mut started = false;
    let mut signals_open = true;

    loop {
        tokio::select! {
            status = child.wait() => return status,

            line = next_progress_line(&mut progress, &mut progress_buf), if progress.is_some() => {
                let Some(line) = line else {
                    progress = None;
                    continue;
                };
                let Some(snapshot) = parser.push(&line) else {
                    continue;
                };
                if !started && snapshot.has_output() {
                    started = true;
                    info!(key = %key, "FFmpeg started producing output");
                    driver.emit(ProcessEvent::Started).await;
                }
                if started {
                    driver.try_emit(ProcessEvent::Progress(snapshot));
                }
            }

            signal = driver.next_signal(), if signals_open => match signal {
                Some(ProcessSignal::Terminate) => {
                    debug!(key = %key, "Asking FFmpeg to quit");
                    match stdin.take() {
                        Some(mut pipe) => {
                            if let Err(e) = pipe.write_all(b"q").await {
                                warn!(key = %key, "Failed to write quit to FFmpeg: {}", e);
                                let _ = child.start_kill();
                            }
                        }
                        None => {
                            let _ = child.start_kill();
                        }
                    }
                }
                Some(ProcessSignal::Kill) => {
                    warn!(key = %key, "Killing FFmpeg");
                    let _ = child.start_kill();
                }
                None => {
                    signals_open = false;
                    let _ = child.start_kill();
                }
            },
        }
    }
}

async fn next_progress_line(
    reader: &mut Option<BufReader<ChildStdout>>,
    buf: &mut Vec<u8>,
) -> Option<String> {
    match reader {
        Some(reader) => read_line_lossy(reader, buf).await.ok().flatten(),
        None => None,
    }
}

/// Read one `\n`-terminated line, replacing invalid UTF-8 instead of
/// failing. Returns `None` at EOF.
///
/// Cancel-safe as long as the same `buf` is passed back in: bytes of a
/// partially read line stay in it and the next call continues the line.
async fn read_line_lossy<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    reader.read_until(b'\n', buf).await?;
    if buf.is_empty() {
        return Ok(None);
    }

    let line = String::from_utf8_lossy(buf)
        .trim_end_matches(['\r', '\n'])
        .to_string();
    buf.clear();
    Ok(Some(line))
}

/// Accumulates `-progress` key/value lines into snapshots.
#[derive(Debug, Default)]
pub struct ProgressParser {
    current: ProgressSnapshot,
}

impl ProgressParser {
    /// Feed one line; returns a snapshot when a block is complete.
    pub fn push(&mut self, line: &str) -> Option<ProgressSnapshot> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();

        match key {
            "frame" => self.current.frame = value.parse().ok(),
            "fps" => self.current.fps = value.parse().ok(),
            "out_time_us" => {
                self.current.out_time_ms =
                    value.parse::<u64>().ok().map(|us| us / 1000);
            }
            "total_size" => self.current.total_size = value.parse().ok(),
            "speed" => {
                self.current.speed =
                    value.trim_end_matches('x').trim().parse().ok();
            }
            "progress" => return Some(std::mem::take(&mut self.current)),
            _ => {}
        }
        None
    }
}

/// Argument vector for one conversion.
pub fn ffmpeg_args(invocation: &TranscoderInvocation) -> Vec<OsString> {
    let policy = &invocation.policy;
    let mut args: Vec<OsString> = Vec::new();
    let mut push = |value: &str| args.push(OsString::from(value));

    push("-hide_banner");
    push("-nostats");
    push("-loglevel");
    push("warning");
    push("-y");

    if invocation.source.as_str().starts_with("rtsp") {
        push("-rtsp_transport");
        push(policy.rtsp_transport.as_arg());
    }
    push("-i");
    push(invocation.source.as_str());

    match policy.video {
        CodecMode::Copy => {
            push("-c:v");
            push("copy");
        }
        CodecMode::Encode => {
            push("-c:v");
            push("libx264");
            push("-preset");
            push("veryfast");
            push("-tune");
            push("zerolatency");
            // Keyframe on every segment boundary
            push("-force_key_frames");
            push(&format!("expr:gte(t,n_forced*{})", policy.segment_seconds));
        }
    }

    match policy.audio {
        CodecMode::Copy => {
            push("-c:a");
            push("copy");
        }
        CodecMode::Encode => {
            push("-c:a");
            push("aac");
        }
    }

    push("-f");
    push("hls");
    push("-hls_time");
    push(&policy.segment_seconds.to_string());
    push("-hls_list_size");
    push(&policy.playlist_size.to_string());
    if policy.delete_segments {
        push("-hls_flags");
        push("delete_segments");
    }

    push("-progress");
    push("pipe:1");

    args.push(OsString::from("-hls_segment_filename"));
    args.push(invocation.paths.segment_pattern.clone().into_os_string());
    args.push(invocation.paths.playlist.clone().into_os_string());

    args
}

pub fn build_ffmpeg_command(invocation: &TranscoderInvocation) -> Command {
    let mut cmd = Command::new(&invocation.policy.ffmpeg_path);
    cmd.args(ffmpeg_args(invocation));
    cmd
}
