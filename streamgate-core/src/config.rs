use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Transport used for the RTSP input connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtspTransport {
    Tcp,
    Udp,
}

impl RtspTransport {
    pub fn as_arg(&self) -> &'static str {
        match self {
            RtspTransport::Tcp => "tcp",
            RtspTransport::Udp => "udp",
        }
    }
}

/// Whether a track is copied as-is or re-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecMode {
    Copy,
    Encode,
}

/// Fixed ffmpeg policy applied to every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderPolicy {
    /// FFmpeg binary path
    pub ffmpeg_path: String,
    pub rtsp_transport: RtspTransport,
    pub video: CodecMode,
    pub audio: CodecMode,
    /// Target segment duration in seconds
    pub segment_seconds: u32,
    /// Number of segments kept in the live playlist
    pub playlist_size: u32,
    /// Delete segments that fall out of the playlist window
    pub delete_segments: bool,
    pub playlist_name: String,
    /// Segment file name pattern, `%d` is replaced by the sequence number
    pub segment_pattern: String,
}

impl Default for TranscoderPolicy {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            rtsp_transport: RtspTransport::Tcp,
            video: CodecMode::Copy,
            audio: CodecMode::Encode,
            segment_seconds: 10,
            playlist_size: 6,
            delete_segments: true,
            playlist_name: "index.m3u8".to_string(),
            segment_pattern: "segment%d.ts".to_string(),
        }
    }
}

/// Timing and placement knobs for the session supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Directory holding one output directory per live stream
    pub output_root: PathBuf,
    /// Stop a session after this long without access
    pub idle_timeout: Duration,
    /// How long a request waits for a session to become ready
    pub readiness_timeout: Duration,
    /// Stop a session that has not confirmed output within this window
    pub start_timeout: Duration,
    /// Time between the graceful stop request and a forced kill
    pub stop_grace: Duration,
    /// Polling interval while waiting for the first playlist write
    pub artifact_poll_interval: Duration,
    /// Upper bound on `shutdown` waiting for sessions to drain
    pub shutdown_timeout: Duration,
    pub transcoder: TranscoderPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("./cache/streams"),
            idle_timeout: Duration::from_secs(30),
            readiness_timeout: Duration::from_secs(10),
            start_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(5),
            artifact_poll_interval: Duration::from_millis(250),
            shutdown_timeout: Duration::from_secs(15),
            transcoder: TranscoderPolicy::default(),
        }
    }
}
