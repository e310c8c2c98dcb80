use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use streamgate_core::{CodecMode, RtspTransport};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub sessions: FileSessionsConfig,
    #[serde(default)]
    pub ffmpeg: FileFfmpegConfig,
    #[serde(default)]
    pub sources: FileSourcesConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Durations are strings in humantime syntax, e.g. `"30s"` or `"1m 30s"`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSessionsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_grace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_poll_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileFfmpegConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtsp_transport: Option<RtspTransport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<CodecMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<CodecMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_segments: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_pattern: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileSourcesConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_template: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub streams: BTreeMap<String, String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub output_root: Option<PathBuf>,
    pub idle_timeout: Option<String>,
    pub readiness_timeout: Option<String>,
    pub ffmpeg_path: Option<String>,
    pub source_template: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build from an explicit variable list instead of the process
    /// environment.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let var = |name: &str| {
            vars.get(name)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        Self {
            config_path: var("STREAMGATE_CONFIG").map(PathBuf::from),
            server_host: var("SERVER_HOST"),
            server_port: var("SERVER_PORT").and_then(|s| s.parse().ok()),
            output_root: var("STREAMGATE_OUTPUT_ROOT").map(PathBuf::from),
            idle_timeout: var("STREAMGATE_IDLE_TIMEOUT"),
            readiness_timeout: var("STREAMGATE_READINESS_TIMEOUT"),
            ffmpeg_path: var("FFMPEG_PATH"),
            source_template: var("STREAMGATE_SOURCE_TEMPLATE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_malformed_values_are_ignored() {
        let env = EnvConfig::from_vars([
            ("SERVER_HOST", "  "),
            ("SERVER_PORT", "not-a-port"),
            ("FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg"),
            ("STREAMGATE_IDLE_TIMEOUT", "45s"),
        ]);

        assert_eq!(env.server_host, None);
        assert_eq!(env.server_port, None);
        assert_eq!(env.ffmpeg_path.as_deref(), Some("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(env.idle_timeout.as_deref(), Some("45s"));
    }

    #[test]
    fn file_config_parses_all_sections() {
        let raw = r#"
            [server]
            port = 8090

            [sessions]
            idle_timeout = "45s"

            [ffmpeg]
            rtsp_transport = "udp"
            video = "encode"

            [sources]
            url_template = "rtsp://nvr.local/{key}"

            [sources.streams]
            lobby = "rtsp://lobby-cam/live"
        "#;

        let file: FileConfig = toml::from_str(raw).unwrap();
        assert_eq!(file.server.port, Some(8090));
        assert_eq!(file.sessions.idle_timeout.as_deref(), Some("45s"));
        assert_eq!(file.ffmpeg.rtsp_transport, Some(RtspTransport::Udp));
        assert_eq!(file.ffmpeg.video, Some(CodecMode::Encode));
        assert_eq!(file.sources.streams["lobby"], "rtsp://lobby-cam/live");
    }
}
