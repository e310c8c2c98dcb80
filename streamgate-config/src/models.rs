use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use streamgate_core::{StaticSources, SupervisorConfig, TranscoderPolicy};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub sessions: SessionsConfig,
    pub ffmpeg: TranscoderPolicy,
    pub sources: SourcesConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Create the output root and make it absolute.
    pub fn ensure_directories(&mut self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.sessions.output_root)?;
        self.sessions.output_root =
            std::fs::canonicalize(&self.sessions.output_root)?;
        Ok(())
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let sessions = &self.sessions;
        SupervisorConfig {
            output_root: sessions.output_root.clone(),
            idle_timeout: sessions.idle_timeout,
            readiness_timeout: sessions.readiness_timeout,
            start_timeout: sessions.start_timeout,
            stop_grace: sessions.stop_grace,
            artifact_poll_interval: sessions.artifact_poll_interval,
            shutdown_timeout: sessions.shutdown_timeout,
            transcoder: self.ffmpeg.clone(),
        }
    }

    pub fn source_registry(&self) -> StaticSources {
        StaticSources::new(
            self.sources.streams.clone().into_iter().collect(),
            self.sources.url_template.clone(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Clone)]
pub struct SessionsConfig {
    pub output_root: PathBuf,
    pub idle_timeout: Duration,
    pub readiness_timeout: Duration,
    pub start_timeout: Duration,
    pub stop_grace: Duration,
    pub artifact_poll_interval: Duration,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct SourcesConfig {
    pub url_template: Option<String>,
    pub streams: BTreeMap<String, String>,
}

impl SourcesConfig {
    pub fn is_empty(&self) -> bool {
        self.url_template.is_none() && self.streams.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
