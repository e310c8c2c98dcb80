use once_cell::sync::Lazy;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use streamgate_core::TranscoderPolicy;
use thiserror::Error;
use tracing::debug;

use crate::models::{
    Config, ConfigMetadata, ServerConfig, SessionsConfig, SourcesConfig,
};
use crate::sources::{EnvConfig, FileConfig};
use crate::validation::{self, ConfigGuardRailError, ConfigWarnings};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("streamgate.toml"),
        PathBuf::from("config/streamgate.toml"),
    ]
});

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Load `.env`, then the process environment, then the config file.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        let mut load = self.load_with_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Same as [`ConfigLoader::load`] but with an explicit environment and
    /// no `.env` handling.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        self.compose_config(file_config, env, config_path)
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(path) => path.clone(),
                None => return Ok((None, None)),
            },
        };

        let contents =
            fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
                path: path.clone(),
                source: err,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                path: path.clone(),
                source: err,
            })?;

        debug!(path = %path.display(), "loaded configuration file");
        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file_config: Option<FileConfig>,
        env: EnvConfig,
        config_path: Option<PathBuf>,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if file_config.is_none() {
            warnings.push_with_hint(
                "No streamgate.toml detected; falling back to environment variables",
                "Pass --config or set STREAMGATE_CONFIG to point at a configuration file",
            );
        }

        let FileConfig {
            server: file_server,
            sessions: file_sessions,
            ffmpeg: file_ffmpeg,
            sources: file_sources,
        } = file_config.unwrap_or_default();

        let server = ServerConfig {
            host: env
                .server_host
                .clone()
                .or(file_server.host)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.server_port.or(file_server.port).unwrap_or(8080),
        };

        let sessions = SessionsConfig {
            output_root: env
                .output_root
                .clone()
                .or(file_sessions.output_root)
                .unwrap_or_else(|| PathBuf::from("./cache/streams")),
            idle_timeout: duration(
                "sessions.idle_timeout",
                env.idle_timeout.clone().or(file_sessions.idle_timeout),
                Duration::from_secs(30),
            )?,
            readiness_timeout: duration(
                "sessions.readiness_timeout",
                env.readiness_timeout
                    .clone()
                    .or(file_sessions.readiness_timeout),
                Duration::from_secs(10),
            )?,
            start_timeout: duration(
                "sessions.start_timeout",
                file_sessions.start_timeout,
                Duration::from_secs(30),
            )?,
            stop_grace: duration(
                "sessions.stop_grace",
                file_sessions.stop_grace,
                Duration::from_secs(5),
            )?,
            artifact_poll_interval: duration(
                "sessions.artifact_poll_interval",
                file_sessions.artifact_poll_interval,
                Duration::from_millis(250),
            )?,
            shutdown_timeout: duration(
                "sessions.shutdown_timeout",
                file_sessions.shutdown_timeout,
                Duration::from_secs(15),
            )?,
        };

        let defaults = TranscoderPolicy::default();
        let ffmpeg = TranscoderPolicy {
            ffmpeg_path: env
                .ffmpeg_path
                .clone()
                .or(file_ffmpeg.path)
                .unwrap_or(defaults.ffmpeg_path),
            rtsp_transport: file_ffmpeg
                .rtsp_transport
                .unwrap_or(defaults.rtsp_transport),
            video: file_ffmpeg.video.unwrap_or(defaults.video),
            audio: file_ffmpeg.audio.unwrap_or(defaults.audio),
            segment_seconds: file_ffmpeg
                .segment_seconds
                .unwrap_or(defaults.segment_seconds),
            playlist_size: file_ffmpeg
                .playlist_size
                .unwrap_or(defaults.playlist_size),
            delete_segments: file_ffmpeg
                .delete_segments
                .unwrap_or(defaults.delete_segments),
            playlist_name: file_ffmpeg
                .playlist_name
                .unwrap_or(defaults.playlist_name),
            segment_pattern: file_ffmpeg
                .segment_pattern
                .unwrap_or(defaults.segment_pattern),
        };

        let sources = SourcesConfig {
            url_template: env.source_template.clone().or(file_sources.url_template),
            streams: file_sources.streams,
        };

        let mut config = Config {
            server,
            sessions,
            ffmpeg,
            sources,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded: false,
            },
        };

        let guard_warnings = validation::apply_guard_rails(&config)?;
        warnings.extend(guard_warnings);

        let output_root = config.sessions.output_root.clone();
        config.ensure_directories().map_err(|source| {
            ConfigLoadError::Filesystem {
                path: output_root,
                source,
            }
        })?;

        Ok(ConfigLoad { config, warnings })
    }
}

fn duration(
    field: &'static str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    match raw {
        Some(value) => humantime::parse_duration(&value).map_err(|source| {
            ConfigLoadError::InvalidDuration {
                field,
                value,
                source,
            }
        }),
        None => Ok(default),
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid duration for {field}: '{value}'")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("failed to prepare output directory {path}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
