use std::time::Duration;
use streamgate_core::StreamKey;
use thiserror::Error;

use crate::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("ffmpeg.segment_seconds must be at least 1")]
    InvalidSegmentSeconds,
    #[error("ffmpeg.playlist_size must be at least 1")]
    InvalidPlaylistSize,
    #[error("source template '{template}' does not contain {{key}}")]
    TemplateMissingKey { template: String },
    #[error("configured stream '{key}' is not a valid stream key")]
    InvalidStreamKey { key: String },
    #[error("{field} '{value}' must be a plain file name")]
    InvalidFileName { field: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();
    let sessions = &config.sessions;

    for (field, value) in [
        ("sessions.idle_timeout", sessions.idle_timeout),
        ("sessions.readiness_timeout", sessions.readiness_timeout),
        ("sessions.start_timeout", sessions.start_timeout),
        ("sessions.artifact_poll_interval", sessions.artifact_poll_interval),
    ] {
        if value == Duration::ZERO {
            return Err(ConfigGuardRailError::ZeroDuration { field });
        }
    }

    let ffmpeg = &config.ffmpeg;
    if ffmpeg.segment_seconds == 0 {
        return Err(ConfigGuardRailError::InvalidSegmentSeconds);
    }
    if ffmpeg.playlist_size == 0 {
        return Err(ConfigGuardRailError::InvalidPlaylistSize);
    }
    for (field, value) in [
        ("ffmpeg.playlist_name", &ffmpeg.playlist_name),
        ("ffmpeg.segment_pattern", &ffmpeg.segment_pattern),
    ] {
        if !is_plain_file_name(value) {
            return Err(ConfigGuardRailError::InvalidFileName {
                field,
                value: value.clone(),
            });
        }
    }

    if let Some(template) = &config.sources.url_template
        && !template.contains("{key}")
    {
        return Err(ConfigGuardRailError::TemplateMissingKey {
            template: template.clone(),
        });
    }
    if let Some(key) = config
        .sources
        .streams
        .keys()
        .find(|key| StreamKey::parse(key).is_err())
    {
        return Err(ConfigGuardRailError::InvalidStreamKey { key: key.clone() });
    }

    if config.sources.is_empty() {
        warnings.push_with_hint(
            "No stream sources configured; every request will return 404",
            "Set sources.url_template, add entries under [sources.streams], or export STREAMGATE_SOURCE_TEMPLATE",
        );
    }

    if !ffmpeg.delete_segments {
        warnings.push_with_hint(
            "ffmpeg.delete_segments is false; segments accumulate until the session stops",
            "Enable delete_segments for long-running cameras",
        );
    }

    if sessions.readiness_timeout > sessions.start_timeout {
        warnings.push(format!(
            "sessions.readiness_timeout ({}) exceeds sessions.start_timeout ({}); requests will outwait the start attempt",
            humantime::format_duration(sessions.readiness_timeout),
            humantime::format_duration(sessions.start_timeout),
        ));
    }

    Ok(warnings)
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
}
