use std::path::Path;
use std::time::Duration;
use streamgate_config::{
    ConfigGuardRailError, ConfigLoadError, ConfigLoader, EnvConfig,
};
use streamgate_core::{
    CodecMode, RtspTransport, SourceRegistry, StreamKey,
};

fn env_for(root: &Path, extra: &[(&str, &str)]) -> EnvConfig {
    let mut vars = vec![(
        "STREAMGATE_OUTPUT_ROOT".to_string(),
        root.join("streams").display().to_string(),
    )];
    vars.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    EnvConfig::from_vars(vars)
}

fn write_config(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("streamgate.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn defaults_apply_without_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let load = ConfigLoader::new()
        .load_with_env(env_for(
            dir.path(),
            &[("STREAMGATE_SOURCE_TEMPLATE", "rtsp://nvr.local/{key}")],
        ))
        .unwrap();
    let config = load.config;

    assert_eq!(config.server.port, 8080);
    assert_eq!(config.sessions.idle_timeout, Duration::from_secs(30));
    assert_eq!(config.ffmpeg.rtsp_transport, RtspTransport::Tcp);
    assert_eq!(config.ffmpeg.video, CodecMode::Copy);
    assert_eq!(config.ffmpeg.audio, CodecMode::Encode);
    assert_eq!(config.ffmpeg.segment_seconds, 10);
    assert_eq!(config.ffmpeg.playlist_size, 6);
    assert!(config.ffmpeg.delete_segments);
    assert!(config.sessions.output_root.is_absolute());
    assert!(config.sessions.output_root.exists());
    assert!(config.metadata.config_path.is_none());
    assert!(
        load.warnings
            .iter()
            .any(|w| w.message.contains("No streamgate.toml"))
    );
}

#[test]
fn environment_overrides_file_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
        [server]
        host = "127.0.0.1"
        port = 9000

        [sessions]
        idle_timeout = "2m"
        stop_grace = "750ms"

        [ffmpeg]
        path = "/usr/bin/ffmpeg"
        video = "encode"
        segment_seconds = 4

        [sources.streams]
        lobby = "rtsp://lobby-cam/live"
        "#,
    );

    let config = ConfigLoader::new()
        .with_config_path(&path)
        .load_with_env(env_for(
            dir.path(),
            &[
                ("SERVER_PORT", "9100"),
                ("STREAMGATE_IDLE_TIMEOUT", "45s"),
                ("FFMPEG_PATH", "/opt/ffmpeg"),
            ],
        ))
        .unwrap()
        .config;

    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 9100);
    assert_eq!(config.sessions.idle_timeout, Duration::from_secs(45));
    assert_eq!(config.sessions.stop_grace, Duration::from_millis(750));
    assert_eq!(config.ffmpeg.ffmpeg_path, "/opt/ffmpeg");
    assert_eq!(config.ffmpeg.video, CodecMode::Encode);
    assert_eq!(config.ffmpeg.segment_seconds, 4);
    assert_eq!(config.metadata.config_path.as_deref(), Some(path.as_path()));

    let supervisor = config.supervisor_config();
    assert_eq!(supervisor.idle_timeout, Duration::from_secs(45));
    assert_eq!(supervisor.transcoder.segment_seconds, 4);

    let sources = config.source_registry();
    let lobby = StreamKey::parse("lobby").unwrap();
    assert_eq!(
        sources.resolve(&lobby).unwrap().as_str(),
        "rtsp://lobby-cam/live"
    );
    assert!(sources.resolve(&StreamKey::parse("7").unwrap()).is_none());
}

#[test]
fn missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ConfigLoader::new()
        .with_config_path(dir.path().join("absent.toml"))
        .load_with_env(env_for(dir.path(), &[]))
        .unwrap_err();

    assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
}

#[test]
fn config_path_from_environment_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml").display().to_string();
    let err = ConfigLoader::new()
        .load_with_env(env_for(dir.path(), &[("STREAMGATE_CONFIG", missing.as_str())]))
        .unwrap_err();

    assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
}

#[test]
fn bad_duration_names_the_field() {
    let dir = tempfile::tempdir().unwrap();
    let err = ConfigLoader::new()
        .load_with_env(env_for(
            dir.path(),
            &[("STREAMGATE_READINESS_TIMEOUT", "soon")],
        ))
        .unwrap_err();

    match err {
        ConfigLoadError::InvalidDuration { field, value, .. } => {
            assert_eq!(field, "sessions.readiness_timeout");
            assert_eq!(value, "soon");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn guard_rails_reject_unusable_settings() {
    let dir = tempfile::tempdir().unwrap();

    let err = ConfigLoader::new()
        .load_with_env(env_for(
            dir.path(),
            &[("STREAMGATE_IDLE_TIMEOUT", "0s")],
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::ZeroDuration {
            field: "sessions.idle_timeout"
        })
    ));

    let err = ConfigLoader::new()
        .load_with_env(env_for(
            dir.path(),
            &[("STREAMGATE_SOURCE_TEMPLATE", "rtsp://nvr.local/camera")],
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::TemplateMissingKey { .. })
    ));

    let path = write_config(
        dir.path(),
        "[ffmpeg]\nplaylist_size = 0\n",
    );
    let err = ConfigLoader::new()
        .with_config_path(&path)
        .load_with_env(env_for(dir.path(), &[]))
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::InvalidPlaylistSize)
    ));

    let path = write_config(
        dir.path(),
        "[sources.streams]\n\"../escape\" = \"rtsp://x/y\"\n",
    );
    let err = ConfigLoader::new()
        .with_config_path(&path)
        .load_with_env(env_for(dir.path(), &[]))
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::InvalidStreamKey { .. })
    ));
}

#[test]
fn empty_sources_only_warn() {
    let dir = tempfile::tempdir().unwrap();
    let load = ConfigLoader::new()
        .load_with_env(env_for(dir.path(), &[]))
        .unwrap();

    assert!(load.config.sources.is_empty());
    assert!(
        load.warnings
            .iter()
            .any(|w| w.message.contains("No stream sources configured"))
    );
}

#[test]
fn malformed_toml_reports_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "[server\nport = ");
    let err = ConfigLoader::new()
        .with_config_path(&path)
        .load_with_env(env_for(dir.path(), &[]))
        .unwrap_err();

    match err {
        ConfigLoadError::Parse { path: reported, .. } => {
            assert_eq!(reported, path)
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn env_file_values_reach_the_config() {
    let dir = tempfile::tempdir().unwrap();
    let env_file = dir.path().join("streamgate.env");
    std::fs::write(
        &env_file,
        format!(
            "STREAMGATE_OUTPUT_ROOT={}\nSTREAMGATE_IDLE_TIMEOUT=45s\n",
            dir.path().join("from-env").display()
        ),
    )
    .unwrap();
    let config_path = write_config(
        dir.path(),
        r#"
        [sources.streams]
        lobby = "rtsp://10.0.0.12/live"
        "#,
    );

    let load = ConfigLoader::new()
        .with_config_path(&config_path)
        .with_env_file(&env_file)
        .load()
        .unwrap();
    let config = load.config;

    assert!(config.metadata.env_file_loaded);
    assert_eq!(config.metadata.config_path, Some(config_path));
    assert_eq!(config.sessions.idle_timeout, Duration::from_secs(45));
    assert!(config.sessions.output_root.ends_with("from-env"));
}
