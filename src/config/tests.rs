use clap::Parser;
use serial_test::serial;

use super::*;

#[test]
fn defaults_resolve_without_any_source() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.origin.as_str(), "http://127.0.0.1:5000/");
    assert_eq!(settings.realtime.url.as_str(), "ws://127.0.0.1:5000/ws");
    assert!(settings.realtime.reconnect);
    assert_eq!(settings.realtime.reconnect_interval, DEFAULT_RECONNECT_INTERVAL);
    assert_eq!(settings.realtime.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
    assert_eq!(settings.http.timeout, Duration::from_secs(15));
    assert_eq!(settings.ad_intensity.refetch_interval, Duration::from_secs(30));
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(settings.viewer.is_none());
}

#[test]
fn https_origin_yields_secure_socket() {
    let mut raw = RawSettings::default();
    raw.server.origin = Some("https://manga.example/library?tab=1".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.realtime.url.as_str(), "wss://manga.example/ws");
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.origin = Some("http://from-file:5000".to_string());
    raw.logging.level = Some("info".to_string());

    let overrides = GlobalOverrides {
        origin: Some("https://from-cli".to_string()),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_global_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.origin.host_str(), Some("from-cli"));
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = GlobalOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_global_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn watch_overrides_apply_to_realtime() {
    let mut raw = RawSettings::default();
    raw.apply_watch_overrides(&WatchArgs {
        reconnect: Some(false),
        reconnect_interval_ms: Some(250),
        heartbeat_interval_ms: None,
        ws_path: Some("/notifications".to_string()),
    });

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(!settings.realtime.reconnect);
    assert_eq!(settings.realtime.reconnect_interval, Duration::from_millis(250));
    assert_eq!(settings.realtime.url.path(), "/notifications");
}

#[test]
fn zero_intervals_are_rejected() {
    let mut raw = RawSettings::default();
    raw.realtime.heartbeat_interval_ms = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero heartbeat");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "realtime.heartbeat_interval_ms",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.http.timeout_secs = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn non_http_origin_is_rejected() {
    let mut raw = RawSettings::default();
    raw.server.origin = Some("ftp://manga.example".to_string());

    let err = Settings::from_raw(raw).expect_err("ftp origin");
    assert!(matches!(err, LoadError::Invalid { key: "server.origin", .. }));
}

#[test]
fn viewer_requires_user_id() {
    let mut raw = RawSettings::default();
    raw.viewer.username = Some("reader".to_string());
    assert!(
        Settings::from_raw(raw)
            .expect("valid settings")
            .viewer
            .is_none()
    );

    let mut raw = RawSettings::default();
    raw.viewer.user_id = Some("u1".to_string());
    raw.viewer.role = Some("Staff".to_string());
    let viewer = Settings::from_raw(raw)
        .expect("valid settings")
        .viewer
        .expect("viewer");
    assert_eq!(viewer.id, "u1");
    assert_eq!(viewer.role, Role::Staff);
}

#[test]
fn unknown_role_is_rejected() {
    let mut raw = RawSettings::default();
    raw.viewer.user_id = Some("u1".to_string());
    raw.viewer.role = Some("moderator".to_string());

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "viewer.role", .. })
    ));
}

#[test]
fn default_command_is_none() {
    let args = CliArgs::parse_from(["mangasync"]);
    assert!(args.command.is_none());
}

#[test]
fn parse_comment_post_arguments() {
    let args = CliArgs::parse_from([
        "mangasync",
        "comments",
        "post",
        "--series",
        "s1",
        "Great chapter",
        "--as-user",
        "u1",
    ]);

    assert_eq!(args.overrides.user_id.as_deref(), Some("u1"));
    match args.command.expect("comments command") {
        Command::Comments(CommentsArgs {
            command: CommentsCommand::Post(post),
        }) => {
            assert_eq!(post.thread.series.as_deref(), Some("s1"));
            assert!(post.thread.chapter.is_none());
            assert_eq!(post.content, "Great chapter");
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn comment_thread_requires_exactly_one_target() {
    assert!(CliArgs::try_parse_from(["mangasync", "comments", "list"]).is_err());
    assert!(
        CliArgs::try_parse_from([
            "mangasync",
            "comments",
            "list",
            "--series",
            "s1",
            "--chapter",
            "c1",
        ])
        .is_err()
    );
}

#[test]
fn parse_delete_with_confirmation_flag() {
    let args = CliArgs::parse_from([
        "mangasync", "comments", "delete", "--chapter", "c9", "cm-1", "--yes",
    ]);

    match args.command.expect("comments command") {
        Command::Comments(CommentsArgs {
            command: CommentsCommand::Delete(delete),
        }) => {
            assert_eq!(delete.thread.chapter.as_deref(), Some("c9"));
            assert_eq!(delete.comment_id, "cm-1");
            assert!(delete.yes);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
#[serial]
fn environment_overrides_file_defaults() {
    // SAFETY: serialized with every other test touching the process environment.
    unsafe {
        std::env::set_var("MANGASYNC__SERVER__ORIGIN", "https://env.example");
        std::env::set_var("MANGASYNC__REALTIME__RECONNECT_INTERVAL_MS", "2500");
    }

    let cli = CliArgs::parse_from(["mangasync", "watch"]);
    let result = load(&cli);

    unsafe {
        std::env::remove_var("MANGASYNC__SERVER__ORIGIN");
        std::env::remove_var("MANGASYNC__REALTIME__RECONNECT_INTERVAL_MS");
    }

    let settings = result.expect("valid settings");
    assert_eq!(settings.server.origin.host_str(), Some("env.example"));
    assert_eq!(settings.realtime.url.scheme(), "wss");
    assert_eq!(settings.realtime.reconnect_interval, Duration::from_millis(2500));
}

#[test]
#[serial]
fn cli_beats_environment() {
    // SAFETY: serialized with every other test touching the process environment.
    unsafe {
        std::env::set_var("MANGASYNC__SERVER__ORIGIN", "https://env.example");
    }

    let cli = CliArgs::parse_from(["mangasync", "--origin", "http://cli.example", "sections", "pinned"]);
    let result = load(&cli);

    unsafe {
        std::env::remove_var("MANGASYNC__SERVER__ORIGIN");
    }

    let settings = result.expect("valid settings");
    assert_eq!(settings.server.origin.host_str(), Some("cli.example"));
}
