use core_runtime::logging::{
    init_logging, redact_if_sensitive, strip_path, LogFormat, LogLevel, LoggingConfig,
};
use core_runtime::Error;

// A global subscriber can be installed once per process; both attempts
// share this test.
#[test]
fn test_second_init_is_rejected() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_thread_info(true);

    init_logging(config.clone()).unwrap();
    tracing::debug!(
        url = %redact_if_sensitive("url", "/music/fire.ogg"),
        collection_id = "localCollection",
        "Track updated"
    );

    assert!(matches!(init_logging(config), Err(Error::Logging(_))));
}

#[test]
fn test_location_fields_keep_basename() {
    let cases = [
        ("url", "/home/listener/Music/Elements/02 Water.ogg", "02 Water.ogg"),
        ("rpath", "./Music/fire.mp3", "fire.mp3"),
        ("cover_path", "/covers/ab12cd", "ab12cd"),
        ("Location", "D:\\Music\\wind.flac", "wind.flac"),
    ];
    for (field, value, expected) in cases {
        assert_eq!(redact_if_sensitive(field, value), expected, "{field}");
    }
}

#[test]
fn test_secrets_and_plain_fields() {
    assert_eq!(redact_if_sensitive("DB_PASSWORD", "hunter2"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("session_token", "abc"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("album", "Summer Mix"), "Summer Mix");
    assert_eq!(strip_path(""), "");
}

#[test]
fn test_builder_sets_every_field() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Json)
        .with_level(LogLevel::Warn)
        .with_filter("core_collection=trace,sqlx=info")
        .with_spans(false)
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, LogLevel::Warn);
    assert_eq!(config.filter.as_deref(), Some("core_collection=trace,sqlx=info"));
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
}
