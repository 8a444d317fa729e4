//! Integration tests for config files, the CLI and telemetry settings.

use std::path::PathBuf;

use doku::Document;
use figment::Jail;
use serde::Deserialize;

/// Test settings structure similar to what a real application would use.
#[derive(Document, Deserialize)]
pub struct TestSettings {
    /// Application-specific settings
    pub application: ApplicationSettings,

    /// Instrumentation settings from xtrace
    pub instrumentation: xtrace::config::InstrumentationSettings,

    /// Telemetry settings from xtrace
    pub telemetry: xtrace::telemetry::TelemetrySettings,
}

#[derive(Document, Deserialize)]
pub struct ApplicationSettings {
    /// Port to listen on
    #[doku(example = "8080")]
    pub listen_port: u16,

    /// Database directory path
    #[doku(example = "/var/db/test")]
    pub db_path: PathBuf,
}

#[derive(clap::Parser)]
struct Arguments {
    /// Serve plain HTTP
    #[arg(long)]
    insecure: bool,
}

const CONFIG: &str = r#"
[application]
listen_port = 9090
db_path = "/tmp/test_db"

[instrumentation]
layer_name = "shop"

[telemetry.trace]

[telemetry.log]
console_level = "info"
otel_level = "warn"

[telemetry.metric]
"#;

// ============================================================================
// ServiceInfo Tests
// ============================================================================

#[test]
fn test_service_info_macro() {
    let info = xtrace::service_info!();

    assert_eq!(info.name, "xtrace");
    assert_eq!(info.name_in_metrics, "xtrace");
    assert!(!info.version.is_empty());
}

#[test]
fn test_service_info_default() {
    let info = xtrace::ServiceInfo::default();

    assert_eq!(info.name, "");
    assert_eq!(info.name_in_metrics, "");
    assert_eq!(info.version, "");
}

// ============================================================================
// Config Generation Tests
// ============================================================================

#[test]
fn test_config_generation() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("xtrace.toml");

    xtrace::config::create_config_file::<TestSettings>(&config_path)
        .expect("Failed to create config file");

    let content = std::fs::read_to_string(&config_path).expect("Failed to read config file");
    assert!(content.contains("[application]"), "{content}");
    assert!(content.contains("listen_port"), "{content}");
    assert!(content.contains("[instrumentation]"), "{content}");
    assert!(content.contains("layer_name"), "{content}");
    assert!(content.contains("[telemetry"), "{content}");
    assert!(content.contains("Port to listen on"), "{content}");
}

#[test]
fn test_config_generation_unwritable_path() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("missing").join("xtrace.toml");

    let result = xtrace::config::create_config_file::<TestSettings>(&config_path);
    match result {
        Err(xtrace::Error::ConfigFileWrite { path, .. }) => assert_eq!(path, config_path),
        other => panic!("unexpected result: {other:?}"),
    }
}

// ============================================================================
// Config Loading Tests
// ============================================================================

#[test]
fn test_config_loading() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("xtrace.toml");
    std::fs::write(&config_path, CONFIG).unwrap();

    let config: xtrace::config::Config<TestSettings> =
        xtrace::config::Config::new(Some(&config_path), None::<&str>)
            .expect("Failed to load config");

    assert_eq!(config.config.application.listen_port, 9090);
    assert_eq!(config.config.application.db_path, PathBuf::from("/tmp/test_db"));
    assert_eq!(config.config.instrumentation.layer_name(), "shop");
    assert_eq!(config.config.telemetry.log.console_level, "info");
    assert!(config.config.telemetry.trace.endpoint.is_none());
}

#[test]
fn test_config_loading_with_env_override() {
    Jail::expect_with(|jail| {
        jail.create_file("xtrace.toml", CONFIG)?;
        jail.set_env("SETTINGSTEST_APPLICATION__LISTEN_PORT", "3000");
        jail.set_env("SETTINGSTEST_INSTRUMENTATION__LAYER_NAME", "gateway");

        let config: xtrace::config::Config<TestSettings> =
            xtrace::config::Config::new(Some("xtrace.toml"), Some("SETTINGSTEST_"))
                .map_err(|err| err.to_string())?;

        assert_eq!(config.config.application.listen_port, 3000);
        assert_eq!(config.config.instrumentation.layer_name(), "gateway");
        assert_eq!(config.config.application.db_path, PathBuf::from("/tmp/test_db"));
        Ok(())
    });
}

#[test]
fn test_config_loading_invalid_toml() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("xtrace.toml");
    std::fs::write(&config_path, "this is not valid toml {{{{").unwrap();

    let result: Result<xtrace::config::Config<TestSettings>, _> =
        xtrace::config::Config::new(Some(&config_path), None::<&str>);

    assert!(matches!(result, Err(xtrace::Error::ConfigLoad { .. })));
}

// ============================================================================
// CLI Tests
// ============================================================================

#[test]
fn test_cli_generates_config() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("generated.toml");
    let info = xtrace::service_info!();

    let cli = xtrace::cli::Cli::<TestSettings>::try_parse_from(
        &info,
        "CLITEST_",
        ["xtrace", "--generate", config_path.to_str().unwrap()],
    )
    .unwrap();

    assert!(cli.is_none());
    assert!(config_path.exists());
}

#[test]
fn test_cli_loads_config_and_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("xtrace.toml");
    std::fs::write(&config_path, CONFIG).unwrap();
    let info = xtrace::service_info!();

    let cli = xtrace::cli::Cli::<TestSettings, Arguments>::try_parse_from(
        &info,
        "CLITEST_",
        ["xtrace", "-c", config_path.to_str().unwrap(), "--insecure"],
    )
    .unwrap()
    .unwrap();

    assert!(cli.args.insecure);
    assert_eq!(cli.config.instrumentation.layer_name(), "shop");
}

#[test]
fn test_cli_requires_config() {
    let info = xtrace::service_info!();

    let result = xtrace::cli::Cli::<TestSettings>::try_parse_from(&info, "CLITEST_", ["xtrace"]);
    assert!(matches!(result, Err(xtrace::cli::Error::ArgParse { .. })));
}

#[test]
fn test_cli_reports_missing_config_file() {
    let info = xtrace::service_info!();

    let result = xtrace::cli::Cli::<TestSettings>::try_parse_from(
        &info,
        "CLITEST_",
        ["xtrace", "--config", "/nonexistent/path/config.toml"],
    );
    assert!(matches!(result, Err(xtrace::cli::Error::Load { .. })));
}

// ============================================================================
// TelemetrySettings Tests
// ============================================================================

#[test]
fn test_telemetry_settings_default() {
    let settings = xtrace::telemetry::TelemetrySettings::default();

    assert!(settings.trace.endpoint.is_none());
    assert!(settings.log.endpoint.is_none());
    assert!(settings.metric.endpoint.is_none());
    assert!(settings.log.console_level.is_empty());
}

#[test]
fn test_telemetry_settings_deserialization() {
    let toml_content = r#"
[trace]
endpoint = "http://trace:4317"

[log]
console_level = "info,xtrace=debug"
otel_level = "warn"
endpoint = "http://log:4317"

[metric]
endpoint = "http://metric:4318/v1/metrics"
"#;

    let settings: xtrace::telemetry::TelemetrySettings =
        toml::from_str(toml_content).expect("Failed to deserialize");

    assert_eq!(settings.trace.endpoint.as_deref(), Some("http://trace:4317"));
    assert_eq!(settings.log.console_level, "info,xtrace=debug");
    assert_eq!(settings.log.otel_level, "warn");
    assert_eq!(settings.log.endpoint.as_deref(), Some("http://log:4317"));
    assert_eq!(
        settings.metric.endpoint.as_deref(),
        Some("http://metric:4318/v1/metrics")
    );
}

#[test]
fn test_telemetry_settings_serialization() {
    let settings = xtrace::telemetry::TelemetrySettings {
        log: xtrace::telemetry::LogSettings {
            console_level: "debug".to_string(),
            otel_level: "warn".to_string(),
            endpoint: None,
        },
        ..Default::default()
    };

    let toml_str = toml::to_string(&settings).expect("Failed to serialize TelemetrySettings");
    assert!(toml_str.contains("console_level"));
    assert!(toml_str.contains("debug"));
}

#[test]
fn test_nested_settings_document() {
    let toml = doku::to_toml::<TestSettings>();

    assert!(toml.contains("[application]"));
    assert!(toml.contains("[instrumentation]"));
    assert!(toml.contains("[telemetry.trace]"));
    assert!(toml.contains("[telemetry.log]"));
    assert!(toml.contains("[telemetry.metric]"));
}

// ============================================================================
// Error Type Tests
// ============================================================================

#[test]
fn test_error_display() {
    let config_error = xtrace::Error::ConfigFileWrite {
        path: PathBuf::from("/test/path"),
        source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "test error"),
    };
    assert!(config_error.to_string().contains("/test/path"));

    let cli_error = xtrace::cli::Error::ArgParse {
        message: "missing required argument".to_string(),
    };
    assert!(cli_error.to_string().contains("missing required argument"));
}
