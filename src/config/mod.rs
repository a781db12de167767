//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroU32,
    path::{self, PathBuf},
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "plumage";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_JAVA_PATH: &str = "java";
const DEFAULT_JAR_PATH: &str = "plantuml.jar";
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RENDER_MAX_CONCURRENT: u32 = 4;

/// Command-line arguments for the Plumage binary.
#[derive(Debug, Parser)]
#[command(name = "plumage", version, about = "PlantUML render server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PLUMAGE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the Java executable used to run the renderer.
    #[arg(long = "renderer-java-path", value_name = "PATH")]
    pub renderer_java_path: Option<PathBuf>,

    /// Override the PlantUML jar location.
    #[arg(long = "renderer-jar-path", value_name = "PATH")]
    pub renderer_jar_path: Option<PathBuf>,

    /// Override the renderer subprocess deadline.
    #[arg(long = "renderer-timeout-seconds", value_name = "SECONDS")]
    pub renderer_timeout_seconds: Option<u64>,

    /// Override the number of renderer subprocesses allowed to run at once.
    #[arg(long = "renderer-max-concurrent", value_name = "COUNT")]
    pub renderer_max_concurrent: Option<u32>,

    /// Override the scratch directory used for transient render files.
    #[arg(long = "workspace-directory", value_name = "PATH")]
    pub workspace_directory: Option<PathBuf>,

    /// Toggle the startup sweep of stale scratch files.
    #[arg(
        long = "workspace-sweep-on-start",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub workspace_sweep_on_start: Option<bool>,

    /// Toggle the diagnostic detail carried by render-failure responses.
    #[arg(
        long = "http-verbose-errors",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub http_verbose_errors: Option<bool>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub renderer: RendererSettings,
    pub workspace: WorkspaceSettings,
    pub http: HttpSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub java_path: PathBuf,
    /// Absolute path to the renderer artifact. The jar is not required to
    /// exist at startup; the diagnostics endpoint reports its presence.
    pub jar_path: PathBuf,
    pub timeout: Duration,
    pub max_concurrent: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct WorkspaceSettings {
    /// When unset, the platform default is used (`./tmp` on Windows, `/tmp`
    /// elsewhere).
    pub directory: Option<PathBuf>,
    pub sweep_on_start: bool,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub verbose_errors: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("PLUMAGE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    renderer: RawRendererSettings,
    workspace: RawWorkspaceSettings,
    http: RawHttpSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRendererSettings {
    java_path: Option<PathBuf>,
    jar_path: Option<PathBuf>,
    timeout_seconds: Option<u64>,
    max_concurrent: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkspaceSettings {
    directory: Option<PathBuf>,
    sweep_on_start: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHttpSettings {
    verbose_errors: Option<bool>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(path) = overrides.renderer_java_path.as_ref() {
            self.renderer.java_path = Some(path.clone());
        }
        if let Some(path) = overrides.renderer_jar_path.as_ref() {
            self.renderer.jar_path = Some(path.clone());
        }
        if let Some(seconds) = overrides.renderer_timeout_seconds {
            self.renderer.timeout_seconds = Some(seconds);
        }
        if let Some(count) = overrides.renderer_max_concurrent {
            self.renderer.max_concurrent = Some(count);
        }
        if let Some(directory) = overrides.workspace_directory.as_ref() {
            self.workspace.directory = Some(directory.clone());
        }
        if let Some(sweep) = overrides.workspace_sweep_on_start {
            self.workspace.sweep_on_start = Some(sweep);
        }
        if let Some(verbose) = overrides.http_verbose_errors {
            self.http.verbose_errors = Some(verbose);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            renderer,
            workspace,
            http,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let renderer = build_renderer_settings(renderer)?;
        let workspace = build_workspace_settings(workspace);
        let http = build_http_settings(http);

        Ok(Self {
            server,
            logging,
            renderer,
            workspace,
            http,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_renderer_settings(renderer: RawRendererSettings) -> Result<RendererSettings, LoadError> {
    let java_path = renderer
        .java_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_JAVA_PATH));

    let jar_path = renderer
        .jar_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_JAR_PATH));
    // The renderer runs with the scratch directory as its implicit context, so
    // a relative jar path must be anchored to the startup working directory.
    let jar_path = path::absolute(&jar_path).map_err(|err| {
        LoadError::invalid(
            "renderer.jar_path",
            format!("failed to resolve `{}`: {err}", jar_path.display()),
        )
    })?;

    let timeout_seconds = renderer
        .timeout_seconds
        .unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS);
    if timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "renderer.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let max_concurrent = renderer
        .max_concurrent
        .unwrap_or(DEFAULT_RENDER_MAX_CONCURRENT);
    let max_concurrent = NonZeroU32::new(max_concurrent).ok_or_else(|| {
        LoadError::invalid("renderer.max_concurrent", "must be greater than zero")
    })?;

    Ok(RendererSettings {
        java_path,
        jar_path,
        timeout: Duration::from_secs(timeout_seconds),
        max_concurrent,
    })
}

fn build_workspace_settings(workspace: RawWorkspaceSettings) -> WorkspaceSettings {
    WorkspaceSettings {
        directory: workspace.directory,
        sweep_on_start: workspace.sweep_on_start.unwrap_or(true),
    }
}

fn build_http_settings(http: RawHttpSettings) -> HttpSettings {
    HttpSettings {
        verbose_errors: http.verbose_errors.unwrap_or(true),
    }
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    format!("{host}:{port}")
        .parse()
        .map_err(|err| format!("failed to parse `{host}:{port}`: {err}"))
}
