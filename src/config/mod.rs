//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::*;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "willow";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_ROOT_DOMAIN: &str = "willow.camp";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_DIRECT_UPLOAD_TTL_SECS: u64 = 300;
const DEVELOPMENT_SIGNING_SECRET: &str = "willow-development-upload-secret";
const DEFAULT_API_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_API_RATE_LIMIT_MAX_REQUESTS: u64 = 120;
const DEFAULT_DB_HTTP_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_JOBS_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_JOB_IMAGE_PROCESSING_CONCURRENCY: u32 = 2;
const DEFAULT_JOB_BLOB_INTAKE_CONCURRENCY: u32 = 1;
const DEFAULT_PER_PAGE: u32 = 20;
const MAX_PER_PAGE: u32 = 100;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub site: SiteSettings,
    pub uploads: UploadSettings,
    pub api_rate_limit: ApiRateLimitSettings,
    pub jobs: JobsSettings,
    pub pagination: PaginationSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
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
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub http_max_connections: NonZeroU32,
    pub jobs_max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub root_domain: String,
    pub local_mode: bool,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub directory: PathBuf,
    pub max_request_bytes: NonZeroU64,
    pub signing_secret: String,
    /// Set when no secret was configured and the development secret is in use.
    pub signing_secret_is_default: bool,
    pub direct_upload_ttl: Duration,
    pub public_read_acl: bool,
}

#[derive(Debug, Clone)]
pub struct ApiRateLimitSettings {
    pub window_seconds: NonZeroU32,
    pub max_requests: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub image_processing_concurrency: NonZeroU32,
    pub blob_intake_concurrency: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct PaginationSettings {
    pub per_page: NonZeroU32,
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

    builder = builder.add_source(Environment::with_prefix("WILLOW").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(other) => {
            if let Some(database) = other.database_override() {
                raw.apply_database_override(database);
            }
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    site: RawSiteSettings,
    uploads: RawUploadSettings,
    api_rate_limit: RawApiRateLimitSettings,
    jobs: RawJobsSettings,
    pagination: RawPaginationSettings,
}

impl RawSettings {
    /// CLI flags win over every file and environment layer.
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        fn prefer<T: Clone>(flag: &Option<T>, slot: &mut Option<T>) {
            if flag.is_some() {
                slot.clone_from(flag);
            }
        }

        prefer(&overrides.server_host, &mut self.server.host);
        prefer(&overrides.server_port, &mut self.server.port);
        prefer(
            &overrides.server_graceful_shutdown_seconds,
            &mut self.server.graceful_shutdown_seconds,
        );
        prefer(&overrides.log_level, &mut self.logging.level);
        prefer(&overrides.log_json, &mut self.logging.json);
        prefer(&overrides.database_url, &mut self.database.url);
        prefer(&overrides.site_root_domain, &mut self.site.root_domain);
        prefer(&overrides.site_local_mode, &mut self.site.local_mode);
        prefer(&overrides.uploads_directory, &mut self.uploads.directory);
        prefer(
            &overrides.uploads_max_request_bytes,
            &mut self.uploads.max_request_bytes,
        );
        prefer(
            &overrides.api_rate_limit_window_seconds,
            &mut self.api_rate_limit.window_seconds,
        );
        prefer(
            &overrides.api_rate_limit_max_requests,
            &mut self.api_rate_limit.max_requests,
        );
        prefer(
            &overrides.jobs_image_processing_concurrency,
            &mut self.jobs.image_processing_concurrency,
        );
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            site,
            uploads,
            api_rate_limit,
            jobs,
            pagination,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            site: build_site_settings(site)?,
            uploads: build_upload_settings(uploads)?,
            api_rate_limit: build_api_rate_limit_settings(api_rate_limit)?,
            jobs: build_jobs_settings(jobs)?,
            pagination: build_pagination_settings(pagination)?,
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

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let http_value = database
        .http_max_connections
        .unwrap_or(DEFAULT_DB_HTTP_MAX_CONNECTIONS);
    let jobs_value = database
        .jobs_max_connections
        .unwrap_or(DEFAULT_DB_JOBS_MAX_CONNECTIONS);

    Ok(DatabaseSettings {
        url,
        http_max_connections: non_zero_u32(http_value.into(), "database.http_max_connections")?,
        jobs_max_connections: non_zero_u32(jobs_value.into(), "database.jobs_max_connections")?,
    })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let root_domain = site
        .root_domain
        .map(|value| value.trim().trim_end_matches('.').to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_ROOT_DOMAIN.to_string());
    if root_domain.is_empty() || (!root_domain.contains('.') && root_domain != "localhost") {
        return Err(LoadError::invalid(
            "site.root_domain",
            "must be a domain name such as `willow.camp`",
        ));
    }

    Ok(SiteSettings {
        root_domain,
        local_mode: site.local_mode.unwrap_or(false),
    })
}

fn build_upload_settings(uploads: RawUploadSettings) -> Result<UploadSettings, LoadError> {
    let directory = uploads
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR));

    let max_request_bytes_value = uploads
        .max_request_bytes
        .unwrap_or(DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES);
    let max_request_bytes = NonZeroU64::new(max_request_bytes_value).ok_or_else(|| {
        LoadError::invalid("uploads.max_request_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_request_bytes_value).map_err(|_| {
        LoadError::invalid(
            "uploads.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    let configured_secret = uploads
        .signing_secret
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let signing_secret_is_default = configured_secret.is_none();
    let signing_secret =
        configured_secret.unwrap_or_else(|| DEVELOPMENT_SIGNING_SECRET.to_string());

    let ttl_secs = uploads
        .direct_upload_ttl_seconds
        .unwrap_or(DEFAULT_DIRECT_UPLOAD_TTL_SECS);
    if ttl_secs == 0 {
        return Err(LoadError::invalid(
            "uploads.direct_upload_ttl_seconds",
            "must be greater than zero",
        ));
    }

    Ok(UploadSettings {
        directory,
        max_request_bytes,
        signing_secret,
        signing_secret_is_default,
        direct_upload_ttl: Duration::from_secs(ttl_secs),
        public_read_acl: uploads.public_read_acl.unwrap_or(false),
    })
}

fn build_api_rate_limit_settings(
    rate_limit: RawApiRateLimitSettings,
) -> Result<ApiRateLimitSettings, LoadError> {
    let window_seconds_val = rate_limit
        .window_seconds
        .unwrap_or(DEFAULT_API_RATE_LIMIT_WINDOW_SECS);
    let max_requests_val = rate_limit
        .max_requests
        .unwrap_or(DEFAULT_API_RATE_LIMIT_MAX_REQUESTS);

    Ok(ApiRateLimitSettings {
        window_seconds: non_zero_u32(window_seconds_val, "api_rate_limit.window_seconds")?,
        max_requests: non_zero_u32(max_requests_val, "api_rate_limit.max_requests")?,
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let image_processing = jobs
        .image_processing_concurrency
        .unwrap_or(DEFAULT_JOB_IMAGE_PROCESSING_CONCURRENCY);
    let blob_intake = jobs
        .blob_intake_concurrency
        .unwrap_or(DEFAULT_JOB_BLOB_INTAKE_CONCURRENCY);

    Ok(JobsSettings {
        image_processing_concurrency: non_zero_u32(
            image_processing.into(),
            "jobs.image_processing_concurrency",
        )?,
        blob_intake_concurrency: non_zero_u32(blob_intake.into(), "jobs.blob_intake_concurrency")?,
    })
}

fn build_pagination_settings(
    pagination: RawPaginationSettings,
) -> Result<PaginationSettings, LoadError> {
    let per_page = pagination.per_page.unwrap_or(DEFAULT_PER_PAGE);
    if per_page > MAX_PER_PAGE {
        return Err(LoadError::invalid(
            "pagination.per_page",
            format!("must be at most {MAX_PER_PAGE}"),
        ));
    }
    Ok(PaginationSettings {
        per_page: non_zero_u32(per_page.into(), "pagination.per_page")?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    http_max_connections: Option<u32>,
    jobs_max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    root_domain: Option<String>,
    local_mode: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUploadSettings {
    directory: Option<PathBuf>,
    max_request_bytes: Option<u64>,
    signing_secret: Option<String>,
    direct_upload_ttl_seconds: Option<u64>,
    public_read_acl: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiRateLimitSettings {
    window_seconds: Option<u64>,
    max_requests: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    image_processing_concurrency: Option<u32>,
    blob_intake_concurrency: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPaginationSettings {
    per_page: Option<u32>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());

        let overrides = ServeOverrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    }

    #[test]
    fn defaults_describe_a_local_deployment() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
        assert_eq!(settings.site.root_domain, "willow.camp");
        assert!(!settings.site.local_mode);
        assert_eq!(
            settings.uploads.max_request_bytes.get(),
            DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES
        );
        assert!(settings.uploads.signing_secret_is_default);
        assert!(!settings.uploads.public_read_acl);
        assert_eq!(settings.pagination.per_page.get(), 20);
        assert_eq!(settings.api_rate_limit.max_requests.get(), 120);
    }

    #[test]
    fn configured_signing_secret_replaces_the_default() {
        let mut raw = RawSettings::default();
        raw.uploads.signing_secret = Some("  s3cret  ".to_string());
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.uploads.signing_secret, "s3cret");
        assert!(!settings.uploads.signing_secret_is_default);
    }

    #[test]
    fn root_domain_is_normalized_and_checked() {
        let mut raw = RawSettings::default();
        raw.site.root_domain = Some("Example.COM.".to_string());
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.site.root_domain, "example.com");

        let mut raw = RawSettings::default();
        raw.site.root_domain = Some("nodots".to_string());
        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid {
                key: "site.root_domain",
                ..
            })
        ));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut raw = RawSettings::default();
        raw.jobs.image_processing_concurrency = Some(0);
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = RawSettings::default();
        let overrides = ServeOverrides {
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["willow"]);
        let command = args
            .command
            .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
        assert!(matches!(command, Command::Serve(_)));
    }

    #[test]
    fn parse_token_issue_arguments() {
        let args = CliArgs::parse_from([
            "willow",
            "tokens",
            "issue",
            "--database-url",
            "postgres://example",
            "--email",
            "ada@example.com",
            "--name",
            "laptop",
            "--expires-in-days",
            "30",
        ]);

        let command = args.command.expect("tokens command");
        assert_eq!(
            command
                .database_override()
                .and_then(|db| db.database_url.as_deref()),
            Some("postgres://example")
        );
        match command {
            Command::Tokens(TokensCommand::Issue(issue)) => {
                assert_eq!(issue.email, "ada@example.com");
                assert_eq!(issue.name, "laptop");
                assert_eq!(issue.expires_in_days, Some(30));
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_post_import_arguments() {
        let args = CliArgs::parse_from([
            "willow",
            "posts",
            "import",
            "--domain",
            "ada.willow.camp",
            "--file",
            "/tmp/post.md",
        ]);

        match args.command.expect("posts command") {
            Command::Posts(PostsCommand::Import(import)) => {
                assert_eq!(import.domain, "ada.willow.camp");
                assert_eq!(import.file, std::path::Path::new("/tmp/post.md"));
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_serve_overrides() {
        let args = CliArgs::parse_from([
            "willow",
            "serve",
            "--server-host",
            "0.0.0.0",
            "--site-local-mode",
            "true",
        ]);

        match args.command.expect("serve command") {
            Command::Serve(serve) => {
                assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
                assert_eq!(serve.overrides.site_local_mode, Some(true));
            }
            _ => panic!("wrong command parsed"),
        }
    }
}
