//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
};

use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::draw::{BundleQuota, FilterValue};
use crate::domain::error::DomainError;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tombola";
const ENV_PREFIX: &str = "TOMBOLA";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_CACHE_CAPACITY: usize = 512;
const DEFAULT_CACHE_MAX_AGE_SECS: i64 = 600;
const DEFAULT_STATUS: i64 = 1;
const DEFAULT_LANGCODE: &str = "en";

/// Command-line arguments for the Tombola binary.
#[derive(Debug, Parser)]
#[command(
    name = "tombola",
    version,
    about = "Cached random content blocks backed by Postgres"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TOMBOLA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Draw random nodes and print the rendered block.
    Render(RenderArgs),
    /// Draw random nodes and print their identifiers and titles as JSON.
    Draw(DrawArgs),
    /// Walk through a few template invocations against a built-in catalog.
    Demo(DemoArgs),
    /// Apply database migrations.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct RuntimeOverrides {
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

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the default langcode filter.
    #[arg(long = "langcode", value_name = "CODE")]
    pub langcode: Option<String>,

    /// Override the timezone used for `today` cache windows.
    #[arg(long = "timezone", value_name = "TZ")]
    pub timezone: Option<String>,

    /// Toggle the result cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,
}

/// Parameters of one random draw.
#[derive(Debug, Args, Clone)]
pub struct DrawArgs {
    #[command(flatten)]
    pub overrides: RuntimeOverrides,

    /// Number of nodes to draw; negative draws every match.
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    pub count: i64,

    /// Restrict the draw to a bundle. Repeatable.
    #[arg(long = "bundle", value_name = "BUNDLE", conflicts_with = "quotas")]
    pub bundles: Vec<String>,

    /// Per-bundle quota as `bundle=N`, or `bundle=*` to share the remainder.
    #[arg(long = "quota", value_name = "BUNDLE=N", value_parser = parse_quota)]
    pub quotas: Vec<BundleQuota>,

    /// Property filter as `property=value`. Repeatable.
    #[arg(long = "filter", value_name = "PROPERTY=VALUE", value_parser = parse_filter)]
    pub filters: Vec<(String, FilterValue)>,

    /// Draw from the built-in catalog instead of the database.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub memory: bool,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub draw: DrawArgs,

    /// View mode for each node.
    #[arg(long = "view-mode", default_value = "teaser")]
    pub view_mode: String,

    /// Cache partition key. Repeatable.
    #[arg(long = "cache-key", value_name = "KEY")]
    pub cache_keys: Vec<String>,

    /// Max-age of the drawn set in seconds; defaults to `cache.default_max_age_secs`.
    #[arg(long = "max-age", value_name = "SECONDS", allow_negative_numbers = true)]
    pub max_age: Option<i64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DemoArgs {
    #[command(flatten)]
    pub overrides: RuntimeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub overrides: RuntimeOverrides,
}

impl Command {
    pub fn overrides(&self) -> &RuntimeOverrides {
        match self {
            Command::Render(args) => &args.draw.overrides,
            Command::Draw(args) => &args.overrides,
            Command::Demo(args) => &args.overrides,
            Command::Migrate(args) => &args.overrides,
        }
    }
}

/// Parses `bundle=N` or `bundle=*`.
pub fn parse_quota(value: &str) -> Result<BundleQuota, DomainError> {
    let (bundle, amount) = value
        .split_once('=')
        .ok_or_else(|| DomainError::validation(format!("expected BUNDLE=N, got `{value}`")))?;
    let bundle = bundle.trim();
    if bundle.is_empty() {
        return Err(DomainError::validation(format!(
            "missing bundle name in `{value}`"
        )));
    }
    match amount.trim() {
        "*" => Ok(BundleQuota::share(bundle)),
        amount => amount
            .parse::<u32>()
            .map(|amount| BundleQuota::exact(bundle, amount))
            .map_err(|err| DomainError::validation(format!("invalid quota `{amount}`: {err}"))),
    }
}

/// Parses `property=value`; `true`/`false` and integers keep their type.
pub fn parse_filter(value: &str) -> Result<(String, FilterValue), DomainError> {
    let (property, raw) = value.split_once('=').ok_or_else(|| {
        DomainError::validation(format!("expected PROPERTY=VALUE, got `{value}`"))
    })?;
    let property = property.trim();
    if property.is_empty() {
        return Err(DomainError::validation(format!(
            "missing property name in `{value}`"
        )));
    }
    let raw = raw.trim();
    let value = match raw {
        "true" => FilterValue::Bool(true),
        "false" => FilterValue::Bool(false),
        _ => raw
            .parse::<i64>()
            .map(FilterValue::Int)
            .unwrap_or_else(|_| FilterValue::Text(raw.to_string())),
    };
    Ok((property.to_string(), value))
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub sampler: SamplerSettings,
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
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub capacity: NonZeroUsize,
    pub default_max_age_secs: i64,
}

#[derive(Debug, Clone)]
pub struct SamplerSettings {
    /// Status every draw is restricted to unless the caller filters on it.
    pub default_status: Option<i64>,
    pub langcode: Option<String>,
    pub timezone: Tz,
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(cli.command.overrides());

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    sampler: RawSamplerSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &RuntimeOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(langcode) = overrides.langcode.as_ref() {
            self.sampler.langcode = Some(langcode.clone());
        }
        if let Some(timezone) = overrides.timezone.as_ref() {
            self.sampler.timezone = Some(timezone.clone());
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
            sampler,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            sampler: build_sampler_settings(sampler)?,
        })
    }
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

    let max_connections = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = NonZeroU32::new(max_connections).ok_or_else(|| {
        LoadError::invalid("database.max_connections", "must be greater than zero")
    })?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let capacity = cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY);
    let capacity = NonZeroUsize::new(capacity)
        .ok_or_else(|| LoadError::invalid("cache.capacity", "must be greater than zero"))?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        capacity,
        default_max_age_secs: cache
            .default_max_age_secs
            .unwrap_or(DEFAULT_CACHE_MAX_AGE_SECS),
    })
}

fn build_sampler_settings(sampler: RawSamplerSettings) -> Result<SamplerSettings, LoadError> {
    // A negative status turns the default status filter off.
    let default_status = match sampler.default_status {
        Some(status) if status < 0 => None,
        Some(status) => Some(status),
        None => Some(DEFAULT_STATUS),
    };

    let langcode = match sampler.langcode {
        Some(langcode) => {
            let trimmed = langcode.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        None => Some(DEFAULT_LANGCODE.to_string()),
    };

    let timezone = match sampler.timezone {
        Some(name) => name.trim().parse::<Tz>().map_err(|err| {
            LoadError::invalid("sampler.timezone", format!("unknown timezone `{name}`: {err}"))
        })?,
        None => Tz::UTC,
    };

    Ok(SamplerSettings {
        default_status,
        langcode,
        timezone,
    })
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
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    capacity: Option<usize>,
    default_max_age_secs: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSamplerSettings {
    default_status: Option<i64>,
    langcode: Option<String>,
    timezone: Option<String>,
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
