#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow, bail};
use chrono::Duration;
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_VIDHUB_PORT: u16 = 8000;
pub const DEFAULT_VIDHUB_HOST: &str = "127.0.0.1";
pub const DEFAULT_ACCESS_TOKEN_EXPIRY: &str = "1d";
pub const DEFAULT_REFRESH_TOKEN_EXPIRY: &str = "10d";
pub const DEFAULT_MAX_UPLOAD_MB: usize = 512;

/// Signing material and lifetimes for the access/refresh token pair.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub access_secret: String,
    pub access_ttl: Duration,
    pub refresh_secret: String,
    pub refresh_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Holds the database file and the `assets/` tree.
    pub data_root: PathBuf,
    pub host: String,
    pub port: u16,
    /// Prefix used when building asset URLs handed back to clients.
    pub public_url: String,
    pub tokens: TokenConfig,
    pub max_upload_bytes: usize,
    pub secure_cookies: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub data_root: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_config(&file_vars, env_var_string, overrides)
}

fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let data_root = overrides
        .data_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup("VIDHUB_DATA_ROOT"))
        .ok_or_else(|| anyhow!("VIDHUB_DATA_ROOT not set"))?;
    let port = overrides
        .port
        .or_else(|| lookup("VIDHUB_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_VIDHUB_PORT);
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("VIDHUB_HOST"))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_VIDHUB_HOST.to_string());
    let public_url = lookup("VIDHUB_PUBLIC_URL")
        .map(|value| value.trim_end_matches('/').to_string())
        .unwrap_or_else(|| format!("http://{host}:{port}"));

    let access_secret =
        lookup("ACCESS_TOKEN_SECRET").ok_or_else(|| anyhow!("ACCESS_TOKEN_SECRET not set"))?;
    let refresh_secret =
        lookup("REFRESH_TOKEN_SECRET").ok_or_else(|| anyhow!("REFRESH_TOKEN_SECRET not set"))?;
    if access_secret == refresh_secret {
        bail!("ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ");
    }
    let access_ttl = parse_duration(
        &lookup("ACCESS_TOKEN_EXPIRY").unwrap_or_else(|| DEFAULT_ACCESS_TOKEN_EXPIRY.into()),
    )
    .context("parsing ACCESS_TOKEN_EXPIRY")?;
    let refresh_ttl = parse_duration(
        &lookup("REFRESH_TOKEN_EXPIRY").unwrap_or_else(|| DEFAULT_REFRESH_TOKEN_EXPIRY.into()),
    )
    .context("parsing REFRESH_TOKEN_EXPIRY")?;

    let max_upload_mb = lookup("VIDHUB_MAX_UPLOAD_MB")
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_UPLOAD_MB);
    let secure_cookies = !lookup("VIDHUB_INSECURE_COOKIES")
        .map(|value| parse_flag(&value))
        .unwrap_or(false);

    Ok(RuntimeConfig {
        data_root: PathBuf::from(data_root),
        host,
        port,
        public_url,
        tokens: TokenConfig {
            access_secret,
            access_ttl,
            refresh_secret,
            refresh_ttl,
        },
        max_upload_bytes: max_upload_mb * 1024 * 1024,
        secure_cookies,
    })
}

/// Accepts `90`, `90s`, `15m`, `12h` or `10d`.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: i64 = digits
        .parse()
        .with_context(|| format!("invalid duration {value:?}"))?;
    let duration = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        other => bail!("unknown duration unit {other:?} in {value:?}"),
    }
    .ok_or_else(|| anyhow!("duration {value:?} is out of range"))?;
    if duration <= Duration::zero() {
        bail!("duration {value:?} must be positive");
    }
    Ok(duration)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
