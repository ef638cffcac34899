use anyhow::Context;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub capture_server: ServerConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// How the client address is derived from proxy headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Use the socket peer address only
    None,
    /// Honour `Forwarded` / `X-Forwarded-For`
    Standard,
    /// Honour `CF-Connecting-IP`
    Cloudflare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Lax,
    Strict,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Lax => "Lax",
            SameSite::Strict => "Strict",
            SameSite::None => "None",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub trusted_proxy_mode: TrustedProxyMode,
    /// Proxies allowed to append to `X-Forwarded-For`
    pub trusted_proxies: Vec<IpNet>,
    /// Number of proxy hops to skip from the right of `X-Forwarded-For`
    pub num_trusted_proxies: Option<usize>,
    pub session_ttl_secs: u64,
    pub session_max_entries: u64,
    pub visitor_cookie_max_age_secs: u64,
    pub cookie_secure: bool,
    pub cookie_same_site: SameSite,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: Vec::new(),
            num_trusted_proxies: None,
            session_ttl_secs: CaptureConfig::DEFAULT_SESSION_TTL_SECS,
            session_max_entries: CaptureConfig::DEFAULT_SESSION_MAX_ENTRIES,
            visitor_cookie_max_age_secs: CaptureConfig::DEFAULT_VISITOR_COOKIE_MAX_AGE_SECS,
            cookie_secure: false,
            cookie_same_site: SameSite::Lax,
        }
    }
}

impl CaptureConfig {
    const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 60;
    const DEFAULT_SESSION_MAX_ENTRIES: u64 = 100_000;
    // Two years
    const DEFAULT_VISITOR_COOKIE_MAX_AGE_SECS: u64 = 2 * 365 * 24 * 60 * 60;
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

fn env_parse<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{name} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            "sqlite" => DatabaseBackend::Sqlite,
            other => {
                tracing::warn!(
                    "Unknown DATABASE_BACKEND '{other}', falling back to 'sqlite'. Supported values: sqlite, postgres"
                );
                DatabaseBackend::Sqlite
            }
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./djanalytics.db".to_string());
        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 10u32)?;

        let capture_host =
            std::env::var("CAPTURE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let capture_port = env_parse("CAPTURE_PORT", 8000u16)?;

        let trusted_proxy_mode = match std::env::var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };

        let trusted_proxies = std::env::var("TRUSTED_PROXIES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpNet>()
                    .with_context(|| format!("TRUSTED_PROXIES contains an invalid CIDR '{s}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let num_trusted_proxies = match std::env::var("NUM_TRUSTED_PROXIES") {
            Ok(raw) => Some(
                raw.trim()
                    .parse::<usize>()
                    .with_context(|| format!("NUM_TRUSTED_PROXIES has an invalid value '{raw}'"))?,
            ),
            Err(_) => None,
        };

        let cookie_same_site = match std::env::var("COOKIE_SAME_SITE")
            .unwrap_or_else(|_| "lax".to_string())
            .to_lowercase()
            .as_str()
        {
            "lax" => SameSite::Lax,
            "strict" => SameSite::Strict,
            "none" => SameSite::None,
            other => {
                tracing::warn!(
                    "Unknown COOKIE_SAME_SITE '{other}', falling back to 'lax'. Supported values: lax, strict, none"
                );
                SameSite::Lax
            }
        };

        let capture = CaptureConfig {
            trusted_proxy_mode,
            trusted_proxies,
            num_trusted_proxies,
            session_ttl_secs: env_parse(
                "SESSION_TTL_SECS",
                CaptureConfig::DEFAULT_SESSION_TTL_SECS,
            )?,
            session_max_entries: env_parse(
                "SESSION_MAX_ENTRIES",
                CaptureConfig::DEFAULT_SESSION_MAX_ENTRIES,
            )?,
            visitor_cookie_max_age_secs: env_parse(
                "VISITOR_COOKIE_MAX_AGE_SECS",
                CaptureConfig::DEFAULT_VISITOR_COOKIE_MAX_AGE_SECS,
            )?,
            cookie_secure: env_flag("COOKIE_SECURE"),
            cookie_same_site,
        };

        if capture.cookie_same_site == SameSite::None && !capture.cookie_secure {
            tracing::warn!("COOKIE_SAME_SITE=none without COOKIE_SECURE; browsers will drop the cookies");
        }
        if capture.trusted_proxy_mode == TrustedProxyMode::Standard
            && capture.trusted_proxies.is_empty()
            && capture.num_trusted_proxies.is_none()
        {
            tracing::warn!(
                "TRUSTED_PROXY_MODE=standard without TRUSTED_PROXIES or NUM_TRUSTED_PROXIES; forwarding headers will be ignored"
            );
        }

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            capture_server: ServerConfig {
                host: capture_host,
                port: capture_port,
            },
            capture,
        })
    }
}
