use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A tracked property owner, addressed publicly by `uuid`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub created_at: i64,
}

/// A hostname a tenant accepts capture traffic from.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Domain {
    pub id: i64,
    pub tenant_id: i64,
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IpFilter {
    pub id: i64,
    pub tenant_id: i64,
    pub netmask: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PathFilter {
    pub id: i64,
    pub tenant_id: i64,
    pub path_pattern: String,
}

/// Normalize a domain pattern for storage the way `Url` normalizes a referrer
/// host: IDNA to ASCII (punycode), lowercased, no trailing dot.
pub fn normalize_domain_pattern(pattern: &str) -> Result<String, String> {
    let trimmed = pattern.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err("domain pattern cannot be empty".to_string());
    }
    if trimmed.contains(['/', ':', ' ', '@', '?', '#']) {
        return Err(format!(
            "domain pattern '{pattern}' must be a bare hostname without scheme, port or path"
        ));
    }
    url::Host::parse(trimmed)
        .map(|host| host.to_string())
        .map_err(|e| format!("invalid domain pattern '{pattern}': {e}"))
}

/// Canonical CIDR text for a netmask, rejecting anything `ipnet` cannot parse.
pub fn validate_netmask(netmask: &str) -> Result<String, String> {
    netmask
        .trim()
        .parse::<IpNet>()
        .map(|net| net.to_string())
        .map_err(|e| format!("invalid netmask '{netmask}': {e}"))
}

pub fn validate_path_pattern(pattern: &str) -> Result<String, String> {
    regex_lite::Regex::new(pattern)
        .map(|_| pattern.to_string())
        .map_err(|e| format!("invalid path pattern '{pattern}': {e}"))
}
