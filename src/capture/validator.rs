//! Tenant and referring-domain validation

use url::Url;
use uuid::Uuid;

use super::error::CaptureError;
use crate::models::{Domain, Tenant};
use crate::storage::Storage;

/// The parts of a `Referer` header the pipeline cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Referrer {
    pub raw: String,
    pub scheme: String,
    pub host: String,
}

/// Parse a `Referer` header value. Anything without a hostname is `None`.
pub fn parse_referrer(header: Option<&str>) -> Option<Referrer> {
    let raw = header?.trim();
    let url = Url::parse(raw).ok()?;
    let host = url
        .host_str()?
        .trim_end_matches('.')
        .to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }

    Some(Referrer {
        raw: raw.to_string(),
        scheme: url.scheme().to_string(),
        host,
    })
}

/// Resolve the tenant named by the `dja_id` parameter.
///
/// Missing, non-UUID and unknown identifiers all end in `TenantNotFound`.
pub async fn resolve_tenant(
    storage: &dyn Storage,
    tenant_id: Option<&str>,
) -> Result<Tenant, CaptureError> {
    let raw = tenant_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(CaptureError::TenantNotFound)?;
    let uuid = Uuid::parse_str(raw).map_err(|_| CaptureError::TenantNotFound)?;

    storage
        .find_tenant_by_uuid(&uuid.hyphenated().to_string())
        .await
        .map_err(CaptureError::Persistence)?
        .ok_or(CaptureError::TenantNotFound)
}

/// Exact hostname comparison against the tenant's registered domains
pub fn host_matches(host: &str, domains: &[Domain]) -> bool {
    domains
        .iter()
        .any(|domain| domain.pattern.eq_ignore_ascii_case(host))
}

/// Confirm the referring host is registered to the tenant
pub async fn validate_domain(
    storage: &dyn Storage,
    tenant: &Tenant,
    referrer: Option<&Referrer>,
) -> Result<(), CaptureError> {
    let referrer = referrer.ok_or(CaptureError::DomainNotAuthorized)?;

    let domains = storage
        .list_domains(tenant.id)
        .await
        .map_err(CaptureError::Persistence)?;

    if host_matches(&referrer.host, &domains) {
        Ok(())
    } else {
        Err(CaptureError::DomainNotAuthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(pattern: &str) -> Domain {
        Domain {
            id: 1,
            tenant_id: 1,
            pattern: pattern.to_string(),
        }
    }

    #[test]
    fn test_parse_referrer_ignores_scheme_port_and_path() {
        let referrer =
            parse_referrer(Some("https://DJAnalytics.example.com:8443/some/page?x=1")).unwrap();
        assert_eq!(referrer.host, "djanalytics.example.com");
        assert_eq!(referrer.scheme, "https");
        assert_eq!(
            referrer.raw,
            "https://DJAnalytics.example.com:8443/some/page?x=1"
        );
    }

    #[test]
    fn test_parse_referrer_unicode_host_becomes_punycode() {
        let referrer = parse_referrer(Some("http://Bücher.example/")).unwrap();
        assert_eq!(referrer.host, "xn--bcher-kva.example");
    }

    #[test]
    fn test_parse_referrer_rejects_garbage() {
        assert!(parse_referrer(None).is_none());
        assert!(parse_referrer(Some("")).is_none());
        assert!(parse_referrer(Some("not a url")).is_none());
        assert!(parse_referrer(Some("mailto:someone@example.com")).is_none());
    }

    #[test]
    fn test_host_matches_exactly() {
        let domains = vec![domain("djanalytics.example.com")];
        assert!(host_matches("djanalytics.example.com", &domains));
        assert!(!host_matches("bogus.example.com", &domains));
        assert!(!host_matches("example.com", &domains));
        assert!(!host_matches("sub.djanalytics.example.com", &domains));
    }

    #[test]
    fn test_host_matches_nothing_when_no_domains() {
        assert!(!host_matches("djanalytics.example.com", &[]));
    }
}
