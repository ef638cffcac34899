//! IP and path exclusion rules
//!
//! A match drops the request without recording anything. Rules are checked
//! IP first, then path, and evaluation stops at the first hit. A rule that
//! fails to parse is skipped rather than treated as a match.

use ipnet::IpNet;
use regex_lite::Regex;
use std::net::IpAddr;
use tracing::warn;

use super::error::CaptureError;
use crate::models::{IpFilter, PathFilter};
use crate::storage::Storage;

/// Which rule dropped the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterMatch {
    Ip { filter_id: i64, netmask: String },
    Path { filter_id: i64, path_pattern: String },
}

pub fn match_ip_filter(ip: IpAddr, filters: &[IpFilter]) -> Option<&IpFilter> {
    let ip = ip.to_canonical();
    filters.iter().find(|filter| match filter.netmask.parse::<IpNet>() {
        Ok(net) => net.contains(&ip),
        Err(e) => {
            warn!(filter_id = filter.id, netmask = %filter.netmask, error = %e, "skipping unparsable IP filter");
            false
        }
    })
}

/// Regex search, not full match: anchoring is up to the pattern
pub fn match_path_filter<'a>(path: &str, filters: &'a [PathFilter]) -> Option<&'a PathFilter> {
    filters
        .iter()
        .find(|filter| match Regex::new(&filter.path_pattern) {
            Ok(re) => re.is_match(path),
            Err(e) => {
                warn!(filter_id = filter.id, pattern = %filter.path_pattern, error = %e, "skipping invalid path filter");
                false
            }
        })
}

/// Evaluate a tenant's filters for one request.
///
/// Path filters are only loaded when no IP filter matched.
pub async fn evaluate(
    storage: &dyn Storage,
    tenant_id: i64,
    ip: IpAddr,
    path: &str,
) -> Result<Option<FilterMatch>, CaptureError> {
    let ip_filters = storage
        .list_ip_filters(tenant_id)
        .await
        .map_err(CaptureError::Persistence)?;
    if let Some(filter) = match_ip_filter(ip, &ip_filters) {
        return Ok(Some(FilterMatch::Ip {
            filter_id: filter.id,
            netmask: filter.netmask.clone(),
        }));
    }

    let path_filters = storage
        .list_path_filters(tenant_id)
        .await
        .map_err(CaptureError::Persistence)?;
    if let Some(filter) = match_path_filter(path, &path_filters) {
        return Ok(Some(FilterMatch::Path {
            filter_id: filter.id,
            path_pattern: filter.path_pattern.clone(),
        }));
    }

    Ok(None)
}
