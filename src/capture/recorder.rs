use std::net::IpAddr;

use super::error::CaptureError;
use super::identity::TrackingIdentity;
use super::validator::Referrer;
use crate::models::{NewRequestEvent, RequestEvent, Tenant};
use crate::storage::Storage;

/// Request attributes copied onto the event
#[derive(Debug, Clone)]
pub struct RequestAttributes {
    pub path: String,
    pub query_string: String,
    pub user_agent: Option<String>,
    pub client_ip: IpAddr,
    pub referrer: Option<Referrer>,
}

/// Insert exactly one event for an accepted capture request
pub async fn record(
    storage: &dyn Storage,
    tenant: &Tenant,
    identity: &TrackingIdentity,
    attributes: RequestAttributes,
) -> Result<RequestEvent, CaptureError> {
    debug_assert!(!identity.tracking_key.is_empty());
    debug_assert!(!identity.visitor_id.is_empty());

    let (referrer, domain, protocol) = match attributes.referrer {
        Some(r) => (Some(r.raw), Some(r.host), Some(r.scheme)),
        None => (None, None, None),
    };

    let event = NewRequestEvent {
        tenant_id: tenant.id,
        tracking_key: identity.tracking_key.clone(),
        visitor_id: identity.visitor_id.clone(),
        path: attributes.path,
        query_string: attributes.query_string,
        user_agent: attributes.user_agent,
        ip_address: Some(attributes.client_ip.to_string()),
        referrer,
        domain,
        protocol,
        created_at: chrono::Utc::now().timestamp(),
    };

    storage
        .insert_event(&event)
        .await
        .map_err(CaptureError::Persistence)
}
