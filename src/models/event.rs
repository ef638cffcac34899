use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One persisted page view. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RequestEvent {
    pub id: i64,
    pub tenant_id: i64,
    pub tracking_key: String,
    pub visitor_id: String,
    pub path: String,
    pub query_string: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub referrer: Option<String>,
    pub domain: Option<String>,
    pub protocol: Option<String>,
    pub created_at: i64,
}

/// Event fields as produced by the capture pipeline, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewRequestEvent {
    pub tenant_id: i64,
    pub tracking_key: String,
    pub visitor_id: String,
    pub path: String,
    pub query_string: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub referrer: Option<String>,
    pub domain: Option<String>,
    pub protocol: Option<String>,
    pub created_at: i64,
}

/// Read filter over persisted events, newest first.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub tenant_id: Option<i64>,
    pub tracking_key: Option<String>,
    pub visitor_id: Option<String>,
    pub limit: i64,
}

impl EventQuery {
    pub const DEFAULT_LIMIT: i64 = 100;

    pub fn for_tenant(tenant_id: i64) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            limit: Self::DEFAULT_LIMIT,
            ..Default::default()
        }
    }
}
