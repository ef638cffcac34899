//! Two-tier visitor identity.
//!
//! The visitor id lives in a long-lived client cookie and decides whether a
//! request comes from a new user. The tracking key lives in the session and
//! is re-minted whenever the session is new, so one visitor id can span many
//! tracking keys.

use uuid::Uuid;

use crate::session::Session;

/// Session key holding the tracking key
pub const TRACKING_KEY_SESSION_KEY: &str = "dja_tracking_id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingIdentity {
    pub tracking_key: String,
    pub visitor_id: String,
    /// True when no visitor cookie came with the request
    pub is_new_user: bool,
}

/// Random v4 UUID in simple (hex) form; no coordination between requests
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Resolve both identifiers, writing a freshly minted tracking key into the session.
pub fn resolve(session: &mut Session, visitor_cookie: Option<&str>) -> TrackingIdentity {
    let (visitor_id, is_new_user) = match visitor_cookie.map(str::trim).filter(|v| !v.is_empty()) {
        Some(existing) => (existing.to_string(), false),
        None => (generate_id(), true),
    };

    let tracking_key = match session
        .get(TRACKING_KEY_SESSION_KEY)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
    {
        Some(existing) => existing,
        None => {
            let key = generate_id();
            session.insert(TRACKING_KEY_SESSION_KEY, key.clone());
            key
        }
    };

    TrackingIdentity {
        tracking_key,
        visitor_id,
        is_new_user,
    }
}
