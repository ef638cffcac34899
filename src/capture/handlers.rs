use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        ConnectInfo, Query, State,
    },
    http::{
        header::{HeaderMap, REFERER, SET_COOKIE, USER_AGENT},
        StatusCode,
    },
    response::{AppendHeaders, IntoResponse, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use super::cookies::{get_cookie, set_cookie_header, CookieAttributes, SESSION_COOKIE, VISITOR_COOKIE};
use super::error::CaptureError;
use super::filters::{self, FilterMatch};
use super::identity;
use super::ip_extractor::extract_client_ip;
use super::recorder::{self, RequestAttributes};
use super::validator::{parse_referrer, resolve_tenant, validate_domain};
use crate::config::CaptureConfig;
use crate::session::{Session, SessionStore};
use crate::storage::Storage;

pub struct CaptureState {
    pub storage: Arc<dyn Storage>,
    pub sessions: Arc<dyn SessionStore>,
    pub config: CaptureConfig,
}

#[derive(Debug, Deserialize)]
pub struct CaptureParams {
    pub dja_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CaptureForm {
    pub pth: String,
    #[serde(default)]
    pub qs: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaptureResponse {
    pub dja_tracking_id: String,
    pub dja_uuid: String,
}

/// Record a page view.
///
/// 201 for a new visitor, 202 for a returning one, 204 when a filter drops
/// the request, 403 for an unknown tenant or unregistered referrer.
pub async fn capture(
    State(state): State<Arc<CaptureState>>,
    params: Result<Query<CaptureParams>, QueryRejection>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    form: Result<Form<CaptureForm>, FormRejection>,
) -> Response {
    match run_pipeline(&state, params, addr, &headers, form).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn run_pipeline(
    state: &CaptureState,
    params: Result<Query<CaptureParams>, QueryRejection>,
    addr: SocketAddr,
    headers: &HeaderMap,
    form: Result<Form<CaptureForm>, FormRejection>,
) -> Result<Response, CaptureError> {
    let storage = state.storage.as_ref();

    // An unreadable query string is an unusable tenant identifier
    let Query(params) = params.map_err(|rejection| {
        debug!(error = %rejection, "unreadable capture query string");
        CaptureError::TenantNotFound
    })?;
    let tenant = resolve_tenant(storage, params.dja_id.as_deref()).await?;

    // Browsers may send IDN hosts unencoded, so accept any UTF-8 here
    let referrer = parse_referrer(
        headers
            .get(REFERER)
            .and_then(|h| std::str::from_utf8(h.as_bytes()).ok()),
    );
    validate_domain(storage, &tenant, referrer.as_ref()).await?;

    let Form(form) = form.map_err(|rejection| {
        debug!(tenant = %tenant.uuid, error = %rejection, "unreadable capture payload");
        CaptureError::InvalidPayload
    })?;
    if has_control_chars(&form.pth) || has_control_chars(&form.qs) {
        debug!(tenant = %tenant.uuid, "capture payload contains control characters");
        return Err(CaptureError::InvalidPayload);
    }

    let client_ip = extract_client_ip(headers, addr.ip(), &state.config);

    if let Some(hit) = filters::evaluate(storage, tenant.id, client_ip, &form.pth).await? {
        match hit {
            FilterMatch::Ip { filter_id, netmask } => {
                debug!(tenant = %tenant.uuid, %client_ip, filter_id, %netmask, "capture filtered by IP");
            }
            FilterMatch::Path {
                filter_id,
                path_pattern,
            } => {
                debug!(tenant = %tenant.uuid, path = %form.pth, filter_id, %path_pattern, "capture filtered by path");
            }
        }
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let sessions = state.sessions.as_ref();
    let mut session = match Session::load(sessions, get_cookie(headers, SESSION_COOKIE)).await {
        Ok(session) => session,
        Err(err) => {
            warn!(error = %err, "session store unavailable, starting a fresh session");
            Session::default()
        }
    };

    let identity = identity::resolve(&mut session, get_cookie(headers, VISITOR_COOKIE));

    let attributes = RequestAttributes {
        path: form.pth,
        query_string: form.qs,
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string),
        client_ip,
        referrer,
    };
    let event = recorder::record(storage, &tenant, &identity, attributes).await?;

    debug!(
        tenant = %tenant.uuid,
        event_id = event.id,
        tracking_key = %identity.tracking_key,
        is_new_user = identity.is_new_user,
        "capture recorded"
    );

    let mut cookies = Vec::with_capacity(2);
    match session.persist(sessions).await {
        Ok(session_id) => cookies.push((
            SET_COOKIE,
            set_cookie_header(SESSION_COOKIE, &session_id, &session_cookie(&state.config)),
        )),
        Err(err) => warn!(error = %err, "failed to save session"),
    }
    if identity.is_new_user {
        cookies.push((
            SET_COOKIE,
            set_cookie_header(VISITOR_COOKIE, &identity.visitor_id, &visitor_cookie(&state.config)),
        ));
    }

    let status = if identity.is_new_user {
        StatusCode::CREATED
    } else {
        StatusCode::ACCEPTED
    };

    Ok((
        status,
        AppendHeaders(cookies),
        Json(CaptureResponse {
            dja_tracking_id: identity.tracking_key,
            dja_uuid: identity.visitor_id,
        }),
    )
        .into_response())
}

/// NUL and other control characters are never part of a real page path or
/// query string, and some backends refuse to store them.
fn has_control_chars(value: &str) -> bool {
    value.chars().any(char::is_control)
}

fn session_cookie(config: &CaptureConfig) -> CookieAttributes {
    CookieAttributes {
        max_age_secs: config.session_ttl_secs,
        http_only: true,
        secure: config.cookie_secure,
        same_site: config.cookie_same_site,
    }
}

fn visitor_cookie(config: &CaptureConfig) -> CookieAttributes {
    CookieAttributes {
        max_age_secs: config.visitor_cookie_max_age_secs,
        http_only: false,
        secure: config.cookie_secure,
        same_site: config.cookie_same_site,
    }
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
