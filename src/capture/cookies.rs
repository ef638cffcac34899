use axum::http::{header::COOKIE, HeaderMap};

use crate::config::SameSite;

pub const SESSION_COOKIE: &str = "sessionid";
pub const VISITOR_COOKIE: &str = "dja_uuid";

/// First value of the named cookie across all `Cookie` headers
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"'))
}

#[derive(Debug, Clone, Copy)]
pub struct CookieAttributes {
    pub max_age_secs: u64,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
}

pub fn set_cookie_header(name: &str, value: &str, attributes: &CookieAttributes) -> String {
    let mut cookie = format!(
        "{name}={value}; Max-Age={}; Path=/; SameSite={}",
        attributes.max_age_secs,
        attributes.same_site.as_str()
    );
    if attributes.http_only {
        cookie.push_str("; HttpOnly");
    }
    if attributes.secure {
        cookie.push_str("; Secure");
    }
    cookie
}
