//! Capture endpoint integration tests
//!
//! These drive the full router against in-memory SQLite and the in-process
//! session store, carrying cookies between requests the way a browser would.

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::connect_info::ConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use djanalytics::capture::{create_capture_router, CaptureResponse};
use djanalytics::config::CaptureConfig;
use djanalytics::models::{
    Domain, EventQuery, IpFilter, NewRequestEvent, PathFilter, RequestEvent, Tenant,
};
use djanalytics::session::{MemorySessionStore, SessionData, SessionStore};
use djanalytics::storage::{SqliteStorage, Storage, StorageResult};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.9; rv:29.0) Gecko/20100101 Firefox/29.0";
const REFERER: &str = "http://djanalytics.example.com";
const QUERY_STRING: &str = "query_key=query_value&another_query_key=another_query_value";

/// Helper to create test storage
async fn create_test_storage() -> Arc<dyn Storage> {
    // One connection so every query sees the same in-memory database
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

async fn create_tenant(storage: &Arc<dyn Storage>) -> Tenant {
    let tenant = storage.create_tenant("testclient").await.unwrap();
    storage
        .create_domain(tenant.id, "djanalytics.example.com")
        .await
        .unwrap();
    tenant
}

fn create_app(storage: Arc<dyn Storage>, session_ttl: Duration) -> Router {
    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(1_000, session_ttl));
    let config = CaptureConfig {
        session_ttl_secs: session_ttl.as_secs().max(1),
        ..CaptureConfig::default()
    };
    create_capture_router(storage, sessions, config)
}

fn create_app_with_sessions(storage: Arc<dyn Storage>, sessions: Arc<dyn SessionStore>) -> Router {
    create_capture_router(storage, sessions, CaptureConfig::default())
}

fn form_body(path: &str, query_string: &str) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("qs", query_string)
        .append_pair("pth", path)
        .finish()
}

struct CaptureReply {
    status: StatusCode,
    set_cookies: Vec<String>,
    body: Vec<u8>,
}

impl CaptureReply {
    fn json(&self) -> CaptureResponse {
        serde_json::from_slice(&self.body).expect("capture response should be JSON")
    }

    fn text(&self) -> String {
        String::from_utf8(self.body.clone()).unwrap()
    }

    fn sets_cookie(&self, name: &str) -> bool {
        let prefix = format!("{name}=");
        self.set_cookies.iter().any(|c| c.starts_with(&prefix))
    }
}

/// Minimal browser: remembers cookies between requests
struct TestBrowser {
    app: Router,
    cookies: HashMap<String, String>,
    remote_ip: IpAddr,
}

impl TestBrowser {
    fn new(app: Router) -> Self {
        Self {
            app,
            cookies: HashMap::new(),
            remote_ip: "203.0.113.10".parse().unwrap(),
        }
    }

    async fn capture(&mut self, tenant_id: &str, referer: Option<&str>, body: Option<String>) -> CaptureReply {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("/capture?dja_id={tenant_id}"))
            .header(header::USER_AGENT, USER_AGENT);
        if let Some(referer) = referer {
            builder = builder.header(header::REFERER, referer);
        }
        if !self.cookies.is_empty() {
            let cookie = self
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(header::COOKIE, cookie);
        }
        let body = match body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
                Body::from(body)
            }
            None => Body::empty(),
        };

        let mut request = builder.body(body).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::new(self.remote_ip, 54321)));

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let set_cookies: Vec<String> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        for cookie in &set_cookies {
            let pair = cookie.split(';').next().unwrap();
            let (name, value) = pair.split_once('=').unwrap();
            self.cookies.insert(name.to_string(), value.to_string());
        }
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();

        CaptureReply {
            status,
            set_cookies,
            body,
        }
    }

    async fn page_view(&mut self, tenant_id: &str, path: &str) -> CaptureReply {
        self.capture(tenant_id, Some(REFERER), Some(form_body(path, QUERY_STRING)))
            .await
    }
}

async fn events_for(storage: &Arc<dyn Storage>, query: EventQuery) -> Vec<RequestEvent> {
    storage.list_events(&query).await.unwrap()
}

#[tokio::test]
async fn test_new_then_returning_visitor() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));

    // First request
    let reply = browser.page_view(&tenant.uuid, "/").await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert!(reply.sets_cookie("sessionid"));
    assert!(reply.sets_cookie("dja_uuid"));
    let first = reply.json();
    assert_eq!(browser.cookies.get("dja_uuid"), Some(&first.dja_uuid));

    let events = events_for(
        &storage,
        EventQuery {
            tracking_key: Some(first.dja_tracking_id.clone()),
            visitor_id: Some(first.dja_uuid.clone()),
            limit: 10,
            ..Default::default()
        },
    )
    .await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.query_string, QUERY_STRING);
    assert_eq!(event.path, "/");
    assert_eq!(event.tracking_key, first.dja_tracking_id);
    assert_eq!(event.visitor_id, first.dja_uuid);
    assert_eq!(event.tenant_id, tenant.id);

    // Second request keeps both identifiers
    let reply = browser.page_view(&tenant.uuid, "/").await;
    assert_eq!(reply.status, StatusCode::ACCEPTED);
    assert!(reply.sets_cookie("sessionid"));
    assert!(!reply.sets_cookie("dja_uuid"));
    let second = reply.json();
    assert_eq!(second.dja_tracking_id, first.dja_tracking_id);
    assert_eq!(second.dja_uuid, first.dja_uuid);

    let events = events_for(
        &storage,
        EventQuery {
            tracking_key: Some(first.dja_tracking_id.clone()),
            visitor_id: Some(first.dja_uuid.clone()),
            limit: 10,
            ..Default::default()
        },
    )
    .await;
    assert_eq!(events.len(), 2);

    // Terminate the session; the visitor cookie stays
    browser.cookies.remove("sessionid");
    let reply = browser.page_view(&tenant.uuid, "/").await;
    assert_eq!(reply.status, StatusCode::ACCEPTED);
    let third = reply.json();
    assert_ne!(third.dja_tracking_id, first.dja_tracking_id);
    assert_eq!(third.dja_uuid, first.dja_uuid);

    let events = events_for(
        &storage,
        EventQuery {
            visitor_id: Some(first.dja_uuid.clone()),
            limit: 10,
            ..Default::default()
        },
    )
    .await;
    assert_eq!(events.len(), 3);
}

#[tokio::test]
async fn test_expired_session_mints_new_tracking_key() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_millis(100)));

    let first = browser.page_view(&tenant.uuid, "/").await;
    assert_eq!(first.status, StatusCode::CREATED);
    let first = first.json();

    tokio::time::sleep(Duration::from_millis(300)).await;

    // The stale session cookie is still sent but no longer resolves
    let stale_session = browser.cookies.get("sessionid").cloned().unwrap();
    let reply = browser.page_view(&tenant.uuid, "/").await;
    assert_eq!(reply.status, StatusCode::ACCEPTED);
    let again = reply.json();
    assert_eq!(again.dja_uuid, first.dja_uuid);
    assert_ne!(again.dja_tracking_id, first.dja_tracking_id);
    assert_ne!(browser.cookies.get("sessionid"), Some(&stale_session));
}

#[tokio::test]
async fn test_cleared_visitor_cookie_is_a_new_user() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));

    let first = browser.page_view(&tenant.uuid, "/").await.json();

    browser.cookies.remove("dja_uuid");
    let reply = browser.page_view(&tenant.uuid, "/").await;
    assert_eq!(reply.status, StatusCode::CREATED);
    let again = reply.json();
    assert_ne!(again.dja_uuid, first.dja_uuid);
    assert_eq!(again.dja_tracking_id, first.dja_tracking_id);
}

#[tokio::test]
async fn test_event_captures_request_details() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));

    let reply = browser
        .capture(
            &tenant.uuid,
            Some("https://DJAnalytics.example.com:8443/landing?utm=1"),
            Some(form_body("/products/42", "color=blue")),
        )
        .await;
    assert_eq!(reply.status, StatusCode::CREATED);

    let events = events_for(&storage, EventQuery::for_tenant(tenant.id)).await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.path, "/products/42");
    assert_eq!(event.query_string, "color=blue");
    assert_eq!(event.user_agent.as_deref(), Some(USER_AGENT));
    assert_eq!(event.ip_address.as_deref(), Some("203.0.113.10"));
    assert_eq!(event.domain.as_deref(), Some("djanalytics.example.com"));
    assert_eq!(event.protocol.as_deref(), Some("https"));
    assert_eq!(
        event.referrer.as_deref(),
        Some("https://DJAnalytics.example.com:8443/landing?utm=1")
    );
    assert!(event.created_at > 0);
}

#[tokio::test]
async fn test_tenant_id_formats_are_normalized() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));

    let simple = tenant.uuid.replace('-', "").to_uppercase();
    let reply = browser.page_view(&simple, "/").await;
    assert_eq!(reply.status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_invalid_client_id() {
    let storage = create_test_storage().await;
    create_tenant(&storage).await;
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));

    let reply = browser.capture("bogus", Some(REFERER), None).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.text(), "Client not found");
    assert!(reply.set_cookies.is_empty());
    assert!(browser.cookies.is_empty());
}

#[tokio::test]
async fn test_unknown_client_id() {
    let storage = create_test_storage().await;
    create_tenant(&storage).await;
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));

    let unknown = uuid::Uuid::new_v4().to_string();
    let reply = browser.page_view(&unknown, "/").await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.text(), "Client not found");
    assert!(reply.set_cookies.is_empty());
}

#[tokio::test]
async fn test_missing_client_id() {
    let storage = create_test_storage().await;
    create_tenant(&storage).await;
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));

    let reply = browser.page_view("", "/").await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.text(), "Client not found");
}

#[tokio::test]
async fn test_invalid_domain() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));

    let reply = browser
        .capture(
            &tenant.uuid,
            Some("http://bogus.example.com"),
            Some(form_body("/", QUERY_STRING)),
        )
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.text(), "Invalid domain for client");
    assert!(reply.set_cookies.is_empty());

    let events = events_for(&storage, EventQuery::for_tenant(tenant.id)).await;
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_missing_referer_is_unauthorized() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));

    let reply = browser
        .capture(&tenant.uuid, None, Some(form_body("/", QUERY_STRING)))
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.text(), "Invalid domain for client");
}

#[tokio::test]
async fn test_domain_of_another_tenant_is_unauthorized() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    let other = storage.create_tenant("other").await.unwrap();
    storage
        .create_domain(other.id, "other.example.com")
        .await
        .unwrap();
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));

    let reply = browser
        .capture(
            &tenant.uuid,
            Some("http://other.example.com/"),
            Some(form_body("/", "")),
        )
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.text(), "Invalid domain for client");
}

#[tokio::test]
async fn test_filtered_ip() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    storage
        .create_ip_filter(tenant.id, "127.0.0.0/24")
        .await
        .unwrap();
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));
    browser.remote_ip = "127.0.0.1".parse().unwrap();

    let reply = browser.page_view(&tenant.uuid, "/").await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert!(reply.body.is_empty());
    assert!(reply.set_cookies.is_empty());
    assert!(browser.cookies.is_empty());

    let events = events_for(&storage, EventQuery::for_tenant(tenant.id)).await;
    assert!(events.is_empty());

    // Outside the block is recorded normally
    browser.remote_ip = "127.0.1.1".parse().unwrap();
    let reply = browser.page_view(&tenant.uuid, "/").await;
    assert_eq!(reply.status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_filtered_ip_leaves_existing_cookies_alone() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));

    let first = browser.page_view(&tenant.uuid, "/").await;
    assert_eq!(first.status, StatusCode::CREATED);

    storage
        .create_ip_filter(tenant.id, "203.0.113.0/24")
        .await
        .unwrap();
    let reply = browser.page_view(&tenant.uuid, "/").await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert!(reply.set_cookies.is_empty());

    let events = events_for(&storage, EventQuery::for_tenant(tenant.id)).await;
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_filtered_path() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    storage
        .create_path_filter(tenant.id, "^/exclude_me/.*")
        .await
        .unwrap();
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));
    browser.remote_ip = "127.0.0.1".parse().unwrap();

    let reply = browser
        .page_view(&tenant.uuid, "/exclude_me/should_not_report")
        .await;
    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert!(reply.set_cookies.is_empty());

    let events = events_for(&storage, EventQuery::for_tenant(tenant.id)).await;
    assert!(events.is_empty());

    let reply = browser.page_view(&tenant.uuid, "/keep/exclude_me/").await;
    assert_eq!(reply.status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_filters_of_other_tenants_do_not_apply() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    let other = storage.create_tenant("other").await.unwrap();
    storage.create_ip_filter(other.id, "0.0.0.0/0").await.unwrap();
    storage.create_path_filter(other.id, ".*").await.unwrap();
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));

    let reply = browser.page_view(&tenant.uuid, "/").await;
    assert_eq!(reply.status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_missing_path_is_rejected() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));

    let reply = browser
        .capture(&tenant.uuid, Some(REFERER), Some("qs=a%3Db".to_string()))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.text(), "Invalid capture payload");
    assert!(reply.set_cookies.is_empty());

    let reply = browser.capture(&tenant.uuid, Some(REFERER), None).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let events = events_for(&storage, EventQuery::for_tenant(tenant.id)).await;
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_concurrent_first_visits_get_distinct_identities() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    let app = create_app(storage.clone(), Duration::from_secs(60));

    let mut handles = vec![];
    for _ in 0..10 {
        let app = app.clone();
        let tenant_id = tenant.uuid.clone();
        handles.push(tokio::spawn(async move {
            let mut browser = TestBrowser::new(app);
            browser.page_view(&tenant_id, "/").await
        }));
    }

    let mut visitors = std::collections::HashSet::new();
    let mut tracking_keys = std::collections::HashSet::new();
    for handle in handles {
        let reply = handle.await.unwrap();
        assert_eq!(reply.status, StatusCode::CREATED);
        let body = reply.json();
        visitors.insert(body.dja_uuid);
        tracking_keys.insert(body.dja_tracking_id);
    }
    assert_eq!(visitors.len(), 10);
    assert_eq!(tracking_keys.len(), 10);

    let events = events_for(&storage, EventQuery::for_tenant(tenant.id)).await;
    assert_eq!(events.len(), 10);
}

#[tokio::test]
async fn test_unicode_domain_accepts_either_spelling() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    let domain = storage
        .create_domain(tenant.id, "bücher.example")
        .await
        .unwrap();
    assert_eq!(domain.pattern, "xn--bcher-kva.example");
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));

    // Raw UTF-8 hostname, as some browsers send it
    let reply = browser
        .capture(
            &tenant.uuid,
            Some("http://bücher.example/"),
            Some(form_body("/", "")),
        )
        .await;
    assert_eq!(reply.status, StatusCode::CREATED);

    let reply = browser
        .capture(
            &tenant.uuid,
            Some("http://xn--bcher-kva.example/regal"),
            Some(form_body("/regal", "")),
        )
        .await;
    assert_eq!(reply.status, StatusCode::ACCEPTED);

    let events = events_for(&storage, EventQuery::for_tenant(tenant.id)).await;
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .all(|e| e.domain.as_deref() == Some("xn--bcher-kva.example")));
}

#[tokio::test]
async fn test_repeated_client_id_is_not_found() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));

    let repeated = format!("{0}&dja_id={0}", tenant.uuid);
    let reply = browser.page_view(&repeated, "/").await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.text(), "Client not found");
    assert!(reply.set_cookies.is_empty());

    let events = events_for(&storage, EventQuery::for_tenant(tenant.id)).await;
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_control_characters_in_payload_are_rejected() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    let mut browser = TestBrowser::new(create_app(storage.clone(), Duration::from_secs(60)));

    let reply = browser
        .capture(&tenant.uuid, Some(REFERER), Some("pth=%2F%00x&qs=".to_string()))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.text(), "Invalid capture payload");
    assert!(reply.set_cookies.is_empty());

    let reply = browser
        .capture(&tenant.uuid, Some(REFERER), Some(form_body("/", "color=\u{1b}[31m")))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let events = events_for(&storage, EventQuery::for_tenant(tenant.id)).await;
    assert!(events.is_empty());

    // Non-ASCII text is fine
    let reply = browser.page_view(&tenant.uuid, "/straße").await;
    assert_eq!(reply.status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_health_check() {
    let storage = create_test_storage().await;
    let app = create_app(storage, Duration::from_secs(60));

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Storage whose event writes always fail
struct FailingInsertStorage {
    inner: Arc<dyn Storage>,
}

#[async_trait]
impl Storage for FailingInsertStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn find_tenant_by_uuid(&self, uuid: &str) -> Result<Option<Tenant>> {
        self.inner.find_tenant_by_uuid(uuid).await
    }

    async fn list_domains(&self, tenant_id: i64) -> Result<Vec<Domain>> {
        self.inner.list_domains(tenant_id).await
    }

    async fn list_ip_filters(&self, tenant_id: i64) -> Result<Vec<IpFilter>> {
        self.inner.list_ip_filters(tenant_id).await
    }

    async fn list_path_filters(&self, tenant_id: i64) -> Result<Vec<PathFilter>> {
        self.inner.list_path_filters(tenant_id).await
    }

    async fn insert_event(&self, _event: &NewRequestEvent) -> Result<RequestEvent> {
        Err(anyhow::anyhow!("database is unavailable"))
    }

    async fn list_events(&self, query: &EventQuery) -> Result<Vec<RequestEvent>> {
        self.inner.list_events(query).await
    }

    async fn create_tenant(&self, name: &str) -> StorageResult<Tenant> {
        self.inner.create_tenant(name).await
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        self.inner.list_tenants().await
    }

    async fn create_domain(&self, tenant_id: i64, pattern: &str) -> StorageResult<Domain> {
        self.inner.create_domain(tenant_id, pattern).await
    }

    async fn create_ip_filter(&self, tenant_id: i64, netmask: &str) -> StorageResult<IpFilter> {
        self.inner.create_ip_filter(tenant_id, netmask).await
    }

    async fn create_path_filter(
        &self,
        tenant_id: i64,
        path_pattern: &str,
    ) -> StorageResult<PathFilter> {
        self.inner.create_path_filter(tenant_id, path_pattern).await
    }
}

#[tokio::test]
async fn test_persistence_failure_is_an_internal_error() {
    let inner = create_test_storage().await;
    let tenant = create_tenant(&inner).await;
    let storage: Arc<dyn Storage> = Arc::new(FailingInsertStorage { inner });
    let mut browser = TestBrowser::new(create_app(storage, Duration::from_secs(60)));

    let reply = browser.page_view(&tenant.uuid, "/").await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(reply.set_cookies.is_empty());
}

/// Session backend that is down: nothing loads, nothing saves
struct FailingSessionStore;

#[async_trait]
impl SessionStore for FailingSessionStore {
    async fn load(&self, _session_id: &str) -> Result<Option<SessionData>> {
        Err(anyhow::anyhow!("session backend down"))
    }

    async fn save(&self, _session_id: &str, _data: SessionData) -> Result<()> {
        Err(anyhow::anyhow!("session backend down"))
    }
}

#[tokio::test]
async fn test_session_store_failure_still_records_without_session_cookie() {
    let storage = create_test_storage().await;
    let tenant = create_tenant(&storage).await;
    let app = create_app_with_sessions(storage.clone(), Arc::new(FailingSessionStore));
    let mut browser = TestBrowser::new(app);

    let reply = browser.page_view(&tenant.uuid, "/").await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert!(!reply.sets_cookie("sessionid"));
    assert!(reply.sets_cookie("dja_uuid"));
    let first = reply.json();

    // A stale session cookie cannot be loaded either; the visitor is still known
    browser
        .cookies
        .insert("sessionid".to_string(), "0123456789abcdef".to_string());
    let reply = browser.page_view(&tenant.uuid, "/").await;
    assert_eq!(reply.status, StatusCode::ACCEPTED);
    assert!(!reply.sets_cookie("sessionid"));
    let second = reply.json();
    assert_eq!(second.dja_uuid, first.dja_uuid);
    assert_ne!(second.dja_tracking_id, first.dja_tracking_id);

    let events = events_for(&storage, EventQuery::for_tenant(tenant.id)).await;
    assert_eq!(events.len(), 2);
}
