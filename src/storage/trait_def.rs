use crate::models::{
    Domain, EventQuery, IpFilter, NewRequestEvent, PathFilter, RequestEvent, Tenant,
};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record already exists")]
    Conflict,
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Look up a tenant by its canonical hyphenated UUID
    async fn find_tenant_by_uuid(&self, uuid: &str) -> Result<Option<Tenant>>;

    /// Domains the tenant accepts traffic from
    async fn list_domains(&self, tenant_id: i64) -> Result<Vec<Domain>>;

    /// IP exclusion rules, in creation order
    async fn list_ip_filters(&self, tenant_id: i64) -> Result<Vec<IpFilter>>;

    /// Path exclusion rules, in creation order
    async fn list_path_filters(&self, tenant_id: i64) -> Result<Vec<PathFilter>>;

    /// Append one capture event. Never updates an existing row.
    async fn insert_event(&self, event: &NewRequestEvent) -> Result<RequestEvent>;

    /// Read back events, newest first
    async fn list_events(&self, query: &EventQuery) -> Result<Vec<RequestEvent>>;

    // Administrative operations

    async fn create_tenant(&self, name: &str) -> StorageResult<Tenant>;

    async fn list_tenants(&self) -> Result<Vec<Tenant>>;

    /// Register a hostname; fails with `Conflict` if the tenant already has it
    async fn create_domain(&self, tenant_id: i64, pattern: &str) -> StorageResult<Domain>;

    /// Register a CIDR exclusion; fails with `Invalid` if it does not parse
    async fn create_ip_filter(&self, tenant_id: i64, netmask: &str) -> StorageResult<IpFilter>;

    /// Register a path regex exclusion; fails with `Invalid` if it does not compile
    async fn create_path_filter(
        &self,
        tenant_id: i64,
        path_pattern: &str,
    ) -> StorageResult<PathFilter>;
}

pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) fn effective_limit(limit: i64) -> i64 {
    if limit <= 0 {
        EventQuery::DEFAULT_LIMIT
    } else {
        limit
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
