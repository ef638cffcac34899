use crate::models::tenant::{normalize_domain_pattern, validate_netmask, validate_path_pattern};
use crate::models::{
    Domain, EventQuery, IpFilter, NewRequestEvent, PathFilter, RequestEvent, Tenant,
};
use crate::storage::trait_def::{effective_limit, is_unique_violation, unix_now};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

const EVENT_COLUMNS: &str = "id, tenant_id, tracking_key, visitor_id, path, query_string, \
     user_agent, ip_address, referrer, domain, protocol, created_at";

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tenants (
                id BIGSERIAL PRIMARY KEY,
                uuid TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS domains (
                id BIGSERIAL PRIMARY KEY,
                tenant_id BIGINT NOT NULL REFERENCES tenants(id),
                pattern TEXT NOT NULL,
                UNIQUE (tenant_id, pattern)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ip_filters (
                id BIGSERIAL PRIMARY KEY,
                tenant_id BIGINT NOT NULL REFERENCES tenants(id),
                netmask TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS path_filters (
                id BIGSERIAL PRIMARY KEY,
                tenant_id BIGINT NOT NULL REFERENCES tenants(id),
                path_pattern TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS request_events (
                id BIGSERIAL PRIMARY KEY,
                tenant_id BIGINT NOT NULL REFERENCES tenants(id),
                tracking_key TEXT NOT NULL,
                visitor_id TEXT NOT NULL,
                path TEXT NOT NULL,
                query_string TEXT NOT NULL,
                user_agent TEXT,
                ip_address TEXT,
                referrer TEXT,
                domain TEXT,
                protocol TEXT,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_tenant ON request_events(tenant_id, created_at)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_tracking_key ON request_events(tracking_key)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_visitor ON request_events(visitor_id)")
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn find_tenant_by_uuid(&self, uuid: &str) -> Result<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            SELECT id, uuid, name, created_at
            FROM tenants
            WHERE uuid = $1
            "#,
        )
        .bind(uuid)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(tenant)
    }

    async fn list_domains(&self, tenant_id: i64) -> Result<Vec<Domain>> {
        let domains = sqlx::query_as::<_, Domain>(
            "SELECT id, tenant_id, pattern FROM domains WHERE tenant_id = $1 ORDER BY id",
        )
        .bind(tenant_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(domains)
    }

    async fn list_ip_filters(&self, tenant_id: i64) -> Result<Vec<IpFilter>> {
        let filters = sqlx::query_as::<_, IpFilter>(
            "SELECT id, tenant_id, netmask FROM ip_filters WHERE tenant_id = $1 ORDER BY id",
        )
        .bind(tenant_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(filters)
    }

    async fn list_path_filters(&self, tenant_id: i64) -> Result<Vec<PathFilter>> {
        let filters = sqlx::query_as::<_, PathFilter>(
            "SELECT id, tenant_id, path_pattern FROM path_filters WHERE tenant_id = $1 ORDER BY id",
        )
        .bind(tenant_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(filters)
    }

    async fn insert_event(&self, event: &NewRequestEvent) -> Result<RequestEvent> {
        let row = sqlx::query_as::<_, RequestEvent>(&format!(
            r#"
            INSERT INTO request_events (
                tenant_id, tracking_key, visitor_id, path, query_string,
                user_agent, ip_address, referrer, domain, protocol, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(event.tenant_id)
        .bind(&event.tracking_key)
        .bind(&event.visitor_id)
        .bind(&event.path)
        .bind(&event.query_string)
        .bind(event.user_agent.as_deref())
        .bind(event.ip_address.as_deref())
        .bind(event.referrer.as_deref())
        .bind(event.domain.as_deref())
        .bind(event.protocol.as_deref())
        .bind(event.created_at)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(row)
    }

    async fn list_events(&self, query: &EventQuery) -> Result<Vec<RequestEvent>> {
        let events = sqlx::query_as::<_, RequestEvent>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM request_events
            WHERE ($1::BIGINT IS NULL OR tenant_id = $1)
              AND ($2::TEXT IS NULL OR tracking_key = $2)
              AND ($3::TEXT IS NULL OR visitor_id = $3)
            ORDER BY id DESC
            LIMIT $4
            "#
        ))
        .bind(query.tenant_id)
        .bind(query.tracking_key.as_deref())
        .bind(query.visitor_id.as_deref())
        .bind(effective_limit(query.limit))
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(events)
    }

    async fn create_tenant(&self, name: &str) -> StorageResult<Tenant> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StorageError::Invalid("tenant name cannot be empty".to_string()));
        }

        let uuid = uuid::Uuid::new_v4().hyphenated().to_string();
        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (uuid, name, created_at)
            VALUES ($1, $2, $3)
            RETURNING id, uuid, name, created_at
            "#,
        )
        .bind(&uuid)
        .bind(name)
        .bind(unix_now())
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::Conflict
            } else {
                StorageError::Other(e.into())
            }
        })?;

        Ok(tenant)
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let tenants = sqlx::query_as::<_, Tenant>(
            "SELECT id, uuid, name, created_at FROM tenants ORDER BY id",
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(tenants)
    }

    async fn create_domain(&self, tenant_id: i64, pattern: &str) -> StorageResult<Domain> {
        let pattern = normalize_domain_pattern(pattern).map_err(StorageError::Invalid)?;

        let domain = sqlx::query_as::<_, Domain>(
            r#"
            INSERT INTO domains (tenant_id, pattern)
            VALUES ($1, $2)
            ON CONFLICT (tenant_id, pattern) DO NOTHING
            RETURNING id, tenant_id, pattern
            "#,
        )
        .bind(tenant_id)
        .bind(&pattern)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        domain.ok_or(StorageError::Conflict)
    }

    async fn create_ip_filter(&self, tenant_id: i64, netmask: &str) -> StorageResult<IpFilter> {
        let netmask = validate_netmask(netmask).map_err(StorageError::Invalid)?;

        let filter = sqlx::query_as::<_, IpFilter>(
            r#"
            INSERT INTO ip_filters (tenant_id, netmask)
            VALUES ($1, $2)
            RETURNING id, tenant_id, netmask
            "#,
        )
        .bind(tenant_id)
        .bind(&netmask)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        Ok(filter)
    }

    async fn create_path_filter(
        &self,
        tenant_id: i64,
        path_pattern: &str,
    ) -> StorageResult<PathFilter> {
        let path_pattern = validate_path_pattern(path_pattern).map_err(StorageError::Invalid)?;

        let filter = sqlx::query_as::<_, PathFilter>(
            r#"
            INSERT INTO path_filters (tenant_id, path_pattern)
            VALUES ($1, $2)
            RETURNING id, tenant_id, path_pattern
            "#,
        )
        .bind(tenant_id)
        .bind(&path_pattern)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        Ok(filter)
    }
}
