//! PostgreSQL store (sqlx)
//! 连接池、迁移与全部持久化查询

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    types::Json,
    PgPool, Postgres, QueryBuilder, Row,
};
use std::{fmt::Display, str::FromStr, time::Duration};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{
    audit::DecisionEvent,
    auth::{NewRefreshToken, RefreshTokenRecord},
    company::{Company, CompanySettings},
    device::DeviceCredential,
    permission::GrantSet,
    role::RoleBinding,
    user::User,
};

use super::store::{
    AuditStore, CompanyFilter, CompanyScope, CompanyStore, CredentialStore, DeviceFilter,
    RoleBindingFilter, RotationOutcome, Store, StoreError, UserFilter, UserStore,
};

pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Opens the connection pool described by `config`
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        tracing::debug!("Creating database connection pool...");

        let db = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(config.url.expose_secret())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to create database pool");
                StoreError::Database(e)
            })?;

        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database pool created"
        );
        Ok(Self { db })
    }

    /// Applies the embedded schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.db).await.map_err(|e| {
            tracing::error!(error = %e, "Migration failed");
            StoreError::Migration(e)
        })?;

        tracing::info!("Migrations completed");
        Ok(())
    }

    /// Pool gauges, sampled on demand
    pub fn record_pool_metrics(&self) {
        metrics::gauge!("store_pool_connections").set(self.db.size() as f64);
        metrics::gauge!("store_pool_idle").set(self.db.num_idle() as f64);
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

// ==================== Row mapping ====================

/// Text column holding an enum
fn text_column<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: T::Err| StoreError::Corrupt(format!("{}.{}: {}", column, raw, e)))
}

fn unique_violation(err: sqlx::Error, what: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(what.to_string())
        }
        _ => StoreError::Database(err),
    }
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        display_name: row.try_get("display_name")?,
        user_type: text_column(row, "user_type")?,
        status: text_column(row, "status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn binding_from_row(row: &PgRow) -> Result<RoleBinding, StoreError> {
    let overrides: Option<Json<GrantSet>> = row.try_get("overrides")?;
    Ok(RoleBinding {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        company_id: row.try_get("company_id")?,
        role: text_column(row, "role")?,
        is_primary: row.try_get("is_primary")?,
        status: text_column(row, "status")?,
        overrides: overrides.map(|o| o.0).filter(|o| !o.is_empty()),
        created_at: row.try_get("created_at")?,
        revoked_at: row.try_get("revoked_at")?,
    })
}

fn company_from_row(row: &PgRow) -> Result<Company, StoreError> {
    let settings: Json<CompanySettings> = row.try_get("settings")?;
    Ok(Company {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        company_type: text_column(row, "company_type")?,
        settings: settings.0,
        status: text_column(row, "status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn refresh_from_row(row: &PgRow) -> Result<RefreshTokenRecord, StoreError> {
    Ok(RefreshTokenRecord {
        id: row.try_get("id")?,
        token_hash: row.try_get("token_hash")?,
        user_id: row.try_get("user_id")?,
        family_id: row.try_get("family_id")?,
        expires_at: row.try_get("expires_at")?,
        used_at: row.try_get("used_at")?,
        revoked_at: row.try_get("revoked_at")?,
        replaced_by: row.try_get("replaced_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn device_from_row(row: &PgRow) -> Result<DeviceCredential, StoreError> {
    Ok(DeviceCredential {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        company_id: row.try_get("company_id")?,
        key_hash: row.try_get("key_hash")?,
        key_prefix: row.try_get("key_prefix")?,
        status: text_column(row, "status")?,
        last_seen_at: row.try_get("last_seen_at")?,
        created_at: row.try_get("created_at")?,
        revoked_at: row.try_get("revoked_at")?,
    })
}

fn collect<T>(
    rows: Vec<PgRow>,
    map: fn(&PgRow) -> Result<T, StoreError>,
) -> Result<Vec<T>, StoreError> {
    rows.iter().map(map).collect()
}

const INSERT_USER: &str = r#"
    INSERT INTO users (id, email, password_hash, display_name, user_type, status, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
"#;

const INSERT_REFRESH_TOKEN: &str = r#"
    INSERT INTO refresh_tokens (id, token_hash, user_id, family_id, expires_at, used_at, revoked_at, replaced_by, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
"#;

const UPSERT_ROLE_BINDING: &str = r#"
    INSERT INTO role_bindings (id, user_id, company_id, role, is_primary, status, overrides, created_at, revoked_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    ON CONFLICT (id) DO UPDATE SET
        role = EXCLUDED.role,
        is_primary = EXCLUDED.is_primary,
        status = EXCLUDED.status,
        overrides = EXCLUDED.overrides,
        revoked_at = EXCLUDED.revoked_at
"#;

fn bind_refresh_token<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    record: &'q RefreshTokenRecord,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(record.id)
        .bind(&record.token_hash)
        .bind(record.user_id)
        .bind(record.family_id)
        .bind(record.expires_at)
        .bind(record.used_at)
        .bind(record.revoked_at)
        .bind(record.replaced_by)
        .bind(record.created_at)
}

fn bind_role_binding<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    binding: &'q RoleBinding,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(binding.id)
        .bind(binding.user_id)
        .bind(binding.company_id)
        .bind(binding.role.as_str())
        .bind(binding.is_primary)
        .bind(binding.status.as_str())
        .bind(binding.overrides.as_ref().map(Json))
        .bind(binding.created_at)
        .bind(binding.revoked_at)
}

// ==================== Users & role bindings ====================

#[async_trait]
impl UserStore for PgStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, display_name, user_type, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                password_hash = EXCLUDED.password_hash,
                display_name = EXCLUDED.display_name,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(user.user_type.as_str())
        .bind(user.status.as_str())
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.db)
        .await
        .map_err(|e| unique_violation(e, "email already registered"))?;

        Ok(())
    }

    async fn create_user_with_binding(
        &self,
        user: &User,
        binding: &RoleBinding,
    ) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;

        sqlx::query(INSERT_USER)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.display_name)
            .bind(user.user_type.as_str())
            .bind(user.status.as_str())
            .bind(user.created_at)
            .bind(user.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| unique_violation(e, "email already registered"))?;

        bind_role_binding(sqlx::query(UPSERT_ROLE_BINDING), binding)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT u.* FROM users u WHERE TRUE");

        if let Some(user_type) = filter.user_type {
            builder.push(" AND u.user_type = ").push_bind(user_type.as_str());
        }
        if let Some(status) = filter.status {
            builder.push(" AND u.status = ").push_bind(status.as_str());
        }
        if filter.scope != CompanyScope::All {
            builder.push(
                " AND EXISTS (SELECT 1 FROM role_bindings b WHERE b.user_id = u.id AND b.status = 'active'",
            );
            filter.scope.push_sql(&mut builder, "b.company_id");
            builder.push(")");
        }
        builder.push(" ORDER BY u.email");

        let rows = builder.build().fetch_all(&self.db).await?;
        collect(rows, user_from_row)
    }

    async fn get_role_binding(&self, id: Uuid) -> Result<Option<RoleBinding>, StoreError> {
        let row = sqlx::query("SELECT * FROM role_bindings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(binding_from_row).transpose()
    }

    async fn find_role_bindings(
        &self,
        filter: &RoleBindingFilter,
    ) -> Result<Vec<RoleBinding>, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM role_bindings WHERE TRUE");

        if let Some(user_id) = filter.user_id {
            builder.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(company_id) = filter.company_id {
            builder.push(" AND company_id = ").push_bind(company_id);
        }
        if filter.active_only {
            builder.push(" AND status = 'active'");
        }
        builder.push(" ORDER BY created_at");

        let rows = builder.build().fetch_all(&self.db).await?;
        collect(rows, binding_from_row)
    }

    async fn upsert_role_binding(&self, binding: &RoleBinding) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;

        // 先降级其他主绑定，再写入，满足部分唯一索引
        if binding.is_primary {
            sqlx::query(
                "UPDATE role_bindings SET is_primary = FALSE WHERE user_id = $1 AND id <> $2 AND is_primary",
            )
            .bind(binding.user_id)
            .bind(binding.id)
            .execute(&mut *tx)
            .await?;
        }

        bind_role_binding(sqlx::query(UPSERT_ROLE_BINDING), binding)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn revoke_role_binding(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<RoleBinding>, StoreError> {
        let mut tx = self.db.begin().await?;

        let current = sqlx::query("SELECT * FROM role_bindings WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let current = match current.as_ref().map(binding_from_row).transpose()? {
            Some(binding) => binding,
            None => return Ok(None),
        };
        if !current.is_active() {
            return Ok(Some(current));
        }

        let row = sqlx::query(
            r#"
            UPDATE role_bindings
            SET status = 'revoked', revoked_at = $2, is_primary = FALSE
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_one(&mut *tx)
        .await?;
        let revoked = binding_from_row(&row)?;

        if current.is_primary {
            sqlx::query(
                r#"
                UPDATE role_bindings SET is_primary = TRUE
                WHERE id = (
                    SELECT id FROM role_bindings
                    WHERE user_id = $1 AND status = 'active'
                    ORDER BY created_at
                    LIMIT 1
                )
                "#,
            )
            .bind(current.user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(revoked))
    }
}

// ==================== Companies ====================

#[async_trait]
impl CompanyStore for PgStore {
    async fn get_company(&self, id: Uuid) -> Result<Option<Company>, StoreError> {
        let row = sqlx::query("SELECT * FROM companies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(company_from_row).transpose()
    }

    async fn upsert_company(&self, company: &Company) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO companies (id, name, company_type, settings, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                settings = EXCLUDED.settings,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(company.id)
        .bind(&company.name)
        .bind(company.company_type.as_str())
        .bind(Json(&company.settings))
        .bind(company.status.as_str())
        .bind(company.created_at)
        .bind(company.updated_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn find_companies(&self, filter: &CompanyFilter) -> Result<Vec<Company>, StoreError> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM companies WHERE TRUE");

        filter.scope.push_sql(&mut builder, "id");
        if !filter.include_deleted {
            builder.push(" AND status = 'active'");
        }
        builder.push(" ORDER BY name");

        let rows = builder.build().fetch_all(&self.db).await?;
        collect(rows, company_from_row)
    }
}

// ==================== Credentials ====================

#[async_trait]
impl CredentialStore for PgStore {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        bind_refresh_token(sqlx::query(INSERT_REFRESH_TOKEN), record)
            .execute(&self.db)
            .await
            .map_err(|e| unique_violation(e, "refresh token hash collision"))?;

        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(refresh_from_row).transpose()
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        successor: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<RotationOutcome, StoreError> {
        let mut tx = self.db.begin().await?;

        // 条件更新：只有一个并发请求能命中
        let consumed = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET used_at = $2, replaced_by = $3
            WHERE token_hash = $1
              AND used_at IS NULL
              AND revoked_at IS NULL
              AND expires_at > $2
            RETURNING *
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .bind(successor.id)
        .fetch_optional(&mut *tx)
        .await?;

        let previous = match consumed {
            Some(row) => refresh_from_row(&row)?,
            None => {
                let existing = sqlx::query("SELECT * FROM refresh_tokens WHERE token_hash = $1")
                    .bind(token_hash)
                    .fetch_optional(&mut *tx)
                    .await?;
                return Ok(match existing.as_ref().map(refresh_from_row).transpose()? {
                    Some(record) => RotationOutcome::classify(record, now),
                    None => RotationOutcome::Unknown,
                });
            }
        };

        let successor = successor.into_record(&previous, now);
        bind_refresh_token(sqlx::query(INSERT_REFRESH_TOKEN), &successor)
            .execute(&mut *tx)
            .await
            .map_err(|e| unique_violation(e, "refresh token hash collision"))?;

        tx.commit().await?;
        Ok(RotationOutcome::Rotated { previous, successor })
    }

    async fn revoke_refresh_family(
        &self,
        family_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $2 WHERE family_id = $1 AND revoked_at IS NULL",
        )
        .bind(family_id)
        .bind(at)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let family_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT family_id FROM refresh_tokens WHERE token_hash = $1 AND user_id = $2",
        )
        .bind(token_hash)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        match family_id {
            Some(family_id) => {
                self.revoke_refresh_family(family_id, at).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_user_refresh_tokens(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = $2 WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    async fn replace_device_key(
        &self,
        credential: &DeviceCredential,
    ) -> Result<Option<DeviceCredential>, StoreError> {
        let mut tx = self.db.begin().await?;

        // 只撤销同一公司的旧密钥；别家公司的有效密钥会让下面的插入撞上
        // device_credentials_one_active 唯一索引
        let previous = sqlx::query(
            r#"
            UPDATE device_credentials
            SET status = 'revoked', revoked_at = $3
            WHERE device_id = $1 AND company_id = $2 AND status = 'active'
            RETURNING *
            "#,
        )
        .bind(credential.device_id)
        .bind(credential.company_id)
        .bind(credential.created_at)
        .fetch_optional(&mut *tx)
        .await?;
        let previous = previous.as_ref().map(device_from_row).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO device_credentials (id, device_id, company_id, key_hash, key_prefix, status, last_seen_at, created_at, revoked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(credential.id)
        .bind(credential.device_id)
        .bind(credential.company_id)
        .bind(&credential.key_hash)
        .bind(&credential.key_prefix)
        .bind(credential.status.as_str())
        .bind(credential.last_seen_at)
        .bind(credential.created_at)
        .bind(credential.revoked_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| unique_violation(e, "device is registered to another company"))?;

        tx.commit().await?;
        Ok(previous)
    }

    async fn find_device_key_by_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<DeviceCredential>, StoreError> {
        let row = sqlx::query("SELECT * FROM device_credentials WHERE key_hash = $1")
            .bind(key_hash)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(device_from_row).transpose()
    }

    async fn touch_device(&self, credential_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE device_credentials SET last_seen_at = $2 WHERE id = $1")
            .bind(credential_id)
            .bind(at)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn revoke_device_key(
        &self,
        device_id: Uuid,
        company_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE device_credentials
            SET status = 'revoked', revoked_at = $3
            WHERE device_id = $1 AND company_id = $2 AND status = 'active'
            "#,
        )
        .bind(device_id)
        .bind(company_id)
        .bind(at)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_device_credentials(
        &self,
        filter: &DeviceFilter,
    ) -> Result<Vec<DeviceCredential>, StoreError> {
        let mut builder =
            QueryBuilder::<Postgres>::new("SELECT * FROM device_credentials WHERE TRUE");

        filter.scope.push_sql(&mut builder, "company_id");
        if let Some(device_id) = filter.device_id {
            builder.push(" AND device_id = ").push_bind(device_id);
        }
        if filter.active_only {
            builder.push(" AND status = 'active'");
        }
        builder.push(" ORDER BY created_at");

        let rows = builder.build().fetch_all(&self.db).await?;
        collect(rows, device_from_row)
    }
}

// ==================== Audit ====================

#[async_trait]
impl AuditStore for PgStore {
    async fn insert_decision_event(&self, event: &DecisionEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO authz_events (id, principal_id, principal_kind, page, action, target_company, allowed, reason, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.id)
        .bind(event.principal_id)
        .bind(&event.principal_kind)
        .bind(event.page.as_str())
        .bind(event.action.as_str())
        .bind(event.target_company)
        .bind(event.allowed)
        .bind(&event.reason)
        .bind(event.occurred_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}
