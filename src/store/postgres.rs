use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{
    DocumentStore, StoreError, TokenFilter, UserFilter, WriteBatch, WriteOp, BATCH_WRITE_LIMIT,
};
use crate::models::documents::Fields;
use crate::models::notification::{BroadcastRecord, DeliveryStatus, UserNotification};
use crate::models::user::{flags_from_value, User};

const USER_COLUMNS: &str = "id, full_name, fcm_token, current_city, role, app_settings, token_invalidated_at, last_token_error";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn query_users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM users WHERE TRUE", USER_COLUMNS));

        match &filter.token {
            TokenFilter::Any => {}
            TokenFilter::Present => {
                qb.push(" AND fcm_token IS NOT NULL");
            }
            TokenFilter::Equals(token) => {
                qb.push(" AND btrim(fcm_token) = ")
                    .push_bind(token.trim().to_string());
            }
        }
        if let Some(city) = &filter.current_city {
            qb.push(" AND current_city = ").push_bind(city.clone());
        }
        if let Some(role) = &filter.role {
            qb.push(" AND role = ").push_bind(role.clone());
        }
        if let Some(flag) = &filter.preference {
            qb.push(" AND app_settings -> ")
                .push_bind(flag.clone())
                .push(" = 'true'::jsonb");
        }
        qb.push(" ORDER BY id");

        let rows = qb
            .build_query_as::<UserRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<usize, StoreError> {
        if batch.len() > BATCH_WRITE_LIMIT {
            return Err(StoreError::BatchTooLarge(batch.len()));
        }

        let mut applied = 0u64;
        let mut tx = self.pool.begin().await?;
        for op in batch.into_ops() {
            match op {
                WriteOp::ClearToken {
                    user_id,
                    token,
                    error_code,
                } => {
                    applied += sqlx::query(
                        r#"UPDATE users
                           SET fcm_token = NULL, token_invalidated_at = NOW(), last_token_error = $3
                           WHERE id = $1 AND btrim(fcm_token) = $2"#,
                    )
                    .bind(&user_id)
                    .bind(token.trim())
                    .bind(&error_code)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                }
                WriteOp::CreateUserNotification {
                    user_id,
                    notification,
                } => {
                    applied += sqlx::query(
                        r#"INSERT INTO user_notifications (id, user_id, type, from_user_id, is_read, fields)
                           VALUES ($1, $2, $3, $4, FALSE, $5)"#,
                    )
                    .bind(uuid::Uuid::new_v4().simple().to_string())
                    .bind(&user_id)
                    .bind(&notification.kind)
                    .bind(&notification.from_user_id)
                    .bind(Json(&notification.fields))
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                }
            }
        }
        tx.commit().await?;

        Ok(applied as usize)
    }

    async fn list_user_notifications(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserNotification>, StoreError> {
        let rows = sqlx::query_as::<_, UserNotificationRow>(
            "SELECT id, user_id, type, from_user_id, is_read, fields, created_at FROM user_notifications WHERE user_id = $1 ORDER BY created_at DESC"
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UserNotification::from).collect())
    }

    async fn create_broadcast(&self, document: Fields) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        sqlx::query("INSERT INTO broadcast_notifications (id, document) VALUES ($1, $2)")
            .bind(&id)
            .bind(Json(&document))
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    async fn get_broadcast(&self, id: &str) -> Result<Option<BroadcastRecord>, StoreError> {
        let row = sqlx::query_as::<_, BroadcastRow>(
            r#"SELECT id, document, notification_sent, sent_at, processed_at, recipients_count,
                      failed_count, total_tokens, error, error_at
               FROM broadcast_notifications WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(BroadcastRecord::from))
    }

    async fn record_delivery_status(
        &self,
        id: &str,
        status: &DeliveryStatus,
    ) -> Result<(), StoreError> {
        match status {
            DeliveryStatus::Sent {
                recipients_count,
                failed_count,
                total_tokens,
            } => {
                sqlx::query(
                    r#"INSERT INTO broadcast_notifications
                           (id, document, notification_sent, sent_at, processed_at,
                            recipients_count, failed_count, total_tokens)
                       VALUES ($1, '{}'::jsonb, TRUE, NOW(), NOW(), $2, $3, $4)
                       ON CONFLICT (id) DO UPDATE
                       SET notification_sent = TRUE, sent_at = NOW(), processed_at = NOW(),
                           recipients_count = $2, failed_count = $3, total_tokens = $4"#,
                )
                .bind(id)
                .bind(*recipients_count as i64)
                .bind(*failed_count as i64)
                .bind(*total_tokens as i64)
                .execute(&self.pool)
                .await?;
            }
            DeliveryStatus::NotSent { reason } => {
                sqlx::query(
                    r#"INSERT INTO broadcast_notifications (id, document, notification_sent, error, processed_at)
                       VALUES ($1, '{}'::jsonb, FALSE, $2, NOW())
                       ON CONFLICT (id) DO UPDATE
                       SET notification_sent = FALSE, error = $2, processed_at = NOW()"#,
                )
                .bind(id)
                .bind(reason)
                .execute(&self.pool)
                .await?;
            }
            DeliveryStatus::Failed { error } => {
                sqlx::query(
                    r#"INSERT INTO broadcast_notifications
                           (id, document, notification_sent, error, error_at, processed_at)
                       VALUES ($1, '{}'::jsonb, FALSE, $2, NOW(), NOW())
                       ON CONFLICT (id) DO UPDATE
                       SET notification_sent = FALSE, error = $2, error_at = NOW(), processed_at = NOW()"#,
                )
                .bind(id)
                .bind(error)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }
}

// -- Row types --

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    full_name: Option<String>,
    fcm_token: Option<String>,
    current_city: Option<String>,
    role: Option<String>,
    app_settings: Json<serde_json::Value>,
    token_invalidated_at: Option<DateTime<Utc>>,
    last_token_error: Option<String>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            full_name: row.full_name,
            fcm_token: row.fcm_token,
            current_city: row.current_city,
            role: row.role,
            preferences: flags_from_value(Some(&row.app_settings.0)),
            token_invalidated_at: row.token_invalidated_at,
            last_token_error: row.last_token_error,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserNotificationRow {
    id: String,
    user_id: String,
    #[sqlx(rename = "type")]
    kind: String,
    from_user_id: Option<String>,
    is_read: bool,
    fields: Json<Fields>,
    created_at: DateTime<Utc>,
}

impl From<UserNotificationRow> for UserNotification {
    fn from(row: UserNotificationRow) -> Self {
        UserNotification {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind,
            from_user_id: row.from_user_id,
            is_read: row.is_read,
            created_at: row.created_at,
            fields: row.fields.0,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BroadcastRow {
    id: String,
    document: Json<Fields>,
    notification_sent: Option<bool>,
    sent_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
    recipients_count: Option<i64>,
    failed_count: Option<i64>,
    total_tokens: Option<i64>,
    error: Option<String>,
    error_at: Option<DateTime<Utc>>,
}

impl From<BroadcastRow> for BroadcastRecord {
    fn from(row: BroadcastRow) -> Self {
        BroadcastRecord {
            id: row.id,
            document: row.document.0,
            notification_sent: row.notification_sent,
            sent_at: row.sent_at,
            processed_at: row.processed_at,
            recipients_count: row.recipients_count,
            failed_count: row.failed_count,
            total_tokens: row.total_tokens,
            error: row.error,
            error_at: row.error_at,
        }
    }
}
