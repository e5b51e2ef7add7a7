//! PostgreSQL implementation of the intake reception store.
//!
//! This crate provides the production implementation of the
//! `ReceptionStore` trait from `intake-core`.
//!
//! # Features
//!
//! - One active reception per site enforced by a partial unique index
//! - Row locks (`FOR UPDATE`) around every locate-then-act sequence
//! - Item order from an identity column, not from timestamps
//! - Listing paged by site identity, then joined in a single scan
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE sites (
//!     id UUID PRIMARY KEY,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
//!     name TEXT NOT NULL
//! );
//!
//! CREATE TABLE sessions (
//!     id UUID PRIMARY KEY,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
//!     site_id UUID NOT NULL REFERENCES sites (id),
//!     status TEXT NOT NULL DEFAULT 'in_progress'
//! );
//!
//! CREATE UNIQUE INDEX sessions_one_active_per_site
//!     ON sessions (site_id) WHERE status = 'in_progress';
//!
//! CREATE TABLE items (
//!     id UUID PRIMARY KEY,
//!     seq BIGINT GENERATED ALWAYS AS IDENTITY,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
//!     type TEXT NOT NULL,
//!     session_id UUID NOT NULL REFERENCES sessions (id)
//! );
//! ```
//!
//! The full script, with checks and indexes, is applied by
//! [`PgReceptionStore::migrate`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use intake_core::IntakeService;
//! use intake_postgres::PgReceptionStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/intake").await?;
//! let store = PgReceptionStore::new(pool);
//! store.migrate().await?;
//!
//! let service = IntakeService::new(store);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use intake_core::{
    City, IntakeError, Item, ItemType, ListQuery, ReceptionStore, Result, Session,
    SessionStatus, Site, SiteRow,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

/// Schema script applied by [`PgReceptionStore::migrate`].
pub const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

/// Name of the partial unique index guarding one active reception per site.
pub const ACTIVE_SESSION_INDEX: &str = "sessions_one_active_per_site";

/// PostgreSQL reception store.
#[derive(Clone)]
pub struct PgReceptionStore {
    pool: PgPool,
}

impl PgReceptionStore {
    /// Create a store over an already connected pool.
    ///
    /// The pool's lifecycle stays with the caller; close it with
    /// [`PgPool::close`] when the process shuts down.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(storage_error)
    }

    /// Lock the site's reception in progress for the rest of `tx`.
    ///
    /// A concurrent close blocks on the row lock until `tx` ends, and a
    /// reception closed before the lock was taken is not returned.
    async fn lock_active_session(
        tx: &mut Transaction<'static, Postgres>,
        site_id: Uuid,
    ) -> Result<Uuid> {
        let row = sqlx::query(
            r#"
            SELECT id
            FROM sessions
            WHERE site_id = $1
              AND status = 'in_progress'
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(site_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage_error)?;

        match row {
            Some(row) => row.try_get("id").map_err(storage_error),
            None => Err(IntakeError::NoActiveSession { site_id }),
        }
    }
}

#[async_trait]
impl ReceptionStore for PgReceptionStore {
    async fn insert_site(&self, name: City) -> Result<Site> {
        let row = sqlx::query(
            r#"
            INSERT INTO sites (id, name)
            VALUES ($1, $2)
            RETURNING id, created_at, name
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        decode_site(&row, "id", "created_at", "name")
    }

    /// Insert a new reception in progress.
    ///
    /// No pre-check: the partial unique index and the site foreign key reject
    /// the insert, so a race resolves to a deterministic error.
    async fn open_session(&self, site_id: Uuid) -> Result<Session> {
        let mut tx = self.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO sessions (id, site_id, status)
            VALUES ($1, $2, 'in_progress')
            RETURNING id, created_at, site_id, status
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(site_id)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(err) => return Err(open_session_error(err, site_id)),
        };
        let session = decode_session(&row)?;

        tx.commit().await.map_err(storage_error)?;
        Ok(session)
    }

    /// Close the newest reception in progress in a single statement.
    async fn close_session(&self, site_id: Uuid) -> Result<Session> {
        let row = sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'closed'
            WHERE id = (
                SELECT id
                FROM sessions
                WHERE site_id = $1
                  AND status = 'in_progress'
                ORDER BY created_at DESC
                LIMIT 1
                FOR UPDATE
            )
            RETURNING id, created_at, site_id, status
            "#,
        )
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        match row {
            Some(row) => decode_session(&row),
            None => Err(IntakeError::NoActiveSession { site_id }),
        }
    }

    async fn append_item(&self, site_id: Uuid, item_type: ItemType) -> Result<Item> {
        let mut tx = self.begin().await?;
        let session_id = Self::lock_active_session(&mut tx, site_id).await?;

        let row = sqlx::query(
            r#"
            INSERT INTO items (id, type, session_id)
            VALUES ($1, $2, $3)
            RETURNING id, created_at, type, session_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(item_type.as_str())
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_error)?;
        let item = decode_item(&row, "id", "created_at", "type", "session_id")?;

        tx.commit().await.map_err(storage_error)?;
        Ok(item)
    }

    /// Delete exactly the newest item of the active reception.
    async fn pop_last_item(&self, site_id: Uuid) -> Result<()> {
        let mut tx = self.begin().await?;
        let session_id = Self::lock_active_session(&mut tx, site_id).await?;

        let result = sqlx::query(
            r#"
            DELETE FROM items
            WHERE id = (
                SELECT id
                FROM items
                WHERE session_id = $1
                ORDER BY seq DESC
                LIMIT 1
            )
            "#,
        )
        .bind(session_id)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            // Dropping `tx` rolls back the row lock.
            return Err(IntakeError::EmptySession { session_id });
        }

        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    /// Page by site identity first, then join sessions and items onto exactly
    /// that set of sites without further limiting.
    async fn list_site_rows(&self, query: &ListQuery) -> Result<Vec<SiteRow>> {
        let rows = sqlx::query(
            r#"
            WITH page AS (
                SELECT id, created_at, name
                FROM sites
                ORDER BY created_at, id
                LIMIT $1 OFFSET $2
            )
            SELECT
                p.id AS site_id,
                p.created_at AS site_created_at,
                p.name AS site_name,
                s.id AS session_id,
                s.created_at AS session_created_at,
                s.status AS session_status,
                i.id AS item_id,
                i.created_at AS item_created_at,
                i.type AS item_type
            FROM page p
            LEFT JOIN sessions s
                   ON s.site_id = p.id
                  AND ($3::timestamptz IS NULL OR s.created_at >= $3)
                  AND ($4::timestamptz IS NULL OR s.created_at <= $4)
            LEFT JOIN items i
                   ON i.session_id = s.id
            ORDER BY p.created_at, p.id, s.created_at, s.id, i.seq
            "#,
        )
        .bind(query.limit())
        .bind(query.offset())
        .bind(query.start())
        .bind(query.end())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.iter().map(decode_site_row).collect()
    }
}

/// Map a driver error to the intake taxonomy.
///
/// Serialization failures and deadlocks are lost races; anything else is an
/// infrastructure failure.
fn storage_error(err: sqlx::Error) -> IntakeError {
    if let Some(db) = err.as_database_error() {
        if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) {
            debug!(code = ?db.code(), "transaction lost a race");
            return IntakeError::conflict(db.message().to_string());
        }
    }
    IntakeError::infrastructure(err)
}

fn open_session_error(err: sqlx::Error, site_id: Uuid) -> IntakeError {
    if let Some(db) = err.as_database_error() {
        if db.is_unique_violation() && db.constraint() == Some(ACTIVE_SESSION_INDEX) {
            return IntakeError::ActiveSessionExists { site_id };
        }
        if db.is_foreign_key_violation() {
            return IntakeError::SiteNotFound { site_id };
        }
    }
    storage_error(err)
}

fn decode_site(row: &PgRow, id: &str, created_at: &str, name: &str) -> Result<Site> {
    let name: String = row.try_get(name).map_err(storage_error)?;
    Ok(Site {
        id: row.try_get(id).map_err(storage_error)?,
        created_at: row.try_get(created_at).map_err(storage_error)?,
        name: name.parse().map_err(IntakeError::infrastructure)?,
    })
}

fn decode_session(row: &PgRow) -> Result<Session> {
    let status: String = row.try_get("status").map_err(storage_error)?;
    Ok(Session {
        id: row.try_get("id").map_err(storage_error)?,
        created_at: row.try_get("created_at").map_err(storage_error)?,
        site_id: row.try_get("site_id").map_err(storage_error)?,
        status: status.parse().map_err(IntakeError::infrastructure)?,
    })
}

fn decode_item(
    row: &PgRow,
    id: &str,
    created_at: &str,
    item_type: &str,
    session_id: &str,
) -> Result<Item> {
    let item_type: String = row.try_get(item_type).map_err(storage_error)?;
    Ok(Item {
        id: row.try_get(id).map_err(storage_error)?,
        created_at: row.try_get(created_at).map_err(storage_error)?,
        item_type: item_type.parse().map_err(IntakeError::infrastructure)?,
        session_id: row.try_get(session_id).map_err(storage_error)?,
    })
}

fn decode_site_row(row: &PgRow) -> Result<SiteRow> {
    let site = decode_site(row, "site_id", "site_created_at", "site_name")?;

    let session_id: Option<Uuid> = row.try_get("session_id").map_err(storage_error)?;
    let Some(session_id) = session_id else {
        return Ok(SiteRow::bare(site));
    };

    let created_at: DateTime<Utc> = row.try_get("session_created_at").map_err(storage_error)?;
    let status: String = row.try_get("session_status").map_err(storage_error)?;
    let session = Session {
        id: session_id,
        created_at,
        site_id: site.id,
        status: status
            .parse::<SessionStatus>()
            .map_err(IntakeError::infrastructure)?,
    };

    let item_id: Option<Uuid> = row.try_get("item_id").map_err(storage_error)?;
    let item = match item_id {
        Some(item_id) => {
            let created_at: DateTime<Utc> =
                row.try_get("item_created_at").map_err(storage_error)?;
            let item_type: String = row.try_get("item_type").map_err(storage_error)?;
            Some(Item {
                id: item_id,
                created_at,
                item_type: item_type.parse().map_err(IntakeError::infrastructure)?,
                session_id,
            })
        }
        None => None,
    };

    Ok(SiteRow {
        site,
        session: Some(session),
        item,
    })
}
