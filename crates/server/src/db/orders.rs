//! Order repository for database operations.
//!
//! UUIDs and timestamps are stored as text, so every read goes through a raw
//! row struct and a fallible conversion into the domain type.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use cartpool_core::{Order, OrderId};

use super::{RepositoryError, parse_column};

/// Fields supplied by the caller when creating an order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub vendor_name: String,
    pub vendor_url: String,
    pub deadline: DateTime<Utc>,
    pub creator_name: String,
    /// Stable subject of an authenticated creator, for standing admin rights.
    pub creator_subject: Option<String>,
    pub invite_only: bool,
    pub allow_oidc: bool,
    pub privacy_mode: bool,
}

/// Raw `orders` row as stored.
#[derive(sqlx::FromRow)]
struct OrderRow {
    id: String,
    vendor_name: String,
    vendor_url: String,
    deadline: String,
    creator_name: String,
    creator_subject: Option<String>,
    invite_only: i64,
    allow_oidc: i64,
    privacy_mode: i64,
    revision: i64,
    created_at: String,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_column::<OrderId>("order id", &row.id)?,
            vendor_name: row.vendor_name,
            vendor_url: row.vendor_url,
            deadline: parse_column::<DateTime<Utc>>("deadline", &row.deadline)?,
            creator_name: row.creator_name,
            creator_subject: row.creator_subject,
            invite_only: row.invite_only != 0,
            allow_oidc: row.allow_oidc != 0,
            privacy_mode: row.privacy_mode != 0,
            revision: row.revision,
            created_at: parse_column::<DateTime<Utc>>("created_at", &row.created_at)?,
        })
    }
}

const SELECT_COLUMNS: &str = "id, vendor_name, vendor_url, deadline, creator_name, \
     creator_subject, invite_only, allow_oidc, privacy_mode, revision, created_at";

/// Repository for order database operations.
pub struct OrderRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> OrderRepository<'a> {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new order at revision 0 and return it.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    pub async fn create(&self, new: NewOrder) -> Result<Order, RepositoryError> {
        let order = Order {
            id: OrderId::new(),
            vendor_name: new.vendor_name,
            vendor_url: new.vendor_url,
            deadline: new.deadline,
            creator_name: new.creator_name,
            creator_subject: new.creator_subject,
            invite_only: new.invite_only,
            allow_oidc: new.allow_oidc,
            privacy_mode: new.privacy_mode,
            revision: 0,
            created_at: Utc::now(),
        };

        sqlx::query(
            r"
            INSERT INTO orders (id, vendor_name, vendor_url, deadline, creator_name,
                                creator_subject, invite_only, allow_oidc, privacy_mode,
                                revision, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ",
        )
        .bind(order.id.to_string())
        .bind(&order.vendor_name)
        .bind(&order.vendor_url)
        .bind(order.deadline.to_rfc3339())
        .bind(&order.creator_name)
        .bind(order.creator_subject.as_deref())
        .bind(i64::from(order.invite_only))
        .bind(i64::from(order.allow_oidc))
        .bind(i64::from(order.privacy_mode))
        .bind(order.revision)
        .bind(order.created_at.to_rfc3339())
        .execute(self.pool)
        .await?;

        Ok(order)
    }

    /// Get an order by its ID.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if a stored column fails to parse.
    pub async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM orders WHERE id = ?1"
        ))
        .bind(id.to_string())
        .fetch_optional(self.pool)
        .await?;

        row.map(Order::try_from).transpose()
    }

    /// List orders created by the given authenticated subject, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if a stored column fails to parse.
    pub async fn list_by_creator(&self, subject: &str) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM orders
             WHERE creator_subject = ?1
             ORDER BY created_at DESC"
        ))
        .bind(subject)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
    }

    /// Replace the order deadline, bumping the revision in the same statement.
    ///
    /// Returns the updated order, whose `revision` is the committed one to
    /// hand to the broadcast hub.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no such order exists.
    pub async fn set_deadline(
        &self,
        id: OrderId,
        deadline: DateTime<Utc>,
    ) -> Result<Order, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders
             SET deadline = ?2, revision = revision + 1
             WHERE id = ?1
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(id.to_string())
        .bind(deadline.to_rfc3339())
        .fetch_optional(self.pool)
        .await?;

        row.map_or(Err(RepositoryError::NotFound), Order::try_from)
    }

    /// Update the login-allowed setting, bumping the revision.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no such order exists.
    pub async fn set_allow_oidc(
        &self,
        id: OrderId,
        allow_oidc: bool,
    ) -> Result<Order, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders
             SET allow_oidc = ?2, revision = revision + 1
             WHERE id = ?1
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(id.to_string())
        .bind(i64::from(allow_oidc))
        .fetch_optional(self.pool)
        .await?;

        row.map_or(Err(RepositoryError::NotFound), Order::try_from)
    }

    /// Bump the revision without changing any other column.
    ///
    /// Used when an operation must be observable to the broadcast hub (and
    /// therefore ordered) without altering stored order state, such as
    /// issuing an invite.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no such order exists.
    pub async fn bump_revision(&self, id: OrderId) -> Result<i64, RepositoryError> {
        let revision: Option<i64> =
            sqlx::query_scalar("UPDATE orders SET revision = revision + 1 WHERE id = ?1 RETURNING revision")
                .bind(id.to_string())
                .fetch_optional(self.pool)
                .await?;

        revision.ok_or(RepositoryError::NotFound)
    }
}
