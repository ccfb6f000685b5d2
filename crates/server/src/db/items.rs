//! Item repository for database operations.
//!
//! Every item mutation bumps the owning order's revision inside the same
//! transaction, and returns that committed revision so the caller can hand
//! it to the broadcast hub in commit order.

use sqlx::SqlitePool;

use cartpool_core::{ActorKey, Item, ItemId, OrderId};

use super::{RepositoryError, parse_column};

/// Raw `order_items` row as stored.
#[derive(sqlx::FromRow)]
struct ItemRow {
    id: String,
    order_id: String,
    owner_key: String,
    owner_name: String,
    product_name: String,
    product_sku: Option<String>,
    product_url: Option<String>,
    quantity: String,
    note: Option<String>,
    added_at: String,
}

impl TryFrom<ItemRow> for Item {
    type Error = RepositoryError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_column::<ItemId>("item id", &row.id)?,
            order_id: parse_column::<OrderId>("order id", &row.order_id)?,
            owner: ActorKey::from(row.owner_key),
            owner_name: row.owner_name,
            product_name: row.product_name,
            product_sku: row.product_sku,
            product_url: row.product_url,
            quantity: row.quantity,
            note: row.note,
            added_at: parse_column("added_at", &row.added_at)?,
        })
    }
}

const SELECT_COLUMNS: &str = "id, order_id, owner_key, owner_name, product_name, \
     product_sku, product_url, quantity, note, added_at";

const BUMP_REVISION: &str =
    "UPDATE orders SET revision = revision + 1 WHERE id = ?1 RETURNING revision";

/// Repository for order item database operations.
pub struct ItemRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ItemRepository<'a> {
    /// Create a new item repository.
    #[must_use]
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a single item, scoped to its order.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if a stored column fails to parse.
    pub async fn get(
        &self,
        order_id: OrderId,
        item_id: ItemId,
    ) -> Result<Option<Item>, RepositoryError> {
        let row = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM order_items WHERE id = ?1 AND order_id = ?2"
        ))
        .bind(item_id.to_string())
        .bind(order_id.to_string())
        .fetch_optional(self.pool)
        .await?;

        row.map(Item::try_from).transpose()
    }

    /// List an order's items in the order they were added.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if a stored column fails to parse.
    pub async fn list_for_order(&self, order_id: OrderId) -> Result<Vec<Item>, RepositoryError> {
        let rows = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM order_items
             WHERE order_id = ?1
             ORDER BY added_at ASC, id ASC"
        ))
        .bind(order_id.to_string())
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(Item::try_from).collect()
    }

    /// Insert an item and bump the order revision in one transaction.
    ///
    /// Returns the committed revision.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the order does not exist.
    pub async fn insert(&self, item: &Item) -> Result<i64, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let revision: Option<i64> = sqlx::query_scalar(BUMP_REVISION)
            .bind(item.order_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(revision) = revision else {
            return Err(RepositoryError::NotFound);
        };

        sqlx::query(
            r"
            INSERT INTO order_items (id, order_id, owner_key, owner_name, product_name,
                                     product_sku, product_url, quantity, note, added_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
        )
        .bind(item.id.to_string())
        .bind(item.order_id.to_string())
        .bind(item.owner.as_str())
        .bind(&item.owner_name)
        .bind(&item.product_name)
        .bind(item.product_sku.as_deref())
        .bind(item.product_url.as_deref())
        .bind(&item.quantity)
        .bind(item.note.as_deref())
        .bind(item.added_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(revision)
    }

    /// Update an item's product fields and bump the order revision.
    ///
    /// Ownership columns (`owner_key`, `owner_name`) are deliberately not
    /// touched; an edit never transfers an item. Returns the committed
    /// revision.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the item does not exist in the
    /// given order.
    pub async fn update(&self, item: &Item) -> Result<i64, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r"
            UPDATE order_items
            SET product_name = ?3, product_sku = ?4, product_url = ?5,
                quantity = ?6, note = ?7
            WHERE id = ?1 AND order_id = ?2
            ",
        )
        .bind(item.id.to_string())
        .bind(item.order_id.to_string())
        .bind(&item.product_name)
        .bind(item.product_sku.as_deref())
        .bind(item.product_url.as_deref())
        .bind(&item.quantity)
        .bind(item.note.as_deref())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        let revision: Option<i64> = sqlx::query_scalar(BUMP_REVISION)
            .bind(item.order_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(revision) = revision else {
            return Err(RepositoryError::NotFound);
        };

        tx.commit().await?;
        Ok(revision)
    }

    /// Delete an item and bump the order revision.
    ///
    /// Returns the committed revision.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the item does not exist in the
    /// given order.
    pub async fn delete(
        &self,
        order_id: OrderId,
        item_id: ItemId,
    ) -> Result<i64, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM order_items WHERE id = ?1 AND order_id = ?2")
            .bind(item_id.to_string())
            .bind(order_id.to_string())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        let revision: Option<i64> = sqlx::query_scalar(BUMP_REVISION)
            .bind(order_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let Some(revision) = revision else {
            return Err(RepositoryError::NotFound);
        };

        tx.commit().await?;
        Ok(revision)
    }
}
