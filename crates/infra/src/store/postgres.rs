//! Postgres-backed commerce store.
//!
//! Optimistic locking is enforced at the database level: every `Put*` write
//! becomes `UPDATE … WHERE id = $1 AND version = $2`, and a statement that
//! affects zero rows aborts the whole transaction with
//! [`StoreError::Conflict`]. Batches run inside one transaction, so
//! multi-row mutations (stock decrements + order insert, cancellation +
//! capacity restore) are all-or-nothing even under process crash.
//!
//! ## Error mapping
//!
//! | SQLx error | PG code | StoreError |
//! |------------|---------|------------|
//! | Database (unique violation) | `23505` | `DuplicateKey` |
//! | Database (check violation) | `23514` | `Conflict` (counter invariant raced) |
//! | Database (other) | any | `Unavailable` |
//! | PoolClosed / Io / Tls | — | `Unavailable` |
//! | Row decode failures | — | `Serialization` |

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use wayfare_booking::{Booking, BookingStatus};
use wayfare_core::{BookingId, Entity, OrderId, ProductId, SlotId, UserId};
use wayfare_inventory::{ProductStatus, ReservableSlot, StockableProduct};
use wayfare_ordering::{Order, OrderLine, OrderStatus};
use wayfare_payments::PaymentRef;

use super::r#trait::{
    CommerceStore, LedgerInsert, ReviewItem, ReviewReason, StoreError, WebhookRecord, Write,
    WriteBatch,
};

/// Postgres commerce store.
///
/// Clone-cheap (`Arc<PgPool>`); safe to share across threads. The sync
/// [`CommerceStore`] impl bridges onto the async inherent methods with
/// `tokio::runtime::Handle::block_on`, so it must be called from a thread
/// that can block inside a tokio runtime context.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect with a small dedicated pool. Schema is managed externally
    /// (see `crates/infra/schema.sql`).
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("connect: {e}")))?;
        Ok(Self::new(pool))
    }

    #[instrument(skip(self), fields(%id))]
    pub async fn load_slot(&self, id: SlotId) -> Result<Option<ReservableSlot>, StoreError> {
        let row = sqlx::query(
            "SELECT id, capacity, booked, available, price_per_guest, version FROM slots WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_slot", e))?;

        row.map(|r| slot_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(%id))]
    pub async fn load_product(
        &self,
        id: ProductId,
    ) -> Result<Option<StockableProduct>, StoreError> {
        let row = sqlx::query(
            "SELECT id, seller_id, stock, status, unit_price, version FROM products WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_product", e))?;

        row.map(|r| product_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(%id))]
    pub async fn load_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query(
            "SELECT id, slot_id, buyer_id, guests, total_price, status, payment_ref, \
             created_at, confirmed_at, cancelled_at, version FROM bookings WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_booking", e))?;

        row.map(|r| booking_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(%id))]
    pub async fn load_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(
            "SELECT id, buyer_id, seller_id, lines, total, status, payment_ref, \
             created_at, paid_at, resolved_at, version FROM orders WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_order", e))?;

        row.map(|r| order_from_row(&r)).transpose()
    }

    pub async fn create_slot(&self, slot: &ReservableSlot) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO slots (id, capacity, booked, available, price_per_guest, version) \
             VALUES ($1, $2, $3, $4, $5, 1)",
        )
        .bind(slot.id().as_uuid())
        .bind(to_i32(slot.capacity())?)
        .bind(to_i32(slot.booked())?)
        .bind(slot.is_available())
        .bind(to_i64(slot.price_per_guest())?)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_slot", e))?;
        Ok(())
    }

    pub async fn create_product(&self, product: &StockableProduct) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO products (id, seller_id, stock, status, unit_price, version) \
             VALUES ($1, $2, $3, $4, $5, 1)",
        )
        .bind(product.id().as_uuid())
        .bind(product.seller().as_uuid())
        .bind(to_i32(product.stock())?)
        .bind(product.status().as_str())
        .bind(to_i64(product.unit_price())?)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_product", e))?;
        Ok(())
    }

    pub async fn stale_bookings(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, slot_id, buyer_id, guests, total_price, status, payment_ref, \
             created_at, confirmed_at, cancelled_at, version FROM bookings \
             WHERE status IN ('pending_payment', 'payment_failed') AND created_at < $1 \
             ORDER BY created_at ASC",
        )
        .bind(cutoff)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stale_bookings", e))?;

        rows.iter().map(booking_from_row).collect()
    }

    pub async fn stale_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, buyer_id, seller_id, lines, total, status, payment_ref, \
             created_at, paid_at, resolved_at, version FROM orders \
             WHERE status IN ('pending_payment', 'payment_failed') AND created_at < $1 \
             ORDER BY created_at ASC",
        )
        .bind(cutoff)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stale_orders", e))?;

        rows.iter().map(order_from_row).collect()
    }

    pub async fn load_webhook_event(
        &self,
        external_id: &str,
    ) -> Result<Option<WebhookRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT external_id, kind, processed, processed_at, last_error, payload, \
             first_seen_at FROM webhook_events WHERE external_id = $1",
        )
        .bind(external_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_webhook_event", e))?;

        row.map(|r| webhook_from_row(&r)).transpose()
    }

    /// Insert under the primary-key uniqueness constraint; on a lost race,
    /// return the surviving row.
    pub async fn insert_webhook_event(
        &self,
        record: &WebhookRecord,
    ) -> Result<LedgerInsert, StoreError> {
        let result = sqlx::query(
            "INSERT INTO webhook_events \
             (external_id, kind, processed, processed_at, last_error, payload, first_seen_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (external_id) DO NOTHING",
        )
        .bind(&record.external_id)
        .bind(&record.kind)
        .bind(record.processed)
        .bind(record.processed_at)
        .bind(&record.last_error)
        .bind(&record.payload)
        .bind(record.first_seen_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_webhook_event", e))?;

        if result.rows_affected() == 1 {
            return Ok(LedgerInsert::Inserted);
        }
        let existing = self
            .load_webhook_event(&record.external_id)
            .await?
            .ok_or_else(|| {
                StoreError::Unavailable(format!(
                    "webhook event {} vanished after conflicting insert",
                    record.external_id
                ))
            })?;
        Ok(LedgerInsert::Duplicate(existing))
    }

    pub async fn save_webhook_event(&self, record: &WebhookRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE webhook_events SET processed = $2, processed_at = $3, last_error = $4 \
             WHERE external_id = $1",
        )
        .bind(&record.external_id)
        .bind(record.processed)
        .bind(record.processed_at)
        .bind(&record.last_error)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_webhook_event", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!(
                "webhook event {}",
                record.external_id
            )));
        }
        Ok(())
    }

    pub async fn insert_review(&self, item: &ReviewItem) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO review_queue (booking_id, order_id, reason, payment_ref, noted_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(item.booking_id.map(|id| *id.as_uuid()))
        .bind(item.order_id.map(|id| *id.as_uuid()))
        .bind(review_reason_str(item.reason))
        .bind(&item.payment_ref)
        .bind(item.noted_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_review", e))?;
        Ok(())
    }

    pub async fn load_reviews(&self) -> Result<Vec<ReviewItem>, StoreError> {
        let rows = sqlx::query(
            "SELECT booking_id, order_id, reason, payment_ref, noted_at \
             FROM review_queue ORDER BY noted_at ASC",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_reviews", e))?;

        rows.iter().map(review_from_row).collect()
    }

    /// Apply a batch inside one transaction. Any conditional write that
    /// affects zero rows rolls everything back with a conflict.
    #[instrument(skip(self, batch), fields(writes = batch.len()))]
    pub async fn apply_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        for write in batch.into_writes() {
            apply_write(&mut tx, write).await?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }
}

async fn apply_write(tx: &mut Transaction<'_, Postgres>, write: Write) -> Result<(), StoreError> {
    match write {
        Write::PutSlot {
            expected_version,
            slot,
        } => {
            let result = sqlx::query(
                "UPDATE slots SET booked = $2, available = $3, version = $4 \
                 WHERE id = $1 AND version = $5",
            )
            .bind(slot.id().as_uuid())
            .bind(to_i32(slot.booked())?)
            .bind(slot.is_available())
            .bind(to_i64(expected_version + 1)?)
            .bind(to_i64(expected_version)?)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("put_slot", e))?;

            conflict_if_unmatched(result.rows_affected(), "slot", slot.id())
        }
        Write::PutProduct {
            expected_version,
            product,
        } => {
            let result = sqlx::query(
                "UPDATE products SET stock = $2, status = $3, version = $4 \
                 WHERE id = $1 AND version = $5",
            )
            .bind(product.id().as_uuid())
            .bind(to_i32(product.stock())?)
            .bind(product.status().as_str())
            .bind(to_i64(expected_version + 1)?)
            .bind(to_i64(expected_version)?)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("put_product", e))?;

            conflict_if_unmatched(result.rows_affected(), "product", product.id())
        }
        Write::InsertBooking(booking) => {
            sqlx::query(
                "INSERT INTO bookings (id, slot_id, buyer_id, guests, total_price, status, \
                 payment_ref, created_at, confirmed_at, cancelled_at, version) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1)",
            )
            .bind(booking.id().as_uuid())
            .bind(booking.slot_id().as_uuid())
            .bind(booking.buyer().as_uuid())
            .bind(to_i32(booking.guests())?)
            .bind(to_i64(booking.total_price())?)
            .bind(booking.status().as_str())
            .bind(booking.payment_ref().as_str())
            .bind(booking.created_at())
            .bind(booking.confirmed_at())
            .bind(booking.cancelled_at())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_booking", e))?;
            Ok(())
        }
        Write::PutBooking {
            expected_version,
            booking,
        } => {
            let result = sqlx::query(
                "UPDATE bookings SET status = $2, confirmed_at = $3, cancelled_at = $4, \
                 version = $5 WHERE id = $1 AND version = $6",
            )
            .bind(booking.id().as_uuid())
            .bind(booking.status().as_str())
            .bind(booking.confirmed_at())
            .bind(booking.cancelled_at())
            .bind(to_i64(expected_version + 1)?)
            .bind(to_i64(expected_version)?)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("put_booking", e))?;

            conflict_if_unmatched(result.rows_affected(), "booking", booking.id())
        }
        Write::InsertOrder(order) => {
            let lines = serde_json::to_value(order.lines())
                .map_err(|e| StoreError::Serialization(format!("order lines: {e}")))?;
            sqlx::query(
                "INSERT INTO orders (id, buyer_id, seller_id, lines, total, status, \
                 payment_ref, created_at, paid_at, resolved_at, version) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1)",
            )
            .bind(order.id().as_uuid())
            .bind(order.buyer().as_uuid())
            .bind(order.seller().as_uuid())
            .bind(lines)
            .bind(to_i64(order.total())?)
            .bind(order.status().as_str())
            .bind(order.payment_ref().as_str())
            .bind(order.created_at())
            .bind(order.paid_at())
            .bind(order.resolved_at())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_order", e))?;
            Ok(())
        }
        Write::PutOrder {
            expected_version,
            order,
        } => {
            let result = sqlx::query(
                "UPDATE orders SET status = $2, paid_at = $3, resolved_at = $4, version = $5 \
                 WHERE id = $1 AND version = $6",
            )
            .bind(order.id().as_uuid())
            .bind(order.status().as_str())
            .bind(order.paid_at())
            .bind(order.resolved_at())
            .bind(to_i64(expected_version + 1)?)
            .bind(to_i64(expected_version)?)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("put_order", e))?;

            conflict_if_unmatched(result.rows_affected(), "order", order.id())
        }
    }
}

impl CommerceStore for PostgresStore {
    fn slot(&self, id: SlotId) -> Result<Option<ReservableSlot>, StoreError> {
        runtime_handle()?.block_on(self.load_slot(id))
    }

    fn product(&self, id: ProductId) -> Result<Option<StockableProduct>, StoreError> {
        runtime_handle()?.block_on(self.load_product(id))
    }

    fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        runtime_handle()?.block_on(self.load_booking(id))
    }

    fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        runtime_handle()?.block_on(self.load_order(id))
    }

    fn insert_slot(&self, slot: ReservableSlot) -> Result<(), StoreError> {
        runtime_handle()?.block_on(self.create_slot(&slot))
    }

    fn insert_product(&self, product: StockableProduct) -> Result<(), StoreError> {
        runtime_handle()?.block_on(self.create_product(&product))
    }

    fn pending_bookings_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Booking>, StoreError> {
        runtime_handle()?.block_on(self.stale_bookings(cutoff))
    }

    fn pending_orders_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        runtime_handle()?.block_on(self.stale_orders(cutoff))
    }

    fn webhook_event(&self, external_id: &str) -> Result<Option<WebhookRecord>, StoreError> {
        runtime_handle()?.block_on(self.load_webhook_event(external_id))
    }

    fn record_event_seen(&self, record: WebhookRecord) -> Result<LedgerInsert, StoreError> {
        runtime_handle()?.block_on(self.insert_webhook_event(&record))
    }

    fn update_webhook_event(&self, record: &WebhookRecord) -> Result<(), StoreError> {
        runtime_handle()?.block_on(self.save_webhook_event(record))
    }

    fn push_review(&self, item: ReviewItem) -> Result<(), StoreError> {
        runtime_handle()?.block_on(self.insert_review(&item))
    }

    fn pending_reviews(&self) -> Result<Vec<ReviewItem>, StoreError> {
        runtime_handle()?.block_on(self.load_reviews())
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        runtime_handle()?.block_on(self.apply_batch(batch))
    }
}

fn runtime_handle() -> Result<tokio::runtime::Handle, StoreError> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        StoreError::Unavailable(
            "PostgresStore requires a tokio runtime context for its sync facade".to_string(),
        )
    })
}

fn conflict_if_unmatched(
    rows_affected: u64,
    kind: &str,
    id: impl core::fmt::Display,
) -> Result<(), StoreError> {
    if rows_affected == 0 {
        return Err(StoreError::Conflict(format!("{kind} {id}: stale version")));
    }
    Ok(())
}

fn map_sqlx_error(operation: &str, error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => StoreError::DuplicateKey(format!("{operation}: {db}")),
            // A check constraint (e.g. stock >= 0) lost a race the version
            // column did not see; retriable like any other conflict.
            Some("23514") => StoreError::Conflict(format!("{operation}: {db}")),
            _ => StoreError::Unavailable(format!("{operation}: {db}")),
        },
        sqlx::Error::RowNotFound => StoreError::Missing(operation.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("{operation}: {error}"))
        }
        _ => StoreError::Unavailable(format!("{operation}: {error}")),
    }
}

fn to_i32(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Serialization(format!("{value} exceeds i32")))
}

fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Serialization(format!("{value} exceeds i64")))
}

fn get_u32(row: &PgRow, column: &str) -> Result<u32, StoreError> {
    let value: i32 = row
        .try_get(column)
        .map_err(|e| StoreError::Serialization(format!("{column}: {e}")))?;
    u32::try_from(value).map_err(|_| StoreError::Serialization(format!("{column}: negative")))
}

fn get_u64(row: &PgRow, column: &str) -> Result<u64, StoreError> {
    let value: i64 = row
        .try_get(column)
        .map_err(|e| StoreError::Serialization(format!("{column}: {e}")))?;
    u64::try_from(value).map_err(|_| StoreError::Serialization(format!("{column}: negative")))
}

fn get<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Serialization(format!("{column}: {e}")))
}

fn slot_from_row(row: &PgRow) -> Result<ReservableSlot, StoreError> {
    Ok(ReservableSlot::from_parts(
        SlotId::from_uuid(get::<Uuid>(row, "id")?),
        get_u32(row, "capacity")?,
        get_u32(row, "booked")?,
        get::<bool>(row, "available")?,
        get_u64(row, "price_per_guest")?,
        get_u64(row, "version")?,
    ))
}

fn product_from_row(row: &PgRow) -> Result<StockableProduct, StoreError> {
    let status: String = get(row, "status")?;
    Ok(StockableProduct::from_parts(
        ProductId::from_uuid(get::<Uuid>(row, "id")?),
        UserId::from_uuid(get::<Uuid>(row, "seller_id")?),
        get_u32(row, "stock")?,
        ProductStatus::from_str(&status).map_err(StoreError::Serialization)?,
        get_u64(row, "unit_price")?,
        get_u64(row, "version")?,
    ))
}

fn booking_from_row(row: &PgRow) -> Result<Booking, StoreError> {
    let status: String = get(row, "status")?;
    Ok(Booking::from_parts(
        BookingId::from_uuid(get::<Uuid>(row, "id")?),
        SlotId::from_uuid(get::<Uuid>(row, "slot_id")?),
        UserId::from_uuid(get::<Uuid>(row, "buyer_id")?),
        get_u32(row, "guests")?,
        get_u64(row, "total_price")?,
        BookingStatus::from_str(&status)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        PaymentRef::new(get::<String>(row, "payment_ref")?),
        get::<DateTime<Utc>>(row, "created_at")?,
        get::<Option<DateTime<Utc>>>(row, "confirmed_at")?,
        get::<Option<DateTime<Utc>>>(row, "cancelled_at")?,
        get_u64(row, "version")?,
    ))
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let status: String = get(row, "status")?;
    let lines: serde_json::Value = get(row, "lines")?;
    let lines: Vec<OrderLine> = serde_json::from_value(lines)
        .map_err(|e| StoreError::Serialization(format!("order lines: {e}")))?;

    Ok(Order::from_parts(
        OrderId::from_uuid(get::<Uuid>(row, "id")?),
        UserId::from_uuid(get::<Uuid>(row, "buyer_id")?),
        UserId::from_uuid(get::<Uuid>(row, "seller_id")?),
        lines,
        get_u64(row, "total")?,
        OrderStatus::from_str(&status).map_err(|e| StoreError::Serialization(e.to_string()))?,
        PaymentRef::new(get::<String>(row, "payment_ref")?),
        get::<DateTime<Utc>>(row, "created_at")?,
        get::<Option<DateTime<Utc>>>(row, "paid_at")?,
        get::<Option<DateTime<Utc>>>(row, "resolved_at")?,
        get_u64(row, "version")?,
    ))
}

fn webhook_from_row(row: &PgRow) -> Result<WebhookRecord, StoreError> {
    Ok(WebhookRecord {
        external_id: get(row, "external_id")?,
        kind: get(row, "kind")?,
        processed: get(row, "processed")?,
        processed_at: get::<Option<DateTime<Utc>>>(row, "processed_at")?,
        last_error: get::<Option<String>>(row, "last_error")?,
        payload: get::<serde_json::Value>(row, "payload")?,
        first_seen_at: get::<DateTime<Utc>>(row, "first_seen_at")?,
    })
}

fn review_from_row(row: &PgRow) -> Result<ReviewItem, StoreError> {
    let reason: String = get(row, "reason")?;
    Ok(ReviewItem {
        booking_id: get::<Option<Uuid>>(row, "booking_id")?.map(BookingId::from_uuid),
        order_id: get::<Option<Uuid>>(row, "order_id")?.map(OrderId::from_uuid),
        reason: review_reason_from_str(&reason)?,
        payment_ref: get::<Option<String>>(row, "payment_ref")?,
        noted_at: get::<DateTime<Utc>>(row, "noted_at")?,
    })
}

fn review_reason_str(reason: ReviewReason) -> &'static str {
    match reason {
        ReviewReason::RefundAfterCompletion => "refund_after_completion",
        ReviewReason::RefundAfterDelivery => "refund_after_delivery",
    }
}

fn review_reason_from_str(raw: &str) -> Result<ReviewReason, StoreError> {
    match raw {
        "refund_after_completion" => Ok(ReviewReason::RefundAfterCompletion),
        "refund_after_delivery" => Ok(ReviewReason::RefundAfterDelivery),
        other => Err(StoreError::Serialization(format!(
            "unknown review reason '{other}'"
        ))),
    }
}
