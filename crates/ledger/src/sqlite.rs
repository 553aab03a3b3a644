use async_trait::async_trait;
use sqlx::error::{DatabaseError, ErrorKind};

use orderdesk_core::domain::order::OrderRecord;
use orderdesk_core::ledger::{LedgerError, OrderLedger};

use crate::DbPool;

/// Local append-only ledger backed by the `order_ledger` table.
pub struct SqlOrderLedger {
    pool: DbPool,
}

impl SqlOrderLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderLedger for SqlOrderLedger {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn append(&self, order: &OrderRecord) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO order_ledger
                 (order_date, user_name, user_id, product, quantity, phone, submitted_at, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&order.date)
        .bind(&order.user_name)
        .bind(order.user_id.0)
        .bind(&order.product_descriptor)
        .bind(&order.quantity)
        .bind(&order.phone)
        .bind(&order.submitted_at)
        .bind(order.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn readiness(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1 FROM order_ledger LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }
}

const SQLITE_CONSTRAINT: i32 = 19;

/// Constraint and trigger aborts are final; everything else may clear up.
fn storage_error(error: sqlx::Error) -> LedgerError {
    match &error {
        sqlx::Error::Database(database) if is_constraint(&**database) => {
            LedgerError::Rejected(database.message().to_owned())
        }
        _ => LedgerError::Storage(error.to_string()),
    }
}

// SQLite reports extended result codes; the low byte is the primary code.
fn is_constraint(error: &dyn DatabaseError) -> bool {
    !matches!(error.kind(), ErrorKind::Other)
        || error
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| code & 0xff == SQLITE_CONSTRAINT)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use sqlx::Row;

    use orderdesk_core::domain::order::{OrderRecord, OrderStatus, Sender, UserId};
    use orderdesk_core::domain::session::Session;
    use orderdesk_core::ledger::{LedgerError, OrderLedger};

    use super::SqlOrderLedger;
    use crate::{connect_with_settings, migrations::run_pending};

    /// Stored rows, newest first.
    async fn stored(ledger: &SqlOrderLedger) -> Vec<OrderRecord> {
        let rows = sqlx::query(
            "SELECT order_date, user_name, user_id, product, quantity, phone, submitted_at, status
             FROM order_ledger ORDER BY id DESC",
        )
        .fetch_all(&ledger.pool)
        .await
        .expect("read ledger rows");

        rows.iter()
            .map(|row| {
                assert_eq!(row.get::<String, _>("status"), OrderStatus::New.as_str());
                OrderRecord {
                    date: row.get("order_date"),
                    user_name: row.get("user_name"),
                    user_id: UserId(row.get("user_id")),
                    product_descriptor: row.get("product"),
                    quantity: row.get("quantity"),
                    phone: row.get("phone"),
                    submitted_at: row.get("submitted_at"),
                    status: OrderStatus::New,
                }
            })
            .collect()
    }

    async fn ledger() -> SqlOrderLedger {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        SqlOrderLedger::new(pool)
    }

    fn record(user: i64, phone: &str) -> OrderRecord {
        let submitted_at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).single().expect("time");
        let mut session = Session::open(UserId(user), "Торт Наполеон", submitted_at);
        session.quantity = Some("3".to_owned());
        session.phone = Some(phone.to_owned());
        OrderRecord::from_session(&session, &Sender::new(user, "Олена"), submitted_at)
            .expect("complete session")
    }

    #[tokio::test]
    async fn append_stores_row_in_column_order() {
        let ledger = ledger().await;
        let order = record(42, "+380501234567");

        ledger.append(&order).await.expect("append");

        let stored = stored(&ledger).await;
        assert_eq!(stored, vec![order.clone()]);
        assert_eq!(stored[0].row()[0], "2026-03-14");
        assert_eq!(stored[0].row()[6], "2026-03-14 09:26:53");
        assert_eq!(stored[0].row()[7], "New");
    }

    #[tokio::test]
    async fn appends_accumulate_newest_first() {
        let ledger = ledger().await;
        ledger.append(&record(1, "111")).await.expect("first");
        ledger.append(&record(2, "222")).await.expect("second");

        let rows = stored(&ledger).await;
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].phone.as_str(), rows[1].phone.as_str()), ("222", "111"));
    }

    #[tokio::test]
    async fn stored_rows_cannot_be_rewritten() {
        let ledger = ledger().await;
        ledger.append(&record(7, "777")).await.expect("append");

        let update = sqlx::query("UPDATE order_ledger SET phone = 'changed'")
            .execute(&ledger.pool)
            .await;
        let delete = sqlx::query("DELETE FROM order_ledger").execute(&ledger.pool).await;

        assert!(update.is_err());
        assert!(delete.is_err());
        assert_eq!(stored(&ledger).await.len(), 1);
    }

    #[tokio::test]
    async fn constraint_aborts_are_rejected_not_retried() {
        let ledger = ledger().await;
        sqlx::query(
            "CREATE TRIGGER order_ledger_no_blank_phone
             BEFORE INSERT ON order_ledger WHEN NEW.phone = ''
             BEGIN
                 SELECT RAISE(ABORT, 'phone must not be blank');
             END",
        )
        .execute(&ledger.pool)
        .await
        .expect("install trigger");

        let result = ledger.append(&record(8, "")).await;

        assert!(
            matches!(result, Err(LedgerError::Rejected(ref detail)) if detail.contains("blank")),
            "got {result:?}"
        );
        assert!(!result.as_ref().err().is_some_and(LedgerError::is_retryable));
        assert!(stored(&ledger).await.is_empty());
        ledger.append(&record(8, "888")).await.expect("valid row still appends");
    }

    #[tokio::test]
    async fn readiness_fails_before_migrations() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        let ledger = SqlOrderLedger::new(pool);

        let readiness = ledger.readiness().await;
        assert!(matches!(readiness, Err(LedgerError::Storage(_))));
    }
}
