//! Payment and expense records plus the ledgers they feed.
//!
//! A record and its ledger entry are written in one transaction, keyed by the
//! statement row they came from, so a retried post returns the original record.

use async_trait::async_trait;
use chrono::NaiveDate;
use tally_core::{
    CollaboratorError, DateRange, Ledger, LedgerRecord, LedgerRecordKind, LedgerRecordRef, NewExpense,
    NewPayment, ResidentId, RowId,
};
use tracing::debug;

use crate::db::DbPool;
use crate::error::StorageError;

fn positive(amount_cents: i64, what: &str) -> Result<(), StorageError> {
    if amount_cents <= 0 {
        return Err(StorageError::Conflict(format!("{what} amount must be positive, got {amount_cents}")));
    }
    Ok(())
}

pub async fn record_payment(pool: &DbPool, payment: &NewPayment) -> Result<LedgerRecordRef, StorageError> {
    positive(payment.amount_cents, "payment")?;
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO payment_records (source_row_id, import_id, resident_id, date, amount_cents, narration,
            reference, recorded_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_row_id) DO NOTHING
        "#,
    )
    .bind(payment.source_row_id.0)
    .bind(payment.import_id.0)
    .bind(payment.resident_id.0)
    .bind(payment.date)
    .bind(payment.amount_cents)
    .bind(&payment.narration)
    .bind(&payment.reference)
    .bind(&payment.recorded_by.0)
    .execute(&mut *tx)
    .await?
    .rows_affected()
        == 1;

    let id: i64 = sqlx::query_scalar("SELECT id FROM payment_records WHERE source_row_id = ?")
        .bind(payment.source_row_id.0)
        .fetch_one(&mut *tx)
        .await?;

    if inserted {
        sqlx::query("INSERT INTO resident_ledger (resident_id, payment_id, date, amount_cents) VALUES (?, ?, ?, ?)")
            .bind(payment.resident_id.0)
            .bind(id)
            .bind(payment.date)
            .bind(payment.amount_cents)
            .execute(&mut *tx)
            .await?;
    } else {
        debug!(row = %payment.source_row_id, payment = id, "payment already recorded for row");
    }

    tx.commit().await?;
    Ok(LedgerRecordRef::new(LedgerRecordKind::Payment, id))
}

pub async fn record_expense(pool: &DbPool, expense: &NewExpense) -> Result<LedgerRecordRef, StorageError> {
    positive(expense.amount_cents, "expense")?;
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO expense_records (source_row_id, import_id, category, date, amount_cents, narration,
            reference, recorded_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_row_id) DO NOTHING
        "#,
    )
    .bind(expense.source_row_id.0)
    .bind(expense.import_id.0)
    .bind(&expense.category)
    .bind(expense.date)
    .bind(expense.amount_cents)
    .bind(&expense.narration)
    .bind(&expense.reference)
    .bind(&expense.recorded_by.0)
    .execute(&mut *tx)
    .await?
    .rows_affected()
        == 1;

    let id: i64 = sqlx::query_scalar("SELECT id FROM expense_records WHERE source_row_id = ?")
        .bind(expense.source_row_id.0)
        .fetch_one(&mut *tx)
        .await?;

    if inserted {
        sqlx::query("INSERT INTO expense_ledger (category, expense_id, date, amount_cents) VALUES (?, ?, ?, ?)")
            .bind(&expense.category)
            .bind(id)
            .bind(expense.date)
            .bind(expense.amount_cents)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(LedgerRecordRef::new(LedgerRecordKind::Expense, id))
}

/// Payments (positive) and expenses (negative) dated inside `range`.
pub async fn records_between(pool: &DbPool, range: DateRange) -> Result<Vec<LedgerRecord>, StorageError> {
    let rows = sqlx::query_as::<_, (String, i64, NaiveDate, i64, String, Option<String>, i64)>(
        r#"
        SELECT 'payment', id, date, amount_cents, narration, reference, source_row_id
        FROM payment_records WHERE date BETWEEN ?1 AND ?2
        UNION ALL
        SELECT 'expense', id, date, -amount_cents, narration, reference, source_row_id
        FROM expense_records WHERE date BETWEEN ?1 AND ?2
        ORDER BY 3, 2
        "#,
    )
    .bind(range.start)
    .bind(range.end)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(kind, id, date, amount_cents, narration, reference, source_row_id)| -> Result<LedgerRecord, StorageError> {
            Ok(LedgerRecord {
                record: LedgerRecordRef::new(kind.parse()?, id),
                date,
                amount_cents,
                narration: Some(narration),
                reference,
                source_row_id: Some(RowId(source_row_id)),
            })
        })
        .collect()
}

/// Sum of everything the resident has paid through processed statements.
pub async fn resident_balance(pool: &DbPool, resident_id: ResidentId) -> Result<i64, StorageError> {
    let total: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(amount_cents), 0) FROM resident_ledger WHERE resident_id = ?")
            .bind(resident_id.0)
            .fetch_one(pool)
            .await?;
    Ok(total)
}

pub async fn category_total(pool: &DbPool, category: &str) -> Result<i64, StorageError> {
    let total: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(amount_cents), 0) FROM expense_ledger WHERE category = ?")
        .bind(category)
        .fetch_one(pool)
        .await?;
    Ok(total)
}

/// The ledger collaborator backed by the local payment and expense tables.
#[derive(Clone)]
pub struct SqliteLedger {
    pool: DbPool,
}

impl SqliteLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn unavailable(e: StorageError) -> CollaboratorError {
    match e {
        StorageError::Conflict(msg) => CollaboratorError::Rejected(msg),
        StorageError::NotFound(msg) => CollaboratorError::NotFound(msg),
        other => CollaboratorError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn create_payment(&self, payment: &NewPayment) -> Result<LedgerRecordRef, CollaboratorError> {
        record_payment(&self.pool, payment).await.map_err(unavailable)
    }

    async fn create_expense(&self, expense: &NewExpense) -> Result<LedgerRecordRef, CollaboratorError> {
        record_expense(&self.pool, expense).await.map_err(unavailable)
    }

    async fn records_between(&self, range: DateRange) -> Result<Vec<LedgerRecord>, CollaboratorError> {
        records_between(&self.pool, range).await.map_err(unavailable)
    }
}
