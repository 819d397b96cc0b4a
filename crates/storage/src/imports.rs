//! Statement imports and their rows.
//!
//! Stage changes are compare-and-swap updates: each names the stage it
//! expects to leave, and a mismatch surfaces as [`StorageError::StaleState`]
//! instead of silently overwriting a concurrent transition.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use tally_core::{
    ActorId, DateRange, ImportId, ImportStage, LedgerRecord, LedgerRecordKind, LedgerRecordRef,
    RawRow, ResidentId, RowId, RowStatus, StatementFormat, StatementImport, StatementRow,
    TransactionFilter, UnknownLabel,
};

use crate::db::DbPool;
use crate::error::StorageError;

#[derive(Debug, Clone)]
pub struct NewImport {
    pub bank_account_ref: String,
    pub format: StatementFormat,
    pub period: DateRange,
    pub file_name: String,
    pub file_hash: String,
    pub layout_profile: Option<String>,
    pub account_hint: Option<String>,
    pub transaction_filter: TransactionFilter,
    pub uploaded_by: ActorId,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ImportRecord {
    id: i64,
    bank_account_ref: String,
    format: String,
    period_start: NaiveDate,
    period_end: NaiveDate,
    file_name: String,
    file_hash: String,
    layout_profile: Option<String>,
    account_hint: Option<String>,
    transaction_filter: String,
    stage: String,
    uploaded_by: String,
    created_at: DateTime<Utc>,
    approved_by: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ImportRecord> for StatementImport {
    type Error = StorageError;

    fn try_from(r: ImportRecord) -> Result<Self, Self::Error> {
        Ok(StatementImport {
            id: ImportId(r.id),
            bank_account_ref: r.bank_account_ref,
            format: r.format.parse()?,
            period: DateRange::new(r.period_start, r.period_end),
            file_name: r.file_name,
            file_hash: r.file_hash,
            layout_profile: r.layout_profile,
            account_hint: r.account_hint,
            transaction_filter: r.transaction_filter.parse()?,
            stage: r.stage.parse()?,
            uploaded_by: ActorId(r.uploaded_by),
            created_at: r.created_at,
            approved_by: r.approved_by.map(ActorId),
            approved_at: r.approved_at,
            processed_at: r.processed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RowRecord {
    id: i64,
    import_id: i64,
    row_index: i64,
    transaction_date: NaiveDate,
    narration: String,
    normalized_narration: Option<String>,
    reference: Option<String>,
    amount_cents: i64,
    balance_cents: Option<i64>,
    status: String,
    resident_id: Option<i64>,
    expense_category: Option<String>,
    confidence: Option<String>,
    method: Option<String>,
    score: Option<f64>,
    match_note: Option<String>,
    duplicate_tier: Option<String>,
    duplicate_kind: Option<String>,
    duplicate_id: Option<i64>,
    duplicate_acknowledged: bool,
    tag: Option<String>,
    posted_kind: Option<String>,
    posted_id: Option<i64>,
    processing_error: Option<String>,
    processed_at: Option<DateTime<Utc>>,
}

fn parse_opt<T: FromStr<Err = UnknownLabel>>(value: Option<String>) -> Result<Option<T>, UnknownLabel> {
    value.map(|v| v.parse()).transpose()
}

fn record_ref(kind: Option<String>, id: Option<i64>) -> Result<Option<LedgerRecordRef>, StorageError> {
    match (kind, id) {
        (Some(kind), Some(id)) => Ok(Some(LedgerRecordRef::new(kind.parse()?, id))),
        (None, None) => Ok(None),
        (kind, id) => Err(StorageError::Corrupt(format!(
            "half-set record reference ({kind:?}, {id:?})"
        ))),
    }
}

impl TryFrom<RowRecord> for StatementRow {
    type Error = StorageError;

    fn try_from(r: RowRecord) -> Result<Self, Self::Error> {
        let index = usize::try_from(r.row_index)
            .map_err(|_| StorageError::Corrupt(format!("row {} has index {}", r.id, r.row_index)))?;
        Ok(StatementRow {
            id: RowId(r.id),
            import_id: ImportId(r.import_id),
            index,
            transaction_date: r.transaction_date,
            narration: r.narration,
            normalized_narration: r.normalized_narration,
            reference: r.reference,
            amount_cents: r.amount_cents,
            balance_cents: r.balance_cents,
            status: r.status.parse()?,
            resident_id: r.resident_id.map(ResidentId),
            expense_category: r.expense_category,
            confidence: parse_opt(r.confidence)?,
            method: parse_opt(r.method)?,
            score: r.score,
            match_note: r.match_note,
            duplicate_tier: parse_opt(r.duplicate_tier)?,
            duplicate_of: record_ref(r.duplicate_kind, r.duplicate_id)?,
            duplicate_acknowledged: r.duplicate_acknowledged,
            tag: r.tag,
            posted_record: record_ref(r.posted_kind, r.posted_id)?,
            processing_error: r.processing_error,
            processed_at: r.processed_at,
        })
    }
}

const IMPORT_COLUMNS: &str = "id, bank_account_ref, format, period_start, period_end, file_name, \
    file_hash, layout_profile, account_hint, transaction_filter, stage, uploaded_by, created_at, \
    approved_by, approved_at, processed_at";

const ROW_COLUMNS: &str = "id, import_id, row_index, transaction_date, narration, \
    normalized_narration, reference, amount_cents, balance_cents, status, resident_id, \
    expense_category, confidence, method, score, match_note, duplicate_tier, duplicate_kind, \
    duplicate_id, duplicate_acknowledged, tag, posted_kind, posted_id, processing_error, processed_at";

/// Persists an import in `draft` together with all of its rows, or nothing.
pub async fn insert_import_with_rows(
    pool: &DbPool,
    import: &NewImport,
    rows: &[RawRow],
) -> Result<StatementImport, StorageError> {
    let mut tx = pool.begin().await?;

    let import_id = sqlx::query(
        r#"
        INSERT INTO statement_imports (bank_account_ref, format, period_start, period_end, file_name,
            file_hash, layout_profile, account_hint, transaction_filter, stage, uploaded_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&import.bank_account_ref)
    .bind(import.format.as_str())
    .bind(import.period.start)
    .bind(import.period.end)
    .bind(&import.file_name)
    .bind(&import.file_hash)
    .bind(&import.layout_profile)
    .bind(&import.account_hint)
    .bind(import.transaction_filter.as_str())
    .bind(ImportStage::Draft.as_str())
    .bind(&import.uploaded_by.0)
    .bind(import.created_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        StorageError::on_unique(e, || format!("statement file '{}' was already imported", import.file_name))
    })?
    .last_insert_rowid();

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO statement_rows (import_id, row_index, transaction_date, narration, reference,
                amount_cents, balance_cents, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(import_id)
        .bind(row.index as i64)
        .bind(row.transaction_date)
        .bind(&row.narration)
        .bind(&row.reference)
        .bind(row.amount_cents)
        .bind(row.balance_cents)
        .bind(RowStatus::Unmatched.as_str())
        .execute(&mut *tx)
        .await?;
    }

    let created = fetch_import(&mut tx, ImportId(import_id)).await?;
    tx.commit().await?;
    Ok(created)
}

async fn fetch_import(tx: &mut Transaction<'_, Sqlite>, id: ImportId) -> Result<StatementImport, StorageError> {
    sqlx::query_as::<_, ImportRecord>(&format!("SELECT {IMPORT_COLUMNS} FROM statement_imports WHERE id = ?"))
        .bind(id.0)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("import {id}")))?
        .try_into()
}

pub async fn get_import(pool: &DbPool, id: ImportId) -> Result<StatementImport, StorageError> {
    sqlx::query_as::<_, ImportRecord>(&format!("SELECT {IMPORT_COLUMNS} FROM statement_imports WHERE id = ?"))
        .bind(id.0)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("import {id}")))?
        .try_into()
}

pub async fn find_import_by_hash(pool: &DbPool, file_hash: &str) -> Result<Option<StatementImport>, StorageError> {
    sqlx::query_as::<_, ImportRecord>(&format!(
        "SELECT {IMPORT_COLUMNS} FROM statement_imports WHERE file_hash = ?"
    ))
    .bind(file_hash)
    .fetch_optional(pool)
    .await?
    .map(StatementImport::try_from)
    .transpose()
}

/// Newest first.
pub async fn list_imports(pool: &DbPool) -> Result<Vec<StatementImport>, StorageError> {
    sqlx::query_as::<_, ImportRecord>(&format!("SELECT {IMPORT_COLUMNS} FROM statement_imports ORDER BY id DESC"))
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(StatementImport::try_from)
        .collect()
}

/// Rows in statement order.
pub async fn list_rows(pool: &DbPool, import_id: ImportId) -> Result<Vec<StatementRow>, StorageError> {
    sqlx::query_as::<_, RowRecord>(&format!(
        "SELECT {ROW_COLUMNS} FROM statement_rows WHERE import_id = ? ORDER BY row_index"
    ))
    .bind(import_id.0)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(StatementRow::try_from)
    .collect()
}

pub async fn get_row(pool: &DbPool, row_id: RowId) -> Result<StatementRow, StorageError> {
    sqlx::query_as::<_, RowRecord>(&format!("SELECT {ROW_COLUMNS} FROM statement_rows WHERE id = ?"))
        .bind(row_id.0)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("row {row_id}")))?
        .try_into()
}

pub(crate) async fn set_stage_in(
    tx: &mut Transaction<'_, Sqlite>,
    id: ImportId,
    from: ImportStage,
    to: ImportStage,
) -> Result<(), StorageError> {
    let result = sqlx::query("UPDATE statement_imports SET stage = ? WHERE id = ? AND stage = ?")
        .bind(to.as_str())
        .bind(id.0)
        .bind(from.as_str())
        .execute(&mut **tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::StaleState(format!("import {id} is no longer {from}")));
    }
    Ok(())
}

pub async fn set_stage(pool: &DbPool, id: ImportId, from: ImportStage, to: ImportStage) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;
    set_stage_in(&mut tx, id, from, to).await?;
    tx.commit().await?;
    Ok(())
}

async fn update_row_in(
    tx: &mut Transaction<'_, Sqlite>,
    row: &StatementRow,
    expected_stage: ImportStage,
) -> Result<(), StorageError> {
    let result = sqlx::query(
        r#"
        UPDATE statement_rows SET
            normalized_narration = ?, reference = ?, status = ?, resident_id = ?,
            expense_category = ?, confidence = ?, method = ?, score = ?, match_note = ?,
            duplicate_tier = ?, duplicate_kind = ?, duplicate_id = ?, duplicate_acknowledged = ?,
            tag = ?, posted_kind = ?, posted_id = ?, processing_error = ?, processed_at = ?
        WHERE id = ? AND import_id = ?
          AND EXISTS (SELECT 1 FROM statement_imports i WHERE i.id = statement_rows.import_id AND i.stage = ?)
        "#,
    )
    .bind(&row.normalized_narration)
    .bind(&row.reference)
    .bind(row.status.as_str())
    .bind(row.resident_id.map(|r| r.0))
    .bind(&row.expense_category)
    .bind(row.confidence.map(|c| c.as_str()))
    .bind(row.method.map(|m| m.as_str()))
    .bind(row.score)
    .bind(&row.match_note)
    .bind(row.duplicate_tier.map(|t| t.as_str()))
    .bind(row.duplicate_of.map(|r| r.kind.as_str()))
    .bind(row.duplicate_of.map(|r| r.id))
    .bind(row.duplicate_acknowledged)
    .bind(&row.tag)
    .bind(row.posted_record.map(|r| r.kind.as_str()))
    .bind(row.posted_record.map(|r| r.id))
    .bind(&row.processing_error)
    .bind(row.processed_at)
    .bind(row.id.0)
    .bind(row.import_id.0)
    .bind(expected_stage.as_str())
    .execute(&mut **tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::StaleState(format!(
            "row {} cannot change unless its import is {expected_stage}",
            row.id
        )));
    }
    Ok(())
}

/// Writes one row's mutable state, provided its import is still in `expected_stage`.
pub async fn update_row(pool: &DbPool, row: &StatementRow, expected_stage: ImportStage) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;
    update_row_in(&mut tx, row, expected_stage).await?;
    tx.commit().await?;
    Ok(())
}

/// Writes a batch of rows and, optionally, moves the import on, as one unit.
pub async fn save_rows(
    pool: &DbPool,
    import_id: ImportId,
    rows: &[StatementRow],
    expected_stage: ImportStage,
    advance_to: Option<ImportStage>,
) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;
    for row in rows {
        if row.import_id != import_id {
            return Err(StorageError::Conflict(format!("row {} belongs to import {}", row.id, row.import_id)));
        }
        update_row_in(&mut tx, row, expected_stage).await?;
    }
    if let Some(next) = advance_to {
        set_stage_in(&mut tx, import_id, expected_stage, next).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Stamps the end of a processing pass.
pub async fn mark_processed(pool: &DbPool, id: ImportId, at: DateTime<Utc>) -> Result<(), StorageError> {
    let result = sqlx::query("UPDATE statement_imports SET processed_at = ? WHERE id = ? AND stage = ?")
        .bind(at)
        .bind(id.0)
        .bind(ImportStage::Approved.as_str())
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::StaleState(format!("import {id} is not approved")));
    }
    Ok(())
}

/// Unposted rows of other imports inside `range`, as duplicate-screening
/// records. Skipped and duplicate rows are left out; posted rows are
/// represented by their payment or expense instead.
pub async fn pending_rows_between(
    pool: &DbPool,
    range: DateRange,
    exclude_import: ImportId,
) -> Result<Vec<LedgerRecord>, StorageError> {
    let rows = sqlx::query_as::<_, (i64, NaiveDate, i64, String, Option<String>)>(
        r#"
        SELECT r.id, r.transaction_date, r.amount_cents, r.narration, r.reference
        FROM statement_rows r
        JOIN statement_imports i ON i.id = r.import_id
        WHERE r.transaction_date BETWEEN ? AND ?
          AND r.import_id <> ?
          AND r.status NOT IN (?, ?)
          AND r.posted_id IS NULL
          AND i.stage <> ?
        ORDER BY r.transaction_date, r.id
        "#,
    )
    .bind(range.start)
    .bind(range.end)
    .bind(exclude_import.0)
    .bind(RowStatus::Skipped.as_str())
    .bind(RowStatus::Duplicate.as_str())
    .bind(ImportStage::Draft.as_str())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, date, amount_cents, narration, reference)| LedgerRecord {
            record: LedgerRecordRef::new(LedgerRecordKind::StatementRow, id),
            date,
            amount_cents,
            narration: Some(narration),
            reference,
            source_row_id: Some(RowId(id)),
        })
        .collect())
}
