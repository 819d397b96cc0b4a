use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ActorId, ImportId, ResidentId, RowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerRecordKind {
    Payment,
    Expense,
    /// A row of another import that has not been posted yet.
    StatementRow,
}

labeled_enum!(LedgerRecordKind {
    Payment => "payment",
    Expense => "expense",
    StatementRow => "statement_row",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerRecordRef {
    pub kind: LedgerRecordKind,
    pub id: i64,
}

impl LedgerRecordRef {
    pub fn new(kind: LedgerRecordKind, id: i64) -> Self {
        LedgerRecordRef { kind, id }
    }
}

impl fmt::Display for LedgerRecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// An existing money movement the duplicate guard compares against.
/// Amounts are signed the same way as statement rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub record: LedgerRecordRef,
    pub date: NaiveDate,
    pub amount_cents: i64,
    pub narration: Option<String>,
    pub reference: Option<String>,
    /// Statement row this record was posted from, if any.
    pub source_row_id: Option<RowId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPayment {
    pub source_row_id: RowId,
    pub import_id: ImportId,
    pub resident_id: ResidentId,
    pub date: NaiveDate,
    /// Always positive.
    pub amount_cents: i64,
    pub narration: String,
    pub reference: Option<String>,
    pub recorded_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExpense {
    pub source_row_id: RowId,
    pub import_id: ImportId,
    pub category: String,
    pub date: NaiveDate,
    /// Always positive; the withdrawal magnitude.
    pub amount_cents: i64,
    pub narration: String,
    pub reference: Option<String>,
    pub recorded_by: ActorId,
}
