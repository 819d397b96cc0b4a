//! Narrow interfaces to the systems around the engine. Implementations live
//! elsewhere; the storage crate ships SQLite-backed ones for the directory and
//! the ledger.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{DateRange, ImportEvent, LedgerRecord, LedgerRecordRef, NewExpense, NewPayment, ResidentId};

#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resident {
    pub id: ResidentId,
    pub full_name: String,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Statement password for a bank account, `None` when none is on file.
    async fn get_password(&self, account_ref: &str) -> Result<Option<String>, CollaboratorError>;
}

#[async_trait]
pub trait ResidentDirectory: Send + Sync {
    async fn list_active_residents(&self) -> Result<Vec<Resident>, CollaboratorError>;
}

/// The payment/expense side effect of processing.
///
/// Both create calls must be idempotent on `source_row_id`: a second call for
/// the same row returns the record created by the first.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn create_payment(&self, payment: &NewPayment) -> Result<LedgerRecordRef, CollaboratorError>;

    async fn create_expense(&self, expense: &NewExpense) -> Result<LedgerRecordRef, CollaboratorError>;

    /// Payments and expenses dated inside `range`, signed like statement rows.
    async fn records_between(&self, range: DateRange) -> Result<Vec<LedgerRecord>, CollaboratorError>;
}

/// Delivery is the sink's business; emitting never fails the caller.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: ImportEvent);
}
