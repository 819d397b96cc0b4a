//! SQLite persistence for statement imports, learned aliases, approvals and
//! the local payment/expense ledger.

pub mod aliases;
pub mod approvals;
pub mod db;
pub mod error;
pub mod imports;
pub mod ledger;
pub mod residents;

pub use aliases::{get_alias, insert_alias, learn_alias, list_aliases, set_alias_active, touch_alias};
pub use approvals::{approval_history, approve_request, get_open_approval, open_approval, reject_request};
pub use db::{create_db, DbPool};
pub use error::StorageError;
pub use imports::{
    find_import_by_hash, get_import, get_row, insert_import_with_rows, list_imports, list_rows, mark_processed,
    pending_rows_between, save_rows, set_stage, update_row, NewImport,
};
pub use ledger::{category_total, record_expense, record_payment, records_between, resident_balance, SqliteLedger};
pub use residents::{add_resident, get_active_residents, set_resident_active, SqliteResidentDirectory};
