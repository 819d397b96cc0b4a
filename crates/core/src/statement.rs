use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementFormat {
    Pdf,
    Delimited,
}

labeled_enum!(StatementFormat {
    Pdf => "pdf",
    Delimited => "delimited",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Credit,
    Debit,
}

labeled_enum!(TransactionType {
    Credit => "credit",
    Debit => "debit",
});

impl TransactionType {
    /// Positive amounts are deposits, negative are withdrawals. Zero has no type.
    pub fn of(amount_cents: i64) -> Option<Self> {
        match amount_cents.signum() {
            1 => Some(TransactionType::Credit),
            -1 => Some(TransactionType::Debit),
            _ => None,
        }
    }
}

/// Which side of the statement an import keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionFilter {
    Credit,
    Debit,
    #[default]
    All,
}

labeled_enum!(TransactionFilter {
    Credit => "credit",
    Debit => "debit",
    All => "all",
});

impl TransactionFilter {
    pub fn accepts(self, amount_cents: i64) -> bool {
        match self {
            TransactionFilter::All => true,
            TransactionFilter::Credit => amount_cents > 0,
            TransactionFilter::Debit => amount_cents < 0,
        }
    }
}

/// One transaction line as read off the statement, before it is persisted.
/// `amount_cents` is signed at parse time: credit positive, debit negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    pub index: usize,
    pub transaction_date: NaiveDate,
    pub narration: String,
    pub reference: Option<String>,
    pub amount_cents: i64,
    pub balance_cents: Option<i64>,
}

impl RawRow {
    pub fn transaction_type(&self) -> Option<TransactionType> {
        TransactionType::of(self.amount_cents)
    }
}
