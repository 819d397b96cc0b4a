/// Derives `as_str`, `Display` and `FromStr` for a fieldless enum from a
/// fixed table of snake_case labels, which is also how the values are stored.
macro_rules! labeled_enum {
    ($name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::UnknownLabel;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($name::$variant),)+
                    other => Err(crate::UnknownLabel {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

macro_rules! id_type {
    ($($name:ident),+ $(,)?) => {
        $(
            #[derive(
                Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
                serde::Serialize, serde::Deserialize,
            )]
            #[serde(transparent)]
            pub struct $name(pub i64);

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )+
    };
}

pub mod alias;
pub mod approval;
pub mod breakdown;
pub mod collaborators;
pub mod config;
pub mod events;
pub mod import;
pub mod ledger;
pub mod money;
pub mod period;
pub mod row;
pub mod statement;

id_type!(ImportId, RowId, ResidentId, AliasId, ApprovalId);

/// Returned when a stored label does not name any variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownLabel {
    pub kind: &'static str,
    pub value: String,
}

pub use alias::ResidentPaymentAlias;
pub use approval::{Actor, ActorId, ApprovalDecision, ApprovalRequest};
pub use breakdown::{ImportBreakdown, RowCounts, SideTotals, TagTotal};
pub use collaborators::{
    CollaboratorError, CredentialStore, EventSink, Ledger, Resident, ResidentDirectory,
};
pub use config::{
    ApprovalConfig, ConfigError, DecodeConfig, DuplicateConfig, EngineConfig, MatchingConfig,
};
pub use events::{ImportEvent, RowFailure};
pub use import::{derive_status, ImportStage, ImportStatus, StatementImport};
pub use ledger::{LedgerRecord, LedgerRecordKind, LedgerRecordRef, NewExpense, NewPayment};
pub use money::Money;
pub use period::DateRange;
pub use row::{DuplicateTier, MatchConfidence, MatchMethod, RowOutcome, RowStatus, StatementRow};
pub use statement::{RawRow, StatementFormat, TransactionFilter, TransactionType};
