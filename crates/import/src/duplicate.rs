//! Screening of statement rows against money that is already on the books.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tally_core::{DuplicateConfig, DuplicateTier, LedgerRecord, LedgerRecordRef, RawRow, RowId};

use crate::normalize::narration_key;
use crate::util::similarity;

/// A transaction about to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateTxn {
    pub date: NaiveDate,
    pub amount_cents: i64,
    pub narration: Option<String>,
    pub reference: Option<String>,
    /// Row the candidate comes from; records posted from it are not rivals.
    pub source_row_id: Option<RowId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum DuplicateVerdict {
    Clear,
    LikelyDuplicate { of: LedgerRecordRef, similarity: f64 },
    ExactDuplicate { of: LedgerRecordRef },
}

impl DuplicateVerdict {
    pub fn tier(&self) -> Option<DuplicateTier> {
        match self {
            DuplicateVerdict::Clear => None,
            DuplicateVerdict::LikelyDuplicate { .. } => Some(DuplicateTier::Likely),
            DuplicateVerdict::ExactDuplicate { .. } => Some(DuplicateTier::Exact),
        }
    }

    pub fn of(&self) -> Option<LedgerRecordRef> {
        match self {
            DuplicateVerdict::Clear => None,
            DuplicateVerdict::LikelyDuplicate { of, .. } | DuplicateVerdict::ExactDuplicate { of } => {
                Some(*of)
            }
        }
    }

    pub fn explain(&self) -> String {
        match self {
            DuplicateVerdict::Clear => "no matching record".to_string(),
            DuplicateVerdict::LikelyDuplicate { of, similarity } => {
                format!("same amount near the same date as {of} (narration similarity {similarity:.2})")
            }
            DuplicateVerdict::ExactDuplicate { of } => {
                format!("same amount, date and reference as {of}")
            }
        }
    }
}

fn key_of(text: Option<&str>) -> Option<String> {
    text.map(narration_key).filter(|k| !k.is_empty())
}

fn reference_of(text: Option<&str>) -> Option<String> {
    text.map(|r| r.trim().to_uppercase()).filter(|r| !r.is_empty())
}

pub struct DuplicateGuard {
    config: DuplicateConfig,
}

impl DuplicateGuard {
    pub fn new(config: DuplicateConfig) -> Self {
        Self { config }
    }

    /// Strongest verdict over `records`. Ambiguous evidence, such as a record
    /// with no narration to compare, is reported as likely rather than clear.
    pub fn check(&self, candidate: &CandidateTxn, records: &[LedgerRecord]) -> DuplicateVerdict {
        let cand_key = key_of(candidate.narration.as_deref());
        let cand_ref = reference_of(candidate.reference.as_deref());
        let tolerance = i64::from(self.config.date_tolerance_days);

        let mut best = DuplicateVerdict::Clear;
        for record in records {
            if record.amount_cents != candidate.amount_cents {
                continue;
            }
            if candidate.source_row_id.is_some() && record.source_row_id == candidate.source_row_id {
                continue;
            }
            let day_gap = (record.date - candidate.date).num_days().abs();
            if day_gap > tolerance {
                continue;
            }

            let rec_key = key_of(record.narration.as_deref());
            let rec_ref = reference_of(record.reference.as_deref());

            if day_gap == 0 {
                let exact = match (&cand_ref, &rec_ref) {
                    (Some(a), Some(b)) => a == b,
                    _ => matches!((&cand_key, &rec_key), (Some(a), Some(b)) if a == b),
                };
                if exact {
                    return DuplicateVerdict::ExactDuplicate { of: record.record };
                }
            }

            let score = match (&cand_key, &rec_key) {
                (Some(a), Some(b)) => similarity(a, b),
                _ => 0.0,
            };
            let unknown = cand_key.is_none() || rec_key.is_none();
            if score < self.config.narration_threshold && !unknown {
                continue;
            }
            let better = match &best {
                DuplicateVerdict::LikelyDuplicate { similarity, .. } => score > *similarity,
                _ => true,
            };
            if better {
                best = DuplicateVerdict::LikelyDuplicate {
                    of: record.record,
                    similarity: score,
                };
            }
        }
        best
    }
}

/// A row that repeats an earlier row of the same statement exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchDuplicate {
    pub index: usize,
    pub first_index: usize,
}

/// Rows repeating date, amount, narration and reference of an earlier row.
/// Banks do print genuinely repeated transfers, so callers flag these for
/// review instead of dropping them.
pub fn find_batch_duplicates(rows: &[RawRow]) -> Vec<BatchDuplicate> {
    let mut seen: HashMap<(NaiveDate, i64, String, Option<String>), usize> = HashMap::new();
    let mut found = Vec::new();
    for row in rows {
        let key = (
            row.transaction_date,
            row.amount_cents,
            narration_key(&row.narration),
            reference_of(row.reference.as_deref()),
        );
        match seen.get(&key) {
            Some(&first_index) => found.push(BatchDuplicate {
                index: row.index,
                first_index,
            }),
            None => {
                seen.insert(key, row.index);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::LedgerRecordKind;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn payment(id: i64, day: u32, amount: i64, narration: Option<&str>, reference: Option<&str>) -> LedgerRecord {
        LedgerRecord {
            record: LedgerRecordRef::new(LedgerRecordKind::Payment, id),
            date: date(day),
            amount_cents: amount,
            narration: narration.map(str::to_string),
            reference: reference.map(str::to_string),
            source_row_id: None,
        }
    }

    fn candidate(day: u32, amount: i64, narration: &str, reference: Option<&str>) -> CandidateTxn {
        CandidateTxn {
            date: date(day),
            amount_cents: amount,
            narration: Some(narration.to_string()),
            reference: reference.map(str::to_string),
            source_row_id: None,
        }
    }

    fn guard() -> DuplicateGuard {
        DuplicateGuard::new(DuplicateConfig::default())
    }

    #[test]
    fn reimported_row_is_exact_duplicate() {
        let records = vec![payment(7, 5, 500_000, Some("FBNMOBILEJOHN DOE/Nk"), None)];
        let verdict = guard().check(&candidate(5, 500_000, "FBNMOBILEJOHN DOE/Nk", None), &records);
        assert_eq!(
            verdict,
            DuplicateVerdict::ExactDuplicate {
                of: LedgerRecordRef::new(LedgerRecordKind::Payment, 7)
            }
        );
    }

    #[test]
    fn matching_reference_is_exact_even_with_different_text() {
        let records = vec![payment(1, 8, 250_000, Some("Jane Roe dues"), Some("ft24010899"))];
        let verdict = guard().check(
            &candidate(8, 250_000, "NIP/TRANSFER FROM JANE ROE", Some("FT24010899")),
            &records,
        );
        assert_eq!(verdict.tier(), Some(DuplicateTier::Exact));
    }

    #[test]
    fn different_references_same_day_are_not_exact() {
        let records = vec![payment(1, 8, 250_000, Some("JANE ROE"), Some("FT1111111"))];
        let verdict = guard().check(&candidate(8, 250_000, "JANE ROE", Some("FT2222222")), &records);
        assert_eq!(verdict.tier(), Some(DuplicateTier::Likely));
    }

    #[test]
    fn near_date_similar_narration_is_likely() {
        let records = vec![payment(3, 6, 120_000, Some("JOHN DOE"), None)];
        let verdict = guard().check(&candidate(5, 120_000, "JOHN DOE", None), &records);
        match verdict {
            DuplicateVerdict::LikelyDuplicate { similarity, .. } => assert_eq!(similarity, 1.0),
            other => panic!("expected likely duplicate, got {other:?}"),
        }
    }

    #[test]
    fn unknown_narration_fails_closed() {
        let records = vec![payment(3, 5, 120_000, None, None)];
        let verdict = guard().check(&candidate(5, 120_000, "JOHN DOE", None), &records);
        assert_eq!(verdict.tier(), Some(DuplicateTier::Likely));
    }

    #[test]
    fn outside_window_or_other_amount_is_clear() {
        let records = vec![
            payment(1, 9, 120_000, Some("JOHN DOE"), None),
            payment(2, 5, 120_001, Some("JOHN DOE"), None),
            payment(3, 5, 120_000, Some("MARY SMITH SERVICE CHARGE"), None),
        ];
        assert_eq!(
            guard().check(&candidate(5, 120_000, "JOHN DOE", None), &records),
            DuplicateVerdict::Clear
        );
    }

    #[test]
    fn own_posting_is_not_a_rival() {
        let mut record = payment(1, 5, 120_000, Some("JOHN DOE"), None);
        record.source_row_id = Some(RowId(42));
        let mut cand = candidate(5, 120_000, "JOHN DOE", None);
        cand.source_row_id = Some(RowId(42));
        assert_eq!(guard().check(&cand, &[record]), DuplicateVerdict::Clear);
    }

    #[test]
    fn exact_wins_over_earlier_likely() {
        let records = vec![
            payment(1, 4, 120_000, Some("JOHN DOE"), None),
            payment(2, 5, 120_000, Some("JOHN DOE"), None),
        ];
        let verdict = guard().check(&candidate(5, 120_000, "JOHN DOE", None), &records);
        assert_eq!(verdict.of(), Some(LedgerRecordRef::new(LedgerRecordKind::Payment, 2)));
        assert!(verdict.explain().contains("payment#2"));
    }

    #[test]
    fn repeated_rows_in_one_statement() {
        let row = |index, narration: &str| RawRow {
            index,
            transaction_date: date(5),
            narration: narration.to_string(),
            reference: None,
            amount_cents: 500_000,
            balance_cents: None,
        };
        let rows = vec![row(0, "JOHN DOE"), row(1, "MARY SMITH"), row(2, "john  doe")];
        assert_eq!(
            find_batch_duplicates(&rows),
            vec![BatchDuplicate { index: 2, first_index: 0 }]
        );
    }
}
