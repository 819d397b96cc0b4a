use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{DuplicateTier, Money, RowOutcome, RowStatus, StatementRow};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCounts {
    pub total: usize,
    /// Auto and manual matches together.
    pub matched: usize,
    pub unmatched: usize,
    pub duplicate: usize,
    pub likely_duplicate: usize,
    pub skipped: usize,
    pub posted: usize,
    pub failed: usize,
}

impl RowCounts {
    pub fn from_rows(rows: &[StatementRow]) -> Self {
        let mut counts = RowCounts {
            total: rows.len(),
            ..Default::default()
        };
        for row in rows {
            match row.status {
                RowStatus::Matched | RowStatus::ManuallyMatched => counts.matched += 1,
                RowStatus::Unmatched => counts.unmatched += 1,
                RowStatus::Duplicate => counts.duplicate += 1,
                RowStatus::Skipped => counts.skipped += 1,
            }
            if row.status != RowStatus::Duplicate && row.duplicate_tier == Some(DuplicateTier::Likely) {
                counts.likely_duplicate += 1;
            }
            match row.outcome() {
                RowOutcome::Posted(_) => counts.posted += 1,
                RowOutcome::Failed(_) => counts.failed += 1,
                RowOutcome::Pending | RowOutcome::NotProcessable => {}
            }
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagTotal {
    pub tag: String,
    pub count: usize,
    pub total: Money,
}

/// One side (credits or debits) of an import. Debit totals are magnitudes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideTotals {
    pub count: usize,
    pub total: Money,
    /// Sorted by total, largest first.
    pub by_tag: Vec<TagTotal>,
    pub untagged_count: usize,
    pub untagged_total: Money,
}

impl Default for SideTotals {
    fn default() -> Self {
        SideTotals {
            count: 0,
            total: Money::zero(),
            by_tag: Vec::new(),
            untagged_count: 0,
            untagged_total: Money::zero(),
        }
    }
}

impl SideTotals {
    fn collect<'a>(rows: impl Iterator<Item = &'a StatementRow>) -> Self {
        let mut side = SideTotals::default();
        let mut tags: BTreeMap<&str, (usize, Money)> = BTreeMap::new();
        for row in rows {
            let amount = Money::from_cents(row.amount_cents).abs();
            side.count += 1;
            side.total = side.total + amount;
            match row.tag.as_deref() {
                Some(tag) => {
                    let entry = tags.entry(tag).or_insert((0, Money::zero()));
                    entry.0 += 1;
                    entry.1 = entry.1 + amount;
                }
                None => {
                    side.untagged_count += 1;
                    side.untagged_total = side.untagged_total + amount;
                }
            }
        }
        side.by_tag = tags
            .into_iter()
            .map(|(tag, (count, total))| TagTotal {
                tag: tag.to_string(),
                count,
                total,
            })
            .collect();
        side.by_tag.sort_by(|a, b| b.total.cmp(&a.total));
        side
    }
}

/// Read-only aggregation of an import for display.
///
/// Money totals leave out skipped and duplicate rows since neither will be
/// booked; the status and tier counts cover every row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBreakdown {
    pub counts: RowCounts,
    pub by_status: BTreeMap<String, usize>,
    /// Keyed by tier label; rows without a tier fall under "none".
    pub by_confidence: BTreeMap<String, usize>,
    pub by_method: BTreeMap<String, usize>,
    pub credits: SideTotals,
    pub debits: SideTotals,
    pub net_flow: Money,
}

impl ImportBreakdown {
    pub fn from_rows(rows: &[StatementRow]) -> Self {
        let mut by_status = BTreeMap::new();
        let mut by_confidence = BTreeMap::new();
        let mut by_method = BTreeMap::new();
        for row in rows {
            *by_status.entry(row.status.to_string()).or_insert(0) += 1;
            let tier = row.confidence.map(|c| c.as_str()).unwrap_or("none");
            *by_confidence.entry(tier.to_string()).or_insert(0) += 1;
            if let Some(method) = row.method {
                *by_method.entry(method.to_string()).or_insert(0) += 1;
            }
        }

        let booked = || {
            rows.iter()
                .filter(|r| !matches!(r.status, RowStatus::Skipped | RowStatus::Duplicate))
        };
        let credits = SideTotals::collect(booked().filter(|r| r.amount_cents > 0));
        let debits = SideTotals::collect(booked().filter(|r| r.amount_cents < 0));
        let net_flow = credits.total - debits.total;

        ImportBreakdown {
            counts: RowCounts::from_rows(rows),
            by_status,
            by_confidence,
            by_method,
            credits,
            debits,
            net_flow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::fixtures::row;
    use crate::{MatchConfidence, MatchMethod};

    fn rows() -> Vec<StatementRow> {
        let mut a = row(0, 500_000, RowStatus::Matched);
        a.confidence = Some(MatchConfidence::High);
        a.method = Some(MatchMethod::Fuzzy);
        a.tag = Some("service charge".into());

        let mut b = row(1, 250_000, RowStatus::Unmatched);
        b.confidence = Some(MatchConfidence::Medium);

        let mut c = row(2, -120_000, RowStatus::ManuallyMatched);
        c.method = Some(MatchMethod::Manual);
        c.tag = Some("diesel".into());

        let d = row(3, 500_000, RowStatus::Duplicate);
        let e = row(4, -1_000, RowStatus::Skipped);
        vec![a, b, c, d, e]
    }

    #[test]
    fn counts_cover_every_row() {
        let counts = RowCounts::from_rows(&rows());
        assert_eq!(counts.total, 5);
        assert_eq!(counts.matched, 2);
        assert_eq!(counts.unmatched, 1);
        assert_eq!(counts.duplicate, 1);
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.posted, 0);
    }

    #[test]
    fn totals_skip_unbooked_rows() {
        let b = ImportBreakdown::from_rows(&rows());
        assert_eq!(b.credits.count, 2);
        assert_eq!(b.credits.total, Money::from_cents(750_000));
        assert_eq!(b.credits.untagged_count, 1);
        assert_eq!(b.credits.untagged_total, Money::from_cents(250_000));
        assert_eq!(b.debits.count, 1);
        assert_eq!(b.debits.total, Money::from_cents(120_000));
        assert_eq!(b.debits.by_tag[0].tag, "diesel");
        assert_eq!(b.net_flow, Money::from_cents(630_000));
    }

    #[test]
    fn tiers_and_methods_are_counted() {
        let b = ImportBreakdown::from_rows(&rows());
        assert_eq!(b.by_confidence["high"], 1);
        assert_eq!(b.by_confidence["medium"], 1);
        assert_eq!(b.by_confidence["none"], 3);
        assert_eq!(b.by_method["manual"], 1);
        assert_eq!(b.by_status["duplicate"], 1);
    }
}
