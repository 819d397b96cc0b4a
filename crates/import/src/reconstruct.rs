use std::cmp::Ordering;

use tally_core::RawRow;
use thiserror::Error;

use crate::layout::{ColumnKind, ColumnProfile};
use crate::normalize::extract_reference;
use crate::token::{TextToken, TokenStream};
use crate::util::{parse_amount, parse_date};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReconstructError {
    #[error("Column boundaries are ambiguous: {0}")]
    Ambiguous(String),
    #[error("Column layout does not fit this statement: {0}")]
    LayoutMismatch(String),
    #[error("No transaction rows found")]
    NoTransactions,
}

/// Tokens that share a baseline, sorted left to right.
struct Band<'a> {
    page: u32,
    y: f64,
    tokens: Vec<&'a TextToken>,
}

impl Band<'_> {
    fn text_in(&self, profile: &ColumnProfile, kind: ColumnKind) -> String {
        self.tokens
            .iter()
            .filter(|t| profile.column_at(t.x) == Some(kind))
            .map(|t| t.text.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn only_in(&self, profile: &ColumnProfile, kind: ColumnKind) -> bool {
        self.tokens.iter().all(|t| profile.column_at(t.x) == Some(kind))
    }

    fn lowercase_text(&self) -> String {
        self.tokens
            .iter()
            .map(|t| t.text.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn bands<'a>(tokens: &'a [TextToken], tolerance: f64) -> Vec<Band<'a>> {
    let mut sorted: Vec<&TextToken> = tokens.iter().collect();
    sorted.sort_by(|a, b| {
        a.page
            .cmp(&b.page)
            .then(b.y.partial_cmp(&a.y).unwrap_or(Ordering::Equal))
            .then(a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal))
    });

    let mut out: Vec<Band<'a>> = Vec::new();
    for token in sorted {
        match out.last_mut() {
            Some(band) if band.page == token.page && (band.y - token.y).abs() <= tolerance => {
                band.tokens.push(token);
            }
            _ => out.push(Band {
                page: token.page,
                y: token.y,
                tokens: vec![token],
            }),
        }
    }
    for band in &mut out {
        band.tokens
            .sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal));
    }
    out
}

fn amount_in(band: &Band<'_>, profile: &ColumnProfile, kind: ColumnKind) -> Option<i64> {
    parse_amount(&band.text_in(profile, kind)).filter(|a| *a != 0)
}

/// Rebuilds transaction rows from positioned text using one column profile.
///
/// Pure: the same tokens and profile always give the same rows, indexed
/// 0..n in statement order.
pub fn reconstruct(stream: &TokenStream, profile: &ColumnProfile) -> Result<Vec<RawRow>, ReconstructError> {
    profile.validate()?;

    let mut rows: Vec<RawRow> = Vec::new();
    // Page and baseline of the last line that belonged to a row.
    let mut anchor: Option<(u32, f64)> = None;

    for band in bands(&stream.tokens, profile.y_tolerance) {
        let date = parse_date(&band.text_in(profile, ColumnKind::Date), &profile.date_formats);
        let credit = amount_in(&band, profile, ColumnKind::Credit);
        let debit = amount_in(&band, profile, ColumnKind::Debit);

        let Some(transaction_date) = date else {
            let text = band.lowercase_text();
            let noisy = profile.noise_markers.iter().any(|m| text.contains(m.as_str()));
            let continues = anchor.is_some_and(|(page, y)| {
                page == band.page && y - band.y <= profile.max_continuation_gap
            });
            if continues && !noisy && band.only_in(profile, ColumnKind::Narration) {
                if let Some(last) = rows.last_mut() {
                    let extra = band.text_in(profile, ColumnKind::Narration);
                    if !last.narration.is_empty() {
                        last.narration.push(' ');
                    }
                    last.narration.push_str(&extra);
                    anchor = Some((band.page, band.y));
                    continue;
                }
            }
            anchor = None;
            continue;
        };

        let amount_cents = match (credit, debit) {
            (Some(c), None) => c.abs(),
            (None, Some(d)) => -d.abs(),
            (Some(_), Some(_)) => {
                return Err(ReconstructError::Ambiguous(format!(
                    "line dated {transaction_date} on page {} has both a debit and a credit",
                    band.page
                )))
            }
            (None, None) => {
                // Opening/closing balance lines carry a date but no movement.
                anchor = None;
                continue;
            }
        };

        let narration = band.text_in(profile, ColumnKind::Narration);
        let reference = Some(band.text_in(profile, ColumnKind::Reference))
            .filter(|r| !r.is_empty());
        rows.push(RawRow {
            index: rows.len(),
            transaction_date,
            narration,
            reference,
            amount_cents,
            balance_cents: parse_amount(&band.text_in(profile, ColumnKind::Balance)),
        });
        anchor = Some((band.page, band.y));
    }

    if rows.is_empty() {
        return Err(ReconstructError::NoTransactions);
    }

    for row in &mut rows {
        if row.reference.is_none() {
            row.reference = extract_reference(&row.narration);
        }
    }

    verify_balances(&rows)?;
    Ok(rows)
}

/// Checks signed amounts against the running balance column. Statements may
/// list oldest-first or newest-first, so either direction is accepted, but the
/// majority of consecutive pairs must agree with one of them.
pub fn verify_balances(rows: &[RawRow]) -> Result<(), ReconstructError> {
    let (mut pairs, mut forward, mut backward) = (0usize, 0usize, 0usize);
    for window in rows.windows(2) {
        let (prev, next) = (&window[0], &window[1]);
        let (Some(b0), Some(b1)) = (prev.balance_cents, next.balance_cents) else {
            continue;
        };
        pairs += 1;
        if b0.checked_add(next.amount_cents) == Some(b1) {
            forward += 1;
        }
        if b1.checked_add(prev.amount_cents) == Some(b0) {
            backward += 1;
        }
    }

    if pairs > 0 && forward.max(backward) * 2 <= pairs {
        return Err(ReconstructError::LayoutMismatch(format!(
            "running balance agrees with only {} of {pairs} consecutive rows; debit and credit columns may be swapped",
            forward.max(backward)
        )));
    }
    Ok(())
}

/// Chooses a profile for the statement and reconstructs with it.
///
/// Profiles whose markers occur in the text are tried first; if none match,
/// all are tried. The profile yielding the most rows wins, and two profiles
/// yielding the same number of different rows is ambiguous.
pub fn reconstruct_with_profiles<'p>(
    stream: &TokenStream,
    profiles: &'p [ColumnProfile],
) -> Result<(&'p ColumnProfile, Vec<RawRow>), ReconstructError> {
    let text = stream.plain_text().to_lowercase();
    let marked: Vec<&ColumnProfile> = profiles.iter().filter(|p| p.matches_text(&text)).collect();
    let candidates: Vec<&ColumnProfile> = if marked.is_empty() {
        profiles.iter().collect()
    } else {
        marked
    };

    let mut best: Option<(&ColumnProfile, Vec<RawRow>)> = None;
    let mut tied = false;
    let mut first_error: Option<ReconstructError> = None;

    for profile in candidates {
        match reconstruct(stream, profile) {
            Ok(rows) => {
                let best_len = best.as_ref().map(|(_, r)| r.len());
                match best_len {
                    Some(len) if len > rows.len() => {}
                    Some(len) if len == rows.len() => {
                        if best.as_ref().is_some_and(|(_, r)| *r != rows) {
                            tied = true;
                        }
                    }
                    _ => {
                        best = Some((profile, rows));
                        tied = false;
                    }
                }
            }
            Err(ReconstructError::NoTransactions) => {}
            Err(e) => {
                tracing::debug!(profile = %profile.name, error = %e, "layout rejected");
                first_error.get_or_insert(e);
            }
        }
    }

    match best {
        Some(_) if tied => Err(ReconstructError::Ambiguous(
            "several layouts fit the statement equally well".into(),
        )),
        Some(found) => Ok(found),
        None => Err(first_error.unwrap_or(ReconstructError::NoTransactions)),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::token::{TextToken, TokenStream};

    fn t(page: u32, x: f64, y: f64, text: &str) -> TextToken {
        TextToken::new(text, page, x, y)
    }

    /// A two-page First Bank statement, oldest first, with a wrapped narration
    /// and a summary line.
    pub fn first_bank_statement() -> TokenStream {
        TokenStream::new(vec![
            t(1, 40.0, 800.0, "FIRST BANK OF NIGERIA"),
            t(1, 40.0, 780.0, "Account Number: 3012345678"),
            t(1, 40.0, 760.0, "Transaction Date"),
            t(1, 90.0, 760.0, "Narration"),
            t(1, 391.0, 760.0, "Credit"),
            t(1, 436.0, 760.0, "Debit"),
            t(1, 500.0, 760.0, "Balance"),
            t(1, 40.0, 740.0, "01-Jan-24"),
            t(1, 90.0, 740.0, "Opening Balance"),
            t(1, 500.0, 740.0, "100,000.00"),
            // Slightly jittered baselines still share a row.
            t(1, 40.0, 720.0, "05-Jan-24"),
            t(1, 90.0, 720.5, "FBNMOBILEJOHN DOE/Nk"),
            t(1, 310.0, 720.0, "05-Jan-24"),
            t(1, 391.0, 719.6, "5,000.00"),
            t(1, 500.0, 720.0, "105,000.00"),
            t(1, 40.0, 700.0, "06-Jan-24"),
            t(1, 90.0, 700.0, "POS PURCHASE DIESEL"),
            t(1, 436.0, 700.0, "1,200.00"),
            t(1, 500.0, 700.0, "103,800.00"),
            t(1, 90.0, 689.0, "MEGA FILLING STATION"),
            t(1, 40.0, 60.0, "Page 1 of 2"),
            t(2, 40.0, 760.0, "Transaction Date"),
            t(2, 90.0, 760.0, "Narration"),
            t(2, 40.0, 740.0, "08-Jan-24"),
            t(2, 90.0, 740.0, "NIP/TRANSFER FROM JANE ROE REF:FT24010899"),
            t(2, 391.0, 740.0, "2,500.00"),
            t(2, 500.0, 740.0, "106,300.00"),
            t(2, 40.0, 700.0, "Closing Balance"),
            t(2, 500.0, 700.0, "106,300.00"),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::first_bank_statement;
    use super::*;
    use crate::layout::ColumnBand;
    use chrono::NaiveDate;

    fn swapped_first_bank() -> ColumnProfile {
        let mut p = ColumnProfile::first_bank();
        p.name = "firstbank-swapped".into();
        for col in &mut p.columns {
            col.kind = match col.kind {
                ColumnKind::Credit => ColumnKind::Debit,
                ColumnKind::Debit => ColumnKind::Credit,
                other => other,
            };
        }
        p
    }

    #[test]
    fn rows_come_back_in_statement_order() {
        let rows = reconstruct(&first_bank_statement(), &ColumnProfile::first_bank()).unwrap();
        assert_eq!(rows.len(), 3);
        let indices: Vec<usize> = rows.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(rows[0].transaction_date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(rows[2].transaction_date, NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());
    }

    #[test]
    fn column_decides_sign() {
        let rows = reconstruct(&first_bank_statement(), &ColumnProfile::first_bank()).unwrap();
        assert_eq!(rows[0].amount_cents, 500_000);
        assert_eq!(rows[1].amount_cents, -120_000);
        assert_eq!(rows[2].amount_cents, 250_000);
        assert_eq!(rows[1].balance_cents, Some(10_380_000));
    }

    #[test]
    fn wrapped_narration_joins_previous_row() {
        let rows = reconstruct(&first_bank_statement(), &ColumnProfile::first_bank()).unwrap();
        assert_eq!(rows[1].narration, "POS PURCHASE DIESEL MEGA FILLING STATION");
        assert_eq!(rows[0].narration, "FBNMOBILEJOHN DOE/Nk");
    }

    #[test]
    fn reference_pulled_from_narration() {
        let rows = reconstruct(&first_bank_statement(), &ColumnProfile::first_bank()).unwrap();
        assert_eq!(rows[2].reference.as_deref(), Some("FT24010899"));
        assert_eq!(rows[0].reference, None);
    }

    #[test]
    fn swapped_debit_credit_profile_is_caught() {
        let err = reconstruct(&first_bank_statement(), &swapped_first_bank()).unwrap_err();
        assert!(matches!(err, ReconstructError::LayoutMismatch(_)), "got {err:?}");
    }

    #[test]
    fn newest_first_statements_balance_too() {
        let mut rows = reconstruct(&first_bank_statement(), &ColumnProfile::first_bank()).unwrap();
        rows.reverse();
        assert!(verify_balances(&rows).is_ok());
    }

    #[test]
    fn boilerplate_words_in_a_narration_keep_the_row() {
        let mut stream = first_bank_statement();
        stream.tokens.extend([
            TextToken::new("09-Jan-24", 2, 40.0, 720.0),
            TextToken::new("NIP/JOHN DOE ACCOUNT NUMBER UPDATE DUES", 2, 90.0, 720.0),
            TextToken::new("1,000.00", 2, 391.0, 720.0),
            TextToken::new("107,300.00", 2, 500.0, 720.0),
            TextToken::new("10-Jan-24", 2, 40.0, 710.0),
            TextToken::new("WEBPAGE HOSTING", 2, 90.0, 710.0),
            TextToken::new("300.00", 2, 436.0, 710.0),
            TextToken::new("107,000.00", 2, 500.0, 710.0),
        ]);
        let rows = reconstruct(&stream, &ColumnProfile::first_bank()).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[3].narration, "NIP/JOHN DOE ACCOUNT NUMBER UPDATE DUES");
        assert_eq!(rows[3].amount_cents, 100_000);
        assert_eq!(rows[4].narration, "WEBPAGE HOSTING");
        assert_eq!(rows[4].amount_cents, -30_000);
    }

    #[test]
    fn extreme_balances_do_not_overflow() {
        let mut rows = reconstruct(&first_bank_statement(), &ColumnProfile::first_bank()).unwrap();
        rows[1].balance_cents = Some(i64::MAX);
        assert!(verify_balances(&rows).is_err());
    }

    #[test]
    fn both_amounts_in_one_line_is_ambiguous() {
        let stream = TokenStream::new(vec![
            TextToken::new("05-Jan-24", 1, 40.0, 700.0),
            TextToken::new("ODD", 1, 90.0, 700.0),
            TextToken::new("10.00", 1, 391.0, 700.0),
            TextToken::new("10.00", 1, 436.0, 700.0),
        ]);
        let err = reconstruct(&stream, &ColumnProfile::first_bank()).unwrap_err();
        assert!(matches!(err, ReconstructError::Ambiguous(_)));
    }

    #[test]
    fn headers_only_has_no_transactions() {
        let stream = TokenStream::new(vec![
            TextToken::new("Transaction Date", 1, 40.0, 760.0),
            TextToken::new("Narration", 1, 90.0, 760.0),
        ]);
        assert_eq!(
            reconstruct(&stream, &ColumnProfile::first_bank()),
            Err(ReconstructError::NoTransactions)
        );
    }

    #[test]
    fn continuation_does_not_cross_pages() {
        let stream = TokenStream::new(vec![
            TextToken::new("05-Jan-24", 1, 40.0, 60.0),
            TextToken::new("JOHN DOE", 1, 90.0, 60.0),
            TextToken::new("5,000.00", 1, 391.0, 60.0),
            TextToken::new("CARRIED LINE", 2, 90.0, 55.0),
        ]);
        let rows = reconstruct(&stream, &ColumnProfile::first_bank()).unwrap();
        assert_eq!(rows[0].narration, "JOHN DOE");
    }

    #[test]
    fn marked_profile_is_preferred() {
        let mut other = ColumnProfile::first_bank();
        other.name = "acme".into();
        other.markers = vec!["acme bank".into()];
        other.columns = vec![
            ColumnBand::new(ColumnKind::Date, 0.0, 80.0),
            ColumnBand::new(ColumnKind::Narration, 80.0, 600.0),
            ColumnBand::new(ColumnKind::Credit, 600.0, 700.0),
        ];
        let profiles = vec![other, ColumnProfile::first_bank()];
        let (chosen, rows) = reconstruct_with_profiles(&first_bank_statement(), &profiles).unwrap();
        assert_eq!(chosen.name, "firstbank");
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn unmarked_statement_tries_every_profile() {
        let mut stream = first_bank_statement();
        stream.tokens.retain(|t| !t.text.contains("FIRST BANK") && !t.text.contains("FBN"));
        let profiles = [ColumnProfile::first_bank()];
        let (chosen, rows) = reconstruct_with_profiles(&stream, &profiles).unwrap();
        assert_eq!(chosen.name, "firstbank");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].narration, "");
    }

    #[test]
    fn only_a_swapped_profile_reports_mismatch() {
        let profiles = [swapped_first_bank()];
        let err = reconstruct_with_profiles(&first_bank_statement(), &profiles).unwrap_err();
        assert!(matches!(err, ReconstructError::LayoutMismatch(_)));
    }
}
