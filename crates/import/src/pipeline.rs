//! Bytes in, ordered raw rows out. Nothing here touches storage, so a failure
//! at any step leaves no trace of the statement behind.

use std::sync::Arc;
use std::time::Duration;

use tally_core::{DateRange, DecodeConfig, RawRow, StatementFormat};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::csv::CsvImportProfile;
use crate::decode::{decode, DecodeError, Decoded};
use crate::hash::file_hash;
use crate::layout::ColumnProfile;
use crate::normalize::extract_reference;
use crate::reconstruct::{reconstruct_with_profiles, ReconstructError};
use crate::util::re;

re!(re_account_number, r"(?i)\b(?:account|acct|a/c)\s*(?:number|no\.?|num)?\s*[:#]?\s*(\d[\d\s-]{5,}\d)");

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Reconstruct(#[from] ReconstructError),
    #[error("Statement parsing did not finish within {0} seconds")]
    Timeout(u64),
    #[error("Statement parser stopped unexpectedly: {0}")]
    Worker(String),
}

/// Everything needed to turn bytes into rows.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub profiles: Vec<ColumnProfile>,
    pub csv_profile: CsvImportProfile,
    pub limits: DecodeConfig,
}

impl ParseOptions {
    pub fn with_builtin_profiles(limits: DecodeConfig) -> Self {
        Self {
            profiles: ColumnProfile::builtin(),
            csv_profile: CsvImportProfile::default(),
            limits,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStatement {
    pub format: StatementFormat,
    pub rows: Vec<RawRow>,
    /// Earliest to latest transaction date, `None` only when there are no rows.
    pub period: Option<DateRange>,
    pub file_hash: String,
    /// Last four digits of the account number printed on the statement.
    pub account_hint: Option<String>,
    /// Layout profile used for a PDF; `None` for delimited files.
    pub layout_profile: Option<String>,
}

fn account_hint(text: &str) -> Option<String> {
    let caps = re_account_number().captures(text)?;
    let digits: String = caps[1].chars().filter(char::is_ascii_digit).collect();
    (digits.len() >= 4).then(|| digits[digits.len() - 4..].to_string())
}

/// Synchronous core of [`parse_statement`].
pub fn parse_statement_blocking(
    data: &[u8],
    password: Option<&str>,
    options: &ParseOptions,
) -> Result<ParsedStatement, PipelineError> {
    let file_hash = file_hash(data);

    let (format, mut rows, layout_profile, hint) =
        match decode(data, password, &options.csv_profile, &options.limits)? {
            Decoded::Positioned(tokens) => {
                debug!(tokens = tokens.len(), pages = tokens.pages, "text layer extracted");
                let hint = account_hint(&tokens.plain_text());
                let (profile, rows) = reconstruct_with_profiles(&tokens, &options.profiles)?;
                (StatementFormat::Pdf, rows, Some(profile.name.clone()), hint)
            }
            Decoded::Tabular(rows) => {
                let head = String::from_utf8_lossy(&data[..data.len().min(2048)]);
                (StatementFormat::Delimited, rows, None, account_hint(&head))
            }
        };

    for row in &mut rows {
        if row.reference.is_none() {
            row.reference = extract_reference(&row.narration);
        }
    }

    let period = DateRange::covering(rows.iter().map(|r| r.transaction_date));
    info!(
        format = %format,
        rows = rows.len(),
        profile = layout_profile.as_deref().unwrap_or("-"),
        "statement parsed"
    );

    Ok(ParsedStatement {
        format,
        rows,
        period,
        file_hash,
        account_hint: hint,
        layout_profile,
    })
}

/// Decodes and reconstructs on the blocking pool, bounded by
/// `limits.timeout_secs`. A statement that runs past the deadline is reported
/// as [`PipelineError::Timeout`] and its result is discarded.
#[instrument(skip_all, fields(bytes = data.len()))]
pub async fn parse_statement(
    data: Vec<u8>,
    password: Option<String>,
    options: Arc<ParseOptions>,
) -> Result<ParsedStatement, PipelineError> {
    let timeout_secs = options.limits.timeout_secs;
    let work = tokio::task::spawn_blocking(move || {
        parse_statement_blocking(&data, password.as_deref(), &options)
    });

    match tokio::time::timeout(Duration::from_secs(timeout_secs), work).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(PipelineError::Worker(join_error.to_string())),
        Err(_) => Err(PipelineError::Timeout(timeout_secs)),
    }
}
