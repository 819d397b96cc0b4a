use csv::StringRecord;
use serde::{Deserialize, Serialize};
use std::io::Read;
use tally_core::RawRow;
use thiserror::Error;

use crate::util::{parse_amount, parse_date};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CsvColumnMapping {
    pub date_column: Option<usize>,
    pub narration_column: Option<usize>,
    pub reference_column: Option<usize>,
    /// Single signed amount column. Takes precedence over debit/credit.
    pub amount_column: Option<usize>,
    pub debit_column: Option<usize>,
    pub credit_column: Option<usize>,
    pub balance_column: Option<usize>,
    pub date_formats: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvImportProfile {
    pub name: String,
    /// When `None` the header row is located and mapped automatically.
    pub mapping: Option<CsvColumnMapping>,
    pub has_header: bool,
    pub delimiter: String,
}

impl Default for CsvImportProfile {
    fn default() -> Self {
        Self {
            name: "auto".to_string(),
            mapping: None,
            has_header: true,
            delimiter: ",".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Missing required column: {0}")]
    MissingColumn(String),
    #[error("Could not find a header row naming date, narration and amount columns")]
    NoHeader,
    #[error("Invalid amount '{value}' on line {line}")]
    InvalidAmount { line: usize, value: String },
    #[error("Line {line} has both a debit and a credit")]
    AmbiguousAmount { line: usize },
    #[error("No data rows")]
    NoDataRows,
}

const DATE_HEADERS: &[&str] = &["transaction date", "date", "trans date", "value date", "post date", "posting date"];
const NARRATION_HEADERS: &[&str] = &["narration", "description", "details", "remarks", "transaction details"];
const CREDIT_HEADERS: &[&str] = &["credit", "credit amount", "cr", "deposit", "deposits"];
const DEBIT_HEADERS: &[&str] = &["debit", "debit amount", "dr", "withdrawal", "withdrawals"];
const AMOUNT_HEADERS: &[&str] = &["amount", "transaction amount"];
const REFERENCE_HEADERS: &[&str] = &["reference", "ref", "transaction ref", "reference no", "ref no"];
const BALANCE_HEADERS: &[&str] = &["balance", "running balance", "available balance"];

const SUMMARY_PREFIXES: &[&str] = &["opening balance", "closing balance", "grand total", "summary"];

/// How many leading records are searched for a header row.
const HEADER_SCAN_LIMIT: usize = 30;

fn find_column(header: &StringRecord, names: &[&str]) -> Option<usize> {
    header.iter().position(|cell| {
        let cell = cell.trim().to_lowercase();
        names.iter().any(|n| cell == *n)
    })
}

/// Maps a header row by issuer column names. Needs at least three recognised
/// columns including a date and some amount.
pub fn detect_mapping(header: &StringRecord) -> Option<CsvColumnMapping> {
    let mapping = CsvColumnMapping {
        date_column: find_column(header, DATE_HEADERS),
        narration_column: find_column(header, NARRATION_HEADERS),
        reference_column: find_column(header, REFERENCE_HEADERS),
        amount_column: find_column(header, AMOUNT_HEADERS),
        debit_column: find_column(header, DEBIT_HEADERS),
        credit_column: find_column(header, CREDIT_HEADERS),
        balance_column: find_column(header, BALANCE_HEADERS),
        date_formats: Vec::new(),
    };

    let recognised = [
        mapping.date_column,
        mapping.narration_column,
        mapping.reference_column,
        mapping.amount_column,
        mapping.debit_column,
        mapping.credit_column,
        mapping.balance_column,
    ]
    .iter()
    .filter(|c| c.is_some())
    .count();

    let has_amount = mapping.amount_column.is_some()
        || mapping.debit_column.is_some()
        || mapping.credit_column.is_some();
    (recognised >= 3 && mapping.date_column.is_some() && has_amount).then_some(mapping)
}

fn is_summary_row(record: &StringRecord) -> bool {
    record.iter().any(|cell| {
        let cell = cell.trim().to_lowercase();
        cell == "total" || cell == "totals" || SUMMARY_PREFIXES.iter().any(|m| cell.starts_with(m))
    })
}

fn cell(record: &StringRecord, col: Option<usize>) -> &str {
    col.and_then(|c| record.get(c)).map(str::trim).unwrap_or_default()
}

fn parse_money_cell(record: &StringRecord, col: Option<usize>, line: usize) -> Result<Option<i64>, CsvError> {
    let raw = cell(record, col);
    if raw.is_empty() || raw == "-" {
        return Ok(None);
    }
    parse_amount(raw)
        .map(Some)
        .ok_or_else(|| CsvError::InvalidAmount {
            line,
            value: raw.to_string(),
        })
}

fn parse_records(
    records: Vec<(usize, StringRecord)>,
    mapping: &CsvColumnMapping,
) -> Result<Vec<RawRow>, CsvError> {
    if mapping.date_column.is_none() {
        return Err(CsvError::MissingColumn("date".into()));
    }
    if mapping.amount_column.is_none() && mapping.debit_column.is_none() && mapping.credit_column.is_none() {
        return Err(CsvError::MissingColumn("amount, debit or credit".into()));
    }

    let mut rows = Vec::new();
    for (line, record) in records {
        if record.iter().all(|c| c.trim().is_empty()) || is_summary_row(&record) {
            continue;
        }

        let Some(transaction_date) = parse_date(cell(&record, mapping.date_column), &mapping.date_formats) else {
            continue;
        };

        let amount_cents = if mapping.amount_column.is_some() {
            parse_money_cell(&record, mapping.amount_column, line)?
        } else {
            let credit = parse_money_cell(&record, mapping.credit_column, line)?.filter(|c| *c != 0);
            let debit = parse_money_cell(&record, mapping.debit_column, line)?.filter(|d| *d != 0);
            match (credit, debit) {
                (Some(c), None) => Some(c.abs()),
                (None, Some(d)) => Some(-d.abs()),
                (None, None) => None,
                (Some(_), Some(_)) => return Err(CsvError::AmbiguousAmount { line }),
            }
        };

        let Some(amount_cents) = amount_cents.filter(|a| *a != 0) else {
            continue;
        };

        let reference = Some(cell(&record, mapping.reference_column))
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let balance_cents = parse_amount(cell(&record, mapping.balance_column));

        rows.push(RawRow {
            index: rows.len(),
            transaction_date,
            narration: cell(&record, mapping.narration_column).to_string(),
            reference,
            amount_cents,
            balance_cents,
        });
    }

    if rows.is_empty() {
        return Err(CsvError::NoDataRows);
    }
    Ok(rows)
}

/// Reads a delimited statement export into signed rows: credits positive,
/// debits negative. Header, summary and blank lines are dropped.
pub fn import_csv<R: Read>(data: R, profile: &CsvImportProfile) -> Result<Vec<RawRow>, CsvError> {
    let delimiter = profile.delimiter.as_bytes().first().copied().unwrap_or(b',');
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(data);

    let mut records = Vec::new();
    for (i, result) in reader.records().enumerate() {
        records.push((i + 1, result?));
    }

    match &profile.mapping {
        Some(mapping) => {
            let skip = usize::from(profile.has_header);
            parse_records(records.into_iter().skip(skip).collect(), mapping)
        }
        None => {
            let header_at = records
                .iter()
                .take(HEADER_SCAN_LIMIT)
                .position(|(_, r)| detect_mapping(r).is_some())
                .ok_or(CsvError::NoHeader)?;
            let mapping = detect_mapping(&records[header_at].1).ok_or(CsvError::NoHeader)?;
            parse_records(records.into_iter().skip(header_at + 1).collect(), &mapping)
        }
    }
}

/// Cheap check used by format sniffing: text that splits into several fields.
pub fn looks_delimited(data: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(data) else {
        return false;
    };
    text.lines()
        .take(HEADER_SCAN_LIMIT)
        .any(|line| line.matches(',').count() >= 2 || line.matches(';').count() >= 2 || line.matches('\t').count() >= 2)
}
