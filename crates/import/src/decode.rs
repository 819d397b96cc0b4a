use tally_core::{DecodeConfig, RawRow, StatementFormat};
use thiserror::Error;

use crate::csv::{import_csv, looks_delimited, CsvError, CsvImportProfile};
use crate::pdf::extract_tokens;
use crate::token::TokenStream;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Statement is password protected and no password was supplied")]
    PasswordRequired,
    #[error("Could not decrypt statement: {0}")]
    DecryptionFailed(String),
    #[error("Text extraction failed: {0}")]
    Extraction(String),
    #[error("Unsupported statement format: {0}")]
    UnsupportedFormat(String),
    #[error("Statement exceeds limit: {0}")]
    LimitExceeded(String),
    #[error("Delimited statement: {0}")]
    Tabular(#[from] CsvError),
}

impl DecodeError {
    /// Bad or missing password, or a container that cannot be opened. The
    /// operator can fix these by supplying the right password or file.
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, DecodeError::PasswordRequired | DecodeError::DecryptionFailed(_))
    }
}

/// Positioned text for layout reconstruction, or rows straight from a
/// delimited export.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Positioned(TokenStream),
    Tabular(Vec<RawRow>),
}

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

pub fn detect_format(data: &[u8]) -> Option<StatementFormat> {
    let head = &data[..data.len().min(1024)];
    if head.windows(5).any(|w| w == b"%PDF-") {
        return Some(StatementFormat::Pdf);
    }
    let body = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    looks_delimited(body).then_some(StatementFormat::Delimited)
}

/// Turns statement bytes into tokens or rows. Pure: nothing is written anywhere.
pub fn decode(
    data: &[u8],
    password: Option<&str>,
    csv_profile: &CsvImportProfile,
    limits: &DecodeConfig,
) -> Result<Decoded, DecodeError> {
    if data.len() > limits.max_file_bytes {
        return Err(DecodeError::LimitExceeded(format!(
            "{} bytes, limit is {}",
            data.len(),
            limits.max_file_bytes
        )));
    }

    match detect_format(data) {
        Some(StatementFormat::Pdf) => {
            let tokens = extract_tokens(data, password, limits)?;
            if tokens.is_empty() {
                // Scanned statements have no text layer.
                return Err(DecodeError::UnsupportedFormat("PDF has no extractable text".into()));
            }
            Ok(Decoded::Positioned(tokens))
        }
        Some(StatementFormat::Delimited) => {
            let body = data.strip_prefix(UTF8_BOM).unwrap_or(data);
            Ok(Decoded::Tabular(import_csv(body, csv_profile)?))
        }
        None => Err(DecodeError::UnsupportedFormat(
            "neither a PDF nor a delimited text export".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::testpdf::{build, Placed};

    #[test]
    fn sniffs_pdf_and_delimited() {
        assert_eq!(detect_format(b"%PDF-1.7\n..."), Some(StatementFormat::Pdf));
        assert_eq!(
            detect_format(b"\xEF\xBB\xBFDate,Narration,Credit\n"),
            Some(StatementFormat::Delimited)
        );
        assert_eq!(detect_format(b"\x89PNG\r\n\x1a\n"), None);
    }

    #[test]
    fn binary_junk_is_unsupported() {
        let err = decode(b"\x89PNG\r\n", None, &CsvImportProfile::default(), &DecodeConfig::default())
            .unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(_)));
        assert!(!err.is_decryption_failure());
    }

    #[test]
    fn delimited_bypasses_tokens() {
        let data = b"Date,Narration,Debit,Credit\n05/01/2024,NIP/JANE ROE,,2500.00\n";
        match decode(data, None, &CsvImportProfile::default(), &DecodeConfig::default()).unwrap() {
            Decoded::Tabular(rows) => assert_eq!(rows[0].amount_cents, 250_000),
            other => panic!("expected rows, got {other:?}"),
        }
    }

    #[test]
    fn pdf_yields_tokens() {
        let bytes = build(&[vec![Placed { x: 40.0, y: 700.0, text: "05-Jan-24" }]], None);
        match decode(&bytes, None, &CsvImportProfile::default(), &DecodeConfig::default()).unwrap() {
            Decoded::Positioned(stream) => assert_eq!(stream.tokens[0].text, "05-Jan-24"),
            other => panic!("expected tokens, got {other:?}"),
        }
    }

    #[test]
    fn oversized_input_rejected_before_parsing() {
        let limits = DecodeConfig {
            max_file_bytes: 4,
            ..DecodeConfig::default()
        };
        let err = decode(b"%PDF-1.7", None, &CsvImportProfile::default(), &limits).unwrap_err();
        assert!(matches!(err, DecodeError::LimitExceeded(_)));
    }
}
