use serde::{Deserialize, Serialize};
use tally_core::ConfigError;

use crate::reconstruct::ReconstructError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Date,
    ValueDate,
    Narration,
    Reference,
    Credit,
    Debit,
    Balance,
}

/// Horizontal extent of one column, `x_min` inclusive and `x_max` exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnBand {
    pub kind: ColumnKind,
    pub x_min: f64,
    pub x_max: f64,
}

impl ColumnBand {
    pub fn new(kind: ColumnKind, x_min: f64, x_max: f64) -> Self {
        ColumnBand { kind, x_min, x_max }
    }

    fn contains(&self, x: f64) -> bool {
        x >= self.x_min && x < self.x_max
    }
}

/// Where one issuer puts its columns. New issuers are supported by adding a
/// profile, either built in or loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    /// Lowercase phrases whose presence in the statement text selects this profile.
    #[serde(default)]
    pub markers: Vec<String>,
    pub columns: Vec<ColumnBand>,
    /// Tokens whose baselines differ by at most this much share a row.
    #[serde(default = "default_y_tolerance")]
    pub y_tolerance: f64,
    /// Largest vertical gap between a row and a wrapped narration line.
    #[serde(default = "default_continuation_gap")]
    pub max_continuation_gap: f64,
    #[serde(default)]
    pub date_formats: Vec<String>,
    /// Lowercase phrases marking summary and boilerplate lines.
    #[serde(default)]
    pub noise_markers: Vec<String>,
}

fn default_y_tolerance() -> f64 {
    2.0
}

fn default_continuation_gap() -> f64 {
    14.0
}

#[derive(Debug, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    profile: Vec<ColumnProfile>,
}

impl ColumnProfile {
    /// First Bank of Nigeria e-statement: deposits sit around x=391,
    /// withdrawals around x=436, details between 80 and 300.
    pub fn first_bank() -> Self {
        ColumnProfile {
            name: "firstbank".into(),
            markers: vec!["first bank".into(), "firstbank".into(), "fbn".into()],
            columns: vec![
                ColumnBand::new(ColumnKind::Date, 0.0, 80.0),
                ColumnBand::new(ColumnKind::Narration, 80.0, 300.0),
                ColumnBand::new(ColumnKind::ValueDate, 300.0, 370.0),
                ColumnBand::new(ColumnKind::Credit, 370.0, 410.0),
                ColumnBand::new(ColumnKind::Debit, 410.0, 470.0),
                ColumnBand::new(ColumnKind::Balance, 470.0, 700.0),
            ],
            y_tolerance: default_y_tolerance(),
            max_continuation_gap: default_continuation_gap(),
            date_formats: vec!["%d-%b-%y".into(), "%d-%b-%Y".into()],
            noise_markers: vec![
                "opening balance".into(),
                "closing balance".into(),
                "balance b/f".into(),
                "balance c/f".into(),
                "page ".into(),
                "account name".into(),
                "account number".into(),
                "statement period".into(),
                "transaction date".into(),
            ],
        }
    }

    pub fn builtin() -> Vec<ColumnProfile> {
        vec![ColumnProfile::first_bank()]
    }

    /// Parses `[[profile]]` tables and validates every entry.
    pub fn from_toml(toml_content: &str) -> Result<Vec<ColumnProfile>, ConfigError> {
        let file: ProfileFile = toml::from_str(toml_content)?;
        for profile in &file.profile {
            profile
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("layout '{}': {e}", profile.name)))?;
        }
        Ok(file.profile)
    }

    pub fn validate(&self) -> Result<(), ReconstructError> {
        let has = |kind| self.columns.iter().any(|c| c.kind == kind);
        if !has(ColumnKind::Date) {
            return Err(ReconstructError::Ambiguous(format!("{}: no date column", self.name)));
        }
        if !has(ColumnKind::Credit) && !has(ColumnKind::Debit) {
            return Err(ReconstructError::Ambiguous(format!("{}: no amount column", self.name)));
        }
        for (i, a) in self.columns.iter().enumerate() {
            if a.x_min >= a.x_max {
                return Err(ReconstructError::Ambiguous(format!(
                    "{}: {:?} column is empty",
                    self.name, a.kind
                )));
            }
            for b in &self.columns[i + 1..] {
                if a.kind == b.kind || (a.x_min < b.x_max && b.x_min < a.x_max) {
                    return Err(ReconstructError::Ambiguous(format!(
                        "{}: {:?} and {:?} columns overlap",
                        self.name, a.kind, b.kind
                    )));
                }
            }
        }
        if self.y_tolerance < 0.0 || self.max_continuation_gap < 0.0 {
            return Err(ReconstructError::Ambiguous(format!("{}: negative tolerance", self.name)));
        }
        Ok(())
    }

    pub fn column_at(&self, x: f64) -> Option<ColumnKind> {
        self.columns.iter().find(|c| c.contains(x)).map(|c| c.kind)
    }

    pub fn matches_text(&self, lowercase_text: &str) -> bool {
        self.markers.iter().any(|m| lowercase_text.contains(m.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_profiles_are_valid() {
        for profile in ColumnProfile::builtin() {
            profile.validate().unwrap();
        }
    }

    #[test]
    fn first_bank_splits_credit_and_debit_at_410() {
        let p = ColumnProfile::first_bank();
        assert_eq!(p.column_at(391.0), Some(ColumnKind::Credit));
        assert_eq!(p.column_at(409.9), Some(ColumnKind::Credit));
        assert_eq!(p.column_at(410.0), Some(ColumnKind::Debit));
        assert_eq!(p.column_at(436.0), Some(ColumnKind::Debit));
        assert_eq!(p.column_at(40.0), Some(ColumnKind::Date));
        assert_eq!(p.column_at(900.0), None);
    }

    #[test]
    fn overlapping_columns_are_ambiguous() {
        let mut p = ColumnProfile::first_bank();
        p.columns.push(ColumnBand::new(ColumnKind::Reference, 250.0, 320.0));
        assert!(matches!(p.validate(), Err(ReconstructError::Ambiguous(_))));
    }

    #[test]
    fn missing_amount_columns_are_ambiguous() {
        let mut p = ColumnProfile::first_bank();
        p.columns.retain(|c| !matches!(c.kind, ColumnKind::Credit | ColumnKind::Debit));
        assert!(p.validate().is_err());
    }

    #[test]
    fn loads_profiles_from_toml() {
        let profiles = ColumnProfile::from_toml(
            r#"
[[profile]]
name = "acme"
markers = ["acme bank"]
date_formats = ["%d/%m/%Y"]
columns = [
  { kind = "date", x_min = 0.0, x_max = 60.0 },
  { kind = "narration", x_min = 60.0, x_max = 280.0 },
  { kind = "debit", x_min = 280.0, x_max = 360.0 },
  { kind = "credit", x_min = 360.0, x_max = 440.0 },
  { kind = "balance", x_min = 440.0, x_max = 560.0 },
]
"#,
        )
        .unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].y_tolerance, 2.0);
        assert_eq!(profiles[0].column_at(300.0), Some(ColumnKind::Debit));
        assert!(profiles[0].matches_text("statement from acme bank plc"));
    }

    #[test]
    fn invalid_toml_profile_rejected() {
        let err = ColumnProfile::from_toml(
            r#"
[[profile]]
name = "broken"
columns = [{ kind = "narration", x_min = 0.0, x_max = 100.0 }]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
