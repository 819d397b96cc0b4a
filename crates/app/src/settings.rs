//! On-disk settings: engine tunables, statement passwords, extra layouts and
//! the intake folder. Everything has a default, so a missing file is valid.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tally_core::{CollaboratorError, ConfigError, CredentialStore, EngineConfig};
use tally_import::{ColumnProfile, CsvImportProfile, ParseOptions};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Overrides the platform data directory.
    pub data_dir: Option<PathBuf>,
    pub engine: EngineConfig,
    pub bank_accounts: Vec<BankAccountSettings>,
    /// Layouts tried before the built-in ones.
    pub layouts: Vec<ColumnProfile>,
    pub csv: CsvImportProfile,
    pub intake: IntakeSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankAccountSettings {
    pub reference: String,
    #[serde(default)]
    pub statement_password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeSettings {
    pub enabled: bool,
    /// Watched folder; `<data_dir>/intake` when unset.
    pub dir: Option<PathBuf>,
    /// Account that statements dropped into the intake folder belong to.
    pub bank_account_ref: Option<String>,
    pub actor: String,
    /// A file is imported once it has gone this long without a write event.
    pub settle_ms: u64,
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            bank_account_ref: None,
            actor: "intake".to_string(),
            settle_ms: 2_000,
        }
    }
}

impl IntakeSettings {
    pub fn folder(&self, data_dir: &Path) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| data_dir.join("intake"))
    }
}

impl Settings {
    pub fn from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(toml_content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Invalid(format!("{}: {e}", path.display()))),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        for layout in &self.layouts {
            layout
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("layout '{}': {e}", layout.name)))?;
        }
        let mut seen = std::collections::HashSet::new();
        for account in &self.bank_accounts {
            if !seen.insert(account.reference.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "bank account '{}' is listed twice",
                    account.reference
                )));
            }
        }
        Ok(())
    }

    /// Configured layouts first, then the built-in ones they do not replace.
    pub fn parse_options(&self) -> ParseOptions {
        let mut profiles = self.layouts.clone();
        for builtin in ColumnProfile::builtin() {
            if !profiles.iter().any(|p| p.name == builtin.name) {
                profiles.push(builtin);
            }
        }
        ParseOptions {
            profiles,
            csv_profile: self.csv.clone(),
            limits: self.engine.decode.clone(),
        }
    }

    pub fn credential_store(&self) -> StaticCredentialStore {
        StaticCredentialStore::new(
            self.bank_accounts
                .iter()
                .filter_map(|a| Some((a.reference.clone(), a.statement_password.clone()?))),
        )
    }
}

/// Statement passwords held in memory, keyed by bank account reference.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    passwords: HashMap<String, String>,
}

impl StaticCredentialStore {
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            passwords: entries.into_iter().collect(),
        }
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn get_password(&self, account_ref: &str) -> Result<Option<String>, CollaboratorError> {
        Ok(self.passwords.get(account_ref).cloned())
    }
}
