//! Bank statement reconciliation: turns uploaded statements into reviewed,
//! approved resident payments and expenses.

pub mod controller;
pub mod error;
pub mod events;
pub mod intake;
pub mod settings;

pub use controller::{Collaborators, CreateImport, ImportController, ImportView, ProcessingReport};
pub use error::ReconError;
pub use events::{ChannelEventSink, TracingEventSink};
pub use settings::{BankAccountSettings, IntakeSettings, Settings, StaticCredentialStore};
