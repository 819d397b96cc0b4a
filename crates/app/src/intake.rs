//! Watch-folder intake: statements dropped into a directory are imported and
//! matched without an operator starting the upload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tally_core::{ActorId, TransactionFilter};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::controller::{CreateImport, ImportController, ImportView};
use crate::error::ReconError;
use crate::settings::{BankAccountSettings, IntakeSettings};

/// Separates the bank account reference from the rest of an intake file name,
/// as in `fbn-main__january.pdf`.
const ACCOUNT_SEPARATOR: &str = "__";

/// True for events that mean a file in the folder gained content: creation,
/// a data write, a rename into place or a writer closing it.
fn is_write_event(kind: &notify::EventKind) -> bool {
    use notify::event::{AccessKind, AccessMode, ModifyKind};
    use notify::EventKind;

    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Name(_) | ModifyKind::Any)
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
    )
}

/// Watches `dir` and forwards every path written to it. Large statements
/// produce many events; [`run_intake`] waits for them to settle. The returned
/// watcher must be kept alive for watching to continue.
pub fn spawn_intake_watcher(dir: &Path, tx: mpsc::Sender<PathBuf>) -> notify::Result<impl notify::Watcher> {
    use notify::{RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| match event {
        Ok(ev) if is_write_event(&ev.kind) => {
            for path in ev.paths {
                if tx.try_send(path).is_err() {
                    warn!("intake queue full, event dropped");
                }
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "intake watcher error"),
    })?;

    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Files seen in the intake folder, keyed by the time of their last write.
#[derive(Debug, Default)]
struct Settling {
    last_write: HashMap<PathBuf, Instant>,
}

impl Settling {
    fn touch(&mut self, path: PathBuf, at: Instant) {
        self.last_write.insert(path, at);
    }

    /// Removes and returns the files that have been quiet for `settle`.
    fn take_settled(&mut self, now: Instant, settle: Duration) -> Vec<PathBuf> {
        let mut ready: Vec<PathBuf> = self
            .last_write
            .iter()
            .filter(|(_, at)| now.duration_since(**at) >= settle)
            .map(|(path, _)| path.clone())
            .collect();
        ready.sort();
        for path in &ready {
            self.last_write.remove(path);
        }
        ready
    }
}

/// The account an intake file belongs to: the configured intake account, else
/// a configured account named by the file's prefix, else the only account.
pub fn account_for_file(path: &Path, intake: &IntakeSettings, accounts: &[BankAccountSettings]) -> Option<String> {
    if let Some(account) = &intake.bank_account_ref {
        return Some(account.clone());
    }
    let stem = path.file_stem()?.to_str()?;
    if let Some((prefix, _)) = stem.split_once(ACCOUNT_SEPARATOR) {
        if let Some(account) = accounts.iter().find(|a| a.reference == prefix) {
            return Some(account.reference.clone());
        }
    }
    match accounts {
        [only] => Some(only.reference.clone()),
        _ => None,
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'))
}

/// Imports one file and runs matching on it.
pub async fn ingest_file(
    controller: &ImportController,
    path: &Path,
    bank_account_ref: String,
    actor: &ActorId,
) -> Result<ImportView, ReconError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ReconError::Validation(format!("{}: {e}", path.display())))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("statement")
        .to_string();

    let created = controller
        .create_import(CreateImport {
            bank_account_ref,
            file_name,
            bytes,
            password: None,
            period: None,
            transaction_filter: TransactionFilter::All,
            uploaded_by: actor.clone(),
        })
        .await?;
    controller.submit_rows_for_matching(created.import.id).await
}

/// Imports files from the intake queue once their writes have settled, until
/// every sender is gone.
pub async fn run_intake(
    controller: Arc<ImportController>,
    mut rx: mpsc::Receiver<PathBuf>,
    intake: IntakeSettings,
    accounts: Vec<BankAccountSettings>,
) {
    let actor = ActorId(intake.actor.clone());
    let settle = Duration::from_millis(intake.settle_ms);
    let mut settling = Settling::default();
    let mut tick = tokio::time::interval((settle / 2).max(Duration::from_millis(50)));

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(path) if !is_hidden(&path) => settling.touch(path, Instant::now()),
                Some(_) => {}
                None => break,
            },
            _ = tick.tick() => {
                for path in settling.take_settled(Instant::now(), settle) {
                    ingest_settled(&controller, &path, &intake, &accounts, &actor).await;
                }
            }
        }
    }
}

async fn ingest_settled(
    controller: &ImportController,
    path: &Path,
    intake: &IntakeSettings,
    accounts: &[BankAccountSettings],
    actor: &ActorId,
) {
    if !path.is_file() {
        debug!(path = %path.display(), "intake entry gone or not a file");
        return;
    }
    let Some(account) = account_for_file(path, intake, accounts) else {
        warn!(path = %path.display(), "no bank account for intake file, skipped");
        return;
    };
    info!(path = %path.display(), %account, "importing statement");
    match ingest_file(controller, path, account, actor).await {
        Ok(view) => info!(
            import_id = %view.import.id,
            status = %view.status,
            unmatched = view.counts.unmatched,
            "intake import ready for review"
        ),
        Err(e) => warn!(path = %path.display(), error = %e, recoverable = e.is_recoverable(), "intake import failed"),
    }
}
