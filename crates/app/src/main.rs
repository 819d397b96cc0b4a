use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tally::intake::{run_intake, spawn_intake_watcher};
use tally::{Collaborators, ImportController, Settings, TracingEventSink};
use tally_storage::{SqliteLedger, SqliteResidentDirectory};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let project_dirs =
        directories::ProjectDirs::from("com", "tally", "Tally").context("no home directory for app data")?;
    let settings_path = std::env::var_os("TALLY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| project_dirs.config_dir().join("tally.toml"));
    let settings = Settings::load(&settings_path).with_context(|| format!("loading {}", settings_path.display()))?;

    let data_dir = settings
        .data_dir
        .clone()
        .unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
    let intake_dir = settings.intake.folder(&data_dir);
    std::fs::create_dir_all(&data_dir).with_context(|| format!("creating {}", data_dir.display()))?;
    std::fs::create_dir_all(&intake_dir).with_context(|| format!("creating {}", intake_dir.display()))?;

    let db_path = data_dir.join("tally.db");
    let db = tally_storage::create_db(&db_path)
        .await
        .with_context(|| format!("opening {}", db_path.display()))?;

    let collaborators = Collaborators {
        credentials: Arc::new(settings.credential_store()),
        residents: Arc::new(SqliteResidentDirectory::new(db.clone())),
        ledger: Arc::new(SqliteLedger::new(db.clone())),
        events: Arc::new(TracingEventSink),
    };
    let controller = Arc::new(ImportController::new(
        db,
        settings.engine.clone(),
        settings.parse_options(),
        collaborators,
    ));

    // ── Watch folder ──────────────────────────────────────────────────────────
    // The channel bridges the notify watcher thread and the async importer.
    let (intake_tx, intake_rx) = mpsc::channel::<PathBuf>(64);
    let _watcher = if settings.intake.enabled {
        let watcher = spawn_intake_watcher(&intake_dir, intake_tx)
            .with_context(|| format!("watching {}", intake_dir.display()))?;
        tokio::spawn(run_intake(
            Arc::clone(&controller),
            intake_rx,
            settings.intake.clone(),
            settings.bank_accounts.clone(),
        ));
        tracing::info!("Watching intake folder: {}", intake_dir.display());
        Some(watcher)
    } else {
        None
    };

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutting down");
    Ok(())
}
