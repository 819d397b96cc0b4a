//! The import lifecycle: upload, matching, operator review, maker-checker
//! approval and processing into the ledger.
//!
//! Only the stage is stored on an import; the finer status shown to operators
//! is derived from its rows every time it is read.

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tally_core::{
    Actor, ActorId, AliasId, ApprovalRequest, CredentialStore, DateRange, DuplicateTier, EngineConfig, EventSink,
    ImportBreakdown, ImportEvent, ImportId, ImportStage, ImportStatus, Ledger, LedgerRecord, LedgerRecordKind,
    LedgerRecordRef, MatchMethod, NewExpense, NewPayment, ResidentDirectory, ResidentId, ResidentPaymentAlias,
    RowCounts, RowFailure, RowId, RowOutcome, RowStatus, StatementImport, StatementRow, TransactionFilter,
};
use tally_import::{
    find_batch_duplicates, narration_key, parse_statement, CandidateTxn, DuplicateGuard, DuplicateVerdict,
    MatchDecision, ParseOptions, ResidentMatcher,
};
use tally_storage::{self as storage, DbPool, NewImport, StorageError};
use tracing::{debug, info, instrument, warn};

use crate::error::ReconError;

/// The systems the controller talks to besides its own database.
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialStore>,
    pub residents: Arc<dyn ResidentDirectory>,
    pub ledger: Arc<dyn Ledger>,
    pub events: Arc<dyn EventSink>,
}

#[derive(Debug, Clone)]
pub struct CreateImport {
    pub bank_account_ref: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Takes precedence over the password on file for the account.
    pub password: Option<String>,
    /// Derived from the transaction dates when absent.
    pub period: Option<DateRange>,
    pub transaction_filter: TransactionFilter,
    pub uploaded_by: ActorId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportView {
    pub import: StatementImport,
    pub status: ImportStatus,
    pub counts: RowCounts,
    pub open_approval: Option<ApprovalRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingReport {
    pub posted: usize,
    /// Rows that had been posted by an earlier pass.
    pub already_posted: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub failures: Vec<RowFailure>,
}

pub struct ImportController {
    pool: DbPool,
    config: EngineConfig,
    parse_options: Arc<ParseOptions>,
    matcher: ResidentMatcher,
    guard: DuplicateGuard,
    collaborators: Collaborators,
}

fn clear_match(row: &mut StatementRow) {
    row.resident_id = None;
    row.expense_category = None;
    row.confidence = None;
    row.method = None;
    row.score = None;
}

fn candidate_of(row: &StatementRow) -> CandidateTxn {
    CandidateTxn {
        date: row.transaction_date,
        amount_cents: row.amount_cents,
        narration: Some(row.narration.clone()),
        reference: row.reference.clone(),
        source_row_id: Some(row.id),
    }
}

fn non_empty(value: &str, what: &str) -> Result<String, ReconError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ReconError::Validation(format!("{what} must not be empty")));
    }
    Ok(trimmed.to_string())
}

impl ImportController {
    pub fn new(pool: DbPool, config: EngineConfig, parse_options: ParseOptions, collaborators: Collaborators) -> Self {
        Self {
            matcher: ResidentMatcher::new(config.matching.clone()),
            guard: DuplicateGuard::new(config.duplicates.clone()),
            parse_options: Arc::new(parse_options),
            pool,
            config,
            collaborators,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn emit(&self, event: ImportEvent) {
        self.collaborators.events.emit(event).await;
    }

    // ── Upload ───────────────────────────────────────────────────────────────

    /// Parses the statement and persists it with its rows in `draft`.
    /// Any decode or layout failure returns before anything is written.
    #[instrument(skip_all, fields(account = %request.bank_account_ref, file = %request.file_name))]
    pub async fn create_import(&self, request: CreateImport) -> Result<ImportView, ReconError> {
        let bank_account_ref = non_empty(&request.bank_account_ref, "bank account reference")?;

        let file_hash = tally_import::file_hash(&request.bytes);
        if let Some(existing) = storage::find_import_by_hash(&self.pool, &file_hash).await? {
            return Err(ReconError::DuplicateDetected(format!(
                "'{}' was already imported as import {}",
                request.file_name, existing.id
            )));
        }

        let password = match request.password {
            Some(p) => Some(p),
            None => self.collaborators.credentials.get_password(&bank_account_ref).await?,
        };

        let parsed = parse_statement(request.bytes, password, Arc::clone(&self.parse_options))
            .await
            .map_err(|e| {
                warn!(error = %e, "statement rejected");
                ReconError::from(e)
            })?;

        let filter = request.transaction_filter;
        let rows: Vec<_> = parsed.rows.into_iter().filter(|r| filter.accepts(r.amount_cents)).collect();
        if rows.is_empty() {
            return Err(ReconError::Validation(format!("statement has no {filter} transactions")));
        }
        let period = match request.period.or(parsed.period) {
            Some(period) => period,
            None => DateRange::covering(rows.iter().map(|r| r.transaction_date))
                .ok_or_else(|| ReconError::Validation("statement has no dated transactions".to_string()))?,
        };

        let new_import = NewImport {
            bank_account_ref,
            format: parsed.format,
            period,
            file_name: request.file_name,
            file_hash,
            layout_profile: parsed.layout_profile,
            account_hint: parsed.account_hint,
            transaction_filter: filter,
            uploaded_by: request.uploaded_by.clone(),
            created_at: Utc::now(),
        };
        let import = storage::insert_import_with_rows(&self.pool, &new_import, &rows)
            .await
            .map_err(|e| match e {
                StorageError::Conflict(msg) => ReconError::DuplicateDetected(msg),
                other => other.into(),
            })?;

        info!(import_id = %import.id, rows = rows.len(), period = %import.period, "import created");
        self.emit(ImportEvent::ImportCreated {
            import_id: import.id,
            rows: rows.len(),
            uploaded_by: request.uploaded_by,
        })
        .await;
        self.get_import(import.id).await
    }

    // ── Matching ─────────────────────────────────────────────────────────────

    /// Records the duplicate screen compares against: posted money plus
    /// unposted rows of other imports, widened by the date tolerance.
    async fn screening_records(&self, import: &StatementImport) -> Result<Vec<LedgerRecord>, ReconError> {
        let window = import.period.widen(self.config.duplicates.date_tolerance_days);
        let mut records = self.collaborators.ledger.records_between(window).await?;
        records.extend(storage::pending_rows_between(&self.pool, window, import.id).await?);
        Ok(records)
    }

    /// Records one row is screened against right before it is posted: money
    /// near its date plus unposted rows of other imports. Postings made from
    /// this import's own rows are left out; repeats within the statement were
    /// flagged during matching.
    async fn row_screening(
        &self,
        import: &StatementImport,
        row: &StatementRow,
        own_rows: &HashSet<RowId>,
    ) -> Result<Vec<LedgerRecord>, ReconError> {
        let window = DateRange::new(row.transaction_date, row.transaction_date)
            .widen(self.config.duplicates.date_tolerance_days);
        let mut records = self.collaborators.ledger.records_between(window).await?;
        records.retain(|r| !r.source_row_id.is_some_and(|id| own_rows.contains(&id)));
        records.extend(storage::pending_rows_between(&self.pool, window, import.id).await?);
        Ok(records)
    }

    /// Matches and screens every row of a `draft` import, then opens it for review.
    #[instrument(skip(self))]
    pub async fn submit_rows_for_matching(&self, import_id: ImportId) -> Result<ImportView, ReconError> {
        let import = storage::get_import(&self.pool, import_id).await?;
        if import.stage != ImportStage::Draft {
            return Err(ReconError::InvalidTransition(format!(
                "import {import_id} was already matched"
            )));
        }

        let mut rows = storage::list_rows(&self.pool, import_id).await?;
        let residents = self.collaborators.residents.list_active_residents().await?;
        let aliases = storage::list_aliases(&self.pool, false).await?;

        // A failed lookup must not let duplicates through; every row is then
        // treated as a possible duplicate.
        let screening = match self.screening_records(&import).await {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(%import_id, error = %e, "duplicate screening unavailable");
                Err(e.to_string())
            }
        };

        let raw: Vec<_> = rows
            .iter()
            .map(|r| tally_core::RawRow {
                index: r.index,
                transaction_date: r.transaction_date,
                narration: r.narration.clone(),
                reference: r.reference.clone(),
                amount_cents: r.amount_cents,
                balance_cents: r.balance_cents,
            })
            .collect();
        let id_by_index: HashMap<usize, RowId> = rows.iter().map(|r| (r.index, r.id)).collect();
        let repeats: HashMap<usize, usize> = find_batch_duplicates(&raw)
            .into_iter()
            .map(|d| (d.index, d.first_index))
            .collect();

        let mut used_aliases: Vec<AliasId> = Vec::new();
        for row in &mut rows {
            let normalized = self.matcher.normalize(&row.narration);
            row.normalized_narration = (!normalized.is_empty()).then(|| normalized.display.clone());

            let verdict = match &screening {
                Ok(records) => self.guard.check(&candidate_of(row), records),
                Err(reason) => {
                    row.duplicate_tier = Some(DuplicateTier::Likely);
                    row.match_note = Some(format!("duplicate screening unavailable: {reason}"));
                    DuplicateVerdict::Clear
                }
            };
            match &verdict {
                DuplicateVerdict::ExactDuplicate { of } => {
                    row.status = RowStatus::Duplicate;
                    row.duplicate_tier = Some(DuplicateTier::Exact);
                    row.duplicate_of = Some(*of);
                    row.match_note = Some(verdict.explain());
                    continue;
                }
                DuplicateVerdict::LikelyDuplicate { of, .. } => {
                    row.duplicate_tier = Some(DuplicateTier::Likely);
                    row.duplicate_of = Some(*of);
                }
                DuplicateVerdict::Clear => {}
            }
            if let Some(first) = repeats.get(&row.index) {
                row.duplicate_tier = Some(DuplicateTier::Likely);
                row.duplicate_of = id_by_index
                    .get(first)
                    .map(|id| LedgerRecordRef::new(LedgerRecordKind::StatementRow, id.0));
            }

            if !row.is_credit() {
                row.status = RowStatus::Unmatched;
                row.match_note = Some("debit: assign an expense category or skip".to_string());
                continue;
            }

            let outcome = self.matcher.match_narration(&row.narration, &residents, &aliases);
            let note = outcome.decision.explain();
            match outcome.decision {
                MatchDecision::AutoAssign(chosen) => {
                    row.status = RowStatus::Matched;
                    row.resident_id = Some(chosen.resident_id);
                    row.confidence = Some(chosen.tier);
                    row.method = Some(chosen.method);
                    row.score = Some(chosen.score);
                    if chosen.method == MatchMethod::ExactAlias {
                        used_aliases.extend(chosen.alias_id);
                    }
                }
                MatchDecision::NeedsReview(_) => {
                    row.status = RowStatus::Unmatched;
                    clear_match(row);
                    if let Some(best) = outcome.candidates.first() {
                        row.confidence = Some(best.tier);
                        row.score = Some(best.score);
                    }
                }
            }
            row.match_note = Some(match row.duplicate_tier {
                Some(DuplicateTier::Likely) => format!("{note}; possible duplicate, acknowledge before approval"),
                _ => note,
            });
        }

        storage::save_rows(&self.pool, import_id, &rows, ImportStage::Draft, Some(ImportStage::Review)).await?;

        let now = Utc::now();
        for alias_id in used_aliases {
            if let Err(e) = storage::touch_alias(&self.pool, alias_id, now).await {
                warn!(alias = %alias_id, error = %e, "alias hit not recorded");
            }
        }

        let counts = RowCounts::from_rows(&rows);
        info!(
            %import_id,
            matched = counts.matched,
            unmatched = counts.unmatched,
            duplicates = counts.duplicate,
            "matching completed"
        );
        self.emit(ImportEvent::MatchingCompleted {
            import_id,
            matched: counts.matched,
            unmatched: counts.unmatched,
            duplicates: counts.duplicate,
            likely_duplicates: counts.likely_duplicate,
        })
        .await;
        self.get_import(import_id).await
    }

    // ── Row review ───────────────────────────────────────────────────────────

    /// Loads a row whose import is in `review`.
    async fn reviewable_row(&self, row_id: RowId) -> Result<StatementRow, ReconError> {
        let row = storage::get_row(&self.pool, row_id).await?;
        let import = storage::get_import(&self.pool, row.import_id).await?;
        if import.stage != ImportStage::Review {
            let status = import.status(&storage::list_rows(&self.pool, import.id).await?);
            return Err(ReconError::InvalidTransition(format!(
                "rows of import {} cannot be edited while it is {status}",
                import.id
            )));
        }
        Ok(row)
    }

    fn refuse_duplicate(row: &StatementRow) -> Result<(), ReconError> {
        if row.status == RowStatus::Duplicate {
            return Err(ReconError::InvalidTransition(format!(
                "row {} is an exact duplicate and cannot be posted",
                row.id
            )));
        }
        Ok(())
    }

    /// Assigns a credit row to a resident and learns the narration as an alias.
    #[instrument(skip(self, actor), fields(actor = %actor))]
    pub async fn manual_match_row(
        &self,
        row_id: RowId,
        resident_id: ResidentId,
        actor: &ActorId,
    ) -> Result<StatementRow, ReconError> {
        let mut row = self.reviewable_row(row_id).await?;
        Self::refuse_duplicate(&row)?;
        if !row.is_credit() {
            return Err(ReconError::Validation(format!(
                "row {row_id} is a debit; assign an expense category instead"
            )));
        }
        let residents = self.collaborators.residents.list_active_residents().await?;
        if !residents.iter().any(|r| r.id == resident_id) {
            return Err(ReconError::NotFound(format!("active resident {resident_id}")));
        }

        clear_match(&mut row);
        row.status = RowStatus::ManuallyMatched;
        row.resident_id = Some(resident_id);
        row.method = Some(MatchMethod::Manual);
        row.match_note = Some(format!("matched manually by {actor}"));
        storage::update_row(&self.pool, &row, ImportStage::Review).await?;

        let key = self.matcher.normalize(&row.narration).key;
        if !key.is_empty() {
            let alias = storage::learn_alias(&self.pool, &key, resident_id, Some(actor), Utc::now()).await?;
            debug!(fragment = %alias.fragment, hits = alias.hit_count, "alias learned");
            self.emit(ImportEvent::AliasLearned {
                fragment: alias.fragment,
                resident_id,
            })
            .await;
        }
        Ok(row)
    }

    /// Books a debit row as an expense under `category`.
    pub async fn assign_expense(&self, row_id: RowId, category: &str, actor: &ActorId) -> Result<StatementRow, ReconError> {
        let category = non_empty(category, "expense category")?;
        let mut row = self.reviewable_row(row_id).await?;
        Self::refuse_duplicate(&row)?;
        if row.is_credit() {
            return Err(ReconError::Validation(format!(
                "row {row_id} is a credit; match it to a resident instead"
            )));
        }
        clear_match(&mut row);
        row.status = RowStatus::ManuallyMatched;
        row.expense_category = Some(category.clone());
        row.method = Some(MatchMethod::Manual);
        row.match_note = Some(format!("expense '{category}' assigned by {actor}"));
        storage::update_row(&self.pool, &row, ImportStage::Review).await?;
        Ok(row)
    }

    /// Puts a matched or skipped row back to unmatched.
    pub async fn unmatch_row(&self, row_id: RowId, actor: &ActorId) -> Result<StatementRow, ReconError> {
        let mut row = self.reviewable_row(row_id).await?;
        Self::refuse_duplicate(&row)?;
        if row.status == RowStatus::Unmatched {
            return Ok(row);
        }
        clear_match(&mut row);
        row.status = RowStatus::Unmatched;
        row.match_note = Some(format!("unmatched by {actor}"));
        storage::update_row(&self.pool, &row, ImportStage::Review).await?;
        Ok(row)
    }

    pub async fn skip_row(&self, row_id: RowId, actor: &ActorId, reason: Option<&str>) -> Result<StatementRow, ReconError> {
        let mut row = self.reviewable_row(row_id).await?;
        Self::refuse_duplicate(&row)?;
        clear_match(&mut row);
        row.status = RowStatus::Skipped;
        row.match_note = Some(match reason.map(str::trim).filter(|r| !r.is_empty()) {
            Some(reason) => format!("skipped by {actor}: {reason}"),
            None => format!("skipped by {actor}"),
        });
        storage::update_row(&self.pool, &row, ImportStage::Review).await?;
        Ok(row)
    }

    /// Labels a row for the breakdown. Allowed in any stage; `None` clears it.
    pub async fn tag_row(&self, row_id: RowId, tag: Option<&str>) -> Result<StatementRow, ReconError> {
        let mut row = storage::get_row(&self.pool, row_id).await?;
        let import = storage::get_import(&self.pool, row.import_id).await?;
        row.tag = tag.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string);
        storage::update_row(&self.pool, &row, import.stage).await?;
        Ok(row)
    }

    /// Accepts a likely-duplicate warning so the row may be posted. Allowed in
    /// review, and after approval for rows that failed on the warning.
    pub async fn acknowledge_duplicate(&self, row_id: RowId, actor: &ActorId) -> Result<StatementRow, ReconError> {
        let mut row = storage::get_row(&self.pool, row_id).await?;
        let import = storage::get_import(&self.pool, row.import_id).await?;
        if !matches!(import.stage, ImportStage::Review | ImportStage::Approved) {
            return Err(ReconError::InvalidTransition(format!(
                "import {} is awaiting approval",
                import.id
            )));
        }
        if row.duplicate_tier != Some(DuplicateTier::Likely) {
            return Err(ReconError::Validation(format!("row {row_id} has no duplicate warning to acknowledge")));
        }
        row.duplicate_acknowledged = true;
        row.processing_error = None;
        row.match_note = Some(format!(
            "{}; duplicate warning acknowledged by {actor}",
            row.match_note.as_deref().unwrap_or("possible duplicate")
        ));
        storage::update_row(&self.pool, &row, import.stage).await?;
        Ok(row)
    }

    // ── Approval ─────────────────────────────────────────────────────────────

    /// Opens the approval request. An actor allowed to self-approve moves the
    /// import straight to `approved`.
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn submit_for_approval(&self, import_id: ImportId, actor: &Actor) -> Result<ApprovalRequest, ReconError> {
        let import = storage::get_import(&self.pool, import_id).await?;
        let rows = storage::list_rows(&self.pool, import_id).await?;
        match import.stage {
            ImportStage::Review => {}
            ImportStage::PendingApproval => {
                return Err(ReconError::ApprovalConflict(format!(
                    "import {import_id} already has a pending approval request"
                )))
            }
            _ => {
                return Err(ReconError::InvalidTransition(format!(
                    "import {import_id} is {} and cannot be submitted",
                    import.status(&rows)
                )))
            }
        }

        let unmatched = rows.iter().filter(|r| r.status == RowStatus::Unmatched).count();
        if unmatched > 0 {
            return Err(ReconError::InvalidTransition(format!(
                "{unmatched} row(s) still need a resident, an expense category or a skip"
            )));
        }
        let warned: Vec<usize> = rows
            .iter()
            .filter(|r| r.status.is_processable() && r.has_unacknowledged_warning())
            .map(|r| r.index)
            .collect();
        if !warned.is_empty() {
            return Err(ReconError::InvalidTransition(format!(
                "rows {warned:?} may be duplicates; acknowledge or skip them first"
            )));
        }

        let request = storage::open_approval(&self.pool, import_id, &actor.id, Utc::now(), actor.may_auto_approve)
            .await
            .map_err(|e| match e {
                StorageError::Conflict(msg) => ReconError::ApprovalConflict(msg),
                other => other.into(),
            })?;

        info!(%import_id, approval_id = %request.id, auto = actor.may_auto_approve, "approval requested");
        self.emit(ImportEvent::ApprovalRequested {
            import_id,
            approval_id: request.id,
            requested_by: actor.id.clone(),
        })
        .await;
        if actor.may_auto_approve {
            self.emit(ImportEvent::ImportApproved {
                import_id,
                approval_id: request.id,
                approved_by: actor.id.clone(),
                auto_approved: true,
            })
            .await;
        }
        Ok(request)
    }

    async fn open_request(&self, import_id: ImportId) -> Result<ApprovalRequest, ReconError> {
        storage::get_open_approval(&self.pool, import_id)
            .await?
            .ok_or_else(|| ReconError::InvalidTransition(format!("import {import_id} is not awaiting approval")))
    }

    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn approve(&self, import_id: ImportId, actor: &Actor) -> Result<ApprovalRequest, ReconError> {
        let request = self.open_request(import_id).await?;
        if self.config.approvals.maker_checker && request.requested_by == actor.id {
            return Err(ReconError::SelfApproval(format!(
                "{} submitted import {import_id} and cannot also approve it",
                actor.id
            )));
        }
        let decided = storage::approve_request(&self.pool, request.id, &actor.id, Utc::now()).await?;
        info!(%import_id, approval_id = %decided.id, "import approved");
        self.emit(ImportEvent::ImportApproved {
            import_id,
            approval_id: decided.id,
            approved_by: actor.id.clone(),
            auto_approved: false,
        })
        .await;
        Ok(decided)
    }

    /// Closes the request as rejected and returns the import to review with
    /// its row matches intact.
    #[instrument(skip(self, actor, reason), fields(actor = %actor.id))]
    pub async fn reject(&self, import_id: ImportId, actor: &Actor, reason: &str) -> Result<ApprovalRequest, ReconError> {
        let reason = non_empty(reason, "rejection reason")?;
        let request = self.open_request(import_id).await?;
        let decided = storage::reject_request(&self.pool, request.id, &actor.id, &reason, Utc::now()).await?;
        info!(%import_id, approval_id = %decided.id, %reason, "import rejected");
        self.emit(ImportEvent::ImportRejected {
            import_id,
            approval_id: decided.id,
            rejected_by: actor.id.clone(),
            reason,
        })
        .await;
        Ok(decided)
    }

    // ── Processing ───────────────────────────────────────────────────────────

    /// Posts every processable row that has not been posted yet. Safe to call
    /// again: posted rows are left alone and failed rows are retried.
    #[instrument(skip(self))]
    pub async fn process_approved_import(&self, import_id: ImportId) -> Result<ProcessingReport, ReconError> {
        let import = storage::get_import(&self.pool, import_id).await?;
        if import.stage != ImportStage::Approved {
            return Err(ReconError::InvalidTransition(format!("import {import_id} has not been approved")));
        }
        let recorded_by = import.approved_by.clone().unwrap_or_else(|| import.uploaded_by.clone());
        let rows = storage::list_rows(&self.pool, import_id).await?;
        let own_rows: HashSet<RowId> = rows.iter().map(|r| r.id).collect();

        let mut report = ProcessingReport::default();
        for mut row in rows {
            match row.outcome() {
                RowOutcome::NotProcessable => continue,
                RowOutcome::Posted(_) => {
                    report.already_posted += 1;
                    continue;
                }
                RowOutcome::Pending | RowOutcome::Failed(_) => {}
            }

            // Screened again per row so money posted by a concurrent import
            // since approval is seen. Without the screen nothing is posted.
            let result = match self.row_screening(&import, &row, &own_rows).await {
                Ok(records) => self.process_row(&import, &mut row, &records, &recorded_by).await,
                Err(e) => Err(format!("duplicate screening unavailable: {e}")),
            };
            match result {
                Ok(Some(record)) => {
                    row.posted_record = Some(record);
                    row.processing_error = None;
                    report.posted += 1;
                }
                Ok(None) => report.duplicates += 1,
                Err(error) => {
                    warn!(row = %row.id, index = row.index, %error, "row not posted");
                    row.processing_error = Some(error.clone());
                    report.failed += 1;
                    report.failures.push(RowFailure {
                        row_id: row.id,
                        index: row.index,
                        error,
                    });
                }
            }
            row.processed_at = Some(Utc::now());
            storage::update_row(&self.pool, &row, ImportStage::Approved).await?;
        }

        storage::mark_processed(&self.pool, import_id, Utc::now()).await?;
        info!(
            %import_id,
            posted = report.posted,
            duplicates = report.duplicates,
            failed = report.failed,
            "processing completed"
        );
        self.emit(ImportEvent::ProcessingCompleted {
            import_id,
            posted: report.posted,
            duplicates: report.duplicates,
            failed: report.failed,
            failures: report.failures.clone(),
        })
        .await;
        Ok(report)
    }

    /// Screens and posts one row. `Ok(None)` means the row turned out to be an
    /// exact duplicate and was closed without posting.
    async fn process_row(
        &self,
        import: &StatementImport,
        row: &mut StatementRow,
        records: &[LedgerRecord],
        recorded_by: &ActorId,
    ) -> Result<Option<LedgerRecordRef>, String> {
        match self.guard.check(&candidate_of(row), records) {
            verdict @ DuplicateVerdict::ExactDuplicate { .. } => {
                row.status = RowStatus::Duplicate;
                row.duplicate_tier = Some(DuplicateTier::Exact);
                row.duplicate_of = verdict.of();
                row.processing_error = None;
                row.match_note = Some(verdict.explain());
                return Ok(None);
            }
            DuplicateVerdict::LikelyDuplicate { of, .. } if !row.duplicate_acknowledged => {
                row.duplicate_tier = Some(DuplicateTier::Likely);
                row.duplicate_of = Some(of);
                return Err(format!("possible duplicate of {of}; acknowledge or skip the row"));
            }
            _ => {}
        }
        if row.has_unacknowledged_warning() {
            return Err("possible duplicate; acknowledge or skip the row".to_string());
        }

        let amount_cents = row.amount_cents.abs();
        let posted = match (row.is_credit(), row.resident_id, row.expense_category.as_deref()) {
            (true, Some(resident_id), _) => {
                self.collaborators
                    .ledger
                    .create_payment(&NewPayment {
                        source_row_id: row.id,
                        import_id: import.id,
                        resident_id,
                        date: row.transaction_date,
                        amount_cents,
                        narration: row.narration.clone(),
                        reference: row.reference.clone(),
                        recorded_by: recorded_by.clone(),
                    })
                    .await
            }
            (false, _, Some(category)) => {
                self.collaborators
                    .ledger
                    .create_expense(&NewExpense {
                        source_row_id: row.id,
                        import_id: import.id,
                        category: category.to_string(),
                        date: row.transaction_date,
                        amount_cents,
                        narration: row.narration.clone(),
                        reference: row.reference.clone(),
                        recorded_by: recorded_by.clone(),
                    })
                    .await
            }
            _ => return Err("row has neither a resident nor an expense category".to_string()),
        };
        posted.map(Some).map_err(|e| e.to_string())
    }

    // ── Aliases ──────────────────────────────────────────────────────────────

    /// Teaches the matcher that `fragment` means `resident_id`.
    pub async fn add_alias(
        &self,
        fragment: &str,
        resident_id: ResidentId,
        actor: &ActorId,
    ) -> Result<ResidentPaymentAlias, ReconError> {
        let key = narration_key(fragment);
        if key.is_empty() {
            return Err(ReconError::Validation(format!("alias '{fragment}' has no letters or digits")));
        }
        let residents = self.collaborators.residents.list_active_residents().await?;
        if !residents.iter().any(|r| r.id == resident_id) {
            return Err(ReconError::NotFound(format!("active resident {resident_id}")));
        }
        let alias = storage::insert_alias(&self.pool, &key, resident_id, actor, Utc::now()).await?;
        self.emit(ImportEvent::AliasLearned {
            fragment: alias.fragment.clone(),
            resident_id,
        })
        .await;
        Ok(alias)
    }

    /// Pass the `version` the operator was looking at to refuse the change
    /// when someone else wrote the alias in the meantime.
    pub async fn set_alias_active(
        &self,
        alias_id: AliasId,
        active: bool,
        expected_version: Option<i64>,
        actor: &ActorId,
    ) -> Result<ResidentPaymentAlias, ReconError> {
        let alias = storage::set_alias_active(&self.pool, alias_id, active, expected_version).await?;
        info!(alias = %alias_id, active, by = %actor, "alias updated");
        Ok(alias)
    }

    pub async fn list_aliases(&self, include_inactive: bool) -> Result<Vec<ResidentPaymentAlias>, ReconError> {
        Ok(storage::list_aliases(&self.pool, include_inactive).await?)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub async fn get_import(&self, import_id: ImportId) -> Result<ImportView, ReconError> {
        let import = storage::get_import(&self.pool, import_id).await?;
        self.view(import).await
    }

    async fn view(&self, import: StatementImport) -> Result<ImportView, ReconError> {
        let rows = storage::list_rows(&self.pool, import.id).await?;
        let open_approval = storage::get_open_approval(&self.pool, import.id).await?;
        Ok(ImportView {
            status: import.status(&rows),
            counts: RowCounts::from_rows(&rows),
            open_approval,
            import,
        })
    }

    /// Newest first.
    pub async fn list_imports(&self) -> Result<Vec<ImportView>, ReconError> {
        let mut views = Vec::new();
        for import in storage::list_imports(&self.pool).await? {
            views.push(self.view(import).await?);
        }
        Ok(views)
    }

    pub async fn list_rows(&self, import_id: ImportId) -> Result<Vec<StatementRow>, ReconError> {
        storage::get_import(&self.pool, import_id).await?;
        Ok(storage::list_rows(&self.pool, import_id).await?)
    }

    pub async fn breakdown(&self, import_id: ImportId) -> Result<ImportBreakdown, ReconError> {
        Ok(ImportBreakdown::from_rows(&self.list_rows(import_id).await?))
    }

    pub async fn approval_history(&self, import_id: ImportId) -> Result<Vec<ApprovalRequest>, ReconError> {
        storage::get_import(&self.pool, import_id).await?;
        Ok(storage::approval_history(&self.pool, import_id).await?)
    }
}
