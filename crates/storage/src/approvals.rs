use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use tally_core::{ActorId, ApprovalDecision, ApprovalId, ApprovalRequest, ImportId, ImportStage};

use crate::db::DbPool;
use crate::error::StorageError;
use crate::imports::set_stage_in;

type ApprovalTuple = (
    i64,
    i64,
    String,
    DateTime<Utc>,
    String,
    Option<String>,
    Option<DateTime<Utc>>,
    Option<String>,
);

const APPROVAL_COLUMNS: &str =
    "id, import_id, requested_by, requested_at, decision, decided_by, decided_at, reason";

fn to_request(r: ApprovalTuple) -> Result<ApprovalRequest, StorageError> {
    Ok(ApprovalRequest {
        id: ApprovalId(r.0),
        import_id: ImportId(r.1),
        requested_by: ActorId(r.2),
        requested_at: r.3,
        decision: r.4.parse()?,
        decided_by: r.5.map(ActorId),
        decided_at: r.6,
        reason: r.7,
    })
}

async fn fetch_request(tx: &mut Transaction<'_, Sqlite>, id: ApprovalId) -> Result<ApprovalRequest, StorageError> {
    let row = sqlx::query_as::<_, ApprovalTuple>(&format!(
        "SELECT {APPROVAL_COLUMNS} FROM approval_requests WHERE id = ?"
    ))
    .bind(id.0)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| StorageError::NotFound(format!("approval request {id}")))?;
    to_request(row)
}

/// Closes a pending request and moves its import out of `pending_approval`.
async fn close_request(
    tx: &mut Transaction<'_, Sqlite>,
    id: ApprovalId,
    decision: ApprovalDecision,
    decided_by: &ActorId,
    reason: Option<&str>,
    at: DateTime<Utc>,
) -> Result<ApprovalRequest, StorageError> {
    let result = sqlx::query(
        "UPDATE approval_requests SET decision = ?, decided_by = ?, decided_at = ?, reason = ? \
         WHERE id = ? AND decision = ?",
    )
    .bind(decision.as_str())
    .bind(&decided_by.0)
    .bind(at)
    .bind(reason)
    .bind(id.0)
    .bind(ApprovalDecision::Pending.as_str())
    .execute(&mut **tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::StaleState(format!("approval request {id} is no longer pending")));
    }

    let request = fetch_request(tx, id).await?;
    match decision {
        ApprovalDecision::Approved => {
            let result = sqlx::query(
                "UPDATE statement_imports SET stage = ?, approved_by = ?, approved_at = ? \
                 WHERE id = ? AND stage = ?",
            )
            .bind(ImportStage::Approved.as_str())
            .bind(&decided_by.0)
            .bind(at)
            .bind(request.import_id.0)
            .bind(ImportStage::PendingApproval.as_str())
            .execute(&mut **tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(StorageError::StaleState(format!(
                    "import {} is not awaiting approval",
                    request.import_id
                )));
            }
        }
        ApprovalDecision::Rejected => {
            set_stage_in(tx, request.import_id, ImportStage::PendingApproval, ImportStage::Review).await?;
        }
        ApprovalDecision::Pending => {
            return Err(StorageError::Conflict("a request cannot be closed as pending".into()));
        }
    }
    Ok(request)
}

/// Opens the single pending request for an import and moves it from `review`
/// to `pending_approval`. With `auto_approve` the request is approved by the
/// requester in the same transaction.
pub async fn open_approval(
    pool: &DbPool,
    import_id: ImportId,
    requested_by: &ActorId,
    at: DateTime<Utc>,
    auto_approve: bool,
) -> Result<ApprovalRequest, StorageError> {
    let mut tx = pool.begin().await?;

    let id = sqlx::query(
        "INSERT INTO approval_requests (import_id, requested_by, requested_at, decision) VALUES (?, ?, ?, ?)",
    )
    .bind(import_id.0)
    .bind(&requested_by.0)
    .bind(at)
    .bind(ApprovalDecision::Pending.as_str())
    .execute(&mut *tx)
    .await
    .map_err(|e| StorageError::on_unique(e, || format!("import {import_id} already has a pending approval request")))?
    .last_insert_rowid();
    let id = ApprovalId(id);

    set_stage_in(&mut tx, import_id, ImportStage::Review, ImportStage::PendingApproval).await?;

    let request = if auto_approve {
        close_request(&mut tx, id, ApprovalDecision::Approved, requested_by, None, at).await?
    } else {
        fetch_request(&mut tx, id).await?
    };
    tx.commit().await?;
    Ok(request)
}

pub async fn approve_request(
    pool: &DbPool,
    id: ApprovalId,
    decided_by: &ActorId,
    at: DateTime<Utc>,
) -> Result<ApprovalRequest, StorageError> {
    let mut tx = pool.begin().await?;
    let request = close_request(&mut tx, id, ApprovalDecision::Approved, decided_by, None, at).await?;
    tx.commit().await?;
    Ok(request)
}

pub async fn reject_request(
    pool: &DbPool,
    id: ApprovalId,
    decided_by: &ActorId,
    reason: &str,
    at: DateTime<Utc>,
) -> Result<ApprovalRequest, StorageError> {
    let mut tx = pool.begin().await?;
    let request = close_request(&mut tx, id, ApprovalDecision::Rejected, decided_by, Some(reason), at).await?;
    tx.commit().await?;
    Ok(request)
}

pub async fn get_open_approval(pool: &DbPool, import_id: ImportId) -> Result<Option<ApprovalRequest>, StorageError> {
    sqlx::query_as::<_, ApprovalTuple>(&format!(
        "SELECT {APPROVAL_COLUMNS} FROM approval_requests WHERE import_id = ? AND decision = ?"
    ))
    .bind(import_id.0)
    .bind(ApprovalDecision::Pending.as_str())
    .fetch_optional(pool)
    .await?
    .map(to_request)
    .transpose()
}

/// Every request ever made for the import, oldest first.
pub async fn approval_history(pool: &DbPool, import_id: ImportId) -> Result<Vec<ApprovalRequest>, StorageError> {
    sqlx::query_as::<_, ApprovalTuple>(&format!(
        "SELECT {APPROVAL_COLUMNS} FROM approval_requests WHERE import_id = ? ORDER BY id"
    ))
    .bind(import_id.0)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(to_request)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::test_db;
    use crate::imports::fixtures::{new_import, raw};
    use crate::imports::{get_import, insert_import_with_rows, set_stage};

    async fn import_in_review(pool: &DbPool, hash: &str) -> ImportId {
        let import = insert_import_with_rows(pool, &new_import(hash), &[raw(0, 5, 100, "A")])
            .await
            .unwrap();
        set_stage(pool, import.id, ImportStage::Draft, ImportStage::Review).await.unwrap();
        import.id
    }

    #[tokio::test]
    async fn second_open_request_conflicts() {
        let (_dir, pool) = test_db().await;
        let import_id = import_in_review(&pool, "a").await;
        let maker = ActorId::from("maker");

        let first = open_approval(&pool, import_id, &maker, Utc::now(), false).await.unwrap();
        assert!(first.is_open());

        // Even with the stage pushed back by hand, the index refuses a second pending request.
        sqlx::query("UPDATE statement_imports SET stage = 'review' WHERE id = ?")
            .bind(import_id.0)
            .execute(&pool)
            .await
            .unwrap();
        let err = open_approval(&pool, import_id, &maker, Utc::now(), false).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
        assert_eq!(approval_history(&pool, import_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_submissions_leave_one_pending_request() {
        let (_dir, pool) = test_db().await;
        let import_id = import_in_review(&pool, "race").await;

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    open_approval(&pool, import_id, &ActorId(format!("maker-{i}")), Utc::now(), false).await
                })
            })
            .collect();
        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(StorageError::Conflict(_)) | Err(StorageError::StaleState(_)) => {}
                Err(other) => panic!("unexpected error {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert!(get_open_approval(&pool, import_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn approve_moves_import_and_records_checker() {
        let (_dir, pool) = test_db().await;
        let import_id = import_in_review(&pool, "ok").await;
        let request = open_approval(&pool, import_id, &ActorId::from("maker"), Utc::now(), false)
            .await
            .unwrap();

        let decided = approve_request(&pool, request.id, &ActorId::from("checker"), Utc::now())
            .await
            .unwrap();
        assert_eq!(decided.decision, ApprovalDecision::Approved);

        let import = get_import(&pool, import_id).await.unwrap();
        assert_eq!(import.stage, ImportStage::Approved);
        assert_eq!(import.approved_by, Some(ActorId::from("checker")));
        assert!(get_open_approval(&pool, import_id).await.unwrap().is_none());

        let again = approve_request(&pool, request.id, &ActorId::from("checker"), Utc::now()).await;
        assert!(matches!(again, Err(StorageError::StaleState(_))));
    }

    #[tokio::test]
    async fn reject_returns_import_to_review_and_allows_resubmission() {
        let (_dir, pool) = test_db().await;
        let import_id = import_in_review(&pool, "no").await;
        let maker = ActorId::from("maker");
        let request = open_approval(&pool, import_id, &maker, Utc::now(), false).await.unwrap();

        let rejected = reject_request(&pool, request.id, &ActorId::from("checker"), "wrong month", Utc::now())
            .await
            .unwrap();
        assert_eq!(rejected.reason.as_deref(), Some("wrong month"));
        assert_eq!(get_import(&pool, import_id).await.unwrap().stage, ImportStage::Review);

        open_approval(&pool, import_id, &maker, Utc::now(), false).await.unwrap();
        let history = approval_history(&pool, import_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].decision, ApprovalDecision::Rejected);
        assert_eq!(history[1].decision, ApprovalDecision::Pending);
    }

    #[tokio::test]
    async fn auto_approval_happens_in_one_step() {
        let (_dir, pool) = test_db().await;
        let import_id = import_in_review(&pool, "auto").await;
        let request = open_approval(&pool, import_id, &ActorId::from("admin"), Utc::now(), true)
            .await
            .unwrap();
        assert_eq!(request.decision, ApprovalDecision::Approved);
        assert_eq!(request.decided_by, Some(ActorId::from("admin")));
        assert_eq!(get_import(&pool, import_id).await.unwrap().stage, ImportStage::Approved);
    }
}
