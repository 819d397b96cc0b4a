//! Learned narration aliases.
//!
//! Every write is a single statement, so concurrent matchers can learn and
//! reinforce aliases without losing updates.

use chrono::{DateTime, Utc};
use tally_core::{ActorId, AliasId, ResidentId, ResidentPaymentAlias};

use crate::db::DbPool;
use crate::error::StorageError;

type AliasTuple = (i64, String, i64, i64, Option<DateTime<Utc>>, bool, i64, Option<String>, DateTime<Utc>);

const ALIAS_COLUMNS: &str =
    "id, fragment, resident_id, hit_count, last_used_at, is_active, version, created_by, created_at";

fn to_alias(r: AliasTuple) -> ResidentPaymentAlias {
    ResidentPaymentAlias {
        id: AliasId(r.0),
        fragment: r.1,
        resident_id: ResidentId(r.2),
        hit_count: r.3,
        last_used_at: r.4,
        is_active: r.5,
        version: r.6,
        created_by: r.7.map(ActorId),
        created_at: r.8,
    }
}

/// Records that `fragment` was confirmed as `resident_id`.
///
/// New fragments are inserted; known ones gain a hit, are reactivated and,
/// when pointed at a different resident, restart their hit count.
pub async fn learn_alias(
    pool: &DbPool,
    fragment: &str,
    resident_id: ResidentId,
    by: Option<&ActorId>,
    at: DateTime<Utc>,
) -> Result<ResidentPaymentAlias, StorageError> {
    let row = sqlx::query_as::<_, AliasTuple>(&format!(
        r#"
        INSERT INTO resident_payment_aliases (fragment, resident_id, hit_count, last_used_at, is_active,
            version, created_by, created_at)
        VALUES (?, ?, 1, ?, 1, 1, ?, ?)
        ON CONFLICT(fragment) DO UPDATE SET
            hit_count = CASE WHEN resident_id = excluded.resident_id THEN hit_count + 1 ELSE 1 END,
            resident_id = excluded.resident_id,
            last_used_at = excluded.last_used_at,
            is_active = 1,
            version = version + 1
        RETURNING {ALIAS_COLUMNS}
        "#
    ))
    .bind(fragment)
    .bind(resident_id.0)
    .bind(at)
    .bind(by.map(|a| a.0.as_str()))
    .bind(at)
    .fetch_one(pool)
    .await?;
    Ok(to_alias(row))
}

/// Operator-created alias. Refuses to overwrite an existing fragment.
pub async fn insert_alias(
    pool: &DbPool,
    fragment: &str,
    resident_id: ResidentId,
    by: &ActorId,
    at: DateTime<Utc>,
) -> Result<ResidentPaymentAlias, StorageError> {
    let row = sqlx::query_as::<_, AliasTuple>(&format!(
        r#"
        INSERT INTO resident_payment_aliases (fragment, resident_id, hit_count, last_used_at, is_active,
            version, created_by, created_at)
        VALUES (?, ?, 0, NULL, 1, 1, ?, ?)
        RETURNING {ALIAS_COLUMNS}
        "#
    ))
    .bind(fragment)
    .bind(resident_id.0)
    .bind(&by.0)
    .bind(at)
    .fetch_one(pool)
    .await
    .map_err(|e| StorageError::on_unique(e, || format!("alias '{fragment}' already exists")))?;
    Ok(to_alias(row))
}

/// Counts an automatic match made through the alias.
pub async fn touch_alias(pool: &DbPool, id: AliasId, at: DateTime<Utc>) -> Result<(), StorageError> {
    let result = sqlx::query(
        "UPDATE resident_payment_aliases SET hit_count = hit_count + 1, last_used_at = ?, version = version + 1 \
         WHERE id = ?",
    )
    .bind(at)
    .bind(id.0)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound(format!("alias {id}")));
    }
    Ok(())
}

/// Activates or deactivates an alias. With `expected_version` the change only
/// applies if nobody else wrote the alias since it was read.
pub async fn set_alias_active(
    pool: &DbPool,
    id: AliasId,
    active: bool,
    expected_version: Option<i64>,
) -> Result<ResidentPaymentAlias, StorageError> {
    let row = sqlx::query_as::<_, AliasTuple>(&format!(
        r#"
        UPDATE resident_payment_aliases SET is_active = ?, version = version + 1
        WHERE id = ? AND (? IS NULL OR version = ?)
        RETURNING {ALIAS_COLUMNS}
        "#
    ))
    .bind(active)
    .bind(id.0)
    .bind(expected_version)
    .bind(expected_version)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(to_alias(row)),
        None if get_alias(pool, id).await?.is_some() => {
            Err(StorageError::StaleState(format!("alias {id} changed since version {expected_version:?}")))
        }
        None => Err(StorageError::NotFound(format!("alias {id}"))),
    }
}

pub async fn get_alias(pool: &DbPool, id: AliasId) -> Result<Option<ResidentPaymentAlias>, StorageError> {
    let row = sqlx::query_as::<_, AliasTuple>(&format!(
        "SELECT {ALIAS_COLUMNS} FROM resident_payment_aliases WHERE id = ?"
    ))
    .bind(id.0)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(to_alias))
}

/// Aliases ordered by fragment; inactive ones only when asked for.
pub async fn list_aliases(pool: &DbPool, include_inactive: bool) -> Result<Vec<ResidentPaymentAlias>, StorageError> {
    let rows = sqlx::query_as::<_, AliasTuple>(&format!(
        "SELECT {ALIAS_COLUMNS} FROM resident_payment_aliases WHERE is_active = 1 OR ? ORDER BY fragment"
    ))
    .bind(include_inactive)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(to_alias).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::test_db;
    use crate::residents::add_resident;

    #[tokio::test]
    async fn learning_twice_increments_instead_of_duplicating() {
        let (_dir, pool) = test_db().await;
        let john = add_resident(&pool, "John Doe").await.unwrap();

        let first = learn_alias(&pool, "mama nkechi", john, Some(&ActorId::from("op")), Utc::now())
            .await
            .unwrap();
        let second = learn_alias(&pool, "mama nkechi", john, None, Utc::now()).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.hit_count, 2);
        assert_eq!(second.version, 2);
        assert_eq!(second.created_by, Some(ActorId::from("op")));
        assert_eq!(list_aliases(&pool, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn relearning_for_another_resident_restarts_count() {
        let (_dir, pool) = test_db().await;
        let john = add_resident(&pool, "John Doe").await.unwrap();
        let mary = add_resident(&pool, "Mary Smith").await.unwrap();
        learn_alias(&pool, "js", john, None, Utc::now()).await.unwrap();
        learn_alias(&pool, "js", john, None, Utc::now()).await.unwrap();
        let moved = learn_alias(&pool, "js", mary, None, Utc::now()).await.unwrap();
        assert_eq!(moved.resident_id, mary);
        assert_eq!(moved.hit_count, 1);
    }

    #[tokio::test]
    async fn concurrent_learning_loses_no_hits() {
        let (_dir, pool) = test_db().await;
        let john = add_resident(&pool, "John Doe").await.unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { learn_alias(&pool, "john doe", john, None, Utc::now()).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let aliases = list_aliases(&pool, false).await.unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].hit_count, 8);
    }

    #[tokio::test]
    async fn operator_alias_conflicts_and_can_be_deactivated() {
        let (_dir, pool) = test_db().await;
        let john = add_resident(&pool, "John Doe").await.unwrap();
        let op = ActorId::from("op");
        let alias = insert_alias(&pool, "jd", john, &op, Utc::now()).await.unwrap();
        assert_eq!(alias.hit_count, 0);
        assert!(matches!(
            insert_alias(&pool, "jd", john, &op, Utc::now()).await,
            Err(StorageError::Conflict(_))
        ));

        let off = set_alias_active(&pool, alias.id, false, Some(alias.version)).await.unwrap();
        assert!(!off.is_active);
        assert!(list_aliases(&pool, false).await.unwrap().is_empty());
        assert_eq!(list_aliases(&pool, true).await.unwrap().len(), 1);

        // The version moved on, so the stale write is refused.
        let stale = set_alias_active(&pool, alias.id, true, Some(alias.version)).await;
        assert!(matches!(stale, Err(StorageError::StaleState(_))));
        let missing = set_alias_active(&pool, AliasId(404), true, None).await;
        assert!(matches!(missing, Err(StorageError::NotFound(_))));

        touch_alias(&pool, alias.id, Utc::now()).await.unwrap();
        let touched = get_alias(&pool, alias.id).await.unwrap().unwrap();
        assert_eq!(touched.hit_count, 1);
        assert!(touched.last_used_at.is_some());
    }
}
