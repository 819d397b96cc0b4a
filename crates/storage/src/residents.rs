use async_trait::async_trait;
use tally_core::{CollaboratorError, Resident, ResidentDirectory, ResidentId};

use crate::db::DbPool;
use crate::error::StorageError;

pub async fn add_resident(pool: &DbPool, full_name: &str) -> Result<ResidentId, StorageError> {
    let result = sqlx::query("INSERT INTO residents (full_name) VALUES (?)")
        .bind(full_name.trim())
        .execute(pool)
        .await?;
    Ok(ResidentId(result.last_insert_rowid()))
}

pub async fn set_resident_active(pool: &DbPool, id: ResidentId, active: bool) -> Result<(), StorageError> {
    let result = sqlx::query("UPDATE residents SET is_active = ? WHERE id = ?")
        .bind(active)
        .bind(id.0)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound(format!("resident {id}")));
    }
    Ok(())
}

pub async fn get_active_residents(pool: &DbPool) -> Result<Vec<Resident>, StorageError> {
    let rows = sqlx::query_as::<_, (i64, String)>(
        "SELECT id, full_name FROM residents WHERE is_active = 1 ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, full_name)| Resident {
            id: ResidentId(id),
            full_name,
        })
        .collect())
}

/// Resident lookups served from the local residents table.
#[derive(Clone)]
pub struct SqliteResidentDirectory {
    pool: DbPool,
}

impl SqliteResidentDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResidentDirectory for SqliteResidentDirectory {
    async fn list_active_residents(&self) -> Result<Vec<Resident>, CollaboratorError> {
        get_active_residents(&self.pool)
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::test_db;

    #[tokio::test]
    async fn inactive_residents_are_hidden() {
        let (_dir, pool) = test_db().await;
        let john = add_resident(&pool, "John Doe").await.unwrap();
        let mary = add_resident(&pool, "  Mary Smith ").await.unwrap();
        set_resident_active(&pool, john, false).await.unwrap();

        let directory = SqliteResidentDirectory::new(pool.clone());
        let active = directory.list_active_residents().await.unwrap();
        assert_eq!(active, vec![Resident { id: mary, full_name: "Mary Smith".into() }]);

        assert!(matches!(
            set_resident_active(&pool, ResidentId(999), true).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
