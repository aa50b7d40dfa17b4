//! Deduplication fingerprints for the built-in line store.
//!
//! The record store keeps one SHA-256 fingerprint per absorbed line so a
//! line is stored at most once across restarts. Fingerprints are hex
//! strings; the actual line content never enters the database.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

impl Database {
    /// Insert a batch of line fingerprints, ignoring ones already present
    ///
    /// Returns one flag per input fingerprint: `true` when it was new. The
    /// caller appends exactly those lines to the record store, which is what
    /// makes the store stage idempotent across re-runs. Within one batch a
    /// repeated fingerprint is new only the first time.
    pub async fn insert_fingerprints_flags(&self, fingerprints: &[String]) -> Result<Vec<bool>> {
        if fingerprints.is_empty() {
            return Ok(Vec::new());
        }

        let now = chrono::Utc::now().timestamp();
        let mut flags = Vec::with_capacity(fingerprints.len());

        let mut tx = self.pool().begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin fingerprint transaction: {}",
                e
            )))
        })?;

        for fingerprint in fingerprints {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO line_fingerprints (fingerprint, first_seen) VALUES (?, ?)",
            )
            .bind(fingerprint)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert fingerprint: {}",
                    e
                )))
            })?;

            flags.push(result.rows_affected() > 0);
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit fingerprint transaction: {}",
                e
            )))
        })?;

        Ok(flags)
    }

    /// Insert a batch of line fingerprints, returning how many were new
    pub async fn insert_fingerprints(&self, fingerprints: &[String]) -> Result<usize> {
        let flags = self.insert_fingerprints_flags(fingerprints).await?;
        Ok(flags.into_iter().filter(|new| *new).count())
    }

    /// Check whether a single fingerprint is already known
    pub async fn has_fingerprint(&self, fingerprint: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM line_fingerprints WHERE fingerprint = ?")
                .bind(fingerprint)
                .fetch_optional(self.pool())
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to look up fingerprint: {}",
                        e
                    )))
                })?;

        Ok(found.is_some())
    }

    /// Total number of stored fingerprints
    pub async fn fingerprint_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM line_fingerprints")
            .fetch_one(self.pool())
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count fingerprints: {}",
                    e
                )))
            })?;

        Ok(count.max(0) as u64)
    }
}
