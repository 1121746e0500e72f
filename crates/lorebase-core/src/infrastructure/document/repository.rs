//! SQLite implementation of the DocumentStore
//!
//! Documents are JSON bodies keyed by `(collection, id)`. Uniqueness is
//! enforced by the `document_keys` primary key, so a concurrent duplicate
//! surfaces as a constraint violation rather than a lost race.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::domain::document::{Document, DocumentStore, Filter};
use crate::error::{Error, Result, is_unique_violation};

/// SQLite implementation of the document store
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    /// Create a new SQLite document store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_keys(
        tx: &mut Transaction<'_, Sqlite>,
        table: &str,
        id: &str,
        keys: &[String],
    ) -> Result<()> {
        for key in keys {
            sqlx::query("INSERT INTO document_keys (collection, key, id) VALUES (?, ?, ?)")
                .bind(table)
                .bind(key)
                .bind(id)
                .execute(&mut **tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        Error::already_exists(format!("{} key", table), key)
                    } else {
                        Error::DatabaseError(e)
                    }
                })?;
        }
        Ok(())
    }

    async fn live_body(
        tx: &mut Transaction<'_, Sqlite>,
        table: &str,
        id: &str,
    ) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT body FROM documents WHERE collection = ? AND id = ? AND deleted = 0",
        )
        .bind(table)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(|(body,)| body))
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn insert(&self, table: &str, document: Document) -> Result<String> {
        let body = serde_json::to_string(&document.body)?;
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT deleted FROM documents WHERE collection = ? AND id = ?")
                .bind(table)
                .bind(&document.id)
                .fetch_optional(&mut *tx)
                .await?;

        match existing {
            Some((0,)) => return Err(Error::already_exists(table, &document.id)),
            Some(_) => {
                sqlx::query(
                    r#"
                    UPDATE documents
                    SET body = ?, deleted = 0, operator = NULL, created_at = ?, updated_at = ?
                    WHERE collection = ? AND id = ?
                    "#,
                )
                .bind(&body)
                .bind(&now)
                .bind(&now)
                .bind(table)
                .bind(&document.id)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO documents (collection, id, body, deleted, created_at, updated_at)
                    VALUES (?, ?, ?, 0, ?, ?)
                    "#,
                )
                .bind(table)
                .bind(&document.id)
                .bind(&body)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }
        }

        Self::insert_keys(&mut tx, table, &document.id, &document.unique_keys).await?;
        tx.commit().await?;

        debug!(table = %table, id = %document.id, "Document inserted");
        Ok(document.id)
    }

    async fn find_by_id(&self, table: &str, id: &str) -> Result<Option<Value>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT body FROM documents WHERE collection = ? AND id = ? AND deleted = 0",
        )
        .bind(table)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(body,)| serde_json::from_str(&body).map_err(Error::from))
            .transpose()
    }

    async fn find_many(&self, table: &str, filter: &Filter) -> Result<Vec<Value>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT body FROM documents WHERE collection = ? AND deleted = 0 ORDER BY rowid",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for (body,) in rows {
            let value: Value = serde_json::from_str(&body)?;
            if filter.matches(&value) {
                documents.push(value);
            }
        }
        Ok(documents)
    }

    async fn update_fields(&self, table: &str, id: &str, fields: Map<String, Value>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let body = Self::live_body(&mut tx, table, id)
            .await?
            .ok_or_else(|| Error::not_found(table, id))?;

        let mut value: Value = serde_json::from_str(&body)?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| Error::Other(format!("document {}/{} is not an object", table, id)))?;
        for (field, v) in fields {
            object.insert(field, v);
        }

        sqlx::query("UPDATE documents SET body = ?, updated_at = ? WHERE collection = ? AND id = ?")
            .bind(serde_json::to_string(&value)?)
            .bind(Utc::now().to_rfc3339())
            .bind(table)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(table = %table, id = %id, "Document fields updated");
        Ok(())
    }

    async fn rekey(&self, table: &str, id: &str, unique_keys: Vec<String>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if Self::live_body(&mut tx, table, id).await?.is_none() {
            return Err(Error::not_found(table, id));
        }

        sqlx::query("DELETE FROM document_keys WHERE collection = ? AND id = ?")
            .bind(table)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        Self::insert_keys(&mut tx, table, id, &unique_keys).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn soft_delete(&self, table: &str, id: &str, operator: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE documents SET deleted = 1, operator = ?, updated_at = ?
            WHERE collection = ? AND id = ? AND deleted = 0
            "#,
        )
        .bind(operator)
        .bind(Utc::now().to_rfc3339())
        .bind(table)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(table, id));
        }

        sqlx::query("DELETE FROM document_keys WHERE collection = ? AND id = ?")
            .bind(table)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(table = %table, id = %id, operator = %operator, "Document soft-deleted");
        Ok(())
    }

    async fn next_sequence(&self, name: &str) -> Result<u64> {
        let (value,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO sequences (name, value) VALUES (?, 1)
            ON CONFLICT(name) DO UPDATE SET value = value + 1
            RETURNING value
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(value as u64)
    }
}
